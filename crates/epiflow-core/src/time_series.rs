//! Sparse time series storage and interpolation.
//!
//! A [`TimeSeries`] holds an ordered set of (time, value) points, an optional
//! scalar assumption used when no points are present, and a free-form units
//! string. Interpolation onto a simulation time vector uses monotone cubic
//! (PCHIP, Fritsch-Carlson) interpolation, with queries outside the data
//! range receiving the nearest edge value rather than a polynomial
//! extrapolation.

use serde::{Deserialize, Serialize};

/// Two time points closer than this are treated as the same point.
pub const TIME_TOLERANCE: f64 = 1e-9;

/// Errors raised by [`TimeSeries`] operations.
#[derive(Debug, thiserror::Error)]
pub enum TimeSeriesError {
    #[error("time series has no data points and no assumption")]
    Empty,
    #[error("non-finite time {0}")]
    NonFiniteTime(f64),
    #[error("non-finite value {1} at t={0}")]
    NonFiniteValue(f64, f64),
    #[error("no data point at t={0}")]
    NotFound(f64),
}

/// Sparse (time, value) store with an assumption fallback.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeSeries {
    t: Vec<f64>,
    v: Vec<f64>,
    /// Scalar fallback used when no time-indexed points exist.
    pub assumption: Option<f64>,
    /// Units of the stored values, as declared in the framework.
    pub units: Option<String>,
}

impl TimeSeries {
    /// Create an empty series.
    pub fn new(units: Option<String>) -> Self {
        Self {
            t: Vec::new(),
            v: Vec::new(),
            assumption: None,
            units,
        }
    }

    /// Create a series holding only an assumption.
    pub fn from_assumption(value: f64, units: Option<String>) -> Self {
        Self {
            t: Vec::new(),
            v: Vec::new(),
            assumption: Some(value),
            units,
        }
    }

    /// Build a series from (time, value) pairs. The pairs need not be sorted.
    pub fn from_pairs<I>(pairs: I) -> Result<Self, TimeSeriesError>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let mut ts = Self::new(None);
        for (t, v) in pairs {
            ts.insert(t, v)?;
        }
        Ok(ts)
    }

    /// Number of stored data points (the assumption does not count).
    pub fn len(&self) -> usize {
        self.t.len()
    }

    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }

    /// Whether the series can produce a value at all.
    pub fn has_data(&self) -> bool {
        !self.t.is_empty() || self.assumption.is_some()
    }

    /// The stored times and values, in time order.
    pub fn get_arrays(&self) -> (&[f64], &[f64]) {
        (&self.t, &self.v)
    }

    /// Insert a point, keeping times sorted. A time within
    /// [`TIME_TOLERANCE`] of an existing point overwrites that point.
    pub fn insert(&mut self, t: f64, v: f64) -> Result<(), TimeSeriesError> {
        if !t.is_finite() {
            return Err(TimeSeriesError::NonFiniteTime(t));
        }
        if !v.is_finite() {
            return Err(TimeSeriesError::NonFiniteValue(t, v));
        }
        match self.locate(t) {
            Ok(idx) => self.v[idx] = v,
            Err(idx) => {
                self.t.insert(idx, t);
                self.v.insert(idx, v);
            }
        }
        Ok(())
    }

    /// Remove the point at time `t` (exact within tolerance).
    pub fn remove(&mut self, t: f64) -> Result<(), TimeSeriesError> {
        match self.locate(t) {
            Ok(idx) => {
                self.t.remove(idx);
                self.v.remove(idx);
                Ok(())
            }
            Err(_) => Err(TimeSeriesError::NotFound(t)),
        }
    }

    /// Exact lookup at time `t` (within tolerance). Does not interpolate and
    /// does not fall back to the assumption.
    pub fn get(&self, t: f64) -> Option<f64> {
        self.locate(t).ok().map(|idx| self.v[idx])
    }

    /// Sample a single time point, interpolating as needed.
    pub fn sample(&self, t: f64) -> Result<f64, TimeSeriesError> {
        Ok(self.interpolate(std::slice::from_ref(&t))?[0])
    }

    /// Interpolate the series onto `tvec`.
    ///
    /// With no data points the assumption is used as a constant; with one
    /// point that value is used as a constant. With two or more points the
    /// values are PCHIP-interpolated, and queries before the first or after
    /// the last point receive the edge value exactly.
    pub fn interpolate(&self, tvec: &[f64]) -> Result<Vec<f64>, TimeSeriesError> {
        if self.t.is_empty() {
            let value = self.assumption.ok_or(TimeSeriesError::Empty)?;
            return Ok(vec![value; tvec.len()]);
        }
        if self.t.len() == 1 {
            return Ok(vec![self.v[0]; tvec.len()]);
        }

        let slopes = pchip_slopes(&self.t, &self.v);
        let mut out = Vec::with_capacity(tvec.len());
        for &tq in tvec {
            out.push(self.eval_pchip(tq, &slopes));
        }
        Ok(out)
    }

    fn eval_pchip(&self, tq: f64, slopes: &[f64]) -> f64 {
        let n = self.t.len();
        // Flat extension beyond the data range.
        if tq <= self.t[0] {
            return self.v[0];
        }
        if tq >= self.t[n - 1] {
            return self.v[n - 1];
        }
        // Find the interval containing tq.
        let k = match self
            .t
            .binary_search_by(|probe| probe.partial_cmp(&tq).expect("times are finite"))
        {
            Ok(idx) => return self.v[idx],
            Err(idx) => idx - 1,
        };
        let h = self.t[k + 1] - self.t[k];
        let s = (tq - self.t[k]) / h;
        let (y0, y1) = (self.v[k], self.v[k + 1]);
        let (d0, d1) = (slopes[k], slopes[k + 1]);
        // Cubic Hermite basis.
        let s2 = s * s;
        let s3 = s2 * s;
        let h00 = 2.0 * s3 - 3.0 * s2 + 1.0;
        let h10 = s3 - 2.0 * s2 + s;
        let h01 = -2.0 * s3 + 3.0 * s2;
        let h11 = s3 - s2;
        h00 * y0 + h10 * h * d0 + h01 * y1 + h11 * h * d1
    }

    /// Binary search by time with tolerance. `Ok(idx)` is a match,
    /// `Err(idx)` the insertion point.
    fn locate(&self, t: f64) -> Result<usize, usize> {
        let idx = self
            .t
            .partition_point(|&existing| existing < t - TIME_TOLERANCE);
        if idx < self.t.len() && (self.t[idx] - t).abs() <= TIME_TOLERANCE {
            Ok(idx)
        } else {
            Err(idx)
        }
    }
}

/// Derivatives at each data point per Fritsch-Carlson, guaranteeing a
/// monotone interpolant on monotone data.
fn pchip_slopes(t: &[f64], v: &[f64]) -> Vec<f64> {
    let n = t.len();
    debug_assert!(n >= 2);

    let h: Vec<f64> = (0..n - 1).map(|k| t[k + 1] - t[k]).collect();
    let delta: Vec<f64> = (0..n - 1).map(|k| (v[k + 1] - v[k]) / h[k]).collect();

    if n == 2 {
        return vec![delta[0], delta[0]];
    }

    let mut d = vec![0.0; n];
    for k in 1..n - 1 {
        if delta[k - 1] * delta[k] <= 0.0 {
            d[k] = 0.0;
        } else {
            // Weighted harmonic mean of the adjacent secants.
            let w1 = 2.0 * h[k] + h[k - 1];
            let w2 = h[k] + 2.0 * h[k - 1];
            d[k] = (w1 + w2) / (w1 / delta[k - 1] + w2 / delta[k]);
        }
    }
    d[0] = edge_slope(h[0], h[1], delta[0], delta[1]);
    d[n - 1] = edge_slope(h[n - 2], h[n - 3], delta[n - 2], delta[n - 3]);
    d
}

/// One-sided three-point endpoint derivative, shape-preserving.
fn edge_slope(h0: f64, h1: f64, delta0: f64, delta1: f64) -> f64 {
    let d = ((2.0 * h0 + h1) * delta0 - h0 * delta1) / (h0 + h1);
    if d.signum() != delta0.signum() {
        0.0
    } else if delta0.signum() != delta1.signum() && d.abs() > 3.0 * delta0.abs() {
        3.0 * delta0
    } else {
        d
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_keeps_sorted() {
        let mut ts = TimeSeries::new(None);
        ts.insert(2020.0, 5.0).unwrap();
        ts.insert(2000.0, 1.0).unwrap();
        ts.insert(2010.0, 3.0).unwrap();
        let (t, v) = ts.get_arrays();
        assert_eq!(t, &[2000.0, 2010.0, 2020.0]);
        assert_eq!(v, &[1.0, 3.0, 5.0]);
    }

    #[test]
    fn test_insert_overwrites_existing_time() {
        let mut ts = TimeSeries::new(None);
        ts.insert(2000.0, 1.0).unwrap();
        ts.insert(2000.0, 2.0).unwrap();
        assert_eq!(ts.len(), 1);
        assert_eq!(ts.get(2000.0), Some(2.0));
    }

    #[test]
    fn test_remove_missing_point_errors() {
        let mut ts = TimeSeries::from_pairs([(2000.0, 1.0)]).unwrap();
        assert!(ts.remove(2001.0).is_err());
        ts.remove(2000.0).unwrap();
        assert!(ts.is_empty());
    }

    #[test]
    fn test_rejects_non_finite() {
        let mut ts = TimeSeries::new(None);
        assert!(ts.insert(f64::NAN, 1.0).is_err());
        assert!(ts.insert(2000.0, f64::INFINITY).is_err());
    }

    #[test]
    fn test_assumption_fallback() {
        let ts = TimeSeries::from_assumption(0.25, None);
        let out = ts.interpolate(&[2000.0, 2001.0, 2002.0]).unwrap();
        assert_eq!(out, vec![0.25, 0.25, 0.25]);
    }

    #[test]
    fn test_empty_series_errors() {
        let ts = TimeSeries::new(None);
        assert!(ts.interpolate(&[2000.0]).is_err());
    }

    #[test]
    fn test_single_point_is_constant() {
        let ts = TimeSeries::from_pairs([(2005.0, 7.0)]).unwrap();
        let out = ts.interpolate(&[2000.0, 2005.0, 2010.0]).unwrap();
        assert_eq!(out, vec![7.0, 7.0, 7.0]);
    }

    #[test]
    fn test_interpolation_passes_through_data() {
        let ts = TimeSeries::from_pairs([(2000.0, 1.0), (2005.0, 4.0), (2010.0, 2.0)]).unwrap();
        let out = ts.interpolate(&[2000.0, 2005.0, 2010.0]).unwrap();
        assert!((out[0] - 1.0).abs() < 1e-12);
        assert!((out[1] - 4.0).abs() < 1e-12);
        assert!((out[2] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_flat_extension_outside_range() {
        let ts = TimeSeries::from_pairs([(2000.0, 1.0), (2010.0, 3.0)]).unwrap();
        let out = ts.interpolate(&[1990.0, 2020.0]).unwrap();
        assert_eq!(out, vec![1.0, 3.0]);
    }

    #[test]
    fn test_monotone_data_stays_monotone() {
        // An overshooting (non-monotone) interpolant would dip below the data
        // between the steep and shallow segments.
        let ts = TimeSeries::from_pairs([
            (2000.0, 0.0),
            (2001.0, 0.1),
            (2002.0, 0.9),
            (2003.0, 1.0),
        ])
        .unwrap();
        let tq: Vec<f64> = (0..=30).map(|i| 2000.0 + 0.1 * i as f64).collect();
        let out = ts.interpolate(&tq).unwrap();
        for pair in out.windows(2) {
            assert!(pair[1] >= pair[0] - 1e-12, "interpolant not monotone");
        }
        assert!(out.iter().all(|&y| (-1e-12..=1.0 + 1e-12).contains(&y)));
    }

    #[test]
    fn test_serde_round_trip() {
        let mut ts = TimeSeries::new(Some("probability".into()));
        ts.insert(2000.0, 0.1).unwrap();
        ts.insert(2010.0, 0.2).unwrap();
        ts.assumption = Some(0.15);
        let json = serde_json::to_string(&ts).unwrap();
        let back: TimeSeries = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get_arrays(), ts.get_arrays());
        assert_eq!(back.assumption, ts.assumption);
        assert_eq!(back.units, ts.units);
    }
}
