//! Runtime compartment state.
//!
//! A compartment's behaviour is selected by a tagged variant, dispatched
//! exhaustively wherever behaviour differs. Timed compartments carry their
//! duration-bin bookkeeping alongside the recorded stock array.

/// Behavioural variant of a runtime compartment.
#[derive(Debug, Clone)]
pub enum CompartmentVariant {
    Plain,
    Junction,
    Source,
    Sink,
    Timed(TimedBins),
}

/// A stock of people tracked over the simulation time vector.
#[derive(Debug, Clone)]
pub struct Compartment {
    pub id: String,
    pub variant: CompartmentVariant,
    /// Recorded stock per simulation step.
    pub stock: Vec<f64>,
}

impl Compartment {
    pub fn new(id: impl Into<String>, variant: CompartmentVariant, n_steps: usize) -> Self {
        Self {
            id: id.into(),
            variant,
            stock: vec![0.0; n_steps],
        }
    }

    pub fn is_junction(&self) -> bool {
        matches!(self.variant, CompartmentVariant::Junction)
    }

    pub fn is_source(&self) -> bool {
        matches!(self.variant, CompartmentVariant::Source)
    }

    pub fn is_sink(&self) -> bool {
        matches!(self.variant, CompartmentVariant::Sink)
    }

    pub fn timed(&self) -> Option<&TimedBins> {
        match &self.variant {
            CompartmentVariant::Timed(bins) => Some(bins),
            _ => None,
        }
    }

    pub fn timed_mut(&mut self) -> Option<&mut TimedBins> {
        match &mut self.variant {
            CompartmentVariant::Timed(bins) => Some(bins),
            _ => None,
        }
    }

    /// Stock available to voluntary (non-flush) outflows at `step`.
    ///
    /// Plain compartments expose their full stock; sources are unlimited;
    /// timed compartments withhold the final (about-to-expire) bin, which
    /// may only leave through the flush link; junctions and sinks expose
    /// nothing (junction routing happens in the flush phase).
    pub fn eligible(&self, step: usize) -> f64 {
        match &self.variant {
            CompartmentVariant::Plain => self.stock[step],
            CompartmentVariant::Source => f64::INFINITY,
            CompartmentVariant::Junction | CompartmentVariant::Sink => 0.0,
            CompartmentVariant::Timed(bins) => bins.eligible(),
        }
    }
}

/// Duration-bin state for a timed compartment.
///
/// `bins[i]` holds the occupants whose elapsed residence is `i` steps; the
/// last bin is about to expire and leaves through the flush link. The
/// invariant `stock[step] == bins.iter().sum()` is checked every step.
///
/// A compartment whose duration rounds to zero bins is a pass-through: its
/// arrivals leave through the flush link within the same step, handled in
/// the junction flush phase.
#[derive(Debug, Clone)]
pub struct TimedBins {
    pub bins: Vec<f64>,
    /// Index (within the owning population's link list) of the flush link.
    pub flush_link: usize,
    /// Compartments sharing a group preserve bin position on transition.
    pub group: Option<String>,
    /// Arrivals entering at bin zero during the current step.
    fresh: f64,
    /// Arrivals preserving elapsed residence: `carried[i]` ages into bin
    /// `i + 1` at the end of the step.
    carried: Vec<f64>,
}

impl TimedBins {
    pub fn new(n_bins: usize, flush_link: usize, group: Option<String>) -> Self {
        Self {
            bins: vec![0.0; n_bins],
            flush_link,
            group,
            fresh: 0.0,
            carried: vec![0.0; n_bins],
        }
    }

    pub fn n_bins(&self) -> usize {
        self.bins.len()
    }

    /// Zero-bin compartments flush arrivals within the arrival step.
    pub fn is_pass_through(&self) -> bool {
        self.bins.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.bins.iter().sum()
    }

    /// Occupants outside the final bin, eligible for voluntary outflow.
    pub fn eligible(&self) -> f64 {
        match self.bins.len() {
            0 => 0.0,
            n => self.bins[..n - 1].iter().sum(),
        }
    }

    /// Occupants in the final bin, leaving via the flush link this step.
    pub fn expiring(&self) -> f64 {
        self.bins.last().copied().unwrap_or(0.0)
    }

    /// Spread an initial stock uniformly across the bins.
    pub fn seed_uniform(&mut self, total: f64) {
        let n = self.bins.len();
        if n == 0 {
            return;
        }
        for bin in &mut self.bins {
            *bin = total / n as f64;
        }
    }

    /// Stage an arrival entering at bin zero.
    pub fn stage_fresh(&mut self, amount: f64) {
        self.fresh += amount;
    }

    /// Stage an arrival at a preserved residence position.
    pub fn stage_carried(&mut self, bin: usize, amount: f64) {
        if self.carried.is_empty() {
            self.fresh += amount;
            return;
        }
        let idx = bin.min(self.carried.len() - 1);
        self.carried[idx] += amount;
    }

    pub fn staged_fresh(&self) -> f64 {
        self.fresh
    }

    /// Take and clear the staged fresh arrivals (used by pass-through
    /// compartments, which forward them immediately).
    pub fn drain_fresh(&mut self) -> f64 {
        std::mem::take(&mut self.fresh)
    }

    /// Remove a voluntary outflow proportionally from the non-final bins,
    /// returning the per-bin amounts drawn.
    pub fn draw_proportional(&mut self, amount: f64) -> Vec<f64> {
        let n = self.bins.len();
        let mut drawn = vec![0.0; n];
        if n == 0 || amount == 0.0 {
            return drawn;
        }
        let eligible = self.eligible();
        if eligible <= 0.0 {
            return drawn;
        }
        for i in 0..n - 1 {
            let share = amount * self.bins[i] / eligible;
            self.bins[i] -= share;
            drawn[i] = share;
        }
        drawn
    }

    /// Remove the expiring occupants from the final bin.
    pub fn draw_expiring(&mut self, amount: f64) {
        if let Some(last) = self.bins.last_mut() {
            *last = (*last - amount).max(0.0);
        }
    }

    /// Age every occupant one bin, then admit staged arrivals: carried
    /// arrivals keep their (aged) position, fresh arrivals enter bin zero.
    pub fn advance(&mut self) {
        let n = self.bins.len();
        if n == 0 {
            // Pass-through: arrivals were forwarded during the flush phase.
            self.fresh = 0.0;
            return;
        }
        let mut next = vec![0.0; n];
        // Residual in the final bin stays put (it should be ~0 after the
        // flush draw; the invariant check catches anything larger).
        next[n - 1] = self.bins[n - 1];
        for i in 0..n - 1 {
            next[i + 1] += self.bins[i];
        }
        for (i, carried) in self.carried.iter().enumerate() {
            next[(i + 1).min(n - 1)] += carried;
        }
        next[0] += self.fresh;
        self.bins = next;
        self.fresh = 0.0;
        self.carried = vec![0.0; n];
    }
}
