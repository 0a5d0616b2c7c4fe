//! Coverage combination rules.
//!
//! Given the fraction of the eligible population each program reaches and
//! the parameter value each program drives towards, these functions produce
//! the effective parameter value under the three interaction modes. All
//! modes collapse to `baseline + coverage * (outcome - baseline)` when a
//! single program is active, return the pure baseline at zero coverage, and
//! never let aggregate coverage exceed 1.

use crate::types::CoverageInteraction;

/// Combine per-program `(coverage, outcome)` pairs into an effective
/// parameter value. Pair order is the nested-mode priority, first entry
/// highest. Coverages are clamped to [0, 1] before combination.
pub fn combine(
    baseline: f64,
    entries: &[(f64, f64)],
    interaction: CoverageInteraction,
) -> f64 {
    let entries: Vec<(f64, f64)> = entries
        .iter()
        .map(|&(c, o)| (c.clamp(0.0, 1.0), o))
        .collect();
    match interaction {
        CoverageInteraction::Additive => additive(baseline, &entries),
        CoverageInteraction::Random => random(baseline, &entries),
        CoverageInteraction::Nested => nested(baseline, &entries),
    }
}

/// Deltas sum over programs. If total coverage exceeds 1 the coverages are
/// rescaled to sum to exactly 1, keeping their relative magnitudes.
fn additive(baseline: f64, entries: &[(f64, f64)]) -> f64 {
    let total: f64 = entries.iter().map(|(c, _)| c).sum();
    let scale = if total > 1.0 { 1.0 / total } else { 1.0 };
    baseline
        + entries
            .iter()
            .map(|&(c, o)| c * scale * (o - baseline))
            .sum::<f64>()
}

/// Independent reach: the additive delta, scaled onto the aggregate
/// covered fraction `1 - prod(1 - c_i)` implied by statistical
/// independence.
fn random(baseline: f64, entries: &[(f64, f64)]) -> f64 {
    let total: f64 = entries.iter().map(|(c, _)| c).sum();
    if total == 0.0 {
        return baseline;
    }
    let raw_delta: f64 = entries.iter().map(|&(c, o)| c * (o - baseline)).sum();
    let covered = 1.0 - entries.iter().map(|(c, _)| 1.0 - c).product::<f64>();
    baseline + raw_delta * covered / total
}

/// Nested targeting: program coverages overlap maximally, so a person at
/// coverage quantile q is reached by every program whose coverage exceeds
/// q and takes the outcome of the highest-priority one among them.
fn nested(baseline: f64, entries: &[(f64, f64)]) -> f64 {
    let mut boundaries: Vec<f64> = entries.iter().map(|(c, _)| *c).collect();
    boundaries.push(0.0);
    boundaries.sort_by(|a, b| a.partial_cmp(b).expect("coverages are finite"));
    boundaries.dedup();

    let mut value = 0.0;
    let mut covered = 0.0;
    for pair in boundaries.windows(2) {
        let (lo, hi) = (pair[0], pair[1]);
        let width = hi - lo;
        // Highest-priority program covering this quantile band.
        let outcome = entries
            .iter()
            .find(|(c, _)| *c >= hi)
            .map(|(_, o)| *o)
            .expect("band is below some coverage by construction");
        value += width * outcome;
        covered += width;
    }
    value + (1.0 - covered) * baseline
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const MODES: [CoverageInteraction; 3] = [
        CoverageInteraction::Additive,
        CoverageInteraction::Random,
        CoverageInteraction::Nested,
    ];

    #[rstest]
    #[case(0.0)]
    #[case(0.3)]
    #[case(0.75)]
    #[case(1.0)]
    fn test_single_program_equivalence(#[case] coverage: f64) {
        // One active program must give baseline + c*(outcome - baseline)
        // under every mode.
        let baseline = 0.2;
        let outcome = 0.8;
        let expected = baseline + coverage * (outcome - baseline);
        for mode in MODES {
            let value = combine(baseline, &[(coverage, outcome)], mode);
            assert!(
                (value - expected).abs() < 1e-12,
                "{mode:?} gave {value}, expected {expected}"
            );
        }
    }

    #[test]
    fn test_zero_coverage_everywhere_is_baseline() {
        let entries = [(0.0, 0.9), (0.0, 0.5), (0.0, 0.1)];
        for mode in MODES {
            assert_eq!(combine(0.3, &entries, mode), 0.3);
        }
    }

    #[test]
    fn test_additive_sums_deltas() {
        let value = combine(0.1, &[(0.2, 0.6), (0.3, 0.5)], CoverageInteraction::Additive);
        let expected = 0.1 + 0.2 * 0.5 + 0.3 * 0.4;
        assert!((value - expected).abs() < 1e-12);
    }

    #[test]
    fn test_additive_caps_total_coverage() {
        // Coverages totalling 1.5 rescale to sum to 1; the result must
        // equal the fully-covered weighted mix of outcomes.
        let value = combine(0.0, &[(0.9, 0.6), (0.6, 0.3)], CoverageInteraction::Additive);
        let expected = (0.9 * 0.6 + 0.6 * 0.3) / 1.5;
        assert!((value - expected).abs() < 1e-12);
    }

    #[test]
    fn test_random_overlap_reduces_effect() {
        // Two half-coverage programs reach 75% of people in total, not
        // 100%: the combined delta is scaled by 0.75.
        let value = combine(0.0, &[(0.5, 1.0), (0.5, 1.0)], CoverageInteraction::Random);
        assert!((value - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_random_full_coverage_not_exceeded() {
        let value = combine(0.0, &[(1.0, 1.0), (1.0, 0.5)], CoverageInteraction::Random);
        // Aggregate covered fraction is 1; delta averages the outcomes.
        assert!((value - 0.75).abs() < 1e-12);
        assert!(value <= 1.0);
    }

    #[test]
    fn test_nested_priority_wins_overlap() {
        // First-listed program has priority: inside the overlap its
        // outcome applies, the lower-priority program only covers the
        // band beyond it.
        let baseline = 0.0;
        let value = combine(
            baseline,
            &[(0.4, 1.0), (0.6, 0.5)],
            CoverageInteraction::Nested,
        );
        let expected = 0.4 * 1.0 + 0.2 * 0.5;
        assert!((value - expected).abs() < 1e-12);
    }

    #[test]
    fn test_nested_remainder_gets_baseline() {
        let value = combine(0.2, &[(0.5, 0.8)], CoverageInteraction::Nested);
        assert!((value - (0.5 * 0.8 + 0.5 * 0.2)).abs() < 1e-12);
    }
}
