//! Parallel batch execution.
//!
//! A single run is strictly sequential, but independent runs — Monte-Carlo
//! samples, scenario sweeps, ensembles — share nothing: each sample owns a
//! value-copied parameter set, dispatched onto the rayon pool and collected
//! keyed by input index. A failed run is reported in its slot rather than
//! aborting the batch, so outer calibration/optimization layers can treat a
//! numerical failure as an infeasible point.

use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use tracing::info;

use epiflow_core::{Framework, ParameterSet};

use crate::config::SimConfig;
use crate::error::SimulationError;
use crate::integrator::Integrator;
use crate::overlay::ParameterOverlay;
use crate::result::SimResult;

/// Callback invoked after each run completes, with (completed, total).
pub type ProgressFn<'a> = &'a (dyn Fn(usize, usize) + Sync);

/// Run every sample in parallel. Results are keyed by input index.
pub fn run_batch(
    framework: &Framework,
    config: SimConfig,
    samples: Vec<ParameterSet>,
    progress: Option<ProgressFn>,
) -> Vec<Result<SimResult, SimulationError>> {
    run_batch_with_overlays(framework, config, samples, |_| None, progress)
}

/// Run every sample in parallel, attaching the overlay (if any) built for
/// its index — used to pair each sample with its own program instructions.
pub fn run_batch_with_overlays<F>(
    framework: &Framework,
    config: SimConfig,
    samples: Vec<ParameterSet>,
    make_overlay: F,
    progress: Option<ProgressFn>,
) -> Vec<Result<SimResult, SimulationError>>
where
    F: Fn(usize) -> Option<Box<dyn ParameterOverlay>> + Sync,
{
    let total = samples.len();
    info!(runs = total, "starting batch");
    let completed = AtomicUsize::new(0);

    let results: Vec<Result<SimResult, SimulationError>> = samples
        .into_par_iter()
        .enumerate()
        .map(|(idx, parset)| {
            let result = (|| {
                let mut integrator = Integrator::new(framework, &parset, config)?;
                if let Some(overlay) = make_overlay(idx) {
                    integrator = integrator.with_overlay(overlay);
                }
                integrator.run()
            })();
            let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(callback) = progress {
                callback(done, total);
            }
            result
        })
        .collect();

    info!(
        runs = total,
        failed = results.iter().filter(|r| r.is_err()).count(),
        "batch finished"
    );
    results
}
