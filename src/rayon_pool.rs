//! A reference [`SimulatorPool`] that fans sigma-point tasks out across
//! rayon's global thread pool. Not required by the filter/smoother math,
//! which depends only on the [`SimulatorPool`] trait; callers with a
//! custom scheduler (or an async/FFI simulator) can provide their own
//! implementation instead.

use rayon::prelude::*;

use crate::error::Error;
use crate::model::{SigmaOutcome, SigmaTask, SimulatorPool};

/// Propagates a single [`SigmaTask`] to `stop`, given it started at
/// `start`. Implemented by the caller's simulator; kept separate from
/// [`crate::Model`] so the same propagation logic can run in parallel
/// without requiring `Model` itself to be `Sync`.
pub trait SigmaTaskRunner: Sync {
    fn propagate(&self, task: &SigmaTask, start: f64, stop: f64) -> Result<SigmaOutcome, Error>;
}

/// A [`SimulatorPool`] that maps each task batch over rayon's global
/// thread pool and reassembles results by input index via an indexed
/// `par_iter().map().collect()`, so two runs with different pool sizes
/// produce identical trajectories.
pub struct RayonSimulatorPool<R: SigmaTaskRunner> {
    runner: R,
}

impl<R: SigmaTaskRunner> RayonSimulatorPool<R> {
    pub fn new(runner: R) -> Self {
        RayonSimulatorPool { runner }
    }
}

impl<R: SigmaTaskRunner> SimulatorPool for RayonSimulatorPool<R> {
    fn run(&self, tasks: &[SigmaTask], start: f64, stop: f64) -> Result<Vec<SigmaOutcome>, Error> {
        tasks
            .par_iter()
            .enumerate()
            .map(|(_i, task)| self.runner.propagate(task, start, stop))
            .collect()
    }
}
