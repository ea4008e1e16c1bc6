use na::{DMatrix, DVector};
use nalgebra as na;

use crate::error::Error;

/// One sigma point handed to the simulator pool: the observed-state slice
/// and the parameter slice it should be advanced from.
#[derive(Debug, Clone)]
pub struct SigmaTask {
    pub state: DVector<f64>,
    pub parameters: DVector<f64>,
}

/// The result of advancing one [`SigmaTask`] to the batch's stop time.
/// Four named arrays, mirroring the `__ALL_STATE__`/`__OBS_STATE__`/
/// `__PARAMS__`/`__OUTPUTS__` keys of the source simulator pool's task
/// results.
#[derive(Debug, Clone)]
pub struct SigmaOutcome {
    pub full_state: DVector<f64>,
    pub observed_state: DVector<f64>,
    pub parameters: DVector<f64>,
    pub outputs: DVector<f64>,
}

/// The external black-box simulator pool. Given a batch of sigma-point
/// tasks and a `[start, stop]` interval, advances every task in parallel
/// and returns one [`SigmaOutcome`] per task, in the same order as the
/// input tasks. A failing task propagates as
/// [`ErrorKind::SimulationFailure`](crate::ErrorKind::SimulationFailure)
/// carrying its index; the whole batch is then discarded by the caller.
pub trait SimulatorPool {
    fn run(&self, tasks: &[SigmaTask], start: f64, stop: f64) -> Result<Vec<SigmaOutcome>, Error>;
}

/// The external simulator model: state transition, output map, persisted
/// state, parameter vector, noise covariance factors and the measurement
/// series. Out of scope for this crate's numerics; the filter only reads
/// and writes through this trait.
pub trait Model {
    /// Full internal simulator state size, `n_s`.
    fn num_states(&self) -> usize;
    /// Observed-state size, `n_obs`.
    fn num_observed_states(&self) -> usize;
    /// Estimated-parameter count, `n_pars`.
    fn num_parameters(&self) -> usize;
    /// Measured-output count, `n_y`.
    fn num_measured_outputs(&self) -> usize;

    /// The current observed-state slice, length `n_obs`.
    fn state_observed_values(&self) -> DVector<f64>;
    /// The current parameter vector, length `n_pars`.
    fn parameter_values(&self) -> DVector<f64>;

    /// `sqrt(P0)`, lower-triangular, size `(n_obs+n_pars) x (n_obs+n_pars)`.
    fn cov_state_pars_factor(&self) -> DMatrix<f64>;
    /// `sqrt(Q)`, lower-triangular, size `(n_obs+n_pars) x (n_obs+n_pars)`.
    fn cov_process_noise_factor(&self) -> DMatrix<f64>;
    /// `sqrt(R)`, lower-triangular, size `n_y x n_y`.
    fn cov_outputs_factor(&self) -> DMatrix<f64>;

    /// The full measurement series: column 0 is time, the remaining `n_y`
    /// columns are the measured outputs.
    fn measured_output_series(&self) -> DMatrix<f64>;
    /// The measurement recorded at time `t`, if any.
    fn measured_outputs_at(&self, t: f64) -> Option<DVector<f64>>;

    /// Overwrite the full internal state (used to keep hidden dynamics
    /// consistent with the averaged sigma-point projection).
    fn set_state(&mut self, full_state: &DVector<f64>);
    /// Overwrite just the observed-state slice.
    fn set_observed_state(&mut self, observed: &DVector<f64>);
    /// Overwrite the parameter vector.
    fn set_parameters(&mut self, parameters: &DVector<f64>);

    /// Direct output evaluation for a sigma point, bypassing the pool.
    /// `flag` is forwarded to the model unchanged (its meaning is
    /// model-specific, e.g. "apply output noise").
    fn output_map(&self, sigma_point: &DVector<f64>, u: &DVector<f64>, t: f64, flag: bool) -> DVector<f64>;
}
