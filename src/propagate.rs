use na::{DMatrix, DVector};
use nalgebra as na;

use crate::error::Error;
use crate::model::{SigmaTask, SimulatorPool};

/// Advance every row of the sigma-point matrix `xs` from `t_old` to `t`
/// through the simulator pool and reassemble the batch, by input index,
/// into `(X_proj, Z_proj, X_full_proj)`.
///
/// `X_proj[i,:]` is the observed-state slice concatenated with the
/// parameter slice of sigma point `i` at `t`; `Z_proj[i,:]` its output
/// vector; `X_full_proj[i,:]` its full simulator state.
pub fn propagate_sigma_points(
    pool: &dyn SimulatorPool,
    xs: &DMatrix<f64>,
    n_obs: usize,
    n_pars: usize,
    n_outputs: usize,
    n_full: usize,
    t_old: f64,
    t: f64,
) -> Result<(DMatrix<f64>, DMatrix<f64>, DMatrix<f64>), Error> {
    let n_points = xs.nrows();

    let tasks: Vec<SigmaTask> = (0..n_points)
        .map(|i| {
            let state = DVector::from_iterator(n_obs, (0..n_obs).map(|j| xs[(i, j)]));
            let parameters = DVector::from_iterator(n_pars, (0..n_pars).map(|j| xs[(i, n_obs + j)]));
            SigmaTask { state, parameters }
        })
        .collect();

    let results = pool.run(&tasks, t_old, t)?;

    let mut x_proj = DMatrix::<f64>::zeros(n_points, n_obs + n_pars);
    let mut z_proj = DMatrix::<f64>::zeros(n_points, n_outputs);
    let mut x_full_proj = DMatrix::<f64>::zeros(n_points, n_full);

    for (i, r) in results.iter().enumerate() {
        for j in 0..n_obs {
            x_proj[(i, j)] = r.observed_state[j];
        }
        for j in 0..n_pars {
            x_proj[(i, n_obs + j)] = r.parameters[j];
        }
        for j in 0..n_outputs {
            z_proj[(i, j)] = r.outputs[j];
        }
        for j in 0..n_full {
            x_full_proj[(i, j)] = r.full_state[j];
        }
    }

    Ok((x_proj, z_proj, x_full_proj))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SigmaOutcome;

    struct EchoPool;

    impl SimulatorPool for EchoPool {
        fn run(&self, tasks: &[SigmaTask], _start: f64, _stop: f64) -> Result<Vec<SigmaOutcome>, Error> {
            Ok(tasks
                .iter()
                .map(|t| SigmaOutcome {
                    full_state: t.state.clone(),
                    observed_state: t.state.clone(),
                    parameters: t.parameters.clone(),
                    outputs: t.state.clone(),
                })
                .collect())
        }
    }

    #[test]
    fn reassembles_by_input_index_not_arrival_order() {
        let xs = DMatrix::from_row_slice(3, 1, &[10.0, 20.0, 30.0]);
        let pool = EchoPool;
        let (x_proj, z_proj, x_full) =
            propagate_sigma_points(&pool, &xs, 1, 0, 1, 1, 0.0, 1.0).unwrap();
        assert_eq!(x_proj.column(0).as_slice(), &[10.0, 20.0, 30.0]);
        assert_eq!(z_proj.column(0).as_slice(), &[10.0, 20.0, 30.0]);
        assert_eq!(x_full.column(0).as_slice(), &[10.0, 20.0, 30.0]);
    }
}
