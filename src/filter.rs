use na::{DMatrix, DVector};
use nalgebra as na;

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use crate::constraints::ConstraintTable;
use crate::error::{Error, ErrorKind};
use crate::model::{Model, SimulatorPool};
use crate::moments::{chol_update, compute_s, compute_sy, cross_covariance, solve_gain, state_state_cross_covariance, weighted_mean};
use crate::propagate::propagate_sigma_points;
use crate::sigma_points::generate_sigma_points;
use crate::weights::WeightTable;

/// `ukf_step` performs an extra output projection over `[t, t+epsilon]`
/// after the covariance redraw, to obtain fresh outputs without assuming
/// a pure output map exists.
pub const OUTPUT_PROJECTION_EPSILON: f64 = 1e-8;

/// One corrected estimate produced by [`UnscentedKalmanFilter::ukf_step`].
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub x_hat: DVector<f64>,
    pub s: DMatrix<f64>,
    pub z_avg: DVector<f64>,
    pub sy: DMatrix<f64>,
}

/// The accumulated forward (or smoothed) trajectory: per time step `k`,
/// the corrected augmented state, its square-root factor, the predicted
/// output mean and its factor. Kept in insertion order.
#[derive(Debug, Clone, Default)]
pub struct Trajectory {
    pub times: Vec<f64>,
    pub x_hat: Vec<DVector<f64>>,
    pub s: Vec<DMatrix<f64>>,
    pub z_avg: Vec<DVector<f64>>,
    pub sy: Vec<DMatrix<f64>>,
}

impl Trajectory {
    fn push(&mut self, t: f64, outcome: StepOutcome) {
        self.times.push(t);
        self.x_hat.push(outcome.x_hat);
        self.s.push(outcome.s);
        self.z_avg.push(outcome.z_avg);
        self.sy.push(outcome.sy);
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

/// The square-root UKF / RTS-smoother driver. Owns the weight table and
/// constraint table; borrows the simulator pool for the lifetime of the
/// filter and the model for the duration of each call.
pub struct UnscentedKalmanFilter<'a> {
    weights: WeightTable,
    constraints: ConstraintTable,
    augmented: bool,
    n_obs: usize,
    n_pars: usize,
    n_outputs: usize,
    n_full: usize,
    pool: &'a dyn SimulatorPool,
}

impl<'a> UnscentedKalmanFilter<'a> {
    /// Build a filter for the given model's dimensions. `augmented`
    /// selects the process/measurement-noise-augmented sigma-point
    /// scheme; when `false`, sigma points are drawn in `(n_obs+n_pars)`
    /// space only.
    pub fn new(model: &dyn Model, pool: &'a dyn SimulatorPool, augmented: bool) -> Result<Self, Error> {
        let n_states = model.num_states();
        let n_obs = model.num_observed_states();
        let n_pars = model.num_parameters();
        let n_outputs = model.num_measured_outputs();

        if n_obs > n_states {
            return Err(ErrorKind::InvalidUkfParameter.into());
        }

        let n = if augmented {
            2 * (n_obs + n_pars) + n_outputs
        } else {
            n_obs + n_pars
        };
        let weights = WeightTable::new(n)?;
        let constraints = ConstraintTable::unconstrained(n_obs, n_pars);

        Ok(UnscentedKalmanFilter {
            weights,
            constraints,
            augmented,
            n_obs,
            n_pars,
            n_outputs,
            n_full: n_states,
            pool,
        })
    }

    /// Mutable access to the constraint table, e.g. to activate a bound
    /// on a parameter before running [`Self::filter`].
    pub fn constraints_mut(&mut self) -> &mut ConstraintTable {
        &mut self.constraints
    }

    /// Mutable access to the weight table, e.g. to call
    /// [`WeightTable::set_params`] with non-default hyperparameters.
    pub fn weights_mut(&mut self) -> &mut WeightTable {
        &mut self.weights
    }

    fn split_state_pars(&self, v: &DVector<f64>) -> (DVector<f64>, DVector<f64>) {
        let x = DVector::from_iterator(self.n_obs, v.iter().take(self.n_obs).cloned());
        let p = DVector::from_iterator(self.n_pars, v.iter().skip(self.n_obs).cloned());
        (x, p)
    }

    /// One predict-correct cycle: draw sigma points at `(x_prev, s_prev)`,
    /// propagate to `t`, recompute the square-root factor, redraw and
    /// write the averaged full state back into the model, project
    /// outputs, then apply the Kalman correction. If `z` is absent, the
    /// measurement is read from the model at `t`.
    pub fn ukf_step(
        &self,
        model: &mut dyn Model,
        x_prev: &DVector<f64>,
        s_prev: &DMatrix<f64>,
        sqrt_q: &DMatrix<f64>,
        sqrt_r: &DMatrix<f64>,
        t_old: f64,
        t: f64,
        z: Option<&DVector<f64>>,
    ) -> Result<StepOutcome, Error> {
        let (wm, wc) = self.weights.weights();
        let (wm, wc) = (wm.clone(), wc.clone());

        let (sq, sr) = if self.augmented { (Some(sqrt_q), Some(sqrt_r)) } else { (None, None) };

        // 1. generate sigma points at the prior estimate.
        let (x0, p0) = self.split_state_pars(x_prev);
        let xs = generate_sigma_points(&x0, &p0, s_prev, sq, sr, &self.weights, &self.constraints)?;
        #[cfg(feature = "std")]
        log::trace!("ukf_step: generated {} sigma points", xs.nrows());

        // 2. propagate over [t_old, t].
        let (x_proj, _z_proj, x_full_proj) =
            propagate_sigma_points(self.pool, &xs, self.n_obs, self.n_pars, self.n_outputs, self.n_full, t_old, t)?;

        // 3. average.
        let x_avg = weighted_mean(&x_proj, &wm);
        let x_full_avg = weighted_mean(&x_full_proj, &wm);
        #[cfg(feature = "std")]
        log::trace!("ukf_step: averaged projected state");

        // 4. new square-root factor.
        let s_new = compute_s(&x_proj, &x_avg, sqrt_q, &wc)?;

        // 5. redraw at the averaged state; write the full state back.
        let (x_avg_obs, p_avg) = self.split_state_pars(&x_avg);
        let xs_redraw = generate_sigma_points(&x_avg_obs, &p_avg, &s_new, sq, sr, &self.weights, &self.constraints)?;
        model.set_state(&x_full_avg);
        #[cfg(feature = "std")]
        log::trace!("ukf_step: redrew sigma points and wrote back full state");

        // 6. output projection over a zero-width step.
        let (x_proj2, z_proj2, _x_full_proj2) = propagate_sigma_points(
            self.pool,
            &xs_redraw,
            self.n_obs,
            self.n_pars,
            self.n_outputs,
            self.n_full,
            t,
            t + OUTPUT_PROJECTION_EPSILON,
        )?;

        // 7. average outputs, output factor, cross-covariance.
        let z_avg = weighted_mean(&z_proj2, &wm);
        let sy = compute_sy(&z_proj2, &z_avg, sqrt_r, &wc)?;
        let cov_xz = cross_covariance(&x_proj2, &x_avg, &z_proj2, &z_avg, &wc);
        #[cfg(feature = "std")]
        log::trace!("ukf_step: computed output factor and cross-covariance");

        // 8. Kalman gain.
        let k = solve_gain(&sy, &cov_xz)?;

        // 9. measurement.
        let z = match z {
            Some(z) => z.clone(),
            None => model.measured_outputs_at(t).ok_or(ErrorKind::MissingMeasurement)?,
        };

        // 10. correct.
        let innovation = &z - &z_avg;
        let mut x_hat = &x_avg + &k * &innovation;
        self.constraints.clip_augmented(&mut x_hat);
        #[cfg(feature = "std")]
        log::trace!("ukf_step: applied kalman correction");

        // 11. covariance correction (downdate).
        let u = &k * &sy;
        let s_k = chol_update(&s_new, &u, -1.0);

        // 12. write corrected state back into the model.
        let (obs_corr, pars_corr) = self.split_state_pars(&x_hat);
        model.set_observed_state(&obs_corr);
        model.set_parameters(&pars_corr);

        Ok(StepOutcome { x_hat, s: s_k, z_avg, sy })
    }

    /// The forward pass: read the model's measurement series, initialize
    /// from its current state/parameters/covariance, and run
    /// [`Self::ukf_step`] for every consecutive pair of timestamps.
    pub fn filter(&self, model: &mut dyn Model) -> Result<Trajectory, Error> {
        let measured = model.measured_output_series();
        let n_times = measured.nrows();

        let sqrt_q = model.cov_process_noise_factor();
        let sqrt_r = model.cov_outputs_factor();

        let mut x0 = DVector::<f64>::zeros(self.n_obs + self.n_pars);
        x0.rows_mut(0, self.n_obs).copy_from(&model.state_observed_values());
        x0.rows_mut(self.n_obs, self.n_pars).copy_from(&model.parameter_values());
        let s0 = model.cov_state_pars_factor();

        let z0 = DVector::from_iterator(self.n_outputs, (0..self.n_outputs).map(|j| measured[(0, 1 + j)]));

        let mut trajectory = Trajectory::default();
        trajectory.push(
            measured[(0, 0)],
            StepOutcome { x_hat: x0.clone(), s: s0.clone(), z_avg: z0, sy: sqrt_r.clone() },
        );

        let mut prev = x0;
        let mut prev_s = s0;
        for i in 1..n_times {
            let t_old = measured[(i - 1, 0)];
            let t = measured[(i, 0)];
            let z = DVector::from_iterator(self.n_outputs, (0..self.n_outputs).map(|j| measured[(i, 1 + j)]));

            let outcome = self.ukf_step(model, &prev, &prev_s, &sqrt_q, &sqrt_r, t_old, t, Some(&z))?;
            prev = outcome.x_hat.clone();
            prev_s = outcome.s.clone();
            trajectory.push(t, outcome);
        }

        Ok(trajectory)
    }

    /// The backward RTS-style smoother: reprocess a filtered trajectory
    /// from right to left, blending future-corrected estimates into past
    /// estimates via the state-state cross-covariance gain. The observed
    /// slice is smoothed; the parameter slice keeps its filtered value.
    pub fn smooth(&self, filtered: &Trajectory, sqrt_q: &DMatrix<f64>, sqrt_r: &DMatrix<f64>) -> Result<Trajectory, Error> {
        let k_total = filtered.len();
        let mut x_smooth = filtered.x_hat.clone();
        let mut s_smooth = filtered.s.clone();

        let (wm, wc) = self.weights.weights();
        let (wm, wc) = (wm.clone(), wc.clone());
        let (sq, sr) = if self.augmented { (Some(sqrt_q), Some(sqrt_r)) } else { (None, None) };
        let n_sp = self.n_obs + self.n_pars;

        if k_total >= 2 {
            for k in (0..k_total - 1).rev() {
                let (x_i, p_i) = self.split_state_pars(&x_smooth[k]);
                let s_i = s_smooth[k].clone();

                let xs_i_full = generate_sigma_points(&x_i, &p_i, &s_i, sq, sr, &self.weights, &self.constraints)?;
                let xs_i_state = xs_i_full.columns(0, n_sp).into_owned();

                let t_k = filtered.times[k];
                let t_k1 = filtered.times[k + 1];
                let (x_proj_next, _z_unused, _x_full_unused) = propagate_sigma_points(
                    self.pool,
                    &xs_i_full,
                    self.n_obs,
                    self.n_pars,
                    self.n_outputs,
                    self.n_full,
                    t_k,
                    t_k1,
                )?;

                let x_next_avg = weighted_mean(&x_proj_next, &wm);
                let s_new = compute_s(&x_proj_next, &x_next_avg, sqrt_q, &wc)?;
                let cxx = state_state_cross_covariance(&x_proj_next, &xs_i_state, &wm, &wc);
                let d = solve_gain(&s_new, &cxx)?;

                let delta = DVector::from_iterator(
                    self.n_obs,
                    (0..self.n_obs).map(|j| x_smooth[k + 1][j] - x_next_avg[j]),
                );
                // D is solved over the full augmented state-state cross-covariance;
                // only its columns acting on the observed slice are consumed here,
                // since the correction below only ever touches the observed slice.
                let correction = d.columns(0, self.n_obs) * &delta;

                let mut smoothed_obs = x_i.clone();
                for j in 0..self.n_obs {
                    smoothed_obs[j] += correction[j];
                }
                let mut smoothed_row = x_smooth[k].clone();
                smoothed_row.rows_mut(0, self.n_obs).copy_from(&smoothed_obs);
                self.constraints.clip_augmented(&mut smoothed_row);
                x_smooth[k] = smoothed_row;

                let v = d * (&s_smooth[k + 1] - &s_new);
                s_smooth[k] = chol_update(&filtered.s[k], &v, -1.0);
            }
        }

        Ok(Trajectory {
            times: filtered.times.clone(),
            x_hat: x_smooth,
            s: s_smooth,
            z_avg: filtered.z_avg.clone(),
            sy: filtered.sy.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SigmaOutcome, SigmaTask};
    use approx::assert_relative_eq;

    /// A scalar random-walk-with-parameter model: `x' = x`, `b' = b`,
    /// `y = x*b`. Matches the spec's "random-walk parameter" scenario.
    struct RandomWalkModel {
        state: f64,
        parameter: f64,
        measurements: DMatrix<f64>,
        sqrt_p0: f64,
        sqrt_q: f64,
        sqrt_r: f64,
    }

    impl RandomWalkModel {
        fn new(x0: f64, b0: f64, n_steps: usize, measured_y: f64) -> Self {
            let mut measurements = DMatrix::<f64>::zeros(n_steps, 2);
            for i in 0..n_steps {
                measurements[(i, 0)] = i as f64;
                measurements[(i, 1)] = measured_y;
            }
            RandomWalkModel {
                state: x0,
                parameter: b0,
                measurements,
                sqrt_p0: 1.0,
                sqrt_q: 1e-4,
                sqrt_r: 0.05,
            }
        }
    }

    impl Model for RandomWalkModel {
        fn num_states(&self) -> usize {
            1
        }
        fn num_observed_states(&self) -> usize {
            1
        }
        fn num_parameters(&self) -> usize {
            1
        }
        fn num_measured_outputs(&self) -> usize {
            1
        }
        fn state_observed_values(&self) -> DVector<f64> {
            DVector::from_vec(vec![self.state])
        }
        fn parameter_values(&self) -> DVector<f64> {
            DVector::from_vec(vec![self.parameter])
        }
        fn cov_state_pars_factor(&self) -> DMatrix<f64> {
            DMatrix::from_row_slice(2, 2, &[self.sqrt_p0, 0.0, 0.0, self.sqrt_p0])
        }
        fn cov_process_noise_factor(&self) -> DMatrix<f64> {
            DMatrix::from_row_slice(2, 2, &[self.sqrt_q, 0.0, 0.0, self.sqrt_q])
        }
        fn cov_outputs_factor(&self) -> DMatrix<f64> {
            DMatrix::from_row_slice(1, 1, &[self.sqrt_r])
        }
        fn measured_output_series(&self) -> DMatrix<f64> {
            self.measurements.clone()
        }
        fn measured_outputs_at(&self, t: f64) -> Option<DVector<f64>> {
            for i in 0..self.measurements.nrows() {
                if (self.measurements[(i, 0)] - t).abs() < 1e-9 {
                    return Some(DVector::from_vec(vec![self.measurements[(i, 1)]]));
                }
            }
            None
        }
        fn set_state(&mut self, full_state: &DVector<f64>) {
            self.state = full_state[0];
        }
        fn set_observed_state(&mut self, observed: &DVector<f64>) {
            self.state = observed[0];
        }
        fn set_parameters(&mut self, parameters: &DVector<f64>) {
            self.parameter = parameters[0];
        }
        fn output_map(&self, sigma_point: &DVector<f64>, _u: &DVector<f64>, _t: f64, _flag: bool) -> DVector<f64> {
            DVector::from_vec(vec![sigma_point[0] * sigma_point[1]])
        }
    }

    /// Runs each task's `x' = x`, `b' = b`, `y = x*b` transition directly
    /// (no real simulator, but exercises the pool protocol and
    /// index-keyed reassembly described in the spec).
    struct RandomWalkPool;

    impl SimulatorPool for RandomWalkPool {
        fn run(&self, tasks: &[SigmaTask], _start: f64, _stop: f64) -> Result<Vec<SigmaOutcome>, Error> {
            Ok(tasks
                .iter()
                .map(|t| {
                    let x = t.state[0];
                    let b = t.parameters[0];
                    SigmaOutcome {
                        full_state: DVector::from_vec(vec![x]),
                        observed_state: DVector::from_vec(vec![x]),
                        parameters: DVector::from_vec(vec![b]),
                        outputs: DVector::from_vec(vec![x * b]),
                    }
                })
                .collect())
        }
    }

    #[test]
    fn forward_pass_drives_product_toward_measurement() {
        let mut model = RandomWalkModel::new(1.0, 1.2, 25, 2.0);
        let pool = RandomWalkPool;
        let ukf = UnscentedKalmanFilter::new(&model, &pool, false).unwrap();

        let trajectory = ukf.filter(&mut model).unwrap();
        let last = trajectory.x_hat.last().unwrap();
        assert_relative_eq!(last[0] * last[1], 2.0, epsilon = 0.2);
    }

    #[test]
    fn constraint_clipping_bounds_every_corrected_parameter() {
        let mut model = RandomWalkModel::new(1.0, 3.0, 10, 2.0);
        let pool = RandomWalkPool;
        let mut ukf = UnscentedKalmanFilter::new(&model, &pool, false).unwrap();
        ukf.constraints_mut().parameters.set_upper(0, 1.5);

        let trajectory = ukf.filter(&mut model).unwrap();
        for x_hat in &trajectory.x_hat {
            assert!(x_hat[1] <= 1.5 + 1e-9);
        }
    }

    #[test]
    fn smoother_does_not_increase_variance_for_most_interior_steps() {
        let mut model = RandomWalkModel::new(1.0, 1.2, 20, 2.0);
        let pool = RandomWalkPool;
        let ukf = UnscentedKalmanFilter::new(&model, &pool, false).unwrap();

        let filtered = ukf.filter(&mut model).unwrap();
        let sqrt_q = model.cov_process_noise_factor();
        let sqrt_r = model.cov_outputs_factor();
        let smoothed = ukf.smooth(&filtered, &sqrt_q, &sqrt_r).unwrap();

        let n = filtered.len();
        let mut ok = 0usize;
        for k in 1..n - 1 {
            let tr_filt: f64 = (&filtered.s[k] * filtered.s[k].transpose()).trace();
            let tr_smooth: f64 = (&smoothed.s[k] * smoothed.s[k].transpose()).trace();
            if tr_smooth <= tr_filt + 1e-6 {
                ok += 1;
            }
        }
        assert!(ok as f64 >= 0.9 * (n - 2) as f64);
    }

    #[test]
    fn dimension_mismatch_aborts_the_step() {
        let model = RandomWalkModel::new(1.0, 1.2, 5, 2.0);
        let pool = RandomWalkPool;
        let ukf = UnscentedKalmanFilter::new(&model, &pool, false).unwrap();
        let bad_factor = DMatrix::<f64>::identity(5, 5);
        let err = generate_sigma_points(
            &DVector::from_vec(vec![1.0]),
            &DVector::from_vec(vec![1.0]),
            &bad_factor,
            None,
            None,
            &ukf.weights,
            &ukf.constraints,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DimensionMismatch);
    }
}
