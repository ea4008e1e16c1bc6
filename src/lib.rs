//! A square-root Unscented Kalman Filter with Rauch-Tung-Striebel backward
//! smoothing, for joint state-and-parameter estimation of a nonlinear,
//! discrete-time system treated as a black-box simulator.
//!
//! Characteristics:
//! - Uses the [nalgebra](https://nalgebra.org) crate for math.
//! - Supports `no_std` (plus `alloc`, pulled in transitively by nalgebra's
//!   dynamically-sized matrices) to facilitate running the numerics on
//!   embedded targets; the simulator pool and filter/smoother driver
//!   themselves require `std`.
//! - Propagates the square root of the state covariance (QR plus signed
//!   Cholesky rank-1 updates) instead of the covariance itself, for
//!   numerical stability under roundoff and negative sigma-point weights.
//! - The simulator (state transition, output map, noise factors,
//!   measurement series) is a caller-supplied [`Model`]; per-time-step
//!   sigma-point evaluations fan out through a caller-supplied
//!   [`SimulatorPool`]. A reference rayon-backed pool is provided behind
//!   the `rayon-pool` feature.
//! - Strong typing used to keep observed-state, parameter and output
//!   dimensions explicit; mismatches are reported as
//!   [`ErrorKind::DimensionMismatch`] rather than panicking.

#![cfg_attr(not(feature = "std"), no_std)]
#![allow(non_snake_case)]

extern crate alloc;

mod constraints;
mod error;
mod filter;
mod model;
mod moments;
mod propagate;
#[cfg(feature = "rayon-pool")]
mod rayon_pool;
mod sigma_points;
mod weights;

pub use constraints::{Bound, ConstraintSet, ConstraintTable};
pub use error::{Error, ErrorKind};
pub use filter::{StepOutcome, Trajectory, UnscentedKalmanFilter, OUTPUT_PROJECTION_EPSILON};
pub use model::{Model, SigmaOutcome, SigmaTask, SimulatorPool};
pub use moments::{chol_update, compute_s, compute_sy, cross_covariance, solve_gain, state_state_cross_covariance, weighted_mean};
pub use propagate::propagate_sigma_points;
#[cfg(feature = "rayon-pool")]
pub use rayon_pool::{RayonSimulatorPool, SigmaTaskRunner};
pub use sigma_points::generate_sigma_points;
pub use weights::WeightTable;
