use na::{DVector};
use nalgebra as na;

use crate::error::{Error, ErrorKind};

/// Holds the UKF scaling hyperparameters (`alpha`, `beta`, `kappa`, the
/// derived `lambda` and `sqrt_c`) together with the mean and covariance
/// weight vectors `Wm`/`Wc` for a fixed sigma-point count `N`.
///
/// `N` is fixed at construction: it is `n_obs + n_pars` for the
/// non-augmented sigma-point scheme, or `2*(n_obs+n_pars) + n_outputs` for
/// the augmented scheme. Changing `alpha`/`beta`/`kappa` recomputes
/// `lambda`, `sqrt_c`, `Wm` and `Wc` atomically; `N` itself never changes
/// after construction.
#[derive(Debug, Clone)]
pub struct WeightTable {
    n: usize,
    alpha: f64,
    beta: f64,
    kappa: f64,
    lambda: f64,
    sqrt_c: f64,
    wm: DVector<f64>,
    wc: DVector<f64>,
}

impl WeightTable {
    /// Build a weight table for `n` sigma-point dimensions using the
    /// conventional defaults `alpha = 1/sqrt(3)`, `beta = 2`,
    /// `kappa = 3 - n`.
    pub fn new(n: usize) -> Result<Self, Error> {
        let default_kappa = 3.0 - n as f64;
        Self::with_params(n, 1.0 / 3f64.sqrt(), 2.0, default_kappa)
    }

    /// Build a weight table for `n` sigma-point dimensions with explicit
    /// `alpha`, `beta`, `kappa`.
    pub fn with_params(n: usize, alpha: f64, beta: f64, kappa: f64) -> Result<Self, Error> {
        let mut table = WeightTable {
            n,
            alpha,
            beta,
            kappa,
            lambda: 0.0,
            sqrt_c: 0.0,
            wm: DVector::zeros(1 + 2 * n),
            wc: DVector::zeros(1 + 2 * n),
        };
        table.recompute()?;
        Ok(table)
    }

    /// Change `alpha`, `beta`, `kappa` and recompute `lambda`, `sqrt_c`,
    /// `Wm` and `Wc` atomically. On error, the previous weights are left
    /// untouched.
    pub fn set_params(&mut self, alpha: f64, beta: f64, kappa: f64) -> Result<(), Error> {
        let previous = self.clone();
        self.alpha = alpha;
        self.beta = beta;
        self.kappa = kappa;
        if let Err(e) = self.recompute() {
            *self = previous;
            return Err(e);
        }
        Ok(())
    }

    fn recompute(&mut self) -> Result<(), Error> {
        if !(self.alpha > 0.0) {
            return Err(ErrorKind::InvalidUkfParameter.into());
        }
        let n = self.n as f64;
        if !(n + self.kappa > 0.0) {
            return Err(ErrorKind::InvalidUkfParameter.into());
        }
        let lambda = self.alpha * self.alpha * (n + self.kappa) - n;
        if !(n + lambda > 0.0) {
            return Err(ErrorKind::InvalidUkfParameter.into());
        }
        let sqrt_c = self.alpha * (n + self.kappa).sqrt();

        let mut wm = DVector::zeros(1 + 2 * self.n);
        let mut wc = DVector::zeros(1 + 2 * self.n);
        wm[0] = lambda / (n + lambda);
        wc[0] = lambda / (n + lambda) + (1.0 - self.alpha * self.alpha + self.beta);
        for i in 0..2 * self.n {
            let w = 1.0 / (2.0 * (n + lambda));
            wm[i + 1] = w;
            wc[i + 1] = w;
        }

        self.lambda = lambda;
        self.sqrt_c = sqrt_c;
        self.wm = wm;
        self.wc = wc;
        Ok(())
    }

    /// The fixed sigma-point dimension `N`.
    #[inline]
    pub fn n(&self) -> usize {
        self.n
    }

    /// The spread factor `sqrt(c) = alpha * sqrt(N + kappa)` used to scale
    /// the rows of the square-root covariance factor when drawing sigma
    /// points.
    #[inline]
    pub fn sqrt_c(&self) -> f64 {
        self.sqrt_c
    }

    #[inline]
    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    #[inline]
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    #[inline]
    pub fn beta(&self) -> f64 {
        self.beta
    }

    #[inline]
    pub fn kappa(&self) -> f64 {
        self.kappa
    }

    /// The mean and covariance weight vectors `(Wm, Wc)`, each of length
    /// `1 + 2N`. `Wc[0]` may be negative.
    #[inline]
    pub fn weights(&self) -> (&DVector<f64>, &DVector<f64>) {
        (&self.wm, &self.wc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn defaults_match_spec_formulas() {
        let n = 3usize;
        let table = WeightTable::new(n).unwrap();
        let alpha = 1.0 / 3f64.sqrt();
        let kappa = 3.0 - n as f64;
        let lambda = alpha * alpha * (n as f64 + kappa) - n as f64;
        assert_relative_eq!(table.lambda(), lambda, epsilon = 1e-12);
        assert_relative_eq!(table.sqrt_c(), alpha * (n as f64 + kappa).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn mean_weights_sum_to_one() {
        let table = WeightTable::new(4).unwrap();
        let (wm, _wc) = table.weights();
        assert_relative_eq!(wm.sum(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn non_positive_alpha_is_rejected() {
        assert_eq!(
            WeightTable::with_params(2, 0.0, 2.0, 1.0).unwrap_err().kind(),
            ErrorKind::InvalidUkfParameter
        );
        assert_eq!(
            WeightTable::with_params(2, -1.0, 2.0, 1.0).unwrap_err().kind(),
            ErrorKind::InvalidUkfParameter
        );
    }

    #[test]
    fn non_positive_n_plus_kappa_is_rejected() {
        assert_eq!(
            WeightTable::with_params(2, 1.0, 2.0, -2.0).unwrap_err().kind(),
            ErrorKind::InvalidUkfParameter
        );
    }

    #[test]
    fn set_params_recomputes_atomically_and_leaves_state_on_error() {
        let mut table = WeightTable::new(2).unwrap();
        let before = table.clone();
        assert!(table.set_params(-1.0, 2.0, 1.0).is_err());
        assert_relative_eq!(table.lambda(), before.lambda(), epsilon = 1e-12);
        assert!(table.set_params(0.5, 2.0, 1.0).is_ok());
        assert_ne!(table.lambda(), before.lambda());
    }
}
