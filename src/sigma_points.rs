use na::{DMatrix, DVector};
use nalgebra as na;

use crate::constraints::ConstraintTable;
use crate::error::{Error, ErrorKind};
use crate::weights::WeightTable;

/// Stack `blocks` along the diagonal into one square matrix, with zeros
/// everywhere off the block diagonal. Used to assemble the augmented
/// `sqrt(P)`/`sqrt(Q)`/`sqrt(R)` composite factor.
fn block_diagonal(blocks: &[&DMatrix<f64>]) -> DMatrix<f64> {
    let n: usize = blocks.iter().map(|b| b.nrows()).sum();
    let mut out = DMatrix::<f64>::zeros(n, n);
    let mut offset = 0;
    for block in blocks {
        let k = block.nrows();
        out.slice_mut((offset, offset), (k, k)).copy_from(block);
        offset += k;
    }
    out
}

/// Build the `(1+2N) x D` sigma-point matrix from an observed-state slice
/// `x`, a parameter slice `p`, and the square-root factor `sqrt_p`.
///
/// In non-augmented mode (`sqrt_q`/`sqrt_r` both `None`), `N = D =
/// n_obs+n_pars`. In augmented mode (both supplied), the effective factor
/// is the block-diagonal composite of `sqrt_p`, `sqrt_q`, `sqrt_r`, and
/// `D = 2*(n_obs+n_pars) + n_outputs`.
///
/// Returns `Err(DimensionMismatch)` on any shape mismatch between `x`,
/// `p`, `sqrt_p` and `weights.n()`. On that error the caller must abort
/// the step; no partial matrix is returned.
pub fn generate_sigma_points(
    x: &DVector<f64>,
    p: &DVector<f64>,
    sqrt_p: &DMatrix<f64>,
    sqrt_q: Option<&DMatrix<f64>>,
    sqrt_r: Option<&DMatrix<f64>>,
    weights: &WeightTable,
    constraints: &ConstraintTable,
) -> Result<DMatrix<f64>, Error> {
    let n_obs = x.len();
    let n_pars = p.len();
    let n_state_pars = n_obs + n_pars;

    let augmented = sqrt_q.is_some() || sqrt_r.is_some();
    let (effective_sqrt_p, d) = if augmented {
        let sqrt_q = sqrt_q.ok_or(ErrorKind::DimensionMismatch)?;
        let sqrt_r = sqrt_r.ok_or(ErrorKind::DimensionMismatch)?;
        if sqrt_p.nrows() != n_state_pars || sqrt_p.ncols() != n_state_pars {
            return Err(ErrorKind::DimensionMismatch.into());
        }
        if sqrt_q.nrows() != n_state_pars || sqrt_q.ncols() != n_state_pars {
            return Err(ErrorKind::DimensionMismatch.into());
        }
        let n_outputs = sqrt_r.nrows();
        if sqrt_r.ncols() != n_outputs {
            return Err(ErrorKind::DimensionMismatch.into());
        }
        let composite = block_diagonal(&[sqrt_p, sqrt_q, sqrt_r]);
        let d = 2 * n_state_pars + n_outputs;
        (composite, d)
    } else {
        if sqrt_p.nrows() != n_state_pars || sqrt_p.ncols() != n_state_pars {
            return Err(ErrorKind::DimensionMismatch.into());
        }
        (sqrt_p.clone(), n_state_pars)
    };

    let n = weights.n();
    if effective_sqrt_p.nrows() != n {
        return Err(ErrorKind::DimensionMismatch.into());
    }

    let mut row0 = DVector::<f64>::zeros(d);
    row0.rows_mut(0, n_obs).copy_from(x);
    row0.rows_mut(n_obs, n_pars).copy_from(p);
    // remaining (noise) slots of row0 stay zero in augmented mode.

    let mut xs = DMatrix::<f64>::zeros(1 + 2 * n, d);
    for j in 0..d {
        xs[(0, j)] = row0[j];
    }

    let sqrt_c = weights.sqrt_c();
    for i in 0..n {
        let f_i = effective_sqrt_p.row(i);

        let mut plus = row0.clone();
        let mut minus = row0.clone();
        for j in 0..d {
            plus[j] += sqrt_c * f_i[j];
            minus[j] -= sqrt_c * f_i[j];
        }

        constraints.clip_row(plus.as_mut_slice());
        constraints.clip_row(minus.as_mut_slice());

        for j in 0..d {
            xs[(1 + i, j)] = plus[j];
            xs[(1 + n + i, j)] = minus[j];
        }
    }

    Ok(xs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn identity_weights(n: usize) -> WeightTable {
        WeightTable::new(n).unwrap()
    }

    #[test]
    fn recentering_recovers_the_mean() {
        let n_obs = 2;
        let n_pars = 1;
        let weights = identity_weights(n_obs + n_pars);
        let constraints = ConstraintTable::unconstrained(n_obs, n_pars);
        let x = DVector::from_vec(vec![1.0, 2.0]);
        let p = DVector::from_vec(vec![0.5]);
        let sqrt_p = DMatrix::<f64>::identity(3, 3) * 0.1;

        let xs = generate_sigma_points(&x, &p, &sqrt_p, None, None, &weights, &constraints).unwrap();
        let (wm, _wc) = weights.weights();
        let avg = wm.transpose() * &xs;
        assert_relative_eq!(avg[(0, 0)], 1.0, epsilon = 1e-9);
        assert_relative_eq!(avg[(0, 1)], 2.0, epsilon = 1e-9);
        assert_relative_eq!(avg[(0, 2)], 0.5, epsilon = 1e-9);
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let n_obs = 2;
        let n_pars = 1;
        let weights = identity_weights(n_obs + n_pars);
        let constraints = ConstraintTable::unconstrained(n_obs, n_pars);
        let x = DVector::from_vec(vec![1.0]); // wrong length
        let p = DVector::from_vec(vec![0.5]);
        let sqrt_p = DMatrix::<f64>::identity(3, 3);
        let err = generate_sigma_points(&x, &p, &sqrt_p, None, None, &weights, &constraints).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DimensionMismatch);
    }

    #[test]
    fn constraints_are_applied_to_every_row() {
        let n_obs = 1;
        let n_pars = 0;
        let weights = identity_weights(n_obs + n_pars);
        let mut constraints = ConstraintTable::unconstrained(n_obs, n_pars);
        constraints.states.set_upper(0, 1.0);
        let x = DVector::from_vec(vec![0.5]);
        let p = DVector::<f64>::zeros(0);
        let sqrt_p = DMatrix::from_vec(1, 1, vec![10.0]);

        let xs = generate_sigma_points(&x, &p, &sqrt_p, None, None, &weights, &constraints).unwrap();
        for i in 0..xs.nrows() {
            assert!(xs[(i, 0)] <= 1.0);
        }
    }

    #[test]
    fn augmented_mode_produces_block_diagonal_dimension() {
        let n_obs = 1;
        let n_pars = 0;
        let n_outputs = 1;
        let weights = identity_weights(2 * (n_obs + n_pars) + n_outputs);
        let constraints = ConstraintTable::unconstrained(n_obs, n_pars);
        let x = DVector::from_vec(vec![1.0]);
        let p = DVector::<f64>::zeros(0);
        let sqrt_p = DMatrix::from_vec(1, 1, vec![0.1]);
        let sqrt_q = DMatrix::from_vec(1, 1, vec![0.2]);
        let sqrt_r = DMatrix::from_vec(1, 1, vec![0.3]);

        let xs = generate_sigma_points(&x, &p, &sqrt_p, Some(&sqrt_q), Some(&sqrt_r), &weights, &constraints).unwrap();
        assert_eq!(xs.ncols(), 3);
        assert_eq!(xs.nrows(), 1 + 2 * 3);
    }
}
