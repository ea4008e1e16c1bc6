use na::{DMatrix, DVector};
use nalgebra as na;

use crate::error::Error;

/// Extension point for a future "full augmented" state extraction that
/// would project the complete simulator state directly into
/// augmented-state space. The current release treats its input as already
/// augmented-shaped, matching the source's identity-returning branch.
#[inline]
fn aug_state_identity(x: &DMatrix<f64>) -> &DMatrix<f64> {
    x
}

/// The weighted mean `Wm^T * rows`, one entry per column of `rows`.
pub fn weighted_mean(rows: &DMatrix<f64>, wm: &DVector<f64>) -> DVector<f64> {
    let avg_row = wm.transpose() * rows;
    avg_row.transpose()
}

fn pad_square(small: &DMatrix<f64>, n: usize) -> DMatrix<f64> {
    if small.nrows() == n {
        return small.clone();
    }
    let mut out = DMatrix::<f64>::zeros(n, n);
    let k = small.nrows();
    for i in 0..k {
        for j in 0..k {
            out[(i, j)] = small[(i, j)];
        }
    }
    out
}

/// The critical stable primitive: a signed Cholesky rank-1 (per column)
/// update/downdate of the lower-triangular factor `l`. `sign = +1.0` is an
/// update, `sign = -1.0` a downdate. Operates on a private copy of `l`;
/// the caller's factor is untouched. A downdate that would produce a
/// negative squared diagonal entry is clamped to zero and a warning is
/// logged (see [`crate::ErrorKind::NonPositiveDefinite`]).
pub fn chol_update(l: &DMatrix<f64>, x: &DMatrix<f64>, sign: f64) -> DMatrix<f64> {
    let mut l = l.clone();
    let mut x = x.clone();
    let rows = l.nrows();

    for j in 0..x.ncols() {
        for k in 0..rows {
            let xk = x[(k, j)];
            let lkk = l[(k, k)];
            let rr_arg = lkk * lkk + sign * xk * xk;
            let rr = if rr_arg < 0.0 {
                #[cfg(feature = "std")]
                log::warn!(
                    "chol_update: downdate produced rr^2 = {} < 0 at row {}, clamped to 0",
                    rr_arg,
                    k
                );
                0.0
            } else {
                rr_arg.sqrt()
            };
            let c = rr / lkk;
            let s = xk / lkk;
            l[(k, k)] = rr;
            for row in (k + 1)..rows {
                let old_l = l[(row, k)];
                let old_x = x[(row, j)];
                let new_l = (old_l + sign * s * old_x) / c;
                l[(row, k)] = new_l;
                x[(row, j)] = c * old_x - s * new_l;
            }
        }
    }
    l
}

/// Build the weighted-deviation columns `eps_i = sign(Wc[i]) *
/// sqrt(|Wc[i]|) * (rows[i] - avg)` for `i = skip_first..n_points`, as an
/// `ncols x (n_points - skip_first)` matrix.
fn signed_deviations(rows: &DMatrix<f64>, avg: &DVector<f64>, wc: &DVector<f64>, skip_first: usize) -> DMatrix<f64> {
    let d = rows.ncols();
    let n_cols = rows.nrows() - skip_first;
    let mut out = DMatrix::<f64>::zeros(d, n_cols);
    for (col, i) in (skip_first..rows.nrows()).enumerate() {
        let weight = wc[i].abs().sqrt();
        let sign = if wc[i] < 0.0 { -1.0 } else { 1.0 };
        for j in 0..d {
            out[(j, col)] = sign * weight * (rows[(i, j)] - avg[j]);
        }
    }
    out
}

/// The square-root state update: QR-factorize the weighted deviations of
/// sigma points `1..2N` (augmented with `sqrt_q`), then fold sigma point 0
/// in via a signed Cholesky update. Returns the new lower-triangular
/// square-root factor.
pub fn compute_s(x_proj: &DMatrix<f64>, x_avg: &DVector<f64>, sqrt_q: &DMatrix<f64>, wc: &DVector<f64>) -> Result<DMatrix<f64>, Error> {
    let x_proj = aug_state_identity(x_proj);
    let n_aug = x_avg.len();
    let sqrt_q = pad_square(sqrt_q, n_aug);

    let deviations = signed_deviations(x_proj, x_avg, wc, 1);
    let mut a = DMatrix::<f64>::zeros(n_aug, deviations.ncols() + n_aug);
    a.columns_mut(0, deviations.ncols()).copy_from(&deviations);
    a.columns_mut(deviations.ncols(), n_aug).copy_from(&sqrt_q);

    let qr = na::linalg::QR::new(a.transpose());
    let r = qr.r();
    let mut l = r.transpose();

    let weight0 = wc[0].abs().sqrt();
    let sign0 = if wc[0] < 0.0 { -1.0 } else { 1.0 };
    let mut eps0 = DVector::<f64>::zeros(n_aug);
    for j in 0..n_aug {
        eps0[j] = sign0 * weight0 * (x_proj[(0, j)] - x_avg[j]);
    }
    let eps0_mat = DMatrix::from_column_slice(n_aug, 1, eps0.as_slice());

    l = chol_update(&l, &eps0_mat, sign0);
    Ok(l)
}

/// The square-root output update, analogous to [`compute_s`] but in
/// output space and without augmentation.
pub fn compute_sy(z_proj: &DMatrix<f64>, z_avg: &DVector<f64>, sqrt_r: &DMatrix<f64>, wc: &DVector<f64>) -> Result<DMatrix<f64>, Error> {
    compute_s(z_proj, z_avg, sqrt_r, wc)
}

/// `CovXZ = sum_i Wc[i] * (X_proj[i]-X_avg)^T * (Z_proj[i]-Z_avg)`.
pub fn cross_covariance(x_proj: &DMatrix<f64>, x_avg: &DVector<f64>, z_proj: &DMatrix<f64>, z_avg: &DVector<f64>, wc: &DVector<f64>) -> DMatrix<f64> {
    let x_proj = aug_state_identity(x_proj);
    let n_points = x_proj.nrows();
    let nx = x_proj.ncols();
    let nz = z_proj.ncols();
    let mut cov = DMatrix::<f64>::zeros(nx, nz);
    for i in 0..n_points {
        for a in 0..nx {
            let dx = x_proj[(i, a)] - x_avg[a];
            for b in 0..nz {
                let dz = z_proj[(i, b)] - z_avg[b];
                cov[(a, b)] += wc[i] * dx * dz;
            }
        }
    }
    cov
}

/// `Cxx = sum_i Wc[i] * (X_next[i]-X_next_avg)^T * (X_now[i]-X_now_avg)`,
/// used by the backward smoother. Averages of both operands are computed
/// internally.
pub fn state_state_cross_covariance(x_next: &DMatrix<f64>, x_now: &DMatrix<f64>, wm: &DVector<f64>, wc: &DVector<f64>) -> DMatrix<f64> {
    let next_avg = weighted_mean(x_next, wm);
    let now_avg = weighted_mean(x_now, wm);
    cross_covariance(x_next, &next_avg, x_now, &now_avg, wc)
}

/// Solve `factor * factor^T * gain^T = cross_cov^T` for `gain`, using the
/// Cholesky factorization of the symmetric `factor * factor^T` (the
/// square-root-filter analogue of the two triangular least-squares solves
/// in the source algorithm).
pub fn solve_gain(factor: &DMatrix<f64>, cross_cov: &DMatrix<f64>) -> Result<DMatrix<f64>, Error> {
    use crate::error::ErrorKind;

    let m = factor * factor.transpose();
    let chol = na::linalg::Cholesky::new(m).ok_or(ErrorKind::NonPositiveDefinite)?;
    let gain_t = chol.solve(&cross_cov.transpose());
    Ok(gain_t.transpose())
}
