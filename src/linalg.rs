//! Dense linear-algebra helpers bridging ndarray (array API used throughout
//! the crate) and faer (factorizations). Everything here is small and dense;
//! the matrices involved are Gram matrices of active sets, k x k constraint
//! products and KKT systems.

use faer::linalg::solvers::{Lblt as FaerLblt, Ldlt as FaerLdlt, Llt as FaerLlt, Solve};
use faer::{Mat, MatRef, Side};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use thiserror::Error;

/// Relative residual above which an LBLT solve of a KKT system is treated as
/// singular. The KKT matrices here are tiny, so anything materially above
/// machine precision means a degenerate active set.
const KKT_RESIDUAL_TOL: f64 = 1e-8;

const POWER_ITERATIONS: usize = 64;

#[derive(Debug, Error)]
pub enum LinalgError {
    #[error("symmetric factorization failed; matrix is not positive (semi-)definite")]
    NotPositiveDefinite,
    #[error("KKT system is singular (relative residual {residual:.3e})")]
    SingularKkt { residual: f64 },
    #[error("solve produced non-finite values")]
    NonFinite,
}

pub fn mat_from_ndarray(a: ArrayView2<f64>) -> Mat<f64> {
    Mat::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

pub fn col_from_ndarray(v: ArrayView1<f64>) -> Mat<f64> {
    Mat::from_fn(v.len(), 1, |i, _| v[i])
}

pub fn col_to_ndarray(m: MatRef<'_, f64>) -> Array1<f64> {
    Array1::from_shape_fn(m.nrows(), |i| m[(i, 0)])
}

pub fn mat_to_ndarray(m: MatRef<'_, f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

/// Symmetric positive (semi-)definite factor with an LLT first attempt and an
/// LDLT fallback for matrices that are only just definite.
pub enum SpdFactor {
    Llt(FaerLlt<f64>),
    Ldlt(FaerLdlt<f64>),
}

impl SpdFactor {
    pub fn new(matrix: &Array2<f64>) -> Result<Self, LinalgError> {
        let m = mat_from_ndarray(matrix.view());
        if let Ok(llt) = FaerLlt::new(m.as_ref(), Side::Lower) {
            return Ok(SpdFactor::Llt(llt));
        }
        let ldlt = FaerLdlt::new(m.as_ref(), Side::Lower)
            .map_err(|_| LinalgError::NotPositiveDefinite)?;
        Ok(SpdFactor::Ldlt(ldlt))
    }

    pub fn solve_mat(&self, rhs: MatRef<'_, f64>) -> Mat<f64> {
        match self {
            SpdFactor::Llt(f) => f.solve(rhs),
            SpdFactor::Ldlt(f) => f.solve(rhs),
        }
    }

    pub fn solve_vec(&self, rhs: &Array1<f64>) -> Result<Array1<f64>, LinalgError> {
        let out = col_to_ndarray(
            self.solve_mat(col_from_ndarray(rhs.view()).as_ref())
                .as_ref(),
        );
        if out.iter().all(|v| v.is_finite()) {
            Ok(out)
        } else {
            Err(LinalgError::NonFinite)
        }
    }

    pub fn solve_array(&self, rhs: &Array2<f64>) -> Result<Array2<f64>, LinalgError> {
        let out = mat_to_ndarray(
            self.solve_mat(mat_from_ndarray(rhs.view()).as_ref())
                .as_ref(),
        );
        if out.iter().all(|v| v.is_finite()) {
            Ok(out)
        } else {
            Err(LinalgError::NonFinite)
        }
    }
}

/// Solve a symmetric indefinite system (typically a KKT saddle matrix) with a
/// Bunch-Kaufman factorization, rejecting solves whose residual reveals a
/// singular system.
pub fn solve_symmetric_indefinite(
    matrix: &Array2<f64>,
    rhs: &Array1<f64>,
) -> Result<Array1<f64>, LinalgError> {
    let m = mat_from_ndarray(matrix.view());
    let factor = FaerLblt::new(m.as_ref(), Side::Lower);
    let x = col_to_ndarray(factor.solve(col_from_ndarray(rhs.view()).as_ref()).as_ref());
    if !x.iter().all(|v| v.is_finite()) {
        return Err(LinalgError::NonFinite);
    }
    let residual = (&matrix.dot(&x) - rhs)
        .iter()
        .map(|v| v.abs())
        .fold(0.0, f64::max);
    let rhs_scale = rhs.iter().map(|v| v.abs()).fold(1.0, f64::max);
    let x_scale = x.iter().map(|v| v.abs()).fold(0.0, f64::max);
    // A near-singular factorization shows up either as an exploding solution
    // or as a residual far above round-off.
    if x_scale > 1e12 * rhs_scale {
        return Err(LinalgError::SingularKkt {
            residual: x_scale / rhs_scale,
        });
    }
    let rel = residual / (rhs_scale + x_scale);
    if rel > KKT_RESIDUAL_TOL {
        return Err(LinalgError::SingularKkt { residual: rel });
    }
    Ok(x)
}

/// Euclidean projector onto the null space of C: P = I - C^T (C C^T)^-1 C.
/// Fails when C is rank deficient, which would make the constrained problem
/// ill-posed.
pub fn nullspace_projector(c: ArrayView2<f64>) -> Result<Array2<f64>, LinalgError> {
    let d = c.ncols();
    let cct = c.dot(&c.t());
    let factor = SpdFactor::new(&cct)?;
    // S = (C C^T)^-1 C, solved row block at once.
    let s = factor.solve_array(&c.to_owned())?;
    let mut p = Array2::eye(d);
    let correction = c.t().dot(&s);
    p -= &correction;
    Ok(p)
}

/// Largest squared singular value of X, estimated by power iteration on
/// X^T X. Deterministic start vector; the estimate is inflated slightly so
/// step sizes derived from it stay conservative.
pub fn spectral_norm_sq(x: ArrayView2<f64>) -> f64 {
    let d = x.ncols();
    if d == 0 || x.nrows() == 0 {
        return 0.0;
    }
    let mut v = Array1::from_elem(d, 1.0 / (d as f64).sqrt());
    let mut lambda = 0.0f64;
    for _ in 0..POWER_ITERATIONS {
        let w = x.t().dot(&x.dot(&v));
        let norm = w.dot(&w).sqrt();
        if norm <= f64::MIN_POSITIVE {
            return 0.0;
        }
        lambda = v.dot(&w);
        v = w / norm;
    }
    lambda.abs() * 1.01
}

/// Chebyshev (l-infinity) centering of v against the row space of C:
/// argmin over nu of max_j |v_j - (C^T nu)_j|.
///
/// This is the dual problem that fixes the multiplier at the top of the
/// homotopy, before any coefficient is active. For a single constraint row it
/// reduces to a one-dimensional convex piecewise-linear minimization; for
/// several rows we refine a least-squares center by Polyak subgradient steps.
pub fn chebyshev_center(
    v: &Array1<f64>,
    c: ArrayView2<f64>,
) -> Result<(Array1<f64>, f64), LinalgError> {
    let k = c.nrows();
    if k == 1 {
        let row = c.row(0);
        let objective = |t: f64| -> f64 {
            v.iter()
                .zip(row.iter())
                .map(|(vj, cj)| (vj - t * cj).abs())
                .fold(0.0, f64::max)
        };
        let scale_c = row.iter().map(|x| x.abs()).fold(0.0, f64::max);
        if scale_c <= f64::MIN_POSITIVE {
            let val = v.iter().map(|x| x.abs()).fold(0.0, f64::max);
            return Ok((Array1::zeros(1), val));
        }
        let scale_v = v.iter().map(|x| x.abs()).fold(0.0, f64::max);
        let mut lo = -2.0 * scale_v / scale_c - 1.0;
        let mut hi = 2.0 * scale_v / scale_c + 1.0;
        // Golden-section on a convex objective; 200 shrinks reach machine
        // precision on any practical bracket.
        let inv_phi = 0.618_033_988_749_894_9;
        let mut m1 = hi - inv_phi * (hi - lo);
        let mut m2 = lo + inv_phi * (hi - lo);
        let mut f1 = objective(m1);
        let mut f2 = objective(m2);
        for _ in 0..200 {
            if f1 <= f2 {
                hi = m2;
                m2 = m1;
                f2 = f1;
                m1 = hi - inv_phi * (hi - lo);
                f1 = objective(m1);
            } else {
                lo = m1;
                m1 = m2;
                f1 = f2;
                m2 = lo + inv_phi * (hi - lo);
                f2 = objective(m2);
            }
        }
        let t = 0.5 * (lo + hi);
        return Ok((Array1::from_elem(1, t), objective(t)));
    }

    // Least-squares center, then Polyak subgradient refinement.
    let cct = c.dot(&c.t());
    let factor = SpdFactor::new(&cct)?;
    let mut nu = factor.solve_vec(&c.dot(v))?;
    let eval = |nu: &Array1<f64>| -> (f64, usize) {
        let r = v - &c.t().dot(nu);
        let mut best = 0.0;
        let mut arg = 0;
        for (j, x) in r.iter().enumerate() {
            if x.abs() > best {
                best = x.abs();
                arg = j;
            }
        }
        (best, arg)
    };
    let (mut f_best, _) = eval(&nu);
    let mut nu_best = nu.clone();
    for it in 0..400 {
        let (f, j) = eval(&nu);
        if f < f_best {
            f_best = f;
            nu_best = nu.clone();
        }
        let r_j = v[j] - c.column(j).dot(&nu);
        let g = c.column(j).mapv(|x| -x * r_j.signum());
        let gnorm2 = g.dot(&g);
        if gnorm2 <= f64::MIN_POSITIVE {
            break;
        }
        let target = f_best * (1.0 - 1e-3 / (1.0 + it as f64 * 0.01));
        let step = (f - target).max(0.0) / gnorm2;
        nu = &nu - &(g * step);
    }
    Ok((nu_best, f_best))
}

pub fn soft_threshold(v: &Array1<f64>, threshold: f64) -> Array1<f64> {
    v.mapv(|x| x.signum() * (x.abs() - threshold).max(0.0))
}

/// Per-coordinate soft threshold with heterogeneous thresholds.
pub fn soft_threshold_weighted(v: &Array1<f64>, thresholds: &Array1<f64>) -> Array1<f64> {
    let mut out = v.clone();
    for (x, t) in out.iter_mut().zip(thresholds.iter()) {
        *x = x.signum() * (x.abs() - t).max(0.0);
    }
    out
}
