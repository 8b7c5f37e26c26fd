//! Primal-dual splitting solvers.
//!
//! `p_pds` handles the constraint with an explicit Euclidean projector onto
//! the null space of C (three-operator splitting between the projector, the
//! smooth loss gradient and the l1 prox). `pf_pds` is projection free: it
//! carries a dual variable for the constraint instead of a projector, which
//! avoids the k x k inversion but only drives C beta to zero asymptotically.

use ndarray::{Array1, Array2};

use super::{SolveOutcome, SolveStatus, CONVERGENCE_TOL, MAX_ITERATIONS};
use crate::dataset::Dataset;
use crate::error::LassoError;
use crate::linalg::{nullspace_projector, soft_threshold, spectral_norm_sq};
use crate::losses::{hinge_deriv, huber_deriv};

/// Tolerance on ||C beta||_inf for declaring the projection-free iterate
/// feasible; its iterates only satisfy the constraint in the limit.
const PF_FEASIBILITY_TOL: f64 = 1e-9;

enum LossKind {
    Ls,
    Huber { rho: f64 },
    /// Huberized squared hinge on margins y_i * x_i' beta; `rho` is
    /// -infinity for the plain squared hinge.
    Hinge { rho: f64 },
}

/// The smooth part of a formulation: its gradient and a Lipschitz bound for
/// step-size selection. Borrowed views keep the solver loops allocation-light.
pub struct SmoothLoss<'a> {
    x: &'a Array2<f64>,
    y: &'a Array1<f64>,
    kind: LossKind,
}

impl<'a> SmoothLoss<'a> {
    pub fn ls(ds: &'a Dataset) -> Self {
        SmoothLoss {
            x: ds.x(),
            y: ds.y(),
            kind: LossKind::Ls,
        }
    }

    pub fn huber(ds: &'a Dataset, rho: f64) -> Self {
        SmoothLoss {
            x: ds.x(),
            y: ds.y(),
            kind: LossKind::Huber { rho },
        }
    }

    pub fn hinge(ds: &'a Dataset, rho: f64) -> Self {
        SmoothLoss {
            x: ds.x(),
            y: ds.y(),
            kind: LossKind::Hinge { rho },
        }
    }

    fn grad(&self, beta: &Array1<f64>) -> Array1<f64> {
        let preds = self.x.dot(beta);
        match self.kind {
            LossKind::Ls => {
                let r = &preds - self.y;
                2.0 * self.x.t().dot(&r)
            }
            LossKind::Huber { rho } => {
                let g: Array1<f64> = preds
                    .iter()
                    .zip(self.y.iter())
                    .map(|(p, y)| huber_deriv(p - y, rho))
                    .collect();
                self.x.t().dot(&g)
            }
            LossKind::Hinge { rho } => {
                // d/d beta sum_i l(y_i x_i' beta) = X' (y .* l'(m)).
                let g: Array1<f64> = preds
                    .iter()
                    .zip(self.y.iter())
                    .map(|(p, y)| y * hinge_deriv(y * p, rho))
                    .collect();
                self.x.t().dot(&g)
            }
        }
    }

    /// Bound on the gradient Lipschitz constant. Every variant has curvature
    /// at most 2 per sample, so 2 ||X||^2 covers all of them.
    fn lipschitz(&self) -> f64 {
        2.0 * spectral_norm_sq(self.x.view()).max(f64::MIN_POSITIVE)
    }
}

fn max_abs(v: &Array1<f64>) -> f64 {
    v.iter().map(|x| x.abs()).fold(0.0, f64::max)
}

/// Projected primal-dual splitting. Each iterate passed to the smooth/prox
/// steps is exactly feasible, so the returned coefficient satisfies the
/// constraint to factorization accuracy regardless of convergence status.
pub fn p_pds(
    ds: &Dataset,
    loss: SmoothLoss<'_>,
    lam_abs: f64,
    warm: Option<&Array1<f64>>,
) -> Result<SolveOutcome, LassoError> {
    let p = nullspace_projector(ds.c().view()).map_err(LassoError::SingularConstraint)?;
    let gamma = 1.0 / loss.lipschitz();
    let threshold = gamma * lam_abs;

    let mut z = warm.cloned().unwrap_or_else(|| Array1::zeros(ds.d()));
    let mut xb = p.dot(&z);
    let mut residual = f64::INFINITY;
    for it in 1..=MAX_ITERATIONS {
        let grad = loss.grad(&xb);
        let xa = soft_threshold(&(2.0 * &xb - &z - gamma * &grad), threshold);
        let step = &xa - &xb;
        residual = max_abs(&step);
        z += &step;
        xb = p.dot(&z);
        if residual <= CONVERGENCE_TOL * (1.0 + max_abs(&xb)) {
            return Ok(SolveOutcome {
                beta: xb,
                sigma: None,
                status: SolveStatus::Converged,
                iterations: it,
                residual,
            });
        }
    }
    log::debug!("P-PDS reached {MAX_ITERATIONS} iterations (residual {residual:.3e})");
    Ok(SolveOutcome {
        beta: xb,
        sigma: None,
        status: SolveStatus::MaxIterationsReached,
        iterations: MAX_ITERATIONS,
        residual,
    })
}

/// Projection-free primal-dual splitting (forward-backward on the primal,
/// ascent on a dual variable for C beta = 0). Convergence requires both a
/// small iterate change and near-feasibility, since the dual variable closes
/// the constraint gap only in the limit.
pub fn pf_pds(
    ds: &Dataset,
    loss: SmoothLoss<'_>,
    lam_abs: f64,
    warm: Option<&Array1<f64>>,
) -> Result<SolveOutcome, LassoError> {
    let l = loss.lipschitz();
    let c_norm_sq = spectral_norm_sq(ds.c().view()).max(f64::MIN_POSITIVE);
    let sigma_d = 1.0;
    let tau = 0.9 / (l / 2.0 + sigma_d * c_norm_sq);
    let ct = ds.c().t().to_owned();

    let mut beta = warm.cloned().unwrap_or_else(|| Array1::zeros(ds.d()));
    let mut u = Array1::zeros(ds.k());
    let mut residual = f64::INFINITY;
    for it in 1..=MAX_ITERATIONS {
        let grad = loss.grad(&beta) + ct.dot(&u);
        let beta_next = soft_threshold(&(&beta - &(tau * &grad)), tau * lam_abs);
        u += &(sigma_d * &ds.c().dot(&(2.0 * &beta_next - &beta)));
        residual = max_abs(&(&beta_next - &beta));
        beta = beta_next;
        let scale = 1.0 + max_abs(&beta);
        if residual <= CONVERGENCE_TOL * scale
            && max_abs(&ds.c().dot(&beta)) <= PF_FEASIBILITY_TOL * scale
        {
            return Ok(SolveOutcome {
                beta,
                sigma: None,
                status: SolveStatus::Converged,
                iterations: it,
                residual,
            });
        }
    }
    log::debug!("PF-PDS reached {MAX_ITERATIONS} iterations (residual {residual:.3e})");
    Ok(SolveOutcome {
        beta,
        sigma: None,
        status: SolveStatus::MaxIterationsReached,
        iterations: MAX_ITERATIONS,
        residual,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2, Array2};

    fn toy() -> Dataset {
        let x = arr2(&[
            [1.0, 0.0, 0.5],
            [0.0, 1.0, -0.5],
            [1.0, 1.0, 0.0],
            [0.5, -1.0, 1.0],
        ]);
        let y = arr1(&[1.0, -1.0, 0.3, 0.8]);
        Dataset::with_zero_sum(x, y).unwrap()
    }

    #[test]
    fn p_pds_iterates_stay_feasible() {
        let ds = toy();
        let out = p_pds(&ds, SmoothLoss::ls(&ds), 0.4, None).unwrap();
        assert_eq!(out.status, SolveStatus::Converged);
        let sum: f64 = out.beta.iter().sum();
        assert!(sum.abs() < 1e-8);
    }

    #[test]
    fn pf_pds_reaches_feasibility() {
        let ds = toy();
        let out = pf_pds(&ds, SmoothLoss::ls(&ds), 0.4, None).unwrap();
        assert_eq!(out.status, SolveStatus::Converged);
        let sum: f64 = out.beta.iter().sum();
        assert!(sum.abs() < 1e-6);
    }

    #[test]
    fn the_two_splittings_agree() {
        let ds = toy();
        let a = p_pds(&ds, SmoothLoss::ls(&ds), 0.4, None).unwrap();
        let b = pf_pds(&ds, SmoothLoss::ls(&ds), 0.4, None).unwrap();
        for (x, y) in a.beta.iter().zip(b.beta.iter()) {
            assert!((x - y).abs() < 1e-4);
        }
    }

    #[test]
    fn large_lambda_zeroes_everything() {
        let ds = toy();
        let big = 1e3;
        let out = p_pds(&ds, SmoothLoss::ls(&ds), big, None).unwrap();
        assert!(out.beta.iter().all(|v| v.abs() < 1e-8));
    }

    #[test]
    fn huber_gradient_matches_ls_inside_threshold() {
        let ds = toy();
        let beta = arr1(&[0.01, -0.01, 0.0]);
        let g_ls = SmoothLoss::ls(&ds).grad(&beta);
        let g_h = SmoothLoss::huber(&ds, 100.0).grad(&beta);
        for (a, b) in g_ls.iter().zip(g_h.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn hinge_gradient_vanishes_on_satisfied_margins() {
        let x: Array2<f64> = arr2(&[[1.0, -1.0], [-1.0, 1.0]]);
        let y = arr1(&[1.0, -1.0]);
        let ds = Dataset::with_zero_sum(x, y).unwrap();
        // margins are y_i x_i' beta = 2 for both rows.
        let beta = arr1(&[1.0, -1.0]);
        let g = SmoothLoss::hinge(&ds, f64::NEG_INFINITY).grad(&beta);
        assert!(g.iter().all(|v| v.abs() < 1e-12));
    }
}
