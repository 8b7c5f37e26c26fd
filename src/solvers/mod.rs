//! The four fixed-lambda algorithms and their shared plumbing.
//!
//! Every solver consumes an absolute (non-normalized) lambda and produces its
//! best iterate together with convergence diagnostics. Hitting the iteration
//! cap is reported through `SolveStatus`, never as an error; the caller owns
//! the retry policy.

pub mod dr;
pub mod path_alg;
pub mod pds;

use ndarray::{s, Array1, Array2};

use crate::dataset::Dataset;
use crate::error::LassoError;
use crate::lambda::huber_scale_root;
use crate::types::{FormulationKind, Method, ResolvedFormulation};

/// Iteration cap for the splitting solvers.
pub const MAX_ITERATIONS: usize = 100_000;

/// Relative tolerance on successive iterate differences.
pub const CONVERGENCE_TOL: f64 = 1e-9;

const SIGMA_MAX_ROUNDS: usize = 100;
const SIGMA_REL_TOL: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    Converged,
    /// Reached the iteration cap; the returned iterate is the best available
    /// and `residual` tells the caller how far convergence got.
    MaxIterationsReached,
}

/// Result of one fixed-lambda solve.
#[derive(Debug, Clone)]
pub struct SolveOutcome {
    pub beta: Array1<f64>,
    /// Jointly estimated scale, present for concomitant formulations.
    pub sigma: Option<f64>,
    pub status: SolveStatus,
    pub iterations: usize,
    /// Achieved successive-iterate change (splitting solvers) or zero for the
    /// exact path algorithm.
    pub residual: f64,
}

/// Optional starting point carried between solves of a path sweep.
#[derive(Debug, Clone, Copy, Default)]
pub struct WarmStart<'a> {
    pub beta: Option<&'a Array1<f64>>,
    pub sigma: Option<f64>,
}

/// A constrained weighted-l1 least-squares problem
/// min ||A theta - b||^2 + sum_j (lam * u_j + c_j) |theta_j|  s.t.  G theta = 0.
///
/// LS is the identity embedding; Huber becomes this after splitting the
/// residual, r = (X beta - y) - o with an l1 price of 2 rho on o, so the
/// augmented design is [X | -I] and only the leading `n_beta` coordinates are
/// reported as coefficients.
pub(crate) struct PenalizedLs {
    pub a: Array2<f64>,
    pub b: Array1<f64>,
    pub g: Array2<f64>,
    /// Penalty slope u (multiplied by lambda).
    pub pen_slope: Array1<f64>,
    /// Constant penalty offset c.
    pub pen_offset: Array1<f64>,
    pub n_beta: usize,
}

impl PenalizedLs {
    pub fn ls(ds: &Dataset) -> Self {
        let d = ds.d();
        PenalizedLs {
            a: ds.x().clone(),
            b: ds.y().clone(),
            g: ds.c().clone(),
            pen_slope: Array1::ones(d),
            pen_offset: Array1::zeros(d),
            n_beta: d,
        }
    }

    pub fn huber(ds: &Dataset, rho: f64) -> Self {
        let (n, d) = (ds.n(), ds.d());
        let mut a = Array2::zeros((n, d + n));
        a.slice_mut(s![.., ..d]).assign(ds.x());
        for i in 0..n {
            a[[i, d + i]] = -1.0;
        }
        let mut g = Array2::zeros((ds.k(), d + n));
        g.slice_mut(s![.., ..d]).assign(ds.c());
        let mut pen_slope = Array1::zeros(d + n);
        pen_slope.slice_mut(s![..d]).fill(1.0);
        let mut pen_offset = Array1::zeros(d + n);
        pen_offset.slice_mut(s![d..]).fill(2.0 * rho);
        PenalizedLs {
            a,
            b: ds.y().clone(),
            g,
            pen_slope,
            pen_offset,
            n_beta: d,
        }
    }

    pub fn weights(&self, lam: f64) -> Array1<f64> {
        &self.pen_slope * lam + &self.pen_offset
    }

    pub fn dim(&self) -> usize {
        self.a.ncols()
    }
}

fn truncate(outcome: SolveOutcome, n_beta: usize) -> SolveOutcome {
    if outcome.beta.len() == n_beta {
        return outcome;
    }
    SolveOutcome {
        beta: outcome.beta.slice(s![..n_beta]).to_owned(),
        ..outcome
    }
}

/// Solve one formulation at a fixed absolute lambda with the given algorithm.
///
/// The method is assumed valid for the formulation (see
/// [`crate::select::choose_method`]); an invalid pairing falls back to the
/// formulation default rather than failing, since the selection heuristic is
/// advisory.
pub fn solve_fixed_lambda(
    ds: &Dataset,
    spec: &ResolvedFormulation,
    lam_abs: f64,
    method: Method,
    warm: WarmStart<'_>,
) -> Result<SolveOutcome, LassoError> {
    if !lam_abs.is_finite() || lam_abs <= 0.0 {
        return Err(LassoError::InvalidLambda(lam_abs));
    }
    match spec.kind {
        FormulationKind::Ls => match method {
            Method::PathAlg => path_alg::point_solve(ds, spec, lam_abs),
            Method::Ppds => pds::p_pds(ds, pds::SmoothLoss::ls(ds), lam_abs, warm.beta),
            Method::PfPds => pds::pf_pds(ds, pds::SmoothLoss::ls(ds), lam_abs, warm.beta),
            Method::Dr => {
                let p = PenalizedLs::ls(ds);
                dr::solve(&p, lam_abs, warm.beta)
            }
        },
        FormulationKind::Huber => match method {
            Method::PathAlg => path_alg::point_solve(ds, spec, lam_abs),
            Method::Ppds => pds::p_pds(ds, pds::SmoothLoss::huber(ds, spec.rho), lam_abs, warm.beta),
            Method::PfPds => {
                pds::pf_pds(ds, pds::SmoothLoss::huber(ds, spec.rho), lam_abs, warm.beta)
            }
            Method::Dr => {
                let p = PenalizedLs::huber(ds, spec.rho);
                Ok(truncate(dr::solve(&p, lam_abs, warm.beta)?, p.n_beta))
            }
        },
        FormulationKind::Concomitant | FormulationKind::ConcomitantHuber => {
            solve_concomitant(ds, spec, lam_abs, method, warm)
        }
        FormulationKind::Classification | FormulationKind::HuberClassification => {
            let rho_margin = if spec.kind == FormulationKind::HuberClassification {
                spec.rho_classification
            } else {
                f64::NEG_INFINITY
            };
            match method {
                Method::Ppds => pds::p_pds(
                    ds,
                    pds::SmoothLoss::hinge(ds, rho_margin),
                    lam_abs,
                    warm.beta,
                ),
                // Classification is limited to Path-Alg and P-PDS.
                _ => path_alg::point_solve(ds, spec, lam_abs),
            }
        }
    }
}

/// Alternating scale/coefficient minimization for the concomitant
/// formulations.
///
/// For fixed sigma the problem reduces to an LS (or Huber with threshold
/// rho * sigma) subproblem with an effective penalty; for fixed beta the
/// scale has a closed form (plain concomitant) or is the root of a monotone
/// one-dimensional equation (Huber concomitant). The alternation is run until
/// sigma stabilizes, warm-starting every inner solve.
fn solve_concomitant(
    ds: &Dataset,
    spec: &ResolvedFormulation,
    lam_abs: f64,
    method: Method,
    warm: WarmStart<'_>,
) -> Result<SolveOutcome, LassoError> {
    let y = ds.y();
    let ynorm = y.dot(y).sqrt();
    let sigma_floor = 1e-12 * ynorm.max(1.0);
    let huber = spec.kind == FormulationKind::ConcomitantHuber;

    let mut sigma = match warm.sigma {
        Some(s) if s > sigma_floor => s,
        _ => {
            if huber {
                huber_scale_root(y, spec.rho, spec.e, ds.n())?
            } else {
                ynorm / spec.e.sqrt()
            }
        }
    };

    // The LS homotopy does not depend on sigma, so Path-Alg can compute it
    // once and evaluate it at each effective lambda.
    let ls_homotopy = if !huber && method == Method::PathAlg {
        let floor = (2.0 * sigma * lam_abs * 1e-6).max(f64::MIN_POSITIVE);
        Some(path_alg::homotopy_ls(ds, floor, None)?)
    } else {
        None
    };

    let mut beta = warm.beta.cloned().unwrap_or_else(|| Array1::zeros(ds.d()));
    let mut last_residual = 0.0;
    let mut iterations = 0;

    for round in 0..SIGMA_MAX_ROUNDS {
        let lam_eff = if huber {
            sigma * lam_abs
        } else {
            2.0 * sigma * lam_abs
        };
        let outcome = if huber {
            match method {
                Method::PathAlg => {
                    let floor = (lam_eff * 0.5).max(f64::MIN_POSITIVE);
                    let h = path_alg::homotopy_huber(ds, spec.rho * sigma, floor, None)?;
                    SolveOutcome {
                        beta: h.eval(lam_eff),
                        sigma: None,
                        status: h.status(),
                        iterations: h.segments(),
                        residual: 0.0,
                    }
                }
                _ => {
                    let p = PenalizedLs::huber(ds, spec.rho * sigma);
                    truncate(dr::solve(&p, lam_eff, Some(&beta))?, p.n_beta)
                }
            }
        } else {
            match &ls_homotopy {
                Some(h) => SolveOutcome {
                    beta: h.eval(lam_eff),
                    sigma: None,
                    status: h.status(),
                    iterations: h.segments(),
                    residual: 0.0,
                },
                None => {
                    let p = PenalizedLs::ls(ds);
                    dr::solve(&p, lam_eff, Some(&beta))?
                }
            }
        };
        let inner_status = outcome.status;
        beta = outcome.beta;
        last_residual = outcome.residual;
        iterations += outcome.iterations.max(1);

        let r = ds.x().dot(&beta) - y;
        let sigma_new = if huber {
            match huber_scale_root(&r, spec.rho, spec.e, ds.n()) {
                Ok(s) => s.max(sigma_floor),
                // Residuals too small or too sparse: the scale collapses.
                Err(_) => sigma_floor,
            }
        } else {
            (r.dot(&r).sqrt() / spec.e.sqrt()).max(sigma_floor)
        };

        let done = (sigma_new - sigma).abs() <= SIGMA_REL_TOL * sigma + 1e-15;
        sigma = sigma_new;
        if done {
            return Ok(SolveOutcome {
                beta,
                sigma: Some(sigma),
                status: inner_status,
                iterations,
                residual: last_residual,
            });
        }
        if round + 1 == SIGMA_MAX_ROUNDS {
            log::debug!(
                "concomitant scale alternation hit {SIGMA_MAX_ROUNDS} rounds (sigma {sigma:.3e})"
            );
        }
    }

    Ok(SolveOutcome {
        beta,
        sigma: Some(sigma),
        status: SolveStatus::MaxIterationsReached,
        iterations,
        residual: last_residual,
    })
}
