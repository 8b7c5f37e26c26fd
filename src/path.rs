//! Regularization paths over a decreasing lambda grid.
//!
//! With the path algorithm the whole piecewise-linear path is computed once
//! and evaluated at the grid; the concomitant variant wraps the least-squares
//! path in a per-point scale fixed point. The iterative methods instead sweep
//! the grid with warm starts.

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::dataset::{support, Dataset};
use crate::error::LassoError;
use crate::lambda::{self, lambda_max};
use crate::select::choose_method;
use crate::solvers::{path_alg, solve_fixed_lambda, WarmStart};
use crate::types::{Formulation, FormulationKind, Method, ResolvedFormulation, Task};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    /// Fractions of lambda_max, decreasing, in (0, 1].
    pub lambdas: Vec<f64>,
    /// Stop once this many coefficients are simultaneously active.
    pub n_active: Option<usize>,
    pub method: Option<Method>,
}

impl Default for PathConfig {
    fn default() -> Self {
        PathConfig {
            lambdas: lambda::default_path_grid(80),
            n_active: None,
            method: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PathResult {
    /// Absolute lambdas actually solved; shorter than the requested grid when
    /// the active-set cap stopped the path early.
    pub lambdas: Vec<f64>,
    pub betas: Vec<Array1<f64>>,
    /// Estimated scales, one per solved lambda, for concomitant formulations.
    pub sigmas: Option<Vec<f64>>,
    pub lambda_max: f64,
    pub method: Method,
    /// Per-coordinate indicator of activity anywhere along the computed path.
    pub ever_active: Vec<bool>,
}

/// Check a grid of lambda_max fractions and return it sorted decreasing.
pub(crate) fn validated_grid(fractions: &[f64]) -> Result<Vec<f64>, LassoError> {
    if fractions.is_empty() {
        return Err(LassoError::EmptyLambdaGrid);
    }
    for &f in fractions {
        if !f.is_finite() || f <= 0.0 {
            return Err(LassoError::InvalidLambda(f));
        }
    }
    let mut grid = fractions.to_vec();
    grid.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    Ok(grid)
}

pub fn solve_path(
    ds: &Dataset,
    formulation: &Formulation,
    cfg: &PathConfig,
) -> Result<PathResult, LassoError> {
    let spec = formulation.resolve(ds.n());
    let lam_max = lambda_max(ds, &spec)?;
    let grid = validated_grid(&cfg.lambdas)?;
    let abs: Vec<f64> = grid.iter().map(|f| f * lam_max).collect();

    let mut method = choose_method(cfg.method, Task::Path, formulation, None, None);
    // The huberized concomitant loses the piecewise-affine structure (the
    // effective Huber threshold moves with the scale), so its path falls back
    // to warm-started Douglas-Rachford sweeps.
    if spec.kind == FormulationKind::ConcomitantHuber && method == Method::PathAlg {
        method = Method::Dr;
    }

    if method == Method::PathAlg {
        if spec.kind == FormulationKind::Concomitant {
            return concomitant_path(ds, &spec, lam_max, &abs, cfg.n_active);
        }
        return homotopy_path(ds, &spec, lam_max, &abs, cfg.n_active);
    }
    sequential_path(ds, &spec, lam_max, &abs, method, cfg.n_active)
}

fn homotopy_path(
    ds: &Dataset,
    spec: &ResolvedFormulation,
    lam_max: f64,
    abs: &[f64],
    n_active: Option<usize>,
) -> Result<PathResult, LassoError> {
    let floor = match abs.last() {
        Some(&l) => l,
        None => return Err(LassoError::EmptyLambdaGrid),
    };
    let h = path_alg::homotopy_for(ds, spec, floor, n_active)?;
    let cut = if h.stopped_at_active_cap() {
        h.min_lam() * (1.0 - 1e-12)
    } else {
        0.0
    };
    let mut lambdas = Vec::with_capacity(abs.len());
    let mut betas = Vec::with_capacity(abs.len());
    for &l in abs {
        if l < cut {
            break;
        }
        lambdas.push(l);
        betas.push(h.eval(l));
    }
    Ok(PathResult {
        lambdas,
        betas,
        sigmas: None,
        lambda_max: lam_max,
        method: Method::PathAlg,
        ever_active: h.ever_active().to_vec(),
    })
}

/// Concomitant path through the least-squares homotopy: at each grid point
/// the scale and the effective penalty are brought to their joint fixed point
/// (sigma = ||X beta - y|| / sqrt(e) with beta evaluated at 2 sigma lambda).
fn concomitant_path(
    ds: &Dataset,
    spec: &ResolvedFormulation,
    lam_max: f64,
    abs: &[f64],
    n_active: Option<usize>,
) -> Result<PathResult, LassoError> {
    let floor = match abs.last() {
        Some(&l) => l,
        None => return Err(LassoError::EmptyLambdaGrid),
    };
    let y = ds.y();
    let ynorm = y.dot(y).sqrt();
    let sigma_floor = 1e-12 * ynorm.max(1.0);
    let mut sigma = (ynorm / spec.e.sqrt()).max(sigma_floor);
    let h = path_alg::homotopy_ls(ds, (2.0 * sigma * floor * 1e-3).max(f64::MIN_POSITIVE), None)?;

    let mut lambdas = Vec::with_capacity(abs.len());
    let mut betas = Vec::with_capacity(abs.len());
    let mut sigmas = Vec::with_capacity(abs.len());
    let mut ever_active = vec![false; ds.d()];
    for &l in abs {
        let mut beta = Array1::zeros(ds.d());
        for _ in 0..60 {
            beta = h.eval(2.0 * sigma * l);
            let r = ds.x().dot(&beta) - y;
            let sigma_new = (r.dot(&r).sqrt() / spec.e.sqrt()).max(sigma_floor);
            let done = (sigma_new - sigma).abs() <= 1e-9 * sigma;
            sigma = sigma_new;
            if done {
                break;
            }
        }
        let sel = support(&beta);
        for &j in &sel {
            ever_active[j] = true;
        }
        lambdas.push(l);
        betas.push(beta);
        sigmas.push(sigma);
        if let Some(cap) = n_active {
            if sel.len() >= cap {
                break;
            }
        }
    }
    Ok(PathResult {
        lambdas,
        betas,
        sigmas: Some(sigmas),
        lambda_max: lam_max,
        method: Method::PathAlg,
        ever_active,
    })
}

/// Warm-started sweep for the iterative solvers.
fn sequential_path(
    ds: &Dataset,
    spec: &ResolvedFormulation,
    lam_max: f64,
    abs: &[f64],
    method: Method,
    n_active: Option<usize>,
) -> Result<PathResult, LassoError> {
    let mut lambdas = Vec::with_capacity(abs.len());
    let mut betas: Vec<Array1<f64>> = Vec::with_capacity(abs.len());
    let mut sigmas = Vec::with_capacity(abs.len());
    let mut ever_active = vec![false; ds.d()];
    let mut warm_sigma = None;
    for &l in abs {
        let warm = WarmStart {
            beta: betas.last(),
            sigma: warm_sigma,
        };
        let out = solve_fixed_lambda(ds, spec, l, method, warm)?;
        let sel = support(&out.beta);
        for &j in &sel {
            ever_active[j] = true;
        }
        warm_sigma = out.sigma;
        if let Some(s) = out.sigma {
            sigmas.push(s);
        }
        lambdas.push(l);
        betas.push(out.beta);
        if let Some(cap) = n_active {
            if sel.len() >= cap {
                break;
            }
        }
    }
    let sigmas = if sigmas.is_empty() { None } else { Some(sigmas) };
    Ok(PathResult {
        lambdas,
        betas,
        sigmas,
        lambda_max: lam_max,
        method,
        ever_active,
    })
}
