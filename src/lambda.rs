//! Closed-form lambda_max per formulation, the theoretical-lambda heuristic
//! and the default lambda grids.
//!
//! lambda_max is the smallest penalty at which the all-zero coefficient
//! vector is optimal; callers use it to normalize lambda onto (0, 1]. Because
//! everything downstream divides by it, a degenerate value is an error here,
//! never a silent zero.

use ndarray::Array1;

use crate::dataset::Dataset;
use crate::error::LassoError;
use crate::types::{FormulationKind, ResolvedFormulation};

fn linf(v: &Array1<f64>) -> f64 {
    v.iter().map(|x| x.abs()).fold(0.0, f64::max)
}

/// Smallest lambda with an all-zero solution, in absolute units.
pub fn lambda_max(ds: &Dataset, spec: &ResolvedFormulation) -> Result<f64, LassoError> {
    let x = ds.x();
    let y = ds.y();
    let value = match spec.kind {
        FormulationKind::Ls | FormulationKind::Classification => 2.0 * linf(&x.t().dot(y)),
        FormulationKind::Huber => {
            let clipped = y.mapv(|v| v.clamp(-spec.rho, spec.rho));
            2.0 * linf(&x.t().dot(&clipped))
        }
        FormulationKind::Concomitant => {
            let ynorm = y.dot(y).sqrt();
            spec.e.sqrt() * linf(&x.t().dot(y)) / ynorm
        }
        FormulationKind::ConcomitantHuber => {
            let sigma0 = huber_scale_root(y, spec.rho, spec.e, ds.n())?;
            let clipped = y.mapv(|v| v.clamp(-spec.rho * sigma0, spec.rho * sigma0));
            2.0 * linf(&x.t().dot(&clipped)) / sigma0
        }
        FormulationKind::HuberClassification => {
            // At beta = 0 every margin is zero; with the conventional
            // negative threshold all samples sit in the quadratic region,
            // otherwise the linear slope scales the score.
            let factor = if spec.rho_classification < 0.0 {
                2.0
            } else {
                2.0 * (1.0 - spec.rho_classification)
            };
            factor * linf(&x.t().dot(y))
        }
    };
    if !value.is_finite() || value <= f64::MIN_POSITIVE {
        return Err(LassoError::DegenerateLambdaMax { value });
    }
    Ok(value)
}

/// Positive root of sum_i min(y_i^2 / sigma^2, rho^2) = e / 2, the optimality
/// condition of the concomitant-Huber scale at beta = 0. The left side is
/// decreasing in sigma, so a bisection on a geometric bracket is exact enough.
pub fn huber_scale_root(
    y: &Array1<f64>,
    rho: f64,
    e: f64,
    n: usize,
) -> Result<f64, LassoError> {
    let target = e / 2.0;
    let nonzero = y.iter().filter(|v| v.abs() > 0.0).count();
    let plateau = nonzero as f64 * rho * rho;
    if target <= 0.0 || target >= plateau {
        return Err(LassoError::ScaleEquationInfeasible { e, n });
    }
    let g = |sigma: f64| -> f64 {
        y.iter()
            .map(|yi| (yi * yi / (sigma * sigma)).min(rho * rho))
            .sum::<f64>()
    };
    let ymax = y.iter().map(|v| v.abs()).fold(0.0, f64::max);
    let mut lo = 1e-12 * ymax;
    let mut hi = 2.0 * ymax * (y.len() as f64 / target).sqrt();
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if g(mid) > target {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    Ok(0.5 * (lo + hi))
}

/// Universal-threshold heuristic lambda, as a fraction of lambda_max. Callers
/// wanting an absolute value multiply by n themselves, matching the original
/// tool's `true_lam` handling.
pub fn theoretical_lam(n: usize, d: usize) -> f64 {
    (2.0 * (d as f64).ln() / n as f64).sqrt().min(1.0)
}

/// Geometric grid 10^(-2 i / nlam), i = 0..nlam: the default for path
/// computations and stability selection.
pub fn default_path_grid(nlam: usize) -> Vec<f64> {
    (0..nlam)
        .map(|i| 10f64.powf(-2.0 * i as f64 / nlam as f64))
        .collect()
}

/// Linear grid from 1 down to 1e-3: the default for cross-validation.
pub fn default_cv_grid(nlam: usize) -> Vec<f64> {
    if nlam < 2 {
        return vec![1.0];
    }
    let lamin = 1e-3;
    (0..nlam)
        .map(|i| 1.0 + (lamin - 1.0) * i as f64 / (nlam - 1) as f64)
        .collect()
}
