//! Scalar loss pieces shared by lambda_max, the solvers and the tests.

use ndarray::Array1;

use crate::dataset::Dataset;
use crate::types::{FormulationKind, ResolvedFormulation};

/// Huber loss of one residual: r^2 inside the threshold, linear with matched
/// value and slope outside.
pub fn huber(r: f64, rho: f64) -> f64 {
    if r.abs() <= rho {
        r * r
    } else {
        (2.0 * r.abs() - rho) * rho
    }
}

/// Derivative of `huber`: 2 r clipped at +-2 rho.
pub fn huber_deriv(r: f64, rho: f64) -> f64 {
    2.0 * r.clamp(-rho, rho)
}

/// Margin region for the (huberized) squared hinge. `rho` is the lower
/// threshold; plain squared hinge uses `rho = -infinity` so the linear region
/// never appears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarginRegion {
    /// Margin at least 1: sample pays nothing.
    Satisfied,
    /// Quadratic part of the hinge.
    Quadratic,
    /// Linear extension below `rho`.
    Linear,
}

pub fn margin_region(margin: f64, rho: f64) -> MarginRegion {
    if margin >= 1.0 {
        MarginRegion::Satisfied
    } else if margin > rho {
        MarginRegion::Quadratic
    } else {
        MarginRegion::Linear
    }
}

/// Huberized squared hinge on one margin.
pub fn hinge(margin: f64, rho: f64) -> f64 {
    match margin_region(margin, rho) {
        MarginRegion::Satisfied => 0.0,
        MarginRegion::Quadratic => (1.0 - margin) * (1.0 - margin),
        MarginRegion::Linear => (1.0 - rho) * (1.0 - rho) + 2.0 * (1.0 - rho) * (rho - margin),
    }
}

/// Derivative of `hinge` with respect to the margin.
pub fn hinge_deriv(margin: f64, rho: f64) -> f64 {
    match margin_region(margin, rho) {
        MarginRegion::Satisfied => 0.0,
        MarginRegion::Quadratic => -2.0 * (1.0 - margin),
        MarginRegion::Linear => -2.0 * (1.0 - rho),
    }
}

/// Full objective value at (beta, sigma) for a given absolute lambda. Used by
/// tests and convergence diagnostics, not by the solvers' inner loops.
pub fn objective(
    ds: &Dataset,
    spec: &ResolvedFormulation,
    beta: &Array1<f64>,
    sigma: Option<f64>,
    lam_abs: f64,
) -> f64 {
    let l1: f64 = beta.iter().map(|b| b.abs()).sum();
    let r = ds.x().dot(beta) - ds.y();
    match spec.kind {
        FormulationKind::Ls => r.dot(&r) + lam_abs * l1,
        FormulationKind::Huber => r.iter().map(|ri| huber(*ri, spec.rho)).sum::<f64>() + lam_abs * l1,
        // A missing scale is treated as unit, which reduces the concomitant
        // objectives to their fixed-scale counterparts.
        FormulationKind::Concomitant => {
            let s = sigma.unwrap_or(1.0).max(f64::MIN_POSITIVE);
            spec.e * s / 2.0 + r.dot(&r) / (2.0 * s) + lam_abs * l1
        }
        FormulationKind::ConcomitantHuber => {
            let s = sigma.unwrap_or(1.0).max(f64::MIN_POSITIVE);
            spec.e * s / 2.0
                + r.iter().map(|ri| s * huber(ri / s, spec.rho)).sum::<f64>()
                + lam_abs * l1
        }
        FormulationKind::Classification | FormulationKind::HuberClassification => {
            let rho = if spec.kind == FormulationKind::HuberClassification {
                spec.rho_classification
            } else {
                f64::NEG_INFINITY
            };
            let eta = ds.x().dot(beta);
            ds.y()
                .iter()
                .zip(eta.iter())
                .map(|(yi, ei)| hinge(yi * ei, rho))
                .sum::<f64>()
                + lam_abs * l1
        }
    }
}
