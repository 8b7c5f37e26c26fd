//! Douglas-Rachford splitting on the penalized least-squares form.
//!
//! The splitting alternates the prox of the smooth-plus-constraint piece
//! (a KKT solve whose factorizations are computed once) with the weighted
//! soft threshold. Huber formulations arrive here already augmented by
//! [`super::PenalizedLs::huber`], so a single quadratic prox covers both.

use ndarray::{Array1, Array2};

use super::{PenalizedLs, SolveOutcome, SolveStatus, CONVERGENCE_TOL, MAX_ITERATIONS};
use crate::error::LassoError;
use crate::linalg::{soft_threshold_weighted, spectral_norm_sq, SpdFactor};

/// Prox of theta -> ||A theta - b||^2 restricted to G theta = 0, with the
/// factorizations of H = 2 A'A + I/gamma and the Schur complement
/// S = G H^-1 G' prepared up front.
struct QuadraticProx {
    h: SpdFactor,
    s: SpdFactor,
    /// H^-1 G', reused for the multiplier correction.
    hict: Array2<f64>,
    g: Array2<f64>,
    atb2: Array1<f64>,
    gamma: f64,
}

impl QuadraticProx {
    fn new(p: &PenalizedLs, gamma: f64) -> Result<Self, LassoError> {
        let dim = p.dim();
        let mut h_mat = 2.0 * p.a.t().dot(&p.a);
        for i in 0..dim {
            h_mat[[i, i]] += 1.0 / gamma;
        }
        let h = SpdFactor::new(&h_mat)?;
        let gt = p.g.t().to_owned();
        let hict = h.solve_array(&gt)?;
        let s_mat = p.g.dot(&hict);
        let s = SpdFactor::new(&s_mat).map_err(LassoError::SingularConstraint)?;
        Ok(QuadraticProx {
            h,
            s,
            hict,
            g: p.g.clone(),
            atb2: 2.0 * p.a.t().dot(&p.b),
            gamma,
        })
    }

    fn apply(&self, v: &Array1<f64>) -> Result<Array1<f64>, LassoError> {
        let q = v / self.gamma + &self.atb2;
        let free = self.h.solve_vec(&q)?;
        let mu = self.s.solve_vec(&self.g.dot(&free))?;
        Ok(&free - &self.hict.dot(&mu))
    }
}

pub(crate) fn solve(
    p: &PenalizedLs,
    lam_abs: f64,
    warm: Option<&Array1<f64>>,
) -> Result<SolveOutcome, LassoError> {
    // gamma ~ 1/L keeps H well conditioned relative to the data term.
    let gamma = 1.0 / spectral_norm_sq(p.a.view()).max(f64::MIN_POSITIVE);
    let prox = QuadraticProx::new(p, gamma)?;
    let thresholds = p.weights(lam_abs) * gamma;

    let mut z = match warm {
        Some(b) if b.len() == p.dim() => b.clone(),
        Some(b) => {
            // Warm starts from the unaugmented coefficient block.
            let mut full = Array1::zeros(p.dim());
            full.slice_mut(ndarray::s![..b.len()]).assign(b);
            full
        }
        None => Array1::zeros(p.dim()),
    };
    let mut theta = prox.apply(&z)?;
    let mut residual = f64::INFINITY;
    for it in 1..=MAX_ITERATIONS {
        let w = soft_threshold_weighted(&(2.0 * &theta - &z), &thresholds);
        let step = &w - &theta;
        residual = step.iter().map(|x| x.abs()).fold(0.0, f64::max);
        z += &step;
        let scale = 1.0 + theta.iter().map(|x| x.abs()).fold(0.0, f64::max);
        theta = prox.apply(&z)?;
        if residual <= CONVERGENCE_TOL * scale {
            return Ok(SolveOutcome {
                beta: theta,
                sigma: None,
                status: SolveStatus::Converged,
                iterations: it,
                residual,
            });
        }
    }
    log::debug!("DR reached {MAX_ITERATIONS} iterations (residual {residual:.3e})");
    Ok(SolveOutcome {
        beta: theta,
        sigma: None,
        status: SolveStatus::MaxIterationsReached,
        iterations: MAX_ITERATIONS,
        residual,
    })
}
