use thiserror::Error;

use crate::linalg::LinalgError;

/// Errors surfaced by the estimation core.
///
/// Configuration problems (shapes, unknown names, bad grids) fail before any
/// numerical work starts. Numerical degeneracy (a zero `lambda_max`, a
/// rank-deficient constraint) is an arithmetic failure, never a silent
/// default. Non-convergence of an iterative solver is *not* represented here:
/// solvers return their best iterate together with a status and the achieved
/// residual, and the caller decides what to do with it.
#[derive(Debug, Error)]
pub enum LassoError {
    #[error(
        "dimension mismatch: X is {n}x{d}, y has length {y_len}, C is {k}x{c_cols} \
         (y must have {n} entries and C must have {d} columns)"
    )]
    DimensionMismatch {
        n: usize,
        d: usize,
        y_len: usize,
        k: usize,
        c_cols: usize,
    },

    #[error("unrecognized formulation name {0:?}; expected one of LS, Huber, Concomitant, Concomitant_Huber, Classification, Huber_Classification")]
    UnknownFormulation(String),

    #[error("unrecognized numerical method {0:?}; expected one of Path-Alg, P-PDS, PF-PDS, DR")]
    UnknownMethod(String),

    #[error(
        "lambda_max evaluated to {value:.3e}; the data admit no regularization path \
         (is X or y identically zero?)"
    )]
    DegenerateLambdaMax { value: f64 },

    #[error("regularization strength must be positive and finite, got {0}")]
    InvalidLambda(f64),

    #[error("lambda grid is empty")]
    EmptyLambdaGrid,

    #[error("constraint projection failed; C is rank deficient or the system is singular: {0}")]
    SingularConstraint(#[source] LinalgError),

    #[error("linear algebra failure during solve: {0}")]
    Linalg(#[from] LinalgError),

    #[error("cross-validation needs 2 <= k <= n folds, got k={k} with n={n}")]
    InvalidFoldCount { k: usize, n: usize },

    #[error("stability selection subsample size floor({percent} * {n}) is below 2")]
    EmptySubsample { percent: f64, n: usize },

    #[error("the concomitant scale equation has no positive root (e={e}, n={n}); decrease e or increase rho")]
    ScaleEquationInfeasible { e: f64, n: usize },

    #[error("all {total} resampling iterations failed; last failure: {last}")]
    AllIterationsFailed { total: usize, last: String },
}
