//! Single fixed-lambda estimation, the simplest entry point.

use ndarray::Array1;

use crate::dataset::{support, Dataset};
use crate::error::LassoError;
use crate::lambda::lambda_max;
use crate::select::choose_method;
use crate::solvers::{solve_fixed_lambda, SolveStatus, WarmStart};
use crate::types::{Formulation, Method, Task};

#[derive(Debug, Clone)]
pub struct FixedLambdaResult {
    pub beta: Array1<f64>,
    /// Estimated scale for concomitant formulations.
    pub sigma: Option<f64>,
    /// Absolute regularization strength actually used.
    pub lambda: f64,
    pub lambda_max: f64,
    /// `lambda / lambda_max`.
    pub fraction: f64,
    pub method: Method,
    pub status: SolveStatus,
    pub iterations: usize,
    pub residual: f64,
    pub selected: Vec<usize>,
}

/// Solve one problem at one regularization strength.
///
/// `lam` is a fraction of lambda_max unless `true_lam`, in which case it is
/// taken as an absolute value. The numerical method defaults through
/// [`choose_method`]; a requested method valid for the formulation is always
/// honored.
pub fn solve_fixed(
    ds: &Dataset,
    formulation: &Formulation,
    lam: f64,
    true_lam: bool,
    method: Option<Method>,
) -> Result<FixedLambdaResult, LassoError> {
    let spec = formulation.resolve(ds.n());
    let lam_max = lambda_max(ds, &spec)?;
    let (fraction, lam_abs) = if true_lam {
        (lam / lam_max, lam)
    } else {
        (lam, lam * lam_max)
    };
    if !lam_abs.is_finite() || lam_abs <= 0.0 {
        return Err(LassoError::InvalidLambda(lam));
    }
    let method = choose_method(
        method,
        Task::FixedLambda,
        formulation,
        None,
        Some(fraction),
    );
    let out = solve_fixed_lambda(ds, &spec, lam_abs, method, WarmStart::default())?;
    let selected = support(&out.beta);
    Ok(FixedLambdaResult {
        beta: out.beta,
        sigma: out.sigma,
        lambda: lam_abs,
        lambda_max: lam_max,
        fraction,
        method,
        status: out.status,
        iterations: out.iterations,
        residual: out.residual,
        selected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

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

    fn ls_formulation() -> Formulation {
        Formulation {
            concomitant: false,
            ..Formulation::default()
        }
    }

    #[test]
    fn fraction_and_absolute_lambda_are_consistent() {
        let ds = toy();
        let by_fraction = solve_fixed(&ds, &ls_formulation(), 0.3, false, None).unwrap();
        let by_absolute = solve_fixed(
            &ds,
            &ls_formulation(),
            by_fraction.lambda,
            true,
            None,
        )
        .unwrap();
        for (a, b) in by_fraction.beta.iter().zip(by_absolute.beta.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
        assert!((by_absolute.fraction - 0.3).abs() < 1e-12);
    }

    #[test]
    fn solution_is_feasible_and_supported() {
        let ds = toy();
        let res = solve_fixed(&ds, &ls_formulation(), 0.2, false, None).unwrap();
        let sum: f64 = res.beta.iter().sum();
        assert!(sum.abs() < 1e-8);
        for &j in &res.selected {
            assert!(res.beta[j].abs() > 1e-3);
        }
    }

    #[test]
    fn nonpositive_lambda_is_rejected() {
        let ds = toy();
        assert!(matches!(
            solve_fixed(&ds, &ls_formulation(), 0.0, false, None),
            Err(LassoError::InvalidLambda(_))
        ));
        assert!(solve_fixed(&ds, &ls_formulation(), -1.0, true, None).is_err());
    }

    #[test]
    fn concomitant_solve_returns_a_scale() {
        let ds = toy();
        let res = solve_fixed(&ds, &Formulation::default(), 0.3, false, None).unwrap();
        let sigma = res.sigma.expect("concomitant carries a scale");
        assert!(sigma > 0.0);
    }

    #[test]
    fn small_fraction_switches_to_douglas_rachford() {
        let ds = toy();
        let res = solve_fixed(&ds, &ls_formulation(), 0.05, false, None).unwrap();
        assert_eq!(res.method, Method::Dr);
    }
}
