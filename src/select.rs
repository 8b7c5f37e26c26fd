//! Numerical-method resolution: maps a (possibly absent or invalid) caller
//! request to an algorithm that is valid for the formulation and task.
//!
//! The heuristic is advisory only: a caller-supplied method that is valid for
//! the formulation is always kept unchanged.

use crate::types::{Formulation, Method, StabSelVariant, Task};

/// Lambda threshold (as a fraction of lambda_max) below which the splitting
/// solver is preferred for fixed-lambda concomitant problems.
const SMALL_LAM_CONCOMITANT: f64 = 0.05;
/// Same threshold for the non-concomitant formulations.
const SMALL_LAM_DEFAULT: f64 = 0.1;

fn valid_methods(formulation: &Formulation) -> &'static [Method] {
    if formulation.classification {
        &[Method::PathAlg, Method::Ppds]
    } else if formulation.concomitant {
        &[Method::PathAlg, Method::Dr]
    } else {
        &[Method::PathAlg, Method::Ppds, Method::PfPds, Method::Dr]
    }
}

/// Resolve the numerical method for a task.
///
/// Rules, in order: classification formulations fall back to the path
/// algorithm; fixed-lambda work (including the fixed-lambda stability
/// selection sub-mode) picks between the path algorithm and Douglas-Rachford
/// on a lambda-magnitude threshold; path-type tasks default to the path
/// algorithm. `lam` is a fraction of lambda_max; `None` is treated as large.
pub fn choose_method(
    requested: Option<Method>,
    task: Task,
    formulation: &Formulation,
    stab_sel: Option<&StabSelVariant>,
    lam: Option<f64>,
) -> Method {
    let valid = valid_methods(formulation);
    if let Some(m) = requested {
        if valid.contains(&m) {
            return m;
        }
    }

    if formulation.classification {
        return Method::PathAlg;
    }

    let fixed_lam = task == Task::FixedLambda
        || (task == Task::StabilitySelection
            && matches!(stab_sel, Some(StabSelVariant::Lam { .. })));
    if fixed_lam {
        let threshold = if formulation.concomitant {
            SMALL_LAM_CONCOMITANT
        } else {
            SMALL_LAM_DEFAULT
        };
        return if lam.unwrap_or(1.0) > threshold {
            Method::PathAlg
        } else {
            Method::Dr
        };
    }

    Method::PathAlg
}
