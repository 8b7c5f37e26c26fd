//! K-fold cross-validation over the lambda grid.
//!
//! Folds run in parallel; each fold computes a full path on its training
//! split and scores every grid point on the held-out split. A fold whose
//! path fails (degenerate subsample) is skipped and counted; only a complete
//! wipeout is an error. Selection uses the minimum of the mean curve or the
//! one-standard-error rule (the largest lambda whose mean score is within one
//! standard error of the minimum).

use ndarray::Array1;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::dataset::{support, Dataset};
use crate::error::LassoError;
use crate::lambda::lambda_max;
use crate::losses::hinge;
use crate::path::{solve_path, validated_grid, PathConfig};
use crate::select::choose_method;
use crate::solvers::{solve_fixed_lambda, SolveStatus, WarmStart};
use crate::types::{CvConfig, Formulation, Method, Task};

#[derive(Debug, Clone)]
pub struct CvResult {
    /// Grid as fractions of lambda_max, decreasing.
    pub lambdas: Vec<f64>,
    /// Mean held-out score per grid point.
    pub scores: Vec<f64>,
    /// Standard error of the mean per grid point.
    pub se: Vec<f64>,
    pub index_min: usize,
    pub index_1se: usize,
    pub lambda_min: f64,
    pub lambda_1se: f64,
    /// Full-data solution at the selected lambda.
    pub beta: Array1<f64>,
    pub sigma: Option<f64>,
    pub status: SolveStatus,
    pub method: Method,
    pub selected: Vec<usize>,
    /// Unpenalized, unconstrained least-squares refit on the selected
    /// support; absent for classification or an empty support.
    pub refit: Option<Array1<f64>>,
    pub skipped_folds: usize,
}

/// Mean held-out loss of `beta` on a dataset: squared error for the
/// regression formulations, (huberized) squared hinge for classification.
fn heldout_score(ds: &Dataset, formulation: &Formulation, beta: &Array1<f64>) -> f64 {
    let preds = ds.x().dot(beta);
    if formulation.classification {
        let rho = if formulation.huber {
            formulation.rho_classification
        } else {
            f64::NEG_INFINITY
        };
        let total: f64 = ds
            .y()
            .iter()
            .zip(preds.iter())
            .map(|(yi, pi)| hinge(yi * pi, rho))
            .sum();
        total / ds.n() as f64
    } else {
        let r = &preds - ds.y();
        r.dot(&r) / ds.n() as f64
    }
}

fn fold_bounds(n: usize, k: usize, f: usize) -> (usize, usize) {
    (f * n / k, (f + 1) * n / k)
}

pub fn cross_validate(
    ds: &Dataset,
    formulation: &Formulation,
    cfg: &CvConfig,
) -> Result<CvResult, LassoError> {
    let n = ds.n();
    if cfg.k < 2 || cfg.k > n {
        return Err(LassoError::InvalidFoldCount { k: cfg.k, n });
    }
    let grid = validated_grid(&cfg.lambdas)?;
    let method = choose_method(cfg.method, Task::CrossValidation, formulation, None, None);

    let mut order: Vec<usize> = (0..n).collect();
    if let Some(seed) = cfg.seed {
        order.shuffle(&mut StdRng::seed_from_u64(seed));
    }

    let fold_scores: Vec<Result<Vec<f64>, LassoError>> = (0..cfg.k)
        .into_par_iter()
        .map(|f| {
            let (lo, hi) = fold_bounds(n, cfg.k, f);
            let test_rows = &order[lo..hi];
            let train_rows: Vec<usize> = order[..lo]
                .iter()
                .chain(order[hi..].iter())
                .copied()
                .collect();
            let train = ds.subset(&train_rows);
            let test = ds.subset(test_rows);
            let path = solve_path(
                &train,
                formulation,
                &PathConfig {
                    lambdas: grid.clone(),
                    n_active: None,
                    method: Some(method),
                },
            )?;
            Ok(path
                .betas
                .iter()
                .map(|b| heldout_score(&test, formulation, b))
                .collect())
        })
        .collect();

    let mut per_fold: Vec<Vec<f64>> = Vec::with_capacity(cfg.k);
    let mut skipped_folds = 0;
    let mut last_failure = String::new();
    for r in fold_scores {
        match r {
            Ok(scores) if scores.len() == grid.len() => per_fold.push(scores),
            Ok(_) => skipped_folds += 1,
            Err(e) => {
                log::warn!("cross-validation fold failed: {e}");
                last_failure = e.to_string();
                skipped_folds += 1;
            }
        }
    }
    if per_fold.is_empty() {
        return Err(LassoError::AllIterationsFailed {
            total: cfg.k,
            last: last_failure,
        });
    }

    let m = per_fold.len() as f64;
    let mut scores = Vec::with_capacity(grid.len());
    let mut se = Vec::with_capacity(grid.len());
    for j in 0..grid.len() {
        let mean = per_fold.iter().map(|f| f[j]).sum::<f64>() / m;
        let var = if per_fold.len() > 1 {
            per_fold.iter().map(|f| (f[j] - mean).powi(2)).sum::<f64>() / (m - 1.0)
        } else {
            0.0
        };
        scores.push(mean);
        se.push((var / m).sqrt());
    }

    let mut index_min = 0;
    for (j, s) in scores.iter().enumerate() {
        if *s < scores[index_min] {
            index_min = j;
        }
    }
    let cutoff = scores[index_min] + se[index_min];
    let mut index_1se = index_min;
    for (j, s) in scores.iter().enumerate() {
        if *s <= cutoff {
            index_1se = j;
            break;
        }
    }

    let chosen = if cfg.one_se { index_1se } else { index_min };
    let spec = formulation.resolve(n);
    let lam_max = lambda_max(ds, &spec)?;
    let out = solve_fixed_lambda(ds, &spec, grid[chosen] * lam_max, method, WarmStart::default())?;
    let selected = support(&out.beta);
    let refit = if !formulation.classification && !selected.is_empty() {
        Some(ds.refit_least_squares(&selected)?)
    } else {
        None
    };

    Ok(CvResult {
        lambda_min: grid[index_min],
        lambda_1se: grid[index_1se],
        lambdas: grid,
        scores,
        se,
        index_min,
        index_1se,
        beta: out.beta,
        sigma: out.sigma,
        status: out.status,
        method,
        selected,
        refit,
        skipped_folds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2};
    use rand_distr::{Distribution, Normal};

    fn synthetic(n: usize, d: usize, seed: u64) -> (Dataset, Vec<usize>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0, 1.0).unwrap();
        let x = Array2::from_shape_fn((n, d), |_| normal.sample(&mut rng));
        let mut beta = Array1::zeros(d);
        for (i, v) in [1.5, -1.0, 2.0, -1.3, -1.2].into_iter().enumerate().take(d) {
            beta[i] = v;
        }
        let noise = Normal::new(0.0, 0.5).unwrap();
        let y = x.dot(&beta) + Array1::from_shape_fn(n, |_| noise.sample(&mut rng));
        (Dataset::with_zero_sum(x, y).unwrap(), vec![0, 1, 2, 3, 4])
    }

    fn ls_formulation() -> Formulation {
        Formulation {
            concomitant: false,
            ..Formulation::default()
        }
    }

    #[test]
    fn one_se_never_selects_below_the_minimum() {
        let (ds, _) = synthetic(40, 12, 7);
        let cfg = CvConfig {
            k: 4,
            lambdas: vec![0.8, 0.4, 0.2, 0.1, 0.05, 0.02],
            seed: Some(1),
            one_se: true,
            method: None,
        };
        let res = cross_validate(&ds, &ls_formulation(), &cfg).unwrap();
        assert!(res.index_1se <= res.index_min);
        assert!(res.lambda_1se >= res.lambda_min);
        assert_eq!(res.scores.len(), 6);
        assert_eq!(res.skipped_folds, 0);
    }

    #[test]
    fn fold_count_is_validated() {
        let (ds, _) = synthetic(10, 4, 3);
        let mut cfg = CvConfig::default();
        cfg.k = 1;
        assert!(matches!(
            cross_validate(&ds, &ls_formulation(), &cfg),
            Err(LassoError::InvalidFoldCount { .. })
        ));
        cfg.k = 11;
        assert!(cross_validate(&ds, &ls_formulation(), &cfg).is_err());
    }

    #[test]
    fn fold_assignment_is_reproducible() {
        let (ds, _) = synthetic(30, 8, 11);
        let cfg = CvConfig {
            k: 3,
            lambdas: vec![0.6, 0.3, 0.1],
            seed: Some(5),
            one_se: false,
            method: None,
        };
        let a = cross_validate(&ds, &ls_formulation(), &cfg).unwrap();
        let b = cross_validate(&ds, &ls_formulation(), &cfg).unwrap();
        assert_eq!(a.index_min, b.index_min);
        for (x, y) in a.scores.iter().zip(b.scores.iter()) {
            assert_eq!(x, y);
        }
    }

    #[test]
    fn refit_covers_the_selected_support() {
        let (ds, truth) = synthetic(50, 15, 19);
        let cfg = CvConfig {
            k: 5,
            lambdas: vec![0.8, 0.5, 0.3, 0.15, 0.08, 0.04],
            seed: Some(2),
            one_se: false,
            method: None,
        };
        let res = cross_validate(&ds, &ls_formulation(), &cfg).unwrap();
        assert!(!res.selected.is_empty());
        let refit = res.refit.expect("regression refit present");
        assert_eq!(refit.len(), ds.d());
        for j in 0..ds.d() {
            if !res.selected.contains(&j) {
                assert_eq!(refit[j], 0.0);
            }
        }
        // The strong truth coefficients should be recovered.
        let hits = truth.iter().filter(|j| res.selected.contains(j)).count();
        assert!(hits >= 3, "only {hits} of 5 truth coefficients selected");
    }
}
