//! Stability selection: selection frequencies over random subsamples.
//!
//! Each of the B subsamples draws floor(percent * n) rows without replacement
//! and records which coefficients its estimator selects; frequencies are the
//! per-coordinate means of those indicators. Subsample seeds are derived
//! deterministically from the base seed, so runs are reproducible regardless
//! of the parallel schedule. A failing subsample (rank-deficient draw,
//! degenerate lambda_max) is skipped and counted; only a complete wipeout is
//! an error.

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::dataset::{selected_mask, Dataset};
use crate::error::LassoError;
use crate::lambda::lambda_max;
use crate::path::{solve_path, validated_grid, PathConfig};
use crate::select::choose_method;
use crate::solvers::{solve_fixed_lambda, WarmStart};
use crate::types::{Formulation, Method, StabSelConfig, StabSelVariant, Task};

#[derive(Debug, Clone)]
pub struct StabSelResult {
    /// Selection frequency per coefficient, in [0, 1].
    pub frequencies: Array1<f64>,
    /// Coefficients whose frequency exceeds the threshold.
    pub selected: Vec<usize>,
    pub threshold: f64,
    pub method: Method,
    pub completed: usize,
    pub skipped: usize,
    /// Absolute lambda of the full dataset for the fixed-lambda variant.
    pub lambda_abs: Option<f64>,
    /// Per-grid-point selection frequencies (grid rows by coefficient
    /// columns) for the truncated-path variant; the diagnostic curve behind
    /// `frequencies`.
    pub path_frequency: Option<Array2<f64>>,
    /// Grid matching the rows of `path_frequency`, as fractions of
    /// lambda_max, decreasing.
    pub lambdas: Option<Array1<f64>>,
}

/// What one subsample contributes: the aggregate indicator and, for the
/// truncated-path variant, the indicator at every grid point.
struct SubsampleSelection {
    ever: Vec<bool>,
    per_lambda: Option<Vec<Vec<bool>>>,
}

fn subsample_indicator(
    sub: &Dataset,
    formulation: &Formulation,
    cfg: &StabSelConfig,
    grid: &[f64],
    method: Method,
) -> Result<SubsampleSelection, LassoError> {
    match cfg.variant {
        StabSelVariant::First { q } => {
            let path = solve_path(
                sub,
                formulation,
                &PathConfig {
                    lambdas: grid.to_vec(),
                    n_active: Some(q),
                    method: Some(method),
                },
            )?;
            // A truncated path stays at its last support for the remaining
            // grid points.
            let mut per_lambda = Vec::with_capacity(grid.len());
            let mut last = vec![false; sub.d()];
            for i in 0..grid.len() {
                if i < path.betas.len() {
                    last = selected_mask(&path.betas[i]);
                }
                per_lambda.push(last.clone());
            }
            Ok(SubsampleSelection {
                ever: path.ever_active,
                per_lambda: Some(per_lambda),
            })
        }
        StabSelVariant::Max { lamin, hd } => {
            let mut lambdas: Vec<f64> = grid.iter().copied().filter(|&f| f >= lamin).collect();
            if lambdas.is_empty() {
                lambdas.extend(grid.iter().take(1));
            }
            let n_active = if hd {
                Some(sub.n().saturating_sub(sub.k()).max(1))
            } else {
                None
            };
            let path = solve_path(
                sub,
                formulation,
                &PathConfig {
                    lambdas,
                    n_active,
                    method: Some(method),
                },
            )?;
            Ok(SubsampleSelection {
                ever: path.ever_active,
                per_lambda: None,
            })
        }
        StabSelVariant::Lam { lam, true_lam } => {
            let spec = formulation.resolve(sub.n());
            let lam_abs = if true_lam {
                lam
            } else {
                lam * lambda_max(sub, &spec)?
            };
            let out = solve_fixed_lambda(sub, &spec, lam_abs, method, WarmStart::default())?;
            Ok(SubsampleSelection {
                ever: selected_mask(&out.beta),
                per_lambda: None,
            })
        }
    }
}

pub fn stability_selection(
    ds: &Dataset,
    formulation: &Formulation,
    cfg: &StabSelConfig,
) -> Result<StabSelResult, LassoError> {
    let n = ds.n();
    let d = ds.d();
    let ns = (cfg.percent_ns * n as f64).floor() as usize;
    if ns < 2 || ns > n {
        return Err(LassoError::EmptySubsample {
            percent: cfg.percent_ns,
            n,
        });
    }
    let grid = validated_grid(&cfg.lambdas)?;
    let lam_hint = match cfg.variant {
        StabSelVariant::Lam { lam, true_lam: false } => Some(lam),
        _ => None,
    };
    let method = choose_method(
        cfg.method,
        Task::StabilitySelection,
        formulation,
        Some(&cfg.variant),
        lam_hint,
    );

    let indicators: Vec<Result<SubsampleSelection, LassoError>> = (0..cfg.b)
        .into_par_iter()
        .map(|b| {
            let mut rng = StdRng::seed_from_u64(cfg.seed.wrapping_add(b as u64));
            let rows = rand::seq::index::sample(&mut rng, n, ns).into_vec();
            let sub = ds.subset(&rows);
            subsample_indicator(&sub, formulation, cfg, &grid, method)
        })
        .collect();

    let track_path = matches!(cfg.variant, StabSelVariant::First { .. });
    let mut counts = vec![0usize; d];
    let mut path_counts = vec![vec![0usize; d]; if track_path { grid.len() } else { 0 }];
    let mut completed = 0;
    let mut skipped = 0;
    let mut last_failure = String::new();
    for r in indicators {
        match r {
            Ok(sel) => {
                completed += 1;
                for (j, hit) in sel.ever.iter().enumerate() {
                    if *hit {
                        counts[j] += 1;
                    }
                }
                if let Some(per_lambda) = sel.per_lambda {
                    for (i, mask) in per_lambda.iter().enumerate() {
                        for (j, hit) in mask.iter().enumerate() {
                            if *hit {
                                path_counts[i][j] += 1;
                            }
                        }
                    }
                }
            }
            Err(e) => {
                log::warn!("stability subsample failed: {e}");
                last_failure = e.to_string();
                skipped += 1;
            }
        }
    }
    if completed == 0 {
        return Err(LassoError::AllIterationsFailed {
            total: cfg.b,
            last: last_failure,
        });
    }

    let frequencies =
        Array1::from_iter(counts.iter().map(|&c| c as f64 / completed as f64));
    let selected = frequencies
        .iter()
        .enumerate()
        .filter(|(_, f)| **f > cfg.threshold)
        .map(|(j, _)| j)
        .collect();
    let lambda_abs = match cfg.variant {
        StabSelVariant::Lam { lam, true_lam } => {
            if true_lam {
                Some(lam)
            } else {
                let spec = formulation.resolve(n);
                Some(lam * lambda_max(ds, &spec)?)
            }
        }
        _ => None,
    };

    let (path_frequency, lambdas) = if track_path {
        let curve = Array2::from_shape_fn((grid.len(), d), |(i, j)| {
            path_counts[i][j] as f64 / completed as f64
        });
        (Some(curve), Some(Array1::from_vec(grid.clone())))
    } else {
        (None, None)
    };

    Ok(StabSelResult {
        frequencies,
        selected,
        threshold: cfg.threshold,
        method,
        completed,
        skipped,
        lambda_abs,
        path_frequency,
        lambdas,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2};
    use rand_distr::{Distribution, Normal};

    fn synthetic(n: usize, d: usize, seed: u64) -> Dataset {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0, 1.0).unwrap();
        let x = Array2::from_shape_fn((n, d), |_| normal.sample(&mut rng));
        let mut beta = Array1::zeros(d);
        for (i, v) in [1.5, -1.0, 2.0, -1.3, -1.2].into_iter().enumerate().take(d) {
            beta[i] = v;
        }
        let noise = Normal::new(0.0, 0.5).unwrap();
        let y = x.dot(&beta) + Array1::from_shape_fn(n, |_| noise.sample(&mut rng));
        Dataset::with_zero_sum(x, y).unwrap()
    }

    fn ls_formulation() -> Formulation {
        Formulation {
            concomitant: false,
            ..Formulation::default()
        }
    }

    fn small_config() -> StabSelConfig {
        StabSelConfig {
            variant: StabSelVariant::First { q: 6 },
            b: 12,
            lambdas: vec![1.0, 0.6, 0.35, 0.2, 0.1, 0.05],
            ..StabSelConfig::default()
        }
    }

    #[test]
    fn frequencies_stay_in_range_and_runs_complete() {
        let ds = synthetic(40, 12, 23);
        let res = stability_selection(&ds, &ls_formulation(), &small_config()).unwrap();
        assert_eq!(res.frequencies.len(), 12);
        assert!(res.frequencies.iter().all(|f| (0.0..=1.0).contains(f)));
        assert_eq!(res.completed, 12);
        assert_eq!(res.skipped, 0);
    }

    #[test]
    fn same_seed_reproduces_frequencies_exactly() {
        let ds = synthetic(40, 12, 29);
        let a = stability_selection(&ds, &ls_formulation(), &small_config()).unwrap();
        let b = stability_selection(&ds, &ls_formulation(), &small_config()).unwrap();
        assert_eq!(a.frequencies, b.frequencies);
        assert_eq!(a.selected, b.selected);
    }

    #[test]
    fn strong_signals_dominate_the_frequencies() {
        let ds = synthetic(60, 18, 31);
        let res = stability_selection(&ds, &ls_formulation(), &small_config()).unwrap();
        // Coefficient 2 carries the largest signal; it should be picked at
        // least as often as the median noise coordinate.
        let noise_median = {
            let mut f: Vec<f64> = res.frequencies.iter().skip(5).copied().collect();
            f.sort_by(|a, b| a.partial_cmp(b).unwrap());
            f[f.len() / 2]
        };
        assert!(res.frequencies[2] >= noise_median);
    }

    #[test]
    fn truncated_path_variant_records_the_frequency_curve() {
        let ds = synthetic(40, 12, 23);
        let res = stability_selection(&ds, &ls_formulation(), &small_config()).unwrap();
        let curve = res.path_frequency.expect("truncated-path variant keeps the curve");
        let grid = res.lambdas.expect("curve rows carry their grid");
        assert_eq!(curve.dim(), (6, 12));
        assert_eq!(grid.len(), 6);
        assert!(curve.iter().all(|f| (0.0..=1.0).contains(f)));
        // Nothing is selected at lambda_max, and per-point frequencies never
        // exceed the ever-active aggregate.
        assert!(curve.row(0).iter().all(|f| *f == 0.0));
        for j in 0..12 {
            let col_max = curve.column(j).iter().fold(0.0f64, |a, b| a.max(*b));
            assert!(col_max <= res.frequencies[j] + 1e-12);
        }
    }

    #[test]
    fn fixed_lambda_variant_has_no_frequency_curve() {
        let ds = synthetic(40, 12, 37);
        let cfg = StabSelConfig {
            variant: StabSelVariant::Lam {
                lam: 0.3,
                true_lam: false,
            },
            b: 8,
            lambdas: vec![1.0, 0.5, 0.1],
            ..StabSelConfig::default()
        };
        let res = stability_selection(&ds, &ls_formulation(), &cfg).unwrap();
        assert!(res.path_frequency.is_none());
        assert!(res.lambdas.is_none());
    }

    #[test]
    fn fixed_lambda_variant_reports_its_lambda() {
        let ds = synthetic(40, 12, 37);
        let cfg = StabSelConfig {
            variant: StabSelVariant::Lam {
                lam: 0.3,
                true_lam: false,
            },
            b: 8,
            lambdas: vec![1.0, 0.5, 0.1],
            ..StabSelConfig::default()
        };
        let res = stability_selection(&ds, &ls_formulation(), &cfg).unwrap();
        let lam_abs = res.lambda_abs.expect("fixed-lambda variant");
        assert!(lam_abs > 0.0);
    }

    #[test]
    fn tiny_subsample_fraction_is_rejected() {
        let ds = synthetic(10, 4, 41);
        let cfg = StabSelConfig {
            percent_ns: 0.05,
            ..StabSelConfig::default()
        };
        assert!(matches!(
            stability_selection(&ds, &ls_formulation(), &cfg),
            Err(LassoError::EmptySubsample { .. })
        ));
    }
}
