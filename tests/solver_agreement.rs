use eqlasso::losses::objective;
use eqlasso::solvers::{solve_fixed_lambda, WarmStart};
use eqlasso::{lambda_max, Dataset, Formulation, Method, FEASIBILITY_TOL};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

fn generate_regression(n: usize, d: usize, noise: f64, seed: u64) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, 1.0).unwrap();
    let x = Array2::from_shape_fn((n, d), |_| normal.sample(&mut rng));
    let mut beta = Array1::zeros(d);
    beta[0] = 1.5;
    beta[1] = -1.0;
    beta[2] = 2.0;
    beta[3] = -1.3;
    beta[4] = -1.2;
    let eps = Normal::new(0.0, noise).unwrap();
    let y = x.dot(&beta) + Array1::from_shape_fn(n, |_| eps.sample(&mut rng));
    Dataset::with_zero_sum(x, y).unwrap()
}

fn ls_formulation() -> Formulation {
    Formulation {
        concomitant: false,
        ..Formulation::default()
    }
}

fn assert_close(a: &Array1<f64>, b: &Array1<f64>, tol: f64, label: &str) {
    for (j, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        assert!(
            (x - y).abs() < tol,
            "{label}: coordinate {j} differs, {x} vs {y}"
        );
    }
}

fn assert_feasible(beta: &Array1<f64>, label: &str) {
    let sum: f64 = beta.iter().sum();
    assert!(sum.abs() < FEASIBILITY_TOL, "{label}: sum(beta) = {sum}");
}

#[test]
fn all_four_methods_agree_on_least_squares() {
    let ds = generate_regression(20, 8, 0.3, 3);
    let spec = ls_formulation().resolve(ds.n());
    let lam = 0.3 * lambda_max(&ds, &spec).unwrap();
    let reference = solve_fixed_lambda(&ds, &spec, lam, Method::PathAlg, WarmStart::default())
        .unwrap();
    assert_feasible(&reference.beta, "Path-Alg");
    for method in [Method::Ppds, Method::PfPds, Method::Dr] {
        let out = solve_fixed_lambda(&ds, &spec, lam, method, WarmStart::default()).unwrap();
        assert_feasible(&out.beta, &method.to_string());
        assert_close(&reference.beta, &out.beta, 2e-3, &method.to_string());
    }
}

#[test]
fn huber_methods_agree() {
    let ds = generate_regression(24, 10, 0.4, 9);
    let spec = Formulation {
        huber: true,
        concomitant: false,
        ..Formulation::default()
    }
    .resolve(ds.n());
    let lam = 0.25 * lambda_max(&ds, &spec).unwrap();
    let reference = solve_fixed_lambda(&ds, &spec, lam, Method::PathAlg, WarmStart::default())
        .unwrap();
    for method in [Method::Ppds, Method::PfPds, Method::Dr] {
        let out = solve_fixed_lambda(&ds, &spec, lam, method, WarmStart::default()).unwrap();
        assert_feasible(&out.beta, &method.to_string());
        assert_close(&reference.beta, &out.beta, 2e-3, &method.to_string());
    }
}

#[test]
fn warm_started_huber_douglas_rachford_matches_cold_start() {
    let ds = generate_regression(24, 10, 0.4, 9);
    let spec = Formulation {
        huber: true,
        concomitant: false,
        ..Formulation::default()
    }
    .resolve(ds.n());
    let lam = 0.25 * lambda_max(&ds, &spec).unwrap();
    let cold = solve_fixed_lambda(&ds, &spec, lam, Method::Dr, WarmStart::default()).unwrap();
    // The warm coefficient block is shorter than the augmented problem; the
    // solver pads it and must land on the same fixed point.
    let warm = WarmStart {
        beta: Some(&cold.beta),
        sigma: None,
    };
    let rerun = solve_fixed_lambda(&ds, &spec, lam, Method::Dr, warm).unwrap();
    assert_feasible(&rerun.beta, "warm Huber DR");
    assert_close(&cold.beta, &rerun.beta, 1e-4, "warm Huber DR");
}

#[test]
fn path_solution_is_a_constrained_minimizer() {
    let ds = generate_regression(20, 8, 0.3, 17);
    let spec = ls_formulation().resolve(ds.n());
    let lam = 0.2 * lambda_max(&ds, &spec).unwrap();
    let out = solve_fixed_lambda(&ds, &spec, lam, Method::PathAlg, WarmStart::default()).unwrap();
    let base = objective(&ds, &spec, &out.beta, None, lam);
    let mut rng = StdRng::seed_from_u64(99);
    let normal = Normal::new(0.0, 0.05).unwrap();
    for _ in 0..20 {
        // Feasible perturbations: zero-mean steps keep the zero-sum
        // constraint satisfied.
        let mut delta = Array1::from_shape_fn(ds.d(), |_| normal.sample(&mut rng));
        let mean = delta.sum() / ds.d() as f64;
        delta.mapv_inplace(|v| v - mean);
        let perturbed = objective(&ds, &spec, &(&out.beta + &delta), None, lam);
        assert!(perturbed >= base - 1e-6 * (1.0 + base.abs()));
    }
}

#[test]
fn concomitant_scale_is_the_residual_fixed_point() {
    let ds = generate_regression(30, 10, 0.4, 21);
    let formulation = Formulation::default();
    let spec = formulation.resolve(ds.n());
    let lam = 0.3 * lambda_max(&ds, &spec).unwrap();
    let exact = solve_fixed_lambda(&ds, &spec, lam, Method::PathAlg, WarmStart::default())
        .unwrap();
    let sigma = exact.sigma.expect("concomitant scale");
    let r = ds.x().dot(&exact.beta) - ds.y();
    let implied = r.dot(&r).sqrt() / spec.e.sqrt();
    assert!(
        (sigma - implied).abs() < 1e-4 * implied.max(1e-12),
        "sigma {sigma} vs residual scale {implied}"
    );

    let dr = solve_fixed_lambda(&ds, &spec, lam, Method::Dr, WarmStart::default()).unwrap();
    assert_close(&exact.beta, &dr.beta, 1e-2, "DR concomitant");
}

#[test]
fn classification_solvers_agree_and_reduce_the_loss() {
    let mut rng = StdRng::seed_from_u64(33);
    let normal = Normal::new(0.0, 1.0).unwrap();
    let n = 30;
    let d = 8;
    let x = Array2::from_shape_fn((n, d), |_| normal.sample(&mut rng));
    let mut w = Array1::zeros(d);
    w[0] = 1.0;
    w[1] = -1.0;
    let y = x.dot(&w).mapv(|v| if v >= 0.0 { 1.0 } else { -1.0 });
    let ds = Dataset::with_zero_sum(x, y).unwrap();
    let spec = Formulation {
        classification: true,
        concomitant: false,
        ..Formulation::default()
    }
    .resolve(ds.n());
    let lam = 0.2 * lambda_max(&ds, &spec).unwrap();
    let exact = solve_fixed_lambda(&ds, &spec, lam, Method::PathAlg, WarmStart::default())
        .unwrap();
    let splitting = solve_fixed_lambda(&ds, &spec, lam, Method::Ppds, WarmStart::default())
        .unwrap();
    assert_close(&exact.beta, &splitting.beta, 2e-3, "P-PDS classification");
    let at_solution = objective(&ds, &spec, &exact.beta, None, lam);
    let at_zero = objective(&ds, &spec, &Array1::zeros(ds.d()), None, lam);
    assert!(at_solution <= at_zero + 1e-9);
}
