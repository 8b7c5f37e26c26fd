//! Exact piecewise-linear solution paths (the homotopy / LARS-style solver).
//!
//! Between events the KKT conditions of the constrained weighted-l1 problem
//! are linear, so the coefficients are affine in lambda. The tracker walks
//! lambda downward from the first activation, solving one small saddle system
//! per segment and jumping to the nearest event: a coordinate entering the
//! active set, a coordinate leaving it, or (for classification losses) a
//! sample margin crossing a hinge threshold.
//!
//! Huber losses are handled by the residual-splitting augmentation of
//! [`super::PenalizedLs::huber`]: the offset block has a constant l1 price, so
//! its coordinates flow through the same event machinery with a zero penalty
//! slope. Classification tracks per-sample margin regions instead; samples
//! with satisfied margins drop out of the quadratic term and samples below the
//! huberized threshold contribute a constant gradient.

use ndarray::{s, Array1, Array2};

use super::{PenalizedLs, SolveOutcome, SolveStatus};
use crate::dataset::Dataset;
use crate::error::LassoError;
use crate::linalg::{chebyshev_center, solve_symmetric_indefinite, LinalgError};
use crate::losses::{margin_region, MarginRegion};
use crate::types::{FormulationKind, ResolvedFormulation};

/// Relative step below the current lambda an event must clear to count as
/// progress; guards against re-firing the event just applied.
const REL_EPS: f64 = 1e-10;

/// Events within this relative distance of the nearest one fire together.
const TIE_TOL: f64 = 1e-9;

const SEGMENT_CAP_BASE: usize = 100;

/// One affine piece of the path: beta(lambda) = beta0 + lambda * beta1 on
/// [lam_lo, lam_hi].
#[derive(Debug, Clone)]
struct Segment {
    lam_hi: f64,
    lam_lo: f64,
    beta0: Array1<f64>,
    beta1: Array1<f64>,
}

impl Segment {
    fn at(&self, lam: f64) -> Array1<f64> {
        &self.beta0 + &(lam * &self.beta1)
    }
}

/// A computed path, evaluable at any lambda at the cost of a segment scan.
pub struct Homotopy {
    n_beta: usize,
    entry_lam: f64,
    segments: Vec<Segment>,
    status: SolveStatus,
    ever_active: Vec<bool>,
    final_active: Vec<usize>,
    stopped_at_cap: bool,
}

impl Homotopy {
    /// Coefficients at `lam`. Above the first activation the solution is
    /// identically zero; below the last computed segment the path is frozen
    /// at its endpoint.
    pub fn eval(&self, lam: f64) -> Array1<f64> {
        if lam >= self.entry_lam || self.segments.is_empty() {
            return Array1::zeros(self.n_beta);
        }
        for seg in &self.segments {
            if lam <= seg.lam_hi && lam >= seg.lam_lo {
                return seg.at(lam);
            }
        }
        match self.segments.last() {
            Some(last) => last.at(last.lam_lo),
            None => Array1::zeros(self.n_beta),
        }
    }

    /// Lambda where the first coefficient activates (the true lambda_max of
    /// the constrained problem).
    pub fn entry_lam(&self) -> f64 {
        self.entry_lam
    }

    /// Smallest lambda the path reaches.
    pub fn min_lam(&self) -> f64 {
        self.segments.last().map_or(self.entry_lam, |s| s.lam_lo)
    }

    pub fn status(&self) -> SolveStatus {
        self.status
    }

    pub fn segments(&self) -> usize {
        self.segments.len()
    }

    /// Per-coordinate indicator of ever having been active along the path.
    pub fn ever_active(&self) -> &[bool] {
        &self.ever_active
    }

    /// Coordinates active when the walk stopped.
    pub fn final_active(&self) -> &[usize] {
        &self.final_active
    }

    /// True when the walk stopped because the active-set cap was reached
    /// rather than because it hit the lambda floor.
    pub fn stopped_at_active_cap(&self) -> bool {
        self.stopped_at_cap
    }
}

enum Event {
    Enter(usize),
    Leave(usize),
    MarginAtOne(usize),
    MarginAtRho(usize),
}

/// Path coefficients of one segment: theta and the multipliers of the
/// enforced constraint rows, both affine in lambda.
struct SegmentCoef {
    theta0: Array1<f64>,
    theta1: Array1<f64>,
    nu0: Array1<f64>,
    nu1: Array1<f64>,
}

struct Tracker {
    a: Array2<f64>,
    b: Array1<f64>,
    g: Array2<f64>,
    pen_slope: Array1<f64>,
    pen_offset: Array1<f64>,
    n_beta: usize,
    /// Hinge lower threshold for classification; `None` for regression
    /// losses (every row stays quadratic).
    margin_rho: Option<f64>,
    region: Vec<MarginRegion>,
    /// Design with non-quadratic rows zeroed; equal to `a` for regression.
    aq: Array2<f64>,
    /// Constant gradient contributed by linear-region rows.
    g0: Array1<f64>,
    g_row_scale: Vec<f64>,
}

impl Tracker {
    fn regression(p: PenalizedLs) -> Self {
        let aq = p.a.clone();
        let g_row_scale = row_scales(&p.g);
        let d_all = p.a.ncols();
        Tracker {
            a: p.a,
            b: p.b,
            g: p.g,
            pen_slope: p.pen_slope,
            pen_offset: p.pen_offset,
            n_beta: p.n_beta,
            margin_rho: None,
            region: Vec::new(),
            aq,
            g0: Array1::zeros(d_all),
            g_row_scale,
        }
    }

    fn classification(ds: &Dataset, rho: f64) -> Self {
        let d = ds.d();
        let region = vec![margin_region(0.0, rho); ds.n()];
        let g_row_scale = row_scales(ds.c());
        let mut t = Tracker {
            a: ds.x().clone(),
            b: ds.y().clone(),
            g: ds.c().clone(),
            pen_slope: Array1::ones(d),
            pen_offset: Array1::zeros(d),
            n_beta: d,
            margin_rho: Some(rho),
            region,
            aq: Array2::zeros((ds.n(), d)),
            g0: Array1::zeros(d),
            g_row_scale,
        };
        t.refresh_regions();
        t
    }

    /// Rebuild the masked design and the linear-region gradient after any
    /// region flip.
    fn refresh_regions(&mut self) {
        let rho = match self.margin_rho {
            Some(r) => r,
            None => return,
        };
        self.aq.assign(&self.a);
        let mut wlin = Array1::zeros(self.b.len());
        for (i, region) in self.region.iter().enumerate() {
            match region {
                MarginRegion::Quadratic => {}
                MarginRegion::Satisfied => self.aq.row_mut(i).fill(0.0),
                MarginRegion::Linear => {
                    self.aq.row_mut(i).fill(0.0);
                    wlin[i] = -2.0 * (1.0 - rho) * self.b[i];
                }
            }
        }
        self.g0 = self.a.t().dot(&wlin);
    }

    /// Constraint rows with a nonzero coefficient on the active set; only
    /// these are enforced on the current segment, the rest keep their frozen
    /// multiplier.
    fn enforced_rows(&self, active: &[usize]) -> Vec<usize> {
        (0..self.g.nrows())
            .filter(|&r| {
                let tol = 1e-12 * self.g_row_scale[r].max(1.0);
                active.iter().any(|&j| self.g[[r, j]].abs() > tol)
            })
            .collect()
    }

    /// Solve the stationarity system of the active set for the affine
    /// coefficients of the current segment.
    fn solve_kkt(
        &self,
        active: &[usize],
        sign: &[f64],
        enforced: &[usize],
    ) -> Result<SegmentCoef, LinalgError> {
        let d_all = self.a.ncols();
        let m = active.len();
        let ke = enforced.len();
        let dim = m + ke;
        if dim == 0 {
            return Ok(SegmentCoef {
                theta0: Array1::zeros(d_all),
                theta1: Array1::zeros(d_all),
                nu0: Array1::zeros(0),
                nu1: Array1::zeros(0),
            });
        }

        let mut mat = Array2::zeros((dim, dim));
        for (p, &jp) in active.iter().enumerate() {
            let col_p = self.aq.column(jp);
            for (q, &jq) in active.iter().enumerate().skip(p) {
                let v = 2.0 * col_p.dot(&self.aq.column(jq));
                mat[[p, q]] = v;
                mat[[q, p]] = v;
            }
            for (r, &row) in enforced.iter().enumerate() {
                mat[[p, m + r]] = self.g[[row, jp]];
                mat[[m + r, p]] = self.g[[row, jp]];
            }
        }

        let mut rhs0 = Array1::zeros(dim);
        let mut rhs1 = Array1::zeros(dim);
        for (p, &jp) in active.iter().enumerate() {
            rhs0[p] =
                2.0 * self.aq.column(jp).dot(&self.b) - self.pen_offset[jp] * sign[p] - self.g0[jp];
            rhs1[p] = -self.pen_slope[jp] * sign[p];
        }

        let x0 = solve_symmetric_indefinite(&mat, &rhs0)?;
        let x1 = solve_symmetric_indefinite(&mat, &rhs1)?;

        let mut theta0 = Array1::zeros(d_all);
        let mut theta1 = Array1::zeros(d_all);
        for (p, &jp) in active.iter().enumerate() {
            theta0[jp] = x0[p];
            theta1[jp] = x1[p];
        }
        Ok(SegmentCoef {
            theta0,
            theta1,
            nu0: x0.slice(s![m..]).to_owned(),
            nu1: x1.slice(s![m..]).to_owned(),
        })
    }

    /// Affine expansions of the subgradient correlations (c0 + lambda c1 per
    /// coordinate) and of the predictions (pred0 + lambda pred1 per sample).
    fn correlations(
        &self,
        coef: &SegmentCoef,
        enforced: &[usize],
        nu_frozen: &Array1<f64>,
    ) -> (Array1<f64>, Array1<f64>, Array1<f64>, Array1<f64>) {
        let pred0 = self.a.dot(&coef.theta0);
        let pred1 = self.a.dot(&coef.theta1);
        let r0 = &pred0 - &self.b;

        let mut nu_eff0 = nu_frozen.clone();
        let mut nu_eff1 = Array1::zeros(self.g.nrows());
        for (idx, &row) in enforced.iter().enumerate() {
            nu_eff0[row] = coef.nu0[idx];
            nu_eff1[row] = coef.nu1[idx];
        }

        let c0 = 2.0 * self.aq.t().dot(&r0) + &self.g0 + &self.g.t().dot(&nu_eff0);
        let c1 = 2.0 * self.aq.t().dot(&pred1) + &self.g.t().dot(&nu_eff1);
        (c0, c1, pred0, pred1)
    }

    fn run(mut self, lam_floor: f64, max_active: Option<usize>) -> Result<Homotopy, LassoError> {
        let d_all = self.a.ncols();
        let n_beta = self.n_beta;
        let mut ever_active = vec![false; n_beta];

        let mut active: Vec<usize> = Vec::new();
        let mut sign: Vec<f64> = Vec::new();
        // The offset block of a Huber augmentation is active wherever the
        // zero-coefficient residual already exceeds the threshold.
        for j in n_beta..d_all {
            let i = j - n_beta;
            let price = self.pen_offset[j] / 2.0;
            if self.b[i].abs() > price {
                active.push(j);
                sign.push(-self.b[i].signum());
            }
        }

        let mut nu_frozen = Array1::zeros(self.g.nrows());
        let coef0 = self
            .solve_kkt(&active, &sign, &[])
            .map_err(LassoError::from)?;
        let (c0_init, _, _, _) = self.correlations(&coef0, &[], &nu_frozen);
        let v = c0_init.slice(s![..n_beta]).mapv(|x| -x);
        let g_beta = self.g.slice(s![.., ..n_beta]);
        let (nu_entry, entry_lam) = chebyshev_center(&v, g_beta)?;
        nu_frozen.assign(&nu_entry);

        if !(entry_lam > lam_floor) || entry_lam <= f64::MIN_POSITIVE {
            return Ok(Homotopy {
                n_beta,
                entry_lam,
                segments: Vec::new(),
                status: SolveStatus::Converged,
                ever_active,
                final_active: Vec::new(),
                stopped_at_cap: false,
            });
        }

        // Tight coordinates at the entry point form the first active set.
        let gt_nu = self.g.t().dot(&nu_frozen);
        for j in 0..n_beta {
            let c = c0_init[j] + gt_nu[j];
            if c.abs() >= entry_lam * (1.0 - 1e-8) {
                active.push(j);
                sign.push(-c.signum());
                ever_active[j] = true;
            }
        }

        let seg_cap = SEGMENT_CAP_BASE + 8 * (d_all + self.a.nrows());
        let mut segments: Vec<Segment> = Vec::new();
        let mut status = SolveStatus::Converged;
        let mut stopped_at_cap = false;
        let mut lam = entry_lam;

        loop {
            let beta_count = active.iter().filter(|&&j| j < n_beta).count();
            if let Some(cap) = max_active {
                if beta_count >= cap {
                    stopped_at_cap = true;
                    break;
                }
            }
            let enforced = self.enforced_rows(&active);
            let coef = match self.solve_kkt(&active, &sign, &enforced) {
                Ok(c) => c,
                Err(LinalgError::SingularKkt { residual }) => {
                    log::debug!(
                        "degenerate active set at lambda {lam:.3e} (residual {residual:.3e}); \
                         freezing the path"
                    );
                    status = SolveStatus::MaxIterationsReached;
                    break;
                }
                Err(e) => return Err(e.into()),
            };
            let (c0, c1, pred0, pred1) = self.correlations(&coef, &enforced, &nu_frozen);

            let mut candidates: Vec<(f64, Event)> = Vec::new();
            let upper = lam * (1.0 - REL_EPS);
            let push = |cand: f64, ev: Event, candidates: &mut Vec<(f64, Event)>| {
                if cand.is_finite() && cand > 0.0 && cand < upper {
                    candidates.push((cand, ev));
                }
            };

            for j in 0..d_all {
                if active.contains(&j) {
                    continue;
                }
                let u = self.pen_slope[j];
                let cw = self.pen_offset[j];
                // c0 + lam c1 = +(lam u + cw) and the mirror case.
                let denom_pos = c1[j] - u;
                if denom_pos.abs() > f64::MIN_POSITIVE {
                    push((cw - c0[j]) / denom_pos, Event::Enter(j), &mut candidates);
                }
                let denom_neg = c1[j] + u;
                if denom_neg.abs() > f64::MIN_POSITIVE {
                    push(-(cw + c0[j]) / denom_neg, Event::Enter(j), &mut candidates);
                }
            }
            for (p, &jp) in active.iter().enumerate() {
                if coef.theta1[jp].abs() > f64::MIN_POSITIVE {
                    push(
                        -coef.theta0[jp] / coef.theta1[jp],
                        Event::Leave(p),
                        &mut candidates,
                    );
                }
            }
            if let Some(rho) = self.margin_rho {
                for i in 0..self.b.len() {
                    let mu0 = self.b[i] * pred0[i];
                    let mu1 = self.b[i] * pred1[i];
                    if mu1.abs() <= f64::MIN_POSITIVE {
                        continue;
                    }
                    match self.region[i] {
                        MarginRegion::Satisfied | MarginRegion::Quadratic => {
                            push((1.0 - mu0) / mu1, Event::MarginAtOne(i), &mut candidates);
                        }
                        MarginRegion::Linear => {}
                    }
                    if rho.is_finite() {
                        match self.region[i] {
                            MarginRegion::Quadratic | MarginRegion::Linear => {
                                push((rho - mu0) / mu1, Event::MarginAtRho(i), &mut candidates);
                            }
                            MarginRegion::Satisfied => {}
                        }
                    }
                }
            }

            let lam_next = candidates
                .iter()
                .map(|(l, _)| *l)
                .fold(f64::NEG_INFINITY, f64::max);
            let lam_lo = lam_next.max(lam_floor);
            segments.push(Segment {
                lam_hi: lam,
                lam_lo,
                beta0: coef.theta0.slice(s![..n_beta]).to_owned(),
                beta1: coef.theta1.slice(s![..n_beta]).to_owned(),
            });
            if !(lam_next > lam_floor) {
                break;
            }

            // Freeze the multipliers at the event before the enforced set can
            // change underneath them.
            for (idx, &row) in enforced.iter().enumerate() {
                nu_frozen[row] = coef.nu0[idx] + lam_next * coef.nu1[idx];
            }

            let mut leaving: Vec<usize> = Vec::new();
            let mut margin_flip = false;
            for (cand, ev) in &candidates {
                if *cand < lam_next * (1.0 - TIE_TOL) {
                    continue;
                }
                match *ev {
                    Event::Enter(j) => {
                        if !active.contains(&j) {
                            let c = c0[j] + lam_next * c1[j];
                            active.push(j);
                            sign.push(-c.signum());
                            if j < n_beta {
                                ever_active[j] = true;
                            }
                        }
                    }
                    Event::Leave(p) => leaving.push(p),
                    Event::MarginAtOne(i) => {
                        self.region[i] = match self.region[i] {
                            MarginRegion::Satisfied => MarginRegion::Quadratic,
                            _ => MarginRegion::Satisfied,
                        };
                        margin_flip = true;
                    }
                    Event::MarginAtRho(i) => {
                        self.region[i] = match self.region[i] {
                            MarginRegion::Linear => MarginRegion::Quadratic,
                            _ => MarginRegion::Linear,
                        };
                        margin_flip = true;
                    }
                }
            }
            leaving.sort_unstable();
            for &p in leaving.iter().rev() {
                active.remove(p);
                sign.remove(p);
            }
            if margin_flip {
                self.refresh_regions();
            }

            lam = lam_next;
            if segments.len() >= seg_cap {
                log::debug!("path exceeded {seg_cap} segments; freezing at lambda {lam:.3e}");
                status = SolveStatus::MaxIterationsReached;
                break;
            }
        }

        let final_active = active.iter().copied().filter(|&j| j < n_beta).collect();
        Ok(Homotopy {
            n_beta,
            entry_lam,
            segments,
            status,
            ever_active,
            final_active,
            stopped_at_cap,
        })
    }
}

fn row_scales(g: &Array2<f64>) -> Vec<f64> {
    (0..g.nrows())
        .map(|r| g.row(r).iter().map(|v| v.abs()).fold(0.0, f64::max))
        .collect()
}

pub fn homotopy_ls(
    ds: &Dataset,
    lam_floor: f64,
    max_active: Option<usize>,
) -> Result<Homotopy, LassoError> {
    Tracker::regression(PenalizedLs::ls(ds)).run(lam_floor, max_active)
}

pub fn homotopy_huber(
    ds: &Dataset,
    rho: f64,
    lam_floor: f64,
    max_active: Option<usize>,
) -> Result<Homotopy, LassoError> {
    Tracker::regression(PenalizedLs::huber(ds, rho)).run(lam_floor, max_active)
}

pub fn homotopy_classification(
    ds: &Dataset,
    rho_margin: f64,
    lam_floor: f64,
    max_active: Option<usize>,
) -> Result<Homotopy, LassoError> {
    Tracker::classification(ds, rho_margin).run(lam_floor, max_active)
}

/// Path for any of the non-concomitant formulations. Concomitant paths are
/// driven by the scale fixed point in the path layer and do not come through
/// here directly.
pub fn homotopy_for(
    ds: &Dataset,
    spec: &ResolvedFormulation,
    lam_floor: f64,
    max_active: Option<usize>,
) -> Result<Homotopy, LassoError> {
    match spec.kind {
        FormulationKind::Huber | FormulationKind::ConcomitantHuber => {
            homotopy_huber(ds, spec.rho, lam_floor, max_active)
        }
        FormulationKind::Classification => {
            homotopy_classification(ds, f64::NEG_INFINITY, lam_floor, max_active)
        }
        FormulationKind::HuberClassification => {
            homotopy_classification(ds, spec.rho_classification, lam_floor, max_active)
        }
        FormulationKind::Ls | FormulationKind::Concomitant => homotopy_ls(ds, lam_floor, max_active),
    }
}

/// Single-point solve through the path: exact and parameter free, the default
/// algorithm for every formulation that admits it.
pub fn point_solve(
    ds: &Dataset,
    spec: &ResolvedFormulation,
    lam_abs: f64,
) -> Result<SolveOutcome, LassoError> {
    let h = homotopy_for(ds, spec, lam_abs, None)?;
    Ok(SolveOutcome {
        beta: h.eval(lam_abs),
        sigma: None,
        status: h.status(),
        iterations: h.segments(),
        residual: 0.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lambda::lambda_max;
    use crate::solvers::pds::{p_pds, SmoothLoss};
    use crate::types::Formulation;
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

    #[test]
    fn path_is_zero_above_entry() {
        let ds = toy();
        let h = homotopy_ls(&ds, 1e-3, None).unwrap();
        let above = h.eval(h.entry_lam() * 1.5);
        assert!(above.iter().all(|v| *v == 0.0));
        // The constrained entry point cannot exceed the unconstrained bound.
        let spec = Formulation {
            concomitant: false,
            ..Formulation::default()
        }
        .resolve(ds.n());
        assert!(h.entry_lam() <= lambda_max(&ds, &spec).unwrap() + 1e-12);
    }

    #[test]
    fn path_solution_is_feasible_along_the_way() {
        let ds = toy();
        let h = homotopy_ls(&ds, 1e-3, None).unwrap();
        for frac in [0.9, 0.5, 0.2, 0.05] {
            let beta = h.eval(h.entry_lam() * frac);
            let sum: f64 = beta.iter().sum();
            assert!(sum.abs() < 1e-8, "infeasible at fraction {frac}: {sum}");
        }
    }

    #[test]
    fn matches_iterative_solver_at_a_point() {
        let ds = toy();
        let spec = Formulation {
            concomitant: false,
            ..Formulation::default()
        }
        .resolve(ds.n());
        let lam = 0.4;
        let exact = point_solve(&ds, &spec, lam).unwrap();
        let iterative = p_pds(&ds, SmoothLoss::ls(&ds), lam, None).unwrap();
        for (a, b) in exact.beta.iter().zip(iterative.beta.iter()) {
            assert!((a - b).abs() < 1e-4, "{a} vs {b}");
        }
    }

    #[test]
    fn huber_path_matches_iterative_solver() {
        let ds = toy();
        let rho = 0.6;
        let lam = 0.3;
        let h = homotopy_huber(&ds, rho, lam, None).unwrap();
        let exact = h.eval(lam);
        let iterative = p_pds(&ds, SmoothLoss::huber(&ds, rho), lam, None).unwrap();
        for (a, b) in exact.iter().zip(iterative.beta.iter()) {
            assert!((a - b).abs() < 1e-4, "{a} vs {b}");
        }
    }

    #[test]
    fn classification_path_matches_iterative_solver() {
        let x = arr2(&[
            [0.8, -0.2, 0.1],
            [-0.5, 0.9, -0.3],
            [0.3, 0.4, -0.9],
            [-0.7, -0.1, 0.6],
            [0.2, -0.8, 0.5],
        ]);
        let y = arr1(&[1.0, -1.0, 1.0, -1.0, 1.0]);
        let ds = Dataset::with_zero_sum(x, y).unwrap();
        let lam = 0.5;
        let h = homotopy_classification(&ds, f64::NEG_INFINITY, lam, None).unwrap();
        let exact = h.eval(lam);
        let iterative = p_pds(&ds, SmoothLoss::hinge(&ds, f64::NEG_INFINITY), lam, None).unwrap();
        for (a, b) in exact.iter().zip(iterative.beta.iter()) {
            assert!((a - b).abs() < 1e-4, "{a} vs {b}");
        }
    }

    #[test]
    fn active_cap_stops_the_walk_early() {
        let ds = toy();
        let h = homotopy_ls(&ds, 1e-6, Some(1)).unwrap();
        assert!(h.stopped_at_active_cap());
        assert!(h.min_lam() > 1e-6);
    }

    #[test]
    fn ever_active_covers_final_active() {
        let ds = toy();
        let h = homotopy_ls(&ds, 1e-3, None).unwrap();
        for &j in h.final_active() {
            assert!(h.ever_active()[j]);
        }
    }
}
