use ndarray::{Array1, Array2, Axis};

use crate::error::LassoError;
use crate::linalg::SpdFactor;
use crate::types::SUPPORT_THRESHOLD;

/// Input triple (X, C, y) for the constrained problem y ~ X beta with
/// C beta = 0. Immutable for the duration of any solve; resampling procedures
/// work on row subsets copied out per iteration.
#[derive(Debug, Clone)]
pub struct Dataset {
    x: Array2<f64>,
    y: Array1<f64>,
    c: Array2<f64>,
}

impl Dataset {
    /// Validates shapes before any numerical work.
    pub fn new(x: Array2<f64>, y: Array1<f64>, c: Array2<f64>) -> Result<Self, LassoError> {
        let (n, d) = x.dim();
        if y.len() != n || c.ncols() != d || c.nrows() == 0 {
            return Err(LassoError::DimensionMismatch {
                n,
                d,
                y_len: y.len(),
                k: c.nrows(),
                c_cols: c.ncols(),
            });
        }
        Ok(Dataset { x, y, c })
    }

    /// The default constraint: a single all-ones row, so the coefficients sum
    /// to zero.
    pub fn with_zero_sum(x: Array2<f64>, y: Array1<f64>) -> Result<Self, LassoError> {
        let d = x.ncols();
        let c = Array2::from_elem((1, d), 1.0);
        Dataset::new(x, y, c)
    }

    pub fn n(&self) -> usize {
        self.x.nrows()
    }

    pub fn d(&self) -> usize {
        self.x.ncols()
    }

    pub fn k(&self) -> usize {
        self.c.nrows()
    }

    pub fn x(&self) -> &Array2<f64> {
        &self.x
    }

    pub fn y(&self) -> &Array1<f64> {
        &self.y
    }

    pub fn c(&self) -> &Array2<f64> {
        &self.c
    }

    /// Row subset for resampling; the constraint matrix applies unchanged.
    pub fn subset(&self, rows: &[usize]) -> Dataset {
        let x = self.x.select(Axis(0), rows);
        let y = self.y.select(Axis(0), rows);
        Dataset {
            x,
            y,
            c: self.c.clone(),
        }
    }

    /// Unregularized least-squares refit restricted to a support. The refit
    /// deliberately drops both the l1 penalty and the equality constraint; it
    /// is the magnitude estimate reported next to a selected support. A tiny
    /// ridge keeps the normal equations solvable when the support is larger
    /// than the sample count.
    pub fn refit_least_squares(&self, support: &[usize]) -> Result<Array1<f64>, LassoError> {
        let d = self.d();
        let mut beta = Array1::zeros(d);
        if support.is_empty() {
            return Ok(beta);
        }
        let xs = self.x.select(Axis(1), support);
        let mut gram = xs.t().dot(&xs);
        let jitter = 1e-10 * gram.diag().iter().fold(1.0, |a: f64, b| a.max(b.abs()));
        for i in 0..gram.nrows() {
            gram[[i, i]] += jitter;
        }
        let rhs = xs.t().dot(&self.y);
        let factor = SpdFactor::new(&gram)?;
        let coef = factor.solve_vec(&rhs)?;
        for (pos, &j) in support.iter().enumerate() {
            beta[j] = coef[pos];
        }
        Ok(beta)
    }
}

/// Indices of coefficients above the support threshold.
pub fn support(beta: &Array1<f64>) -> Vec<usize> {
    beta.iter()
        .enumerate()
        .filter(|(_, v)| v.abs() > SUPPORT_THRESHOLD)
        .map(|(j, _)| j)
        .collect()
}

/// Boolean mask form of `support`.
pub fn selected_mask(beta: &Array1<f64>) -> Vec<bool> {
    beta.iter().map(|v| v.abs() > SUPPORT_THRESHOLD).collect()
}
