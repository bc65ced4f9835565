//! solve — inversion of the weight matrix and first-order error propagation.
//!
//! Purpose
//! -------
//! Turn observed topology counts into predicted FPConfig yields by solving
//! `Obs = W · N`, and produce everything the error queries need: the
//! statistical covariance of `N` and the gradient `∂N/∂θ` for every ratio
//! parameter.
//!
//! Key behaviors
//! -------------
//! - The solve goes through the SVD pseudo-inverse `W⁺`. For a square `W`
//!   (single flavor, or the flavor-split layout) this is the exact inverse;
//!   for the aggregate mixed-flavor layout (`rows < cols`) it is the
//!   minimum-norm solution, logged at `warn` because the split between
//!   configs is not determined by the counts.
//! - Rank below the number of topologies, measured with a singular-value
//!   cutoff relative to the largest singular value, is
//!   `FPError::SingularSystem`.
//! - Statistical covariance: `W⁺ · diag(Var(Obs)) · W⁺ᵀ`.
//! - Parameter gradient (full row rank):
//!   `∂N/∂θ = (I − W⁺W) · ∂Wᵀ/∂θ · W⁺ᵀ N − W⁺ · ∂W/∂θ · N`,
//!   which reduces to `−W⁻¹ · ∂W/∂θ · N` when `W` is square.
//!
//! Invariants & assumptions
//! ------------------------
//! - Columns of `W` sum to one, so `Σ N = Σ Obs` for every solution and the
//!   gradients of the total vanish.
//! - Inputs come from validated `Topology` / `WeightSystem` values; only the
//!   count length is re-checked here.
use crate::fake_rates::{
    core::options::EstimatorOptions,
    errors::{FPError, FPResult},
    weights::WeightSystem,
};
use nalgebra::{DMatrix, DVector};
use tracing::{debug, warn};

/// Solution — yields and first-order sensitivities of one solve.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    yields: DVector<f64>,
    pinv: DMatrix<f64>,
    stat_covariance: DMatrix<f64>,
    gradients: Vec<DVector<f64>>,
    rank: usize,
}

/// Solve `counts = W · N` for `N`.
///
/// Parameters
/// ----------
/// - `system`: weight matrix and its derivatives.
/// - `counts`, `variances`: observed topology counts and their variances,
///   indexed like the rows of `W`.
/// - `options`: rank tolerance.
///
/// Errors
/// ------
/// - `FPError::ShapeMismatch` when `counts` does not match the rows of `W`.
/// - `FPError::SingularSystem` when `W` does not have full row rank.
/// - `FPError::NonFiniteResult` when a yield is NaN or ±inf.
pub fn solve(
    system: &WeightSystem, counts: &DVector<f64>, variances: &DVector<f64>,
    options: &EstimatorOptions,
) -> FPResult<Solution> {
    let w = system.matrix();
    let (rows, cols) = w.shape();
    if counts.len() != rows || variances.len() != rows {
        return Err(FPError::ShapeMismatch { expected: rows, found: counts.len() });
    }

    let svd = w.clone().svd(true, true);
    let sigma_max = svd.singular_values.max();
    let sigma_min = svd.singular_values.min();
    let cutoff = options.rank_tolerance * sigma_max;
    let rank = svd.rank(cutoff);
    debug!(rows, cols, rank, sigma_max, sigma_min, "weight matrix decomposed");
    if rank < rows {
        return Err(FPError::SingularSystem { rank, required: rows });
    }
    if rank < cols {
        warn!(rank, cols, "FPConfig yields not identified; using the minimum-norm split");
    }
    let pinv = svd
        .pseudo_inverse(cutoff)
        .map_err(|_| FPError::SingularSystem { rank, required: rows })?;

    let yields = &pinv * counts;
    ensure_finite("yield", &yields)?;
    let stat_covariance = &pinv * DMatrix::from_diagonal(variances) * pinv.transpose();
    let gradients = parameter_gradients(system, &pinv, &yields);
    Ok(Solution { yields, pinv, stat_covariance, gradients, rank })
}

impl Solution {
    /// Replace the yields by an equivalent evaluation (the analytic closed
    /// form) and recompute the gradients at the new point.
    pub(crate) fn with_yields(
        mut self, system: &WeightSystem, yields: DVector<f64>,
    ) -> FPResult<Self> {
        ensure_finite("yield", &yields)?;
        self.gradients = parameter_gradients(system, &self.pinv, &yields);
        self.yields = yields;
        Ok(self)
    }

    pub fn yields(&self) -> &DVector<f64> {
        &self.yields
    }

    /// `W⁺`, i.e. `∂N/∂Obs`.
    pub fn pinv(&self) -> &DMatrix<f64> {
        &self.pinv
    }

    pub fn stat_covariance(&self) -> &DMatrix<f64> {
        &self.stat_covariance
    }

    /// `∂N/∂θ_k`, one vector per parameter.
    pub fn gradients(&self) -> &[DVector<f64>] {
        &self.gradients
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    /// `Σ_k σ_k² · (∂N/∂θ_k)(∂N/∂θ_k)ᵀ` for parameter errors `σ`.
    pub fn syst_covariance(&self, errors: &[f64]) -> DMatrix<f64> {
        let n = self.yields.len();
        let zero = DMatrix::<f64>::zeros(n, n);
        self.gradients
            .iter()
            .zip(errors)
            .fold(zero, |acc, (g, &sigma)| acc + g * g.transpose() * (sigma * sigma))
    }
}

// ---- Helper methods ----

fn parameter_gradients(
    system: &WeightSystem, pinv: &DMatrix<f64>, yields: &DVector<f64>,
) -> Vec<DVector<f64>> {
    let cols = pinv.nrows();
    let projector = DMatrix::<f64>::identity(cols, cols) - pinv * system.matrix();
    let dual = pinv.transpose() * yields;
    system
        .derivatives()
        .iter()
        .map(|dw| &projector * (dw.transpose() * &dual) - pinv * (dw * yields))
        .collect()
}

fn ensure_finite(what: &'static str, values: &DVector<f64>) -> FPResult<()> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(FPError::NonFiniteResult { what, index, value: values[index] }),
        None => Ok(()),
    }
}
