//! Estimator options — numerical tolerances and solve policy.
//!
//! Purpose
//! -------
//! Collect the few knobs that influence how the weight matrix is inverted,
//! so that call sites pass one validated value instead of loose flags.
//!
//! Key behaviors
//! -------------
//! - `rank_tolerance`: singular values below `rank_tolerance × σ_max` count
//!   as zero when deciding whether the weight matrix has full row rank.
//! - `degeneracy_tolerance`: a slot whose `|f − p|` is at most this value is
//!   reported as `FPError::DegenerateRatios` before any solve is attempted.
//! - `use_closed_form`: for two leptons with flat ratios, take the yields
//!   from the analytic tight/loose formulas instead of the SVD solve.
//!
//! Invariants & assumptions
//! ------------------------
//! - Both tolerances are finite and strictly positive; enforced by
//!   [`EstimatorOptions::new`].
use crate::fake_rates::errors::{FPError, FPResult};
use serde::{Deserialize, Serialize};

pub const DEFAULT_RANK_TOLERANCE: f64 = 1e-10;
pub const DEFAULT_DEGENERACY_TOLERANCE: f64 = 1e-9;

/// EstimatorOptions — validated solve configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EstimatorOptions {
    pub rank_tolerance: f64,
    pub degeneracy_tolerance: f64,
    pub use_closed_form: bool,
}

impl EstimatorOptions {
    /// Build options, validating both tolerances.
    ///
    /// Errors
    /// ------
    /// - `FPError::InvalidTolerance` when a tolerance is non-finite or `<= 0`.
    pub fn new(
        rank_tolerance: f64, degeneracy_tolerance: f64, use_closed_form: bool,
    ) -> FPResult<Self> {
        validate_tolerance("rank_tolerance", rank_tolerance)?;
        validate_tolerance("degeneracy_tolerance", degeneracy_tolerance)?;
        Ok(EstimatorOptions { rank_tolerance, degeneracy_tolerance, use_closed_form })
    }
}

impl Default for EstimatorOptions {
    fn default() -> Self {
        EstimatorOptions {
            rank_tolerance: DEFAULT_RANK_TOLERANCE,
            degeneracy_tolerance: DEFAULT_DEGENERACY_TOLERANCE,
            use_closed_form: true,
        }
    }
}

fn validate_tolerance(name: &'static str, value: f64) -> FPResult<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(FPError::InvalidTolerance { name, value });
    }
    Ok(())
}
