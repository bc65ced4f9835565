//! fake_rates::errors — error taxonomy for the matrix-method estimator.
//!
//! Purpose
//! -------
//! Provide one error enum, [`FPError`], and one result alias, [`FPResult`],
//! for everything under `fake_rates`: configuration mistakes made by the
//! caller, numerical degeneracies of the fake/prompt inversion, and ratio
//! lookup failures.
//!
//! Key behaviors
//! -------------
//! - Configuration errors (length mismatches, missing ratios, ratios outside
//!   `[0, 1]`, building without a topology) are reported as soon as the
//!   offending input is seen.
//! - Degeneracies (`f == p`, rank-deficient weight matrix, empty topology)
//!   are distinguished variants so that callers can tell "not computable"
//!   apart from a legitimate zero.
//! - `From<FPError> for PyErr` maps every variant to a Python `ValueError`
//!   when the `python-bindings` feature is enabled.
//!
//! Conventions
//! -----------
//! - Indices are 0-based. Slot indices count electrons first, then muons.
//! - Messages are phrased in terms of the physics inputs ("fake ratio",
//!   "topology count") rather than internal matrix shapes where possible.
use crate::fake_rates::core::flavor::{Flavor, RatioKind};
use thiserror::Error;

#[cfg(feature = "python-bindings")]
use pyo3::{exceptions::PyValueError, PyErr};

/// Result alias for matrix-method operations.
pub type FPResult<T> = Result<T, FPError>;

/// FPError — failures of the fake/prompt matrix method.
///
/// Variants are grouped by the stage that raises them. Every variant carries
/// just enough payload (offending value, expected vs found length) to make
/// the message actionable without dumping whole inputs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FPError {
    // ---- Configuration ----
    /// No lepton slots at all (`ne + nm == 0`).
    #[error("At least one lepton is required (got ne = 0, nm = 0).")]
    NoLeptons,

    /// More slots of one flavor than the combinatorics support.
    #[error("Too many {flavor} slots: {count} (at most {max} supported).")]
    TooManyLeptons { flavor: Flavor, count: usize, max: usize },

    /// Topology vector has neither the aggregate nor the split length.
    #[error(
        "Topology length mismatch for ne = {ne}, nm = {nm}: expected {aggregate} (aggregate) or \
         {split} (split by flavor), found {found}."
    )]
    TopologyLengthMismatch { ne: usize, nm: usize, aggregate: usize, split: usize, found: usize },

    /// Variance vector does not match the count vector.
    #[error("Topology variance length mismatch: expected {expected}, found {found}.")]
    VarianceLengthMismatch { expected: usize, found: usize },

    /// Observed count is negative or non-finite.
    #[error("Topology count at index {index} must be finite and >= 0, got {value}.")]
    InvalidCount { index: usize, value: f64 },

    /// Observed variance is negative or non-finite.
    #[error("Topology variance at index {index} must be finite and >= 0, got {value}.")]
    InvalidVariance { index: usize, value: f64 },

    /// Ratio value outside `[0, 1]` or non-finite.
    #[error("{flavor} {kind} ratio must lie in [0, 1], got {value}.")]
    InvalidRatio { flavor: Flavor, kind: RatioKind, value: f64 },

    /// Ratio error negative or non-finite.
    #[error("{flavor} {kind} ratio error must be finite and >= 0, got {value}.")]
    InvalidRatioError { flavor: Flavor, kind: RatioKind, value: f64 },

    /// A flavor present in the topology has no ratio provider.
    #[error("No {kind} ratio configured for {flavor}s.")]
    MissingRatios { flavor: Flavor, kind: RatioKind },

    /// A binned provider was queried without kinematics.
    #[error("The {flavor} {kind} ratio is pt/eta binned; per-slot kinematics are required.")]
    KinematicsRequired { flavor: Flavor, kind: RatioKind },

    /// Per-slot vectors have the wrong length.
    #[error("Per-slot {what} length mismatch: expected {expected}, found {found}.")]
    SlotLengthMismatch { what: &'static str, expected: usize, found: usize },

    /// Kinematic value is non-finite.
    #[error("Kinematic {what} for slot {slot} must be finite, got {value}.")]
    InvalidKinematics { what: &'static str, slot: usize, value: f64 },

    /// FPConfig does not fit the configured `(ne, nm)`.
    #[error("FPConfig (nfe = {nfe}, nfm = {nfm}) does not fit ne = {ne}, nm = {nm}.")]
    ConfigOutOfRange { nfe: usize, nfm: usize, ne: usize, nm: usize },

    /// Builder finished without a topology.
    #[error("Estimator is not configured: call `topology` before `build`.")]
    NotConfigured,

    /// Event accumulators of different shape were combined.
    #[error("Cannot combine results with {expected} and {found} FPConfigs.")]
    ShapeMismatch { expected: usize, found: usize },

    // ---- Options ----
    /// Tolerance must be finite and strictly positive.
    #[error("Option {name} must be finite and > 0, got {value}.")]
    InvalidTolerance { name: &'static str, value: f64 },

    // ---- Ratio tables ----
    /// Bin edges must be finite and strictly increasing with at least two entries.
    #[error("Bin edges along {axis} must be finite, strictly increasing, with >= 2 entries.")]
    InvalidBinEdges { axis: &'static str },

    /// Table body does not match the bin edges.
    #[error("Ratio table shape mismatch: expected {expected:?}, found {found:?}.")]
    TableShapeMismatch { expected: (usize, usize), found: (usize, usize) },

    // ---- Numerical degeneracy ----
    /// Fake and prompt ratio coincide: fake and prompt leptons are indistinguishable.
    #[error(
        "{flavor} slot {slot}: fake ratio ({fake}) equals prompt ratio ({prompt}); \
         the fake/prompt split is not computable."
    )]
    DegenerateRatios { flavor: Flavor, slot: usize, fake: f64, prompt: f64 },

    /// Weight matrix is rank deficient.
    #[error("Weight matrix is singular: rank {rank} < {required} topologies.")]
    SingularSystem { rank: usize, required: usize },

    /// Topology holds no events.
    #[error("Topology contains no events; the prediction is undefined.")]
    EmptyTopology,

    /// Solve produced NaN or ±inf.
    #[error("Non-finite {what} for FPConfig {index}: {value}.")]
    NonFiniteResult { what: &'static str, index: usize, value: f64 },
}

impl FPError {
    /// `true` for the "not computable" family (as opposed to caller bugs).
    pub fn is_degenerate(&self) -> bool {
        matches!(
            self,
            FPError::DegenerateRatios { .. }
                | FPError::SingularSystem { .. }
                | FPError::EmptyTopology
                | FPError::NonFiniteResult { .. }
        )
    }
}

#[cfg(feature = "python-bindings")]
impl From<FPError> for PyErr {
    fn from(err: FPError) -> PyErr {
        PyValueError::new_err(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Display messages embedding their payloads.
    // - The degenerate vs configuration split used by accumulators.
    //
    // They intentionally DO NOT cover:
    // - The PyErr conversion (requires the Python C API).
    // -------------------------------------------------------------------------

    #[test]
    // Purpose
    // -------
    // Verify that the topology length message reports both admissible lengths
    // and the length that was found.
    //
    // Given
    // -----
    // - A mismatch for ne = 1, nm = 1 with 5 counts.
    //
    // Expect
    // ------
    // - The message contains "3", "4" and "5".
    fn topology_length_mismatch_message_lists_expected_and_found() {
        // Arrange
        let err =
            FPError::TopologyLengthMismatch { ne: 1, nm: 1, aggregate: 3, split: 4, found: 5 };

        // Act
        let msg = err.to_string();

        // Assert
        assert!(msg.contains("expected 3"));
        assert!(msg.contains("or 4"));
        assert!(msg.contains("found 5"));
    }

    #[test]
    // Purpose
    // -------
    // Check that ratio errors name the flavor and the ratio kind.
    //
    // Given
    // -----
    // - An invalid muon fake ratio of 1.5.
    //
    // Expect
    // ------
    // - The message mentions "muon", "fake" and "1.5".
    fn invalid_ratio_message_names_flavor_and_kind() {
        let err = FPError::InvalidRatio { flavor: Flavor::Muon, kind: RatioKind::Fake, value: 1.5 };
        let msg = err.to_string();
        assert!(msg.contains("muon"));
        assert!(msg.contains("fake"));
        assert!(msg.contains("1.5"));
    }

    #[test]
    // Purpose
    // -------
    // Verify the classification used by `BinnedPrediction::add_result`.
    //
    // Expect
    // ------
    // - Degeneracies report `is_degenerate() == true`.
    // - Configuration errors report `false`.
    fn degenerate_classification_separates_caller_bugs() {
        assert!(FPError::EmptyTopology.is_degenerate());
        assert!(FPError::SingularSystem { rank: 1, required: 3 }.is_degenerate());
        assert!(!FPError::NotConfigured.is_degenerate());
        assert!(!FPError::NoLeptons.is_degenerate());
    }
}
