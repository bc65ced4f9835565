//! Fake and prompt ratios — values, providers, and the per-flavor set.
//!
//! Purpose
//! -------
//! Describe the tight-given-loose probabilities consumed by the matrix
//! method and the ways they can be supplied: a flat number per flavor or a
//! pt × eta step function. The estimator only ever talks to the
//! [`RatioProvider`] capability and never inspects which variant it holds.
//!
//! Key behaviors
//! -------------
//! - [`RatioValue`] pairs a ratio with its absolute error; when no error is
//!   given it defaults to [`DEFAULT_RELATIVE_ERROR`] × value.
//! - [`ConstantRatioProvider`] returns the same value everywhere and also
//!   answers flat (kinematics-free) queries.
//! - [`BinnedRatioProvider`] looks up the rectangular bin containing
//!   `(pt, eta)`, clamping out-of-range coordinates to the nearest bin.
//! - [`RatioSet`] holds one provider per `(flavor, kind)` and validates every
//!   lookup against `[0, 1]` before it reaches the weight engine.
//!
//! Invariants & assumptions
//! ------------------------
//! - Bin edges are finite and strictly increasing (checked on construction
//!   and again after deserialization).
//! - Lookup results carry a bin id; two lookups with the same
//!   `(flavor, kind, bin)` denote the *same* measured ratio and are treated as
//!   one systematic parameter downstream.
//!
//! Conventions
//! -----------
//! - Bin ids are `pt_bin * n_eta_bins + eta_bin`; the constant provider uses
//!   bin `0`.
//! - Lower bin edges are inclusive, upper edges exclusive, except that values
//!   at or beyond the last edge clamp into the last bin.
use crate::fake_rates::{
    core::flavor::{Flavor, RatioKind},
    errors::{FPError, FPResult},
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, sync::Arc};

/// Relative error assumed for ratios supplied without an explicit error.
pub const DEFAULT_RELATIVE_ERROR: f64 = 0.1;

/// RatioValue — a ratio and its absolute uncertainty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatioValue {
    pub value: f64,
    pub error: f64,
}

impl RatioValue {
    /// Ratio with the default 10% relative error.
    pub fn new(value: f64) -> Self {
        RatioValue { value, error: DEFAULT_RELATIVE_ERROR * value }
    }

    /// Ratio with an explicit absolute error.
    pub fn with_error(value: f64, error: f64) -> Self {
        RatioValue { value, error }
    }
}

/// RatioLookup — result of a provider query.
///
/// `bin` identifies which measured ratio was returned, so that callers can
/// recognize when two slots share the same input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatioLookup {
    pub ratio: RatioValue,
    pub bin: usize,
}

/// RatioProvider — capability interface for tight-given-loose ratios.
///
/// Implementations must be pure: the same `(pt, eta)` always yields the same
/// lookup. `flat` answers queries made without kinematics; providers that
/// depend on kinematics return `None`.
pub trait RatioProvider: fmt::Debug + Send + Sync {
    /// Ratio for a lepton with transverse momentum `pt` and pseudorapidity `eta`.
    fn lookup(&self, pt: f64, eta: f64) -> RatioLookup;

    /// Kinematics-independent ratio, if the provider has one.
    fn flat(&self) -> Option<RatioLookup> {
        None
    }
}

/// ConstantRatioProvider — one pt/eta-integrated ratio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConstantRatioProvider {
    ratio: RatioValue,
}

impl ConstantRatioProvider {
    pub fn new(ratio: RatioValue) -> Self {
        ConstantRatioProvider { ratio }
    }

    pub fn ratio(&self) -> RatioValue {
        self.ratio
    }
}

impl RatioProvider for ConstantRatioProvider {
    fn lookup(&self, _pt: f64, _eta: f64) -> RatioLookup {
        RatioLookup { ratio: self.ratio, bin: 0 }
    }

    fn flat(&self) -> Option<RatioLookup> {
        Some(RatioLookup { ratio: self.ratio, bin: 0 })
    }
}

/// RatioTable — serialized form of a [`BinnedRatioProvider`].
///
/// `values[i][j]` is the ratio in pt bin `i` and eta bin `j`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatioTable {
    pub pt_edges: Vec<f64>,
    pub eta_edges: Vec<f64>,
    pub values: Vec<Vec<RatioValue>>,
}

/// BinnedRatioProvider — pt × eta step function of ratios.
///
/// Fields
/// ------
/// - `pt_edges`, `eta_edges`: strictly increasing bin edges (`n + 1` edges
///   for `n` bins).
/// - `values`: `n_pt × n_eta` table of [`RatioValue`]s.
///
/// Invariants
/// ----------
/// - At least one bin along each axis; table shape matches the edges.
/// - Deserialization goes through [`BinnedRatioProvider::new`], so a loaded
///   table satisfies the same invariants as a constructed one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RatioTable", into = "RatioTable")]
pub struct BinnedRatioProvider {
    pt_edges: Vec<f64>,
    eta_edges: Vec<f64>,
    values: Vec<Vec<RatioValue>>,
}

impl BinnedRatioProvider {
    /// Build a validated lookup table.
    ///
    /// Errors
    /// ------
    /// - `FPError::InvalidBinEdges` when an axis has fewer than two edges or
    ///   the edges are not finite and strictly increasing.
    /// - `FPError::TableShapeMismatch` when `values` is not
    ///   `(pt_edges.len() - 1) × (eta_edges.len() - 1)`.
    pub fn new(
        pt_edges: Vec<f64>, eta_edges: Vec<f64>, values: Vec<Vec<RatioValue>>,
    ) -> FPResult<Self> {
        validate_edges(&pt_edges, "pt")?;
        validate_edges(&eta_edges, "eta")?;
        let expected = (pt_edges.len() - 1, eta_edges.len() - 1);
        let n_eta_found = values.first().map_or(0, Vec::len);
        if values.len() != expected.0 || values.iter().any(|row| row.len() != expected.1) {
            return Err(FPError::TableShapeMismatch {
                expected,
                found: (values.len(), n_eta_found),
            });
        }
        Ok(BinnedRatioProvider { pt_edges, eta_edges, values })
    }

    /// Table of bare ratios, each with the default relative error.
    pub fn from_values(
        pt_edges: Vec<f64>, eta_edges: Vec<f64>, values: Vec<Vec<f64>>,
    ) -> FPResult<Self> {
        let values = values
            .into_iter()
            .map(|row| row.into_iter().map(RatioValue::new).collect())
            .collect();
        BinnedRatioProvider::new(pt_edges, eta_edges, values)
    }

    pub fn n_pt_bins(&self) -> usize {
        self.pt_edges.len() - 1
    }

    pub fn n_eta_bins(&self) -> usize {
        self.eta_edges.len() - 1
    }

    /// `(pt_bin, eta_bin)` for a point, clamped to the table.
    pub fn find_bin(&self, pt: f64, eta: f64) -> (usize, usize) {
        (clamped_bin(&self.pt_edges, pt), clamped_bin(&self.eta_edges, eta))
    }
}

impl RatioProvider for BinnedRatioProvider {
    fn lookup(&self, pt: f64, eta: f64) -> RatioLookup {
        let (i, j) = self.find_bin(pt, eta);
        RatioLookup { ratio: self.values[i][j], bin: i * self.n_eta_bins() + j }
    }
}

impl TryFrom<RatioTable> for BinnedRatioProvider {
    type Error = FPError;

    fn try_from(table: RatioTable) -> FPResult<Self> {
        BinnedRatioProvider::new(table.pt_edges, table.eta_edges, table.values)
    }
}

impl From<BinnedRatioProvider> for RatioTable {
    fn from(provider: BinnedRatioProvider) -> Self {
        RatioTable {
            pt_edges: provider.pt_edges,
            eta_edges: provider.eta_edges,
            values: provider.values,
        }
    }
}

/// RatioSet — fake and prompt providers for each flavor.
///
/// Only the flavors that actually appear in the topology need providers;
/// a missing provider is reported on first use as `FPError::MissingRatios`.
#[derive(Debug, Clone, Default)]
pub struct RatioSet {
    providers: BTreeMap<(Flavor, RatioKind), Arc<dyn RatioProvider>>,
}

impl RatioSet {
    pub fn new() -> Self {
        RatioSet::default()
    }

    /// Install (or replace) the provider for `(flavor, kind)`.
    pub fn set(&mut self, flavor: Flavor, kind: RatioKind, provider: Arc<dyn RatioProvider>) {
        self.providers.insert((flavor, kind), provider);
    }

    /// Flat fake and prompt ratios for one flavor.
    pub fn set_flat(&mut self, flavor: Flavor, fake: RatioValue, prompt: RatioValue) {
        self.set(flavor, RatioKind::Fake, Arc::new(ConstantRatioProvider::new(fake)));
        self.set(flavor, RatioKind::Prompt, Arc::new(ConstantRatioProvider::new(prompt)));
    }

    pub fn contains(&self, flavor: Flavor, kind: RatioKind) -> bool {
        self.providers.contains_key(&(flavor, kind))
    }

    /// Validated lookup; `kinematics = None` asks for the flat ratio.
    ///
    /// Errors
    /// ------
    /// - `FPError::MissingRatios` when no provider is installed.
    /// - `FPError::KinematicsRequired` when `kinematics` is `None` and the
    ///   provider is binned.
    /// - `FPError::InvalidRatio` / `FPError::InvalidRatioError` when the
    ///   provider returns a value outside `[0, 1]` or a bad error.
    pub fn lookup(
        &self, flavor: Flavor, kind: RatioKind, kinematics: Option<(f64, f64)>,
    ) -> FPResult<RatioLookup> {
        let provider =
            self.providers.get(&(flavor, kind)).ok_or(FPError::MissingRatios { flavor, kind })?;
        let found = match kinematics {
            Some((pt, eta)) => provider.lookup(pt, eta),
            None => provider.flat().ok_or(FPError::KinematicsRequired { flavor, kind })?,
        };
        validate_ratio(flavor, kind, found.ratio)?;
        Ok(found)
    }

    /// Fake ratio and error at `(pt, eta)`.
    pub fn fake_ratio(&self, flavor: Flavor, pt: f64, eta: f64) -> FPResult<RatioValue> {
        Ok(self.lookup(flavor, RatioKind::Fake, Some((pt, eta)))?.ratio)
    }

    /// Prompt ratio and error at `(pt, eta)`.
    pub fn prompt_ratio(&self, flavor: Flavor, pt: f64, eta: f64) -> FPResult<RatioValue> {
        Ok(self.lookup(flavor, RatioKind::Prompt, Some((pt, eta)))?.ratio)
    }
}

// ---- Helper methods ----

fn validate_ratio(flavor: Flavor, kind: RatioKind, ratio: RatioValue) -> FPResult<()> {
    if !ratio.value.is_finite() || !(0.0..=1.0).contains(&ratio.value) {
        return Err(FPError::InvalidRatio { flavor, kind, value: ratio.value });
    }
    if !ratio.error.is_finite() || ratio.error < 0.0 {
        return Err(FPError::InvalidRatioError { flavor, kind, value: ratio.error });
    }
    Ok(())
}

fn validate_edges(edges: &[f64], axis: &'static str) -> FPResult<()> {
    let increasing = edges.windows(2).all(|w| w[0] < w[1]);
    if edges.len() < 2 || !increasing || edges.iter().any(|e| !e.is_finite()) {
        return Err(FPError::InvalidBinEdges { axis });
    }
    Ok(())
}

/// Index of the bin containing `x`; out-of-range values clamp.
fn clamped_bin(edges: &[f64], x: f64) -> usize {
    let n_bins = edges.len() - 1;
    if x < edges[0] {
        return 0;
    }
    let upper = edges.partition_point(|&e| e <= x);
    upper.saturating_sub(1).min(n_bins - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Default error assignment for bare ratios.
    // - Bin lookup with clamping and bin-id assignment.
    // - Table validation and JSON round trips through the validating path.
    // - RatioSet lookups (missing providers, flat vs binned, range checks).
    // -------------------------------------------------------------------------

    fn table() -> BinnedRatioProvider {
        BinnedRatioProvider::new(
            vec![10.0, 20.0, 40.0, 60.0],
            vec![0.0, 1.0, 2.5],
            vec![
                vec![RatioValue::with_error(0.30, 0.03), RatioValue::with_error(0.35, 0.04)],
                vec![RatioValue::with_error(0.20, 0.02), RatioValue::with_error(0.25, 0.03)],
                vec![RatioValue::with_error(0.10, 0.01), RatioValue::with_error(0.15, 0.02)],
            ],
        )
        .unwrap()
    }

    #[test]
    // Purpose
    // -------
    // A ratio without an explicit error gets 10% of its value.
    fn ratio_value_defaults_to_ten_percent_error() {
        let r = RatioValue::new(0.8);
        assert!((r.error - 0.08).abs() < 1e-15);
    }

    #[test]
    // Purpose
    // -------
    // Verify bin lookup inside the table and clamping outside it.
    //
    // Given
    // -----
    // - A 3 × 2 table with pt edges [10, 20, 40, 60] and eta edges [0, 1, 2.5].
    //
    // Expect
    // ------
    // - (25, 0.5) falls in pt bin 1, eta bin 0 (bin id 2).
    // - pt below 10 and above 60 clamp to the first and last pt bins.
    // - eta = 2.5 (upper edge) clamps to the last eta bin.
    fn binned_lookup_finds_and_clamps_bins() {
        // Arrange
        let t = table();

        // Act
        let inside = t.lookup(25.0, 0.5);
        let low = t.lookup(5.0, 0.5);
        let high = t.lookup(500.0, 1.5);
        let edge = t.lookup(20.0, 2.5);

        // Assert
        assert_eq!(inside.bin, 2);
        assert_eq!(inside.ratio.value, 0.20);
        assert_eq!(low.ratio.value, 0.30);
        assert_eq!(high.ratio.value, 0.15);
        assert_eq!(high.bin, 5);
        assert_eq!(t.find_bin(20.0, 2.5), (1, 1));
        assert_eq!(edge.ratio.value, 0.25);
        assert!(t.flat().is_none());
    }

    #[test]
    // Purpose
    // -------
    // Table construction rejects bad edges and mismatched shapes.
    fn binned_table_rejects_bad_edges_and_shapes() {
        assert!(matches!(
            BinnedRatioProvider::from_values(vec![10.0], vec![0.0, 1.0], vec![]),
            Err(FPError::InvalidBinEdges { axis: "pt" })
        ));
        assert!(matches!(
            BinnedRatioProvider::from_values(vec![10.0, 20.0], vec![1.0, 0.0], vec![vec![0.1]]),
            Err(FPError::InvalidBinEdges { axis: "eta" })
        ));
        assert!(matches!(
            BinnedRatioProvider::from_values(
                vec![10.0, 20.0, 30.0],
                vec![0.0, 1.0],
                vec![vec![0.1]]
            ),
            Err(FPError::TableShapeMismatch { expected: (2, 1), found: (1, 1) })
        ));
    }

    #[test]
    // Purpose
    // -------
    // Deserialization revalidates the table.
    //
    // Given
    // -----
    // - A valid table serialized to JSON, and a JSON table with decreasing
    //   pt edges.
    //
    // Expect
    // ------
    // - The valid one round-trips to an equal provider.
    // - The invalid one fails to deserialize.
    fn binned_table_deserialization_goes_through_validation() {
        let t = table();
        let json = serde_json::to_string(&t).unwrap();
        let back: BinnedRatioProvider = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);

        let bad = r#"{"pt_edges":[20.0,10.0],"eta_edges":[0.0,1.0],
                      "values":[[{"value":0.1,"error":0.01}]]}"#;
        assert!(serde_json::from_str::<BinnedRatioProvider>(bad).is_err());
    }

    #[test]
    // Purpose
    // -------
    // RatioSet reports missing providers, requires kinematics for binned
    // providers, and range-checks returned values.
    fn ratio_set_lookup_validates_and_dispatches() {
        // Arrange
        let mut set = RatioSet::new();
        set.set_flat(Flavor::Muon, RatioValue::new(0.05), RatioValue::new(0.9));
        set.set(Flavor::Electron, RatioKind::Fake, Arc::new(table()));
        set.set(
            Flavor::Electron,
            RatioKind::Prompt,
            Arc::new(ConstantRatioProvider::new(RatioValue::new(1.2))),
        );

        // Act & Assert
        let mu = set.lookup(Flavor::Muon, RatioKind::Fake, None).unwrap();
        assert_eq!(mu.ratio.value, 0.05);
        assert_eq!(set.fake_ratio(Flavor::Electron, 45.0, 0.2).unwrap().value, 0.10);
        assert!(matches!(
            set.lookup(Flavor::Electron, RatioKind::Fake, None),
            Err(FPError::KinematicsRequired { flavor: Flavor::Electron, kind: RatioKind::Fake })
        ));
        assert!(matches!(
            set.prompt_ratio(Flavor::Electron, 30.0, 0.0),
            Err(FPError::InvalidRatio { value, .. }) if value == 1.2
        ));

        let empty = RatioSet::new();
        assert!(matches!(
            empty.lookup(Flavor::Muon, RatioKind::Prompt, None),
            Err(FPError::MissingRatios { flavor: Flavor::Muon, kind: RatioKind::Prompt })
        ));
    }
}
