//! fake_rates — the fake/prompt matrix method for fake-lepton backgrounds.
//!
//! Purpose
//! -------
//! Estimate how many events in a loose lepton sample contain `k` fake
//! electrons and `l` fake muons, given how often fake and prompt leptons of
//! each flavor pass the tight selection. This module is the main entry point
//! of the crate and the surface the Python bindings build on.
//!
//! Key behaviors
//! -------------
//! - Hold validated inputs in [`core`]: flavors, ratio providers, observed
//!   topologies, the canonical FPConfig order, and solve options.
//! - Build the weight matrix `W[t][c]` and its ratio Jacobians in
//!   [`weights`]; invert it with an SVD pseudo-inverse in [`solve`]; use the
//!   analytic two-lepton formulas of [`closed_form`] when they apply.
//! - Expose the user-facing API in [`estimator`]: [`MatrixMethodBuilder`] →
//!   [`MatrixMethod`] → [`Prediction`], with statistical and systematic
//!   variances, pairwise covariances, tight yields and the fake background.
//! - Offer per-event weighting in [`event_weight`] and per-bin accumulation
//!   in [`binned`].
//! - Centralize failures in [`errors`] (`FPError`, `FPResult`).
//!
//! Invariants & assumptions
//! ------------------------
//! - Predicted yields conserve the observed total: `Σ_c N_c = Σ_t Obs_t`.
//! - `f == p` for any slot, a rank-deficient system, and an empty topology
//!   are errors, never silent zeros.
//! - All inputs and outputs are plain `f64`; no global state is kept.
//!
//! Conventions
//! -----------
//! - Slots list electrons first, then muons.
//! - FPConfigs follow [`FPConfig::enumerate`]: by total number of fakes,
//!   then fake electrons before fake muons. For one electron and one muon
//!   this is `pp, fp, pf, ff` with the electron letter first.
//! - Ratio parameters are ordered by first appearance, slot by slot, fake
//!   before prompt; equal `(flavor, kind, bin)` keys share one parameter.
//! - The engine logs through `tracing` at `debug!`/`trace!` level and never
//!   installs a subscriber.
//!
//! Downstream usage
//! ----------------
//! - Typical flow:
//!   1. Build a [`Topology`] directly or with a [`TopologyCounter`].
//!   2. Configure ratios with flat values or [`BinnedRatioProvider`] tables.
//!   3. `MatrixMethod::builder().topology(..).electron_ratios(..).build()?`.
//!   4. `predict()` (flat), `predict_at(&kinematics)` (binned), then query
//!      the [`Prediction`].
//!
//! Testing notes
//! -------------
//! - Every submodule carries unit tests; end-to-end scenarios (closed forms,
//!   conservation, degeneracies, per-event equivalence, binned workflows)
//!   live in `tests/integration_matrix_method.rs`.

pub mod binned;
pub mod closed_form;
pub mod core;
pub mod errors;
pub mod estimator;
pub mod event_weight;
pub mod solve;
pub mod weights;

// ---- Re-exports (primary public surface) ----------------------------------

pub use self::core::{
    BinnedRatioProvider, ConstantRatioProvider, EstimatorOptions, FPConfig, Flavor, Kinematics,
    LeptonSlot, RatioKind, RatioProvider, RatioSet, RatioTable, RatioValue, Topology,
    TopologyCounter, TopologyLayout,
};

pub use self::binned::BinnedPrediction;
pub use self::errors::{FPError, FPResult};
pub use self::estimator::{Estimate, MatrixMethod, MatrixMethodBuilder, Prediction};
pub use self::event_weight::{EventWeight, EventWeightSum, LeptonEvent, event_weights, fp_weight};
pub use self::weights::{ParameterKey, SlotRatios};

// ---- Optional convenience prelude for downstream crates -------------------
//
//     use fake_prompt::fake_rates::prelude::*;

pub mod prelude {
    pub use super::{
        BinnedPrediction, BinnedRatioProvider, ConstantRatioProvider, Estimate, EstimatorOptions,
        EventWeight, EventWeightSum, FPConfig, FPError, FPResult, Flavor, Kinematics, LeptonEvent,
        MatrixMethod, MatrixMethodBuilder, Prediction, RatioKind, RatioProvider, RatioSet,
        RatioTable, RatioValue, SlotRatios, Topology, TopologyCounter, TopologyLayout,
    };
}
