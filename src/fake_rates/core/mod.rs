//! core — data carriers for the fake/prompt matrix method.
//!
//! Purpose
//! -------
//! Collect the validated inputs of the estimator: lepton flavors and slots,
//! tight-given-loose ratios and their providers, observed topologies, the
//! canonical FPConfig enumeration, and solve options. Nothing here inverts
//! anything; the engine modules one level up build on these types.
//!
//! Key behaviors
//! -------------
//! - [`Flavor`], [`RatioKind`], [`LeptonSlot`] and [`Kinematics`] describe
//!   which lepton a number belongs to.
//! - [`RatioProvider`] is the capability interface behind every ratio;
//!   [`ConstantRatioProvider`] and [`BinnedRatioProvider`] implement it and
//!   [`RatioSet`] holds one per `(flavor, kind)`.
//! - [`Topology`] stores observed counts in aggregate or flavor-split layout;
//!   [`TopologyCounter`] builds one event by event.
//! - [`FPConfig::enumerate`] fixes the canonical output order.
//! - [`EstimatorOptions`] carries tolerances and the closed-form switch.
//!
//! Invariants & assumptions
//! ------------------------
//! - Every constructor validates its inputs and returns `FPResult`; a value
//!   of any type in this module is internally consistent.
//! - Slots are ordered electrons first, then muons, everywhere.
//!
//! Testing notes
//! -------------
//! - Each submodule carries unit tests for validation paths, index
//!   conventions, and (for ratio tables) JSON round trips.

pub mod configs;
pub mod flavor;
pub mod options;
pub mod ratios;
pub mod topology;

// ---- Re-exports (primary public surface) ----------------------------------

pub use self::configs::{FPConfig, covariance_pairs};
pub use self::flavor::{Flavor, Kinematics, LeptonSlot, MAX_SLOTS_PER_FLAVOR, RatioKind};
pub use self::options::EstimatorOptions;
pub use self::ratios::{
    BinnedRatioProvider, ConstantRatioProvider, DEFAULT_RELATIVE_ERROR, RatioLookup,
    RatioProvider, RatioSet, RatioTable, RatioValue,
};
pub use self::topology::{Topology, TopologyCounter, TopologyLayout, classify};
