//! Lepton flavors, ratio kinds, and slot bookkeeping.
//!
//! A *slot* is a lepton position inside an event class. Slots are numbered
//! globally with all electrons first and then all muons, which is also the
//! order in which per-slot kinematics and tight flags are supplied.
use crate::fake_rates::errors::{FPError, FPResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound on slots per flavor; the fake-assignment enumeration is
/// exponential in this number.
pub const MAX_SLOTS_PER_FLAVOR: usize = 8;

/// Lepton flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Flavor {
    Electron,
    Muon,
}

impl Flavor {
    pub const ALL: [Flavor; 2] = [Flavor::Electron, Flavor::Muon];
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flavor::Electron => write!(f, "electron"),
            Flavor::Muon => write!(f, "muon"),
        }
    }
}

/// Which tight-given-loose probability a ratio describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RatioKind {
    /// P(tight | fake, loose).
    Fake,
    /// P(tight | prompt, loose).
    Prompt,
}

impl fmt::Display for RatioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RatioKind::Fake => write!(f, "fake"),
            RatioKind::Prompt => write!(f, "prompt"),
        }
    }
}

/// LeptonSlot — a lepton position in an event class.
///
/// `index` counts within the flavor (`0..ne` or `0..nm`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeptonSlot {
    pub flavor: Flavor,
    pub index: usize,
}

impl LeptonSlot {
    /// All slots for `(ne, nm)`, electrons first.
    pub fn enumerate(ne: usize, nm: usize) -> Vec<LeptonSlot> {
        let electrons = (0..ne).map(|index| LeptonSlot { flavor: Flavor::Electron, index });
        let muons = (0..nm).map(|index| LeptonSlot { flavor: Flavor::Muon, index });
        electrons.chain(muons).collect()
    }
}

/// Kinematics — per-slot transverse momentum and pseudorapidity.
///
/// Entries follow the global slot order (electrons first, then muons).
#[derive(Debug, Clone, PartialEq)]
pub struct Kinematics {
    pt: Vec<f64>,
    eta: Vec<f64>,
}

impl Kinematics {
    /// Pair up per-slot `pt` and `eta`.
    ///
    /// Errors
    /// ------
    /// - `FPError::SlotLengthMismatch` if the vectors differ in length.
    /// - `FPError::InvalidKinematics` for NaN/±inf entries.
    pub fn new(pt: Vec<f64>, eta: Vec<f64>) -> FPResult<Self> {
        if pt.len() != eta.len() {
            return Err(FPError::SlotLengthMismatch {
                what: "eta",
                expected: pt.len(),
                found: eta.len(),
            });
        }
        for (slot, &value) in pt.iter().enumerate() {
            if !value.is_finite() {
                return Err(FPError::InvalidKinematics { what: "pt", slot, value });
            }
        }
        for (slot, &value) in eta.iter().enumerate() {
            if !value.is_finite() {
                return Err(FPError::InvalidKinematics { what: "eta", slot, value });
            }
        }
        Ok(Kinematics { pt, eta })
    }

    /// Same `(pt, eta)` for `n` slots.
    pub fn uniform(n: usize, pt: f64, eta: f64) -> FPResult<Self> {
        Kinematics::new(vec![pt; n], vec![eta; n])
    }

    pub fn len(&self) -> usize {
        self.pt.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pt.is_empty()
    }

    pub fn pt(&self, slot: usize) -> f64 {
        self.pt[slot]
    }

    pub fn eta(&self, slot: usize) -> f64 {
        self.eta[slot]
    }
}
