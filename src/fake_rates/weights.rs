//! weights — slot ratios, systematic parameters, and the weight matrix.
//!
//! Purpose
//! -------
//! Build the combinatorial weight matrix `W[topology][FPConfig]`, the
//! probability of observing each tightness topology given a fake/prompt
//! hypothesis, together with its derivative with respect to every distinct
//! input ratio. The solver inverts `W`; the derivatives feed the systematic
//! error propagation.
//!
//! Key behaviors
//! -------------
//! - [`resolve_slots`] evaluates the fake and prompt ratio of every slot from
//!   a [`RatioSet`], flat or at per-slot kinematics.
//! - [`ParameterSet`] collapses slot ratios onto distinct
//!   `(flavor, kind, bin)` keys: two slots reading the same measured ratio
//!   share one systematic parameter.
//! - Per flavor and per number of fakes, the tight-count distribution is the
//!   Poisson-binomial of the per-slot tight probabilities, averaged over
//!   every assignment of which slots are fake (a plain binomial when the
//!   slots share one ratio).
//! - Aggregate layout: the electron and muon distributions are convolved.
//!   Split layout: they are multiplied, one row per `(nte, ntm)`.
//!
//! Invariants & assumptions
//! ------------------------
//! - Every column of `W` sums to one (it is a probability distribution over
//!   topologies).
//! - `∂W/∂θ` is exact: the derivative of a Poisson-binomial with respect to
//!   one slot probability `q` is `P_{-s}[k-1] − P_{-s}[k]`, where `P_{-s}` is
//!   the distribution without that slot.
//!
//! Conventions
//! -----------
//! - Slots are ordered electrons first, then muons; parameter indices follow
//!   the order of first appearance (slot by slot, fake before prompt).
use crate::fake_rates::{
    core::{
        configs::FPConfig,
        flavor::{Flavor, Kinematics, RatioKind},
        ratios::{RatioLookup, RatioSet, RatioValue},
        topology::{TopologyLayout, validate_multiplicity},
    },
    errors::{FPError, FPResult},
};
use nalgebra::DMatrix;
use statrs::function::factorial::binomial;
use std::iter;
use tracing::trace;

/// ParameterKey — identity of one measured ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParameterKey {
    pub flavor: Flavor,
    pub kind: RatioKind,
    pub bin: usize,
}

/// SlotRatios — fake and prompt ratio in effect for one lepton slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotRatios {
    pub flavor: Flavor,
    pub fake: RatioLookup,
    pub prompt: RatioLookup,
}

impl SlotRatios {
    /// Kinematics-independent ratios (bin 0).
    pub fn flat(flavor: Flavor, fake: RatioValue, prompt: RatioValue) -> Self {
        SlotRatios {
            flavor,
            fake: RatioLookup { ratio: fake, bin: 0 },
            prompt: RatioLookup { ratio: prompt, bin: 0 },
        }
    }

    pub fn lookup(&self, kind: RatioKind) -> RatioLookup {
        match kind {
            RatioKind::Fake => self.fake,
            RatioKind::Prompt => self.prompt,
        }
    }

    pub fn key(&self, kind: RatioKind) -> ParameterKey {
        ParameterKey { flavor: self.flavor, kind, bin: self.lookup(kind).bin }
    }
}

/// Evaluate the ratios of every slot of a `(ne, nm)` event class.
///
/// Parameters
/// ----------
/// - `ratios`: providers for the flavors present.
/// - `kinematics`: per-slot `(pt, eta)` (electrons first) or `None` for the
///   flat ratios.
///
/// Errors
/// ------
/// - `FPError::SlotLengthMismatch` when `kinematics` does not cover
///   `ne + nm` slots.
/// - Any lookup error from [`RatioSet::lookup`].
pub fn resolve_slots(
    ratios: &RatioSet, ne: usize, nm: usize, kinematics: Option<&Kinematics>,
) -> FPResult<Vec<SlotRatios>> {
    if let Some(kin) = kinematics {
        if kin.len() != ne + nm {
            return Err(FPError::SlotLengthMismatch {
                what: "kinematics",
                expected: ne + nm,
                found: kin.len(),
            });
        }
    }
    let flavors =
        iter::repeat(Flavor::Electron).take(ne).chain(iter::repeat(Flavor::Muon).take(nm));
    flavors
        .enumerate()
        .map(|(slot, flavor)| {
            let at = kinematics.map(|kin| (kin.pt(slot), kin.eta(slot)));
            Ok(SlotRatios {
                flavor,
                fake: ratios.lookup(flavor, RatioKind::Fake, at)?,
                prompt: ratios.lookup(flavor, RatioKind::Prompt, at)?,
            })
        })
        .collect()
}

/// Reject slots whose fake and prompt ratios coincide within `tolerance`.
///
/// The reported slot index counts within the flavor.
pub fn check_degeneracy(slots: &[SlotRatios], tolerance: f64) -> FPResult<()> {
    for (position, slot) in slots.iter().enumerate() {
        let fake = slot.fake.ratio.value;
        let prompt = slot.prompt.ratio.value;
        if (fake - prompt).abs() <= tolerance {
            let index = slots[..position].iter().filter(|s| s.flavor == slot.flavor).count();
            return Err(FPError::DegenerateRatios {
                flavor: slot.flavor,
                slot: index,
                fake,
                prompt,
            });
        }
    }
    Ok(())
}

/// ParameterSet — distinct ratios entering a weight system.
///
/// Fields
/// ------
/// - `keys`: one [`ParameterKey`] per parameter.
/// - `errors`: absolute error of each parameter.
/// - `slot_index`: for every slot, `[fake, prompt]` parameter indices.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSet {
    keys: Vec<ParameterKey>,
    errors: Vec<f64>,
    slot_index: Vec<[usize; 2]>,
}

impl ParameterSet {
    pub fn from_slots(slots: &[SlotRatios]) -> Self {
        let mut set = ParameterSet { keys: Vec::new(), errors: Vec::new(), slot_index: Vec::new() };
        for slot in slots {
            let fake = set.intern(slot.key(RatioKind::Fake), slot.fake.ratio.error);
            let prompt = set.intern(slot.key(RatioKind::Prompt), slot.prompt.ratio.error);
            set.slot_index.push([fake, prompt]);
        }
        set
    }

    fn intern(&mut self, key: ParameterKey, error: f64) -> usize {
        match self.keys.iter().position(|k| *k == key) {
            Some(index) => index,
            None => {
                self.keys.push(key);
                self.errors.push(error);
                self.keys.len() - 1
            }
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[ParameterKey] {
        &self.keys
    }

    pub fn errors(&self) -> &[f64] {
        &self.errors
    }

    /// Parameter index of `kind` for global slot `slot`.
    pub fn index(&self, slot: usize, kind: RatioKind) -> usize {
        match kind {
            RatioKind::Fake => self.slot_index[slot][0],
            RatioKind::Prompt => self.slot_index[slot][1],
        }
    }
}

/// WeightSystem — `W` and `∂W/∂θ` for one event class.
///
/// Rows follow the topology layout, columns the canonical FPConfig order.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightSystem {
    ne: usize,
    nm: usize,
    layout: TopologyLayout,
    configs: Vec<FPConfig>,
    matrix: DMatrix<f64>,
    derivatives: Vec<DMatrix<f64>>,
    params: ParameterSet,
}

impl WeightSystem {
    /// Build `W` and its per-parameter derivatives.
    ///
    /// Parameters
    /// ----------
    /// - `ne`, `nm`: slots per flavor.
    /// - `layout`: row indexing of `W` (see `TopologyLayout`).
    /// - `slots`: `ne + nm` slot ratios, electrons first.
    ///
    /// Errors
    /// ------
    /// - `FPError::NoLeptons` / `FPError::TooManyLeptons`.
    /// - `FPError::SlotLengthMismatch` when `slots` does not hold exactly
    ///   `ne` electrons followed by `nm` muons.
    pub fn build(
        ne: usize, nm: usize, layout: TopologyLayout, slots: &[SlotRatios],
    ) -> FPResult<Self> {
        validate_multiplicity(ne, nm)?;
        validate_slot_order(ne, nm, slots)?;
        let params = ParameterSet::from_slots(slots);
        let configs = FPConfig::enumerate(ne, nm);

        let electrons: Vec<FlavorDistribution> =
            (0..=ne).map(|nfe| FlavorDistribution::new(&slots[..ne], 0, nfe, &params)).collect();
        let muons: Vec<FlavorDistribution> =
            (0..=nm).map(|nfm| FlavorDistribution::new(&slots[ne..], ne, nfm, &params)).collect();

        let rows = layout.len(ne, nm);
        let mut matrix = DMatrix::<f64>::zeros(rows, configs.len());
        let mut derivatives = vec![DMatrix::<f64>::zeros(rows, configs.len()); params.len()];
        for (col, config) in configs.iter().enumerate() {
            let de = &electrons[config.nfe];
            let dm = &muons[config.nfm];
            match layout {
                TopologyLayout::Aggregate => {
                    for (t, w) in convolve(&de.probs, &dm.probs).into_iter().enumerate() {
                        matrix[(t, col)] = w;
                    }
                    for (k, deriv) in derivatives.iter_mut().enumerate() {
                        let via_e = convolve(&de.grads[k], &dm.probs);
                        let via_m = convolve(&de.probs, &dm.grads[k]);
                        for t in 0..rows {
                            deriv[(t, col)] = via_e[t] + via_m[t];
                        }
                    }
                }
                TopologyLayout::Split => {
                    for ntm in 0..=nm {
                        for nte in 0..=ne {
                            let row = ntm * (ne + 1) + nte;
                            matrix[(row, col)] = de.probs[nte] * dm.probs[ntm];
                            for (k, deriv) in derivatives.iter_mut().enumerate() {
                                deriv[(row, col)] = de.grads[k][nte] * dm.probs[ntm]
                                    + de.probs[nte] * dm.grads[k][ntm];
                            }
                        }
                    }
                }
            }
        }
        trace!(ne, nm, ?layout, n_params = params.len(), %matrix, "weight matrix built");
        Ok(WeightSystem { ne, nm, layout, configs, matrix, derivatives, params })
    }

    pub fn ne(&self) -> usize {
        self.ne
    }

    pub fn nm(&self) -> usize {
        self.nm
    }

    pub fn layout(&self) -> TopologyLayout {
        self.layout
    }

    pub fn configs(&self) -> &[FPConfig] {
        &self.configs
    }

    /// `W[topology][config]`.
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    /// `∂W/∂θ_k`, one matrix per parameter.
    pub fn derivatives(&self) -> &[DMatrix<f64>] {
        &self.derivatives
    }

    pub fn params(&self) -> &ParameterSet {
        &self.params
    }

    /// P(every lepton tight | config `col`).
    pub fn all_tight_probability(&self, col: usize) -> f64 {
        self.matrix[(self.matrix.nrows() - 1, col)]
    }

    /// ∂P(every lepton tight | config `col`)/∂θ_k.
    pub fn all_tight_derivative(&self, k: usize, col: usize) -> f64 {
        self.derivatives[k][(self.matrix.nrows() - 1, col)]
    }
}

/// Tight-count distribution of one flavor for a fixed number of fakes,
/// averaged over which slots are fake.
#[derive(Debug, Clone)]
struct FlavorDistribution {
    probs: Vec<f64>,
    /// `grads[k][t]` = ∂probs[t]/∂θ_k.
    grads: Vec<Vec<f64>>,
}

impl FlavorDistribution {
    fn new(slots: &[SlotRatios], offset: usize, n_fake: usize, params: &ParameterSet) -> Self {
        let n = slots.len();
        let mut probs = vec![0.0; n + 1];
        let mut grads = vec![vec![0.0; n + 1]; params.len()];
        let norm = 1.0 / binomial(n as u64, n_fake as u64);

        for mask in fake_assignments(n, n_fake) {
            let q = tight_probabilities(slots, mask);
            for (t, p) in poisson_binomial(&q).into_iter().enumerate() {
                probs[t] += norm * p;
            }
            for s in 0..n {
                let kind = if is_fake(mask, s) { RatioKind::Fake } else { RatioKind::Prompt };
                let k = params.index(offset + s, kind);
                let others = poisson_binomial_without(&q, s);
                for t in 0..=n {
                    let gain = if t > 0 { others[t - 1] } else { 0.0 };
                    let loss = if t < n { others[t] } else { 0.0 };
                    grads[k][t] += norm * (gain - loss);
                }
            }
        }
        FlavorDistribution { probs, grads }
    }
}

// ---- Helper methods ----

/// Bitmasks over `n` slots with exactly `n_fake` bits set (bit set = fake).
pub(crate) fn fake_assignments(n: usize, n_fake: usize) -> impl Iterator<Item = u32> {
    (0u32..(1u32 << n)).filter(move |mask| mask.count_ones() as usize == n_fake)
}

pub(crate) fn is_fake(mask: u32, slot: usize) -> bool {
    mask & (1 << slot) != 0
}

fn tight_probabilities(slots: &[SlotRatios], mask: u32) -> Vec<f64> {
    slots
        .iter()
        .enumerate()
        .map(|(s, slot)| {
            if is_fake(mask, s) { slot.fake.ratio.value } else { slot.prompt.ratio.value }
        })
        .collect()
}

/// Distribution of the number of successes among independent trials with
/// success probabilities `q`.
pub(crate) fn poisson_binomial(q: &[f64]) -> Vec<f64> {
    let mut dist = vec![1.0];
    for &p in q {
        let mut next = vec![0.0; dist.len() + 1];
        for (k, &d) in dist.iter().enumerate() {
            next[k] += d * (1.0 - p);
            next[k + 1] += d * p;
        }
        dist = next;
    }
    dist
}

fn poisson_binomial_without(q: &[f64], skip: usize) -> Vec<f64> {
    let rest: Vec<f64> =
        q.iter().enumerate().filter(|(i, _)| *i != skip).map(|(_, &p)| p).collect();
    poisson_binomial(&rest)
}

fn convolve(a: &[f64], b: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; a.len() + b.len() - 1];
    for (i, &x) in a.iter().enumerate() {
        for (j, &y) in b.iter().enumerate() {
            out[i + j] += x * y;
        }
    }
    out
}

pub(crate) fn validate_slot_order(ne: usize, nm: usize, slots: &[SlotRatios]) -> FPResult<()> {
    if slots.len() != ne + nm {
        return Err(FPError::SlotLengthMismatch {
            what: "slot ratios",
            expected: ne + nm,
            found: slots.len(),
        });
    }
    let leading_electrons = slots.iter().take_while(|s| s.flavor == Flavor::Electron).count();
    if leading_electrons != ne || slots[ne..].iter().any(|s| s.flavor != Flavor::Muon) {
        return Err(FPError::SlotLengthMismatch {
            what: "electron slots (electrons must come first)",
            expected: ne,
            found: slots.iter().filter(|s| s.flavor == Flavor::Electron).count(),
        });
    }
    Ok(())
}
