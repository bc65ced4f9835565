//! Observed topologies and the topology classifier.
//!
//! Purpose
//! -------
//! Hold the observed event counts per tightness configuration ("topology")
//! for one `(ne, nm)` event class, and provide the classifier that turns
//! per-lepton tight flags into those counts.
//!
//! Key behaviors
//! -------------
//! - [`Topology::new`] accepts the aggregate layout (`ne + nm + 1` counts,
//!   indexed by the number of tight leptons) or the flavor-split layout
//!   (`(ne + 1)(nm + 1)` counts, indexed by tight electrons and tight muons).
//! - [`TopologyCounter`] fills either layout event by event with optional
//!   weights, tracking Σw and Σw² so that weighted samples keep a correct
//!   statistical variance.
//!
//! Invariants & assumptions
//! ------------------------
//! - Counts and variances are finite and non-negative.
//! - `ne + nm >= 1` and each flavor has at most `MAX_SLOTS_PER_FLAVOR` slots.
//! - Without explicit variances, counts are treated as Poisson
//!   (`Var = count`).
//!
//! Conventions
//! -----------
//! - Split index: `ntm * (ne + 1) + nte`. For one electron and one muon the
//!   order is: nothing tight, electron tight, muon tight, both tight.
//! - For a single flavor both layouts have the same length and meaning; the
//!   aggregate layout is reported.
//! - Tight flags are supplied per slot, electrons first, then muons.
use crate::fake_rates::{
    core::flavor::{Flavor, MAX_SLOTS_PER_FLAVOR},
    errors::{FPError, FPResult},
};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// How the observed counts are indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TopologyLayout {
    /// Index = total number of tight leptons.
    Aggregate,
    /// Index = `ntm * (ne + 1) + nte`.
    Split,
}

impl TopologyLayout {
    /// Number of topology bins for `(ne, nm)`.
    pub fn len(self, ne: usize, nm: usize) -> usize {
        match self {
            TopologyLayout::Aggregate => ne + nm + 1,
            TopologyLayout::Split => (ne + 1) * (nm + 1),
        }
    }
}

/// Topology — observed counts for one event class.
///
/// Fields
/// ------
/// - `ne`, `nm`: electrons and muons per event.
/// - `layout`: indexing of `counts`.
/// - `counts`: observed yields, possibly non-integer after luminosity scaling.
/// - `variances`: per-bin variance of `counts` (Poisson when not supplied).
#[derive(Debug, Clone, PartialEq)]
pub struct Topology {
    ne: usize,
    nm: usize,
    layout: TopologyLayout,
    counts: Array1<f64>,
    variances: Array1<f64>,
}

impl Topology {
    /// Build a topology from unweighted (Poisson) counts.
    ///
    /// Parameters
    /// ----------
    /// - `ne`, `nm`: number of electron and muon slots.
    /// - `counts`: either `ne + nm + 1` counts (index = number of tight
    ///   leptons) or `(ne + 1)(nm + 1)` counts split by flavor.
    ///
    /// Errors
    /// ------
    /// - `FPError::NoLeptons`, `FPError::TooManyLeptons` for unusable `(ne, nm)`.
    /// - `FPError::TopologyLengthMismatch` when `counts` has neither length.
    /// - `FPError::InvalidCount` for negative or non-finite counts.
    ///
    /// Examples
    /// --------
    /// ```rust
    /// use fake_prompt::fake_rates::core::topology::{Topology, TopologyLayout};
    ///
    /// let mumu = Topology::new(0, 2, vec![10.0, 50.0, 40.0]).unwrap();
    /// assert_eq!(mumu.layout(), TopologyLayout::Aggregate);
    ///
    /// let emu = Topology::new(1, 1, vec![5.0, 12.0, 8.0, 30.0]).unwrap();
    /// assert_eq!(emu.layout(), TopologyLayout::Split);
    /// assert_eq!(emu.total(), 55.0);
    /// ```
    pub fn new(ne: usize, nm: usize, counts: Vec<f64>) -> FPResult<Self> {
        let variances = counts.clone();
        Topology::with_variances(ne, nm, counts, variances)
    }

    /// Build a topology with explicit per-bin variances (e.g. Σw² of
    /// weighted events).
    ///
    /// Errors
    /// ------
    /// As [`Topology::new`], plus `FPError::VarianceLengthMismatch` and
    /// `FPError::InvalidVariance`.
    pub fn with_variances(
        ne: usize, nm: usize, counts: Vec<f64>, variances: Vec<f64>,
    ) -> FPResult<Self> {
        validate_multiplicity(ne, nm)?;
        let aggregate = TopologyLayout::Aggregate.len(ne, nm);
        let split = TopologyLayout::Split.len(ne, nm);
        let layout = if counts.len() == aggregate {
            TopologyLayout::Aggregate
        } else if counts.len() == split {
            TopologyLayout::Split
        } else {
            return Err(FPError::TopologyLengthMismatch {
                ne,
                nm,
                aggregate,
                split,
                found: counts.len(),
            });
        };
        if variances.len() != counts.len() {
            return Err(FPError::VarianceLengthMismatch {
                expected: counts.len(),
                found: variances.len(),
            });
        }
        for (index, &value) in counts.iter().enumerate() {
            if !value.is_finite() || value < 0.0 {
                return Err(FPError::InvalidCount { index, value });
            }
        }
        for (index, &value) in variances.iter().enumerate() {
            if !value.is_finite() || value < 0.0 {
                return Err(FPError::InvalidVariance { index, value });
            }
        }
        Ok(Topology {
            ne,
            nm,
            layout,
            counts: Array1::from(counts),
            variances: Array1::from(variances),
        })
    }

    pub fn ne(&self) -> usize {
        self.ne
    }

    pub fn nm(&self) -> usize {
        self.nm
    }

    /// Total number of lepton slots, `ne + nm`.
    pub fn ntopol(&self) -> usize {
        self.ne + self.nm
    }

    pub fn layout(&self) -> TopologyLayout {
        self.layout
    }

    pub fn counts(&self) -> &Array1<f64> {
        &self.counts
    }

    pub fn variances(&self) -> &Array1<f64> {
        &self.variances
    }

    /// Sum of all observed counts.
    pub fn total(&self) -> f64 {
        self.counts.sum()
    }

    /// Index of the "every lepton tight" bin.
    pub fn all_tight_index(&self) -> usize {
        self.counts.len() - 1
    }
}

/// Topology bin of one event for the given layout.
///
/// `tight` lists one flag per slot, electrons first. Returns
/// `FPError::SlotLengthMismatch` when `tight.len() != ne + nm`.
pub fn classify(ne: usize, nm: usize, layout: TopologyLayout, tight: &[bool]) -> FPResult<usize> {
    if tight.len() != ne + nm {
        return Err(FPError::SlotLengthMismatch {
            what: "tight flags",
            expected: ne + nm,
            found: tight.len(),
        });
    }
    let nte = tight[..ne].iter().filter(|&&t| t).count();
    let ntm = tight[ne..].iter().filter(|&&t| t).count();
    Ok(match layout {
        TopologyLayout::Aggregate => nte + ntm,
        TopologyLayout::Split => ntm * (ne + 1) + nte,
    })
}

/// TopologyCounter — event-by-event topology classifier.
///
/// Accumulates Σw and Σw² per topology bin; [`TopologyCounter::finish`]
/// hands the result to the estimator as a [`Topology`] whose variances are
/// the Σw² sums.
#[derive(Debug, Clone, PartialEq)]
pub struct TopologyCounter {
    ne: usize,
    nm: usize,
    layout: TopologyLayout,
    sum_w: Vec<f64>,
    sum_w2: Vec<f64>,
    n_events: usize,
}

impl TopologyCounter {
    pub fn new(ne: usize, nm: usize, layout: TopologyLayout) -> FPResult<Self> {
        validate_multiplicity(ne, nm)?;
        let n = layout.len(ne, nm);
        Ok(TopologyCounter {
            ne,
            nm,
            layout,
            sum_w: vec![0.0; n],
            sum_w2: vec![0.0; n],
            n_events: 0,
        })
    }

    /// Add one event with unit weight.
    pub fn fill(&mut self, tight: &[bool]) -> FPResult<()> {
        self.fill_weighted(tight, 1.0)
    }

    /// Add one event with weight `weight` (e.g. a luminosity scale factor).
    pub fn fill_weighted(&mut self, tight: &[bool], weight: f64) -> FPResult<()> {
        let index = classify(self.ne, self.nm, self.layout, tight)?;
        if !weight.is_finite() || weight < 0.0 {
            return Err(FPError::InvalidCount { index, value: weight });
        }
        self.sum_w[index] += weight;
        self.sum_w2[index] += weight * weight;
        self.n_events += 1;
        Ok(())
    }

    /// Number of events filled so far.
    pub fn n_events(&self) -> usize {
        self.n_events
    }

    /// Freeze the counts into a [`Topology`].
    pub fn finish(self) -> FPResult<Topology> {
        Topology::with_variances(self.ne, self.nm, self.sum_w, self.sum_w2)
    }
}

// ---- Helper methods ----

pub(crate) fn validate_multiplicity(ne: usize, nm: usize) -> FPResult<()> {
    if ne + nm == 0 {
        return Err(FPError::NoLeptons);
    }
    for (flavor, count) in [(Flavor::Electron, ne), (Flavor::Muon, nm)] {
        if count > MAX_SLOTS_PER_FLAVOR {
            return Err(FPError::TooManyLeptons { flavor, count, max: MAX_SLOTS_PER_FLAVOR });
        }
    }
    Ok(())
}
