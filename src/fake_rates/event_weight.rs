//! event_weight — per-event fake/prompt weights and their accumulation.
//!
//! Purpose
//! -------
//! Assign every loose event a weight per FPConfig so that summing the
//! weights over a sample estimates the FPConfig yields directly, with ratios
//! evaluated at each event's own lepton kinematics.
//!
//! Key behaviors
//! -------------
//! - The weight of an event for a config is the sum, over every assignment of
//!   which slots are fake consistent with the config, of the product of the
//!   per-slot inverse entries `M⁻¹_s[hypothesis][tight?]`.
//! - [`EventWeight`] carries `∂w/∂θ` per distinct ratio and reports the
//!   propagated ratio error through [`EventWeight::error`].
//! - [`EventWeightSum`] accumulates Σw, Σw² (statistical variance) and the
//!   summed gradients (systematic variance, combined in quadrature at the
//!   end).
//!
//! Invariants & assumptions
//! ------------------------
//! - With flat ratios, the summed weights equal the yields of the
//!   single-flavor or flavor-split solve; with per-event ratios they are the
//!   natural generalization.
//! - The weights of one event over all configs sum to one.
use crate::fake_rates::{
    closed_form::SlotInverse,
    core::{
        configs::FPConfig,
        flavor::{Kinematics, RatioKind},
        options::DEFAULT_DEGENERACY_TOLERANCE,
        topology::validate_multiplicity,
    },
    errors::{FPError, FPResult},
    weights::{
        ParameterKey, ParameterSet, SlotRatios, check_degeneracy, fake_assignments, is_fake,
        validate_slot_order,
    },
};
use ndarray::Array1;
use std::collections::BTreeMap;

/// LeptonEvent — tight flags and optional kinematics of one event.
#[derive(Debug, Clone, PartialEq)]
pub struct LeptonEvent {
    tight: Vec<bool>,
    kinematics: Option<Kinematics>,
}

impl LeptonEvent {
    /// Event whose ratios are looked up at `kinematics`.
    ///
    /// Errors
    /// ------
    /// - `FPError::SlotLengthMismatch` when the kinematics cover a different
    ///   number of slots than `tight`.
    pub fn new(tight: Vec<bool>, kinematics: Kinematics) -> FPResult<Self> {
        if kinematics.len() != tight.len() {
            return Err(FPError::SlotLengthMismatch {
                what: "kinematics",
                expected: tight.len(),
                found: kinematics.len(),
            });
        }
        Ok(LeptonEvent { tight, kinematics: Some(kinematics) })
    }

    /// Event evaluated with flat ratios.
    pub fn flat(tight: Vec<bool>) -> Self {
        LeptonEvent { tight, kinematics: None }
    }

    pub fn tight(&self) -> &[bool] {
        &self.tight
    }

    pub fn kinematics(&self) -> Option<&Kinematics> {
        self.kinematics.as_ref()
    }
}

/// WeightTerm — sensitivity of a weight to one measured ratio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightTerm {
    pub key: ParameterKey,
    pub derivative: f64,
    pub error: f64,
}

/// EventWeight — one event's weight for one FPConfig.
#[derive(Debug, Clone, PartialEq)]
pub struct EventWeight {
    config: FPConfig,
    weight: f64,
    terms: Vec<WeightTerm>,
}

impl EventWeight {
    pub fn config(&self) -> FPConfig {
        self.config
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn terms(&self) -> &[WeightTerm] {
        &self.terms
    }

    /// Error on the weight propagated from the ratio errors.
    #[doc(alias = "FPWeightError")]
    pub fn error(&self) -> f64 {
        self.terms.iter().map(|t| (t.derivative * t.error).powi(2)).sum::<f64>().sqrt()
    }
}

/// Weight of one event for `config` given explicit per-slot ratios.
///
/// Parameters
/// ----------
/// - `config`: the FPConfig; its `(ne, nm)` fixes the slot layout.
/// - `slots`: `ne + nm` slot ratios, electrons first.
/// - `tight`: one flag per slot, electrons first.
///
/// Errors
/// ------
/// - `FPError::ConfigOutOfRange` when `nfe > ne` or `nfm > nm`.
/// - `FPError::SlotLengthMismatch` for misaligned `slots` / `tight`.
/// - `FPError::DegenerateRatios` when a slot has `f == p`.
/// - `FPError::NonFiniteResult` when the weight is not finite.
#[doc(alias = "FPWeight")]
pub fn fp_weight(config: FPConfig, slots: &[SlotRatios], tight: &[bool]) -> FPResult<EventWeight> {
    validate_event(config.ne, config.nm, slots, tight, DEFAULT_DEGENERACY_TOLERANCE)?;
    let index = config.canonical_index().ok_or(FPError::ConfigOutOfRange {
        nfe: config.nfe,
        nfm: config.nfm,
        ne: config.ne,
        nm: config.nm,
    })?;
    weight_for(config, index, slots, tight, &ParameterSet::from_slots(slots))
}

/// Weights of one event for every FPConfig of `(ne, nm)`, canonical order.
pub fn event_weights(
    ne: usize, nm: usize, slots: &[SlotRatios], tight: &[bool],
) -> FPResult<Vec<EventWeight>> {
    event_weights_with_tolerance(ne, nm, slots, tight, DEFAULT_DEGENERACY_TOLERANCE)
}

pub(crate) fn event_weights_with_tolerance(
    ne: usize, nm: usize, slots: &[SlotRatios], tight: &[bool], tolerance: f64,
) -> FPResult<Vec<EventWeight>> {
    validate_event(ne, nm, slots, tight, tolerance)?;
    let params = ParameterSet::from_slots(slots);
    FPConfig::enumerate(ne, nm)
        .into_iter()
        .enumerate()
        .map(|(index, c)| weight_for(c, index, slots, tight, &params))
        .collect()
}

/// EventWeightSum — running sums of event weights per FPConfig.
///
/// Fields
/// ------
/// - `sum_w`, `sum_w2`: Σw and Σw² per config.
/// - `gradients`: Σ∂w/∂θ per config for every ratio seen, with its error.
#[derive(Debug, Clone, PartialEq)]
pub struct EventWeightSum {
    configs: Vec<FPConfig>,
    sum_w: Vec<f64>,
    sum_w2: Vec<f64>,
    gradients: BTreeMap<ParameterKey, (f64, Vec<f64>)>,
    n_events: usize,
}

impl EventWeightSum {
    pub fn new(ne: usize, nm: usize) -> FPResult<Self> {
        validate_multiplicity(ne, nm)?;
        let configs = FPConfig::enumerate(ne, nm);
        let n = configs.len();
        Ok(EventWeightSum {
            configs,
            sum_w: vec![0.0; n],
            sum_w2: vec![0.0; n],
            gradients: BTreeMap::new(),
            n_events: 0,
        })
    }

    /// Add one event's weights (one per config, canonical order).
    ///
    /// Errors
    /// ------
    /// - `FPError::ShapeMismatch` for the wrong number of weights.
    /// - `FPError::ConfigOutOfRange` when a weight belongs to another config.
    pub fn add(&mut self, weights: &[EventWeight]) -> FPResult<()> {
        if weights.len() != self.configs.len() {
            return Err(FPError::ShapeMismatch {
                expected: self.configs.len(),
                found: weights.len(),
            });
        }
        if let Some(w) = weights.iter().zip(&self.configs).find(|(w, c)| w.config != **c) {
            let config = w.0.config;
            return Err(FPError::ConfigOutOfRange {
                nfe: config.nfe,
                nfm: config.nfm,
                ne: self.configs[0].ne,
                nm: self.configs[0].nm,
            });
        }
        let n = self.configs.len();
        for (c, w) in weights.iter().enumerate() {
            self.sum_w[c] += w.weight;
            self.sum_w2[c] += w.weight * w.weight;
            for term in &w.terms {
                let entry = self.gradients.entry(term.key).or_insert((term.error, vec![0.0; n]));
                entry.1[c] += term.derivative;
            }
        }
        self.n_events += 1;
        Ok(())
    }

    /// Fold another accumulator of the same shape into this one.
    pub fn merge(&mut self, other: &EventWeightSum) -> FPResult<()> {
        if other.configs != self.configs {
            return Err(FPError::ShapeMismatch {
                expected: self.configs.len(),
                found: other.configs.len(),
            });
        }
        for c in 0..self.configs.len() {
            self.sum_w[c] += other.sum_w[c];
            self.sum_w2[c] += other.sum_w2[c];
        }
        let n = self.configs.len();
        for (key, (error, grad)) in &other.gradients {
            let entry = self.gradients.entry(*key).or_insert((*error, vec![0.0; n]));
            for (acc, g) in entry.1.iter_mut().zip(grad) {
                *acc += g;
            }
        }
        self.n_events += other.n_events;
        Ok(())
    }

    pub fn configs(&self) -> &[FPConfig] {
        &self.configs
    }

    pub fn n_events(&self) -> usize {
        self.n_events
    }

    /// Σw per config.
    pub fn yields(&self) -> Array1<f64> {
        Array1::from(self.sum_w.clone())
    }

    /// √Σw² per config.
    pub fn err_stat(&self) -> Array1<f64> {
        self.sum_w2.iter().map(|v| v.sqrt()).collect()
    }

    /// Ratio errors propagated through the summed gradients, per config.
    pub fn err_syst(&self) -> Array1<f64> {
        (0..self.configs.len())
            .map(|c| {
                self.gradients
                    .values()
                    .map(|(error, grad)| (grad[c] * error).powi(2))
                    .sum::<f64>()
                    .sqrt()
            })
            .collect()
    }
}

// ---- Helper methods ----

fn validate_event(
    ne: usize, nm: usize, slots: &[SlotRatios], tight: &[bool], tolerance: f64,
) -> FPResult<()> {
    validate_multiplicity(ne, nm)?;
    validate_slot_order(ne, nm, slots)?;
    if tight.len() != ne + nm {
        return Err(FPError::SlotLengthMismatch {
            what: "tight flags",
            expected: ne + nm,
            found: tight.len(),
        });
    }
    check_degeneracy(slots, tolerance)
}

fn weight_for(
    config: FPConfig, index: usize, slots: &[SlotRatios], tight: &[bool], params: &ParameterSet,
) -> FPResult<EventWeight> {
    let inverses: Vec<SlotInverse> = slots
        .iter()
        .map(|s| SlotInverse::new(s.fake.ratio.value, s.prompt.ratio.value))
        .collect();
    let mut weight = 0.0;
    let mut grads = vec![0.0; params.len()];

    for e_mask in fake_assignments(config.ne, config.nfe) {
        for m_mask in fake_assignments(config.nm, config.nfm) {
            let mask = e_mask | (m_mask << config.ne);
            let factors: Vec<f64> = inverses
                .iter()
                .enumerate()
                .map(|(s, inv)| inv.entry(is_fake(mask, s), tight[s]))
                .collect();
            weight += factors.iter().product::<f64>();
            for (s, inv) in inverses.iter().enumerate() {
                let others: f64 =
                    factors.iter().enumerate().filter(|(i, _)| *i != s).map(|(_, f)| f).product();
                let hypothesis = is_fake(mask, s);
                let (fake, prompt) =
                    (params.index(s, RatioKind::Fake), params.index(s, RatioKind::Prompt));
                grads[fake] += inv.d_fake(hypothesis, tight[s]) * others;
                grads[prompt] += inv.d_prompt(hypothesis, tight[s]) * others;
            }
        }
    }

    if !weight.is_finite() {
        return Err(FPError::NonFiniteResult {
            what: "event weight",
            index,
            value: weight,
        });
    }
    let terms = params
        .keys()
        .iter()
        .zip(params.errors())
        .zip(grads)
        .map(|((&key, &error), derivative)| WeightTerm { key, derivative, error })
        .collect();
    Ok(EventWeight { config, weight, terms })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_rates::core::{flavor::Flavor, ratios::RatioValue};
    use approx::assert_abs_diff_eq;
    use finitediff::FiniteDiff;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Single-event weights against the inverse weight matrix.
    // - Normalization of one event's weights over configs.
    // - ∂w/∂θ against central finite differences.
    // - Accumulation and merging in EventWeightSum.
    // - Input validation.
    // -------------------------------------------------------------------------

    fn flat(flavor: Flavor, f: f64, p: f64) -> SlotRatios {
        SlotRatios::flat(flavor, RatioValue::new(f), RatioValue::new(p))
    }

    #[test]
    // Purpose
    // -------
    // A di-muon tight-tight event gets the last column of W⁻¹.
    //
    // Given
    // -----
    // - f = 0.2, p = 0.8, both muons tight.
    //
    // Expect
    // ------
    // - w_pp = (1−f)²/D² = 0.64/0.36, w_fp = −2(1−f)(1−p)/D² = −0.32/0.36,
    //   w_ff = (1−p)²/D² = 0.04/0.36; the three sum to one.
    fn tight_tight_weights_match_closed_form() {
        // Arrange
        let slots = vec![flat(Flavor::Muon, 0.2, 0.8); 2];

        // Act
        let weights = event_weights(0, 2, &slots, &[true, true]).unwrap();

        // Assert
        assert_abs_diff_eq!(weights[0].weight(), 0.64 / 0.36, epsilon = 1e-12);
        assert_abs_diff_eq!(weights[1].weight(), -0.32 / 0.36, epsilon = 1e-12);
        assert_abs_diff_eq!(weights[2].weight(), 0.04 / 0.36, epsilon = 1e-12);
        let total: f64 = weights.iter().map(EventWeight::weight).sum();
        assert_abs_diff_eq!(total, 1.0, epsilon = 1e-12);
        assert_eq!(weights[1].terms().len(), 2);
    }

    #[test]
    // Purpose
    // -------
    // Weight derivatives agree with central finite differences, and the
    // weight error is their quadrature sum with the ratio errors.
    //
    // Given
    // -----
    // - One electron (tight) and two muons (loose, tight) with distinct
    //   ratios; config with one fake electron and one fake muon.
    fn weight_derivatives_match_finite_differences() {
        // Arrange
        let x0 = vec![0.1, 0.7, 0.15, 0.9, 0.25, 0.85];
        let slots_at = |x: &Vec<f64>| {
            let mut s = vec![
                flat(Flavor::Electron, x[0], x[1]),
                flat(Flavor::Muon, x[2], x[3]),
                flat(Flavor::Muon, x[4], x[5]),
            ];
            s[2].fake.bin = 1;
            s[2].prompt.bin = 1;
            s
        };
        let tight = [true, false, true];
        let config = FPConfig::new(1, 2, 1, 1).unwrap();

        // Act
        let w = fp_weight(config, &slots_at(&x0), &tight).unwrap();
        let fd = x0.central_diff(&|x: &Vec<f64>| {
            fp_weight(config, &slots_at(x), &tight).unwrap().weight()
        });

        // Assert
        assert_eq!(w.terms().len(), 6);
        for (term, expected) in w.terms().iter().zip(&fd) {
            assert_abs_diff_eq!(term.derivative, *expected, epsilon = 1e-6);
        }
        let manual: f64 =
            w.terms().iter().map(|t| (t.derivative * t.error).powi(2)).sum::<f64>().sqrt();
        assert_abs_diff_eq!(w.error(), manual, epsilon = 1e-15);
    }

    #[test]
    // Purpose
    // -------
    // EventWeightSum accumulates Σw and Σw², and merging two halves equals
    // filling everything into one accumulator.
    fn weight_sum_accumulates_and_merges() {
        // Arrange
        let slots = vec![flat(Flavor::Muon, 0.2, 0.8); 2];
        let events = [[true, true], [true, false], [false, true], [false, false]];
        let mut all = EventWeightSum::new(0, 2).unwrap();
        let mut first = EventWeightSum::new(0, 2).unwrap();
        let mut second = EventWeightSum::new(0, 2).unwrap();

        // Act
        for (i, tight) in events.iter().enumerate() {
            let weights = event_weights(0, 2, &slots, tight).unwrap();
            all.add(&weights).unwrap();
            if i < 2 { first.add(&weights).unwrap() } else { second.add(&weights).unwrap() }
        }
        first.merge(&second).unwrap();

        // Assert
        assert_eq!(all.n_events(), 4);
        assert_abs_diff_eq!(all.yields().sum(), 4.0, epsilon = 1e-12);
        for c in 0..3 {
            assert_abs_diff_eq!(first.yields()[c], all.yields()[c], epsilon = 1e-12);
            assert_abs_diff_eq!(first.err_stat()[c], all.err_stat()[c], epsilon = 1e-12);
            assert_abs_diff_eq!(first.err_syst()[c], all.err_syst()[c], epsilon = 1e-12);
        }
    }

    #[test]
    // Purpose
    // -------
    // Misaligned inputs, out-of-range configs and foreign weights are
    // rejected.
    fn invalid_events_are_rejected() {
        let slots = vec![flat(Flavor::Muon, 0.2, 0.8); 2];
        assert!(matches!(
            event_weights(0, 2, &slots, &[true]),
            Err(FPError::SlotLengthMismatch { what: "tight flags", expected: 2, found: 1 })
        ));
        let degenerate = vec![flat(Flavor::Muon, 0.4, 0.4); 2];
        assert!(matches!(
            event_weights(0, 2, &degenerate, &[true, true]),
            Err(FPError::DegenerateRatios { .. })
        ));
        let hand_built = FPConfig { ne: 0, nm: 2, nfe: 3, nfm: 0 };
        assert_eq!(
            fp_weight(hand_built, &slots, &[true, true]).unwrap_err(),
            FPError::ConfigOutOfRange { nfe: 3, nfm: 0, ne: 0, nm: 2 }
        );
        assert!(matches!(
            LeptonEvent::new(vec![true, true], Kinematics::uniform(3, 20.0, 0.0).unwrap()),
            Err(FPError::SlotLengthMismatch { expected: 2, found: 3, .. })
        ));

        let mut sum = EventWeightSum::new(0, 2).unwrap();
        let weights = event_weights(0, 2, &slots, &[true, true]).unwrap();
        assert!(matches!(sum.add(&weights[..2]), Err(FPError::ShapeMismatch { .. })));
        let other = EventWeightSum::new(1, 1).unwrap();
        assert!(matches!(sum.merge(&other), Err(FPError::ShapeMismatch { .. })));
    }
}
