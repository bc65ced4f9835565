//! closed_form — analytic two-lepton solutions of the tight/loose system.
//!
//! Purpose
//! -------
//! Provide the textbook tight/loose formulas for events with two leptons, and
//! the single-slot inverse they are built from. The general solver is
//! checked against these; the estimator prefers them for the yields when
//! they apply.
//!
//! Key behaviors
//! -------------
//! - [`SlotInverse`] is the inverse of one slot's 2 × 2 matrix
//!   `[[1 − p, 1 − f], [p, f]]` (rows observed fail/pass, columns prompt/fake)
//!   with its analytic derivatives in `f` and `p`.
//! - [`single_flavor_yields`]: two slots of one flavor sharing `(f, p)`,
//!   aggregate counts `[N0, N1, N2]` → `[Npp, Nfp, Nff]`.
//! - [`split_yields`]: one electron and one muon with flavor-split counts →
//!   `[Npp, Nfp, Npf, Nff]`, the tensor product of two slot inverses.
//!
//! Invariants & assumptions
//! ------------------------
//! - `f ≠ p` for every slot; the caller rejects degenerate ratios first.
use crate::fake_rates::{core::topology::TopologyLayout, weights::SlotRatios};

/// SlotInverse — `M⁻¹` for one lepton slot, `D = f − p`.
///
/// | hypothesis \ observed | fail    | pass         |
/// |-----------------------|---------|--------------|
/// | prompt                | `f / D` | `(f − 1) / D`|
/// | fake                  | `−p / D`| `(1 − p) / D`|
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotInverse {
    pub fake: f64,
    pub prompt: f64,
}

impl SlotInverse {
    pub fn new(fake: f64, prompt: f64) -> Self {
        SlotInverse { fake, prompt }
    }

    fn det(&self) -> f64 {
        self.fake - self.prompt
    }

    /// `M⁻¹[hypothesis][observed]`.
    pub fn entry(&self, is_fake: bool, tight: bool) -> f64 {
        let (f, p, d) = (self.fake, self.prompt, self.det());
        match (is_fake, tight) {
            (false, false) => f / d,
            (false, true) => (f - 1.0) / d,
            (true, false) => -p / d,
            (true, true) => (1.0 - p) / d,
        }
    }

    /// `∂M⁻¹[hypothesis][observed] / ∂f`.
    pub fn d_fake(&self, is_fake: bool, tight: bool) -> f64 {
        let (p, d2) = (self.prompt, self.det().powi(2));
        match (is_fake, tight) {
            (false, false) => -p / d2,
            (false, true) => (1.0 - p) / d2,
            (true, false) => p / d2,
            (true, true) => -(1.0 - p) / d2,
        }
    }

    /// `∂M⁻¹[hypothesis][observed] / ∂p`.
    pub fn d_prompt(&self, is_fake: bool, tight: bool) -> f64 {
        let (f, d2) = (self.fake, self.det().powi(2));
        match (is_fake, tight) {
            (false, false) => f / d2,
            (false, true) => (f - 1.0) / d2,
            (true, false) => -f / d2,
            (true, true) => (1.0 - f) / d2,
        }
    }
}

/// `[Npp, Nfp, Nff]` for two same-flavor slots sharing `(f, p)`.
///
/// `counts` is `[N0, N1, N2]` indexed by the number of tight leptons.
pub fn single_flavor_yields(fake: f64, prompt: f64, counts: [f64; 3]) -> [f64; 3] {
    let (f, p) = (fake, prompt);
    let [n0, n1, n2] = counts;
    let d2 = (f - p).powi(2);
    let npp = (f * f * n0 - f * (1.0 - f) * n1 + (1.0 - f).powi(2) * n2) / d2;
    let nfp = (-2.0 * f * p * n0 + (f * (1.0 - p) + p * (1.0 - f)) * n1
        - 2.0 * (1.0 - f) * (1.0 - p) * n2)
        / d2;
    let nff = (p * p * n0 - p * (1.0 - p) * n1 + (1.0 - p).powi(2) * n2) / d2;
    [npp, nfp, nff]
}

/// `[Npp, Nfp, Npf, Nff]` (electron letter first) for one electron and one
/// muon.
///
/// `counts` is `[none tight, electron tight, muon tight, both tight]`.
pub fn split_yields(electron: SlotInverse, muon: SlotInverse, counts: [f64; 4]) -> [f64; 4] {
    let hypotheses = [(false, false), (true, false), (false, true), (true, true)];
    hypotheses.map(|(e_fake, m_fake)| {
        counts.iter().enumerate().fold(0.0, |acc, (index, &n)| {
            let (e_tight, m_tight) = (index % 2 == 1, index / 2 == 1);
            acc + electron.entry(e_fake, e_tight) * muon.entry(m_fake, m_tight) * n
        })
    })
}

/// Analytic yields when a two-lepton closed form applies.
///
/// Returns `None` for more or fewer than two slots, for two same-flavor slots
/// with different ratios, and for the aggregate one-electron-one-muon layout
/// (three counts for four unknowns has no unique inverse).
pub fn two_lepton_yields(
    ne: usize, nm: usize, layout: TopologyLayout, slots: &[SlotRatios], counts: &[f64],
) -> Option<Vec<f64>> {
    if ne + nm != 2 || slots.len() != 2 {
        return None;
    }
    let (a, b) = (&slots[0], &slots[1]);
    if ne == 1 {
        if layout != TopologyLayout::Split {
            return None;
        }
        let counts: [f64; 4] = counts.try_into().ok()?;
        let electron = SlotInverse::new(a.fake.ratio.value, a.prompt.ratio.value);
        let muon = SlotInverse::new(b.fake.ratio.value, b.prompt.ratio.value);
        return Some(split_yields(electron, muon, counts).to_vec());
    }
    let shared = a.fake.ratio.value == b.fake.ratio.value
        && a.prompt.ratio.value == b.prompt.ratio.value;
    if !shared {
        return None;
    }
    let counts: [f64; 3] = counts.try_into().ok()?;
    Some(single_flavor_yields(a.fake.ratio.value, a.prompt.ratio.value, counts).to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_rates::{
        core::{flavor::Flavor, options::EstimatorOptions, ratios::RatioValue},
        solve::solve,
        weights::WeightSystem,
    };
    use approx::assert_abs_diff_eq;
    use finitediff::FiniteDiff;
    use nalgebra::DVector;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - The di-muon reference point of the analytic formulas.
    // - Agreement of both closed forms with the general SVD solve.
    // - SlotInverse entries and derivatives.
    // - Applicability rules of `two_lepton_yields`.
    // -------------------------------------------------------------------------

    fn general_solve(
        ne: usize, nm: usize, layout: TopologyLayout, slots: &[SlotRatios], counts: &[f64],
    ) -> Vec<f64> {
        let system = WeightSystem::build(ne, nm, layout, slots).unwrap();
        let y = DVector::from_column_slice(counts);
        let sol = solve(&system, &y, &y, &EstimatorOptions::default()).unwrap();
        sol.yields().iter().copied().collect()
    }

    fn flat(flavor: Flavor, f: f64, p: f64) -> SlotRatios {
        SlotRatios::flat(flavor, RatioValue::new(f), RatioValue::new(p))
    }

    #[test]
    // Purpose
    // -------
    // The single-flavor formulas reproduce the reference point.
    //
    // Given
    // -----
    // - f = 0.2, p = 0.8, counts [10, 50, 40].
    //
    // Expect
    // ------
    // - Npp = 50, Nfp = 50, Nff = 0.
    fn single_flavor_reference_point() {
        let [npp, nfp, nff] = single_flavor_yields(0.2, 0.8, [10.0, 50.0, 40.0]);
        assert_abs_diff_eq!(npp, 50.0, epsilon = 1e-9);
        assert_abs_diff_eq!(nfp, 50.0, epsilon = 1e-9);
        assert_abs_diff_eq!(nff, 0.0, epsilon = 1e-9);
    }

    #[test]
    // Purpose
    // -------
    // The general solver reduces to the analytic closed forms for two
    // leptons.
    //
    // Given
    // -----
    // - Two electrons with f = 0.12, p = 0.85 and counts [7, 31, 62].
    // - One electron (0.1, 0.7) and one muon (0.15, 0.9), split counts
    //   [5, 12, 8, 30].
    fn general_solve_matches_closed_forms() {
        // Arrange
        let ee = vec![flat(Flavor::Electron, 0.12, 0.85); 2];
        let emu = vec![flat(Flavor::Electron, 0.1, 0.7), flat(Flavor::Muon, 0.15, 0.9)];
        let ee_counts = [7.0, 31.0, 62.0];
        let emu_counts = [5.0, 12.0, 8.0, 30.0];

        // Act
        let ee_closed =
            two_lepton_yields(2, 0, TopologyLayout::Aggregate, &ee, &ee_counts).unwrap();
        let ee_general = general_solve(2, 0, TopologyLayout::Aggregate, &ee, &ee_counts);
        let emu_closed =
            two_lepton_yields(1, 1, TopologyLayout::Split, &emu, &emu_counts).unwrap();
        let emu_general = general_solve(1, 1, TopologyLayout::Split, &emu, &emu_counts);

        // Assert
        for (c, g) in ee_closed.iter().zip(&ee_general) {
            assert_abs_diff_eq!(*c, *g, epsilon = 1e-9);
        }
        for (c, g) in emu_closed.iter().zip(&emu_general) {
            assert_abs_diff_eq!(*c, *g, epsilon = 1e-9);
        }
        assert_abs_diff_eq!(emu_closed.iter().sum::<f64>(), 55.0, epsilon = 1e-9);
    }

    #[test]
    // Purpose
    // -------
    // SlotInverse is the inverse of the slot matrix and its derivatives
    // match central finite differences.
    fn slot_inverse_entries_and_derivatives() {
        // Arrange
        let (f, p) = (0.15, 0.9);
        let inv = SlotInverse::new(f, p);
        let m = |hyp_fake: bool, tight: bool| match (hyp_fake, tight) {
            (false, false) => 1.0 - p,
            (false, true) => p,
            (true, false) => 1.0 - f,
            (true, true) => f,
        };

        // Act & Assert: M⁻¹ · M = I.
        for hyp in [false, true] {
            for col in [false, true] {
                let product: f64 =
                    [false, true].iter().map(|&obs| inv.entry(hyp, obs) * m(col, obs)).sum();
                let expected = if hyp == col { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(product, expected, epsilon = 1e-12);
            }
        }
        for hyp in [false, true] {
            for obs in [false, true] {
                let at = |x: &Vec<f64>| SlotInverse::new(x[0], x[1]).entry(hyp, obs);
                let fd = vec![f, p].central_diff(&at);
                assert_abs_diff_eq!(inv.d_fake(hyp, obs), fd[0], epsilon = 1e-6);
                assert_abs_diff_eq!(inv.d_prompt(hyp, obs), fd[1], epsilon = 1e-6);
            }
        }
    }

    #[test]
    // Purpose
    // -------
    // `two_lepton_yields` declines cases without a unique closed form.
    fn closed_form_applicability() {
        let agg = TopologyLayout::Aggregate;
        let emu = vec![flat(Flavor::Electron, 0.1, 0.7), flat(Flavor::Muon, 0.15, 0.9)];
        assert!(two_lepton_yields(1, 1, agg, &emu, &[5.0, 20.0, 30.0]).is_none());

        let unequal = vec![flat(Flavor::Muon, 0.1, 0.9), flat(Flavor::Muon, 0.2, 0.9)];
        assert!(two_lepton_yields(0, 2, agg, &unequal, &[1.0, 2.0, 3.0]).is_none());

        let three = vec![flat(Flavor::Muon, 0.1, 0.9); 3];
        assert!(two_lepton_yields(0, 3, agg, &three, &[1.0; 4]).is_none());
    }
}
