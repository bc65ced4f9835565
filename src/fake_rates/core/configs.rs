//! FPConfig enumeration in canonical order.
//!
//! An FPConfig splits each flavor's slots into fakes and prompts:
//! `nfe + npe = ne`, `nfm + npm = nm`. The canonical order sorts by total
//! number of fakes; within the same total, configurations with more fake
//! electrons come first. For two leptons of one flavor this is
//! `pp, fp, ff`; for one electron and one muon it is `pp, fp, pf, ff`
//! where the first letter refers to the electron.
//!
//! Every per-config output of the estimator (yields, errors, covariance
//! pairs, event weights) is indexed in this order.
use crate::fake_rates::errors::{FPError, FPResult};
use std::fmt;

/// FPConfig — one fake/prompt hypothesis for an event class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FPConfig {
    pub ne: usize,
    pub nm: usize,
    /// Fake electrons.
    pub nfe: usize,
    /// Fake muons.
    pub nfm: usize,
}

impl FPConfig {
    /// Validated config for `(ne, nm)`.
    pub fn new(ne: usize, nm: usize, nfe: usize, nfm: usize) -> FPResult<Self> {
        if nfe > ne || nfm > nm {
            return Err(FPError::ConfigOutOfRange { nfe, nfm, ne, nm });
        }
        Ok(FPConfig { ne, nm, nfe, nfm })
    }

    /// Prompt electrons.
    pub fn npe(&self) -> usize {
        self.ne - self.nfe
    }

    /// Prompt muons.
    pub fn npm(&self) -> usize {
        self.nm - self.nfm
    }

    pub fn n_fakes(&self) -> usize {
        self.nfe + self.nfm
    }

    /// `true` when at least one lepton is fake.
    pub fn has_fake(&self) -> bool {
        self.n_fakes() > 0
    }

    /// All configs for `(ne, nm)` in canonical order.
    pub fn enumerate(ne: usize, nm: usize) -> Vec<FPConfig> {
        let mut configs: Vec<FPConfig> = (0..=ne)
            .flat_map(|nfe| (0..=nm).map(move |nfm| FPConfig { ne, nm, nfe, nfm }))
            .collect();
        configs.sort_by(|a, b| a.n_fakes().cmp(&b.n_fakes()).then(b.nfe.cmp(&a.nfe)));
        configs
    }

    /// Position of this config in [`FPConfig::enumerate`]; `None` for a
    /// hand-built config with `nfe > ne` or `nfm > nm`.
    pub fn canonical_index(&self) -> Option<usize> {
        FPConfig::enumerate(self.ne, self.nm).iter().position(|c| c == self)
    }
}

/// Short label: one letter per slot, electrons first, fakes before prompts
/// within a flavor (`"pp"`, `"fp"`, `"ffp"`, ...).
impl fmt::Display for FPConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let electrons = "f".repeat(self.nfe) + &"p".repeat(self.npe());
        let muons = "f".repeat(self.nfm) + &"p".repeat(self.npm());
        write!(f, "{electrons}{muons}")
    }
}

/// Pairwise `(i, j)` with `i < j` in the order used for covariance vectors:
/// `(0, 1), (0, 2), …, (1, 2), …`.
pub fn covariance_pairs(n: usize) -> Vec<(usize, usize)> {
    (0..n).flat_map(|i| (i + 1..n).map(move |j| (i, j))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    // Purpose
    // -------
    // Canonical order for the two-lepton channels.
    //
    // Expect
    // ------
    // - μμ: (nfm) = 0, 1, 2.
    // - eμ: (nfe, nfm) = (0,0), (1,0), (0,1), (1,1).
    fn enumerate_two_lepton_channels_in_canonical_order() {
        let mumu: Vec<usize> = FPConfig::enumerate(0, 2).iter().map(|c| c.nfm).collect();
        assert_eq!(mumu, vec![0, 1, 2]);

        let emu: Vec<(usize, usize)> =
            FPConfig::enumerate(1, 1).iter().map(|c| (c.nfe, c.nfm)).collect();
        assert_eq!(emu, vec![(0, 0), (1, 0), (0, 1), (1, 1)]);
    }

    #[test]
    // Purpose
    // -------
    // Larger classes sort by total fakes, electrons first within a tie.
    //
    // Given
    // -----
    // - ne = 2, nm = 1 (six configs).
    //
    // Expect
    // ------
    // - (0,0), (1,0), (0,1), (2,0), (1,1), (2,1).
    fn enumerate_sorts_by_total_fakes_then_electrons() {
        let got: Vec<(usize, usize)> =
            FPConfig::enumerate(2, 1).iter().map(|c| (c.nfe, c.nfm)).collect();
        assert_eq!(got, vec![(0, 0), (1, 0), (0, 1), (2, 0), (1, 1), (2, 1)]);
        assert_eq!(FPConfig::new(2, 1, 1, 1).unwrap().canonical_index(), Some(4));
    }

    #[test]
    // Purpose
    // -------
    // Labels match the conventional pp / fp / ff names.
    fn display_labels_follow_conventions() {
        let mumu: Vec<String> = FPConfig::enumerate(0, 2).iter().map(|c| c.to_string()).collect();
        assert_eq!(mumu, vec!["pp", "fp", "ff"]);
        let emu: Vec<String> = FPConfig::enumerate(1, 1).iter().map(|c| c.to_string()).collect();
        assert_eq!(emu, vec!["pp", "fp", "pf", "ff"]);
    }

    #[test]
    // Purpose
    // -------
    // Out-of-range configs are rejected and pair ordering is row-major.
    fn config_validation_and_pair_order() {
        assert_eq!(
            FPConfig::new(0, 2, 1, 0),
            Err(FPError::ConfigOutOfRange { nfe: 1, nfm: 0, ne: 0, nm: 2 })
        );
        let hand_built = FPConfig { ne: 0, nm: 2, nfe: 3, nfm: 0 };
        assert_eq!(hand_built.canonical_index(), None);
        assert_eq!(covariance_pairs(3), vec![(0, 1), (0, 2), (1, 2)]);
        assert!(covariance_pairs(1).is_empty());
    }
}
