//! binned — accumulation of per-bin predictions.
//!
//! Purpose
//! -------
//! Combine independent [`Prediction`]s, one per kinematic bin (or per run
//! period), into totals. Yields add linearly; statistical and systematic
//! errors add in quadrature.
//!
//! Key behaviors
//! -------------
//! - [`BinnedPrediction::add_result`] skips bins whose topology is empty and
//!   propagates every other error, so an unpopulated bin does not abort a
//!   scan while a real degeneracy still surfaces.
//!
//! Invariants & assumptions
//! ------------------------
//! - Bins are uncorrelated; the systematic errors are combined in quadrature
//!   per bin, which treats the ratio uncertainties of different bins as
//!   independent.
use crate::fake_rates::{
    core::{configs::FPConfig, topology::validate_multiplicity},
    errors::{FPError, FPResult},
    estimator::{Estimate, Prediction},
};
use ndarray::Array1;
use tracing::debug;

/// BinnedPrediction — running totals over bins.
#[derive(Debug, Clone, PartialEq)]
pub struct BinnedPrediction {
    configs: Vec<FPConfig>,
    yields: Array1<f64>,
    var_stat: Array1<f64>,
    var_syst: Array1<f64>,
    background: Estimate,
    n_bins: usize,
    n_skipped: usize,
}

impl BinnedPrediction {
    pub fn new(ne: usize, nm: usize) -> FPResult<Self> {
        validate_multiplicity(ne, nm)?;
        let configs = FPConfig::enumerate(ne, nm);
        let n = configs.len();
        Ok(BinnedPrediction {
            configs,
            yields: Array1::zeros(n),
            var_stat: Array1::zeros(n),
            var_syst: Array1::zeros(n),
            background: Estimate::default(),
            n_bins: 0,
            n_skipped: 0,
        })
    }

    /// Add one bin.
    ///
    /// Errors
    /// ------
    /// - `FPError::ShapeMismatch` when the prediction has different FPConfigs.
    pub fn add(&mut self, prediction: &Prediction) -> FPResult<()> {
        if prediction.configs() != self.configs.as_slice() {
            return Err(FPError::ShapeMismatch {
                expected: self.configs.len(),
                found: prediction.configs().len(),
            });
        }
        self.yields += &prediction.yields();
        self.var_stat += &prediction.err_stat().mapv(|e| e * e);
        self.var_syst += &prediction.err_syst().mapv(|e| e * e);

        let bkg = prediction.fake_background();
        self.background.value += bkg.value;
        self.background.stat = self.background.stat.hypot(bkg.stat);
        self.background.syst = self.background.syst.hypot(bkg.syst);
        self.n_bins += 1;
        Ok(())
    }

    /// Add the outcome of one bin's `predict` call; empty bins are skipped.
    pub fn add_result(&mut self, result: FPResult<Prediction>) -> FPResult<()> {
        match result {
            Ok(prediction) => self.add(&prediction),
            Err(FPError::EmptyTopology) => {
                debug!(bin = self.n_bins + self.n_skipped, "skipping empty topology");
                self.n_skipped += 1;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    pub fn configs(&self) -> &[FPConfig] {
        &self.configs
    }

    pub fn yields(&self) -> Array1<f64> {
        self.yields.clone()
    }

    pub fn err_stat(&self) -> Array1<f64> {
        self.var_stat.mapv(|v| v.max(0.0).sqrt())
    }

    pub fn err_syst(&self) -> Array1<f64> {
        self.var_syst.mapv(|v| v.max(0.0).sqrt())
    }

    /// Summed fake background with quadrature errors.
    pub fn fake_background(&self) -> Estimate {
        self.background
    }

    /// Bins added with a prediction.
    pub fn n_bins(&self) -> usize {
        self.n_bins
    }

    /// Bins skipped because their topology was empty.
    pub fn n_skipped(&self) -> usize {
        self.n_skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_rates::{
        core::{ratios::RatioValue, topology::Topology},
        estimator::MatrixMethod,
    };
    use approx::assert_abs_diff_eq;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Linear yields and quadrature errors across bins.
    // - Skipping of empty bins and propagation of other errors.
    // - Shape checks.
    // -------------------------------------------------------------------------

    fn dimuon(counts: Vec<f64>) -> FPResult<Prediction> {
        MatrixMethod::builder()
            .topology(Topology::new(0, 2, counts)?)
            .muon_ratios(RatioValue::with_error(0.2, 0.02), RatioValue::with_error(0.8, 0.05))
            .build()?
            .predict()
    }

    #[test]
    // Purpose
    // -------
    // Two identical bins double the yields and scale the errors by √2.
    fn identical_bins_add_linearly_and_in_quadrature() {
        // Arrange
        let bin = dimuon(vec![10.0, 50.0, 40.0]).unwrap();
        let mut total = BinnedPrediction::new(0, 2).unwrap();

        // Act
        total.add(&bin).unwrap();
        total.add_result(dimuon(vec![10.0, 50.0, 40.0])).unwrap();

        // Assert
        assert_eq!(total.n_bins(), 2);
        for c in 0..3 {
            assert_abs_diff_eq!(total.yields()[c], 2.0 * bin.yields()[c], epsilon = 1e-9);
            let sqrt2 = 2f64.sqrt();
            assert_abs_diff_eq!(total.err_stat()[c], sqrt2 * bin.err_stat()[c], epsilon = 1e-9);
            assert_abs_diff_eq!(total.err_syst()[c], sqrt2 * bin.err_syst()[c], epsilon = 1e-9);
        }
        assert_abs_diff_eq!(total.fake_background().value, 16.0, epsilon = 1e-9);
    }

    #[test]
    // Purpose
    // -------
    // Empty bins are counted and skipped; other failures propagate.
    fn empty_bins_are_skipped_other_errors_propagate() {
        // Arrange
        let mut total = BinnedPrediction::new(0, 2).unwrap();

        // Act
        total.add_result(dimuon(vec![0.0; 3])).unwrap();
        let singular = total.add_result(Err(FPError::SingularSystem { rank: 1, required: 3 }));

        // Assert
        assert_eq!(total.n_skipped(), 1);
        assert_eq!(total.n_bins(), 0);
        assert!(matches!(singular, Err(FPError::SingularSystem { .. })));
        assert_eq!(total.yields().sum(), 0.0);
    }

    #[test]
    // Purpose
    // -------
    // A prediction for another multiplicity is rejected.
    fn mismatched_multiplicity_is_rejected() {
        let mut total = BinnedPrediction::new(0, 3).unwrap();
        let bin = dimuon(vec![10.0, 50.0, 40.0]).unwrap();
        assert!(matches!(
            total.add(&bin),
            Err(FPError::ShapeMismatch { expected: 4, found: 3 })
        ));
    }
}
