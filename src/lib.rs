//! fake_prompt — fake/prompt matrix-method estimator with Python bindings.
//!
//! Purpose
//! -------
//! Serve as the crate root for Rust callers and as the PyO3 bridge that
//! exposes the matrix-method estimator to Python via the `_fake_prompt`
//! extension module. When the `python-bindings` feature is enabled, this
//! module defines the Python-facing class used by the `fake_prompt` package.
//!
//! Key behaviors
//! -------------
//! - Re-export the estimator stack (`fake_rates`) as the public crate surface.
//! - Define the `FPRatios` `#[pyclass]`, which follows the familiar call
//!   sequence: configure counts and ratios in any order, call `nevt_pass`,
//!   then query the errors of that prediction. The configuration is only
//!   validated when a prediction or weight is requested.
//!
//! Invariants & assumptions
//! ------------------------
//! - All numerical work is implemented in `fake_rates`; this file performs
//!   only FFI glue, input conversion, and error mapping.
//! - `FPError` values surface in Python as `ValueError`.
//!
//! Downstream usage
//! ----------------
//! - Native Rust code should depend on [`fake_rates`] (or its prelude) and can
//!   ignore the items guarded by the `python-bindings` feature.
//!
//! Testing notes
//! -------------
//! - Numerical behavior is covered by unit tests in `fake_rates` and by
//!   `tests/integration_matrix_method.rs`; the PyO3 layer is exercised from
//!   Python.

pub mod fake_rates;
pub mod utils;

#[cfg(feature = "python-bindings")]
use pyo3::{exceptions::PyValueError, prelude::*, types::PyAny};

#[cfg(feature = "python-bindings")]
use std::{mem, sync::Arc};

#[cfg(feature = "python-bindings")]
use crate::{
    fake_rates::{
        BinnedRatioProvider, LeptonEvent, MatrixMethod, MatrixMethodBuilder, Prediction,
        RatioValue,
    },
    utils::{
        build_topology, extract_f64_vec, extract_kinematics, extract_ratio_pair, parse_flavor,
        parse_ratio_kind,
    },
};

/// FPRatios — Python-facing wrapper for the matrix method.
///
/// Parameters
/// ----------
/// Constructed from Python via
/// `FPRatios(ne, nm, counts, electron=None, muon=None, variances=None)`:
/// - `ne`, `nm`: electron and muon slots of the event class.
/// - `counts`: aggregate (`ne + nm + 1`) or flavor-split (`(ne+1)(nm+1)`)
///   topology counts.
/// - `electron`, `muon`: `(fake, fake_err, prompt, prompt_err)`; a negative
///   error selects the default 10% relative error. Either may be omitted and
///   supplied later through `set_binned_ratio`.
/// - `variances`: optional per-bin variances of weighted counts.
///
/// Fields
/// ------
/// - `config`: topology, ratios and options collected so far; missing ratios
///   surface as `ValueError` from `nevt_pass` / `fp_weights`.
/// - `last`: the prediction of the most recent `nevt_pass` call, used by the
///   error accessors.
#[cfg(feature = "python-bindings")]
#[pyclass(module = "fake_prompt.fake_rates", unsendable)]
pub struct FPRatios {
    config: MatrixMethodBuilder,
    last: Option<Prediction>,
}

#[cfg(feature = "python-bindings")]
impl FPRatios {
    fn prediction(&self) -> PyResult<&Prediction> {
        self.last.as_ref().ok_or_else(|| PyValueError::new_err("call nevt_pass() first"))
    }

    fn method(&self) -> PyResult<MatrixMethod> {
        Ok(self.config.clone().build()?)
    }

    fn reconfigure(&mut self, f: impl FnOnce(MatrixMethodBuilder) -> MatrixMethodBuilder) {
        self.config = f(mem::take(&mut self.config));
        self.last = None;
    }
}

#[cfg(feature = "python-bindings")]
#[pymethods]
impl FPRatios {
    #[new]
    #[pyo3(
        signature = (ne, nm, counts, electron = None, muon = None, variances = None),
        text_signature = "(ne, nm, counts, /, electron=None, muon=None, variances=None)"
    )]
    pub fn new<'py>(
        py: Python<'py>, ne: usize, nm: usize, counts: &Bound<'py, PyAny>,
        electron: Option<(f64, f64, f64, f64)>, muon: Option<(f64, f64, f64, f64)>,
        variances: Option<&Bound<'py, PyAny>>,
    ) -> PyResult<Self> {
        let topology = build_topology(py, ne, nm, counts, variances)?;
        let mut config = MatrixMethod::builder().topology(topology);
        if let Some(ratios) = electron {
            let (f, p) = extract_ratio_pair(ratios);
            config = config.electron_ratios(f, p);
        }
        if let Some(ratios) = muon {
            let (f, p) = extract_ratio_pair(ratios);
            config = config.muon_ratios(f, p);
        }
        Ok(FPRatios { config, last: None })
    }

    /// Replace the observed counts, keeping the ratios. The new class may
    /// contain a flavor whose ratios are set afterwards.
    #[pyo3(signature = (ne, nm, counts, variances = None))]
    pub fn set_topology<'py>(
        &mut self, py: Python<'py>, ne: usize, nm: usize, counts: &Bound<'py, PyAny>,
        variances: Option<&Bound<'py, PyAny>>,
    ) -> PyResult<()> {
        let topology = build_topology(py, ne, nm, counts, variances)?;
        self.reconfigure(|config| config.topology(topology));
        Ok(())
    }

    /// Install a pt × eta binned ratio for one flavor and kind.
    ///
    /// `values` (and `errors`, if given) are `len(pt_edges) - 1` rows of
    /// `len(eta_edges) - 1` entries.
    #[pyo3(signature = (flavor, kind, pt_edges, eta_edges, values, errors = None))]
    pub fn set_binned_ratio<'py>(
        &mut self, py: Python<'py>, flavor: &str, kind: &str, pt_edges: &Bound<'py, PyAny>,
        eta_edges: &Bound<'py, PyAny>, values: Vec<Vec<f64>>, errors: Option<Vec<Vec<f64>>>,
    ) -> PyResult<()> {
        let pt_edges = extract_f64_vec(py, pt_edges)?;
        let eta_edges = extract_f64_vec(py, eta_edges)?;
        let provider = match errors {
            None => BinnedRatioProvider::from_values(pt_edges, eta_edges, values)?,
            Some(errors) => {
                if errors.len() != values.len() {
                    return Err(PyValueError::new_err("errors must match the shape of values"));
                }
                let table = values
                    .into_iter()
                    .zip(errors)
                    .map(|(row, err_row)| {
                        row.into_iter()
                            .zip(err_row)
                            .map(|(v, e)| RatioValue::with_error(v, e))
                            .collect()
                    })
                    .collect();
                BinnedRatioProvider::new(pt_edges, eta_edges, table)?
            }
        };
        let (flavor, kind) = (parse_flavor(flavor)?, parse_ratio_kind(kind)?);
        self.reconfigure(|config| config.provider(flavor, kind, Arc::new(provider)));
        Ok(())
    }

    /// Predicted yield per FPConfig (`pp, fp, pf, ff, …`).
    ///
    /// With `pt` and `eta` (one entry per slot, electrons first) the ratios
    /// are evaluated at those kinematics.
    #[pyo3(signature = (pt = None, eta = None))]
    pub fn nevt_pass<'py>(
        &mut self, py: Python<'py>, pt: Option<&Bound<'py, PyAny>>,
        eta: Option<&Bound<'py, PyAny>>,
    ) -> PyResult<Vec<f64>> {
        let method = self.method()?;
        let prediction = match extract_kinematics(py, pt, eta)? {
            Some(kinematics) => method.predict_at(&kinematics)?,
            None => method.predict()?,
        };
        let yields = prediction.yields().to_vec();
        self.last = Some(prediction);
        Ok(yields)
    }

    pub fn nevt_pass_err_stat(&self) -> PyResult<Vec<f64>> {
        Ok(self.prediction()?.err_stat().to_vec())
    }

    pub fn nevt_pass_err_syst(&self) -> PyResult<Vec<f64>> {
        Ok(self.prediction()?.err_syst().to_vec())
    }

    /// Statistical covariances for the pairs `(0,1), (0,2), …`.
    pub fn var_stat(&self) -> PyResult<Vec<f64>> {
        Ok(self.prediction()?.var_stat().to_vec())
    }

    pub fn var_syst(&self) -> PyResult<Vec<f64>> {
        Ok(self.prediction()?.var_syst().to_vec())
    }

    /// Tight yields per FPConfig.
    pub fn tight_yields(&self) -> PyResult<Vec<f64>> {
        Ok(self.prediction()?.tight_yields().to_vec())
    }

    /// `(value, stat, syst)` of the fake-induced all-tight background.
    pub fn fake_background(&self) -> PyResult<(f64, f64, f64)> {
        let bkg = self.prediction()?.fake_background();
        Ok((bkg.value, bkg.stat, bkg.syst))
    }

    /// `(weight, error)` per FPConfig for one event.
    #[pyo3(signature = (tight, pt = None, eta = None))]
    pub fn fp_weights<'py>(
        &self, py: Python<'py>, tight: Vec<bool>, pt: Option<&Bound<'py, PyAny>>,
        eta: Option<&Bound<'py, PyAny>>,
    ) -> PyResult<Vec<(f64, f64)>> {
        let event = match extract_kinematics(py, pt, eta)? {
            Some(kinematics) => LeptonEvent::new(tight, kinematics)?,
            None => LeptonEvent::flat(tight),
        };
        let weights = self.method()?.event_weights(&event)?;
        Ok(weights.iter().map(|w| (w.weight(), w.error())).collect())
    }
}

/// _fake_prompt — PyO3 module initializer for the Python extension.
///
/// Registers the `fake_rates` submodule and inserts it into `sys.modules` so
/// that `fake_prompt.fake_rates` imports work with dotted paths.
#[cfg(feature = "python-bindings")]
#[pymodule]
fn _fake_prompt<'py>(_py: Python<'py>, m: &Bound<'py, PyModule>) -> PyResult<()> {
    let fake_rates_mod = PyModule::new(_py, "fake_rates")?;
    fake_rates_mod.add_class::<FPRatios>()?;
    m.add_submodule(&fake_rates_mod)?;

    // Manually add the submodule into sys.modules to allow for dot notation.
    _py.import("sys")?.getattr("modules")?.set_item("fake_prompt.fake_rates", fake_rates_mod)?;
    Ok(())
}
