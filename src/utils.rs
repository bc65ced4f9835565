//! utils — conversion helpers for the PyO3 bindings.
//!
//! Everything here is glue between Python objects and the validated Rust
//! inputs of `fake_rates`; no estimation logic lives in this file.
#[cfg(feature = "python-bindings")]
use pyo3::{exceptions::PyValueError, prelude::*, types::PyAny};

#[cfg(feature = "python-bindings")]
use crate::fake_rates::{Flavor, Kinematics, RatioKind, RatioValue, Topology};

#[cfg(feature = "python-bindings")]
use numpy::{
    IntoPyArray,    // Vec → PyArray
    PyArrayMethods, // .readonly()
    PyReadonlyArray1,
};

#[cfg(feature = "python-bindings")]
#[inline]
pub fn extract_f64_array<'py>(
    py: Python<'py>, raw_data: &Bound<'py, PyAny>,
) -> PyResult<PyReadonlyArray1<'py, f64>> {
    if let Ok(arr_ro) = raw_data.extract::<PyReadonlyArray1<f64>>() {
        if arr_ro.as_slice().is_ok() {
            return Ok(arr_ro);
        }
    }

    if let Ok(obj) = raw_data.call_method("to_numpy", (false,), None) {
        if let Ok(series_ro) = obj.extract::<PyReadonlyArray1<f64>>() {
            if series_ro.as_slice().is_ok() {
                return Ok(series_ro);
            }
        }
    }

    let vec: Vec<f64> = raw_data.extract().map_err(|_| {
        pyo3::exceptions::PyTypeError::new_err(
            "expected a 1-D numpy.ndarray, pandas.Series, or sequence of float64",
        )
    })?;
    Ok(vec.into_pyarray(py).readonly())
}

/// Copy an array-like of `f64` into an owned vector.
#[cfg(feature = "python-bindings")]
pub fn extract_f64_vec<'py>(py: Python<'py>, raw_data: &Bound<'py, PyAny>) -> PyResult<Vec<f64>> {
    let arr = extract_f64_array(py, raw_data)?;
    Ok(arr.as_array().to_vec())
}

/// Build a [`Topology`] from counts and optional per-bin variances.
#[cfg(feature = "python-bindings")]
pub fn build_topology<'py>(
    py: Python<'py>, ne: usize, nm: usize, counts: &Bound<'py, PyAny>,
    variances: Option<&Bound<'py, PyAny>>,
) -> PyResult<Topology> {
    let counts = extract_f64_vec(py, counts)?;
    let topology = match variances {
        Some(raw) => Topology::with_variances(ne, nm, counts, extract_f64_vec(py, raw)?)?,
        None => Topology::new(ne, nm, counts)?,
    };
    Ok(topology)
}

/// `(fake, fake_err, prompt, prompt_err)` → fake and prompt [`RatioValue`]s.
///
/// A negative error stands for "not measured" and falls back to the default
/// relative error.
#[cfg(feature = "python-bindings")]
pub fn extract_ratio_pair(ratios: (f64, f64, f64, f64)) -> (RatioValue, RatioValue) {
    let (f, f_err, p, p_err) = ratios;
    let value = |v: f64, err: f64| {
        if err < 0.0 { RatioValue::new(v) } else { RatioValue::with_error(v, err) }
    };
    (value(f, f_err), value(p, p_err))
}

/// Per-slot kinematics from optional `pt` / `eta` array-likes; both or
/// neither must be given.
#[cfg(feature = "python-bindings")]
pub fn extract_kinematics<'py>(
    py: Python<'py>, pt: Option<&Bound<'py, PyAny>>, eta: Option<&Bound<'py, PyAny>>,
) -> PyResult<Option<Kinematics>> {
    match (pt, eta) {
        (None, None) => Ok(None),
        (Some(pt), Some(eta)) => {
            let kinematics = Kinematics::new(extract_f64_vec(py, pt)?, extract_f64_vec(py, eta)?)?;
            Ok(Some(kinematics))
        }
        _ => Err(PyValueError::new_err("pt and eta must be given together")),
    }
}

#[cfg(feature = "python-bindings")]
pub fn parse_flavor(name: &str) -> PyResult<Flavor> {
    match name.to_ascii_lowercase().as_str() {
        "e" | "el" | "electron" => Ok(Flavor::Electron),
        "m" | "mu" | "muon" => Ok(Flavor::Muon),
        other => Err(PyValueError::new_err(format!("unknown lepton flavor {other:?}"))),
    }
}

#[cfg(feature = "python-bindings")]
pub fn parse_ratio_kind(name: &str) -> PyResult<RatioKind> {
    match name.to_ascii_lowercase().as_str() {
        "fake" => Ok(RatioKind::Fake),
        "prompt" => Ok(RatioKind::Prompt),
        other => Err(PyValueError::new_err(format!("unknown ratio kind {other:?}"))),
    }
}
