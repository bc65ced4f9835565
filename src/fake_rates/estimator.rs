//! estimator — the fake/prompt matrix method and its predictions.
//!
//! Purpose
//! -------
//! Tie the inputs (observed [`Topology`], [`RatioSet`], [`EstimatorOptions`])
//! to the engine (`weights`, `solve`, `closed_form`) and expose the results:
//! predicted yields per FPConfig with statistical and systematic errors,
//! pairwise covariances, the tight-tight yields, and the fake background.
//!
//! Key behaviors
//! -------------
//! - [`MatrixMethodBuilder`] collects the configuration; `build` fails with
//!   `FPError::NotConfigured` when no topology was given, and with
//!   `FPError::MissingRatios` / `FPError::InvalidRatio` when a flavor in the
//!   topology lacks usable ratios.
//! - [`MatrixMethod`] is immutable. [`MatrixMethod::predict`] uses flat
//!   ratios; [`MatrixMethod::predict_at`] evaluates ratios per slot from
//!   kinematics; [`MatrixMethod::predict_with`] takes explicit slot ratios.
//! - [`Prediction`] owns the weight matrix, its Jacobians, and the solution,
//!   so every error query reuses them without re-solving.
//!
//! Invariants & assumptions
//! ------------------------
//! - Yields are true FPConfig counts: `Σ_c N_c = Σ_t Obs_t`.
//! - Degeneracies are errors (`DegenerateRatios`, `SingularSystem`,
//!   `EmptyTopology`), never zeros.
//! - With `use_closed_form`, two-lepton yields come from the analytic
//!   formulas; the Jacobians always come from the linear machinery.
//!
//! Conventions
//! -----------
//! - Per-config outputs follow [`FPConfig::enumerate`]; pairwise covariances
//!   follow [`covariance_pairs`].
//! - Slot ratios, kinematics and tight flags list electrons first.
use crate::fake_rates::{
    closed_form::two_lepton_yields,
    core::{
        configs::{FPConfig, covariance_pairs},
        flavor::{Flavor, Kinematics, RatioKind},
        options::EstimatorOptions,
        ratios::{RatioProvider, RatioSet, RatioValue},
        topology::Topology,
    },
    errors::{FPError, FPResult},
    event_weight::{EventWeight, LeptonEvent, event_weights_with_tolerance},
    solve::{Solution, solve},
    weights::{ParameterKey, SlotRatios, WeightSystem, check_degeneracy, resolve_slots},
};
use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2};
use std::sync::Arc;
use tracing::debug;

/// Estimate — a value with statistical and systematic errors.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Estimate {
    pub value: f64,
    pub stat: f64,
    pub syst: f64,
}

impl Estimate {
    /// Statistical and systematic errors added in quadrature.
    pub fn total_error(&self) -> f64 {
        self.stat.hypot(self.syst)
    }
}

/// MatrixMethodBuilder — step-by-step configuration of a [`MatrixMethod`].
#[derive(Debug, Clone, Default)]
pub struct MatrixMethodBuilder {
    topology: Option<Topology>,
    ratios: RatioSet,
    options: EstimatorOptions,
}

impl MatrixMethodBuilder {
    pub fn new() -> Self {
        MatrixMethodBuilder::default()
    }

    /// Observed counts for the event class.
    #[doc(alias = "NevtTopol")]
    pub fn topology(mut self, topology: Topology) -> Self {
        self.topology = Some(topology);
        self
    }

    /// Flat electron fake and prompt ratios.
    pub fn electron_ratios(mut self, fake: RatioValue, prompt: RatioValue) -> Self {
        self.ratios.set_flat(Flavor::Electron, fake, prompt);
        self
    }

    /// Flat muon fake and prompt ratios.
    pub fn muon_ratios(mut self, fake: RatioValue, prompt: RatioValue) -> Self {
        self.ratios.set_flat(Flavor::Muon, fake, prompt);
        self
    }

    /// Install one provider (e.g. a binned pt × eta table).
    pub fn provider(
        mut self, flavor: Flavor, kind: RatioKind, provider: Arc<dyn RatioProvider>,
    ) -> Self {
        self.ratios.set(flavor, kind, provider);
        self
    }

    /// Replace the whole ratio set.
    pub fn ratios(mut self, ratios: RatioSet) -> Self {
        self.ratios = ratios;
        self
    }

    pub fn options(mut self, options: EstimatorOptions) -> Self {
        self.options = options;
        self
    }

    /// Validate and freeze the configuration.
    ///
    /// Errors
    /// ------
    /// - `FPError::NotConfigured` when no topology was supplied.
    /// - `FPError::MissingRatios` when a flavor present in the topology has
    ///   no fake or prompt provider.
    /// - `FPError::InvalidRatio` / `FPError::InvalidRatioError` for flat
    ///   ratios outside `[0, 1]` or with a bad error. Binned providers are
    ///   checked per lookup.
    pub fn build(self) -> FPResult<MatrixMethod> {
        let topology = self.topology.ok_or(FPError::NotConfigured)?;
        let present = [(Flavor::Electron, topology.ne()), (Flavor::Muon, topology.nm())];
        for (flavor, count) in present {
            if count == 0 {
                continue;
            }
            for kind in [RatioKind::Fake, RatioKind::Prompt] {
                match self.ratios.lookup(flavor, kind, None) {
                    Ok(_) | Err(FPError::KinematicsRequired { .. }) => {}
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(MatrixMethod { topology, ratios: self.ratios, options: self.options })
    }
}

/// MatrixMethod — configured fake/prompt estimator for one event class.
///
/// Fields
/// ------
/// - `topology`: observed counts (aggregate or flavor-split layout).
/// - `ratios`: fake and prompt providers for the flavors present.
/// - `options`: tolerances and the closed-form switch.
///
/// Invariants
/// ----------
/// - Built only through [`MatrixMethodBuilder::build`]; every flavor present
///   has both providers installed.
/// - Immutable: all queries are pure, so one instance per bin or worker can
///   be shared without locking.
///
/// Examples
/// --------
/// ```rust
/// use fake_prompt::fake_rates::prelude::*;
///
/// let mm = MatrixMethod::builder()
///     .topology(Topology::new(0, 2, vec![10.0, 50.0, 40.0]).unwrap())
///     .muon_ratios(RatioValue::new(0.2), RatioValue::new(0.8))
///     .build()
///     .unwrap();
/// let prediction = mm.predict().unwrap();
/// let yields = prediction.yields();
/// assert!((yields[0] - 50.0).abs() < 1e-9);
/// assert!((yields.sum() - 100.0).abs() < 1e-9);
/// ```
#[derive(Debug, Clone)]
pub struct MatrixMethod {
    topology: Topology,
    ratios: RatioSet,
    options: EstimatorOptions,
}

impl MatrixMethod {
    pub fn builder() -> MatrixMethodBuilder {
        MatrixMethodBuilder::new()
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn ratios(&self) -> &RatioSet {
        &self.ratios
    }

    pub fn options(&self) -> &EstimatorOptions {
        &self.options
    }

    /// FPConfigs in canonical order.
    pub fn configs(&self) -> Vec<FPConfig> {
        FPConfig::enumerate(self.topology.ne(), self.topology.nm())
    }

    /// Predicted FPConfig yields with flat ratios.
    ///
    /// Errors
    /// ------
    /// - `FPError::KinematicsRequired` when a provider is binned.
    /// - `FPError::EmptyTopology`, `FPError::DegenerateRatios`,
    ///   `FPError::SingularSystem`, `FPError::NonFiniteResult`.
    #[doc(alias = "NevtPass")]
    pub fn predict(&self) -> FPResult<Prediction> {
        let slots = resolve_slots(&self.ratios, self.topology.ne(), self.topology.nm(), None)?;
        self.predict_with(&slots)
    }

    /// Predicted FPConfig yields with ratios evaluated at per-slot
    /// `(pt, eta)`, electrons first.
    #[doc(alias = "NevtPass")]
    pub fn predict_at(&self, kinematics: &Kinematics) -> FPResult<Prediction> {
        let slots =
            resolve_slots(&self.ratios, self.topology.ne(), self.topology.nm(), Some(kinematics))?;
        self.predict_with(&slots)
    }

    /// Predicted FPConfig yields for explicit per-slot ratios.
    ///
    /// Parameters
    /// ----------
    /// - `slots`: `ne + nm` [`SlotRatios`], electrons first. Slots carrying
    ///   the same `(flavor, kind, bin)` share one systematic parameter.
    pub fn predict_with(&self, slots: &[SlotRatios]) -> FPResult<Prediction> {
        let topo = &self.topology;
        if topo.total() <= 0.0 {
            return Err(FPError::EmptyTopology);
        }
        check_degeneracy(slots, self.options.degeneracy_tolerance)?;
        let system = WeightSystem::build(topo.ne(), topo.nm(), topo.layout(), slots)?;

        let counts = DVector::from_iterator(topo.counts().len(), topo.counts().iter().copied());
        let variances =
            DVector::from_iterator(topo.variances().len(), topo.variances().iter().copied());
        let mut solution = solve(&system, &counts, &variances, &self.options)?;

        if self.options.use_closed_form {
            let observed = topo.counts().to_vec();
            if let Some(closed) =
                two_lepton_yields(topo.ne(), topo.nm(), topo.layout(), slots, &observed)
            {
                let closed = DVector::from_vec(closed);
                let deviation = (&closed - solution.yields()).amax();
                debug!(deviation, "two-lepton closed form applied");
                solution = solution.with_yields(&system, closed)?;
            }
        }
        debug!(
            ne = topo.ne(),
            nm = topo.nm(),
            layout = ?topo.layout(),
            total = topo.total(),
            n_params = system.params().len(),
            "FPConfig yields predicted"
        );
        Ok(Prediction::new(system, solution))
    }

    /// Weight of one event for `config`, with per-slot ratios from the
    /// event's kinematics (flat ratios when it has none).
    #[doc(alias = "FPWeight")]
    pub fn event_weight(&self, config: FPConfig, event: &LeptonEvent) -> FPResult<EventWeight> {
        let index = self
            .configs()
            .iter()
            .position(|c| *c == config)
            .ok_or(FPError::ConfigOutOfRange {
                nfe: config.nfe,
                nfm: config.nfm,
                ne: self.topology.ne(),
                nm: self.topology.nm(),
            })?;
        let mut all = self.event_weights(event)?;
        Ok(all.swap_remove(index))
    }

    /// Weights of one event for every FPConfig, in canonical order.
    pub fn event_weights(&self, event: &LeptonEvent) -> FPResult<Vec<EventWeight>> {
        let (ne, nm) = (self.topology.ne(), self.topology.nm());
        let slots = resolve_slots(&self.ratios, ne, nm, event.kinematics())?;
        let tolerance = self.options.degeneracy_tolerance;
        event_weights_with_tolerance(ne, nm, &slots, event.tight(), tolerance)
    }
}

/// Prediction — FPConfig yields and their uncertainties.
///
/// Holds the weight system and its solution; every accessor is a cheap
/// function of them.
#[derive(Debug, Clone)]
pub struct Prediction {
    system: WeightSystem,
    solution: Solution,
    syst_covariance: DMatrix<f64>,
}

impl Prediction {
    fn new(system: WeightSystem, solution: Solution) -> Self {
        let syst_covariance = solution.syst_covariance(system.params().errors());
        Prediction { system, solution, syst_covariance }
    }

    pub fn configs(&self) -> &[FPConfig] {
        self.system.configs()
    }

    /// Systematic parameters (distinct measured ratios) in gradient order.
    pub fn parameters(&self) -> &[ParameterKey] {
        self.system.params().keys()
    }

    /// Rank of the weight matrix.
    pub fn rank(&self) -> usize {
        self.solution.rank()
    }

    /// `true` when the counts determine every FPConfig yield.
    ///
    /// Aggregate e+μ counts have fewer rows than configs; their yields are
    /// the minimum-norm split and this returns `false`.
    pub fn is_identified(&self) -> bool {
        self.rank() == self.configs().len()
    }

    /// `W[topology][config]`.
    pub fn weight_matrix(&self) -> Array2<f64> {
        to_array2(self.system.matrix())
    }

    /// Predicted true count per FPConfig.
    #[doc(alias = "NevtPass")]
    pub fn yields(&self) -> Array1<f64> {
        to_array1(self.solution.yields())
    }

    /// Statistical error per FPConfig.
    #[doc(alias = "NevtPassErrStat")]
    pub fn err_stat(&self) -> Array1<f64> {
        diagonal_sqrt(self.solution.stat_covariance())
    }

    /// Systematic error per FPConfig.
    #[doc(alias = "NevtPassErrSyst")]
    pub fn err_syst(&self) -> Array1<f64> {
        diagonal_sqrt(&self.syst_covariance)
    }

    /// Statistical `Cov(N_i, N_j)` for `i < j`, ordered (0,1), (0,2), …
    #[doc(alias = "VarStat")]
    pub fn var_stat(&self) -> Array1<f64> {
        off_diagonal(self.solution.stat_covariance())
    }

    /// Systematic `Cov(N_i, N_j)` for `i < j`, ordered (0,1), (0,2), …
    #[doc(alias = "VarSyst")]
    pub fn var_syst(&self) -> Array1<f64> {
        off_diagonal(&self.syst_covariance)
    }

    pub fn stat_covariance(&self) -> Array2<f64> {
        to_array2(self.solution.stat_covariance())
    }

    pub fn syst_covariance(&self) -> Array2<f64> {
        to_array2(&self.syst_covariance)
    }

    /// `∂N/∂θ_k` for parameter `k` of [`Prediction::parameters`].
    pub fn parameter_gradient(&self, k: usize) -> Option<Array1<f64>> {
        self.solution.gradients().get(k).map(to_array1)
    }

    /// Yield and errors of the FPConfig at canonical position `index`.
    pub fn estimate(&self, index: usize) -> Option<Estimate> {
        let value = *self.solution.yields().get(index)?;
        Some(Estimate {
            value,
            stat: self.solution.stat_covariance()[(index, index)].max(0.0).sqrt(),
            syst: self.syst_covariance[(index, index)].max(0.0).sqrt(),
        })
    }

    /// Expected all-tight events per FPConfig: `N_c · P(all tight | c)`.
    pub fn tight_yields(&self) -> Array1<f64> {
        let n = self.solution.yields();
        Array1::from_iter((0..n.len()).map(|c| n[c] * self.system.all_tight_probability(c)))
    }

    /// Statistical error of each tight yield.
    pub fn tight_err_stat(&self) -> Array1<f64> {
        let cov = self.solution.stat_covariance();
        Array1::from_iter((0..cov.nrows()).map(|c| {
            self.system.all_tight_probability(c) * cov[(c, c)].max(0.0).sqrt()
        }))
    }

    /// Systematic error of each tight yield, including the variation of
    /// `P(all tight | c)` with the ratios.
    pub fn tight_err_syst(&self) -> Array1<f64> {
        let grads = self.tight_gradients();
        let errors = self.system.params().errors();
        let n = self.solution.yields().len();
        Array1::from_iter((0..n).map(|c| {
            grads.iter().zip(errors).map(|(g, s)| (g[c] * s).powi(2)).sum::<f64>().sqrt()
        }))
    }

    /// Fake-induced all-tight background: the sum of tight yields over
    /// configs with at least one fake lepton.
    pub fn fake_background(&self) -> Estimate {
        let selector: Vec<f64> = self
            .configs()
            .iter()
            .enumerate()
            .map(|(c, config)| {
                if config.has_fake() { self.system.all_tight_probability(c) } else { 0.0 }
            })
            .collect();
        let s = DVector::from_vec(selector);
        let value = s.dot(self.solution.yields());
        let stat_var = (s.transpose() * self.solution.stat_covariance() * &s)[(0, 0)];

        let mask: Vec<bool> = self.configs().iter().map(FPConfig::has_fake).collect();
        let syst_var: f64 = self
            .tight_gradients()
            .iter()
            .zip(self.system.params().errors())
            .map(|(g, sigma)| {
                let d: f64 = g.iter().zip(&mask).filter(|(_, m)| **m).map(|(v, _)| *v).sum();
                (d * sigma).powi(2)
            })
            .sum();
        Estimate { value, stat: stat_var.max(0.0).sqrt(), syst: syst_var.sqrt() }
    }

    /// `∂(N_c · P(all tight | c))/∂θ_k` per parameter.
    fn tight_gradients(&self) -> Vec<DVector<f64>> {
        let n = self.solution.yields();
        self.solution
            .gradients()
            .iter()
            .enumerate()
            .map(|(k, g)| {
                DVector::from_iterator(
                    n.len(),
                    (0..n.len()).map(|c| {
                        self.system.all_tight_probability(c) * g[c]
                            + n[c] * self.system.all_tight_derivative(k, c)
                    }),
                )
            })
            .collect()
    }
}

// ---- Helper methods ----

fn to_array1(v: &DVector<f64>) -> Array1<f64> {
    Array1::from_iter(v.iter().copied())
}

fn to_array2(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn(m.shape(), |(i, j)| m[(i, j)])
}

fn diagonal_sqrt(m: &DMatrix<f64>) -> Array1<f64> {
    Array1::from_iter((0..m.nrows()).map(|i| m[(i, i)].max(0.0).sqrt()))
}

fn off_diagonal(m: &DMatrix<f64>) -> Array1<f64> {
    Array1::from_iter(covariance_pairs(m.nrows()).into_iter().map(|(i, j)| m[(i, j)]))
}
