//! Retrieval settings read from a task document, e.g.
//! ```text
//! solver
//! tolerance: 1e-8
//! max_iterations: 50
//! error_norm: relative_rms
//! loglevel: info
//! model
//! orders: 1, 1
//! channel_0: 2.0, -1.0, -1.0, 0.0
//! channel_1: -6.0, 1.0, -1.0, 0.0
//! prior
//! a_priori: 9.0, 1.0
//! covariance: 1.0, 1.0
//! data
//! inverse_covariance: 1.0, 1.0
//! bounds
//! lower: 0.0, 0.0
//! upper: 10.0, 3.0
//! restarts: 9
//! ```
//! `model` and `bounds` are optional; without `model` the caller supplies the forward model in code.
use crate::Utils::logger::{init_logger, log_level_from};
use crate::Utils::task_parser::{DocumentMap, Value, parse_document_as, template_of};
use crate::numerical::retrieval::bayesian_optimizer::{BayesianOptimizer, OptimizerConfig};
use crate::numerical::retrieval::forward_model::{ErrorNorm, ForwardModel, RetrievalModel};
use crate::numerical::retrieval::multi_start::{MultiStartController, SearchBounds};
use crate::numerical::retrieval::polynomial_model::PolynomialModel;
use crate::numerical::retrieval::prior_state::CovarianceState;
use crate::numerical::retrieval::retrieval_errors::{RetrievalError, RetrievalOutcome, check_len};
use log::{info, warn};
use nalgebra::DVector;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

const SOLVER: &str = "solver";
const MODEL: &str = "model";
const PRIOR: &str = "prior";
const DATA: &str = "data";
const BOUNDS: &str = "bounds";

/// default restart budget when a `bounds` section omits `restarts`
pub const DEFAULT_RESTARTS: usize = 9;

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalConfig {
    pub optimizer: OptimizerConfig,
    pub loglevel: Option<String>,
    pub log_file: Option<String>,
    /// `(orders, coefficients per channel)` of a polynomial model
    pub polynomial: Option<(Vec<usize>, Vec<Vec<f64>>)>,
    pub a_priori: Vec<f64>,
    /// diagonal of the prior covariance
    pub prior_variances: Vec<f64>,
    /// diagonal of the data inverse covariance
    pub data_inverse_variances: Vec<f64>,
    pub bounds: Option<Vec<(f64, f64)>>,
    pub restart_budget: usize,
}

impl RetrievalConfig {
    /// Plain settings for a model supplied in code: identity prior covariance of size
    /// `a_priori.len()` and unit channel weights.
    pub fn new(a_priori: Vec<f64>, n_channels: usize) -> Self {
        let n_params = a_priori.len();
        Self {
            optimizer: OptimizerConfig::default(),
            loglevel: None,
            log_file: None,
            polynomial: None,
            a_priori,
            prior_variances: vec![1.0; n_params],
            data_inverse_variances: vec![1.0; n_channels],
            bounds: None,
            restart_budget: DEFAULT_RESTARTS,
        }
    }

    pub fn with_optimizer(self, optimizer: OptimizerConfig) -> Self {
        Self { optimizer, ..self }
    }

    pub fn with_bounds(self, bounds: Vec<(f64, f64)>, restart_budget: usize) -> Self {
        Self {
            bounds: Some(bounds),
            restart_budget,
            ..self
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> RetrievalOutcome<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| RetrievalError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        info!("reading retrieval task from {}", path.display());
        Self::parse(&text)
    }

    pub fn parse(document: &str) -> RetrievalOutcome<Self> {
        let template = template_of(&[
            (
                SOLVER,
                &["tolerance", "max_iterations", "error_norm", "loglevel", "log_file"][..],
            ),
            (PRIOR, &["a_priori", "covariance"][..]),
            (DATA, &["inverse_covariance"][..]),
        ]);
        let doc = parse_document_as(document, Some(&template)).map_err(RetrievalError::Config)?;
        for title in doc.keys() {
            if ![SOLVER, MODEL, PRIOR, DATA, BOUNDS].contains(&title.as_str()) {
                warn!("ignoring unknown section {}", title);
            }
        }

        let defaults = OptimizerConfig::default();
        let error_norm_override = match word(&doc, SOLVER, "error_norm")? {
            Some(name) => Some(ErrorNorm::from_str(&name).map_err(|_| {
                RetrievalError::Config(format!(
                    "error_norm must be relative_rms or relative_squared, got {}",
                    name
                ))
            })?),
            None => None,
        };
        let optimizer = OptimizerConfig {
            tolerance: scalar(&doc, SOLVER, "tolerance")?.unwrap_or(defaults.tolerance),
            max_iterations: count(&doc, SOLVER, "max_iterations")?
                .unwrap_or(defaults.max_iterations),
            error_norm_override,
        };
        optimizer.validate()?;

        let a_priori = floats(&doc, PRIOR, "a_priori")?
            .ok_or_else(|| missing(PRIOR, "a_priori"))?;
        let prior_variances =
            floats(&doc, PRIOR, "covariance")?.unwrap_or_else(|| vec![1.0; a_priori.len()]);
        check_len("prior covariance diagonal", a_priori.len(), prior_variances.len())?;

        let polynomial = polynomial_section(&doc)?;
        let data_inverse_variances = match floats(&doc, DATA, "inverse_covariance")? {
            Some(values) => values,
            None => match &polynomial {
                Some((_, channels)) => vec![1.0; channels.len()],
                None => return Err(missing(DATA, "inverse_covariance")),
            },
        };

        let (bounds, restart_budget) = if doc.contains_key(BOUNDS) {
            let lower = floats(&doc, BOUNDS, "lower")?.ok_or_else(|| missing(BOUNDS, "lower"))?;
            let upper = floats(&doc, BOUNDS, "upper")?.ok_or_else(|| missing(BOUNDS, "upper"))?;
            check_len("bounds lower", a_priori.len(), lower.len())?;
            check_len("bounds upper", a_priori.len(), upper.len())?;
            let restarts = count(&doc, BOUNDS, "restarts")?.unwrap_or(DEFAULT_RESTARTS);
            (Some(lower.into_iter().zip(upper).collect::<Vec<(f64, f64)>>()), restarts)
        } else {
            (None, DEFAULT_RESTARTS)
        };

        let loglevel = word(&doc, SOLVER, "loglevel")?;
        log_level_from(loglevel.as_deref())?;

        Ok(Self {
            optimizer,
            loglevel,
            log_file: word(&doc, SOLVER, "log_file")?,
            polynomial,
            a_priori,
            prior_variances,
            data_inverse_variances,
            bounds,
            restart_budget,
        })
    }

    /// logger with the document's `loglevel` and `log_file`
    ///
    /// `log_file: auto` writes to `log_<date>_<time>.txt`.
    pub fn init_logging(&self) -> RetrievalOutcome<()> {
        init_logger(self.loglevel.clone(), self.log_file.clone())
    }

    pub fn covariance_state(&self) -> RetrievalOutcome<CovarianceState> {
        CovarianceState::from_diagonals(&self.prior_variances, &self.data_inverse_variances)
    }

    /// the polynomial model described by the `model` section, if any
    pub fn model(&self) -> RetrievalOutcome<Option<RetrievalModel>> {
        match &self.polynomial {
            Some((orders, channels)) => {
                let model = PolynomialModel::with_axis_orders(channels.clone(), orders.clone())?;
                Ok(Some(RetrievalModel::from(model)))
            }
            None => Ok(None),
        }
    }

    pub fn build_optimizer<M: ForwardModel>(
        &self,
        model: Arc<M>,
    ) -> RetrievalOutcome<BayesianOptimizer<M>> {
        BayesianOptimizer::new(
            model,
            Arc::new(self.covariance_state()?),
            DVector::from_vec(self.a_priori.clone()),
            self.optimizer,
        )
    }

    pub fn build_controller<M: ForwardModel>(
        &self,
        model: Arc<M>,
    ) -> RetrievalOutcome<MultiStartController<M>> {
        let bounds = self
            .bounds
            .clone()
            .ok_or_else(|| RetrievalError::Config("multi-start search needs a bounds section".to_string()))?;
        MultiStartController::new(
            self.build_optimizer(model)?,
            SearchBounds::new(bounds)?,
            self.restart_budget,
        )
    }
}

fn missing(section: &str, key: &str) -> RetrievalError {
    RetrievalError::Config(format!("missing key {} in section {}", key, section))
}

fn values<'a>(doc: &'a DocumentMap, section: &str, key: &str) -> Option<&'a Vec<Value>> {
    doc.get(section)
        .and_then(|s| s.get(key))
        .and_then(|v| v.as_ref())
}

fn floats(doc: &DocumentMap, section: &str, key: &str) -> RetrievalOutcome<Option<Vec<f64>>> {
    let Some(list) = values(doc, section, key) else {
        return Ok(None);
    };
    if list.is_empty() {
        return Err(RetrievalError::Config(format!(
            "{}.{} has no values",
            section, key
        )));
    }
    list.iter()
        .map(|v| {
            v.as_f64().ok_or_else(|| {
                RetrievalError::Config(format!("{}.{}: {} is not a number", section, key, v))
            })
        })
        .collect::<RetrievalOutcome<Vec<f64>>>()
        .map(Some)
}

fn scalar(doc: &DocumentMap, section: &str, key: &str) -> RetrievalOutcome<Option<f64>> {
    match floats(doc, section, key)? {
        Some(list) if list.len() == 1 => Ok(Some(list[0])),
        Some(list) => Err(RetrievalError::Config(format!(
            "{}.{} expects one value, got {}",
            section,
            key,
            list.len()
        ))),
        None => Ok(None),
    }
}

fn count(doc: &DocumentMap, section: &str, key: &str) -> RetrievalOutcome<Option<usize>> {
    match values(doc, section, key).map(|list| list.as_slice()) {
        Some([value]) => match value.as_integer() {
            Some(n) if n >= 0 => Ok(Some(n as usize)),
            _ => Err(RetrievalError::Config(format!(
                "{}.{} must be a non-negative integer, got {}",
                section, key, value
            ))),
        },
        Some(_) => Err(RetrievalError::Config(format!(
            "{}.{} expects one integer",
            section, key
        ))),
        None => Ok(None),
    }
}

fn word(doc: &DocumentMap, section: &str, key: &str) -> RetrievalOutcome<Option<String>> {
    match values(doc, section, key).map(|list| list.as_slice()) {
        Some([value]) => match value.as_string() {
            Some(text) => Ok(Some(text.clone())),
            None => Err(RetrievalError::Config(format!(
                "{}.{} expects a word, got {}",
                section, key, value
            ))),
        },
        Some(_) => Err(RetrievalError::Config(format!(
            "{}.{} expects one value",
            section, key
        ))),
        None => Ok(None),
    }
}

/// `orders` plus `channel_0`, `channel_1`, … in order.
fn polynomial_section(doc: &DocumentMap) -> RetrievalOutcome<Option<(Vec<usize>, Vec<Vec<f64>>)>> {
    if !doc.contains_key(MODEL) {
        return Ok(None);
    }
    let orders = floats(doc, MODEL, "orders")?
        .ok_or_else(|| missing(MODEL, "orders"))?
        .into_iter()
        .map(|o| {
            if o >= 0.0 && o.fract() == 0.0 {
                Ok(o as usize)
            } else {
                Err(RetrievalError::Config(format!(
                    "model.orders must be non-negative integers, got {}",
                    o
                )))
            }
        })
        .collect::<RetrievalOutcome<Vec<usize>>>()?;
    let mut channels = Vec::new();
    while let Some(coefficients) = floats(doc, MODEL, &format!("channel_{}", channels.len()))? {
        channels.push(coefficients);
    }
    if channels.is_empty() {
        return Err(missing(MODEL, "channel_0"));
    }
    Ok(Some((orders, channels)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const TASK: &str = "
        // linear two-channel retrieval
        solver
        tolerance: 1e-8
        max_iterations: 50
        error_norm: relative_rms
        loglevel: warn
        log_file: auto
        model
        orders: 1, 1
        channel_0: 2.0, -1.0, -1.0, 0.0
        channel_1: -6.0, 1.0, -1.0, 0.0
        prior
        a_priori: 9.0, 1.0
        covariance: 1.0, 1.0
        data
        inverse_covariance: 1.0, 1.0
        bounds
        lower: 0.0, 0.0
        upper: 10.0, 3.0
        restarts: 9
    ";

    #[test]
    fn test_parse_full_task() {
        let config = RetrievalConfig::parse(TASK).unwrap();
        assert_eq!(config.optimizer.tolerance, 1e-8);
        assert_eq!(config.optimizer.max_iterations, 50);
        assert_eq!(
            config.optimizer.error_norm_override,
            Some(ErrorNorm::RelativeRms)
        );
        assert_eq!(config.loglevel.as_deref(), Some("warn"));
        assert_eq!(config.log_file.as_deref(), Some("auto"));
        assert_eq!(config.a_priori, vec![9.0, 1.0]);
        assert_eq!(config.bounds, Some(vec![(0.0, 10.0), (0.0, 3.0)]));
        assert_eq!(config.restart_budget, 9);
        let (orders, channels) = config.polynomial.clone().unwrap();
        assert_eq!(orders, vec![1, 1]);
        assert_eq!(channels.len(), 2);
    }

    #[test]
    fn test_config_builds_working_controller() {
        let config = RetrievalConfig::parse(TASK).unwrap();
        let model = config.model().unwrap().unwrap();
        assert_eq!(model.n_channels(), 2);
        let controller = config.build_controller(Arc::new(model)).unwrap();
        let report = controller.minimise(
            &DVector::from_vec(vec![5.0, 0.5]),
            &DVector::from_vec(vec![-8.0, -14.0]),
        );
        assert!(report.result.converged);
        assert!((report.result.parameters[0] - 9.0).abs() < 1e-4);
    }

    #[test]
    fn test_defaults_and_missing_keys() {
        let config = RetrievalConfig::parse("prior a_priori: 1, 2 data inverse_covariance: 1, 1, 1").unwrap();
        assert_eq!(config.optimizer, OptimizerConfig::default());
        assert_eq!(config.prior_variances, vec![1.0, 1.0]);
        assert_eq!(config.bounds, None);
        assert!(config.model().unwrap().is_none());

        assert!(RetrievalConfig::parse("solver tolerance: 1e-8").is_err());
        assert!(RetrievalConfig::parse("prior a_priori: 1, 2").is_err());
    }

    #[test]
    fn test_invalid_values() {
        let bad_norm = "solver error_norm: relative_abs prior a_priori: 1 data inverse_covariance: 1";
        assert!(matches!(
            RetrievalConfig::parse(bad_norm),
            Err(RetrievalError::Config(_))
        ));
        let bad_level = "solver loglevel: loud prior a_priori: 1 data inverse_covariance: 1";
        assert!(RetrievalConfig::parse(bad_level).is_err());
        let numeric_level = "solver loglevel: 3 prior a_priori: 1 data inverse_covariance: 1";
        assert!(matches!(
            RetrievalConfig::parse(numeric_level),
            Err(RetrievalError::Config(_))
        ));
        let bad_cap = "solver max_iterations: 2.5 prior a_priori: 1 data inverse_covariance: 1";
        assert!(RetrievalConfig::parse(bad_cap).is_err());
        let short_bounds =
            "prior a_priori: 1, 2 data inverse_covariance: 1 bounds lower: 0 upper: 1, 1";
        assert!(RetrievalConfig::parse(short_bounds).is_err());
        let mismatched_orders = "model orders: 1, 1 channel_0: 1, 2, 3 prior a_priori: 1, 2";
        let config = RetrievalConfig::parse(mismatched_orders).unwrap();
        assert!(config.model().is_err());
    }

    #[test]
    fn test_from_file_and_builders() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", TASK).unwrap();
        let config = RetrievalConfig::from_file(file.path()).unwrap();
        assert_eq!(config.restart_budget, 9);
        assert!(RetrievalConfig::from_file("/nonexistent/task.txt").is_err());

        let in_code = RetrievalConfig::new(vec![0.5, 0.5], 3)
            .with_optimizer(OptimizerConfig::default().with_max_iterations(10))
            .with_bounds(vec![(0.0, 1.0), (0.0, 1.0)], 4);
        assert_eq!(in_code.data_inverse_variances, vec![1.0; 3]);
        assert_eq!(in_code.optimizer.max_iterations, 10);
        assert_eq!(in_code.restart_budget, 4);
        assert!(in_code.covariance_state().is_ok());
    }
}
