use crate::numerical::retrieval::cancellation::CancellationToken;
use crate::numerical::retrieval::forward_model::{ErrorNorm, ForwardModel};
use crate::numerical::retrieval::gauss_newton::{GaussNewtonStep, StepOutcome};
use crate::numerical::retrieval::prior_state::CovarianceState;
use crate::numerical::retrieval::retrieval_errors::{RetrievalError, RetrievalOutcome, check_len};
use crate::somelinalg::some_matrix_inv::all_finite;
use log::debug;
use nalgebra::DVector;
use std::sync::Arc;

/// Reasons for terminating one `minimise` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// The normalized error fell below the tolerance.
    Converged,
    /// Iteration budget was exhausted.
    MaxIterations,
    /// Encountered `NaN`, `inf` or a zero step norm; best-seen estimate is kept.
    Numerical(&'static str),
    /// Cancellation token fired.
    Cancelled,
}

impl TerminationReason {
    /// Compute whether the outcome reached the target error.
    pub fn was_successful(&self) -> bool {
        matches!(self, TerminationReason::Converged)
    }
}

/// Best estimate of one call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalResult {
    pub parameters: DVector<f64>,
    /// normalized error of `parameters`, never negative
    pub error: f64,
    /// target error reached; false means reduced confidence, not failure
    pub converged: bool,
    /// number of parameter updates performed
    pub iterations: usize,
    pub termination: TerminationReason,
}

/// Solver settings shared by the single-start and multi-start optimizers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizerConfig {
    /// target normalized error
    pub tolerance: f64,
    /// iteration budget of one start
    pub max_iterations: usize,
    /// Force one residual form for every model family. `None` keeps the form the
    /// model is calibrated for.
    pub error_norm_override: Option<ErrorNorm>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-8,
            max_iterations: 50,
            error_norm_override: None,
        }
    }
}

impl OptimizerConfig {
    #[must_use]
    pub fn with_tolerance(self, tolerance: f64) -> Self {
        Self { tolerance, ..self }
    }

    #[must_use]
    pub fn with_max_iterations(self, max_iterations: usize) -> Self {
        Self {
            max_iterations,
            ..self
        }
    }

    #[must_use]
    pub fn with_error_norm_override(self, error_norm: Option<ErrorNorm>) -> Self {
        Self {
            error_norm_override: error_norm,
            ..self
        }
    }

    pub fn validate(&self) -> RetrievalOutcome<()> {
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(RetrievalError::InvalidSetting {
                name: "tolerance",
                reason: format!("must be positive and finite, got {}", self.tolerance),
            });
        }
        if self.max_iterations == 0 {
            return Err(RetrievalError::InvalidSetting {
                name: "max_iterations",
                reason: "must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

/// Single-start regularized optimizer.
///
/// The forward model and covariance state are shared read-only (`Arc`), so cloning an
/// optimizer is cheap and gives each worker its own a-priori vector. Replacing the
/// a priori with [`modify_a_priori`](Self::modify_a_priori) needs `&mut self`, so it
/// can never overlap a running `minimise` on the same instance.
pub struct BayesianOptimizer<M: ForwardModel> {
    model: Arc<M>,
    covariance: Arc<CovarianceState>,
    a_priori: DVector<f64>,
    config: OptimizerConfig,
    cancel: Option<CancellationToken>,
}

impl<M: ForwardModel> Clone for BayesianOptimizer<M> {
    fn clone(&self) -> Self {
        Self {
            model: Arc::clone(&self.model),
            covariance: Arc::clone(&self.covariance),
            a_priori: self.a_priori.clone(),
            config: self.config,
            cancel: self.cancel.clone(),
        }
    }
}

impl<M: ForwardModel> BayesianOptimizer<M> {
    /// All dimensions are checked here, once.
    pub fn new(
        model: Arc<M>,
        covariance: Arc<CovarianceState>,
        a_priori: DVector<f64>,
        config: OptimizerConfig,
    ) -> RetrievalOutcome<Self> {
        config.validate()?;
        covariance.check_dimensions(model.n_params(), model.n_channels())?;
        check_len("a priori", model.n_params(), a_priori.len())?;
        if !all_finite(&a_priori) {
            return Err(RetrievalError::InvalidSetting {
                name: "a priori",
                reason: "non-finite entries".to_string(),
            });
        }
        debug!(
            "optimizer for {}: tolerance {:e}, max iterations {}, error norm {}",
            model.name(),
            config.tolerance,
            config.max_iterations,
            config.error_norm_override.unwrap_or(model.error_norm())
        );
        Ok(Self {
            model,
            covariance,
            a_priori,
            config,
            cancel: None,
        })
    }

    /// Replace the regularization anchor, keeping covariance state.
    pub fn modify_a_priori(&mut self, a_priori: DVector<f64>) -> RetrievalOutcome<()> {
        check_len("a priori", self.model.n_params(), a_priori.len())?;
        self.a_priori = a_priori;
        Ok(())
    }

    pub fn set_cancellation_token(&mut self, token: Option<CancellationToken>) {
        self.cancel = token;
    }

    pub fn a_priori(&self) -> &DVector<f64> {
        &self.a_priori
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn covariance(&self) -> &CovarianceState {
        &self.covariance
    }

    pub fn n_params(&self) -> usize {
        self.model.n_params()
    }

    pub fn n_channels(&self) -> usize {
        self.model.n_channels()
    }

    /// residual form in effect
    pub fn error_norm(&self) -> ErrorNorm {
        self.config
            .error_norm_override
            .unwrap_or_else(|| self.model.error_norm())
    }

    pub(crate) fn cancellation_token(&self) -> Option<&CancellationToken> {
        self.cancel.as_ref()
    }

    fn step(&self) -> GaussNewtonStep<'_, M> {
        GaussNewtonStep::new(
            &*self.model,
            &self.covariance,
            self.error_norm(),
            self.config.tolerance,
        )
    }

    /// Normalized error at `point`, without iterating.
    pub fn evaluate_error(&self, point: &DVector<f64>, measurement: &DVector<f64>) -> f64 {
        self.step().error_at(point, measurement)
    }

    /// Checked form of [`minimise`](Self::minimise).
    pub fn try_minimise(
        &self,
        initial: &DVector<f64>,
        measurement: &DVector<f64>,
    ) -> RetrievalOutcome<RetrievalResult> {
        check_len("initial guess", self.n_params(), initial.len())?;
        check_len("measurement", self.n_channels(), measurement.len())?;
        Ok(self.minimise(initial, measurement))
    }

    /// Iterate from `initial` and return the best-seen estimate.
    ///
    /// # Panics
    ///
    /// Panics if `initial` or `measurement` do not match the model dimensions.
    pub fn minimise(&self, initial: &DVector<f64>, measurement: &DVector<f64>) -> RetrievalResult {
        self.run(initial, measurement, None)
    }

    /// Same as [`minimise`](Self::minimise), also returning the best-seen error after every step.
    pub fn minimise_with_history(
        &self,
        initial: &DVector<f64>,
        measurement: &DVector<f64>,
    ) -> (RetrievalResult, Vec<f64>) {
        let mut history = Vec::with_capacity(self.config.max_iterations);
        let result = self.run(initial, measurement, Some(&mut history));
        (result, history)
    }

    fn run(
        &self,
        initial: &DVector<f64>,
        measurement: &DVector<f64>,
        mut history: Option<&mut Vec<f64>>,
    ) -> RetrievalResult {
        assert_eq!(initial.len(), self.n_params(), "initial guess has wrong length");
        assert_eq!(
            measurement.len(),
            self.n_channels(),
            "measurement has wrong length"
        );
        let step = self.step();
        let mut estimate = initial.clone();
        let mut best = initial.clone();
        let mut best_error = f64::INFINITY;
        let mut iterations = 0;
        let mut termination = TerminationReason::MaxIterations;
        let mut budget_exhausted = true;

        for _ in 0..self.config.max_iterations {
            let previous = estimate.clone();
            let outcome = step.step(
                &mut estimate,
                &self.a_priori,
                measurement,
                self.cancel.as_ref(),
            );
            match outcome {
                StepOutcome::Cancelled => {
                    termination = TerminationReason::Cancelled;
                    budget_exhausted = false;
                }
                StepOutcome::Converged { error } => {
                    best = previous;
                    best_error = error;
                    termination = TerminationReason::Converged;
                    budget_exhausted = false;
                }
                StepOutcome::Updated { error, .. } => {
                    iterations += 1;
                    if error < best_error {
                        best = previous;
                        best_error = error;
                    }
                }
                StepOutcome::Degenerate { error, reason } => {
                    debug!("discarding update: {}", reason);
                    if error < best_error {
                        best = previous;
                        best_error = error;
                    }
                    termination = TerminationReason::Numerical(reason);
                    budget_exhausted = false;
                }
            }
            if let Some(history) = history.as_deref_mut() {
                if outcome != StepOutcome::Cancelled {
                    history.push(best_error);
                }
            }
            if !budget_exhausted {
                break;
            }
        }

        if budget_exhausted {
            // the last update has not been scored yet
            let error = step.error_at(&estimate, measurement);
            if error < best_error {
                best = estimate;
                best_error = error;
            }
            if best_error < self.config.tolerance {
                termination = TerminationReason::Converged;
            }
            if let Some(history) = history.as_deref_mut() {
                history.push(best_error);
            }
        } else if best_error == f64::INFINITY {
            best_error = step.error_at(&best, measurement);
        }

        debug!(
            "minimise: {:?} after {} updates, error = {:e}",
            termination, iterations, best_error
        );
        RetrievalResult {
            parameters: best,
            error: best_error,
            converged: termination.was_successful(),
            iterations,
            termination,
        }
    }
}
