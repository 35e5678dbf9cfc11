use crate::numerical::retrieval::cancellation::CancellationToken;
use crate::numerical::retrieval::forward_model::{ErrorNorm, ForwardModel};
use crate::numerical::retrieval::prior_state::CovarianceState;
use crate::somelinalg::some_matrix_inv::{all_finite, dot, quadratic_form};
use log::debug;
use nalgebra::DVector;

/// What one step did to the estimate.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Error at the current estimate is already below tolerance; the estimate is untouched.
    Converged { error: f64 },
    /// Estimate moved by `alpha * gamma`; `error` is the error before the move.
    Updated { error: f64, alpha: f64 },
    /// The update could not be computed (zero step norm, NaN, overflow); the estimate is untouched.
    /// `error` is infinite when the model itself produced non-finite values.
    Degenerate { error: f64, reason: &'static str },
    /// Stop was requested before any work was done.
    Cancelled,
}

impl StepOutcome {
    /// Error measured at the estimate the step started from.
    pub fn error(&self) -> Option<f64> {
        match self {
            StepOutcome::Converged { error }
            | StepOutcome::Updated { error, .. }
            | StepOutcome::Degenerate { error, .. } => Some(*error),
            StepOutcome::Cancelled => None,
        }
    }
}

/// One Bayesian-regularized steepest-descent step with exact line length.
///
/// With residual `r = P(x) - y`, Jacobian `J` (parameters x channels), prior covariance
/// `Cp`, data inverse covariance `Wd` and a-priori `xa`:
/// ```text
/// gamma = Cp * (J * (Wd * r)) + (x - xa)
/// s1    = (J^T gamma) . (Wd * (J^T gamma))
/// s2    = gamma . (Cp^-1 * gamma)
/// alpha = 1 / (1 + s1 / s2)
/// x    <- x - alpha * gamma
/// ```
pub struct GaussNewtonStep<'a, M: ForwardModel + ?Sized> {
    model: &'a M,
    covariance: &'a CovarianceState,
    error_norm: ErrorNorm,
    tolerance: f64,
}

impl<'a, M: ForwardModel + ?Sized> GaussNewtonStep<'a, M> {
    pub fn new(
        model: &'a M,
        covariance: &'a CovarianceState,
        error_norm: ErrorNorm,
        tolerance: f64,
    ) -> Self {
        Self {
            model,
            covariance,
            error_norm,
            tolerance,
        }
    }

    /// Normalized error of the model at `estimate`, infinite if the model output is not finite.
    pub fn error_at(&self, estimate: &DVector<f64>, measurement: &DVector<f64>) -> f64 {
        let residual = self.model.predict(estimate) - measurement;
        let error = self.error_norm.normalized_error(&residual, measurement);
        if error.is_finite() { error } else { f64::INFINITY }
    }

    /// Run one step, updating `estimate` in place only on a sound update.
    pub fn step(
        &self,
        estimate: &mut DVector<f64>,
        a_priori: &DVector<f64>,
        measurement: &DVector<f64>,
        cancel: Option<&CancellationToken>,
    ) -> StepOutcome {
        if cancel.is_some_and(|token| token.is_cancelled()) {
            return StepOutcome::Cancelled;
        }
        let (predicted, jacobian) = self.model.evaluate(estimate);
        let residual = predicted - measurement;
        let error = self.error_norm.normalized_error(&residual, measurement);
        if !error.is_finite() {
            return StepOutcome::Degenerate {
                error: f64::INFINITY,
                reason: "non-finite model output",
            };
        }
        if error < self.tolerance {
            return StepOutcome::Converged { error };
        }

        let weights = self.covariance.data_inverse_covariance();
        let weighted_residual = weights * &residual;
        let mut gamma = self.covariance.prior_covariance() * (&jacobian * weighted_residual);
        gamma += &*estimate - a_priori;

        let jt_gamma = jacobian.transpose() * &gamma;
        let s1 = dot(&jt_gamma, &(weights * &jt_gamma));
        let s2 = quadratic_form(&gamma, self.covariance.prior_inverse_covariance());
        if s2 == 0.0 || !s2.is_finite() || !s1.is_finite() {
            return StepOutcome::Degenerate {
                error,
                reason: "zero or non-finite step norm",
            };
        }
        let alpha = 1.0 / (1.0 + s1 / s2);
        if !alpha.is_finite() {
            return StepOutcome::Degenerate {
                error,
                reason: "non-finite step length",
            };
        }
        let updated = &*estimate - &gamma * alpha;
        if !all_finite(&updated) {
            return StepOutcome::Degenerate {
                error,
                reason: "non-finite parameter update",
            };
        }
        debug!("step: error = {:e}, alpha = {:e}", error, alpha);
        estimate.copy_from(&updated);
        StepOutcome::Updated { error, alpha }
    }
}
