use crate::numerical::retrieval::analytic_model::AnalyticModel;
use crate::numerical::retrieval::polynomial_model::PolynomialModel;
use crate::somelinalg::some_matrix_inv::sum_of_squares;
use enum_dispatch::enum_dispatch;
use nalgebra::{DMatrix, DVector};
use strum_macros::{Display, EnumString};

/// Relative residual magnitude used both as convergence test and as quality score.
///
/// The form is a property of the model family: polynomial models score with the
/// square root, analytic models without it. Tolerances are calibrated per form,
/// so the two are never mixed silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorNorm {
    /// `sqrt(Σr² / Σm²)`
    RelativeRms,
    /// `Σr² / Σm²`
    RelativeSquared,
}

impl ErrorNorm {
    /// Normalized error of `residual` relative to `measurement`.
    /// An all-zero measurement has no scale, the absolute squared residual is used instead.
    pub fn normalized_error(&self, residual: &DVector<f64>, measurement: &DVector<f64>) -> f64 {
        let num = sum_of_squares(residual);
        let mut den = sum_of_squares(measurement);
        if den == 0.0 {
            den = 1.0;
        }
        let ratio = num / den;
        match self {
            ErrorNorm::RelativeRms => ratio.sqrt(),
            ErrorNorm::RelativeSquared => ratio,
        }
    }
}

/// What the Gauss-Newton step needs from a forward model: predicted channel values
/// and the Jacobian at a parameter point.
///
/// The Jacobian is laid out parameters x channels: entry `(i, c)` is the partial
/// derivative of channel `c` with respect to parameter `i`.
#[enum_dispatch]
pub trait ForwardModel {
    /// number of retrieved parameters
    fn n_params(&self) -> usize;

    /// number of simultaneously fitted channels
    fn n_channels(&self) -> usize;

    /// predicted channel values at `point`
    fn predict(&self, point: &DVector<f64>) -> DVector<f64>;

    /// partial derivatives at `point`, parameters x channels
    fn jacobian(&self, point: &DVector<f64>) -> DMatrix<f64>;

    /// predicted values and Jacobian in one call
    fn evaluate(&self, point: &DVector<f64>) -> (DVector<f64>, DMatrix<f64>) {
        (self.predict(point), self.jacobian(point))
    }

    /// residual form this model family is calibrated for
    fn error_norm(&self) -> ErrorNorm;

    /// Get model name for debugging/logging
    fn name(&self) -> &str {
        "unnamed_model"
    }
}

/// Either kind of forward model behind one type, for code that picks the model at run time.
#[enum_dispatch(ForwardModel)]
pub enum RetrievalModel {
    PolynomialModel,
    AnalyticModel,
}

/// Central finite-difference Jacobian of `model.predict`, parameters x channels.
/// Used to cross-check analytic derivatives.
pub fn finite_difference_jacobian<M: ForwardModel + ?Sized>(
    model: &M,
    point: &DVector<f64>,
    step: f64,
) -> DMatrix<f64> {
    let n = model.n_params();
    let m = model.n_channels();
    let mut jac = DMatrix::zeros(n, m);
    for i in 0..n {
        let h = step * point[i].abs().max(1.0);
        let mut forward = point.clone();
        let mut backward = point.clone();
        forward[i] += h;
        backward[i] -= h;
        let df = (model.predict(&forward) - model.predict(&backward)) / (2.0 * h);
        for c in 0..m {
            jac[(i, c)] = df[c];
        }
    }
    jac
}
