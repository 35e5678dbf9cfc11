//! numerical solvers
/// Bayesian-regularized retrieval of parameters from multi-channel measurements:
/// forward models, the Gauss-Newton step, single- and multi-start optimizers.
/// Example
/// ```
/// use std::sync::Arc;
/// use nalgebra::DVector;
/// use RustedRetrieval::numerical::retrieval::polynomial_model::PolynomialModel;
/// use RustedRetrieval::numerical::retrieval::prior_state::CovarianceState;
/// use RustedRetrieval::numerical::retrieval::bayesian_optimizer::{BayesianOptimizer, OptimizerConfig};
/// // channel 0: 2 - p0 - p1, channel 1: -6 - p0 + p1
/// let model = PolynomialModel::new(
///     vec![vec![2.0, -1.0, -1.0, 0.0], vec![-6.0, 1.0, -1.0, 0.0]],
///     1,
///     2,
/// )
/// .unwrap();
/// let optimizer = BayesianOptimizer::new(
///     Arc::new(model),
///     Arc::new(CovarianceState::identity(2, 2).unwrap()),
///     DVector::from_vec(vec![9.0, 1.0]),
///     OptimizerConfig::default(),
/// )
/// .unwrap();
/// let result = optimizer.minimise(
///     &DVector::from_vec(vec![5.0, 0.5]),
///     &DVector::from_vec(vec![-8.0, -14.0]),
/// );
/// assert!(result.converged);
/// ```
pub mod retrieval;
