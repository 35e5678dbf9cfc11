//! Regularized (Bayesian) nonlinear inversion of multi-channel measurements.
//!
//! A [`forward_model::ForwardModel`] predicts channel values from a parameter vector.
//! [`bayesian_optimizer::BayesianOptimizer`] fits parameters to one measurement by
//! repeated [`gauss_newton::GaussNewtonStep`]s regularized towards an a-priori vector,
//! and [`multi_start::MultiStartController`] restarts it over a deterministic grid
//! inside search bounds.
/// error type of the setup phase
pub mod retrieval_errors;
/// forward model capability, error norms and the run-time model enum
pub mod forward_model;
/// tensor-product polynomial forward model
pub mod polynomial_model;
/// two-variable forward model built from closures with analytic derivatives
pub mod analytic_model;
/// prior and data weighting matrices
pub mod prior_state;
/// cooperative stop requests
pub mod cancellation;
/// one regularized descent step
pub mod gauss_newton;
/// single-start optimizer with best-seen tracking
pub mod bayesian_optimizer;
/// deterministic restart search within bounds
pub mod multi_start;
/// settings from a task document
pub mod retrieval_config;
/// parallel per-pixel retrieval
pub mod batch_retrieval;
