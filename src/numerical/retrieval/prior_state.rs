use crate::numerical::retrieval::retrieval_errors::{RetrievalError, RetrievalOutcome, check_len};
use crate::somelinalg::linear_sys_diagnostics::{is_singular, is_symmetric, poorly_conditioned};
use crate::somelinalg::some_matrix_inv::{diagonal_matrix, invert_symmetric};
use log::{info, warn};
use nalgebra::DMatrix;

/// condition number above which a covariance is reported as poorly conditioned
const CONDITION_WARNING: f64 = 1e10;

/// Weighting matrices of the Bayesian step, fixed for the optimizer's lifetime.
///
/// The prior inverse is computed once here and never re-derived.
#[derive(Debug, Clone, PartialEq)]
pub struct CovarianceState {
    prior_covariance: DMatrix<f64>,
    prior_inverse_covariance: DMatrix<f64>,
    data_inverse_covariance: DMatrix<f64>,
}

impl CovarianceState {
    /// `prior_covariance` is parameters x parameters, `data_inverse_covariance` is
    /// channels x channels.
    pub fn new(
        prior_covariance: DMatrix<f64>,
        data_inverse_covariance: DMatrix<f64>,
    ) -> RetrievalOutcome<Self> {
        for (what, mat) in [
            ("prior covariance", &prior_covariance),
            ("data inverse covariance", &data_inverse_covariance),
        ] {
            if !mat.is_square() || mat.nrows() == 0 {
                return Err(RetrievalError::NonSquareMatrix {
                    what,
                    rows: mat.nrows(),
                    cols: mat.ncols(),
                });
            }
            if mat.iter().any(|x| !x.is_finite()) {
                return Err(RetrievalError::InvalidSetting {
                    name: what,
                    reason: "matrix has non-finite entries".to_string(),
                });
            }
            if !is_symmetric(mat, 1e-12 * mat.amax().max(1.0)) {
                warn!("{} is not symmetric", what);
            }
        }
        let prior_inverse_covariance = invert_symmetric(&prior_covariance)
            .ok_or(RetrievalError::SingularCovariance("prior covariance"))?;
        poorly_conditioned(&prior_covariance, CONDITION_WARNING);
        // zero channel weights are allowed
        if is_singular(&data_inverse_covariance, f64::EPSILON) {
            info!("data inverse covariance is singular, some channels carry no weight");
        }
        info!(
            "covariance state: {} parameters, {} channels",
            prior_covariance.nrows(),
            data_inverse_covariance.nrows()
        );
        Ok(Self {
            prior_covariance,
            prior_inverse_covariance,
            data_inverse_covariance,
        })
    }

    /// Independent priors and independent channels: prior variances on one diagonal,
    /// data inverse variances (channel weights) on the other.
    pub fn from_diagonals(
        prior_variances: &[f64],
        data_inverse_variances: &[f64],
    ) -> RetrievalOutcome<Self> {
        Self::new(
            diagonal_matrix(prior_variances),
            diagonal_matrix(data_inverse_variances),
        )
    }

    /// identity prior covariance and identity data weights
    pub fn identity(n_params: usize, n_channels: usize) -> RetrievalOutcome<Self> {
        Self::new(
            DMatrix::identity(n_params, n_params),
            DMatrix::identity(n_channels, n_channels),
        )
    }

    pub fn n_params(&self) -> usize {
        self.prior_covariance.nrows()
    }

    pub fn n_channels(&self) -> usize {
        self.data_inverse_covariance.nrows()
    }

    pub fn prior_covariance(&self) -> &DMatrix<f64> {
        &self.prior_covariance
    }

    pub fn prior_inverse_covariance(&self) -> &DMatrix<f64> {
        &self.prior_inverse_covariance
    }

    pub fn data_inverse_covariance(&self) -> &DMatrix<f64> {
        &self.data_inverse_covariance
    }

    /// Fails unless the state matches a model with the given sizes.
    pub fn check_dimensions(&self, n_params: usize, n_channels: usize) -> RetrievalOutcome<()> {
        check_len("prior covariance", n_params, self.n_params())?;
        check_len("data inverse covariance", n_channels, self.n_channels())
    }
}
