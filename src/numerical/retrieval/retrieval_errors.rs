use std::fmt;

/// Errors reported once, while the retrieval is being set up.
///
/// Ordinary non-convergence is never an error: it travels in
/// [`RetrievalResult::converged`](crate::numerical::retrieval::bayesian_optimizer::RetrievalResult).
#[derive(Debug, Clone, PartialEq)]
pub enum RetrievalError {
    /// A vector or matrix does not have the size the configuration declares.
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    /// Two channel coefficient sets declare different per-axis polynomial orders.
    OrderMismatch {
        channel: usize,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    /// A covariance matrix could not be inverted.
    SingularCovariance(&'static str),
    /// A covariance matrix is not square.
    NonSquareMatrix {
        what: &'static str,
        rows: usize,
        cols: usize,
    },
    /// Search bounds with min >= max or non-finite limits.
    InvalidBounds { index: usize, min: f64, max: f64 },
    /// Solver settings out of range (tolerance, iteration cap, restart budget).
    InvalidSetting { name: &'static str, reason: String },
    /// Task document could not be parsed or lacks a required key.
    Config(String),
}

impl fmt::Display for RetrievalError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RetrievalError::DimensionMismatch {
                what,
                expected,
                found,
            } => write!(
                f,
                "Dimension mismatch in {}: expected {}, found {}",
                what, expected, found
            ),
            RetrievalError::OrderMismatch {
                channel,
                expected,
                found,
            } => write!(
                f,
                "Channel {} declares polynomial orders {:?}, expected {:?}",
                channel, found, expected
            ),
            RetrievalError::SingularCovariance(what) => {
                write!(f, "Covariance matrix {} is singular", what)
            }
            RetrievalError::NonSquareMatrix { what, rows, cols } => {
                write!(f, "Matrix {} must be square, got {}x{}", what, rows, cols)
            }
            RetrievalError::InvalidBounds { index, min, max } => write!(
                f,
                "Invalid bounds for parameter {}: min = {}, max = {}",
                index, min, max
            ),
            RetrievalError::InvalidSetting { name, reason } => {
                write!(f, "Invalid setting {}: {}", name, reason)
            }
            RetrievalError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for RetrievalError {}

pub type RetrievalOutcome<T> = Result<T, RetrievalError>;

/// Fails with `DimensionMismatch` unless `found == expected`.
pub(crate) fn check_len(what: &'static str, expected: usize, found: usize) -> RetrievalOutcome<()> {
    if expected != found {
        return Err(RetrievalError::DimensionMismatch {
            what,
            expected,
            found,
        });
    }
    Ok(())
}
