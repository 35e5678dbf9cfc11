use log::warn;
use nalgebra::DMatrix;

/// A matrix is treated as singular when its determinant is below `epsilon` in absolute value.
pub fn is_singular(A: &DMatrix<f64>, epsilon: f64) -> bool {
    let det = A.determinant();
    let is_singular = det.abs() < epsilon;
    if is_singular {
        warn!("Matrix is singular. Determinant = {:.8}", det);
    }
    is_singular
}

/// Condition number as the ratio of the largest singular value to the smallest one.
pub fn condition_number(A: &DMatrix<f64>) -> f64 {
    let singular_values = A.singular_values();
    let max_sigma = singular_values.max();
    let min_sigma = singular_values.min();
    if min_sigma == 0.0 {
        return f64::INFINITY;
    }
    max_sigma / min_sigma
}

/// Warns and returns true when the condition number exceeds `threshold`.
/// A poorly conditioned covariance still works, but its inverse amplifies rounding.
pub fn poorly_conditioned(A: &DMatrix<f64>, threshold: f64) -> bool {
    let condition_number = condition_number(A);
    let poorly_conditioned = condition_number > threshold;
    if poorly_conditioned {
        warn!(
            "Matrix is poorly conditioned. Condition number = {:.2}",
            condition_number
        );
    }
    poorly_conditioned
}

/// true when `A` equals its transpose within `tol`
pub fn is_symmetric(A: &DMatrix<f64>, tol: f64) -> bool {
    if !A.is_square() {
        return false;
    }
    let n = A.nrows();
    for i in 0..n {
        for j in (i + 1)..n {
            if (A[(i, j)] - A[(j, i)]).abs() > tol {
                return false;
            }
        }
    }
    true
}
