use nalgebra::{DMatrix, DVector};

/// Inverse of a symmetric positive definite matrix.
/// Cholesky first, LU as a fallback for matrices that are invertible but not SPD.
pub fn invert_symmetric(mat: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    if !mat.is_square() || mat.nrows() == 0 {
        return None;
    }
    let inverse = match mat.clone().cholesky() {
        Some(chol) => chol.inverse(),
        None => mat.clone().lu().try_inverse()?,
    };
    if inverse.iter().all(|x| x.is_finite()) {
        Some(inverse)
    } else {
        None
    }
}

/// Diagonal matrix from a slice of diagonal entries
pub fn diagonal_matrix(diag: &[f64]) -> DMatrix<f64> {
    DMatrix::from_diagonal(&DVector::from_column_slice(diag))
}

/// Quadratic form `v^T * A * v`
pub fn quadratic_form(v: &DVector<f64>, A: &DMatrix<f64>) -> f64 {
    let Av = A * v;
    dot(v, &Av)
}

/// Dot product between two vectors, summed in index order so that
/// results are reproducible between calls
pub fn dot(a: &DVector<f64>, b: &DVector<f64>) -> f64 {
    let mut dot = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += *x * *y;
    }
    dot
}

/// Sum of squared elements
pub fn sum_of_squares(v: &DVector<f64>) -> f64 {
    v.iter().map(|x| x * x).sum()
}

/// true when every element is finite
pub fn all_finite(v: &DVector<f64>) -> bool {
    v.iter().all(|x| x.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_invert_diagonal() {
        let A = diagonal_matrix(&[2.0, 4.0, 0.5]);
        let inv = invert_symmetric(&A).unwrap();
        assert_relative_eq!(inv[(0, 0)], 0.5, epsilon = 1e-14);
        assert_relative_eq!(inv[(1, 1)], 0.25, epsilon = 1e-14);
        assert_relative_eq!(inv[(2, 2)], 2.0, epsilon = 1e-14);
        assert_eq!(inv[(0, 1)], 0.0);
    }

    #[test]
    fn test_invert_full_spd() {
        let A = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 3.0]);
        let inv = invert_symmetric(&A).unwrap();
        let eye = &A * &inv;
        assert_relative_eq!(eye, DMatrix::<f64>::identity(2, 2), epsilon = 1e-12);
    }

    #[test]
    fn test_invert_non_spd_uses_lu() {
        // indefinite but invertible
        let A = DMatrix::from_row_slice(2, 2, &[0.0, 1.0, 1.0, 0.0]);
        let inv = invert_symmetric(&A).unwrap();
        assert_relative_eq!(&A * &inv, DMatrix::<f64>::identity(2, 2), epsilon = 1e-12);
    }

    #[test]
    fn test_invert_singular() {
        let A = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 4.0]);
        assert!(invert_symmetric(&A).is_none());
        let B = DMatrix::<f64>::zeros(2, 3);
        assert!(invert_symmetric(&B).is_none());
    }

    #[test]
    fn test_quadratic_form() {
        let A = DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 1.0, 3.0]);
        let v = DVector::from_vec(vec![1.0, -1.0]);
        // 2 - 1 - 1 + 3
        assert_relative_eq!(quadratic_form(&v, &A), 3.0, epsilon = 1e-14);
        assert_eq!(sum_of_squares(&v), 2.0);
        assert!(all_finite(&v));
        assert!(!all_finite(&DVector::from_vec(vec![1.0, f64::NAN])));
    }
}
