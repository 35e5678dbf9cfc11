//! some linear algebra functions used throughout the code
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]
/// matrix inversion and small dense products used by the retrieval step
pub mod some_matrix_inv;
/// diagnostics for covariance matrices: if it is singular
/// or poorly conditioned
pub mod linear_sys_diagnostics;
