use crate::numerical::retrieval::forward_model::{ErrorNorm, ForwardModel};
use crate::numerical::retrieval::retrieval_errors::{RetrievalError, RetrievalOutcome};
use itertools::Itertools;
use log::debug;
use nalgebra::{DMatrix, DVector};

/// Multivariate tensor-product polynomial, one coefficient set per channel.
///
/// With per-axis degrees `d_0 … d_{n-1}` every channel carries `Π(d_k + 1)` coefficients,
/// stored row-major over the exponent tuple `(e_0, …, e_{n-1})` (first variable slowest):
/// ```text
/// channel(p) = Σ c[e_0, …, e_{n-1}] * p_0^e_0 * … * p_{n-1}^e_{n-1}
/// ```
/// Example: two variables of degree 1, `[c00, c01, c10, c11]` is
/// `c00 + c01*p1 + c10*p0 + c11*p0*p1`.
#[derive(Debug, Clone, PartialEq)]
pub struct PolynomialModel {
    orders: Vec<usize>,
    coefficients: Vec<Vec<f64>>,
    exponents: Vec<Vec<usize>>,
    name: String,
}

impl PolynomialModel {
    /// Same degree `order` on each of the `n_params` axes.
    pub fn new(
        coefficients: Vec<Vec<f64>>,
        order: usize,
        n_params: usize,
    ) -> RetrievalOutcome<Self> {
        Self::with_axis_orders(coefficients, vec![order; n_params])
    }

    /// One degree per axis, shared by every channel.
    pub fn with_axis_orders(
        coefficients: Vec<Vec<f64>>,
        orders: Vec<usize>,
    ) -> RetrievalOutcome<Self> {
        if orders.is_empty() {
            return Err(RetrievalError::InvalidSetting {
                name: "polynomial orders",
                reason: "at least one variable is required".to_string(),
            });
        }
        if coefficients.is_empty() {
            return Err(RetrievalError::InvalidSetting {
                name: "polynomial coefficients",
                reason: "at least one channel is required".to_string(),
            });
        }
        let expected: usize = orders.iter().map(|d| d + 1).product();
        for (channel, coeffs) in coefficients.iter().enumerate() {
            if coeffs.len() != expected {
                return Err(RetrievalError::DimensionMismatch {
                    what: "polynomial coefficients",
                    expected,
                    found: coeffs.len(),
                });
            }
            if coeffs.iter().any(|c| !c.is_finite()) {
                return Err(RetrievalError::InvalidSetting {
                    name: "polynomial coefficients",
                    reason: format!("channel {} has a non-finite coefficient", channel),
                });
            }
        }
        let exponents: Vec<Vec<usize>> = orders
            .iter()
            .map(|&d| 0..=d)
            .multi_cartesian_product()
            .collect();
        debug!(
            "polynomial model: {} variables, {} channels, orders {:?}, {} terms",
            orders.len(),
            coefficients.len(),
            orders,
            exponents.len()
        );
        let name = format!(
            "polynomial {}var x {}ch, orders {:?}",
            orders.len(),
            coefficients.len(),
            orders
        );
        Ok(Self {
            orders,
            coefficients,
            exponents,
            name,
        })
    }

    /// Channels given with their own declared orders. All channels must declare the
    /// same per-axis orders.
    pub fn from_channel_orders(channels: Vec<(Vec<usize>, Vec<f64>)>) -> RetrievalOutcome<Self> {
        let Some((first_orders, _)) = channels.first() else {
            return Err(RetrievalError::InvalidSetting {
                name: "polynomial coefficients",
                reason: "at least one channel is required".to_string(),
            });
        };
        let first_orders = first_orders.clone();
        let mut coefficients = Vec::with_capacity(channels.len());
        for (channel, (orders, coeffs)) in channels.into_iter().enumerate() {
            if orders != first_orders {
                return Err(RetrievalError::OrderMismatch {
                    channel,
                    expected: first_orders,
                    found: orders,
                });
            }
            coefficients.push(coeffs);
        }
        Self::with_axis_orders(coefficients, first_orders)
    }

    /// per-axis degrees
    pub fn orders(&self) -> &[usize] {
        &self.orders
    }

    /// number of coefficients per channel
    pub fn coefficient_count(&self) -> usize {
        self.exponents.len()
    }

    pub fn coefficients(&self) -> &[Vec<f64>] {
        &self.coefficients
    }

    /// powers[k][e] = p_k^e, built by repeated multiplication so that p^0 = 1 at p = 0
    fn power_table(&self, point: &DVector<f64>) -> Vec<Vec<f64>> {
        self.orders
            .iter()
            .enumerate()
            .map(|(k, &d)| {
                let mut powers = Vec::with_capacity(d + 1);
                let mut acc = 1.0;
                for _ in 0..=d {
                    powers.push(acc);
                    acc *= point[k];
                }
                powers
            })
            .collect()
    }
}

impl ForwardModel for PolynomialModel {
    fn n_params(&self) -> usize {
        self.orders.len()
    }

    fn n_channels(&self) -> usize {
        self.coefficients.len()
    }

    fn predict(&self, point: &DVector<f64>) -> DVector<f64> {
        assert_eq!(point.len(), self.n_params(), "point has wrong length");
        let powers = self.power_table(point);
        let terms: Vec<f64> = self
            .exponents
            .iter()
            .map(|e| e.iter().enumerate().map(|(k, &ek)| powers[k][ek]).product())
            .collect();
        DVector::from_iterator(
            self.n_channels(),
            self.coefficients
                .iter()
                .map(|coeffs| coeffs.iter().zip(terms.iter()).map(|(c, t)| c * t).sum()),
        )
    }

    fn jacobian(&self, point: &DVector<f64>) -> DMatrix<f64> {
        assert_eq!(point.len(), self.n_params(), "point has wrong length");
        let n = self.n_params();
        let powers = self.power_table(point);
        let mut jac = DMatrix::zeros(n, self.n_channels());
        for var in 0..n {
            // d/dp_var of every monomial; exponent 0 terms are constant in p_var
            let d_terms: Vec<f64> = self
                .exponents
                .iter()
                .map(|e| {
                    if e[var] == 0 {
                        return 0.0;
                    }
                    let mut term = e[var] as f64 * powers[var][e[var] - 1];
                    for (k, &ek) in e.iter().enumerate() {
                        if k != var {
                            term *= powers[k][ek];
                        }
                    }
                    term
                })
                .collect();
            for (c, coeffs) in self.coefficients.iter().enumerate() {
                jac[(var, c)] = coeffs.iter().zip(d_terms.iter()).map(|(a, t)| a * t).sum();
            }
        }
        jac
    }

    fn error_norm(&self) -> ErrorNorm {
        ErrorNorm::RelativeRms
    }

    fn name(&self) -> &str {
        &self.name
    }
}
