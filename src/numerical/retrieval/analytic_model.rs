use crate::numerical::retrieval::forward_model::{ErrorNorm, ForwardModel};
use crate::numerical::retrieval::retrieval_errors::{RetrievalError, RetrievalOutcome};
use nalgebra::{DMatrix, DVector};

/// Trait for a channel given as a function of two variables with known partial derivatives.
/// The caller is responsible for the derivatives being correct.
pub trait AnalyticSurface {
    /// Evaluate the function at (x, y)
    fn value(&self, x: f64, y: f64) -> f64;

    /// partial derivative with respect to x
    fn d_x(&self, x: f64, y: f64) -> f64;

    /// partial derivative with respect to y
    fn d_y(&self, x: f64, y: f64) -> f64;

    /// Get function name for debugging/logging
    fn name(&self) -> &str {
        "unnamed_surface"
    }
}

/// Function wrapper for closures with analytical partial derivatives
pub struct ClosureSurface<F, DX, DY>
where
    F: Fn(f64, f64) -> f64,
    DX: Fn(f64, f64) -> f64,
    DY: Fn(f64, f64) -> f64,
{
    func: F,
    d_x_func: DX,
    d_y_func: DY,
    name: String,
}

impl<F, DX, DY> ClosureSurface<F, DX, DY>
where
    F: Fn(f64, f64) -> f64,
    DX: Fn(f64, f64) -> f64,
    DY: Fn(f64, f64) -> f64,
{
    pub fn new(func: F, d_x_func: DX, d_y_func: DY, name: &str) -> Self {
        Self {
            func,
            d_x_func,
            d_y_func,
            name: name.to_string(),
        }
    }
}

impl<F, DX, DY> AnalyticSurface for ClosureSurface<F, DX, DY>
where
    F: Fn(f64, f64) -> f64,
    DX: Fn(f64, f64) -> f64,
    DY: Fn(f64, f64) -> f64,
{
    fn value(&self, x: f64, y: f64) -> f64 {
        (self.func)(x, y)
    }

    fn d_x(&self, x: f64, y: f64) -> f64 {
        (self.d_x_func)(x, y)
    }

    fn d_y(&self, x: f64, y: f64) -> f64 {
        (self.d_y_func)(x, y)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

pub type BoxedSurface = Box<dyn AnalyticSurface + Send + Sync>;

/// Two-parameter forward model where each channel is an [`AnalyticSurface`].
/// Two or three channels.
pub struct AnalyticModel {
    channels: Vec<BoxedSurface>,
    name: String,
}

impl AnalyticModel {
    pub fn new(channels: Vec<BoxedSurface>) -> RetrievalOutcome<Self> {
        if !(2..=3).contains(&channels.len()) {
            return Err(RetrievalError::InvalidSetting {
                name: "analytic channels",
                reason: format!("2 or 3 channels are supported, got {}", channels.len()),
            });
        }
        Ok(Self::assemble(channels))
    }

    fn assemble(channels: Vec<BoxedSurface>) -> Self {
        let names: Vec<&str> = channels.iter().map(|c| c.name()).collect();
        let name = format!("analytic [{}]", names.join(", "));
        Self { channels, name }
    }

    pub fn two_channel<A, B>(first: A, second: B) -> Self
    where
        A: AnalyticSurface + Send + Sync + 'static,
        B: AnalyticSurface + Send + Sync + 'static,
    {
        Self::assemble(vec![Box::new(first), Box::new(second)])
    }

    pub fn three_channel<A, B, C>(first: A, second: B, third: C) -> Self
    where
        A: AnalyticSurface + Send + Sync + 'static,
        B: AnalyticSurface + Send + Sync + 'static,
        C: AnalyticSurface + Send + Sync + 'static,
    {
        Self::assemble(vec![Box::new(first), Box::new(second), Box::new(third)])
    }
}

impl ForwardModel for AnalyticModel {
    fn n_params(&self) -> usize {
        2
    }

    fn n_channels(&self) -> usize {
        self.channels.len()
    }

    fn predict(&self, point: &DVector<f64>) -> DVector<f64> {
        assert_eq!(point.len(), 2, "analytic model takes two parameters");
        let (x, y) = (point[0], point[1]);
        DVector::from_iterator(
            self.channels.len(),
            self.channels.iter().map(|c| c.value(x, y)),
        )
    }

    fn jacobian(&self, point: &DVector<f64>) -> DMatrix<f64> {
        assert_eq!(point.len(), 2, "analytic model takes two parameters");
        let (x, y) = (point[0], point[1]);
        let mut jac = DMatrix::zeros(2, self.channels.len());
        for (c, surface) in self.channels.iter().enumerate() {
            jac[(0, c)] = surface.d_x(x, y);
            jac[(1, c)] = surface.d_y(x, y);
        }
        jac
    }

    fn error_norm(&self) -> ErrorNorm {
        ErrorNorm::RelativeSquared
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numerical::retrieval::forward_model::finite_difference_jacobian;
    use approx::assert_relative_eq;

    fn backscatter_like() -> AnalyticModel {
        AnalyticModel::three_channel(
            ClosureSurface::new(
                |x, y| x * (-0.5 * y).exp(),
                |_x, y| (-0.5 * y).exp(),
                |x, y| -0.5 * x * (-0.5 * y).exp(),
                "hh",
            ),
            ClosureSurface::new(|x, y| x * x + y, |x, _y| 2.0 * x, |_x, _y| 1.0, "hv"),
            ClosureSurface::new(
                |x, y| (x * y).sin(),
                |x, y| y * (x * y).cos(),
                |x, y| x * (x * y).cos(),
                "vv",
            ),
        )
    }

    #[test]
    fn test_closure_surface() {
        let s = ClosureSurface::new(|x, y| x * y, |_x, y| y, |x, _y| x, "xy");
        assert_eq!(s.value(2.0, 3.0), 6.0);
        assert_eq!(s.d_x(2.0, 3.0), 3.0);
        assert_eq!(s.d_y(2.0, 3.0), 2.0);
        assert_eq!(s.name(), "xy");
    }

    #[test]
    fn test_three_channel_jacobian() {
        let model = backscatter_like();
        assert_eq!(model.n_channels(), 3);
        assert_eq!(model.n_params(), 2);
        assert_eq!(model.name(), "analytic [hh, hv, vv]");
        let point = DVector::from_vec(vec![1.3, 0.4]);
        let analytic = model.jacobian(&point);
        let numeric = finite_difference_jacobian(&model, &point, 1e-6);
        for (a, b) in analytic.iter().zip(numeric.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-7, max_relative = 1e-6);
        }
    }

    #[test]
    fn test_two_channel_predict() {
        let model = AnalyticModel::two_channel(
            ClosureSurface::new(|x, y| x + 2.0 * y, |_x, _y| 1.0, |_x, _y| 2.0, "a"),
            ClosureSurface::new(|x, y| x - y, |_x, _y| 1.0, |_x, _y| -1.0, "b"),
        );
        let predicted = model.predict(&DVector::from_vec(vec![1.0, 2.0]));
        assert_eq!(predicted, DVector::from_vec(vec![5.0, -1.0]));
        assert_eq!(model.error_norm(), ErrorNorm::RelativeSquared);
    }

    #[test]
    fn test_channel_count_checked() {
        fn sum_surface() -> BoxedSurface {
            Box::new(ClosureSurface::new(
                |x, y| x + y,
                |_x, _y| 1.0,
                |_x, _y| 1.0,
                "sum",
            ))
        }
        assert!(AnalyticModel::new(Vec::new()).is_err());
        assert!(matches!(
            AnalyticModel::new(vec![sum_surface()]),
            Err(RetrievalError::InvalidSetting { .. })
        ));
        assert!(AnalyticModel::new((0..4).map(|_| sum_surface()).collect()).is_err());
        assert_eq!(
            AnalyticModel::new(vec![sum_surface(), sum_surface()])
                .unwrap()
                .n_channels(),
            2
        );
        assert_eq!(
            AnalyticModel::new((0..3).map(|_| sum_surface()).collect())
                .unwrap()
                .n_channels(),
            3
        );
    }
}
