use crate::numerical::retrieval::bayesian_optimizer::{
    BayesianOptimizer, RetrievalResult, TerminationReason,
};
use crate::numerical::retrieval::forward_model::ForwardModel;
use crate::numerical::retrieval::retrieval_errors::{RetrievalError, RetrievalOutcome, check_len};
use itertools::Itertools;
use log::{debug, info};
use nalgebra::DVector;

/// One `(min, max)` interval per parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchBounds {
    bounds: Vec<(f64, f64)>,
}

impl SearchBounds {
    pub fn new(bounds: Vec<(f64, f64)>) -> RetrievalOutcome<Self> {
        if bounds.is_empty() {
            return Err(RetrievalError::InvalidSetting {
                name: "bounds",
                reason: "at least one parameter interval is required".to_string(),
            });
        }
        for (index, &(min, max)) in bounds.iter().enumerate() {
            if !(min.is_finite() && max.is_finite() && min < max) {
                return Err(RetrievalError::InvalidBounds { index, min, max });
            }
        }
        Ok(Self { bounds })
    }

    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    pub fn intervals(&self) -> &[(f64, f64)] {
        &self.bounds
    }

    /// `min < p < max` for every parameter.
    pub fn contains_strictly(&self, point: &DVector<f64>) -> bool {
        point.len() == self.bounds.len()
            && point
                .iter()
                .zip(self.bounds.iter())
                .all(|(&p, &(min, max))| min < p && p < max)
    }

    /// Grid step per axis, `(max - min) / budget^(1/n)`.
    pub fn grid_step(&self, restart_budget: usize) -> Vec<f64> {
        let root = self.budget_root(restart_budget);
        self.bounds
            .iter()
            .map(|&(min, max)| (max - min) / root)
            .collect()
    }

    /// points per axis: every `min + i*step` still below `max`
    pub fn points_per_axis(&self, restart_budget: usize) -> usize {
        let root = self.budget_root(restart_budget);
        ((root - 1e-9).ceil() as usize).max(1)
    }

    fn budget_root(&self, restart_budget: usize) -> f64 {
        (restart_budget.max(1) as f64).powf(1.0 / self.bounds.len() as f64)
    }

    /// Deterministic start points, row-major with the first parameter outermost.
    pub fn start_grid(&self, restart_budget: usize) -> Vec<DVector<f64>> {
        let count = self.points_per_axis(restart_budget);
        let steps = self.grid_step(restart_budget);
        let axes: Vec<Vec<f64>> = self
            .bounds
            .iter()
            .zip(steps.iter())
            .map(|(&(min, _max), &step)| (0..count).map(|i| min + i as f64 * step).collect())
            .collect();
        axes.iter()
            .map(|axis| axis.iter().copied())
            .multi_cartesian_product()
            .map(DVector::from_vec)
            .collect()
    }
}

/// How a multi-start search ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    /// the run from the caller's guess converged inside the bounds
    InitialAccepted,
    /// a grid start converged inside the bounds
    EarlySuccess,
    /// grid and final refinement done without early success
    GridExhausted,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultiStartReport {
    /// best admissible result; may be the caller's initial guess
    pub result: RetrievalResult,
    pub outcome: SearchOutcome,
    /// number of single-start runs performed
    pub starts_evaluated: usize,
}

/// Deterministic restart search around a [`BayesianOptimizer`].
///
/// Results are adopted only if they improve on the current best and lie strictly
/// inside every bound, so the returned estimate is always admissible even though
/// intermediate iterates are unconstrained.
pub struct MultiStartController<M: ForwardModel> {
    optimizer: BayesianOptimizer<M>,
    bounds: SearchBounds,
    restart_budget: usize,
}

impl<M: ForwardModel> Clone for MultiStartController<M> {
    fn clone(&self) -> Self {
        Self {
            optimizer: self.optimizer.clone(),
            bounds: self.bounds.clone(),
            restart_budget: self.restart_budget,
        }
    }
}

impl<M: ForwardModel> MultiStartController<M> {
    pub fn new(
        optimizer: BayesianOptimizer<M>,
        bounds: SearchBounds,
        restart_budget: usize,
    ) -> RetrievalOutcome<Self> {
        check_len("bounds", optimizer.n_params(), bounds.len())?;
        if restart_budget == 0 {
            return Err(RetrievalError::InvalidSetting {
                name: "restarts",
                reason: "restart budget must be > 0".to_string(),
            });
        }
        info!(
            "multi-start search: {} parameters, restart budget {}, {} grid points",
            bounds.len(),
            restart_budget,
            bounds.points_per_axis(restart_budget).pow(bounds.len() as u32)
        );
        Ok(Self {
            optimizer,
            bounds,
            restart_budget,
        })
    }

    pub fn optimizer(&self) -> &BayesianOptimizer<M> {
        &self.optimizer
    }

    /// mutable access, e.g. for `modify_a_priori` between calls
    pub fn optimizer_mut(&mut self) -> &mut BayesianOptimizer<M> {
        &mut self.optimizer
    }

    pub fn bounds(&self) -> &SearchBounds {
        &self.bounds
    }

    pub fn restart_budget(&self) -> usize {
        self.restart_budget
    }

    pub fn start_grid(&self) -> Vec<DVector<f64>> {
        self.bounds.start_grid(self.restart_budget)
    }

    pub fn try_minimise(
        &self,
        initial: &DVector<f64>,
        measurement: &DVector<f64>,
    ) -> RetrievalOutcome<MultiStartReport> {
        check_len("initial guess", self.optimizer.n_params(), initial.len())?;
        check_len("measurement", self.optimizer.n_channels(), measurement.len())?;
        Ok(self.minimise(initial, measurement))
    }

    /// # Panics
    ///
    /// Panics if `initial` or `measurement` do not match the model dimensions.
    pub fn minimise(&self, initial: &DVector<f64>, measurement: &DVector<f64>) -> MultiStartReport {
        let first = self.optimizer.minimise(initial, measurement);
        let mut starts_evaluated = 1;
        let mut best: Option<RetrievalResult> = None;
        if self.bounds.contains_strictly(&first.parameters) {
            if first.converged {
                return self.report(first, SearchOutcome::InitialAccepted, starts_evaluated);
            }
            best = Some(first);
        } else {
            debug!("initial result {:?} is out of bounds", first.parameters.as_slice());
        }

        for start in self.start_grid() {
            if self.is_cancelled() {
                let result =
                    self.best_or_initial(best, initial, measurement, TerminationReason::Cancelled);
                return self.report(result, SearchOutcome::Cancelled, starts_evaluated);
            }
            let candidate = self.optimizer.minimise(&start, measurement);
            starts_evaluated += 1;
            if self.adopt(&mut best, candidate) {
                if let Some(result) = best.take_if(|b| b.converged) {
                    return self.report(result, SearchOutcome::EarlySuccess, starts_evaluated);
                }
            }
        }

        if self.is_cancelled() {
            let result =
                self.best_or_initial(best, initial, measurement, TerminationReason::Cancelled);
            return self.report(result, SearchOutcome::Cancelled, starts_evaluated);
        }
        let seed = best.as_ref().map_or(initial, |b| &b.parameters).clone();
        let refined = self.optimizer.minimise(&seed, measurement);
        starts_evaluated += 1;
        self.adopt(&mut best, refined);
        let result =
            self.best_or_initial(best, initial, measurement, TerminationReason::MaxIterations);
        self.report(result, SearchOutcome::GridExhausted, starts_evaluated)
    }

    /// The first admissible candidate is always taken, later ones only if they lower the error.
    fn adopt(&self, best: &mut Option<RetrievalResult>, candidate: RetrievalResult) -> bool {
        if !self.bounds.contains_strictly(&candidate.parameters) {
            return false;
        }
        if best.as_ref().is_some_and(|b| candidate.error >= b.error) {
            return false;
        }
        debug!(
            "adopting {:?} with error {:e}",
            candidate.parameters.as_slice(),
            candidate.error
        );
        *best = Some(candidate);
        true
    }

    /// the caller's guess, scored and not converged, when nothing admissible was found
    fn best_or_initial(
        &self,
        best: Option<RetrievalResult>,
        initial: &DVector<f64>,
        measurement: &DVector<f64>,
        termination: TerminationReason,
    ) -> RetrievalResult {
        best.unwrap_or_else(|| RetrievalResult {
            error: self.optimizer.evaluate_error(initial, measurement),
            parameters: initial.clone(),
            converged: false,
            iterations: 0,
            termination,
        })
    }

    fn is_cancelled(&self) -> bool {
        self.optimizer
            .cancellation_token()
            .is_some_and(|token| token.is_cancelled())
    }

    fn report(
        &self,
        result: RetrievalResult,
        outcome: SearchOutcome,
        starts_evaluated: usize,
    ) -> MultiStartReport {
        debug!(
            "multi-start: {:?} after {} starts, error = {:e}",
            outcome, starts_evaluated, result.error
        );
        MultiStartReport {
            result,
            outcome,
            starts_evaluated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numerical::retrieval::bayesian_optimizer::OptimizerConfig;
    use crate::numerical::retrieval::cancellation::CancellationToken;
    use crate::numerical::retrieval::polynomial_model::PolynomialModel;
    use crate::numerical::retrieval::prior_state::CovarianceState;
    use approx::assert_relative_eq;
    use std::sync::Arc;

    /// channel 0 = p0^2, channel 1 = p1; two roots in p0
    fn two_root_controller(a_priori: Vec<f64>) -> MultiStartController<PolynomialModel> {
        let mut square = vec![0.0; 9];
        square[6] = 1.0;
        let mut linear = vec![0.0; 9];
        linear[1] = 1.0;
        let model = PolynomialModel::new(vec![square, linear], 2, 2).unwrap();
        let optimizer = BayesianOptimizer::new(
            Arc::new(model),
            Arc::new(CovarianceState::identity(2, 2).unwrap()),
            DVector::from_vec(a_priori),
            OptimizerConfig::default().with_max_iterations(500),
        )
        .unwrap();
        let bounds = SearchBounds::new(vec![(0.0, 5.0), (0.0, 3.0)]).unwrap();
        MultiStartController::new(optimizer, bounds, 9).unwrap()
    }

    fn linear_controller(bounds: Vec<(f64, f64)>) -> MultiStartController<PolynomialModel> {
        let model = PolynomialModel::new(
            vec![vec![2.0, -1.0, -1.0, 0.0], vec![-6.0, 1.0, -1.0, 0.0]],
            1,
            2,
        )
        .unwrap();
        let optimizer = BayesianOptimizer::new(
            Arc::new(model),
            Arc::new(CovarianceState::identity(2, 2).unwrap()),
            DVector::from_vec(vec![9.0, 1.0]),
            OptimizerConfig::default(),
        )
        .unwrap();
        MultiStartController::new(optimizer, SearchBounds::new(bounds).unwrap(), 9).unwrap()
    }

    #[test]
    fn test_bounds_validation() {
        assert!(SearchBounds::new(vec![]).is_err());
        assert_eq!(
            SearchBounds::new(vec![(0.0, 1.0), (2.0, 2.0)]),
            Err(RetrievalError::InvalidBounds {
                index: 1,
                min: 2.0,
                max: 2.0
            })
        );
        assert!(SearchBounds::new(vec![(0.0, f64::NAN)]).is_err());
    }

    #[test]
    fn test_contains_strictly() {
        let bounds = SearchBounds::new(vec![(0.0, 10.0), (0.0, 3.0)]).unwrap();
        assert!(bounds.contains_strictly(&DVector::from_vec(vec![5.0, 1.0])));
        assert!(!bounds.contains_strictly(&DVector::from_vec(vec![0.0, 1.0])));
        assert!(!bounds.contains_strictly(&DVector::from_vec(vec![5.0, 3.0])));
        assert!(!bounds.contains_strictly(&DVector::from_vec(vec![5.0, f64::NAN])));
        assert!(!bounds.contains_strictly(&DVector::from_vec(vec![5.0])));
    }

    #[test]
    fn test_grid_for_unequal_budgets() {
        let bounds = SearchBounds::new(vec![(0.0, 1.0), (0.0, 1.0), (0.0, 1.0)]).unwrap();
        assert_eq!(bounds.points_per_axis(8), 2);
        assert_eq!(bounds.points_per_axis(9), 3);
        assert_eq!(bounds.points_per_axis(1), 1);
        let grid = bounds.start_grid(8);
        assert_eq!(grid.len(), 8);
        assert_eq!(grid[0], DVector::from_vec(vec![0.0, 0.0, 0.0]));
        assert_relative_eq!(grid[1][2], 0.5, epsilon = 1e-12);
        assert_relative_eq!(grid[4][0], 0.5, epsilon = 1e-12);
        // non-square budget: every point still below the upper bound
        let bounds = SearchBounds::new(vec![(0.0, 10.0), (0.0, 3.0)]).unwrap();
        let grid = bounds.start_grid(10);
        assert_eq!(grid.len(), 16);
        assert!(grid.iter().all(|p| p[0] < 10.0 && p[1] < 3.0));
    }

    #[test]
    fn test_initial_accepted() {
        let controller = two_root_controller(vec![2.0, 1.0]);
        let report = controller.minimise(
            &DVector::from_vec(vec![1.5, 0.8]),
            &DVector::from_vec(vec![4.0, 1.0]),
        );
        assert_eq!(report.outcome, SearchOutcome::InitialAccepted);
        assert_eq!(report.starts_evaluated, 1);
        assert!(report.result.converged);
        assert_relative_eq!(report.result.parameters[0], 2.0, epsilon = 1e-4);
    }

    #[test]
    fn test_early_success_from_grid() {
        // the run from p0 = -3 settles near the negative root, outside the bounds
        let controller = two_root_controller(vec![2.0, 1.0]);
        let report = controller.minimise(
            &DVector::from_vec(vec![-3.0, 1.0]),
            &DVector::from_vec(vec![4.0, 1.0]),
        );
        assert_eq!(report.outcome, SearchOutcome::EarlySuccess);
        assert!(report.result.converged);
        assert!(report.starts_evaluated >= 2);
        assert!(report.starts_evaluated <= 10);
        assert!(controller.bounds().contains_strictly(&report.result.parameters));
        assert_relative_eq!(report.result.parameters[0], 2.0, epsilon = 1e-4);
        assert_relative_eq!(report.result.parameters[1], 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_exact_guess_outside_bounds_does_not_block_grid() {
        // (-2, 1) fits the data exactly but p0 < 0 is outside the bounds
        let controller = two_root_controller(vec![2.0, 1.0]);
        let initial = DVector::from_vec(vec![-2.0, 1.0]);
        let measurement = DVector::from_vec(vec![4.0, 1.0]);
        assert!(controller.optimizer().evaluate_error(&initial, &measurement) < 1e-12);

        let report = controller.minimise(&initial, &measurement);
        assert_eq!(report.outcome, SearchOutcome::EarlySuccess);
        assert!(report.result.converged);
        assert!(controller.bounds().contains_strictly(&report.result.parameters));
        assert_relative_eq!(report.result.parameters[0], 2.0, epsilon = 1e-4);
        assert_relative_eq!(report.result.parameters[1], 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_out_of_bounds_results_rejected() {
        // every run ends at (9, 1), outside p0 < 5
        let controller = linear_controller(vec![(0.0, 5.0), (0.0, 3.0)]);
        let initial = DVector::from_vec(vec![2.0, 0.5]);
        let measurement = DVector::from_vec(vec![-8.0, -14.0]);
        let report = controller.minimise(&initial, &measurement);
        assert_eq!(report.outcome, SearchOutcome::GridExhausted);
        assert_eq!(report.starts_evaluated, 1 + 9 + 1);
        assert_eq!(report.result.parameters, initial);
        assert!(!report.result.converged);
        assert_relative_eq!(
            report.result.error,
            controller.optimizer().evaluate_error(&initial, &measurement),
            epsilon = 1e-15
        );
    }

    #[test]
    fn test_deterministic_reports() {
        let controller = two_root_controller(vec![2.0, 1.0]);
        let initial = DVector::from_vec(vec![-3.0, 1.0]);
        let measurement = DVector::from_vec(vec![4.0, 1.0]);
        assert_eq!(
            controller.minimise(&initial, &measurement),
            controller.clone().minimise(&initial, &measurement)
        );
    }

    #[test]
    fn test_cancelled_search() {
        let mut controller = two_root_controller(vec![2.0, 1.0]);
        let token = CancellationToken::new();
        token.cancel();
        controller
            .optimizer_mut()
            .set_cancellation_token(Some(token));
        let report = controller.minimise(
            &DVector::from_vec(vec![-3.0, 1.0]),
            &DVector::from_vec(vec![4.0, 1.0]),
        );
        assert_eq!(report.outcome, SearchOutcome::Cancelled);
        assert_eq!(report.starts_evaluated, 1);
    }

    #[test]
    fn test_controller_validation() {
        let controller = linear_controller(vec![(0.0, 10.0), (0.0, 3.0)]);
        let optimizer = controller.optimizer().clone();
        let one_bound = SearchBounds::new(vec![(0.0, 1.0)]).unwrap();
        assert!(MultiStartController::new(optimizer.clone(), one_bound, 9).is_err());
        let bounds = controller.bounds().clone();
        assert!(MultiStartController::new(optimizer, bounds, 0).is_err());
        assert!(
            controller
                .try_minimise(&DVector::zeros(3), &DVector::zeros(2))
                .is_err()
        );
    }
}
