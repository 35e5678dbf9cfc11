#![allow(non_snake_case)]
use crate::Utils::logger::{init_logger, save_results_to_csv};
use crate::numerical::retrieval::analytic_model::{AnalyticModel, ClosureSurface};
use crate::numerical::retrieval::batch_retrieval::{RetrievalUnit, retrieve_batch};
use crate::numerical::retrieval::bayesian_optimizer::{BayesianOptimizer, OptimizerConfig};
use crate::numerical::retrieval::cancellation::CancellationToken;
use crate::numerical::retrieval::forward_model::ForwardModel;
use crate::numerical::retrieval::multi_start::{MultiStartController, SearchBounds};
use crate::numerical::retrieval::polynomial_model::PolynomialModel;
use crate::numerical::retrieval::prior_state::CovarianceState;
use crate::numerical::retrieval::retrieval_config::RetrievalConfig;
use crate::numerical::retrieval::retrieval_errors::RetrievalOutcome;
use nalgebra::DVector;
use std::sync::Arc;
use std::time::Duration;

/// two-channel linear polynomial, exact solution (9, 1) for measurement (-8, -14)
fn linear_model() -> RetrievalOutcome<PolynomialModel> {
    PolynomialModel::new(
        vec![vec![2.0, -1.0, -1.0, 0.0], vec![-6.0, 1.0, -1.0, 0.0]],
        1,
        2,
    )
}

/// soil-moisture-like backscatter surfaces of (moisture, roughness)
fn backscatter_model() -> AnalyticModel {
    AnalyticModel::three_channel(
        ClosureSurface::new(
            |m, s| m * (-0.5 * s).exp(),
            |_m, s| (-0.5 * s).exp(),
            |m, s| -0.5 * m * (-0.5 * s).exp(),
            "hh",
        ),
        ClosureSurface::new(|m, s| m * m + s, |m, _s| 2.0 * m, |_m, _s| 1.0, "hv"),
        ClosureSurface::new(|m, s| m + s * s, |_m, _s| 1.0, |_m, s| 2.0 * s, "vv"),
    )
}

pub fn retrieval_examples(example: usize) -> RetrievalOutcome<()> {
    init_logger(Some("info".to_string()), None)?;
    match example {
        0 => {
            // single start, linear model
            let optimizer = BayesianOptimizer::new(
                Arc::new(linear_model()?),
                Arc::new(CovarianceState::identity(2, 2)?),
                DVector::from_vec(vec![9.0, 1.0]),
                OptimizerConfig::default(),
            )?;
            let measurement = DVector::from_vec(vec![-8.0, -14.0]);
            let (result, history) =
                optimizer.minimise_with_history(&DVector::from_vec(vec![5.0, 0.5]), &measurement);
            println!("result = {:?}", result);
            println!("best error per iteration = {:?}", history);
        }
        1 => {
            // multi-start search for an analytic model, stopped after one second at most
            let truth = DVector::from_vec(vec![1.2, 0.8]);
            let model = backscatter_model();
            let measurement = model.predict(&truth);
            let mut optimizer = BayesianOptimizer::new(
                Arc::new(model),
                Arc::new(CovarianceState::from_diagonals(&[10.0, 10.0], &[1.0, 1.0, 1.0])?),
                DVector::from_vec(vec![1.0, 1.0]),
                OptimizerConfig::default()
                    .with_tolerance(1e-10)
                    .with_max_iterations(200),
            )?;
            optimizer.set_cancellation_token(Some(CancellationToken::with_timeout(
                Duration::from_secs(1),
            )));
            let bounds = SearchBounds::new(vec![(0.0, 3.0), (0.0, 2.0)])?;
            let controller = MultiStartController::new(optimizer, bounds, 16)?;
            let report = controller.minimise(&DVector::from_vec(vec![-1.0, 5.0]), &measurement);
            println!(
                "{:?} after {} starts: {:?}",
                report.outcome,
                report.starts_evaluated,
                report.result.parameters.as_slice()
            );
        }
        2 => {
            // settings and model from a task document
            let task = "
                solver
                tolerance: 1e-8
                max_iterations: 50
                loglevel: info
                log_file: auto
                model
                orders: 1, 1
                channel_0: 2.0, -1.0, -1.0, 0.0
                channel_1: -6.0, 1.0, -1.0, 0.0
                prior
                a_priori: 9.0, 1.0
                covariance: 1.0, 1.0
                data
                inverse_covariance: 1.0, 1.0
                bounds
                lower: 0.0, 0.0
                upper: 10.0, 3.0
                restarts: 9
            ";
            let config = RetrievalConfig::parse(task)?;
            config.init_logging()?;
            if let Some(model) = config.model()? {
                let controller = config.build_controller(Arc::new(model))?;
                let report = controller.minimise(
                    &DVector::from_vec(vec![5.0, 0.5]),
                    &DVector::from_vec(vec![-8.0, -14.0]),
                );
                println!("{:?}", report);
            }
        }
        3 => {
            // per-pixel batch with pixel-dependent a priori, saved to csv
            let optimizer = BayesianOptimizer::new(
                Arc::new(linear_model()?),
                Arc::new(CovarianceState::identity(2, 2)?),
                DVector::from_vec(vec![0.0, 0.0]),
                OptimizerConfig::default(),
            )?;
            let units: Vec<RetrievalUnit> = (0..100)
                .map(|i| {
                    let (p0, p1) = (0.1 * i as f64, 1.0 + 0.01 * i as f64);
                    let measurement = DVector::from_vec(vec![2.0 - p0 - p1, -6.0 - p0 + p1]);
                    RetrievalUnit::new(measurement, DVector::from_vec(vec![1.0, 1.0]))
                        .with_a_priori(DVector::from_vec(vec![p0, p1]))
                })
                .collect();
            let report = retrieve_batch(&optimizer, &units)?;
            let names = vec!["p0".to_string(), "p1".to_string()];
            match save_results_to_csv(&report.outputs, &names, "retrieval_results.csv") {
                Ok(()) => println!("results saved to retrieval_results.csv"),
                Err(e) => println!("results not saved: {}", e),
            }
        }
        _ => {
            println!("example {} does not exist", example);
        }
    }
    Ok(())
}
