use crate::numerical::retrieval::bayesian_optimizer::{BayesianOptimizer, RetrievalResult};
use crate::numerical::retrieval::forward_model::ForwardModel;
use crate::numerical::retrieval::multi_start::{MultiStartController, MultiStartReport, SearchOutcome};
use crate::numerical::retrieval::retrieval_errors::{RetrievalOutcome, check_len};
use log::info;
use nalgebra::DVector;
use rayon::prelude::*;
use std::collections::HashMap;
use std::time::Instant;
use tabled::{builder::Builder, settings::Style};

/// One pixel or feature: its measurement, start point and optional own a priori.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalUnit {
    pub measurement: DVector<f64>,
    pub initial: DVector<f64>,
    /// replaces the shared a priori for this unit only
    pub a_priori: Option<DVector<f64>>,
}

impl RetrievalUnit {
    pub fn new(measurement: DVector<f64>, initial: DVector<f64>) -> Self {
        Self {
            measurement,
            initial,
            a_priori: None,
        }
    }

    pub fn with_a_priori(self, a_priori: DVector<f64>) -> Self {
        Self {
            a_priori: Some(a_priori),
            ..self
        }
    }
}

/// Something that retrieves one unit; implemented by both optimizer layers.
pub trait UnitRetrieval: Clone + Send + Sync {
    type Output: Send;

    fn a_priori(&self) -> &DVector<f64>;

    fn set_a_priori(&mut self, a_priori: DVector<f64>) -> RetrievalOutcome<()>;

    fn retrieve(
        &self,
        initial: &DVector<f64>,
        measurement: &DVector<f64>,
    ) -> RetrievalOutcome<Self::Output>;

    fn result(output: &Self::Output) -> &RetrievalResult;

    /// single-start runs spent on this output
    fn starts(_output: &Self::Output) -> usize {
        1
    }
}

impl<M: ForwardModel + Send + Sync> UnitRetrieval for BayesianOptimizer<M> {
    type Output = RetrievalResult;

    fn a_priori(&self) -> &DVector<f64> {
        BayesianOptimizer::a_priori(self)
    }

    fn set_a_priori(&mut self, a_priori: DVector<f64>) -> RetrievalOutcome<()> {
        self.modify_a_priori(a_priori)
    }

    fn retrieve(
        &self,
        initial: &DVector<f64>,
        measurement: &DVector<f64>,
    ) -> RetrievalOutcome<RetrievalResult> {
        self.try_minimise(initial, measurement)
    }

    fn result(output: &RetrievalResult) -> &RetrievalResult {
        output
    }
}

impl<M: ForwardModel + Send + Sync> UnitRetrieval for MultiStartController<M> {
    type Output = MultiStartReport;

    fn a_priori(&self) -> &DVector<f64> {
        self.optimizer().a_priori()
    }

    fn set_a_priori(&mut self, a_priori: DVector<f64>) -> RetrievalOutcome<()> {
        self.optimizer_mut().modify_a_priori(a_priori)
    }

    fn retrieve(
        &self,
        initial: &DVector<f64>,
        measurement: &DVector<f64>,
    ) -> RetrievalOutcome<MultiStartReport> {
        self.try_minimise(initial, measurement)
    }

    fn result(output: &MultiStartReport) -> &RetrievalResult {
        &output.result
    }

    fn starts(output: &MultiStartReport) -> usize {
        output.starts_evaluated
    }
}

/// Counters of one batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchStatistics {
    pub units: usize,
    pub converged: usize,
    pub iterations: usize,
    pub starts: usize,
    pub elapsed_ms: usize,
}

impl BatchStatistics {
    fn collect<R: UnitRetrieval>(outputs: &[R::Output], elapsed_ms: usize) -> Self {
        let mut stats = BatchStatistics {
            units: outputs.len(),
            elapsed_ms,
            ..Default::default()
        };
        for output in outputs {
            let result = R::result(output);
            stats.converged += result.converged as usize;
            stats.iterations += result.iterations;
            stats.starts += R::starts(output);
        }
        stats
    }

    pub fn table(&self) -> String {
        let mut stats = HashMap::new();
        stats.insert("units".to_string(), self.units);
        stats.insert("converged units".to_string(), self.converged);
        stats.insert("parameter updates".to_string(), self.iterations);
        stats.insert("single-start runs".to_string(), self.starts);
        stats.insert("time elapsed, ms".to_string(), self.elapsed_ms);
        let mut table = Builder::from(stats).build();
        table.with(Style::modern_rounded());
        table.to_string()
    }
}

#[derive(Debug, Clone)]
pub struct BatchReport<T> {
    pub outputs: Vec<T>,
    pub statistics: BatchStatistics,
}

/// Retrieve every unit in parallel.
///
/// Each rayon worker owns a clone of `retrieval` (model and covariances stay shared),
/// so per-unit a-priori replacement never touches an optimizer that another unit is using.
/// Units without their own a priori use the one `retrieval` was built with.
pub fn retrieve_batch<R: UnitRetrieval>(
    retrieval: &R,
    units: &[RetrievalUnit],
) -> RetrievalOutcome<BatchReport<R::Output>> {
    let n_params = retrieval.a_priori().len();
    for unit in units {
        if let Some(a_priori) = &unit.a_priori {
            check_len("unit a priori", n_params, a_priori.len())?;
        }
    }
    let shared_a_priori = retrieval.a_priori().clone();
    let begin = Instant::now();
    let outputs = units
        .par_iter()
        .map_init(
            || retrieval.clone(),
            |worker, unit| {
                let a_priori = unit.a_priori.as_ref().unwrap_or(&shared_a_priori);
                if worker.a_priori() != a_priori {
                    worker.set_a_priori(a_priori.clone())?;
                }
                worker.retrieve(&unit.initial, &unit.measurement)
            },
        )
        .collect::<RetrievalOutcome<Vec<R::Output>>>()?;
    let statistics = BatchStatistics::collect::<R>(&outputs, begin.elapsed().as_millis() as usize);
    info!("\n \n BATCH STATISTICS \n \n {}", statistics.table());
    Ok(BatchReport {
        outputs,
        statistics,
    })
}

/// results of a multi-start batch that stopped early on a cancellation token
pub fn cancelled_units(reports: &[MultiStartReport]) -> usize {
    reports
        .iter()
        .filter(|r| r.outcome == SearchOutcome::Cancelled)
        .count()
}
