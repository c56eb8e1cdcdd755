use crate::dataset::Example;
use crate::engine::metric::Metric;
use crate::engine::model::SummaryModel;
use crate::engine::state::EvalResults;
use crate::error::{TrainingError, TrainingResult};
use std::time::Instant;
use tracing::info;

/// One pass over `data`; every metric sees every example, then reports and resets.
pub fn evaluate(
    model: &dyn SummaryModel,
    data: &[Example],
    metrics: &mut [Box<dyn Metric>],
) -> TrainingResult<EvalResults> {
    for example in data {
        let scores = model.forward(example);
        for metric in metrics.iter_mut() {
            metric.evaluate(example, &scores)?;
        }
    }
    let mut results = EvalResults::new();
    for metric in metrics.iter_mut() {
        results.insert(metric.name().to_string(), metric.get_metric(true)?);
    }
    Ok(results)
}

/// Evaluates a fixed model over a test split.
pub struct Tester {
    data: Vec<Example>,
    model: Box<dyn SummaryModel>,
    metrics: Vec<Box<dyn Metric>>,
    batch_size: usize,
    device: usize,
}

impl Tester {
    pub fn new(
        data: Vec<Example>,
        model: Box<dyn SummaryModel>,
        metrics: Vec<Box<dyn Metric>>,
        batch_size: usize,
        device: usize,
    ) -> TrainingResult<Self> {
        if batch_size == 0 {
            return Err(TrainingError::InvalidSpec("batch_size must be >= 1".to_string()));
        }
        if metrics.is_empty() {
            return Err(TrainingError::InvalidSpec("at least one metric is required".to_string()));
        }
        Ok(Self { data, model, metrics, batch_size, device })
    }

    pub fn test(&mut self) -> TrainingResult<EvalResults> {
        let started = Instant::now();
        let batches = self.data.len().div_ceil(self.batch_size);
        info!(device = self.device, instances = self.data.len(), batches, "Evaluating");
        let results = evaluate(self.model.as_ref(), &self.data, &mut self.metrics)?;
        info!(elapsed_ms = started.elapsed().as_millis(), "Evaluation finished");
        Ok(results)
    }
}
