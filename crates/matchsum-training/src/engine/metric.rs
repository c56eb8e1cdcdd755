use crate::dataset::{Example, SummaryRecord};
use crate::engine::model::Scores;
use crate::engine::state::MetricValues;
use crate::error::{TrainingError, TrainingResult};
use crate::layout::ResultPaths;
use std::sync::Arc;
use tracing::{info, warn};

/// Value name used for model selection.
pub const ROUGE_KEY: &str = "ROUGE";

pub trait Metric: Send {
    fn name(&self) -> &str;

    fn evaluate(&mut self, example: &Example, scores: &Scores) -> TrainingResult<()>;

    fn get_metric(&mut self, reset: bool) -> TrainingResult<MetricValues>;
}

fn select_candidate(scores: &Scores) -> Option<usize> {
    scores
        .candidates
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(idx, _)| idx)
}

fn record_for<'a>(data: &'a [SummaryRecord], example: &Example) -> TrainingResult<&'a SummaryRecord> {
    data.get(example.index).ok_or_else(|| {
        TrainingError::Metric(format!("example {} has no source record ({} loaded)", example.index, data.len()))
    })
}

fn write_outputs(paths: &ResultPaths, index: usize, record: &SummaryRecord, chosen: usize) -> TrainingResult<()> {
    std::fs::write(paths.dec.join(format!("{index}.dec")), record.candidate_sentences(chosen).join("\n"))?;
    std::fs::write(paths.reference.join(format!("{index}.ref")), record.summary.join("\n"))?;
    Ok(())
}

/// Mean precomputed ROUGE of the candidate the model ranks first.
///
/// Records without a `score` entry for the chosen candidate count as zero.
pub struct ValidMetric {
    data: Arc<Vec<SummaryRecord>>,
    output: Option<ResultPaths>,
    total: f64,
    count: usize,
    unscored: usize,
}

impl ValidMetric {
    #[must_use]
    pub fn new(data: Arc<Vec<SummaryRecord>>) -> Self {
        Self { data, output: None, total: 0.0, count: 0, unscored: 0 }
    }

    /// Also write decoded/reference files for external scoring.
    #[must_use]
    pub fn with_output(mut self, paths: ResultPaths) -> Self {
        self.output = Some(paths);
        self
    }
}

impl Metric for ValidMetric {
    fn name(&self) -> &str {
        "ValidMetric"
    }

    fn evaluate(&mut self, example: &Example, scores: &Scores) -> TrainingResult<()> {
        let record = record_for(&self.data, example)?;
        let chosen = select_candidate(scores)
            .ok_or_else(|| TrainingError::Metric(format!("example {} has no candidates", example.index)))?;
        match record.candidate_score(chosen) {
            Some(score) => self.total += score,
            None => self.unscored += 1,
        }
        self.count += 1;
        if let Some(paths) = &self.output {
            write_outputs(paths, example.index, record, chosen)?;
        }
        Ok(())
    }

    fn get_metric(&mut self, reset: bool) -> TrainingResult<MetricValues> {
        if self.unscored > 0 {
            warn!(unscored = self.unscored, "Selected candidates without a precomputed score");
        }
        let mean = if self.count == 0 { 0.0 } else { self.total / self.count as f64 };
        let mut values = MetricValues::new();
        values.insert(ROUGE_KEY.to_string(), mean);
        if reset {
            self.total = 0.0;
            self.count = 0;
            self.unscored = 0;
        }
        Ok(values)
    }
}

/// Writes `<i>.dec` / `<i>.ref` files for an external ROUGE scorer.
pub struct RougeOutputMetric {
    data: Arc<Vec<SummaryRecord>>,
    paths: ResultPaths,
    n_total: usize,
    written: usize,
    total: f64,
    scored: usize,
}

impl RougeOutputMetric {
    #[must_use]
    pub fn new(data: Arc<Vec<SummaryRecord>>, paths: ResultPaths, n_total: usize) -> Self {
        Self { data, paths, n_total, written: 0, total: 0.0, scored: 0 }
    }
}

impl Metric for RougeOutputMetric {
    fn name(&self) -> &str {
        "RougeOutputMetric"
    }

    fn evaluate(&mut self, example: &Example, scores: &Scores) -> TrainingResult<()> {
        let record = record_for(&self.data, example)?;
        let chosen = select_candidate(scores)
            .ok_or_else(|| TrainingError::Metric(format!("example {} has no candidates", example.index)))?;
        write_outputs(&self.paths, example.index, record, chosen)?;
        if let Some(score) = record.candidate_score(chosen) {
            self.total += score;
            self.scored += 1;
        }
        self.written += 1;
        Ok(())
    }

    fn get_metric(&mut self, reset: bool) -> TrainingResult<MetricValues> {
        if self.written != self.n_total {
            warn!(written = self.written, expected = self.n_total, "Decoded fewer summaries than test instances");
        }
        info!(
            dec = %self.paths.dec.display(),
            reference = %self.paths.reference.display(),
            "Decoded and reference summaries are ready for scoring"
        );
        let mut values = MetricValues::new();
        values.insert("written".to_string(), self.written as f64);
        if self.scored > 0 {
            values.insert(ROUGE_KEY.to_string(), self.total / self.scored as f64);
        }
        if reset {
            self.written = 0;
            self.total = 0.0;
            self.scored = 0;
        }
        Ok(values)
    }
}
