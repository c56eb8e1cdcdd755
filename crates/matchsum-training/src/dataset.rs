use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Number of similarity features computed per sentence set.
pub const FEATURE_DIM: usize = 3;

/// One line of a CNN/DM jsonl split.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryRecord {
    /// Document sentences.
    pub text: Vec<String>,
    /// Reference summary sentences.
    pub summary: Vec<String>,
    /// Candidate summaries as sentence indices into `text`, best first.
    pub indices: Vec<Vec<usize>>,
    /// ROUGE of each candidate against the reference, computed at data-prep time.
    #[serde(default)]
    pub score: Vec<f64>,
}

impl SummaryRecord {
    pub fn candidate_sentences(&self, candidate: usize) -> Vec<&str> {
        self.indices
            .get(candidate)
            .map(|idx| idx.iter().filter_map(|i| self.text.get(*i)).map(String::as_str).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn candidate_score(&self, candidate: usize) -> Option<f64> {
        self.score.get(candidate).copied()
    }
}

/// Model input derived from a `SummaryRecord`.
#[derive(Debug, Clone, PartialEq)]
pub struct Example {
    /// Position of the source record in its split.
    pub index: usize,
    pub summary: Vec<f32>,
    pub candidates: Vec<Vec<f32>>,
}

pub fn read_jsonl(path: &Path) -> TrainingResult<Vec<SummaryRecord>> {
    let contents = std::fs::read_to_string(path)?;
    let mut records = Vec::new();

    for (idx, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: SummaryRecord = serde_json::from_str(line).map_err(|e| {
            TrainingError::Dataset(format!("{}: failed to parse jsonl line {}: {}", path.display(), idx + 1, e))
        })?;
        records.push(record);
    }

    Ok(records)
}

pub fn validate_records(records: &[SummaryRecord]) -> TrainingResult<()> {
    if records.is_empty() {
        return Err(TrainingError::Dataset("dataset must not be empty".to_string()));
    }
    for (idx, record) in records.iter().enumerate() {
        if record.text.is_empty() {
            return Err(TrainingError::Dataset(format!("record[{idx}] text is empty")));
        }
        if record.indices.is_empty() {
            return Err(TrainingError::Dataset(format!("record[{idx}] has no candidates")));
        }
        for candidate in &record.indices {
            if let Some(bad) = candidate.iter().find(|i| **i >= record.text.len()) {
                return Err(TrainingError::Dataset(format!(
                    "record[{idx}] candidate index {bad} out of range ({} sentences)",
                    record.text.len()
                )));
            }
        }
    }
    Ok(())
}

/// Every dataset path must exist before anything is loaded.
pub fn ensure_data_paths(paths: &BTreeMap<String, PathBuf>) -> TrainingResult<()> {
    for path in paths.values() {
        if !path.exists() {
            return Err(TrainingError::MissingDataset(path.clone()));
        }
    }
    Ok(())
}

fn tokenize<'a>(sentences: impl IntoIterator<Item = &'a str>, lowercase: bool) -> Vec<String> {
    sentences
        .into_iter()
        .flat_map(str::split_whitespace)
        .map(|tok| tok.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|tok| !tok.is_empty())
        .map(|tok| if lowercase { tok.to_lowercase() } else { tok.to_string() })
        .collect()
}

struct DocumentView {
    vocab: HashSet<String>,
    len: usize,
}

impl DocumentView {
    fn features(&self, tokens: &[String]) -> Vec<f32> {
        if tokens.is_empty() || self.vocab.is_empty() {
            return vec![0.0; FEATURE_DIM];
        }
        let unique: HashSet<&String> = tokens.iter().collect();
        let overlap = unique.iter().filter(|tok| self.vocab.contains(tok.as_str())).count() as f32;
        let precision = overlap / unique.len() as f32;
        let recall = overlap / self.vocab.len() as f32;
        let length = (tokens.len() as f32 / self.len.max(1) as f32).min(1.0);
        vec![precision, recall, length]
    }
}

/// Turns jsonl splits into feature examples for the candidate scorer.
#[derive(Debug, Clone)]
pub struct MatchSumPipe {
    candidate_num: usize,
    encoder: String,
}

impl MatchSumPipe {
    #[must_use]
    pub fn new(candidate_num: usize, encoder: impl Into<String>) -> Self {
        Self { candidate_num, encoder: encoder.into() }
    }

    fn lowercase(&self) -> bool {
        self.encoder.starts_with("bert")
    }

    pub fn process(&self, records: &[SummaryRecord]) -> Vec<Example> {
        let lowercase = self.lowercase();
        records
            .iter()
            .enumerate()
            .map(|(index, record)| {
                let doc_tokens = tokenize(record.text.iter().map(String::as_str), lowercase);
                let doc = DocumentView { len: doc_tokens.len(), vocab: doc_tokens.into_iter().collect() };
                let summary = doc.features(&tokenize(record.summary.iter().map(String::as_str), lowercase));
                let candidates = (0..record.indices.len().min(self.candidate_num))
                    .map(|c| doc.features(&tokenize(record.candidate_sentences(c), lowercase)))
                    .collect();
                Example { index, summary, candidates }
            })
            .collect()
    }

    pub fn process_from_file(&self, paths: &BTreeMap<String, PathBuf>) -> TrainingResult<DataBundle> {
        let mut splits = BTreeMap::new();
        for (name, path) in paths {
            let records = read_jsonl(path)?;
            validate_records(&records)
                .map_err(|e| TrainingError::Dataset(format!("{}: {e}", path.display())))?;
            let examples = self.process(&records);
            splits.insert(name.clone(), Split { records: Arc::new(records), examples });
        }
        Ok(DataBundle { splits })
    }
}

/// Records and derived examples of one split.
#[derive(Debug, Clone)]
pub struct Split {
    pub records: Arc<Vec<SummaryRecord>>,
    pub examples: Vec<Example>,
}

#[derive(Debug, Clone, Default)]
pub struct DataBundle {
    pub splits: BTreeMap<String, Split>,
}

impl DataBundle {
    /// Moves a loaded split out of the bundle.
    pub fn take_split(&mut self, name: &str) -> TrainingResult<Split> {
        self.splits
            .remove(name)
            .ok_or_else(|| TrainingError::Dataset(format!("split `{name}` was not loaded")))
    }
}

impl fmt::Display for DataBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "In total {} datasets:", self.splits.len())?;
        for (name, split) in &self.splits {
            write!(f, "\n\t{name} has {} instances.", split.examples.len())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> SummaryRecord {
        SummaryRecord {
            text: vec![
                "The cat sat on the mat.".to_string(),
                "Stocks fell sharply today.".to_string(),
                "The mat was red.".to_string(),
            ],
            summary: vec!["A cat sat on a red mat.".to_string()],
            indices: vec![vec![0, 2], vec![1], vec![0, 1]],
            score: vec![0.6, 0.1, 0.3],
        }
    }

    #[test]
    fn test_validate_rejects_out_of_range_index() {
        let mut bad = record();
        bad.indices.push(vec![7]);
        assert!(validate_records(&[bad]).is_err());
        assert!(validate_records(&[]).is_err());
        assert!(validate_records(&[record()]).is_ok());
    }

    #[test]
    fn test_process_truncates_candidates() {
        let pipe = MatchSumPipe::new(2, "bert");
        let examples = pipe.process(&[record()]);
        assert_eq!(examples.len(), 1);
        assert_eq!(examples[0].candidates.len(), 2);
        assert_eq!(examples[0].summary.len(), FEATURE_DIM);
    }

    #[test]
    fn test_on_topic_candidate_has_higher_recall() {
        let pipe = MatchSumPipe::new(20, "bert");
        let ex = &pipe.process(&[record()])[0];
        // Candidate 0 covers two sentences, candidate 1 a single unrelated one.
        assert!(ex.candidates[0][1] > ex.candidates[1][1]);
        // Extractive candidates only use document tokens.
        assert!((ex.candidates[0][0] - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_take_split_moves_split_out() {
        let pipe = MatchSumPipe::new(2, "bert");
        let records = Arc::new(vec![record()]);
        let examples = pipe.process(&records);
        let mut bundle = DataBundle::default();
        bundle.splits.insert("val".to_string(), Split { records, examples });

        assert_eq!(bundle.take_split("val").unwrap().examples.len(), 1);
        assert!(bundle.splits.is_empty());
        assert!(matches!(bundle.take_split("val"), Err(TrainingError::Dataset(_))));
    }

    #[test]
    fn test_ensure_data_paths_reports_missing_file() {
        let mut paths = BTreeMap::new();
        paths.insert("train".to_string(), PathBuf::from("definitely/missing.jsonl"));
        match ensure_data_paths(&paths) {
            Err(TrainingError::MissingDataset(p)) => assert!(p.ends_with("missing.jsonl")),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
