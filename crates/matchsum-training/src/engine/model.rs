use crate::dataset::{Example, FEATURE_DIM};
use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A named parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
    #[serde(default = "default_requires_grad")]
    pub requires_grad: bool,
}

fn default_requires_grad() -> bool {
    true
}

impl Tensor {
    #[must_use]
    pub fn vector(data: Vec<f32>, requires_grad: bool) -> Self {
        Self { shape: vec![data.len()], data, requires_grad }
    }

    #[must_use]
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}

pub type StateDict = BTreeMap<String, Tensor>;
pub type Gradients = BTreeMap<String, Vec<f32>>;

/// What is needed to rebuild a model before loading its weights.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub encoder: String,
    pub candidate_num: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scores {
    pub summary: f32,
    pub candidates: Vec<f32>,
}

/// Loss gradient with respect to each score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreGrads {
    pub summary: f32,
    pub candidates: Vec<f32>,
}

/// A candidate re-ranking model driven by the trainer.
pub trait SummaryModel: Send + Sync {
    fn config(&self) -> &ModelConfig;

    fn state_dict(&self) -> &StateDict;

    fn state_dict_mut(&mut self) -> &mut StateDict;

    fn forward(&self, example: &Example) -> Scores;

    /// Gradients of the trainable parameters given gradients of the scores.
    fn backward(&self, example: &Example, grads: &ScoreGrads) -> Gradients;

    fn trainable_parameters(&self) -> Vec<String> {
        self.state_dict()
            .iter()
            .filter(|(_, t)| t.requires_grad)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Strict load: names and shapes must match the live model exactly.
    /// The live model's `requires_grad` flags are kept.
    fn load_state_dict(&mut self, mut state: StateDict) -> TrainingResult<()> {
        {
            let current = self.state_dict();
            for (name, tensor) in current {
                let incoming = state
                    .get_mut(name)
                    .ok_or_else(|| TrainingError::Model(format!("missing parameter `{name}`")))?;
                if incoming.shape != tensor.shape || incoming.data.len() != tensor.numel() {
                    return Err(TrainingError::Model(format!(
                        "shape mismatch for `{name}`: expected {:?}, found {:?} ({} values)",
                        tensor.shape,
                        incoming.shape,
                        incoming.data.len()
                    )));
                }
                incoming.requires_grad = tensor.requires_grad;
            }
            if let Some(extra) = state.keys().find(|name| !current.contains_key(*name)) {
                return Err(TrainingError::Model(format!("unexpected parameter `{extra}`")));
            }
        }
        *self.state_dict_mut() = state;
        Ok(())
    }
}

pub const WEIGHT: &str = "scorer.weight";
pub const FEATURE_SCALE: &str = "encoder.feature_scale";

/// Linear scorer over document/candidate similarity features.
///
/// `score = sum_k weight[k] * feature_scale[k] * feature[k]`; only the weight
/// is trainable.
#[derive(Debug, Clone)]
pub struct MatchScorer {
    config: ModelConfig,
    params: StateDict,
}

impl MatchScorer {
    #[must_use]
    pub fn new(config: ModelConfig) -> Self {
        let mut params = StateDict::new();
        params.insert(WEIGHT.to_string(), Tensor::vector(vec![1.0, 1.0, 0.1], true));
        params.insert(FEATURE_SCALE.to_string(), Tensor::vector(vec![1.0; FEATURE_DIM], false));
        Self { config, params }
    }

    pub fn from_state(config: ModelConfig, state: StateDict) -> TrainingResult<Self> {
        let mut model = Self::new(config);
        model.load_state_dict(state)?;
        Ok(model)
    }

    fn param(&self, name: &str) -> &[f32] {
        self.params.get(name).map(|t| t.data.as_slice()).unwrap_or_default()
    }

    fn score(&self, features: &[f32]) -> f32 {
        self.param(WEIGHT)
            .iter()
            .zip(self.param(FEATURE_SCALE))
            .zip(features)
            .map(|((w, s), f)| w * s * f)
            .sum()
    }
}

impl SummaryModel for MatchScorer {
    fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn state_dict(&self) -> &StateDict {
        &self.params
    }

    fn state_dict_mut(&mut self) -> &mut StateDict {
        &mut self.params
    }

    fn forward(&self, example: &Example) -> Scores {
        Scores {
            summary: self.score(&example.summary),
            candidates: example.candidates.iter().map(|c| self.score(c)).collect(),
        }
    }

    fn backward(&self, example: &Example, grads: &ScoreGrads) -> Gradients {
        let scale = self.param(FEATURE_SCALE);
        let mut weight_grad = vec![0.0f32; scale.len()];
        let sources = std::iter::once((grads.summary, &example.summary))
            .chain(grads.candidates.iter().copied().zip(&example.candidates));
        for (g, features) in sources {
            if g == 0.0 {
                continue;
            }
            for ((out, s), f) in weight_grad.iter_mut().zip(scale).zip(features) {
                *out += g * s * f;
            }
        }
        let mut out = Gradients::new();
        out.insert(WEIGHT.to_string(), weight_grad);
        out
    }
}
