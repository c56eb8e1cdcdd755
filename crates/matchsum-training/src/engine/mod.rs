//! Minimal local training engine: a linear candidate scorer, Adam, the
//! MatchSum ranking loss and a callback-driven trainer loop.

pub mod callback;
pub mod loss;
pub mod metric;
pub mod model;
pub mod optim;
pub mod state;
pub mod tester;
pub mod trainer;

pub use callback::{warmup_lr, CallbackManager, TrainContext, TrainerCallback, WarmupCallback};
pub use loss::MarginRankingLoss;
pub use metric::{Metric, RougeOutputMetric, ValidMetric, ROUGE_KEY};
pub use model::{Gradients, MatchScorer, ModelConfig, Scores, StateDict, SummaryModel, Tensor};
pub use optim::{Adam, Optimizer};
pub use state::{find_indicator, BestDev, EvalResults, MetricValues, RunState};
pub use tester::{evaluate, Tester};
pub use trainer::{TrainOutcome, Trainer, TrainerOptions};
