//! Training-loop hooks.
//!
//! Callbacks run on the training-loop thread, in registration order. Every
//! hook may fail; the trainer aborts the run on the first error.

use crate::engine::model::SummaryModel;
use crate::engine::optim::Optimizer;
use crate::engine::state::{EvalResults, RunState};
use crate::error::TrainingResult;
use tracing::{debug, info};

/// Mutable view of the trainer handed to each hook.
pub struct TrainContext<'a> {
    pub model: &'a mut dyn SummaryModel,
    pub optimizer: &'a mut dyn Optimizer,
    pub state: &'a mut RunState,
}

pub trait TrainerCallback: Send {
    fn name(&self) -> &str;

    fn on_train_begin(&mut self, _ctx: &mut TrainContext<'_>) -> TrainingResult<()> {
        Ok(())
    }

    /// Called after every batch, once the step counter has advanced.
    fn on_step_end(&mut self, _ctx: &mut TrainContext<'_>) -> TrainingResult<()> {
        Ok(())
    }

    fn on_valid_end(
        &mut self,
        _ctx: &mut TrainContext<'_>,
        _results: &EvalResults,
        _is_better: bool,
    ) -> TrainingResult<()> {
        Ok(())
    }

    fn on_epoch_end(&mut self, _ctx: &mut TrainContext<'_>) -> TrainingResult<()> {
        Ok(())
    }

    /// Only reached when the run completes without error.
    fn on_train_end(&mut self, _ctx: &mut TrainContext<'_>) -> TrainingResult<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct CallbackManager {
    callbacks: Vec<Box<dyn TrainerCallback>>,
}

impl CallbackManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, callback: impl TrainerCallback + 'static) {
        debug!(callback = callback.name(), "Registered callback");
        self.callbacks.push(Box::new(callback));
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.callbacks.iter().map(|c| c.name()).collect()
    }

    pub fn on_train_begin(&mut self, ctx: &mut TrainContext<'_>) -> TrainingResult<()> {
        self.callbacks.iter_mut().try_for_each(|c| c.on_train_begin(ctx))
    }

    pub fn on_step_end(&mut self, ctx: &mut TrainContext<'_>) -> TrainingResult<()> {
        self.callbacks.iter_mut().try_for_each(|c| c.on_step_end(ctx))
    }

    pub fn on_valid_end(
        &mut self,
        ctx: &mut TrainContext<'_>,
        results: &EvalResults,
        is_better: bool,
    ) -> TrainingResult<()> {
        self.callbacks
            .iter_mut()
            .try_for_each(|c| c.on_valid_end(ctx, results, is_better))
    }

    pub fn on_epoch_end(&mut self, ctx: &mut TrainContext<'_>) -> TrainingResult<()> {
        self.callbacks.iter_mut().try_for_each(|c| c.on_epoch_end(ctx))
    }

    pub fn on_train_end(&mut self, ctx: &mut TrainContext<'_>) -> TrainingResult<()> {
        self.callbacks.iter_mut().try_for_each(|c| c.on_train_end(ctx))
    }
}

/// Inverse square-root schedule with linear warm-up.
///
/// `max_lr * 100 * min(real_step^-0.5, real_step * warmup_steps^-1.5)`
#[must_use]
pub fn warmup_lr(max_lr: f64, warmup_steps: u64, real_step: u64) -> f64 {
    if real_step == 0 {
        return 0.0;
    }
    let step = real_step as f64;
    let warmup = (warmup_steps.max(1)) as f64;
    max_lr * 100.0 * step.powf(-0.5).min(step * warmup.powf(-1.5))
}

/// Sets the learning rate after every optimizer update.
///
/// The schedule position is derived from the step counter, so a resumed run
/// continues where the snapshot left off.
#[derive(Debug, Clone)]
pub struct WarmupCallback {
    max_lr: f64,
    warmup_steps: u64,
}

impl WarmupCallback {
    #[must_use]
    pub fn new(max_lr: f64, warmup_steps: u64) -> Self {
        Self { max_lr, warmup_steps }
    }
}

impl TrainerCallback for WarmupCallback {
    fn name(&self) -> &str {
        "WarmupCallback"
    }

    fn on_step_end(&mut self, ctx: &mut TrainContext<'_>) -> TrainingResult<()> {
        let update_every = ctx.state.update_every.max(1);
        if ctx.state.step == 0 || ctx.state.step % update_every != 0 {
            return Ok(());
        }
        let real_step = ctx.state.step / update_every;
        let lr = warmup_lr(self.max_lr, self.warmup_steps, real_step);
        ctx.optimizer.set_lr(lr);
        if real_step % 1000 == 0 {
            info!(step = real_step, lr, "Learning rate updated");
        }
        Ok(())
    }

    fn on_epoch_end(&mut self, ctx: &mut TrainContext<'_>) -> TrainingResult<()> {
        info!(epoch = ctx.state.epoch, step = ctx.state.step, "Epoch done");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::model::{MatchScorer, ModelConfig};
    use crate::engine::optim::Adam;

    #[test]
    fn test_warmup_schedule_peaks_at_warmup_steps() {
        assert!(warmup_lr(2e-5, 100, 0).abs() < f64::EPSILON);
        let rising = warmup_lr(2e-5, 100, 50);
        let peak = warmup_lr(2e-5, 100, 100);
        let decayed = warmup_lr(2e-5, 100, 400);
        assert!(rising < peak);
        assert!(decayed < peak);
        // At the peak both branches agree: max_lr * 100 / sqrt(warmup).
        assert!((peak - 2e-5 * 100.0 / 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_warmup_callback_only_acts_on_update_steps() {
        let mut model = MatchScorer::new(ModelConfig { encoder: "bert".to_string(), candidate_num: 2 });
        let mut optimizer = Adam::new(0.0, model.trainable_parameters());
        let mut state = RunState::new(1, 2, "ROUGE");
        let mut callback = WarmupCallback::new(1e-3, 10);

        state.step = 1;
        callback
            .on_step_end(&mut TrainContext { model: &mut model, optimizer: &mut optimizer, state: &mut state })
            .unwrap();
        assert!(optimizer.lr().abs() < f64::EPSILON);

        state.step = 4;
        callback
            .on_step_end(&mut TrainContext { model: &mut model, optimizer: &mut optimizer, state: &mut state })
            .unwrap();
        assert!((optimizer.lr() - warmup_lr(1e-3, 10, 2)).abs() < 1e-15);
    }

    struct Recorder {
        seen: std::sync::Arc<std::sync::Mutex<Vec<String>>>,
        label: &'static str,
    }

    impl TrainerCallback for Recorder {
        fn name(&self) -> &str {
            self.label
        }

        fn on_epoch_end(&mut self, _ctx: &mut TrainContext<'_>) -> TrainingResult<()> {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(self.label.to_string());
            }
            Ok(())
        }
    }

    #[test]
    fn test_manager_dispatches_in_order() {
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut manager = CallbackManager::new();
        manager.add(Recorder { seen: seen.clone(), label: "first" });
        manager.add(Recorder { seen: seen.clone(), label: "second" });
        assert_eq!(manager.names(), vec!["first", "second"]);

        let mut model = MatchScorer::new(ModelConfig { encoder: "bert".to_string(), candidate_num: 2 });
        let mut optimizer = Adam::new(0.0, model.trainable_parameters());
        let mut state = RunState::new(1, 1, "ROUGE");
        manager
            .on_epoch_end(&mut TrainContext { model: &mut model, optimizer: &mut optimizer, state: &mut state })
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["first".to_string(), "second".to_string()]);
    }
}
