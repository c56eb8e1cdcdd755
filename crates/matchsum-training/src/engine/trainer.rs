use crate::dataset::Example;
use crate::engine::callback::{CallbackManager, TrainContext, TrainerCallback};
use crate::engine::loss::MarginRankingLoss;
use crate::engine::metric::Metric;
use crate::engine::model::{Gradients, SummaryModel};
use crate::engine::optim::Optimizer;
use crate::engine::state::{find_indicator, BestDev, RunState};
use crate::engine::tester::evaluate;
use crate::error::{TrainingError, TrainingResult};
use crate::progress::{ProgressEvent, ProgressSink};
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct TrainerOptions {
    pub batch_size: usize,
    /// Batches accumulated per optimizer update.
    pub update_every: u64,
    pub n_epochs: u32,
    /// Emit a progress step event every N batches (0 disables).
    pub print_every: u64,
    /// Validate every N batches; 0 validates at the end of each epoch.
    pub validate_every: u64,
    pub metric_key: String,
    /// Logical devices a batch is sharded across.
    pub devices: Vec<usize>,
}

/// Result of a completed run.
pub struct TrainOutcome {
    pub best_dev: Option<BestDev>,
    pub step: u64,
    pub epoch: u32,
    pub model: Box<dyn SummaryModel>,
}

/// State the callbacks are allowed to touch.
struct Session {
    model: Box<dyn SummaryModel>,
    optimizer: Box<dyn Optimizer>,
    state: RunState,
}

impl Session {
    fn ctx(&mut self) -> TrainContext<'_> {
        TrainContext { model: self.model.as_mut(), optimizer: self.optimizer.as_mut(), state: &mut self.state }
    }
}

pub struct Trainer {
    train: Vec<Example>,
    dev: Vec<Example>,
    model: Box<dyn SummaryModel>,
    optimizer: Box<dyn Optimizer>,
    loss: MarginRankingLoss,
    metrics: Vec<Box<dyn Metric>>,
    callbacks: CallbackManager,
    options: TrainerOptions,
}

impl Trainer {
    pub fn new(
        train: Vec<Example>,
        dev: Vec<Example>,
        model: Box<dyn SummaryModel>,
        optimizer: Box<dyn Optimizer>,
        loss: MarginRankingLoss,
        options: TrainerOptions,
    ) -> TrainingResult<Self> {
        if options.devices.is_empty() {
            return Err(TrainingError::InvalidSpec("at least one device is required".to_string()));
        }
        if options.batch_size == 0 {
            return Err(TrainingError::InvalidSpec("batch_size must be >= 1".to_string()));
        }
        if options.batch_size % options.devices.len() != 0 {
            return Err(TrainingError::InvalidSpec(format!(
                "batch_size {} is not divisible by the number of devices ({})",
                options.batch_size,
                options.devices.len()
            )));
        }
        if train.is_empty() {
            return Err(TrainingError::Dataset("training split is empty".to_string()));
        }
        Ok(Self {
            train,
            dev,
            model,
            optimizer,
            loss,
            metrics: Vec::new(),
            callbacks: CallbackManager::new(),
            options,
        })
    }

    #[must_use]
    pub fn with_metric(mut self, metric: impl Metric + 'static) -> Self {
        self.metrics.push(Box::new(metric));
        self
    }

    #[must_use]
    pub fn with_callback(mut self, callback: impl TrainerCallback + 'static) -> Self {
        self.callbacks.add(callback);
        self
    }

    /// Run from the (possibly restored) epoch through `n_epochs`.
    ///
    /// `on_train_end` only fires when every epoch succeeds.
    pub fn train(self, progress: &dyn ProgressSink) -> TrainingResult<TrainOutcome> {
        let Self { train, dev, model, optimizer, loss, mut metrics, mut callbacks, options } = self;
        let mut session = Session {
            model,
            optimizer,
            state: RunState::new(options.n_epochs, options.update_every, options.metric_key.clone()),
        };
        let update_every = session.state.update_every;
        let started = Instant::now();

        callbacks.on_train_begin(&mut session.ctx())?;
        let start_epoch = session.state.epoch;
        if start_epoch > options.n_epochs {
            info!(epoch = start_epoch, n_epochs = options.n_epochs, "Nothing left to train");
        } else {
            info!(
                start_epoch,
                n_epochs = options.n_epochs,
                step = session.state.step,
                devices = ?options.devices,
                callbacks = ?callbacks.names(),
                "Training started"
            );
        }

        let mut pending = Gradients::new();
        for epoch in start_epoch..=options.n_epochs {
            session.state.epoch = epoch;
            for batch in train.chunks(options.batch_size) {
                let (batch_loss, grads) =
                    forward_backward(session.model.as_ref(), &loss, batch, &options.devices);
                let scale = 1.0 / (batch.len() as f32 * update_every as f32);
                for (name, grad) in grads {
                    let slot = pending.entry(name).or_insert_with(|| vec![0.0; grad.len()]);
                    for (acc, g) in slot.iter_mut().zip(grad) {
                        *acc += g * scale;
                    }
                }

                session.state.step += 1;
                let step = session.state.step;
                let mean_loss = batch_loss / batch.len() as f32;
                session.state.last_loss = Some(mean_loss);

                if step % update_every == 0 {
                    session.optimizer.step(session.model.state_dict_mut(), &pending)?;
                    pending.clear();
                }
                if options.print_every > 0 && step % options.print_every == 0 {
                    debug!(epoch, step, loss = mean_loss, "Batch done");
                    progress.on_event(ProgressEvent::Step { epoch, step, loss: mean_loss });
                }

                callbacks.on_step_end(&mut session.ctx())?;

                if options.validate_every > 0 && step % options.validate_every == 0 {
                    validate(&mut session, &dev, &mut metrics, &mut callbacks, progress)?;
                }
            }
            if options.validate_every == 0 {
                validate(&mut session, &dev, &mut metrics, &mut callbacks, progress)?;
            }

            callbacks.on_epoch_end(&mut session.ctx())?;
            progress.on_event(ProgressEvent::EpochEnd { epoch });
        }

        callbacks.on_train_end(&mut session.ctx())?;

        let Session { model, state, .. } = session;
        info!(
            step = state.step,
            elapsed_ms = started.elapsed().as_millis(),
            best_epoch = state.best_dev.as_ref().map(|b| b.epoch),
            best_step = state.best_dev.as_ref().map(|b| b.step),
            "Training finished"
        );
        progress.on_event(ProgressEvent::Finished { step: state.step });

        Ok(TrainOutcome { best_dev: state.best_dev, step: state.step, epoch: state.epoch, model })
    }
}

fn shard_loss(model: &dyn SummaryModel, loss: &MarginRankingLoss, shard: &[Example]) -> (f32, Gradients) {
    let mut total = 0.0f32;
    let mut grads = Gradients::new();
    for example in shard {
        let scores = model.forward(example);
        let (value, score_grads) = loss.compute(&scores);
        total += value;
        for (name, grad) in model.backward(example, &score_grads) {
            let slot = grads.entry(name).or_insert_with(|| vec![0.0; grad.len()]);
            for (acc, g) in slot.iter_mut().zip(grad) {
                *acc += g;
            }
        }
    }
    (total, grads)
}

/// Summed loss and gradients of a batch, split evenly across devices.
fn forward_backward(
    model: &dyn SummaryModel,
    loss: &MarginRankingLoss,
    batch: &[Example],
    devices: &[usize],
) -> (f32, Gradients) {
    if devices.len() <= 1 {
        return shard_loss(model, loss, batch);
    }
    let per_device = batch.len().div_ceil(devices.len()).max(1);
    let partials: Vec<(f32, Gradients)> = std::thread::scope(|scope| {
        let handles: Vec<_> = batch
            .chunks(per_device)
            .map(|shard| scope.spawn(move || shard_loss(model, loss, shard)))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
            .collect()
    });

    let mut total = 0.0f32;
    let mut grads = Gradients::new();
    for (value, shard_grads) in partials {
        total += value;
        for (name, grad) in shard_grads {
            let slot = grads.entry(name).or_insert_with(|| vec![0.0; grad.len()]);
            for (acc, g) in slot.iter_mut().zip(grad) {
                *acc += g;
            }
        }
    }
    (total, grads)
}

fn validate(
    session: &mut Session,
    dev: &[Example],
    metrics: &mut [Box<dyn Metric>],
    callbacks: &mut CallbackManager,
    progress: &dyn ProgressSink,
) -> TrainingResult<()> {
    if metrics.is_empty() || dev.is_empty() {
        return Ok(());
    }
    let results = evaluate(session.model.as_ref(), dev, metrics)?;
    let state = &mut session.state;
    let indicator = find_indicator(&results, &state.metric_key);

    let is_better = match (indicator, &state.best_dev) {
        (Some(value), Some(best)) => value > best.indicator,
        (Some(_), None) => true,
        (None, _) => {
            warn!(metric_key = %state.metric_key, "Validation results do not contain the metric key");
            false
        }
    };
    if let (true, Some(value)) = (is_better, indicator) {
        state.best_dev = Some(BestDev { epoch: state.epoch, step: state.step, perf: results.clone(), indicator: value });
    }

    info!(epoch = state.epoch, step = state.step, ?indicator, is_better, "Validation done");
    progress.on_event(ProgressEvent::Validation { epoch: state.epoch, step: state.step, indicator, is_better });

    callbacks.on_valid_end(&mut session.ctx(), &results, is_better)
}
