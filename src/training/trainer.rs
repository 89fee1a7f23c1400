//! Training orchestrator
//!
//! [`Trainer`] owns a run from start to finish: it validates the resume
//! request, restores weights, evaluates a baseline, drives the numbered
//! epochs through the [`EpochRunner`] and persists everything a run produces.
//!
//! Each epoch runs, in order: the training pass (skipped for the baseline),
//! evaluation on the training split, evaluation on the held-out split, best
//! tracking with best-weight saves, metric emission, the periodic snapshot
//! and finally the results row. A row therefore only exists for an epoch
//! whose artifacts are already on disk.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use candle_core::Device;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::model::{FeedForwardLm, SequenceModel};
use crate::training::checkpoints::{
    BestRecord, BestTracker, CheckpointManager, Improvement, ResultRow, ResultsLog,
};
use crate::training::config::TrainingConfig;
use crate::training::data::{open_splits, DataLoader, DataLoaderConfig};
use crate::training::loss::{build_train_loss, CrossEntropyLoss, LossFunction};
use crate::training::metrics::{names, JsonlScalarSink, MetricsSink, NoopSink};
use crate::training::optimizers::{create_optimizer, create_scheduler, initial_learning_rate, Optimizer, Scheduler};
use crate::training::runner::{EpochRunner, EvalResult};
use crate::training::state::{Epoch, RunState, TrainingPhase};
use crate::utils::load_var_map;

/// Training events for monitoring
#[derive(Debug, Clone)]
pub enum TrainingEvent {
    /// An epoch is about to run
    EpochStarted {
        /// Epoch
        epoch: Epoch,
    },
    /// Progress inside a training pass
    BatchProgress {
        /// Epoch
        epoch: Epoch,
        /// 1-based batch index
        batch: usize,
        /// Batches in the pass
        total_batches: usize,
        /// Loss of this batch
        loss: f64,
        /// Learning rate after the update
        learning_rate: f64,
        /// Time spent on this batch
        elapsed: Duration,
    },
    /// One or both best records were broken
    NewBest {
        /// Epoch
        epoch: Epoch,
        /// Records broken
        improvement: Improvement,
    },
    /// A numbered snapshot was written
    SnapshotSaved {
        /// Epoch
        epoch: Epoch,
        /// Snapshot file
        path: PathBuf,
    },
    /// An epoch finished and its row was appended
    EpochCompleted {
        /// Epoch
        epoch: Epoch,
        /// Row written to the results log
        row: ResultRow,
    },
    /// Every configured epoch has run
    TrainingCompleted {
        /// Training batches processed over the lifetime of the run
        total_steps: usize,
    },
}

/// Training result information
#[derive(Debug, Clone, Serialize)]
pub struct TrainingResult {
    /// Rows appended by this process, in order
    pub rows: Vec<ResultRow>,

    /// Best held-out accuracy seen by this process
    pub best_accuracy: BestRecord,

    /// Best held-out loss seen by this process
    pub best_loss: BestRecord,

    /// Numbered snapshots written by this process
    pub snapshots: Vec<PathBuf>,

    /// Training state at completion
    pub final_state: RunState,

    /// Wall time spent in [`Trainer::train`]
    pub training_duration: Duration,
}

/// Drives a complete training run
pub struct Trainer {
    /// Training configuration
    config: TrainingConfig,

    /// Model being trained
    model: Box<dyn SequenceModel>,

    /// Training split
    train_loader: DataLoader,

    /// Held-out split
    eval_loader: DataLoader,

    /// Objective of the training pass (possibly smoothed)
    train_loss: Arc<dyn LossFunction>,

    /// Plain objective of the held-out evaluation
    eval_loss: Arc<dyn LossFunction>,

    /// Optimizer
    optimizer: Box<dyn Optimizer>,

    /// Learning rate scheduler, absent with a constant learning rate
    scheduler: Option<Box<dyn Scheduler>>,

    /// Per-epoch passes
    runner: EpochRunner,

    /// Run counters
    state: RunState,

    /// Best held-out records
    tracker: BestTracker,

    /// Output layout and weight persistence
    checkpoints: CheckpointManager,

    /// Results CSV
    results: ResultsLog,

    /// Scalar side channel
    sink: Box<dyn MetricsSink>,

    /// Event channel for monitoring
    event_tx: Option<mpsc::UnboundedSender<TrainingEvent>>,
}

impl Trainer {
    /// Create a trainer for `model`
    ///
    /// Configuration and resume problems are reported before anything is
    /// written to the output directory. When resuming, the weights are loaded
    /// into the model here and the step counter is re-derived from the
    /// completed epochs.
    pub fn new(
        config: TrainingConfig,
        model: Box<dyn SequenceModel>,
        train_loader: DataLoader,
        eval_loader: DataLoader,
    ) -> Result<Self> {
        config.validate()?;

        let batches_per_epoch = train_loader.num_batches();
        let state = match config.checkpointing.resume_point()? {
            Some(resume) => {
                if !resume.weights.is_file() {
                    return Err(Error::config(format!(
                        "continue_weights {} does not exist",
                        resume.weights.display()
                    )));
                }
                load_var_map(model.var_map(), &resume.weights)?;
                info!(
                    "Continuing from epoch {} with weights {}",
                    resume.epoch,
                    resume.weights.display()
                );
                RunState::resume_from(&resume, batches_per_epoch)
            }
            None => RunState::fresh(batches_per_epoch),
        };

        let scheduler = create_scheduler(&config.optimizer, config.model.d_model, state.global_step);
        let initial_lr = initial_learning_rate(&config.optimizer, scheduler.as_deref());
        let optimizer = create_optimizer(&config.optimizer, model.var_map(), initial_lr)?;

        let pad_token = config.model.pad_token;
        let train_loss = build_train_loss(pad_token, config.training.ce_smoothing);
        let eval_loss: Arc<dyn LossFunction> = Arc::new(CrossEntropyLoss::new(pad_token));

        let checkpoints = CheckpointManager::new(&config.checkpointing.output_dir)?;
        config.save(checkpoints.params_file())?;
        let results = ResultsLog::open(checkpoints.results_file())?;

        let sink: Box<dyn MetricsSink> = if config.logging.metrics_sink {
            match JsonlScalarSink::create(checkpoints.metrics_dir()) {
                Ok(sink) => Box::new(sink),
                Err(e) => {
                    warn!("Metrics sink unavailable, continuing without it: {}", e);
                    Box::new(NoopSink)
                }
            }
        } else {
            Box::new(NoopSink)
        };

        debug!(
            "Trainer ready: {} parameters, {} batches per epoch, initial lr {:.8}, train loss {}",
            model.num_parameters(),
            batches_per_epoch,
            initial_lr,
            train_loss.name()
        );

        Ok(Self {
            runner: EpochRunner::new(config.training.print_modulus, pad_token),
            config,
            model,
            train_loader,
            eval_loader,
            train_loss,
            eval_loss,
            optimizer,
            scheduler,
            state,
            tracker: BestTracker::new(),
            checkpoints,
            results,
            sink,
            event_tx: None,
        })
    }

    /// Build the default model and the train/test loaders from the configuration
    pub fn from_config(config: TrainingConfig, device: Device) -> Result<Self> {
        config.validate()?;

        let splits = open_splits(&config.data.input_dir, &config)?;
        let train_loader = DataLoader::new(
            splits.train,
            DataLoaderConfig {
                batch_size: config.training.batch_size,
                shuffle: true,
                prefetch: config.training.n_workers,
                seed: config.training.seed,
            },
            device.clone(),
        )?;
        let eval_loader = DataLoader::new(
            splits.test,
            DataLoaderConfig {
                batch_size: config.training.batch_size,
                shuffle: false,
                prefetch: config.training.n_workers,
                seed: config.training.seed.wrapping_add(1),
            },
            device.clone(),
        )?;

        let model = FeedForwardLm::new(&config.model, &device)?;
        info!("Model has {} parameters on {:?}", model.num_parameters(), device);

        Self::new(config, Box::new(model), train_loader, eval_loader)
    }

    /// Set up event monitoring
    pub fn with_event_monitoring(mut self, tx: mpsc::UnboundedSender<TrainingEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Replace the metrics sink
    pub fn with_metrics_sink(mut self, sink: Box<dyn MetricsSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Get current training state
    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Best held-out records so far
    pub fn tracker(&self) -> &BestTracker {
        &self.tracker
    }

    /// Output layout of the run
    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    /// Current learning rate of the optimizer
    pub fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    /// Model being trained
    pub fn model(&self) -> &dyn SequenceModel {
        self.model.as_ref()
    }

    /// Run the baseline and every remaining epoch
    pub fn train(&mut self) -> Result<TrainingResult> {
        let started = Instant::now();
        let last_epoch = self.config.training.epochs;
        let mut rows = Vec::new();
        let mut snapshots = Vec::new();

        info!(
            "Starting training: epochs {}..={}, {} batches per epoch, output {}",
            self.state.first_training_epoch().number(),
            last_epoch,
            self.state.batches_per_epoch,
            self.checkpoints.output_dir().display()
        );

        if !self.state.is_resumed() {
            self.state.phase = TrainingPhase::Baseline;
            let (row, snapshot) = self.run_epoch(Epoch::Baseline)?;
            rows.push(row);
            snapshots.extend(snapshot);
        } else if self.config.training.baseline_on_resume {
            self.state.phase = TrainingPhase::Baseline;
            let eval = self.runner.evaluate(self.model.as_ref(), &mut self.eval_loader, self.eval_loss.as_ref())?;
            info!(
                "Loaded weights baseline | eval loss: {:.6} | eval accuracy: {:.6}",
                eval.loss, eval.accuracy
            );
        }

        if self.state.start_epoch >= last_epoch {
            warn!(
                "Resumed at epoch {} but training is configured for {} epochs, nothing to do",
                self.state.start_epoch, last_epoch
            );
        }

        for number in self.state.first_training_epoch().number()..=last_epoch {
            self.state.phase = TrainingPhase::Running(number);
            let (row, snapshot) = self.run_epoch(Epoch::Numbered(number))?;
            rows.push(row);
            snapshots.extend(snapshot);
        }

        self.state.phase = TrainingPhase::Done;
        if let Err(e) = self.sink.flush() {
            warn!("Failed to flush metrics sink {}: {}", self.sink.name(), e);
        }

        let training_duration = started.elapsed();
        info!(
            "Training completed in {:?} after {} steps",
            training_duration, self.state.global_step
        );
        self.send_event(TrainingEvent::TrainingCompleted {
            total_steps: self.state.global_step,
        });

        Ok(TrainingResult {
            rows,
            best_accuracy: self.tracker.best_accuracy(),
            best_loss: self.tracker.best_loss(),
            snapshots,
            final_state: self.state.clone(),
            training_duration,
        })
    }

    /// Run one epoch and persist its artifacts
    fn run_epoch(&mut self, epoch: Epoch) -> Result<(ResultRow, Option<PathBuf>)> {
        self.send_event(TrainingEvent::EpochStarted { epoch });
        let runner = self.runner;

        if !epoch.is_baseline() {
            info!("=========================");
            info!("NEW EPOCH: {}", epoch);
            info!("=========================");

            runner.train_epoch(
                epoch,
                self.model.as_ref(),
                &mut self.train_loader,
                self.train_loss.as_ref(),
                self.optimizer.as_mut(),
                &mut self.scheduler,
                &mut self.state,
                self.event_tx.as_ref(),
            )?;
        } else {
            info!("Evaluating baseline before any update");
        }

        let train = runner.evaluate(self.model.as_ref(), &mut self.train_loader, self.train_loss.as_ref())?;
        let eval = runner.evaluate(self.model.as_ref(), &mut self.eval_loader, self.eval_loss.as_ref())?;
        let learning_rate = self.optimizer.learning_rate();

        let improvement = self.tracker.observe(epoch, eval.loss, eval.accuracy);
        if improvement.any() {
            self.checkpoints.save_best(self.model.var_map(), improvement)?;
            self.checkpoints.write_summary(&self.tracker)?;
            self.send_event(TrainingEvent::NewBest { epoch, improvement });
        }

        let row = ResultRow {
            epoch: epoch.number(),
            learning_rate,
            train_loss: train.loss,
            train_accuracy: train.accuracy,
            eval_loss: eval.loss,
            eval_accuracy: eval.accuracy,
        };
        log_epoch(epoch, learning_rate, train, eval);
        self.emit_scalars(&row);

        let snapshot = match epoch {
            Epoch::Numbered(number) if number % self.config.training.weight_modulus == 0 => {
                let path = self.checkpoints.save_snapshot(self.model.var_map(), epoch)?;
                self.send_event(TrainingEvent::SnapshotSaved {
                    epoch,
                    path: path.clone(),
                });
                Some(path)
            }
            _ => None,
        };

        self.results.append(&row)?;
        self.state.completed = Some(epoch);
        self.send_event(TrainingEvent::EpochCompleted { epoch, row: row.clone() });

        Ok((row, snapshot))
    }

    fn emit_scalars(&mut self, row: &ResultRow) {
        let scalars = [
            (names::TRAIN_LOSS, row.train_loss),
            (names::EVAL_LOSS, row.eval_loss),
            (names::TRAIN_ACCURACY, row.train_accuracy),
            (names::EVAL_ACCURACY, row.eval_accuracy),
            (names::LEARN_RATE, row.learning_rate),
        ];

        for (name, value) in scalars {
            if let Err(e) = self.sink.add_scalar(name, value, row.epoch) {
                warn!("Metrics sink {} rejected {}: {}", self.sink.name(), name, e);
            }
        }
    }

    /// Send training event
    fn send_event(&self, event: TrainingEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }
}

fn log_epoch(epoch: Epoch, learning_rate: f64, train: EvalResult, eval: EvalResult) {
    info!("=========================");
    info!("Epoch: {}", epoch.number());
    info!("Avg train loss: {:.6}", train.loss);
    info!("Avg train acc: {:.6}", train.accuracy);
    info!("Avg eval loss: {:.6}", eval.loss);
    info!("Avg eval acc: {:.6}", eval.accuracy);
    info!("Learn rate: {:.8}", learning_rate);
    info!("=========================");
}
