//! Training infrastructure
//!
//! # Main Components
//!
//! - **Configuration**: immutable run description loaded from YAML or JSON
//! - **Loss / Metrics**: pad-aware cross-entropy, label smoothing and accuracy
//! - **Optimizers**: Adam with a warmup / inverse square root schedule
//! - **Runner**: training and evaluation passes of one epoch
//! - **Checkpoints**: best tracking, weight snapshots and the results log
//! - **Trainer**: the epoch state machine tying everything together
//! - **Data**: token datasets, batch loading and dataset preprocessing
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use maestro_train::training::{Trainer, TrainingConfig};
//! use candle_core::Device;
//!
//! let mut config = TrainingConfig::default();
//! config.training.epochs = 10;
//! config.training.ce_smoothing = Some(0.1);
//!
//! let mut trainer = Trainer::from_config(config, Device::Cpu)?;
//! let result = trainer.train()?;
//! ```

pub mod checkpoints;
pub mod config;
pub mod data;
pub mod loss;
pub mod metrics;
pub mod optimizers;
pub mod runner;
pub mod state;
pub mod trainer;

// Tests module
#[cfg(test)]
pub mod tests;

// Configuration re-exports
pub use config::{
    CheckpointingConfig, DataConfig, LearningRateMode, LoggingConfig, ModelConfig, OptimizerConfig,
    ResumePoint, RuntimeConfig, TrainingConfig, TrainingParams, TOKEN_END, TOKEN_PAD, VOCAB_SIZE,
};

// Trainer re-exports
pub use runner::{EpochRunner, EvalResult};
pub use state::{Epoch, RunState, TrainingPhase};
pub use trainer::{Trainer, TrainingEvent, TrainingResult};

// Data re-exports
pub use data::{Batch, DataLoader, DataLoaderConfig, Dataset, InMemoryDataset, TokenSequenceDataset};

// Checkpoint re-exports
pub use checkpoints::{BestRecord, BestTracker, CheckpointManager, Improvement, ResultRow, ResultsLog};

// Metrics re-exports
pub use metrics::{accuracy, JsonlScalarSink, MetricsSink, NoopSink};

// Optimizer re-exports
pub use optimizers::{inverse_sqrt_lr, AdamOptimizer, InverseSqrtScheduler, Optimizer, Scheduler};

// Loss re-exports
pub use loss::{build_train_loss, CrossEntropyLoss, LossFunction, SmoothCrossEntropyLoss};
