//! Training configuration system
//!
//! A run is described once by an immutable [`TrainingConfig`] that is passed to
//! the trainer. It can be loaded from YAML or JSON, and every section has a
//! default matching the reference piano-performance setup.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default token reserved for padding
pub const TOKEN_PAD: u32 = 389;

/// Default token appended after the last event of a short piece
pub const TOKEN_END: u32 = 388;

/// Default vocabulary size (note on/off, velocity, time shift, end, pad)
pub const VOCAB_SIZE: usize = 390;

/// Main training configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TrainingConfig {
    /// Model hyperparameters
    pub model: ModelConfig,

    /// Optimization configuration
    pub optimizer: OptimizerConfig,

    /// Training loop parameters
    pub training: TrainingParams,

    /// Data configuration
    pub data: DataConfig,

    /// Checkpointing and resume configuration
    pub checkpointing: CheckpointingConfig,

    /// Metrics output configuration
    pub logging: LoggingConfig,

    /// Runtime configuration
    pub runtime: RuntimeConfig,
}

/// Model hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Model width, also keys the learning rate schedule
    pub d_model: usize,

    /// Number of hidden blocks
    pub n_layers: usize,

    /// Width of the feed-forward layers
    pub dim_feedforward: usize,

    /// Dropout rate used during training passes
    pub dropout: f64,

    /// Tokens per training window
    pub max_sequence: usize,

    /// Vocabulary size
    pub vocab_size: usize,

    /// Pad sentinel, excluded from loss and accuracy
    pub pad_token: u32,

    /// End-of-sequence token
    pub end_token: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            d_model: 512,
            n_layers: 6,
            dim_feedforward: 1024,
            dropout: 0.1,
            max_sequence: 2048,
            vocab_size: VOCAB_SIZE,
            pad_token: TOKEN_PAD,
            end_token: TOKEN_END,
        }
    }
}

/// Optimizer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Constant learning rate. `None` selects the warmup schedule.
    pub learning_rate: Option<f64>,

    /// Warmup steps for the scheduled learning rate
    pub warmup_steps: usize,

    /// Base multiplier applied to the scheduled learning rate
    pub lr_scale: f64,

    /// Adam beta1
    pub beta1: f64,

    /// Adam beta2
    pub beta2: f64,

    /// Adam epsilon
    pub epsilon: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            learning_rate: None,
            warmup_steps: 4000,
            lr_scale: 1.0,
            beta1: 0.9,
            beta2: 0.98,
            epsilon: 1e-9,
        }
    }
}

/// How the learning rate evolves over a run
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LearningRateMode {
    /// Warmup followed by inverse square root decay
    Scheduled {
        /// Warmup steps
        warmup_steps: usize,
    },
    /// Fixed for the whole run
    Constant(f64),
}

impl OptimizerConfig {
    /// Resolve the learning rate mode for this run
    pub fn lr_mode(&self) -> LearningRateMode {
        match self.learning_rate {
            Some(lr) => LearningRateMode::Constant(lr),
            None => LearningRateMode::Scheduled {
                warmup_steps: self.warmup_steps,
            },
        }
    }
}

/// Training loop parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingParams {
    /// Last epoch to run (inclusive)
    pub epochs: usize,

    /// Samples per batch
    pub batch_size: usize,

    /// Label smoothing for the training loss
    pub ce_smoothing: Option<f64>,

    /// Log training progress every N batches
    pub print_modulus: usize,

    /// Save a numbered weight snapshot every N epochs
    pub weight_modulus: usize,

    /// Prefetch depth of the data loading worker (0 loads on the main thread)
    pub n_workers: usize,

    /// Seed for shuffling and random windows
    pub seed: u64,

    /// Evaluate the loaded weights before the first resumed epoch
    pub baseline_on_resume: bool,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            epochs: 100,
            batch_size: 2,
            ce_smoothing: None,
            print_modulus: 1,
            weight_modulus: 1,
            n_workers: 1,
            seed: 42,
            baseline_on_resume: false,
        }
    }
}

/// Data configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Root containing the `train`, `val` and `test` token directories
    pub input_dir: PathBuf,

    /// Pick a random window from each training piece
    pub random_crop_train: bool,

    /// Pick a random window from each held-out piece
    pub random_crop_eval: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("./dataset/e_piano"),
            random_crop_train: true,
            random_crop_eval: false,
        }
    }
}

/// Checkpointing and resume configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointingConfig {
    /// Directory receiving weights, results and metrics
    pub output_dir: PathBuf,

    /// Weights to continue from
    pub continue_weights: Option<PathBuf>,

    /// Epoch the weights were saved at
    pub continue_epoch: Option<usize>,
}

impl Default for CheckpointingConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./saved_models"),
            continue_weights: None,
            continue_epoch: None,
        }
    }
}

/// A validated resume request
#[derive(Debug, Clone, PartialEq)]
pub struct ResumePoint {
    /// Last completed epoch
    pub epoch: usize,

    /// Weight snapshot saved at that epoch
    pub weights: PathBuf,
}

impl CheckpointingConfig {
    /// Pair up the resume options; both or neither must be given
    pub fn resume_point(&self) -> Result<Option<ResumePoint>> {
        match (&self.continue_weights, self.continue_epoch) {
            (Some(weights), Some(epoch)) => Ok(Some(ResumePoint {
                epoch,
                weights: weights.clone(),
            })),
            (None, None) => Ok(None),
            (Some(_), None) => Err(Error::config(
                "continue_weights requires continue_epoch (the epoch the weights were saved at)",
            )),
            (None, Some(_)) => Err(Error::config(
                "continue_epoch requires continue_weights",
            )),
        }
    }
}

/// Metrics output configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Write per-epoch scalars under `<output_dir>/tensorboard`
    pub metrics_sink: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { metrics_sink: true }
    }
}

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Train on the CPU even when an accelerator is available
    pub force_cpu: bool,
}

impl TrainingConfig {
    /// Load configuration from a YAML or JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Self = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            _ => serde_yaml::from_str(&content)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Write the resolved configuration as YAML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content).map_err(|e| {
            Error::persistence(format!("failed to write {}: {}", path.display(), e))
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.checkpointing.resume_point()?;

        let model = &self.model;
        if model.d_model == 0 {
            return Err(Error::config("d_model must be > 0"));
        }
        if model.max_sequence == 0 {
            return Err(Error::config("max_sequence must be > 0"));
        }
        if model.vocab_size < 2 {
            return Err(Error::config("vocab_size must be at least 2"));
        }
        if model.pad_token as usize >= model.vocab_size || model.end_token as usize >= model.vocab_size {
            return Err(Error::config(format!(
                "pad_token ({}) and end_token ({}) must be below vocab_size ({})",
                model.pad_token, model.end_token, model.vocab_size
            )));
        }
        if !(0.0..1.0).contains(&model.dropout) {
            return Err(Error::config("dropout must be in [0, 1)"));
        }

        match self.optimizer.lr_mode() {
            LearningRateMode::Constant(lr) if !(lr > 0.0) => {
                return Err(Error::config("learning_rate must be > 0"));
            }
            LearningRateMode::Scheduled { warmup_steps: 0 } => {
                return Err(Error::config("warmup_steps must be > 0"));
            }
            _ => {}
        }

        let training = &self.training;
        if training.epochs == 0 {
            return Err(Error::config("epochs must be > 0"));
        }
        if training.batch_size == 0 {
            return Err(Error::config("batch_size must be > 0"));
        }
        if training.print_modulus == 0 {
            return Err(Error::config("print_modulus must be > 0"));
        }
        if training.weight_modulus == 0 {
            return Err(Error::config("weight_modulus must be > 0"));
        }
        if let Some(eps) = training.ce_smoothing {
            if !(0.0..1.0).contains(&eps) {
                return Err(Error::config("ce_smoothing must be in [0, 1)"));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = TrainingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.optimizer.lr_mode(), LearningRateMode::Scheduled { warmup_steps: 4000 });
    }

    #[test]
    fn test_resume_requires_both_halves() {
        let mut config = TrainingConfig::default();
        config.checkpointing.continue_weights = Some(PathBuf::from("w.safetensors"));
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.checkpointing.continue_weights = None;
        config.checkpointing.continue_epoch = Some(3);
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.checkpointing.continue_weights = Some(PathBuf::from("w.safetensors"));
        let point = config.checkpointing.resume_point().unwrap().unwrap();
        assert_eq!(point.epoch, 3);
    }

    #[test]
    fn test_constant_learning_rate_mode() {
        let mut config = TrainingConfig::default();
        config.optimizer.learning_rate = Some(1e-4);
        assert_eq!(config.optimizer.lr_mode(), LearningRateMode::Constant(1e-4));

        config.optimizer.learning_rate = Some(0.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_partial_config_uses_defaults() {
        let yaml = "training:\n  epochs: 3\n  ce_smoothing: 0.1\nmodel:\n  d_model: 64\n";
        let config: TrainingConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.training.epochs, 3);
        assert_eq!(config.training.ce_smoothing, Some(0.1));
        assert_eq!(config.model.d_model, 64);
        assert_eq!(config.training.batch_size, 2);
        assert_eq!(config.model.pad_token, TOKEN_PAD);
    }

    #[test]
    fn test_invalid_smoothing_rejected() {
        let mut config = TrainingConfig::default();
        config.training.ce_smoothing = Some(1.5);
        assert!(config.validate().is_err());
    }
}
