//! maestro-train - resumable training of token-sequence models on piano performances
//!
//! The crate is organized around a training orchestrator that turns a
//! [`TrainingConfig`] into a complete run: a baseline evaluation, numbered
//! training epochs with a warmup / inverse square root learning rate, best
//! checkpoint selection by held-out accuracy and loss, periodic weight
//! snapshots and an append-only results log.
//!
//! ```rust,ignore
//! use maestro_train::{Trainer, TrainingConfig};
//! use candle_core::Device;
//!
//! let config = TrainingConfig::from_file("train.yaml")?;
//! let mut trainer = Trainer::from_config(config, Device::Cpu)?;
//! let result = trainer.train()?;
//! println!("best eval accuracy: {}", result.best_accuracy.value);
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod error;
pub mod logging;
pub mod model;
pub mod training;
pub mod utils;

// Re-exports
pub use error::{Error, Result};
pub use model::{FeedForwardLm, SequenceModel};
pub use training::{Trainer, TrainingConfig, TrainingEvent, TrainingResult};
