//! Data loading for performance token sequences
//!
//! Pieces are stored as token files, one per performance, under
//! `<input_dir>/{train,val,test}`. A [`Dataset`] turns a piece into a fixed
//! length `(input, target)` window and a [`DataLoader`] groups windows into
//! `[batch, max_sequence]` tensors.

pub mod datasets;
pub mod loaders;
pub mod preprocess;

pub use datasets::{InMemoryDataset, TokenSequenceDataset, WindowConfig};
pub use loaders::{BatchIter, DataLoader, DataLoaderConfig};
pub use preprocess::{prepare_maestro, MidiEncoder, PretokenizedEncoder, Split, SplitCounts};

use std::path::Path;
use std::sync::Arc;

use candle_core::Tensor;
use rand::rngs::StdRng;

use crate::error::Result;
use crate::training::config::TrainingConfig;

/// Common trait for token datasets
pub trait Dataset: Send + Sync {
    /// Get the number of pieces in the dataset
    fn len(&self) -> usize;

    /// Check if the dataset is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Build the training window for piece `index`
    ///
    /// `rng` picks the window start when random cropping is enabled.
    fn sample(&self, index: usize, rng: &mut StdRng) -> Result<Sample>;
}

/// A single `(input, target)` pair, each `max_sequence` tokens long
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    /// Model input tokens
    pub input: Vec<u32>,
    /// Next-token targets, pad where there is nothing to predict
    pub target: Vec<u32>,
}

/// A collated batch of samples
#[derive(Debug, Clone)]
pub struct Batch {
    /// `[batch, max_sequence]` u32 input tokens
    pub input: Tensor,
    /// `[batch, max_sequence]` u32 targets
    pub target: Tensor,
}

impl Batch {
    /// Number of samples in the batch
    pub fn size(&self) -> usize {
        self.input.dims().first().copied().unwrap_or(0)
    }
}

/// Datasets used by a training run
pub struct SplitDatasets {
    /// Pieces the model is trained on
    pub train: Arc<dyn Dataset>,
    /// Held-out pieces used for evaluation
    pub test: Arc<dyn Dataset>,
}

/// Open the `train` and `test` splits under `input_dir`
///
/// Training windows are cropped at random unless disabled; evaluation windows
/// start at the beginning of each piece unless `random_crop_eval` is set.
pub fn open_splits(input_dir: &Path, config: &TrainingConfig) -> Result<SplitDatasets> {
    let train = TokenSequenceDataset::open(
        input_dir.join(Split::Train.dir_name()),
        WindowConfig::from_config(config, config.data.random_crop_train),
    )?;
    let test = TokenSequenceDataset::open(
        input_dir.join(Split::Test.dir_name()),
        WindowConfig::from_config(config, config.data.random_crop_eval),
    )?;

    Ok(SplitDatasets {
        train: Arc::new(train),
        test: Arc::new(test),
    })
}
