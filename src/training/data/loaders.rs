//! Batch loader with an optional prefetching worker thread

use std::sync::mpsc::{sync_channel, Receiver};
use std::sync::Arc;
use std::thread::JoinHandle;

use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::{Batch, Dataset, Sample};
use crate::error::{Error, Result};

/// Configuration for DataLoader
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataLoaderConfig {
    /// Batch size
    pub batch_size: usize,
    /// Whether to shuffle data every epoch
    pub shuffle: bool,
    /// Batches loaded ahead by the worker thread; 0 loads on the caller's thread
    pub prefetch: usize,
    /// Seed for shuffling and window selection
    pub seed: u64,
}

impl Default for DataLoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 2,
            shuffle: true,
            prefetch: 1,
            seed: 42,
        }
    }
}

/// Token buffers of one batch before they are moved to the device
struct RawBatch {
    size: usize,
    seq_len: usize,
    input: Vec<u32>,
    target: Vec<u32>,
}

/// Data loader over a [`Dataset`]
///
/// Each call to [`DataLoader::iter`] starts a new pass. Successive passes use
/// different shuffles and windows, all derived from the configured seed.
pub struct DataLoader {
    dataset: Arc<dyn Dataset>,
    config: DataLoaderConfig,
    device: Device,
    rng: StdRng,
    passes: usize,
}

impl DataLoader {
    /// Create a new DataLoader
    pub fn new(dataset: Arc<dyn Dataset>, config: DataLoaderConfig, device: Device) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(Error::config("batch_size must be > 0"));
        }

        info!(
            "Creating DataLoader with batch_size={}, prefetch={}, shuffle={}",
            config.batch_size, config.prefetch, config.shuffle
        );

        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self {
            dataset,
            config,
            device,
            rng,
            passes: 0,
        })
    }

    /// Get the number of batches per pass
    pub fn num_batches(&self) -> usize {
        self.dataset.len().div_ceil(self.config.batch_size)
    }

    /// Get dataset size
    pub fn dataset_size(&self) -> usize {
        self.dataset.len()
    }

    /// Number of passes started so far
    pub fn passes(&self) -> usize {
        self.passes
    }

    /// Start a pass over the dataset
    pub fn iter(&mut self) -> BatchIter {
        self.passes += 1;

        let mut indices: Vec<usize> = (0..self.dataset.len()).collect();
        if self.config.shuffle {
            indices.shuffle(&mut self.rng);
        }
        let batches: Vec<Vec<usize>> = indices
            .chunks(self.config.batch_size)
            .map(<[usize]>::to_vec)
            .collect();
        let sample_rng = StdRng::seed_from_u64(self.rng.random());

        debug!("Pass {} with {} batches", self.passes, batches.len());

        let source = if self.config.prefetch == 0 {
            BatchSource::Inline {
                dataset: self.dataset.clone(),
                batches: batches.into_iter(),
                rng: sample_rng,
            }
        } else {
            let (sender, receiver) = sync_channel(self.config.prefetch);
            let dataset = self.dataset.clone();
            let handle = std::thread::spawn(move || {
                let mut rng = sample_rng;
                for indices in batches {
                    let batch = load_batch(dataset.as_ref(), &indices, &mut rng);
                    let failed = batch.is_err();
                    if sender.send(batch).is_err() || failed {
                        break;
                    }
                }
            });
            BatchSource::Prefetch {
                receiver,
                handle: Some(handle),
            }
        };

        BatchIter {
            source,
            device: self.device.clone(),
        }
    }
}

enum BatchSource {
    Inline {
        dataset: Arc<dyn Dataset>,
        batches: std::vec::IntoIter<Vec<usize>>,
        rng: StdRng,
    },
    Prefetch {
        receiver: Receiver<Result<RawBatch>>,
        handle: Option<JoinHandle<()>>,
    },
}

/// Batches of one pass, in order
pub struct BatchIter {
    source: BatchSource,
    device: Device,
}

impl Iterator for BatchIter {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        let raw = match &mut self.source {
            BatchSource::Inline { dataset, batches, rng } => {
                let indices = batches.next()?;
                load_batch(dataset.as_ref(), &indices, rng)
            }
            BatchSource::Prefetch { receiver, handle } => match receiver.recv() {
                Ok(raw) => raw,
                Err(_) => {
                    // Channel closed: the worker finished or died
                    if let Some(handle) = handle.take() {
                        if handle.join().is_err() {
                            error!("Data loading worker panicked");
                            return Some(Err(Error::data("data loading worker panicked")));
                        }
                    }
                    return None;
                }
            },
        };

        Some(raw.and_then(|raw| to_batch(raw, &self.device)))
    }
}

fn load_batch(dataset: &dyn Dataset, indices: &[usize], rng: &mut StdRng) -> Result<RawBatch> {
    let samples = indices
        .iter()
        .map(|&index| dataset.sample(index, rng))
        .collect::<Result<Vec<Sample>>>()?;
    collate(samples)
}

fn collate(samples: Vec<Sample>) -> Result<RawBatch> {
    let size = samples.len();
    let seq_len = samples.first().map(|s| s.input.len()).unwrap_or(0);
    let mut input = Vec::with_capacity(size * seq_len);
    let mut target = Vec::with_capacity(size * seq_len);

    for sample in samples {
        if sample.input.len() != seq_len || sample.target.len() != seq_len {
            return Err(Error::data(format!(
                "sample lengths differ within a batch: expected {}, got {}/{}",
                seq_len,
                sample.input.len(),
                sample.target.len()
            )));
        }
        input.extend(sample.input);
        target.extend(sample.target);
    }

    Ok(RawBatch {
        size,
        seq_len,
        input,
        target,
    })
}

fn to_batch(raw: RawBatch, device: &Device) -> Result<Batch> {
    let shape = (raw.size, raw.seq_len);
    Ok(Batch {
        input: Tensor::from_vec(raw.input, shape, device)?,
        target: Tensor::from_vec(raw.target, shape, device)?,
    })
}
