//! Sequence models trained by the orchestrator
//!
//! The training loop only needs next-token logits and access to the
//! parameters, so any architecture implementing [`SequenceModel`] can be
//! trained. [`FeedForwardLm`] is a small model that runs on any device.

pub mod feedforward;

pub use feedforward::FeedForwardLm;

use candle_core::Tensor;
use candle_nn::VarMap;

use crate::error::Result;

/// A model producing `[batch, seq, vocab]` logits from `[batch, seq]` tokens
pub trait SequenceModel: Send {
    /// Compute logits; `train` enables dropout
    fn forward(&self, input: &Tensor, train: bool) -> Result<Tensor>;

    /// Trainable parameters
    fn var_map(&self) -> &VarMap;

    /// Total number of parameters
    fn num_parameters(&self) -> usize {
        self.var_map()
            .all_vars()
            .iter()
            .map(|var| var.elem_count())
            .sum()
    }
}
