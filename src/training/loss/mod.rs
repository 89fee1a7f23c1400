//! Pad-aware loss functions
//!
//! Every loss here reduces per-token cross-entropy to a scalar mean over the
//! positions whose target is not the pad sentinel. Training may use a
//! label-smoothed objective; evaluation always uses the plain one, so train and
//! eval losses are not directly comparable when smoothing is active.
//!
//! ```rust,ignore
//! use maestro_train::training::loss::{build_train_loss, CrossEntropyLoss};
//!
//! let eval_loss = CrossEntropyLoss::new(pad_token);
//! let train_loss = build_train_loss(pad_token, Some(0.1));
//! let value = train_loss.forward(&logits, &targets)?;
//! ```

pub mod cross_entropy;

pub use cross_entropy::{CrossEntropyLoss, SmoothCrossEntropyLoss};

use std::sync::Arc;

use candle_core::{DType, Tensor, D};

use crate::error::{Error, Result};

/// A scalar loss over `[batch, seq, vocab]` logits and `[batch, seq]` targets
pub trait LossFunction: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Compute the mean loss over non-pad positions
    fn forward(&self, logits: &Tensor, targets: &Tensor) -> Result<Tensor>;
}

/// Select the training objective: smoothed when configured, plain otherwise
pub fn build_train_loss(pad_token: u32, smoothing: Option<f64>) -> Arc<dyn LossFunction> {
    match smoothing {
        Some(eps) => Arc::new(SmoothCrossEntropyLoss::new(pad_token, eps)),
        None => Arc::new(CrossEntropyLoss::new(pad_token)),
    }
}

/// Flatten logits to `[n, vocab]` and targets to `[n]` u32
pub(crate) fn flatten_for_loss(logits: &Tensor, targets: &Tensor) -> Result<(Tensor, Tensor)> {
    let vocab = logits.dim(D::Minus1)?;
    let positions = logits.elem_count() / vocab.max(1);
    let logits = logits.reshape((positions, vocab))?;
    let targets = targets.flatten_all()?.to_dtype(DType::U32)?;

    if targets.dim(0)? != positions {
        return Err(Error::invalid_input(format!(
            "logits cover {} positions but targets have {}",
            positions,
            targets.dim(0)?
        )));
    }

    Ok((logits, targets))
}
