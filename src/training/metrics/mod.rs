//! Accuracy computation and the optional metrics side channel
//!
//! [`accuracy`] is the pad-aware counterpart of the loss functions. The
//! [`MetricsSink`] trait receives per-epoch scalars; a run without a sink gets
//! [`NoopSink`] and behaves identically apart from the missing output.

pub mod exporters;

pub use exporters::{JsonlScalarSink, NoopSink};

use candle_core::{DType, Tensor, D};
use tracing::warn;

use crate::error::{Error, Result};

/// Scalar names emitted once per epoch
pub mod names {
    /// Mean training-set loss
    pub const TRAIN_LOSS: &str = "Avg_CE_loss/train";
    /// Mean held-out loss
    pub const EVAL_LOSS: &str = "Avg_CE_loss/eval";
    /// Mean training-set accuracy
    pub const TRAIN_ACCURACY: &str = "Accuracy/train";
    /// Mean held-out accuracy
    pub const EVAL_ACCURACY: &str = "Accuracy/eval";
    /// Learning rate at the end of the epoch
    pub const LEARN_RATE: &str = "Learn_rate/train";
}

/// Receiver of `(name, value, step)` scalar triples
pub trait MetricsSink: Send {
    /// Sink name
    fn name(&self) -> &str;

    /// Record one scalar
    fn add_scalar(&mut self, name: &str, value: f64, step: usize) -> Result<()>;

    /// Flush buffered scalars
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Fraction of non-pad positions whose argmax prediction equals the target
///
/// A batch with no non-pad targets yields 0.
pub fn accuracy(logits: &Tensor, targets: &Tensor, pad_token: u32) -> Result<f64> {
    let predictions = logits.argmax(D::Minus1)?.flatten_all()?.to_vec1::<u32>()?;
    let targets = targets.flatten_all()?.to_dtype(DType::U32)?.to_vec1::<u32>()?;

    if predictions.len() != targets.len() {
        return Err(Error::invalid_input(format!(
            "{} predictions for {} targets",
            predictions.len(),
            targets.len()
        )));
    }

    let (correct, counted) = predictions
        .iter()
        .zip(&targets)
        .filter(|(_, &target)| target != pad_token)
        .fold((0usize, 0usize), |(correct, counted), (prediction, target)| {
            (correct + usize::from(prediction == target), counted + 1)
        });

    if counted == 0 {
        warn!("Batch has no non-pad targets, accuracy is zero");
        return Ok(0.0);
    }

    Ok(correct as f64 / counted as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    const PAD: u32 = 3;

    fn logits(device: &Device) -> Tensor {
        // argmax per position: 0, 2, 1, 3
        Tensor::new(
            &[[[5.0f32, 0.0, 0.0, 0.0], [0.0, 0.0, 5.0, 0.0]], [[0.0, 5.0, 0.0, 0.0], [0.0, 0.0, 0.0, 5.0]]],
            device,
        )
        .unwrap()
    }

    #[test]
    fn test_accuracy_ignores_pad_positions() {
        let device = Device::Cpu;
        let targets = Tensor::new(&[[0u32, 1], [1, PAD]], &device).unwrap();
        let acc = accuracy(&logits(&device), &targets, PAD).unwrap();
        assert!((acc - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_accuracy_all_pad_is_zero() {
        let device = Device::Cpu;
        let targets = Tensor::new(&[[PAD, PAD], [PAD, PAD]], &device).unwrap();
        assert_eq!(accuracy(&logits(&device), &targets, PAD).unwrap(), 0.0);
    }

    #[test]
    fn test_accuracy_perfect_predictions() {
        let device = Device::Cpu;
        let targets = Tensor::new(&[[0u32, 2], [1, PAD]], &device).unwrap();
        assert_eq!(accuracy(&logits(&device), &targets, PAD).unwrap(), 1.0);
    }

    #[test]
    fn test_accuracy_shape_mismatch() {
        let device = Device::Cpu;
        let targets = Tensor::new(&[0u32, 2, 1], &device).unwrap();
        assert!(accuracy(&logits(&device), &targets, PAD).is_err());
    }
}
