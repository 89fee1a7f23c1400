//! Cross-entropy with pad masking and optional label smoothing

use candle_core::{DType, Tensor, D};
use tracing::warn;

use super::{flatten_for_loss, LossFunction};
use crate::error::{Error, Result};

/// Plain cross-entropy that ignores pad targets
#[derive(Debug, Clone)]
pub struct CrossEntropyLoss {
    pad_token: u32,
}

impl CrossEntropyLoss {
    /// Create a loss ignoring `pad_token`
    pub fn new(pad_token: u32) -> Self {
        Self { pad_token }
    }
}

impl LossFunction for CrossEntropyLoss {
    fn name(&self) -> &'static str {
        "cross_entropy"
    }

    fn forward(&self, logits: &Tensor, targets: &Tensor) -> Result<Tensor> {
        masked_cross_entropy(logits, targets, self.pad_token, 0.0)
    }
}

/// Label-smoothed cross-entropy that ignores pad targets
///
/// The target distribution keeps `1 - ε` on the true token and spreads `ε`
/// uniformly over every non-pad token in the vocabulary.
#[derive(Debug, Clone)]
pub struct SmoothCrossEntropyLoss {
    pad_token: u32,
    smoothing: f64,
}

impl SmoothCrossEntropyLoss {
    /// Create a smoothed loss with factor `smoothing` in `[0, 1)`
    pub fn new(pad_token: u32, smoothing: f64) -> Self {
        Self { pad_token, smoothing }
    }

    /// Smoothing factor
    pub fn smoothing(&self) -> f64 {
        self.smoothing
    }
}

impl LossFunction for SmoothCrossEntropyLoss {
    fn name(&self) -> &'static str {
        "smooth_cross_entropy"
    }

    fn forward(&self, logits: &Tensor, targets: &Tensor) -> Result<Tensor> {
        masked_cross_entropy(logits, targets, self.pad_token, self.smoothing)
    }
}

fn masked_cross_entropy(logits: &Tensor, targets: &Tensor, pad_token: u32, smoothing: f64) -> Result<Tensor> {
    let (logits, targets) = flatten_for_loss(logits, targets)?;
    let (_, vocab) = logits.dims2()?;
    if vocab < 2 || pad_token as usize >= vocab {
        return Err(Error::invalid_input(format!(
            "pad token {} is not inside a vocabulary of {}",
            pad_token, vocab
        )));
    }

    let log_probs = candle_nn::ops::log_softmax(&logits.to_dtype(DType::F32)?, D::Minus1)?;
    let mask = targets.ne(pad_token)?.to_dtype(DType::F32)?;
    let count = mask.sum_all()?.to_scalar::<f32>()?;
    if count == 0.0 {
        warn!("Batch has no non-pad targets, loss contribution is zero");
        return Ok(Tensor::zeros((), DType::F32, log_probs.device())?);
    }

    let target_log_probs = log_probs.gather(&targets.unsqueeze(1)?, 1)?.squeeze(1)?;
    let mut per_token = target_log_probs.neg()?;

    if smoothing > 0.0 {
        // Mean negative log-probability over the non-pad vocabulary
        let total = log_probs.sum(1)?;
        let pad_log_probs = log_probs.narrow(1, pad_token as usize, 1)?.squeeze(1)?;
        let uniform = ((total - pad_log_probs)? / (vocab - 1) as f64)?.neg()?;
        per_token = ((per_token * (1.0 - smoothing))? + (uniform * smoothing)?)?;
    }

    let loss = ((per_token * mask)?.sum_all()? / count as f64)?;
    Ok(loss)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use candle_core::Device;

    const PAD: u32 = 3;

    fn logits(device: &Device) -> Tensor {
        Tensor::new(
            &[[[2.0f32, 0.5, -1.0, 0.0], [0.1, 0.2, 3.0, 0.0], [1.0, 1.0, 1.0, 1.0]]],
            device,
        )
        .unwrap()
    }

    #[test]
    fn test_plain_loss_matches_manual_computation() {
        let device = Device::Cpu;
        let targets = Tensor::new(&[[0u32, 2, PAD]], &device).unwrap();
        let loss = CrossEntropyLoss::new(PAD)
            .forward(&logits(&device), &targets)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();

        let nll = |row: [f32; 4], target: usize| {
            let log_sum = row.iter().map(|v| v.exp()).sum::<f32>().ln();
            log_sum - row[target]
        };
        let expected = (nll([2.0, 0.5, -1.0, 0.0], 0) + nll([0.1, 0.2, 3.0, 0.0], 2)) / 2.0;
        assert_relative_eq!(loss, expected, epsilon = 1e-5);
    }

    #[test]
    fn test_pad_positions_do_not_change_loss() {
        let device = Device::Cpu;
        let with_pad = Tensor::new(&[[0u32, 2, PAD]], &device).unwrap();
        let row_logits = logits(&device).narrow(1, 0, 2).unwrap();
        let without_pad = Tensor::new(&[[0u32, 2]], &device).unwrap();

        let loss_fn = CrossEntropyLoss::new(PAD);
        let a = loss_fn.forward(&logits(&device), &with_pad).unwrap().to_scalar::<f32>().unwrap();
        let b = loss_fn.forward(&row_logits, &without_pad).unwrap().to_scalar::<f32>().unwrap();
        assert_relative_eq!(a, b, epsilon = 1e-6);
    }

    #[test]
    fn test_all_pad_batch_is_zero() {
        let device = Device::Cpu;
        let targets = Tensor::new(&[[PAD, PAD, PAD]], &device).unwrap();
        let loss = SmoothCrossEntropyLoss::new(PAD, 0.1)
            .forward(&logits(&device), &targets)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert_eq!(loss, 0.0);
    }

    #[test]
    fn test_zero_smoothing_equals_plain() {
        let device = Device::Cpu;
        let targets = Tensor::new(&[[1u32, 0, 2]], &device).unwrap();
        let plain = CrossEntropyLoss::new(PAD).forward(&logits(&device), &targets).unwrap();
        let smooth = SmoothCrossEntropyLoss::new(PAD, 0.0).forward(&logits(&device), &targets).unwrap();
        assert_relative_eq!(
            plain.to_scalar::<f32>().unwrap(),
            smooth.to_scalar::<f32>().unwrap(),
            epsilon = 1e-7
        );
    }

    #[test]
    fn test_smoothing_spreads_mass_over_non_pad_tokens() {
        let device = Device::Cpu;
        let row = [2.0f32, 0.5, -1.0, 0.0];
        let targets = Tensor::new(&[[0u32]], &device).unwrap();
        let input = Tensor::new(&[[row]], &device).unwrap();
        let eps = 0.2f32;

        let loss = SmoothCrossEntropyLoss::new(PAD, eps as f64)
            .forward(&input, &targets)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();

        let log_sum = row.iter().map(|v| v.exp()).sum::<f32>().ln();
        let log_probs: Vec<f32> = row.iter().map(|v| v - log_sum).collect();
        let uniform = -(log_probs[0] + log_probs[1] + log_probs[2]) / 3.0;
        let expected = (1.0 - eps) * -log_probs[0] + eps * uniform;
        assert_relative_eq!(loss, expected, epsilon = 1e-5);
    }

    #[test]
    fn test_pad_outside_vocab_is_rejected() {
        let device = Device::Cpu;
        let targets = Tensor::new(&[[0u32, 1, 2]], &device).unwrap();
        let result = CrossEntropyLoss::new(10).forward(&logits(&device), &targets);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
