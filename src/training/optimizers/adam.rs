//! Adam optimizer backed by `candle_nn::AdamW`

use candle_core::Tensor;
use candle_nn::{AdamW, Optimizer as CandleOptimizer, ParamsAdamW, VarMap};

use super::Optimizer;
use crate::error::Result;

/// Adam without weight decay
pub struct AdamOptimizer {
    inner: AdamW,
    step_count: usize,
}

impl AdamOptimizer {
    /// Create a new Adam optimizer over every variable in `var_map`
    pub fn new(var_map: &VarMap, learning_rate: f64, beta1: f64, beta2: f64, epsilon: f64) -> Result<Self> {
        let params = ParamsAdamW {
            lr: learning_rate,
            beta1,
            beta2,
            eps: epsilon,
            weight_decay: 0.0,
        };
        let inner = AdamW::new(var_map.all_vars(), params)?;

        Ok(Self { inner, step_count: 0 })
    }
}

impl Optimizer for AdamOptimizer {
    fn name(&self) -> &str {
        "adam"
    }

    fn step(&mut self, loss: &Tensor) -> Result<()> {
        self.inner.backward_step(loss)?;
        self.step_count += 1;
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.inner.learning_rate()
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.inner.set_learning_rate(lr);
    }

    fn step_count(&self) -> usize {
        self.step_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::{Init, VarBuilder};

    #[test]
    fn test_step_updates_parameters() {
        let device = Device::Cpu;
        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, &device);
        let w = vb.get_with_hints(2, "w", Init::Const(1.0)).unwrap();

        let mut optimizer = AdamOptimizer::new(&var_map, 0.1, 0.9, 0.98, 1e-9).unwrap();
        let loss = w.sqr().unwrap().sum_all().unwrap();
        optimizer.step(&loss).unwrap();

        let updated = w.to_vec1::<f32>().unwrap();
        assert!(updated.iter().all(|&v| v < 1.0));
        assert_eq!(optimizer.step_count(), 1);
    }

    #[test]
    fn test_learning_rate_round_trip() {
        let var_map = VarMap::new();
        let mut optimizer = AdamOptimizer::new(&var_map, 0.5, 0.9, 0.98, 1e-9).unwrap();
        optimizer.set_learning_rate(0.25);
        assert_eq!(optimizer.learning_rate(), 0.25);
    }
}
