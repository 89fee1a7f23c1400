//! Position-aware feed-forward language model

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Dropout, Embedding, LayerNorm, Linear, VarBuilder, VarMap};
use tracing::debug;

use super::SequenceModel;
use crate::error::{Error, Result};
use crate::training::config::ModelConfig;

/// Residual ReLU MLP block
#[derive(Debug)]
struct Block {
    fc: Linear,
    proj: Linear,
    dropout: Dropout,
}

impl Block {
    fn new(d_model: usize, dim_feedforward: usize, dropout: f32, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            fc: candle_nn::linear(d_model, dim_feedforward, vb.pp("fc"))?,
            proj: candle_nn::linear(dim_feedforward, d_model, vb.pp("proj"))?,
            dropout: Dropout::new(dropout),
        })
    }

    fn forward(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let h = self.fc.forward(x)?.relu()?;
        let h = self.dropout.forward(&h, train)?;
        let h = self.proj.forward(&h)?;
        Ok((x + h)?)
    }
}

/// Token and position embeddings, a stack of residual MLP blocks, a final
/// layer norm and a vocabulary projection
pub struct FeedForwardLm {
    token_embedding: Embedding,
    position_embedding: Embedding,
    blocks: Vec<Block>,
    ln_f: LayerNorm,
    lm_head: Linear,
    max_sequence: usize,
    var_map: VarMap,
}

impl FeedForwardLm {
    /// Create a freshly initialized model on `device`
    pub fn new(config: &ModelConfig, device: &Device) -> Result<Self> {
        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, device);

        let token_embedding = candle_nn::embedding(config.vocab_size, config.d_model, vb.pp("wte"))?;
        let position_embedding = candle_nn::embedding(config.max_sequence, config.d_model, vb.pp("wpe"))?;

        let blocks = (0..config.n_layers)
            .map(|i| {
                Block::new(
                    config.d_model,
                    config.dim_feedforward,
                    config.dropout as f32,
                    vb.pp(format!("h.{}", i)),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let ln_f = candle_nn::layer_norm(config.d_model, 1e-5, vb.pp("ln_f"))?;
        let lm_head = candle_nn::linear(config.d_model, config.vocab_size, vb.pp("lm_head"))?;

        let model = Self {
            token_embedding,
            position_embedding,
            blocks,
            ln_f,
            lm_head,
            max_sequence: config.max_sequence,
            var_map,
        };
        debug!("FeedForwardLm initialized with {} parameters", model.num_parameters());

        Ok(model)
    }
}

impl SequenceModel for FeedForwardLm {
    fn forward(&self, input: &Tensor, train: bool) -> Result<Tensor> {
        let (_, seq_len) = input.dims2()?;
        if seq_len > self.max_sequence {
            return Err(Error::invalid_input(format!(
                "sequence length {} exceeds max_sequence {}",
                seq_len, self.max_sequence
            )));
        }

        let tok_emb = self.token_embedding.forward(input)?;
        let positions = Tensor::arange(0u32, seq_len as u32, input.device())?;
        let pos_emb = self.position_embedding.forward(&positions)?.unsqueeze(0)?;

        let mut x = tok_emb.broadcast_add(&pos_emb)?;
        for block in &self.blocks {
            x = block.forward(&x, train)?;
        }

        let x = self.ln_f.forward(&x)?;
        Ok(self.lm_head.forward(&x)?)
    }

    fn var_map(&self) -> &VarMap {
        &self.var_map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ModelConfig {
        ModelConfig {
            d_model: 8,
            n_layers: 2,
            dim_feedforward: 16,
            dropout: 0.0,
            max_sequence: 6,
            vocab_size: 12,
            pad_token: 11,
            end_token: 10,
        }
    }

    #[test]
    fn test_logits_shape() {
        let model = FeedForwardLm::new(&config(), &Device::Cpu).unwrap();
        let input = Tensor::zeros((3, 5), DType::U32, &Device::Cpu).unwrap();
        let logits = model.forward(&input, false).unwrap();
        assert_eq!(logits.dims(), &[3, 5, 12]);
    }

    #[test]
    fn test_rejects_long_sequences() {
        let model = FeedForwardLm::new(&config(), &Device::Cpu).unwrap();
        let input = Tensor::zeros((1, 7), DType::U32, &Device::Cpu).unwrap();
        assert!(model.forward(&input, false).is_err());
    }

    #[test]
    fn test_parameter_count() {
        let model = FeedForwardLm::new(&config(), &Device::Cpu).unwrap();
        // wte + wpe + 2 * (fc + proj) + ln_f + lm_head
        let expected = 12 * 8 + 6 * 8 + 2 * (8 * 16 + 16 + 16 * 8 + 8) + 2 * 8 + (8 * 12 + 12);
        assert_eq!(model.num_parameters(), expected);
    }

    #[test]
    fn test_eval_forward_is_deterministic() {
        let mut config = config();
        config.dropout = 0.5;
        let model = FeedForwardLm::new(&config, &Device::Cpu).unwrap();
        let input = Tensor::new(&[[1u32, 2, 3]], &Device::Cpu).unwrap();
        let a = model.forward(&input, false).unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        let b = model.forward(&input, false).unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(a, b);
    }
}
