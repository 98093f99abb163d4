//! Splitting encoder output into per-layer attention prefixes.
//!
//! The last axis of an encoder output is laid out as
//! `(2 * num_layers, num_attention_heads, head_dim)`: slot `2 * l` holds the
//! key prefix of layer `l` and slot `2 * l + 1` its value prefix.

use candle_core::Tensor;

use crate::{
    config::PrefixTuningConfig,
    error::{PrefixError, Result},
};

/// Key and value prefix for one layer, each shaped
/// `(batch, num_attention_heads, num_virtual_tokens, head_dim)`.
#[derive(Debug, Clone)]
pub struct LayerPrefix {
    pub key: Tensor,
    pub value: Tensor,
}

/// Reshapes `(batch, num_virtual_tokens, 2 * num_layers * token_dim)` into
/// `num_layers` key/value pairs.
pub fn split_past_key_values(
    prefixes: &Tensor,
    config: &PrefixTuningConfig,
) -> Result<Vec<LayerPrefix>> {
    let heads = config.num_attention_heads;
    if heads == 0 || config.token_dim % heads != 0 {
        return Err(PrefixError::Configuration(format!(
            "token_dim ({}) must be divisible by num_attention_heads ({})",
            config.token_dim, heads
        )));
    }
    let head_dim = config.token_dim / heads;
    let slots = 2 * config.num_layers;

    let batch = match prefixes.dims() {
        &[batch, seq, width]
            if batch > 0 && seq == config.num_virtual_tokens && width == config.output_dim() =>
        {
            batch
        }
        dims => {
            return Err(PrefixError::Shape(format!(
                "expected prefixes shaped (batch, {}, {}), got {:?}",
                config.num_virtual_tokens,
                config.output_dim(),
                dims
            )))
        }
    };

    // (slots, batch, heads, tokens, head_dim)
    let stacked = prefixes
        .reshape((batch, config.num_virtual_tokens, slots, heads, head_dim))?
        .permute((2, 0, 3, 1, 4))?;

    (0..config.num_layers)
        .map(|layer| -> Result<LayerPrefix> {
            let key = stacked.get(2 * layer)?.contiguous()?;
            let value = stacked.get(2 * layer + 1)?.contiguous()?;
            Ok(LayerPrefix { key, value })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, IndexOp};

    fn config() -> PrefixTuningConfig {
        // token_dim 4 split across 2 heads, 2 layers -> width 16
        PrefixTuningConfig::new(4, 2, 3, 2)
    }

    #[test]
    fn keys_and_values_come_from_alternating_slots() -> Result<()> {
        let config = config();
        let width = config.output_dim();
        let total = 2 * 3 * width;
        let prefixes = Tensor::arange(0f32, total as f32, &Device::Cpu)?.reshape((2, 3, width))?;

        let layers = split_past_key_values(&prefixes, &config)?;
        assert_eq!(layers.len(), 2);
        for (layer, pair) in layers.iter().enumerate() {
            assert_eq!(pair.key.dims(), &[2, 2, 3, 2]);
            assert_eq!(pair.value.dims(), &[2, 2, 3, 2]);

            // batch 1, head 1, token 2, element 1
            let offset = |slot: usize| ((3 + 2) * width + slot * 4 + 2 + 1) as f32;
            let key = pair.key.i((1, 1, 2, 1))?.to_scalar::<f32>()?;
            let value = pair.value.i((1, 1, 2, 1))?.to_scalar::<f32>()?;
            assert_eq!(key, offset(2 * layer));
            assert_eq!(value, offset(2 * layer + 1));
        }
        Ok(())
    }

    #[test]
    fn indivisible_heads_are_a_configuration_error() -> Result<()> {
        let config = PrefixTuningConfig::new(4, 2, 3, 3);
        let prefixes = Tensor::zeros((1, 3, 16), DType::F32, &Device::Cpu)?;
        assert!(matches!(
            split_past_key_values(&prefixes, &config),
            Err(PrefixError::Configuration(_))
        ));
        Ok(())
    }

    #[test]
    fn wrong_width_is_a_shape_error() -> Result<()> {
        let prefixes = Tensor::zeros((1, 3, 12), DType::F32, &Device::Cpu)?;
        assert!(matches!(
            split_past_key_values(&prefixes, &config()),
            Err(PrefixError::Shape(_))
        ));
        Ok(())
    }
}
