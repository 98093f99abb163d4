//! Layer normalisation over the last axis.
//!
//! Mean and variance are computed in [`PrecisionPolicy::reduction`]; the
//! affine scale and shift are applied in the compute dtype before casting back
//! to storage. Any leading layout is accepted as long as the last dimension
//! equals `hidden_size`.

use candle_core::{DType, Device, Error, Result, Tensor, Var, D};

use crate::{checks, dtypes::PrecisionPolicy};

/// Configuration for [`LayerNorm`].
#[derive(Debug, Clone, PartialEq)]
pub struct NormConfig {
    /// Size of the normalised (last) dimension.
    pub hidden_size: usize,
    /// Added to the variance before the square root.
    pub epsilon: f64,
}

impl NormConfig {
    pub fn new(hidden_size: usize) -> Self {
        Self {
            hidden_size,
            epsilon: 1e-5,
        }
    }
}

/// LayerNorm with a learnable scale and shift.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    config: NormConfig,
    weight: Var,
    bias: Var,
}

impl LayerNorm {
    /// Constructs a LayerNorm from explicit scale and shift tensors.
    pub fn new(weight: Tensor, bias: Tensor, config: NormConfig) -> Result<Self> {
        for (context, tensor) in [("norm.weight", &weight), ("norm.bias", &bias)] {
            checks::expect_shape(context, tensor, &[config.hidden_size])?;
            checks::expect_dtype_in(
                context,
                tensor,
                &[DType::F16, DType::BF16, DType::F32, DType::F64],
            )?;
        }
        Ok(Self {
            config,
            weight: Var::from_tensor(&weight)?,
            bias: Var::from_tensor(&bias)?,
        })
    }

    /// Unit scale and zero shift, the usual starting point for training.
    pub fn initialised(config: NormConfig, device: &Device, dtype: DType) -> Result<Self> {
        if config.hidden_size == 0 {
            return Err(Error::Msg("layer norm requires hidden_size > 0".into()));
        }
        let weight = Tensor::ones(config.hidden_size, dtype, device)?;
        let bias = Tensor::zeros(config.hidden_size, dtype, device)?;
        Self::new(weight, bias, config)
    }

    pub fn config(&self) -> &NormConfig {
        &self.config
    }

    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        vec![
            (format!("{scope}.weight"), self.weight.clone()),
            (format!("{scope}.bias"), self.bias.clone()),
        ]
    }

    pub fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        match hidden.dims().last() {
            Some(&last) if last == self.config.hidden_size => {}
            _ => {
                return Err(Error::Msg(format!(
                    "norm.input: expected last dim {}, got {:?}",
                    self.config.hidden_size,
                    hidden.dims()
                )))
            }
        }

        let hidden_size = self.config.hidden_size as f64;
        let compute = policy.cast_for_reduction(hidden)?;
        let mean = (compute.sum_keepdim(D::Minus1)? / hidden_size)?;
        let centered = compute.broadcast_sub(&mean)?;
        let variance = (centered.sqr()?.sum_keepdim(D::Minus1)? / hidden_size)?;
        let denom = (variance + self.config.epsilon)?.sqrt()?;
        let normalized = policy.cast_for_matmul(&centered.broadcast_div(&denom)?)?;

        let weight = policy.cast_for_matmul(self.weight.as_tensor())?;
        let bias = policy.cast_for_matmul(self.bias.as_tensor())?;
        policy.cast_to_storage(&normalized.broadcast_mul(&weight)?.broadcast_add(&bias)?)
    }
}
