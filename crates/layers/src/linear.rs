//! Dense affine projections.
//!
//! Linear layers accept `(batch, seq, in_dim)` or `(rows, in_dim)` inputs and
//! return the same leading layout with `out_dim` features. Weights are stored
//! as `(out_dim, in_dim)` [`Var`]s so the surrounding autograd graph can
//! produce gradients for them. Matmuls run in [`PrecisionPolicy::compute`]
//! and the result is cast back to the storage dtype.

use candle_core::{DType, Device, Error, Result, Tensor, Var};

use crate::{checks, dtypes::PrecisionPolicy};

const PARAM_DTYPES: &[DType] = &[DType::F16, DType::BF16, DType::F32, DType::F64];

/// Shape metadata for a dense projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearConfig {
    /// Incoming feature dimension.
    pub input_dim: usize,
    /// Output feature dimension.
    pub output_dim: usize,
    /// Whether a learnable bias vector is applied.
    pub bias: bool,
}

impl LinearConfig {
    /// Creates a configuration for a projection with bias.
    pub fn new(input_dim: usize, output_dim: usize) -> Self {
        Self {
            input_dim,
            output_dim,
            bias: true,
        }
    }

    /// Number of scalar parameters the layer owns.
    pub fn num_parameters(&self) -> usize {
        let bias = if self.bias { self.output_dim } else { 0 };
        self.input_dim * self.output_dim + bias
    }
}

/// Weight initialisation policies.
#[derive(Debug, Clone, PartialEq)]
pub enum LinearInit {
    /// Xavier/Glorot uniform initialisation.
    XavierUniform,
    /// Xavier/Glorot normal initialisation.
    XavierNormal,
    /// Kaiming/He uniform initialisation for a leaky-ReLU with `negative_slope`.
    KaimingUniform { negative_slope: f64 },
    /// Kaiming/He normal initialisation for a leaky-ReLU with `negative_slope`.
    KaimingNormal { negative_slope: f64 },
}

impl Default for LinearInit {
    /// Kaiming uniform with slope `sqrt(5)`, i.e. `U(-1/sqrt(fan_in), 1/sqrt(fan_in))`.
    fn default() -> Self {
        LinearInit::KaimingUniform {
            negative_slope: 5f64.sqrt(),
        }
    }
}

impl LinearInit {
    fn sample(&self, shape: (usize, usize), device: &Device, dtype: DType) -> Result<Tensor> {
        let (out_dim, in_dim) = shape;
        let (fan_in, fan_out) = (in_dim as f64, out_dim as f64);
        let weight = match self {
            LinearInit::XavierUniform => {
                let bound = (6.0f64 / (fan_in + fan_out)).sqrt();
                Tensor::rand(-bound as f32, bound as f32, shape, device)?
            }
            LinearInit::XavierNormal => {
                let std = (2.0f64 / (fan_in + fan_out)).sqrt();
                Tensor::randn(0f32, std as f32, shape, device)?
            }
            LinearInit::KaimingUniform { negative_slope } => {
                let gain = (2.0f64 / (1.0 + negative_slope.powi(2))).sqrt();
                let bound = 3f64.sqrt() * gain / fan_in.sqrt();
                Tensor::rand(-bound as f32, bound as f32, shape, device)?
            }
            LinearInit::KaimingNormal { negative_slope } => {
                let gain = (2.0f64 / (1.0 + negative_slope.powi(2))).sqrt();
                Tensor::randn(0f32, (gain / fan_in.sqrt()) as f32, shape, device)?
            }
        };
        checks::ensure_cast_supported("linear.init", DType::F32, dtype)?;
        weight.to_dtype(dtype)
    }
}

/// Dense affine projection with optional bias.
#[derive(Debug, Clone)]
pub struct Linear {
    config: LinearConfig,
    weight: Var,
    bias: Option<Var>,
}

impl Linear {
    /// Constructs a linear layer from existing parameters.
    pub fn new(config: LinearConfig, weight: Tensor, bias: Option<Tensor>) -> Result<Self> {
        Self::validate_weight(&config, &weight)?;
        Self::validate_bias(&config, bias.as_ref())?;
        let bias = bias.map(|b| Var::from_tensor(&b)).transpose()?;
        Ok(Self {
            weight: Var::from_tensor(&weight)?,
            bias,
            config,
        })
    }

    /// Builds a layer with weights sampled from `init` and a zero bias.
    pub fn with_init(
        config: LinearConfig,
        init: &LinearInit,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        if config.input_dim == 0 || config.output_dim == 0 {
            return Err(Error::Msg(format!(
                "linear dimensions must be non-zero, got {} -> {}",
                config.input_dim, config.output_dim
            )));
        }
        let weight = init.sample((config.output_dim, config.input_dim), device, dtype)?;
        let bias = if config.bias {
            Some(Tensor::zeros(config.output_dim, dtype, device)?)
        } else {
            None
        };
        Self::new(config, weight, bias)
    }

    pub fn config(&self) -> &LinearConfig {
        &self.config
    }

    /// Returns the current weight values.
    pub fn weight(&self) -> Tensor {
        self.weight.as_tensor().clone()
    }

    /// Returns the current bias values if the layer has a bias.
    pub fn bias(&self) -> Option<Tensor> {
        self.bias.as_ref().map(|b| b.as_tensor().clone())
    }

    /// Overwrites the weight in place, casting `value` to the parameter dtype.
    pub fn set_weight(&self, value: &Tensor) -> Result<()> {
        checks::expect_shape(
            "linear.weight",
            value,
            &[self.config.output_dim, self.config.input_dim],
        )?;
        let cast = value.to_dtype(self.weight.dtype())?;
        self.weight.set(&cast)
    }

    /// Overwrites the bias in place.
    pub fn set_bias(&self, value: &Tensor) -> Result<()> {
        let bias = self
            .bias
            .as_ref()
            .ok_or_else(|| Error::Msg("layer has no bias to copy into".into()))?;
        checks::expect_shape("linear.bias", value, &[self.config.output_dim])?;
        let cast = value.to_dtype(bias.dtype())?;
        bias.set(&cast)
    }

    /// Trainable parameters under `scope`, e.g. `scope.weight`.
    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let mut params = vec![(format!("{scope}.weight"), self.weight.clone())];
        if let Some(bias) = &self.bias {
            params.push((format!("{scope}.bias"), bias.clone()));
        }
        params
    }

    /// Applies `x W^T + b`.
    pub fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        self.validate_input(hidden)?;

        let input = policy.cast_for_matmul(hidden)?;
        let weight_t = policy.cast_for_matmul(self.weight.as_tensor())?.t()?;

        let mut output = match input.dims() {
            &[batch, seq, _] => input
                .reshape((batch * seq, self.config.input_dim))?
                .matmul(&weight_t)?
                .reshape((batch, seq, self.config.output_dim))?,
            _ => input.matmul(&weight_t)?,
        };

        if let Some(bias) = &self.bias {
            let bias = policy.cast_for_matmul(bias.as_tensor())?;
            output = output.broadcast_add(&bias)?;
        }

        policy.cast_to_storage(&output)
    }

    fn validate_weight(config: &LinearConfig, weight: &Tensor) -> Result<()> {
        checks::expect_rank("linear.weight", weight, 2)?;
        checks::expect_shape(
            "linear.weight",
            weight,
            &[config.output_dim, config.input_dim],
        )?;
        checks::expect_dtype_in("linear.weight", weight, PARAM_DTYPES)?;
        checks::expect_contiguous("linear.weight", weight)
    }

    fn validate_bias(config: &LinearConfig, bias: Option<&Tensor>) -> Result<()> {
        match (config.bias, bias) {
            (true, Some(tensor)) => {
                checks::expect_shape("linear.bias", tensor, &[config.output_dim])?;
                checks::expect_dtype_in("linear.bias", tensor, PARAM_DTYPES)?;
                checks::expect_contiguous("linear.bias", tensor)
            }
            (false, Some(_)) => Err(Error::Msg("bias provided but config disables bias".into())),
            (true, None) => Err(Error::Msg("config expects bias but none supplied".into())),
            (false, None) => Ok(()),
        }
    }

    fn validate_input(&self, hidden: &Tensor) -> Result<()> {
        match hidden.dims() {
            [batch, seq, _] => {
                checks::expect_batch_seq_hidden("linear.input", hidden, self.config.input_dim)?;
                if *batch == 0 || *seq == 0 {
                    return Err(Error::Msg("batch/seq dimensions must be non-zero".into()));
                }
                Ok(())
            }
            [_, hidden_dim] if *hidden_dim == self.config.input_dim => Ok(()),
            [_, hidden_dim] => Err(Error::Msg(format!(
                "expected last dim {} but received {}",
                self.config.input_dim, hidden_dim
            ))),
            _ => Err(Error::Msg(
                "linear expects input shaped [B, T, H_in] or [T, H_in]".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_linear(input: &Tensor, weight: &Tensor, bias: &Tensor) -> Result<Tensor> {
        let (batch, seq, hidden) = input.dims3()?;
        input
            .reshape((batch * seq, hidden))?
            .matmul(&weight.t()?)?
            .broadcast_add(bias)?
            .reshape((batch, seq, weight.dims()[0]))
    }

    fn weight_std(tensor: &Tensor) -> Result<f64> {
        let values = tensor.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
        let n = values.len() as f64;
        let mean = values.iter().map(|v| f64::from(*v)).sum::<f64>() / n;
        let var = values
            .iter()
            .map(|v| (f64::from(*v) - mean).powi(2))
            .sum::<f64>()
            / n;
        Ok(var.sqrt())
    }

    #[test]
    fn forward_matches_reference_across_dtypes() -> Result<()> {
        let device = Device::Cpu;
        let config = LinearConfig::new(8, 12);
        let weight = Tensor::randn(0f32, 0.05, (12, 8), &device)?;
        let bias = Tensor::randn(0f32, 0.02, 12, &device)?;

        for &dtype in &[DType::F32, DType::F16, DType::BF16] {
            let linear = Linear::new(
                config.clone(),
                weight.to_dtype(dtype)?,
                Some(bias.to_dtype(dtype)?),
            )?;
            let input = Tensor::randn(0f32, 1.0, (2, 5, 8), &device)?.to_dtype(dtype)?;
            let policy = PrecisionPolicy::from_parameter_dtype(dtype);
            let output = linear.forward(&input, &policy)?;

            assert_eq!(output.dims(), &[2, 5, 12]);
            assert_eq!(output.dtype(), dtype);

            let reference = reference_linear(&input.to_dtype(DType::F32)?, &weight, &bias)?;
            let max = output
                .to_dtype(DType::F32)?
                .sub(&reference)?
                .abs()?
                .max_all()?
                .to_vec0::<f32>()?;
            let tol = match dtype {
                DType::F16 => 1e-2,
                DType::BF16 => 2e-2,
                _ => 1e-4,
            };
            assert!(max <= tol, "max diff {} for {:?}", max, dtype);
        }
        Ok(())
    }

    #[test]
    fn default_init_matches_fan_in_uniform_bound() -> Result<()> {
        let linear = Linear::with_init(
            LinearConfig::new(256, 128),
            &LinearInit::default(),
            &Device::Cpu,
            DType::F32,
        )?;
        let bound = 1.0 / 256f64.sqrt();
        let max = linear.weight().abs()?.max_all()?.to_vec0::<f32>()?;
        assert!(f64::from(max) <= bound + 1e-6);
        // U(-b, b) has std b / sqrt(3).
        let expected = bound / 3f64.sqrt();
        assert!((weight_std(&linear.weight())? - expected).abs() < expected * 0.1);

        let bias = linear.bias().expect("bias enabled by default");
        assert_eq!(bias.abs()?.max_all()?.to_vec0::<f32>()?, 0.0);
        Ok(())
    }

    #[test]
    fn set_weight_changes_forward_output() -> Result<()> {
        let device = Device::Cpu;
        let linear = Linear::with_init(
            LinearConfig::new(4, 4),
            &LinearInit::XavierUniform,
            &device,
            DType::F32,
        )?;
        let identity: Vec<f32> = (0..16)
            .map(|i| if i % 5 == 0 { 1.0 } else { 0.0 })
            .collect();
        linear.set_weight(&Tensor::from_vec(identity, (4, 4), &device)?)?;

        let input = Tensor::randn(0f32, 1.0, (1, 3, 4), &device)?;
        let policy = PrecisionPolicy::from_parameter_dtype(DType::F32);
        let out = linear.forward(&input, &policy)?;
        let diff = out.sub(&input)?.abs()?.max_all()?.to_vec0::<f32>()?;
        assert!(diff <= 1e-6);

        assert!(linear.set_weight(&Tensor::zeros((4, 3), DType::F32, &device)?).is_err());
        Ok(())
    }

    #[test]
    fn rejects_mismatched_input_width() -> Result<()> {
        let device = Device::Cpu;
        let linear = Linear::with_init(
            LinearConfig::new(4, 2),
            &LinearInit::XavierNormal,
            &device,
            DType::F32,
        )?;
        let policy = PrecisionPolicy::from_parameter_dtype(DType::F32);
        let input = Tensor::zeros((1, 2, 5), DType::F32, &device)?;
        assert!(linear.forward(&input, &policy).is_err());
        Ok(())
    }

    #[test]
    fn named_parameters_are_scoped() -> Result<()> {
        let linear = Linear::with_init(
            LinearConfig::new(3, 2),
            &LinearInit::default(),
            &Device::Cpu,
            DType::F32,
        )?;
        let names: Vec<_> = linear
            .named_parameters("proj")
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["proj.weight", "proj.bias"]);
        assert_eq!(linear.config().num_parameters(), 8);
        Ok(())
    }
}
