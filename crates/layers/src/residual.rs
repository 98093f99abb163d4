//! Residual addition of a transformed branch back onto its input.
//!
//! Both operands must share shape and dtype. The sum is taken in
//! [`PrecisionPolicy::compute`] and cast back to storage.

use candle_core::{DType, Result, Tensor};

use crate::{checks, dtypes::PrecisionPolicy};

/// Residual add helper with an optional branch scale.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Residual {
    /// Multiplier applied to the branch before the addition.
    pub branch_scale: Option<f32>,
}

impl Residual {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scaled(scale: f32) -> Self {
        Self {
            branch_scale: Some(scale),
        }
    }

    /// Returns `residual + scale * branch`.
    pub fn add(&self, branch: &Tensor, residual: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        checks::expect_shape("residual.branch", branch, residual.dims())?;
        checks::expect_same_dtype("residual.branch", branch, "residual.input", residual)?;

        let mut branch = policy.cast_for_matmul(branch)?;
        let residual = policy.cast_for_matmul(residual)?;
        if let Some(scale) = self.branch_scale {
            checks::ensure_cast_supported("residual.scale", DType::F32, branch.dtype())?;
            branch = branch.affine(f64::from(scale), 0.0)?;
        }
        policy.cast_to_storage(&branch.add(&residual)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn residual_add_preserves_shape_and_dtype() -> Result<()> {
        let device = Device::Cpu;
        let dtype = DType::F16;
        let policy = PrecisionPolicy::from_parameter_dtype(dtype);
        let left = Tensor::randn(0f32, 1.0, (2, 4, 8), &device)?.to_dtype(dtype)?;
        let right = Tensor::randn(0f32, 1.0, (2, 4, 8), &device)?.to_dtype(dtype)?;
        let out = Residual::new().add(&left, &right, &policy)?;
        assert_eq!(out.dims(), &[2, 4, 8]);
        assert_eq!(out.dtype(), dtype);
        Ok(())
    }

    #[test]
    fn branch_scale_is_applied() -> Result<()> {
        let device = Device::Cpu;
        let policy = PrecisionPolicy::from_parameter_dtype(DType::F32);
        let branch = Tensor::ones((1, 1, 4), DType::F32, &device)?;
        let parent = Tensor::full(2f32, (1, 1, 4), &device)?;
        let out = Residual::scaled(0.5).add(&branch, &parent, &policy)?;
        let values = out.flatten_all()?.to_vec1::<f32>()?;
        assert!(values.iter().all(|v| (*v - 2.5).abs() < 1e-6));
        Ok(())
    }

    #[test]
    fn mismatched_shapes_are_rejected() -> Result<()> {
        let device = Device::Cpu;
        let policy = PrecisionPolicy::from_parameter_dtype(DType::F32);
        let branch = Tensor::ones((1, 2, 4), DType::F32, &device)?;
        let parent = Tensor::ones((1, 2, 3), DType::F32, &device)?;
        assert!(Residual::new().add(&branch, &parent, &policy).is_err());
        Ok(())
    }
}
