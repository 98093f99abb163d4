//! Precision policy shared by every parameterised layer.
//!
//! Prefix parameters may be stored in `f16`/`bf16` to keep adapter
//! checkpoints small, while matmuls, activations and normalisation statistics
//! run in `f32`. [`PrecisionPolicy`] records the three dtypes involved and
//! performs the casts so individual layers never hard-code them.

use candle_core::{DType, Result, Tensor};

/// Describes how tensors are cast while flowing through a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrecisionPolicy {
    storage: DType,
    compute: DType,
    reduction: DType,
}

impl PrecisionPolicy {
    /// Derives compute and reduction dtypes from the parameter storage dtype.
    ///
    /// Half precision storage is promoted to `f32` for compute; reductions
    /// always run in `f32` unless storage is already `f64`.
    pub fn from_parameter_dtype(storage: DType) -> Self {
        let compute = match storage {
            DType::F16 | DType::BF16 => DType::F32,
            other => other,
        };
        let reduction = match storage {
            DType::F64 => DType::F64,
            _ => DType::F32,
        };
        Self {
            storage,
            compute,
            reduction,
        }
    }

    /// Dtype of parameters and layer outputs.
    pub fn storage(&self) -> DType {
        self.storage
    }

    /// Dtype used for matmuls and activations.
    pub fn compute(&self) -> DType {
        self.compute
    }

    /// Dtype used for mean/variance statistics.
    pub fn reduction(&self) -> DType {
        self.reduction
    }

    pub fn cast_for_matmul(&self, tensor: &Tensor) -> Result<Tensor> {
        cast_tensor(tensor, self.compute)
    }

    pub fn cast_for_reduction(&self, tensor: &Tensor) -> Result<Tensor> {
        cast_tensor(tensor, self.reduction)
    }

    pub fn cast_to_storage(&self, tensor: &Tensor) -> Result<Tensor> {
        cast_tensor(tensor, self.storage)
    }
}

fn cast_tensor(tensor: &Tensor, dtype: DType) -> Result<Tensor> {
    if tensor.dtype() == dtype {
        Ok(tensor.clone())
    } else {
        tensor.to_dtype(dtype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn half_precision_storage_computes_in_f32() {
        let policy = PrecisionPolicy::from_parameter_dtype(DType::BF16);
        assert_eq!(policy.storage(), DType::BF16);
        assert_eq!(policy.compute(), DType::F32);
        assert_eq!(policy.reduction(), DType::F32);

        let full = PrecisionPolicy::from_parameter_dtype(DType::F32);
        assert_eq!(full.compute(), DType::F32);
        assert_eq!(full.reduction(), DType::F32);
    }

    #[test]
    fn storage_round_trip_is_exact_for_representable_values() -> Result<()> {
        let device = Device::Cpu;
        let policy = PrecisionPolicy::from_parameter_dtype(DType::F16);
        let base = Tensor::from_vec(vec![0.125f32, -0.75, 3.5], (3,), &device)?;
        let stored = policy.cast_to_storage(&base)?;
        assert_eq!(stored.dtype(), DType::F16);

        let restored = policy.cast_for_matmul(&stored)?.to_vec1::<f32>()?;
        for (orig, rest) in base.to_vec1::<f32>()?.iter().zip(restored.iter()) {
            assert_eq!(orig, rest);
        }
        Ok(())
    }
}
