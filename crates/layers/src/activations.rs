//! Element-wise non-linearities used between projection stages.
//!
//! Activations keep the input layout unchanged. Inputs are promoted to the
//! policy's compute dtype before evaluation and cast back to storage
//! afterwards, so `f16`/`bf16` prefixes are squashed in `f32`.

use std::sync::Arc;

use candle_core::{Result, Tensor};

use crate::dtypes::PrecisionPolicy;

/// Identifies which non-linearity an [`Activation`] implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationKind {
    /// Passes values through unchanged.
    Identity,
    /// Hyperbolic tangent, bounded to `(-1, 1)`.
    Tanh,
    /// Rectified linear unit.
    Relu,
}

/// Common interface for activation functions.
pub trait Activation: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> ActivationKind;

    /// Applies the activation to `input` using the precision rules in `policy`.
    fn forward(&self, input: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor>;
}

#[derive(Debug)]
struct BuiltinActivation {
    kind: ActivationKind,
}

impl Activation for BuiltinActivation {
    fn kind(&self) -> ActivationKind {
        self.kind
    }

    fn forward(&self, input: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        let compute = policy.cast_for_matmul(input)?;
        let activated = match self.kind {
            ActivationKind::Identity => compute,
            ActivationKind::Tanh => compute.tanh()?,
            ActivationKind::Relu => compute.relu()?,
        };
        policy.cast_to_storage(&activated)
    }
}

/// Returns a shared built-in activation implementation.
pub fn builtin(kind: ActivationKind) -> Arc<dyn Activation> {
    Arc::new(BuiltinActivation { kind })
}
