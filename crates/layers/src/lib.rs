//! Building blocks for prefix projection stacks.
//!
//! Every layer follows the same conventions: parameters are candle
//! [`Var`](candle_core::Var)s so gradients can be collected by the caller,
//! casts go through [`PrecisionPolicy`], and failures are reported as
//! `candle_core::Error` values rather than panics.

pub mod activations;
pub mod checks;
pub mod dtypes;
pub mod linear;
pub mod norm;
pub mod residual;
pub mod sequential;

pub use activations::{Activation, ActivationKind};
pub use dtypes::PrecisionPolicy;
pub use linear::{Linear, LinearConfig, LinearInit};
pub use norm::{LayerNorm, NormConfig};
pub use residual::Residual;
pub use sequential::{Sequential, Stage};
