//! Prefix-tuning encoder.
//!
//! A [`PrefixEncoder`] learns `num_virtual_tokens` prefix vectors for every
//! layer of a frozen transformer. Each forward call maps virtual-token indices
//! to a tensor holding the key and value prefix of every layer, which
//! [`split_past_key_values`] turns into per-layer attention inputs.
//!
//! ```no_run
//! use candle_core::{DType, Device};
//! use prefix::{PrefixEncoder, PrefixTuningConfig};
//!
//! # fn main() -> prefix::Result<()> {
//! let config = PrefixTuningConfig {
//!     prefix_projection: true,
//!     encoder_hidden_size: Some(512),
//!     ..PrefixTuningConfig::new(768, 12, 20, 12)
//! };
//! let encoder = PrefixEncoder::new(config, DType::F32, &Device::Cpu)?;
//! let prefixes = encoder.forward(&encoder.prompt_tokens(4)?)?;
//! assert_eq!(prefixes.dims(), &[4, 20, 2 * 12 * 768]);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod encoder;
pub mod error;
pub mod past_key_values;

pub use config::{PrefixTuningConfig, ProjectionMode};
pub use encoder::{PrefixEncoder, Projection, ResidualProjection};
pub use error::{PrefixError, Result};
pub use past_key_values::{split_past_key_values, LayerPrefix};
