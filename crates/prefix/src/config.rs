//! Prefix-tuning configuration and the projection topology it selects.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::{PrefixError, Result};

/// Hyperparameters of a prefix encoder.
///
/// Deserialises from a PEFT-style `adapter_config.json` (keys the encoder does
/// not use, such as `peft_type` or `task_type`, are ignored) or from TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixTuningConfig {
    /// Hidden width of the base model's token embeddings.
    pub token_dim: usize,
    /// Number of transformer layers that receive a prefix.
    pub num_layers: usize,
    /// Length of the learned prefix.
    pub num_virtual_tokens: usize,
    /// Attention heads per layer; used when splitting prefixes into key/value pairs.
    pub num_attention_heads: usize,
    /// Width of the projection MLP. Required by the plain and residual-block projections.
    #[serde(default)]
    pub encoder_hidden_size: Option<usize>,
    #[serde(default)]
    pub prefix_projection: bool,
    #[serde(default)]
    pub use_residual_connect: bool,
    #[serde(default)]
    pub use_residual_block: bool,
    #[serde(default)]
    pub inference_mode: bool,
}

/// Projection topology derived from a validated [`PrefixTuningConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionMode {
    /// Embeddings are stored at full output width and returned directly.
    None,
    /// `Linear(token_dim -> hidden) -> Tanh -> Linear(hidden -> output)`.
    Plain { hidden: usize },
    /// `Linear(token_dim -> token_dim)` added back onto the embeddings.
    ResidualConnect,
    /// `Linear -> ReLU -> Linear -> LayerNorm` added back onto the embeddings.
    ResidualBlock { hidden: usize },
}

impl ProjectionMode {
    pub fn is_projected(&self) -> bool {
        !matches!(self, ProjectionMode::None)
    }

    pub fn is_residual(&self) -> bool {
        matches!(
            self,
            ProjectionMode::ResidualConnect | ProjectionMode::ResidualBlock { .. }
        )
    }
}

impl PrefixTuningConfig {
    /// Configuration with every optional feature disabled.
    pub fn new(
        token_dim: usize,
        num_layers: usize,
        num_virtual_tokens: usize,
        num_attention_heads: usize,
    ) -> Self {
        Self {
            token_dim,
            num_layers,
            num_virtual_tokens,
            num_attention_heads,
            encoder_hidden_size: None,
            prefix_projection: false,
            use_residual_connect: false,
            use_residual_block: false,
            inference_mode: false,
        }
    }

    /// Loads a configuration from `.json` or `.toml` (extension-less files are read as TOML).
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let config: PrefixTuningConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            Some("toml") | None => toml::from_str(&contents)?,
            Some(other) => {
                return Err(PrefixError::Configuration(format!(
                    "unsupported configuration extension '{}'",
                    other
                )));
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Width of one virtual token's prefix: keys and values for every layer.
    pub fn output_dim(&self) -> usize {
        2 * self.num_layers * self.token_dim
    }

    /// Checks dimensions and flag combinations.
    pub fn validate(&self) -> Result<()> {
        self.projection_mode().map(|_| ())
    }

    /// Resolves the projection topology, rejecting incomplete or conflicting settings.
    pub fn projection_mode(&self) -> Result<ProjectionMode> {
        let mut errors = Vec::new();
        for (name, value) in [
            ("token_dim", self.token_dim),
            ("num_layers", self.num_layers),
            ("num_virtual_tokens", self.num_virtual_tokens),
            ("num_attention_heads", self.num_attention_heads),
        ] {
            if value == 0 {
                errors.push(format!("{name} must be greater than 0"));
            }
        }
        if !errors.is_empty() {
            return Err(PrefixError::Configuration(errors.join("; ")));
        }

        if !self.prefix_projection || self.inference_mode {
            if self.use_residual_connect || self.use_residual_block {
                log::warn!(
                    "residual flags ignored: prefix_projection={} inference_mode={}",
                    self.prefix_projection,
                    self.inference_mode
                );
            }
            return Ok(ProjectionMode::None);
        }

        match (self.use_residual_connect, self.use_residual_block) {
            (true, true) => Err(PrefixError::Configuration(
                "use_residual_connect and use_residual_block are mutually exclusive".into(),
            )),
            (true, false) => Ok(ProjectionMode::ResidualConnect),
            (false, true) => Ok(ProjectionMode::ResidualBlock {
                hidden: self.required_hidden_size("residual block")?,
            }),
            (false, false) => Ok(ProjectionMode::Plain {
                hidden: self.required_hidden_size("prefix projection")?,
            }),
        }
    }

    fn required_hidden_size(&self, path: &str) -> Result<usize> {
        match self.encoder_hidden_size {
            Some(0) => Err(PrefixError::Configuration(format!(
                "encoder_hidden_size must be greater than 0 for the {path}"
            ))),
            Some(hidden) => Ok(hidden),
            None => Err(PrefixError::Configuration(format!(
                "encoder_hidden_size is required for the {path}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn projecting() -> PrefixTuningConfig {
        PrefixTuningConfig {
            encoder_hidden_size: Some(8),
            prefix_projection: true,
            ..PrefixTuningConfig::new(4, 2, 3, 2)
        }
    }

    #[test]
    fn flags_select_projection_mode() -> Result<()> {
        assert_eq!(
            PrefixTuningConfig::new(4, 2, 3, 2).projection_mode()?,
            ProjectionMode::None
        );
        assert_eq!(projecting().projection_mode()?, ProjectionMode::Plain { hidden: 8 });

        let connect = PrefixTuningConfig {
            use_residual_connect: true,
            encoder_hidden_size: None,
            ..projecting()
        };
        assert_eq!(connect.projection_mode()?, ProjectionMode::ResidualConnect);

        let block = PrefixTuningConfig {
            use_residual_block: true,
            ..projecting()
        };
        assert_eq!(block.projection_mode()?, ProjectionMode::ResidualBlock { hidden: 8 });
        Ok(())
    }

    #[test]
    fn inference_mode_disables_projection() -> Result<()> {
        let config = PrefixTuningConfig {
            inference_mode: true,
            use_residual_connect: true,
            use_residual_block: true,
            encoder_hidden_size: None,
            ..projecting()
        };
        assert_eq!(config.projection_mode()?, ProjectionMode::None);
        assert_eq!(config.output_dim(), 16);
        Ok(())
    }

    #[test]
    fn conflicting_residual_flags_are_rejected() {
        let config = PrefixTuningConfig {
            use_residual_connect: true,
            use_residual_block: true,
            ..projecting()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, PrefixError::Configuration(_)));
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn missing_hidden_size_is_a_configuration_error() {
        for block in [false, true] {
            let config = PrefixTuningConfig {
                encoder_hidden_size: None,
                use_residual_block: block,
                ..projecting()
            };
            let err = config.projection_mode().unwrap_err();
            assert!(matches!(err, PrefixError::Configuration(ref msg) if msg.contains("encoder_hidden_size")));
        }

        let zero = PrefixTuningConfig {
            encoder_hidden_size: Some(0),
            ..projecting()
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn zero_dimensions_are_reported_together() {
        let config = PrefixTuningConfig::new(0, 0, 3, 1);
        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("token_dim"));
        assert!(message.contains("num_layers"));
    }
}
