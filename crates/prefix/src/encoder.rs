//! The prefix encoder: an embedding table, optionally followed by a projection.
//!
//! Inputs are virtual-token indices shaped `(batch, num_virtual_tokens)`;
//! outputs are `(batch, num_virtual_tokens, 2 * num_layers * token_dim)` and
//! hold the key and value prefix of every layer side by side.

use candle_core::{DType, Device, Tensor, Var};
use embedding::{TokenEmbedding, TokenEmbeddingConfig};
use layers::{
    ActivationKind, LayerNorm, Linear, LinearConfig, LinearInit, NormConfig, PrecisionPolicy,
    Residual, Sequential, Stage,
};

use crate::{
    config::{PrefixTuningConfig, ProjectionMode},
    error::{PrefixError, Result},
    past_key_values::{self, LayerPrefix},
};

/// Projection applied to looked-up embeddings. The topology is fixed at construction.
#[derive(Debug, Clone)]
pub enum Projection {
    /// The embedding table already has the output width.
    None,
    /// A single `Linear -> Tanh -> Linear` stack.
    Plain(Sequential),
    /// A residual stage followed by an output stage.
    Residual(ResidualProjection),
}

/// `output_stage(residual_stage(x) + x)`.
#[derive(Debug, Clone)]
pub struct ResidualProjection {
    residual_stage: Sequential,
    output_stage: Sequential,
    residual: Residual,
}

impl ResidualProjection {
    /// Stage whose output is added back onto the embeddings.
    pub fn residual_stage(&self) -> &Sequential {
        &self.residual_stage
    }

    /// `Tanh -> Linear` stage mapping the residual sum to the output width.
    pub fn output_stage(&self) -> &Sequential {
        &self.output_stage
    }

    /// Returns `residual_stage(embeddings) + embeddings`, the input of the output stage.
    pub fn residual_sum(&self, embeddings: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        let branch = self.residual_stage.forward(embeddings, policy)?;
        Ok(self.residual.add(&branch, embeddings, policy)?)
    }

    pub fn forward(&self, embeddings: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        let summed = self.residual_sum(embeddings, policy)?;
        Ok(self.output_stage.forward(&summed, policy)?)
    }
}

/// Produces per-layer key/value prefixes from virtual-token indices.
#[derive(Debug, Clone)]
pub struct PrefixEncoder {
    config: PrefixTuningConfig,
    mode: ProjectionMode,
    embedding: TokenEmbedding,
    projection: Projection,
    policy: PrecisionPolicy,
}

impl PrefixEncoder {
    /// Allocates the embedding table and the projection selected by `config`.
    pub fn new(config: PrefixTuningConfig, dtype: DType, device: &Device) -> Result<Self> {
        let mode = config.projection_mode()?;
        if !dtype.is_float() {
            return Err(PrefixError::Configuration(format!(
                "prefix parameters must use a floating point dtype, got {:?}",
                dtype
            )));
        }

        let token_dim = config.token_dim;
        let output_dim = config.output_dim();
        let table_width = if mode.is_projected() {
            token_dim
        } else {
            output_dim
        };
        let embedding = TokenEmbedding::new(TokenEmbeddingConfig {
            vocab_size: config.num_virtual_tokens,
            hidden_dim: table_width,
            dtype,
            device: device.clone(),
        })?;

        let linear = |input: usize, output: usize| -> Result<Stage> {
            let layer = Linear::with_init(
                LinearConfig::new(input, output),
                &LinearInit::default(),
                device,
                dtype,
            )?;
            Ok(Stage::Linear(layer))
        };
        let output_stage = || -> Result<Sequential> {
            Ok(Sequential::new()
                .with(Stage::activation(ActivationKind::Tanh))
                .with(linear(token_dim, output_dim)?))
        };

        let projection = match mode {
            ProjectionMode::None => Projection::None,
            ProjectionMode::Plain { hidden } => Projection::Plain(
                Sequential::new()
                    .with(linear(token_dim, hidden)?)
                    .with(Stage::activation(ActivationKind::Tanh))
                    .with(linear(hidden, output_dim)?),
            ),
            ProjectionMode::ResidualConnect => Projection::Residual(ResidualProjection {
                residual_stage: Sequential::new().with(linear(token_dim, token_dim)?),
                output_stage: output_stage()?,
                residual: Residual::new(),
            }),
            ProjectionMode::ResidualBlock { hidden } => {
                let norm = LayerNorm::initialised(NormConfig::new(token_dim), device, dtype)?;
                Projection::Residual(ResidualProjection {
                    residual_stage: Sequential::new()
                        .with(linear(token_dim, hidden)?)
                        .with(Stage::activation(ActivationKind::Relu))
                        .with(linear(hidden, token_dim)?)
                        .with(Stage::Norm(norm)),
                    output_stage: output_stage()?,
                    residual: Residual::new(),
                })
            }
        };

        let encoder = Self {
            policy: PrecisionPolicy::from_parameter_dtype(dtype),
            config,
            mode,
            embedding,
            projection,
        };
        log::debug!(
            "prefix encoder built: mode={:?} table={}x{} output_dim={} parameters={}",
            encoder.mode,
            encoder.config.num_virtual_tokens,
            table_width,
            output_dim,
            encoder.num_parameters()
        );
        Ok(encoder)
    }

    pub fn config(&self) -> &PrefixTuningConfig {
        &self.config
    }

    pub fn mode(&self) -> ProjectionMode {
        self.mode
    }

    pub fn embedding(&self) -> &TokenEmbedding {
        &self.embedding
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn policy(&self) -> &PrecisionPolicy {
        &self.policy
    }

    pub fn device(&self) -> &Device {
        &self.embedding.config().device
    }

    /// Maps indices `(batch, num_virtual_tokens)` to prefixes
    /// `(batch, num_virtual_tokens, 2 * num_layers * token_dim)`.
    pub fn forward(&self, prefix: &Tensor) -> Result<Tensor> {
        let (batch, flat) = self.validate_indices(prefix)?;
        let embeddings = self
            .embedding
            .gather(&flat, batch, self.config.num_virtual_tokens)?;
        match &self.projection {
            Projection::None => Ok(embeddings),
            Projection::Plain(transform) => Ok(transform.forward(&embeddings, &self.policy)?),
            Projection::Residual(residual) => residual.forward(&embeddings, &self.policy),
        }
    }

    /// Index tensor selecting every virtual token in order, repeated `batch` times.
    pub fn prompt_tokens(&self, batch: usize) -> Result<Tensor> {
        if batch == 0 {
            return Err(PrefixError::Shape("batch must be greater than 0".into()));
        }
        let n = self.config.num_virtual_tokens;
        let tokens = Tensor::arange(0i64, n as i64, self.device())?
            .unsqueeze(0)?
            .broadcast_as((batch, n))?
            .contiguous()?;
        Ok(tokens)
    }

    /// Runs the encoder over [`prompt_tokens`](Self::prompt_tokens) and splits
    /// the result into one key/value pair per layer.
    pub fn past_key_values(&self, batch: usize) -> Result<Vec<LayerPrefix>> {
        let prefixes = self.forward(&self.prompt_tokens(batch)?)?;
        past_key_values::split_past_key_values(&prefixes, &self.config)
    }

    /// Trainable parameters with dotted names.
    pub fn named_parameters(&self) -> Vec<(String, Var)> {
        let mut params = self.embedding.named_parameters("embedding");
        match &self.projection {
            Projection::None => {}
            Projection::Plain(transform) => params.extend(transform.named_parameters("transform")),
            Projection::Residual(residual) => {
                params.extend(residual.residual_stage.named_parameters("residual_stage"));
                params.extend(residual.output_stage.named_parameters("output_stage"));
            }
        }
        params
    }

    /// Total number of trainable scalars.
    pub fn num_parameters(&self) -> usize {
        self.named_parameters()
            .iter()
            .map(|(_, var)| var.elem_count())
            .sum()
    }

    /// Evaluates the projection for every virtual token and returns an encoder
    /// that looks those results up directly.
    ///
    /// The folded encoder has no projection and is marked as inference mode;
    /// its outputs equal this encoder's outputs for the same indices.
    pub fn fold_projection(&self) -> Result<PrefixEncoder> {
        let table = self.forward(&self.prompt_tokens(1)?)?.squeeze(0)?;
        let embedding = TokenEmbedding::from_weight(&table)?;
        let config = PrefixTuningConfig {
            inference_mode: true,
            ..self.config.clone()
        };
        log::debug!(
            "folded {:?} projection into a {}x{} prefix table",
            self.mode,
            self.config.num_virtual_tokens,
            self.config.output_dim()
        );
        Ok(Self {
            mode: ProjectionMode::None,
            config,
            embedding,
            projection: Projection::None,
            policy: self.policy,
        })
    }

    /// Checks the index tensor and returns its batch size with the ids
    /// flattened to `I64`.
    fn validate_indices(&self, prefix: &Tensor) -> Result<(usize, Tensor)> {
        let n = self.config.num_virtual_tokens;
        let batch = match prefix.dims() {
            &[batch, seq] if batch > 0 && seq == n => batch,
            dims => {
                return Err(PrefixError::Shape(format!(
                    "prefix indices must be shaped (batch, {n}) with batch > 0, got {:?}",
                    dims
                )))
            }
        };
        if !prefix.dtype().is_int() {
            return Err(PrefixError::Shape(format!(
                "prefix indices must be integers, got {:?}",
                prefix.dtype()
            )));
        }

        let flat = prefix.to_dtype(DType::I64)?.flatten_all()?;
        let min = flat.min_all()?.to_scalar::<i64>()?;
        let max = flat.max_all()?.to_scalar::<i64>()?;
        if min < 0 || max >= n as i64 {
            let offending = if min < 0 { min } else { max };
            return Err(PrefixError::Shape(format!(
                "prefix index {offending} out of range [0, {n})"
            )));
        }
        Ok((batch, flat))
    }
}
