//! Learnable lookup table mapping integer ids to vectors.

use candle_core::{bail, DType, Device, Error, Result, Tensor, Var};

/// Configuration for building an embedding table.
#[derive(Debug, Clone)]
pub struct TokenEmbeddingConfig {
    /// Number of rows (distinct ids).
    pub vocab_size: usize,
    /// Width of each embedding vector.
    pub hidden_dim: usize,
    /// Storage dtype of the table and of lookup outputs.
    pub dtype: DType,
    /// Device hosting the table.
    pub device: Device,
}

/// Embedding table backed by a trainable [`Var`].
#[derive(Debug, Clone)]
pub struct TokenEmbedding {
    config: TokenEmbeddingConfig,
    weight: Var,
}

impl TokenEmbedding {
    /// Builds a new table with entries sampled from `N(0, 1)`.
    pub fn new(config: TokenEmbeddingConfig) -> Result<Self> {
        Self::validate_dims(config.vocab_size, config.hidden_dim)?;
        let shape = (config.vocab_size, config.hidden_dim);
        let initial = Tensor::randn(0f32, 1f32, shape, &config.device)?.to_dtype(config.dtype)?;
        Ok(Self {
            weight: Var::from_tensor(&initial)?,
            config,
        })
    }

    /// Wraps an existing `(vocab_size, hidden_dim)` tensor as a trainable table.
    pub fn from_weight(weight: &Tensor) -> Result<Self> {
        let (vocab_size, hidden_dim) = weight.dims2()?;
        Self::validate_dims(vocab_size, hidden_dim)?;
        if !weight.dtype().is_float() {
            bail!("embedding weight must be floating point, got {:?}", weight.dtype());
        }
        let config = TokenEmbeddingConfig {
            vocab_size,
            hidden_dim,
            dtype: weight.dtype(),
            device: weight.device().clone(),
        };
        Ok(Self {
            weight: Var::from_tensor(&weight.contiguous()?)?,
            config,
        })
    }

    pub fn config(&self) -> &TokenEmbeddingConfig {
        &self.config
    }

    /// Returns the current table values.
    pub fn weight(&self) -> Tensor {
        self.weight.as_tensor().clone()
    }

    /// Looks up embeddings for `token_ids`.
    ///
    /// Inputs must be shaped `(batch, seq)` with an integer dtype and ids in
    /// `[0, vocab_size)`. Outputs are `(batch, seq, hidden_dim)`.
    pub fn forward(&self, token_ids: &Tensor) -> Result<Tensor> {
        let (batch, seq) = self.validate_token_ids(token_ids)?;

        let flat = token_ids.to_dtype(DType::I64)?.flatten_all()?;
        self.ensure_id_range(&flat)?;
        self.gather(&flat, batch, seq)
    }

    /// Gathers rows for flattened `I64` ids the caller has already range
    /// checked, reshaping the result to `(batch, seq, hidden_dim)`.
    pub fn gather(&self, flat_ids: &Tensor, batch: usize, seq: usize) -> Result<Tensor> {
        if flat_ids.dims() != [batch * seq] {
            bail!(
                "flat ids must hold batch * seq = {} entries, got {:?}",
                batch * seq,
                flat_ids.dims()
            );
        }
        let gathered = self.weight.as_tensor().index_select(flat_ids, 0)?;
        gathered.reshape((batch, seq, self.config.hidden_dim))
    }

    /// Trainable parameters under `scope`.
    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        vec![(format!("{scope}.weight"), self.weight.clone())]
    }

    fn validate_dims(vocab_size: usize, hidden_dim: usize) -> Result<()> {
        if vocab_size == 0 {
            bail!("token embedding requires vocab_size > 0");
        }
        if hidden_dim == 0 {
            bail!("token embedding requires hidden_dim > 0");
        }
        Ok(())
    }

    fn validate_token_ids(&self, token_ids: &Tensor) -> Result<(usize, usize)> {
        let (batch, seq) = match token_ids.dims() {
            &[batch, seq] => (batch, seq),
            dims => {
                return Err(Error::Msg(format!(
                    "token_ids must be shaped [batch, seq], got {:?}",
                    dims
                )))
            }
        };
        if batch == 0 || seq == 0 {
            bail!("token_ids must have non-zero batch and seq dimensions");
        }
        if !token_ids.dtype().is_int() {
            bail!(
                "token_ids expected integer dtype but received {:?}",
                token_ids.dtype()
            );
        }
        Ok((batch, seq))
    }

    fn ensure_id_range(&self, flat_ids: &Tensor) -> Result<()> {
        let min_id = flat_ids.min_all()?.to_scalar::<i64>()?;
        if min_id < 0 {
            bail!("encountered negative token id {}", min_id);
        }
        let max_id = flat_ids.max_all()?.to_scalar::<i64>()?;
        let vocab = self.config.vocab_size as i64;
        if max_id >= vocab {
            bail!("token id {} exceeds vocab size {}", max_id, vocab);
        }
        Ok(())
    }
}
