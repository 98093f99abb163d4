//! Lightweight validation helpers shared across layer components.
//!
//! Every helper takes a `context` label naming the tensor being checked
//! (e.g. `"linear.weight"`) so failures point at the offending parameter.
//! They return `candle_core::Result<()>` so call sites can propagate errors
//! with `?` instead of panicking.

use candle_core::{DType, Error, Result, Tensor};

/// Ensures a tensor has exactly `rank` dimensions.
pub fn expect_rank(context: &str, tensor: &Tensor, rank: usize) -> Result<()> {
    let actual = tensor.rank();
    if actual == rank {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{context}: expected rank {rank}, got {actual} ({:?})",
            tensor.dims()
        )))
    }
}

/// Ensures a tensor matches the expected dimensions exactly.
pub fn expect_shape(context: &str, tensor: &Tensor, expected: &[usize]) -> Result<()> {
    let actual = tensor.dims();
    if actual == expected {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{context}: expected shape {:?}, got {:?}",
            expected, actual
        )))
    }
}

/// Validates the `(batch, seq, hidden)` convention with a known hidden size.
pub fn expect_batch_seq_hidden(context: &str, tensor: &Tensor, hidden: usize) -> Result<()> {
    match tensor.dims() {
        [_, _, actual_hidden] if *actual_hidden == hidden => Ok(()),
        dims => Err(Error::Msg(format!(
            "{context}: expected (batch, seq, {}) layout, got {:?}",
            hidden, dims
        ))),
    }
}

/// Checks the tensor dtype is one of the allowed values.
pub fn expect_dtype_in(context: &str, tensor: &Tensor, allowed: &[DType]) -> Result<()> {
    let dtype = tensor.dtype();
    if allowed.contains(&dtype) {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{context}: expected dtype in {:?}, got {:?}",
            allowed, dtype
        )))
    }
}

/// Checks that two tensors share a dtype.
pub fn expect_same_dtype(
    context: &str,
    tensor: &Tensor,
    other_context: &str,
    other: &Tensor,
) -> Result<()> {
    if tensor.dtype() == other.dtype() {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{context} has dtype {:?} but {other_context} has {:?}",
            tensor.dtype(),
            other.dtype()
        )))
    }
}

/// Parameters must be contiguous so they can be updated in place.
pub fn expect_contiguous(context: &str, tensor: &Tensor) -> Result<()> {
    if tensor.is_contiguous() {
        Ok(())
    } else {
        Err(Error::Msg(format!("{context}: tensor must be contiguous")))
    }
}

/// Rejects casts between floating point and integer dtypes.
pub fn ensure_cast_supported(context: &str, from: DType, to: DType) -> Result<()> {
    if from.is_float() == to.is_float() {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{context}: unsupported cast from {:?} to {:?}",
            from, to
        )))
    }
}
