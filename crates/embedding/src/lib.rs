//! Embedding tables for virtual prefix tokens.

pub mod token;

pub use token::{TokenEmbedding, TokenEmbeddingConfig};
