//! Decoder capability: raw bytes -> asset.
//!
//! Used both for fresh downloads and for rehydrating storage-tier entries.
//! Decoding runs on tokio's blocking pool, so implementations may be slow.

use std::marker::PhantomData;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Malformed asset data: {0}")]
    Malformed(String),

    #[error("Empty asset data")]
    Empty,

    #[error("JSON decode error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Turns fetched bytes into a decoded, immutable asset.
pub trait Decoder: Send + Sync + 'static {
    /// The decoded representation held by the memory tier.
    type Asset: Send + Sync + 'static;

    /// Decode a complete byte buffer.
    fn decode(&self, bytes: &Bytes) -> Result<Self::Asset, DecodeError>;
}

/// Identity decoder: the asset is the raw bytes.
///
/// Rejects empty payloads so a truncated storage file is treated as corrupt.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesDecoder;

impl Decoder for BytesDecoder {
    type Asset = Bytes;

    fn decode(&self, bytes: &Bytes) -> Result<Bytes, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }
        Ok(bytes.clone())
    }
}

/// Decodes JSON documents into `T`.
pub struct JsonDecoder<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonDecoder<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Decoder for JsonDecoder<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    type Asset = T;

    fn decode(&self, bytes: &Bytes) -> Result<T, DecodeError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
