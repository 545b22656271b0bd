//! Reversible byte-stream transforms applied before persisting entries.

use callguard_core::StorageError;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;

/// Stateless compress/decompress pair.
pub trait Compressor: Send + Sync + fmt::Debug {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Compress `data`.
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, StorageError>;

    /// Reverse [`compress`](Self::compress).
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, StorageError>;
}

/// Identity transform.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCompression;

impl Compressor for NoCompression {
    fn name(&self) -> &'static str {
        "none"
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, StorageError> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, StorageError> {
        Ok(data.to_vec())
    }
}

/// Gzip via flate2.
#[derive(Debug, Clone, Copy)]
pub struct GzipCompressor {
    level: u32,
}

impl GzipCompressor {
    /// Create a compressor with the given level (0-9).
    pub fn new(level: u32) -> Self {
        Self {
            level: level.min(9),
        }
    }

    /// Compression level.
    pub fn level(&self) -> u32 {
        self.level
    }
}

impl Default for GzipCompressor {
    fn default() -> Self {
        Self::new(6)
    }
}

impl Compressor for GzipCompressor {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, StorageError> {
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::new(self.level));
        encoder
            .write_all(data)
            .map_err(|e| StorageError::compression(e.to_string()))?;
        encoder
            .finish()
            .map_err(|e| StorageError::compression(e.to_string()))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, StorageError> {
        let mut decoder = GzDecoder::new(data);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| StorageError::compression(e.to_string()))?;
        Ok(out)
    }
}

/// Compression choice for a cache store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum Compression {
    /// Store records as-is.
    #[default]
    None,
    /// Gzip records at `level`.
    Gzip {
        /// Level 0-9.
        level: u32,
    },
}

impl Compression {
    /// Gzip at the default level.
    pub fn gzip() -> Self {
        Self::Gzip { level: 6 }
    }

    /// Build the compressor for this choice.
    pub fn compressor(&self) -> Arc<dyn Compressor> {
        match self {
            Self::None => Arc::new(NoCompression),
            Self::Gzip { level } => Arc::new(GzipCompressor::new(*level)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gzip_shrinks_repetitive_data() {
        let data = b"abcabcabc".repeat(200);
        let gzip = GzipCompressor::default();
        let packed = gzip.compress(&data).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(gzip.decompress(&packed).unwrap(), data);
    }

    #[test]
    fn test_gzip_rejects_garbage() {
        let err = GzipCompressor::default().decompress(b"definitely not gzip");
        assert!(matches!(err, Err(StorageError::Compression(_))));
    }

    #[test]
    fn test_level_is_clamped() {
        assert_eq!(GzipCompressor::new(42).level(), 9);
    }

    #[test]
    fn test_compression_choice() {
        assert_eq!(Compression::default(), Compression::None);
        assert_eq!(Compression::gzip().compressor().name(), "gzip");
        assert_eq!(Compression::None.compressor().name(), "none");
    }
}
