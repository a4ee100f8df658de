// src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the KPCA result engine.
///
/// Every fallible operation validates its inputs before touching any stored
/// matrix, so an `Err` leaves the `KpcaResult` exactly as it was.
#[derive(Error, Debug)]
pub enum KpcaError {
    #[error("Dimension mismatch in {context}: expected {expected:?}, found {found:?}.")]
    DimensionMismatch {
        context: &'static str,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("I/O failure on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Failed to serialize KPCA result: {0}")]
    Serialization(String),

    #[error("Failed to deserialize KPCA result: {0}")]
    Deserialization(String),

    #[error("Eigendecomposition failed: {0}")]
    Eigendecomposition(String),
}

impl KpcaError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        KpcaError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn dimension_mismatch(
        context: &'static str,
        expected: (usize, usize),
        found: (usize, usize),
    ) -> Self {
        KpcaError::DimensionMismatch {
            context,
            expected,
            found,
        }
    }
}
