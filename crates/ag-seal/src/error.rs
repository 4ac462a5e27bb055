// error.rs — Error types for the seal subsystem.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading keys or issuing seals.
#[derive(Debug, Error)]
pub enum SealError {
    /// The system RNG failed while generating a key.
    #[error("failed to generate signing key")]
    KeyGeneration,

    /// The key material was not a valid Ed25519 PKCS#8 document.
    #[error("rejected signing key: {0}")]
    KeyRejected(String),

    /// Failed to read the signing key file.
    #[error("failed to read signing key at {path}: {source}")]
    KeyFile {
        path: PathBuf,
        source: std::io::Error,
    },
}
