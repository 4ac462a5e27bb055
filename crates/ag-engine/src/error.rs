// error.rs — Error types for the engine adapter.
//
// Evaluation itself never returns these: a failed evaluation is a
// Decision::EngineUnavailable, not an error. These surface only from the
// administrative operations (policy load/reload).

use std::path::PathBuf;
use thiserror::Error;

/// Errors from loading or uploading a policy.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Failed to read the policy source file.
    #[error("failed to read policy source at {path}: {source}")]
    SourceRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The policy source failed to compile.
    #[error("policy compilation failed: {0}")]
    Compile(#[from] ag_policy::PolicyError),

    /// The engine RPC failed at the transport level.
    #[error("policy engine request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The engine refused the uploaded policy module.
    #[error("policy engine rejected upload (status {status}): {body}")]
    UploadRejected { status: u16, body: String },
}
