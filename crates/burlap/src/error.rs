//! Error taxonomy for the dependency walk
//!
//! Every variant is terminal for the traversal that produced it: the walk
//! surfaces the error once on its output stream and emits no further
//! records. Partial bundles are not meaningful artifacts, so there are no
//! retries and no recoverable cases.

use std::path::PathBuf;

use thiserror::Error;

/// A fatal traversal failure.
#[derive(Debug, Error)]
pub enum WalkError {
    /// A reference could not be resolved to any existing location.
    #[error("module not found: \"{reference}\" from file {requester}")]
    NotFound {
        /// The literal reference as written in the requesting source
        reference: String,
        /// Location of the requesting module ("/" for the synthetic root)
        requester: String,
    },

    /// A resolved location could not be read.
    #[error("failed to read {file}")]
    Io {
        file: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A configured source transform failed.
    #[error("transform '{transform}' failed on {file}")]
    Transform {
        file: PathBuf,
        transform: String,
        #[source]
        source: anyhow::Error,
    },

    /// Static reference extraction failed on malformed source.
    #[error("parsing file {file}: {message}")]
    Parse { file: PathBuf, message: String },
}

impl WalkError {
    /// The location this error is attributed to, when it has one.
    pub fn file(&self) -> Option<&std::path::Path> {
        match self {
            WalkError::NotFound { .. } => None,
            WalkError::Io { file, .. }
            | WalkError::Transform { file, .. }
            | WalkError::Parse { file, .. } => Some(file),
        }
    }
}
