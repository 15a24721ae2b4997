//! Error types
//!
//! Each layer has its own error enum; `Error` is the crate-level union used
//! by bootstrap and server code.

use std::path::PathBuf;

use crate::bridge::BridgeError;
use crate::engine::EngineError;
use crate::signaling::SignalingError;

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-level error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error (bind, filesystem)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Media engine request failed
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Signaling request rejected
    #[error(transparent)]
    Signaling(#[from] SignalingError),

    /// Transcoding bridge failure
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// Filesystem watcher could not be created
    #[error("watcher error: {0}")]
    Watcher(#[from] notify::Error),

    /// The HLS output directory does not exist
    #[error("output directory does not exist: {}", .0.display())]
    OutputDirMissing(PathBuf),
}
