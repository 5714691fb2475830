// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/watchbarn

//! Error types for the capture → track → alert pipeline

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy: transient I/O is retried by the owning component,
/// degenerate input is a normal no-op, configuration errors are rejected
/// at load time, and only whole-pipeline failures are fatal.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Camera transport failure (reconnected with backoff, never fatal)
    #[error("capture error on camera {camera_id}: {message}")]
    Capture { camera_id: String, message: String },

    /// Detector call failed or timed out; the frame tick is skipped
    #[error("detector error: {0}")]
    Detector(String),

    /// Sink or TTS delivery failure after retries were exhausted
    #[error("delivery to sink '{sink}' failed: {message}")]
    Delivery { sink: String, message: String },

    /// Configuration rejected at load time
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
