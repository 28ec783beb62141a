//! Error types for the settlement engine
//!
//! Every component owns a closed error enum (`PaymentError`, `CaptureError`,
//! `StoreError`, `QueueError`, `BreakerError`). This module ties them together
//! for callers that only want one error type to propagate.

use std::io;

use thiserror::Error;

use crate::capture::CaptureError;
use crate::isolation::QueueError;
use crate::payment::PaymentError;
use crate::store::StoreError;

/// Result type alias for the settlement engine
pub type Result<T> = std::result::Result<T, Error>;

/// Settlement engine errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Payment state machine error
    #[error(transparent)]
    Payment(#[from] PaymentError),

    /// Capture gate error
    #[error(transparent)]
    Capture(#[from] CaptureError),

    /// Persistence error
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Isolation queue error
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Stable machine-readable error code
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::Payment(e) => e.code(),
            Self::Capture(e) => e.code(),
            Self::Store(e) => e.code(),
            Self::Queue(e) => e.code(),
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "JSON_ERROR",
        }
    }
}
