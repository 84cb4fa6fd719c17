//! Error types for the publish loop.
//!
//! Everything except [`PublishError::Cancelled`] is recoverable: the
//! publisher logs it, tears the session down and reconnects after backoff.

use thiserror::Error;

use crate::signaling::WhipExchangeError;

/// Failure of a single publish attempt.
#[derive(Error, Debug)]
pub enum PublishError {
    /// RTSP ingest could not be opened or died mid-stream
    #[error("media source error: {0}")]
    MediaSource(String),

    /// WHIP HTTP exchange failed
    #[error(transparent)]
    Whip(#[from] WhipExchangeError),

    /// SDP could not be produced, parsed or installed
    #[error("signaling error: {0}")]
    Signaling(String),

    /// ICE/DTLS/transport failure reported by the peer connection
    #[error("peer connection error: {0}")]
    PeerConnection(String),

    /// External shutdown; never retried
    #[error("cancelled")]
    Cancelled,
}

impl PublishError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PublishError::Cancelled)
    }
}

/// Failure to release one session resource during teardown.
#[derive(Error, Debug)]
#[error("failed to release {resource}: {reason}")]
pub struct ReleaseError {
    pub resource: &'static str,
    pub reason: String,
}

impl ReleaseError {
    pub fn new(resource: &'static str, reason: impl Into<String>) -> Self {
        Self {
            resource,
            reason: reason.into(),
        }
    }
}
