//! Peer connection seam.
//!
//! The publisher drives a [`PeerConnection`] through offer/answer without
//! knowing which WebRTC stack is underneath. [`connection`] implements it
//! on webrtc-rs.

pub mod connection;

pub use connection::*;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use webrtc::track::track_local::TrackLocal;

use crate::config::IceServerConfig;
use crate::error::{PublishError, ReleaseError};

/// Local media track handed from the media source to the peer connection
pub type LocalTrack = Arc<dyn TrackLocal + Send + Sync>;

/// Handler for a data channel `open` event. Runs at most once.
pub type OnOpenHandler =
    Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send + 'static>> + Send + Sync>;

/// Reliable, ordered message channel negotiated in the initial SDP.
#[async_trait]
pub trait DataChannel: Send + Sync {
    /// Register the `open` handler, replacing any earlier one
    fn on_open(&self, handler: OnOpenHandler);

    async fn send_text(&self, text: String) -> Result<(), PublishError>;
}

#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Must be called before [`PeerConnection::create_offer`] to be negotiated
    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, PublishError>;

    /// Add a send-only track. Must be called before the offer.
    async fn add_track(&self, track: LocalTrack) -> Result<(), PublishError>;

    /// Create an offer, install it as the local description and wait for
    /// ICE gathering. Returns the local SDP including gathered candidates.
    async fn create_offer(&self) -> Result<String, PublishError>;

    /// Install the remote SDP with type `answer`
    async fn set_remote_answer(&self, sdp: String) -> Result<(), PublishError>;

    /// Resolves once the connection has failed or closed underneath us
    async fn failed(&self) -> PublishError;

    async fn close(&self) -> Result<(), ReleaseError>;
}

#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    /// `stream` only tags log lines
    async fn create(
        &self,
        stream: &str,
        ice_servers: &[IceServerConfig],
    ) -> Result<Arc<dyn PeerConnection>, PublishError>;
}
