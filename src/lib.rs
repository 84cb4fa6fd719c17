//! rtsp-whip-bridge - republish RTSP cameras to WHIP endpoints
//!
//! For every configured stream:
//! - pull the camera over RTSP
//! - publish its tracks over WebRTC with a single WHIP POST (non-trickle)
//! - send one JSON metadata message on the `meta` data channel when it opens
//! - reconnect with exponential backoff on any failure
//!
//! Streams are independent; the [`Supervisor`] runs them side by side and
//! stops them all on shutdown.

pub mod config;
pub mod error;
pub mod logging;
pub mod media;
pub mod meta;
pub mod peer;
pub mod publisher;
pub mod signaling;
pub mod supervisor;

pub use config::{AppConfig, ConfigError, IceServerConfig, MetaRtsp, StreamConfig};
pub use error::{PublishError, ReleaseError};
pub use media::{MediaSource, MediaSourceFactory, RtspSourceFactory};
pub use meta::{build_payload, MetaEmitter, META_CHANNEL_LABEL};
pub use peer::{
    DataChannel, LocalTrack, OnOpenHandler, PeerConnection, PeerConnectionFactory,
    WebRtcPeerFactory,
};
pub use publisher::{Backends, Backoff, Publisher, PublisherSettings, PublisherState};
pub use signaling::{whip_exchange, WhipClientFactory, WhipExchangeError, WhipTransport};
pub use supervisor::Supervisor;
