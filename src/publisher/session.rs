//! Resources owned by a single publish attempt.

use std::sync::Arc;

use crate::error::ReleaseError;
use crate::media::MediaSource;
use crate::meta::MetaEmitter;
use crate::peer::{DataChannel, PeerConnection};
use crate::signaling::WhipTransport;

/// Everything one attempt allocates. Released as a unit by [`PublisherSession::release`].
#[derive(Default)]
pub struct PublisherSession {
    pub media: Option<Box<dyn MediaSource>>,
    pub peer: Option<Arc<dyn PeerConnection>>,
    pub whip: Option<Box<dyn WhipTransport>>,
    /// Kept alive here; the emitter only holds a weak reference
    pub meta_channel: Option<Arc<dyn DataChannel>>,
    pub meta: Option<Arc<MetaEmitter>>,
}

impl PublisherSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop media, close the peer connection and the HTTP client.
    ///
    /// Each release is attempted regardless of the others failing; every
    /// failure is returned.
    pub async fn release(mut self) -> Vec<ReleaseError> {
        let mut errors = Vec::new();

        if let Some(media) = self.media.take() {
            if let Err(e) = media.stop().await {
                errors.push(e);
            }
        }

        if let Some(peer) = self.peer.take() {
            if let Err(e) = peer.close().await {
                errors.push(e);
            }
        }

        if let Some(whip) = self.whip.take() {
            if let Err(e) = whip.close().await {
                errors.push(e);
            }
        }

        self.meta_channel.take();
        self.meta.take();
        errors
    }
}
