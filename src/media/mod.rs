//! Media source seam.
//!
//! A media source pulls one upstream camera and exposes at most one video
//! and one audio track. [`rtsp`] implements it with retina.

pub mod rtsp;

pub use rtsp::*;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::config::StreamConfig;
use crate::error::{PublishError, ReleaseError};
use crate::peer::LocalTrack;

#[async_trait]
pub trait MediaSource: Send + Sync {
    fn video_track(&self) -> Option<LocalTrack>;

    fn audio_track(&self) -> Option<LocalTrack>;

    /// Resolves with a media source error once ingest has died
    async fn failed(&self) -> PublishError;

    /// Stop ingest. Returns once upstream resources are released.
    async fn stop(&self) -> Result<(), ReleaseError>;
}

#[async_trait]
pub trait MediaSourceFactory: Send + Sync {
    /// Open the upstream source; returns when its tracks are known
    async fn open(
        &self,
        stream: &StreamConfig,
        options: &BTreeMap<String, String>,
    ) -> Result<Box<dyn MediaSource>, PublishError>;
}
