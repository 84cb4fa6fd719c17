//! Per-stream publisher.
//!
//! Drives one stream through
//! `Idle -> Connecting -> Offering -> Exchanging -> Active -> Teardown -> Backoff -> Connecting ...`
//! until cancelled. Every attempt owns a fresh [`PublisherSession`] that is
//! fully released before the next attempt starts.
//!
//! Ordering within an attempt:
//! 1. open media source, create peer connection
//! 2. create the `meta` data channel and attach tracks (before the offer)
//! 3. create offer, install locally, wait for ICE gathering
//! 4. POST to WHIP, install the answer
//! 5. hold until media or peer connection fails, or cancellation

pub mod backoff;
pub mod session;

pub use backoff::Backoff;
pub use session::PublisherSession;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, IceServerConfig, MetaRtsp, StreamConfig};
use crate::error::PublishError;
use crate::media::{MediaSourceFactory, RtspSourceFactory};
use crate::meta::{MetaEmitter, META_CHANNEL_LABEL};
use crate::peer::{PeerConnectionFactory, WebRtcPeerFactory};
use crate::signaling::{HttpWhipClientFactory, WhipClientFactory};

/// Lifecycle state of a publisher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublisherState {
    Idle,
    Connecting,
    Offering,
    Exchanging,
    Active,
    Teardown,
    Backoff,
    Terminated,
}

impl fmt::Display for PublisherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PublisherState::Idle => "idle",
            PublisherState::Connecting => "connecting",
            PublisherState::Offering => "offering",
            PublisherState::Exchanging => "exchanging",
            PublisherState::Active => "active",
            PublisherState::Teardown => "teardown",
            PublisherState::Backoff => "backoff",
            PublisherState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Factories for the external collaborators of a session
#[derive(Clone)]
pub struct Backends {
    pub media: Arc<dyn MediaSourceFactory>,
    pub peers: Arc<dyn PeerConnectionFactory>,
    pub whip: Arc<dyn WhipClientFactory>,
}

impl Backends {
    /// RTSP via retina, WebRTC via webrtc-rs, WHIP via hyper
    pub fn production(config: &AppConfig) -> Self {
        Self {
            media: Arc::new(RtspSourceFactory),
            peers: Arc::new(WebRtcPeerFactory::new(config.ice_gathering_timeout())),
            whip: Arc::new(HttpWhipClientFactory),
        }
    }
}

/// Knobs shared by every publisher in the process
#[derive(Debug, Clone)]
pub struct PublisherSettings {
    pub ice_servers: Vec<IceServerConfig>,
    pub media_options: BTreeMap<String, String>,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub whip_timeout: Duration,
    pub meta_rtsp: MetaRtsp,
}

impl From<&AppConfig> for PublisherSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            ice_servers: config.ice_servers.clone(),
            media_options: config.ffmpeg_options.clone(),
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
            whip_timeout: config.whip_timeout(),
            meta_rtsp: config.meta_rtsp,
        }
    }
}

pub struct Publisher {
    stream: StreamConfig,
    settings: Arc<PublisherSettings>,
    backends: Backends,
    cancel: CancellationToken,
    state_tx: watch::Sender<PublisherState>,
}

impl Publisher {
    pub fn new(
        stream: StreamConfig,
        settings: Arc<PublisherSettings>,
        backends: Backends,
        cancel: CancellationToken,
    ) -> Self {
        let (state_tx, _) = watch::channel(PublisherState::Idle);
        Self {
            stream,
            settings,
            backends,
            cancel,
            state_tx,
        }
    }

    pub fn name(&self) -> &str {
        &self.stream.name
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<PublisherState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: PublisherState) {
        log::debug!("[{}] state -> {}", self.stream.name, state);
        self.state_tx.send_replace(state);
    }

    /// Publish until cancelled, reconnecting after every failure.
    pub async fn run(&self) {
        let mut backoff = Backoff::new(self.settings.initial_backoff, self.settings.max_backoff);

        loop {
            let reason = self.attempt(&mut backoff).await;
            if reason.is_cancelled() || self.cancel.is_cancelled() {
                break;
            }
            log::warn!("[{}] publish loop error: {}", self.stream.name, reason);

            self.set_state(PublisherState::Backoff);
            let delay = backoff.next_delay();
            log::info!(
                "[{}] reconnecting in {}s...",
                self.stream.name,
                delay.as_secs()
            );

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(PublisherState::Terminated);
        log::info!("[{}] publisher stopped", self.stream.name);
    }

    /// One session from allocation to release. Returns why it ended.
    async fn attempt(&self, backoff: &mut Backoff) -> PublishError {
        self.set_state(PublisherState::Connecting);
        log::info!(
            "[{}] starting publisher -> {}",
            self.stream.name,
            self.stream.whip_url
        );

        let mut session = PublisherSession::new();
        let reason = tokio::select! {
            _ = self.cancel.cancelled() => PublishError::Cancelled,
            reason = self.publish(&mut session, backoff) => reason,
        };

        // Not raced against cancellation: teardown always completes
        self.set_state(PublisherState::Teardown);
        for e in session.release().await {
            log::warn!("[{}] {}", self.stream.name, e);
        }

        reason
    }

    async fn publish(&self, session: &mut PublisherSession, backoff: &mut Backoff) -> PublishError {
        if let Err(e) = self.connect(session).await {
            return e;
        }

        self.set_state(PublisherState::Active);
        backoff.reset();
        log::info!("[{}] publishing established.", self.stream.name);

        hold(session).await
    }

    /// Build the session up to an installed remote answer.
    async fn connect(&self, session: &mut PublisherSession) -> Result<(), PublishError> {
        let media = self
            .backends
            .media
            .open(&self.stream, &self.settings.media_options)
            .await?;
        let video = media.video_track();
        let audio = media.audio_track();
        session.media = Some(media);

        let peer = self
            .backends
            .peers
            .create(&self.stream.name, &self.settings.ice_servers)
            .await?;
        session.peer = Some(peer.clone());

        self.set_state(PublisherState::Offering);

        // Non-trickle: anything added after the offer never reaches the server
        let channel = peer.create_data_channel(META_CHANNEL_LABEL).await?;
        session.meta = Some(MetaEmitter::attach(
            &channel,
            &self.stream,
            self.settings.meta_rtsp,
        ));
        session.meta_channel = Some(channel);

        if let Some(track) = video {
            peer.add_track(track).await?;
        }
        if let Some(track) = audio {
            peer.add_track(track).await?;
        }

        let offer = peer.create_offer().await?;

        self.set_state(PublisherState::Exchanging);
        let whip = session
            .whip
            .insert(self.backends.whip.create(self.settings.whip_timeout));
        let answer = whip.exchange(&self.stream.whip_url, &offer).await?;
        if answer.trim().is_empty() {
            return Err(PublishError::Signaling("empty SDP answer".into()));
        }

        peer.set_remote_answer(answer).await
    }
}

/// Wait for the first failure reported by the media source or peer connection.
async fn hold(session: &PublisherSession) -> PublishError {
    let media_failed = async {
        match &session.media {
            Some(media) => media.failed().await,
            None => std::future::pending().await,
        }
    };
    let peer_failed = async {
        match &session.peer {
            Some(peer) => peer.failed().await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        reason = media_failed => reason,
        reason = peer_failed => reason,
    }
}
