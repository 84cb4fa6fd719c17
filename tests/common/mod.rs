//! In-memory doubles for the media source, peer connection and WHIP client.
//!
//! Every call is recorded as an [`Event`] so tests can check ordering and
//! that each session's resources were released.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;

use rtsp_whip_bridge::{
    AppConfig, Backends, DataChannel, IceServerConfig, LocalTrack, MediaSource,
    MediaSourceFactory, OnOpenHandler, PeerConnection, PeerConnectionFactory, PublishError,
    ReleaseError, StreamConfig, WhipClientFactory, WhipExchangeError, WhipTransport,
};

pub const ANSWER: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    MediaOpened(String),
    MediaStopped(String),
    PeerCreated,
    ChannelCreated(String),
    TrackAdded(String),
    OfferCreated,
    WhipPost(String),
    RemoteAnswer,
    MetaSent(String),
    PeerClosed,
    WhipClosed,
}

#[derive(Debug, Clone)]
pub enum WhipReply {
    Answer(String),
    Status(u16),
    /// Never responds
    Hang,
}

#[derive(Default)]
struct Inner {
    events: Mutex<Vec<Event>>,
    posts: Mutex<Vec<(String, Instant)>>,
    scripts: Mutex<HashMap<String, VecDeque<WhipReply>>>,
    peers: Mutex<Vec<Arc<MockPeer>>>,
    media: Mutex<Vec<Arc<Notify>>>,
    no_video: Mutex<bool>,
    no_audio: Mutex<bool>,
    stop_fails: Mutex<bool>,
    close_fails: Mutex<bool>,
    whip_close_fails: Mutex<bool>,
    meta_send_fails: Mutex<bool>,
    manual_open: Mutex<bool>,
    panic_next_open: Mutex<bool>,
    stop_gate: Mutex<Option<Arc<Notify>>>,
}

impl Inner {
    fn record(&self, event: Event) {
        self.events.lock().push(event);
    }
}

/// Shared handle to all doubles; cheap to clone.
#[derive(Clone, Default)]
pub struct Mocks {
    inner: Arc<Inner>,
}

impl Mocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backends(&self) -> Backends {
        Backends {
            media: Arc::new(self.clone()),
            peers: Arc::new(self.clone()),
            whip: Arc::new(self.clone()),
        }
    }

    /// Replies for `url`, in order; the last one repeats forever
    pub fn script(&self, url: &str, replies: Vec<WhipReply>) {
        self.inner
            .scripts
            .lock()
            .insert(url.to_string(), replies.into_iter().collect());
    }

    pub fn without_video(&self) {
        *self.inner.no_video.lock() = true;
    }

    pub fn without_audio(&self) {
        *self.inner.no_audio.lock() = true;
    }

    pub fn fail_releases(&self) {
        *self.inner.stop_fails.lock() = true;
        *self.inner.close_fails.lock() = true;
        *self.inner.whip_close_fails.lock() = true;
    }

    /// `send_text` on the meta channel errors (after recording the attempt)
    pub fn fail_meta_send(&self) {
        *self.inner.meta_send_fails.lock() = true;
    }

    /// Keep data channels closed after the answer; open them with
    /// [`Mocks::open_latest_channel`]
    pub fn hold_channel_open(&self) {
        *self.inner.manual_open.lock() = true;
    }

    pub async fn open_latest_channel(&self) -> bool {
        let Some(peer) = self.inner.peers.lock().last().cloned() else {
            return false;
        };
        let channel = peer.channel.lock().clone();
        match channel {
            Some(channel) => channel.open().await,
            None => false,
        }
    }

    /// The next `open` on the media factory panics
    pub fn panic_next_open(&self) {
        *self.inner.panic_next_open.lock() = true;
    }

    /// Media `stop()` blocks until the returned gate is notified
    pub fn gate_media_stop(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.inner.stop_gate.lock() = Some(gate.clone());
        gate
    }

    pub fn events(&self) -> Vec<Event> {
        self.inner.events.lock().clone()
    }

    pub fn count(&self, matches: impl Fn(&Event) -> bool) -> usize {
        self.inner.events.lock().iter().filter(|e| matches(e)).count()
    }

    pub fn posts(&self, url: &str) -> Vec<Instant> {
        self.inner
            .posts
            .lock()
            .iter()
            .filter(|(u, _)| u == url)
            .map(|(_, at)| *at)
            .collect()
    }

    pub fn meta_messages(&self) -> Vec<serde_json::Value> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::MetaSent(text) => serde_json::from_str(&text).ok(),
                _ => None,
            })
            .collect()
    }

    /// Make the most recent peer connection report failure
    pub fn fail_latest_peer(&self) {
        if let Some(peer) = self.inner.peers.lock().last() {
            peer.fail.notify_one();
        }
    }

    /// Make the most recent media source report failure
    pub fn fail_latest_media(&self) {
        if let Some(fail) = self.inner.media.lock().last() {
            fail.notify_one();
        }
    }
}

fn track(kind: &str, stream: &str) -> LocalTrack {
    let mime_type = if kind == "video" { "video/H264" } else { "audio/opus" };
    Arc::new(TrackLocalStaticRTP::new(
        RTCRtpCodecCapability {
            mime_type: mime_type.to_owned(),
            ..Default::default()
        },
        kind.to_owned(),
        stream.to_owned(),
    ))
}

pub struct MockMedia {
    inner: Arc<Inner>,
    name: String,
    video: Option<LocalTrack>,
    audio: Option<LocalTrack>,
    fail: Arc<Notify>,
}

#[async_trait]
impl MediaSource for MockMedia {
    fn video_track(&self) -> Option<LocalTrack> {
        self.video.clone()
    }

    fn audio_track(&self) -> Option<LocalTrack> {
        self.audio.clone()
    }

    async fn failed(&self) -> PublishError {
        self.fail.notified().await;
        PublishError::MediaSource("camera went away".into())
    }

    async fn stop(&self) -> Result<(), ReleaseError> {
        self.inner.record(Event::MediaStopped(self.name.clone()));
        let gate = self.inner.stop_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if *self.inner.stop_fails.lock() {
            return Err(ReleaseError::new("media source", "stop raised"));
        }
        Ok(())
    }
}

#[async_trait]
impl MediaSourceFactory for Mocks {
    async fn open(
        &self,
        stream: &StreamConfig,
        _options: &BTreeMap<String, String>,
    ) -> Result<Box<dyn MediaSource>, PublishError> {
        if std::mem::take(&mut *self.inner.panic_next_open.lock()) {
            panic!("media backend bug");
        }
        self.inner.record(Event::MediaOpened(stream.name.clone()));
        let fail = Arc::new(Notify::new());
        self.inner.media.lock().push(fail.clone());

        let video = (!*self.inner.no_video.lock()).then(|| track("video", &stream.name));
        let audio = (!*self.inner.no_audio.lock()).then(|| track("audio", &stream.name));
        Ok(Box::new(MockMedia {
            inner: self.inner.clone(),
            name: stream.name.clone(),
            video,
            audio,
            fail,
        }))
    }
}

pub struct MockChannel {
    inner: Arc<Inner>,
    handler: Mutex<Option<OnOpenHandler>>,
}

impl MockChannel {
    /// Fire `open`; returns false when no handler is registered
    pub async fn open(&self) -> bool {
        let handler = self.handler.lock().take();
        match handler {
            Some(handler) => {
                handler().await;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl DataChannel for MockChannel {
    fn on_open(&self, handler: OnOpenHandler) {
        *self.handler.lock() = Some(handler);
    }

    async fn send_text(&self, text: String) -> Result<(), PublishError> {
        self.inner.record(Event::MetaSent(text));
        if *self.inner.meta_send_fails.lock() {
            return Err(PublishError::PeerConnection("data channel closed".into()));
        }
        Ok(())
    }
}

pub struct MockPeer {
    inner: Arc<Inner>,
    fail: Notify,
    channel: Mutex<Option<Arc<MockChannel>>>,
}

#[async_trait]
impl PeerConnection for MockPeer {
    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, PublishError> {
        self.inner.record(Event::ChannelCreated(label.to_string()));
        let channel = Arc::new(MockChannel {
            inner: self.inner.clone(),
            handler: Mutex::new(None),
        });
        *self.channel.lock() = Some(channel.clone());
        Ok(channel)
    }

    async fn add_track(&self, track: LocalTrack) -> Result<(), PublishError> {
        self.inner.record(Event::TrackAdded(track.id().to_string()));
        Ok(())
    }

    async fn create_offer(&self) -> Result<String, PublishError> {
        self.inner.record(Event::OfferCreated);
        Ok("v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\ns=-\r\nt=0 0\r\n".to_string())
    }

    async fn set_remote_answer(&self, _sdp: String) -> Result<(), PublishError> {
        self.inner.record(Event::RemoteAnswer);
        if *self.inner.manual_open.lock() {
            return Ok(());
        }
        // The channel opens once the transport is up
        let channel = self.channel.lock().clone();
        if let Some(channel) = channel {
            channel.open().await;
        }
        Ok(())
    }

    async fn failed(&self) -> PublishError {
        self.fail.notified().await;
        PublishError::PeerConnection("ICE failed".into())
    }

    async fn close(&self) -> Result<(), ReleaseError> {
        self.inner.record(Event::PeerClosed);
        if *self.inner.close_fails.lock() {
            return Err(ReleaseError::new("peer connection", "close raised"));
        }
        Ok(())
    }
}

#[async_trait]
impl PeerConnectionFactory for Mocks {
    async fn create(
        &self,
        _stream: &str,
        _ice_servers: &[IceServerConfig],
    ) -> Result<Arc<dyn PeerConnection>, PublishError> {
        self.inner.record(Event::PeerCreated);
        let peer = Arc::new(MockPeer {
            inner: self.inner.clone(),
            fail: Notify::new(),
            channel: Mutex::new(None),
        });
        self.inner.peers.lock().push(peer.clone());
        Ok(peer)
    }
}

pub struct MockWhip {
    inner: Arc<Inner>,
}

#[async_trait]
impl WhipTransport for MockWhip {
    async fn exchange(&self, url: &str, _offer_sdp: &str) -> Result<String, WhipExchangeError> {
        self.inner.record(Event::WhipPost(url.to_string()));
        self.inner.posts.lock().push((url.to_string(), Instant::now()));

        let reply = {
            let mut scripts = self.inner.scripts.lock();
            match scripts.get_mut(url) {
                Some(replies) if replies.len() > 1 => replies.pop_front(),
                Some(replies) => replies.front().cloned(),
                None => None,
            }
        };

        match reply.unwrap_or(WhipReply::Answer(ANSWER.to_string())) {
            WhipReply::Answer(sdp) => Ok(sdp),
            WhipReply::Status(status) => Err(WhipExchangeError::Status {
                status,
                body: "scripted failure".into(),
            }),
            WhipReply::Hang => std::future::pending().await,
        }
    }

    async fn close(&self) -> Result<(), ReleaseError> {
        self.inner.record(Event::WhipClosed);
        if *self.inner.whip_close_fails.lock() {
            return Err(ReleaseError::new("HTTP client", "close raised"));
        }
        Ok(())
    }
}

impl WhipClientFactory for Mocks {
    fn create(&self, _timeout: Duration) -> Box<dyn WhipTransport> {
        Box::new(MockWhip {
            inner: self.inner.clone(),
        })
    }
}

/// Config with the given `(name, whip_url)` streams and backoff bounds
pub fn config(streams: &[(&str, &str)], initial: u64, max: u64) -> AppConfig {
    let mut yaml = String::from("streams:\n");
    for (name, whip_url) in streams {
        yaml.push_str(&format!(
            "  - name: {name}\n    rtsp: rtsp://10.0.0.5/{name}\n    whip_url: {whip_url}\n"
        ));
    }
    yaml.push_str(&format!(
        "retry_initial_backoff_seconds: {initial}\nretry_max_backoff_seconds: {max}\n"
    ));
    AppConfig::from_yaml_str(&yaml).unwrap()
}

/// Poll `cond` in small virtual-time steps until it holds
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(600);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Every session must be fully released before the next one for the same
/// stream opens, and nothing may outlive the run.
pub fn assert_sessions_released(events: &[Event], stream: &str) {
    let mut open = false;
    for event in events {
        match event {
            Event::MediaOpened(name) if name == stream => {
                assert!(!open, "session for {stream} opened before previous was released");
                open = true;
            }
            Event::MediaStopped(name) if name == stream => open = false,
            _ => {}
        }
    }
    assert!(!open, "session for {stream} never released");

    let created = events.iter().filter(|e| **e == Event::PeerCreated).count();
    let closed = events.iter().filter(|e| **e == Event::PeerClosed).count();
    assert_eq!(created, closed, "peer connections leaked");
}
