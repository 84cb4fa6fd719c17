//! webrtc-rs implementation of the peer connection seam.
//!
//! Wraps RTCPeerConnection and handles the non-trickle offer: the offer is
//! only returned once ICE gathering has completed (or timed out), so the
//! SDP carries every candidate.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Notify};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use super::{DataChannel, LocalTrack, OnOpenHandler, PeerConnection, PeerConnectionFactory};
use crate::config::IceServerConfig;
use crate::error::{PublishError, ReleaseError};

/// Creates one webrtc-rs peer connection per publisher session
pub struct WebRtcPeerFactory {
    ice_gathering_timeout: Duration,
}

impl WebRtcPeerFactory {
    pub fn new(ice_gathering_timeout: Duration) -> Self {
        Self {
            ice_gathering_timeout,
        }
    }
}

#[async_trait]
impl PeerConnectionFactory for WebRtcPeerFactory {
    async fn create(
        &self,
        stream: &str,
        ice_servers: &[IceServerConfig],
    ) -> Result<Arc<dyn PeerConnection>, PublishError> {
        let peer = WebRtcPeer::new(stream, ice_servers, self.ice_gathering_timeout).await?;
        Ok(Arc::new(peer))
    }
}

/// A single send-only publisher peer connection
pub struct WebRtcPeer {
    stream: String,
    peer_connection: Arc<RTCPeerConnection>,
    state_rx: watch::Receiver<RTCPeerConnectionState>,
    ice_complete: Arc<Notify>,
    ice_gathering_timeout: Duration,
}

impl WebRtcPeer {
    pub async fn new(
        stream: &str,
        ice_servers: &[IceServerConfig],
        ice_gathering_timeout: Duration,
    ) -> Result<Self, PublishError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(|e| {
            PublishError::PeerConnection(format!("failed to register codecs: {}", e))
        })?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(|e| {
            PublishError::PeerConnection(format!("failed to register interceptors: {}", e))
        })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers.iter().map(|s| s.to_rtc_ice_server()).collect(),
            ..Default::default()
        };

        let peer_connection = api.new_peer_connection(rtc_config).await.map_err(|e| {
            PublishError::PeerConnection(format!("failed to create peer connection: {}", e))
        })?;
        let peer_connection = Arc::new(peer_connection);

        let (state_tx, state_rx) = watch::channel(RTCPeerConnectionState::New);
        let tag = stream.to_string();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                log::debug!("[{}] peer connection state: {}", tag, state);
                state_tx.send_replace(state);
                Box::pin(async {})
            },
        ));

        // Registered up front so a fast gatherer cannot complete unobserved
        let ice_complete = Arc::new(Notify::new());
        let ice_complete_clone = ice_complete.clone();
        peer_connection.on_ice_gathering_state_change(Box::new(move |state| {
            if state == RTCIceGathererState::Complete {
                ice_complete_clone.notify_one();
            }
            Box::pin(async {})
        }));

        Ok(Self {
            stream: stream.to_string(),
            peer_connection,
            state_rx,
            ice_complete,
            ice_gathering_timeout,
        })
    }
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, PublishError> {
        let init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };

        let channel = self
            .peer_connection
            .create_data_channel(label, Some(init))
            .await
            .map_err(|e| PublishError::Signaling(format!("failed to create data channel: {}", e)))?;

        Ok(Arc::new(WebRtcDataChannel { channel }))
    }

    async fn add_track(&self, track: LocalTrack) -> Result<(), PublishError> {
        let rtp_sender = self
            .peer_connection
            .add_track(track)
            .await
            .map_err(|e| PublishError::Signaling(format!("failed to add track: {}", e)))?;

        // Interceptors only run while RTCP is being read
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while rtp_sender.read(&mut rtcp_buf).await.is_ok() {}
        });

        Ok(())
    }

    async fn create_offer(&self) -> Result<String, PublishError> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| PublishError::Signaling(format!("failed to create offer: {}", e)))?;

        self.peer_connection
            .set_local_description(offer)
            .await
            .map_err(|e| {
                PublishError::Signaling(format!("failed to set local description: {}", e))
            })?;

        tokio::select! {
            _ = self.ice_complete.notified() => {}
            _ = tokio::time::sleep(self.ice_gathering_timeout) => {
                log::debug!(
                    "[{}] ICE gathering incomplete after {:?}, posting candidates gathered so far",
                    self.stream,
                    self.ice_gathering_timeout
                );
            }
        }

        let local_desc = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| PublishError::Signaling("no local description available".into()))?;

        Ok(local_desc.sdp)
    }

    async fn set_remote_answer(&self, sdp: String) -> Result<(), PublishError> {
        let answer = RTCSessionDescription::answer(sdp)
            .map_err(|e| PublishError::Signaling(format!("invalid answer SDP: {}", e)))?;

        self.peer_connection
            .set_remote_description(answer)
            .await
            .map_err(|e| {
                PublishError::Signaling(format!("failed to set remote description: {}", e))
            })
    }

    async fn failed(&self) -> PublishError {
        let mut state_rx = self.state_rx.clone();
        let result = state_rx
            .wait_for(|state| {
                matches!(
                    state,
                    RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed
                )
            })
            .await
            .map(|state| state.to_string());

        match result {
            Ok(state) => PublishError::PeerConnection(format!("connection {}", state)),
            Err(_) => PublishError::PeerConnection("state channel closed".into()),
        }
    }

    async fn close(&self) -> Result<(), ReleaseError> {
        self.peer_connection
            .close()
            .await
            .map_err(|e| ReleaseError::new("peer connection", e.to_string()))
    }
}

/// The `meta` channel on a webrtc-rs peer connection
pub struct WebRtcDataChannel {
    channel: Arc<RTCDataChannel>,
}

#[async_trait]
impl DataChannel for WebRtcDataChannel {
    fn on_open(&self, handler: OnOpenHandler) {
        self.channel.on_open(handler);
    }

    async fn send_text(&self, text: String) -> Result<(), PublishError> {
        self.channel
            .send_text(text)
            .await
            .map(|_| ())
            .map_err(|e| PublishError::PeerConnection(format!("data channel send failed: {}", e)))
    }
}
