//! One-shot metadata sent on the `meta` data channel.
//!
//! The payload is `{name, rtsp, ts, ...stream.meta}` with user keys merged
//! last, so they shadow the built-ins. It is sent once, when the channel
//! first opens; failures are logged and never end the session.

use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Map, Value};

use crate::config::{MetaRtsp, StreamConfig};
use crate::peer::DataChannel;

/// Label of the metadata data channel
pub const META_CHANNEL_LABEL: &str = "meta";

/// Strip user-info from a URL; unparseable input is returned unchanged.
pub fn redact_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut url) if !url.username().is_empty() || url.password().is_some() => {
            let _ = url.set_username("");
            let _ = url.set_password(None);
            url.to_string()
        }
        _ => raw.to_string(),
    }
}

/// Build the payload object for `stream` at wall-clock time `ts`.
pub fn build_payload(stream: &StreamConfig, rtsp: MetaRtsp, ts: f64) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("name".into(), Value::String(stream.name.clone()));
    match rtsp {
        MetaRtsp::Full => {
            payload.insert("rtsp".into(), Value::String(stream.rtsp_url.clone()));
        }
        MetaRtsp::Redacted => {
            payload.insert("rtsp".into(), Value::String(redact_url(&stream.rtsp_url)));
        }
        MetaRtsp::Omit => {}
    }
    payload.insert("ts".into(), Value::from(ts));

    for (key, value) in &stream.meta {
        payload.insert(key.clone(), value.clone());
    }
    payload
}

/// Seconds since the Unix epoch as a float
pub fn unix_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Sends the metadata payload once per session.
///
/// The open handler is `FnOnce` and registered once, so a session can
/// never emit twice.
pub struct MetaEmitter {
    stream: StreamConfig,
    rtsp: MetaRtsp,
}

impl MetaEmitter {
    /// Bind a new emitter to `channel`'s open event.
    pub fn attach(
        channel: &Arc<dyn DataChannel>,
        stream: &StreamConfig,
        rtsp: MetaRtsp,
    ) -> Arc<MetaEmitter> {
        let emitter = Arc::new(MetaEmitter {
            stream: stream.clone(),
            rtsp,
        });

        // Weak: the channel owns the handler, the handler must not own the channel
        let weak_channel: Weak<dyn DataChannel> = Arc::downgrade(channel);
        let handler_emitter = emitter.clone();
        channel.on_open(Box::new(move || {
            Box::pin(async move {
                if let Some(channel) = weak_channel.upgrade() {
                    handler_emitter.emit(channel.as_ref()).await;
                }
            })
        }));

        emitter
    }

    async fn emit(&self, channel: &dyn DataChannel) {
        let payload = build_payload(&self.stream, self.rtsp, unix_time());
        let text = match serde_json::to_string(&payload) {
            Ok(text) => text,
            Err(e) => {
                log::warn!("[{}] meta build error: {}", self.stream.name, e);
                return;
            }
        };

        match channel.send_text(text).await {
            Ok(()) => log::info!("[{}] sent meta once", self.stream.name),
            Err(e) => log::warn!("[{}] meta send error: {}", self.stream.name, e),
        }
    }
}
