//! WHIP client - WebRTC-HTTP Ingestion Protocol offer/answer exchange.
//!
//! One POST per session:
//! 1. POST the gathered SDP offer with `Content-Type: application/sdp`
//! 2. Accept 200 or 201, whatever the response content type
//! 3. Return the body verbatim as the SDP answer
//!
//! The `Location` header is ignored. Sessions end by closing the peer
//! connection, not with DELETE.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::CONTENT_TYPE;
use hyper::{Method, Request, StatusCode};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use parking_lot::Mutex;
use thiserror::Error;

use crate::error::ReleaseError;

/// Longest response body prefix kept in an error
pub const MAX_ERROR_BODY_CHARS: usize = 256;

pub type HttpClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

/// Failure of a WHIP POST.
#[derive(Error, Debug)]
pub enum WhipExchangeError {
    #[error("invalid WHIP request: {0}")]
    InvalidRequest(String),

    #[error("WHIP request failed: {0}")]
    Transport(String),

    #[error("WHIP request timed out after {0:?}")]
    Timeout(Duration),

    #[error("WHIP server returned {status}: {body}")]
    Status { status: u16, body: String },
}

impl WhipExchangeError {
    /// HTTP status of the response, if one was received
    pub fn status(&self) -> Option<u16> {
        match self {
            WhipExchangeError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Build an HTTP(S) client with webpki roots for TLS
pub fn build_http_client() -> HttpClient {
    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .build();

    Client::builder(TokioExecutor::new()).build(https)
}

/// POST `offer_sdp` to `url` and return the SDP answer.
///
/// `timeout` bounds the whole exchange, body included.
pub async fn whip_exchange(
    client: &HttpClient,
    url: &str,
    offer_sdp: &str,
    timeout: Duration,
) -> Result<String, WhipExchangeError> {
    match url::Url::parse(url) {
        Ok(u) if u.scheme() == "http" || u.scheme() == "https" => {}
        Ok(u) => {
            return Err(WhipExchangeError::InvalidRequest(format!(
                "unsupported scheme '{}'",
                u.scheme()
            )))
        }
        Err(e) => return Err(WhipExchangeError::InvalidRequest(e.to_string())),
    }
    if offer_sdp.is_empty() {
        return Err(WhipExchangeError::InvalidRequest("empty SDP offer".into()));
    }

    let request = Request::builder()
        .method(Method::POST)
        .uri(url)
        .header(CONTENT_TYPE, "application/sdp")
        .body(Full::new(Bytes::from(offer_sdp.to_owned())))
        .map_err(|e| WhipExchangeError::InvalidRequest(e.to_string()))?;

    let exchange = async {
        let response = client
            .request(request)
            .await
            .map_err(|e| WhipExchangeError::Transport(e.to_string()))?;

        let status = response.status();

        let body_bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| WhipExchangeError::Transport(format!("failed to read body: {}", e)))?
            .to_bytes();

        let body = String::from_utf8_lossy(&body_bytes).into_owned();

        if status != StatusCode::CREATED && status != StatusCode::OK {
            return Err(WhipExchangeError::Status {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        Ok(body)
    };

    tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| WhipExchangeError::Timeout(timeout))?
}

fn truncate_body(body: &str) -> String {
    body.chars().take(MAX_ERROR_BODY_CHARS).collect()
}

/// Per-session HTTP client used for the WHIP POST.
#[async_trait]
pub trait WhipTransport: Send + Sync {
    async fn exchange(&self, url: &str, offer_sdp: &str) -> Result<String, WhipExchangeError>;

    /// Release the client and its pooled connections
    async fn close(&self) -> Result<(), ReleaseError>;
}

/// Creates one [`WhipTransport`] per publisher session.
pub trait WhipClientFactory: Send + Sync {
    fn create(&self, timeout: Duration) -> Box<dyn WhipTransport>;
}

/// hyper-backed [`WhipTransport`]
pub struct HttpWhipClient {
    client: Mutex<Option<HttpClient>>,
    timeout: Duration,
}

impl HttpWhipClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Mutex::new(Some(build_http_client())),
            timeout,
        }
    }
}

#[async_trait]
impl WhipTransport for HttpWhipClient {
    async fn exchange(&self, url: &str, offer_sdp: &str) -> Result<String, WhipExchangeError> {
        // Client is a cheap handle over a shared pool
        let client = self
            .client
            .lock()
            .clone()
            .ok_or_else(|| WhipExchangeError::Transport("client closed".into()))?;
        whip_exchange(&client, url, offer_sdp, self.timeout).await
    }

    async fn close(&self) -> Result<(), ReleaseError> {
        self.client.lock().take();
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HttpWhipClientFactory;

impl WhipClientFactory for HttpWhipClientFactory {
    fn create(&self, timeout: Duration) -> Box<dyn WhipTransport> {
        Box::new(HttpWhipClient::new(timeout))
    }
}
