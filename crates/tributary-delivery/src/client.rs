//! HTTP transport for event-collector and KV-store endpoints.
//!
//! Both endpoint shapes share one pooled `reqwest` client per transport. They
//! differ in URL, credentials and framing: the event collector takes
//! newline-separated `{"event": ...}` envelopes carrying routing metadata,
//! while the KV store's `batch_save` takes a JSON array of raw payloads.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use reqwest::{
    header::{HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    Response, Url,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info_span, warn, Instrument};
use tributary_core::{Record, RecordMeta};

use crate::{
    batch::Batch,
    error::{DeliveryError, Result},
    transport::{Transport, TransportResponse},
};

const MAX_RESPONSE_BODY_SIZE: usize = 64 * 1024;

/// Configuration for the HTTP client shared by all workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Per-request timeout.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
    /// Whether to verify TLS certificates.
    ///
    /// Off by default: collectors commonly run with self-signed certificates.
    pub verify_tls: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            user_agent: concat!("tributary/", env!("CARGO_PKG_VERSION")).to_string(),
            verify_tls: false,
        }
    }
}

/// How records are encoded and joined into a request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadFraming {
    /// One `{"event": payload, ...meta}` object per line.
    EventLines,
    /// A JSON array of raw payloads; metadata is not sent.
    RawArray,
}

/// Event collector endpoint (`/services/collector`).
#[derive(Clone)]
pub struct EventCollectorTarget {
    /// `https` or `http`.
    pub scheme: String,
    /// Collector host name.
    pub host: String,
    /// Collector port.
    pub port: u16,
    /// Collector token sent as `Authorization: Splunk <token>`.
    pub token: String,
}

impl EventCollectorTarget {
    /// Default event collector port.
    pub const DEFAULT_PORT: u16 = 8088;

    /// Creates an HTTPS target on the default port.
    pub fn new(host: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            scheme: "https".to_string(),
            host: host.into(),
            port: Self::DEFAULT_PORT,
            token: token.into(),
        }
    }

    /// Overrides the port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Overrides the URL scheme.
    #[must_use]
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Endpoint URL.
    pub fn url(&self) -> String {
        format!("{}://{}:{}/services/collector", self.scheme, self.host, self.port)
    }
}

impl fmt::Debug for EventCollectorTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventCollectorTarget")
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// KV-store collection endpoint (`.../batch_save`).
#[derive(Clone)]
pub struct KvStoreTarget {
    /// `https` or `http`.
    pub scheme: String,
    /// Management host name.
    pub host: String,
    /// Management port.
    pub port: u16,
    /// App namespace owning the collection.
    pub app: String,
    /// Collection name.
    pub collection: String,
    /// Basic-auth user.
    pub username: String,
    /// Basic-auth password.
    pub password: String,
}

impl KvStoreTarget {
    /// Default management port.
    pub const DEFAULT_PORT: u16 = 8089;

    /// Creates an HTTPS target on the default port.
    pub fn new(
        host: impl Into<String>,
        app: impl Into<String>,
        collection: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            scheme: "https".to_string(),
            host: host.into(),
            port: Self::DEFAULT_PORT,
            app: app.into(),
            collection: collection.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    /// Overrides the port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Overrides the URL scheme.
    #[must_use]
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Endpoint URL.
    pub fn url(&self) -> String {
        format!(
            "{}://{}:{}/servicesNS/nobody/{}/storage/collections/data/{}/batch_save",
            self.scheme, self.host, self.port, self.app, self.collection
        )
    }
}

impl fmt::Debug for KvStoreTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KvStoreTarget")
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("app", &self.app)
            .field("collection", &self.collection)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Clone)]
enum Credentials {
    Header(HeaderValue),
    Basic { username: String, password: String },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Header(_) => f.write_str("Header(<redacted>)"),
            Self::Basic { username, .. } => {
                f.debug_struct("Basic").field("username", username).finish_non_exhaustive()
            },
        }
    }
}

/// Envelope for one event-collector record.
#[derive(Serialize)]
struct EventEnvelope<'a> {
    event: &'a Value,
    #[serde(flatten)]
    meta: &'a RecordMeta,
}

/// Pooled HTTP transport for a single collector endpoint.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    config: ClientConfig,
    url: String,
    credentials: Credentials,
    framing: PayloadFraming,
}

impl HttpTransport {
    /// Transport posting event envelopes to an event collector.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if the URL or token is invalid or the
    /// HTTP client cannot be built.
    pub fn event_collector(target: &EventCollectorTarget, config: ClientConfig) -> Result<Self> {
        let mut header = HeaderValue::from_str(&format!("Splunk {}", target.token))
            .map_err(|_| DeliveryError::configuration("collector token is not a valid header"))?;
        header.set_sensitive(true);

        Self::build(target.url(), Credentials::Header(header), PayloadFraming::EventLines, config)
    }

    /// Transport saving raw payloads into a KV-store collection.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if the URL is invalid or the HTTP client
    /// cannot be built.
    pub fn kv_store(target: &KvStoreTarget, config: ClientConfig) -> Result<Self> {
        let credentials = Credentials::Basic {
            username: target.username.clone(),
            password: target.password.clone(),
        };

        Self::build(target.url(), credentials, PayloadFraming::RawArray, config)
    }

    fn build(
        url: String,
        credentials: Credentials,
        framing: PayloadFraming,
        config: ClientConfig,
    ) -> Result<Self> {
        let parsed = Url::parse(&url)
            .map_err(|e| DeliveryError::configuration(format!("invalid endpoint URL {url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(DeliveryError::configuration(format!(
                "unsupported URL scheme: {}",
                parsed.scheme()
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config, url, credentials, framing })
    }

    /// Body framing used by this transport.
    pub fn framing(&self) -> PayloadFraming {
        self.framing
    }

    fn body(&self, batch: &Batch) -> Bytes {
        let records = batch.records();
        let mut body = BytesMut::with_capacity(batch.encoded_len() + records.len() + 2);

        match self.framing {
            PayloadFraming::EventLines => {
                for (i, record) in records.iter().enumerate() {
                    if i > 0 {
                        body.put_u8(b'\n');
                    }
                    body.put_slice(record);
                }
            },
            PayloadFraming::RawArray => {
                body.put_u8(b'[');
                for (i, record) in records.iter().enumerate() {
                    if i > 0 {
                        body.put_u8(b',');
                    }
                    body.put_slice(record);
                }
                body.put_u8(b']');
            },
        }

        body.freeze()
    }

    async fn read_body(response: Response) -> String {
        match response.bytes().await {
            Ok(bytes) if bytes.len() > MAX_RESPONSE_BODY_SIZE => {
                let truncated = String::from_utf8_lossy(&bytes[..MAX_RESPONSE_BODY_SIZE]);
                format!("{truncated}... (truncated)")
            },
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                warn!("Failed to read response body: {}", e);
                format!("[Failed to read response body: {e}]")
            },
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn encode(&self, record: &Record) -> Result<Bytes> {
        let encoded = match self.framing {
            PayloadFraming::EventLines => serde_json::to_vec(&EventEnvelope {
                event: record.payload(),
                meta: record.meta(),
            })?,
            PayloadFraming::RawArray => serde_json::to_vec(record.payload())?,
        };
        Ok(Bytes::from(encoded))
    }

    async fn send(&self, batch: &Batch) -> Result<TransportResponse> {
        let start_time = std::time::Instant::now();
        let body = self.body(batch);

        let span = info_span!(
            "batch_delivery",
            batch_id = %batch.id(),
            records = batch.len(),
            bytes = body.len(),
            url = %self.url
        );

        async move {
            debug!("Sending batch");

            let mut request = self.client.post(&self.url).body(body);
            request = match &self.credentials {
                Credentials::Header(value) => request.header(AUTHORIZATION, value.clone()),
                Credentials::Basic { username, password } => request
                    .basic_auth(username, Some(password))
                    .header(CONTENT_TYPE, "application/json")
                    .header(ACCEPT, "text/plain"),
            };

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    let duration = start_time.elapsed();
                    debug!(duration_ms = duration.as_millis(), "Request failed: {}", e);

                    if e.is_timeout() {
                        return Err(DeliveryError::timeout(self.config.timeout));
                    }
                    if e.is_connect() {
                        return Err(DeliveryError::network(format!("connection failed: {e}")));
                    }
                    return Err(DeliveryError::network(e.to_string()));
                },
            };

            let duration = start_time.elapsed();
            let status_code = response.status().as_u16();
            let body = Self::read_body(response).await;

            debug!(status = status_code, duration_ms = duration.as_millis(), "Received response");

            Ok(TransportResponse::new(status_code, body, duration))
        }
        .instrument(span)
        .await
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}
