//! Configuration management for the tributary forwarder.

use std::{path::Path, time::Duration};

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tributary_core::RecordMeta;
use tributary_delivery::{
    ClientConfig, EventCollectorTarget, HttpTransport, KvStoreTarget, PipelineConfig, RetryPolicy,
    DEFAULT_KV_STORE_MAX_BATCH_BYTES, DEFAULT_MAX_BATCH_BYTES,
};

const CONFIG_FILE: &str = "tributary.toml";
const ENV_PREFIX: &str = "TRIBUTARY_";

/// Destination kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// HTTP event collector (`/services/collector`).
    EventCollector,
    /// KV-store collection (`batch_save`).
    KvStore,
}

/// Complete forwarder configuration with defaults, file, and environment
/// overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables prefixed with `TRIBUTARY_` (highest priority)
/// 2. Configuration file (`tributary.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// # Example
///
/// ```no_run
/// use tributary::config::Config;
///
/// let config = Config::load().expect("Failed to load configuration");
///
/// println!("Forwarding to {}", config.endpoint_url());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Destination
    /// Destination kind.
    ///
    /// Environment variable: `TRIBUTARY_SINK`
    #[serde(default = "default_sink")]
    pub sink: SinkKind,
    /// Collector host name.
    ///
    /// Environment variable: `TRIBUTARY_HOST`
    #[serde(default = "default_host")]
    pub host: String,
    /// Collector port; defaults to 8088 for the event collector and 8089 for
    /// the KV store.
    ///
    /// Environment variable: `TRIBUTARY_PORT`
    #[serde(default)]
    pub port: Option<u16>,
    /// URL scheme, `https` or `http`.
    ///
    /// Environment variable: `TRIBUTARY_SCHEME`
    #[serde(default = "default_scheme")]
    pub scheme: String,

    // Credentials
    /// Event collector token.
    ///
    /// Environment variable: `TRIBUTARY_TOKEN`
    #[serde(default)]
    pub token: String,
    /// KV-store user.
    ///
    /// Environment variable: `TRIBUTARY_USERNAME`
    #[serde(default)]
    pub username: String,
    /// KV-store password.
    ///
    /// Environment variable: `TRIBUTARY_PASSWORD`
    #[serde(default)]
    pub password: String,
    /// KV-store app namespace.
    ///
    /// Environment variable: `TRIBUTARY_APP`
    #[serde(default = "default_app")]
    pub app: String,
    /// KV-store collection.
    ///
    /// Environment variable: `TRIBUTARY_COLLECTION`
    #[serde(default)]
    pub collection: String,

    // Default routing metadata
    /// Host tag applied to records without one.
    #[serde(default)]
    pub default_host: Option<String>,
    /// Source tag applied to records without one.
    #[serde(default)]
    pub default_source: Option<String>,
    /// Index tag applied to records without one.
    #[serde(default)]
    pub default_index: Option<String>,
    /// Sourcetype tag applied to records without one.
    #[serde(default)]
    pub default_sourcetype: Option<String>,

    // Pipeline
    /// Number of concurrent consumer workers.
    ///
    /// Environment variable: `TRIBUTARY_CONCURRENCY`
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Maximum number of queued records.
    ///
    /// Environment variable: `TRIBUTARY_QUEUE_CAPACITY`
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Batch size threshold in bytes; defaults per sink.
    ///
    /// Environment variable: `TRIBUTARY_MAX_BATCH_BYTES`
    #[serde(default)]
    pub max_batch_bytes: Option<usize>,
    /// Seconds to wait for the queue to drain at shutdown; unbounded if unset.
    #[serde(default)]
    pub drain_timeout_seconds: Option<u64>,
    /// Seconds to wait for workers to stop after draining.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,

    // Retry
    /// Retries per batch after the first attempt.
    ///
    /// Environment variable: `TRIBUTARY_MAX_RETRIES`
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Linear backoff unit in milliseconds.
    ///
    /// Environment variable: `TRIBUTARY_RETRY_BACKOFF_MS`
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// HTTP statuses that are retried.
    ///
    /// Environment variable: `TRIBUTARY_RETRYABLE_STATUSES` (e.g. `[500, 503]`)
    #[serde(default = "default_retryable_statuses")]
    pub retryable_statuses: Vec<u16>,

    // Client
    /// Whether to verify TLS certificates.
    ///
    /// Environment variable: `TRIBUTARY_VERIFY_TLS`
    #[serde(default)]
    pub verify_tls: bool,
    /// Per-request timeout in seconds.
    ///
    /// Environment variable: `TRIBUTARY_REQUEST_TIMEOUT_SECONDS`
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    // Logging
    /// Log filter used when `RUST_LOG` is not set.
    ///
    /// Environment variable: `TRIBUTARY_LOG`
    #[serde(default = "default_log_filter")]
    pub log: String,
}

impl Config {
    /// Load configuration from defaults, `tributary.toml`, and environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or the result is
    /// invalid.
    pub fn load() -> Result<Self> {
        Self::load_from(CONFIG_FILE)
    }

    /// Same as [`load`](Self::load) with an explicit configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or the result is
    /// invalid.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX));

        let config: Self = figment.extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Convert to pipeline configuration.
    pub fn to_pipeline_config(&self) -> PipelineConfig {
        let default_max_batch_bytes = match self.sink {
            SinkKind::EventCollector => DEFAULT_MAX_BATCH_BYTES,
            SinkKind::KvStore => DEFAULT_KV_STORE_MAX_BATCH_BYTES,
        };

        PipelineConfig {
            concurrency: self.concurrency,
            queue_capacity: self.queue_capacity,
            max_batch_bytes: self.max_batch_bytes.unwrap_or(default_max_batch_bytes),
            retry_policy: self.to_retry_policy(),
            default_meta: self.default_meta(),
            drain_timeout: self.drain_timeout_seconds.map(Duration::from_secs),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_seconds),
        }
    }

    /// Convert to retry policy.
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_backoff_ms),
            retryable_statuses: self.retryable_statuses.iter().copied().collect(),
        }
    }

    /// Convert to client configuration.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_secs(self.request_timeout_seconds),
            verify_tls: self.verify_tls,
            ..ClientConfig::default()
        }
    }

    /// Routing metadata applied to every record.
    pub fn default_meta(&self) -> RecordMeta {
        RecordMeta {
            host: self.default_host.clone(),
            source: self.default_source.clone(),
            index: self.default_index.clone(),
            sourcetype: self.default_sourcetype.clone(),
        }
    }

    /// Builds the HTTP transport for the configured sink.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint or credentials are invalid.
    pub fn build_transport(&self) -> Result<HttpTransport> {
        let transport = match self.sink {
            SinkKind::EventCollector => {
                HttpTransport::event_collector(&self.event_collector_target(), self.to_client_config())
            },
            SinkKind::KvStore => {
                HttpTransport::kv_store(&self.kv_store_target(), self.to_client_config())
            },
        };
        transport.context("Failed to build collector transport")
    }

    /// Endpoint URL for logging.
    pub fn endpoint_url(&self) -> String {
        match self.sink {
            SinkKind::EventCollector => self.event_collector_target().url(),
            SinkKind::KvStore => self.kv_store_target().url(),
        }
    }

    /// Credential with all but the first four characters masked.
    pub fn credential_masked(&self) -> String {
        let secret = match self.sink {
            SinkKind::EventCollector => &self.token,
            SinkKind::KvStore => &self.password,
        };
        let visible: String = secret.chars().take(4).collect();
        format!("{visible}***")
    }

    fn event_collector_target(&self) -> EventCollectorTarget {
        EventCollectorTarget::new(&self.host, &self.token)
            .with_scheme(&self.scheme)
            .with_port(self.port.unwrap_or(EventCollectorTarget::DEFAULT_PORT))
    }

    fn kv_store_target(&self) -> KvStoreTarget {
        KvStoreTarget::new(&self.host, &self.app, &self.collection, &self.username, &self.password)
            .with_scheme(&self.scheme)
            .with_port(self.port.unwrap_or(KvStoreTarget::DEFAULT_PORT))
    }

    /// Validate configuration values.
    fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            anyhow::bail!("host must not be empty");
        }

        if !matches!(self.scheme.as_str(), "http" | "https") {
            anyhow::bail!("scheme must be http or https");
        }

        match self.sink {
            SinkKind::EventCollector if self.token.is_empty() => {
                anyhow::bail!("token is required for the event collector sink");
            },
            SinkKind::KvStore if self.collection.is_empty() || self.username.is_empty() => {
                anyhow::bail!("collection and username are required for the kv_store sink");
            },
            _ => {},
        }

        if self.concurrency == 0 {
            anyhow::bail!("concurrency must be greater than 0");
        }

        if self.queue_capacity == 0 {
            anyhow::bail!("queue_capacity must be greater than 0");
        }

        if self.max_batch_bytes == Some(0) {
            anyhow::bail!("max_batch_bytes must be greater than 0");
        }

        if self.request_timeout_seconds == 0 {
            anyhow::bail!("request_timeout_seconds must be greater than 0");
        }

        if let Some(status) = self.retryable_statuses.iter().find(|s| !(100..=599).contains(*s)) {
            anyhow::bail!("retryable status {status} is not an HTTP status code");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sink: default_sink(),
            host: default_host(),
            port: None,
            scheme: default_scheme(),
            token: String::new(),
            username: String::new(),
            password: String::new(),
            app: default_app(),
            collection: String::new(),
            default_host: None,
            default_source: None,
            default_index: None,
            default_sourcetype: None,
            concurrency: default_concurrency(),
            queue_capacity: default_queue_capacity(),
            max_batch_bytes: None,
            drain_timeout_seconds: None,
            shutdown_timeout_seconds: default_shutdown_timeout(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            retryable_statuses: default_retryable_statuses(),
            verify_tls: false,
            request_timeout_seconds: default_request_timeout(),
            log: default_log_filter(),
        }
    }
}

fn default_sink() -> SinkKind {
    SinkKind::EventCollector
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_scheme() -> String {
    "https".to_string()
}

fn default_app() -> String {
    "search".to_string()
}

fn default_concurrency() -> usize {
    tributary_delivery::DEFAULT_CONCURRENCY
}

fn default_queue_capacity() -> usize {
    tributary_delivery::DEFAULT_QUEUE_CAPACITY
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    2000
}

fn default_retryable_statuses() -> Vec<u16> {
    vec![500, 503]
}

fn default_request_timeout() -> u64 {
    600
}

fn default_log_filter() -> String {
    "info,tributary=debug".to_string()
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, env, sync::Mutex};

    use super::*;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct TestEnvGuard {
        _lock: std::sync::MutexGuard<'static, ()>,
        vars: Vec<String>,
        originals: HashMap<String, Option<String>>,
    }

    impl TestEnvGuard {
        fn new() -> Self {
            let lock = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            Self { _lock: lock, vars: Vec::new(), originals: HashMap::new() }
        }

        fn set_var(&mut self, key: &str, value: &str) {
            if !self.vars.contains(&key.to_string()) {
                self.originals.insert(key.to_string(), env::var(key).ok());
                self.vars.push(key.to_string());
            }
            env::set_var(key, value);
        }
    }

    impl Drop for TestEnvGuard {
        fn drop(&mut self) {
            for var in &self.vars {
                match self.originals.get(var) {
                    Some(Some(value)) => env::set_var(var, value),
                    Some(None) => env::remove_var(var),
                    None => {},
                }
            }
        }
    }

    const MISSING_FILE: &str = "does-not-exist/tributary.toml";

    #[test]
    fn defaults_match_collector_conventions() {
        let config = Config { token: "t".to_string(), ..Config::default() };
        config.validate().unwrap();

        let pipeline = config.to_pipeline_config();
        assert_eq!(pipeline.concurrency, 20);
        assert_eq!(pipeline.queue_capacity, 50_000);
        assert_eq!(pipeline.max_batch_bytes, 100_000);
        assert_eq!(pipeline.retry_policy.max_retries, 2);
        assert_eq!(pipeline.retry_policy.base_delay, Duration::from_secs(2));
        assert_eq!(pipeline.retry_policy.retryable_statuses.len(), 2);
        assert_eq!(config.to_client_config().timeout, Duration::from_secs(600));
        assert!(!config.to_client_config().verify_tls);
        assert_eq!(config.endpoint_url(), "https://localhost:8088/services/collector");
    }

    #[test]
    fn kv_store_defaults_to_small_batches_and_management_port() {
        let config = Config {
            sink: SinkKind::KvStore,
            username: "admin".to_string(),
            collection: "assets".to_string(),
            ..Config::default()
        };
        config.validate().unwrap();

        assert_eq!(config.to_pipeline_config().max_batch_bytes, 1_000);
        assert_eq!(
            config.endpoint_url(),
            "https://localhost:8089/servicesNS/nobody/search/storage/collections/data/assets/batch_save"
        );
    }

    #[test]
    fn env_overrides_defaults() {
        let mut guard = TestEnvGuard::new();
        guard.set_var("TRIBUTARY_HOST", "splunk.internal");
        guard.set_var("TRIBUTARY_TOKEN", "0000-1111");
        guard.set_var("TRIBUTARY_CONCURRENCY", "4");
        guard.set_var("TRIBUTARY_MAX_RETRIES", "5");
        guard.set_var("TRIBUTARY_RETRYABLE_STATUSES", "[429, 503]");
        guard.set_var("TRIBUTARY_DEFAULT_INDEX", "main");

        let config = Config::load_from(MISSING_FILE).unwrap();

        assert_eq!(config.host, "splunk.internal");
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retryable_statuses, [429, 503]);
        assert_eq!(config.default_meta().index.as_deref(), Some("main"));
        assert_eq!(config.credential_masked(), "0000***");
    }

    #[test]
    fn missing_token_fails_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_err());

        config.token = "t".to_string();
        config.concurrency = 0;
        assert!(config.validate().is_err());

        config = Config { token: "t".to_string(), ..Config::default() };
        config.retryable_statuses = vec![1000];
        assert!(config.validate().is_err());

        config = Config { token: "t".to_string(), ..Config::default() };
        config.max_batch_bytes = Some(0);
        assert!(config.validate().is_err());

        config = Config { sink: SinkKind::KvStore, ..Config::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn transport_builds_for_both_sinks() {
        let collector = Config { token: "t".to_string(), ..Config::default() };
        assert!(collector.build_transport().is_ok());

        let kv = Config {
            sink: SinkKind::KvStore,
            username: "admin".to_string(),
            collection: "assets".to_string(),
            ..Config::default()
        };
        assert!(kv.build_transport().is_ok());
    }
}
