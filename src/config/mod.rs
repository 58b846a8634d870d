pub mod args;

/// Main configuration for the riakrm deletion pipeline.
///
/// Holds everything a [`DeletionPipeline`](crate::DeletionPipeline) needs:
/// the buckets to empty, how to reach the store, the worker slot count and
/// the retry, rate limiting and tracing settings.
///
/// # Quick Start
///
/// Use [`Config::for_buckets`] for a minimal configuration with sensible
/// defaults:
///
/// ```
/// use riakrm_rs::Config;
///
/// let config = Config::for_buckets(["sessions", "carts"]);
/// assert_eq!(config.worker_size, 1);
/// assert_eq!(config.client_config.root_url, "http://localhost:8098/");
/// ```
///
/// Then customize fields as needed:
///
/// ```
/// use riakrm_rs::Config;
///
/// let mut config = Config::for_buckets(["sessions"]);
/// config.worker_size = 32;
/// config.verbose = true;
/// config.client_config.root_url = "http://riak-1.internal:8098/".to_string();
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    pub buckets: Vec<String>,
    pub client_config: ClientConfig,
    /// Worker slots, i.e. the bound on concurrently running deletes.
    pub worker_size: u16,
    /// Log one line per attempted deletion.
    pub verbose: bool,
    pub key_queue_size: u32,
    pub rate_limit_objects: Option<u32>,
    pub force_retry_config: ForceRetryConfig,
    pub tracing_config: Option<TracingConfig>,
    pub auto_complete_shell: Option<clap_complete::shells::Shell>,
}

impl Config {
    /// Create a `Config` with defaults matching the CLI for the given buckets.
    pub fn for_buckets<I, S>(buckets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Config {
            buckets: buckets.into_iter().map(Into::into).collect(),
            ..Config::default()
        }
    }
}

impl Default for Config {
    /// No buckets; set `buckets` before running a pipeline.
    fn default() -> Self {
        Config {
            buckets: Vec::new(),
            client_config: ClientConfig::default(),
            worker_size: 1,
            verbose: false,
            key_queue_size: 1000,
            rate_limit_objects: None,
            force_retry_config: ForceRetryConfig::default(),
            tracing_config: None,
            auto_complete_shell: None,
        }
    }
}

/// How to reach the store.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// `http://host[:port]/` or `riak://host[:port]/`.
    pub root_url: String,
    /// Defaults to `<hostname>.<pid>` when unset.
    pub client_id: Option<String>,
    pub request_timeout_milliseconds: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            root_url: "http://localhost:8098/".to_string(),
            client_id: None,
            request_timeout_milliseconds: None,
        }
    }
}

/// Tracing (logging) configuration.
#[derive(Debug, Clone, Copy)]
pub struct TracingConfig {
    pub tracing_level: log::Level,
    pub json_tracing: bool,
    pub span_events_tracing: bool,
    pub disable_color_tracing: bool,
}

/// Retries of transport failures and `503` on a single delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForceRetryConfig {
    pub force_retry_count: u32,
    pub force_retry_interval_milliseconds: u64,
}

impl Default for ForceRetryConfig {
    fn default() -> Self {
        ForceRetryConfig {
            force_retry_count: 0,
            force_retry_interval_milliseconds: 1000,
        }
    }
}
