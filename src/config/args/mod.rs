use crate::config::{ClientConfig, Config, ForceRetryConfig, TracingConfig};
use crate::protocol::request::client_id_header_value;
use clap::Parser;
use clap::builder::NonEmptyStringValueParser;
use clap_verbosity_flag::{Verbosity, WarnLevel};
use std::ffi::OsString;

pub mod value_parser;


// ---------------------------------------------------------------------------
// Default constants
// ---------------------------------------------------------------------------

const DEFAULT_ROOT_URL: &str = "http://localhost:8098/";
const DEFAULT_WORKER_SIZE: u16 = 1;
const DEFAULT_KEY_QUEUE_SIZE: u32 = 1000;
const DEFAULT_FORCE_RETRY_COUNT: u32 = 3;
const DEFAULT_FORCE_RETRY_INTERVAL_MILLISECONDS: u64 = 1000;
const DEFAULT_JSON_TRACING: bool = false;
const DEFAULT_SPAN_EVENTS_TRACING: bool = false;
const DEFAULT_DISABLE_COLOR_TRACING: bool = false;

// ---------------------------------------------------------------------------
// Error messages
// ---------------------------------------------------------------------------

const ERROR_MESSAGE_NO_BUCKETS: &str = "At least one bucket name is required.";
const ERROR_MESSAGE_WORKER_SIZE_ZERO: &str = "Worker size must be at least 1.";
const ERROR_MESSAGE_KEY_QUEUE_SIZE_ZERO: &str = "Key queue size must be at least 1.";
const ERROR_MESSAGE_RATE_LIMIT_ZERO: &str = "Rate limit must be at least 1 object per second.";
const ERROR_MESSAGE_REQUEST_TIMEOUT_ZERO: &str = "Request timeout must be at least 1 millisecond.";

// ---------------------------------------------------------------------------
// CLIArgs (clap-derived argument struct)
// ---------------------------------------------------------------------------

/// riakrm - Delete every key of one or more Riak buckets.
///
/// Keys are enumerated with a streaming key listing and deleted as they
/// arrive, with at most --worker-size deletes in flight.
///
/// Example:
///   riakrm sessions
///   riakrm --worker-size 32 -v sessions carts
///   riakrm --root-url http://riak-1.internal:8098/ old_bucket
#[derive(Parser, Clone, Debug)]
#[command(name = "riakrm", version, about, long_about = None)]
pub struct CLIArgs {
    /// Buckets to empty.
    #[arg(
        value_name = "BUCKETNAME",
        num_args = 1..,
        value_parser = NonEmptyStringValueParser::new(),
        required_unless_present = "auto_complete_shell",
    )]
    pub buckets: Vec<String>,

    // -----------------------------------------------------------------------
    // Connection options
    // -----------------------------------------------------------------------
    /// Root URL of the store's HTTP interface.
    #[arg(
        long,
        env,
        default_value = DEFAULT_ROOT_URL,
        value_parser = value_parser::url::check_scheme,
        help_heading = "Connection"
    )]
    pub root_url: String,

    /// Client id sent with write requests. Default: <hostname>.<pid>.
    #[arg(long, env, value_parser = NonEmptyStringValueParser::new(), help_heading = "Connection")]
    pub client_id: Option<String>,

    /// Per-request timeout in milliseconds (wait for the response head).
    #[arg(long, env, help_heading = "Connection")]
    pub request_timeout_milliseconds: Option<u64>,

    // -----------------------------------------------------------------------
    // Performance options
    // -----------------------------------------------------------------------
    /// Number of worker slots, i.e. concurrent deletes. Default: 1.
    #[arg(
        long,
        env,
        visible_alias = "threads",
        default_value_t = DEFAULT_WORKER_SIZE,
        help_heading = "Performance"
    )]
    pub worker_size: u16,

    /// Key channel queue size. Default: 1000.
    #[arg(long, env, default_value_t = DEFAULT_KEY_QUEUE_SIZE, help_heading = "Performance")]
    pub key_queue_size: u32,

    /// Maximum deletes per second.
    #[arg(long, env, help_heading = "Performance")]
    pub rate_limit_objects: Option<u32>,

    // -----------------------------------------------------------------------
    // Logging options
    // -----------------------------------------------------------------------
    /// Verbosity level. -q (quiet), default (warnings), -v (one line per
    /// deleted key), -vv, -vvv.
    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    /// Output logs in JSON format.
    #[arg(long, env, default_value_t = DEFAULT_JSON_TRACING, help_heading = "Logging")]
    pub json_tracing: bool,

    /// Enable tracing span events.
    #[arg(long, env, default_value_t = DEFAULT_SPAN_EVENTS_TRACING, help_heading = "Logging")]
    pub span_events_tracing: bool,

    /// Disable colored output in logs.
    #[arg(long, env, default_value_t = DEFAULT_DISABLE_COLOR_TRACING, help_heading = "Logging")]
    pub disable_color_tracing: bool,

    // -----------------------------------------------------------------------
    // Retry options
    // -----------------------------------------------------------------------
    /// Retries of a delete after a transport error or 503. Default: 3.
    #[arg(long, env, default_value_t = DEFAULT_FORCE_RETRY_COUNT, help_heading = "Retry")]
    pub force_retry_count: u32,

    /// Interval in ms between retries. Default: 1000.
    #[arg(long, env, default_value_t = DEFAULT_FORCE_RETRY_INTERVAL_MILLISECONDS, help_heading = "Retry")]
    pub force_retry_interval_milliseconds: u64,

    // -----------------------------------------------------------------------
    // Advanced options
    // -----------------------------------------------------------------------
    /// Generate shell completions.
    #[arg(long, env, help_heading = "Advanced")]
    pub auto_complete_shell: Option<clap_complete::shells::Shell>,
}

// ---------------------------------------------------------------------------
// parse_from_args (public API)
// ---------------------------------------------------------------------------

/// Parse command-line arguments into a `CLIArgs` struct.
///
/// # Example
///
/// ```
/// use riakrm_rs::config::args::parse_from_args;
///
/// let args = vec!["riakrm", "--threads", "8", "sessions", "carts"];
/// let cli_args = parse_from_args(args).unwrap();
/// assert_eq!(cli_args.worker_size, 8);
/// assert_eq!(cli_args.buckets, vec!["sessions", "carts"]);
/// ```
pub fn parse_from_args<I, T>(args: I) -> Result<CLIArgs, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    CLIArgs::try_parse_from(args)
}

/// Parse arguments and build a Config in one step.
pub fn build_config_from_args<I, T>(args: I) -> Result<Config, String>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli_args = CLIArgs::try_parse_from(args).map_err(|e| e.to_string())?;
    Config::try_from(cli_args)
}

// ---------------------------------------------------------------------------
// Validation and Config conversion
// ---------------------------------------------------------------------------

impl CLIArgs {
    fn validate(&self) -> Result<(), String> {
        if self.buckets.is_empty() && self.auto_complete_shell.is_none() {
            return Err(ERROR_MESSAGE_NO_BUCKETS.to_string());
        }
        if self.worker_size == 0 {
            return Err(ERROR_MESSAGE_WORKER_SIZE_ZERO.to_string());
        }
        if self.key_queue_size == 0 {
            return Err(ERROR_MESSAGE_KEY_QUEUE_SIZE_ZERO.to_string());
        }
        if self.rate_limit_objects == Some(0) {
            return Err(ERROR_MESSAGE_RATE_LIMIT_ZERO.to_string());
        }
        if self.request_timeout_milliseconds == Some(0) {
            return Err(ERROR_MESSAGE_REQUEST_TIMEOUT_ZERO.to_string());
        }
        if let Some(client_id) = &self.client_id {
            client_id_header_value(client_id).map_err(|e| e.to_string())?;
        }
        Ok(())
    }

    /// `-v` and above turn on the per-key lines.
    fn is_verbose(&self) -> bool {
        self.verbosity
            .log_level()
            .is_some_and(|level| level >= log::Level::Info)
    }

    fn build_client_config(&self) -> ClientConfig {
        ClientConfig {
            root_url: self.root_url.clone(),
            client_id: self.client_id.clone(),
            request_timeout_milliseconds: self.request_timeout_milliseconds,
        }
    }

    fn build_tracing_config(&self) -> Option<TracingConfig> {
        let log_level = self.verbosity.log_level()?;
        Some(TracingConfig {
            tracing_level: log_level,
            json_tracing: self.json_tracing,
            span_events_tracing: self.span_events_tracing,
            disable_color_tracing: self.disable_color_tracing,
        })
    }
}

impl TryFrom<CLIArgs> for Config {
    type Error = String;

    fn try_from(args: CLIArgs) -> Result<Self, Self::Error> {
        args.validate()?;

        Ok(Config {
            client_config: args.build_client_config(),
            tracing_config: args.build_tracing_config(),
            verbose: args.is_verbose(),
            worker_size: args.worker_size,
            key_queue_size: args.key_queue_size,
            rate_limit_objects: args.rate_limit_objects,
            force_retry_config: ForceRetryConfig {
                force_retry_count: args.force_retry_count,
                force_retry_interval_milliseconds: args.force_retry_interval_milliseconds,
            },
            auto_complete_shell: args.auto_complete_shell,
            buckets: args.buckets,
        })
    }
}
