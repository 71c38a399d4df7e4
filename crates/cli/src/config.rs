//! Process configuration, read once from the environment at startup.
//!
//! Every variable may be given with a `TASKHOOK_` prefix, which wins over the
//! bare name. Values are parsed and validated here so that nothing downstream
//! sees a half-valid configuration.

use std::{
    net::{IpAddr, SocketAddr},
    str::FromStr,
    time::Duration,
};

use domain::{CallbackUrl, EventFilter, WebhookSecret};
use secrecy::SecretString;
use thiserror::Error;

/// Prefix accepted on every variable name.
pub const ENV_PREFIX: &str = "TASKHOOK_";

/// Events subscribed to when `WEBHOOK_EVENTS` is unset.
pub const DEFAULT_EVENTS: &str = "task.created,task.updated,task.deleted,task.moved,\
task.commented,task.feedback_added,user.created,user.updated,user.deleted";

/// An invalid or missing configuration value.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is unset or empty.
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    /// A variable is set to a value that cannot be used.
    #[error("invalid value for {name}: {reason}")]
    Invalid {
        /// Variable name, without prefix.
        name: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line.
    Json,
    /// Human-readable, for local development.
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            other => Err(format!("expected `json` or `pretty`, got `{other}`")),
        }
    }
}

/// Fully validated configuration.
#[derive(Debug)]
pub struct Config {
    pub api_base_url: String,
    pub api_prefix: String,
    pub admin_email: String,
    pub admin_password: SecretString,
    pub listen_addr: SocketAddr,
    pub webhook_path: String,
    pub callback_url: CallbackUrl,
    pub events: EventFilter,
    pub webhook_secret: Option<WebhookSecret>,
    pub cleanup_stale: bool,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    pub max_wait: Duration,
    pub retry_max_attempts: u32,
    pub retry_base_delay: Duration,
    pub queue_capacity: usize,
    pub log_level: String,
    pub log_format: LogFormat,
    pub otlp_endpoint: Option<String>,
}

impl Config {
    /// Reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(get_env_with_prefix)
    }

    /// Builds a configuration from `lookup`, which maps a bare variable name
    /// to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let admin_email = env.required("ADMIN_EMAIL")?;
        let admin_password = SecretString::from(env.required("ADMIN_PASSWORD")?);

        let host: IpAddr = env.parsed("WEBHOOK_HOST", IpAddr::from([0, 0, 0, 0]))?;
        let port: u16 = env.parsed("WEBHOOK_PORT", 9000)?;

        let webhook_path = env.string("WEBHOOK_PATH", "/webhook");
        validate_webhook_path(&webhook_path)?;

        let callback_url =
            CallbackUrl::new(env.string("WEBHOOK_CALLBACK_URL", "http://agent-network:9000/webhook"))
                .ok_or(ConfigError::Invalid {
                    name: "WEBHOOK_CALLBACK_URL",
                    reason: "must not be empty".to_string(),
                })?;

        let events = EventFilter::parse(&env.string("WEBHOOK_EVENTS", DEFAULT_EVENTS));
        if events.is_empty() {
            return Err(ConfigError::Invalid {
                name: "WEBHOOK_EVENTS",
                reason: "must name at least one event".to_string(),
            });
        }

        let poll_interval = Duration::from_secs(env.positive("STARTUP_POLL_INTERVAL_SECS", 2)?);
        let retry_max_attempts = u32::try_from(env.positive("RETRY_MAX_ATTEMPTS", 5)?).map_err(
            |_| ConfigError::Invalid {
                name: "RETRY_MAX_ATTEMPTS",
                reason: "too large".to_string(),
            },
        )?;
        let queue_capacity = usize::try_from(env.positive("DISPATCH_QUEUE_CAPACITY", 1024)?)
            .map_err(|_| ConfigError::Invalid {
                name: "DISPATCH_QUEUE_CAPACITY",
                reason: "too large".to_string(),
            })?;

        Ok(Self {
            api_base_url: env.string("API_BASE_URL", "http://app:8000"),
            api_prefix: env.string("API_PREFIX", "/api/v1"),
            admin_email,
            admin_password,
            listen_addr: SocketAddr::new(host, port),
            webhook_path,
            callback_url,
            events,
            webhook_secret: env.get("WEBHOOK_SECRET").and_then(WebhookSecret::new),
            cleanup_stale: env.flag("WEBHOOK_CLEANUP_STALE", true)?,
            request_timeout: Duration::from_secs(env.positive("REQUEST_TIMEOUT_SECS", 10)?),
            poll_interval,
            max_wait: Duration::from_secs(env.parsed("STARTUP_MAX_WAIT_SECS", 60)?),
            retry_max_attempts,
            retry_base_delay: Duration::from_millis(env.parsed("RETRY_BASE_DELAY_MS", 1000)?),
            queue_capacity,
            log_level: env.string("LOG_LEVEL", "info"),
            log_format: env.parsed("LOG_FORMAT", LogFormat::Json)?,
            otlp_endpoint: env.get("OTEL_EXPORTER_OTLP_ENDPOINT"),
        })
    }
}

/// The delivery route must be a literal path the router accepts: captures
/// (`{id}`, `:id`) and wildcards (`*rest`) would make route registration
/// panic once startup has already registered the webhook.
fn validate_webhook_path(path: &str) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::Invalid {
        name: "WEBHOOK_PATH",
        reason: reason.to_string(),
    };

    if !path.starts_with('/') {
        return Err(invalid("must start with `/`"));
    }
    if path == "/health" {
        return Err(invalid("`/health` is reserved for the health endpoint"));
    }
    if path.contains(['{', '}']) {
        return Err(invalid("must not contain `{` or `}`"));
    }
    if path
        .split('/')
        .any(|segment| segment.starts_with(':') || segment.starts_with('*'))
    {
        return Err(invalid("segments must not start with `:` or `*`"));
    }
    Ok(())
}

/// Reads `TASKHOOK_{key}`, falling back to `{key}`.
pub fn get_env_with_prefix(key: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{key}"))
        .or_else(|_| std::env::var(key))
        .ok()
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Unset and blank are the same thing.
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, name: &str, default: &str) -> String {
        self.get(name).unwrap_or_else(|| default.to_string())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.get(name).ok_or(ConfigError::Missing(name))
    }

    fn parsed<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(name) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                name,
                reason: format!("`{raw}`: {e}"),
            }),
        }
    }

    fn positive(&self, name: &'static str, default: u64) -> Result<u64, ConfigError> {
        match self.parsed(name, default)? {
            0 => Err(ConfigError::Invalid {
                name,
                reason: "must be greater than zero".to_string(),
            }),
            n => Ok(n),
        }
    }

    fn flag(&self, name: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.get(name).map(|v| v.to_ascii_lowercase()) {
            None => Ok(default),
            Some(v) => match v.as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::Invalid {
                    name,
                    reason: format!("`{v}` is not a boolean"),
                }),
            },
        }
    }
}
