use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use aibrush_core::model::ModelKind;
use serde::Deserialize;

/// Errors raised while loading [`WorkerConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} has invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("{var} path {value:?} cannot be resolved: {source}")]
    Path {
        var: &'static str,
        value: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No WORKER_TOKEN set and credentials file {path} could not be read: {source}")]
    CredentialsUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Credentials file {path} is malformed: {source}")]
    CredentialsMalformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Credentials {
    access_token: String,
}

/// Worker configuration loaded from environment variables.
///
/// All fields except the credential have defaults suitable for a single
/// GPU host.
#[derive(Clone)]
pub struct WorkerConfig {
    /// Coordinator base URL.
    pub api_url: String,
    /// Opaque worker credential.
    pub token: String,
    /// Number of concurrent processing workers.
    pub pool_size: usize,
    /// Capacity of every inter-stage queue.
    pub queue_capacity: usize,
    /// Period of the assignment/liveness check.
    pub poll_interval: Duration,
    /// Cap for the empty-claim backoff.
    pub max_poll_backoff: Duration,
    pub error_ttl: Duration,
    pub error_max_count: usize,
    /// Upper bound on each kill-switch shutdown hook.
    pub shutdown_hook_timeout: Duration,
    pub metrics_flush_interval: Duration,
    /// Root of transient storage, also the sandbox working directory.
    /// Always absolute, so paths built from it mean the same thing to
    /// the worker and to sandbox children.
    pub work_dir: PathBuf,
    pub cleanup_max_age: Duration,
    pub python_bin: String,
    /// Always absolute.
    pub model_scripts_dir: PathBuf,
    pub enable_ranking: bool,
    /// Model the poller is sticky on at startup.
    pub initial_model: ModelKind,
    /// Deadline for a whole coordinator request.
    pub http_timeout: Duration,
    pub http_connect_timeout: Duration,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default                    |
    /// |------------------------------|----------------------------|
    /// | `API_URL`                    | `https://www.aibrush.art`  |
    /// | `WORKER_TOKEN`               | from `CREDENTIALS_FILE`    |
    /// | `CREDENTIALS_FILE`           | `credentials.json`         |
    /// | `POOL_SIZE`                  | `1`                        |
    /// | `QUEUE_CAPACITY`             | `4`                        |
    /// | `POLL_INTERVAL_SECS`         | `60`                       |
    /// | `MAX_POLL_BACKOFF_SECS`      | `10`                       |
    /// | `ERROR_TTL_SECS`             | `60`                       |
    /// | `ERROR_MAX_COUNT`            | `10`                       |
    /// | `SHUTDOWN_HOOK_TIMEOUT_SECS` | `10`                       |
    /// | `METRICS_FLUSH_SECS`         | `10`                       |
    /// | `WORK_DIR`                   | `.`                        |
    /// | `CLEANUP_MAX_AGE_SECS`       | `3600`                     |
    /// | `PYTHON_BIN`                 | `python`                   |
    /// | `MODEL_SCRIPTS_DIR`          | `.`                        |
    /// | `ENABLE_RANKING`             | `true`                     |
    /// | `INITIAL_MODEL`              | `stable_diffusion_text2im` |
    /// | `HTTP_TIMEOUT_SECS`          | `30`                       |
    /// | `HTTP_CONNECT_TIMEOUT_SECS`  | `10`                       |
    ///
    /// `WORK_DIR` and `MODEL_SCRIPTS_DIR` are resolved against the current
    /// directory at load time.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_url = lookup("API_URL").unwrap_or_else(|| "https://www.aibrush.art".into());

        let token = match lookup("WORKER_TOKEN").filter(|t| !t.trim().is_empty()) {
            Some(token) => token,
            None => {
                let path = PathBuf::from(
                    lookup("CREDENTIALS_FILE").unwrap_or_else(|| "credentials.json".into()),
                );
                read_credentials(&path)?
            }
        };

        let pool_size: usize = parse(&lookup, "POOL_SIZE", 1)?;
        let queue_capacity: usize = parse(&lookup, "QUEUE_CAPACITY", 4)?;
        non_zero("POOL_SIZE", pool_size)?;
        non_zero("QUEUE_CAPACITY", queue_capacity)?;

        let error_max_count: usize = parse(&lookup, "ERROR_MAX_COUNT", 10)?;

        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            token,
            pool_size,
            queue_capacity,
            poll_interval: secs(&lookup, "POLL_INTERVAL_SECS", 60)?,
            max_poll_backoff: secs(&lookup, "MAX_POLL_BACKOFF_SECS", 10)?,
            error_ttl: secs(&lookup, "ERROR_TTL_SECS", 60)?,
            error_max_count,
            shutdown_hook_timeout: secs(&lookup, "SHUTDOWN_HOOK_TIMEOUT_SECS", 10)?,
            metrics_flush_interval: secs(&lookup, "METRICS_FLUSH_SECS", 10)?,
            work_dir: dir(&lookup, "WORK_DIR")?,
            cleanup_max_age: secs(&lookup, "CLEANUP_MAX_AGE_SECS", 3600)?,
            python_bin: lookup("PYTHON_BIN").unwrap_or_else(|| "python".into()),
            model_scripts_dir: dir(&lookup, "MODEL_SCRIPTS_DIR")?,
            enable_ranking: parse(&lookup, "ENABLE_RANKING", true)?,
            initial_model: parse(&lookup, "INITIAL_MODEL", ModelKind::StableDiffusionText2Im)?,
            http_timeout: secs(&lookup, "HTTP_TIMEOUT_SECS", 30)?,
            http_connect_timeout: secs(&lookup, "HTTP_CONNECT_TIMEOUT_SECS", 10)?,
        })
    }
}

impl fmt::Debug for WorkerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerConfig")
            .field("api_url", &self.api_url)
            .field("token", &"<redacted>")
            .field("pool_size", &self.pool_size)
            .field("queue_capacity", &self.queue_capacity)
            .field("poll_interval", &self.poll_interval)
            .field("max_poll_backoff", &self.max_poll_backoff)
            .field("error_ttl", &self.error_ttl)
            .field("error_max_count", &self.error_max_count)
            .field("shutdown_hook_timeout", &self.shutdown_hook_timeout)
            .field("metrics_flush_interval", &self.metrics_flush_interval)
            .field("work_dir", &self.work_dir)
            .field("cleanup_max_age", &self.cleanup_max_age)
            .field("python_bin", &self.python_bin)
            .field("model_scripts_dir", &self.model_scripts_dir)
            .field("enable_ranking", &self.enable_ranking)
            .field("initial_model", &self.initial_model)
            .field("http_timeout", &self.http_timeout)
            .field("http_connect_timeout", &self.http_connect_timeout)
            .finish()
    }
}

// ---- helpers ----

fn parse<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}

fn secs<F>(lookup: &F, var: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse(lookup, var, default).map(Duration::from_secs)
}

/// Directory variable defaulting to `.`, made absolute.
fn dir<F>(lookup: &F, var: &'static str) -> Result<PathBuf, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(var).unwrap_or_else(|| ".".into());
    std::path::absolute(&value).map_err(|source| ConfigError::Path { var, value, source })
}

fn non_zero(var: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: "must be at least 1".into(),
        });
    }
    Ok(())
}

fn read_credentials(path: &Path) -> Result<String, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::CredentialsUnreadable {
        path: path.to_path_buf(),
        source,
    })?;
    let credentials: Credentials =
        serde_json::from_str(&raw).map_err(|source| ConfigError::CredentialsMalformed {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(credentials.access_token)
}
