use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use onboard_pipeline::processor::PipelineOptions;
use onboard_pipeline::registry::PluginSettings;

const REMOTE_ROOT_PREFIX: &str = "REMOTE_ROOT_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be {expected}, got '{value}'")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Production,
}

impl Environment {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "dev" | "development" | "local" => Some(Self::Dev),
            "prod" | "production" => Some(Self::Production),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Production => "production",
        }
    }
}

/// What the worker does after startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// One pass over every local inbox, then exit.
    Scan,
    /// Repeat the local scan on an interval until shutdown.
    Watch,
    /// Poll the remote endpoints on an interval until shutdown.
    Remote,
    /// Fetch credentials and test each product's database connection.
    Check,
}

impl RunMode {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "scan" => Some(Self::Scan),
            "watch" => Some(Self::Watch),
            "remote" => Some(Self::Remote),
            "check" => Some(Self::Check),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::Watch => "watch",
            Self::Remote => "remote",
            Self::Check => "check",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub environment: Environment,
    pub base_dir: PathBuf,
    pub sql_dir: PathBuf,
    pub mode: RunMode,
    pub poll_interval: Duration,
    /// `None` when `ROW_TIMEOUT_SECS=0`.
    pub row_timeout: Option<Duration>,
    pub remote_timeout: Duration,
    pub allowed_submitters: Vec<String>,
    /// Remote endpoint root per product code.
    pub remote_roots: HashMap<String, String>,
    pub log_format: LogFormat,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var               | Default        |
    /// |-----------------------|----------------|
    /// | `ENV`                 | `dev`          |
    /// | `ONBOARD_BASE_DIR`    | `./products`   |
    /// | `ONBOARD_SQL_DIR`     | `./sqlqueries` |
    /// | `ONBOARD_MODE`        | `scan`         |
    /// | `POLL_INTERVAL_SECS`  | `60`           |
    /// | `ROW_TIMEOUT_SECS`    | `120`          |
    /// | `REMOTE_TIMEOUT_SECS` | `60`           |
    /// | `ALLOWED_SUBMITTERS`  | `olm_id`       |
    /// | `LOG_FORMAT`          | `pretty`       |
    /// | `REMOTE_ROOT_<CODE>`  | (unset)        |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let get = |key: &str, default: &str| -> String {
            vars.get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
                .to_string()
        };

        let raw_env = get("ENV", "dev");
        let environment = Environment::parse(&raw_env).ok_or(ConfigError::Invalid {
            name: "ENV",
            expected: "dev or production",
            value: raw_env,
        })?;

        let raw_mode = get("ONBOARD_MODE", "scan");
        let mode = RunMode::parse(&raw_mode).ok_or(ConfigError::Invalid {
            name: "ONBOARD_MODE",
            expected: "one of scan, watch, remote, check",
            value: raw_mode,
        })?;

        let poll_secs = parse_secs("POLL_INTERVAL_SECS", &get("POLL_INTERVAL_SECS", "60"))?;
        if poll_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "POLL_INTERVAL_SECS",
                expected: "greater than zero",
                value: "0".into(),
            });
        }
        let row_secs = parse_secs("ROW_TIMEOUT_SECS", &get("ROW_TIMEOUT_SECS", "120"))?;
        let remote_secs = parse_secs("REMOTE_TIMEOUT_SECS", &get("REMOTE_TIMEOUT_SECS", "60"))?;

        let allowed_submitters = get("ALLOWED_SUBMITTERS", "olm_id")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let log_format = match get("LOG_FORMAT", "pretty").to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        let remote_roots = vars
            .iter()
            .filter_map(|(k, v)| {
                let code = k.strip_prefix(REMOTE_ROOT_PREFIX)?;
                let root = v.trim().trim_end_matches('/');
                (!root.is_empty()).then(|| (code.to_ascii_uppercase(), root.to_string()))
            })
            .collect();

        Ok(Self {
            environment,
            base_dir: PathBuf::from(get("ONBOARD_BASE_DIR", "./products")),
            sql_dir: PathBuf::from(get("ONBOARD_SQL_DIR", "./sqlqueries")),
            mode,
            poll_interval: Duration::from_secs(poll_secs),
            row_timeout: (row_secs > 0).then(|| Duration::from_secs(row_secs)),
            remote_timeout: Duration::from_secs(remote_secs.max(1)),
            allowed_submitters,
            remote_roots,
            log_format,
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    pub fn plugin_settings(&self) -> PluginSettings {
        PluginSettings {
            restricted: self.is_production(),
            allowed_submitters: self.allowed_submitters.clone(),
            remote_roots: self.remote_roots.clone(),
        }
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            sql_dir: self.sql_dir.clone(),
            row_timeout: self.row_timeout,
        }
    }
}

fn parse_secs(name: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.parse().map_err(|_| ConfigError::Invalid {
        name,
        expected: "a whole number of seconds",
        value: raw.to_string(),
    })
}
