//! Configuration types.

use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Preamble used when `TEXBOT_TEMPLATE` is not set.
pub const DEFAULT_TEMPLATE: &str = include_str!("../assets/template.tex");

/// Mention handle used when `BOT_USERNAME` is not set.
pub const DEFAULT_BOT_USERNAME: &str = "RenderLaTeXBot";

/// Default render queue bound.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Settings for the compile/convert pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Compiler program (invoked as `<compiler> -interaction=nonstopmode main.tex`).
    pub compiler: PathBuf,
    /// Converter program (invoked as `<converter> -density 300 main.pdf -quality 90 main.png`).
    pub converter: PathBuf,
    pub compile_timeout: Duration,
    pub convert_timeout: Duration,
    /// Treat a non-zero converter exit as a failed render.
    pub strict_convert: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            compiler: PathBuf::from("pdflatex"),
            converter: PathBuf::from("convert"),
            compile_timeout: Duration::from_secs(20),
            convert_timeout: Duration::from_secs(10),
            strict_convert: false,
        }
    }
}

/// Settings for the worker pool.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Number of workers (and therefore workspaces).
    pub workers: usize,
    /// Maximum number of jobs waiting for a free worker.
    pub queue_capacity: usize,
    /// Parent directory for per-worker workspaces (system temp dir if None).
    pub workspace_root: Option<PathBuf>,
    /// Reply with a short notice when a render fails.
    pub notify_failure: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: default_worker_count(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            workspace_root: None,
            notify_failure: false,
        }
    }
}

/// One worker per core, leaving one core for the poller; never fewer than one.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

/// Full bot configuration, built from environment variables.
#[derive(Debug)]
pub struct BotConfig {
    pub bot_token: SecretString,
    pub bot_username: String,
    pub whitelist: HashSet<i64>,
    /// Preamble prepended to every job body.
    pub template: String,
    pub pipeline: PipelineConfig,
    pub dispatch: DispatchConfig,
    /// Directory for rolling log files (stderr only if None).
    pub log_dir: Option<PathBuf>,
}

impl BotConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bot_token = lookup("BOT_TOKEN")
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("BOT_TOKEN".to_string()))?;

        let whitelist = parse_whitelist(
            &lookup("USER_WHITELIST")
                .ok_or_else(|| ConfigError::MissingEnvVar("USER_WHITELIST".to_string()))?,
        )?;

        let bot_username = lookup("BOT_USERNAME")
            .map(|u| u.trim().trim_start_matches('@').to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_BOT_USERNAME.to_string());

        let template = match lookup("TEXBOT_TEMPLATE") {
            Some(path) => std::fs::read_to_string(&path)?,
            None => DEFAULT_TEMPLATE.to_string(),
        };

        let defaults = PipelineConfig::default();
        let pipeline = PipelineConfig {
            compiler: lookup("TEXBOT_PDFLATEX")
                .map(PathBuf::from)
                .unwrap_or(defaults.compiler),
            converter: lookup("TEXBOT_CONVERT")
                .map(PathBuf::from)
                .unwrap_or(defaults.converter),
            compile_timeout: parse_var::<u64>(&lookup, "TEXBOT_COMPILE_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.compile_timeout),
            convert_timeout: parse_var::<u64>(&lookup, "TEXBOT_CONVERT_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.convert_timeout),
            strict_convert: parse_bool(&lookup, "TEXBOT_STRICT_CONVERT")?.unwrap_or(false),
        };

        let workers = parse_var::<usize>(&lookup, "TEXBOT_WORKERS")?
            .unwrap_or_else(default_worker_count);
        if workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "TEXBOT_WORKERS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        let queue_capacity = parse_var::<usize>(&lookup, "TEXBOT_QUEUE_CAPACITY")?
            .unwrap_or(DEFAULT_QUEUE_CAPACITY);
        if queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "TEXBOT_QUEUE_CAPACITY".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        let dispatch = DispatchConfig {
            workers,
            queue_capacity,
            workspace_root: lookup("TEXBOT_WORKSPACE_ROOT").map(PathBuf::from),
            notify_failure: parse_bool(&lookup, "TEXBOT_NOTIFY_FAILURE")?.unwrap_or(false),
        };

        Ok(Self {
            bot_token: SecretString::from(bot_token),
            bot_username,
            whitelist,
            template,
            pipeline,
            dispatch,
            log_dir: lookup("TEXBOT_LOG_DIR").map(PathBuf::from),
        })
    }
}

/// Parse a comma-separated list of numeric user ids.
pub fn parse_whitelist(raw: &str) -> Result<HashSet<i64>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>().map_err(|e| ConfigError::InvalidValue {
                key: "USER_WHITELIST".to_string(),
                message: format!("{s:?}: {e}"),
            })
        })
        .collect()
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            })
        })
        .transpose()
}

fn parse_bool(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<bool>, ConfigError> {
    lookup(key)
        .map(|raw| match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected a boolean, got {other:?}"),
            }),
        })
        .transpose()
}
