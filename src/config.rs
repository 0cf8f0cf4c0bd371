//! Configuration types, built from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::{ConfigError, Result};
use crate::llm::{LlmBackend, LlmConfig};
use crate::mail::{EmailService, MailboxConfig, detect_service};

/// Default number of draft attempts per email.
pub const DEFAULT_MAX_TRIALS: u32 = 3;

/// Default fetch window.
pub const DEFAULT_LOOKBACK_HOURS: u32 = 8;

/// What happens to an approved draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// Store the reply as a provider draft for a human to send.
    #[default]
    Draft,
    /// Send the reply immediately.
    Send,
}

impl FromStr for DispatchMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "draft" => Ok(Self::Draft),
            "send" => Ok(Self::Send),
            other => Err(ConfigError::InvalidValue {
                key: "MAIL_ASSIST_DISPATCH".to_string(),
                message: format!("'{other}' (expected draft or send)"),
            }),
        }
    }
}

/// Workflow behaviour.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub dispatch: DispatchMode,
    /// Draft attempts before an email is discarded.
    pub max_trials: u32,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchMode::Draft,
            max_trials: DEFAULT_MAX_TRIALS,
        }
    }
}

/// Everything the binary needs.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mailbox: MailboxConfig,
    pub llm: LlmConfig,
    pub workflow: WorkflowConfig,
    /// Re-run the workflow on this interval; `None` runs once.
    pub poll_interval: Option<Duration>,
    pub knowledge_dir: Option<PathBuf>,
    /// Daily-rotated log files are written here when set.
    pub log_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required =
            |key: &str| var(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()));

        // ── Mailbox ─────────────────────────────────────────────────
        let address = required("MAIL_ASSIST_ADDRESS")?;
        let service = match var("MAIL_ASSIST_SERVICE") {
            Some(v) => v.parse::<EmailService>()?,
            None => detect_service(&address),
        };
        let access_token = SecretString::from(required(service.token_var())?);
        let lookback_hours = parse_or(&var, "MAIL_ASSIST_LOOKBACK_HOURS", DEFAULT_LOOKBACK_HOURS)?;

        let mailbox = MailboxConfig {
            address,
            service,
            access_token,
            lookback_hours,
            base_url: var("MAIL_ASSIST_API_BASE_URL"),
        };

        // ── LLM ─────────────────────────────────────────────────────
        let backend = match var("MAIL_ASSIST_LLM_BACKEND") {
            Some(v) => v.parse::<LlmBackend>()?,
            None => LlmBackend::Anthropic,
        };
        let llm = LlmConfig {
            backend,
            api_key: SecretString::from(required(backend.api_key_var())?),
            model: var("MAIL_ASSIST_MODEL").unwrap_or_else(|| backend.default_model().to_string()),
        };

        // ── Workflow ────────────────────────────────────────────────
        let dispatch = match var("MAIL_ASSIST_DISPATCH") {
            Some(v) => v.parse::<DispatchMode>()?,
            None => DispatchMode::default(),
        };
        let max_trials = parse_or(&var, "MAIL_ASSIST_MAX_TRIALS", DEFAULT_MAX_TRIALS)?;
        if max_trials == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MAIL_ASSIST_MAX_TRIALS".to_string(),
                message: "must be at least 1".to_string(),
            }
            .into());
        }

        let poll_interval = match var("MAIL_ASSIST_POLL_INTERVAL_SECS") {
            Some(_) => {
                let secs: u64 = parse_or(&var, "MAIL_ASSIST_POLL_INTERVAL_SECS", 0)?;
                (secs > 0).then(|| Duration::from_secs(secs))
            }
            None => None,
        };

        Ok(Self {
            mailbox,
            llm,
            workflow: WorkflowConfig {
                dispatch,
                max_trials,
            },
            poll_interval,
            knowledge_dir: var("MAIL_ASSIST_KNOWLEDGE_DIR").map(PathBuf::from),
            log_dir: var("MAIL_ASSIST_LOG_DIR").map(PathBuf::from),
        })
    }
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> std::result::Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(v) => v.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}
