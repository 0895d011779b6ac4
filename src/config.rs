//! Environment-driven configuration.
//!
//! Every knob has a documented default; invalid values fail fast at startup
//! with a per-key [`ConfigError`]. Provider credentials are held in
//! [`SecretString`] so they never appear in debug output or logs.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default model for the analysis provider.
pub const DEFAULT_ANALYSIS_MODEL: &str = "claude-3-5-sonnet-20241022";
/// Default model for the research provider.
pub const DEFAULT_RESEARCH_MODEL: &str = "sonar-pro";
/// Default maximum upload size (10 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Resolved service settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub anthropic_api_key: SecretString,
    /// Absent key disables the legal-research stage entirely.
    pub perplexity_api_key: Option<SecretString>,
    /// Honor `X-Forwarded-For` for rate-limit keys. Off unless the
    /// service sits behind a proxy that sanitizes the header.
    pub trust_forwarded_for: bool,
    pub analysis_model: String,
    pub research_model: String,
    pub max_tokens: u32,
    pub max_upload_bytes: usize,
    pub rate_limit_per_minute: u32,
    pub max_concurrent_analyses: usize,
    pub upload_timeout: Duration,
    pub analysis_timeout: Duration,
    pub research_timeout: Duration,
    pub request_timeout: Duration,
    /// Retries after the first analysis attempt, transient failures only.
    pub analysis_retries: u32,
}

fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                Ok(None)
            } else {
                Ok(Some(trimmed.to_string()))
            }
        }
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "value is not valid UTF-8".to_string(),
        }),
    }
}

fn require_env(key: &str) -> Result<String, ConfigError> {
    optional_env(key)?.ok_or_else(|| ConfigError::MissingKey {
        key: key.to_string(),
    })
}

fn parse_string_env(key: &str, default: &str) -> Result<String, ConfigError> {
    Ok(optional_env(key)?.unwrap_or_else(|| default.to_string()))
}

fn parse_nonzero(key: &str, raw: &str) -> Result<u64, ConfigError> {
    let value: u64 = raw.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("'{raw}' is not a non-negative integer"),
    })?;
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "value must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

fn parse_nonzero_env(key: &str, default: u64) -> Result<u64, ConfigError> {
    match optional_env(key)? {
        Some(raw) => parse_nonzero(key, &raw),
        None => Ok(default),
    }
}

fn parse_u64_env(key: &str, default: u64) -> Result<u64, ConfigError> {
    match optional_env(key)? {
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{raw}' is not a non-negative integer"),
        }),
        None => Ok(default),
    }
}

fn narrow_u32(key: &str, value: u64) -> Result<u32, ConfigError> {
    u32::try_from(value).map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("'{value}' exceeds the maximum of {}", u32::MAX),
    })
}

fn narrow_usize(key: &str, value: u64) -> Result<usize, ConfigError> {
    usize::try_from(value).map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("'{value}' exceeds the platform maximum of {}", usize::MAX),
    })
}

fn parse_nonzero_u32_env(key: &str, default: u32) -> Result<u32, ConfigError> {
    narrow_u32(key, parse_nonzero_env(key, u64::from(default))?)
}

fn parse_nonzero_usize_env(key: &str, default: usize) -> Result<usize, ConfigError> {
    narrow_usize(key, parse_nonzero_env(key, default as u64)?)
}

fn parse_u32_env(key: &str, default: u32) -> Result<u32, ConfigError> {
    narrow_u32(key, parse_u64_env(key, u64::from(default))?)
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{raw}' is not a boolean (true/false)"),
        }),
    }
}

fn parse_bool_env(key: &str, default: bool) -> Result<bool, ConfigError> {
    match optional_env(key)? {
        Some(raw) => parse_bool(key, &raw),
        None => Ok(default),
    }
}

impl Settings {
    /// Resolve settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            anthropic_api_key: SecretString::from(require_env("ANTHROPIC_API_KEY")?),
            perplexity_api_key: optional_env("PERPLEXITY_API_KEY")?.map(SecretString::from),
            analysis_model: parse_string_env("CLAUSECHECK_MODEL", DEFAULT_ANALYSIS_MODEL)?,
            research_model: parse_string_env(
                "CLAUSECHECK_RESEARCH_MODEL",
                DEFAULT_RESEARCH_MODEL,
            )?,
            trust_forwarded_for: parse_bool_env("CLAUSECHECK_TRUST_FORWARDED_FOR", false)?,
            max_tokens: parse_nonzero_u32_env("CLAUSECHECK_MAX_TOKENS", 4096)?,
            max_upload_bytes: parse_nonzero_usize_env(
                "CLAUSECHECK_MAX_UPLOAD_BYTES",
                DEFAULT_MAX_UPLOAD_BYTES,
            )?,
            rate_limit_per_minute: parse_nonzero_u32_env("CLAUSECHECK_RATE_LIMIT_PER_MINUTE", 10)?,
            max_concurrent_analyses: parse_nonzero_usize_env(
                "CLAUSECHECK_MAX_CONCURRENT_ANALYSES",
                5,
            )?,
            upload_timeout: Duration::from_secs(parse_nonzero_env(
                "CLAUSECHECK_UPLOAD_TIMEOUT_SECS",
                30,
            )?),
            analysis_timeout: Duration::from_secs(parse_nonzero_env(
                "CLAUSECHECK_ANALYSIS_TIMEOUT_SECS",
                60,
            )?),
            research_timeout: Duration::from_secs(parse_nonzero_env(
                "CLAUSECHECK_RESEARCH_TIMEOUT_SECS",
                20,
            )?),
            request_timeout: Duration::from_secs(parse_nonzero_env(
                "CLAUSECHECK_REQUEST_TIMEOUT_SECS",
                90,
            )?),
            analysis_retries: parse_u32_env("CLAUSECHECK_ANALYSIS_RETRIES", 2)?,
        })
    }

    /// Fixed settings for tests: small limits, short timeouts, no research
    /// credentials.
    pub fn for_tests() -> Self {
        Self {
            anthropic_api_key: SecretString::from("test-key".to_string()),
            perplexity_api_key: None,
            trust_forwarded_for: false,
            analysis_model: DEFAULT_ANALYSIS_MODEL.to_string(),
            research_model: DEFAULT_RESEARCH_MODEL.to_string(),
            max_tokens: 1024,
            max_upload_bytes: 64 * 1024,
            rate_limit_per_minute: 100,
            max_concurrent_analyses: 2,
            upload_timeout: Duration::from_secs(5),
            analysis_timeout: Duration::from_secs(5),
            research_timeout: Duration::from_millis(200),
            request_timeout: Duration::from_secs(10),
            analysis_retries: 1,
        }
    }
}
