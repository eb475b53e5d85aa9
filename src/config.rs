//! Configuration types.
//!
//! Everything is read once at startup into an immutable [`Settings`]; the
//! pipeline never consults the environment while running.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    /// Any OpenAI-compatible `/chat/completions` server at `API_BASE`.
    Compatible,
    Anthropic,
    OpenAi,
}

impl std::str::FromStr for LlmBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compatible" | "openai-compatible" | "litellm" => Ok(Self::Compatible),
            "anthropic" => Ok(Self::Anthropic),
            "openai" => Ok(Self::OpenAi),
            other => Err(ConfigError::InvalidValue {
                key: "LLM_BACKEND".to_string(),
                message: format!(
                    "unknown backend '{other}' (expected compatible, anthropic or openai)"
                ),
            }),
        }
    }
}

/// Runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub backend: LlmBackend,
    /// Model used by the classify and refine stages.
    pub classification_model: String,
    /// Model used by the evaluate and test-generation stages.
    pub evaluation_model: String,
    /// Endpoint base for the compatible backend.
    pub api_base: Option<String>,
    pub api_key: Option<SecretString>,
    /// Upper bound on a single reasoning call.
    pub request_timeout: Duration,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Custom stage templates; the built-in set is used when absent.
    pub templates_path: Option<PathBuf>,
    /// Port for `serve`.
    pub port: u16,
    /// Directory for rolling log files, if file logging is wanted.
    pub log_dir: Option<PathBuf>,
}

impl Settings {
    /// Read settings from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`, which maps a variable name to its value.
    ///
    /// Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let required = |key: &str, hint: &str| {
            get(key).ok_or_else(|| ConfigError::MissingRequired {
                key: key.to_string(),
                hint: hint.to_string(),
            })
        };
        let classification_model = required(
            "CLASSIFICATION_LLM",
            "Set the model identifier used to classify and refine.",
        )?;
        let evaluation_model = required(
            "EVALUATION_LLM",
            "Set the model identifier used to evaluate and generate tests.",
        )?;

        let backend = match get("LLM_BACKEND") {
            Some(value) => value.parse()?,
            None => LlmBackend::Compatible,
        };

        let api_base = get("API_BASE");
        let api_key = get("LLM_API_KEY").map(SecretString::from);

        match backend {
            LlmBackend::Compatible if api_base.is_none() => {
                return Err(ConfigError::MissingRequired {
                    key: "API_BASE".to_string(),
                    hint: "The compatible backend needs the endpoint base, \
                           e.g. http://localhost:4000/v1"
                        .to_string(),
                });
            }
            LlmBackend::Anthropic | LlmBackend::OpenAi if api_key.is_none() => {
                return Err(ConfigError::MissingEnvVar("LLM_API_KEY".to_string()));
            }
            _ => {}
        }

        let request_timeout = Duration::from_secs(parse_or(&get, "LLM_TIMEOUT_SECS", 120u64)?);
        if request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "LLM_TIMEOUT_SECS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        let temperature = parse_or(&get, "LLM_TEMPERATURE", 0.1f32)?;
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::InvalidValue {
                key: "LLM_TEMPERATURE".to_string(),
                message: format!("{temperature} is outside 0.0..=2.0"),
            });
        }

        Ok(Self {
            backend,
            classification_model,
            evaluation_model,
            api_base,
            api_key,
            request_timeout,
            temperature,
            max_tokens: parse_or(&get, "LLM_MAX_TOKENS", 2048u32)?,
            templates_path: get("INBOX_REASONER_TEMPLATES").map(PathBuf::from),
            port: parse_or(&get, "INBOX_REASONER_PORT", 8080u16)?,
            log_dir: get("INBOX_REASONER_LOG_DIR").map(PathBuf::from),
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{raw}': {e}"),
        }),
        None => Ok(default),
    }
}
