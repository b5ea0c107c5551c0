//! Engine configuration (A1), read from `EXTRACTION_*`/provider/store
//! environment variables.
//!
//! The teacher resolves its LLM provider and pdfium backend through a chain
//! of `std::env::var` lookups with hard-coded defaults
//! (`convert.rs::resolve_provider`, `config.rs`'s builder) rather than a
//! config-file framework; `Settings::from_env` follows the same shape: one
//! function, one fallback per field, no external config crate.

use std::env;
use std::time::Duration;

use crate::error::EngineError;

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Retry/backoff knobs for C4, mirroring the teacher's `2u64.pow(attempt -
/// 1)` backoff but made configurable rather than hard-coded.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_backoff: Duration,
    pub per_attempt_timeout: Duration,
}

impl RetryConfig {
    fn from_env() -> Self {
        Self {
            max_attempts: env_parse("EXTRACTION_MAX_RETRIES", 3),
            base_delay: Duration::from_secs(env_parse("EXTRACTION_RETRY_DELAY_SECONDS", 5)),
            backoff_multiplier: env_parse("EXTRACTION_RETRY_BACKOFF_MULTIPLIER", 1.5),
            max_backoff: Duration::from_secs(env_parse("EXTRACTION_MAX_BACKOFF_SECONDS", 30)),
            per_attempt_timeout: Duration::from_secs(env_parse("EXTRACTION_CHUNK_TIMEOUT_SECONDS", 180)),
        }
    }
}

/// TTL horizons for the job-state cache record (§6).
#[derive(Debug, Clone)]
pub struct JobTtlConfig {
    pub success: Duration,
    pub failure: Duration,
}

impl JobTtlConfig {
    fn from_env() -> Self {
        Self {
            success: Duration::from_secs(env_parse::<u64>("EXTRACTION_JOB_TTL_SUCCESS_HOURS", 1) * 3_600),
            failure: Duration::from_secs(env_parse::<u64>("EXTRACTION_JOB_TTL_FAILURE_HOURS", 24) * 3_600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub request_timeout: Duration,
}

impl LlmConfig {
    fn from_env() -> Result<Self, EngineError> {
        let api_key = env::var("EXTRACTION_LLM_API_KEY")
            .map_err(|_| EngineError::Validation("EXTRACTION_LLM_API_KEY is not set".to_string()))?;
        Ok(Self {
            base_url: env_or("EXTRACTION_LLM_BASE_URL", "https://api.openai.com/v1"),
            api_key,
            model: env_or("EXTRACTION_LLM_MODEL", "gpt-4o-mini"),
            request_timeout: Duration::from_secs(env_parse("EXTRACTION_LLM_TIMEOUT_SECS", 60)),
        })
    }
}

/// Top-level settings for the running engine: how many chunks run
/// concurrently, how long a chunk is allowed to run, where the LLM and
/// stores live.
#[derive(Debug, Clone)]
pub struct Settings {
    pub max_concurrent_chunks: usize,
    pub reaper_interval: Duration,
    pub retry: RetryConfig,
    pub job_ttl: JobTtlConfig,
    pub llm: LlmConfig,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub bind_addr: String,
}

impl Settings {
    /// Parse settings from the process environment. Fails only when a
    /// required field (the LLM API key) is missing; everything else has a
    /// documented default.
    pub fn from_env() -> Result<Self, EngineError> {
        Ok(Self {
            max_concurrent_chunks: env_parse("EXTRACTION_MAX_CONCURRENT", 10),
            reaper_interval: Duration::from_secs(env_parse("EXTRACTION_REAPER_INTERVAL_SECONDS", 120)),
            retry: RetryConfig::from_env(),
            job_ttl: JobTtlConfig::from_env(),
            llm: LlmConfig::from_env()?,
            database_url: env::var("DATABASE_URL").ok(),
            redis_url: env::var("REDIS_URL").ok(),
            bind_addr: env_or("EXTRACTION_BIND_ADDR", "0.0.0.0:8080"),
        })
    }
}
