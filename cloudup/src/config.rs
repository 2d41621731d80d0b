use std::time::Duration;

use anyhow::Context;

use crate::upload::SpeedMode;

pub const MIN_CONCURRENCY: usize = 1;
pub const MAX_CONCURRENCY: usize = 10;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5212";
const DEFAULT_POLICY_ID: &str = "default";
const DEFAULT_CONCURRENCY: usize = 4;
const DEFAULT_NEGOTIATE_INTERVAL_MS: u64 = 20;
const DEFAULT_START_DELAY_MS: u64 = 50;
const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 1000;
const DEFAULT_CHUNK_RETRIES: u32 = 3;
const DEFAULT_LISTING_PAGE_SIZE: u32 = 100;
const DEFAULT_COPY_SUFFIX: &str = "-copy";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub concurrency: usize,
    pub policy_id: String,
    pub overwrite: bool,
    /// Minimum spacing between session calls across all directories.
    pub negotiate_interval: Duration,
    pub start_delay: Duration,
    pub sample_interval: Duration,
    pub chunk_retries: u32,
    pub retry_base: Duration,
    pub retry_max: Duration,
    pub copy_suffix: String,
    pub speed_mode: SpeedMode,
    pub listing_page_size: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            policy_id: DEFAULT_POLICY_ID.to_string(),
            overwrite: false,
            negotiate_interval: Duration::from_millis(DEFAULT_NEGOTIATE_INTERVAL_MS),
            start_delay: Duration::from_millis(DEFAULT_START_DELAY_MS),
            sample_interval: Duration::from_millis(DEFAULT_SAMPLE_INTERVAL_MS),
            chunk_retries: DEFAULT_CHUNK_RETRIES,
            retry_base: Duration::from_millis(500),
            retry_max: Duration::from_secs(8),
            copy_suffix: DEFAULT_COPY_SUFFIX.to_string(),
            speed_mode: SpeedMode::Instant,
            listing_page_size: DEFAULT_LISTING_PAGE_SIZE,
        }
    }
}

pub fn clamp_concurrency(value: usize) -> usize {
    value.clamp(MIN_CONCURRENCY, MAX_CONCURRENCY)
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub base_url: String,
    pub token: String,
    pub engine: EngineConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let base_url =
            std::env::var("CLOUDUP_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let token = std::env::var("CLOUDUP_TOKEN").context("CLOUDUP_TOKEN is not set")?;
        let defaults = EngineConfig::default();
        let engine = EngineConfig {
            concurrency: clamp_concurrency(read_u64_env(
                "CLOUDUP_CONCURRENCY",
                DEFAULT_CONCURRENCY as u64,
            ) as usize),
            policy_id: std::env::var("CLOUDUP_POLICY_ID")
                .unwrap_or_else(|_| DEFAULT_POLICY_ID.to_string()),
            overwrite: read_bool_env("CLOUDUP_OVERWRITE", false),
            chunk_retries: read_u64_env("CLOUDUP_CHUNK_RETRIES", u64::from(DEFAULT_CHUNK_RETRIES))
                .min(u64::from(u32::MAX)) as u32,
            copy_suffix: std::env::var("CLOUDUP_COPY_SUFFIX")
                .ok()
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| DEFAULT_COPY_SUFFIX.to_string()),
            ..defaults
        };
        Ok(Self {
            base_url,
            token,
            engine,
        })
    }
}

fn read_u64_env(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn read_bool_env(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .and_then(|value| parse_bool(&value))
        .unwrap_or(default)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_is_clamped_to_supported_range() {
        assert_eq!(clamp_concurrency(0), 1);
        assert_eq!(clamp_concurrency(4), 4);
        assert_eq!(clamp_concurrency(64), 10);
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert_eq!(parse_bool("Yes"), Some(true));
        assert_eq!(parse_bool(" off "), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.negotiate_interval, Duration::from_millis(20));
        assert_eq!(config.copy_suffix, "-copy");
    }
}
