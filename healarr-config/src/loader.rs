//! Configuration loading: env vars (via `dotenvy`) layered over a persisted
//! `settings` row layered over hard defaults (spec §6: "env → persisted
//! setting → default"), mirroring the explicit merge functions of
//! `ferrex-config::loader::db_url` rather than folding the precedence into
//! one opaque constructor.

use std::env;
use std::path::PathBuf;

use crate::models::{Config, ConfigSource, RateLimitSpec};

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

type LoadResult<T> = Result<T, ConfigLoadError>;

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &'static str) -> LoadResult<Option<T>> {
    match env_var(key) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigLoadError::InvalidValue { key, value: raw }),
    }
}

/// Resolves the base path per spec §6: env var wins, then a persisted
/// `settings` value, then the hard default `/`. Pure function so the
/// precedence rule itself is unit-testable without a database.
pub fn resolve_base_path(
    env_value: Option<&str>,
    persisted_value: Option<&str>,
) -> (String, ConfigSource) {
    if let Some(v) = env_value.map(str::trim).filter(|v| !v.is_empty()) {
        return (v.to_string(), ConfigSource::Env);
    }
    if let Some(v) = persisted_value.map(str::trim).filter(|v| !v.is_empty()) {
        return (v.to_string(), ConfigSource::Persisted);
    }
    ("/".to_string(), ConfigSource::Default)
}

/// Loads configuration from environment variables and `dotenvy`, applying
/// hard defaults for anything unset. Persisted `settings` overrides (spec §6)
/// are layered in afterwards by `healarr-server::main` once a database
/// connection exists, via [`resolve_base_path`] and the other per-field merge
/// helpers this module exposes.
pub fn load_from_env() -> LoadResult<Config> {
    let env_file_loaded = dotenvy::dotenv().is_ok();

    let mut config = Config::default();
    config.metadata.env_file_loaded = env_file_loaded;

    if let Some(host) = env_var("HEALARR_HOST") {
        config.server.host = host;
    }
    if let Some(port) = parse_env::<u16>("HEALARR_PORT")? {
        config.server.port = port;
    }
    if let Some(url) = env_var("DATABASE_URL") {
        config.database.url = url;
    }
    if let Some(level) = env_var("HEALARR_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(dir) = env_var("HEALARR_LOG_DIR") {
        config.logging.dir = Some(PathBuf::from(dir));
    }
    if let Some(json) = parse_env::<bool>("HEALARR_LOG_JSON")? {
        config.logging.json = json;
    }
    if let Some(dir) = env_var("HEALARR_DATA_DIR") {
        config.data_dir = PathBuf::from(dir);
    }

    let (base_path, source) = resolve_base_path(env_var("HEALARR_BASE_PATH").as_deref(), None);
    config.base_path = base_path;
    config.metadata.base_path_source = source;

    if let Some(retries) = parse_env::<i32>("HEALARR_DEFAULT_MAX_RETRIES")? {
        config.remediation.default_max_retries = retries;
    }
    if let Some(hours) = parse_env::<i32>("HEALARR_VERIFICATION_TIMEOUT_HOURS")? {
        config.remediation.verification_timeout_hours = hours;
    }
    if let Some(minutes) = parse_env::<i32>("HEALARR_VERIFICATION_INTERVAL_MINUTES")? {
        config.remediation.verification_interval_minutes = minutes;
    }

    if let Some(rps) = parse_env::<u32>("HEALARR_ARR_RATE_LIMIT_RPS")? {
        config.rate_limits.arr.rps = rps;
    }
    if let Some(burst) = parse_env::<u32>("HEALARR_ARR_RATE_LIMIT_BURST")? {
        config.rate_limits.arr.burst = burst;
    }

    if let Some(concurrency) = parse_env::<usize>("HEALARR_SCAN_WORKER_CONCURRENCY")? {
        config.scanner.worker_concurrency = concurrency.max(1);
    }
    if let Some(max_files) = parse_env::<u64>("HEALARR_SCAN_MAX_FILES")? {
        config.scanner.max_files_per_scan = Some(max_files);
    }

    if let Some(dry_run) = parse_env::<bool>("HEALARR_DRY_RUN")? {
        config.metadata.dry_run = dry_run;
    }

    if let Some(key) = env_var("HEALARR_API_KEY") {
        config.api_key = key;
    }

    if let Some(key_hex) = env_var("HEALARR_CREDENTIAL_KEY") {
        config.credential_key = parse_credential_key(&key_hex)?;
    }

    Ok(config)
}

fn parse_credential_key(hex: &str) -> LoadResult<[u8; 32]> {
    let bytes = hex_decode(hex).ok_or_else(|| ConfigLoadError::InvalidValue {
        key: "HEALARR_CREDENTIAL_KEY",
        value: hex.to_string(),
    })?;
    bytes.try_into().map_err(|_| ConfigLoadError::InvalidValue {
        key: "HEALARR_CREDENTIAL_KEY",
        value: hex.to_string(),
    })
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

/// Applies a rate-limit override pair parsed from a persisted `settings`
/// value, keeping whichever field was actually present.
pub fn merge_rate_limit(base: RateLimitSpec, rps: Option<u32>, burst: Option<u32>) -> RateLimitSpec {
    RateLimitSpec {
        rps: rps.unwrap_or(base.rps),
        burst: burst.unwrap_or(base.burst),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_path_prefers_env_over_persisted() {
        let (path, source) = resolve_base_path(Some("/media"), Some("/archive"));
        assert_eq!(path, "/media");
        assert_eq!(source, ConfigSource::Env);
    }

    #[test]
    fn base_path_falls_back_to_persisted() {
        let (path, source) = resolve_base_path(None, Some("/archive"));
        assert_eq!(path, "/archive");
        assert_eq!(source, ConfigSource::Persisted);
    }

    #[test]
    fn base_path_falls_back_to_default() {
        let (path, source) = resolve_base_path(None, None);
        assert_eq!(path, "/");
        assert_eq!(source, ConfigSource::Default);
    }

    #[test]
    fn base_path_ignores_blank_env_value() {
        let (path, source) = resolve_base_path(Some("   "), Some("/archive"));
        assert_eq!(path, "/archive");
        assert_eq!(source, ConfigSource::Persisted);
    }

    #[test]
    fn merge_rate_limit_keeps_base_when_override_absent() {
        let base = RateLimitSpec { rps: 5, burst: 5 };
        let merged = merge_rate_limit(base, None, Some(10));
        assert_eq!(merged.rps, 5);
        assert_eq!(merged.burst, 10);
    }

    #[test]
    fn hex_decode_round_trips_credential_key() {
        let hex = "00".repeat(32);
        let key = parse_credential_key(&hex).unwrap();
        assert_eq!(key, [0u8; 32]);
    }

    #[test]
    fn hex_decode_rejects_odd_length() {
        assert!(hex_decode("abc").is_none());
    }
}
