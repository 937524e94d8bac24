use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use pitwall_contracts::TtlPolicy;
use pitwall_contracts::canonical::normalize_session_key;

use crate::upstream::UpstreamClientConfig;

pub const DEFAULT_UPSTREAM_URL: &str = "https://api.openf1.org/v1";

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: SocketAddr,
    pub upstream_url: String,
    pub upstream_timeout_ms: u64,
    pub upstream_retry_max_attempts: u32,
    pub upstream_retry_base_backoff_ms: u64,
    pub upstream_rate_limit_window_secs: u64,
    pub upstream_rate_limit_per_window: u32,
    pub cache_max_entries: usize,
    pub cache_sweep_interval_ms: u64,
    pub ttl_static_secs: u64,
    pub ttl_live_secs: u64,
    pub ttl_car_data_secs: u64,
    pub ttl_radio_secs: u64,
    pub sampler_target_cap: usize,
    pub location_fetch_limit: usize,
    pub sessions_recent_meetings: usize,
    pub default_session_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for StartupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for StartupError {}

impl GatewayConfig {
    pub fn load() -> Result<Self, StartupError> {
        let mut merged = HashMap::new();

        if let Ok(config_path) = std::env::var("PITWALL_CONFIG_PATH") {
            let config_path = config_path.trim();
            if !config_path.is_empty() {
                let file_kv = parse_env_file(config_path)?;
                merged.extend(file_kv);
            }
        }

        merged.extend(std::env::vars());

        Self::from_kv(&merged)
    }

    pub fn from_kv(kv: &HashMap<String, String>) -> Result<Self, StartupError> {
        let env = EnvReader(kv);

        let upstream_url = env
            .text("PITWALL_UPSTREAM_URL")
            .unwrap_or(DEFAULT_UPSTREAM_URL)
            .trim_end_matches('/')
            .to_string();
        if !(upstream_url.starts_with("http://") || upstream_url.starts_with("https://")) {
            return Err(invalid("PITWALL_UPSTREAM_URL", "must be an http:// or https:// URL"));
        }

        let upstream_retry_max_attempts = env.parsed("PITWALL_UPSTREAM_RETRY_MAX_ATTEMPTS", 2u32)?;
        if upstream_retry_max_attempts > 10 {
            return Err(invalid("PITWALL_UPSTREAM_RETRY_MAX_ATTEMPTS", "must be <= 10"));
        }

        let default_session_key = env.text("PITWALL_DEFAULT_SESSION_KEY").unwrap_or("latest");
        let default_session_key = normalize_session_key(default_session_key)
            .map_err(|_| invalid("PITWALL_DEFAULT_SESSION_KEY", "must be latest or an integer"))?;

        Ok(Self {
            bind_addr: env.parsed(
                "PITWALL_BIND_ADDR",
                SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 5000),
            )?,
            upstream_url,
            upstream_timeout_ms: env.positive("PITWALL_UPSTREAM_TIMEOUT_MS", 5000u64)?,
            upstream_retry_max_attempts,
            upstream_retry_base_backoff_ms: env
                .parsed("PITWALL_UPSTREAM_RETRY_BASE_BACKOFF_MS", 100u64)?,
            upstream_rate_limit_window_secs: env
                .positive("PITWALL_UPSTREAM_RATE_LIMIT_WINDOW_SECS", 1u64)?,
            upstream_rate_limit_per_window: env
                .parsed("PITWALL_UPSTREAM_RATE_LIMIT_PER_WINDOW", 0u32)?,
            cache_max_entries: env.parsed("PITWALL_CACHE_MAX_ENTRIES", 4096usize)?,
            cache_sweep_interval_ms: env.positive("PITWALL_CACHE_SWEEP_INTERVAL_MS", 5000u64)?,
            ttl_static_secs: env.parsed("PITWALL_TTL_STATIC_SECS", 300u64)?,
            ttl_live_secs: env.parsed("PITWALL_TTL_LIVE_SECS", 10u64)?,
            ttl_car_data_secs: env.parsed("PITWALL_TTL_CAR_DATA_SECS", 5u64)?,
            ttl_radio_secs: env.parsed("PITWALL_TTL_RADIO_SECS", 120u64)?,
            sampler_target_cap: env.positive("PITWALL_SAMPLER_TARGET_CAP", 50usize)?,
            location_fetch_limit: env.parsed("PITWALL_LOCATION_FETCH_LIMIT", 1000usize)?,
            sessions_recent_meetings: env.parsed("PITWALL_SESSIONS_RECENT_MEETINGS", 3usize)?,
            default_session_key,
        })
    }

    pub fn ttl_policy(&self) -> TtlPolicy {
        TtlPolicy {
            static_ttl: Duration::from_secs(self.ttl_static_secs),
            live_ttl: Duration::from_secs(self.ttl_live_secs),
            car_data_ttl: Duration::from_secs(self.ttl_car_data_secs),
            radio_ttl: Duration::from_secs(self.ttl_radio_secs),
        }
    }

    pub fn upstream_client_config(&self) -> UpstreamClientConfig {
        UpstreamClientConfig {
            base_url: self.upstream_url.clone(),
            timeout: Duration::from_millis(self.upstream_timeout_ms),
            retry_max_attempts: self.upstream_retry_max_attempts,
            retry_base_backoff: Duration::from_millis(self.upstream_retry_base_backoff_ms),
            rate_limit_per_window: self.upstream_rate_limit_per_window,
            rate_limit_window: Duration::from_secs(self.upstream_rate_limit_window_secs.max(1)),
        }
    }
}

fn parse_env_file(path: &str) -> Result<HashMap<String, String>, StartupError> {
    let contents = std::fs::read_to_string(path).map_err(|_| StartupError {
        code: "ERR_CONFIG_FILE_READ",
        message: format!("failed to read config file at {}", path),
    })?;

    parse_env_lines(&contents)
}

fn parse_env_lines(contents: &str) -> Result<HashMap<String, String>, StartupError> {
    let mut kv = HashMap::new();

    for (idx, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (key, value) = line.split_once('=').ok_or_else(|| StartupError {
            code: "ERR_CONFIG_FILE_PARSE",
            message: format!("invalid config line {} (expected KEY=VALUE)", idx + 1),
        })?;

        let key = key.trim();
        if key.is_empty() {
            return Err(StartupError {
                code: "ERR_CONFIG_FILE_PARSE",
                message: format!("invalid config line {} (empty key)", idx + 1),
            });
        }

        kv.insert(key.to_string(), strip_quotes(value.trim()));
    }

    Ok(kv)
}

fn strip_quotes(s: &str) -> String {
    ['"', '\'']
        .iter()
        .find_map(|q| s.strip_prefix(*q).and_then(|rest| rest.strip_suffix(*q)))
        .unwrap_or(s)
        .to_string()
}

fn invalid(key: &str, requirement: &str) -> StartupError {
    StartupError {
        code: "ERR_INVALID_CONFIG",
        message: format!("{} {}", key, requirement),
    }
}

/// Typed view over merged `KEY=VALUE` settings. Blank values count as unset.
struct EnvReader<'a>(&'a HashMap<String, String>);

impl<'a> EnvReader<'a> {
    fn text(&self, key: &str) -> Option<&'a str> {
        self.0.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
    }

    fn parsed<T: FromStr>(&self, key: &str, default: T) -> Result<T, StartupError> {
        match self.text(key) {
            None => Ok(default),
            Some(raw) => raw.parse::<T>().map_err(|_| {
                invalid(key, &format!("has an invalid value {:?}", raw))
            }),
        }
    }

    fn positive<T>(&self, key: &str, default: T) -> Result<T, StartupError>
    where
        T: FromStr + PartialOrd + Default,
    {
        let value = self.parsed(key, default)?;
        if value <= T::default() {
            return Err(invalid(key, "must be >= 1"));
        }
        Ok(value)
    }
}
