use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::VigilError;
use crate::model::SignalType;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_parse<T: std::str::FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub postgres: PostgresConfig,
    pub detection: DetectionConfig,
    pub inputs: InputConfig,
}

/// Well-known env keys that identify a profile when prefixed.
const PROFILE_MARKER_KEYS: &[&str] = &["PG_HOST", "PG_USERNAME", "VIGIL_LOG_DIR"];

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `VIGIL_PROFILE`. When set (e.g. `PROD`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("VIGIL_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            postgres: PostgresConfig::from_env_profiled(p),
            detection: DetectionConfig::from_env_profiled(p),
            inputs: InputConfig::from_env_profiled(p),
        }
    }

    /// Discover available profiles by scanning env vars for `{PREFIX}_{MARKER_KEY}` patterns.
    /// Always includes "default" (the unprefixed config).
    pub fn available_profiles() -> Vec<String> {
        profiles_from_keys(env::vars().map(|(key, _)| key))
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Reject settings the scorer cannot work with.
    pub fn validate(&self) -> Result<(), VigilError> {
        self.detection.validate()
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        let d = &self.detection;
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  postgres:    host={}, db={}", self.postgres.host, self.postgres.database);
        tracing::info!(
            "  detection:   threshold={}, contamination(login={}, review={}), trees={}, subsample={}",
            d.threshold,
            d.login_contamination,
            d.review_contamination,
            d.tree_count,
            d.subsample_size
        );
        tracing::info!("  inputs:      log_dir={}", self.inputs.log_dir.display());
    }

    /// Return a redacted view safe for printing (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "available_profiles": Self::available_profiles(),
            "postgres": {
                "host": self.postgres.host,
                "port": self.postgres.port,
                "database": self.postgres.database,
                "configured": self.postgres.is_configured(),
            },
            "detection": self.detection,
            "inputs": { "log_dir": self.inputs.log_dir },
        })
    }
}

fn profiles_from_keys(keys: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut profiles = std::collections::BTreeSet::new();
    profiles.insert("default".to_string());

    for key in keys {
        for marker in PROFILE_MARKER_KEYS {
            if let Some(prefix) = key.strip_suffix(&format!("_{}", marker)) {
                if !prefix.is_empty()
                    && prefix != "VIGIL"
                    && prefix.chars().all(|c| c.is_ascii_uppercase() || c == '_')
                {
                    profiles.insert(prefix.to_string());
                }
            }
        }
    }

    profiles.into_iter().collect()
}

// ── PostgreSQL ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl_mode: String,
    pub max_connections: u32,
}

impl PostgresConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "PG_HOST", "localhost"),
            port: profiled_env_parse(p, "PG_PORT", 5432),
            database: profiled_env_or(p, "PG_DATABASE", "postgres"),
            username: profiled_env_opt(p, "PG_USERNAME"),
            password: profiled_env_opt(p, "PG_PASSWORD"),
            ssl_mode: profiled_env_or(p, "PG_SSL_MODE", "prefer"),
            max_connections: profiled_env_parse(p, "PG_MAX_CONNECTIONS", 4),
        }
    }

    pub fn connection_string(&self) -> String {
        let user = self.username.as_deref().unwrap_or("postgres");
        let pass = self.password.as_deref().unwrap_or("");
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            user, pass, self.host, self.port, self.database, self.ssl_mode
        )
    }

    pub fn is_configured(&self) -> bool {
        self.username.is_some()
    }
}

// ── Detection policy ──────────────────────────────────────────

/// Scoring constants. Defaults carry the calibration the monitors shipped
/// with; none of them is learned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Scores at or above this value are classified `bad`.
    pub threshold: f64,
    pub login_contamination: f64,
    pub review_contamination: f64,
    pub tree_count: usize,
    pub subsample_size: usize,
    pub login_seed: u64,
    pub review_seed: u64,
    /// Decimal places scores are rounded to before classification.
    pub decimals: u32,
}

pub const DEFAULT_THRESHOLD: f64 = -0.05;
pub const DEFAULT_LOGIN_CONTAMINATION: f64 = 0.02;
pub const DEFAULT_REVIEW_CONTAMINATION: f64 = 0.05;
pub const DEFAULT_TREE_COUNT: usize = 100;
pub const DEFAULT_SUBSAMPLE_SIZE: usize = 256;
pub const DEFAULT_SEED: u64 = 42;
pub const DEFAULT_DECIMALS: u32 = 5;
/// Beyond this, `10^decimals` no longer rounds an f64 meaningfully.
pub const MAX_DECIMALS: u32 = 15;

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            login_contamination: DEFAULT_LOGIN_CONTAMINATION,
            review_contamination: DEFAULT_REVIEW_CONTAMINATION,
            tree_count: DEFAULT_TREE_COUNT,
            subsample_size: DEFAULT_SUBSAMPLE_SIZE,
            login_seed: DEFAULT_SEED,
            review_seed: DEFAULT_SEED + 1,
            decimals: DEFAULT_DECIMALS,
        }
    }
}

impl DetectionConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            threshold: profiled_env_parse(p, "VIGIL_THRESHOLD", d.threshold),
            login_contamination: profiled_env_parse(
                p,
                "VIGIL_LOGIN_CONTAMINATION",
                d.login_contamination,
            ),
            review_contamination: profiled_env_parse(
                p,
                "VIGIL_REVIEW_CONTAMINATION",
                d.review_contamination,
            ),
            tree_count: profiled_env_parse(p, "VIGIL_TREE_COUNT", d.tree_count),
            subsample_size: profiled_env_parse(p, "VIGIL_SUBSAMPLE_SIZE", d.subsample_size),
            login_seed: profiled_env_parse(p, "VIGIL_LOGIN_SEED", d.login_seed),
            review_seed: profiled_env_parse(p, "VIGIL_REVIEW_SEED", d.review_seed),
            decimals: profiled_env_parse(p, "VIGIL_SCORE_DECIMALS", d.decimals),
        }
    }

    pub fn contamination(&self, signal: SignalType) -> f64 {
        match signal {
            SignalType::FailedLogin => self.login_contamination,
            SignalType::ReviewRate => self.review_contamination,
        }
    }

    pub fn seed(&self, signal: SignalType) -> u64 {
        match signal {
            SignalType::FailedLogin => self.login_seed,
            SignalType::ReviewRate => self.review_seed,
        }
    }

    pub fn validate(&self) -> Result<(), VigilError> {
        for signal in SignalType::ALL {
            let c = self.contamination(signal);
            if !(c > 0.0 && c <= 0.5) {
                return Err(VigilError::InvalidConfig(format!(
                    "{signal} contamination must be in (0, 0.5], got {c}"
                )));
            }
        }
        if self.tree_count == 0 {
            return Err(VigilError::InvalidConfig("tree_count must be positive".into()));
        }
        if self.subsample_size == 0 {
            return Err(VigilError::InvalidConfig("subsample_size must be positive".into()));
        }
        if self.decimals > MAX_DECIMALS {
            return Err(VigilError::InvalidConfig(format!(
                "decimals must be at most {MAX_DECIMALS}, got {}",
                self.decimals
            )));
        }
        if !self.threshold.is_finite() {
            return Err(VigilError::InvalidConfig(format!(
                "threshold must be finite, got {}",
                self.threshold
            )));
        }
        Ok(())
    }
}

// ── Input files ───────────────────────────────────────────────

/// Locations of exported activity records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    pub log_dir: PathBuf,
    pub login_baseline: String,
    pub login_recent: String,
    pub review_baseline: String,
    pub review_recent: String,
}

impl InputConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            log_dir: PathBuf::from(profiled_env_or(p, "VIGIL_LOG_DIR", "logs")),
            login_baseline: profiled_env_or(p, "VIGIL_LOGIN_BASELINE", "normal_logins_250.json"),
            login_recent: profiled_env_or(p, "VIGIL_LOGIN_RECENT", "logins.json"),
            review_baseline: profiled_env_or(p, "VIGIL_REVIEW_BASELINE", "normal_reviews.json"),
            review_recent: profiled_env_or(p, "VIGIL_REVIEW_RECENT", "reviews.json"),
        }
    }

    pub fn baseline_path(&self, signal: SignalType) -> PathBuf {
        match signal {
            SignalType::FailedLogin => self.log_dir.join(&self.login_baseline),
            SignalType::ReviewRate => self.log_dir.join(&self.review_baseline),
        }
    }

    pub fn recent_path(&self, signal: SignalType) -> PathBuf {
        match signal {
            SignalType::FailedLogin => self.log_dir.join(&self.login_recent),
            SignalType::ReviewRate => self.log_dir.join(&self.review_recent),
        }
    }
}
