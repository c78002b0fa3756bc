//! Runtime configuration, loaded from environment variables.
//!
//! Mirrors the teacher's `Config::load()` shape: plain `std::env::var` reads
//! with defaults, no config-file crate. Malformed env values (unparsable
//! numbers/bools) are reported with `anyhow::Context`, same as the teacher;
//! out-of-range *values* construct a real `CoreError::ConfigurationInvalid`
//! so the error taxonomy described in spec.md §7 is actually produced, not
//! just a loose string.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::CoreError;

fn invalid(field: &str, reason: impl Into<String>) -> anyhow::Error {
    CoreError::ConfigurationInvalid { field: field.to_string(), reason: reason.into() }.into()
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Explicit path to cdb.exe. When `None`, the adapter auto-detects from
    /// standard install locations.
    pub cdb_path: Option<PathBuf>,

    pub base_command_timeout: Duration,
    pub complex_command_timeout: Duration,
    pub output_reading_timeout: Duration,
    pub idle_timeout: Duration,
    pub startup_delay: Duration,
    pub startup_timeout: Duration,

    pub symbol_server_timeout: Duration,
    pub symbol_server_max_retries: u32,
    pub symbol_search_path: Option<String>,

    pub enable_adaptive_timeouts: bool,
    pub performance_multiplier: f64,

    /// Env var names stripped from the CDB child process, uppercased.
    pub strip_env: HashSet<String>,

    pub max_concurrent_sessions: usize,
    pub session_timeout: Duration,
    pub cleanup_interval: Duration,
    pub disposal_timeout: Duration,

    /// Per-attempt cap for session-initiated auxiliary commands (currently:
    /// the proactive `.reload` issued right after startup), distinct from
    /// the user-command timeouts above.
    pub default_command_timeout: Duration,
    /// Cache trimming trigger: once a session's retained output (result +
    /// status cache) exceeds this many bytes, the cleanup sweep evicts the
    /// least-recently-used terminal entries until it's back under budget.
    pub memory_cleanup_threshold_bytes: u64,

    /// Cap on Recovery Controller restart attempts before a session is
    /// transitioned to `Faulted`.
    pub recovery_max_attempts: u32,

    pub batching_enabled: bool,
    pub max_batch_size: usize,
    pub batch_wait_timeout: Duration,
    pub batch_timeout_multiplier: f64,
    pub max_batch_timeout: Duration,
    /// Lower-cased excluded-command prefixes.
    pub excluded_commands: Vec<String>,

    pub log_level: String,
}

const DEFAULT_EXCLUDED_COMMANDS: &[&str] = &[
    "!analyze", "!dump", "!heap", "!memusage", "!runaway", "~*k", "!locks", "!cs", "!gchandles",
];

/// Commands whose prefix marks them "complex" -- they get the longer timeout.
pub const COMPLEX_COMMAND_PREFIXES: &[&str] = &[
    "!analyze", "!heap", "!address", "!process", "!thread", "!locks", "!handle", "!gflags",
    "!ext", "!sym", "!peb", "!teb",
];

fn env_u64(key: &str, default: u64) -> Result<u64> {
    match std::env::var(key) {
        Ok(v) => v.parse::<u64>().with_context(|| format!("invalid {key}: '{v}'")),
        Err(_) => Ok(default),
    }
}

fn env_usize(key: &str, default: usize) -> Result<usize> {
    match std::env::var(key) {
        Ok(v) => v.parse::<usize>().with_context(|| format!("invalid {key}: '{v}'")),
        Err(_) => Ok(default),
    }
}

fn env_f64(key: &str, default: f64) -> Result<f64> {
    match std::env::var(key) {
        Ok(v) => v.parse::<f64>().with_context(|| format!("invalid {key}: '{v}'")),
        Err(_) => Ok(default),
    }
}

fn env_bool(key: &str, default: bool) -> Result<bool> {
    match std::env::var(key) {
        Ok(v) => match v.to_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            other => Err(invalid(key, format!("invalid boolean: '{other}'"))),
        },
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let cdb_path = std::env::var("CDB_PATH").ok().map(PathBuf::from);

        let base_command_timeout = Duration::from_millis(env_u64("CDB_COMMAND_TIMEOUT_MS", 600_000)?);
        let complex_command_timeout =
            Duration::from_millis(env_u64("CDB_COMPLEX_COMMAND_TIMEOUT_MS", 1_800_000)?);
        let output_reading_timeout =
            Duration::from_millis(env_u64("CDB_OUTPUT_READING_TIMEOUT_MS", 60_000)?);
        let idle_timeout = Duration::from_millis(env_u64("CDB_IDLE_TIMEOUT_MS", 300_000)?);
        let startup_delay = Duration::from_millis(env_u64("CDB_STARTUP_DELAY_MS", 2_000)?);
        let startup_timeout = Duration::from_millis(env_u64("CDB_STARTUP_TIMEOUT_MS", 30_000)?);

        let symbol_server_timeout =
            Duration::from_millis(env_u64("CDB_SYMBOL_SERVER_TIMEOUT_MS", 60_000)?);
        let symbol_server_max_retries = env_u64("CDB_SYMBOL_SERVER_MAX_RETRIES", 3)? as u32;
        let symbol_search_path = std::env::var("CDB_SYMBOL_SEARCH_PATH").ok();

        let enable_adaptive_timeouts = env_bool("CDB_ENABLE_ADAPTIVE_TIMEOUTS", false)?;
        let performance_multiplier = env_f64("CDB_PERFORMANCE_MULTIPLIER", 1.0)?;
        if performance_multiplier <= 0.0 {
            return Err(invalid(
                "debugging.performanceMultiplier",
                format!("must be positive, got {performance_multiplier}"),
            ));
        }

        let strip_env: HashSet<String> = std::env::var("CDB_STRIP_ENV")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();

        let max_concurrent_sessions = env_usize("SESSIONS_MAX_CONCURRENT", 8)?;
        if max_concurrent_sessions == 0 {
            return Err(invalid("sessions.maxConcurrentSessions", "must be at least 1"));
        }
        let session_timeout = Duration::from_secs(env_u64("SESSIONS_TIMEOUT_SECS", 1_800)?);
        let cleanup_interval = Duration::from_secs(env_u64("SESSIONS_CLEANUP_INTERVAL_SECS", 300)?);
        let disposal_timeout = Duration::from_secs(env_u64("SESSIONS_DISPOSAL_TIMEOUT_SECS", 10)?);
        let default_command_timeout = Duration::from_millis(env_u64("SESSIONS_DEFAULT_COMMAND_TIMEOUT_MS", 600_000)?);
        let memory_cleanup_threshold_bytes = env_u64("SESSIONS_MEMORY_CLEANUP_THRESHOLD_BYTES", 100_000_000)?;
        let recovery_max_attempts = env_u64("CDB_RECOVERY_MAX_ATTEMPTS", 3)? as u32;

        let batching_enabled = env_bool("BATCHING_ENABLED", true)?;
        let max_batch_size = env_usize("BATCHING_MAX_SIZE", 5)?;
        if !(1..=10).contains(&max_batch_size) {
            return Err(invalid("batching.maxBatchSize", format!("must be in 1..=10, got {max_batch_size}")));
        }
        let batch_wait_timeout_ms = env_u64("BATCHING_WAIT_TIMEOUT_MS", 2_000)?;
        if !(100..=10_000).contains(&batch_wait_timeout_ms) {
            return Err(invalid(
                "batching.batchWaitTimeoutMs",
                format!("must be in 100..=10000, got {batch_wait_timeout_ms}"),
            ));
        }
        let batch_wait_timeout = Duration::from_millis(batch_wait_timeout_ms);
        let batch_timeout_multiplier = env_f64("BATCHING_TIMEOUT_MULTIPLIER", 1.0)?;
        if !(0.1..=5.0).contains(&batch_timeout_multiplier) {
            return Err(invalid(
                "batching.batchTimeoutMultiplier",
                format!("must be in 0.1..=5.0, got {batch_timeout_multiplier}"),
            ));
        }
        let max_batch_timeout_minutes = env_u64("BATCHING_MAX_TIMEOUT_MINUTES", 10)?;
        if !(1..=60).contains(&max_batch_timeout_minutes) {
            return Err(invalid(
                "batching.maxBatchTimeoutMinutes",
                format!("must be in 1..=60, got {max_batch_timeout_minutes}"),
            ));
        }
        let max_batch_timeout = Duration::from_secs(max_batch_timeout_minutes * 60);

        let excluded_commands = std::env::var("BATCHING_EXCLUDED_COMMANDS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|c| c.trim().to_lowercase())
                    .filter(|c| !c.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| {
                DEFAULT_EXCLUDED_COMMANDS
                    .iter()
                    .map(|s| s.to_lowercase())
                    .collect()
            });

        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Config {
            cdb_path,
            base_command_timeout,
            complex_command_timeout,
            output_reading_timeout,
            idle_timeout,
            startup_delay,
            startup_timeout,
            symbol_server_timeout,
            symbol_server_max_retries,
            symbol_search_path,
            enable_adaptive_timeouts,
            performance_multiplier,
            strip_env,
            max_concurrent_sessions,
            session_timeout,
            cleanup_interval,
            disposal_timeout,
            default_command_timeout,
            memory_cleanup_threshold_bytes,
            recovery_max_attempts,
            batching_enabled,
            max_batch_size,
            batch_wait_timeout,
            batch_timeout_multiplier,
            max_batch_timeout,
            excluded_commands,
            log_level,
        })
    }

    /// Effective timeout for a command, scaled by `performance_multiplier`
    /// when adaptive timeouts are enabled, and picking the complex-command
    /// ceiling when `command_text` matches one of the complex prefixes.
    pub fn command_timeout_for(&self, command_text: &str) -> Duration {
        let trimmed = command_text.trim_start();
        let is_complex = COMPLEX_COMMAND_PREFIXES
            .iter()
            .any(|p| trimmed.to_lowercase().starts_with(p));
        let base = if is_complex {
            self.complex_command_timeout
        } else {
            self.base_command_timeout
        };
        if self.enable_adaptive_timeouts {
            base.mul_f64(self.performance_multiplier)
        } else {
            base
        }
    }

    pub fn is_sensitive_env(&self, name: &str) -> bool {
        !self.strip_env.is_empty() && self.strip_env.contains(&name.to_uppercase())
    }
}

impl Default for Config {
    fn default() -> Self {
        // SAFETY of defaults: every env var is optional, so load() cannot
        // fail when the environment is empty.
        Config::load().expect("default configuration must be loadable with no env vars set")
    }
}
