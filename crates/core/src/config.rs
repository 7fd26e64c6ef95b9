use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

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

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    match profiled_env_opt(profile, key) {
        Some(v) => match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        None => default,
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub server: ServerConfig,
    pub tasks: TasksConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `TASKWIRE_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("TASKWIRE_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            server: ServerConfig::from_env_profiled(p),
            tasks: TasksConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  server:  name={}", self.server.name);
        tracing::info!(
            "  tasks:   enabled={}, default_ttl_ms={}, max_ttl_ms={}",
            self.tasks.enabled,
            self.tasks.default_ttl_ms,
            self.tasks.max_ttl_ms
        );
        tracing::info!(
            "  polling: poll_interval_ms={}, sweep_interval_ms={}, notifications={}",
            self.tasks.poll_interval_ms,
            self.tasks.sweep_interval_ms,
            self.tasks.status_notifications
        );
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            profile: String::new(),
            server: ServerConfig::default(),
            tasks: TasksConfig::default(),
        }
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Name reported to clients during `initialize`.
    pub name: String,
}

impl ServerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            name: profiled_env_or(p, "SERVER_NAME", "taskwire"),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "taskwire".to_string(),
        }
    }
}

// ── Tasks ─────────────────────────────────────────────────────

/// Background task settings. Passed into the router, executor and server
/// at construction time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksConfig {
    /// Whether background (task-augmented) execution is available at all.
    pub enabled: bool,
    /// Keep-alive applied to a task when the caller does not request one.
    pub default_ttl_ms: u64,
    /// Upper bound for caller-requested keep-alive.
    pub max_ttl_ms: u64,
    /// Poll interval suggested to clients.
    pub poll_interval_ms: u64,
    /// Period of the expired-task sweeper. Zero disables it.
    pub sweep_interval_ms: u64,
    /// Emit `notifications/tasks/*` to connected clients.
    pub status_notifications: bool,
}

pub const DEFAULT_TTL_MS: u64 = 60_000;
pub const DEFAULT_MAX_TTL_MS: u64 = 24 * 60 * 60 * 1000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 30_000;

impl TasksConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            enabled: profiled_env_bool(p, "TASKS_ENABLED", true),
            default_ttl_ms: profiled_env_u64(p, "TASK_DEFAULT_TTL_MS", DEFAULT_TTL_MS),
            max_ttl_ms: profiled_env_u64(p, "TASK_MAX_TTL_MS", DEFAULT_MAX_TTL_MS),
            poll_interval_ms: profiled_env_u64(p, "TASK_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS),
            sweep_interval_ms: profiled_env_u64(p, "TASK_SWEEP_INTERVAL_MS", DEFAULT_SWEEP_INTERVAL_MS),
            status_notifications: profiled_env_bool(p, "TASK_STATUS_NOTIFICATIONS", true),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn max_ttl(&self) -> Duration {
        Duration::from_millis(self.max_ttl_ms.max(self.default_ttl_ms))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// `None` when the sweeper is disabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_ms > 0).then(|| Duration::from_millis(self.sweep_interval_ms))
    }
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_ms: DEFAULT_TTL_MS,
            max_ttl_ms: DEFAULT_MAX_TTL_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            status_notifications: true,
        }
    }
}
