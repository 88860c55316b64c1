//! Runtime configuration.
//!
//! Values start from [`Config::default`], are optionally replaced by a JSON
//! file named in `REALTIME_CONFIG`, and are finally overridden one by one by
//! `REALTIME_*` environment variables. A malformed value never aborts
//! startup; it is logged and the previous value is kept.

use serde::Deserialize;
use std::{fmt::Display, str::FromStr, time::Duration};

const ENV_PREFIX: &str = "REALTIME_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub per_minute: u32,
    pub per_hour: u32,
    /// Cool-down applied when the per-minute cap is exceeded.
    pub block_minutes: u64,
}

impl RateLimitConfig {
    pub fn block_duration(&self) -> Duration {
        Duration::from_secs(self.block_minutes * 60)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_minute: 120,
            per_hour: 3_000,
            block_minutes: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub jwt_leeway_secs: u64,
    pub heartbeat_interval_secs: u64,
    /// A connection is stale after this many missed heartbeat intervals.
    pub stale_after_heartbeats: u32,
    pub outbound_capacity: usize,
    pub room_max_members: Option<usize>,
    pub message_limits: RateLimitConfig,
    pub connection_limits: RateLimitConfig,
    pub rate_limit_sweep_secs: u64,
    pub ai_progress_steps: u32,
    pub ai_step_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            jwt_secret: "change-me-in-production".to_string(),
            jwt_leeway_secs: 30,
            heartbeat_interval_secs: 30,
            stale_after_heartbeats: 3,
            outbound_capacity: 256,
            room_max_members: None,
            message_limits: RateLimitConfig::default(),
            connection_limits: RateLimitConfig {
                per_minute: 30,
                per_hour: 600,
                block_minutes: 10,
            },
            rate_limit_sweep_secs: 300,
            ai_progress_steps: 4,
            ai_step_interval_ms: 500,
        }
    }
}

impl Config {
    /// Loads the configuration from `REALTIME_CONFIG` (if set) and the process environment.
    pub fn load() -> Self {
        let base = match std::env::var(format!("{ENV_PREFIX}CONFIG")) {
            Ok(path) => match std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|raw| serde_json::from_str::<Config>(&raw).map_err(|e| e.to_string()))
            {
                Ok(config) => {
                    tracing::info!(%path, "Loaded configuration file");
                    config
                }
                Err(error) => {
                    tracing::warn!(%path, %error, "Ignoring unreadable configuration file");
                    Config::default()
                }
            },
            Err(_) => Config::default(),
        };

        base.with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies `REALTIME_*` overrides obtained through `lookup`.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(host) = get("HOST") {
            self.host = host;
        }
        if let Some(secret) = get("JWT_SECRET") {
            self.jwt_secret = secret;
        }
        override_parsed(&mut self.port, "PORT", get("PORT"));
        override_parsed(&mut self.jwt_leeway_secs, "JWT_LEEWAY_SECS", get("JWT_LEEWAY_SECS"));
        override_parsed(
            &mut self.heartbeat_interval_secs,
            "HEARTBEAT_INTERVAL_SECS",
            get("HEARTBEAT_INTERVAL_SECS"),
        );
        override_parsed(
            &mut self.stale_after_heartbeats,
            "STALE_AFTER_HEARTBEATS",
            get("STALE_AFTER_HEARTBEATS"),
        );
        override_parsed(&mut self.outbound_capacity, "OUTBOUND_CAPACITY", get("OUTBOUND_CAPACITY"));
        if let Some(raw) = get("ROOM_MAX_MEMBERS") {
            match raw.parse::<usize>() {
                Ok(0) => self.room_max_members = None,
                Ok(max) => self.room_max_members = Some(max),
                Err(error) => {
                    tracing::warn!(key = "ROOM_MAX_MEMBERS", %raw, %error, "Invalid value, keeping default")
                }
            }
        }
        override_parsed(
            &mut self.message_limits.per_minute,
            "MESSAGES_PER_MINUTE",
            get("MESSAGES_PER_MINUTE"),
        );
        override_parsed(
            &mut self.message_limits.per_hour,
            "MESSAGES_PER_HOUR",
            get("MESSAGES_PER_HOUR"),
        );
        override_parsed(
            &mut self.message_limits.block_minutes,
            "MESSAGE_BLOCK_MINUTES",
            get("MESSAGE_BLOCK_MINUTES"),
        );
        override_parsed(
            &mut self.connection_limits.per_minute,
            "CONNECTIONS_PER_MINUTE",
            get("CONNECTIONS_PER_MINUTE"),
        );
        override_parsed(
            &mut self.connection_limits.per_hour,
            "CONNECTIONS_PER_HOUR",
            get("CONNECTIONS_PER_HOUR"),
        );
        override_parsed(
            &mut self.connection_limits.block_minutes,
            "CONNECTION_BLOCK_MINUTES",
            get("CONNECTION_BLOCK_MINUTES"),
        );
        override_parsed(
            &mut self.rate_limit_sweep_secs,
            "RATE_LIMIT_SWEEP_SECS",
            get("RATE_LIMIT_SWEEP_SECS"),
        );
        override_parsed(&mut self.ai_progress_steps, "AI_PROGRESS_STEPS", get("AI_PROGRESS_STEPS"));
        override_parsed(
            &mut self.ai_step_interval_ms,
            "AI_STEP_INTERVAL_MS",
            get("AI_STEP_INTERVAL_MS"),
        );

        if self.jwt_secret == Config::default().jwt_secret {
            tracing::warn!("REALTIME_JWT_SECRET not set, using the development secret");
        }
        self
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn stale_timeout(&self) -> Duration {
        self.heartbeat_interval() * self.stale_after_heartbeats.max(1)
    }

    pub fn rate_limit_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.rate_limit_sweep_secs.max(1))
    }

    pub fn ai_step_interval(&self) -> Duration {
        Duration::from_millis(self.ai_step_interval_ms)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn override_parsed<T>(slot: &mut T, key: &str, raw: Option<String>)
where
    T: FromStr,
    T::Err: Display,
{
    let Some(raw) = raw else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *slot = value,
        Err(error) => tracing::warn!(key, %raw, %error, "Invalid value, keeping default"),
    }
}
