use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::monitoring::EvaluationPolicy;
use crate::notifications::DispatchPolicy;
use crate::notifications::senders::email::SmtpSettings;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse TOML from config file at {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("Failed to load config from environment: {0}")]
    Env(#[from] envy::Error),
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub jwt_secret: String,
    pub listen_addr: String,
    pub log_dir: String,
    pub notification_encryption_key: String,
    pub check_retention_days: i64,
    pub uptime_window_hours: i64,
    pub failure_threshold: u32,
    pub escalation_failures: u32,
    pub ssl_warning_days: i64,
    pub ssl_critical_days: i64,
    pub webhook_failure_streak: u32,
    pub history_capacity: usize,
    pub dispatch_max_attempts: u32,
    pub dispatch_initial_backoff_ms: u64,
    pub dispatch_attempt_timeout_seconds: u64,
    pub notify_on_transitions: bool,
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from: Option<String>,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
struct PartialServerConfig {
    database_url: Option<String>,
    database_max_connections: Option<u32>,
    jwt_secret: Option<String>,
    listen_addr: Option<String>,
    log_dir: Option<String>,
    notification_encryption_key: Option<String>,
    check_retention_days: Option<i64>,
    uptime_window_hours: Option<i64>,
    failure_threshold: Option<u32>,
    escalation_failures: Option<u32>,
    ssl_warning_days: Option<i64>,
    ssl_critical_days: Option<i64>,
    webhook_failure_streak: Option<u32>,
    history_capacity: Option<usize>,
    dispatch_max_attempts: Option<u32>,
    dispatch_initial_backoff_ms: Option<u64>,
    dispatch_attempt_timeout_seconds: Option<u64>,
    notify_on_transitions: Option<bool>,
    smtp_host: Option<String>,
    smtp_port: Option<u16>,
    smtp_username: Option<String>,
    smtp_password: Option<String>,
    smtp_from: Option<String>,
}

fn default_notification_key() -> String {
    // Development only. Override in production.
    "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f".to_string()
}

impl ServerConfig {
    /// File first, then environment (after `.env`), environment winning.
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let file_config = match config_path {
            Some(path) => read_file(Path::new(path))?,
            None => PartialServerConfig::default(),
        };
        let env_config: PartialServerConfig = envy::from_env::<PartialServerConfig>()?;
        merge(env_config, file_config)
    }

    pub fn evaluation_policy(&self) -> EvaluationPolicy {
        EvaluationPolicy {
            failure_threshold: self.failure_threshold,
            escalation_failures: self.escalation_failures,
            ssl_warning_days: self.ssl_warning_days,
            ssl_critical_days: self.ssl_critical_days,
            webhook_failure_streak: self.webhook_failure_streak,
            history_capacity: self.history_capacity,
        }
    }

    pub fn dispatch_policy(&self) -> DispatchPolicy {
        DispatchPolicy {
            max_attempts: self.dispatch_max_attempts,
            initial_backoff: Duration::from_millis(self.dispatch_initial_backoff_ms),
            attempt_timeout: Duration::from_secs(self.dispatch_attempt_timeout_seconds),
            notify_on_transitions: self.notify_on_transitions,
        }
    }

    /// `None` when no relay host is configured; email channels then fail to send.
    pub fn smtp_settings(&self) -> Option<SmtpSettings> {
        let host = self.smtp_host.clone()?;
        Some(SmtpSettings {
            from: self
                .smtp_from
                .clone()
                .unwrap_or_else(|| format!("vigil@{host}")),
            host,
            port: self.smtp_port,
            username: self.smtp_username.clone(),
            password: self.smtp_password.clone(),
        })
    }

    pub fn uptime_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.uptime_window_hours)
    }
}

fn read_file(path: &Path) -> Result<PartialServerConfig, ConfigError> {
    if !path.exists() {
        return Ok(PartialServerConfig::default());
    }
    let display = path.display().to_string();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: display.clone(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: display,
        source,
    })
}

fn merge(env: PartialServerConfig, file: PartialServerConfig) -> Result<ServerConfig, ConfigError> {
    let defaults = EvaluationPolicy::default();
    let dispatch = DispatchPolicy::default();

    let config = ServerConfig {
        database_url: env
            .database_url
            .or(file.database_url)
            .ok_or(ConfigError::Missing("DATABASE_URL"))?,
        database_max_connections: env
            .database_max_connections
            .or(file.database_max_connections)
            .unwrap_or(10),
        jwt_secret: env
            .jwt_secret
            .or(file.jwt_secret)
            .ok_or(ConfigError::Missing("JWT_SECRET"))?,
        listen_addr: env
            .listen_addr
            .or(file.listen_addr)
            .unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        log_dir: env
            .log_dir
            .or(file.log_dir)
            .unwrap_or_else(|| "logs".to_string()),
        notification_encryption_key: env
            .notification_encryption_key
            .or(file.notification_encryption_key)
            .unwrap_or_else(default_notification_key),
        check_retention_days: env
            .check_retention_days
            .or(file.check_retention_days)
            .unwrap_or(30),
        uptime_window_hours: env
            .uptime_window_hours
            .or(file.uptime_window_hours)
            .unwrap_or(168),
        failure_threshold: env
            .failure_threshold
            .or(file.failure_threshold)
            .unwrap_or(defaults.failure_threshold),
        escalation_failures: env
            .escalation_failures
            .or(file.escalation_failures)
            .unwrap_or(defaults.escalation_failures),
        ssl_warning_days: env
            .ssl_warning_days
            .or(file.ssl_warning_days)
            .unwrap_or(defaults.ssl_warning_days),
        ssl_critical_days: env
            .ssl_critical_days
            .or(file.ssl_critical_days)
            .unwrap_or(defaults.ssl_critical_days),
        webhook_failure_streak: env
            .webhook_failure_streak
            .or(file.webhook_failure_streak)
            .unwrap_or(defaults.webhook_failure_streak),
        history_capacity: env
            .history_capacity
            .or(file.history_capacity)
            .unwrap_or(defaults.history_capacity),
        dispatch_max_attempts: env
            .dispatch_max_attempts
            .or(file.dispatch_max_attempts)
            .unwrap_or(dispatch.max_attempts),
        dispatch_initial_backoff_ms: env
            .dispatch_initial_backoff_ms
            .or(file.dispatch_initial_backoff_ms)
            .unwrap_or(dispatch.initial_backoff.as_millis() as u64),
        dispatch_attempt_timeout_seconds: env
            .dispatch_attempt_timeout_seconds
            .or(file.dispatch_attempt_timeout_seconds)
            .unwrap_or(dispatch.attempt_timeout.as_secs()),
        notify_on_transitions: env
            .notify_on_transitions
            .or(file.notify_on_transitions)
            .unwrap_or(dispatch.notify_on_transitions),
        smtp_host: env.smtp_host.or(file.smtp_host),
        smtp_port: env.smtp_port.or(file.smtp_port).unwrap_or(587),
        smtp_username: env.smtp_username.or(file.smtp_username),
        smtp_password: env.smtp_password.or(file.smtp_password),
        smtp_from: env.smtp_from.or(file.smtp_from),
    };
    config.check()?;
    Ok(config)
}

impl ServerConfig {
    fn check(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid {
                key: "failure_threshold",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.escalation_failures < self.failure_threshold {
            return Err(ConfigError::Invalid {
                key: "escalation_failures",
                reason: "must not be below failure_threshold".to_string(),
            });
        }
        if self.ssl_critical_days > self.ssl_warning_days {
            return Err(ConfigError::Invalid {
                key: "ssl_critical_days",
                reason: "must not exceed ssl_warning_days".to_string(),
            });
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "history_capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.notification_encryption_key.trim().len() != 64
            || hex::decode(self.notification_encryption_key.trim()).is_err()
        {
            return Err(ConfigError::Invalid {
                key: "notification_encryption_key",
                reason: "expected 64 hex characters".to_string(),
            });
        }
        Ok(())
    }
}
