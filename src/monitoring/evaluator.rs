//! Maps a probe outcome to a monitor status and an optional alert trigger.
//!
//! [`evaluate`] is a pure function of the current [`CheckResult`], the
//! monitor's recent [`CheckHistory`] and its settings. It never touches the
//! database; the pipeline applies its decision afterwards.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::db::enums::{AlertSeverity, AlertType, MonitorStatus};
use crate::monitoring::history::CheckHistory;
use crate::monitoring::models::{CheckResult, DeliveryAttempt, ProbeError, ProbePayload};
use crate::monitoring::validation::ProbeSettings;

/// Thresholds used by the evaluator. Loaded from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationPolicy {
    /// Consecutive failures before a monitor is declared down.
    pub failure_threshold: u32,
    /// Consecutive failures at which a down alert becomes critical.
    pub escalation_failures: u32,
    pub ssl_warning_days: i64,
    pub ssl_critical_days: i64,
    pub webhook_failure_streak: u32,
    pub history_capacity: usize,
}

impl Default for EvaluationPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 2,
            escalation_failures: 3,
            ssl_warning_days: 14,
            ssl_critical_days: 7,
            webhook_failure_streak: 3,
            history_capacity: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertTrigger {
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub status: MonitorStatus,
    /// Whether the check counts as available for uptime.
    pub success: bool,
    /// Whether the check extends the consecutive-failure streak.
    pub failure: bool,
    pub trigger: Option<AlertTrigger>,
    /// Conditions this result shows to be cleared. Only acted on when the
    /// monitor was not `up` before.
    pub recovered: Vec<AlertType>,
}

impl Evaluation {
    fn new(status: MonitorStatus, success: bool, failure: bool) -> Self {
        Self {
            status,
            success,
            failure,
            trigger: None,
            recovered: Vec::new(),
        }
    }

    fn with_trigger(mut self, alert_type: AlertType, severity: AlertSeverity, message: String) -> Self {
        self.trigger = Some(AlertTrigger {
            alert_type,
            severity,
            message,
        });
        self
    }

    fn recovering(mut self, types: &[AlertType]) -> Self {
        self.recovered = types.to_vec();
        self
    }
}

pub fn evaluate(
    monitor_name: &str,
    settings: &ProbeSettings,
    result: &CheckResult,
    history: &CheckHistory,
    policy: &EvaluationPolicy,
) -> Evaluation {
    match settings {
        ProbeSettings::Http {
            expected_status, ..
        } => evaluate_http(monitor_name, *expected_status, result, history, policy),
        ProbeSettings::Ssl { host, .. } => evaluate_ssl(monitor_name, host, result, history, policy),
        ProbeSettings::Webhook { .. } => evaluate_webhook(monitor_name, result, history, policy),
    }
}

fn evaluate_http(
    name: &str,
    expected_status: u16,
    result: &CheckResult,
    history: &CheckHistory,
    policy: &EvaluationPolicy,
) -> Evaluation {
    match &result.outcome {
        Ok(ProbePayload::Http {
            status_code,
            body_matched,
        }) if *status_code == expected_status => {
            if *body_matched {
                Evaluation::new(MonitorStatus::Up, true, false).recovering(&[
                    AlertType::Down,
                    AlertType::Timeout,
                    AlertType::StatusMismatch,
                ])
            } else {
                status_mismatch(name, "response body did not have the expected shape")
                    .recovering(&[AlertType::Down, AlertType::Timeout])
            }
        }
        Ok(ProbePayload::Http { status_code, .. }) => damped_failure(
            name,
            &format!("HTTP {status_code} (expected {expected_status})"),
            history,
            policy,
        ),
        Ok(_) => status_mismatch(name, "probe returned a non-HTTP payload"),
        Err(ProbeError::ProtocolError(reason)) => status_mismatch(name, reason),
        Err(e) => damped_failure(name, &e.to_string(), history, policy),
    }
}

fn evaluate_ssl(
    name: &str,
    host: &str,
    result: &CheckResult,
    history: &CheckHistory,
    policy: &EvaluationPolicy,
) -> Evaluation {
    match &result.outcome {
        Ok(ProbePayload::Ssl {
            not_after,
            chain_valid,
            chain_error,
        }) => {
            let remaining = *not_after - result.checked_at;
            if remaining <= Duration::zero() {
                return Evaluation::new(MonitorStatus::Down, false, true).with_trigger(
                    AlertType::Down,
                    AlertSeverity::Critical,
                    format!(
                        "{name}: certificate for {host} expired on {}",
                        not_after.format("%Y-%m-%d")
                    ),
                );
            }
            if !chain_valid {
                let reason = chain_error.as_deref().unwrap_or("certificate chain is not trusted");
                return Evaluation::new(MonitorStatus::Down, false, true).with_trigger(
                    AlertType::Down,
                    AlertSeverity::Critical,
                    format!("{name}: invalid certificate for {host}: {reason}"),
                );
            }
            if remaining <= Duration::days(policy.ssl_warning_days) {
                let severity = if remaining < Duration::days(policy.ssl_critical_days) {
                    AlertSeverity::High
                } else {
                    AlertSeverity::Medium
                };
                return Evaluation::new(MonitorStatus::Warning, true, false)
                    .with_trigger(
                        AlertType::SslExpiring,
                        severity,
                        format!(
                            "{name}: certificate for {host} expires in {} days ({})",
                            remaining.num_days(),
                            not_after.format("%Y-%m-%d")
                        ),
                    )
                    .recovering(&[AlertType::Down]);
            }
            Evaluation::new(MonitorStatus::Up, true, false)
                .recovering(&[AlertType::Down, AlertType::SslExpiring])
        }
        Ok(_) => status_mismatch(name, "probe returned a non-TLS payload"),
        Err(ProbeError::TlsError(reason)) => Evaluation::new(MonitorStatus::Down, false, true)
            .with_trigger(
                AlertType::Down,
                AlertSeverity::Critical,
                format!("{name}: TLS handshake with {host} failed: {reason}"),
            ),
        Err(e) => damped_failure(name, &e.to_string(), history, policy),
    }
}

fn evaluate_webhook(
    name: &str,
    result: &CheckResult,
    history: &CheckHistory,
    policy: &EvaluationPolicy,
) -> Evaluation {
    let attempts = match &result.outcome {
        Ok(ProbePayload::Webhook { attempts }) => attempts,
        Ok(_) => return status_mismatch(name, "probe returned a non-webhook payload"),
        // The tracker could not be read; this says nothing about the webhook itself.
        Err(_) => return unchanged(history),
    };
    if attempts.is_empty() {
        return unchanged(history);
    }

    let streak = failure_streak(attempts);
    if streak == 0 {
        return Evaluation::new(MonitorStatus::Up, true, false).recovering(&[AlertType::WebhookFailed]);
    }
    if streak >= policy.webhook_failure_streak {
        let retries: i32 = attempts
            .iter()
            .take(streak as usize)
            .map(|attempt| attempt.attempt_count)
            .sum();
        return Evaluation::new(MonitorStatus::Down, false, true).with_trigger(
            AlertType::WebhookFailed,
            AlertSeverity::Critical,
            format!("{name}: last {streak} webhook deliveries failed ({retries} attempts)"),
        );
    }
    Evaluation::new(MonitorStatus::Warning, false, true)
}

fn failure_streak(attempts: &[DeliveryAttempt]) -> u32 {
    attempts.iter().take_while(|attempt| !attempt.success).count() as u32
}

fn unchanged(history: &CheckHistory) -> Evaluation {
    let status = history.last_status();
    Evaluation::new(status, status != MonitorStatus::Down, false)
}

fn status_mismatch(name: &str, reason: &str) -> Evaluation {
    Evaluation::new(MonitorStatus::Warning, false, false).with_trigger(
        AlertType::StatusMismatch,
        AlertSeverity::Medium,
        format!("{name}: unexpected response: {reason}"),
    )
}

/// One failure alone is a transient warning; `failure_threshold` in a row is down.
fn damped_failure(
    name: &str,
    reason: &str,
    history: &CheckHistory,
    policy: &EvaluationPolicy,
) -> Evaluation {
    let consecutive = history.trailing_failures() + 1;
    if consecutive < policy.failure_threshold {
        return Evaluation::new(MonitorStatus::Warning, false, true);
    }
    let severity = if consecutive >= policy.escalation_failures {
        AlertSeverity::Critical
    } else {
        AlertSeverity::High
    };
    Evaluation::new(MonitorStatus::Down, false, true).with_trigger(
        AlertType::Down,
        severity,
        format!("{name} is down: {reason} ({consecutive} consecutive failures)"),
    )
}
