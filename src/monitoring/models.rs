use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Typed failure of a single probe. Recorded as a failed `CheckResult`, never raised to the scheduler.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ProbeError {
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Probe timed out after {0}s")]
    Timeout(u64),
    #[error("TLS error: {0}")]
    TlsError(String),
    #[error("Protocol error: {0}")]
    ProtocolError(String),
}

impl ProbeError {
    pub fn kind(&self) -> &'static str {
        match self {
            ProbeError::NetworkError(_) => "network_error",
            ProbeError::Timeout(_) => "timeout",
            ProbeError::TlsError(_) => "tls_error",
            ProbeError::ProtocolError(_) => "protocol_error",
        }
    }
}

/// A delivery attempt as reported by the delivery tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryAttempt {
    pub delivered_at: DateTime<Utc>,
    pub success: bool,
    pub response_code: Option<i32>,
    pub attempt_count: i32,
}

/// Type-specific payload of a probe that produced an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbePayload {
    Http {
        status_code: u16,
        /// `false` when the monitor expects a body shape and the response did not have it.
        body_matched: bool,
    },
    Ssl {
        not_after: DateTime<Utc>,
        chain_valid: bool,
        chain_error: Option<String>,
    },
    Webhook {
        /// Attempts inside the monitor's delivery window, newest first.
        attempts: Vec<DeliveryAttempt>,
    },
}

/// Outcome of one scheduled probe of one monitor.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub monitor_id: i32,
    pub checked_at: DateTime<Utc>,
    pub latency: Option<Duration>,
    pub outcome: Result<ProbePayload, ProbeError>,
}

impl CheckResult {
    pub fn new(
        monitor_id: i32,
        checked_at: DateTime<Utc>,
        latency: Option<Duration>,
        outcome: Result<ProbePayload, ProbeError>,
    ) -> Self {
        Self {
            monitor_id,
            checked_at,
            latency,
            outcome,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match &self.outcome {
            Ok(ProbePayload::Http { status_code, .. }) => Some(*status_code),
            _ => None,
        }
    }

    pub fn probe_error(&self) -> Option<&ProbeError> {
        self.outcome.as_ref().err()
    }

    pub fn latency_ms(&self) -> Option<i32> {
        self.latency
            .map(|latency| latency.as_millis().min(i32::MAX as u128) as i32)
    }
}
