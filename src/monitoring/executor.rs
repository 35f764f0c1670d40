//! Runs exactly one probe of one monitor, bounded by the monitor's timeout.
//!
//! Failures come back as a failed [`CheckResult`], never as an `Err`: the
//! scheduler treats them as input. There are no retries in here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, ring};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use sea_orm::DatabaseConnection;
use std::error::Error as StdError;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use crate::db::entities::monitor;
use crate::db::enums::DeliveryStatus;
use crate::db::services::delivery_service;
use crate::monitoring::models::{CheckResult, DeliveryAttempt, ProbeError, ProbePayload};
use crate::monitoring::validation::{BodyMatch, ProbeSettings, delivery_window_start};
use crate::version::VERSION;

/// Source of webhook delivery attempts, reported by an external delivery tracker.
#[async_trait]
pub trait DeliveryTracker: Send + Sync {
    /// Completed attempts at or after `since`, newest first.
    async fn attempts_since(
        &self,
        monitor_id: i32,
        since: DateTime<Utc>,
    ) -> Result<Vec<DeliveryAttempt>, ProbeError>;
}

/// Reads the attempts the tracker posted to `webhook_deliveries`.
pub struct DbDeliveryTracker {
    db: DatabaseConnection,
}

impl DbDeliveryTracker {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DeliveryTracker for DbDeliveryTracker {
    async fn attempts_since(
        &self,
        monitor_id: i32,
        since: DateTime<Utc>,
    ) -> Result<Vec<DeliveryAttempt>, ProbeError> {
        let rows = delivery_service::deliveries_since(&self.db, monitor_id, since)
            .await
            .map_err(|e| ProbeError::NetworkError(format!("delivery tracker unavailable: {e}")))?;
        Ok(rows
            .into_iter()
            .filter(|row| row.status != DeliveryStatus::Pending)
            .map(|row| DeliveryAttempt {
                delivered_at: row.delivered_at,
                success: row.status == DeliveryStatus::Success,
                response_code: row.response_code,
                attempt_count: row.attempt_count,
            })
            .collect())
    }
}

#[async_trait]
pub trait CheckExecutor: Send + Sync {
    async fn execute(&self, monitor: &monitor::Model, settings: &ProbeSettings) -> CheckResult;
}

pub struct ProbeExecutor {
    http: reqwest::Client,
    provider: Arc<CryptoProvider>,
    roots: Arc<RootCertStore>,
    tracker: Arc<dyn DeliveryTracker>,
}

impl ProbeExecutor {
    pub fn new(tracker: Arc<dyn DeliveryTracker>) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent(format!("vigil-monitor/{VERSION}"))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self {
            http,
            provider: Arc::new(ring::default_provider()),
            roots: Arc::new(load_native_roots()),
            tracker,
        })
    }

    async fn probe_http(
        &self,
        url: &reqwest::Url,
        headers: &std::collections::BTreeMap<String, String>,
        body_match: Option<&BodyMatch>,
        timeout_secs: u64,
    ) -> Result<ProbePayload, ProbeError> {
        let mut request = self.http.get(url.clone());
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request.send().await.map_err(|e| classify_reqwest_error(&e, timeout_secs))?;
        let status_code = response.status().as_u16();

        let body_matched = match body_match {
            None => true,
            Some(expectation) => {
                let body = response
                    .text()
                    .await
                    .map_err(|e| ProbeError::ProtocolError(format!("unreadable body: {e}")))?;
                match expectation {
                    BodyMatch::Json => serde_json::from_str::<serde_json::Value>(&body).is_ok(),
                    BodyMatch::Contains { text } => body.contains(text.as_str()),
                }
            }
        };
        Ok(ProbePayload::Http {
            status_code,
            body_matched,
        })
    }

    async fn probe_tls(&self, host: &str, port: u16) -> Result<ProbePayload, ProbeError> {
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| ProbeError::ProtocolError(format!("invalid server name '{host}': {e}")))?;

        let inner = WebPkiServerVerifier::builder_with_provider(self.roots.clone(), self.provider.clone())
            .build()
            .map_err(|e| ProbeError::TlsError(format!("cannot build verifier: {e}")))?;
        let verifier = Arc::new(RecordingVerifier::new(inner));

        let config = ClientConfig::builder_with_provider(self.provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| ProbeError::TlsError(e.to_string()))?
            .dangerous()
            .with_custom_certificate_verifier(verifier.clone())
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(config));

        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(|e| ProbeError::NetworkError(format!("connect to {host}:{port}: {e}")))?;
        let stream = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| ProbeError::TlsError(e.to_string()))?;

        let (_, connection) = stream.get_ref();
        let leaf = connection
            .peer_certificates()
            .and_then(|certs| certs.first())
            .ok_or_else(|| ProbeError::TlsError("server presented no certificate".to_string()))?;
        let (_, cert) = x509_parser::parse_x509_certificate(leaf.as_ref())
            .map_err(|e| ProbeError::TlsError(format!("unparsable certificate: {e}")))?;
        let not_after = DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
            .ok_or_else(|| ProbeError::TlsError("certificate notAfter out of range".to_string()))?;

        let chain_error = verifier.take_verdict();
        Ok(ProbePayload::Ssl {
            not_after,
            chain_valid: chain_error.is_none(),
            chain_error,
        })
    }

    async fn audit_deliveries(
        &self,
        monitor_id: i32,
        window_seconds: i64,
    ) -> Result<ProbePayload, ProbeError> {
        let since = delivery_window_start(Utc::now(), window_seconds).ok_or_else(|| {
            ProbeError::ProtocolError(format!(
                "delivery window of {window_seconds}s is out of range"
            ))
        })?;
        let attempts = self.tracker.attempts_since(monitor_id, since).await?;
        Ok(ProbePayload::Webhook { attempts })
    }
}

#[async_trait]
impl CheckExecutor for ProbeExecutor {
    async fn execute(&self, monitor: &monitor::Model, settings: &ProbeSettings) -> CheckResult {
        let timeout_secs = monitor.timeout_seconds.max(1) as u64;
        let started = Instant::now();
        let checked_at = Utc::now();

        let probe = async {
            match settings {
                ProbeSettings::Http {
                    url,
                    headers,
                    body_match,
                    ..
                } => {
                    self.probe_http(url, headers, body_match.as_ref(), timeout_secs)
                        .await
                }
                ProbeSettings::Ssl { host, port } => self.probe_tls(host, *port).await,
                ProbeSettings::Webhook {
                    delivery_window_seconds,
                } => self.audit_deliveries(monitor.id, *delivery_window_seconds).await,
            }
        };
        let outcome = match tokio::time::timeout(Duration::from_secs(timeout_secs), probe).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ProbeError::Timeout(timeout_secs)),
        };

        let latency = match settings {
            ProbeSettings::Http { .. } => Some(started.elapsed()),
            _ => None,
        };
        if let Err(e) = &outcome {
            debug!(monitor_id = monitor.id, error = %e, "Probe failed.");
        }
        CheckResult::new(monitor.id, checked_at, latency, outcome)
    }
}

fn load_native_roots() -> RootCertStore {
    let loaded = rustls_native_certs::load_native_certs();
    for e in &loaded.errors {
        warn!(error = %e, "Failed to load a native root certificate.");
    }
    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(loaded.certs);
    debug!(added, ignored, "Loaded native root certificates.");
    roots
}

fn classify_reqwest_error(e: &reqwest::Error, timeout_secs: u64) -> ProbeError {
    if e.is_timeout() {
        return ProbeError::Timeout(timeout_secs);
    }
    let mut source = e.source();
    while let Some(err) = source {
        if let Some(tls) = err.downcast_ref::<rustls::Error>() {
            return ProbeError::TlsError(tls.to_string());
        }
        if let Some(tls) = err
            .downcast_ref::<std::io::Error>()
            .and_then(|io| io.get_ref())
            .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        {
            return ProbeError::TlsError(tls.to_string());
        }
        source = err.source();
    }
    if e.is_decode() || e.is_body() {
        ProbeError::ProtocolError(e.to_string())
    } else {
        ProbeError::NetworkError(e.to_string())
    }
}

/// Runs the normal WebPKI verification but lets the handshake finish either way,
/// so the expiry of an untrusted certificate can still be read.
#[derive(Debug)]
struct RecordingVerifier {
    inner: Arc<WebPkiServerVerifier>,
    verdict: Mutex<Option<String>>,
}

impl RecordingVerifier {
    fn new(inner: Arc<WebPkiServerVerifier>) -> Self {
        Self {
            inner,
            verdict: Mutex::new(None),
        }
    }

    /// The verification error, if any.
    fn take_verdict(&self) -> Option<String> {
        self.verdict.lock().ok().and_then(|mut verdict| verdict.take())
    }
}

impl ServerCertVerifier for RecordingVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if let Err(e) =
            self.inner
                .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            if let Ok(mut verdict) = self.verdict.lock() {
                *verdict = Some(e.to_string());
            }
        }
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::enums::{MonitorStatus, MonitorType};
    use chrono::Duration as ChronoDuration;
    use reqwest::Url;
    use std::collections::BTreeMap;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FixedTracker(Vec<DeliveryAttempt>);

    #[async_trait]
    impl DeliveryTracker for FixedTracker {
        async fn attempts_since(
            &self,
            _monitor_id: i32,
            since: DateTime<Utc>,
        ) -> Result<Vec<DeliveryAttempt>, ProbeError> {
            Ok(self
                .0
                .iter()
                .filter(|attempt| attempt.delivered_at >= since)
                .cloned()
                .collect())
        }
    }

    fn executor(attempts: Vec<DeliveryAttempt>) -> ProbeExecutor {
        ProbeExecutor::new(Arc::new(FixedTracker(attempts))).unwrap()
    }

    fn model(monitor_type: MonitorType, url: &str, timeout_seconds: i32) -> monitor::Model {
        let now = Utc::now();
        monitor::Model {
            id: 7,
            organization_id: 1,
            name: "probe".to_string(),
            monitor_type,
            url: url.to_string(),
            interval_seconds: 60,
            timeout_seconds,
            expected_status: Some(200),
            custom_headers: None,
            monitor_config: None,
            is_active: true,
            status: MonitorStatus::Unknown,
            status_note: None,
            last_checked_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn http_settings(url: &str, body_match: Option<BodyMatch>) -> ProbeSettings {
        ProbeSettings::Http {
            url: Url::parse(url).unwrap(),
            expected_status: 200,
            headers: BTreeMap::from([("x-probe".to_string(), "vigil".to_string())]),
            body_match,
        }
    }

    #[tokio::test]
    async fn test_http_probe_sends_headers_and_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .and(header("x-probe", "vigil"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let url = format!("{}/health", server.uri());
        let result = executor(vec![])
            .execute(&model(MonitorType::Http, &url, 5), &http_settings(&url, None))
            .await;
        assert_eq!(result.monitor_id, 7);
        assert_eq!(result.status_code(), Some(503));
        assert!(result.latency.is_some());
    }

    #[tokio::test]
    async fn test_http_probe_body_expectation() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let url = format!("{}/health", server.uri());
        let result = executor(vec![])
            .execute(
                &model(MonitorType::Http, &url, 5),
                &http_settings(&url, Some(BodyMatch::Json)),
            )
            .await;
        assert_eq!(
            result.outcome,
            Ok(ProbePayload::Http {
                status_code: 200,
                body_matched: false
            })
        );

        let result = executor(vec![])
            .execute(
                &model(MonitorType::Http, &url, 5),
                &http_settings(
                    &url,
                    Some(BodyMatch::Contains {
                        text: "oops".to_string(),
                    }),
                ),
            )
            .await;
        assert_eq!(
            result.outcome,
            Ok(ProbePayload::Http {
                status_code: 200,
                body_matched: true
            })
        );
    }

    #[tokio::test]
    async fn test_http_probe_honors_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let url = format!("{}/slow", server.uri());
        let result = executor(vec![])
            .execute(&model(MonitorType::Http, &url, 1), &http_settings(&url, None))
            .await;
        assert_eq!(result.outcome, Err(ProbeError::Timeout(1)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let url = "http://127.0.0.1:9/health";
        let result = executor(vec![])
            .execute(&model(MonitorType::Http, url, 2), &http_settings(url, None))
            .await;
        assert!(matches!(
            result.outcome,
            Err(ProbeError::NetworkError(_)) | Err(ProbeError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_webhook_audit_uses_window() {
        let now = Utc::now();
        let attempts = vec![
            DeliveryAttempt {
                delivered_at: now - ChronoDuration::minutes(5),
                success: false,
                response_code: Some(500),
                attempt_count: 2,
            },
            DeliveryAttempt {
                delivered_at: now - ChronoDuration::hours(5),
                success: false,
                response_code: Some(500),
                attempt_count: 1,
            },
        ];
        let settings = ProbeSettings::Webhook {
            delivery_window_seconds: 3600,
        };
        let result = executor(attempts)
            .execute(
                &model(MonitorType::Webhook, "https://hooks.example.com", 5),
                &settings,
            )
            .await;
        match result.outcome {
            Ok(ProbePayload::Webhook { attempts }) => assert_eq!(attempts.len(), 1),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(result.latency.is_none());
    }

    #[tokio::test]
    async fn test_oversized_webhook_window_fails_the_check() {
        let settings = ProbeSettings::Webhook {
            delivery_window_seconds: 1_000_000_000_000_000,
        };
        let result = executor(vec![])
            .execute(
                &model(MonitorType::Webhook, "https://hooks.example.com", 5),
                &settings,
            )
            .await;
        assert!(matches!(result.outcome, Err(ProbeError::ProtocolError(_))));
    }
}
