use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::collections::HashMap;

use super::{NotificationSender, SenderError};
use crate::notifications::models::ChannelConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

/// Sends email through the configured SMTP relay. Without a relay every send fails.
pub struct EmailSender {
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
    from: Option<String>,
}

impl EmailSender {
    pub fn new(settings: Option<&SmtpSettings>) -> Result<Self, SenderError> {
        let Some(settings) = settings else {
            return Ok(Self {
                transport: None,
                from: None,
            });
        };
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
            .map_err(|e| SenderError::InvalidConfiguration(format!("SMTP relay: {e}")))?
            .port(settings.port);
        if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }
        Ok(Self {
            transport: Some(builder.build()),
            from: Some(settings.from.clone()),
        })
    }
}

fn subject(context: &HashMap<String, String>) -> String {
    match (context.get("severity"), context.get("monitor_name")) {
        (Some(severity), Some(monitor)) => {
            format!("[{}] {monitor}", severity.to_uppercase())
        }
        _ => "Vigil notification".to_string(),
    }
}

#[async_trait]
impl NotificationSender for EmailSender {
    async fn send(
        &self,
        config: &ChannelConfig,
        message: &str,
        context: &HashMap<String, String>,
    ) -> Result<(), SenderError> {
        let ChannelConfig::Email { recipients } = config else {
            return Err(SenderError::InvalidConfiguration(
                "Expected Email config, but found a different type.".to_string(),
            ));
        };
        let (Some(transport), Some(from)) = (&self.transport, &self.from) else {
            return Err(SenderError::InvalidConfiguration(
                "No SMTP relay is configured.".to_string(),
            ));
        };
        let from: Mailbox = from
            .parse()
            .map_err(|e| SenderError::InvalidConfiguration(format!("Invalid from address: {e}")))?;

        let subject = subject(context);
        for recipient in recipients {
            let email = Message::builder()
                .from(from.clone())
                .to(recipient.parse().map_err(|e| {
                    SenderError::InvalidConfiguration(format!("Invalid recipient '{recipient}': {e}"))
                })?)
                .subject(subject.clone())
                .header(ContentType::TEXT_PLAIN)
                .body(message.to_string())
                .map_err(|e| SenderError::SendFailed(format!("Failed to build email: {e}")))?;

            transport
                .send(email)
                .await
                .map_err(|e| SenderError::SendFailed(format!("Failed to send email: {e}")))?;
        }
        Ok(())
    }
}
