use async_trait::async_trait;
use reqwest::{Client, Method, header};
use std::collections::HashMap;
use tera::{Context, Tera};

use super::{NotificationSender, SenderError, ensure_success};
use crate::notifications::models::ChannelConfig;

/// Pushes notifications to a user-defined HTTP endpoint.
pub struct WebhookSender {
    client: Client,
}

impl WebhookSender {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Renders the body template with the alert context plus `message`.
fn render_body(
    template: &str,
    message: &str,
    context: &HashMap<String, String>,
) -> Result<String, SenderError> {
    let mut tera_context = Context::new();
    for (key, value) in context {
        tera_context.insert(key, value);
    }
    tera_context.insert("message", message);
    Tera::one_off(template, &tera_context, false)
        .map_err(|e| SenderError::TemplatingError(e.to_string()))
}

#[async_trait]
impl NotificationSender for WebhookSender {
    async fn send(
        &self,
        config: &ChannelConfig,
        message: &str,
        context: &HashMap<String, String>,
    ) -> Result<(), SenderError> {
        let ChannelConfig::Webhook {
            url,
            method,
            headers,
            body_template,
        } = config
        else {
            return Err(SenderError::InvalidConfiguration(
                "Expected Webhook config, but found a different type.".to_string(),
            ));
        };

        let http_method = match method.to_uppercase().as_str() {
            "POST" => Method::POST,
            "GET" => Method::GET,
            _ => {
                return Err(SenderError::InvalidConfiguration(format!(
                    "Unsupported HTTP method: {method}"
                )));
            }
        };
        let is_post = http_method == Method::POST;
        let mut request = self.client.request(http_method, url);

        if let Some(h) = headers {
            let mut header_map = header::HeaderMap::new();
            for (key, value) in h {
                let name = header::HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                    SenderError::InvalidConfiguration(format!("Invalid header name: {e}"))
                })?;
                let value = header::HeaderValue::from_str(value).map_err(|e| {
                    SenderError::InvalidConfiguration(format!("Invalid header value: {e}"))
                })?;
                header_map.insert(name, value);
            }
            request = request.headers(header_map);
        }

        if is_post {
            let body = match body_template.as_deref() {
                Some(template) => render_body(template, message, context)?,
                None => {
                    let mut payload: HashMap<&str, &str> = context
                        .iter()
                        .map(|(k, v)| (k.as_str(), v.as_str()))
                        .collect();
                    payload.insert("message", message);
                    serde_json::to_string(&payload)
                        .map_err(|e| SenderError::TemplatingError(e.to_string()))?
                }
            };
            request = request
                .header(header::CONTENT_TYPE, "application/json")
                .body(body);
        }

        let response = request.send().await?;
        ensure_success("Webhook", response).await
    }
}
