// Messaging provider client - the engine's send_message collaborator

use std::time::Duration;

use async_trait::async_trait;
use leadpilot_shared::MessageChannel;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

use crate::config::MessagingConfig;

#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("provider request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("provider rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderReceipt {
    pub provider_message_id: String,
}

/// Outbound send capability. Any non-success is a retryable action failure
/// from the engine's point of view.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(
        &self,
        channel: MessageChannel,
        phone: &str,
        content: &str,
    ) -> Result<ProviderReceipt, MessagingError>;
}

#[derive(Debug, Clone)]
pub struct HttpMessagingService {
    client: reqwest::Client,
    base_url: String,
    api_token: String,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    channel: &'a str,
    to: &'a str,
    body: &'a str,
}

#[derive(Deserialize)]
struct SendResponse {
    message_id: String,
}

impl HttpMessagingService {
    pub fn new(config: &MessagingConfig) -> Result<Self, MessagingError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
        })
    }
}

#[async_trait]
impl MessageSender for HttpMessagingService {
    async fn send(
        &self,
        channel: MessageChannel,
        phone: &str,
        content: &str,
    ) -> Result<ProviderReceipt, MessagingError> {
        let url = format!("{}/v1/messages", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&SendRequest {
                channel: channel.as_str(),
                to: phone,
                body: content,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), "message send rejected by provider");
            return Err(MessagingError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: SendResponse = response.json().await?;
        info!(channel = channel.as_str(), "message sent via provider");

        Ok(ProviderReceipt {
            provider_message_id: parsed.message_id,
        })
    }
}
