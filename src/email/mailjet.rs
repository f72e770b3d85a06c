use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

use super::{generate_filename, EmailRequest, EmailSender, SendReceipt};

pub const MAILJET_API_URL: &str = "https://api.mailjet.com/v3.1";
pub const MAILJET_PROVIDER: &str = "Mailjet";

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct SendRequest {
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Message {
    from: Recipient,
    to: Vec<Recipient>,
    subject: String,
    text_part: String,
    attachments: Vec<Attachment>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Recipient {
    email: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Attachment {
    content_type: String,
    filename: String,
    base64_content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SendResponse {
    #[serde(default)]
    messages: Vec<MessageResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MessageResult {
    status: String,
    #[serde(default)]
    to: Vec<SentTo>,
}

#[derive(Debug, Deserialize)]
struct SentTo {
    #[serde(rename = "MessageUUID", default)]
    message_uuid: String,
}

pub struct MailjetSender {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    sender_email: String,
}

impl MailjetSender {
    pub fn new(api_key: String, api_secret: String, sender_email: String) -> Result<Self> {
        Self::with_base_url(MAILJET_API_URL.to_string(), api_key, api_secret, sender_email)
    }

    pub fn with_base_url(
        base_url: String,
        api_key: String,
        api_secret: String,
        sender_email: String,
    ) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        let sender = Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            api_secret,
            sender_email,
        };
        sender.validate_config()?;
        Ok(sender)
    }

    fn validate_config(&self) -> Result<()> {
        if self.api_key.is_empty() {
            return Err(AppError::Email("API key is required".to_string()));
        }
        if self.api_secret.is_empty() {
            return Err(AppError::Email("API secret is required".to_string()));
        }
        if self.sender_email.is_empty() {
            return Err(AppError::Email("sender email is required".to_string()));
        }
        Ok(())
    }
}

fn validate_request(request: &EmailRequest<'_>) -> Result<()> {
    if request.destination.is_empty() {
        return Err(AppError::Email("destination email is required".to_string()));
    }
    if request.document.bytes.is_empty() {
        return Err(AppError::Email("document is empty".to_string()));
    }
    Ok(())
}

#[async_trait]
impl EmailSender for MailjetSender {
    async fn send(&self, request: &EmailRequest<'_>) -> Result<SendReceipt> {
        validate_request(request)?;

        let body = SendRequest {
            messages: vec![Message {
                from: Recipient {
                    email: self.sender_email.clone(),
                },
                to: vec![Recipient {
                    email: request.destination.clone(),
                }],
                subject: request.subject.clone(),
                text_part: "Document attached.".to_string(),
                attachments: vec![Attachment {
                    content_type: request.document.content_type.to_string(),
                    filename: generate_filename(request.article, request.document.extension),
                    base64_content: STANDARD.encode(&request.document.bytes),
                }],
            }],
        };

        let response = self
            .client
            .post(format!("{}/send", self.base_url))
            .basic_auth(&self.api_key, Some(&self.api_secret))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(AppError::Email(format!("API error ({status}): {error_text}")));
        }

        let parsed: SendResponse = response.json().await?;
        let message = parsed
            .messages
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Email("no messages in response".to_string()))?;

        if message.status != "success" {
            return Err(AppError::Email(format!(
                "email send failed with status: {}",
                message.status
            )));
        }

        let email_uuid = message
            .to
            .into_iter()
            .next()
            .map(|t| t.message_uuid)
            .filter(|uuid| !uuid.is_empty())
            .ok_or_else(|| AppError::Email("missing MessageUUID in response".to_string()))?;

        tracing::info!(to = %request.destination, %email_uuid, "email accepted by Mailjet");

        Ok(SendReceipt {
            email_uuid,
            sender: self.sender_email.clone(),
            recipient: request.destination.clone(),
            provider: MAILJET_PROVIDER.to_string(),
        })
    }
}
