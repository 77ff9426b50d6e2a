use async_trait::async_trait;
use serde::Serialize;

use crate::auth::ResetTicket;
use crate::configuration::EmailSettings;
use crate::error::{ConfigError, EmailError};
use crate::validators::is_valid_email;

/// Out-of-band delivery of password reset tokens
#[async_trait]
pub trait ResetNotifier: Send + Sync {
    async fn send_password_reset(&self, ticket: &ResetTicket) -> Result<(), EmailError>;
}

/// Templated mail sender backed by the provider's HTTP API
#[derive(Clone)]
pub struct EmailClient {
    http_client: reqwest::Client,
    base_url: String,
    sender: SenderEmail,
    authorization_token: String,
    reset_template: String,
    reset_url_base: String,
}

/// Verified sender address
#[derive(Clone, Debug)]
pub struct SenderEmail(String);

impl SenderEmail {
    pub fn parse(s: &str) -> Result<Self, String> {
        let email = is_valid_email(s).map_err(|e| e.to_string())?;
        Ok(Self(email))
    }

    pub fn inner(&self) -> &str {
        &self.0
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SendTemplatedEmailRequest<'a> {
    from: &'a str,
    to: &'a str,
    template_alias: &'a str,
    template_model: ResetTemplateModel<'a>,
}

#[derive(Serialize)]
struct ResetTemplateModel<'a> {
    username: &'a str,
    reset_url: String,
    expires_at: String,
}

impl EmailClient {
    pub fn new(
        base_url: String,
        sender: SenderEmail,
        authorization_token: String,
        reset_template: String,
        reset_url_base: String,
        http_client: reqwest::Client,
    ) -> Self {
        Self {
            http_client,
            base_url,
            sender,
            authorization_token,
            reset_template,
            reset_url_base,
        }
    }

    /// Build a client from settings; the reset template must be configured.
    pub fn from_settings(settings: &EmailSettings) -> Result<Self, ConfigError> {
        let sender = SenderEmail::parse(&settings.sender)
            .map_err(|e| ConfigError::InvalidValue(format!("email.sender: {}", e)))?;

        if settings.reset_template.trim().is_empty() {
            return Err(ConfigError::MissingRequired("email.reset_template".to_string()));
        }

        let http_client = reqwest::Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| ConfigError::InvalidValue(format!("email http client: {}", e)))?;

        Ok(Self::new(
            settings.base_url.clone(),
            sender,
            settings.authorization_token.clone(),
            settings.reset_template.clone(),
            settings.reset_url_base.clone(),
            http_client,
        ))
    }

    fn reset_url(&self, token: &str) -> String {
        format!("{}/{}", self.reset_url_base.trim_end_matches('/'), token)
    }
}

#[async_trait]
impl ResetNotifier for EmailClient {
    async fn send_password_reset(&self, ticket: &ResetTicket) -> Result<(), EmailError> {
        let url = format!("{}/email/withTemplate", self.base_url.trim_end_matches('/'));
        let request = SendTemplatedEmailRequest {
            from: self.sender.inner(),
            to: &ticket.email,
            template_alias: &self.reset_template,
            template_model: ResetTemplateModel {
                username: &ticket.username,
                reset_url: self.reset_url(&ticket.token),
                expires_at: ticket.expires_at.to_rfc3339(),
            },
        };

        self.http_client
            .post(&url)
            .header("X-Postmark-Server-Token", &self.authorization_token)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(user_id = %ticket.user_id, "Failed to send reset email: {}", e);
                EmailError::SendFailed(e.to_string())
            })?
            .error_for_status()
            .map_err(|e| {
                tracing::error!(user_id = %ticket.user_id, "Email service returned error: {}", e);
                EmailError::Rejected(e.to_string())
            })?;

        tracing::info!(user_id = %ticket.user_id, "Password reset email sent");
        Ok(())
    }
}
