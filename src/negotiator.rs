use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::call::{consts, Config};
use crate::credential::CredentialStore;
use crate::error::{CallError, Result};
use crate::types::audio::Voice;

/// Short-lived token authorizing one realtime session.
#[derive(Debug)]
pub struct EphemeralToken {
    value: SecretString,
    expires_at: Option<i64>,
}

impl EphemeralToken {
    pub fn new(value: &str) -> Self {
        Self {
            value: SecretString::from(value.to_string()),
            expires_at: None,
        }
    }

    pub fn with_expires_at(mut self, expires_at: i64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn secret(&self) -> &SecretString {
        &self.value
    }

    /// Unix seconds, when the provider reports it.
    pub fn expires_at(&self) -> Option<i64> {
        self.expires_at
    }
}

/// Exchanges the long-lived credential for an [`EphemeralToken`].
#[async_trait]
#[cfg_attr(test, automock)]
pub trait Negotiator: Send + Sync {
    async fn create_session_token(&self, voice: &Voice) -> Result<EphemeralToken>;
}

#[derive(Serialize)]
struct CreateSessionRequest<'a> {
    model: &'a str,
    voice: &'a Voice,
}

#[derive(Deserialize)]
struct CreateSessionResponse {
    client_secret: ClientSecret,
}

#[derive(Deserialize)]
struct ClientSecret {
    value: String,
    #[serde(default)]
    expires_at: Option<i64>,
}

pub struct HttpNegotiator {
    http: reqwest::Client,
    base_url: String,
    model: String,
    credentials: CredentialStore,
}

impl HttpNegotiator {
    pub fn new(config: &Config, credentials: CredentialStore) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url().to_string(),
            model: config.model().to_string(),
            credentials,
        }
    }

    pub fn with_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }
}

#[async_trait]
impl Negotiator for HttpNegotiator {
    async fn create_session_token(&self, voice: &Voice) -> Result<EphemeralToken> {
        let credential = self.credentials.ensure().await?;
        let url = format!("{}{}", self.base_url, consts::SESSIONS_PATH);
        tracing::debug!("creating session: url={}, model={}, voice={}", url, self.model, voice);

        let response = self
            .http
            .post(&url)
            .bearer_auth(credential.expose_secret())
            .json(&CreateSessionRequest {
                model: &self.model,
                voice,
            })
            .send()
            .await
            .map_err(|e| CallError::TransportUnavailable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CallError::TransportUnavailable(e.to_string()))?;

        if !status.is_success() {
            tracing::error!("session creation failed: {} {}", status, body);
            return Err(CallError::NegotiationFailed {
                status: status.as_u16(),
                body,
            });
        }

        match serde_json::from_str::<CreateSessionResponse>(&body) {
            Ok(parsed) => {
                tracing::debug!("session token received");
                let token = EphemeralToken::new(&parsed.client_secret.value);
                Ok(match parsed.client_secret.expires_at {
                    Some(expires_at) => token.with_expires_at(expires_at),
                    None => token,
                })
            }
            Err(e) => {
                tracing::error!("session response has no client secret: {}", e);
                Err(CallError::NegotiationFailed {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }
}
