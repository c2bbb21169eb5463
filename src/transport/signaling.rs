use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::header::CONTENT_TYPE;
use secrecy::ExposeSecret;

use crate::call::{consts, Config};
use crate::error::{CallError, Result};
use crate::negotiator::EphemeralToken;

/// Offer/answer exchange with the provider.
#[async_trait]
#[cfg_attr(test, automock)]
pub trait Signaler: Send + Sync {
    /// Sends the local offer and returns the answer SDP.
    async fn exchange(&self, token: &EphemeralToken, offer: String) -> Result<String>;
}

pub struct HttpSignaler {
    http: reqwest::Client,
    base_url: String,
}

impl HttpSignaler {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url().to_string(),
        }
    }

    pub fn with_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }
}

#[async_trait]
impl Signaler for HttpSignaler {
    async fn exchange(&self, token: &EphemeralToken, offer: String) -> Result<String> {
        let url = format!("{}{}", self.base_url, consts::SIGNALING_PATH);
        tracing::debug!("sending offer: url={}, bytes={}", url, offer.len());

        let response = self
            .http
            .post(&url)
            .bearer_auth(token.secret().expose_secret())
            .header(CONTENT_TYPE, consts::SDP_CONTENT_TYPE)
            .body(offer)
            .send()
            .await
            .map_err(|e| CallError::TransportUnavailable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CallError::TransportUnavailable(e.to_string()))?;

        if !status.is_success() {
            tracing::error!("signaling failed: {} {}", status, body);
            return Err(CallError::SignalingFailed {
                status: status.as_u16(),
                body,
            });
        }
        tracing::debug!("answer received");
        Ok(body)
    }
}
