use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use secrecy::{ExposeSecret, SecretString};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines, Stdin, Stdout};
use tokio::sync::Mutex;

use crate::call::consts;
use crate::error::{CallError, Result};
use crate::storage::KeyValueStore;

pub const CREDENTIAL_KEY: &str = "openai_realtime_api_key";

/// Interactive entry of the API credential.
#[async_trait]
#[cfg_attr(test, automock)]
pub trait CredentialPrompt: Send + Sync {
    /// Asks the user for a credential. `notice` explains why a previous entry was
    /// rejected. Returns `None` when the user dismisses the prompt.
    async fn prompt(&self, notice: Option<String>) -> Option<String>;
}

/// Checks a user-entered credential, returning it trimmed.
pub fn validate_credential(value: &str, prefix: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(CallError::InvalidCredential("Please enter a valid API key".to_string()));
    }
    if !value.starts_with(prefix) {
        return Err(CallError::InvalidCredential(format!("API keys should start with \"{prefix}\"")));
    }
    Ok(value.to_string())
}

/// The user's long-lived API credential, persisted under [`CREDENTIAL_KEY`].
#[derive(Clone)]
pub struct CredentialStore {
    store: Arc<dyn KeyValueStore>,
    prompt: Arc<dyn CredentialPrompt>,
    prefix: String,
    max_attempts: usize,
}

impl CredentialStore {
    pub fn new(store: Arc<dyn KeyValueStore>, prompt: Arc<dyn CredentialPrompt>) -> Self {
        Self {
            store,
            prompt,
            prefix: consts::CREDENTIAL_PREFIX.to_string(),
            max_attempts: consts::CREDENTIAL_ATTEMPTS,
        }
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    /// How many entries the user gets before `ensure` gives up. At least one.
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn get(&self) -> Result<Option<SecretString>> {
        Ok(self.store.get(CREDENTIAL_KEY)?.map(SecretString::from))
    }

    pub fn store(&self, value: &SecretString) -> Result<()> {
        self.store.set(CREDENTIAL_KEY, value.expose_secret())?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        self.store.remove(CREDENTIAL_KEY)?;
        tracing::info!("API key cleared from storage");
        Ok(())
    }

    /// Returns the stored credential, prompting for one when none is stored or the
    /// stored one is malformed. Rejected entries are re-prompted until the attempt
    /// limit, then fail with `InvalidCredential`.
    pub async fn ensure(&self) -> Result<SecretString> {
        if let Some(stored) = self.get()? {
            match validate_credential(stored.expose_secret(), &self.prefix) {
                Ok(_) => return Ok(stored),
                Err(_) => tracing::warn!("stored API key is malformed, asking again"),
            }
        }

        let mut notice = None;
        for attempt in 1..=self.max_attempts {
            let Some(entered) = self.prompt.prompt(notice.take()).await else {
                tracing::info!("API key input cancelled");
                return Err(CallError::UserCancelled);
            };
            match validate_credential(&entered, &self.prefix) {
                Ok(valid) => {
                    let secret = SecretString::from(valid);
                    self.store(&secret)?;
                    tracing::debug!("API key stored after {} attempt(s)", attempt);
                    return Ok(secret);
                }
                Err(CallError::InvalidCredential(reason)) if attempt < self.max_attempts => {
                    notice = Some(reason);
                }
                Err(e) => return Err(e),
            }
        }
        Err(CallError::InvalidCredential("too many invalid attempts".to_string()))
    }
}

/// Reads the credential from the terminal. EOF or the word `cancel` dismisses.
///
/// One line reader is kept for the life of the prompt so input buffered ahead of a
/// rejected entry is still there for the next attempt.
pub struct TerminalPrompt<R = Stdin, W = Stdout> {
    lines: Mutex<Lines<BufReader<R>>>,
    output: Mutex<W>,
}

impl TerminalPrompt {
    pub fn new() -> Self {
        Self::with_io(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl Default for TerminalPrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl<R, W> TerminalPrompt<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn with_io(input: R, output: W) -> Self {
        Self {
            lines: Mutex::new(BufReader::new(input).lines()),
            output: Mutex::new(output),
        }
    }
}

#[async_trait]
impl<R, W> CredentialPrompt for TerminalPrompt<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn prompt(&self, notice: Option<String>) -> Option<String> {
        let mut text = String::new();
        if let Some(notice) = notice {
            text.push_str(&format!("{notice}\n"));
        }
        text.push_str("OpenAI API key required. It is stored locally for later calls.\nAPI key (or `cancel`): ");
        {
            let mut output = self.output.lock().await;
            if let Err(e) = output.write_all(text.as_bytes()).await {
                tracing::error!("failed to write prompt: {}", e);
                return None;
            }
            if let Err(e) = output.flush().await {
                tracing::debug!("failed to flush prompt: {}", e);
            }
        }

        match self.lines.lock().await.next_line().await {
            Ok(Some(line)) if line.trim() != "cancel" => Some(line),
            Ok(_) => None,
            Err(e) => {
                tracing::error!("failed to read API key: {}", e);
                None
            }
        }
    }
}
