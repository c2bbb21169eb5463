//! Call configuration.
//!
//! Defaults match the hosted provider; [`Config::from_env`] lets a `.env` file or the
//! environment override them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::call::consts;
use crate::types::audio::{TranscriptionModel, Voice};

/// Whether a `session.update` goes out when no options are left to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionUpdatePolicy {
    #[default]
    SkipWhenEmpty,
    /// For providers that expect an explicit update before the first turn.
    AlwaysSend,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

#[derive(Debug, Clone)]
pub struct Config {
    base_url: String,
    model: String,
    default_voice: Voice,
    base_instructions: String,
    transcription_model: Option<TranscriptionModel>,
    channel_label: String,
    channel_open_timeout: Duration,
    credential_prefix: String,
    credential_attempts: usize,
    session_update_policy: SessionUpdatePolicy,
    store_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            base_url: consts::BASE_URL.to_string(),
            model: consts::DEFAULT_MODEL.to_string(),
            default_voice: Voice::Alloy,
            base_instructions: consts::BASE_INSTRUCTIONS.to_string(),
            transcription_model: Some(TranscriptionModel::Whisper),
            channel_label: consts::CONTROL_CHANNEL_LABEL.to_string(),
            channel_open_timeout: Duration::from_secs(consts::CHANNEL_OPEN_TIMEOUT_SECS),
            credential_prefix: consts::CREDENTIAL_PREFIX.to_string(),
            credential_attempts: consts::CREDENTIAL_ATTEMPTS,
            session_update_policy: SessionUpdatePolicy::default(),
            store_path: PathBuf::from(consts::DEFAULT_STORE_PATH),
        }
    }

    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Loads overrides from the environment, reading `.env` first when present.
    ///
    /// * `REALTIME_BASE_URL`: API root, defaults to the hosted provider.
    /// * `REALTIME_MODEL`: realtime model requested for the session token.
    /// * `REALTIME_VOICE`: default voice when the caller gives none.
    /// * `REALTIME_CHANNEL_TIMEOUT_SECS`: how long to wait for the control channel.
    /// * `REALTIME_STORE_PATH`: file backing the local key/value store.
    /// * `REALTIME_ALWAYS_SEND_SESSION_UPDATE`: `true` to send empty updates.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::new();

        if let Some(base_url) = lookup("REALTIME_BASE_URL") {
            builder = builder.with_base_url(&base_url);
        }
        if let Some(model) = lookup("REALTIME_MODEL") {
            builder = builder.with_model(&model);
        }
        if let Some(voice) = lookup("REALTIME_VOICE") {
            builder = builder.with_default_voice(voice.parse().unwrap_or_default());
        }
        if let Some(secs) = lookup("REALTIME_CHANNEL_TIMEOUT_SECS") {
            let secs = secs.parse::<u64>().map_err(|e| {
                ConfigError::InvalidValue("REALTIME_CHANNEL_TIMEOUT_SECS".to_string(), e.to_string())
            })?;
            builder = builder.with_channel_open_timeout(Duration::from_secs(secs));
        }
        if let Some(path) = lookup("REALTIME_STORE_PATH") {
            builder = builder.with_store_path(path);
        }
        if let Some(flag) = lookup("REALTIME_ALWAYS_SEND_SESSION_UPDATE") {
            let always = flag.parse::<bool>().map_err(|e| {
                ConfigError::InvalidValue("REALTIME_ALWAYS_SEND_SESSION_UPDATE".to_string(), e.to_string())
            })?;
            if always {
                builder = builder.with_session_update_policy(SessionUpdatePolicy::AlwaysSend);
            }
        }

        Ok(builder.build())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn default_voice(&self) -> &Voice {
        &self.default_voice
    }

    pub fn base_instructions(&self) -> &str {
        &self.base_instructions
    }

    pub fn transcription_model(&self) -> Option<&TranscriptionModel> {
        self.transcription_model.as_ref()
    }

    pub fn channel_label(&self) -> &str {
        &self.channel_label
    }

    pub fn channel_open_timeout(&self) -> Duration {
        self.channel_open_timeout
    }

    pub fn credential_prefix(&self) -> &str {
        &self.credential_prefix
    }

    pub fn credential_attempts(&self) -> usize {
        self.credential_attempts
    }

    pub fn session_update_policy(&self) -> SessionUpdatePolicy {
        self.session_update_policy
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }
}

pub struct ConfigBuilder {
    config: Config,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.config.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.config.model = model.to_string();
        self
    }

    pub fn with_default_voice(mut self, voice: Voice) -> Self {
        self.config.default_voice = voice;
        self
    }

    pub fn with_base_instructions(mut self, instructions: &str) -> Self {
        self.config.base_instructions = instructions.to_string();
        self
    }

    /// `None` leaves transcription out of the default session options.
    pub fn with_transcription_model(mut self, model: Option<TranscriptionModel>) -> Self {
        self.config.transcription_model = model;
        self
    }

    pub fn with_channel_label(mut self, label: &str) -> Self {
        self.config.channel_label = label.to_string();
        self
    }

    pub fn with_channel_open_timeout(mut self, timeout: Duration) -> Self {
        self.config.channel_open_timeout = timeout;
        self
    }

    pub fn with_credential_prefix(mut self, prefix: &str) -> Self {
        self.config.credential_prefix = prefix.to_string();
        self
    }

    pub fn with_credential_attempts(mut self, attempts: usize) -> Self {
        self.config.credential_attempts = attempts;
        self
    }

    pub fn with_session_update_policy(mut self, policy: SessionUpdatePolicy) -> Self {
        self.config.session_update_policy = policy;
        self
    }

    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.store_path = path.into();
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_match_the_hosted_provider() {
        let config = Config::new();
        assert_eq!(config.base_url(), "https://api.openai.com/v1");
        assert_eq!(config.channel_label(), "oai-events");
        assert_eq!(config.channel_open_timeout(), Duration::from_secs(10));
        assert_eq!(config.default_voice(), &Voice::Alloy);
        assert_eq!(config.session_update_policy(), SessionUpdatePolicy::SkipWhenEmpty);
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = Config::from_lookup(lookup(&[
            ("REALTIME_BASE_URL", "http://localhost:8080/v1/"),
            ("REALTIME_VOICE", "marin"),
            ("REALTIME_CHANNEL_TIMEOUT_SECS", "3"),
            ("REALTIME_ALWAYS_SEND_SESSION_UPDATE", "true"),
        ]))
        .unwrap();

        assert_eq!(config.base_url(), "http://localhost:8080/v1");
        assert_eq!(config.default_voice(), &Voice::Marin);
        assert_eq!(config.channel_open_timeout(), Duration::from_secs(3));
        assert_eq!(config.session_update_policy(), SessionUpdatePolicy::AlwaysSend);
    }

    #[test]
    fn rejects_unparsable_values() {
        let err = Config::from_lookup(lookup(&[("REALTIME_CHANNEL_TIMEOUT_SECS", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(var, _) if var == "REALTIME_CHANNEL_TIMEOUT_SECS"));
    }
}
