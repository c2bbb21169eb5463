use serde_json::{Map, Value};

use crate::audio::{InputAudioTranscription, TranscriptionModel, TurnDetection, Voice};

pub const VOICE_KEY: &str = "voice";
pub const INSTRUCTIONS_KEY: &str = "instructions";

/// Open-ended provider options carried by a `session.update` event.
///
/// The typed `with_*` setters cover the options this crate knows about; anything
/// else can be set through [`SessionOptions::with_option`].
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct SessionOptions(Map<String, Value>);

impl SessionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    fn set<T: serde::Serialize>(mut self, key: &str, value: &T) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.0.insert(key.to_string(), value);
        self
    }

    pub fn with_modalities(self, modalities: &[&str]) -> Self {
        self.set("modalities", &modalities)
    }

    pub fn with_input_audio_transcription(self, transcription: InputAudioTranscription) -> Self {
        self.set("input_audio_transcription", &transcription)
    }

    pub fn with_input_audio_transcription_enable(self, model: TranscriptionModel) -> Self {
        self.with_input_audio_transcription(InputAudioTranscription::new().with_model(model))
    }

    /// An explicit `null` turns transcription off on the server.
    pub fn with_input_audio_transcription_disable(self) -> Self {
        self.with_option("input_audio_transcription", Value::Null)
    }

    pub fn with_turn_detection_enable(self, turn_detection: TurnDetection) -> Self {
        self.set("turn_detection", &turn_detection)
    }

    pub fn with_turn_detection_disable(self) -> Self {
        self.with_option("turn_detection", Value::Null)
    }

    pub fn with_temperature(self, temperature: f32) -> Self {
        self.set("temperature", &temperature)
    }

    pub fn with_max_response_output_tokens(self, max: MaxOutputTokens) -> Self {
        self.set("max_response_output_tokens", &max)
    }

    pub fn with_option(mut self, key: &str, value: Value) -> Self {
        self.0.insert(key.to_string(), value);
        self
    }

    /// Key-wise merge; entries of `other` win.
    pub fn merge(mut self, other: SessionOptions) -> Self {
        self.0.extend(other.0);
        self
    }

    pub fn without(mut self, keys: &[&str]) -> Self {
        for key in keys {
            self.0.remove(*key);
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for SessionOptions {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum MaxOutputTokens {
    Number(u32),
    /// Always "inf"
    Infinity(String),
}

impl MaxOutputTokens {
    pub fn infinity() -> Self {
        Self::Infinity("inf".to_string())
    }
}

/// Everything one call is configured with. Built once per call and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    instructions: String,
    voice: Voice,
    options: SessionOptions,
}

impl SessionConfig {
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::new()
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn voice(&self) -> &Voice {
        &self.voice
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Options still to be applied through `session.update`. The voice goes out with
    /// the token request and the instructions as a system message, so both are removed.
    pub fn update_options(&self) -> SessionOptions {
        self.options
            .clone()
            .without(&[VOICE_KEY, INSTRUCTIONS_KEY])
    }
}

#[derive(Debug, Default)]
pub struct SessionConfigBuilder {
    base_instructions: String,
    topic_instructions: String,
    voice: Voice,
    options: SessionOptions,
}

impl SessionConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_instructions(mut self, instructions: &str) -> Self {
        self.base_instructions = instructions.to_string();
        self
    }

    pub fn with_topic_instructions(mut self, instructions: &str) -> Self {
        self.topic_instructions = instructions.to_string();
        self
    }

    pub fn with_voice(mut self, voice: Voice) -> Self {
        self.voice = voice;
        self
    }

    /// Merged over any options set earlier.
    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = self.options.merge(options);
        self
    }

    /// String `voice` or `instructions` entries in the options override the typed values.
    pub fn build(self) -> SessionConfig {
        let base = self.base_instructions.trim_end();
        let topic = self.topic_instructions.trim();
        let composed = match (base.is_empty(), topic.is_empty()) {
            (true, _) => topic.to_string(),
            (false, true) => base.to_string(),
            (false, false) => format!("{base}\n\n{topic}"),
        };

        let instructions = match self.options.get(INSTRUCTIONS_KEY) {
            Some(Value::String(s)) => s.clone(),
            _ => composed,
        };
        let voice = match self.options.get(VOICE_KEY) {
            Some(Value::String(s)) => s.parse().unwrap_or(self.voice),
            _ => self.voice,
        };

        SessionConfig {
            instructions,
            voice,
            options: self.options,
        }
    }
}
