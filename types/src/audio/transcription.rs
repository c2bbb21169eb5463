use crate::audio::TranscriptionModel;

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct InputAudioTranscription {
    /// The model to use for transcription: "whisper-1"
    model: TranscriptionModel,
    /// ISO-639-1 language of the input audio, improves accuracy when known
    #[serde(skip_serializing_if = "Option::is_none")]
    language: Option<String>,
    /// Free text hint for the transcription model
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt: Option<String>,
}

impl InputAudioTranscription {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: TranscriptionModel) -> Self {
        self.model = model;
        self
    }

    pub fn with_language(mut self, language: &str) -> Self {
        self.language = Some(language.to_string());
        self
    }

    pub fn with_prompt(mut self, prompt: &str) -> Self {
        self.prompt = Some(prompt.to_string());
        self
    }

    pub fn model(&self) -> &TranscriptionModel {
        &self.model
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }
}
