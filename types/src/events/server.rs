mod error;

pub use error::ErrorDetails;

use serde_json::Value;

use crate::Item;

/// `error` event
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ErrorEvent {
    event_id: String,
    error: ErrorDetails,
}

impl ErrorEvent {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn error(&self) -> &ErrorDetails {
        &self.error
    }
}

/// `session.created` and `session.updated` events
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SessionEvent {
    event_id: String,
    /// The session resource as reported by the server
    session: Value,
}

impl SessionEvent {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn session(&self) -> &Value {
        &self.session
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.get("id").and_then(Value::as_str)
    }
}

/// `conversation.item.created` event
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConversationItemCreatedEvent {
    event_id: String,
    previous_item_id: Option<String>,
    item: Item,
}

impl ConversationItemCreatedEvent {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn previous_item_id(&self) -> Option<&str> {
        self.previous_item_id.as_deref()
    }

    pub fn item(&self) -> &Item {
        &self.item
    }
}

/// `input_audio_buffer.committed` event
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct InputAudioBufferCommittedEvent {
    event_id: String,
    previous_item_id: Option<String>,
    /// The ID of the user message item that will be created
    item_id: String,
}

impl InputAudioBufferCommittedEvent {
    pub fn item_id(&self) -> &str {
        &self.item_id
    }
}

/// `input_audio_buffer.speech_started` event
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct InputAudioBufferSpeechStartedEvent {
    event_id: String,
    /// Milliseconds since the session started when speech was detected
    audio_start_ms: u64,
    item_id: String,
}

impl InputAudioBufferSpeechStartedEvent {
    pub fn audio_start_ms(&self) -> u64 {
        self.audio_start_ms
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }
}

/// `input_audio_buffer.speech_stopped` event
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct InputAudioBufferSpeechStoppedEvent {
    event_id: String,
    audio_end_ms: u64,
    item_id: String,
}

impl InputAudioBufferSpeechStoppedEvent {
    pub fn audio_end_ms(&self) -> u64 {
        self.audio_end_ms
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }
}

/// `conversation.item.input_audio_transcription.completed` event
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct InputAudioTranscriptionCompletedEvent {
    event_id: String,
    item_id: String,
    content_index: u32,
    transcript: String,
}

impl InputAudioTranscriptionCompletedEvent {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    pub fn transcript(&self) -> &str {
        &self.transcript
    }
}

/// `conversation.item.input_audio_transcription.failed` event
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct InputAudioTranscriptionFailedEvent {
    event_id: String,
    item_id: String,
    content_index: u32,
    error: ErrorDetails,
}

impl InputAudioTranscriptionFailedEvent {
    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    pub fn error(&self) -> &ErrorDetails {
        &self.error
    }
}

/// `response.created` and `response.done` events
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResponseEvent {
    event_id: String,
    response: ResponseResource,
}

impl ResponseEvent {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn response(&self) -> &ResponseResource {
        &self.response
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResponseResource {
    id: String,
    /// "in_progress", "completed", "cancelled", "failed" or "incomplete"
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    status_details: Option<Value>,
    #[serde(default)]
    output: Vec<Item>,
    #[serde(default)]
    usage: Option<Usage>,
}

impl ResponseResource {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn status_details(&self) -> Option<&Value> {
        self.status_details.as_ref()
    }

    pub fn output(&self) -> &[Item] {
        &self.output
    }

    pub fn usage(&self) -> Option<&Usage> {
        self.usage.as_ref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Usage {
    total_tokens: u64,
    input_tokens: u64,
    output_tokens: u64,
}

impl Usage {
    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }

    pub fn input_tokens(&self) -> u64 {
        self.input_tokens
    }

    pub fn output_tokens(&self) -> u64 {
        self.output_tokens
    }
}

/// `response.audio_transcript.delta` event
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TranscriptDeltaEvent {
    event_id: String,
    response_id: String,
    item_id: String,
    output_index: u32,
    content_index: u32,
    delta: String,
}

impl TranscriptDeltaEvent {
    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    pub fn delta(&self) -> &str {
        &self.delta
    }
}

/// `response.audio_transcript.done` event
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TranscriptDoneEvent {
    event_id: String,
    response_id: String,
    item_id: String,
    output_index: u32,
    content_index: u32,
    transcript: String,
}

impl TranscriptDoneEvent {
    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    pub fn transcript(&self) -> &str {
        &self.transcript
    }
}

/// `output_audio_buffer.started` and `output_audio_buffer.stopped` events, WebRTC only
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OutputAudioBufferEvent {
    event_id: String,
    response_id: String,
}

impl OutputAudioBufferEvent {
    pub fn response_id(&self) -> &str {
        &self.response_id
    }
}

/// `rate_limits.updated` event
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RateLimitsUpdatedEvent {
    event_id: String,
    rate_limits: Vec<RateLimit>,
}

impl RateLimitsUpdatedEvent {
    pub fn rate_limits(&self) -> &[RateLimit] {
        &self.rate_limits
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RateLimit {
    /// "requests" or "tokens"
    name: String,
    limit: u64,
    remaining: u64,
    reset_seconds: f64,
}

impl RateLimit {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

/// A server event whose `type` has no variant in [`crate::ServerEvent`].
#[derive(Debug, Clone, PartialEq)]
pub struct UnrecognizedEvent {
    event_type: String,
    payload: Value,
}

impl UnrecognizedEvent {
    pub fn new(event_type: String, payload: Value) -> Self {
        Self { event_type, payload }
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// The whole message, `type` included.
    pub fn payload(&self) -> &Value {
        &self.payload
    }
}
