pub mod client;
pub mod server;

use client::*;
use server::*;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate(SessionUpdateEvent),
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate(ConversationItemCreateEvent),
    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear(EmptyClientEvent),
    #[serde(rename = "output_audio_buffer.clear")]
    OutputAudioBufferClear(EmptyClientEvent),
    #[serde(rename = "response.create")]
    ResponseCreate(ResponseCreateEvent),
    #[serde(rename = "response.cancel")]
    ResponseCancel(EmptyClientEvent),
}

impl ClientEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::SessionUpdate(_) => "session.update",
            ClientEvent::ConversationItemCreate(_) => "conversation.item.create",
            ClientEvent::InputAudioBufferClear(_) => "input_audio_buffer.clear",
            ClientEvent::OutputAudioBufferClear(_) => "output_audio_buffer.clear",
            ClientEvent::ResponseCreate(_) => "response.create",
            ClientEvent::ResponseCancel(_) => "response.cancel",
        }
    }
}

/// Events sent by the server over the control channel.
///
/// Event kinds without a variant here are kept as [`ServerEvent::Unrecognized`] so a newer
/// server never breaks the event stream. Use [`ServerEvent::parse`] rather than
/// deserializing directly to get that fallback.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "error")]
    Error(ErrorEvent),
    #[serde(rename = "session.created")]
    SessionCreated(SessionEvent),
    #[serde(rename = "session.updated")]
    SessionUpdated(SessionEvent),
    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated(ConversationItemCreatedEvent),
    #[serde(rename = "input_audio_buffer.committed")]
    InputAudioBufferCommitted(InputAudioBufferCommittedEvent),
    #[serde(rename = "input_audio_buffer.speech_started")]
    InputAudioBufferSpeechStarted(InputAudioBufferSpeechStartedEvent),
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    InputAudioBufferSpeechStopped(InputAudioBufferSpeechStoppedEvent),
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputAudioTranscriptionCompleted(InputAudioTranscriptionCompletedEvent),
    #[serde(rename = "conversation.item.input_audio_transcription.failed")]
    InputAudioTranscriptionFailed(InputAudioTranscriptionFailedEvent),
    #[serde(rename = "response.created")]
    ResponseCreated(ResponseEvent),
    #[serde(rename = "response.done")]
    ResponseDone(ResponseEvent),
    #[serde(rename = "response.audio_transcript.delta")]
    ResponseAudioTranscriptDelta(TranscriptDeltaEvent),
    #[serde(rename = "response.audio_transcript.done")]
    ResponseAudioTranscriptDone(TranscriptDoneEvent),
    #[serde(rename = "output_audio_buffer.started")]
    OutputAudioBufferStarted(OutputAudioBufferEvent),
    #[serde(rename = "output_audio_buffer.stopped")]
    OutputAudioBufferStopped(OutputAudioBufferEvent),
    #[serde(rename = "rate_limits.updated")]
    RateLimitsUpdated(RateLimitsUpdatedEvent),
    #[serde(skip)]
    Unrecognized(UnrecognizedEvent),
}

const KNOWN_SERVER_EVENTS: &[&str] = &[
    "error",
    "session.created",
    "session.updated",
    "conversation.item.created",
    "input_audio_buffer.committed",
    "input_audio_buffer.speech_started",
    "input_audio_buffer.speech_stopped",
    "conversation.item.input_audio_transcription.completed",
    "conversation.item.input_audio_transcription.failed",
    "response.created",
    "response.done",
    "response.audio_transcript.delta",
    "response.audio_transcript.done",
    "output_audio_buffer.started",
    "output_audio_buffer.stopped",
    "rate_limits.updated",
];

impl ServerEvent {
    /// Parses one control-channel message.
    ///
    /// Unknown `type`s become `Unrecognized`; a known `type` with a malformed body, or a
    /// message without a string `type`, is an error.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let event_type = value
            .get("type")
            .and_then(|t| t.as_str())
            .map(str::to_string);

        match event_type {
            Some(t) if !KNOWN_SERVER_EVENTS.contains(&t.as_str()) => {
                Ok(ServerEvent::Unrecognized(UnrecognizedEvent::new(t, value)))
            }
            _ => serde_json::from_value(value),
        }
    }

    pub fn event_type(&self) -> &str {
        match self {
            ServerEvent::Error(_) => "error",
            ServerEvent::SessionCreated(_) => "session.created",
            ServerEvent::SessionUpdated(_) => "session.updated",
            ServerEvent::ConversationItemCreated(_) => "conversation.item.created",
            ServerEvent::InputAudioBufferCommitted(_) => "input_audio_buffer.committed",
            ServerEvent::InputAudioBufferSpeechStarted(_) => "input_audio_buffer.speech_started",
            ServerEvent::InputAudioBufferSpeechStopped(_) => "input_audio_buffer.speech_stopped",
            ServerEvent::InputAudioTranscriptionCompleted(_) => {
                "conversation.item.input_audio_transcription.completed"
            }
            ServerEvent::InputAudioTranscriptionFailed(_) => {
                "conversation.item.input_audio_transcription.failed"
            }
            ServerEvent::ResponseCreated(_) => "response.created",
            ServerEvent::ResponseDone(_) => "response.done",
            ServerEvent::ResponseAudioTranscriptDelta(_) => "response.audio_transcript.delta",
            ServerEvent::ResponseAudioTranscriptDone(_) => "response.audio_transcript.done",
            ServerEvent::OutputAudioBufferStarted(_) => "output_audio_buffer.started",
            ServerEvent::OutputAudioBufferStopped(_) => "output_audio_buffer.stopped",
            ServerEvent::RateLimitsUpdated(_) => "rate_limits.updated",
            ServerEvent::Unrecognized(e) => e.event_type(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::TranscriptionModel;
    use crate::{Item, MessageItem, SessionOptions};
    use serde_json::json;

    #[test]
    fn client_events_serialize_to_wire_shape() {
        let event = ClientEvent::ConversationItemCreate(ConversationItemCreateEvent::new(
            Item::Message(MessageItem::system("Be kind.")),
        ));
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "conversation.item.create",
                "item": {
                    "type": "message",
                    "role": "system",
                    "content": [{"type": "input_text", "text": "Be kind."}]
                }
            })
        );

        let options = SessionOptions::new().with_input_audio_transcription_enable(TranscriptionModel::Whisper);
        let event = ClientEvent::SessionUpdate(SessionUpdateEvent::new(options));
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "session.update",
                "session": {"input_audio_transcription": {"model": "whisper-1"}}
            })
        );

        let event = ClientEvent::ResponseCancel(EmptyClientEvent::new());
        assert_eq!(serde_json::to_value(&event).unwrap(), json!({"type": "response.cancel"}));
    }

    #[test]
    fn parses_known_server_events() {
        let text = r#"{"type":"conversation.item.input_audio_transcription.completed","event_id":"ev_1","item_id":"item_1","content_index":0,"transcript":"おはよう"}"#;
        let event = ServerEvent::parse(text).unwrap();
        match event {
            ServerEvent::InputAudioTranscriptionCompleted(e) => {
                assert_eq!(e.transcript(), "おはよう");
                assert_eq!(e.item_id(), "item_1");
            }
            other => panic!("unexpected event {other:?}"),
        }

        let text = r#"{"type":"error","event_id":"ev_2","error":{"type":"invalid_request_error","code":"bad","message":"nope","param":null,"event_id":null}}"#;
        let ServerEvent::Error(e) = ServerEvent::parse(text).unwrap() else {
            panic!("expected an error event");
        };
        assert_eq!(e.error().message(), "nope");
        assert_eq!(e.error().code(), Some("bad"));
    }

    #[test]
    fn response_done_exposes_usage() {
        let text = json!({
            "type": "response.done",
            "event_id": "ev_3",
            "response": {
                "id": "resp_1",
                "status": "completed",
                "output": [],
                "usage": {"total_tokens": 30, "input_tokens": 10, "output_tokens": 20}
            }
        })
        .to_string();
        let ServerEvent::ResponseDone(e) = ServerEvent::parse(&text).unwrap() else {
            panic!("expected response.done");
        };
        let usage = e.response().usage().unwrap();
        assert_eq!(usage.total_tokens(), 30);
        assert_eq!(usage.input_tokens(), 10);
        assert_eq!(usage.output_tokens(), 20);
        assert_eq!(e.response().status(), Some("completed"));
    }

    #[test]
    fn unknown_types_fall_back_to_unrecognized() {
        let text = r#"{"type":"response.mcp_call.in_progress","event_id":"ev_4","item_id":"x"}"#;
        let event = ServerEvent::parse(text).unwrap();
        assert_eq!(event.event_type(), "response.mcp_call.in_progress");
        let ServerEvent::Unrecognized(e) = event else {
            panic!("expected the fallback variant");
        };
        assert_eq!(e.payload()["item_id"], "x");
    }

    #[test]
    fn malformed_known_events_are_errors() {
        assert!(ServerEvent::parse(r#"{"type":"error","event_id":"ev_5"}"#).is_err());
        assert!(ServerEvent::parse(r#"{"event_id":"ev_6"}"#).is_err());
        assert!(ServerEvent::parse("not json").is_err());
    }
}
