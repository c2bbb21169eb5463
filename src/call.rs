use std::sync::Arc;

use tokio::sync::watch;

use crate::credential::CredentialStore;
use crate::error::{CallError, Result};
use crate::negotiator::Negotiator;
use crate::transport::{
    log_transport_event, AudioSink, DataChannel, Establisher, EventRx, Link, Partial, RtcBackend, Signaler,
    TransportEvent,
};
use crate::types::audio::Voice;
use crate::types::events::client::SessionUpdateEvent;
use crate::types::{ClientEvent, SessionConfig, SessionOptions};

mod config;
pub(crate) mod consts;
mod session;
mod stats;
mod utils;

pub use config::{Config, ConfigBuilder, ConfigError, SessionUpdatePolicy};
pub use session::{CallSession, CallState, ServerRx};
pub use stats::Stats;

use session::{system_message, OutboundRx, Resources};
use utils::stopped;

/// Sequences one call: token, transport, initial configuration, event pump.
pub struct CallController<N, B, S> {
    negotiator: N,
    establisher: Establisher<B, S>,
    policy: SessionUpdatePolicy,
}

impl<N: Negotiator, B: RtcBackend, S: Signaler> CallController<N, B, S> {
    pub fn new(config: &Config, negotiator: N, backend: B, signaler: S) -> Self {
        Self {
            negotiator,
            establisher: Establisher::new(config, backend, signaler),
            policy: config.session_update_policy(),
        }
    }

    /// Routes remote audio to `sink` instead of discarding it.
    pub fn with_sink(mut self, sink: Arc<dyn AudioSink>) -> Self {
        self.establisher = self.establisher.with_sink(sink);
        self
    }

    /// Takes an idle session to `Active`.
    ///
    /// On failure the session is `Failed`, everything opened so far is released and
    /// the original error is returned. If the session is ended while starting, the
    /// result is `Aborted`.
    pub async fn start(&self, session: &CallSession, config: &SessionConfig) -> Result<()> {
        session.transition(CallState::Idle, CallState::Negotiating)?;
        tracing::info!("starting call: voice={}", config.voice());

        let mut shutdown = session.shutdown_signal();
        match self.run(session, config, &mut shutdown).await {
            Ok(()) => {
                tracing::info!("call active");
                Ok(())
            }
            Err(CallError::Aborted) => {
                tracing::info!("call ended while starting");
                Err(CallError::Aborted)
            }
            Err(e) => {
                session.fail();
                tracing::error!("failed to start call: {}", e);
                Err(e)
            }
        }
    }

    async fn run(&self, session: &CallSession, config: &SessionConfig, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        tracing::debug!("negotiating session token");
        let token = tokio::select! {
            token = self.negotiator.create_session_token(config.voice()) => token?,
            _ = stopped(shutdown) => return Err(CallError::Aborted),
        };

        session.advance(CallState::Negotiating, CallState::Establishing)?;
        let mut partial = Partial::new();
        let established = tokio::select! {
            link = self.establisher.establish(&token, &mut partial) => link,
            _ = stopped(shutdown) => Err(CallError::Aborted),
        };
        let Link { peer, channel, events } = match established {
            Ok(link) => link,
            Err(e) => {
                partial.release().await;
                return Err(e);
            }
        };

        let channel: Arc<dyn DataChannel> = Arc::new(channel);
        let resources = Resources {
            channel: channel.clone(),
            peer: Box::new(peer),
            sink: self.establisher.sink(),
        };
        if let Err(resources) = session.activate(resources).await {
            resources.release().await;
            return Err(CallError::Aborted);
        }

        self.send_initial(channel.as_ref(), config).await;
        if let Some(mut outbound) = session.take_outbound() {
            while let Ok(event) = outbound.try_recv() {
                deliver(channel.as_ref(), &event).await;
            }
            spawn_sender(channel, outbound, session.shutdown_signal());
        }
        spawn_event_pump(session.clone(), events, session.shutdown_signal());
        Ok(())
    }

    async fn send_initial(&self, channel: &dyn DataChannel, config: &SessionConfig) {
        if config.instructions().is_empty() {
            tracing::debug!("no instructions to send");
        } else {
            deliver(channel, &system_message(config.instructions())).await;
        }

        let options = config.update_options();
        if options.is_empty() && self.policy == SessionUpdatePolicy::SkipWhenEmpty {
            tracing::debug!("no session options to update");
            return;
        }
        deliver(channel, &ClientEvent::SessionUpdate(SessionUpdateEvent::new(options))).await;
    }
}

async fn deliver(channel: &dyn DataChannel, event: &ClientEvent) {
    match serde_json::to_string(event) {
        Ok(text) => match channel.send_text(text).await {
            Ok(()) => tracing::debug!("sent {}", event.event_type()),
            Err(e) => tracing::error!("failed to send message: {}", e),
        },
        Err(e) => tracing::error!("failed to serialize event: {}", e),
    }
}

fn spawn_sender(channel: Arc<dyn DataChannel>, mut outbound: OutboundRx, mut shutdown: watch::Receiver<bool>) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                event = outbound.recv() => match event {
                    Some(event) => deliver(channel.as_ref(), &event).await,
                    None => break,
                },
            }
        }
    });
}

fn spawn_event_pump(session: CallSession, mut events: EventRx, mut shutdown: watch::Receiver<bool>) {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = stopped(&mut shutdown) => break,
                event = events.recv() => event,
            };
            match event {
                Some(TransportEvent::ChannelMessage(text)) => session.dispatch(&text),
                Some(TransportEvent::ChannelClosed) => {
                    tracing::info!("data channel closed");
                    session.end().await;
                    break;
                }
                Some(TransportEvent::ChannelError(e)) => {
                    tracing::error!("data channel error: {}", e);
                    session.end().await;
                    break;
                }
                Some(other) => log_transport_event(&other),
                None => {
                    tracing::debug!("transport event stream ended");
                    break;
                }
            }
        }
    });
}

/// The caller-facing surface: at most one call at a time.
pub struct CallManager<N, B, S> {
    config: Config,
    controller: CallController<N, B, S>,
    credentials: CredentialStore,
    starting: tokio::sync::Mutex<()>,
    current: tokio::sync::Mutex<Option<CallSession>>,
}

impl<N: Negotiator, B: RtcBackend, S: Signaler> CallManager<N, B, S> {
    pub fn new(config: Config, credentials: CredentialStore, controller: CallController<N, B, S>) -> Self {
        Self {
            config,
            controller,
            credentials,
            starting: tokio::sync::Mutex::new(()),
            current: tokio::sync::Mutex::new(None),
        }
    }

    /// Composes the per-call configuration. Caller options override the defaults
    /// key by key.
    pub fn session_config(
        &self,
        topic_instructions: &str,
        voice: Option<Voice>,
        options: Option<SessionOptions>,
    ) -> SessionConfig {
        let mut defaults = SessionOptions::new();
        if let Some(model) = self.config.transcription_model() {
            defaults = defaults.with_input_audio_transcription_enable(model.clone());
        }
        let options = match options {
            Some(options) => defaults.merge(options),
            None => defaults,
        };

        SessionConfig::builder()
            .with_base_instructions(self.config.base_instructions())
            .with_topic_instructions(topic_instructions)
            .with_voice(voice.unwrap_or_else(|| self.config.default_voice().clone()))
            .with_options(options)
            .build()
    }

    /// Starts a call on `topic_instructions`. Any current call is ended, and fully
    /// torn down, before negotiation for the new one begins.
    pub async fn start_call(
        &self,
        topic_instructions: &str,
        voice: Option<Voice>,
        options: Option<SessionOptions>,
    ) -> Result<CallSession> {
        let _starting = self.starting.lock().await;

        let previous = self.current.lock().await.take();
        if let Some(previous) = previous {
            tracing::info!("ending previous call");
            previous.end().await;
        }

        let config = self.session_config(topic_instructions, voice, options);
        let session = CallSession::new();
        *self.current.lock().await = Some(session.clone());

        match self.controller.start(&session, &config).await {
            Ok(()) => Ok(session),
            Err(e) => {
                let mut current = self.current.lock().await;
                if current.as_ref().is_some_and(|c| c.same_session(&session)) {
                    *current = None;
                }
                Err(e)
            }
        }
    }

    /// Ends and forgets the current call, if any.
    pub async fn end_call(&self) {
        let current = self.current.lock().await.take();
        match current {
            Some(session) => session.end().await,
            None => tracing::debug!("no call to end"),
        }
    }

    pub fn clear_stored_credential(&self) -> Result<()> {
        self.credentials.clear()
    }

    pub async fn current(&self) -> Option<CallSession> {
        self.current.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::{MockCredentialPrompt, CREDENTIAL_KEY};
    use crate::negotiator::{EphemeralToken, MockNegotiator};
    use crate::storage::{KeyValueStore, MemoryStore};
    use crate::test_support::{FakeBackend, FakeState};
    use crate::transport::MockSignaler;
    use crate::types::ServerEvent;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    type TestController = CallController<MockNegotiator, FakeBackend, MockSignaler>;

    fn token_negotiator() -> MockNegotiator {
        let mut negotiator = MockNegotiator::new();
        negotiator
            .expect_create_session_token()
            .returning(|_| Box::pin(async { Ok(EphemeralToken::new("et_abc")) }));
        negotiator
    }

    fn answering_signaler() -> MockSignaler {
        let mut signaler = MockSignaler::new();
        signaler
            .expect_exchange()
            .returning(|_, _| Box::pin(async { Ok("fake-answer".to_string()) }));
        signaler
    }

    fn controller(config: &Config, negotiator: MockNegotiator, backend: FakeBackend) -> TestController {
        CallController::new(config, negotiator, backend, answering_signaler())
    }

    fn tutor_config(options: Option<SessionOptions>) -> SessionConfig {
        let builder = SessionConfig::builder()
            .with_base_instructions("You are a tutor.")
            .with_topic_instructions("Order coffee.")
            .with_voice(Voice::Coral);
        match options {
            Some(options) => builder.with_options(options).build(),
            None => builder.build(),
        }
    }

    async fn eventually(check: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn happy_path_sends_instructions_then_options() {
        let backend = FakeBackend::new();
        let state = backend.state();
        let config = Config::new();
        let controller = controller(&config, token_negotiator(), backend);
        let session = CallSession::new();
        let options = SessionOptions::new()
            .with_option("voice", json!("coral"))
            .with_option("input_audio_transcription", json!({"model": "whisper-1"}));

        controller.start(&session, &tutor_config(Some(options))).await.unwrap();

        assert_eq!(session.state(), CallState::Active);
        assert_eq!(state.sent_types(), vec!["conversation.item.create", "session.update"]);
        let sent = state.sent();
        assert_eq!(sent[0]["item"]["role"], "system");
        assert_eq!(sent[0]["item"]["content"][0]["text"], "You are a tutor.\n\nOrder coffee.");
        assert_eq!(sent[1]["session"], json!({"input_audio_transcription": {"model": "whisper-1"}}));
    }

    #[tokio::test]
    async fn empty_options_skip_the_update_by_default() {
        let backend = FakeBackend::new();
        let state = backend.state();
        let config = Config::new();
        let controller = controller(&config, token_negotiator(), backend);

        controller.start(&CallSession::new(), &tutor_config(None)).await.unwrap();

        assert_eq!(state.sent_types(), vec!["conversation.item.create"]);
    }

    #[tokio::test]
    async fn empty_instructions_send_no_system_message() {
        let backend = FakeBackend::new();
        let state = backend.state();
        let config = Config::new();
        let controller = controller(&config, token_negotiator(), backend);
        let session_config = SessionConfig::builder()
            .with_options(SessionOptions::new().with_option("temperature", json!(0.7)))
            .build();

        controller.start(&CallSession::new(), &session_config).await.unwrap();

        assert_eq!(state.sent_types(), vec!["session.update"]);
    }

    #[tokio::test]
    async fn always_send_policy_sends_an_empty_update() {
        let backend = FakeBackend::new();
        let state = backend.state();
        let config = Config::builder()
            .with_session_update_policy(SessionUpdatePolicy::AlwaysSend)
            .build();
        let controller = controller(&config, token_negotiator(), backend);

        controller.start(&CallSession::new(), &tutor_config(None)).await.unwrap();

        assert_eq!(state.sent_types(), vec!["conversation.item.create", "session.update"]);
        assert_eq!(state.sent()[1]["session"], json!({}));
    }

    #[tokio::test]
    async fn early_messages_are_flushed_after_the_instructions() {
        let backend = FakeBackend::new();
        let state = backend.state();
        let config = Config::new();
        let controller = controller(&config, token_negotiator(), backend);
        let session = CallSession::new();
        session.send_system_instructions("Use polite forms.").unwrap();
        session.create_response().unwrap();

        controller.start(&session, &tutor_config(None)).await.unwrap();
        session.cancel_response().unwrap();
        eventually(|| state.sent().len() == 4).await;

        assert_eq!(
            state.sent_types(),
            vec![
                "conversation.item.create",
                "conversation.item.create",
                "response.create",
                "response.cancel"
            ]
        );
        assert_eq!(state.sent()[1]["item"]["content"][0]["text"], "Use polite forms.");
        assert_eq!(state.count("send_before_open"), 0);
    }

    #[tokio::test]
    async fn negotiation_failure_creates_no_transport() {
        let backend = FakeBackend::new();
        let state = backend.state();
        let mut negotiator = MockNegotiator::new();
        negotiator.expect_create_session_token().times(1).returning(|_| {
            Box::pin(async {
                Err(CallError::NegotiationFailed {
                    status: 401,
                    body: "invalid api key".to_string(),
                })
            })
        });
        let controller = controller(&Config::new(), negotiator, backend);
        let session = CallSession::new();

        let err = controller.start(&session, &tutor_config(None)).await.unwrap_err();

        assert!(matches!(err, CallError::NegotiationFailed { status: 401, .. }));
        assert_eq!(session.state(), CallState::Failed);
        assert!(state.calls().is_empty());
    }

    #[tokio::test]
    async fn denied_microphone_fails_without_a_data_channel() {
        let backend = FakeBackend::new().deny_microphone();
        let state = backend.state();
        let controller = controller(&Config::new(), token_negotiator(), backend);
        let session = CallSession::new();

        let err = controller.start(&session, &tutor_config(None)).await.unwrap_err();

        assert!(matches!(err, CallError::MicrophoneDenied(_)));
        assert_eq!(err.user_message(), "Microphone access denied");
        assert_eq!(session.state(), CallState::Failed);
        assert!(!state.calls().iter().any(|c| c.starts_with("create_data_channel")));
    }

    #[tokio::test]
    async fn timeout_fails_and_releases_the_transport() {
        let backend = FakeBackend::new().never_open();
        let state = backend.state();
        let config = Config::builder()
            .with_channel_open_timeout(Duration::from_millis(50))
            .build();
        let controller = controller(&config, token_negotiator(), backend);
        let session = CallSession::new();

        let err = controller.start(&session, &tutor_config(None)).await.unwrap_err();

        assert!(matches!(err, CallError::ChannelTimeout(_)));
        assert_eq!(session.state(), CallState::Failed);
        assert_eq!(state.count("close_channel"), 1);
        assert_eq!(state.count("close_peer"), 1);
        assert!(state.sent().is_empty());
    }

    #[tokio::test]
    async fn ending_twice_closes_once() {
        let backend = FakeBackend::new();
        let state = backend.state();
        let controller = controller(&Config::new(), token_negotiator(), backend);
        let session = CallSession::new();
        controller.start(&session, &tutor_config(None)).await.unwrap();

        session.end().await;
        session.end().await;

        assert_eq!(session.state(), CallState::Ended);
        assert_eq!(state.count("close_channel"), 1);
        assert_eq!(state.count("close_peer"), 1);
    }

    #[tokio::test]
    async fn ending_while_establishing_aborts_the_start() {
        let backend = FakeBackend::new().never_open();
        let state = backend.state();
        let config = Config::builder()
            .with_channel_open_timeout(Duration::from_secs(30))
            .build();
        let controller = controller(&config, token_negotiator(), backend);
        let session = CallSession::new();
        let call_config = tutor_config(None);

        let (result, _) = tokio::join!(controller.start(&session, &call_config), async {
            eventually(|| state.calls().iter().any(|c| c.starts_with("apply_remote_answer"))).await;
            session.end().await;
        });

        assert!(matches!(result, Err(CallError::Aborted)));
        assert_eq!(session.state(), CallState::Ended);
        assert_eq!(state.count("close_channel"), 1);
        assert_eq!(state.count("close_peer"), 1);
    }

    #[tokio::test]
    async fn starting_twice_is_invalid() {
        let controller = controller(&Config::new(), token_negotiator(), FakeBackend::new());
        let session = CallSession::new();
        controller.start(&session, &tutor_config(None)).await.unwrap();

        let err = controller.start(&session, &tutor_config(None)).await.unwrap_err();

        assert!(matches!(
            err,
            CallError::InvalidState {
                found: CallState::Active,
                ..
            }
        ));
        assert_eq!(session.state(), CallState::Active);
    }

    #[tokio::test]
    async fn server_messages_reach_subscribers() {
        let backend = FakeBackend::new();
        let state = backend.state();
        let controller = controller(&Config::new(), token_negotiator(), backend);
        let session = CallSession::new();
        controller.start(&session, &tutor_config(None)).await.unwrap();
        let mut events = session.server_events();

        state.emit(TransportEvent::ChannelMessage(
            r#"{"type":"response.audio_transcript.done","event_id":"ev_1","response_id":"resp_1","item_id":"item_1","output_index":0,"content_index":0,"transcript":"いらっしゃいませ"}"#
                .to_string(),
        ));

        match events.recv().await.unwrap() {
            ServerEvent::ResponseAudioTranscriptDone(e) => assert_eq!(e.transcript(), "いらっしゃいませ"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn remote_close_ends_the_session() {
        let backend = FakeBackend::new();
        let state = backend.state();
        let controller = controller(&Config::new(), token_negotiator(), backend);
        let session = CallSession::new();
        controller.start(&session, &tutor_config(None)).await.unwrap();

        state.emit(TransportEvent::ChannelClosed);
        eventually(|| session.state() == CallState::Ended).await;

        assert_eq!(state.count("close_peer"), 1);
    }

    fn call_manager(negotiator: MockNegotiator, backend: FakeBackend) -> (Arc<MemoryStore>, CallManager<MockNegotiator, FakeBackend, MockSignaler>) {
        let store = Arc::new(MemoryStore::new());
        let mut prompt = MockCredentialPrompt::new();
        prompt.expect_prompt().never();
        let credentials = CredentialStore::new(store.clone(), Arc::new(prompt));
        let config = Config::new();
        let controller = controller(&config, negotiator, backend);
        (store, CallManager::new(config, credentials, controller))
    }

    #[tokio::test]
    async fn new_call_ends_the_previous_one_before_negotiating() {
        let backend = FakeBackend::new();
        let state: Arc<FakeState> = backend.state();
        let closes_seen = Arc::new(Mutex::new(Vec::new()));
        let mut negotiator = MockNegotiator::new();
        {
            let state = state.clone();
            let closes_seen = closes_seen.clone();
            negotiator.expect_create_session_token().times(2).returning(move |_| {
                closes_seen.lock().unwrap().push(state.count("close_peer"));
                Box::pin(async { Ok(EphemeralToken::new("et_abc")) })
            });
        }
        let (_, manager) = call_manager(negotiator, backend);

        let first = manager.start_call("Order coffee.", None, None).await.unwrap();
        let second = manager
            .start_call("Ask for directions.", Some(Voice::Verse), None)
            .await
            .unwrap();

        assert_eq!(*closes_seen.lock().unwrap(), vec![0, 1]);
        assert_eq!(first.state(), CallState::Ended);
        assert_eq!(second.state(), CallState::Active);
        assert!(manager.current().await.unwrap().same_session(&second));
    }

    #[tokio::test]
    async fn end_call_forgets_the_session() {
        let (_, manager) = call_manager(token_negotiator(), FakeBackend::new());
        manager.end_call().await;

        let session = manager.start_call("Order coffee.", None, None).await.unwrap();
        manager.end_call().await;

        assert_eq!(session.state(), CallState::Ended);
        assert!(manager.current().await.is_none());
    }

    #[tokio::test]
    async fn failed_start_leaves_no_current_call() {
        let (_, manager) = call_manager(token_negotiator(), FakeBackend::new().deny_microphone());

        let err = manager.start_call("Order coffee.", None, None).await.unwrap_err();

        assert!(matches!(err, CallError::MicrophoneDenied(_)));
        assert!(manager.current().await.is_none());
    }

    #[test]
    fn session_config_layers_caller_options_over_defaults() {
        let (_, manager) = call_manager(MockNegotiator::new(), FakeBackend::new());

        let config = manager.session_config("Talk about the weather.", None, None);
        assert_eq!(config.voice(), &Voice::Alloy);
        assert!(config.instructions().ends_with("\n\nTalk about the weather."));
        assert_eq!(
            config.update_options().get("input_audio_transcription"),
            Some(&json!({"model": "whisper-1"}))
        );

        let options = SessionOptions::new()
            .with_option("input_audio_transcription", json!(null))
            .with_option("voice", json!("shimmer"));
        let config = manager.session_config("Talk about the weather.", Some(Voice::Ash), Some(options));
        assert_eq!(config.voice(), &Voice::Shimmer);
        assert_eq!(config.update_options().get("input_audio_transcription"), Some(&json!(null)));
    }

    #[test]
    fn clear_stored_credential_removes_the_key() {
        let (store, manager) = call_manager(MockNegotiator::new(), FakeBackend::new());
        store.set(CREDENTIAL_KEY, "sk-test123").unwrap();

        manager.clear_stored_credential().unwrap();

        assert_eq!(store.get(CREDENTIAL_KEY).unwrap(), None);
    }
}
