//! Peer transport establishment.
//!
//! The backend traits are the seam between call sequencing and a concrete WebRTC
//! stack. Backends report data-channel and connection activity as [`TransportEvent`]s
//! on a channel handed to them at peer creation; the [`Establisher`] consumes that
//! channel until the control channel opens, then the session's event pump takes over.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::call::Config;
use crate::error::{CallError, Result};
use crate::negotiator::EphemeralToken;

mod signaling;
#[cfg(feature = "native")]
pub mod native;

pub use signaling::{HttpSignaler, Signaler};

#[cfg(test)]
pub(crate) use signaling::MockSignaler;

pub type EventTx = mpsc::UnboundedSender<TransportEvent>;
pub type EventRx = mpsc::UnboundedReceiver<TransportEvent>;

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    ChannelOpen,
    ChannelMessage(String),
    ChannelError(String),
    ChannelClosed,
    ConnectionState(String),
    IceConnectionState(String),
    RemoteTrack { kind: String },
}

pub(crate) fn log_transport_event(event: &TransportEvent) {
    match event {
        TransportEvent::ConnectionState(state) => tracing::info!("connection state: {}", state),
        TransportEvent::IceConnectionState(state) => tracing::info!("ice connection state: {}", state),
        TransportEvent::RemoteTrack { kind } => tracing::debug!("remote track received: {}", kind),
        other => tracing::debug!("transport event: {:?}", other),
    }
}

/// Where remote audio ends up. Writes are fire-and-forget.
pub trait AudioSink: Send + Sync {
    fn attach(&self, kind: &str);

    fn write(&self, sample_rate: u32, samples: &[f32]);

    fn detach(&self);
}

/// Discards remote audio.
#[derive(Debug, Default)]
pub struct NullSink;

impl AudioSink for NullSink {
    fn attach(&self, _kind: &str) {}

    fn write(&self, _sample_rate: u32, _samples: &[f32]) {}

    fn detach(&self) {}
}

/// The reliable, ordered data channel carrying JSON control events.
#[async_trait]
pub trait DataChannel: Send + Sync {
    async fn send_text(&self, text: String) -> anyhow::Result<()>;

    async fn close(&self) -> anyhow::Result<()>;
}

#[async_trait]
pub trait PeerConnection: Send + Sync {
    type Track: Send;
    type Channel: DataChannel + 'static;

    async fn add_track(&self, track: Self::Track) -> anyhow::Result<()>;

    async fn create_data_channel(&self, label: &str) -> anyhow::Result<Self::Channel>;

    /// Creates the offer and applies it as the local description.
    async fn create_local_offer(&self) -> anyhow::Result<String>;

    async fn apply_remote_answer(&self, sdp: String) -> anyhow::Result<()>;

    async fn close(&self) -> anyhow::Result<()>;
}

#[async_trait]
pub trait RtcBackend: Send + Sync {
    type Track: Send;
    type Peer: PeerConnection<Track = Self::Track> + 'static;

    /// Starts local microphone capture. Any error here means the microphone is
    /// unavailable to the call.
    async fn capture_microphone(&self) -> anyhow::Result<Vec<Self::Track>>;

    async fn create_peer(&self, events: EventTx, sink: Arc<dyn AudioSink>) -> anyhow::Result<Self::Peer>;
}

/// Type-erased peer, so an established session does not carry the backend type.
#[async_trait]
pub(crate) trait Shutdown: Send + Sync {
    async fn shutdown(&self) -> anyhow::Result<()>;
}

#[async_trait]
impl<P: PeerConnection> Shutdown for P {
    async fn shutdown(&self) -> anyhow::Result<()> {
        self.close().await
    }
}

/// An open transport: the peer, its control channel, and the event stream.
pub struct Link<P: PeerConnection> {
    pub peer: P,
    pub channel: P::Channel,
    pub events: EventRx,
}

/// Whatever establishment has created so far.
pub struct Partial<P: PeerConnection> {
    peer: Option<P>,
    channel: Option<P::Channel>,
}

impl<P: PeerConnection> Default for Partial<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: PeerConnection> Partial<P> {
    pub fn new() -> Self {
        Self {
            peer: None,
            channel: None,
        }
    }

    /// Closes the channel, then the peer. Failures are logged, never raised.
    pub async fn release(&mut self) {
        if let Some(channel) = self.channel.take() {
            if let Err(e) = channel.close().await {
                tracing::warn!("failed to close data channel: {}", e);
            }
        }
        if let Some(peer) = self.peer.take() {
            if let Err(e) = peer.close().await {
                tracing::warn!("failed to close peer connection: {}", e);
            }
        }
    }
}

fn unavailable(e: anyhow::Error) -> CallError {
    CallError::TransportUnavailable(e.to_string())
}

pub struct Establisher<B, S> {
    backend: B,
    signaler: S,
    label: String,
    open_timeout: Duration,
    sink: Arc<dyn AudioSink>,
}

impl<B: RtcBackend, S: Signaler> Establisher<B, S> {
    pub fn new(config: &Config, backend: B, signaler: S) -> Self {
        Self {
            backend,
            signaler,
            label: config.channel_label().to_string(),
            open_timeout: config.channel_open_timeout(),
            sink: Arc::new(NullSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn AudioSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn sink(&self) -> Arc<dyn AudioSink> {
        self.sink.clone()
    }

    /// Runs every establishment step, releasing partial resources on failure.
    pub async fn open(&self, token: &EphemeralToken) -> Result<Link<B::Peer>> {
        let mut partial = Partial::new();
        match self.establish(token, &mut partial).await {
            Ok(link) => Ok(link),
            Err(e) => {
                partial.release().await;
                Err(e)
            }
        }
    }

    /// Like [`Establisher::open`], but leaves releasing `partial` to the caller, so
    /// the attempt can be abandoned at any await point and still cleaned up.
    pub async fn establish(&self, token: &EphemeralToken, partial: &mut Partial<B::Peer>) -> Result<Link<B::Peer>> {
        tracing::debug!("acquiring microphone");
        let tracks = self
            .backend
            .capture_microphone()
            .await
            .map_err(|e| CallError::MicrophoneDenied(e.to_string()))?;

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let peer = self
            .backend
            .create_peer(events_tx, self.sink.clone())
            .await
            .map_err(unavailable)?;
        let peer = partial.peer.insert(peer);

        tracing::debug!("attaching {} local track(s)", tracks.len());
        for track in tracks {
            peer.add_track(track).await.map_err(unavailable)?;
        }

        let channel = peer.create_data_channel(&self.label).await.map_err(unavailable)?;
        partial.channel = Some(channel);
        let deadline = Instant::now() + self.open_timeout;
        tracing::debug!("data channel {} created", self.label);

        let offer = peer.create_local_offer().await.map_err(unavailable)?;
        let answer = self.signaler.exchange(token, offer).await?;
        peer.apply_remote_answer(answer).await.map_err(unavailable)?;
        tracing::debug!("remote description applied, waiting for data channel");

        self.await_open(&mut events_rx, deadline).await?;

        match (partial.peer.take(), partial.channel.take()) {
            (Some(peer), Some(channel)) => Ok(Link {
                peer,
                channel,
                events: events_rx,
            }),
            _ => Err(CallError::TransportUnavailable("transport was released while opening".to_string())),
        }
    }

    async fn await_open(&self, events: &mut EventRx, deadline: Instant) -> Result<()> {
        let wait = async {
            while let Some(event) = events.recv().await {
                match event {
                    TransportEvent::ChannelOpen => {
                        tracing::info!("data channel opened");
                        return Ok(());
                    }
                    TransportEvent::ChannelError(e) => return Err(CallError::ChannelError(e)),
                    TransportEvent::ChannelClosed => {
                        return Err(CallError::ChannelError("data channel closed before opening".to_string()))
                    }
                    other => log_transport_event(&other),
                }
            }
            Err(CallError::ChannelError("transport stopped reporting events".to_string()))
        };

        match tokio::time::timeout_at(deadline, wait).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!("data channel did not open within {:?}", self.open_timeout);
                Err(CallError::ChannelTimeout(self.open_timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeBackend;

    fn config(timeout: Duration) -> Config {
        Config::builder().with_channel_open_timeout(timeout).build()
    }

    fn answering_signaler() -> MockSignaler {
        let mut signaler = MockSignaler::new();
        signaler
            .expect_exchange()
            .withf(|token, offer| {
                use secrecy::ExposeSecret;
                token.secret().expose_secret() == "et_abc" && offer == "fake-offer"
            })
            .returning(|_, _| Box::pin(async { Ok("fake-answer".to_string()) }));
        signaler
    }

    #[tokio::test]
    async fn opens_in_order() {
        let backend = FakeBackend::new();
        let state = backend.state();
        let establisher = Establisher::new(&config(Duration::from_secs(1)), backend, answering_signaler());

        let link = establisher.open(&EphemeralToken::new("et_abc")).await.unwrap();

        assert_eq!(
            state.calls(),
            vec![
                "capture_microphone",
                "create_peer",
                "add_track",
                "create_data_channel:oai-events",
                "create_local_offer",
                "apply_remote_answer:fake-answer",
            ]
        );
        drop(link);
    }

    #[tokio::test]
    async fn denied_microphone_creates_nothing() {
        let backend = FakeBackend::new().deny_microphone();
        let state = backend.state();
        let mut signaler = MockSignaler::new();
        signaler.expect_exchange().never();
        let establisher = Establisher::new(&config(Duration::from_secs(1)), backend, signaler);

        let err = establisher.open(&EphemeralToken::new("et_abc")).await.err().unwrap();

        assert!(matches!(err, CallError::MicrophoneDenied(_)));
        assert_eq!(state.calls(), vec!["capture_microphone"]);
    }

    #[tokio::test]
    async fn signaling_failure_closes_channel_then_peer() {
        let backend = FakeBackend::new();
        let state = backend.state();
        let mut signaler = MockSignaler::new();
        signaler.expect_exchange().returning(|_, _| {
            Box::pin(async {
                Err(CallError::SignalingFailed {
                    status: 400,
                    body: "bad offer".to_string(),
                })
            })
        });
        let establisher = Establisher::new(&config(Duration::from_secs(1)), backend, signaler);

        let err = establisher.open(&EphemeralToken::new("et_abc")).await.err().unwrap();

        assert!(matches!(err, CallError::SignalingFailed { status: 400, .. }));
        let calls = state.calls();
        assert_eq!(&calls[calls.len() - 2..], ["close_channel", "close_peer"]);
        assert!(!calls.iter().any(|c| c.starts_with("apply_remote_answer")));
    }

    #[tokio::test]
    async fn unopened_channel_times_out() {
        let backend = FakeBackend::new().never_open();
        let state = backend.state();
        let timeout = Duration::from_millis(50);
        let establisher = Establisher::new(&config(timeout), backend, answering_signaler());

        let err = establisher.open(&EphemeralToken::new("et_abc")).await.err().unwrap();

        assert!(matches!(err, CallError::ChannelTimeout(t) if t == timeout));
        assert_eq!(state.count("close_channel"), 1);
        assert_eq!(state.count("close_peer"), 1);
    }

    #[tokio::test]
    async fn channel_error_before_open_fails() {
        let backend = FakeBackend::new().fail_channel("ice failed");
        let state = backend.state();
        let establisher = Establisher::new(&config(Duration::from_secs(1)), backend, answering_signaler());

        let err = establisher.open(&EphemeralToken::new("et_abc")).await.err().unwrap();

        assert!(matches!(err, CallError::ChannelError(ref e) if e == "ice failed"));
        assert_eq!(state.count("close_peer"), 1);
    }

    #[tokio::test]
    async fn channel_closing_before_open_fails() {
        let backend = FakeBackend::new().close_before_open();
        let state = backend.state();
        let establisher = Establisher::new(&config(Duration::from_secs(1)), backend, answering_signaler());

        let err = establisher.open(&EphemeralToken::new("et_abc")).await.err().unwrap();

        assert!(matches!(err, CallError::ChannelError(_)));
        assert_eq!(state.count("close_channel"), 1);
        assert_eq!(state.count("close_peer"), 1);
    }

    #[tokio::test]
    async fn silent_transport_fails_before_the_deadline() {
        let backend = FakeBackend::new().drop_events();
        let state = backend.state();
        let establisher = Establisher::new(&config(Duration::from_secs(30)), backend, answering_signaler());

        let err = tokio::time::timeout(Duration::from_secs(5), establisher.open(&EphemeralToken::new("et_abc")))
            .await
            .unwrap()
            .err()
            .unwrap();

        assert!(matches!(err, CallError::ChannelError(_)));
        assert_eq!(state.count("close_channel"), 1);
        assert_eq!(state.count("close_peer"), 1);
    }

    #[tokio::test]
    async fn close_failures_do_not_mask_the_error() {
        let backend = FakeBackend::new().never_open().failing_close();
        let state = backend.state();
        let establisher = Establisher::new(&config(Duration::from_millis(20)), backend, answering_signaler());

        let err = establisher.open(&EphemeralToken::new("et_abc")).await.err().unwrap();

        assert!(matches!(err, CallError::ChannelTimeout(_)));
        assert_eq!(state.count("close_channel"), 1);
        assert_eq!(state.count("close_peer"), 1);
    }
}
