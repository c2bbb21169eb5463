use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::transport::{AudioSink, DataChannel, EventTx, PeerConnection, RtcBackend, TransportEvent};

/// Serves `app` on an ephemeral local port and returns its base url.
pub async fn serve(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// What the fake backend saw, shared with the test body.
#[derive(Default)]
pub struct FakeState {
    calls: Mutex<Vec<String>>,
    sent: Mutex<Vec<String>>,
    events: Mutex<Option<EventTx>>,
    opened: AtomicBool,
    deny_microphone: AtomicBool,
    never_open: AtomicBool,
    failing_close: AtomicBool,
    close_before_open: AtomicBool,
    drop_events: AtomicBool,
    channel_error: Mutex<Option<String>>,
}

impl FakeState {
    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
    }

    /// Messages written to the control channel, parsed.
    pub fn sent(&self) -> Vec<serde_json::Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|text| serde_json::from_str(text).unwrap())
            .collect()
    }

    pub fn sent_types(&self) -> Vec<String> {
        self.sent()
            .iter()
            .map(|v| v["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    /// Pushes an event as if the transport had raised it.
    pub fn emit(&self, event: TransportEvent) {
        if let Some(tx) = self.events.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }
}

pub struct FakeBackend {
    state: Arc<FakeState>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(FakeState::default()),
        }
    }

    pub fn state(&self) -> Arc<FakeState> {
        self.state.clone()
    }

    pub fn deny_microphone(self) -> Self {
        self.state.deny_microphone.store(true, Ordering::SeqCst);
        self
    }

    pub fn never_open(self) -> Self {
        self.state.never_open.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_close(self) -> Self {
        self.state.failing_close.store(true, Ordering::SeqCst);
        self
    }

    /// The channel reports closing instead of opening.
    pub fn close_before_open(self) -> Self {
        self.state.close_before_open.store(true, Ordering::SeqCst);
        self
    }

    /// The peer drops its event sender once the answer is applied.
    pub fn drop_events(self) -> Self {
        self.state.drop_events.store(true, Ordering::SeqCst);
        self
    }

    pub fn fail_channel(self, reason: &str) -> Self {
        *self.state.channel_error.lock().unwrap() = Some(reason.to_string());
        self
    }
}

pub struct FakeTrack;

pub struct FakePeer {
    state: Arc<FakeState>,
}

pub struct FakeChannel {
    state: Arc<FakeState>,
}

#[async_trait]
impl RtcBackend for FakeBackend {
    type Track = FakeTrack;
    type Peer = FakePeer;

    async fn capture_microphone(&self) -> anyhow::Result<Vec<FakeTrack>> {
        self.state.record("capture_microphone");
        if self.state.deny_microphone.load(Ordering::SeqCst) {
            anyhow::bail!("permission denied");
        }
        Ok(vec![FakeTrack])
    }

    async fn create_peer(&self, events: EventTx, _sink: Arc<dyn AudioSink>) -> anyhow::Result<FakePeer> {
        self.state.record("create_peer");
        *self.state.events.lock().unwrap() = Some(events);
        Ok(FakePeer {
            state: self.state.clone(),
        })
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    type Track = FakeTrack;
    type Channel = FakeChannel;

    async fn add_track(&self, _track: FakeTrack) -> anyhow::Result<()> {
        self.state.record("add_track");
        Ok(())
    }

    async fn create_data_channel(&self, label: &str) -> anyhow::Result<FakeChannel> {
        self.state.record(format!("create_data_channel:{label}"));
        Ok(FakeChannel {
            state: self.state.clone(),
        })
    }

    async fn create_local_offer(&self) -> anyhow::Result<String> {
        self.state.record("create_local_offer");
        Ok("fake-offer".to_string())
    }

    async fn apply_remote_answer(&self, sdp: String) -> anyhow::Result<()> {
        self.state.record(format!("apply_remote_answer:{sdp}"));
        let channel_error = self.state.channel_error.lock().unwrap().clone();
        if let Some(reason) = channel_error {
            self.state.emit(TransportEvent::ChannelError(reason));
        } else if self.state.close_before_open.load(Ordering::SeqCst) {
            self.state.emit(TransportEvent::ConnectionState("failed".to_string()));
            self.state.emit(TransportEvent::ChannelClosed);
        } else if self.state.drop_events.load(Ordering::SeqCst) {
            self.state.events.lock().unwrap().take();
        } else if !self.state.never_open.load(Ordering::SeqCst) {
            self.state.emit(TransportEvent::ConnectionState("connected".to_string()));
            self.state.opened.store(true, Ordering::SeqCst);
            self.state.emit(TransportEvent::ChannelOpen);
        }
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.state.record("close_peer");
        if self.state.failing_close.load(Ordering::SeqCst) {
            anyhow::bail!("peer already gone");
        }
        Ok(())
    }
}

#[async_trait]
impl DataChannel for FakeChannel {
    async fn send_text(&self, text: String) -> anyhow::Result<()> {
        if !self.state.opened.load(Ordering::SeqCst) {
            self.state.record("send_before_open");
            anyhow::bail!("data channel is not open");
        }
        self.state.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.state.record("close_channel");
        self.state.opened.store(false, Ordering::SeqCst);
        if self.state.failing_close.load(Ordering::SeqCst) {
            anyhow::bail!("channel already closed");
        }
        Ok(())
    }
}
