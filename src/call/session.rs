use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{broadcast, mpsc, watch};

use crate::call::consts;
use crate::call::stats::Stats;
use crate::error::{CallError, Result};
use crate::transport::{AudioSink, DataChannel, Shutdown};
use crate::types::events::client::{ConversationItemCreateEvent, EmptyClientEvent, ResponseCreateEvent, SessionUpdateEvent};
use crate::types::{ClientEvent, Item, MessageItem, ServerEvent, SessionOptions};

pub type ServerRx = broadcast::Receiver<ServerEvent>;
pub(crate) type OutboundRx = mpsc::UnboundedReceiver<ClientEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    Negotiating,
    Establishing,
    Active,
    Ended,
    Failed,
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Ended | CallState::Failed)
    }

    fn is_live(&self) -> bool {
        matches!(self, CallState::Negotiating | CallState::Establishing | CallState::Active)
    }
}

/// What an active session holds open.
pub(crate) struct Resources {
    pub(crate) channel: Arc<dyn DataChannel>,
    pub(crate) peer: Box<dyn Shutdown>,
    pub(crate) sink: Arc<dyn AudioSink>,
}

impl Resources {
    /// Closes the channel, then the peer, then detaches the sink. Failures are logged.
    pub(crate) async fn release(self) {
        if let Err(e) = self.channel.close().await {
            tracing::warn!("failed to close data channel: {}", e);
        }
        if let Err(e) = self.peer.shutdown().await {
            tracing::warn!("failed to close peer connection: {}", e);
        }
        self.sink.detach();
    }
}

struct Shared {
    state: Mutex<CallState>,
    resources: tokio::sync::Mutex<Option<Resources>>,
    outbound_tx: mpsc::UnboundedSender<ClientEvent>,
    outbound_rx: Mutex<Option<OutboundRx>>,
    server_tx: broadcast::Sender<ServerEvent>,
    stats: Mutex<Stats>,
    shutdown: watch::Sender<bool>,
}

/// Handle to one call. Clones share the same session.
#[derive(Clone)]
pub struct CallSession {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for CallSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSession").field("state", &self.state()).finish_non_exhaustive()
    }
}

impl Default for CallSession {
    fn default() -> Self {
        Self::new()
    }
}

impl CallSession {
    pub fn new() -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (server_tx, _) = broadcast::channel(consts::EVENT_CAPACITY);
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(CallState::Idle),
                resources: tokio::sync::Mutex::new(None),
                outbound_tx,
                outbound_rx: Mutex::new(Some(outbound_rx)),
                server_tx,
                stats: Mutex::new(Stats::new()),
                shutdown,
            }),
        }
    }

    pub fn state(&self) -> CallState {
        *self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether both handles refer to the same session.
    pub fn same_session(&self, other: &CallSession) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Moves from `from` to `to`, failing with `InvalidState` from anywhere else.
    pub(crate) fn transition(&self, from: CallState, to: CallState) -> Result<()> {
        let mut state = self.shared.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != from {
            return Err(CallError::InvalidState {
                expected: state_name(from),
                found: *state,
            });
        }
        tracing::debug!("call state {:?} -> {:?}", from, to);
        *state = to;
        Ok(())
    }

    /// Like `transition`, for steps of a start in progress: an ended session means
    /// the start was aborted.
    pub(crate) fn advance(&self, from: CallState, to: CallState) -> Result<()> {
        self.transition(from, to).map_err(|e| match e {
            CallError::InvalidState {
                found: CallState::Ended,
                ..
            } => CallError::Aborted,
            other => other,
        })
    }

    /// Marks a start as failed unless the session was ended in the meantime.
    pub(crate) fn fail(&self) {
        let mut state = self.shared.state.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(*state, CallState::Negotiating | CallState::Establishing) {
            tracing::debug!("call state {:?} -> Failed", *state);
            *state = CallState::Failed;
        }
    }

    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shared.shutdown.subscribe()
    }

    pub(crate) fn take_outbound(&self) -> Option<OutboundRx> {
        self.shared
            .outbound_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Stores the established resources and goes `Active`, unless the session was
    /// ended first, in which case the resources are handed back.
    pub(crate) async fn activate(&self, resources: Resources) -> std::result::Result<(), Resources> {
        let mut slot = self.shared.resources.lock().await;
        if self.advance(CallState::Establishing, CallState::Active).is_err() {
            return Err(resources);
        }
        *slot = Some(resources);
        Ok(())
    }

    /// Ends the call: interrupts a start in progress, closes the control channel,
    /// closes the peer, detaches the audio sink.
    ///
    /// A no-op outside `Negotiating`, `Establishing` and `Active`, so repeated calls
    /// are harmless.
    pub async fn end(&self) {
        let mut slot = self.shared.resources.lock().await;
        let previous = {
            let mut state = self.shared.state.lock().unwrap_or_else(PoisonError::into_inner);
            if !state.is_live() {
                return;
            }
            std::mem::replace(&mut *state, CallState::Ended)
        };
        self.shared.shutdown.send_replace(true);
        tracing::info!("call ended (was {:?})", previous);

        if let Some(resources) = slot.take() {
            resources.release().await;
        }
    }

    /// Queues a client event. Events queued before the control channel opens are
    /// delivered, in order, once the call is active.
    pub fn send(&self, event: ClientEvent) -> Result<()> {
        let state = self.state();
        if state.is_terminal() {
            return Err(CallError::InvalidState {
                expected: "a session that has not ended",
                found: state,
            });
        }
        tracing::debug!("queueing {}", event.event_type());
        self.shared.outbound_tx.send(event).map_err(|_| CallError::InvalidState {
            expected: "a session that has not ended",
            found: state,
        })
    }

    pub fn send_system_instructions(&self, text: &str) -> Result<()> {
        self.send(system_message(text))
    }

    pub fn update_session(&self, options: SessionOptions) -> Result<()> {
        self.send(ClientEvent::SessionUpdate(SessionUpdateEvent::new(options)))
    }

    pub fn create_response(&self) -> Result<()> {
        self.send(ClientEvent::ResponseCreate(ResponseCreateEvent::new()))
    }

    pub fn cancel_response(&self) -> Result<()> {
        self.send(ClientEvent::ResponseCancel(EmptyClientEvent::new()))
    }

    /// Subscribes to parsed server events from this point on.
    pub fn server_events(&self) -> ServerRx {
        self.shared.server_tx.subscribe()
    }

    pub fn stats(&self) -> Stats {
        match self.shared.stats.lock() {
            Ok(stats) => stats.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Handles one control-channel message: parse, log, account, broadcast.
    pub(crate) fn dispatch(&self, text: &str) {
        let event = match ServerEvent::parse(text) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!("failed to deserialize event: {}, text=> {:?}", e, text);
                return;
            }
        };
        super::utils::log_server_event(&event);

        if let ServerEvent::ResponseDone(response) = &event {
            if let Ok(mut stats) = self.shared.stats.lock() {
                stats.record_response();
                if let Some(usage) = response.response().usage() {
                    stats.update_usage(usage.total_tokens(), usage.input_tokens(), usage.output_tokens());
                    tracing::debug!(
                        "total_tokens: {}, input_tokens: {}, output_tokens: {}",
                        usage.total_tokens(),
                        usage.input_tokens(),
                        usage.output_tokens()
                    );
                }
            } else {
                tracing::error!("failed to update stats");
            }
        }

        if self.shared.server_tx.send(event).is_err() {
            tracing::trace!("no subscribers for server events");
        }
    }
}

pub(crate) fn system_message(text: &str) -> ClientEvent {
    ClientEvent::ConversationItemCreate(ConversationItemCreateEvent::new(Item::Message(MessageItem::system(text))))
}

fn state_name(state: CallState) -> &'static str {
    match state {
        CallState::Idle => "Idle",
        CallState::Negotiating => "Negotiating",
        CallState::Establishing => "Establishing",
        CallState::Active => "Active",
        CallState::Ended => "Ended",
        CallState::Failed => "Failed",
    }
}
