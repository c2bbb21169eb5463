use tokio::sync::watch;

use crate::types::ServerEvent;

/// Resolves once the shutdown flag is set. Never resolves if the sender is gone
/// without having set it.
pub(crate) async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    loop {
        let stop = *shutdown.borrow_and_update();
        if stop {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

pub(crate) fn log_server_event(event: &ServerEvent) {
    match event {
        ServerEvent::Error(e) => {
            tracing::error!(
                "server error: {} (type={}, code={:?})",
                e.error().message(),
                e.error().error_type(),
                e.error().code()
            );
        }
        ServerEvent::SessionCreated(e) | ServerEvent::SessionUpdated(e) => {
            tracing::info!("{}: id={}", event.event_type(), e.session_id().unwrap_or("unknown"));
        }
        ServerEvent::InputAudioBufferSpeechStarted(e) => {
            tracing::debug!("speech started at {}ms", e.audio_start_ms());
        }
        ServerEvent::InputAudioBufferSpeechStopped(e) => {
            tracing::debug!("speech stopped at {}ms", e.audio_end_ms());
        }
        ServerEvent::InputAudioTranscriptionCompleted(e) => {
            tracing::info!("user: {}", e.transcript());
        }
        ServerEvent::InputAudioTranscriptionFailed(e) => {
            tracing::warn!("transcription failed for {}: {}", e.item_id(), e.error().message());
        }
        ServerEvent::ResponseAudioTranscriptDone(e) => {
            tracing::info!("assistant: {}", e.transcript());
        }
        ServerEvent::ResponseDone(e) => {
            tracing::debug!(
                "response done: id={}, status={}",
                e.response().id(),
                e.response().status().unwrap_or("unknown")
            );
        }
        ServerEvent::RateLimitsUpdated(e) => {
            for limit in e.rate_limits() {
                tracing::debug!("rate limit {}: {} remaining", limit.name(), limit.remaining());
            }
        }
        ServerEvent::Unrecognized(e) => {
            tracing::debug!("unrecognized event: {}", e.event_type());
        }
        other => tracing::trace!("received {}", other.event_type()),
    }
}
