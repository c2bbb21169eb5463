//! WebRTC backend on the `webrtc` crate, with PCMU audio through `cpal`.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use bytes::Bytes;
use realtime_call_utils::audio::{self, PCMU_FRAME_SAMPLES, PCMU_SAMPLE_RATE};
use realtime_call_utils::capture::{start_capture, Capture};
use realtime_call_utils::playback::{start_playback, Playback};
use rubato::Resampler;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_PCMU};
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use super::{AudioSink, DataChannel, EventTx, PeerConnection, RtcBackend, TransportEvent};

const STUN_SERVER: &str = "stun:stun.l.google.com:19302";
const FRAME_QUEUE: usize = 64;
const PCMU_PAYLOAD_TYPE: u8 = 0;
const PACKET_DURATION: Duration = Duration::from_millis(20);

fn pcmu_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_PCMU.to_owned(),
        clock_rate: PCMU_SAMPLE_RATE,
        channels: 1,
        sdp_fmtp_line: String::new(),
        rtcp_feedback: vec![],
    }
}

/// Opens the default (or named) microphone and creates peers with one PCMU track.
#[derive(Debug, Clone, Default)]
pub struct WebRtcBackend {
    input_device: Option<String>,
    ice_servers: Vec<String>,
}

impl WebRtcBackend {
    pub fn new() -> Self {
        Self {
            input_device: None,
            ice_servers: vec![STUN_SERVER.to_string()],
        }
    }

    pub fn with_input_device(mut self, name: &str) -> Self {
        self.input_device = Some(name.to_string());
        self
    }

    pub fn with_ice_servers(mut self, urls: Vec<String>) -> Self {
        self.ice_servers = urls;
        self
    }
}

/// Microphone audio encoded to PCMU. Capture stops when this is dropped.
pub struct MicrophoneTrack {
    track: Arc<TrackLocalStaticSample>,
    _capture: Capture,
    encoder: JoinHandle<()>,
}

impl Drop for MicrophoneTrack {
    fn drop(&mut self) {
        self.encoder.abort();
    }
}

#[async_trait]
impl RtcBackend for WebRtcBackend {
    type Track = MicrophoneTrack;
    type Peer = WebRtcPeer;

    async fn capture_microphone(&self) -> anyhow::Result<Vec<MicrophoneTrack>> {
        let (frames_tx, mut frames_rx) = mpsc::channel::<Vec<f32>>(FRAME_QUEUE);
        let capture = start_capture(self.input_device.clone(), frames_tx).await?;
        let format = capture.format();
        let channels = format.channels as usize;
        let mut resampler =
            audio::create_resampler(format.sample_rate as f64, PCMU_SAMPLE_RATE as f64, PCMU_FRAME_SAMPLES)?;

        let track = Arc::new(TrackLocalStaticSample::new(
            pcmu_capability(),
            "audio".to_owned(),
            "realtime-call".to_owned(),
        ));

        let encoder = tokio::spawn({
            let track = track.clone();
            async move {
                let mut pending: Vec<f32> = Vec::new();
                let mut resampled: Vec<f32> = Vec::new();
                while let Some(frame) = frames_rx.recv().await {
                    pending.extend(audio::downmix(&frame, channels));
                    let chunk_size = resampler.input_frames_next();
                    while pending.len() >= chunk_size {
                        let chunk: Vec<f32> = pending.drain(..chunk_size).collect();
                        match resampler.process(&[chunk.as_slice()], None) {
                            Ok(out) => {
                                if let Some(out) = out.first() {
                                    resampled.extend_from_slice(out);
                                }
                            }
                            Err(e) => tracing::error!("failed to resample microphone audio: {}", e),
                        }
                    }
                    while resampled.len() >= PCMU_FRAME_SAMPLES {
                        let samples: Vec<f32> = resampled.drain(..PCMU_FRAME_SAMPLES).collect();
                        let sample = Sample {
                            data: Bytes::from(audio::encode_ulaw(&samples)),
                            duration: PACKET_DURATION,
                            ..Default::default()
                        };
                        if let Err(e) = track.write_sample(&sample).await {
                            tracing::trace!("failed to write microphone sample: {}", e);
                        }
                    }
                }
                tracing::debug!("microphone encoder stopped");
            }
        });

        Ok(vec![MicrophoneTrack {
            track,
            _capture: capture,
            encoder,
        }])
    }

    async fn create_peer(&self, events: EventTx, sink: Arc<dyn AudioSink>) -> anyhow::Result<WebRtcPeer> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_codec(
            RTCRtpCodecParameters {
                capability: pcmu_capability(),
                payload_type: PCMU_PAYLOAD_TYPE,
                ..Default::default()
            },
            RTPCodecType::Audio,
        )?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: self
                .ice_servers
                .iter()
                .map(|url| RTCIceServer {
                    urls: vec![url.clone()],
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };
        let pc = Arc::new(api.new_peer_connection(rtc_config).await?);

        let tx = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |state| {
            let _ = tx.send(TransportEvent::ConnectionState(state.to_string()));
            Box::pin(async {})
        }));

        let tx = events.clone();
        pc.on_ice_connection_state_change(Box::new(move |state| {
            let _ = tx.send(TransportEvent::IceConnectionState(state.to_string()));
            Box::pin(async {})
        }));

        let tx = events.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let kind = track.kind().to_string();
            let _ = tx.send(TransportEvent::RemoteTrack { kind: kind.clone() });
            let sink = sink.clone();
            Box::pin(async move {
                if track.kind() == RTPCodecType::Audio {
                    sink.attach(&kind);
                    tokio::spawn(play_remote_track(track, sink));
                }
            })
        }));

        Ok(WebRtcPeer {
            pc,
            events,
            tracks: Mutex::new(Vec::new()),
        })
    }
}

async fn play_remote_track(track: Arc<TrackRemote>, sink: Arc<dyn AudioSink>) {
    let codec = track.codec();
    tracing::info!(
        "remote audio: {}, {}hz",
        codec.capability.mime_type,
        codec.capability.clock_rate
    );
    loop {
        match track.read_rtp().await {
            Ok((packet, _)) => {
                if packet.payload.is_empty() {
                    continue;
                }
                sink.write(PCMU_SAMPLE_RATE, &audio::decode_ulaw(&packet.payload));
            }
            Err(e) => {
                tracing::debug!("remote track ended: {}", e);
                break;
            }
        }
    }
}

pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    events: EventTx,
    tracks: Mutex<Vec<MicrophoneTrack>>,
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    type Track = MicrophoneTrack;
    type Channel = WebRtcChannel;

    async fn add_track(&self, track: MicrophoneTrack) -> anyhow::Result<()> {
        let sender = self
            .pc
            .add_track(track.track.clone() as Arc<dyn TrackLocal + Send + Sync>)
            .await?;
        // RTCP has to be drained for the interceptors to run.
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });
        self.tracks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(track);
        Ok(())
    }

    async fn create_data_channel(&self, label: &str) -> anyhow::Result<WebRtcChannel> {
        let dc = self.pc.create_data_channel(label, None).await?;

        let tx = self.events.clone();
        dc.on_open(Box::new(move || {
            let _ = tx.send(TransportEvent::ChannelOpen);
            Box::pin(async {})
        }));

        let tx = self.events.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            match String::from_utf8(msg.data.to_vec()) {
                Ok(text) => {
                    let _ = tx.send(TransportEvent::ChannelMessage(text));
                }
                Err(e) => tracing::warn!("dropping non-utf8 control message: {}", e),
            }
            Box::pin(async {})
        }));

        let tx = self.events.clone();
        dc.on_error(Box::new(move |err| {
            let _ = tx.send(TransportEvent::ChannelError(err.to_string()));
            Box::pin(async {})
        }));

        let tx = self.events.clone();
        dc.on_close(Box::new(move || {
            let _ = tx.send(TransportEvent::ChannelClosed);
            Box::pin(async {})
        }));

        Ok(WebRtcChannel { dc })
    }

    async fn create_local_offer(&self) -> anyhow::Result<String> {
        let offer = self.pc.create_offer(None).await?;
        let mut gathered = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(offer).await?;
        let _ = gathered.recv().await;

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| anyhow!("no local description after ice gathering"))?;
        Ok(local.sdp)
    }

    async fn apply_remote_answer(&self, sdp: String) -> anyhow::Result<()> {
        let answer = RTCSessionDescription::answer(sdp).context("invalid answer sdp")?;
        self.pc.set_remote_description(answer).await?;
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.tracks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.pc.close().await?;
        Ok(())
    }
}

pub struct WebRtcChannel {
    dc: Arc<RTCDataChannel>,
}

#[async_trait]
impl DataChannel for WebRtcChannel {
    async fn send_text(&self, text: String) -> anyhow::Result<()> {
        self.dc.send_text(text).await?;
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.dc.close().await?;
        Ok(())
    }
}

/// Plays remote audio on the default (or named) speaker.
pub struct SpeakerSink {
    playback: Mutex<Playback>,
    attached: Mutex<bool>,
}

impl SpeakerSink {
    pub async fn open(device_name: Option<String>) -> anyhow::Result<Self> {
        let playback = start_playback(device_name, PCMU_SAMPLE_RATE).await?;
        Ok(Self {
            playback: Mutex::new(playback),
            attached: Mutex::new(false),
        })
    }

    fn set_attached(&self, attached: bool) {
        *self.attached.lock().unwrap_or_else(PoisonError::into_inner) = attached;
    }
}

impl AudioSink for SpeakerSink {
    fn attach(&self, kind: &str) {
        tracing::debug!("speaker attached to remote {} track", kind);
        self.set_attached(true);
    }

    fn write(&self, sample_rate: u32, samples: &[f32]) {
        if !*self.attached.lock().unwrap_or_else(PoisonError::into_inner) {
            return;
        }
        if sample_rate != PCMU_SAMPLE_RATE {
            tracing::warn!("dropping remote audio at unexpected rate {}hz", sample_rate);
            return;
        }
        self.playback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .write(samples);
    }

    fn detach(&self) {
        self.set_attached(false);
        tracing::debug!("speaker detached");
    }
}
