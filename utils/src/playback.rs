use std::sync::mpsc as std_mpsc;

use anyhow::{anyhow, Context};
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd};
use rubato::{FastFixedIn, Resampler};
use tokio::sync::oneshot;

use crate::{audio, device};

const OUTPUT_LATENCY_MS: usize = 1000;
const RESAMPLER_CHUNK: usize = 160;

/// Speaker output fed with mono samples at a fixed input rate.
///
/// Like [`crate::capture::Capture`], the `cpal` stream stays on its own thread and
/// stops when this handle is dropped.
pub struct Playback {
    producer: HeapProd<f32>,
    resampler: FastFixedIn<f32>,
    pending: Vec<f32>,
    stop: Option<std_mpsc::Sender<()>>,
}

impl Playback {
    /// Resamples and queues `samples`; whatever does not fit in the buffer is dropped.
    pub fn write(&mut self, samples: &[f32]) {
        self.pending.extend_from_slice(samples);
        let chunk_size = self.resampler.input_frames_next();
        while self.pending.len() >= chunk_size {
            let chunk: Vec<f32> = self.pending.drain(..chunk_size).collect();
            match self.resampler.process(&[chunk.as_slice()], None) {
                Ok(resampled) => {
                    if let Some(resampled) = resampled.first() {
                        let pushed = self.producer.push_slice(resampled);
                        if pushed < resampled.len() {
                            tracing::trace!("playback buffer full, dropped {} samples", resampled.len() - pushed);
                        }
                    }
                }
                Err(e) => tracing::error!("failed to resample output audio: {}", e),
            }
        }
    }
}

impl Drop for Playback {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        tracing::debug!("speaker playback stopped");
    }
}

pub async fn start_playback(device_name: Option<String>, input_sample_rate: u32) -> anyhow::Result<Playback> {
    let (ready_tx, ready_rx) = oneshot::channel::<anyhow::Result<(HeapProd<f32>, u32)>>();
    let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

    std::thread::Builder::new()
        .name("speaker-playback".to_string())
        .spawn(move || {
            let stream = match open_output_stream(device_name.as_deref()) {
                Ok((stream, producer, rate)) => {
                    let _ = ready_tx.send(Ok((producer, rate)));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let _ = stop_rx.recv();
            drop(stream);
        })
        .context("failed to spawn playback thread")?;

    let (producer, output_rate) = ready_rx
        .await
        .map_err(|_| anyhow!("playback thread exited before the speaker opened"))??;
    let resampler = audio::create_resampler(input_sample_rate as f64, output_rate as f64, RESAMPLER_CHUNK)?;

    Ok(Playback {
        producer,
        resampler,
        pending: Vec::with_capacity(RESAMPLER_CHUNK * 2),
        stop: Some(stop_tx),
    })
}

fn open_output_stream(device_name: Option<&str>) -> anyhow::Result<(cpal::Stream, HeapProd<f32>, u32)> {
    let output = device::get_or_default_output(device_name)?;
    let default_config = output
        .default_output_config()
        .context("failed to get default output config")?;
    let config = StreamConfig {
        channels: default_config.channels(),
        sample_rate: default_config.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };
    let channel_count = config.channels as usize;
    let sample_rate = config.sample_rate.0;
    tracing::debug!("output: device={:?}, config={:?}", output.name().ok(), &config);

    let buffer = audio::shared_buffer(sample_rate as usize * OUTPUT_LATENCY_MS / 1000);
    let (producer, mut consumer): (HeapProd<f32>, HeapCons<f32>) = buffer.split();

    let stream = output
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(channel_count) {
                    let sample = consumer.try_pop().unwrap_or(0.0);
                    frame.fill(sample);
                }
            },
            move |err| tracing::error!("an error occurred on output stream: {}", err),
            None,
        )
        .context("failed to build output stream")?;
    stream.play().context("failed to start output stream")?;
    Ok((stream, producer, sample_rate))
}
