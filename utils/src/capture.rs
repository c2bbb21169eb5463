use std::sync::mpsc as std_mpsc;

use anyhow::{anyhow, Context};
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use tokio::sync::{mpsc, oneshot};

use crate::device;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// An open microphone. Capture stops when this is dropped.
///
/// `cpal` streams are not `Send`, so the stream lives on its own thread and
/// this handle only carries the stop signal.
pub struct Capture {
    format: CaptureFormat,
    stop: Option<std_mpsc::Sender<()>>,
}

impl Capture {
    pub fn format(&self) -> CaptureFormat {
        self.format
    }
}

impl Drop for Capture {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        tracing::debug!("microphone capture stopped");
    }
}

/// Opens the input device and streams interleaved f32 frames into `frames`.
///
/// Fails when there is no usable input device or the OS refuses access to it.
/// Frames are dropped, not queued, when `frames` is full.
pub async fn start_capture(device_name: Option<String>, frames: mpsc::Sender<Vec<f32>>) -> anyhow::Result<Capture> {
    let (ready_tx, ready_rx) = oneshot::channel::<anyhow::Result<CaptureFormat>>();
    let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

    std::thread::Builder::new()
        .name("mic-capture".to_string())
        .spawn(move || {
            let stream = match open_input_stream(device_name.as_deref(), frames) {
                Ok((stream, format)) => {
                    let _ = ready_tx.send(Ok(format));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            // Returns on an explicit stop or when the handle is dropped.
            let _ = stop_rx.recv();
            drop(stream);
        })
        .context("failed to spawn capture thread")?;

    let format = ready_rx
        .await
        .map_err(|_| anyhow!("capture thread exited before the microphone opened"))??;
    tracing::info!("microphone open: {}hz, {}ch", format.sample_rate, format.channels);

    Ok(Capture {
        format,
        stop: Some(stop_tx),
    })
}

fn open_input_stream(device_name: Option<&str>, frames: mpsc::Sender<Vec<f32>>) -> anyhow::Result<(cpal::Stream, CaptureFormat)> {
    let input = device::get_or_default_input(device_name)?;
    let default_config = input
        .default_input_config()
        .context("failed to get default input config")?;
    let config = StreamConfig {
        channels: default_config.channels(),
        sample_rate: default_config.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };
    let format = CaptureFormat {
        sample_rate: config.sample_rate.0,
        channels: config.channels,
    };
    tracing::debug!("input: device={:?}, config={:?}", input.name().ok(), &config);

    let stream = input
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if frames.try_send(data.to_vec()).is_err() {
                    tracing::trace!("capture buffer full, dropping {} samples", data.len());
                }
            },
            move |err| tracing::error!("an error occurred on input stream: {}", err),
            None,
        )
        .context("failed to build input stream")?;
    stream.play().context("failed to start input stream")?;
    Ok((stream, format))
}
