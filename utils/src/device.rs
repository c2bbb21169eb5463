use anyhow::{anyhow, Context};
use cpal::traits::{DeviceTrait, HostTrait};
use cpal::Device;

fn get_host() -> cpal::Host {
    cpal::default_host()
}

/// Finds the input device by name, or the host default when no name is given.
pub fn get_or_default_input(device_name: Option<&str>) -> anyhow::Result<Device> {
    let host = get_host();
    tracing::debug!("Host: {:?}", host.id());
    match device_name {
        None => host
            .default_input_device()
            .ok_or_else(|| anyhow!("no default input device")),
        Some(target) => host
            .input_devices()
            .context("failed to enumerate input devices")?
            .find(|d| d.name().is_ok_and(|name| name == target))
            .ok_or_else(|| anyhow!("no input device named {target:?}")),
    }
}

pub fn get_or_default_output(device_name: Option<&str>) -> anyhow::Result<Device> {
    let host = get_host();
    match device_name {
        None => host
            .default_output_device()
            .ok_or_else(|| anyhow!("no default output device")),
        Some(target) => host
            .output_devices()
            .context("failed to enumerate output devices")?
            .find(|d| d.name().is_ok_and(|name| name == target))
            .ok_or_else(|| anyhow!("no output device named {target:?}")),
    }
}

/// One line per input device, e.g. ` * USB Mic(1ch, 48000hz) [default]`.
pub fn get_available_inputs() -> anyhow::Result<String> {
    let host = get_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    let mut lines = Vec::new();
    for device in host.input_devices()? {
        let Ok(name) = device.name() else { continue };
        let Ok(config) = device.default_input_config() else { continue };
        lines.push(describe(&name, config.channels(), config.sample_rate().0, default_name.as_deref()));
    }
    Ok(lines.join("\n"))
}

pub fn get_available_outputs() -> anyhow::Result<String> {
    let host = get_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());
    let mut lines = Vec::new();
    for device in host.output_devices()? {
        let Ok(name) = device.name() else { continue };
        let Ok(config) = device.default_output_config() else { continue };
        lines.push(describe(&name, config.channels(), config.sample_rate().0, default_name.as_deref()));
    }
    Ok(lines.join("\n"))
}

fn describe(name: &str, channels: u16, sample_rate: u32, default_name: Option<&str>) -> String {
    let mut line = format!(" * {}({}ch, {}hz)", name, channels, sample_rate);
    if default_name == Some(name) {
        line.push_str(" [default]");
    }
    line
}
