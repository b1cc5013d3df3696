//! cpal-backed input device enumeration. Lists the usable devices with the
//! OS default first and resolves stored selections back to concrete
//! handles for a capture stage.

use std::collections::HashSet;

use async_trait::async_trait;
use cpal::SampleFormat;
use cpal::traits::{DeviceTrait, HostTrait};
use sotto_core::{Device, is_reserved_id};
use sotto_devices::{DeviceError, DeviceProvider, Result};
use tracing::{debug, warn};

/// Enumerates input devices through the host's default audio backend.
///
/// The backend identifies devices by name, which serves as both id and
/// label here.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalDeviceProvider;

impl CpalDeviceProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DeviceProvider for CpalDeviceProvider {
    async fn enumerate(&self) -> Result<Vec<Device>> {
        tokio::task::spawn_blocking(|| {
            let host = cpal::default_host();
            list_input_devices(&host)
        })
        .await
        .map_err(|e| DeviceError::Enumeration(e.to_string()))
    }

    fn name(&self) -> &str {
        "cpal"
    }
}

/// What a stored selection would actually open: the concrete device name
/// and its default input format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInput {
    pub name: String,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Maps a stored selection back to a concrete input device by name. The
/// reserved ids resolve to the OS default input device.
pub fn resolve_input_device(id: &str) -> Option<cpal::Device> {
    let host = cpal::default_host();
    if is_reserved_id(id) {
        return host.default_input_device();
    }

    host.input_devices()
        .ok()?
        .find(|device| device_name(device).as_deref() == Some(id))
}

/// Resolves `id` and reports the device cpal would capture from, if any.
pub fn probe_input_device(id: &str) -> Option<ResolvedInput> {
    let device = resolve_input_device(id)?;
    let name = device_name(&device)?;
    let config = device.default_input_config().ok()?;
    Some(ResolvedInput {
        name,
        sample_rate: config.sample_rate().0,
        channels: config.channels(),
    })
}

/// Lists the valid input devices, OS default first. Unnamed devices are
/// skipped and repeated names collapse to their first occurrence.
fn list_input_devices(host: &cpal::Host) -> Vec<Device> {
    let default_name = default_input_name(host);

    let devices = match host.input_devices() {
        Ok(devices) => devices,
        Err(e) => {
            warn!(error = %e, "Input device enumeration failed, trying default device only");
            return host
                .default_input_device()
                .filter(is_valid_input_device)
                .and_then(|device| device_name(&device))
                .map(|name| vec![Device::new(&name, &name)])
                .unwrap_or_default();
        }
    };

    let mut listed = Vec::new();
    let mut seen = HashSet::new();
    for device in devices {
        if !is_valid_input_device(&device) {
            continue;
        }
        let Some(name) = device_name(&device) else {
            continue;
        };
        if !seen.insert(name.clone()) {
            continue;
        }
        listed.push(Device::new(&name, &name));
    }

    promote_default(&mut listed, default_name.as_deref());
    debug!(count = listed.len(), "Enumerated input devices");
    listed
}

/// A device counts as usable input when some supported configuration has
/// at least one channel and a capture-friendly sample format. The default
/// config is checked first; the full range list only when that lookup
/// fails.
fn is_valid_input_device(device: &cpal::Device) -> bool {
    if let Ok(config) = device.default_input_config() {
        return config.channels() >= 1 && is_supported_sample_format(config.sample_format());
    }

    match device.supported_input_configs() {
        Ok(mut configs) => configs.any(|config| {
            config.channels() >= 1 && is_supported_sample_format(config.sample_format())
        }),
        Err(_) => false,
    }
}

fn is_supported_sample_format(format: SampleFormat) -> bool {
    matches!(
        format,
        SampleFormat::I16
            | SampleFormat::F32
            | SampleFormat::I32
            | SampleFormat::U16
            | SampleFormat::U8
    )
}

fn device_name(device: &cpal::Device) -> Option<String> {
    let name = device.name().ok()?;
    let name = name.trim();
    (!name.is_empty()).then(|| name.to_string())
}

fn default_input_name(host: &cpal::Host) -> Option<String> {
    host.default_input_device()
        .and_then(|device| device_name(&device))
}

fn promote_default(listed: &mut Vec<Device>, default_name: Option<&str>) {
    if let Some(default) = default_name {
        if let Some(pos) = listed.iter().position(|d| d.id == default) {
            let device = listed.remove(pos);
            listed.insert(0, device);
        }
    }
}
