//! Audio device enumeration via the cpal host.
//!
//! Lists input (capture) and output (playback) endpoints with their
//! default stream parameters. Names returned here are what
//! `CpalCaptureBackend::open` accepts.

use cpal::traits::{DeviceTrait, HostTrait};

use media_io_core::models::device::{DeviceDirection, DeviceInfo};
use media_io_core::models::error::MediaError;

/// Audio device enumerator over the default cpal host.
pub struct DeviceEnumerator {
    host: cpal::Host,
}

impl DeviceEnumerator {
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
        }
    }

    /// List capture devices, default first, then by name.
    pub fn list_capture_devices(&self) -> Result<Vec<DeviceInfo>, MediaError> {
        let default_name = self.host.default_input_device().and_then(|d| d.name().ok());
        let devices = self
            .host
            .input_devices()
            .map_err(|e| MediaError::DeviceNotAvailable(format!("failed to enumerate input devices: {}", e)))?;

        let infos = devices
            .filter_map(|device| {
                let name = device.name().ok()?;
                let config = device.default_input_config().ok();
                Some(DeviceInfo {
                    is_default: default_name.as_ref() == Some(&name),
                    name,
                    direction: DeviceDirection::Capture,
                    sample_rate: config.as_ref().map(|c| c.sample_rate().0),
                    channels: config.as_ref().map(|c| c.channels()),
                })
            })
            .collect();
        Ok(sorted(infos))
    }

    /// List playback devices, default first, then by name.
    pub fn list_playback_devices(&self) -> Result<Vec<DeviceInfo>, MediaError> {
        let default_name = self.host.default_output_device().and_then(|d| d.name().ok());
        let devices = self
            .host
            .output_devices()
            .map_err(|e| MediaError::DeviceNotAvailable(format!("failed to enumerate output devices: {}", e)))?;

        let infos = devices
            .filter_map(|device| {
                let name = device.name().ok()?;
                let config = device.default_output_config().ok();
                Some(DeviceInfo {
                    is_default: default_name.as_ref() == Some(&name),
                    name,
                    direction: DeviceDirection::Playback,
                    sample_rate: config.as_ref().map(|c| c.sample_rate().0),
                    channels: config.as_ref().map(|c| c.channels()),
                })
            })
            .collect();
        Ok(sorted(infos))
    }

    /// Name of the default capture device.
    pub fn default_capture_device_name(&self) -> Result<String, MediaError> {
        let device = self
            .host
            .default_input_device()
            .ok_or_else(|| MediaError::DeviceNotAvailable("no default input device".into()))?;
        device
            .name()
            .map_err(|e| MediaError::DeviceNotAvailable(format!("failed to read device name: {}", e)))
    }
}

impl Default for DeviceEnumerator {
    fn default() -> Self {
        Self::new()
    }
}

fn sorted(mut devices: Vec<DeviceInfo>) -> Vec<DeviceInfo> {
    devices.sort_by(|a, b| b.is_default.cmp(&a.is_default).then_with(|| a.name.cmp(&b.name)));
    devices
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str, is_default: bool) -> DeviceInfo {
        DeviceInfo {
            name: name.into(),
            direction: DeviceDirection::Capture,
            is_default,
            sample_rate: Some(48000),
            channels: Some(1),
        }
    }

    #[test]
    fn default_sorts_first_then_by_name() {
        let devices = sorted(vec![info("b", false), info("c", true), info("a", false)]);
        let names: Vec<_> = devices.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[test]
    fn enumeration_tags_direction() {
        // Hosts without audio hardware may fail to enumerate at all.
        let enumerator = DeviceEnumerator::new();
        if let Ok(devices) = enumerator.list_capture_devices() {
            assert!(devices.iter().all(|d| d.direction == DeviceDirection::Capture));
            assert!(devices.iter().filter(|d| d.is_default).count() <= 1);
        }
        if let Ok(devices) = enumerator.list_playback_devices() {
            assert!(devices.iter().all(|d| d.direction == DeviceDirection::Playback));
        }
    }
}
