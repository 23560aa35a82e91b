use serde::{Deserialize, Serialize};

/// Which way audio flows through a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceDirection {
    Capture,
    Playback,
}

/// An audio endpoint as reported by a backend's enumerator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Name accepted by the backend's `open`.
    pub name: String,
    pub direction: DeviceDirection,
    pub is_default: bool,
    /// Default sample rate, if the backend reports one.
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
}
