//! Audio output device enumeration and selection.

use serde::{Deserialize, Serialize};

/// Metadata about an audio output device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    /// Whether this is the system default output device.
    pub is_default: bool,
}

/// Index of the device to open: exact name match first, then the default,
/// then the first listed. `None` when the list is empty.
pub fn pick_output(devices: &[DeviceInfo], preferred: Option<&str>) -> Option<usize> {
    if let Some(wanted) = preferred {
        if let Some(idx) = devices.iter().position(|d| d.name == wanted) {
            return Some(idx);
        }
        tracing::warn!("preferred output device '{wanted}' not found, falling back");
    }
    devices
        .iter()
        .position(|d| d.is_default)
        .or_else(|| (!devices.is_empty()).then_some(0))
}

/// List all available audio output devices on the system, default first.
///
/// Returns an empty `Vec` if cpal is not available or no devices exist.
#[cfg(feature = "audio-cpal")]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    match host.output_devices() {
        Ok(devices) => {
            let mut list = devices
                .enumerate()
                .map(|(idx, device)| {
                    let name = device
                        .name()
                        .unwrap_or_else(|_| format!("Output Device {}", idx + 1));
                    let is_default = default_name.as_deref() == Some(name.as_str());
                    DeviceInfo { name, is_default }
                })
                .collect::<Vec<_>>();
            list.sort_by_key(|d| (!d.is_default, d.name.to_ascii_lowercase()));
            list
        }
        Err(e) => {
            tracing::warn!("failed to enumerate output devices: {e}");
            default_name
                .map(|name| vec![DeviceInfo { name, is_default: true }])
                .unwrap_or_default()
        }
    }
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    vec![]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn devices() -> Vec<DeviceInfo> {
        vec![
            DeviceInfo {
                name: "HDMI Output".into(),
                is_default: false,
            },
            DeviceInfo {
                name: "Speakers".into(),
                is_default: true,
            },
        ]
    }

    #[test]
    fn preferred_name_wins() {
        assert_eq!(pick_output(&devices(), Some("HDMI Output")), Some(0));
    }

    #[test]
    fn unknown_preference_falls_back_to_default() {
        assert_eq!(pick_output(&devices(), Some("Bluetooth")), Some(1));
        assert_eq!(pick_output(&devices(), None), Some(1));
    }

    #[test]
    fn no_default_uses_first_device() {
        let mut list = devices();
        list[1].is_default = false;
        assert_eq!(pick_output(&list, None), Some(0));
        assert_eq!(pick_output(&[], None), None);
    }
}
