//! # Device Selection
//!
//! Picks the candle compute device for the speech recognizer from the
//! configured preference, falling back to CPU when an accelerator is missing.

use candle_core::Device;
use tracing::{debug, info, warn};

/// Device preferences for model inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    /// Best available device: CUDA, then Metal, then CPU
    #[default]
    Auto,
    Cpu,
    /// CUDA GPU, CPU if unavailable
    Cuda,
    /// Metal GPU, CPU if unavailable
    Metal,
}

impl std::str::FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" | "automatic" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda),
            "metal" | "mps" => Ok(DevicePreference::Metal),
            _ => Err(format!("Unknown device preference: {}", s)),
        }
    }
}

/// Resolve a preference into a usable device.
pub fn select_device(preference: DevicePreference) -> Device {
    let device = match preference {
        DevicePreference::Cpu => Device::Cpu,
        DevicePreference::Cuda => cuda_device().unwrap_or(Device::Cpu),
        DevicePreference::Metal => metal_device().unwrap_or(Device::Cpu),
        DevicePreference::Auto => cuda_device().or_else(metal_device).unwrap_or(Device::Cpu),
    };
    info!(requested = ?preference, selected = device_label(&device), "Compute device selected");
    device
}

/// Parse a textual preference, treating unknown values as `auto`.
pub fn device_from_config(value: &str) -> Device {
    match value.parse::<DevicePreference>() {
        Ok(preference) => select_device(preference),
        Err(e) => {
            warn!("{}, using auto", e);
            select_device(DevicePreference::Auto)
        }
    }
}

/// Short label reported to clients ("cpu", "cuda", "metal").
pub fn device_label(device: &Device) -> &'static str {
    match device {
        Device::Cpu => "cpu",
        Device::Cuda(_) => "cuda",
        Device::Metal(_) => "metal",
    }
}

fn cuda_device() -> Option<Device> {
    match Device::new_cuda(0) {
        Ok(device) => Some(device),
        Err(e) => {
            debug!("CUDA not available: {}", e);
            None
        }
    }
}

fn metal_device() -> Option<Device> {
    match Device::new_metal(0) {
        Ok(device) => Some(device),
        Err(e) => {
            debug!("Metal not available: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_preference_parsing() {
        assert_eq!("auto".parse::<DevicePreference>().unwrap(), DevicePreference::Auto);
        assert_eq!("CPU".parse::<DevicePreference>().unwrap(), DevicePreference::Cpu);
        assert_eq!("gpu".parse::<DevicePreference>().unwrap(), DevicePreference::Cuda);
        assert_eq!("metal".parse::<DevicePreference>().unwrap(), DevicePreference::Metal);
        assert!("tpu".parse::<DevicePreference>().is_err());
    }

    #[test]
    fn test_cpu_preference_is_always_cpu() {
        let device = select_device(DevicePreference::Cpu);
        assert_eq!(device_label(&device), "cpu");
    }

    #[test]
    fn test_auto_always_yields_a_device() {
        let device = device_from_config("not-a-device");
        assert!(!device_label(&device).is_empty());
    }
}
