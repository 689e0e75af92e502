use std::{fmt, path::Path};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeDevice {
    Cuda,
    Metal,
    Cpu,
}

impl fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComputeDevice::Cuda => "cuda",
            ComputeDevice::Metal => "metal",
            ComputeDevice::Cpu => "cpu",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePreference {
    Auto,
    Force(ComputeDevice),
}

impl DevicePreference {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("cuda") | Some("gpu") => DevicePreference::Force(ComputeDevice::Cuda),
            Some("metal") | Some("mps") => DevicePreference::Force(ComputeDevice::Metal),
            Some("cpu") => DevicePreference::Force(ComputeDevice::Cpu),
            _ => DevicePreference::Auto,
        }
    }
}

/// Picks the fastest accelerator present on this host: CUDA, then Metal,
/// then CPU.
pub fn select_device(pref: DevicePreference) -> ComputeDevice {
    match pref {
        DevicePreference::Force(device) => device,
        DevicePreference::Auto => {
            if cuda_available() {
                ComputeDevice::Cuda
            } else if metal_available() {
                ComputeDevice::Metal
            } else {
                ComputeDevice::Cpu
            }
        }
    }
}

fn cuda_available() -> bool {
    if let Ok(visible) = std::env::var("NVIDIA_VISIBLE_DEVICES") {
        let visible = visible.trim();
        if visible.is_empty() || visible == "void" || visible == "none" {
            return false;
        }
    }
    Path::new("/dev/nvidiactl").exists()
}

fn metal_available() -> bool {
    cfg!(all(target_os = "macos", target_arch = "aarch64"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forced_device_wins() {
        assert_eq!(
            select_device(DevicePreference::parse(Some("CPU"))),
            ComputeDevice::Cpu
        );
        assert_eq!(
            select_device(DevicePreference::parse(Some("mps"))),
            ComputeDevice::Metal
        );
        assert_eq!(DevicePreference::parse(Some("tpu")), DevicePreference::Auto);
        assert_eq!(DevicePreference::parse(None), DevicePreference::Auto);
    }
}
