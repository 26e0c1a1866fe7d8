//! Compute device selection.

use std::fmt;
use std::str::FromStr;

use candle_core::Device;

use crate::error::EmbeddingError;

/// Upper bound on accelerator ordinals checked during discovery.
const MAX_PROBED_ORDINALS: usize = 16;

/// A device named in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSpec {
    Cpu,
    Cuda(usize),
    Metal(usize),
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => f.write_str("cpu"),
            Self::Cuda(ordinal) => write!(f, "cuda:{ordinal}"),
            Self::Metal(ordinal) => write!(f, "metal:{ordinal}"),
        }
    }
}

impl FromStr for DeviceSpec {
    type Err = EmbeddingError;

    /// Accepts `cpu`, `cuda`, `cuda:N`, `metal`, `metal:N` and `mps`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        let (kind, ordinal) = match lowered.split_once(':') {
            Some((kind, ordinal)) => {
                let ordinal = ordinal
                    .parse::<usize>()
                    .map_err(|_| {
                        EmbeddingError::Device(format!("invalid device ordinal in '{s}'"))
                    })?;
                (kind, ordinal)
            }
            None => (lowered.as_str(), 0),
        };
        match kind {
            "cpu" if ordinal == 0 => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda(ordinal)),
            "metal" | "mps" => Ok(Self::Metal(ordinal)),
            _ => Err(EmbeddingError::Device(format!(
                "unknown device '{s}', expected cpu, cuda[:N] or metal[:N]"
            ))),
        }
    }
}

impl DeviceSpec {
    pub fn open(self) -> Result<Device, EmbeddingError> {
        match self {
            Self::Cpu => Ok(Device::Cpu),
            Self::Cuda(ordinal) => Device::new_cuda(ordinal)
                .map_err(|e| EmbeddingError::Device(format!("opening {self}: {e}"))),
            Self::Metal(ordinal) => Device::new_metal(ordinal)
                .map_err(|e| EmbeddingError::Device(format!("opening {self}: {e}"))),
        }
    }
}

pub fn parse_device(name: &str) -> Result<DeviceSpec, EmbeddingError> {
    name.parse()
}

/// Resolves the devices models are placed on.
///
/// An explicit list is opened as given. Without one, every visible CUDA
/// device is used, then the first Metal device, then the CPU.
pub fn resolve_devices(requested: Option<&[String]>) -> Result<Vec<Device>, EmbeddingError> {
    if let Some(names) = requested {
        if names.is_empty() {
            return Err(EmbeddingError::Device("device list must not be empty".into()));
        }
        return names.iter().map(|name| parse_device(name)?.open()).collect();
    }

    if candle_core::utils::cuda_is_available() {
        let devices: Vec<Device> = (0..MAX_PROBED_ORDINALS)
            .map_while(|ordinal| Device::new_cuda(ordinal).ok())
            .collect();
        if !devices.is_empty() {
            tracing::debug!(count = devices.len(), "using visible CUDA devices");
            return Ok(devices);
        }
    }
    if candle_core::utils::metal_is_available() {
        if let Ok(device) = Device::new_metal(0) {
            tracing::debug!("using metal device");
            return Ok(vec![device]);
        }
    }
    tracing::debug!("no accelerator visible, using cpu");
    Ok(vec![Device::Cpu])
}
