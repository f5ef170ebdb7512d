//! Compute-device selection.
//!
//! Resolution happens once, before the engine is built; the engine itself
//! only ever sees a concrete `candle_core::Device`.

use candle_core::Device;
use serde::{Deserialize, Serialize};

use crate::types::{GeometryError, Result};

/// Which device the point coordinates live on.
///
/// Serialised as `"auto"`, `"cpu"`, `{ "cuda": 0 }` or `{ "metal": 0 }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceSelector {
    /// First CUDA device if available, else first Metal device, else CPU.
    #[default]
    Auto,
    Cpu,
    Cuda(usize),
    Metal(usize),
}

impl DeviceSelector {
    /// Turn the selector into a device handle.
    ///
    /// Explicit accelerator requests fail with [`GeometryError::Device`]
    /// when the backend is missing from this build or the ordinal does not
    /// exist; `Auto` never fails for that reason and falls back to the CPU.
    pub fn resolve(&self) -> Result<Device> {
        match *self {
            Self::Auto => auto_device(),
            Self::Cpu => Ok(Device::Cpu),
            Self::Cuda(ordinal) => Device::new_cuda(ordinal)
                .map_err(|e| GeometryError::Device(format!("cuda:{ordinal}: {e}"))),
            Self::Metal(ordinal) => Device::new_metal(ordinal)
                .map_err(|e| GeometryError::Device(format!("metal:{ordinal}: {e}"))),
        }
    }
}

fn auto_device() -> Result<Device> {
    let device = Device::cuda_if_available(0)?;
    if device.is_cuda() {
        return Ok(device);
    }
    if candle_core::utils::metal_is_available() {
        return Ok(Device::new_metal(0)?);
    }
    Ok(Device::Cpu)
}

/// Short human-readable device label for logs.
pub fn describe(device: &Device) -> String {
    format!("{:?}", device.location())
}
