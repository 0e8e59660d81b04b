//! Acceleration manager -- wgpu GPU compute / multi-threaded CPU fallback.
//!
//! The accelerator transforms the whole filtered batch in one call and
//! returns one `u32` per record, in input order, together with the identity
//! of the device that ran it and the time the kernel took.

use std::time::Duration;

use thiserror::Error;

use crate::model::Record;

pub mod cpu;
pub mod gpu;
pub mod manager;
pub mod ops;

pub use manager::AccelerationManager;

#[derive(Debug, Error)]
pub enum AccelError {
    #[error("no compatible accelerator found: {reason}")]
    DeviceUnavailable { reason: String },

    #[error("accelerator computation failed:\n{log}")]
    ComputeFailure { log: String },
}

/// Which execution path produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Backend {
    /// wgpu compute shader on a hardware adapter
    Gpu,
    /// Scalar kernel fanned out over all CPU cores
    Parallel,
    /// Single-threaded scalar reference, used for verification
    Scalar,
}

/// Output of one accelerator run.
#[derive(Debug, Clone, PartialEq)]
pub struct AccelOutput {
    /// One value per input record, same order.
    pub values: Vec<u32>,
    /// Human-readable device identity, e.g. `Vulkan / AMD Radeon RX 6600`.
    pub device: String,
    pub elapsed: Duration,
}

impl AccelOutput {
    pub fn empty(device: impl Into<String>) -> Self {
        Self {
            values: Vec::new(),
            device: device.into(),
            elapsed: Duration::ZERO,
        }
    }
}

/// A bulk transform over the filtered batch.
///
/// Implementations block until the computation finishes; the coordinator
/// runs them on a blocking thread.
pub trait Accelerator: Send + Sync + 'static {
    fn run(&self, records: &[Record]) -> Result<AccelOutput, AccelError>;
}
