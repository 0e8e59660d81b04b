use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::accel::gpu::GpuBackend;
use crate::accel::ops::{ScoreInput, ScoreOp};
use crate::accel::{cpu, AccelError, AccelOutput, Accelerator, Backend};
use crate::config::{AccelConfig, BackendPreference};
use crate::model::Record;

/// Trait that every accelerated operation implements.
/// Each op carries a GPU path, a parallel CPU path and a scalar reference.
pub trait AcceleratedOp<Input, Output> {
    /// wgpu compute implementation
    fn run_gpu(&self, input: &Input, gpu: &GpuBackend) -> Result<Output, AccelError>;

    /// Multi-threaded CPU implementation
    fn run_parallel(&self, input: &Input) -> Result<Output, AccelError>;

    /// Scalar implementation (Reference)
    fn run_scalar(&self, input: &Input) -> Result<Output, AccelError>;
}

/// A backend ready to execute, with the identity it reports.
pub enum Device {
    Gpu(GpuBackend),
    Parallel { threads: usize },
}

impl Device {
    pub fn backend(&self) -> Backend {
        match self {
            Device::Gpu(_) => Backend::Gpu,
            Device::Parallel { .. } => Backend::Parallel,
        }
    }

    pub fn identity(&self) -> String {
        match self {
            Device::Gpu(gpu) => gpu.identity(),
            Device::Parallel { threads } => format!("CPU / {} threads", threads),
        }
    }
}

/// Selects a backend per the configured preference and runs the scoring op.
pub struct AccelerationManager {
    config: AccelConfig,
}

impl AccelerationManager {
    pub fn new(config: AccelConfig) -> Self {
        info!(
            backend = ?config.backend,
            rounds = config.rounds,
            max_items = config.max_items,
            "AccelerationManager configured"
        );
        Self { config }
    }

    pub fn config(&self) -> &AccelConfig {
        &self.config
    }

    /// Resolve the configured preference to a concrete device.
    ///
    /// Opening a GPU is done here, on the calling thread, so the caller
    /// decides which thread pays for device discovery.
    pub fn select_device(&self) -> Result<Device, AccelError> {
        match self.config.backend {
            BackendPreference::Gpu => GpuBackend::new().map(Device::Gpu),
            BackendPreference::Cpu => Ok(Device::Parallel {
                threads: cpu::thread_count(),
            }),
            BackendPreference::Auto => match GpuBackend::new() {
                Ok(gpu) => Ok(Device::Gpu(gpu)),
                Err(e) => {
                    warn!(error = %e, "no GPU available, falling back to CPU");
                    Ok(Device::Parallel {
                        threads: cpu::thread_count(),
                    })
                }
            },
        }
    }

    /// Execute an operation on `device`, returning the output and the time
    /// the backend took.
    /// Debug builds verify the result against the scalar reference; that
    /// check is not part of the returned time.
    pub fn execute<Op, Input, Output>(
        &self,
        op: &Op,
        input: &Input,
        device: &Device,
    ) -> Result<(Output, Duration), AccelError>
    where
        Op: AcceleratedOp<Input, Output>,
        Output: PartialEq + std::fmt::Debug,
    {
        let start = Instant::now();
        let result = match device {
            Device::Gpu(gpu) => op.run_gpu(input, gpu),
            Device::Parallel { .. } => op.run_parallel(input),
        }?;
        let elapsed = start.elapsed();

        #[cfg(debug_assertions)]
        {
            if let Ok(reference) = op.run_scalar(input) {
                if result != reference {
                    warn!(
                        "Acceleration mismatch! Backend {:?} produced different result than Scalar.",
                        device.backend()
                    );
                } else {
                    debug!("Acceleration verification passed for {:?}", device.backend());
                }
            }
        }

        Ok((result, elapsed))
    }
}

impl Accelerator for AccelerationManager {
    fn run(&self, records: &[Record]) -> Result<AccelOutput, AccelError> {
        if records.is_empty() {
            return Ok(AccelOutput::empty("none (empty batch)"));
        }
        let device = self.select_device()?;
        let identity = device.identity();

        let input = ScoreInput::from_records(records, self.config.rounds, self.config.max_items);
        let (values, elapsed) = self.execute(&ScoreOp, &input, &device)?;

        info!(
            device = %identity,
            records = records.len(),
            computed = input.items(),
            elapsed_ms = elapsed.as_millis() as u64,
            "accelerator finished"
        );
        Ok(AccelOutput {
            values,
            device: identity,
            elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpu_manager(rounds: u32, max_items: usize) -> AccelerationManager {
        AccelerationManager::new(AccelConfig {
            backend: BackendPreference::Cpu,
            rounds,
            max_items,
        })
    }

    #[test]
    fn test_cpu_preference_selects_parallel() {
        let device = cpu_manager(1, 0).select_device().unwrap();
        assert_eq!(device.backend(), Backend::Parallel);
        assert!(device.identity().starts_with("CPU / "));
    }

    #[test]
    fn test_run_preserves_order_and_length() {
        let records = vec![
            Record::new("a", 10, 55.0),
            Record::new("b", 20, 60.0),
            Record::new("c", 30, 70.0),
        ];
        let out = cpu_manager(32, 0).run(&records).unwrap();
        let expected: Vec<u32> = records
            .iter()
            .map(|r| cpu::score(r.games, r.winning as f32, 32))
            .collect();
        assert_eq!(out.values, expected);
        assert!(out.device.starts_with("CPU"));
    }

    #[test]
    fn test_empty_input_yields_empty_output() {
        let out = cpu_manager(32, 0).run(&[]).unwrap();
        assert!(out.values.is_empty());

        // No device is opened for an empty batch, so a GPU-only setup
        // without a GPU still succeeds.
        let gpu_only = AccelerationManager::new(AccelConfig {
            backend: BackendPreference::Gpu,
            rounds: 1,
            max_items: 0,
        });
        assert!(gpu_only.run(&[]).unwrap().values.is_empty());
    }

    #[test]
    fn test_max_items_limits_computation() {
        let records = vec![Record::new("a", 10, 55.0); 6];
        let out = cpu_manager(8, 2).run(&records).unwrap();
        assert_eq!(out.values.len(), 6);
        assert_ne!(out.values[1], 0);
        assert!(out.values[2..].iter().all(|&v| v == 0));
    }

    /// Backend path takes 50 ms, the scalar reference 400 ms.
    struct Timed;

    impl AcceleratedOp<u32, u32> for Timed {
        fn run_gpu(&self, input: &u32, _gpu: &GpuBackend) -> Result<u32, AccelError> {
            Ok(*input)
        }

        fn run_parallel(&self, input: &u32) -> Result<u32, AccelError> {
            std::thread::sleep(Duration::from_millis(50));
            Ok(*input)
        }

        fn run_scalar(&self, input: &u32) -> Result<u32, AccelError> {
            std::thread::sleep(Duration::from_millis(400));
            Ok(*input)
        }
    }

    #[test]
    fn test_elapsed_covers_backend_call_only() {
        let manager = cpu_manager(1, 0);
        let device = Device::Parallel { threads: 1 };
        let (out, elapsed) = manager.execute(&Timed, &7, &device).unwrap();
        assert_eq!(out, 7);
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(400));
    }

    #[test]
    fn test_auto_preference_always_yields_a_device() {
        let manager = AccelerationManager::new(AccelConfig {
            backend: BackendPreference::Auto,
            rounds: 1,
            max_items: 0,
        });
        assert!(manager.select_device().is_ok());
    }
}
