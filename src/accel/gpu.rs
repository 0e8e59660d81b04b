//! wgpu compute backend.
//!
//! Picks the first hardware adapter wgpu reports (high-performance
//! preference), builds `shaders/score.wgsl` and runs it over the batch.
//! Validation and allocation errors are captured through error scopes so a
//! broken kernel surfaces as `ComputeFailure` instead of a panic.

use std::borrow::Cow;

use tracing::{debug, info};
use wgpu::util::DeviceExt;

use crate::accel::ops::ScoreInput;
use crate::accel::AccelError;

const KERNEL_SOURCE: &str = include_str!("shaders/score.wgsl");
const KERNEL_ENTRY: &str = "score_main";
const WORKGROUP_SIZE: u32 = 64;
const MAX_GROUPS_PER_DIM: u32 = 65_535;

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct KernelParams {
    n: u32,
    rounds: u32,
    items: u32,
    _pad: u32,
}

pub struct GpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    info: wgpu::AdapterInfo,
}

impl GpuBackend {
    /// Open the first usable hardware adapter.
    pub fn new() -> Result<Self, AccelError> {
        let instance = wgpu::Instance::default();
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| AccelError::DeviceUnavailable {
            reason: "wgpu found no adapter".to_string(),
        })?;

        let info = adapter.get_info();
        if info.device_type == wgpu::DeviceType::Cpu {
            return Err(AccelError::DeviceUnavailable {
                reason: format!("only a software adapter is present ({})", info.name),
            });
        }
        if !adapter
            .get_downlevel_capabilities()
            .flags
            .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS)
        {
            return Err(AccelError::DeviceUnavailable {
                reason: format!("{} does not support compute shaders", info.name),
            });
        }

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("batchlink accelerator"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
            },
            None,
        ))
        .map_err(|e| AccelError::DeviceUnavailable {
            reason: format!("failed to open {}: {}", info.name, e),
        })?;

        info!(backend = ?info.backend, adapter = %info.name, "GPU adapter opened");
        Ok(Self {
            device,
            queue,
            info,
        })
    }

    /// `<api> / <adapter name>`, e.g. `Vulkan / NVIDIA GeForce RTX 3060`.
    pub fn identity(&self) -> String {
        format!("{:?} / {}", self.info.backend, self.info.name)
    }

    pub fn score(&self, input: &ScoreInput) -> Result<Vec<u32>, AccelError> {
        let n = input.len();
        if n == 0 {
            return Ok(Vec::new());
        }
        let items = input.items() as u32;
        let (groups_x, groups_y) = workgroups(items)?;

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("score kernel"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(KERNEL_SOURCE)),
        });
        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("score pipeline"),
                layout: None,
                module: &module,
                entry_point: KERNEL_ENTRY,
            });

        let games = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("games"),
                contents: bytemuck::cast_slice(&input.games),
                usage: wgpu::BufferUsages::STORAGE,
            });
        let winning = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("winning"),
                contents: bytemuck::cast_slice(&input.winning),
                usage: wgpu::BufferUsages::STORAGE,
            });
        let params = KernelParams {
            n: n as u32,
            rounds: input.rounds,
            items,
            _pad: 0,
        };
        let params = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("score params"),
                contents: bytemuck::bytes_of(&params),
                usage: wgpu::BufferUsages::UNIFORM,
            });

        let out_size = (n * std::mem::size_of::<u32>()) as wgpu::BufferAddress;
        let output = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("score output"),
            size: out_size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("score readback"),
            size: out_size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("score bindings"),
            layout: &pipeline.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: games.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: winning.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: output.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: params.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("score encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("score pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(groups_x, groups_y, 1);
        }
        encoder.copy_buffer_to_buffer(&output, 0, &readback, 0, out_size);
        self.queue.submit(Some(encoder.finish()));

        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());
        if let Some(err) = validation.or(oom) {
            return Err(AccelError::ComputeFailure {
                log: err.to_string(),
            });
        }
        debug!(items, groups_x, groups_y, "score kernel dispatched");

        let slice = readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| AccelError::ComputeFailure {
                log: "device dropped the read-back request".to_string(),
            })?
            .map_err(|e| AccelError::ComputeFailure {
                log: format!("failed to map result buffer: {:?}", e),
            })?;

        let data = slice.get_mapped_range();
        let values: Vec<u32> = bytemuck::cast_slice(&data).to_vec();
        drop(data);
        readback.unmap();

        Ok(values)
    }
}

/// 2-D dispatch size covering `items` invocations of `WORKGROUP_SIZE`.
fn workgroups(items: u32) -> Result<(u32, u32), AccelError> {
    let groups = items.div_ceil(WORKGROUP_SIZE).max(1);
    let x = groups.min(MAX_GROUPS_PER_DIM);
    let y = groups.div_ceil(x);
    if y > MAX_GROUPS_PER_DIM {
        return Err(AccelError::ComputeFailure {
            log: format!("{} items exceed the dispatch limit", items),
        });
    }
    Ok((x, y))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workgroups_single_dimension() {
        assert_eq!(workgroups(1).unwrap(), (1, 1));
        assert_eq!(workgroups(64).unwrap(), (1, 1));
        assert_eq!(workgroups(65).unwrap(), (2, 1));
    }

    #[test]
    fn test_workgroups_spill_into_y() {
        let items = MAX_GROUPS_PER_DIM * WORKGROUP_SIZE + 1;
        assert_eq!(workgroups(items).unwrap(), (MAX_GROUPS_PER_DIM, 2));
    }

    #[test]
    fn test_kernel_source_has_entry_point() {
        assert!(KERNEL_SOURCE.contains(KERNEL_ENTRY));
    }

    #[test]
    #[ignore] // Requires a GPU adapter
    fn test_gpu_matches_cpu_reference() {
        let backend = match GpuBackend::new() {
            Ok(b) => b,
            Err(e) => {
                println!("GPU test skipped: {}", e);
                return;
            }
        };
        let input = ScoreInput {
            games: (0..300).collect(),
            winning: (0..300).map(|w| 50.0 + w as f32 * 0.25).collect(),
            rounds: 64,
            max_items: 0,
        };
        assert_eq!(backend.score(&input).unwrap(), crate::accel::cpu::score_all(&input));
    }
}
