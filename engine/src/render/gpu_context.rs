//! GPU Context
//!
//! Headless device and queue for the GI compute passes, plus the buffer
//! helpers every dispatcher uses. No surface: the GI pipeline consumes and
//! produces storage buffers, and presentation belongs to the host renderer.

use wgpu::util::DeviceExt;

use crate::error::{GiError, GiResult};

/// Shared GPU resources
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: wgpu::AdapterInfo,
}

/// Configuration for GPU context creation
#[derive(Clone, Debug)]
pub struct GpuContextConfig {
    /// Prefer high-performance GPU
    pub high_performance: bool,
    /// Allow a software adapter when no hardware one is present
    pub allow_fallback_adapter: bool,
}

impl Default for GpuContextConfig {
    fn default() -> Self {
        Self { high_performance: true, allow_fallback_adapter: false }
    }
}

impl GpuContext {
    /// Create a headless context. Blocks on adapter and device requests.
    pub fn new(config: &GpuContextConfig) -> GiResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: if config.high_performance {
                wgpu::PowerPreference::HighPerformance
            } else {
                wgpu::PowerPreference::LowPower
            },
            compatible_surface: None,
            force_fallback_adapter: config.allow_fallback_adapter,
        }))
        .map_err(GiError::device)?;

        let adapter_info = adapter.get_info();
        log::info!(
            "[GpuContext] Adapter: {} ({:?}, {:?})",
            adapter_info.name, adapter_info.device_type, adapter_info.backend
        );

        let downlevel = adapter.get_downlevel_capabilities();
        if !downlevel.flags.contains(wgpu::DownlevelFlags::SHADER_F16_IN_F32) {
            return Err(GiError::device(format!(
                "adapter {} lacks SHADER_F16_IN_F32, needed for packed radiance",
                adapter_info.name
            )));
        }

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Voxel GI Device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            ..Default::default()
        }))
        .map_err(GiError::device)?;

        Ok(Self { device, queue, adapter_info })
    }

    /// Create a uniform buffer with initial data
    pub fn create_uniform_buffer<T: bytemuck::Pod>(&self, label: &str, data: &T) -> wgpu::Buffer {
        self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::bytes_of(data),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        })
    }

    /// Create a storage buffer with initial data. Empty slices get a
    /// 16-byte zeroed buffer so bindings stay valid.
    pub fn create_storage_buffer<T: bytemuck::Pod>(&self, label: &str, data: &[T]) -> wgpu::Buffer {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.is_empty() {
            return self.create_empty_storage_buffer(label, MIN_STORAGE_SIZE);
        }
        self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytes,
            usage: storage_usage(),
        })
    }

    /// Create a zeroed storage buffer of `size` bytes (at least 16).
    pub fn create_empty_storage_buffer(&self, label: &str, size: u64) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: padded_size(size),
            usage: storage_usage(),
            mapped_at_creation: false,
        })
    }

    /// Write data to a buffer
    pub fn write_buffer<T: bytemuck::Pod>(&self, buffer: &wgpu::Buffer, data: &[T]) {
        self.queue.write_buffer(buffer, 0, bytemuck::cast_slice(data));
    }

    /// Copy `buffer` into a staging buffer and block until it can be read.
    pub fn read_buffer<T: bytemuck::Pod>(&self, buffer: &wgpu::Buffer) -> GiResult<Vec<T>> {
        let size = buffer.size();
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("gi_readback_staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("gi_readback") });
        encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            tx.send(result).ok();
        });
        self.device
            .poll(wgpu::PollType::Wait { submission_index: None, timeout: None })
            .map_err(GiError::device)?;
        rx.recv()
            .map_err(GiError::device)?
            .map_err(GiError::device)?;

        let data = slice.get_mapped_range();
        let out = bytemuck::pod_collect_to_vec(&data);
        drop(data);
        staging.unmap();
        Ok(out)
    }
}

/// Smallest storage buffer the dispatchers create.
pub const MIN_STORAGE_SIZE: u64 = 16;

fn storage_usage() -> wgpu::BufferUsages {
    wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC
}

/// Round up to the 4-byte copy alignment, never below [`MIN_STORAGE_SIZE`].
pub fn padded_size(size: u64) -> u64 {
    size.max(MIN_STORAGE_SIZE).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT)
}
