//! Headless wgpu device for offscreen compositing

use crate::utils::error::{Result, TranscodeError};
use log::{debug, info};

/// Device and queue without any window surface
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    adapter_name: String,
}

impl GpuContext {
    /// Create a headless context, blocking until the device is ready
    pub fn new_headless() -> Result<Self> {
        pollster::block_on(Self::init_wgpu())
    }

    async fn init_wgpu() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| TranscodeError::Renderer(format!("Failed to find suitable GPU adapter: {}", e)))?;

        let adapter_name = adapter.get_info().name;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Transcoder GPU Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults().using_resolution(adapter.limits()),
                memory_hints: wgpu::MemoryHints::default(),
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|e| TranscodeError::Renderer(format!("Failed to create GPU device: {}", e)))?;

        info!("GPU context ready on {}", adapter_name);
        Ok(Self { device, queue, adapter_name })
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        debug!("Releasing GPU context ({})", self.adapter_name);
    }
}
