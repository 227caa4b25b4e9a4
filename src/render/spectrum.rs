use anyhow::{ensure, Result};
use wgpu;

use super::frame::{FrameRenderer, GpuContext, TEXTURE_FORMAT};
use super::pipeline::{RenderPipeline, SpectrumUniforms};
use super::SpectrumRenderer;
use crate::audio::features::SpectrumView;

const SHADER_SOURCE: &str = include_str!("../../shaders/spectrum.wgsl");

/// Off-screen GPU renderer for the bar/smear/glow spectrum picture.
pub struct GpuSpectrumRenderer {
    gpu: GpuContext,
    frame: FrameRenderer,
    pipeline: RenderPipeline,
    bind_group: wgpu::BindGroup,
    uniform_buffer: wgpu::Buffer,
    smoothed_buffer: wgpu::Buffer,
    smeared_buffer: wgpu::Buffer,
    uniforms: SpectrumUniforms,
    max_buckets: usize,
}

impl GpuSpectrumRenderer {
    /// `max_buckets` bounds the bucket count of any view passed to `render`;
    /// use the analyzer's `bucket_ranges().len()`.
    pub fn new(width: u32, height: u32, max_buckets: usize) -> Result<Self> {
        ensure!(width > 0 && height > 0, "render surface must not be empty, got {}x{}", width, height);

        let gpu = GpuContext::headless()?;
        let frame = FrameRenderer::new(&gpu, width, height);
        let pipeline = RenderPipeline::new(&gpu.device, SHADER_SOURCE, TEXTURE_FORMAT)?;

        let uniform_buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("uniform_buffer"),
            size: std::mem::size_of::<SpectrumUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        // Storage bindings cannot be empty.
        let bucket_bytes = (max_buckets.max(1) * std::mem::size_of::<f32>()) as u64;
        let smoothed_buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("smoothed_buffer"),
            size: bucket_bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let smeared_buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("smeared_buffer"),
            size: bucket_bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("spectrum_bind_group"),
            layout: &pipeline.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: smoothed_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: smeared_buffer.as_entire_binding(),
                },
            ],
        });

        let uniforms = SpectrumUniforms {
            resolution: [width as f32, height as f32],
            ..Default::default()
        };

        log::info!("Renderer ready: {}x{}, up to {} buckets", width, height, max_buckets);

        Ok(Self {
            gpu,
            frame,
            pipeline,
            bind_group,
            uniform_buffer,
            smoothed_buffer,
            smeared_buffer,
            uniforms,
            max_buckets,
        })
    }
}

impl SpectrumRenderer for GpuSpectrumRenderer {
    fn size(&self) -> (u32, u32) {
        (self.frame.width, self.frame.height)
    }

    fn render(&mut self, view: SpectrumView<'_>) -> Result<Vec<u8>> {
        let m = view.bucket_count();
        ensure!(
            m <= self.max_buckets,
            "spectrum has {} buckets but the renderer was built for {}",
            m,
            self.max_buckets
        );

        self.uniforms.bucket_count = m as u32;
        let queue = &self.gpu.queue;
        queue.write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&self.uniforms));
        if !view.is_empty() {
            queue.write_buffer(&self.smoothed_buffer, 0, bytemuck::cast_slice(&view.smoothed[..m]));
            queue.write_buffer(&self.smeared_buffer, 0, bytemuck::cast_slice(&view.smeared[..m]));
        }

        self.frame
            .render_and_readback(&self.gpu, &self.pipeline.pipeline, &self.bind_group)
    }
}
