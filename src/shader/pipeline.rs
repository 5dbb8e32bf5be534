//! wgpu effect stage: frame texture upload, full-screen quad draw, readback.

use super::{build_program, EffectStage, GpuContext, ShaderProgram};
use crate::frame::{QuadVertex, VideoFrame};
use anyhow::Result;
use std::borrow::Cow;
use tracing::debug;
use wgpu::util::DeviceExt;

/// Per-frame uniforms exposed to fragment bodies.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Globals {
    pub time: f32,
    pub width: f32,
    pub height: f32,
    pub seed: f32,
}

/// GPU effect stage using wgpu.
///
/// Starts with the passthrough program installed. The frame texture and the
/// offscreen target are recreated only when frame dimensions change; the
/// frame contents are uploaded on every render.
pub struct GpuEffectStage {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline_layout: wgpu::PipelineLayout,
    vertex_module: wgpu::ShaderModule,
    render_pipeline: wgpu::RenderPipeline,
    installed: ShaderProgram,
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    bind_group_layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
    sampler: wgpu::Sampler,

    // Cache tied to the current frame dimensions
    input_texture: Option<wgpu::Texture>,
    output_texture: Option<wgpu::Texture>,
    readback_buffer: Option<wgpu::Buffer>,
    bind_group: Option<wgpu::BindGroup>,
    cached_width: u32,
    cached_height: u32,
    padded_bytes_per_row: u32,
}

impl GpuEffectStage {
    /// Creates a headless effect stage with the passthrough program installed.
    pub fn new() -> Result<Self> {
        let context = GpuContext::new(None)?;
        let GpuContext { device, queue, .. } = context;

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Effect Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Effect Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        let passthrough = build_program("")?;
        let vertex_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Effect Vertex Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(passthrough.vertex_wgsl())),
        });

        let render_pipeline =
            Self::create_pipeline(&device, &pipeline_layout, &vertex_module, &passthrough);

        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Effect Vertex Buffer"),
            contents: bytemuck::cast_slice(QuadVertex::VERTICES),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Effect Index Buffer"),
            contents: bytemuck::cast_slice(QuadVertex::INDICES),
            usage: wgpu::BufferUsages::INDEX,
        });

        // Video frames must not wrap at the edges and are continuous raster
        // images, hence clamp-to-edge and linear filtering.
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Frame Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let globals = Globals {
            time: 0.0,
            width: 0.0,
            height: 0.0,
            seed: 0.0,
        };
        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Globals Buffer"),
            contents: bytemuck::cast_slice(&[globals]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        Ok(Self {
            device,
            queue,
            pipeline_layout,
            vertex_module,
            render_pipeline,
            installed: passthrough,
            vertex_buffer,
            index_buffer,
            bind_group_layout,
            uniform_buffer,
            sampler,
            input_texture: None,
            output_texture: None,
            readback_buffer: None,
            bind_group: None,
            cached_width: 0,
            cached_height: 0,
            padded_bytes_per_row: 0,
        })
    }

    fn create_pipeline(
        device: &wgpu::Device,
        layout: &wgpu::PipelineLayout,
        vertex_module: &wgpu::ShaderModule,
        program: &ShaderProgram,
    ) -> wgpu::RenderPipeline {
        let fragment_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Effect Fragment Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Owned(program.fragment_wgsl().to_string())),
        });

        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Effect Render Pipeline"),
            layout: Some(layout),
            vertex: wgpu::VertexState {
                module: vertex_module,
                entry_point: Some(program.vertex_entry()),
                buffers: &[QuadVertex::layout()],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &fragment_module,
                entry_point: Some(program.fragment_entry()),
                targets: &[Some(wgpu::ColorTargetState {
                    format: wgpu::TextureFormat::Rgba8Unorm,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        })
    }

    /// Recreates the frame-size dependent resources if dimensions changed.
    fn ensure_resources(&mut self, width: u32, height: u32) {
        if self.cached_width == width && self.cached_height == height {
            return;
        }

        debug!("Creating GPU resources for {}x{} frames", width, height);

        self.input_texture = Some(self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Frame Texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        }));

        self.output_texture = Some(self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Output Texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        }));

        // Texture-to-buffer copies require 256-byte row alignment; padding is
        // stripped again after mapping.
        let unpadded = width * 4;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded = (unpadded + align - 1) & !(align - 1);
        self.readback_buffer = Some(self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Buffer"),
            size: (padded * height) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        }));

        let input_view = self
            .input_texture
            .as_ref()
            .unwrap()
            .create_view(&wgpu::TextureViewDescriptor::default());
        self.bind_group = Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Effect Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&input_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
            ],
        }));

        self.cached_width = width;
        self.cached_height = height;
        self.padded_bytes_per_row = padded;
    }
}

impl EffectStage for GpuEffectStage {
    fn installed_body(&self) -> Option<&str> {
        Some(self.installed.fragment_body())
    }

    fn install(&mut self, program: ShaderProgram) {
        // Overwriting drops the previous pipeline and its shader modules.
        self.render_pipeline = Self::create_pipeline(
            &self.device,
            &self.pipeline_layout,
            &self.vertex_module,
            &program,
        );
        self.installed = program;
    }

    fn render(&mut self, frame: &VideoFrame, time: f32) -> Result<VideoFrame> {
        let start = std::time::Instant::now();
        self.ensure_resources(frame.width, frame.height);

        let globals = Globals {
            time,
            width: frame.width as f32,
            height: frame.height as f32,
            seed: rand::random::<f32>(),
        };
        self.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::cast_slice(&[globals]));

        // Unconditional upload: the decoded image changes every tick.
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: self.input_texture.as_ref().unwrap(),
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &frame.data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(frame.bytes_per_row()),
                rows_per_image: Some(frame.height),
            },
            wgpu::Extent3d {
                width: frame.width,
                height: frame.height,
                depth_or_array_layers: 1,
            },
        );

        let output_view = self
            .output_texture
            .as_ref()
            .unwrap()
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Effect Encoder"),
            });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Effect Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &output_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            render_pass.set_pipeline(&self.render_pipeline);
            render_pass.set_bind_group(0, self.bind_group.as_ref().unwrap(), &[]);
            render_pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
            render_pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint16);
            render_pass.draw_indexed(0..6, 0, 0..1);
        }

        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: self.output_texture.as_ref().unwrap(),
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: self.readback_buffer.as_ref().unwrap(),
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_bytes_per_row),
                    rows_per_image: Some(frame.height),
                },
            },
            wgpu::Extent3d {
                width: frame.width,
                height: frame.height,
                depth_or_array_layers: 1,
            },
        );

        self.queue.submit(std::iter::once(encoder.finish()));

        let buffer_slice = self.readback_buffer.as_ref().unwrap().slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            sender.send(result).unwrap()
        });
        self.device.poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        })?;
        receiver.recv()??;

        let unpadded = frame.bytes_per_row();
        let padded = self.padded_bytes_per_row;
        let data = buffer_slice.get_mapped_range();
        let output_data = if padded == unpadded {
            data.to_vec()
        } else {
            let mut rows = vec![0u8; (unpadded * frame.height) as usize];
            for y in 0..frame.height as usize {
                let src = y * padded as usize;
                let dst = y * unpadded as usize;
                rows[dst..dst + unpadded as usize]
                    .copy_from_slice(&data[src..src + unpadded as usize]);
            }
            rows
        };
        drop(data);
        self.readback_buffer.as_ref().unwrap().unmap();

        debug!("Processed {}x{} frame in {:?}", frame.width, frame.height, start.elapsed());

        Ok(VideoFrame::from_data(frame.width, frame.height, output_data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::{builtin_body, Effect};

    fn stage_or_skip() -> Option<GpuEffectStage> {
        match GpuEffectStage::new() {
            Ok(stage) => Some(stage),
            Err(e) => {
                eprintln!("skipping GPU test (no adapter available): {e}");
                None
            }
        }
    }

    #[test]
    fn test_invert_produces_complement_pixels() {
        let Some(mut stage) = stage_or_skip() else {
            return;
        };
        let program = build_program(builtin_body(Effect::Invert)).unwrap();
        stage.install(program);

        let input = VideoFrame::filled(64, 64, [255, 0, 0, 255]);
        let output = stage.render(&input, 0.0).unwrap();
        assert_eq!((output.width, output.height), (64, 64));
        assert_eq!(&output.data[0..4], &[0, 255, 255, 255]);
        let center = (32 * 64 + 32) * 4;
        assert_eq!(&output.data[center..center + 4], &[0, 255, 255, 255]);
    }

    #[test]
    fn test_passthrough_preserves_rows_with_padded_readback() {
        let Some(mut stage) = stage_or_skip() else {
            return;
        };
        // 33 pixels per row forces a padded copy (132 bytes up to 256).
        let width = 33u32;
        let height = 17u32;
        let mut data = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            let shade = (y * 13 % 256) as u8;
            for _ in 0..width {
                data.extend_from_slice(&[shade, 0, 255 - shade, 255]);
            }
        }
        let input = VideoFrame::from_data(width, height, data);
        let output = stage.render(&input, 0.0).unwrap();
        assert_eq!(output.data, input.data);
    }
}
