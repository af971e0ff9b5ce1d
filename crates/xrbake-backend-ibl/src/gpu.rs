//! wgpu-backed [`DrawExecutor`].
//!
//! Runs headless on the first available adapter, falling back to a software
//! adapter. HDR targets are `Rgba32Float` (requires `FLOAT32_FILTERABLE`),
//! LDR targets `Rgba8Unorm`. Every draw is submitted and waited on before it
//! returns.

use std::collections::HashMap;

use wgpu::util::DeviceExt;

use crate::error::IblError;
use crate::executor::{
    check_inputs, specular_regions, BlurAxis, DrawExecutor, MipRegion, Pass, SpecularEncoding,
    TargetKey, TextureId,
};
use crate::panorama::FloatImage;
use crate::tonemap::unit_to_u8;

const SHADER_SRC: &str = include_str!("shaders/ibl.wgsl");

const FRAGMENT_ENTRIES: [(&str, &str); 4] = [
    ("resample", "fs_resample"),
    ("blur", "fs_blur"),
    ("skybox", "fs_skybox"),
    ("specular", "fs_specular"),
];

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct Params {
    config: [f32; 4],
    texel: [f32; 4],
}

fn format_for(hdr: bool) -> wgpu::TextureFormat {
    if hdr {
        wgpu::TextureFormat::Rgba32Float
    } else {
        wgpu::TextureFormat::Rgba8Unorm
    }
}

fn bytes_per_pixel(hdr: bool) -> u32 {
    if hdr {
        16
    } else {
        4
    }
}

fn flag(on: bool) -> f32 {
    if on {
        1.0
    } else {
        0.0
    }
}

/// GPU executor holding the device, pipelines and size-keyed pools.
pub struct GpuExecutor {
    device: wgpu::Device,
    queue: wgpu::Queue,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    pipelines: HashMap<(&'static str, wgpu::TextureFormat), wgpu::RenderPipeline>,
    textures: HashMap<TextureId, (TargetKey, wgpu::Texture)>,
    pool: HashMap<TargetKey, Vec<wgpu::Texture>>,
    staging: HashMap<u64, wgpu::Buffer>,
    next_id: u64,
}

impl GpuExecutor {
    /// Acquire an adapter and device and build the pass pipelines.
    pub fn new() -> Result<Self, IblError> {
        pollster::block_on(Self::create())
    }

    async fn create() -> Result<Self, IblError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        // Hardware first, then a software adapter.
        let adapter = match instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
        {
            Some(a) => a,
            None => instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::LowPower,
                    compatible_surface: None,
                    force_fallback_adapter: true,
                })
                .await
                .ok_or_else(|| IblError::backend("no GPU adapter available"))?,
        };
        tracing::debug!(adapter = %adapter.get_info().name, "acquired GPU adapter");

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("ibl_device"),
                    required_features: wgpu::Features::FLOAT32_FILTERABLE,
                    required_limits: wgpu::Limits::default(),
                    ..Default::default()
                },
                None,
            )
            .await
            .map_err(|e| IblError::backend(format!("device creation failed: {}", e)))?;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("ibl_shader"),
            source: wgpu::ShaderSource::Wgsl(SHADER_SRC.into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("ibl_bgl"),
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

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("ibl_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        // Panorama seam repeats horizontally; poles clamp.
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("panorama_sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let mut pipelines = HashMap::new();
        for hdr in [true, false] {
            let format = format_for(hdr);
            for (name, entry) in FRAGMENT_ENTRIES {
                let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some(name),
                    layout: Some(&layout),
                    vertex: wgpu::VertexState {
                        module: &shader,
                        entry_point: Some("vs_main"),
                        buffers: &[],
                        compilation_options: Default::default(),
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: &shader,
                        entry_point: Some(entry),
                        targets: &[Some(wgpu::ColorTargetState {
                            format,
                            blend: None,
                            write_mask: wgpu::ColorWrites::ALL,
                        })],
                        compilation_options: Default::default(),
                    }),
                    primitive: wgpu::PrimitiveState::default(),
                    depth_stencil: None,
                    multisample: Default::default(),
                    multiview: None,
                    cache: None,
                });
                pipelines.insert((name, format), pipeline);
            }
        }

        Ok(Self {
            device,
            queue,
            bind_group_layout,
            sampler,
            pipelines,
            textures: HashMap::new(),
            pool: HashMap::new(),
            staging: HashMap::new(),
            next_id: 0,
        })
    }

    fn acquire(&mut self, key: TargetKey) -> wgpu::Texture {
        if let Some(texture) = self.pool.get_mut(&key).and_then(Vec::pop) {
            return texture;
        }
        self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("ibl_target"),
            size: wgpu::Extent3d {
                width: key.width,
                height: key.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: format_for(key.hdr),
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        })
    }

    fn insert(&mut self, key: TargetKey, texture: wgpu::Texture) -> TextureId {
        let id = TextureId(self.next_id);
        self.next_id += 1;
        self.textures.insert(id, (key, texture));
        id
    }

    fn texture(&self, id: TextureId) -> Result<&(TargetKey, wgpu::Texture), IblError> {
        self.textures
            .get(&id)
            .ok_or_else(|| IblError::backend(format!("unknown texture {}", id.0)))
    }

    fn bind_group(&self, input: TextureId, config: [f32; 4]) -> Result<wgpu::BindGroup, IblError> {
        let (key, texture) = self.texture(input)?;
        let params = Params {
            config,
            texel: [1.0 / key.width as f32, 1.0 / key.height as f32, 0.0, 0.0],
        };
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("ibl_params"),
                contents: bytemuck::bytes_of(&params),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("ibl_bg"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: buffer.as_entire_binding(),
                },
            ],
        }))
    }
}

fn pass_config(pass: &Pass) -> [f32; 4] {
    match *pass {
        Pass::Resample => [0.0; 4],
        Pass::Blur {
            axis,
            sigma,
            radius,
        } => [
            flag(axis == BlurAxis::Horizontal),
            0.0,
            sigma,
            radius as f32,
        ],
        Pass::Skybox {
            tone_map,
            encode_srgb,
        } => [flag(tone_map), flag(encode_srgb), 0.0, 0.0],
        Pass::Specular { encoding, .. } => {
            [flag(encoding == SpecularEncoding::Rgbd), 0.0, 0.0, 0.0]
        }
    }
}

impl DrawExecutor for GpuExecutor {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn upload(&mut self, image: &FloatImage, key: TargetKey) -> Result<TextureId, IblError> {
        if key.width == 0 || key.height == 0 || (image.width, image.height) != (key.width, key.height)
        {
            return Err(IblError::invalid(format!(
                "upload of {}x{} image into {}x{} texture",
                image.width, image.height, key.width, key.height
            )));
        }
        let texture = self.acquire(key);
        let bytes: Vec<u8> = if key.hdr {
            bytemuck::cast_slice(&image.data).to_vec()
        } else {
            image
                .data
                .iter()
                .flat_map(|texel| texel.map(unit_to_u8))
                .collect()
        };
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &bytes,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(key.width * bytes_per_pixel(key.hdr)),
                rows_per_image: Some(key.height),
            },
            wgpu::Extent3d {
                width: key.width,
                height: key.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(self.insert(key, texture))
    }

    fn draw(
        &mut self,
        pass: &Pass,
        inputs: &[TextureId],
        target: TargetKey,
    ) -> Result<TextureId, IblError> {
        check_inputs(pass, inputs)?;
        if target.width == 0 || target.height == 0 {
            return Err(IblError::invalid("empty render target"));
        }

        let draws: Vec<(TextureId, Option<MipRegion>)> = match pass {
            Pass::Specular { levels, .. } => {
                specular_regions(target.width.min(target.height), *levels)
                    .into_iter()
                    .map(|region| (inputs[region.level as usize], Some(region)))
                    .collect()
            }
            _ => vec![(inputs[0], None)],
        };
        let config = pass_config(pass);
        let bind_groups = draws
            .iter()
            .map(|(input, _)| self.bind_group(*input, config))
            .collect::<Result<Vec<_>, _>>()?;

        let output = self.acquire(target);
        let view = output.create_view(&wgpu::TextureViewDescriptor::default());
        let pipeline = self
            .pipelines
            .get(&(pass.name(), format_for(target.hdr)))
            .ok_or_else(|| IblError::backend(format!("no pipeline for {} pass", pass.name())))?;
        let clear = match pass {
            Pass::Specular { .. } => wgpu::Color::WHITE,
            _ => wgpu::Color::TRANSPARENT,
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("ibl_encoder"),
            });
        {
            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(pass.name()),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(clear),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                ..Default::default()
            });
            rpass.set_pipeline(pipeline);
            for ((_, region), bind_group) in draws.iter().zip(&bind_groups) {
                if let Some(region) = region {
                    rpass.set_viewport(
                        region.x as f32,
                        region.y as f32,
                        region.width as f32,
                        region.height as f32,
                        0.0,
                        1.0,
                    );
                }
                rpass.set_bind_group(0, bind_group, &[]);
                rpass.draw(0..3, 0..1);
            }
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        self.device.poll(wgpu::Maintain::Wait);

        tracing::trace!(pass = pass.name(), width = target.width, height = target.height, "gpu draw");
        Ok(self.insert(target, output))
    }

    fn read(&mut self, texture: TextureId) -> Result<FloatImage, IblError> {
        let key = self.texture(texture)?.0;
        let bpp = bytes_per_pixel(key.hdr);
        let unpadded = bpp * key.width;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded = unpadded.div_ceil(align) * align;
        let size = padded as u64 * key.height as u64;

        if !self.staging.contains_key(&size) {
            let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("ibl_staging"),
                size,
                usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                mapped_at_creation: false,
            });
            self.staging.insert(size, buffer);
        }
        let staging = self
            .staging
            .get(&size)
            .ok_or_else(|| IblError::backend("staging buffer missing"))?;
        let (_, source) = self.texture(texture)?;

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("ibl_readback"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: source,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(key.height),
                },
            },
            wgpu::Extent3d {
                width: key.width,
                height: key.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| IblError::backend(format!("readback channel closed: {}", e)))?
            .map_err(|e| IblError::backend(format!("failed to map readback buffer: {}", e)))?;

        let mut image = FloatImage::new(key.width, key.height, [0.0; 4]);
        {
            let data = slice.get_mapped_range();
            for row in 0..key.height {
                let start = (row * padded) as usize;
                let bytes = &data[start..start + unpadded as usize];
                let texels = &mut image.data
                    [(row * key.width) as usize..((row + 1) * key.width) as usize];
                if key.hdr {
                    for (texel, chunk) in texels.iter_mut().zip(bytes.chunks_exact(16)) {
                        *texel = bytemuck::pod_read_unaligned(chunk);
                    }
                } else {
                    for (texel, chunk) in texels.iter_mut().zip(bytes.chunks_exact(4)) {
                        *texel = [0, 1, 2, 3].map(|c| chunk[c] as f32 / 255.0);
                    }
                }
            }
        }
        staging.unmap();
        Ok(image)
    }

    fn release(&mut self, texture: TextureId) {
        if let Some((key, texture)) = self.textures.remove(&texture) {
            self.pool.entry(key).or_default().push(texture);
        }
    }
}
