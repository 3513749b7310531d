//! GPU Backend - fluid kernels as wgpu compute passes.
//!
//! Every grid buffer is an `Rgba16Float` texture, whatever its logical
//! channel count, because that is the half-float format compute shaders can
//! store to without optional features. Passes sample their inputs through a
//! linear or nearest sampler (per the buffer's filter mode) and write the
//! target through a storage binding.

use std::collections::HashMap;

use super::GpuError;
use crate::compute::{
    Backend, BufferId, BufferSpec, FilterMode, GridBuffer, PassUniforms, PipelineError, Program,
};

// Embed shader sources at compile time
const COMMON_SHADER: &str = include_str!("shaders/common.wgsl");
const SPLAT_SHADER: &str = include_str!("shaders/splat.wgsl");
const CURL_SHADER: &str = include_str!("shaders/curl.wgsl");
const VORTICITY_SHADER: &str = include_str!("shaders/vorticity.wgsl");
const DIVERGENCE_SHADER: &str = include_str!("shaders/divergence.wgsl");
const CLEAR_SHADER: &str = include_str!("shaders/clear.wgsl");
const PRESSURE_SHADER: &str = include_str!("shaders/pressure.wgsl");
const GRADIENT_SUBTRACT_SHADER: &str = include_str!("shaders/gradient_subtract.wgsl");
const ADVECTION_SHADER: &str = include_str!("shaders/advection.wgsl");
const BLOOM_PREFILTER_SHADER: &str = include_str!("shaders/bloom_prefilter.wgsl");
const BLOOM_BLUR_SHADER: &str = include_str!("shaders/bloom_blur.wgsl");
const SUNRAYS_MASK_SHADER: &str = include_str!("shaders/sunrays_mask.wgsl");
const SUNRAYS_SHADER: &str = include_str!("shaders/sunrays.wgsl");
const DISPLAY_SHADER: &str = include_str!("shaders/display.wgsl");

const TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
const WORKGROUP_SIZE: u32 = 16;

fn shader_body(program: Program) -> &'static str {
    match program {
        Program::Splat => SPLAT_SHADER,
        Program::Curl => CURL_SHADER,
        Program::Vorticity => VORTICITY_SHADER,
        Program::Divergence => DIVERGENCE_SHADER,
        Program::Clear => CLEAR_SHADER,
        Program::Pressure => PRESSURE_SHADER,
        Program::GradientSubtract => GRADIENT_SUBTRACT_SHADER,
        Program::Advection => ADVECTION_SHADER,
        Program::BloomPrefilter => BLOOM_PREFILTER_SHADER,
        Program::BloomBlur => BLOOM_BLUR_SHADER,
        Program::SunraysMask => SUNRAYS_MASK_SHADER,
        Program::Sunrays => SUNRAYS_SHADER,
        Program::Display => DISPLAY_SHADER,
    }
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    filter: FilterMode,
}

/// Backend running the fluid kernels on a wgpu device.
pub struct GpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,

    /// One pipeline per program, in `Program::ALL` order.
    pipelines: Vec<wgpu::ComputePipeline>,
    /// Bind group layouts indexed by sampled input count - 1.
    layouts: Vec<wgpu::BindGroupLayout>,
    linear_sampler: wgpu::Sampler,
    nearest_sampler: wgpu::Sampler,

    textures: HashMap<BufferId, GpuTexture>,
    next_id: u64,
    /// Passes recorded since the last submit.
    encoder: Option<wgpu::CommandEncoder>,
}

impl GpuBackend {
    /// Create a headless backend on the best available adapter.
    pub async fn new() -> Result<Self, GpuError> {
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
            .map_err(|_| GpuError::NoAdapter)?;

        let (device, queue): (wgpu::Device, wgpu::Queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Fluid GPU"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                ..Default::default()
            })
            .await?;

        Ok(Self::from_device(device, queue))
    }

    /// Run on a device owned by the host renderer.
    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let layouts: Vec<wgpu::BindGroupLayout> = (1..=3)
            .map(|inputs| create_pass_bind_group_layout(&device, inputs))
            .collect();

        let pipelines = Program::ALL
            .iter()
            .map(|&program| {
                let layout = &layouts[program.input_count() - 1];
                create_pass_pipeline(&device, program, layout)
            })
            .collect();

        let linear_sampler = create_sampler(&device, wgpu::FilterMode::Linear);
        let nearest_sampler = create_sampler(&device, wgpu::FilterMode::Nearest);

        log::info!("GPU backend ready: {} pass pipelines", Program::ALL.len());

        Self {
            device,
            queue,
            pipelines,
            layouts,
            linear_sampler,
            nearest_sampler,
            textures: HashMap::new(),
            next_id: 1,
            encoder: None,
        }
    }

    /// View of a buffer's texture, for presentation or post-processing.
    pub fn texture_view(&self, buffer: &GridBuffer) -> Option<&wgpu::TextureView> {
        self.textures.get(&buffer.id()).map(|t| &t.view)
    }

    /// Buffers currently allocated.
    pub fn live_buffers(&self) -> usize {
        self.textures.len()
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    fn sampler(&self, filter: FilterMode) -> &wgpu::Sampler {
        match filter {
            FilterMode::Linear => &self.linear_sampler,
            FilterMode::Nearest => &self.nearest_sampler,
        }
    }
}

impl Backend for GpuBackend {
    fn allocate(&mut self, spec: BufferSpec) -> Result<GridBuffer, PipelineError> {
        let max = self.device.limits().max_texture_dimension_2d;
        if spec.width == 0 || spec.height == 0 || spec.width > max || spec.height > max {
            return Err(PipelineError::OutOfDeviceMemory {
                width: spec.width,
                height: spec.height,
                format: spec.format,
            });
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Fluid Field Texture"),
            size: wgpu::Extent3d {
                width: spec.width,
                height: spec.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let id = BufferId(self.next_id);
        self.next_id += 1;
        self.textures.insert(
            id,
            GpuTexture {
                texture,
                view,
                filter: spec.filter,
            },
        );
        Ok(GridBuffer::new(id, spec))
    }

    fn dispose(&mut self, buffer: GridBuffer) {
        // Recorded passes may still reference the texture
        self.submit();
        match self.textures.remove(&buffer.id()) {
            Some(gpu) => gpu.texture.destroy(),
            None => {
                log::error!("dispose of unknown {}", buffer.id());
                debug_assert!(false, "dispose of unknown {}", buffer.id());
            }
        }
    }

    fn draw(
        &mut self,
        program: Program,
        uniforms: &PassUniforms,
        inputs: &[&GridBuffer],
        target: &GridBuffer,
    ) -> Result<(), PipelineError> {
        if inputs.iter().any(|input| input.id() == target.id()) {
            return Err(PipelineError::FeedbackLoop {
                program,
                buffer: target.id(),
            });
        }
        let output = self
            .textures
            .get(&target.id())
            .ok_or(PipelineError::UnknownBuffer(target.id()))?;
        let sources = inputs
            .iter()
            .map(|input| {
                self.textures
                    .get(&input.id())
                    .ok_or(PipelineError::UnknownBuffer(input.id()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let pipeline = &self.pipelines[program as usize];

        let params_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Pass Uniforms"),
            size: std::mem::size_of::<PassUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.queue
            .write_buffer(&params_buffer, 0, bytemuck::bytes_of(uniforms));

        let mut entries = vec![
            wgpu::BindGroupEntry {
                binding: 0,
                resource: params_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::TextureView(&output.view),
            },
        ];
        for (i, source) in sources.iter().enumerate() {
            let binding = 2 + 2 * i as u32;
            entries.push(wgpu::BindGroupEntry {
                binding,
                resource: wgpu::BindingResource::TextureView(&source.view),
            });
            entries.push(wgpu::BindGroupEntry {
                binding: binding + 1,
                resource: wgpu::BindingResource::Sampler(self.sampler(source.filter)),
            });
        }

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(program.name()),
            layout: &self.layouts[program.input_count() - 1],
            entries: &entries,
        });

        let encoder = self.encoder.get_or_insert_with(|| {
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Fluid Frame Encoder"),
                })
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(program.name()),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(
                target.width().div_ceil(WORKGROUP_SIZE),
                target.height().div_ceil(WORKGROUP_SIZE),
                1,
            );
        }
        Ok(())
    }

    fn submit(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(Some(encoder.finish()));
        }
    }
}

impl Drop for GpuBackend {
    fn drop(&mut self) {
        self.submit();
        if !self.textures.is_empty() {
            log::warn!("GPU backend dropped with {} live buffers", self.textures.len());
        }
    }
}

fn create_pass_pipeline(
    device: &wgpu::Device,
    program: Program,
    bind_group_layout: &wgpu::BindGroupLayout,
) -> wgpu::ComputePipeline {
    let source = format!("{}\n{}", COMMON_SHADER, shader_body(program));
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(program.name()),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });

    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(program.name()),
        bind_group_layouts: &[bind_group_layout],
        ..Default::default()
    });

    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(program.name()),
        layout: Some(&layout),
        module: &shader,
        entry_point: Some("main"),
        compilation_options: Default::default(),
        cache: None,
    })
}

/// Uniforms at 0, output at 1, then a (texture, sampler) pair per input.
fn create_pass_bind_group_layout(device: &wgpu::Device, inputs: usize) -> wgpu::BindGroupLayout {
    let mut entries = vec![
        wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        },
        wgpu::BindGroupLayoutEntry {
            binding: 1,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::StorageTexture {
                access: wgpu::StorageTextureAccess::WriteOnly,
                format: TEXTURE_FORMAT,
                view_dimension: wgpu::TextureViewDimension::D2,
            },
            count: None,
        },
    ];
    for i in 0..inputs as u32 {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: 2 + 2 * i,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        });
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: 3 + 2 * i,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        });
    }

    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Fluid Pass Bind Group Layout"),
        entries: &entries,
    })
}

fn create_sampler(device: &wgpu::Device, filter: wgpu::FilterMode) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("Fluid Sampler"),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        mag_filter: filter,
        min_filter: filter,
        ..Default::default()
    })
}
