//! Frame orchestrator - drives the stage sequence once per display refresh.
//!
//! A frame drains the disturbance queue into splats, projects the velocity
//! field onto its divergence-free part and transports velocity and dye:
//!
//! ```text
//! splats -> curl -> [vorticity] -> divergence -> clear pressure
//!        -> relax pressure (x swirl) -> gradient subtract
//!        -> advect velocity -> advect density -> [post] -> display
//! ```
//!
//! The order is data ([`stage_plan`]) rather than code order, and each stage
//! depends on the freshly swapped output of the one before it.

use rand::prelude::*;

use crate::schema::{FluidConfig, MAX_PRESSURE_ITERATIONS, rainbow_color};

use super::{
    AdvectionParams, Backend, BloomBlurParams, BloomPrefilterParams, ClearParams, CurlParams,
    DisplayParams, Disturbance, DisturbanceQueue, DivergenceParams, FieldDescriptor, FieldId,
    FieldSet, GradientSubtractParams, GridBuffer, KernelSet, PassExecutor, PipelineError,
    PointerTracker, PressureParams, Resolution, SplatParams, SunraysMaskParams, SunraysParams,
    SurfaceSize, VorticityParams, field_layout,
};

/// One step of the per-frame sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Drain the queue, splatting each disturbance into velocity then density.
    Splats,
    Curl,
    /// Vorticity confinement, fed by the curl field.
    Vorticity,
    Divergence,
    /// Damp last frame's pressure by `config.pressure`.
    ClearPressure,
    /// Jacobi iterations of the pressure equation.
    RelaxPressure { iterations: u32 },
    /// Subtract the pressure gradient from velocity.
    GradientSubtract,
    AdvectVelocity,
    AdvectDensity,
    BloomPrefilter,
    BloomBlur { iterations: u32 },
    SunraysMask,
    Sunrays,
    /// Composite dye, post effects and background into the display field.
    Display,
}

/// Ordered stages run by every frame under `config`.
pub fn stage_plan(config: &FluidConfig) -> Vec<Stage> {
    let mut plan = vec![Stage::Splats, Stage::Curl];
    if config.vorticity {
        plan.push(Stage::Vorticity);
    }
    plan.extend([
        Stage::Divergence,
        Stage::ClearPressure,
        Stage::RelaxPressure {
            iterations: config.pressure_iterations(),
        },
        Stage::GradientSubtract,
        Stage::AdvectVelocity,
        Stage::AdvectDensity,
    ]);
    if config.bloom.enabled {
        plan.push(Stage::BloomPrefilter);
        plan.push(Stage::BloomBlur {
            iterations: config.bloom.iterations,
        });
    }
    if config.sunrays.enabled {
        plan.push(Stage::SunraysMask);
        plan.push(Stage::Sunrays);
    }
    plan.push(Stage::Display);
    plan
}

/// Summary of one rendered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    /// Index of the frame, starting at 0.
    pub frame: u64,
    /// Disturbances drained from the queue.
    pub splats: usize,
    /// Kernel passes executed.
    pub passes: u32,
}

/// State that lives for exactly one `render_frame` call.
struct FrameContext<'a, B: Backend> {
    exec: PassExecutor<'a, B>,
    kernels: &'a mut KernelSet,
    config: &'a FluidConfig,
    rng: &'a mut StdRng,
    disturbances: Vec<Disturbance>,
}

impl<B: Backend> FrameContext<'_, B> {
    fn run(&mut self, stage: Stage) -> Result<(), PipelineError> {
        let config = self.config;
        let k = &mut *self.kernels;

        match stage {
            Stage::Splats => {
                let radius = config.splat_radius();
                for d in std::mem::take(&mut self.disturbances) {
                    k.splat.params = SplatParams {
                        target: FieldId::Velocity,
                        point: [d.x, d.y],
                        color: [d.vx, d.vy, 0.0],
                        radius,
                    };
                    self.exec.run(&k.splat, FieldId::Velocity)?;

                    let color = if config.rainbow {
                        rainbow_color(self.rng.r#gen::<f32>())
                    } else {
                        config.fluid_color.to_linear()
                    };
                    k.splat.params = SplatParams {
                        target: FieldId::Density,
                        point: [d.x, d.y],
                        color,
                        radius,
                    };
                    self.exec.run(&k.splat, FieldId::Density)?;
                }
            }
            Stage::Curl => {
                k.curl.params = CurlParams {
                    velocity: FieldId::Velocity,
                };
                self.exec.run(&k.curl, FieldId::Curl)?;
            }
            Stage::Vorticity => {
                k.vorticity.params = VorticityParams {
                    velocity: FieldId::Velocity,
                    curl: FieldId::Curl,
                    strength: config.curl,
                    dt: config.dt,
                };
                self.exec.run(&k.vorticity, FieldId::Velocity)?;
            }
            Stage::Divergence => {
                k.divergence.params = DivergenceParams {
                    velocity: FieldId::Velocity,
                };
                self.exec.run(&k.divergence, FieldId::Divergence)?;
            }
            Stage::ClearPressure => {
                k.clear.params = ClearParams {
                    texture: FieldId::Pressure,
                    value: config.pressure,
                };
                self.exec.run(&k.clear, FieldId::Pressure)?;
            }
            Stage::RelaxPressure { iterations } => {
                k.pressure.params = PressureParams {
                    pressure: FieldId::Pressure,
                    divergence: FieldId::Divergence,
                };
                for _ in 0..iterations {
                    self.exec.run(&k.pressure, FieldId::Pressure)?;
                }
            }
            Stage::GradientSubtract => {
                k.gradient_subtract.params = GradientSubtractParams {
                    pressure: FieldId::Pressure,
                    velocity: FieldId::Velocity,
                };
                self.exec.run(&k.gradient_subtract, FieldId::Velocity)?;
            }
            Stage::AdvectVelocity => {
                k.advection.params = AdvectionParams {
                    velocity: FieldId::Velocity,
                    source: FieldId::Velocity,
                    dissipation: config.velocity_dissipation,
                    dt: config.dt,
                };
                self.exec.run(&k.advection, FieldId::Velocity)?;
            }
            Stage::AdvectDensity => {
                k.advection.params = AdvectionParams {
                    velocity: FieldId::Velocity,
                    source: FieldId::Density,
                    dissipation: config.density_dissipation,
                    dt: config.dt,
                };
                self.exec.run(&k.advection, FieldId::Density)?;
            }
            Stage::BloomPrefilter => {
                k.bloom_prefilter.params = BloomPrefilterParams {
                    texture: FieldId::Density,
                    threshold: config.bloom.threshold,
                };
                self.exec.run(&k.bloom_prefilter, FieldId::Bloom)?;
            }
            Stage::BloomBlur { iterations } => {
                k.bloom_blur.params = BloomBlurParams {
                    texture: FieldId::Bloom,
                };
                for _ in 0..iterations {
                    self.exec.run(&k.bloom_blur, FieldId::Bloom)?;
                }
            }
            Stage::SunraysMask => {
                k.sunrays_mask.params = SunraysMaskParams {
                    texture: FieldId::Density,
                };
                self.exec.run(&k.sunrays_mask, FieldId::SunraysMask)?;
            }
            Stage::Sunrays => {
                k.sunrays.params = SunraysParams {
                    texture: FieldId::SunraysMask,
                    sun_position: [0.5, 0.5],
                    weight: config.sunrays.weight,
                    decay: config.sunrays.decay,
                    exposure: config.sunrays.exposure,
                };
                self.exec.run(&k.sunrays, FieldId::Sunrays)?;
            }
            Stage::Display => {
                k.display.params = DisplayParams {
                    density: FieldId::Density,
                    bloom: config.bloom.enabled.then_some(FieldId::Bloom),
                    sunrays: config.sunrays.enabled.then_some(FieldId::Sunrays),
                    bloom_intensity: config.bloom.intensity,
                    sunrays_intensity: config.sunrays.exposure,
                    background: config.background_color.to_linear(),
                    show_background: config.show_background,
                };
                self.exec.run(&k.display, FieldId::Display)?;
            }
        }
        Ok(())
    }
}

/// The fluid simulation pipeline.
///
/// Owns every field buffer, the kernel configurations and the disturbance
/// queue. Buffers are released when the pipeline is dropped.
pub struct FluidPipeline<B: Backend> {
    backend: B,
    config: FluidConfig,
    resolution: Resolution,
    fields: FieldSet,
    kernels: KernelSet,
    queue: DisturbanceQueue,
    surface: SurfaceSize,
    rng: StdRng,
    stages: Vec<Stage>,
    frame: u64,
}

fn warn_if_clamped(config: &FluidConfig) {
    if config.swirl > MAX_PRESSURE_ITERATIONS {
        log::warn!(
            "swirl {} exceeds {}; running {} pressure iterations",
            config.swirl,
            MAX_PRESSURE_ITERATIONS,
            config.pressure_iterations()
        );
    }
}

fn color_rng(seed: Option<u64>) -> StdRng {
    StdRng::seed_from_u64(seed.unwrap_or_else(rand::random))
}

impl<B: Backend> FluidPipeline<B> {
    /// Build a pipeline for a `width`×`height` output surface.
    ///
    /// Fails if the configuration is invalid or any buffer cannot be
    /// allocated; in the latter case nothing stays allocated.
    pub fn new(
        mut backend: B,
        config: FluidConfig,
        width: u32,
        height: u32,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        warn_if_clamped(&config);

        let resolution = Resolution::for_config(&config, width, height);
        let fields = FieldSet::allocate(&mut backend, &field_layout(&config, &resolution))?;
        let kernels = KernelSet::new(&resolution);

        log::info!(
            "Fluid pipeline {}x{}: sim {:?}, dye {:?}, {} buffers",
            resolution.surface_width,
            resolution.surface_height,
            resolution.sim_size(),
            resolution.dye_size(),
            fields.buffer_count()
        );

        Ok(Self {
            rng: color_rng(config.seed),
            stages: stage_plan(&config),
            backend,
            config,
            resolution,
            fields,
            kernels,
            queue: DisturbanceQueue::new(),
            surface: SurfaceSize::new(resolution.surface_width, resolution.surface_height),
            frame: 0,
        })
    }

    /// Handle for pushing disturbances, shareable with input handlers.
    pub fn queue(&self) -> DisturbanceQueue {
        self.queue.clone()
    }

    /// Pointer tracker feeding this pipeline's queue.
    ///
    /// The tracker follows later resizes; its force is the current
    /// configuration's.
    pub fn pointer_tracker(&self) -> PointerTracker {
        PointerTracker::with_surface(self.queue(), self.surface.clone(), self.config.force)
    }

    /// Run one frame: drain the queue, then every stage in order.
    pub fn render_frame(&mut self) -> Result<FrameReport, PipelineError> {
        let disturbances = self.queue.drain();
        let splats = disturbances.len();

        let Self {
            backend,
            config,
            fields,
            kernels,
            rng,
            stages,
            ..
        } = self;

        let mut frame = FrameContext {
            exec: PassExecutor::new(backend, fields),
            kernels,
            config,
            rng,
            disturbances,
        };
        for &stage in stages.iter() {
            frame.run(stage)?;
        }
        let passes = frame.exec.passes();

        self.backend.submit();
        let report = FrameReport {
            frame: self.frame,
            splats,
            passes,
        };
        self.frame += 1;

        log::debug!(
            "frame {}: {} splats, {} passes",
            report.frame,
            report.splats,
            report.passes
        );
        Ok(report)
    }

    /// Adapt to a new output surface size.
    ///
    /// Every resolution-dependent buffer is reallocated and every kernel's
    /// texel size recomputed. Field contents restart from zero. If the new
    /// buffers cannot be allocated the pipeline keeps its current state.
    /// Trackers from [`Self::pointer_tracker`] pick up the new size; other
    /// trackers need [`PointerTracker::set_surface`].
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), PipelineError> {
        let resolution = Resolution::for_config(&self.config, width, height);
        if resolution == self.resolution {
            return Ok(());
        }
        let layout = field_layout(&self.config, &resolution);
        self.reallocate(&layout, resolution)?;
        log::info!(
            "Fluid pipeline resized to {}x{}: sim {:?}, dye {:?}",
            resolution.surface_width,
            resolution.surface_height,
            resolution.sim_size(),
            resolution.dye_size()
        );
        Ok(())
    }

    /// Replace the simulation parameters between frames.
    ///
    /// Buffers are only reallocated when the field layout changes (grid
    /// resolutions or enabled post stages).
    pub fn set_config(&mut self, config: FluidConfig) -> Result<(), PipelineError> {
        config.validate()?;
        warn_if_clamped(&config);

        let resolution = Resolution::for_config(
            &config,
            self.resolution.surface_width,
            self.resolution.surface_height,
        );
        let layout = field_layout(&config, &resolution);
        if layout != field_layout(&self.config, &self.resolution) {
            self.reallocate(&layout, resolution)?;
        }
        if config.seed != self.config.seed {
            self.rng = color_rng(config.seed);
        }
        self.stages = stage_plan(&config);
        self.config = config;
        Ok(())
    }

    fn reallocate(
        &mut self,
        layout: &[FieldDescriptor],
        resolution: Resolution,
    ) -> Result<(), PipelineError> {
        // New buffers first, so a failed allocation leaves the old ones intact
        let fields = FieldSet::allocate(&mut self.backend, layout)?;
        let released = self.fields.release(&mut self.backend);
        log::debug!(
            "released {} buffers, allocated {}",
            released,
            fields.buffer_count()
        );

        self.fields = fields;
        self.surface
            .set(resolution.surface_width, resolution.surface_height);
        self.resolution = resolution;
        self.kernels.apply_resolution(&resolution);
        Ok(())
    }

    /// Read side of a field.
    pub fn field(&self, id: FieldId) -> Result<&GridBuffer, PipelineError> {
        Ok(self.fields.get(id)?.read())
    }

    /// Current dye texture, for presentation and post effects.
    pub fn density_buffer(&self) -> Result<&GridBuffer, PipelineError> {
        self.field(FieldId::Density)
    }

    /// Composited output of the display stage.
    pub fn display_buffer(&self) -> Result<&GridBuffer, PipelineError> {
        self.field(FieldId::Display)
    }

    #[inline]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    #[inline]
    pub fn config(&self) -> &FluidConfig {
        &self.config
    }

    #[inline]
    pub fn resolution(&self) -> &Resolution {
        &self.resolution
    }

    #[inline]
    pub fn fields(&self) -> &FieldSet {
        &self.fields
    }

    #[inline]
    pub fn kernels(&self) -> &KernelSet {
        &self.kernels
    }

    /// Frames rendered so far.
    #[inline]
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

impl<B: Backend> Drop for FluidPipeline<B> {
    fn drop(&mut self) {
        let released = self.fields.release(&mut self.backend);
        log::info!(
            "Fluid pipeline released {} buffers after {} frames",
            released,
            self.frame
        );
    }
}
