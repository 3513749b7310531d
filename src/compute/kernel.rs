//! Kernel configurations: one typed parameter block per simulation stage.
//!
//! Each stage's parameters are a plain struct implementing [`KernelParams`].
//! Textures are named by [`FieldId`] and resolved to the field's read side
//! when the pass executes. Scalars and vectors are packed into a shared
//! [`PassUniforms`] block, which is what both backends actually consume.

use super::{FieldId, Resolution};

/// Per-pixel programs the backends know how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Program {
    Splat,
    Curl,
    Vorticity,
    Divergence,
    Clear,
    Pressure,
    GradientSubtract,
    Advection,
    BloomPrefilter,
    BloomBlur,
    SunraysMask,
    Sunrays,
    Display,
}

impl Program {
    pub const ALL: [Program; 13] = [
        Program::Splat,
        Program::Curl,
        Program::Vorticity,
        Program::Divergence,
        Program::Clear,
        Program::Pressure,
        Program::GradientSubtract,
        Program::Advection,
        Program::BloomPrefilter,
        Program::BloomBlur,
        Program::SunraysMask,
        Program::Sunrays,
        Program::Display,
    ];

    /// Number of sampled textures, in binding order.
    pub fn input_count(self) -> usize {
        match self {
            Program::Vorticity
            | Program::Pressure
            | Program::GradientSubtract
            | Program::Advection => 2,
            Program::Display => 3,
            _ => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Program::Splat => "splat",
            Program::Curl => "curl",
            Program::Vorticity => "vorticity",
            Program::Divergence => "divergence",
            Program::Clear => "clear",
            Program::Pressure => "pressure",
            Program::GradientSubtract => "gradient_subtract",
            Program::Advection => "advection",
            Program::BloomPrefilter => "bloom_prefilter",
            Program::BloomBlur => "bloom_blur",
            Program::SunraysMask => "sunrays_mask",
            Program::Sunrays => "sunrays",
            Program::Display => "display",
        }
    }
}

/// Uniform block shared by every program.
///
/// Layout matches `struct Uniforms` in `gpu/shaders/common.wgsl`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PassUniforms {
    pub texel_size: [f32; 2],
    pub aspect_ratio: f32,
    pub dt: f32,
    pub point: [f32; 2],
    pub radius: f32,
    pub value: f32,
    pub color: [f32; 4],
    pub extra: [f32; 4],
}

/// Typed parameter schema of one program.
pub trait KernelParams {
    const PROGRAM: Program;

    /// Sampled fields in binding order. Length is `PROGRAM.input_count()`.
    fn inputs(&self) -> Vec<FieldId>;

    /// Write the scalar/vector parameters into `uniforms`.
    fn pack(&self, uniforms: &mut PassUniforms);
}

/// Radial injection of `color` around `point` into `target`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplatParams {
    pub target: FieldId,
    pub point: [f32; 2],
    pub color: [f32; 3],
    pub radius: f32,
}

impl Default for SplatParams {
    fn default() -> Self {
        Self {
            target: FieldId::Velocity,
            point: [0.5, 0.5],
            color: [0.0; 3],
            radius: 0.005,
        }
    }
}

impl KernelParams for SplatParams {
    const PROGRAM: Program = Program::Splat;

    fn inputs(&self) -> Vec<FieldId> {
        vec![self.target]
    }

    fn pack(&self, u: &mut PassUniforms) {
        u.point = self.point;
        u.radius = self.radius;
        u.color = [self.color[0], self.color[1], self.color[2], 1.0];
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurlParams {
    pub velocity: FieldId,
}

impl Default for CurlParams {
    fn default() -> Self {
        Self {
            velocity: FieldId::Velocity,
        }
    }
}

impl KernelParams for CurlParams {
    const PROGRAM: Program = Program::Curl;

    fn inputs(&self) -> Vec<FieldId> {
        vec![self.velocity]
    }

    fn pack(&self, _: &mut PassUniforms) {}
}

/// Vorticity confinement: pushes velocity along the curl gradient.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VorticityParams {
    pub velocity: FieldId,
    pub curl: FieldId,
    pub strength: f32,
    pub dt: f32,
}

impl Default for VorticityParams {
    fn default() -> Self {
        Self {
            velocity: FieldId::Velocity,
            curl: FieldId::Curl,
            strength: 50.0,
            dt: 0.016,
        }
    }
}

impl KernelParams for VorticityParams {
    const PROGRAM: Program = Program::Vorticity;

    fn inputs(&self) -> Vec<FieldId> {
        vec![self.velocity, self.curl]
    }

    fn pack(&self, u: &mut PassUniforms) {
        u.value = self.strength;
        u.dt = self.dt;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DivergenceParams {
    pub velocity: FieldId,
}

impl Default for DivergenceParams {
    fn default() -> Self {
        Self {
            velocity: FieldId::Velocity,
        }
    }
}

impl KernelParams for DivergenceParams {
    const PROGRAM: Program = Program::Divergence;

    fn inputs(&self) -> Vec<FieldId> {
        vec![self.velocity]
    }

    fn pack(&self, _: &mut PassUniforms) {}
}

/// Scales a texture by `value`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearParams {
    pub texture: FieldId,
    pub value: f32,
}

impl Default for ClearParams {
    fn default() -> Self {
        Self {
            texture: FieldId::Pressure,
            value: 0.8,
        }
    }
}

impl KernelParams for ClearParams {
    const PROGRAM: Program = Program::Clear;

    fn inputs(&self) -> Vec<FieldId> {
        vec![self.texture]
    }

    fn pack(&self, u: &mut PassUniforms) {
        u.value = self.value;
    }
}

/// One Jacobi iteration of the pressure Poisson equation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PressureParams {
    pub pressure: FieldId,
    pub divergence: FieldId,
}

impl Default for PressureParams {
    fn default() -> Self {
        Self {
            pressure: FieldId::Pressure,
            divergence: FieldId::Divergence,
        }
    }
}

impl KernelParams for PressureParams {
    const PROGRAM: Program = Program::Pressure;

    fn inputs(&self) -> Vec<FieldId> {
        vec![self.pressure, self.divergence]
    }

    fn pack(&self, _: &mut PassUniforms) {}
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradientSubtractParams {
    pub pressure: FieldId,
    pub velocity: FieldId,
}

impl Default for GradientSubtractParams {
    fn default() -> Self {
        Self {
            pressure: FieldId::Pressure,
            velocity: FieldId::Velocity,
        }
    }
}

impl KernelParams for GradientSubtractParams {
    const PROGRAM: Program = Program::GradientSubtract;

    fn inputs(&self) -> Vec<FieldId> {
        vec![self.pressure, self.velocity]
    }

    fn pack(&self, _: &mut PassUniforms) {}
}

/// Semi-Lagrangian transport of `source` along `velocity`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdvectionParams {
    pub velocity: FieldId,
    pub source: FieldId,
    /// Multiplicative decay per step; 1.0 keeps the quantity intact.
    pub dissipation: f32,
    pub dt: f32,
}

impl Default for AdvectionParams {
    fn default() -> Self {
        Self {
            velocity: FieldId::Velocity,
            source: FieldId::Velocity,
            dissipation: 1.0,
            dt: 0.016,
        }
    }
}

impl KernelParams for AdvectionParams {
    const PROGRAM: Program = Program::Advection;

    fn inputs(&self) -> Vec<FieldId> {
        vec![self.velocity, self.source]
    }

    fn pack(&self, u: &mut PassUniforms) {
        u.value = self.dissipation;
        u.dt = self.dt;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BloomPrefilterParams {
    pub texture: FieldId,
    pub threshold: f32,
}

impl Default for BloomPrefilterParams {
    fn default() -> Self {
        Self {
            texture: FieldId::Density,
            threshold: 0.6,
        }
    }
}

impl KernelParams for BloomPrefilterParams {
    const PROGRAM: Program = Program::BloomPrefilter;

    fn inputs(&self) -> Vec<FieldId> {
        vec![self.texture]
    }

    fn pack(&self, u: &mut PassUniforms) {
        u.value = self.threshold;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BloomBlurParams {
    pub texture: FieldId,
}

impl Default for BloomBlurParams {
    fn default() -> Self {
        Self {
            texture: FieldId::Bloom,
        }
    }
}

impl KernelParams for BloomBlurParams {
    const PROGRAM: Program = Program::BloomBlur;

    fn inputs(&self) -> Vec<FieldId> {
        vec![self.texture]
    }

    fn pack(&self, _: &mut PassUniforms) {}
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SunraysMaskParams {
    pub texture: FieldId,
}

impl Default for SunraysMaskParams {
    fn default() -> Self {
        Self {
            texture: FieldId::Density,
        }
    }
}

impl KernelParams for SunraysMaskParams {
    const PROGRAM: Program = Program::SunraysMask;

    fn inputs(&self) -> Vec<FieldId> {
        vec![self.texture]
    }

    fn pack(&self, _: &mut PassUniforms) {}
}

/// Radial blur of the sunrays mask towards `sun_position`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SunraysParams {
    pub texture: FieldId,
    pub sun_position: [f32; 2],
    pub weight: f32,
    pub decay: f32,
    pub exposure: f32,
}

impl Default for SunraysParams {
    fn default() -> Self {
        Self {
            texture: FieldId::SunraysMask,
            sun_position: [0.5, 0.5],
            weight: 1.0,
            decay: 0.95,
            exposure: 0.3,
        }
    }
}

impl KernelParams for SunraysParams {
    const PROGRAM: Program = Program::Sunrays;

    fn inputs(&self) -> Vec<FieldId> {
        vec![self.texture]
    }

    fn pack(&self, u: &mut PassUniforms) {
        u.point = self.sun_position;
        u.extra = [self.weight, self.decay, self.exposure, 0.0];
    }
}

/// Final composite of dye, bloom, sunrays and background.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayParams {
    pub density: FieldId,
    pub bloom: Option<FieldId>,
    pub sunrays: Option<FieldId>,
    pub bloom_intensity: f32,
    pub sunrays_intensity: f32,
    pub background: [f32; 3],
    pub show_background: bool,
}

impl Default for DisplayParams {
    fn default() -> Self {
        Self {
            density: FieldId::Density,
            bloom: None,
            sunrays: None,
            bloom_intensity: 1.0,
            sunrays_intensity: 1.0,
            background: [0.0; 3],
            show_background: true,
        }
    }
}

impl KernelParams for DisplayParams {
    const PROGRAM: Program = Program::Display;

    fn inputs(&self) -> Vec<FieldId> {
        // Disabled effects bind the dye again; their weight is zeroed in `pack`
        vec![
            self.density,
            self.bloom.unwrap_or(self.density),
            self.sunrays.unwrap_or(self.density),
        ]
    }

    fn pack(&self, u: &mut PassUniforms) {
        let [r, g, b] = self.background;
        u.color = [r, g, b, if self.show_background { 1.0 } else { 0.0 }];
        u.extra = [
            if self.bloom.is_some() {
                self.bloom_intensity
            } else {
                0.0
            },
            if self.sunrays.is_some() {
                self.sunrays_intensity
            } else {
                0.0
            },
            0.0,
            0.0,
        ];
    }
}

/// A program's parameters plus its resolution-derived uniforms.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelConfig<P> {
    pub params: P,
    texel_size: [f32; 2],
    aspect_ratio: f32,
}

impl<P: KernelParams> KernelConfig<P> {
    pub fn new(params: P) -> Self {
        Self {
            params,
            texel_size: [0.0; 2],
            aspect_ratio: 1.0,
        }
    }

    #[inline]
    pub fn texel_size(&self) -> [f32; 2] {
        self.texel_size
    }

    #[inline]
    pub fn aspect_ratio(&self) -> f32 {
        self.aspect_ratio
    }

    fn set_resolution(&mut self, texel_size: [f32; 2], aspect_ratio: f32) {
        self.texel_size = texel_size;
        self.aspect_ratio = aspect_ratio;
    }

    /// Full uniform block for the next dispatch.
    pub fn uniforms(&self) -> PassUniforms {
        let mut uniforms = PassUniforms {
            texel_size: self.texel_size,
            aspect_ratio: self.aspect_ratio,
            ..Default::default()
        };
        self.params.pack(&mut uniforms);
        uniforms
    }
}

impl<P: KernelParams + Default> Default for KernelConfig<P> {
    fn default() -> Self {
        Self::new(P::default())
    }
}

/// One configuration per stage.
#[derive(Debug, Clone, Default)]
pub struct KernelSet {
    pub splat: KernelConfig<SplatParams>,
    pub curl: KernelConfig<CurlParams>,
    pub vorticity: KernelConfig<VorticityParams>,
    pub divergence: KernelConfig<DivergenceParams>,
    pub clear: KernelConfig<ClearParams>,
    pub pressure: KernelConfig<PressureParams>,
    pub gradient_subtract: KernelConfig<GradientSubtractParams>,
    pub advection: KernelConfig<AdvectionParams>,
    pub bloom_prefilter: KernelConfig<BloomPrefilterParams>,
    pub bloom_blur: KernelConfig<BloomBlurParams>,
    pub sunrays_mask: KernelConfig<SunraysMaskParams>,
    pub sunrays: KernelConfig<SunraysParams>,
    pub display: KernelConfig<DisplayParams>,
}

impl KernelSet {
    pub fn new(resolution: &Resolution) -> Self {
        let mut set = Self::default();
        set.apply_resolution(resolution);
        set
    }

    /// Refresh texel size and aspect ratio on every configuration.
    ///
    /// Bloom blur runs at surface resolution; everything else uses the
    /// simulation texel size.
    pub fn apply_resolution(&mut self, resolution: &Resolution) {
        let texel = resolution.texel_size();
        let aspect = resolution.aspect_ratio;

        self.splat.set_resolution(texel, aspect);
        self.curl.set_resolution(texel, aspect);
        self.vorticity.set_resolution(texel, aspect);
        self.divergence.set_resolution(texel, aspect);
        self.clear.set_resolution(texel, aspect);
        self.pressure.set_resolution(texel, aspect);
        self.gradient_subtract.set_resolution(texel, aspect);
        self.advection.set_resolution(texel, aspect);
        self.bloom_prefilter.set_resolution(texel, aspect);
        self.bloom_blur
            .set_resolution(resolution.surface_texel_size(), aspect);
        self.sunrays_mask.set_resolution(texel, aspect);
        self.sunrays.set_resolution(texel, aspect);
        self.display.set_resolution(texel, aspect);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_block_is_std140_sized() {
        assert_eq!(std::mem::size_of::<PassUniforms>(), 64);
    }

    #[test]
    fn test_input_counts_match_schemas() {
        assert_eq!(
            SplatParams::default().inputs().len(),
            Program::Splat.input_count()
        );
        assert_eq!(
            AdvectionParams::default().inputs().len(),
            Program::Advection.input_count()
        );
        assert_eq!(
            VorticityParams::default().inputs().len(),
            Program::Vorticity.input_count()
        );
        assert_eq!(
            DisplayParams::default().inputs().len(),
            Program::Display.input_count()
        );
        assert_eq!(
            PressureParams::default().inputs().len(),
            Program::Pressure.input_count()
        );
    }

    #[test]
    fn test_splat_packing() {
        let config = KernelConfig::new(SplatParams {
            target: FieldId::Density,
            point: [0.25, 0.75],
            color: [1.0, 2.0, 3.0],
            radius: 0.005,
        });
        let u = config.uniforms();
        assert_eq!(u.point, [0.25, 0.75]);
        assert_eq!(u.radius, 0.005);
        assert_eq!(u.color, [1.0, 2.0, 3.0, 1.0]);
        assert_eq!(config.params.inputs(), vec![FieldId::Density]);
    }

    #[test]
    fn test_resolution_reaches_every_kernel() {
        let res = Resolution::new(128, 512, 1600, 800);
        let set = KernelSet::new(&res);
        let texel = [1.0 / 256.0, 1.0 / 128.0];

        assert_eq!(set.splat.texel_size(), texel);
        assert_eq!(set.advection.texel_size(), texel);
        assert_eq!(set.pressure.texel_size(), texel);
        assert_eq!(set.splat.aspect_ratio(), 2.0);
        assert_eq!(set.bloom_blur.texel_size(), [1.0 / 1600.0, 1.0 / 800.0]);
        assert_eq!(set.advection.uniforms().texel_size, texel);
    }

    #[test]
    fn test_display_zeroes_disabled_effects() {
        let params = DisplayParams {
            bloom: None,
            sunrays: Some(FieldId::Sunrays),
            sunrays_intensity: 0.1,
            bloom_intensity: 0.2,
            ..Default::default()
        };
        let mut u = PassUniforms::default();
        params.pack(&mut u);
        assert_eq!(u.extra[0], 0.0);
        assert_eq!(u.extra[1], 0.1);
        assert_eq!(
            params.inputs(),
            vec![FieldId::Density, FieldId::Density, FieldId::Sunrays]
        );
    }
}
