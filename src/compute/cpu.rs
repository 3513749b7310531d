//! CPU Backend - host-side reference evaluation of the fluid kernels.
//!
//! Mirrors the WGSL programs texel for texel: the same uniform block, the
//! same `uv = (index + 0.5) / size` convention and clamp-to-edge sampling
//! with nearest or bilinear filtering. Samples are stored as `f32`.

use std::collections::HashMap;

use rayon::prelude::*;

use super::{
    Backend, BufferId, BufferSpec, FilterMode, GridBuffer, PassUniforms, PipelineError, Program,
};

/// Largest grid edge accepted by default, matching wgpu's default limit.
pub const DEFAULT_MAX_DIMENSION: u32 = 8192;

const SUNRAYS_ITERATIONS: usize = 16;
const SUNRAYS_DENSITY: f32 = 0.3;

/// Host storage for one grid buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    width: usize,
    height: usize,
    channels: usize,
    filter: FilterMode,
    data: Vec<f32>,
}

impl Grid {
    fn new(spec: &BufferSpec) -> Self {
        let channels = spec.format.channels();
        Self {
            width: spec.width as usize,
            height: spec.height as usize,
            channels,
            filter: spec.filter,
            data: vec![0.0; spec.texel_count() * channels],
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Texel at `(x, y)` (clamped), widened to RGBA like a texture fetch:
    /// missing color channels read 0 and missing alpha reads 1.
    pub fn texel(&self, x: i64, y: i64) -> [f32; 4] {
        let x = x.clamp(0, self.width as i64 - 1) as usize;
        let y = y.clamp(0, self.height as i64 - 1) as usize;
        let start = (y * self.width + x) * self.channels;

        let mut out = [0.0, 0.0, 0.0, 1.0];
        out[..self.channels].copy_from_slice(&self.data[start..start + self.channels]);
        out
    }

    /// Overwrite the texel at `(x, y)` with the first `channels` of `value`.
    pub fn set(&mut self, x: usize, y: usize, value: [f32; 4]) {
        let start = (y * self.width + x) * self.channels;
        self.data[start..start + self.channels].copy_from_slice(&value[..self.channels]);
    }

    /// Fill every texel with `value`.
    pub fn fill(&mut self, value: [f32; 4]) {
        for texel in self.data.chunks_exact_mut(self.channels) {
            texel.copy_from_slice(&value[..self.channels]);
        }
    }

    /// Sample at normalized coordinates using the grid's filter mode.
    pub fn sample(&self, uv: [f32; 2]) -> [f32; 4] {
        let x = uv[0] * self.width as f32;
        let y = uv[1] * self.height as f32;

        match self.filter {
            FilterMode::Nearest => self.texel(x.floor() as i64, y.floor() as i64),
            FilterMode::Linear => {
                let x = x - 0.5;
                let y = y - 0.5;
                let x0 = x.floor();
                let y0 = y.floor();
                let fx = x - x0;
                let fy = y - y0;
                // Keep the +1 neighbour in range for far out-of-bounds uv
                let x0 = (x0 as i64).clamp(-1, self.width as i64);
                let y0 = (y0 as i64).clamp(-1, self.height as i64);

                let a = self.texel(x0, y0);
                let b = self.texel(x0 + 1, y0);
                let c = self.texel(x0, y0 + 1);
                let d = self.texel(x0 + 1, y0 + 1);

                let mut out = [0.0; 4];
                for k in 0..4 {
                    let top = a[k] + (b[k] - a[k]) * fx;
                    let bottom = c[k] + (d[k] - c[k]) * fx;
                    out[k] = top + (bottom - top) * fy;
                }
                out
            }
        }
    }

    /// Sample at the center of texel `(x, y)`.
    pub fn at(&self, x: usize, y: usize) -> [f32; 4] {
        self.texel(x as i64, y as i64)
    }

    /// Summary statistics over every stored value.
    pub fn stats(&self) -> GridStats {
        let mut stats = GridStats {
            min: f32::INFINITY,
            max: f32::NEG_INFINITY,
            total: 0.0,
            non_finite: 0,
        };
        for &v in &self.data {
            if !v.is_finite() {
                stats.non_finite += 1;
                continue;
            }
            stats.min = stats.min.min(v);
            stats.max = stats.max.max(v);
            stats.total += v as f64;
        }
        if stats.min > stats.max {
            stats.min = 0.0;
            stats.max = 0.0;
        }
        stats
    }
}

/// Value summary of one grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridStats {
    pub min: f32,
    pub max: f32,
    /// Sum of every finite value across all channels.
    pub total: f64,
    /// NaN or infinite values.
    pub non_finite: usize,
}

impl GridStats {
    /// Largest absolute value.
    pub fn max_abs(&self) -> f32 {
        self.min.abs().max(self.max.abs())
    }
}

/// Reference backend evaluating kernels on host memory.
#[derive(Debug)]
pub struct CpuBackend {
    grids: HashMap<BufferId, Grid>,
    next_id: u64,
    allocations: usize,
    max_dimension: u32,
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::with_max_dimension(DEFAULT_MAX_DIMENSION)
    }

    /// Backend that rejects grids with an edge longer than `max_dimension`.
    pub fn with_max_dimension(max_dimension: u32) -> Self {
        Self {
            grids: HashMap::new(),
            next_id: 1,
            allocations: 0,
            max_dimension,
        }
    }

    /// Buffers currently allocated.
    pub fn live_buffers(&self) -> usize {
        self.grids.len()
    }

    /// Buffers allocated over the backend's lifetime.
    pub fn allocations(&self) -> usize {
        self.allocations
    }

    pub fn is_live(&self, id: BufferId) -> bool {
        self.grids.contains_key(&id)
    }

    /// Host copy of a live buffer, for tests and diagnostics.
    pub fn grid(&self, id: BufferId) -> Option<&Grid> {
        self.grids.get(&id)
    }

    pub fn grid_mut(&mut self, id: BufferId) -> Option<&mut Grid> {
        self.grids.get_mut(&id)
    }

    pub fn stats(&self, id: BufferId) -> Option<GridStats> {
        self.grid(id).map(Grid::stats)
    }
}

impl Backend for CpuBackend {
    fn allocate(&mut self, spec: BufferSpec) -> Result<GridBuffer, PipelineError> {
        if spec.width == 0
            || spec.height == 0
            || spec.width > self.max_dimension
            || spec.height > self.max_dimension
        {
            return Err(PipelineError::OutOfDeviceMemory {
                width: spec.width,
                height: spec.height,
                format: spec.format,
            });
        }

        let id = BufferId(self.next_id);
        self.next_id += 1;
        self.allocations += 1;
        self.grids.insert(id, Grid::new(&spec));
        Ok(GridBuffer::new(id, spec))
    }

    fn dispose(&mut self, buffer: GridBuffer) {
        if self.grids.remove(&buffer.id()).is_none() {
            log::error!("dispose of unknown {}", buffer.id());
            debug_assert!(false, "dispose of unknown {}", buffer.id());
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

        let mut out = self
            .grids
            .remove(&target.id())
            .ok_or(PipelineError::UnknownBuffer(target.id()))?;

        let sources: Result<Vec<&Grid>, PipelineError> = inputs
            .iter()
            .map(|input| {
                self.grids
                    .get(&input.id())
                    .ok_or(PipelineError::UnknownBuffer(input.id()))
            })
            .collect();

        let result = sources.map(|sources| evaluate(program, uniforms, &sources, &mut out));
        self.grids.insert(target.id(), out);
        result
    }
}

/// Run `program` over every texel of `out`.
fn evaluate(program: Program, u: &PassUniforms, inputs: &[&Grid], out: &mut Grid) {
    let (width, height, channels) = (out.width, out.height, out.channels);

    out.data
        .par_chunks_mut(width * channels)
        .enumerate()
        .for_each(|(y, row)| {
            let v = (y as f32 + 0.5) / height as f32;
            for x in 0..width {
                let uv = [(x as f32 + 0.5) / width as f32, v];
                let value = shade(program, u, inputs, uv);
                row[x * channels..(x + 1) * channels].copy_from_slice(&value[..channels]);
            }
        });
}

/// Neighbor coordinates one simulation texel away.
struct Stencil {
    left: [f32; 2],
    right: [f32; 2],
    top: [f32; 2],
    bottom: [f32; 2],
}

impl Stencil {
    fn new(uv: [f32; 2], texel: [f32; 2]) -> Self {
        Self {
            left: [uv[0] - texel[0], uv[1]],
            right: [uv[0] + texel[0], uv[1]],
            top: [uv[0], uv[1] + texel[1]],
            bottom: [uv[0], uv[1] - texel[1]],
        }
    }
}

fn shade(program: Program, u: &PassUniforms, t: &[&Grid], uv: [f32; 2]) -> [f32; 4] {
    let s = Stencil::new(uv, u.texel_size);

    match program {
        Program::Splat => {
            let px = (uv[0] - u.point[0]) * u.aspect_ratio;
            let py = uv[1] - u.point[1];
            let falloff = (-(px * px + py * py) / u.radius).exp();
            let base = t[0].sample(uv);
            [
                base[0] + falloff * u.color[0],
                base[1] + falloff * u.color[1],
                base[2] + falloff * u.color[2],
                1.0,
            ]
        }
        Program::Curl => {
            let velocity = t[0];
            let l = velocity.sample(s.left)[1];
            let r = velocity.sample(s.right)[1];
            let top = velocity.sample(s.top)[0];
            let b = velocity.sample(s.bottom)[0];
            [0.5 * (r - l - top + b), 0.0, 0.0, 1.0]
        }
        Program::Vorticity => {
            let (velocity, curl) = (t[0], t[1]);
            let l = curl.sample(s.left)[0];
            let r = curl.sample(s.right)[0];
            let top = curl.sample(s.top)[0];
            let b = curl.sample(s.bottom)[0];
            let c = curl.sample(uv)[0];

            let mut fx = 0.5 * (top.abs() - b.abs());
            let mut fy = 0.5 * (r.abs() - l.abs());
            let len = (fx * fx + fy * fy).sqrt() + 0.0001;
            fx = fx / len * u.value * c;
            fy = -fy / len * u.value * c;

            let vel = velocity.sample(uv);
            [
                (vel[0] + fx * u.dt).clamp(-1000.0, 1000.0),
                (vel[1] + fy * u.dt).clamp(-1000.0, 1000.0),
                0.0,
                1.0,
            ]
        }
        Program::Divergence => {
            let velocity = t[0];
            let c = velocity.sample(uv);
            // Reflect velocity at the walls so no flow leaves the domain
            let l = if s.left[0] < 0.0 {
                -c[0]
            } else {
                velocity.sample(s.left)[0]
            };
            let r = if s.right[0] > 1.0 {
                -c[0]
            } else {
                velocity.sample(s.right)[0]
            };
            let top = if s.top[1] > 1.0 {
                -c[1]
            } else {
                velocity.sample(s.top)[1]
            };
            let b = if s.bottom[1] < 0.0 {
                -c[1]
            } else {
                velocity.sample(s.bottom)[1]
            };
            [0.5 * (r - l + top - b), 0.0, 0.0, 1.0]
        }
        Program::Clear => t[0].sample(uv).map(|c| c * u.value),
        Program::Pressure => {
            let (pressure, divergence) = (t[0], t[1]);
            let l = pressure.sample(s.left)[0];
            let r = pressure.sample(s.right)[0];
            let top = pressure.sample(s.top)[0];
            let b = pressure.sample(s.bottom)[0];
            let div = divergence.sample(uv)[0];
            [(l + r + b + top - div) * 0.25, 0.0, 0.0, 1.0]
        }
        Program::GradientSubtract => {
            let (pressure, velocity) = (t[0], t[1]);
            let l = pressure.sample(s.left)[0];
            let r = pressure.sample(s.right)[0];
            let top = pressure.sample(s.top)[0];
            let b = pressure.sample(s.bottom)[0];
            let vel = velocity.sample(uv);
            [vel[0] - (r - l), vel[1] - (top - b), 0.0, 1.0]
        }
        Program::Advection => {
            let (velocity, source) = (t[0], t[1]);
            let vel = velocity.sample(uv);
            let coord = [
                uv[0] - u.dt * vel[0] * u.texel_size[0],
                uv[1] - u.dt * vel[1] * u.texel_size[1],
            ];
            source.sample(coord).map(|c| c * u.value)
        }
        Program::BloomPrefilter => {
            let c = t[0].sample(uv);
            let brightness = c[0].max(c[1]).max(c[2]);
            let contribution = (brightness - u.value).max(0.0) / brightness.max(0.0001);
            [
                c[0] * contribution,
                c[1] * contribution,
                c[2] * contribution,
                1.0,
            ]
        }
        Program::BloomBlur => {
            let [tx, ty] = u.texel_size;
            let mut sum = [0.0; 4];
            for offset in [[-tx, -ty], [tx, -ty], [-tx, ty], [tx, ty]] {
                let c = t[0].sample([uv[0] + offset[0], uv[1] + offset[1]]);
                for k in 0..4 {
                    sum[k] += c[k] * 0.25;
                }
            }
            sum
        }
        Program::SunraysMask => {
            let c = t[0].sample(uv);
            let brightness = c[0].max(c[1]).max(c[2]);
            [c[0], c[1], c[2], 1.0 - (brightness * 20.0).clamp(0.0, 0.8)]
        }
        Program::Sunrays => {
            let [weight, decay, exposure, _] = u.extra;
            let step = SUNRAYS_DENSITY / SUNRAYS_ITERATIONS as f32;
            let dir = [(uv[0] - u.point[0]) * step, (uv[1] - u.point[1]) * step];

            let mut coord = uv;
            let mut illumination = 1.0;
            let mut color = t[0].sample(uv)[3];
            for _ in 0..SUNRAYS_ITERATIONS {
                coord = [coord[0] - dir[0], coord[1] - dir[1]];
                color += t[0].sample(coord)[3] * illumination * weight;
                illumination *= decay;
            }
            [color * exposure, 0.0, 0.0, 1.0]
        }
        Program::Display => {
            let density = t[0].sample(uv);
            let bloom = t[1].sample(uv);
            let sunrays = t[2].sample(uv)[0];
            let [bloom_weight, sunrays_weight, ..] = u.extra;

            let mut c = [0.0; 3];
            for k in 0..3 {
                c[k] = density[k] + bloom[k] * bloom_weight + sunrays * sunrays_weight;
            }
            let alpha = c[0].max(c[1]).max(c[2]).clamp(0.0, 1.0);

            if u.color[3] > 0.5 {
                let mut out = [0.0, 0.0, 0.0, 1.0];
                for k in 0..3 {
                    out[k] = u.color[k] + (c[k] - u.color[k]) * alpha;
                }
                out
            } else {
                [c[0], c[1], c[2], alpha]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::BufferFormat;

    fn uniforms(texel: [f32; 2]) -> PassUniforms {
        PassUniforms {
            texel_size: texel,
            aspect_ratio: 1.0,
            ..Default::default()
        }
    }

    fn spec(size: u32, format: BufferFormat, filter: FilterMode) -> BufferSpec {
        BufferSpec::new(size, size, format, filter)
    }

    #[test]
    fn test_allocation_is_zeroed_and_tracked() {
        let mut backend = CpuBackend::new();
        let buffer = backend
            .allocate(spec(4, BufferFormat::Rg16Float, FilterMode::Linear))
            .unwrap();
        let grid = backend.grid(buffer.id()).unwrap();
        assert_eq!(grid.data().len(), 32);
        assert!(grid.data().iter().all(|&v| v == 0.0));
        assert_eq!(grid.at(1, 1), [0.0, 0.0, 0.0, 1.0]);

        let id = buffer.id();
        backend.dispose(buffer);
        assert!(!backend.is_live(id));
        assert_eq!(backend.allocations(), 1);
    }

    #[test]
    fn test_oversized_allocation_fails() {
        let mut backend = CpuBackend::with_max_dimension(16);
        let err = backend
            .allocate(spec(32, BufferFormat::R16Float, FilterMode::Nearest))
            .unwrap_err();
        assert!(matches!(err, PipelineError::OutOfDeviceMemory { width: 32, .. }));
        assert_eq!(backend.live_buffers(), 0);
    }

    #[test]
    fn test_bilinear_sampling_interpolates_and_clamps() {
        let mut backend = CpuBackend::new();
        let buffer = backend
            .allocate(BufferSpec::new(2, 1, BufferFormat::R16Float, FilterMode::Linear))
            .unwrap();
        let grid = backend.grid_mut(buffer.id()).unwrap();
        grid.set(0, 0, [0.0; 4]);
        grid.set(1, 0, [1.0, 0.0, 0.0, 0.0]);

        let grid = backend.grid(buffer.id()).unwrap();
        assert_eq!(grid.sample([0.25, 0.5])[0], 0.0);
        assert_eq!(grid.sample([0.75, 0.5])[0], 1.0);
        assert!((grid.sample([0.5, 0.5])[0] - 0.5).abs() < 1e-6);
        // Clamp to edge outside the grid
        assert_eq!(grid.sample([-1.0, 0.5])[0], 0.0);
        assert_eq!(grid.sample([2.0, 0.5])[0], 1.0);
    }

    #[test]
    fn test_sampling_far_outside_stays_at_edge() {
        let mut backend = CpuBackend::new();
        let buffer = backend
            .allocate(BufferSpec::new(2, 2, BufferFormat::R16Float, FilterMode::Linear))
            .unwrap();
        let grid = backend.grid_mut(buffer.id()).unwrap();
        grid.set(1, 0, [1.0, 0.0, 0.0, 0.0]);
        grid.set(1, 1, [1.0, 0.0, 0.0, 0.0]);

        let grid = backend.grid(buffer.id()).unwrap();
        assert_eq!(grid.sample([1e30, 0.5])[0], 1.0);
        assert_eq!(grid.sample([-1e30, 1e30])[0], 0.0);
        // Saturating casts must not overflow the neighbour index
        let _ = grid.sample([f32::INFINITY, f32::NEG_INFINITY]);
        let _ = grid.sample([f32::NAN, f32::INFINITY]);
    }

    #[test]
    fn test_draw_rejects_feedback() {
        let mut backend = CpuBackend::new();
        let buffer = backend
            .allocate(spec(4, BufferFormat::R16Float, FilterMode::Nearest))
            .unwrap();
        let err = backend
            .draw(Program::Clear, &uniforms([0.25, 0.25]), &[&buffer], &buffer)
            .unwrap_err();
        assert!(matches!(err, PipelineError::FeedbackLoop { .. }));
        // The target survives the rejected pass
        assert!(backend.is_live(buffer.id()));
    }

    #[test]
    fn test_clear_scales_every_texel() {
        let mut backend = CpuBackend::new();
        let format = BufferFormat::R16Float;
        let src = backend.allocate(spec(4, format, FilterMode::Nearest)).unwrap();
        let dst = backend.allocate(spec(4, format, FilterMode::Nearest)).unwrap();
        backend.grid_mut(src.id()).unwrap().fill([2.0, 0.0, 0.0, 0.0]);

        let mut u = uniforms([0.25, 0.25]);
        u.value = 0.8;
        backend.draw(Program::Clear, &u, &[&src], &dst).unwrap();

        let out = backend.grid(dst.id()).unwrap();
        assert!(out.data().iter().all(|&v| (v - 1.6).abs() < 1e-6));
    }

    #[test]
    fn test_divergence_of_uniform_flow_is_zero_inside() {
        let mut backend = CpuBackend::new();
        let vel = backend
            .allocate(spec(8, BufferFormat::Rg16Float, FilterMode::Linear))
            .unwrap();
        let div = backend
            .allocate(spec(8, BufferFormat::R16Float, FilterMode::Nearest))
            .unwrap();
        backend.grid_mut(vel.id()).unwrap().fill([1.0, 0.0, 0.0, 0.0]);

        backend
            .draw(Program::Divergence, &uniforms([0.125, 0.125]), &[&vel], &div)
            .unwrap();

        let out = backend.grid(div.id()).unwrap();
        for y in 0..8 {
            for x in 1..7 {
                assert!(out.at(x, y)[0].abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_jacobi_relaxes_toward_poisson_solution() {
        // One iteration with zero pressure gives -div/4
        let mut backend = CpuBackend::new();
        let format = BufferFormat::R16Float;
        let p0 = backend.allocate(spec(4, format, FilterMode::Nearest)).unwrap();
        let p1 = backend.allocate(spec(4, format, FilterMode::Nearest)).unwrap();
        let div = backend.allocate(spec(4, format, FilterMode::Nearest)).unwrap();
        backend.grid_mut(div.id()).unwrap().fill([1.0, 0.0, 0.0, 0.0]);

        backend
            .draw(Program::Pressure, &uniforms([0.25, 0.25]), &[&p0, &div], &p1)
            .unwrap();
        let out = backend.grid(p1.id()).unwrap();
        assert!(out.data().iter().all(|&v| (v + 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_gradient_subtract_removes_pressure_slope() {
        let mut backend = CpuBackend::new();
        let n = 8;
        let pressure = backend
            .allocate(spec(n, BufferFormat::R16Float, FilterMode::Nearest))
            .unwrap();
        let vel = backend
            .allocate(spec(n, BufferFormat::Rg16Float, FilterMode::Linear))
            .unwrap();
        let out = backend
            .allocate(spec(n, BufferFormat::Rg16Float, FilterMode::Linear))
            .unwrap();
        {
            let grid = backend.grid_mut(pressure.id()).unwrap();
            for y in 0..n as usize {
                for x in 0..n as usize {
                    grid.set(x, y, [x as f32, 0.0, 0.0, 0.0]);
                }
            }
        }
        backend.grid_mut(vel.id()).unwrap().fill([5.0, 1.0, 0.0, 0.0]);

        let texel = 1.0 / n as f32;
        backend
            .draw(
                Program::GradientSubtract,
                &uniforms([texel, texel]),
                &[&pressure, &vel],
                &out,
            )
            .unwrap();

        // Interior: R - L = 2, T - B = 0
        let v = backend.grid(out.id()).unwrap().at(3, 3);
        assert!((v[0] - 3.0).abs() < 1e-5);
        assert!((v[1] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_advection_with_zero_velocity_applies_dissipation() {
        let mut backend = CpuBackend::new();
        let vel = backend
            .allocate(spec(4, BufferFormat::Rg16Float, FilterMode::Linear))
            .unwrap();
        let src = backend
            .allocate(spec(4, BufferFormat::Rgba16Float, FilterMode::Linear))
            .unwrap();
        let dst = backend
            .allocate(spec(4, BufferFormat::Rgba16Float, FilterMode::Linear))
            .unwrap();
        backend.grid_mut(src.id()).unwrap().fill([1.0, 0.5, 0.25, 1.0]);

        let mut u = uniforms([0.25, 0.25]);
        u.dt = 0.016;
        u.value = 0.9;
        backend
            .draw(Program::Advection, &u, &[&vel, &src], &dst)
            .unwrap();

        let c = backend.grid(dst.id()).unwrap().at(2, 2);
        assert!((c[0] - 0.9).abs() < 1e-6);
        assert!((c[1] - 0.45).abs() < 1e-6);
    }

    #[test]
    fn test_advection_transports_along_velocity() {
        let mut backend = CpuBackend::new();
        let n = 16;
        let vel = backend
            .allocate(spec(n, BufferFormat::Rg16Float, FilterMode::Linear))
            .unwrap();
        let src = backend
            .allocate(spec(n, BufferFormat::Rgba16Float, FilterMode::Linear))
            .unwrap();
        let dst = backend
            .allocate(spec(n, BufferFormat::Rgba16Float, FilterMode::Linear))
            .unwrap();
        // One texel per step to the right
        let mut u = uniforms([1.0 / n as f32; 2]);
        u.dt = 1.0;
        u.value = 1.0;
        backend.grid_mut(vel.id()).unwrap().fill([1.0, 0.0, 0.0, 0.0]);
        backend.grid_mut(src.id()).unwrap().set(5, 5, [1.0; 4]);

        backend
            .draw(Program::Advection, &u, &[&vel, &src], &dst)
            .unwrap();

        let out = backend.grid(dst.id()).unwrap();
        assert!((out.at(6, 5)[0] - 1.0).abs() < 1e-5);
        assert!(out.at(5, 5)[0].abs() < 1e-5);
    }

    #[test]
    fn test_stats_flag_non_finite_values() {
        let mut backend = CpuBackend::new();
        let buffer = backend
            .allocate(spec(2, BufferFormat::R16Float, FilterMode::Nearest))
            .unwrap();
        let grid = backend.grid_mut(buffer.id()).unwrap();
        grid.set(0, 0, [f32::NAN, 0.0, 0.0, 0.0]);
        grid.set(1, 0, [-3.0, 0.0, 0.0, 0.0]);
        grid.set(0, 1, [2.0, 0.0, 0.0, 0.0]);

        let stats = backend.stats(buffer.id()).unwrap();
        assert_eq!(stats.non_finite, 1);
        assert_eq!(stats.min, -3.0);
        assert_eq!(stats.max, 2.0);
        assert_eq!(stats.max_abs(), 3.0);
        assert_eq!(stats.total, -1.0);
    }
}
