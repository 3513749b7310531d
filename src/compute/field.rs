//! Grid buffers, double-buffered fields and the field registry.
//!
//! A [`GridBuffer`] is an opaque handle to a 2-D array of half-float samples
//! owned by a [`Backend`]. Handles are not `Clone`: the only way to release
//! one is to move it into [`Backend::dispose`], so a buffer cannot be freed
//! twice.

use std::collections::BTreeMap;
use std::fmt;

use super::{Backend, PipelineError};
use crate::schema::FluidConfig;

/// Sample format of a grid buffer. All formats are half-precision floats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferFormat {
    R16Float,
    Rg16Float,
    Rgba16Float,
}

impl BufferFormat {
    /// Number of channels stored per texel.
    #[inline]
    pub fn channels(self) -> usize {
        match self {
            BufferFormat::R16Float => 1,
            BufferFormat::Rg16Float => 2,
            BufferFormat::Rgba16Float => 4,
        }
    }
}

/// Filtering used when a kernel samples the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Nearest,
    Linear,
}

/// Immutable description of a grid buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferSpec {
    pub width: u32,
    pub height: u32,
    pub format: BufferFormat,
    pub filter: FilterMode,
}

impl BufferSpec {
    pub fn new(width: u32, height: u32, format: BufferFormat, filter: FilterMode) -> Self {
        Self {
            width,
            height,
            format,
            filter,
        }
    }

    #[inline]
    pub fn texel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Backend-unique buffer identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BufferId(pub u64);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buffer#{}", self.0)
    }
}

/// Handle to one backend-owned grid buffer.
#[derive(Debug, PartialEq, Eq)]
pub struct GridBuffer {
    id: BufferId,
    spec: BufferSpec,
}

impl GridBuffer {
    /// Mint a handle. Called by backends when they allocate storage for `id`.
    pub fn new(id: BufferId, spec: BufferSpec) -> Self {
        Self { id, spec }
    }

    #[inline]
    pub fn id(&self) -> BufferId {
        self.id
    }

    #[inline]
    pub fn spec(&self) -> &BufferSpec {
        &self.spec
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.spec.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.spec.height
    }
}

/// Two buffers of identical spec with swappable read/write roles.
#[derive(Debug)]
pub struct DoubleBuffer {
    buffers: [GridBuffer; 2],
    read: usize,
}

impl DoubleBuffer {
    /// Pair two buffers. `first` starts as the read side.
    pub fn new(first: GridBuffer, second: GridBuffer) -> Self {
        debug_assert_eq!(first.spec, second.spec, "double buffer halves must match");
        debug_assert_ne!(first.id, second.id);
        Self {
            buffers: [first, second],
            read: 0,
        }
    }

    /// Buffer that holds the latest result and is safe to sample.
    #[inline]
    pub fn read(&self) -> &GridBuffer {
        &self.buffers[self.read]
    }

    /// Buffer that is safe to render into.
    #[inline]
    pub fn write(&self) -> &GridBuffer {
        &self.buffers[self.read ^ 1]
    }

    /// Exchange the read and write roles. No sample data moves.
    #[inline]
    pub fn swap(&mut self) {
        self.read ^= 1;
    }

    pub fn spec(&self) -> &BufferSpec {
        self.buffers[0].spec()
    }

    pub fn into_buffers(self) -> [GridBuffer; 2] {
        self.buffers
    }
}

/// Storage for one simulation quantity.
#[derive(Debug)]
pub enum Field {
    Single(GridBuffer),
    Double(DoubleBuffer),
}

impl Field {
    /// Buffer a pass should sample from.
    #[inline]
    pub fn read(&self) -> &GridBuffer {
        match self {
            Field::Single(buffer) => buffer,
            Field::Double(pair) => pair.read(),
        }
    }

    /// Buffer a pass should render into.
    #[inline]
    pub fn target(&self) -> &GridBuffer {
        match self {
            Field::Single(buffer) => buffer,
            Field::Double(pair) => pair.write(),
        }
    }

    /// Publish the result of a pass that rendered into [`Field::target`].
    #[inline]
    pub fn advance(&mut self) {
        if let Field::Double(pair) = self {
            pair.swap();
        }
    }

    #[inline]
    pub fn is_double(&self) -> bool {
        matches!(self, Field::Double(_))
    }

    pub fn spec(&self) -> &BufferSpec {
        self.read().spec()
    }

    fn into_buffers(self) -> Vec<GridBuffer> {
        match self {
            Field::Single(buffer) => vec![buffer],
            Field::Double(pair) => pair.into_buffers().into(),
        }
    }
}

/// Named quantities the pipeline stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldId {
    Velocity,
    Density,
    Pressure,
    Divergence,
    Curl,
    Bloom,
    SunraysMask,
    Sunrays,
    Display,
}

/// Grid dimensions derived from the output surface.
///
/// Grids keep `res` rows and scale their width by the surface aspect ratio,
/// so one texel is square on screen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution {
    pub surface_width: u32,
    pub surface_height: u32,
    pub aspect_ratio: f32,
    pub sim_res: u32,
    pub dye_res: u32,
}

impl Resolution {
    pub fn new(sim_res: u32, dye_res: u32, surface_width: u32, surface_height: u32) -> Self {
        let surface_width = surface_width.max(1);
        let surface_height = surface_height.max(1);
        Self {
            surface_width,
            surface_height,
            aspect_ratio: surface_width as f32 / surface_height as f32,
            sim_res,
            dye_res,
        }
    }

    pub fn for_config(config: &FluidConfig, surface_width: u32, surface_height: u32) -> Self {
        Self::new(config.sim_res, config.dye_res, surface_width, surface_height)
    }

    fn grid(&self, res: u32) -> (u32, u32) {
        let width = (res as f32 * self.aspect_ratio).round().max(1.0) as u32;
        (width, res)
    }

    /// Velocity/pressure grid dimensions.
    pub fn sim_size(&self) -> (u32, u32) {
        self.grid(self.sim_res)
    }

    /// Dye grid dimensions.
    pub fn dye_size(&self) -> (u32, u32) {
        self.grid(self.dye_res)
    }

    /// Texel size shared by the simulation kernels: `(1/(sim_res·aspect), 1/sim_res)`.
    pub fn texel_size(&self) -> [f32; 2] {
        [
            1.0 / (self.sim_res as f32 * self.aspect_ratio),
            1.0 / self.sim_res as f32,
        ]
    }

    /// Texel size of the full-resolution surface.
    pub fn surface_texel_size(&self) -> [f32; 2] {
        [
            1.0 / self.surface_width as f32,
            1.0 / self.surface_height as f32,
        ]
    }
}

/// Allocation request for one field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldDescriptor {
    pub id: FieldId,
    pub double: bool,
    pub spec: BufferSpec,
}

/// Fields required by `config` at `resolution`.
pub fn field_layout(config: &FluidConfig, resolution: &Resolution) -> Vec<FieldDescriptor> {
    use BufferFormat::*;
    use FilterMode::*;

    let (sim_w, sim_h) = resolution.sim_size();
    let (dye_w, dye_h) = resolution.dye_size();
    let sim = |format, filter| BufferSpec::new(sim_w, sim_h, format, filter);
    let dye = |format, filter| BufferSpec::new(dye_w, dye_h, format, filter);

    let mut layout = vec![
        FieldDescriptor {
            id: FieldId::Velocity,
            double: true,
            spec: sim(Rg16Float, Linear),
        },
        FieldDescriptor {
            id: FieldId::Pressure,
            double: true,
            spec: sim(R16Float, Nearest),
        },
        FieldDescriptor {
            id: FieldId::Divergence,
            double: false,
            spec: sim(R16Float, Nearest),
        },
        FieldDescriptor {
            id: FieldId::Curl,
            double: false,
            spec: sim(R16Float, Nearest),
        },
        FieldDescriptor {
            id: FieldId::Density,
            double: true,
            spec: dye(Rgba16Float, Linear),
        },
    ];

    if config.bloom.enabled {
        layout.push(FieldDescriptor {
            id: FieldId::Bloom,
            double: true,
            spec: dye(Rgba16Float, Linear),
        });
    }
    if config.sunrays.enabled {
        layout.push(FieldDescriptor {
            id: FieldId::SunraysMask,
            double: false,
            spec: dye(Rgba16Float, Linear),
        });
        layout.push(FieldDescriptor {
            id: FieldId::Sunrays,
            double: true,
            spec: dye(Rgba16Float, Linear),
        });
    }
    layout.push(FieldDescriptor {
        id: FieldId::Display,
        double: false,
        spec: dye(Rgba16Float, Linear),
    });

    layout
}

/// Owner of every field buffer the pipeline uses.
#[derive(Debug, Default)]
pub struct FieldSet {
    fields: BTreeMap<FieldId, Field>,
}

impl FieldSet {
    /// Allocate every field in `layout`.
    ///
    /// On failure the buffers allocated so far are disposed before the error
    /// is returned.
    pub fn allocate<B: Backend>(
        backend: &mut B,
        layout: &[FieldDescriptor],
    ) -> Result<Self, PipelineError> {
        let mut set = FieldSet::default();
        for descriptor in layout {
            match allocate_field(backend, descriptor) {
                Ok(field) => {
                    set.fields.insert(descriptor.id, field);
                }
                Err(err) => {
                    set.release(backend);
                    return Err(err);
                }
            }
        }
        Ok(set)
    }

    pub fn get(&self, id: FieldId) -> Result<&Field, PipelineError> {
        self.fields.get(&id).ok_or(PipelineError::MissingField(id))
    }

    pub fn get_mut(&mut self, id: FieldId) -> Result<&mut Field, PipelineError> {
        self.fields.get_mut(&id).ok_or(PipelineError::MissingField(id))
    }

    #[inline]
    pub fn contains(&self, id: FieldId) -> bool {
        self.fields.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = FieldId> + '_ {
        self.fields.keys().copied()
    }

    /// Number of live buffers (double fields count twice).
    pub fn buffer_count(&self) -> usize {
        self.fields
            .values()
            .map(|field| if field.is_double() { 2 } else { 1 })
            .sum()
    }

    /// Dispose every buffer, leaving the set empty.
    pub fn release<B: Backend>(&mut self, backend: &mut B) -> usize {
        let mut released = 0;
        for (_, field) in std::mem::take(&mut self.fields) {
            for buffer in field.into_buffers() {
                backend.dispose(buffer);
                released += 1;
            }
        }
        released
    }
}

fn allocate_field<B: Backend>(
    backend: &mut B,
    descriptor: &FieldDescriptor,
) -> Result<Field, PipelineError> {
    let first = backend.allocate(descriptor.spec)?;
    if !descriptor.double {
        return Ok(Field::Single(first));
    }
    match backend.allocate(descriptor.spec) {
        Ok(second) => Ok(Field::Double(DoubleBuffer::new(first, second))),
        Err(err) => {
            backend.dispose(first);
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::CpuBackend;

    fn spec() -> BufferSpec {
        BufferSpec::new(4, 4, BufferFormat::Rg16Float, FilterMode::Linear)
    }

    #[test]
    fn test_swap_is_self_inverse() {
        let mut pair = DoubleBuffer::new(
            GridBuffer::new(BufferId(1), spec()),
            GridBuffer::new(BufferId(2), spec()),
        );
        let read = pair.read().id();
        let write = pair.write().id();
        assert_ne!(read, write);

        pair.swap();
        assert_eq!(pair.read().id(), write);
        assert_eq!(pair.write().id(), read);

        pair.swap();
        assert_eq!(pair.read().id(), read);
        assert_eq!(pair.write().id(), write);
    }

    #[test]
    fn test_swap_moves_no_data() {
        let mut pair = DoubleBuffer::new(
            GridBuffer::new(BufferId(1), spec()),
            GridBuffer::new(BufferId(2), spec()),
        );
        let read_ptr = pair.read() as *const GridBuffer;
        let write_ptr = pair.write() as *const GridBuffer;

        pair.swap();

        // Handles stay where they are; only the role index changes
        assert!(std::ptr::eq(pair.write(), read_ptr));
        assert!(std::ptr::eq(pair.read(), write_ptr));
    }

    #[test]
    fn test_single_field_reads_and_writes_same_buffer() {
        let mut field = Field::Single(GridBuffer::new(BufferId(7), spec()));
        assert_eq!(field.read().id(), field.target().id());
        field.advance();
        assert_eq!(field.read().id(), BufferId(7));
    }

    #[test]
    fn test_double_field_advance_publishes_target() {
        let mut field = Field::Double(DoubleBuffer::new(
            GridBuffer::new(BufferId(1), spec()),
            GridBuffer::new(BufferId(2), spec()),
        ));
        let target = field.target().id();
        assert_ne!(field.read().id(), target);
        field.advance();
        assert_eq!(field.read().id(), target);
    }

    #[test]
    fn test_resolution_follows_aspect() {
        let res = Resolution::new(128, 512, 1920, 1080);
        assert_eq!(res.sim_size(), (228, 128));
        assert_eq!(res.dye_size(), (910, 512));

        let texel = res.texel_size();
        assert!((texel[0] - 1.0 / (128.0 * 1920.0 / 1080.0)).abs() < 1e-7);
        assert_eq!(texel[1], 1.0 / 128.0);
        assert_eq!(res.surface_texel_size(), [1.0 / 1920.0, 1.0 / 1080.0]);

        let square = Resolution::new(128, 512, 800, 800);
        assert_eq!(square.sim_size(), (128, 128));
    }

    #[test]
    fn test_resolution_survives_zero_surface() {
        let res = Resolution::new(64, 64, 0, 0);
        assert_eq!(res.aspect_ratio, 1.0);
        assert_eq!(res.sim_size(), (64, 64));
    }

    #[test]
    fn test_layout_formats() {
        let config = FluidConfig::default();
        let res = Resolution::for_config(&config, 640, 480);
        let layout = field_layout(&config, &res);

        let find = |id| layout.iter().find(|d| d.id == id).copied().unwrap();
        let velocity = find(FieldId::Velocity);
        assert!(velocity.double);
        assert_eq!(velocity.spec.format, BufferFormat::Rg16Float);
        assert_eq!(velocity.spec.filter, FilterMode::Linear);
        assert_eq!((velocity.spec.width, velocity.spec.height), res.sim_size());

        let pressure = find(FieldId::Pressure);
        assert!(pressure.double);
        assert_eq!(pressure.spec.filter, FilterMode::Nearest);

        let density = find(FieldId::Density);
        assert_eq!((density.spec.width, density.spec.height), res.dye_size());
        assert!(!find(FieldId::Divergence).double);
        assert!(!find(FieldId::Curl).double);

        // Bloom is off by default, sunrays on
        assert!(layout.iter().all(|d| d.id != FieldId::Bloom));
        assert!(layout.iter().any(|d| d.id == FieldId::Sunrays));
    }

    #[test]
    fn test_field_set_release_disposes_everything() {
        let config = FluidConfig::default();
        let res = Resolution::for_config(&config, 64, 64);
        let mut backend = CpuBackend::new();

        let mut fields = FieldSet::allocate(&mut backend, &field_layout(&config, &res)).unwrap();
        assert_eq!(backend.live_buffers(), fields.buffer_count());

        let released = fields.release(&mut backend);
        assert_eq!(released, backend.allocations());
        assert_eq!(backend.live_buffers(), 0);
        assert!(matches!(
            fields.get(FieldId::Velocity),
            Err(PipelineError::MissingField(FieldId::Velocity))
        ));
    }

    #[test]
    fn test_failed_allocation_rolls_back() {
        let mut backend = CpuBackend::with_max_dimension(256);
        let config = FluidConfig::default();
        // Simulation grids fit, the 512-row dye grid does not
        let res = Resolution::for_config(&config, 64, 64);

        let result = FieldSet::allocate(&mut backend, &field_layout(&config, &res));
        assert!(matches!(result, Err(PipelineError::OutOfDeviceMemory { .. })));
        assert_eq!(backend.live_buffers(), 0);
    }
}
