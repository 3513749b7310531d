//! Compute module - Grid storage, fluid kernels and the frame pipeline.

mod backend;
mod cpu;
mod disturbance;
mod executor;
mod field;
mod kernel;
mod pipeline;

pub mod gpu;

pub use gpu::GpuBackend;

pub use backend::*;
pub use cpu::*;
pub use disturbance::*;
pub use executor::*;
pub use field::*;
pub use kernel::*;
pub use pipeline::*;

use crate::schema::ConfigError;

/// Errors raised while building or running the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Device could not allocate a {width}x{height} {format:?} buffer")]
    OutOfDeviceMemory {
        width: u32,
        height: u32,
        format: BufferFormat,
    },

    #[error("Field {0:?} is not allocated")]
    MissingField(FieldId),

    #[error("{} pass would sample and render {field:?} at once", program.name())]
    Aliased { program: Program, field: FieldId },

    #[error("{} pass samples its own target {buffer}", program.name())]
    FeedbackLoop { program: Program, buffer: BufferId },

    #[error("Unknown {0}")]
    UnknownBuffer(BufferId),

    #[error(transparent)]
    Gpu(#[from] gpu::GpuError),
}
