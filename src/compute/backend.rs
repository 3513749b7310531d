//! Device abstraction the pipeline runs on.

use super::{BufferSpec, GridBuffer, PassUniforms, PipelineError, Program};

/// A device that stores grid buffers and runs full-grid kernel passes.
///
/// Implementations: [`GpuBackend`](super::gpu::GpuBackend) (wgpu) and
/// [`CpuBackend`](super::CpuBackend) (reference evaluation on the host).
pub trait Backend {
    /// Allocate a zero-initialized buffer.
    fn allocate(&mut self, spec: BufferSpec) -> Result<GridBuffer, PipelineError>;

    /// Release a buffer's storage. Consumes the handle.
    fn dispose(&mut self, buffer: GridBuffer);

    /// Run `program` once per texel of `target`, overwriting every texel.
    ///
    /// `inputs` are sampled in binding order. None of them may be `target`.
    fn draw(
        &mut self,
        program: Program,
        uniforms: &PassUniforms,
        inputs: &[&GridBuffer],
        target: &GridBuffer,
    ) -> Result<(), PipelineError>;

    /// Flush recorded passes to the device. Called once per frame.
    fn submit(&mut self) {}
}

impl<B: Backend + ?Sized> Backend for &mut B {
    fn allocate(&mut self, spec: BufferSpec) -> Result<GridBuffer, PipelineError> {
        (**self).allocate(spec)
    }

    fn dispose(&mut self, buffer: GridBuffer) {
        (**self).dispose(buffer)
    }

    fn draw(
        &mut self,
        program: Program,
        uniforms: &PassUniforms,
        inputs: &[&GridBuffer],
        target: &GridBuffer,
    ) -> Result<(), PipelineError> {
        (**self).draw(program, uniforms, inputs, target)
    }

    fn submit(&mut self) {
        (**self).submit()
    }
}
