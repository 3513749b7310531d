//! Pass executor: binds a kernel configuration to fields and runs it.

use super::{Backend, FieldId, FieldSet, KernelConfig, KernelParams, PipelineError};

/// Runs kernel passes against a field set for the duration of one frame.
pub struct PassExecutor<'a, B: Backend> {
    backend: &'a mut B,
    fields: &'a mut FieldSet,
    passes: u32,
}

impl<'a, B: Backend> PassExecutor<'a, B> {
    pub fn new(backend: &'a mut B, fields: &'a mut FieldSet) -> Self {
        Self {
            backend,
            fields,
            passes: 0,
        }
    }

    /// Run `kernel` into `target`.
    ///
    /// Inputs sample their field's read side. A double-buffered target is
    /// rendered through its write side and swapped afterwards, so the result
    /// is visible to the next pass via `read`. A single-buffered target that
    /// is also sampled is rejected.
    pub fn run<P: KernelParams>(
        &mut self,
        kernel: &KernelConfig<P>,
        target: FieldId,
    ) -> Result<(), PipelineError> {
        let inputs = kernel.params.inputs();
        debug_assert_eq!(inputs.len(), P::PROGRAM.input_count());

        {
            let target_field = self.fields.get(target)?;
            if !target_field.is_double() && inputs.contains(&target) {
                return Err(PipelineError::Aliased {
                    program: P::PROGRAM,
                    field: target,
                });
            }

            let sources = inputs
                .iter()
                .map(|&id| self.fields.get(id).map(|field| field.read()))
                .collect::<Result<Vec<_>, _>>()?;
            let destination = target_field.target();

            log::trace!(
                "pass {} {} -> {:?} ({})",
                self.passes,
                P::PROGRAM.name(),
                target,
                destination.id()
            );
            self.backend
                .draw(P::PROGRAM, &kernel.uniforms(), &sources, destination)?;
        }

        self.fields.get_mut(target)?.advance();
        self.passes += 1;
        Ok(())
    }

    /// Passes run so far.
    #[inline]
    pub fn passes(&self) -> u32 {
        self.passes
    }

    /// Read-only access to the fields between passes.
    #[inline]
    pub fn fields(&self) -> &FieldSet {
        self.fields
    }
}
