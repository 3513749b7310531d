//! Fluid Splat - Pointer-driven stable-fluids simulation on the GPU.
//!
//! This crate implements the per-frame pipeline of a real-time
//! incompressible fluid: pointer splats, curl, divergence, Jacobi pressure
//! relaxation, gradient subtraction and semi-Lagrangian advection of
//! velocity and dye, over double-buffered half-float grids.
//!
//! # Architecture
//!
//! The crate is split into two main modules:
//!
//! - `schema`: Configuration types and color handling
//! - `compute`: Grid buffers, kernels, backends and the frame pipeline
//!
//! Kernels run on a [`compute::Backend`]: [`compute::GpuBackend`] dispatches
//! wgpu compute shaders, [`compute::CpuBackend`] evaluates the same kernels on
//! the host.
//!
//! # Example
//!
//! ```rust,no_run
//! use fluid_splat::{
//!     compute::{CpuBackend, FluidPipeline},
//!     schema::FluidConfig,
//! };
//!
//! let mut pipeline = FluidPipeline::new(CpuBackend::new(), FluidConfig::default(), 800, 600)?;
//!
//! // Input handlers push pointer moves in surface pixels
//! let queue = pipeline.queue();
//! queue.push_pointer(400.0, 300.0, 12.0, -4.0, (800, 600), pipeline.config().force);
//!
//! let report = pipeline.render_frame()?;
//! println!("{} splats in {} passes", report.splats, report.passes);
//!
//! // Hand the dye texture to presentation
//! let density = pipeline.density_buffer()?;
//! println!("density: {}x{}", density.width(), density.height());
//! # Ok::<(), fluid_splat::compute::PipelineError>(())
//! ```

pub mod compute;
pub mod schema;

// Re-export commonly used types
pub use compute::{CpuBackend, FluidPipeline, GpuBackend, PipelineError};
pub use schema::FluidConfig;
