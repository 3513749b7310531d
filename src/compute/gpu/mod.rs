//! GPU Compute Backend for the fluid kernels
//!
//! Runs every pass as a wgpu compute dispatch over half-float textures.

mod backend;

pub use backend::GpuBackend;

/// Error type for GPU operations.
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("No suitable GPU adapter found")]
    NoAdapter,

    #[error("Failed to request GPU device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),
}
