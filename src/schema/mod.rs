//! Schema module - Configuration and color types for the fluid pipeline.

mod color;
mod config;

pub use color::*;
pub use config::*;
