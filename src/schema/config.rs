//! Configuration types for the fluid pipeline.

use serde::{Deserialize, Serialize};

use super::Rgb;

/// Upper bound on Jacobi iterations per frame. Larger `swirl` values are clamped.
pub const MAX_PRESSURE_ITERATIONS: u32 = 100;

/// Top-level simulation configuration.
///
/// Field names serialize in camelCase (`simRes`, `densityDissipation`, ...).
/// Every field has a default, so partial JSON documents are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FluidConfig {
    /// Blend factor for host compositing. Not read by the simulation.
    pub blend: f32,
    /// Multiplier from pointer pixel deltas to velocity impulse.
    pub force: f32,
    /// Splat radius; the kernel falloff uses `radius / 100` in normalized units.
    pub radius: f32,
    /// Vorticity confinement strength (only used when `vorticity` is enabled).
    pub curl: f32,
    /// Jacobi pressure iterations per frame.
    pub swirl: u32,
    /// Post-processing intensity for host effects. Not read by the simulation.
    pub intensity: f32,
    /// Post-processing distortion for host effects. Not read by the simulation.
    pub distortion: f32,
    /// Dye color used when `rainbow` is off.
    pub fluid_color: Rgb,
    /// Background color for the display composite.
    pub background_color: Rgb,
    /// Whether the display composite paints the background color.
    pub show_background: bool,
    /// Use a random hue per splat instead of `fluid_color`.
    pub rainbow: bool,
    /// Factor applied to last frame's pressure before relaxation.
    pub pressure: f32,
    /// Per-step multiplicative decay of the dye (1.0 = none).
    pub density_dissipation: f32,
    /// Per-step multiplicative decay of the velocity (1.0 = none).
    pub velocity_dissipation: f32,
    /// Grid height of the velocity/pressure grids (width follows aspect ratio).
    pub sim_res: u32,
    /// Grid height of the dye grid (width follows aspect ratio).
    pub dye_res: u32,
    /// Time step used by advection and vorticity.
    pub dt: f32,
    /// Feed the curl field back into velocity (vorticity confinement).
    pub vorticity: bool,
    /// Bloom post stage.
    pub bloom: BloomConfig,
    /// Sunrays post stage.
    pub sunrays: SunraysConfig,
    /// Seed for the rainbow hue generator. `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for FluidConfig {
    fn default() -> Self {
        Self {
            blend: 5.0,
            force: 1.1,
            radius: 0.5,
            curl: 50.0,
            swirl: 3,
            intensity: 2.0,
            distortion: 0.4,
            fluid_color: Rgb::new(0x33, 0x00, 0xff),
            background_color: Rgb::new(0x07, 0x04, 0x10),
            show_background: true,
            rainbow: false,
            pressure: 0.8,
            density_dissipation: 1.0,
            velocity_dissipation: 1.0,
            sim_res: 128,
            dye_res: 512,
            dt: 0.016,
            vorticity: false,
            bloom: BloomConfig::default(),
            sunrays: SunraysConfig::default(),
            seed: None,
        }
    }
}

/// Bloom post-processing parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BloomConfig {
    pub enabled: bool,
    /// Brightness above which dye contributes to bloom.
    pub threshold: f32,
    /// Weight of the bloom texture in the composite.
    pub intensity: f32,
    /// Blur passes over the prefiltered texture.
    pub iterations: u32,
}

impl Default for BloomConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: 0.6,
            intensity: 0.2,
            iterations: 3,
        }
    }
}

/// Sunrays post-processing parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SunraysConfig {
    pub enabled: bool,
    pub weight: f32,
    pub decay: f32,
    /// Scales the ray brightness; also used as the composite weight.
    pub exposure: f32,
}

impl Default for SunraysConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            weight: 1.0,
            decay: 0.5,
            exposure: 0.1,
        }
    }
}

impl FluidConfig {
    /// Pressure iterations actually run per frame.
    #[inline]
    pub fn pressure_iterations(&self) -> u32 {
        self.swirl.min(MAX_PRESSURE_ITERATIONS)
    }

    /// Splat radius in normalized grid units.
    #[inline]
    pub fn splat_radius(&self) -> f32 {
        self.radius / 100.0
    }

    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sim_res == 0 || self.dye_res == 0 {
            return Err(ConfigError::InvalidResolution);
        }
        if !(self.radius > 0.0 && self.radius.is_finite()) {
            return Err(ConfigError::InvalidRadius(self.radius));
        }
        if !self.force.is_finite() {
            return Err(ConfigError::InvalidForce(self.force));
        }
        if !(self.dt > 0.0 && self.dt.is_finite()) {
            return Err(ConfigError::InvalidTimeStep);
        }
        for (name, value) in [
            ("pressure", self.pressure),
            ("densityDissipation", self.density_dissipation),
            ("velocityDissipation", self.velocity_dissipation),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfUnitRange { name, value });
            }
        }
        if self.bloom.enabled && self.bloom.iterations == 0 {
            return Err(ConfigError::InvalidBloomIterations);
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Simulation and dye resolutions must be non-zero")]
    InvalidResolution,
    #[error("Splat radius must be positive, got {0}")]
    InvalidRadius(f32),
    #[error("Force must be finite, got {0}")]
    InvalidForce(f32),
    #[error("Time step must be positive")]
    InvalidTimeStep,
    #[error("{name} must lie in [0, 1], got {value}")]
    OutOfUnitRange { name: &'static str, value: f32 },
    #[error("Bloom needs at least one blur iteration")]
    InvalidBloomIterations,
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_documented_surface() {
        let config = FluidConfig::default();
        assert_eq!(config.force, 1.1);
        assert_eq!(config.radius, 0.5);
        assert_eq!(config.curl, 50.0);
        assert_eq!(config.swirl, 3);
        assert_eq!(config.pressure, 0.8);
        assert_eq!(config.sim_res, 128);
        assert_eq!(config.dye_res, 512);
        assert_eq!(config.fluid_color.to_string(), "#3300ff");
        assert_eq!(config.background_color.to_string(), "#070410");
        assert!(config.show_background);
        assert!(!config.rainbow);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = FluidConfig::from_json(r##"{ "swirl": 0, "rainbow": true, "fluidColor": "#ff0000" }"##)
            .unwrap();
        assert_eq!(config.swirl, 0);
        assert!(config.rainbow);
        assert_eq!(config.fluid_color, Rgb::new(255, 0, 0));
        assert_eq!(config.sim_res, 128);
        assert_eq!(config.bloom, BloomConfig::default());
    }

    #[test]
    fn test_rejects_bad_values() {
        let config = FluidConfig {
            sim_res: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidResolution)));

        let config = FluidConfig {
            density_dissipation: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfUnitRange {
                name: "densityDissipation",
                ..
            })
        ));

        let config = FluidConfig {
            radius: 0.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidRadius(_))));

        assert!(matches!(
            FluidConfig::from_json(r#"{ "fluidColor": "purple" }"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_swirl_is_clamped_not_rejected() {
        let config = FluidConfig {
            swirl: 10_000,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.pressure_iterations(), MAX_PRESSURE_ITERATIONS);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let json = serde_json::to_string_pretty(&FluidConfig::default()).unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let text = std::fs::read_to_string(file.path()).unwrap();
        assert!(text.contains("\"simRes\": 128"));
        assert_eq!(FluidConfig::from_json(&text).unwrap(), FluidConfig::default());
    }
}
