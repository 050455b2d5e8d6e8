//! Particle system configuration.

use particulate_core::constants::MAX_TEXTURES;
use particulate_core::{ProgramId, RenderTargetId, TextureId};
use serde::{Deserialize, Serialize};

use crate::error::{ParticleError, Result};

/// Configuration for one particle system drawable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticleSystemConfig {
    /// Name used in logs and buffer labels.
    pub name: String,
    /// Total number of points the device buffer holds.
    pub total_point_capacity: u32,
    /// Points per batch. Must divide `total_point_capacity`.
    pub batch_size: u32,
    /// Seconds a batch stays active after its start time.
    pub lifetime: f64,
    /// Render time that `u_time` is measured from.
    pub base_time: f64,
    /// Point size in pixels.
    pub point_size: f32,
    /// Draw each particle as a textured rectangle.
    pub use_rectangles: bool,
    /// Draw rectangles with instancing. Rectangles are only supported instanced.
    pub use_instancing: bool,
    /// Ask the frame driver to keep rendering while particles are alive.
    pub continuous_render: bool,
    pub draw_priority: i32,
    /// Visible range, in the scene renderer's height units.
    pub min_visible: f64,
    pub max_visible: f64,
    pub request_z_buffer: bool,
    pub write_z_buffer: bool,
    pub render_target: Option<RenderTargetId>,
    pub textures: Vec<TextureId>,
    pub calculate_program: Option<ProgramId>,
    pub render_program: Option<ProgramId>,
}

impl Default for ParticleSystemConfig {
    fn default() -> Self {
        Self {
            name: "particles".to_string(),
            total_point_capacity: 1000,
            batch_size: 100,
            lifetime: 5.0,
            base_time: 0.0,
            point_size: 1.0,
            use_rectangles: false,
            use_instancing: false,
            continuous_render: true,
            draw_priority: 0,
            min_visible: 0.0,
            max_visible: 10000.0,
            request_z_buffer: false,
            write_z_buffer: false,
            render_target: None,
            textures: Vec::new(),
            calculate_program: None,
            render_program: None,
        }
    }
}

impl ParticleSystemConfig {
    /// Set the name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the point capacity and batch size.
    pub fn with_capacity(mut self, total_point_capacity: u32, batch_size: u32) -> Self {
        self.total_point_capacity = total_point_capacity;
        self.batch_size = batch_size;
        self
    }

    /// Set the batch lifetime in seconds.
    pub fn with_lifetime(mut self, lifetime: f64) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Set the base time.
    pub fn with_base_time(mut self, base_time: f64) -> Self {
        self.base_time = base_time;
        self
    }

    /// Set the point size.
    pub fn with_point_size(mut self, point_size: f32) -> Self {
        self.point_size = point_size;
        self
    }

    /// Draw instanced rectangles instead of points.
    pub fn with_instanced_rectangles(mut self, enabled: bool) -> Self {
        self.use_rectangles = enabled;
        self.use_instancing = enabled;
        self
    }

    /// Enable or disable continuous render requests.
    pub fn with_continuous_render(mut self, enabled: bool) -> Self {
        self.continuous_render = enabled;
        self
    }

    /// Set the draw priority.
    pub fn with_draw_priority(mut self, priority: i32) -> Self {
        self.draw_priority = priority;
        self
    }

    /// Set the visible range.
    pub fn with_visible_range(mut self, min: f64, max: f64) -> Self {
        self.min_visible = min;
        self.max_visible = max;
        self
    }

    /// Set z-buffer use.
    pub fn with_z_buffer(mut self, request: bool, write: bool) -> Self {
        self.request_z_buffer = request;
        self.write_z_buffer = write;
        self
    }

    /// Render into an offscreen target.
    pub fn with_render_target(mut self, target: RenderTargetId) -> Self {
        self.render_target = Some(target);
        self
    }

    /// Set the drawable textures.
    pub fn with_textures(mut self, textures: Vec<TextureId>) -> Self {
        self.textures = textures;
        self
    }

    /// Set the calculate (simulation) program.
    pub fn with_calculate_program(mut self, program: ProgramId) -> Self {
        self.calculate_program = Some(program);
        self
    }

    /// Set the render program.
    pub fn with_render_program(mut self, program: ProgramId) -> Self {
        self.render_program = Some(program);
        self
    }

    /// Number of ring slots.
    #[inline]
    pub fn batch_capacity(&self) -> u32 {
        if self.batch_size == 0 {
            0
        } else {
            self.total_point_capacity / self.batch_size
        }
    }

    /// Whether draws use the instanced rectangle path.
    #[inline]
    pub fn instanced_rectangles(&self) -> bool {
        self.use_rectangles && self.use_instancing
    }

    /// Check the configuration for values the ring cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(ParticleError::InvalidConfig(
                "batch size must be non-zero".to_string(),
            ));
        }
        if self.total_point_capacity == 0 {
            return Err(ParticleError::InvalidConfig(
                "point capacity must be non-zero".to_string(),
            ));
        }
        if self.total_point_capacity % self.batch_size != 0 {
            return Err(ParticleError::InvalidConfig(format!(
                "point capacity {} is not a multiple of batch size {}",
                self.total_point_capacity, self.batch_size
            )));
        }
        if !self.lifetime.is_finite() || self.lifetime <= 0.0 {
            return Err(ParticleError::InvalidConfig(format!(
                "lifetime must be positive and finite, got {}",
                self.lifetime
            )));
        }
        if self.textures.len() > MAX_TEXTURES as usize {
            return Err(ParticleError::InvalidConfig(format!(
                "{} textures exceeds the limit of {MAX_TEXTURES}",
                self.textures.len()
            )));
        }
        if self.min_visible > self.max_visible {
            return Err(ParticleError::InvalidConfig(
                "min visible range exceeds max".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let config = ParticleSystemConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch_capacity(), 10);
    }

    #[test]
    fn rejects_bad_capacity() {
        let config = ParticleSystemConfig::default().with_capacity(105, 10);
        assert!(matches!(
            config.validate(),
            Err(ParticleError::InvalidConfig(_))
        ));
        assert!(ParticleSystemConfig::default()
            .with_capacity(100, 0)
            .validate()
            .is_err());
        assert!(ParticleSystemConfig::default()
            .with_capacity(0, 10)
            .validate()
            .is_err());
    }

    #[test]
    fn rejects_bad_lifetime() {
        assert!(ParticleSystemConfig::default()
            .with_lifetime(0.0)
            .validate()
            .is_err());
        assert!(ParticleSystemConfig::default()
            .with_lifetime(f64::NAN)
            .validate()
            .is_err());
    }

    #[test]
    fn rejects_too_many_textures() {
        let textures = (0..9).map(TextureId).collect();
        let config = ParticleSystemConfig::default().with_textures(textures);
        assert!(config.validate().is_err());
    }

    #[test]
    fn instanced_rectangles_need_both_flags() {
        let mut config = ParticleSystemConfig::default();
        config.use_rectangles = true;
        assert!(!config.instanced_rectangles());
        assert!(config.with_instanced_rectangles(true).instanced_rectangles());
    }

    #[test]
    fn partial_json_uses_defaults() {
        let json = r#"{"name":"sparks","batch_size":50,"total_point_capacity":500}"#;
        let config: ParticleSystemConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.name, "sparks");
        assert_eq!(config.batch_capacity(), 10);
        assert!((config.lifetime - 5.0).abs() < f64::EPSILON);
        assert!(config.continuous_render);
    }

    #[test]
    fn json_round_trip() {
        let config = ParticleSystemConfig::default()
            .with_name("smoke")
            .with_render_program(ProgramId(7));
        let json = serde_json::to_string(&config).unwrap();
        let back: ParticleSystemConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
