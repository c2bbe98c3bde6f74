//! # Renderer and Application Configuration
//!
//! Settings the render core needs at startup: shader locations, instance
//! metadata, validation toggle and clear color, plus the window and log level
//! an application wraps around them.
//!
//! The number of frames in flight is not configurable; see
//! [`crate::render::swapchain::MAX_FRAMES_IN_FLIGHT`].

use serde::{Deserialize, Serialize};
use std::path::Path;

pub use crate::config::{Config, ConfigError};

/// # Shader Configuration
///
/// Paths to the SPIR-V files of the scene pipeline. Supports path resolution
/// for applications started from different working directories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderConfig {
    /// Path to the vertex shader SPIR-V file
    pub vertex_shader_path: String,
    /// Path to the fragment shader SPIR-V file
    pub fragment_shader_path: String,
}

impl ShaderConfig {
    /// Create a new shader configuration
    pub fn new(vertex_path: impl Into<String>, fragment_path: impl Into<String>) -> Self {
        Self {
            vertex_shader_path: vertex_path.into(),
            fragment_shader_path: fragment_path.into(),
        }
    }

    /// Create shader config with automatic path resolution
    ///
    /// Tries the usual shader output locations in order and keeps the first
    /// hit for each stage.
    pub fn with_path_resolution(base_vertex: &str, base_fragment: &str) -> Self {
        const SHADER_DIRS: [&str; 4] = ["target/shaders/", "../target/shaders/", "shaders/", "./"];

        let resolve = |file: &str| {
            SHADER_DIRS
                .iter()
                .map(|dir| format!("{dir}{file}"))
                .find(|candidate| Path::new(candidate).exists())
                .unwrap_or_else(|| format!("target/shaders/{file}"))
        };

        Self {
            vertex_shader_path: resolve(base_vertex),
            fragment_shader_path: resolve(base_fragment),
        }
    }

    /// Validate that shader files exist
    pub fn validate(&self) -> Result<(), ConfigError> {
        for path in [&self.vertex_shader_path, &self.fragment_shader_path] {
            if !Path::new(path).exists() {
                return Err(ConfigError::Invalid(format!("Shader not found: {path}")));
            }
        }
        Ok(())
    }
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self::with_path_resolution("simple_shader.vert.spv", "simple_shader.frag.spv")
    }
}

/// # Renderer Configuration
///
/// Instance metadata, validation toggle, clear color and shader paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Application name reported to the graphics API
    pub application_name: String,
    /// Application version (major, minor, patch)
    pub application_version: (u32, u32, u32),
    /// Whether to enable validation layers; `None` follows the build type
    pub enable_validation: Option<bool>,
    /// Clear color of the swapchain render pass
    pub clear_color: [f32; 4],
    /// Scene pipeline shaders
    pub shaders: ShaderConfig,
}

impl RendererConfig {
    /// Create a new renderer configuration
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            application_version: (0, 1, 0),
            enable_validation: None,
            clear_color: [0.01, 0.01, 0.01, 1.0],
            shaders: ShaderConfig::default(),
        }
    }

    /// Set custom shader configuration
    #[must_use]
    pub fn with_shaders(mut self, shaders: ShaderConfig) -> Self {
        self.shaders = shaders;
        self
    }

    /// Enable or disable validation layers
    #[must_use]
    pub const fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = Some(enabled);
        self
    }

    /// Set the clear color
    #[must_use]
    pub const fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    /// Whether validation layers should be requested
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application_name.is_empty() {
            return Err(ConfigError::Invalid("Application name cannot be empty".to_string()));
        }
        if self.clear_color.iter().any(|c| !(0.0..=1.0).contains(c)) {
            return Err(ConfigError::Invalid(format!(
                "Clear color components must be within [0, 1]: {:?}",
                self.clear_color
            )));
        }
        self.shaders.validate()
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self::new("render_core application")
    }
}

/// Window creation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Window title
    pub title: String,
    /// Initial width in screen coordinates
    pub width: u32,
    /// Initial height in screen coordinates
    pub height: u32,
}

impl WindowConfig {
    /// Validate the window settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "Window size must be nonzero, got {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "render_core".to_string(),
            width: 800,
            height: 600,
        }
    }
}

/// # Application Configuration
///
/// Top-level configuration file of an application built on the render core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Log level ("error", "warn", "info", "debug", "trace")
    pub log_level: String,
    /// Window settings
    pub window: WindowConfig,
    /// Renderer settings
    pub renderer: RendererConfig,
}

impl ApplicationConfig {
    /// Validate every section
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.log_level.is_empty() && self.log_level.parse::<log::LevelFilter>().is_err() {
            return Err(ConfigError::Invalid(format!("Unknown log level: {}", self.log_level)));
        }
        self.window.validate()?;
        self.renderer.validate()
    }

    /// Log level filter, `Info` when unset or unknown
    pub fn log_level_filter(&self) -> log::LevelFilter {
        crate::foundation::logging::parse_level(&self.log_level)
    }
}

impl Config for ApplicationConfig {}

impl Config for RendererConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    fn shaders_in_temp_dir() -> ShaderConfig {
        let dir = std::env::temp_dir();
        let vert = dir.join(format!("render_core_cfg_{}.vert.spv", std::process::id()));
        let frag = dir.join(format!("render_core_cfg_{}.frag.spv", std::process::id()));
        std::fs::write(&vert, [0u8; 4]).unwrap();
        std::fs::write(&frag, [0u8; 4]).unwrap();
        ShaderConfig::new(vert.to_string_lossy(), frag.to_string_lossy())
    }

    #[test]
    fn test_renderer_config_validation() {
        let config = RendererConfig::new("test").with_shaders(shaders_in_temp_dir());
        assert!(config.validate().is_ok());

        let unnamed = RendererConfig { application_name: String::new(), ..config.clone() };
        assert!(matches!(unnamed.validate(), Err(ConfigError::Invalid(_))));

        let bad_color = config.with_clear_color([2.0, 0.0, 0.0, 1.0]);
        assert!(bad_color.validate().is_err());
    }

    #[test]
    fn test_missing_shader_rejected() {
        let shaders = ShaderConfig::new("/nonexistent/a.spv", "/nonexistent/b.spv");
        assert!(shaders.validate().is_err());
    }

    #[test]
    fn test_explicit_validation_toggle() {
        assert!(RendererConfig::default().with_validation(true).validation_enabled());
        assert!(!RendererConfig::default().with_validation(false).validation_enabled());
    }

    #[test]
    fn test_window_config_rejects_zero_size() {
        let window = WindowConfig { width: 0, ..WindowConfig::default() };
        assert!(window.validate().is_err());
        assert!(WindowConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: ApplicationConfig = toml::from_str(
            r#"
            log_level = "debug"
            [window]
            title = "demo"
            "#,
        )
        .unwrap();
        assert_eq!(config.window.title, "demo");
        assert_eq!(config.window.width, 800);
        assert_eq!(config.log_level_filter(), log::LevelFilter::Debug);
    }
}
