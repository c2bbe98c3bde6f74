//! Core configuration types shared by the renderer and applications

pub mod config;

pub use config::{ApplicationConfig, RendererConfig, ShaderConfig, WindowConfig};
