//! Shared setup for the headless integration tests

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use render_core::core::{RendererConfig, ShaderConfig};
use render_core::render::backends::headless::{
    HeadlessAdapter, HeadlessDevice, HeadlessInstance, HeadlessSurface,
};
use render_core::render::{Device, Renderer};

/// Valid SPIR-V header: magic, version 1.0
pub const SPIRV_HEADER: [u8; 8] = [0x03, 0x02, 0x23, 0x07, 0x00, 0x00, 0x01, 0x00];

/// Instance with the default adapter over a surface of the given size
pub fn headless(width: u32, height: u32) -> (Arc<HeadlessInstance>, HeadlessSurface) {
    let surface = HeadlessSurface::new(width, height);
    let instance = Arc::new(HeadlessInstance::with_default_adapter(&surface));
    (instance, surface)
}

/// Instance with a single custom adapter
pub fn headless_with(adapter: HeadlessAdapter, width: u32, height: u32) -> (Arc<HeadlessInstance>, HeadlessSurface) {
    let surface = HeadlessSurface::new(width, height);
    let instance = Arc::new(HeadlessInstance::new(vec![adapter], &surface));
    (instance, surface)
}

/// Device on the instance plus its simulated counterpart
pub fn device(instance: &Arc<HeadlessInstance>) -> (Arc<Device>, Arc<HeadlessDevice>) {
    let device = Arc::new(Device::new(instance.clone()).unwrap());
    let headless = instance.last_device().unwrap();
    (device, headless)
}

/// Renderer with a black clear color
pub fn renderer(device: &Arc<Device>, surface: &HeadlessSurface) -> Renderer {
    let mut window = surface.clone();
    Renderer::new(Arc::clone(device), &mut window, [0.0, 0.0, 0.0, 1.0]).unwrap()
}

/// Renderer config whose shaders are valid SPIR-V stubs in a temp dir
pub fn renderer_config(test_name: &str) -> RendererConfig {
    let dir: PathBuf = std::env::temp_dir().join(format!(
        "render_core_it_{test_name}_{}",
        std::process::id()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    let vert = dir.join("simple_shader.vert.spv");
    let frag = dir.join("simple_shader.frag.spv");
    std::fs::write(&vert, SPIRV_HEADER).unwrap();
    std::fs::write(&frag, SPIRV_HEADER).unwrap();

    RendererConfig::new(test_name).with_shaders(ShaderConfig::new(
        vert.to_string_lossy(),
        frag.to_string_lossy(),
    ))
}
