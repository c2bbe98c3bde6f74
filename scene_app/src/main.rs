//! Scene demo: a spinning cube rendered through the render core
//!
//! Reads `scene_config.toml` from the working directory when present.
//! Escape closes the window.

mod mesh;

use std::process::ExitCode;
use std::sync::Arc;

use render_core::config::Config;
use render_core::core::ApplicationConfig;
use render_core::foundation::logging;
use render_core::foundation::math::Vec3;
use render_core::render::backends::vulkan::VulkanInstance;
use render_core::render::{Camera, GlfwWindow, RenderResult, RenderSystem};

use mesh::Mesh;

const CONFIG_PATH: &str = "scene_config.toml";

/// Radians per second around the vertical axis
const SPIN_RATE: f32 = std::f32::consts::FRAC_PI_4;

struct SceneApp {
    // dropped in declaration order: GPU resources before the window
    cube: Mesh,
    render_system: RenderSystem,
    camera: Camera,
    window: GlfwWindow,
}

impl SceneApp {
    fn new(config: &ApplicationConfig) -> RenderResult<Self> {
        let mut window = GlfwWindow::new(&config.window)?;
        let instance = Arc::new(VulkanInstance::new(&mut window, &config.renderer)?);
        let render_system = RenderSystem::new(instance, &mut window, &config.renderer)?;

        let mut cube = Mesh::cube(render_system.device())?;
        cube.transform.translation = Vec3::new(0.0, 0.0, 2.5);

        Ok(Self {
            cube,
            render_system,
            camera: Camera::new(),
            window,
        })
    }

    fn run(&mut self) -> RenderResult<()> {
        log::info!("Entering main loop");
        let mut last_time = self.window.time();

        while !self.window.should_close() {
            self.window.poll_events();

            let now = self.window.time();
            #[allow(clippy::cast_possible_truncation)]
            let dt = (now - last_time) as f32;
            last_time = now;

            self.cube.transform.rotation.y += SPIN_RATE * dt;
            self.cube.transform.rotation.x += SPIN_RATE * 0.5 * dt;

            self.camera
                .set_perspective_projection(50_f32.to_radians(), self.render_system.aspect_ratio(), 0.1, 10.0);
            self.camera.set_view_target(
                Vec3::new(-1.0, -2.0, -2.0),
                self.cube.transform.translation,
                Vec3::new(0.0, -1.0, 0.0),
            );

            self.render_system
                .draw_scene(&mut self.window, Some(&self.camera), &[&self.cube])?;
        }

        self.render_system.wait_idle()?;
        log::info!("Main loop finished");
        Ok(())
    }
}

fn main() -> ExitCode {
    let config = match ApplicationConfig::load_or_default(CONFIG_PATH) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {CONFIG_PATH}: {e}");
            return ExitCode::FAILURE;
        }
    };
    logging::init_with_level(config.log_level_filter());

    if let Err(e) = config.validate() {
        log::error!("Invalid configuration: {e}");
        return ExitCode::FAILURE;
    }

    match SceneApp::new(&config).and_then(|mut app| app.run()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("Fatal render error: {e}");
            ExitCode::FAILURE
        }
    }
}
