//! Simulated window surface

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::render::backends::{Extent2D, SurfaceFormat};
use crate::render::window::SurfaceProvider;

#[derive(Debug)]
struct SurfaceState {
    extent: Extent2D,
    resized: bool,
    extents_after_wait: VecDeque<Extent2D>,
    wait_events_calls: u32,
    formats: Option<Vec<SurfaceFormat>>,
}

/// Window stand-in shared between a test and the headless instance
///
/// Clones share state: resizing through one handle is seen by the instance's
/// surface queries and by the renderer's [`SurfaceProvider`] calls.
#[derive(Debug, Clone)]
pub struct HeadlessSurface {
    state: Arc<Mutex<SurfaceState>>,
}

impl HeadlessSurface {
    /// Create a surface with the given framebuffer size
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(SurfaceState {
                extent: Extent2D::new(width, height),
                resized: false,
                extents_after_wait: VecDeque::new(),
                wait_events_calls: 0,
                formats: None,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, SurfaceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Change the framebuffer size and raise the resized flag
    pub fn resize(&self, width: u32, height: u32) {
        let mut state = self.state();
        state.extent = Extent2D::new(width, height);
        state.resized = true;
    }

    /// Extent the surface takes on at the next `wait_events` call
    ///
    /// Simulates the user restoring a minimized window.
    pub fn queue_extent_after_wait(&self, width: u32, height: u32) {
        self.state()
            .extents_after_wait
            .push_back(Extent2D::new(width, height));
    }

    /// Replace the formats the adapter reports for this surface
    ///
    /// Simulates the window moving to a display with other color formats.
    pub fn set_formats(&self, formats: Vec<SurfaceFormat>) {
        self.state().formats = Some(formats);
    }

    /// Formats set with [`HeadlessSurface::set_formats`], if any
    pub(super) fn formats(&self) -> Option<Vec<SurfaceFormat>> {
        self.state().formats.clone()
    }

    /// Number of times the renderer blocked on window events
    pub fn wait_events_calls(&self) -> u32 {
        self.state().wait_events_calls
    }
}

impl SurfaceProvider for HeadlessSurface {
    fn extent(&self) -> Extent2D {
        self.state().extent
    }

    fn was_resized(&self) -> bool {
        self.state().resized
    }

    fn reset_resized_flag(&mut self) {
        self.state().resized = false;
    }

    fn wait_events(&mut self) {
        let mut state = self.state();
        state.wait_events_calls += 1;
        if let Some(extent) = state.extents_after_wait.pop_front() {
            state.extent = extent;
            state.resized = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_is_shared_between_clones() {
        let surface = HeadlessSurface::new(800, 600);
        let mut window = surface.clone();
        surface.resize(1024, 768);

        assert!(window.was_resized());
        assert_eq!(window.extent(), Extent2D::new(1024, 768));
        window.reset_resized_flag();
        assert!(!surface.was_resized());
    }

    #[test]
    fn test_wait_events_restores_queued_extent() {
        let mut surface = HeadlessSurface::new(0, 0);
        surface.queue_extent_after_wait(640, 480);
        surface.wait_events();
        assert_eq!(surface.extent(), Extent2D::new(640, 480));
        assert_eq!(surface.wait_events_calls(), 1);
    }
}
