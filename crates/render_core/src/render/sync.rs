//! Synchronization primitives
//!
//! Semaphores order work on the GPU (image acquired before rendering,
//! rendering finished before presentation). Fences let the host wait for a
//! submission to complete. [`FrameSync`] bundles the three objects each
//! frame in flight needs.

use std::sync::Arc;

use super::backends::{FenceHandle, GpuDevice, SemaphoreHandle};
use super::errors::RenderResult;

/// GPU-side ordering primitive, destroyed on drop
pub struct Semaphore {
    gpu: Arc<dyn GpuDevice>,
    semaphore: SemaphoreHandle,
}

impl Semaphore {
    /// Create an unsignaled semaphore
    pub fn new(gpu: Arc<dyn GpuDevice>) -> RenderResult<Self> {
        let semaphore = gpu.create_semaphore()?;
        Ok(Self { gpu, semaphore })
    }

    /// Get the semaphore handle
    pub fn handle(&self) -> SemaphoreHandle {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        self.gpu.destroy_semaphore(self.semaphore);
    }
}

/// Host-waitable completion primitive, destroyed on drop
pub struct Fence {
    gpu: Arc<dyn GpuDevice>,
    fence: FenceHandle,
}

impl Fence {
    /// Create a fence, optionally already signaled
    pub fn new(gpu: Arc<dyn GpuDevice>, signaled: bool) -> RenderResult<Self> {
        let fence = gpu.create_fence(signaled)?;
        Ok(Self { gpu, fence })
    }

    /// Block until the fence signals or `timeout` nanoseconds pass
    pub fn wait(&self, timeout: u64) -> RenderResult<()> {
        self.gpu.wait_for_fences(&[self.fence], timeout)?;
        Ok(())
    }

    /// Return the fence to the unsignaled state
    pub fn reset(&self) -> RenderResult<()> {
        self.gpu.reset_fences(&[self.fence])?;
        Ok(())
    }

    /// Whether the fence is signaled, without blocking
    pub fn is_signaled(&self) -> RenderResult<bool> {
        Ok(self.gpu.fence_signaled(self.fence)?)
    }

    /// Get the fence handle
    pub fn handle(&self) -> FenceHandle {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        self.gpu.destroy_fence(self.fence);
    }
}

/// Synchronization objects for one frame in flight
pub struct FrameSync {
    /// Signaled when the acquired swapchain image is ready
    pub image_available: Semaphore,
    /// Signaled when rendering to the image has finished
    pub render_finished: Semaphore,
    /// Signaled when the frame's submission completes; created signaled
    pub in_flight: Fence,
}

impl FrameSync {
    /// Create a semaphore pair and a signaled fence
    pub fn new(gpu: &Arc<dyn GpuDevice>) -> RenderResult<Self> {
        Ok(Self {
            image_available: Semaphore::new(Arc::clone(gpu))?,
            render_finished: Semaphore::new(Arc::clone(gpu))?,
            in_flight: Fence::new(Arc::clone(gpu), true)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::headless::{HeadlessAdapter, HeadlessDevice, HeadlessSurface};
    use crate::render::backends::{BackendError, DeviceDesc, GpuInstance};
    use crate::render::backends::headless::HeadlessInstance;
    use crate::render::errors::RenderError;

    fn gpu() -> (Arc<dyn GpuDevice>, Arc<HeadlessDevice>) {
        let surface = HeadlessSurface::new(640, 480);
        let instance = HeadlessInstance::new(vec![HeadlessAdapter::new("test")], &surface);
        let adapter = instance.enumerate_adapters().unwrap()[0];
        let desc = DeviceDesc {
            queue_families: vec![0],
            extensions: vec!["VK_KHR_swapchain".to_string()],
            sampler_anisotropy: true,
        };
        let gpu = instance.create_device(adapter, &desc).unwrap();
        (gpu, instance.last_device().unwrap())
    }

    #[test]
    fn test_frame_sync_fence_starts_signaled() {
        let (gpu, _) = gpu();
        let sync = FrameSync::new(&gpu).unwrap();
        assert!(sync.in_flight.is_signaled().unwrap());
        sync.in_flight.wait(u64::MAX).unwrap();
        sync.in_flight.reset().unwrap();
        assert!(!sync.in_flight.is_signaled().unwrap());
    }

    #[test]
    fn test_waiting_on_unsubmitted_fence_times_out() {
        let (gpu, _) = gpu();
        let fence = Fence::new(gpu, false).unwrap();
        assert!(matches!(
            fence.wait(1_000),
            Err(RenderError::Backend(BackendError::Timeout))
        ));
    }

    #[test]
    fn test_drop_destroys_objects() {
        let (gpu, headless) = gpu();
        let before = headless.live_objects();
        {
            let _sync = FrameSync::new(&gpu).unwrap();
            assert_eq!(headless.live_objects(), before + 3);
        }
        assert_eq!(headless.live_objects(), before);
    }
}
