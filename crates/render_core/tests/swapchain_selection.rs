//! Swapchain parameter selection against simulated surfaces

mod common;

use render_core::render::backends::headless::HeadlessAdapter;
use render_core::render::backends::{
    ColorSpace, Extent2D, Format, PresentMode, SurfaceCapabilities, SurfaceFormat,
};
use render_core::render::swapchain::{
    choose_swap_present_mode, choose_swap_surface_format, SwapChain, MAX_FRAMES_IN_FLIGHT,
};

const SRGB: SurfaceFormat = SurfaceFormat {
    format: Format::B8G8R8A8Srgb,
    color_space: ColorSpace::SrgbNonlinear,
};
const UNORM: SurfaceFormat = SurfaceFormat {
    format: Format::B8G8R8A8Unorm,
    color_space: ColorSpace::SrgbNonlinear,
};

fn capabilities(min: u32, max: u32, extent: Extent2D) -> SurfaceCapabilities {
    SurfaceCapabilities {
        min_image_count: min,
        max_image_count: max,
        current_extent: extent,
        min_image_extent: Extent2D::new(1, 1),
        max_image_extent: Extent2D::new(4096, 4096),
    }
}

#[test]
fn test_end_to_end_small_surface() {
    let adapter = HeadlessAdapter::new("Small surface GPU")
        .with_capabilities(capabilities(2, 3, Extent2D::new(200, 200)))
        .with_surface_formats(vec![UNORM, SRGB])
        .with_present_modes(vec![PresentMode::Fifo, PresentMode::Mailbox]);
    let (instance, _surface) = common::headless_with(adapter, 200, 200);
    let (device, headless) = common::device(&instance);

    let swap_chain = SwapChain::new(&device, Extent2D::new(200, 200)).unwrap();

    assert_eq!(swap_chain.image_count(), 3);
    assert_eq!(swap_chain.extent(), Extent2D::new(200, 200));
    assert_eq!(swap_chain.image_format(), Format::B8G8R8A8Srgb);
    assert_eq!(swap_chain.present_mode(), PresentMode::Mailbox);
    assert_eq!(swap_chain.frame_sync().len(), MAX_FRAMES_IN_FLIGHT);
    for sync in swap_chain.frame_sync() {
        assert!(sync.in_flight.is_signaled().unwrap());
    }
    assert_eq!(headless.stats().swapchains_created, 1);
    assert_eq!(headless.live_fences(), MAX_FRAMES_IN_FLIGHT);
    assert_eq!(headless.live_semaphores(), 2 * MAX_FRAMES_IN_FLIGHT);

    drop(swap_chain);
    assert_eq!(headless.live_fences(), 0);
    assert_eq!(headless.live_semaphores(), 0);
}

#[test]
fn test_preferred_format_wins_regardless_of_position() {
    let formats = [UNORM, UNORM, UNORM, SRGB];
    assert_eq!(choose_swap_surface_format(&formats), Some(SRGB));

    let adapter = HeadlessAdapter::new("Format GPU").with_surface_formats(vec![UNORM, SRGB]);
    let (instance, _surface) = common::headless_with(adapter, 640, 480);
    let (device, _) = common::device(&instance);
    let swap_chain = SwapChain::new(&device, Extent2D::new(640, 480)).unwrap();
    assert_eq!(swap_chain.image_format(), Format::B8G8R8A8Srgb);
}

#[test]
fn test_first_format_used_without_preferred() {
    let adapter = HeadlessAdapter::new("Unorm GPU").with_surface_formats(vec![UNORM]);
    let (instance, _surface) = common::headless_with(adapter, 640, 480);
    let (device, _) = common::device(&instance);
    let swap_chain = SwapChain::new(&device, Extent2D::new(640, 480)).unwrap();
    assert_eq!(swap_chain.image_format(), Format::B8G8R8A8Unorm);
}

#[test]
fn test_present_mode_falls_back_to_fifo() {
    // Fifo is guaranteed, so it is returned even when not listed
    assert_eq!(choose_swap_present_mode(&[PresentMode::Immediate]), PresentMode::Fifo);
    assert_eq!(choose_swap_present_mode(&[]), PresentMode::Fifo);

    let adapter = HeadlessAdapter::new("Fifo GPU").with_present_modes(vec![PresentMode::Fifo]);
    let (instance, _surface) = common::headless_with(adapter, 640, 480);
    let (device, _) = common::device(&instance);
    let swap_chain = SwapChain::new(&device, Extent2D::new(640, 480)).unwrap();
    assert_eq!(swap_chain.present_mode(), PresentMode::Fifo);
}

#[test]
fn test_unbounded_max_image_count() {
    let adapter = HeadlessAdapter::new("Unbounded GPU")
        .with_capabilities(capabilities(3, 0, Extent2D::new(640, 480)));
    let (instance, _surface) = common::headless_with(adapter, 640, 480);
    let (device, _) = common::device(&instance);
    let swap_chain = SwapChain::new(&device, Extent2D::new(640, 480)).unwrap();
    assert_eq!(swap_chain.image_count(), 4);
}

#[test]
fn test_recreation_keeps_formats() {
    let (instance, surface) = common::headless(800, 600);
    let (device, headless) = common::device(&instance);
    let mut renderer = common::renderer(&device, &surface);
    let mut window = surface.clone();

    let format = renderer.swap_chain().image_format();
    let depth_format = renderer.swap_chain().depth_format();
    renderer.recreate_swap_chain(&mut window).unwrap();
    renderer.recreate_swap_chain(&mut window).unwrap();

    assert_eq!(renderer.swap_chain().image_format(), format);
    assert_eq!(renderer.swap_chain().depth_format(), depth_format);
    assert_eq!(renderer.swap_chain().extent(), Extent2D::new(800, 600));
    assert_eq!(headless.stats().swapchains_created, 3);
    assert!(headless.stats().device_wait_idles >= 2);
}
