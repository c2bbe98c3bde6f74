//! Frame loop behavior: frame slots, fences, swapchain recreation

mod common;

use render_core::render::backends::headless::{RecordedCommand, ScriptedOutcome};
use render_core::render::backends::{AcquireOutcome, ColorSpace, Extent2D, Format, SurfaceFormat};
use render_core::render::{RenderError, SurfaceProvider, SwapChain, MAX_FRAMES_IN_FLIGHT};

#[test]
fn test_frame_index_cycles() {
    let (instance, surface) = common::headless(800, 600);
    let (device, _) = common::device(&instance);
    let mut renderer = common::renderer(&device, &surface);
    let mut window = surface.clone();

    for frame in 0..7 {
        renderer.begin_frame(&mut window).unwrap().unwrap();
        assert_eq!(renderer.frame_index().unwrap(), frame % MAX_FRAMES_IN_FLIGHT);
        renderer.end_frame(&mut window).unwrap();
    }
}

#[test]
fn test_at_most_two_frames_in_flight() {
    let (instance, surface) = common::headless(800, 600);
    let (device, headless) = common::device(&instance);
    let mut renderer = common::renderer(&device, &surface);
    let mut window = surface.clone();

    for _ in 0..12 {
        let command_buffer = renderer.begin_frame(&mut window).unwrap().unwrap();
        renderer.begin_swap_chain_render_pass(command_buffer).unwrap();
        renderer.end_swap_chain_render_pass(command_buffer).unwrap();
        renderer.end_frame(&mut window).unwrap();
        assert!(headless.pending_fences() <= MAX_FRAMES_IN_FLIGHT);
    }

    let stats = headless.stats();
    assert_eq!(stats.submissions, 12);
    assert_eq!(stats.presents, 12);
    assert_eq!(stats.max_pending_fences, MAX_FRAMES_IN_FLIGHT);
    assert_eq!(stats.invalid_commands, 0);
}

#[test]
fn test_frames_use_distinct_command_buffers() {
    let (instance, surface) = common::headless(800, 600);
    let (device, _) = common::device(&instance);
    let mut renderer = common::renderer(&device, &surface);
    let mut window = surface.clone();

    let first = renderer.begin_frame(&mut window).unwrap().unwrap();
    renderer.end_frame(&mut window).unwrap();
    let second = renderer.begin_frame(&mut window).unwrap().unwrap();
    renderer.end_frame(&mut window).unwrap();
    let third = renderer.begin_frame(&mut window).unwrap().unwrap();
    renderer.end_frame(&mut window).unwrap();

    assert_ne!(first, second);
    assert_eq!(first, third);
}

#[test]
fn test_resize_recreates_swapchain() {
    let (instance, surface) = common::headless(800, 600);
    let (device, headless) = common::device(&instance);
    let mut renderer = common::renderer(&device, &surface);
    let mut window = surface.clone();

    renderer.begin_frame(&mut window).unwrap().unwrap();
    renderer.end_frame(&mut window).unwrap();

    surface.resize(1024, 768);
    // stale chain: the acquire reports out of date and the frame is skipped
    assert!(renderer.begin_frame(&mut window).unwrap().is_none());
    assert!(!renderer.is_frame_in_progress());
    assert_eq!(renderer.swap_chain().extent(), Extent2D::new(1024, 768));
    assert!(!window.was_resized());

    renderer.begin_frame(&mut window).unwrap().unwrap();
    renderer.end_frame(&mut window).unwrap();
    assert_eq!(headless.stats().swapchains_created, 2);
    assert!((renderer.aspect_ratio() - 1024.0 / 768.0).abs() < f32::EPSILON);
}

#[test]
fn test_resize_during_frame_recreates_after_present() {
    let (instance, surface) = common::headless(800, 600);
    let (device, headless) = common::device(&instance);
    let mut renderer = common::renderer(&device, &surface);
    let mut window = surface.clone();

    renderer.begin_frame(&mut window).unwrap().unwrap();
    surface.resize(640, 480);
    renderer.end_frame(&mut window).unwrap();

    assert_eq!(renderer.swap_chain().extent(), Extent2D::new(640, 480));
    assert!(!window.was_resized());
    assert_eq!(headless.stats().swapchains_created, 2);
}

#[test]
fn test_suboptimal_present_recreates() {
    let (instance, surface) = common::headless(800, 600);
    let (device, headless) = common::device(&instance);
    let mut renderer = common::renderer(&device, &surface);
    let mut window = surface.clone();

    headless.script_present(ScriptedOutcome::Suboptimal);
    renderer.begin_frame(&mut window).unwrap().unwrap();
    renderer.end_frame(&mut window).unwrap();
    assert_eq!(headless.stats().swapchains_created, 2);

    renderer.begin_frame(&mut window).unwrap().unwrap();
    renderer.end_frame(&mut window).unwrap();
    assert_eq!(headless.stats().swapchains_created, 2);
}

#[test]
fn test_suboptimal_acquire_still_renders() {
    let (instance, surface) = common::headless(800, 600);
    let (device, headless) = common::device(&instance);
    let mut renderer = common::renderer(&device, &surface);
    let mut window = surface.clone();

    headless.script_acquire(ScriptedOutcome::Suboptimal);
    assert!(renderer.begin_frame(&mut window).unwrap().is_some());
    renderer.end_frame(&mut window).unwrap();
    assert_eq!(headless.stats().submissions, 1);
    assert_eq!(headless.stats().swapchains_created, 1);
}

#[test]
fn test_out_of_date_acquire_skips_frame() {
    let (instance, surface) = common::headless(800, 600);
    let (device, headless) = common::device(&instance);
    let mut renderer = common::renderer(&device, &surface);
    let mut window = surface.clone();

    headless.script_acquire(ScriptedOutcome::OutOfDate);
    assert!(renderer.begin_frame(&mut window).unwrap().is_none());
    assert_eq!(headless.stats().submissions, 0);
    assert_eq!(headless.stats().swapchains_created, 2);

    // the next frame starts from slot 0 of the new chain without error
    renderer.begin_frame(&mut window).unwrap().unwrap();
    assert_eq!(renderer.frame_index().unwrap(), 0);
    renderer.end_frame(&mut window).unwrap();
}

#[test]
fn test_minimized_window_waits_for_events() {
    let (instance, surface) = common::headless(800, 600);
    let (device, _) = common::device(&instance);
    let mut renderer = common::renderer(&device, &surface);
    let mut window = surface.clone();

    surface.resize(0, 0);
    surface.queue_extent_after_wait(320, 240);

    assert!(renderer.begin_frame(&mut window).unwrap().is_none());
    assert_eq!(surface.wait_events_calls(), 1);
    assert_eq!(renderer.swap_chain().extent(), Extent2D::new(320, 240));

    renderer.begin_frame(&mut window).unwrap().unwrap();
    renderer.end_frame(&mut window).unwrap();
}

#[test]
fn test_render_pass_requires_current_frame() {
    let (instance, surface) = common::headless(800, 600);
    let (device, headless) = common::device(&instance);
    let mut renderer = common::renderer(&device, &surface);
    let mut window = surface.clone();

    let command_buffer = renderer.begin_frame(&mut window).unwrap().unwrap();
    renderer.end_frame(&mut window).unwrap();
    assert!(matches!(
        renderer.begin_swap_chain_render_pass(command_buffer),
        Err(RenderError::FrameState(_))
    ));

    let command_buffer = renderer.begin_frame(&mut window).unwrap().unwrap();
    renderer.begin_swap_chain_render_pass(command_buffer).unwrap();
    renderer.end_swap_chain_render_pass(command_buffer).unwrap();
    renderer.end_frame(&mut window).unwrap();

    let commands = headless.recorded_commands(command_buffer);
    assert!(matches!(
        commands.first(),
        Some(RecordedCommand::BeginRenderPass { render_area, .. }) if render_area.extent == Extent2D::new(800, 600)
    ));
}

#[test]
fn test_image_owned_by_other_slot_waits_for_its_fence() {
    let (instance, _surface) = common::headless(800, 600);
    let (device, headless) = common::device(&instance);
    let mut swap_chain = SwapChain::new(&device, Extent2D::new(800, 600)).unwrap();

    assert!(matches!(
        swap_chain.acquire_next_image().unwrap(),
        AcquireOutcome::Acquired { image_index: 0, .. }
    ));
    swap_chain.submit_command_buffers(&[], 0).unwrap();
    assert!(!swap_chain.frame_sync()[0].in_flight.is_signaled().unwrap());

    // slot 1 gets image 0 back while slot 0's submission still owns it
    headless.script_image_index(0);
    assert!(matches!(
        swap_chain.acquire_next_image().unwrap(),
        AcquireOutcome::Acquired { image_index: 0, .. }
    ));
    assert_eq!(swap_chain.current_frame(), 1);
    let waits_before = headless.stats().fence_waits;

    swap_chain.submit_command_buffers(&[], 0).unwrap();
    assert_eq!(headless.stats().fence_waits, waits_before + 1);
    assert!(swap_chain.frame_sync()[0].in_flight.is_signaled().unwrap());
    assert_eq!(headless.pending_fences(), 1);
}

#[test]
fn test_format_change_on_recreate_is_fatal() {
    let (instance, surface) = common::headless(800, 600);
    let (device, headless) = common::device(&instance);
    let mut renderer = common::renderer(&device, &surface);
    let mut window = surface.clone();

    renderer.begin_frame(&mut window).unwrap().unwrap();
    renderer.end_frame(&mut window).unwrap();
    assert_eq!(renderer.swap_chain().image_format(), Format::B8G8R8A8Srgb);
    let render_pass = renderer.swap_chain_render_pass();

    // the window moved to a display without an sRGB format
    surface.set_formats(vec![SurfaceFormat::new(
        Format::B8G8R8A8Unorm,
        ColorSpace::SrgbNonlinear,
    )]);
    assert!(matches!(
        renderer.recreate_swap_chain(&mut window),
        Err(RenderError::SwapChainFormatChanged)
    ));
    assert_eq!(renderer.swap_chain().image_format(), Format::B8G8R8A8Srgb);
    assert_eq!(renderer.swap_chain_render_pass(), render_pass);
    assert_eq!(headless.stats().swapchains_created, 2);
    assert_eq!(headless.stats().invalid_destroys, 0);
}
