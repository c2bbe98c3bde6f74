//! Buffers, descriptors and resource lifetimes on the headless device

mod common;

use std::sync::Arc;

use render_core::render::backends::{
    BufferUsage, DescriptorKind, MemoryPropertyFlags, ShaderStages, WHOLE_SIZE,
};
use render_core::render::{
    Buffer, Camera, DescriptorError, DescriptorPool, DescriptorSetLayout, DescriptorWriter,
    RenderError, RenderSystem,
};

#[test]
fn test_alignment_invariant() {
    for (size, alignment) in [(1, 64), (48, 64), (64, 64), (65, 64), (100, 256), (48, 0), (13, 1)] {
        let aligned = Buffer::compute_alignment(size, alignment).unwrap();
        assert!(aligned >= size);
        if alignment > 0 {
            assert_eq!(aligned % alignment, 0);
            assert!(aligned - size < alignment);
        } else {
            assert_eq!(aligned, size);
        }
    }
}

#[test]
fn test_instanced_buffer_layout() {
    let (instance, _surface) = common::headless(800, 600);
    let (device, _) = common::device(&instance);

    let buffer = Buffer::new(
        &device,
        48,
        10,
        BufferUsage::UNIFORM_BUFFER,
        MemoryPropertyFlags::HOST_VISIBLE,
        64,
    )
    .unwrap();

    assert_eq!(buffer.alignment_size(), 64);
    assert_eq!(buffer.buffer_size(), 640);
    assert_eq!(buffer.descriptor_info_for_index(3).offset, 192);
    assert_eq!(buffer.descriptor_info_for_index(3).range, 64);
}

#[test]
fn test_indexed_writes_land_at_aligned_offsets() {
    let (instance, _surface) = common::headless(800, 600);
    let (device, headless) = common::device(&instance);
    let mut buffer = Buffer::new(
        &device,
        4,
        3,
        BufferUsage::UNIFORM_BUFFER,
        MemoryPropertyFlags::HOST_VISIBLE,
        64,
    )
    .unwrap();

    buffer.map_all().unwrap();
    buffer.write_to_index(&[1, 2, 3, 4], 2).unwrap();
    buffer.flush_index(2).unwrap();
    assert!(matches!(
        buffer.write_to_index(&[0; 4], 3),
        Err(RenderError::InvalidOperation { .. })
    ));

    let contents = headless.buffer_contents(buffer.handle()).unwrap();
    assert_eq!(&contents[128..132], &[1, 2, 3, 4]);
    assert!(contents[..128].iter().all(|&byte| byte == 0));
    assert_eq!(headless.stats().flushes, 1);
}

#[test]
fn test_mapping_rules() {
    let (instance, _surface) = common::headless(800, 600);
    let (device, _) = common::device(&instance);
    let mut buffer = Buffer::new(
        &device,
        16,
        1,
        BufferUsage::TRANSFER_SRC,
        MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_COHERENT,
        0,
    )
    .unwrap();

    assert!(buffer.write_to_buffer(&[0; 4], WHOLE_SIZE, 0).is_err());
    buffer.map_all().unwrap();
    assert!(matches!(buffer.map_all(), Err(RenderError::InvalidOperation { .. })));
    assert!(buffer.write_to_buffer(&[0; 32], WHOLE_SIZE, 0).is_err());
    buffer.unmap();
    assert!(!buffer.is_mapped());
}

#[test]
fn test_staging_upload_to_device_local() {
    let (instance, _surface) = common::headless(800, 600);
    let (device, headless) = common::device(&instance);
    let data: Vec<u8> = (0..=255).collect();
    let size = data.len() as u64;

    let mut staging = Buffer::new(
        &device,
        size,
        1,
        BufferUsage::TRANSFER_SRC,
        MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_COHERENT,
        0,
    )
    .unwrap();
    staging.map_all().unwrap();
    staging.write_to_buffer(&data, WHOLE_SIZE, 0).unwrap();

    let target = Buffer::new(
        &device,
        size,
        1,
        BufferUsage::TRANSFER_DST | BufferUsage::VERTEX_BUFFER,
        MemoryPropertyFlags::DEVICE_LOCAL,
        0,
    )
    .unwrap();
    device.copy_buffer(staging.handle(), target.handle(), size).unwrap();

    assert_eq!(headless.buffer_contents(target.handle()).unwrap(), data);
    assert_eq!(headless.stats().queue_wait_idles, 1);
}

#[test]
fn test_write_to_unknown_binding_rejected_before_allocation() {
    let (instance, _surface) = common::headless(800, 600);
    let (device, headless) = common::device(&instance);
    let gpu = Arc::clone(device.gpu());

    let layout = DescriptorSetLayout::builder()
        .add_binding(0, DescriptorKind::UniformBuffer, ShaderStages::VERTEX, 1)
        .unwrap()
        .build(Arc::clone(&gpu))
        .unwrap();
    let pool = DescriptorPool::builder()
        .set_max_sets(4)
        .add_pool_size(DescriptorKind::UniformBuffer, 4)
        .build(gpu)
        .unwrap();
    let buffer = Buffer::new(
        &device,
        64,
        1,
        BufferUsage::UNIFORM_BUFFER,
        MemoryPropertyFlags::HOST_VISIBLE,
        0,
    )
    .unwrap();

    let result = DescriptorWriter::new(&layout, &pool).write_buffer(5, buffer.descriptor_info(WHOLE_SIZE, 0));
    assert!(matches!(result, Err(DescriptorError::UnknownBinding(5))));
    assert_eq!(headless.stats().descriptor_sets_allocated, 0);
    assert_eq!(headless.allocated_sets(pool.handle()), 0);
}

#[test]
fn test_render_system_releases_everything() {
    let (instance, surface) = common::headless(800, 600);
    let mut window = surface.clone();
    let config = common::renderer_config("release");

    {
        let mut system = RenderSystem::new(instance.clone(), &mut window, &config).unwrap();
        let camera = Camera::new();
        for _ in 0..3 {
            system.draw_scene(&mut window, Some(&camera), &[]).unwrap();
        }
        surface.resize(400, 300);
        for _ in 0..3 {
            system.draw_scene(&mut window, Some(&camera), &[]).unwrap();
        }
        assert!(instance.last_device().unwrap().live_objects() > 0);
    }

    let headless = instance.last_device().unwrap();
    assert_eq!(headless.live_objects(), 0);
    assert_eq!(headless.stats().invalid_destroys, 0);
    assert_eq!(headless.stats().invalid_commands, 0);
}

#[test]
fn test_render_system_rejects_missing_shaders() {
    let (instance, surface) = common::headless(800, 600);
    let mut window = surface.clone();
    let mut config = common::renderer_config("missing_shaders");
    config.shaders.vertex_shader_path = "does/not/exist.vert.spv".to_string();

    assert!(RenderSystem::new(instance, &mut window, &config).is_err());
}
