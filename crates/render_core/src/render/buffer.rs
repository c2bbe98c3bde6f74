//! GPU buffers with per-instance alignment
//!
//! A [`Buffer`] holds `instance_count` elements of `instance_size` bytes, each
//! padded to a multiple of the minimum offset alignment so that any element
//! can be bound as a uniform buffer at its own offset. Host-visible buffers
//! can be mapped once and written through; on non-coherent memory the writes
//! become visible to the device only after [`Buffer::flush`].

use std::ptr::NonNull;
use std::sync::Arc;

use bytemuck::Pod;

use super::backends::{
    BufferHandle, BufferUsage, DescriptorBufferInfo, GpuDevice, MemoryHandle,
    MemoryPropertyFlags, WHOLE_SIZE,
};
use super::device::Device;
use super::errors::{RenderError, RenderResult};

/// Active host mapping of a buffer's memory
#[derive(Debug, Clone, Copy)]
struct Mapping {
    ptr: NonNull<u8>,
    offset: u64,
    size: u64,
}

/// Buffer plus the memory bound to it, released on drop
pub struct Buffer {
    gpu: Arc<dyn GpuDevice>,
    buffer: BufferHandle,
    memory: MemoryHandle,
    mapping: Option<Mapping>,
    buffer_size: u64,
    instance_size: u64,
    instance_count: u32,
    alignment_size: u64,
    usage: BufferUsage,
    memory_properties: MemoryPropertyFlags,
}

impl Buffer {
    /// Smallest multiple of `min_offset_alignment` that fits `instance_size`
    ///
    /// An alignment of zero means "no requirement" and returns the size as is.
    /// Returns `None` when the padded size does not fit in a `u64`.
    pub fn compute_alignment(instance_size: u64, min_offset_alignment: u64) -> Option<u64> {
        if min_offset_alignment > 0 {
            instance_size
                .div_ceil(min_offset_alignment)
                .checked_mul(min_offset_alignment)
        } else {
            Some(instance_size)
        }
    }

    /// Allocate a buffer for `instance_count` aligned elements
    pub fn new(
        device: &Device,
        instance_size: u64,
        instance_count: u32,
        usage: BufferUsage,
        memory_properties: MemoryPropertyFlags,
        min_offset_alignment: u64,
    ) -> RenderResult<Self> {
        let alignment_size = Self::compute_alignment(instance_size, min_offset_alignment)
            .ok_or_else(|| {
                RenderError::invalid_operation(format!(
                    "instance size {instance_size} overflows when aligned to {min_offset_alignment}"
                ))
            })?;
        let buffer_size = alignment_size
            .checked_mul(u64::from(instance_count))
            .ok_or_else(|| {
                RenderError::invalid_operation(format!(
                    "{instance_count} instances of {alignment_size} bytes overflow the buffer size"
                ))
            })?;
        let (buffer, memory) = device.create_buffer(buffer_size, usage, memory_properties)?;

        log::trace!(
            "Created buffer: {instance_count} x {instance_size} bytes (aligned to {alignment_size}), usage {usage:?}"
        );

        Ok(Self {
            gpu: Arc::clone(device.gpu()),
            buffer,
            memory,
            mapping: None,
            buffer_size,
            instance_size,
            instance_count,
            alignment_size,
            usage,
            memory_properties,
        })
    }

    /// Map `size` bytes starting at `offset`; [`WHOLE_SIZE`] maps the rest of the buffer
    pub fn map(&mut self, size: u64, offset: u64) -> RenderResult<()> {
        if self.mapping.is_some() {
            return Err(RenderError::invalid_operation("buffer is already mapped"));
        }
        if offset > self.buffer_size {
            return Err(RenderError::invalid_operation(format!(
                "map offset {offset} beyond buffer size {}",
                self.buffer_size
            )));
        }

        let mapped_size = if size == WHOLE_SIZE {
            self.buffer_size - offset
        } else {
            size
        };
        let end = offset
            .checked_add(mapped_size)
            .filter(|end| *end <= self.buffer_size)
            .ok_or_else(|| {
                RenderError::invalid_operation(format!(
                    "map of {mapped_size} bytes at {offset} beyond buffer size {}",
                    self.buffer_size
                ))
            })?;
        log::trace!("Mapping buffer range {offset}..{end}");

        let ptr = self.gpu.map_memory(self.memory, offset, size)?;
        self.mapping = Some(Mapping {
            ptr,
            offset,
            size: mapped_size,
        });
        Ok(())
    }

    /// Map the whole buffer
    pub fn map_all(&mut self) -> RenderResult<()> {
        self.map(WHOLE_SIZE, 0)
    }

    /// Release the mapping, if any
    pub fn unmap(&mut self) {
        if self.mapping.take().is_some() {
            self.gpu.unmap_memory(self.memory);
        }
    }

    /// Whether the buffer is currently mapped
    pub fn is_mapped(&self) -> bool {
        self.mapping.is_some()
    }

    /// Copy bytes into the mapped range
    ///
    /// `offset` is relative to the start of the mapping. With `size` equal to
    /// [`WHOLE_SIZE`] the whole of `data` is written at the mapping start;
    /// otherwise the first `size` bytes of `data` go to `offset`.
    pub fn write_to_buffer(&mut self, data: &[u8], size: u64, offset: u64) -> RenderResult<()> {
        let mapping = self
            .mapping
            .ok_or_else(|| RenderError::invalid_operation("cannot write to an unmapped buffer"))?;

        let (len, offset) = if size == WHOLE_SIZE {
            (data.len() as u64, 0)
        } else {
            (size, offset)
        };
        if len > data.len() as u64 {
            return Err(RenderError::invalid_operation(format!(
                "write of {len} bytes from a {}-byte slice",
                data.len()
            )));
        }
        if !offset.checked_add(len).is_some_and(|end| end <= mapping.size) {
            return Err(RenderError::invalid_operation(format!(
                "write of {len} bytes at {offset} exceeds mapped size {}",
                mapping.size
            )));
        }

        let (Ok(len), Ok(offset)) = (usize::try_from(len), usize::try_from(offset)) else {
            return Err(RenderError::invalid_operation("write range exceeds address space"));
        };
        // SAFETY: the mapping is live and `offset + len` lies within it.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapping.ptr.as_ptr().add(offset), len);
        }
        Ok(())
    }

    /// Write one plain-old-data value at the start of the mapping
    pub fn write_value<T: Pod>(&mut self, value: &T) -> RenderResult<()> {
        self.write_to_buffer(bytemuck::bytes_of(value), WHOLE_SIZE, 0)
    }

    /// Make host writes to a range visible to the device
    pub fn flush(&self, size: u64, offset: u64) -> RenderResult<()> {
        self.gpu.flush_mapped_range(self.memory, offset, size)?;
        Ok(())
    }

    /// Make device writes to a range visible to the host
    pub fn invalidate(&self, size: u64, offset: u64) -> RenderResult<()> {
        self.gpu.invalidate_mapped_range(self.memory, offset, size)?;
        Ok(())
    }

    /// Descriptor info for a range of the buffer
    pub fn descriptor_info(&self, size: u64, offset: u64) -> DescriptorBufferInfo {
        DescriptorBufferInfo {
            buffer: self.buffer,
            offset,
            range: size,
        }
    }

    /// Write `instance_size` bytes of `data` into element `index`
    pub fn write_to_index(&mut self, data: &[u8], index: u32) -> RenderResult<()> {
        self.check_index(index)?;
        self.write_to_buffer(data, self.instance_size, self.index_offset(index))
    }

    /// Flush element `index`
    pub fn flush_index(&self, index: u32) -> RenderResult<()> {
        self.check_index(index)?;
        self.flush(self.alignment_size, self.index_offset(index))
    }

    /// Invalidate element `index`
    pub fn invalidate_index(&self, index: u32) -> RenderResult<()> {
        self.check_index(index)?;
        self.invalidate(self.alignment_size, self.index_offset(index))
    }

    /// Descriptor info covering element `index`
    pub fn descriptor_info_for_index(&self, index: u32) -> DescriptorBufferInfo {
        self.descriptor_info(self.alignment_size, self.index_offset(index))
    }

    fn index_offset(&self, index: u32) -> u64 {
        u64::from(index) * self.alignment_size
    }

    fn check_index(&self, index: u32) -> RenderResult<()> {
        if index < self.instance_count {
            Ok(())
        } else {
            Err(RenderError::invalid_operation(format!(
                "index {index} out of range for {} instances",
                self.instance_count
            )))
        }
    }

    /// Buffer handle
    pub fn handle(&self) -> BufferHandle {
        self.buffer
    }

    /// Memory handle
    pub fn memory(&self) -> MemoryHandle {
        self.memory
    }

    /// Total size in bytes
    pub fn buffer_size(&self) -> u64 {
        self.buffer_size
    }

    /// Unpadded element size
    pub fn instance_size(&self) -> u64 {
        self.instance_size
    }

    /// Number of elements
    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }

    /// Padded element stride
    pub fn alignment_size(&self) -> u64 {
        self.alignment_size
    }

    /// Usage flags the buffer was created with
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    /// Memory properties the buffer was allocated with
    pub fn memory_properties(&self) -> MemoryPropertyFlags {
        self.memory_properties
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.unmap();
        self.gpu.destroy_buffer(self.buffer);
        self.gpu.free_memory(self.memory);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::headless::{HeadlessInstance, HeadlessSurface};

    const HOST: MemoryPropertyFlags =
        MemoryPropertyFlags::HOST_VISIBLE.union(MemoryPropertyFlags::HOST_COHERENT);

    fn device() -> (Device, Arc<HeadlessInstance>) {
        let surface = HeadlessSurface::new(800, 600);
        let instance = Arc::new(HeadlessInstance::with_default_adapter(&surface));
        (Device::new(instance.clone()).unwrap(), instance)
    }

    #[test]
    fn test_alignment_rounds_up_to_multiple() {
        assert_eq!(Buffer::compute_alignment(48, 64), Some(64));
        assert_eq!(Buffer::compute_alignment(64, 64), Some(64));
        assert_eq!(Buffer::compute_alignment(65, 64), Some(128));
        assert_eq!(Buffer::compute_alignment(48, 0), Some(48));
        assert_eq!(Buffer::compute_alignment(12, 1), Some(12));
        assert_eq!(Buffer::compute_alignment(u64::MAX - 2, 64), None);
    }

    #[test]
    fn test_oversized_layout_is_rejected() {
        let (device, instance) = device();
        let headless = instance.last_device().unwrap();
        let before = headless.live_objects();

        assert!(matches!(
            Buffer::new(&device, u64::MAX - 2, 1, BufferUsage::UNIFORM_BUFFER, HOST, 64),
            Err(RenderError::InvalidOperation { .. })
        ));
        assert!(matches!(
            Buffer::new(&device, u64::MAX / 2, 3, BufferUsage::UNIFORM_BUFFER, HOST, 0),
            Err(RenderError::InvalidOperation { .. })
        ));
        assert_eq!(headless.live_objects(), before);
    }

    #[test]
    fn test_out_of_range_offsets_do_not_wrap() {
        let (device, instance) = device();
        let mut buffer = Buffer::new(&device, 16, 1, BufferUsage::UNIFORM_BUFFER, HOST, 0).unwrap();
        assert!(matches!(
            buffer.map(u64::MAX - 4, 8),
            Err(RenderError::InvalidOperation { .. })
        ));
        assert!(!buffer.is_mapped());

        buffer.map_all().unwrap();
        assert!(matches!(
            buffer.write_to_buffer(&[1; 4], 4, u64::MAX),
            Err(RenderError::InvalidOperation { .. })
        ));
        assert!(matches!(
            buffer.write_to_buffer(&[1; 4], 4, u64::MAX - 2),
            Err(RenderError::InvalidOperation { .. })
        ));

        let headless = instance.last_device().unwrap();
        assert_eq!(headless.buffer_contents(buffer.handle()).unwrap(), vec![0; 16]);
    }

    #[test]
    fn test_instance_layout() {
        let (device, _) = device();
        let buffer = Buffer::new(&device, 48, 10, BufferUsage::UNIFORM_BUFFER, HOST, 64).unwrap();
        assert_eq!(buffer.alignment_size(), 64);
        assert_eq!(buffer.buffer_size(), 640);

        let info = buffer.descriptor_info_for_index(3);
        assert_eq!(info.offset, 192);
        assert_eq!(info.range, 64);
    }

    #[test]
    fn test_mapping_twice_is_rejected() {
        let (device, _) = device();
        let mut buffer = Buffer::new(&device, 16, 1, BufferUsage::UNIFORM_BUFFER, HOST, 0).unwrap();
        buffer.map_all().unwrap();
        assert!(matches!(
            buffer.map_all(),
            Err(RenderError::InvalidOperation { .. })
        ));
        buffer.unmap();
        assert!(!buffer.is_mapped());
        buffer.map_all().unwrap();
    }

    #[test]
    fn test_writes_land_at_aligned_offsets() {
        let (device, instance) = device();
        let mut buffer = Buffer::new(&device, 4, 3, BufferUsage::UNIFORM_BUFFER, HOST, 8).unwrap();
        buffer.map_all().unwrap();
        buffer.write_to_index(&[1, 2, 3, 4], 1).unwrap();
        buffer.write_to_index(&[9, 9, 9, 9], 2).unwrap();
        buffer.flush_index(1).unwrap();

        let headless = instance.last_device().unwrap();
        let bytes = headless.buffer_contents(buffer.handle()).unwrap();
        assert_eq!(&bytes[8..12], &[1, 2, 3, 4]);
        assert_eq!(&bytes[16..20], &[9, 9, 9, 9]);
        assert_eq!(&bytes[0..4], &[0, 0, 0, 0]);
        assert_eq!(headless.stats().flushes, 1);
    }

    #[test]
    fn test_invalid_writes_are_rejected() {
        let (device, _) = device();
        let mut buffer = Buffer::new(&device, 8, 2, BufferUsage::UNIFORM_BUFFER, HOST, 0).unwrap();

        assert!(buffer.write_to_buffer(&[0; 4], WHOLE_SIZE, 0).is_err());

        buffer.map(8, 0).unwrap();
        assert!(buffer.write_to_buffer(&[0; 12], WHOLE_SIZE, 0).is_err());
        assert!(buffer.write_to_buffer(&[0; 4], 4, 6).is_err());
        assert!(buffer.write_to_buffer(&[0; 2], 4, 0).is_err());
        assert!(buffer.write_to_index(&[0; 8], 2).is_err());
        buffer.write_to_buffer(&[7; 4], 4, 4).unwrap();
    }

    #[test]
    fn test_device_local_memory_cannot_be_mapped() {
        let (device, _) = device();
        let mut buffer = Buffer::new(
            &device,
            64,
            1,
            BufferUsage::VERTEX_BUFFER | BufferUsage::TRANSFER_DST,
            MemoryPropertyFlags::DEVICE_LOCAL,
            0,
        )
        .unwrap();
        assert!(matches!(buffer.map_all(), Err(RenderError::Backend(_))));
    }

    #[test]
    fn test_drop_releases_buffer_and_memory() {
        let (device, instance) = device();
        let headless = instance.last_device().unwrap();
        let before = headless.live_objects();
        {
            let mut buffer =
                Buffer::new(&device, 32, 4, BufferUsage::UNIFORM_BUFFER, HOST, 0).unwrap();
            buffer.map_all().unwrap();
            assert_eq!(headless.live_objects(), before + 2);
        }
        assert_eq!(headless.live_objects(), before);
        assert_eq!(headless.stats().invalid_destroys, 0);
    }
}
