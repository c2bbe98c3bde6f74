//! Descriptor set layouts, pools and writers
//!
//! A layout is the binding contract between host-written resources and the
//! shader stages that read them. Pools hand out sets satisfying a layout and
//! the writer fills them in. Running out of pool space is not fatal: callers
//! get [`DescriptorError::PoolExhausted`] and decide what to do.

use std::collections::HashMap;
use std::sync::Arc;

use super::backends::{
    BackendError, DescriptorBufferInfo, DescriptorImageInfo, DescriptorKind,
    DescriptorPoolDesc, DescriptorPoolFlags, DescriptorPoolHandle, DescriptorPoolSize,
    DescriptorResource, DescriptorSetHandle, DescriptorSetLayoutHandle, DescriptorWrite,
    GpuDevice, LayoutBinding, ShaderStages,
};
use super::errors::DescriptorError;

/// Result type for descriptor operations
pub type DescriptorResult<T> = Result<T, DescriptorError>;

/// Builder for [`DescriptorSetLayout`]
#[derive(Debug, Default)]
pub struct DescriptorSetLayoutBuilder {
    bindings: HashMap<u32, LayoutBinding>,
}

impl DescriptorSetLayoutBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a binding; each index may only be declared once
    pub fn add_binding(
        mut self,
        binding: u32,
        kind: DescriptorKind,
        stages: ShaderStages,
        count: u32,
    ) -> DescriptorResult<Self> {
        if self.bindings.contains_key(&binding) {
            return Err(DescriptorError::DuplicateBinding(binding));
        }
        self.bindings.insert(
            binding,
            LayoutBinding {
                binding,
                kind,
                stages,
                count,
            },
        );
        Ok(self)
    }

    /// Create the layout
    pub fn build(self, gpu: Arc<dyn GpuDevice>) -> DescriptorResult<DescriptorSetLayout> {
        let mut ordered: Vec<LayoutBinding> = self.bindings.values().copied().collect();
        ordered.sort_by_key(|binding| binding.binding);
        let layout = gpu.create_descriptor_set_layout(&ordered)?;
        log::debug!("Created descriptor set layout with {} bindings", ordered.len());
        Ok(DescriptorSetLayout {
            gpu,
            layout,
            bindings: self.bindings,
        })
    }
}

/// Immutable descriptor set layout
pub struct DescriptorSetLayout {
    gpu: Arc<dyn GpuDevice>,
    layout: DescriptorSetLayoutHandle,
    bindings: HashMap<u32, LayoutBinding>,
}

impl DescriptorSetLayout {
    /// Start building a layout
    pub fn builder() -> DescriptorSetLayoutBuilder {
        DescriptorSetLayoutBuilder::new()
    }

    /// Layout handle
    pub fn handle(&self) -> DescriptorSetLayoutHandle {
        self.layout
    }

    /// Declared binding at `index`
    pub fn binding(&self, index: u32) -> Option<&LayoutBinding> {
        self.bindings.get(&index)
    }

    /// Number of declared bindings
    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        self.gpu.destroy_descriptor_set_layout(self.layout);
    }
}

/// Builder for [`DescriptorPool`]
#[derive(Debug)]
pub struct DescriptorPoolBuilder {
    pool_sizes: Vec<DescriptorPoolSize>,
    max_sets: u32,
    flags: DescriptorPoolFlags,
}

impl Default for DescriptorPoolBuilder {
    fn default() -> Self {
        Self {
            pool_sizes: Vec::new(),
            max_sets: 1000,
            flags: DescriptorPoolFlags::empty(),
        }
    }
}

impl DescriptorPoolBuilder {
    /// Create a builder with room for 1000 sets and no descriptors
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `count` descriptors of `kind`
    #[must_use]
    pub fn add_pool_size(mut self, kind: DescriptorKind, count: u32) -> Self {
        self.pool_sizes.push(DescriptorPoolSize { kind, count });
        self
    }

    /// Maximum number of sets allocated at once
    #[must_use]
    pub fn set_max_sets(mut self, max_sets: u32) -> Self {
        self.max_sets = max_sets;
        self
    }

    /// Pool creation flags
    #[must_use]
    pub fn set_pool_flags(mut self, flags: DescriptorPoolFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Create the pool
    pub fn build(self, gpu: Arc<dyn GpuDevice>) -> DescriptorResult<DescriptorPool> {
        let desc = DescriptorPoolDesc {
            max_sets: self.max_sets,
            pool_sizes: self.pool_sizes,
            flags: self.flags,
        };
        let pool = gpu.create_descriptor_pool(&desc)?;
        log::debug!(
            "Created descriptor pool: {} sets, {} pool sizes",
            desc.max_sets,
            desc.pool_sizes.len()
        );
        Ok(DescriptorPool { gpu, pool })
    }
}

/// Fixed-capacity arena of descriptor sets
pub struct DescriptorPool {
    gpu: Arc<dyn GpuDevice>,
    pool: DescriptorPoolHandle,
}

impl DescriptorPool {
    /// Start building a pool
    pub fn builder() -> DescriptorPoolBuilder {
        DescriptorPoolBuilder::new()
    }

    /// Allocate a set for `layout`
    ///
    /// Exhaustion is reported as [`DescriptorError::PoolExhausted`]; the
    /// pool stays usable for smaller requests.
    pub fn allocate_descriptor(
        &self,
        layout: &DescriptorSetLayout,
    ) -> DescriptorResult<DescriptorSetHandle> {
        match self.gpu.allocate_descriptor_set(self.pool, layout.handle()) {
            Ok(set) => Ok(set),
            Err(BackendError::OutOfPoolMemory) => {
                log::warn!("Descriptor pool {:#x} exhausted", self.pool.as_raw());
                Err(DescriptorError::PoolExhausted)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Return sets to the pool; requires [`DescriptorPoolFlags::FREE_DESCRIPTOR_SET`]
    pub fn free_descriptors(&self, sets: &[DescriptorSetHandle]) -> DescriptorResult<()> {
        self.gpu.free_descriptor_sets(self.pool, sets)?;
        Ok(())
    }

    /// Return every set to the pool
    pub fn reset_pool(&self) -> DescriptorResult<()> {
        self.gpu.reset_descriptor_pool(self.pool)?;
        Ok(())
    }

    /// Pool handle
    pub fn handle(&self) -> DescriptorPoolHandle {
        self.pool
    }

    pub(crate) fn gpu(&self) -> &dyn GpuDevice {
        self.gpu.as_ref()
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        self.gpu.destroy_descriptor_pool(self.pool);
    }
}

/// Collects writes against a layout, then allocates or updates a set
pub struct DescriptorWriter<'a> {
    layout: &'a DescriptorSetLayout,
    pool: &'a DescriptorPool,
    writes: Vec<(u32, DescriptorKind, DescriptorResource)>,
}

impl<'a> DescriptorWriter<'a> {
    /// Create a writer for sets of `layout` from `pool`
    pub fn new(layout: &'a DescriptorSetLayout, pool: &'a DescriptorPool) -> Self {
        Self {
            layout,
            pool,
            writes: Vec::new(),
        }
    }

    fn single_binding(&self, binding: u32) -> DescriptorResult<&LayoutBinding> {
        let declared = self
            .layout
            .binding(binding)
            .ok_or(DescriptorError::UnknownBinding(binding))?;
        if declared.count != 1 {
            return Err(DescriptorError::ArrayBindingUnsupported {
                binding,
                count: declared.count,
            });
        }
        Ok(declared)
    }

    /// Queue a buffer write
    pub fn write_buffer(mut self, binding: u32, info: DescriptorBufferInfo) -> DescriptorResult<Self> {
        let kind = self.single_binding(binding)?.kind;
        self.writes.push((binding, kind, DescriptorResource::Buffer(info)));
        Ok(self)
    }

    /// Queue an image write
    pub fn write_image(mut self, binding: u32, info: DescriptorImageInfo) -> DescriptorResult<Self> {
        let kind = self.single_binding(binding)?.kind;
        self.writes.push((binding, kind, DescriptorResource::Image(info)));
        Ok(self)
    }

    /// Allocate a set and apply the queued writes to it
    pub fn build(self) -> DescriptorResult<DescriptorSetHandle> {
        let set = self.pool.allocate_descriptor(self.layout)?;
        self.overwrite(set);
        Ok(set)
    }

    /// Apply the queued writes to an existing set
    pub fn overwrite(&self, set: DescriptorSetHandle) {
        let writes: Vec<DescriptorWrite> = self
            .writes
            .iter()
            .map(|&(binding, kind, resource)| DescriptorWrite {
                set,
                binding,
                kind,
                resource,
            })
            .collect();
        self.pool.gpu().update_descriptor_sets(&writes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::headless::{HeadlessDevice, HeadlessInstance, HeadlessSurface};
    use crate::render::backends::{BufferHandle, DeviceDesc, GpuInstance, WHOLE_SIZE};

    fn gpu() -> (Arc<dyn GpuDevice>, Arc<HeadlessDevice>) {
        let surface = HeadlessSurface::new(640, 480);
        let instance = HeadlessInstance::with_default_adapter(&surface);
        let adapter = instance.enumerate_adapters().unwrap()[0];
        let gpu = instance
            .create_device(
                adapter,
                &DeviceDesc {
                    queue_families: vec![0],
                    extensions: vec!["VK_KHR_swapchain".to_string()],
                    sampler_anisotropy: true,
                },
            )
            .unwrap();
        (gpu, instance.last_device().unwrap())
    }

    fn ubo_layout(gpu: &Arc<dyn GpuDevice>) -> DescriptorSetLayout {
        DescriptorSetLayout::builder()
            .add_binding(0, DescriptorKind::UniformBuffer, ShaderStages::ALL_GRAPHICS, 1)
            .unwrap()
            .add_binding(1, DescriptorKind::CombinedImageSampler, ShaderStages::FRAGMENT, 4)
            .unwrap()
            .build(Arc::clone(gpu))
            .unwrap()
    }

    fn buffer_info(raw: u64) -> DescriptorBufferInfo {
        DescriptorBufferInfo {
            buffer: BufferHandle::from_raw(raw),
            offset: 0,
            range: WHOLE_SIZE,
        }
    }

    #[test]
    fn test_duplicate_binding_rejected() {
        let result = DescriptorSetLayout::builder()
            .add_binding(0, DescriptorKind::UniformBuffer, ShaderStages::VERTEX, 1)
            .unwrap()
            .add_binding(0, DescriptorKind::StorageBuffer, ShaderStages::VERTEX, 1);
        assert_eq!(result.err(), Some(DescriptorError::DuplicateBinding(0)));
    }

    #[test]
    fn test_unknown_binding_rejected_before_allocation() {
        let (gpu, headless) = gpu();
        let layout = ubo_layout(&gpu);
        let pool = DescriptorPool::builder()
            .add_pool_size(DescriptorKind::UniformBuffer, 2)
            .add_pool_size(DescriptorKind::CombinedImageSampler, 8)
            .set_max_sets(2)
            .build(Arc::clone(&gpu))
            .unwrap();

        let result = DescriptorWriter::new(&layout, &pool).write_buffer(5, buffer_info(1));
        assert_eq!(result.err(), Some(DescriptorError::UnknownBinding(5)));
        assert_eq!(headless.stats().descriptor_sets_allocated, 0);
        assert_eq!(headless.allocated_sets(pool.handle()), 0);
    }

    #[test]
    fn test_array_binding_rejected() {
        let (gpu, _) = gpu();
        let layout = ubo_layout(&gpu);
        let pool = DescriptorPool::builder()
            .add_pool_size(DescriptorKind::UniformBuffer, 1)
            .build(Arc::clone(&gpu))
            .unwrap();

        let result = DescriptorWriter::new(&layout, &pool).write_buffer(1, buffer_info(1));
        assert_eq!(
            result.err(),
            Some(DescriptorError::ArrayBindingUnsupported {
                binding: 1,
                count: 4
            })
        );
    }

    #[test]
    fn test_build_allocates_and_writes() {
        let (gpu, headless) = gpu();
        let layout = DescriptorSetLayout::builder()
            .add_binding(0, DescriptorKind::UniformBuffer, ShaderStages::ALL_GRAPHICS, 1)
            .unwrap()
            .build(Arc::clone(&gpu))
            .unwrap();
        let pool = DescriptorPool::builder()
            .add_pool_size(DescriptorKind::UniformBuffer, 2)
            .set_max_sets(2)
            .build(Arc::clone(&gpu))
            .unwrap();

        let set = DescriptorWriter::new(&layout, &pool)
            .write_buffer(0, buffer_info(42))
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(
            headless.descriptor_binding(set, 0),
            Some(DescriptorResource::Buffer(buffer_info(42)))
        );

        DescriptorWriter::new(&layout, &pool)
            .write_buffer(0, buffer_info(43))
            .unwrap()
            .overwrite(set);
        assert_eq!(
            headless.descriptor_binding(set, 0),
            Some(DescriptorResource::Buffer(buffer_info(43)))
        );
        assert_eq!(headless.allocated_sets(pool.handle()), 1);
    }

    #[test]
    fn test_pool_exhaustion_is_recoverable() {
        let (gpu, headless) = gpu();
        let layout = DescriptorSetLayout::builder()
            .add_binding(0, DescriptorKind::UniformBuffer, ShaderStages::VERTEX, 1)
            .unwrap()
            .build(Arc::clone(&gpu))
            .unwrap();
        let pool = DescriptorPool::builder()
            .add_pool_size(DescriptorKind::UniformBuffer, 1)
            .set_max_sets(1)
            .set_pool_flags(DescriptorPoolFlags::FREE_DESCRIPTOR_SET)
            .build(Arc::clone(&gpu))
            .unwrap();

        let first = pool.allocate_descriptor(&layout).unwrap();
        assert_eq!(
            pool.allocate_descriptor(&layout),
            Err(DescriptorError::PoolExhausted)
        );

        pool.free_descriptors(&[first]).unwrap();
        let second = pool.allocate_descriptor(&layout).unwrap();
        pool.reset_pool().unwrap();
        assert_eq!(headless.allocated_sets(pool.handle()), 0);
        assert!(headless.descriptor_binding(second, 0).is_none());
    }
}
