//! Descriptor set layouts, pools and writes.

use crate::device::Device;
use crate::error::{Result, VkError};
use ash::vk;

/// Descriptor set layout builder.
#[derive(Default)]
pub struct DescriptorSetLayoutBuilder<'a> {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'a>>,
}

impl DescriptorSetLayoutBuilder<'_> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binding.
    pub fn binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        count: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(count)
                .stage_flags(stage_flags),
        );
        self
    }

    pub fn uniform_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::UNIFORM_BUFFER, 1, stage_flags)
    }

    pub fn storage_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::STORAGE_BUFFER, 1, stage_flags)
    }

    pub fn storage_image(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::STORAGE_IMAGE, 1, stage_flags)
    }

    pub fn combined_image_sampler(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(
            binding,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            1,
            stage_flags,
        )
    }

    fn validate(&self) -> Result<()> {
        for (i, binding) in self.bindings.iter().enumerate() {
            if self.bindings[..i]
                .iter()
                .any(|other| other.binding == binding.binding)
            {
                return Err(VkError::InvalidArgument(format!(
                    "descriptor binding {} declared twice",
                    binding.binding
                )));
            }
        }
        Ok(())
    }

    /// Build the descriptor set layout.
    pub fn build(&self, device: &Device) -> Result<vk::DescriptorSetLayout> {
        self.validate()?;
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&self.bindings);
        let layout = unsafe { device.raw().create_descriptor_set_layout(&layout_info, None)? };
        Ok(layout)
    }
}

/// Builder for [`DescriptorPool`].
#[derive(Debug, Clone, Default)]
pub struct DescriptorPoolBuilder {
    max_sets: u32,
    pool_sizes: Vec<vk::DescriptorPoolSize>,
    free_individual_sets: bool,
}

impl DescriptorPoolBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum number of sets allocated from the pool.
    pub fn max_sets(mut self, max_sets: u32) -> Self {
        self.max_sets = max_sets;
        self
    }

    /// Reserve `count` descriptors of type `ty`.
    pub fn pool_size(mut self, ty: vk::DescriptorType, count: u32) -> Self {
        match self.pool_sizes.iter_mut().find(|size| size.ty == ty) {
            Some(size) => size.descriptor_count += count,
            None => self.pool_sizes.push(vk::DescriptorPoolSize {
                ty,
                descriptor_count: count,
            }),
        }
        self
    }

    /// Allow sets to be freed one by one.
    pub fn free_individual_sets(mut self, enable: bool) -> Self {
        self.free_individual_sets = enable;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.max_sets == 0 {
            return Err(VkError::InvalidArgument(
                "descriptor pool max_sets must be at least 1".to_string(),
            ));
        }
        if self.pool_sizes.is_empty() || self.pool_sizes.iter().all(|s| s.descriptor_count == 0) {
            return Err(VkError::InvalidArgument(
                "descriptor pool needs at least one pool size".to_string(),
            ));
        }
        Ok(())
    }

    /// Create the pool.
    pub fn build(&self, device: &Device) -> Result<DescriptorPool> {
        self.validate()?;

        let flags = if self.free_individual_sets {
            vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET
        } else {
            vk::DescriptorPoolCreateFlags::empty()
        };
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(self.max_sets)
            .pool_sizes(&self.pool_sizes)
            .flags(flags);

        let pool = unsafe { device.raw().create_descriptor_pool(&create_info, None)? };
        Ok(DescriptorPool { pool })
    }
}

/// Descriptor pool for allocating descriptor sets.
pub struct DescriptorPool {
    pool: vk::DescriptorPool,
}

impl DescriptorPool {
    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    /// Allocate one descriptor set per layout.
    pub fn allocate(
        &self,
        device: &ash::Device,
        layouts: &[vk::DescriptorSetLayout],
    ) -> Result<Vec<vk::DescriptorSet>> {
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);

        let sets = unsafe { device.allocate_descriptor_sets(&alloc_info)? };
        Ok(sets)
    }

    /// Reset the pool, freeing all descriptor sets.
    ///
    /// # Safety
    /// No descriptor set from this pool may be in use.
    pub unsafe fn reset(&self, device: &ash::Device) -> Result<()> {
        unsafe { device.reset_descriptor_pool(self.pool, vk::DescriptorPoolResetFlags::empty())? };
        Ok(())
    }

    /// Destroy the pool.
    ///
    /// # Safety
    /// The pool must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        unsafe { device.destroy_descriptor_pool(self.pool, None) };
    }
}

unsafe fn write_buffer(
    device: &ash::Device,
    dst_set: vk::DescriptorSet,
    binding: u32,
    descriptor_type: vk::DescriptorType,
    buffer: vk::Buffer,
    offset: u64,
    range: u64,
) {
    let buffer_info = vk::DescriptorBufferInfo::default()
        .buffer(buffer)
        .offset(offset)
        .range(range);

    let write = vk::WriteDescriptorSet::default()
        .dst_set(dst_set)
        .dst_binding(binding)
        .descriptor_type(descriptor_type)
        .buffer_info(std::slice::from_ref(&buffer_info));

    unsafe { device.update_descriptor_sets(&[write], &[]) };
}

/// Write a uniform buffer descriptor.
///
/// # Safety
/// The set must not be in use by the GPU.
pub unsafe fn write_uniform_buffer(
    device: &ash::Device,
    dst_set: vk::DescriptorSet,
    binding: u32,
    buffer: vk::Buffer,
    offset: u64,
    range: u64,
) {
    unsafe {
        write_buffer(
            device,
            dst_set,
            binding,
            vk::DescriptorType::UNIFORM_BUFFER,
            buffer,
            offset,
            range,
        )
    }
}

/// Write a storage buffer descriptor.
///
/// # Safety
/// The set must not be in use by the GPU.
pub unsafe fn write_storage_buffer(
    device: &ash::Device,
    dst_set: vk::DescriptorSet,
    binding: u32,
    buffer: vk::Buffer,
    offset: u64,
    range: u64,
) {
    unsafe {
        write_buffer(
            device,
            dst_set,
            binding,
            vk::DescriptorType::STORAGE_BUFFER,
            buffer,
            offset,
            range,
        )
    }
}

/// Write a storage image descriptor.
///
/// # Safety
/// The set must not be in use by the GPU.
pub unsafe fn write_storage_image(
    device: &ash::Device,
    dst_set: vk::DescriptorSet,
    binding: u32,
    image_view: vk::ImageView,
    layout: vk::ImageLayout,
) {
    let image_info = vk::DescriptorImageInfo::default()
        .image_view(image_view)
        .image_layout(layout);

    let write = vk::WriteDescriptorSet::default()
        .dst_set(dst_set)
        .dst_binding(binding)
        .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
        .image_info(std::slice::from_ref(&image_info));

    unsafe { device.update_descriptor_sets(&[write], &[]) };
}

/// Write a combined image sampler descriptor in `SHADER_READ_ONLY_OPTIMAL`.
///
/// # Safety
/// The set must not be in use by the GPU.
pub unsafe fn write_combined_image_sampler(
    device: &ash::Device,
    dst_set: vk::DescriptorSet,
    binding: u32,
    image_view: vk::ImageView,
    sampler: vk::Sampler,
) {
    let image_info = vk::DescriptorImageInfo::default()
        .sampler(sampler)
        .image_view(image_view)
        .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

    let write = vk::WriteDescriptorSet::default()
        .dst_set(dst_set)
        .dst_binding(binding)
        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        .image_info(std::slice::from_ref(&image_info));

    unsafe { device.update_descriptor_sets(&[write], &[]) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_sizes_merge_by_type() {
        let builder = DescriptorPoolBuilder::new()
            .max_sets(4)
            .pool_size(vk::DescriptorType::UNIFORM_BUFFER, 2)
            .pool_size(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1)
            .pool_size(vk::DescriptorType::UNIFORM_BUFFER, 2);
        assert_eq!(builder.pool_sizes.len(), 2);
        assert_eq!(builder.pool_sizes[0].descriptor_count, 4);
        assert!(builder.validate().is_ok());
    }

    #[test]
    fn pool_rejects_zero_sets() {
        let builder =
            DescriptorPoolBuilder::new().pool_size(vk::DescriptorType::UNIFORM_BUFFER, 1);
        assert!(matches!(
            builder.validate(),
            Err(VkError::InvalidArgument(_))
        ));
    }

    #[test]
    fn pool_rejects_empty_sizes() {
        let builder = DescriptorPoolBuilder::new().max_sets(1);
        assert!(builder.validate().is_err());
    }

    #[test]
    fn layout_rejects_duplicate_bindings() {
        let builder = DescriptorSetLayoutBuilder::new()
            .uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
            .combined_image_sampler(0, vk::ShaderStageFlags::FRAGMENT);
        assert!(builder.validate().is_err());

        let ok = DescriptorSetLayoutBuilder::new()
            .uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
            .combined_image_sampler(1, vk::ShaderStageFlags::FRAGMENT);
        assert!(ok.validate().is_ok());
    }
}
