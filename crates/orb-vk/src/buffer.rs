//! Staging, vertex, index and uniform buffer builders.

use crate::command::{execute_single_time_commands, CommandPool};
use crate::device::Device;
use crate::error::{Result, VkError};
use crate::memory::GpuBuffer;
use ash::vk;
use bytemuck::Pod;
use gpu_allocator::MemoryLocation;
use std::marker::PhantomData;

fn require_data(len: usize, what: &str) -> Result<()> {
    if len == 0 {
        return Err(VkError::InvalidArgument(format!("{what} data is empty")));
    }
    Ok(())
}

fn frame_slot(frame: usize, copies: usize) -> Result<usize> {
    if frame >= copies {
        return Err(VkError::InvalidArgument(format!(
            "frame {frame} out of range for {copies} uniform buffers"
        )));
    }
    Ok(frame)
}

/// Free a buffer through the device allocator.
pub fn free_buffer(device: &Device, buffer: &mut GpuBuffer) -> Result<()> {
    device.allocator().lock().free_buffer(buffer)
}

/// Builder for host-visible transfer source buffers.
pub struct StagingBufferBuilder<'a> {
    size: u64,
    data: Option<&'a [u8]>,
    name: &'a str,
}

impl<'a> StagingBufferBuilder<'a> {
    /// Empty staging buffer of `size` bytes.
    pub fn new(size: u64) -> Self {
        Self {
            size,
            data: None,
            name: "staging",
        }
    }

    /// Staging buffer initialised with `data`.
    pub fn with_data(data: &'a [u8]) -> Self {
        Self {
            size: data.len() as u64,
            data: Some(data),
            name: "staging",
        }
    }

    pub fn name(mut self, name: &'a str) -> Self {
        self.name = name;
        self
    }

    pub fn build(&self, device: &Device) -> Result<GpuBuffer> {
        require_data(self.size as usize, "staging buffer")?;

        let mut allocator = device.allocator().lock();
        let mut buffer = allocator.create_buffer(
            self.size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            self.name,
        )?;

        if let Some(data) = self.data {
            if let Err(e) = buffer.write_bytes(0, data) {
                allocator.free_buffer(&mut buffer)?;
                return Err(e);
            }
        }

        Ok(buffer)
    }
}

/// Create a buffer holding `data`, uploading through a staging buffer
/// unless `host_visible` is set.
fn upload_buffer(
    device: &Device,
    pool: &CommandPool,
    data: &[u8],
    usage: vk::BufferUsageFlags,
    host_visible: bool,
    name: &str,
) -> Result<GpuBuffer> {
    let size = data.len() as u64;

    if host_visible {
        let mut allocator = device.allocator().lock();
        let mut buffer = allocator.create_buffer(size, usage, MemoryLocation::CpuToGpu, name)?;
        if let Err(e) = buffer.write_bytes(0, data) {
            allocator.free_buffer(&mut buffer)?;
            return Err(e);
        }
        return Ok(buffer);
    }

    let mut staging = StagingBufferBuilder::with_data(data).build(device)?;
    let created = device.allocator().lock().create_buffer(
        size,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        MemoryLocation::GpuOnly,
        name,
    );
    let mut buffer = match created {
        Ok(buffer) => buffer,
        Err(e) => {
            free_buffer(device, &mut staging)?;
            return Err(e);
        }
    };

    let raw = device.raw();
    let copied = execute_single_time_commands(device, pool, |cmd| {
        let region = vk::BufferCopy::default().size(size);
        unsafe { raw.cmd_copy_buffer(cmd, staging.buffer, buffer.buffer, &[region]) };
    });

    free_buffer(device, &mut staging)?;
    if let Err(e) = copied {
        free_buffer(device, &mut buffer)?;
        return Err(e);
    }

    tracing::debug!("Uploaded buffer '{name}' ({size} bytes)");
    Ok(buffer)
}

/// Builder for vertex buffers.
pub struct VertexBufferBuilder<'a, T: Pod> {
    data: &'a [T],
    host_visible: bool,
    name: &'a str,
}

impl<'a, T: Pod> VertexBufferBuilder<'a, T> {
    pub fn new(vertices: &'a [T]) -> Self {
        Self {
            data: vertices,
            host_visible: false,
            name: "vertices",
        }
    }

    /// Keep the buffer in host-visible memory and skip the staging copy.
    pub fn host_visible(mut self, enable: bool) -> Self {
        self.host_visible = enable;
        self
    }

    pub fn name(mut self, name: &'a str) -> Self {
        self.name = name;
        self
    }

    pub fn build(&self, device: &Device, pool: &CommandPool) -> Result<VertexBuffer> {
        require_data(self.data.len(), "vertex buffer")?;
        let buffer = upload_buffer(
            device,
            pool,
            bytemuck::cast_slice(self.data),
            vk::BufferUsageFlags::VERTEX_BUFFER,
            self.host_visible,
            self.name,
        )?;
        Ok(VertexBuffer {
            buffer,
            count: self.data.len() as u32,
        })
    }
}

/// A vertex buffer and its vertex count.
pub struct VertexBuffer {
    pub buffer: GpuBuffer,
    pub count: u32,
}

impl VertexBuffer {
    /// Bind at binding 0.
    ///
    /// # Safety
    /// The command buffer must be recording.
    pub unsafe fn bind(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        unsafe { device.cmd_bind_vertex_buffers(cmd, 0, &[self.buffer.buffer], &[0]) };
    }

    /// Free the buffer.
    pub fn destroy(&mut self, device: &Device) -> Result<()> {
        free_buffer(device, &mut self.buffer)
    }
}

enum IndexData<'a> {
    U16(&'a [u16]),
    U32(&'a [u32]),
}

/// Builder for index buffers.
pub struct IndexBufferBuilder<'a> {
    data: IndexData<'a>,
    host_visible: bool,
    name: &'a str,
}

impl<'a> IndexBufferBuilder<'a> {
    pub fn new_u16(indices: &'a [u16]) -> Self {
        Self {
            data: IndexData::U16(indices),
            host_visible: false,
            name: "indices",
        }
    }

    pub fn new_u32(indices: &'a [u32]) -> Self {
        Self {
            data: IndexData::U32(indices),
            host_visible: false,
            name: "indices",
        }
    }

    pub fn host_visible(mut self, enable: bool) -> Self {
        self.host_visible = enable;
        self
    }

    pub fn name(mut self, name: &'a str) -> Self {
        self.name = name;
        self
    }

    fn layout(&self) -> (&'a [u8], u32, vk::IndexType) {
        match self.data {
            IndexData::U16(indices) => (
                bytemuck::cast_slice(indices),
                indices.len() as u32,
                vk::IndexType::UINT16,
            ),
            IndexData::U32(indices) => (
                bytemuck::cast_slice(indices),
                indices.len() as u32,
                vk::IndexType::UINT32,
            ),
        }
    }

    pub fn build(&self, device: &Device, pool: &CommandPool) -> Result<IndexBuffer> {
        let (bytes, count, index_type) = self.layout();
        require_data(bytes.len(), "index buffer")?;
        let buffer = upload_buffer(
            device,
            pool,
            bytes,
            vk::BufferUsageFlags::INDEX_BUFFER,
            self.host_visible,
            self.name,
        )?;
        Ok(IndexBuffer {
            buffer,
            count,
            index_type,
        })
    }
}

/// An index buffer with its element type and count.
pub struct IndexBuffer {
    pub buffer: GpuBuffer,
    pub count: u32,
    pub index_type: vk::IndexType,
}

impl IndexBuffer {
    /// Bind the index buffer.
    ///
    /// # Safety
    /// The command buffer must be recording.
    pub unsafe fn bind(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        unsafe { device.cmd_bind_index_buffer(cmd, self.buffer.buffer, 0, self.index_type) };
    }

    /// Free the buffer.
    pub fn destroy(&mut self, device: &Device) -> Result<()> {
        free_buffer(device, &mut self.buffer)
    }
}

/// Builder for per-frame uniform buffers holding a `T`.
pub struct UniformBufferBuilder<'a, T: Pod> {
    copies: usize,
    name: &'a str,
    _marker: PhantomData<T>,
}

impl<'a, T: Pod> UniformBufferBuilder<'a, T> {
    /// One buffer per frame in flight.
    pub fn new(copies: usize) -> Self {
        Self {
            copies,
            name: "uniforms",
            _marker: PhantomData,
        }
    }

    pub fn name(mut self, name: &'a str) -> Self {
        self.name = name;
        self
    }

    pub fn build(&self, device: &Device) -> Result<UniformBuffers<T>> {
        if self.copies == 0 {
            return Err(VkError::InvalidArgument(
                "uniform buffer needs at least one copy".to_string(),
            ));
        }
        require_data(std::mem::size_of::<T>(), "uniform buffer")?;

        let mut allocator = device.allocator().lock();
        let mut buffers: Vec<GpuBuffer> = Vec::with_capacity(self.copies);
        for i in 0..self.copies {
            let name = format!("{}[{i}]", self.name);
            match allocator.create_buffer(
                std::mem::size_of::<T>() as u64,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                MemoryLocation::CpuToGpu,
                &name,
            ) {
                Ok(buffer) => buffers.push(buffer),
                Err(e) => {
                    for buffer in &mut buffers {
                        allocator.free_buffer(buffer)?;
                    }
                    return Err(e);
                }
            }
        }

        Ok(UniformBuffers {
            buffers,
            _marker: PhantomData,
        })
    }
}

/// Host-visible uniform buffers, one per frame in flight.
pub struct UniformBuffers<T: Pod> {
    buffers: Vec<GpuBuffer>,
    _marker: PhantomData<T>,
}

impl<T: Pod> UniformBuffers<T> {
    /// Number of copies.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Size of one copy in bytes.
    pub fn size(&self) -> u64 {
        std::mem::size_of::<T>() as u64
    }

    /// Get the buffer handle for a frame.
    pub fn buffer(&self, frame: usize) -> Result<vk::Buffer> {
        let slot = frame_slot(frame, self.buffers.len())?;
        Ok(self.buffers[slot].buffer)
    }

    /// Write `value` into the copy for `frame`.
    pub fn update(&self, frame: usize, value: &T) -> Result<()> {
        let slot = frame_slot(frame, self.buffers.len())?;
        self.buffers[slot].write_bytes(0, bytemuck::bytes_of(value))
    }

    /// Free every copy.
    pub fn destroy(&mut self, device: &Device) -> Result<()> {
        let mut allocator = device.allocator().lock();
        for buffer in &mut self.buffers {
            allocator.free_buffer(buffer)?;
        }
        self.buffers.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_data_is_rejected() {
        assert!(require_data(0, "vertex buffer").is_err());
        assert!(require_data(12, "vertex buffer").is_ok());
    }

    #[test]
    fn frame_slots_are_range_checked() {
        assert_eq!(frame_slot(1, 2).unwrap(), 1);
        assert!(matches!(frame_slot(2, 2), Err(VkError::InvalidArgument(_))));
    }

    #[test]
    fn index_layout_reports_type_and_count() {
        let short = [0u16, 1, 2, 2, 3, 0];
        let (bytes, count, ty) = IndexBufferBuilder::new_u16(&short).layout();
        assert_eq!((bytes.len(), count, ty), (12, 6, vk::IndexType::UINT16));

        let wide = [0u32, 1, 2];
        let (bytes, count, ty) = IndexBufferBuilder::new_u32(&wide).layout();
        assert_eq!((bytes.len(), count, ty), (12, 3, vk::IndexType::UINT32));
    }

    #[test]
    fn staging_size_follows_data() {
        let data = [1u8, 2, 3, 4];
        assert_eq!(StagingBufferBuilder::with_data(&data).size, 4);
        assert!(StagingBufferBuilder::new(64).data.is_none());
    }
}
