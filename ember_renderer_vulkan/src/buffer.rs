/// GpuBuffer - device-local vertex and index buffers
///
/// Buffers live in GPU-only memory. Creation stages the initial contents
/// through a host-visible buffer and copies them across on the transfer
/// queue, so uploads stay off the graphics timeline.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;

use crate::context::{DeviceContext, QueueClass};
use crate::error::{Error, Result};
use crate::{render_bail, render_err, render_error, render_warn};

/// How a buffer will be bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    Vertex,
    Index,
}

impl BufferUsage {
    fn to_vk(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
            BufferUsage::Index => vk::BufferUsageFlags::INDEX_BUFFER,
        }
    }
}

/// Device-local buffer with its memory
pub struct GpuBuffer<'a> {
    context: &'a DeviceContext,
    buffer: Option<vk::Buffer>,
    allocation: Option<Allocation>,
    size: u64,
    usage: BufferUsage,
}

impl<'a> GpuBuffer<'a> {
    /// Create a device-local buffer holding `data`
    ///
    /// Stages the bytes through a host-visible buffer and copies them on
    /// the transfer queue, blocking until the copy completed.
    pub fn new_with_data(
        context: &'a DeviceContext,
        usage: BufferUsage,
        data: &[u8],
    ) -> Result<GpuBuffer<'a>> {
        if data.is_empty() {
            render_bail!("ember::buffer", "Buffer data must not be empty");
        }

        let mut gpu_buffer = GpuBuffer {
            context,
            buffer: None,
            allocation: None,
            size: data.len() as u64,
            usage,
        };

        let device = context.device()?;

        unsafe {
            // Create the device-local destination buffer
            let buffer_create_info = vk::BufferCreateInfo::default()
                .size(data.len() as u64)
                .usage(usage.to_vk() | vk::BufferUsageFlags::TRANSFER_DST)
                .sharing_mode(vk::SharingMode::EXCLUSIVE);

            let buffer = device.create_buffer(&buffer_create_info, None)
                .map_err(|e| render_err!("ember::buffer", "Failed to create buffer of size {} bytes: {:?}", data.len(), e))?;
            gpu_buffer.buffer = Some(buffer);

            let requirements = device.get_buffer_memory_requirements(buffer);

            let allocation = context.allocator()?.lock().unwrap().allocate(&AllocationCreateDesc {
                name: "buffer",
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|_e| {
                let size_mb = requirements.size as f64 / (1024.0 * 1024.0);
                render_error!("ember::buffer", "Out of GPU memory for buffer (required: {:.2} MB)", size_mb);
                Error::OutOfMemory
            })?;

            let memory = allocation.memory();
            let offset = allocation.offset();
            gpu_buffer.allocation = Some(allocation);

            device.bind_buffer_memory(buffer, memory, offset)
                .map_err(|e| render_err!("ember::buffer", "Failed to bind buffer memory: {:?}", e))?;

            // Create staging buffer
            let staging_buffer_create_info = vk::BufferCreateInfo::default()
                .size(data.len() as u64)
                .usage(vk::BufferUsageFlags::TRANSFER_SRC)
                .sharing_mode(vk::SharingMode::EXCLUSIVE);

            let staging_buffer = device.create_buffer(&staging_buffer_create_info, None)
                .map_err(|e| render_err!("ember::buffer", "Failed to create staging buffer: {:?}", e))?;

            let staging_requirements = device.get_buffer_memory_requirements(staging_buffer);

            let staging_allocation = match context.allocator()?.lock().unwrap().allocate(
                &AllocationCreateDesc {
                    name: "buffer_staging_buffer",
                    requirements: staging_requirements,
                    location: MemoryLocation::CpuToGpu,
                    linear: true,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                },
            ) {
                Ok(allocation) => allocation,
                Err(_e) => {
                    device.destroy_buffer(staging_buffer, None);
                    let size_mb = staging_requirements.size as f64 / (1024.0 * 1024.0);
                    render_error!("ember::buffer", "Out of GPU memory for staging buffer ({:.2} MB)", size_mb);
                    return Err(Error::OutOfMemory);
                }
            };

            if let Err(e) = device.bind_buffer_memory(
                staging_buffer,
                staging_allocation.memory(),
                staging_allocation.offset(),
            ) {
                gpu_buffer.destroy_staging(staging_buffer, staging_allocation);
                return Err(render_err!("ember::buffer", "Failed to bind staging buffer memory: {:?}", e));
            }

            // Copy data to staging buffer
            let mapped_ptr = match staging_allocation.mapped_ptr() {
                Some(ptr) => ptr.as_ptr() as *mut u8,
                None => {
                    gpu_buffer.destroy_staging(staging_buffer, staging_allocation);
                    return Err(render_err!("ember::buffer", "Staging buffer is not mapped"));
                }
            };
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped_ptr, data.len());

            // Copy staging to device-local on the transfer queue
            let command_buffer = match context.begin_single_time_commands(QueueClass::Transfer) {
                Ok(command_buffer) => command_buffer,
                Err(e) => {
                    gpu_buffer.destroy_staging(staging_buffer, staging_allocation);
                    return Err(e);
                }
            };

            let copy_region = vk::BufferCopy::default()
                .src_offset(0)
                .dst_offset(0)
                .size(data.len() as u64);

            device.cmd_copy_buffer(command_buffer, staging_buffer, buffer, &[copy_region]);

            let submit_result = context.end_single_time_commands(QueueClass::Transfer, command_buffer);

            gpu_buffer.destroy_staging(staging_buffer, staging_allocation);
            submit_result?;
        }

        Ok(gpu_buffer)
    }

    /// A buffer with no GPU objects behind it, for unit tests that run
    /// without a device
    #[cfg(test)]
    pub(crate) fn detached_for_testing(context: &DeviceContext, usage: BufferUsage) -> GpuBuffer<'_> {
        GpuBuffer {
            context,
            buffer: None,
            allocation: None,
            size: 0,
            usage,
        }
    }

    /// Buffer handle
    pub fn handle(&self) -> Result<vk::Buffer> {
        self.buffer
            .ok_or_else(|| Error::InvalidResource("Buffer is not initialized".to_string()))
    }

    /// Buffer size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Usage the buffer was created for
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    fn destroy_staging(&self, staging_buffer: vk::Buffer, staging_allocation: Allocation) {
        if let (Ok(device), Ok(allocator)) = (self.context.device(), self.context.allocator()) {
            unsafe {
                device.destroy_buffer(staging_buffer, None);
            }
            if allocator.lock().unwrap().free(staging_allocation).is_err() {
                render_warn!("ember::buffer", "Failed to free staging buffer allocation");
            }
        }
    }
}

impl Drop for GpuBuffer<'_> {
    fn drop(&mut self) {
        unsafe {
            if let Ok(device) = self.context.device() {
                // Free GPU memory
                if let Some(allocation) = self.allocation.take() {
                    if let Ok(allocator) = self.context.allocator() {
                        allocator.lock().unwrap().free(allocation).ok();
                    }
                }

                // Destroy buffer
                if let Some(buffer) = self.buffer.take() {
                    device.destroy_buffer(buffer, None);
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "buffer_tests.rs"]
mod tests;
