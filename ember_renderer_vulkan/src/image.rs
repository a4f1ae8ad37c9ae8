/// GpuImage - image, view, memory, and tracked layout
///
/// Owns a VkImage with its view and allocation, and remembers which layout
/// the image currently holds. Layout changes go through `transition`, which
/// runs a one-shot barrier on the graphics queue and only moves the tracked
/// layout once the submission went through.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;

use crate::context::{DeviceContext, QueueClass};
use crate::error::{Error, Result};
use crate::transition::{self, ImageLayout};
use crate::{render_bail, render_err, render_error, render_warn};

/// Image pixel format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(non_camel_case_types)]
pub enum ImageFormat {
    R8G8B8A8_SRGB,
    R8G8B8A8_UNORM,
    B8G8R8A8_SRGB,
    B8G8R8A8_UNORM,
    D32_FLOAT,
}

impl ImageFormat {
    /// Convert to the Vulkan format
    pub fn to_vk(self) -> vk::Format {
        match self {
            ImageFormat::R8G8B8A8_SRGB => vk::Format::R8G8B8A8_SRGB,
            ImageFormat::R8G8B8A8_UNORM => vk::Format::R8G8B8A8_UNORM,
            ImageFormat::B8G8R8A8_SRGB => vk::Format::B8G8R8A8_SRGB,
            ImageFormat::B8G8R8A8_UNORM => vk::Format::B8G8R8A8_UNORM,
            ImageFormat::D32_FLOAT => vk::Format::D32_SFLOAT,
        }
    }

    /// Bytes per texel
    pub fn texel_bytes(self) -> usize {
        match self {
            ImageFormat::R8G8B8A8_SRGB
            | ImageFormat::R8G8B8A8_UNORM
            | ImageFormat::B8G8R8A8_SRGB
            | ImageFormat::B8G8R8A8_UNORM
            | ImageFormat::D32_FLOAT => 4,
        }
    }
}

/// How an image will be used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageUsage {
    /// Sampled in shaders, filled by transfer writes
    Sampled,
    /// Rendered to as a color attachment, sampled afterwards
    ColorAttachment,
    /// Rendered to as a depth attachment
    DepthAttachment,
}

impl ImageUsage {
    fn to_vk(self) -> vk::ImageUsageFlags {
        match self {
            ImageUsage::Sampled => {
                vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST
            }
            ImageUsage::ColorAttachment => {
                vk::ImageUsageFlags::SAMPLED
                    | vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::TRANSFER_DST
            }
            ImageUsage::DepthAttachment => {
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST
            }
        }
    }

    fn aspect_mask(self) -> vk::ImageAspectFlags {
        match self {
            ImageUsage::Sampled | ImageUsage::ColorAttachment => vk::ImageAspectFlags::COLOR,
            ImageUsage::DepthAttachment => vk::ImageAspectFlags::DEPTH,
        }
    }
}

/// Description of an image to create
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDesc {
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub usage: ImageUsage,
}

/// GPU image with tracked layout
///
/// The owned handles sit in Options so a construction failure destroys
/// exactly the objects created so far. Borrowing the context keeps the
/// image from outliving the device that created it.
pub struct GpuImage<'a> {
    context: &'a DeviceContext,
    image: Option<vk::Image>,
    view: Option<vk::ImageView>,
    allocation: Option<Allocation>,
    layout: ImageLayout,
    width: u32,
    height: u32,
    format: ImageFormat,
    aspect_mask: vk::ImageAspectFlags,
}

impl<'a> GpuImage<'a> {
    /// Create an image with its view and memory
    ///
    /// The image starts in the Undefined layout.
    pub fn new(context: &'a DeviceContext, desc: &ImageDesc) -> Result<GpuImage<'a>> {
        let mut gpu_image = GpuImage {
            context,
            image: None,
            view: None,
            allocation: None,
            layout: ImageLayout::Undefined,
            width: desc.width,
            height: desc.height,
            format: desc.format,
            aspect_mask: desc.usage.aspect_mask(),
        };

        let device = context.device()?;
        let format = desc.format.to_vk();

        unsafe {
            // Create image
            let image_create_info = vk::ImageCreateInfo::default()
                .image_type(vk::ImageType::TYPE_2D)
                .format(format)
                .extent(vk::Extent3D {
                    width: desc.width,
                    height: desc.height,
                    depth: 1,
                })
                .mip_levels(1)
                .array_layers(1)
                .samples(vk::SampleCountFlags::TYPE_1)
                .tiling(vk::ImageTiling::OPTIMAL)
                .usage(desc.usage.to_vk())
                .sharing_mode(vk::SharingMode::EXCLUSIVE)
                .initial_layout(vk::ImageLayout::UNDEFINED);

            let image = device.create_image(&image_create_info, None)
                .map_err(|e| render_err!("ember::image", "Failed to create image: {:?}", e))?;
            gpu_image.image = Some(image);

            // Allocate memory
            let requirements = device.get_image_memory_requirements(image);

            let allocation = context.allocator()?.lock().unwrap().allocate(&AllocationCreateDesc {
                name: "image",
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|_e| {
                let size_mb = requirements.size as f64 / (1024.0 * 1024.0);
                render_error!("ember::image", "Out of GPU memory for image (size: {}x{}, {:.2} MB)", desc.width, desc.height, size_mb);
                Error::OutOfMemory
            })?;

            // Bind memory, keeping the allocation owned so a failure frees it
            let memory = allocation.memory();
            let offset = allocation.offset();
            gpu_image.allocation = Some(allocation);

            device.bind_image_memory(image, memory, offset)
                .map_err(|e| render_err!("ember::image", "Failed to bind image memory: {:?}", e))?;

            // Create image view
            let view_create_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: gpu_image.aspect_mask,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            let view = device.create_image_view(&view_create_info, None)
                .map_err(|e| render_err!("ember::image", "Failed to create image view: {:?}", e))?;
            gpu_image.view = Some(view);
        }

        Ok(gpu_image)
    }

    /// An image with no GPU objects behind it, for unit tests that
    /// exercise layout tracking without a device
    #[cfg(test)]
    pub(crate) fn detached_for_testing(
        context: &DeviceContext,
        layout: ImageLayout,
    ) -> GpuImage<'_> {
        GpuImage {
            context,
            image: None,
            view: None,
            allocation: None,
            layout,
            width: 0,
            height: 0,
            format: ImageFormat::R8G8B8A8_UNORM,
            aspect_mask: vk::ImageAspectFlags::COLOR,
        }
    }

    /// Layout the image currently holds
    pub fn layout(&self) -> ImageLayout {
        self.layout
    }

    /// Image width in pixels
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Image height in pixels
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Image pixel format
    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// Image view handle
    pub fn view(&self) -> Result<vk::ImageView> {
        self.view
            .ok_or_else(|| Error::InvalidResource("Image view is not initialized".to_string()))
    }

    fn image(&self) -> Result<vk::Image> {
        self.image
            .ok_or_else(|| Error::InvalidResource("Image is not initialized".to_string()))
    }

    /// Transition the image to a new layout
    ///
    /// When the image currently sits in ShaderReadOnly, the barrier assumes
    /// the last reader was the fragment shader; use `transition_from_stage`
    /// when a different stage sampled it.
    pub fn transition(&mut self, new_layout: ImageLayout) -> Result<()> {
        self.transition_from_stage(new_layout, vk::PipelineStageFlags::FRAGMENT_SHADER)
    }

    /// Transition the image to a new layout, naming the stage that last
    /// sampled it
    ///
    /// Records one barrier in a one-shot graphics submission and blocks
    /// until it completed. The tracked layout moves only after the
    /// submission went through; on any failure it stays where it was.
    pub fn transition_from_stage(
        &mut self,
        new_layout: ImageLayout,
        shader_read_src_stage: vk::PipelineStageFlags,
    ) -> Result<()> {
        // Validate the pair up front, even when the transition is a no-op
        transition::barrier_scopes(self.layout, new_layout, shader_read_src_stage).map_err(
            |e| {
                render_error!(
                    "ember::image",
                    "Unsupported layout transition: {:?} -> {:?}",
                    self.layout,
                    new_layout
                );
                e
            },
        )?;

        if new_layout == self.layout {
            return Ok(());
        }

        let image = self.image()?;
        let device = self.context.device()?;

        let command_buffer = self.context.begin_single_time_commands(QueueClass::Graphics)?;

        if let Err(e) = transition::record_layout_transition(
            device,
            command_buffer,
            image,
            self.aspect_mask,
            1,
            self.layout,
            new_layout,
            shader_read_src_stage,
        ) {
            let _ = self
                .context
                .discard_single_time_commands(QueueClass::Graphics, command_buffer);
            return Err(e);
        }

        self.context
            .end_single_time_commands(QueueClass::Graphics, command_buffer)?;

        self.layout = new_layout;
        Ok(())
    }

    /// Upload pixel data and leave the image ready for sampling
    ///
    /// The image must sit in TransferDst. Stages the bytes, copies them
    /// into the image, and moves it to ShaderReadOnly with a barrier in the
    /// same submission.
    pub fn upload(&mut self, data: &[u8]) -> Result<()> {
        if self.layout != ImageLayout::TransferDst {
            render_bail!(
                "ember::image",
                "Image must be in TransferDst layout for upload, found {:?}",
                self.layout
            );
        }

        let expected = self.width as usize * self.height as usize * self.format.texel_bytes();
        if data.len() != expected {
            render_bail!(
                "ember::image",
                "Image data size ({} bytes) does not match {}x{} {:?} ({} bytes)",
                data.len(),
                self.width,
                self.height,
                self.format,
                expected
            );
        }

        let device = self.context.device()?;
        let image = self.image()?;

        unsafe {
            // Create staging buffer
            let staging_buffer_create_info = vk::BufferCreateInfo::default()
                .size(data.len() as u64)
                .usage(vk::BufferUsageFlags::TRANSFER_SRC)
                .sharing_mode(vk::SharingMode::EXCLUSIVE);

            let staging_buffer = device.create_buffer(&staging_buffer_create_info, None)
                .map_err(|e| render_err!("ember::image", "Failed to create staging buffer: {:?}", e))?;

            let staging_requirements = device.get_buffer_memory_requirements(staging_buffer);

            let staging_allocation = match self.context.allocator()?.lock().unwrap().allocate(
                &AllocationCreateDesc {
                    name: "image_staging_buffer",
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
                    render_error!("ember::image", "Out of GPU memory for image staging buffer ({:.2} MB)", size_mb);
                    return Err(Error::OutOfMemory);
                }
            };

            if let Err(e) = device.bind_buffer_memory(
                staging_buffer,
                staging_allocation.memory(),
                staging_allocation.offset(),
            ) {
                self.destroy_staging(staging_buffer, staging_allocation);
                return Err(render_err!("ember::image", "Failed to bind staging buffer memory: {:?}", e));
            }

            // Copy data to staging buffer
            let mapped_ptr = match staging_allocation.mapped_ptr() {
                Some(ptr) => ptr.as_ptr() as *mut u8,
                None => {
                    self.destroy_staging(staging_buffer, staging_allocation);
                    return Err(render_err!("ember::image", "Staging buffer is not mapped"));
                }
            };
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped_ptr, data.len());

            // Record copy and final barrier in one submission
            let command_buffer = match self.context.begin_single_time_commands(QueueClass::Graphics) {
                Ok(command_buffer) => command_buffer,
                Err(e) => {
                    self.destroy_staging(staging_buffer, staging_allocation);
                    return Err(e);
                }
            };

            let region = vk::BufferImageCopy::default()
                .buffer_offset(0)
                .buffer_row_length(0)
                .buffer_image_height(0)
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: self.aspect_mask,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
                .image_extent(vk::Extent3D {
                    width: self.width,
                    height: self.height,
                    depth: 1,
                });

            device.cmd_copy_buffer_to_image(
                command_buffer,
                staging_buffer,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );

            if let Err(e) = transition::record_layout_transition(
                device,
                command_buffer,
                image,
                self.aspect_mask,
                1,
                ImageLayout::TransferDst,
                ImageLayout::ShaderReadOnly,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
            ) {
                let _ = self
                    .context
                    .discard_single_time_commands(QueueClass::Graphics, command_buffer);
                self.destroy_staging(staging_buffer, staging_allocation);
                return Err(e);
            }

            let submit_result = self
                .context
                .end_single_time_commands(QueueClass::Graphics, command_buffer);

            self.destroy_staging(staging_buffer, staging_allocation);
            submit_result?;
        }

        self.layout = ImageLayout::ShaderReadOnly;
        Ok(())
    }

    fn destroy_staging(&self, staging_buffer: vk::Buffer, staging_allocation: Allocation) {
        if let (Ok(device), Ok(allocator)) = (self.context.device(), self.context.allocator()) {
            unsafe {
                device.destroy_buffer(staging_buffer, None);
            }
            if allocator.lock().unwrap().free(staging_allocation).is_err() {
                render_warn!("ember::image", "Failed to free staging buffer allocation");
            }
        }
    }
}

impl Drop for GpuImage<'_> {
    fn drop(&mut self) {
        unsafe {
            if let Ok(device) = self.context.device() {
                // Destroy image view
                if let Some(view) = self.view.take() {
                    device.destroy_image_view(view, None);
                }

                // Free GPU memory
                if let Some(allocation) = self.allocation.take() {
                    if let Ok(allocator) = self.context.allocator() {
                        allocator.lock().unwrap().free(allocation).ok();
                    }
                }

                // Destroy image
                if let Some(image) = self.image.take() {
                    device.destroy_image(image, None);
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "image_tests.rs"]
mod tests;
