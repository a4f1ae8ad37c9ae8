/// RenderPipeline - graphics pipeline and scoped render pass recording
///
/// Builds a pipeline + layout from SPIR-V files on disk, with push-constant
/// ranges reflected from the bytecode. Rendering targets are declared per
/// pass through dynamic rendering, so no render pass objects exist. Draws
/// are recorded through the RenderPass scope returned by `begin_render`,
/// which keeps the pipeline mutably borrowed until the pass ends.

use std::path::{Path, PathBuf};

use ash::vk;

use crate::buffer::GpuBuffer;
use crate::context::DeviceContext;
use crate::error::{Error, Result};
use crate::transition::ImageLayout;
use crate::{render_bail, render_err, render_error, render_info};

/// Vertex attribute format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(non_camel_case_types)]
pub enum VertexFormat {
    R32_SFLOAT,
    R32G32_SFLOAT,
    R32G32B32_SFLOAT,
    R32G32B32A32_SFLOAT,
}

impl VertexFormat {
    fn to_vk(self) -> vk::Format {
        match self {
            VertexFormat::R32_SFLOAT => vk::Format::R32_SFLOAT,
            VertexFormat::R32G32_SFLOAT => vk::Format::R32G32_SFLOAT,
            VertexFormat::R32G32B32_SFLOAT => vk::Format::R32G32B32_SFLOAT,
            VertexFormat::R32G32B32A32_SFLOAT => vk::Format::R32G32B32A32_SFLOAT,
        }
    }

    /// Size of one attribute in bytes
    pub fn size_bytes(self) -> u32 {
        match self {
            VertexFormat::R32_SFLOAT => 4,
            VertexFormat::R32G32_SFLOAT => 8,
            VertexFormat::R32G32B32_SFLOAT => 12,
            VertexFormat::R32G32B32A32_SFLOAT => 16,
        }
    }
}

/// How vertex data advances per draw
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexInputRate {
    Vertex,
    Instance,
}

/// One vertex buffer binding slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexBinding {
    pub binding: u32,
    pub stride: u32,
    pub input_rate: VertexInputRate,
}

/// One vertex attribute within a binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    pub location: u32,
    pub binding: u32,
    pub format: VertexFormat,
    pub offset: u32,
}

/// Vertex input layout of a pipeline
#[derive(Debug, Clone, Default)]
pub struct VertexLayout {
    pub bindings: Vec<VertexBinding>,
    pub attributes: Vec<VertexAttribute>,
}

/// Index element width
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    Uint16,
    Uint32,
}

impl IndexType {
    fn to_vk(self) -> vk::IndexType {
        match self {
            IndexType::Uint16 => vk::IndexType::UINT16,
            IndexType::Uint32 => vk::IndexType::UINT32,
        }
    }

    /// Size of one index in bytes
    pub fn size_bytes(self) -> usize {
        match self {
            IndexType::Uint16 => 2,
            IndexType::Uint32 => 4,
        }
    }
}

/// What happens to an attachment when a pass begins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOp {
    Clear,
    Load,
    DontCare,
}

impl LoadOp {
    fn to_vk(self) -> vk::AttachmentLoadOp {
        match self {
            LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
            LoadOp::Load => vk::AttachmentLoadOp::LOAD,
            LoadOp::DontCare => vk::AttachmentLoadOp::DONT_CARE,
        }
    }
}

/// What happens to an attachment when a pass ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Store,
    DontCare,
}

impl StoreOp {
    fn to_vk(self) -> vk::AttachmentStoreOp {
        match self {
            StoreOp::Store => vk::AttachmentStoreOp::STORE,
            StoreOp::DontCare => vk::AttachmentStoreOp::DONT_CARE,
        }
    }
}

/// Clear value for an attachment
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

impl ClearValue {
    fn to_vk(self) -> vk::ClearValue {
        match self {
            ClearValue::Color(values) => vk::ClearValue {
                color: vk::ClearColorValue { float32: values },
            },
            ClearValue::DepthStencil { depth, stencil } => vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
            },
        }
    }
}

/// One attachment of a render pass
///
/// Every field is explicit; there are no default ops or clear values.
#[derive(Debug, Clone, Copy)]
pub struct RenderAttachment {
    pub image_view: vk::ImageView,
    pub image_layout: ImageLayout,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub clear_value: ClearValue,
}

/// Attachments and area of one render pass
#[derive(Debug, Clone)]
pub struct RenderInfo {
    pub color_attachments: Vec<RenderAttachment>,
    pub depth_attachment: Option<RenderAttachment>,
    pub extent: vk::Extent2D,
}

/// Description of a pipeline to create
#[derive(Debug, Clone)]
pub struct PipelineDesc {
    pub vertex_shader_path: PathBuf,
    pub fragment_shader_path: PathBuf,
    pub color_formats: Vec<vk::Format>,
    pub depth_format: Option<vk::Format>,
    pub extent: vk::Extent2D,
    pub vertex_layout: VertexLayout,
}

/// Push constant block reflected from one shader stage
struct PushConstantBlock {
    name: String,
    stage_flags: vk::ShaderStageFlags,
    size: u32,
}

/// Graphics pipeline with its layout
pub struct RenderPipeline<'a> {
    context: &'a DeviceContext,
    pipeline: Option<vk::Pipeline>,
    layout: Option<vk::PipelineLayout>,
    color_formats: Vec<vk::Format>,
    depth_format: Option<vk::Format>,
    extent: vk::Extent2D,
}

impl<'a> RenderPipeline<'a> {
    /// Create a graphics pipeline from SPIR-V files
    ///
    /// Shader modules exist only for the duration of this call; they are
    /// destroyed as soon as the pipeline is built. Push-constant ranges are
    /// reflected from the bytecode. Shaders that declare descriptor
    /// bindings are rejected, since this pipeline carries no binding
    /// groups.
    pub fn new(context: &'a DeviceContext, desc: &PipelineDesc) -> Result<RenderPipeline<'a>> {
        let mut render_pipeline = RenderPipeline {
            context,
            pipeline: None,
            layout: None,
            color_formats: desc.color_formats.clone(),
            depth_format: desc.depth_format,
            extent: desc.extent,
        };

        let device = context.device()?;

        let vertex_code = Self::read_spirv(&desc.vertex_shader_path)?;
        let fragment_code = Self::read_spirv(&desc.fragment_shader_path)?;

        // Reflect push constants per stage and merge shared blocks
        let vertex_push_constants =
            Self::reflect_push_constants(&vertex_code, vk::ShaderStageFlags::VERTEX)?;
        let fragment_push_constants =
            Self::reflect_push_constants(&fragment_code, vk::ShaderStageFlags::FRAGMENT)?;
        let push_constant_ranges =
            Self::merge_push_constant_ranges(vertex_push_constants, fragment_push_constants);

        unsafe {
            // Pipeline layout
            let mut layout_create_info = vk::PipelineLayoutCreateInfo::default();
            if !push_constant_ranges.is_empty() {
                layout_create_info = layout_create_info.push_constant_ranges(&push_constant_ranges);
            }

            let layout = device.create_pipeline_layout(&layout_create_info, None)
                .map_err(|e| render_err!("ember::pipeline", "Failed to create pipeline layout: {:?}", e))?;
            render_pipeline.layout = Some(layout);

            // Shader modules, destroyed again below
            let vertex_module_create_info = vk::ShaderModuleCreateInfo::default()
                .code(&vertex_code);
            let vertex_module = device.create_shader_module(&vertex_module_create_info, None)
                .map_err(|e| render_err!("ember::pipeline", "Failed to create vertex shader module: {:?}", e))?;

            let fragment_module_create_info = vk::ShaderModuleCreateInfo::default()
                .code(&fragment_code);
            let fragment_module = match device.create_shader_module(&fragment_module_create_info, None) {
                Ok(module) => module,
                Err(e) => {
                    device.destroy_shader_module(vertex_module, None);
                    return Err(render_err!("ember::pipeline", "Failed to create fragment shader module: {:?}", e));
                }
            };

            let shader_stages = [
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(vk::ShaderStageFlags::VERTEX)
                    .module(vertex_module)
                    .name(c"main"),
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(vk::ShaderStageFlags::FRAGMENT)
                    .module(fragment_module)
                    .name(c"main"),
            ];

            // Vertex input state
            let vertex_bindings: Vec<vk::VertexInputBindingDescription> = desc.vertex_layout.bindings
                .iter()
                .map(|binding| vk::VertexInputBindingDescription {
                    binding: binding.binding,
                    stride: binding.stride,
                    input_rate: match binding.input_rate {
                        VertexInputRate::Vertex => vk::VertexInputRate::VERTEX,
                        VertexInputRate::Instance => vk::VertexInputRate::INSTANCE,
                    },
                })
                .collect();

            let vertex_attributes: Vec<vk::VertexInputAttributeDescription> = desc.vertex_layout.attributes
                .iter()
                .map(|attribute| vk::VertexInputAttributeDescription {
                    location: attribute.location,
                    binding: attribute.binding,
                    format: attribute.format.to_vk(),
                    offset: attribute.offset,
                })
                .collect();

            let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
                .vertex_binding_descriptions(&vertex_bindings)
                .vertex_attribute_descriptions(&vertex_attributes);

            // Input assembly state
            let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
                .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
                .primitive_restart_enable(false);

            // Viewport state (dynamic)
            let viewports = [vk::Viewport::default()];
            let scissors = [vk::Rect2D::default()];
            let viewport_state = vk::PipelineViewportStateCreateInfo::default()
                .viewports(&viewports)
                .scissors(&scissors);

            // Rasterization state
            let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
                .depth_clamp_enable(false)
                .rasterizer_discard_enable(false)
                .polygon_mode(vk::PolygonMode::FILL)
                .line_width(1.0)
                .cull_mode(vk::CullModeFlags::BACK)
                .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
                .depth_bias_enable(false);

            // Depth test only when a depth attachment format is declared
            let has_depth = desc.depth_format.is_some();
            let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
                .depth_test_enable(has_depth)
                .depth_write_enable(has_depth)
                .depth_compare_op(vk::CompareOp::LESS)
                .depth_bounds_test_enable(false)
                .stencil_test_enable(false);

            // Multisample state
            let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
                .sample_shading_enable(false)
                .rasterization_samples(vk::SampleCountFlags::TYPE_1);

            // Color blend state, one attachment per color format, blending off
            let color_blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = desc.color_formats
                .iter()
                .map(|_| {
                    vk::PipelineColorBlendAttachmentState::default()
                        .color_write_mask(vk::ColorComponentFlags::RGBA)
                        .blend_enable(false)
                })
                .collect();

            let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
                .logic_op_enable(false)
                .attachments(&color_blend_attachments);

            // Dynamic state
            let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
            let dynamic_state = vk::PipelineDynamicStateCreateInfo::default()
                .dynamic_states(&dynamic_states);

            // Attachment formats for dynamic rendering, no render pass object
            let mut rendering_create_info = vk::PipelineRenderingCreateInfo::default()
                .color_attachment_formats(&desc.color_formats)
                .depth_attachment_format(desc.depth_format.unwrap_or(vk::Format::UNDEFINED));

            let pipeline_create_info = vk::GraphicsPipelineCreateInfo::default()
                .stages(&shader_stages)
                .vertex_input_state(&vertex_input_state)
                .input_assembly_state(&input_assembly_state)
                .viewport_state(&viewport_state)
                .rasterization_state(&rasterization_state)
                .depth_stencil_state(&depth_stencil_state)
                .multisample_state(&multisample_state)
                .color_blend_state(&color_blend_state)
                .dynamic_state(&dynamic_state)
                .layout(layout)
                .push_next(&mut rendering_create_info);

            let pipelines = device.create_graphics_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_create_info],
                None,
            );

            // The modules are no longer needed whether creation worked or not
            device.destroy_shader_module(vertex_module, None);
            device.destroy_shader_module(fragment_module, None);

            let pipelines = pipelines
                .map_err(|e| render_err!("ember::pipeline", "Failed to create graphics pipeline: {:?}", e.1))?;
            render_pipeline.pipeline = Some(pipelines[0]);
        }

        render_info!(
            "ember::pipeline",
            "Render pipeline created ({} color attachments, depth: {})",
            desc.color_formats.len(),
            desc.depth_format.is_some()
        );

        Ok(render_pipeline)
    }

    /// Target color attachment formats
    pub fn color_formats(&self) -> &[vk::Format] {
        &self.color_formats
    }

    /// Target depth attachment format, if any
    pub fn depth_format(&self) -> Option<vk::Format> {
        self.depth_format
    }

    /// Nominal target extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Begin a render pass on `command_buffer`
    ///
    /// Begins dynamic rendering over the declared attachments, binds the
    /// pipeline, and sets viewport and scissor to the declared extent. The
    /// returned scope borrows the pipeline mutably, so a second
    /// `begin_render` before the pass ends does not compile.
    pub fn begin_render(
        &mut self,
        command_buffer: vk::CommandBuffer,
        info: &RenderInfo,
    ) -> Result<RenderPass<'_>> {
        let pipeline = self
            .pipeline
            .ok_or_else(|| Error::InvalidResource("Pipeline is not initialized".to_string()))?;
        let device = self.context.device()?;

        let color_attachment_infos: Vec<vk::RenderingAttachmentInfo> = info.color_attachments
            .iter()
            .map(|attachment| {
                vk::RenderingAttachmentInfo::default()
                    .image_view(attachment.image_view)
                    .image_layout(attachment.image_layout.to_vk())
                    .load_op(attachment.load_op.to_vk())
                    .store_op(attachment.store_op.to_vk())
                    .clear_value(attachment.clear_value.to_vk())
            })
            .collect();

        let depth_attachment_info = info.depth_attachment.as_ref().map(|attachment| {
            vk::RenderingAttachmentInfo::default()
                .image_view(attachment.image_view)
                .image_layout(attachment.image_layout.to_vk())
                .load_op(attachment.load_op.to_vk())
                .store_op(attachment.store_op.to_vk())
                .clear_value(attachment.clear_value.to_vk())
        });

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: info.extent,
            })
            .layer_count(1)
            .color_attachments(&color_attachment_infos);

        if let Some(depth_attachment_info) = depth_attachment_info.as_ref() {
            rendering_info = rendering_info.depth_attachment(depth_attachment_info);
        }

        unsafe {
            device.cmd_begin_rendering(command_buffer, &rendering_info);

            device.cmd_bind_pipeline(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline,
            );

            let viewport = vk::Viewport::default()
                .x(0.0)
                .y(0.0)
                .width(info.extent.width as f32)
                .height(info.extent.height as f32)
                .min_depth(0.0)
                .max_depth(1.0);

            device.cmd_set_viewport(command_buffer, 0, &[viewport]);

            let scissor = vk::Rect2D::default()
                .offset(vk::Offset2D { x: 0, y: 0 })
                .extent(info.extent);

            device.cmd_set_scissor(command_buffer, 0, &[scissor]);
        }

        Ok(RenderPass {
            device,
            command_buffer,
            ended: false,
        })
    }

    fn read_spirv(path: &Path) -> Result<Vec<u32>> {
        let bytes = std::fs::read(path)
            .map_err(|e| render_err!("ember::pipeline", "Failed to read shader file {:?}: {}", path, e))?;

        if bytes.len() % 4 != 0 {
            render_bail!(
                "ember::pipeline",
                "Shader file {:?} is not 4-byte aligned ({} bytes)",
                path,
                bytes.len()
            );
        }

        ash::util::read_spv(&mut std::io::Cursor::new(&bytes)).map_err(|e| {
            render_error!("ember::pipeline", "Shader file {:?} is not valid SPIR-V: {}", path, e);
            Error::InvalidResource(format!("Shader file {:?} is not valid SPIR-V: {}", path, e))
        })
    }

    /// Parse SPIR-V bytecode and extract push constant blocks using spirq
    fn reflect_push_constants(
        code: &[u32],
        stage_flags: vk::ShaderStageFlags,
    ) -> Result<Vec<PushConstantBlock>> {
        let entry_points = spirq::ReflectConfig::new()
            .spv(code)
            .ref_all_rscs(true)
            .reflect()
            .map_err(|e| render_err!("ember::pipeline", "SPIR-V reflection failed: {:?}", e))?;

        let mut push_constants = Vec::new();

        for entry_point in &entry_points {
            for var in entry_point.vars.iter() {
                match var {
                    spirq::var::Variable::Descriptor { name, desc_bind, .. } => {
                        render_bail!(
                            "ember::pipeline",
                            "Shader declares descriptor binding '{}' (set={}, binding={}), which this pipeline does not support",
                            name.clone().unwrap_or_default(),
                            desc_bind.set(),
                            desc_bind.bind()
                        );
                    }
                    spirq::var::Variable::PushConstant { name, ty } => {
                        push_constants.push(PushConstantBlock {
                            name: name.clone().unwrap_or_default(),
                            stage_flags,
                            size: ty.nbyte().unwrap_or(0) as u32,
                        });
                    }
                    _ => {}
                }
            }
        }

        Ok(push_constants)
    }

    /// Merge per-stage push constant blocks into Vulkan ranges
    fn merge_push_constant_ranges(
        vertex: Vec<PushConstantBlock>,
        fragment: Vec<PushConstantBlock>,
    ) -> Vec<vk::PushConstantRange> {
        let mut merged = vertex;

        for fragment_block in fragment {
            if let Some(existing) = merged.iter_mut().find(|block| block.name == fragment_block.name) {
                // Same block in both stages: merge stage flags
                existing.stage_flags |= fragment_block.stage_flags;
                existing.size = existing.size.max(fragment_block.size);
            } else {
                merged.push(fragment_block);
            }
        }

        merged
            .iter()
            .filter(|block| block.size > 0)
            .map(|block| vk::PushConstantRange {
                stage_flags: block.stage_flags,
                offset: 0,
                size: block.size,
            })
            .collect()
    }
}

impl Drop for RenderPipeline<'_> {
    fn drop(&mut self) {
        unsafe {
            if let Ok(device) = self.context.device() {
                if let Some(pipeline) = self.pipeline.take() {
                    device.destroy_pipeline(pipeline, None);
                }

                if let Some(layout) = self.layout.take() {
                    device.destroy_pipeline_layout(layout, None);
                }
            }
        }
    }
}

/// An open render pass
///
/// Exists only between `begin_render` and `end`. Draw calls outside the
/// pass cannot be expressed. Dropping the scope without calling `end`
/// still closes the pass so the command buffer is never left inside one.
pub struct RenderPass<'r> {
    device: &'r ash::Device,
    command_buffer: vk::CommandBuffer,
    ended: bool,
}

impl RenderPass<'_> {
    /// Bind a vertex buffer to binding slot 0
    pub fn bind_vertex_buffer(&mut self, buffer: &GpuBuffer, offset: u64) -> Result<()> {
        let handle = buffer.handle()?;

        unsafe {
            self.device.cmd_bind_vertex_buffers(
                self.command_buffer,
                0,
                &[handle],
                &[offset],
            );
        }

        Ok(())
    }

    /// Bind an index buffer
    pub fn bind_index_buffer(
        &mut self,
        buffer: &GpuBuffer,
        offset: u64,
        index_type: IndexType,
    ) -> Result<()> {
        let handle = buffer.handle()?;

        unsafe {
            self.device.cmd_bind_index_buffer(
                self.command_buffer,
                handle,
                offset,
                index_type.to_vk(),
            );
        }

        Ok(())
    }

    /// Draw from the bound vertex buffer
    pub fn draw(&mut self, vertex_count: u32, first_vertex: u32) {
        unsafe {
            self.device.cmd_draw(
                self.command_buffer,
                vertex_count,
                1, // instance_count
                first_vertex,
                0, // first_instance
            );
        }
    }

    /// Draw from the bound index buffer
    pub fn draw_indexed(&mut self, index_count: u32, first_index: u32, vertex_offset: i32) {
        unsafe {
            self.device.cmd_draw_indexed(
                self.command_buffer,
                index_count,
                1, // instance_count
                first_index,
                vertex_offset,
                0, // first_instance
            );
        }
    }

    /// End the render pass and release the pipeline borrow
    pub fn end(mut self) {
        unsafe {
            self.device.cmd_end_rendering(self.command_buffer);
        }
        self.ended = true;
    }
}

impl Drop for RenderPass<'_> {
    fn drop(&mut self) {
        if !self.ended {
            unsafe {
                self.device.cmd_end_rendering(self.command_buffer);
            }
        }
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
