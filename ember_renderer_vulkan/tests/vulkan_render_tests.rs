//! Integration tests for GPU resources and render pass recording
//!
//! These tests require a GPU and are marked with #[ignore].
//! Run with: cargo test --test vulkan_render_tests -- --ignored

mod gpu_test_utils;

use ash::vk;
use ember_renderer_vulkan::ember::render::{
    ClearValue, ImageLayout, IndexType, LoadOp, PipelineDesc, RenderAttachment, RenderInfo,
    RenderPipeline, StoreOp, VertexAttribute, VertexBinding, VertexFormat, VertexInputRate,
    VertexLayout,
};
use ember_renderer_vulkan::ember::resource::{
    BufferUsage, GpuBuffer, GpuImage, ImageDesc, ImageFormat, ImageUsage, ResourceRegistry,
};
use ember_renderer_vulkan::ember::{Error, QueueClass};
use gpu_test_utils::get_test_context;
use serial_test::serial;
use std::path::PathBuf;

// ============================================================================
// IMAGE TESTS
// ============================================================================

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_create_sampled_image() {
    let context = get_test_context();

    let image = GpuImage::new(
        context,
        &ImageDesc {
            width: 256,
            height: 256,
            format: ImageFormat::R8G8B8A8_SRGB,
            usage: ImageUsage::Sampled,
        },
    )
    .unwrap();

    assert_eq!(image.width(), 256);
    assert_eq!(image.height(), 256);
    assert_eq!(image.format(), ImageFormat::R8G8B8A8_SRGB);
    assert_eq!(image.layout(), ImageLayout::Undefined);
    assert!(image.view().is_ok());
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_image_upload_takes_exactly_two_graphics_submissions() {
    let context = get_test_context();

    let mut image = GpuImage::new(
        context,
        &ImageDesc {
            width: 256,
            height: 256,
            format: ImageFormat::R8G8B8A8_UNORM,
            usage: ImageUsage::Sampled,
        },
    )
    .unwrap();

    let graphics_before = context.submission_count(QueueClass::Graphics);
    let transfer_before = context.submission_count(QueueClass::Transfer);

    image.transition(ImageLayout::TransferDst).unwrap();
    let data = vec![0xA5u8; 256 * 256 * 4];
    image.upload(&data).unwrap();

    // One submission for the transition, one for the copy plus final barrier
    assert_eq!(
        context.submission_count(QueueClass::Graphics),
        graphics_before + 2
    );
    // Image uploads never touch the transfer queue
    assert_eq!(
        context.submission_count(QueueClass::Transfer),
        transfer_before
    );
    assert_eq!(image.layout(), ImageLayout::ShaderReadOnly);
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_image_upload_in_wrong_layout_is_rejected() {
    let context = get_test_context();

    let mut image = GpuImage::new(
        context,
        &ImageDesc {
            width: 16,
            height: 16,
            format: ImageFormat::R8G8B8A8_UNORM,
            usage: ImageUsage::Sampled,
        },
    )
    .unwrap();

    let data = vec![0u8; 16 * 16 * 4];
    let result = image.upload(&data);

    match result {
        Err(Error::InvalidResource(message)) => {
            assert!(message.contains("TransferDst"));
            assert!(message.contains("Undefined"));
        }
        other => panic!("Expected InvalidResource, got {:?}", other),
    }
    assert_eq!(image.layout(), ImageLayout::Undefined);
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_image_upload_with_wrong_size_is_rejected() {
    let context = get_test_context();

    let mut image = GpuImage::new(
        context,
        &ImageDesc {
            width: 16,
            height: 16,
            format: ImageFormat::R8G8B8A8_UNORM,
            usage: ImageUsage::Sampled,
        },
    )
    .unwrap();

    image.transition(ImageLayout::TransferDst).unwrap();
    let result = image.upload(&[0u8; 3]);

    match result {
        Err(Error::InvalidResource(message)) => {
            assert!(message.contains("does not match"));
        }
        other => panic!("Expected InvalidResource, got {:?}", other),
    }
    assert_eq!(image.layout(), ImageLayout::TransferDst);
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_depth_image_transitions_to_attachment() {
    let context = get_test_context();

    let mut depth = GpuImage::new(
        context,
        &ImageDesc {
            width: 512,
            height: 512,
            format: ImageFormat::D32_FLOAT,
            usage: ImageUsage::DepthAttachment,
        },
    )
    .unwrap();

    depth.transition(ImageLayout::DepthAttachment).unwrap();

    assert_eq!(depth.layout(), ImageLayout::DepthAttachment);
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_render_then_sample_transition_chain() {
    let context = get_test_context();

    let mut color = GpuImage::new(
        context,
        &ImageDesc {
            width: 128,
            height: 128,
            format: ImageFormat::B8G8R8A8_SRGB,
            usage: ImageUsage::ColorAttachment,
        },
    )
    .unwrap();

    // Render target, then sampled, then refilled by a copy
    color.transition(ImageLayout::ColorAttachment).unwrap();
    color.transition(ImageLayout::ShaderReadOnly).unwrap();
    color.transition(ImageLayout::TransferDst).unwrap();

    assert_eq!(color.layout(), ImageLayout::TransferDst);
}

// ============================================================================
// BUFFER TESTS
// ============================================================================

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_vertex_buffer_copies_on_the_transfer_queue() {
    let context = get_test_context();
    let graphics_before = context.submission_count(QueueClass::Graphics);
    let transfer_before = context.submission_count(QueueClass::Transfer);

    let vertices: [f32; 9] = [0.0, -0.5, 0.0, 0.5, 0.5, 0.0, -0.5, 0.5, 0.0];
    let bytes: &[u8] = bytemuck::cast_slice(&vertices);

    let buffer = GpuBuffer::new_with_data(context, BufferUsage::Vertex, bytes).unwrap();

    assert_eq!(buffer.size(), bytes.len() as u64);
    assert_eq!(buffer.usage(), BufferUsage::Vertex);
    assert!(buffer.handle().is_ok());

    // The staging copy runs on the dedicated transfer queue
    assert_eq!(
        context.submission_count(QueueClass::Transfer),
        transfer_before + 1
    );
    assert_eq!(
        context.submission_count(QueueClass::Graphics),
        graphics_before
    );
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_index_buffer_with_data() {
    let context = get_test_context();

    let indices: [u16; 3] = [0, 1, 2];
    let bytes: &[u8] = bytemuck::cast_slice(&indices);

    let buffer = GpuBuffer::new_with_data(context, BufferUsage::Index, bytes).unwrap();

    assert_eq!(buffer.size(), 6);
    assert_eq!(buffer.usage(), BufferUsage::Index);
}

// ============================================================================
// PIPELINE TESTS
// ============================================================================

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_create_pipeline_from_shader_files() {
    let context = get_test_context();

    let desc = test_pipeline_desc(vk::Format::R8G8B8A8_UNORM);
    let pipeline = RenderPipeline::new(context, &desc).unwrap();

    assert_eq!(pipeline.color_formats(), &[vk::Format::R8G8B8A8_UNORM]);
    assert_eq!(pipeline.depth_format(), None);
    assert_eq!(pipeline.extent().width, 256);
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_create_pipeline_with_vertex_layout() {
    let context = get_test_context();

    let mut desc = test_pipeline_desc(vk::Format::R8G8B8A8_UNORM);
    desc.vertex_layout = VertexLayout {
        bindings: vec![VertexBinding {
            binding: 0,
            stride: 12,
            input_rate: VertexInputRate::Vertex,
        }],
        attributes: vec![VertexAttribute {
            location: 0,
            binding: 0,
            format: VertexFormat::R32G32B32_SFLOAT,
            offset: 0,
        }],
    };

    let _pipeline = RenderPipeline::new(context, &desc).unwrap();
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_create_pipeline_with_depth_format() {
    let context = get_test_context();

    let mut desc = test_pipeline_desc(vk::Format::R8G8B8A8_UNORM);
    desc.depth_format = Some(vk::Format::D32_SFLOAT);

    let pipeline = RenderPipeline::new(context, &desc).unwrap();

    assert_eq!(pipeline.depth_format(), Some(vk::Format::D32_SFLOAT));
}

// ============================================================================
// RENDER PASS TESTS
// ============================================================================

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_empty_render_pass_records_and_submits() {
    let context = get_test_context();

    let mut target = color_target(256);
    target.transition(ImageLayout::ColorAttachment).unwrap();

    let mut pipeline =
        RenderPipeline::new(context, &test_pipeline_desc(vk::Format::R8G8B8A8_UNORM)).unwrap();

    let command_buffer = context
        .begin_single_time_commands(QueueClass::Graphics)
        .unwrap();

    let info = render_info_for(&target);
    let pass = pipeline.begin_render(command_buffer, &info).unwrap();
    pass.end();

    context
        .end_single_time_commands(QueueClass::Graphics, command_buffer)
        .unwrap();
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_render_pass_draws_triangle() {
    let context = get_test_context();

    let mut target = color_target(256);
    target.transition(ImageLayout::ColorAttachment).unwrap();

    let mut pipeline =
        RenderPipeline::new(context, &test_pipeline_desc(vk::Format::R8G8B8A8_UNORM)).unwrap();

    let command_buffer = context
        .begin_single_time_commands(QueueClass::Graphics)
        .unwrap();

    let info = render_info_for(&target);
    let mut pass = pipeline.begin_render(command_buffer, &info).unwrap();
    pass.draw(3, 0);
    pass.end();

    context
        .end_single_time_commands(QueueClass::Graphics, command_buffer)
        .unwrap();
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_render_pass_draws_indexed() {
    let context = get_test_context();

    let mut target = color_target(256);
    target.transition(ImageLayout::ColorAttachment).unwrap();

    let vertices: [f32; 9] = [0.0, -0.5, 0.0, 0.5, 0.5, 0.0, -0.5, 0.5, 0.0];
    let vertex_buffer =
        GpuBuffer::new_with_data(context, BufferUsage::Vertex, bytemuck::cast_slice(&vertices))
            .unwrap();

    let indices: [u16; 3] = [0, 1, 2];
    let index_buffer =
        GpuBuffer::new_with_data(context, BufferUsage::Index, bytemuck::cast_slice(&indices))
            .unwrap();

    let mut pipeline =
        RenderPipeline::new(context, &test_pipeline_desc(vk::Format::R8G8B8A8_UNORM)).unwrap();

    let command_buffer = context
        .begin_single_time_commands(QueueClass::Graphics)
        .unwrap();

    let info = render_info_for(&target);
    let mut pass = pipeline.begin_render(command_buffer, &info).unwrap();
    pass.bind_vertex_buffer(&vertex_buffer, 0).unwrap();
    pass.bind_index_buffer(&index_buffer, 0, IndexType::Uint16).unwrap();
    pass.draw_indexed(3, 0, 0);
    pass.end();

    context
        .end_single_time_commands(QueueClass::Graphics, command_buffer)
        .unwrap();
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_render_pass_drop_closes_the_pass() {
    let context = get_test_context();

    let mut target = color_target(256);
    target.transition(ImageLayout::ColorAttachment).unwrap();

    let mut pipeline =
        RenderPipeline::new(context, &test_pipeline_desc(vk::Format::R8G8B8A8_UNORM)).unwrap();

    let command_buffer = context
        .begin_single_time_commands(QueueClass::Graphics)
        .unwrap();

    let info = render_info_for(&target);
    {
        let _pass = pipeline.begin_render(command_buffer, &info).unwrap();
        // Dropped without end(): the pass must still be closed
    }

    context
        .end_single_time_commands(QueueClass::Graphics, command_buffer)
        .unwrap();
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_render_pass_with_depth_attachment() {
    let context = get_test_context();

    let mut target = color_target(256);
    target.transition(ImageLayout::ColorAttachment).unwrap();

    let mut depth = GpuImage::new(
        context,
        &ImageDesc {
            width: 256,
            height: 256,
            format: ImageFormat::D32_FLOAT,
            usage: ImageUsage::DepthAttachment,
        },
    )
    .unwrap();
    depth.transition(ImageLayout::DepthAttachment).unwrap();

    let mut desc = test_pipeline_desc(vk::Format::R8G8B8A8_UNORM);
    desc.depth_format = Some(vk::Format::D32_SFLOAT);
    let mut pipeline = RenderPipeline::new(context, &desc).unwrap();

    let command_buffer = context
        .begin_single_time_commands(QueueClass::Graphics)
        .unwrap();

    let mut info = render_info_for(&target);
    info.depth_attachment = Some(RenderAttachment {
        image_view: depth.view().unwrap(),
        image_layout: ImageLayout::DepthAttachment,
        load_op: LoadOp::Clear,
        store_op: StoreOp::DontCare,
        clear_value: ClearValue::DepthStencil {
            depth: 1.0,
            stencil: 0,
        },
    });

    let mut pass = pipeline.begin_render(command_buffer, &info).unwrap();
    pass.draw(3, 0);
    pass.end();

    context
        .end_single_time_commands(QueueClass::Graphics, command_buffer)
        .unwrap();
}

// ============================================================================
// REGISTRY TESTS
// ============================================================================

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_registry_owns_gpu_resources() {
    let context = get_test_context();

    let mut registry = ResourceRegistry::new();
    registry.insert_image(
        "albedo",
        GpuImage::new(
            context,
            &ImageDesc {
                width: 64,
                height: 64,
                format: ImageFormat::R8G8B8A8_UNORM,
                usage: ImageUsage::Sampled,
            },
        )
        .unwrap(),
    );
    registry.insert_buffer(
        "quad",
        GpuBuffer::new_with_data(context, BufferUsage::Index, &[0u8, 0, 1, 0, 2, 0]).unwrap(),
    );

    assert_eq!(registry.len(), 2);
    assert!(registry.image("albedo").is_ok());
    assert!(registry.buffer("quad").is_ok());

    // Mutable access drives a transition through the registry
    registry
        .image_mut("albedo")
        .unwrap()
        .transition(ImageLayout::TransferDst)
        .unwrap();
    assert_eq!(
        registry.image("albedo").unwrap().layout(),
        ImageLayout::TransferDst
    );

    // Removal hands the resource back; dropping it destroys the GPU objects
    let removed = registry.remove_image("albedo");
    assert!(removed.is_some());
    drop(removed);
    assert_eq!(registry.len(), 1);

    registry.clear();
    assert!(registry.is_empty());
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Create a color attachment image of the given square size
fn color_target(size: u32) -> GpuImage<'static> {
    GpuImage::new(
        get_test_context(),
        &ImageDesc {
            width: size,
            height: size,
            format: ImageFormat::R8G8B8A8_UNORM,
            usage: ImageUsage::ColorAttachment,
        },
    )
    .unwrap()
}

/// RenderInfo clearing the whole target to opaque black
fn render_info_for(target: &GpuImage) -> RenderInfo {
    RenderInfo {
        color_attachments: vec![RenderAttachment {
            image_view: target.view().unwrap(),
            image_layout: ImageLayout::ColorAttachment,
            load_op: LoadOp::Clear,
            store_op: StoreOp::Store,
            clear_value: ClearValue::Color([0.0, 0.0, 0.0, 1.0]),
        }],
        depth_attachment: None,
        extent: vk::Extent2D {
            width: target.width(),
            height: target.height(),
        },
    }
}

/// Build a PipelineDesc over freshly written shader fixture files
fn test_pipeline_desc(color_format: vk::Format) -> PipelineDesc {
    PipelineDesc {
        vertex_shader_path: write_shader_fixture(
            "ember_test_fixture.vert.spv",
            &test_vertex_shader_words(),
        ),
        fragment_shader_path: write_shader_fixture(
            "ember_test_fixture.frag.spv",
            &test_fragment_shader_words(),
        ),
        color_formats: vec![color_format],
        depth_format: None,
        extent: vk::Extent2D {
            width: 256,
            height: 256,
        },
        vertex_layout: VertexLayout::default(),
    }
}

/// Write SPIR-V words to a file in the temp directory
fn write_shader_fixture(name: &str, words: &[u32]) -> PathBuf {
    let path = std::env::temp_dir().join(name);
    std::fs::write(&path, bytemuck::cast_slice::<u32, u8>(words)).unwrap();
    path
}

/// Hand-assembled SPIR-V vertex shader: writes a constant clip-space position
fn test_vertex_shader_words() -> Vec<u32> {
    vec![
        // Header: magic, version 1.0, generator, bound, schema
        0x07230203, 0x00010000, 0, 12, 0,
        // OpCapability Shader
        0x00020011, 1,
        // OpMemoryModel Logical GLSL450
        0x0003000E, 0, 1,
        // OpEntryPoint Vertex %9 "main" %11
        0x0006000F, 0, 9, 0x6E69616D, 0, 11,
        // OpDecorate %11 BuiltIn Position
        0x00040047, 11, 11, 0,
        // %1 = void, %2 = fn() void, %3 = f32, %4 = vec4, %5 = ptr Output vec4
        0x00020013, 1,
        0x00030021, 2, 1,
        0x00030016, 3, 32,
        0x00040017, 4, 3, 4,
        0x00040020, 5, 3, 4,
        // %6 = 0.0, %7 = 1.0, %8 = vec4(0, 0, 0, 1), %11 = output variable
        0x0004002B, 3, 6, 0x00000000,
        0x0004002B, 3, 7, 0x3F800000,
        0x0007002C, 4, 8, 6, 6, 6, 7,
        0x0004003B, 5, 11, 3,
        // main: store the constant position and return
        0x00050036, 1, 9, 0, 2,
        0x000200F8, 10,
        0x0003003E, 11, 8,
        0x000100FD,
        0x00010038,
    ]
}

/// Hand-assembled SPIR-V fragment shader: writes a constant color to location 0
fn test_fragment_shader_words() -> Vec<u32> {
    vec![
        // Header: magic, version 1.0, generator, bound, schema
        0x07230203, 0x00010000, 0, 12, 0,
        // OpCapability Shader
        0x00020011, 1,
        // OpMemoryModel Logical GLSL450
        0x0003000E, 0, 1,
        // OpEntryPoint Fragment %9 "main" %11
        0x0006000F, 4, 9, 0x6E69616D, 0, 11,
        // OpExecutionMode %9 OriginUpperLeft
        0x00030010, 9, 7,
        // OpDecorate %11 Location 0
        0x00040047, 11, 30, 0,
        // %1 = void, %2 = fn() void, %3 = f32, %4 = vec4, %5 = ptr Output vec4
        0x00020013, 1,
        0x00030021, 2, 1,
        0x00030016, 3, 32,
        0x00040017, 4, 3, 4,
        0x00040020, 5, 3, 4,
        // %7 = 1.0, %8 = vec4(1, 1, 1, 1), %11 = output variable
        0x0004002B, 3, 7, 0x3F800000,
        0x0007002C, 4, 8, 7, 7, 7, 7,
        0x0004003B, 5, 11, 3,
        // main: store the constant color and return
        0x00050036, 1, 9, 0, 2,
        0x000200F8, 10,
        0x0003003E, 11, 8,
        0x000100FD,
        0x00010038,
    ]
}
