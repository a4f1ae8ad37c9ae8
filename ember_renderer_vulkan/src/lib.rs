/*!
# Ember Renderer - Vulkan Core

GPU-resident resources and command execution for the Ember renderer.

This crate owns the explicit Vulkan plumbing behind the renderer: instance
and device setup, queue selection, GPU memory via gpu-allocator, images with
tracked layout state, device-local buffers filled through staging, graphics
pipelines built from SPIR-V reflection, and scoped render pass recording
over Vulkan 1.3 dynamic rendering.

## Architecture

- **DeviceContext**: Instance, device, queues, allocator, and one-shot command submission
- **GpuImage**: Sampled and attachment images with tracked layout state
- **GpuBuffer**: Device-local vertex and index buffers filled through staging
- **RenderPipeline**: Graphics pipeline with push-constant reflection
- **RenderPass**: Scoped draw recording inside a dynamic rendering pass
- **ResourceRegistry**: Name-keyed ownership of images and buffers

All public types are re-exported through the [`ember`] namespace module.
*/

// Internal modules
mod buffer;
mod context;
mod debug;
mod error;
mod image;
pub mod log;
mod pipeline;
mod registry;
mod transition;

// Main ember namespace module
pub mod ember {
    // Error types
    pub use crate::error::{Error, Result};

    // Device context and queue classes
    pub use crate::context::{ContextConfig, DeviceContext, QueueClass};

    // Logging sub-module (types and logging entry points, NOT macros)
    pub mod log {
        pub use crate::log::{
            log, log_detailed, reset_logger, set_logger, DefaultLogger, LogEntry, LogSeverity,
            Logger,
        };
        // Note: render_* macros are NOT re-exported here - they are internal only
    }

    // Render sub-module: pipelines, render passes, and layout transitions
    pub mod render {
        pub use crate::pipeline::*;
        pub use crate::transition::*;
    }

    // Resource sub-module: images, buffers, and the registry
    pub mod resource {
        pub use crate::buffer::*;
        pub use crate::image::*;
        pub use crate::registry::*;
    }

    // Debug sub-module: validation configuration and statistics
    pub mod debug {
        pub use crate::debug::{
            get_validation_stats, print_validation_stats_report, DebugMessageFilter, DebugOutput,
            DebugSeverity, ValidationStats,
        };
    }
}
