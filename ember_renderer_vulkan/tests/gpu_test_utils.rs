#![allow(dead_code)]
//! GPU test utilities - Shared DeviceContext for integration tests
//!
//! This module provides a global DeviceContext instance shared across all GPU
//! tests. Creating many Vulkan surfaces in one process can trip ash-window's
//! `RecreationAttempt` error on some platforms, and one shared context more
//! closely simulates real-world usage (1 context per app).

use ash::vk;
use ember_renderer_vulkan::ember::{ContextConfig, DeviceContext};
use std::sync::OnceLock;
use winit::event_loop::{EventLoop, EventLoopBuilder};
use winit::window::Window;

// Platform-specific imports for EventLoop threading
#[cfg(target_os = "windows")]
use winit::platform::windows::EventLoopBuilderExtWindows;
#[cfg(target_os = "linux")]
use winit::platform::x11::EventLoopBuilderExtX11;

/// Global DeviceContext instance (initialized once)
static GPU_CONTEXT: OnceLock<DeviceContext> = OnceLock::new();

/// Global Window (kept alive for the context's surface)
/// Note: EventLoop is intentionally leaked with mem::forget to keep Window valid
static GPU_WINDOW: OnceLock<Window> = OnceLock::new();

/// Get the shared DeviceContext for GPU tests
///
/// Lazily initializes the context on first call. All subsequent calls return
/// the same instance.
///
/// Note: EventLoop is intentionally leaked with mem::forget to keep Window
/// valid. This is necessary because EventLoop cannot be stored in a static
/// (not Sync).
pub fn get_test_context() -> &'static DeviceContext {
    GPU_CONTEXT.get_or_init(|| {
        // Create window once
        let (window, event_loop) = create_test_window();

        // Create DeviceContext once
        let context = DeviceContext::new(
            &window,
            vk::Extent2D {
                width: 800,
                height: 600,
            },
            test_config(),
        )
        .expect("Failed to create DeviceContext for tests");

        // Leak EventLoop intentionally to keep Window valid
        // This is a test-only workaround for EventLoop not being Sync
        std::mem::forget(event_loop);

        // Store window to keep it alive
        GPU_WINDOW.set(window).ok();

        context
    })
}

/// Context configuration for tests
///
/// Validation stays off so the suite also runs on machines without the
/// Khronos validation layers installed.
pub fn test_config() -> ContextConfig {
    ContextConfig {
        enable_validation: false,
        ..ContextConfig::default()
    }
}

/// Create a test window for Vulkan
///
/// Creates a hidden window with an EventLoop that supports any_thread where
/// the platform allows it (cargo test runs tests off the main thread).
/// Use this when you need a fresh DeviceContext instead of the shared one.
#[allow(deprecated)]
pub fn create_test_window() -> (Window, EventLoop<()>) {
    let event_loop = {
        #[cfg(target_os = "windows")]
        {
            EventLoopBuilder::new()
                .with_any_thread(true)
                .build()
                .unwrap()
        }
        #[cfg(target_os = "linux")]
        {
            EventLoopBuilder::new()
                .with_any_thread(true)
                .build()
                .unwrap()
        }
        #[cfg(not(any(target_os = "windows", target_os = "linux")))]
        {
            EventLoopBuilder::new().build().unwrap()
        }
    };

    let window_attrs = Window::default_attributes()
        .with_title("Ember GPU Test Window")
        .with_inner_size(winit::dpi::LogicalSize::new(800, 600))
        .with_visible(false); // Hidden window for tests

    let window = event_loop.create_window(window_attrs).unwrap();
    (window, event_loop)
}
