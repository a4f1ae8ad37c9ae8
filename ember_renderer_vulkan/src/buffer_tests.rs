//! Unit tests for buffer.rs
//!
//! Headless tests for usage mapping and the creation guards. Tests that
//! allocate real GPU memory live under tests/.

use super::*;
use serial_test::serial;

// ============================================================================
// BUFFER USAGE TESTS
// ============================================================================

#[test]
fn test_buffer_usage_to_vk() {
    assert_eq!(BufferUsage::Vertex.to_vk(), vk::BufferUsageFlags::VERTEX_BUFFER);
    assert_eq!(BufferUsage::Index.to_vk(), vk::BufferUsageFlags::INDEX_BUFFER);
}

#[test]
fn test_buffer_usage_equality() {
    assert_eq!(BufferUsage::Vertex, BufferUsage::Vertex);
    assert_ne!(BufferUsage::Vertex, BufferUsage::Index);
}

// ============================================================================
// CREATION GUARD TESTS
// ============================================================================

#[test]
#[serial]
fn test_new_with_data_rejects_empty_data() {
    let context = DeviceContext::empty_for_testing();

    let result = GpuBuffer::new_with_data(&context, BufferUsage::Vertex, &[]);

    match result {
        Err(Error::InvalidResource(message)) => {
            assert!(message.contains("must not be empty"));
        }
        other => panic!("Expected InvalidResource, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_new_with_data_requires_initialized_context() {
    // Non-empty data passes the guard, then the missing device fails
    let context = DeviceContext::empty_for_testing();

    let result = GpuBuffer::new_with_data(&context, BufferUsage::Index, &[0u8; 12]);

    assert!(matches!(result, Err(Error::InitializationFailed(_))));
}

// ============================================================================
// DETACHED BUFFER TESTS
// ============================================================================

#[test]
fn test_detached_buffer_accessors() {
    let context = DeviceContext::empty_for_testing();
    let buffer = GpuBuffer::detached_for_testing(&context, BufferUsage::Vertex);

    assert_eq!(buffer.size(), 0);
    assert_eq!(buffer.usage(), BufferUsage::Vertex);
    assert!(matches!(buffer.handle(), Err(Error::InvalidResource(_))));
}

#[test]
fn test_detached_buffer_drops_cleanly() {
    let context = DeviceContext::empty_for_testing();
    {
        let _buffer = GpuBuffer::detached_for_testing(&context, BufferUsage::Index);
    }
    // Dropping without GPU objects must not panic
}
