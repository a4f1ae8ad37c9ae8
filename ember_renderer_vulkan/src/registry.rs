/// Named GPU resource registry
///
/// Stores images and buffers under caller-chosen names so higher layers
/// can refer to resources without holding them. Lookups for unknown names
/// fail with ResourceNotFound, which callers may treat as recoverable.

use rustc_hash::FxHashMap;

use crate::buffer::GpuBuffer;
use crate::error::{Error, Result};
use crate::image::GpuImage;
use crate::render_warn;

pub struct ResourceRegistry<'a> {
    images: FxHashMap<String, GpuImage<'a>>,
    buffers: FxHashMap<String, GpuBuffer<'a>>,
}

impl<'a> ResourceRegistry<'a> {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            images: FxHashMap::default(),
            buffers: FxHashMap::default(),
        }
    }

    /// Register an image under a name
    ///
    /// Replacing an existing entry destroys the old image.
    pub fn insert_image(&mut self, name: &str, image: GpuImage<'a>) {
        if self.images.insert(name.to_string(), image).is_some() {
            render_warn!("ember::registry", "Image '{}' replaced", name);
        }
    }

    /// Register a buffer under a name
    ///
    /// Replacing an existing entry destroys the old buffer.
    pub fn insert_buffer(&mut self, name: &str, buffer: GpuBuffer<'a>) {
        if self.buffers.insert(name.to_string(), buffer).is_some() {
            render_warn!("ember::registry", "Buffer '{}' replaced", name);
        }
    }

    /// Look up an image by name
    pub fn image(&self, name: &str) -> Result<&GpuImage<'a>> {
        self.images
            .get(name)
            .ok_or_else(|| Error::ResourceNotFound(format!("image '{}' does not exist", name)))
    }

    /// Look up an image by name for mutation (layout transitions, uploads)
    pub fn image_mut(&mut self, name: &str) -> Result<&mut GpuImage<'a>> {
        self.images
            .get_mut(name)
            .ok_or_else(|| Error::ResourceNotFound(format!("image '{}' does not exist", name)))
    }

    /// Look up a buffer by name
    pub fn buffer(&self, name: &str) -> Result<&GpuBuffer<'a>> {
        self.buffers
            .get(name)
            .ok_or_else(|| Error::ResourceNotFound(format!("buffer '{}' does not exist", name)))
    }

    /// Remove an image by name
    ///
    /// Returns the removed image, or None if not found. Dropping the
    /// returned image destroys its GPU objects.
    pub fn remove_image(&mut self, name: &str) -> Option<GpuImage<'a>> {
        self.images.remove(name)
    }

    /// Remove a buffer by name
    pub fn remove_buffer(&mut self, name: &str) -> Option<GpuBuffer<'a>> {
        self.buffers.remove(name)
    }

    /// Number of registered resources
    pub fn len(&self) -> usize {
        self.images.len() + self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty() && self.buffers.is_empty()
    }

    /// Remove all resources
    pub fn clear(&mut self) {
        self.images.clear();
        self.buffers.clear();
    }
}

impl Default for ResourceRegistry<'_> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
