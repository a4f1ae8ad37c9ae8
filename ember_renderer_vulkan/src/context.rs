/// DeviceContext - GPU device, queues, allocator, and command pools
///
/// Owns every long-lived Vulkan object the renderer needs:
/// - Instance, surface, and logical device
/// - Allocator for memory management
/// - Graphics, present, and transfer queues with their family indices
/// - One short-lived command pool per queue class
///
/// Construction fills the context progressively, so a failure partway
/// through tears down exactly the objects created so far.

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::{CStr, CString};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::debug::{self, DebugMessageFilter, DebugOutput, DebugSeverity};
use crate::error::{Error, Result};
use crate::{render_err, render_error, render_info};

/// Queue classes the context exposes
///
/// Each class has its own queue, family index, and command pool. Graphics
/// work (including image layout transitions) goes to `Graphics`; raw
/// buffer copies go to the dedicated `Transfer` queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueClass {
    /// Graphics-capable queue
    Graphics,
    /// Dedicated transfer queue (its family never supports graphics)
    Transfer,
}

/// Configuration for DeviceContext creation
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Application name reported to the driver
    pub app_name: String,

    /// Application version as (major, minor, patch)
    pub app_version: (u32, u32, u32),

    /// Enable Vulkan validation layers and the debug messenger
    pub enable_validation: bool,

    /// Which validation severities are shown
    pub debug_severity: DebugSeverity,

    /// Where validation messages go
    pub debug_output: DebugOutput,

    /// Per-category filter for validation messages
    pub debug_message_filter: DebugMessageFilter,

    /// Panic as soon as a validation error is reported
    pub panic_on_validation_error: bool,

    /// Count validation messages for later reporting
    pub enable_validation_stats: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            app_name: "Ember Application".to_string(),
            app_version: (1, 0, 0),
            enable_validation: cfg!(debug_assertions),
            debug_severity: DebugSeverity::ErrorsAndWarnings,
            debug_output: DebugOutput::Console,
            debug_message_filter: DebugMessageFilter::default(),
            panic_on_validation_error: false,
            enable_validation_stats: false,
        }
    }
}

/// Queue family indices selected for a physical device
struct QueueFamilies {
    graphics: u32,
    present: u32,
    transfer: u32,
}

/// Central GPU context
///
/// Every owned handle sits in an Option so a partially constructed context
/// (for example after a failure inside `new`) destroys exactly the objects
/// it managed to create. After `new` returns Ok, all of them are populated
/// for the lifetime of the context.
pub struct DeviceContext {
    /// Keeps the Vulkan library loaded for the lifetime of the context
    _entry: Option<ash::Entry>,
    instance: Option<ash::Instance>,
    debug_utils_loader: Option<ash::ext::debug_utils::Instance>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    surface_loader: Option<ash::khr::surface::Instance>,
    surface: Option<vk::SurfaceKHR>,
    physical_device: vk::PhysicalDevice,
    device: Option<ash::Device>,

    /// GPU memory allocator (shared, requires mutex for thread safety).
    /// Dropped BEFORE the device is destroyed.
    allocator: Option<Mutex<Allocator>>,

    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    transfer_queue: vk::Queue,
    graphics_family: u32,
    present_family: u32,
    transfer_family: u32,

    /// Command pools for one-shot submissions, one per queue class
    /// (created with TRANSIENT + RESET_COMMAND_BUFFER flags)
    graphics_pool: Option<vk::CommandPool>,
    transfer_pool: Option<vk::CommandPool>,

    /// Render extent in pixels
    extent: vk::Extent2D,

    /// Completed single-time submissions per queue class
    graphics_submissions: AtomicU64,
    transfer_submissions: AtomicU64,
}

impl DeviceContext {
    /// A context with nothing created yet
    ///
    /// Starting point for `new`; also what teardown sees if construction
    /// fails on the very first step.
    fn empty(extent: vk::Extent2D) -> Self {
        Self {
            _entry: None,
            instance: None,
            debug_utils_loader: None,
            debug_messenger: None,
            surface_loader: None,
            surface: None,
            physical_device: vk::PhysicalDevice::null(),
            device: None,
            allocator: None,
            graphics_queue: vk::Queue::null(),
            present_queue: vk::Queue::null(),
            transfer_queue: vk::Queue::null(),
            graphics_family: 0,
            present_family: 0,
            transfer_family: 0,
            graphics_pool: None,
            transfer_pool: None,
            extent,
            graphics_submissions: AtomicU64::new(0),
            transfer_submissions: AtomicU64::new(0),
        }
    }

    /// A context with no GPU objects, for unit tests that exercise
    /// teardown and failure paths without a device
    #[cfg(test)]
    pub(crate) fn empty_for_testing() -> Self {
        Self::empty(vk::Extent2D {
            width: 0,
            height: 0,
        })
    }

    /// Create a device context for the given window
    ///
    /// Selects the first physical device that offers Vulkan 1.3, dynamic
    /// rendering, swapchain support, a graphics family, a present-capable
    /// family, and a dedicated transfer family. Any failure here is fatal
    /// for the context; the partially built state is torn down on return.
    ///
    /// # Arguments
    ///
    /// * `window` - Window providing display and window handles
    /// * `extent` - Render extent in pixels
    /// * `config` - Context configuration
    pub fn new<W: HasDisplayHandle + HasWindowHandle>(
        window: &W,
        extent: vk::Extent2D,
        config: ContextConfig,
    ) -> Result<Self> {
        let mut context = Self::empty(extent);

        unsafe {
            // Create Vulkan Entry
            let entry = ash::Entry::load()
                .map_err(|e| {
                    render_error!("ember::context", "Failed to load Vulkan library: {:?}", e);
                    Error::InitializationFailed(format!("Failed to load Vulkan library: {:?}", e))
                })?;
            context._entry = Some(entry.clone());

            // Application Info
            let app_name = CString::new(config.app_name.as_str())
                .map_err(|e| {
                    render_error!("ember::context", "Invalid application name: {:?}", e);
                    Error::InitializationFailed(format!("Invalid application name: {:?}", e))
                })?;
            let (major, minor, patch) = config.app_version;
            let app_info = vk::ApplicationInfo::default()
                .application_name(&app_name)
                .application_version(vk::make_api_version(0, major, minor, patch))
                .engine_name(c"Ember")
                .engine_version(vk::make_api_version(0, 0, 1, 0))
                .api_version(vk::API_VERSION_1_3);

            // Get required extensions
            let display_handle = window.display_handle()
                .map_err(|e| {
                    render_error!("ember::context", "Failed to get display handle: {}", e);
                    Error::InitializationFailed(format!("Failed to get display handle: {}", e))
                })?;
            let mut extension_names = ash_window::enumerate_required_extensions(display_handle.as_raw())
                .map_err(|e| {
                    render_error!("ember::context", "Failed to get required extensions: {}", e);
                    Error::InitializationFailed(format!("Failed to get required extensions: {}", e))
                })?
                .to_vec();

            // Add debug utils extension if validation is enabled
            if config.enable_validation {
                extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
            }

            // Validation layers
            let layer_names = if config.enable_validation {
                vec![c"VK_LAYER_KHRONOS_validation".as_ptr()]
            } else {
                vec![]
            };

            let create_info = vk::InstanceCreateInfo::default()
                .application_info(&app_info)
                .enabled_layer_names(&layer_names)
                .enabled_extension_names(&extension_names);

            let instance = entry
                .create_instance(&create_info, None)
                .map_err(|e| {
                    render_error!("ember::context", "Failed to create Vulkan instance: {:?}", e);
                    Error::InitializationFailed(format!("Failed to create instance: {:?}", e))
                })?;
            context.instance = Some(instance.clone());

            // Setup debug messenger if validation is enabled
            if config.enable_validation {
                let debug_utils = ash::ext::debug_utils::Instance::new(&entry, &instance);

                // Initialize debug config
                debug::init_debug_config(debug::Config {
                    severity: config.debug_severity,
                    output: config.debug_output.clone(),
                    message_filter: config.debug_message_filter,
                    panic_on_error: config.panic_on_validation_error,
                    enable_stats: config.enable_validation_stats,
                });

                // Determine severity flags based on config
                let severity_flags = match config.debug_severity {
                    DebugSeverity::ErrorsOnly => {
                        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    }
                    DebugSeverity::ErrorsAndWarnings => {
                        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    }
                    DebugSeverity::All => {
                        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                            | vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    }
                };

                // Create debug messenger
                let debug_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
                    .message_severity(severity_flags)
                    .message_type(
                        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
                    )
                    .pfn_user_callback(Some(crate::debug::vulkan_debug_callback));

                let messenger = debug_utils
                    .create_debug_utils_messenger(&debug_info, None)
                    .map_err(|e| {
                        render_error!("ember::context", "Failed to create debug messenger: {:?}", e);
                        Error::InitializationFailed(format!("Failed to create debug messenger: {:?}", e))
                    })?;

                context.debug_utils_loader = Some(debug_utils);
                context.debug_messenger = Some(messenger);
            }

            // Create Surface
            let window_handle = window.window_handle()
                .map_err(|e| {
                    render_error!("ember::context", "Failed to get window handle: {}", e);
                    Error::InitializationFailed(format!("Failed to get window handle: {}", e))
                })?;
            let surface = ash_window::create_surface(
                &entry,
                &instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
            .map_err(|e| {
                render_error!("ember::context", "Failed to create surface: {:?}", e);
                Error::InitializationFailed(format!("Failed to create surface: {:?}", e))
            })?;

            let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);
            context.surface = Some(surface);
            context.surface_loader = Some(surface_loader.clone());

            // Pick Physical Device
            let physical_devices = instance
                .enumerate_physical_devices()
                .map_err(|e| {
                    render_error!("ember::context", "Failed to enumerate physical devices: {:?}", e);
                    Error::InitializationFailed(format!("Failed to enumerate physical devices: {:?}", e))
                })?;

            let (physical_device, families) = physical_devices
                .into_iter()
                .find_map(|candidate| {
                    if !Self::device_meets_requirements(&instance, candidate) {
                        return None;
                    }
                    Self::find_queue_families(&instance, &surface_loader, surface, candidate)
                        .map(|families| (candidate, families))
                })
                .ok_or_else(|| {
                    render_error!(
                        "ember::context",
                        "No suitable GPU found (need Vulkan 1.3, dynamic rendering, and a dedicated transfer queue)"
                    );
                    Error::InitializationFailed("No suitable GPU found".to_string())
                })?;

            let properties = instance.get_physical_device_properties(physical_device);
            let device_name = CStr::from_ptr(properties.device_name.as_ptr()).to_string_lossy();
            render_info!("ember::context", "Selected GPU: {}", device_name);

            context.physical_device = physical_device;
            context.graphics_family = families.graphics;
            context.present_family = families.present;
            context.transfer_family = families.transfer;

            // Create Logical Device
            let queue_priorities = [1.0];
            let mut unique_families = vec![families.graphics];
            if !unique_families.contains(&families.present) {
                unique_families.push(families.present);
            }
            if !unique_families.contains(&families.transfer) {
                unique_families.push(families.transfer);
            }
            let queue_create_infos: Vec<_> = unique_families
                .iter()
                .map(|&family| {
                    vk::DeviceQueueCreateInfo::default()
                        .queue_family_index(family)
                        .queue_priorities(&queue_priorities)
                })
                .collect();

            let device_extension_names = vec![ash::khr::swapchain::NAME.as_ptr()];

            let device_features = vk::PhysicalDeviceFeatures::default();
            let mut dynamic_rendering_features =
                vk::PhysicalDeviceDynamicRenderingFeatures::default().dynamic_rendering(true);

            let device_create_info = vk::DeviceCreateInfo::default()
                .queue_create_infos(&queue_create_infos)
                .enabled_extension_names(&device_extension_names)
                .enabled_features(&device_features)
                .push_next(&mut dynamic_rendering_features);

            let device = instance
                .create_device(physical_device, &device_create_info, None)
                .map_err(|e| {
                    render_error!("ember::context", "Failed to create logical device: {:?}", e);
                    Error::InitializationFailed(format!("Failed to create device: {:?}", e))
                })?;
            context.device = Some(device.clone());

            context.graphics_queue = device.get_device_queue(families.graphics, 0);
            context.present_queue = device.get_device_queue(families.present, 0);
            context.transfer_queue = device.get_device_queue(families.transfer, 0);

            // Create GPU allocator
            let allocator = Allocator::new(&AllocatorCreateDesc {
                instance: instance.clone(),
                device: device.clone(),
                physical_device,
                debug_settings: Default::default(),
                buffer_device_address: false,
                allocation_sizes: Default::default(),
            })
            .map_err(|e| {
                render_error!("ember::context", "Failed to create GPU allocator: {:?}", e);
                Error::InitializationFailed(format!("Failed to create allocator: {:?}", e))
            })?;
            context.allocator = Some(Mutex::new(allocator));

            // Create one-shot command pools, one per queue class
            let graphics_pool_info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(families.graphics)
                .flags(vk::CommandPoolCreateFlags::TRANSIENT | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

            let graphics_pool = device.create_command_pool(&graphics_pool_info, None)
                .map_err(|e| {
                    render_error!("ember::context", "Failed to create graphics command pool: {:?}", e);
                    Error::InitializationFailed(format!("Failed to create graphics command pool: {:?}", e))
                })?;
            context.graphics_pool = Some(graphics_pool);

            let transfer_pool_info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(families.transfer)
                .flags(vk::CommandPoolCreateFlags::TRANSIENT | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

            let transfer_pool = device.create_command_pool(&transfer_pool_info, None)
                .map_err(|e| {
                    render_error!("ember::context", "Failed to create transfer command pool: {:?}", e);
                    Error::InitializationFailed(format!("Failed to create transfer command pool: {:?}", e))
                })?;
            context.transfer_pool = Some(transfer_pool);

            render_info!(
                "ember::context",
                "Device context initialized (graphics family {}, transfer family {})",
                families.graphics,
                families.transfer
            );
        }

        Ok(context)
    }

    /// Check a physical device for Vulkan 1.3, the swapchain extension,
    /// and dynamic rendering support
    fn device_meets_requirements(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
    ) -> bool {
        unsafe {
            let properties = instance.get_physical_device_properties(physical_device);
            if properties.api_version < vk::API_VERSION_1_3 {
                return false;
            }

            let extensions = match instance.enumerate_device_extension_properties(physical_device) {
                Ok(extensions) => extensions,
                Err(_) => return false,
            };
            let has_swapchain = extensions.iter().any(|extension| {
                CStr::from_ptr(extension.extension_name.as_ptr()) == ash::khr::swapchain::NAME
            });
            if !has_swapchain {
                return false;
            }

            let mut dynamic_rendering = vk::PhysicalDeviceDynamicRenderingFeatures::default();
            let mut features = vk::PhysicalDeviceFeatures2::default().push_next(&mut dynamic_rendering);
            instance.get_physical_device_features2(physical_device, &mut features);
            dynamic_rendering.dynamic_rendering == vk::TRUE
        }
    }

    /// Find graphics, present, and dedicated transfer families
    ///
    /// The transfer family must support TRANSFER without GRAPHICS, so it can
    /// never alias the graphics family. Devices without such a family are
    /// rejected.
    fn find_queue_families(
        instance: &ash::Instance,
        surface_loader: &ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
        physical_device: vk::PhysicalDevice,
    ) -> Option<QueueFamilies> {
        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

        let graphics = queue_families
            .iter()
            .enumerate()
            .find(|(_, family)| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
            .map(|(i, _)| i as u32)?;

        let present = (0..queue_families.len() as u32).find(|&i| {
            unsafe {
                surface_loader.get_physical_device_surface_support(physical_device, i, surface)
            }
            .unwrap_or(false)
        })?;

        let transfer = queue_families
            .iter()
            .enumerate()
            .find(|(_, family)| {
                family.queue_flags.contains(vk::QueueFlags::TRANSFER)
                    && !family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
            })
            .map(|(i, _)| i as u32)?;

        Some(QueueFamilies {
            graphics,
            present,
            transfer,
        })
    }

    // ===== ACCESSORS =====

    /// Logical device
    ///
    /// Errors only when called on a context whose construction never
    /// completed; a context returned by `new` always has one.
    pub(crate) fn device(&self) -> Result<&ash::Device> {
        self.device.as_ref().ok_or_else(|| {
            Error::InitializationFailed("Device context is not initialized".to_string())
        })
    }

    /// GPU memory allocator
    pub(crate) fn allocator(&self) -> Result<&Mutex<Allocator>> {
        self.allocator.as_ref().ok_or_else(|| {
            Error::InitializationFailed("Allocator is not initialized".to_string())
        })
    }

    /// Queue handle for a queue class
    pub(crate) fn queue(&self, queue_class: QueueClass) -> vk::Queue {
        match queue_class {
            QueueClass::Graphics => self.graphics_queue,
            QueueClass::Transfer => self.transfer_queue,
        }
    }

    /// Command pool for a queue class
    fn command_pool(&self, queue_class: QueueClass) -> Result<vk::CommandPool> {
        let pool = match queue_class {
            QueueClass::Graphics => self.graphics_pool,
            QueueClass::Transfer => self.transfer_pool,
        };
        pool.ok_or_else(|| {
            Error::InitializationFailed("Command pool is not initialized".to_string())
        })
    }

    /// Physical device handle
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Graphics queue handle
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Present queue handle
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Dedicated transfer queue handle
    pub fn transfer_queue(&self) -> vk::Queue {
        self.transfer_queue
    }

    /// Graphics queue family index
    pub fn graphics_family(&self) -> u32 {
        self.graphics_family
    }

    /// Present queue family index
    pub fn present_family(&self) -> u32 {
        self.present_family
    }

    /// Dedicated transfer queue family index
    pub fn transfer_family(&self) -> u32 {
        self.transfer_family
    }

    /// Render extent in pixels
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Number of single-time command buffers submitted on a queue class
    pub fn submission_count(&self, queue_class: QueueClass) -> u64 {
        match queue_class {
            QueueClass::Graphics => self.graphics_submissions.load(Ordering::Relaxed),
            QueueClass::Transfer => self.transfer_submissions.load(Ordering::Relaxed),
        }
    }

    fn record_submission(&self, queue_class: QueueClass) {
        let counter = match queue_class {
            QueueClass::Graphics => &self.graphics_submissions,
            QueueClass::Transfer => &self.transfer_submissions,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    // ===== SINGLE-TIME COMMANDS =====

    /// Begin a one-shot command buffer on the given queue class
    ///
    /// The buffer is allocated from that class's pool and begun with
    /// ONE_TIME_SUBMIT. Pass it to `end_single_time_commands` to run it, or
    /// `discard_single_time_commands` to abandon it.
    pub fn begin_single_time_commands(&self, queue_class: QueueClass) -> Result<vk::CommandBuffer> {
        let device = self.device()?;
        let pool = self.command_pool(queue_class)?;

        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        unsafe {
            let command_buffers = device.allocate_command_buffers(&allocate_info)
                .map_err(|e| render_err!("ember::context", "Failed to allocate single-time command buffer: {:?}", e))?;
            let command_buffer = command_buffers[0];

            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

            if let Err(e) = device.begin_command_buffer(command_buffer, &begin_info) {
                device.free_command_buffers(pool, &[command_buffer]);
                return Err(render_err!("ember::context", "Failed to begin single-time command buffer: {:?}", e));
            }

            Ok(command_buffer)
        }
    }

    /// End, submit, and wait out a one-shot command buffer
    ///
    /// Blocks until the queue is idle, then frees the buffer. The buffer is
    /// freed on the error paths too, so callers never hold a stale handle.
    pub fn end_single_time_commands(
        &self,
        queue_class: QueueClass,
        command_buffer: vk::CommandBuffer,
    ) -> Result<()> {
        let device = self.device()?;
        let pool = self.command_pool(queue_class)?;

        let result = self.submit_and_wait(device, queue_class, command_buffer);

        unsafe {
            device.free_command_buffers(pool, &[command_buffer]);
        }

        result
    }

    /// Free a one-shot command buffer without submitting it
    ///
    /// For abandoning a buffer after a recording error.
    pub fn discard_single_time_commands(
        &self,
        queue_class: QueueClass,
        command_buffer: vk::CommandBuffer,
    ) -> Result<()> {
        let device = self.device()?;
        let pool = self.command_pool(queue_class)?;

        unsafe {
            device.free_command_buffers(pool, &[command_buffer]);
        }

        Ok(())
    }

    fn submit_and_wait(
        &self,
        device: &ash::Device,
        queue_class: QueueClass,
        command_buffer: vk::CommandBuffer,
    ) -> Result<()> {
        let queue = self.queue(queue_class);

        unsafe {
            device.end_command_buffer(command_buffer)
                .map_err(|e| render_err!("ember::context", "Failed to end single-time command buffer: {:?}", e))?;

            let command_buffers = [command_buffer];
            let submit_info = vk::SubmitInfo::default()
                .command_buffers(&command_buffers);

            device.queue_submit(queue, &[submit_info], vk::Fence::null())
                .map_err(|e| render_err!("ember::context", "Failed to submit single-time commands: {:?}", e))?;

            // The buffer is on the queue now, count it
            self.record_submission(queue_class);

            device.queue_wait_idle(queue)
                .map_err(|e| render_err!("ember::context", "Failed to wait for single-time commands: {:?}", e))?;
        }

        Ok(())
    }

    /// Block until the device is idle
    pub fn wait_idle(&self) -> Result<()> {
        let device = self.device()?;
        unsafe {
            device.device_wait_idle()
                .map_err(|e| render_err!("ember::context", "Failed to wait for device idle: {:?}", e))
        }
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            // Wait for device to finish
            if let Some(device) = &self.device {
                device.device_wait_idle().ok();
            }

            // 1. Destroy command pools while the device is alive
            if let Some(device) = &self.device {
                if let Some(pool) = self.graphics_pool.take() {
                    device.destroy_command_pool(pool, None);
                }
                if let Some(pool) = self.transfer_pool.take() {
                    device.destroy_command_pool(pool, None);
                }
            }

            // 2. Drop allocator: free VkDeviceMemory pages BEFORE destroying device
            drop(self.allocator.take());

            // 3. Destroy device
            if let Some(device) = self.device.take() {
                device.destroy_device(None);
            }

            // 4. Destroy surface (instance-level, outlives the device)
            if let (Some(surface_loader), Some(surface)) =
                (&self.surface_loader, self.surface.take())
            {
                surface_loader.destroy_surface(surface, None);
            }

            // 5. Cleanup debug config to prevent callbacks during destruction
            debug::cleanup_debug_config();

            // 6. Destroy debug messenger BEFORE instance
            if let (Some(debug_utils), Some(messenger)) =
                (&self.debug_utils_loader, self.debug_messenger.take())
            {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            // 7. Destroy instance
            if let Some(instance) = self.instance.take() {
                instance.destroy_instance(None);
            }
        }
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;
