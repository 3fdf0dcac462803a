// Graphics context - Core GPU interface
//
// Responsibilities:
// - Instance creation with validation layers (debug builds only)
// - Presentation surface for the window
// - Physical device selection (first suitable GPU)
// - Logical device + graphics/present queues
// - Command pool, one-time command submission
// - Descriptor set layouts and pool
//
// Every Vulkan object lives in a small owner whose Drop destroys it. The
// owners nest inside GraphicsContext so that field order alone gives the
// teardown order: descriptor layouts, descriptor pool, command pool,
// logical device, surface, instance.

use anyhow::{ensure, Context, Result};
use ash::extensions::{ext::DebugUtils, khr};
use ash::{vk, Entry};
use parking_lot::Mutex;
use std::ffi::{c_char, CStr, CString};

use super::descriptor::{self, DescriptorBudget};
use super::queue::{QueueFamilies, QueueFamilyIndices, SwapchainSupportDetails};
use crate::error::{ContextError, DescriptorError, SuitabilityError};
use crate::window::WindowSurface;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

fn device_extensions() -> [&'static CStr; 1] {
    [khr::Swapchain::name()]
}

/// Long-lived GPU state shared by every other component.
pub struct GraphicsContext {
    // Declaration order is teardown order
    scope: DeviceScope,
    surface: Surface,
    instance: Instance,

    pub physical_device: vk::PhysicalDevice,
    pub queue_families: QueueFamilies,
    pub graphics_queue: vk::Queue,
    /// May alias `graphics_queue`.
    pub present_queue: vk::Queue,

    // Device properties (cached)
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,

    descriptor_budget: Mutex<DescriptorBudget>,
}

impl GraphicsContext {
    /// Create the instance, surface, logical device and command pool.
    ///
    /// # Arguments
    /// * `window` - Window the surface is bound to; must outlive the context
    /// * `app_name` - Application name for debugging
    /// * `enable_validation` - Enable Vulkan validation layers
    pub fn new(window: &dyn WindowSurface, app_name: &str, enable_validation: bool) -> Result<Self> {
        log::info!("Creating graphics context: {}", app_name);

        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        if enable_validation {
            check_validation_layers(&entry)?;
        }

        let instance = Instance::new(entry, window, app_name, enable_validation)?;
        let surface = Surface::new(&instance, window)?;
        let (physical_device, queue_families) = pick_physical_device(&instance.raw, &surface)?;
        let device = LogicalDevice::new(
            &instance.raw,
            physical_device,
            queue_families,
            enable_validation,
        )?;

        let (graphics_queue, present_queue) = unsafe {
            (
                device.raw.get_device_queue(queue_families.graphics, 0),
                device.raw.get_device_queue(queue_families.present, 0),
            )
        };

        let command_pool = CommandPool::new(&device.raw, queue_families.graphics)?;

        let properties = unsafe { instance.raw.get_physical_device_properties(physical_device) };
        let memory_properties = unsafe {
            instance
                .raw
                .get_physical_device_memory_properties(physical_device)
        };

        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        log::info!(
            "Queue families: graphics={}, present={}",
            queue_families.graphics,
            queue_families.present
        );

        Ok(Self {
            scope: DeviceScope {
                descriptors: DescriptorObjects::empty(device.raw.clone()),
                command_pool,
                device,
            },
            surface,
            instance,
            physical_device,
            queue_families,
            graphics_queue,
            present_queue,
            properties,
            memory_properties,
            descriptor_budget: Mutex::new(DescriptorBudget::default()),
        })
    }

    pub fn device(&self) -> &ash::Device {
        &self.scope.device.raw
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance.raw
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface.raw
    }

    pub fn command_pool(&self) -> vk::CommandPool {
        self.scope.command_pool.raw
    }

    pub fn descriptor_pool(&self) -> vk::DescriptorPool {
        self.scope.descriptors.pool
    }

    /// One layout per frame slot. Empty until `create_descriptor_layouts`.
    pub fn descriptor_set_layouts(&self) -> &[vk::DescriptorSetLayout] {
        &self.scope.descriptors.layouts
    }

    /// Re-query what the surface supports, e.g. before a swapchain rebuild.
    pub fn swapchain_support(&self) -> Result<SwapchainSupportDetails> {
        SwapchainSupportDetails::query(&self.surface.loader, self.physical_device, self.surface.raw)
    }

    /// First memory type allowed by `filter` that has all of `properties`.
    pub fn find_memory_type(&self, filter: u32, properties: vk::MemoryPropertyFlags) -> Result<u32> {
        find_memory_type_index(&self.memory_properties, filter, properties)
            .ok_or_else(|| ContextError::NoMemoryType { filter, properties }.into())
    }

    /// Allocate and begin a transient command buffer for a setup-time transfer.
    pub fn begin_single_time_commands(&self) -> Result<SingleTimeCommands<'_>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool())
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let command_buffer = unsafe { self.device().allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate one-time command buffer")?[0];

        // From here on the guard frees the buffer on every exit path
        let commands = SingleTimeCommands {
            context: self,
            command_buffer,
        };

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device().begin_command_buffer(command_buffer, &begin_info) }
            .context("Failed to begin one-time command buffer")?;

        Ok(commands)
    }

    /// Submit the commands and block until the graphics queue is idle.
    pub fn end_single_time_commands(&self, commands: SingleTimeCommands<'_>) -> Result<()> {
        let command_buffers = [commands.command_buffer];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);

        unsafe {
            self.device()
                .end_command_buffer(commands.command_buffer)
                .context("Failed to end one-time command buffer")?;
            self.device()
                .queue_submit(self.graphics_queue, &[submit_info.build()], vk::Fence::null())
                .context("Failed to submit one-time command buffer")?;
            self.device()
                .queue_wait_idle(self.graphics_queue)
                .context("Failed to wait for one-time command buffer")?;
        }

        Ok(())
    }

    /// Record with `record` and run the commands to completion.
    pub fn submit_single_time<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let commands = self.begin_single_time_commands()?;
        record(self.device(), commands.command_buffer);
        self.end_single_time_commands(commands)
    }

    /// Build one descriptor set layout per frame slot: NUM_UNIFORMS uniform
    /// buffers (vertex stage) followed by NUM_SAMPLERS combined image
    /// samplers (fragment stage).
    pub fn create_descriptor_layouts(&mut self) -> Result<()> {
        ensure!(
            self.scope.descriptors.layouts.is_empty(),
            "Descriptor set layouts already created"
        );

        let bindings = descriptor::layout_bindings();
        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);

        for _ in 0..super::MAX_FRAMES_IN_FLIGHT {
            let layout = unsafe { self.device().create_descriptor_set_layout(&create_info, None) }
                .context("Failed to create descriptor set layout")?;
            self.scope.descriptors.layouts.push(layout);
        }

        Ok(())
    }

    /// Size the descriptor pool for `capacity` simultaneously bound drawables.
    pub fn create_descriptor_pool(&mut self, capacity: u32) -> Result<()> {
        ensure!(capacity > 0, "Descriptor pool capacity must be at least 1");
        ensure!(
            self.scope.descriptors.pool == vk::DescriptorPool::null(),
            "Descriptor pool already created"
        );

        let pool_sizes = descriptor::pool_sizes(capacity);
        let create_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(descriptor::max_sets(capacity))
            .pool_sizes(&pool_sizes);

        self.scope.descriptors.pool =
            unsafe { self.device().create_descriptor_pool(&create_info, None) }
                .context("Failed to create descriptor pool")?;
        *self.descriptor_budget.lock() = DescriptorBudget::new(capacity);

        log::info!("Descriptor pool sized for {} drawable objects", capacity);
        Ok(())
    }

    /// Claim one drawable's worth of descriptor sets from the pool.
    pub fn reserve_descriptor_object(&self) -> Result<(), DescriptorError> {
        if self.descriptor_pool() == vk::DescriptorPool::null() {
            return Err(DescriptorError::PoolNotCreated);
        }
        self.descriptor_budget.lock().reserve()
    }

    pub fn release_descriptor_object(&self) {
        self.descriptor_budget.lock().release();
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device().device_wait_idle() }.context("Failed to wait for device idle")
    }
}

impl Drop for GraphicsContext {
    fn drop(&mut self) {
        log::info!("Destroying graphics context...");

        // Wait for device to finish; the owners then drop in field order
        if let Err(e) = self.wait_idle() {
            log::error!("{:?}", e);
        }
    }
}

/// Transient command buffer, freed when dropped.
pub struct SingleTimeCommands<'a> {
    context: &'a GraphicsContext,
    command_buffer: vk::CommandBuffer,
}

impl SingleTimeCommands<'_> {
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }
}

impl Drop for SingleTimeCommands<'_> {
    fn drop(&mut self) {
        unsafe {
            self.context
                .device()
                .free_command_buffers(self.context.command_pool(), &[self.command_buffer]);
        }
    }
}

pub fn find_memory_type_index(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..memory_properties.memory_type_count).find(|&i| {
        let allowed = filter & (1 << i) != 0;
        allowed
            && memory_properties.memory_types[i as usize]
                .property_flags
                .contains(properties)
    })
}

// =============================================================================
// OWNERS
// =============================================================================

/// Objects created from the logical device, dropped before it.
struct DeviceScope {
    descriptors: DescriptorObjects,
    command_pool: CommandPool,
    device: LogicalDevice,
}

struct DescriptorObjects {
    device: ash::Device,
    layouts: Vec<vk::DescriptorSetLayout>,
    pool: vk::DescriptorPool,
}

impl DescriptorObjects {
    fn empty(device: ash::Device) -> Self {
        Self {
            device,
            layouts: Vec::new(),
            pool: vk::DescriptorPool::null(),
        }
    }
}

impl Drop for DescriptorObjects {
    fn drop(&mut self) {
        unsafe {
            for layout in self.layouts.drain(..) {
                self.device.destroy_descriptor_set_layout(layout, None);
            }
            if self.pool != vk::DescriptorPool::null() {
                self.device.destroy_descriptor_pool(self.pool, None);
            }
        }
    }
}

struct CommandPool {
    device: ash::Device,
    raw: vk::CommandPool,
}

impl CommandPool {
    fn new(device: &ash::Device, graphics_family: u32) -> Result<Self> {
        // RESET: individual command buffers are reset and re-recorded each frame
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(graphics_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let raw = unsafe { device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")?;

        Ok(Self {
            device: device.clone(),
            raw,
        })
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        if self.raw != vk::CommandPool::null() {
            unsafe { self.device.destroy_command_pool(self.raw, None) };
        }
    }
}

struct LogicalDevice {
    raw: ash::Device,
}

impl LogicalDevice {
    fn new(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        families: QueueFamilies,
        enable_validation: bool,
    ) -> Result<Self> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let features = vk::PhysicalDeviceFeatures {
            sampler_anisotropy: vk::TRUE,
            ..Default::default()
        };

        let extensions: Vec<*const c_char> =
            device_extensions().iter().map(|ext| ext.as_ptr()).collect();
        let layer_names = if enable_validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names)
            .enabled_features(&features);

        let raw = unsafe { instance.create_device(physical_device, &create_info, None) }
            .context("Failed to create logical device")?;

        Ok(Self { raw })
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        if self.raw.handle() != vk::Device::null() {
            unsafe { self.raw.destroy_device(None) };
        }
    }
}

struct Surface {
    loader: khr::Surface,
    raw: vk::SurfaceKHR,
}

impl Surface {
    fn new(instance: &Instance, window: &dyn WindowSurface) -> Result<Self> {
        let loader = khr::Surface::new(&instance.entry, &instance.raw);
        let raw = unsafe {
            ash_window::create_surface(
                &instance.entry,
                &instance.raw,
                window.raw_display(),
                window.raw_window(),
                None,
            )
        }
        .context("Failed to create window surface")?;

        Ok(Self { loader, raw })
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        if self.raw != vk::SurfaceKHR::null() {
            unsafe { self.loader.destroy_surface(self.raw, None) };
        }
    }
}

struct Instance {
    raw: ash::Instance,
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    // Keeps the Vulkan library loaded; dropped after the instance is destroyed
    entry: Entry,
}

impl Instance {
    fn new(
        entry: Entry,
        window: &dyn WindowSurface,
        app_name: &str,
        enable_validation: bool,
    ) -> Result<Self> {
        let app_name_cstr = CString::new(app_name)?;
        let engine_name = CString::new("Vulkan Engine")?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        // Window-system surface extensions for this platform
        let mut extensions = ash_window::enumerate_required_extensions(window.raw_display())
            .context("Window system does not support Vulkan surfaces")?
            .to_vec();
        if enable_validation {
            extensions.push(DebugUtils::name().as_ptr());
        }

        let layer_names = if enable_validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let raw = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        let mut instance = Self {
            raw,
            debug_utils: None,
            entry,
        };
        if enable_validation {
            instance.debug_utils = Some(setup_debug_messenger(&instance.entry, &instance.raw)?);
        }

        Ok(instance)
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.raw.destroy_instance(None);
        }
    }
}

// =============================================================================
// SELECTION
// =============================================================================

/// Fail fast when a requested layer is not installed.
fn check_validation_layers(entry: &Entry) -> Result<()> {
    let available = unsafe { entry.enumerate_instance_layer_properties() }
        .context("Failed to enumerate instance layers")?;

    let found = available
        .iter()
        .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER);

    if !found {
        return Err(ContextError::MissingLayer(VALIDATION_LAYER.to_string_lossy().into_owned()).into());
    }
    Ok(())
}

fn pick_physical_device(
    instance: &ash::Instance,
    surface: &Surface,
) -> Result<(vk::PhysicalDevice, QueueFamilies)> {
    let devices = unsafe { instance.enumerate_physical_devices() }
        .context("Failed to enumerate physical devices")?;

    if devices.is_empty() {
        return Err(ContextError::NoDevices.into());
    }

    for &physical_device in &devices {
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy();

        match check_physical_device(instance, surface, physical_device)? {
            Ok(families) => {
                log::info!("Selected GPU: {}", name);
                return Ok((physical_device, families));
            }
            Err(reason) => log::warn!("Skipping GPU `{}`: {}", name, reason),
        }
    }

    Err(ContextError::NoSuitableDevice {
        rejected: devices.len(),
    }
    .into())
}

/// Outer error: a query failed. Inner error: the device is unsuitable.
fn check_physical_device(
    instance: &ash::Instance,
    surface: &Surface,
    physical_device: vk::PhysicalDevice,
) -> Result<Result<QueueFamilies, SuitabilityError>> {
    let families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
    let indices = QueueFamilyIndices::find(&families, |index| {
        let supported = unsafe {
            surface
                .loader
                .get_physical_device_surface_support(physical_device, index, surface.raw)
        };
        supported.context("Failed to query present support")
    })?;

    let Some(families) = indices.complete() else {
        let reason = if indices.graphics.is_none() {
            SuitabilityError::NoGraphicsQueue
        } else {
            SuitabilityError::NoPresentQueue
        };
        return Ok(Err(reason));
    };

    if let Some(missing) = missing_device_extension(instance, physical_device)? {
        return Ok(Err(SuitabilityError::MissingExtension(missing)));
    }

    let support = SwapchainSupportDetails::query(&surface.loader, physical_device, surface.raw)?;
    if !support.is_adequate() {
        return Ok(Err(SuitabilityError::InadequateSwapchain));
    }

    let features = unsafe { instance.get_physical_device_features(physical_device) };
    if features.sampler_anisotropy != vk::TRUE {
        return Ok(Err(SuitabilityError::NoAnisotropy));
    }

    Ok(Ok(families))
}

fn missing_device_extension(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<Option<String>> {
    let available = unsafe { instance.enumerate_device_extension_properties(physical_device) }
        .context("Failed to enumerate device extensions")?;

    let missing = device_extensions().into_iter().find(|required| {
        !available
            .iter()
            .any(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) } == *required)
    });

    Ok(missing.map(|ext| ext.to_string_lossy().into_owned()))
}

// =============================================================================
// VALIDATION
// =============================================================================

fn setup_debug_messenger(
    entry: &Entry,
    instance: &ash::Instance,
) -> Result<(DebugUtils, vk::DebugUtilsMessengerEXT)> {
    let debug_utils = DebugUtils::new(entry, instance);

    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));

    let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
        .context("Failed to create debug messenger")?;

    Ok((debug_utils, messenger))
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}

#[cfg(test)]
impl GraphicsContext {
    /// Context over the fake loader in `backend::testing`, with a single
    /// memory type that is device-local and host-visible.
    pub(crate) fn fake(surface: vk::SurfaceKHR) -> Self {
        use super::testing;
        use ash::vk::Handle;

        let loaders = testing::loaders(vk::Device::from_raw(testing::DEVICE));
        let device = loaders.device;

        let mut memory_properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 1,
            ..Default::default()
        };
        memory_properties.memory_types[0].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL
            | vk::MemoryPropertyFlags::HOST_VISIBLE
            | vk::MemoryPropertyFlags::HOST_COHERENT;

        Self {
            scope: DeviceScope {
                descriptors: DescriptorObjects::empty(device.clone()),
                command_pool: CommandPool {
                    device: device.clone(),
                    raw: vk::CommandPool::from_raw(0x40),
                },
                device: LogicalDevice { raw: device },
            },
            surface: Surface {
                loader: loaders.surface,
                raw: surface,
            },
            instance: Instance {
                raw: loaders.instance,
                debug_utils: None,
                entry: loaders.entry,
            },
            physical_device: vk::PhysicalDevice::from_raw(0x50),
            queue_families: QueueFamilies {
                graphics: 0,
                present: 0,
            },
            graphics_queue: vk::Queue::null(),
            present_queue: vk::Queue::null(),
            properties: vk::PhysicalDeviceProperties::default(),
            memory_properties,
            descriptor_budget: Mutex::new(DescriptorBudget::default()),
        }
    }
}
