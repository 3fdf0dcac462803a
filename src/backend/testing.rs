// Fake Vulkan loader for unit tests
//
// Entry points resolve to extern "system" functions that log each call in a
// thread-local list and hand out fresh handles. Surface queries answer from
// a per-thread SurfaceState that tests can change between calls.

use ash::extensions::khr;
use ash::vk::{self, Handle};
use ash::Entry;
use std::cell::{Cell, RefCell};
use std::ffi::{c_char, c_void, CStr};

pub const INSTANCE: u64 = 0x10;
pub const DEVICE: u64 = 0x20;
pub const SURFACE: u64 = 0x30;

#[derive(Debug, Clone)]
pub struct SurfaceState {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl Default for SurfaceState {
    fn default() -> Self {
        Self {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 3,
                // The window decides the size
                current_extent: vk::Extent2D {
                    width: u32::MAX,
                    height: u32::MAX,
                },
                min_image_extent: vk::Extent2D { width: 1, height: 1 },
                max_image_extent: vk::Extent2D {
                    width: 4096,
                    height: 4096,
                },
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                ..Default::default()
            },
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        }
    }
}

thread_local! {
    static CALLS: RefCell<Vec<&'static str>> = const { RefCell::new(Vec::new()) };
    static NEXT_HANDLE: Cell<u64> = const { Cell::new(0x1000) };
    static SURFACE_STATE: RefCell<SurfaceState> = RefCell::new(SurfaceState::default());
    static CHAIN_IMAGES: Cell<u32> = const { Cell::new(0) };
    static SET_LAYOUT_COUNT: Cell<u32> = const { Cell::new(0) };
}

/// Forget every recorded call and restore the default surface.
pub fn reset() {
    take_calls();
    SURFACE_STATE.with(|state| *state.borrow_mut() = SurfaceState::default());
}

pub fn take_calls() -> Vec<&'static str> {
    CALLS.with(|calls| calls.borrow_mut().drain(..).collect())
}

/// Destroy calls since the last take, in order.
pub fn take_destroyed() -> Vec<&'static str> {
    take_calls()
        .into_iter()
        .filter(|call| call.starts_with("destroy_") || *call == "free_memory")
        .collect()
}

pub fn count(call: &str) -> usize {
    CALLS.with(|calls| calls.borrow().iter().filter(|c| **c == call).count())
}

/// Objects of `kind` created and not yet destroyed, since the last take.
pub fn live(kind: &str) -> isize {
    let created = count(&format!("create_{}", kind)) as isize;
    let destroyed = count(&format!("destroy_{}", kind)) as isize;
    created - destroyed
}

pub fn set_surface(update: impl FnOnce(&mut SurfaceState)) {
    SURFACE_STATE.with(|state| update(&mut state.borrow_mut()));
}

/// Set layouts passed to the most recent pipeline layout creation.
pub fn last_set_layout_count() -> u32 {
    SET_LAYOUT_COUNT.with(Cell::get)
}

fn note(call: &'static str) {
    CALLS.with(|calls| calls.borrow_mut().push(call));
}

fn next_handle() -> u64 {
    NEXT_HANDLE.with(|next| {
        let handle = next.get();
        next.set(handle + 1);
        handle
    })
}

/// Answers a two-call enumeration from `items`.
unsafe fn enumerate<T: Copy>(items: &[T], count: *mut u32, out: *mut T) -> vk::Result {
    if out.is_null() {
        *count = items.len() as u32;
        return vk::Result::SUCCESS;
    }
    let written = (*count as usize).min(items.len());
    std::ptr::copy_nonoverlapping(items.as_ptr(), out, written);
    *count = written as u32;
    vk::Result::SUCCESS
}

macro_rules! fake_create {
    ($name:ident, $info:ty, $handle:ty, $call:literal) => {
        unsafe extern "system" fn $name(
            _: vk::Device,
            _: *const $info,
            _: *const vk::AllocationCallbacks,
            out: *mut $handle,
        ) -> vk::Result {
            note($call);
            *out = <$handle>::from_raw(next_handle());
            vk::Result::SUCCESS
        }
    };
}

macro_rules! fake_destroy {
    ($name:ident, $handle:ty, $call:literal) => {
        unsafe extern "system" fn $name(_: vk::Device, _: $handle, _: *const vk::AllocationCallbacks) {
            note($call);
        }
    };
}

fake_create!(create_semaphore, vk::SemaphoreCreateInfo, vk::Semaphore, "create_semaphore");
fake_create!(create_fence, vk::FenceCreateInfo, vk::Fence, "create_fence");
fake_create!(create_render_pass, vk::RenderPassCreateInfo, vk::RenderPass, "create_render_pass");
fake_create!(create_image, vk::ImageCreateInfo, vk::Image, "create_image");
fake_create!(create_image_view, vk::ImageViewCreateInfo, vk::ImageView, "create_image_view");
fake_create!(create_framebuffer, vk::FramebufferCreateInfo, vk::Framebuffer, "create_framebuffer");
fake_create!(allocate_memory, vk::MemoryAllocateInfo, vk::DeviceMemory, "allocate_memory");
fake_create!(
    create_descriptor_set_layout,
    vk::DescriptorSetLayoutCreateInfo,
    vk::DescriptorSetLayout,
    "create_descriptor_set_layout"
);
fake_create!(
    create_descriptor_pool,
    vk::DescriptorPoolCreateInfo,
    vk::DescriptorPool,
    "create_descriptor_pool"
);

fake_destroy!(destroy_semaphore, vk::Semaphore, "destroy_semaphore");
fake_destroy!(destroy_fence, vk::Fence, "destroy_fence");
fake_destroy!(destroy_render_pass, vk::RenderPass, "destroy_render_pass");
fake_destroy!(destroy_image, vk::Image, "destroy_image");
fake_destroy!(destroy_image_view, vk::ImageView, "destroy_image_view");
fake_destroy!(destroy_framebuffer, vk::Framebuffer, "destroy_framebuffer");
fake_destroy!(free_memory, vk::DeviceMemory, "free_memory");
fake_destroy!(destroy_swapchain, vk::SwapchainKHR, "destroy_swapchain");
fake_destroy!(destroy_pipeline_layout, vk::PipelineLayout, "destroy_pipeline_layout");
fake_destroy!(
    destroy_descriptor_set_layout,
    vk::DescriptorSetLayout,
    "destroy_descriptor_set_layout"
);
fake_destroy!(destroy_descriptor_pool, vk::DescriptorPool, "destroy_descriptor_pool");
fake_destroy!(destroy_command_pool, vk::CommandPool, "destroy_command_pool");

unsafe extern "system" fn create_pipeline_layout(
    _: vk::Device,
    info: *const vk::PipelineLayoutCreateInfo,
    _: *const vk::AllocationCallbacks,
    out: *mut vk::PipelineLayout,
) -> vk::Result {
    note("create_pipeline_layout");
    SET_LAYOUT_COUNT.with(|count| count.set((*info).set_layout_count));
    *out = vk::PipelineLayout::from_raw(next_handle());
    vk::Result::SUCCESS
}

unsafe extern "system" fn create_swapchain(
    _: vk::Device,
    info: *const vk::SwapchainCreateInfoKHR,
    _: *const vk::AllocationCallbacks,
    out: *mut vk::SwapchainKHR,
) -> vk::Result {
    note("create_swapchain");
    CHAIN_IMAGES.with(|images| images.set((*info).min_image_count));
    *out = vk::SwapchainKHR::from_raw(next_handle());
    vk::Result::SUCCESS
}

unsafe extern "system" fn get_swapchain_images(
    _: vk::Device,
    _: vk::SwapchainKHR,
    count: *mut u32,
    out: *mut vk::Image,
) -> vk::Result {
    // Chain images belong to the swapchain, never to the caller
    let images: Vec<vk::Image> = (0..CHAIN_IMAGES.with(Cell::get))
        .map(|i| vk::Image::from_raw(0x100 + i as u64))
        .collect();
    enumerate(&images, count, out)
}

unsafe extern "system" fn get_image_memory_requirements(
    _: vk::Device,
    _: vk::Image,
    out: *mut vk::MemoryRequirements,
) {
    *out = vk::MemoryRequirements {
        size: 1024,
        alignment: 256,
        memory_type_bits: 0b1,
    };
}

unsafe extern "system" fn bind_image_memory(
    _: vk::Device,
    _: vk::Image,
    _: vk::DeviceMemory,
    _: vk::DeviceSize,
) -> vk::Result {
    vk::Result::SUCCESS
}

unsafe extern "system" fn device_wait_idle(_: vk::Device) -> vk::Result {
    note("device_wait_idle");
    vk::Result::SUCCESS
}

unsafe extern "system" fn destroy_device(_: vk::Device, _: *const vk::AllocationCallbacks) {
    note("destroy_device");
}

unsafe extern "system" fn destroy_instance(_: vk::Instance, _: *const vk::AllocationCallbacks) {
    note("destroy_instance");
}

unsafe extern "system" fn destroy_surface(
    _: vk::Instance,
    _: vk::SurfaceKHR,
    _: *const vk::AllocationCallbacks,
) {
    note("destroy_surface");
}

unsafe extern "system" fn get_surface_capabilities(
    _: vk::PhysicalDevice,
    _: vk::SurfaceKHR,
    out: *mut vk::SurfaceCapabilitiesKHR,
) -> vk::Result {
    *out = SURFACE_STATE.with(|state| state.borrow().capabilities);
    vk::Result::SUCCESS
}

unsafe extern "system" fn get_surface_formats(
    _: vk::PhysicalDevice,
    _: vk::SurfaceKHR,
    count: *mut u32,
    out: *mut vk::SurfaceFormatKHR,
) -> vk::Result {
    let formats = SURFACE_STATE.with(|state| state.borrow().formats.clone());
    enumerate(&formats, count, out)
}

unsafe extern "system" fn get_surface_present_modes(
    _: vk::PhysicalDevice,
    _: vk::SurfaceKHR,
    count: *mut u32,
    out: *mut vk::PresentModeKHR,
) -> vk::Result {
    let modes = SURFACE_STATE.with(|state| state.borrow().present_modes.clone());
    enumerate(&modes, count, out)
}

fn lookup(name: &[u8]) -> *const c_void {
    match name {
        b"vkGetDeviceProcAddr" => get_device_proc_addr as *const c_void,
        b"vkDestroyInstance" => destroy_instance as *const c_void,
        b"vkDestroySurfaceKHR" => destroy_surface as *const c_void,
        b"vkGetPhysicalDeviceSurfaceCapabilitiesKHR" => get_surface_capabilities as *const c_void,
        b"vkGetPhysicalDeviceSurfaceFormatsKHR" => get_surface_formats as *const c_void,
        b"vkGetPhysicalDeviceSurfacePresentModesKHR" => get_surface_present_modes as *const c_void,
        b"vkDeviceWaitIdle" => device_wait_idle as *const c_void,
        b"vkDestroyDevice" => destroy_device as *const c_void,
        b"vkCreateSemaphore" => create_semaphore as *const c_void,
        b"vkDestroySemaphore" => destroy_semaphore as *const c_void,
        b"vkCreateFence" => create_fence as *const c_void,
        b"vkDestroyFence" => destroy_fence as *const c_void,
        b"vkCreateSwapchainKHR" => create_swapchain as *const c_void,
        b"vkDestroySwapchainKHR" => destroy_swapchain as *const c_void,
        b"vkGetSwapchainImagesKHR" => get_swapchain_images as *const c_void,
        b"vkCreateRenderPass" => create_render_pass as *const c_void,
        b"vkDestroyRenderPass" => destroy_render_pass as *const c_void,
        b"vkCreateImage" => create_image as *const c_void,
        b"vkDestroyImage" => destroy_image as *const c_void,
        b"vkGetImageMemoryRequirements" => get_image_memory_requirements as *const c_void,
        b"vkAllocateMemory" => allocate_memory as *const c_void,
        b"vkFreeMemory" => free_memory as *const c_void,
        b"vkBindImageMemory" => bind_image_memory as *const c_void,
        b"vkCreateImageView" => create_image_view as *const c_void,
        b"vkDestroyImageView" => destroy_image_view as *const c_void,
        b"vkCreateFramebuffer" => create_framebuffer as *const c_void,
        b"vkDestroyFramebuffer" => destroy_framebuffer as *const c_void,
        b"vkCreatePipelineLayout" => create_pipeline_layout as *const c_void,
        b"vkDestroyPipelineLayout" => destroy_pipeline_layout as *const c_void,
        b"vkCreateDescriptorSetLayout" => create_descriptor_set_layout as *const c_void,
        b"vkDestroyDescriptorSetLayout" => destroy_descriptor_set_layout as *const c_void,
        b"vkCreateDescriptorPool" => create_descriptor_pool as *const c_void,
        b"vkDestroyDescriptorPool" => destroy_descriptor_pool as *const c_void,
        b"vkDestroyCommandPool" => destroy_command_pool as *const c_void,
        _ => std::ptr::null(),
    }
}

unsafe fn resolve(name: *const c_char) -> vk::PFN_vkVoidFunction {
    let entry_point = lookup(CStr::from_ptr(name).to_bytes());
    if entry_point.is_null() {
        None
    } else {
        Some(std::mem::transmute::<*const c_void, unsafe extern "system" fn()>(entry_point))
    }
}

unsafe extern "system" fn get_instance_proc_addr(
    _: vk::Instance,
    name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    resolve(name)
}

unsafe extern "system" fn get_device_proc_addr(
    _: vk::Device,
    name: *const c_char,
) -> vk::PFN_vkVoidFunction {
    resolve(name)
}

/// Loaders whose entry points are all served by this module.
pub struct FakeLoaders {
    pub entry: Entry,
    pub instance: ash::Instance,
    pub device: ash::Device,
    pub surface: khr::Surface,
}

pub fn loaders(device: vk::Device) -> FakeLoaders {
    unsafe {
        let entry = Entry::from_static_fn(vk::StaticFn {
            get_instance_proc_addr,
        });
        let instance = ash::Instance::load(entry.static_fn(), vk::Instance::from_raw(INSTANCE));
        let device = ash::Device::load(instance.fp_v1_0(), device);
        let surface = khr::Surface::new(&entry, &instance);
        FakeLoaders {
            entry,
            instance,
            device,
            surface,
        }
    }
}
