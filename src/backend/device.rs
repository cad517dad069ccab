// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with validation layers
// - Physical device scoring and selection
// - Queue family negotiation (graphics, compute, present)
// - Logical device + queue creation, command pool
// - Memory allocator setup

use anyhow::{Context, Result};
use ash::{vk, Entry};
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;
use std::ffi::{CStr, CString};
use std::sync::Arc;

use super::surface;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Negotiated queue family assignment.
///
/// Graphics and compute may resolve to the same family; presentation is
/// verified against the graphics family once a surface exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub compute: u32,
}

/// Vulkan device wrapper with ordered teardown.
pub struct VulkanDevice {
    // Allocator is taken out before the device is destroyed in Drop
    allocator: Option<Mutex<Allocator>>,
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: ash::Instance,
    pub(crate) entry: Entry,

    // Queue handles
    pub graphics_queue: vk::Queue,
    pub compute_queue: vk::Queue,
    pub queue_families: QueueFamilyIndices,

    // Command pool on the graphics family, reset-command-buffer semantics
    pub command_pool: vk::CommandPool,

    // Debug utils (if validation enabled)
    debug_utils: Option<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,

    // Device properties (cached)
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub enabled_features: vk::PhysicalDeviceFeatures,
}

impl VulkanDevice {
    /// Create the Vulkan device stack: instance, physical device, logical
    /// device, queues, command pool and allocator, in that order.
    pub fn new(app_name: &str, enable_validation: bool) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan device: {}", app_name);

        // Step 1: Load the Vulkan library
        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        // Step 2: Validation layer availability gate
        if enable_validation && !check_validation_layer_support(&entry)? {
            anyhow::bail!("Validation layers requested, but not available");
        }

        // Step 3: Create instance
        let instance = Self::create_instance(&entry, app_name, enable_validation)?;

        // Step 4: Debug messenger routing into the log facade
        let debug_utils = if enable_validation {
            Some(Self::setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        // Step 5: Pick physical device (GPU) by score
        let physical_device = Self::pick_physical_device(&instance)?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let supported_features = unsafe { instance.get_physical_device_features(physical_device) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        log::info!(
            "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        // Step 6: Queue family negotiation
        let queue_family_props =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

        let graphics = find_graphics_family(&queue_family_props)
            .context("No queue family with graphics support")?;
        let compute = find_compute_family(&queue_family_props)
            .context("No queue family with compute support")?;
        let queue_families = QueueFamilyIndices { graphics, compute };

        log::info!(
            "Queue families - graphics: {}, compute: {}{}",
            graphics,
            compute,
            if compute != graphics { " (dedicated)" } else { "" }
        );

        // Step 7: Create logical device with the supported feature subset
        let enabled_features = build_enabled_features(&supported_features);
        let device = Self::create_logical_device(
            &instance,
            physical_device,
            queue_families,
            &enabled_features,
        )?;

        // Step 8: Queue handles
        let graphics_queue = unsafe { device.get_device_queue(graphics, 0) };
        let compute_queue = unsafe { device.get_device_queue(compute, 0) };

        // Step 9: Command pool on the graphics family
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(graphics)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")?;

        // Step 10: Memory allocator
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .context("Failed to create GPU allocator")?;

        Ok(Arc::new(Self {
            allocator: Some(Mutex::new(allocator)),
            device,
            physical_device,
            instance,
            entry,
            graphics_queue,
            compute_queue,
            queue_families,
            command_pool,
            debug_utils,
            properties,
            memory_properties,
            enabled_features,
        }))
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        enable_validation: bool,
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(app_name)?;
        let engine_name = CString::new("Turbine")?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_0);

        // Surface extensions for this platform, plus debug utils if validating
        let mut extensions = surface::instance_extension_names();
        if enable_validation {
            extensions.push(ash::extensions::ext::DebugUtils::name().as_ptr());
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

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        Ok(instance)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::extensions::ext::DebugUtils::new(entry, instance);

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

        let messenger =
            unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }?;

        Ok((debug_utils, messenger))
    }

    fn pick_physical_device(instance: &ash::Instance) -> Result<vk::PhysicalDevice> {
        let devices = unsafe { instance.enumerate_physical_devices() }?;

        if devices.is_empty() {
            anyhow::bail!("No Vulkan-capable GPU found");
        }

        let mut best_device = None;
        let mut best_score = 0;

        for device in devices {
            let props = unsafe { instance.get_physical_device_properties(device) };
            let features = unsafe { instance.get_physical_device_features(device) };

            let score = score_device(&props, &features);
            log::debug!(
                "Candidate GPU {} scored {}",
                unsafe { CStr::from_ptr(props.device_name.as_ptr()) }.to_string_lossy(),
                score
            );

            if score > best_score {
                best_score = score;
                best_device = Some(device);
            }
        }

        best_device.ok_or_else(|| anyhow::anyhow!("No suitable GPU found"))
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queue_families: QueueFamilyIndices,
        enabled_features: &vk::PhysicalDeviceFeatures,
    ) -> Result<ash::Device> {
        let queue_priorities = [1.0];

        // One create info per distinct family; graphics and compute may share
        let mut queue_create_infos = vec![vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(queue_families.graphics)
            .queue_priorities(&queue_priorities)
            .build()];

        if queue_families.compute != queue_families.graphics {
            queue_create_infos.push(
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(queue_families.compute)
                    .queue_priorities(&queue_priorities)
                    .build(),
            );
        }

        // Swapchain is the only mandatory device extension
        let extensions = vec![ash::extensions::khr::Swapchain::name().as_ptr()];

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(enabled_features);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .context("Failed to create logical device")?;

        Ok(device)
    }

    /// Check that the graphics queue family can present to `surface`.
    ///
    /// Separate graphics and presenting queue families are not supported.
    pub fn verify_present_support(
        &self,
        surface_loader: &ash::extensions::khr::Surface,
        surface: vk::SurfaceKHR,
    ) -> Result<()> {
        let supported = unsafe {
            surface_loader.get_physical_device_surface_support(
                self.physical_device,
                self.queue_families.graphics,
                surface,
            )?
        };

        if !supported {
            anyhow::bail!("Graphics queue family cannot present to this surface");
        }
        Ok(())
    }

    /// Allocate device memory through the shared allocator.
    pub fn allocate(&self, desc: &AllocationCreateDesc) -> Result<Allocation> {
        let allocator = self
            .allocator
            .as_ref()
            .context("Allocator already torn down")?;
        let allocation = allocator.lock().allocate(desc)?;
        Ok(allocation)
    }

    /// Return an allocation to the shared allocator.
    pub fn free(&self, allocation: Allocation) -> Result<()> {
        let allocator = self
            .allocator
            .as_ref()
            .context("Allocator already torn down")?;
        allocator.lock().free(allocation)?;
        Ok(())
    }

    /// Wait for device to be idle (e.g., before teardown or recreation)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();

        // Allocator must release its memory blocks while the device is alive
        drop(self.allocator.take());

        unsafe {
            self.device.destroy_command_pool(self.command_pool, None);

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

fn check_validation_layer_support(entry: &Entry) -> Result<bool> {
    let available = entry
        .enumerate_instance_layer_properties()
        .context("Failed to enumerate instance layers")?;

    let found = available.iter().any(|layer| {
        let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
        name == VALIDATION_LAYER
    });

    Ok(found)
}

/// Score a physical device; zero means unusable.
///
/// Discrete GPUs carry a large bonus and the maximum 2D image dimension
/// serves as a capability proxy. Devices missing the geometry shader
/// feature are rejected outright.
pub fn score_device(
    props: &vk::PhysicalDeviceProperties,
    features: &vk::PhysicalDeviceFeatures,
) -> u32 {
    if features.geometry_shader != vk::TRUE {
        return 0;
    }

    let type_bonus = match props.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        _ => 0,
    };

    type_bonus + props.limits.max_image_dimension2_d
}

/// First family with graphics support.
pub fn find_graphics_family(families: &[vk::QueueFamilyProperties]) -> Option<u32> {
    families
        .iter()
        .enumerate()
        .find(|(_, f)| f.queue_count > 0 && f.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|(i, _)| i as u32)
}

/// Compute family, preferring one without graphics (a dedicated queue),
/// falling back to the first family with compute support.
pub fn find_compute_family(families: &[vk::QueueFamilyProperties]) -> Option<u32> {
    let dedicated = families.iter().enumerate().find(|(_, f)| {
        f.queue_count > 0
            && f.queue_flags.contains(vk::QueueFlags::COMPUTE)
            && !f.queue_flags.contains(vk::QueueFlags::GRAPHICS)
    });

    dedicated
        .or_else(|| {
            families
                .iter()
                .enumerate()
                .find(|(_, f)| f.queue_count > 0 && f.queue_flags.contains(vk::QueueFlags::COMPUTE))
        })
        .map(|(i, _)| i as u32)
}

/// Opt in to the feature subset we use, limited to what the device supports.
pub fn build_enabled_features(
    supported: &vk::PhysicalDeviceFeatures,
) -> vk::PhysicalDeviceFeatures {
    vk::PhysicalDeviceFeatures {
        geometry_shader: vk::TRUE,
        sampler_anisotropy: supported.sampler_anisotropy,
        ..Default::default()
    }
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
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    fn props(device_type: vk::PhysicalDeviceType, max_dim: u32) -> vk::PhysicalDeviceProperties {
        let mut props = vk::PhysicalDeviceProperties::default();
        props.device_type = device_type;
        props.limits.max_image_dimension2_d = max_dim;
        props
    }

    fn features(geometry_shader: bool) -> vk::PhysicalDeviceFeatures {
        vk::PhysicalDeviceFeatures {
            geometry_shader: if geometry_shader { vk::TRUE } else { vk::FALSE },
            ..Default::default()
        }
    }

    #[test]
    fn scoring_combines_type_bonus_and_image_dimension() {
        let discrete = score_device(
            &props(vk::PhysicalDeviceType::DISCRETE_GPU, 4096),
            &features(true),
        );
        let integrated = score_device(
            &props(vk::PhysicalDeviceType::INTEGRATED_GPU, 4096),
            &features(true),
        );
        assert_eq!(discrete, 1000 + 4096);
        assert_eq!(integrated, 100 + 4096);
        assert!(discrete > integrated);
    }

    #[test]
    fn missing_geometry_shader_scores_zero() {
        let score = score_device(
            &props(vk::PhysicalDeviceType::DISCRETE_GPU, 16384),
            &features(false),
        );
        assert_eq!(score, 0);
    }

    #[test]
    fn graphics_family_is_first_with_graphics_bit() {
        let families = [
            family(vk::QueueFlags::TRANSFER, 1),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 4),
            family(vk::QueueFlags::GRAPHICS, 1),
        ];
        assert_eq!(find_graphics_family(&families), Some(1));
    }

    #[test]
    fn graphics_family_ignores_empty_families() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, 0),
            family(vk::QueueFlags::GRAPHICS, 1),
        ];
        assert_eq!(find_graphics_family(&families), Some(1));
    }

    #[test]
    fn compute_prefers_dedicated_family() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 4),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, 2),
        ];
        assert_eq!(find_compute_family(&families), Some(1));
    }

    #[test]
    fn compute_falls_back_to_shared_family() {
        let families = [
            family(vk::QueueFlags::TRANSFER, 1),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 4),
        ];
        assert_eq!(find_compute_family(&families), Some(1));
    }

    #[test]
    fn no_compute_family_at_all() {
        let families = [family(vk::QueueFlags::TRANSFER, 1)];
        assert_eq!(find_compute_family(&families), None);
    }

    #[test]
    fn enabled_features_follow_device_support() {
        let with_anisotropy = vk::PhysicalDeviceFeatures {
            sampler_anisotropy: vk::TRUE,
            geometry_shader: vk::TRUE,
            ..Default::default()
        };
        let enabled = build_enabled_features(&with_anisotropy);
        assert_eq!(enabled.sampler_anisotropy, vk::TRUE);
        assert_eq!(enabled.geometry_shader, vk::TRUE);

        let without = vk::PhysicalDeviceFeatures {
            geometry_shader: vk::TRUE,
            ..Default::default()
        };
        let enabled = build_enabled_features(&without);
        assert_eq!(enabled.sampler_anisotropy, vk::FALSE);
    }
}
