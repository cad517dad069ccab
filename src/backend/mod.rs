// Backend module - Vulkan abstraction layer
//
// Thin wrapper around ash: device setup, surface plumbing, swapchain
// lifecycle, buffers and frame synchronization.

pub mod buffer;
pub mod device;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use buffer::Buffer;
pub use device::VulkanDevice;
pub use swapchain::Swapchain;
