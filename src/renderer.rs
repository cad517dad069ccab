// Vulkan renderer - the concrete graphics backend
//
// Owns the whole Vulkan resource stack: device, surface, swapchain,
// per-image pre-recorded command buffers and the frame-sync ring.
//
// FRAME FLOW:
// 1. Write the camera matrix into the uniform buffer
// 2. Acquire swapchain image
// 3. Wait for the frame that last used this sync slot
// 4. Submit the pre-recorded commands for the acquired image
// 5. Present, then advance the frame index
//
// Resize, out-of-date and suboptimal results all funnel into one lazy
// rebuild flag handled at the top of the next frame.

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::MemoryLocation;
use std::sync::Arc;
use winit::window::Window;

use crate::backend::surface;
use crate::backend::swapchain::{AcquireOutcome, SwapchainPreferences};
use crate::backend::sync::FrameSync;
use crate::backend::{Buffer, Swapchain, VulkanDevice};
use crate::camera::Camera;
use crate::config::Config;
use crate::engine::GraphicsBackend;

pub struct VulkanRenderer {
    // Reloadable settings snapshot
    title: String,
    clear_color: [f32; 4],
    preferences: SwapchainPreferences,

    // Window & surface
    window: Arc<Window>,
    surface: vk::SurfaceKHR,
    surface_loader: ash::extensions::khr::Surface,

    // Vulkan core
    device: Arc<VulkanDevice>,
    swapchain: Option<Swapchain>,

    // One pre-recorded command buffer per swapchain image
    command_buffers: Vec<vk::CommandBuffer>,

    // Scene state
    camera: Camera,
    camera_uniform: Buffer,

    // Synchronization
    frame_sync: Vec<FrameSync>,
    current_frame: usize,
    wait_stages: [vk::PipelineStageFlags; 1],

    // Set when the swapchain no longer matches the window
    needs_rebuild: bool,
    is_minimized: bool,
}

impl VulkanRenderer {
    pub fn new(config: &Config, window: Arc<Window>) -> Result<Self> {
        log::info!("Initializing Vulkan renderer...");

        let enable_validation = cfg!(debug_assertions) && config.debug.validation_layers;
        let device = VulkanDevice::new(&config.window.title, enable_validation)?;

        // Surface before swapchain; present support before either
        let surface_loader =
            ash::extensions::khr::Surface::new(&device.entry, &device.instance);
        let surface = surface::create_surface(&device.entry, &device.instance, &window)?;
        device.verify_present_support(&surface_loader, surface)?;

        let size = window.inner_size();
        let camera = Camera::new(size.width.max(1) as f32 / size.height.max(1) as f32);
        let camera_uniform = Buffer::new(
            device.clone(),
            "camera-uniform",
            std::mem::size_of::<glam::Mat4>() as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryLocation::CpuToGpu,
        )?;

        // Sync objects survive swapchain rebuilds
        let frame_sync = FrameSync::create_ring(&device, config.graphics.max_frames_in_flight)?;

        let mut renderer = Self {
            title: config.window.title.clone(),
            clear_color: config.graphics.clear_color,
            preferences: config.swapchain_preferences(),
            window,
            surface,
            surface_loader,
            device,
            swapchain: None,
            command_buffers: Vec::new(),
            camera,
            camera_uniform,
            frame_sync,
            current_frame: 0,
            wait_stages: [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
            needs_rebuild: false,
            is_minimized: false,
        };

        renderer.rebuild_swapchain_resources()?;
        log::info!("Vulkan renderer initialized");
        Ok(renderer)
    }

    /// (Re)create the swapchain, its command buffers and recordings.
    ///
    /// The old swapchain handle is passed into creation so the driver can
    /// reuse its images; the retired object is dropped right after.
    fn rebuild_swapchain_resources(&mut self) -> Result<()> {
        let size = self.window.inner_size();

        // Zero-sized window (minimized): nothing to build
        if size.width == 0 || size.height == 0 {
            self.is_minimized = true;
            return Ok(());
        }
        self.is_minimized = false;

        let old_swapchain = self.swapchain.take();
        let old_handle = old_swapchain
            .as_ref()
            .map(|s| s.swapchain)
            .unwrap_or(vk::SwapchainKHR::null());

        let swapchain = Swapchain::new(
            self.device.clone(),
            self.surface,
            &self.surface_loader,
            size.width,
            size.height,
            self.preferences,
            old_handle,
        )?;

        // Retired handle and views go away only after the replacement exists
        drop(old_swapchain);

        log::debug!(
            "Swapchain ready: {:?} / {:?}, present mode {:?}",
            swapchain.format,
            swapchain.color_space,
            swapchain.present_mode
        );

        self.camera.set_aspect(swapchain.extent.width, swapchain.extent.height);

        // Command buffers: free the old set, allocate one per image
        if !self.command_buffers.is_empty() {
            unsafe {
                self.device
                    .device
                    .free_command_buffers(self.device.command_pool, &self.command_buffers);
            }
        }

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.device.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(swapchain.images.len() as u32);

        let command_buffers = unsafe {
            self.device
                .device
                .allocate_command_buffers(&alloc_info)
                .context("Failed to allocate command buffers")?
        };

        self.record_command_buffers(&swapchain, &command_buffers)?;
        log::info!("Recorded {} command buffers", command_buffers.len());

        self.swapchain = Some(swapchain);
        self.command_buffers = command_buffers;
        self.needs_rebuild = false;

        Ok(())
    }

    /// Pre-record the clear pass for every swapchain image.
    fn record_command_buffers(
        &self,
        swapchain: &Swapchain,
        command_buffers: &[vk::CommandBuffer],
    ) -> Result<()> {
        let device = &self.device.device;
        let clear_color = vk::ClearColorValue {
            float32: self.clear_color,
        };

        let subresource_range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };

        for (i, &cmd) in command_buffers.iter().enumerate() {
            let image = swapchain.images[i];

            unsafe {
                let begin_info = vk::CommandBufferBeginInfo::builder();
                device.begin_command_buffer(cmd, &begin_info)?;

                // UNDEFINED -> TRANSFER_DST so the image can be cleared
                let barrier_to_transfer = vk::ImageMemoryBarrier::builder()
                    .src_access_mask(vk::AccessFlags::empty())
                    .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                    .old_layout(vk::ImageLayout::UNDEFINED)
                    .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(image)
                    .subresource_range(subresource_range)
                    .build();

                device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[barrier_to_transfer],
                );

                device.cmd_clear_color_image(
                    cmd,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &clear_color,
                    &[subresource_range],
                );

                // TRANSFER_DST -> PRESENT_SRC for presentation
                let barrier_to_present = vk::ImageMemoryBarrier::builder()
                    .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                    .dst_access_mask(vk::AccessFlags::empty())
                    .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(image)
                    .subresource_range(subresource_range)
                    .build();

                device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[barrier_to_present],
                );

                device.end_command_buffer(cmd)?;
            }
        }

        Ok(())
    }
}

impl GraphicsBackend for VulkanRenderer {
    fn window_title(&self) -> &str {
        &self.title
    }

    fn render_frame(&mut self) -> Result<bool> {
        if self.is_minimized {
            return Ok(false);
        }

        if self.needs_rebuild {
            self.device.wait_idle()?;
            self.rebuild_swapchain_resources()?;
            if self.is_minimized {
                return Ok(false);
            }
        }

        // Refresh the camera uniform before the frame is submitted
        let view_proj = self.camera.view_projection();
        self.camera_uniform.copy_to(bytemuck::bytes_of(&view_proj))?;
        self.camera_uniform.flush(0, vk::WHOLE_SIZE)?;

        let swapchain = self.swapchain.as_ref().context("Swapchain not created")?;
        let sync = &self.frame_sync[self.current_frame];

        // Acquire first; the GPU can start while we wait on the fence below
        let image_index =
            match swapchain.acquire_next_image(u64::MAX, sync.image_available)? {
                AcquireOutcome::Acquired { index, suboptimal } => {
                    if suboptimal {
                        self.needs_rebuild = true;
                    }
                    index
                }
                AcquireOutcome::OutOfDate => {
                    self.needs_rebuild = true;
                    return Ok(false);
                }
            };

        // Wait for the frame that last used this sync slot
        unsafe {
            self.device
                .device
                .wait_for_fences(&[sync.in_flight_fence], true, u64::MAX)?;
            self.device.device.reset_fences(&[sync.in_flight_fence])?;
        }

        let cmd = self.command_buffers[image_index as usize];
        let wait_semaphores = [sync.image_available];
        let signal_semaphores = [sync.render_finished];
        let command_buffers = [cmd];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&self.wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit_info.build()],
                sync.in_flight_fence,
            )?;
        }

        match swapchain.present(
            self.device.graphics_queue,
            image_index,
            &[sync.render_finished],
        ) {
            Ok(needs_rebuild) => {
                if needs_rebuild {
                    self.needs_rebuild = true;
                }
            }
            Err(e) => {
                log::warn!("Present failed, scheduling swapchain rebuild: {:?}", e);
                self.needs_rebuild = true;
            }
        }

        self.current_frame = (self.current_frame + 1) % self.frame_sync.len();

        Ok(true)
    }

    fn handle_resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            self.is_minimized = true;
        } else {
            self.is_minimized = false;
            self.needs_rebuild = true;
        }
    }

    fn apply_config(&mut self, config: &Config) {
        let new_preferences = config.swapchain_preferences();

        if config.graphics.clear_color != self.clear_color {
            log::info!(
                "Clear color changed to {:?}, re-recording",
                config.graphics.clear_color
            );
            self.clear_color = config.graphics.clear_color;
            self.needs_rebuild = true;
        }

        if new_preferences.vsync != self.preferences.vsync
            || new_preferences.preferred_present_mode != self.preferences.preferred_present_mode
        {
            log::info!("Present preferences changed, scheduling swapchain rebuild");
            self.preferences = new_preferences;
            self.needs_rebuild = true;
        }
    }

    fn shutdown(&mut self) -> Result<()> {
        self.device.wait_idle()
    }
}

impl Drop for VulkanRenderer {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan renderer...");

        let _ = self.device.wait_idle();

        unsafe {
            // Reverse order of creation
            for sync in &self.frame_sync {
                sync.destroy(&self.device.device);
            }

            if !self.command_buffers.is_empty() {
                self.device
                    .device
                    .free_command_buffers(self.device.command_pool, &self.command_buffers);
            }

            // Swapchain must go before the surface it was created against
            self.swapchain = None;

            self.surface_loader.destroy_surface(self.surface, None);
        }

        log::info!("Renderer cleanup complete");
    }
}
