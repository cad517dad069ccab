// Platform window surface creation
//
// Maps a winit window's raw display/window handle pair onto the matching
// VK_KHR_*_surface extension: Win32 on Windows, Xlib/XCB for desktop X11 and
// Wayland for the native display protocol on Linux. The handle pair is
// matched as a unit - a mismatched pair is an error, not a fallback.

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use winit::window::Window;

/// Instance extensions required to create surfaces on this platform.
///
/// Must stay in sync with the branches in [`create_surface`]; the instance
/// is created before any window handle is inspected.
pub fn instance_extension_names() -> Vec<*const std::os::raw::c_char> {
    let mut names = vec![ash::extensions::khr::Surface::name().as_ptr()];

    #[cfg(target_os = "windows")]
    names.push(ash::extensions::khr::Win32Surface::name().as_ptr());

    #[cfg(target_os = "linux")]
    {
        names.push(ash::extensions::khr::XlibSurface::name().as_ptr());
        names.push(ash::extensions::khr::XcbSurface::name().as_ptr());
        names.push(ash::extensions::khr::WaylandSurface::name().as_ptr());
    }

    names
}

/// Create a presentation surface for `window`.
pub fn create_surface(
    entry: &ash::Entry,
    instance: &ash::Instance,
    window: &Window,
) -> Result<vk::SurfaceKHR> {
    let window_handle = window
        .window_handle()
        .context("Failed to get window handle")?
        .as_raw();
    let display_handle = window
        .display_handle()
        .context("Failed to get display handle")?
        .as_raw();

    match (display_handle, window_handle) {
        #[cfg(target_os = "windows")]
        (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(handle)) => {
            let hinstance =
                handle.hinstance.map(|h| h.get()).unwrap_or(0) as *const std::ffi::c_void;
            let hwnd = handle.hwnd.get() as *const std::ffi::c_void;
            let create_info = vk::Win32SurfaceCreateInfoKHR::builder()
                .hinstance(hinstance)
                .hwnd(hwnd);
            let loader = ash::extensions::khr::Win32Surface::new(entry, instance);
            let surface = unsafe { loader.create_win32_surface(&create_info, None) }
                .context("Failed to create Win32 surface")?;
            Ok(surface)
        }

        #[cfg(target_os = "linux")]
        (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(handle)) => {
            let dpy = display
                .display
                .map(|d| d.as_ptr())
                .unwrap_or(std::ptr::null_mut());
            let create_info = vk::XlibSurfaceCreateInfoKHR::builder()
                .dpy(dpy as *mut vk::Display)
                .window(handle.window);
            let loader = ash::extensions::khr::XlibSurface::new(entry, instance);
            let surface = unsafe { loader.create_xlib_surface(&create_info, None) }
                .context("Failed to create Xlib surface")?;
            Ok(surface)
        }

        #[cfg(target_os = "linux")]
        (RawDisplayHandle::Xcb(display), RawWindowHandle::Xcb(handle)) => {
            let connection = display
                .connection
                .map(|c| c.as_ptr())
                .unwrap_or(std::ptr::null_mut());
            let create_info = vk::XcbSurfaceCreateInfoKHR::builder()
                .connection(connection)
                .window(handle.window.get());
            let loader = ash::extensions::khr::XcbSurface::new(entry, instance);
            let surface = unsafe { loader.create_xcb_surface(&create_info, None) }
                .context("Failed to create XCB surface")?;
            Ok(surface)
        }

        #[cfg(target_os = "linux")]
        (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(handle)) => {
            let create_info = vk::WaylandSurfaceCreateInfoKHR::builder()
                .display(display.display.as_ptr())
                .surface(handle.surface.as_ptr());
            let loader = ash::extensions::khr::WaylandSurface::new(entry, instance);
            let surface = unsafe { loader.create_wayland_surface(&create_info, None) }
                .context("Failed to create Wayland surface")?;
            Ok(surface)
        }

        _ => anyhow::bail!("Unsupported window/display handle combination"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::ffi::CStr;

    #[test]
    fn extension_list_includes_core_surface() {
        let names = instance_extension_names();
        let as_strs: Vec<&CStr> = names
            .iter()
            .map(|&ptr| unsafe { CStr::from_ptr(ptr) })
            .collect();
        assert!(as_strs.contains(&ash::extensions::khr::Surface::name()));
    }

    #[test]
    fn extension_list_has_no_duplicates() {
        let names = instance_extension_names();
        let unique: HashSet<&CStr> = names
            .iter()
            .map(|&ptr| unsafe { CStr::from_ptr(ptr) })
            .collect();
        assert_eq!(unique.len(), names.len());
    }
}
