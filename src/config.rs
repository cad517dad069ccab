// Configuration - settings from config.toml
//
// Missing file or bad values fall back to defaults with a warning, so the
// binary always starts. The file is also watched at runtime; reloadable
// settings are applied through the backend (see main.rs).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use winit::keyboard::KeyCode;

use crate::backend::swapchain::SwapchainPreferences;

pub const CONFIG_PATH: &str = "config.toml";

/// Root configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
    pub controls: ControlsConfig,
}

/// Window settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Turbine".to_string(),
            width: 1280,
            height: 720,
            fullscreen: false,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GraphicsConfig {
    /// Force FIFO presentation regardless of present_mode.
    pub vsync: bool,
    /// "auto" defers to the mailbox/immediate/fifo fallback chain.
    pub present_mode: String,
    pub clear_color: [f32; 4],
    pub max_frames_in_flight: usize,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            vsync: false,
            present_mode: "auto".to_string(),
            clear_color: [0.1, 0.2, 0.3, 1.0],
            max_frames_in_flight: 2,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_to_file: false,
            log_file: "turbine_debug.log".to_string(),
            show_fps: true,
        }
    }
}

/// Control key bindings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ControlsConfig {
    pub fullscreen_key: String,
    pub quit_key: String,
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            fullscreen_key: "F11".to_string(),
            quit_key: "Escape".to_string(),
        }
    }
}

impl Config {
    /// Load configuration, falling back to defaults if missing or invalid.
    pub fn load() -> Self {
        Self::load_from_path(CONFIG_PATH).unwrap_or_else(|e| {
            log::warn!("Failed to load {}: {}. Using defaults.", CONFIG_PATH, e);
            Config::default()
        })
    }

    /// Load configuration from a specific path.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Present mode requested by name; None means "auto".
    pub fn present_mode(&self) -> Option<ash::vk::PresentModeKHR> {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "auto" => None,
            "immediate" => Some(ash::vk::PresentModeKHR::IMMEDIATE),
            "mailbox" => Some(ash::vk::PresentModeKHR::MAILBOX),
            "fifo" => Some(ash::vk::PresentModeKHR::FIFO),
            "fifo_relaxed" => Some(ash::vk::PresentModeKHR::FIFO_RELAXED),
            other => {
                log::warn!("Unknown present mode '{}', using auto", other);
                None
            }
        }
    }

    /// Swapchain negotiation preferences derived from this config.
    pub fn swapchain_preferences(&self) -> SwapchainPreferences {
        SwapchainPreferences {
            vsync: self.graphics.vsync,
            preferred_present_mode: self.present_mode(),
        }
    }
}

/// Map a config key name onto a winit key code. Unknown names match nothing.
pub fn parse_key(name: &str) -> Option<KeyCode> {
    match name.to_lowercase().as_str() {
        "escape" | "esc" => Some(KeyCode::Escape),
        "f11" => Some(KeyCode::F11),
        "f12" => Some(KeyCode::F12),
        "space" => Some(KeyCode::Space),
        "enter" | "return" => Some(KeyCode::Enter),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_empty() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.window.height, 720);
        assert_eq!(config.graphics.max_frames_in_flight, 2);
        assert!(!config.graphics.vsync);
        assert!(config.present_mode().is_none());
    }

    #[test]
    fn partial_tables_keep_other_defaults() {
        let config = Config::from_toml_str(
            r#"
            [window]
            width = 800
            height = 600

            [graphics]
            vsync = true
            "#,
        )
        .unwrap();
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.title, "Turbine");
        assert!(config.graphics.vsync);
        assert_eq!(config.graphics.clear_color, [0.1, 0.2, 0.3, 1.0]);
    }

    #[test]
    fn present_mode_names_map_to_vulkan() {
        let mut config = Config::default();
        config.graphics.present_mode = "MAILBOX".to_string();
        assert_eq!(
            config.present_mode(),
            Some(ash::vk::PresentModeKHR::MAILBOX)
        );

        config.graphics.present_mode = "fifo_relaxed".to_string();
        assert_eq!(
            config.present_mode(),
            Some(ash::vk::PresentModeKHR::FIFO_RELAXED)
        );

        config.graphics.present_mode = "definitely-not-a-mode".to_string();
        assert!(config.present_mode().is_none());
    }

    #[test]
    fn preferences_carry_vsync_flag() {
        let mut config = Config::default();
        config.graphics.vsync = true;
        config.graphics.present_mode = "immediate".to_string();
        let prefs = config.swapchain_preferences();
        assert!(prefs.vsync);
        assert_eq!(
            prefs.preferred_present_mode,
            Some(ash::vk::PresentModeKHR::IMMEDIATE)
        );
    }

    #[test]
    fn invalid_toml_is_an_error() {
        assert!(Config::from_toml_str("window = 12").is_err());
    }

    #[test]
    fn key_names_resolve_case_insensitively() {
        assert_eq!(parse_key("Escape"), Some(KeyCode::Escape));
        assert_eq!(parse_key("f11"), Some(KeyCode::F11));
        assert_eq!(parse_key("nope"), None);
    }
}
