// Engine composition
//
// The engine is a thin composition root: construct the concrete graphics
// backend, hand it to the manager. The manager is a pure delegation layer
// over the backend seam - it never reorders or filters calls.

use anyhow::Result;
use std::sync::Arc;
use winit::window::Window;

use crate::config::Config;
use crate::renderer::VulkanRenderer;

/// Seam between the engine and a concrete renderer.
pub trait GraphicsBackend {
    fn window_title(&self) -> &str;

    /// Render one frame. Returns whether an image was actually presented
    /// (false while minimized or mid-recreation).
    fn render_frame(&mut self) -> Result<bool>;

    /// Note a framebuffer size change; resources are rebuilt lazily on the
    /// next frame.
    fn handle_resize(&mut self, width: u32, height: u32);

    /// Apply reloadable settings from a fresh config.
    fn apply_config(&mut self, config: &Config);

    /// Finish outstanding GPU work ahead of teardown.
    fn shutdown(&mut self) -> Result<()>;
}

/// Owns a backend and forwards every operation to it.
pub struct GraphicsManager<B: GraphicsBackend> {
    backend: B,
}

impl<B: GraphicsBackend> GraphicsManager<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn window_title(&self) -> &str {
        self.backend.window_title()
    }

    pub fn render_frame(&mut self) -> Result<bool> {
        log::trace!("GraphicsManager::render_frame");
        self.backend.render_frame()
    }

    pub fn handle_resize(&mut self, width: u32, height: u32) {
        self.backend.handle_resize(width, height);
    }

    pub fn apply_config(&mut self, config: &Config) {
        self.backend.apply_config(config);
    }

    pub fn shutdown(&mut self) -> Result<()> {
        self.backend.shutdown()
    }
}

pub struct Engine {
    graphics: GraphicsManager<VulkanRenderer>,
}

impl Engine {
    pub fn new(config: &Config, window: Arc<Window>) -> Result<Self> {
        let backend = VulkanRenderer::new(config, window)?;
        Ok(Self {
            graphics: GraphicsManager::new(backend),
        })
    }

    pub fn window_title(&self) -> &str {
        self.graphics.window_title()
    }

    pub fn render_frame(&mut self) -> Result<bool> {
        self.graphics.render_frame()
    }

    pub fn handle_resize(&mut self, width: u32, height: u32) {
        self.graphics.handle_resize(width, height);
    }

    pub fn apply_config(&mut self, config: &Config) {
        self.graphics.apply_config(config);
    }

    pub fn shutdown(&mut self) -> Result<()> {
        self.graphics.shutdown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct StubBackend {
        frames: u32,
        resizes: Vec<(u32, u32)>,
        config_applies: u32,
        shut_down: bool,
    }

    impl GraphicsBackend for StubBackend {
        fn window_title(&self) -> &str {
            "stub"
        }

        fn render_frame(&mut self) -> Result<bool> {
            self.frames += 1;
            Ok(true)
        }

        fn handle_resize(&mut self, width: u32, height: u32) {
            self.resizes.push((width, height));
        }

        fn apply_config(&mut self, _config: &Config) {
            self.config_applies += 1;
        }

        fn shutdown(&mut self) -> Result<()> {
            self.shut_down = true;
            Ok(())
        }
    }

    #[test]
    fn manager_delegates_every_operation() {
        let mut manager = GraphicsManager::new(StubBackend::default());

        assert_eq!(manager.window_title(), "stub");
        assert!(manager.render_frame().unwrap());
        assert!(manager.render_frame().unwrap());
        manager.handle_resize(640, 480);
        manager.apply_config(&Config::default());
        manager.shutdown().unwrap();

        let backend = manager.backend;
        assert_eq!(backend.frames, 2);
        assert_eq!(backend.resizes, vec![(640, 480)]);
        assert_eq!(backend.config_applies, 1);
        assert!(backend.shut_down);
    }
}
