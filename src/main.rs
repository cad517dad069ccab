// =============================================================================
// TURBINE - real-time rendering engine skeleton
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit shell (window, input, redraw loop)                       │
// │    └── Engine                                                   │
// │          └── GraphicsManager (backend seam)                     │
// │                └── VulkanRenderer                               │
// │                      └── Device + Swapchain + Buffers + Sync    │
// └─────────────────────────────────────────────────────────────────┘
//
// =============================================================================

mod backend;
mod camera;
mod config;
mod engine;
mod renderer;

use anyhow::Result;
use config::Config;
use engine::Engine;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::KeyCode,
    window::{Fullscreen, Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let config = Config::load();

    init_logging(&config);
    log::info!("Starting Turbine");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen {
            "fullscreen"
        } else {
            "windowed"
        }
    );
    log::info!(
        "Present mode: {} (vsync: {})",
        config.graphics.present_mode,
        config.graphics.vsync
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

/// Initialize logging with optional file output for validation errors
fn init_logging(config: &Config) {
    use env_logger::Builder;
    use log::LevelFilter;

    let mut builder = Builder::from_default_env();
    builder.filter_level(LevelFilter::Info);
    builder.init();

    // Create/clear log file if enabled
    if config.debug.log_to_file {
        if let Ok(mut file) = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
        {
            let _ = writeln!(file, "=== Turbine Log ===");
            let _ = writeln!(file, "Started: {:?}", std::time::SystemTime::now());
            let _ = writeln!(file);
        }
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

struct App {
    config: Config,

    window: Option<Arc<Window>>,
    engine: Option<Engine>,
    is_fullscreen: bool,

    // Key bindings resolved once at startup
    fullscreen_key: Option<KeyCode>,
    quit_key: Option<KeyCode>,

    // Config hot-reload
    reload_rx: Option<mpsc::Receiver<()>>,
    _watcher: Option<RecommendedWatcher>,

    // FPS tracking
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let is_fullscreen = config.window.fullscreen;
        let fullscreen_key = config::parse_key(&config.controls.fullscreen_key);
        let quit_key = config::parse_key(&config.controls.quit_key);

        let (watcher, reload_rx) = match watch_config() {
            Some((watcher, rx)) => (Some(watcher), Some(rx)),
            None => {
                log::debug!("Config hot-reload unavailable (no config.toml to watch)");
                (None, None)
            }
        };

        let now = Instant::now();
        Self {
            config,
            window: None,
            engine: None,
            is_fullscreen,
            fullscreen_key,
            quit_key,
            reload_rx,
            _watcher: watcher,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    /// Apply a changed config.toml to the running engine.
    fn poll_config_reload(&mut self) {
        let Some(rx) = &self.reload_rx else {
            return;
        };

        // Editors often emit bursts of events; drain them all into one reload
        let mut pending = false;
        while rx.try_recv().is_ok() {
            pending = true;
        }
        if !pending {
            return;
        }

        match Config::load_from_path(config::CONFIG_PATH) {
            Ok(new_config) => {
                log::info!("Config reloaded");
                if let Some(engine) = &mut self.engine {
                    engine.apply_config(&new_config);
                }
                // Window-level settings need a restart; keep the live parts
                self.config.graphics = new_config.graphics;
                self.config.debug.show_fps = new_config.debug.show_fps;
            }
            Err(e) => {
                log::warn!("Config reload failed, keeping current settings: {}", e);
            }
        }
    }

    fn toggle_fullscreen(&mut self) {
        if let Some(window) = &self.window {
            self.is_fullscreen = !self.is_fullscreen;

            if self.is_fullscreen {
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }

            let size = window.inner_size();
            if let Some(engine) = &mut self.engine {
                engine.handle_resize(size.width, size.height);
            }
        }
    }

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        // Update title once per second
        if now.duration_since(self.last_fps_update).as_secs_f32() >= 1.0 {
            let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
            let fps = self.frame_count as f32 / elapsed;

            if let Some(window) = &self.window {
                let mode = if self.is_fullscreen {
                    "fullscreen"
                } else {
                    "windowed"
                };
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms) [{}]",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0,
                    mode
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
}

/// Watch config.toml for edits; events arrive on the returned channel.
fn watch_config() -> Option<(RecommendedWatcher, mpsc::Receiver<()>)> {
    let (tx, rx) = mpsc::channel();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        if let Ok(event) = res {
            if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                let _ = tx.send(());
            }
        }
    })
    .ok()?;

    watcher
        .watch(Path::new(config::CONFIG_PATH), RecursiveMode::NonRecursive)
        .ok()?;

    Some((watcher, rx))
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        if self.config.window.fullscreen {
            window_attributes =
                window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        match Engine::new(&self.config, window.clone()) {
            Ok(engine) => {
                log::info!("Engine ready ({})", engine.window_title());
                self.engine = Some(engine);
                self.window = Some(window);
            }
            Err(e) => {
                log::error!("Failed to initialize engine: {:?}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                if let Some(engine) = &mut self.engine {
                    let _ = engine.shutdown();
                }
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(engine) = &mut self.engine {
                    engine.handle_resize(size.width, size.height);
                }
            }

            WindowEvent::RedrawRequested => {
                self.poll_config_reload();

                let rendered = match self.engine.as_mut().map(|e| e.render_frame()) {
                    Some(Ok(rendered)) => rendered,
                    Some(Err(e)) => {
                        log::error!("Render error: {:?}", e);
                        false
                    }
                    None => false,
                };

                if rendered {
                    self.update_fps();
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::PhysicalKey;

                if event.state.is_pressed() {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        if Some(key) == self.quit_key {
                            log::info!("Quit key pressed, exiting...");
                            if let Some(engine) = &mut self.engine {
                                let _ = engine.shutdown();
                            }
                            event_loop.exit();
                        } else if Some(key) == self.fullscreen_key {
                            self.toggle_fullscreen();
                        }
                    }
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws for maximum FPS.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}
