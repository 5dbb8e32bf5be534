//! Iris: GPU shader video player CLI.

use anyhow::Result;
use clap::Parser;
use iris::effect::{Effect, PresetFile};
use iris::media::VideoFile;
use iris::output::{WindowConfig, WindowRenderer};
use iris::player::{Player, PlayerEvent, TickScheduler, TickToken};
use iris::shader::GpuEffectStage;
use iris::utils::{format_time, FpsCounter};
use iris::watch::ShaderWatcher;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowAttributes, WindowId};

/// GPU shader video player.
#[derive(Parser, Debug)]
#[command(name = "iris")]
#[command(about = "Play videos through GPU fragment shader effects")]
struct Args {
    /// Video file path or URL (YouTube and Twitch links are resolved)
    input: String,

    /// Effect active at startup
    #[arg(short, long, value_enum, default_value = "none")]
    effect: Effect,

    /// Path to a custom GLSL fragment body, watched for live reload
    #[arg(short, long)]
    shader: Option<PathBuf>,

    /// Path to a YAML file with named shader bodies
    #[arg(long)]
    presets: Option<PathBuf>,

    /// Name of a preset from --presets to activate at startup
    #[arg(long)]
    preset: Option<String>,

    /// Initial volume in [0, 1]
    #[arg(long, default_value = "1.0")]
    volume: f32,

    /// Start muted
    #[arg(long)]
    muted: bool,

    /// Window width
    #[arg(long, default_value = "1280")]
    width: u32,

    /// Window height
    #[arg(long, default_value = "720")]
    height: u32,
}

/// Turns winit redraw requests into player render ticks.
struct RedrawScheduler {
    window: Arc<Window>,
    next_token: u64,
    armed: Option<TickToken>,
}

impl RedrawScheduler {
    fn new(window: Arc<Window>) -> Self {
        Self {
            window,
            next_token: 0,
            armed: None,
        }
    }
}

impl TickScheduler for RedrawScheduler {
    fn schedule(&mut self) -> TickToken {
        self.next_token += 1;
        let token = TickToken::new(self.next_token);
        self.armed = Some(token);
        self.window.request_redraw();
        token
    }

    fn cancel(&mut self, token: TickToken) {
        if self.armed == Some(token) {
            self.armed = None;
        }
    }

    fn take_fired(&mut self) -> Option<TickToken> {
        self.armed.take()
    }
}

type AppPlayer = Player<VideoFile, GpuEffectStage, RedrawScheduler>;

/// Application state for the event loop.
struct IrisApp {
    args: Args,
    window: Option<Arc<Window>>,
    renderer: Option<WindowRenderer>,
    player: Option<AppPlayer>,
    watcher: Option<ShaderWatcher>,
    fps: FpsCounter,
    last_title: String,
}

impl IrisApp {
    fn new(args: Args) -> Self {
        Self {
            args,
            window: None,
            renderer: None,
            player: None,
            watcher: None,
            fps: FpsCounter::new(),
            last_title: String::new(),
        }
    }

    fn initialize(&mut self, window: Arc<Window>) -> Result<()> {
        let stage = GpuEffectStage::new()?;
        let scheduler = RedrawScheduler::new(window);
        let mut player = Player::new(stage, scheduler);

        player.set_volume(self.args.volume);
        player.set_muted(self.args.muted);

        if let Some(source) = self.load_custom_source() {
            player.stage_custom_source(source);
            player.select_effect(Effect::Custom);
        } else {
            player.select_effect(self.args.effect);
        }

        player.load(&self.args.input);

        self.watcher = ShaderWatcher::new(self.args.shader.clone());
        self.player = Some(player);
        Ok(())
    }

    /// Reads the startup custom shader from --shader or a named preset.
    fn load_custom_source(&self) -> Option<String> {
        if let Some(path) = &self.args.shader {
            info!("Loading shader from {:?}", path);
            match fs::read_to_string(path) {
                Ok(source) => return Some(source),
                Err(e) => error!("Failed to read shader {:?}: {}", path, e),
            }
            return None;
        }

        let name = self.args.preset.as_ref()?;
        let Some(path) = &self.args.presets else {
            error!("--preset requires --presets");
            return None;
        };
        match PresetFile::load(path) {
            Ok(presets) => match presets.get(name) {
                Some(body) => Some(body.to_string()),
                None => {
                    error!("Preset {:?} not found in {:?}", name, path);
                    None
                }
            },
            Err(e) => {
                error!("{:#}", e);
                None
            }
        }
    }

    fn handle_key(&mut self, key: KeyCode, event_loop: &ActiveEventLoop) {
        let Some(player) = &mut self.player else {
            return;
        };

        match key {
            KeyCode::Space => player.toggle_play(),
            KeyCode::ArrowLeft => {
                let target = player.playback().current_time - 5.0;
                player.seek(target);
            }
            KeyCode::ArrowRight => {
                let target = player.playback().current_time + 5.0;
                player.seek(target);
            }
            KeyCode::ArrowUp => {
                let volume = player.playback().volume + 0.1;
                player.set_volume(volume);
            }
            KeyCode::ArrowDown => {
                let volume = player.playback().volume - 0.1;
                player.set_volume(volume);
            }
            KeyCode::KeyM => {
                let muted = !player.playback().is_muted;
                player.set_muted(muted);
            }
            KeyCode::Digit1 => player.select_effect(Effect::None),
            KeyCode::Digit2 => player.select_effect(Effect::Grayscale),
            KeyCode::Digit3 => player.select_effect(Effect::Sepia),
            KeyCode::Digit4 => player.select_effect(Effect::Blur),
            KeyCode::Digit5 => player.select_effect(Effect::Invert),
            KeyCode::Digit6 => player.select_effect(Effect::Custom),
            KeyCode::KeyS => {
                if let Some(renderer) = &self.renderer {
                    let path = screenshot_path();
                    match renderer.screenshot(&path) {
                        Ok(()) => info!("Saved screenshot to {:?}", path),
                        Err(e) => error!("Screenshot failed: {}", e),
                    }
                }
            }
            KeyCode::Escape => event_loop.exit(),
            _ => {}
        }
    }

    fn redraw(&mut self) {
        if let Some(watcher) = &mut self.watcher {
            if let Some(source) = watcher.check_for_changes() {
                if let Some(player) = &mut self.player {
                    info!("Reloading custom shader");
                    player.stage_custom_source(source);
                }
            }
        }

        let Some(player) = &mut self.player else {
            return;
        };
        player.pump();

        while let Some(event) = player.poll_event() {
            match event {
                PlayerEvent::MetadataLoaded {
                    width,
                    height,
                    duration,
                } => {
                    info!("Loaded {}x{} video, {:.1}s", width, height, duration);
                }
                PlayerEvent::Ended => info!("Playback finished"),
                PlayerEvent::ShaderRejected { message } => {
                    error!("Shader rejected: {}", message);
                }
                PlayerEvent::LoadFailed { message } => error!("Load failed: {}", message),
            }
        }

        if let Some(frame) = player.take_output() {
            if let Some(renderer) = &mut self.renderer {
                renderer.set_frame(frame);
            }
        }
        if let Some(renderer) = &mut self.renderer {
            if let Err(e) = renderer.render() {
                error!("Render error: {}", e);
            }
        }

        self.update_title();

        if let Some(fps) = self.fps.update() {
            debug!("[Perf] Rendering at {:.2} FPS", fps);
        }
    }

    fn update_title(&mut self) {
        let Some(player) = &self.player else {
            return;
        };
        let Some(window) = &self.window else {
            return;
        };

        let playback = player.playback();
        let mute_tag = if playback.is_muted { " [muted]" } else { "" };
        let title = format!(
            "Iris - {} / {} [{}]{}",
            format_time(playback.current_time),
            format_time(playback.duration),
            player.active_effect().name(),
            mute_tag
        );
        if title != self.last_title {
            window.set_title(&title);
            self.last_title = title;
        }
    }
}

impl ApplicationHandler for IrisApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let config = WindowConfig {
            width: self.args.width,
            height: self.args.height,
            ..Default::default()
        };
        let window_attrs = WindowAttributes::default()
            .with_title(config.title.as_str())
            .with_inner_size(PhysicalSize::new(config.width, config.height));

        match event_loop.create_window(window_attrs) {
            Ok(window) => {
                let window = Arc::new(window);
                self.window = Some(window.clone());

                match WindowRenderer::new(window.clone()) {
                    Ok(renderer) => {
                        self.renderer = Some(renderer);
                        info!("Window created successfully");

                        if let Err(e) = self.initialize(window) {
                            error!("Initialization error: {}", e);
                            event_loop.exit();
                        }
                    }
                    Err(e) => {
                        error!("Failed to create renderer: {}", e);
                        event_loop.exit();
                    }
                }
            }
            Err(e) => {
                error!("Failed to create window: {}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Window closed");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(renderer) = &mut self.renderer {
                    renderer.resize(size);
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => self.handle_key(key, event_loop),
            WindowEvent::RedrawRequested => {
                self.redraw();
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

fn screenshot_path() -> PathBuf {
    let stamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    PathBuf::from(format!("iris-{}.png", stamp))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    info!("Starting Iris...");

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = IrisApp::new(args);
    event_loop.run_app(&mut app)?;

    Ok(())
}
