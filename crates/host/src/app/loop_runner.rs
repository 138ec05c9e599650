use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};

use overlay::hooks::native::S_OK;
use overlay::{
    GamepadButton, GamepadState, HookInstallError, HostInput, MessageDisposition, OverlayManager,
    SceneError, SwapChainBinding, SwapChainHandle, WindowMessage, WritableMemory,
};
use parking_lot::Mutex;
use pixels::{Error as PixelsError, Pixels, SurfaceTexture};
use thiserror::Error;
use tracing::{debug, info, warn};
use winit::dpi::LogicalSize;
use winit::error::{EventLoopError, OsError};
use winit::event::{ElementState, Event, KeyEvent, MouseButton, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{CursorIcon, Fullscreen, Window, WindowBuilder};

use super::bootstrap::AppWiring;
use super::canvas::Canvas;
use super::panels::{install_panels, HostStatus, PanelShared, SharedPanels, ThumbnailSlot};
use super::software_ui::{
    mouse_lparam, SoftwareUi, BACKSPACE, WM_CHAR, WM_KEYDOWN, WM_LBUTTONDOWN, WM_LBUTTONUP,
    WM_MOUSEMOVE,
};
use super::swap_chain::{
    active_cursor, attach_surface, detach_surface, HostBinding, HostSwapChain, PresentTable,
    ARROW_CURSOR, CROSSHAIR_CURSOR, HAND_CURSOR,
};

const WM_KEYUP: u32 = 0x0101;
const METRICS_LOG_INTERVAL: Duration = Duration::from_secs(1);
const MAX_MARKERS: usize = 32;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to create event loop: {0}")]
    CreateEventLoop(#[source] EventLoopError),
    #[error("failed to create application window: {0}")]
    CreateWindow(#[source] OsError),
    #[error("failed to initialize window surface: {0}")]
    CreateSurface(#[source] PixelsError),
    #[error(transparent)]
    InstallHooks(#[from] HookInstallError),
    #[error("event loop failed: {0}")]
    EventLoopRun(#[source] EventLoopError),
}

pub(crate) fn run(app: AppWiring) -> Result<(), AppError> {
    let AppWiring {
        paths,
        config,
        window: settings,
    } = app;

    let event_loop = EventLoop::new().map_err(AppError::CreateEventLoop)?;
    let window = Arc::new(
        WindowBuilder::new()
            .with_title(settings.title.clone())
            .with_inner_size(LogicalSize::new(
                settings.width as f64,
                settings.height as f64,
            ))
            .build(&event_loop)
            .map_err(AppError::CreateWindow)?,
    );
    let size = window.inner_size();
    let displays = window.available_monitors().count().max(1) as u32;

    let chain: &'static HostSwapChain = Box::leak(Box::new(HostSwapChain::new(
        size.width,
        size.height,
        displays,
    )));
    let table: &'static PresentTable = Box::leak(Box::new(PresentTable::new()));
    let surface = SurfaceTexture::new(size.width, size.height, Arc::clone(&window));
    let pixels = Pixels::new(size.width, size.height, surface).map_err(AppError::CreateSurface)?;
    attach_surface(pixels);

    let canvas = Arc::clone(chain.canvas());
    let factory = move |handle: SwapChainHandle| {
        if handle != chain.handle() {
            return Err(SceneError::Bind {
                handle: handle.addr(),
                message: "not the host swap chain".to_string(),
            });
        }
        let binding: Arc<dyn SwapChainBinding> = Arc::new(HostBinding::new(chain));
        Ok((binding, SoftwareUi::new(Arc::clone(&canvas), Some(table))))
    };
    let layout_path = paths.layout_path(&config);
    let manager = Arc::new(OverlayManager::new(config, Some(layout_path), factory));

    let pad = Arc::new(Mutex::new(GamepadState::default()));
    manager.set_host_input(Box::new(KeyboardPad(Arc::clone(&pad))));
    manager.on_resize(|event| debug!(event = ?event, "swap_chain_resize_event"));

    let shared: SharedPanels = Arc::new(Mutex::new(PanelShared {
        status: HostStatus {
            window_title: settings.title.clone(),
            ..HostStatus::default()
        },
        ..PanelShared::default()
    }));
    install_panels(&manager, &shared);

    // SAFETY: the table is leaked and its slots hold host functions with the
    // matching signatures.
    let interceptor = unsafe { manager.install_hooks(table.targets(), Arc::new(WritableMemory)) }?;
    let mut interceptor = Some(interceptor);
    info!(
        width = size.width,
        height = size.height,
        displays,
        "host_window_ready"
    );

    event_loop.set_control_flow(ControlFlow::Poll);

    let mut input_collector = InputCollector::new(Arc::clone(&pad));
    let mut world = HostWorld::default();
    let mut thumbnails = ThumbnailSlot::default();
    let mut applied_cursor = None;
    let mut last_metrics_log = Instant::now();
    let window_id = window.id();
    let message_window = u64::from(window_id) as usize;

    event_loop
        .run(move |event, window_target| match event {
            Event::WindowEvent { window_id: id, event } if id == window_id => match event {
                WindowEvent::CloseRequested => {
                    info!(reason = "window_close", "shutdown_requested");
                    window_target.exit();
                }
                WindowEvent::Resized(new_size) => {
                    let status = table.resize_buffers(chain, new_size.width, new_size.height);
                    if status != S_OK {
                        warn!(status = format_args!("{status:#x}"), "host_resize_failed");
                        window_target.exit();
                    }
                }
                WindowEvent::ScaleFactorChanged { .. } => {
                    let size = window.inner_size();
                    let status = table.resize_buffers(chain, size.width, size.height);
                    if status != S_OK {
                        warn!(status = format_args!("{status:#x}"), "host_resize_failed");
                        window_target.exit();
                    }
                }
                WindowEvent::CursorMoved { position, .. } => {
                    let point = (position.x as i32, position.y as i32);
                    let message = mouse_message(message_window, WM_MOUSEMOVE, point);
                    if manager.process_window_message(&message) == MessageDisposition::PassThrough {
                        input_collector.set_cursor_position_px(Some(point));
                    } else {
                        input_collector.set_cursor_position_px(None);
                    }
                }
                WindowEvent::CursorLeft { .. } => {
                    input_collector.set_cursor_position_px(None);
                }
                WindowEvent::MouseInput {
                    state,
                    button: MouseButton::Left,
                    ..
                } => {
                    let point = input_collector.last_known_cursor();
                    let kind = match state {
                        ElementState::Pressed => WM_LBUTTONDOWN,
                        ElementState::Released => WM_LBUTTONUP,
                    };
                    let message = mouse_message(message_window, kind, point);
                    if manager.process_window_message(&message) == MessageDisposition::PassThrough {
                        input_collector.handle_left_mouse(state);
                    }
                }
                WindowEvent::KeyboardInput { event, .. } => {
                    let disposition = manager.process_window_message(&key_message(
                        message_window,
                        &event,
                    ));
                    if event.state == ElementState::Pressed {
                        for ch in typed_chars(&event) {
                            manager.process_window_message(&WindowMessage {
                                window: message_window,
                                message: WM_CHAR,
                                wparam: ch as usize,
                                lparam: 0,
                            });
                        }
                    }
                    if disposition == MessageDisposition::PassThrough {
                        input_collector.handle_keyboard_input(&event);
                    }
                    if input_collector.quit_requested {
                        info!(reason = "escape_key", "shutdown_requested");
                        window_target.exit();
                    }
                    if input_collector.take_fullscreen_toggle() {
                        let fullscreen = window.fullscreen().is_none();
                        window.set_fullscreen(fullscreen.then_some(Fullscreen::Borderless(None)));
                        chain.set_fullscreen(fullscreen);
                        info!(fullscreen, "host_fullscreen_toggled");
                    }
                }
                WindowEvent::RedrawRequested => {
                    let frame_start = Instant::now();
                    if let Some(point) = input_collector.take_left_click() {
                        world.place_marker(point);
                    }
                    world.cursor = input_collector.cursor_position_px;
                    world.draw(&mut chain.canvas().lock());

                    table.set_cursor(CROSSHAIR_CURSOR);
                    let status = table.present(chain, 1, 0);
                    if status != S_OK {
                        warn!(status = format_args!("{status:#x}"), "host_present_failed");
                        window_target.exit();
                    }
                    apply_cursor(&window, active_cursor(), &mut applied_cursor);

                    thumbnails.poll(&manager);
                    let requests = {
                        let mut shared = shared.lock();
                        shared.host_frame.push(frame_start.elapsed());
                        mem::take(&mut shared.requests)
                    };
                    if requests.rebuild_fonts {
                        info!("font_rebuild_requested");
                        manager.fonts().mark_dirty();
                    }
                    if requests.toggle_cursor_override {
                        manager.set_cursor_override(!manager.cursor_override());
                    }
                    if requests.upload_thumbnail {
                        thumbnails.request(&manager);
                    }
                    if let Some(title) = requests.window_title {
                        window.set_title(if title.is_empty() {
                            &settings.title
                        } else {
                            &title
                        });
                    }
                    if requests.quit {
                        info!(reason = "overlay_quit_button", "shutdown_requested");
                        window_target.exit();
                    }

                    let video_memory = manager.video_memory_usage();
                    {
                        let mut shared = shared.lock();
                        shared.status.cursor_override = manager.cursor_override();
                        shared.status.gamepad_navigation = manager.gamepad_navigation();
                        shared.status.video_memory = video_memory;
                        shared.status.live_thumbnails = thumbnails.live();
                    }

                    if last_metrics_log.elapsed() >= METRICS_LOG_INTERVAL {
                        last_metrics_log = Instant::now();
                        let snapshot = manager.metrics().snapshot();
                        info!(
                            fps = snapshot.fps,
                            draw_time_ms = snapshot.draw_time_ms,
                            peak_draw_time_ms = snapshot.peak_draw_time_ms,
                            present_calls = snapshot.present_calls,
                            rendered_frames = snapshot.rendered_frames,
                            host_presents = chain.presents(),
                            "loop_metrics"
                        );
                    }
                }
                _ => {}
            },
            Event::AboutToWait => {
                window.request_redraw();
            }
            Event::LoopExiting => {
                drop(interceptor.take());
                manager.dispose_scene();
                detach_surface();
                info!("shutdown");
            }
            _ => {}
        })
        .map_err(AppError::EventLoopRun)
}

fn mouse_message(window: usize, message: u32, (x, y): (i32, i32)) -> WindowMessage {
    WindowMessage {
        window,
        message,
        wparam: 0,
        lparam: mouse_lparam(x, y),
    }
}

fn key_message(window: usize, event: &KeyEvent) -> WindowMessage {
    WindowMessage {
        window,
        message: match event.state {
            ElementState::Pressed => WM_KEYDOWN,
            ElementState::Released => WM_KEYUP,
        },
        wparam: 0,
        lparam: 0,
    }
}

fn typed_chars(event: &KeyEvent) -> Vec<char> {
    match event.physical_key {
        PhysicalKey::Code(KeyCode::Backspace) => vec![BACKSPACE],
        _ => event
            .text
            .as_deref()
            .unwrap_or_default()
            .chars()
            .filter(|ch| !ch.is_control())
            .collect(),
    }
}

fn apply_cursor(window: &Window, cursor: usize, applied: &mut Option<usize>) {
    if *applied == Some(cursor) {
        return;
    }
    *applied = Some(cursor);
    let icon = match cursor {
        0 => {
            window.set_cursor_visible(false);
            return;
        }
        ARROW_CURSOR => CursorIcon::Default,
        CROSSHAIR_CURSOR => CursorIcon::Crosshair,
        HAND_CURSOR => CursorIcon::Pointer,
        _ => CursorIcon::Default,
    };
    window.set_cursor_visible(true);
    window.set_cursor_icon(icon);
}

fn pad_button(code: KeyCode) -> Option<GamepadButton> {
    let button = match code {
        KeyCode::ArrowUp => GamepadButton::DpadUp,
        KeyCode::ArrowDown => GamepadButton::DpadDown,
        KeyCode::ArrowLeft => GamepadButton::DpadLeft,
        KeyCode::ArrowRight => GamepadButton::DpadRight,
        KeyCode::Enter => GamepadButton::Cross,
        KeyCode::Backspace => GamepadButton::Circle,
        KeyCode::KeyQ => GamepadButton::L1,
        KeyCode::KeyE => GamepadButton::R1,
        KeyCode::KeyR => GamepadButton::R3,
        KeyCode::Tab => GamepadButton::Select,
        _ => return None,
    };
    Some(button)
}

/// Keyboard-emulated gamepad shared with the overlay's input bridge.
struct KeyboardPad(Arc<Mutex<GamepadState>>);

impl HostInput for KeyboardPad {
    fn gamepad(&self) -> GamepadState {
        *self.0.lock()
    }

    fn clear_latched_keys(&mut self) {
        *self.0.lock() = GamepadState::default();
    }
}

#[derive(Debug, Default)]
struct InputCollector {
    quit_requested: bool,
    fullscreen_key_is_down: bool,
    fullscreen_pressed_edge: bool,
    cursor_position_px: Option<(i32, i32)>,
    last_cursor_px: (i32, i32),
    left_mouse_is_down: bool,
    left_click_pressed_edge: bool,
    pad: Arc<Mutex<GamepadState>>,
}

impl InputCollector {
    fn new(pad: Arc<Mutex<GamepadState>>) -> Self {
        Self {
            pad,
            ..Self::default()
        }
    }

    fn handle_keyboard_input(&mut self, event: &KeyEvent) {
        if let PhysicalKey::Code(code) = event.physical_key {
            self.handle_key(code, event.state);
        }
    }

    fn handle_key(&mut self, code: KeyCode, state: ElementState) {
        let is_down = state == ElementState::Pressed;
        if code == KeyCode::Escape && is_down {
            self.quit_requested = true;
        }
        if code == KeyCode::F11 {
            if is_down && !self.fullscreen_key_is_down {
                self.fullscreen_pressed_edge = true;
            }
            self.fullscreen_key_is_down = is_down;
        }
        if let Some(button) = pad_button(code) {
            self.pad.lock().set(button, is_down);
        }
    }

    fn take_fullscreen_toggle(&mut self) -> bool {
        mem::take(&mut self.fullscreen_pressed_edge)
    }

    fn set_cursor_position_px(&mut self, position: Option<(i32, i32)>) {
        if let Some(position) = position {
            self.last_cursor_px = position;
        }
        self.cursor_position_px = position;
    }

    fn last_known_cursor(&self) -> (i32, i32) {
        self.last_cursor_px
    }

    fn handle_left_mouse(&mut self, state: ElementState) {
        match state {
            ElementState::Pressed => {
                if !self.left_mouse_is_down {
                    self.left_click_pressed_edge = true;
                }
                self.left_mouse_is_down = true;
            }
            ElementState::Released => self.left_mouse_is_down = false,
        }
    }

    fn take_left_click(&mut self) -> Option<(i32, i32)> {
        if mem::take(&mut self.left_click_pressed_edge) {
            self.cursor_position_px
        } else {
            None
        }
    }
}

/// The host's own rendering: an animated backdrop, click markers and a
/// crosshair, drawn before the overlay composites on top.
#[derive(Debug, Default)]
struct HostWorld {
    frame: u64,
    markers: Vec<(i32, i32)>,
    cursor: Option<(i32, i32)>,
}

impl HostWorld {
    fn place_marker(&mut self, point: (i32, i32)) {
        if self.markers.len() == MAX_MARKERS {
            self.markers.remove(0);
        }
        self.markers.push(point);
    }

    fn draw(&mut self, canvas: &mut Canvas) {
        self.frame += 1;
        let shade = (self.frame % 256) as u8;
        canvas.clear([16, 24u8.wrapping_add(shade / 8), 40, 255]);

        for &(x, y) in &self.markers {
            canvas.fill_rect(x - 3, y - 3, 7, 7, [240, 90, 60, 255]);
        }
        if let Some((x, y)) = self.cursor {
            canvas.fill_rect(x - 8, y, 17, 1, [255, 255, 255, 200]);
            canvas.fill_rect(x, y - 8, 1, 17, [255, 255, 255, 200]);
        }
    }
}
