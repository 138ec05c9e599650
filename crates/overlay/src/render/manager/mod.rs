//! The overlay's render-thread driver.
//!
//! [`OverlayManager`] receives the intercepted present, resize and cursor
//! calls, owns the scene bound to the primary swap chain and exposes the
//! surface consumers use to draw, schedule work and retire GPU resources.

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, trace, warn};

use super::callbacks::{panic_message, CallbackQueues, Completion};
use super::cursor::CursorArbiter;
use super::metrics::{MetricsAccumulator, MetricsHandle};
use super::reclaim::{DeferredResourceReclaimer, GpuTexture};
use super::scene::{
    MessageDisposition, RenderScene, SceneFactory, SceneSettings, SwapChainBinding, UiToolkit,
    VideoMemoryUsage, WindowMessage,
};
use super::RenderThread;
use crate::config::OverlayConfig;
use crate::fonts::{default_font_builder, AtlasBuilder, FontAtlasPipeline, FontHandle, FontRole};
use crate::hooks::detours::{DetourTargets, FrameHooks, PresentInterceptor};
use crate::hooks::native::{
    CursorHandle, PresentCall, PresentFn, ResizeBuffersFn, ResizeCall, SetCursorFn,
    SwapChainHandle, DXGI_ERROR_INVALID_CALL,
};
use crate::hooks::record::{HookInstallError, SlotWriter};
use crate::input::{BridgeEvent, HostInput, InputBridge};

const METRICS_INTERVAL: Duration = Duration::from_secs(1);

/// Handle returned by subscriptions; pass it back to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeEvent {
    /// Any swap chain is about to resize, primary or not.
    Impending { swap_chain: SwapChainHandle },
    /// The primary swap chain's buffers are about to be released.
    BeforePrimary,
    /// The primary swap chain's buffers were recreated.
    AfterPrimary { width: u32, height: u32 },
}

type DrawCallback<U> = Arc<Mutex<Box<dyn FnMut(&mut U) + Send>>>;
type ResizeCallback = Arc<dyn Fn(&ResizeEvent) + Send + Sync>;

pub struct OverlayManager<U: UiToolkit> {
    config: OverlayConfig,
    layout_path: Option<PathBuf>,
    factory: Box<dyn SceneFactory<U>>,
    scene: Mutex<Option<RenderScene<U>>>,
    binding: RwLock<Option<Arc<dyn SwapChainBinding>>>,
    fonts: FontAtlasPipeline,
    queues: CallbackQueues,
    reclaimer: Arc<DeferredResourceReclaimer>,
    cursor: CursorArbiter,
    input: Mutex<InputBridge>,
    host_input: Mutex<Option<Box<dyn HostInput>>>,
    draw_subscribers: Mutex<Vec<(SubscriptionId, DrawCallback<U>)>>,
    resize_subscribers: Mutex<Vec<(SubscriptionId, ResizeCallback)>>,
    next_subscription: AtomicU64,
    render_thread: Arc<RenderThread>,
    metrics: MetricsHandle,
    accumulator: Mutex<MetricsAccumulator>,
    in_frame: AtomicBool,
}

impl<U: UiToolkit> OverlayManager<U> {
    /// Manager with the default, icon and mono fonts sized from `config`.
    pub fn new(
        config: OverlayConfig,
        layout_path: Option<PathBuf>,
        factory: impl SceneFactory<U> + 'static,
    ) -> Self {
        let builder = default_font_builder(&config.fonts);
        Self::with_font_builder(config, layout_path, factory, builder)
    }

    pub fn with_font_builder(
        config: OverlayConfig,
        layout_path: Option<PathBuf>,
        factory: impl SceneFactory<U> + 'static,
        fonts: AtlasBuilder,
    ) -> Self {
        let render_thread = Arc::new(RenderThread::default());
        info!(
            viewports = config.viewports_enabled,
            cursor_override = config.cursor_override,
            gamepad_navigation = config.gamepad_navigation,
            "overlay_manager_created"
        );
        Self {
            fonts: FontAtlasPipeline::new(fonts, Arc::clone(&render_thread)),
            cursor: CursorArbiter::new(config.cursor_override),
            input: Mutex::new(InputBridge::new(config.gamepad_navigation)),
            config,
            layout_path,
            factory: Box::new(factory),
            scene: Mutex::new(None),
            binding: RwLock::new(None),
            queues: CallbackQueues::default(),
            reclaimer: Arc::new(DeferredResourceReclaimer::default()),
            host_input: Mutex::new(None),
            draw_subscribers: Mutex::new(Vec::new()),
            resize_subscribers: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            render_thread,
            metrics: MetricsHandle::default(),
            accumulator: Mutex::new(MetricsAccumulator::new(METRICS_INTERVAL)),
            in_frame: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    /// Patches `targets` so the host's calls flow through this manager.
    ///
    /// # Safety
    ///
    /// See [`PresentInterceptor::install`].
    pub unsafe fn install_hooks(
        self: &Arc<Self>,
        targets: DetourTargets,
        writer: Arc<dyn SlotWriter>,
    ) -> Result<PresentInterceptor, HookInstallError> {
        PresentInterceptor::install(targets, writer, Arc::clone(self) as Arc<dyn FrameHooks>)
    }

    /// Registers a draw callback. Callbacks run on the render thread in
    /// registration order, each to completion before the next starts.
    pub fn on_draw<F>(&self, draw: F) -> SubscriptionId
    where
        F: FnMut(&mut U) + Send + 'static,
    {
        let id = self.next_id();
        let draw: Box<dyn FnMut(&mut U) + Send> = Box::new(draw);
        self.draw_subscribers
            .lock()
            .push((id, Arc::new(Mutex::new(draw))));
        id
    }

    /// Returns `false` if `id` was not subscribed. A frame already in
    /// progress may still call the callback once.
    pub fn remove_draw(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.draw_subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(entry, _)| *entry != id);
        subscribers.len() != before
    }

    pub fn on_resize<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ResizeEvent) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.resize_subscribers.lock().push((id, Arc::new(callback)));
        id
    }

    pub fn remove_resize(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.resize_subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(entry, _)| *entry != id);
        subscribers.len() != before
    }

    /// Runs `action` on the render thread before the next frame's UI pass.
    pub fn schedule_before_render<T, F>(&self, action: F) -> Completion<T>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.queues.before_render.schedule(action)
    }

    /// Runs `action` on the render thread after the next frame's UI pass.
    pub fn schedule_after_render<T, F>(&self, action: F) -> Completion<T>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.queues.after_render.schedule(action)
    }

    /// Releases `texture` once the current frame has been drawn.
    pub fn defer_dispose_texture(&self, texture: Box<dyn GpuTexture>) {
        self.reclaimer.defer_texture(texture);
    }

    /// Keeps `value` alive until the current frame has been drawn.
    pub fn defer_keep_alive<T: Send + 'static>(&self, value: T) {
        self.reclaimer.defer_keep_alive(value);
    }

    pub fn reclaimer(&self) -> &Arc<DeferredResourceReclaimer> {
        &self.reclaimer
    }

    pub fn fonts(&self) -> &FontAtlasPipeline {
        &self.fonts
    }

    pub fn font(&self, role: FontRole) -> FontHandle {
        self.fonts.handle(role)
    }

    /// `None` until a scene is bound or when the adapter cannot report it.
    pub fn video_memory_usage(&self) -> Option<VideoMemoryUsage> {
        self.binding
            .read()
            .as_ref()
            .and_then(|binding| binding.video_memory_usage())
    }

    pub fn set_cursor_override(&self, enabled: bool) {
        self.cursor.set_override(enabled);
        debug!(enabled, "cursor_override_changed");
    }

    pub fn cursor_override(&self) -> bool {
        self.cursor.override_enabled()
    }

    pub fn set_host_input(&self, host: Box<dyn HostInput>) {
        *self.host_input.lock() = Some(host);
    }

    pub fn gamepad_navigation(&self) -> bool {
        self.input.lock().gamepad_navigation()
    }

    pub fn metrics(&self) -> MetricsHandle {
        self.metrics.clone()
    }

    pub fn render_thread(&self) -> &RenderThread {
        &self.render_thread
    }

    /// The swap chain the scene is bound to, if any.
    pub fn primary_swap_chain(&self) -> Option<SwapChainHandle> {
        self.binding.read().as_ref().map(|binding| binding.handle())
    }

    /// Pre-dispatch window message hook. Messages that arrive while the
    /// render thread is inside a frame are passed through.
    pub fn process_window_message(&self, message: &WindowMessage) -> MessageDisposition {
        if self.in_frame.load(Ordering::Acquire) && self.render_thread.is_current() {
            return MessageDisposition::PassThrough;
        }
        match self.scene.lock().as_mut() {
            Some(scene) => scene.ui_mut().handle_window_message(message),
            None => MessageDisposition::PassThrough,
        }
    }

    /// Tears down the scene; the next present binds a new one.
    pub fn dispose_scene(&self) {
        let scene = self.scene.lock().take();
        self.binding.write().take();
        self.cursor.reset();
        drop(scene);
        self.reclaimer.release_all();
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed))
    }

    fn notify_resize(&self, event: ResizeEvent) {
        let subscribers: Vec<ResizeCallback> = self
            .resize_subscribers
            .lock()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in subscribers {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(&event))) {
                warn!(
                    event = ?event,
                    panic = %panic_message(payload.as_ref()),
                    "resize_subscriber_panicked"
                );
            }
        }
    }

    fn create_scene(&self, swap_chain: SwapChainHandle) -> Option<RenderScene<U>> {
        let (binding, ui) = match self.factory.create_scene(swap_chain) {
            Ok(parts) => parts,
            Err(error) => {
                warn!(
                    swap_chain = format_args!("{:#x}", swap_chain.addr()),
                    error = %error,
                    "scene_create_failed"
                );
                return None;
            }
        };

        let settings = SceneSettings {
            viewports_enabled: self.config.viewports_enabled,
            layout_path: self.layout_path.clone(),
            layout_max_bytes: self.config.layout_file_max_bytes,
        };
        *self.binding.write() = Some(Arc::clone(&binding));
        let mut scene = RenderScene::new(binding, ui, settings);
        scene
            .ui_mut()
            .set_gamepad_navigation(self.input.lock().gamepad_navigation());
        Some(scene)
    }

    /// Locks the scene only around binding and rendering. Font listeners
    /// and pre-render actions run unlocked so they may call back into the
    /// manager.
    fn present_frame(&self, swap_chain: SwapChainHandle) {
        let created = {
            let mut guard = self.scene.lock();
            match guard.as_ref() {
                Some(scene) if scene.handle() != swap_chain => {
                    trace!(
                        swap_chain = format_args!("{:#x}", swap_chain.addr()),
                        primary = format_args!("{:#x}", scene.handle().addr()),
                        "present_swap_chain_mismatch"
                    );
                    return;
                }
                Some(_) => false,
                None => {
                    *guard = self.create_scene(swap_chain);
                    if guard.is_none() {
                        return;
                    }
                    true
                }
            }
        };

        if let Some(outcome) = self.fonts.publish_pending() {
            if let Some(superseded) = outcome.superseded {
                self.reclaimer.defer_keep_alive(superseded);
            }
        }
        if created && !self.fonts.has_built() {
            let ticket = self.fonts.rebuild();
            debug!(ticket = ticket.id(), "font_atlas_initial_build_requested");
        }
        self.fonts.rebuild_if_dirty();
        if !self.fonts.has_built() {
            return;
        }
        if let Some(scene) = self.scene.lock().as_mut() {
            scene.sync_font_atlas(self.fonts.current_atlas());
        }

        let started = Instant::now();
        let frame = self.reclaimer.begin_frame();
        self.queues.before_render.drain();

        let mut guard = self.scene.lock();
        let scene = match guard.as_mut() {
            Some(scene) if scene.handle() == swap_chain => scene,
            _ => {
                debug!(frame, "scene_disposed_before_render");
                return;
            }
        };
        self.update_input(scene);
        scene.begin_frame(
            frame,
            self.cursor.last_wants_capture(),
            self.cursor.override_enabled(),
        );

        self.in_frame.store(true, Ordering::Release);
        let rendered = scene.render(|ui| self.run_draw_subscribers(ui));
        self.in_frame.store(false, Ordering::Release);

        match rendered {
            Ok(()) => self.metrics.record_rendered_frame(),
            Err(error) => warn!(frame, error = %error, "overlay_render_failed"),
        }
        self.cursor
            .record_frame(scene.ui().wants_capture_mouse(), &scene.ui().toolkit_cursors());
        drop(guard);

        self.queues.after_render.drain();
        self.reclaimer.drain_after_draw(frame);

        let mut accumulator = self.accumulator.lock();
        accumulator.record_frame(started.elapsed());
        accumulator.maybe_publish(Instant::now(), &self.metrics);
    }

    fn update_input(&self, scene: &mut RenderScene<U>) {
        let mut host_input = self.host_input.lock();
        let host: Option<&mut dyn HostInput> = match host_input.as_mut() {
            Some(host) => Some(host.as_mut()),
            None => None,
        };
        let events = self.input.lock().update(scene.ui_mut(), host);
        for event in events {
            if let BridgeEvent::GamepadWindowToggled { visible } = event {
                debug!(visible, "gamepad_window_toggled");
            }
        }
    }

    fn run_draw_subscribers(&self, ui: &mut U) {
        let subscribers: Vec<(SubscriptionId, DrawCallback<U>)> = self
            .draw_subscribers
            .lock()
            .iter()
            .map(|(id, draw)| (*id, Arc::clone(draw)))
            .collect();
        for (id, draw) in subscribers {
            let mut draw = draw.lock();
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| (*draw)(ui))) {
                warn!(
                    subscription = id.0,
                    panic = %panic_message(payload.as_ref()),
                    "draw_subscriber_panicked"
                );
            }
        }
    }
}

impl<U: UiToolkit> FrameHooks for OverlayManager<U> {
    fn on_present(&self, call: PresentCall, original: PresentFn) -> i32 {
        self.metrics.record_present_call();
        if self.render_thread.observe() {
            info!("render_thread_observed");
        }

        if let Err(payload) =
            panic::catch_unwind(AssertUnwindSafe(|| self.present_frame(call.swap_chain)))
        {
            self.in_frame.store(false, Ordering::Release);
            error!(panic = %panic_message(payload.as_ref()), "overlay_frame_panicked");
        }

        unsafe { original(call.swap_chain.as_raw(), call.sync_interval, call.flags) }
    }

    fn on_resize_buffers(&self, call: ResizeCall, original: ResizeBuffersFn) -> i32 {
        self.notify_resize(ResizeEvent::Impending {
            swap_chain: call.swap_chain,
        });

        let primary = {
            let mut guard = self.scene.lock();
            match guard.as_mut() {
                Some(scene) if scene.handle() == call.swap_chain => {
                    scene.before_resize();
                    true
                }
                _ => false,
            }
        };
        if primary {
            self.notify_resize(ResizeEvent::BeforePrimary);
        }

        let status = unsafe {
            original(
                call.swap_chain.as_raw(),
                call.buffer_count,
                call.width,
                call.height,
                call.format,
                call.flags,
            )
        };
        if status == DXGI_ERROR_INVALID_CALL {
            warn!(
                swap_chain = format_args!("{:#x}", call.swap_chain.addr()),
                width = call.width,
                height = call.height,
                "resize_buffers_invalid_call"
            );
        }

        if primary {
            let size = {
                let mut guard = self.scene.lock();
                guard.as_mut().map(|scene| {
                    // Zero means "match the window"; the binding knows the result.
                    let (width, height) = if call.width == 0 || call.height == 0 {
                        scene.binding().back_buffer_size()
                    } else {
                        (call.width, call.height)
                    };
                    scene.after_resize(width, height);
                    (width, height)
                })
            };
            if let Some((width, height)) = size {
                self.notify_resize(ResizeEvent::AfterPrimary { width, height });
            }
        }
        status
    }

    fn on_set_cursor(&self, cursor: CursorHandle, original: SetCursorFn) -> CursorHandle {
        if self.cursor.should_suppress(cursor) {
            trace!("host_cursor_suppressed");
            return CursorHandle::NULL;
        }
        CursorHandle::from_raw(unsafe { original(cursor.as_raw()) })
    }
}
