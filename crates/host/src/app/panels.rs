use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use overlay::{
    Completion, DeferredTexture, FontAtlasPipeline, FontRole, FrameMetricsSnapshot, GpuTexture,
    OverlayManager, SubscriptionId, VideoMemoryUsage,
};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::software_ui::SoftwareUi;

pub(crate) const FRAME_WINDOW_LEN: usize = 120;
const WARN_COLOR: [u8; 4] = [250, 190, 70, 255];

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct RollingMsStats {
    pub last_ms: f32,
    pub avg_ms: f32,
    pub max_ms: f32,
}

/// Host frame times over the last `FRAME_WINDOW_LEN` frames.
#[derive(Debug)]
pub(crate) struct RollingWindowMs {
    samples_ms: [f32; FRAME_WINDOW_LEN],
    head: usize,
    count: usize,
    sum_ms: f32,
    last_ms: f32,
}

impl Default for RollingWindowMs {
    fn default() -> Self {
        Self {
            samples_ms: [0.0; FRAME_WINDOW_LEN],
            head: 0,
            count: 0,
            sum_ms: 0.0,
            last_ms: 0.0,
        }
    }
}

impl RollingWindowMs {
    pub(crate) fn push(&mut self, duration: Duration) {
        self.push_ms(duration.as_secs_f32() * 1000.0);
    }

    fn push_ms(&mut self, value_ms: f32) {
        self.last_ms = value_ms;
        let evicted = if self.count < FRAME_WINDOW_LEN {
            self.count += 1;
            0.0
        } else {
            self.samples_ms[self.head]
        };
        self.samples_ms[self.head] = value_ms;
        self.head = (self.head + 1) % FRAME_WINDOW_LEN;
        self.sum_ms += value_ms - evicted;
    }

    pub(crate) fn snapshot(&self) -> RollingMsStats {
        if self.count == 0 {
            return RollingMsStats::default();
        }

        let max_ms = self.samples_ms[..self.count]
            .iter()
            .copied()
            .fold(f32::MIN, f32::max);
        RollingMsStats {
            last_ms: self.last_ms,
            avg_ms: self.sum_ms / self.count as f32,
            max_ms,
        }
    }
}

/// Host state mirrored into the panels once per frame.
#[derive(Debug, Default)]
pub(crate) struct HostStatus {
    pub cursor_override: bool,
    pub gamepad_navigation: bool,
    pub video_memory: Option<VideoMemoryUsage>,
    pub live_thumbnails: usize,
    pub window_title: String,
}

/// Actions the panels ask the host loop to carry out.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct PanelRequests {
    pub rebuild_fonts: bool,
    pub toggle_cursor_override: bool,
    pub upload_thumbnail: bool,
    pub window_title: Option<String>,
    pub quit: bool,
}

#[derive(Debug, Default)]
pub(crate) struct PanelShared {
    pub status: HostStatus,
    pub host_frame: RollingWindowMs,
    pub requests: PanelRequests,
}

pub(crate) type SharedPanels = Arc<Mutex<PanelShared>>;

/// Subscribes the stats and controls panels to `manager`'s draw callbacks.
pub(crate) fn install_panels(
    manager: &OverlayManager<SoftwareUi>,
    shared: &SharedPanels,
) -> [SubscriptionId; 2] {
    let metrics = manager.metrics();
    let fonts = manager.fonts().clone();
    let stats_shared = Arc::clone(shared);
    let stats = manager.on_draw(move |ui| {
        draw_stats_panel(ui, &metrics.snapshot(), &fonts, &stats_shared.lock());
    });

    let controls_shared = Arc::clone(shared);
    let mut title = shared.lock().status.window_title.clone();
    let controls = manager.on_draw(move |ui| {
        draw_controls_panel(ui, &mut title, &mut controls_shared.lock());
    });
    [stats, controls]
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

fn draw_stats_panel(
    ui: &mut SoftwareUi,
    metrics: &FrameMetricsSnapshot,
    fonts: &FontAtlasPipeline,
    shared: &PanelShared,
) {
    let host = shared.host_frame.snapshot();
    let frame_line = format!(
        "frame {}  viewports {}",
        ui.frame(),
        on_off(ui.viewports_enabled())
    );

    ui.begin_panel("Overlay", 10, 10, 300);
    ui.label(&format!(
        "fps {:.1}  draw {:.2} ms (peak {:.2})",
        metrics.fps, metrics.draw_time_ms, metrics.peak_draw_time_ms
    ));
    ui.mono_label(&format!(
        "presents {}  rendered {}",
        metrics.present_calls, metrics.rendered_frames
    ));
    ui.mono_label(&format!(
        "host {:.2}/{:.2}/{:.2} ms",
        host.last_ms, host.avg_ms, host.max_ms
    ));
    match shared.status.video_memory {
        Some(usage) => ui.mono_label(&format!(
            "vram {} / {} MiB",
            usage.used >> 20,
            usage.reserved >> 20
        )),
        None => ui.mono_label("vram n/a"),
    }
    match fonts.handle(FontRole::Mono).try_font() {
        Some(font) => ui.mono_label(&format!("atlas generation {}", font.generation())),
        None => ui.label_colored("fonts building", WARN_COLOR),
    }
    ui.mono_label(&frame_line);
    ui.end_panel();
}

fn draw_controls_panel(ui: &mut SoftwareUi, title: &mut String, shared: &mut PanelShared) {
    ui.begin_panel("Controls", 10, 220, 300);
    if ui.button("Rebuild fonts") {
        shared.requests.rebuild_fonts = true;
    }
    let cursor_label = format!(
        "Cursor override: {}",
        on_off(shared.status.cursor_override)
    );
    if ui.button(&cursor_label) {
        shared.requests.toggle_cursor_override = true;
    }
    if ui.button("Upload thumbnail") {
        shared.requests.upload_thumbnail = true;
    }
    ui.label(&format!(
        "thumbnails live: {}",
        shared.status.live_thumbnails
    ));
    ui.label(&format!(
        "gamepad navigation: {}",
        on_off(shared.status.gamepad_navigation)
    ));
    if ui.text_field("Title", title) {
        shared.requests.window_title = Some(title.clone());
    }
    if ui.button("Quit") {
        shared.requests.quit = true;
    }
    ui.end_panel();
}

/// Stand-in GPU texture uploaded on the render thread.
#[derive(Debug)]
pub(crate) struct Thumbnail {
    id: u64,
    live: Arc<AtomicUsize>,
}

impl Thumbnail {
    fn upload(id: u64, live: &Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        debug!(id, "thumbnail_uploaded");
        Self {
            id,
            live: Arc::clone(live),
        }
    }
}

impl GpuTexture for Thumbnail {
    fn release_gpu(self: Box<Self>) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        debug!(id = self.id, "thumbnail_released");
    }
}

/// The current thumbnail plus any upload still queued on the render thread.
/// Replaced thumbnails are released once no frame can sample them.
#[derive(Default)]
pub(crate) struct ThumbnailSlot {
    current: Option<DeferredTexture<Thumbnail>>,
    pending: Option<Completion<Thumbnail>>,
    next_id: u64,
    live: Arc<AtomicUsize>,
}

impl ThumbnailSlot {
    pub(crate) fn request(&mut self, manager: &OverlayManager<SoftwareUi>) {
        if self.pending.is_some() {
            return;
        }
        self.next_id += 1;
        let id = self.next_id;
        let live = Arc::clone(&self.live);
        self.pending = Some(manager.schedule_before_render(move || Ok(Thumbnail::upload(id, &live))));
    }

    pub(crate) fn poll(&mut self, manager: &OverlayManager<SoftwareUi>) {
        let Some(result) = self.pending.as_ref().and_then(Completion::try_result) else {
            return;
        };
        self.pending = None;
        match result {
            Ok(thumbnail) => {
                let replacement = DeferredTexture::new(thumbnail, manager.reclaimer());
                if let Some(previous) = self.current.replace(replacement) {
                    previous.dispose();
                }
            }
            Err(error) => warn!(error = %error, "thumbnail_upload_failed"),
        }
    }

    pub(crate) fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use overlay::{DeferredResourceReclaimer, MessageDisposition, UiToolkit, WindowMessage};

    use super::super::canvas::Canvas;
    use super::super::software_ui::{mouse_lparam, WM_LBUTTONDOWN, WM_LBUTTONUP};
    use super::*;

    #[test]
    fn partial_window_average_uses_current_sample_count() {
        let mut window = RollingWindowMs::default();
        window.push_ms(1.0);
        window.push_ms(2.0);
        window.push_ms(3.0);
        let snapshot = window.snapshot();

        assert_eq!(snapshot.last_ms, 3.0);
        assert!((snapshot.avg_ms - 2.0).abs() < 0.0001);
        assert_eq!(snapshot.max_ms, 3.0);
    }

    #[test]
    fn evicted_maximum_no_longer_counts() {
        let mut window = RollingWindowMs::default();
        window.push_ms(100.0);
        for _ in 1..FRAME_WINDOW_LEN {
            window.push_ms(10.0);
        }
        window.push(Duration::from_millis(20));
        let snapshot = window.snapshot();

        let expected_avg = ((FRAME_WINDOW_LEN as f32 - 1.0) * 10.0 + 20.0) / FRAME_WINDOW_LEN as f32;
        assert!((snapshot.avg_ms - expected_avg).abs() < 0.001);
        assert!((snapshot.max_ms - 20.0).abs() < 0.001);
    }

    fn frame(ui: &mut SoftwareUi, shared: &mut PanelShared, title: &mut String, frame: u64) {
        ui.new_frame(&overlay::RenderFrameContext {
            frame,
            wants_capture_mouse_last_frame: false,
            cursor_override: true,
            display_size: (640, 480),
            viewports_enabled: false,
        });
        draw_controls_panel(ui, title, shared);
        ui.end_frame().expect("end frame");
    }

    fn click(ui: &mut SoftwareUi, point: (i32, i32)) {
        for message in [WM_LBUTTONDOWN, WM_LBUTTONUP] {
            let disposition = ui.handle_window_message(&WindowMessage {
                window: 1,
                message,
                wparam: 0,
                lparam: mouse_lparam(point.0, point.1),
            });
            assert_eq!(disposition, MessageDisposition::Consumed);
        }
    }

    #[test]
    fn controls_panel_buttons_raise_requests() {
        let canvas = Arc::new(Mutex::new(Canvas::new(640, 480)));
        let mut ui = SoftwareUi::new(canvas, None);
        ui.create_device_objects(640, 480);
        let mut shared = PanelShared::default();
        let mut title = String::new();

        frame(&mut ui, &mut shared, &mut title, 1);
        // Without an atlas every line is 16px: title bar, then the first
        // button starts 28px below the panel origin.
        click(&mut ui, (30, 220 + 16 + 12 + 4));
        frame(&mut ui, &mut shared, &mut title, 2);

        assert_eq!(
            shared.requests,
            PanelRequests {
                rebuild_fonts: true,
                ..PanelRequests::default()
            }
        );
    }

    #[test]
    fn replaced_thumbnail_is_released_after_its_frame() {
        let reclaimer = Arc::new(DeferredResourceReclaimer::default());
        let live = Arc::new(AtomicUsize::new(0));

        let first = DeferredTexture::new(Thumbnail::upload(1, &live), &reclaimer);
        let _second = DeferredTexture::new(Thumbnail::upload(2, &live), &reclaimer);
        assert_eq!(live.load(Ordering::SeqCst), 2);

        let frame = reclaimer.begin_frame();
        first.dispose();
        assert_eq!(live.load(Ordering::SeqCst), 2);

        reclaimer.drain_after_draw(frame);
        assert_eq!(live.load(Ordering::SeqCst), 1);
    }
}
