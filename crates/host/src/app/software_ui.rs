use std::collections::HashMap;
use std::fs;
use std::io;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use overlay::{
    BuiltAtlas, CursorHandle, FontRole, MessageDisposition, NavInput, RenderFrameContext,
    SceneError, UiInput, UiToolkit, WindowMessage,
};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::canvas::Canvas;
use super::swap_chain::{cursor, PresentTable, ARROW_CURSOR, HAND_CURSOR};

pub(crate) const WM_KEYDOWN: u32 = 0x0100;
pub(crate) const WM_CHAR: u32 = 0x0102;
pub(crate) const WM_MOUSEMOVE: u32 = 0x0200;
pub(crate) const WM_LBUTTONDOWN: u32 = 0x0201;
pub(crate) const WM_LBUTTONUP: u32 = 0x0202;

pub(crate) const BACKSPACE: char = '\u{8}';

const TEXT_COLOR: [u8; 4] = [230, 232, 238, 255];
const TITLE_TEXT_COLOR: [u8; 4] = [255, 255, 255, 255];
const PANEL_BG: [u8; 4] = [18, 22, 30, 220];
const TITLE_BG: [u8; 4] = [40, 60, 110, 235];
const PANEL_BORDER: [u8; 4] = [90, 110, 160, 255];
const BUTTON_BG: [u8; 4] = [50, 60, 80, 255];
const BUTTON_HOVER: [u8; 4] = [70, 92, 132, 255];
const FIELD_BG: [u8; 4] = [10, 12, 16, 255];
const FOCUS_COLOR: [u8; 4] = [250, 200, 80, 255];
const NOTICE_BG: [u8; 4] = [0, 0, 0, 200];

const PADDING: i32 = 6;
const FALLBACK_LINE_HEIGHT: i32 = 16;
const NOTICE_FRAMES: u32 = 180;

/// Packs client coordinates the way mouse messages carry them.
pub(crate) fn mouse_lparam(x: i32, y: i32) -> isize {
    ((u32::from(y as u16) << 16) | u32::from(x as u16)) as isize
}

fn mouse_position(lparam: isize) -> (i32, i32) {
    let x = (lparam & 0xFFFF) as u16 as i16;
    let y = ((lparam >> 16) & 0xFFFF) as u16 as i16;
    (i32::from(x), i32::from(y))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    fn contains(&self, (x, y): (i32, i32)) -> bool {
        x >= self.x && y >= self.y && x < self.x + self.width && y < self.y + self.height
    }
}

#[derive(Debug, Clone, PartialEq)]
enum DrawCommand {
    Fill { rect: Rect, color: [u8; 4] },
    Outline { rect: Rect, color: [u8; 4] },
    Text { x: i32, y: i32, text: String, color: [u8; 4], role: FontRole },
}

#[derive(Debug)]
struct OpenPanel {
    title: String,
    x: i32,
    y: i32,
    width: i32,
    cursor_y: i32,
    first_command: usize,
}

#[derive(Debug, Clone, PartialEq)]
struct PanelFrame {
    title: String,
    rect: Rect,
    title_bar: Rect,
}

#[derive(Debug, Clone, PartialEq)]
struct Drag {
    title: String,
    grab: (i32, i32),
}

/// Immediate-mode UI rasterized on the CPU into the host's back buffer.
///
/// Panels are laid out top to bottom; buttons and text fields take part in
/// mouse and gamepad focus. Panel positions persist in the layout file.
pub(crate) struct SoftwareUi {
    canvas: Arc<Mutex<Canvas>>,
    cursor_table: Option<&'static PresentTable>,
    atlas: Option<Arc<BuiltAtlas>>,
    display_size: Option<(u32, u32)>,
    layout_path: Option<PathBuf>,
    positions: HashMap<String, (i32, i32)>,
    viewports_enabled: bool,
    gamepad_navigation: bool,
    gamepad_window_visible: bool,
    no_mouse: bool,
    frame: u64,
    commands: Vec<DrawCommand>,
    open_panel: Option<OpenPanel>,
    panels: Vec<PanelFrame>,
    last_panels: Vec<PanelFrame>,
    mouse: (i32, i32),
    drag: Option<Drag>,
    pending_click: Option<(i32, i32)>,
    click: Option<(i32, i32)>,
    nav: Vec<NavInput>,
    last_nav: Vec<NavInput>,
    focus: usize,
    widgets: usize,
    text_focus: Option<usize>,
    typed: String,
    hovering_widget: bool,
    wants_capture: bool,
    notices: Vec<(String, u32)>,
}

impl SoftwareUi {
    pub(crate) fn new(canvas: Arc<Mutex<Canvas>>, cursor_table: Option<&'static PresentTable>) -> Self {
        Self {
            canvas,
            cursor_table,
            atlas: None,
            display_size: None,
            layout_path: None,
            positions: HashMap::new(),
            viewports_enabled: false,
            gamepad_navigation: false,
            gamepad_window_visible: false,
            no_mouse: false,
            frame: 0,
            commands: Vec::new(),
            open_panel: None,
            panels: Vec::new(),
            last_panels: Vec::new(),
            mouse: (-1, -1),
            drag: None,
            pending_click: None,
            click: None,
            nav: Vec::new(),
            last_nav: Vec::new(),
            focus: 0,
            widgets: 0,
            text_focus: None,
            typed: String::new(),
            hovering_widget: false,
            wants_capture: false,
            notices: Vec::new(),
        }
    }

    pub(crate) fn frame(&self) -> u64 {
        self.frame
    }

    pub(crate) fn viewports_enabled(&self) -> bool {
        self.viewports_enabled
    }

    /// Starts a panel. A position stored in the layout file wins over `x, y`.
    pub(crate) fn begin_panel(&mut self, title: &str, x: i32, y: i32, width: i32) {
        self.end_panel();
        let (x, y) = self.positions.get(title).copied().unwrap_or((x, y));
        let line = self.line_height(FontRole::Default);
        let first_command = self.commands.len();
        self.commands.push(DrawCommand::Text {
            x: x + PADDING,
            y: y + PADDING / 2,
            text: title.to_string(),
            color: TITLE_TEXT_COLOR,
            role: FontRole::Default,
        });
        self.open_panel = Some(OpenPanel {
            title: title.to_string(),
            x,
            y,
            width,
            cursor_y: y + line + PADDING * 2,
            first_command,
        });
    }

    pub(crate) fn end_panel(&mut self) {
        let Some(panel) = self.open_panel.take() else {
            return;
        };
        let rect = Rect {
            x: panel.x,
            y: panel.y,
            width: panel.width,
            height: panel.cursor_y - panel.y + PADDING,
        };
        let title_bar = Rect {
            height: self.line_height(FontRole::Default) + PADDING,
            ..rect
        };
        self.commands.insert(
            panel.first_command,
            DrawCommand::Fill {
                rect: title_bar,
                color: TITLE_BG,
            },
        );
        self.commands.insert(
            panel.first_command,
            DrawCommand::Fill {
                rect,
                color: PANEL_BG,
            },
        );
        self.commands.push(DrawCommand::Outline {
            rect,
            color: PANEL_BORDER,
        });
        self.panels.push(PanelFrame {
            title: panel.title,
            rect,
            title_bar,
        });
    }

    pub(crate) fn label(&mut self, text: &str) {
        self.text_line(text, TEXT_COLOR, FontRole::Default);
    }

    pub(crate) fn label_colored(&mut self, text: &str, color: [u8; 4]) {
        self.text_line(text, color, FontRole::Default);
    }

    pub(crate) fn mono_label(&mut self, text: &str) {
        self.text_line(text, TEXT_COLOR, FontRole::Mono);
    }

    /// Returns `true` on the frame the button is clicked or activated.
    pub(crate) fn button(&mut self, text: &str) -> bool {
        let Some(rect) = self.widget_rect() else {
            return false;
        };
        let id = self.next_widget();
        let hovered = self.hovered(rect);
        let focused = self.nav_focused(id);
        let clicked = self.click.is_some_and(|point| rect.contains(point))
            || (focused && self.nav_pressed(NavInput::Activate));

        self.commands.push(DrawCommand::Fill {
            rect,
            color: if hovered || focused { BUTTON_HOVER } else { BUTTON_BG },
        });
        if focused {
            self.commands.push(DrawCommand::Outline {
                rect,
                color: FOCUS_COLOR,
            });
        }
        self.commands.push(DrawCommand::Text {
            x: rect.x + 4,
            y: rect.y + 2,
            text: text.to_string(),
            color: TEXT_COLOR,
            role: FontRole::Default,
        });
        if clicked {
            debug!(button = text, "ui_button_clicked");
        }
        clicked
    }

    /// Single-line editor. Returns `true` when `value` changed this frame.
    pub(crate) fn text_field(&mut self, label: &str, value: &mut String) -> bool {
        let Some(rect) = self.widget_rect() else {
            return false;
        };
        let id = self.next_widget();
        self.hovered(rect);
        let focused = self.nav_focused(id);
        if self.click.is_some_and(|point| rect.contains(point))
            || (focused && self.nav_pressed(NavInput::Activate))
        {
            self.text_focus = Some(id);
        }

        let editing = self.text_focus == Some(id);
        let mut changed = false;
        if editing {
            for ch in mem::take(&mut self.typed).chars() {
                if ch == BACKSPACE {
                    changed |= value.pop().is_some();
                } else if !ch.is_control() {
                    value.push(ch);
                    changed = true;
                }
            }
            if self.nav_pressed(NavInput::Cancel) {
                self.text_focus = None;
            }
        }

        self.commands.push(DrawCommand::Fill {
            rect,
            color: FIELD_BG,
        });
        if editing || focused {
            self.commands.push(DrawCommand::Outline {
                rect,
                color: FOCUS_COLOR,
            });
        }
        let caret = if editing { "_" } else { "" };
        self.commands.push(DrawCommand::Text {
            x: rect.x + 4,
            y: rect.y + 2,
            text: format!("{label}: {value}{caret}"),
            color: TEXT_COLOR,
            role: FontRole::Default,
        });
        changed
    }

    fn text_line(&mut self, text: &str, color: [u8; 4], role: FontRole) {
        let line = self.line_height(role);
        let Some(panel) = self.open_panel.as_mut() else {
            return;
        };
        let (x, y) = (panel.x + PADDING, panel.cursor_y);
        panel.cursor_y += line + 2;
        self.commands.push(DrawCommand::Text {
            x,
            y,
            text: text.to_string(),
            color,
            role,
        });
    }

    fn widget_rect(&mut self) -> Option<Rect> {
        let line = self.line_height(FontRole::Default);
        let panel = self.open_panel.as_mut()?;
        let rect = Rect {
            x: panel.x + PADDING,
            y: panel.cursor_y,
            width: panel.width - PADDING * 2,
            height: line + 4,
        };
        panel.cursor_y += rect.height + 4;
        Some(rect)
    }

    fn next_widget(&mut self) -> usize {
        let id = self.widgets;
        self.widgets += 1;
        id
    }

    fn hovered(&mut self, rect: Rect) -> bool {
        let hovered = !self.no_mouse && rect.contains(self.mouse);
        self.hovering_widget |= hovered;
        hovered
    }

    fn nav_focused(&self, id: usize) -> bool {
        self.gamepad_navigation && self.focus == id
    }

    fn nav_pressed(&self, input: NavInput) -> bool {
        self.nav.contains(&input) && !self.last_nav.contains(&input)
    }

    fn line_height(&self, role: FontRole) -> i32 {
        self.atlas
            .as_ref()
            .and_then(|atlas| atlas.font(role))
            .map_or(FALLBACK_LINE_HEIGHT, |font| font.line_height as i32)
    }

    fn over_panel(&self, point: (i32, i32)) -> bool {
        self.last_panels.iter().any(|panel| panel.rect.contains(point))
    }

    fn draw_gamepad_window(&mut self) {
        let Some((width, _)) = self.display_size else {
            return;
        };
        let focus = format!("focus: {} / {}", self.focus + 1, self.widgets.max(1));
        let navigation = if self.gamepad_navigation { "on" } else { "off" };
        self.begin_panel("Gamepad", width as i32 - 230, 10, 220);
        self.label(&format!("navigation: {navigation}"));
        self.mono_label(&focus);
        self.end_panel();
    }

    fn draw_notices(&mut self) {
        let Some((_, height)) = self.display_size else {
            return;
        };
        let line = self.line_height(FontRole::Default);
        let mut y = height as i32 - PADDING;
        for (message, _) in self.notices.iter().rev() {
            y -= line + PADDING;
            let width = self
                .atlas
                .as_ref()
                .and_then(|atlas| atlas.font(FontRole::Default))
                .map_or(200, |font| font.measure(message) as i32)
                + PADDING * 2;
            self.commands.push(DrawCommand::Fill {
                rect: Rect {
                    x: PADDING,
                    y,
                    width,
                    height: line + PADDING,
                },
                color: NOTICE_BG,
            });
            self.commands.push(DrawCommand::Text {
                x: PADDING * 2,
                y: y + PADDING / 2,
                text: message.clone(),
                color: TEXT_COLOR,
                role: FontRole::Default,
            });
        }
        for (_, frames) in &mut self.notices {
            *frames = frames.saturating_sub(1);
        }
        self.notices.retain(|(_, frames)| *frames > 0);
    }

    fn advance_focus(&mut self) {
        if !self.gamepad_navigation || self.widgets == 0 {
            return;
        }
        let count = self.widgets;
        if self.focus >= count {
            self.focus = 0;
        }
        if [NavInput::DpadDown, NavInput::FocusNext, NavInput::LStickDown]
            .into_iter()
            .any(|input| self.nav_pressed(input))
        {
            self.focus = (self.focus + 1) % count;
        }
        if [NavInput::DpadUp, NavInput::FocusPrev, NavInput::LStickUp]
            .into_iter()
            .any(|input| self.nav_pressed(input))
        {
            self.focus = (self.focus + count - 1) % count;
        }
    }

    fn rasterize(&self) {
        let mut canvas = self.canvas.lock();
        for command in &self.commands {
            match command {
                DrawCommand::Fill { rect, color } => {
                    canvas.fill_rect(rect.x, rect.y, rect.width, rect.height, *color);
                }
                DrawCommand::Outline { rect, color } => {
                    canvas.outline_rect(rect.x, rect.y, rect.width, rect.height, *color);
                }
                DrawCommand::Text {
                    x,
                    y,
                    text,
                    color,
                    role,
                } => {
                    if let Some(atlas) = &self.atlas {
                        draw_text(&mut canvas, atlas, *role, (*x, *y), text, *color);
                    }
                }
            }
        }
    }

    fn request_cursor(&self) {
        let Some(table) = self.cursor_table else {
            return;
        };
        if self.hovering_widget {
            table.set_cursor(HAND_CURSOR);
        } else if self.wants_capture {
            table.set_cursor(ARROW_CURSOR);
        }
    }

    fn save_layout(&self) {
        let Some(path) = &self.layout_path else {
            return;
        };
        if self.positions.is_empty() {
            return;
        }
        if let Err(error) = fs::write(path, format_layout(&self.positions)) {
            warn!(path = %path.display(), error = %error, "ui_layout_save_failed");
        }
    }

    #[cfg(test)]
    fn panel_rect(&self, title: &str) -> Option<Rect> {
        self.last_panels
            .iter()
            .find(|panel| panel.title == title)
            .map(|panel| panel.rect)
    }
}

fn draw_text(
    canvas: &mut Canvas,
    atlas: &BuiltAtlas,
    role: FontRole,
    (mut x, y): (i32, i32),
    text: &str,
    color: [u8; 4],
) {
    let Some(font) = atlas.font(role) else {
        return;
    };
    for ch in text.chars() {
        let Some(glyph) = font.glyph(ch).or_else(|| font.glyph('?')) else {
            continue;
        };
        for gy in 0..glyph.height {
            for gx in 0..glyph.width {
                let coverage = atlas.coverage_at(glyph.x + gx, glyph.y + gy);
                if coverage > 0 {
                    canvas.blend_pixel(x + gx as i32, y + gy as i32, color, coverage);
                }
            }
        }
        x += glyph.advance as i32;
    }
}

fn format_layout(positions: &HashMap<String, (i32, i32)>) -> String {
    let mut titles: Vec<_> = positions.keys().collect();
    titles.sort();
    titles
        .into_iter()
        .map(|title| {
            let (x, y) = positions[title];
            format!("[Window][{title}]\nPos={x},{y}\n\n")
        })
        .collect()
}

fn parse_layout(raw: &str) -> HashMap<String, (i32, i32)> {
    let mut positions = HashMap::new();
    let mut current = None;
    for line in raw.lines().map(str::trim) {
        if let Some(title) = line
            .strip_prefix("[Window][")
            .and_then(|rest| rest.strip_suffix(']'))
        {
            current = Some(title.to_string());
        } else if let (Some(title), Some(pos)) = (&current, line.strip_prefix("Pos=")) {
            let parsed = pos
                .split_once(',')
                .and_then(|(x, y)| Some((x.trim().parse().ok()?, y.trim().parse().ok()?)));
            if let Some(position) = parsed {
                positions.insert(title.clone(), position);
            }
        }
    }
    positions
}

fn load_layout(path: &Path) -> HashMap<String, (i32, i32)> {
    match fs::read_to_string(path) {
        Ok(raw) => parse_layout(&raw),
        Err(error) if error.kind() == io::ErrorKind::NotFound => HashMap::new(),
        Err(error) => {
            warn!(path = %path.display(), error = %error, "ui_layout_load_failed");
            HashMap::new()
        }
    }
}

impl UiInput for SoftwareUi {
    fn wants_text_input(&self) -> bool {
        self.text_focus.is_some()
    }

    fn clear_no_mouse_flag(&mut self) {
        self.no_mouse = false;
    }

    fn push_nav_input(&mut self, input: NavInput, _value: f32) {
        if !self.nav.contains(&input) {
            self.nav.push(input);
        }
    }

    fn set_gamepad_navigation(&mut self, enabled: bool) {
        self.gamepad_navigation = enabled;
        self.no_mouse = enabled;
        self.focus = 0;
    }

    fn set_gamepad_window_visible(&mut self, visible: bool) {
        self.gamepad_window_visible = visible;
    }

    fn notify(&mut self, message: &str) {
        self.notices.push((message.to_string(), NOTICE_FRAMES));
    }
}

impl UiToolkit for SoftwareUi {
    fn new_frame(&mut self, frame: &RenderFrameContext) {
        self.frame = frame.frame;
        if self.display_size.is_some() {
            self.display_size = Some(frame.display_size);
        }
        self.commands.clear();
        self.panels.clear();
        self.open_panel = None;
        self.widgets = 0;
        self.hovering_widget = false;
        self.click = self.pending_click.take();
    }

    fn end_frame(&mut self) -> Result<(), SceneError> {
        self.end_panel();
        if self.display_size.is_none() {
            return Err(SceneError::Render(
                "device objects have not been created".to_string(),
            ));
        }
        if self.gamepad_window_visible {
            self.draw_gamepad_window();
        }
        self.draw_notices();
        self.advance_focus();

        let mouse = self.mouse;
        self.wants_capture = self.drag.is_some()
            || (!self.no_mouse && self.panels.iter().any(|panel| panel.rect.contains(mouse)));
        self.rasterize();
        self.request_cursor();

        self.last_panels = mem::take(&mut self.panels);
        self.last_nav = mem::take(&mut self.nav);
        self.typed.clear();
        self.click = None;
        Ok(())
    }

    fn wants_capture_mouse(&self) -> bool {
        self.wants_capture
    }

    fn toolkit_cursors(&self) -> Vec<CursorHandle> {
        vec![cursor(ARROW_CURSOR), cursor(HAND_CURSOR)]
    }

    fn set_viewports_enabled(&mut self, enabled: bool) {
        self.viewports_enabled = enabled;
    }

    fn set_font_atlas(&mut self, atlas: Arc<BuiltAtlas>) {
        debug!(generation = atlas.generation, "ui_font_atlas_changed");
        self.atlas = Some(atlas);
    }

    fn set_layout_path(&mut self, path: Option<PathBuf>) {
        self.positions = path.as_deref().map(load_layout).unwrap_or_default();
        self.layout_path = path;
    }

    fn invalidate_device_objects(&mut self) {
        self.display_size = None;
    }

    fn create_device_objects(&mut self, width: u32, height: u32) {
        debug!(width, height, "ui_device_objects_created");
        self.display_size = Some((width, height));
    }

    fn handle_window_message(&mut self, message: &WindowMessage) -> MessageDisposition {
        match message.message {
            WM_MOUSEMOVE => {
                self.mouse = mouse_position(message.lparam);
                if let Some(drag) = &self.drag {
                    self.positions.insert(
                        drag.title.clone(),
                        (self.mouse.0 - drag.grab.0, self.mouse.1 - drag.grab.1),
                    );
                    return MessageDisposition::Consumed;
                }
                if self.over_panel(self.mouse) {
                    MessageDisposition::Consumed
                } else {
                    MessageDisposition::PassThrough
                }
            }
            WM_LBUTTONDOWN => {
                let point = mouse_position(message.lparam);
                self.mouse = point;
                match self
                    .last_panels
                    .iter()
                    .rev()
                    .find(|panel| panel.rect.contains(point))
                {
                    Some(panel) => {
                        if panel.title_bar.contains(point) {
                            self.drag = Some(Drag {
                                title: panel.title.clone(),
                                grab: (point.0 - panel.rect.x, point.1 - panel.rect.y),
                            });
                        }
                        MessageDisposition::Consumed
                    }
                    None => {
                        self.text_focus = None;
                        MessageDisposition::PassThrough
                    }
                }
            }
            WM_LBUTTONUP => {
                let point = mouse_position(message.lparam);
                self.mouse = point;
                if let Some(drag) = self.drag.take() {
                    debug!(panel = %drag.title, "ui_panel_moved");
                    return MessageDisposition::Consumed;
                }
                if self.over_panel(point) {
                    self.pending_click = Some(point);
                    MessageDisposition::Consumed
                } else {
                    MessageDisposition::PassThrough
                }
            }
            WM_CHAR if self.text_focus.is_some() => {
                if let Some(ch) = char::from_u32(message.wparam as u32) {
                    self.typed.push(ch);
                }
                MessageDisposition::Consumed
            }
            WM_KEYDOWN if self.text_focus.is_some() => MessageDisposition::Consumed,
            _ => MessageDisposition::PassThrough,
        }
    }
}

impl Drop for SoftwareUi {
    fn drop(&mut self) {
        self.save_layout();
    }
}

#[cfg(test)]
mod tests {
    use overlay::fonts::default_font_builder;
    use overlay::FontSizes;
    use tempfile::TempDir;

    use super::*;

    const WIDTH: u32 = 640;
    const HEIGHT: u32 = 480;

    fn atlas() -> Arc<BuiltAtlas> {
        Arc::new(
            default_font_builder(&FontSizes::default())
                .build(1)
                .expect("default atlas"),
        )
    }

    fn ui() -> SoftwareUi {
        let canvas = Arc::new(Mutex::new(Canvas::new(WIDTH, HEIGHT)));
        let mut ui = SoftwareUi::new(canvas, None);
        ui.set_font_atlas(atlas());
        ui.create_device_objects(WIDTH, HEIGHT);
        ui
    }

    fn context(frame: u64) -> RenderFrameContext {
        RenderFrameContext {
            frame,
            wants_capture_mouse_last_frame: false,
            cursor_override: true,
            display_size: (WIDTH, HEIGHT),
            viewports_enabled: false,
        }
    }

    fn message(message: u32, wparam: usize, (x, y): (i32, i32)) -> WindowMessage {
        WindowMessage {
            window: 1,
            message,
            wparam,
            lparam: mouse_lparam(x, y),
        }
    }

    /// Runs one frame with a panel at (10, 10) holding the given buttons.
    fn buttons_frame(ui: &mut SoftwareUi, frame: u64, labels: &[&str]) -> Vec<bool> {
        ui.new_frame(&context(frame));
        ui.begin_panel("Stats", 10, 10, 200);
        let clicked = labels.iter().map(|label| ui.button(label)).collect();
        ui.end_panel();
        ui.end_frame().expect("end frame");
        clicked
    }

    fn first_widget_point(ui: &SoftwareUi) -> (i32, i32) {
        let line = ui.line_height(FontRole::Default);
        (20, 10 + line + PADDING * 2 + 2)
    }

    #[test]
    fn lparam_round_trips_negative_coordinates() {
        assert_eq!(mouse_position(mouse_lparam(-5, 300)), (-5, 300));
    }

    #[test]
    fn click_inside_a_panel_is_consumed_and_reaches_the_button() {
        let mut ui = ui();
        assert_eq!(buttons_frame(&mut ui, 1, &["Rebuild"]), vec![false]);

        let point = first_widget_point(&ui);
        assert_eq!(
            ui.handle_window_message(&message(WM_LBUTTONDOWN, 0, point)),
            MessageDisposition::Consumed
        );
        assert_eq!(
            ui.handle_window_message(&message(WM_LBUTTONUP, 0, point)),
            MessageDisposition::Consumed
        );

        assert_eq!(buttons_frame(&mut ui, 2, &["Rebuild"]), vec![true]);
        assert_eq!(buttons_frame(&mut ui, 3, &["Rebuild"]), vec![false]);
    }

    #[test]
    fn messages_outside_panels_pass_through() {
        let mut ui = ui();
        buttons_frame(&mut ui, 1, &["Rebuild"]);

        for kind in [WM_MOUSEMOVE, WM_LBUTTONDOWN, WM_LBUTTONUP] {
            assert_eq!(
                ui.handle_window_message(&message(kind, 0, (600, 400))),
                MessageDisposition::PassThrough
            );
        }
        assert_eq!(
            ui.handle_window_message(&message(WM_CHAR, 'a' as usize, (0, 0))),
            MessageDisposition::PassThrough
        );
    }

    #[test]
    fn hovering_a_panel_captures_the_mouse() {
        let mut ui = ui();
        buttons_frame(&mut ui, 1, &["Rebuild"]);
        assert!(!ui.wants_capture_mouse());

        ui.handle_window_message(&message(WM_MOUSEMOVE, 0, (30, 20)));
        buttons_frame(&mut ui, 2, &["Rebuild"]);

        assert!(ui.wants_capture_mouse());
    }

    #[test]
    fn frames_fail_until_device_objects_exist() {
        let mut ui = ui();
        ui.invalidate_device_objects();
        ui.new_frame(&context(1));

        assert!(ui.end_frame().is_err());

        ui.create_device_objects(WIDTH, HEIGHT);
        ui.new_frame(&context(2));
        ui.end_frame().expect("device objects restored");
    }

    #[test]
    fn text_field_collects_typed_characters() {
        let mut ui = ui();
        let mut value = String::from("ab");
        let run = |ui: &mut SoftwareUi, value: &mut String, frame| {
            ui.new_frame(&context(frame));
            ui.begin_panel("Stats", 10, 10, 200);
            let changed = ui.text_field("Title", value);
            ui.end_panel();
            ui.end_frame().expect("end frame");
            changed
        };
        run(&mut ui, &mut value, 1);

        let point = first_widget_point(&ui);
        ui.handle_window_message(&message(WM_LBUTTONDOWN, 0, point));
        ui.handle_window_message(&message(WM_LBUTTONUP, 0, point));
        run(&mut ui, &mut value, 2);
        assert!(ui.wants_text_input());

        for ch in ['c', BACKSPACE, 'd'] {
            assert_eq!(
                ui.handle_window_message(&message(WM_CHAR, ch as usize, (0, 0))),
                MessageDisposition::Consumed
            );
        }
        assert!(run(&mut ui, &mut value, 3));
        assert_eq!(value, "abd");

        ui.handle_window_message(&message(WM_LBUTTONDOWN, 0, (600, 400)));
        assert!(!ui.wants_text_input());
    }

    #[test]
    fn gamepad_navigation_moves_focus_and_activates() {
        let mut ui = ui();
        ui.set_gamepad_navigation(true);
        ui.clear_no_mouse_flag();

        ui.push_nav_input(NavInput::DpadDown, 1.0);
        assert_eq!(buttons_frame(&mut ui, 1, &["First", "Second"]), vec![false, false]);

        ui.push_nav_input(NavInput::Activate, 1.0);
        assert_eq!(buttons_frame(&mut ui, 2, &["First", "Second"]), vec![false, true]);

        // Held inputs act once.
        ui.push_nav_input(NavInput::Activate, 1.0);
        assert_eq!(buttons_frame(&mut ui, 3, &["First", "Second"]), vec![false, false]);
    }

    #[test]
    fn text_is_rasterized_into_the_canvas() {
        let canvas = Arc::new(Mutex::new(Canvas::new(WIDTH, HEIGHT)));
        let mut ui = SoftwareUi::new(Arc::clone(&canvas), None);
        ui.create_device_objects(WIDTH, HEIGHT);

        ui.new_frame(&context(1));
        ui.begin_panel("Stats", 10, 10, 200);
        ui.end_frame().expect("frame without fonts");
        let without_text = canvas.lock().clone();

        ui.set_font_atlas(atlas());
        canvas.lock().clear([0, 0, 0, 0]);
        ui.new_frame(&context(2));
        ui.begin_panel("Stats", 10, 10, 200);
        ui.end_frame().expect("frame with fonts");

        assert_ne!(*canvas.lock(), without_text);
    }

    #[test]
    fn notices_are_drawn_then_expire() {
        let mut ui = ui();
        ui.notify("Gamepad navigation enabled");

        for frame in 0..u64::from(NOTICE_FRAMES) {
            assert_eq!(ui.notices.len(), 1, "frame {frame}");
            ui.new_frame(&context(frame));
            ui.end_frame().expect("end frame");
        }

        assert!(ui.notices.is_empty());
    }

    #[test]
    fn dragged_panel_position_is_saved_and_restored() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("overlay_layout.ini");

        let mut ui = ui();
        ui.set_layout_path(Some(path.clone()));
        buttons_frame(&mut ui, 1, &["Rebuild"]);
        ui.handle_window_message(&message(WM_LBUTTONDOWN, 0, (15, 12)));
        ui.handle_window_message(&message(WM_MOUSEMOVE, 0, (115, 62)));
        ui.handle_window_message(&message(WM_LBUTTONUP, 0, (115, 62)));
        drop(ui);

        let saved = fs::read_to_string(&path).expect("layout saved");
        assert!(saved.contains("[Window][Stats]"));
        assert!(saved.contains("Pos=110,60"));

        let mut restored = self::ui();
        restored.set_layout_path(Some(path));
        buttons_frame(&mut restored, 1, &["Rebuild"]);
        let rect = restored.panel_rect("Stats").expect("panel drawn");
        assert_eq!((rect.x, rect.y), (110, 60));
    }

    #[test]
    fn layout_parser_skips_malformed_entries() {
        let parsed = parse_layout("[Window][A]\nPos=1,2\n[Window][B]\nPos=x,2\nSize=3,4\n");

        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed.get("A"), Some(&(1, 2)));
    }
}
