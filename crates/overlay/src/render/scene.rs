use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::fonts::BuiltAtlas;
use crate::hooks::native::{CursorHandle, SwapChainHandle};
use crate::input::UiInput;
use crate::layout_file::{prepare_layout_file, LayoutPreparation};

#[derive(Debug, Error)]
pub enum SceneError {
    #[error("failed to bind swap chain {handle:#x}: {message}")]
    Bind { handle: usize, message: String },
    #[error("ui toolkit failed to render: {0}")]
    Render(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoMemoryUsage {
    pub used: u64,
    pub reserved: u64,
}

/// The host's live swap chain and device.
pub trait SwapChainBinding: Send + Sync {
    fn handle(&self) -> SwapChainHandle;
    fn back_buffer_size(&self) -> (u32, u32);
    fn is_fullscreen(&self) -> bool;
    fn attached_display_count(&self) -> u32;
    /// `None` when the adapter does not expose memory introspection.
    fn video_memory_usage(&self) -> Option<VideoMemoryUsage>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowMessage {
    pub window: usize,
    pub message: u32,
    pub wparam: usize,
    pub lparam: isize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDisposition {
    /// The UI handled the message; the host must not see it.
    Consumed,
    PassThrough,
}

/// Per-frame state handed to the toolkit; rebuilt every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderFrameContext {
    pub frame: u64,
    pub wants_capture_mouse_last_frame: bool,
    pub cursor_override: bool,
    pub display_size: (u32, u32),
    pub viewports_enabled: bool,
}

/// Immediate-mode UI context bound to one device.
pub trait UiToolkit: UiInput + Send + 'static {
    fn new_frame(&mut self, frame: &RenderFrameContext);
    /// Submits everything drawn since `new_frame`.
    fn end_frame(&mut self) -> Result<(), SceneError>;
    fn wants_capture_mouse(&self) -> bool;
    fn toolkit_cursors(&self) -> Vec<CursorHandle>;
    fn set_viewports_enabled(&mut self, enabled: bool);
    fn set_font_atlas(&mut self, atlas: Arc<BuiltAtlas>);
    fn set_layout_path(&mut self, path: Option<PathBuf>);
    fn invalidate_device_objects(&mut self);
    fn create_device_objects(&mut self, width: u32, height: u32);
    fn handle_window_message(&mut self, message: &WindowMessage) -> MessageDisposition;
}

/// Builds the binding and toolkit for the first swap chain that presents.
pub trait SceneFactory<U: UiToolkit>: Send + Sync {
    fn create_scene(
        &self,
        swap_chain: SwapChainHandle,
    ) -> Result<(Arc<dyn SwapChainBinding>, U), SceneError>;
}

impl<U, F> SceneFactory<U> for F
where
    U: UiToolkit,
    F: Fn(SwapChainHandle) -> Result<(Arc<dyn SwapChainBinding>, U), SceneError> + Send + Sync,
{
    fn create_scene(
        &self,
        swap_chain: SwapChainHandle,
    ) -> Result<(Arc<dyn SwapChainBinding>, U), SceneError> {
        self(swap_chain)
    }
}

/// Multi-viewport rendering needs a windowed swap chain and a second display.
pub fn viewports_allowed(configured: bool, fullscreen: bool, display_count: u32) -> bool {
    configured && !fullscreen && display_count > 1
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneSettings {
    pub viewports_enabled: bool,
    pub layout_path: Option<PathBuf>,
    pub layout_max_bytes: u64,
}

pub struct RenderScene<U: UiToolkit> {
    binding: Arc<dyn SwapChainBinding>,
    ui: U,
    settings: SceneSettings,
    viewports_enabled: Option<bool>,
    atlas_generation: u64,
    frames: u64,
}

impl<U: UiToolkit> RenderScene<U> {
    pub fn new(binding: Arc<dyn SwapChainBinding>, mut ui: U, settings: SceneSettings) -> Self {
        let layout_path = settings
            .layout_path
            .as_ref()
            .and_then(|path| match prepare_layout_file(path, settings.layout_max_bytes) {
                Ok(LayoutPreparation::Archived { archive, .. }) => {
                    debug!(archive = %archive.display(), "scene_layout_archived");
                    Some(path.clone())
                }
                Ok(_) => Some(path.clone()),
                Err(error) => {
                    warn!(error = %error, "scene_layout_persistence_disabled");
                    None
                }
            });
        ui.set_layout_path(layout_path);

        let (width, height) = binding.back_buffer_size();
        ui.create_device_objects(width, height);
        info!(
            swap_chain = format_args!("{:#x}", binding.handle().addr()),
            width, height, "scene_created"
        );

        Self {
            binding,
            ui,
            settings,
            viewports_enabled: None,
            atlas_generation: 0,
            frames: 0,
        }
    }

    pub fn handle(&self) -> SwapChainHandle {
        self.binding.handle()
    }

    pub fn binding(&self) -> &Arc<dyn SwapChainBinding> {
        &self.binding
    }

    pub fn ui(&self) -> &U {
        &self.ui
    }

    pub fn ui_mut(&mut self) -> &mut U {
        &mut self.ui
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames
    }

    pub fn atlas_generation(&self) -> u64 {
        self.atlas_generation
    }

    pub fn viewports_enabled(&self) -> bool {
        self.viewports_enabled.unwrap_or(false)
    }

    /// Hands a newer atlas to the toolkit. Returns `true` if it switched.
    pub fn sync_font_atlas(&mut self, atlas: Option<Arc<BuiltAtlas>>) -> bool {
        match atlas {
            Some(atlas) if atlas.generation != self.atlas_generation => {
                self.atlas_generation = atlas.generation;
                self.ui.set_font_atlas(atlas);
                true
            }
            _ => false,
        }
    }

    pub fn begin_frame(&mut self, frame: u64, wants_capture_last_frame: bool, cursor_override: bool) {
        let viewports = viewports_allowed(
            self.settings.viewports_enabled,
            self.binding.is_fullscreen(),
            self.binding.attached_display_count(),
        );
        if self.viewports_enabled != Some(viewports) {
            debug!(enabled = viewports, "scene_viewports_changed");
            self.ui.set_viewports_enabled(viewports);
            self.viewports_enabled = Some(viewports);
        }

        let context = RenderFrameContext {
            frame,
            wants_capture_mouse_last_frame: wants_capture_last_frame,
            cursor_override,
            display_size: self.binding.back_buffer_size(),
            viewports_enabled: viewports,
        };
        self.ui.new_frame(&context);
    }

    /// Lets `draw` issue UI commands, then submits the frame.
    pub fn render(&mut self, draw: impl FnOnce(&mut U)) -> Result<(), SceneError> {
        draw(&mut self.ui);
        self.ui.end_frame()?;
        self.frames += 1;
        Ok(())
    }

    pub fn before_resize(&mut self) {
        self.ui.invalidate_device_objects();
    }

    pub fn after_resize(&mut self, width: u32, height: u32) {
        self.ui.create_device_objects(width, height);
    }

    pub fn video_memory_usage(&self) -> Option<VideoMemoryUsage> {
        self.binding.video_memory_usage()
    }
}

impl<U: UiToolkit> Drop for RenderScene<U> {
    fn drop(&mut self) {
        self.ui.invalidate_device_objects();
        info!(
            swap_chain = format_args!("{:#x}", self.binding.handle().addr()),
            frames = self.frames,
            "scene_disposed"
        );
    }
}
