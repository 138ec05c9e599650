use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::error;

pub mod config;
pub mod fonts;
pub mod hooks;
pub mod input;
pub mod layout_file;
pub mod render;

pub use config::{ConfigError, FontSizes, OverlayConfig};
pub use fonts::{
    BuiltAtlas, BuiltFont, FontAtlasPipeline, FontError, FontHandle, FontRole, ResolvedFont,
};
pub use hooks::{
    CursorHandle, DetourTargets, FrameHooks, HookInstallError, PresentFn, PresentInterceptor,
    ResizeBuffersFn, SetCursorFn, SlotWriter, SwapChainHandle, WritableMemory,
};
pub use input::{GamepadButton, GamepadState, HostInput, InputBridge, NavInput, UiInput};
pub use render::callbacks::{CallbackError, Completion};
pub use render::manager::{OverlayManager, ResizeEvent, SubscriptionId};
pub use render::metrics::{FrameMetricsSnapshot, MetricsHandle};
pub use render::reclaim::{DeferredResourceReclaimer, DeferredTexture, GpuTexture};
pub use render::scene::{
    MessageDisposition, RenderFrameContext, SceneError, SceneFactory, SwapChainBinding,
    UiToolkit, VideoMemoryUsage, WindowMessage,
};

pub const ROOT_ENV_VAR: &str = "OVERLAY_ROOT";
pub const CONFIG_FILE_NAME: &str = "overlay.json";

/// Native libraries the DXGI backend cannot run without.
pub const REQUIRED_RENDER_LIBRARIES: [&str; 3] = ["d3d11.dll", "dxgi.dll", "d3dcompiler_47.dll"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayPaths {
    pub root: PathBuf,
    pub config_path: PathBuf,
}

impl OverlayPaths {
    pub fn from_root(root: PathBuf) -> Self {
        Self {
            config_path: root.join(CONFIG_FILE_NAME),
            root,
        }
    }

    pub fn layout_path(&self, config: &OverlayConfig) -> PathBuf {
        self.root.join(&config.layout_file_name)
    }
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to read environment variable {var}: {source}")]
    EnvVar {
        var: &'static str,
        #[source]
        source: env::VarError,
    },
    #[error("failed to resolve current executable path: {0}")]
    CurrentExe(#[source] std::io::Error),
    #[error("current executable path has no parent directory: {0}")]
    ExeHasNoParent(PathBuf),
    #[error("{var} is set but is not a directory: {path}")]
    InvalidEnvRoot { var: &'static str, path: PathBuf },
    #[error(
        "required rendering library {library} could not be loaded.\n\
Install the DirectX end-user runtime or repair the graphics driver, then restart."
    )]
    MissingRenderDependency { library: String },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Hooks(#[from] HookInstallError),
}

/// `OVERLAY_ROOT` when set, otherwise the executable's directory.
pub fn resolve_overlay_paths() -> Result<OverlayPaths, StartupError> {
    let root = match env::var(ROOT_ENV_VAR) {
        Ok(value) => {
            let path = normalize_path(Path::new(&value));
            if !path.is_dir() {
                return Err(StartupError::InvalidEnvRoot {
                    var: ROOT_ENV_VAR,
                    path,
                });
            }
            path
        }
        Err(env::VarError::NotPresent) => {
            let exe = env::current_exe().map_err(StartupError::CurrentExe)?;
            exe.parent()
                .map(normalize_path)
                .ok_or_else(|| StartupError::ExeHasNoParent(exe.clone()))?
        }
        Err(source) => {
            return Err(StartupError::EnvVar {
                var: ROOT_ENV_VAR,
                source,
            })
        }
    };
    Ok(OverlayPaths::from_root(root))
}

fn normalize_path(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

pub trait DependencyProbe {
    fn is_available(&self, library: &str) -> bool;
}

/// Presents an unrecoverable startup error to the user.
pub trait FatalReporter {
    fn report(&self, title: &str, message: &str);
}

/// Fails on the first library in `libraries` that `probe` cannot find.
pub fn ensure_render_dependencies(
    probe: &dyn DependencyProbe,
    libraries: &[&str],
) -> Result<(), StartupError> {
    match libraries
        .iter()
        .find(|library| !probe.is_available(library))
    {
        Some(library) => Err(StartupError::MissingRenderDependency {
            library: (*library).to_string(),
        }),
        None => Ok(()),
    }
}

/// Logs and reports `error`. The caller is expected to exit afterwards.
pub fn report_fatal(reporter: &dyn FatalReporter, error: &StartupError) {
    error!(error = %error, "overlay_startup_failed");
    reporter.report("Overlay failed to start", &error.to_string());
}
