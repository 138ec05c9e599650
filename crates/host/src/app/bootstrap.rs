use overlay::{resolve_overlay_paths, FatalReporter, OverlayConfig, OverlayPaths, StartupError};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_WINDOW_TITLE: &str = "Overlay Host";
const DEFAULT_WINDOW_WIDTH: u32 = 1280;
const DEFAULT_WINDOW_HEIGHT: u32 = 720;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WindowSettings {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            title: DEFAULT_WINDOW_TITLE.to_string(),
            width: DEFAULT_WINDOW_WIDTH,
            height: DEFAULT_WINDOW_HEIGHT,
        }
    }
}

pub(crate) struct AppWiring {
    pub paths: OverlayPaths,
    pub config: OverlayConfig,
    pub window: WindowSettings,
}

pub(crate) fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();
}

/// Resolves the overlay root, checks the native runtime and loads the
/// configuration with environment overrides applied.
pub(crate) fn build_app() -> Result<AppWiring, StartupError> {
    let paths = resolve_overlay_paths()?;

    #[cfg(windows)]
    overlay::ensure_render_dependencies(
        &overlay::hooks::windows::LibraryProbe,
        &overlay::REQUIRED_RENDER_LIBRARIES,
    )?;

    let mut config = OverlayConfig::load(&paths.config_path)?;
    config.apply_env_overrides();
    info!(
        root = %paths.root.display(),
        config = %paths.config_path.display(),
        viewports = config.viewports_enabled,
        cursor_override = config.cursor_override,
        gamepad_navigation = config.gamepad_navigation,
        "startup"
    );

    Ok(AppWiring {
        paths,
        config,
        window: WindowSettings::default(),
    })
}

/// Where unrecoverable startup errors are shown.
pub(crate) fn fatal_reporter() -> Box<dyn FatalReporter> {
    #[cfg(windows)]
    {
        Box::new(overlay::hooks::windows::MessageBoxReporter)
    }
    #[cfg(not(windows))]
    {
        Box::new(StderrReporter)
    }
}

#[cfg(not(windows))]
struct StderrReporter;

#[cfg(not(windows))]
impl FatalReporter for StderrReporter {
    fn report(&self, title: &str, message: &str) {
        eprintln!("{title}: {message}");
    }
}
