use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

pub const VIEWPORTS_ENV_VAR: &str = "OVERLAY_VIEWPORTS";
pub const CURSOR_OVERRIDE_ENV_VAR: &str = "OVERLAY_CURSOR_OVERRIDE";
pub const GAMEPAD_NAV_ENV_VAR: &str = "OVERLAY_GAMEPAD_NAV";

const MAX_FONT_PX: f32 = 256.0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("invalid config value for {field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FontSizes {
    pub default_px: f32,
    pub icon_px: f32,
    pub mono_px: f32,
}

impl Default for FontSizes {
    fn default() -> Self {
        Self {
            default_px: 15.0,
            icon_px: 15.0,
            mono_px: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OverlayConfig {
    /// Allow UI windows to leave the host window. Still disabled while the
    /// swap chain is full-screen or only one display is attached.
    pub viewports_enabled: bool,
    pub cursor_override: bool,
    pub gamepad_navigation: bool,
    pub layout_file_name: String,
    pub layout_file_max_bytes: u64,
    pub fonts: FontSizes,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            viewports_enabled: true,
            cursor_override: true,
            gamepad_navigation: false,
            layout_file_name: "overlay_layout.ini".to_string(),
            layout_file_max_bytes: 1024 * 1024,
            fonts: FontSizes::default(),
        }
    }
}

impl OverlayConfig {
    /// Reads `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "overlay_config_missing_using_defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let config = Self::parse(&raw).map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn parse(raw: &str) -> Result<Self, String> {
        let mut deserializer = serde_json::Deserializer::from_str(raw);
        match serde_path_to_error::deserialize::<_, OverlayConfig>(&mut deserializer) {
            Ok(config) => Ok(config),
            Err(error) => {
                let path = error.path().to_string();
                let source = error.into_inner();
                if path.is_empty() || path == "." {
                    Err(source.to_string())
                } else {
                    Err(format!("at {path}: {source}"))
                }
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.layout_file_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "layout_file_name",
                message: "must not be empty".to_string(),
            });
        }
        if self.layout_file_max_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "layout_file_max_bytes",
                message: "must be greater than zero".to_string(),
            });
        }
        for (field, px) in [
            ("fonts.default_px", self.fonts.default_px),
            ("fonts.icon_px", self.fonts.icon_px),
            ("fonts.mono_px", self.fonts.mono_px),
        ] {
            if !(1.0..=MAX_FONT_PX).contains(&px) {
                return Err(ConfigError::Invalid {
                    field,
                    message: format!("expected 1..={MAX_FONT_PX}, got {px}"),
                });
            }
        }
        Ok(())
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| env::var(name));
    }

    /// Invalid values are logged and leave the configured value in place.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        override_flag(&lookup, VIEWPORTS_ENV_VAR, &mut self.viewports_enabled);
        override_flag(&lookup, CURSOR_OVERRIDE_ENV_VAR, &mut self.cursor_override);
        override_flag(&lookup, GAMEPAD_NAV_ENV_VAR, &mut self.gamepad_navigation);
    }
}

fn override_flag<F>(lookup: &F, env_var: &'static str, target: &mut bool)
where
    F: Fn(&str) -> Result<String, env::VarError>,
{
    match lookup(env_var) {
        Ok(value) => match parse_flag(&value) {
            Some(flag) => *target = flag,
            None => warn!(
                env_var,
                value = value.as_str(),
                "invalid overlay env var value; falling back to config"
            ),
        },
        Err(env::VarError::NotPresent) => {}
        Err(err) => warn!(
            env_var,
            error = %err,
            "unable to read overlay env var; falling back to config"
        ),
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::ffi::OsString;

    use tempfile::TempDir;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Result<String, env::VarError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned().ok_or(env::VarError::NotPresent)
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().expect("temp dir");
        let config = OverlayConfig::load(&dir.path().join("overlay.json")).expect("load");

        assert_eq!(config, OverlayConfig::default());
    }

    #[test]
    fn partial_file_keeps_defaults_for_absent_fields() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("overlay.json");
        fs::write(
            &path,
            r#"{ "cursor_override": false, "fonts": { "mono_px": 20 } }"#,
        )
        .expect("write");

        let config = OverlayConfig::load(&path).expect("load");

        assert!(!config.cursor_override);
        assert!(config.viewports_enabled);
        assert_eq!(config.fonts.mono_px, 20.0);
        assert_eq!(config.fonts.default_px, FontSizes::default().default_px);
    }

    #[test]
    fn parse_error_reports_the_field_path() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("overlay.json");
        fs::write(&path, r#"{ "fonts": { "default_px": "big" } }"#).expect("write");

        let error = OverlayConfig::load(&path).expect_err("should fail");

        match error {
            ConfigError::Parse { message, .. } => {
                assert!(message.starts_with("at fonts.default_px:"), "{message}")
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("overlay.json");
        fs::write(&path, r#"{ "viewport": true }"#).expect("write");

        assert!(matches!(
            OverlayConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn zero_layout_cap_is_invalid() {
        let config = OverlayConfig {
            layout_file_max_bytes: 0,
            ..OverlayConfig::default()
        };

        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "layout_file_max_bytes",
                ..
            })
        ));
    }

    #[test]
    fn out_of_range_font_size_is_invalid() {
        let mut config = OverlayConfig::default();
        config.fonts.icon_px = 0.5;

        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "fonts.icon_px",
                ..
            })
        ));
    }

    #[test]
    fn env_overrides_replace_configured_flags() {
        let mut config = OverlayConfig::default();
        config.apply_overrides_from(lookup(&[
            (VIEWPORTS_ENV_VAR, "0"),
            (GAMEPAD_NAV_ENV_VAR, "on"),
        ]));

        assert!(!config.viewports_enabled);
        assert!(config.cursor_override);
        assert!(config.gamepad_navigation);
    }

    #[test]
    fn invalid_env_override_falls_back_to_config() {
        let mut config = OverlayConfig::default();
        config.apply_overrides_from(lookup(&[(CURSOR_OVERRIDE_ENV_VAR, "maybe")]));

        assert!(config.cursor_override);
    }

    #[test]
    fn unreadable_env_override_falls_back_to_config() {
        let mut config = OverlayConfig::default();
        config.apply_overrides_from(|_| Err(env::VarError::NotUnicode(OsString::from("x"))));

        assert_eq!(config, OverlayConfig::default());
    }
}
