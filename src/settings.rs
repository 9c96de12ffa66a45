use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::render::{
    AntiAliasing, ColorMode, DEFAULT_CACHE_SIZE_MB, DEFAULT_THUMBNAIL_SIZE, DEFAULT_TILE_SIZE,
    DEFAULT_WORKERS, PixelFormat, RenderCache, RenderError, RenderOptions, SchedulerConfig,
};

pub const CURRENT_VERSION: u32 = 1;
const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "pagecast";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default = "default_dpi")]
    pub default_dpi: f32,

    #[serde(default)]
    pub anti_aliasing: AntiAliasing,

    #[serde(default)]
    pub color_mode: ColorMode,

    #[serde(default)]
    pub pixel_format: PixelFormat,

    #[serde(default = "default_true")]
    pub render_annotations: bool,

    #[serde(default = "default_true")]
    pub render_forms: bool,

    #[serde(default = "default_true")]
    pub cache_enabled: bool,

    #[serde(default = "default_cache_size_mb")]
    pub cache_size_mb: usize,

    /// Scheduler threads; 0 uses every available core
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    #[serde(default = "default_tile_size")]
    pub tile_width: u32,

    #[serde(default = "default_tile_size")]
    pub tile_height: u32,

    #[serde(default = "default_thumbnail_size")]
    pub thumbnail_max_width: u32,

    #[serde(default = "default_thumbnail_size")]
    pub thumbnail_max_height: u32,
}

fn default_true() -> bool {
    true
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_dpi() -> f32 {
    RenderOptions::DEFAULT_DPI
}

fn default_cache_size_mb() -> usize {
    DEFAULT_CACHE_SIZE_MB
}

fn default_worker_threads() -> usize {
    DEFAULT_WORKERS
}

fn default_tile_size() -> u32 {
    DEFAULT_TILE_SIZE
}

fn default_thumbnail_size() -> u32 {
    DEFAULT_THUMBNAIL_SIZE
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            default_dpi: default_dpi(),
            anti_aliasing: AntiAliasing::default(),
            color_mode: ColorMode::default(),
            pixel_format: PixelFormat::default(),
            render_annotations: true,
            render_forms: true,
            cache_enabled: true,
            cache_size_mb: default_cache_size_mb(),
            worker_threads: default_worker_threads(),
            tile_width: default_tile_size(),
            tile_height: default_tile_size(),
            thumbnail_max_width: default_thumbnail_size(),
            thumbnail_max_height: default_thumbnail_size(),
        }
    }
}

impl Settings {
    /// Default render options described by these settings
    pub fn render_options(&self) -> Result<RenderOptions, RenderError> {
        RenderOptions::builder()
            .dpi(self.default_dpi)
            .anti_aliasing(self.anti_aliasing)
            .color_mode(self.color_mode)
            .pixel_format(self.pixel_format)
            .render_annotations(self.render_annotations)
            .render_forms(self.render_forms)
            .build()
    }

    #[must_use]
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig::with_workers(self.worker_threads)
    }

    /// Empty cache sized and switched as configured
    #[must_use]
    pub fn render_cache(&self) -> RenderCache {
        let cache = RenderCache::with_size_mb(self.cache_size_mb);
        cache.set_enabled(self.cache_enabled);
        cache
    }
}

#[must_use]
pub fn preferred_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

/// Load settings from the user config directory, writing a default file on
/// first run. Problems are logged and defaults used.
#[must_use]
pub fn load_settings() -> Settings {
    let Some(path) = preferred_config_path() else {
        warn!("Could not determine config directory, using default settings");
        return Settings::default();
    };

    if !path.exists() {
        info!("Settings file not found, creating with defaults at {path:?}");
        let settings = Settings::default();
        if let Err(e) = save_settings_to_file(&settings, &path) {
            error!("{e}");
        }
        return settings;
    }

    load_settings_from_path(&path).unwrap_or_else(|e| {
        error!("{e}");
        Settings::default()
    })
}

/// Read settings from `path`. Older files are migrated and written back.
pub fn load_settings_from_path(path: &Path) -> Result<Settings, SettingsError> {
    let content = fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut settings =
        serde_yaml::from_str::<Settings>(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    debug!("Loaded settings from {path:?}");

    if settings.version < CURRENT_VERSION {
        migrate_settings(&mut settings);
        if let Err(e) = save_settings_to_file(&settings, path) {
            warn!("Could not write migrated settings: {e}");
        }
    }

    Ok(settings)
}

fn migrate_settings(settings: &mut Settings) {
    info!(
        "Migrating settings from v{} to v{}",
        settings.version, CURRENT_VERSION
    );

    // Future migrations go here:
    // if settings.version < 2 {
    //     migrate_v1_to_v2(settings);
    // }

    settings.version = CURRENT_VERSION;
}

pub fn save_settings_to_file(settings: &Settings, path: &Path) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(|source| SettingsError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }

    let mut content = String::from(SETTINGS_HEADER);
    content.push_str(&serde_yaml::to_string(settings)?);

    fs::write(path, content).map_err(|source| SettingsError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("Saved settings to {path:?}");
    Ok(())
}

const SETTINGS_HEADER: &str = r#"# ============================================================================
# pagecast settings
# ============================================================================
# anti_aliasing: none | text | graphics | all
# color_mode:    rgb | cmyk | grayscale | monochrome
# pixel_format:  rgb24 | rgba32 | bgr24 | bgra32 | gray8 | mono1
# worker_threads: 0 uses one render thread per core
# tile_width / tile_height are in points (1/72 inch)

"#;
