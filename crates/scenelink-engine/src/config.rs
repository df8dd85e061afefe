//! Engine configuration loading

use scenelink_core::Rgb;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Serialize error: {0}")]
    SerializeError(#[from] toml::ser::Error),
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub mappings: MappingsConfig,
    #[serde(default)]
    pub overlay: OverlayConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub style: StyleConfig,
}

impl EngineConfig {
    /// Reject values the layout and backoff math cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let overlay = &self.overlay;
        if !(overlay.max_point_indicator_distance.is_finite()
            && overlay.max_point_indicator_distance > 0.0)
        {
            return Err(ConfigError::InvalidValue {
                field: "overlay.max_point_indicator_distance",
                reason: format!("must be positive, got {}", overlay.max_point_indicator_distance),
            });
        }
        if !(overlay.min_size_px.is_finite() && overlay.min_size_px > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "overlay.min_size_px",
                reason: format!("must be positive, got {}", overlay.min_size_px),
            });
        }
        if !(overlay.base_size_px.is_finite() && overlay.base_size_px >= overlay.min_size_px) {
            return Err(ConfigError::InvalidValue {
                field: "overlay.base_size_px",
                reason: format!(
                    "must be at least min_size_px ({}), got {}",
                    overlay.min_size_px, overlay.base_size_px
                ),
            });
        }
        if !overlay.label_offset_px.is_finite() {
            return Err(ConfigError::InvalidValue {
                field: "overlay.label_offset_px",
                reason: "must be finite".to_string(),
            });
        }
        if !(self.camera.fit_radius_factor.is_finite() && self.camera.fit_radius_factor > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "camera.fit_radius_factor",
                reason: format!("must be positive, got {}", self.camera.fit_radius_factor),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingsConfig {
    /// Page size for mapping, annotation and asset-link listings
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
    /// Maximum ancestor chain length fetched when resolving a click
    #[serde(default = "default_ancestor_limit")]
    pub ancestor_limit: u32,
}

impl Default for MappingsConfig {
    fn default() -> Self {
        Self {
            page_limit: default_page_limit(),
            ancestor_limit: default_ancestor_limit(),
        }
    }
}

fn default_page_limit() -> u32 {
    1000
}

fn default_ancestor_limit() -> u32 {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayConfig {
    /// Overlays farther than this from the camera are hidden
    #[serde(default = "default_max_distance")]
    pub max_point_indicator_distance: f64,
    /// Indicator size in pixels for the nearest overlays
    #[serde(default = "default_base_size")]
    pub base_size_px: f64,
    /// Indicator size in pixels at and beyond half the max distance
    #[serde(default = "default_min_size")]
    pub min_size_px: f64,
    /// Horizontal offset of the hover label from the indicator
    #[serde(default = "default_label_offset")]
    pub label_offset_px: f64,
    /// Color of newly added point-of-interest indicators
    #[serde(default = "default_overlay_color")]
    pub default_color: Rgb,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            max_point_indicator_distance: default_max_distance(),
            base_size_px: default_base_size(),
            min_size_px: default_min_size(),
            label_offset_px: default_label_offset(),
            default_color: default_overlay_color(),
        }
    }
}

fn default_max_distance() -> f64 {
    50.0
}

fn default_base_size() -> f64 {
    64.0
}

fn default_min_size() -> f64 {
    16.0
}

fn default_label_offset() -> f64 {
    20.0
}

fn default_overlay_color() -> Rgb {
    Rgb(0xfb, 0xe5, 0x0b)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Delay before the first retry of a failed load; doubles per attempt
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,
    /// Failed loads are not retried automatically after this many attempts
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl ReconcileConfig {
    /// Backoff before attempt `attempts + 1`
    pub fn retry_delay(&self, attempts: u32) -> Duration {
        let exp = attempts.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_base_delay_ms.saturating_mul(1 << exp))
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            retry_base_delay_ms: default_retry_base_delay(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_retry_base_delay() -> u64 {
    1000
}

fn default_max_attempts() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Camera state writes are debounced by this many milliseconds
    #[serde(default = "default_debounce")]
    pub debounce_ms: u64,
    /// Animation duration when fitting the camera to an asset
    #[serde(default = "default_fit_duration")]
    pub fit_duration_ms: u64,
    /// Fit distance as a multiple of the target's bounding radius
    #[serde(default = "default_fit_radius")]
    pub fit_radius_factor: f64,
    /// Squared distance under which the camera counts as standing on a 360° station
    #[serde(default = "default_station_epsilon")]
    pub station_epsilon_sq: f64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce(),
            fit_duration_ms: default_fit_duration(),
            fit_radius_factor: default_fit_radius(),
            station_epsilon_sq: default_station_epsilon(),
        }
    }
}

fn default_debounce() -> u64 {
    300
}

fn default_fit_duration() -> u64 {
    500
}

fn default_fit_radius() -> f64 {
    3.0
}

fn default_station_epsilon() -> f64 {
    0.0001
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleConfig {
    /// Color of the selected point-cloud volume
    #[serde(default = "default_highlight_color")]
    pub highlight_color: Rgb,
    /// Point-cloud backdrop while an asset is singled out
    #[serde(default = "default_ghost_color")]
    pub ghost_color: Rgb,
    /// Unmapped geometry in highlight-mapped mode
    #[serde(default = "default_dim_color")]
    pub dim_color: Rgb,
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            highlight_color: default_highlight_color(),
            ghost_color: default_ghost_color(),
            dim_color: default_dim_color(),
        }
    }
}

fn default_highlight_color() -> Rgb {
    Rgb(77, 106, 242)
}

fn default_ghost_color() -> Rgb {
    Rgb(0x11, 0x11, 0x11)
}

fn default_dim_color() -> Rgb {
    Rgb(30, 30, 30)
}

/// Load configuration from file, falling back to defaults when it does not exist
pub fn load_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&content)?;
        config.validate()?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(EngineConfig::default())
    }
}

/// Save default configuration to file
pub fn save_default_config(path: &Path) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(&EngineConfig::default())?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = load_config(&temp_dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.camera.debounce_ms, 300);
        assert_eq!(config.mappings.ancestor_limit, 1000);
        assert_eq!(config.style.highlight_color, Rgb(77, 106, 242));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("scenelink.toml");
        std::fs::write(
            &path,
            r##"
[overlay]
max_point_indicator_distance = 12.5

[style]
ghost_color = "#222222"
"##,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.overlay.max_point_indicator_distance, 12.5);
        assert_eq!(config.overlay.base_size_px, 64.0);
        assert_eq!(config.style.ghost_color, Rgb(0x22, 0x22, 0x22));
        assert_eq!(config.reconcile.max_attempts, 3);
    }

    #[test]
    fn test_save_default_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("default.toml");
        save_default_config(&path).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.camera.fit_duration_ms, 500);
        assert_eq!(config.overlay.default_color, Rgb(0xfb, 0xe5, 0x0b));
    }

    #[test]
    fn test_non_positive_indicator_distance_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("scenelink.toml");
        std::fs::write(&path, "[overlay]\nmax_point_indicator_distance = 0.0\n").unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: "overlay.max_point_indicator_distance",
                ..
            }
        ));

        std::fs::write(&path, "[overlay]\nmin_size_px = 80.0\n").unwrap();
        assert!(matches!(
            load_config(&path),
            Err(ConfigError::InvalidValue {
                field: "overlay.base_size_px",
                ..
            })
        ));
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_non_ascii_color_is_parse_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("scenelink.toml");
        std::fs::write(&path, "[style]\ndim_color = \"a\u{e9}\u{e9}a\"\n").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_retry_delay_doubles() {
        let config = ReconcileConfig {
            retry_base_delay_ms: 100,
            max_attempts: 5,
        };
        assert_eq!(config.retry_delay(1), Duration::from_millis(100));
        assert_eq!(config.retry_delay(2), Duration::from_millis(200));
        assert_eq!(config.retry_delay(4), Duration::from_millis(800));
    }
}
