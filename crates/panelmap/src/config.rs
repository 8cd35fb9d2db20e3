//! Run configuration.

use std::path::Path;

use crate::gps::MatchAnchor;
use crate::layout::UniformGridSpec;

/// Panel geometry parameters.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Default panel width in world units. Also sets the index bucket pitch.
    pub panel_width: f64,
    /// Default panel height in world units.
    pub panel_height: f64,
    /// Derive the layout from `solarpanels` detections when no explicit
    /// layout is supplied.
    pub use_panel_detections: bool,
    /// Fallback grid when neither an explicit layout nor panel detections
    /// are available.
    pub uniform: UniformGridSpec,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            panel_width: 1.0,
            panel_height: 2.0,
            use_panel_detections: true,
            uniform: UniformGridSpec::default(),
        }
    }
}

impl GridConfig {
    /// Bucket side of the panel grid index in world units.
    pub fn index_pitch(&self) -> f64 {
        self.panel_width.max(self.panel_height)
    }
}

/// Defect to panel assignment parameters.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AssignmentConfig {
    /// Maximum centroid-to-panel distance in meters. Geographic world frames
    /// are measured at their local scale.
    pub max_distance: f64,
}

impl Default for AssignmentConfig {
    fn default() -> Self {
        Self { max_distance: 5.0 }
    }
}

/// Field photograph matching parameters.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct GpsConfig {
    /// Maximum great-circle distance in meters.
    pub max_match_distance_m: f64,
    pub anchor: MatchAnchor,
}

impl Default for GpsConfig {
    fn default() -> Self {
        Self {
            max_match_distance_m: 50.0,
            anchor: MatchAnchor::default(),
        }
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub grid: GridConfig,
    pub assignment: AssignmentConfig,
    pub gps: GpsConfig,
    /// Evaluate assignments and matches on the rayon thread pool.
    pub parallel: bool,
}

impl PipelineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("grid.panel_width", self.grid.panel_width),
            ("grid.panel_height", self.grid.panel_height),
            ("assignment.max_distance", self.assignment.max_distance),
            ("gps.max_match_distance_m", self.gps.max_match_distance_m),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(format!("{} must be finite and > 0, got {}", name, value));
            }
        }
        self.grid.uniform.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.assignment.max_distance, 5.0);
        assert_eq!(config.gps.max_match_distance_m, 50.0);
        assert_eq!(config.gps.anchor, MatchAnchor::PanelCentroid);
        assert_eq!(config.grid.index_pitch(), 2.0);
        assert!(!config.parallel);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let raw = r#"{"gps":{"max_match_distance_m":5.0,"anchor":"defect_centroid"},"parallel":true}"#;
        let config: PipelineConfig = serde_json::from_str(raw).expect("valid json");
        assert_eq!(config.gps.max_match_distance_m, 5.0);
        assert_eq!(config.gps.anchor, MatchAnchor::DefectCentroid);
        assert_eq!(config.assignment, AssignmentConfig::default());
        assert!(config.parallel);
    }

    #[test]
    fn validate_rejects_non_positive_values() {
        let mut config = PipelineConfig::default();
        config.assignment.max_distance = 0.0;
        assert!(config.validate().unwrap_err().contains("assignment.max_distance"));

        let mut config = PipelineConfig::default();
        config.grid.panel_height = f64::NAN;
        assert!(config.validate().unwrap_err().contains("grid.panel_height"));

        let mut config = PipelineConfig::default();
        config.grid.uniform.col_gap = -0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_file_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        let mut config = PipelineConfig::default();
        config.grid.uniform.rows = 4;
        std::fs::write(&path, serde_json::to_string_pretty(&config).expect("serialize")).expect("write");
        let loaded = PipelineConfig::from_json_file(&path).expect("load");
        assert_eq!(loaded, config);
    }
}
