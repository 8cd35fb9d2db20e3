//! End-to-end orchestration: transform, layout, assignment, GPS matching,
//! metrics and report assembly.

use crate::assign::{DefectAssigner, DefectAssignment};
use crate::config::{GridConfig, PipelineConfig};
use crate::defect::DetectionSet;
use crate::geo::{CoordinateTransformer, InvalidGeometryError, OrthoGeometry};
use crate::gps::{GpsMatch, GpsMatcher, RawImageRecord};
use crate::grid_index::PanelGridIndex;
use crate::layout::{LayoutSource, PanelLayout};
use crate::metrics::aggregate;
use crate::report::{assemble, ReportData, ReportParts};

/// Failures that abort a run.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    InvalidGeometry(InvalidGeometryError),
    /// The selected layout has no cells.
    EmptyPanelGrid {
        source: LayoutSource,
    },
    InvalidConfig(String),
    InvalidLayout(String),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidGeometry(err) => write!(f, "invalid orthophoto geometry: {}", err),
            Self::EmptyPanelGrid { source } => {
                write!(f, "panel layout from {} source has no cells", source)
            }
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
            Self::InvalidLayout(msg) => write!(f, "invalid panel layout: {}", msg),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidGeometry(err) => Some(err),
            _ => None,
        }
    }
}

impl From<InvalidGeometryError> for PipelineError {
    fn from(err: InvalidGeometryError) -> Self {
        Self::InvalidGeometry(err)
    }
}

/// Immutable inputs of one run.
#[derive(Debug, Clone)]
pub struct PipelineInputs<'a> {
    pub geometry: &'a OrthoGeometry,
    pub detections: &'a DetectionSet,
    pub images: &'a [RawImageRecord],
    /// Explicit layout; takes precedence over detections and the uniform grid.
    pub layout: Option<PanelLayout>,
}

/// Result of a run, with the intermediate products exporters need.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub report: ReportData,
    pub transformer: CoordinateTransformer,
    pub grid: PanelGridIndex,
    /// One per defect, input order.
    pub assignments: Vec<DefectAssignment>,
    /// One per defect, input order.
    pub matches: Vec<GpsMatch>,
}

/// Pick the panel layout: explicit, then panel detections, then the
/// uniform grid. An empty result is fatal.
pub fn select_layout(
    explicit: Option<PanelLayout>,
    detections: &DetectionSet,
    transformer: &CoordinateTransformer,
    grid: &GridConfig,
) -> Result<PanelLayout, PipelineError> {
    let layout = match explicit {
        Some(layout) => layout,
        None => {
            let detected = if grid.use_panel_detections && !detections.panels.is_empty() {
                Some(
                    PanelLayout::from_panel_detections(&detections.panels, transformer)
                        .map_err(PipelineError::InvalidLayout)?,
                )
            } else {
                None
            };
            match detected {
                Some(layout) if !layout.is_empty() => layout,
                _ => PanelLayout::uniform(&grid.uniform, grid.panel_width, grid.panel_height)
                    .map_err(PipelineError::InvalidConfig)?,
            }
        }
    };

    if layout.is_empty() {
        return Err(PipelineError::EmptyPanelGrid {
            source: layout.source,
        });
    }
    tracing::info!(
        source = %layout.source,
        cells = layout.n_cells(),
        trackers = layout.tracker_ids().len(),
        "selected panel layout"
    );
    Ok(layout)
}

/// Index `layout` in meters. Geographic layouts are scaled at the centre of
/// their centroid bounds.
pub fn build_grid_index(
    layout: PanelLayout,
    transformer: &CoordinateTransformer,
    grid: &GridConfig,
) -> Result<PanelGridIndex, PipelineError> {
    let centre = layout
        .centroid_bounds()
        .map_or([0.0, 0.0], |(min, max)| [(min[0] + max[0]) * 0.5, (min[1] + max[1]) * 0.5]);
    let scale = transformer.meters_per_world_unit(centre);
    let pitch = grid.index_pitch() * scale[0].max(scale[1]);
    let index = PanelGridIndex::build_scaled(layout, pitch, scale).map_err(PipelineError::InvalidLayout)?;
    tracing::info!(
        crs = %transformer.crs(),
        pitch_m = index.pitch(),
        buckets = index.n_buckets(),
        "indexed panel layout"
    );
    Ok(index)
}

/// Configured pipeline.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate().map_err(PipelineError::InvalidConfig)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run(&self, inputs: PipelineInputs<'_>) -> Result<PipelineOutput, PipelineError> {
        let config = &self.config;
        let transformer = CoordinateTransformer::from_geometry(inputs.geometry)?;

        let layout = select_layout(inputs.layout, inputs.detections, &transformer, &config.grid)?;
        let grid = build_grid_index(layout, &transformer, &config.grid)?;

        let assigner = DefectAssigner::new(&transformer, &grid, &config.assignment);
        let assignments = assigner.assign_all(&inputs.detections.defects, config.parallel);

        let matcher = GpsMatcher::new(inputs.images, &config.gps);
        tracing::debug!(
            anchor = %matcher.anchor(),
            eligible_images = matcher.index().images().len(),
            "matching defects to field images"
        );
        let matches = matcher.match_all(&assignments, grid.layout(), &transformer, config.parallel);

        let metrics = aggregate(&assignments, grid.layout().n_cells());
        let crs = transformer.crs().to_string();
        let report = assemble(ReportParts {
            crs: &crs,
            layout: grid.layout(),
            assignments: &assignments,
            matches: &matches,
            metrics: &metrics,
            eligible_images: matcher.index().images().len(),
            unusable_images: matcher.index().unusable(),
        });

        tracing::info!(
            defects = metrics.total_defects,
            panels_affected = metrics.panels_affected,
            total_panels = metrics.total_panels,
            matched = report.gps.matched,
            "pipeline finished"
        );

        Ok(PipelineOutput {
            report,
            transformer,
            grid,
            assignments,
            matches,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assign::UnassignedReason;
    use crate::assign::AssignmentStatus;
    use crate::defect::BoundingBox;
    use crate::geo::{haversine_m, Crs, EARTH_MEAN_RADIUS_M};
    use crate::gps::{GpsOutcome, UnmatchedReason};
    use approx::assert_relative_eq;
    use crate::layout::{PanelKey, UniformGridSpec};
    use crate::test_utils::{defect, identity_geometry, three_by_three_layout};

    fn three_by_three_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        // Cells are one degree wide here and thresholds are in meters.
        config.assignment.max_distance = 500_000.0;
        config.grid.panel_width = 1.0;
        config.grid.panel_height = 1.0;
        config.grid.uniform = UniformGridSpec {
            trackers: 1,
            rows: 3,
            cols: 3,
            ..UniformGridSpec::default()
        };
        config
    }

    fn image_at(path: &str, lat: f64, lon: f64) -> RawImageRecord {
        RawImageRecord {
            path: path.to_string(),
            latitude: Some(lat),
            longitude: Some(lon),
            altitude: None,
            timestamp: None,
        }
    }

    #[test]
    fn runs_end_to_end_on_uniform_grid() {
        let geometry = identity_geometry();
        let detections = DetectionSet {
            defects: vec![
                defect(0, BoundingBox::new(0.0, 0.0, 1.0, 1.0), "hotspots"),
                defect(1, BoundingBox::new(2.2, 2.1, 0.5, 0.5), "faultydiodes"),
                defect(2, BoundingBox::new(40.0, 40.0, 1.0, 1.0), "hotspots"),
                defect(3, BoundingBox::new(0.0, 0.0, f64::NAN, 1.0), "offlinepanels"),
            ],
            panels: Vec::new(),
        };
        // World is lon/lat here, so a 1e-5 degree offset is about a meter.
        let mut images = vec![image_at("near.jpg", -0.5, 0.50001), image_at("nogps.jpg", 0.0, 0.0)];
        images[1].latitude = None;
        images[1].longitude = None;

        let pipeline = Pipeline::new(three_by_three_config()).expect("valid config");
        let out = pipeline
            .run(PipelineInputs {
                geometry: &geometry,
                detections: &detections,
                images: &images,
                layout: None,
            })
            .expect("run");

        assert_eq!(out.assignments.len(), 4);
        assert_eq!(out.assignments[0].panel(), Some(PanelKey::new(1, 1, 1)));
        assert_eq!(out.assignments[1].panel(), Some(PanelKey::new(1, 3, 3)));
        assert_eq!(
            out.assignments[2].unassigned_reason(),
            Some(UnassignedReason::DistanceExceeded)
        );
        assert_eq!(
            out.assignments[3].unassigned_reason(),
            Some(UnassignedReason::GeometryError)
        );

        assert!(matches!(out.matches[0].outcome, GpsOutcome::Matched { image_index: 0, .. }));
        assert_eq!(
            out.matches[2].outcome.unmatched_reason(),
            Some(UnmatchedReason::NotAttempted)
        );

        let report = &out.report;
        assert_eq!(report.crs, "EPSG:4326");
        assert_eq!(report.layout.source, LayoutSource::Uniform);
        assert_eq!(report.metrics.total_panels, 9);
        assert_eq!(report.metrics.resolved + report.metrics.unassigned, 4);
        assert_eq!(report.unusable_images.len(), 1);
        let order: Vec<usize> = report.entries.iter().map(|e| e.defect_index).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn geographic_threshold_is_in_meters() {
        // 4.5e-7 degrees per pixel; uniform panels of 1e-5 degrees, about a meter.
        const PX: f64 = 4.5e-7;
        const LON0: f64 = -54.62;
        const LAT0: f64 = -20.47;
        let geometry = OrthoGeometry {
            transform: [PX, 0.0, LON0, 0.0, -PX, LAT0],
            crs: None,
            downscale_factor: 1.0,
            width: None,
            height: None,
        };
        let mut config = PipelineConfig::default();
        config.grid.panel_width = 1e-5;
        config.grid.panel_height = 1e-5;
        config.grid.uniform = UniformGridSpec {
            origin: [LON0, LAT0],
            trackers: 1,
            rows: 3,
            cols: 3,
            ..UniformGridSpec::default()
        };
        assert_eq!(config.assignment.max_distance, 5.0);

        // 2x2 pixel box centred on a world point.
        let at = |index: usize, lon: f64, lat: f64| {
            let col = (lon - LON0) / PX;
            let row = (LAT0 - lat) / PX;
            defect(index, BoundingBox::new(col - 1.0, row - 1.0, 2.0, 2.0), "hotspots")
        };
        let m_per_deg_lon = EARTH_MEAN_RADIUS_M.to_radians() * LAT0.to_radians().cos();
        let c3 = [LON0 + 2.5e-5, LAT0 - 0.5e-5];
        let detections = DetectionSet {
            defects: vec![
                at(0, c3[0] + 3.0 / m_per_deg_lon, c3[1]),
                at(1, c3[0] + 50.0 / m_per_deg_lon, c3[1]),
            ],
            panels: Vec::new(),
        };

        let out = Pipeline::new(config)
            .expect("valid config")
            .run(PipelineInputs {
                geometry: &geometry,
                detections: &detections,
                images: &[],
                layout: None,
            })
            .expect("run");

        match out.assignments[0].status {
            AssignmentStatus::Resolved { panel, distance } => {
                assert_eq!(panel, PanelKey::new(1, 1, 3));
                assert_relative_eq!(distance, 3.0, max_relative = 1e-3);
            }
            ref other => panic!("expected a resolved assignment, got {:?}", other),
        }

        assert_eq!(
            out.assignments[1].unassigned_reason(),
            Some(UnassignedReason::DistanceExceeded)
        );
        let far = out.assignments[1].world_centroid.expect("centroid");
        let d = haversine_m(Crs::Wgs84.to_lat_lon(far), Crs::Wgs84.to_lat_lon(c3));
        assert!(d > 49.0 && d < 51.0, "distance {d}");
    }

    #[test]
    fn explicit_layout_takes_precedence() {
        let geometry = identity_geometry();
        let detections = DetectionSet {
            defects: Vec::new(),
            panels: vec![BoundingBox::new(0.0, 0.0, 5.0, 5.0)],
        };
        let pipeline = Pipeline::new(PipelineConfig::default()).expect("valid config");
        let out = pipeline
            .run(PipelineInputs {
                geometry: &geometry,
                detections: &detections,
                images: &[],
                layout: Some(three_by_three_layout()),
            })
            .expect("run");
        assert_eq!(out.report.layout.total_cells, 9);
        assert_eq!(out.report.metrics.percent_panels_affected, 0.0);
    }

    #[test]
    fn panel_detections_are_used_before_uniform_grid() {
        let geometry = identity_geometry();
        let detections = DetectionSet {
            defects: vec![defect(0, BoundingBox::new(11.0, 1.0, 1.0, 1.0), "hotspots")],
            panels: vec![BoundingBox::new(0.0, 0.0, 8.0, 4.0), BoundingBox::new(9.0, 0.5, 8.0, 4.0)],
        };
        let out = Pipeline::new(three_by_three_config())
            .expect("valid config")
            .run(PipelineInputs {
                geometry: &geometry,
                detections: &detections,
                images: &[],
                layout: None,
            })
            .expect("run");
        assert_eq!(out.report.layout.source, LayoutSource::Detections);
        assert_eq!(out.report.layout.total_cells, 2);
        assert_eq!(out.assignments[0].panel(), Some(PanelKey::new(1, 1, 2)));
        assert_eq!(
            out.matches[0].outcome.unmatched_reason(),
            Some(UnmatchedReason::NoGpsImages)
        );
    }

    #[test]
    fn empty_grid_aborts() {
        let geometry = identity_geometry();
        let detections = DetectionSet::default();
        let err = Pipeline::new(PipelineConfig::default())
            .expect("valid config")
            .run(PipelineInputs {
                geometry: &geometry,
                detections: &detections,
                images: &[],
                layout: None,
            })
            .expect_err("no cells");
        assert_eq!(
            err,
            PipelineError::EmptyPanelGrid {
                source: LayoutSource::Uniform
            }
        );
    }

    #[test]
    fn invalid_geometry_aborts() {
        let mut geometry = identity_geometry();
        geometry.transform = [1.0, 1.0, 0.0, 1.0, 1.0, 0.0];
        let err = Pipeline::new(three_by_three_config())
            .expect("valid config")
            .run(PipelineInputs {
                geometry: &geometry,
                detections: &DetectionSet::default(),
                images: &[],
                layout: None,
            })
            .expect_err("singular");
        assert!(matches!(err, PipelineError::InvalidGeometry(_)));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let mut config = PipelineConfig::default();
        config.gps.max_match_distance_m = -1.0;
        assert!(matches!(Pipeline::new(config), Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn parallel_run_matches_sequential() {
        let geometry = identity_geometry();
        let detections = DetectionSet {
            defects: (0..40)
                .map(|i| {
                    let f = i as f64;
                    defect(i, BoundingBox::new((f * 0.37) % 4.0, (f * 0.53) % 4.0, 0.2, 0.2), "hotspots")
                })
                .collect(),
            panels: Vec::new(),
        };
        let images: Vec<RawImageRecord> = (0..5)
            .map(|i| image_at(&format!("{i}.jpg"), -0.5 - i as f64, 0.5 + i as f64 * 0.5))
            .collect();

        let run = |parallel: bool| {
            let mut config = three_by_three_config();
            config.parallel = parallel;
            config.gps.max_match_distance_m = 200_000.0;
            Pipeline::new(config)
                .expect("valid config")
                .run(PipelineInputs {
                    geometry: &geometry,
                    detections: &detections,
                    images: &images,
                    layout: None,
                })
                .expect("run")
                .report
        };
        let sequential = run(false);
        let parallel = run(true);
        assert_eq!(
            serde_json::to_string(&sequential).expect("serialize"),
            serde_json::to_string(&parallel).expect("serialize")
        );
    }
}
