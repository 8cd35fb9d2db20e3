//! panelmap CLI: map orthophoto defect detections to panels and field photos.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use panelmap::pipeline::{build_grid_index, select_layout};
use panelmap::{
    CoordinateTransformer, DetectionSet, MatchAnchor, OrthoGeometry, PanelLayout, Pipeline,
    PipelineConfig, PipelineInputs, RawImageRecord,
};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "panelmap")]
#[command(about = "Map thermal defect detections on a solar orthophoto to panels, field photos and metrics")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full mapping pipeline.
    Run(CliRunArgs),

    /// Summarize the panel layout and index that a run would use.
    LayoutInfo(CliLayoutArgs),

    /// Convert a detection pixel to world and WGS84 coordinates.
    Transform {
        /// Orthophoto geometry document (JSON).
        #[arg(long)]
        geometry: PathBuf,
        /// Detection-space pixel row.
        #[arg(long)]
        row: f64,
        /// Detection-space pixel column.
        #[arg(long)]
        col: f64,
    },
}

#[derive(Debug, Clone, Args, Default)]
struct CliConfigArgs {
    /// Pipeline configuration (JSON). Flags below override its fields.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Default panel width in world units.
    #[arg(long)]
    panel_width: Option<f64>,

    /// Default panel height in world units.
    #[arg(long)]
    panel_height: Option<f64>,

    /// Ignore `solarpanels` detections when choosing the layout.
    #[arg(long)]
    no_panel_detections: bool,
}

impl CliConfigArgs {
    fn load(&self) -> CliResult<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)
                .map_err(|e| -> CliError { format!("failed to load config {}: {}", path.display(), e).into() })?,
            None => PipelineConfig::default(),
        };
        if let Some(w) = self.panel_width {
            config.grid.panel_width = w;
        }
        if let Some(h) = self.panel_height {
            config.grid.panel_height = h;
        }
        if self.no_panel_detections {
            config.grid.use_panel_detections = false;
        }
        Ok(config)
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AnchorArg {
    Panel,
    Defect,
}

impl AnchorArg {
    fn to_core(self) -> MatchAnchor {
        match self {
            Self::Panel => MatchAnchor::PanelCentroid,
            Self::Defect => MatchAnchor::DefectCentroid,
        }
    }
}

#[derive(Debug, Clone, Args)]
struct CliRunArgs {
    /// Labels document with defect and panel detections (JSON).
    #[arg(long)]
    labels: PathBuf,

    /// Orthophoto geometry document (JSON).
    #[arg(long)]
    geometry: PathBuf,

    /// Raw image index with GPS metadata (JSON list).
    #[arg(long)]
    images: Option<PathBuf>,

    /// Explicit panel layout document (`panelmap.layout.v1`).
    #[arg(long)]
    layout: Option<PathBuf>,

    /// Path to write the report data (JSON).
    #[arg(long)]
    out: PathBuf,

    /// Path to write the metrics summary (JSON).
    #[arg(long)]
    metrics_json: Option<PathBuf>,

    /// Path to write the per-panel metrics table (CSV).
    #[arg(long)]
    metrics_csv: Option<PathBuf>,

    /// Maximum defect-to-panel distance in meters.
    #[arg(long)]
    max_distance: Option<f64>,

    /// Maximum defect-to-photo distance in meters.
    #[arg(long)]
    gps_max_distance_m: Option<f64>,

    /// Point matched against photo positions.
    #[arg(long, value_enum)]
    anchor: Option<AnchorArg>,

    /// Evaluate assignments and matches in parallel.
    #[arg(long)]
    parallel: bool,

    #[command(flatten)]
    config: CliConfigArgs,
}

impl CliRunArgs {
    fn to_config(&self) -> CliResult<PipelineConfig> {
        let mut config = self.config.load()?;
        if let Some(d) = self.max_distance {
            config.assignment.max_distance = d;
        }
        if let Some(d) = self.gps_max_distance_m {
            config.gps.max_match_distance_m = d;
        }
        if let Some(anchor) = self.anchor {
            config.gps.anchor = anchor.to_core();
        }
        config.parallel |= self.parallel;
        Ok(config)
    }
}

#[derive(Debug, Clone, Args)]
struct CliLayoutArgs {
    /// Orthophoto geometry document (JSON).
    #[arg(long)]
    geometry: PathBuf,

    /// Labels document; its `solarpanels` detections are considered as in `run`.
    #[arg(long)]
    labels: Option<PathBuf>,

    /// Explicit panel layout document (`panelmap.layout.v1`).
    #[arg(long)]
    layout: Option<PathBuf>,

    #[command(flatten)]
    config: CliConfigArgs,
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run_pipeline(&args),
        Commands::LayoutInfo(args) => run_layout_info(&args),
        Commands::Transform { geometry, row, col } => run_transform(&geometry, row, col),
    }
}

// ── layout-info ───────────────────────────────────────────────────────

fn run_layout_info(args: &CliLayoutArgs) -> CliResult<()> {
    let config = args.config.load()?;
    config.validate()?;

    let geometry = OrthoGeometry::from_json_file(&args.geometry)?;
    let transformer = CoordinateTransformer::from_geometry(&geometry)?;
    let detections = match &args.labels {
        Some(path) => DetectionSet::from_json_file(path)?,
        None => DetectionSet::default(),
    };
    let explicit = match &args.layout {
        Some(path) => Some(PanelLayout::from_json_file(path)?),
        None => None,
    };

    let layout = select_layout(explicit, &detections, &transformer, &config.grid)?;
    let grid = build_grid_index(layout, &transformer, &config.grid)?;
    let layout = grid.layout();

    println!("panelmap layout");
    println!("  name:      {}", layout.name);
    println!("  source:    {}", layout.source);
    println!("  panels:    {}", layout.n_cells());
    println!("  trackers:  {}", layout.tracker_ids().len());
    if let (Some(first), Some(last)) = (layout.cells().first(), layout.cells().last()) {
        println!(
            "  first:     {} at ({:.3}, {:.3})",
            first.key, first.centroid[0], first.centroid[1]
        );
        println!(
            "  last:      {} at ({:.3}, {:.3})",
            last.key, last.centroid[0], last.centroid[1]
        );
    }
    if let Some((min, max)) = layout.centroid_bounds() {
        println!(
            "  extent:    {:.3} x {:.3} (centroids, {})",
            max[0] - min[0],
            max[1] - min[1],
            transformer.crs()
        );
    }
    let [sx, sy] = grid.scale();
    println!("  index:     {} buckets, pitch {:.3} m", grid.n_buckets(), grid.pitch());
    println!("  scale:     {:.3} x {:.3} m per unit", sx, sy);

    Ok(())
}

// ── transform ─────────────────────────────────────────────────────────

fn run_transform(geometry: &std::path::Path, row: f64, col: f64) -> CliResult<()> {
    let geometry = OrthoGeometry::from_json_file(geometry)?;
    let transformer = CoordinateTransformer::from_geometry(&geometry)?;

    let world = transformer.pixel_to_world(row, col);
    let position = transformer.world_to_lat_lon(world);
    let back = transformer.world_to_pixel(world[0], world[1]);

    println!("pixel (row, col):   ({}, {})", row, col);
    println!("world (x, y):       ({:.6}, {:.6}) [{}]", world[0], world[1], transformer.crs());
    println!("wgs84 (lat, lon):   ({:.8}, {:.8})", position.lat, position.lon);
    println!("round trip pixel:   ({:.9}, {:.9})", back[0], back[1]);

    Ok(())
}

// ── run ───────────────────────────────────────────────────────────────

fn run_pipeline(args: &CliRunArgs) -> CliResult<()> {
    let config = args.to_config()?;
    let pipeline = Pipeline::new(config)?;

    tracing::info!("Loading labels: {}", args.labels.display());
    let detections = DetectionSet::from_json_file(&args.labels)
        .map_err(|e| -> CliError { format!("failed to read labels {}: {}", args.labels.display(), e).into() })?;
    tracing::info!(
        "Detections: {} defects, {} panel boxes",
        detections.defects.len(),
        detections.panels.len()
    );

    let geometry = OrthoGeometry::from_json_file(&args.geometry)
        .map_err(|e| -> CliError { format!("failed to read geometry {}: {}", args.geometry.display(), e).into() })?;

    let images = match &args.images {
        Some(path) => RawImageRecord::load_index(path)
            .map_err(|e| -> CliError { format!("failed to read image index {}: {}", path.display(), e).into() })?,
        None => {
            tracing::warn!("no image index given; GPS matching will report no_gps_images");
            Vec::new()
        }
    };

    let layout = match &args.layout {
        Some(path) => Some(
            PanelLayout::from_json_file(path)
                .map_err(|e| -> CliError { format!("failed to read layout {}: {}", path.display(), e).into() })?,
        ),
        None => None,
    };

    let output = pipeline.run(PipelineInputs {
        geometry: &geometry,
        detections: &detections,
        images: &images,
        layout,
    })?;

    let json = serde_json::to_string_pretty(&output.report)?;
    std::fs::write(&args.out, &json)?;
    tracing::info!("Report data written to {}", args.out.display());

    if let Some(path) = &args.metrics_json {
        panelmap::export::write_metrics_json(path, &output.report.metrics)?;
    }
    if let Some(path) = &args.metrics_csv {
        panelmap::export::write_metrics_csv(
            path,
            &output.report.metrics,
            output.grid.layout(),
            &output.transformer,
        )?;
    }

    Ok(())
}
