//! WorldGraph CLI - road-network grid extraction and inspection
//!
//! Commands:
//! - `extract` - Cut a raw network into cell graphs and build the index
//! - `stats` - Show statistics about a repository
//! - `cell` - Inspect one cell
//! - `way` - Find the cell that owns a way
//! - `places` - List places inside a rectangle
//! - `nearest` - Find the nearest place and vertex to a location

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use worldgraph_config::{ConfigLoader, ConfigOverrides, LogFormat, WorldGraphConfig};
use worldgraph_core::{
    DataKind, Distance, GridMode, JsonRawSource, Location, Rectangle, WorldCellList, WorldGrid,
};

/// WorldGraph - spatially partitioned road-network store
#[derive(Parser)]
#[command(name = "worldgraph")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to global + .worldgraph/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Repository folder
    #[arg(short, long, global = true)]
    repository: Option<PathBuf>,

    /// Strong memory budget in MB
    #[arg(long, global = true)]
    budget_mb: Option<u64>,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Cut a raw JSON network into cells and build the index
    Extract {
        /// Raw network file
        #[arg(short, long)]
        input: PathBuf,

        /// Grid mode: create starts from scratch, write updates in place
        #[arg(short, long, default_value = "create")]
        mode: GridMode,

        /// Worker threads (0 = all cores)
        #[arg(short, long)]
        parallelism: Option<usize>,
    },

    /// Show statistics about a repository
    Stats,

    /// Inspect one cell
    Cell {
        /// Cell name, e.g. `cell-140-184`
        #[arg(long, conflicts_with = "location", required_unless_present = "location")]
        name: Option<String>,

        /// Any location inside the cell, as `lat,lon`
        #[arg(long, value_parser = parse_location, allow_hyphen_values = true)]
        location: Option<Location>,

        /// Load the graph and count its elements
        #[arg(long)]
        load: bool,
    },

    /// Find the cell that contains a way
    Way { way_id: i64 },

    /// List places inside a rectangle
    Places {
        /// `minLat,minLon,maxLat,maxLon`
        #[arg(long, value_parser = parse_bounds, allow_hyphen_values = true)]
        bounds: Rectangle,
    },

    /// Nearest place and road vertex to a location
    Nearest {
        /// `lat,lon`
        #[arg(long, value_parser = parse_location, allow_hyphen_values = true)]
        location: Location,

        /// Vertex search radius
        #[arg(long, default_value = "1000")]
        within_meters: f64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let base_dir = std::env::current_dir().context("Failed to resolve working directory")?;
    let parallelism = match &cli.command {
        Commands::Extract { parallelism, .. } => *parallelism,
        _ => None,
    };
    let overrides = ConfigOverrides {
        repository: cli.repository.clone(),
        memory_budget_mb: cli.budget_mb,
        log_level: cli.verbose.then(|| "debug".to_string()),
        parallelism,
        ..Default::default()
    };
    let config = match &cli.config {
        Some(path) => ConfigLoader::load_file(path, Some(&overrides)),
        None => ConfigLoader::new().load(&base_dir, Some(&overrides)),
    }
    .context("Failed to load configuration")?;

    init_logging(&config)?;

    match cli.command {
        Commands::Extract { input, mode, .. } => cmd_extract(&config, &base_dir, input, mode),
        Commands::Stats => cmd_stats(&config, &base_dir, cli.json),
        Commands::Cell {
            name,
            location,
            load,
        } => cmd_cell(&config, &base_dir, name, location, load, cli.json),
        Commands::Way { way_id } => cmd_way(&config, &base_dir, way_id),
        Commands::Places { bounds } => cmd_places(&config, &base_dir, bounds, cli.json),
        Commands::Nearest {
            location,
            within_meters,
        } => cmd_nearest(
            &config,
            &base_dir,
            location,
            Distance::meters(within_meters),
        ),
    }
}

/// Parse comma-separated floats, e.g. `50.5,4.5`
fn parse_floats<const N: usize>(value: &str) -> Result<[f64; N], String> {
    let parsed: Vec<f64> = value
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|e| format!("invalid number in '{}': {}", value, e))?;
    parsed
        .try_into()
        .map_err(|_| format!("expected {} comma-separated numbers, got '{}'", N, value))
}

fn parse_location(value: &str) -> Result<Location, String> {
    let [lat, lon] = parse_floats::<2>(value)?;
    let location = Location::new(lat, lon);
    if !location.is_valid() {
        return Err(format!("'{}' is outside WGS84", value));
    }
    Ok(location)
}

fn parse_bounds(value: &str) -> Result<Rectangle, String> {
    let [min_lat, min_lon, max_lat, max_lon] = parse_floats::<4>(value)?;
    Ok(Rectangle::from_corners(
        Location::new(min_lat, min_lon),
        Location::new(max_lat, max_lon),
    ))
}

fn init_logging(config: &WorldGraphConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));
    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match config.logging.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Text => tracing::subscriber::set_global_default(builder.finish())?,
    }
    Ok(())
}

fn open_read(config: &WorldGraphConfig, base_dir: &std::path::Path) -> Result<WorldGrid> {
    WorldGrid::from_config(config, base_dir, GridMode::Read).with_context(|| {
        format!(
            "Failed to open repository {:?}",
            config.repository_dir(base_dir)
        )
    })
}

/// Cut a raw network into the configured repository
fn cmd_extract(
    config: &WorldGraphConfig,
    base_dir: &std::path::Path,
    input: PathBuf,
    mode: GridMode,
) -> Result<()> {
    if mode == GridMode::Read {
        anyhow::bail!("Extraction needs mode 'create' or 'write'");
    }
    let start = Instant::now();

    let grid = WorldGrid::from_config(config, base_dir, mode)
        .context("Failed to open world grid")?;
    let repository = grid.repository().clone();
    let outcome = grid
        .extract(&repository, &JsonRawSource::new(&input))
        .with_context(|| format!("Failed to extract {:?}", input))?;

    let elapsed = start.elapsed();

    println!("\nExtraction complete!");
    println!("  Repository: {:?}", repository.folder());
    println!("  Cells: {} of {}", outcome.produced, outcome.expected);
    if !outcome.failed.is_empty() {
        println!("  Failed:");
        for coordinate in &outcome.failed {
            println!("    {}", coordinate);
        }
    }
    println!("  Ways indexed: {}", grid.index().way_count()?);
    println!("  Places indexed: {}", grid.index().place_count()?);
    println!("  Time: {:.2}s", elapsed.as_secs_f64());

    outcome.into_result()?;
    Ok(())
}

/// Show statistics about a repository
fn cmd_stats(config: &WorldGraphConfig, base_dir: &std::path::Path, json: bool) -> Result<()> {
    let grid = open_read(config, base_dir)?;
    let stats = grid.stats();

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("\nRepository Statistics");
    println!("=====================");
    println!("  Folder: {:?}", stats.repository);
    println!("  Cell size: {}°", stats.cell_size_degrees);
    println!("  Included cells: {}", stats.included_cells);
    println!("  Graph files: {}", stats.graph_files);
    println!("  Graph bytes: {}", stats.graph_bytes);
    println!("  Raw extracts: {}", stats.raw_files);
    println!("  Memory budget: {} MB", stats.budget_bytes / (1024 * 1024));

    let cells = grid.cells_in(grid.repository(), DataKind::Graph, &Rectangle::WORLD);
    if let Some(biggest) = cells.biggest(grid.repository()) {
        println!("  Biggest cell: {}", biggest);
    }
    if let Some(smallest) = cells.smallest(grid.repository()) {
        println!("  Smallest cell: {}", smallest);
    }
    Ok(())
}

/// Inspect one cell
fn cmd_cell(
    config: &WorldGraphConfig,
    base_dir: &std::path::Path,
    name: Option<String>,
    location: Option<Location>,
    load: bool,
    json: bool,
) -> Result<()> {
    let grid = open_read(config, base_dir)?;
    let cell = match (name, location) {
        (Some(name), _) => grid
            .world_cell_named(&name)
            .with_context(|| format!("No included cell named '{}'", name))?,
        (None, Some(location)) => grid
            .world_cell_at(location)
            .with_context(|| format!("No included cell at {}", location))?,
        (None, None) => anyhow::bail!("Give a cell --name or a --location"),
    };

    let mut report = serde_json::json!({
        "name": cell.name(),
        "identifier": cell.identifier(),
        "bounds": cell.bounds(),
        "has_graph": cell.has_graph(grid.repository()),
        "disk_bytes": cell.disk_size(grid.repository(), DataKind::Graph),
        "estimated_memory_bytes": cell.estimated_memory_size(),
        "neighbors": cell.neighbors().iter().map(|c| c.name()).collect::<Vec<_>>(),
    });

    if load {
        info!("Loading {}", cell);
        let graph = cell.cell_graph()?;
        report["vertices"] = graph.vertex_count().into();
        report["edges"] = graph.edge_count().into();
        report["relations"] = graph.relation_count().into();
        report["places"] = graph.place_count().into();
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if let Some(fields) = report.as_object() {
        println!("\n{}", cell);
        for (key, value) in fields {
            println!("  {}: {}", key, value);
        }
    }
    Ok(())
}

/// Find the cell that contains a way
fn cmd_way(config: &WorldGraphConfig, base_dir: &std::path::Path, way_id: i64) -> Result<()> {
    let grid = open_read(config, base_dir)?;
    match grid.cell_for_way_identifier(way_id)? {
        Some(cell) => println!("{}", cell),
        None => println!("Way {} is not indexed", way_id),
    }
    Ok(())
}

/// List places inside a rectangle
fn cmd_places(
    config: &WorldGraphConfig,
    base_dir: &std::path::Path,
    bounds: Rectangle,
    json: bool,
) -> Result<()> {
    let grid = open_read(config, base_dir)?;
    let places = grid.places_inside(&bounds)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&places)?);
        return Ok(());
    }
    for indexed in &places {
        println!(
            "{:<30} {:>10.5} {:>11.5}  {}",
            indexed.place.name,
            indexed.place.location.latitude,
            indexed.place.location.longitude,
            indexed.place.place_type
        );
    }
    println!("\n{} places", places.len());
    Ok(())
}

/// Nearest place and road vertex to a location
fn cmd_nearest(
    config: &WorldGraphConfig,
    base_dir: &std::path::Path,
    location: Location,
    radius: Distance,
) -> Result<()> {
    let grid = open_read(config, base_dir)?;

    match grid.place_for_location(location)? {
        Some(indexed) => println!(
            "Place: {} ({:.0} m)",
            indexed.place.name,
            location.distance_to(&indexed.place.location).as_meters()
        ),
        None => println!("Place: none"),
    }

    let Some(cell) = grid.world_cell_at(location) else {
        println!("Vertex: location is outside the included cells");
        return Ok(());
    };
    let candidates: WorldCellList = cell
        .neighbors_and_this()
        .into_iter()
        .filter(|candidate| candidate.has_graph(grid.repository()))
        .collect();
    match candidates.nearest_vertex(location, radius) {
        Some((vertex, distance)) => println!(
            "Vertex: {} in {} ({:.0} m)",
            vertex.id(),
            vertex.cell(),
            distance.as_meters()
        ),
        None => println!("Vertex: none within {:.0} m", radius.as_meters()),
    }
    Ok(())
}
