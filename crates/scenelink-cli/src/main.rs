//! Scenelink CLI - Main entry point
//!
//! Replays a shareable view state against a fixture dataset and prints the
//! converged scene, or runs tokenized asset searches.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use scenelink_core::{
    DesiredPointsOfInterest, Image360Handle, MappingTarget, ModelHandle, ModelKind, ViewUrlState,
};
use scenelink_engine::headless::StyledCollection;
use scenelink_engine::{
    load_config, save_default_config, Fixture, GeometryMappingCache, HeadlessViewer, HttpResourceApi,
    InMemoryResourceApi, NoopRenderer, ResourceApi, ViewStore,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "scenelink")]
#[command(about = "3D scene reconciliation and styling engine")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "scenelink.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply a shareable URL query to a fixture and print the converged scene
    Replay {
        /// Fixture dataset (JSON)
        #[arg(short, long)]
        fixture: PathBuf,

        /// Primary model id
        #[arg(long, conflicts_with = "site")]
        model: Option<i64>,

        /// Primary model revision; taken from the query's revisionId when omitted
        #[arg(long)]
        revision: Option<i64>,

        /// Primary 360° site instead of a model
        #[arg(long)]
        site: Option<String>,

        /// URL query string, e.g. "selectedAssetId=901&hl_mode=true"
        #[arg(short, long, default_value = "")]
        query: String,

        /// Points-of-interest collections (JSON array)
        #[arg(long)]
        points: Option<PathBuf>,
    },

    /// Search the assets mapped to a model
    Search {
        /// Fixture dataset (JSON); mutually exclusive with --api-url
        #[arg(short, long, required_unless_present = "api_url")]
        fixture: Option<PathBuf>,

        /// Resource API base URL; the token is read from SCENELINK_TOKEN
        #[arg(long, requires = "project")]
        api_url: Option<String>,

        /// Project name on the resource API
        #[arg(long)]
        project: Option<String>,

        #[arg(long)]
        model: i64,

        #[arg(long)]
        revision: i64,

        /// Geometry type of the model (looked up in the fixture when omitted)
        #[arg(long, value_enum)]
        kind: Option<KindArg>,

        /// Search text; every token must match
        query: String,
    },

    /// Write the default configuration file
    InitConfig {
        #[arg(short, long, default_value = "scenelink.toml")]
        output: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum KindArg {
    Cad,
    Pointcloud,
}

impl From<KindArg> for ModelKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Cad => ModelKind::Cad,
            KindArg::Pointcloud => ModelKind::PointCloud,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Command::Replay {
            fixture,
            model,
            revision,
            site,
            query,
            points,
        } => replay(&args.config, fixture, model, revision, site, &query, points).await,
        Command::Search {
            fixture,
            api_url,
            project,
            model,
            revision,
            kind,
            query,
        } => {
            let handle = ModelHandle::new(model, revision);
            search(&args.config, fixture, api_url, project, handle, kind, &query).await
        }
        Command::InitConfig { output } => {
            save_default_config(&output)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!("Wrote default configuration to {}", output.display());
            Ok(())
        }
    }
}

async fn replay(
    config_path: &Path,
    fixture_path: PathBuf,
    model: Option<i64>,
    revision: Option<i64>,
    site: Option<String>,
    query: &str,
    points: Option<PathBuf>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let fixture = Fixture::load(&fixture_path)
        .with_context(|| format!("Failed to load fixture {}", fixture_path.display()))?;
    let url = ViewUrlState::from_query(query).context("Invalid URL query")?;

    let viewer = Arc::new(HeadlessViewer::new(fixture.clone()));
    let store = ViewStore::new(
        config,
        Arc::new(InMemoryResourceApi::new(fixture)),
        viewer.clone(),
        Arc::new(NoopRenderer),
    );

    match (model, site) {
        (Some(model_id), _) => {
            let Some(revision_id) = revision.or(url.revision_id) else {
                bail!("--revision is required when the query has no revisionId");
            };
            let handle = ModelHandle::new(model_id, revision_id);
            store
                .set_primary_model(handle)
                .await
                .with_context(|| format!("Failed to load primary model {}", handle))?;
        }
        (None, Some(site)) => {
            store
                .set_primary_image360(Image360Handle::new(site.clone()))
                .await
                .with_context(|| format!("Failed to load 360 image set {}", site))?;
        }
        (None, None) => bail!("either --model or --site is required"),
    }

    if let Some(path) = points {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let collections: Vec<DesiredPointsOfInterest> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        store.set_points_of_interest(collections).await;
    }

    let report = store.apply_url_state(&url).await;
    info!(
        loaded = report.reconcile.loaded.len(),
        failed = report.reconcile.failed.len(),
        "Replay finished"
    );

    println!("Loaded models:");
    for model in viewer.loaded_models() {
        println!("  - {} ({:?})", model.handle, model.kind);
        print_style(&viewer, &model.target());
    }
    println!("360 image sets:");
    for site in viewer.loaded_images360() {
        println!("  - {}", site);
        print_style(&viewer, &MappingTarget::Image360(site));
    }
    if let Some((site, station)) = store.entered_station().await {
        println!("Entered station: {} in {}", station, site);
    }

    let overlay = store.overlay().lock().await;
    println!(
        "Overlays ({}): {}",
        if overlay.is_visible() { "visible" } else { "hidden" },
        overlay.len()
    );
    for o in overlay.overlays() {
        println!("  - {} \"{}\"", o.id, o.label);
    }
    drop(overlay);

    if !report.reconcile.failed.is_empty() {
        println!("Failures:");
        for failure in &report.reconcile.failed {
            println!(
                "  - {}: {} (attempt {})",
                failure.key, failure.error, failure.attempts
            );
        }
    }

    println!("Query: {}", store.to_url_state().await.to_query());
    Ok(())
}

fn print_style(viewer: &HeadlessViewer, target: &MappingTarget) {
    let Some(style) = viewer.style(target) else {
        return;
    };
    println!("    Default: {:?}", style.default);
    for collection in &style.collections {
        match collection {
            StyledCollection::Nodes {
                tree_indices,
                appearance,
            } => println!("    Nodes {:?}: {:?}", tree_indices, appearance),
            StyledCollection::InvertedNodes {
                tree_indices,
                appearance,
            } => println!("    All but {:?}: {:?}", tree_indices, appearance),
            StyledCollection::Annotations { ids, appearance } => {
                println!("    Annotations {:?}: {:?}", ids, appearance)
            }
        }
    }
}

async fn search(
    config_path: &Path,
    fixture_path: Option<PathBuf>,
    api_url: Option<String>,
    project: Option<String>,
    handle: ModelHandle,
    kind: Option<KindArg>,
    query: &str,
) -> Result<()> {
    let (api, kind): (Arc<dyn ResourceApi>, ModelKind) = match (api_url, fixture_path) {
        (Some(url), _) => {
            let project = project.context("--project is required with --api-url")?;
            let token = std::env::var("SCENELINK_TOKEN").ok();
            let api = HttpResourceApi::new(&url, &project, token)
                .context("Failed to create resource API client")?;
            (Arc::new(api), kind.map(ModelKind::from).unwrap_or(ModelKind::Cad))
        }
        (None, Some(path)) => {
            let fixture = Fixture::load(&path)
                .with_context(|| format!("Failed to load fixture {}", path.display()))?;
            let kind = match kind {
                Some(k) => k.into(),
                None => fixture
                    .model(handle)
                    .map(|m| m.kind)
                    .with_context(|| format!("Model {} is not in the fixture", handle))?,
            };
            (Arc::new(InMemoryResourceApi::new(fixture)), kind)
        }
        (None, None) => bail!("either --fixture or --api-url is required"),
    };

    let config = load_config(config_path)?;
    let cache = GeometryMappingCache::new(api, config.mappings);
    let target = MappingTarget::for_model(handle, kind);
    let hits = cache
        .search(&target, query)
        .await
        .with_context(|| format!("Search on {} failed", target))?;

    println!("Found {} assets:", hits.len());
    for hit in hits {
        println!("  - {} ({})", hit.asset_name, hit.asset_id);
        if let Some(description) = &hit.asset_description {
            println!("    {}", description);
        }
    }
    Ok(())
}
