//! Ambimix (ambimix) - Main entry point
//!
//! Loads a scene file, then crossfades through the requested atmospheres
//! on the simulated backend, logging every channel and transition event.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ambimix_common::config::MixerConfig;
use ambimix_common::{AtmosphereId, FadeCurve};
use ambimix_engine::{
    AtmosphereStore, CrossfadeOptions, MemoryAtmosphereStore, MixerEngine, Scene,
};
use ambimix_engine::audio::SimulatedBackend;
use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for ambimix
#[derive(Parser, Debug)]
#[command(name = "ambimix")]
#[command(about = "Ambient channel mixer with atmosphere crossfades")]
#[command(version)]
struct Args {
    /// Mixer config file (overrides AMBIMIX_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Scene file with library entries and atmospheres
    #[arg(short, long, env = "AMBIMIX_SCENE")]
    scene: PathBuf,

    /// Atmosphere ids to load, in order
    #[arg(short, long = "atmosphere", required = true)]
    atmospheres: Vec<AtmosphereId>,

    /// Seconds to hold each atmosphere after its crossfade completes
    #[arg(long, default_value = "5")]
    hold_secs: u64,

    /// Crossfade duration override in milliseconds
    #[arg(long)]
    duration_ms: Option<u64>,

    /// Fade curve override (linear, equal_power, exponential)
    #[arg(long)]
    curve: Option<FadeCurve>,

    /// Simulate host gain automation instead of stepped ramps
    #[arg(long)]
    automation: bool,

    /// Log filter (overrides RUST_LOG)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = match &args.log_level {
        Some(level) => tracing_subscriber::EnvFilter::new(level),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "ambimix_engine=info,ambimix_common=info".into()),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting ambimix {} [{}] (git {}, built {}, {})",
        env!("CARGO_PKG_VERSION"),
        env!("AMBIMIX_BUILD_TAG"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE"),
    );

    let config = MixerConfig::load(args.config.as_deref()).context("Failed to load config")?;
    let scene = Scene::from_file(&args.scene)
        .with_context(|| format!("Failed to read scene {}", args.scene.display()))?;
    info!(
        "Scene: {} library entries, {} atmospheres",
        scene.library.len(),
        scene.atmospheres.len()
    );

    let store = Arc::new(MemoryAtmosphereStore::new());
    for definition in scene.atmospheres.iter().cloned() {
        let name = definition.name.clone();
        store
            .save(definition)
            .with_context(|| format!("Invalid atmosphere {:?}", name))?;
    }

    let backend = if args.automation {
        SimulatedBackend::with_automation()
    } else {
        SimulatedBackend::new()
    };
    let engine = Arc::new(MixerEngine::new(
        config,
        Arc::new(backend),
        Arc::new(scene.catalog()),
        store,
    ));

    for &id in &args.atmospheres {
        let integrity = engine
            .integrity(id)
            .with_context(|| format!("Unknown atmosphere {}", id))?;
        if !integrity.is_intact() {
            warn!(atmosphere_id = id, missing = ?integrity.missing_ids, "Atmosphere has missing sources");
        }
    }

    let logger = tokio::spawn(log_events(engine.subscribe()));

    let options = CrossfadeOptions {
        duration: args.duration_ms.map(Duration::from_millis),
        curve: args.curve,
    };

    tokio::select! {
        result = run(Arc::clone(&engine), args.atmospheres, options, args.hold_secs) => result?,
        _ = shutdown_signal() => {}
    }

    engine.shutdown();
    logger.abort();
    info!("Shutdown complete");
    Ok(())
}

/// Crossfade through each atmosphere, holding each one
async fn run(
    engine: Arc<MixerEngine>,
    atmospheres: Vec<AtmosphereId>,
    options: CrossfadeOptions,
    hold_secs: u64,
) -> Result<()> {
    for id in atmospheres {
        let preview = engine.preview(id)?;
        debug!(atmosphere_id = id, diff = ?preview, "Previewing atmosphere");

        let report = engine.load_atmosphere(id, options).await?;
        if !report.is_completed() {
            bail!("Transition to atmosphere {} ended {:?}", id, report.outcome);
        }
        info!(
            atmosphere_id = id,
            channels = engine.registry().live_snapshot().len(),
            "Holding atmosphere for {}s",
            hold_secs
        );
        tokio::time::sleep(Duration::from_secs(hold_secs)).await;
    }
    Ok(())
}

/// Log every mixer event as JSON
async fn log_events(mut rx: broadcast::Receiver<ambimix_common::events::MixerEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => info!(event = event.event_type(), "{}", json),
                Err(e) => warn!("Failed to serialize event: {}", e),
            },
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Event logger lagged, {} events dropped", n)
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
