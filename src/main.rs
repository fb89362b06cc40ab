//! Study Streamer - derived artifacts for volumetric imaging studies.
//!
//! This binary wires the decoder, store and study service together and either
//! serves HTTP, rebuilds one study offline, or checks the data directory.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use study_streamer::{
    config::{CheckConfig, Cli, Command, IngestConfig, PipelineArgs, ServeConfig},
    create_router,
    render::progress_channel,
    DicomSliceDecoder, RouterConfig, StudyService, StudyStore,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Serve(config) => run_serve(config).await,
        Command::Ingest(config) => run_ingest(config).await,
        Command::Check(config) => run_check(config).await,
    }
}

/// Build the study service for a set of pipeline arguments.
async fn build_service(
    pipeline: &PipelineArgs,
) -> Result<Arc<StudyService<DicomSliceDecoder>>, String> {
    let store = StudyStore::with_index_capacity(&pipeline.data_dir, pipeline.cache_indexes);
    store.ensure_layout().await.map_err(|e| e.to_string())?;

    Ok(Arc::new(StudyService::with_options(
        Arc::new(DicomSliceDecoder::new()),
        Arc::new(store),
        pipeline.service_options(),
    )))
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(config.verbose());

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let pipeline = &config.pipeline;
    info!("Study Streamer v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Data directory: {}", pipeline.data_dir.display());
    info!(
        "  Cache: {} previews, {} volume slices, {} indexes",
        pipeline.cache_previews, pipeline.cache_volume_slices, pipeline.cache_indexes
    );
    info!(
        "  Workers: {} conversion, {} reconstruction",
        pipeline.conversion_workers, pipeline.reconstruction_permits
    );
    if pipeline.cache_volume_slices > pipeline.cache_previews {
        warn!("  Volume slice cache is larger than the preview cache");
    }
    if pipeline.disable_sequence_export {
        warn!("  Sequence export: DISABLED");
    }

    let service = match build_service(pipeline).await {
        Ok(service) => service,
        Err(e) => {
            error!("Failed to prepare data directory: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match service.list_studies().await {
        Ok(studies) => info!("  Found {} study(ies)", studies.len()),
        Err(e) => warn!("  Could not list studies: {}", e),
    }

    let router = create_router(service, build_router_config(&config));
    let addr = config.bind_address();

    info!("");
    info!("  Server listening on: http://{}", addr);
    info!("    curl http://{}/health", addr);
    info!("    curl http://{}/studies", addr);
    info!("");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = axum::serve(listener, router).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "study_streamer=debug,tower_http=debug"
    } else {
        "study_streamer=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn build_router_config(config: &ServeConfig) -> RouterConfig {
    let mut router_config = RouterConfig::new()
        .with_cache_max_age(config.cache_max_age)
        .with_max_upload_bytes(config.max_upload_bytes)
        .with_tracing(!config.no_tracing);

    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }

    router_config
}

// =============================================================================
// Ingest Command
// =============================================================================

async fn run_ingest(config: IngestConfig) -> ExitCode {
    init_logging(config.pipeline.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let service = match build_service(&config.pipeline).await {
        Ok(service) => service,
        Err(e) => {
            error!("Failed to prepare data directory: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let (tx, mut rx) = progress_channel();
    let reporter = tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let progress = rx.borrow_and_update().clone();
            info!(
                state = ?progress.state,
                completed = progress.completed,
                failed = progress.failed,
                total = progress.total,
                "Progress"
            );
        }
    });

    let result = service.rebuild(&config.study_id, Some(&tx)).await;
    drop(tx);
    let _ = reporter.await;

    match result {
        Ok(index) => {
            println!(
                "Indexed study {}: {} series, {} images",
                index.study_id,
                index.series.len(),
                index.image_count()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(study_id = %config.study_id, "Ingestion failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Check Command
// =============================================================================

async fn run_check(config: CheckConfig) -> ExitCode {
    if config.verbose {
        init_logging(true);
    }

    println!("Study Streamer Configuration Check");
    println!("═══════════════════════════════════");
    println!();

    let store = StudyStore::new(&config.data_dir);
    let studies_dir = store.studies_dir();
    if studies_dir.is_dir() {
        println!("✓ Studies directory: {}", studies_dir.display());
    } else {
        println!("✗ Studies directory missing: {}", studies_dir.display());
        return ExitCode::FAILURE;
    }

    let study_ids = match store.list_study_ids().await {
        Ok(ids) => ids,
        Err(e) => {
            println!("✗ Failed to list studies: {}", e);
            return ExitCode::FAILURE;
        }
    };
    println!("✓ Found {} study(ies)", study_ids.len());

    if config.list_studies {
        println!();
        println!("Studies:");
        println!("────────");
        if study_ids.is_empty() {
            println!("  (no studies found)");
        }
        for study_id in &study_ids {
            match store.load_index(study_id).await {
                Some(index) => println!(
                    "  {}  {} series, {} images",
                    study_id,
                    index.series.len(),
                    index.image_count()
                ),
                None => println!("  {}  (not indexed)", study_id),
            }
        }
    }

    println!();
    println!("═══════════════════════════════════");
    println!("✓ All checks passed!");

    ExitCode::SUCCESS
}
