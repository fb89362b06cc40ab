//! Configuration management for Study Streamer.
//!
//! Settings come from command-line arguments (clap), environment variables
//! with the `STUDY_` prefix, and the defaults below.
//!
//! # Environment Variables
//!
//! - `STUDY_HOST` - Server bind address (default: 0.0.0.0)
//! - `STUDY_PORT` - Server port (default: 3000)
//! - `STUDY_DATA_DIR` - Root of `studies/` and `derived/` (default: ./data)
//! - `STUDY_CACHE_PREVIEWS` - Preview cache entries (default: 1024)
//! - `STUDY_CACHE_VOLUME_SLICES` - Volume slice cache entries (default: 64)
//! - `STUDY_CACHE_INDEXES` - Parsed study indexes kept in memory (default: 32)
//! - `STUDY_CONVERSION_WORKERS` - Preview conversions in parallel (default: 2)
//! - `STUDY_RECONSTRUCTION_PERMITS` - Volume loads in parallel (default: 2)
//! - `STUDY_JPEG_QUALITY` - Preview JPEG quality (default: 90)
//! - `STUDY_FRAME_RATE` - Sequence export frames per second (default: 10)
//! - `STUDY_CACHE_MAX_AGE` - HTTP cache max-age seconds (default: 3600)

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::export::{DEFAULT_FRAME_RATE, MAX_FRAME_RATE, MIN_FRAME_RATE};
use crate::index::DEFAULT_INDEX_CACHE_CAPACITY;
use crate::render::{
    ServiceOptions, DEFAULT_CONVERSION_WORKERS, DEFAULT_JPEG_QUALITY,
    DEFAULT_PREVIEW_CACHE_CAPACITY, DEFAULT_RECONSTRUCTION_PERMITS, DEFAULT_VOLUME_CACHE_CAPACITY,
    MAX_JPEG_QUALITY, MIN_JPEG_QUALITY,
};
use crate::server::{DEFAULT_CACHE_MAX_AGE, DEFAULT_MAX_UPLOAD_BYTES};

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default data directory.
pub const DEFAULT_DATA_DIR: &str = "data";

// =============================================================================
// CLI
// =============================================================================

/// Study Streamer - derived artifacts for volumetric imaging studies.
///
/// Ingests directories of raw slices, builds per-study indexes and previews,
/// and serves images, reconstructed slices and exports over HTTP.
#[derive(Parser, Debug, Clone)]
#[command(name = "study-streamer")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the HTTP server.
    Serve(ServeConfig),

    /// Rebuild the index and previews of one study, then exit.
    Ingest(IngestConfig),

    /// Check the data directory and list studies.
    Check(CheckConfig),
}

// =============================================================================
// Shared Arguments
// =============================================================================

/// Settings shared by every command that processes studies.
#[derive(Args, Debug, Clone)]
pub struct PipelineArgs {
    /// Root directory holding `studies/` and `derived/`.
    #[arg(long, default_value = DEFAULT_DATA_DIR, env = "STUDY_DATA_DIR")]
    pub data_dir: PathBuf,

    /// Maximum number of encoded previews kept in memory.
    #[arg(long, default_value_t = DEFAULT_PREVIEW_CACHE_CAPACITY, env = "STUDY_CACHE_PREVIEWS")]
    pub cache_previews: usize,

    /// Maximum number of encoded volume slices kept in memory.
    #[arg(
        long,
        default_value_t = DEFAULT_VOLUME_CACHE_CAPACITY,
        env = "STUDY_CACHE_VOLUME_SLICES"
    )]
    pub cache_volume_slices: usize,

    /// Maximum number of parsed study indexes kept in memory.
    #[arg(long, default_value_t = DEFAULT_INDEX_CACHE_CAPACITY, env = "STUDY_CACHE_INDEXES")]
    pub cache_indexes: usize,

    /// Preview conversions run in parallel during ingestion.
    #[arg(long, default_value_t = DEFAULT_CONVERSION_WORKERS, env = "STUDY_CONVERSION_WORKERS")]
    pub conversion_workers: usize,

    /// Volume loads allowed at once, process-wide.
    #[arg(
        long,
        default_value_t = DEFAULT_RECONSTRUCTION_PERMITS,
        env = "STUDY_RECONSTRUCTION_PERMITS"
    )]
    pub reconstruction_permits: usize,

    /// JPEG quality for previews and reconstructed slices (1-100).
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, env = "STUDY_JPEG_QUALITY")]
    pub jpeg_quality: u8,

    /// Frames per second of sequence exports (1-60).
    #[arg(long, default_value_t = DEFAULT_FRAME_RATE, env = "STUDY_FRAME_RATE")]
    pub frame_rate: u32,

    /// Disable the sequence export encoder.
    #[arg(long, default_value_t = false, env = "STUDY_DISABLE_SEQUENCE_EXPORT")]
    pub disable_sequence_export: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl PipelineArgs {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.data_dir.as_os_str().is_empty() {
            return Err("data_dir must not be empty".to_string());
        }

        if self.cache_previews == 0 {
            return Err("cache_previews must be greater than 0".to_string());
        }
        if self.cache_volume_slices == 0 {
            return Err("cache_volume_slices must be greater than 0".to_string());
        }
        if self.cache_indexes == 0 {
            return Err("cache_indexes must be greater than 0".to_string());
        }

        if self.conversion_workers == 0 {
            return Err("conversion_workers must be greater than 0".to_string());
        }
        if self.reconstruction_permits == 0 {
            return Err("reconstruction_permits must be greater than 0".to_string());
        }

        if !(MIN_JPEG_QUALITY..=MAX_JPEG_QUALITY).contains(&self.jpeg_quality) {
            return Err(format!(
                "jpeg_quality must be between {} and {}",
                MIN_JPEG_QUALITY, MAX_JPEG_QUALITY
            ));
        }

        if !(MIN_FRAME_RATE..=MAX_FRAME_RATE).contains(&self.frame_rate) {
            return Err(format!(
                "frame_rate must be between {} and {}",
                MIN_FRAME_RATE, MAX_FRAME_RATE
            ));
        }

        Ok(())
    }

    /// Service options derived from these arguments.
    pub fn service_options(&self) -> ServiceOptions {
        ServiceOptions {
            preview_cache_capacity: self.cache_previews,
            volume_cache_capacity: self.cache_volume_slices,
            conversion_workers: self.conversion_workers,
            reconstruction_permits: self.reconstruction_permits,
            jpeg_quality: self.jpeg_quality,
            frame_rate: self.frame_rate,
            sequence_export: !self.disable_sequence_export,
        }
    }
}

// =============================================================================
// Serve Command
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "STUDY_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "STUDY_PORT")]
    pub port: u16,

    #[command(flatten)]
    pub pipeline: PipelineArgs,

    /// HTTP Cache-Control max-age in seconds.
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_AGE, env = "STUDY_CACHE_MAX_AGE")]
    pub cache_max_age: u32,

    /// Maximum upload request size in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_UPLOAD_BYTES, env = "STUDY_MAX_UPLOAD_BYTES")]
    pub max_upload_bytes: usize,

    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "STUDY_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.pipeline.validate()?;

        if self.max_upload_bytes == 0 {
            return Err("max_upload_bytes must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn verbose(&self) -> bool {
        self.pipeline.verbose
    }
}

// =============================================================================
// Ingest Command
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct IngestConfig {
    /// Study to rebuild (directory name under `studies/`).
    pub study_id: String,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

impl IngestConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.pipeline.validate()?;
        crate::index::validate_study_id(&self.study_id).map_err(|e| e.to_string())
    }
}

// =============================================================================
// Check Command
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct CheckConfig {
    /// Root directory holding `studies/` and `derived/`.
    #[arg(long, default_value = DEFAULT_DATA_DIR, env = "STUDY_DATA_DIR")]
    pub data_dir: PathBuf,

    /// List every study with its index status.
    #[arg(long, default_value_t = false)]
    pub list_studies: bool,

    /// Enable verbose logging.
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

// =============================================================================
// Tests
// =============================================================================
