//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use rmix_media::{PipelineConfig, DEFAULT_REACTION_SECONDS};
use rmix_models::OutputLayout;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Work directory for temporary files
    pub work_dir: PathBuf,
    /// How long one claim waits for a job before re-checking shutdown
    pub poll_interval: Duration,
    /// How often the worker should scan for orphaned pending jobs
    pub claim_interval: Duration,
    /// Minimum idle time before a pending job can be claimed (crash recovery)
    pub claim_min_idle: Duration,
    /// Root of uploaded clips
    pub upload_dir: PathBuf,
    /// Root of rendered outputs
    pub output_dir: PathBuf,
    /// URL prefix under which outputs are served
    pub output_url_prefix: String,
    /// Reaction segment length when no trim is given
    pub reaction_seconds: f64,
    /// Per-stage FFmpeg deadline
    pub stage_timeout: Duration,
    /// Font used for hook text
    pub font_file: Option<PathBuf>,
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            shutdown_timeout: Duration::from_secs(60),
            work_dir: PathBuf::from("/tmp/rmix"),
            poll_interval: Duration::from_secs(1),
            claim_interval: Duration::from_secs(30),
            claim_min_idle: Duration::from_secs(300), // 5 minutes
            upload_dir: PathBuf::from("./uploads"),
            output_dir: PathBuf::from("./outputs"),
            output_url_prefix: "/outputs".to_string(),
            reaction_seconds: DEFAULT_REACTION_SECONDS,
            stage_timeout: Duration::from_secs(600),
            font_file: None,
            ffmpeg_bin: "ffmpeg".to_string(),
            ffprobe_bin: "ffprobe".to_string(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            max_concurrent_jobs: env_parse("WORKER_MAX_JOBS")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_concurrent_jobs),
            shutdown_timeout: env_parse("WORKER_SHUTDOWN_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            poll_interval: defaults.poll_interval,
            claim_interval: env_parse("WORKER_CLAIM_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.claim_interval),
            claim_min_idle: env_parse("WORKER_CLAIM_MIN_IDLE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.claim_min_idle),
            upload_dir: std::env::var("RMIX_UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            output_dir: std::env::var("RMIX_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            output_url_prefix: std::env::var("RMIX_OUTPUT_URL_PREFIX")
                .unwrap_or(defaults.output_url_prefix),
            reaction_seconds: env_parse("RMIX_REACTION_SECONDS")
                .filter(|s: &f64| s.is_finite() && *s > 0.0)
                .unwrap_or(defaults.reaction_seconds),
            stage_timeout: env_parse("RMIX_STAGE_TIMEOUT_SECS")
                .filter(|n: &u64| *n > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.stage_timeout),
            font_file: std::env::var("RMIX_FONT_FILE")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            ffmpeg_bin: std::env::var("FFMPEG_BIN").unwrap_or(defaults.ffmpeg_bin),
            ffprobe_bin: std::env::var("FFPROBE_BIN").unwrap_or(defaults.ffprobe_bin),
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            work_dir: self.work_dir.clone(),
            reaction_seconds: self.reaction_seconds,
            font_file: self.font_file.clone(),
            ffmpeg_program: self.ffmpeg_bin.clone(),
            ..PipelineConfig::default()
        }
    }

    pub fn output_layout(&self) -> OutputLayout {
        OutputLayout::new(&self.output_dir, &self.output_url_prefix)
    }
}
