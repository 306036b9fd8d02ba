//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use reel_media::AudioDurationMode;
use reel_models::{JobType, DEFAULT_MAX_ATTEMPTS};
use tracing::warn;

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Job types this process consumes
    pub job_types: Vec<JobType>,
    /// Prefetch for content generation consumers
    pub prefetch_content: usize,
    /// Prefetch for media acquisition consumers
    pub prefetch_media: usize,
    /// Bound on the retry counter carried by messages
    pub max_attempts: u32,
    /// Longest blocking read on the broker
    pub block: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Work directory for temporary files
    pub work_dir: PathBuf,
    /// How often the worker scans for stale pending messages
    pub claim_interval: Duration,
    /// Minimum idle time before a pending message can be reclaimed
    pub claim_min_idle: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            job_types: JobType::ALL.to_vec(),
            prefetch_content: 4,
            prefetch_media: 4,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            block: Duration::from_millis(1000),
            shutdown_timeout: Duration::from_secs(30),
            work_dir: PathBuf::from("/tmp/reel"),
            claim_interval: Duration::from_secs(30),
            claim_min_idle: Duration::from_secs(300),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            job_types: std::env::var("WORKER_JOB_TYPES")
                .ok()
                .map(|s| parse_job_types(&s))
                .filter(|types| !types.is_empty())
                .unwrap_or(defaults.job_types),
            prefetch_content: env_parse("WORKER_PREFETCH_CONTENT").unwrap_or(defaults.prefetch_content),
            prefetch_media: env_parse("WORKER_PREFETCH_MEDIA").unwrap_or(defaults.prefetch_media),
            max_attempts: env_parse("JOB_MAX_ATTEMPTS").unwrap_or(defaults.max_attempts),
            block: env_parse("WORKER_BLOCK_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.block),
            shutdown_timeout: env_parse("WORKER_SHUTDOWN_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            claim_interval: env_parse("WORKER_CLAIM_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.claim_interval),
            claim_min_idle: env_parse("WORKER_CLAIM_MIN_IDLE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.claim_min_idle),
        }
    }

    /// Unacknowledged messages one consumer may hold.
    ///
    /// Composition is pinned to 1 to bound peak memory and CPU.
    pub fn prefetch(&self, job_type: JobType) -> usize {
        match job_type {
            JobType::ContentGeneration => self.prefetch_content.max(1),
            JobType::MediaAcquisition => self.prefetch_media.max(1),
            JobType::VideoComposition => 1,
        }
    }
}

/// Comma separated job types; unknown names are skipped.
pub fn parse_job_types(raw: &str) -> Vec<JobType> {
    let mut types = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match part.parse::<JobType>() {
            Ok(t) if !types.contains(&t) => types.push(t),
            Ok(_) => {}
            Err(e) => warn!("Ignoring WORKER_JOB_TYPES entry: {}", e),
        }
    }
    types
}

/// Composition pipeline settings.
#[derive(Debug, Clone)]
pub struct CompositionConfig {
    /// Minimum total video length
    pub min_duration_secs: f64,
    /// Per-request timeout for remote images and music
    pub fetch_timeout: Duration,
    /// Music level when mixed under narration
    pub music_volume: f32,
    pub audio_duration_mode: AudioDurationMode,
    /// Preferred thumbnail position
    pub thumbnail_offset_secs: f64,
}

impl Default for CompositionConfig {
    fn default() -> Self {
        Self {
            min_duration_secs: 10.0,
            fetch_timeout: Duration::from_secs(30),
            music_volume: 0.3,
            audio_duration_mode: AudioDurationMode::Shortest,
            thumbnail_offset_secs: 1.0,
        }
    }
}

impl CompositionConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            min_duration_secs: env_parse::<f64>("VIDEO_MIN_DURATION_SECS")
                .filter(|d| d.is_finite() && *d >= 0.0)
                .unwrap_or(defaults.min_duration_secs),
            fetch_timeout: env_parse("IMAGE_FETCH_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.fetch_timeout),
            music_volume: env_parse::<f32>("MUSIC_VOLUME")
                .map(|v| v.clamp(0.0, 1.0))
                .unwrap_or(defaults.music_volume),
            audio_duration_mode: audio_duration_mode(std::env::var("AUDIO_DURATION_MODE").ok().as_deref()),
            thumbnail_offset_secs: env_parse("THUMBNAIL_OFFSET_SECS").unwrap_or(defaults.thumbnail_offset_secs),
        }
    }
}

/// Parse `AUDIO_DURATION_MODE`, warning on values that are not understood.
fn audio_duration_mode(raw: Option<&str>) -> AudioDurationMode {
    match raw.map(str::parse::<AudioDurationMode>) {
        None => AudioDurationMode::default(),
        Some(Ok(mode)) => mode,
        Some(Err(e)) => {
            warn!("Ignoring AUDIO_DURATION_MODE ({}), using shortest", e);
            AudioDurationMode::default()
        }
    }
}
