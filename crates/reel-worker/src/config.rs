//! Worker configuration.

use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Work directory for per-job artifacts
    pub work_dir: String,
    /// Root of the shared clip pool
    pub pool_dir: String,
    /// Trailing padding added to the audio duration
    pub padding_secs: f64,
    /// Allowed deviation between expected and actual durations
    pub duration_tolerance_secs: f64,
    /// Keyframe slack below which a short final asset is fatal
    pub keyframe_tolerance_secs: f64,
    /// Maximum candidates requested from the shorts provider
    pub max_candidates: usize,
    /// Transcription language
    pub language: String,
    /// Detector confidence threshold for rejections
    pub confidence_threshold: f64,
    /// Base delay for external-call backoff
    pub backoff_base: Duration,
    /// Backoff delay cap
    pub backoff_cap: Duration,
    /// Optional overall wall-clock ceiling on a backoff loop
    pub retry_ceiling: Option<Duration>,
    /// Interval between orphan recovery scans
    pub recovery_interval: Duration,
    /// Idle time after which a non-terminal job counts as stale
    pub staleness_threshold: Duration,
    /// Interval between pool sweeps
    pub sweep_interval: Duration,
    /// Age after which unclaimed pool artifacts are reclaimed
    pub artifact_max_age: Duration,
    /// Processing lease TTL
    pub lease_ttl: Duration,
    /// Interval for renewing the lease while a job runs
    pub heartbeat_interval: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            work_dir: "/tmp/reel/work".to_string(),
            pool_dir: "/tmp/reel/pool".to_string(),
            padding_secs: 1.0,
            duration_tolerance_secs: 2.0,
            keyframe_tolerance_secs: 0.5,
            max_candidates: 25,
            language: "en".to_string(),
            confidence_threshold: 0.5,
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(300),
            retry_ceiling: None,
            recovery_interval: Duration::from_secs(120),
            staleness_threshold: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(600),
            artifact_max_age: Duration::from_secs(3600),
            lease_ttl: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(20),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_duration_secs(var: &str, default_secs: u64) -> Duration {
    Duration::from_secs(env_parse(var, default_secs))
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_jobs: env_parse("REEL_MAX_JOBS", defaults.max_concurrent_jobs),
            work_dir: std::env::var("REEL_WORK_DIR").unwrap_or(defaults.work_dir),
            pool_dir: std::env::var("REEL_POOL_DIR").unwrap_or(defaults.pool_dir),
            padding_secs: env_parse("REEL_PADDING_SECS", defaults.padding_secs),
            duration_tolerance_secs: env_parse(
                "REEL_DURATION_TOLERANCE_SECS",
                defaults.duration_tolerance_secs,
            ),
            keyframe_tolerance_secs: env_parse(
                "REEL_KEYFRAME_TOLERANCE_SECS",
                defaults.keyframe_tolerance_secs,
            ),
            max_candidates: env_parse("REEL_MAX_CANDIDATES", defaults.max_candidates),
            language: std::env::var("REEL_LANGUAGE").unwrap_or(defaults.language),
            confidence_threshold: env_parse(
                "REEL_CONFIDENCE_THRESHOLD",
                defaults.confidence_threshold,
            ),
            backoff_base: Duration::from_millis(env_parse("REEL_BACKOFF_BASE_MS", 500)),
            backoff_cap: env_duration_secs("REEL_BACKOFF_CAP_SECS", 300),
            retry_ceiling: std::env::var("REEL_RETRY_CEILING_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs),
            recovery_interval: env_duration_secs("REEL_RECOVERY_INTERVAL_SECS", 120),
            staleness_threshold: env_duration_secs("REEL_STALENESS_SECS", 300),
            sweep_interval: env_duration_secs("REEL_SWEEP_INTERVAL_SECS", 600),
            artifact_max_age: env_duration_secs("REEL_ARTIFACT_MAX_AGE_SECS", 3600),
            lease_ttl: env_duration_secs("REEL_LEASE_TTL_SECS", 60),
            heartbeat_interval: env_duration_secs("REEL_HEARTBEAT_SECS", 20),
            shutdown_timeout: env_duration_secs("REEL_SHUTDOWN_TIMEOUT_SECS", 30),
        }
    }
}
