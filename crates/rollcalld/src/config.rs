use rollcall_core::DEFAULT_MATCH_THRESHOLD;
use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Euclidean distance below which a face is accepted as a known identity.
    pub match_threshold: f32,
    /// Upper bound on one embedding extraction.
    pub extract_timeout: Duration,
    /// Upper bound on any single storage call.
    pub store_timeout: Duration,
    /// Suppress a new attendance event when the identity already has one
    /// this recent. `None` records every upload.
    pub duplicate_window: Option<Duration>,
    /// Keep the known-face registry in memory between uploads.
    pub cache_registry: bool,
    /// Period recorded on events when the upload does not name one.
    pub default_period: String,
    /// Serve on the session bus instead of the system bus.
    pub session_bus: bool,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let model_dir = std::env::var("ROLLCALL_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models"));

        let db_path = std::env::var("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("attendance.db"));

        let duplicate_window = env_u64("ROLLCALL_DUPLICATE_WINDOW_SECS", 0);

        Self {
            model_dir,
            db_path,
            match_threshold: env_f32("ROLLCALL_MATCH_THRESHOLD", DEFAULT_MATCH_THRESHOLD),
            extract_timeout: env_timeout("ROLLCALL_EXTRACT_TIMEOUT_SECS", 30),
            store_timeout: env_timeout("ROLLCALL_STORE_TIMEOUT_SECS", 5),
            duplicate_window: (duplicate_window > 0).then(|| Duration::from_secs(duplicate_window)),
            cache_registry: env_flag("ROLLCALL_CACHE_REGISTRY", false),
            default_period: std::env::var("ROLLCALL_DEFAULT_PERIOD")
                .unwrap_or_else(|_| "Morning".to_string()),
            session_bus: env_flag("ROLLCALL_SESSION_BUS", false),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir
            .join("det_10g.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir
            .join("w600k_r50.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<f32>().ok())
        .filter(|v| v.is_finite() && *v > 0.0)
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// A zero timeout would fail every call, so it falls back to the default.
fn env_timeout(key: &str, default_secs: u64) -> Duration {
    let secs = env_u64(key, default_secs);
    Duration::from_secs(if secs == 0 { default_secs } else { secs })
}

/// `1`, `true`, `yes` and `on` (any case) enable a flag; any other set value
/// disables it. `rollcall-cli` reads `ROLLCALL_SESSION_BUS` with the same rule.
fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}
