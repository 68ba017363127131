use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory holding per-person gallery files.
    pub gallery_dir: PathBuf,
    /// Path to the recognition ONNX model.
    pub model_path: PathBuf,
    /// Square input edge the model expects (224 for VGG-Face).
    pub input_edge: usize,
    /// Maximum cosine distance for a candidate match. Calibrated to the
    /// paired (model, metric) combination; tune via env, not code.
    pub distance_threshold: f32,
    /// Timeout in seconds for one engine request (extraction included).
    pub request_timeout_secs: u64,
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

        let db_path = std::env::var("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("attendance.db"));

        let gallery_dir = std::env::var("ROLLCALL_GALLERY_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("galleries"));

        let model_path = std::env::var("ROLLCALL_MODEL_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models/vggface.onnx"));

        Self {
            db_path,
            gallery_dir,
            model_path,
            input_edge: env_usize("ROLLCALL_MODEL_INPUT_EDGE", 224),
            distance_threshold: env_f32("ROLLCALL_DISTANCE_THRESHOLD", 0.35),
            request_timeout_secs: env_u64("ROLLCALL_REQUEST_TIMEOUT_SECS", 10),
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
