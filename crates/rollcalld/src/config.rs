use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory for enrollment reference images.
    pub faces_dir: PathBuf,
    /// Maximum encoding distance still treated as the same person.
    pub tolerance: f32,
    /// Location tag recorded when the caller does not supply one.
    pub default_location: String,
    /// When set, recognition matches every detected face and reports the
    /// highest-confidence hit instead of the first matching face.
    pub multi_face: bool,
    /// Whether to run blur/brightness pre-filters on enrollment images.
    pub quality_checks: bool,
    pub blur_threshold: f32,
    pub min_brightness: f32,
    pub max_brightness: f32,
    /// Default record count for history queries.
    pub history_limit: u32,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("ROLLCALL_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| rollcall_core::default_model_dir());

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

        let faces_dir = std::env::var("ROLLCALL_FACES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("faces"));

        Self {
            model_dir,
            db_path,
            faces_dir,
            tolerance: env_f32("ROLLCALL_MATCH_TOLERANCE", 0.6),
            default_location: std::env::var("ROLLCALL_LOCATION")
                .unwrap_or_else(|_| "Main Campus".to_string()),
            multi_face: std::env::var("ROLLCALL_MULTI_FACE")
                .map(|v| v == "1")
                .unwrap_or(false),
            quality_checks: std::env::var("ROLLCALL_QUALITY_CHECKS")
                .map(|v| v != "0")
                .unwrap_or(true),
            blur_threshold: env_f32(
                "ROLLCALL_BLUR_THRESHOLD",
                rollcall_core::quality::DEFAULT_BLUR_THRESHOLD,
            ),
            min_brightness: env_f32(
                "ROLLCALL_MIN_BRIGHTNESS",
                rollcall_core::quality::DEFAULT_MIN_BRIGHTNESS,
            ),
            max_brightness: env_f32(
                "ROLLCALL_MAX_BRIGHTNESS",
                rollcall_core::quality::DEFAULT_MAX_BRIGHTNESS,
            ),
            history_limit: env_u32("ROLLCALL_HISTORY_LIMIT", 30),
        }
    }

    /// Path to the face detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join("det_500m.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the face encoding model.
    pub fn encoder_model_path(&self) -> String {
        self.model_dir
            .join("w600k_mbf.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
