use rollcall_core::similarity::DEFAULT_MATCH_THRESHOLD;
use rollcall_core::{ModelVariant, PhotoFilter};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Engine configuration.
///
/// Built from defaults, then an optional TOML file named by
/// `ROLLCALL_CONFIG`, then `ROLLCALL_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing the bundled ONNX model files.
    pub model_dir: PathBuf,
    /// File name of the face-embedding model inside `model_dir`.
    pub embedding_model: String,
    /// File name of the image-classifier model inside `model_dir`.
    pub classifier_model: String,
    /// File name of the classifier label table inside `model_dir`.
    pub classifier_labels: String,
    /// Float or quantized model assets.
    pub model_variant: ModelVariant,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Cosine similarity at or above which a registry entry matches.
    pub similarity_threshold: f32,
    /// Number of matches kept for the live preview.
    pub live_top_n: usize,
    /// Upper bound for one inference request.
    pub inference_timeout_secs: u64,
    /// Capacity of the engine request channel.
    pub engine_queue_depth: usize,
    /// Top score a photo needs when no accept list is configured.
    pub classifier_min_confidence: f32,
    /// Labels accepted by the photo pre-filter (empty = use confidence).
    pub classifier_accept_labels: Vec<String>,
}

/// On-disk shape of the TOML config file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    model_dir: Option<PathBuf>,
    embedding_model: Option<String>,
    classifier_model: Option<String>,
    classifier_labels: Option<String>,
    model_variant: Option<ModelVariant>,
    db_path: Option<PathBuf>,
    similarity_threshold: Option<f32>,
    live_top_n: Option<usize>,
    inference_timeout_secs: Option<u64>,
    engine_queue_depth: Option<usize>,
    classifier_min_confidence: Option<f32>,
    classifier_accept_labels: Option<Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = data_dir();
        Self {
            model_dir: data_dir.join("models"),
            embedding_model: "facenet512.onnx".to_string(),
            classifier_model: "mobilenet_v2.onnx".to_string(),
            classifier_labels: "labels.txt".to_string(),
            model_variant: ModelVariant::Float,
            db_path: data_dir.join("rollcall.db"),
            similarity_threshold: DEFAULT_MATCH_THRESHOLD,
            live_top_n: 3,
            inference_timeout_secs: 10,
            engine_queue_depth: 4,
            classifier_min_confidence: 0.5,
            classifier_accept_labels: Vec::new(),
        }
    }
}

impl Config {
    /// Defaults overridden by `ROLLCALL_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Defaults, then the file named by `ROLLCALL_CONFIG` (if set), then
    /// environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(path) = std::env::var("ROLLCALL_CONFIG") {
            config.apply_file(Path::new(&path))?;
        }
        config.apply_env();
        Ok(config)
    }

    /// Overlay the keys present in a TOML config file.
    pub fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        self.apply_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(path = %path.display(), "loaded config file");
        Ok(())
    }

    fn apply_toml(&mut self, text: &str) -> Result<(), toml::de::Error> {
        let file: FileConfig = toml::from_str(text)?;
        macro_rules! overlay {
            ($($field:ident),*) => {
                $(if let Some(v) = file.$field { self.$field = v; })*
            };
        }
        overlay!(
            model_dir,
            embedding_model,
            classifier_model,
            classifier_labels,
            model_variant,
            db_path,
            similarity_threshold,
            live_top_n,
            inference_timeout_secs,
            engine_queue_depth,
            classifier_min_confidence,
            classifier_accept_labels
        );
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ROLLCALL_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ROLLCALL_MODEL_VARIANT") {
            match v.parse() {
                Ok(variant) => self.model_variant = variant,
                Err(e) => tracing::warn!(error = %e, "ignoring ROLLCALL_MODEL_VARIANT"),
            }
        }
        if let Ok(v) = std::env::var("ROLLCALL_CLASSIFIER_ACCEPT_LABELS") {
            self.classifier_accept_labels = split_list(&v);
        }
        self.similarity_threshold =
            env_f32("ROLLCALL_SIMILARITY_THRESHOLD", self.similarity_threshold);
        self.live_top_n = env_usize("ROLLCALL_LIVE_TOP_N", self.live_top_n);
        self.inference_timeout_secs =
            env_u64("ROLLCALL_INFERENCE_TIMEOUT_SECS", self.inference_timeout_secs);
        self.engine_queue_depth = env_usize("ROLLCALL_ENGINE_QUEUE_DEPTH", self.engine_queue_depth);
        self.classifier_min_confidence = env_f32(
            "ROLLCALL_CLASSIFIER_MIN_CONFIDENCE",
            self.classifier_min_confidence,
        );
    }

    /// Path to the face-embedding model.
    pub fn embedding_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.embedding_model)
    }

    /// Path to the image-classifier model.
    pub fn classifier_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.classifier_model)
    }

    /// Path to the classifier label table.
    pub fn classifier_labels_path(&self) -> PathBuf {
        self.model_dir.join(&self.classifier_labels)
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference_timeout_secs)
    }

    pub fn photo_filter(&self) -> PhotoFilter {
        PhotoFilter {
            accept_labels: self.classifier_accept_labels.clone(),
            min_confidence: self.classifier_min_confidence,
        }
    }
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

fn split_list(v: &str) -> Vec<String> {
    v.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
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
