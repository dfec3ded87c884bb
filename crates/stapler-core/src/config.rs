//! Configuration types and loading

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Engine configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct StaplerConfig {
    /// Application base directory, substituted for `:app_root`
    pub app_root: PathBuf,

    /// Directory under `app_root` that attachment URLs are served from
    pub public_dir: String,

    /// Directory genuine uploads are staged in before the save commits
    pub upload_tmp_dir: PathBuf,

    /// Reject attachment definitions with problems instead of logging them
    pub strict_definitions: bool,

    /// Resize images for styles with a dimension spec
    pub image_processing: bool,
}

impl Default for StaplerConfig {
    fn default() -> Self {
        Self {
            app_root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            public_dir: "public".to_string(),
            upload_tmp_dir: std::env::temp_dir(),
            strict_definitions: false,
            image_processing: true,
        }
    }
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

impl StaplerConfig {
    /// Create a configuration rooted at the given application directory
    pub fn with_app_root(app_root: impl Into<PathBuf>) -> Self {
        Self {
            app_root: app_root.into(),
            ..Self::default()
        }
    }

    /// Load `.env` (if present) and then the environment
    pub fn load() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(path) => debug!(path = %path.display(), "Loaded environment file"),
            Err(e) if e.not_found() => {}
            Err(e) => warn!(error = %e, "Failed to read environment file, using process environment"),
        }

        let config = Self::from_env()?;
        debug!(
            app_root = %config.app_root.display(),
            public_dir = %config.public_dir,
            strict_definitions = config.strict_definitions,
            image_processing = config.image_processing,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(root) = std::env::var("STAPLER_APP_ROOT") {
            config.app_root = PathBuf::from(root);
        }
        if let Ok(public_dir) = std::env::var("STAPLER_PUBLIC_DIR") {
            config.public_dir = public_dir;
        }
        if let Ok(tmp) = std::env::var("STAPLER_UPLOAD_TMP_DIR") {
            config.upload_tmp_dir = PathBuf::from(tmp);
        }
        if let Ok(v) = std::env::var("STAPLER_STRICT_DEFINITIONS") {
            config.strict_definitions = parse_bool("STAPLER_STRICT_DEFINITIONS", &v)?;
        }
        if let Ok(v) = std::env::var("STAPLER_IMAGE_PROCESSING") {
            config.image_processing = parse_bool("STAPLER_IMAGE_PROCESSING", &v)?;
        }

        Ok(config)
    }

    /// Application root as a string, without a trailing separator
    pub fn app_root_str(&self) -> String {
        self.app_root
            .to_string_lossy()
            .trim_end_matches('/')
            .to_string()
    }

    /// Filesystem prefix that URLs are appended to
    pub fn public_root(&self) -> String {
        let public_dir = self.public_dir.trim_matches('/');
        if public_dir.is_empty() {
            self.app_root_str()
        } else {
            format!("{}/{}", self.app_root_str(), public_dir)
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got {:?}", other),
        }),
    }
}
