use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("invalid override '{0}': expected SECTION.NAME=VALUE")]
    InvalidOverride(String),

    #[error("required file not found: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("{}:{line}: {message}", path.display())]
    ConfigParse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("missing configuration value {section}.{key}")]
    MissingConfigKey { section: String, key: String },

    #[error("external tool not found: {0}")]
    ToolNotFound(String),

    #[error("{tool} failed ({status}){}", fmt_stderr(.stderr))]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("{name} did not become ready after {attempts} attempts")]
    ReadinessTimeout { name: String, attempts: u32 },

    #[error("{name} exited before becoming ready ({status})")]
    ProcessExited { name: String, status: String },

    #[error("unknown signal name: {0}")]
    InvalidSignal(String),

    #[error("action cache: {0}")]
    CacheStore(String),

    #[error("no certificates found in {}", .0.display())]
    MissingCertificates(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ProvisionError {
    /// Bad operator input: reported before any state is touched.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidOverride(_)
                | Self::MissingFile(_)
                | Self::ConfigParse { .. }
                | Self::MissingConfigKey { .. }
                | Self::InvalidSignal(_)
                | Self::Yaml(_)
        )
    }
}

fn fmt_stderr(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

pub type Result<T> = std::result::Result<T, ProvisionError>;

