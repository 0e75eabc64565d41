use std::path::PathBuf;

use thiserror::Error;

/// All errors produced by micvad-core.
#[derive(Debug, Error)]
pub enum VadError {
    #[error("invalid configuration: {field}: {reason}")]
    Configuration { field: &'static str, reason: String },

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("model unavailable{}: {reason}", display_path(.path))]
    ModelUnavailable {
        path: Option<PathBuf>,
        reason: String,
    },

    #[error("session is already running")]
    AlreadyRunning,

    #[error("session is not running")]
    NotRunning,

    #[error("audio source error: {0}")]
    AudioSource(String),

    #[error("inference error: {0}")]
    Inference(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VadError {
    pub(crate) fn config(field: &'static str, reason: impl Into<String>) -> Self {
        VadError::Configuration {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn model(path: Option<PathBuf>, reason: impl Into<String>) -> Self {
        VadError::ModelUnavailable {
            path,
            reason: reason.into(),
        }
    }
}

fn display_path(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| format!(" ({})", p.display()))
        .unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, VadError>;
