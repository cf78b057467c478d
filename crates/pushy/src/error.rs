use thiserror::Error;

use pushy_core::{CustomDownloadError, InitError, RuntimeError, StatusCode};
use pushy_platform::AppPathsError;

#[derive(Debug, Error)]
pub enum HostError {
    #[error(transparent)]
    Paths(#[from] AppPathsError),
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
    #[error("update client initialization failed: {0}")]
    Init(#[from] InitError),
    #[error("failed to encode output: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid option `{0}`, expected KEY=VALUE")]
    InvalidOption(String),
    #[error("download could not start [{code}]: {0}", code = .0.code())]
    Download(#[source] CustomDownloadError),
    #[error("failed to restart: {0}")]
    Restart(#[source] RuntimeError),
    #[error("update check failed [{status}]: {message}")]
    Check { status: StatusCode, message: String },
}

impl HostError {
    pub fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }
}
