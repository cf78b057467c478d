use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use pushy_platform::Platform;

/// Native identity of the running app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppIdentity {
    pub app_id: String,
    pub version_name: String,
    pub version_code: u64,
}

/// Version of the resource package currently installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceVersion {
    pub version_name: String,
    pub version_code: u64,
}

/// Device metadata reported by the host. Sent to the server verbatim.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SystemInfo {
    pub platform: Platform,
    pub details: Map<String, Value>,
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("{operation} is not supported by this runtime")]
    Unsupported { operation: &'static str },
    #[error("{context}: {details}")]
    Failed {
        context: &'static str,
        details: String,
    },
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl RuntimeError {
    pub fn failed(context: &'static str, details: impl Into<String>) -> Self {
        Self::Failed {
            context,
            details: details.into(),
        }
    }

    pub fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }
}

/// Capabilities the host platform provides to the update engine.
#[async_trait]
pub trait AppRuntime: Send + Sync {
    fn app_identity(&self) -> Result<AppIdentity, RuntimeError>;

    fn system_info(&self) -> SystemInfo;

    async fn resource_version(&self, app_id: &str) -> Result<ResourceVersion, RuntimeError>;

    /// Optional device identifier. Failures here never block initialization.
    async fn device_uuid(&self) -> Result<String, RuntimeError>;

    /// Hand a URL to the app store or browser.
    fn open_url(&self, url: &str) -> Result<(), RuntimeError>;

    fn restart(&self) -> Result<(), RuntimeError> {
        Err(RuntimeError::Unsupported {
            operation: "restart",
        })
    }
}
