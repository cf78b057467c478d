use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};

use crate::protocol::PackageDescriptor;

/// Error attached to an outcome. Shared so outcomes stay cheap to clone into
/// event payloads.
pub type OutcomeError = Arc<dyn std::error::Error + Send + Sync>;

/// Closed set of results an update check can end in.
///
/// 25x come from the endpoint, 45x from configuration, 47x from the client's
/// own state, 5xx are failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    NativeUpdateRequired,
    ResourceUpdateRequired,
    NoUpdateAvailable,
    ServerRejected,
    UpdateDisabled,
    NoEndpointConfigured,
    NoProjectId,
    AlreadyChecking,
    AlreadySilentUpdating,
    AlreadyUpdatedPendingRestart,
    AlreadyUpdating,
    TransportFailed,
    UnknownError,
}

impl StatusCode {
    pub const ALL: [StatusCode; 13] = [
        StatusCode::NativeUpdateRequired,
        StatusCode::ResourceUpdateRequired,
        StatusCode::NoUpdateAvailable,
        StatusCode::ServerRejected,
        StatusCode::UpdateDisabled,
        StatusCode::NoEndpointConfigured,
        StatusCode::NoProjectId,
        StatusCode::AlreadyChecking,
        StatusCode::AlreadySilentUpdating,
        StatusCode::AlreadyUpdatedPendingRestart,
        StatusCode::AlreadyUpdating,
        StatusCode::TransportFailed,
        StatusCode::UnknownError,
    ];

    #[must_use]
    pub fn code(self) -> u16 {
        match self {
            StatusCode::NativeUpdateRequired => 251,
            StatusCode::ResourceUpdateRequired => 252,
            StatusCode::NoUpdateAvailable => 253,
            StatusCode::ServerRejected => 254,
            StatusCode::UpdateDisabled => 451,
            StatusCode::NoEndpointConfigured => 452,
            StatusCode::NoProjectId => 453,
            StatusCode::AlreadyChecking => 473,
            StatusCode::AlreadySilentUpdating => 474,
            StatusCode::AlreadyUpdatedPendingRestart => 475,
            StatusCode::AlreadyUpdating => 476,
            StatusCode::TransportFailed => 500,
            StatusCode::UnknownError => 505,
        }
    }

    #[must_use]
    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.code() == code)
    }

    #[must_use]
    pub fn default_message(self) -> &'static str {
        match self {
            StatusCode::NativeUpdateRequired => "A native update is required",
            StatusCode::ResourceUpdateRequired => "A resource package update is required",
            StatusCode::NoUpdateAvailable => "No update available",
            StatusCode::ServerRejected => "The update server reported a failure",
            StatusCode::UpdateDisabled => "Update checks are disabled",
            StatusCode::NoEndpointConfigured => "No update URL configured",
            StatusCode::NoProjectId => "Missing or invalid project id",
            StatusCode::AlreadyChecking => "Already checking for updates...",
            StatusCode::AlreadySilentUpdating => "A silent update is in progress...",
            StatusCode::AlreadyUpdatedPendingRestart => {
                "Update installed, restart the app to apply it"
            }
            StatusCode::AlreadyUpdating => "An update is in progress...",
            StatusCode::TransportFailed => "Update request failed",
            StatusCode::UnknownError => "Unknown error",
        }
    }

    #[must_use]
    pub fn is_update_required(self) -> bool {
        matches!(
            self,
            StatusCode::NativeUpdateRequired | StatusCode::ResourceUpdateRequired
        )
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl Serialize for StatusCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.code())
    }
}

/// Tagged result of one update check. Every path through the client ends in
/// one of these; nothing is thrown.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOutcome {
    pub status_code: StatusCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<PackageDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_error"
    )]
    pub error: Option<OutcomeError>,
}

impl UpdateOutcome {
    #[must_use]
    pub fn new(status_code: StatusCode) -> Self {
        Self {
            status_code,
            message: status_code.default_message().to_string(),
            data: None,
            response: None,
            error: None,
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    #[must_use]
    pub fn with_data(mut self, data: PackageDescriptor) -> Self {
        self.data = Some(data);
        self
    }

    #[must_use]
    pub fn with_response(mut self, response: serde_json::Value) -> Self {
        self.response = Some(response);
        self
    }

    #[must_use]
    pub fn with_error<E>(mut self, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.message = error.to_string();
        self.error = Some(Arc::new(error));
        self
    }

    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }
}

#[allow(clippy::ref_option)]
fn serialize_error<S: Serializer>(
    error: &Option<OutcomeError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(error) => serializer.serialize_str(&error.to_string()),
        None => serializer.serialize_none(),
    }
}
