use log::{debug, warn};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::runtime::{AppRuntime, RuntimeError};
use pushy_platform::Platform;

/// Snapshot of the app's identity and installed versions.
///
/// Collected once per client; a higher version code is always newer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub app_id: String,
    pub native_version_name: String,
    pub native_version_code: u64,
    pub resource_version_name: String,
    pub resource_version_code: u64,
    pub platform: Platform,
    pub device_uuid: Option<String>,
    pub system_info: Map<String, Value>,
}

impl VersionInfo {
    /// Device metadata as sent to the server, with platform and uuid merged in.
    #[must_use]
    pub fn system_info_json(&self) -> Value {
        let mut info = self.system_info.clone();
        info.insert(
            "platform".to_string(),
            Value::String(self.platform.as_str().to_string()),
        );
        if let Some(uuid) = &self.device_uuid {
            info.insert("uuid".to_string(), Value::String(uuid.clone()));
        }
        Value::Object(info)
    }
}

#[derive(Debug, Error)]
pub enum InitError {
    #[error("failed to read app identity: {0}")]
    Identity(#[source] RuntimeError),
    #[error("failed to read resource version: {0}")]
    ResourceVersion(#[source] RuntimeError),
}

/// Query the runtime for everything a version check needs.
///
/// Identity and resource version are required; the device uuid is not.
pub(crate) async fn collect_version_info(
    runtime: &dyn AppRuntime,
) -> Result<VersionInfo, InitError> {
    let identity = runtime.app_identity().map_err(InitError::Identity)?;
    let system = runtime.system_info();

    let resource = runtime
        .resource_version(&identity.app_id)
        .await
        .map_err(InitError::ResourceVersion)?;

    let device_uuid = match runtime.device_uuid().await {
        Ok(uuid) => Some(uuid),
        Err(error) => {
            warn!("Failed to read device uuid, continuing without it: {error}");
            None
        }
    };

    debug!(
        "Collected version info for {}: native {} ({}), resource {} ({})",
        identity.app_id,
        identity.version_name,
        identity.version_code,
        resource.version_name,
        resource.version_code
    );

    Ok(VersionInfo {
        app_id: identity.app_id,
        native_version_name: identity.version_name,
        native_version_code: identity.version_code,
        resource_version_name: resource.version_name,
        resource_version_code: resource.version_code,
        platform: system.platform,
        device_uuid,
        system_info: system.details,
    })
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{Map, Value, json};

    use super::{InitError, collect_version_info};
    use crate::runtime::{AppIdentity, AppRuntime, ResourceVersion, RuntimeError, SystemInfo};
    use pushy_platform::Platform;

    struct StubRuntime {
        identity_fails: bool,
        uuid_fails: bool,
    }

    #[async_trait]
    impl AppRuntime for StubRuntime {
        fn app_identity(&self) -> Result<AppIdentity, RuntimeError> {
            if self.identity_fails {
                return Err(RuntimeError::failed("identity", "no runtime"));
            }
            Ok(AppIdentity {
                app_id: "__UNI__ABC".to_string(),
                version_name: "1.0.0".to_string(),
                version_code: 100,
            })
        }

        fn system_info(&self) -> SystemInfo {
            let mut details = Map::new();
            details.insert("model".to_string(), Value::from("Pixel"));
            SystemInfo {
                platform: Platform::Android,
                details,
            }
        }

        async fn resource_version(&self, app_id: &str) -> Result<ResourceVersion, RuntimeError> {
            assert_eq!(app_id, "__UNI__ABC");
            Ok(ResourceVersion {
                version_name: "1.0.3".to_string(),
                version_code: 103,
            })
        }

        async fn device_uuid(&self) -> Result<String, RuntimeError> {
            if self.uuid_fails {
                Err(RuntimeError::failed("device info", "permission denied"))
            } else {
                Ok("uuid-1".to_string())
            }
        }

        fn open_url(&self, _url: &str) -> Result<(), RuntimeError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn collects_identity_resource_and_uuid() {
        let runtime = StubRuntime {
            identity_fails: false,
            uuid_fails: false,
        };

        let info = collect_version_info(&runtime)
            .await
            .expect("collection should succeed");

        assert_eq!(info.native_version_code, 100);
        assert_eq!(info.resource_version_code, 103);
        assert_eq!(info.platform, Platform::Android);
        assert_eq!(info.device_uuid.as_deref(), Some("uuid-1"));
        assert_eq!(
            info.system_info_json(),
            json!({ "model": "Pixel", "platform": "android", "uuid": "uuid-1" })
        );
    }

    #[tokio::test]
    async fn uuid_failure_is_not_fatal() {
        let runtime = StubRuntime {
            identity_fails: false,
            uuid_fails: true,
        };

        let info = collect_version_info(&runtime)
            .await
            .expect("collection should still succeed");

        assert_eq!(info.device_uuid, None);
        assert!(info.system_info_json().get("uuid").is_none());
    }

    #[tokio::test]
    async fn identity_failure_is_fatal() {
        let runtime = StubRuntime {
            identity_fails: true,
            uuid_fails: false,
        };

        let result = collect_version_info(&runtime).await;

        assert!(matches!(result, Err(InitError::Identity(_))));
    }
}
