use std::path::PathBuf;

use async_trait::async_trait;
use log::{debug, info};
use serde_json::{Map, Value};

use pushy_core::{AppIdentity, AppRuntime, ResourceVersion, RuntimeError, SystemInfo};

use crate::settings::AppManifest;

const RESOURCE_MANIFEST: &str = "manifest.json";

/// Host runtime backed by the settings manifest and the local resource tree.
pub struct DesktopRuntime {
    manifest: AppManifest,
    resource_dir: PathBuf,
}

impl DesktopRuntime {
    pub fn new(manifest: AppManifest, resource_dir: PathBuf) -> Self {
        Self {
            manifest,
            resource_dir,
        }
    }
}

#[async_trait]
impl AppRuntime for DesktopRuntime {
    fn app_identity(&self) -> Result<AppIdentity, RuntimeError> {
        if self.manifest.app_id.trim().is_empty() {
            return Err(RuntimeError::failed(
                "app identity",
                "no app_id configured in settings",
            ));
        }
        Ok(AppIdentity {
            app_id: self.manifest.app_id.clone(),
            version_name: self.manifest.version_name.clone(),
            version_code: self.manifest.version_code,
        })
    }

    fn system_info(&self) -> SystemInfo {
        let mut details = Map::new();
        details.insert("os".to_string(), Value::from(std::env::consts::OS));
        details.insert("arch".to_string(), Value::from(std::env::consts::ARCH));
        details.insert("family".to_string(), Value::from(std::env::consts::FAMILY));
        SystemInfo {
            platform: self.manifest.platform,
            details,
        }
    }

    /// Version of the installed resource tree. A tree without a manifest is
    /// the one shipped with the native build.
    async fn resource_version(&self, _app_id: &str) -> Result<ResourceVersion, RuntimeError> {
        let path = self.resource_dir.join(RESOURCE_MANIFEST);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!("No {} found, using native version", path.display());
                return Ok(ResourceVersion {
                    version_name: self.manifest.version_name.clone(),
                    version_code: self.manifest.version_code,
                });
            }
            Err(error) => return Err(RuntimeError::io("failed to read resource manifest", error)),
        };

        parse_resource_manifest(&content)
    }

    async fn device_uuid(&self) -> Result<String, RuntimeError> {
        machine_id().await
    }

    fn open_url(&self, url: &str) -> Result<(), RuntimeError> {
        info!("Opening {url}");
        open::that(url).map_err(|error| RuntimeError::io("failed to open url", error))
    }

    fn restart(&self) -> Result<(), RuntimeError> {
        let exe = std::env::current_exe()
            .map_err(|error| RuntimeError::io("failed to get current executable", error))?;

        info!("Restarting from: {}", exe.display());
        std::process::Command::new(&exe)
            .args(std::env::args_os().skip(1))
            .spawn()
            .map_err(|error| RuntimeError::io("failed to restart app", error))?;
        Ok(())
    }
}

fn parse_resource_manifest(content: &str) -> Result<ResourceVersion, RuntimeError> {
    let manifest: Value = serde_json::from_str(content)
        .map_err(|error| RuntimeError::failed("resource manifest", error.to_string()))?;
    let version = manifest
        .get("version")
        .ok_or_else(|| RuntimeError::failed("resource manifest", "missing `version`"))?;

    let version_name = version
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let version_code = version
        .get("code")
        .and_then(|code| {
            code.as_u64()
                .or_else(|| code.as_str().and_then(|text| text.trim().parse().ok()))
        })
        .ok_or_else(|| RuntimeError::failed("resource manifest", "missing `version.code`"))?;

    Ok(ResourceVersion {
        version_name,
        version_code,
    })
}

#[cfg(target_os = "linux")]
async fn machine_id() -> Result<String, RuntimeError> {
    let id = tokio::fs::read_to_string("/etc/machine-id")
        .await
        .map_err(|error| RuntimeError::io("failed to read machine id", error))?;
    let id = id.trim();
    if id.is_empty() {
        Err(RuntimeError::failed("machine id", "empty /etc/machine-id"))
    } else {
        Ok(id.to_string())
    }
}

#[cfg(not(target_os = "linux"))]
async fn machine_id() -> Result<String, RuntimeError> {
    Err(RuntimeError::Unsupported {
        operation: "device uuid",
    })
}
