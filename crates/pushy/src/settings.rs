use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use pushy_core::DownloadOptions;
use pushy_platform::{AppPaths, Platform};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSettings {
    /// Update engine options, merged over the engine defaults.
    #[serde(default)]
    pub options: Map<String, Value>,

    #[serde(default)]
    pub app: AppManifest,

    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,

    #[serde(default = "default_download_retry")]
    pub download_retry: u32,

    #[serde(default = "default_download_retry_interval")]
    pub download_retry_interval_secs: u64,

    #[serde(default)]
    pub debug_logging: bool,

    #[serde(default = "default_max_log_size_bytes")]
    pub max_log_size_bytes: u64,
}

/// Native identity of the app this host updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppManifest {
    #[serde(default)]
    pub app_id: String,

    #[serde(default = "default_version_name")]
    pub version_name: String,

    #[serde(default = "default_version_code")]
    pub version_code: u64,

    #[serde(default)]
    pub platform: Platform,
}

impl Default for AppManifest {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            version_name: default_version_name(),
            version_code: default_version_code(),
            platform: Platform::current(),
        }
    }
}

fn default_version_name() -> String {
    "1.0.0".to_string()
}

fn default_version_code() -> u64 {
    100
}

fn default_http_timeout() -> u64 {
    10
}

fn default_download_timeout() -> u64 {
    60
}

fn default_download_retry() -> u32 {
    3
}

fn default_download_retry_interval() -> u64 {
    30
}

fn default_max_log_size_bytes() -> u64 {
    5 * 1024 * 1024
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            options: Map::new(),
            app: AppManifest::default(),
            http_timeout_secs: default_http_timeout(),
            download_timeout_secs: default_download_timeout(),
            download_retry: default_download_retry(),
            download_retry_interval_secs: default_download_retry_interval(),
            debug_logging: false,
            max_log_size_bytes: default_max_log_size_bytes(),
        }
    }
}

impl HostSettings {
    /// Read the settings file. A missing or unreadable file gives defaults.
    pub fn load(paths: &AppPaths) -> Self {
        let settings_path = paths.settings_file();
        if !settings_path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&settings_path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|error| {
                warn!("Ignoring malformed {}: {error}", settings_path.display());
                Self::default()
            }),
            Err(error) => {
                warn!("Failed to read {}: {error}", settings_path.display());
                Self::default()
            }
        }
    }

    pub fn save(&self, paths: &AppPaths) -> Result<(), std::io::Error> {
        paths.ensure_dirs()?;

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.settings_file(), content)?;
        Ok(())
    }

    pub fn download_options(&self, paths: &AppPaths) -> DownloadOptions {
        DownloadOptions {
            timeout: Duration::from_secs(self.download_timeout_secs),
            retry: self.download_retry,
            retry_interval: Duration::from_secs(self.download_retry_interval_secs),
            ..DownloadOptions::new(paths.download_dir())
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}
