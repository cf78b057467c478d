use std::fs::File;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{debug, error, info, warn};
use serde_json::Value;
use thiserror::Error;

use crate::dispatch::is_resource_package_url;
use crate::protocol::code_from_value;

const PACKAGE_MANIFEST: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRequest {
    pub path: PathBuf,
    /// Skip the newer-version check.
    pub force: bool,
    pub installed_version_code: u64,
}

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{context}: {source}")]
    Zip {
        context: &'static str,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("cannot install {0} on this host")]
    Unsupported(String),
    #[error("package version {package} is not newer than installed version {installed}")]
    NotNewer { package: u64, installed: u64 },
    #[error("{0}")]
    Invalid(String),
}

impl InstallError {
    fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }

    fn io_with_path(context: &'static str, path: &Path, source: &std::io::Error) -> Self {
        Self::io(
            context,
            std::io::Error::new(source.kind(), format!("{}: {source}", path.display())),
        )
    }

    fn zip(context: &'static str, source: zip::result::ZipError) -> Self {
        Self::Zip { context, source }
    }

    /// Short code shown next to the message in failure alerts.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            InstallError::Io { .. } => "io",
            InstallError::Zip { .. } => "archive",
            InstallError::Unsupported(_) => "unsupported",
            InstallError::NotNewer { .. } => "version",
            InstallError::Invalid(_) => "invalid",
        }
    }
}

#[async_trait]
pub trait PackageInstaller: Send + Sync {
    async fn install(&self, request: &InstallRequest) -> Result<(), InstallError>;
}

/// Installs resource packages by staging them next to the live resource
/// directory. The staged tree replaces the live one on next start through
/// [`apply_pending_resources`].
#[derive(Debug, Clone)]
pub struct ResourceInstaller {
    resource_dir: PathBuf,
}

impl ResourceInstaller {
    #[must_use]
    pub fn new(resource_dir: impl Into<PathBuf>) -> Self {
        Self {
            resource_dir: resource_dir.into(),
        }
    }

    #[must_use]
    pub fn pending_dir(&self) -> PathBuf {
        pending_dir_for(&self.resource_dir)
    }
}

#[async_trait]
impl PackageInstaller for ResourceInstaller {
    async fn install(&self, request: &InstallRequest) -> Result<(), InstallError> {
        let request = request.clone();
        let pending = self.pending_dir();

        tokio::task::spawn_blocking(move || stage_package(&request, &pending))
            .await
            .map_err(|error| InstallError::Invalid(format!("install task failed: {error}")))?
    }
}

fn stage_package(request: &InstallRequest, pending: &Path) -> Result<(), InstallError> {
    if !is_resource_package_url(&request.path.to_string_lossy()) {
        return Err(InstallError::Unsupported(request.path.display().to_string()));
    }

    if request.force {
        debug!("Forced install, skipping version check");
    } else if let Some(package) = package_version_code(&request.path)? {
        if package <= request.installed_version_code {
            return Err(InstallError::NotNewer {
                package,
                installed: request.installed_version_code,
            });
        }
    }

    if pending.exists() {
        std::fs::remove_dir_all(pending).map_err(|error| {
            InstallError::io_with_path("failed to clear previous staged update", pending, &error)
        })?;
    }
    std::fs::create_dir_all(pending).map_err(|error| {
        InstallError::io_with_path("failed to create staging directory", pending, &error)
    })?;

    if let Err(error) = extract_zip(&request.path, pending) {
        let _ = std::fs::remove_dir_all(pending);
        return Err(error);
    }

    info!(
        "Staged {} into {}",
        request.path.display(),
        pending.display()
    );
    Ok(())
}

/// `version.code` from the package manifest, if the package has one.
fn package_version_code(path: &Path) -> Result<Option<u64>, InstallError> {
    let mut archive = open_archive(path)?;
    let manifest = match archive.by_name(PACKAGE_MANIFEST) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(error) => return Err(InstallError::zip("failed to read package manifest", error)),
    };
    let manifest: Value = serde_json::from_reader(manifest)
        .map_err(|error| InstallError::Invalid(format!("malformed package manifest: {error}")))?;

    Ok(manifest
        .get("version")
        .and_then(|version| version.get("code"))
        .and_then(code_from_value))
}

fn open_archive(path: &Path) -> Result<zip::ZipArchive<File>, InstallError> {
    let file = File::open(path)
        .map_err(|error| InstallError::io_with_path("failed to open package", path, &error))?;
    zip::ZipArchive::new(file).map_err(|error| InstallError::zip("failed to read package", error))
}

fn extract_zip(zip_path: &Path, dest: &Path) -> Result<(), InstallError> {
    let mut archive = open_archive(zip_path)?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|error| InstallError::zip("failed to read package entry", error))?;
        let Some(name) = entry.enclosed_name() else {
            warn!("Skipping package entry with unsafe path");
            continue;
        };
        let out_path = dest.join(name);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(|error| {
                InstallError::io_with_path("failed to create package directory", &out_path, &error)
            })?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                InstallError::io_with_path("failed to create package directory", parent, &error)
            })?;
        }
        let mut outfile = File::create(&out_path).map_err(|error| {
            InstallError::io_with_path("failed to create package file", &out_path, &error)
        })?;
        std::io::copy(&mut entry, &mut outfile).map_err(|error| {
            InstallError::io_with_path("failed to extract package entry", &out_path, &error)
        })?;
    }

    debug!("Extraction complete to {}", dest.display());
    Ok(())
}

fn pending_dir_for(resource_dir: &Path) -> PathBuf {
    sibling_with_suffix(resource_dir, "pending")
}

fn sibling_with_suffix(dir: &Path, suffix: &str) -> PathBuf {
    let mut name = dir.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(suffix);
    dir.with_file_name(name)
}

/// Move the previous resource tree back. Returns whether it worked.
fn restore_backup(backup: &Path, resource_dir: &Path) -> bool {
    match std::fs::rename(backup, resource_dir) {
        Ok(()) => true,
        Err(error) => {
            error!(
                "Failed to restore {} to {}, no resources are live: {error}",
                backup.display(),
                resource_dir.display()
            );
            false
        }
    }
}

/// Swap a staged resource tree into place. Returns whether anything was
/// applied.
///
/// # Errors
/// Returns an error if the live tree cannot be moved aside or the staged tree
/// cannot be moved in. The previous tree is restored in the latter case.
pub fn apply_pending_resources(resource_dir: &Path) -> Result<bool, InstallError> {
    let pending = pending_dir_for(resource_dir);
    if !pending.is_dir() {
        return Ok(false);
    }

    let backup = sibling_with_suffix(resource_dir, "old");
    if backup.exists() {
        std::fs::remove_dir_all(&backup).map_err(|error| {
            InstallError::io_with_path("failed to remove old backup", &backup, &error)
        })?;
    }

    let had_live = resource_dir.exists();
    if had_live {
        std::fs::rename(resource_dir, &backup).map_err(|error| {
            InstallError::io_with_path("failed to move resources aside", resource_dir, &error)
        })?;
    }

    if let Err(error) = std::fs::rename(&pending, resource_dir) {
        warn!("Applying staged resources failed, restoring backup: {error}");
        if had_live {
            restore_backup(&backup, resource_dir);
        }
        return Err(InstallError::io_with_path(
            "failed to apply staged resources",
            &pending,
            &error,
        ));
    }

    if had_live && let Err(error) = std::fs::remove_dir_all(&backup) {
        warn!("Failed to remove {}: {error}", backup.display());
    }

    info!("Applied staged resources to {}", resource_dir.display());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;
    use std::path::{Path, PathBuf};

    use super::{
        InstallError, InstallRequest, PackageInstaller, ResourceInstaller,
        apply_pending_resources, restore_backup,
    };

    fn write_package(dir: &Path, name: &str, manifest: Option<&str>) -> PathBuf {
        let path = dir.join(name);
        let file = std::fs::File::create(&path).expect("package file should be created");
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        if let Some(manifest) = manifest {
            writer
                .start_file("manifest.json", options)
                .expect("manifest entry should be started");
            writer
                .write_all(manifest.as_bytes())
                .expect("manifest should be written");
        }
        writer
            .start_file("pages/index.html", options)
            .expect("page entry should be started");
        writer.write_all(b"<p>new</p>").expect("page should be written");
        writer
            .start_file("../escape.txt", options)
            .expect("unsafe entry should be started");
        writer.write_all(b"nope").expect("unsafe entry should be written");
        writer.finish().expect("package should be finalized");
        path
    }

    fn request(path: PathBuf, force: bool, installed: u64) -> InstallRequest {
        InstallRequest {
            path,
            force,
            installed_version_code: installed,
        }
    }

    #[tokio::test]
    async fn stages_newer_package_and_skips_unsafe_entries() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let package = write_package(
            temp.path(),
            "app.wgt",
            Some(r#"{ "version": { "name": "1.0.2", "code": "102" } }"#),
        );
        let installer = ResourceInstaller::new(temp.path().join("www"));

        installer
            .install(&request(package, false, 101))
            .await
            .expect("newer package should install");

        let staged = installer.pending_dir();
        assert_eq!(staged, temp.path().join("www.pending"));
        assert_eq!(
            std::fs::read(staged.join("pages/index.html")).expect("page should be staged"),
            b"<p>new</p>"
        );
        assert!(!temp.path().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn refuses_package_that_is_not_newer_unless_forced() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let package = write_package(
            temp.path(),
            "app.wgt",
            Some(r#"{ "version": { "code": 100 } }"#),
        );
        let installer = ResourceInstaller::new(temp.path().join("www"));

        let result = installer.install(&request(package.clone(), false, 100)).await;
        assert!(matches!(
            result,
            Err(InstallError::NotNewer {
                package: 100,
                installed: 100
            })
        ));
        assert!(!installer.pending_dir().exists());

        installer
            .install(&request(package, true, 100))
            .await
            .expect("forced install should succeed");
        assert!(installer.pending_dir().join("manifest.json").exists());
    }

    #[tokio::test]
    async fn native_packages_are_unsupported() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let installer = ResourceInstaller::new(temp.path().join("www"));

        let result = installer
            .install(&request(temp.path().join("app.apk"), true, 0))
            .await;

        let error = result.expect_err("apk should be rejected");
        assert_eq!(error.code(), "unsupported");
    }

    #[tokio::test]
    async fn corrupt_archive_fails_without_staging() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let package = temp.path().join("broken.wgt");
        std::fs::write(&package, b"not a zip").expect("file should be written");
        let installer = ResourceInstaller::new(temp.path().join("www"));

        let result = installer.install(&request(package, true, 0)).await;

        assert!(matches!(result, Err(InstallError::Zip { .. })));
        assert!(!installer.pending_dir().exists());
    }

    #[test]
    fn apply_pending_swaps_trees() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let live = temp.path().join("www");
        std::fs::create_dir_all(&live).expect("live dir should be created");
        std::fs::write(live.join("index.html"), b"old").expect("old page should be written");

        assert!(!apply_pending_resources(&live).expect("nothing staged should be fine"));

        let pending = temp.path().join("www.pending");
        std::fs::create_dir_all(&pending).expect("pending dir should be created");
        std::fs::write(pending.join("index.html"), b"new").expect("new page should be written");

        assert!(apply_pending_resources(&live).expect("apply should succeed"));
        assert_eq!(
            std::fs::read(live.join("index.html")).expect("page should exist"),
            b"new"
        );
        assert!(!pending.exists());
        assert!(!temp.path().join("www.old").exists());
    }

    #[test]
    fn restore_backup_reports_a_missing_backup() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let live = temp.path().join("www");
        let backup = temp.path().join("www.old");

        assert!(!restore_backup(&backup, &live));
        assert!(!live.exists());

        std::fs::create_dir_all(backup.join("pages")).expect("backup should be created");
        assert!(restore_backup(&backup, &live));
        assert!(live.join("pages").is_dir());
        assert!(!backup.exists());
    }
}
