use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use log::{debug, info, warn};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::download::{
    DownloadOptions, DownloadReporter, DownloadState, DownloadTask, Downloader, STATUS_OK,
};

const FALLBACK_FILE_NAME: &str = "update-download";

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("failed to build download client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("download request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("download failed with HTTP {0}")]
    Status(reqwest::StatusCode),
    #[error("download stream error: {0}")]
    Stream(#[source] reqwest::Error),
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("download aborted")]
    Aborted,
}

impl DownloadError {
    fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }

    /// Status reported in the `Finished` event.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            DownloadError::Status(status) => status.as_u16(),
            _ => 0,
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            DownloadError::Request(_) | DownloadError::Stream(_) => true,
            DownloadError::Status(status) => status.is_server_error(),
            _ => false,
        }
    }
}

/// Streams packages over HTTP on the tokio runtime.
///
/// `start` spawns the transfer, so it must be called from within a runtime.
pub struct HttpDownloader {
    user_agent: String,
}

impl Default for HttpDownloader {
    fn default() -> Self {
        Self {
            user_agent: format!("pushy/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpDownloader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_user_agent(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
        }
    }
}

impl Downloader for HttpDownloader {
    fn start(&self, url: &str, options: &DownloadOptions) -> DownloadTask {
        let (reporter, task) = DownloadTask::channel();
        let url = url.to_string();
        let options = options.clone();
        let user_agent = self.user_agent.clone();

        tokio::spawn(async move {
            run_download(reporter, &url, &options, &user_agent).await;
        });

        task
    }
}

async fn run_download(
    reporter: DownloadReporter,
    url: &str,
    options: &DownloadOptions,
    user_agent: &str,
) {
    reporter.state(DownloadState::Started).await;
    info!("Downloading update from {url}");

    let result = tokio::select! {
        () = reporter.cancelled() => Err(DownloadError::Aborted),
        result = download_with_retries(&reporter, url, options, user_agent) => result,
    };

    match result {
        Ok(path) => {
            info!("Download complete: {}", path.display());
            reporter.state(DownloadState::Completed).await;
            reporter.finish(STATUS_OK, Some(path)).await;
        }
        Err(DownloadError::Aborted) => {
            info!("Download of {url} aborted");
            reporter.finish(0, None).await;
        }
        Err(error) => {
            warn!("Download of {url} failed: {error}");
            let status = error.status_code();
            reporter.finish(status, None).await;
        }
    }
}

async fn download_with_retries(
    reporter: &DownloadReporter,
    url: &str,
    options: &DownloadOptions,
    user_agent: &str,
) -> Result<PathBuf, DownloadError> {
    let client = reqwest::Client::builder()
        .connect_timeout(options.timeout)
        .read_timeout(options.timeout)
        .user_agent(user_agent)
        .build()
        .map_err(DownloadError::Client)?;

    let attempts = options.retry.saturating_add(1);
    let mut attempt = 1;
    loop {
        match download_once(&client, reporter, url, &options.dest_dir).await {
            Ok(path) => return Ok(path),
            Err(error) if error.is_retryable() && attempt < attempts => {
                warn!(
                    "Download attempt {attempt}/{attempts} failed, retrying in {:?}: {error}",
                    options.retry_interval
                );
                tokio::time::sleep(options.retry_interval).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

async fn download_once(
    client: &reqwest::Client,
    reporter: &DownloadReporter,
    url: &str,
    dest_dir: &Path,
) -> Result<PathBuf, DownloadError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(DownloadError::Request)?;

    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::Status(status));
    }
    reporter.state(DownloadState::Connected).await;

    let total = response.content_length().unwrap_or(0);

    tokio::fs::create_dir_all(dest_dir)
        .await
        .map_err(|error| DownloadError::io("failed to create download directory", error))?;
    let staging = tempfile::Builder::new()
        .prefix(".download")
        .tempfile_in(dest_dir)
        .map_err(|error| DownloadError::io("failed to create download file", error))?;
    // the temp path removes the partial file if this future is dropped
    let (file, staging_path) = staging.into_parts();
    let mut file = tokio::fs::File::from_std(file);

    reporter.state(DownloadState::Transferring).await;

    let mut downloaded: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(DownloadError::Stream)?;
        file.write_all(&chunk)
            .await
            .map_err(|error| DownloadError::io("failed to write download data", error))?;
        downloaded += chunk.len() as u64;
        reporter.progress(downloaded, total).await;
    }

    file.flush()
        .await
        .map_err(|error| DownloadError::io("failed to flush download file", error))?;
    drop(file);

    let target = unique_destination(dest_dir, &file_name_from_url(url));
    staging_path
        .persist(&target)
        .map_err(|error| DownloadError::io("failed to move download into place", error.error))?;

    debug!("Downloaded {downloaded} bytes to {}", target.display());
    Ok(target)
}

fn file_name_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let raw_name = path.rsplit('/').next().unwrap_or_default();
    Path::new(raw_name)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty() && !name.contains(".."))
        .unwrap_or(FALLBACK_FILE_NAME)
        .to_string()
}

fn unique_destination(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let (stem, extension) = match file_name.rsplit_once('.') {
        Some((stem, extension)) if !stem.is_empty() => (stem, Some(extension)),
        _ => (file_name, None),
    };
    (1..)
        .map(|index| match extension {
            Some(extension) => dir.join(format!("{stem} ({index}).{extension}")),
            None => dir.join(format!("{stem} ({index})")),
        })
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}
