use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// `Finished` status of a successful transfer.
pub const STATUS_OK: u16 = 200;

const EVENT_BUFFER: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    Started,
    Connected,
    Transferring,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    StateChanged(DownloadState),
    /// `total` is 0 when the server sent no length.
    Progress { downloaded: u64, total: u64 },
    /// Last event of every task. Any status other than [`STATUS_OK`] is a
    /// failed transfer, 0 meaning it never got an HTTP status.
    Finished { status: u16, path: Option<PathBuf> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOptions {
    pub dest_dir: PathBuf,
    /// Connect and per-read timeout.
    pub timeout: Duration,
    pub retry: u32,
    pub retry_interval: Duration,
}

impl DownloadOptions {
    #[must_use]
    pub fn new(dest_dir: impl Into<PathBuf>) -> Self {
        Self {
            dest_dir: dest_dir.into(),
            timeout: Duration::from_secs(60),
            retry: 3,
            retry_interval: Duration::from_secs(30),
        }
    }
}

/// Consumer side of one download.
pub struct DownloadTask {
    events: mpsc::Receiver<DownloadEvent>,
    cancel: CancellationToken,
    finished: bool,
}

impl DownloadTask {
    /// Create a connected reporter/task pair.
    #[must_use]
    pub fn channel() -> (DownloadReporter, DownloadTask) {
        let (sender, events) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();
        let reporter = DownloadReporter {
            events: sender,
            cancel: cancel.clone(),
        };
        let task = DownloadTask {
            events,
            cancel,
            finished: false,
        };
        (reporter, task)
    }

    /// Next event, or `None` once `Finished` has been delivered.
    ///
    /// A reporter dropped without finishing yields `Finished` with status 0.
    pub async fn next_event(&mut self) -> Option<DownloadEvent> {
        if self.finished {
            return None;
        }
        let event = self.events.recv().await.unwrap_or(DownloadEvent::Finished {
            status: 0,
            path: None,
        });
        if matches!(event, DownloadEvent::Finished { .. }) {
            self.finished = true;
            self.events.close();
        }
        Some(event)
    }

    /// Token that aborts this download when cancelled.
    #[must_use]
    pub fn abort_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn abort(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Producer side handed to whatever performs the transfer.
pub struct DownloadReporter {
    events: mpsc::Sender<DownloadEvent>,
    cancel: CancellationToken,
}

impl DownloadReporter {
    pub async fn state(&self, state: DownloadState) {
        let _ = self.events.send(DownloadEvent::StateChanged(state)).await;
    }

    pub async fn progress(&self, downloaded: u64, total: u64) {
        let _ = self
            .events
            .send(DownloadEvent::Progress { downloaded, total })
            .await;
    }

    /// Deliver the terminal event. Consumes the reporter so it fires once.
    pub async fn finish(self, status: u16, path: Option<PathBuf>) {
        let _ = self
            .events
            .send(DownloadEvent::Finished { status, path })
            .await;
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the consumer aborts.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}

/// Starts file transfers. Implementations report through the returned task.
pub trait Downloader: Send + Sync {
    fn start(&self, url: &str, options: &DownloadOptions) -> DownloadTask;
}

/// Whole-number percentage, 0 when the total is unknown.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn percentage(downloaded: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let percent = u128::from(downloaded) * 100 / u128::from(total);
    percent.min(100) as u8
}

/// Drops progress updates that advance by less than two points.
#[derive(Debug, Default)]
pub struct ProgressThrottle {
    last: Option<u8>,
}

impl ProgressThrottle {
    const STEP: u8 = 2;

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the percentage to show, if it is worth showing.
    pub fn advance(&mut self, downloaded: u64, total: u64) -> Option<u8> {
        let percent = percentage(downloaded, total);
        let due = match self.last {
            None => true,
            Some(last) => percent >= last.saturating_add(Self::STEP),
        };
        if due {
            self.last = Some(percent);
            Some(percent)
        } else {
            None
        }
    }
}
