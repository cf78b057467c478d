use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use log::{debug, error, info, warn};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::{Config, ConfigStore};
use crate::dispatch::{DispatchPlan, InstallRoute, install_route, plan_dispatch};
use crate::download::{
    DownloadEvent, DownloadOptions, DownloadState, Downloader, ProgressThrottle, STATUS_OK,
};
use crate::events::{EventBus, EventPayload, SubscriptionId, UpdateEvent};
use crate::info::{InitError, VersionInfo, collect_version_info};
use crate::install::{InstallRequest, PackageInstaller};
use crate::outcome::{StatusCode, UpdateOutcome};
use crate::phase::{PhaseMachine, UpdatePhase};
use crate::protocol::PackageDescriptor;
use crate::query::check_for_update;
use crate::runtime::{AppRuntime, RuntimeError};
use crate::transport::UpdateTransport;
use crate::ui::{DownloadView, PopupStyle, UpdateUi};

/// Code reported when custom mode has nothing to download.
const NO_DOWNLOAD_URL_CODE: u16 = 491;

/// Everything the client needs from its host.
#[derive(Clone)]
pub struct Collaborators {
    pub runtime: Arc<dyn AppRuntime>,
    pub transport: Arc<dyn UpdateTransport>,
    pub downloader: Arc<dyn Downloader>,
    pub installer: Arc<dyn PackageInstaller>,
    pub ui: Arc<dyn UpdateUi>,
}

/// Snapshot returned by [`UpdateClient::info`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub version: VersionInfo,
    pub config: Config,
    pub overrides: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingDownload {
    Started,
    OpenedExternally,
}

#[derive(Debug, Error)]
pub enum CustomDownloadError {
    #[error("no pending update with a download url")]
    NoDownloadUrl,
    #[error("cannot start download: {}", .0.default_message())]
    Busy(StatusCode),
    #[error("failed to open download url: {0}")]
    OpenUrl(#[source] RuntimeError),
}

impl CustomDownloadError {
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            CustomDownloadError::NoDownloadUrl => NO_DOWNLOAD_URL_CODE,
            CustomDownloadError::Busy(status) => status.code(),
            CustomDownloadError::OpenUrl(_) => StatusCode::UnknownError.code(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DownloadMode {
    Interactive,
    Silent,
}

struct Inner {
    store: RwLock<ConfigStore>,
    events: EventBus<UpdateEvent, EventPayload>,
    version: OnceCell<VersionInfo>,
    phase: PhaseMachine,
    pending: Mutex<Option<PackageDescriptor>>,
    active_download: Mutex<Option<(u64, CancellationToken)>>,
    next_download_id: AtomicU64,
    tasks: TaskTracker,
    download_options: DownloadOptions,
    collaborators: Collaborators,
}

/// Update engine handle. Clones share the same state.
#[derive(Clone)]
pub struct UpdateClient {
    inner: Arc<Inner>,
}

impl UpdateClient {
    #[must_use]
    pub fn new(
        collaborators: Collaborators,
        download_options: DownloadOptions,
        options: &Map<String, Value>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store: RwLock::new(ConfigStore::with_options(options)),
                events: EventBus::new(),
                version: OnceCell::new(),
                phase: PhaseMachine::default(),
                pending: Mutex::new(None),
                active_download: Mutex::new(None),
                next_download_id: AtomicU64::new(1),
                tasks: TaskTracker::new(),
                download_options,
                collaborators,
            }),
        }
    }

    pub fn set_config(&self, options: &Map<String, Value>) {
        self.inner
            .store
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .merge(options);
    }

    #[must_use]
    pub fn config(&self) -> Config {
        self.inner
            .store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .config()
            .clone()
    }

    pub fn on<F>(&self, event: UpdateEvent, handler: F) -> SubscriptionId
    where
        F: Fn(&EventPayload) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(event, handler)
    }

    pub fn once<F>(&self, event: UpdateEvent, handler: F) -> SubscriptionId
    where
        F: Fn(&EventPayload) + Send + Sync + 'static,
    {
        self.inner.events.subscribe_once(event, handler)
    }

    /// Remove one handler, or every handler of `event` when `id` is `None`.
    pub fn off(&self, event: UpdateEvent, id: Option<SubscriptionId>) -> bool {
        self.inner.events.unsubscribe(&event, id)
    }

    #[must_use]
    pub fn phase(&self) -> UpdatePhase {
        self.inner.phase.current()
    }

    /// Collect version facts once. Later calls return the cached snapshot.
    ///
    /// A failed attempt publishes `onInitFail` and leaves the client
    /// uninitialized, so the next call tries again.
    ///
    /// # Errors
    /// Returns an error when the app identity or resource version cannot be
    /// read from the runtime.
    pub async fn initialize(&self) -> Result<VersionInfo, InitError> {
        if let Some(info) = self.inner.version.get() {
            return Ok(info.clone());
        }

        let runtime = self.inner.collaborators.runtime.as_ref();
        let mut fresh = false;
        let result = self
            .inner
            .version
            .get_or_try_init(|| {
                fresh = true;
                collect_version_info(runtime)
            })
            .await;

        match result {
            Ok(info) => {
                if fresh {
                    info!("Update client initialized for {}", info.app_id);
                    self.emit(UpdateEvent::InitSuccess, &EventPayload::Empty);
                }
                Ok(info.clone())
            }
            Err(error) => {
                error!("Update client initialization failed: {error}");
                self.emit(UpdateEvent::InitFail, &EventPayload::Error(error.to_string()));
                Err(error)
            }
        }
    }

    /// # Errors
    /// Returns an error when initialization fails.
    pub async fn info(&self) -> Result<ClientInfo, InitError> {
        let version = self.initialize().await?;
        let (config, overrides) = {
            let store = self.inner.store.read().unwrap_or_else(PoisonError::into_inner);
            (store.config().clone(), store.overrides().clone())
        };
        let info = ClientInfo {
            version,
            config,
            overrides,
        };

        if info.config.verbose_logging
            && let Ok(value) = serde_json::to_value(&info)
        {
            debug!("Client info: {}", info.config.render_payload(&value));
        }
        Ok(info)
    }

    /// Check for an update and, unless the host renders its own UI, roll it
    /// out according to its update type.
    ///
    /// Never fails; every path ends in an [`UpdateOutcome`].
    pub async fn get_update(&self, manual: bool) -> UpdateOutcome {
        let info = match self.initialize().await {
            Ok(info) => info,
            Err(error) => return UpdateOutcome::new(StatusCode::UnknownError).with_error(error),
        };

        let config = self.config();
        if let Err(status) = self.inner.phase.begin_check(&config) {
            debug!("Update check skipped: {}", status.default_message());
            return UpdateOutcome::new(status);
        }

        self.emit(UpdateEvent::StartGetUpdate, &EventPayload::Empty);
        let outcome =
            check_for_update(self.inner.collaborators.transport.as_ref(), &info, &config).await;

        if config.verbose_logging
            && let Some(response) = &outcome.response
        {
            debug!("Update response: {}", config.render_payload(response));
        }

        let mut awaiting_confirmation = None;
        match outcome.status_code {
            StatusCode::NativeUpdateRequired | StatusCode::ResourceUpdateRequired => {
                let event = if outcome.status_code == StatusCode::NativeUpdateRequired {
                    UpdateEvent::NativeUpdateRequired
                } else {
                    UpdateEvent::WgtUpdateRequired
                };
                self.emit(event, &EventPayload::Outcome(outcome.clone()));

                if let Some(package) = outcome.data.clone() {
                    if config.custom_ui {
                        debug!("Custom UI mode, leaving update {} to the host", package.version_code);
                        *self.inner.pending.lock().unwrap_or_else(PoisonError::into_inner) =
                            Some(package);
                    } else {
                        awaiting_confirmation = self.dispatch(package, &info, &config, manual);
                    }
                }
            }
            StatusCode::NoUpdateAvailable => {
                self.emit(UpdateEvent::NoUpdate, &EventPayload::Outcome(outcome.clone()));
            }
            StatusCode::ServerRejected => {
                self.emit(
                    UpdateEvent::UpdateRequestFalse,
                    &EventPayload::Outcome(outcome.clone()),
                );
            }
            StatusCode::TransportFailed => {
                self.emit(
                    UpdateEvent::UpdateRequestFail,
                    &EventPayload::Outcome(outcome.clone()),
                );
            }
            other => {
                error!("Update check ended with unexpected status {other}");
                self.emit(
                    UpdateEvent::UpdateRequestFailUnknown,
                    &EventPayload::Outcome(outcome.clone()),
                );
                self.inner.phase.finish_check();
                return UpdateOutcome::new(StatusCode::UnknownError);
            }
        }

        self.inner.phase.finish_check();

        if let Some(package) = awaiting_confirmation {
            self.spawn_confirmation(package, info, &config);
        }
        outcome
    }

    /// Abort the running interactive download.
    ///
    /// Returns whether there was one.
    pub fn cancel_download(&self) -> bool {
        let active = self
            .inner
            .active_download
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some((_, token)) = active else {
            return false;
        };

        token.cancel();
        self.inner
            .phase
            .transition(&[UpdatePhase::Updating], UpdatePhase::Idle);
        self.inner.collaborators.ui.toast("Download cancelled");
        info!("Update download cancelled");
        true
    }

    /// Package stashed by the last check in custom UI mode.
    #[must_use]
    pub fn pending_package(&self) -> Option<PackageDescriptor> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Start the stashed package's download, or open it externally.
    ///
    /// # Errors
    /// Returns an error when nothing downloadable is stashed, another update
    /// is running, or the URL cannot be opened.
    pub fn start_pending_download(&self) -> Result<PendingDownload, CustomDownloadError> {
        let package = self
            .pending_package()
            .filter(|package| !package.download_url.is_empty())
            .ok_or(CustomDownloadError::NoDownloadUrl)?;
        let info = self
            .inner
            .version
            .get()
            .cloned()
            .ok_or(CustomDownloadError::NoDownloadUrl)?;
        let config = self.config();

        match install_route(&package.download_url, info.platform) {
            InstallRoute::External => {
                self.inner
                    .collaborators
                    .runtime
                    .open_url(&package.download_url)
                    .map_err(CustomDownloadError::OpenUrl)?;
                Ok(PendingDownload::OpenedExternally)
            }
            InstallRoute::InApp => {
                if !self
                    .inner
                    .phase
                    .transition(&[UpdatePhase::Idle], UpdatePhase::Updating)
                {
                    let status = self
                        .phase()
                        .busy_status()
                        .unwrap_or(StatusCode::UnknownError);
                    return Err(CustomDownloadError::Busy(status));
                }
                self.spawn_download(package, DownloadMode::Interactive, &info, &config);
                Ok(PendingDownload::Started)
            }
        }
    }

    /// # Errors
    /// Returns the runtime's error when it cannot relaunch the app.
    pub fn restart_app(&self) -> Result<(), RuntimeError> {
        info!("Restarting app to apply update");
        self.inner.collaborators.runtime.restart()
    }

    /// Wait until every confirmation, download and install started so far
    /// has finished.
    pub async fn wait_for_background(&self) {
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        self.inner.tasks.reopen();
    }

    fn emit(&self, event: UpdateEvent, payload: &EventPayload) {
        let handled = self.inner.events.publish(&event, payload);
        debug!("Published {event} to {handled} handler(s)");
    }

    /// Roll out an available update. Returns the package when the user has
    /// to be asked first; that happens after the check has finished.
    fn dispatch(
        &self,
        package: PackageDescriptor,
        info: &VersionInfo,
        config: &Config,
        manual: bool,
    ) -> Option<PackageDescriptor> {
        if package.download_url.is_empty() {
            warn!("Update {} has no download url, ignoring", package.version_code);
            return None;
        }

        match plan_dispatch(package.update_type, manual) {
            DispatchPlan::Confirm => Some(package),
            DispatchPlan::Immediate => {
                self.start_update(package, info, config, &[UpdatePhase::Checking]);
                None
            }
            DispatchPlan::Silent => {
                if self
                    .inner
                    .phase
                    .transition(&[UpdatePhase::Checking], UpdatePhase::SilentUpdating)
                {
                    self.spawn_download(package, DownloadMode::Silent, info, config);
                }
                None
            }
            DispatchPlan::Ignore => {
                warn!(
                    "Update {} has an unsupported update type, ignoring",
                    package.version_code
                );
                None
            }
        }
    }

    fn spawn_confirmation(&self, package: PackageDescriptor, info: VersionInfo, config: &Config) {
        let client = self.clone();
        let config = config.clone();
        self.inner.tasks.spawn(async move {
            let style = config.popup_style();
            let accepted = client
                .inner
                .collaborators
                .ui
                .confirm_update(&package, &style)
                .await;
            if accepted {
                client.start_update(package, &info, &config, &[UpdatePhase::Idle]);
            } else {
                debug!("Update {} declined", package.version_code);
            }
        });
    }

    /// Install in-app or hand the URL to the system, moving to Updating from
    /// one of `from` for in-app installs.
    fn start_update(
        &self,
        package: PackageDescriptor,
        info: &VersionInfo,
        config: &Config,
        from: &[UpdatePhase],
    ) {
        let ui = &self.inner.collaborators.ui;
        match install_route(&package.download_url, info.platform) {
            InstallRoute::External => {
                info!("Opening update {} externally", package.download_url);
                if let Err(error) = self.inner.collaborators.runtime.open_url(&package.download_url)
                {
                    warn!("Failed to open {}: {error}", package.download_url);
                    ui.alert(&format!("Failed to open update link: {error}"));
                }
            }
            InstallRoute::InApp => {
                if self.inner.phase.transition(from, UpdatePhase::Updating) {
                    self.spawn_download(package, DownloadMode::Interactive, info, config);
                } else {
                    let status = self
                        .phase()
                        .busy_status()
                        .unwrap_or(StatusCode::UnknownError);
                    warn!("Not starting update: {}", status.default_message());
                    ui.toast(status.default_message());
                }
            }
        }
    }

    fn spawn_download(
        &self,
        package: PackageDescriptor,
        mode: DownloadMode,
        info: &VersionInfo,
        config: &Config,
    ) {
        let client = self.clone();
        let installed_version_code = info.resource_version_code;
        let force = config.force_install;
        let style = config.popup_style();
        self.inner.tasks.spawn(async move {
            client
                .drive_download(
                    &package.download_url,
                    mode,
                    installed_version_code,
                    force,
                    &style,
                )
                .await;
        });
    }

    async fn drive_download(
        &self,
        url: &str,
        mode: DownloadMode,
        installed_version_code: u64,
        force: bool,
        style: &PopupStyle,
    ) {
        let ui = self.inner.collaborators.ui.as_ref();
        let interactive = mode == DownloadMode::Interactive;
        let show = |view: DownloadView| {
            if interactive {
                ui.download_view(view, style);
            }
        };

        let mut task = self
            .inner
            .collaborators
            .downloader
            .start(url, &self.inner.download_options);
        let tracked = interactive.then(|| self.track_download(task.abort_handle()));
        show(DownloadView::Preparing);

        let mut throttle = ProgressThrottle::new();
        let mut finished = None;
        while let Some(event) = task.next_event().await {
            match event {
                DownloadEvent::StateChanged(DownloadState::Connected) => {
                    show(DownloadView::Connected);
                }
                DownloadEvent::StateChanged(state) => debug!("Download {url}: {state:?}"),
                DownloadEvent::Progress { downloaded, total } => {
                    if let Some(percent) = throttle.advance(downloaded, total) {
                        show(DownloadView::Progress(percent));
                    }
                }
                DownloadEvent::Finished { status, path } => finished = Some((status, path)),
            }
        }

        if let Some(id) = tracked {
            self.untrack_download(id);
        }
        if task.is_aborted() {
            debug!("Download of {url} was cancelled");
            return;
        }

        let path = match finished {
            Some((STATUS_OK, Some(path))) => path,
            other => {
                let status = other.map_or(0, |(status, _)| status);
                warn!("Download of {url} failed with status {status}");
                self.release(mode);
                show(DownloadView::Failed);
                return;
            }
        };

        show(DownloadView::Installing);
        let request = InstallRequest {
            path,
            force,
            installed_version_code,
        };
        match self.inner.collaborators.installer.install(&request).await {
            Ok(()) => match mode {
                DownloadMode::Silent => {
                    self.inner
                        .phase
                        .transition(&[UpdatePhase::SilentUpdating], UpdatePhase::SilentUpdated);
                    info!("Silent update installed, restart to apply");
                }
                DownloadMode::Interactive => {
                    self.inner
                        .phase
                        .transition(&[UpdatePhase::Updating], UpdatePhase::Idle);
                    info!("Update installed, restart to apply");
                    show(DownloadView::Installed);
                }
            },
            Err(error) => {
                error!("Failed to install {}: {error}", request.path.display());
                self.release(mode);
                show(DownloadView::Closed);
                ui.alert(&format!(
                    "Failed to install update [{}]: {error}",
                    error.code()
                ));
            }
        }
    }

    fn release(&self, mode: DownloadMode) {
        let from = match mode {
            DownloadMode::Interactive => UpdatePhase::Updating,
            DownloadMode::Silent => UpdatePhase::SilentUpdating,
        };
        self.inner.phase.transition(&[from], UpdatePhase::Idle);
    }

    fn track_download(&self, token: CancellationToken) -> u64 {
        let id = self.inner.next_download_id.fetch_add(1, Ordering::Relaxed);
        *self
            .inner
            .active_download
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some((id, token));
        id
    }

    fn untrack_download(&self, id: u64) {
        let mut active = self
            .inner
            .active_download
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if active.as_ref().is_some_and(|(current, _)| *current == id) {
            *active = None;
        }
    }
}
