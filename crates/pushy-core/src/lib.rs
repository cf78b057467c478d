//! Over-the-air update engine for hybrid apps.
//!
//! The crate is independent of any UI toolkit and of the concrete host
//! runtime:
//! - [`UpdateClient`] asks a remote endpoint whether a newer native binary or
//!   resource package (`.wgt`) exists and drives download and install.
//! - Host capabilities (app metadata, URL opening, restart) come in through
//!   [`AppRuntime`], presentation through [`UpdateUi`].
//! - [`HttpTransport`], [`HttpDownloader`] and [`ResourceInstaller`] are the
//!   reqwest/zip backed implementations used by desktop hosts.

mod client;
mod config;
mod dispatch;
mod download;
mod events;
mod http_download;
mod info;
mod install;
mod outcome;
mod phase;
mod protocol;
mod query;
mod runtime;
mod transport;
mod ui;

/// Update client and its collaborator bundle.
pub use client::{ClientInfo, Collaborators, CustomDownloadError, PendingDownload, UpdateClient};
/// Engine options with allow-listed merging.
pub use config::{CONFIG_KEYS, Config, ConfigError, ConfigStore};
/// Routing rules for update packages.
pub use dispatch::{DispatchPlan, InstallRoute, install_route, is_resource_package_url, plan_dispatch};
/// Download coordinator contract.
pub use download::{
    DownloadEvent, DownloadOptions, DownloadReporter, DownloadState, DownloadTask, Downloader,
    ProgressThrottle, STATUS_OK, percentage,
};
/// Publish/subscribe primitive and the engine's lifecycle events.
pub use events::{EventBus, EventPayload, SubscriptionId, UnknownEventError, UpdateEvent};
/// reqwest-backed download coordinator.
pub use http_download::{DownloadError, HttpDownloader};
/// Local version facts.
pub use info::{InitError, VersionInfo};
/// Package installation.
pub use install::{
    InstallError, InstallRequest, PackageInstaller, ResourceInstaller, apply_pending_resources,
};
/// Update check results.
pub use outcome::{OutcomeError, StatusCode, UpdateOutcome};
pub use phase::UpdatePhase;
/// Wire types of the update endpoint.
pub use protocol::{PackageDescriptor, UpdateRequest, UpdateType};
pub use query::{check_for_update, classify_response, update_endpoint};
/// Host runtime capabilities.
pub use runtime::{AppIdentity, AppRuntime, ResourceVersion, RuntimeError, SystemInfo};
pub use transport::{HttpTransport, TransportError, UpdateTransport};
pub use ui::{DownloadView, PopupStyle, UpdateUi};

/// Re-exported so hosts can name the platform without a direct dependency.
pub use pushy_platform::Platform;
