use async_trait::async_trait;

use crate::protocol::PackageDescriptor;

/// Per-client popup styling, passed into every UI call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopupStyle {
    /// `RRGGBB`, no leading `#`.
    pub main_color: String,
    pub logo: Option<String>,
}

/// What the download popup should currently show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadView {
    Preparing,
    Connected,
    /// Percentage, throttled to steps of at least two points.
    Progress(u8),
    Installing,
    /// Installed; offer a restart.
    Installed,
    Failed,
    Closed,
}

/// Presentation layer driven by the update client.
#[async_trait]
pub trait UpdateUi: Send + Sync {
    /// Show the update prompt; resolves to whether the user accepted.
    async fn confirm_update(&self, package: &PackageDescriptor, style: &PopupStyle) -> bool;

    fn download_view(&self, view: DownloadView, style: &PopupStyle);

    fn alert(&self, message: &str);

    fn toast(&self, message: &str);
}
