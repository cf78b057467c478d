use crate::protocol::UpdateType;
use pushy_platform::Platform;

/// File extension of in-app installable resource packages.
pub const RESOURCE_PACKAGE_EXTENSION: &str = "wgt";

/// Whether the URL's path names a resource package. Query and fragment are
/// ignored.
#[must_use]
pub fn is_resource_package_url(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let file_name = path.rsplit('/').next().unwrap_or_default();
    file_name
        .rsplit_once('.')
        .is_some_and(|(stem, ext)| {
            !stem.is_empty() && ext.eq_ignore_ascii_case(RESOURCE_PACKAGE_EXTENSION)
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallRoute {
    /// Download and install through the update client.
    InApp,
    /// Hand the URL to the store or browser.
    External,
}

#[must_use]
pub fn install_route(url: &str, platform: Platform) -> InstallRoute {
    if is_resource_package_url(url) || platform.installs_native_in_app() {
        InstallRoute::InApp
    } else {
        InstallRoute::External
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPlan {
    /// Ask the user, then install.
    Confirm,
    Immediate,
    /// Background download and install without UI.
    Silent,
    Ignore,
}

/// Decide how an available update is rolled out. Manual checks always ask.
#[must_use]
pub fn plan_dispatch(update_type: UpdateType, manual: bool) -> DispatchPlan {
    if manual {
        return DispatchPlan::Confirm;
    }
    match update_type {
        UpdateType::UserConfirm => DispatchPlan::Confirm,
        UpdateType::Forced => DispatchPlan::Immediate,
        UpdateType::Silent => DispatchPlan::Silent,
        UpdateType::Unknown => DispatchPlan::Ignore,
    }
}
