use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use log::warn;

use pushy_core::{DownloadView, PackageDescriptor, PopupStyle, UpdateUi};

/// Terminal presentation: prompts on stdin, everything else on stderr.
pub struct ConsoleUi {
    assume_yes: bool,
    installed: AtomicBool,
}

impl ConsoleUi {
    pub fn new(assume_yes: bool) -> Self {
        Self {
            assume_yes,
            installed: AtomicBool::new(false),
        }
    }

    /// Whether an update was installed during this run.
    pub fn installed(&self) -> bool {
        self.installed.load(Ordering::SeqCst)
    }

    pub async fn confirm_restart(&self) -> bool {
        self.ask("Restart now to apply the update?".to_string())
            .await
    }

    async fn ask(&self, question: String) -> bool {
        if self.assume_yes {
            eprintln!("{question} [y/N] y");
            return true;
        }

        let answer = tokio::task::spawn_blocking(move || {
            eprint!("{question} [y/N] ");
            let _ = std::io::stderr().flush();
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line).map(|_| line)
        })
        .await;

        match answer {
            Ok(Ok(line)) => is_yes(&line),
            Ok(Err(error)) => {
                warn!("Failed to read answer: {error}");
                false
            }
            Err(error) => {
                warn!("Prompt task failed: {error}");
                false
            }
        }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn describe(package: &PackageDescriptor) -> String {
    let version = package
        .version_name
        .clone()
        .unwrap_or_else(|| format!("build {}", package.version_code));
    match package.changelog.as_deref().map(str::trim) {
        Some(changelog) if !changelog.is_empty() => {
            format!("New version {version} is available.\n{changelog}")
        }
        _ => format!("New version {version} is available."),
    }
}

#[async_trait]
impl UpdateUi for ConsoleUi {
    async fn confirm_update(&self, package: &PackageDescriptor, _style: &PopupStyle) -> bool {
        eprintln!("{}", describe(package));
        self.ask("Update now?".to_string()).await
    }

    fn download_view(&self, view: DownloadView, _style: &PopupStyle) {
        match view {
            DownloadView::Preparing => eprintln!("Preparing download..."),
            DownloadView::Connected => eprintln!("Connected, downloading..."),
            DownloadView::Progress(percent) => {
                eprint!("\rDownloading... {percent:>3}%");
                let _ = std::io::stderr().flush();
            }
            DownloadView::Installing => eprintln!("\nInstalling..."),
            DownloadView::Installed => {
                self.installed.store(true, Ordering::SeqCst);
                eprintln!("Update installed. Restart to apply it.");
            }
            DownloadView::Failed => eprintln!("\nDownload failed."),
            DownloadView::Closed => eprintln!(),
        }
    }

    fn alert(&self, message: &str) {
        eprintln!("error: {message}");
    }

    fn toast(&self, message: &str) {
        eprintln!("{message}");
    }
}

#[cfg(test)]
mod tests {
    use pushy_core::{DownloadView, PackageDescriptor, PopupStyle, UpdateType, UpdateUi};

    use super::{ConsoleUi, describe, is_yes};

    fn package(changelog: Option<&str>) -> PackageDescriptor {
        PackageDescriptor {
            version_code: 102,
            download_url: "https://cdn.example.com/app.wgt".to_string(),
            update_type: UpdateType::UserConfirm,
            changelog: changelog.map(str::to_string),
            version_name: Some("1.0.2".to_string()),
            native_version_code: Some(100),
        }
    }

    #[test]
    fn answers_are_case_insensitive() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes(""));
        assert!(!is_yes("no"));
    }

    #[test]
    fn description_includes_changelog_when_present() {
        assert_eq!(
            describe(&package(Some("Bug fixes"))),
            "New version 1.0.2 is available.\nBug fixes"
        );
        assert_eq!(
            describe(&package(Some("  "))),
            "New version 1.0.2 is available."
        );
    }

    #[tokio::test]
    async fn assume_yes_skips_the_prompt() {
        let ui = ConsoleUi::new(true);
        let style = PopupStyle {
            main_color: "FF5B78".to_string(),
            logo: None,
        };

        assert!(ui.confirm_update(&package(None), &style).await);
        assert!(!ui.installed());

        ui.download_view(DownloadView::Installed, &style);
        assert!(ui.installed());
    }
}
