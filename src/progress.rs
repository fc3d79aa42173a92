//! Run state shared between the backup worker and whatever displays it.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Counters written by the worker. Reads are best-effort display values.
#[derive(Debug, Default)]
pub struct Progress {
    sites_done: AtomicU64,
    sites_total: AtomicU64,
    site_files_done: AtomicU64,
    site_folders_done: AtomicU64,
    files_total: AtomicU64,
    files_failed: AtomicU64,
}

/// Point-in-time copy of [`Progress`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub sites_done: u64,
    pub sites_total: u64,
    /// Files downloaded in the current site
    pub site_files_done: u64,
    /// Folders visited in the current site
    pub site_folders_done: u64,
    /// Files downloaded since the run started
    pub files_total: u64,
    pub files_failed: u64,
}

impl Progress {
    pub(crate) fn set_sites_total(&self, total: u64) {
        self.sites_total.store(total, Ordering::Relaxed);
    }

    /// Marks `index` (1-based) as the site being processed and resets the
    /// per-site counters.
    pub(crate) fn start_site(&self, index: u64) {
        self.sites_done.store(index, Ordering::Relaxed);
        self.site_files_done.store(0, Ordering::Relaxed);
        self.site_folders_done.store(0, Ordering::Relaxed);
    }

    pub(crate) fn file_downloaded(&self) {
        self.site_files_done.fetch_add(1, Ordering::Relaxed);
        self.files_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn file_failed(&self) {
        self.files_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn folder_visited(&self) {
        self.site_folders_done.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            sites_done: self.sites_done.load(Ordering::Relaxed),
            sites_total: self.sites_total.load(Ordering::Relaxed),
            site_files_done: self.site_files_done.load(Ordering::Relaxed),
            site_folders_done: self.site_folders_done.load(Ordering::Relaxed),
            files_total: self.files_total.load(Ordering::Relaxed),
            files_failed: self.files_failed.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} Sites Processed, Folders Processed: {}, Files Processed: {} ({} total, {} failed)",
            self.sites_done,
            self.sites_total,
            self.site_folders_done,
            self.site_files_done,
            self.files_total,
            self.files_failed
        )
    }
}

/// A log line of a backup run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupEvent {
    Connecting,
    NoSites,
    SiteStarted { url: String, index: u64, total: u64 },
    LibrarySkipped { title: String },
    LibraryStarted { title: String },
    FileStarted { name: String },
    FileFailed { name: String, error: String },
    SiteFailed { url: String, error: String },
    Cancelled,
    Completed,
    Fatal { error: String },
}

impl BackupEvent {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            BackupEvent::FileFailed { .. } | BackupEvent::SiteFailed { .. } | BackupEvent::Fatal { .. }
        )
    }
}

impl fmt::Display for BackupEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupEvent::Connecting => f.write_str("Connecting to SharePoint..."),
            BackupEvent::NoSites => f.write_str("No sites found. Backup complete."),
            BackupEvent::SiteStarted { url, index, total } => {
                write!(f, "Backing up site {url} ({index}/{total})")
            }
            BackupEvent::LibrarySkipped { title } => write!(f, "Skipping system library: {title}"),
            BackupEvent::LibraryStarted { title } => write!(f, "Processing library: {title}"),
            BackupEvent::FileStarted { name } => write!(f, "Downloading file: {name}"),
            BackupEvent::FileFailed { name, error } => {
                write!(f, "Error downloading file {name}: {error}")
            }
            BackupEvent::SiteFailed { url, error } => {
                write!(f, "Error backing up site {url}: {error}")
            }
            BackupEvent::Cancelled => f.write_str("Backup canceled by user."),
            BackupEvent::Completed => f.write_str("Backup completed successfully."),
            BackupEvent::Fatal { error } => write!(f, "Error: {error}"),
        }
    }
}

/// Context object of one backup run.
///
/// Cloning is cheap; all clones observe the same token, counters and
/// event channel.
#[derive(Debug, Clone, Default)]
pub struct RunState {
    cancel_token: CancellationToken,
    progress: Arc<Progress>,
    events: Option<mpsc::UnboundedSender<BackupEvent>>,
}

impl RunState {
    pub fn new(cancel_token: CancellationToken) -> Self {
        Self {
            cancel_token,
            progress: Arc::new(Progress::default()),
            events: None,
        }
    }

    /// Creates a run state whose events are delivered on the returned receiver
    pub fn with_events(
        cancel_token: CancellationToken,
    ) -> (Self, mpsc::UnboundedReceiver<BackupEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Self {
            cancel_token,
            progress: Arc::new(Progress::default()),
            events: Some(tx),
        };
        (state, rx)
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    /// Requests cancellation. The worker stops before the next site.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    /// Records an event in the trace log and forwards it to the subscriber
    pub(crate) fn emit(&self, event: BackupEvent) {
        match &event {
            BackupEvent::FileFailed { .. } => warn!("{}", event),
            BackupEvent::SiteFailed { .. } | BackupEvent::Fatal { .. } => error!("{}", event),
            _ => info!("{}", event),
        }
        if let Some(tx) = &self.events {
            // A dropped receiver only means nobody is watching anymore
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_site_resets_per_site_counters_only() {
        let progress = Progress::default();
        progress.set_sites_total(2);
        progress.start_site(1);
        progress.folder_visited();
        progress.file_downloaded();
        progress.file_downloaded();
        progress.file_failed();

        progress.start_site(2);
        let snapshot = progress.snapshot();
        assert_eq!(snapshot.sites_done, 2);
        assert_eq!(snapshot.sites_total, 2);
        assert_eq!(snapshot.site_files_done, 0);
        assert_eq!(snapshot.site_folders_done, 0);
        assert_eq!(snapshot.files_total, 2);
        assert_eq!(snapshot.files_failed, 1);
    }

    #[test]
    fn clones_share_cancellation_and_counters() {
        let state = RunState::new(CancellationToken::new());
        let worker = state.clone();

        worker.progress().file_downloaded();
        state.cancel();

        assert!(worker.is_cancelled());
        assert_eq!(state.snapshot().files_total, 1);
    }

    #[tokio::test]
    async fn emitted_events_reach_the_receiver() {
        let (state, mut rx) = RunState::with_events(CancellationToken::new());
        state.emit(BackupEvent::LibraryStarted {
            title: "Documents".to_string(),
        });
        drop(state);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.to_string(), "Processing library: Documents");
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn event_text_matches_log_lines() {
        let started = BackupEvent::SiteStarted {
            url: "https://contoso.sharepoint.com/sites/hr".to_string(),
            index: 3,
            total: 7,
        };
        assert_eq!(
            started.to_string(),
            "Backing up site https://contoso.sharepoint.com/sites/hr (3/7)"
        );
        assert_eq!(BackupEvent::Cancelled.to_string(), "Backup canceled by user.");
        assert!(
            BackupEvent::SiteFailed {
                url: "u".to_string(),
                error: "e".to_string()
            }
            .is_error()
        );
        assert!(!BackupEvent::Completed.is_error());
    }
}
