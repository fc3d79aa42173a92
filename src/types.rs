use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// A site collection as returned by tenant enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Site {
    pub url: String,
    /// Title as reported by the listing, if any. The backup always resolves
    /// the title from the site itself.
    pub title: Option<String>,
}

impl Site {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
        }
    }
}

/// A document library of a site
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Library {
    pub title: String,
    pub root_folder: RemoteFolder,
}

/// A folder identified by its server-relative path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFolder {
    pub name: String,
    pub server_relative_url: String,
}

/// A file identified by its name and server-relative path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub name: String,
    pub server_relative_url: String,
    pub length: Option<u64>,
}

/// Direct children of a remote folder
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderListing {
    pub files: Vec<RemoteFile>,
    pub folders: Vec<RemoteFolder>,
}

/// Backup mode selected by the user.
///
/// `Update` is accepted and reported but the traversal treats it exactly
/// like `Full`: every reachable file is downloaded again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackupMode {
    #[default]
    Full,
    Update,
}

impl fmt::Display for BackupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupMode::Full => f.write_str("full"),
            BackupMode::Update => f.write_str("update"),
        }
    }
}

impl FromStr for BackupMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(BackupMode::Full),
            "update" => Ok(BackupMode::Update),
            other => Err(format!("unknown backup mode {other:?}, expected full or update")),
        }
    }
}

/// Configuration for a backup run
#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Local directory under which one directory per site is created
    pub backup_root: PathBuf,
    pub mode: BackupMode,
}

impl BackupConfig {
    pub fn new(backup_root: impl Into<PathBuf>, mode: BackupMode) -> Self {
        Self {
            backup_root: backup_root.into(),
            mode,
        }
    }
}

/// Configuration for the SharePoint HTTP client
#[derive(Debug)]
pub struct SharePointClientConfig {
    /// User agent sent with every request
    pub user_agent: String,
}

impl SharePointClientConfig {
    /// Creates a new configuration with default values
    /// - user_agent: `sharepoint_backup/<crate version>`
    pub fn default() -> Self {
        Self {
            user_agent: format!("sharepoint_backup/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Creates a new configuration with a custom user agent
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
        }
    }
}

/// Internal configuration wrapper with Arc for shared ownership
#[derive(Debug, Clone)]
pub(crate) struct SharePointClientConfigArc {
    pub(crate) inner: Arc<SharePointClientConfig>,
}

impl From<SharePointClientConfig> for SharePointClientConfigArc {
    fn from(config: SharePointClientConfig) -> Self {
        Self {
            inner: Arc::new(config),
        }
    }
}

impl std::ops::Deref for SharePointClientConfigArc {
    type Target = SharePointClientConfig;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// How a run ended, when it did not end in a fatal error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupOutcome {
    Completed,
    Cancelled,
}

/// A site whose processing was abandoned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteFailure {
    pub url: String,
    pub message: String,
}

/// Summary of a finished run
#[derive(Debug, Clone)]
pub struct BackupReport {
    pub outcome: BackupOutcome,
    pub mode: BackupMode,
    pub sites_total: u64,
    /// Sites whose backup step ran to the end
    pub sites_processed: u64,
    pub sites_failed: Vec<SiteFailure>,
    pub files_downloaded: u64,
    pub files_failed: u64,
    pub elapsed: Duration,
}
