// Module declarations
mod auth;
mod backup;
mod client;
mod error;
mod operations;
mod progress;
mod provider;
mod session;
mod types;
mod utils;

pub mod cli;

// Public API exports
pub use auth::Credentials;
pub use backup::run_backup;
pub use client::SharePointClient;
pub use error::{BackupError, ProviderError};
pub use progress::{BackupEvent, Progress, ProgressSnapshot, RunState};
pub use provider::{ByteStream, RemoteDirectory};
pub use session::{Session, SharePointSessionManager};
pub use types::{
    BackupConfig, BackupMode, BackupOutcome, BackupReport, FolderListing, Library, RemoteFile,
    RemoteFolder, SharePointClientConfig, Site, SiteFailure,
};
pub use utils::{SKIP_LIBRARIES, UNTITLED_SITE};

// Re-export commonly used external types for convenience
pub use tokio_util::sync::CancellationToken;
