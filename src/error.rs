use thiserror::Error;

/// Errors raised by a remote directory provider
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("API request failed with status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that abort a whole backup run
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("failed to enumerate tenant sites: {0}")]
    Enumerate(#[source] ProviderError),
}

pub type Result<T> = std::result::Result<T, ProviderError>;
