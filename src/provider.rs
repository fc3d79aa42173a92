//! The seam between the backup traversal and the service holding the files.
//!
//! [`RemoteDirectory`] exposes exactly the calls the traversal needs. The
//! SharePoint client implements it over REST; tests implement it in memory
//! or through the generated `MockRemoteDirectory`.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;

#[cfg(test)]
use mockall::automock;

use crate::error::Result;
use crate::types::{FolderListing, Library, Site};

/// File content as it arrives from the remote service
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait RemoteDirectory: Send + Sync {
    /// Lists every site of the tenant in provider order.
    async fn list_sites(&self) -> Result<Vec<Site>>;

    /// Resolves the display title of a site, `None` when the site has none.
    async fn site_title(&self, site_url: &str) -> Result<Option<String>>;

    /// Lists the document libraries of a site. Only libraries built from the
    /// document library template are returned.
    async fn list_libraries(&self, site_url: &str) -> Result<Vec<Library>>;

    /// Lists the direct files and subfolders of a folder.
    async fn list_folder(&self, site_url: &str, server_relative_url: &str)
        -> Result<FolderListing>;

    /// Opens the raw content of a file. Errors raised after the first chunk
    /// arrive through the stream.
    async fn fetch_file(&self, site_url: &str, server_relative_url: &str)
        -> Result<ByteStream>;
}
