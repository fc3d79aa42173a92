/// Module for downloading file content from a site
pub(crate) mod download;

/// Module for listing sites, libraries and folder contents
pub(crate) mod list;
