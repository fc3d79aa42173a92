use futures_util::{StreamExt, TryStreamExt};
use tracing::debug;

use crate::client::SharePointClient;
use crate::error::{ProviderError, Result};
use crate::provider::ByteStream;
use crate::utils::{api_url, odata_literal};

/// Opens the content of a file on a site
///
/// The body is handed back as a stream of chunks so the caller can write
/// it out as it arrives; nothing is buffered or written to disk here.
///
/// # Arguments
///
/// * `client` - The SharePoint client instance
/// * `site_url` - Absolute URL of the site owning the file
/// * `server_relative_url` - Server-relative path of the file
///
/// # Errors
///
/// Returns an error if the file does not exist or the account may not read
/// it. A connection lost while the body is received is reported by the
/// stream.
pub async fn fetch(
    client: &SharePointClient,
    site_url: &str,
    server_relative_url: &str,
) -> Result<ByteStream> {
    let url = api_url(
        site_url,
        "_api/web/GetFileByServerRelativePath(decodedurl=@p)/$value",
    )?;
    let response = client
        .get(url, &[("@p", odata_literal(server_relative_url))])
        .await?;
    debug!(
        "Remote file opened: {:?} ({:?} bytes announced)",
        server_relative_url,
        response.content_length()
    );

    Ok(response.bytes_stream().map_err(ProviderError::from).boxed())
}
