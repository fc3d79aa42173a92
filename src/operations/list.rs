use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::client::{SharePointClient, parse_json};
use crate::error::{ProviderError, Result};
use crate::types::{FolderListing, Library, RemoteFile, RemoteFolder, Site};
use crate::utils::{api_url, odata_literal};

/// Template id of document libraries
const DOCUMENT_LIBRARY_TEMPLATE: u32 = 101;

const TENANT_API: &str = "_api/Microsoft.Online.SharePoint.TenantAdministration.Tenant";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContextInfo {
    form_digest_value: String,
}

#[derive(Debug, Deserialize)]
struct Collection<T> {
    value: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SitePropertiesDto {
    url: String,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WebDto {
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListDto {
    title: String,
    root_folder: FolderDto,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FolderDto {
    name: String,
    server_relative_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FileDto {
    name: String,
    server_relative_url: String,
    /// Int64 values arrive as JSON strings
    length: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FolderWithChildrenDto {
    #[serde(default)]
    files: Vec<FileDto>,
    #[serde(default)]
    folders: Vec<FolderDto>,
}

impl From<SitePropertiesDto> for Site {
    fn from(value: SitePropertiesDto) -> Self {
        Site {
            url: value.url,
            title: value.title.filter(|t| !t.is_empty()),
        }
    }
}

impl From<FolderDto> for RemoteFolder {
    fn from(value: FolderDto) -> Self {
        RemoteFolder {
            name: value.name,
            server_relative_url: value.server_relative_url,
        }
    }
}

impl From<ListDto> for Library {
    fn from(value: ListDto) -> Self {
        Library {
            title: value.title,
            root_folder: value.root_folder.into(),
        }
    }
}

impl From<FileDto> for RemoteFile {
    fn from(value: FileDto) -> Self {
        let length = match value.length {
            Some(serde_json::Value::String(s)) => s.parse().ok(),
            Some(serde_json::Value::Number(n)) => n.as_u64(),
            _ => None,
        };
        RemoteFile {
            name: value.name,
            server_relative_url: value.server_relative_url,
            length,
        }
    }
}

impl From<FolderWithChildrenDto> for FolderListing {
    fn from(value: FolderWithChildrenDto) -> Self {
        FolderListing {
            files: value.files.into_iter().map(RemoteFile::from).collect(),
            folders: value.folders.into_iter().map(RemoteFolder::from).collect(),
        }
    }
}

/// Requests a form digest, required by every POST to the REST API
async fn request_digest(client: &SharePointClient, site_url: &str) -> Result<String> {
    let response = client
        .post_json(api_url(site_url, "_api/contextinfo")?, &json!({}), None)
        .await?;
    let info: ContextInfo = parse_json(response).await?;
    Ok(info.form_digest_value)
}

/// Lists every site collection of the tenant through the admin site
///
/// # Errors
///
/// Returns an error if the admin site rejects the request or answers with
/// an unexpected payload
pub async fn list_sites(client: &SharePointClient) -> Result<Vec<Site>> {
    let admin_url = client.admin_url();
    let digest = request_digest(client, admin_url).await?;
    let body = json!({
        "speFilter": {
            "Filter": "",
            "StartIndex": "0",
            "IncludeDetail": true,
        }
    });
    let response = client
        .post_json(
            api_url(admin_url, &format!("{TENANT_API}/GetSitePropertiesFromSharePointByFilters"))?,
            &body,
            Some(&digest),
        )
        .await?;
    let sites: Collection<SitePropertiesDto> = parse_json(response).await?;
    info!("Tenant has {} sites", sites.value.len());
    Ok(sites.value.into_iter().map(Site::from).collect())
}

pub async fn site_title(client: &SharePointClient, site_url: &str) -> Result<Option<String>> {
    let web: WebDto = client
        .get_json(
            api_url(site_url, "_api/web")?,
            &[("$select", "Title".to_string())],
        )
        .await?;
    Ok(web.title)
}

/// Lists the document libraries of a site with their root folders
pub async fn list_libraries(client: &SharePointClient, site_url: &str) -> Result<Vec<Library>> {
    let lists: Collection<ListDto> = client
        .get_json(
            api_url(site_url, "_api/web/lists")?,
            &[
                ("$filter", format!("BaseTemplate eq {DOCUMENT_LIBRARY_TEMPLATE}")),
                (
                    "$select",
                    "Title,RootFolder/Name,RootFolder/ServerRelativeUrl".to_string(),
                ),
                ("$expand", "RootFolder".to_string()),
            ],
        )
        .await?;
    debug!("Site {:?} has {} document libraries", site_url, lists.value.len());
    Ok(lists.value.into_iter().map(Library::from).collect())
}

/// Lists the files and subfolders directly inside a folder
///
/// # Errors
///
/// Returns an error if the folder does not exist or cannot be read
pub async fn list_folder(
    client: &SharePointClient,
    site_url: &str,
    server_relative_url: &str,
) -> Result<FolderListing> {
    let folder: FolderWithChildrenDto = client
        .get_json(
            api_url(site_url, "_api/web/GetFolderByServerRelativePath(decodedurl=@p)")?,
            &[
                ("@p", odata_literal(server_relative_url)),
                (
                    "$select",
                    "Files/Name,Files/ServerRelativeUrl,Files/Length,Folders/Name,Folders/ServerRelativeUrl"
                        .to_string(),
                ),
                ("$expand", "Files,Folders".to_string()),
            ],
        )
        .await
        .map_err(|e| match e {
            ProviderError::Parse(reason) => {
                ProviderError::Parse(format!("folder {server_relative_url}: {reason}"))
            }
            other => other,
        })?;
    let listing = FolderListing::from(folder);
    debug!(
        "Folder {:?}: {} files, {} folders",
        server_relative_url,
        listing.files.len(),
        listing.folders.len()
    );
    Ok(listing)
}
