use async_trait::async_trait;
use reqwest::header::{ACCEPT, COOKIE};
use reqwest::{RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use url::Url;

use crate::error::{ProviderError, Result};
use crate::operations::{download, list};
use crate::provider::{ByteStream, RemoteDirectory};
use crate::session::Session;
use crate::types::{FolderListing, Library, Site};

pub(crate) const ACCEPT_JSON: &str = "application/json;odata=nometadata";

/// SharePoint REST client for performing backup reads on a tenant
#[derive(Debug)]
pub struct SharePointClient {
    pub(crate) session: Arc<Session>,
}

impl SharePointClient {
    /// Creates a new SharePoint client instance (internal use)
    pub(crate) fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub(crate) fn admin_url(&self) -> &str {
        &self.session.admin_url
    }

    /// Sends an authorized GET for `url` and checks the status
    pub(crate) async fn get(&self, url: Url, query: &[(&str, String)]) -> Result<Response> {
        let request = self.session.http.get(url.clone()).query(query);
        self.send(&url, request).await
    }

    /// Sends an authorized POST with a JSON body and checks the status
    pub(crate) async fn post_json(
        &self,
        url: Url,
        body: &serde_json::Value,
        digest: Option<&str>,
    ) -> Result<Response> {
        let mut request = self.session.http.post(url.clone()).json(body);
        if let Some(digest) = digest {
            request = request.header("X-RequestDigest", digest);
        }
        self.send(&url, request).await
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, String)],
    ) -> Result<T> {
        let response = self.get(url, query).await?;
        parse_json(response).await
    }

    /// The user agent is set on the session's HTTP client, so sign-in and
    /// REST requests carry the same one.
    async fn send(&self, url: &Url, request: RequestBuilder) -> Result<Response> {
        let cookie = self.session.auth_cookie(url).await?;
        let response = request
            .header(COOKIE, cookie)
            .header(ACCEPT, ACCEPT_JSON)
            .send()
            .await?;
        check_response(response).await
    }
}

pub(crate) async fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|e| ProviderError::Parse(e.to_string()))
}

/// Turns a non-success response into `ProviderError::Api`
async fn check_response(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::Api {
        status: status.as_u16(),
        message: error_message(&body)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string()),
    })
}

#[derive(Deserialize)]
struct ODataErrorBody {
    #[serde(alias = "odata.error")]
    error: ODataError,
}

#[derive(Deserialize)]
struct ODataError {
    message: ODataMessage,
}

#[derive(Deserialize)]
struct ODataMessage {
    value: String,
}

/// Extracts the message of an OData error payload
fn error_message(body: &str) -> Option<String> {
    serde_json::from_str::<ODataErrorBody>(body)
        .ok()
        .map(|e| e.error.message.value)
}

#[async_trait]
impl RemoteDirectory for SharePointClient {
    async fn list_sites(&self) -> Result<Vec<Site>> {
        list::list_sites(self).await
    }

    async fn site_title(&self, site_url: &str) -> Result<Option<String>> {
        list::site_title(self, site_url).await
    }

    async fn list_libraries(&self, site_url: &str) -> Result<Vec<Library>> {
        list::list_libraries(self, site_url).await
    }

    async fn list_folder(&self, site_url: &str, server_relative_url: &str) -> Result<FolderListing> {
        list::list_folder(self, site_url, server_relative_url).await
    }

    async fn fetch_file(&self, site_url: &str, server_relative_url: &str) -> Result<ByteStream> {
        download::fetch(self, site_url, server_relative_url).await
    }
}
