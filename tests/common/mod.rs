#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream;
use sharepoint_backup::{
    ByteStream, FolderListing, Library, ProviderError, RemoteDirectory, RemoteFile, RemoteFolder,
    RunState, Site,
};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Mutex;

/// In-memory tenant used in place of SharePoint
#[derive(Default)]
pub struct FakeTenant {
    pub sites: Vec<FakeSite>,
    pub folders: HashMap<String, FolderListing>,
    pub files: HashMap<String, FakeContent>,
    /// Cancel this run state as soon as the given site's title is requested
    pub cancel_at: Option<(String, RunState)>,
    pub calls: Mutex<Vec<String>>,
}

pub struct FakeSite {
    pub url: String,
    pub title: Result<Option<String>, String>,
    pub libraries: Result<Vec<Library>, String>,
}

pub enum FakeContent {
    Complete(Vec<u8>),
    Unavailable(String),
    /// The first bytes arrive, then the connection fails
    Interrupted(Vec<u8>, String),
}

fn api_error(message: &str) -> ProviderError {
    ProviderError::Api {
        status: 500,
        message: message.to_string(),
    }
}

impl FakeTenant {
    pub fn site(mut self, url: &str, title: &str, libraries: Vec<Library>) -> Self {
        self.sites.push(FakeSite {
            url: url.to_string(),
            title: Ok(Some(title.to_string())),
            libraries: Ok(libraries),
        });
        self
    }

    pub fn broken_site(mut self, url: &str, error: &str) -> Self {
        self.sites.push(FakeSite {
            url: url.to_string(),
            title: Err(error.to_string()),
            libraries: Err(error.to_string()),
        });
        self
    }

    /// A site whose title resolves but whose libraries cannot be listed
    pub fn unlistable_site(mut self, url: &str, title: &str, error: &str) -> Self {
        self.sites.push(FakeSite {
            url: url.to_string(),
            title: Ok(Some(title.to_string())),
            libraries: Err(error.to_string()),
        });
        self
    }

    pub fn folder(mut self, path: &str, files: &[&str], folders: &[&str]) -> Self {
        let listing = FolderListing {
            files: files
                .iter()
                .map(|name| RemoteFile {
                    name: name.to_string(),
                    server_relative_url: format!("{path}/{name}"),
                    length: None,
                })
                .collect(),
            folders: folders
                .iter()
                .map(|name| RemoteFolder {
                    name: name.to_string(),
                    server_relative_url: format!("{path}/{name}"),
                })
                .collect(),
        };
        self.folders.insert(path.to_string(), listing);
        self
    }

    pub fn file(mut self, path: &str, content: &[u8]) -> Self {
        self.files
            .insert(path.to_string(), FakeContent::Complete(content.to_vec()));
        self
    }

    pub fn broken_file(mut self, path: &str, error: &str) -> Self {
        self.files
            .insert(path.to_string(), FakeContent::Unavailable(error.to_string()));
        self
    }

    pub fn interrupted_file(mut self, path: &str, first_bytes: &[u8], error: &str) -> Self {
        self.files.insert(
            path.to_string(),
            FakeContent::Interrupted(first_bytes.to_vec(), error.to_string()),
        );
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn find_site(&self, url: &str) -> Result<&FakeSite, ProviderError> {
        self.sites
            .iter()
            .find(|site| site.url == url)
            .ok_or_else(|| api_error("site not found"))
    }
}

pub fn library(title: &str, root: &str) -> Library {
    Library {
        title: title.to_string(),
        root_folder: RemoteFolder {
            name: root.rsplit('/').next().unwrap_or(root).to_string(),
            server_relative_url: root.to_string(),
        },
    }
}

#[async_trait]
impl RemoteDirectory for FakeTenant {
    async fn list_sites(&self) -> Result<Vec<Site>, ProviderError> {
        self.record("list_sites".to_string());
        Ok(self.sites.iter().map(|site| Site::new(&site.url)).collect())
    }

    async fn site_title(&self, site_url: &str) -> Result<Option<String>, ProviderError> {
        self.record(format!("site_title {site_url}"));
        if let Some((url, state)) = &self.cancel_at {
            if url == site_url {
                state.cancel();
            }
        }
        self.find_site(site_url)?
            .title
            .clone()
            .map_err(|e| api_error(&e))
    }

    async fn list_libraries(&self, site_url: &str) -> Result<Vec<Library>, ProviderError> {
        self.record(format!("list_libraries {site_url}"));
        self.find_site(site_url)?
            .libraries
            .clone()
            .map_err(|e| api_error(&e))
    }

    async fn list_folder(
        &self,
        _site_url: &str,
        server_relative_url: &str,
    ) -> Result<FolderListing, ProviderError> {
        self.record(format!("list_folder {server_relative_url}"));
        self.folders
            .get(server_relative_url)
            .cloned()
            .ok_or_else(|| api_error("folder not found"))
    }

    async fn fetch_file(
        &self,
        _site_url: &str,
        server_relative_url: &str,
    ) -> Result<ByteStream, ProviderError> {
        self.record(format!("fetch_file {server_relative_url}"));
        match self.files.get(server_relative_url) {
            Some(FakeContent::Complete(content)) => {
                Ok(stream::iter(vec![Ok(Bytes::from(content.clone()))]).boxed())
            }
            Some(FakeContent::Unavailable(e)) => Err(api_error(e)),
            Some(FakeContent::Interrupted(first_bytes, e)) => Ok(stream::iter(vec![
                Ok(Bytes::from(first_bytes.clone())),
                Err(api_error(e)),
            ])
            .boxed()),
            None => Err(api_error("file not found")),
        }
    }
}

/// Every path below `root`, relative to it, with file contents
pub fn snapshot_tree(root: &Path) -> BTreeSet<(String, Option<Vec<u8>>)> {
    let mut entries = BTreeSet::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            let relative = path
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/");
            if path.is_dir() {
                entries.insert((relative, None));
                pending.push(path);
            } else {
                entries.insert((relative, Some(std::fs::read(&path).unwrap())));
            }
        }
    }
    entries
}
