use anyhow::anyhow;
use reqwest::redirect::Policy;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};
use url::Url;

use crate::auth::{self, Credentials};
use crate::client::SharePointClient;
use crate::error::{ProviderError, Result};
use crate::types::{SharePointClientConfig, SharePointClientConfigArc};
use crate::utils::{origin_of, parse_url};

/// An authenticated connection to a SharePoint Online tenant.
///
/// Holds the account credentials and one sign-in cookie per origin. The
/// tenant admin host is signed in when the session is created; site hosts
/// are signed in on first use.
pub struct Session {
    pub(crate) http: reqwest::Client,
    pub(crate) admin_url: String,
    pub(crate) config: SharePointClientConfigArc,
    credentials: Credentials,
    cookies: Mutex<HashMap<String, String>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("admin_url", &self.admin_url)
            .field("credentials", &self.credentials)
            .field("config", &*self.config)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(crate) fn new(
        admin_url: &str,
        credentials: Credentials,
        config: SharePointClientConfig,
    ) -> Result<Self> {
        let admin = parse_url(admin_url)?;
        origin_of(&admin)?;
        // Sign-in answers with a redirect whose Set-Cookie headers must be read
        let http = reqwest::Client::builder()
            .redirect(Policy::none())
            .user_agent(config.user_agent.as_str())
            .build()?;
        Ok(Self {
            http,
            admin_url: admin.as_str().trim_end_matches('/').to_string(),
            config: config.into(),
            credentials,
            cookies: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the `Cookie` header for the origin of `url`, signing in
    /// first if that origin has not been visited yet.
    pub(crate) async fn auth_cookie(&self, url: &Url) -> Result<String> {
        let origin = origin_of(url)?;

        // Held across the sign-in so an origin is only signed in once
        let mut cookies = self.cookies.lock().await;
        if let Some(cookie) = cookies.get(&origin) {
            return Ok(cookie.clone());
        }
        let cookie = auth::sign_in(&self.http, &origin, &self.credentials).await?;
        cookies.insert(origin, cookie.clone());
        Ok(cookie)
    }

    #[cfg(test)]
    pub(crate) async fn cache_cookie(&self, url: &str, cookie: &str) {
        let origin = origin_of(&parse_url(url).unwrap()).unwrap();
        self.cookies.lock().await.insert(origin, cookie.to_string());
    }
}

/// Manager for SharePoint sessions that creates SharePoint clients
#[derive(Debug, Default)]
pub struct SharePointSessionManager {
    pub session: Option<Arc<Session>>,
}

impl SharePointSessionManager {
    /// Signs in to the tenant administration site
    ///
    /// # Arguments
    ///
    /// * `admin_url` - URL of the tenant admin site, e.g. `https://contoso-admin.sharepoint.com`
    /// * `username` - Account used for the backup
    /// * `password` - Password of the account
    /// * `config` - HTTP settings shared by the session and its clients
    ///
    /// # Returns
    ///
    /// Returns a new `SharePointSessionManager` with an authenticated session
    ///
    /// # Example
    ///
    /// ```ignore
    /// let manager = SharePointSessionManager::connect(
    ///     "https://contoso-admin.sharepoint.com",
    ///     "admin@contoso.onmicrosoft.com",
    ///     "password",
    ///     SharePointClientConfig::default(),
    /// ).await?;
    /// ```
    pub async fn connect(
        admin_url: &str,
        username: &str,
        password: &str,
        config: SharePointClientConfig,
    ) -> std::result::Result<Self, ProviderError> {
        info!("Connecting to {:?} as {:?}", admin_url, username);
        let session = Session::new(admin_url, Credentials::new(username, password), config)?;
        session.auth_cookie(&parse_url(&session.admin_url)?).await?;
        Ok(Self {
            session: Some(Arc::new(session)),
        })
    }

    /// Creates a new SharePoint client from the managed session
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not connected
    ///
    /// # Example
    ///
    /// ```ignore
    /// let client = manager.create_client()?;
    /// let sites = client.list_sites().await?;
    /// ```
    pub fn create_client(&self) -> std::result::Result<SharePointClient, anyhow::Error> {
        debug!("Creating SharePoint client from session");
        let session = self
            .session
            .as_ref()
            .ok_or(anyhow!("SharePoint session not connected"))?;
        Ok(SharePointClient::new(session.clone()))
    }

    /// Closes the session if no SharePoint clients are using it
    ///
    /// # Returns
    ///
    /// Returns `Ok(())` if the session was released, or an error if:
    /// - Some clients still hold references to the session
    /// - The session was already closed
    pub async fn close(&mut self) -> std::result::Result<(), anyhow::Error> {
        if let Some(session) = self.session.take() {
            match Arc::try_unwrap(session) {
                Ok(session) => {
                    info!("No SharePoint client is using the session anymore so can close the session");
                    drop(session);
                    Ok(())
                }
                Err(session) => {
                    error!(
                        "Some SharePoint client still has the session instance so could not close session"
                    );
                    self.session = Some(session);
                    Err(anyhow!("failed to close SharePoint session"))
                }
            }
        } else {
            error!("Session not found");
            Err(anyhow!("failed to close SharePoint session"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(admin_url: &str, config: SharePointClientConfig) -> Session {
        Session::new(admin_url, Credentials::new("admin", "secret"), config).unwrap()
    }

    #[test]
    fn create_client_requires_a_session() {
        let manager = SharePointSessionManager::default();
        assert!(manager.create_client().is_err());
    }

    #[test]
    fn clients_share_the_session_config() {
        let session = session(
            "https://contoso-admin.sharepoint.com",
            SharePointClientConfig::new("agent/1"),
        );
        assert_eq!(session.config.user_agent, "agent/1");

        let manager = SharePointSessionManager {
            session: Some(Arc::new(session)),
        };
        let client = manager.create_client().unwrap();
        assert_eq!(client.session.config.user_agent, "agent/1");
    }

    #[test]
    fn invalid_admin_url_is_rejected() {
        let result = Session::new(
            "contoso-admin.sharepoint.com",
            Credentials::new("admin", "secret"),
            SharePointClientConfig::default(),
        );
        assert!(matches!(result, Err(ProviderError::Parse(_))));
    }

    #[tokio::test]
    async fn cached_cookie_is_reused_per_origin() {
        let session = session(
            "https://contoso-admin.sharepoint.com",
            SharePointClientConfig::default(),
        );
        session
            .cache_cookie("https://contoso.sharepoint.com", "FedAuth=abc")
            .await;
        let site = parse_url("HTTPS://Contoso.SharePoint.com/sites/hr/_api/web").unwrap();
        assert_eq!(session.auth_cookie(&site).await.unwrap(), "FedAuth=abc");
    }

    #[tokio::test]
    async fn close_refuses_while_clients_exist() {
        let session = session(
            "https://contoso-admin.sharepoint.com/",
            SharePointClientConfig::default(),
        );
        assert_eq!(session.admin_url, "https://contoso-admin.sharepoint.com");

        let mut manager = SharePointSessionManager {
            session: Some(Arc::new(session)),
        };
        let client = manager.create_client().unwrap();
        assert!(manager.close().await.is_err());
        assert!(manager.session.is_some());

        drop(client);
        tokio_test::assert_ok!(manager.close().await);
        assert!(manager.session.is_none());
        assert!(manager.close().await.is_err());
    }
}
