//! SharePoint Online sign-in with a user name and password.
//!
//! 1. A SAML security token for the target host is requested from the
//!    Microsoft Online security token service.
//! 2. The token is posted to the host's sign-in form, which answers with the
//!    `FedAuth` and `rtFa` cookies used to authorize every later request.
//!
//! Accounts federated to an on-premises identity provider are not supported.

use regex::Regex;
use reqwest::header::{CONTENT_TYPE, SET_COOKIE};
use std::sync::LazyLock;
use tracing::{debug, info};
use url::Url;

use crate::error::{ProviderError, Result};
use crate::utils::parse_url;

const STS_URL: &str = "https://login.microsoftonline.com/extSTS.srf";
const SIGN_IN_PATH: &str = "/_forms/default.aspx?wa=wsignin1.0";
const AUTH_COOKIES: [&str; 2] = ["FedAuth", "rtFa"];

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<wsse:BinarySecurityToken[^>]*>([^<]+)</wsse:BinarySecurityToken>")
        .expect("static regex")
});
static FAULT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<psf:text>([^<]+)</psf:text>").expect("static regex"));
static REASON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<S:Text[^>]*>([^<]+)</S:Text>").expect("static regex"));

/// User name and password of the account performing the backup
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Signs in to the host of `origin` (`https://tenant.sharepoint.com`) and
/// returns the value of the `Cookie` header to send with authorized requests.
pub(crate) async fn sign_in(
    http: &reqwest::Client,
    origin: &str,
    credentials: &Credentials,
) -> Result<String> {
    info!("Signing in to {:?} as {:?}", origin, credentials.username);
    let endpoint = sign_in_endpoint(origin)?;
    let token = request_security_token(http, &endpoint, credentials).await?;
    let cookie = exchange_token(http, &endpoint, &token).await?;
    debug!("Signed in to {:?}", origin);
    Ok(cookie)
}

fn sign_in_endpoint(origin: &str) -> Result<Url> {
    parse_url(origin)?
        .join(SIGN_IN_PATH)
        .map_err(|e| ProviderError::Parse(format!("invalid sign-in endpoint for {origin}: {e}")))
}

async fn request_security_token(
    http: &reqwest::Client,
    endpoint: &Url,
    credentials: &Credentials,
) -> Result<String> {
    let body = token_request(&credentials.username, &credentials.password, endpoint.as_str());
    let response = http
        .post(STS_URL)
        .header(CONTENT_TYPE, "application/soap+xml; charset=utf-8")
        .body(body)
        .send()
        .await?;
    let text = response.text().await?;
    parse_security_token(&text)
}

async fn exchange_token(http: &reqwest::Client, endpoint: &Url, token: &str) -> Result<String> {
    let response = http
        .post(endpoint.clone())
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(token.to_string())
        .send()
        .await?;
    let cookies = response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok());
    auth_cookie_header(cookies).ok_or_else(|| {
        ProviderError::Auth(format!(
            "sign-in to {endpoint} returned {} without authentication cookies",
            response.status()
        ))
    })
}

/// Builds the WS-Trust request for a token valid at `endpoint`
fn token_request(username: &str, password: &str, endpoint: &str) -> String {
    format!(
        r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" xmlns:a="http://www.w3.org/2005/08/addressing" xmlns:u="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd">
  <s:Header>
    <a:Action s:mustUnderstand="1">http://schemas.xmlsoap.org/ws/2005/02/trust/RST/Issue</a:Action>
    <a:ReplyTo><a:Address>http://www.w3.org/2005/08/addressing/anonymous</a:Address></a:ReplyTo>
    <a:To s:mustUnderstand="1">{STS_URL}</a:To>
    <o:Security s:mustUnderstand="1" xmlns:o="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd">
      <o:UsernameToken>
        <o:Username>{}</o:Username>
        <o:Password>{}</o:Password>
      </o:UsernameToken>
    </o:Security>
  </s:Header>
  <s:Body>
    <t:RequestSecurityToken xmlns:t="http://schemas.xmlsoap.org/ws/2005/02/trust">
      <wsp:AppliesTo xmlns:wsp="http://schemas.xmlsoap.org/ws/2004/09/policy">
        <a:EndpointReference><a:Address>{}</a:Address></a:EndpointReference>
      </wsp:AppliesTo>
      <t:KeyType>http://schemas.xmlsoap.org/ws/2005/05/identity/NoProofKey</t:KeyType>
      <t:RequestType>http://schemas.xmlsoap.org/ws/2005/02/trust/Issue</t:RequestType>
      <t:TokenType>urn:oasis:names:tc:SAML:1.0:assertion</t:TokenType>
    </t:RequestSecurityToken>
  </s:Body>
</s:Envelope>"#,
        xml_escape(username),
        xml_escape(password),
        xml_escape(endpoint),
    )
}

fn parse_security_token(response: &str) -> Result<String> {
    if let Some(captures) = TOKEN_RE.captures(response) {
        return Ok(xml_unescape(&captures[1]));
    }
    let reason = FAULT_RE
        .captures(response)
        .or_else(|| REASON_RE.captures(response))
        .map(|c| xml_unescape(&c[1]))
        .unwrap_or_else(|| "no security token in response".to_string());
    Err(ProviderError::Auth(reason))
}

/// Picks the authentication cookies out of `Set-Cookie` header values
fn auth_cookie_header<'a>(set_cookies: impl Iterator<Item = &'a str>) -> Option<String> {
    let pairs: Vec<&str> = set_cookies
        .filter_map(|value| value.split(';').next())
        .map(str::trim)
        .filter(|pair| {
            pair.split_once('=')
                .is_some_and(|(name, value)| AUTH_COOKIES.contains(&name) && !value.is_empty())
        })
        .collect();

    if pairs.iter().any(|pair| pair.starts_with("FedAuth=")) {
        Some(pairs.join("; "))
    } else {
        None
    }
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn xml_unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_request_escapes_credentials() {
        let body = token_request(
            "admin@contoso.onmicrosoft.com",
            "p<&>ss",
            "https://contoso.sharepoint.com/_forms/default.aspx?wa=wsignin1.0",
        );
        assert!(body.contains("<o:Username>admin@contoso.onmicrosoft.com</o:Username>"));
        assert!(body.contains("<o:Password>p&lt;&amp;&gt;ss</o:Password>"));
        assert!(body.contains(
            "<a:Address>https://contoso.sharepoint.com/_forms/default.aspx?wa=wsignin1.0</a:Address>"
        ));
    }

    #[test]
    fn sign_in_endpoint_is_built_from_the_origin() {
        assert_eq!(
            sign_in_endpoint("https://contoso.sharepoint.com").unwrap().as_str(),
            "https://contoso.sharepoint.com/_forms/default.aspx?wa=wsignin1.0"
        );
    }

    #[test]
    fn security_token_is_extracted_and_unescaped() {
        let response = r#"<S:Envelope><S:Body><wst:RequestSecurityTokenResponse><wst:RequestedSecurityToken><wsse:BinarySecurityToken Id="Compact0">t=EwBgAk&amp;p=</wsse:BinarySecurityToken></wst:RequestedSecurityToken></wst:RequestSecurityTokenResponse></S:Body></S:Envelope>"#;
        assert_eq!(parse_security_token(response).unwrap(), "t=EwBgAk&p=");
    }

    #[test]
    fn fault_reason_becomes_auth_error() {
        let response = r#"<S:Envelope><S:Body><S:Fault><S:Reason><S:Text xml:lang="en-US">Authentication Failure</S:Text></S:Reason><S:Detail><psf:error><psf:internalerror><psf:text>AADSTS50126: Invalid username or password.</psf:text></psf:internalerror></psf:error></S:Detail></S:Fault></S:Body></S:Envelope>"#;
        match parse_security_token(response) {
            Err(ProviderError::Auth(reason)) => {
                assert_eq!(reason, "AADSTS50126: Invalid username or password.")
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn only_auth_cookies_are_kept() {
        let headers = [
            "RpsContextCookie=; path=/",
            "rtFa=abc123; domain=sharepoint.com; path=/; secure; HttpOnly",
            "FedAuth=77u/PD94; path=/; secure; HttpOnly",
            "SPOIDCRL=; path=/",
        ];
        assert_eq!(
            auth_cookie_header(headers.into_iter()).as_deref(),
            Some("rtFa=abc123; FedAuth=77u/PD94")
        );
    }

    #[test]
    fn missing_fedauth_means_no_session() {
        let headers = ["rtFa=abc123; path=/"];
        assert!(auth_cookie_header(headers.into_iter()).is_none());
    }

    #[test]
    fn credentials_debug_hides_password() {
        let credentials = Credentials::new("admin", "hunter2");
        let printed = format!("{credentials:?}");
        assert!(printed.contains("admin"));
        assert!(!printed.contains("hunter2"));
    }
}
