//! Authentication against the Recap server.
//!
//! Two handshakes are supported and exactly one is configured per run:
//! a form login that leaves a `JSESSIONID` cookie in the client's jar, and an
//! OAuth2 client-credentials exchange that yields a bearer token.

use std::fmt;

use reqwest::cookie::{CookieStore, Jar};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::errors::{AuthError, ConfigError};

/// Token endpoint for the client-credentials exchange, relative to the base URL.
pub const BEARER_AUTH_PATH: &str = "/api/authz/v3/oauth/token";

/// Form login endpoint, relative to the base URL.
pub const LOGIN_PATH: &str = "/login.jsp";

/// Scope requested in the client-credentials exchange.
pub const BACKOFFICE_SCOPE: &str = "psn:backoffice";

/// Cookie the login endpoint must set.
pub const SESSION_COOKIE: &str = "JSESSIONID";

/// How a run authenticates against the Recap server.
#[derive(Clone, PartialEq, Eq)]
pub enum Auth {
    Cookie { username: String, password: String },
    Bearer { client_id: String, client_secret: String },
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cookie { username, .. } => f
                .debug_struct("Cookie")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::Bearer { client_id, .. } => f
                .debug_struct("Bearer")
                .field("client_id", client_id)
                .field("client_secret", &"<redacted>")
                .finish(),
        }
    }
}

impl Auth {
    /// Pick the auth mode from `<a>:<b>` credential strings.
    ///
    /// Exactly one of `cookie` and `bearer` must be given.
    pub fn from_credentials(cookie: Option<&str>, bearer: Option<&str>) -> Result<Self, ConfigError> {
        match (cookie, bearer) {
            (Some(cookie), None) => {
                let (username, password) = split_credentials(cookie, "cookie_auth")?;
                Ok(Self::Cookie { username, password })
            }
            (None, Some(bearer)) => {
                let (client_id, client_secret) = split_credentials(bearer, "bearer_auth")?;
                Ok(Self::Bearer {
                    client_id,
                    client_secret,
                })
            }
            _ => Err(ConfigError::AuthModeAmbiguous),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Cookie { .. } => "cookie",
            Self::Bearer { .. } => "bearer",
        }
    }

    /// Run the handshake using the run's HTTP client.
    ///
    /// `jar` must be the cookie store the client was built with.
    #[instrument(skip(self, http, jar), fields(mode = self.kind()))]
    pub async fn authenticate(
        &self,
        http: &reqwest::Client,
        jar: &Jar,
        base_url: &Url,
    ) -> Result<Credential, AuthError> {
        match self {
            Self::Bearer {
                client_id,
                client_secret,
            } => {
                let token = fetch_bearer_token(http, base_url, client_id, client_secret).await?;
                Ok(Credential::Bearer(token))
            }
            Self::Cookie { username, password } => {
                login(http, jar, base_url, username, password).await?;
                Ok(Credential::Session)
            }
        }
    }
}

/// What a successful handshake leaves behind for the crash request.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// The session cookie lives in the client's jar; nothing to add.
    Session,
    /// Sent as `Authorization: Bearer <token>`.
    Bearer(String),
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Session => write!(f, "Session"),
            Self::Bearer(_) => write!(f, "Bearer(<redacted>)"),
        }
    }
}

impl Credential {
    /// Attach the credential to an outgoing request.
    pub fn apply(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Self::Session => req,
            Self::Bearer(token) => req.bearer_auth(token),
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

async fn fetch_bearer_token(
    http: &reqwest::Client,
    base_url: &Url,
    client_id: &str,
    client_secret: &str,
) -> Result<String, AuthError> {
    let url = endpoint(base_url, BEARER_AUTH_PATH);
    let resp = http
        .post(&url)
        .basic_auth(client_id, Some(client_secret))
        .form(&[
            ("grant_type", "client_credentials"),
            ("scope", BACKOFFICE_SCOPE),
        ])
        .send()
        .await?;

    let status = resp.status();
    if !status.is_success() {
        warn!(status = %status, "token exchange rejected");
        return Err(AuthError::Rejected {
            status: status.as_u16(),
        });
    }

    let body: TokenResponse = resp.json().await?;
    match body.access_token {
        Some(token) if !token.is_empty() => {
            debug!("fetched bearer token");
            Ok(token)
        }
        _ => Err(AuthError::MissingToken),
    }
}

async fn login(
    http: &reqwest::Client,
    jar: &Jar,
    base_url: &Url,
    username: &str,
    password: &str,
) -> Result<(), AuthError> {
    let url = endpoint(base_url, LOGIN_PATH);
    let resp = http
        .post(&url)
        .form(&[("username", username), ("password", password)])
        .send()
        .await?;

    let status = resp.status();
    if !status.is_success() {
        warn!(status = %status, "login rejected");
        return Err(AuthError::Rejected {
            status: status.as_u16(),
        });
    }

    if !has_cookie(jar, base_url, SESSION_COOKIE) {
        return Err(AuthError::MissingSessionCookie(SESSION_COOKIE.to_string()));
    }

    info!(username, "logged in to recap server");
    Ok(())
}

fn has_cookie(jar: &Jar, url: &Url, name: &str) -> bool {
    let Some(header) = jar.cookies(url) else {
        return false;
    };
    let Ok(header) = header.to_str() else {
        return false;
    };
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .any(|(key, value)| key == name && !value.is_empty())
}

fn endpoint(base_url: &Url, path: &str) -> String {
    format!("{}{}", base_url.as_str().trim_end_matches('/'), path)
}

fn split_credentials(raw: &str, field: &str) -> Result<(String, String), ConfigError> {
    match raw.split_once(':') {
        Some((left, right)) if !left.is_empty() => Ok((left.to_string(), right.to_string())),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            detail: "expected '<name>:<secret>'".into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_only() {
        let auth = Auth::from_credentials(Some("alice:s3cret"), None).unwrap();
        assert_eq!(
            auth,
            Auth::Cookie {
                username: "alice".into(),
                password: "s3cret".into()
            }
        );
    }

    #[test]
    fn test_bearer_only() {
        let auth = Auth::from_credentials(None, Some("client:secret")).unwrap();
        assert_eq!(auth.kind(), "bearer");
    }

    #[test]
    fn test_both_or_neither_is_ambiguous() {
        assert!(matches!(
            Auth::from_credentials(Some("a:b"), Some("c:d")),
            Err(ConfigError::AuthModeAmbiguous)
        ));
        assert!(matches!(
            Auth::from_credentials(None, None),
            Err(ConfigError::AuthModeAmbiguous)
        ));
    }

    #[test]
    fn test_secret_may_contain_colons() {
        let auth = Auth::from_credentials(None, Some("id:se:cr:et")).unwrap();
        assert_eq!(
            auth,
            Auth::Bearer {
                client_id: "id".into(),
                client_secret: "se:cr:et".into()
            }
        );
    }

    #[test]
    fn test_malformed_credentials() {
        assert!(matches!(
            Auth::from_credentials(Some("no-separator"), None),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            Auth::from_credentials(None, Some(":secret")),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let auth = Auth::from_credentials(Some("alice:hunter2"), None).unwrap();
        let printed = format!("{:?}", auth);
        assert!(printed.contains("alice"));
        assert!(!printed.contains("hunter2"));

        let printed = format!("{:?}", Credential::Bearer("tok".into()));
        assert!(!printed.contains("tok"));
    }

    #[test]
    fn test_has_cookie() {
        let jar = Jar::default();
        let url = Url::parse("http://recap.example.com/").unwrap();
        assert!(!has_cookie(&jar, &url, SESSION_COOKIE));

        jar.add_cookie_str("other=1; Path=/", &url);
        assert!(!has_cookie(&jar, &url, SESSION_COOKIE));

        jar.add_cookie_str("JSESSIONID=abc123; Path=/", &url);
        assert!(has_cookie(&jar, &url, SESSION_COOKIE));
    }

    #[test]
    fn test_endpoint_joins_without_double_slash() {
        let base = Url::parse("https://recap.example.com/").unwrap();
        assert_eq!(
            endpoint(&base, LOGIN_PATH),
            "https://recap.example.com/login.jsp"
        );
        let base = Url::parse("https://recap.example.com/crs").unwrap();
        assert_eq!(
            endpoint(&base, BEARER_AUTH_PATH),
            "https://recap.example.com/crs/api/authz/v3/oauth/token"
        );
    }
}
