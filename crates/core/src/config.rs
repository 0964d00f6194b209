//! TOML-based configuration for recap-sentry.
//!
//! Secrets (Recap credentials, the Sentry DSN) are never written in the file
//! itself: the file names environment variables through `*_env` fields and
//! [`SyncConfig::resolve_env_vars`] reads them at load time. The command line
//! can also fill or override the resolved values directly.
//!
//! A validated [`SyncConfig`] is turned into the [`SyncSettings`] value the
//! sync engine runs on.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::errors::ConfigError;
use crate::recap::{Auth, RecapSettings};

// ---------------------------------------------------------------------------
// File format
// ---------------------------------------------------------------------------

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Recap server connection settings.
    pub recap: RecapConfig,

    /// Sentry destination settings.
    #[serde(default)]
    pub sentry: SentryConfig,

    /// Progress state file settings.
    #[serde(default)]
    pub state: StateConfig,
}

fn default_log_level() -> String {
    "warn".into()
}

/// Recap server connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecapConfig {
    /// Server base URL (e.g. `https://recap.example.com`).
    pub base_url: String,

    /// Crash listing path appended to the base URL (e.g. `/rest/v1/crashes`).
    pub crash_endpoint: String,

    /// Environment variable holding `<username>:<password>` for cookie login.
    #[serde(default)]
    pub cookie_auth_env: Option<String>,

    /// Environment variable holding `<client-id>:<client-secret>`.
    #[serde(default)]
    pub bearer_auth_env: Option<String>,

    /// HTTP timeout in seconds for auth and crash requests (default 30).
    #[serde(default = "default_recap_timeout")]
    pub timeout_secs: u64,

    /// Resolved cookie credentials.
    #[serde(skip)]
    pub cookie_auth: Option<String>,

    /// Resolved bearer credentials.
    #[serde(skip)]
    pub bearer_auth: Option<String>,
}

fn default_recap_timeout() -> u64 {
    30
}

/// Sentry destination settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentryConfig {
    /// Environment variable holding the DSN.
    #[serde(default)]
    pub dsn_env: Option<String>,

    /// HTTP timeout in seconds for event delivery (default 10).
    #[serde(default = "default_sentry_timeout")]
    pub timeout_secs: u64,

    /// Resolved DSN.
    #[serde(skip)]
    pub dsn: Option<String>,
}

fn default_sentry_timeout() -> u64 {
    10
}

impl Default for SentryConfig {
    fn default() -> Self {
        Self {
            dsn_env: None,
            timeout_secs: default_sentry_timeout(),
            dsn: None,
        }
    }
}

/// Progress state file settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateConfig {
    /// Watermark file. Derived from the base URL host when unset.
    #[serde(default)]
    pub file_path: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Runtime settings
// ---------------------------------------------------------------------------

/// Everything one sync run needs, fully resolved.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub recap: RecapSettings,
    pub sentry_dsn: String,
    pub sink_timeout: Duration,
    pub state_file: PathBuf,
}

// ---------------------------------------------------------------------------
// Loading, resolving, validating
// ---------------------------------------------------------------------------

impl SyncConfig {
    /// A config with only the Recap location set; everything else default.
    pub fn new(base_url: impl Into<String>, crash_endpoint: impl Into<String>) -> Self {
        Self {
            log_level: default_log_level(),
            recap: RecapConfig {
                base_url: base_url.into(),
                crash_endpoint: crash_endpoint.into(),
                cookie_auth_env: None,
                bearer_auth_env: None,
                timeout_secs: default_recap_timeout(),
                cookie_auth: None,
                bearer_auth: None,
            },
            sentry: SentryConfig::default(),
            state: StateConfig::default(),
        }
    }

    /// Load a [`SyncConfig`] from a TOML file.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: SyncConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Resolve all `*_env` fields from environment variables.
    ///
    /// Missing variables only log a warning here; [`validate`](Self::validate)
    /// reports whatever is still missing once command-line overrides applied.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        info!("resolving environment variable references in config");

        if let Some(ref env_name) = self.recap.cookie_auth_env {
            self.recap.cookie_auth = resolve_optional_env(env_name, "recap.cookie_auth_env");
        }
        if let Some(ref env_name) = self.recap.bearer_auth_env {
            self.recap.bearer_auth = resolve_optional_env(env_name, "recap.bearer_auth_env");
        }
        if let Some(ref env_name) = self.sentry.dsn_env {
            self.sentry.dsn = resolve_optional_env(env_name, "sentry.dsn_env");
        }

        debug!("environment variable resolution complete");
        Ok(())
    }

    /// Check that everything a run needs is present and sane.
    ///
    /// Makes no network calls.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let base_url = self.recap.base_url.trim();
        if base_url.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "recap.base_url".into(),
                detail: "base URL must not be empty".into(),
            });
        }
        match Url::parse(base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => {}
            Ok(_) => {
                return Err(ConfigError::InvalidValue {
                    field: "recap.base_url".into(),
                    detail: "base URL must be an http(s) URL with a host".into(),
                })
            }
            Err(e) => {
                return Err(ConfigError::InvalidValue {
                    field: "recap.base_url".into(),
                    detail: e.to_string(),
                })
            }
        }

        if !self.recap.crash_endpoint.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                field: "recap.crash_endpoint".into(),
                detail: "crash endpoint must start with '/'".into(),
            });
        }

        let has_cookie = self.recap.cookie_auth.is_some();
        let has_bearer = self.recap.bearer_auth.is_some();
        if has_cookie == has_bearer {
            // Point at the variable that was meant to supply the credential.
            if !has_cookie {
                let configured = self
                    .recap
                    .cookie_auth_env
                    .as_ref()
                    .map(|v| (v, "recap.cookie_auth_env"))
                    .xor(
                        self.recap
                            .bearer_auth_env
                            .as_ref()
                            .map(|v| (v, "recap.bearer_auth_env")),
                    );
                if let Some((var, field)) = configured {
                    return Err(ConfigError::EnvVarMissing {
                        var: var.clone(),
                        field: field.into(),
                    });
                }
            }
            return Err(ConfigError::AuthModeAmbiguous);
        }

        match (&self.sentry.dsn, &self.sentry.dsn_env) {
            (Some(dsn), _) if !dsn.trim().is_empty() => {}
            (_, Some(var)) => {
                return Err(ConfigError::EnvVarMissing {
                    var: var.clone(),
                    field: "sentry.dsn_env".into(),
                })
            }
            _ => {
                return Err(ConfigError::InvalidValue {
                    field: "sentry.dsn".into(),
                    detail: "a Sentry DSN is required".into(),
                })
            }
        }

        if self.recap.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "recap.timeout_secs".into(),
                detail: "timeout must be > 0".into(),
            });
        }
        if self.sentry.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sentry.timeout_secs".into(),
                detail: "timeout must be > 0".into(),
            });
        }

        Ok(())
    }

    /// Convenience: load and resolve in one call (validation is left to the
    /// caller so command-line overrides can be applied first).
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        Ok(config)
    }

    /// Validate and produce the settings for a sync run.
    pub fn to_settings(&self) -> Result<SyncSettings, ConfigError> {
        self.validate()?;

        let auth = Auth::from_credentials(
            self.recap.cookie_auth.as_deref(),
            self.recap.bearer_auth.as_deref(),
        )?;

        let state_file = match &self.state.file_path {
            Some(path) => path.clone(),
            None => default_state_path(&self.recap.base_url)?,
        };

        Ok(SyncSettings {
            recap: RecapSettings {
                base_url: self.recap.base_url.trim().to_string(),
                crash_endpoint: self.recap.crash_endpoint.clone(),
                auth,
                timeout: Duration::from_secs(self.recap.timeout_secs),
            },
            sentry_dsn: self.sentry.dsn.clone().unwrap_or_default(),
            sink_timeout: Duration::from_secs(self.sentry.timeout_secs),
            state_file,
        })
    }

    /// Generate a default TOML config template string.
    pub fn default_template() -> &'static str {
        r#"# recap-sentry configuration

log_level = "warn"

[recap]
base_url = "https://recap.example.com"
crash_endpoint = "/rest/v1/crashes"
# Exactly one of the two credential variables must be set.
# The variable holds "<username>:<password>" or "<client-id>:<client-secret>".
cookie_auth_env = "RECAP_COOKIE_AUTH"
# bearer_auth_env = "RECAP_BEARER_AUTH"
timeout_secs = 30

[sentry]
dsn_env = "RECAP_SENTRY_DSN"
timeout_secs = 10

[state]
# Defaults to "<recap host>.state" in the working directory.
# file_path = "/var/lib/recap-sentry/recap.example.com.state"
"#
    }
}

/// State file name derived from the Recap base URL.
///
/// `https://recap.example.com` → `recap.example.com.state`,
/// `http://host:8080/crs/` → `host_8080.crs.state`.
pub fn default_state_path(base_url: &str) -> Result<PathBuf, ConfigError> {
    let url = Url::parse(base_url.trim()).map_err(|e| ConfigError::InvalidValue {
        field: "recap.base_url".into(),
        detail: e.to_string(),
    })?;
    let host = url.host_str().ok_or_else(|| ConfigError::InvalidValue {
        field: "recap.base_url".into(),
        detail: "base URL has no host".into(),
    })?;

    let mut name = host.to_string();
    if let Some(port) = url.port() {
        name.push_str(&format!("_{}", port));
    }
    let path = url.path().trim_matches('/');
    if !path.is_empty() {
        name.push('.');
        name.push_str(&path.replace('/', "."));
    }
    name.push_str(".state");
    Ok(PathBuf::from(name))
}

/// Try to read an environment variable by name.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn sample_toml() -> &'static str {
        r#"
log_level = "debug"

[recap]
base_url = "https://recap.example.com"
crash_endpoint = "/rest/v1/crashes"
bearer_auth_env = "TEST_RECAP_SAMPLE_BEARER"
timeout_secs = 15

[sentry]
dsn_env = "TEST_RECAP_SAMPLE_DSN"

[state]
file_path = "/var/lib/recap-sentry/recap.state"
"#
    }

    fn ready_config() -> SyncConfig {
        let mut config = SyncConfig::new("https://recap.example.com", "/crashes");
        config.recap.cookie_auth = Some("alice:pw".into());
        config.sentry.dsn = Some("https://key@sentry.io/1".into());
        config
    }

    #[test]
    fn test_parse_full_config() {
        let config: SyncConfig = toml::from_str(sample_toml()).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.recap.base_url, "https://recap.example.com");
        assert_eq!(config.recap.crash_endpoint, "/rest/v1/crashes");
        assert_eq!(
            config.recap.bearer_auth_env.as_deref(),
            Some("TEST_RECAP_SAMPLE_BEARER")
        );
        assert!(config.recap.cookie_auth_env.is_none());
        assert_eq!(config.recap.timeout_secs, 15);
        assert_eq!(config.sentry.timeout_secs, 10);
        assert_eq!(
            config.state.file_path,
            Some(PathBuf::from("/var/lib/recap-sentry/recap.state"))
        );
    }

    #[test]
    fn test_load_from_file() {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(sample_toml().as_bytes()).unwrap();
        let config = SyncConfig::load_from_file(tmp.path()).unwrap();
        assert_eq!(config.recap.crash_endpoint, "/rest/v1/crashes");
    }

    #[test]
    fn test_file_not_found() {
        let result = SyncConfig::load_from_file("/nonexistent/recap-sentry.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_parse_error() {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(b"[recap\nbase_url = ").unwrap();
        assert!(matches!(
            SyncConfig::load_from_file(tmp.path()),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_resolve_env_vars() {
        std::env::set_var("TEST_RECAP_RESOLVE_BEARER", "client:secret");
        std::env::set_var("TEST_RECAP_RESOLVE_DSN", "https://key@sentry.io/9");

        let mut config = SyncConfig::new("https://recap.example.com", "/crashes");
        config.recap.bearer_auth_env = Some("TEST_RECAP_RESOLVE_BEARER".into());
        config.sentry.dsn_env = Some("TEST_RECAP_RESOLVE_DSN".into());
        config.resolve_env_vars().unwrap();

        assert_eq!(config.recap.bearer_auth.as_deref(), Some("client:secret"));
        assert_eq!(config.sentry.dsn.as_deref(), Some("https://key@sentry.io/9"));
        assert!(config.validate().is_ok());

        std::env::remove_var("TEST_RECAP_RESOLVE_BEARER");
        std::env::remove_var("TEST_RECAP_RESOLVE_DSN");
    }

    #[test]
    fn test_missing_env_var_is_reported() {
        let mut config = ready_config();
        config.recap.cookie_auth = None;
        config.recap.cookie_auth_env = Some("TEST_RECAP_NEVER_SET_COOKIE".into());
        config.resolve_env_vars().unwrap();
        match config.validate() {
            Err(ConfigError::EnvVarMissing { var, field }) => {
                assert_eq!(var, "TEST_RECAP_NEVER_SET_COOKIE");
                assert_eq!(field, "recap.cookie_auth_env");
            }
            other => panic!("expected EnvVarMissing, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_accepts_ready_config() {
        assert!(ready_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_both_auth_modes() {
        let mut config = ready_config();
        config.recap.bearer_auth = Some("id:secret".into());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::AuthModeAmbiguous)
        ));
    }

    #[test]
    fn test_validate_rejects_no_auth_mode() {
        let mut config = ready_config();
        config.recap.cookie_auth = None;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::AuthModeAmbiguous)
        ));
    }

    #[test]
    fn test_validate_rejects_bad_base_url() {
        for url in ["", "recap.example.com", "ftp://recap.example.com"] {
            let mut config = ready_config();
            config.recap.base_url = url.into();
            assert!(
                matches!(config.validate(), Err(ConfigError::InvalidValue { .. })),
                "expected '{}' to be rejected",
                url
            );
        }
    }

    #[test]
    fn test_validate_rejects_relative_endpoint() {
        let mut config = ready_config();
        config.recap.crash_endpoint = "crashes".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_validate_requires_dsn() {
        let mut config = ready_config();
        config.sentry.dsn = None;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = ready_config();
        config.recap.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_to_settings() {
        let settings = ready_config().to_settings().unwrap();
        assert_eq!(
            settings.recap.auth,
            Auth::Cookie {
                username: "alice".into(),
                password: "pw".into()
            }
        );
        assert_eq!(settings.state_file, PathBuf::from("recap.example.com.state"));
        assert_eq!(settings.recap.timeout, Duration::from_secs(30));
        assert_eq!(settings.sentry_dsn, "https://key@sentry.io/1");
    }

    #[test]
    fn test_to_settings_explicit_state_file() {
        let mut config = ready_config();
        config.state.file_path = Some(PathBuf::from("/tmp/custom.state"));
        let settings = config.to_settings().unwrap();
        assert_eq!(settings.state_file, PathBuf::from("/tmp/custom.state"));
    }

    #[test]
    fn test_default_state_path() {
        assert_eq!(
            default_state_path("https://recap.example.com").unwrap(),
            PathBuf::from("recap.example.com.state")
        );
        assert_eq!(
            default_state_path("https://recap.example.com/").unwrap(),
            PathBuf::from("recap.example.com.state")
        );
        assert_eq!(
            default_state_path("http://host:8080/crs/v1/").unwrap(),
            PathBuf::from("host_8080.crs.v1.state")
        );
        assert!(default_state_path("no-scheme").is_err());
    }

    #[test]
    fn test_default_template_is_valid() {
        let config: SyncConfig = toml::from_str(SyncConfig::default_template()).unwrap();
        assert_eq!(config.recap.cookie_auth_env.as_deref(), Some("RECAP_COOKIE_AUTH"));
        assert_eq!(config.sentry.dsn_env.as_deref(), Some("RECAP_SENTRY_DSN"));
        assert!(config.state.file_path.is_none());
    }
}
