use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::auth::flow::ProviderMetadata;
use crate::error::{Result, SessionError};

/// Default polling interval for the session watcher
pub const DEFAULT_WATCH_INTERVAL_SECS: u64 = 10;
/// Shortest interval the session watcher accepts
pub const MIN_WATCH_INTERVAL: Duration = Duration::from_millis(100);
/// Sessions are treated as inactive this many seconds before literal expiry
pub const DEFAULT_EXPIRY_MARGIN_SECS: i64 = 300;
/// Partial sign-in/sign-out state older than this is purged at startup
pub const DEFAULT_STALE_STATE_AGE_SECS: i64 = 900;

/// Identity client configuration.
///
/// Required fields are validated by [`SessionConfigBuilder::build`]; optional
/// tunables can be overridden via the `with_*` methods.
///
/// ```rust,ignore
/// let config = SessionConfig::builder()
///     .authority("https://vertx.cloud/identity")
///     .client_id("my-app")
///     .scope("openid profile vertex_api")
///     .redirect_uri("https://my-app.com/")
///     .post_logout_redirect_uri("https://my-app.com/")
///     .build()?
///     .with_watch_interval(Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    authority: Url,
    client_id: String,
    scope: String,
    redirect_uri: Url,
    post_logout_redirect_uri: Url,
    #[serde(default = "default_watch_interval")]
    watch_interval: Duration,
    #[serde(default = "default_expiry_margin")]
    expiry_margin_secs: i64,
    #[serde(default = "default_stale_state_age")]
    stale_state_age_secs: i64,
    #[serde(default = "default_true")]
    load_user_info: bool,
    #[serde(default)]
    metadata: Option<ProviderMetadata>,
}

fn default_watch_interval() -> Duration {
    Duration::from_secs(DEFAULT_WATCH_INTERVAL_SECS)
}

fn default_expiry_margin() -> i64 {
    DEFAULT_EXPIRY_MARGIN_SECS
}

fn default_stale_state_age() -> i64 {
    DEFAULT_STALE_STATE_AGE_SECS
}

fn default_true() -> bool {
    true
}

impl SessionConfig {
    /// Start building a configuration
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    /// Create configuration from environment variables.
    ///
    /// # Required env vars
    ///
    /// - `VERTEX_AUTHORITY`
    /// - `VERTEX_CLIENT_ID`
    /// - `VERTEX_SCOPE`
    /// - `VERTEX_REDIRECT_URI`
    /// - `VERTEX_POST_LOGOUT_REDIRECT_URI`
    ///
    /// # Optional env vars
    ///
    /// - `VERTEX_WATCH_INTERVAL_SECS` (whole seconds, at least 1)
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Configuration`] if a required variable is
    /// missing or a value is malformed.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let require = |name: &str| match var(name) {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(SessionError::Configuration(format!(
                "{} environment variable not set",
                name
            ))),
        };

        let mut config = Self::builder()
            .authority(require("VERTEX_AUTHORITY")?)
            .client_id(require("VERTEX_CLIENT_ID")?)
            .scope(require("VERTEX_SCOPE")?)
            .redirect_uri(require("VERTEX_REDIRECT_URI")?)
            .post_logout_redirect_uri(require("VERTEX_POST_LOGOUT_REDIRECT_URI")?)
            .build()?;

        if let Some(secs) = var("VERTEX_WATCH_INTERVAL_SECS") {
            config.watch_interval = parse_watch_interval(&secs)?;
        }

        debug!(authority = %config.authority, client_id = %config.client_id, "Loaded session config from environment");
        Ok(config)
    }

    /// Override the session watcher interval. Intervals shorter than
    /// [`MIN_WATCH_INTERVAL`] are raised to it.
    #[must_use]
    pub fn with_watch_interval(mut self, interval: Duration) -> Self {
        if interval < MIN_WATCH_INTERVAL {
            warn!(
                requested_ms = interval.as_millis() as u64,
                "Watch interval too short, using the minimum"
            );
        }
        self.watch_interval = interval.max(MIN_WATCH_INTERVAL);
        self
    }

    /// Override the expiry safety margin (seconds)
    #[must_use]
    pub fn with_expiry_margin(mut self, secs: i64) -> Self {
        self.expiry_margin_secs = secs;
        self
    }

    /// Override the age after which partial flow state is considered stale (seconds)
    #[must_use]
    pub fn with_stale_state_age(mut self, secs: i64) -> Self {
        self.stale_state_age_secs = secs;
        self
    }

    /// Enable or disable merging userinfo claims into the profile
    #[must_use]
    pub fn with_load_user_info(mut self, enabled: bool) -> Self {
        self.load_user_info = enabled;
        self
    }

    /// Supply provider metadata up front instead of using discovery
    #[must_use]
    pub fn with_metadata(mut self, metadata: ProviderMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn authority(&self) -> &Url {
        &self.authority
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn redirect_uri(&self) -> &Url {
        &self.redirect_uri
    }

    pub fn post_logout_redirect_uri(&self) -> &Url {
        &self.post_logout_redirect_uri
    }

    pub fn watch_interval(&self) -> Duration {
        self.watch_interval
    }

    pub fn expiry_margin_secs(&self) -> i64 {
        self.expiry_margin_secs
    }

    pub fn stale_state_age_secs(&self) -> i64 {
        self.stale_state_age_secs
    }

    pub fn load_user_info(&self) -> bool {
        self.load_user_info
    }

    pub fn metadata(&self) -> Option<&ProviderMetadata> {
        self.metadata.as_ref()
    }

    /// The OIDC discovery document location for this authority
    pub fn discovery_url(&self) -> Result<Url> {
        let base = self.authority.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!(
            "{}/.well-known/openid-configuration",
            base
        ))?)
    }
}

/// Builder for [`SessionConfig`]
#[derive(Debug, Default, Clone)]
pub struct SessionConfigBuilder {
    authority: Option<String>,
    client_id: Option<String>,
    scope: Option<String>,
    redirect_uri: Option<String>,
    post_logout_redirect_uri: Option<String>,
}

impl SessionConfigBuilder {
    pub fn authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = Some(authority.into());
        self
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(uri.into());
        self
    }

    pub fn post_logout_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.post_logout_redirect_uri = Some(uri.into());
        self
    }

    /// Validate and build the configuration
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Configuration`] if any field is missing, empty,
    /// or (for the URL fields) not an absolute URL.
    pub fn build(self) -> Result<SessionConfig> {
        let authority = parse_url("authority", require_field("authority", self.authority)?)?;
        let client_id = require_field("client_id", self.client_id)?;
        let scope = require_field("scope", self.scope)?;
        let redirect_uri =
            parse_url("redirect_uri", require_field("redirect_uri", self.redirect_uri)?)?;
        let post_logout_redirect_uri = parse_url(
            "post_logout_redirect_uri",
            require_field("post_logout_redirect_uri", self.post_logout_redirect_uri)?,
        )?;

        Ok(SessionConfig {
            authority,
            client_id,
            scope,
            redirect_uri,
            post_logout_redirect_uri,
            watch_interval: default_watch_interval(),
            expiry_margin_secs: DEFAULT_EXPIRY_MARGIN_SECS,
            stale_state_age_secs: DEFAULT_STALE_STATE_AGE_SECS,
            load_user_info: true,
            metadata: None,
        })
    }
}

fn require_field(name: &str, value: Option<String>) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(SessionError::Configuration(format!(
            "'{}' is required",
            name
        ))),
    }
}

fn parse_url(name: &str, value: String) -> Result<Url> {
    Url::parse(&value).map_err(|e| {
        SessionError::Configuration(format!("'{}' is not a valid URL ({}): {}", name, value, e))
    })
}

fn parse_watch_interval(value: &str) -> Result<Duration> {
    match value.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(SessionError::Configuration(format!(
            "VERTEX_WATCH_INTERVAL_SECS must be a positive number of seconds, got '{}'",
            value
        ))),
    }
}
