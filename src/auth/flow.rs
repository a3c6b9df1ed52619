use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use url::form_urlencoded;
use url::Url;

use crate::adapters::http_client::HttpClient;
use crate::auth::navigation::{has_callback_code, Navigation};
use crate::auth::pkce::{new_flow_id, Pkce};
use crate::auth::storage::{StateStore, UserStore, STATE_KEY_PREFIX};
use crate::auth::token::{Clock, Profile, User};
use crate::config::SessionConfig;
use crate::error::{Result, SessionError};

const SIGNIN_REQUEST_TYPE: &str = "si:r";
const SIGNOUT_REQUEST_TYPE: &str = "so:r";

/// Claims that describe the token itself rather than the user
const PROTOCOL_CLAIMS: &[&str] = &["nonce", "at_hash", "iat", "nbf", "exp", "aud", "iss", "c_hash"];

/// Identity service endpoints, as published by OIDC discovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    pub authorization_endpoint: Url,
    pub token_endpoint: Url,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userinfo_endpoint: Option<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_session_endpoint: Option<Url>,
}

/// Fixed parameters of the authorization-code flow.
///
/// Silent renew and session monitoring both need a hidden iframe talking to
/// the identity service, which SameSite cookie rules break. They stay off and
/// re-authentication is always user driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowSettings {
    pub response_type: &'static str,
    pub response_mode: &'static str,
    pub automatic_silent_renew: bool,
    pub monitor_session: bool,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            response_type: "code",
            response_mode: "query",
            automatic_silent_renew: false,
            monitor_session: false,
        }
    }
}

/// Prompt behaviour for an interactive login
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Prompt {
    /// Always confirm which account to continue with; use for explicit sign-in clicks
    Login,
    /// Never show UI; the identity service returns an error if interaction is needed
    None,
}

impl Prompt {
    pub fn as_str(&self) -> &'static str {
        match self {
            Prompt::Login => "login",
            Prompt::None => "none",
        }
    }
}

impl std::str::FromStr for Prompt {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "login" => Ok(Prompt::Login),
            "none" => Ok(Prompt::None),
            other => Err(SessionError::Configuration(format!(
                "unknown prompt '{}', expected 'login' or 'none'",
                other
            ))),
        }
    }
}

/// Hints passed to the identity service for a guest sign-in.
///
/// `silent_hint` is only honoured remotely when the display name is valid and
/// `accepted_terms_hint` is set; that is the caller's responsibility.
/// `accepted_terms_hint` must not be set unless the user has explicitly
/// agreed to the terms and conditions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestLoginHints {
    /// Ask the identity service to skip its own UI
    #[serde(default)]
    pub silent_hint: bool,
    /// Display name to assign (silent) or prefill (interactive)
    #[serde(default)]
    pub display_name_hint: Option<String>,
    /// The user already accepted the terms and conditions
    #[serde(default)]
    pub accepted_terms_hint: bool,
}

impl GuestLoginHints {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn silent(mut self) -> Self {
        self.silent_hint = true;
        self
    }

    #[must_use]
    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name_hint = Some(name.into());
        self
    }

    #[must_use]
    pub fn accepted_terms(mut self) -> Self {
        self.accepted_terms_hint = true;
        self
    }

    /// Wire-level query parameters for the guest sign-in
    pub fn query_params(&self) -> Vec<(String, String)> {
        let mut params = vec![("hint_vertex_guest".to_string(), "1".to_string())];
        if self.silent_hint {
            params.push(("hint_silent".to_string(), "1".to_string()));
        }
        if let Some(name) = self.display_name_hint.as_deref().filter(|n| !n.is_empty()) {
            params.push(("hint_username".to_string(), name.to_string()));
        }
        if self.accepted_terms_hint {
            params.push(("hint_tandc".to_string(), "1".to_string()));
        }
        params
    }
}

/// Arguments for an authorization redirect
#[derive(Debug, Clone, Default)]
pub struct SigninArgs {
    pub prompt: Option<Prompt>,
    pub extra_query_params: Vec<(String, String)>,
}

/// An issued authorization request
#[derive(Debug, Clone)]
pub struct SigninRequest {
    pub url: Url,
    pub state: String,
}

/// An issued end-session request
#[derive(Debug, Clone)]
pub struct SignoutRequest {
    pub url: Url,
    pub id_token_hint: Option<String>,
}

/// Partial-flow record kept between the redirect and the callback
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FlowState {
    id: String,
    request_type: String,
    /// Seconds since the Unix epoch
    created: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    code_verifier: Option<String>,
    redirect_uri: String,
    authority: String,
    client_id: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

impl ErrorResponse {
    fn describe(&self) -> String {
        match &self.error_description {
            Some(desc) => format!("{}: {}", self.error, desc),
            None => self.error.clone(),
        }
    }
}

/// Drives the redirect-based authorization-code flow
pub struct AuthorizationFlow {
    config: SessionConfig,
    settings: FlowSettings,
    http: Arc<dyn HttpClient>,
    store: Arc<dyn StateStore>,
    users: UserStore,
    navigation: Arc<dyn Navigation>,
    clock: Arc<dyn Clock>,
    metadata: RwLock<Option<ProviderMetadata>>,
}

impl AuthorizationFlow {
    pub fn new(
        config: SessionConfig,
        http: Arc<dyn HttpClient>,
        store: Arc<dyn StateStore>,
        navigation: Arc<dyn Navigation>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let settings = FlowSettings::default();
        debug!(
            response_type = settings.response_type,
            response_mode = settings.response_mode,
            automatic_silent_renew = settings.automatic_silent_renew,
            monitor_session = settings.monitor_session,
            "Creating authorization flow"
        );

        let users = UserStore::new(store.clone(), config.authority().as_str(), config.client_id());
        let metadata = RwLock::new(config.metadata().cloned());

        Self {
            config,
            settings,
            http,
            store,
            users,
            navigation,
            clock,
            metadata,
        }
    }

    pub fn settings(&self) -> FlowSettings {
        self.settings
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The token store adapter backing this flow
    pub fn users(&self) -> &UserStore {
        &self.users
    }

    /// Provider metadata, fetched through discovery on first use
    pub async fn metadata(&self) -> Result<ProviderMetadata> {
        if let Some(metadata) = self.metadata.read().await.as_ref() {
            return Ok(metadata.clone());
        }

        let url = self.config.discovery_url()?;
        debug!(url = %url, "Fetching provider metadata");

        let response = self
            .http
            .get(url.as_str(), json_headers())
            .await?
            .ensure_success("metadata discovery")?;
        let metadata: ProviderMetadata = response.json()?;

        *self.metadata.write().await = Some(metadata.clone());
        info!(issuer = ?metadata.issuer, "Provider metadata loaded");
        Ok(metadata)
    }

    /// Whether the current location carries an authorization response
    pub fn is_callback(&self) -> bool {
        has_callback_code(&self.navigation.current_url())
    }

    /// The redirect URI with its query string stripped
    pub fn clean_redirect_uri(&self) -> Url {
        let mut url = self.config.redirect_uri().clone();
        url.set_query(None);
        url.set_fragment(None);
        url
    }

    /// Complete the callback at the current location, then strip its query
    /// so a reload cannot replay the consumed code.
    pub async fn complete_callback(&self) -> Result<User> {
        let url = self.navigation.current_url();
        let user = self.signin_redirect_callback(&url).await?;
        self.navigation.replace_history(&self.clean_redirect_uri());
        Ok(user)
    }

    /// Exchange the authorization response in `url` for a user record and store it
    pub async fn signin_redirect_callback(&self, url: &Url) -> Result<User> {
        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();

        if let Some(err) = params.get("error") {
            if let Some(state) = params.get("state") {
                self.store.remove(&state_key(state)).await?;
            }
            let response = ErrorResponse {
                error: err.clone(),
                error_description: params.get("error_description").cloned(),
            };
            error!(error = %response.describe(), "Identity service returned an error");
            return Err(SessionError::Callback(response.describe()));
        }

        let state_id = params
            .get("state")
            .ok_or_else(|| SessionError::Callback("No state in response".into()))?;
        let code = params
            .get("code")
            .ok_or_else(|| SessionError::Callback("No code in response".into()))?;

        let raw_state = self
            .store
            .remove(&state_key(state_id))
            .await?
            .ok_or_else(|| SessionError::Callback("No matching state found in storage".into()))?;
        let state: FlowState = serde_json::from_str(&raw_state)
            .map_err(|e| SessionError::Callback(format!("Stored state is unreadable: {}", e)))?;
        if state.request_type != SIGNIN_REQUEST_TYPE {
            return Err(SessionError::Callback(format!(
                "State {} does not belong to a sign-in request",
                state.id
            )));
        }

        debug!(state = %state.id, "Processing authorization callback");
        let metadata = self.metadata().await?;
        let tokens = self.exchange_code(&metadata, code, &state).await?;

        let now = self.clock.now();
        let mut profile = match tokens.id_token.as_deref() {
            Some(id_token) => match decode_id_token_claims(id_token) {
                Ok(claims) => Profile::from_claims(claims),
                Err(e) => {
                    warn!(error = %e, "ID token claims could not be read");
                    Profile::default()
                }
            },
            None => Profile::default(),
        };

        if self.config.load_user_info() {
            if let Some(endpoint) = &metadata.userinfo_endpoint {
                let claims = self.fetch_user_info(endpoint, &tokens.access_token).await?;
                profile.merge(Profile::from_claims(claims));
            }
        }

        let mut user = User::new(tokens.access_token, tokens.expires_in, now).with_profile(profile);
        user.id_token = tokens.id_token;
        if let Some(token_type) = tokens.token_type {
            user.token_type = token_type;
        }
        user.scope = tokens
            .scope
            .unwrap_or_else(|| self.config.scope().to_string());

        self.users.store(&user).await?;
        info!(subject = %user.profile.sub, expires_at = ?user.expires_at, "Sign-in completed");
        Ok(user)
    }

    async fn exchange_code(
        &self,
        metadata: &ProviderMetadata,
        code: &str,
        state: &FlowState,
    ) -> Result<TokenResponse> {
        let mut form = form_urlencoded::Serializer::new(String::new());
        form.append_pair("grant_type", "authorization_code")
            .append_pair("code", code)
            .append_pair("redirect_uri", &state.redirect_uri)
            .append_pair("client_id", &state.client_id);
        if let Some(verifier) = &state.code_verifier {
            form.append_pair("code_verifier", verifier);
        }

        let mut headers = json_headers();
        headers.insert(
            "content-type".to_string(),
            "application/x-www-form-urlencoded".to_string(),
        );

        let response = self
            .http
            .post(metadata.token_endpoint.as_str(), headers, form.finish())
            .await?;

        if !response.is_success() {
            let status = response.status();
            let reason = match response.json::<ErrorResponse>() {
                Ok(err) => err.describe(),
                Err(_) => format!("token endpoint returned status {}", status),
            };
            error!(status, reason = %reason, "Code exchange rejected");
            return Err(SessionError::Callback(reason));
        }

        response.json()
    }

    async fn fetch_user_info(
        &self,
        endpoint: &Url,
        access_token: &str,
    ) -> Result<HashMap<String, Value>> {
        let mut headers = json_headers();
        headers.insert(
            "authorization".to_string(),
            format!("Bearer {}", access_token),
        );

        let response = self
            .http
            .get(endpoint.as_str(), headers)
            .await?
            .ensure_success("userinfo request")?;
        response.json()
    }

    /// Redirect to the authorization endpoint
    pub async fn signin_redirect(&self, args: SigninArgs) -> Result<SigninRequest> {
        let metadata = self.metadata().await?;

        let pkce = Pkce::new();
        let state = FlowState {
            id: new_flow_id(),
            request_type: SIGNIN_REQUEST_TYPE.to_string(),
            created: self.clock.now().timestamp(),
            code_verifier: Some(pkce.verifier.clone()),
            redirect_uri: self.config.redirect_uri().to_string(),
            authority: self.config.authority().to_string(),
            client_id: self.config.client_id().to_string(),
        };

        let mut url = metadata.authorization_endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", self.config.client_id())
                .append_pair("redirect_uri", self.config.redirect_uri().as_str())
                .append_pair("response_type", self.settings.response_type)
                .append_pair("scope", self.config.scope())
                .append_pair("state", &state.id)
                .append_pair("code_challenge", &pkce.challenge)
                .append_pair("code_challenge_method", pkce.method())
                .append_pair("response_mode", self.settings.response_mode);
            if let Some(prompt) = args.prompt {
                query.append_pair("prompt", prompt.as_str());
            }
            for (key, value) in &args.extra_query_params {
                query.append_pair(key, value);
            }
        }

        self.store
            .set(&state_key(&state.id), serde_json::to_string(&state)?)
            .await?;

        debug!(state = %state.id, prompt = ?args.prompt, "Starting sign-in redirect");
        self.navigation.redirect(&url);

        Ok(SigninRequest {
            url,
            state: state.id,
        })
    }

    /// Remove the stored user and redirect to the end-session endpoint
    pub async fn signout_redirect(&self, signout_external: Option<bool>) -> Result<SignoutRequest> {
        let id_token_hint = self.users.retrieve().await?.and_then(|user| user.id_token);
        self.users.clear().await?;

        let metadata = self.metadata().await?;
        let endpoint = metadata.end_session_endpoint.clone().ok_or_else(|| {
            SessionError::Configuration(
                "Identity service does not advertise an end_session_endpoint".into(),
            )
        })?;

        let state = FlowState {
            id: new_flow_id(),
            request_type: SIGNOUT_REQUEST_TYPE.to_string(),
            created: self.clock.now().timestamp(),
            code_verifier: None,
            redirect_uri: self.config.post_logout_redirect_uri().to_string(),
            authority: self.config.authority().to_string(),
            client_id: self.config.client_id().to_string(),
        };

        let mut url = endpoint;
        {
            let mut query = url.query_pairs_mut();
            if let Some(hint) = &id_token_hint {
                query.append_pair("id_token_hint", hint);
            }
            query
                .append_pair(
                    "post_logout_redirect_uri",
                    self.config.post_logout_redirect_uri().as_str(),
                )
                .append_pair("state", &state.id);
            if let Some(external) = signout_external {
                query.append_pair("signout_external", if external { "true" } else { "false" });
            }
        }

        self.store
            .set(&state_key(&state.id), serde_json::to_string(&state)?)
            .await?;

        debug!(has_hint = id_token_hint.is_some(), "Starting sign-out redirect");
        self.navigation.redirect(&url);

        Ok(SignoutRequest { url, id_token_hint })
    }

    /// Purge partial sign-in/sign-out records older than the configured age.
    ///
    /// Returns the number of records removed.
    pub async fn clear_stale_state(&self) -> Result<usize> {
        let cutoff = self.clock.now().timestamp() - self.config.stale_state_age_secs();
        let user_prefix = format!("{}user:", STATE_KEY_PREFIX);
        let mut removed = 0;

        for key in self.store.keys().await? {
            if !key.starts_with(STATE_KEY_PREFIX) || key.starts_with(&user_prefix) {
                continue;
            }

            let stale = match self.store.get(&key).await? {
                Some(raw) => match serde_json::from_str::<FlowState>(&raw) {
                    Ok(state) => state.created <= cutoff,
                    Err(_) => true,
                },
                None => false,
            };

            if stale {
                self.store.remove(&key).await?;
                removed += 1;
            }
        }

        debug!(removed, "Cleared stale flow state");
        Ok(removed)
    }
}

fn state_key(id: &str) -> String {
    format!("{}{}", STATE_KEY_PREFIX, id)
}

fn json_headers() -> HashMap<String, String> {
    let mut headers = HashMap::new();
    headers.insert("accept".to_string(), "application/json".to_string());
    headers
}

/// Read the payload claims of a JWT without verifying it
fn decode_id_token_claims(id_token: &str) -> Result<HashMap<String, Value>> {
    let payload = id_token
        .split('.')
        .nth(1)
        .ok_or_else(|| SessionError::Callback("ID token is not a JWT".into()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| SessionError::Callback(format!("ID token payload is not base64url: {}", e)))?;

    let mut claims: HashMap<String, Value> = serde_json::from_slice(&bytes)?;
    for claim in PROTOCOL_CLAIMS {
        claims.remove(*claim);
    }
    Ok(claims)
}
