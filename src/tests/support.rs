use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use url::Url;

use crate::adapters::http_client::MockHttpClient;
use crate::auth::flow::ProviderMetadata;
use crate::auth::navigation::MemoryNavigation;
use crate::auth::service::SessionManager;
use crate::auth::storage::{MemoryStore, StateStore, UserStore};
use crate::auth::token::{Clock, Profile, User};
use crate::config::SessionConfig;

pub const AUTHORITY: &str = "https://auth.vertx.test/";
pub const CLIENT_ID: &str = "explorer-client";
pub const SCOPE: &str = "openid profile vertex_api";
pub const REDIRECT_URI: &str = "https://app.vertx.test/callback";
pub const POST_LOGOUT_URI: &str = "https://app.vertx.test/";
pub const AUTHORIZE_URL: &str = "https://auth.vertx.test/connect/authorize";
pub const TOKEN_URL: &str = "https://auth.vertx.test/connect/token";
pub const END_SESSION_URL: &str = "https://auth.vertx.test/connect/endsession";

/// Clock that only moves when told to
pub struct FixedClock(Mutex<DateTime<Utc>>);

impl FixedClock {
    pub fn new() -> Arc<Self> {
        let start = DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp");
        Arc::new(Self(Mutex::new(start)))
    }

    pub fn advance(&self, secs: i64) {
        let mut now = self.0.lock();
        *now += Duration::seconds(secs);
    }

    pub fn now_secs(&self) -> i64 {
        self.now().timestamp()
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock()
    }
}

pub fn metadata() -> ProviderMetadata {
    ProviderMetadata {
        issuer: Some(AUTHORITY.to_string()),
        authorization_endpoint: Url::parse(AUTHORIZE_URL).unwrap(),
        token_endpoint: Url::parse(TOKEN_URL).unwrap(),
        userinfo_endpoint: None,
        end_session_endpoint: Some(Url::parse(END_SESSION_URL).unwrap()),
    }
}

pub fn config() -> SessionConfig {
    SessionConfig::builder()
        .authority(AUTHORITY)
        .client_id(CLIENT_ID)
        .scope(SCOPE)
        .redirect_uri(REDIRECT_URI)
        .post_logout_redirect_uri(POST_LOGOUT_URI)
        .build()
        .unwrap()
        .with_metadata(metadata())
        .with_load_user_info(false)
}

/// Unsigned JWT carrying `claims` as its payload
pub fn fake_id_token(claims: Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.signature", header, payload)
}

/// Raw flow-state record as the flow handler writes it
pub fn flow_state_json(id: &str, request_type: &str, created: i64) -> String {
    json!({
        "id": id,
        "request_type": request_type,
        "created": created,
        "code_verifier": "test-verifier",
        "redirect_uri": REDIRECT_URI,
        "authority": AUTHORITY,
        "client_id": CLIENT_ID,
    })
    .to_string()
}

/// A session manager wired to in-memory collaborators
pub struct Harness {
    pub manager: SessionManager,
    pub store: MemoryStore,
    pub navigation: MemoryNavigation,
    pub http: MockHttpClient,
    pub clock: Arc<FixedClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self::at(REDIRECT_URI)
    }

    /// Harness whose current location is `url`
    pub fn at(url: &str) -> Self {
        Self::with_store(url, MemoryStore::new())
    }

    pub fn with_store(url: &str, store: MemoryStore) -> Self {
        let navigation = MemoryNavigation::new(Url::parse(url).unwrap());
        let http = MockHttpClient::new();
        let clock = FixedClock::new();

        let manager = SessionManager::builder()
            .config(config())
            .store(Arc::new(store.clone()))
            .navigation(Arc::new(navigation.clone()))
            .http_client(Arc::new(http.clone()))
            .clock(clock.clone())
            .build()
            .unwrap();

        Self {
            manager,
            store,
            navigation,
            http,
            clock,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn users(&self) -> UserStore {
        UserStore::new(Arc::new(self.store.clone()), AUTHORITY, CLIENT_ID)
    }

    /// Store a signed-in user expiring `expires_in` seconds from now
    pub async fn sign_in(&self, expires_in: Option<i64>) -> User {
        let user = User::new("access-token-1", expires_in, self.now())
            .with_id_token("id-token-1")
            .with_scope(SCOPE)
            .with_profile(Profile {
                sub: "user-42".to_string(),
                name: Some("Bob".to_string()),
                ..Profile::default()
            });
        self.users().store(&user).await.unwrap();
        user
    }

    pub async fn seed_state(&self, id: &str, request_type: &str, age_secs: i64) {
        let created = self.now().timestamp() - age_secs;
        self.store
            .set(&format!("oidc.{}", id), flow_state_json(id, request_type, created))
            .await
            .unwrap();
    }

    /// Query pairs of the last redirect
    pub fn last_redirect_params(&self) -> Vec<(String, String)> {
        self.navigation
            .last_redirect()
            .map(|url| url.query_pairs().into_owned().collect())
            .unwrap_or_default()
    }
}
