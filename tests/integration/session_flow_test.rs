//! Sign-in, reload, resource access and sign-out through the public API
use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde_json::json;
use url::Url;

use vertex_session::{
    FileStore, MemoryNavigation, MemoryStore, MockHttpClient, Navigation, ResourceClient,
    ResourceType, SessionConfig, SessionError, SessionManager, SessionState, StateStore,
};

const AUTHORITY: &str = "https://auth.vertx.test";
const DISCOVERY_URL: &str = "https://auth.vertx.test/.well-known/openid-configuration";
const TOKEN_URL: &str = "https://auth.vertx.test/connect/token";
const REDIRECT_URI: &str = "https://app.vertx.test/";
const RESOURCES_URL: &str = "https://api.vertx.test/core/resource?type=SceneAsset";

fn config() -> Result<SessionConfig> {
    Ok(SessionConfig::builder()
        .authority(AUTHORITY)
        .client_id("explorer")
        .scope("openid profile")
        .redirect_uri(REDIRECT_URI)
        .post_logout_redirect_uri(REDIRECT_URI)
        .build()?
        .with_load_user_info(false))
}

fn mock_identity_service(http: &MockHttpClient) -> Result<()> {
    http.mock_json(
        DISCOVERY_URL,
        200,
        &json!({
            "issuer": AUTHORITY,
            "authorization_endpoint": "https://auth.vertx.test/connect/authorize",
            "token_endpoint": TOKEN_URL,
            "end_session_endpoint": "https://auth.vertx.test/connect/endsession"
        }),
    )?;
    http.mock_json(
        TOKEN_URL,
        200,
        &json!({
            "access_token": "integration-access",
            "id_token": "eyJhbGciOiJub25lIn0.eyJzdWIiOiJ1c2VyLTEiLCJuYW1lIjoiQ2FybCJ9.sig",
            "token_type": "Bearer",
            "expires_in": 3600
        }),
    )?;
    Ok(())
}

fn manager(
    store: Arc<dyn StateStore>,
    navigation: &MemoryNavigation,
    http: &MockHttpClient,
) -> Result<SessionManager> {
    Ok(SessionManager::builder()
        .config(config()?)
        .store(store)
        .navigation(Arc::new(navigation.clone()))
        .http_client(Arc::new(http.clone()))
        .build()?)
}

/// Follow the last redirect back to the app with an authorization code
fn return_from_identity_service(navigation: &MemoryNavigation) -> Result<()> {
    let authorize = navigation
        .last_redirect()
        .ok_or_else(|| anyhow!("login did not redirect"))?;
    let state = authorize
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .ok_or_else(|| anyhow!("authorize URL has no state"))?;

    let mut callback = Url::parse(REDIRECT_URI)?;
    callback
        .query_pairs_mut()
        .append_pair("code", "code-123")
        .append_pair("state", &state);
    navigation.navigate(callback);
    Ok(())
}

#[tokio::test]
async fn test_full_session_lifecycle() -> Result<()> {
    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
    let navigation = MemoryNavigation::new(Url::parse(REDIRECT_URI)?);
    let http = MockHttpClient::new();
    mock_identity_service(&http)?;

    // First page load: signed out, user clicks sign in
    let first = manager(store.clone(), &navigation, &http)?;
    first.initialize().await?;
    assert_eq!(first.state().await?, SessionState::Unauthenticated);
    first.login(None).await?;

    // Identity service redirects back; the app reloads
    return_from_identity_service(&navigation)?;
    let second = manager(store.clone(), &navigation, &http)?;
    second.initialize().await?;

    assert_eq!(navigation.current_url().as_str(), REDIRECT_URI);
    assert_eq!(second.state().await?, SessionState::Authenticated);
    let user = second
        .get_current_user()
        .await?
        .ok_or_else(|| anyhow!("no user after callback"))?;
    assert_eq!(user.profile.name.as_deref(), Some("Carl"));
    assert!(second.check_active().await?);

    // The resource browser picks up the bearer token through the accessor
    http.mock_json(RESOURCES_URL, 200, &json!([]))?;
    let resources = ResourceClient::new(
        Arc::new(http.clone()),
        Url::parse("https://api.vertx.test")?,
        second.token_accessor(),
    );
    assert!(resources
        .list_resources(Some(ResourceType::SceneAsset))
        .await?
        .is_empty());

    let listed = http
        .requests()
        .into_iter()
        .find(|r| r.url == RESOURCES_URL)
        .ok_or_else(|| anyhow!("resource list not requested"))?;
    assert_eq!(
        listed.headers.get("authorization").map(String::as_str),
        Some("Bearer integration-access")
    );

    // Sign out: hint forwarded, session gone, resource calls refused
    let signout = second.logout(None).await?;
    assert_eq!(signout.id_token_hint, user.id_token);
    assert!(second.get_current_user().await?.is_none());

    let err = resources.list_resources(None).await.unwrap_err();
    assert!(matches!(err, SessionError::MissingBearerToken));
    Ok(())
}

#[tokio::test]
async fn test_session_survives_restart_with_file_store() -> Result<()> {
    let path = std::env::temp_dir().join(format!("vertex-session-{}.json", uuid::Uuid::new_v4()));
    let navigation = MemoryNavigation::new(Url::parse(REDIRECT_URI)?);
    let http = MockHttpClient::new();
    mock_identity_service(&http)?;

    {
        let store: Arc<dyn StateStore> = Arc::new(FileStore::open(&path).await?);
        let manager = manager(store, &navigation, &http)?;
        manager.initialize().await?;
        manager.login(None).await?;
    }

    // The pending flow state lives on disk between runs
    return_from_identity_service(&navigation)?;
    {
        let store: Arc<dyn StateStore> = Arc::new(FileStore::open(&path).await?);
        let manager = manager(store, &navigation, &http)?;
        manager.initialize().await?;
        assert!(manager.check_active().await?);
    }

    let store: Arc<dyn StateStore> = Arc::new(FileStore::open(&path).await?);
    let manager = manager(store, &navigation, &http)?;
    manager.initialize().await?;
    let user = manager.get_current_user().await?;
    assert_eq!(user.map(|u| u.access_token).as_deref(), Some("integration-access"));

    let _ = tokio::fs::remove_file(&path).await;
    Ok(())
}

#[tokio::test]
async fn test_replayed_callback_is_rejected() -> Result<()> {
    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
    let navigation = MemoryNavigation::new(Url::parse(REDIRECT_URI)?);
    let http = MockHttpClient::new();
    mock_identity_service(&http)?;

    let first = manager(store.clone(), &navigation, &http)?;
    first.initialize().await?;
    first.login(None).await?;
    return_from_identity_service(&navigation)?;
    let callback = navigation.current_url();

    manager(store.clone(), &navigation, &http)?.initialize().await?;

    // Reloading the original callback URL cannot reuse the consumed state
    navigation.navigate(callback);
    let err = manager(store, &navigation, &http)?
        .initialize()
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Callback(_)));
    Ok(())
}
