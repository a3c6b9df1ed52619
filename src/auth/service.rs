use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::adapters::http_client::{HttpClient, ReqwestHttpClient};
use crate::auth::flow::{AuthorizationFlow, GuestLoginHints, Prompt, SigninArgs, SigninRequest, SignoutRequest};
use crate::auth::navigation::Navigation;
use crate::auth::storage::{MemoryStore, StateStore};
use crate::auth::token::{Clock, SessionExpiring, SessionState, SystemClock, User};
use crate::auth::watcher::{SessionProbe, SessionWatcher, WatchHandle};
use crate::callback_system::{CallbackId, CallbackRegistry};
use crate::config::{SessionConfig, DEFAULT_EXPIRY_MARGIN_SECS, DEFAULT_WATCH_INTERVAL_SECS};
use crate::error::{Result, SessionError};

/// Read access to the current bearer token, handed to collaborators that
/// call authenticated endpoints.
#[async_trait]
pub trait TokenAccessor: Send + Sync {
    /// The access token of a signed-in, unexpired user
    async fn bearer_token(&self) -> Option<String>;
}

/// Builder for [`SessionManager`]
#[derive(Default)]
pub struct SessionManagerBuilder {
    config: Option<SessionConfig>,
    store: Option<Arc<dyn StateStore>>,
    navigation: Option<Arc<dyn Navigation>>,
    http: Option<Arc<dyn HttpClient>>,
    clock: Option<Arc<dyn Clock>>,
}

impl SessionManagerBuilder {
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn navigation(mut self, navigation: Arc<dyn Navigation>) -> Self {
        self.navigation = Some(navigation);
        self
    }

    pub fn http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build the manager. The configuration may be supplied later through
    /// [`SessionManager::set_config`]; the navigation context may not.
    pub fn build(self) -> Result<SessionManager> {
        let navigation = self.navigation.ok_or_else(|| {
            SessionError::Configuration("A navigation context is required".into())
        })?;

        let inner = Inner {
            config: RwLock::new(self.config),
            store: self.store.unwrap_or_else(|| Arc::new(MemoryStore::new())),
            navigation,
            http: self.http.unwrap_or_else(|| Arc::new(ReqwestHttpClient::new())),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            flow: RwLock::new(None),
            initializing: AtomicBool::new(false),
            expiring: CallbackRegistry::with_group("session_expiring"),
            watch: Mutex::new(None),
        };

        Ok(SessionManager {
            inner: Arc::new(inner),
        })
    }
}

struct Inner {
    config: RwLock<Option<SessionConfig>>,
    store: Arc<dyn StateStore>,
    navigation: Arc<dyn Navigation>,
    http: Arc<dyn HttpClient>,
    clock: Arc<dyn Clock>,
    /// Present once `initialize` has run
    flow: RwLock<Option<Arc<AuthorizationFlow>>>,
    /// Set while a pending callback is being exchanged
    initializing: AtomicBool,
    expiring: CallbackRegistry<SessionExpiring>,
    watch: Mutex<Option<WatchHandle>>,
}

impl Inner {
    fn flow(&self) -> Option<Arc<AuthorizationFlow>> {
        self.flow.read().clone()
    }

    fn expiry_margin(&self) -> i64 {
        self.flow()
            .map(|flow| flow.config().expiry_margin_secs())
            .unwrap_or(DEFAULT_EXPIRY_MARGIN_SECS)
    }

    async fn current_user(&self) -> Result<Option<User>> {
        match self.flow() {
            Some(flow) => flow.users().retrieve().await,
            None => Ok(None),
        }
    }

    async fn check_active(&self) -> Result<bool> {
        let Some(user) = self.current_user().await? else {
            return Ok(false);
        };

        let now = self.clock.now();
        if user.expired(now) {
            return Ok(false);
        }

        Ok(match user.expires_in(now) {
            Some(remaining) => remaining >= self.expiry_margin(),
            None => true,
        })
    }

    async fn remaining_time(&self) -> u64 {
        match self.current_user().await {
            Ok(Some(user)) => {
                let now = self.clock.now();
                if user.expired(now) {
                    0
                } else {
                    user.expires_in(now).map_or(0, |secs| secs.max(0) as u64)
                }
            }
            Ok(None) => 0,
            Err(e) => {
                debug!(error = %e, "Could not read user for remaining time");
                0
            }
        }
    }
}

/// Probe that does not keep the manager alive
struct ManagerProbe(Weak<Inner>);

#[async_trait]
impl SessionProbe for ManagerProbe {
    async fn check_active(&self) -> Result<bool> {
        match self.0.upgrade() {
            Some(inner) => inner.check_active().await,
            None => Ok(true),
        }
    }

    async fn remaining_time(&self) -> u64 {
        match self.0.upgrade() {
            Some(inner) => inner.remaining_time().await,
            None => 0,
        }
    }
}

/// Facade over the authorization flow, the token store and the session watcher
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn builder() -> SessionManagerBuilder {
        SessionManagerBuilder::default()
    }

    /// Supply or replace the configuration. Only allowed before `initialize`.
    pub fn set_config(&self, config: SessionConfig) -> Result<()> {
        if self.inner.flow.read().is_some() {
            return Err(SessionError::Configuration(
                "Configuration cannot change after initialization".into(),
            ));
        }
        *self.inner.config.write() = Some(config);
        Ok(())
    }

    pub fn config(&self) -> Option<SessionConfig> {
        self.inner.config.read().clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.flow.read().is_some()
    }

    /// Create the flow handler, complete a pending callback at the current
    /// location and purge stale flow state.
    ///
    /// A rejected callback is returned as [`SessionError::Callback`]; the
    /// manager stays initialized so the caller can start a new login.
    pub async fn initialize(&self) -> Result<()> {
        if self.is_initialized() {
            warn!("Session manager already initialized");
            return Ok(());
        }

        let config = self.inner.config.read().clone().ok_or_else(|| {
            SessionError::Configuration("initialize called without a configuration".into())
        })?;

        info!(
            authority = %config.authority(),
            client_id = %config.client_id(),
            "Initializing session manager"
        );

        let flow = Arc::new(AuthorizationFlow::new(
            config,
            Arc::clone(&self.inner.http),
            Arc::clone(&self.inner.store),
            Arc::clone(&self.inner.navigation),
            Arc::clone(&self.inner.clock),
        ));
        *self.inner.flow.write() = Some(Arc::clone(&flow));

        if flow.is_callback() {
            info!("Completing pending authorization callback");
            self.inner.initializing.store(true, Ordering::SeqCst);
            let result = flow.complete_callback().await;
            self.inner.initializing.store(false, Ordering::SeqCst);

            match result {
                Ok(user) => info!(sub = %user.profile.sub, "Signed in from callback"),
                Err(e) => {
                    error!(error = %e, "Authorization callback failed");
                    return Err(e);
                }
            }
        }

        let removed = flow.clear_stale_state().await?;
        if removed > 0 {
            info!(removed, "Removed stale flow state");
        }

        Ok(())
    }

    fn flow(&self) -> Result<Arc<AuthorizationFlow>> {
        self.inner.flow().ok_or(SessionError::NotInitialized)
    }

    /// The stored user, or `None` when not initialized or signed out
    pub async fn get_current_user(&self) -> Result<Option<User>> {
        self.inner.current_user().await
    }

    /// Local, optimistic liveness check against the cached expiry
    pub async fn check_active(&self) -> Result<bool> {
        self.inner.check_active().await
    }

    /// Seconds until the token expires, 0 without a valid user
    pub async fn remaining_time(&self) -> u64 {
        self.inner.remaining_time().await
    }

    pub async fn state(&self) -> Result<SessionState> {
        if self.inner.initializing.load(Ordering::SeqCst) {
            return Ok(SessionState::Authenticating);
        }

        let Some(user) = self.inner.current_user().await? else {
            return Ok(SessionState::Unauthenticated);
        };

        let now = self.inner.clock.now();
        if user.expired(now) {
            return Ok(SessionState::Expired);
        }

        Ok(match user.expires_in(now) {
            Some(remaining) if remaining < self.inner.expiry_margin() => SessionState::Expiring {
                remaining_time: remaining.max(0) as u64,
            },
            _ => SessionState::Authenticated,
        })
    }

    /// Redirect to the authorization endpoint
    pub async fn login(&self, prompt: Option<Prompt>) -> Result<SigninRequest> {
        self.flow()?
            .signin_redirect(SigninArgs {
                prompt,
                extra_query_params: Vec::new(),
            })
            .await
    }

    /// Redirect to the authorization endpoint on the guest path
    pub async fn login_guest(&self, hints: Option<GuestLoginHints>) -> Result<SigninRequest> {
        let hints = hints.unwrap_or_default();
        debug!(?hints, "Starting guest login");

        self.flow()?
            .signin_redirect(SigninArgs {
                prompt: None,
                extra_query_params: hints.query_params(),
            })
            .await
    }

    /// Stop watching, forget the user and redirect to the end-session endpoint
    pub async fn logout(&self, signout_external: Option<bool>) -> Result<SignoutRequest> {
        let flow = self.flow()?;
        self.stop_watching();
        flow.signout_redirect(signout_external).await
    }

    /// Register `on_expiring` and make sure the watcher is running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn watch_session<F>(&self, on_expiring: F) -> CallbackId
    where
        F: Fn(SessionExpiring) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.on_session_expiring(on_expiring);
        self.ensure_watching();
        id
    }

    /// Register an expiration observer without starting the watcher
    pub fn on_session_expiring<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(SessionExpiring) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.expiring.register(callback)
    }

    pub fn remove_session_expiring_callback(&self, id: CallbackId) -> bool {
        self.inner.expiring.unregister(id)
    }

    fn ensure_watching(&self) {
        let mut watch = self.inner.watch.lock();
        if watch.as_ref().is_some_and(WatchHandle::is_running) {
            debug!("Session watcher already running");
            return;
        }

        let interval = self
            .inner
            .config
            .read()
            .as_ref()
            .map(SessionConfig::watch_interval)
            .unwrap_or_else(|| std::time::Duration::from_secs(DEFAULT_WATCH_INTERVAL_SECS));

        let probe: Arc<dyn SessionProbe> = Arc::new(ManagerProbe(Arc::downgrade(&self.inner)));
        let registry = self.inner.expiring.clone();
        let handle = SessionWatcher::new(interval).start(probe, move |event| {
            registry.trigger(event);
        });

        *watch = Some(handle);
    }

    pub fn stop_watching(&self) {
        if let Some(mut handle) = self.inner.watch.lock().take() {
            handle.stop();
        }
    }

    pub fn is_watching(&self) -> bool {
        self.inner
            .watch
            .lock()
            .as_ref()
            .is_some_and(WatchHandle::is_running)
    }

    /// Capability object for collaborators that need the bearer token
    pub fn token_accessor(&self) -> Arc<dyn TokenAccessor> {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl TokenAccessor for SessionManager {
    async fn bearer_token(&self) -> Option<String> {
        match self.inner.current_user().await {
            Ok(Some(user)) if !user.expired(self.inner.clock.now()) => Some(user.access_token),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "Failed to read user for bearer token");
                None
            }
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("initialized", &self.is_initialized())
            .field("watching", &self.is_watching())
            .field("subscribers", &self.inner.expiring.count())
            .finish()
    }
}
