//! Session management for the VERTX platform.
//!
//! [`SessionManager`] drives the OIDC authorization-code flow against the
//! identity service, keeps the signed-in user in a [`StateStore`], and
//! watches the token for imminent expiry. [`ResourceClient`] uses the
//! manager's [`TokenAccessor`] to talk to the resource endpoints.

pub mod adapters;
pub mod auth;
pub mod callback_system;
pub mod config;
pub mod error;
pub mod resources;

#[cfg(test)]
mod tests;

pub use adapters::{HttpClient, MockHttpClient, ReqwestHttpClient, SimpleHttpResponse};
pub use auth::{
    Clock, FileStore, GuestLoginHints, MemoryNavigation, MemoryStore, Navigation, Profile, Prompt,
    ProviderMetadata, SessionExpiring, SessionManager, SessionManagerBuilder, SessionState,
    SigninRequest, SignoutRequest, StateStore, SystemClock, TokenAccessor, User, WatchHandle,
};
pub use callback_system::{CallbackId, CallbackRegistry};
pub use config::SessionConfig;
pub use error::{ErrorKind, Result, SessionError};
pub use resources::{Resource, ResourceClient, ResourceType, Thumbnail};
