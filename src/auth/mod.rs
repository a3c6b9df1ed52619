pub mod flow;
pub mod navigation;
pub mod pkce;
pub mod service;
pub mod storage;
pub mod token;
pub mod watcher;

pub use flow::{AuthorizationFlow, GuestLoginHints, Prompt, ProviderMetadata, SigninRequest, SignoutRequest};
pub use navigation::{MemoryNavigation, Navigation};
pub use service::{SessionManager, SessionManagerBuilder, TokenAccessor};
pub use storage::{FileStore, MemoryStore, StateStore, UserStore};
pub use token::{Clock, Profile, SessionExpiring, SessionState, SystemClock, User};
pub use watcher::{SessionProbe, SessionWatcher, WatchHandle, WatcherState};
