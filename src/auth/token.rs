use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Source of the current time, injectable for deterministic expiry checks
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Profile claims of the signed-in principal
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Subject identifier
    #[serde(default)]
    pub sub: String,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Avatar URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    /// Any other claims returned by the identity service
    #[serde(flatten)]
    pub claims: HashMap<String, Value>,
}

impl Profile {
    /// Build a profile from a claims object, splitting out the well-known fields
    pub fn from_claims(mut claims: HashMap<String, Value>) -> Self {
        let mut take_str = |key: &str| match claims.remove(key) {
            Some(Value::String(s)) => Some(s),
            _ => None,
        };
        let sub = take_str("sub").unwrap_or_default();
        let name = take_str("name");
        let picture = take_str("picture");

        Self {
            sub,
            name,
            picture,
            claims,
        }
    }

    /// Merge claims from another source; values already present win
    pub fn merge(&mut self, other: Profile) {
        if self.sub.is_empty() {
            self.sub = other.sub;
        }
        if self.name.is_none() {
            self.name = other.name;
        }
        if self.picture.is_none() {
            self.picture = other.picture;
        }
        for (key, value) in other.claims {
            self.claims.entry(key).or_insert(value);
        }
    }
}

/// The authenticated principal's token record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Opaque bearer token for API requests
    pub access_token: String,
    /// ID token, forwarded as a hint on sign-out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub scope: String,
    /// Absolute expiry as seconds since the Unix epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub profile: Profile,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl User {
    /// Create a user record; `expires_in_secs` is relative to `now`
    pub fn new(access_token: impl Into<String>, expires_in_secs: Option<i64>, now: DateTime<Utc>) -> Self {
        Self {
            access_token: access_token.into(),
            id_token: None,
            token_type: default_token_type(),
            scope: String::new(),
            expires_at: expires_in_secs.map(|secs| now.timestamp() + secs),
            profile: Profile::default(),
        }
    }

    #[must_use]
    pub fn with_id_token(mut self, id_token: impl Into<String>) -> Self {
        self.id_token = Some(id_token.into());
        self
    }

    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    #[must_use]
    pub fn with_profile(mut self, profile: Profile) -> Self {
        self.profile = profile;
        self
    }

    /// Seconds remaining until expiry, if the expiry is known
    pub fn expires_in(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expires_at.map(|exp| exp - now.timestamp())
    }

    /// Whether the token is past its expiry; unknown expiry is never expired
    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_in(now).map_or(false, |secs| secs <= 0)
    }

    /// Expiry as a timestamp
    pub fn expiration(&self) -> Option<DateTime<Utc>> {
        self.expires_at
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
    }
}

/// Payload delivered to expiring-session subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionExpiring {
    /// Seconds left before the token expires (0 when there is no valid user)
    pub remaining_time: u64,
}

/// Logical session lifecycle, recomputed from the store on demand
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No user is stored
    Unauthenticated,
    /// A callback is being completed during `initialize`
    Authenticating,
    /// A user is stored and outside the safety margin
    Authenticated,
    /// A user is stored but inside the safety margin
    Expiring { remaining_time: u64 },
    /// The stored token is past its expiry
    Expired,
}
