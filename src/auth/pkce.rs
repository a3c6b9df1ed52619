use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Random bytes behind a verifier; encodes to 64 characters
const VERIFIER_BYTES: usize = 48;
/// Random bytes behind a flow id; encodes to 22 characters
const FLOW_ID_BYTES: usize = 16;

/// Verifier kept in the `si:r` flow record, challenge sent on the authorize URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

impl Pkce {
    pub fn new() -> Self {
        Self::from_verifier(random_token::<VERIFIER_BYTES>())
    }

    /// S256: `BASE64URL(SHA256(verifier))`
    pub fn from_verifier(verifier: String) -> Self {
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }

    pub fn method(&self) -> &'static str {
        "S256"
    }
}

impl Default for Pkce {
    fn default() -> Self {
        Self::new()
    }
}

/// Fresh id for a flow record. Sent as `state` and stored under `oidc.<id>`.
pub fn new_flow_id() -> String {
    random_token::<FLOW_ID_BYTES>()
}

fn random_token<const N: usize>() -> String {
    let mut bytes = [0u8; N];
    rand::rng().fill(&mut bytes[..]);
    URL_SAFE_NO_PAD.encode(bytes)
}
