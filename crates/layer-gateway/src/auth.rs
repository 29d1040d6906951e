//! Gateway authentication: bearer token to owner id

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Owner used for every request when no API keys are configured
pub const LOCAL_OWNER: &str = "local";

/// One accepted bearer token and the owner it authenticates as
#[derive(Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub token: String,
    pub owner: String,
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKey")
            .field("token", &layer_core::providers::mask_secret(&self.token))
            .field("owner", &self.owner)
            .finish()
    }
}

/// Resolves the caller's owner id from the `Authorization` header.
///
/// With no keys configured, auth is disabled and every caller is
/// [`LOCAL_OWNER`].
#[derive(Debug, Clone, Default)]
pub struct Authenticator {
    keys: Vec<ApiKey>,
}

impl Authenticator {
    pub fn new(keys: Vec<ApiKey>) -> Self {
        let keys = keys
            .into_iter()
            .filter(|k| {
                let usable = !k.token.is_empty() && !k.owner.is_empty();
                if !usable {
                    warn!("Ignoring API key entry with empty token or owner");
                }
                usable
            })
            .collect();
        Self { keys }
    }

    pub fn is_disabled(&self) -> bool {
        self.keys.is_empty()
    }

    /// Owner id for `token`. Every entry is compared so timing does not
    /// reveal which one matched.
    pub fn owner_for(&self, token: &str) -> Option<&str> {
        let mut found = None;
        for key in &self.keys {
            if constant_time_eq(key.token.as_bytes(), token.as_bytes()) && found.is_none() {
                found = Some(key.owner.as_str());
            }
        }
        found
    }

    pub fn authenticate(&self, headers: &HeaderMap) -> Option<String> {
        if self.is_disabled() {
            return Some(LOCAL_OWNER.to_string());
        }
        let token = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(extract_bearer_token);

        match token {
            Some(t) => {
                let owner = self.owner_for(t).map(str::to_string);
                if owner.is_none() {
                    warn!("Gateway auth: unknown bearer token");
                }
                owner
            }
            None => {
                warn!("Gateway auth: no token provided");
                None
            }
        }
    }
}

/// Extract bearer token from an Authorization header value.
///
/// Expects format: `Bearer <token>`
pub fn extract_bearer_token(header_value: &str) -> Option<&str> {
    let trimmed = header_value.trim();
    let token = trimmed.strip_prefix("Bearer ")?.trim();
    if token.is_empty() { None } else { Some(token) }
}

/// Constant-time byte comparison (prevents timing side-channels)
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
