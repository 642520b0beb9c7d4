// palisade - SIP admission control and routing core
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Stateless HTTP-Digest authentication for a SIP proxy cluster.
//!
//! Nonces are minted from a hex-encoded timestamp (the `opaque` field) and
//! a cluster-wide shared secret, so every proxy that knows the secret can
//! validate a challenge any of its peers issued — no challenge state is
//! kept anywhere. Freshness comes from the timestamp embedded in `opaque`:
//! credentials older than the configured window verify arithmetically but
//! come back [`Verdict::Stale`], telling the caller to re-challenge with
//! `stale=true`.
//!
//! The same machinery backs the `X-Yxa-Peer-Auth` trust channel between
//! cooperating proxies, keyed off a separate shared secret.
//!
//! # Example
//!
//! ```
//! use palisade_auth::{AuthConfig, CredentialsVerifier, DigestCore, MemoryUserDb};
//!
//! let config = AuthConfig::new("zecret").with_realm("example.org");
//! let mut users = MemoryUserDb::new();
//! users.add_user("alice", "wonderland");
//! let verifier = CredentialsVerifier::new(DigestCore::new(config), users);
//! ```

pub mod challenge;
pub mod digest;
pub mod verify;

use std::collections::HashMap;

use palisade_core::Headers;
use smol_str::SmolStr;

pub use challenge::{add_peer_auth, challenge_response, challenge_response_at, ChallengeKind};
pub use digest::{Challenge, DigestCore, PEER_AUTH_HEADER};
pub use verify::{AuthError, AuthKind, CredentialsVerifier};

/// Canonical user identifier, as produced by the user database.
pub type UserId = SmolStr;

/// Default nonce freshness window in seconds.
pub const FRESHNESS_WINDOW: u64 = 30;

/// Outcome of verifying one set of credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Credentials valid and fresh.
    Authenticated(UserId),
    /// Credentials arithmetically valid but the embedded timestamp aged out.
    Stale(UserId),
    /// Authenticated via the peer-proxy shared secret channel.
    PeerAuthenticated(UserId),
    /// No header, wrong response, unknown user, or future timestamp.
    Rejected,
}

impl Verdict {
    /// Returns the authenticated user, if any.
    pub fn user(&self) -> Option<&UserId> {
        match self {
            Verdict::Authenticated(user)
            | Verdict::Stale(user)
            | Verdict::PeerAuthenticated(user) => Some(user),
            Verdict::Rejected => None,
        }
    }
}

/// Process-wide authentication configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Authentication realm presented in challenges (may be empty).
    pub realm: SmolStr,
    /// Cluster-wide shared secret used to mint nonces.
    pub secret: SmolStr,
    /// Shared secret for the `X-Yxa-Peer-Auth` channel, if configured.
    pub peer_secret: Option<SmolStr>,
    /// Maximum age in seconds of a nonce's embedded timestamp.
    pub freshness_window: u64,
}

impl AuthConfig {
    pub fn new(secret: impl Into<SmolStr>) -> Self {
        Self {
            realm: SmolStr::default(),
            secret: secret.into(),
            peer_secret: None,
            freshness_window: FRESHNESS_WINDOW,
        }
    }

    pub fn with_realm(mut self, realm: impl Into<SmolStr>) -> Self {
        self.realm = realm.into();
        self
    }

    pub fn with_peer_secret(mut self, secret: impl Into<SmolStr>) -> Self {
        self.peer_secret = Some(secret.into());
        self
    }

    pub fn with_freshness_window(mut self, seconds: u64) -> Self {
        self.freshness_window = seconds;
        self
    }
}

/// User database oracle for credential verification.
///
/// `canonify` maps the username offered by the UA (which may be an alias or
/// a number) to the canonical user id; `password` fetches the clear-text
/// password the digest was computed over.
pub trait UserOracle: Send + Sync {
    fn canonify(&self, username: &str, headers: &Headers) -> Option<UserId>;
    fn password(&self, user: &UserId) -> Option<SmolStr>;
}

/// In-memory user database for testing and demos.
#[derive(Debug, Default, Clone)]
pub struct MemoryUserDb {
    passwords: HashMap<UserId, SmolStr>,
    aliases: HashMap<SmolStr, UserId>,
}

impl MemoryUserDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a user with its canonical id and password.
    pub fn add_user(&mut self, user: impl Into<UserId>, password: impl Into<SmolStr>) {
        self.passwords.insert(user.into(), password.into());
    }

    /// Maps an additional username to an existing canonical user.
    pub fn add_alias(&mut self, alias: impl Into<SmolStr>, user: impl Into<UserId>) {
        self.aliases.insert(alias.into(), user.into());
    }
}

impl UserOracle for MemoryUserDb {
    fn canonify(&self, username: &str, _headers: &Headers) -> Option<UserId> {
        if let Some(user) = self.aliases.get(username) {
            return Some(user.clone());
        }
        if self.passwords.contains_key(username) {
            return Some(UserId::new(username));
        }
        None
    }

    fn password(&self, user: &UserId) -> Option<SmolStr> {
        self.passwords.get(user).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_db_canonifies_aliases() {
        let mut db = MemoryUserDb::new();
        db.add_user("ft", "foo");
        db.add_alias("2001", "ft");

        let headers = Headers::new();
        assert_eq!(db.canonify("2001", &headers), Some(UserId::new("ft")));
        assert_eq!(db.canonify("ft", &headers), Some(UserId::new("ft")));
        assert_eq!(db.canonify("nobody", &headers), None);
    }

    #[test]
    fn memory_db_password_lookup() {
        let mut db = MemoryUserDb::new();
        db.add_user("ft", "foo");
        assert_eq!(db.password(&UserId::new("ft")), Some(SmolStr::new("foo")));
        assert_eq!(db.password(&UserId::new("nobody")), None);
    }

    #[test]
    fn verdict_user_extraction() {
        assert_eq!(
            Verdict::Authenticated(UserId::new("ft")).user(),
            Some(&UserId::new("ft"))
        );
        assert_eq!(Verdict::Rejected.user(), None);
    }
}
