// palisade - SIP admission control and routing core
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Credential verification for the three credential-bearing headers.
//!
//! All three share one kernel; they differ only in which password oracle
//! and realm apply. Verification failures are verdicts, never errors — the
//! only `Err` cases are request defects that earn a 400 before any digest
//! arithmetic happens.

use palisade_core::{AuthorizationHeader, Request};
use smol_str::SmolStr;
use tracing::{debug, info};

use crate::digest::{DigestCore, PEER_AUTH_HEADER};
use crate::{UserId, UserOracle, Verdict};

/// Request defects detected before verification; all surface as 400.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Credentials present but no `opaque` field: the challenge cannot be
    /// reconstructed.
    MissingOpaque,
    /// More than one credential header with the same name.
    DuplicateCredentials(&'static str),
    /// GSSAPI scheme offered; not implemented, rejected outright.
    GssapiUnsupported,
}

impl AuthError {
    pub fn status_code(&self) -> u16 {
        400
    }

    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::MissingOpaque => "Authorization should contain opaque",
            AuthError::DuplicateCredentials(_) => "Duplicate credential headers",
            AuthError::GssapiUnsupported => "Authentication scheme not supported",
        }
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingOpaque => write!(f, "credentials missing opaque field"),
            AuthError::DuplicateCredentials(name) => {
                write!(f, "more than one {} header", name)
            }
            AuthError::GssapiUnsupported => write!(f, "GSSAPI authentication not supported"),
        }
    }
}

impl std::error::Error for AuthError {}

/// Which credential header a verification pass reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKind {
    /// `Authorization` (REGISTER / UAS authentication).
    Register,
    /// `Proxy-Authorization` (proxy hop authentication).
    Proxy,
    /// `X-Yxa-Peer-Auth` (peer proxy trust channel).
    Peer,
}

impl AuthKind {
    pub fn header_name(self) -> &'static str {
        match self {
            AuthKind::Register => "Authorization",
            AuthKind::Proxy => "Proxy-Authorization",
            AuthKind::Peer => PEER_AUTH_HEADER,
        }
    }
}

/// Verifies inbound credentials against the stateless digest scheme.
pub struct CredentialsVerifier<U> {
    core: DigestCore,
    oracle: U,
    check_uri: bool,
}

impl<U: UserOracle> CredentialsVerifier<U> {
    pub fn new(core: DigestCore, oracle: U) -> Self {
        Self {
            core,
            oracle,
            check_uri: false,
        }
    }

    /// Enables comparing the credentials `uri` field against the request
    /// URI for Proxy-Authorization (exact-match hardening).
    pub fn with_uri_check(mut self, on: bool) -> Self {
        self.check_uri = on;
        self
    }

    pub fn core(&self) -> &DigestCore {
        &self.core
    }

    pub fn oracle(&self) -> &U {
        &self.oracle
    }

    /// Verifies the `Authorization` header.
    pub fn verify_authorization(&self, request: &Request, now: u64) -> Result<Verdict, AuthError> {
        self.verify_kind(AuthKind::Register, request, now)
    }

    /// Verifies the `Proxy-Authorization` header.
    pub fn verify_proxy_authorization(
        &self,
        request: &Request,
        now: u64,
    ) -> Result<Verdict, AuthError> {
        self.verify_kind(AuthKind::Proxy, request, now)
    }

    /// Verifies the `X-Yxa-Peer-Auth` header.
    pub fn verify_peer_auth(&self, request: &Request, now: u64) -> Result<Verdict, AuthError> {
        self.verify_kind(AuthKind::Peer, request, now)
    }

    /// Composite check for PSTN-bound requests: peer credentials first,
    /// falling through to `Proxy-Authorization` only when the peer header
    /// is absent. A present-but-invalid peer header is terminal.
    pub fn verify_pstn(&self, request: &Request, now: u64) -> Result<Verdict, AuthError> {
        if request.headers().get(PEER_AUTH_HEADER).is_none() {
            return self.verify_kind(AuthKind::Proxy, request, now);
        }
        self.verify_kind(AuthKind::Peer, request, now)
    }

    fn verify_kind(
        &self,
        kind: AuthKind,
        request: &Request,
        now: u64,
    ) -> Result<Verdict, AuthError> {
        let name = kind.header_name();
        let mut values = request.headers().get_all(name);
        let raw = match values.next() {
            Some(raw) => raw,
            None => return Ok(Verdict::Rejected),
        };
        if values.next().is_some() {
            return Err(AuthError::DuplicateCredentials(name));
        }

        let creds = match AuthorizationHeader::parse(raw) {
            Some(creds) => creds,
            None => {
                debug!(header = name, "unparseable credential header");
                return Ok(Verdict::Rejected);
            }
        };
        if creds.scheme.eq_ignore_ascii_case("GSSAPI") {
            return Err(AuthError::GssapiUnsupported);
        }

        let opaque = creds.param("opaque").ok_or(AuthError::MissingOpaque)?.clone();

        let (username, cred_uri, cred_response, cred_nonce) = match (
            creds.param("username"),
            creds.param("uri"),
            creds.param("response"),
            creds.param("nonce"),
        ) {
            (Some(u), Some(i), Some(r), Some(n)) => (u.clone(), i.clone(), r.clone(), n.clone()),
            _ => {
                info!(header = name, "credentials missing required fields");
                return Ok(Verdict::Rejected);
            }
        };

        let (user, password, realm): (UserId, Option<SmolStr>, SmolStr) = match kind {
            AuthKind::Peer => {
                let secret = match &self.core.config().peer_secret {
                    Some(secret) => secret.clone(),
                    None => {
                        debug!("peer credentials offered but no peer secret configured");
                        return Ok(Verdict::Rejected);
                    }
                };
                let realm = creds.param("realm").cloned().unwrap_or_default();
                (UserId::new(username.as_str()), Some(secret), realm)
            }
            AuthKind::Register | AuthKind::Proxy => {
                let user = self
                    .oracle
                    .canonify(&username, request.headers())
                    .unwrap_or_else(|| UserId::new(username.as_str()));
                let password = self.oracle.password(&user);
                (user, password, self.core.config().realm.clone())
            }
        };

        if kind == AuthKind::Proxy && self.check_uri {
            let request_uri = request.uri().to_string();
            if cred_uri != request_uri.as_str() {
                info!(
                    offered = %cred_uri,
                    requested = %request_uri,
                    "Proxy-Authorization uri mismatch"
                );
                return Ok(Verdict::Rejected);
            }
        }

        let nonce_expected = self.core.make_nonce(&opaque);
        // The response is computed over the username as received: that is
        // the string the client hashed, canonical or not.
        let response_expected = match DigestCore::compute_response(
            &nonce_expected,
            request.method(),
            &cred_uri,
            &username,
            password.as_deref(),
            &realm,
        ) {
            Some(expected) => expected,
            None => {
                info!(username = %username, "unknown user, rejecting credentials");
                return Ok(Verdict::Rejected);
            }
        };

        if cred_response != response_expected.as_str() {
            info!(user = %user, "digest response mismatch");
            return Ok(Verdict::Rejected);
        }
        if cred_nonce != nonce_expected {
            info!(user = %user, "nonce mismatch");
            return Ok(Verdict::Rejected);
        }

        let timestamp = match u32::from_str_radix(&opaque, 16) {
            Ok(ts) => u64::from(ts),
            Err(_) => {
                info!(user = %user, opaque = %opaque, "opaque is not a hex timestamp");
                return Ok(Verdict::Rejected);
            }
        };

        if now > timestamp + self.core.config().freshness_window {
            debug!(user = %user, age = now - timestamp, "credentials stale");
            return Ok(Verdict::Stale(user));
        }
        if timestamp > now {
            info!(user = %user, "credentials timestamp is in the future");
            return Ok(Verdict::Rejected);
        }

        Ok(match kind {
            AuthKind::Peer => Verdict::PeerAuthenticated(user),
            _ => Verdict::Authenticated(user),
        })
    }
}
