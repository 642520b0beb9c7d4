// palisade - SIP admission control and routing core
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Challenge response building and outbound peer-auth injection.

use std::fmt::Write;

use palisade_core::{reply_to, Headers, MessageError, Method, Request, Response};
use tracing::info;

use crate::digest::{digest_response, unix_now, DigestCore, PEER_AUTH_HEADER};

/// Whether a challenge is an end-to-end (401) or hop (407) challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeKind {
    WwwAuthenticate,
    ProxyAuthenticate,
}

impl ChallengeKind {
    fn status(self) -> (u16, &'static str) {
        match self {
            ChallengeKind::WwwAuthenticate => (401, "Unauthorized"),
            ChallengeKind::ProxyAuthenticate => (407, "Proxy Authentication Required"),
        }
    }

    fn header_name(self) -> &'static str {
        match self {
            ChallengeKind::WwwAuthenticate => "WWW-Authenticate",
            ChallengeKind::ProxyAuthenticate => "Proxy-Authenticate",
        }
    }
}

/// Builds a 401/407 challenge response for the given request, with
/// `stale=true` when the client's credentials were valid but aged out.
pub fn challenge_response(
    core: &DigestCore,
    kind: ChallengeKind,
    stale: bool,
    request: &Request,
) -> Result<Response, MessageError> {
    challenge_response_at(core, kind, stale, request, unix_now())
}

/// As [`challenge_response`] with an explicit clock, for tests.
pub fn challenge_response_at(
    core: &DigestCore,
    kind: ChallengeKind,
    stale: bool,
    request: &Request,
    now: u64,
) -> Result<Response, MessageError> {
    let challenge = core.challenge_at(now);
    let (code, reason) = kind.status();

    let mut value = String::new();
    let _ = write!(
        value,
        "Digest realm=\"{}\", nonce=\"{}\", opaque=\"{}\", algorithm=md5",
        challenge.realm, challenge.nonce, challenge.opaque
    );
    if stale {
        value.push_str(", stale=true");
    }

    let mut response = reply_to(request, code, reason)?;
    response.headers_mut().push(kind.header_name(), value);

    let proxy = kind == ChallengeKind::ProxyAuthenticate;
    info!(realm = %challenge.realm, proxy, stale, "issuing digest challenge");
    Ok(response)
}

/// Stamps outgoing headers with `X-Yxa-Peer-Auth` credentials so a peer
/// proxy running the same software accepts this request without
/// challenging the original sender again.
///
/// The challenge is minted against the local clock; the peer validates it
/// against its own, which is why peers sharing a secret must keep their
/// clocks loosely synchronized.
pub fn add_peer_auth(
    core: &DigestCore,
    method: &Method,
    uri: &str,
    headers: &mut Headers,
    user: &str,
    secret: &str,
) {
    add_peer_auth_at(core, method, uri, headers, user, secret, unix_now());
}

/// As [`add_peer_auth`] with an explicit clock, for tests.
pub fn add_peer_auth_at(
    core: &DigestCore,
    method: &Method,
    uri: &str,
    headers: &mut Headers,
    user: &str,
    secret: &str,
    now: u64,
) {
    let challenge = core.challenge_at(now);
    let response = digest_response(&challenge.nonce, method, uri, user, secret, &challenge.realm);
    let value = DigestCore::format_auth_header(
        "Digest",
        user,
        &challenge.realm,
        uri,
        &response,
        &challenge.nonce,
        &challenge.opaque,
        "md5",
    );
    headers.set_or_push(PEER_AUTH_HEADER, value);
}
