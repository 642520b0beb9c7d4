// palisade - SIP admission control and routing core
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Cross-proxy validation: a challenge minted by one proxy must verify on
//! any other proxy sharing the secret, with no shared state.

use bytes::Bytes;
use palisade_auth::{
    AuthConfig, CredentialsVerifier, DigestCore, MemoryUserDb, UserId, Verdict,
};
use palisade_core::{Headers, Method, Request, RequestLine, SipUri};

const NOW: u64 = 11_000_000;

fn config() -> AuthConfig {
    AuthConfig::new("zecret").with_realm("yxa-test")
}

fn users() -> MemoryUserDb {
    let mut users = MemoryUserDb::new();
    users.add_user("canon-user", "foo");
    users.add_alias("ft.test", "canon-user");
    users
}

fn invite_with_credentials(core: &DigestCore, minted_at: u64) -> Request {
    let challenge = core.challenge_at(minted_at);
    let response = DigestCore::compute_response(
        &challenge.nonce,
        &Method::Invite,
        "sip:ft@example.org",
        "ft.test",
        Some("foo"),
        "yxa-test",
    )
    .expect("password present");
    let value = DigestCore::format_auth_header(
        "Digest",
        "ft.test",
        "yxa-test",
        "sip:ft@example.org",
        &response,
        &challenge.nonce,
        &challenge.opaque,
        "md5",
    );

    let mut headers = Headers::new();
    headers.push("Authorization", value);
    Request::new(
        RequestLine::new(Method::Invite, SipUri::parse("sip:ft@example.org").unwrap()),
        headers,
        Bytes::new(),
    )
}

#[test]
fn challenge_from_one_proxy_verifies_on_another() {
    // Proxy A mints the challenge the client answers.
    let proxy_a = DigestCore::new(config());
    let request = invite_with_credentials(&proxy_a, NOW);

    // Proxy B has never seen the challenge, only the shared secret.
    let proxy_b = CredentialsVerifier::new(DigestCore::new(config()), users());
    assert_eq!(
        proxy_b.verify_authorization(&request, NOW),
        Ok(Verdict::Authenticated(UserId::new("canon-user")))
    );
}

#[test]
fn different_secret_never_validates() {
    let proxy_a = DigestCore::new(config());
    let request = invite_with_credentials(&proxy_a, NOW);

    let other = CredentialsVerifier::new(
        DigestCore::new(AuthConfig::new("different").with_realm("yxa-test")),
        users(),
    );
    assert_eq!(
        other.verify_authorization(&request, NOW),
        Ok(Verdict::Rejected)
    );
}

#[test]
fn freshness_window_edges() {
    let proxy = CredentialsVerifier::new(DigestCore::new(config()), users());
    let request = invite_with_credentials(proxy.core(), NOW);

    for (now, expected) in [
        (NOW, Verdict::Authenticated(UserId::new("canon-user"))),
        (NOW + 30, Verdict::Authenticated(UserId::new("canon-user"))),
        (NOW + 31, Verdict::Stale(UserId::new("canon-user"))),
        (NOW - 1, Verdict::Rejected),
    ] {
        assert_eq!(
            proxy.verify_authorization(&request, now),
            Ok(expected),
            "at now={}",
            now
        );
    }
}
