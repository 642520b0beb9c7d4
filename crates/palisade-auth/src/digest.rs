// palisade - SIP admission control and routing core
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Digest arithmetic: nonce minting, response computation, header
//! formatting.
//!
//! The algorithm is RFC 2617 `MD5` with qop absent. `qop`, `cnonce`, and
//! `nc` are not part of the computation and are ignored on inbound
//! credentials.

use std::fmt::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use palisade_core::Method;
use smol_str::SmolStr;

use crate::AuthConfig;

/// Private header carrying peer-proxy credentials.
pub const PEER_AUTH_HEADER: &str = "X-Yxa-Peer-Auth";

/// A digest challenge, fully reconstructible from `opaque` plus config.
///
/// `opaque` is the challenge timestamp as eight lowercase hex digits;
/// `nonce` is `MD5(opaque ":" secret)`. No per-user or per-request state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub realm: SmolStr,
    pub nonce: SmolStr,
    pub opaque: SmolStr,
}

/// The digest engine, parameterized only by process-wide config.
#[derive(Debug, Clone)]
pub struct DigestCore {
    config: AuthConfig,
}

impl DigestCore {
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Computes the nonce for a given opaque value.
    ///
    /// Pure function of the argument and the configured shared secret.
    pub fn make_nonce(&self, opaque: &str) -> SmolStr {
        SmolStr::new(md5_hex(
            format!("{}:{}", opaque, self.config.secret).as_bytes(),
        ))
    }

    /// Mints a challenge for the current wall-clock second.
    pub fn new_challenge(&self) -> Challenge {
        self.challenge_at(unix_now())
    }

    /// Mints a challenge for an explicit timestamp (seconds since epoch).
    ///
    /// The timestamp is truncated to 32 bits to match the eight-hex-digit
    /// opaque encoding; this wraps in 2106.
    pub fn challenge_at(&self, now: u64) -> Challenge {
        let opaque = SmolStr::new(format!("{:08x}", now as u32));
        Challenge {
            realm: self.config.realm.clone(),
            nonce: self.make_nonce(&opaque),
            opaque,
        }
    }

    /// Computes the RFC 2617 digest response, or `None` when the password
    /// lookup came back empty (unknown user).
    pub fn compute_response(
        nonce: &str,
        method: &Method,
        uri: &str,
        user: &str,
        password: Option<&str>,
        realm: &str,
    ) -> Option<String> {
        password.map(|password| digest_response(nonce, method, uri, user, password, realm))
    }

    /// Formats a credentials header value in the serialization peers and
    /// clients expect: all values quoted except `algorithm`.
    #[allow(clippy::too_many_arguments)]
    pub fn format_auth_header(
        scheme: &str,
        user: &str,
        realm: &str,
        uri: &str,
        response: &str,
        nonce: &str,
        opaque: &str,
        algorithm: &str,
    ) -> SmolStr {
        let mut value = String::new();
        let _ = write!(
            value,
            "{} username=\"{}\", realm=\"{}\", uri=\"{}\", response=\"{}\", nonce=\"{}\", opaque=\"{}\", algorithm={}",
            scheme, user, realm, uri, response, nonce, opaque, algorithm
        );
        SmolStr::new(value)
    }
}

pub(crate) fn digest_response(
    nonce: &str,
    method: &Method,
    uri: &str,
    user: &str,
    password: &str,
    realm: &str,
) -> String {
    let a1 = md5_hex(format!("{}:{}:{}", user, realm, password).as_bytes());
    let a2 = md5_hex(format!("{}:{}", method.as_str(), uri).as_bytes());
    md5_hex(format!("{}:{}:{}", a1, nonce, a2).as_bytes())
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core() -> DigestCore {
        DigestCore::new(AuthConfig::new("zecret").with_realm("yxa-test"))
    }

    #[test]
    fn nonce_is_deterministic_for_fixed_secret() {
        // MD5("00000000:zecret")
        assert_eq!(
            core().make_nonce("00000000"),
            "acc87f6a2ca28adba3d9fd2313440d1f"
        );
        assert_eq!(core().make_nonce("00000000"), core().make_nonce("00000000"));
    }

    #[test]
    fn nonce_depends_on_secret() {
        let other = DigestCore::new(AuthConfig::new("other").with_realm("yxa-test"));
        assert_ne!(core().make_nonce("00000000"), other.make_nonce("00000000"));
    }

    #[test]
    fn challenge_encodes_timestamp_as_opaque() {
        let challenge = core().challenge_at(11_000_000);
        assert_eq!(challenge.opaque, "00a7d8c0");
        assert_eq!(challenge.nonce, core().make_nonce("00a7d8c0"));
        assert_eq!(challenge.realm, "yxa-test");
    }

    #[test]
    fn response_matches_rfc2617_vector() {
        let nonce = core().make_nonce("00a7d8c0");
        let response = DigestCore::compute_response(
            &nonce,
            &Method::Invite,
            "sip:ft@example.org",
            "ft.test",
            Some("foo"),
            "yxa-test",
        )
        .unwrap();
        assert_eq!(response, "28836f44ae25ebb00c2fcce9281faa8c");
    }

    #[test]
    fn response_is_none_for_missing_password() {
        assert_eq!(
            DigestCore::compute_response(
                "n",
                &Method::Invite,
                "sip:ft@example.org",
                "ft.test",
                None,
                "yxa-test"
            ),
            None
        );
    }

    #[test]
    fn response_is_deterministic() {
        let nonce = core().make_nonce("00a7d8c0");
        let compute = || {
            DigestCore::compute_response(
                &nonce,
                &Method::Invite,
                "sip:ft@example.org",
                "ft.test",
                Some("foo"),
                "yxa-test",
            )
        };
        assert_eq!(compute(), compute());
    }

    #[test]
    fn header_formatting_quotes_all_but_algorithm() {
        let value = DigestCore::format_auth_header(
            "Digest", "ft.test", "yxa-test", "sip:ft@example.org", "R", "N", "O", "md5",
        );
        assert_eq!(
            value,
            r#"Digest username="ft.test", realm="yxa-test", uri="sip:ft@example.org", response="R", nonce="N", opaque="O", algorithm=md5"#
        );
    }
}
