// palisade - SIP admission control and routing core
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The admission controller: digest verdicts composed with address
//! ownership and destination policy.

use palisade_auth::{
    challenge::add_peer_auth_at, AuthError, CredentialsVerifier, UserId, UserOracle, Verdict,
};
use palisade_core::{Headers, Method, Request, SipUri};
use smol_str::SmolStr;
use tracing::{debug, warn};

use crate::{
    can_use_address, is_allowed_pstn_dst, AddressUse, ClassRules, DenyReason, DirectoryOracle,
    PolicyConfig,
};

/// Failures on the admission path that are not policy verdicts.
#[derive(Debug)]
pub enum AdmissionError {
    /// Request defect detected by the verifier; surfaces as 400.
    Auth(AuthError),
    /// An oracle failed; surfaces as 500.
    Oracle(anyhow::Error),
}

impl AdmissionError {
    pub fn status_code(&self) -> u16 {
        match self {
            AdmissionError::Auth(e) => e.status_code(),
            AdmissionError::Oracle(_) => 500,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            AdmissionError::Auth(e) => e.reason(),
            AdmissionError::Oracle(_) => "Server Internal Error",
        }
    }
}

impl std::fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdmissionError::Auth(e) => write!(f, "{}", e),
            AdmissionError::Oracle(e) => write!(f, "user database failure: {}", e),
        }
    }
}

impl std::error::Error for AdmissionError {}

impl From<AuthError> for AdmissionError {
    fn from(e: AuthError) -> Self {
        AdmissionError::Auth(e)
    }
}

impl From<anyhow::Error> for AdmissionError {
    fn from(e: anyhow::Error) -> Self {
        AdmissionError::Oracle(e)
    }
}

/// Outcome of registration admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterAuth {
    /// Authenticated and allowed to bind the address of record.
    Allowed(UserId),
    /// Authenticated but the address of record is not theirs.
    Denied { user: UserId, reason: DenyReason },
    /// Arithmetic holds but the nonce aged out; re-challenge with stale=true.
    Stale(UserId),
    /// No usable credentials.
    NoAuth,
}

/// Outcome of PSTN call admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PstnVerdict {
    /// Call may proceed; `user` is `None` for an unknown caller reaching
    /// an unauthenticated destination class.
    Allowed { user: Option<UserId>, class: SmolStr },
    Denied { user: Option<UserId>, class: SmolStr },
    Stale { user: UserId, class: SmolStr },
}

impl PstnVerdict {
    pub fn class(&self) -> &SmolStr {
        match self {
            PstnVerdict::Allowed { class, .. }
            | PstnVerdict::Denied { class, .. }
            | PstnVerdict::Stale { class, .. } => class,
        }
    }
}

/// Composes the credentials verifier with address ownership and
/// destination policy into per-request admission decisions.
pub struct AdmissionController<U, D> {
    verifier: CredentialsVerifier<U>,
    directory: D,
    config: PolicyConfig,
    classes: ClassRules,
}

impl<U: UserOracle, D: DirectoryOracle> AdmissionController<U, D> {
    /// Builds the controller, compiling the configured class rules.
    pub fn new(
        verifier: CredentialsVerifier<U>,
        directory: D,
        config: PolicyConfig,
    ) -> anyhow::Result<Self> {
        let classes = ClassRules::compile(&config.class_rules)?;
        Ok(Self {
            verifier,
            directory,
            config,
            classes,
        })
    }

    pub fn verifier(&self) -> &CredentialsVerifier<U> {
        &self.verifier
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    pub fn classes(&self) -> &ClassRules {
        &self.classes
    }

    /// Registration admission: verify `Authorization`, then check the user
    /// owns the address of record being bound.
    ///
    /// The ownership check runs against the To URI, not From: third-party
    /// registration is allowed as long as the registering user owns the
    /// address being bound.
    pub fn can_register(
        &self,
        request: &Request,
        to_url: &SipUri,
        now: u64,
    ) -> Result<RegisterAuth, AdmissionError> {
        match self.verifier.verify_authorization(request, now)? {
            Verdict::Authenticated(user) => {
                match can_use_address(&self.directory, &user, to_url)? {
                    AddressUse::Ok => Ok(RegisterAuth::Allowed(user)),
                    AddressUse::NotPermitted(reason) => {
                        debug!(user = %user, to = %to_url, ?reason, "registration denied");
                        Ok(RegisterAuth::Denied { user, reason })
                    }
                }
            }
            Verdict::Stale(user) => Ok(RegisterAuth::Stale(user)),
            _ => Ok(RegisterAuth::NoAuth),
        }
    }

    /// PSTN call admission.
    ///
    /// Destinations in an unauthenticated class skip the digest check, but
    /// a From address that maps to one of our own users must still be
    /// owned by that user. Everything else authenticates via the peer
    /// channel first, then `Proxy-Authorization`.
    pub fn pstn_call_check_auth(
        &self,
        request: &Request,
        from_url: &SipUri,
        to_number: Option<&str>,
        now: u64,
    ) -> Result<PstnVerdict, AdmissionError> {
        let number: Option<SmolStr> = match to_number {
            Some(dialed) => match self.directory.rewrite_potn_to_e164(dialed) {
                Ok(rewritten) => Some(rewritten),
                Err(e) => {
                    warn!(number = dialed, error = %e, "E.164 rewrite failed, using number as dialed");
                    Some(SmolStr::new(dialed))
                }
            },
            None => None,
        };
        let class = self.classes.classify(number.as_deref());

        if self.config.unauth_classes.contains(&class) {
            return match self.directory.user_with_address(from_url)? {
                Some(user) => match can_use_address(&self.directory, &user, from_url)? {
                    AddressUse::Ok => Ok(PstnVerdict::Allowed {
                        user: Some(user),
                        class,
                    }),
                    AddressUse::NotPermitted(reason) => {
                        debug!(user = %user, from = %from_url, ?reason, "unauth-class call denied on From ownership");
                        Ok(PstnVerdict::Denied {
                            user: Some(user),
                            class,
                        })
                    }
                },
                None => Ok(PstnVerdict::Allowed { user: None, class }),
            };
        }

        match self.verifier.verify_pstn(request, now)? {
            Verdict::Rejected => Ok(PstnVerdict::Denied { user: None, class }),
            Verdict::Stale(user) => Ok(PstnVerdict::Stale { user, class }),
            Verdict::PeerAuthenticated(user) => {
                // From ownership is the sending proxy's responsibility;
                // only the destination is checked here.
                let allowed =
                    is_allowed_pstn_dst(&self.directory, &user, request.headers(), &class)?;
                if allowed {
                    Ok(PstnVerdict::Allowed {
                        user: Some(user),
                        class,
                    })
                } else {
                    Ok(PstnVerdict::Denied {
                        user: Some(user),
                        class,
                    })
                }
            }
            Verdict::Authenticated(user) => {
                let owns_from = matches!(
                    can_use_address(&self.directory, &user, from_url)?,
                    AddressUse::Ok
                );
                let dst_allowed =
                    is_allowed_pstn_dst(&self.directory, &user, request.headers(), &class)?;
                if owns_from && dst_allowed {
                    Ok(PstnVerdict::Allowed {
                        user: Some(user),
                        class,
                    })
                } else {
                    debug!(
                        user = %user,
                        owns_from,
                        dst_allowed,
                        class = %class,
                        "PSTN call denied"
                    );
                    Ok(PstnVerdict::Denied {
                        user: Some(user),
                        class,
                    })
                }
            }
        }
    }

    /// Stamps outgoing headers with peer credentials for the next hop.
    pub fn add_peer_auth(
        &self,
        method: &Method,
        uri: &str,
        headers: &mut Headers,
        user: &UserId,
        secret: &str,
        now: u64,
    ) {
        add_peer_auth_at(self.verifier.core(), method, uri, headers, user, secret, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryDirectory;
    use bytes::Bytes;
    use palisade_auth::{AuthConfig, DigestCore, MemoryUserDb};
    use palisade_core::{Method, RequestLine};

    const NOW: u64 = 11_000_000;

    fn uri(s: &str) -> SipUri {
        SipUri::parse(s).unwrap()
    }

    fn controller() -> AdmissionController<MemoryUserDb, MemoryDirectory> {
        let config = AuthConfig::new("zecret")
            .with_realm("yxa-test")
            .with_peer_secret("peer-zecret");
        let mut users = MemoryUserDb::new();
        users.add_user("canon-user", "foo");
        users.add_alias("ft.test", "canon-user");
        let verifier = CredentialsVerifier::new(DigestCore::new(config), users);

        let mut directory = MemoryDirectory::new();
        directory.add_owner(&uri("sip:ft@example.org"), "canon-user");
        directory.add_owner(&uri("sip:boss@example.org"), "boss");
        directory.allow_class("canon-user", "testclass");

        let policy = PolicyConfig::new()
            .with_unauth_classes(vec![SmolStr::new("emergency")])
            .with_class_rules(vec![
                ("^112".to_string(), SmolStr::new("emergency")),
                ("^123".to_string(), SmolStr::new("testclass")),
                ("^00".to_string(), SmolStr::new("external")),
            ]);
        AdmissionController::new(verifier, directory, policy).unwrap()
    }

    fn authorized_request(
        ctl: &AdmissionController<MemoryUserDb, MemoryDirectory>,
        header: &str,
        method: Method,
        uri_str: &str,
    ) -> Request {
        let challenge = ctl.verifier().core().challenge_at(NOW);
        let response = DigestCore::compute_response(
            &challenge.nonce,
            &method,
            uri_str,
            "ft.test",
            Some("foo"),
            "yxa-test",
        )
        .unwrap();
        let value = DigestCore::format_auth_header(
            "Digest",
            "ft.test",
            "yxa-test",
            uri_str,
            &response,
            &challenge.nonce,
            &challenge.opaque,
            "md5",
        );
        let mut headers = Headers::new();
        headers.push(SmolStr::new(header), value);
        Request::new(
            RequestLine::new(method, SipUri::parse(uri_str).unwrap()),
            headers,
            Bytes::new(),
        )
    }

    fn bare_request(method: Method, uri_str: &str) -> Request {
        Request::new(
            RequestLine::new(method, SipUri::parse(uri_str).unwrap()),
            Headers::new(),
            Bytes::new(),
        )
    }

    #[test]
    fn register_without_credentials_is_noauth() {
        let ctl = controller();
        let request = bare_request(Method::Register, "sip:example.org");
        assert_eq!(
            ctl.can_register(&request, &uri("sip:ft@example.org"), NOW)
                .unwrap(),
            RegisterAuth::NoAuth
        );
    }

    #[test]
    fn register_owner_is_allowed() {
        let ctl = controller();
        let request = authorized_request(&ctl, "Authorization", Method::Register, "sip:example.org");
        assert_eq!(
            ctl.can_register(&request, &uri("sip:ft@example.org"), NOW)
                .unwrap(),
            RegisterAuth::Allowed(UserId::new("canon-user"))
        );
    }

    #[test]
    fn register_foreign_aor_is_denied() {
        let ctl = controller();
        let request = authorized_request(&ctl, "Authorization", Method::Register, "sip:example.org");
        assert_eq!(
            ctl.can_register(&request, &uri("sip:boss@example.org"), NOW)
                .unwrap(),
            RegisterAuth::Denied {
                user: UserId::new("canon-user"),
                reason: DenyReason::NotOwner
            }
        );
        assert_eq!(
            ctl.can_register(&request, &uri("sip:nobody@example.org"), NOW)
                .unwrap(),
            RegisterAuth::Denied {
                user: UserId::new("canon-user"),
                reason: DenyReason::NoMatch
            }
        );
    }

    #[test]
    fn register_stale_credentials_reported() {
        let ctl = controller();
        let request = authorized_request(&ctl, "Authorization", Method::Register, "sip:example.org");
        assert_eq!(
            ctl.can_register(&request, &uri("sip:ft@example.org"), NOW + 31)
                .unwrap(),
            RegisterAuth::Stale(UserId::new("canon-user"))
        );
    }

    #[test]
    fn pstn_unauthenticated_caller_is_denied_with_class() {
        let ctl = controller();
        let request = bare_request(Method::Invite, "sip:123456789@example.org");
        assert_eq!(
            ctl.pstn_call_check_auth(
                &request,
                &uri("sip:ft@example.org"),
                Some("123456789"),
                NOW
            )
            .unwrap(),
            PstnVerdict::Denied {
                user: None,
                class: SmolStr::new("testclass")
            }
        );
    }

    #[test]
    fn pstn_authenticated_owner_with_class_is_allowed() {
        let ctl = controller();
        let request = authorized_request(
            &ctl,
            "Proxy-Authorization",
            Method::Invite,
            "sip:123456789@example.org",
        );
        assert_eq!(
            ctl.pstn_call_check_auth(
                &request,
                &uri("sip:ft@example.org"),
                Some("123456789"),
                NOW
            )
            .unwrap(),
            PstnVerdict::Allowed {
                user: Some(UserId::new("canon-user")),
                class: SmolStr::new("testclass")
            }
        );
    }

    #[test]
    fn pstn_wrong_from_address_is_denied() {
        let ctl = controller();
        let request = authorized_request(
            &ctl,
            "Proxy-Authorization",
            Method::Invite,
            "sip:123456789@example.org",
        );
        assert_eq!(
            ctl.pstn_call_check_auth(
                &request,
                &uri("sip:boss@example.org"),
                Some("123456789"),
                NOW
            )
            .unwrap(),
            PstnVerdict::Denied {
                user: Some(UserId::new("canon-user")),
                class: SmolStr::new("testclass")
            }
        );
    }

    #[test]
    fn pstn_class_not_granted_is_denied() {
        let ctl = controller();
        let request = authorized_request(
            &ctl,
            "Proxy-Authorization",
            Method::Invite,
            "sip:0046123@example.org",
        );
        assert_eq!(
            ctl.pstn_call_check_auth(
                &request,
                &uri("sip:ft@example.org"),
                Some("0046123"),
                NOW
            )
            .unwrap(),
            PstnVerdict::Denied {
                user: Some(UserId::new("canon-user")),
                class: SmolStr::new("external")
            }
        );
    }

    #[test]
    fn pstn_route_header_bypasses_class_check() {
        let ctl = controller();
        let mut request = authorized_request(
            &ctl,
            "Proxy-Authorization",
            Method::Invite,
            "sip:0046123@example.org",
        );
        request
            .headers_mut()
            .push("Route", "<sip:gw.example.org;lr>");
        assert_eq!(
            ctl.pstn_call_check_auth(
                &request,
                &uri("sip:ft@example.org"),
                Some("0046123"),
                NOW
            )
            .unwrap(),
            PstnVerdict::Allowed {
                user: Some(UserId::new("canon-user")),
                class: SmolStr::new("external")
            }
        );
    }

    #[test]
    fn pstn_unauth_class_skips_digest_for_unknown_caller() {
        let ctl = controller();
        let request = bare_request(Method::Invite, "sip:112@example.org");
        assert_eq!(
            ctl.pstn_call_check_auth(
                &request,
                &uri("sip:visitor@elsewhere.example"),
                Some("112"),
                NOW
            )
            .unwrap(),
            PstnVerdict::Allowed {
                user: None,
                class: SmolStr::new("emergency")
            }
        );
    }

    #[test]
    fn pstn_unauth_class_still_checks_own_users_from() {
        let ctl = controller();
        // From maps to user "boss"; boss does own sip:boss@example.org.
        let request = bare_request(Method::Invite, "sip:112@example.org");
        assert_eq!(
            ctl.pstn_call_check_auth(&request, &uri("sip:boss@example.org"), Some("112"), NOW)
                .unwrap(),
            PstnVerdict::Allowed {
                user: Some(UserId::new("boss")),
                class: SmolStr::new("emergency")
            }
        );
    }

    #[test]
    fn pstn_stale_credentials_request_rechallenge() {
        let ctl = controller();
        let request = authorized_request(
            &ctl,
            "Proxy-Authorization",
            Method::Invite,
            "sip:123456789@example.org",
        );
        assert_eq!(
            ctl.pstn_call_check_auth(
                &request,
                &uri("sip:ft@example.org"),
                Some("123456789"),
                NOW + 31
            )
            .unwrap(),
            PstnVerdict::Stale {
                user: UserId::new("canon-user"),
                class: SmolStr::new("testclass")
            }
        );
    }

    #[test]
    fn pstn_peer_auth_skips_from_ownership() {
        let ctl = controller();
        let mut headers = Headers::new();
        // Peer proxy vouches for "canon-user"; From ownership is its
        // problem, only the destination class is checked here.
        ctl.add_peer_auth(
            &Method::Invite,
            "sip:123456789@example.org",
            &mut headers,
            &UserId::new("canon-user"),
            "peer-zecret",
            NOW,
        );
        let request = Request::new(
            RequestLine::new(
                Method::Invite,
                SipUri::parse("sip:123456789@example.org").unwrap(),
            ),
            headers,
            Bytes::new(),
        );
        assert_eq!(
            ctl.pstn_call_check_auth(
                &request,
                &uri("sip:boss@example.org"),
                Some("123456789"),
                NOW
            )
            .unwrap(),
            PstnVerdict::Allowed {
                user: Some(UserId::new("canon-user")),
                class: SmolStr::new("testclass")
            }
        );
    }
}
