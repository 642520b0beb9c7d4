// palisade - SIP admission control and routing core
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The routing decision tree.

use anyhow::Result;
use palisade_auth::{
    challenge_response_at, ChallengeKind, DigestCore, UserId, UserOracle, Verdict,
};
use palisade_core::{
    addr_uri, decremented_max_forwards, reply_to, Headers, Method, Request, SipUri,
};
use palisade_policy::{
    can_use_address, AddressUse, AdmissionController, AdmissionError, DenyReason,
    DirectoryOracle, PstnVerdict, RegisterAuth,
};
use smol_str::SmolStr;
use tracing::{debug, info, warn};

use crate::{
    LocationOracle, LookupResult, RegistrarService, Routed, RoutingConfig, RoutingDecision,
};

const ALLOWED_METHODS: &str =
    "INVITE, ACK, CANCEL, BYE, OPTIONS, REGISTER, MESSAGE, SUBSCRIBE, NOTIFY, PUBLISH";

/// True when a request is addressed to this proxy itself rather than a
/// resource behind it: the request URI has no user part, or an OPTIONS is
/// about to run out of Max-Forwards here.
pub fn is_request_to_me(method: &Method, uri: &SipUri, headers: &Headers) -> bool {
    if uri.user().is_none() {
        return true;
    }
    method == &Method::Options && matches!(decremented_max_forwards(headers), Ok(n) if n < 1)
}

enum Resolution {
    Done(Routed),
    Decide(RoutingDecision),
}

/// The per-request decision engine.
///
/// Stateless across requests: one call to [`route`](Self::route) per
/// request, producing either a finished response or a routing decision.
pub struct RoutingEngine<U, D, L, R> {
    admission: AdmissionController<U, D>,
    location: L,
    registrar: R,
    config: RoutingConfig,
}

impl<U, D, L, R> RoutingEngine<U, D, L, R>
where
    U: UserOracle,
    D: DirectoryOracle,
    L: LocationOracle,
    R: RegistrarService,
{
    pub fn new(
        admission: AdmissionController<U, D>,
        location: L,
        registrar: R,
        config: RoutingConfig,
    ) -> Self {
        Self {
            admission,
            location,
            registrar,
            config,
        }
    }

    pub fn admission(&self) -> &AdmissionController<U, D> {
        &self.admission
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    fn digest(&self) -> &DigestCore {
        self.admission.verifier().core()
    }

    /// Routes one request. May rewrite the request headers (Route,
    /// Record-Route, peer credentials) when the outcome is a forwarding
    /// decision.
    pub fn route(&self, request: &mut Request, now: u64) -> Result<Routed> {
        match request.method() {
            Method::Register if self.config.is_homedomain(request.uri().host()) => {
                self.route_register(request, now)
            }
            Method::Ack => {
                debug!(uri = %request.uri(), "forwarding ACK statelessly");
                Ok(Routed::StatelessForward(request.uri().clone()))
            }
            _ => self.route_general(request, now),
        }
    }

    fn route_register(&self, request: &mut Request, now: u64) -> Result<Routed> {
        // A REGISTER should never carry routing state into the location
        // database.
        request.headers_mut().remove_all("Record-Route");

        let to_url = match request.headers().get("To").and_then(|v| addr_uri(v)) {
            Some(url) => url,
            None => {
                return Ok(Routed::Respond(reply_to(
                    request,
                    400,
                    "Bad Request - Invalid To header",
                )?))
            }
        };

        let had_credentials = request.headers().get("Authorization").is_some();

        match self.admission.can_register(request, &to_url, now) {
            Ok(RegisterAuth::Allowed(user)) => {
                let contacts: Vec<SmolStr> =
                    request.headers().get_all("Contact").cloned().collect();
                match self.registrar.register(&user, &contacts, request) {
                    Ok(response) => {
                        info!(user = %user, aor = %to_url, "REGISTER accepted");
                        Ok(Routed::Respond(response))
                    }
                    Err(e) => {
                        warn!(user = %user, error = %e, "registrar failure");
                        Ok(Routed::Respond(reply_to(
                            request,
                            500,
                            "Server Internal Error",
                        )?))
                    }
                }
            }
            Ok(RegisterAuth::Stale(user)) => {
                info!(user = %user, "stale REGISTER credentials, re-challenging");
                Ok(Routed::Respond(challenge_response_at(
                    self.digest(),
                    ChallengeKind::WwwAuthenticate,
                    true,
                    request,
                    now,
                )?))
            }
            Ok(RegisterAuth::Denied {
                user,
                reason: DenyReason::NotOwner,
            }) => {
                info!(user = %user, aor = %to_url, "REGISTER denied, address owned by someone else");
                Ok(Routed::Respond(reply_to(request, 403, "Forbidden")?))
            }
            Ok(RegisterAuth::Denied {
                user,
                reason: DenyReason::NoMatch,
            }) => {
                info!(user = %user, aor = %to_url, "REGISTER denied, address unknown");
                Ok(Routed::Respond(reply_to(request, 404, "Not Found")?))
            }
            Ok(RegisterAuth::NoAuth) => {
                if had_credentials {
                    info!("REGISTER authentication failed, challenging");
                } else {
                    debug!("REGISTER without credentials, challenging");
                }
                Ok(Routed::Respond(challenge_response_at(
                    self.digest(),
                    ChallengeKind::WwwAuthenticate,
                    false,
                    request,
                    now,
                )?))
            }
            Err(e) => self.admission_failure(request, e),
        }
    }

    fn route_general(&self, request: &mut Request, now: u64) -> Result<Routed> {
        let from_url = match request.headers().get("From").and_then(|v| addr_uri(v)) {
            Some(url) => url,
            None => {
                return Ok(Routed::Respond(reply_to(
                    request,
                    400,
                    "Bad Request - Invalid From header",
                )?))
            }
        };

        // CANCEL and BYE target an existing dialog and pass unchallenged.
        let exempt = matches!(request.method(), Method::Cancel | Method::Bye);
        let mut authenticated: Option<UserId> = None;

        if self.config.always_verify_homedomain_user
            && !exempt
            && self.config.is_homedomain(from_url.host())
        {
            match self
                .admission
                .verifier()
                .verify_proxy_authorization(request, now)
            {
                Ok(Verdict::Authenticated(user)) => {
                    match can_use_address(self.admission.directory(), &user, &from_url) {
                        Ok(AddressUse::Ok) => authenticated = Some(user),
                        Ok(AddressUse::NotPermitted(reason)) => {
                            info!(user = %user, from = %from_url, ?reason, "From address not permitted");
                            return Ok(Routed::Respond(reply_to(request, 403, "Forbidden")?));
                        }
                        Err(e) => {
                            warn!(error = %e, "user database failure");
                            return Ok(Routed::Respond(reply_to(
                                request,
                                500,
                                "Server Internal Error",
                            )?));
                        }
                    }
                }
                Ok(Verdict::Stale(user)) => {
                    info!(user = %user, "stale hop credentials, re-challenging");
                    return Ok(Routed::Respond(challenge_response_at(
                        self.digest(),
                        ChallengeKind::ProxyAuthenticate,
                        true,
                        request,
                        now,
                    )?));
                }
                Ok(_) => {
                    debug!(from = %from_url, "homedomain sender not authenticated, challenging");
                    return Ok(Routed::Respond(challenge_response_at(
                        self.digest(),
                        ChallengeKind::ProxyAuthenticate,
                        false,
                        request,
                        now,
                    )?));
                }
                Err(e) => return self.admission_failure(request, e.into()),
            }
        }

        let resolution = if self.config.is_homedomain(request.uri().host()) {
            match self.to_homedomain(request, now) {
                Ok(resolution) => resolution,
                Err(e) => {
                    warn!(error = %e, uri = %request.uri(), "location lookup failure");
                    Resolution::Done(Routed::Respond(reply_to(
                        request,
                        500,
                        "Server Internal Error",
                    )?))
                }
            }
        } else {
            let uri = request.uri().clone();
            match self.to_remote(&uri) {
                Ok(decision) => Resolution::Decide(decision),
                Err(e) => {
                    warn!(error = %e, uri = %uri, "remote lookup failure");
                    Resolution::Done(Routed::Respond(reply_to(
                        request,
                        500,
                        "Server Internal Error",
                    )?))
                }
            }
        };

        match resolution {
            Resolution::Done(routed) => Ok(routed),
            Resolution::Decide(decision) => self.finish(request, decision, authenticated, now),
        }
    }

    /// Destination resolution for request URIs in a homedomain. Recurses
    /// at most once through `lookup_homedomain_url` to break lookup loops.
    fn to_homedomain(&self, request: &mut Request, now: u64) -> Result<Resolution> {
        let mut uri = request.uri().clone();
        let mut recursed = false;

        loop {
            if is_request_to_me(request.method(), &uri, request.headers()) {
                return Ok(Resolution::Decide(RoutingDecision::Me));
            }

            match self.location.lookup_user(&uri)? {
                LookupResult::Found(decision) => return Ok(Resolution::Decide(decision)),
                LookupResult::NoRegistration => {
                    return Ok(Resolution::Decide(RoutingDecision::Respond(
                        480,
                        SmolStr::new("Users location currently unknown"),
                    )))
                }
                LookupResult::NoSuchUser => {}
            }

            match self.location.lookup_homedomain_url(&uri)? {
                Some(RoutingDecision::Proxy(new_url))
                    if !recursed && self.config.is_homedomain(new_url.host()) =>
                {
                    debug!(from = %uri, to = %new_url, "following homedomain address lookup");
                    uri = new_url;
                    recursed = true;
                    continue;
                }
                Some(decision) => return Ok(Resolution::Decide(decision)),
                None => {}
            }

            let number = match uri.user() {
                Some(number) => SmolStr::new(number),
                None => return Ok(Resolution::Decide(self.location.lookup_default(&uri)?)),
            };
            if let Some(decision) = self.location.lookup_potn(&number)? {
                return self.admit_pstn(request, &uri, &number, decision, now);
            }

            return Ok(Resolution::Decide(self.location.lookup_default(&uri)?));
        }
    }

    /// Destination resolution for foreign request URIs. A URI some user is
    /// currently registered at is proxied directly; anything else is a
    /// relay, which [`finish`](Self::finish) gates on hop credentials.
    fn to_remote(&self, uri: &SipUri) -> Result<RoutingDecision> {
        if let Some(decision) = self.location.lookup_remote_url(uri)? {
            return Ok(decision);
        }
        match self.admission.directory().user_with_contact(uri)? {
            Some(user) => {
                debug!(user = %user, uri = %uri, "request URI is a registered contact, proxying");
                Ok(RoutingDecision::Proxy(uri.clone()))
            }
            None => Ok(RoutingDecision::Relay(uri.clone())),
        }
    }

    /// Gate for decisions that leave towards the telephone network.
    fn admit_pstn(
        &self,
        request: &mut Request,
        uri: &SipUri,
        number: &str,
        decision: RoutingDecision,
        now: u64,
    ) -> Result<Resolution> {
        let from_url = match request.headers().get("From").and_then(|v| addr_uri(v)) {
            Some(url) => url,
            None => {
                return Ok(Resolution::Done(Routed::Respond(reply_to(
                    request,
                    400,
                    "Bad Request - Invalid From header",
                )?)))
            }
        };

        match self
            .admission
            .pstn_call_check_auth(request, &from_url, Some(number), now)
        {
            Ok(PstnVerdict::Allowed { user, class }) => {
                debug!(class = %class, number = number, "PSTN destination admitted");
                if let (Some(user), Some(secret)) =
                    (user, self.digest().config().peer_secret.clone())
                {
                    // Vouch for the caller towards the gateway proxy.
                    let target = uri.to_string();
                    let method = request.method().clone();
                    self.admission.add_peer_auth(
                        &method,
                        &target,
                        request.headers_mut(),
                        &user,
                        &secret,
                        now,
                    );
                }
                Ok(Resolution::Decide(decision))
            }
            Ok(PstnVerdict::Stale { user, class }) => {
                info!(user = %user, class = %class, "stale PSTN credentials, re-challenging");
                Ok(Resolution::Done(Routed::Respond(challenge_response_at(
                    self.digest(),
                    ChallengeKind::ProxyAuthenticate,
                    true,
                    request,
                    now,
                )?)))
            }
            Ok(PstnVerdict::Denied { user: None, class }) => {
                debug!(class = %class, "unauthenticated PSTN call, challenging");
                Ok(Resolution::Done(Routed::Respond(challenge_response_at(
                    self.digest(),
                    ChallengeKind::ProxyAuthenticate,
                    false,
                    request,
                    now,
                )?)))
            }
            Ok(PstnVerdict::Denied {
                user: Some(user),
                class,
            }) => {
                info!(user = %user, class = %class, number = number, "PSTN call denied");
                Ok(Resolution::Done(Routed::Respond(reply_to(
                    request,
                    403,
                    "Forbidden",
                )?)))
            }
            Err(e) => {
                let routed = self.admission_failure(request, e)?;
                Ok(Resolution::Done(routed))
            }
        }
    }

    /// Turns a routing decision into the final engine output, enforcing
    /// relay credentials and rewriting forwarding headers.
    fn finish(
        &self,
        request: &mut Request,
        decision: RoutingDecision,
        authenticated: Option<UserId>,
        now: u64,
    ) -> Result<Routed> {
        match decision {
            RoutingDecision::Me => match request.method() {
                Method::Options => {
                    let mut response = reply_to(request, 200, "OK")?;
                    response.headers_mut().push("Allow", ALLOWED_METHODS);
                    Ok(Routed::Respond(response))
                }
                _ => {
                    // This proxy keeps no dialog state.
                    Ok(Routed::Respond(reply_to(
                        request,
                        481,
                        "Call/Transaction Does Not Exist",
                    )?))
                }
            },
            RoutingDecision::Redirect(contact) => {
                let mut response = reply_to(request, 302, "Moved Temporarily")?;
                response
                    .headers_mut()
                    .push("Contact", format!("<{}>", contact));
                Ok(Routed::Respond(response))
            }
            RoutingDecision::Respond(code, reason) => {
                Ok(Routed::Respond(reply_to(request, code, &reason)?))
            }
            RoutingDecision::Error(code) => {
                Ok(Routed::Respond(reply_to(request, code, "Server Internal Error")?))
            }
            RoutingDecision::NotFound => {
                Ok(Routed::Respond(reply_to(request, 404, "Not Found")?))
            }
            RoutingDecision::Relay(uri) => {
                let exempt = matches!(request.method(), Method::Cancel | Method::Bye);
                if !exempt && authenticated.is_none() {
                    match self
                        .admission
                        .verifier()
                        .verify_proxy_authorization(request, now)
                    {
                        Ok(Verdict::Authenticated(user)) => {
                            debug!(user = %user, uri = %uri, "relay authorized");
                        }
                        Ok(Verdict::Stale(_)) => {
                            return Ok(Routed::Respond(challenge_response_at(
                                self.digest(),
                                ChallengeKind::ProxyAuthenticate,
                                true,
                                request,
                                now,
                            )?))
                        }
                        Ok(_) => {
                            debug!(uri = %uri, "relay without credentials, challenging");
                            return Ok(Routed::Respond(challenge_response_at(
                                self.digest(),
                                ChallengeKind::ProxyAuthenticate,
                                false,
                                request,
                                now,
                            )?));
                        }
                        Err(e) => return self.admission_failure(request, e.into()),
                    }
                }
                self.prepare_forward(request);
                Ok(Routed::Decision(RoutingDecision::Relay(uri)))
            }
            RoutingDecision::Proxy(uri) => {
                self.prepare_forward(request);
                Ok(Routed::Decision(RoutingDecision::Proxy(uri)))
            }
            RoutingDecision::Forward(host, port) => {
                // Loose route through host:port, keeping the original
                // request URI as the target.
                request
                    .headers_mut()
                    .push_front("Route", format!("<sip:{}:{};lr>", host, port));
                self.prepare_forward(request);
                Ok(Routed::Decision(RoutingDecision::Forward(host, port)))
            }
        }
    }

    fn prepare_forward(&self, request: &mut Request) {
        if !self.config.record_route {
            return;
        }
        if let Some(domain) = self.config.homedomains.first() {
            request
                .headers_mut()
                .push_front("Record-Route", format!("<sip:{};lr>", domain));
        }
    }

    fn admission_failure(&self, request: &Request, error: AdmissionError) -> Result<Routed> {
        match &error {
            AdmissionError::Auth(e) => info!(error = %e, "rejecting defective credentials"),
            AdmissionError::Oracle(e) => warn!(error = %e, "user database failure"),
        }
        Ok(Routed::Respond(reply_to(
            request,
            error.status_code(),
            error.reason(),
        )?))
    }
}
