// palisade - SIP admission control and routing core
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Request routing: one parsed request in, one decision out.
//!
//! The engine maps every request to either a finished [`Response`] (a
//! challenge, a rejection, OPTIONS 200) or a [`RoutingDecision`] the
//! forwarding engine executes. It owns no transport and no transaction
//! state; everything it needs beyond the request comes from the admission
//! controller and the location oracles.

pub mod engine;

use anyhow::Result;
use palisade_auth::UserId;
use palisade_core::{Request, Response, SipUri};
use smol_str::SmolStr;

pub use engine::{is_request_to_me, RoutingEngine};

/// Where a request should go. Closed set; the forwarding engine consumes
/// everything except `Me`, which the routing engine answers itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingDecision {
    /// The request targets this proxy itself.
    Me,
    /// Proxy to the given URI without further authentication.
    Proxy(SipUri),
    /// Relay to the given URI; relaying demands fresh hop credentials.
    Relay(SipUri),
    /// Answer 302 with the given Contact.
    Redirect(SipUri),
    /// Proxy to the original request URI through host:port (loose route).
    Forward(SmolStr, u16),
    /// Answer with this status.
    Respond(u16, SmolStr),
    /// Internal failure with this status code.
    Error(u16),
    /// No route at all; answered 404.
    NotFound,
}

/// Result of a single location lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupResult {
    /// A routing decision for the target.
    Found(RoutingDecision),
    /// The user exists but has no current registration.
    NoRegistration,
    /// The URI does not belong to a known user.
    NoSuchUser,
}

/// Location and number-plan oracles backing destination resolution.
pub trait LocationOracle: Send + Sync {
    /// Looks up registered locations for a homedomain user URI.
    fn lookup_user(&self, uri: &SipUri) -> Result<LookupResult>;
    /// Secondary homedomain address lookup (aliases, forwards).
    fn lookup_homedomain_url(&self, uri: &SipUri) -> Result<Option<RoutingDecision>>;
    /// Last-resort interpretation of the user part as a telephone number.
    fn lookup_potn(&self, user: &str) -> Result<Option<RoutingDecision>>;
    /// Lookup for request URIs in foreign domains.
    fn lookup_remote_url(&self, uri: &SipUri) -> Result<Option<RoutingDecision>>;
    /// Fallback when every other lookup came up empty.
    fn lookup_default(&self, uri: &SipUri) -> Result<RoutingDecision>;
}

/// The registrar service invoked once REGISTER admission has passed.
pub trait RegistrarService: Send + Sync {
    /// Binds the request's Contact headers for the canonical user and
    /// produces the REGISTER response.
    fn register(&self, user: &UserId, contacts: &[SmolStr], request: &Request)
        -> Result<Response>;
}

/// What the engine hands back to the transaction layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// Send this response; the request goes no further.
    Respond(Response),
    /// Hand the (possibly rewritten) request to the forwarding engine.
    Decision(RoutingDecision),
    /// Forward statelessly via the transport layer (ACK).
    StatelessForward(SipUri),
}

/// Process-wide routing configuration.
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    /// Domains this proxy is authoritative for.
    pub homedomains: Vec<SmolStr>,
    /// Require proxy authentication for requests with a homedomain From.
    pub always_verify_homedomain_user: bool,
    /// Insert a Record-Route header on proxied and relayed requests.
    pub record_route: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            homedomains: Vec::new(),
            always_verify_homedomain_user: true,
            record_route: false,
        }
    }
}

impl RoutingConfig {
    pub fn new(homedomains: Vec<SmolStr>) -> Self {
        Self {
            homedomains,
            ..Self::default()
        }
    }

    pub fn with_always_verify_homedomain_user(mut self, on: bool) -> Self {
        self.always_verify_homedomain_user = on;
        self
    }

    pub fn with_record_route(mut self, on: bool) -> Self {
        self.record_route = on;
        self
    }

    /// Whether this proxy is authoritative for `host`.
    pub fn is_homedomain(&self, host: &str) -> bool {
        self.homedomains
            .iter()
            .any(|domain| domain.eq_ignore_ascii_case(host))
    }
}
