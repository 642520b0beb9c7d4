// palisade - SIP admission control and routing core
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Presence event package state handling (RFC 3856 / RFC 3903).
//!
//! [`EventStateCompositor`] is the server-side PUBLISH/NOTIFY processor:
//! it owns the entity-tag lifecycle (mint on create, rotate on refresh,
//! die on expiry or zero-expires refresh), clamps publication lifetimes to
//! the configured window, and synthesizes NOTIFY bodies for subscribers.
//!
//! Authentication happens before requests reach this crate; handlers take
//! the already-resolved user as an argument.

pub mod etag;
pub mod store;

use bytes::Bytes;
use chrono::Utc;
use palisade_core::{reply_to, Request, Response, SipIfMatchHeader};
use smol_str::SmolStr;
use tracing::{debug, info};

use anyhow::Result;

pub use etag::EtagGenerator;
pub use store::{MemoryPidfStore, PidfStore, Publication, SetError};

/// Canonical user identifier, mirrored from the auth layer.
pub type UserId = SmolStr;

/// Process-wide presence configuration.
#[derive(Debug, Clone)]
pub struct PresenceConfig {
    /// Smallest publication lifetime granted (seconds).
    pub min_publish: u64,
    /// Largest publication lifetime granted (seconds).
    pub max_publish: u64,
    /// Lifetime granted when the client sends no Expires.
    pub default_publish: u64,
    /// Node name baked into generated entity tags.
    pub node_name: SmolStr,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            min_publish: 60,
            max_publish: 86400,
            default_publish: 3600,
            node_name: SmolStr::new("palisade"),
        }
    }
}

impl PresenceConfig {
    pub fn new(node_name: impl Into<SmolStr>) -> Self {
        Self {
            node_name: node_name.into(),
            ..Self::default()
        }
    }

    pub fn with_min_publish(mut self, seconds: u64) -> Self {
        self.min_publish = seconds;
        self
    }

    pub fn with_max_publish(mut self, seconds: u64) -> Self {
        self.max_publish = seconds;
        self
    }

    pub fn with_default_publish(mut self, seconds: u64) -> Self {
        self.default_publish = seconds;
        self
    }
}

/// Whose presence a subscription targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Presentity {
    /// Resolved to concrete users.
    Users(Vec<UserId>),
    /// Still in address form; requires later promotion.
    Address(SmolStr),
}

/// Subscription admission outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeAdmission {
    /// No authenticated user yet; the dispatcher must challenge.
    NeedAuth,
    /// Subscription accepted and active (200).
    Active,
    /// Address-form presentity, accepted pending promotion (202).
    Pending,
    /// The subscriber accepts none of our document types (406).
    Unacceptable,
}

impl SubscribeAdmission {
    /// Status code and reason for the subscription response, when one can
    /// be sent without a challenge.
    pub fn status(&self) -> Option<(u16, &'static str)> {
        match self {
            SubscribeAdmission::NeedAuth => None,
            SubscribeAdmission::Active => Some((200, "OK")),
            SubscribeAdmission::Pending => Some((202, "Accepted")),
            SubscribeAdmission::Unacceptable => Some((406, "Not Acceptable")),
        }
    }
}

enum ExpiresOutcome {
    Zero,
    Grant(u64),
    TooBrief,
    Invalid,
}

/// The Event State Compositor for the presence package.
pub struct EventStateCompositor<S> {
    store: S,
    config: PresenceConfig,
    etags: EtagGenerator,
}

impl<S: PidfStore> EventStateCompositor<S> {
    pub fn new(store: S, config: PresenceConfig) -> Self {
        let etags = EtagGenerator::new(config.node_name.clone());
        Self {
            store,
            config,
            etags,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &PresenceConfig {
        &self.config
    }

    /// Handles a PUBLISH request for an authenticated user.
    pub fn handle_publish(&self, user: &UserId, request: &Request, now: u64) -> Result<Response> {
        let if_match: Vec<&SmolStr> = request.headers().get_all("SIP-If-Match").collect();
        if if_match.len() > 1 {
            return self.finish(reply_to(request, 400, "Bad Request - Multiple SIP-If-Match")?);
        }
        let etag = match if_match.first() {
            Some(value) => match SipIfMatchHeader::parse(value) {
                Some(header) => Some(header.value),
                None => {
                    return self
                        .finish(reply_to(request, 400, "Bad Request - Invalid SIP-If-Match")?)
                }
            },
            None => None,
        };

        let expires = match self.requested_expires(request) {
            ExpiresOutcome::Invalid => {
                return self.finish(reply_to(request, 400, "Bad Request - Invalid Expires")?)
            }
            ExpiresOutcome::TooBrief => {
                let mut response = reply_to(request, 423, "Interval Too Brief")?;
                response
                    .headers_mut()
                    .push("Min-Expires", self.config.min_publish.to_string());
                return self.finish(response);
            }
            other => other,
        };

        match etag {
            Some(etag) => self.refresh_publication(user, &etag, expires, request, now),
            None => self.create_publication(user, expires, request, now),
        }
    }

    /// Handles a NOTIFY carrying event state for a presentity, treated as
    /// a fresh publication.
    pub fn handle_notify(
        &self,
        presentity: &UserId,
        request: &Request,
        now: u64,
    ) -> Result<Response> {
        let content_type = match self.single_content_type(request) {
            Some(content_type) => content_type,
            None => {
                return self
                    .finish(reply_to(request, 400, "Bad Request - Exactly one Content-Type")?)
            }
        };
        let granted = match self.requested_expires(request) {
            ExpiresOutcome::Invalid => {
                return self.finish(reply_to(request, 400, "Bad Request - Invalid Expires")?)
            }
            ExpiresOutcome::TooBrief => {
                let mut response = reply_to(request, 423, "Interval Too Brief")?;
                response
                    .headers_mut()
                    .push("Min-Expires", self.config.min_publish.to_string());
                return self.finish(response);
            }
            ExpiresOutcome::Zero => {
                debug!(presentity = %presentity, "NOTIFY with zero expiry, nothing stored");
                let mut response = reply_to(request, 200, "OK")?;
                response.headers_mut().push("Expires", "0");
                return self.finish(response);
            }
            ExpiresOutcome::Grant(seconds) => seconds,
        };

        let etag = self.etags.generate();
        match self.store.set(
            presentity,
            &etag,
            now + granted,
            &content_type,
            request.body(),
            now,
        ) {
            Ok(()) => {
                info!(presentity = %presentity, expires = granted, "stored event state from NOTIFY");
                let mut response = reply_to(request, 200, "OK")?;
                response
                    .headers_mut()
                    .push("Expires", granted.to_string());
                self.finish(response)
            }
            Err(error) => self.store_failure(request, error),
        }
    }

    /// Answers a request for an event method this package does not
    /// implement.
    pub fn handle_unknown(&self, request: &Request) -> Result<Response> {
        self.finish(reply_to(request, 501, "Not Implemented")?)
    }

    /// Admission decision for a presence SUBSCRIBE, authentication having
    /// been resolved (or not) by the event dispatcher.
    pub fn subscribe_admission(
        &self,
        auth_user: Option<&UserId>,
        presentity: &Presentity,
        accept: &[SmolStr],
    ) -> SubscribeAdmission {
        if auth_user.is_none() {
            return SubscribeAdmission::NeedAuth;
        }
        if !accept.is_empty() {
            let supported = self.store.supported();
            let compatible = accept
                .iter()
                .any(|offered| supported.iter().any(|s| s.eq_ignore_ascii_case(offered)));
            if !compatible {
                return SubscribeAdmission::Unacceptable;
            }
        }
        match presentity {
            Presentity::Users(_) => SubscribeAdmission::Active,
            Presentity::Address(_) => SubscribeAdmission::Pending,
        }
    }

    /// Synthesizes the body for an outgoing NOTIFY.
    ///
    /// A single user gets their latest published document, or a synthetic
    /// offline document when nothing is published. Address-form
    /// presentities always get the offline document. Multi-user
    /// presentities produce no body.
    pub fn notify_body(&self, presentity: &Presentity, now: u64) -> Option<(SmolStr, Bytes)> {
        match presentity {
            Presentity::Users(users) => match users.as_slice() {
                [user] => {
                    let accept = self.store.supported();
                    match self.store.get_xml(user, &accept, now) {
                        Some(published) => Some(published),
                        None => Some(offline_document(&format!("pres:{}", user))),
                    }
                }
                _ => None,
            },
            Presentity::Address(address) => Some(offline_document(address)),
        }
    }

    fn refresh_publication(
        &self,
        user: &UserId,
        etag: &SmolStr,
        expires: ExpiresOutcome,
        request: &Request,
        now: u64,
    ) -> Result<Response> {
        // RFC 3903: a conditional PUBLISH refreshes or removes state, it
        // never carries a new document.
        if !request.body().is_empty() {
            return self.finish(reply_to(request, 400, "Bad Request - Refresh must be bodyless")?);
        }

        let (expires_at, granted) = match expires {
            ExpiresOutcome::Zero => (now, 0),
            ExpiresOutcome::Grant(seconds) => (now + seconds, seconds),
            _ => unreachable!("clamped by caller"),
        };

        let new_etag = self.etags.generate();
        if !self.store.refresh(user, etag, expires_at, &new_etag, now) {
            debug!(user = %user, etag = %etag, "no such publication, conditional request failed");
            return self.finish(reply_to(request, 412, "Conditional Request Failed")?);
        }

        info!(user = %user, expires = granted, "publication refreshed");
        let mut response = reply_to(request, 200, "OK")?;
        response.headers_mut().push("SIP-ETag", new_etag);
        response.headers_mut().push("Expires", granted.to_string());
        self.finish(response)
    }

    fn create_publication(
        &self,
        user: &UserId,
        expires: ExpiresOutcome,
        request: &Request,
        now: u64,
    ) -> Result<Response> {
        let content_type = match self.single_content_type(request) {
            Some(content_type) => content_type,
            None => {
                return self
                    .finish(reply_to(request, 400, "Bad Request - Exactly one Content-Type")?)
            }
        };

        let granted = match expires {
            ExpiresOutcome::Zero => {
                // Nothing to publish for zero seconds.
                debug!(user = %user, "initial PUBLISH with zero expiry, nothing stored");
                let mut response = reply_to(request, 200, "OK")?;
                response.headers_mut().push("Expires", "0");
                return self.finish(response);
            }
            ExpiresOutcome::Grant(seconds) => seconds,
            _ => unreachable!("clamped by caller"),
        };

        let etag = self.etags.generate();
        match self
            .store
            .set(user, &etag, now + granted, &content_type, request.body(), now)
        {
            Ok(()) => {
                info!(user = %user, etag = %etag, expires = granted, "publication created");
                let mut response = reply_to(request, 200, "OK")?;
                response.headers_mut().push("SIP-ETag", etag);
                response.headers_mut().push("Expires", granted.to_string());
                self.finish(response)
            }
            Err(error) => self.store_failure(request, error),
        }
    }

    fn store_failure(&self, request: &Request, error: SetError) -> Result<Response> {
        debug!(error = %error, "publication rejected by document store");
        let mut response = match error {
            SetError::UnsupportedContentType => {
                let mut response = reply_to(request, 406, "Not Acceptable")?;
                response.headers_mut().push("Accept", self.accept_list());
                response
            }
            SetError::UnknownContentType => reply_to(request, 406, "Not Acceptable")?,
            SetError::BadXml => {
                let mut response = reply_to(request, 400, "Bad Request - Invalid PIDF body")?;
                response.headers_mut().push("Accept", self.accept_list());
                response
            }
        };
        response.headers_mut().push("Date", Utc::now().to_rfc2822());
        Ok(response)
    }

    fn finish(&self, mut response: Response) -> Result<Response> {
        response.headers_mut().push("Date", Utc::now().to_rfc2822());
        Ok(response)
    }

    fn accept_list(&self) -> String {
        self.store.supported().join(", ")
    }

    fn single_content_type(&self, request: &Request) -> Option<SmolStr> {
        let mut types = request.headers().get_all("Content-Type");
        let first = types.next()?.clone();
        if types.next().is_some() {
            return None;
        }
        Some(first)
    }

    fn requested_expires(&self, request: &Request) -> ExpiresOutcome {
        let value = match request.headers().get("Expires") {
            Some(value) => value,
            None => return ExpiresOutcome::Grant(self.config.default_publish),
        };
        let requested = match value.trim().parse::<u64>() {
            Ok(requested) => requested,
            Err(_) => return ExpiresOutcome::Invalid,
        };
        if requested == 0 {
            ExpiresOutcome::Zero
        } else if requested < self.config.min_publish {
            ExpiresOutcome::TooBrief
        } else {
            ExpiresOutcome::Grant(requested.min(self.config.max_publish))
        }
    }
}

fn offline_document(entity: &str) -> (SmolStr, Bytes) {
    let doc = palisade_core::PidfDocument::offline(entity);
    (
        SmolStr::new(palisade_core::pidf::PIDF_CONTENT_TYPE),
        Bytes::from(doc.to_xml()),
    )
}
