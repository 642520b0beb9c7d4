// palisade - SIP admission control and routing core
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Admission policy: who may claim an address, who may call where.
//!
//! Three concerns compose here:
//! - **Address ownership** — whether an authenticated user may assert a
//!   given From/To address, backed by the user database.
//! - **Destination classes** — PSTN destination numbers are classified by
//!   an ordered regex list, and users carry per-class allow-lists.
//! - **Admission** — [`AdmissionController`] combines both with the digest
//!   verifier's verdicts into the high-level decisions the routing engine
//!   consumes: registration admission and PSTN call admission.

pub mod admission;
pub mod classes;

use std::collections::HashMap;

use anyhow::Result;
use palisade_auth::UserId;
use palisade_core::{Headers, SipUri};
use smol_str::SmolStr;

pub use admission::{AdmissionController, AdmissionError, PstnVerdict, RegisterAuth};
pub use classes::{ClassRules, UNKNOWN_CLASS};

/// Why an address may not be used by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// Nobody owns the address.
    NoMatch,
    /// The address is owned, but not by the caller.
    NotOwner,
}

/// Whether an authenticated user may assert an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressUse {
    Ok,
    NotPermitted(DenyReason),
}

/// Process-wide admission policy configuration.
#[derive(Debug, Clone, Default)]
pub struct PolicyConfig {
    /// Destination classes reachable without authentication.
    pub unauth_classes: Vec<SmolStr>,
    /// Ordered `(regex, class)` pairs classifying destination numbers.
    pub class_rules: Vec<(String, SmolStr)>,
}

impl PolicyConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_unauth_classes(mut self, classes: Vec<SmolStr>) -> Self {
        self.unauth_classes = classes;
        self
    }

    pub fn with_class_rules(mut self, rules: Vec<(String, SmolStr)>) -> Self {
        self.class_rules = rules;
        self
    }
}

/// User database oracle for address ownership and calling policy.
///
/// All methods may reach a backing database and are fallible; failures
/// are contained at the routing boundary and degrade to 500.
pub trait DirectoryOracle: Send + Sync {
    /// All users owning the given address; empty when nobody does.
    fn users_for_url(&self, url: &SipUri) -> Result<Vec<UserId>>;
    /// The single user registered with this address, if any.
    fn user_with_address(&self, url: &SipUri) -> Result<Option<UserId>>;
    /// The user currently registered *at* this contact URI, if any.
    fn user_with_contact(&self, url: &SipUri) -> Result<Option<UserId>>;
    /// Destination classes the user is allowed to call.
    fn classes_for_user(&self, user: &UserId) -> Result<Vec<SmolStr>>;
    /// Normalizes a dialed number to E.164.
    fn rewrite_potn_to_e164(&self, number: &str) -> Result<SmolStr>;
}

/// Decides whether `user` may assert `url` as its own address.
pub fn can_use_address<D: DirectoryOracle>(
    directory: &D,
    user: &UserId,
    url: &SipUri,
) -> Result<AddressUse> {
    let owners = directory.users_for_url(url)?;
    if owners.is_empty() {
        return Ok(AddressUse::NotPermitted(DenyReason::NoMatch));
    }
    if owners.iter().any(|owner| owner == user) {
        Ok(AddressUse::Ok)
    } else {
        Ok(AddressUse::NotPermitted(DenyReason::NotOwner))
    }
}

/// Decides whether `user` may call a PSTN destination of the given class.
///
/// A request carrying any Route header is following an explicit forwarding
/// path and is always allowed; the routing set is trusted over the class
/// allow-list.
pub fn is_allowed_pstn_dst<D: DirectoryOracle>(
    directory: &D,
    user: &UserId,
    headers: &Headers,
    class: &str,
) -> Result<bool> {
    if headers.get("Route").is_some() {
        return Ok(true);
    }
    let classes = directory.classes_for_user(user)?;
    Ok(classes.iter().any(|c| c == class))
}

/// In-memory directory for testing and demos.
#[derive(Debug, Default, Clone)]
pub struct MemoryDirectory {
    owners: HashMap<String, Vec<UserId>>,
    contacts: HashMap<String, UserId>,
    classes: HashMap<UserId, Vec<SmolStr>>,
    rewrites: HashMap<SmolStr, SmolStr>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `user` as an owner of `url`.
    pub fn add_owner(&mut self, url: &SipUri, user: impl Into<UserId>) {
        self.owners
            .entry(address_key(url))
            .or_default()
            .push(user.into());
    }

    /// Records `user` as registered at contact `url`.
    pub fn add_contact(&mut self, url: &SipUri, user: impl Into<UserId>) {
        self.contacts.insert(address_key(url), user.into());
    }

    /// Grants `user` a destination class.
    pub fn allow_class(&mut self, user: impl Into<UserId>, class: impl Into<SmolStr>) {
        self.classes.entry(user.into()).or_default().push(class.into());
    }

    /// Registers an E.164 rewrite for a dialed number.
    pub fn add_rewrite(&mut self, from: impl Into<SmolStr>, to: impl Into<SmolStr>) {
        self.rewrites.insert(from.into(), to.into());
    }
}

impl DirectoryOracle for MemoryDirectory {
    fn users_for_url(&self, url: &SipUri) -> Result<Vec<UserId>> {
        Ok(self.owners.get(&address_key(url)).cloned().unwrap_or_default())
    }

    fn user_with_address(&self, url: &SipUri) -> Result<Option<UserId>> {
        Ok(self
            .owners
            .get(&address_key(url))
            .and_then(|owners| owners.first().cloned()))
    }

    fn user_with_contact(&self, url: &SipUri) -> Result<Option<UserId>> {
        Ok(self.contacts.get(&address_key(url)).cloned())
    }

    fn classes_for_user(&self, user: &UserId) -> Result<Vec<SmolStr>> {
        Ok(self.classes.get(user).cloned().unwrap_or_default())
    }

    fn rewrite_potn_to_e164(&self, number: &str) -> Result<SmolStr> {
        Ok(self
            .rewrites
            .get(number)
            .cloned()
            .unwrap_or_else(|| SmolStr::new(number)))
    }
}

/// Canonical lookup key for an address: user, host, and port only.
///
/// URI parameters never participate in ownership comparison.
fn address_key(url: &SipUri) -> String {
    let mut key = String::new();
    if let Some(user) = url.user() {
        key.push_str(user);
        key.push('@');
    }
    key.push_str(url.host());
    if let Some(port) = url.port() {
        key.push(':');
        key.push_str(&port.to_string());
    }
    key
}
