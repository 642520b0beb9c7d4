// palisade - SIP admission control and routing core
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The published-document store.
//!
//! One record per `(user, etag)`. Writes for a user are serialized: the
//! in-memory store holds the user's map entry exclusively for the whole
//! read-modify-write, which is the ordering contract PUBLISH processing
//! relies on. Readers see complete prior states only.

use std::fmt;

use bytes::Bytes;
use dashmap::DashMap;
use palisade_core::pidf::PIDF_CONTENT_TYPE;
use palisade_core::PidfDocument;
use smol_str::SmolStr;

use crate::UserId;

/// Why a document was refused by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetError {
    /// A known document format we do not serve.
    UnsupportedContentType,
    /// Not a recognizable media type at all.
    UnknownContentType,
    /// The body does not parse as a PIDF document.
    BadXml,
}

impl fmt::Display for SetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetError::UnsupportedContentType => write!(f, "unsupported content type"),
            SetError::UnknownContentType => write!(f, "unknown content type"),
            SetError::BadXml => write!(f, "body is not a valid PIDF document"),
        }
    }
}

impl std::error::Error for SetError {}

/// One published event state snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    pub etag: SmolStr,
    pub expires_at: u64,
    pub content_type: SmolStr,
    pub body: Bytes,
}

/// Storage for published presence documents.
pub trait PidfStore: Send + Sync {
    /// Stores a new publication. Equal entity tags within a user are
    /// deduplicated (last write wins).
    fn set(
        &self,
        user: &UserId,
        etag: &str,
        expires_at: u64,
        content_type: &str,
        body: &Bytes,
        now: u64,
    ) -> Result<(), SetError>;

    /// Rotates the entity tag and lifetime of an existing publication,
    /// keeping its body. Returns `false` when `(user, old_etag)` does not
    /// exist (or has expired).
    fn refresh(&self, user: &UserId, old_etag: &str, expires_at: u64, new_etag: &str, now: u64)
        -> bool;

    /// Whether a live publication `(user, etag)` exists.
    fn exists(&self, user: &UserId, etag: &str, now: u64) -> bool;

    /// The user's most recent live document in one of the accepted types;
    /// an empty accept list means any type.
    fn get_xml(&self, user: &UserId, accept: &[SmolStr], now: u64) -> Option<(SmolStr, Bytes)>;

    /// Document types this store serves.
    fn supported(&self) -> Vec<SmolStr>;
}

/// In-memory PIDF store backed by a per-user map entry.
#[derive(Debug)]
pub struct MemoryPidfStore {
    publications: DashMap<UserId, Vec<Publication>>,
    supported: Vec<SmolStr>,
}

impl Default for MemoryPidfStore {
    fn default() -> Self {
        Self {
            publications: DashMap::new(),
            supported: vec![SmolStr::new(PIDF_CONTENT_TYPE)],
        }
    }
}

impl MemoryPidfStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_supported(mut self, supported: Vec<SmolStr>) -> Self {
        self.supported = supported;
        self
    }

    /// Live publications for a user, oldest first.
    pub fn publications(&self, user: &UserId, now: u64) -> Vec<Publication> {
        self.publications
            .get(user)
            .map(|entry| {
                entry
                    .iter()
                    .filter(|p| p.expires_at > now)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn validate(&self, content_type: &str, body: &Bytes) -> Result<(), SetError> {
        let media_type = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim();
        if !media_type.contains('/') {
            return Err(SetError::UnknownContentType);
        }
        if !self
            .supported
            .iter()
            .any(|s| s.eq_ignore_ascii_case(media_type))
        {
            return Err(SetError::UnsupportedContentType);
        }
        if media_type.eq_ignore_ascii_case(PIDF_CONTENT_TYPE)
            && !PidfDocument::looks_valid(body)
        {
            return Err(SetError::BadXml);
        }
        Ok(())
    }
}

impl PidfStore for MemoryPidfStore {
    fn set(
        &self,
        user: &UserId,
        etag: &str,
        expires_at: u64,
        content_type: &str,
        body: &Bytes,
        now: u64,
    ) -> Result<(), SetError> {
        self.validate(content_type, body)?;

        let mut entry = self.publications.entry(user.clone()).or_default();
        entry.retain(|p| p.expires_at > now && p.etag != etag);
        entry.push(Publication {
            etag: SmolStr::new(etag),
            expires_at,
            content_type: SmolStr::new(content_type),
            body: body.clone(),
        });
        Ok(())
    }

    fn refresh(
        &self,
        user: &UserId,
        old_etag: &str,
        expires_at: u64,
        new_etag: &str,
        now: u64,
    ) -> bool {
        let mut entry = match self.publications.get_mut(user) {
            Some(entry) => entry,
            None => return false,
        };
        entry.retain(|p| p.expires_at > now);
        match entry.iter_mut().find(|p| p.etag == old_etag) {
            Some(publication) => {
                publication.etag = SmolStr::new(new_etag);
                publication.expires_at = expires_at;
                true
            }
            None => false,
        }
    }

    fn exists(&self, user: &UserId, etag: &str, now: u64) -> bool {
        self.publications
            .get(user)
            .map(|entry| entry.iter().any(|p| p.etag == etag && p.expires_at > now))
            .unwrap_or(false)
    }

    fn get_xml(&self, user: &UserId, accept: &[SmolStr], now: u64) -> Option<(SmolStr, Bytes)> {
        let entry = self.publications.get(user)?;
        entry
            .iter()
            .rev()
            .find(|p| {
                let media_type = p.content_type.split(';').next().unwrap_or_default().trim();
                p.expires_at > now
                    && (accept.is_empty()
                        || accept.iter().any(|a| a.eq_ignore_ascii_case(media_type)))
            })
            .map(|p| (p.content_type.clone(), p.body.clone()))
    }

    fn supported(&self) -> Vec<SmolStr> {
        self.supported.clone()
    }
}
