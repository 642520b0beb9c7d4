// palisade - SIP admission control and routing core
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! SIP-ETag and SIP-If-Match headers (RFC 3903).
//!
//! Used with the PUBLISH method for event state publication:
//! - **SIP-ETag**: server-assigned entity tag identifying a publication
//! - **SIP-If-Match**: client-provided entity tag for conditional operations

use std::fmt;

use smol_str::SmolStr;

/// The SIP-ETag header, returned by the Event State Compositor in 200 OK
/// responses to PUBLISH.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SipETagHeader {
    pub value: SmolStr,
}

impl SipETagHeader {
    pub fn new(value: impl Into<SmolStr>) -> Self {
        Self {
            value: value.into(),
        }
    }

    /// Parses a SIP-ETag header value; empty input is invalid.
    pub fn parse(input: &str) -> Option<Self> {
        let value = input.trim();
        if value.is_empty() {
            return None;
        }
        Some(Self {
            value: SmolStr::new(value),
        })
    }
}

impl fmt::Display for SipETagHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// The SIP-If-Match header, carried by clients to refresh, modify, or
/// remove a prior publication. A non-matching value earns 412.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SipIfMatchHeader {
    pub value: SmolStr,
}

impl SipIfMatchHeader {
    pub fn new(value: impl Into<SmolStr>) -> Self {
        Self {
            value: value.into(),
        }
    }

    /// Parses a SIP-If-Match header value; empty input is invalid.
    pub fn parse(input: &str) -> Option<Self> {
        let value = input.trim();
        if value.is_empty() {
            return None;
        }
        Some(Self {
            value: SmolStr::new(value),
        })
    }
}

impl fmt::Display for SipIfMatchHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn etag_parse_trims_whitespace() {
        let etag = SipETagHeader::parse("  dx200xyz  ").unwrap();
        assert_eq!(etag.value, "dx200xyz");
    }

    #[test]
    fn etag_parse_rejects_empty() {
        assert!(SipETagHeader::parse("").is_none());
        assert!(SipETagHeader::parse("   ").is_none());
    }

    #[test]
    fn if_match_round_trip() {
        let original = SipIfMatchHeader::new("kwj449x");
        let parsed = SipIfMatchHeader::parse(&original.to_string()).unwrap();
        assert_eq!(parsed, original);
    }
}
