// palisade - SIP admission control and routing core
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Minimal PIDF (RFC 3863) presence documents.
//!
//! The event state compositor stores published documents verbatim; this
//! module only needs to write documents it synthesizes itself (the
//! "offline" NOTIFY body) and to sanity-check inbound XML before storage.
//! It is not a general XML parser.

use smol_str::SmolStr;
use std::fmt;

pub const PIDF_CONTENT_TYPE: &str = "application/pidf+xml";
const PIDF_NAMESPACE: &str = "urn:ietf:params:xml:ns:pidf";

/// RFC 3863 basic status values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BasicStatus {
    Open,
    Closed,
}

impl BasicStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BasicStatus::Open => "open",
            BasicStatus::Closed => "closed",
        }
    }
}

/// A single presence tuple.
#[derive(Debug, Clone, PartialEq)]
pub struct PidfTuple {
    pub id: SmolStr,
    pub status: Option<BasicStatus>,
    pub contact: Option<SmolStr>,
    pub note: Option<SmolStr>,
}

impl PidfTuple {
    pub fn new(id: impl Into<SmolStr>) -> Self {
        Self {
            id: id.into(),
            status: None,
            contact: None,
            note: None,
        }
    }

    pub fn with_status(mut self, status: BasicStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_contact(mut self, contact: impl Into<SmolStr>) -> Self {
        self.contact = Some(contact.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<SmolStr>) -> Self {
        self.note = Some(note.into());
        self
    }

    fn write_xml(&self, xml: &mut String) {
        xml.push_str("  <tuple id=\"");
        xml.push_str(&xml_escape(&self.id));
        xml.push_str("\">\n");
        if let Some(status) = self.status {
            xml.push_str("    <status>\n      <basic>");
            xml.push_str(status.as_str());
            xml.push_str("</basic>\n    </status>\n");
        }
        if let Some(contact) = &self.contact {
            xml.push_str("    <contact>");
            xml.push_str(&xml_escape(contact));
            xml.push_str("</contact>\n");
        }
        if let Some(note) = &self.note {
            xml.push_str("    <note>");
            xml.push_str(&xml_escape(note));
            xml.push_str("</note>\n");
        }
        xml.push_str("  </tuple>\n");
    }
}

/// A PIDF presence document for one presentity.
#[derive(Debug, Clone, PartialEq)]
pub struct PidfDocument {
    pub entity: SmolStr,
    pub tuples: Vec<PidfTuple>,
}

impl PidfDocument {
    pub fn new(entity: impl Into<SmolStr>) -> Self {
        Self {
            entity: entity.into(),
            tuples: Vec::new(),
        }
    }

    pub fn add_tuple(&mut self, tuple: PidfTuple) {
        self.tuples.push(tuple);
    }

    /// Synthesizes a document stating the presentity is offline.
    pub fn offline(entity: impl Into<SmolStr>) -> Self {
        let mut doc = Self::new(entity);
        doc.add_tuple(PidfTuple::new("t1").with_status(BasicStatus::Closed));
        doc
    }

    /// Formats the document as `application/pidf+xml`.
    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str("<presence xmlns=\"");
        xml.push_str(PIDF_NAMESPACE);
        xml.push_str("\" entity=\"");
        xml.push_str(&xml_escape(&self.entity));
        xml.push_str("\">\n");
        for tuple in &self.tuples {
            tuple.write_xml(&mut xml);
        }
        xml.push_str("</presence>\n");
        xml
    }

    /// Checks that a body looks like a well-formed PIDF document.
    ///
    /// Accepts what [`to_xml`](Self::to_xml) produces plus reasonable
    /// client variations: optional XML declaration, namespace prefixes,
    /// single-quoted attributes. Returns `false` for anything whose root
    /// element is not a PIDF `presence` element.
    pub fn looks_valid(body: &[u8]) -> bool {
        let Ok(text) = std::str::from_utf8(body) else {
            return false;
        };
        let text = text.trim_start_matches('\u{feff}').trim();
        let rest = if let Some(decl_start) = text.strip_prefix("<?xml") {
            match decl_start.find("?>") {
                Some(pos) => decl_start[pos + 2..].trim_start(),
                None => return false,
            }
        } else {
            text
        };

        let Some(root) = rest.strip_prefix('<') else {
            return false;
        };
        let Some(tag_end) = root.find('>') else {
            return false;
        };
        let open_tag = &root[..tag_end];

        let element = open_tag
            .split_whitespace()
            .next()
            .map(|name| name.rsplit(':').next().unwrap_or(name))
            .unwrap_or("");
        if element != "presence" {
            return false;
        }
        if !open_tag.contains(PIDF_NAMESPACE) {
            return false;
        }
        rest.trim_end().ends_with("presence>")
    }
}

impl fmt::Display for PidfDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_xml())
    }
}

fn xml_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}
