// palisade - SIP admission control and routing core
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Authorization-style credential header values.
//!
//! Covers the three header names the admission core verifies:
//! `Authorization`, `Proxy-Authorization`, and `X-Yxa-Peer-Auth`. All carry
//! the same `scheme param=value, ...` shape.

use std::collections::BTreeMap;

use smol_str::SmolStr;

/// Parsed Authorization / Proxy-Authorization / X-Yxa-Peer-Auth header value.
///
/// Parameter names are lowercased at parse time; values keep their exact
/// bytes with quoting and backslash escapes removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationHeader {
    pub scheme: SmolStr,
    pub params: BTreeMap<SmolStr, SmolStr>,
}

impl AuthorizationHeader {
    /// Looks up a parameter by its (case-insensitive) name.
    pub fn param(&self, name: &str) -> Option<&SmolStr> {
        self.params.get(&SmolStr::new(name.to_ascii_lowercase()))
    }

    /// Parses a credential header value.
    ///
    /// Returns `None` when no scheme token is present or a quoted string is
    /// left unterminated. Unknown parameters are kept; duplicate parameter
    /// names keep the first occurrence.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        let (scheme, rest) = match input.split_once(char::is_whitespace) {
            Some((scheme, rest)) => (scheme, rest.trim_start()),
            None if !input.is_empty() => (input, ""),
            None => return None,
        };
        if scheme.is_empty() {
            return None;
        }

        let mut params = BTreeMap::new();
        let mut chars = rest.chars().peekable();

        loop {
            while matches!(chars.peek(), Some(c) if c.is_whitespace() || *c == ',') {
                chars.next();
            }
            if chars.peek().is_none() {
                break;
            }

            let mut name = String::new();
            while let Some(&c) = chars.peek() {
                if c == '=' || c == ',' {
                    break;
                }
                name.push(c);
                chars.next();
            }
            if chars.next() != Some('=') {
                // Parameter without a value; tolerated and skipped.
                continue;
            }

            let mut value = String::new();
            if chars.peek() == Some(&'"') {
                chars.next();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => match chars.next() {
                            Some(escaped) => value.push(escaped),
                            None => return None,
                        },
                        '"' => {
                            closed = true;
                            break;
                        }
                        other => value.push(other),
                    }
                }
                if !closed {
                    return None;
                }
            } else {
                while let Some(&c) = chars.peek() {
                    if c == ',' {
                        break;
                    }
                    value.push(c);
                    chars.next();
                }
            }

            params
                .entry(SmolStr::new(name.trim().to_ascii_lowercase()))
                .or_insert_with(|| SmolStr::new(value.trim()));
        }

        Some(Self {
            scheme: SmolStr::new(scheme),
            params,
        })
    }
}
