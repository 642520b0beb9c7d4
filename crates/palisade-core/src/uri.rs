// palisade - SIP admission control and routing core
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::collections::BTreeMap;
use std::fmt;

use smol_str::SmolStr;

/// Error produced when a SIP URI cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriError;

impl fmt::Display for UriError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid SIP URI")
    }
}

impl std::error::Error for UriError {}

/// Parsed representation of a SIP URI (RFC 3261 §19), reduced to the parts
/// the routing and admission core inspects.
///
/// URI headers (`?...`) are dropped at parse time; the core never routes on
/// them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SipUri {
    pub sips: bool,
    pub user: Option<SmolStr>,
    pub host: SmolStr,
    pub port: Option<u16>,
    pub params: BTreeMap<SmolStr, Option<SmolStr>>,
}

impl SipUri {
    /// Constructs a `sip:` URI with the given host and no user part.
    pub fn new(host: impl Into<SmolStr>) -> Self {
        Self {
            sips: false,
            user: None,
            host: host.into(),
            port: None,
            params: BTreeMap::new(),
        }
    }

    /// Builder-style user setter.
    pub fn with_user(mut self, user: impl Into<SmolStr>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Builder-style port setter.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Attempts to parse a SIP or SIPS URI from the provided string.
    pub fn parse(input: &str) -> Result<Self, UriError> {
        let (scheme, rest) = input.split_once(':').ok_or(UriError)?;
        let sips = scheme.eq_ignore_ascii_case("sips");
        if !sips && !scheme.eq_ignore_ascii_case("sip") {
            return Err(UriError);
        }

        let addr_part = match rest.split_once('?') {
            Some((addr, _headers)) => addr,
            None => rest,
        };

        let mut params = BTreeMap::new();
        let mut addr_iter = addr_part.split(';');
        let base = addr_iter.next().ok_or(UriError)?.trim();
        for param in addr_iter {
            let param = param.trim();
            if param.is_empty() {
                continue;
            }
            match param.split_once('=') {
                Some((k, v)) => {
                    params.insert(SmolStr::new(k.trim()), Some(SmolStr::new(v.trim())));
                }
                None => {
                    params.insert(SmolStr::new(param), None);
                }
            }
        }

        let (user, host_port) = match base.split_once('@') {
            Some((user, host)) if !user.is_empty() => (Some(SmolStr::new(user.trim())), host.trim()),
            Some((_, host)) => (None, host.trim()),
            None => (None, base.trim()),
        };

        if host_port.is_empty() {
            return Err(UriError);
        }

        let (host, port) = if let Some(rest) = host_port.strip_prefix('[') {
            // IPv6 reference: brackets delimit the host, the port follows.
            let (v6, remainder) = rest.split_once(']').ok_or(UriError)?;
            let port = match remainder.strip_prefix(':') {
                Some(p) => Some(p.parse::<u16>().map_err(|_| UriError)?),
                None if remainder.is_empty() => None,
                None => return Err(UriError),
            };
            (format!("[{}]", v6), port)
        } else {
            match host_port.rsplit_once(':') {
                Some((h, p)) => {
                    let port = p.parse::<u16>().map_err(|_| UriError)?;
                    (h.to_string(), Some(port))
                }
                None => (host_port.to_string(), None),
            }
        };

        if host.is_empty() || host == "[]" {
            return Err(UriError);
        }

        Ok(Self {
            sips,
            user,
            host: SmolStr::new(host.to_ascii_lowercase()),
            port,
            params,
        })
    }

    /// Returns the user part, if any.
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Returns the lowercased host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the explicit port, if any.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Returns the value of a URI parameter, if present with a value.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(|v| v.as_deref())
    }

    /// Returns `true` when the parameter is present, valued or not.
    pub fn has_param(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }
}

impl fmt::Display for SipUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.sips { "sips:" } else { "sip:" })?;
        if let Some(user) = &self.user {
            write!(f, "{}@", user)?;
        }
        f.write_str(&self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        for (k, v) in &self.params {
            match v {
                Some(v) => write!(f, ";{}={}", k, v)?,
                None => write!(f, ";{}", k)?,
            }
        }
        Ok(())
    }
}
