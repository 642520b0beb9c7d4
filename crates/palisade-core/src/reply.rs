// palisade - SIP admission control and routing core
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use bytes::Bytes;
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use smol_str::SmolStr;

use crate::{Headers, MessageError, Request, Response, StatusLine};

/// Builds a response to `request` with the RFC 3261 mandatory header
/// copy-down (Via, From, To, Call-ID, CSeq) and `Content-Length: 0`.
///
/// Callers add method-specific headers (challenges, Contact, SIP-ETag)
/// on the returned response.
pub fn reply_to(request: &Request, code: u16, reason: &str) -> Result<Response, MessageError> {
    let mut headers = Headers::new();

    for via in request.headers().get_all("Via") {
        headers.push("Via", via.clone());
    }
    if let Some(from) = request.headers().get("From") {
        headers.push("From", from.clone());
    }
    // RFC 3261 §8.2.6.2: a UAS MUST add a tag to the To header if absent.
    if let Some(to) = request.headers().get("To") {
        headers.push("To", ensure_to_tag(to));
    }
    if let Some(call_id) = request.headers().get("Call-ID") {
        headers.push("Call-ID", call_id.clone());
    }
    if let Some(cseq) = request.headers().get("CSeq") {
        headers.push("CSeq", cseq.clone());
    }
    headers.push("Content-Length", "0");

    Ok(Response::new(
        StatusLine::new(code, reason)?,
        headers,
        Bytes::new(),
    ))
}

/// Ensures a To header value carries a tag parameter, generating a random
/// 8-character tag when missing.
pub fn ensure_to_tag(to_header: &str) -> SmolStr {
    if to_header.contains(";tag=") {
        return SmolStr::new(to_header);
    }

    let tag: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();

    SmolStr::new(format!("{};tag={}", to_header, tag))
}
