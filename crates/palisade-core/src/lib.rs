// palisade - SIP admission control and routing core
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Core SIP value types for the palisade admission and routing engine.
//!
//! This crate carries only the types the decision core needs to express
//! requests, responses, and header values in its API:
//! - **Messages**: [`Request`], [`Response`], [`StatusLine`]
//! - **URIs**: [`SipUri`] (sip/sips)
//! - **Headers**: [`Headers`] container, [`AuthorizationHeader`],
//!   [`SipETagHeader`], [`SipIfMatchHeader`]
//! - **Methods**: [`Method`] enum
//! - **PIDF**: [`PidfDocument`] presence documents (RFC 3863)
//!
//! Wire parsing and serialization of whole messages live in the transport
//! stack; this crate only parses the individual header values the core
//! inspects.

pub mod auth;
pub mod etag;
pub mod headers;
pub mod max_forwards;
pub mod method;
pub mod msg;
pub mod name_addr;
pub mod pidf;
pub mod reply;
pub mod uri;

pub use auth::AuthorizationHeader;
pub use etag::{SipETagHeader, SipIfMatchHeader};
pub use headers::{Header, Headers};
pub use max_forwards::{decrement_max_forwards, decremented_max_forwards, MaxForwardsError};
pub use method::Method;
pub use msg::{MessageError, Request, RequestLine, Response, StatusLine};
pub use name_addr::addr_uri;
pub use pidf::{BasicStatus, PidfDocument, PidfTuple};
pub use reply::{ensure_to_tag, reply_to};
pub use uri::{SipUri, UriError};
