// palisade - SIP admission control and routing core
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! PUBLISH lifecycle: create, conditional refresh, removal, and the error
//! responses around them.

use bytes::Bytes;
use palisade_core::pidf::PIDF_CONTENT_TYPE;
use palisade_core::{Headers, Method, PidfDocument, Request, RequestLine, SipUri};
use palisade_presence::{
    EventStateCompositor, MemoryPidfStore, PidfStore, Presentity, PresenceConfig,
    SubscribeAdmission, UserId,
};
use smol_str::SmolStr;

const NOW: u64 = 11_000_000;

fn esc() -> EventStateCompositor<MemoryPidfStore> {
    EventStateCompositor::new(
        MemoryPidfStore::new(),
        PresenceConfig::new("node1")
            .with_min_publish(60)
            .with_max_publish(7200)
            .with_default_publish(3600),
    )
}

fn user() -> UserId {
    UserId::new("ft")
}

fn pidf_body() -> Bytes {
    Bytes::from(PidfDocument::offline("pres:ft@example.org").to_xml())
}

fn publish(body: Bytes, extra: &[(&str, &str)]) -> Request {
    let mut headers = Headers::new();
    headers.push("Via", "SIP/2.0/UDP client.example.org;branch=z9hG4bKpub");
    headers.push("From", "<sip:ft@example.org>;tag=p1");
    headers.push("To", "<sip:ft@example.org>");
    headers.push("Call-ID", "pub-1@client.example.org");
    headers.push("CSeq", "1 PUBLISH");
    headers.push("Event", "presence");
    if !body.is_empty() {
        headers.push("Content-Type", PIDF_CONTENT_TYPE);
    }
    for (name, value) in extra {
        headers.push(SmolStr::new(*name), SmolStr::new(*value));
    }
    Request::new(
        RequestLine::new(Method::Publish, SipUri::parse("sip:ft@example.org").unwrap()),
        headers,
        body,
    )
}

fn etag_of(response: &palisade_core::Response) -> SmolStr {
    response.headers().get("SIP-ETag").cloned().expect("SIP-ETag")
}

#[test]
fn create_returns_etag_and_expires() {
    let esc = esc();
    let request = publish(pidf_body(), &[("Expires", "600")]);
    let response = esc.handle_publish(&user(), &request, NOW).unwrap();

    assert_eq!(response.code(), 200);
    assert_eq!(response.headers().get("Expires").map(|v| v.as_str()), Some("600"));
    let etag = etag_of(&response);
    assert!(esc.store().exists(&user(), &etag, NOW));
}

#[test]
fn missing_expires_uses_default() {
    let esc = esc();
    let response = esc
        .handle_publish(&user(), &publish(pidf_body(), &[]), NOW)
        .unwrap();
    assert_eq!(
        response.headers().get("Expires").map(|v| v.as_str()),
        Some("3600")
    );
}

#[test]
fn expires_is_capped_at_max() {
    let esc = esc();
    let response = esc
        .handle_publish(&user(), &publish(pidf_body(), &[("Expires", "999999")]), NOW)
        .unwrap();
    assert_eq!(
        response.headers().get("Expires").map(|v| v.as_str()),
        Some("7200")
    );
}

#[test]
fn too_brief_expires_is_423_with_min_expires() {
    let esc = esc();
    let response = esc
        .handle_publish(&user(), &publish(pidf_body(), &[("Expires", "30")]), NOW)
        .unwrap();
    assert_eq!(response.code(), 423);
    assert_eq!(
        response.headers().get("Min-Expires").map(|v| v.as_str()),
        Some("60")
    );
}

#[test]
fn refresh_rotates_etag_and_invalidates_old_one() {
    let esc = esc();
    let created = esc
        .handle_publish(&user(), &publish(pidf_body(), &[("Expires", "600")]), NOW)
        .unwrap();
    let first = etag_of(&created);

    let refresh = publish(
        Bytes::new(),
        &[("Expires", "3600"), ("SIP-If-Match", first.as_str())],
    );
    let refreshed = esc.handle_publish(&user(), &refresh, NOW + 10).unwrap();
    assert_eq!(refreshed.code(), 200);
    assert_eq!(
        refreshed.headers().get("Expires").map(|v| v.as_str()),
        Some("3600")
    );
    let second = etag_of(&refreshed);
    assert_ne!(first, second);

    // Refreshing with the rotated-out tag must fail the precondition.
    let stale_refresh = publish(
        Bytes::new(),
        &[("Expires", "3600"), ("SIP-If-Match", first.as_str())],
    );
    let failed = esc.handle_publish(&user(), &stale_refresh, NOW + 20).unwrap();
    assert_eq!(failed.code(), 412);
}

#[test]
fn refresh_with_body_is_400() {
    let esc = esc();
    let created = esc
        .handle_publish(&user(), &publish(pidf_body(), &[("Expires", "600")]), NOW)
        .unwrap();
    let etag = etag_of(&created);

    let bad = publish(pidf_body(), &[("SIP-If-Match", etag.as_str())]);
    let response = esc.handle_publish(&user(), &bad, NOW).unwrap();
    assert_eq!(response.code(), 400);
}

#[test]
fn refresh_of_unknown_etag_is_412() {
    let esc = esc();
    let request = publish(Bytes::new(), &[("SIP-If-Match", "never-issued")]);
    let response = esc.handle_publish(&user(), &request, NOW).unwrap();
    assert_eq!(response.code(), 412);
}

#[test]
fn multiple_if_match_values_are_400() {
    let esc = esc();
    let request = publish(
        Bytes::new(),
        &[("SIP-If-Match", "e1"), ("SIP-If-Match", "e2")],
    );
    let response = esc.handle_publish(&user(), &request, NOW).unwrap();
    assert_eq!(response.code(), 400);
}

#[test]
fn zero_expires_refresh_removes_publication() {
    let esc = esc();
    let created = esc
        .handle_publish(&user(), &publish(pidf_body(), &[("Expires", "600")]), NOW)
        .unwrap();
    let etag = etag_of(&created);

    let remove = publish(
        Bytes::new(),
        &[("Expires", "0"), ("SIP-If-Match", etag.as_str())],
    );
    let response = esc.handle_publish(&user(), &remove, NOW + 1).unwrap();
    assert_eq!(response.code(), 200);
    assert_eq!(response.headers().get("Expires").map(|v| v.as_str()), Some("0"));

    // Nothing left to refresh.
    let new_tag = etag_of(&response);
    let again = publish(
        Bytes::new(),
        &[("Expires", "600"), ("SIP-If-Match", new_tag.as_str())],
    );
    assert_eq!(esc.handle_publish(&user(), &again, NOW + 2).unwrap().code(), 412);
}

#[test]
fn create_without_content_type_is_400() {
    let esc = esc();
    let mut request = publish(pidf_body(), &[("Expires", "600")]);
    request.headers_mut().remove_all("Content-Type");
    let response = esc.handle_publish(&user(), &request, NOW).unwrap();
    assert_eq!(response.code(), 400);
}

#[test]
fn unsupported_content_type_is_406_with_accept() {
    let esc = esc();
    let mut request = publish(pidf_body(), &[("Expires", "600")]);
    request.headers_mut().set_or_push("Content-Type", "text/plain");
    let response = esc.handle_publish(&user(), &request, NOW).unwrap();
    assert_eq!(response.code(), 406);
    assert_eq!(
        response.headers().get("Accept").map(|v| v.as_str()),
        Some(PIDF_CONTENT_TYPE)
    );
}

#[test]
fn garbage_xml_is_400() {
    let esc = esc();
    let mut request = publish(Bytes::from_static(b"<not-pidf/>"), &[("Expires", "600")]);
    request.headers_mut().set_or_push("Content-Type", PIDF_CONTENT_TYPE);
    let response = esc.handle_publish(&user(), &request, NOW).unwrap();
    assert_eq!(response.code(), 400);
    assert!(response.headers().get("Accept").is_some());
}

#[test]
fn notify_stores_fresh_state() {
    let esc = esc();
    let mut request = publish(pidf_body(), &[("Expires", "600")]);
    request.headers_mut().set_or_push("CSeq", "1 NOTIFY");
    let response = esc.handle_notify(&user(), &request, NOW).unwrap();
    assert_eq!(response.code(), 200);
    assert!(esc.store().get_xml(&user(), &[], NOW).is_some());
}

#[test]
fn unknown_event_method_is_501() {
    let esc = esc();
    let request = publish(Bytes::new(), &[]);
    let response = esc.handle_unknown(&request).unwrap();
    assert_eq!(response.code(), 501);
}

#[test]
fn subscribe_admission_matrix() {
    let esc = esc();
    let ft = user();
    let accept_pidf = vec![SmolStr::new(PIDF_CONTENT_TYPE)];

    assert_eq!(
        esc.subscribe_admission(None, &Presentity::Users(vec![ft.clone()]), &accept_pidf),
        SubscribeAdmission::NeedAuth
    );
    assert_eq!(
        esc.subscribe_admission(Some(&ft), &Presentity::Users(vec![ft.clone()]), &accept_pidf),
        SubscribeAdmission::Active
    );
    assert_eq!(
        esc.subscribe_admission(
            Some(&ft),
            &Presentity::Address(SmolStr::new("pres:team@example.org")),
            &accept_pidf
        ),
        SubscribeAdmission::Pending
    );
    assert_eq!(
        esc.subscribe_admission(
            Some(&ft),
            &Presentity::Users(vec![ft.clone()]),
            &[SmolStr::new("text/html")]
        ),
        SubscribeAdmission::Unacceptable
    );
    // No Accept header at all means the default type is fine.
    assert_eq!(
        esc.subscribe_admission(Some(&ft), &Presentity::Users(vec![ft.clone()]), &[]),
        SubscribeAdmission::Active
    );
}

#[test]
fn notify_body_prefers_published_state() {
    let esc = esc();
    esc.handle_publish(&user(), &publish(pidf_body(), &[("Expires", "600")]), NOW)
        .unwrap();

    let (content_type, body) = esc
        .notify_body(&Presentity::Users(vec![user()]), NOW)
        .unwrap();
    assert_eq!(content_type, PIDF_CONTENT_TYPE);
    assert_eq!(body, pidf_body());
}

#[test]
fn notify_body_synthesizes_offline_when_nothing_published() {
    let esc = esc();
    let (_, body) = esc
        .notify_body(&Presentity::Users(vec![user()]), NOW)
        .unwrap();
    assert!(std::str::from_utf8(&body).unwrap().contains("closed"));

    let (_, body) = esc
        .notify_body(&Presentity::Address(SmolStr::new("pres:x@example.org")), NOW)
        .unwrap();
    assert!(std::str::from_utf8(&body).unwrap().contains("pres:x@example.org"));
}

#[test]
fn notify_body_is_absent_for_multi_user_presentities() {
    let esc = esc();
    assert!(esc
        .notify_body(
            &Presentity::Users(vec![UserId::new("a"), UserId::new("b")]),
            NOW
        )
        .is_none());
}
