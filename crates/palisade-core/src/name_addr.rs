use crate::uri::SipUri;

/// Extracts the addr-spec URI from a name-addr style header value
/// (To, From, Contact, Route).
///
/// Handles both `"Name" <sip:...>;params` and bare `sip:...;params` forms.
/// For the bare form, everything after the first semicolon is a header
/// parameter, not a URI parameter, and is dropped.
pub fn addr_uri(value: &str) -> Option<SipUri> {
    let trimmed = value.trim();

    if let Some(start) = trimmed.find('<') {
        let rest = &trimmed[start + 1..];
        let end = rest.find('>')?;
        return SipUri::parse(rest[..end].trim()).ok();
    }

    let bare = match trimmed.find(';') {
        Some(pos) => trimmed[..pos].trim(),
        None => trimmed,
    };
    if bare.is_empty() {
        return None;
    }
    SipUri::parse(bare).ok()
}
