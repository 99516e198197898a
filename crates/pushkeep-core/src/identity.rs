//! Endpoint → document key mapping.
//!
//! Endpoints are URLs and contain `/`, which the document store treats as a
//! path separator. Keys are the endpoint with `%` and every path-significant
//! character percent-encoded. Escaping `%` itself keeps the mapping injective,
//! and [`endpoint_from_key`] inverts it.

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};

/// Characters escaped in document keys (non-ASCII is always escaped).
const KEY_ESCAPES: &AsciiSet = &CONTROLS
    .add(b'%')
    .add(b'/')
    .add(b'\\')
    .add(b'?')
    .add(b'#')
    .add(b'[')
    .add(b']')
    .add(b'*')
    .add(b'.')
    .add(b' ');

/// Document key for an endpoint.
#[must_use]
pub fn sanitize_endpoint(endpoint: &str) -> String {
    utf8_percent_encode(endpoint, KEY_ESCAPES).to_string()
}

/// Recover the endpoint from a key produced by [`sanitize_endpoint`].
///
/// Returns `None` when the key does not decode to UTF-8.
#[must_use]
pub fn endpoint_from_key(key: &str) -> Option<String> {
    percent_decode_str(key)
        .decode_utf8()
        .ok()
        .map(|decoded| decoded.into_owned())
}
