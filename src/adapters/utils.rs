//! Query-string helpers for the HTTP adapter.

use std::borrow::Cow;

/// Decode a form-encoded component: `+` is a space, `%HH` is one byte,
/// anything else (including a malformed escape) is kept literally.
pub fn url_decode(input: &str) -> Vec<u8> {
    let spaced: Cow<'_, str> = if input.contains('+') {
        Cow::Owned(input.replace('+', " "))
    } else {
        Cow::Borrowed(input)
    };
    urlencoding::decode_binary(spaced.as_bytes()).into_owned()
}

/// Decoded value of the first `name=` pair in a query string.  A bare
/// `name` yields an empty value.
pub fn query_param(query: &str, name: &str) -> Option<Vec<u8>> {
    query
        .split('&')
        .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| url_decode(v))
}

/// Split a request URI into path and query.
pub fn split_uri(uri: &str) -> (&str, &str) {
    uri.split_once('?').unwrap_or((uri, ""))
}
