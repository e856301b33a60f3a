//! Request-target parsing.
//!
//! Pure functions, no state. The router only ever sees the pathname; the
//! query string is parsed separately and handed to the request context.
//! Lookup ignores trailing slashes itself, so `/a/b/` and `/a/b` route alike.

use std::borrow::Cow;
use std::collections::HashMap;

/// Splits a raw request target into `(pathname, query)`.
///
/// Accepts origin-form (`/users?page=2`) and absolute-form
/// (`http://host/users?page=2`) targets. A `#fragment` is dropped.
///
/// ```rust
/// use waypost::path::split_target;
///
/// assert_eq!(split_target("/a/b?x=1"), ("/a/b", Some("x=1")));
/// assert_eq!(split_target("https://example.com/a#top"), ("/a", None));
/// ```
pub fn split_target(target: &str) -> (&str, Option<&str>) {
    let target = match target.find('#') {
        Some(i) => &target[..i],
        None => target,
    };

    let target = match target.find("://") {
        Some(scheme_end) => {
            let authority = &target[scheme_end + 3..];
            match authority.find(['/', '?']) {
                Some(i) => &authority[i..],
                None => "",
            }
        }
        None => target,
    };

    match target.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (target, None),
    }
}

/// Normalizes a pathname for the route tree.
///
/// A leading `/` is enforced, one trailing `*` is stripped, then every
/// trailing `/`. The root path normalizes to the empty string. Borrows unless
/// a leading slash has to be added.
///
/// ```rust
/// use waypost::path::normalize;
///
/// assert_eq!(normalize("/users/"), "/users");
/// assert_eq!(normalize("static/*"), "/static");
/// assert_eq!(normalize("/"), "");
/// ```
pub fn normalize(path: &str) -> Cow<'_, str> {
    let trimmed = trim_trailing(path);

    if trimmed.is_empty() || trimmed.starts_with('/') {
        Cow::Borrowed(trimmed)
    } else {
        Cow::Owned(format!("/{trimmed}"))
    }
}

/// Strips one trailing `*`, then every trailing `/`. Shared by
/// [`normalize`] and route lookup.
pub(crate) fn trim_trailing(path: &str) -> &str {
    path.strip_suffix('*').unwrap_or(path).trim_end_matches('/')
}

/// Non-empty `/`-delimited segments of a pattern or path.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Parses a query string into a key/value map.
///
/// `+` and percent-escapes are decoded; a malformed escape keeps the raw
/// text. A key without `=` maps to the empty string. Later duplicates win.
///
/// ```rust
/// use waypost::path::parse_query;
///
/// let q = parse_query("name=ada+lovelace&admin&page=2");
/// assert_eq!(q["name"], "ada lovelace");
/// assert_eq!(q["admin"], "");
/// ```
pub fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (decode(k), decode(v)),
            None => (decode(pair), String::new()),
        })
        .collect()
}

fn decode(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}
