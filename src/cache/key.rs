//! Canonical cache keys.
//!
//! A [`CacheKey`] stands in for a synthetic `GET` request: its identity is the
//! fully serialized URL `scheme://host/path?sorted-query`. Parameter order never
//! affects the key, and multi-valued parameters collapse to one comma-joined value.

use std::collections::BTreeMap;
use std::fmt;

use percent_encoding::{AsciiSet, CONTROLS, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

use crate::http::{Method, Request};

// Path characters that must be escaped (the WHATWG path percent-encode set).
const PATH: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

// Query keys and values keep unreserved characters and the join separator readable.
const QUERY: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b',');

/// A query parameter value: one string or a sequence joined with `,`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Single(String),
    Multi(Vec<String>),
}

impl ParamValue {
    fn joined(self) -> String {
        match self {
            ParamValue::Single(v) => v,
            ParamValue::Multi(vs) => vs.join(","),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Single(v.to_owned())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Single(v)
    }
}

impl From<Vec<String>> for ParamValue {
    fn from(vs: Vec<String>) -> Self {
        ParamValue::Multi(vs)
    }
}

impl From<Vec<&str>> for ParamValue {
    fn from(vs: Vec<&str>) -> Self {
        ParamValue::Multi(vs.into_iter().map(str::to_owned).collect())
    }
}

/// The lookup identity of a cached response.
///
/// # Examples
///
/// ```
/// use scrobble_edge::cache::{CacheKey, ParamValue};
///
/// let a = CacheKey::build("https://edge.example", "/api/lastfm/track-info", [
///     ("track", ParamValue::from("Starálfur")),
///     ("artist", ParamValue::from("Sigur Rós")),
/// ]);
/// let b = CacheKey::build("https://edge.example", "/api/lastfm/track-info", [
///     ("artist", ParamValue::from("Sigur Rós")),
///     ("track", ParamValue::from("Starálfur")),
/// ]);
/// assert_eq!(a, b);
/// assert_eq!(a.query_value("artist").as_deref(), Some("Sigur Rós"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    url: String,
}

impl CacheKey {
    /// Derives a key from `base_url`'s origin, `path`, and `params`.
    ///
    /// Any path, query, or fragment already present in `base_url` is discarded.
    /// When the same parameter name appears more than once, the last one wins.
    /// Never fails: a base without a scheme is used verbatim as the origin.
    pub fn build<I, K, V>(base_url: &str, path: &str, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<ParamValue>,
    {
        let sorted: BTreeMap<String, String> = params
            .into_iter()
            .map(|(k, v)| (k.into(), v.into().joined()))
            .collect();

        let mut url = origin_of(base_url);
        if !path.starts_with('/') {
            url.push('/');
        }
        url.extend(utf8_percent_encode(path, PATH));

        let mut separator = '?';
        for (name, value) in &sorted {
            url.push(separator);
            url.extend(utf8_percent_encode(name, QUERY));
            url.push('=');
            url.extend(utf8_percent_encode(value, QUERY));
            separator = '&';
        }

        Self { url }
    }

    /// Derives the key for an inbound request from its origin, path, and query.
    ///
    /// Repeated query names are gathered, in arrival order, into one
    /// multi-valued parameter.
    pub fn for_request(request: &Request) -> Self {
        let mut grouped: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (name, value) in request.query_pairs() {
            grouped.entry(name).or_default().push(value);
        }

        let params = grouped.into_iter().map(|(name, mut values)| {
            let value = if values.len() == 1 {
                ParamValue::from(values.remove(0))
            } else {
                ParamValue::from(values)
            };
            (name, value)
        });

        Self::build(&request.origin(), request.path(), params)
    }

    /// Keys always describe a `GET` of [`as_str`](Self::as_str).
    pub fn method(&self) -> Method {
        Method::Get
    }

    /// The serialized URL that identifies this key.
    pub fn as_str(&self) -> &str {
        &self.url
    }

    /// The decoded value stored for `name`, if present.
    pub fn query_value(&self, name: &str) -> Option<String> {
        let (_, query) = self.url.split_once('?')?;
        query.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            let k = percent_decode_str(k).decode_utf8_lossy();
            (k == name).then(|| percent_decode_str(v).decode_utf8_lossy().into_owned())
        })
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

// `scheme://host[:port]`, lowercased, with everything after the authority dropped.
fn origin_of(base_url: &str) -> String {
    let base = base_url.trim();
    let authority_start = base.find("://").map_or(0, |i| i + 3);
    let authority_end = base[authority_start..]
        .find(['/', '?', '#'])
        .map_or(base.len(), |i| authority_start + i);
    base[..authority_end].to_ascii_lowercase()
}
