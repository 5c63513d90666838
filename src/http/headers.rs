//! Ordered header list with case-insensitive names.

/// Header fields in arrival order, compared by name without regard to case.
///
/// Repeated names are kept as separate entries. Cached responses are replayed
/// from this list verbatim, so order is part of what gets stored.
///
/// # Examples
///
/// ```
/// use scrobble_edge::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Content-Type", "application/json");
/// headers.insert("X-Cache", "MISS");
/// headers.set("x-cache", "HIT");
///
/// assert_eq!(headers.get("content-type"), Some("application/json"));
/// let all: Vec<_> = headers.get_all("X-Cache").collect();
/// assert_eq!(all, vec!["HIT"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<(String, String)>,
}

fn same_name(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    /// Appends an entry, keeping any existing ones with the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    /// Leaves exactly one entry for `name`.
    ///
    /// The value lands where the first existing entry was, or at the end if
    /// there was none.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let Some(first) = self.fields.iter().position(|(k, _)| same_name(k, &name)) else {
            self.fields.push((name, value.into()));
            return;
        };

        self.fields[first].1 = value.into();
        let mut index = 0;
        self.fields.retain(|(k, _)| {
            let keep = index <= first || !same_name(k, &name);
            index += 1;
            keep
        });
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.iter().find(|(k, _)| same_name(k, name)).map(|(_, v)| v.as_str())
    }

    /// Every value for `name`, in order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields
            .iter()
            .filter(move |(k, _)| same_name(k, name))
            .map(|(_, v)| v.as_str())
    }

    /// Drops every entry for `name`, reporting whether any existed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.fields.len();
        self.fields.retain(|(k, _)| !same_name(k, name));
        self.fields.len() != before
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Number of entries, counting repeated names separately.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_get() {
        let mut h = Headers::new();
        h.insert("Cache-Control", "public, max-age=10");
        assert_eq!(h.get("cache-control"), Some("public, max-age=10"));
        assert_eq!(h.get("CACHE-CONTROL"), Some("public, max-age=10"));
    }

    #[test]
    fn value_outlives_lookup_name() {
        let mut h = Headers::new();
        h.insert("X-Cache", "HIT");
        let value = {
            let name = String::from("x-cache");
            h.get(&name)
        };
        assert_eq!(value, Some("HIT"));
    }

    #[test]
    fn multi_value() {
        let mut h = Headers::new();
        h.insert("Vary", "Origin");
        h.insert("Vary", "Accept");
        let vals: Vec<_> = h.get_all("vary").collect();
        assert_eq!(vals, vec!["Origin", "Accept"]);
    }

    #[test]
    fn set_replaces_all_values_in_place() {
        let mut h = Headers::new();
        h.insert("X-Cache", "MISS");
        h.insert("Content-Type", "application/json");
        h.insert("x-cache", "STALE");
        h.set("X-Cache", "HIT");

        let pairs: Vec<_> = h.iter().collect();
        assert_eq!(
            pairs,
            vec![("X-Cache", "HIT"), ("Content-Type", "application/json")]
        );
    }

    #[test]
    fn set_appends_when_absent() {
        let mut h = Headers::new();
        h.set("Cache-Control", "public, max-age=60");
        assert_eq!(h.len(), 1);
        assert_eq!(h.get("cache-control"), Some("public, max-age=60"));
    }

    #[test]
    fn remove() {
        let mut h = Headers::new();
        h.insert("X-Foo", "bar");
        h.insert("X-Foo", "baz");
        assert!(h.remove("x-foo"));
        assert!(h.is_empty());
        assert!(!h.remove("x-foo")); // already gone
    }
}
