//! Request header assembly

use std::fmt;

pub const AUTHORIZATION: &str = "Authorization";
pub const CONTENT_TYPE: &str = "Content-Type";
pub const APPLICATION_JSON: &str = "application/json";

/// Ordered header list with case-insensitive names
#[derive(Clone, Default, PartialEq)]
pub struct RequestHeaders(Vec<(String, String)>);

impl RequestHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header, replacing any existing one of the same name
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(&name)) {
            Some(entry) => *entry = (name, value),
            None => self.0.push((name, value)),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RequestHeaders {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

// Authorization values stay out of logs
impl fmt::Debug for RequestHeaders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.0.iter().map(|(n, v)| {
                let shown = if n.eq_ignore_ascii_case(AUTHORIZATION) { "<redacted>" } else { v.as_str() };
                (n, shown)
            }))
            .finish()
    }
}

/// Final header set for the exchange
///
/// Starts from `overrides`, adds `Authorization` when a credential is given
/// and none is set yet, then forces the JSON content type.
pub fn build_headers(overrides: &RequestHeaders, auth: Option<&str>) -> RequestHeaders {
    let mut headers = overrides.clone();
    if let Some(auth) = auth.filter(|a| !a.is_empty()) {
        if !headers.contains(AUTHORIZATION) {
            headers.insert(AUTHORIZATION, auth);
        }
    }
    headers.insert(CONTENT_TYPE, APPLICATION_JSON);
    headers
}
