//! Request matching keys.
//!
//! A [`RequestMatcher`] is the (method, URL) key used to correlate outgoing
//! requests with expectations and scripted responses. URLs are canonicalized
//! so that lookups are exact-key:
//!
//! - scheme and host are lower-cased
//! - default ports are dropped
//! - the fragment is dropped
//! - query pairs are decoded and sorted
//!
//! Whether the query participates in matching is decided by [`QueryMatching`].
//! Canonicalization never fails: strings that do not parse as URLs fall back
//! to the raw text with query and fragment split off.

use crate::types::{HttpMethod, NetworkRequest};
use serde::{Deserialize, Serialize};

/// How the query string takes part in request matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMatching {
    /// Match on scheme, host, port and path only.
    #[default]
    Ignore,
    /// Query pairs must also match (order-insensitive).
    Exact,
}

impl std::fmt::Display for QueryMatching {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ignore => write!(f, "ignore"),
            Self::Exact => write!(f, "exact"),
        }
    }
}

impl std::str::FromStr for QueryMatching {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ignore" => Ok(Self::Ignore),
            "exact" => Ok(Self::Exact),
            other => Err(format!("unknown query matching mode: {other}")),
        }
    }
}

/// Structural (method, canonical URL) key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestMatcher {
    method: HttpMethod,
    url: String,
    query: Vec<(String, String)>,
}

impl RequestMatcher {
    pub fn new(method: HttpMethod, url: &str) -> Self {
        let (url, query) = canonicalize(url);
        Self { method, url, query }
    }

    pub fn get(url: &str) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post(url: &str) -> Self {
        Self::new(HttpMethod::Post, url)
    }

    /// Matcher describing an outgoing request.
    pub fn from_request(request: &NetworkRequest) -> Self {
        Self::new(request.method, &request.url)
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    /// Canonical URL without query or fragment.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Sorted, decoded query pairs.
    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    /// The key actually used for lookups under `mode`.
    #[must_use]
    pub fn project(&self, mode: QueryMatching) -> Self {
        match mode {
            QueryMatching::Exact => self.clone(),
            QueryMatching::Ignore => Self {
                method: self.method,
                url: self.url.clone(),
                query: Vec::new(),
            },
        }
    }

    /// Whether `request` falls under this matcher.
    pub fn matches(&self, request: &NetworkRequest, mode: QueryMatching) -> bool {
        self.project(mode) == Self::from_request(request).project(mode)
    }
}

impl std::fmt::Display for RequestMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.url)?;
        for (index, (key, value)) in self.query.iter().enumerate() {
            let separator = if index == 0 { '?' } else { '&' };
            write!(f, "{separator}{key}={value}")?;
        }
        Ok(())
    }
}

fn canonicalize(raw: &str) -> (String, Vec<(String, String)>) {
    let trimmed = raw.trim();
    match url::Url::parse(trimmed) {
        Ok(mut parsed) => {
            let mut query: Vec<(String, String)> = parsed
                .query_pairs()
                .map(|(key, value)| (key.into_owned(), value.into_owned()))
                .collect();
            query.sort();
            parsed.set_query(None);
            parsed.set_fragment(None);
            (parsed.to_string(), query)
        }
        Err(_) => {
            let without_fragment = trimmed.split('#').next().unwrap_or_default();
            let (base, raw_query) = without_fragment
                .split_once('?')
                .unwrap_or((without_fragment, ""));
            let mut query: Vec<(String, String)> = raw_query
                .split('&')
                .filter(|pair| !pair.is_empty())
                .map(|pair| {
                    let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                    (key.to_string(), value.to_string())
                })
                .collect();
            query.sort();
            (base.to_string(), query)
        }
    }
}
