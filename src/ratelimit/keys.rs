//! Composite key derivation and skip rules.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::REMOTE_ADDR_LOOKUP;

use super::request::RequestDescriptor;

/// A static request dimension composed with the client identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Path,
    Method,
}

/// A header-based exemption rule.
///
/// Matches when the header is present and, if `value` is set, equal to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderMatch {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
}

/// A custom exemption predicate. Must be side-effect-free.
pub type SkipPredicate = Arc<dyn Fn(&RequestDescriptor) -> bool + Send + Sync>;

/// Where the base client identity comes from.
#[derive(Debug, Clone)]
enum LookupSource {
    RemoteAddr,
    Header(String),
}

/// Derives the ordered key-sets a request is limited under, and decides
/// whether a request is exempt from limiting entirely.
pub struct KeyExtractor {
    lookup: LookupSource,
    dimensions: Vec<Vec<Dimension>>,
    skip_paths: Vec<String>,
    skip_headers: Vec<HeaderMatch>,
    skip_predicate: Option<SkipPredicate>,
}

impl KeyExtractor {
    /// Create an extractor.
    ///
    /// `lookup_key` is either a header name or the [`REMOTE_ADDR_LOOKUP`]
    /// sentinel. Each entry of `dimensions` yields one additional key-set
    /// composed of the identity plus the listed dimensions; the bare
    /// identity key-set is always produced first.
    pub fn new(
        lookup_key: &str,
        dimensions: Vec<Vec<Dimension>>,
        skip_paths: Vec<String>,
        skip_headers: Vec<HeaderMatch>,
    ) -> Self {
        let lookup = if lookup_key == REMOTE_ADDR_LOOKUP {
            LookupSource::RemoteAddr
        } else {
            LookupSource::Header(lookup_key.to_string())
        };

        Self {
            lookup,
            dimensions,
            skip_paths,
            skip_headers,
            skip_predicate: None,
        }
    }

    /// Install a custom exemption predicate.
    pub fn set_skip_predicate(&mut self, predicate: SkipPredicate) {
        self.skip_predicate = Some(predicate);
    }

    /// Whether the request is exempt from limiting.
    ///
    /// Evaluated before any bucket lookup and touches no bucket state.
    pub fn should_skip(&self, request: &RequestDescriptor) -> bool {
        if self.skip_paths.iter().any(|p| p == &request.path) {
            return true;
        }

        for rule in &self.skip_headers {
            match (request.header(&rule.name), &rule.value) {
                (Some(found), Some(expected)) if found == expected => return true,
                (Some(_), None) => return true,
                _ => {}
            }
        }

        if let Some(predicate) = &self.skip_predicate {
            if predicate(request) {
                return true;
            }
        }

        false
    }

    /// The base client identity for a request.
    ///
    /// A configured header that is absent falls back to the remote
    /// address, so a client cannot escape limiting by omitting it.
    pub fn identity(&self, request: &RequestDescriptor) -> String {
        match &self.lookup {
            LookupSource::RemoteAddr => request.remote_addr.clone(),
            LookupSource::Header(name) => request
                .header(name)
                .map(str::to_string)
                .unwrap_or_else(|| request.remote_addr.clone()),
        }
    }

    /// The ordered key-sets this request is limited under.
    pub fn derive_key_sets(&self, request: &RequestDescriptor) -> Vec<Vec<String>> {
        let identity = self.identity(request);

        let mut key_sets = Vec::with_capacity(1 + self.dimensions.len());
        key_sets.push(vec![identity.clone()]);

        for dims in &self.dimensions {
            let mut keys = Vec::with_capacity(1 + dims.len());
            keys.push(identity.clone());
            for dim in dims {
                keys.push(match dim {
                    Dimension::Path => request.path.clone(),
                    Dimension::Method => request.method.clone(),
                });
            }
            key_sets.push(keys);
        }

        key_sets
    }
}
