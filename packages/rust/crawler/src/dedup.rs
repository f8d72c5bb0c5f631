//! Job-scoped URL deduplication.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use url::Url;

/// Set of normalized URLs already claimed by one job.
#[derive(Debug, Default)]
pub struct DedupIndex {
    seen: Mutex<HashSet<String>>,
}

impl DedupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `normalized_url`. Exactly one caller per URL gets `true`.
    pub fn try_claim(&self, normalized_url: &str) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(normalized_url.to_string())
    }

    pub fn contains(&self, normalized_url: &str) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(normalized_url)
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Normalize a URL for deduplication.
///
/// Parsing already lower-cases scheme and host and drops default ports; this
/// additionally strips the fragment and rejects anything that is not an
/// http(s) URL with a host.
pub fn normalize_url(url: &Url) -> Option<String> {
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    if url.host_str().is_none_or(str::is_empty) {
        return None;
    }
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    Some(normalized.to_string())
}

/// Parse and normalize a raw URL string.
pub fn normalize_str(raw: &str) -> Option<String> {
    Url::parse(raw.trim()).ok().as_ref().and_then(normalize_url)
}
