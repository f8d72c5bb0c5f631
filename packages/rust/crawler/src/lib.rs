//! Fetch-side building blocks for the crawl orchestrator.
//!
//! This crate provides:
//! - [`politeness`] — per-domain parallelism and pacing gate
//! - [`dedup`] — job-scoped URL claim set and URL normalization
//! - [`fetch`] — HTTP fetcher producing [`PageRecord`](intelgraph_shared::PageRecord)s
//! - [`content`] — HTML title/text/link extraction

pub mod content;
pub mod dedup;
pub mod fetch;
pub mod politeness;

pub use content::{MAX_CONTENT_CHARS, ParsedPage, parse_page, truncate_chars};
pub use dedup::{DedupIndex, normalize_str, normalize_url};
pub use fetch::{Fetcher, compute_hash, is_private_target};
pub use politeness::{PolitenessLimiter, PolitenessPermit};
