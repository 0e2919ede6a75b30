//! Web crawling and content extraction for sitekb.
//!
//! This crate provides:
//! - [`extract`]: HTML boilerplate stripping and link extraction
//! - [`engine`]: Concurrent, domain-scoped BFS crawler

pub mod engine;
pub mod extract;

pub use engine::{CrawlSummary, Crawler};
pub use extract::{ExtractedPage, extract_page};
