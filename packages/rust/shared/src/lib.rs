//! Shared types, error model, and configuration for sitekb.
//!
//! This crate is the foundation depended on by all other sitekb crates.
//! It provides:
//! - [`SiteKbError`]: the unified error type
//! - Domain types ([`KnowledgeBaseEntry`], [`PageRecord`], [`ChunkRecord`],
//!   [`KbId`], [`KbStatus`])
//! - Configuration ([`AppConfig`], [`CrawlConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ChunkConfig, ChunkingSection, CrawlConfig, CrawlSection, EmbeddingSection,
    IndexSection, RetrievalSection, config_dir, config_file_path, init_config, load_config,
    load_config_from, validate_api_key,
};
pub use error::{Result, SiteKbError};
pub use types::{
    ChunkRecord, Datapoint, KbId, KbStatus, KnowledgeBaseEntry, Neighbor, PageRecord,
    RetrievedChunk, chunk_id,
};
