//! Embeddings and vector index management for sitekb.
//!
//! This crate provides:
//! - [`embedding`]: the [`Embedder`] trait with HTTP and deterministic
//!   local implementations
//! - [`index`]: the [`VectorIndexService`] seam and the [`IndexManager`]
//!   that provisions per-KB resources idempotently
//! - [`local`]: an in-process exact-scan backend with JSON persistence

pub mod embedding;
pub mod index;
pub mod local;

pub use embedding::{Embedder, HashEmbedder, HttpEmbedder};
pub use index::{IndexHandle, IndexManager, Provisioned, VectorIndexService};
pub use local::LocalVectorService;
