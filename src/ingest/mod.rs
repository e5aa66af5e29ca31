//! Document ingestion.
//!
//! This module provides:
//! - `DocumentLoader`: reads PDF, text, Markdown and JSON files from a folder
//! - `RecursiveTextSplitter`: cuts documents into overlapping chunks
//! - `IngestPipeline`: load, split, embed and upsert into a `VectorStore`

mod document;
mod loader;
mod pipeline;
pub mod samples;
mod splitter;

pub use document::{content_hash, Chunk, Document, DocumentKind, DocumentMetadata};
pub use loader::{DocumentLoader, LoadFailure, LoadReport, LoaderConfig};
pub use pipeline::{IngestPipeline, IngestReport};
pub use splitter::RecursiveTextSplitter;
