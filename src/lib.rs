pub mod chat;
pub mod cli;
pub mod core;
pub mod embedding;
pub mod ingest;
pub mod llm;
pub mod server;
pub mod state;
pub mod store;
pub mod vector_math;
