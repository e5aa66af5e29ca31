//! Question answering over the vector store.
//!
//! - `ChatBot`: retrieve, build a cited context, ask the chat model, keep history
//! - `run_repl`: interactive loop for the `chat` command
//! - `run_demo`: canned questions for the `demo` command

pub(crate) mod bot;
mod demo;
pub mod prompt;
mod repl;

pub use bot::{preview, ChatBot, ChatTurn, SourceRef};
pub use demo::{run_demo, DEMO_QUESTIONS};
pub use repl::run_repl;
