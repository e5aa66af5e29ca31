mod openai;
mod provider;
mod types;

pub use openai::OpenAiChatModel;
pub use provider::ChatModel;
pub use types::{ChatMessage, ChatRequest};
