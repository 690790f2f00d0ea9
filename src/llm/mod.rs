pub mod anthropic;
pub mod openai;
pub mod provider;
pub mod registry;
pub mod types;

pub use provider::LlmProvider;
pub use registry::ProviderRegistry;
pub use types::{ChatMessage, ChatRequest, Role};
