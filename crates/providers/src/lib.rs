pub mod openai_compat;
pub mod traits;
pub(crate) mod util;

// Re-exports for convenience.
pub use openai_compat::OpenAiCompatEngine;
pub use traits::{ChatRequest, ChatResponse, CompletionEngine, Usage};
