//! Chat-completion plumbing: message types, the service client and the
//! run-scoped conversation store.

pub mod client;
pub mod conversation;
pub mod types;

pub use client::{CompletionClient, OpenAiClient};
pub use conversation::ConversationStore;
pub use types::{ChatMessage, Role};
