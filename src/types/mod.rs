// Public modules
pub mod chat_completion;
pub mod message;
pub mod model;
pub mod model_list;
pub mod role;

// Re-exports
pub use chat_completion::{
    ChatCompletion, ChatCompletionChoice, ChatCompletionChunk, ChatCompletionChunkChoice,
    ChatCompletionDelta, ChatCompletionMessage, ChatCompletionRequest,
};
pub use message::Message;
pub use model::{KnownModel, Model};
pub use model_list::{ModelInfo, ModelList};
pub use role::Role;
