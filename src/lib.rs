// Public modules
pub mod client;
pub mod commands;
pub mod config;
pub mod controller;
pub mod error;
pub mod gateway;
pub mod log;
pub mod observability;
pub mod presenter;
pub mod prompt;
pub mod session;
pub mod sse;
pub mod store;
pub mod types;

// Re-exports
pub use client::ChatClient;
pub use config::{ChatArgs, ChatConfig};
pub use controller::{SessionController, TurnEvent};
pub use error::{Error, Result};
pub use gateway::{Completion, CompletionGateway, CompletionRequest, FragmentStream};
pub use log::MessageLog;
pub use observability::register_biometrics;
pub use presenter::{Presenter, TerminalPresenter};
pub use session::{Session, SessionId, SessionState};
pub use store::SessionStore;
pub use types::*;
