//! Configuration types for the chat front ends.
//!
//! This module provides CLI argument parsing via `arrrg` and the resolved [`ChatConfig`] that the
//! session controller and the prompt loop read their settings from.

use std::path::PathBuf;
use std::time::Duration;

use arrrg_derive::CommandLine;

use crate::error::{Error, Result};
use crate::types::{KnownModel, Model};

/// Default system prompt placed at the start of every new conversation.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are ChatGPT, a helpful assistant.";

/// Default maximum tokens per response.
const DEFAULT_MAX_TOKENS: u32 = 1000;

/// Default sampling temperature.
const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Default file holding saved sessions.
const DEFAULT_STORE_PATH: &str = "chats.json";

/// Default time to wait for the service to start or continue a reply.
const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(120);

/// Command-line arguments shared by the colloquy binaries.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ChatArgs {
    /// Model to use for chat.
    #[arrrg(optional, "Model to use (default: gpt-4)", "MODEL")]
    pub model: Option<String>,

    /// System prompt for new conversations.
    #[arrrg(optional, "System prompt for new conversations", "PROMPT")]
    pub system: Option<String>,

    /// Maximum tokens per response.
    #[arrrg(optional, "Max tokens per response (default: 1000)", "TOKENS")]
    pub max_tokens: Option<u32>,

    /// Sampling temperature, kept as text until validated.
    #[arrrg(optional, "Sampling temperature between 0 and 2 (default: 0.7)", "TEMP")]
    pub temperature: Option<String>,

    /// Path of the session store.
    #[arrrg(optional, "Session store file (default: chats.json)", "PATH")]
    pub store: Option<String>,

    /// Base URL of the chat-completions service.
    #[arrrg(optional, "Service base URL (default: https://api.openai.com/v1/)", "URL")]
    pub base_url: Option<String>,

    /// Seconds to wait for the service before giving up on a reply.
    #[arrrg(optional, "Response timeout in seconds, 0 to wait forever (default: 120)", "SECS")]
    pub timeout: Option<u64>,

    /// Wait for whole replies instead of streaming them.
    #[arrrg(flag, "Disable streaming responses")]
    pub no_stream: bool,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,
}

/// Resolved configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatConfig {
    /// The model to use for generating responses.
    pub model: Model,

    /// System prompt placed at the start of new conversations.
    pub system_prompt: String,

    /// Maximum tokens per response.
    pub max_tokens: u32,

    /// Sampling temperature.
    pub temperature: f32,

    /// Whether replies are streamed.
    pub streaming: bool,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,

    /// File holding saved sessions.
    pub store_path: PathBuf,

    /// Service base URL; `None` uses the client's default.
    pub base_url: Option<String>,

    /// How long to wait for the service to start or continue a reply.
    /// `None` waits forever.
    pub response_timeout: Option<Duration>,
}

impl ChatConfig {
    /// Creates a new ChatConfig with default values.
    ///
    /// Defaults:
    /// - Model: gpt-4
    /// - Max tokens: 1000
    /// - Temperature: 0.7
    /// - Streaming: enabled
    /// - Store: chats.json
    /// - Response timeout: 120 seconds
    pub fn new() -> Self {
        Self {
            model: Model::Known(KnownModel::Gpt4),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            streaming: true,
            use_color: true,
            store_path: PathBuf::from(DEFAULT_STORE_PATH),
            base_url: None,
            response_timeout: Some(DEFAULT_RESPONSE_TIMEOUT),
        }
    }

    /// Sets the model to use.
    pub fn with_model(mut self, model: Model) -> Self {
        self.model = model;
        self
    }

    /// Sets the system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Sets the maximum tokens per response.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Sets the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Enables or disables streaming.
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Disables ANSI color output.
    pub fn without_color(mut self) -> Self {
        self.use_color = false;
        self
    }

    /// Sets the session store path.
    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = path.into();
        self
    }

    /// Sets the service base URL.
    pub fn with_base_url(mut self, base_url: Option<String>) -> Self {
        self.base_url = base_url;
        self
    }

    /// Sets the response timeout.
    pub fn with_response_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.response_timeout = timeout;
        self
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<ChatArgs> for ChatConfig {
    type Error = Error;

    fn try_from(args: ChatArgs) -> Result<Self> {
        let mut config = ChatConfig::new();
        if let Some(model) = args.model {
            config.model = Model::from(model);
        }
        if let Some(system) = args.system {
            config.system_prompt = system;
        }
        if let Some(max_tokens) = args.max_tokens {
            if max_tokens == 0 {
                return Err(Error::validation(
                    "max tokens must be positive",
                    Some("max-tokens".to_string()),
                ));
            }
            config.max_tokens = max_tokens;
        }
        if let Some(temperature) = args.temperature {
            config.temperature = parse_temperature(&temperature)?;
        }
        if let Some(store) = args.store {
            config.store_path = PathBuf::from(store);
        }
        config.base_url = args.base_url;
        if let Some(secs) = args.timeout {
            config.response_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        config.streaming = !args.no_stream;
        config.use_color = !args.no_color;
        Ok(config)
    }
}

fn parse_temperature(text: &str) -> Result<f32> {
    let invalid = || {
        Error::validation(
            format!("temperature must be a number between 0 and 2, got {text:?}"),
            Some("temperature".to_string()),
        )
    };
    let value: f32 = text.trim().parse().map_err(|_| invalid())?;
    if !(0.0..=2.0).contains(&value) {
        return Err(invalid());
    }
    Ok(value)
}
