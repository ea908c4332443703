//! The boundary between sessions and the remote text-generation service.
//!
//! A [`CompletionGateway`] takes the full message log of a session and answers either with the
//! whole reply at once or with a [`FragmentStream`] of text pieces.  Every failure it reports is
//! a remote-service error (see [`Error::is_remote_service`]); callers treat those as
//! recoverable.

use std::pin::Pin;

use futures::Stream;

use crate::error::{Error, Result};
use crate::types::{ChatCompletionRequest, Model};

/// Models offered when the service cannot be asked for its list.
pub const FALLBACK_MODELS: [&str; 2] = ["gpt-3.5-turbo", "gpt-4"];

/// What a session sends to the gateway: model, messages, length limit, temperature and whether
/// to stream.
pub type CompletionRequest = ChatCompletionRequest;

/// Incremental text produced by a streaming completion.
///
/// The stream ends normally when the remote stream ends.  An `Err` item reports a failure part
/// way through; fragments yielded before it stand.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// The answer to a [`CompletionRequest`].
pub enum Completion {
    /// The whole reply.
    Full(String),
    /// The reply, piece by piece.
    Stream(FragmentStream),
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Completion::Full(text) => f.debug_tuple("Full").field(text).finish(),
            Completion::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// A remote chat-completion service.
#[async_trait::async_trait]
pub trait CompletionGateway: Send + Sync {
    /// Sends the request.
    ///
    /// When `request.stream` is set the gateway should answer with [`Completion::Stream`];
    /// otherwise with [`Completion::Full`].
    async fn complete(&self, request: CompletionRequest) -> Result<Completion>;

    /// Lists the model identifiers the service offers.
    ///
    /// Gateways that cannot enumerate models answer with [`FALLBACK_MODELS`].
    async fn list_models(&self) -> Result<Vec<String>> {
        Ok(FALLBACK_MODELS.iter().map(|m| m.to_string()).collect())
    }
}

/// Asks the gateway for its chat models.
///
/// Only identifiers containing `gpt` are kept, sorted and without duplicates.  Any failure, or an
/// empty result, falls back to [`FALLBACK_MODELS`].
///
/// # Example
///
/// ```rust
/// use colloquy::gateway::available_models;
/// use colloquy::gateway::scripted::ScriptedGateway;
///
/// # tokio_test::block_on(async {
/// let gateway = ScriptedGateway::default()
///     .with_models(vec!["whisper-1".to_string(), "gpt-4o".to_string()]);
/// assert_eq!(available_models(&gateway).await, vec!["gpt-4o".to_string()]);
/// # });
/// ```
pub async fn available_models(gateway: &dyn CompletionGateway) -> Vec<String> {
    let fallback = || FALLBACK_MODELS.iter().map(|m| m.to_string()).collect();
    match gateway.list_models().await {
        Ok(models) => {
            let mut models: Vec<String> = models.into_iter().filter(|m| m.contains("gpt")).collect();
            models.sort();
            models.dedup();
            if models.is_empty() {
                tracing::warn!("service listed no chat models; using fallback list");
                fallback()
            } else {
                models
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "failed to fetch models; using fallback list");
            fallback()
        }
    }
}

/// Picks `preferred` when the service offers it, otherwise the first offered model.
pub fn preferred_model(models: &[String], preferred: &Model) -> Model {
    if models.iter().any(|m| m == preferred.as_str()) {
        preferred.clone()
    } else {
        models
            .first()
            .map(|m| Model::from(m.as_str()))
            .unwrap_or_else(|| preferred.clone())
    }
}

pub mod scripted {
    //! A gateway that replays canned answers, for tests and offline runs.

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use futures::{StreamExt, stream};

    use super::*;

    /// One canned answer.
    #[derive(Debug, Clone)]
    pub enum Script {
        /// Answer with the whole text.
        Full(String),
        /// Stream these fragments, then end normally.
        Fragments(Vec<String>),
        /// Stream these fragments, then fail.
        FragmentsThenError(Vec<String>, Error),
        /// Fail before producing anything.
        Fail(Error),
        /// Stream these fragments, then never finish.
        Stall(Vec<String>),
    }

    /// Replays [`Script`]s in order and records every request it receives.
    #[derive(Debug, Default)]
    pub struct ScriptedGateway {
        scripts: Mutex<VecDeque<Script>>,
        requests: Mutex<Vec<CompletionRequest>>,
        models: Option<Vec<String>>,
    }

    impl ScriptedGateway {
        /// Creates a gateway that answers with `scripts`, one per request.
        pub fn new(scripts: impl IntoIterator<Item = Script>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into_iter().collect()),
                requests: Mutex::new(Vec::new()),
                models: None,
            }
        }

        /// Makes [`CompletionGateway::list_models`] answer with `models`.
        pub fn with_models(mut self, models: Vec<String>) -> Self {
            self.models = Some(models);
            self
        }

        /// Queues another answer.
        pub fn push(&self, script: Script) {
            self.scripts
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push_back(script);
        }

        /// Every request received so far.
        pub fn requests(&self) -> Vec<CompletionRequest> {
            self.requests
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone()
        }

        /// Number of requests received so far.
        pub fn call_count(&self) -> usize {
            self.requests
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .len()
        }
    }

    fn fragment_stream(
        fragments: Vec<String>,
    ) -> impl Stream<Item = Result<String>> + Send + 'static {
        stream::iter(fragments.into_iter().map(Ok))
    }

    #[async_trait::async_trait]
    impl CompletionGateway for ScriptedGateway {
        async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
            let streaming = request.stream;
            self.requests
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(request);
            let script = self
                .scripts
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .pop_front();
            let Some(script) = script else {
                return Err(Error::api(
                    500,
                    Some("scripted_gateway".to_string()),
                    "no scripted response left".to_string(),
                    None,
                ));
            };
            match script {
                Script::Fail(err) => Err(err),
                Script::Full(text) if streaming => {
                    Ok(Completion::Stream(Box::pin(fragment_stream(vec![text]))))
                }
                Script::Full(text) => Ok(Completion::Full(text)),
                Script::Fragments(fragments) if !streaming => {
                    Ok(Completion::Full(fragments.concat()))
                }
                Script::Fragments(fragments) => {
                    Ok(Completion::Stream(Box::pin(fragment_stream(fragments))))
                }
                Script::FragmentsThenError(fragments, err) => Ok(Completion::Stream(Box::pin(
                    fragment_stream(fragments).chain(stream::once(async move { Err(err) })),
                ))),
                Script::Stall(fragments) => Ok(Completion::Stream(Box::pin(
                    fragment_stream(fragments).chain(stream::pending()),
                ))),
            }
        }

        async fn list_models(&self) -> Result<Vec<String>> {
            match &self.models {
                Some(models) => Ok(models.clone()),
                None => Err(Error::connection("model listing unavailable", None)),
            }
        }
    }
}
