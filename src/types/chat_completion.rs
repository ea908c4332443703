//! Wire types for the chat-completions endpoint.

use serde::{Deserialize, Serialize};

use crate::types::{Message, Model, Role};

/// Request body for `POST chat/completions`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatCompletionRequest {
    /// The model that should answer.
    pub model: Model,

    /// The conversation so far, oldest first.
    pub messages: Vec<Message>,

    /// Maximum number of tokens to generate.
    pub max_tokens: u32,

    /// Sampling temperature.
    pub temperature: f32,

    /// Whether to answer with a server-sent event stream.
    pub stream: bool,
}

/// A complete, non-streaming chat completion.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatCompletion {
    /// Identifier assigned by the service.
    #[serde(default)]
    pub id: Option<String>,

    /// Candidate answers; only the first is used.
    pub choices: Vec<ChatCompletionChoice>,
}

/// One candidate answer of a [`ChatCompletion`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatCompletionChoice {
    /// Position of the choice.
    #[serde(default)]
    pub index: u32,

    /// The generated message.
    pub message: ChatCompletionMessage,

    /// Why generation stopped.
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// The message inside a [`ChatCompletionChoice`].
///
/// `content` may be null when the model produced no text.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatCompletionMessage {
    /// The author of the message.
    pub role: Role,

    /// The generated text.
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatCompletion {
    /// The text of the first choice, if there is one.
    pub fn text(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
    }
}

/// One event of a streamed chat completion.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatCompletionChunk {
    /// Identifier assigned by the service.
    #[serde(default)]
    pub id: Option<String>,

    /// Incremental updates to each choice.
    #[serde(default)]
    pub choices: Vec<ChatCompletionChunkChoice>,
}

/// The update to one choice carried by a [`ChatCompletionChunk`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatCompletionChunkChoice {
    /// Position of the choice.
    #[serde(default)]
    pub index: u32,

    /// The new text for the choice.
    pub delta: ChatCompletionDelta,

    /// Why generation stopped, on the final chunk.
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Incremental message content.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChatCompletionDelta {
    /// Present on the first chunk only.
    #[serde(default)]
    pub role: Option<Role>,

    /// The next fragment of text.
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatCompletionChunk {
    /// The text fragment for the first choice, if this chunk carries one.
    pub fn fragment(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.delta.content.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::KnownModel;
    use serde_json::json;

    #[test]
    fn request_serialization() {
        let request = ChatCompletionRequest {
            model: Model::Known(KnownModel::Gpt4),
            messages: vec![Message::system("Be brief."), Message::user("Hi")],
            max_tokens: 1000,
            temperature: 0.5,
            stream: true,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            json!({
                "model": "gpt-4",
                "messages": [
                    {"role": "system", "content": "Be brief."},
                    {"role": "user", "content": "Hi"}
                ],
                "max_tokens": 1000,
                "temperature": 0.5,
                "stream": true
            })
        );
    }

    #[test]
    fn completion_text() {
        let completion: ChatCompletion = serde_json::from_value(json!({
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Hello there."},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 9, "completion_tokens": 3, "total_tokens": 12}
        }))
        .unwrap();
        assert_eq!(completion.text(), Some("Hello there."));
    }

    #[test]
    fn completion_without_choices_has_no_text() {
        let completion: ChatCompletion = serde_json::from_value(json!({"choices": []})).unwrap();
        assert_eq!(completion.text(), None);
    }

    #[test]
    fn chunk_fragment() {
        let first: ChatCompletionChunk = serde_json::from_value(json!({
            "id": "chatcmpl-123",
            "choices": [{"index": 0, "delta": {"role": "assistant", "content": ""}, "finish_reason": null}]
        }))
        .unwrap();
        assert_eq!(first.fragment(), Some(""));

        let last: ChatCompletionChunk = serde_json::from_value(json!({
            "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]
        }))
        .unwrap();
        assert_eq!(last.fragment(), None);
    }
}
