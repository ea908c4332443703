//! Server-Sent Events (SSE) processing for streaming responses.
//!
//! This module turns the raw byte stream of a streaming chat completion into a stream of text
//! fragments.  Each event carries a `data:` line holding a JSON chunk; the literal
//! `data: [DONE]` marks the end of the stream.

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};

use crate::types::ChatCompletionChunk;
use crate::{Error, Result};

/// One parsed event.
#[derive(Debug, Clone, PartialEq)]
enum SseEvent {
    Chunk(ChatCompletionChunk),
    Done,
    Skip,
}

/// Process a stream of bytes into a stream of text fragments.
///
/// Chunks without text (role announcements, finish markers, keep-alive comments) are skipped.
/// The stream ends at `[DONE]` or when the body ends.  Transport errors, malformed events and
/// error events are yielded as `Err`, after which the stream ends.
pub fn process_sse<S, E>(byte_stream: S) -> impl Stream<Item = Result<String>>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    // Convert transport errors to our error type
    let stream = byte_stream
        .map(|result| {
            result.map_err(|e| {
                Error::streaming(format!("Error in HTTP stream: {e}"), Some(Box::new(e)))
            })
        })
        .fuse();

    // Use a state machine to process the SSE stream
    let buffer = String::new();
    let pending = Vec::<u8>::new();

    stream::unfold(
        (stream, buffer, pending, false),
        move |(mut stream, mut buffer, mut pending, finished)| async move {
            if finished {
                return None;
            }
            loop {
                // First check if we have a complete event in the buffer
                while let Some((event, remaining)) = extract_event(&buffer) {
                    buffer = remaining;
                    match event {
                        Ok(SseEvent::Skip) => continue,
                        Ok(SseEvent::Done) => return None,
                        Ok(SseEvent::Chunk(chunk)) => match chunk.fragment() {
                            Some(text) if !text.is_empty() => {
                                let text = text.to_string();
                                return Some((Ok(text), (stream, buffer, pending, false)));
                            }
                            _ => continue,
                        },
                        Err(e) => return Some((Err(e), (stream, buffer, pending, true))),
                    }
                }

                // Read more data
                match stream.next().await {
                    Some(Ok(bytes)) => {
                        pending.extend_from_slice(&bytes);
                        match std::str::from_utf8(&pending) {
                            Ok(text) => {
                                push_text(&mut buffer, text);
                                pending.clear();
                            }
                            Err(e) if e.error_len().is_none() => {
                                // A multi-byte character is split across chunks.
                                let valid = e.valid_up_to();
                                let text = std::str::from_utf8(&pending[..valid])
                                    .unwrap_or_default()
                                    .to_string();
                                push_text(&mut buffer, &text);
                                pending.drain(..valid);
                            }
                            Err(e) => {
                                return Some((
                                    Err(Error::encoding(
                                        format!("Invalid UTF-8 in stream: {e}"),
                                        Some(Box::new(e)),
                                    )),
                                    (stream, buffer, pending, true),
                                ));
                            }
                        }
                    }
                    Some(Err(e)) => {
                        return Some((Err(e), (stream, buffer, pending, true)));
                    }
                    None => {
                        // End of stream; a final event may lack its blank line.
                        if !buffer.trim().is_empty() {
                            buffer.push_str("\n\n");
                            continue;
                        }
                        return None;
                    }
                }
            }
        },
    )
}

/// Appends `text` to the unparsed buffer with CRLF line endings folded to LF.
///
/// The whole buffer is folded, not just `text`, because a chunk may end between `\r` and `\n`.
fn push_text(buffer: &mut String, text: &str) {
    buffer.push_str(text);
    if buffer.contains("\r\n") {
        *buffer = buffer.replace("\r\n", "\n");
    }
}

/// Extract a complete SSE event from a buffer string.
///
/// Events are delimited by blank lines.  Within an event, `event:` names the event type and
/// `data:` lines carry the payload; comment lines (starting with `:`) are ignored.
fn extract_event(buffer: &str) -> Option<(Result<SseEvent>, String)> {
    let (event_text, rest) = buffer.split_once("\n\n")?;
    let rest = rest.to_string();

    let mut event_type = None;
    let mut data: Vec<&str> = Vec::new();
    for line in event_text.lines() {
        if let Some(value) = line.strip_prefix("event:") {
            event_type = Some(value.trim());
        } else if let Some(value) = line.strip_prefix("data:") {
            data.push(value.strip_prefix(' ').unwrap_or(value));
        }
    }
    let data = data.join("\n");

    if event_type == Some("error") {
        return Some((Err(stream_error(&data)), rest));
    }

    match data.trim() {
        "" => Some((Ok(SseEvent::Skip), rest)),
        "[DONE]" => Some((Ok(SseEvent::Done), rest)),
        json_str => {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(json_str)
                && value.get("error").is_some()
            {
                return Some((Err(stream_error(json_str)), rest));
            }
            match serde_json::from_str::<ChatCompletionChunk>(json_str) {
                Ok(chunk) => Some((Ok(SseEvent::Chunk(chunk)), rest)),
                Err(e) => Some((
                    Err(Error::serialization(
                        format!("Failed to parse event JSON: {e}"),
                        Some(Box::new(e)),
                    )),
                    rest,
                )),
            }
        }
    }
}

fn stream_error(data: &str) -> Error {
    let message = serde_json::from_str::<serde_json::Value>(data)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| data.to_string());
    Error::api(500, Some("stream_error".to_string()), message, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    type Chunk = std::result::Result<Bytes, std::io::Error>;

    fn chunk(text: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"index": 0, "delta": {"content": text}}]})
        )
    }

    async fn collect(parts: Vec<Vec<u8>>) -> Vec<Result<String>> {
        let stream = Box::pin(stream::iter(
            parts.into_iter().map(|p| Ok::<_, std::io::Error>(Bytes::from(p))),
        ));
        process_sse(stream).collect().await
    }

    #[tokio::test]
    async fn parse_fragments_until_done() {
        let body = format!(
            "data: {}\n\n{}{}data: [DONE]\n\n{}",
            serde_json::json!({"choices": [{"index": 0, "delta": {"role": "assistant", "content": ""}}]}),
            chunk("Hel"),
            chunk("lo"),
            chunk("ignored after done"),
        );
        let items = collect(vec![body.into_bytes()]).await;
        let texts: Vec<String> = items.into_iter().map(|i| i.unwrap()).collect();
        assert_eq!(texts, vec!["Hel".to_string(), "lo".to_string()]);
    }

    #[tokio::test]
    async fn handle_split_event() {
        let body = chunk("split");
        let (a, b) = body.as_bytes().split_at(7);
        let items = collect(vec![a.to_vec(), b.to_vec()]).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap(), "split");
    }

    #[tokio::test]
    async fn handle_split_multibyte_character() {
        let body = chunk("héllo");
        let bytes = body.as_bytes();
        let at = body.find('é').unwrap() + 1;
        let items = collect(vec![bytes[..at].to_vec(), bytes[at..].to_vec()]).await;
        assert_eq!(items[0].as_ref().unwrap(), "héllo");
    }

    #[tokio::test]
    async fn handle_crlf_and_comments() {
        let body = ": keep-alive\r\n\r\n".to_string() + &chunk("ok").replace('\n', "\r\n");
        let items = collect(vec![body.into_bytes()]).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap(), "ok");
    }

    #[tokio::test]
    async fn handle_crlf_delimiter_split_across_chunks() {
        let first = chunk("Hel").replace('\n', "\r\n");
        let second = chunk("lo").replace('\n', "\r\n");
        let (head, tail) = first.split_at(first.len() - 1);
        let items = collect(vec![
            head.as_bytes().to_vec(),
            (tail.to_string() + &second).into_bytes(),
        ])
        .await;
        let texts: Vec<String> = items.into_iter().map(|i| i.unwrap()).collect();
        assert_eq!(texts, vec!["Hel".to_string(), "lo".to_string()]);
    }

    #[tokio::test]
    async fn body_without_done_ends_normally() {
        let body = chunk("a") + &chunk("b").trim_end().to_string();
        let items = collect(vec![body.into_bytes()]).await;
        let texts: Vec<String> = items.into_iter().map(|i| i.unwrap()).collect();
        assert_eq!(texts, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn handle_malformed_event() {
        let items = collect(vec![b"data: {not json\n\n".to_vec()]).await;
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }

    #[tokio::test]
    async fn error_payload_ends_stream() {
        let body = chunk("partial")
            + "data: {\"error\": {\"message\": \"overloaded\", \"type\": \"server_error\"}}\n\n"
            + &chunk("never");
        let items = collect(vec![body.into_bytes()]).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "partial");
        let err = items[1].as_ref().unwrap_err();
        assert!(err.is_remote_service());
        assert!(err.to_string().contains("overloaded"));
    }

    #[tokio::test]
    async fn transport_error_is_streaming_error() {
        let parts: Vec<Chunk> = vec![
            Ok(Bytes::from(chunk("Hel"))),
            Err(std::io::Error::other("connection reset")),
        ];
        let items: Vec<Result<String>> = process_sse(Box::pin(stream::iter(parts))).collect().await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Err(Error::Streaming { .. })));
    }
}
