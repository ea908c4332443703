//! The line-based prompt loop behind `colloquy-prompt`.
//!
//! One conversation, kept in memory only.  Each line read is sent with the whole conversation so
//! far and the reply is printed once it is complete.  The literal `exit` (any case) or end of
//! input stops the loop.

use std::io::{BufRead, Write};

use futures::StreamExt;

use crate::config::ChatConfig;
use crate::error::{Error, Result};
use crate::gateway::{Completion, CompletionGateway, CompletionRequest};
use crate::log::MessageLog;
use crate::types::Role;

/// Greeting printed before the first prompt.
pub const WELCOME: &str = "Welcome to the colloquy assistant. Type 'exit' to quit.";

/// Runs the loop until `exit` or end of input and returns the conversation.
///
/// Service failures are printed as `An error occurred: ...` and the loop carries on; the user
/// message stays in the conversation.  Only I/O errors on `input` or `output` end the loop early.
pub async fn run_prompt_loop<G, R, W>(
    gateway: &G,
    config: &ChatConfig,
    mut input: R,
    mut output: W,
) -> Result<MessageLog>
where
    G: CompletionGateway + ?Sized,
    R: BufRead,
    W: Write,
{
    let mut log = MessageLog::new(config.system_prompt.clone());
    writeln!(output, "{WELCOME}\n")?;
    let mut line = String::new();
    loop {
        write!(output, "You: ")?;
        output.flush()?;
        line.clear();
        if input.read_line(&mut line)? == 0 {
            writeln!(output)?;
            break;
        }
        let text = line.trim_end_matches(['\r', '\n']);
        if text.trim().eq_ignore_ascii_case("exit") {
            writeln!(output, "Assistant: Goodbye!")?;
            break;
        }
        if text.trim().is_empty() {
            continue;
        }

        log.append(Role::User, text);
        match ask(gateway, config, &log).await {
            Ok(reply) => {
                writeln!(output, "Assistant: {reply}\n")?;
                log.append(Role::Assistant, reply);
            }
            Err(err) => {
                tracing::warn!(error = %err, "prompt request failed");
                writeln!(output, "An error occurred: {}", err.display_message())?;
            }
        }
    }
    Ok(log)
}

async fn ask<G: CompletionGateway + ?Sized>(
    gateway: &G,
    config: &ChatConfig,
    log: &MessageLog,
) -> Result<String> {
    let request = CompletionRequest {
        model: config.model.clone(),
        messages: log.snapshot(),
        max_tokens: config.max_tokens,
        temperature: config.temperature,
        stream: false,
    };
    let reply = fetch(gateway, request);
    let reply: Result<String> = match config.response_timeout {
        Some(limit) => tokio::time::timeout(limit, reply).await.map_err(|_| {
            Error::timeout(
                format!(
                    "no response from the service within {} seconds",
                    limit.as_secs()
                ),
                Some(limit.as_secs_f64()),
            )
        })?,
        None => reply.await,
    };
    Ok(reply?.trim().to_string())
}

async fn fetch<G: CompletionGateway + ?Sized>(
    gateway: &G,
    request: CompletionRequest,
) -> Result<String> {
    match gateway.complete(request).await? {
        Completion::Full(text) => Ok(text),
        Completion::Stream(mut stream) => {
            let mut text = String::new();
            while let Some(fragment) = stream.next().await {
                text.push_str(&fragment?);
            }
            Ok(text)
        }
    }
}
