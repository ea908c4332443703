//! Minimal line-based chat without saved sessions.
//!
//! Each line typed is sent together with the conversation so far; the reply is printed once it
//! is complete.  Type `exit` to quit.
//!
//! # Usage
//!
//! ```bash
//! colloquy-prompt
//! colloquy-prompt --model gpt-4o --temperature 0.2
//! echo "Summarize Rust's ownership rules" | colloquy-prompt
//! ```

use std::io;

use arrrg::CommandLine;

use colloquy::observability::init_logging;
use colloquy::prompt::run_prompt_loop;
use colloquy::{ChatArgs, ChatClient, ChatConfig};

/// Main entry point for the colloquy-prompt tool.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    init_logging();

    let (args, _) = ChatArgs::from_command_line_relaxed("colloquy-prompt [OPTIONS]");
    let config = ChatConfig::try_from(args)?;

    let client = match ChatClient::with_options(None, config.base_url.clone(), None) {
        Ok(client) => client,
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(2);
        }
    };

    run_prompt_loop(&client, &config, io::stdin().lock(), io::stdout().lock()).await?;
    Ok(())
}
