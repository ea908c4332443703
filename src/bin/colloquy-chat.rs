//! Interactive chat with saved sessions.
//!
//! This binary provides a streaming REPL over an OpenAI-compatible chat-completions service.
//! Every conversation is saved to a JSON file and can be resumed later.
//!
//! # Usage
//!
//! ```bash
//! # Basic usage with default settings (reads OPENAI_API_KEY, also from .env)
//! colloquy-chat
//!
//! # Specify a model and a different store
//! colloquy-chat --model gpt-4o --store ~/chats.json
//!
//! # Wait for whole replies and disable colors
//! colloquy-chat --no-stream --no-color
//! ```
//!
//! # Commands
//!
//! - `/new` - Start a new chat
//! - `/list` - List saved chats
//! - `/select <id>` - Switch to a saved chat
//! - `/model [name]` - Show or change the model
//! - `/quit` - Exit the application
//!
//! Ctrl-C while a reply is streaming stops it; the text received so far is kept.

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::sync::mpsc;

use colloquy::commands::{ChatCommand, help_text, parse_command};
use colloquy::gateway::{available_models, preferred_model};
use colloquy::observability::init_logging;
use colloquy::{
    ChatArgs, ChatClient, ChatConfig, Error, Model, Presenter, SessionController, SessionStore,
    TerminalPresenter,
};

/// Main entry point for the colloquy-chat application.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    init_logging();

    let (args, _) = ChatArgs::from_command_line_relaxed("colloquy-chat [OPTIONS]");
    let config = ChatConfig::try_from(args)?;
    let mut presenter = TerminalPresenter::with_color(config.use_color);

    let client = match ChatClient::with_options(None, config.base_url.clone(), None) {
        Ok(client) => Arc::new(client),
        Err(err) => {
            presenter.render_error(&err.to_string());
            std::process::exit(2);
        }
    };
    let store = open_store(&config.store_path)?;

    let models = available_models(client.as_ref()).await;
    let (mut controller, mut events) = SessionController::new(client, store, config)?;
    let model = preferred_model(&models, controller.model());
    if &model != controller.model() {
        presenter.render_info(&format!(
            "{} is not offered by the service; using {model}",
            controller.model()
        ));
        controller.set_model(model);
    }

    println!("Colloquy (model: {})", controller.model());
    println!("Type /help for commands, /quit to exit\n");
    controller.show(&mut presenter);

    let (mut lines, prompt) = spawn_line_reader();
    let mut awaiting_line = false;
    let request_line = |awaiting_line: &mut bool| {
        if !*awaiting_line {
            *awaiting_line = prompt.send(()).is_ok();
        }
    };

    // Ctrl-C while a reply streams cancels it; at the prompt rustyline sees it first.
    let (interrupt_tx, mut interrupts) = mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.send(());
    })?;

    request_line(&mut awaiting_line);
    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                controller.apply(event, &mut presenter);
                if !controller.is_busy() {
                    request_line(&mut awaiting_line);
                }
            }
            Some(()) = interrupts.recv() => {
                if controller.cancel(&mut presenter) {
                    request_line(&mut awaiting_line);
                }
            }
            line = lines.recv() => {
                awaiting_line = false;
                match line {
                    None => break,
                    Some(Ok(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            request_line(&mut awaiting_line);
                            continue;
                        }
                        if let Some(command) = parse_command(line) {
                            if !run_command(command, &mut controller, &mut presenter, &models) {
                                println!("Goodbye!");
                                break;
                            }
                            request_line(&mut awaiting_line);
                            continue;
                        }
                        presenter.stage_input(line);
                        if let Err(err) = controller.submit_input(&mut presenter) {
                            presenter.render_error(&err.display_message());
                            request_line(&mut awaiting_line);
                        }
                    }
                    Some(Err(ReadlineError::Interrupted)) => {
                        // Ctrl+C at prompt - soft interrupt
                        println!();
                        request_line(&mut awaiting_line);
                    }
                    Some(Err(ReadlineError::Eof)) => {
                        // Ctrl+D - exit
                        println!("\nGoodbye!");
                        break;
                    }
                    Some(Err(err)) => {
                        presenter.render_error(&format!("Input error: {err}"));
                        break;
                    }
                }
            }
        }
    }

    controller.cancel(&mut presenter);
    Ok(())
}

type LineResult = Result<String, ReadlineError>;

/// Reads lines on a dedicated thread, one per request sent on the returned prompt channel.
fn spawn_line_reader() -> (
    mpsc::UnboundedReceiver<LineResult>,
    std::sync::mpsc::Sender<()>,
) {
    let (line_tx, line_rx) = mpsc::unbounded_channel();
    let (prompt_tx, prompt_rx) = std::sync::mpsc::channel::<()>();
    std::thread::spawn(move || {
        let mut rl = match DefaultEditor::new() {
            Ok(rl) => rl,
            Err(err) => {
                let _ = line_tx.send(Err(err));
                return;
            }
        };
        while prompt_rx.recv().is_ok() {
            let line = rl.readline("You: ");
            if let Ok(line) = &line {
                let _ = rl.add_history_entry(line.as_str());
            }
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });
    (line_rx, prompt_tx)
}

/// Runs a slash command.  Returns false when the user asked to quit.
fn run_command(
    command: ChatCommand,
    controller: &mut SessionController<ChatClient>,
    presenter: &mut TerminalPresenter,
    models: &[String],
) -> bool {
    let result = match command {
        ChatCommand::Quit => return false,
        ChatCommand::Help => {
            for line in help_text().lines() {
                println!("    {}", line);
            }
            Ok(())
        }
        ChatCommand::New => controller.new_session(presenter).map(|_| ()),
        ChatCommand::List => {
            print_sessions(controller);
            Ok(())
        }
        ChatCommand::Select(id) => controller.select_session(&id, presenter),
        ChatCommand::Model(None) => {
            presenter.render_info(&format!("Model: {}", controller.model()));
            Ok(())
        }
        ChatCommand::Model(Some(name)) => {
            let model = Model::from(name);
            if !models.iter().any(|m| m == model.as_str()) {
                presenter.render_info(&format!(
                    "{model} is not in the service's model list; trying it anyway"
                ));
            }
            presenter.render_info(&format!("Model changed to: {model}"));
            controller.set_model(model);
            Ok(())
        }
        ChatCommand::Models => {
            println!("    Models:");
            for model in models {
                let marker = if model == controller.model().as_str() {
                    "*"
                } else {
                    " "
                };
                println!("    {marker} {model}");
            }
            Ok(())
        }
        ChatCommand::Invalid(message) => Err(Error::validation(message, None)),
    };
    if let Err(err) = result {
        presenter.render_error(&err.display_message());
    }
    true
}

fn print_sessions(controller: &SessionController<ChatClient>) {
    println!("    Chats:");
    for (id, name) in controller.store().list_sessions() {
        let marker = if id == controller.current_id() {
            "*"
        } else {
            " "
        };
        println!("    {marker} {id}  {name}");
    }
}

/// Loads the session store, offering to move an unreadable file aside.
fn open_store(path: &Path) -> Result<SessionStore, Error> {
    let err = match SessionStore::load(path) {
        Ok(store) => return Ok(store),
        Err(err) if err.is_persistence() && path.exists() => err,
        Err(err) => return Err(err),
    };
    eprintln!("{err}");
    eprint!("Move the unreadable file aside and start with no saved chats? [y/N] ");
    io::stderr().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    if !answer.trim().eq_ignore_ascii_case("y") {
        return Err(err);
    }
    let moved = SessionStore::quarantine(path)?;
    eprintln!("Moved {} to {}", path.display(), moved.display());
    SessionStore::load(path)
}
