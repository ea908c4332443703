//! Output for the session controller.
//!
//! The controller never prints.  It reports what happened through a [`Presenter`], which decides
//! how a message, a streamed fragment or an error looks on screen.

use std::collections::VecDeque;
use std::io::{self, Write};

use crate::session::SessionId;
use crate::types::{Message, Model, Role};

/// ANSI escape code for bold text (used for speaker labels).
const ANSI_BOLD: &str = "\x1b[1m";

/// ANSI escape code for dim text (used for informational lines).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// ANSI escape code for cyan text (used for the assistant label).
const ANSI_CYAN: &str = "\x1b[36m";

/// ANSI escape code for green text (used for the user label).
const ANSI_GREEN: &str = "\x1b[32m";

/// ANSI escape code for red text (used for errors).
const ANSI_RED: &str = "\x1b[31m";

/// Trait for showing a conversation to the user.
///
/// This abstraction allows for different front ends:
/// - A terminal transcript with ANSI styling
/// - The same without styling (for piping/redirecting)
/// - An in-memory recording for tests
pub trait Presenter {
    /// Shows a whole message.
    fn render_message(&mut self, message: &Message);

    /// Called before the first fragment of a streamed assistant reply.
    fn begin_assistant(&mut self) {}

    /// Shows a piece of the assistant reply as it arrives.
    fn append_fragment(&mut self, text: &str);

    /// Called when a streamed assistant reply ends, normally or not.
    fn finish_assistant(&mut self) {}

    /// Shows an error.  The text is already phrased for the user.
    fn render_error(&mut self, error: &str);

    /// Shows an informational line.
    fn render_info(&mut self, info: &str);

    /// Shows the session list with the current session marked.
    fn refresh_sessions(&mut self, sessions: &[(SessionId, String)], current: &SessionId) {
        _ = sessions;
        _ = current;
    }

    /// Empties the visible transcript before another session is shown.
    fn clear_transcript(&mut self) {}

    /// Takes the pending user input, leaving the input empty.
    fn take_input(&mut self) -> String;

    /// The model picked in the front end, if it offers a choice.
    fn selected_model(&self) -> Option<Model> {
        None
    }
}

///////////////////////////////////////// Terminal /////////////////////////////////////////

/// Terminal presenter with optional ANSI styling.
///
/// Messages are written to stdout as `You: ...` and `Assistant: ...` lines; errors go to stderr.
/// A line typed at the terminal is already on screen, so the user message it becomes is not
/// printed a second time.  User messages replayed from a saved transcript are.
pub struct TerminalPresenter {
    out: Box<dyn Write + Send>,
    use_color: bool,
    input: Option<String>,
    echoed: Option<String>,
    mid_reply: bool,
}

impl TerminalPresenter {
    /// Creates a new TerminalPresenter with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a new TerminalPresenter with specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self::with_writer(io::stdout(), use_color)
    }

    /// Creates a TerminalPresenter that writes the transcript to `out` instead of stdout.
    pub fn with_writer(out: impl Write + Send + 'static, use_color: bool) -> Self {
        Self {
            out: Box::new(out),
            use_color,
            input: None,
            echoed: None,
            mid_reply: false,
        }
    }

    /// Hands a line read from the terminal to the next [`Presenter::take_input`] call.
    pub fn stage_input(&mut self, line: impl Into<String>) {
        self.input = Some(line.into());
    }

    /// Flushes stdout to ensure immediate display of streamed content.
    fn flush(&mut self) {
        let _ = self.out.flush();
    }

    fn label(&self, role: Role) -> String {
        let (name, color) = match role {
            Role::User => ("You", ANSI_GREEN),
            Role::Assistant => ("Assistant", ANSI_CYAN),
            Role::System => ("System", ANSI_DIM),
        };
        if self.use_color {
            format!("{ANSI_BOLD}{color}{name}:{ANSI_RESET} ")
        } else {
            format!("{name}: ")
        }
    }

    fn end_reply_line(&mut self) {
        if self.mid_reply {
            let _ = writeln!(self.out);
            self.mid_reply = false;
        }
    }
}

impl Default for TerminalPresenter {
    fn default() -> Self {
        Self::new()
    }
}

impl Presenter for TerminalPresenter {
    fn render_message(&mut self, message: &Message) {
        self.end_reply_line();
        if message.role == Role::User
            && self.echoed.take().is_some_and(|typed| typed == message.content)
        {
            return;
        }
        let label = self.label(message.role);
        let _ = writeln!(self.out, "{label}{}", message.content);
        self.flush();
    }

    fn begin_assistant(&mut self) {
        self.end_reply_line();
        let label = self.label(Role::Assistant);
        let _ = write!(self.out, "{label}");
        self.mid_reply = true;
        self.flush();
    }

    fn append_fragment(&mut self, text: &str) {
        let _ = write!(self.out, "{text}");
        self.flush();
    }

    fn finish_assistant(&mut self) {
        self.end_reply_line();
        self.flush();
    }

    fn render_error(&mut self, error: &str) {
        self.end_reply_line();
        if self.use_color {
            eprintln!("{ANSI_RED}{error}{ANSI_RESET}");
        } else {
            eprintln!("{error}");
        }
    }

    fn render_info(&mut self, info: &str) {
        self.end_reply_line();
        let _ = if self.use_color {
            writeln!(self.out, "{ANSI_DIM}{info}{ANSI_RESET}")
        } else {
            writeln!(self.out, "{info}")
        };
        self.flush();
    }

    fn refresh_sessions(&mut self, sessions: &[(SessionId, String)], current: &SessionId) {
        if let Some((_, name)) = sessions.iter().find(|(id, _)| id == current) {
            self.render_info(&format!("[{current}] {name}"));
        }
    }

    fn clear_transcript(&mut self) {
        self.end_reply_line();
        self.echoed = None;
        let _ = writeln!(self.out);
    }

    fn take_input(&mut self) -> String {
        let line = self.input.take().unwrap_or_default();
        self.echoed = Some(line.clone());
        line
    }
}

///////////////////////////////////////// Recording /////////////////////////////////////////

/// One call made on a [`RecordingPresenter`].
#[derive(Debug, Clone, PartialEq)]
pub enum Presented {
    Message(Message),
    BeginAssistant,
    Fragment(String),
    FinishAssistant,
    Error(String),
    Info(String),
    Sessions(Vec<(SessionId, String)>, SessionId),
    Clear,
}

/// Presenter that keeps everything it is shown in memory.
///
/// Used by tests and by headless runs that inspect the transcript afterwards.
#[derive(Debug, Default)]
pub struct RecordingPresenter {
    /// Every call in order.
    pub events: Vec<Presented>,
    inputs: VecDeque<String>,
    model: Option<Model>,
}

impl RecordingPresenter {
    /// Creates an empty recording.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a line for [`Presenter::take_input`].
    pub fn push_input(&mut self, line: impl Into<String>) {
        self.inputs.push_back(line.into());
    }

    /// Sets the model reported by [`Presenter::selected_model`].
    pub fn select_model(&mut self, model: Model) {
        self.model = Some(model);
    }

    /// The concatenated fragments of every streamed reply.
    pub fn streamed_text(&self) -> String {
        self.events
            .iter()
            .filter_map(|event| match event {
                Presented::Fragment(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Every error shown so far.
    pub fn errors(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Presented::Error(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Every whole message shown so far.
    pub fn messages(&self) -> Vec<&Message> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Presented::Message(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    /// The most recent session list.
    pub fn last_sessions(&self) -> Option<&[(SessionId, String)]> {
        self.events.iter().rev().find_map(|event| match event {
            Presented::Sessions(sessions, _) => Some(sessions.as_slice()),
            _ => None,
        })
    }

    /// Forgets everything recorded so far.
    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl Presenter for RecordingPresenter {
    fn render_message(&mut self, message: &Message) {
        self.events.push(Presented::Message(message.clone()));
    }

    fn begin_assistant(&mut self) {
        self.events.push(Presented::BeginAssistant);
    }

    fn append_fragment(&mut self, text: &str) {
        self.events.push(Presented::Fragment(text.to_string()));
    }

    fn finish_assistant(&mut self) {
        self.events.push(Presented::FinishAssistant);
    }

    fn render_error(&mut self, error: &str) {
        self.events.push(Presented::Error(error.to_string()));
    }

    fn render_info(&mut self, info: &str) {
        self.events.push(Presented::Info(info.to_string()));
    }

    fn refresh_sessions(&mut self, sessions: &[(SessionId, String)], current: &SessionId) {
        self.events
            .push(Presented::Sessions(sessions.to_vec(), current.clone()));
    }

    fn clear_transcript(&mut self) {
        self.events.push(Presented::Clear);
    }

    fn take_input(&mut self) -> String {
        self.inputs.pop_front().unwrap_or_default()
    }

    fn selected_model(&self) -> Option<Model> {
        self.model.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::config::ChatConfig;
    use crate::controller::SessionController;
    use crate::gateway::scripted::{Script, ScriptedGateway};
    use crate::session::Session;
    use crate::store::SessionStore;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn session(id: &str, exchange: &[(&str, &str)]) -> Session {
        let mut session = Session::new(SessionId::new(id), "You are terse.");
        for (question, answer) in exchange {
            session.log.append(Role::User, *question);
            session.log.append(Role::Assistant, *answer);
        }
        session
    }

    #[test]
    fn replayed_transcript_shows_both_speakers() {
        let mut store = SessionStore::in_memory();
        store
            .insert(session("20240101000000", &[("What is Rust?", "A language.")]))
            .unwrap();
        store
            .insert(session("20240102000000", &[("And Go?", "Another one.")]))
            .unwrap();
        let gateway = Arc::new(ScriptedGateway::default());
        let (mut controller, _events) =
            SessionController::new(gateway, store, ChatConfig::new()).unwrap();
        let buffer = SharedBuffer::default();
        let mut presenter = TerminalPresenter::with_writer(buffer.clone(), false);

        controller.show(&mut presenter);
        let shown = buffer.text();
        assert!(shown.contains("You: What is Rust?\n"), "{shown}");
        assert!(shown.contains("Assistant: A language.\n"), "{shown}");

        controller
            .select_session(&SessionId::new("20240102000000"), &mut presenter)
            .unwrap();
        let shown = buffer.text();
        assert!(shown.contains("You: And Go?\nAssistant: Another one.\n"), "{shown}");
        assert!(!shown.contains("You: You are terse."), "{shown}");
    }

    #[tokio::test]
    async fn typed_line_is_not_echoed_twice() {
        let gateway = Arc::new(ScriptedGateway::new([Script::Full("Hi".to_string())]));
        let config = ChatConfig::new().with_streaming(false);
        let (mut controller, mut events) =
            SessionController::new(gateway, SessionStore::in_memory(), config).unwrap();
        let buffer = SharedBuffer::default();
        let mut presenter = TerminalPresenter::with_writer(buffer.clone(), false);

        presenter.stage_input("Hello");
        controller.submit_input(&mut presenter).unwrap();
        controller.drive(&mut events, &mut presenter).await;
        let shown = buffer.text();
        assert!(!shown.contains("You: Hello"), "{shown}");
        assert!(shown.contains("Assistant: Hi\n"), "{shown}");

        let id = controller.current_id().clone();
        controller.select_session(&id, &mut presenter).unwrap();
        let shown = buffer.text();
        assert!(shown.contains("You: Hello\nAssistant: Hi\n"), "{shown}");
    }

    #[test]
    fn presenter_default_has_color() {
        let presenter = TerminalPresenter::new();
        assert!(presenter.use_color);
    }

    #[test]
    fn presenter_without_color_uses_plain_labels() {
        let presenter = TerminalPresenter::with_color(false);
        assert_eq!(presenter.label(Role::Assistant), "Assistant: ");
        assert_eq!(presenter.label(Role::User), "You: ");
    }

    #[test]
    fn staged_input_is_taken_once() {
        let mut presenter = TerminalPresenter::with_color(false);
        presenter.stage_input("hello");
        assert_eq!(presenter.take_input(), "hello");
        assert_eq!(presenter.take_input(), "");
    }

    #[test]
    fn recording_presenter_collects_calls() {
        let mut presenter = RecordingPresenter::new();
        presenter.push_input("first");
        presenter.select_model(Model::from("gpt-4o"));
        presenter.begin_assistant();
        presenter.append_fragment("Hel");
        presenter.append_fragment("lo");
        presenter.finish_assistant();
        presenter.render_error("API Error: boom");

        assert_eq!(presenter.take_input(), "first");
        assert_eq!(presenter.take_input(), "");
        assert_eq!(presenter.selected_model(), Some(Model::from("gpt-4o")));
        assert_eq!(presenter.streamed_text(), "Hello");
        assert_eq!(presenter.errors(), vec!["API Error: boom"]);
        assert_eq!(presenter.events.len(), 5);
    }
}
