//! Sequencing of user turns against the completion gateway.
//!
//! A [`SessionController`] owns the [`SessionStore`] and the notion of a current session.  A
//! submitted message is appended and persisted right away; the reply is produced by a spawned
//! task that reports back over a channel of [`TurnEvent`]s.  The front end feeds those events to
//! [`SessionController::apply`] on its own task, so the store and the presenter are only ever
//! touched from one place.
//!
//! At most one turn is outstanding at a time.  While it is, submitting, creating or selecting a
//! session is rejected with [`Error::Busy`].

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{FutureExt, StreamExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::config::ChatConfig;
use crate::error::{Error, Result};
use crate::gateway::{Completion, CompletionGateway, CompletionRequest};
use crate::observability::{
    STREAM_DURATION, STREAM_ERRORS, STREAM_FRAGMENTS, TURNS_CANCELLED, TURNS_COMPLETED,
    TURNS_FAILED, TURNS_REJECTED, TURNS_STARTED,
};
use crate::presenter::Presenter;
use crate::session::{Session, SessionId, SessionState, display_name, local_now};
use crate::store::SessionStore;
use crate::types::{Message, Model, Role};

/// Progress of an outstanding turn, as reported by its worker task.
#[derive(Debug)]
pub enum TurnEvent {
    /// A piece of the streamed reply.
    Fragment { turn: u64, text: String },
    /// The reply ended.  `text` holds the whole reply when it was not streamed.
    Completed { turn: u64, text: Option<String> },
    /// The reply failed.  Fragments delivered before this stand.
    Failed { turn: u64, error: Error },
}

impl TurnEvent {
    /// The turn this event belongs to.
    pub fn turn(&self) -> u64 {
        match self {
            TurnEvent::Fragment { turn, .. }
            | TurnEvent::Completed { turn, .. }
            | TurnEvent::Failed { turn, .. } => *turn,
        }
    }
}

struct PendingTurn {
    turn: u64,
    session: SessionId,
    buffer: String,
    begun: bool,
    started: Instant,
    task: JoinHandle<()>,
}

/// Drives sessions: input validation, persistence and reply sequencing.
pub struct SessionController<G: CompletionGateway + ?Sized + 'static> {
    gateway: Arc<G>,
    store: SessionStore,
    config: ChatConfig,
    current: SessionId,
    pending: Option<PendingTurn>,
    next_turn: u64,
    events: UnboundedSender<TurnEvent>,
    startup_error: Option<Error>,
}

impl<G: CompletionGateway + ?Sized + 'static> SessionController<G> {
    /// Creates a controller over `store`.
    ///
    /// An empty store gets a fresh session, which is saved; otherwise the oldest session becomes
    /// current.  A failed save keeps the session in memory and is reported by the first
    /// [`SessionController::show`].  The returned receiver carries the [`TurnEvent`]s to hand to
    /// [`SessionController::apply`].
    pub fn new(
        gateway: Arc<G>,
        mut store: SessionStore,
        config: ChatConfig,
    ) -> Result<(Self, UnboundedReceiver<TurnEvent>)> {
        let mut startup_error = None;
        let current = match store.first_id() {
            Some(id) => id.clone(),
            None => {
                let session = Session::new(
                    SessionId::from_time(local_now()),
                    &config.system_prompt,
                );
                let id = session.id.clone();
                store.insert(session)?;
                if let Err(err) = store.save() {
                    tracing::warn!(error = %err, "could not save the new session");
                    startup_error = Some(err);
                }
                id
            }
        };
        let (events, receiver) = mpsc::unbounded_channel();
        let controller = Self {
            gateway,
            store,
            config,
            current,
            pending: None,
            next_turn: 0,
            events,
            startup_error,
        };
        Ok((controller, receiver))
    }

    /// Shows the session list and the current transcript.
    pub fn show(&mut self, presenter: &mut dyn Presenter) {
        if let Some(err) = self.startup_error.take() {
            presenter.render_error(&err.display_message());
        }
        self.refresh_sessions(presenter);
        self.render_transcript(presenter);
    }

    /// The current session.
    pub fn current(&self) -> &Session {
        // Sessions are never removed, so `current` always resolves.
        match self.store.get(&self.current) {
            Some(session) => session,
            None => unreachable!("current session {} missing", self.current),
        }
    }

    /// The id of the current session.
    pub fn current_id(&self) -> &SessionId {
        &self.current
    }

    /// The sessions, in creation order.
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// The model used for new turns.
    pub fn model(&self) -> &Model {
        &self.config.model
    }

    /// Changes the model used for new turns.  An outstanding turn keeps its model.
    pub fn set_model(&mut self, model: Model) {
        tracing::debug!(model = %model, "model changed");
        self.config.model = model;
    }

    /// Whether a turn is outstanding.
    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    /// Whether `id` is waiting on the gateway.
    pub fn state(&self, id: &SessionId) -> SessionState {
        match &self.pending {
            Some(pending) if &pending.session == id => SessionState::AwaitingResponse,
            _ => SessionState::Idle,
        }
    }

    fn ensure_idle(&self, action: &str) -> Result<()> {
        if self.pending.is_some() {
            TURNS_REJECTED.click();
            return Err(Error::busy(format!(
                "cannot {action} while a response is in progress"
            )));
        }
        Ok(())
    }

    /// Starts a new session and makes it current.
    ///
    /// The session is persisted immediately.  A failed save is shown through the presenter and
    /// the session is kept in memory.
    pub fn new_session(&mut self, presenter: &mut dyn Presenter) -> Result<SessionId> {
        self.ensure_idle("start a new chat")?;
        let store = &self.store;
        let id = SessionId::unique_from_time(local_now(), |id| store.contains(id));
        self.store
            .insert(Session::new(id.clone(), &self.config.system_prompt))?;
        self.current = id.clone();
        tracing::info!(session = %id, "created session");
        self.persist(presenter);
        presenter.clear_transcript();
        self.show(presenter);
        Ok(id)
    }

    /// Makes `id` the current session and shows its transcript.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown id, leaving the current session unchanged.
    pub fn select_session(&mut self, id: &SessionId, presenter: &mut dyn Presenter) -> Result<()> {
        self.ensure_idle("switch chats")?;
        if !self.store.contains(id) {
            return Err(Error::not_found(
                format!("no chat with id {id}"),
                Some("session".to_string()),
                Some(id.to_string()),
            ));
        }
        self.current = id.clone();
        tracing::debug!(session = %id, "selected session");
        presenter.clear_transcript();
        self.show(presenter);
        Ok(())
    }

    /// Sends `text` as the next user message of the current session.
    ///
    /// The message is appended and saved before the gateway is asked; the first message of a
    /// session also names it.  The reply arrives as [`TurnEvent`]s for turn number returned here.
    ///
    /// # Errors
    ///
    /// Blank input is a validation error and [`Error::Busy`] is returned while another turn is
    /// outstanding.  Neither changes anything.
    pub fn submit(&mut self, text: &str, presenter: &mut dyn Presenter) -> Result<u64> {
        if text.trim().is_empty() {
            return Err(Error::validation(
                "message is empty",
                Some("message".to_string()),
            ));
        }
        self.ensure_idle("send a message")?;

        let id = self.current.clone();
        let session = self.store.get_mut(&id).ok_or_else(|| {
            Error::not_found(
                format!("no chat with id {id}"),
                Some("session".to_string()),
                Some(id.to_string()),
            )
        })?;
        session.log.append(Role::User, text);
        let named = session.log.is_first_exchange();
        if named {
            session.name = display_name(text, local_now());
        }
        let request = CompletionRequest {
            model: self.config.model.clone(),
            messages: session.log.snapshot(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream: self.config.streaming,
        };

        presenter.render_message(&Message::user(text));
        if named {
            self.refresh_sessions(presenter);
        }
        self.persist(presenter);

        self.next_turn += 1;
        let turn = self.next_turn;
        let task = tokio::spawn(guard_turn(
            Arc::clone(&self.gateway),
            request,
            turn,
            self.config.response_timeout,
            self.events.clone(),
        ));
        self.pending = Some(PendingTurn {
            turn,
            session: id.clone(),
            buffer: String::new(),
            begun: false,
            started: Instant::now(),
            task,
        });
        TURNS_STARTED.click();
        tracing::debug!(session = %id, turn, "turn started");
        Ok(turn)
    }

    /// Submits whatever the presenter holds as input, using its selected model if it has one.
    pub fn submit_input(&mut self, presenter: &mut dyn Presenter) -> Result<u64> {
        if let Some(model) = presenter.selected_model() {
            if &model != self.model() {
                self.set_model(model);
            }
        }
        let text = presenter.take_input();
        self.submit(&text, presenter)
    }

    /// Applies one event from the worker channel and returns the resulting state of the session
    /// the turn belongs to.
    ///
    /// Events from turns that were cancelled or already finished are ignored.
    pub fn apply(&mut self, event: TurnEvent, presenter: &mut dyn Presenter) -> SessionState {
        let Some(mut pending) = self.pending.take() else {
            tracing::debug!(turn = event.turn(), "ignoring event for a finished turn");
            return SessionState::Idle;
        };
        if pending.turn != event.turn() {
            tracing::debug!(turn = event.turn(), "ignoring event for a stale turn");
            self.pending = Some(pending);
            return SessionState::Idle;
        }
        match event {
            TurnEvent::Fragment { text, .. } => {
                if !pending.begun {
                    presenter.begin_assistant();
                    pending.begun = true;
                }
                presenter.append_fragment(&text);
                pending.buffer.push_str(&text);
                self.pending = Some(pending);
                SessionState::AwaitingResponse
            }
            TurnEvent::Completed { text, .. } => {
                match text {
                    Some(text) => {
                        let message = Message::assistant(text);
                        presenter.render_message(&message);
                        self.append_reply(&pending.session, message.content);
                    }
                    None => {
                        if !pending.begun {
                            presenter.begin_assistant();
                        }
                        presenter.finish_assistant();
                        STREAM_DURATION.add(pending.started.elapsed().as_secs_f64());
                        self.append_reply(&pending.session, pending.buffer);
                    }
                }
                TURNS_COMPLETED.click();
                tracing::debug!(session = %pending.session, turn = pending.turn, "turn completed");
                self.persist(presenter);
                SessionState::Idle
            }
            TurnEvent::Failed { error, .. } => {
                TURNS_FAILED.click();
                tracing::warn!(session = %pending.session, turn = pending.turn, error = %error, "turn failed");
                self.settle_partial(pending, presenter);
                presenter.render_error(&error.display_message());
                SessionState::Idle
            }
        }
    }

    /// Applies events from `events` until the outstanding turn ends.
    pub async fn drive(
        &mut self,
        events: &mut UnboundedReceiver<TurnEvent>,
        presenter: &mut dyn Presenter,
    ) -> SessionState {
        while self.pending.is_some() {
            let Some(event) = events.recv().await else {
                break;
            };
            self.apply(event, presenter);
        }
        SessionState::Idle
    }

    /// Abandons the outstanding turn, if any.
    ///
    /// Text streamed so far is kept as the assistant reply.  Returns false when nothing was
    /// outstanding.
    pub fn cancel(&mut self, presenter: &mut dyn Presenter) -> bool {
        let Some(pending) = self.pending.take() else {
            return false;
        };
        pending.task.abort();
        TURNS_CANCELLED.click();
        tracing::info!(session = %pending.session, turn = pending.turn, "turn cancelled");
        self.settle_partial(pending, presenter);
        presenter.render_info("[response cancelled]");
        true
    }

    fn settle_partial(&mut self, pending: PendingTurn, presenter: &mut dyn Presenter) {
        if pending.begun {
            presenter.finish_assistant();
        }
        if !pending.buffer.is_empty() {
            self.append_reply(&pending.session, pending.buffer);
            self.persist(presenter);
        }
    }

    fn append_reply(&mut self, id: &SessionId, text: String) {
        match self.store.get_mut(id) {
            Some(session) => session.log.append(Role::Assistant, text),
            None => tracing::error!(session = %id, "reply for a session that no longer exists"),
        }
    }

    fn persist(&self, presenter: &mut dyn Presenter) {
        if let Err(err) = self.store.save() {
            presenter.render_error(&err.display_message());
        }
    }

    fn refresh_sessions(&self, presenter: &mut dyn Presenter) {
        let sessions: Vec<(SessionId, String)> = self
            .store
            .list_sessions()
            .map(|(id, name)| (id.clone(), name.to_string()))
            .collect();
        presenter.refresh_sessions(&sessions, &self.current);
    }

    fn render_transcript(&self, presenter: &mut dyn Presenter) {
        for message in self.current().log.iter() {
            if message.role != Role::System {
                presenter.render_message(message);
            }
        }
    }
}

impl<G: CompletionGateway + ?Sized + 'static> Drop for SessionController<G> {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.task.abort();
        }
    }
}

async fn with_timeout<F: Future>(limit: Option<Duration>, future: F) -> Result<F::Output> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, future).await.map_err(|_| {
            Error::timeout(
                format!(
                    "no response from the service within {} seconds",
                    limit.as_secs()
                ),
                Some(limit.as_secs_f64()),
            )
        }),
        None => Ok(future.await),
    }
}

/// Runs [`run_turn`], reporting a panic in the gateway as a failed turn so the turn always ends.
async fn guard_turn<G: CompletionGateway + ?Sized>(
    gateway: Arc<G>,
    request: CompletionRequest,
    turn: u64,
    limit: Option<Duration>,
    events: UnboundedSender<TurnEvent>,
) {
    let worker = run_turn(gateway, request, turn, limit, events.clone());
    if AssertUnwindSafe(worker).catch_unwind().await.is_err() {
        STREAM_ERRORS.click();
        tracing::error!(turn, "response task panicked");
        let _ = events.send(TurnEvent::Failed {
            turn,
            error: Error::streaming("the response task stopped unexpectedly", None),
        });
    }
}

/// Asks the gateway for one reply and reports progress on `events`.
///
/// `limit` bounds the wait for the initial answer and for every fragment after it.
async fn run_turn<G: CompletionGateway + ?Sized>(
    gateway: Arc<G>,
    request: CompletionRequest,
    turn: u64,
    limit: Option<Duration>,
    events: UnboundedSender<TurnEvent>,
) {
    let completion = match with_timeout(limit, gateway.complete(request)).await {
        Ok(Ok(completion)) => completion,
        Ok(Err(error)) | Err(error) => {
            let _ = events.send(TurnEvent::Failed { turn, error });
            return;
        }
    };
    let mut stream = match completion {
        Completion::Full(text) => {
            let _ = events.send(TurnEvent::Completed {
                turn,
                text: Some(text),
            });
            return;
        }
        Completion::Stream(stream) => stream,
    };
    loop {
        match with_timeout(limit, stream.next()).await {
            Ok(Some(Ok(text))) => {
                STREAM_FRAGMENTS.click();
                if events.send(TurnEvent::Fragment { turn, text }).is_err() {
                    return;
                }
            }
            Ok(Some(Err(error))) | Err(error) => {
                STREAM_ERRORS.click();
                let _ = events.send(TurnEvent::Failed { turn, error });
                return;
            }
            Ok(None) => {
                let _ = events.send(TurnEvent::Completed { turn, text: None });
                return;
            }
        }
    }
}
