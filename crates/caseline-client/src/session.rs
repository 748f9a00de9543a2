//! Session event loop.
//!
//! The [`Session`] owns the sans-IO state machines and runs the single
//! task on which all state mutation happens: commands from the host UI,
//! socket events, background REST task results, and timers all funnel
//! into one `select!` loop. Concurrency is overlapping awaits, never
//! parallel mutation.
//!
//! REST calls run as spawned tasks reporting back over an internal
//! channel, so a slow fetch for one thread cannot delay socket frames for
//! another — and so the inbox's stale-fetch guard has something real to
//! guard against.

use std::sync::Arc;
use std::time::Duration;

use caseline_core::{
    ClientError, ConnectionManager, ConnectionStatus, FetchTicket, Inbox, InboxAction,
    LaunchTarget, MergeEngine, SocketAction, TypingTracker, TypingUser, Viewer,
};
use caseline_proto::{
    Dialect, Draft, InboundFrame, Message, MessageId, NewThread, OutboundFrame, Thread, ThreadId,
};
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::auth::TokenProvider;
use crate::config::Endpoints;
use crate::rest::{ApiError, ThreadApi};
use crate::transport::{self, SocketEvent, SocketHandle};

/// Session tuning knobs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Frame-name convention for this portal surface.
    pub dialect: Dialect,
    /// When false the session runs poll-only (no socket).
    pub realtime_enabled: bool,
    /// Message poll interval for the active thread.
    pub message_poll: Duration,
    /// Thread-list poll interval.
    pub thread_poll: Duration,
    /// Granularity of the typing debounce/expiry timers.
    pub typing_tick: Duration,
    /// Delay before the follow-up fetch that picks up server-side
    /// attachment metadata after an attachment send.
    pub attachment_follow_up: Duration,
    /// Message page size for the initial load.
    pub page_size: u32,
    /// Deep-link target from the view's launch parameters.
    pub launch_target: Option<LaunchTarget>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            dialect: Dialect::CLIENT_PORTAL,
            realtime_enabled: true,
            message_poll: Duration::from_secs(4),
            thread_poll: Duration::from_secs(7),
            typing_tick: Duration::from_millis(500),
            attachment_follow_up: Duration::from_secs(1),
            page_size: 50,
            launch_target: None,
        }
    }
}

/// Commands from the host UI.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    /// Make a thread the active selection.
    SelectThread(ThreadId),
    /// Send the composed draft on the active thread.
    Send(Draft),
    /// The compose input changed (drives typing indicators).
    InputChanged {
        /// Current input text.
        text: String,
    },
    /// Create a thread and select it.
    CreateThread(NewThread),
    /// Delete a thread.
    DeleteThread(ThreadId),
    /// Re-fetch the thread list now.
    Refresh,
    /// Tear everything down and end the session.
    Shutdown,
}

/// State pushed to the host UI.
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    /// The thread list changed (ordering, summaries, unread counts).
    Threads(Vec<Thread>),
    /// The active thread's message list changed.
    Messages {
        /// Thread the list belongs to.
        thread: ThreadId,
        /// Full merged list, ascending by created timestamp.
        messages: Vec<Message>,
    },
    /// Connection health changed.
    Connection(ConnectionStatus),
    /// The set of users typing in the active thread changed.
    Typing(Vec<TypingUser>),
    /// A send failed everywhere; restore this draft to the compose input.
    DraftRestored(Draft),
    /// The deep-link launch parameter was consumed; clear it from the URL.
    LaunchTargetConsumed,
    /// A user-visible error.
    Error(ClientError),
}

/// Results reported by spawned REST tasks and the socket dialer.
enum TaskResult {
    Threads(Result<Vec<Thread>, ApiError>),
    Messages {
        ticket: FetchTicket,
        result: Result<Vec<Message>, ApiError>,
    },
    Sent {
        thread: ThreadId,
        temp: MessageId,
        had_attachment: bool,
        result: Result<Message, ApiError>,
    },
    ThreadCreated(Result<Thread, ApiError>),
    ThreadDeleted {
        thread: ThreadId,
        result: Result<(), ApiError>,
    },
    MarkedRead {
        thread: ThreadId,
        result: Result<(), ApiError>,
    },
    SocketConnected {
        thread: ThreadId,
        result: Result<SocketHandle, transport::TransportError>,
    },
}

/// One messaging session: the event loop that reconciles REST, socket,
/// and local state for a viewer.
pub struct Session {
    api: Arc<dyn ThreadApi>,
    endpoints: Endpoints,
    tokens: Arc<dyn TokenProvider>,
    viewer: Viewer,
    config: SessionConfig,

    inbox: Inbox,
    merge: Option<MergeEngine>,
    typing: TypingTracker<Instant>,
    connection: ConnectionManager,

    socket: Option<SocketHandle>,
    reconnect_at: Option<Instant>,
    follow_up: Option<(ThreadId, Instant)>,
    threads_in_flight: bool,
    messages_in_flight: bool,

    tasks_tx: mpsc::Sender<TaskResult>,
    tasks_rx: mpsc::Receiver<TaskResult>,
    updates: mpsc::Sender<SessionUpdate>,
    commands: mpsc::Receiver<SessionCommand>,
}

/// Channels the host uses to talk to a running session.
pub struct SessionHandles {
    /// Send commands here.
    pub commands: mpsc::Sender<SessionCommand>,
    /// Receive state updates here.
    pub updates: mpsc::Receiver<SessionUpdate>,
}

impl Session {
    /// Build a session. Call [`Session::run`] on its own task.
    pub fn new(
        api: Arc<dyn ThreadApi>,
        endpoints: Endpoints,
        tokens: Arc<dyn TokenProvider>,
        viewer: Viewer,
        config: SessionConfig,
    ) -> (Self, SessionHandles) {
        let (commands_tx, commands_rx) = mpsc::channel(32);
        let (updates_tx, updates_rx) = mpsc::channel(256);
        let (tasks_tx, tasks_rx) = mpsc::channel(64);
        let session = Self {
            api,
            endpoints,
            tokens,
            viewer,
            inbox: Inbox::new(config.launch_target.clone()),
            merge: None,
            typing: TypingTracker::new(),
            connection: ConnectionManager::new(config.realtime_enabled),
            socket: None,
            reconnect_at: None,
            follow_up: None,
            threads_in_flight: false,
            messages_in_flight: false,
            tasks_tx,
            tasks_rx,
            updates: updates_tx,
            commands: commands_rx,
            config,
        };
        (session, SessionHandles { commands: commands_tx, updates: updates_rx })
    }

    /// Run until [`SessionCommand::Shutdown`] or the command channel
    /// closes. All timers and the socket are torn down on exit.
    pub async fn run(mut self) {
        self.spawn_thread_list();

        let mut message_poll = tokio::time::interval(self.config.message_poll);
        let mut thread_poll = tokio::time::interval(self.config.thread_poll);
        let mut typing_tick = tokio::time::interval(self.config.typing_tick);
        // The first interval tick fires immediately; the initial fetch
        // above already covers it.
        message_poll.tick().await;
        thread_poll.tick().await;

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        None | Some(SessionCommand::Shutdown) => break,
                        Some(command) => self.handle_command(command),
                    }
                },
                Some(result) = self.tasks_rx.recv() => self.handle_task(result),
                Some(event) = recv_socket(&mut self.socket) => self.handle_socket(event),
                _ = message_poll.tick() => self.poll_messages(),
                _ = thread_poll.tick() => {
                    if !self.threads_in_flight {
                        self.spawn_thread_list();
                    }
                },
                _ = typing_tick.tick() => self.handle_typing_tick(),
                _ = sleep_until_opt(self.reconnect_at) => {
                    self.reconnect_at = None;
                    let actions = self.connection.reconnect_due();
                    self.run_socket_actions(actions);
                },
                _ = sleep_until_opt(self.follow_up.as_ref().map(|(_, at)| *at)) => {
                    self.handle_follow_up();
                },
            }
        }

        // Teardown: normal-closure the socket and let timers drop.
        let actions = self.connection.disconnect();
        self.run_socket_actions(actions);
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::SelectThread(thread) => {
                let actions = self.inbox.select(thread);
                self.run_inbox_actions(actions);
                self.emit_threads();
            },
            SessionCommand::Send(draft) => self.handle_send(draft),
            SessionCommand::InputChanged { text } => {
                if !self.connection.can_send() {
                    return;
                }
                let non_empty = !text.trim().is_empty();
                if let Some(is_typing) = self.typing.local_input(Instant::now(), non_empty) {
                    self.send_frame(&OutboundFrame::Typing { is_typing });
                }
            },
            SessionCommand::CreateThread(new) => {
                let api = Arc::clone(&self.api);
                let tx = self.tasks_tx.clone();
                tokio::spawn(async move {
                    let result = api.create_thread(&new).await;
                    let _ = tx.send(TaskResult::ThreadCreated(result)).await;
                });
            },
            SessionCommand::DeleteThread(thread) => {
                let api = Arc::clone(&self.api);
                let tx = self.tasks_tx.clone();
                tokio::spawn(async move {
                    let result = api.delete_thread(&thread).await;
                    let _ = tx.send(TaskResult::ThreadDeleted { thread, result }).await;
                });
            },
            SessionCommand::Refresh => {
                if !self.threads_in_flight {
                    self.spawn_thread_list();
                }
            },
            // Handled by the loop.
            SessionCommand::Shutdown => {},
        }
    }

    /// Send path: optimistic entry first, then socket when possible,
    /// REST otherwise. Attachment sends always take REST.
    fn handle_send(&mut self, draft: Draft) {
        let Some(merge) = &mut self.merge else {
            self.emit(SessionUpdate::Error(ClientError::Validation("no active thread".into())));
            return;
        };

        let temp = match merge.begin_send(draft, &self.viewer, Utc::now()) {
            Ok(temp) => temp,
            Err(error) => {
                self.emit(SessionUpdate::Error(error));
                return;
            },
        };
        let thread = temp.thread_id.clone();
        let Some(draft) = merge.pending_draft(&temp.id) else { return };
        self.inbox.message_accepted(&temp, true);
        self.emit_messages();
        self.emit_threads();

        // Attachment-bearing sends bypass the socket: it does not carry
        // binary payloads.
        let use_socket = self.connection.can_send() && draft.attachment.is_none();
        if use_socket {
            let frame = OutboundFrame::SendMessage {
                content: draft.content.clone(),
                is_internal: draft.is_internal,
            };
            if self.send_frame(&frame) {
                if let Some(merge) = &mut self.merge {
                    merge.sent_via_socket(&temp.id);
                }
                return;
            }
            // Socket refused the frame; fall through to REST.
        }

        let had_attachment = draft.attachment.is_some();
        let api = Arc::clone(&self.api);
        let tx = self.tasks_tx.clone();
        let temp_id = temp.id.clone();
        tokio::spawn(async move {
            let result = api.send_message(&thread, &draft).await;
            let _ = tx
                .send(TaskResult::Sent { thread, temp: temp_id, had_attachment, result })
                .await;
        });
    }

    fn handle_task(&mut self, result: TaskResult) {
        match result {
            TaskResult::Threads(result) => {
                self.threads_in_flight = false;
                match result {
                    Ok(threads) => {
                        let actions = self.inbox.set_threads(threads);
                        self.emit_threads();
                        self.run_inbox_actions(actions);
                    },
                    Err(error) => {
                        self.emit(SessionUpdate::Error(error.into_client_error()));
                    },
                }
            },
            TaskResult::Messages { ticket, result } => {
                self.messages_in_flight = false;
                if !self.inbox.accept_fetch(&ticket) {
                    tracing::debug!(thread = %ticket.thread(), "dropping stale message fetch");
                    return;
                }
                match result {
                    Ok(messages) => {
                        if let Some(merge) = &mut self.merge
                            && merge.apply_snapshot(messages)
                        {
                            self.emit_messages();
                        }
                    },
                    Err(error) => {
                        self.emit(SessionUpdate::Error(error.into_client_error()));
                    },
                }
            },
            TaskResult::Sent { thread, temp, had_attachment, result } => {
                self.handle_sent(thread, &temp, had_attachment, result);
            },
            TaskResult::ThreadCreated(result) => match result {
                Ok(thread) => {
                    let actions = self.inbox.thread_created(thread);
                    self.emit_threads();
                    self.run_inbox_actions(actions);
                },
                Err(error) => self.emit(SessionUpdate::Error(error.into_client_error())),
            },
            TaskResult::ThreadDeleted { thread, result } => match result {
                Ok(()) => {
                    let actions = self.inbox.thread_deleted(&thread);
                    self.emit_threads();
                    self.run_inbox_actions(actions);
                },
                Err(error) => self.emit(SessionUpdate::Error(error.into_client_error())),
            },
            TaskResult::MarkedRead { thread, result } => match result {
                Ok(()) => {
                    self.inbox.thread_read(&thread);
                    self.emit_threads();
                },
                // Read receipts are best-effort; the next poll settles it.
                Err(error) => tracing::debug!(thread = %thread, error = %error, "mark_read failed"),
            },
            TaskResult::SocketConnected { thread, result } => {
                self.handle_socket_connected(thread, result);
            },
        }
    }

    fn handle_sent(
        &mut self,
        thread: ThreadId,
        temp: &MessageId,
        had_attachment: bool,
        result: Result<Message, ApiError>,
    ) {
        let current = self.merge.as_ref().is_some_and(|m| *m.thread() == thread);
        match result {
            Ok(confirmed) => {
                if current {
                    if let Some(merge) = &mut self.merge {
                        merge.confirm_send(temp, confirmed.clone());
                    }
                    self.emit_messages();
                }
                self.inbox.message_accepted(&confirmed, true);
                self.emit_threads();
                if had_attachment {
                    // The immediate response may predate the stored
                    // attachment URL; fetch again shortly to pick it up.
                    self.follow_up =
                        Some((thread, Instant::now() + self.config.attachment_follow_up));
                }
            },
            Err(error) => {
                let reason = error.into_client_error().to_string();
                if current
                    && let Some(merge) = &mut self.merge
                    && let Some(draft) = merge.fail_send(temp)
                {
                    self.emit_messages();
                    self.emit(SessionUpdate::DraftRestored(draft));
                }
                self.emit(SessionUpdate::Error(ClientError::SendFailed { thread, reason }));
            },
        }
    }

    fn handle_socket(&mut self, event: SocketEvent) {
        match event {
            SocketEvent::Frame(raw) => match InboundFrame::parse(&self.config.dialect, &raw) {
                Ok(Some(frame)) => self.handle_frame(frame),
                Ok(None) => tracing::debug!("ignoring unknown frame kind"),
                // A malformed frame degrades to last-known-good state.
                Err(error) => tracing::warn!(error = %error, "dropping malformed frame"),
            },
            SocketEvent::Closed { code } => {
                self.socket = None;
                let actions = self.connection.closed(code);
                self.run_socket_actions(actions);
                self.emit_connection();
            },
        }
    }

    fn handle_frame(&mut self, frame: InboundFrame) {
        match frame {
            InboundFrame::Established => tracing::debug!("socket handshake acknowledged"),
            InboundFrame::Message(message) => {
                let own = self.viewer.is_own(&message);
                let Some(merge) = &mut self.merge else { return };
                if !merge.apply_push(message.clone()) {
                    return;
                }
                self.inbox.message_accepted(&message, own);
                self.emit_messages();
                self.emit_threads();
                // Viewing the thread means the message is read.
                if !own && self.connection.can_send() {
                    self.send_frame(&OutboundFrame::MarkRead {
                        message_id: Some(message.id.clone()),
                    });
                }
            },
            InboundFrame::Typing { user_id, user_name, is_typing } => {
                if self.viewer.id.as_deref() == Some(user_id.as_str()) {
                    return;
                }
                let user = TypingUser { id: user_id, name: user_name };
                if self.typing.remote_event(Instant::now(), user, is_typing) {
                    self.emit(SessionUpdate::Typing(self.typing.typing_users().to_vec()));
                }
            },
            InboundFrame::MessagesRead { message_id } => {
                if let Some(merge) = &mut self.merge {
                    merge.mark_read(message_id.as_ref());
                    self.emit_messages();
                }
            },
            InboundFrame::Error { message } => {
                self.connection.transport_error(message);
                self.emit_connection();
            },
        }
    }

    fn handle_socket_connected(
        &mut self,
        thread: ThreadId,
        result: Result<SocketHandle, transport::TransportError>,
    ) {
        // The user may have moved on while the dial was in flight.
        if self.connection.thread() != Some(&thread) {
            tracing::debug!(thread = %thread, "dropping socket for stale thread");
            return;
        }
        match result {
            Ok(handle) => {
                self.socket = Some(handle);
                self.connection.opened();
                self.emit_connection();
            },
            Err(error) => {
                self.connection.transport_error(error.to_string());
                let actions = self.connection.closed(1006);
                self.run_socket_actions(actions);
                self.emit_connection();
            },
        }
    }

    fn handle_typing_tick(&mut self) {
        let outcome = self.typing.tick(Instant::now());
        if outcome.send_stop && self.connection.can_send() {
            self.send_frame(&OutboundFrame::Typing { is_typing: false });
        }
        if outcome.remote_cleared {
            self.emit(SessionUpdate::Typing(Vec::new()));
        }
    }

    fn handle_follow_up(&mut self) {
        let Some((thread, _)) = self.follow_up.take() else { return };
        if self.inbox.active() == Some(&thread) && !self.messages_in_flight {
            let ticket = self.inbox.begin_fetch(thread);
            self.spawn_messages(ticket);
        }
    }

    fn poll_messages(&mut self) {
        if self.messages_in_flight || self.merge.is_none() {
            return;
        }
        let Some(active) = self.inbox.active().cloned() else { return };
        let ticket = self.inbox.begin_fetch(active);
        self.spawn_messages(ticket);
    }

    fn run_inbox_actions(&mut self, actions: Vec<InboxAction>) {
        for action in actions {
            match action {
                InboxAction::FetchMessages { thread } => {
                    let ticket = self.inbox.begin_fetch(thread);
                    self.spawn_messages(ticket);
                },
                InboxAction::OpenSocket { thread } => {
                    self.merge = Some(MergeEngine::new(thread.clone()));
                    self.typing.reset();
                    self.emit(SessionUpdate::Typing(Vec::new()));
                    self.emit_messages();
                    let actions = self.connection.connect(Some(thread));
                    self.run_socket_actions(actions);
                },
                InboxAction::CloseSocket => {
                    self.merge = None;
                    self.typing.reset();
                    let actions = self.connection.disconnect();
                    self.run_socket_actions(actions);
                    self.emit_connection();
                },
                InboxAction::MarkRead { thread } => {
                    if self.connection.can_send() {
                        self.send_frame(&OutboundFrame::MarkRead { message_id: None });
                        self.inbox.thread_read(&thread);
                    } else {
                        let api = Arc::clone(&self.api);
                        let tx = self.tasks_tx.clone();
                        tokio::spawn(async move {
                            let result = api.mark_read(&thread, None).await;
                            let _ = tx.send(TaskResult::MarkedRead { thread, result }).await;
                        });
                    }
                },
                InboxAction::ConsumeLaunchTarget => {
                    self.emit(SessionUpdate::LaunchTargetConsumed);
                },
            }
        }
    }

    fn run_socket_actions(&mut self, actions: Vec<SocketAction>) {
        for action in actions {
            match action {
                SocketAction::Open { thread } => self.dial(thread),
                SocketAction::Close { .. } => {
                    if let Some(socket) = self.socket.take() {
                        socket.shutdown();
                    }
                },
                SocketAction::ScheduleReconnect { delay } => {
                    self.reconnect_at = Some(Instant::now() + delay);
                    self.emit_connection();
                },
            }
        }
    }

    fn dial(&mut self, thread: ThreadId) {
        let Some(token) = self.tokens.access_token() else {
            // Auth failures are fatal for the operation: no retry loop.
            let actions = self.connection.disconnect();
            self.run_socket_actions(actions);
            self.emit(SessionUpdate::Error(ClientError::Auth("no access token".into())));
            return;
        };
        let url = self.endpoints.socket_url(&thread, &token);
        let tx = self.tasks_tx.clone();
        tokio::spawn(async move {
            let result = transport::connect(&url).await;
            let _ = tx.send(TaskResult::SocketConnected { thread, result }).await;
        });
    }

    fn spawn_messages(&mut self, ticket: FetchTicket) {
        self.messages_in_flight = true;
        let api = Arc::clone(&self.api);
        let tx = self.tasks_tx.clone();
        let thread = ticket.thread().clone();
        let page_size = self.config.page_size;
        tokio::spawn(async move {
            let result = api.get_messages(&thread, 1, page_size).await;
            let _ = tx.send(TaskResult::Messages { ticket, result }).await;
        });
    }

    fn spawn_thread_list(&mut self) {
        self.threads_in_flight = true;
        let api = Arc::clone(&self.api);
        let tx = self.tasks_tx.clone();
        tokio::spawn(async move {
            let result = api.list_threads().await;
            let _ = tx.send(TaskResult::Threads(result)).await;
        });
    }

    fn send_frame(&mut self, frame: &OutboundFrame) -> bool {
        if !self.connection.can_send() {
            return false;
        }
        let Some(socket) = &self.socket else { return false };
        socket.send(frame.encode(&self.config.dialect))
    }

    fn emit(&self, update: SessionUpdate) {
        if self.updates.try_send(update).is_err() {
            tracing::debug!("updates channel full, dropping update");
        }
    }

    fn emit_threads(&self) {
        self.emit(SessionUpdate::Threads(self.inbox.threads().to_vec()));
    }

    fn emit_messages(&self) {
        let Some(merge) = &self.merge else { return };
        self.emit(SessionUpdate::Messages {
            thread: merge.thread().clone(),
            messages: merge.messages().to_vec(),
        });
    }

    fn emit_connection(&self) {
        self.emit(SessionUpdate::Connection(self.connection.status()));
    }
}

/// Awaits the next socket event, or pends forever when no socket exists
/// (so the branch never wins the select).
async fn recv_socket(socket: &mut Option<SocketHandle>) -> Option<SocketEvent> {
    match socket {
        Some(handle) => handle.events.recv().await,
        None => std::future::pending().await,
    }
}

/// Sleeps until the instant, or pends forever when there is none.
async fn sleep_until_opt(until: Option<Instant>) {
    match until {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
