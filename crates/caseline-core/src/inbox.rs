//! Thread list synchronizer.
//!
//! Keeps the conversation summary list (last message, unread count,
//! recency ordering) consistent with the active thread's message state,
//! and owns the active selection including deep-link activation and the
//! stale-fetch guard for thread switches.
//!
//! Pure state machine in the same style as the connection layer: methods
//! return [`InboxAction`]s for the runtime to execute.

use caseline_proto::{Message, Thread, ThreadId};
use chrono::{DateTime, Utc};

/// Actions produced by the inbox for the runtime to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboxAction {
    /// Fetch the message page for this thread.
    FetchMessages {
        /// Thread to fetch.
        thread: ThreadId,
    },

    /// Bind the realtime socket to this thread (tears down the old one).
    OpenSocket {
        /// Thread to bind.
        thread: ThreadId,
    },

    /// Tear down the realtime socket (no thread selected anymore).
    CloseSocket,

    /// Issue a mark-all-read for this thread (socket when open, REST
    /// fallback otherwise).
    MarkRead {
        /// Thread to mark read.
        thread: ThreadId,
    },

    /// The deep-link launch parameter was consumed; the host should clear
    /// it so a reload does not re-trigger the jump.
    ConsumeLaunchTarget,
}

/// Deep-link target carried in the view's launch parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchTarget {
    /// Jump to this thread.
    Thread(ThreadId),
    /// Jump to the thread with this counter-party participant.
    Counterparty(String),
}

/// Stale-response guard for an in-flight message fetch.
///
/// Issued by [`Inbox::begin_fetch`]; the fetch result is only applied if
/// [`Inbox::accept_fetch`] still accepts the ticket, which it will not
/// after the user switched threads or a newer fetch started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    thread: ThreadId,
    generation: u64,
}

impl FetchTicket {
    /// Thread this fetch targets.
    pub fn thread(&self) -> &ThreadId {
        &self.thread
    }
}

/// Conversation list state: ordering, unread counts, active selection.
#[derive(Debug, Clone, Default)]
pub struct Inbox {
    /// Sorted descending by recency.
    threads: Vec<Thread>,
    active: Option<ThreadId>,
    launch_target: Option<LaunchTarget>,
    fetch_generation: u64,
}

impl Inbox {
    /// Empty inbox, optionally with a deep-link target to resolve once
    /// the thread list arrives.
    pub fn new(launch_target: Option<LaunchTarget>) -> Self {
        Self { launch_target, ..Self::default() }
    }

    /// The summary list, most recent first.
    pub fn threads(&self) -> &[Thread] {
        &self.threads
    }

    /// The active selection.
    pub fn active(&self) -> Option<&ThreadId> {
        self.active.as_ref()
    }

    /// Summary of the active thread.
    pub fn active_thread(&self) -> Option<&Thread> {
        let active = self.active.as_ref()?;
        self.threads.iter().find(|t| t.id == *active)
    }

    /// Replace the list from a fetch or poll result.
    ///
    /// On the first load this resolves the deep-link target (falling back
    /// to the most recent thread); afterwards it keeps the current
    /// selection when it still exists and clears it when it does not.
    pub fn set_threads(&mut self, mut threads: Vec<Thread>) -> Vec<InboxAction> {
        sort_by_recency(&mut threads);
        self.threads = threads;

        if let Some(target) = self.launch_target.take() {
            let mut actions = vec![InboxAction::ConsumeLaunchTarget];
            let resolved = self.resolve(&target).or_else(|| self.most_recent());
            if let Some(thread) = resolved {
                actions.extend(self.select(thread));
            }
            return actions;
        }

        match &self.active {
            None => match self.most_recent() {
                Some(thread) => self.select(thread),
                None => Vec::new(),
            },
            Some(active) => {
                if self.threads.iter().any(|t| t.id == *active) {
                    Vec::new()
                } else {
                    self.active = None;
                    vec![InboxAction::CloseSocket]
                }
            },
        }
    }

    /// Make a thread the active selection.
    ///
    /// Resets its unread count and instructs the runtime to rebind the
    /// socket, fetch messages, and issue a mark-all-read.
    pub fn select(&mut self, thread: ThreadId) -> Vec<InboxAction> {
        if !self.threads.iter().any(|t| t.id == thread) {
            tracing::debug!(thread = %thread, "ignoring select of unknown thread");
            return Vec::new();
        }
        if self.active.as_ref() == Some(&thread) {
            return Vec::new();
        }
        self.active = Some(thread.clone());
        self.fetch_generation += 1;
        if let Some(entry) = self.threads.iter_mut().find(|t| t.id == thread) {
            entry.unread_count = 0;
        }
        vec![
            InboxAction::OpenSocket { thread: thread.clone() },
            InboxAction::FetchMessages { thread: thread.clone() },
            InboxAction::MarkRead { thread },
        ]
    }

    /// An accepted message (optimistic, push, or poll-derived) for any
    /// thread: update the summary and re-sort. Unread only increments for
    /// counter-party messages on non-active threads.
    pub fn message_accepted(&mut self, message: &Message, own: bool) {
        let active = self.active.as_ref() == Some(&message.thread_id);
        let Some(thread) = self.threads.iter_mut().find(|t| t.id == message.thread_id) else {
            return;
        };
        if thread.last_message_at.is_none_or(|at| message.created_at >= at) {
            thread.last_message = Some(message.body.clone());
            thread.last_message_at = Some(message.created_at);
        }
        if !own && !active {
            thread.unread_count += 1;
        }
        sort_by_recency(&mut self.threads);
    }

    /// A mark-all-read completed for this thread.
    pub fn thread_read(&mut self, thread: &ThreadId) {
        if let Some(entry) = self.threads.iter_mut().find(|t| t.id == *thread) {
            entry.unread_count = 0;
        }
    }

    /// A newly created thread: insert and select it.
    pub fn thread_created(&mut self, thread: Thread) -> Vec<InboxAction> {
        let id = thread.id.clone();
        self.threads.retain(|t| t.id != id);
        self.threads.push(thread);
        sort_by_recency(&mut self.threads);
        self.active = None; // force reselection effects
        self.select(id)
    }

    /// A thread was deleted: remove it and clear the selection if it was
    /// active.
    pub fn thread_deleted(&mut self, thread: &ThreadId) -> Vec<InboxAction> {
        self.threads.retain(|t| t.id != *thread);
        if self.active.as_ref() == Some(thread) {
            self.active = None;
            return vec![InboxAction::CloseSocket];
        }
        Vec::new()
    }

    /// Start a message fetch for the active thread, returning the ticket
    /// the result must present to be applied.
    pub fn begin_fetch(&mut self, thread: ThreadId) -> FetchTicket {
        self.fetch_generation += 1;
        FetchTicket { thread, generation: self.fetch_generation }
    }

    /// Whether a fetch result is still current: its thread is still the
    /// active selection and no newer fetch has started since.
    pub fn accept_fetch(&self, ticket: &FetchTicket) -> bool {
        self.active.as_ref() == Some(&ticket.thread) && ticket.generation == self.fetch_generation
    }

    fn resolve(&self, target: &LaunchTarget) -> Option<ThreadId> {
        match target {
            LaunchTarget::Thread(id) => {
                self.threads.iter().find(|t| t.id == *id).map(|t| t.id.clone())
            },
            LaunchTarget::Counterparty(participant) => self
                .threads
                .iter()
                .find(|t| t.participant_id.as_deref() == Some(participant.as_str()))
                .map(|t| t.id.clone()),
        }
    }

    fn most_recent(&self) -> Option<ThreadId> {
        self.threads.first().map(|t| t.id.clone())
    }
}

fn sort_by_recency(threads: &mut [Thread]) {
    threads.sort_by(|a, b| b.recency().cmp(&a.recency()));
}

/// Display-friendly relative time for thread summaries ("just now",
/// "5m ago", "3h ago", "2d ago", then a plain date).
pub fn format_relative(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = now - at;
    if delta < chrono::TimeDelta::zero() {
        return "just now".to_owned();
    }
    let minutes = delta.num_minutes();
    let hours = delta.num_hours();
    let days = delta.num_days();
    if minutes < 1 {
        "just now".to_owned()
    } else if minutes < 60 {
        format!("{minutes}m ago")
    } else if hours < 24 {
        format!("{hours}h ago")
    } else if days < 7 {
        format!("{days}d ago")
    } else {
        at.format("%b %e, %Y").to_string()
    }
}
