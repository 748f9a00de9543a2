//! Message merge engine.
//!
//! Produces the authoritative, ordered, de-duplicated message list for the
//! active thread from three input streams: REST snapshots (initial load
//! and polls), WebSocket pushes, and optimistic local sends.
//!
//! The merge is keyed by id and ordered by created timestamp, never by
//! arrival order. That single rule is what lets polling coexist with push:
//! a poll result that raced a newer push can be applied last-write-wins
//! without regressing anything.
//!
//! # Invariants
//!
//! - Ids are unique within the list.
//! - Ordering is ascending by created timestamp (id as tiebreak).
//! - Applying the same snapshot or push twice equals applying it once.
//! - An optimistic entry is replaced, never duplicated, once its durable
//!   counterpart arrives on any path.

use std::collections::BTreeSet;
use std::time::Duration;

use caseline_proto::{Attachment, AttachmentState, Draft, Message, MessageId, Sender, ThreadId};
use chrono::{DateTime, Utc};

use crate::error::ClientError;
use crate::identity::Viewer;

/// How far apart an optimistic entry and a durable message with the same
/// text may be created and still be treated as the same send.
pub const CONFIRM_WINDOW: Duration = Duration::from_secs(5);

/// Ordered, de-duplicated message list for one thread.
#[derive(Debug, Clone)]
pub struct MergeEngine {
    thread: ThreadId,
    /// Sorted ascending by `(created_at, id)`. Holds durable and
    /// optimistic entries together; optimistic ones carry `temp-` ids.
    messages: Vec<Message>,
    /// Drafts behind unconfirmed optimistic entries, kept for rollback.
    pending: Vec<(MessageId, Draft)>,
    /// Suppresses duplicate submissions from repeated clicks/keys.
    send_in_flight: bool,
}

impl MergeEngine {
    /// Empty list for a thread.
    pub fn new(thread: ThreadId) -> Self {
        Self { thread, messages: Vec::new(), pending: Vec::new(), send_in_flight: false }
    }

    /// Thread this engine reconciles.
    pub fn thread(&self) -> &ThreadId {
        &self.thread
    }

    /// The current merged list, ascending by created timestamp.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// The most recent message, for thread summary updates.
    pub fn latest(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Whether a send is currently in flight.
    pub fn send_in_flight(&self) -> bool {
        self.send_in_flight
    }

    /// Apply a REST snapshot (initial load or poll tick).
    ///
    /// Returns whether the list changed. An identical durable id set is
    /// discarded outright so steady-state polling causes no churn.
    pub fn apply_snapshot(&mut self, snapshot: Vec<Message>) -> bool {
        let current: BTreeSet<&str> = self
            .messages
            .iter()
            .filter(|m| !m.is_local())
            .map(|m| m.id.as_str())
            .collect();
        let incoming: BTreeSet<&str> = snapshot
            .iter()
            .filter(|m| m.thread_id == self.thread)
            .map(|m| m.id.as_str())
            .collect();
        if current == incoming {
            return false;
        }

        let optimistic: Vec<Message> =
            self.messages.iter().filter(|m| m.is_local()).cloned().collect();
        // First occurrence wins when the snapshot itself repeats an id.
        let mut seen = BTreeSet::new();
        self.messages = snapshot
            .into_iter()
            .filter(|m| m.thread_id == self.thread && seen.insert(m.id.clone()))
            .collect();
        // Re-append unconfirmed optimistic entries, dropping any the
        // snapshot has since confirmed.
        for local in optimistic {
            if self.confirms(&local) {
                self.pending.retain(|(id, _)| *id != local.id);
            } else {
                self.messages.push(local);
            }
        }
        self.sort();
        true
    }

    /// Apply one message pushed over the socket.
    ///
    /// Returns whether the message was accepted (new id on this thread).
    pub fn apply_push(&mut self, message: Message) -> bool {
        if message.thread_id != self.thread {
            tracing::debug!(
                thread = %self.thread,
                other = %message.thread_id,
                "dropping push for inactive thread"
            );
            return false;
        }
        if self.messages.iter().any(|m| m.id == message.id) {
            return false;
        }

        // A durable message confirms the optimistic entry it supersedes.
        let confirmed: Vec<MessageId> = self
            .messages
            .iter()
            .filter(|m| m.is_local() && superseded_by(m, &message))
            .map(|m| m.id.clone())
            .collect();
        self.messages.retain(|m| !confirmed.contains(&m.id));
        self.pending.retain(|(id, _)| !confirmed.contains(id));

        self.messages.push(message);
        self.sort();
        true
    }

    /// Create an optimistic entry for a send.
    ///
    /// Rejected before any network call when the draft is empty or another
    /// send is already in flight. The returned message carries a `temp-`
    /// id and, for attachment sends, a `Sending` attachment state.
    pub fn begin_send(
        &mut self,
        draft: Draft,
        viewer: &Viewer,
        now: DateTime<Utc>,
    ) -> Result<Message, ClientError> {
        if draft.is_empty() {
            return Err(ClientError::Validation("message is empty".into()));
        }
        if self.send_in_flight {
            return Err(ClientError::Validation("a send is already in progress".into()));
        }

        let message = Message {
            id: MessageId::local(now),
            thread_id: self.thread.clone(),
            sender: Sender {
                id: viewer.id.clone(),
                name: viewer.name.clone(),
                role: viewer.role.clone(),
                email: viewer.email.clone(),
            },
            body: draft.content.clone(),
            created_at: now,
            read: false,
            edited: false,
            is_own: Some(true),
            attachment: draft.attachment.as_ref().map(|upload| Attachment {
                url: None,
                name: upload.name.clone(),
                size: upload.size(),
                state: AttachmentState::Sending,
            }),
        };

        self.send_in_flight = true;
        self.pending.push((message.id.clone(), draft));
        self.messages.push(message.clone());
        self.sort();
        Ok(message)
    }

    /// The draft behind an unconfirmed optimistic entry.
    pub fn pending_draft(&self, temp: &MessageId) -> Option<Draft> {
        self.pending.iter().find(|(id, _)| id == temp).map(|(_, draft)| draft.clone())
    }

    /// The send went out on the socket; the durable echo will arrive as a
    /// push. Clears the in-flight flag but keeps the optimistic entry
    /// until the echo confirms it.
    pub fn sent_via_socket(&mut self, temp: &MessageId) {
        self.send_in_flight = false;
        self.pending.retain(|(id, _)| id != temp);
    }

    /// The REST send succeeded: replace the optimistic entry with the
    /// server-confirmed message (unless the push path already did).
    pub fn confirm_send(&mut self, temp: &MessageId, confirmed: Message) {
        self.send_in_flight = false;
        self.pending.retain(|(id, _)| id != temp);
        self.messages.retain(|m| m.id != *temp);
        if confirmed.thread_id == self.thread && !self.messages.iter().any(|m| m.id == confirmed.id)
        {
            self.messages.push(confirmed);
            self.sort();
        }
    }

    /// The send failed on every path: roll back the optimistic entry and
    /// hand the draft back for the caller to restore.
    pub fn fail_send(&mut self, temp: &MessageId) -> Option<Draft> {
        self.send_in_flight = false;
        self.messages.retain(|m| m.id != *temp);
        let idx = self.pending.iter().position(|(id, _)| id == temp)?;
        Some(self.pending.swap_remove(idx).1)
    }

    /// Mark one message (or all, when the id is absent) as read.
    pub fn mark_read(&mut self, message_id: Option<&MessageId>) {
        for message in &mut self.messages {
            if message_id.is_none_or(|id| *id == message.id) {
                message.read = true;
            }
        }
    }

    /// Whether an existing durable message confirms `local`.
    fn confirms(&self, local: &Message) -> bool {
        self.messages.iter().any(|m| !m.is_local() && superseded_by(local, m))
    }

    fn sort(&mut self) {
        self.messages
            .sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.0.cmp(&b.id.0)));
    }
}

/// Whether durable message `durable` supersedes optimistic entry `local`:
/// same text, created within [`CONFIRM_WINDOW`] of each other.
fn superseded_by(local: &Message, durable: &Message) -> bool {
    if local.body != durable.body {
        return false;
    }
    let delta = (durable.created_at - local.created_at).abs();
    delta.to_std().is_ok_and(|d| d <= CONFIRM_WINDOW)
}

#[cfg(test)]
mod tests {
    use caseline_proto::AttachmentUpload;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn durable(id: &str, body: &str, secs: i64) -> Message {
        Message {
            id: MessageId::new(id),
            thread_id: ThreadId::new("t1"),
            sender: Sender {
                id: Some("staff-1".into()),
                name: "Dana".into(),
                role: Some("preparer".into()),
                email: None,
            },
            body: body.into(),
            created_at: at(secs),
            read: false,
            edited: false,
            is_own: None,
            attachment: None,
        }
    }

    fn viewer() -> Viewer {
        Viewer { id: Some("u1".into()), name: "You".into(), ..Viewer::default() }
    }

    fn engine() -> MergeEngine {
        MergeEngine::new(ThreadId::new("t1"))
    }

    fn ids(engine: &MergeEngine) -> Vec<&str> {
        engine.messages().iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn identical_snapshot_causes_no_churn() {
        let mut merge = engine();
        assert!(merge.apply_snapshot(vec![durable("1", "a", 0), durable("2", "b", 1)]));
        assert!(!merge.apply_snapshot(vec![durable("2", "b", 1), durable("1", "a", 0)]));
    }

    #[test]
    fn duplicate_ids_within_a_snapshot_collapse_to_one() {
        let mut merge = engine();
        assert!(merge.apply_snapshot(vec![durable("7", "a", 0), durable("7", "a", 5)]));
        assert_eq!(ids(&merge), vec!["7"]);
    }

    #[test]
    fn push_is_idempotent() {
        let mut merge = engine();
        assert!(merge.apply_push(durable("1", "a", 0)));
        assert!(!merge.apply_push(durable("1", "a", 0)));
        assert_eq!(ids(&merge), vec!["1"]);
    }

    #[test]
    fn push_for_another_thread_is_dropped() {
        let mut merge = engine();
        let mut foreign = durable("1", "a", 0);
        foreign.thread_id = ThreadId::new("t2");
        assert!(!merge.apply_push(foreign));
        assert!(merge.messages().is_empty());
    }

    #[test]
    fn out_of_order_pushes_stay_sorted() {
        let mut merge = engine();
        let _ = merge.apply_push(durable("2", "later", 10));
        let _ = merge.apply_push(durable("1", "earlier", 5));
        assert_eq!(ids(&merge), vec!["1", "2"]);
    }

    #[test]
    fn push_within_window_supersedes_optimistic_entry() {
        let mut merge = engine();
        let temp = merge.begin_send(Draft::text("Hello"), &viewer(), at(0)).unwrap();
        assert!(temp.id.is_local());
        merge.sent_via_socket(&temp.id);

        let mut echo = durable("42", "Hello", 2);
        echo.sender.id = Some("u1".into());
        assert!(merge.apply_push(echo));
        assert_eq!(ids(&merge), vec!["42"]);
    }

    #[test]
    fn push_outside_window_keeps_both() {
        let mut merge = engine();
        let temp = merge.begin_send(Draft::text("Hello"), &viewer(), at(0)).unwrap();
        merge.sent_via_socket(&temp.id);
        let _ = merge.apply_push(durable("42", "Hello", 30));
        assert_eq!(merge.messages().len(), 2);
    }

    #[test]
    fn rest_confirmation_replaces_the_temp_entry() {
        let mut merge = engine();
        let temp = merge.begin_send(Draft::text("Hello"), &viewer(), at(0)).unwrap();
        merge.confirm_send(&temp.id, durable("42", "Hello", 1));
        assert_eq!(ids(&merge), vec!["42"]);
        assert!(!merge.send_in_flight());
    }

    #[test]
    fn rest_confirmation_after_push_does_not_duplicate() {
        let mut merge = engine();
        let temp = merge.begin_send(Draft::text("Hello"), &viewer(), at(0)).unwrap();
        let _ = merge.apply_push(durable("42", "Hello", 1));
        merge.confirm_send(&temp.id, durable("42", "Hello", 1));
        assert_eq!(ids(&merge), vec!["42"]);
    }

    #[test]
    fn failed_send_rolls_back_and_returns_the_draft() {
        let mut merge = engine();
        let draft = Draft {
            content: "see attached".into(),
            is_internal: false,
            attachment: Some(AttachmentUpload { name: "w2.pdf".into(), bytes: vec![0; 16] }),
        };
        let temp = merge.begin_send(draft.clone(), &viewer(), at(0)).unwrap();
        assert_eq!(
            merge.messages()[0].attachment.as_ref().map(|a| a.state),
            Some(AttachmentState::Sending)
        );
        let restored = merge.fail_send(&temp.id);
        assert_eq!(restored, Some(draft));
        assert!(merge.messages().is_empty());
        assert!(!merge.send_in_flight());
    }

    #[test]
    fn duplicate_sends_are_suppressed_while_in_flight() {
        let mut merge = engine();
        let _ = merge.begin_send(Draft::text("Hello"), &viewer(), at(0)).unwrap();
        let second = merge.begin_send(Draft::text("Hello again"), &viewer(), at(1));
        assert!(matches!(second, Err(ClientError::Validation(_))));
    }

    #[test]
    fn empty_sends_are_rejected_before_any_network_call() {
        let mut merge = engine();
        let result = merge.begin_send(Draft::text("  "), &viewer(), at(0));
        assert!(matches!(result, Err(ClientError::Validation(_))));
        assert!(merge.messages().is_empty());
    }

    #[test]
    fn snapshot_preserves_unconfirmed_optimistic_entries() {
        let mut merge = engine();
        let _ = merge.apply_snapshot(vec![durable("1", "a", 0)]);
        let temp = merge.begin_send(Draft::text("Hello"), &viewer(), at(10)).unwrap();
        merge.sent_via_socket(&temp.id);

        // Poll result that does not yet contain the send.
        let _ = merge.apply_snapshot(vec![durable("1", "a", 0), durable("2", "b", 3)]);
        assert_eq!(ids(&merge), vec!["1", "2", temp.id.as_str()]);

        // Poll result that does: the temp entry is dropped.
        let _ =
            merge.apply_snapshot(vec![durable("1", "a", 0), durable("2", "b", 3), durable(
                "3", "Hello", 11,
            )]);
        assert_eq!(ids(&merge), vec!["1", "2", "3"]);
    }

    #[test]
    fn mark_read_applies_to_one_or_all() {
        let mut merge = engine();
        let _ = merge.apply_snapshot(vec![durable("1", "a", 0), durable("2", "b", 1)]);
        merge.mark_read(Some(&MessageId::new("1")));
        assert!(merge.messages()[0].read);
        assert!(!merge.messages()[1].read);
        merge.mark_read(None);
        assert!(merge.messages().iter().all(|m| m.read));
    }
}
