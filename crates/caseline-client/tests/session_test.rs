//! End-to-end session tests over an in-memory REST fake.
//!
//! These run the real event loop (spawned tasks, stale-fetch guard, poll
//! timers) against a fake `ThreadApi`, with the socket disabled so the
//! REST reconciliation paths are exercised deterministically under
//! virtual time.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use caseline_client::{
    ApiError, Endpoints, Session, SessionCommand, SessionConfig, SessionUpdate, StaticToken,
    ThreadApi,
};
use caseline_core::Viewer;
use caseline_proto::{
    Draft, Message, MessageId, NewThread, Sender, Thread, ThreadId, ThreadStatus,
};
use chrono::{TimeDelta, Utc};
use tokio::sync::{Mutex, mpsc};

struct FakeApi {
    threads: Mutex<Vec<Thread>>,
    messages: Mutex<HashMap<ThreadId, Vec<Message>>>,
    /// Artificial latency per thread for `get_messages`.
    delays: HashMap<ThreadId, Duration>,
    next_id: AtomicU64,
}

impl FakeApi {
    fn new(threads: Vec<Thread>, messages: Vec<(ThreadId, Vec<Message>)>) -> Self {
        Self {
            threads: Mutex::new(threads),
            messages: Mutex::new(messages.into_iter().collect()),
            delays: HashMap::new(),
            next_id: AtomicU64::new(42),
        }
    }

    fn with_delay(mut self, thread: &str, delay: Duration) -> Self {
        self.delays.insert(ThreadId::new(thread), delay);
        self
    }
}

#[async_trait]
impl ThreadApi for FakeApi {
    async fn list_threads(&self) -> Result<Vec<Thread>, ApiError> {
        Ok(self.threads.lock().await.clone())
    }

    async fn get_messages(
        &self,
        thread: &ThreadId,
        _page: u32,
        _page_size: u32,
    ) -> Result<Vec<Message>, ApiError> {
        if let Some(delay) = self.delays.get(thread) {
            tokio::time::sleep(*delay).await;
        }
        Ok(self.messages.lock().await.get(thread).cloned().unwrap_or_default())
    }

    async fn send_message(&self, thread: &ThreadId, draft: &Draft) -> Result<Message, ApiError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let message = Message {
            id: MessageId::new(id.to_string()),
            thread_id: thread.clone(),
            sender: Sender {
                id: Some("u1".into()),
                name: "You".into(),
                role: None,
                email: None,
            },
            body: draft.content.clone(),
            created_at: Utc::now(),
            read: false,
            edited: false,
            is_own: Some(true),
            attachment: None,
        };
        self.messages.lock().await.entry(thread.clone()).or_default().push(message.clone());
        Ok(message)
    }

    async fn create_thread(&self, new: &NewThread) -> Result<Thread, ApiError> {
        let mut thread = make_thread("t-new", 0, 0);
        thread.subject = new.subject.clone();
        self.threads.lock().await.push(thread.clone());
        Ok(thread)
    }

    async fn delete_thread(&self, thread: &ThreadId) -> Result<(), ApiError> {
        self.threads.lock().await.retain(|t| t.id != *thread);
        Ok(())
    }

    async fn mark_read(
        &self,
        _thread: &ThreadId,
        _message: Option<&MessageId>,
    ) -> Result<(), ApiError> {
        Ok(())
    }
}

fn make_thread(id: &str, age_secs: i64, unread: u32) -> Thread {
    Thread {
        id: ThreadId::new(id),
        subject: format!("thread {id}"),
        status: ThreadStatus::Active,
        client_name: Some("Avery Client".into()),
        assigned_staff: Some("Dana Preparer".into()),
        participant_id: None,
        last_message: Some("earlier".into()),
        last_message_at: Some(Utc::now() - TimeDelta::seconds(age_secs)),
        created_at: Some(Utc::now() - TimeDelta::days(1)),
        unread_count: unread,
    }
}

fn make_message(id: &str, thread: &str, body: &str, age_secs: i64) -> Message {
    Message {
        id: MessageId::new(id),
        thread_id: ThreadId::new(thread),
        sender: Sender {
            id: Some("staff-1".into()),
            name: "Dana".into(),
            role: Some("preparer".into()),
            email: None,
        },
        body: body.into(),
        created_at: Utc::now() - TimeDelta::seconds(age_secs),
        read: false,
        edited: false,
        is_own: None,
        attachment: None,
    }
}

fn start(api: FakeApi) -> (mpsc::Sender<SessionCommand>, mpsc::Receiver<SessionUpdate>) {
    let endpoints = Endpoints::new("https://api.test", "wss://api.test", "chat").unwrap();
    let tokens = Arc::new(StaticToken::new("tok"));
    let viewer = Viewer { id: Some("u1".into()), name: "You".into(), ..Viewer::default() };
    let config = SessionConfig { realtime_enabled: false, ..SessionConfig::default() };
    let (session, handles) = Session::new(Arc::new(api), endpoints, tokens, viewer, config);
    tokio::spawn(session.run());
    (handles.commands, handles.updates)
}

/// Drain updates until one satisfies the predicate, with a virtual-time
/// deadline.
async fn wait_for<T>(
    updates: &mut mpsc::Receiver<SessionUpdate>,
    mut pick: impl FnMut(&SessionUpdate) -> Option<T>,
) -> T {
    let deadline = Duration::from_secs(30);
    tokio::time::timeout(deadline, async {
        loop {
            let update = updates.recv().await.expect("session ended early");
            if let Some(found) = pick(&update) {
                return found;
            }
        }
    })
    .await
    .expect("expected update not observed")
}

fn messages_for(thread: &str) -> impl FnMut(&SessionUpdate) -> Option<Vec<Message>> + use<> {
    let thread = ThreadId::new(thread);
    move |update| match update {
        SessionUpdate::Messages { thread: t, messages } if *t == thread => Some(messages.clone()),
        _ => None,
    }
}

#[tokio::test(start_paused = true)]
async fn basic_send_replaces_temp_with_durable_id() {
    let api = FakeApi::new(vec![make_thread("t1", 60, 0)], vec![(ThreadId::new("t1"), vec![
        make_message("1", "t1", "earlier", 120),
    ])]);
    let (commands, mut updates) = start(api);

    // Initial load settles on t1 with its seeded message. Selection
    // first emits an empty list, so wait for the fetch to land.
    let initial = wait_for(&mut updates, |update| {
        messages_for("t1")(update).filter(|messages| !messages.is_empty())
    })
    .await;
    assert_eq!(initial.len(), 1);

    commands.send(SessionCommand::Send(Draft::text("Hello"))).await.unwrap();

    // Optimistic entry first: temp id, own message.
    let optimistic = wait_for(&mut updates, messages_for("t1")).await;
    let temp = optimistic.last().unwrap();
    assert!(temp.id.is_local());
    assert_eq!(temp.body, "Hello");
    assert_eq!(temp.is_own, Some(true));

    // Confirmation swaps it for the durable id, exactly once.
    let confirmed = wait_for(&mut updates, |update| {
        messages_for("t1")(update)
            .filter(|messages| messages.iter().all(|m| !m.id.is_local()))
            .filter(|messages| messages.iter().any(|m| m.id.as_str() == "42"))
    })
    .await;
    let hellos = confirmed.iter().filter(|m| m.body == "Hello").count();
    assert_eq!(hellos, 1);
}

#[tokio::test(start_paused = true)]
async fn stale_fetch_cannot_overwrite_the_switched_thread() {
    // t1 is most recent (auto-selected) but its fetch is slow.
    let api = FakeApi::new(
        vec![make_thread("t1", 10, 0), make_thread("t2", 60, 0)],
        vec![
            (ThreadId::new("t1"), vec![make_message("1", "t1", "t1 history", 120)]),
            (ThreadId::new("t2"), vec![make_message("2", "t2", "t2 history", 120)]),
        ],
    )
    .with_delay("t1", Duration::from_secs(5));
    let (commands, mut updates) = start(api);

    // Wait for the list (t1 is auto-selected and its slow fetch starts),
    // then switch away while that fetch is still pending.
    let _ = wait_for(&mut updates, |update| match update {
        SessionUpdate::Threads(threads) if !threads.is_empty() => Some(()),
        _ => None,
    })
    .await;
    commands.send(SessionCommand::SelectThread(ThreadId::new("t2"))).await.unwrap();
    let t2_messages = wait_for(&mut updates, |update| {
        messages_for("t2")(update).filter(|messages| !messages.is_empty())
    })
    .await;
    assert!(t2_messages.iter().any(|m| m.body == "t2 history"));

    // Give t1's delayed fetch ample virtual time to resolve, then check
    // nothing for t1 ever surfaced.
    tokio::time::sleep(Duration::from_secs(8)).await;
    let mut saw_t1 = false;
    while let Ok(update) = updates.try_recv() {
        if let SessionUpdate::Messages { thread, .. } = &update {
            saw_t1 |= *thread == ThreadId::new("t1");
        }
    }
    assert!(!saw_t1, "stale t1 fetch leaked into the UI");
}

#[tokio::test(start_paused = true)]
async fn selecting_a_thread_resets_only_its_unread_count() {
    let api = FakeApi::new(
        vec![make_thread("t1", 60, 3), make_thread("t2", 10, 5)],
        vec![(ThreadId::new("t1"), Vec::new()), (ThreadId::new("t2"), Vec::new())],
    );
    let (commands, mut updates) = start(api);

    // t2 auto-selects on load, zeroing its count; t1 keeps its 3.
    let _ = wait_for(&mut updates, messages_for("t2")).await;
    commands.send(SessionCommand::SelectThread(ThreadId::new("t1"))).await.unwrap();

    let threads = wait_for(&mut updates, |update| match update {
        SessionUpdate::Threads(threads)
            if threads
                .iter()
                .find(|t| t.id == ThreadId::new("t1"))
                .is_some_and(|t| t.unread_count == 0) =>
        {
            Some(threads.clone())
        },
        _ => None,
    })
    .await;
    let t2 = threads.iter().find(|t| t.id == ThreadId::new("t2")).unwrap();
    assert_eq!(t2.unread_count, 0, "t2 was reset when it was auto-selected");
}

#[tokio::test(start_paused = true)]
async fn created_thread_becomes_the_active_selection() {
    let api = FakeApi::new(vec![make_thread("t1", 60, 0)], vec![(ThreadId::new("t1"), Vec::new())]);
    let (commands, mut updates) = start(api);
    let _ = wait_for(&mut updates, messages_for("t1")).await;

    commands
        .send(SessionCommand::CreateThread(NewThread {
            subject: "2025 amended return".into(),
            initial_message: None,
            participant_id: None,
        }))
        .await
        .unwrap();

    // The new thread shows up in the list and its (empty) message list
    // becomes the active view.
    let _ = wait_for(&mut updates, messages_for("t-new")).await;
    let threads = wait_for(&mut updates, |update| match update {
        SessionUpdate::Threads(threads)
            if threads.iter().any(|t| t.subject == "2025 amended return") =>
        {
            Some(threads.clone())
        },
        _ => None,
    })
    .await;
    assert!(threads.iter().any(|t| t.id == ThreadId::new("t-new")));
}
