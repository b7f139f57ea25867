use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::TodoError;
use crate::remote::{AuthService, DocumentStore};
use crate::session::Session;
use crate::todo::{self, Draft, Item};

/// Remote operations, as named in notices and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    SignIn,
    SignUp,
    SignOut,
    Load,
    Add,
    Delete,
}

impl Op {
    pub fn success_notice(&self) -> Option<&'static str> {
        match self {
            Op::SignIn => Some("Logged in"),
            Op::SignUp => Some("Signed up"),
            Op::SignOut => Some("Logged out"),
            Op::Load => None,
            Op::Add => Some("Todo added"),
            Op::Delete => Some("Todo deleted"),
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Op::SignIn => "sign in",
            Op::SignUp => "sign up",
            Op::SignOut => "sign out",
            Op::Load => "load",
            Op::Add => "add",
            Op::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Outcome of a write that went through. The follow-up reload can still fail,
/// in which case the list is what it was before the write.
#[derive(Debug)]
pub struct Mutation {
    pub reload: Result<(), TodoError>,
}

/// The user's items as last fetched. Never patched locally: every write is
/// followed by a full reload.
pub struct TodoList<S> {
    store: S,
    items: Vec<Item>,
}

impl<S: DocumentStore> TodoList<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            items: Vec::new(),
        }
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub async fn load(&mut self, session: &Session) -> Result<&[Item], TodoError> {
        let mut items = self
            .store
            .list_documents(&session.user_id)
            .await
            .map_err(|source| TodoError::Fetch { source })?;
        todo::sort_by_created_at(&mut items);
        debug!(user_id = %session.user_id, count = items.len(), "todos loaded");
        self.items = items;
        Ok(&self.items)
    }

    pub async fn add(&mut self, session: &Session, text: &str) -> Result<Mutation, TodoError> {
        let draft = Draft::new(text);
        self.store
            .put_document(&session.user_id, &draft)
            .await
            .map_err(|source| TodoError::Write {
                op: Op::Add,
                source,
            })?;
        info!(user_id = %session.user_id, id = %draft.id, "todo added");
        Ok(self.reload(session).await)
    }

    pub async fn delete(&mut self, session: &Session, id: &str) -> Result<Mutation, TodoError> {
        self.store
            .delete_document(&session.user_id, id)
            .await
            .map_err(|source| TodoError::Write {
                op: Op::Delete,
                source,
            })?;
        info!(user_id = %session.user_id, id, "todo deleted");
        Ok(self.reload(session).await)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    async fn reload(&mut self, session: &Session) -> Mutation {
        Mutation {
            reload: self.load(session).await.map(|_| ()),
        }
    }
}

/// Requests from the UI. Item operations carry the session they act for.
#[derive(Debug)]
pub enum Command {
    SignIn { email: String, password: String },
    SignUp { email: String, password: String },
    SignOut,
    Load(Session),
    Add { session: Session, text: String },
    Delete { session: Session, id: String },
}

impl Command {
    pub fn op(&self) -> Op {
        match self {
            Command::SignIn { .. } => Op::SignIn,
            Command::SignUp { .. } => Op::SignUp,
            Command::SignOut => Op::SignOut,
            Command::Load(_) => Op::Load,
            Command::Add { .. } => Op::Add,
            Command::Delete { .. } => Op::Delete,
        }
    }
}

#[derive(Debug)]
pub enum Event {
    AuthStateChanged(Option<Session>),
    Published(Vec<Item>),
    Succeeded(Op),
    Failed(TodoError),
}

/// Owns the remote collaborators and runs commands one at a time, so two
/// loads can never interleave.
pub struct SyncWorker<A, S> {
    auth: A,
    list: TodoList<S>,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<Event>,
}

impl<A: AuthService, S: DocumentStore> SyncWorker<A, S> {
    pub fn new(
        auth: A,
        store: S,
        commands: mpsc::Receiver<Command>,
        events: mpsc::Sender<Event>,
    ) -> Self {
        Self {
            auth,
            list: TodoList::new(store),
            commands,
            events,
        }
    }

    pub async fn start(mut self) {
        info!("SyncWorker: started");

        let mut auth_rx = self.auth.subscribe();
        let initial = auth_rx.borrow_and_update().clone();
        if !self.emit(Event::AuthStateChanged(initial)).await {
            return;
        }

        loop {
            tokio::select! {
                changed = auth_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let session = auth_rx.borrow_and_update().clone();
                    if session.is_none() {
                        self.list.clear();
                    }
                    if !self.emit(Event::AuthStateChanged(session)).await {
                        break;
                    }
                }
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    let mut alive = true;
                    for event in self.handle(command).await {
                        alive = self.emit(event).await;
                        if !alive {
                            break;
                        }
                    }
                    if !alive {
                        break;
                    }
                }
            }
        }

        info!("SyncWorker: stopped");
    }

    async fn handle(&mut self, command: Command) -> Vec<Event> {
        let op = command.op();
        debug!(%op, "SyncWorker: running command");

        let mut events = Vec::new();
        let mut reload_error = None;
        let result = match command {
            Command::SignIn { email, password } => self
                .auth
                .sign_in(&email, &password)
                .await
                .map(|_| ())
                .map_err(|source| TodoError::Auth { op, source }),
            Command::SignUp { email, password } => self
                .auth
                .sign_up(&email, &password)
                .await
                .map(|_| ())
                .map_err(|source| TodoError::Auth { op, source }),
            Command::SignOut => self
                .auth
                .sign_out()
                .await
                .map_err(|source| TodoError::Auth { op, source }),
            Command::Load(session) => self
                .list
                .load(&session)
                .await
                .map(|items| events.push(Event::Published(items.to_vec()))),
            Command::Add { session, text } => self.list.add(&session, &text).await.map(|m| {
                reload_error = m.reload.err();
            }),
            Command::Delete { session, id } => {
                self.list.delete(&session, &id).await.map(|m| {
                    reload_error = m.reload.err();
                })
            }
        };

        if matches!(op, Op::Add | Op::Delete) && result.is_ok() && reload_error.is_none() {
            events.push(Event::Published(self.list.items().to_vec()));
        }

        match result {
            Ok(()) => events.push(Event::Succeeded(op)),
            Err(err) => {
                warn!(error = ?err, "SyncWorker: {} failed", op);
                events.push(Event::Failed(err));
            }
        }
        if let Some(err) = reload_error {
            warn!(error = ?err, "SyncWorker: reload after {} failed", op);
            events.push(Event::Failed(err));
        }
        events
    }

    async fn emit(&self, event: Event) -> bool {
        self.events.send(event).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use crate::remote::fake::{FakeAuth, MemoryStore};
    use crate::session::session;
    use crate::todo::item;

    fn texts(items: &[Item]) -> Vec<&str> {
        items.iter().map(|i| i.text.as_str()).collect()
    }

    #[tokio::test]
    async fn load_publishes_ascending_regardless_of_remote_order() {
        let store = MemoryStore::with_items(vec![item("1", "a", 10), item("2", "b", 5)]);
        let mut list = TodoList::new(store);

        let items = list.load(&session("u1")).await.unwrap();
        assert_eq!(texts(items), ["b", "a"]);
    }

    #[tokio::test]
    async fn load_failure_keeps_previous_list() {
        let store = MemoryStore::with_items(vec![item("1", "a", 10)]);
        let mut list = TodoList::new(store.clone());
        list.load(&session("u1")).await.unwrap();

        store.fail_list(true);
        let err = list.load(&session("u1")).await.unwrap_err();
        assert_eq!(err.op(), Op::Load);
        assert_eq!(texts(list.items()), ["a"]);
    }

    #[tokio::test]
    async fn load_is_scoped_to_the_session_user() {
        let store = MemoryStore::default();
        store.insert("u1", item("1", "mine", 1));
        store.insert("u2", item("2", "theirs", 1));
        let mut list = TodoList::new(store);

        let items = list.load(&session("u1")).await.unwrap();
        assert_eq!(texts(items), ["mine"]);
    }

    #[tokio::test]
    async fn add_reloads_exactly_once() {
        let store = MemoryStore::with_items(vec![item("1", "a", 1)]);
        let mut list = TodoList::new(store.clone());

        let mutation = list.add(&session("u1"), "buy milk").await.unwrap();
        assert!(mutation.reload.is_ok());
        assert_eq!(store.list_calls(), 1);
        assert_eq!(texts(list.items()), ["a", "buy milk"]);
    }

    #[tokio::test]
    async fn add_with_failed_reload_keeps_list_from_before_add() {
        let store = MemoryStore::with_items(vec![item("1", "a", 1)]);
        let mut list = TodoList::new(store.clone());
        list.load(&session("u1")).await.unwrap();

        store.fail_list(true);
        let mutation = list.add(&session("u1"), "buy milk").await.unwrap();
        let err = mutation.reload.unwrap_err();
        assert!(matches!(err, TodoError::Fetch { .. }));
        assert_eq!(store.list_calls(), 2);
        assert_eq!(texts(list.items()), ["a"]);
        assert_eq!(store.len("u1"), 2);
    }

    #[tokio::test]
    async fn failed_add_does_not_touch_the_list() {
        let store = MemoryStore::with_items(vec![item("1", "a", 1)]);
        let mut list = TodoList::new(store.clone());
        list.load(&session("u1")).await.unwrap();

        store.fail_writes(true);
        let err = list.add(&session("u1"), "buy milk").await.unwrap_err();
        assert!(matches!(err, TodoError::Write { op: Op::Add, .. }));
        assert_eq!(store.list_calls(), 1);
        assert_eq!(texts(list.items()), ["a"]);
    }

    #[tokio::test]
    async fn delete_reloads_and_failed_delete_keeps_list() {
        let store = MemoryStore::with_items(vec![item("1", "a", 1), item("2", "b", 2)]);
        let mut list = TodoList::new(store.clone());
        list.load(&session("u1")).await.unwrap();

        list.delete(&session("u1"), "1").await.unwrap();
        assert_eq!(texts(list.items()), ["b"]);

        store.fail_writes(true);
        let err = list.delete(&session("u1"), "2").await.unwrap_err();
        assert_eq!(err.notice(), "Could not delete todo");
        assert_eq!(texts(list.items()), ["b"]);
    }

    struct Harness {
        commands: mpsc::Sender<Command>,
        events: mpsc::Receiver<Event>,
        auth: FakeAuth,
        store: MemoryStore,
    }

    impl Harness {
        fn start(auth: FakeAuth, store: MemoryStore) -> Self {
            let (command_tx, command_rx) = mpsc::channel(8);
            let (event_tx, event_rx) = mpsc::channel(32);
            let worker = SyncWorker::new(auth.clone(), store.clone(), command_rx, event_tx);
            tokio::spawn(worker.start());
            Self {
                commands: command_tx,
                events: event_rx,
                auth,
                store,
            }
        }

        async fn next(&mut self) -> Event {
            self.events.recv().await.expect("worker stopped")
        }
    }

    #[tokio::test]
    async fn worker_reports_initial_auth_state() {
        let mut h = Harness::start(FakeAuth::signed_in(session("u1")), MemoryStore::default());
        match h.next().await {
            Event::AuthStateChanged(Some(s)) => assert_eq!(s, session("u1")),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn worker_sign_in_then_auth_change() {
        let mut h = Harness::start(FakeAuth::default(), MemoryStore::default());
        assert!(matches!(h.next().await, Event::AuthStateChanged(None)));

        h.commands
            .send(Command::SignIn {
                email: "u1@example.com".to_string(),
                password: "pw".to_string(),
            })
            .await
            .unwrap();

        let mut saw_success = false;
        let mut saw_session = false;
        for _ in 0..2 {
            match h.next().await {
                Event::Succeeded(Op::SignIn) => saw_success = true,
                Event::AuthStateChanged(Some(s)) => {
                    assert_eq!(s.email, "u1@example.com");
                    saw_session = true;
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert!(saw_success && saw_session);
    }

    #[tokio::test]
    async fn worker_reports_rejected_sign_in() {
        let auth = FakeAuth::default();
        auth.reject(true);
        let mut h = Harness::start(auth, MemoryStore::default());
        h.next().await;

        h.commands
            .send(Command::SignIn {
                email: "a@b.com".to_string(),
                password: "bad".to_string(),
            })
            .await
            .unwrap();
        match h.next().await {
            Event::Failed(err) => {
                assert_eq!(err.notice(), "Could not log in");
                assert!(matches!(
                    err,
                    TodoError::Auth {
                        source: RemoteError::Status { status: 400, .. },
                        ..
                    }
                ));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn worker_add_publishes_then_succeeds() {
        let store = MemoryStore::with_items(vec![item("1", "b", 5), item("2", "a", 10)]);
        let mut h = Harness::start(FakeAuth::signed_in(session("u1")), store);
        h.next().await;

        h.commands
            .send(Command::Add {
                session: session("u1"),
                text: "buy milk".to_string(),
            })
            .await
            .unwrap();

        match h.next().await {
            Event::Published(items) => assert_eq!(texts(&items), ["b", "a", "buy milk"]),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(h.next().await, Event::Succeeded(Op::Add)));
        assert_eq!(h.store.list_calls(), 1);
    }

    #[tokio::test]
    async fn worker_add_with_failed_reload_reports_both() {
        let store = MemoryStore::default();
        store.fail_list(true);
        let mut h = Harness::start(FakeAuth::signed_in(session("u1")), store);
        h.next().await;

        h.commands
            .send(Command::Add {
                session: session("u1"),
                text: "buy milk".to_string(),
            })
            .await
            .unwrap();

        assert!(matches!(h.next().await, Event::Succeeded(Op::Add)));
        match h.next().await {
            Event::Failed(err) => assert_eq!(err.op(), Op::Load),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn worker_sign_out_clears_and_notifies() {
        let store = MemoryStore::with_items(vec![item("1", "a", 1)]);
        let mut h = Harness::start(FakeAuth::signed_in(session("u1")), store);
        h.next().await;

        h.commands.send(Command::Load(session("u1"))).await.unwrap();
        assert!(matches!(h.next().await, Event::Published(items) if items.len() == 1));
        assert!(matches!(h.next().await, Event::Succeeded(Op::Load)));

        h.commands.send(Command::SignOut).await.unwrap();
        let mut saw_signed_out = false;
        for _ in 0..2 {
            match h.next().await {
                Event::Succeeded(Op::SignOut) => {}
                Event::AuthStateChanged(None) => saw_signed_out = true,
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert!(saw_signed_out);
        assert!(h.auth.current().is_none());
    }

    #[tokio::test]
    async fn worker_stops_when_ui_goes_away() {
        let (command_tx, command_rx) = mpsc::channel(1);
        let (event_tx, event_rx) = mpsc::channel(1);
        let worker = SyncWorker::new(FakeAuth::default(), MemoryStore::default(), command_rx, event_tx);
        let handle = tokio::spawn(worker.start());
        drop(event_rx);
        drop(command_tx);
        handle.await.unwrap();
    }
}
