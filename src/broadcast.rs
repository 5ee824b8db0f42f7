//! Live-update jobs for the task board.
//!
//! Request handlers build one of these after a write and hand it to the
//! pool. The job then talks to two collaborators the pool knows nothing
//! about: a [`TaskStore`] to read rows from and an [`EventSink`] to publish
//! named events to connected clients.

use super::{
    errors::{JobError, SinkError, StoreError},
    job::Job,
};
use chrono::NaiveDate;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{
    borrow::Cow,
    collections::BTreeMap,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
};
use tokio::sync::broadcast;
use tracing::trace;

/// Event name used for the full task list sent to a newly connected client.
pub const SNAPSHOT_EVENT: &str = "tasks";

/// A row of the task board. `due_date` travels as `YYYY-MM-DD`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub title: String,
    pub completed: bool,
    pub due_date: NaiveDate,
}

/// Read access to persisted tasks.
pub trait TaskStore: Send + Sync {
    fn list_tasks(&self) -> Result<Vec<Task>, StoreError>;
}

/// Publish side of the live-update transport.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &str, payload: Value) -> Result<(), SinkError>;
}

/// In-process [`TaskStore`] keyed by id.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<BTreeMap<i64, Task>>,
    next_id: AtomicI64,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new task and returns it with its assigned id.
    pub fn create(&self, title: impl Into<String>, completed: bool, due_date: NaiveDate) -> Task {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let task = Task {
            id,
            title: title.into(),
            completed,
            due_date,
        };
        self.tasks.write().insert(id, task.clone());
        task
    }

    /// Replaces an existing task. Returns `false` if the id is unknown.
    pub fn update(&self, task: Task) -> bool {
        let mut tasks = self.tasks.write();
        match tasks.get_mut(&task.id) {
            Some(slot) => {
                *slot = task;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: i64) -> bool {
        self.tasks.write().remove(&id).is_some()
    }

    pub fn get(&self, id: i64) -> Option<Task> {
        self.tasks.read().get(&id).cloned()
    }
}

impl TaskStore for MemoryTaskStore {
    fn list_tasks(&self) -> Result<Vec<Task>, StoreError> {
        Ok(self.tasks.read().values().cloned().collect())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub name: String,
    pub payload: Value,
}

/// [`EventSink`] fanning events out over a tokio broadcast channel.
///
/// Emitting while nobody is subscribed is not an error; the event is simply
/// not delivered. After [`BroadcastSink::close`] subscribers see the channel
/// close and further emits fail with [`SinkError::Closed`].
pub struct BroadcastSink {
    sender: RwLock<Option<broadcast::Sender<Event>>>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: RwLock::new(Some(sender)),
        }
    }

    pub fn subscribe(&self) -> Result<broadcast::Receiver<Event>, SinkError> {
        self.sender
            .read()
            .as_ref()
            .map(broadcast::Sender::subscribe)
            .ok_or(SinkError::Closed)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender
            .read()
            .as_ref()
            .map_or(0, broadcast::Sender::receiver_count)
    }

    pub fn close(&self) {
        self.sender.write().take();
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, event: &str, payload: Value) -> Result<(), SinkError> {
        let guard = self.sender.read();
        let sender = guard.as_ref().ok_or(SinkError::Closed)?;
        let event = Event {
            name: event.to_owned(),
            payload,
        };
        match sender.send(event) {
            Ok(receivers) => trace!(receivers, "event broadcast"),
            Err(_) => trace!("event dropped, no subscribers"),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Add,
    Update,
    Delete,
}

impl ChangeAction {
    /// Event name clients listen on.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Add => "add",
            ChangeAction::Update => "update",
            ChangeAction::Delete => "delete",
        }
    }
}

/// Tells clients a single task changed.
///
/// Emits event `action` with payload `{"data": .., "notification": ..}`.
pub struct ChangeBroadcast {
    action: ChangeAction,
    data: Value,
    notification: String,
    sink: Arc<dyn EventSink>,
}

impl ChangeBroadcast {
    pub fn new(
        sink: Arc<dyn EventSink>,
        action: ChangeAction,
        data: Value,
        notification: impl Into<String>,
    ) -> Self {
        Self {
            action,
            data,
            notification: notification.into(),
            sink,
        }
    }

    pub fn added(sink: Arc<dyn EventSink>, task: &Task) -> Result<Self, serde_json::Error> {
        Ok(Self::new(
            sink,
            ChangeAction::Add,
            serde_json::to_value(task)?,
            format!("New Task with title {} created", task.title),
        ))
    }

    pub fn updated(sink: Arc<dyn EventSink>, task: &Task) -> Result<Self, serde_json::Error> {
        Ok(Self::new(
            sink,
            ChangeAction::Update,
            serde_json::to_value(task)?,
            format!("{} updated", task.title),
        ))
    }

    pub fn deleted(sink: Arc<dyn EventSink>, id: i64) -> Self {
        Self::new(
            sink,
            ChangeAction::Delete,
            json!({ "id": id }),
            format!("Task {id} deleted"),
        )
    }

    pub fn action(&self) -> ChangeAction {
        self.action
    }

    pub fn notification(&self) -> &str {
        &self.notification
    }
}

impl Job for ChangeBroadcast {
    fn execute(self: Box<Self>) -> Result<(), JobError> {
        let Self {
            action,
            data,
            notification,
            sink,
        } = *self;
        let payload = json!({ "data": data, "notification": notification });
        sink.emit(action.as_str(), payload)?;
        Ok(())
    }

    fn label(&self) -> Cow<'static, str> {
        Cow::Owned(format!("broadcast:{}", self.action.as_str()))
    }
}

/// Sends the whole task list, ordered by id, as event [`SNAPSHOT_EVENT`].
/// Submitted when a client connects.
pub struct SnapshotBroadcast {
    store: Arc<dyn TaskStore>,
    sink: Arc<dyn EventSink>,
}

impl SnapshotBroadcast {
    pub fn new(store: Arc<dyn TaskStore>, sink: Arc<dyn EventSink>) -> Self {
        Self { store, sink }
    }
}

impl Job for SnapshotBroadcast {
    fn execute(self: Box<Self>) -> Result<(), JobError> {
        let mut tasks = self.store.list_tasks()?;
        tasks.sort_by_key(|task| task.id);
        self.sink.emit(SNAPSHOT_EVENT, serde_json::to_value(&tasks)?)?;
        Ok(())
    }

    fn label(&self) -> Cow<'static, str> {
        Cow::Borrowed("broadcast:snapshot")
    }
}
