//! State-change and progress events and listener delivery
//!
//! Workflows buffer [`NodeStateEvent`]s while their locks are held and hand
//! them to the [`EventDispatcher`] once the outermost locked section ends.
//! Executing models report [`NodeProgressEvent`]s through a
//! [`ProgressSender`] into the same channel. The dispatcher drains the
//! channel on the engine runtime and calls each listener from a snapshot of
//! the listener list, so no engine lock is held during delivery and events
//! for one project arrive in the order they were produced.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::state::NodeState;
use crate::types::{NodeId, NodeMessage};

/// A container changed its state or message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStateEvent {
    pub node_id: NodeId,
    pub state: NodeState,
    pub message: Option<NodeMessage>,
}

impl NodeStateEvent {
    pub fn new(node_id: NodeId, state: NodeState, message: Option<NodeMessage>) -> Self {
        Self {
            node_id,
            state,
            message,
        }
    }
}

/// An executing leaf reported progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeProgressEvent {
    pub node_id: NodeId,
    /// Fraction of the work done, between 0 and 1
    pub progress: f64,
    pub message: Option<String>,
}

impl NodeProgressEvent {
    pub fn new(node_id: NodeId, progress: f64, message: Option<String>) -> Self {
        Self {
            node_id,
            progress,
            message,
        }
    }
}

/// Receiver of state-change notifications
pub trait NodeStateListener: Send + Sync {
    fn state_changed(&self, event: &NodeStateEvent);

    /// Called for progress reported by executing leaves
    fn progress_changed(&self, _event: &NodeProgressEvent) {}
}

/// Everything travelling through the dispatcher channel
enum Notification {
    State(NodeStateEvent),
    Progress(NodeProgressEvent),
}

impl Notification {
    fn node_id(&self) -> &NodeId {
        match self {
            Notification::State(event) => &event.node_id,
            Notification::Progress(event) => &event.node_id,
        }
    }
}

/// Handle returned when registering a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration {
    id: ListenerId,
    /// Only events for this container or its descendants are delivered
    scope: Option<NodeId>,
    listener: Arc<dyn NodeStateListener>,
}

type ListenerList = Arc<RwLock<Vec<Arc<Registration>>>>;

/// Asynchronous fan-out of state-change events to listeners
pub struct EventDispatcher {
    sender: mpsc::UnboundedSender<Notification>,
    listeners: ListenerList,
    next_id: AtomicU64,
    backlog: Arc<AtomicUsize>,
    backlog_warn: usize,
}

impl EventDispatcher {
    /// Spawn the delivery task on `handle`
    ///
    /// A warning is logged whenever more than `backlog_warn` events are
    /// waiting for delivery.
    pub fn spawn(handle: &tokio::runtime::Handle, backlog_warn: usize) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Notification>();
        let listeners: ListenerList = Arc::new(RwLock::new(Vec::new()));
        let backlog = Arc::new(AtomicUsize::new(0));

        let task_listeners = Arc::clone(&listeners);
        let task_backlog = Arc::clone(&backlog);
        handle.spawn(async move {
            while let Some(notification) = receiver.recv().await {
                task_backlog.fetch_sub(1, Ordering::Relaxed);
                let snapshot: Vec<Arc<Registration>> = task_listeners.read().clone();
                for registration in snapshot {
                    let in_scope = registration
                        .scope
                        .as_ref()
                        .map_or(true, |scope| notification.node_id().is_descendant_of(scope));
                    if !in_scope {
                        continue;
                    }
                    match &notification {
                        Notification::State(event) => registration.listener.state_changed(event),
                        Notification::Progress(event) => registration.listener.progress_changed(event),
                    }
                }
            }
            log::debug!("Event dispatcher stopped");
        });

        Self {
            sender,
            listeners,
            next_id: AtomicU64::new(1),
            backlog,
            backlog_warn,
        }
    }

    /// Register a listener, optionally scoped to a subtree
    pub fn add_listener(
        &self,
        scope: Option<NodeId>,
        listener: Arc<dyn NodeStateListener>,
    ) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push(Arc::new(Registration {
            id,
            scope,
            listener,
        }));
        id
    }

    /// Remove a listener; returns false if it was not registered
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|r| r.id != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Queue events for delivery
    pub fn publish(&self, events: Vec<NodeStateEvent>) {
        if events.is_empty() {
            return;
        }
        let count = events.len();
        let pending = self.backlog.fetch_add(count, Ordering::Relaxed) + count;
        if pending > self.backlog_warn && pending - count <= self.backlog_warn {
            log::warn!("{} state events waiting for delivery", pending);
        }
        for event in events {
            if self.sender.send(Notification::State(event)).is_err() {
                log::warn!("Event dispatcher is gone, dropping state events");
                return;
            }
        }
    }

    /// Handle for reporting progress from a worker thread
    pub fn progress_sender(&self) -> ProgressSender {
        ProgressSender {
            sender: self.sender.clone(),
            backlog: Arc::clone(&self.backlog),
        }
    }
}

/// Cloneable handle queueing progress events behind earlier state events
#[derive(Clone)]
pub struct ProgressSender {
    sender: mpsc::UnboundedSender<Notification>,
    backlog: Arc<AtomicUsize>,
}

impl ProgressSender {
    pub fn send(&self, event: NodeProgressEvent) {
        self.backlog.fetch_add(1, Ordering::Relaxed);
        if self.sender.send(Notification::Progress(event)).is_err() {
            self.backlog.fetch_sub(1, Ordering::Relaxed);
            log::debug!("Event dispatcher is gone, dropping progress event");
        }
    }
}

impl std::fmt::Debug for ProgressSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSender").finish_non_exhaustive()
    }
}

/// A no-op listener that discards all events
pub struct NullListener;

impl NodeStateListener for NullListener {
    fn state_changed(&self, _event: &NodeStateEvent) {}
}

/// A vector-based listener that collects events
///
/// Useful for testing to verify events were emitted correctly.
#[derive(Default)]
pub struct VecListener {
    events: Mutex<Vec<NodeStateEvent>>,
    progress: Mutex<Vec<NodeProgressEvent>>,
    arrived: Condvar,
}

impl VecListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<NodeStateEvent> {
        self.events.lock().clone()
    }

    /// States reported for one container, in delivery order
    pub fn states_of(&self, node_id: &NodeId) -> Vec<NodeState> {
        self.events
            .lock()
            .iter()
            .filter(|e| &e.node_id == node_id)
            .map(|e| e.state)
            .collect()
    }

    /// Progress reported for one leaf, in delivery order
    pub fn progress_of(&self, node_id: &NodeId) -> Vec<NodeProgressEvent> {
        self.progress
            .lock()
            .iter()
            .filter(|e| &e.node_id == node_id)
            .cloned()
            .collect()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        self.events.lock().clear();
        self.progress.lock().clear();
    }

    /// Block until an event matching `predicate` arrived or `timeout` passed
    pub fn wait_for<F>(&self, timeout: Duration, predicate: F) -> bool
    where
        F: Fn(&NodeStateEvent) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut events = self.events.lock();
        loop {
            if events.iter().any(&predicate) {
                return true;
            }
            if self.arrived.wait_until(&mut events, deadline).timed_out() {
                return events.iter().any(&predicate);
            }
        }
    }
}

impl NodeStateListener for VecListener {
    fn state_changed(&self, event: &NodeStateEvent) {
        self.events.lock().push(event.clone());
        self.arrived.notify_all();
    }

    fn progress_changed(&self, event: &NodeProgressEvent) {
        self.progress.lock().push(event.clone());
    }
}
