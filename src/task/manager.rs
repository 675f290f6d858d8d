//! The callback surface a parent exposes to its children, the mailbox that
//! turns those callbacks into queued signals, and the [`RootManager`] that
//! sits above the top of a task tree.

use crate::task::lifecycle::{TaskRef, lock, spawn_worker};
use crate::task::types::*;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

/// Shared handle to a task manager
pub type ManagerHandle = Arc<dyn TaskManager>;

/// Callbacks a child uses to report back to the composite that started it.
///
/// Implementations must not block: children call these from their own
/// workers.
pub trait TaskManager: Send + Sync {
    fn sig_task_done(&self, task: TaskId);
    fn sig_task_failed(&self, task: TaskId, error: ErrorIndicator);
    fn sig_task_aborted(&self, task: TaskId, error: Option<ErrorIndicator>);
    fn sig_message(&self, task: TaskId, message: TaskMessage);
}

/// A queued request for a composite's worker loop.
pub enum Signal {
    Done(TaskId),
    Failed(TaskId, ErrorIndicator),
    Aborted(TaskId, Option<ErrorIndicator>),
    Message(TaskId, TaskMessage),
    /// Register a new child from outside the loop
    Add(TaskRef),
    /// Remove a child from outside the loop
    Remove(TaskId),
}

impl Signal {
    /// The task this signal is about
    pub fn task_id(&self) -> TaskId {
        match self {
            Signal::Done(id)
            | Signal::Failed(id, _)
            | Signal::Aborted(id, _)
            | Signal::Message(id, _)
            | Signal::Remove(id) => *id,
            Signal::Add(task) => task.id(),
        }
    }
}

impl std::fmt::Debug for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Signal::Done(id) => write!(f, "Done({})", id),
            Signal::Failed(id, err) => write!(f, "Failed({}, {})", id, err),
            Signal::Aborted(id, _) => write!(f, "Aborted({})", id),
            Signal::Message(id, msg) => write!(f, "Message({}, {:?})", id, msg),
            Signal::Add(task) => write!(f, "Add({}: {})", task.id(), task.name()),
            Signal::Remove(id) => write!(f, "Remove({})", id),
        }
    }
}

/// FIFO queue feeding a composite's worker loop.
#[derive(Clone, Debug)]
pub struct Mailbox {
    tx: UnboundedSender<Signal>,
}

impl Mailbox {
    pub fn new() -> (Self, UnboundedReceiver<Signal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a signal. Signals posted after the loop has gone away are dropped.
    pub fn post(&self, signal: Signal) {
        if let Err(err) = self.tx.send(signal) {
            debug!("Dropping signal for closed mailbox: {:?}", err.0);
        }
    }
}

impl TaskManager for Mailbox {
    fn sig_task_done(&self, task: TaskId) {
        self.post(Signal::Done(task));
    }

    fn sig_task_failed(&self, task: TaskId, error: ErrorIndicator) {
        self.post(Signal::Failed(task, error));
    }

    fn sig_task_aborted(&self, task: TaskId, error: Option<ErrorIndicator>) {
        self.post(Signal::Aborted(task, error));
    }

    fn sig_message(&self, task: TaskId, message: TaskMessage) {
        self.post(Signal::Message(task, message));
    }
}

/// Events seen by the root of a task tree
#[derive(Debug, Clone)]
pub enum TaskEvent {
    Done {
        task_id: TaskId,
    },
    Failed {
        task_id: TaskId,
        error: ErrorIndicator,
    },
    Aborted {
        task_id: TaskId,
        error: Option<ErrorIndicator>,
    },
    Message {
        task_id: TaskId,
        message: TaskMessage,
    },
}

/// Observer for root-level events
pub trait TaskEventObserver: Send + Sync {
    fn on_event(&self, event: &TaskEvent);
}

/// Manager for the top of a task tree: runs one task and hands back its outcome.
pub struct RootManager {
    mailbox: Mailbox,
    rx: tokio::sync::Mutex<UnboundedReceiver<Signal>>,
    observers: Vec<Box<dyn TaskEventObserver>>,
    messages: Mutex<Vec<(TaskId, TaskMessage)>>,
}

impl RootManager {
    pub fn new() -> Arc<Self> {
        Self::with_observers(Vec::new())
    }

    pub fn with_observers(observers: Vec<Box<dyn TaskEventObserver>>) -> Arc<Self> {
        let (mailbox, rx) = Mailbox::new();
        Arc::new(Self {
            mailbox,
            rx: tokio::sync::Mutex::new(rx),
            observers,
            messages: Mutex::new(Vec::new()),
        })
    }

    /// Initialise `task`, run it on its own worker and wait for its outcome.
    pub async fn run(self: &Arc<Self>, task: TaskRef) -> TaskOutcome {
        let handle: ManagerHandle = self.clone();
        if let Err(error) = task.init(handle) {
            warn!(task = %task.name(), code = error.code(), "Task failed during init");
            self.emit(&TaskEvent::Failed {
                task_id: task.id(),
                error: error.clone(),
            });
            return TaskOutcome::Failed { error };
        }

        let root = self.clone();
        let task_id = task.id();
        spawn_worker(task.clone(), move |error| root.sig_task_failed(task_id, error));
        self.wait_for(&task).await
    }

    /// Wait for the terminal signal of an already started task.
    pub async fn wait_for(&self, task: &TaskRef) -> TaskOutcome {
        let mut rx = self.rx.lock().await;
        while let Some(signal) = rx.recv().await {
            if signal.task_id() != task.id() {
                debug!("Root ignoring signal for foreign task: {:?}", signal);
                continue;
            }
            match signal {
                Signal::Done(_) => {
                    info!(task = %task.name(), "Top-level task done");
                    task.dispose();
                    return TaskOutcome::Done {
                        result: task.result(),
                    };
                }
                Signal::Failed(_, error) => {
                    warn!(task = %task.name(), code = error.code(), "Top-level task failed: {}", error.message());
                    task.dispose();
                    return TaskOutcome::Failed { error };
                }
                Signal::Aborted(_, error) => {
                    warn!(task = %task.name(), "Top-level task aborted");
                    task.dispose();
                    return TaskOutcome::Aborted { error };
                }
                Signal::Message(..) | Signal::Add(_) | Signal::Remove(_) => {}
            }
        }
        TaskOutcome::Aborted { error: None }
    }

    /// Messages forwarded by the top-level task so far
    pub fn messages(&self) -> Vec<(TaskId, TaskMessage)> {
        lock(&self.messages).clone()
    }

    fn emit(&self, event: &TaskEvent) {
        for observer in &self.observers {
            observer.on_event(event);
        }
    }
}

impl TaskManager for RootManager {
    fn sig_task_done(&self, task_id: TaskId) {
        self.emit(&TaskEvent::Done { task_id });
        self.mailbox.sig_task_done(task_id);
    }

    fn sig_task_failed(&self, task_id: TaskId, error: ErrorIndicator) {
        self.emit(&TaskEvent::Failed {
            task_id,
            error: error.clone(),
        });
        self.mailbox.sig_task_failed(task_id, error);
    }

    fn sig_task_aborted(&self, task_id: TaskId, error: Option<ErrorIndicator>) {
        self.emit(&TaskEvent::Aborted {
            task_id,
            error: error.clone(),
        });
        self.mailbox.sig_task_aborted(task_id, error);
    }

    fn sig_message(&self, task_id: TaskId, message: TaskMessage) {
        self.emit(&TaskEvent::Message {
            task_id,
            message: message.clone(),
        });
        lock(&self.messages).push((task_id, message.clone()));
        self.mailbox.sig_message(task_id, message);
    }
}

/// Observer that logs every root-level event
pub struct LoggingObserver;

impl TaskEventObserver for LoggingObserver {
    fn on_event(&self, event: &TaskEvent) {
        match event {
            TaskEvent::Done { task_id } => {
                info!("Task completed: {}", task_id);
            }
            TaskEvent::Failed { task_id, error } => {
                warn!("Task failed: {} - {}", task_id, error);
            }
            TaskEvent::Aborted { task_id, error } => match error {
                Some(error) => warn!("Task aborted: {} - {}", task_id, error),
                None => warn!("Task aborted: {}", task_id),
            },
            TaskEvent::Message { task_id, message } => {
                info!("Task {} message: {:?}", task_id, message);
            }
        }
    }
}
