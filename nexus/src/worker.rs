use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use slog::Logger;

use crate::message::{Message, MessageKind, MessageQueue};

/// A handler bound to a worker for one or more [`MessageKind`]s.
pub trait Manager: Send {
    fn kinds(&self) -> &[MessageKind];

    /// Processes one message. A failure is logged and the message dropped;
    /// it never tears the worker down.
    fn process(&mut self, msg: Message, log: &Logger) -> Result<(), wire::Error>;
}

/// Single-threaded cooperative event loop bound to exactly one queue.
/// Any number of connections may be assigned here; because a connection is
/// pinned to one worker for its whole lifetime, its state never needs a
/// lock on the hot path.
pub struct Worker {
    name: String,
    queue: Arc<MessageQueue>,
    managers: HashMap<u8, Arc<Mutex<Box<dyn Manager>>>>,
    running: Arc<AtomicBool>,
    log: Logger,
    handle: Option<JoinHandle<()>>,
}

fn kind_key(kind: MessageKind) -> u8 {
    match kind {
        MessageKind::System => 0,
        MessageKind::Packet => 1,
        MessageKind::Connection => 2,
        MessageKind::Client => 3,
    }
}

impl Worker {
    pub fn new(name: impl Into<String>, log: Logger) -> Self {
        Worker {
            name: name.into(),
            queue: MessageQueue::new(),
            managers: HashMap::new(),
            running: Arc::new(AtomicBool::new(false)),
            log,
            handle: None,
        }
    }

    pub fn queue(&self) -> Arc<MessageQueue> {
        self.queue.clone()
    }

    pub fn add_manager(&mut self, manager: Box<dyn Manager>) {
        let kinds = manager.kinds().to_vec();
        let shared = Arc::new(Mutex::new(manager));
        for kind in kinds {
            self.managers.insert(kind_key(kind), shared.clone());
        }
    }

    /// Starts the worker. `blocking = true` runs the loop on the calling
    /// thread instead of spawning one (used for the "main" worker).
    pub fn start(mut self, blocking: bool) -> WorkerHandle {
        self.running.store(true, Ordering::SeqCst);
        let queue = self.queue.clone();
        let running = self.running.clone();

        if blocking {
            self.run();
            return WorkerHandle {
                queue,
                running,
                join: None,
            };
        }

        let name = self.name.clone();
        let join = thread::Builder::new()
            .name(name)
            .spawn(move || self.run())
            .expect("failed to spawn worker thread");

        WorkerHandle {
            queue,
            running,
            join: Some(join),
        }
    }

    fn run(mut self) {
        let mut batch = Vec::new();
        loop {
            batch.clear();
            self.queue.dequeue_all(&mut batch);
            for msg in batch.drain(..) {
                if matches!(msg, Message::Shutdown) || !self.running.load(Ordering::SeqCst) {
                    self.running.store(false, Ordering::SeqCst);
                    return;
                }
                self.dispatch(msg);
            }
        }
    }

    fn dispatch(&mut self, msg: Message) {
        if let Message::Execute(f) = msg {
            let result = panic::catch_unwind(AssertUnwindSafe(f));
            if result.is_err() {
                slog::error!(self.log, "execute closure panicked"; "worker" => &self.name);
            }
            return;
        }

        let kind = msg.kind();
        let key = kind_key(kind);
        let log = self.log.clone();
        if let Some(manager) = self.managers.get(&key) {
            let manager = manager.clone();
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                manager.lock().unwrap().process(msg, &log)
            }));
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    slog::warn!(self.log, "manager failed to process message"; "error" => %e);
                }
                Err(_) => {
                    slog::error!(self.log, "manager panicked processing message");
                }
            }
        } else {
            slog::debug!(self.log, "no manager registered for message kind"; "kind" => ?kind);
        }
    }
}

/// A reference to a started worker: its queue (for assigning connections
/// and for load comparisons) and a way to shut it down and join it.
pub struct WorkerHandle {
    queue: Arc<MessageQueue>,
    running: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn queue(&self) -> Arc<MessageQueue> {
        self.queue.clone()
    }

    /// Approximates this worker's load as the queue's strong refcount: one
    /// reference is held by the worker loop itself, the handle holds
    /// another, and every connection assigned here holds one more.
    pub fn assignment_count(&self) -> usize {
        Arc::strong_count(&self.queue).saturating_sub(2)
    }

    pub fn shutdown(&self) {
        self.queue.enqueue(Message::Shutdown);
    }

    pub fn join(&mut self) {
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}
