use std::any::Any;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use wire::packet::Packet;

use crate::net::ConnectionId;
use crate::timer::TimerHandle;

/// Narrows a [`Message`] to the four kinds a [`crate::worker::Manager`]
/// declares interest in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    System,
    Packet,
    Connection,
    Client,
}

/// A tagged unit of work dispatched by a [`crate::worker::Worker`]. Owned by
/// its queue until dequeued, at which point ownership passes to the worker
/// that destroys it after dispatch.
pub enum Message {
    Init,
    Shutdown,
    Tick,
    /// A closure scheduled to run inline on the worker that dequeues it —
    /// the vehicle `TimerManager` uses to deliver a fired deadline.
    Execute(Box<dyn FnOnce() + Send>),
    Timeout(TimerHandle),
    Packet {
        connection: ConnectionId,
        packet: Packet,
    },
    ConnectionEncrypted(ConnectionId),
    ConnectionClosed(ConnectionId),
    WorldNotification { port: u16 },
    Client(Box<dyn Any + Send>),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Init | Message::Shutdown | Message::Tick | Message::Execute(_) | Message::Timeout(_) => {
                MessageKind::System
            }
            Message::Packet { .. } | Message::ConnectionEncrypted(_) | Message::ConnectionClosed(_) => {
                MessageKind::Connection
            }
            Message::WorldNotification { .. } => MessageKind::System,
            Message::Client(_) => MessageKind::Client,
        }
    }
}

/// FIFO multi-producer / multi-consumer queue with blocking dequeue.
///
/// A single `Mutex` + `Condvar` pair guards the queue: `Condvar::wait`
/// atomically releases the mutex while parked, so one lock suffices where
/// the original design used a queue lock and a separate empty-condition
/// lock. A dequeue blocks iff the queue is empty; a producer only calls
/// `notify_one` when its push transitions the queue from empty to
/// non-empty, so a waiter is never woken more than once per such
/// transition.
pub struct MessageQueue {
    inner: Mutex<VecDeque<Message>>,
    not_empty: Condvar,
}

impl MessageQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(MessageQueue {
            inner: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
        })
    }

    pub fn enqueue(&self, msg: Message) {
        let mut guard = self.inner.lock().unwrap();
        let was_empty = guard.is_empty();
        guard.push_back(msg);
        if was_empty {
            self.not_empty.notify_one();
        }
    }

    pub fn enqueue_many(&self, msgs: impl IntoIterator<Item = Message>) {
        let mut guard = self.inner.lock().unwrap();
        let was_empty = guard.is_empty();
        let mut any = false;
        for m in msgs {
            guard.push_back(m);
            any = true;
        }
        if was_empty && any {
            self.not_empty.notify_one();
        }
    }

    /// Blocks until at least one message is available, then returns the
    /// oldest one.
    pub fn dequeue(&self) -> Message {
        let mut guard = self.inner.lock().unwrap();
        loop {
            if let Some(m) = guard.pop_front() {
                return m;
            }
            guard = self.not_empty.wait(guard).unwrap();
        }
    }

    /// Blocks until at least one message is available, then drains the
    /// entire queue into `dest` in FIFO order.
    pub fn dequeue_all(&self, dest: &mut Vec<Message>) {
        let mut guard = self.inner.lock().unwrap();
        while guard.is_empty() {
            guard = self.not_empty.wait(guard).unwrap();
        }
        dest.extend(guard.drain(..));
    }

    /// Drains whatever is currently queued without blocking; may return an
    /// empty `dest`.
    pub fn dequeue_any(&self, dest: &mut Vec<Message>) {
        let mut guard = self.inner.lock().unwrap();
        dest.extend(guard.drain(..));
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn dequeue_blocks_until_enqueue() {
        let q = MessageQueue::new();
        let q2 = q.clone();
        let handle = thread::spawn(move || q2.dequeue());
        thread::sleep(Duration::from_millis(20));
        q.enqueue(Message::Tick);
        let m = handle.join().unwrap();
        assert_eq!(m.kind(), MessageKind::System);
    }

    #[test]
    fn dequeue_any_does_not_block_when_empty() {
        let q = MessageQueue::new();
        let mut dest = Vec::new();
        q.dequeue_any(&mut dest);
        assert!(dest.is_empty());
    }

    #[test]
    fn fifo_order_is_preserved() {
        let q = MessageQueue::new();
        q.enqueue(Message::Tick);
        q.enqueue(Message::Shutdown);
        let mut dest = Vec::new();
        q.dequeue_all(&mut dest);
        assert_eq!(dest.len(), 2);
        assert!(matches!(dest[0], Message::Tick));
        assert!(matches!(dest[1], Message::Shutdown));
    }
}
