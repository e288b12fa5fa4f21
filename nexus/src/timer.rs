use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::message::{Message, MessageQueue};

/// Opaque handle returned by [`TimerManager::register`]/`register_periodic`,
/// used only to `cancel` the event later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

struct Event {
    period: Option<Duration>,
    target: Arc<MessageQueue>,
    callback: Arc<dyn Fn() + Send + Sync>,
}

struct State {
    heap: BinaryHeap<Reverse<(Instant, u64)>>,
    events: HashMap<u64, Event>,
}

/// Single background thread owning a deadline-ordered set of timer events.
/// Fires every event whose deadline has passed by enqueueing its payload as
/// an `Execute` message on the target queue, then re-inserts periodic events
/// with an updated deadline.
pub struct TimerManager {
    state: Arc<Mutex<State>>,
    cv: Arc<Condvar>,
    running: Arc<AtomicBool>,
    next_id: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl TimerManager {
    pub fn start() -> Self {
        let state = Arc::new(Mutex::new(State {
            heap: BinaryHeap::new(),
            events: HashMap::new(),
        }));
        let cv = Arc::new(Condvar::new());
        let running = Arc::new(AtomicBool::new(true));

        let (s2, c2, r2) = (state.clone(), cv.clone(), running.clone());
        let handle = thread::Builder::new()
            .name("timer".into())
            .spawn(move || run_loop(s2, c2, r2))
            .expect("failed to spawn timer thread");

        TimerManager {
            state,
            cv,
            running,
            next_id: Arc::new(AtomicU64::new(1)),
            handle: Some(handle),
        }
    }

    pub fn register(
        &self,
        deadline: Instant,
        target: Arc<MessageQueue>,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> TimerHandle {
        self.insert(deadline, None, target, Arc::new(callback))
    }

    pub fn register_periodic(
        &self,
        period: Duration,
        target: Arc<MessageQueue>,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> TimerHandle {
        self.insert(Instant::now() + period, Some(period), target, Arc::new(callback))
    }

    fn insert(
        &self,
        deadline: Instant,
        period: Option<Duration>,
        target: Arc<MessageQueue>,
        callback: Arc<dyn Fn() + Send + Sync>,
    ) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.state.lock().unwrap();
        guard.heap.push(Reverse((deadline, id)));
        guard.events.insert(id, Event { period, target, callback });
        drop(guard);
        self.cv.notify_one();
        TimerHandle(id)
    }

    /// Removes the event if still present. A no-op if it already fired (and
    /// was one-shot) or was already cancelled.
    pub fn cancel(&self, handle: TimerHandle) {
        let mut guard = self.state.lock().unwrap();
        guard.events.remove(&handle.0);
    }

    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.cv.notify_one();
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for TimerManager {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.shutdown();
        }
    }
}

fn run_loop(state: Arc<Mutex<State>>, cv: Arc<Condvar>, running: Arc<AtomicBool>) {
    let mut guard = state.lock().unwrap();
    while running.load(Ordering::SeqCst) {
        let next_deadline = guard.heap.peek().map(|Reverse((d, _))| *d);

        let Some(deadline) = next_deadline else {
            guard = cv.wait(guard).unwrap();
            continue;
        };

        let now = Instant::now();
        if deadline > now {
            let (g, _timeout) = cv.wait_timeout(guard, deadline - now).unwrap();
            guard = g;
            continue;
        }

        // Fire every event whose deadline has passed.
        while let Some(Reverse((deadline, id))) = guard.heap.peek().copied() {
            if deadline > Instant::now() {
                break;
            }
            guard.heap.pop();
            let Some(event) = guard.events.remove(&id) else {
                continue;
            };
            let cb = event.callback.clone();
            event.target.enqueue(Message::Execute(Box::new(move || cb())));
            if let Some(period) = event.period {
                let new_deadline = deadline + period;
                guard.heap.push(Reverse((new_deadline, id)));
                guard.events.insert(
                    id,
                    Event {
                        period: Some(period),
                        target: event.target,
                        callback: event.callback,
                    },
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn one_shot_fires_once() {
        let timers = TimerManager::start();
        let queue = MessageQueue::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f2 = fired.clone();
        timers.register(Instant::now() + Duration::from_millis(5), queue.clone(), move || {
            f2.fetch_add(1, Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(60));
        let mut dest = Vec::new();
        queue.dequeue_any(&mut dest);
        assert_eq!(dest.len(), 1);
        if let Message::Execute(f) = dest.into_iter().next().unwrap() {
            f();
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_prevents_firing() {
        let timers = TimerManager::start();
        let queue = MessageQueue::new();
        let handle = timers.register(Instant::now() + Duration::from_millis(30), queue.clone(), || {});
        timers.cancel(handle);
        thread::sleep(Duration::from_millis(60));
        assert!(queue.is_empty());
    }
}
