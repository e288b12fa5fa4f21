use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use slog::Logger;

use crate::net::{Reactor, TcpServer};
use crate::worker::{Manager, Worker, WorkerHandle};

/// Standard thread layout shared by every process (lobby/world/channel):
/// a timer thread, an I/O reactor thread, a "main" worker, an "async" worker,
/// and `K` additional connection workers, per the concurrency model. The
/// accept loop itself is left to the caller, which runs `TcpServer::run` on
/// whichever thread called [`Runtime::start`].
pub struct Runtime {
    pub timers: Arc<crate::timer::TimerManager>,
    pub reactor: Arc<Reactor>,
    pub main_worker: WorkerHandle,
    pub async_worker: WorkerHandle,
    pub workers: Vec<WorkerHandle>,
    io_thread: Option<thread::JoinHandle<()>>,
}

/// `max(available_parallelism - 2, 1)`, or `1` when multithreading is off.
pub fn worker_count(multithread: bool) -> usize {
    if !multithread {
        return 1;
    }
    thread::available_parallelism().map(|n| n.get()).unwrap_or(1).saturating_sub(2).max(1)
}

impl Runtime {
    /// `build_manager` is called once per worker (main, async, and each of
    /// the `K` extra workers) with a fresh clone of the reactor, so every
    /// worker gets its own `ManagerPacket` instance backed by the same
    /// shared registries.
    pub fn start(multithread: bool, log: &Logger, build_manager: impl Fn(Arc<Reactor>) -> Box<dyn Manager>) -> io::Result<Self> {
        let timers = Arc::new(crate::timer::TimerManager::start());
        let reactor = Arc::new(Reactor::new()?);

        let mut main = Worker::new("main", log.new(slog::o!("worker" => "main")));
        main.add_manager(build_manager(reactor.clone()));
        let main_worker = main.start(false);

        let mut async_w = Worker::new("async", log.new(slog::o!("worker" => "async")));
        async_w.add_manager(build_manager(reactor.clone()));
        let async_worker = async_w.start(false);

        let count = worker_count(multithread);
        let mut workers = Vec::with_capacity(count);
        for i in 0..count {
            let name = format!("worker-{i}");
            let mut w = Worker::new(name.clone(), log.new(slog::o!("worker" => name.clone())));
            w.add_manager(build_manager(reactor.clone()));
            workers.push(w.start(false));
        }

        let io_log = log.new(slog::o!("thread" => "io"));
        let io_reactor = reactor.clone();
        let io_thread = thread::Builder::new()
            .name("io".into())
            .spawn(move || run_io_loop(io_reactor, io_log))
            .expect("failed to spawn io thread");

        Ok(Runtime {
            timers,
            reactor,
            main_worker,
            async_worker,
            workers,
            io_thread: Some(io_thread),
        })
    }

    /// Workers eligible to have a new connection assigned to them by
    /// [`TcpServer::pick_least_busy`]. Falls back to the main worker when
    /// run single-threaded.
    pub fn connection_workers(&self) -> &[WorkerHandle] {
        if self.workers.is_empty() {
            std::slice::from_ref(&self.main_worker)
        } else {
            &self.workers
        }
    }

    pub fn shutdown(&mut self) {
        self.main_worker.shutdown();
        self.async_worker.shutdown();
        for w in &self.workers {
            w.shutdown();
        }
        self.main_worker.join();
        self.async_worker.join();
        for w in &mut self.workers {
            w.join();
        }
    }
}

fn run_io_loop(reactor: Arc<Reactor>, log: Logger) {
    loop {
        match reactor.poll_once(Some(Duration::from_millis(200))) {
            Ok(ready) => {
                for id in ready {
                    let Some(conn) = reactor.connection(id) else {
                        continue;
                    };
                    let mut guard = conn.lock().unwrap();
                    if let Err(e) = guard.on_readable() {
                        slog::debug!(log, "connection read failed"; "connection" => id, "error" => %e);
                    }
                    if let Err(e) = guard.flush_outgoing(false) {
                        slog::debug!(log, "connection flush failed"; "connection" => id, "error" => %e);
                    }
                }
            }
            Err(e) => slog::warn!(log, "reactor poll failed"; "error" => %e),
        }
    }
}

/// Convenience for an accept loop that only needs to register each accepted
/// connection with the reactor before handing it back to its worker.
pub fn accept_and_register(mut server: TcpServer, runtime: &Runtime, log: &Logger) -> io::Result<()> {
    server.run(runtime.connection_workers(), |conn, _worker| {
        if let Err(e) = runtime.reactor.register(conn) {
            slog::warn!(log, "failed to register accepted connection with reactor"; "error" => %e);
        }
    })
}
