use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use slog::Logger;

use wire::crypto::DiffieHellman;
use wire::Result;

use super::connection::{Connection, Role};
use super::ConnectionId;
use crate::worker::WorkerHandle;

const SERVER_TOKEN: Token = Token(0);

/// Binds, listens, and hands each accepted socket to the least-busy worker.
/// Least-busy is whichever worker's `assignment_count()` is smallest, ties
/// broken by insertion order; a count <= 2 short-circuits the search since
/// that worker is effectively idle.
pub struct TcpServer {
    listener: TcpListener,
    poll: Poll,
    dh_prime_hex: Option<String>,
    next_id: AtomicUsize,
    log: Logger,
}

impl TcpServer {
    pub fn bind(addr: SocketAddr, dh_prime_hex: Option<String>, log: Logger) -> io::Result<Self> {
        let mut listener = TcpListener::bind(addr)?;
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, SERVER_TOKEN, Interest::READABLE)?;
        Ok(TcpServer {
            listener,
            poll,
            dh_prime_hex,
            next_id: AtomicUsize::new(1),
            log,
        })
    }

    /// Creates a new connection for an accepted socket. Overridable by
    /// composing a different `TcpServer` front-end per process; the default
    /// copies the server's DH parameters and starts the server-side
    /// handshake immediately.
    pub fn create_connection(
        &self,
        socket: TcpStream,
        worker: &WorkerHandle,
    ) -> Result<Connection> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let dh = DiffieHellman::generate(self.dh_prime_hex.as_deref())?;
        let log = self.log.new(slog::o!("connection" => id));
        let mut conn = Connection::new(id, socket, Role::Server, worker.queue(), log);
        conn.begin_handshake(dh)?;
        Ok(conn)
    }

    /// Picks the worker with the smallest `assignment_count()`. Short-
    /// circuits as soon as one with a count <= 2 is found.
    pub fn pick_least_busy<'a>(workers: &'a [WorkerHandle]) -> Option<&'a WorkerHandle> {
        let mut best: Option<(&WorkerHandle, usize)> = None;
        for w in workers {
            let count = w.assignment_count();
            if count <= 2 {
                return Some(w);
            }
            if best.map_or(true, |(_, best_count)| count < best_count) {
                best = Some((w, count));
            }
        }
        best.map(|(w, _)| w)
    }

    /// Runs the accept loop on the calling thread. `on_connection` is
    /// called with each newly accepted, not-yet-handshaked connection so
    /// the caller can register it with the I/O reactor and track it.
    pub fn run(
        &mut self,
        workers: &[WorkerHandle],
        mut on_connection: impl FnMut(Connection, &WorkerHandle),
    ) -> io::Result<()> {
        let mut events = Events::with_capacity(128);
        loop {
            self.poll.poll(&mut events, None)?;
            for event in events.iter() {
                if event.token() != SERVER_TOKEN {
                    continue;
                }
                loop {
                    match self.listener.accept() {
                        Ok((socket, addr)) => {
                            slog::debug!(self.log, "accepted connection"; "addr" => %addr);
                            let Some(worker) = Self::pick_least_busy(workers) else {
                                slog::error!(self.log, "no workers available to accept connection");
                                continue;
                            };
                            match self.create_connection(socket, worker) {
                                Ok(conn) => on_connection(conn, worker),
                                Err(e) => {
                                    slog::warn!(self.log, "failed to create connection"; "error" => %e);
                                }
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(e) => {
                            slog::warn!(self.log, "accept error"; "error" => %e);
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// Tracks live connections for the I/O reactor thread: one `mio::Poll`
/// shared by every connection's socket, tokens mapped back to
/// `ConnectionId`.
pub struct Reactor {
    poll: Mutex<Poll>,
    connections: Mutex<hashbrown::HashMap<ConnectionId, Arc<Mutex<Connection>>>>,
}

impl Reactor {
    pub fn new() -> io::Result<Self> {
        Ok(Reactor {
            poll: Mutex::new(Poll::new()?),
            connections: Mutex::new(hashbrown::HashMap::new()),
        })
    }

    pub fn register(&self, mut conn: Connection) -> io::Result<Arc<Mutex<Connection>>> {
        let id = conn.id();
        let token = Token(id);
        self.poll
            .lock()
            .unwrap()
            .registry()
            .register(conn.socket_mut(), token, Interest::READABLE | Interest::WRITABLE)?;
        let shared = Arc::new(Mutex::new(conn));
        self.connections.lock().unwrap().insert(id, shared.clone());
        Ok(shared)
    }

    pub fn deregister(&self, id: ConnectionId) {
        self.connections.lock().unwrap().remove(&id);
    }

    pub fn poll_once(&self, timeout: Option<std::time::Duration>) -> io::Result<Vec<ConnectionId>> {
        let mut events = Events::with_capacity(256);
        self.poll.lock().unwrap().poll(&mut events, timeout)?;
        let mut ready = Vec::new();
        for event in events.iter() {
            ready.push(event.token().0);
        }
        Ok(ready)
    }

    pub fn connection(&self, id: ConnectionId) -> Option<Arc<Mutex<Connection>>> {
        self.connections.lock().unwrap().get(&id).cloned()
    }
}
