use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

use bytes::{Buf, BytesMut};
use mio::net::TcpStream;
use slog::Logger;

use wire::crypto::dh::{DH_KEY_PAIR_DATA_SIZE, DH_SHARED_DATA_SIZE};
use wire::crypto::{BlowfishCipher, DiffieHellman};
use wire::packet::Packet;
use wire::{Error, Result};

use super::frame;
use super::ConnectionId;
use crate::message::{Message, MessageQueue};

const NONCE_SIZE: usize = 20;
const READ_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    AwaitingEncryption,
    Encrypted,
}

struct SendState {
    pending: VecDeque<Vec<u8>>,
    in_flight: bool,
    close_after: bool,
}

/// One end of the framed, length-prefixed, Blowfish-after-DH transport.
/// Owns its socket and buffers; the message queue reference is shared with
/// whichever worker this connection was assigned to at accept time.
pub struct Connection {
    id: ConnectionId,
    socket: TcpStream,
    role: Role,
    status: ConnectionStatus,
    dh: Option<DiffieHellman>,
    cipher: Option<BlowfishCipher>,
    recv_buf: BytesMut,
    send: Mutex<SendState>,
    queue: Arc<MessageQueue>,
    log: Logger,
}

impl Connection {
    pub fn new(id: ConnectionId, socket: TcpStream, role: Role, queue: Arc<MessageQueue>, log: Logger) -> Self {
        Connection {
            id,
            socket,
            role,
            status: ConnectionStatus::Connecting,
            dh: None,
            cipher: None,
            recv_buf: BytesMut::with_capacity(READ_CHUNK),
            send: Mutex::new(SendState {
                pending: VecDeque::new(),
                in_flight: false,
                close_after: false,
            }),
            queue,
            log,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn socket(&self) -> &TcpStream {
        &self.socket
    }

    pub fn socket_mut(&mut self) -> &mut TcpStream {
        &mut self.socket
    }

    /// Begins the handshake. The server side sends its hello immediately;
    /// the client side waits for one.
    pub fn begin_handshake(&mut self, dh: DiffieHellman) -> Result<()> {
        self.status = ConnectionStatus::AwaitingEncryption;
        if self.role == Role::Server {
            let hello = build_server_hello(&dh);
            self.queue_raw(hello);
        }
        self.dh = Some(dh);
        Ok(())
    }

    /// Pushes a fully-built packet payload (command code first) onto the
    /// outgoing list. Encryption/framing happens at flush time.
    pub fn queue_packet(&self, payload: Vec<u8>) {
        let mut guard = self.send.lock().unwrap();
        guard.pending.push_back(payload);
    }

    fn queue_raw(&self, framed_bytes: Vec<u8>) {
        // Raw (pre-encryption handshake) bytes bypass framing/encryption;
        // marked by an empty cipher at flush time via `flush_raw`.
        let mut guard = self.send.lock().unwrap();
        guard.pending.push_back(framed_bytes);
    }

    /// Extracts one queued payload, encrypts/frames it if we are past the
    /// handshake (raw handshake bytes are already wire-ready), and writes
    /// it. No-op while a send is already in flight.
    pub fn flush_outgoing(&mut self, close_after: bool) -> Result<()> {
        {
            let mut guard = self.send.lock().unwrap();
            if close_after {
                guard.close_after = true;
            }
            if guard.in_flight {
                return Ok(());
            }
            if guard.pending.is_empty() {
                if guard.close_after {
                    drop(guard);
                    self.disconnect(true);
                }
                return Ok(());
            }
            guard.in_flight = true;
        }

        let next = {
            let mut guard = self.send.lock().unwrap();
            guard.pending.pop_front()
        };
        let Some(payload) = next else {
            let mut guard = self.send.lock().unwrap();
            guard.in_flight = false;
            return Ok(());
        };

        let wire_bytes = match (&self.cipher, self.status) {
            (Some(cipher), ConnectionStatus::Encrypted) => frame::encode_packet(cipher, &payload)?,
            _ => payload,
        };

        let result = self.socket.write_all(&wire_bytes);
        {
            let mut guard = self.send.lock().unwrap();
            guard.in_flight = false;
        }
        match result {
            Ok(()) => {
                let should_continue = {
                    let guard = self.send.lock().unwrap();
                    !guard.pending.is_empty()
                };
                if should_continue {
                    self.flush_outgoing(false)?;
                } else {
                    let close = self.send.lock().unwrap().close_after;
                    if close {
                        self.disconnect(true);
                    }
                }
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => {
                self.disconnect(true);
                Err(Error::Io(e))
            }
        }
    }

    /// Called by the I/O reactor when the socket becomes readable. Reads
    /// what is available, then drives the handshake or packet parser over
    /// the accumulated buffer.
    pub fn on_readable(&mut self) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.socket.read(&mut chunk) {
                Ok(0) => {
                    self.disconnect(false);
                    return Ok(());
                }
                Ok(n) => self.recv_buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    self.disconnect(false);
                    return Err(Error::Io(e));
                }
            }
        }
        self.drain_buffer()
    }

    fn drain_buffer(&mut self) -> Result<()> {
        loop {
            match self.status {
                ConnectionStatus::AwaitingEncryption => {
                    if !self.try_advance_handshake()? {
                        break;
                    }
                }
                ConnectionStatus::Encrypted => {
                    if !self.try_parse_packet()? {
                        break;
                    }
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn try_advance_handshake(&mut self) -> Result<bool> {
        match self.role {
            Role::Server => self.advance_server_handshake(),
            Role::Client => self.advance_client_handshake(),
        }
    }

    /// Peeks for a pre-encryption extension frame (ping or world-up) ahead
    /// of the full client hello, answers it in kind, and closes the
    /// connection once the reply is flushed. Returns `false` (no bytes
    /// consumed) when the buffer is too short to tell yet or does not
    /// decode as one, so the caller falls through to the ordinary
    /// handshake parse.
    fn try_dispatch_extension(&mut self) -> Result<bool> {
        if self.recv_buf.len() < frame::EXTENSION_FRAME_SIZE {
            return Ok(false);
        }
        let Some(extension) = frame::ExtensionFrame::decode(&self.recv_buf[..frame::EXTENSION_FRAME_SIZE]) else {
            return Ok(false);
        };
        self.recv_buf.advance(frame::EXTENSION_FRAME_SIZE);
        match extension {
            frame::ExtensionFrame::Ping => {
                slog::debug!(self.log, "answering pre-encryption ping");
                self.queue_raw(frame::ExtensionFrame::Ping.encode().to_vec());
            }
            frame::ExtensionFrame::WorldUp { port } => {
                slog::info!(self.log, "world announced itself via extension frame"; "port" => port);
                self.queue.enqueue(Message::WorldNotification { port });
                // the ack omits the port; the original only ever replies with the bare tag.
                self.queue_raw(frame::ExtensionFrame::WorldUp { port: 0 }.encode().to_vec());
            }
        }
        self.flush_outgoing(true)?;
        Ok(true)
    }

    fn advance_server_handshake(&mut self) -> Result<bool> {
        if self.try_dispatch_extension()? {
            return Ok(true);
        }
        let needed = DH_KEY_PAIR_DATA_SIZE + NONCE_SIZE;
        if self.recv_buf.len() < needed {
            return Ok(false);
        }
        let bytes = self.recv_buf.split_to(needed);
        let (client_pub, _nonce) = parse_client_hello(&bytes)?;
        let dh = self
            .dh
            .as_ref()
            .ok_or_else(|| Error::State("handshake not started".into()))?;
        let key = DiffieHellman::blowfish_key(&client_pub, dh)?;
        self.complete_handshake(key)
    }

    fn advance_client_handshake(&mut self) -> Result<bool> {
        let needed = frame::HANDSHAKE_MAGIC.len() + DH_SHARED_DATA_SIZE + DH_KEY_PAIR_DATA_SIZE;
        if self.recv_buf.len() < needed {
            return Ok(false);
        }
        let bytes = self.recv_buf.split_to(needed);
        let (prime_hex, server_pub) = parse_server_hello(&bytes)?;
        let dh = DiffieHellman::generate(Some(&prime_hex))?;
        let key = DiffieHellman::blowfish_key(&server_pub, &dh)?;

        let mut nonce = [0u8; NONCE_SIZE];
        rand::Rng::fill(&mut rand::thread_rng(), &mut nonce[..]);
        let hello = build_client_hello(&dh.public_key_bytes(), &nonce);
        self.dh = Some(dh);
        self.queue_raw(hello);
        self.complete_handshake(key)
    }

    fn complete_handshake(&mut self, key: [u8; 8]) -> Result<bool> {
        self.cipher = Some(BlowfishCipher::new(key));
        self.status = ConnectionStatus::Encrypted;
        self.queue.enqueue(Message::ConnectionEncrypted(self.id));
        Ok(true)
    }

    fn try_parse_packet(&mut self) -> Result<bool> {
        let Some(padded_size) = frame::read_header(&self.recv_buf)? else {
            return Ok(false);
        };
        let total = frame::FRAME_HEADER_SIZE + padded_size as usize;
        if self.recv_buf.len() < total {
            return Ok(false);
        }
        let mut frame_bytes = self.recv_buf.split_to(total);
        frame_bytes.advance(frame::FRAME_HEADER_SIZE);

        let cipher = self
            .cipher
            .as_ref()
            .ok_or_else(|| Error::State("encryption not established".into()))?;
        let payload = frame::decode_packet(cipher, &frame_bytes)?;

        self.queue.enqueue(Message::Packet {
            connection: self.id,
            packet: Packet::from_bytes(payload),
        });
        Ok(true)
    }

    pub fn disconnect(&mut self, notify: bool) {
        if self.status == ConnectionStatus::Disconnected {
            return;
        }
        self.status = ConnectionStatus::Disconnected;
        self.cipher = None;
        {
            let mut guard = self.send.lock().unwrap();
            guard.pending.clear();
            guard.in_flight = false;
        }
        if notify {
            self.queue.enqueue(Message::ConnectionClosed(self.id));
        }
    }
}

fn build_server_hello(dh: &DiffieHellman) -> Vec<u8> {
    let mut out = Vec::with_capacity(frame::HANDSHAKE_MAGIC.len() + DH_SHARED_DATA_SIZE + DH_KEY_PAIR_DATA_SIZE);
    out.extend_from_slice(&frame::HANDSHAKE_MAGIC);
    out.extend_from_slice(&dh.prime_bytes());
    out.extend_from_slice(&dh.public_key_bytes());
    out
}

fn parse_server_hello(bytes: &[u8]) -> Result<(String, Vec<u8>)> {
    if &bytes[..frame::HANDSHAKE_MAGIC.len()] != frame::HANDSHAKE_MAGIC.as_slice() {
        return Err(Error::Protocol("bad handshake magic".into()));
    }
    let mut offset = frame::HANDSHAKE_MAGIC.len();
    let prime = &bytes[offset..offset + DH_SHARED_DATA_SIZE];
    offset += DH_SHARED_DATA_SIZE;
    let server_pub = &bytes[offset..offset + DH_KEY_PAIR_DATA_SIZE];
    Ok((hex_encode(prime), server_pub.to_vec()))
}

fn build_client_hello(client_pub: &[u8], nonce: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(client_pub.len() + nonce.len());
    out.extend_from_slice(client_pub);
    out.extend_from_slice(nonce);
    out
}

fn parse_client_hello(bytes: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    let client_pub = bytes[..DH_KEY_PAIR_DATA_SIZE].to_vec();
    let nonce = bytes[DH_KEY_PAIR_DATA_SIZE..].to_vec();
    Ok((client_pub, nonce))
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use slog::Discard;

    fn test_logger() -> Logger {
        Logger::root(Discard, slog::o!())
    }

    /// Connects a plain blocking std client to a non-blocking mio-backed
    /// `Connection` in the `Server` role, mirroring how `keytool ping` and a
    /// newly-started World talk to a Lobby/World listener before either
    /// side brings up full encryption.
    fn connected_pair() -> (Connection, std::net::TcpStream) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = std::net::TcpStream::connect(addr).unwrap();
        let (server_std, _) = listener.accept().unwrap();
        server_std.set_nonblocking(true).unwrap();
        let server = TcpStream::from_std(server_std);
        let queue = MessageQueue::new();
        let mut conn = Connection::new(1, server, Role::Server, queue, test_logger());
        let dh = DiffieHellman::generate(None).unwrap();
        conn.begin_handshake(dh).unwrap();
        conn.flush_outgoing(false).unwrap();

        let mut hello = vec![0u8; frame::HANDSHAKE_MAGIC.len() + DH_SHARED_DATA_SIZE + DH_KEY_PAIR_DATA_SIZE];
        client.set_read_timeout(Some(std::time::Duration::from_secs(5))).unwrap();
        client.read_exact(&mut hello).unwrap();
        (conn, client)
    }

    #[test]
    fn pre_encryption_ping_is_answered_with_a_pong_and_the_connection_closes() {
        let (mut conn, mut client) = connected_pair();

        client.write_all(&frame::ExtensionFrame::Ping.encode()).unwrap();
        conn.on_readable().unwrap();
        conn.flush_outgoing(false).unwrap();

        let mut reply = [0u8; frame::EXTENSION_FRAME_SIZE];
        client.read_exact(&mut reply).unwrap();
        assert_eq!(frame::ExtensionFrame::decode(&reply), Some(frame::ExtensionFrame::Ping));
        assert_eq!(conn.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn pre_encryption_world_up_enqueues_a_notification_and_acks_without_the_port() {
        let (mut conn, mut client) = connected_pair();
        let queue = conn.queue.clone();

        client.write_all(&frame::ExtensionFrame::WorldUp { port: 18667 }.encode()).unwrap();
        conn.on_readable().unwrap();
        conn.flush_outgoing(false).unwrap();

        let mut reply = [0u8; frame::EXTENSION_FRAME_SIZE];
        client.read_exact(&mut reply).unwrap();
        assert_eq!(frame::ExtensionFrame::decode(&reply), Some(frame::ExtensionFrame::WorldUp { port: 0 }));

        let mut messages = Vec::new();
        queue.dequeue_any(&mut messages);
        assert!(messages.iter().any(|m| matches!(m, Message::WorldNotification { port: 18667 })));
    }

    #[test]
    fn handshake_messages_round_trip() {
        let server_dh = DiffieHellman::generate(None).unwrap();
        let hello = build_server_hello(&server_dh);
        let (prime_hex, server_pub) = parse_server_hello(&hello).unwrap();
        assert_eq!(prime_hex, server_dh.prime_hex());
        assert_eq!(server_pub, server_dh.public_key_bytes());

        let client_dh = DiffieHellman::generate(Some(&prime_hex)).unwrap();
        let nonce = [7u8; NONCE_SIZE];
        let client_hello = build_client_hello(&client_dh.public_key_bytes(), &nonce);
        let (client_pub, parsed_nonce) = parse_client_hello(&client_hello).unwrap();
        assert_eq!(client_pub, client_dh.public_key_bytes());
        assert_eq!(parsed_nonce, nonce);

        let server_key = DiffieHellman::blowfish_key(&client_pub, &server_dh).unwrap();
        let client_key = DiffieHellman::blowfish_key(&server_pub, &client_dh).unwrap();
        assert_eq!(server_key, client_key);
    }
}
