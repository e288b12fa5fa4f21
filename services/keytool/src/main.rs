//! Operator utility: generate a pinnable DH prime for `diffie_hellman_key_pair`
//! and probe a running process's listen port with the pre-encryption ping
//! extension frame.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};

use nexus::net::frame::{ExtensionFrame, EXTENSION_FRAME_SIZE};
use wire::crypto::DiffieHellman;

#[derive(Parser)]
#[command(name = "keytool", version, about = "DH key generation and connectivity probe for the cluster")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generates a fresh DH prime/keypair and prints the prime as hex,
    /// suitable for pinning in `diffie_hellman_key_pair` so every process in
    /// a deployment agrees on the same group instead of each generating its
    /// own at boot.
    GenKeys,
    /// Connects to a process's listen port and round-trips the
    /// pre-encryption ping extension frame, reporting latency.
    Ping {
        address: SocketAddr,
        #[arg(long, default_value = "5")]
        timeout_secs: u64,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Command::GenKeys => gen_keys(),
        Command::Ping { address, timeout_secs } => ping(address, Duration::from_secs(timeout_secs)),
    }
}

fn gen_keys() -> ExitCode {
    let dh = match DiffieHellman::generate(None) {
        Ok(dh) => dh,
        Err(e) => {
            eprintln!("failed to generate keypair: {e}");
            return ExitCode::FAILURE;
        }
    };
    println!("diffie_hellman_key_pair = \"{}\"", dh.prime_hex());
    ExitCode::SUCCESS
}

fn ping(address: SocketAddr, timeout: Duration) -> ExitCode {
    let mut stream = match TcpStream::connect_timeout(&address, timeout) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("connect to {address} failed: {e}");
            return ExitCode::FAILURE;
        }
    };
    stream.set_read_timeout(Some(timeout)).ok();
    stream.set_nodelay(true).ok();

    let frame = ExtensionFrame::Ping.encode();
    let start = Instant::now();
    if let Err(e) = stream.write_all(&frame) {
        eprintln!("write failed: {e}");
        return ExitCode::FAILURE;
    }

    let mut reply = [0u8; EXTENSION_FRAME_SIZE];
    if let Err(e) = stream.read_exact(&mut reply) {
        eprintln!("read failed: {e}");
        return ExitCode::FAILURE;
    }
    let elapsed = start.elapsed();

    match ExtensionFrame::decode(&reply) {
        Some(ExtensionFrame::Ping) => {
            println!("pong from {address} in {:.2}ms", elapsed.as_secs_f64() * 1000.0);
            ExitCode::SUCCESS
        }
        other => {
            eprintln!("unexpected reply: {other:?}");
            ExitCode::FAILURE
        }
    }
}
