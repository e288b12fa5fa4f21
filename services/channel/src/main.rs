//! Channel: simulates a slice of the game world and hosts client sessions.
//! The core's concern with this process stops at its server-to-server link
//! to World — registration, relay delivery, and record sync; client game
//! protocol and zone simulation are out of scope.

mod local_state;
mod parsers;

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;

use concord::manager::DataSyncManager;
use concord::object::InMemoryDatabase;
use nexus::manager::ManagerPacket;
use nexus::net::connection::Role;
use nexus::net::Connection;
use nexus::runtime::Runtime;
use nexus::TimerManager;
use wire::codes;
use wire::config::CoreConfig;
use wire::crypto::DiffieHellman;
use wire::packet::Packet;

use local_state::LocalCharacterTable;
use parsers::{ChannelContext, DataSyncParser, RelayDeliveryParser, WorldInfoCache, WorldInfoReplyParser};

#[derive(Parser)]
#[command(name = "channel", version, about = "Channel process: zone host and the world's registered link")]
struct Cli {
    #[arg(long)]
    config: Option<String>,
    #[arg(long, default_value = "1")]
    channel_id: i8,
    #[arg(long, default_value = "Channel")]
    channel_name: String,
    #[arg(long)]
    world_address: SocketAddr,
    #[arg(long, default_value = "127.0.0.1")]
    advertise_host: String,
    #[arg(long, default_value = "14666")]
    advertise_port: u16,
    #[arg(long)]
    verbose: bool,
}

const WORLD_CONNECTION_ID: usize = 1_000_000;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let log = wire::logging::init(cli.verbose, false);

    let config = match &cli.config {
        Some(path) => match CoreConfig::load(path) {
            Ok(c) => c,
            Err(e) => {
                slog::error!(log, "failed to load config"; "path" => path, "error" => %e);
                return ExitCode::FAILURE;
            }
        },
        None => CoreConfig::default(),
    };

    let characters = Arc::new(LocalCharacterTable::new());
    let world_info = Arc::new(WorldInfoCache::new());
    let timers = Arc::new(TimerManager::start());
    let sync = Arc::new(DataSyncManager::new(InMemoryDatabase::new(), timers, log.new(slog::o!("component" => "sync"))));

    let runtime_log = log.clone();
    let runtime = Runtime::start(config.multithread_mode, &log, move |reactor| {
        let ctx = ChannelContext {
            reactor,
            log: runtime_log.new(slog::o!("component" => "manager")),
        };
        let mut manager = ManagerPacket::new(Box::new(ctx));
        manager.register(codes::PACKET_GET_WORLD_INFO, Box::new(WorldInfoReplyParser { cache: world_info.clone() }));
        manager.register(codes::PACKET_RELAY, Box::new(RelayDeliveryParser { characters: characters.clone() }));
        manager.register(codes::PACKET_DATA_SYNC, Box::new(DataSyncParser { sync: sync.clone() }));
        Box::new(manager)
    });
    let mut runtime = match runtime {
        Ok(rt) => rt,
        Err(e) => {
            slog::error!(log, "failed to start runtime"; "error" => %e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = connect_to_world(&cli, &runtime, sync.clone(), config.diffie_hellman_key_pair.clone(), log.new(slog::o!("component" => "world_link"))) {
        slog::error!(log, "failed to connect to world"; "error" => %e);
        runtime.shutdown();
        return ExitCode::FAILURE;
    }

    slog::info!(log, "channel running"; "channel_id" => cli.channel_id, "world" => %cli.world_address);

    // The accept loop for client game connections lives outside this
    // core; block here so the runtime's worker/io threads keep driving
    // the world link for the process lifetime.
    loop {
        thread::sleep(Duration::from_secs(3600));
    }
}

/// Dials World as a client connection and, once the handshake reaches
/// `Encrypted`, sends `PACKET_SET_CHANNEL_INFO` to register. Mirrors
/// `world`'s own lobby-link bring-up: `Connection::flush_outgoing` only
/// encrypts and frames once the connection is fully `Encrypted`, so nothing
/// may be queued before the watcher thread observes that state.
fn connect_to_world(
    cli: &Cli,
    runtime: &Runtime,
    sync: Arc<DataSyncManager>,
    dh_prime_hex: Option<String>,
    log: slog::Logger,
) -> std::io::Result<()> {
    let socket = mio::net::TcpStream::connect(cli.world_address)?;
    let dh = DiffieHellman::generate(dh_prime_hex.as_deref()).map_err(std::io::Error::other)?;
    let queue = runtime.async_worker.queue();
    let mut conn = Connection::new(WORLD_CONNECTION_ID, socket, Role::Client, queue, log.clone());
    conn.begin_handshake(dh).map_err(std::io::Error::other)?;
    let handle = runtime.reactor.register(conn)?;

    let channel_id = cli.channel_id;
    let channel_name = cli.channel_name.clone();
    let advertise_host = cli.advertise_host.clone();
    let advertise_port = cli.advertise_port;
    thread::spawn(move || {
        for _ in 0..200 {
            thread::sleep(Duration::from_millis(50));
            let status = handle.lock().unwrap().status();
            if status == nexus::net::ConnectionStatus::Encrypted {
                sync.register_connection(WORLD_CONNECTION_ID, ["CharacterLogin".to_string()]);
                let mut packet = Packet::new();
                if let Err(e) = encode_channel_info(&mut packet, channel_id, &channel_name, &advertise_host, advertise_port) {
                    slog::warn!(log, "failed to encode channel info"; "error" => %e);
                    return;
                }
                handle.lock().unwrap().queue_packet(packet.into_bytes());
                slog::info!(log, "registered with world"; "channel_id" => channel_id);
                return;
            }
            if status == nexus::net::ConnectionStatus::Disconnected {
                slog::warn!(log, "world connection closed before handshake completed");
                return;
            }
        }
        slog::warn!(log, "timed out waiting for world handshake");
    });
    Ok(())
}

fn encode_channel_info(packet: &mut Packet, channel_id: i8, name: &str, host: &str, port: u16) -> wire::Result<()> {
    packet.write_u16_le(codes::PACKET_SET_CHANNEL_INFO)?;
    packet.write_u8(channel_id as u8)?;
    packet.write_string16(name)?;
    packet.write_string16(host)?;
    packet.write_u16_le(port)?;
    Ok(())
}
