//! World: owns the account/character registries and group subsystems, acts
//! as the registration point for every channel, and bridges channel
//! traffic to the lobby.

mod parsers;
mod registry;
mod state;

use std::io::{Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream};
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;

use nexus::manager::ManagerPacket;
use nexus::net::connection::Role;
use nexus::net::frame::{ExtensionFrame, EXTENSION_FRAME_SIZE};
use nexus::net::server::TcpServer;
use nexus::net::Connection;
use nexus::runtime::{accept_and_register, Runtime};
use nexus::TimerManager;
use wire::codes;
use wire::config::CoreConfig;
use wire::crypto::DiffieHellman;
use wire::packet::Packet;

use parsers::{
    AccountLoginResultParser, CharacterLoginParser, ClanUpdateParser, DataSyncParser, GetWorldInfoParser, PartyUpdateParser, RelayParser,
    SetChannelInfoParser, TeamUpdateParser, WebGameParser, WorldContext,
};
use registry::WorldRegistry;
use state::{WorldHooks, WorldState};

#[derive(Parser)]
#[command(name = "world", version, about = "World process: registries, group subsystems, and the lobby/channel bridge")]
struct Cli {
    #[arg(long)]
    config: Option<String>,
    #[arg(long, default_value = "0")]
    world_id: i8,
    #[arg(long, default_value = "World")]
    world_name: String,
    #[arg(long)]
    lobby_address: Option<SocketAddr>,
    #[arg(long)]
    verbose: bool,
}

const OUTBOUND_CONNECTION_ID_BASE: usize = 1_000_000;

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

    let addr = match listen_addr(&config) {
        Ok(addr) => addr,
        Err(e) => {
            slog::error!(log, "invalid listen address"; "error" => %e);
            return ExitCode::FAILURE;
        }
    };

    let host_for_descriptor = if config.listen_address == "any" { "127.0.0.1".to_string() } else { config.listen_address.clone() };
    let registry = Arc::new(WorldRegistry::new(cli.world_id, cli.world_name, host_for_descriptor, config.port));

    let timers = Arc::new(TimerManager::start());
    let state = Arc::new(WorldState::new(timers, Duration::from_secs(config.channel_connection_timeout_secs), registry.clone(), log.clone()));
    let hooks = Arc::new(WorldHooks {
        parties: state.parties.clone(),
        clans: state.clans.clone(),
        teams: state.teams.clone(),
        characters: state.characters.clone(),
        sync: state.sync.clone(),
        match_queue: state.match_queue.clone(),
        log: log.new(slog::o!("component" => "hooks")),
    });

    let runtime_log = log.clone();
    let registry_for_runtime = registry.clone();
    let runtime = Runtime::start(config.multithread_mode, &log, move |reactor| {
        let registry = registry_for_runtime.clone();
        let ctx = WorldContext {
            reactor,
            log: runtime_log.new(slog::o!("component" => "manager")),
        };
        let mut manager = ManagerPacket::new(Box::new(ctx));
        manager.register(codes::PACKET_SET_CHANNEL_INFO, Box::new(SetChannelInfoParser { registry: registry.clone(), state: state.clone() }));
        manager.register(codes::PACKET_GET_WORLD_INFO, Box::new(GetWorldInfoParser { registry: registry.clone() }));
        manager.register(codes::PACKET_DATA_SYNC, Box::new(DataSyncParser { state: state.clone() }));
        manager.register(codes::PACKET_CHARACTER_LOGIN, Box::new(CharacterLoginParser { state: state.clone() }));
        manager.register(codes::PACKET_WEB_GAME, Box::new(WebGameParser { state: state.clone() }));
        manager.register(codes::PACKET_ACCOUNT_LOGIN, Box::new(AccountLoginResultParser { state: state.clone() }));
        manager.register(codes::PACKET_RELAY, Box::new(RelayParser { state: state.clone() }));
        manager.register(codes::PACKET_PARTY_UPDATE, Box::new(PartyUpdateParser { state: state.clone(), hooks: hooks.clone() }));
        manager.register(codes::PACKET_CLAN_UPDATE, Box::new(ClanUpdateParser { state: state.clone(), hooks: hooks.clone() }));
        manager.register(codes::PACKET_TEAM_UPDATE, Box::new(TeamUpdateParser { state: state.clone() }));
        Box::new(manager)
    });
    let mut runtime = match runtime {
        Ok(rt) => rt,
        Err(e) => {
            slog::error!(log, "failed to start runtime"; "error" => %e);
            return ExitCode::FAILURE;
        }
    };

    if let Some(lobby_addr) = cli.lobby_address {
        if let Err(e) = connect_to_lobby(lobby_addr, &runtime, &registry, config.diffie_hellman_key_pair.clone(), log.new(slog::o!("component" => "lobby_link"))) {
            slog::warn!(log, "failed to start lobby connection, continuing without it"; "error" => %e);
        }
        notify_world_up(lobby_addr, config.port, log.new(slog::o!("component" => "world_up")));
    }

    let server = match TcpServer::bind(addr, config.diffie_hellman_key_pair.clone(), log.new(slog::o!("component" => "accept"))) {
        Ok(s) => s,
        Err(e) => {
            slog::error!(log, "failed to bind listener"; "addr" => %addr, "error" => %e);
            runtime.shutdown();
            return ExitCode::FAILURE;
        }
    };

    slog::info!(log, "world listening"; "addr" => %addr);
    if let Err(e) = accept_and_register(server, &runtime, &log) {
        slog::error!(log, "accept loop exited"; "error" => %e);
        runtime.shutdown();
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Dials the lobby as a client connection, then hands the connection to a
/// watcher thread that sends `PACKET_SET_WORLD_INFO` as soon as the
/// handshake reaches `Encrypted` — queuing it any earlier would race the
/// DH/Blowfish handshake bytes on the wire.
fn connect_to_lobby(
    lobby_addr: SocketAddr,
    runtime: &Runtime,
    registry: &Arc<WorldRegistry>,
    dh_prime_hex: Option<String>,
    log: slog::Logger,
) -> std::io::Result<()> {
    let socket = mio::net::TcpStream::connect(lobby_addr)?;
    let dh = DiffieHellman::generate(dh_prime_hex.as_deref()).map_err(std::io::Error::other)?;
    let queue = runtime.async_worker.queue();
    let mut conn = Connection::new(OUTBOUND_CONNECTION_ID_BASE, socket, Role::Client, queue, log.clone());
    conn.begin_handshake(dh).map_err(std::io::Error::other)?;
    let handle = runtime.reactor.register(conn)?;

    let registry = registry.clone();
    thread::spawn(move || {
        for _ in 0..200 {
            thread::sleep(Duration::from_millis(50));
            let status = handle.lock().unwrap().status();
            if status == nexus::net::ConnectionStatus::Encrypted {
                let description = registry.describe();
                let mut packet = Packet::new();
                if let Err(e) = encode_world_info(&mut packet, &description) {
                    slog::warn!(log, "failed to encode world info"; "error" => %e);
                    return;
                }
                handle.lock().unwrap().queue_packet(packet.into_bytes());
                slog::info!(log, "registered with lobby"; "addr" => %lobby_addr);
                return;
            }
            if status == nexus::net::ConnectionStatus::Disconnected {
                slog::warn!(log, "lobby connection closed before handshake completed");
                return;
            }
        }
        slog::warn!(log, "timed out waiting for lobby handshake");
    });
    Ok(())
}

/// Announces this world's listening port to the lobby over a short-lived
/// raw connection, ahead of (and independent from) the encrypted
/// registration link `connect_to_lobby` brings up. This is the same
/// pre-encryption extension framing `keytool ping` round-trips, just with
/// the world-up tuple instead of a bare ping; the lobby answers with a
/// port-less ack and closes.
fn notify_world_up(lobby_addr: SocketAddr, world_port: u16, log: slog::Logger) {
    thread::spawn(move || {
        let mut stream = match TcpStream::connect_timeout(&lobby_addr, Duration::from_secs(5)) {
            Ok(s) => s,
            Err(e) => {
                slog::warn!(log, "world-up notification: connect failed"; "error" => %e);
                return;
            }
        };
        stream.set_read_timeout(Some(Duration::from_secs(5))).ok();
        stream.set_nodelay(true).ok();

        let frame = ExtensionFrame::WorldUp { port: world_port }.encode();
        if let Err(e) = stream.write_all(&frame) {
            slog::warn!(log, "world-up notification: write failed"; "error" => %e);
            return;
        }

        let mut reply = [0u8; EXTENSION_FRAME_SIZE];
        if let Err(e) = stream.read_exact(&mut reply) {
            slog::warn!(log, "world-up notification: read failed"; "error" => %e);
            return;
        }
        match ExtensionFrame::decode(&reply) {
            Some(ExtensionFrame::WorldUp { .. }) => {
                slog::info!(log, "lobby acknowledged world-up notification"; "addr" => %lobby_addr);
            }
            other => {
                slog::warn!(log, "world-up notification: unexpected reply"; "reply" => ?other);
            }
        }
    });
}

fn encode_world_info(packet: &mut Packet, description: &registry::WorldDescription) -> wire::Result<()> {
    packet.write_u16_le(codes::PACKET_SET_WORLD_INFO)?;
    packet.write_u8(description.id as u8)?;
    packet.write_string16(&description.name)?;
    packet.write_string16(&description.host)?;
    packet.write_u16_le(description.port)?;
    packet.write_u16_le(description.channels.len() as u16)?;
    for channel in &description.channels {
        packet.write_u8(channel.id as u8)?;
        packet.write_string16(&channel.name)?;
        packet.write_string16(&channel.host)?;
        packet.write_u16_le(channel.port)?;
    }
    Ok(())
}

fn listen_addr(config: &CoreConfig) -> Result<SocketAddr, std::net::AddrParseError> {
    let ip = if config.listen_address == "any" {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    } else {
        config.listen_address.parse()?
    };
    Ok(SocketAddr::new(ip, config.port))
}
