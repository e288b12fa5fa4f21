//! Lobby: the cluster's public entry point. Owns raw account credentials,
//! tracks the single registered world and its channel list, and assigns a
//! channel to every accepted login.

mod parsers;
mod store;
mod world_link;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use nexus::manager::ManagerPacket;
use nexus::net::server::TcpServer;
use nexus::runtime::{accept_and_register, Runtime};
use wire::codes;
use wire::config::CoreConfig;

use parsers::{AccountLoginParser, AccountLogoutParser, LobbyContext, SetWorldInfoParser};
use store::InMemoryAccountStore;
use world_link::WorldLink;

#[derive(Parser)]
#[command(name = "lobby", version, about = "Lobby process: login authority and channel assignment")]
struct Cli {
    #[arg(long)]
    config: Option<String>,
    #[arg(long)]
    verbose: bool,
}

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

    let store = InMemoryAccountStore::new();
    store.register("admin", "admin");
    let link = Arc::new(WorldLink::new());

    let runtime_log = log.clone();
    let runtime = Runtime::start(config.multithread_mode, &log, move |reactor| {
        let ctx = LobbyContext {
            reactor,
            log: runtime_log.new(slog::o!("component" => "manager")),
        };
        let mut manager = ManagerPacket::new(Box::new(ctx));
        manager.register(codes::PACKET_SET_WORLD_INFO, Box::new(SetWorldInfoParser { link: link.clone() }));
        manager.register(
            codes::PACKET_ACCOUNT_LOGIN,
            Box::new(AccountLoginParser { store: store.clone(), link: link.clone() }),
        );
        manager.register(codes::PACKET_ACCOUNT_LOGOUT, Box::new(AccountLogoutParser));
        Box::new(manager)
    });
    let mut runtime = match runtime {
        Ok(rt) => rt,
        Err(e) => {
            slog::error!(log, "failed to start runtime"; "error" => %e);
            return ExitCode::FAILURE;
        }
    };

    let server = match TcpServer::bind(addr, config.diffie_hellman_key_pair.clone(), log.new(slog::o!("component" => "accept"))) {
        Ok(s) => s,
        Err(e) => {
            slog::error!(log, "failed to bind listener"; "addr" => %addr, "error" => %e);
            runtime.shutdown();
            return ExitCode::FAILURE;
        }
    };

    slog::info!(log, "lobby listening"; "addr" => %addr);
    if let Err(e) = accept_and_register(server, &runtime, &log) {
        slog::error!(log, "accept loop exited"; "error" => %e);
        runtime.shutdown();
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn listen_addr(config: &CoreConfig) -> Result<SocketAddr, std::net::AddrParseError> {
    let ip = if config.listen_address == "any" {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    } else {
        config.listen_address.parse()?
    };
    Ok(SocketAddr::new(ip, config.port))
}
