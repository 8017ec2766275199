use std::path::PathBuf;
use std::sync::Arc;
use tuneparty::config;
use tuneparty::directory::MemoryDirectory;
use tuneparty::events::ChannelBroadcaster;
use tuneparty::provider::{ProviderRegistry, StaticCatalog, TrackResolver};
use tuneparty::proxy::RouteTable;
use tuneparty::relay::RelayServer;
use tuneparty::scheduler::Scheduler;
use tuneparty::session::Party;

#[derive(Debug, Default)]
struct CliArgs {
    ip: Option<String>,
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = parse_args(std::env::args().skip(1).collect())?;
    if let Err(err) = tuneparty::logging::init_logging() {
        eprintln!("Warning: failed to initialize logging: {err}");
    }

    let mut party_config = config::load_config(args.config.as_deref())?;
    if let Some(ip) = args.ip {
        party_config.bind_addr = ip;
    }

    let catalog = StaticCatalog::new(party_config.catalog.clone());
    tracing::info!(tracks = catalog.len(), "catalog provider loaded");
    let resolver = TrackResolver::new(ProviderRegistry::new().with(Arc::new(catalog)));
    tracing::info!(providers = ?resolver.registry().names(), "providers registered");

    let (broadcaster, events) = ChannelBroadcaster::new();
    let directory = Arc::new(MemoryDirectory::new());
    let party = Arc::new(
        Party::new(resolver, Arc::new(broadcaster))
            .with_directory(directory.clone())
            .with_proxy(Arc::new(RouteTable::new()))
            .with_settings(party_config.party_settings()),
    );

    let scheduler = Scheduler::new(party.clone(), party_config.tick_interval()).spawn();
    let relay = RelayServer::start(
        &party_config.bind_addr,
        party,
        directory,
        events,
        party_config.max_listeners,
    )?;

    relay.wait();
    scheduler.shutdown();
    Ok(())
}

fn parse_args(args: Vec<String>) -> anyhow::Result<CliArgs> {
    let mut out = CliArgs::default();
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--ip" => {
                index += 1;
                let Some(value) = args.get(index) else {
                    anyhow::bail!("--ip requires host:port value");
                };
                if value.trim().is_empty() {
                    anyhow::bail!("--ip cannot be empty");
                }
                out.ip = Some(value.trim().to_string());
            }
            "--config" => {
                index += 1;
                let Some(value) = args.get(index) else {
                    anyhow::bail!("--config requires a file path");
                };
                out.config = Some(PathBuf::from(value));
            }
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            other => anyhow::bail!("unknown argument {other}"),
        }
        index += 1;
    }
    Ok(out)
}

fn print_help() {
    println!("TuneParty");
    println!("  --ip host:port    Relay bind address (default from config, 0.0.0.0:7878)");
    println!("  --config path     Config file (default ~/.config/tuneparty/party.json)");
}
