//! dhtnode - run a DHT node, or talk to a running one.

mod cli;
mod simulation;

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing::info;
use tracing::level_filters::LevelFilter;

use dhtnode::control::ControlClient;
use dhtnode::{Config, DhtNode, IdentityStore, PartialConfig};

use cli::{Cli, Command};

fn main() -> ExitCode {
    let cli = Cli::parse();
    let datadir = cli.config.unwrap_or_else(IdentityStore::default_root);

    match run(cli.command, &datadir) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command, datadir: &Path) -> dhtnode::Result<()> {
    match command {
        Command::Start => start(datadir),
        Command::Simulate { nodes } => {
            tracing_subscriber::fmt()
                .with_max_level(LevelFilter::INFO)
                .init();

            simulation::run(nodes, interrupted()?)
        }
        Command::Info => {
            let info = client(datadir)?.get_info()?;
            println!("version: {}", info.version);
            Ok(())
        }
        Command::Peers { key, limit } => {
            for contact in client(datadir)?.get_peers(&key, limit)? {
                println!(
                    "{}:{} {}",
                    contact.address, contact.port, contact.fingerprint
                );
            }
            Ok(())
        }
        Command::Get { key } => {
            println!("{}", client(datadir)?.get_item(&key)?);
            Ok(())
        }
        Command::Put { key, value } => {
            client(datadir)?.put_item(&key, &value)?;
            println!("stored {key}");
            Ok(())
        }
    }
}

fn start(datadir: &Path) -> dhtnode::Result<()> {
    let (_, config) = IdentityStore::new(datadir).load_or_create()?;

    tracing_subscriber::fmt()
        .with_max_level(config.level_filter())
        .init();

    info!(?datadir, "Starting dhtnode");

    let node = DhtNode::start(datadir)?;
    let interrupted = interrupted()?;

    let contact = node.contact();
    println!(
        "Listening as {}:{} {}",
        contact.address, contact.port, contact.fingerprint
    );
    println!("Press CTRL+C to stop");

    let _ = interrupted.recv();

    info!("Received Ctrl+C, shutting down");
    node.shutdown();

    Ok(())
}

/// Control-plane client for the node running from `datadir`. Never creates files.
fn client(datadir: &Path) -> dhtnode::Result<ControlClient> {
    let store = IdentityStore::new(datadir);
    let config = Config::resolve([PartialConfig::from_file(&store.config_path())?]);

    ControlClient::connect(&config.ipc)
}

fn interrupted() -> dhtnode::Result<flume::Receiver<()>> {
    let (sender, receiver) = flume::bounded(1);

    ctrlc::set_handler(move || {
        let _ = sender.try_send(());
    })
    .map_err(|error| dhtnode::Error::IO(std::io::Error::other(error)))?;

    Ok(receiver)
}
