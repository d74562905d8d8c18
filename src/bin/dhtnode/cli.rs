//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// A Kademlia DHT node with authenticated transport and a local control plane.
#[derive(Parser, Debug)]
#[command(name = "dhtnode")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// The dhtnode data directory, `$HOME/.dhtnode` by default.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect the node to the network, in the foreground until Ctrl-C.
    Start,

    /// Print the running node's version.
    Info,

    /// List the running node's known peers closest to a key.
    Peers {
        /// A 40 character hex id, or any string to hash.
        key: String,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Fetch an item from the DHT through the running node.
    Get { key: String },

    /// Store an item in the DHT through the running node.
    Put { key: String, value: String },

    /// Start ephemeral nodes on descending ports, each seeded with the
    /// previous one, and keep putting and getting random items.
    Simulate {
        #[arg(short, long, default_value_t = 2)]
        nodes: u16,
    },
}
