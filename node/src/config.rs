// CLI surface: role launchers and operator-side injection commands

use clap::{Parser, Subcommand};
use std::net::SocketAddr;

#[derive(Parser, Debug)]
#[command(author, version, about = "Privacy-preserving peer-to-peer energy billing", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a core (data owner) node
    Core {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:5560")]
        listen: SocketAddr,

        /// Bootstrap edge to join the network through
        #[arg(long)]
        edge: SocketAddr,
    },

    /// Run an edge (aggregator) node
    Edge {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:5555")]
        listen: SocketAddr,

        /// Slots per billing cycle (one week of 15-minute slots)
        #[arg(long, default_value_t = 672)]
        cycle_length: usize,
    },

    /// Inject a flat-priced cycle context into an edge
    SendContext {
        #[arg(long)]
        edge: SocketAddr,

        #[arg(long)]
        cycle_id: u64,

        #[arg(long, default_value_t = 672)]
        cycle_length: usize,

        /// Retail price per slot
        #[arg(long, default_value_t = 0.21)]
        retail: f64,

        /// Feed-in tariff per slot
        #[arg(long, default_value_t = 0.05)]
        feed_in: f64,

        /// Peer-to-peer trading price per slot
        #[arg(long, default_value_t = 0.11)]
        trading: f64,
    },

    /// Inject plaintext metering data into a core
    SendData {
        #[arg(long)]
        core: SocketAddr,

        #[arg(long)]
        cycle_id: u64,

        /// Promised utilization per slot (positive = consumption)
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        promises: Vec<f64>,

        /// Actual utilization per slot (positive = consumption)
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        utilizations: Vec<f64>,
    },

    /// Fetch and print a revealed bill from a core
    GetBill {
        #[arg(long)]
        core: SocketAddr,

        #[arg(long)]
        cycle_id: u64,
    },
}
