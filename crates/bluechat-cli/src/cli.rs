//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a stream session between two loopback devices
    Chat {
        /// Messages the host sends once connected
        #[arg(default_values_t = vec!["hello".to_string()])]
        messages: Vec<String>,
        /// Sever the link afterwards to show the session falling back to listening
        #[arg(long)]
        drop_link: bool,
    },
    /// Broadcast a payload in chunks and reassemble it on a loopback scanner
    Broadcast {
        /// Payload to send
        payload: String,
        /// Interpret the payload as hex
        #[arg(long)]
        hex: bool,
        /// Chunk body size, overriding the configuration
        #[arg(short = 'n', long)]
        chunk_size: Option<usize>,
    },
    /// Run a scripted device discovery
    Discover,
    /// Print an example configuration file
    ExampleConfig,
}
