//! CLI entry point: run one replica with a line-oriented shell on stdin.
//!
//! # Example usage
//!
//! Start a 3-node full mesh:
//! ```bash
//! # Terminal 1
//! cargo run --bin node -- --listen 127.0.0.1:5551 --peer 127.0.0.1:5552,127.0.0.1:5553
//!
//! # Terminal 2
//! cargo run --bin node -- --listen 127.0.0.1:5552 --peer 127.0.0.1:5551,127.0.0.1:5553
//!
//! # Terminal 3
//! cargo run --bin node -- --listen 127.0.0.1:5553 --peer 127.0.0.1:5551,127.0.0.1:5552
//! ```
//!
//! Then `SET greeting hello` on one node and `GET greeting` on another.

use anyhow::{Context, Result};
use clap::{Parser, ValueHint};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use udp_shared_memory::console::{ConsoleCommand, HELP};
use udp_shared_memory::{DEFAULT_MAX_DATAGRAM_SIZE, Endpoint, Error, Node, NodeConfig};

/// Command-line arguments for a replica.
#[derive(Parser, Debug)]
#[command(author, version, about = "Run a UDP shared-memory node with an interactive shell")]
struct Args {
    /// Endpoint to bind, e.g. 127.0.0.1:5551 or [::1]:5551
    #[arg(long, value_hint = ValueHint::Hostname)]
    listen: Endpoint,

    /// Comma-separated peers that receive this node's writes: host:port,host:port,...
    #[arg(long, value_delimiter = ',', value_hint = ValueHint::Other)]
    peer: Vec<Endpoint>,

    /// Largest datagram sent or accepted, in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_DATAGRAM_SIZE)]
    max_datagram_size: usize,
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();
    let config =
        NodeConfig::new(args.listen, args.peer).with_max_datagram_size(args.max_datagram_size);
    let node: Node<String, String> = Node::new(config).context("invalid node configuration")?;
    node.start().await.context("failed to start node")?;

    if let Some(addr) = node.local_addr().await {
        println!("Node listening on {addr}. Type HELP (or h) for commands.");
    }

    let result = run_shell(&node).await;
    node.stop().await;
    result
}

/// Reads commands until EXIT, end of input or Ctrl-C.
async fn run_shell(node: &Node<String, String>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    warn!(error = ?err, "failed to listen for ctrl-c");
                }
                None
            }
        };
        let Some(line) = line else {
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }

        match ConsoleCommand::parse(&line) {
            Ok(ConsoleCommand::Exit) => return Ok(()),
            Ok(command) => println!("{}", execute(node, command)),
            Err(err) => println!("ERROR: {err}"),
        }
    }
}

fn execute(node: &Node<String, String>, command: ConsoleCommand) -> String {
    match command {
        ConsoleCommand::Set { key, value } => match node.set(key.clone(), value) {
            Ok(seq) => format!("OK {key} (seq {seq})"),
            Err(err) => format!("ERROR: {err}"),
        },
        ConsoleCommand::Get { key } => match node.get(&key) {
            Some(value) => value,
            None => "(nil)".to_string(),
        },
        ConsoleCommand::Delete { key } => match node.delete(&key) {
            Ok(seq) => format!("DELETED {key} (seq {seq})"),
            Err(Error::NotFound) => format!("ERROR: no value for {key}"),
            Err(err) => format!("ERROR: {err}"),
        },
        ConsoleCommand::Metrics => node.metrics().to_string(),
        ConsoleCommand::Help => HELP.to_string(),
        ConsoleCommand::Exit => String::new(),
    }
}
