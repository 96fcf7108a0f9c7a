//! Line commands for the interactive `node` binary.
//!
//! Keys and values are plain words here; the library itself accepts any
//! serializable type.

use anyhow::{Result, anyhow};

#[derive(Debug, PartialEq)]
pub enum ConsoleCommand {
    Set { key: String, value: String },
    Get { key: String },
    Delete { key: String },
    Metrics,
    Help,
    Exit,
}

pub const HELP: &str = "Commands: SET/s <key> <value>, GET/g <key>, DEL/d <key>, METRICS/m, HELP/h, EXIT/e";

impl ConsoleCommand {
    /// Parses one line of input. Command words are case-insensitive and
    /// accept single-letter aliases; keys and values keep their case.
    pub fn parse(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(first) = parts.first() else {
            return Err(anyhow!("empty command"));
        };

        let cmd = first.to_uppercase();
        let normalized = match cmd.as_str() {
            "S" => "SET",
            "G" => "GET",
            "D" | "DELETE" => "DEL",
            "M" => "METRICS",
            "H" => "HELP",
            "E" | "QUIT" => "EXIT",
            other => other,
        };

        match (normalized, parts.len()) {
            ("METRICS", 1) => Ok(ConsoleCommand::Metrics),
            ("HELP", 1) => Ok(ConsoleCommand::Help),
            ("EXIT", 1) => Ok(ConsoleCommand::Exit),
            ("GET", 2) => Ok(ConsoleCommand::Get {
                key: parts[1].to_string(),
            }),
            ("DEL", 2) => Ok(ConsoleCommand::Delete {
                key: parts[1].to_string(),
            }),
            ("SET", 3) => Ok(ConsoleCommand::Set {
                key: parts[1].to_string(),
                value: parts[2].to_string(),
            }),
            ("GET", _) => Err(anyhow!("GET requires exactly one argument: GET <key>")),
            ("DEL", _) => Err(anyhow!("DEL requires exactly one argument: DEL <key>")),
            ("SET", _) => Err(anyhow!("SET requires exactly two arguments: SET <key> <value>")),
            ("METRICS" | "HELP" | "EXIT", _) => Err(anyhow!("{normalized} takes no arguments")),
            _ => Err(anyhow!("invalid command. {HELP}")),
        }
    }
}
