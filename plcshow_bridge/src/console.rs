//! Line-oriented operator console on stdin.

use crossbeam::channel::Sender;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, warn};

/// Help text printed by `help`.
pub const HELP: &str = "\
commands:
  connect             open the PLC link
  disconnect          stop monitoring and close the link
  monitor start|stop  start or stop polling
  start N             simulate a start request for index N (simulation only)
  next                simulate an advance request (simulation only)
  map N PATH          map index N to PATH
  unmap N             remove the mapping for index N
  mappings            list mappings
  status              show link, monitor and presentation state
  help                show this text
  quit                shut down";

/// Operator request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    /// Open the PLC link.
    Connect,
    /// Stop monitoring and close the link.
    Disconnect,
    /// Start polling.
    MonitorStart,
    /// Stop polling.
    MonitorStop,
    /// Raise the start bit with this index in the simulated block.
    SimulateStart(u8),
    /// Raise the advance bit in the simulated block.
    SimulateAdvance,
    /// Add or replace a mapping.
    Map {
        /// Index to map
        index: u8,
        /// Resource path
        path: PathBuf,
    },
    /// Remove a mapping.
    Unmap(u8),
    /// List mappings.
    Mappings,
    /// Print state.
    Status,
    /// Print help.
    Help,
    /// Shut down.
    Quit,
}

/// Console input errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsoleError {
    /// First word is not a command.
    #[error("Unknown command '{0}' (try 'help')")]
    Unknown(String),

    /// Command given with wrong arguments.
    #[error("Usage: {0}")]
    Usage(&'static str),

    /// Index argument outside 0-255.
    #[error("Invalid index '{0}', expected 0-255")]
    BadIndex(String),
}

fn parse_index(word: &str) -> Result<u8, ConsoleError> {
    word.parse()
        .map_err(|_| ConsoleError::BadIndex(word.to_string()))
}

/// Parse one input line. Blank lines give `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<OperatorCommand>, ConsoleError> {
    let line = line.trim();
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let parsed = match (command.to_ascii_lowercase().as_str(), args.as_slice()) {
        ("connect", []) => OperatorCommand::Connect,
        ("disconnect", []) => OperatorCommand::Disconnect,
        ("monitor", ["start"]) => OperatorCommand::MonitorStart,
        ("monitor", ["stop"]) => OperatorCommand::MonitorStop,
        ("monitor", _) => return Err(ConsoleError::Usage("monitor start|stop")),
        ("start", [index]) => OperatorCommand::SimulateStart(parse_index(index)?),
        ("start", _) => return Err(ConsoleError::Usage("start N")),
        ("next", []) => OperatorCommand::SimulateAdvance,
        ("map", [index, ..]) if args.len() >= 2 => {
            let index = parse_index(index)?;
            // Paths may contain spaces; keep everything after the index verbatim.
            let rest = line[command.len()..].trim_start();
            let path = rest[index_len(rest)..].trim();
            OperatorCommand::Map {
                index,
                path: PathBuf::from(path),
            }
        }
        ("map", _) => return Err(ConsoleError::Usage("map N PATH")),
        ("unmap", [index]) => OperatorCommand::Unmap(parse_index(index)?),
        ("unmap", _) => return Err(ConsoleError::Usage("unmap N")),
        ("mappings", []) => OperatorCommand::Mappings,
        ("status", []) => OperatorCommand::Status,
        ("help" | "?", _) => OperatorCommand::Help,
        ("quit" | "exit", []) => OperatorCommand::Quit,
        (other, _) => return Err(ConsoleError::Unknown(other.to_string())),
    };
    Ok(Some(parsed))
}

fn index_len(s: &str) -> usize {
    s.find(char::is_whitespace).unwrap_or(s.len())
}

/// Read commands from stdin on a background thread.
///
/// End of input sends `Quit`. The thread exits once the receiver is gone.
pub fn spawn_stdin_reader(tx: Sender<OperatorCommand>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("plcshow-console".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Console read failed: {}", e);
                        break;
                    }
                };
                match parse_line(&line) {
                    Ok(Some(command)) => {
                        if tx.send(command).is_err() {
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => eprintln!("{e}"),
                }
            }
            debug!("Console input closed");
            let _ = tx.send(OperatorCommand::Quit);
        })
}
