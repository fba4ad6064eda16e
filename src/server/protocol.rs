// Client protocol
//
// One command per line, `command` or `command:argument`. Every reply is a single
// line except live departures, which are framed as
//   +
//   {"stopCode":...}
//   <blank line>
//   -

use std::io::{self, Write};

use crate::models::StopDepartures;

pub const REJECTION_LINE: &str = "Error: server has reached maximum number of connections.";
pub const UNKNOWN_COMMAND_LINE: &str = "Error: unknown server command.";
pub const UNKNOWN_VERSION: &str = "Unknown";
pub const LINE_TOO_LONG_LINE: &str = "Error: request line is too long.";

/// Longest request line accepted, terminator included.
pub const MAX_LINE_LEN: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    BusTimesByStopCode(String),
    DbUrl,
    DbLastModTime,
    LatestAndroidClientVersion,
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    Unknown,
    WrongParameterCount { command: &'static str, expected: usize },
}

impl CommandError {
    pub fn response_line(&self) -> String {
        match self {
            CommandError::Unknown => UNKNOWN_COMMAND_LINE.to_string(),
            CommandError::WrongParameterCount { command, expected } => format!(
                "Error: the number of parameters for {} is {}.",
                command, expected
            ),
        }
    }
}

impl Command {
    /// Parse one trimmed, non-empty request line.
    pub fn parse(line: &str) -> Result<Command, CommandError> {
        let mut parts: Vec<&str> = line.split(':').collect();
        while parts.len() > 1 && parts.last().is_some_and(|p| p.trim().is_empty()) {
            parts.pop();
        }
        let name = parts[0].trim();
        let args: Vec<&str> = parts[1..].iter().map(|a| a.trim()).collect();

        let (command, expected) = match name {
            "getBusTimesByStopCode" => ("getBusTimesByStopCode", 1),
            "getDBURL" => ("getDBURL", 0),
            "getDBLastModTime" => ("getDBLastModTime", 0),
            "getLatestAndroidClientVersion" => ("getLatestAndroidClientVersion", 0),
            "exit" => ("exit", 0),
            _ => return Err(CommandError::Unknown),
        };

        if args.len() != expected || args.iter().any(|a| a.is_empty()) {
            return Err(CommandError::WrongParameterCount { command, expected });
        }

        Ok(match command {
            "getBusTimesByStopCode" => Command::BusTimesByStopCode(args[0].to_string()),
            "getDBURL" => Command::DbUrl,
            "getDBLastModTime" => Command::DbLastModTime,
            "getLatestAndroidClientVersion" => Command::LatestAndroidClientVersion,
            _ => Command::Exit,
        })
    }
}

pub fn invalid_stop_code_line(stop_code: &str) -> String {
    format!("Error: invalid bus stop code \"{}\".", stop_code)
}

pub fn write_line<W: Write>(out: &mut W, line: &str) -> io::Result<()> {
    out.write_all(line.as_bytes())?;
    out.write_all(b"\n")?;
    out.flush()
}

pub fn write_departures<W: Write>(out: &mut W, departures: &StopDepartures) -> io::Result<()> {
    let json = serde_json::to_string(departures).map_err(io::Error::other)?;
    out.write_all(b"+\n")?;
    out.write_all(json.as_bytes())?;
    out.write_all(b"\n\n-\n")?;
    out.flush()
}
