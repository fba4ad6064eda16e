// Server configuration
//
// Plain key=value lines. Blank lines and lines starting with '#' are skipped, keys
// are case-insensitive. Unknown keys and bad values are reported and the compiled-in
// default is kept, so a broken config file never stops the server from starting.

use chrono_tz::Tz;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_CONFIG_FILE: &str = "bustracker.conf";

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub port: u16,
    pub bind_address: String,
    /// 0 means unlimited.
    pub max_connections: usize,
    pub db_path: PathBuf,
    pub db_url: String,
    pub version_file: PathBuf,
    pub upstream_url: String,
    pub read_timeout: Duration,
    pub timezone: Tz,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: 4876,
            bind_address: "0.0.0.0".to_string(),
            max_connections: 100,
            db_path: PathBuf::from("./"),
            db_url: "http://localhost/busstops.db".to_string(),
            version_file: PathBuf::from("latest.android"),
            upstream_url: "http://www.mybustracker.co.uk/".to_string(),
            read_timeout: Duration::from_secs(120),
            timezone: chrono_tz::Europe::London,
        }
    }
}

impl ServerConfig {
    /// Read the config file, falling back to defaults if it cannot be read.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents),
            Err(e) => {
                warn!(path = ?path, error = %e, "⚠️  Could not read config file, using internal defaults");
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Self {
        let mut config = Self::default();

        for (index, raw) in contents.lines().enumerate() {
            let line_number = index + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                warn!(line = line_number, "⚠️  Config line is not a key=value pair");
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            if let Err(reason) = config.apply(&key, value) {
                warn!(line = line_number, key = %key, value, "⚠️  {}", reason);
            }
        }

        config
    }

    fn apply(&mut self, key: &str, value: &str) -> std::result::Result<(), String> {
        match key {
            "port" => match value.parse::<u16>() {
                Ok(port) if port >= 1 => self.port = port,
                _ => return Err("The port range is 1 to 65535.".to_string()),
            },
            "bindaddress" => {
                if value.is_empty() {
                    return Err("The bind address must not be empty.".to_string());
                }
                self.bind_address = value.to_string();
            }
            "maxconnections" => match value.parse::<i64>() {
                Ok(max) if max >= 0 => self.max_connections = max as usize,
                Ok(_) => {
                    return Err(
                        "The maximum number of connections must not be less than 0.".to_string(),
                    );
                }
                Err(_) => return Err("The maximum number of connections is not a number.".to_string()),
            },
            "dbpath" => {
                if value.is_empty() {
                    return Err("The database path must not be empty.".to_string());
                }
                self.db_path = PathBuf::from(value);
            }
            "dburl" => self.db_url = value.to_string(),
            "versionfile" => self.version_file = PathBuf::from(value),
            "upstreamurl" => {
                if !value.starts_with("http://") && !value.starts_with("https://") {
                    return Err("The upstream URL must be an http(s) URL.".to_string());
                }
                self.upstream_url = value.to_string();
            }
            "readtimeout" => match value.parse::<u64>() {
                Ok(secs) if secs > 0 => self.read_timeout = Duration::from_secs(secs),
                _ => return Err("The read timeout must be a positive number of seconds.".to_string()),
            },
            "timezone" => match value.parse::<Tz>() {
                Ok(tz) => self.timezone = tz,
                Err(_) => return Err("Unknown timezone name.".to_string()),
            },
            _ => return Err(format!("Invalid config key \"{}\".", key)),
        }
        Ok(())
    }

    /// Connection cap, or `None` when unlimited.
    pub fn connection_limit(&self) -> Option<usize> {
        (self.max_connections > 0).then_some(self.max_connections)
    }
}
