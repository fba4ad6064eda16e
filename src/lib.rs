//! Edinburgh bus tracker server.
//!
//! Answers mobile clients over a line-based TCP protocol with live departures
//! scraped from the Bus Tracker website, and keeps a weekly rebuilt SQLite
//! database of stop locations for clients to download.

pub mod arrivals;
pub mod config;
pub mod error;
mod markup;
pub mod models;
pub mod server;
pub mod snapshot;
pub mod stop_feed;
pub mod upstream;

pub use config::ServerConfig;
pub use error::{Result, TrackerError};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
