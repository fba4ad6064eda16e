// Error type shared by the connection layer and the snapshot pipeline

use thiserror::Error;

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Error, Debug)]
pub enum TrackerError {
    /// The upstream website could not be reached or answered with an error.
    #[error("Network error: {0}")]
    Network(String),

    /// A departures page or stop feed could not be understood.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Snapshot or marker file handling failed.
    #[error("File error: {0}")]
    File(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<quick_xml::Error> for TrackerError {
    fn from(e: quick_xml::Error) -> Self {
        TrackerError::Parse(format!("Malformed markup: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;
