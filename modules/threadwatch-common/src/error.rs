use thiserror::Error;

#[derive(Error, Debug)]
pub enum ThreadwatchError {
    /// Missing or unreadable settings; fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Settings that parse but make no sense.
    #[error("Validation error: {0}")]
    Validation(String),
}
