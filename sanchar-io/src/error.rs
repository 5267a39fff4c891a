//! Error types for SancharIO
//!
//! Malformed datagrams, duplicate chunks, and assembly timeouts are NOT
//! errors here: they are expected under normal packet loss and are dropped
//! (and counted) inside the receiver and assembler. An `Err` reaching a
//! caller means socket I/O failed, configuration is invalid, or a shared
//! lock was poisoned by a panicking thread.

use thiserror::Error;

/// Errors that can occur in SancharIO
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Mutex poisoned")]
    MutexPoisoned,

    #[error("{0}")]
    Other(String),
}

impl From<bhumi_map::ConfigError> for Error {
    fn from(e: bhumi_map::ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
