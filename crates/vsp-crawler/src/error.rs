//! Crawler error types.

use thiserror::Error;
use vsp_network::NetworkError;

#[derive(Error, Debug)]
pub enum CrawlerError {
    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Admin RPC call failed.
    #[error("Admin RPC error: {0}")]
    Admin(#[from] NetworkError),

    /// Admin RPC call exceeded its deadline.
    #[error("Admin RPC timed out: {0}")]
    Timeout(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for crawler operations.
pub type CrawlerResult<T> = Result<T, CrawlerError>;
