//! Error kinds shared by every backend.
//!
//! Library code returns [`Result<T>`]; the binary wraps it in `anyhow` for context.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A task, solution or kernel file could not be read or written.
    #[error("configuration error: {0}")]
    Config(String),

    /// A task file token was missing or not a number.
    #[error("parse error at token {position}: {message}")]
    Parse { position: usize, message: String },

    /// A physical parameter or body record is outside its valid range.
    #[error("domain error: {0}")]
    Domain(String),

    /// The device cannot fit the whole body grid into one workgroup.
    #[error(
        "{body_count} bodies need a {body_count}x{body_count} workgroup, device allows {limit}"
    )]
    Resource { body_count: u32, limit: String },

    /// Adapter, device or pipeline failure.
    #[error("gpu error: {0}")]
    Gpu(String),

    /// A collective call was mismatched or a participant disappeared.
    #[error("collective protocol error on rank {rank}: {message}")]
    Protocol { rank: usize, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;
