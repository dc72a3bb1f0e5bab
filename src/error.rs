//! Error surface for segment bootstrap and teardown.
//!
//! Table operations never fail through this type; their outcomes are
//! [`OpStatus`](crate::OpStatus) codes. `Error` covers the OS-level
//! failures after which the mapping itself is unusable and the process
//! must not touch the table.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid segment name {0:?}")]
    BadName(String),

    #[error("shm_open({name}) failed: {source}")]
    Open {
        name: String,
        source: std::io::Error,
    },

    #[error("sizing segment {name} failed: {source}")]
    Truncate {
        name: String,
        source: std::io::Error,
    },

    #[error("polling segment {name} metadata failed: {source}")]
    Stat {
        name: String,
        source: std::io::Error,
    },

    #[error("mapping segment {name} failed: {source}")]
    Map {
        name: String,
        source: std::io::Error,
    },

    #[error("initializing process-shared lock failed: {0}")]
    LockInit(#[source] std::io::Error),

    #[error("shm_unlink({name}) failed: {source}")]
    Unlink {
        name: String,
        source: std::io::Error,
    },
}
