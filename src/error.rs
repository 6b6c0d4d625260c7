//! Library error type

use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PostError>;

#[derive(Debug, Error)]
pub enum PostError {
    /// Worker thread could not be created
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: io::Error,
    },

    /// Worker thread panicked before it could be joined
    #[error("{0} thread panicked")]
    Panicked(&'static str),
}
