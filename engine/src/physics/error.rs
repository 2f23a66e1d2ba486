//! Physics error type
//!
//! Backends use [`PhysicsError`] internally and for `setup()`. Everything else on the
//! [`PhysicsInterface`](super::PhysicsInterface) boundary logs the error and reports
//! failure through `Option`/`bool` returns.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PhysicsError {
    #[error("failed loading library '{library}': {source}")]
    LibraryLoad {
        library: String,
        #[source]
        source: libloading::Error,
    },

    #[error("failed mapping functions in library '{library}': {}", symbols.join(", "))]
    MissingSymbols { library: String, symbols: Vec<String> },

    #[error("physics backend '{0}' is not available")]
    Unavailable(String),

    #[error("physics backend is not set up")]
    NotSetUp,

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("invalid pre-processed geometry: {0}")]
    InvalidCookedData(String),

    #[error("invalid heightmap: {0}")]
    InvalidHeightmap(String),

    #[error("no physics backend could be set up")]
    NoBackend,

    #[error("failed reading physics config {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid physics config: {0}")]
    ConfigParse(#[from] serde_json::Error),
}
