use thiserror::Error;

/// Fatal errors produced by the endpoint runtime.
///
/// Only conditions that must tear down the event loop are represented
/// here. Semantic degrades (unknown op, out-of-range config access,
/// bridge queue overflow) are logged in place and never surface as an
/// `Error` — they don't unwind through this type at all.
#[derive(Debug, Error)]
pub enum Error {
    #[error("transport initialization failed: {0}")]
    TransportInit(String),

    #[error("transport closed: {0}")]
    TransportClosed(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
