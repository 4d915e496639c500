//! Engine-wide error types.
//!
//! Parser and asset failures never cross the worker/main boundary as
//! panics: the streamer converts them into failed tiles, scenes convert
//! them into missing doodads or placeholder textures. Only `Fatal`
//! variants abort a frame.

use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

/// Top-level error for everything above the parsers.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("parse error in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: ParseError,
    },

    #[error("asset not found: {path}")]
    MissingAsset { path: String },

    #[error("cache budget exceeded: {cache} needs {needed} bytes, budget {budget}")]
    BudgetExceeded {
        cache: &'static str,
        needed: u64,
        budget: u64,
    },

    #[error("tile ({0}, {1}) failed to prepare")]
    TileFailed(i32, i32),

    #[error("streamer worker pool is shut down")]
    PoolShutDown,

    #[error("io error for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("floor cache decode: {0}")]
    CacheDecode(String),

    #[error("config error in {path}: {detail}")]
    Config { path: String, detail: String },

    #[error("GPU device lost")]
    DeviceLost,

    #[error("GPU out of memory allocating {what}")]
    GpuOutOfMemory { what: &'static str },

    #[error("{0}")]
    Fatal(String),
}

/// Failure decoding one binary asset. Produced only by `parse::*`.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unexpected end of data at offset {offset} (wanted {wanted} bytes)")]
    Truncated { offset: usize, wanted: usize },

    #[error("bad magic: expected {expected}, found {found}")]
    BadMagic { expected: String, found: String },

    #[error("unsupported version {found} (expected {expected})")]
    BadVersion { expected: u32, found: u32 },

    #[error("inconsistent counts: {context}")]
    BadCount { context: String },

    #[error("offset {offset} out of range (len {len})")]
    BadOffset { offset: usize, len: usize },

    #[error("malformed {what}: {detail}")]
    Malformed { what: &'static str, detail: String },
}

impl ParseError {
    pub fn at(self, path: &str) -> EngineError {
        EngineError::Parse {
            path: path.to_string(),
            source: self,
        }
    }
}
