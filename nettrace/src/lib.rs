//! Streaming parser for `.nettrace` event-pipe captures.
//!
//! The format is a tagged FastSerialization container wrapping size-prefixed
//! blocks: a `Trace` session header, metadata and event blocks holding
//! delta-compressed event blobs, stack blocks, and sequence points. The
//! parser consumes bytes incrementally through [`TraceReader::feed`] (or the
//! [`read_stream`]/[`read_file`] front ends, which pump a [`bytepipe`]
//! producer thread) and yields a [`trace_model::Trace`] once the terminating
//! null-reference tag arrives: events sorted by timestamp, metadata shared by
//! reference, and stack ids resolved to symbolized method descriptions.

use thiserror::Error;

mod blob;
mod blocks;
mod container;
mod known;
mod parser;
mod reader;

pub use container::READER_VERSION;
pub use parser::{read_file, read_stream, Progress, TraceReader};

#[derive(Error, Debug)]
pub enum NettraceError {
    #[error("malformed stream at offset {position}: {message}")]
    Malformed { position: u64, message: String },

    #[error("metadata id {id} referenced at offset {position} before any definition")]
    MissingMetadata { id: u32, position: u64 },

    #[error("unsupported stream feature at offset {position}: {what}")]
    Unsupported { position: u64, what: &'static str },

    #[error("stream truncated at offset {position}")]
    Truncated { position: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NettraceError {
    pub(crate) fn malformed(position: u64, message: impl Into<String>) -> Self {
        NettraceError::Malformed {
            position,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, NettraceError>;
