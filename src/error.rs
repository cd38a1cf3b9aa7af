//! Error types for Matroska/WebM demuxing.
//!
//! Structural violations of the container format are always fatal for the
//! whole parse and surface as a dedicated variant. Unrecognized codecs are
//! deliberately *not* errors; the affected track is dropped and the rest of
//! the file keeps parsing.

use thiserror::Error;

/// Demuxer error types.
#[derive(Error, Debug)]
pub enum DemuxError {
    /// Invalid EBML document header.
    #[error("Invalid EBML header: {0}")]
    InvalidEbmlHeader(String),

    /// Invalid element ID.
    #[error("Invalid element ID at offset {offset}")]
    InvalidElementId {
        /// Byte offset where the invalid ID was found.
        offset: u64,
    },

    /// Invalid variable-length integer.
    #[error("Invalid VINT encoding at offset {offset}")]
    InvalidVint {
        /// Byte offset where the invalid VINT was found.
        offset: u64,
    },

    /// VINT wider than the caller allows.
    #[error("VINT of {width} bytes exceeds maximum of {max} bytes")]
    VintTooLong {
        /// Encoded width in bytes.
        width: usize,
        /// Maximum allowed width in bytes.
        max: usize,
    },

    /// Invalid element size for the element's declared type.
    #[error("Invalid size {size} for element 0x{id:08X}")]
    InvalidElementSize {
        /// The element ID value.
        id: u32,
        /// The offending content size.
        size: u64,
    },

    /// Missing required element.
    #[error("Missing required element: {0}")]
    MissingElement(&'static str),

    /// Unsupported value for a recognized element.
    #[error("Unsupported value {value} for element 0x{id:08X}")]
    UnsupportedValue {
        /// The element ID value.
        id: u32,
        /// The offending value.
        value: u64,
    },

    /// Invalid block structure.
    #[error("Invalid block structure: {0}")]
    InvalidBlock(String),

    /// Invalid lacing structure.
    #[error("Invalid lacing: {0}")]
    InvalidLacing(String),

    /// Invalid content encoding (compression/encryption) declaration.
    #[error("Invalid content encoding: {0}")]
    InvalidContentEncoding(String),

    /// Malformed codec private data.
    #[error("Malformed codec private data for {codec_id}")]
    InvalidCodecPrivate {
        /// Codec ID of the track whose private data failed to parse.
        codec_id: String,
    },

    /// Invalid UTF-8 in a string element.
    #[error("Invalid UTF-8 string in element 0x{id:08X}")]
    InvalidString {
        /// The element ID value.
        id: u32,
    },

    /// The stream ended in the middle of an element.
    #[error("Unexpected end of input at offset {offset}")]
    UnexpectedEof {
        /// Byte offset at which the stream ended.
        offset: u64,
    },

    /// I/O error from the underlying byte stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for demuxer operations.
pub type Result<T> = std::result::Result<T, DemuxError>;
