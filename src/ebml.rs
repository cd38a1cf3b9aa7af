//! EBML (Extensible Binary Meta Language) primitives.
//!
//! EBML is the tag/length/value binary encoding underlying Matroska and
//! WebM. Element IDs and sizes are variable-length integers (VINTs) whose
//! leading bit pattern encodes the width:
//!
//! - `1xxxxxxx`: 1 byte (7 bits of data)
//! - `01xxxxxx xxxxxxxx`: 2 bytes (14 bits)
//! - `001xxxxx ...`: 3 bytes (21 bits), and so on up to 8 bytes.
//!
//! The [`VarintReader`] here is resumable: when the underlying stream has
//! no bytes available yet, partial state is retained and the same call can
//! be repeated once more bytes arrive.

use crate::error::{DemuxError, Result};
use crate::input::{ReadStatus, StreamInput};

/// Maximum VINT width in bytes.
pub const MAX_VINT_LENGTH: usize = 8;

/// Maximum element ID width in bytes.
pub const MAX_ID_LENGTH: usize = 4;

/// Result of one unsigned varint read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Varint {
    /// The varint completed with this value and encoded width.
    Value {
        /// Decoded value with the length-mask bits removed.
        value: u64,
        /// Encoded width in bytes.
        width: usize,
    },
    /// The reserved "unknown length" sentinel (all data bits set).
    UnknownLength {
        /// Encoded width in bytes.
        width: usize,
    },
    /// The stream has no bytes available yet; retry later.
    Pending,
    /// The stream ended cleanly before the first byte.
    Ended,
}

/// Result of one element ID read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementId {
    /// A complete ID including its length-marker bits.
    Id {
        /// The element ID value.
        id: u32,
        /// Encoded width in bytes.
        width: usize,
    },
    /// The stream has no bytes available yet; retry later.
    Pending,
    /// The stream ended cleanly before the first byte.
    Ended,
}

/// Resumable reader for EBML variable-length integers.
///
/// A single reader instance serves one varint at a time; partial state is
/// kept between calls so a streaming source can starve the reader without
/// losing progress. [`VarintReader::reset`] discards partial state, e.g.
/// after an external seek.
#[derive(Debug, Default)]
pub struct VarintReader {
    length: usize,
    filled: usize,
    value: u64,
}

enum StartStep {
    First(u8),
    Pending,
    Ended,
}

impl VarintReader {
    /// Create a reader with no varint in progress.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether no varint is currently in progress.
    pub fn is_idle(&self) -> bool {
        self.length == 0
    }

    /// Discard any partially read varint.
    pub fn reset(&mut self) {
        self.length = 0;
        self.filled = 0;
        self.value = 0;
    }

    /// Read an unsigned varint of at most `max_bytes` bytes.
    ///
    /// Fails if the leading byte has no set length-mask bit, if the encoded
    /// width exceeds `max_bytes`, if the value is zero and `may_be_zero` is
    /// false, or if the value is the reserved unknown-length sentinel and
    /// `allow_unknown_length` is false.
    pub fn read_unsigned(
        &mut self,
        input: &mut dyn StreamInput,
        may_be_zero: bool,
        allow_unknown_length: bool,
        max_bytes: usize,
    ) -> Result<Varint> {
        if self.length == 0 {
            match self.start(input, max_bytes)? {
                StartStep::First(first) => {
                    let mask = (0xFFu16 >> self.length) as u8;
                    self.value = (first & mask) as u64;
                }
                StartStep::Pending => return Ok(Varint::Pending),
                StartStep::Ended => return Ok(Varint::Ended),
            }
        }

        while self.filled < self.length {
            let mut byte = [0u8; 1];
            match input.read(&mut byte)? {
                ReadStatus::Ready(_) => {
                    self.value = (self.value << 8) | byte[0] as u64;
                    self.filled += 1;
                }
                ReadStatus::NotReady => return Ok(Varint::Pending),
                ReadStatus::Ended => {
                    return Err(DemuxError::UnexpectedEof {
                        offset: input.position(),
                    })
                }
            }
        }

        let width = self.length;
        let value = self.value;
        self.reset();

        let unknown_marker = if width == MAX_VINT_LENGTH {
            u64::MAX >> (64 - 7 * MAX_VINT_LENGTH)
        } else {
            (1u64 << (7 * width)) - 1
        };
        if value == unknown_marker {
            if allow_unknown_length {
                return Ok(Varint::UnknownLength { width });
            }
            return Err(DemuxError::InvalidVint {
                offset: input.position().saturating_sub(width as u64),
            });
        }
        if value == 0 && !may_be_zero {
            return Err(DemuxError::InvalidVint {
                offset: input.position().saturating_sub(width as u64),
            });
        }
        Ok(Varint::Value { value, width })
    }

    /// Read an element ID, retaining the length-marker bits as part of the
    /// value the way Matroska identifies elements.
    pub fn read_id(&mut self, input: &mut dyn StreamInput) -> Result<ElementId> {
        if self.length == 0 {
            match self.start(input, MAX_ID_LENGTH)? {
                StartStep::First(first) => {
                    self.value = first as u64;
                }
                StartStep::Pending => return Ok(ElementId::Pending),
                StartStep::Ended => return Ok(ElementId::Ended),
            }
        }

        while self.filled < self.length {
            let mut byte = [0u8; 1];
            match input.read(&mut byte)? {
                ReadStatus::Ready(_) => {
                    self.value = (self.value << 8) | byte[0] as u64;
                    self.filled += 1;
                }
                ReadStatus::NotReady => return Ok(ElementId::Pending),
                ReadStatus::Ended => {
                    return Err(DemuxError::UnexpectedEof {
                        offset: input.position(),
                    })
                }
            }
        }

        let width = self.length;
        let id = self.value as u32;
        self.reset();
        Ok(ElementId::Id { id, width })
    }

    /// Consume the leading byte and derive the varint width from its
    /// length-mask bit.
    fn start(&mut self, input: &mut dyn StreamInput, max_bytes: usize) -> Result<StartStep> {
        let mut byte = [0u8; 1];
        match input.read(&mut byte)? {
            ReadStatus::Ready(_) => {
                let first = byte[0];
                if first == 0 {
                    return Err(DemuxError::InvalidVint {
                        offset: input.position().saturating_sub(1),
                    });
                }
                let length = first.leading_zeros() as usize + 1;
                if length > max_bytes {
                    if max_bytes == MAX_ID_LENGTH {
                        return Err(DemuxError::InvalidElementId {
                            offset: input.position().saturating_sub(1),
                        });
                    }
                    return Err(DemuxError::VintTooLong {
                        width: length,
                        max: max_bytes,
                    });
                }
                self.length = length;
                self.filled = 1;
                Ok(StartStep::First(first))
            }
            ReadStatus::NotReady => Ok(StartStep::Pending),
            ReadStatus::Ended => Ok(StartStep::Ended),
        }
    }
}

/// Decode an unsigned big-endian integer from element content.
pub fn parse_unsigned(data: &[u8]) -> u64 {
    let mut value = 0u64;
    for &byte in data {
        value = (value << 8) | byte as u64;
    }
    value
}

/// Decode a sign-extended big-endian integer from element content.
pub fn parse_signed(data: &[u8]) -> i64 {
    if data.is_empty() {
        return 0;
    }
    let mut value = if data[0] & 0x80 != 0 { -1i64 } else { 0i64 };
    for &byte in data {
        value = (value << 8) | byte as i64;
    }
    value
}

/// Decode an IEEE float from element content. Only 0, 4, and 8 byte
/// encodings are valid; the caller validates the size first.
pub fn parse_float(data: &[u8]) -> f64 {
    match data.len() {
        4 => f32::from_bits(u32::from_be_bytes(data.try_into().unwrap())) as f64,
        8 => f64::from_bits(u64::from_be_bytes(data.try_into().unwrap())),
        _ => 0.0,
    }
}

/// Decode a UTF-8 string from element content, trimming at the first NUL
/// terminator if present.
pub fn parse_string(data: &[u8]) -> Option<String> {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8(data[..end].to_vec()).ok()
}
