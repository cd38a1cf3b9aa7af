//! Block header and lacing parser.
//!
//! SimpleBlock and Block content starts with a short header (track number
//! varint, 16-bit relative timecode, flags byte) optionally followed by a
//! lacing table that packs several frames into one block. The parser here
//! is resumable: it consumes bytes from the element's remaining budget and
//! suspends cleanly when the input starves mid-header.

use crate::ebml::{Varint, VarintReader, MAX_VINT_LENGTH};
use crate::error::{DemuxError, Result};
use crate::input::{Progress, Scratch, StreamInput};

/// Frame packing scheme, from bits 1..3 of the flags byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lacing {
    /// One frame, no lacing table.
    None,
    /// Sizes as 0xFF-continued byte sums; last frame implicit.
    Xiph,
    /// All frames the same size; payload divides evenly.
    FixedSize,
    /// First size as an unsigned varint, then signed varint deltas.
    Ebml,
}

/// A fully parsed block header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedBlock {
    /// Track the block belongs to.
    pub track_number: u64,
    /// Timecode relative to the enclosing cluster, in timecode units.
    pub timecode: i16,
    /// Keyframe flag. Only meaningful for SimpleBlock.
    pub keyframe: bool,
    /// Invisible flag (decode but do not present).
    pub invisible: bool,
    /// Discardable flag. Only meaningful for SimpleBlock.
    pub discardable: bool,
    /// Frame sizes in bytes. The remaining element content is exactly the
    /// concatenation of these frames.
    pub frame_sizes: Vec<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    TrackNumber,
    TimecodeFlags,
    LaceCount,
    XiphSizes,
    EbmlFirstSize,
    EbmlDeltas,
}

/// Resumable parser for one block header.
#[derive(Debug)]
pub struct BlockState {
    step: Step,
    varint: VarintReader,
    scratch: Scratch,
    track_number: u64,
    timecode: i16,
    flags: u8,
    lacing: Lacing,
    frames: usize,
    sizes: Vec<u64>,
    xiph_partial: u64,
}

impl Default for BlockState {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockState {
    /// Create a parser positioned at the start of a block header.
    pub fn new() -> Self {
        Self {
            step: Step::TrackNumber,
            varint: VarintReader::new(),
            scratch: Scratch::default(),
            track_number: 0,
            timecode: 0,
            flags: 0,
            lacing: Lacing::None,
            frames: 1,
            sizes: Vec::new(),
            xiph_partial: 0,
        }
    }

    /// Discard any partially parsed header.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Parse the header, consuming from `remaining` (the unread byte count
    /// of the enclosing element). Returns `None` while suspended; once the
    /// header completes, `remaining` covers exactly the frame payload and
    /// the returned sizes sum to it.
    pub fn parse(
        &mut self,
        input: &mut dyn StreamInput,
        remaining: &mut u64,
    ) -> Result<Option<ParsedBlock>> {
        let start = input.position();
        let outcome = self.run(input);
        let consumed = input.position() - start;
        *remaining = remaining.checked_sub(consumed).ok_or_else(|| {
            DemuxError::InvalidBlock("header overruns the element".into())
        })?;
        match outcome? {
            Progress::Pending => Ok(None),
            Progress::Done => self.finish(*remaining).map(Some),
        }
    }

    fn run(&mut self, input: &mut dyn StreamInput) -> Result<Progress> {
        loop {
            match self.step {
                Step::TrackNumber => {
                    match self.varint.read_unsigned(input, false, false, MAX_VINT_LENGTH)? {
                        Varint::Value { value, .. } => {
                            self.track_number = value;
                            self.scratch.begin(3);
                            self.step = Step::TimecodeFlags;
                        }
                        Varint::Pending => return Ok(Progress::Pending),
                        _ => {
                            return Err(DemuxError::InvalidBlock(
                                "truncated track number".into(),
                            ))
                        }
                    }
                }

                Step::TimecodeFlags => {
                    if self.scratch.fill(input)? == Progress::Pending {
                        return Ok(Progress::Pending);
                    }
                    let data = self.scratch.data();
                    self.timecode = i16::from_be_bytes([data[0], data[1]]);
                    self.flags = data[2];
                    self.scratch.finish();
                    self.lacing = match self.flags & 0x06 {
                        0x00 => Lacing::None,
                        0x02 => Lacing::Xiph,
                        0x04 => Lacing::FixedSize,
                        _ => Lacing::Ebml,
                    };
                    if self.lacing == Lacing::None {
                        return Ok(Progress::Done);
                    }
                    self.scratch.begin(1);
                    self.step = Step::LaceCount;
                }

                Step::LaceCount => {
                    if self.scratch.fill(input)? == Progress::Pending {
                        return Ok(Progress::Pending);
                    }
                    self.frames = self.scratch.data()[0] as usize + 1;
                    self.scratch.finish();
                    match self.lacing {
                        Lacing::FixedSize => return Ok(Progress::Done),
                        Lacing::Xiph => {
                            if self.frames == 1 {
                                return Ok(Progress::Done);
                            }
                            self.step = Step::XiphSizes;
                        }
                        Lacing::Ebml => {
                            if self.frames == 1 {
                                return Ok(Progress::Done);
                            }
                            self.step = Step::EbmlFirstSize;
                        }
                        Lacing::None => unreachable!("handled before the lace count"),
                    }
                }

                Step::XiphSizes => {
                    while self.sizes.len() < self.frames - 1 {
                        if self.scratch.is_active() {
                            if self.scratch.fill(input)? == Progress::Pending {
                                return Ok(Progress::Pending);
                            }
                        } else {
                            self.scratch.begin(1);
                            if self.scratch.fill(input)? == Progress::Pending {
                                return Ok(Progress::Pending);
                            }
                        }
                        let byte = self.scratch.data()[0];
                        self.scratch.finish();
                        self.xiph_partial += byte as u64;
                        if byte != 0xFF {
                            self.sizes.push(self.xiph_partial);
                            self.xiph_partial = 0;
                        }
                    }
                    return Ok(Progress::Done);
                }

                Step::EbmlFirstSize => {
                    match self.varint.read_unsigned(input, true, false, MAX_VINT_LENGTH)? {
                        Varint::Value { value, .. } => {
                            self.sizes.push(value);
                            self.step = Step::EbmlDeltas;
                        }
                        Varint::Pending => return Ok(Progress::Pending),
                        _ => {
                            return Err(DemuxError::InvalidLacing(
                                "truncated first lace size".into(),
                            ))
                        }
                    }
                }

                Step::EbmlDeltas => {
                    while self.sizes.len() < self.frames - 1 {
                        match self.varint.read_unsigned(input, true, false, MAX_VINT_LENGTH)? {
                            Varint::Value { value, width } => {
                                let delta = laced_size_delta(value, width);
                                let prev = *self.sizes.last().unwrap() as i64;
                                let size = prev + delta;
                                if size < 0 {
                                    return Err(DemuxError::InvalidLacing(
                                        "negative laced frame size".into(),
                                    ));
                                }
                                self.sizes.push(size as u64);
                            }
                            Varint::Pending => return Ok(Progress::Pending),
                            _ => {
                                return Err(DemuxError::InvalidLacing(
                                    "truncated lace size delta".into(),
                                ))
                            }
                        }
                    }
                    return Ok(Progress::Done);
                }
            }
        }
    }

    fn finish(&mut self, payload: u64) -> Result<ParsedBlock> {
        let frame_sizes = match self.lacing {
            Lacing::None => vec![payload],
            Lacing::FixedSize => {
                let frames = self.frames as u64;
                if payload % frames != 0 {
                    return Err(DemuxError::InvalidLacing(format!(
                        "payload of {payload} bytes does not divide into {frames} fixed laces"
                    )));
                }
                vec![payload / frames; self.frames]
            }
            Lacing::Xiph | Lacing::Ebml => {
                let declared: u64 = self.sizes.iter().sum();
                if declared > payload {
                    return Err(DemuxError::InvalidLacing(format!(
                        "laced sizes total {declared} bytes but only {payload} remain"
                    )));
                }
                let mut sizes = std::mem::take(&mut self.sizes);
                sizes.push(payload - declared);
                sizes
            }
        };
        let block = ParsedBlock {
            track_number: self.track_number,
            timecode: self.timecode,
            keyframe: self.flags & 0x80 != 0,
            invisible: self.flags & 0x08 != 0,
            discardable: self.flags & 0x01 != 0,
            frame_sizes,
        };
        self.reset();
        Ok(block)
    }
}

/// Decode an EBML lace-size delta: the unsigned varint value minus the
/// bias for its width.
fn laced_size_delta(value: u64, width: usize) -> i64 {
    let bias = (1i64 << (7 * width - 1)) - 1;
    value as i64 - bias
}
