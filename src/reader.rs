//! The EBML element walker.
//!
//! [`EbmlReader`] owns the low-level parse loop: it reads element IDs and
//! sizes, tracks the stack of open master elements, decodes scalar content,
//! and hands everything to an [`ElementProcessor`]. Binary elements are not
//! buffered here; the processor consumes them incrementally so block
//! payloads of any size stream straight through.
//!
//! The reader is resumable at byte granularity. Every call to
//! [`EbmlReader::advance`] either completes one dispatch step, reports
//! `Pending` when the input starves, or reports `Ended` at a clean end of
//! stream.

use crate::ebml::{self, ElementId, Varint, VarintReader, MAX_VINT_LENGTH};
use crate::elements::{self, ElementType};
use crate::error::{DemuxError, Result};
use crate::input::{skip_fully, Progress, Scratch, StreamInput};

/// What the processor wants done with a binary element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryDisposition {
    /// Stream the content to [`ElementProcessor::binary_data`].
    Consume,
    /// Discard the content without delivering it.
    Skip,
}

/// Outcome of one [`EbmlReader::advance`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderStep {
    /// One element (or master boundary) was dispatched.
    Processed,
    /// The input has no bytes available yet; call again later.
    Pending,
    /// The stream ended cleanly with no open sized element.
    Ended,
}

/// Receiver for dispatched elements.
pub trait ElementProcessor {
    /// A master element opened. `content_size` is `None` for unknown-size
    /// masters. `element_start` is the offset of the ID byte.
    fn start_master(
        &mut self,
        id: u32,
        element_start: u64,
        content_start: u64,
        content_size: Option<u64>,
    ) -> Result<()>;

    /// A master element closed.
    fn end_master(&mut self, id: u32) -> Result<()>;

    /// An unsigned integer element completed.
    fn unsigned_int(&mut self, id: u32, value: u64) -> Result<()>;

    /// A float element completed.
    fn float(&mut self, id: u32, value: f64) -> Result<()>;

    /// A string element completed.
    fn string(&mut self, id: u32, value: String) -> Result<()>;

    /// A binary element is starting; decide how to handle its content.
    fn begin_binary(&mut self, id: u32, size: u64) -> Result<BinaryDisposition>;

    /// Consume binary content. The processor reads from `input`,
    /// decrementing `remaining` by the bytes consumed, and returns
    /// `Pending` to suspend. The element completes when `remaining`
    /// reaches zero and `Done` is returned.
    fn binary_data(
        &mut self,
        input: &mut dyn StreamInput,
        id: u32,
        remaining: &mut u64,
    ) -> Result<Progress>;
}

#[derive(Debug)]
struct OpenMaster {
    id: u32,
    /// Absolute offset one past the content, or `None` for unknown size.
    end: Option<u64>,
}

#[derive(Debug)]
enum State {
    /// Reading the next element ID.
    Id,
    /// Reading the size of the element with this ID.
    Size { id: u32 },
    /// Accumulating scalar content into the scratch buffer.
    Scalar { id: u32, kind: ElementType },
    /// The processor is consuming binary content.
    Binary { id: u32, remaining: u64 },
    /// Discarding content.
    Skip { remaining: u64 },
}

/// Resumable EBML parse loop over a [`StreamInput`].
pub struct EbmlReader {
    state: State,
    stack: Vec<OpenMaster>,
    varint: VarintReader,
    scratch: Scratch,
    element_start: u64,
}

impl Default for EbmlReader {
    fn default() -> Self {
        Self::new()
    }
}

impl EbmlReader {
    /// Create a reader positioned at the start of an element.
    pub fn new() -> Self {
        Self {
            state: State::Id,
            stack: Vec::new(),
            varint: VarintReader::new(),
            scratch: Scratch::default(),
            element_start: 0,
        }
    }

    /// Number of currently open master elements.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Discard all parse state. The next byte read from the input must be
    /// the first byte of an element ID. Used after an external seek.
    pub fn reset(&mut self) {
        self.state = State::Id;
        self.stack.clear();
        self.varint.reset();
        self.scratch.finish();
    }

    /// Run one dispatch step.
    pub fn advance(
        &mut self,
        input: &mut dyn StreamInput,
        processor: &mut dyn ElementProcessor,
    ) -> Result<ReaderStep> {
        loop {
            match self.state {
                State::Id => {
                    if self.varint.is_idle() {
                        let pos = input.position();
                        if let Some(top) = self.stack.last() {
                            if let Some(end) = top.end {
                                if pos > end {
                                    return Err(DemuxError::InvalidElementSize {
                                        id: top.id,
                                        size: end,
                                    });
                                }
                                if pos == end {
                                    let closed = self.stack.pop().unwrap();
                                    processor.end_master(closed.id)?;
                                    return Ok(ReaderStep::Processed);
                                }
                            }
                        }
                        self.element_start = pos;
                    }
                    match self.varint.read_id(input)? {
                        ElementId::Id { id, .. } => {
                            // A top-level section terminates any open
                            // unknown-size cluster.
                            if elements::is_top_level(id) {
                                while let Some(top) = self.stack.last() {
                                    if top.end.is_none() && top.id != elements::SEGMENT {
                                        let closed = self.stack.pop().unwrap();
                                        processor.end_master(closed.id)?;
                                    } else {
                                        break;
                                    }
                                }
                            }
                            self.state = State::Size { id };
                        }
                        ElementId::Pending => return Ok(ReaderStep::Pending),
                        ElementId::Ended => {
                            if let Some(top) = self.stack.last() {
                                if top.end.is_some() {
                                    return Err(DemuxError::UnexpectedEof {
                                        offset: input.position(),
                                    });
                                }
                                let closed = self.stack.pop().unwrap();
                                processor.end_master(closed.id)?;
                                return Ok(ReaderStep::Processed);
                            }
                            return Ok(ReaderStep::Ended);
                        }
                    }
                }

                State::Size { id } => {
                    let size =
                        match self
                            .varint
                            .read_unsigned(input, true, true, MAX_VINT_LENGTH)?
                        {
                            Varint::Value { value, .. } => Some(value),
                            Varint::UnknownLength { .. } => None,
                            Varint::Pending => return Ok(ReaderStep::Pending),
                            Varint::Ended => {
                                return Err(DemuxError::UnexpectedEof {
                                    offset: input.position(),
                                })
                            }
                        };
                    let content_start = input.position();
                    let kind = elements::classify(id);

                    if let (Some(size), Some(end)) =
                        (size, self.stack.last().and_then(|m| m.end))
                    {
                        if content_start + size > end {
                            return Err(DemuxError::InvalidElementSize { id, size });
                        }
                    }

                    match kind {
                        ElementType::Master => {
                            self.stack.push(OpenMaster {
                                id,
                                end: size.map(|s| content_start + s),
                            });
                            processor.start_master(
                                id,
                                self.element_start,
                                content_start,
                                size,
                            )?;
                            self.state = State::Id;
                            return Ok(ReaderStep::Processed);
                        }
                        ElementType::UnsignedInt
                        | ElementType::Float
                        | ElementType::String => {
                            let size = size
                                .ok_or(DemuxError::InvalidElementSize { id, size: u64::MAX })?;
                            match kind {
                                ElementType::UnsignedInt if size > 8 => {
                                    return Err(DemuxError::InvalidElementSize { id, size });
                                }
                                ElementType::Float
                                    if size != 0 && size != 4 && size != 8 =>
                                {
                                    return Err(DemuxError::InvalidElementSize { id, size });
                                }
                                ElementType::String if size > MAX_STRING_SIZE => {
                                    return Err(DemuxError::InvalidElementSize { id, size });
                                }
                                _ => {}
                            }
                            self.scratch.begin(size as usize);
                            self.state = State::Scalar { id, kind };
                        }
                        ElementType::Binary => {
                            let size = size
                                .ok_or(DemuxError::InvalidElementSize { id, size: u64::MAX })?;
                            match processor.begin_binary(id, size)? {
                                BinaryDisposition::Consume => {
                                    self.state = State::Binary {
                                        id,
                                        remaining: size,
                                    };
                                }
                                BinaryDisposition::Skip => {
                                    self.state = State::Skip { remaining: size };
                                }
                            }
                        }
                        ElementType::Unknown => {
                            let size = size
                                .ok_or(DemuxError::InvalidElementSize { id, size: u64::MAX })?;
                            self.state = State::Skip { remaining: size };
                        }
                    }
                }

                State::Scalar { id, kind } => {
                    if self.scratch.fill(input)? == Progress::Pending {
                        return Ok(ReaderStep::Pending);
                    }
                    let data = self.scratch.data();
                    match kind {
                        ElementType::UnsignedInt => {
                            let value = ebml::parse_unsigned(data);
                            self.scratch.finish();
                            processor.unsigned_int(id, value)?;
                        }
                        ElementType::Float => {
                            let value = ebml::parse_float(data);
                            self.scratch.finish();
                            processor.float(id, value)?;
                        }
                        ElementType::String => {
                            let value = ebml::parse_string(data)
                                .ok_or(DemuxError::InvalidString { id })?;
                            self.scratch.finish();
                            processor.string(id, value)?;
                        }
                        _ => unreachable!("scalar state holds scalar kinds only"),
                    }
                    self.state = State::Id;
                    return Ok(ReaderStep::Processed);
                }

                State::Binary { id, ref mut remaining } => {
                    if processor.binary_data(input, id, remaining)? == Progress::Pending {
                        return Ok(ReaderStep::Pending);
                    }
                    debug_assert_eq!(*remaining, 0);
                    self.state = State::Id;
                    return Ok(ReaderStep::Processed);
                }

                State::Skip { ref mut remaining } => {
                    if skip_fully(input, remaining)? == Progress::Pending {
                        return Ok(ReaderStep::Pending);
                    }
                    self.state = State::Id;
                    return Ok(ReaderStep::Processed);
                }
            }
        }
    }
}

/// Upper bound on string element content. Anything larger is a corrupt
/// size field, not a real string.
const MAX_STRING_SIZE: u64 = 1 << 20;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::*;
    use crate::input::{ReadStatus, SliceInput};

    #[derive(Debug, PartialEq)]
    enum Event {
        Start(u32),
        End(u32),
        Uint(u32, u64),
        Float(u32, f64),
        Str(u32, String),
        Bin(u32, Vec<u8>),
    }

    #[derive(Default)]
    struct Recorder {
        events: Vec<Event>,
        bin: Vec<u8>,
    }

    impl ElementProcessor for Recorder {
        fn start_master(
            &mut self,
            id: u32,
            _element_start: u64,
            _content_start: u64,
            _content_size: Option<u64>,
        ) -> Result<()> {
            self.events.push(Event::Start(id));
            Ok(())
        }

        fn end_master(&mut self, id: u32) -> Result<()> {
            self.events.push(Event::End(id));
            Ok(())
        }

        fn unsigned_int(&mut self, id: u32, value: u64) -> Result<()> {
            self.events.push(Event::Uint(id, value));
            Ok(())
        }

        fn float(&mut self, id: u32, value: f64) -> Result<()> {
            self.events.push(Event::Float(id, value));
            Ok(())
        }

        fn string(&mut self, id: u32, value: String) -> Result<()> {
            self.events.push(Event::Str(id, value));
            Ok(())
        }

        fn begin_binary(&mut self, id: u32, _size: u64) -> Result<BinaryDisposition> {
            if id == VOID || id == CRC32 {
                return Ok(BinaryDisposition::Skip);
            }
            self.bin.clear();
            Ok(BinaryDisposition::Consume)
        }

        fn binary_data(
            &mut self,
            input: &mut dyn StreamInput,
            id: u32,
            remaining: &mut u64,
        ) -> Result<Progress> {
            let mut buf = [0u8; 64];
            while *remaining > 0 {
                let want = (*remaining as usize).min(buf.len());
                match input.read(&mut buf[..want])? {
                    ReadStatus::Ready(n) => {
                        self.bin.extend_from_slice(&buf[..n]);
                        *remaining -= n as u64;
                    }
                    ReadStatus::NotReady => return Ok(Progress::Pending),
                    ReadStatus::Ended => {
                        return Err(DemuxError::UnexpectedEof {
                            offset: input.position(),
                        })
                    }
                }
            }
            self.events.push(Event::Bin(id, std::mem::take(&mut self.bin)));
            Ok(Progress::Done)
        }
    }

    fn run(data: Vec<u8>) -> Result<Vec<Event>> {
        let mut input = SliceInput::new(data);
        let mut reader = EbmlReader::new();
        let mut recorder = Recorder::default();
        loop {
            match reader.advance(&mut input, &mut recorder)? {
                ReaderStep::Processed => {}
                ReaderStep::Pending => panic!("slice input never starves"),
                ReaderStep::Ended => return Ok(recorder.events),
            }
        }
    }

    // DocType "webm" inside a sized EBML master.
    fn ebml_header() -> Vec<u8> {
        vec![
            0x1A, 0x45, 0xDF, 0xA3, 0x87, // EBML, size 7
            0x42, 0x82, 0x84, b'w', b'e', b'b', b'm', // DocType "webm"
        ]
    }

    #[test]
    fn test_sized_master_with_string_child() {
        let events = run(ebml_header()).unwrap();
        assert_eq!(
            events,
            vec![
                Event::Start(EBML),
                Event::Str(DOC_TYPE, "webm".into()),
                Event::End(EBML),
            ]
        );
    }

    #[test]
    fn test_uint_and_float_children() {
        let mut data = vec![
            0x15, 0x49, 0xA9, 0x66, 0x8E, // Info, size 14
            0x2A, 0xD7, 0xB1, 0x83, 0x0F, 0x42, 0x40, // TimecodeScale = 1000000
        ];
        data.extend_from_slice(&[0x44, 0x89, 0x84]); // Duration, 4-byte float
        data.extend_from_slice(&1500.0f32.to_bits().to_be_bytes());
        let events = run(data).unwrap();
        assert_eq!(
            events,
            vec![
                Event::Start(INFO),
                Event::Uint(TIMECODE_SCALE, 1_000_000),
                Event::Float(DURATION, 1500.0),
                Event::End(INFO),
            ]
        );
    }

    #[test]
    fn test_unknown_element_is_skipped() {
        // Attachments (unrecognized here) followed by an EBML header.
        let mut data = vec![0x19, 0x41, 0xA4, 0x69, 0x82, 0xAB, 0xCD];
        data.extend_from_slice(&ebml_header());
        let events = run(data).unwrap();
        assert_eq!(events[0], Event::Start(EBML));
    }

    #[test]
    fn test_void_binary_is_skipped() {
        let data = vec![0xEC, 0x83, 0x00, 0x00, 0x00]; // Void, 3 bytes
        let events = run(data).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_binary_content_streams_to_processor() {
        let data = vec![0x63, 0xA2, 0x83, 0x01, 0x02, 0x03]; // CodecPrivate
        let events = run(data).unwrap();
        assert_eq!(events, vec![Event::Bin(CODEC_PRIVATE, vec![1, 2, 3])]);
    }

    #[test]
    fn test_unknown_size_master_closed_at_eof() {
        let mut data = vec![0x18, 0x53, 0x80, 0x67, 0xFF]; // Segment, unknown size
        data.extend_from_slice(&[0xE7, 0x81, 0x05]); // stray Timestamp = 5
        let events = run(data).unwrap();
        assert_eq!(
            events,
            vec![
                Event::Start(SEGMENT),
                Event::Uint(TIMESTAMP, 5),
                Event::End(SEGMENT),
            ]
        );
    }

    #[test]
    fn test_unknown_size_cluster_closed_by_next_section() {
        let mut data = vec![0x18, 0x53, 0x80, 0x67, 0xFF]; // Segment, unknown
        data.extend_from_slice(&[0x1F, 0x43, 0xB6, 0x75, 0xFF]); // Cluster, unknown
        data.extend_from_slice(&[0xE7, 0x81, 0x00]); // Timestamp = 0
        data.extend_from_slice(&[0x1C, 0x53, 0xBB, 0x6B, 0x80]); // Cues, size 0
        let events = run(data).unwrap();
        assert_eq!(
            events,
            vec![
                Event::Start(SEGMENT),
                Event::Start(CLUSTER),
                Event::Uint(TIMESTAMP, 0),
                Event::End(CLUSTER),
                Event::Start(CUES),
                Event::End(CUES),
                Event::End(SEGMENT),
            ]
        );
    }

    #[test]
    fn test_child_overrunning_parent_is_error() {
        let data = vec![
            0x15, 0x49, 0xA9, 0x66, 0x83, // Info, size 3
            0x2A, 0xD7, 0xB1, 0x84, 0, 0, 0, 1, // TimecodeScale claiming 4 bytes
        ];
        assert!(matches!(
            run(data),
            Err(DemuxError::InvalidElementSize { .. })
        ));
    }

    #[test]
    fn test_oversized_uint_is_error() {
        let data = vec![0xE7, 0x89, 0, 0, 0, 0, 0, 0, 0, 0, 1]; // 9-byte uint
        assert!(matches!(
            run(data),
            Err(DemuxError::InvalidElementSize { .. })
        ));
    }

    #[test]
    fn test_bad_float_size_is_error() {
        let data = vec![0x44, 0x89, 0x83, 0, 0, 0]; // 3-byte Duration
        assert!(matches!(
            run(data),
            Err(DemuxError::InvalidElementSize { .. })
        ));
    }

    #[test]
    fn test_eof_inside_sized_master_is_error() {
        let data = vec![0x15, 0x49, 0xA9, 0x66, 0x85]; // Info claims 5 bytes, none follow
        assert!(matches!(run(data), Err(DemuxError::UnexpectedEof { .. })));
    }

    #[test]
    fn test_reset_clears_open_masters() {
        let mut input = SliceInput::new(vec![0x18, 0x53, 0x80, 0x67, 0xFF]);
        let mut reader = EbmlReader::new();
        let mut recorder = Recorder::default();
        reader.advance(&mut input, &mut recorder).unwrap();
        assert_eq!(reader.depth(), 1);
        reader.reset();
        assert_eq!(reader.depth(), 0);
    }
}
