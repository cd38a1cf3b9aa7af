//! The Matroska/WebM demuxer: wires the element walker to track, block,
//! cue, and seek-head handling, and drives sample extraction.
//!
//! One [`MatroskaDemuxer`] serves one input stream. The caller owns the
//! read loop: each [`MatroskaDemuxer::read`] call advances the parse by at
//! most one dispatch step and reports whether to continue, reposition the
//! stream, wait for more bytes, or stop.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::block::{BlockState, ParsedBlock};
use crate::ebml::parse_signed;
use crate::elements;
use crate::error::{DemuxError, Result};
use crate::index::{choose_primary_track, CueBuilder, CuePointData, SeekMap};
use crate::input::{skip_fully, Progress, Scratch, StreamInput};
use crate::output::{CryptoInfo, DemuxerOutput, SampleFlags, SamplePart, TrackType};
use crate::reader::{BinaryDisposition, EbmlReader, ElementProcessor, ReaderStep};
use crate::resolver::{NextAction, SeekHeadResolver};
use crate::sample::{assemble_text_sample, FrameEnd, MlpVariant, SampleWriter};
use crate::track::{CodecKind, CodecRegistry, FormatState, Track, TrackEntryBuilder};

/// What the caller should do after one [`MatroskaDemuxer::read`] step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemuxAction {
    /// Progress was made; call `read` again.
    Continue,
    /// Reposition the input to this absolute offset, then call `read`.
    Seek {
        /// Target offset in bytes.
        position: u64,
    },
    /// The input has no bytes available yet; retry later.
    Pending,
    /// The stream is fully demuxed.
    Ended,
}

/// Default nanoseconds per timecode unit (1 ms).
const DEFAULT_TIMECODE_SCALE_NS: u64 = 1_000_000;

/// Upper bound on binary elements buffered whole (codec private, key IDs,
/// seek IDs). Sample data streams and is not subject to this.
const MAX_COLLECT_SIZE: u64 = 1 << 24;

/// Streaming Matroska/WebM demuxer.
pub struct MatroskaDemuxer {
    reader: EbmlReader,
    core: Core,
}

impl MatroskaDemuxer {
    /// Create a demuxer delivering to `output`, with the built-in codec
    /// set.
    pub fn new(output: Box<dyn DemuxerOutput>) -> Self {
        Self::with_registry(output, CodecRegistry::default())
    }

    /// Create a demuxer with a custom codec registry.
    pub fn with_registry(output: Box<dyn DemuxerOutput>, registry: CodecRegistry) -> Self {
        Self {
            reader: EbmlReader::new(),
            core: Core::new(output, registry),
        }
    }

    /// Advance the parse by one step.
    pub fn read(&mut self, input: &mut dyn StreamInput) -> Result<DemuxAction> {
        self.core.stream_length = input.length();

        if let Some(position) = self.core.pending_resolve.take() {
            if let Some(target) = self.core.resolve_jump(position, input.length()) {
                self.reset_transient();
                return Ok(DemuxAction::Seek { position: target });
            }
        }

        match self.reader.advance(input, &mut self.core)? {
            ReaderStep::Processed => {
                if self.core.resolve_requested {
                    self.core.resolve_requested = false;
                    self.core.pending_resolve = Some(input.position());
                }
                Ok(DemuxAction::Continue)
            }
            ReaderStep::Pending => Ok(DemuxAction::Pending),
            ReaderStep::Ended => {
                // A detour may have run off the end of the file while an
                // interrupted position is still owed a return.
                if self.core.resolver.is_active() {
                    if let Some(target) =
                        self.core.resolve_jump(input.position(), input.length())
                    {
                        self.reset_transient();
                        return Ok(DemuxAction::Seek { position: target });
                    }
                }
                self.core.finish_stream()?;
                Ok(DemuxAction::Ended)
            }
        }
    }

    /// Reset transient parse state after the caller repositioned the
    /// input. Accumulated knowledge of the file (tracks, discovered
    /// positions, an already-sent seek map) survives; any half-read
    /// element, open block, or partial varint does not.
    pub fn seek(&mut self) {
        self.reset_transient();
        self.core.resolver.reset();
        self.core.pending_resolve = None;
        self.core.resolve_requested = false;
        // Re-parsing a Cues element must not duplicate points.
        if !self.core.resolver.seek_map_sent() {
            self.core.cue_builder.reset();
        }
    }

    fn reset_transient(&mut self) {
        self.reader.reset();
        self.core.scratch.finish();
        self.core.binary = BinaryState::Idle;
        self.core.block.clear();
        self.core.writer.reset();
        self.core.group = None;
        self.core.cluster_timecode = None;
        self.core.current_entry = None;
        for track in self.core.tracks.values_mut() {
            if let Some(chunker) = track.rechunker.as_mut() {
                chunker.reset();
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryState {
    Idle,
    /// Buffering a small element whole into the scratch.
    Collect,
    /// Streaming a SimpleBlock/Block.
    Block,
}

#[derive(Debug, Default)]
struct BlockContext {
    state: BlockState,
    parsed: Option<ParsedBlock>,
    is_simple: bool,
    skip: bool,
    frame_index: usize,
    frame_started: bool,
    frame_remaining: u64,
    frame_offset: u64,
}

impl BlockContext {
    fn begin(&mut self, simple: bool) {
        self.state.reset();
        self.parsed = None;
        self.is_simple = simple;
        self.skip = false;
        self.frame_index = 0;
        self.frame_started = false;
        self.frame_remaining = 0;
    }

    fn clear(&mut self) {
        self.begin(false);
    }
}

#[derive(Debug)]
struct PendingFrame {
    time_us: i64,
    size: usize,
    offset: u64,
    crypto: Option<CryptoInfo>,
    text: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct GroupContext {
    track_number: Option<u64>,
    invisible: bool,
    frames: Vec<PendingFrame>,
    saw_reference: bool,
    /// BlockDuration in timecode units.
    block_duration: Option<u64>,
    discard_padding_ns: Option<i64>,
    /// BlockAddID of the current BlockMore; only id 1 is forwarded.
    block_add_id: Option<u64>,
}

#[derive(Debug, Default)]
struct CuePositionsTmp {
    track: Option<u64>,
    cluster_position: Option<u64>,
}

struct Core {
    output: Box<dyn DemuxerOutput>,
    registry: CodecRegistry,

    // EBML header
    doc_type: Option<String>,

    // Segment
    segment_start: u64,
    segment_end: Option<u64>,
    stream_length: Option<u64>,
    timecode_scale_ns: u64,
    duration_raw: Option<f64>,
    duration_us: Option<i64>,

    // Tracks
    tracks: BTreeMap<u64, Track>,
    current_entry: Option<TrackEntryBuilder>,
    pending_analysis: usize,
    tracks_parsed: bool,
    tracks_ended: bool,

    // Cluster / block
    cluster_timecode: Option<u64>,
    block: BlockContext,
    writer: SampleWriter,
    group: Option<GroupContext>,

    // Cues
    cue_builder: CueBuilder,
    cue_time_us: Option<i64>,
    cue_positions: CuePositionsTmp,

    // Seek heads
    seek_id: Option<u32>,
    seek_position: Option<u64>,
    resolver: SeekHeadResolver,
    pending_resolve: Option<u64>,
    resolve_requested: bool,

    // Binary element plumbing
    binary: BinaryState,
    scratch: Scratch,
}

impl Core {
    fn new(output: Box<dyn DemuxerOutput>, registry: CodecRegistry) -> Self {
        Self {
            output,
            registry,
            doc_type: None,
            segment_start: 0,
            segment_end: None,
            stream_length: None,
            timecode_scale_ns: DEFAULT_TIMECODE_SCALE_NS,
            duration_raw: None,
            duration_us: None,
            tracks: BTreeMap::new(),
            current_entry: None,
            pending_analysis: 0,
            tracks_parsed: false,
            tracks_ended: false,
            cluster_timecode: None,
            block: BlockContext::default(),
            writer: SampleWriter::default(),
            group: None,
            cue_builder: CueBuilder::default(),
            cue_time_us: None,
            cue_positions: CuePositionsTmp::default(),
            seek_id: None,
            seek_position: None,
            resolver: SeekHeadResolver::default(),
            pending_resolve: None,
            resolve_requested: false,
            binary: BinaryState::Idle,
            scratch: Scratch::default(),
        }
    }

    fn timecode_to_us(&self, timecode: i64) -> i64 {
        timecode.saturating_mul(self.timecode_scale_ns as i64) / 1000
    }

    fn emit_seek_map(&mut self) {
        if self.resolver.seek_map_sent() {
            return;
        }
        let tracks: Vec<(u64, TrackType, bool)> = self
            .tracks
            .values()
            .map(|t| (t.number, t.track_type, t.format.is_default))
            .collect();
        let primary = choose_primary_track(&tracks).unwrap_or(0);
        let segment_end = self.segment_end.or(self.stream_length).unwrap_or(0);
        let map = self.cue_builder.build(
            self.segment_start,
            segment_end,
            self.duration_us,
            primary,
        );
        self.output.seek_map(map);
        self.resolver.mark_seek_map_sent();
    }

    fn emit_unseekable(&mut self) {
        if !self.resolver.seek_map_sent() {
            self.output.seek_map(SeekMap::Unseekable {
                duration_us: self.duration_us,
            });
            self.resolver.mark_seek_map_sent();
        }
    }

    /// Consult the resolver at `position` and translate its verdict into
    /// an optional jump target. The unseekable fallback emits the map and
    /// asks again, so a return to an interrupted position still happens.
    fn resolve_jump(&mut self, position: u64, length: Option<u64>) -> Option<u64> {
        match self.resolver.next_action(position, length) {
            NextAction::Jump(target) => Some(target),
            NextAction::Continue => None,
            NextAction::Unseekable => {
                self.emit_unseekable();
                match self.resolver.next_action(position, length) {
                    NextAction::Jump(target) => Some(target),
                    _ => None,
                }
            }
        }
    }

    fn maybe_end_tracks(&mut self) {
        if self.tracks_parsed && !self.tracks_ended && self.pending_analysis == 0 {
            for track in self.tracks.values_mut() {
                track.deliver_format();
            }
            self.output.end_tracks();
            self.tracks_ended = true;
        }
    }

    /// Resolve a deferred TrueHD format from the chunker's sniffed header.
    fn resolve_deferred_format(&mut self, track_number: u64) {
        let Some(track) = self.tracks.get_mut(&track_number) else {
            return;
        };
        if track.format_state != FormatState::Pending {
            return;
        }
        let variant = track.rechunker.as_ref().and_then(|c| c.variant());
        if variant == Some(MlpVariant::Mlp) {
            track.format.codec_id = "A_MLP".to_string();
        }
        track.resolve_format();
        self.pending_analysis = self.pending_analysis.saturating_sub(1);
        self.maybe_end_tracks();
    }

    /// Deliver a frame's metadata (and, for text, its assembled bytes).
    #[allow(clippy::too_many_arguments)]
    fn finalize_frame(
        &mut self,
        track_number: u64,
        time_us: i64,
        keyframe: bool,
        invisible: bool,
        size: usize,
        offset: u64,
        crypto: Option<CryptoInfo>,
        text: Option<Vec<u8>>,
        duration_us: Option<i64>,
    ) -> Result<()> {
        let needs_resolve = self
            .tracks
            .get(&track_number)
            .map_or(false, |t| t.format_state == FormatState::Pending);
        if needs_resolve {
            self.resolve_deferred_format(track_number);
        }

        let Some(track) = self.tracks.get_mut(&track_number) else {
            return Ok(());
        };
        let mut flags = SampleFlags::empty();
        if keyframe {
            flags |= SampleFlags::KEYFRAME;
        }
        if invisible {
            flags |= SampleFlags::DECODE_ONLY;
        }
        if crypto.is_some() {
            flags |= SampleFlags::ENCRYPTED;
        }

        track.deliver_format();
        if let Some(text) = text {
            let assembled = assemble_text_sample(track.codec, &text, duration_us);
            track.sink.sample_data(&assembled, SamplePart::Payload);
            track
                .sink
                .sample_metadata(time_us, flags, assembled.len(), offset, None);
        } else if let Some(chunker) = track.rechunker.as_mut() {
            if let Some(group) = chunker.frame_complete(time_us, flags, size, offset) {
                track.sink.sample_metadata(
                    group.time_us,
                    group.flags,
                    group.size,
                    group.offset,
                    None,
                );
            }
        } else {
            track
                .sink
                .sample_metadata(time_us, flags, size, offset, crypto.as_ref());
        }
        Ok(())
    }

    /// Close out one frame of the current block: emit directly for a
    /// SimpleBlock, buffer for a BlockGroup.
    fn commit_frame(&mut self, end: FrameEnd) -> Result<()> {
        let (track_number, keyframe_bit, invisible) = {
            let parsed = self
                .block
                .parsed
                .as_ref()
                .expect("frame committed without a parsed block");
            (parsed.track_number, parsed.keyframe, parsed.invisible)
        };
        let lace = self.block.frame_index;
        let multi = self
            .block
            .parsed
            .as_ref()
            .map_or(false, |p| p.frame_sizes.len() > 1);
        let timecode = self
            .block
            .parsed
            .as_ref()
            .map_or(0, |p| p.timecode as i64);

        let base = self.cluster_timecode.unwrap_or(0) as i64 + timecode;
        let mut time_us = self.timecode_to_us(base);
        let default_duration_us = self
            .tracks
            .get(&track_number)
            .and_then(|t| t.default_duration_us());
        time_us += lace as i64 * default_duration_us.unwrap_or(0);

        let offset = self.block.frame_offset;
        let (size, crypto, text) = match end {
            FrameEnd::Emit { size, crypto } => (size, crypto, None),
            FrameEnd::Text(buf) => (0, None, Some(buf)),
        };
        if text.is_some() && multi {
            warn!(
                track = track_number,
                "laced subtitle block, duration framing skipped"
            );
        }

        if self.block.is_simple {
            let keyframe = match self.tracks.get(&track_number).map(|t| t.track_type) {
                Some(TrackType::Video) => keyframe_bit,
                Some(TrackType::Audio) | Some(TrackType::Text) => true,
                _ => false,
            };
            let duration = if multi { None } else { default_duration_us };
            self.finalize_frame(
                track_number,
                time_us,
                keyframe,
                invisible,
                size,
                offset,
                crypto,
                text,
                duration,
            )
        } else {
            let group = self
                .group
                .as_mut()
                .expect("group block outside a BlockGroup");
            group.track_number = Some(track_number);
            group.invisible = invisible;
            group.frames.push(PendingFrame {
                time_us,
                size,
                offset,
                crypto,
                text,
            });
            Ok(())
        }
    }

    fn finish_group(&mut self) -> Result<()> {
        let Some(group) = self.group.take() else {
            return Ok(());
        };
        let Some(track_number) = group.track_number else {
            return Ok(());
        };
        let keyframe = match self.tracks.get(&track_number).map(|t| t.track_type) {
            Some(TrackType::Video) => !group.saw_reference,
            Some(TrackType::Audio) | Some(TrackType::Text) => true,
            _ => false,
        };
        let multi = group.frames.len() > 1;
        if let Some(padding) = group.discard_padding_ns {
            // Opus decoders trim the padding off the end of the sample.
            if multi {
                warn!(
                    track = track_number,
                    "discard padding on a laced block, skipped"
                );
            } else if let Some(track) = self.tracks.get_mut(&track_number) {
                if track.codec == CodecKind::Opus {
                    track
                        .sink
                        .sample_data(&padding.to_le_bytes(), SamplePart::Supplemental);
                }
            }
        }
        let duration_us = group
            .block_duration
            .map(|d| self.timecode_to_us(d as i64))
            .or_else(|| {
                self.tracks
                    .get(&track_number)
                    .and_then(|t| t.default_duration_us())
            });
        for frame in group.frames {
            let duration = if multi { None } else { duration_us };
            self.finalize_frame(
                track_number,
                frame.time_us,
                keyframe,
                group.invisible,
                frame.size,
                frame.offset,
                frame.crypto,
                frame.text,
                duration,
            )?;
        }
        Ok(())
    }

    fn finish_seek_entry(&mut self) {
        let (Some(id), Some(position)) = (self.seek_id.take(), self.seek_position.take())
        else {
            return;
        };
        let target = self.segment_start + position;
        match id {
            elements::SEEK_HEAD => self.resolver.add_seek_head(target),
            elements::CUES => self.resolver.set_cues_position(target),
            _ => {}
        }
    }

    fn finish_collect(&mut self, id: u32, data: Vec<u8>) -> Result<()> {
        match id {
            elements::SEEK_ID => {
                if (1..=4).contains(&data.len()) {
                    let mut value = 0u32;
                    for &byte in &data {
                        value = (value << 8) | byte as u32;
                    }
                    self.seek_id = Some(value);
                }
            }
            elements::CODEC_PRIVATE
            | elements::CONTENT_COMP_SETTINGS
            | elements::CONTENT_ENC_KEY_ID => {
                if let Some(entry) = self.current_entry.as_mut() {
                    entry.set_binary(id, data);
                }
            }
            elements::DISCARD_PADDING => {
                if let Some(group) = self.group.as_mut() {
                    group.discard_padding_ns = Some(parse_signed(&data));
                }
            }
            elements::BLOCK_ADDITIONAL => {
                let Some(group) = self.group.as_ref() else {
                    return Ok(());
                };
                if group.block_add_id.unwrap_or(1) != 1 {
                    return Ok(());
                }
                if group.frames.len() != 1 {
                    warn!("supplemental data on a laced block, skipped");
                    return Ok(());
                }
                if let Some(track) =
                    group.track_number.and_then(|n| self.tracks.get_mut(&n))
                {
                    track.sink.sample_data(&data, SamplePart::Supplemental);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn block_data(
        &mut self,
        input: &mut dyn StreamInput,
        remaining: &mut u64,
    ) -> Result<Progress> {
        if self.block.parsed.is_none() {
            let Some(parsed) = self.block.state.parse(input, remaining)? else {
                return Ok(Progress::Pending);
            };
            if !self.tracks.contains_key(&parsed.track_number) {
                debug!(
                    track = parsed.track_number,
                    "block for an unselected track, skipped"
                );
                self.block.skip = true;
            }
            self.block.parsed = Some(parsed);
        }

        if self.block.skip {
            if skip_fully(input, remaining)? == Progress::Pending {
                return Ok(Progress::Pending);
            }
            self.block.clear();
            return Ok(Progress::Done);
        }

        loop {
            let (track_number, frame_count) = {
                let parsed = self.block.parsed.as_ref().expect("parsed above");
                (parsed.track_number, parsed.frame_sizes.len())
            };
            if self.block.frame_index >= frame_count {
                break;
            }
            if !self.block.frame_started {
                let size = self.block.parsed.as_ref().expect("parsed above").frame_sizes
                    [self.block.frame_index];
                self.block.frame_remaining = size;
                self.block.frame_offset = input.position();
                self.block.frame_started = true;
                let track = self
                    .tracks
                    .get(&track_number)
                    .expect("track checked at block start");
                self.writer.begin_frame(track);
            }

            let before = input.position();
            let track = self
                .tracks
                .get_mut(&track_number)
                .expect("track checked at block start");
            let progress =
                self.writer
                    .write(input, &mut self.block.frame_remaining, track)?;
            *remaining = remaining
                .checked_sub(input.position() - before)
                .ok_or_else(|| {
                    DemuxError::InvalidBlock("frame overruns its element".into())
                })?;
            if progress == Progress::Pending {
                return Ok(Progress::Pending);
            }

            let track = self
                .tracks
                .get_mut(&track_number)
                .expect("track checked at block start");
            let end = self.writer.end_frame(track)?;
            self.commit_frame(end)?;
            self.block.frame_index += 1;
            self.block.frame_started = false;
        }

        self.block.clear();
        Ok(Progress::Done)
    }

    fn finish_stream(&mut self) -> Result<()> {
        // Commit partial TrueHD groups and unblock any still-deferred
        // formats.
        let numbers: Vec<u64> = self.tracks.keys().copied().collect();
        for number in numbers {
            self.resolve_deferred_format(number);
            if let Some(track) = self.tracks.get_mut(&number) {
                if let Some(chunker) = track.rechunker.as_mut() {
                    if let Some(group) = chunker.flush() {
                        track.sink.sample_metadata(
                            group.time_us,
                            group.flags,
                            group.size,
                            group.offset,
                            None,
                        );
                    }
                }
            }
        }
        self.maybe_end_tracks();
        self.emit_seek_map();
        Ok(())
    }
}

impl ElementProcessor for Core {
    fn start_master(
        &mut self,
        id: u32,
        element_start: u64,
        content_start: u64,
        content_size: Option<u64>,
    ) -> Result<()> {
        match id {
            elements::EBML => {
                self.doc_type = None;
            }
            elements::SEGMENT => {
                self.segment_start = content_start;
                self.segment_end = content_size.map(|s| content_start + s);
            }
            elements::SEEK => {
                self.seek_id = None;
                self.seek_position = None;
            }
            elements::TRACK_ENTRY => {
                self.current_entry = Some(TrackEntryBuilder::default());
            }
            elements::COLOUR => {
                if let Some(entry) = self.current_entry.as_mut() {
                    entry.mark_colour();
                }
            }
            elements::CLUSTER => {
                self.cluster_timecode = None;
                if !self.resolver.seek_map_sent() {
                    self.resolver.activate();
                    self.pending_resolve = Some(element_start);
                } else if self.resolver.is_active() {
                    // Still unwinding a detour; do not demux this cluster
                    // out of order.
                    self.pending_resolve = Some(element_start);
                }
            }
            elements::BLOCK_GROUP => {
                self.group = Some(GroupContext::default());
            }
            elements::CUE_POINT => {
                self.cue_time_us = None;
            }
            elements::CUE_TRACK_POSITIONS => {
                self.cue_positions = CuePositionsTmp::default();
            }
            _ => {}
        }
        Ok(())
    }

    fn end_master(&mut self, id: u32) -> Result<()> {
        match id {
            elements::EBML => match self.doc_type.as_deref() {
                Some("matroska") | Some("webm") => {}
                Some(other) => {
                    return Err(DemuxError::InvalidEbmlHeader(format!(
                        "unsupported doc type {other:?}"
                    )))
                }
                None => {
                    return Err(DemuxError::InvalidEbmlHeader(
                        "missing doc type".into(),
                    ))
                }
            },
            elements::SEEK => self.finish_seek_entry(),
            elements::SEEK_HEAD => {
                self.resolve_requested = true;
            }
            elements::INFO => {
                self.duration_us = self
                    .duration_raw
                    .map(|d| (d * self.timecode_scale_ns as f64 / 1000.0) as i64);
            }
            elements::TRACK_ENTRY => {
                let Some(entry) = self.current_entry.take() else {
                    return Ok(());
                };
                let output = &mut self.output;
                let mut new_sink = |number: u64, track_type: TrackType| {
                    output.track(number, track_type)
                };
                if let Some(track) = entry.finish(&self.registry, &mut new_sink)? {
                    if track.format_state == FormatState::Pending {
                        self.pending_analysis += 1;
                    }
                    if self.tracks.insert(track.number, track).is_some() {
                        warn!("duplicate track number, later entry kept");
                    }
                }
            }
            elements::TRACKS => {
                self.tracks_parsed = true;
                self.maybe_end_tracks();
            }
            elements::BLOCK_GROUP => self.finish_group()?,
            elements::CUE_TRACK_POSITIONS => {
                if self.resolver.seek_map_sent() {
                    return Ok(());
                }
                let (Some(time_us), Some(track), Some(cluster_position)) = (
                    self.cue_time_us,
                    self.cue_positions.track,
                    self.cue_positions.cluster_position,
                ) else {
                    return Ok(());
                };
                self.cue_builder.add_point(CuePointData {
                    time_us,
                    track,
                    cluster_position,
                });
            }
            elements::CUES => {
                self.emit_seek_map();
                self.resolve_requested = true;
            }
            _ => {}
        }
        Ok(())
    }

    fn unsigned_int(&mut self, id: u32, value: u64) -> Result<()> {
        match id {
            elements::EBML_READ_VERSION => {
                if value > 1 {
                    return Err(DemuxError::UnsupportedValue { id, value });
                }
            }
            elements::EBML_MAX_ID_LENGTH => {
                if value > 4 {
                    return Err(DemuxError::UnsupportedValue { id, value });
                }
            }
            elements::EBML_MAX_SIZE_LENGTH => {
                if value > 8 {
                    return Err(DemuxError::UnsupportedValue { id, value });
                }
            }
            elements::DOC_TYPE_READ_VERSION => {
                if value > 2 {
                    return Err(DemuxError::UnsupportedValue { id, value });
                }
            }
            elements::SEEK_POSITION => self.seek_position = Some(value),
            elements::TIMECODE_SCALE => {
                if value == 0 {
                    return Err(DemuxError::UnsupportedValue { id, value });
                }
                self.timecode_scale_ns = value;
            }
            elements::TIMESTAMP => self.cluster_timecode = Some(value),
            elements::BLOCK_DURATION => {
                if let Some(group) = self.group.as_mut() {
                    group.block_duration = Some(value);
                }
            }
            elements::REFERENCE_BLOCK => {
                if let Some(group) = self.group.as_mut() {
                    group.saw_reference = true;
                }
            }
            elements::BLOCK_ADD_ID => {
                if let Some(group) = self.group.as_mut() {
                    group.block_add_id = Some(value);
                }
            }
            elements::CUE_TIME => {
                self.cue_time_us = Some(self.timecode_to_us(value as i64));
            }
            elements::CUE_TRACK => self.cue_positions.track = Some(value),
            elements::CUE_CLUSTER_POSITION => {
                self.cue_positions.cluster_position = Some(value);
            }
            _ => {
                if let Some(entry) = self.current_entry.as_mut() {
                    entry.set_uint(id, value);
                }
            }
        }
        Ok(())
    }

    fn float(&mut self, id: u32, value: f64) -> Result<()> {
        match id {
            elements::DURATION => self.duration_raw = Some(value),
            _ => {
                if let Some(entry) = self.current_entry.as_mut() {
                    entry.set_float(id, value);
                }
            }
        }
        Ok(())
    }

    fn string(&mut self, id: u32, value: String) -> Result<()> {
        match id {
            elements::DOC_TYPE => self.doc_type = Some(value),
            _ => {
                if let Some(entry) = self.current_entry.as_mut() {
                    entry.set_string(id, value);
                }
            }
        }
        Ok(())
    }

    fn begin_binary(&mut self, id: u32, size: u64) -> Result<BinaryDisposition> {
        match id {
            elements::SIMPLE_BLOCK => {
                self.block.begin(true);
                self.binary = BinaryState::Block;
                Ok(BinaryDisposition::Consume)
            }
            elements::BLOCK => {
                if self.group.is_none() {
                    warn!("Block outside a BlockGroup, skipped");
                    return Ok(BinaryDisposition::Skip);
                }
                self.block.begin(false);
                self.binary = BinaryState::Block;
                Ok(BinaryDisposition::Consume)
            }
            elements::SEEK_ID
            | elements::CODEC_PRIVATE
            | elements::CONTENT_COMP_SETTINGS
            | elements::CONTENT_ENC_KEY_ID
            | elements::DISCARD_PADDING
            | elements::BLOCK_ADDITIONAL => {
                if size > MAX_COLLECT_SIZE {
                    return Err(DemuxError::InvalidElementSize { id, size });
                }
                self.scratch.begin(size as usize);
                self.binary = BinaryState::Collect;
                Ok(BinaryDisposition::Consume)
            }
            _ => Ok(BinaryDisposition::Skip),
        }
    }

    fn binary_data(
        &mut self,
        input: &mut dyn StreamInput,
        id: u32,
        remaining: &mut u64,
    ) -> Result<Progress> {
        match self.binary {
            BinaryState::Collect => {
                let before = input.position();
                let progress = self.scratch.fill(input)?;
                *remaining -= input.position() - before;
                if progress == Progress::Pending {
                    return Ok(Progress::Pending);
                }
                let data = self.scratch.data().to_vec();
                self.scratch.finish();
                self.binary = BinaryState::Idle;
                self.finish_collect(id, data)?;
                Ok(Progress::Done)
            }
            BinaryState::Block => {
                let progress = self.block_data(input, remaining)?;
                if progress == Progress::Done {
                    self.binary = BinaryState::Idle;
                }
                Ok(progress)
            }
            BinaryState::Idle => Err(DemuxError::InvalidBlock(
                "binary content without an open element".into(),
            )),
        }
    }
}
