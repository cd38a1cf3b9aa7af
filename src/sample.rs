//! Sample writer: streams frame bytes from the input to a track's sink,
//! applying the codec-specific transforms the container requires.
//!
//! Transforms, in the order they apply to a frame: encryption framing
//! (signal byte, IV, partition table), header-stripping restore, NAL
//! length-prefix to start-code rewrite, subtitle timecode framing, and the
//! Vorbis trailing marker. TrueHD frames additionally route their metadata
//! through [`TrueHdChunker`] so container-split frames recombine.

use tracing::warn;

use crate::error::{DemuxError, Result};
use crate::input::{Progress, ReadStatus, StreamInput};
use crate::output::{CryptoInfo, SampleFlags, SamplePart, SubsampleEntry};
use crate::track::{CodecKind, Track};

/// Annex-B start code emitted in place of each NAL length prefix.
const NAL_START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// Trailer appended to every Vorbis sample. The value is a sentinel: the
/// Ogg page sample count it replaces has no meaning in this container.
const VORBIS_TRAILER: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];

/// Signal-byte bit: the frame payload is encrypted.
const SIGNAL_ENCRYPTED: u8 = 0x01;
/// Signal-byte bit: the encrypted frame is partitioned into subsamples.
const SIGNAL_PARTITIONED: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    CryptoSignal,
    CryptoIv,
    CryptoPartitionCount,
    CryptoPartitions { count: usize },
    Content,
    NalPrefix,
    NalBody { remaining: u64 },
    Text,
}

#[derive(Debug)]
struct CryptoBuild {
    encrypted: bool,
    partitioned: bool,
    iv: [u8; 16],
}

/// How a completed frame should be closed out.
#[derive(Debug)]
pub enum FrameEnd {
    /// Commit metadata now. `size` counts payload bytes delivered.
    Emit {
        /// Payload bytes delivered for this frame.
        size: usize,
        /// Decryption parameters, when the frame was encrypted.
        crypto: Option<CryptoInfo>,
    },
    /// A text frame was buffered; assemble it once its duration is known.
    Text(Vec<u8>),
}

/// Streams one frame at a time from the input to a track sink.
///
/// One writer instance is reused across frames; [`SampleWriter::begin_frame`]
/// arms it for the next frame and [`SampleWriter::end_frame`] closes the
/// current one.
#[derive(Debug, Default)]
pub struct SampleWriter {
    phase: Option<Phase>,
    scratch: Vec<u8>,
    scratch_target: usize,
    partitions: Vec<u32>,
    crypto: Option<CryptoBuild>,
    stripped_pending: bool,
    payload_written: usize,
    text_buf: Vec<u8>,
}

impl SampleWriter {
    /// Arm the writer for the next frame of `track`.
    pub fn begin_frame(&mut self, track: &Track) {
        self.scratch.clear();
        self.scratch_target = 0;
        self.partitions.clear();
        self.crypto = None;
        self.stripped_pending = false;
        self.payload_written = 0;
        self.text_buf.clear();
        self.phase = Some(if track.format.crypto.is_some() {
            Phase::CryptoSignal
        } else {
            self.content_phase(track, false)
        });
    }

    /// Whether a frame is in progress.
    pub fn in_progress(&self) -> bool {
        self.phase.is_some()
    }

    /// Discard any partially written frame. Used after an external seek.
    pub fn reset(&mut self) {
        self.phase = None;
        self.scratch.clear();
        self.partitions.clear();
        self.crypto = None;
        self.text_buf.clear();
    }

    fn content_phase(&mut self, track: &Track, encrypted: bool) -> Phase {
        if matches!(
            track.codec,
            CodecKind::SubRip | CodecKind::Ass | CodecKind::WebVtt
        ) {
            return Phase::Text;
        }
        // Encrypted payloads are opaque; transforms apply to clear frames
        // only.
        if encrypted {
            return Phase::Content;
        }
        self.stripped_pending = !track.stripped_bytes.is_empty();
        if track.nal_length_size.is_some() {
            Phase::NalPrefix
        } else {
            Phase::Content
        }
    }

    /// Pump frame bytes until the frame completes or the input starves.
    /// `frame_remaining` is the unread byte count of the current frame
    /// within the enclosing block element.
    pub fn write(
        &mut self,
        input: &mut dyn StreamInput,
        frame_remaining: &mut u64,
        track: &mut Track,
    ) -> Result<Progress> {
        loop {
            let phase = self
                .phase
                .expect("write called without begin_frame");
            match phase {
                Phase::CryptoSignal => {
                    match self.collect(input, frame_remaining, 1)? {
                        Progress::Pending => return Ok(Progress::Pending),
                        Progress::Done => {}
                    }
                    let signal = self.scratch[0];
                    track.sink.sample_data(&[signal], SamplePart::EncryptionHeader);
                    self.take_scratch();
                    let encrypted = signal & SIGNAL_ENCRYPTED != 0;
                    let partitioned = signal & SIGNAL_PARTITIONED != 0;
                    self.crypto = Some(CryptoBuild {
                        encrypted,
                        partitioned,
                        iv: [0u8; 16],
                    });
                    self.phase = Some(if encrypted {
                        Phase::CryptoIv
                    } else {
                        self.content_phase(track, false)
                    });
                }

                Phase::CryptoIv => {
                    match self.collect(input, frame_remaining, 8)? {
                        Progress::Pending => return Ok(Progress::Pending),
                        Progress::Done => {}
                    }
                    track
                        .sink
                        .sample_data(&self.scratch, SamplePart::EncryptionHeader);
                    let partitioned = {
                        let crypto = self.crypto.as_mut().expect("signal byte precedes IV");
                        crypto.iv[..8].copy_from_slice(&self.scratch);
                        crypto.partitioned
                    };
                    self.take_scratch();
                    self.phase = Some(if partitioned {
                        Phase::CryptoPartitionCount
                    } else {
                        self.content_phase(track, true)
                    });
                }

                Phase::CryptoPartitionCount => {
                    match self.collect(input, frame_remaining, 1)? {
                        Progress::Pending => return Ok(Progress::Pending),
                        Progress::Done => {}
                    }
                    let count = self.scratch[0] as usize;
                    track
                        .sink
                        .sample_data(&self.scratch, SamplePart::EncryptionHeader);
                    self.take_scratch();
                    if count == 0 {
                        self.phase = Some(self.content_phase(track, true));
                    } else {
                        self.phase = Some(Phase::CryptoPartitions { count });
                    }
                }

                Phase::CryptoPartitions { count } => {
                    match self.collect(input, frame_remaining, count * 4)? {
                        Progress::Pending => return Ok(Progress::Pending),
                        Progress::Done => {}
                    }
                    track
                        .sink
                        .sample_data(&self.scratch, SamplePart::EncryptionHeader);
                    for chunk in self.scratch.chunks_exact(4) {
                        self.partitions
                            .push(u32::from_be_bytes(chunk.try_into().unwrap()));
                    }
                    self.take_scratch();
                    self.phase = Some(self.content_phase(track, true));
                }

                Phase::Content => {
                    self.flush_stripped(track);
                    if *frame_remaining == 0 {
                        return Ok(Progress::Done);
                    }
                    let mut buf = [0u8; 4096];
                    let want = (*frame_remaining as usize).min(buf.len());
                    match input.read(&mut buf[..want])? {
                        ReadStatus::Ready(n) => {
                            self.emit_payload(track, &buf[..n]);
                            *frame_remaining -= n as u64;
                        }
                        ReadStatus::NotReady => return Ok(Progress::Pending),
                        ReadStatus::Ended => {
                            return Err(DemuxError::UnexpectedEof {
                                offset: input.position(),
                            })
                        }
                    }
                }

                Phase::NalPrefix => {
                    self.flush_stripped(track);
                    if *frame_remaining == 0 && self.scratch.is_empty() {
                        return Ok(Progress::Done);
                    }
                    let prefix_len =
                        track.nal_length_size.expect("NAL phase requires a length size");
                    match self.collect(input, frame_remaining, prefix_len)? {
                        Progress::Pending => return Ok(Progress::Pending),
                        Progress::Done => {}
                    }
                    let mut nal_len = 0u64;
                    for &byte in &self.scratch {
                        nal_len = (nal_len << 8) | byte as u64;
                    }
                    self.take_scratch();
                    if nal_len > *frame_remaining {
                        return Err(DemuxError::InvalidBlock(
                            "NAL unit overruns its sample".into(),
                        ));
                    }
                    self.emit_payload(track, &NAL_START_CODE);
                    self.phase = Some(Phase::NalBody {
                        remaining: nal_len,
                    });
                }

                Phase::NalBody { remaining } => {
                    let mut nal_remaining = remaining;
                    while nal_remaining > 0 {
                        let mut buf = [0u8; 4096];
                        let want = (nal_remaining as usize).min(buf.len());
                        match input.read(&mut buf[..want])? {
                            ReadStatus::Ready(n) => {
                                self.emit_payload(track, &buf[..n]);
                                nal_remaining -= n as u64;
                                *frame_remaining -= n as u64;
                            }
                            ReadStatus::NotReady => {
                                self.phase = Some(Phase::NalBody {
                                    remaining: nal_remaining,
                                });
                                return Ok(Progress::Pending);
                            }
                            ReadStatus::Ended => {
                                return Err(DemuxError::UnexpectedEof {
                                    offset: input.position(),
                                })
                            }
                        }
                    }
                    self.phase = Some(Phase::NalPrefix);
                }

                Phase::Text => {
                    if *frame_remaining == 0 {
                        return Ok(Progress::Done);
                    }
                    let mut buf = [0u8; 1024];
                    let want = (*frame_remaining as usize).min(buf.len());
                    match input.read(&mut buf[..want])? {
                        ReadStatus::Ready(n) => {
                            self.text_buf.extend_from_slice(&buf[..n]);
                            *frame_remaining -= n as u64;
                        }
                        ReadStatus::NotReady => return Ok(Progress::Pending),
                        ReadStatus::Ended => {
                            return Err(DemuxError::UnexpectedEof {
                                offset: input.position(),
                            })
                        }
                    }
                }
            }
        }
    }

    /// Close the frame once [`SampleWriter::write`] returned `Done`.
    pub fn end_frame(&mut self, track: &mut Track) -> Result<FrameEnd> {
        let phase = self.phase.take().expect("end_frame without begin_frame");
        if phase == Phase::Text {
            return Ok(FrameEnd::Text(std::mem::take(&mut self.text_buf)));
        }

        if track.codec == CodecKind::Vorbis {
            track.sink.sample_data(&VORBIS_TRAILER, SamplePart::Payload);
            self.payload_written += VORBIS_TRAILER.len();
        }

        let crypto = match self.crypto.take() {
            Some(build) if build.encrypted => {
                let subsamples = if build.partitioned {
                    build_subsamples(&self.partitions, self.payload_written as u32)?
                } else {
                    Vec::new()
                };
                let key_id = track
                    .format
                    .crypto
                    .as_ref()
                    .map(|c| c.key_id.clone())
                    .unwrap_or_default();
                Some(CryptoInfo {
                    key_id,
                    iv: build.iv,
                    subsamples,
                })
            }
            _ => None,
        };
        Ok(FrameEnd::Emit {
            size: self.payload_written,
            crypto,
        })
    }

    fn flush_stripped(&mut self, track: &mut Track) {
        if self.stripped_pending {
            self.stripped_pending = false;
            let stripped = std::mem::take(&mut track.stripped_bytes);
            self.emit_payload(track, &stripped);
            track.stripped_bytes = stripped;
        }
    }

    fn emit_payload(&mut self, track: &mut Track, data: &[u8]) {
        if let Some(chunker) = track.rechunker.as_mut() {
            chunker.observe(data);
        }
        track.sink.sample_data(data, SamplePart::Payload);
        self.payload_written += data.len();
    }

    /// Accumulate exactly `target` bytes into the scratch buffer, charging
    /// them against the frame budget.
    fn collect(
        &mut self,
        input: &mut dyn StreamInput,
        frame_remaining: &mut u64,
        target: usize,
    ) -> Result<Progress> {
        if self.scratch_target == 0 {
            if target as u64 > *frame_remaining {
                return Err(DemuxError::InvalidBlock(
                    "frame too short for its framing header".into(),
                ));
            }
            self.scratch_target = target;
        }
        while self.scratch.len() < self.scratch_target {
            let mut buf = [0u8; 64];
            let want = (self.scratch_target - self.scratch.len()).min(buf.len());
            match input.read(&mut buf[..want])? {
                ReadStatus::Ready(n) => {
                    self.scratch.extend_from_slice(&buf[..n]);
                    *frame_remaining -= n as u64;
                }
                ReadStatus::NotReady => return Ok(Progress::Pending),
                ReadStatus::Ended => {
                    return Err(DemuxError::UnexpectedEof {
                        offset: input.position(),
                    })
                }
            }
        }
        Ok(Progress::Done)
    }

    fn take_scratch(&mut self) {
        self.scratch.clear();
        self.scratch_target = 0;
    }
}

/// Translate partition offsets into alternating clear/encrypted runs.
/// Partitions split the payload into `count + 1` sections, the first one
/// clear.
fn build_subsamples(partitions: &[u32], total: u32) -> Result<Vec<SubsampleEntry>> {
    let mut bounds = Vec::with_capacity(partitions.len() + 2);
    bounds.push(0u32);
    bounds.extend_from_slice(partitions);
    bounds.push(total);
    for pair in bounds.windows(2) {
        if pair[1] < pair[0] {
            return Err(DemuxError::InvalidBlock(
                "partition offsets out of order".into(),
            ));
        }
    }

    let mut entries = Vec::new();
    let mut i = 0;
    while i + 1 < bounds.len() {
        let clear = bounds[i + 1] - bounds[i];
        let encrypted = if i + 2 < bounds.len() {
            bounds[i + 2] - bounds[i + 1]
        } else {
            0
        };
        entries.push(SubsampleEntry { clear, encrypted });
        i += 2;
    }
    Ok(entries)
}

// =============================================================================
// Subtitle timecode framing
// =============================================================================

const SUBRIP_PREFIX: &[u8] = b"1\n00:00:00,000 --> 00:00:00,000\n";
const SUBRIP_END_OFFSET: usize = 19;

const ASS_PREFIX: &[u8] = b"Dialogue: 0,0:00:00.00,0:00:00.00,";
const ASS_END_OFFSET: usize = 23;

const WEBVTT_PREFIX: &[u8] = b"WEBVTT\n\n00:00:00.000 --> 00:00:00.000\n";
const WEBVTT_END_OFFSET: usize = 25;

/// Wrap a buffered text frame in its codec's timecode block. The start
/// time stays zero (the sink receives the absolute time separately); only
/// the end field is patched, and only when the duration is known.
pub fn assemble_text_sample(
    codec: CodecKind,
    payload: &[u8],
    duration_us: Option<i64>,
) -> Vec<u8> {
    let (prefix, end_offset) = match codec {
        CodecKind::SubRip => (SUBRIP_PREFIX, SUBRIP_END_OFFSET),
        CodecKind::Ass => (ASS_PREFIX, ASS_END_OFFSET),
        CodecKind::WebVtt => (WEBVTT_PREFIX, WEBVTT_END_OFFSET),
        _ => return payload.to_vec(),
    };
    let mut sample = Vec::with_capacity(prefix.len() + payload.len());
    sample.extend_from_slice(prefix);
    match duration_us {
        Some(duration) => {
            let end = match codec {
                CodecKind::SubRip => format_subrip_time(duration),
                CodecKind::Ass => format_ass_time(duration),
                _ => format_webvtt_time(duration),
            };
            sample[end_offset..end_offset + end.len()].copy_from_slice(&end);
        }
        None => {
            warn!("text sample without a block duration, end time left zero");
        }
    }
    sample.extend_from_slice(payload);
    sample
}

fn split_time(time_us: i64) -> (u64, u64, u64, u64) {
    let total_us = time_us.max(0) as u64;
    let hours = (total_us / 3_600_000_000).min(99);
    let minutes = total_us / 60_000_000 % 60;
    let seconds = total_us / 1_000_000 % 60;
    (hours, minutes, seconds, total_us % 1_000_000)
}

/// `HH:MM:SS,mmm`
fn format_subrip_time(time_us: i64) -> Vec<u8> {
    let (h, m, s, us) = split_time(time_us);
    format!("{h:02}:{m:02}:{s:02},{:03}", us / 1000).into_bytes()
}

/// `H:MM:SS.cc` (centiseconds)
fn format_ass_time(time_us: i64) -> Vec<u8> {
    let (h, m, s, us) = split_time(time_us);
    format!("{:01}:{m:02}:{s:02}.{:02}", h.min(9), us / 10_000).into_bytes()
}

/// `HH:MM:SS.mmm`
fn format_webvtt_time(time_us: i64) -> Vec<u8> {
    let (h, m, s, us) = split_time(time_us);
    format!("{h:02}:{m:02}:{s:02}.{:03}", us / 1000).into_bytes()
}

// =============================================================================
// TrueHD rechunking
// =============================================================================

/// MLP stream sub-variant, distinguished by the major sync code at bytes
/// 4..8 of the first frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MlpVariant {
    /// Dolby TrueHD (sync `0xF8726FBA`).
    TrueHd,
    /// Legacy MLP (sync `0xF8726FBB`).
    Mlp,
}

const TRUEHD_SYNC: u32 = 0xF872_6FBA;
const MLP_SYNC: u32 = 0xF872_6FBB;

/// Frames per emitted metadata group.
const TRUEHD_GROUP_FRAMES: u32 = 16;

/// Metadata for one regrouped run of TrueHD frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkedGroup {
    /// Presentation time of the group's first frame.
    pub time_us: i64,
    /// Flags of the group's first frame.
    pub flags: SampleFlags,
    /// Total payload bytes across the group.
    pub size: usize,
    /// Stream offset of the group's first frame.
    pub offset: u64,
}

/// Recombines TrueHD frames that the container split across blocks.
///
/// Sample bytes pass straight through to the sink; only the metadata
/// commit is deferred, one commit per [`TRUEHD_GROUP_FRAMES`] frames. The
/// first frame's header bytes also resolve the deferred format.
#[derive(Debug, Default)]
pub struct TrueHdChunker {
    header: Vec<u8>,
    frames: u32,
    group: Option<ChunkedGroup>,
}

impl TrueHdChunker {
    /// Accumulate the first frame's header bytes for variant sniffing.
    pub fn observe(&mut self, data: &[u8]) {
        if self.header.len() < 8 {
            let need = 8 - self.header.len();
            self.header.extend_from_slice(&data[..data.len().min(need)]);
        }
    }

    /// The stream sub-variant, once at least 8 header bytes were seen.
    pub fn variant(&self) -> Option<MlpVariant> {
        if self.header.len() < 8 {
            return None;
        }
        let sync = u32::from_be_bytes(self.header[4..8].try_into().unwrap());
        match sync {
            TRUEHD_SYNC => Some(MlpVariant::TrueHd),
            MLP_SYNC => Some(MlpVariant::Mlp),
            _ => None,
        }
    }

    /// Account one completed frame; returns a group to commit every
    /// [`TRUEHD_GROUP_FRAMES`] frames.
    pub fn frame_complete(
        &mut self,
        time_us: i64,
        flags: SampleFlags,
        size: usize,
        offset: u64,
    ) -> Option<ChunkedGroup> {
        let group = self.group.get_or_insert(ChunkedGroup {
            time_us,
            flags,
            size: 0,
            offset,
        });
        group.size += size;
        self.frames += 1;
        if self.frames == TRUEHD_GROUP_FRAMES {
            self.frames = 0;
            self.group.take()
        } else {
            None
        }
    }

    /// Commit whatever partial group remains, at end of stream.
    pub fn flush(&mut self) -> Option<ChunkedGroup> {
        self.frames = 0;
        self.group.take()
    }

    /// Discard any partial group. Used after an external seek.
    pub fn reset(&mut self) {
        self.frames = 0;
        self.group = None;
    }
}
