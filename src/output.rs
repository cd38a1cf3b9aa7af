//! Consumer-facing output traits and track format descriptions.
//!
//! The demuxer pushes everything it extracts through these traits: one
//! [`TrackOutput`] sink per accepted track and a single [`DemuxerOutput`]
//! factory that hands those sinks out and receives file-level results such
//! as the seek map.

use bitflags::bitflags;

use crate::index::SeekMap;

/// High-level kind of a media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackType {
    /// Video track.
    Video,
    /// Audio track.
    Audio,
    /// Subtitle/text track.
    Text,
    /// A track type this demuxer does not handle.
    Unknown,
}

bitflags! {
    /// Per-sample flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SampleFlags: u32 {
        /// Sample is a random-access point.
        const KEYFRAME = 0x01;
        /// Sample payload is encrypted.
        const ENCRYPTED = 0x02;
        /// Sample should be decoded but not presented.
        const DECODE_ONLY = 0x04;
    }
}

/// What role a run of bytes plays within the current sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplePart {
    /// Ordinary media payload bytes.
    Payload,
    /// Encryption framing bytes (signal byte, IV, partition table) that a
    /// decryptor consumes but a decoder must never see.
    EncryptionHeader,
    /// Side data attached to the sample (BlockAdditional payloads).
    Supplemental,
}

/// Static encryption parameters declared on a track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoData {
    /// AES cipher mode from the track's ContentEncAESSettings.
    pub mode: CipherMode,
    /// Key identifier the consumer uses to look up the content key.
    pub key_id: Vec<u8>,
}

/// Supported block cipher modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherMode {
    /// AES counter mode.
    AesCtr,
}

/// A clear/encrypted byte-count pair inside a partitioned sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubsampleEntry {
    /// Number of clear bytes.
    pub clear: u32,
    /// Number of encrypted bytes.
    pub encrypted: u32,
}

/// Per-sample decryption parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoInfo {
    /// Key identifier for this sample.
    pub key_id: Vec<u8>,
    /// Initialization vector, zero-padded to 16 bytes.
    pub iv: [u8; 16],
    /// Subsample map for partitioned samples; empty means the whole
    /// payload is encrypted.
    pub subsamples: Vec<SubsampleEntry>,
}

/// Integer PCM sample encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcmEncoding {
    /// Signed little-endian integer.
    IntLittle,
    /// Signed big-endian integer.
    IntBig,
    /// IEEE floating point.
    Float,
}

/// Resolved video track parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFormat {
    /// Coded frame width in pixels.
    pub width: u32,
    /// Coded frame height in pixels.
    pub height: u32,
    /// Display width in pixels, when it differs from the coded width.
    pub display_width: Option<u32>,
    /// Display height in pixels, when it differs from the coded height.
    pub display_height: Option<u32>,
    /// Rotation derived from the projection pose roll, in degrees
    /// counter-clockwise (0, 90, 180, or 270).
    pub rotation_degrees: u32,
    /// Colour description, when the file declares one.
    pub color: Option<ColorInfo>,
}

/// Colour description for a video track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorInfo {
    /// Colour primaries code (Matroska Primaries values).
    pub primaries: Option<u64>,
    /// Transfer characteristics code.
    pub transfer: Option<u64>,
    /// Full-range flag (Range element value 2 means full).
    pub full_range: Option<bool>,
    /// Bits per channel, when nonzero in the file.
    pub bits_per_channel: Option<u64>,
    /// Maximum content light level in nits.
    pub max_cll: Option<u64>,
    /// Maximum frame-average light level in nits.
    pub max_fall: Option<u64>,
}

/// Resolved audio track parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFormat {
    /// Samples per second.
    pub sample_rate: f64,
    /// Channel count.
    pub channels: u32,
    /// Bits per sample, when declared.
    pub bit_depth: Option<u32>,
    /// PCM encoding for uncompressed tracks.
    pub pcm_encoding: Option<PcmEncoding>,
}

/// A track's resolved format, delivered once before its first sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Format {
    /// Codec identifier as it appears in the file (e.g. `V_VP9`).
    pub codec_id: String,
    /// Codec initialization data, transformed where the codec requires it.
    pub codec_private: Vec<u8>,
    /// ISO 639-2 language code.
    pub language: Option<String>,
    /// Human-readable track name.
    pub name: Option<String>,
    /// Whether the track is flagged as default for its type.
    pub is_default: bool,
    /// Codec delay in nanoseconds.
    pub codec_delay_ns: u64,
    /// Seek pre-roll in nanoseconds.
    pub seek_pre_roll_ns: u64,
    /// Default sample duration in nanoseconds, when declared.
    pub default_duration_ns: Option<u64>,
    /// Video parameters, for video tracks.
    pub video: Option<VideoFormat>,
    /// Audio parameters, for audio tracks.
    pub audio: Option<AudioFormat>,
    /// Static encryption parameters, for encrypted tracks.
    pub crypto: Option<CryptoData>,
}

/// Per-track sink for formats, sample bytes, and sample metadata.
///
/// Sample bytes stream in via `sample_data` in parse order; when the sample
/// is complete, `sample_metadata` closes it with timing and flags. The byte
/// counts passed to `sample_metadata` cover only `Payload` parts.
pub trait TrackOutput {
    /// Deliver the track's resolved format. Called once, before any sample,
    /// except for deferred-analysis codecs where it may follow the samples
    /// that resolved it.
    fn format(&mut self, format: &Format);

    /// Deliver a run of sample bytes.
    fn sample_data(&mut self, data: &[u8], part: SamplePart);

    /// Close the current sample. `offset` is the absolute stream position
    /// where the sample's bytes began.
    fn sample_metadata(
        &mut self,
        time_us: i64,
        flags: SampleFlags,
        size: usize,
        offset: u64,
        crypto: Option<&CryptoInfo>,
    );
}

/// File-level output factory and sink.
pub trait DemuxerOutput {
    /// Create the sink for an accepted track. The demuxer calls this once
    /// per track it can handle, in file order.
    fn track(&mut self, number: u64, track_type: TrackType) -> Box<dyn TrackOutput>;

    /// Deliver the seek map. Called exactly once per parse, as early as the
    /// file layout allows.
    fn seek_map(&mut self, seek_map: SeekMap);

    /// All track formats that can be known up front have been delivered.
    fn end_tracks(&mut self);
}
