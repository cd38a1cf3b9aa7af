//! Track entries: codec lookup, codec-private resolution, and the
//! per-track state the demuxer carries while extracting samples.

use std::collections::HashMap;

use tracing::warn;

use crate::error::{DemuxError, Result};
use crate::output::{
    AudioFormat, CipherMode, ColorInfo, CryptoData, Format, PcmEncoding, TrackOutput, TrackType,
    VideoFormat,
};
use crate::sample::TrueHdChunker;
use crate::{elements, elements::codec_ids};

/// Codecs this demuxer can emit. Anything outside this set is dropped at
/// track-entry time with a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecKind {
    /// VP8 video.
    Vp8,
    /// VP9 video.
    Vp9,
    /// AV1 video.
    Av1,
    /// H.264/AVC video (avcC codec private).
    H264,
    /// H.265/HEVC video (hvcC codec private).
    H265,
    /// MPEG-2 video.
    Mpeg2,
    /// Theora video.
    Theora,
    /// Opus audio.
    Opus,
    /// Vorbis audio.
    Vorbis,
    /// FLAC audio.
    Flac,
    /// AAC audio (AudioSpecificConfig codec private).
    Aac,
    /// MPEG layer 3 audio.
    Mp3,
    /// MPEG layer 2 audio.
    Mp2,
    /// AC-3 audio.
    Ac3,
    /// E-AC-3 audio.
    Eac3,
    /// Dolby TrueHD / MLP audio. Format resolution is deferred until the
    /// sync code is seen in sample data.
    TrueHd,
    /// DTS audio (including Express and Lossless variants).
    Dts,
    /// Uncompressed PCM audio.
    Pcm,
    /// SubRip text subtitles.
    SubRip,
    /// ASS text subtitles.
    Ass,
    /// WebVTT text subtitles.
    WebVtt,
    /// VobSub bitmap subtitles.
    VobSub,
    /// HDMV PGS bitmap subtitles.
    Pgs,
    /// DVB bitmap subtitles.
    Dvb,
}

/// Table mapping Matroska codec ID strings to [`CodecKind`].
///
/// The default table covers the built-in codec set; additional IDs can be
/// registered to route vendor variants onto an existing kind.
pub struct CodecRegistry {
    entries: HashMap<&'static str, CodecKind>,
}

impl Default for CodecRegistry {
    fn default() -> Self {
        let mut entries = HashMap::new();
        entries.insert(codec_ids::V_VP8, CodecKind::Vp8);
        entries.insert(codec_ids::V_VP9, CodecKind::Vp9);
        entries.insert(codec_ids::V_AV1, CodecKind::Av1);
        entries.insert(codec_ids::V_MPEG4_ISO_AVC, CodecKind::H264);
        entries.insert(codec_ids::V_MPEGH_ISO_HEVC, CodecKind::H265);
        entries.insert(codec_ids::V_MPEG2, CodecKind::Mpeg2);
        entries.insert(codec_ids::V_THEORA, CodecKind::Theora);
        entries.insert(codec_ids::A_OPUS, CodecKind::Opus);
        entries.insert(codec_ids::A_VORBIS, CodecKind::Vorbis);
        entries.insert(codec_ids::A_FLAC, CodecKind::Flac);
        entries.insert(codec_ids::A_MPEG_L3, CodecKind::Mp3);
        entries.insert(codec_ids::A_MPEG_L2, CodecKind::Mp2);
        entries.insert(codec_ids::A_AC3, CodecKind::Ac3);
        entries.insert(codec_ids::A_EAC3, CodecKind::Eac3);
        entries.insert(codec_ids::A_TRUEHD, CodecKind::TrueHd);
        entries.insert(codec_ids::A_DTS, CodecKind::Dts);
        entries.insert(codec_ids::A_DTS_EXPRESS, CodecKind::Dts);
        entries.insert(codec_ids::A_DTS_LOSSLESS, CodecKind::Dts);
        entries.insert(codec_ids::A_PCM_INT_LIT, CodecKind::Pcm);
        entries.insert(codec_ids::A_PCM_INT_BIG, CodecKind::Pcm);
        entries.insert(codec_ids::A_PCM_FLOAT_IEEE, CodecKind::Pcm);
        entries.insert(codec_ids::S_TEXT_UTF8, CodecKind::SubRip);
        entries.insert(codec_ids::S_TEXT_ASS, CodecKind::Ass);
        entries.insert(codec_ids::S_TEXT_WEBVTT, CodecKind::WebVtt);
        entries.insert(codec_ids::S_VOBSUB, CodecKind::VobSub);
        entries.insert(codec_ids::S_HDMV_PGS, CodecKind::Pgs);
        entries.insert(codec_ids::S_DVBSUB, CodecKind::Dvb);
        Self { entries }
    }
}

impl CodecRegistry {
    /// Route an additional codec ID onto an existing kind.
    pub fn register(&mut self, codec_id: &'static str, kind: CodecKind) {
        self.entries.insert(codec_id, kind);
    }

    /// Look up a codec ID. AAC profile suffixes (`A_AAC/MPEG4/LC` and
    /// friends) all resolve to the AAC kind.
    pub fn lookup(&self, codec_id: &str) -> Option<CodecKind> {
        if let Some(&kind) = self.entries.get(codec_id) {
            return Some(kind);
        }
        if codec_id.starts_with(codec_ids::A_AAC) {
            return Some(CodecKind::Aac);
        }
        None
    }
}

/// Whether a track's format has been delivered or still awaits in-band
/// analysis of sample data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatState {
    /// Sample data must be inspected before the format can be emitted.
    Pending,
    /// The format is final (delivered or ready to deliver).
    Resolved,
}

/// A fully accepted track and its extraction state.
pub struct Track {
    /// Track number used by block headers.
    pub number: u64,
    /// High-level track kind.
    pub track_type: TrackType,
    /// Resolved codec.
    pub codec: CodecKind,
    /// The format to hand to the sink.
    pub format: Format,
    /// Bytes to prepend to every sample (header-stripping compression).
    pub stripped_bytes: Vec<u8>,
    /// NAL length-field size for length-prefixed H.264/H.265 streams.
    pub nal_length_size: Option<usize>,
    /// Whether the format still awaits deferred analysis.
    pub format_state: FormatState,
    /// 16-sample regrouping state for TrueHD.
    pub rechunker: Option<TrueHdChunker>,
    /// Consumer sink for this track.
    pub sink: Box<dyn TrackOutput>,
    format_sent: bool,
}

impl Track {
    /// Deliver the format to the sink if it is resolved and not yet sent.
    pub fn deliver_format(&mut self) {
        if self.format_state == FormatState::Resolved && !self.format_sent {
            self.sink.format(&self.format);
            self.format_sent = true;
        }
    }

    /// Mark a deferred format as resolved (after in-band analysis) and
    /// deliver it.
    pub fn resolve_format(&mut self) {
        self.format_state = FormatState::Resolved;
        self.deliver_format();
    }

    /// Default sample duration in microseconds, when declared.
    pub fn default_duration_us(&self) -> Option<i64> {
        self.format.default_duration_ns.map(|ns| (ns / 1000) as i64)
    }
}

#[derive(Debug, Default)]
struct VideoFields {
    pixel_width: Option<u64>,
    pixel_height: Option<u64>,
    display_width: Option<u64>,
    display_height: Option<u64>,
    pose_roll: Option<f64>,
    primaries: Option<u64>,
    transfer: Option<u64>,
    range: Option<u64>,
    bits_per_channel: Option<u64>,
    max_cll: Option<u64>,
    max_fall: Option<u64>,
    has_colour: bool,
}

#[derive(Debug, Default)]
struct AudioFields {
    sampling_frequency: Option<f64>,
    channels: Option<u64>,
    bit_depth: Option<u64>,
}

#[derive(Debug, Default)]
struct EncodingFields {
    scope: Option<u64>,
    comp_algo: Option<u64>,
    comp_settings: Vec<u8>,
    enc_algo: Option<u64>,
    key_id: Vec<u8>,
    cipher_mode: Option<u64>,
}

/// Accumulates one TrackEntry's elements and finalizes them into a
/// [`Track`] (or drops the entry) when the entry closes.
#[derive(Debug, Default)]
pub struct TrackEntryBuilder {
    number: Option<u64>,
    track_type: Option<u64>,
    codec_id: Option<String>,
    codec_private: Vec<u8>,
    default_duration_ns: Option<u64>,
    language: Option<String>,
    name: Option<String>,
    is_default: bool,
    seen_flag_default: bool,
    codec_delay_ns: u64,
    seek_pre_roll_ns: u64,
    video: VideoFields,
    audio: AudioFields,
    encoding: EncodingFields,
}

impl TrackEntryBuilder {
    /// Record an unsigned-integer child of the entry (or of its Video,
    /// Audio, Colour, or ContentEncoding descendants).
    pub fn set_uint(&mut self, id: u32, value: u64) {
        match id {
            elements::TRACK_NUMBER => self.number = Some(value),
            elements::TRACK_TYPE => self.track_type = Some(value),
            elements::FLAG_DEFAULT => {
                self.is_default = value != 0;
                self.seen_flag_default = true;
            }
            elements::DEFAULT_DURATION => self.default_duration_ns = Some(value),
            elements::CODEC_DELAY => self.codec_delay_ns = value,
            elements::SEEK_PRE_ROLL => self.seek_pre_roll_ns = value,
            elements::PIXEL_WIDTH => self.video.pixel_width = Some(value),
            elements::PIXEL_HEIGHT => self.video.pixel_height = Some(value),
            elements::DISPLAY_WIDTH => self.video.display_width = Some(value),
            elements::DISPLAY_HEIGHT => self.video.display_height = Some(value),
            elements::PRIMARIES => self.video.primaries = Some(value),
            elements::TRANSFER_CHARACTERISTICS => self.video.transfer = Some(value),
            elements::RANGE => self.video.range = Some(value),
            elements::BITS_PER_CHANNEL => self.video.bits_per_channel = Some(value),
            elements::MAX_CLL => self.video.max_cll = Some(value),
            elements::MAX_FALL => self.video.max_fall = Some(value),
            elements::CHANNELS => self.audio.channels = Some(value),
            elements::BIT_DEPTH => self.audio.bit_depth = Some(value),
            elements::CONTENT_ENCODING_SCOPE => self.encoding.scope = Some(value),
            elements::CONTENT_COMP_ALGO => self.encoding.comp_algo = Some(value),
            elements::CONTENT_ENC_ALGO => self.encoding.enc_algo = Some(value),
            elements::AES_SETTINGS_CIPHER_MODE => self.encoding.cipher_mode = Some(value),
            _ => {}
        }
    }

    /// Record a float child of the entry.
    pub fn set_float(&mut self, id: u32, value: f64) {
        match id {
            elements::SAMPLING_FREQUENCY => self.audio.sampling_frequency = Some(value),
            elements::PROJECTION_POSE_ROLL => self.video.pose_roll = Some(value),
            _ => {}
        }
    }

    /// Record a string child of the entry.
    pub fn set_string(&mut self, id: u32, value: String) {
        match id {
            elements::CODEC_ID => self.codec_id = Some(value),
            elements::LANGUAGE => self.language = Some(value),
            elements::NAME => self.name = Some(value),
            _ => {}
        }
    }

    /// Record a binary child of the entry.
    pub fn set_binary(&mut self, id: u32, data: Vec<u8>) {
        match id {
            elements::CODEC_PRIVATE => self.codec_private = data,
            elements::CONTENT_COMP_SETTINGS => self.encoding.comp_settings = data,
            elements::CONTENT_ENC_KEY_ID => self.encoding.key_id = data,
            _ => {}
        }
    }

    /// Note that the Colour master was present, so a [`ColorInfo`] should
    /// be emitted even if all its children used defaults.
    pub fn mark_colour(&mut self) {
        self.video.has_colour = true;
    }

    /// Finalize the entry into a track, requesting a sink from `new_sink`.
    ///
    /// Returns `Ok(None)` when the track is recognized as one to drop
    /// (unknown type, unsupported codec, unusable parameters). Structural
    /// problems in the entry itself are errors.
    pub fn finish(
        self,
        registry: &CodecRegistry,
        new_sink: &mut dyn FnMut(u64, TrackType) -> Box<dyn TrackOutput>,
    ) -> Result<Option<Track>> {
        let number = self.number.ok_or(DemuxError::MissingElement("TrackNumber"))?;
        let codec_id = self.codec_id.clone().ok_or(DemuxError::MissingElement("CodecID"))?;
        let raw_type = self.track_type.ok_or(DemuxError::MissingElement("TrackType"))?;

        let track_type = match raw_type {
            elements::TRACK_TYPE_VIDEO => TrackType::Video,
            elements::TRACK_TYPE_AUDIO => TrackType::Audio,
            elements::TRACK_TYPE_SUBTITLE => TrackType::Text,
            _ => TrackType::Unknown,
        };
        if track_type == TrackType::Unknown {
            warn!(track = number, track_type = raw_type, "dropping track of unhandled type");
            return Ok(None);
        }

        let Some(codec) = registry.lookup(&codec_id) else {
            warn!(track = number, codec = %codec_id, "dropping track with unsupported codec");
            return Ok(None);
        };

        let crypto = match self.resolve_encoding(number)? {
            EncodingOutcome::Keep(crypto) => crypto,
            EncodingOutcome::Drop => return Ok(None),
        };

        let codec_private = self.codec_private;
        let mut nal_length_size = None;
        let mut audio_format = None;
        let mut video_format = None;

        match track_type {
            TrackType::Video => {
                let (Some(width), Some(height)) =
                    (self.video.pixel_width, self.video.pixel_height)
                else {
                    warn!(track = number, "dropping video track without pixel dimensions");
                    return Ok(None);
                };
                video_format = Some(VideoFormat {
                    width: width as u32,
                    height: height as u32,
                    display_width: self.video.display_width.map(|w| w as u32),
                    display_height: self.video.display_height.map(|h| h as u32),
                    rotation_degrees: rotation_from_pose_roll(self.video.pose_roll),
                    color: if self.video.has_colour {
                        Some(ColorInfo {
                            primaries: self.video.primaries,
                            transfer: self.video.transfer,
                            full_range: self.video.range.map(|r| r == 2),
                            bits_per_channel: self.video.bits_per_channel.filter(|&b| b != 0),
                            max_cll: self.video.max_cll,
                            max_fall: self.video.max_fall,
                        })
                    } else {
                        None
                    },
                });
            }
            TrackType::Audio => {
                let mut sample_rate = self.audio.sampling_frequency.unwrap_or(8000.0);
                let mut channels = self.audio.channels.unwrap_or(1) as u32;
                let mut pcm_encoding = None;
                match codec {
                    CodecKind::Aac if !codec_private.is_empty() => {
                        let config = parse_aac_config(&codec_private).ok_or_else(|| {
                            DemuxError::InvalidCodecPrivate {
                                codec_id: codec_id.clone(),
                            }
                        })?;
                        if config.sample_rate > 0 {
                            sample_rate = config.sample_rate as f64;
                        }
                        if config.channels > 0 {
                            channels = config.channels;
                        }
                    }
                    CodecKind::Pcm => {
                        let depth = self.audio.bit_depth.unwrap_or(0);
                        if matches!(depth, 8 | 16 | 24 | 32) {
                            pcm_encoding = Some(match codec_id.as_str() {
                                codec_ids::A_PCM_INT_BIG => PcmEncoding::IntBig,
                                codec_ids::A_PCM_FLOAT_IEEE => PcmEncoding::Float,
                                _ => PcmEncoding::IntLittle,
                            });
                        } else {
                            // The track survives without a usable encoding;
                            // downstream sees raw bytes it cannot decode.
                            warn!(
                                track = number,
                                bit_depth = depth,
                                "unsupported PCM bit depth, track degraded"
                            );
                        }
                    }
                    _ => {}
                }
                audio_format = Some(AudioFormat {
                    sample_rate,
                    channels,
                    bit_depth: self.audio.bit_depth.map(|b| b as u32),
                    pcm_encoding,
                });
            }
            TrackType::Text | TrackType::Unknown => {}
        }

        match codec {
            CodecKind::H264 if !codec_private.is_empty() => {
                nal_length_size = Some(parse_avc_nal_length(&codec_private).ok_or_else(
                    || DemuxError::InvalidCodecPrivate {
                        codec_id: codec_id.clone(),
                    },
                )?);
            }
            CodecKind::H265 if !codec_private.is_empty() => {
                nal_length_size = Some(parse_hevc_nal_length(&codec_private).ok_or_else(
                    || DemuxError::InvalidCodecPrivate {
                        codec_id: codec_id.clone(),
                    },
                )?);
            }
            CodecKind::Vorbis if !codec_private.is_empty() => {
                if parse_xiph_private(&codec_private).is_none() {
                    return Err(DemuxError::InvalidCodecPrivate { codec_id });
                }
            }
            _ => {}
        }

        let deferred = codec == CodecKind::TrueHd;
        let format = Format {
            codec_id,
            codec_private,
            language: self.language,
            name: self.name,
            is_default: self.is_default || !self.seen_flag_default,
            codec_delay_ns: self.codec_delay_ns,
            seek_pre_roll_ns: self.seek_pre_roll_ns,
            default_duration_ns: self.default_duration_ns,
            video: video_format,
            audio: audio_format,
            crypto: crypto.clone(),
        };

        let sink = new_sink(number, track_type);
        Ok(Some(Track {
            number,
            track_type,
            codec,
            format,
            stripped_bytes: self.encoding.comp_settings,
            nal_length_size,
            format_state: if deferred {
                FormatState::Pending
            } else {
                FormatState::Resolved
            },
            rechunker: if deferred {
                Some(TrueHdChunker::default())
            } else {
                None
            },
            sink,
            format_sent: false,
        }))
    }

    fn resolve_encoding(&self, number: u64) -> Result<EncodingOutcome> {
        let enc = &self.encoding;
        if enc.comp_algo.is_none() && enc.enc_algo.is_none() {
            return Ok(EncodingOutcome::Keep(None));
        }
        if let Some(algo) = enc.comp_algo {
            // 3 = header stripping. Real decompression schemes are not
            // supported here.
            if algo != 3 {
                warn!(
                    track = number,
                    algo, "dropping track with unsupported compression algorithm"
                );
                return Ok(EncodingOutcome::Drop);
            }
            if enc.comp_settings.is_empty() {
                return Err(DemuxError::InvalidContentEncoding(
                    "header stripping without stripped bytes".into(),
                ));
            }
            return Ok(EncodingOutcome::Keep(None));
        }
        let algo = enc.enc_algo.unwrap_or(0);
        if algo != 5 {
            warn!(
                track = number,
                algo, "dropping track with unsupported encryption algorithm"
            );
            return Ok(EncodingOutcome::Drop);
        }
        match enc.cipher_mode {
            Some(elements::AES_CIPHER_MODE_CTR) | None => {}
            Some(mode) => {
                return Err(DemuxError::InvalidContentEncoding(format!(
                    "unsupported AES cipher mode {mode}"
                )));
            }
        }
        if enc.key_id.is_empty() {
            return Err(DemuxError::InvalidContentEncoding(
                "encrypted track without key ID".into(),
            ));
        }
        Ok(EncodingOutcome::Keep(Some(CryptoData {
            mode: CipherMode::AesCtr,
            key_id: enc.key_id.clone(),
        })))
    }
}

enum EncodingOutcome {
    Keep(Option<CryptoData>),
    Drop,
}

/// Map a projection pose roll (degrees, possibly negative) onto a
/// counter-clockwise rotation. Only right angles are honored.
fn rotation_from_pose_roll(roll: Option<f64>) -> u32 {
    let Some(roll) = roll else { return 0 };
    let normalized = (roll.round() as i64).rem_euclid(360);
    match normalized {
        0 | 90 | 180 | 270 => normalized as u32,
        _ => {
            warn!(roll, "ignoring non-right-angle projection pose roll");
            0
        }
    }
}

/// NAL length-field size from an avcC box: low two bits of byte 4, plus 1.
fn parse_avc_nal_length(private: &[u8]) -> Option<usize> {
    if private.len() < 5 || private[0] != 1 {
        return None;
    }
    Some((private[4] & 0x03) as usize + 1)
}

/// NAL length-field size from an hvcC box: low two bits of byte 21, plus 1.
fn parse_hevc_nal_length(private: &[u8]) -> Option<usize> {
    if private.len() < 23 {
        return None;
    }
    Some((private[21] & 0x03) as usize + 1)
}

/// Xiph-style codec private: packet count byte, then 0xFF-continued sizes
/// for all but the last packet. Returns the packet boundaries.
pub fn parse_xiph_private(private: &[u8]) -> Option<Vec<(usize, usize)>> {
    let (&count_minus_one, rest) = private.split_first()?;
    let count = count_minus_one as usize + 1;
    let mut pos = 0usize;
    let mut sizes = Vec::with_capacity(count);
    for _ in 0..count - 1 {
        let mut size = 0usize;
        loop {
            let &byte = rest.get(pos)?;
            pos += 1;
            size += byte as usize;
            if byte != 0xFF {
                break;
            }
        }
        sizes.push(size);
    }
    let data_start = pos;
    let data_len = rest.len() - data_start;
    let declared: usize = sizes.iter().sum();
    if declared > data_len {
        return None;
    }
    sizes.push(data_len - declared);

    let mut packets = Vec::with_capacity(count);
    let mut offset = data_start + 1; // relative to `private`
    for size in sizes {
        packets.push((offset, size));
        offset += size;
    }
    Some(packets)
}

struct AacConfig {
    sample_rate: u32,
    channels: u32,
}

const AAC_SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// Decode sample rate and channel count from an AudioSpecificConfig.
fn parse_aac_config(private: &[u8]) -> Option<AacConfig> {
    let mut bits = BitCursor::new(private);
    let object_type = bits.take(5)?;
    if object_type == 31 {
        bits.take(6)?;
    }
    let freq_index = bits.take(4)?;
    let sample_rate = if freq_index == 15 {
        bits.take(24)?
    } else {
        *AAC_SAMPLE_RATES.get(freq_index as usize)?
    };
    let channel_config = bits.take(4)?;
    let channels = match channel_config {
        0 => 0, // keep the declared channel count
        7 => 8,
        n => n,
    };
    Some(AacConfig {
        sample_rate,
        channels,
    })
}

struct BitCursor<'a> {
    data: &'a [u8],
    bit: usize,
}

impl<'a> BitCursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, bit: 0 }
    }

    fn take(&mut self, count: usize) -> Option<u32> {
        let mut value = 0u32;
        for _ in 0..count {
            let byte = *self.data.get(self.bit / 8)?;
            let bit = (byte >> (7 - self.bit % 8)) & 1;
            value = (value << 1) | bit as u32;
            self.bit += 1;
        }
        Some(value)
    }
}
