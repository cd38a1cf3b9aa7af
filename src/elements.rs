//! Matroska element definitions, the element-type classifier, and codec IDs.

// =============================================================================
// EBML Header Elements
// =============================================================================

/// EBML Header element.
pub const EBML: u32 = 0x1A45DFA3;
/// EBML Read Version.
pub const EBML_READ_VERSION: u32 = 0x42F7;
/// EBML Max ID Length.
pub const EBML_MAX_ID_LENGTH: u32 = 0x42F2;
/// EBML Max Size Length.
pub const EBML_MAX_SIZE_LENGTH: u32 = 0x42F3;
/// EBML Doc Type.
pub const DOC_TYPE: u32 = 0x4282;
/// EBML Doc Type Read Version.
pub const DOC_TYPE_READ_VERSION: u32 = 0x4285;

// =============================================================================
// Segment and Meta Seek
// =============================================================================

/// Segment (the root container for all Matroska data).
pub const SEGMENT: u32 = 0x18538067;
/// SeekHead (index of top-level elements).
pub const SEEK_HEAD: u32 = 0x114D9B74;
/// Seek entry.
pub const SEEK: u32 = 0x4DBB;
/// Seek ID.
pub const SEEK_ID: u32 = 0x53AB;
/// Seek Position.
pub const SEEK_POSITION: u32 = 0x53AC;

// =============================================================================
// Segment Information
// =============================================================================

/// Segment Info.
pub const INFO: u32 = 0x1549A966;
/// Timecode Scale (nanoseconds per timecode unit, default 1000000 = 1ms).
pub const TIMECODE_SCALE: u32 = 0x2AD7B1;
/// Duration (in timecode units).
pub const DURATION: u32 = 0x4489;

// =============================================================================
// Cluster Elements
// =============================================================================

/// Cluster (contains blocks of media data).
pub const CLUSTER: u32 = 0x1F43B675;
/// Cluster Timestamp.
pub const TIMESTAMP: u32 = 0xE7;
/// SimpleBlock (block with inline keyframe flag).
pub const SIMPLE_BLOCK: u32 = 0xA3;
/// BlockGroup (block plus sibling metadata).
pub const BLOCK_GROUP: u32 = 0xA0;
/// Block.
pub const BLOCK: u32 = 0xA1;
/// Block Duration.
pub const BLOCK_DURATION: u32 = 0x9B;
/// Reference Block (timestamp offset to a reference frame).
pub const REFERENCE_BLOCK: u32 = 0xFB;
/// Block Additions.
pub const BLOCK_ADDITIONS: u32 = 0x75A1;
/// Block More.
pub const BLOCK_MORE: u32 = 0xA6;
/// Block Add ID.
pub const BLOCK_ADD_ID: u32 = 0xEE;
/// Block Additional.
pub const BLOCK_ADDITIONAL: u32 = 0xA5;
/// Discard Padding.
pub const DISCARD_PADDING: u32 = 0x75A2;

// =============================================================================
// Track Elements
// =============================================================================

/// Tracks.
pub const TRACKS: u32 = 0x1654AE6B;
/// Track Entry.
pub const TRACK_ENTRY: u32 = 0xAE;
/// Track Number.
pub const TRACK_NUMBER: u32 = 0xD7;
/// Track Type.
pub const TRACK_TYPE: u32 = 0x83;
/// Flag Default.
pub const FLAG_DEFAULT: u32 = 0x88;
/// Flag Forced.
pub const FLAG_FORCED: u32 = 0x55AA;
/// Default Duration.
pub const DEFAULT_DURATION: u32 = 0x23E383;
/// Name.
pub const NAME: u32 = 0x536E;
/// Language.
pub const LANGUAGE: u32 = 0x22B59C;
/// Codec ID.
pub const CODEC_ID: u32 = 0x86;
/// Codec Private.
pub const CODEC_PRIVATE: u32 = 0x63A2;
/// Codec Delay.
pub const CODEC_DELAY: u32 = 0x56AA;
/// Seek Pre-Roll.
pub const SEEK_PRE_ROLL: u32 = 0x56BB;

// =============================================================================
// Video Elements
// =============================================================================

/// Video settings.
pub const VIDEO: u32 = 0xE0;
/// Pixel Width.
pub const PIXEL_WIDTH: u32 = 0xB0;
/// Pixel Height.
pub const PIXEL_HEIGHT: u32 = 0xBA;
/// Display Width.
pub const DISPLAY_WIDTH: u32 = 0x54B0;
/// Display Height.
pub const DISPLAY_HEIGHT: u32 = 0x54BA;
/// Colour.
pub const COLOUR: u32 = 0x55B0;
/// Bits Per Channel.
pub const BITS_PER_CHANNEL: u32 = 0x55B2;
/// Range.
pub const RANGE: u32 = 0x55B9;
/// Transfer Characteristics.
pub const TRANSFER_CHARACTERISTICS: u32 = 0x55BA;
/// Primaries.
pub const PRIMARIES: u32 = 0x55BB;
/// Max CLL.
pub const MAX_CLL: u32 = 0x55BC;
/// Max FALL.
pub const MAX_FALL: u32 = 0x55BD;
/// Mastering Metadata.
pub const MASTERING_METADATA: u32 = 0x55D0;
/// Projection.
pub const PROJECTION: u32 = 0x7670;
/// Projection Pose Roll (degrees, drives rotation).
pub const PROJECTION_POSE_ROLL: u32 = 0x7675;

// =============================================================================
// Audio Elements
// =============================================================================

/// Audio settings.
pub const AUDIO: u32 = 0xE1;
/// Sampling Frequency.
pub const SAMPLING_FREQUENCY: u32 = 0xB5;
/// Channels.
pub const CHANNELS: u32 = 0x9F;
/// Bit Depth.
pub const BIT_DEPTH: u32 = 0x6264;

// =============================================================================
// Content Encoding (Compression/Encryption)
// =============================================================================

/// Content Encodings.
pub const CONTENT_ENCODINGS: u32 = 0x6D80;
/// Content Encoding.
pub const CONTENT_ENCODING: u32 = 0x6240;
/// Content Encoding Order.
pub const CONTENT_ENCODING_ORDER: u32 = 0x5031;
/// Content Encoding Scope.
pub const CONTENT_ENCODING_SCOPE: u32 = 0x5032;
/// Content Compression.
pub const CONTENT_COMPRESSION: u32 = 0x5034;
/// Content Comp Algo.
pub const CONTENT_COMP_ALGO: u32 = 0x4254;
/// Content Comp Settings (stripped header bytes).
pub const CONTENT_COMP_SETTINGS: u32 = 0x4255;
/// Content Encryption.
pub const CONTENT_ENCRYPTION: u32 = 0x5035;
/// Content Enc Algo.
pub const CONTENT_ENC_ALGO: u32 = 0x47E1;
/// Content Enc Key ID.
pub const CONTENT_ENC_KEY_ID: u32 = 0x47E2;
/// Content Enc AES Settings.
pub const CONTENT_ENC_AES_SETTINGS: u32 = 0x47E7;
/// AES Settings Cipher Mode.
pub const AES_SETTINGS_CIPHER_MODE: u32 = 0x47E8;

// =============================================================================
// Cueing Data
// =============================================================================

/// Cues.
pub const CUES: u32 = 0x1C53BB6B;
/// Cue Point.
pub const CUE_POINT: u32 = 0xBB;
/// Cue Time.
pub const CUE_TIME: u32 = 0xB3;
/// Cue Track Positions.
pub const CUE_TRACK_POSITIONS: u32 = 0xB7;
/// Cue Track.
pub const CUE_TRACK: u32 = 0xF7;
/// Cue Cluster Position.
pub const CUE_CLUSTER_POSITION: u32 = 0xF1;
/// Cue Relative Position.
pub const CUE_RELATIVE_POSITION: u32 = 0xF0;

// =============================================================================
// Void and CRC
// =============================================================================

/// Void (padding).
pub const VOID: u32 = 0xEC;
/// CRC-32.
pub const CRC32: u32 = 0xBF;

// =============================================================================
// Track Types
// =============================================================================

/// Track type: Video.
pub const TRACK_TYPE_VIDEO: u64 = 1;
/// Track type: Audio.
pub const TRACK_TYPE_AUDIO: u64 = 2;
/// Track type: Subtitle.
pub const TRACK_TYPE_SUBTITLE: u64 = 17;

/// AES-CTR cipher mode value inside ContentEncAESSettings.
pub const AES_CIPHER_MODE_CTR: u64 = 1;

/// Matroska codec ID definitions.
pub mod codec_ids {
    // Video codecs
    /// VP8 video codec.
    pub const V_VP8: &str = "V_VP8";
    /// VP9 video codec.
    pub const V_VP9: &str = "V_VP9";
    /// AV1 video codec.
    pub const V_AV1: &str = "V_AV1";
    /// H.264/AVC video codec.
    pub const V_MPEG4_ISO_AVC: &str = "V_MPEG4/ISO/AVC";
    /// H.265/HEVC video codec.
    pub const V_MPEGH_ISO_HEVC: &str = "V_MPEGH/ISO/HEVC";
    /// MPEG-2 video.
    pub const V_MPEG2: &str = "V_MPEG2";
    /// Theora video.
    pub const V_THEORA: &str = "V_THEORA";

    // Audio codecs
    /// Opus audio codec.
    pub const A_OPUS: &str = "A_OPUS";
    /// Vorbis audio codec.
    pub const A_VORBIS: &str = "A_VORBIS";
    /// FLAC audio codec.
    pub const A_FLAC: &str = "A_FLAC";
    /// AAC audio codec (profile suffixes share the prefix).
    pub const A_AAC: &str = "A_AAC";
    /// MPEG Layer 3 (MP3).
    pub const A_MPEG_L3: &str = "A_MPEG/L3";
    /// MPEG Layer 2.
    pub const A_MPEG_L2: &str = "A_MPEG/L2";
    /// AC-3 (Dolby Digital).
    pub const A_AC3: &str = "A_AC3";
    /// E-AC-3 (Enhanced AC-3).
    pub const A_EAC3: &str = "A_EAC3";
    /// Dolby TrueHD (MLP container).
    pub const A_TRUEHD: &str = "A_TRUEHD";
    /// DTS audio.
    pub const A_DTS: &str = "A_DTS";
    /// DTS Express.
    pub const A_DTS_EXPRESS: &str = "A_DTS/EXPRESS";
    /// DTS Lossless.
    pub const A_DTS_LOSSLESS: &str = "A_DTS/LOSSLESS";
    /// PCM little-endian integer.
    pub const A_PCM_INT_LIT: &str = "A_PCM/INT/LIT";
    /// PCM big-endian integer.
    pub const A_PCM_INT_BIG: &str = "A_PCM/INT/BIG";
    /// PCM IEEE floating point.
    pub const A_PCM_FLOAT_IEEE: &str = "A_PCM/FLOAT/IEEE";

    // Subtitle codecs
    /// UTF-8 text (SubRip) subtitles.
    pub const S_TEXT_UTF8: &str = "S_TEXT/UTF8";
    /// ASS subtitles.
    pub const S_TEXT_ASS: &str = "S_TEXT/ASS";
    /// WebVTT subtitles.
    pub const S_TEXT_WEBVTT: &str = "S_TEXT/WEBVTT";
    /// VobSub subtitles.
    pub const S_VOBSUB: &str = "S_VOBSUB";
    /// HDMV PGS subtitles.
    pub const S_HDMV_PGS: &str = "S_HDMV/PGS";
    /// DVB subtitles.
    pub const S_DVBSUB: &str = "S_DVBSUB";
}

/// Semantic kind of an element's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    /// Master element (contains other elements).
    Master,
    /// Unsigned big-endian integer, up to 8 bytes.
    UnsignedInt,
    /// IEEE float, 4 or 8 bytes.
    Float,
    /// UTF-8 string.
    String,
    /// Raw binary, handed to the consumer as a sized sub-stream.
    Binary,
    /// Not an element this demuxer knows; skipped by size.
    Unknown,
}

/// Classify an element ID into its semantic kind.
pub fn classify(id: u32) -> ElementType {
    match id {
        EBML | SEGMENT | SEEK_HEAD | SEEK | INFO | TRACKS | TRACK_ENTRY | VIDEO | AUDIO
        | COLOUR | MASTERING_METADATA | PROJECTION | CLUSTER | BLOCK_GROUP | BLOCK_ADDITIONS
        | BLOCK_MORE | CONTENT_ENCODINGS | CONTENT_ENCODING | CONTENT_COMPRESSION
        | CONTENT_ENCRYPTION | CONTENT_ENC_AES_SETTINGS | CUES | CUE_POINT
        | CUE_TRACK_POSITIONS => ElementType::Master,

        EBML_READ_VERSION | EBML_MAX_ID_LENGTH | EBML_MAX_SIZE_LENGTH | DOC_TYPE_READ_VERSION
        | SEEK_POSITION | TIMECODE_SCALE | TIMESTAMP | BLOCK_DURATION | REFERENCE_BLOCK
        | BLOCK_ADD_ID | TRACK_NUMBER | TRACK_TYPE | FLAG_DEFAULT
        | FLAG_FORCED | DEFAULT_DURATION | CODEC_DELAY | SEEK_PRE_ROLL | PIXEL_WIDTH
        | PIXEL_HEIGHT | DISPLAY_WIDTH | DISPLAY_HEIGHT | BITS_PER_CHANNEL | RANGE
        | TRANSFER_CHARACTERISTICS | PRIMARIES | MAX_CLL | MAX_FALL | CHANNELS | BIT_DEPTH
        | CONTENT_ENCODING_ORDER | CONTENT_ENCODING_SCOPE | CONTENT_COMP_ALGO
        | CONTENT_ENC_ALGO | AES_SETTINGS_CIPHER_MODE | CUE_TIME | CUE_TRACK
        | CUE_CLUSTER_POSITION | CUE_RELATIVE_POSITION => ElementType::UnsignedInt,

        DURATION | SAMPLING_FREQUENCY | PROJECTION_POSE_ROLL => ElementType::Float,

        DOC_TYPE | NAME | LANGUAGE | CODEC_ID => ElementType::String,

        // DiscardPadding is a signed integer; it rides the binary path and
        // is sign-decoded by the consumer.
        SEEK_ID | CODEC_PRIVATE | SIMPLE_BLOCK | BLOCK | BLOCK_ADDITIONAL | DISCARD_PADDING
        | CONTENT_COMP_SETTINGS | CONTENT_ENC_KEY_ID | VOID | CRC32 => ElementType::Binary,

        _ => ElementType::Unknown,
    }
}

/// Whether an element is a level-1 section that bounds how far
/// opportunistic seeking may jump.
pub fn is_top_level(id: u32) -> bool {
    matches!(id, INFO | TRACKS | CLUSTER | CUES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_masters() {
        assert_eq!(classify(EBML), ElementType::Master);
        assert_eq!(classify(SEGMENT), ElementType::Master);
        assert_eq!(classify(TRACK_ENTRY), ElementType::Master);
        assert_eq!(classify(BLOCK_GROUP), ElementType::Master);
        assert_eq!(classify(CUES), ElementType::Master);
    }

    #[test]
    fn test_classify_leaves() {
        assert_eq!(classify(TRACK_NUMBER), ElementType::UnsignedInt);
        assert_eq!(classify(DURATION), ElementType::Float);
        assert_eq!(classify(CODEC_ID), ElementType::String);
        assert_eq!(classify(SIMPLE_BLOCK), ElementType::Binary);
        assert_eq!(classify(CODEC_PRIVATE), ElementType::Binary);
    }

    #[test]
    fn test_classify_unknown() {
        assert_eq!(classify(0x1941A469), ElementType::Unknown); // Attachments
        assert_eq!(classify(0xDEAD), ElementType::Unknown);
    }

    #[test]
    fn test_top_level_sections() {
        assert!(is_top_level(INFO));
        assert!(is_top_level(CLUSTER));
        assert!(is_top_level(TRACKS));
        assert!(is_top_level(CUES));
        assert!(!is_top_level(SEEK_HEAD));
        assert!(!is_top_level(SEGMENT));
        assert!(!is_top_level(TRACK_ENTRY));
    }

    #[test]
    fn test_well_known_ids() {
        assert_eq!(EBML, 0x1A45DFA3);
        assert_eq!(SEGMENT, 0x18538067);
        assert_eq!(CLUSTER, 0x1F43B675);
        assert_eq!(TRACKS, 0x1654AE6B);
        assert_eq!(CUES, 0x1C53BB6B);
    }
}
