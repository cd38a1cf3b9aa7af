//! # matroska-demux
//!
//! A streaming Matroska/WebM demuxer.
//!
//! The demuxer pulls bytes from a [`StreamInput`] and pushes track formats,
//! sample data, and a seek map into a caller-supplied [`DemuxerOutput`].
//! Reads never block: when the input has no bytes available the parse
//! suspends and resumes at the same point on the next call, so the same
//! code path serves local files and progressive network streams.
//!
//! Supported container features include:
//! - EBML parsing with resumable varint and element readers
//! - All four block lacing schemes (none, Xiph, fixed-size, EBML)
//! - Codec-private resolution for H.264/H.265 length-prefixed NAL streams,
//!   AAC, Vorbis, FLAC, PCM, and TrueHD
//! - WebM encryption signal bytes, including partitioned (subsample) frames
//! - Cue-based seek maps, with lazy resolution of end-of-file SeekHead and
//!   Cues elements
//! - Subtitle timecode framing for SubRip, ASS, and WebVTT tracks
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use matroska_demux::{DemuxAction, MatroskaDemuxer, SliceInput};
//!
//! fn main() -> matroska_demux::Result<()> {
//!     let bytes = std::fs::read("input.mkv")?;
//!     let mut input = SliceInput::new(bytes);
//!     let mut demuxer = MatroskaDemuxer::new(Box::new(MyOutput));
//!
//!     loop {
//!         match demuxer.read(&mut input)? {
//!             DemuxAction::Continue => {}
//!             DemuxAction::Seek { position } => input.seek_to(position),
//!             DemuxAction::Pending => unreachable!("SliceInput never starves"),
//!             DemuxAction::Ended => break,
//!         }
//!     }
//!     Ok(())
//! }
//! # struct MyOutput;
//! # impl matroska_demux::DemuxerOutput for MyOutput {
//! #     fn track(
//! #         &mut self,
//! #         _number: u64,
//! #         _track_type: matroska_demux::TrackType,
//! #     ) -> Box<dyn matroska_demux::TrackOutput> {
//! #         unimplemented!()
//! #     }
//! #     fn seek_map(&mut self, _seek_map: matroska_demux::SeekMap) {}
//! #     fn end_tracks(&mut self) {}
//! # }
//! ```

pub mod block;
pub mod demuxer;
pub mod ebml;
pub mod elements;
pub mod error;
pub mod index;
pub mod input;
pub mod output;
pub mod reader;
pub mod resolver;
pub mod sample;
pub mod track;

pub use demuxer::{DemuxAction, MatroskaDemuxer};
pub use error::{DemuxError, Result};
pub use index::{ChunkIndex, CueIndex, SeekMap};
pub use input::{Progress, ReadStatus, SliceInput, StreamInput};
pub use output::{
    AudioFormat, ColorInfo, CipherMode, CryptoData, CryptoInfo, DemuxerOutput, Format,
    PcmEncoding, SampleFlags, SamplePart, SubsampleEntry, TrackOutput, TrackType,
    VideoFormat,
};
pub use track::{CodecKind, CodecRegistry};

/// The EBML document magic. Every Matroska/WebM file starts with these
/// four bytes.
const EBML_MAGIC: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];

/// Whether `data` begins with the EBML magic that opens every
/// Matroska/WebM file. A cheap format sniff; it does not validate the
/// document type.
pub fn is_matroska_signature(data: &[u8]) -> bool {
    data.len() >= EBML_MAGIC.len() && data[..EBML_MAGIC.len()] == EBML_MAGIC
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_sniff() {
        assert!(is_matroska_signature(&[0x1A, 0x45, 0xDF, 0xA3, 0x93]));
        assert!(!is_matroska_signature(&[0x1A, 0x45, 0xDF]));
        assert!(!is_matroska_signature(b"RIFF"));
    }
}
