//! End-to-end demux tests over hand-built Matroska streams.

use std::cell::RefCell;
use std::rc::Rc;

use matroska_demux::elements as el;
use matroska_demux::{
    CryptoInfo, DemuxAction, DemuxerOutput, Format, MatroskaDemuxer, SampleFlags, SamplePart,
    SeekMap, SliceInput, TrackOutput, TrackType,
};

// =============================================================================
// EBML construction helpers
// =============================================================================

fn encode_id(id: u32) -> Vec<u8> {
    let bytes = id.to_be_bytes();
    let skip = bytes.iter().position(|&b| b != 0).unwrap_or(3);
    bytes[skip..].to_vec()
}

fn encode_size(value: u64) -> Vec<u8> {
    let mut width = 1;
    while width < 8 && value >= (1u64 << (7 * width)) - 1 {
        width += 1;
    }
    let mut v = value | (1u64 << (7 * width));
    let mut out = vec![0u8; width];
    for slot in out.iter_mut().rev() {
        *slot = (v & 0xFF) as u8;
        v >>= 8;
    }
    out
}

fn element(id: u32, content: &[u8]) -> Vec<u8> {
    let mut out = encode_id(id);
    out.extend_from_slice(&encode_size(content.len() as u64));
    out.extend_from_slice(content);
    out
}

fn uint(id: u32, value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().position(|&b| b != 0).unwrap_or(7);
    element(id, &bytes[skip..])
}

/// Unsigned element padded to a fixed content width, so element sizes stay
/// stable while offsets are still being computed.
fn uint_fixed(id: u32, value: u64, width: usize) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    element(id, &bytes[8 - width..])
}

fn float(id: u32, value: f64) -> Vec<u8> {
    element(id, &value.to_be_bytes())
}

fn string(id: u32, value: &str) -> Vec<u8> {
    element(id, value.as_bytes())
}

fn ebml_header(doc_type: &str) -> Vec<u8> {
    element(
        el::EBML,
        &[
            uint(el::EBML_READ_VERSION, 1),
            uint(el::EBML_MAX_ID_LENGTH, 4),
            uint(el::EBML_MAX_SIZE_LENGTH, 8),
            string(el::DOC_TYPE, doc_type),
            uint(el::DOC_TYPE_READ_VERSION, 2),
        ]
        .concat(),
    )
}

/// Segment Info with a 1 ms timecode scale and an optional duration in
/// timecode units.
fn info(duration: Option<f64>) -> Vec<u8> {
    let mut content = uint(el::TIMECODE_SCALE, 1_000_000);
    if let Some(d) = duration {
        content.extend_from_slice(&float(el::DURATION, d));
    }
    element(el::INFO, &content)
}

fn video_track(number: u64) -> Vec<u8> {
    element(
        el::TRACK_ENTRY,
        &[
            uint(el::TRACK_NUMBER, number),
            uint(el::TRACK_TYPE, el::TRACK_TYPE_VIDEO),
            string(el::CODEC_ID, "V_VP8"),
            element(
                el::VIDEO,
                &[uint(el::PIXEL_WIDTH, 320), uint(el::PIXEL_HEIGHT, 240)].concat(),
            ),
        ]
        .concat(),
    )
}

fn subtitle_track(number: u64) -> Vec<u8> {
    element(
        el::TRACK_ENTRY,
        &[
            uint(el::TRACK_NUMBER, number),
            uint(el::TRACK_TYPE, el::TRACK_TYPE_SUBTITLE),
            string(el::CODEC_ID, "S_TEXT/UTF8"),
        ]
        .concat(),
    )
}

fn tracks(entries: &[Vec<u8>]) -> Vec<u8> {
    element(el::TRACKS, &entries.concat())
}

fn simple_block(track: u8, timecode: i16, flags: u8, payload: &[u8]) -> Vec<u8> {
    let mut content = vec![0x80 | track];
    content.extend_from_slice(&timecode.to_be_bytes());
    content.push(flags);
    content.extend_from_slice(payload);
    element(el::SIMPLE_BLOCK, &content)
}

fn block(track: u8, timecode: i16, payload: &[u8]) -> Vec<u8> {
    let mut content = vec![0x80 | track];
    content.extend_from_slice(&timecode.to_be_bytes());
    content.push(0);
    content.extend_from_slice(payload);
    element(el::BLOCK, &content)
}

fn cluster(timecode: u64, blocks: &[Vec<u8>]) -> Vec<u8> {
    let mut content = uint(el::TIMESTAMP, timecode);
    content.extend_from_slice(&blocks.concat());
    element(el::CLUSTER, &content)
}

/// Cues with fixed-width time and position fields, so the element's size
/// does not depend on the values.
fn cues(points: &[(u64, u64, u64)]) -> Vec<u8> {
    let content: Vec<u8> = points
        .iter()
        .flat_map(|&(time, track, position)| {
            element(
                el::CUE_POINT,
                &[
                    uint_fixed(el::CUE_TIME, time, 2),
                    element(
                        el::CUE_TRACK_POSITIONS,
                        &[
                            uint(el::CUE_TRACK, track),
                            uint_fixed(el::CUE_CLUSTER_POSITION, position, 4),
                        ]
                        .concat(),
                    ),
                ]
                .concat(),
            )
        })
        .collect();
    element(el::CUES, &content)
}

fn seek_entry(target_id: u32, position: u64) -> Vec<u8> {
    element(
        el::SEEK,
        &[
            element(el::SEEK_ID, &encode_id(target_id)),
            uint_fixed(el::SEEK_POSITION, position, 4),
        ]
        .concat(),
    )
}

fn seek_head(entries: &[Vec<u8>]) -> Vec<u8> {
    element(el::SEEK_HEAD, &entries.concat())
}

fn file(doc_type: &str, segment_content: &[u8]) -> Vec<u8> {
    let mut out = ebml_header(doc_type);
    out.extend_from_slice(&element(el::SEGMENT, segment_content));
    out
}

// =============================================================================
// Capturing output
// =============================================================================

#[derive(Debug)]
struct SampleRecord {
    track: u64,
    time_us: i64,
    flags: SampleFlags,
    size: usize,
    offset: u64,
    data: Vec<u8>,
}

#[derive(Default)]
struct Captured {
    tracks: Vec<(u64, TrackType)>,
    formats: Vec<(u64, Format)>,
    samples: Vec<SampleRecord>,
    seek_maps: Vec<SeekMap>,
    end_tracks: usize,
}

struct Collector(Rc<RefCell<Captured>>);

impl DemuxerOutput for Collector {
    fn track(&mut self, number: u64, track_type: TrackType) -> Box<dyn TrackOutput> {
        self.0.borrow_mut().tracks.push((number, track_type));
        Box::new(TrackCollector {
            number,
            shared: Rc::clone(&self.0),
            pending: Vec::new(),
        })
    }

    fn seek_map(&mut self, seek_map: SeekMap) {
        self.0.borrow_mut().seek_maps.push(seek_map);
    }

    fn end_tracks(&mut self) {
        self.0.borrow_mut().end_tracks += 1;
    }
}

struct TrackCollector {
    number: u64,
    shared: Rc<RefCell<Captured>>,
    pending: Vec<u8>,
}

impl TrackOutput for TrackCollector {
    fn format(&mut self, format: &Format) {
        self.shared
            .borrow_mut()
            .formats
            .push((self.number, format.clone()));
    }

    fn sample_data(&mut self, data: &[u8], _part: SamplePart) {
        self.pending.extend_from_slice(data);
    }

    fn sample_metadata(
        &mut self,
        time_us: i64,
        flags: SampleFlags,
        size: usize,
        offset: u64,
        _crypto: Option<&CryptoInfo>,
    ) {
        let data = std::mem::take(&mut self.pending);
        self.shared.borrow_mut().samples.push(SampleRecord {
            track: self.number,
            time_us,
            flags,
            size,
            offset,
            data,
        });
    }
}

/// Run the whole stream through the demuxer, following seek requests.
fn demux(bytes: Vec<u8>) -> Rc<RefCell<Captured>> {
    let shared = Rc::new(RefCell::new(Captured::default()));
    let mut demuxer = MatroskaDemuxer::new(Box::new(Collector(Rc::clone(&shared))));
    let mut input = SliceInput::new(bytes);
    for _ in 0..100_000 {
        match demuxer.read(&mut input).expect("demux failed") {
            DemuxAction::Continue => {}
            DemuxAction::Seek { position } => input.seek_to(position),
            DemuxAction::Pending => panic!("slice input never starves"),
            DemuxAction::Ended => return shared,
        }
    }
    panic!("demuxer did not terminate");
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn test_simple_blocks_demuxed_with_scaled_times() {
    let segment = [
        info(Some(10_000.0)),
        tracks(&[video_track(1)]),
        cluster(
            2000,
            &[
                simple_block(1, 0, 0x80, &[0xAA; 16]),
                simple_block(1, 40, 0x00, &[0xBB; 12]),
            ],
        ),
    ]
    .concat();
    let captured = demux(file("matroska", &segment));
    let captured = captured.borrow();

    assert_eq!(captured.tracks, vec![(1, TrackType::Video)]);
    assert_eq!(captured.formats.len(), 1);
    assert_eq!(captured.formats[0].1.codec_id, "V_VP8");
    assert_eq!(captured.end_tracks, 1);

    assert_eq!(captured.samples.len(), 2);
    assert_eq!(captured.samples[0].time_us, 2_000_000);
    assert!(captured.samples[0].flags.contains(SampleFlags::KEYFRAME));
    assert_eq!(captured.samples[0].size, 16);
    assert_eq!(captured.samples[0].data, vec![0xAA; 16]);
    assert_eq!(captured.samples[1].time_us, 2_040_000);
    assert!(!captured.samples[1].flags.contains(SampleFlags::KEYFRAME));
}

#[test]
fn test_cue_points_build_per_track_chunk_index() {
    let info_bytes = info(Some(10_000.0));
    let tracks_bytes = tracks(&[video_track(1)]);
    let clusters: Vec<Vec<u8>> = [0u64, 2000, 5000]
        .iter()
        .map(|&tc| cluster(tc, &[simple_block(1, 0, 0x80, &[0xAA; 16])]))
        .collect();

    // Fixed-width cue fields keep the Cues size independent of the
    // positions, so offsets can be computed in one pass.
    let cues_len = cues(&[(0, 1, 0), (2000, 1, 0), (5000, 1, 0)]).len() as u64;
    let base = (info_bytes.len() + tracks_bytes.len()) as u64 + cues_len;
    let positions = [
        base,
        base + clusters[0].len() as u64,
        base + (clusters[0].len() + clusters[1].len()) as u64,
    ];
    let cues_bytes = cues(&[
        (0, 1, positions[0]),
        (2000, 1, positions[1]),
        (5000, 1, positions[2]),
    ]);
    assert_eq!(cues_bytes.len() as u64, cues_len);

    let segment = [
        info_bytes,
        tracks_bytes,
        cues_bytes,
        clusters[0].clone(),
        clusters[1].clone(),
        clusters[2].clone(),
    ]
    .concat();
    let header_len = ebml_header("matroska").len() as u64;
    let segment_len = segment.len() as u64;
    let bytes = file("matroska", &segment);
    // Segment data starts after the header, the 4-byte segment id, and
    // the segment size vint.
    let segment_start = bytes.len() as u64 - segment_len;
    assert!(segment_start > header_len);

    let captured = demux(bytes);
    let captured = captured.borrow();

    assert_eq!(captured.seek_maps.len(), 1);
    let SeekMap::Cues(index) = &captured.seek_maps[0] else {
        panic!("expected a cue-based seek map");
    };
    assert_eq!(index.duration_us(), Some(10_000_000));

    let chunks = index.track_index(1);
    assert_eq!(chunks.times_us, vec![0, 2_000_000, 5_000_000]);
    let expected_offsets: Vec<u64> =
        positions.iter().map(|p| segment_start + p).collect();
    assert_eq!(chunks.offsets, expected_offsets);
    // Sizes run chunk to chunk; the last one runs to the segment end.
    assert_eq!(chunks.sizes[0], expected_offsets[1] - expected_offsets[0]);
    assert_eq!(chunks.sizes[1], expected_offsets[2] - expected_offsets[1]);
    assert_eq!(
        chunks.sizes[2],
        segment_start + segment_len - expected_offsets[2]
    );
    // Durations likewise; the last one runs to the total duration.
    assert_eq!(chunks.durations_us, vec![2_000_000, 3_000_000, 5_000_000]);

    // Samples still come through after the map.
    assert_eq!(captured.samples.len(), 3);
}

#[test]
fn test_block_group_keyframe_from_reference_block() {
    let group_key = element(el::BLOCK_GROUP, &block(1, 0, &[0x10; 8]));
    let group_delta = element(
        el::BLOCK_GROUP,
        &[block(1, 40, &[0x20; 8]), uint(el::REFERENCE_BLOCK, 0)].concat(),
    );
    let segment = [
        info(Some(1_000.0)),
        tracks(&[video_track(1)]),
        cluster(0, &[group_key, group_delta]),
    ]
    .concat();
    let captured = demux(file("matroska", &segment));
    let captured = captured.borrow();

    assert_eq!(captured.samples.len(), 2);
    // No ReferenceBlock sibling: an independently decodable frame.
    assert!(captured.samples[0].flags.contains(SampleFlags::KEYFRAME));
    assert!(!captured.samples[1].flags.contains(SampleFlags::KEYFRAME));
}

#[test]
fn test_subtitle_block_gets_timecode_framing() {
    let group = element(
        el::BLOCK_GROUP,
        &[block(1, 500, b"Hello, world"), uint(el::BLOCK_DURATION, 1500)].concat(),
    );
    let segment = [
        info(Some(5_000.0)),
        tracks(&[subtitle_track(1)]),
        cluster(0, &[group]),
    ]
    .concat();
    let captured = demux(file("matroska", &segment));
    let captured = captured.borrow();

    assert_eq!(captured.samples.len(), 1);
    let sample = &captured.samples[0];
    assert_eq!(sample.time_us, 500_000);
    assert!(sample.flags.contains(SampleFlags::KEYFRAME));
    // The cue text is wrapped in a SubRip block whose end time carries the
    // block duration; the start stays zero.
    let expected = b"1\n00:00:00,000 --> 00:00:01,500\nHello, world";
    assert_eq!(sample.data, expected);
    assert_eq!(sample.size, expected.len());
}

#[test]
fn test_xiph_laced_block_splits_frames() {
    // Two frames of 3 and 4 bytes, Xiph lacing: count-1 = 1, first size 3,
    // last size implicit.
    let mut content = vec![0x81, 0x00, 0x00, 0x02, 0x01, 0x03];
    content.extend_from_slice(&[0xAA, 0xAA, 0xAA, 0xBB, 0xBB, 0xBB, 0xBB]);
    let segment = [
        info(Some(1_000.0)),
        tracks(&[video_track(1)]),
        cluster(0, &[element(el::SIMPLE_BLOCK, &content)]),
    ]
    .concat();
    let captured = demux(file("matroska", &segment));
    let captured = captured.borrow();

    assert_eq!(captured.samples.len(), 2);
    assert_eq!(captured.samples[0].data, vec![0xAA; 3]);
    assert_eq!(captured.samples[1].data, vec![0xBB; 4]);
}

#[test]
fn test_no_cues_yields_unseekable_map() {
    let segment = [
        info(Some(3_000.0)),
        tracks(&[video_track(1)]),
        cluster(0, &[simple_block(1, 0, 0x80, &[0xAA; 8])]),
    ]
    .concat();
    let captured = demux(file("webm", &segment));
    let captured = captured.borrow();

    assert_eq!(
        captured.seek_maps,
        vec![SeekMap::Unseekable {
            duration_us: Some(3_000_000)
        }]
    );
    assert_eq!(captured.samples.len(), 1);
}

#[test]
fn test_seek_head_chain_resolves_cues_at_end() {
    // SeekHead at the front points at Cues stored after the clusters. The
    // demuxer must jump forward, emit the map, and come back for the media.
    let info_bytes = info(Some(10_000.0));
    let tracks_bytes = tracks(&[video_track(1)]);
    let cluster_bytes = cluster(0, &[simple_block(1, 0, 0x80, &[0xAA; 16])]);

    let head_len = seek_head(&[seek_entry(el::CUES, 0)]).len() as u64;
    let cluster_pos =
        head_len + (info_bytes.len() + tracks_bytes.len()) as u64;
    let cues_pos = cluster_pos + cluster_bytes.len() as u64;
    let head = seek_head(&[seek_entry(el::CUES, cues_pos)]);
    assert_eq!(head.len() as u64, head_len);
    let cues_bytes = cues(&[(0, 1, cluster_pos)]);

    let segment = [
        head,
        info_bytes,
        tracks_bytes,
        cluster_bytes,
        cues_bytes,
    ]
    .concat();
    let captured = demux(file("matroska", &segment));
    let captured = captured.borrow();

    assert_eq!(captured.seek_maps.len(), 1);
    assert!(matches!(captured.seek_maps[0], SeekMap::Cues(_)));
    // The cluster is parsed exactly once after the detour.
    assert_eq!(captured.samples.len(), 1);
    assert_eq!(captured.samples[0].size, 16);
}

#[test]
fn test_seek_head_hop_then_cues_returns_to_media() {
    // A front seek head points at a second seek head stored at the end,
    // which in turn names the Cues. After the detour emits the map, the
    // demuxer must unwind both jumps and still deliver the cluster that
    // triggered resolution.
    let info_bytes = info(Some(10_000.0));
    let tracks_bytes = tracks(&[video_track(1)]);
    let cluster_bytes = cluster(0, &[simple_block(1, 0, 0x80, &[0xAA; 16])]);

    let head_len = seek_head(&[seek_entry(el::SEEK_HEAD, 0)]).len() as u64;
    let cluster_pos = head_len + (info_bytes.len() + tracks_bytes.len()) as u64;
    let cues_bytes = cues(&[(0, 1, cluster_pos)]);
    let cues_pos = cluster_pos + cluster_bytes.len() as u64;
    let head2_pos = cues_pos + cues_bytes.len() as u64;
    let head1 = seek_head(&[seek_entry(el::SEEK_HEAD, head2_pos)]);
    let head2 = seek_head(&[seek_entry(el::CUES, cues_pos)]);
    assert_eq!(head1.len() as u64, head_len);
    assert_eq!(head2.len() as u64, head_len);

    let segment = [
        head1,
        info_bytes,
        tracks_bytes,
        cluster_bytes,
        cues_bytes,
        head2,
    ]
    .concat();
    let captured = demux(file("matroska", &segment));
    let captured = captured.borrow();

    assert_eq!(captured.seek_maps.len(), 1);
    assert!(matches!(captured.seek_maps[0], SeekMap::Cues(_)));
    assert_eq!(captured.samples.len(), 1);
    assert_eq!(captured.samples[0].size, 16);
    assert!(captured.samples[0].flags.contains(SampleFlags::KEYFRAME));
}

#[test]
fn test_cues_directly_after_seek_head_parsed_inline() {
    // The second seek head names a Cues element that begins exactly where
    // the parse already is; no jump is needed and the map must still come
    // out of the real cue points.
    let info_bytes = info(Some(10_000.0));
    let tracks_bytes = tracks(&[video_track(1)]);
    let cluster_bytes = cluster(0, &[simple_block(1, 0, 0x80, &[0xAA; 16])]);

    let head_len = seek_head(&[seek_entry(el::SEEK_HEAD, 0)]).len() as u64;
    let cluster_pos = head_len + (info_bytes.len() + tracks_bytes.len()) as u64;
    let head2_pos = cluster_pos + cluster_bytes.len() as u64;
    let cues_pos = head2_pos + head_len;
    let head1 = seek_head(&[seek_entry(el::SEEK_HEAD, head2_pos)]);
    let head2 = seek_head(&[seek_entry(el::CUES, cues_pos)]);
    assert_eq!(head1.len() as u64, head_len);
    assert_eq!(head2.len() as u64, head_len);
    let cues_bytes = cues(&[(0, 1, cluster_pos)]);

    let segment = [
        head1,
        info_bytes,
        tracks_bytes,
        cluster_bytes,
        head2,
        cues_bytes,
    ]
    .concat();
    let captured = demux(file("matroska", &segment));
    let captured = captured.borrow();

    assert_eq!(captured.seek_maps.len(), 1);
    assert!(matches!(captured.seek_maps[0], SeekMap::Cues(_)));
    assert_eq!(captured.samples.len(), 1);
}

#[test]
fn test_seek_head_cycle_ends_unseekable() {
    // Two seek heads referencing each other and no cues anywhere: the
    // resolver must visit each at most once and then give up.
    let info_bytes = info(Some(10_000.0));
    let tracks_bytes = tracks(&[video_track(1)]);
    let cluster_bytes = cluster(0, &[simple_block(1, 0, 0x80, &[0xAA; 16])]);

    let head_len = seek_head(&[seek_entry(el::SEEK_HEAD, 0)]).len() as u64;
    let head1_pos = 0u64;
    let cluster_pos = head_len + (info_bytes.len() + tracks_bytes.len()) as u64;
    let head2_pos = cluster_pos + cluster_bytes.len() as u64;
    let head1 = seek_head(&[seek_entry(el::SEEK_HEAD, head2_pos)]);
    let head2 = seek_head(&[seek_entry(el::SEEK_HEAD, head1_pos)]);
    assert_eq!(head1.len() as u64, head_len);

    let segment = [info_bytes, tracks_bytes, cluster_bytes, head2].concat();
    let segment = [head1, segment].concat();
    let captured = demux(file("matroska", &segment));
    let captured = captured.borrow();

    assert_eq!(
        captured.seek_maps,
        vec![SeekMap::Unseekable {
            duration_us: Some(10_000_000)
        }]
    );
    assert_eq!(captured.samples.len(), 1);
}

#[test]
fn test_unknown_doc_type_rejected() {
    let bytes = file("ogg", &info(None));
    let mut demuxer = MatroskaDemuxer::new(Box::new(Collector(Rc::new(RefCell::new(
        Captured::default(),
    )))));
    let mut input = SliceInput::new(bytes);
    let err = loop {
        match demuxer.read(&mut input) {
            Ok(DemuxAction::Ended) => panic!("bad doc type accepted"),
            Ok(_) => {}
            Err(err) => break err,
        }
    };
    assert!(matches!(
        err,
        matroska_demux::DemuxError::InvalidEbmlHeader(_)
    ));
}

#[test]
fn test_unsupported_codec_track_excluded() {
    let exotic = element(
        el::TRACK_ENTRY,
        &[
            uint(el::TRACK_NUMBER, 2),
            uint(el::TRACK_TYPE, el::TRACK_TYPE_VIDEO),
            string(el::CODEC_ID, "V_REAL/RV40"),
            element(
                el::VIDEO,
                &[uint(el::PIXEL_WIDTH, 320), uint(el::PIXEL_HEIGHT, 240)].concat(),
            ),
        ]
        .concat(),
    );
    let segment = [
        info(Some(1_000.0)),
        tracks(&[video_track(1), exotic]),
        cluster(0, &[simple_block(1, 0, 0x80, &[0xAA; 8])]),
    ]
    .concat();
    let captured = demux(file("matroska", &segment));
    let captured = captured.borrow();

    // The unsupported track gets no sink; the rest of the file parses.
    assert_eq!(captured.tracks, vec![(1, TrackType::Video)]);
    assert_eq!(captured.samples.len(), 1);
}

#[test]
fn test_blocks_for_unknown_tracks_skipped() {
    let segment = [
        info(Some(1_000.0)),
        tracks(&[video_track(1)]),
        cluster(
            0,
            &[
                simple_block(2, 0, 0x80, &[0xCC; 8]),
                simple_block(1, 0, 0x80, &[0xAA; 8]),
            ],
        ),
    ]
    .concat();
    let captured = demux(file("matroska", &segment));
    let captured = captured.borrow();

    assert_eq!(captured.samples.len(), 1);
    assert_eq!(captured.samples[0].track, 1);
    assert_eq!(captured.samples[0].data, vec![0xAA; 8]);
}
