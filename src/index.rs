//! Cue-based seek index: per-track chunk tables, point lookup, and the
//! builder that turns raw CuePoint data into a [`SeekMap`].

use std::collections::BTreeMap;

use crate::output::TrackType;

/// Parallel arrays describing the seekable chunks of one track.
///
/// All four arrays have the same length; entry `i` describes the run of
/// bytes from one cue point to the next.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkIndex {
    /// Chunk sizes in bytes.
    pub sizes: Vec<u64>,
    /// Absolute file offsets of chunk starts.
    pub offsets: Vec<u64>,
    /// Chunk durations in microseconds.
    pub durations_us: Vec<i64>,
    /// Chunk start times in microseconds.
    pub times_us: Vec<i64>,
}

/// The demuxer's verdict on seekability, delivered once per parse.
#[derive(Debug, Clone, PartialEq)]
pub enum SeekMap {
    /// No usable cue data; only the duration (if any) is known.
    Unseekable {
        /// Presentation duration in microseconds, when known.
        duration_us: Option<i64>,
    },
    /// Cue data indexed per track.
    Cues(CueIndex),
}

/// Per-track cue tables plus a primary table for tracks without own cues.
#[derive(Debug, Clone, PartialEq)]
pub struct CueIndex {
    primary: ChunkIndex,
    by_track: BTreeMap<u64, ChunkIndex>,
    duration_us: Option<i64>,
}

/// One resolved seek target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekPoint {
    /// Absolute file offset to resume parsing at.
    pub offset: u64,
    /// Presentation time of the chunk at that offset, in microseconds.
    pub time_us: i64,
}

/// A seek target plus the following point when the requested time falls
/// strictly between two cue times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekPoints {
    /// The chunk containing (or preceding) the requested time.
    pub first: SeekPoint,
    /// The next chunk, when the request fell between two cue times.
    pub second: Option<SeekPoint>,
}

impl ChunkIndex {
    /// Number of chunks in the table.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Find the chunk covering `time_us`: the entry with the greatest start
    /// time not exceeding the request (the first entry when the request
    /// precedes all of them). Returns the following entry as well when the
    /// request falls strictly between two start times.
    pub fn seek_points(&self, time_us: i64) -> Option<SeekPoints> {
        if self.is_empty() {
            return None;
        }
        let i = match self.times_us.binary_search(&time_us) {
            Ok(i) => i,
            Err(0) => 0,
            Err(ins) => ins - 1,
        };
        let first = SeekPoint {
            offset: self.offsets[i],
            time_us: self.times_us[i],
        };
        let second = if self.times_us[i] < time_us && i + 1 < self.len() {
            Some(SeekPoint {
                offset: self.offsets[i + 1],
                time_us: self.times_us[i + 1],
            })
        } else {
            None
        };
        Some(SeekPoints { first, second })
    }
}

impl CueIndex {
    /// Presentation duration in microseconds, when known.
    pub fn duration_us(&self) -> Option<i64> {
        self.duration_us
    }

    /// The chunk table for `track`, falling back to the primary track's
    /// table for tracks the cues never mention.
    pub fn track_index(&self, track: u64) -> &ChunkIndex {
        self.by_track.get(&track).unwrap_or(&self.primary)
    }

    /// Resolve a seek request for `track` at `time_us`.
    pub fn seek_points(&self, track: u64, time_us: i64) -> Option<SeekPoints> {
        self.track_index(track).seek_points(time_us)
    }

    /// Pick a time suited to extracting a representative thumbnail: among
    /// the first few video chunks, the densest in bytes per microsecond.
    /// Looks at most 20 chunks and 10 seconds in, skipping the first chunk
    /// when a later candidate exists.
    pub fn thumbnail_time_us(&self, video_track: u64) -> Option<i64> {
        let index = self.track_index(video_track);
        if index.is_empty() {
            return None;
        }
        let mut best: Option<(f64, i64)> = None;
        for i in 0..index.len().min(20) {
            if index.times_us[i] > 10_000_000 {
                break;
            }
            if i == 0 && index.len() > 1 {
                continue;
            }
            let duration = index.durations_us[i].max(1) as f64;
            let density = index.sizes[i] as f64 / duration;
            if best.map_or(true, |(d, _)| density > d) {
                best = Some((density, index.times_us[i]));
            }
        }
        best.map(|(_, t)| t)
    }
}

/// One CuePoint/CueTrackPositions pair as parsed from the file.
#[derive(Debug, Clone, Copy)]
pub struct CuePointData {
    /// Cue time in microseconds.
    pub time_us: i64,
    /// Track number the position applies to.
    pub track: u64,
    /// Cluster position relative to the segment data start.
    pub cluster_position: u64,
}

/// Accumulates cue points during the parse and finalizes them into a
/// [`SeekMap`] once the Cues element closes.
#[derive(Debug, Default)]
pub struct CueBuilder {
    points: Vec<CuePointData>,
}

impl CueBuilder {
    /// Record one parsed cue point.
    pub fn add_point(&mut self, point: CuePointData) {
        self.points.push(point);
    }

    /// Whether any points have been recorded.
    pub fn has_points(&self) -> bool {
        !self.points.is_empty()
    }

    /// Discard all recorded points. Used when a seek abandons a partially
    /// parsed Cues element.
    pub fn reset(&mut self) {
        self.points.clear();
    }

    /// Build the final index.
    ///
    /// `segment_start` is the absolute offset cue cluster positions are
    /// relative to; `segment_end` bounds the last chunk's size. Chunk `i`'s
    /// size and duration run to chunk `i + 1` (or to the segment end and
    /// total duration for the last chunk). Without points, or without a
    /// known duration, the file is unseekable.
    pub fn build(
        &mut self,
        segment_start: u64,
        segment_end: u64,
        duration_us: Option<i64>,
        primary_track: u64,
    ) -> SeekMap {
        if self.points.is_empty() || duration_us.is_none() {
            self.points.clear();
            return SeekMap::Unseekable { duration_us };
        }

        let mut by_track: BTreeMap<u64, Vec<(i64, u64)>> = BTreeMap::new();
        for p in self.points.drain(..) {
            by_track
                .entry(p.track)
                .or_default()
                .push((p.time_us, segment_start + p.cluster_position));
        }

        let mut indexes: BTreeMap<u64, ChunkIndex> = BTreeMap::new();
        for (track, mut entries) in by_track {
            entries.sort_unstable();
            let mut index = ChunkIndex::default();
            for (i, &(time_us, offset)) in entries.iter().enumerate() {
                index.times_us.push(time_us);
                index.offsets.push(offset);
                if let Some(&(next_time, next_offset)) = entries.get(i + 1) {
                    index.sizes.push(next_offset.saturating_sub(offset));
                    index.durations_us.push(next_time - time_us);
                } else {
                    index.sizes.push(segment_end.saturating_sub(offset));
                    let last = duration_us.map_or(0, |d| (d - time_us).max(0));
                    index.durations_us.push(last);
                }
            }
            indexes.insert(track, index);
        }

        let primary = indexes
            .get(&primary_track)
            .cloned()
            .or_else(|| indexes.values().next().cloned())
            .unwrap_or_default();

        SeekMap::Cues(CueIndex {
            primary,
            by_track: indexes,
            duration_us,
        })
    }
}

/// Choose the track whose cue table backs tracks without their own cues:
/// the default video track, else the first video track, else the default
/// audio track, else the first audio track, else the first track.
pub fn choose_primary_track(tracks: &[(u64, TrackType, bool)]) -> Option<u64> {
    let pick = |ty: TrackType, default_only: bool| {
        tracks
            .iter()
            .find(|&&(_, t, d)| t == ty && (!default_only || d))
            .map(|&(n, _, _)| n)
    };
    pick(TrackType::Video, true)
        .or_else(|| pick(TrackType::Video, false))
        .or_else(|| pick(TrackType::Audio, true))
        .or_else(|| pick(TrackType::Audio, false))
        .or_else(|| tracks.first().map(|&(n, _, _)| n))
}
