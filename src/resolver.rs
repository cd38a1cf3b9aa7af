//! Lazy seek-head resolution.
//!
//! Cues frequently live at the end of the file, reachable only through one
//! or more SeekHead elements. Rather than scanning the whole file, the
//! demuxer jumps to candidate positions when media data is first reached,
//! reads what it finds there, and returns to where it left off. The
//! decision logic lives here as a pure state machine so it can be tested
//! without a byte stream; the demuxer applies the returned action.

use std::collections::HashSet;

/// What the read loop should do at the current position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    /// Keep parsing at the current position.
    Continue,
    /// Reposition the stream to this absolute offset.
    Jump(u64),
    /// No cue data is reachable; emit an unseekable map and stop resolving.
    Unseekable,
}

/// Tracks discovered seek-head and cue positions and decides, at each
/// top-level read position, whether to jump.
///
/// Four mutually exclusive conditions, in priority order: visit a pending
/// seek head (LIFO), visit the cues, return to the position interrupted by
/// the cues jump, return to the position interrupted by a seek-head jump.
/// The two returns are taken one per check, so a cues jump made from
/// inside a seek-head detour still unwinds to the interrupted media
/// position before the resolver goes quiet.
#[derive(Debug, Default)]
pub struct SeekHeadResolver {
    active: bool,
    pending: Vec<u64>,
    visited: HashSet<u64>,
    cues_position: Option<u64>,
    cues_visited: bool,
    return_after_cues: Option<u64>,
    return_after_seek_head: Option<u64>,
    seek_map_sent: bool,
}

impl SeekHeadResolver {
    /// Record a SeekHead element position discovered in a Seek entry.
    pub fn add_seek_head(&mut self, position: u64) {
        if !self.visited.contains(&position) {
            self.pending.push(position);
        }
    }

    /// Record the Cues element position discovered in a Seek entry.
    pub fn set_cues_position(&mut self, position: u64) {
        if self.cues_position.is_none() {
            self.cues_position = Some(position);
        }
    }

    /// Start resolving. Called when media data is reached before any seek
    /// map was emitted.
    pub fn activate(&mut self) {
        self.active = true;
    }

    /// Whether resolution is in progress.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Note that the seek map went out; the resolver only returns to
    /// interrupted positions afterwards.
    pub fn mark_seek_map_sent(&mut self) {
        self.seek_map_sent = true;
    }

    /// Whether the seek map has been emitted.
    pub fn seek_map_sent(&self) -> bool {
        self.seek_map_sent
    }

    /// Decide the action for the current read position. `length` bounds
    /// candidate targets when the stream size is known; out-of-range
    /// candidates are discarded, not errors.
    pub fn next_action(&mut self, position: u64, length: Option<u64>) -> NextAction {
        if !self.active {
            return NextAction::Continue;
        }
        let in_bounds =
            |target: u64| -> bool { length.map_or(true, |len| target < len) };

        // Last discovered, first visited.
        while let Some(target) = self.pending.pop() {
            if !self.visited.insert(target) || !in_bounds(target) {
                continue;
            }
            if target == position {
                return NextAction::Continue;
            }
            if self.return_after_seek_head.is_none() {
                self.return_after_seek_head = Some(position);
            }
            return NextAction::Jump(target);
        }

        if let Some(target) = self.cues_position {
            if !self.cues_visited {
                self.cues_visited = true;
                if target == position {
                    // Already there; the parser consumes the Cues inline.
                    return NextAction::Continue;
                }
                if in_bounds(target) {
                    if self.return_after_cues.is_none() {
                        self.return_after_cues = Some(position);
                    }
                    return NextAction::Jump(target);
                }
            }
        }

        if self.seek_map_sent {
            if let Some(target) = self.return_after_cues.take() {
                // A media return may still be pending behind this one.
                if self.return_after_seek_head.is_none() {
                    self.active = false;
                }
                if target == position {
                    return NextAction::Continue;
                }
                return NextAction::Jump(target);
            }
            if let Some(target) = self.return_after_seek_head.take() {
                self.active = false;
                if target == position {
                    return NextAction::Continue;
                }
                return NextAction::Jump(target);
            }
            self.active = false;
            return NextAction::Continue;
        }

        // Every candidate is exhausted and no cues surfaced.
        NextAction::Unseekable
    }

    /// Drop transient state on an external seek. Discovered positions stay
    /// (they describe the file, not the parse), but interrupted-position
    /// bookkeeping is no longer meaningful.
    pub fn reset(&mut self) {
        self.return_after_cues = None;
        self.return_after_seek_head = None;
        self.active = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inactive_never_jumps() {
        let mut resolver = SeekHeadResolver::default();
        resolver.add_seek_head(500);
        assert_eq!(resolver.next_action(100, None), NextAction::Continue);
    }

    #[test]
    fn test_pending_seek_heads_visited_lifo() {
        let mut resolver = SeekHeadResolver::default();
        resolver.add_seek_head(500);
        resolver.add_seek_head(900);
        resolver.activate();
        assert_eq!(resolver.next_action(100, None), NextAction::Jump(900));
        assert_eq!(resolver.next_action(900, None), NextAction::Jump(500));
    }

    #[test]
    fn test_cues_jump_and_return() {
        let mut resolver = SeekHeadResolver::default();
        resolver.set_cues_position(8000);
        resolver.activate();
        assert_eq!(resolver.next_action(100, None), NextAction::Jump(8000));
        // Cues parsed, map emitted; the resolver sends us back.
        resolver.mark_seek_map_sent();
        assert_eq!(resolver.next_action(8500, None), NextAction::Jump(100));
        assert!(!resolver.is_active());
    }

    #[test]
    fn test_seek_head_then_cues_then_both_returns() {
        let mut resolver = SeekHeadResolver::default();
        resolver.add_seek_head(9000);
        resolver.activate();
        assert_eq!(resolver.next_action(100, None), NextAction::Jump(9000));
        // The seek head named the cues.
        resolver.set_cues_position(7000);
        assert_eq!(resolver.next_action(9050, None), NextAction::Jump(7000));
        resolver.mark_seek_map_sent();
        // First unwind to the spot the cues jump interrupted, then to the
        // media position the seek-head jump interrupted.
        assert_eq!(resolver.next_action(7400, None), NextAction::Jump(9050));
        assert!(resolver.is_active());
        assert_eq!(resolver.next_action(9050, None), NextAction::Jump(100));
        assert!(!resolver.is_active());
        assert_eq!(resolver.next_action(100, None), NextAction::Continue);
    }

    #[test]
    fn test_never_visits_same_position_twice() {
        let mut resolver = SeekHeadResolver::default();
        resolver.activate();
        resolver.add_seek_head(500);
        assert_eq!(resolver.next_action(100, None), NextAction::Jump(500));
        // The seek head at 500 references itself and its sibling again.
        resolver.add_seek_head(500);
        resolver.add_seek_head(600);
        assert_eq!(resolver.next_action(500, None), NextAction::Jump(600));
        resolver.add_seek_head(600);
        resolver.add_seek_head(500);
        // Both already visited, no cues anywhere: unseekable.
        assert_eq!(resolver.next_action(600, None), NextAction::Unseekable);
    }

    #[test]
    fn test_out_of_bounds_candidates_discarded() {
        let mut resolver = SeekHeadResolver::default();
        resolver.activate();
        resolver.add_seek_head(5000);
        assert_eq!(resolver.next_action(100, Some(1000)), NextAction::Unseekable);

        let mut resolver = SeekHeadResolver::default();
        resolver.activate();
        resolver.set_cues_position(5000);
        assert_eq!(resolver.next_action(100, Some(1000)), NextAction::Unseekable);
    }

    #[test]
    fn test_unseekable_when_nothing_discovered() {
        let mut resolver = SeekHeadResolver::default();
        resolver.activate();
        assert_eq!(resolver.next_action(100, None), NextAction::Unseekable);
    }

    #[test]
    fn test_candidate_at_current_position_continues() {
        let mut resolver = SeekHeadResolver::default();
        resolver.activate();
        resolver.set_cues_position(100);
        assert_eq!(resolver.next_action(100, None), NextAction::Continue);
        // The inline parse emits the map; nothing is pending afterwards.
        resolver.mark_seek_map_sent();
        assert_eq!(resolver.next_action(150, None), NextAction::Continue);
        assert!(!resolver.is_active());
    }

    #[test]
    fn test_unseekable_fallback_keeps_media_return() {
        let mut resolver = SeekHeadResolver::default();
        resolver.activate();
        resolver.add_seek_head(500);
        assert_eq!(resolver.next_action(100, None), NextAction::Jump(500));
        // The seek head named nothing useful.
        assert_eq!(resolver.next_action(560, None), NextAction::Unseekable);
        // Once the unseekable map is out, the interrupted media position
        // is still the place to resume.
        resolver.mark_seek_map_sent();
        assert_eq!(resolver.next_action(560, None), NextAction::Jump(100));
        assert!(!resolver.is_active());
    }
}
