//! Pull-based byte-stream abstraction consumed by the demuxer.
//!
//! The demuxer never blocks on I/O itself: every operation on a
//! [`StreamInput`] returns a tri-state [`ReadStatus`] so the call site stays
//! in control of scheduling. A `NotReady` result means "retry later at the
//! same logical offset"; the demuxer suspends its current step and resumes
//! from the same sub-state when re-invoked.

use crate::error::{DemuxError, Result};

/// Outcome of a single input operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// The operation transferred this many bytes (possibly fewer than
    /// requested). Zero is never returned here.
    Ready(usize),
    /// No bytes are available yet; retry later at the same offset.
    NotReady,
    /// The end of the stream has been reached.
    Ended,
}

/// Completion state of a multi-step demuxer operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// The operation finished.
    Done,
    /// The operation is suspended waiting for more input.
    Pending,
}

/// A random-access byte stream with sequential read, skip, and
/// peek-without-consuming support.
pub trait StreamInput {
    /// Read up to `buf.len()` bytes, advancing the read position.
    fn read(&mut self, buf: &mut [u8]) -> Result<ReadStatus>;

    /// Copy up to `buf.len()` bytes without advancing the read position.
    fn peek(&mut self, buf: &mut [u8]) -> Result<ReadStatus>;

    /// Skip up to `length` bytes, advancing the read position.
    fn skip(&mut self, length: u64) -> Result<ReadStatus>;

    /// Absolute read position in bytes.
    fn position(&self) -> u64;

    /// Total stream length in bytes, if known.
    fn length(&self) -> Option<u64>;
}

/// An in-memory [`StreamInput`] over a byte vector.
///
/// Used by tests and by callers that already hold the whole file. Never
/// reports `NotReady`.
#[derive(Debug, Clone)]
pub struct SliceInput {
    data: Vec<u8>,
    pos: usize,
}

impl SliceInput {
    /// Create an input over the given bytes, positioned at offset zero.
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }

    /// Reposition the stream. Used by callers acting on a seek request.
    pub fn seek_to(&mut self, position: u64) {
        self.pos = (position as usize).min(self.data.len());
    }
}

impl StreamInput for SliceInput {
    fn read(&mut self, buf: &mut [u8]) -> Result<ReadStatus> {
        let remaining = self.data.len() - self.pos;
        if remaining == 0 {
            return Ok(ReadStatus::Ended);
        }
        let n = buf.len().min(remaining);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(ReadStatus::Ready(n))
    }

    fn peek(&mut self, buf: &mut [u8]) -> Result<ReadStatus> {
        let remaining = self.data.len() - self.pos;
        if remaining == 0 {
            return Ok(ReadStatus::Ended);
        }
        let n = buf.len().min(remaining);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        Ok(ReadStatus::Ready(n))
    }

    fn skip(&mut self, length: u64) -> Result<ReadStatus> {
        let remaining = (self.data.len() - self.pos) as u64;
        if remaining == 0 {
            return Ok(ReadStatus::Ended);
        }
        let n = length.min(remaining);
        self.pos += n as usize;
        Ok(ReadStatus::Ready(n as usize))
    }

    fn position(&self) -> u64 {
        self.pos as u64
    }

    fn length(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }
}

/// Incremental accumulator for fixed-size reads that may span multiple
/// `NotReady` suspensions.
#[derive(Debug, Default)]
pub(crate) struct Scratch {
    buf: Vec<u8>,
    filled: usize,
    target: usize,
    active: bool,
}

impl Scratch {
    /// Begin collecting `target` bytes, discarding any previous content.
    pub fn begin(&mut self, target: usize) {
        self.buf.resize(target, 0);
        self.filled = 0;
        self.target = target;
        self.active = true;
    }

    /// Whether a collection is in progress or complete but not yet taken.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Pull bytes from `input` until `target` bytes are collected.
    pub fn fill(&mut self, input: &mut dyn StreamInput) -> Result<Progress> {
        while self.filled < self.target {
            match input.read(&mut self.buf[self.filled..self.target])? {
                ReadStatus::Ready(n) => self.filled += n,
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

    /// The collected bytes. Only valid once `fill` returned `Done`.
    pub fn data(&self) -> &[u8] {
        &self.buf[..self.target]
    }

    /// Finish the collection, releasing the scratch for reuse.
    pub fn finish(&mut self) {
        self.active = false;
    }
}

/// Skip exactly `remaining` bytes, updating the counter across suspensions.
pub(crate) fn skip_fully(input: &mut dyn StreamInput, remaining: &mut u64) -> Result<Progress> {
    while *remaining > 0 {
        match input.skip(*remaining)? {
            ReadStatus::Ready(n) => *remaining -= n as u64,
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

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Wraps a [`SliceInput`] and reports `NotReady` on every other call,
    /// delivering at most one byte at a time, to exercise suspension paths.
    pub(crate) struct ThrottledInput {
        inner: SliceInput,
        starve: bool,
    }

    impl ThrottledInput {
        pub fn new(data: Vec<u8>) -> Self {
            Self {
                inner: SliceInput::new(data),
                starve: true,
            }
        }

        pub fn seek_to(&mut self, position: u64) {
            self.inner.seek_to(position);
        }
    }

    impl StreamInput for ThrottledInput {
        fn read(&mut self, buf: &mut [u8]) -> Result<ReadStatus> {
            self.starve = !self.starve;
            if self.starve {
                return Ok(ReadStatus::NotReady);
            }
            let want = buf.len().min(1);
            self.inner.read(&mut buf[..want])
        }

        fn peek(&mut self, buf: &mut [u8]) -> Result<ReadStatus> {
            self.starve = !self.starve;
            if self.starve {
                return Ok(ReadStatus::NotReady);
            }
            let want = buf.len().min(1);
            self.inner.peek(&mut buf[..want])
        }

        fn skip(&mut self, length: u64) -> Result<ReadStatus> {
            self.starve = !self.starve;
            if self.starve {
                return Ok(ReadStatus::NotReady);
            }
            self.inner.skip(length.min(1))
        }

        fn position(&self) -> u64 {
            self.inner.position()
        }

        fn length(&self) -> Option<u64> {
            self.inner.length()
        }
    }
}
