#[cfg(test)]
mod stream_buffer_test;

use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, Result};
use crate::frame::Frame;

pub const DEFAULT_MAX_MISSES: usize = 5;

/// Lookahead report: the sequence number at the window origin and how many
/// frames are ready as a contiguous run from there.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Lookahead {
    pub sequence_number: u16,
    pub frames_ready: usize,
}

struct State {
    lowest_acceptable_ssrc: u32,
    top_acceptable_ssrc: u32,
    blocked_ssrc: u32,

    // slot i holds the frame with sequence window_start + i, or nothing
    frames: Vec<Option<Frame>>,

    stream_started: bool,
    window_start: u16,

    misses: usize,
    max_misses: usize,
    resets: u64,
}

impl State {
    fn reset(&mut self, window_start: u16) {
        self.window_start = window_start;
        self.misses = 0;
        self.stream_started = false;
        for slot in self.frames.iter_mut() {
            *slot = None;
        }
        self.resets += 1;
        log::info!("stream reset - new sliding window start at {window_start}");
    }

    fn accepts(&self, ssrc: u32) -> bool {
        ssrc != self.blocked_ssrc
            && self.lowest_acceptable_ssrc <= ssrc
            && ssrc <= self.top_acceptable_ssrc
    }
}

/// Sliding-window reorder buffer for a single SSRC.
///
/// Holds a window of `capacity` consecutive sequence numbers starting at
/// the window origin. All operations are serialised by one atomic
/// test-and-set flag, so the buffer may be driven from an audio thread
/// running in parallel with the event loop; contending calls spin for the
/// duration of a single operation.
pub struct StreamBuffer {
    in_use: AtomicBool,
    state: UnsafeCell<State>,
}

// access to `state` only happens through `lock()`, which enforces
// exclusivity via the `in_use` flag
unsafe impl Send for StreamBuffer {}
unsafe impl Sync for StreamBuffer {}

struct StateGuard<'a> {
    buffer: &'a StreamBuffer,
}

impl Deref for StateGuard<'_> {
    type Target = State;

    fn deref(&self) -> &State {
        unsafe { &*self.buffer.state.get() }
    }
}

impl DerefMut for StateGuard<'_> {
    fn deref_mut(&mut self) -> &mut State {
        unsafe { &mut *self.buffer.state.get() }
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        self.buffer.in_use.store(false, Ordering::Release);
    }
}

impl StreamBuffer {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::ErrZeroCapacity);
        }

        let mut frames = Vec::with_capacity(capacity);
        frames.resize_with(capacity, || None);

        Ok(Self {
            in_use: AtomicBool::new(false),
            state: UnsafeCell::new(State {
                lowest_acceptable_ssrc: 0,
                top_acceptable_ssrc: 0,
                blocked_ssrc: 0,
                frames,
                stream_started: false,
                window_start: 0,
                misses: 0,
                max_misses: DEFAULT_MAX_MISSES,
                resets: 0,
            }),
        })
    }

    fn lock(&self) -> StateGuard<'_> {
        // the buffer is never held for longer than one operation
        while self.in_use.swap(true, Ordering::Acquire) {
            std::hint::spin_loop();
        }
        StateGuard { buffer: self }
    }

    /// Sets the inclusive SSRC admission range and resets the window.
    ///
    /// A mis-ordered range is swapped. A range starting at zero is refused;
    /// use [`StreamBuffer::refuse_all`] to stop accepting.
    pub fn accept(&self, bottom_ssrc: u32, top_ssrc: u32) -> bool {
        let (bottom, top) = if bottom_ssrc > top_ssrc {
            (top_ssrc, bottom_ssrc)
        } else {
            (bottom_ssrc, top_ssrc)
        };

        if bottom == 0 {
            log::warn!("cannot accept SSRC 0");
            return false;
        }

        let mut state = self.lock();
        state.lowest_acceptable_ssrc = bottom;
        state.top_acceptable_ssrc = top;
        state.reset(0);
        true
    }

    /// Blocks a single SSRC; a later call replaces the previous block.
    /// Does not affect the admission range.
    pub fn block(&self, ssrc: u32) {
        let mut state = self.lock();
        state.blocked_ssrc = ssrc;
    }

    /// Clears the admission range and resets the window.
    pub fn refuse_all(&self) {
        let mut state = self.lock();
        state.lowest_acceptable_ssrc = 0;
        state.top_acceptable_ssrc = 0;
        state.reset(0);
    }

    /// Number of consecutive out-of-window insertions that trigger a
    /// stream reset.
    pub fn set_max_misses(&self, max_misses: usize) {
        let mut state = self.lock();
        state.max_misses = max_misses;
    }

    /// How often the stream has been reset since creation.
    pub fn reset_count(&self) -> u64 {
        self.lock().resets
    }

    /// Stores a frame at its window position.
    ///
    /// Returns false when the frame is refused by the admission policy,
    /// is a duplicate, or lies outside the window. Out-of-window frames
    /// count as misses; reaching the miss limit resets the stream to the
    /// latest offending sequence number.
    pub fn put(&self, frame: Frame) -> bool {
        let mut state = self.lock();

        let ssrc = frame.ssrc();
        let seq = frame.sequence_number();

        if !state.accepts(ssrc) {
            log::warn!(
                "received wrong SSRC - expected between {} and {} - blocked {}, got {}",
                state.lowest_acceptable_ssrc,
                state.top_acceptable_ssrc,
                state.blocked_ssrc,
                ssrc
            );
            return false;
        }

        if !state.stream_started {
            log::debug!("starting new stream SSRC: {ssrc} - seq: {seq}");
            state.stream_started = true;
            state.window_start = seq;
            state.frames[0] = Some(frame);
            return true;
        }

        let index = seq.wrapping_sub(state.window_start) as usize;

        if index >= state.frames.len() {
            log::debug!(
                "frame outside sliding window: SSRC {} seq {} window {} to {}",
                ssrc,
                seq,
                state.window_start,
                state.window_start.wrapping_add(state.frames.len() as u16)
            );
            state.misses += 1;
            if state.misses >= state.max_misses {
                state.reset(seq);
            }
            return false;
        }

        if state.frames[index].is_some() {
            log::debug!("got doublette SSRC {ssrc} - seq {seq}");
            return false;
        }

        state.frames[index] = Some(frame);
        state.misses = 0;
        true
    }

    /// Reports the window origin and the length of the contiguous run of
    /// frames ready there. `frames_ready` is zero while slot 0 is empty.
    pub fn lookahead(&self) -> Lookahead {
        let state = self.lock();

        let first = match &state.frames[0] {
            Some(frame) => frame,
            None => return Lookahead::default(),
        };

        let mut seq = first.sequence_number();
        let mut ready = 1;
        for slot in state.frames[1..].iter() {
            match slot {
                Some(frame) if frame.sequence_number() == seq.wrapping_add(1) => {
                    seq = seq.wrapping_add(1);
                    ready += 1;
                }
                _ => break,
            }
        }

        Lookahead {
            sequence_number: first.sequence_number(),
            frames_ready: ready,
        }
    }

    /// Pops up to `want` frames from the contiguous prefix into `out` and
    /// shifts the window past them. The 16 bit wrap of the window origin
    /// is intentional.
    pub fn get(&self, out: &mut Vec<Frame>, want: usize) -> usize {
        let mut state = self.lock();

        let mut popped = 0;
        while popped < want && popped < state.frames.len() {
            match state.frames[popped].take() {
                Some(frame) => {
                    out.push(frame);
                    popped += 1;
                }
                None => break,
            }
        }

        if popped > 0 {
            // vacated slots rotate to the back as empties
            state.frames.rotate_left(popped);
            state.window_start = state.window_start.wrapping_add(popped as u16);
        }

        popped
    }
}

impl fmt::Debug for StreamBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        writeln!(f, "StreamBuffer window start {}:", state.window_start)?;
        for (i, slot) in state.frames.iter().enumerate() {
            if let Some(frame) = slot {
                writeln!(
                    f,
                    "  slot {}: SSRC {} seq {}",
                    i,
                    frame.ssrc(),
                    frame.sequence_number()
                )?;
            }
        }
        Ok(())
    }
}
