//! Streaming output buffer.
//!
//! A bounded FIFO of [`Frame`]s between application writers and the
//! interrupt handler. Writers block while the FIFO is full; the interrupt
//! handler only ever peeks and consumes, never waits.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::config::BufferConfig;
use crate::error::{M37Error, Result};
use crate::frame::{Frame, FRAME_BYTES};

/// How the output buffer is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferMode {
    /// No streaming: every write is committed directly
    #[default]
    UserControlled,
    /// Single current buffer (not supported by this module)
    CurrentBuffer,
    /// FIFO drained by the interrupt handler
    RingBuffer,
    /// FIFO that overwrites unread data (not supported by this module)
    RingOverwrite,
}

impl BufferMode {
    /// Convert from the raw status value.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::UserControlled),
            1 => Some(Self::CurrentBuffer),
            2 => Some(Self::RingBuffer),
            3 => Some(Self::RingOverwrite),
            _ => None,
        }
    }

    /// Raw status value.
    pub fn to_raw(self) -> u32 {
        match self {
            Self::UserControlled => 0,
            Self::CurrentBuffer => 1,
            Self::RingBuffer => 2,
            Self::RingOverwrite => 3,
        }
    }

    /// Whether the M37 can operate in this mode.
    pub fn is_supported(self) -> bool {
        matches!(self, Self::UserControlled | Self::RingBuffer)
    }
}

#[derive(Debug)]
struct BufferState {
    frames: VecDeque<Frame>,
    capacity: usize,
    mode: BufferMode,
    timeout: Option<Duration>,
    low_water: usize,
    low_water_signal: bool,
    low_water_events: u32,
    underruns: u32,
    debug_level: u32,
    closed: bool,
}

impl BufferState {
    fn fill_bytes(&self) -> usize {
        self.frames.len() * FRAME_BYTES
    }
}

/// Bounded frame FIFO with blocking writes.
#[derive(Debug)]
pub struct OutputBuffer {
    state: Mutex<BufferState>,
    /// Signalled whenever a slot is freed or the buffer is closed
    space: Condvar,
    /// Signalled on every low-water crossing
    low_water: Condvar,
}

impl OutputBuffer {
    /// Create a buffer with validated geometry.
    pub fn new(config: &BufferConfig) -> Result<Self> {
        config.validate()?;
        let capacity = config.size / FRAME_BYTES;
        debug!(
            capacity_frames = capacity,
            mode = ?config.mode,
            low_water = config.low_water,
            "Created output buffer"
        );

        Ok(Self {
            state: Mutex::new(BufferState {
                frames: VecDeque::with_capacity(capacity),
                capacity,
                mode: config.mode,
                timeout: config.timeout(),
                low_water: config.low_water,
                low_water_signal: false,
                low_water_events: 0,
                underruns: 0,
                debug_level: config.debug_level,
                closed: false,
            }),
            space: Condvar::new(),
            low_water: Condvar::new(),
        })
    }

    /// Enqueue `frames`, blocking while the buffer is full.
    ///
    /// The timeout applies to each stretch without progress; any consumed
    /// slot restarts it. Returns the number of bytes accepted.
    pub fn write_blocking(&self, frames: &[Frame]) -> Result<usize> {
        let mut state = self.state.lock();
        let mut written = 0usize;
        let mut deadline = state.timeout.map(|t| Instant::now() + t);

        loop {
            if state.closed {
                return Err(M37Error::invalid_state("output buffer closed"));
            }

            let before = written;
            while written < frames.len() && state.frames.len() < state.capacity {
                state.frames.push_back(frames[written]);
                written += 1;
            }
            if written == frames.len() {
                trace!(frames = written, fill = state.fill_bytes(), "Frames enqueued");
                return Ok(written * FRAME_BYTES);
            }
            if written > before {
                deadline = state.timeout.map(|t| Instant::now() + t);
            }

            match deadline {
                Some(deadline) => {
                    if self.space.wait_until(&mut state, deadline).timed_out()
                        && state.frames.len() >= state.capacity
                        && !state.closed
                    {
                        let timeout = state.timeout.unwrap_or_default();
                        warn!(
                            ?timeout,
                            written = written * FRAME_BYTES,
                            "Output buffer write timed out"
                        );
                        return Err(M37Error::BufferTimeout {
                            timeout,
                            written: written * FRAME_BYTES,
                        });
                    }
                }
                None => self.space.wait(&mut state),
            }
        }
    }

    /// Oldest queued frame, without removing it.
    pub fn peek_frame(&self) -> Option<Frame> {
        self.state.lock().frames.front().copied()
    }

    /// Hand the oldest frame to `send` and dequeue it.
    ///
    /// The buffer stays locked while `send` runs, so a concurrent `clear` or
    /// `close` cannot drop a frame other than the one sent. Returns the sent
    /// frame, or `None` when the buffer is empty.
    pub fn send_next(&self, send: impl FnOnce(Frame)) -> Option<Frame> {
        let mut state = self.state.lock();
        let frame = state.frames.front().copied()?;
        send(frame);

        let before = state.fill_bytes();
        state.frames.pop_front();
        let after = state.fill_bytes();

        if state.low_water_signal && before > state.low_water && after <= state.low_water {
            state.low_water_events = state.low_water_events.wrapping_add(1);
            trace!(fill = after, "Low-water mark reached");
            self.low_water.notify_all();
        }
        self.space.notify_one();
        Some(frame)
    }

    /// Count one interrupt that found the buffer empty.
    pub fn record_underrun(&self) {
        let mut state = self.state.lock();
        state.underruns = state.underruns.wrapping_add(1);
    }

    /// Wait until the fill level is at or below the low-water mark.
    ///
    /// Returns `false` on timeout.
    pub fn wait_low_water(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        let seen = state.low_water_events;
        loop {
            if state.fill_bytes() <= state.low_water || state.low_water_events != seen {
                return true;
            }
            if self.low_water.wait_until(&mut state, deadline).timed_out() {
                return state.fill_bytes() <= state.low_water
                    || state.low_water_events != seen;
            }
        }
    }

    /// Drop every queued frame.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.frames.clear();
        self.space.notify_all();
    }

    /// Drop every queued frame and fail all current and future writers.
    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.frames.clear();
        self.space.notify_all();
        self.low_water.notify_all();
    }

    /// Queued bytes.
    pub fn fill_level(&self) -> usize {
        self.state.lock().fill_bytes()
    }

    /// Capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.state.lock().capacity * FRAME_BYTES
    }

    /// Queued frames.
    pub fn len(&self) -> usize {
        self.state.lock().frames.len()
    }

    /// Whether no frame is queued.
    pub fn is_empty(&self) -> bool {
        self.state.lock().frames.is_empty()
    }

    /// Current buffer mode.
    pub fn mode(&self) -> BufferMode {
        self.state.lock().mode
    }

    /// Change the buffer mode. Unsupported modes are rejected.
    pub fn set_mode(&self, mode: BufferMode) -> Result<()> {
        if !mode.is_supported() {
            return Err(M37Error::invalid_parameter(format!(
                "buffer mode {:?} is not supported",
                mode
            )));
        }
        self.state.lock().mode = mode;
        Ok(())
    }

    /// Write timeout, `None` meaning wait forever.
    pub fn timeout(&self) -> Option<Duration> {
        self.state.lock().timeout
    }

    /// Set the write timeout; `None` or zero waits forever.
    pub fn set_timeout(&self, timeout: Option<Duration>) {
        self.state.lock().timeout = timeout.filter(|t| !t.is_zero());
    }

    /// Low-water mark in bytes.
    pub fn low_water(&self) -> usize {
        self.state.lock().low_water
    }

    /// Set the low-water mark (bytes, multiple of the frame size).
    pub fn set_low_water(&self, bytes: usize) -> Result<()> {
        if bytes % FRAME_BYTES != 0 {
            return Err(M37Error::invalid_parameter(format!(
                "low-water {} must be a multiple of {}",
                bytes, FRAME_BYTES
            )));
        }
        self.state.lock().low_water = bytes;
        Ok(())
    }

    /// Whether low-water crossings are signalled.
    pub fn low_water_signal(&self) -> bool {
        self.state.lock().low_water_signal
    }

    /// Enable or disable low-water signalling.
    pub fn set_low_water_signal(&self, enabled: bool) {
        self.state.lock().low_water_signal = enabled;
    }

    /// Low-water crossings seen since creation.
    pub fn low_water_events(&self) -> u32 {
        self.state.lock().low_water_events
    }

    /// Interrupts that found the buffer empty.
    pub fn underruns(&self) -> u32 {
        self.state.lock().underruns
    }

    /// Buffer debug level.
    pub fn debug_level(&self) -> u32 {
        self.state.lock().debug_level
    }

    /// Set the buffer debug level.
    pub fn set_debug_level(&self, level: u32) {
        self.state.lock().debug_level = level;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn ring(size: usize, timeout_ms: u64) -> OutputBuffer {
        OutputBuffer::new(&BufferConfig {
            size,
            mode: BufferMode::RingBuffer,
            timeout_ms,
            low_water: 8,
            debug_level: 0,
        })
        .unwrap()
    }

    fn frame(n: u16) -> Frame {
        Frame::new([n, n, n, n])
    }

    fn pop(buf: &OutputBuffer) -> Option<Frame> {
        buf.send_next(|_| {})
    }

    #[test]
    fn test_mode_raw_values() {
        for raw in 0..4 {
            assert_eq!(BufferMode::from_raw(raw).unwrap().to_raw(), raw);
        }
        assert_eq!(BufferMode::from_raw(4), None);
        assert!(BufferMode::RingBuffer.is_supported());
        assert!(!BufferMode::RingOverwrite.is_supported());
    }

    #[test]
    fn test_fifo_order() {
        let buf = ring(32, 100);
        assert_eq!(buf.write_blocking(&[frame(1), frame(2)]).unwrap(), 16);
        assert_eq!(buf.fill_level(), 16);

        assert_eq!(buf.peek_frame(), Some(frame(1)));
        assert_eq!(buf.peek_frame(), Some(frame(1)));
        assert_eq!(pop(&buf), Some(frame(1)));
        assert_eq!(buf.peek_frame(), Some(frame(2)));
        assert_eq!(pop(&buf), Some(frame(2)));
        assert_eq!(buf.peek_frame(), None);
        assert_eq!(pop(&buf), None);
    }

    #[test]
    fn test_full_buffer_times_out() {
        let buf = ring(16, 20);
        let err = buf
            .write_blocking(&[frame(1), frame(2), frame(3)])
            .unwrap_err();
        match err {
            M37Error::BufferTimeout { written, .. } => assert_eq!(written, 16),
            other => panic!("expected buffer timeout, got {:?}", other),
        }
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_blocked_writer_resumes_after_consume() {
        let buf = Arc::new(ring(8, 0));
        buf.write_blocking(&[frame(1)]).unwrap();

        let writer = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || buf.write_blocking(&[frame(2)]))
        };

        thread::sleep(Duration::from_millis(20));
        assert_eq!(pop(&buf), Some(frame(1)));

        assert_eq!(writer.join().unwrap().unwrap(), 8);
        assert_eq!(buf.peek_frame(), Some(frame(2)));
    }

    #[test]
    fn test_close_fails_blocked_writer() {
        let buf = Arc::new(ring(8, 0));
        buf.write_blocking(&[frame(1)]).unwrap();

        let writer = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || buf.write_blocking(&[frame(2)]))
        };
        thread::sleep(Duration::from_millis(20));
        buf.close();

        let err = writer.join().unwrap().unwrap_err();
        assert!(matches!(err, M37Error::InvalidState { .. }));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_send_next_hands_over_head_frame() {
        let buf = ring(32, 100);
        buf.write_blocking(&[frame(1), frame(2)]).unwrap();

        let mut sent = Vec::new();
        assert_eq!(buf.send_next(|f| sent.push(f)), Some(frame(1)));
        assert_eq!(sent, vec![frame(1)]);
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.send_next(|f| sent.push(f)), Some(frame(2)));
        assert_eq!(buf.send_next(|f| sent.push(f)), None);
        assert_eq!(sent, vec![frame(1), frame(2)]);
    }

    #[test]
    fn test_send_next_excludes_clear() {
        let buf = Arc::new(ring(32, 100));
        buf.write_blocking(&[frame(1), frame(2)]).unwrap();

        let clearer = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(5));
                buf.clear();
            })
        };
        // The clear lands while the frame is being sent; it must wait
        let sent = buf.send_next(|_| thread::sleep(Duration::from_millis(30)));
        clearer.join().unwrap();

        assert_eq!(sent, Some(frame(1)));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_clear_releases_blocked_writer() {
        let buf = Arc::new(ring(8, 0));
        buf.write_blocking(&[frame(1)]).unwrap();

        let writer = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || buf.write_blocking(&[frame(2)]))
        };
        thread::sleep(Duration::from_millis(20));
        buf.clear();

        assert_eq!(writer.join().unwrap().unwrap(), 8);
        assert_eq!(pop(&buf), Some(frame(2)));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_low_water_signal() {
        let buf = ring(32, 100);
        buf.set_low_water(8).unwrap();
        buf.set_low_water_signal(true);
        buf.write_blocking(&[frame(1), frame(2), frame(3)]).unwrap();

        assert!(!buf.wait_low_water(Duration::from_millis(5)));
        pop(&buf);
        assert_eq!(buf.low_water_events(), 0);
        pop(&buf);
        assert_eq!(buf.low_water_events(), 1);
        assert!(buf.wait_low_water(Duration::from_millis(5)));
    }

    #[test]
    fn test_setters_validate() {
        let buf = ring(32, 100);
        assert!(buf.set_low_water(12).is_err());
        assert!(buf.set_mode(BufferMode::CurrentBuffer).is_err());
        assert_eq!(buf.mode(), BufferMode::RingBuffer);

        buf.set_timeout(Some(Duration::ZERO));
        assert_eq!(buf.timeout(), None);
        buf.record_underrun();
        assert_eq!(buf.underruns(), 1);
        assert_eq!(buf.capacity(), 32);
    }
}
