//! Time-indexed ring buffer core.
//!
//! A [`TimeBuffer`] stores a rolling window of the most recent N samples for
//! one stream shape and answers time-addressed reads. It is a plain data
//! structure: it never blocks and knows nothing about threads. The registry
//! wraps every buffer in a mutex and layers the blocking/wake discipline on
//! top, so all methods here run under that lock.
//!
//! # Time model
//!
//! The buffer counts samples monotonically since the last reset (`head`).
//! Sample `i` covers the time span starting at `offset + i / rate`. Pushes
//! only ever advance `head`; once more than `capacity` samples have been
//! written, the oldest are overwritten in place.
//!
//! `sync` re-anchors `offset` so that the buffer's notion of "now" matches
//! the orchestrator's elapsed wall-clock time. Providers call it
//! periodically to correct drift between sample-count-derived time and the
//! wall clock.
//!
//! # Read outcomes
//!
//! A read either succeeds or reports one of the [`ReadError`] conditions.
//! The split that matters for callers: a window *beyond* what has been
//! written is a soft miss (wait for data and retry), a window already
//! *evicted* by the ring is a hard miss (the data is gone for good).

use crate::error::{Result, SigFlowError};
use crate::types::{Stream, StreamShape};

/// Why a time-addressed read could not be served. `NotInBufferYet` is the
/// only transient condition; everything else is permanent for that request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadError {
    /// Window extends beyond the current write position; retry after new data
    NotInBufferYet,
    /// Window has been overwritten by the ring; the data is gone
    NotInBufferAnymore,
    /// Caller-provided destination is too small for the requested window
    DestinationTooSmall,
    /// Requested duration exceeds the buffer capacity
    DurationTooLarge,
    /// Requested duration rounds to zero samples
    DurationTooSmall,
}

impl ReadError {
    /// True for misses that a caller should wait out and retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, ReadError::NotInBufferYet)
    }
}

/// Fixed-capacity ring store of samples, addressed by a monotonic write
/// position and queried by time + duration.
#[derive(Debug)]
pub struct TimeBuffer {
    shape: StreamShape,
    /// Capacity in samples; fixed at construction
    capacity: u64,
    data: Vec<u8>,
    /// Total samples written since the last reset
    head: u64,
    /// Wall-clock anchor of sample 0, in seconds
    offset: f64,
    meta: Option<Vec<u8>>,
}

impl TimeBuffer {
    /// Create a buffer holding up to `capacity` samples of the given shape.
    pub fn new(shape: StreamShape, capacity: u64) -> Self {
        let bytes = capacity as usize * shape.frame_bytes();
        Self {
            shape,
            capacity,
            data: vec![0; bytes],
            head: 0,
            offset: 0.0,
            meta: None,
        }
    }

    pub fn shape(&self) -> &StreamShape {
        &self.shape
    }

    /// Capacity in samples.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Capacity in seconds.
    pub fn capacity_seconds(&self) -> f64 {
        self.capacity as f64 / self.shape.sample_rate
    }

    /// Total samples written since the last reset (the next write position).
    pub fn write_position(&self) -> u64 {
        self.head
    }

    /// Time of the next sample to be written, in seconds.
    pub fn current_sample_time(&self) -> f64 {
        self.offset + self.head as f64 / self.shape.sample_rate
    }

    /// Wall-clock anchor of sample 0.
    pub fn offset_time(&self) -> f64 {
        self.offset
    }

    /// Attach an opaque metadata blob. Replaces any previous blob.
    pub fn set_meta(&mut self, meta: Vec<u8>) {
        self.meta = Some(meta);
    }

    pub fn meta(&self) -> Option<&[u8]> {
        self.meta.as_deref()
    }

    /// Re-anchor the sample clock so the buffer's "now" equals `elapsed`.
    pub fn sync(&mut self, elapsed: f64) {
        self.offset = elapsed - self.head as f64 / self.shape.sample_rate;
    }

    /// Clear stored samples and rewind the write position, anchoring sample 0
    /// at `offset` seconds. Metadata survives a reset.
    pub fn reset(&mut self, offset: f64) {
        self.head = 0;
        self.offset = offset;
    }

    /// Append `num` samples, overwriting the oldest once capacity is
    /// exceeded. Never blocks. Fails only on a byte-length/shape mismatch.
    pub fn push(&mut self, bytes: &[u8], num: u64) -> Result<()> {
        let fb = self.shape.frame_bytes();
        let expected = num as usize * fb;
        if bytes.len() != expected {
            return Err(SigFlowError::ShapeMismatch {
                expected,
                got: bytes.len(),
            });
        }
        if num == 0 {
            return Ok(());
        }

        // Past one full capacity only the tail can survive.
        let (mut pos, mut src, mut remaining) = if num > self.capacity {
            let skip = num - self.capacity;
            (self.head + skip, skip as usize * fb, self.capacity)
        } else {
            (self.head, 0usize, num)
        };

        while remaining > 0 {
            let idx = (pos % self.capacity) as usize;
            let run = ((self.capacity - pos % self.capacity).min(remaining)) as usize;
            self.data[idx * fb..(idx + run) * fb]
                .copy_from_slice(&bytes[src..src + run * fb]);
            pos += run as u64;
            src += run * fb;
            remaining -= run as u64;
        }

        self.head += num;
        Ok(())
    }

    /// Append `num` zero samples. Same overwrite semantics as [`push`].
    ///
    /// [`push`]: TimeBuffer::push
    pub fn push_zeros(&mut self, num: u64) {
        if num == 0 {
            return;
        }
        let fb = self.shape.frame_bytes();
        let (mut pos, mut remaining) = if num > self.capacity {
            (self.head + (num - self.capacity), self.capacity)
        } else {
            (self.head, num)
        };
        while remaining > 0 {
            let idx = (pos % self.capacity) as usize;
            let run = ((self.capacity - pos % self.capacity).min(remaining)) as usize;
            self.data[idx * fb..(idx + run) * fb].fill(0);
            pos += run as u64;
            remaining -= run as u64;
        }
        self.head += num;
    }

    /// Copy out the samples covering `[start_time, start_time + duration)`
    /// into `dst`, adjusting it to the window size. Never blocks.
    pub fn get(
        &self,
        dst: &mut Stream,
        start_time: f64,
        duration: f64,
    ) -> std::result::Result<(), ReadError> {
        let rate = self.shape.sample_rate;
        let num = (duration * rate).round() as i64;
        if num <= 0 {
            return Err(ReadError::DurationTooSmall);
        }
        if num as u64 > self.capacity {
            return Err(ReadError::DurationTooLarge);
        }

        let start = ((start_time - self.offset) * rate).round() as i64;
        if start < 0 {
            return Err(ReadError::NotInBufferAnymore);
        }

        dst.adjust(num as usize);
        dst.time = start_time;
        self.get_at(start as u64, num as u64, dst.bytes_mut())
    }

    /// Copy out `num` samples starting at absolute write position `position`.
    /// Position-addressed variant used by transformer read cursors.
    pub fn get_at(
        &self,
        position: u64,
        num: u64,
        dst: &mut [u8],
    ) -> std::result::Result<(), ReadError> {
        if num == 0 {
            return Err(ReadError::DurationTooSmall);
        }
        if num > self.capacity {
            return Err(ReadError::DurationTooLarge);
        }
        if position + num > self.head {
            return Err(ReadError::NotInBufferYet);
        }
        if self.head > self.capacity && position < self.head - self.capacity {
            return Err(ReadError::NotInBufferAnymore);
        }
        let fb = self.shape.frame_bytes();
        if dst.len() < num as usize * fb {
            return Err(ReadError::DestinationTooSmall);
        }

        let mut pos = position;
        let mut out = 0usize;
        let mut remaining = num;
        while remaining > 0 {
            let idx = (pos % self.capacity) as usize;
            let run = ((self.capacity - pos % self.capacity).min(remaining)) as usize;
            dst[out..out + run * fb].copy_from_slice(&self.data[idx * fb..(idx + run) * fb]);
            pos += run as u64;
            out += run * fb;
            remaining -= run as u64;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SampleType;

    fn buf(rate: f64, capacity: u64) -> TimeBuffer {
        TimeBuffer::new(StreamShape::new(rate, 1, SampleType::U8), capacity)
    }

    fn stream(rate: f64) -> Stream {
        Stream::new(StreamShape::new(rate, 1, SampleType::U8))
    }

    #[test]
    fn test_push_get_round_trip() {
        let mut b = buf(10.0, 100);
        let data: Vec<u8> = (0..40).collect();
        b.push(&data, 40).unwrap();

        let mut out = stream(10.0);
        b.get(&mut out, 0.0, 4.0).unwrap();
        assert_eq!(out.num(), 40);
        assert_eq!(out.bytes(), &data[..]);
    }

    #[test]
    fn test_partial_window() {
        let mut b = buf(10.0, 100);
        let data: Vec<u8> = (0..50).collect();
        b.push(&data, 50).unwrap();

        let mut out = stream(10.0);
        b.get(&mut out, 1.0, 2.0).unwrap();
        assert_eq!(out.bytes(), &data[10..30]);
        assert_eq!(out.time, 1.0);
    }

    #[test]
    fn test_future_window_is_soft_miss() {
        let mut b = buf(10.0, 100);
        b.push(&[1; 10], 10).unwrap();

        let mut out = stream(10.0);
        assert_eq!(
            b.get(&mut out, 0.5, 1.0).unwrap_err(),
            ReadError::NotInBufferYet
        );

        // Once enough data arrives, the identical request succeeds.
        b.push(&[2; 10], 10).unwrap();
        b.get(&mut out, 0.5, 1.0).unwrap();
        assert_eq!(out.bytes(), &[[1u8; 5].as_slice(), &[2u8; 5]].concat()[..]);
    }

    #[test]
    fn test_evicted_window_is_hard_miss() {
        let mut b = buf(10.0, 20);
        for i in 0..5u8 {
            b.push(&[i; 10], 10).unwrap();
        }
        // 50 samples written into capacity 20: the first window is gone.
        let mut out = stream(10.0);
        assert_eq!(
            b.get(&mut out, 0.0, 1.0).unwrap_err(),
            ReadError::NotInBufferAnymore
        );
        // The live tail is still byte-exact.
        b.get(&mut out, 3.0, 2.0).unwrap();
        assert_eq!(out.bytes(), &[[3u8; 10].as_slice(), &[4u8; 10]].concat()[..]);
    }

    #[test]
    fn test_wraparound_copy() {
        let mut b = buf(10.0, 16);
        let first: Vec<u8> = (0..12).collect();
        let second: Vec<u8> = (100..112).collect();
        b.push(&first, 12).unwrap();
        b.push(&second, 12).unwrap();

        let mut out = vec![0u8; 16];
        b.get_at(8, 16, &mut out).unwrap();
        let mut expected = first[8..].to_vec();
        expected.extend_from_slice(&second);
        assert_eq!(out, expected);
    }

    #[test]
    fn test_push_larger_than_capacity_keeps_tail() {
        let mut b = buf(10.0, 8);
        let data: Vec<u8> = (0..20).collect();
        b.push(&data, 20).unwrap();
        assert_eq!(b.write_position(), 20);

        let mut out = vec![0u8; 8];
        b.get_at(12, 8, &mut out).unwrap();
        assert_eq!(out, &data[12..]);
    }

    #[test]
    fn test_duration_bounds() {
        let mut b = buf(10.0, 20);
        b.push(&[0; 20], 20).unwrap();
        let mut out = stream(10.0);
        assert_eq!(
            b.get(&mut out, 0.0, 0.001).unwrap_err(),
            ReadError::DurationTooSmall
        );
        assert_eq!(
            b.get(&mut out, 0.0, 100.0).unwrap_err(),
            ReadError::DurationTooLarge
        );
    }

    #[test]
    fn test_destination_too_small() {
        let mut b = buf(10.0, 20);
        b.push(&[7; 10], 10).unwrap();
        let mut out = vec![0u8; 4];
        assert_eq!(
            b.get_at(0, 8, &mut out).unwrap_err(),
            ReadError::DestinationTooSmall
        );
    }

    #[test]
    fn test_push_shape_mismatch() {
        let mut b = TimeBuffer::new(StreamShape::new(10.0, 2, SampleType::I16), 20);
        assert!(matches!(
            b.push(&[0; 7], 2),
            Err(SigFlowError::ShapeMismatch { expected: 8, got: 7 })
        ));
    }

    #[test]
    fn test_sync_reanchors_clock() {
        let mut b = buf(10.0, 100);
        b.push(&[0; 10], 10).unwrap();
        assert_eq!(b.current_sample_time(), 1.0);

        // Wall clock says 1.5s have elapsed: the sample clock lags 0.5s.
        b.sync(1.5);
        assert_eq!(b.current_sample_time(), 1.5);
        assert_eq!(b.offset_time(), 0.5);

        // Time-addressed reads follow the new anchor.
        let mut out = stream(10.0);
        assert_eq!(
            b.get(&mut out, 0.0, 0.4).unwrap_err(),
            ReadError::NotInBufferAnymore
        );
        b.get(&mut out, 0.5, 1.0).unwrap();
    }

    #[test]
    fn test_reset_clears_but_keeps_meta() {
        let mut b = buf(10.0, 100);
        b.set_meta(vec![1, 2, 3]);
        b.push(&[9; 30], 30).unwrap();
        b.reset(2.0);
        assert_eq!(b.write_position(), 0);
        assert_eq!(b.offset_time(), 2.0);
        assert_eq!(b.meta(), Some(&[1u8, 2, 3][..]));

        let mut out = stream(10.0);
        assert_eq!(
            b.get(&mut out, 2.0, 1.0).unwrap_err(),
            ReadError::NotInBufferYet
        );
    }

    #[test]
    fn test_push_zeros() {
        let mut b = buf(10.0, 100);
        b.push(&[5; 10], 10).unwrap();
        b.push_zeros(10);
        let mut out = stream(10.0);
        b.get(&mut out, 0.0, 2.0).unwrap();
        assert_eq!(&out.bytes()[..10], &[5; 10]);
        assert_eq!(&out.bytes()[10..], &[0; 10]);
    }
}
