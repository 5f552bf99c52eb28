//! Core data types for the pipeline runtime
//!
//! This module contains the fundamental data structures shared by every other
//! module: scalar sample types, stream shapes, the [`Stream`] sample
//! container that moves between components, and duration-spec parsing.
//!
//! # Main Types
//!
//! - [`SampleType`] - Enum of supported scalar types (i8..u64, f32, f64, bool)
//! - [`StreamShape`] - Immutable description of a sample stream (rate,
//!   dimension, bytes per scalar, scalar type)
//! - [`Stream`] - A window of samples with its shape and start time
//! - [`BufferId`] - Generation-checked handle into the registry's buffer arena
//!
//! # Duration Specs
//!
//! Sizes that depend on a sample rate (buffer capacities, frame/delta sizes,
//! watch/sync intervals) are written as spec strings and resolved against the
//! rate of the stream they apply to:
//!
//! - `"512"` - plain sample count
//! - `"0.2s"` - seconds, scaled by the sample rate
//! - `"25ms"` - milliseconds, scaled by the sample rate

use crate::error::{Result, SigFlowError};
use serde::{Deserialize, Serialize};

/// Scalar type tag of the samples stored in a stream or buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SampleType {
    /// 8-bit signed integer
    I8,
    /// 8-bit unsigned integer
    U8,
    /// 16-bit signed integer
    I16,
    /// 16-bit unsigned integer
    U16,
    /// 32-bit signed integer
    I32,
    /// 32-bit unsigned integer
    U32,
    /// 64-bit signed integer
    I64,
    /// 64-bit unsigned integer
    U64,
    /// 32-bit float
    #[default]
    F32,
    /// 64-bit float
    F64,
    /// Boolean (stored as one byte)
    Bool,
}

impl SampleType {
    /// Size of one scalar of this type in bytes.
    pub fn size(&self) -> usize {
        match self {
            SampleType::I8 | SampleType::U8 | SampleType::Bool => 1,
            SampleType::I16 | SampleType::U16 => 2,
            SampleType::I32 | SampleType::U32 | SampleType::F32 => 4,
            SampleType::I64 | SampleType::U64 | SampleType::F64 => 8,
        }
    }

    /// Short name used in log output.
    pub fn name(&self) -> &'static str {
        match self {
            SampleType::I8 => "i8",
            SampleType::U8 => "u8",
            SampleType::I16 => "i16",
            SampleType::U16 => "u16",
            SampleType::I32 => "i32",
            SampleType::U32 => "u32",
            SampleType::I64 => "i64",
            SampleType::U64 => "u64",
            SampleType::F32 => "f32",
            SampleType::F64 => "f64",
            SampleType::Bool => "bool",
        }
    }
}

/// Immutable shape of a sample stream: rate, channel count, scalar width and
/// scalar type. Two streams with equal shapes are byte-compatible.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamShape {
    /// Sample rate in Hz
    pub sample_rate: f64,
    /// Number of channels per sample
    pub dimension: usize,
    /// Bytes per scalar
    pub sample_bytes: usize,
    /// Scalar type tag
    pub sample_type: SampleType,
}

impl StreamShape {
    pub fn new(sample_rate: f64, dimension: usize, sample_type: SampleType) -> Self {
        Self {
            sample_rate,
            dimension,
            sample_bytes: sample_type.size(),
            sample_type,
        }
    }

    /// Bytes occupied by one full sample (all channels).
    pub fn frame_bytes(&self) -> usize {
        self.dimension * self.sample_bytes
    }
}

/// Generation-checked handle to a buffer slot inside the registry.
///
/// Slot reuse bumps the generation counter, so a handle kept across a
/// `rem_buffer` is rejected instead of silently aliasing a new buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId {
    index: u32,
    generation: u32,
}

impl BufferId {
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// A window of samples: shape, start time, and the sample bytes themselves.
///
/// Streams are reused across iterations; [`Stream::adjust`] changes the
/// logical length while keeping the allocation, so the per-iteration hot path
/// does not allocate once it has warmed up.
#[derive(Debug, Clone)]
pub struct Stream {
    shape: StreamShape,
    /// Start time of the window in seconds
    pub time: f64,
    num: usize,
    data: Vec<u8>,
}

impl Stream {
    /// Create an empty stream of the given shape.
    pub fn new(shape: StreamShape) -> Self {
        Self {
            shape,
            time: 0.0,
            num: 0,
            data: Vec::new(),
        }
    }

    /// Create a stream holding `num` zeroed samples.
    pub fn with_samples(shape: StreamShape, num: usize) -> Self {
        let mut s = Self::new(shape);
        s.adjust(num);
        s
    }

    pub fn shape(&self) -> &StreamShape {
        &self.shape
    }

    pub fn sample_rate(&self) -> f64 {
        self.shape.sample_rate
    }

    pub fn dimension(&self) -> usize {
        self.shape.dimension
    }

    pub fn sample_type(&self) -> SampleType {
        self.shape.sample_type
    }

    /// Logical number of samples in the window.
    pub fn num(&self) -> usize {
        self.num
    }

    pub fn is_empty(&self) -> bool {
        self.num == 0
    }

    /// Resize to `num` logical samples, zero-filling any new tail bytes.
    pub fn adjust(&mut self, num: usize) {
        self.num = num;
        self.data.resize(num * self.shape.frame_bytes(), 0);
    }

    /// Drop the logical contents, keeping the allocation for reuse.
    pub fn reset(&mut self) {
        self.num = 0;
        self.time = 0.0;
        self.data.clear();
    }

    /// Zero-fill the current window.
    pub fn zero(&mut self) {
        self.data.fill(0);
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Copy raw sample bytes into the stream, adjusting it to `num` samples.
    ///
    /// Fails when the byte length disagrees with the shape.
    pub fn fill_from(&mut self, bytes: &[u8], num: usize) -> Result<()> {
        let expected = num * self.shape.frame_bytes();
        if bytes.len() != expected {
            return Err(SigFlowError::ShapeMismatch {
                expected,
                got: bytes.len(),
            });
        }
        self.adjust(num);
        self.data.copy_from_slice(bytes);
        Ok(())
    }

    /// True when at least one scalar in the window is non-zero, interpreting
    /// the bytes according to the sample type. Used for trigger gating, where
    /// value semantics matter (a float negative zero counts as zero).
    pub fn any_nonzero(&self) -> bool {
        match self.shape.sample_type {
            SampleType::I8 | SampleType::U8 | SampleType::Bool => {
                self.data.iter().any(|&b| b != 0)
            }
            SampleType::I16 | SampleType::U16 => self
                .data
                .chunks_exact(2)
                .any(|c| u16::from_ne_bytes([c[0], c[1]]) != 0),
            SampleType::I32 | SampleType::U32 => self
                .data
                .chunks_exact(4)
                .any(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]) != 0),
            SampleType::I64 | SampleType::U64 => self.data.chunks_exact(8).any(|c| {
                u64::from_ne_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) != 0
            }),
            SampleType::F32 => self
                .data
                .chunks_exact(4)
                .any(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]) != 0.0),
            SampleType::F64 => self.data.chunks_exact(8).any(|c| {
                f64::from_ne_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) != 0.0
            }),
        }
    }
}

/// Resolve a duration spec string to a sample count at the given rate.
///
/// Plain numbers are sample counts; a trailing `s` or `ms` scales seconds or
/// milliseconds by the rate. Results are rounded to the nearest sample.
pub fn parse_samples(spec: &str, sample_rate: f64) -> Result<u64> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Err(SigFlowError::DurationSpec(spec.to_string()));
    }
    if !(sample_rate.is_finite() && sample_rate > 0.0) {
        return Err(SigFlowError::DurationSpec(format!(
            "{spec} (invalid sample rate {sample_rate})"
        )));
    }

    let (value, scale) = if let Some(v) = spec.strip_suffix("ms") {
        (v, sample_rate / 1000.0)
    } else if let Some(v) = spec.strip_suffix('s') {
        (v, sample_rate)
    } else {
        (spec, 1.0)
    };

    let value: f64 = value
        .trim()
        .parse()
        .map_err(|_| SigFlowError::DurationSpec(spec.to_string()))?;
    if !value.is_finite() || value < 0.0 {
        return Err(SigFlowError::DurationSpec(spec.to_string()));
    }

    Ok((value * scale).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(rate: f64, dim: usize, ty: SampleType) -> StreamShape {
        StreamShape::new(rate, dim, ty)
    }

    #[test]
    fn test_sample_type_sizes() {
        assert_eq!(SampleType::U8.size(), 1);
        assert_eq!(SampleType::I16.size(), 2);
        assert_eq!(SampleType::F32.size(), 4);
        assert_eq!(SampleType::F64.size(), 8);
    }

    #[test]
    fn test_frame_bytes() {
        assert_eq!(shape(100.0, 3, SampleType::F32).frame_bytes(), 12);
        assert_eq!(shape(100.0, 1, SampleType::U8).frame_bytes(), 1);
    }

    #[test]
    fn test_stream_adjust_keeps_shape() {
        let mut s = Stream::new(shape(100.0, 2, SampleType::I16));
        s.adjust(10);
        assert_eq!(s.num(), 10);
        assert_eq!(s.bytes().len(), 10 * 4);
        s.adjust(5);
        assert_eq!(s.bytes().len(), 5 * 4);
    }

    #[test]
    fn test_fill_from_rejects_shape_mismatch() {
        let mut s = Stream::new(shape(100.0, 1, SampleType::F32));
        let err = s.fill_from(&[0u8; 7], 2).unwrap_err();
        assert!(matches!(err, SigFlowError::ShapeMismatch { .. }));
        assert!(s.fill_from(&[0u8; 8], 2).is_ok());
    }

    #[test]
    fn test_any_nonzero_float_negative_zero() {
        let mut s = Stream::new(shape(100.0, 1, SampleType::F32));
        s.adjust(2);
        s.bytes_mut()[..4].copy_from_slice(&(-0.0f32).to_ne_bytes());
        assert!(!s.any_nonzero(), "-0.0 must count as zero");
        s.bytes_mut()[4..].copy_from_slice(&1.5f32.to_ne_bytes());
        assert!(s.any_nonzero());
    }

    #[test]
    fn test_any_nonzero_integers() {
        let mut s = Stream::new(shape(100.0, 2, SampleType::I16));
        s.adjust(3);
        assert!(!s.any_nonzero());
        s.bytes_mut()[2] = 0x01;
        assert!(s.any_nonzero());
    }

    #[test]
    fn test_parse_samples_plain() {
        assert_eq!(parse_samples("512", 100.0).unwrap(), 512);
        assert_eq!(parse_samples(" 16 ", 8000.0).unwrap(), 16);
    }

    #[test]
    fn test_parse_samples_seconds() {
        assert_eq!(parse_samples("0.2s", 100.0).unwrap(), 20);
        assert_eq!(parse_samples("2.0s", 44100.0).unwrap(), 88200);
    }

    #[test]
    fn test_parse_samples_millis() {
        assert_eq!(parse_samples("25ms", 1000.0).unwrap(), 25);
        assert_eq!(parse_samples("100ms", 16000.0).unwrap(), 1600);
    }

    #[test]
    fn test_parse_samples_rejects_garbage() {
        assert!(parse_samples("", 100.0).is_err());
        assert!(parse_samples("abc", 100.0).is_err());
        assert!(parse_samples("-1s", 100.0).is_err());
        assert!(parse_samples("1s", 0.0).is_err());
    }

    #[test]
    fn test_buffer_id_equality() {
        assert_eq!(BufferId::new(3, 1), BufferId::new(3, 1));
        assert_ne!(BufferId::new(3, 1), BufferId::new(3, 2));
    }
}
