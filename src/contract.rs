//! Contracts between the runtime core and plugin code.
//!
//! Plugins never touch buffers or threads directly; they implement one of
//! the traits here and the runtime drives them. All three traits follow the
//! same enter / step / flush life cycle that the component threads mirror.
//!
//! - [`Transform`] - reprocesses an input window into an output window.
//!   The shape-mapping functions are pure and are called before any data
//!   flows so the runtime can size the downstream buffer.
//! - [`Sink`] - terminal stage; receives windows and produces nothing.
//! - [`Sensor`] - data origin; pushes samples into a [`ProviderHandle`]
//!   at its own cadence.

use crate::component::provider::ProviderHandle;
use crate::error::Result;
use crate::types::{SampleType, Stream, StreamShape};

/// Per-iteration context handed to [`Transform::step`].
#[derive(Debug, Clone, Copy)]
pub struct FrameInfo {
    /// Start time of the input window in seconds
    pub time: f64,
    /// New samples this iteration
    pub frame: usize,
    /// Extra look-ahead samples appended to the frame
    pub delta: usize,
}

/// Per-delivery context handed to [`Sink::consume`].
#[derive(Debug, Clone, Copy)]
pub struct ConsumeInfo {
    /// Start time of the delivered window in seconds
    pub time: f64,
    /// Length of the delivered window in seconds
    pub duration: f64,
}

/// A discrete external event addressed by time span, used to drive an
/// event consumer instead of a fixed cadence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamEvent {
    /// Event start time in seconds
    pub time: f64,
    /// Event duration in seconds
    pub duration: f64,
}

/// A transformation from one sample window to another.
///
/// The four shape-mapping functions describe the output stream as a pure
/// function of the input stream; the runtime uses them to allocate the
/// output buffer before the pipeline starts. `step` is then called once per
/// iteration with pre-sized streams.
pub trait Transform: Send {
    /// Display name used in logs and thread names.
    fn name(&self) -> &str {
        "transform"
    }

    /// Output channel count for a given input channel count.
    fn dimension_out(&self, dimension_in: usize) -> usize {
        dimension_in
    }

    /// Output scalar width for a given input scalar width.
    fn bytes_out(&self, bytes_in: usize) -> usize {
        bytes_in
    }

    /// Output scalar type for a given input scalar type.
    fn type_out(&self, type_in: SampleType) -> SampleType {
        type_in
    }

    /// Output sample count for `count_in` input samples. The ratio
    /// `count_out(frame) / frame` also fixes the output sample rate.
    fn count_out(&self, count_in: usize) -> usize {
        count_in
    }

    /// Called once before the run loop, with streams sized but empty.
    fn enter(&mut self, input: &Stream, output: &mut Stream, extra: &[Stream]) {
        let _ = (input, output, extra);
    }

    /// Transform one window. `output` is pre-adjusted to
    /// `count_out(input.num())` samples.
    fn step(&mut self, info: FrameInfo, input: &Stream, output: &mut Stream, extra: &[Stream]);

    /// Called once after the run loop ends.
    fn flush(&mut self, input: &Stream, output: &mut Stream, extra: &[Stream]) {
        let _ = (input, output, extra);
    }

    /// Rewrite the metadata blob forwarded downstream. The default forwards
    /// the upstream blob unchanged.
    fn rewrite_meta(&self, upstream: Option<&[u8]>) -> Option<Vec<u8>> {
        upstream.map(<[u8]>::to_vec)
    }
}

/// Terminal stage of a pipeline: receives windows, produces no buffer.
pub trait Sink: Send {
    /// Display name used in logs and thread names.
    fn name(&self) -> &str {
        "sink"
    }

    /// Called once before the run loop with the (empty) stream layout.
    fn enter(&mut self, streams: &[Stream]) {
        let _ = streams;
    }

    /// Deliver one window per input stream.
    fn consume(&mut self, info: ConsumeInfo, streams: &[Stream]);

    /// Previously-valid data became permanently unavailable: the window at
    /// `time` was evicted and `gap` seconds were skipped. Called once per
    /// gap, before the cursor moves past it.
    fn consume_fail(&mut self, time: f64, gap: f64, streams: &[Stream]) {
        let _ = (time, gap, streams);
    }

    /// Called once after the run loop ends.
    fn flush(&mut self, streams: &[Stream]) {
        let _ = streams;
    }
}

/// One output channel of a sensor.
#[derive(Debug, Clone)]
pub struct ChannelSpec {
    /// Channel name, unique within the sensor
    pub name: String,
    /// Shape of the samples this channel produces
    pub shape: StreamShape,
    /// Opaque metadata forwarded to the channel's buffer
    pub meta: Option<Vec<u8>>,
}

impl ChannelSpec {
    pub fn new(name: impl Into<String>, shape: StreamShape) -> Self {
        Self {
            name: name.into(),
            shape,
            meta: None,
        }
    }

    pub fn with_meta(mut self, meta: Vec<u8>) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// A device or data source that pushes samples into the pipeline.
///
/// The runtime wires a [`ProviderHandle`] into the sensor during assembly;
/// the sensor calls [`ProviderHandle::provide`] from whatever thread its
/// data arrives on. `connect`/`start` run when the pipeline starts,
/// `stop`/`disconnect` when it stops.
pub trait Sensor: Send {
    /// Display name used in logs and thread names.
    fn name(&self) -> &str;

    /// The channels this sensor offers.
    fn channels(&self) -> Vec<ChannelSpec>;

    /// Accept the provider for one of the advertised channels. Returns false
    /// when the channel name is unknown.
    fn set_provider(&mut self, channel: &str, provider: ProviderHandle) -> bool;

    fn connect(&mut self) -> Result<()>;
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    fn disconnect(&mut self) -> Result<()>;
}
