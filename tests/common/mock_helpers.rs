//! Hand-rolled test doubles for the plugin contracts.

use sigflow_rs::{
    ChannelSpec, ConsumeInfo, FrameInfo, ProviderHandle, Result, Sensor, Sink, Stream,
    StreamShape, Transform,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Transform that adds one to every byte and counts its invocations.
pub struct AddOneTransform {
    steps: Arc<AtomicUsize>,
}

impl AddOneTransform {
    pub fn new() -> (Self, Arc<AtomicUsize>) {
        let steps = Arc::new(AtomicUsize::new(0));
        (
            Self {
                steps: Arc::clone(&steps),
            },
            steps,
        )
    }
}

impl Transform for AddOneTransform {
    fn name(&self) -> &str {
        "add-one"
    }

    fn step(&mut self, _info: FrameInfo, input: &Stream, output: &mut Stream, _extra: &[Stream]) {
        self.steps.fetch_add(1, Ordering::SeqCst);
        for (src, dst) in input.bytes().iter().zip(output.bytes_mut()) {
            *dst = src.wrapping_add(1);
        }
    }
}

/// Transform keeping every second sample (halves the output rate).
pub struct DecimateTransform;

impl Transform for DecimateTransform {
    fn name(&self) -> &str {
        "decimate"
    }

    fn count_out(&self, count_in: usize) -> usize {
        count_in / 2
    }

    fn step(&mut self, _info: FrameInfo, input: &Stream, output: &mut Stream, _extra: &[Stream]) {
        let frame_bytes = input.shape().frame_bytes();
        for i in 0..output.num() {
            let src = i * 2 * frame_bytes;
            let dst = i * frame_bytes;
            let sample = input.bytes()[src..src + frame_bytes].to_vec();
            output.bytes_mut()[dst..dst + frame_bytes].copy_from_slice(&sample);
        }
    }
}

/// Everything a [`RecordingSink`] has seen.
#[derive(Default)]
pub struct SinkRecord {
    /// (window start time, bytes of the first stream)
    pub consumed: Vec<(f64, Vec<u8>)>,
    /// (window start time, gap seconds)
    pub failed: Vec<(f64, f64)>,
    pub entered: bool,
    pub flushed: bool,
}

/// Sink that records every delivery for later assertions.
pub struct RecordingSink {
    record: Arc<Mutex<SinkRecord>>,
}

impl RecordingSink {
    pub fn new() -> (Self, Arc<Mutex<SinkRecord>>) {
        let record = Arc::new(Mutex::new(SinkRecord::default()));
        (
            Self {
                record: Arc::clone(&record),
            },
            record,
        )
    }
}

impl Sink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    fn enter(&mut self, _streams: &[Stream]) {
        self.record.lock().unwrap().entered = true;
    }

    fn consume(&mut self, info: ConsumeInfo, streams: &[Stream]) {
        self.record
            .lock()
            .unwrap()
            .consumed
            .push((info.time, streams[0].bytes().to_vec()));
    }

    fn consume_fail(&mut self, time: f64, gap: f64, _streams: &[Stream]) {
        self.record.lock().unwrap().failed.push((time, gap));
    }

    fn flush(&mut self, _streams: &[Stream]) {
        self.record.lock().unwrap().flushed = true;
    }
}

/// Sensor advertising one channel and never providing any data on its own.
/// The wired provider handle is parked for the test to drive directly.
pub struct SilentSensor {
    channel: ChannelSpec,
    pub handle: Arc<Mutex<Option<ProviderHandle>>>,
}

impl SilentSensor {
    pub fn new(name: &str, shape: StreamShape) -> Self {
        Self {
            channel: ChannelSpec::new(name, shape),
            handle: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_meta(name: &str, shape: StreamShape, meta: Vec<u8>) -> Self {
        Self {
            channel: ChannelSpec::new(name, shape).with_meta(meta),
            handle: Arc::new(Mutex::new(None)),
        }
    }
}

impl Sensor for SilentSensor {
    fn name(&self) -> &str {
        "silent"
    }

    fn channels(&self) -> Vec<ChannelSpec> {
        vec![self.channel.clone()]
    }

    fn set_provider(&mut self, channel: &str, provider: ProviderHandle) -> bool {
        if channel == self.channel.name {
            *self.handle.lock().unwrap() = Some(provider);
            true
        } else {
            false
        }
    }

    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        Ok(())
    }
}
