//! Consumer — reads frame+delta windows and delivers them to a sink.
//!
//! [`ConsumerBase`] holds the N-input read-and-deliver machinery shared by
//! the cadence-driven [`Consumer`] and the event-driven
//! [`EventConsumer`](crate::component::EventConsumer): per-stream optional
//! transforms, one optional trigger stream, and the `consume_fail` path for
//! permanently lost windows.

use crate::component::Runnable;
use crate::contract::{ConsumeInfo, FrameInfo, Sink, StreamEvent, Transform};
use crate::error::{Result, SigFlowError};
use crate::registry::{Registry, StreamReadError};
use crate::types::{parse_samples, BufferId, Stream, StreamShape};
use std::sync::Arc;

/// Probe size used to derive a transformed stream's rate from its
/// count-mapping ratio.
const RATE_PROBE: usize = 100_000;

pub(crate) struct ConsumerBase {
    registry: Arc<Registry>,
    sink: Box<dyn Sink + Send>,
    inputs: Vec<BufferId>,
    transforms: Vec<Option<Box<dyn Transform + Send>>>,
    trigger: Option<BufferId>,
    /// Pre-transform windows, only filled for transformed inputs
    raw: Vec<Stream>,
    /// The windows as delivered to the sink
    streams: Vec<Stream>,
    trigger_stream: Option<Stream>,
}

impl ConsumerBase {
    pub(crate) fn new(
        registry: Arc<Registry>,
        sources: &[BufferId],
        sink: Box<dyn Sink + Send>,
        transforms: Vec<Option<Box<dyn Transform + Send>>>,
        trigger: Option<BufferId>,
    ) -> Result<Self> {
        if sources.is_empty() {
            return Err(SigFlowError::Config(
                "consumer needs at least one source".to_string(),
            ));
        }
        if !transforms.is_empty() && transforms.len() != sources.len() {
            return Err(SigFlowError::Config(format!(
                "{} per-stream transforms for {} sources",
                transforms.len(),
                sources.len()
            )));
        }

        let mut raw = Vec::with_capacity(sources.len());
        let mut streams = Vec::with_capacity(sources.len());
        for (i, id) in sources.iter().enumerate() {
            let in_shape = registry.buffer_shape(*id)?;
            raw.push(Stream::new(in_shape));
            let delivered = match transforms.get(i).and_then(Option::as_ref) {
                Some(t) => {
                    let probe_out = t.count_out(RATE_PROBE);
                    let rate = in_shape.sample_rate * probe_out as f64 / RATE_PROBE as f64;
                    Stream::new(StreamShape {
                        sample_rate: rate,
                        dimension: t.dimension_out(in_shape.dimension),
                        sample_bytes: t.bytes_out(in_shape.sample_bytes),
                        sample_type: t.type_out(in_shape.sample_type),
                    })
                }
                None => Stream::new(in_shape),
            };
            streams.push(delivered);
        }

        let trigger_stream = match trigger {
            Some(id) => {
                let shape = registry.buffer_shape(id)?;
                if shape.dimension > 1 {
                    tracing::warn!("trigger stream has more than one dimension");
                }
                Some(Stream::new(shape))
            }
            None => None,
        };

        Ok(Self {
            registry,
            sink,
            inputs: sources.to_vec(),
            transforms,
            trigger,
            raw,
            streams,
            trigger_stream,
        })
    }

    pub(crate) fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub(crate) fn primary_input(&self) -> BufferId {
        self.inputs[0]
    }

    pub(crate) fn sink_name(&self) -> &str {
        self.sink.name()
    }

    pub(crate) fn enter_all(&mut self) {
        self.sink.enter(&self.streams);
        for (i, slot) in self.transforms.iter_mut().enumerate() {
            if let Some(transform) = slot {
                transform.enter(&self.raw[i], &mut self.streams[i], &[]);
            }
        }
    }

    pub(crate) fn flush_all(&mut self) {
        self.sink.flush(&self.streams);
        for (i, slot) in self.transforms.iter_mut().enumerate() {
            if let Some(transform) = slot {
                transform.flush(&self.raw[i], &mut self.streams[i], &[]);
            }
        }
        for stream in self.raw.iter_mut().chain(self.streams.iter_mut()) {
            stream.reset();
        }
        if let Some(trigger_stream) = &mut self.trigger_stream {
            trigger_stream.reset();
        }
    }

    /// Read the window for every stream and hand it to the sink. An
    /// all-zero trigger window skips the delivery but still counts as
    /// success, so the caller's cadence keeps advancing.
    pub(crate) fn consume(
        &mut self,
        info: ConsumeInfo,
    ) -> std::result::Result<(), StreamReadError> {
        if let Some(trigger_id) = self.trigger {
            if let Some(trigger_stream) = self.trigger_stream.as_mut() {
                self.registry
                    .get_data(trigger_id, trigger_stream, info.time, info.duration)?;
                if !trigger_stream.any_nonzero() {
                    return Ok(());
                }
            }
        }

        for (i, id) in self.inputs.iter().enumerate() {
            let transformed = self
                .transforms
                .get(i)
                .map(Option::is_some)
                .unwrap_or(false);
            let dst = if transformed {
                &mut self.raw[i]
            } else {
                &mut self.streams[i]
            };
            self.registry.get_data(*id, dst, info.time, info.duration)?;
        }

        for (i, slot) in self.transforms.iter_mut().enumerate() {
            if let Some(transform) = slot {
                let input = &self.raw[i];
                let out_num = transform.count_out(input.num());
                let output = &mut self.streams[i];
                output.adjust(out_num);
                transform.step(
                    FrameInfo {
                        time: info.time,
                        frame: input.num(),
                        delta: 0,
                    },
                    input,
                    output,
                    &[],
                );
            }
        }
        for stream in &mut self.streams {
            stream.time = info.time;
        }

        self.sink.consume(info, &self.streams);
        Ok(())
    }

    /// Report a permanently lost window to the sink.
    pub(crate) fn fail(&mut self, time: f64, gap: f64) {
        self.sink.consume_fail(time, gap, &self.streams);
    }

    /// Deliver one discrete event, mapping a hard miss to `consume_fail`.
    pub(crate) fn deliver(&mut self, event: StreamEvent) {
        let info = ConsumeInfo {
            time: event.time,
            duration: event.duration,
        };
        match self.consume(info) {
            Ok(()) => {}
            Err(e) if e.is_transient() => {}
            Err(e) => {
                tracing::warn!(
                    "event window no longer available ({:?}) '{}'",
                    e,
                    self.sink.name()
                );
                self.fail(event.time, event.duration);
            }
        }
    }
}

/// Cadence-driven consumer: one frame per iteration, blocking on the data.
pub struct Consumer {
    base: ConsumerBase,
    name: String,
    frame_sec: f64,
    delta_sec: f64,
    read_time: f64,
}

impl Consumer {
    pub(crate) fn create(
        registry: Arc<Registry>,
        sources: &[BufferId],
        sink: Box<dyn Sink + Send>,
        frame_size: &str,
        delta_size: Option<&str>,
        transforms: Vec<Option<Box<dyn Transform + Send>>>,
        trigger: Option<BufferId>,
    ) -> Result<Consumer> {
        let rate = registry.sample_rate(
            *sources
                .first()
                .ok_or_else(|| SigFlowError::Config("consumer needs at least one source".to_string()))?,
        )?;
        let frame = parse_samples(frame_size, rate)?;
        if frame == 0 {
            return Err(SigFlowError::DurationSpec(frame_size.to_string()));
        }
        let delta = match delta_size {
            Some(spec) => parse_samples(spec, rate)?,
            None => 0,
        };

        let base = ConsumerBase::new(registry, sources, sink, transforms, trigger)?;
        let name = format!("consumer:{}", base.sink_name());
        tracing::info!(
            "{}: frame {} + delta {} samples over {} stream(s)",
            name,
            frame,
            delta,
            sources.len()
        );
        Ok(Consumer {
            base,
            name,
            frame_sec: frame as f64 / rate,
            delta_sec: delta as f64 / rate,
            read_time: 0.0,
        })
    }
}

impl Runnable for Consumer {
    fn name(&self) -> &str {
        &self.name
    }

    fn enter(&mut self) {
        self.base.enter_all();
        self.read_time = self
            .base
            .registry()
            .current_sample_time(self.base.primary_input())
            .unwrap_or(0.0);
        tracing::info!("start '{}'", self.name);
    }

    fn run(&mut self) {
        let info = ConsumeInfo {
            time: self.read_time,
            duration: self.frame_sec + self.delta_sec,
        };
        match self.base.consume(info) {
            Ok(()) => self.read_time += self.frame_sec,
            Err(e) if e.is_transient() => {}
            Err(e) => {
                // The window was evicted while we lagged behind: report the
                // gap once, then move the cursor to live data.
                let now = self
                    .base
                    .registry()
                    .current_sample_time(self.base.primary_input())
                    .unwrap_or(self.read_time);
                let gap = (now - self.read_time).max(0.0);
                tracing::warn!(
                    "requested data no longer available ({:?}) '{}', skipping {:.2}s",
                    e,
                    self.name,
                    gap
                );
                self.base.fail(self.read_time, gap);
                self.read_time = now;
            }
        }
    }

    fn flush(&mut self) {
        tracing::info!("stop '{}'", self.name);
        self.base.flush_all();
    }
}
