//! Transformer — reads frame+delta windows from one or more buffers and
//! writes derived samples into a buffer it owns.
//!
//! Each iteration reads exactly `frame + delta` samples from the main input
//! at a monotonically advancing cursor, plus matching time-addressed windows
//! from any extra inputs, applies the transform and pushes the result. A
//! trigger buffer, when attached, gates the work: an all-zero trigger window
//! produces a zero-filled output frame instead of a transform invocation,
//! keeping the output buffer's sample clock advancing either way.
//!
//! On a transient read failure the cursor stays put and the iteration is
//! retried; on a permanent loss the cursor resynchronizes to the input's
//! live write position and the output clock is re-anchored to match.

use crate::component::Runnable;
use crate::contract::{FrameInfo, Transform};
use crate::error::{Result, SigFlowError};
use crate::registry::{Registry, StreamReadError, StreamWriteError};
use crate::types::{parse_samples, BufferId, Stream, StreamShape};
use std::sync::Arc;

enum Step {
    Done,
    Wait,
    Lost(StreamReadError),
}

pub struct Transformer {
    registry: Arc<Registry>,
    name: String,
    transform: Box<dyn Transform + Send>,
    input: BufferId,
    extras: Vec<BufferId>,
    trigger: Option<BufferId>,
    output: BufferId,
    frame: usize,
    delta: usize,
    frame_sec: f64,
    delta_sec: f64,
    count_in: usize,
    count_out: usize,
    rate_in: f64,
    stream_in: Stream,
    stream_out: Stream,
    extra_streams: Vec<Stream>,
    trigger_stream: Option<Stream>,
    read_pos: u64,
}

impl Transformer {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn create(
        registry: Arc<Registry>,
        source: BufferId,
        extra_sources: &[BufferId],
        transform: Box<dyn Transform + Send>,
        frame_size: &str,
        delta_size: Option<&str>,
        buffer_capacity: &str,
        trigger: Option<BufferId>,
    ) -> Result<Transformer> {
        let in_shape = registry.buffer_shape(source)?;
        let rate_in = in_shape.sample_rate;

        let frame = parse_samples(frame_size, rate_in)? as usize;
        if frame == 0 {
            return Err(SigFlowError::DurationSpec(frame_size.to_string()));
        }
        let delta = match delta_size {
            Some(spec) => parse_samples(spec, rate_in)? as usize,
            None => 0,
        };
        let count_in = frame + delta;
        let count_out = transform.count_out(frame);

        let rate_out = (count_out as f64 / frame as f64) * rate_in;
        let out_shape = StreamShape {
            sample_rate: rate_out,
            dimension: transform.dimension_out(in_shape.dimension),
            sample_bytes: transform.bytes_out(in_shape.sample_bytes),
            sample_type: transform.type_out(in_shape.sample_type),
        };
        let output = registry.add_buffer(out_shape, buffer_capacity)?;

        // Forward (possibly rewritten) metadata down the chain.
        let upstream = registry.meta(source)?;
        if let Some(meta) = transform.rewrite_meta(upstream.as_deref()) {
            registry.set_meta(output, meta)?;
        }

        let extra_streams: Vec<Stream> = extra_sources
            .iter()
            .map(|id| registry.buffer_shape(*id).map(Stream::new))
            .collect::<Result<_>>()?;

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

        let name = format!("transform:{}", transform.name());
        tracing::info!(
            "{}: frame {} + delta {} samples, {:?} -> {:?}, {:.2} -> {:.2} Hz",
            name,
            frame,
            delta,
            source,
            output,
            rate_in,
            rate_out
        );

        Ok(Transformer {
            registry,
            name,
            transform,
            input: source,
            extras: extra_sources.to_vec(),
            trigger,
            output,
            frame,
            delta,
            frame_sec: frame as f64 / rate_in,
            delta_sec: delta as f64 / rate_in,
            count_in,
            count_out,
            rate_in,
            stream_in: Stream::new(in_shape),
            stream_out: Stream::new(out_shape),
            extra_streams,
            trigger_stream,
            read_pos: 0,
        })
    }

    /// The buffer this transformer writes into.
    pub fn output_id(&self) -> BufferId {
        self.output
    }

    fn step_once(&mut self) -> Step {
        let time = self.read_pos as f64 / self.rate_in;
        let window = self.frame_sec + self.delta_sec;

        // Trigger gating comes first; a gated iteration never touches the
        // input cursor's data.
        if let Some(trigger_id) = self.trigger {
            if let Some(trigger_stream) = self.trigger_stream.as_mut() {
                match self.registry.get_data(trigger_id, trigger_stream, time, window) {
                    Ok(()) => {
                        if !trigger_stream.any_nonzero() {
                            self.stream_out.adjust(self.count_out);
                            self.stream_out.zero();
                            tracing::debug!("trigger low, pushing zeros '{}'", self.name);
                            return self.push_out();
                        }
                    }
                    Err(e) if e.is_transient() => return Step::Wait,
                    Err(e) => return Step::Lost(e),
                }
            }
        }

        self.stream_in.adjust(self.count_in);
        match self.registry.get_data_at(
            self.input,
            self.stream_in.bytes_mut(),
            self.read_pos,
            self.count_in as u64,
        ) {
            Ok(()) => {}
            Err(e) if e.is_transient() => return Step::Wait,
            Err(e) => return Step::Lost(e),
        }

        for (id, stream) in self.extras.iter().zip(self.extra_streams.iter_mut()) {
            match self.registry.get_data(*id, stream, time, window) {
                Ok(()) => {}
                Err(e) if e.is_transient() => return Step::Wait,
                Err(e) => return Step::Lost(e),
            }
        }

        self.stream_in.time = time;
        self.stream_out.adjust(self.count_out);
        self.transform.step(
            FrameInfo {
                time,
                frame: self.frame,
                delta: self.delta,
            },
            &self.stream_in,
            &mut self.stream_out,
            &self.extra_streams,
        );
        self.push_out()
    }

    fn push_out(&mut self) -> Step {
        match self.registry.push_data(
            self.output,
            self.stream_out.bytes(),
            self.stream_out.num() as u64,
        ) {
            Ok(()) => Step::Done,
            Err(StreamWriteError::Idle) => Step::Wait,
            Err(e) => {
                tracing::warn!("output push failed ({:?}) '{}'", e, self.name);
                Step::Wait
            }
        }
    }

    /// Accept the gap: move the cursor to the input's live write position
    /// and re-anchor the output clock to match.
    fn resync(&mut self) {
        let live = self.registry.write_position(self.input).unwrap_or(0);
        self.read_pos = live;
        let _ = self
            .registry
            .set_current_sample_time(self.output, live as f64 / self.rate_in);
    }
}

impl Runnable for Transformer {
    fn name(&self) -> &str {
        &self.name
    }

    fn enter(&mut self) {
        self.read_pos = if self.registry.is_running() {
            self.registry.write_position(self.input).unwrap_or(0)
        } else {
            0
        };
        self.stream_in.adjust(self.count_in);
        self.stream_out.adjust(self.count_out);
        self.transform
            .enter(&self.stream_in, &mut self.stream_out, &self.extra_streams);
        tracing::info!("start '{}'", self.name);
    }

    fn run(&mut self) {
        match self.step_once() {
            Step::Done => self.read_pos += self.frame as u64,
            Step::Wait => {}
            Step::Lost(e) => {
                tracing::warn!("requested data no longer available ({:?}) '{}'", e, self.name);
                self.resync();
            }
        }
    }

    fn flush(&mut self) {
        tracing::info!("stop '{}'", self.name);
        self.transform
            .flush(&self.stream_in, &mut self.stream_out, &self.extra_streams);
        self.stream_in.reset();
        self.stream_out.reset();
        for stream in &mut self.extra_streams {
            stream.reset();
        }
        if let Some(trigger_stream) = &mut self.trigger_stream {
            trigger_stream.reset();
        }
    }
}
