//! Provider — pushes externally-sourced samples into a buffer it owns.
//!
//! The sensor side calls [`ProviderHandle::provide`] from whatever thread
//! its data arrives on; samples are optionally pre-filtered (fixed in/out
//! rate ratio) and pushed into the provider's buffer. Independently, the
//! provider's own thread runs two periodic checks:
//!
//! - a *watchdog* that pads the buffer with zeros whenever no real data
//!   arrived within the watch interval, logging the state change when it
//!   starts or stops substituting zeros, and
//! - a *sync* tick that re-anchors the buffer's sample clock to the
//!   registry's elapsed time, correcting drift between sample-count-derived
//!   time and the wall clock.

use crate::component::Runnable;
use crate::contract::{ChannelSpec, FrameInfo, Transform};
use crate::error::Result;
use crate::registry::{lock, Registry, StreamWriteError, IDLE_SLEEP};
use crate::types::{parse_samples, BufferId, Stream, StreamShape};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Default buffer capacity for provider channels.
pub const DEFAULT_BUFFER_CAPACITY: &str = "10.0s";
/// Default watchdog interval.
pub const DEFAULT_WATCH_INTERVAL: &str = "1.0s";
/// Default clock re-anchor interval.
pub const DEFAULT_SYNC_INTERVAL: &str = "5.0s";

struct ProvideState {
    filter: Option<Box<dyn Transform + Send>>,
    raw: Stream,
    filtered: Stream,
    /// Running input time handed to the filter
    time: f64,
    /// Set by `provide`, cleared by each watchdog check
    fresh: bool,
    providing_zeros: bool,
}

pub(crate) struct ProviderShared {
    registry: Arc<Registry>,
    buffer: BufferId,
    channel: String,
    state: Mutex<ProvideState>,
}

/// Push entry point handed to the sensor. Cloneable; safe to call from any
/// thread.
#[derive(Clone)]
pub struct ProviderHandle {
    shared: Arc<ProviderShared>,
}

impl ProviderHandle {
    /// The buffer this provider writes into.
    pub fn buffer_id(&self) -> BufferId {
        self.shared.buffer
    }

    pub fn sample_rate(&self) -> f64 {
        lock(&self.shared.state).raw.sample_rate()
    }

    /// Push `num` raw samples into the pipeline. Returns false while the
    /// registry is idle (after a short sleep, so a free-running sensor loop
    /// does not spin) or when the bytes do not match the channel shape.
    pub fn provide(&self, bytes: &[u8], num: usize) -> bool {
        let registry = &self.shared.registry;
        if !registry.is_running() {
            std::thread::sleep(IDLE_SLEEP);
            return false;
        }

        let mut guard = lock(&self.shared.state);
        let state = &mut *guard;
        let result = match state.filter.as_mut() {
            Some(filter) => {
                if state.raw.fill_from(bytes, num).is_err() {
                    tracing::warn!(
                        "dropping malformed sample block on '{}' ({} bytes for {} samples)",
                        self.shared.channel,
                        bytes.len(),
                        num
                    );
                    return false;
                }
                state.time += num as f64 / state.raw.sample_rate();
                // Filters are count-preserving: they may reshape dimension,
                // width or type, but one sample in is one sample out.
                state.filtered.adjust(num);
                filter.step(
                    FrameInfo {
                        time: state.time,
                        frame: num,
                        delta: 0,
                    },
                    &state.raw,
                    &mut state.filtered,
                    &[],
                );
                registry.push_data(self.shared.buffer, state.filtered.bytes(), num as u64)
            }
            None => registry.push_data(self.shared.buffer, bytes, num as u64),
        };

        match result {
            Ok(()) => {
                state.fresh = true;
                if state.providing_zeros {
                    tracing::info!(
                        "watch check succeeded, no longer providing zeros '{}'",
                        self.shared.channel
                    );
                    state.providing_zeros = false;
                }
                true
            }
            Err(StreamWriteError::Idle) => false,
            Err(e) => {
                tracing::warn!("provide failed on '{}': {:?}", self.shared.channel, e);
                false
            }
        }
    }
}

/// The provider's periodic watchdog/sync thread.
pub struct Provider {
    shared: Arc<ProviderShared>,
    name: String,
    run_sleep: Duration,
    do_watch: bool,
    watch_iter: u64,
    watch_counter: u64,
    do_sync: bool,
    sync_iter: u64,
    sync_counter: u64,
}

impl Provider {
    /// Create the buffer and push handle for one sensor channel. Returns
    /// the handle plus the periodic runnable, or `None` for the runnable
    /// when both intervals resolve to zero.
    pub(crate) fn create(
        registry: Arc<Registry>,
        spec: &ChannelSpec,
        filter: Option<Box<dyn Transform + Send>>,
        buffer_capacity: &str,
        watch_interval: &str,
        sync_interval: &str,
    ) -> Result<(ProviderHandle, Option<Provider>)> {
        let in_shape = spec.shape;
        let out_shape = match &filter {
            Some(f) => StreamShape {
                sample_rate: in_shape.sample_rate,
                dimension: f.dimension_out(in_shape.dimension),
                sample_bytes: f.bytes_out(in_shape.sample_bytes),
                sample_type: f.type_out(in_shape.sample_type),
            },
            None => in_shape,
        };

        let buffer = registry.add_buffer(out_shape, buffer_capacity)?;
        if let Some(meta) = &spec.meta {
            registry.set_meta(buffer, meta.clone())?;
        }

        let rate = in_shape.sample_rate;
        let watch_samples = parse_samples(watch_interval, rate)?;
        let sync_samples = parse_samples(sync_interval, rate)?;
        let watch_ms = (watch_samples as f64 / rate * 1000.0).round() as u64;
        let sync_ms = (sync_samples as f64 / rate * 1000.0).round() as u64;
        let do_watch = watch_ms > 0;
        let do_sync = sync_ms > 0;
        let run_sleep_ms = match (do_watch, do_sync) {
            (true, true) => watch_ms.min(sync_ms),
            (true, false) => watch_ms,
            (false, true) => sync_ms,
            (false, false) => 0,
        };
        let (watch_iter, sync_iter) = if run_sleep_ms > 0 {
            (
                if do_watch { watch_ms / run_sleep_ms - 1 } else { 0 },
                if do_sync { sync_ms / run_sleep_ms - 1 } else { 0 },
            )
        } else {
            (0, 0)
        };

        let shared = Arc::new(ProviderShared {
            registry,
            buffer,
            channel: spec.name.clone(),
            state: Mutex::new(ProvideState {
                filter,
                raw: Stream::new(in_shape),
                filtered: Stream::new(out_shape),
                time: 0.0,
                fresh: false,
                providing_zeros: false,
            }),
        });
        let handle = ProviderHandle {
            shared: Arc::clone(&shared),
        };

        tracing::info!(
            "provider '{}': {:?}, {:.2} Hz, dim {}, {}, watch {}, sync {}",
            spec.name,
            buffer,
            out_shape.sample_rate,
            out_shape.dimension,
            out_shape.sample_type.name(),
            watch_interval,
            sync_interval
        );

        let runnable = (run_sleep_ms > 0).then(|| Provider {
            shared,
            name: format!("provider:{}", spec.name),
            run_sleep: Duration::from_millis(run_sleep_ms),
            do_watch,
            watch_iter,
            watch_counter: 0,
            do_sync,
            sync_iter,
            sync_counter: 0,
        });

        Ok((handle, runnable))
    }
}

impl Runnable for Provider {
    fn name(&self) -> &str {
        &self.name
    }

    fn enter(&mut self) {
        tracing::info!("start '{}'", self.name);
        let mut state = lock(&self.shared.state);
        state.fresh = false;
        state.providing_zeros = false;
        state.time = 0.0;
        drop(state);
        self.watch_counter = self.watch_iter;
        self.sync_counter = self.sync_iter;
    }

    fn run(&mut self) {
        std::thread::sleep(self.run_sleep);

        let registry = &self.shared.registry;
        if !registry.is_running() {
            std::thread::sleep(IDLE_SLEEP);
            return;
        }

        if self.do_watch {
            if self.watch_counter == 0 {
                let mut state = lock(&self.shared.state);
                if !state.fresh {
                    match registry.push_zeros(self.shared.buffer) {
                        Ok(_) => {
                            if !state.providing_zeros {
                                tracing::warn!(
                                    "watch check failed, now providing zeros '{}'",
                                    self.shared.channel
                                );
                                state.providing_zeros = true;
                            }
                        }
                        Err(StreamWriteError::Idle) => {}
                        Err(e) => tracing::warn!(
                            "watchdog push failed on '{}': {:?}",
                            self.shared.channel,
                            e
                        ),
                    }
                }
                state.fresh = false;
                self.watch_counter = self.watch_iter;
            } else {
                self.watch_counter -= 1;
            }
        }

        if self.do_sync {
            if self.sync_counter == 0 {
                if let Err(e) = registry.synchronize(self.shared.buffer) {
                    tracing::warn!("clock sync failed on '{}': {}", self.shared.channel, e);
                }
                self.sync_counter = self.sync_iter;
                tracing::debug!("synchronized buffer '{}'", self.shared.channel);
            } else {
                self.sync_counter -= 1;
            }
        }
    }

    fn flush(&mut self) {
        tracing::info!("stop '{}'", self.name);
        let mut guard = lock(&self.shared.state);
        let state = &mut *guard;
        if let Some(filter) = state.filter.as_mut() {
            filter.flush(&state.raw, &mut state.filtered, &[]);
        }
        state.raw.reset();
        state.filtered.reset();
    }
}
