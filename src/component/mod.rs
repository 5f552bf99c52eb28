//! Pipeline components and the assembly surface.
//!
//! All four component kinds share one thread-per-component execution
//! contract, [`Runnable`]: `enter()` once before the run loop, `run()`
//! repeatedly while the pipeline is active, `flush()` once after — mirroring
//! the enter/step/flush shape of the transform contract they wrap.
//!
//! Components are assembled while the registry is idle through the
//! `add_*` methods below, which create the component's output buffer (where
//! it has one), resolve frame/delta/interval specs against the source
//! sample rate, forward metadata, and register the component in the
//! runnable table.

pub mod consumer;
pub mod event_consumer;
pub mod provider;
pub mod sensor;
pub mod transformer;

pub use consumer::Consumer;
pub use event_consumer::{EventConsumer, EventConsumerHandle};
pub use provider::{Provider, ProviderHandle};
pub use sensor::SensorRunner;
pub use transformer::Transformer;

use crate::contract::{Sensor, Sink, Transform};
use crate::error::{Result, SigFlowError};
use crate::registry::Registry;
use crate::types::BufferId;

/// A schedulable unit driven by its own OS thread.
///
/// The registry spawns one thread per runnable at `start()`: the thread
/// calls `enter()` once, loops `run()` until the stop flag flips, then calls
/// `flush()` and exits, at which point the registry joins it. `run()` must
/// return promptly when it observes the idle transition (a failed buffer
/// call suffices); there is no forced termination.
pub trait Runnable: Send {
    /// Display name, also used as the thread name.
    fn name(&self) -> &str;

    /// Called once on the component thread before the run loop. The
    /// registry's `start()` does not return until every component has
    /// finished its `enter()`, so cursors anchored here are in place
    /// before any data flows.
    fn enter(&mut self) {}

    /// One iteration of the component's work loop.
    fn run(&mut self);

    /// Called once on the component thread after the run loop ends.
    fn flush(&mut self) {}
}

impl Registry {
    /// Wire a provider into one channel of a sensor: create the channel's
    /// buffer (shaped by the optional filter's mappings), hand the sensor a
    /// push handle, and register the provider's watchdog/sync thread.
    ///
    /// `watch_interval` and `sync_interval` are duration specs resolved
    /// against the channel rate; `"0"` disables the respective check.
    pub fn add_provider(
        &self,
        sensor: &mut dyn Sensor,
        channel: &str,
        filter: Option<Box<dyn Transform + Send>>,
        buffer_capacity: &str,
        watch_interval: &str,
        sync_interval: &str,
    ) -> Result<BufferId> {
        let spec = sensor
            .channels()
            .into_iter()
            .find(|c| c.name == channel)
            .ok_or_else(|| {
                SigFlowError::Sensor(format!(
                    "sensor '{}' has no channel '{}'",
                    sensor.name(),
                    channel
                ))
            })?;

        let (handle, runnable) = Provider::create(
            self.shared()?,
            &spec,
            filter,
            buffer_capacity,
            watch_interval,
            sync_interval,
        )?;
        let buffer = handle.buffer_id();

        if !sensor.set_provider(channel, handle) {
            return Err(SigFlowError::Sensor(format!(
                "sensor '{}' rejected provider for channel '{}'",
                sensor.name(),
                channel
            )));
        }
        if let Some(runnable) = runnable {
            self.add_runnable(Box::new(runnable))?;
        }
        Ok(buffer)
    }

    /// Register a sensor whose connect/start/stop/disconnect lifecycle is
    /// bound to the pipeline run.
    pub fn add_sensor(&self, sensor: Box<dyn Sensor>) -> Result<()> {
        self.add_runnable(Box::new(SensorRunner::new(sensor)))?;
        Ok(())
    }

    /// Create a transformer reading `frame + delta` windows from `source`
    /// (plus matching windows from `extra_sources`), writing into a new
    /// output buffer whose shape is derived through the transform's mapping
    /// functions. Returns the output buffer id.
    pub fn add_transformer(
        &self,
        source: BufferId,
        extra_sources: &[BufferId],
        transform: Box<dyn Transform + Send>,
        frame_size: &str,
        delta_size: Option<&str>,
        buffer_capacity: &str,
        trigger: Option<BufferId>,
    ) -> Result<BufferId> {
        let transformer = Transformer::create(
            self.shared()?,
            source,
            extra_sources,
            transform,
            frame_size,
            delta_size,
            buffer_capacity,
            trigger,
        )?;
        let output = transformer.output_id();
        self.add_runnable(Box::new(transformer))?;
        Ok(output)
    }

    /// Create a consumer delivering `frame + delta` windows from `sources`
    /// to a sink on a cadence. `transforms`, when non-empty, carries one
    /// optional per-stream transform per source.
    pub fn add_consumer(
        &self,
        sources: &[BufferId],
        sink: Box<dyn Sink + Send>,
        frame_size: &str,
        delta_size: Option<&str>,
        transforms: Vec<Option<Box<dyn Transform + Send>>>,
        trigger: Option<BufferId>,
    ) -> Result<()> {
        let consumer = Consumer::create(
            self.shared()?,
            sources,
            sink,
            frame_size,
            delta_size,
            transforms,
            trigger,
        )?;
        self.add_runnable(Box::new(consumer))?;
        Ok(())
    }

    /// Create a consumer driven by discrete external events instead of a
    /// cadence. The returned handle accepts events; with `asynchronous`
    /// set, delivery happens on a dedicated worker thread through a
    /// single-slot mailbox (a pending event is overwritten by a newer one).
    pub fn add_event_consumer(
        &self,
        sources: &[BufferId],
        sink: Box<dyn Sink + Send>,
        transforms: Vec<Option<Box<dyn Transform + Send>>>,
        asynchronous: bool,
    ) -> Result<EventConsumerHandle> {
        let (consumer, handle) = EventConsumer::create(
            self.shared()?,
            sources,
            sink,
            transforms,
            asynchronous,
        )?;
        self.add_runnable(Box::new(consumer))?;
        Ok(handle)
    }
}
