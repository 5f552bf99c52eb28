//! # SigFlow-RS: Real-time signal pipeline runtime
//!
//! A runtime for real-time signal-processing pipelines: sensors feed raw
//! samples into time-indexed ring buffers, transformer stages reprocess them
//! into derived buffers, and consumer stages read windows of samples on a
//! cadence, optionally gated by a trigger signal or driven by asynchronous
//! events. Multiple runtime instances on different machines can start and
//! stop in lock-step over a small UDP/TCP handshake.
//!
//! ## Architecture
//!
//! - **Buffer**: fixed-capacity [`buffer::TimeBuffer`] rings, one per
//!   pipeline edge, addressed by wall-clock-like time + duration
//! - **Registry**: the [`registry::Registry`] owns all buffers, the
//!   component threads and the pipeline clock; every read/write goes
//!   through its lock-guarded, blocking-aware wrappers
//! - **Components**: one OS thread per Provider / Transformer / Consumer /
//!   EventConsumer, all sharing the enter/run/flush contract
//! - **Contracts**: plugin code only sees the [`contract::Transform`],
//!   [`contract::Sink`] and [`contract::Sensor`] traits
//!
//! ## Example
//!
//! ```ignore
//! use sigflow_rs::{Registry, RuntimeOptions};
//! use sigflow_rs::component::provider::{
//!     DEFAULT_BUFFER_CAPACITY, DEFAULT_SYNC_INTERVAL, DEFAULT_WATCH_INTERVAL,
//! };
//!
//! let registry = Registry::new(RuntimeOptions::load_or_default("pipeline.toml"));
//!
//! let mut sensor = MySensor::new();
//! let raw = registry.add_provider(
//!     &mut sensor,
//!     "audio",
//!     None,
//!     DEFAULT_BUFFER_CAPACITY,
//!     DEFAULT_WATCH_INTERVAL,
//!     DEFAULT_SYNC_INTERVAL,
//! )?;
//! registry.add_sensor(Box::new(sensor))?;
//!
//! let features = registry.add_transformer(
//!     raw, &[], Box::new(MyFeatureTransform), "0.2s", Some("0.05s"), "10.0s", None,
//! )?;
//! registry.add_consumer(&[features], Box::new(MySink), "0.2s", None, Vec::new(), None)?;
//!
//! registry.start()?;
//! registry.wait();
//! registry.stop()?;
//! registry.clear();
//! ```

pub mod buffer;
pub mod component;
pub mod config;
pub mod contract;
pub mod error;
pub mod registry;
pub mod report;
pub mod sync;
pub mod types;

pub use buffer::{ReadError, TimeBuffer};
pub use component::{
    Consumer, EventConsumer, EventConsumerHandle, Provider, ProviderHandle, Runnable,
    SensorRunner, Transformer,
};
pub use config::{RuntimeOptions, SyncOptions};
pub use contract::{ChannelSpec, ConsumeInfo, FrameInfo, Sensor, Sink, StreamEvent, Transform};
pub use error::{Result, SigFlowError};
pub use registry::{
    JobPhase, Registry, RunToken, StreamReadError, StreamWriteError, MAX_BUFFERS, MAX_RUNNABLES,
};
pub use sync::{RunMode, Transport};
pub use types::{parse_samples, BufferId, SampleType, Stream, StreamShape};
