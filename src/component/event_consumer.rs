//! EventConsumer — adapts a consumer to discrete external events.
//!
//! Each event's `[time, time + duration)` span becomes one sink delivery.
//! In synchronous mode the delivery runs on the thread calling
//! [`EventConsumerHandle::send`]; in asynchronous mode the event is handed
//! to a dedicated worker thread through a single-slot mailbox — a newer
//! event overwrites a pending one, so a slow sink sees only the freshest
//! event rather than an ever-growing queue.

use crate::component::consumer::ConsumerBase;
use crate::component::Runnable;
use crate::contract::{Sink, StreamEvent, Transform};
use crate::error::Result;
use crate::registry::{lock, Registry, IDLE_SLEEP};
use crate::types::BufferId;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Upper bound on one mailbox wait, so the worker observes a stop promptly.
const MAILBOX_POLL: Duration = Duration::from_millis(50);

struct Mailbox {
    slot: Mutex<Option<StreamEvent>>,
    signal: Condvar,
}

impl Mailbox {
    fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            signal: Condvar::new(),
        }
    }
}

enum Target {
    Async(Arc<Mailbox>),
    Sync(Arc<Mutex<ConsumerBase>>),
}

/// Entry point for feeding events into an event consumer. Cloneable; safe
/// to call from any thread.
pub struct EventConsumerHandle {
    target: Target,
}

impl Clone for EventConsumerHandle {
    fn clone(&self) -> Self {
        let target = match &self.target {
            Target::Async(mailbox) => Target::Async(Arc::clone(mailbox)),
            Target::Sync(base) => Target::Sync(Arc::clone(base)),
        };
        Self { target }
    }
}

impl EventConsumerHandle {
    /// Submit one event. Asynchronous consumers return immediately,
    /// overwriting any event still pending; synchronous consumers deliver
    /// on the calling thread before returning.
    pub fn send(&self, event: StreamEvent) {
        match &self.target {
            Target::Async(mailbox) => {
                let mut slot = lock(&mailbox.slot);
                if slot.is_some() {
                    tracing::debug!("overwriting pending event");
                }
                *slot = Some(event);
                mailbox.signal.notify_one();
            }
            Target::Sync(base) => lock(base).deliver(event),
        }
    }
}

/// The event consumer component. In asynchronous mode its thread is the
/// delivery worker; in synchronous mode the thread only carries the sink's
/// enter/flush lifecycle.
pub struct EventConsumer {
    name: String,
    base: Arc<Mutex<ConsumerBase>>,
    mailbox: Option<Arc<Mailbox>>,
}

impl EventConsumer {
    pub(crate) fn create(
        registry: Arc<Registry>,
        sources: &[BufferId],
        sink: Box<dyn Sink + Send>,
        transforms: Vec<Option<Box<dyn Transform + Send>>>,
        asynchronous: bool,
    ) -> Result<(EventConsumer, EventConsumerHandle)> {
        let base = ConsumerBase::new(registry, sources, sink, transforms, None)?;
        let name = format!("events:{}", base.sink_name());
        let base = Arc::new(Mutex::new(base));
        let mailbox = asynchronous.then(|| Arc::new(Mailbox::new()));

        let handle = EventConsumerHandle {
            target: match &mailbox {
                Some(mailbox) => Target::Async(Arc::clone(mailbox)),
                None => Target::Sync(Arc::clone(&base)),
            },
        };
        tracing::info!(
            "{}: {} stream(s), {}",
            name,
            sources.len(),
            if asynchronous { "async" } else { "sync" }
        );
        Ok((EventConsumer { name, base, mailbox }, handle))
    }
}

impl Runnable for EventConsumer {
    fn name(&self) -> &str {
        &self.name
    }

    fn enter(&mut self) {
        lock(&self.base).enter_all();
        tracing::info!("start '{}'", self.name);
    }

    fn run(&mut self) {
        let Some(mailbox) = &self.mailbox else {
            std::thread::sleep(IDLE_SLEEP);
            return;
        };

        let event = {
            let mut slot = lock(&mailbox.slot);
            if slot.is_none() {
                let (guard, _) = mailbox
                    .signal
                    .wait_timeout(slot, MAILBOX_POLL)
                    .unwrap_or_else(PoisonError::into_inner);
                slot = guard;
            }
            slot.take()
        };

        if let Some(event) = event {
            lock(&self.base).deliver(event);
        }
    }

    fn flush(&mut self) {
        tracing::info!("stop '{}'", self.name);
        if let Some(mailbox) = &self.mailbox {
            lock(&mailbox.slot).take();
        }
        lock(&self.base).flush_all();
    }
}
