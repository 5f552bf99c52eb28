//! Registry / orchestrator — the single source of truth for buffer
//! existence, component scheduling and the pipeline-wide clock.
//!
//! The registry owns a fixed-size arena of buffer slots and a fixed-size
//! table of runnable components. Components never hold references to buffer
//! storage; they address buffers through generation-checked [`BufferId`]
//! handles and all reads/writes go through the lock-guarded wrappers here.
//!
//! # Concurrency
//!
//! Each buffer slot carries its own mutex plus a "data ready" condvar.
//! Writers ([`Registry::push_data`], [`Registry::push_zeros`]) never block
//! and wake *all* waiting readers after a successful write, since multiple
//! readers with disjoint windows can all make progress. The blocking reader
//! ([`Registry::get_data`]) loops: attempt the read, and on a soft miss wait
//! on the condvar while the registry is still running. [`Registry::stop`]
//! flips the run flag and then notifies every condvar while holding the slot
//! lock, so a blocked reader observes the idle transition instead of
//! deadlocking past a stop.
//!
//! Cancellation is cooperative: there is no forced thread termination. A
//! component loop observes the stop either through a failed buffer call or
//! through its run token, returns from `run()`, and the registry joins the
//! thread.
//!
//! # Lifecycle
//!
//! IDLE → `start()` → RUNNING → `stop()` → IDLE → `clear()`. Buffers and
//! runnables can only be added while idle. `start()` runs pre-jobs, resets
//! all buffers, spawns one thread per runnable, performs the optional sync
//! handshake and captures the wall-clock start time. `stop()` reverses the
//! procedure, running post-jobs last.
//!
//! The assembly surface (`add_provider`, `add_transformer`, `add_consumer`,
//! `add_event_consumer`, `add_sensor`) lives in the [`component`] module.
//!
//! [`component`]: crate::component

use crate::buffer::{ReadError, TimeBuffer};
use crate::component::Runnable;
use crate::config::RuntimeOptions;
use crate::error::{Result, SigFlowError};
use crate::report::RunReport;
use crate::sync::{MsgType, RunMode, SyncLink};
use crate::types::{parse_samples, BufferId, Stream, StreamShape};
use chrono::{DateTime, Local, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Size of the buffer slot arena.
pub const MAX_BUFFERS: usize = 128;

/// Size of the runnable table.
pub const MAX_RUNNABLES: usize = 128;

/// How long callers sleep before reporting a transient failure while the
/// registry is idle, so component loops do not spin between assembly and
/// start.
pub(crate) const IDLE_SLEEP: Duration = Duration::from_millis(10);

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Why a registry-level read could not be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamReadError {
    /// The registry is idle; retry once it is running again
    Idle,
    /// Unknown, stale or unused buffer id
    Invalid,
    /// The buffer itself rejected the window
    Miss(ReadError),
}

impl StreamReadError {
    /// True for conditions a caller should wait out rather than treat as
    /// data loss.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StreamReadError::Idle | StreamReadError::Miss(ReadError::NotInBufferYet)
        )
    }
}

/// Why a registry-level write could not be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamWriteError {
    /// The registry is idle
    Idle,
    /// Unknown, stale or unused buffer id
    Invalid,
    /// Byte length disagrees with the buffer shape
    Shape { expected: usize, got: usize },
}

/// Observer for the registry's run state, handed to every component loop
/// and blocking wait.
#[derive(Debug, Clone)]
pub struct RunToken(Arc<AtomicBool>);

impl RunToken {
    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// When an external job runs relative to the pipeline lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    /// Before buffers are reset and threads start
    Pre,
    /// After all threads have been joined
    Post,
    /// Immediately, when the job is added
    Now,
}

#[derive(Debug, Clone)]
struct Job {
    program: String,
    args: Vec<String>,
    phase: JobPhase,
    wait: bool,
}

struct SlotState {
    generation: u32,
    buffer: Option<TimeBuffer>,
}

struct BufferSlot {
    state: Mutex<SlotState>,
    data_ready: Condvar,
}

impl BufferSlot {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                generation: 0,
                buffer: None,
            }),
            data_ready: Condvar::new(),
        }
    }
}

enum RunnableCell {
    Empty,
    Parked(Box<dyn Runnable + Send>),
    Running(JoinHandle<Box<dyn Runnable + Send>>),
}

/// Process-wide owner of all buffers, components and the pipeline clock.
pub struct Registry {
    /// Self-reference handed to components so they can call back into the
    /// registry from their own threads.
    weak_self: std::sync::Weak<Registry>,
    options: RuntimeOptions,
    slots: Box<[BufferSlot]>,
    runnables: Mutex<Vec<RunnableCell>>,
    running: Arc<AtomicBool>,
    /// Per-cycle liveness flag observed by the component thread loops.
    threads_active: Arc<AtomicBool>,
    start_instant: Mutex<Option<Instant>>,
    start_wall: Mutex<Option<(DateTime<Utc>, DateTime<Local>)>>,
    last_run: Mutex<Duration>,
    run_mode: Mutex<RunMode>,
    link: Mutex<Option<SyncLink>>,
    jobs: Mutex<Vec<Job>>,
    report: Mutex<Option<RunReport>>,
    cancel_tx: Sender<()>,
    cancel_rx: Receiver<()>,
}

impl Registry {
    /// Create an idle registry with the given options.
    pub fn new(options: RuntimeOptions) -> Arc<Self> {
        let slots: Vec<BufferSlot> = (0..MAX_BUFFERS).map(|_| BufferSlot::new()).collect();
        let mut runnables = Vec::with_capacity(MAX_RUNNABLES);
        runnables.resize_with(MAX_RUNNABLES, || RunnableCell::Empty);
        let (cancel_tx, cancel_rx) = unbounded();
        Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            options,
            slots: slots.into_boxed_slice(),
            runnables: Mutex::new(runnables),
            running: Arc::new(AtomicBool::new(false)),
            threads_active: Arc::new(AtomicBool::new(false)),
            start_instant: Mutex::new(None),
            start_wall: Mutex::new(None),
            last_run: Mutex::new(Duration::ZERO),
            run_mode: Mutex::new(RunMode::RunAndQuit),
            link: Mutex::new(None),
            jobs: Mutex::new(Vec::new()),
            report: Mutex::new(None),
            cancel_tx,
            cancel_rx,
        })
    }

    /// Create an idle registry with default options.
    pub fn with_defaults() -> Arc<Self> {
        Self::new(RuntimeOptions::default())
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    // ── Buffer table ──

    /// Allocate a buffer slot for the given shape. The capacity spec is
    /// resolved against the shape's sample rate ("2.0s", "100ms", "4096").
    pub fn add_buffer(&self, shape: StreamShape, capacity_spec: &str) -> Result<BufferId> {
        if self.is_running() {
            return Err(SigFlowError::NotIdle);
        }
        let capacity = parse_samples(capacity_spec, shape.sample_rate)?;
        if capacity == 0 {
            return Err(SigFlowError::DurationSpec(capacity_spec.to_string()));
        }

        for (index, slot) in self.slots.iter().enumerate() {
            let mut state = lock(&slot.state);
            if state.buffer.is_none() {
                state.buffer = Some(TimeBuffer::new(shape, capacity));
                let id = BufferId::new(index as u32, state.generation);
                tracing::debug!(
                    "added buffer {:?}: {:.2} Hz, dim {}, {} samples",
                    id,
                    shape.sample_rate,
                    shape.dimension,
                    capacity
                );
                return Ok(id);
            }
        }
        Err(SigFlowError::BufferTableFull)
    }

    /// Destroy a buffer. The slot's generation is bumped so the id (and any
    /// copy of it) is rejected from here on.
    pub fn rem_buffer(&self, id: BufferId) -> Result<()> {
        let slot = self.slot(id)?;
        let mut state = lock(&slot.state);
        if state.generation != id.generation() {
            return Err(SigFlowError::StaleBufferId(id));
        }
        if state.buffer.take().is_none() {
            return Err(SigFlowError::InvalidBufferId(id));
        }
        state.generation = state.generation.wrapping_add(1);
        slot.data_ready.notify_all();
        tracing::debug!("removed buffer {:?}", id);
        Ok(())
    }

    /// Rewind a buffer's write position and clear its stored data without
    /// destroying the slot.
    pub fn reset_buffer(&self, id: BufferId, offset: f64) -> Result<()> {
        self.with_buffer(id, |b| b.reset(offset))
    }

    /// Attach an opaque metadata blob to a buffer.
    pub fn set_meta(&self, id: BufferId, meta: Vec<u8>) -> Result<()> {
        self.with_buffer(id, |b| b.set_meta(meta))
    }

    /// Retrieve a copy of a buffer's metadata blob.
    pub fn meta(&self, id: BufferId) -> Result<Option<Vec<u8>>> {
        self.with_buffer(id, |b| b.meta().map(<[u8]>::to_vec))
    }

    pub fn is_buffer_in_use(&self, id: BufferId) -> bool {
        self.with_buffer(id, |_| ()).is_ok()
    }

    // ── Buffer query surface ──

    pub fn buffer_shape(&self, id: BufferId) -> Result<StreamShape> {
        self.with_buffer(id, |b| *b.shape())
    }

    pub fn sample_rate(&self, id: BufferId) -> Result<f64> {
        self.with_buffer(id, |b| b.shape().sample_rate)
    }

    pub fn sample_dimension(&self, id: BufferId) -> Result<usize> {
        self.with_buffer(id, |b| b.shape().dimension)
    }

    pub fn sample_bytes(&self, id: BufferId) -> Result<usize> {
        self.with_buffer(id, |b| b.shape().sample_bytes)
    }

    /// Bytes per full sample (all channels).
    pub fn frame_bytes(&self, id: BufferId) -> Result<usize> {
        self.with_buffer(id, |b| b.shape().frame_bytes())
    }

    pub fn sample_type(&self, id: BufferId) -> Result<crate::types::SampleType> {
        self.with_buffer(id, |b| b.shape().sample_type)
    }

    /// Buffer capacity in seconds.
    pub fn capacity(&self, id: BufferId) -> Result<f64> {
        self.with_buffer(id, |b| b.capacity_seconds())
    }

    /// Buffer capacity in samples.
    pub fn capacity_samples(&self, id: BufferId) -> Result<u64> {
        self.with_buffer(id, |b| b.capacity())
    }

    /// Total samples written since the last reset.
    pub fn write_position(&self, id: BufferId) -> Result<u64> {
        self.with_buffer(id, |b| b.write_position())
    }

    /// Time of the next sample to be written.
    pub fn current_sample_time(&self, id: BufferId) -> Result<f64> {
        self.with_buffer(id, |b| b.current_sample_time())
    }

    /// Wall-clock anchor of the buffer's sample 0.
    pub fn offset_time(&self, id: BufferId) -> Result<f64> {
        self.with_buffer(id, |b| b.offset_time())
    }

    /// Re-anchor a buffer's sample clock to the registry's elapsed time.
    pub fn synchronize(&self, id: BufferId) -> Result<()> {
        let elapsed = self.elapsed_time();
        self.with_buffer(id, |b| b.sync(elapsed))
    }

    /// Force a buffer's sample clock to a specific time. Used by a
    /// transformer to re-anchor its output after a cursor resync.
    pub fn set_current_sample_time(&self, id: BufferId, time: f64) -> Result<()> {
        self.with_buffer(id, |b| b.sync(time))
    }

    // ── Data plane ──

    /// Append samples to a buffer. Never blocks; wakes all readers waiting
    /// on the buffer after a successful write.
    pub fn push_data(
        &self,
        id: BufferId,
        bytes: &[u8],
        num: u64,
    ) -> std::result::Result<(), StreamWriteError> {
        if !self.is_running() {
            std::thread::sleep(IDLE_SLEEP);
            return Err(StreamWriteError::Idle);
        }
        let slot = match self.slot(id) {
            Ok(s) => s,
            Err(_) => return Err(StreamWriteError::Invalid),
        };
        let mut state = lock(&slot.state);
        if state.generation != id.generation() {
            return Err(StreamWriteError::Invalid);
        }
        let Some(buffer) = state.buffer.as_mut() else {
            return Err(StreamWriteError::Invalid);
        };
        match buffer.push(bytes, num) {
            Ok(()) => {
                slot.data_ready.notify_all();
                Ok(())
            }
            Err(SigFlowError::ShapeMismatch { expected, got }) => {
                Err(StreamWriteError::Shape { expected, got })
            }
            Err(_) => Err(StreamWriteError::Invalid),
        }
    }

    /// Pad a buffer with zeros up to the registry's elapsed time. Used by a
    /// provider's watchdog when no real data arrived within the watch
    /// interval. Returns the number of zero samples pushed.
    pub fn push_zeros(&self, id: BufferId) -> std::result::Result<u64, StreamWriteError> {
        if !self.is_running() {
            std::thread::sleep(IDLE_SLEEP);
            return Err(StreamWriteError::Idle);
        }
        let elapsed = self.elapsed_time();
        let slot = match self.slot(id) {
            Ok(s) => s,
            Err(_) => return Err(StreamWriteError::Invalid),
        };
        let mut state = lock(&slot.state);
        if state.generation != id.generation() {
            return Err(StreamWriteError::Invalid);
        }
        let Some(buffer) = state.buffer.as_mut() else {
            return Err(StreamWriteError::Invalid);
        };
        let behind = elapsed - buffer.current_sample_time();
        if behind <= 0.0 {
            return Ok(0);
        }
        let num = (behind * buffer.shape().sample_rate).round() as u64;
        if num > 0 {
            buffer.push_zeros(num);
            slot.data_ready.notify_all();
        }
        Ok(num)
    }

    /// Copy the window `[start_time, start_time + duration)` out of a buffer
    /// into `dst`, blocking while the window is still in the future.
    ///
    /// Returns the moment the registry goes idle, even mid-wait. A window
    /// already evicted from the ring fails immediately with a hard miss.
    pub fn get_data(
        &self,
        id: BufferId,
        dst: &mut Stream,
        start_time: f64,
        duration: f64,
    ) -> std::result::Result<(), StreamReadError> {
        self.blocking_read(id, |b| b.get(dst, start_time, duration))
    }

    /// Position-addressed blocking read used by transformer cursors.
    pub fn get_data_at(
        &self,
        id: BufferId,
        dst: &mut [u8],
        position: u64,
        num: u64,
    ) -> std::result::Result<(), StreamReadError> {
        self.blocking_read(id, |b| b.get_at(position, num, dst))
    }

    /// Non-blocking read: a single attempt, soft miss returned as-is.
    pub fn get_data_try(
        &self,
        id: BufferId,
        dst: &mut Stream,
        start_time: f64,
        duration: f64,
    ) -> std::result::Result<(), StreamReadError> {
        if !self.is_running() {
            std::thread::sleep(IDLE_SLEEP);
            return Err(StreamReadError::Idle);
        }
        let slot = self.slot(id).map_err(|_| StreamReadError::Invalid)?;
        let mut state = lock(&slot.state);
        if state.generation != id.generation() {
            return Err(StreamReadError::Invalid);
        }
        let Some(buffer) = state.buffer.as_mut() else {
            return Err(StreamReadError::Invalid);
        };
        buffer.get(dst, start_time, duration).map_err(StreamReadError::Miss)
    }

    /// The retry-until-data-or-idle loop shared by both blocking reads.
    ///
    /// The caller-supplied attempt runs under the slot lock. On a soft miss
    /// while running, the reader waits on the slot's condvar; the lock is
    /// held from the run-state check to the wait, which is what makes the
    /// stop-side "flip flag, then notify under the lock" wake-up race-free.
    fn blocking_read(
        &self,
        id: BufferId,
        mut attempt: impl FnMut(&TimeBuffer) -> std::result::Result<(), ReadError>,
    ) -> std::result::Result<(), StreamReadError> {
        if !self.is_running() {
            std::thread::sleep(IDLE_SLEEP);
            return Err(StreamReadError::Idle);
        }
        let slot = self.slot(id).map_err(|_| StreamReadError::Invalid)?;
        let mut state = lock(&slot.state);
        loop {
            if state.generation != id.generation() {
                return Err(StreamReadError::Invalid);
            }
            let Some(buffer) = state.buffer.as_ref() else {
                return Err(StreamReadError::Invalid);
            };
            match attempt(buffer) {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() => {
                    if !self.is_running() {
                        return Err(StreamReadError::Idle);
                    }
                    state = slot
                        .data_ready
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                    if !self.is_running() {
                        return Err(StreamReadError::Idle);
                    }
                }
                Err(e) => return Err(StreamReadError::Miss(e)),
            }
        }
    }

    // ── Runnable table ──

    /// Register a component for batch start/stop. Only legal while idle.
    pub fn add_runnable(&self, runnable: Box<dyn Runnable + Send>) -> Result<usize> {
        if self.is_running() {
            return Err(SigFlowError::NotIdle);
        }
        let mut table = lock(&self.runnables);
        for (index, cell) in table.iter_mut().enumerate() {
            if matches!(cell, RunnableCell::Empty) {
                tracing::debug!("added runnable '{}' at slot {}", runnable.name(), index);
                *cell = RunnableCell::Parked(runnable);
                return Ok(index);
            }
        }
        Err(SigFlowError::RunnableTableFull)
    }

    fn start_threads(&self) {
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<()>(MAX_RUNNABLES);
        let mut spawned = 0usize;

        let mut table = lock(&self.runnables);
        for cell in table.iter_mut() {
            if matches!(cell, RunnableCell::Parked(_)) {
                let RunnableCell::Parked(mut runnable) =
                    std::mem::replace(cell, RunnableCell::Empty)
                else {
                    continue;
                };
                let active = Arc::clone(&self.threads_active);
                let ready = ready_tx.clone();
                let name = runnable.name().to_string();
                let handle = std::thread::Builder::new().name(name.clone()).spawn(
                    move || -> Box<dyn Runnable + Send> {
                        runnable.enter();
                        let _ = ready.send(());
                        drop(ready);
                        while active.load(Ordering::Acquire) {
                            runnable.run();
                        }
                        runnable.flush();
                        runnable
                    },
                );
                match handle {
                    Ok(handle) => {
                        *cell = RunnableCell::Running(handle);
                        spawned += 1;
                    }
                    Err(e) => tracing::error!("failed to spawn thread '{}': {}", name, e),
                }
            }
        }
        drop(table);
        drop(ready_tx);

        // Wait until every component finished enter(), so read cursors are
        // anchored before any data can flow. A thread that dies in enter()
        // drops its sender, which ends the wait instead of hanging it.
        for _ in 0..spawned {
            let _ = ready_rx.recv();
        }
    }

    fn join_threads(&self) {
        let mut table = lock(&self.runnables);
        for cell in table.iter_mut() {
            if matches!(cell, RunnableCell::Running(_)) {
                let RunnableCell::Running(handle) =
                    std::mem::replace(cell, RunnableCell::Empty)
                else {
                    continue;
                };
                match handle.join() {
                    Ok(runnable) => *cell = RunnableCell::Parked(runnable),
                    Err(_) => tracing::error!("component thread panicked"),
                }
            }
        }
    }

    // ── Jobs ──

    /// Register an external executable to run around the lifecycle.
    /// `JobPhase::Now` executes immediately instead of registering.
    pub fn add_job(&self, program: &str, args: &[&str], phase: JobPhase, wait: bool) {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        if phase == JobPhase::Now {
            Self::execute_job(program, &args, wait);
            return;
        }
        lock(&self.jobs).push(Job {
            program: program.to_string(),
            args,
            phase,
            wait,
        });
    }

    fn run_jobs(&self, phase: JobPhase) {
        let jobs: Vec<Job> = lock(&self.jobs)
            .iter()
            .filter(|j| j.phase == phase)
            .cloned()
            .collect();
        for job in jobs {
            Self::execute_job(&job.program, &job.args, job.wait);
        }
    }

    fn execute_job(program: &str, args: &[String], wait: bool) {
        let mut command = std::process::Command::new(program);
        command.args(args);
        if wait {
            match command.status() {
                Ok(status) if status.success() => {
                    tracing::debug!("job '{}' finished", program)
                }
                Ok(status) => tracing::warn!("job '{}' exited with {}", program, status),
                Err(e) => tracing::warn!("failed executing '{}': {}", program, e),
            }
        } else if let Err(e) = command.spawn() {
            tracing::warn!("failed executing '{}': {}", program, e);
        }
    }

    // ── Lifecycle ──

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Cancellation token observed by component loops and blocking waits.
    pub fn run_token(&self) -> RunToken {
        RunToken(Arc::clone(&self.running))
    }

    /// Start the pipeline: pre-jobs, buffer reset, component threads, the
    /// optional sync handshake, then the transition to RUNNING.
    pub fn start(&self) -> Result<()> {
        if self.is_running() {
            return Err(SigFlowError::Lifecycle("start while running"));
        }

        self.run_jobs(JobPhase::Pre);

        for slot in self.slots.iter() {
            let mut state = lock(&slot.state);
            if let Some(buffer) = state.buffer.as_mut() {
                buffer.reset(0.0);
            }
        }

        // Drop any cancel signal left over from a previous cycle.
        while self.cancel_rx.try_recv().is_ok() {}

        self.threads_active.store(true, Ordering::Release);
        self.start_threads();

        *lock(&self.run_mode) = RunMode::RunAndQuit;
        if let Err(e) = self.perform_handshake() {
            // Unwind the threads we already spawned; the pipeline never ran.
            self.threads_active.store(false, Ordering::Release);
            self.join_threads();
            return Err(e);
        }

        *lock(&self.start_instant) = Some(Instant::now());
        let wall = (Utc::now(), Local::now());
        *lock(&self.start_wall) = Some(wall);
        self.running.store(true, Ordering::Release);

        if self.options.sync.enabled && !self.options.sync.listen {
            let mode = *lock(&self.run_mode);
            tracing::info!("sending start message ({:?})", mode);
            if let Some(link) = lock(&self.link).as_mut() {
                link.send(MsgType::Start, mode)?;
            }
        }

        if let Some(path) = &self.options.report {
            match RunReport::create(path) {
                Ok(mut report) => {
                    if let Err(e) = report.record_start(wall.0, wall.1) {
                        tracing::warn!("failed writing run report: {}", e);
                    }
                    *lock(&self.report) = Some(report);
                }
                Err(e) => tracing::warn!("failed creating run report: {}", e),
            }
        }

        tracing::info!("pipeline started");
        Ok(())
    }

    /// The countdown / sync-handshake step between thread spawn and the
    /// transition to RUNNING. A listening client blocks here until the
    /// server's START message arrives and adopts the run mode it carries.
    fn perform_handshake(&self) -> Result<()> {
        if !self.options.sync.enabled {
            self.countdown();
            return Ok(());
        }
        if self.options.sync.listen {
            let mut link = SyncLink::listen(
                self.options.sync.transport,
                &self.options.sync.host,
                self.options.sync.port,
            )?;
            tracing::info!("waiting for sync message to start");
            let id = loop {
                let (msg_type, id) = link.recv()?;
                if msg_type == MsgType::Start {
                    break id;
                }
            };
            *lock(&self.run_mode) = id;
            *lock(&self.link) = Some(link);
        } else {
            self.countdown();
            let link = SyncLink::connect(
                self.options.sync.transport,
                &self.options.sync.host,
                self.options.sync.port,
            )?;
            *lock(&self.run_mode) = self.options.sync.run_mode;
            *lock(&self.link) = Some(link);
        }
        Ok(())
    }

    /// Stop the pipeline. Safe to call while idle (no-op). The idle
    /// transition is made visible to all readers before anything else
    /// happens, so no reader can block past this call.
    pub fn stop(&self) -> Result<()> {
        if !self.is_running() {
            return Ok(());
        }

        *lock(&self.last_run) = self.elapsed();
        self.running.store(false, Ordering::Release);

        if self.options.sync.enabled && !self.options.sync.listen {
            let mode = *lock(&self.run_mode);
            tracing::info!("sending stop message ({:?})", mode);
            if let Some(mut link) = lock(&self.link).take() {
                if let Err(e) = link.send(MsgType::Stop, mode) {
                    tracing::warn!("failed sending stop message: {}", e);
                }
            }
        }

        self.threads_active.store(false, Ordering::Release);

        // Wake every blocked reader. The slot lock is taken first: a reader
        // holds it from its run-state check to its condvar wait, so locking
        // here guarantees the notification cannot fall between the two.
        for slot in self.slots.iter() {
            let _state = lock(&slot.state);
            slot.data_ready.notify_all();
        }

        self.join_threads();

        if let Some(mut report) = lock(&self.report).take() {
            if let Err(e) = report.record_stop(Utc::now(), Local::now()) {
                tracing::warn!("failed writing run report: {}", e);
            }
        }

        self.run_jobs(JobPhase::Post);

        tracing::info!("pipeline stopped (runtime {:.2}s)", self.run_time());
        Ok(())
    }

    /// Block until the pipeline should stop: for the configured runtime,
    /// for [`Registry::cancel_wait`], or (in sync listen mode) for the
    /// server's STOP message. Returns immediately when the adopted run mode
    /// is QUIT.
    pub fn wait(&self) {
        if *lock(&self.run_mode) == RunMode::Quit {
            return;
        }

        if self.options.sync.enabled && self.options.sync.listen {
            tracing::info!("waiting for sync message to stop");
            let taken = lock(&self.link).take();
            if let Some(mut link) = taken {
                loop {
                    match link.recv() {
                        Ok((MsgType::Stop, id)) => {
                            *lock(&self.run_mode) = id;
                            break;
                        }
                        Ok(_) => continue,
                        Err(e) => {
                            tracing::warn!("sync receive failed: {}", e);
                            break;
                        }
                    }
                }
            }
            return;
        }

        if self.options.runtime > 0.0 {
            let runtime = Duration::from_secs_f64(self.options.runtime);
            tracing::info!("pipeline stops after {:?}", runtime);
            let _ = self.cancel_rx.recv_timeout(runtime);
        } else {
            let _ = self.cancel_rx.recv();
        }
    }

    /// Release a pending [`Registry::wait`] early.
    pub fn cancel_wait(&self) {
        let _ = self.cancel_tx.send(());
    }

    /// True when the last handshake asked for the whole pipeline to loop
    /// again after stopping.
    pub fn do_restart(&self) -> bool {
        *lock(&self.run_mode) == RunMode::RunAndRestart
    }

    /// Tear down every buffer, every registered component and all jobs.
    /// Call after `stop()`. Dropping the components also releases their
    /// handles on the registry, which is what allows the registry itself to
    /// be dropped.
    pub fn clear(&self) {
        for slot in self.slots.iter() {
            let mut state = lock(&slot.state);
            if state.buffer.take().is_some() {
                state.generation = state.generation.wrapping_add(1);
            }
            slot.data_ready.notify_all();
        }
        let mut table = lock(&self.runnables);
        for cell in table.iter_mut() {
            *cell = RunnableCell::Empty;
        }
        lock(&self.jobs).clear();
        tracing::info!("pipeline cleared");
    }

    // ── Clock ──

    fn elapsed(&self) -> Duration {
        match *lock(&self.start_instant) {
            Some(instant) => instant.elapsed(),
            None => Duration::ZERO,
        }
    }

    /// Seconds since `start()`; 0.0 while idle.
    pub fn elapsed_time(&self) -> f64 {
        if !self.is_running() {
            return 0.0;
        }
        self.elapsed().as_secs_f64()
    }

    /// Duration of the last completed run, in seconds.
    pub fn run_time(&self) -> f64 {
        lock(&self.last_run).as_secs_f64()
    }

    /// Wall-clock timestamps captured at the last `start()`.
    pub fn start_wall_clock(&self) -> Option<(DateTime<Utc>, DateTime<Local>)> {
        *lock(&self.start_wall)
    }

    fn countdown(&self) {
        for remaining in (1..=self.options.countdown).rev() {
            tracing::info!("starting in {}s", remaining);
            std::thread::sleep(Duration::from_secs(1));
        }
    }

    // ── Internals ──

    /// The owning `Arc` of this registry, for handing to components.
    pub(crate) fn shared(&self) -> Result<Arc<Registry>> {
        self.weak_self
            .upgrade()
            .ok_or(SigFlowError::Lifecycle("registry is being dropped"))
    }

    fn slot(&self, id: BufferId) -> Result<&BufferSlot> {
        self.slots
            .get(id.index() as usize)
            .ok_or(SigFlowError::InvalidBufferId(id))
    }

    fn with_buffer<T>(&self, id: BufferId, f: impl FnOnce(&mut TimeBuffer) -> T) -> Result<T> {
        let slot = self.slot(id)?;
        let mut state = lock(&slot.state);
        if state.generation != id.generation() {
            return Err(SigFlowError::StaleBufferId(id));
        }
        match state.buffer.as_mut() {
            Some(buffer) => Ok(f(buffer)),
            None => Err(SigFlowError::InvalidBufferId(id)),
        }
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.threads_active.store(false, Ordering::Release);
    }
}
