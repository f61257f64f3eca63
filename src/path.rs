//! The routing loop: one input node feeding one or more output nodes
//! through the hook pipeline and the multi-reader queue.
//!
//! A path owns one ingest thread and, when a periodic rate is configured,
//! one emit thread driven by a monotonic interval timer. With no rate the
//! ingest thread emits inline after every successful enqueue; destinations
//! then hold queue cursors and release samples as they pass. In periodic
//! mode destinations never pull, so they are not registered as queue
//! readers at all: the ingest thread instead publishes its most recent
//! vector into a snapshot the emit thread re-sends on every tick, and the
//! producer keeps advancing over old slots. Threads shut down
//! cooperatively: a shared flag is polled at the top of each loop
//! iteration, and blocking transports are expected to unblock themselves
//! (close of the backing channel or socket) rather than being cancelled.
//!
//! Backpressure policy: a full queue shortens `push_many`, the path warns
//! and drops the unpushed tail back into the pool. A drained pool shortens
//! the read vector. Neither condition is fatal; transport failures are, for
//! the thread that hit them.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use derive_builder::Builder;
use enum_as_inner::EnumAsInner;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::hook::{Hook, HookContext, Phase, Pipeline, Tick};
use crate::node::{Direction, Node, TransportError};
use crate::pool::Pool;
use crate::queue::{MultiQueue, ReaderId};
use crate::sample::SampleRef;
use crate::signal::SignalList;
use crate::stats::{Metric, SharedStats, Stats};
use crate::timing::{IntervalTimer, Timestamp};

/// Tunables of one path.
#[derive(Debug, Clone, Builder)]
pub struct PathConfig {
    /// Periodic emission rate in Hz; zero emits inline after every ingest.
    #[builder(default = 0.0)]
    pub rate: f64,
    /// Queue depth in samples.
    #[builder(default = 1024)]
    pub queuelen: usize,
    /// Value slots per sample.
    #[builder(default = 64)]
    pub samplelen: usize,
    /// Samples read and written per node call.
    #[builder(default = 1)]
    pub vectorize: usize,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            rate: 0.0,
            queuelen: 1024,
            samplelen: 64,
            vectorize: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumAsInner)]
pub enum PathState {
    Created,
    Prepared,
    Running,
    Stopped,
}

struct PathShared {
    name: String,
    queue: MultiQueue,
    pool: Pool,
    pipeline: Mutex<Pipeline>,
    shutdown: AtomicBool,
    /// Hook cursors and the history window each must keep visible.
    hook_readers: Vec<(ReaderId, u64)>,
    stats: SharedStats,
    /// The most recent ingested vector, re-sent by the periodic emit
    /// thread. Empty until the first samples arrive; unused when the path
    /// emits inline.
    last_vector: Mutex<Vec<SampleRef>>,
    skipped: AtomicU64,
    overruns: AtomicU64,
}

struct Destination {
    node: Box<dyn Node>,
    /// Queue cursor; only inline-emitting destinations pull, so periodic
    /// paths leave this unset.
    reader: Option<ReaderId>,
}

/// A message path from one input node to its destinations.
pub struct Path {
    name: String,
    config: PathConfig,
    state: PathState,
    input: Option<Box<dyn Node>>,
    outputs: Vec<Box<dyn Node>>,
    pipeline: Option<Pipeline>,
    signals: SignalList,
    shared: Option<Arc<PathShared>>,
    pool: Option<Pool>,
    destinations: Vec<Destination>,
    ingest: Option<JoinHandle<()>>,
    emit: Option<JoinHandle<()>>,
}

impl Path {
    pub fn new(name: impl Into<String>, input: Box<dyn Node>, config: PathConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: PathState::Created,
            input: Some(input),
            outputs: Vec::new(),
            pipeline: Some(Pipeline::new()),
            signals: SignalList::default(),
            shared: None,
            pool: None,
            destinations: Vec::new(),
            ingest: None,
            emit: None,
        }
    }

    pub fn add_output(&mut self, node: Box<dyn Node>) {
        assert!(
            self.state.is_created(),
            "destinations are fixed once a path is prepared"
        );
        self.outputs.push(node);
    }

    pub fn add_hook(&mut self, hook: Box<dyn Hook>) {
        assert!(
            self.state.is_created(),
            "hooks are fixed once a path is prepared"
        );
        self.pipeline
            .as_mut()
            .expect("pipeline present before prepare")
            .push(hook);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn state(&self) -> PathState {
        self.state
    }

    /// The input signal descriptors, frozen at prepare.
    pub fn signals(&self) -> &SignalList {
        &self.signals
    }

    /// The path's sample pool, available once prepared.
    pub fn pool(&self) -> Option<&Pool> {
        self.pool.as_ref()
    }

    /// Samples dropped by read-phase hooks so far.
    pub fn skipped(&self) -> u64 {
        self.shared
            .as_ref()
            .map_or(0, |shared| shared.skipped.load(Ordering::Relaxed))
    }

    /// Missed periodic ticks accumulated by the emit thread.
    pub fn overruns(&self) -> u64 {
        self.shared
            .as_ref()
            .map_or(0, |shared| shared.overruns.load(Ordering::Relaxed))
    }

    /// Snapshot of the path's metric set, available once prepared.
    pub fn stats(&self) -> Option<Stats> {
        self.shared
            .as_ref()
            .map(|shared| shared.stats.lock().unwrap().clone())
    }

    /// Sort hooks, allocate pool and queue, register the reader cursors and
    /// run the hook lifecycle. CREATED → PREPARED.
    pub fn prepare(&mut self) -> Result<()> {
        if !self.state.is_created() {
            return Err(Error::Config(format!(
                "path {} cannot be prepared in state {:?}",
                self.name, self.state
            )));
        }
        if self.outputs.is_empty() {
            return Err(Error::Config(format!("path {} has no destinations", self.name)));
        }
        if self.config.vectorize == 0 {
            return Err(Error::Config("vectorize must be at least 1".into()));
        }

        let pipeline = self
            .pipeline
            .as_mut()
            .expect("pipeline present before prepare");
        pipeline.sort();

        let input = self.input.as_ref().expect("input present before prepare");
        self.signals = input.signals(Direction::Input).clone();

        let total_history: usize = pipeline
            .entries_mut()
            .iter()
            .map(|entry| entry.hook().history())
            .sum();
        let pool = Pool::new(
            self.config.queuelen + self.config.vectorize + total_history,
            self.config.samplelen,
        );
        let stats = SharedStats::default();

        let mut ctx = HookContext {
            signals: &mut self.signals,
            pool: &pool,
            stats: stats.clone(),
        };
        pipeline
            .init(&mut ctx)
            .map_err(|err| Error::Config(format!("hook init failed: {err}")))?;
        pipeline
            .parse()
            .map_err(|err| Error::Config(format!("hook parse failed: {err}")))?;

        let mut pipeline = self
            .pipeline
            .take()
            .expect("pipeline present before prepare");
        let mut queue = MultiQueue::new(self.config.queuelen);
        let mut hook_readers = Vec::new();
        for entry in pipeline.entries_mut() {
            let reader = queue.reader_add(0);
            hook_readers.push((reader, entry.hook().history() as u64));
        }
        // Periodic destinations re-send a snapshot and never pull, so they
        // must not gate the producer as queue readers.
        let periodic = self.config.rate > 0.0;
        for output in self.outputs.drain(..) {
            let reader = (!periodic).then(|| queue.reader_add(0));
            self.destinations.push(Destination {
                node: output,
                reader,
            });
        }

        self.pool = Some(pool.clone());
        self.shared = Some(Arc::new(PathShared {
            name: self.name.clone(),
            queue,
            pool,
            pipeline: Mutex::new(pipeline),
            shutdown: AtomicBool::new(false),
            hook_readers,
            stats,
            last_vector: Mutex::new(Vec::new()),
            skipped: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
        }));

        self.state = PathState::Prepared;
        Ok(())
    }

    /// Start the node endpoints and the routing threads. Rejected unless
    /// the path is PREPARED.
    pub fn start(&mut self) -> Result<()> {
        if !self.state.is_prepared() {
            return Err(Error::Config(format!(
                "path {} cannot be started in state {:?}",
                self.name, self.state
            )));
        }
        let shared = self.shared.clone().expect("shared state exists when prepared");

        info!(
            path = %self.name,
            hooks = shared.pipeline.lock().unwrap().len(),
            rate = self.config.rate,
            "starting path"
        );

        shared
            .pipeline
            .lock()
            .unwrap()
            .path_start()
            .map_err(|err| Error::Config(format!("hook start failed: {err}")))?;

        let mut input = self.input.take().expect("input present when prepared");
        input.start()?;
        let mut destinations = std::mem::take(&mut self.destinations);
        for destination in &mut destinations {
            destination.node.start()?;
        }

        shared.shutdown.store(false, Ordering::Release);
        let vectorize = self.config.vectorize;

        if self.config.rate > 0.0 {
            let timer = IntervalTimer::from_rate(self.config.rate)
                .map_err(|err| Error::Resource(err.to_string()))?;
            let emit_shared = shared.clone();
            self.emit = Some(
                std::thread::Builder::new()
                    .name(format!("{}:emit", self.name))
                    .spawn(move || run_emit(emit_shared, destinations, timer))
                    .map_err(|err| Error::Resource(err.to_string()))?,
            );
            destinations = Vec::new();
        }

        let ingest_shared = shared;
        self.ingest = Some(
            std::thread::Builder::new()
                .name(format!("{}:ingest", self.name))
                .spawn(move || run_ingest(ingest_shared, input, destinations, vectorize))
                .map_err(|err| Error::Resource(err.to_string()))?,
        );

        self.state = PathState::Running;
        Ok(())
    }

    /// Request cooperative shutdown, join the threads and run the stop
    /// hooks. RUNNING → STOPPED.
    pub fn stop(&mut self) -> Result<()> {
        if !self.state.is_running() {
            return Err(Error::Config(format!(
                "path {} cannot be stopped in state {:?}",
                self.name, self.state
            )));
        }
        let shared = self.shared.clone().expect("shared state exists when running");

        info!(path = %self.name, "stopping path");
        shared.shutdown.store(true, Ordering::Release);

        if let Some(handle) = self.ingest.take() {
            handle.join().ok();
        }
        if let Some(handle) = self.emit.take() {
            handle.join().ok();
        }

        self.state = PathState::Stopped;
        shared
            .pipeline
            .lock()
            .unwrap()
            .path_stop()
            .map_err(|err| Error::Config(format!("hook stop failed: {err}")))?;
        Ok(())
    }
}

impl Drop for Path {
    fn drop(&mut self) {
        if self.state.is_running() {
            if let Some(shared) = &self.shared {
                shared.shutdown.store(true, Ordering::Release);
            }
        }
        if let Some(shared) = &self.shared {
            if let Ok(mut pipeline) = shared.pipeline.lock() {
                pipeline.deinit().ok();
            }
        }
    }
}

/// Run the write-phase hooks over `batch` and hand the survivors to one
/// destination. Returns the number the transport accepted.
fn write_one(
    shared: &PathShared,
    destination: &mut Destination,
    mut batch: Vec<SampleRef>,
) -> std::result::Result<usize, TransportError> {
    let tosend = shared
        .pipeline
        .lock()
        .unwrap()
        .process(Phase::Write, &mut batch);
    if tosend == 0 {
        return Ok(0);
    }

    let sent = match destination.node.write(&batch) {
        Ok(sent) => sent,
        Err(err) => {
            error!(
                path = %shared.name,
                node = destination.node.name(),
                %err,
                "write failed"
            );
            return Err(err);
        }
    };
    if sent < tosend {
        warn!(
            path = %shared.name,
            node = destination.node.name(),
            sent,
            tosend,
            "partial write"
        );
    }
    Ok(sent)
}

/// Emit the most recent ingested vector to every destination without
/// touching any queue cursor. A quiet path (no snapshot yet) is a no-op.
fn resend_destinations(
    shared: &PathShared,
    destinations: &mut [Destination],
) -> std::result::Result<(), TransportError> {
    let snapshot = shared.last_vector.lock().unwrap().clone();
    if snapshot.is_empty() {
        return Ok(());
    }
    for destination in destinations.iter_mut() {
        write_one(shared, destination, snapshot.clone())?;
    }
    Ok(())
}

/// Emit once to every destination from its own queue cursor, advancing the
/// cursor by what was written and recycling the released samples.
fn write_destinations(
    shared: &PathShared,
    destinations: &mut [Destination],
    vectorize: usize,
) -> std::result::Result<(), TransportError> {
    for destination in destinations.iter_mut() {
        let reader = destination
            .reader
            .expect("inline destination registered a queue reader at prepare");
        let base = shared.queue.reader_cursor(reader);

        let batch = shared.queue.get_many(vectorize, base);
        let available = batch.len();
        if available == 0 {
            continue;
        }
        if available < vectorize {
            debug!(
                path = %shared.name,
                node = destination.node.name(),
                available,
                expected = vectorize,
                "queue underrun"
            );
        }

        let sent = write_one(shared, destination, batch)?;
        let released = shared.queue.pull_many(reader, sent);
        debug!(
            path = %shared.name,
            released = released.len(),
            "releasing samples to pool"
        );
    }
    Ok(())
}

fn run_ingest(
    shared: Arc<PathShared>,
    mut input: Box<dyn Node>,
    mut destinations: Vec<Destination>,
    vectorize: usize,
) {
    // No destinations here means a periodic path: they live on the emit
    // thread and feed from the snapshot this loop publishes.
    let inline_emit = !destinations.is_empty();
    let mut ready: Vec<SampleRef> = Vec::with_capacity(vectorize);
    let mut last_received: Option<Timestamp> = None;
    let mut last_sequence: Option<u64> = None;

    while !shared.shutdown.load(Ordering::Acquire) {
        // Refill the read vector from the pool; proceed short on underrun.
        let want = vectorize - ready.len();
        if want > 0 {
            let mut fresh = shared.pool.alloc_many(want);
            if fresh.len() < want {
                warn!(path = %shared.name, "pool underrun");
            }
            ready.append(&mut fresh);
        }
        if ready.is_empty() {
            std::thread::sleep(Duration::from_millis(1));
            continue;
        }

        let received = match input.read(&mut ready) {
            Ok(0) => continue,
            Ok(received) => received,
            Err(TransportError::Closed) => {
                info!(path = %shared.name, node = input.name(), "input closed");
                break;
            }
            Err(err) => {
                error!(path = %shared.name, node = input.name(), %err, "read failed");
                break;
            }
        };

        let mut batch: Vec<SampleRef> = ready.drain(..received).collect();

        {
            let mut stats = shared.stats.lock().unwrap();
            for sample in &batch {
                stats.update(
                    Metric::OneWayDelay,
                    sample.ts_received.seconds_since(sample.ts_origin),
                );
                if let Some(previous) = last_received {
                    stats.update(Metric::Gap, sample.ts_received.seconds_since(previous));
                }
                last_received = Some(sample.ts_received);
                if let Some(previous) = last_sequence {
                    if sample.sequence < previous {
                        stats.update(Metric::Reordered, (previous - sample.sequence) as f64);
                    }
                }
                last_sequence = Some(sample.sequence);
            }
        }

        let accepted = shared
            .pipeline
            .lock()
            .unwrap()
            .process(Phase::Read, &mut batch);
        if accepted < received {
            let dropped = (received - accepted) as u64;
            shared.skipped.fetch_add(dropped, Ordering::Relaxed);
            shared
                .stats
                .lock()
                .unwrap()
                .update(Metric::Skipped, dropped as f64);
            debug!(
                path = %shared.name,
                skipped = dropped,
                "hooks dropped samples"
            );
        }

        if !inline_emit && !batch.is_empty() {
            *shared.last_vector.lock().unwrap() = batch.clone();
        }

        shared.queue.push_many(&mut batch);
        if !batch.is_empty() {
            warn!(
                path = %shared.name,
                dropped = batch.len(),
                "queue full, dropping tail"
            );
            batch.clear();
        }

        // Keep each hook's cursor lagging the producer by its history
        // window; everything older recycles.
        let head = shared.queue.head();
        for &(reader, history) in &shared.hook_readers {
            let cursor = shared.queue.reader_cursor(reader);
            let lag = head - cursor;
            if lag > history {
                drop(shared.queue.pull_many(reader, (lag - history) as usize));
            }
        }

        if inline_emit && write_destinations(&shared, &mut destinations, vectorize).is_err() {
            break;
        }
    }

    input.stop().ok();
    for destination in &mut destinations {
        destination.node.stop().ok();
    }
}

fn run_emit(
    shared: Arc<PathShared>,
    mut destinations: Vec<Destination>,
    mut timer: IntervalTimer,
) {
    while !shared.shutdown.load(Ordering::Acquire) {
        let expirations = timer.wait();
        if expirations > 1 {
            shared
                .overruns
                .fetch_add(expirations - 1, Ordering::Relaxed);
            warn!(path = %shared.name, overruns = expirations - 1, "timer overrun");
        }
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }
        // Nothing received yet; skip the tick.
        if shared.last_vector.lock().unwrap().is_empty() {
            continue;
        }
        if shared.pipeline.lock().unwrap().tick() == Tick::Skip {
            continue;
        }

        if resend_destinations(&shared, &mut destinations).is_err() {
            break;
        }
        shared.pipeline.lock().unwrap().periodic();
    }

    for destination in &mut destinations {
        destination.node.stop().ok();
    }
}
