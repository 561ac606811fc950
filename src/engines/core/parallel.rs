//! Streaming pipeline coordinator
//!
//! A single reader thread frames and deserializes records from a
//! [`ByteSource`] and numbers them in input order. A bounded queue feeds a
//! rayon pool of workers running a [`RecordProcessor`], and a single writer
//! thread puts the results back in input order before offering them to a
//! [`ResultSink`].
//!
//! Backpressure comes from two places. The work queue holds at most
//! `queue_capacity` records, and the reader will not admit a record whose
//! sequence number is `reorder_window` or more ahead of the next one the
//! writer must emit. The reorder buffer therefore never holds more than
//! `reorder_window` results.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};

use crate::engines::compute::alignment::{Aligner, AlignmentMode};
use crate::engines::compute::scoring::ScoringScheme;
use crate::engines::compute::RecordProcessor;
use crate::engines::core::io::{ByteSource, ResultSink, SinkStatus};
use crate::engines::storage::formats::{deserialize_record, FrameDecoder, DEFAULT_MAX_FRAME_LEN};
use crate::engines::storage::PipelineRecord;
use crate::engines::{EngineError, EngineResult};

// Default queue capacity
const DEFAULT_QUEUE_CAPACITY: usize = 1024;

// Default size of a single source read
const DEFAULT_READ_CHUNK_SIZE: usize = 64 * 1024; // 64KB

// Sink retry backoff bounds
const INITIAL_BACKOFF: Duration = Duration::from_millis(1);
const MAX_BACKOFF: Duration = Duration::from_millis(100);

// How often a reader blocked on the reorder window rechecks cancellation
const WINDOW_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Get the default number of worker threads
pub fn default_num_threads() -> usize {
    num_cpus::get()
}

/// What to do with a record whose decoding or processing failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RecordErrorPolicy {
    /// Log the failure, report it in the summary and carry on
    #[default]
    Skip,
    /// Fail the whole pipeline
    Abort,
}

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of worker threads
    pub worker_count: usize,
    /// Capacity of the work queue between reader and workers
    pub queue_capacity: usize,
    /// Scoring scheme shared by all alignments
    pub scoring: Arc<ScoringScheme>,
    /// Alignment mode
    pub mode: AlignmentMode,
    /// Optional diagonal band width
    pub band_width: Option<usize>,
    /// Whether the input is made of compressed blocks
    pub compressed: bool,
    /// Maximum bytes requested from the source per read
    pub read_chunk_size: usize,
    /// Largest record or compressed block accepted from the source
    pub max_frame_len: usize,
    /// Maximum distance between the next record to emit and the newest
    /// admitted one; defaults to `queue_capacity + worker_count`
    pub reorder_window: Option<usize>,
    /// Handling of per-record failures
    pub error_policy: RecordErrorPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_count: default_num_threads(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            scoring: Arc::new(ScoringScheme::default()),
            mode: AlignmentMode::default(),
            band_width: None,
            compressed: false,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            reorder_window: None,
            error_policy: RecordErrorPolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Set the number of workers
    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Set the work queue capacity
    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Set the scoring scheme
    pub fn with_scoring(mut self, scoring: Arc<ScoringScheme>) -> Self {
        self.scoring = scoring;
        self
    }

    /// Set the alignment mode
    pub fn with_mode(mut self, mode: AlignmentMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the band width
    pub fn with_band_width(mut self, band_width: Option<usize>) -> Self {
        self.band_width = band_width;
        self
    }

    /// Expect compressed blocks instead of plain records
    pub fn with_compressed(mut self, compressed: bool) -> Self {
        self.compressed = compressed;
        self
    }

    /// Set the source read size
    pub fn with_read_chunk_size(mut self, read_chunk_size: usize) -> Self {
        self.read_chunk_size = read_chunk_size;
        self
    }

    /// Set the largest accepted record or block
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Set the reorder window
    pub fn with_reorder_window(mut self, reorder_window: Option<usize>) -> Self {
        self.reorder_window = reorder_window;
        self
    }

    /// Set the per-record failure policy
    pub fn with_error_policy(mut self, error_policy: RecordErrorPolicy) -> Self {
        self.error_policy = error_policy;
        self
    }

    /// Reorder window in effect
    pub fn effective_reorder_window(&self) -> usize {
        self.reorder_window
            .unwrap_or_else(|| self.queue_capacity.saturating_add(self.worker_count))
    }

    /// Aligner built from the scoring, mode and band settings
    pub fn aligner(&self) -> Aligner {
        Aligner::new(Arc::clone(&self.scoring), self.mode).with_band(self.band_width)
    }

    /// Check every setting
    pub fn validate(&self) -> EngineResult<()> {
        let positive = [
            ("worker_count", Some(self.worker_count)),
            ("queue_capacity", Some(self.queue_capacity)),
            ("read_chunk_size", Some(self.read_chunk_size)),
            ("max_frame_len", Some(self.max_frame_len)),
            ("band_width", self.band_width),
            ("reorder_window", self.reorder_window),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == Some(0)) {
            return Err(EngineError::InvalidConfig(format!("{} must be positive", name)));
        }
        self.scoring
            .validate()
            .map_err(|e| EngineError::InvalidConfig(e.to_string()))
    }
}

/// Lifecycle of a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    Idle,
    Running,
    Draining,
    Stopped,
    Failed,
}

/// A record that was dropped under [`RecordErrorPolicy::Skip`]
#[derive(Debug)]
pub struct RecordFailure {
    pub sequence_number: u64,
    pub error: EngineError,
}

/// Outcome of a finished pipeline
#[derive(Debug)]
pub struct PipelineSummary {
    /// Records framed and numbered by the reader
    pub records_read: u64,
    /// Payloads accepted by the sink
    pub records_emitted: u64,
    /// Records skipped because of per-record failures
    pub failures: Vec<RecordFailure>,
    /// Final state
    pub state: PipelineState,
}

/// Gate keeping the reader within the reorder window
struct OrderWindow {
    next_emitted: Mutex<u64>,
    advanced: Condvar,
    size: u64,
}

impl OrderWindow {
    fn new(size: usize) -> Self {
        Self {
            next_emitted: Mutex::new(0),
            advanced: Condvar::new(),
            size: size as u64,
        }
    }

    /// Block until `seq` fits the window; `false` if cancelled meanwhile
    fn admit<F: Fn() -> bool>(&self, seq: u64, cancelled: F) -> bool {
        let mut next = self.next_emitted.lock();
        while seq >= *next + self.size {
            if cancelled() {
                return false;
            }
            self.advanced.wait_for(&mut next, WINDOW_POLL_INTERVAL);
        }
        true
    }

    fn advance(&self, next: u64) {
        *self.next_emitted.lock() = next;
        self.advanced.notify_all();
    }

    fn wake(&self) {
        let _guard = self.next_emitted.lock();
        self.advanced.notify_all();
    }
}

/// State shared by the coordinator and its tasks
struct Control {
    state: Mutex<PipelineState>,
    stop_requested: AtomicBool,
    first_error: Mutex<Option<EngineError>>,
    drain_tx: Mutex<Option<Sender<()>>>,
    abort_tx: Mutex<Option<Sender<()>>>,
    live_tasks: AtomicUsize,
    window: OrderWindow,
}

impl Control {
    fn new(window: usize) -> Self {
        Self {
            state: Mutex::new(PipelineState::Idle),
            stop_requested: AtomicBool::new(false),
            first_error: Mutex::new(None),
            drain_tx: Mutex::new(None),
            abort_tx: Mutex::new(None),
            live_tasks: AtomicUsize::new(0),
            window: OrderWindow::new(window),
        }
    }

    fn state(&self) -> PipelineState {
        *self.state.lock()
    }

    /// Whether `stop` or a failure told every task to quit taking records
    fn is_cancelled(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// The reader hit the end of input; queued records still get processed
    fn input_exhausted(&self) {
        let mut state = self.state.lock();
        if *state == PipelineState::Running {
            log::debug!("Input exhausted, draining");
            *state = PipelineState::Draining;
        }
    }

    fn stop(&self) {
        {
            let mut state = self.state.lock();
            if *state != PipelineState::Running {
                log::debug!("stop requested in state {:?}, ignoring", *state);
                return;
            }
            *state = PipelineState::Draining;
            self.stop_requested.store(true, Ordering::Release);
        }
        log::info!("Draining pipeline");
        self.drain_tx.lock().take();
        self.window.wake();
    }

    fn fail(&self, error: EngineError) {
        {
            let mut first = self.first_error.lock();
            if first.is_none() {
                log::error!("Pipeline failed: {}", error);
                *first = Some(error);
            } else {
                log::debug!("Further pipeline error after failure: {}", error);
            }
        }
        *self.state.lock() = PipelineState::Failed;
        self.stop_requested.store(true, Ordering::Release);
        self.abort_tx.lock().take();
        self.drain_tx.lock().take();
        self.window.wake();
    }

    /// Called by the reader and the writer as they exit
    fn task_finished(&self) {
        if self.live_tasks.fetch_sub(1, Ordering::AcqRel) == 1 {
            let mut state = self.state.lock();
            if *state != PipelineState::Failed {
                *state = PipelineState::Stopped;
            }
        }
    }
}

/// Handle for stopping a pipeline from another thread
#[derive(Clone)]
pub struct StopHandle {
    control: Arc<Control>,
}

impl StopHandle {
    /// Begin draining: no new records are taken, in-flight work completes
    pub fn stop(&self) {
        self.control.stop();
    }

    /// Current state
    pub fn state(&self) -> PipelineState {
        self.control.state()
    }
}

struct WorkItem {
    seq: u64,
    record: EngineResult<PipelineRecord>,
}

struct Completed {
    seq: u64,
    result: EngineResult<Vec<u8>>,
}

#[derive(Default)]
struct WriterOutcome {
    next: u64,
    emitted: u64,
    failures: Vec<RecordFailure>,
}

struct Tasks {
    reader: JoinHandle<u64>,
    writer: JoinHandle<WriterOutcome>,
    pool: ThreadPool,
}

/// Ordered streaming pipeline
pub struct Pipeline {
    config: PipelineConfig,
    control: Arc<Control>,
    tasks: Option<Tasks>,
}

impl Pipeline {
    /// Create an idle pipeline
    pub fn new(config: PipelineConfig) -> Self {
        let control = Arc::new(Control::new(config.effective_reorder_window()));
        Self {
            config,
            control,
            tasks: None,
        }
    }

    /// The configuration
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Current state
    pub fn state(&self) -> PipelineState {
        self.control.state()
    }

    /// Handle that can stop the pipeline while another thread waits on it
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            control: Arc::clone(&self.control),
        }
    }

    /// Begin draining; see [`StopHandle::stop`]
    pub fn stop(&self) {
        self.control.stop();
    }

    /// Spawn the reader, workers and writer
    pub fn start<S, K, P>(&mut self, source: S, sink: K, processor: P) -> EngineResult<()>
    where
        S: ByteSource + 'static,
        K: ResultSink + 'static,
        P: RecordProcessor + 'static,
    {
        if self.state() != PipelineState::Idle {
            return Err(EngineError::InvalidConfig(format!(
                "pipeline cannot start from state {:?}",
                self.state()
            )));
        }
        self.config.validate()?;

        let config = &self.config;
        let window = config.effective_reorder_window();
        let (work_tx, work_rx) = bounded::<WorkItem>(config.queue_capacity);
        let (result_tx, result_rx) = bounded::<Completed>(window);
        let (drain_tx, drain_rx) = bounded::<()>(0);
        let (abort_tx, abort_rx) = bounded::<()>(0);

        let panic_control = Arc::clone(&self.control);
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.worker_count)
            .thread_name(|idx| format!("ngs-worker-{}", idx))
            .panic_handler(move |_| panic_control.fail(EngineError::WorkerPanic))
            .build()
            .map_err(|e| {
                EngineError::InvalidConfig(format!("failed to build worker pool: {}", e))
            })?;

        *self.control.drain_tx.lock() = Some(drain_tx);
        *self.control.abort_tx.lock() = Some(abort_tx);
        *self.control.state.lock() = PipelineState::Running;
        self.control.live_tasks.store(2, Ordering::Release);

        log::info!(
            "Starting pipeline with {} workers, queue capacity {}, reorder window {}",
            config.worker_count,
            config.queue_capacity,
            window
        );

        let processor: Arc<dyn RecordProcessor> = Arc::new(processor);
        for _ in 0..config.worker_count {
            let processor = Arc::clone(&processor);
            let control = Arc::clone(&self.control);
            let work_rx = work_rx.clone();
            let result_tx = result_tx.clone();
            let drain_rx = drain_rx.clone();
            let abort_rx = abort_rx.clone();
            pool.spawn(move || {
                work_loop(&*processor, &control, &work_rx, &result_tx, &drain_rx, &abort_rx);
            });
        }
        // Workers hold the only remaining ends
        drop(work_rx);
        drop(result_tx);

        let records_sent = Arc::new(AtomicU64::new(0));

        let reader = {
            let control = Arc::clone(&self.control);
            let records_sent = Arc::clone(&records_sent);
            let drain_rx = drain_rx.clone();
            let abort_rx = abort_rx.clone();
            let decoder =
                FrameDecoder::new(config.compressed).with_max_frame_len(config.max_frame_len);
            let chunk_size = config.read_chunk_size;
            let mut source = source;
            thread::Builder::new().name("ngs-reader".to_string()).spawn(move || {
                let result = read_loop(
                    &mut source,
                    decoder,
                    chunk_size,
                    &control,
                    &work_tx,
                    &drain_rx,
                    &abort_rx,
                    &records_sent,
                );
                drop(work_tx);
                if let Err(error) = result {
                    control.fail(error);
                }
                control.task_finished();
                records_sent.load(Ordering::Acquire)
            })
        };
        let reader = match reader {
            Ok(handle) => handle,
            Err(e) => {
                self.control
                    .fail(EngineError::InvalidConfig(format!(
                        "failed to spawn reader thread: {}",
                        e
                    )));
                return Err(EngineError::Io(e));
            }
        };

        let writer = {
            let control = Arc::clone(&self.control);
            let policy = config.error_policy;
            let mut sink = sink;
            thread::Builder::new().name("ngs-writer".to_string()).spawn(move || {
                let mut outcome = WriterOutcome::default();
                let result = write_loop(
                    &mut sink,
                    &result_rx,
                    &abort_rx,
                    &control,
                    policy,
                    &records_sent,
                    &mut outcome,
                )
                .and_then(|()| sink.flush());
                if let Err(error) = result {
                    // Keep whatever reached the sink before the failure
                    let _ = sink.flush();
                    control.fail(error);
                }
                control.task_finished();
                outcome
            })
        };
        let writer = match writer {
            Ok(handle) => handle,
            Err(e) => {
                self.control
                    .fail(EngineError::InvalidConfig(format!(
                        "failed to spawn writer thread: {}",
                        e
                    )));
                let _ = reader.join();
                return Err(EngineError::Io(e));
            }
        };

        self.tasks = Some(Tasks { reader, writer, pool });
        Ok(())
    }

    /// Block until the pipeline has stopped or failed
    ///
    /// A failed pipeline returns [`EngineError::PipelineFailure`] wrapping
    /// the first error raised; output already accepted by the sink stays.
    pub fn wait(&mut self) -> EngineResult<PipelineSummary> {
        let tasks = self
            .tasks
            .take()
            .ok_or_else(|| EngineError::InvalidConfig("pipeline was not started".to_string()))?;

        let records_read = tasks.reader.join().unwrap_or_else(|_| {
            self.control.fail(EngineError::WorkerPanic);
            0
        });
        let outcome = tasks.writer.join().unwrap_or_else(|_| {
            self.control.fail(EngineError::WorkerPanic);
            WriterOutcome::default()
        });
        drop(tasks.pool);

        let state = self.control.state();
        if state == PipelineState::Failed {
            let cause = self.control.first_error.lock().take().unwrap_or(EngineError::WorkerPanic);
            return Err(EngineError::PipelineFailure(Box::new(cause)));
        }

        log::info!(
            "Pipeline finished: {} records read, {} emitted, {} skipped",
            records_read,
            outcome.emitted,
            outcome.failures.len()
        );
        Ok(PipelineSummary {
            records_read,
            records_emitted: outcome.emitted,
            failures: outcome.failures,
            state,
        })
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if let Some(tasks) = self.tasks.take() {
            self.control.stop();
            let _ = tasks.reader.join();
            let _ = tasks.writer.join();
        }
    }
}

/// Start a pipeline and wait for it to finish
pub fn run_pipeline<S, K, P>(
    config: PipelineConfig,
    source: S,
    sink: K,
    processor: P,
) -> EngineResult<PipelineSummary>
where
    S: ByteSource + 'static,
    K: ResultSink + 'static,
    P: RecordProcessor + 'static,
{
    let mut pipeline = Pipeline::new(config);
    pipeline.start(source, sink, processor)?;
    pipeline.wait()
}

#[allow(clippy::too_many_arguments)]
fn read_loop(
    source: &mut dyn ByteSource,
    mut decoder: FrameDecoder,
    chunk_size: usize,
    control: &Control,
    work_tx: &Sender<WorkItem>,
    drain_rx: &Receiver<()>,
    abort_rx: &Receiver<()>,
    records_sent: &AtomicU64,
) -> EngineResult<()> {
    let mut seq = 0u64;

    loop {
        if control.is_cancelled() {
            log::debug!("Reader stopping after {} records", seq);
            return Ok(());
        }
        let chunk = match source.read(chunk_size)? {
            Some(chunk) => chunk,
            None => {
                decoder.finish()?;
                log::debug!("Reader reached end of input after {} records", seq);
                control.input_exhausted();
                return Ok(());
            }
        };
        decoder.push(&chunk);

        while let Some(frame) = decoder.next_frame()? {
            let item = WorkItem {
                seq,
                record: deserialize_record(&frame),
            };
            if !control.window.admit(seq, || control.is_cancelled()) {
                return Ok(());
            }
            let sent = select! {
                send(work_tx, item) -> sent => sent.is_ok(),
                recv(drain_rx) -> _ => false,
                recv(abort_rx) -> _ => false,
            };
            if !sent {
                return Ok(());
            }
            seq += 1;
            records_sent.store(seq, Ordering::Release);
            log::trace!("Queued record {}", seq - 1);
        }
    }
}

fn work_loop(
    processor: &dyn RecordProcessor,
    control: &Control,
    work_rx: &Receiver<WorkItem>,
    result_tx: &Sender<Completed>,
    drain_rx: &Receiver<()>,
    abort_rx: &Receiver<()>,
) {
    while !control.is_cancelled() {
        let item = select! {
            recv(work_rx) -> item => item.ok(),
            recv(drain_rx) -> _ => None,
            recv(abort_rx) -> _ => None,
        };
        let Some(item) = item else { break };

        let result = item.record.and_then(|record| processor.process(&record));
        if result_tx.send(Completed { seq: item.seq, result }).is_err() {
            break;
        }
    }
    log::trace!("Worker {:?} exiting", thread::current().name());
}

fn write_loop(
    sink: &mut dyn ResultSink,
    result_rx: &Receiver<Completed>,
    abort_rx: &Receiver<()>,
    control: &Control,
    policy: RecordErrorPolicy,
    records_sent: &AtomicU64,
    outcome: &mut WriterOutcome,
) -> EngineResult<()> {
    let mut pending: HashMap<u64, EngineResult<Vec<u8>>> = HashMap::new();

    loop {
        let message = select! {
            recv(result_rx) -> message => message.ok(),
            recv(abort_rx) -> _ => return Ok(()),
        };
        let Some(done) = message else { break };
        pending.insert(done.seq, done.result);

        while let Some(result) = pending.remove(&outcome.next) {
            match result {
                Ok(payload) => {
                    if !deliver(sink, &payload, abort_rx)? {
                        return Ok(());
                    }
                    outcome.emitted += 1;
                }
                Err(error) => match policy {
                    RecordErrorPolicy::Skip => {
                        log::warn!("Skipping record {}: {}", outcome.next, error);
                        outcome.failures.push(RecordFailure {
                            sequence_number: outcome.next,
                            error,
                        });
                    }
                    RecordErrorPolicy::Abort => return Err(error),
                },
            }
            outcome.next += 1;
            control.window.advance(outcome.next);
        }
    }

    // Every worker is gone; unless stopped early nothing may be missing
    if !control.is_cancelled() && outcome.next < records_sent.load(Ordering::Acquire) {
        return Err(EngineError::WorkerPanic);
    }
    if !pending.is_empty() {
        log::debug!("Discarding {} results queued behind unfinished records", pending.len());
    }
    Ok(())
}

/// Offer a payload until the sink takes it; `false` if aborted meanwhile
fn deliver(
    sink: &mut dyn ResultSink,
    payload: &[u8],
    abort_rx: &Receiver<()>,
) -> EngineResult<bool> {
    let mut delay = INITIAL_BACKOFF;
    loop {
        match sink.accept(payload)? {
            SinkStatus::Accepted => return Ok(true),
            SinkStatus::Backpressure => {
                log::trace!("Sink applied backpressure, retrying in {:?}", delay);
                match abort_rx.recv_timeout(delay) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => return Ok(false),
                }
                delay = (delay * 2).min(MAX_BACKOFF);
            }
        }
    }
}
