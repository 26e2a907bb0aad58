//! Streaming ingestion
//!
//! ```text
//! reader -> RecordReader -> WorkQueue -> N workers -> output channel -> sink
//! ```
//!
//! The calling thread reads and segments the input, workers parse, run the
//! hooks and the filter, and a single sink thread writes the survivors.
//! Output order is not preserved.

use crate::filter::Filter;
use crate::output::{SessionSink, is_broken_pipe};
use crate::parser::{Session, parse_session};
use crate::plugins::{HookSet, Verdict};
use crate::queue::{DEFAULT_HIGH_WATER_MARK, QueueClosed, WorkQueue};
use crate::request::FieldRequest;
use crate::segment::{DEFAULT_MAX_RECORD_BYTES, RecordReader};
use std::io::{self, Read};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

const PROGRESS_EVERY: u64 = 100_000;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to read input: {0}")]
    Input(#[source] io::Error),

    #[error("Failed to write output: {0}")]
    Output(#[source] io::Error),

    #[error("Output writer panicked")]
    SinkPanicked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    pub threads: usize,
    pub high_water_mark: usize,
    /// Records handed to the queue at once
    pub push_batch: usize,
    /// Records a worker takes at once
    pub pop_batch: usize,
    /// Output channel capacity per worker
    pub output_per_worker: usize,
    pub idle_sleep: Duration,
    pub max_record_bytes: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        PipelineOptions {
            threads: default_threads(),
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            push_batch: 1024,
            pop_batch: 128,
            output_per_worker: 250,
            idle_sleep: Duration::from_millis(10),
            max_record_bytes: DEFAULT_MAX_RECORD_BYTES,
        }
    }
}

pub fn default_threads() -> usize {
    thread::available_parallelism().map_or(1, |n| n.get())
}

/// What happened to the records of one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub read: u64,
    pub emitted: u64,
    pub filtered_out: u64,
    /// Hidden by a plugin hook
    pub suppressed: u64,
    /// Dropped because processing panicked
    pub faulted: u64,
}

#[derive(Debug, Default)]
struct Counters {
    read: AtomicU64,
    filtered_out: AtomicU64,
    suppressed: AtomicU64,
    faulted: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn report(&self, emitted: u64) -> PipelineReport {
        PipelineReport {
            read: self.read.load(Ordering::Relaxed),
            emitted,
            filtered_out: self.filtered_out.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            faulted: self.faulted.load(Ordering::Relaxed),
        }
    }
}

enum Outcome {
    Emit(Session),
    FilteredOut,
    Suppressed,
    Faulted,
}

pub struct Pipeline {
    options: PipelineOptions,
    request: FieldRequest,
    filter: Option<Filter>,
    hooks: HookSet,
}

impl Pipeline {
    /// `request` must already contain every group the filter, the sink
    /// and the hooks read
    pub fn new(
        options: PipelineOptions,
        request: FieldRequest,
        filter: Option<Filter>,
        hooks: HookSet,
    ) -> Self {
        Pipeline {
            options,
            request,
            filter,
            hooks,
        }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Processes the whole input and hands every accepted session to `sink`.
    ///
    /// All workers are stopped and the sink is finished before an input or
    /// output error is returned. A closed pipe on the output is not an error.
    pub fn run<R: Read, S: SessionSink>(
        &self,
        input: R,
        sink: &mut S,
    ) -> Result<PipelineReport, PipelineError> {
        let threads = self.options.threads.max(1);
        let queue = WorkQueue::new(self.options.high_water_mark);
        let counters = Counters::default();
        let (out_tx, out_rx) =
            mpsc::sync_channel::<Session>(self.options.output_per_worker.max(1) * threads);
        let (done_tx, done_rx) = mpsc::channel::<()>();

        debug!(
            "Starting {} workers, fields {:?}, filter {}",
            threads,
            self.request,
            self.filter
                .as_ref()
                .map_or_else(|| "none".to_string(), |f| f.to_string())
        );

        let (read_result, sink_result) = thread::scope(|scope| {
            let writer = scope.spawn(move || drain(out_rx, sink));

            for id in 0..threads {
                let out = out_tx.clone();
                let done = done_tx.clone();
                let (queue, counters) = (&queue, &counters);
                scope.spawn(move || {
                    self.work(id, queue, out, counters);
                    let _ = done.send(());
                });
            }
            drop(out_tx);
            drop(done_tx);

            let read_result = self.produce(input, &queue, &counters);
            queue.finish();
            for _ in 0..threads {
                if done_rx.recv().is_err() {
                    break;
                }
            }

            let sink_result = writer.join().map_err(|_| PipelineError::SinkPanicked);
            (read_result, sink_result)
        });

        self.hooks.finished();

        let (emitted, written) = sink_result?;
        let report = counters.report(emitted);
        debug!(
            "Read {} sessions: {} written, {} filtered out, {} hidden by plugins, {} failed",
            report.read, report.emitted, report.filtered_out, report.suppressed, report.faulted
        );

        read_result?;
        match written {
            Err(e) if is_broken_pipe(&e) => {
                debug!("Output closed early");
                Ok(report)
            }
            Err(e) => Err(PipelineError::Output(e)),
            Ok(()) => Ok(report),
        }
    }

    /// Segments the input into the queue until end of stream, a read error
    /// or the queue closing
    fn produce<R: Read>(
        &self,
        input: R,
        queue: &WorkQueue<Vec<u8>>,
        counters: &Counters,
    ) -> Result<(), PipelineError> {
        let push_batch = self.options.push_batch.max(1);
        let reader = RecordReader::with_max_record_bytes(input, self.options.max_record_bytes);
        let mut batch = Vec::with_capacity(push_batch);

        for record in reader {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    hand_over(queue, batch);
                    return Err(PipelineError::Input(e));
                }
            };

            batch.push(record);
            let read = counters.read.fetch_add(1, Ordering::Relaxed) + 1;
            if read % PROGRESS_EVERY == 0 {
                debug!("{} sessions read, {} queued", read, queue.len());
            }
            if batch.len() >= push_batch {
                let full = std::mem::replace(&mut batch, Vec::with_capacity(push_batch));
                if !hand_over(queue, full) {
                    return Ok(());
                }
            }
        }

        hand_over(queue, batch);
        Ok(())
    }

    fn work(
        &self,
        id: usize,
        queue: &WorkQueue<Vec<u8>>,
        out: SyncSender<Session>,
        counters: &Counters,
    ) {
        let mut discarding = false;

        while queue.is_active() {
            let batch = queue.pop(self.options.pop_batch.max(1));
            if batch.is_empty() {
                thread::sleep(self.options.idle_sleep);
                continue;
            }

            for raw in batch {
                match self.process(&raw) {
                    Outcome::Emit(session) => {
                        if !discarding && out.send(session).is_err() {
                            debug!("Worker {}: output closed, discarding", id);
                            discarding = true;
                        }
                    }
                    Outcome::FilteredOut => Counters::bump(&counters.filtered_out),
                    Outcome::Suppressed => Counters::bump(&counters.suppressed),
                    Outcome::Faulted => Counters::bump(&counters.faulted),
                }
            }
        }
        debug!("Worker {} finished", id);
    }

    fn process(&self, raw: &[u8]) -> Outcome {
        match panic::catch_unwind(AssertUnwindSafe(|| self.evaluate(raw))) {
            Ok(outcome) => outcome,
            Err(_) => {
                match serial_hint(raw) {
                    Some(serial) => warn!("Processing session {} panicked, skipped", serial),
                    None => warn!("Processing a session panicked, skipped"),
                }
                Outcome::Faulted
            }
        }
    }

    fn evaluate(&self, raw: &[u8]) -> Outcome {
        let mut session = parse_session(raw, &self.request);

        match self.hooks.before_filter(&mut session) {
            Verdict::Keep => {}
            Verdict::Suppress => return Outcome::Suppressed,
            Verdict::Fault => return Outcome::Faulted,
        }

        if let Some(filter) = &self.filter
            && !filter.matches(&session)
        {
            return Outcome::FilteredOut;
        }

        match self.hooks.after_filter(&mut session) {
            Verdict::Keep => Outcome::Emit(session),
            Verdict::Suppress => Outcome::Suppressed,
            Verdict::Fault => Outcome::Faulted,
        }
    }
}

/// Feeds the sink until every worker is gone or the sink fails
/// Whether the queue took `batch`; a closed queue drops it
fn hand_over(queue: &WorkQueue<Vec<u8>>, batch: Vec<Vec<u8>>) -> bool {
    let count = batch.len();
    match queue.push(batch) {
        Ok(()) => true,
        Err(QueueClosed) => {
            debug!("Work queue closed, {} records dropped", count);
            false
        }
    }
}

fn drain<S: SessionSink>(sessions: Receiver<Session>, sink: &mut S) -> (u64, io::Result<()>) {
    let mut emitted = 0;
    for session in sessions.iter() {
        if let Err(e) = sink.accept(session) {
            return (emitted, Err(e));
        }
        emitted += 1;
    }
    (emitted, sink.finish())
}

/// `serial=0000d7c5` taken straight from the raw record
fn serial_hint(raw: &[u8]) -> Option<String> {
    const KEY: &[u8] = b"serial=";
    let start = raw.windows(KEY.len()).position(|w| w == KEY)? + KEY.len();
    let digits: String = raw[start..]
        .iter()
        .take_while(|b| b.is_ascii_hexdigit())
        .map(|&b| char::from(b))
        .collect();
    (!digits.is_empty()).then(|| format!("0x{}", digits))
}
