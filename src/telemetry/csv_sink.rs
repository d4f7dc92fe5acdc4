//! csv_sink.rs
//! Lock-free checkpoint sink writing CSV rows from a background thread.
//!
//! Producers (worker threads) push rows into a bounded `ArrayQueue` and never
//! block; a full queue drops the event and bumps a counter. A consumer thread
//! drains the queue in batches and flushes every few batches. `stop()` drains
//! whatever is left and flushes.

use std::{
    fs::File,
    io::BufWriter,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_queue::ArrayQueue;
use csv::Writer;
use log::{debug, error};
use parking_lot::Mutex;
use serde::Serialize;

use super::{Checkpoint, CheckpointResult, TelemetrySink};
use crate::error::TelemetryError;

const QUEUE_CAPACITY: usize = 8192;
const CONSUMER_POLL_MS: u64 = 5;
const DRAIN_BATCH: usize = 256;
const FLUSH_BATCHES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum RowKind {
    Start,
    End,
    Insert,
}

#[derive(Debug, Serialize)]
struct CheckpointRow {
    seq: u64,
    timestamp_ms: u64,
    queue: String,
    worker: u32,
    checkpoint: String,
    kind: RowKind,
    response_ms: u64,
    transfer_size: u64,
    transfer_unit: String,
    result: CheckpointResult,
}

pub struct CsvCheckpointSink {
    path: PathBuf,
    batch_mode: bool,
    queue: Arc<ArrayQueue<CheckpointRow>>,
    dropped: Arc<AtomicU64>,
    written: Arc<AtomicU64>,
    seq: AtomicU64,
    running: Arc<AtomicBool>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl CsvCheckpointSink {
    /// Create the file and start the consumer thread.
    pub fn start(path: impl AsRef<Path>, batch_mode: bool) -> Result<Arc<Self>, TelemetryError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)
            .map_err(|e| TelemetryError::Sink(format!("cannot create {}: {e}", path.display())))?;

        let sink = Arc::new(Self {
            path,
            batch_mode,
            queue: Arc::new(ArrayQueue::new(QUEUE_CAPACITY)),
            dropped: Arc::new(AtomicU64::new(0)),
            written: Arc::new(AtomicU64::new(0)),
            seq: AtomicU64::new(1),
            running: Arc::new(AtomicBool::new(true)),
            consumer: Mutex::new(None),
        });

        let queue = sink.queue.clone();
        let running = sink.running.clone();
        let written = sink.written.clone();
        let dropped = sink.dropped.clone();
        let handle = thread::Builder::new()
            .name("checkpoint-csv".into())
            .spawn(move || {
                let mut wtr = Writer::from_writer(BufWriter::new(file));
                let mut flush_counter = 0usize;

                while running.load(Ordering::SeqCst) {
                    let drained = drain(&queue, &mut wtr, DRAIN_BATCH);
                    if drained > 0 {
                        written.fetch_add(drained, Ordering::Relaxed);
                        flush_counter += 1;
                        if flush_counter >= FLUSH_BATCHES {
                            if let Err(e) = wtr.flush() {
                                error!("failed to flush checkpoint csv: {e}");
                            }
                            flush_counter = 0;
                        }
                    } else {
                        thread::sleep(Duration::from_millis(CONSUMER_POLL_MS));
                    }
                }

                // final drain
                let drained = drain(&queue, &mut wtr, usize::MAX);
                written.fetch_add(drained, Ordering::Relaxed);
                if let Err(e) = wtr.flush() {
                    error!("failed to flush checkpoint csv: {e}");
                }
                debug!(
                    "checkpoint csv consumer exiting. dropped={}",
                    dropped.load(Ordering::Relaxed)
                );
            })
            .map_err(|e| TelemetryError::Sink(format!("cannot spawn csv consumer: {e}")))?;

        *sink.consumer.lock() = Some(handle);
        Ok(sink)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn written_count(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Stop the consumer after it has written everything queued so far.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handle = self.consumer.lock().take();
        if let Some(h) = handle {
            let _ = h.join();
        }
    }

    fn push(&self, kind: RowKind, c: &Checkpoint<'_>) -> Result<(), TelemetryError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(TelemetryError::Closed);
        }
        let row = CheckpointRow {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            timestamp_ms: c.timestamp_ms,
            queue: c.queue.to_string(),
            worker: c.worker.0,
            checkpoint: c.name.to_string(),
            kind,
            response_ms: c.response_ms,
            transfer_size: c.transfer_size,
            transfer_unit: c.transfer_unit.unwrap_or_default().to_string(),
            result: c.result,
        };
        if self.queue.push(row).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(TelemetryError::QueueFull);
        }
        Ok(())
    }
}

fn drain(
    queue: &ArrayQueue<CheckpointRow>,
    wtr: &mut Writer<BufWriter<File>>,
    max: usize,
) -> u64 {
    let mut count = 0u64;
    for _ in 0..max {
        match queue.pop() {
            Some(row) => {
                if let Err(e) = wtr.serialize(&row) {
                    error!("failed to write checkpoint row {}: {e}", row.seq);
                } else {
                    count += 1;
                }
            }
            None => break,
        }
    }
    count
}

impl TelemetrySink for CsvCheckpointSink {
    fn is_batch_mode(&self) -> bool {
        self.batch_mode
    }

    fn start_checkpoint(&self, c: &Checkpoint<'_>) -> Result<(), TelemetryError> {
        self.push(RowKind::Start, c)
    }

    fn end_checkpoint(&self, c: &Checkpoint<'_>) -> Result<(), TelemetryError> {
        self.push(RowKind::End, c)
    }

    fn insert_checkpoint(&self, c: &Checkpoint<'_>) -> Result<(), TelemetryError> {
        self.push(RowKind::Insert, c)
    }
}

impl Drop for CsvCheckpointSink {
    fn drop(&mut self) {
        self.stop();
    }
}
