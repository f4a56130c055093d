//! Segment switcher: owns the active segment and rotates it.
//!
//! Producers call [`Switcher::insert`], which only touches the lossy queue. A
//! single consumer thread drains the queue into the active [`Segment`] and,
//! every `flush_threshold` successful inserts, swaps in a fresh segment and
//! hands the retired one to the finalize workers.

use crate::archive::Finalizer;
use crate::buffer::LossyQueue;
use crate::config::SwitcherConfig;
use crate::core::event::Event;
use crate::error::{Error, Result};
use crate::storage::segment::{Segment, SegmentNamer};
use crate::worker::WorkerPool;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

#[derive(Debug, Default)]
struct Counters {
    inserted: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time ingestion counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SwitcherStats {
    /// Events stored in a segment
    pub inserted: u64,
    /// Events whose insert failed
    pub failed: u64,
    /// Events evicted from the queue under overload
    pub dropped: u64,
    /// Events waiting in the queue
    pub buffered: usize,
}

pub struct Switcher {
    queue: Arc<LossyQueue<Event>>,
    counters: Arc<Counters>,
    pool: Arc<WorkerPool<Segment>>,
    consumer: Mutex<Option<JoinHandle<Segment>>>,
    flush_threshold: u64,
    work_dir: PathBuf,
}

impl Switcher {
    /// Create the first segment and start the consumer and finalize workers.
    pub fn new(config: SwitcherConfig, finalizer: Arc<dyn Finalizer>) -> Result<Self> {
        config.validate()?;

        let mut namer = SegmentNamer::new(&config.work_dir);
        let active = Segment::create(namer.next_path())?;
        info!(filename = active.filename(), "created segment");

        let pool = Arc::new(WorkerPool::new(
            config.finalize_queue_depth,
            config.finalize_workers,
            move |worker, segment: Segment| finalize_segment(worker, segment, finalizer.as_ref()),
        )?);
        let queue = Arc::new(LossyQueue::new(config.buffer_capacity));
        let counters = Arc::new(Counters::default());

        let consumer = Consumer {
            queue: Arc::clone(&queue),
            counters: Arc::clone(&counters),
            pool: Arc::clone(&pool),
            namer,
            active,
            flush_threshold: config.flush_threshold,
        };
        let handle = thread::Builder::new()
            .name("tsdb-switcher".to_string())
            .spawn(move || consumer.run())?;

        Ok(Self {
            queue,
            counters,
            pool,
            consumer: Mutex::new(Some(handle)),
            flush_threshold: config.flush_threshold,
            work_dir: config.work_dir,
        })
    }

    /// Queue an event for storage. Never blocks on disk and never fails; under
    /// overload the oldest buffered event is dropped instead.
    pub fn insert(&self, event: Event) {
        self.queue.write(event);
    }

    /// Events successfully stored since startup
    pub fn count(&self) -> u64 {
        self.counters.inserted.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> SwitcherStats {
        SwitcherStats {
            inserted: self.count(),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.queue.evicted(),
            buffered: self.queue.len(),
        }
    }

    pub fn flush_threshold(&self) -> u64 {
        self.flush_threshold
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn is_closed(&self) -> bool {
        self.consumer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Drain buffered events, close the active segment and wait for in-flight
    /// finalizations. The last active segment is compacted but not archived.
    pub fn close(&self) -> Result<()> {
        let handle = self
            .consumer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(Error::Closed("switcher"))?;

        info!(buffered = self.queue.len(), "closing switcher");
        self.queue.close();
        let joined = handle.join();

        let result = match joined {
            Ok(mut last) => {
                let closed = last.close();
                match &closed {
                    Ok(()) => info!(
                        filename = last.filename(),
                        records = last.len(),
                        "closed active segment"
                    ),
                    Err(e) => error!(
                        filename = last.filename(),
                        error = %e,
                        "could not close active segment"
                    ),
                }
                closed
            }
            Err(_) => Err(Error::Other("switcher consumer thread panicked".to_string())),
        };

        self.pool.close();
        self.pool.wait();
        info!(inserted = self.count(), "switcher closed");
        result
    }
}

impl Drop for Switcher {
    fn drop(&mut self) {
        if !self.is_closed() {
            if let Err(e) = self.close() {
                error!(error = %e, "could not close switcher");
            }
        }
    }
}

/// State owned by the consumer thread
struct Consumer {
    queue: Arc<LossyQueue<Event>>,
    counters: Arc<Counters>,
    pool: Arc<WorkerPool<Segment>>,
    namer: SegmentNamer,
    active: Segment,
    flush_threshold: u64,
}

impl Consumer {
    /// Runs until the queue is closed and drained, then hands back the active segment.
    fn run(mut self) -> Segment {
        while let Some(event) = self.queue.read() {
            if let Err(e) = self.active.insert(&event) {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(filename = self.active.filename(), error = %e, "could not insert event");
                continue;
            }

            let count = self.counters.inserted.fetch_add(1, Ordering::AcqRel) + 1;
            if count % self.flush_threshold == 0 {
                self.rotate(count);
            }
        }
        debug!(filename = self.active.filename(), "switcher consumer stopped");
        self.active
    }

    fn rotate(&mut self, count: u64) {
        let next = match Segment::create(self.namer.next_path()) {
            Ok(segment) => segment,
            Err(e) => {
                error!(
                    filename = self.active.filename(),
                    count,
                    error = %e,
                    "could not create next segment, keeping active segment"
                );
                return;
            }
        };

        let retired = std::mem::replace(&mut self.active, next);
        info!(
            retired = retired.filename(),
            active = self.active.filename(),
            count,
            "rotated segment"
        );
        if let Err(e) = self.pool.enqueue(retired) {
            error!(error = %e, "could not hand retired segment to finalize workers");
        }
    }
}

fn finalize_segment(worker: usize, mut segment: Segment, finalizer: &dyn Finalizer) {
    debug!(worker, filename = segment.filename(), records = segment.len(), "closing segment");
    if let Err(e) = segment.close() {
        error!(worker, filename = segment.filename(), error = %e, "could not close segment");
    }
    if let Err(e) = finalizer.finalize(segment.path()) {
        error!(worker, filename = segment.filename(), error = %e, "could not finalize segment");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::MockFinalizer;
    use crate::core::temporal::Timestamp;
    use crate::storage::segment::{is_segment_file, SegmentReader};
    use std::sync::mpsc;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn eventually(check: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + TIMEOUT;
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        check()
    }

    fn config(dir: &Path, flush_threshold: u64) -> SwitcherConfig {
        SwitcherConfig::new(dir)
            .with_flush_threshold(flush_threshold)
            .with_buffer_capacity(10_000)
    }

    fn event(i: i64) -> Event {
        Event::new(Timestamp::from_nanos(i), format!("value number {i}"))
            .with_label("source", "test")
    }

    fn local_segments(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| is_segment_file(&entry.path()))
            .count()
    }

    /// Finalizer that reports every archived path over a channel
    fn recording_finalizer() -> (Arc<dyn Finalizer>, mpsc::Receiver<PathBuf>) {
        let (sender, receiver) = mpsc::channel();
        let sender = Mutex::new(sender);
        let finalizer = move |path: &Path| -> Result<()> {
            sender.lock().unwrap().send(path.to_path_buf()).unwrap();
            Ok(())
        };
        (Arc::new(finalizer), receiver)
    }

    #[test]
    fn test_rotates_every_threshold() {
        let temp_dir = TempDir::new().unwrap();
        let (finalizer, archived) = recording_finalizer();
        let switcher = Switcher::new(config(temp_dir.path(), 10), finalizer).unwrap();

        for i in 0..35 {
            switcher.insert(event(i));
        }

        assert!(eventually(|| switcher.count() == 35));
        let mut paths = Vec::new();
        for _ in 0..3 {
            paths.push(archived.recv_timeout(TIMEOUT).unwrap());
        }
        assert_eq!(local_segments(temp_dir.path()), 4);

        switcher.close().unwrap();
        assert!(archived.try_recv().is_err(), "active segment must not be archived on close");

        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), 3);
    }

    #[test]
    fn test_retired_segments_hold_exactly_threshold_events() {
        let temp_dir = TempDir::new().unwrap();
        let (sender, counts) = mpsc::channel();
        let sender = Mutex::new(sender);
        let finalizer = move |path: &Path| -> Result<()> {
            let reader = SegmentReader::open(path)?;
            sender.lock().unwrap().send(reader.count()?).unwrap();
            Ok(())
        };
        let switcher = Switcher::new(config(temp_dir.path(), 4), Arc::new(finalizer)).unwrap();

        for i in 0..12 {
            switcher.insert(event(i));
        }

        for _ in 0..3 {
            assert_eq!(counts.recv_timeout(TIMEOUT).unwrap(), 4);
        }
        switcher.close().unwrap();
    }

    #[test]
    fn test_finalizes_each_retired_segment_once() {
        let temp_dir = TempDir::new().unwrap();
        let (sender, archived) = mpsc::channel();
        let sender = Mutex::new(sender);

        let mut finalizer = MockFinalizer::new();
        finalizer
            .expect_finalize()
            .withf(|path: &Path| is_segment_file(path) && path.is_file())
            .times(2)
            .returning(move |path| {
                sender.lock().unwrap().send(path.to_path_buf()).unwrap();
                Ok(())
            });

        let switcher = Switcher::new(config(temp_dir.path(), 5), Arc::new(finalizer)).unwrap();
        for i in 0..10 {
            switcher.insert(event(i));
        }

        let first = archived.recv_timeout(TIMEOUT).unwrap();
        let second = archived.recv_timeout(TIMEOUT).unwrap();
        assert_ne!(first, second);

        switcher.close().unwrap();
        assert!(archived.try_recv().is_err());
    }

    #[test]
    fn test_finalizer_sees_compacted_segment() {
        let temp_dir = TempDir::new().unwrap();
        let (sender, checks) = mpsc::channel();
        let sender = Mutex::new(sender);
        let finalizer = move |path: &Path| -> Result<()> {
            let wal = PathBuf::from(format!("{}-wal", path.display()));
            sender.lock().unwrap().send(!wal.exists()).unwrap();
            Ok(())
        };
        let switcher = Switcher::new(config(temp_dir.path(), 3), Arc::new(finalizer)).unwrap();

        for i in 0..3 {
            switcher.insert(event(i));
        }

        assert!(checks.recv_timeout(TIMEOUT).unwrap());
        switcher.close().unwrap();
    }

    #[test]
    fn test_threshold_of_one() {
        let temp_dir = TempDir::new().unwrap();
        let (finalizer, archived) = recording_finalizer();
        let switcher = Switcher::new(config(temp_dir.path(), 1), finalizer).unwrap();

        switcher.insert(event(1));

        assert!(eventually(|| switcher.count() == 1));
        archived.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(local_segments(temp_dir.path()), 2);
        switcher.close().unwrap();
    }

    #[test]
    fn test_close_drains_buffered_events() {
        let temp_dir = TempDir::new().unwrap();
        let (finalizer, archived) = recording_finalizer();
        let switcher = Switcher::new(config(temp_dir.path(), 1_000), finalizer).unwrap();

        for i in 0..50 {
            switcher.insert(event(i));
        }
        switcher.close().unwrap();

        assert_eq!(switcher.count(), 50);
        assert!(archived.try_recv().is_err());

        let files: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| is_segment_file(path))
            .collect();
        assert_eq!(files.len(), 1);
        assert_eq!(SegmentReader::open(&files[0]).unwrap().count().unwrap(), 50);
    }

    #[test]
    fn test_close_twice_fails() {
        let temp_dir = TempDir::new().unwrap();
        let (finalizer, _archived) = recording_finalizer();
        let switcher = Switcher::new(config(temp_dir.path(), 10), finalizer).unwrap();

        switcher.close().unwrap();
        assert!(switcher.is_closed());
        assert!(matches!(switcher.close(), Err(Error::Closed(_))));
    }

    #[test]
    fn test_insert_after_close_is_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let (finalizer, _archived) = recording_finalizer();
        let switcher = Switcher::new(config(temp_dir.path(), 10), finalizer).unwrap();

        switcher.insert(event(1));
        switcher.close().unwrap();
        switcher.insert(event(2));

        assert_eq!(switcher.count(), 1);
    }

    #[test]
    fn test_stats() {
        let temp_dir = TempDir::new().unwrap();
        let (finalizer, _archived) = recording_finalizer();
        let switcher = Switcher::new(config(temp_dir.path(), 100), finalizer).unwrap();

        for i in 0..20 {
            switcher.insert(event(i));
        }
        assert!(eventually(|| switcher.count() == 20));

        let stats = switcher.stats();
        assert_eq!(stats.inserted, 20);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.dropped, 0);
        switcher.close().unwrap();
    }

    #[test]
    fn test_rejects_invalid_config() {
        let temp_dir = TempDir::new().unwrap();
        let (finalizer, _archived) = recording_finalizer();

        let missing_dir = temp_dir.path().join("missing");
        let missing = Switcher::new(config(&missing_dir, 10), finalizer.clone());
        assert!(matches!(missing, Err(Error::Configuration(_))));

        let zero = Switcher::new(config(temp_dir.path(), 0), finalizer);
        assert!(matches!(zero, Err(Error::Configuration(_))));
        assert_eq!(local_segments(temp_dir.path()), 0);
    }

    fn segment_paths(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| is_segment_file(path))
            .collect()
    }

    /// Consumer over `active`, naming new segments in `next_dir`; retired
    /// segment paths come out of the returned channel.
    fn consumer(
        active: &Path,
        next_dir: &Path,
        flush_threshold: u64,
    ) -> (Consumer, Arc<WorkerPool<Segment>>, mpsc::Receiver<PathBuf>) {
        let (sender, retired) = mpsc::channel();
        let sender = Mutex::new(sender);
        let pool = Arc::new(
            WorkerPool::new(8, 1, move |_, segment: Segment| {
                sender.lock().unwrap().send(segment.path().to_path_buf()).unwrap();
            })
            .unwrap(),
        );
        let consumer = Consumer {
            queue: Arc::new(LossyQueue::new(100)),
            counters: Arc::new(Counters::default()),
            pool: Arc::clone(&pool),
            namer: SegmentNamer::new(next_dir),
            active: Segment::create(active).unwrap(),
            flush_threshold,
        };
        (consumer, pool, retired)
    }

    #[test]
    fn test_finalizer_error_does_not_stop_archival() {
        let temp_dir = TempDir::new().unwrap();
        let (sender, archived) = mpsc::channel();
        let sender = Mutex::new(sender);
        let calls = AtomicU64::new(0);
        let finalizer = move |path: &Path| -> Result<()> {
            sender.lock().unwrap().send(path.to_path_buf()).unwrap();
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(Error::Archive("remote unavailable".to_string()));
            }
            Ok(())
        };
        let switcher = Switcher::new(config(temp_dir.path(), 2), Arc::new(finalizer)).unwrap();

        for i in 0..6 {
            switcher.insert(event(i));
        }

        for _ in 0..3 {
            archived.recv_timeout(TIMEOUT).unwrap();
        }
        assert!(eventually(|| switcher.count() == 6));
        switcher.close().unwrap();
        assert!(archived.try_recv().is_err());
    }

    #[test]
    fn test_failed_insert_is_counted_and_ingestion_continues() {
        let temp_dir = TempDir::new().unwrap();
        let (finalizer, _archived) = recording_finalizer();
        let switcher = Switcher::new(config(temp_dir.path(), 100), finalizer).unwrap();

        let active = segment_paths(temp_dir.path()).remove(0);
        let blocker = rusqlite::Connection::open(&active).unwrap();
        blocker.execute_batch("BEGIN EXCLUSIVE").unwrap();

        switcher.insert(event(1));
        assert!(eventually(|| switcher.stats().failed == 1));
        assert_eq!(switcher.count(), 0);

        blocker.execute_batch("COMMIT").unwrap();
        drop(blocker);

        switcher.insert(event(2));
        assert!(eventually(|| switcher.count() == 1));
        let stats = switcher.stats();
        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.failed, 1);
        switcher.close().unwrap();
    }

    #[test]
    fn test_failed_insert_does_not_count_toward_rotation() {
        let temp_dir = TempDir::new().unwrap();
        let (mut consumer, pool, retired) =
            consumer(&temp_dir.path().join("1.db"), temp_dir.path(), 2);
        consumer.active.close().unwrap();

        for i in 0..3 {
            consumer.queue.write(event(i));
        }
        consumer.queue.close();
        let counters = Arc::clone(&consumer.counters);
        let last = consumer.run();

        assert_eq!(counters.failed.load(Ordering::SeqCst), 3);
        assert_eq!(counters.inserted.load(Ordering::SeqCst), 0);
        assert_eq!(last.filename(), "1.db");

        pool.close();
        pool.wait();
        assert!(retired.try_recv().is_err());
    }

    #[test]
    fn test_segment_close_error_still_finalizes() {
        let temp_dir = TempDir::new().unwrap();
        let (sender, archived) = mpsc::channel();
        let sender = Mutex::new(sender);
        let finalizer = move |path: &Path| -> Result<()> {
            let wal = PathBuf::from(format!("{}-wal", path.display()));
            sender.lock().unwrap().send((path.to_path_buf(), wal.exists())).unwrap();
            Ok(())
        };
        let switcher = Switcher::new(config(temp_dir.path(), 2), Arc::new(finalizer)).unwrap();

        // An open read transaction keeps the first segment in WAL mode, so
        // compacting it fails.
        let first = segment_paths(temp_dir.path()).remove(0);
        let reader = rusqlite::Connection::open(&first).unwrap();
        reader.execute_batch("BEGIN").unwrap();
        let _: i64 = reader
            .query_row("SELECT COUNT(*) FROM payloads", [], |row| row.get(0))
            .unwrap();

        switcher.insert(event(1));
        switcher.insert(event(2));

        let (path, wal_left) = archived.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(path, first);
        assert!(wal_left, "segment should not have been compacted");

        reader.execute_batch("COMMIT").unwrap();
        drop(reader);

        switcher.insert(event(3));
        switcher.insert(event(4));
        let (second, wal_left) = archived.recv_timeout(TIMEOUT).unwrap();
        assert_ne!(second, first);
        assert!(!wal_left);

        switcher.close().unwrap();
    }

    #[test]
    fn test_rotation_without_next_segment_keeps_active() {
        let temp_dir = TempDir::new().unwrap();
        let next_dir = temp_dir.path().join("next");
        let (mut consumer, pool, retired) =
            consumer(&temp_dir.path().join("1.db"), &next_dir, 2);

        for i in 0..2 {
            consumer.active.insert(&event(i)).unwrap();
        }
        consumer.rotate(2);
        assert_eq!(consumer.active.filename(), "1.db");
        assert_eq!(consumer.active.len(), 2);

        consumer.active.insert(&event(2)).unwrap();
        consumer.active.insert(&event(3)).unwrap();
        assert_eq!(consumer.active.len(), 4);

        std::fs::create_dir(&next_dir).unwrap();
        consumer.rotate(4);
        assert_ne!(consumer.active.filename(), "1.db");
        assert!(consumer.active.path().starts_with(&next_dir));

        pool.close();
        pool.wait();
        assert_eq!(retired.try_recv().unwrap(), temp_dir.path().join("1.db"));
        assert!(retired.try_recv().is_err());
    }

    #[test]
    fn test_missing_segment_dir_does_not_stop_counting() {
        let temp_dir = TempDir::new().unwrap();
        let (consumer, pool, retired) =
            consumer(&temp_dir.path().join("1.db"), &temp_dir.path().join("gone"), 2);

        for i in 0..5 {
            consumer.queue.write(event(i));
        }
        consumer.queue.close();
        let counters = Arc::clone(&consumer.counters);
        let last = consumer.run();

        assert_eq!(counters.inserted.load(Ordering::SeqCst), 5);
        assert_eq!(last.filename(), "1.db");
        assert_eq!(last.len(), 5);

        pool.close();
        pool.wait();
        assert!(retired.try_recv().is_err());
    }
}
