use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Notify, watch};
use tracing::{debug, error, info, warn};

use super::{DataLogger, Record, RecordSink};

const WRITE_BATCH: usize = 500;
const PRIORITIES: usize = Record::PRIORITY_LEVELS;

/// Pending records, one lane per priority. Sequence numbers restore write
/// order across lanes when draining.
#[derive(Default)]
struct Pending {
    lanes: [VecDeque<(u64, Record)>; PRIORITIES],
    len: usize,
    next_seq: u64,
}

impl Pending {
    fn push(&mut self, record: Record) {
        let lane = usize::from(record.priority());
        self.lanes[lane].push_back((self.next_seq, record));
        self.next_seq += 1;
        self.len += 1;
    }

    fn lowest_priority(&self) -> Option<u8> {
        self.lanes
            .iter()
            .position(|lane| !lane.is_empty())
            .and_then(|i| u8::try_from(i).ok())
    }

    /// Drops the oldest record of the lowest non-empty priority.
    fn evict_lowest(&mut self) -> Option<Record> {
        let lane = usize::from(self.lowest_priority()?);
        let (_, record) = self.lanes[lane].pop_front()?;
        self.len -= 1;
        Some(record)
    }

    fn pop_oldest(&mut self) -> Option<Record> {
        let lane = self
            .lanes
            .iter()
            .enumerate()
            .filter_map(|(i, lane)| lane.front().map(|(seq, _)| (*seq, i)))
            .min()
            .map(|(_, i)| i)?;
        let (_, record) = self.lanes[lane].pop_front()?;
        self.len -= 1;
        Some(record)
    }
}

pub struct QueuedDataLogger {
    capacity: usize,
    queue: Mutex<Pending>,
    notify: Notify,
    dropped: AtomicU64,
}

impl QueuedDataLogger {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            queue: Mutex::new(Pending::default()),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Takes up to `max` records, oldest first.
    pub fn drain(&self, max: usize) -> Vec<Record> {
        let mut queue = self.lock();
        let n = max.min(queue.len);
        (0..n).filter_map(|_| queue.pop_oldest()).collect()
    }

    /// Drains the queue into `sink` until `shutdown` flips to true, then
    /// flushes what is left.
    pub async fn run_writer(
        self: Arc<Self>,
        sink: Arc<dyn RecordSink>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(capacity = self.capacity, "Persistence writer started");
        loop {
            let stopping = *shutdown.borrow();
            self.flush(sink.as_ref()).await;
            if stopping {
                break;
            }

            tokio::select! {
                _ = self.notify.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        self.flush(sink.as_ref()).await;
                        break;
                    }
                }
            }
        }
        info!(dropped = self.dropped(), "Persistence writer stopped");
    }

    async fn flush(&self, sink: &dyn RecordSink) {
        loop {
            let batch = self.drain(WRITE_BATCH);
            if batch.is_empty() {
                return;
            }
            let n = batch.len();
            if let Err(e) = sink.write(batch).await {
                error!(error = %e, records = n, "Failed to persist records");
            } else {
                debug!(records = n, "Persisted records");
            }
        }
    }
}

impl DataLogger for QueuedDataLogger {
    fn append(&self, record: Record) {
        {
            let mut queue = self.lock();
            if queue.len >= self.capacity {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                if queue.lowest_priority().is_some_and(|p| p < record.priority()) {
                    if let Some(evicted) = queue.evict_lowest() {
                        warn!(kind = evicted.kind(), "Persistence queue full, dropped queued record");
                    }
                } else {
                    warn!(kind = record.kind(), "Persistence queue full, dropped new record");
                    return;
                }
            }
            queue.push(record);
        }
        self.notify.notify_one();
    }

    fn queue_level(&self) -> f64 {
        self.lock().len as f64 / self.capacity as f64
    }

    fn queue_size(&self) -> usize {
        self.lock().len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{VehicleEvent, VehicleEventKind};
    use crate::persistence::MemorySink;
    use crate::persistence::tests::{arrival, prediction};

    #[test]
    fn test_full_queue_drops_lowest_priority_first() {
        let logger = QueuedDataLogger::new(2);
        logger.append(prediction());
        logger.append(arrival());
        logger.append(arrival());

        let kinds: Vec<_> = logger.drain(10).iter().map(|r| r.kind()).collect();
        assert_eq!(kinds, vec!["arrival_departures", "arrival_departures"]);
        assert_eq!(logger.dropped(), 1);
    }

    #[test]
    fn test_full_queue_rejects_lower_priority_newcomer() {
        let logger = QueuedDataLogger::new(1);
        logger.append(arrival());
        logger.append(prediction());

        assert_eq!(logger.queue_size(), 1);
        assert_eq!(logger.drain(10)[0].kind(), "arrival_departures");
        assert_eq!(logger.queue_level(), 0.0);
    }

    #[test]
    fn test_drain_keeps_write_order_across_priorities() {
        let logger = QueuedDataLogger::new(10);
        logger.append(arrival());
        logger.append(prediction());
        logger.append(arrival());

        let kinds: Vec<_> = logger.drain(10).iter().map(|r| r.kind()).collect();
        assert_eq!(kinds, vec!["arrival_departures", "predictions", "arrival_departures"]);
    }

    #[test]
    fn test_full_queue_evicts_oldest_of_lowest_priority() {
        let logger = QueuedDataLogger::new(3);
        let first = prediction();
        let Record::Prediction(mut second_prediction) = prediction() else {
            unreachable!()
        };
        second_prediction.vehicle_id = "second".to_string();
        logger.append(first);
        logger.append(Record::Prediction(second_prediction));
        logger.append(arrival());
        logger.append(arrival());

        let drained = logger.drain(10);
        assert_eq!(drained.len(), 3);
        assert!(matches!(&drained[0], Record::Prediction(p) if p.vehicle_id == "second"));
        assert_eq!(logger.dropped(), 1);
    }

    #[test]
    fn test_queue_level_is_fraction_of_capacity() {
        let logger = QueuedDataLogger::new(4);
        logger.append(Record::VehicleEvent(VehicleEvent {
            vehicle_id: "v1".to_string(),
            time_ms: 0,
            kind: VehicleEventKind::Timeout,
            description: String::new(),
        }));
        assert_eq!(logger.queue_level(), 0.25);
    }

    #[tokio::test]
    async fn test_writer_flushes_on_shutdown() {
        let logger = Arc::new(QueuedDataLogger::new(100));
        let sink = Arc::new(MemorySink::new());
        let (tx, rx) = watch::channel(false);

        let writer = tokio::spawn(logger.clone().run_writer(sink.clone(), rx));
        for _ in 0..3 {
            logger.append(arrival());
        }
        tx.send(true).unwrap();
        writer.await.unwrap();

        assert_eq!(sink.records().len(), 3);
        assert_eq!(logger.queue_size(), 0);
    }
}
