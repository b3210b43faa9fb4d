use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::api::{DrainReport, DrainStats, PassOutcome, QueueSnapshot};

#[derive(Debug)]
pub(crate) struct QueueState<T> {
    pub(crate) storage: VecDeque<T>,
    /// Tiempo sellado del primer item admitido desde la última pasada.
    pub(crate) first_insert: Option<Duration>,
    pub(crate) drop_count: u32,
    pub(crate) suggested_interval: Duration,
}

impl<T> QueueState<T> {
    pub(crate) fn new(initial_interval: Duration) -> Self {
        Self {
            storage: VecDeque::new(),
            first_insert: None,
            drop_count: 0,
            suggested_interval: initial_interval,
        }
    }

    pub(crate) fn admit(&mut self, item: T, stamped: Duration) {
        if self.first_insert.is_none() {
            self.first_insert = Some(stamped);
        }
        self.storage.push_back(item);
    }

    pub(crate) fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            len: self.storage.len(),
            consecutive_drops: self.drop_count,
            suggested_interval: self.suggested_interval,
        }
    }
}

/// Contadores acumulados de drenado, alimentados con [`DrainReport`]s por el driver de la cola.
#[derive(Debug, Default)]
pub struct DrainCounters {
    passes: AtomicU64,
    idle_passes: AtomicU64,
    congested_passes: AtomicU64,
    delivered: AtomicU64,
    requeued: AtomicU64,
    dropped: AtomicU64,
}

impl DrainCounters {
    pub fn new() -> Self {
        Self::default()
    }

    fn saturating_add(counter: &AtomicU64, delta: u64) {
        if delta == 0 {
            return;
        }
        let mut current = counter.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_add(delta);
            match counter.compare_exchange(current, next, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn record(&self, report: &DrainReport) {
        Self::saturating_add(&self.passes, 1);
        match report.outcome {
            PassOutcome::Idle => Self::saturating_add(&self.idle_passes, 1),
            PassOutcome::Congested => Self::saturating_add(&self.congested_passes, 1),
            PassOutcome::Healthy => {}
        }
        Self::saturating_add(&self.delivered, report.delivered as u64);
        Self::saturating_add(&self.requeued, report.requeued as u64);
        Self::saturating_add(&self.dropped, report.dropped as u64);
    }

    pub fn stats(&self, queue: QueueSnapshot) -> DrainStats {
        DrainStats {
            passes: self.passes.load(Ordering::Relaxed),
            idle_passes: self.idle_passes.load(Ordering::Relaxed),
            congested_passes: self.congested_passes.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            queue_len: queue.len as u64,
            consecutive_drops: queue.consecutive_drops,
            suggested_interval: queue.suggested_interval,
        }
    }
}
