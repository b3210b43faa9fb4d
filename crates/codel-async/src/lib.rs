//! Tokio adapter for `codel-core`.
//!
//! This crate drives the passive core queue from async code:
//! - `AsyncCoDelQueue`, a cloneable facade over a shared queue
//! - `Drainer`, a background task that runs drain passes paced by the
//!   queue's suggested interval
//! - `CoDelReceiver`, a channel/`Stream` that requeues while its buffer is full

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

pub use codel_core::{
    ClockTime, CoDelConfig, CoDelQueue, ComparePolicy, ComparePriority, CompareTime, DelayBasis,
    DrainCounters, DrainReport, DrainStats, ManualClock, MonotonicClock, PassOutcome,
    QueueSnapshot, TimePolicy, Timestamped, Visit, prometheus,
};
use futures_core::Stream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

/// Async wrapper around a shared [`CoDelQueue`].
pub struct AsyncCoDelQueue<T, Tm, C> {
    inner: Arc<CoDelQueue<T, Tm, C>>,
}

impl<T, Tm, C> Clone for AsyncCoDelQueue<T, Tm, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, Tm, C> AsyncCoDelQueue<T, Tm, C>
where
    Tm: TimePolicy<T>,
    C: ComparePolicy<T>,
{
    /// Creates a new async wrapper over a shared core queue.
    pub fn new(inner: Arc<CoDelQueue<T, Tm, C>>) -> Self {
        Self { inner }
    }

    /// Returns the shared core queue.
    pub fn inner(&self) -> &Arc<CoDelQueue<T, Tm, C>> {
        &self.inner
    }

    /// Stamps and stores an item.
    pub fn put(&self, item: T) {
        self.inner.put(item);
    }

    /// Builds and stores an item.
    pub fn emplace<A: Into<T>>(&self, args: A) {
        self.inner.emplace(args);
    }

    /// Builds an item and stores it if `pred` accepts it.
    pub fn emplace_if<A, P>(&self, pred: P, args: A) -> bool
    where
        A: Into<T>,
        P: FnOnce(&T) -> bool,
    {
        self.inner.emplace_if(pred, args)
    }

    /// Returns the number of stored items.
    pub fn size(&self) -> usize {
        self.inner.size()
    }

    /// Returns the queue's storage and backoff state.
    pub fn snapshot(&self) -> QueueSnapshot {
        self.inner.snapshot()
    }
}

impl<T, Tm, C> AsyncCoDelQueue<T, Tm, C>
where
    T: Send + 'static,
    Tm: TimePolicy<T> + Send + Sync + 'static,
    C: ComparePolicy<T> + Send + Sync + 'static,
{
    /// Spawns a [`Drainer`] over this queue.
    pub fn drainer<F>(&self, visitor: F) -> DrainerHandle<T, Tm, C>
    where
        F: FnMut(T) -> Visit<T> + Send + 'static,
    {
        Drainer::spawn(Arc::clone(&self.inner), visitor)
    }

    /// Returns a receiver fed by a dedicated drain task.
    pub fn receiver(&self, buffer: usize) -> CoDelReceiver<T> {
        CoDelReceiver::new(Arc::clone(&self.inner), buffer)
    }
}

/// Floor on the pause between passes, for queues built with a zero interval.
const MIN_DRAIN_WAIT: Duration = Duration::from_millis(1);

/// Signals and joins a spawned drain loop. Dropping it stops the loop.
struct DrainTask {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl DrainTask {
    fn spawn<T, Tm, C, F>(
        queue: Arc<CoDelQueue<T, Tm, C>>,
        counters: Arc<DrainCounters>,
        mut visitor: F,
    ) -> Self
    where
        T: Send + 'static,
        Tm: TimePolicy<T> + Send + Sync + 'static,
        C: ComparePolicy<T> + Send + Sync + 'static,
        F: FnMut(T) -> Visit<T> + Send + 'static,
    {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            debug!(queue = %queue.name(), "drainer started");
            loop {
                let report = queue.process_if(&mut visitor);
                counters.record(&report);

                let wait = queue.suggested_interval().max(MIN_DRAIN_WAIT);
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    // Fires on an explicit stop and when the handle is dropped.
                    _ = shutdown_rx.changed() => break,
                }
            }
            debug!(queue = %queue.name(), "drainer stopped");
        });
        Self {
            shutdown,
            task: Some(task),
        }
    }

    async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for DrainTask {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// Background drain loop.
///
/// Runs a pass, sleeps for the queue's current `suggested_interval()`, and
/// repeats. The visitor runs under the queue lock and should not block.
pub struct Drainer;

impl Drainer {
    /// Spawns the loop on the current Tokio runtime.
    pub fn spawn<T, Tm, C, F>(
        queue: Arc<CoDelQueue<T, Tm, C>>,
        visitor: F,
    ) -> DrainerHandle<T, Tm, C>
    where
        T: Send + 'static,
        Tm: TimePolicy<T> + Send + Sync + 'static,
        C: ComparePolicy<T> + Send + Sync + 'static,
        F: FnMut(T) -> Visit<T> + Send + 'static,
    {
        let counters = Arc::new(DrainCounters::new());
        let task = DrainTask::spawn(Arc::clone(&queue), Arc::clone(&counters), visitor);
        DrainerHandle {
            queue,
            counters,
            task,
        }
    }
}

/// Handle to a running [`Drainer`].
pub struct DrainerHandle<T, Tm, C> {
    queue: Arc<CoDelQueue<T, Tm, C>>,
    counters: Arc<DrainCounters>,
    task: DrainTask,
}

impl<T, Tm, C> DrainerHandle<T, Tm, C>
where
    Tm: TimePolicy<T>,
    C: ComparePolicy<T>,
{
    /// Cumulative pass counters plus the queue's current state.
    pub fn stats(&self) -> DrainStats {
        self.counters.stats(self.queue.snapshot())
    }

    /// Renders [`DrainerHandle::stats`] as Prometheus text.
    pub fn render_prometheus(&self, namespace: &str) -> String {
        prometheus::render_stats(&self.stats(), namespace, self.queue.name())
    }

    /// Returns whether the drain loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the loop and waits for it to exit.
    pub async fn shutdown(self) {
        self.task.stop().await;
    }
}

/// Receiver fed by a dedicated drain task.
///
/// Consumed items travel through a bounded channel. While the channel is
/// full the drain visitor requeues, so backlog stays in the queue where the
/// congestion controller can see it.
pub struct CoDelReceiver<T> {
    rx: mpsc::Receiver<T>,
    counters: Arc<DrainCounters>,
    snapshot: Box<dyn Fn() -> QueueSnapshot + Send + Sync>,
    _task: DrainTask,
}

impl<T: Send + 'static> CoDelReceiver<T> {
    /// Creates a receiver draining `queue` into a channel of `buffer` slots.
    pub fn new<Tm, C>(queue: Arc<CoDelQueue<T, Tm, C>>, buffer: usize) -> Self
    where
        Tm: TimePolicy<T> + Send + Sync + 'static,
        C: ComparePolicy<T> + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let counters = Arc::new(DrainCounters::new());
        let observed = Arc::clone(&queue);
        let snapshot = Box::new(move || observed.snapshot());
        let task = DrainTask::spawn(queue, Arc::clone(&counters), move |item| {
            match tx.try_send(item) {
                Ok(()) => Visit::Consumed,
                Err(TrySendError::Full(item)) | Err(TrySendError::Closed(item)) => {
                    Visit::Requeue(item)
                }
            }
        });
        Self {
            rx,
            counters,
            snapshot,
            _task: task,
        }
    }

    /// Waits for the next item, returning `None` once the drain task stops.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Drain counters of the feeding task plus the queue's current state.
    pub fn stats(&self) -> DrainStats {
        self.counters.stats((self.snapshot)())
    }
}

impl<T> Stream for CoDelReceiver<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::cmp::Ordering;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct Msg {
        id: u64,
        rank: u32,
        at: Duration,
    }

    impl Timestamped for Msg {
        fn enqueue_time(&self) -> Duration {
            self.at
        }

        fn set_enqueue_time(&mut self, at: Duration) {
            self.at = at;
        }
    }

    impl From<(u64, u32)> for Msg {
        fn from((id, rank): (u64, u32)) -> Self {
            Self {
                id,
                rank,
                at: Duration::ZERO,
            }
        }
    }

    fn by_rank(left: &Msg, right: &Msg) -> Ordering {
        left.rank.cmp(&right.rank)
    }

    type RankQueue = AsyncCoDelQueue<Msg, ClockTime<MonotonicClock>, fn(&Msg, &Msg) -> Ordering>;

    fn rank_queue(config: CoDelConfig) -> RankQueue {
        AsyncCoDelQueue::new(Arc::new(CoDelQueue::new(
            "async-test",
            config,
            ClockTime::new(MonotonicClock::new()),
            by_rank as fn(&Msg, &Msg) -> Ordering,
        )))
    }

    fn fast_config() -> CoDelConfig {
        CoDelConfig::new(Duration::from_millis(5), Duration::from_millis(10))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn drainer_delivers_items_and_counts_passes() {
        let queue = rank_queue(fast_config());
        for id in 0..3u64 {
            queue.emplace((id, id as u32));
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handle = queue.drainer(move |msg: Msg| {
            sink.lock().expect("sink mutex poisoned").push(msg.id);
            Visit::Consumed
        });

        tokio::time::sleep(Duration::from_millis(60)).await;
        let stats = handle.stats();
        handle.shutdown().await;

        assert_eq!(*seen.lock().expect("sink mutex poisoned"), vec![0, 1, 2]);
        assert_eq!(stats.delivered, 3);
        assert_eq!(stats.dropped, 0);
        assert!(stats.passes >= 2, "expected repeated passes, got {}", stats.passes);
        assert_eq!(queue.size(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn drainer_reports_congestion_backoff() {
        let clock = ManualClock::new();
        let config = CoDelConfig::new(Duration::from_millis(5), Duration::from_millis(10))
            .with_delay_basis(DelayBasis::Now);
        let queue: AsyncCoDelQueue<Msg, _, _> = AsyncCoDelQueue::new(Arc::new(CoDelQueue::new(
            "congested",
            config,
            ClockTime::new(clock.clone()),
            CompareTime,
        )));
        queue.emplace((1u64, 0u32));
        clock.advance(Duration::from_millis(50));

        let handle = queue.drainer(|_: Msg| Visit::Consumed);
        tokio::time::sleep(Duration::from_millis(40)).await;
        let stats = handle.stats();
        let text = handle.render_prometheus("");
        handle.shutdown().await;

        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.congested_passes, 1);
        assert_eq!(stats.delivered, 0);
        assert_eq!(stats.consecutive_drops, 1);
        assert_eq!(stats.suggested_interval, Duration::from_millis(20));
        assert!(text.contains("codel_dropped_total{queue=\"congested\"} 1\n"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_stops_draining() {
        let queue = rank_queue(fast_config());
        let handle = queue.drainer(|_: Msg| Visit::Consumed);
        handle.shutdown().await;

        queue.emplace((7u64, 0u32));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(queue.size(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn handle_reports_finished_after_visitor_panic() {
        let queue = rank_queue(fast_config());
        let handle = queue.drainer(|msg: Msg| {
            if msg.id == 9 {
                panic!("visitor failure");
            }
            Visit::Consumed
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        queue.emplace((9u64, 0u32));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(handle.is_finished());
        assert_eq!(queue.size(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn zero_interval_drainer_still_paces_passes() {
        let queue = rank_queue(CoDelConfig::new(Duration::from_millis(5), Duration::ZERO));
        queue.emplace((1u64, 0u32));

        let handle = queue.drainer(|_: Msg| Visit::Consumed);
        tokio::time::sleep(Duration::from_millis(30)).await;
        let stats = handle.stats();
        handle.shutdown().await;

        assert_eq!(stats.delivered, 1);
        assert!(stats.passes >= 2);
        assert!(stats.passes <= 100, "drain loop spun: {} passes", stats.passes);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn receiver_yields_items_in_sort_order() {
        let queue = rank_queue(fast_config());
        queue.emplace((10u64, 3u32));
        queue.emplace((20u64, 1u32));
        queue.emplace((30u64, 2u32));

        let mut receiver = queue.receiver(8);
        let mut ids = Vec::new();
        for _ in 0..3 {
            let msg = tokio::time::timeout(Duration::from_secs(1), receiver.recv())
                .await
                .expect("recv timed out")
                .expect("receiver closed");
            ids.push(msg.id);
        }
        assert_eq!(ids, vec![20, 30, 10]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn receiver_requeues_while_buffer_is_full() {
        let config = CoDelConfig::new(Duration::from_secs(5), Duration::from_millis(10))
            .with_delay_basis(DelayBasis::Now);
        let queue = rank_queue(config);
        for id in 0..3u64 {
            queue.emplace((id, id as u32));
        }

        let mut receiver = queue.receiver(1);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(receiver.stats().requeued >= 1);

        let mut ids = Vec::new();
        for _ in 0..3 {
            let msg = tokio::time::timeout(Duration::from_secs(1), receiver.recv())
                .await
                .expect("recv timed out")
                .expect("receiver closed");
            ids.push(msg.id);
        }
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(queue.size(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn receiver_stream_yields_items() {
        let queue = rank_queue(fast_config());
        queue.emplace((11u64, 0u32));

        let mut stream = queue.receiver(4);
        let msg = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("stream timed out")
            .expect("stream item");
        assert_eq!(msg.id, 11);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dropping_receiver_stops_drain_task() {
        let queue = rank_queue(fast_config());
        {
            let _receiver = queue.receiver(4);
            tokio::time::sleep(Duration::from_millis(15)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        queue.emplace((5u64, 0u32));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(queue.size(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn emplace_if_rejection_is_not_queued() {
        let queue = rank_queue(fast_config());
        assert!(!queue.emplace_if(|msg: &Msg| msg.rank < 5, (1u64, 9u32)));
        assert!(queue.emplace_if(|msg: &Msg| msg.rank < 5, (2u64, 1u32)));
        assert_eq!(queue.size(), 1);
    }
}
