use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use codel_core::{
    Clock, ClockTime, CoDelConfig, CoDelQueue, CompareTime, Config, DrainCounters, MonotonicClock,
    Timestamped, Visit, prometheus,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

struct Packet {
    seq: u64,
    enqueued: Duration,
}

impl From<u64> for Packet {
    fn from(seq: u64) -> Self {
        Self {
            seq,
            enqueued: Duration::ZERO,
        }
    }
}

impl Timestamped for Packet {
    fn enqueue_time(&self) -> Duration {
        self.enqueued
    }

    fn set_enqueue_time(&mut self, at: Duration) {
        self.enqueued = at;
    }
}

type BenchQueue = CoDelQueue<Packet, ClockTime<MonotonicClock>, CompareTime>;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let run_seconds = 5u64;
    let producer_count = 4usize;
    let produce_every = Duration::from_micros(200);
    // Items the consumer can take per pass; producers outpace it.
    let per_pass_budget = 16usize;

    let codel = match std::env::args().nth(1) {
        Some(path) => match Config::load(&path) {
            Ok(config) => config.codel_or_default(),
            Err(err) => {
                warn!(%err, "falling back to default queue tuning");
                CoDelConfig::default()
            }
        },
        None => CoDelConfig::default(),
    };
    info!(?codel, "queue tuning");

    let queue: Arc<BenchQueue> = Arc::new(CoDelQueue::new(
        "bench",
        codel,
        ClockTime::new(MonotonicClock::new()),
        CompareTime,
    ));
    let counters = Arc::new(DrainCounters::new());
    let running = Arc::new(AtomicBool::new(true));
    let produced_total = Arc::new(AtomicU64::new(0));
    let sojourn_sum_ns = Arc::new(AtomicU64::new(0));

    let mut handles = Vec::new();
    for producer in 0..producer_count {
        handles.push(spawn_producer(
            Arc::clone(&queue),
            Arc::clone(&running),
            Arc::clone(&produced_total),
            producer as u64,
            produce_every,
        ));
    }
    handles.push(spawn_driver(
        Arc::clone(&queue),
        Arc::clone(&counters),
        Arc::clone(&running),
        Arc::clone(&sojourn_sum_ns),
        per_pass_budget,
    ));

    println!(
        "bench: {} producers every {:?}, consumer budget {} per pass ({}s)",
        producer_count, produce_every, per_pass_budget, run_seconds
    );
    let start = Instant::now();
    thread::sleep(Duration::from_secs(run_seconds));
    let elapsed = start.elapsed().as_secs_f64();

    running.store(false, Ordering::Relaxed);
    for handle in handles {
        let _ = handle.join();
    }

    let stats = counters.stats(queue.snapshot());
    let produced = produced_total.load(Ordering::Relaxed);
    let avg_sojourn_ms = if stats.delivered > 0 {
        sojourn_sum_ns.load(Ordering::Relaxed) as f64 / stats.delivered as f64 / 1_000_000.0
    } else {
        0.0
    };
    let throughput = if elapsed > 0.0 {
        stats.delivered as f64 / elapsed
    } else {
        0.0
    };

    println!("produced: {produced}");
    println!("delivered: {} ({throughput:.0}/s)", stats.delivered);
    println!("dropped: {}", stats.dropped);
    println!(
        "passes: {} (congested {}, idle {})",
        stats.passes, stats.congested_passes, stats.idle_passes
    );
    println!("left in queue: {}", stats.queue_len);
    println!("avg sojourn: {avg_sojourn_ms:.3} ms");
    println!(
        "final suggested interval: {:?} after {} consecutive drops",
        stats.suggested_interval, stats.consecutive_drops
    );
    println!();
    print!("{}", prometheus::render_stats(&stats, "", queue.name()));
}

fn spawn_producer(
    queue: Arc<BenchQueue>,
    running: Arc<AtomicBool>,
    produced_total: Arc<AtomicU64>,
    producer: u64,
    every: Duration,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut seq = producer << 48;
        while running.load(Ordering::Relaxed) {
            queue.emplace(seq);
            seq += 1;
            produced_total.fetch_add(1, Ordering::Relaxed);
            thread::sleep(every);
        }
    })
}

fn spawn_driver(
    queue: Arc<BenchQueue>,
    counters: Arc<DrainCounters>,
    running: Arc<AtomicBool>,
    sojourn_sum_ns: Arc<AtomicU64>,
    budget: usize,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let clock = *queue.time_policy().clock();
        let mut last_seq = 0u64;
        while running.load(Ordering::Relaxed) {
            let now = clock.now();
            let mut taken = 0usize;
            let report = queue.process_if(|packet| {
                if taken >= budget {
                    return Visit::Requeue(packet);
                }
                taken += 1;
                last_seq = packet.seq;
                let sojourn = now.saturating_sub(packet.enqueued);
                sojourn_sum_ns.fetch_add(sojourn.as_nanos() as u64, Ordering::Relaxed);
                Visit::Consumed
            });
            counters.record(&report);
            thread::sleep(queue.suggested_interval());
        }
        info!(last_seq, "driver stopped");
    })
}
