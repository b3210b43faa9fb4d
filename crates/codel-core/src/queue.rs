use std::collections::VecDeque;
use std::time::Duration;

use tracing::{debug, trace};

use crate::api::{DrainReport, PassOutcome, QueueSnapshot, Visit};
use crate::config::{CoDelConfig, DelayBasis};
use crate::lock::{LockFamily, Locked, QueueLock};
use crate::policy::{ComparePolicy, TimePolicy};
use crate::state::QueueState;

/// Cola con control de congestión.
///
/// Los productores hacen `put`; un driver llama a [`CoDelQueue::process_if`] a su
/// propio ritmo. Cada pasada ordena el almacenamiento, sigue la demora mínima vista y,
/// si al llegar al último item ese mínimo sigue por encima de `drop_threshold`,
/// descarta el item y hace crecer [`CoDelQueue::suggested_interval`]
/// en `initial_interval / sqrt(consecutive_drops)`. Una pasada que llega ahí
/// bajo el umbral reinicia el intervalo y el contador de descartes.
///
/// El lock se mantiene durante toda la pasada, llamadas al visitor incluidas.
/// Los visitors no deben tocar la misma cola.
pub struct CoDelQueue<T, Tm, C, L: LockFamily = Locked> {
    name: String,
    config: CoDelConfig,
    time: Tm,
    compare: C,
    state: L::Lock<QueueState<T>>,
}

impl<T, Tm, C, L> CoDelQueue<T, Tm, C, L>
where
    Tm: TimePolicy<T>,
    C: ComparePolicy<T>,
    L: LockFamily,
{
    pub fn new(name: impl Into<String>, config: CoDelConfig, time: Tm, compare: C) -> Self {
        Self {
            name: name.into(),
            state: L::create(QueueState::new(config.initial_interval)),
            config,
            time,
            compare,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CoDelConfig {
        &self.config
    }

    pub fn time_policy(&self) -> &Tm {
        &self.time
    }

    pub fn size(&self) -> usize {
        self.state.lock().storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Intervalo que el driver debería esperar antes de la próxima pasada. Solo orientativo.
    pub fn suggested_interval(&self) -> Duration {
        self.state.lock().suggested_interval
    }

    pub fn consecutive_drops(&self) -> u32 {
        self.state.lock().drop_count
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        self.state.lock().snapshot()
    }

    /// Sella `item` y lo agrega al final. El sello se toma antes del lock.
    pub fn put(&self, mut item: T) {
        self.time.put_time(&mut item);
        let stamped = self.time.get_time(&item);
        self.state.lock().admit(item, stamped);
    }

    /// Construye el item a partir de `args` y lo guarda como [`CoDelQueue::put`].
    pub fn emplace<A>(&self, args: A)
    where
        A: Into<T>,
    {
        self.put(args.into());
    }

    /// Construye el item y lo admite solo si `pred` lo acepta.
    ///
    /// Un candidato rechazado se descarta sin sellarse y el almacenamiento
    /// queda intacto. Devuelve si el item fue admitido.
    pub fn emplace_if<A, P>(&self, pred: P, args: A) -> bool
    where
        A: Into<T>,
        P: FnOnce(&T) -> bool,
    {
        let candidate = args.into();
        if !pred(&candidate) {
            return false;
        }
        self.put(candidate);
        true
    }

    /// Drena la cola consumiendo cada item ofrecido.
    pub fn process<F>(&self, mut visitor: F) -> DrainReport
    where
        F: FnMut(T),
    {
        self.process_if(|item| {
            visitor(item);
            Visit::Consumed
        })
    }

    /// Ejecuta una pasada de drenado.
    ///
    /// Los items se ofrecen en orden. Los que el visitor devuelve con
    /// [`Visit::Requeue`] forman el almacenamiento tras la pasada, en el orden
    /// en que fueron devueltos.
    ///
    /// El almacenamiento se saca de la cola antes de la primera llamada al visitor.
    /// Si el visitor hace panic, los items aún no ofrecidos y los ya devueltos
    /// se pierden junto con la pasada.
    pub fn process_if<F>(&self, mut visitor: F) -> DrainReport
    where
        F: FnMut(T) -> Visit<T>,
    {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if state.storage.is_empty() {
            return DrainReport::idle();
        }

        let compare = &self.compare;
        state
            .storage
            .make_contiguous()
            .sort_by(|left, right| compare.compare(left, right));

        let reference = match self.config.delay_basis {
            DelayBasis::EpochStart => state.first_insert,
            DelayBasis::Now => Some(self.time.now()),
        };

        let working = std::mem::take(&mut state.storage);
        let total = working.len();
        debug!(queue = %self.name, size = total, "drain pass start");

        let mut report = DrainReport {
            outcome: PassOutcome::Healthy,
            delivered: 0,
            requeued: 0,
            dropped: 0,
        };
        let mut requeue = VecDeque::new();
        let mut lowest = Duration::MAX;

        for (index, item) in working.into_iter().enumerate() {
            let stamped = self.time.get_time(&item);
            let delay = reference
                .and_then(|at| at.checked_sub(stamped))
                .unwrap_or(Duration::MAX);
            lowest = lowest.min(delay);
            trace!(queue = %self.name, remaining = total - index, ?delay, "offering item");

            if index + 1 == total {
                if lowest > self.config.drop_threshold {
                    state.drop_count = state.drop_count.saturating_add(1);
                    let step = backoff_step(self.config.initial_interval, state.drop_count);
                    state.suggested_interval = state.suggested_interval.saturating_add(step);
                    report.outcome = PassOutcome::Congested;
                    report.dropped = 1;
                    debug!(
                        queue = %self.name,
                        ?lowest,
                        drops = state.drop_count,
                        interval = ?state.suggested_interval,
                        "congested, dropping item"
                    );
                    drop(item);
                    break;
                }
                state.suggested_interval = self.config.initial_interval;
                state.drop_count = 0;
            }

            match visitor(item) {
                Visit::Consumed => report.delivered += 1,
                Visit::Requeue(item) => {
                    report.requeued += 1;
                    requeue.push_back(item);
                }
            }
        }

        state.storage = requeue;
        state.first_insert = None;
        debug!(
            queue = %self.name,
            outcome = ?report.outcome,
            delivered = report.delivered,
            requeued = report.requeued,
            "drain pass done"
        );
        report
    }
}

/// `base / sqrt(drops)`, saturando en `Duration::MAX`.
fn backoff_step(base: Duration, drops: u32) -> Duration {
    Duration::try_from_secs_f64(base.as_secs_f64() / f64::from(drops).sqrt())
        .unwrap_or(Duration::MAX)
}
