//! Políticas de tiempo y orden inyectadas en [`CoDelQueue`](crate::CoDelQueue).

use std::cmp::Ordering;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, Instant};

use crate::api::Timestamped;

/// Fuente de tiempo monotónica. Los valores son offsets en la línea de tiempo del propio reloj.
pub trait Clock {
    fn now(&self) -> Duration;
}

/// Reloj independiente del wall clock, anclado al construirse.
#[derive(Copy, Clone, Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Reloj manejado desde afuera. Los clones comparten la misma lectura.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(at: Duration) -> Self {
        let clock = Self::new();
        clock.set(at);
        clock
    }

    pub fn set(&self, at: Duration) {
        self.nanos.store(duration_to_ns(at), AtomicOrdering::Release);
    }

    pub fn advance(&self, by: Duration) {
        let delta = duration_to_ns(by);
        let mut current = self.nanos.load(AtomicOrdering::Relaxed);
        loop {
            let next = current.saturating_add(delta);
            match self.nanos.compare_exchange(
                current,
                next,
                AtomicOrdering::AcqRel,
                AtomicOrdering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(AtomicOrdering::Acquire))
    }
}

fn duration_to_ns(value: Duration) -> u64 {
    value.as_nanos().min(u128::from(u64::MAX)) as u64
}

/// Las dos operaciones de tiempo que la cola aplica a los items, más el reloj
/// del que sellan.
///
/// `put_time` se llama una sola vez por item admitido, antes de que el item
/// sea visible para una pasada de drenado. `get_time` debe devolver lo que
/// registró `put_time`.
pub trait TimePolicy<T> {
    fn now(&self) -> Duration;
    fn put_time(&self, item: &mut T);
    fn get_time(&self, item: &T) -> Duration;
}

/// Sella items [`Timestamped`] desde un [`Clock`].
#[derive(Clone, Debug, Default)]
pub struct ClockTime<C> {
    clock: C,
}

impl<C: Clock> ClockTime<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }
}

impl<T: Timestamped, C: Clock> TimePolicy<T> for ClockTime<C> {
    fn now(&self) -> Duration {
        self.clock.now()
    }

    fn put_time(&self, item: &mut T) {
        item.set_enqueue_time(self.clock.now());
    }

    fn get_time(&self, item: &T) -> Duration {
        item.enqueue_time()
    }
}

/// Política de tiempo armada con dos closures, para items cuyo timestamp vive
/// donde un impl de trait no llega.
pub struct FnTime<C, P, G> {
    clock: C,
    put: P,
    get: G,
}

impl<C, P, G> FnTime<C, P, G> {
    pub fn new(clock: C, put: P, get: G) -> Self {
        Self { clock, put, get }
    }
}

impl<T, C, P, G> TimePolicy<T> for FnTime<C, P, G>
where
    C: Clock,
    P: Fn(&mut T, Duration),
    G: Fn(&T) -> Duration,
{
    fn now(&self) -> Duration {
        self.clock.now()
    }

    fn put_time(&self, item: &mut T) {
        (self.put)(item, self.clock.now());
    }

    fn get_time(&self, item: &T) -> Duration {
        (self.get)(item)
    }
}

/// Orden con el que se ordena el almacenamiento justo antes de cada pasada.
pub trait ComparePolicy<T> {
    fn compare(&self, left: &T, right: &T) -> Ordering;
}

impl<T, F> ComparePolicy<T> for F
where
    F: Fn(&T, &T) -> Ordering,
{
    fn compare(&self, left: &T, right: &T) -> Ordering {
        self(left, right)
    }
}

/// Primero el tiempo de encolado más antiguo.
#[derive(Copy, Clone, Debug, Default)]
pub struct CompareTime;

impl<T: Timestamped> ComparePolicy<T> for CompareTime {
    fn compare(&self, left: &T, right: &T) -> Ordering {
        left.enqueue_time().cmp(&right.enqueue_time())
    }
}

/// Ascendente según el `Ord` del propio item.
pub struct ComparePriority<T>(PhantomData<fn(&T)>);

impl<T> ComparePriority<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for ComparePriority<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for ComparePriority<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T: Ord> ComparePolicy<T> for ComparePriority<T> {
    fn compare(&self, left: &T, right: &T) -> Ordering {
        left.cmp(right)
    }
}
