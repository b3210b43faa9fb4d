use std::fmt;
use std::time::Duration;

/// Items que llevan su propio timestamp de encolado.
///
/// Implementarlo permite usar las políticas [`ClockTime`](crate::ClockTime)
/// y [`CompareTime`](crate::CompareTime) sin escribir unas a mano.
pub trait Timestamped {
    /// Momento en que el item fue admitido en una cola.
    fn enqueue_time(&self) -> Duration;
    /// Registra el momento de admisión. Se llama una sola vez por item admitido.
    fn set_enqueue_time(&mut self, at: Duration);
}

/// Decisión que devuelve un visitor de `process_if` por cada item ofrecido.
///
/// El item se mueve al visitor; devolverlo con [`Visit::Requeue`] es la única
/// forma de que sobreviva a la pasada.
pub enum Visit<T> {
    /// El visitor se quedó con el item. La cola ya no es su dueña.
    Consumed,
    /// El item se difiere a una pasada futura.
    Requeue(T),
}

impl<T> Visit<T> {
    pub fn is_consumed(&self) -> bool {
        matches!(self, Visit::Consumed)
    }
}

impl<T> fmt::Debug for Visit<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Visit::Consumed => f.write_str("Consumed"),
            Visit::Requeue(_) => f.write_str("Requeue(..)"),
        }
    }
}

/// Resultado del chequeo de congestión de una pasada de drenado.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PassOutcome {
    /// No había nada almacenado; la pasada no tocó estado.
    Idle,
    /// La demora mínima observada quedó dentro del umbral de descarte.
    /// Se reinició el estado de backoff.
    Healthy,
    /// La demora mínima observada superaba el umbral al llegar al último item.
    /// Ese item se descartó y el backoff creció.
    Congested,
}

/// Contabilidad por pasada que devuelven `process` / `process_if`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DrainReport {
    pub outcome: PassOutcome,
    /// Items consumidos por el visitor.
    pub delivered: usize,
    /// Items devueltos por el visitor; quedan almacenados tras la pasada.
    pub requeued: usize,
    /// Items destruidos por la rama de congestión (0 o 1).
    pub dropped: usize,
}

impl DrainReport {
    pub(crate) fn idle() -> Self {
        Self {
            outcome: PassOutcome::Idle,
            delivered: 0,
            requeued: 0,
            dropped: 0,
        }
    }
}

/// Vista puntual del almacenamiento y del estado de backoff de una cola.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct QueueSnapshot {
    pub len: usize,
    pub consecutive_drops: u32,
    pub suggested_interval: Duration,
}

/// Métricas acumuladas de drenado más el snapshot actual de la cola.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DrainStats {
    /// Pasadas de drenado totales, incluidas las vacías.
    pub passes: u64,
    /// Pasadas que encontraron la cola vacía.
    pub idle_passes: u64,
    /// Pasadas que tomaron la rama de congestión.
    pub congested_passes: u64,
    /// Items consumidos por visitors en total.
    pub delivered: u64,
    /// Decisiones de reencolado totales (un item diferido dos veces cuenta dos).
    pub requeued: u64,
    /// Items destruidos por la rama de congestión en total.
    pub dropped: u64,
    /// Items almacenados ahora mismo.
    pub queue_len: u64,
    /// Racha actual de pasadas congestionadas seguidas.
    pub consecutive_drops: u32,
    /// Intervalo que el driver debería esperar antes de la próxima pasada.
    pub suggested_interval: Duration,
}
