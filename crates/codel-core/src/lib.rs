//! Codel Core: cola con control de congestión adaptativo.
//!
//! Cola pasiva e in-process al estilo de CoDel (Controlled Delay).
//! En vez de un límite de capacidad con tail-drop, cada pasada de drenado mide
//! cuánto llevan esperando los items y descarta uno cuando la demora se mantuvo
//! durante toda la pasada, alargando el intervalo sugerido de drenado mientras
//! dure la congestión.
//!
//! - Los items se sellan y ordenan mediante políticas inyectadas
//!   ([`TimePolicy`], [`ComparePolicy`]); la cola nunca mira dentro de ellos.
//! - La estrategia de lock es un parámetro de tipo ([`Locked`] o [`Unlocked`]).
//! - El ritmo lo pone el caller; [`CoDelQueue::suggested_interval`] es solo una sugerencia.
//!   Un driver para Tokio vive en `codel-async`.

mod api;
pub mod config;
mod lock;
mod policy;
pub mod prometheus;
mod queue;
mod state;

pub use api::{DrainReport, DrainStats, PassOutcome, QueueSnapshot, Timestamped, Visit};
pub use config::{CoDelConfig, Config, ConfigError, DelayBasis, Section};
pub use lock::{LockFamily, Locked, NoLock, QueueLock, Unlocked};
pub use policy::{
    Clock, ClockTime, ComparePolicy, ComparePriority, CompareTime, FnTime, ManualClock,
    MonotonicClock, TimePolicy,
};
pub use queue::CoDelQueue;
pub use state::DrainCounters;
