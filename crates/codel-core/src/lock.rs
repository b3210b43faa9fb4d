//! Estrategias de lock para el estado de la cola.
//!
//! La cola es genérica sobre un [`LockFamily`], así el mismo algoritmo de drenado
//! corre con exclusión mutua real ([`Locked`]) o sin ninguna
//! ([`Unlocked`]). `Unlocked` guarda el estado en un `RefCell`, lo que vuelve la
//! cola `!Sync`: el compilador no deja compartirla entre threads.

use std::cell::{RefCell, RefMut};
use std::ops::DerefMut;

/// Acceso exclusivo a un valor de tipo `S`.
pub trait QueueLock<S> {
    type Guard<'a>: DerefMut<Target = S>
    where
        Self: 'a,
        S: 'a;

    fn lock(&self) -> Self::Guard<'_>;
}

/// Constructor de una estrategia de lock, elegida como parámetro de tipo.
pub trait LockFamily {
    type Lock<S>: QueueLock<S>;

    fn create<S>(state: S) -> Self::Lock<S>;
}

impl<S> QueueLock<S> for parking_lot::Mutex<S> {
    type Guard<'a>
        = parking_lot::MutexGuard<'a, S>
    where
        S: 'a;

    fn lock(&self) -> Self::Guard<'_> {
        parking_lot::Mutex::lock(self)
    }
}

/// Familia de lock respaldada por `parking_lot::Mutex`.
#[derive(Copy, Clone, Debug, Default)]
pub struct Locked;

impl LockFamily for Locked {
    type Lock<S> = parking_lot::Mutex<S>;

    fn create<S>(state: S) -> Self::Lock<S> {
        parking_lot::Mutex::new(state)
    }
}

/// Lock no-op para usos single-thread.
///
/// Reentrar a la cola desde un visitor hace panic con un error de borrow en vez
/// de quedar en deadlock.
#[derive(Debug, Default)]
pub struct NoLock<S>(RefCell<S>);

impl<S> NoLock<S> {
    pub fn new(state: S) -> Self {
        Self(RefCell::new(state))
    }
}

impl<S> QueueLock<S> for NoLock<S> {
    type Guard<'a>
        = RefMut<'a, S>
    where
        S: 'a;

    fn lock(&self) -> Self::Guard<'_> {
        self.0.borrow_mut()
    }
}

/// Familia de lock que no sincroniza nada.
#[derive(Copy, Clone, Debug, Default)]
pub struct Unlocked;

impl LockFamily for Unlocked {
    type Lock<S> = NoLock<S>;

    fn create<S>(state: S) -> Self::Lock<S> {
        NoLock::new(state)
    }
}
