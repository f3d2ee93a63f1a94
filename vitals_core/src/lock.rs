//! Locking discipline for metric state.
//!
//! Every metric owns exactly one lock of the process-selected discipline.
//! The discipline is a runtime configuration choice, so tests can exercise
//! all three without separate builds. Critical sections guarded here are
//! O(bucket count) at worst and never perform I/O or allocation, which is
//! what makes the spinlock variant viable.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

/// Which lock implementation guards each metric's mutable state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockDiscipline {
    /// Blocking mutex. The default; acceptable latency under low contention.
    #[default]
    Mutex,
    /// Busy-waiting lock. Lowest latency for short critical sections.
    Spinlock,
    /// Reader/writer lock. Lets concurrent serializer snapshots share access.
    Rwlock,
}

/// Minimal test-and-test-and-set spinlock with an RAII guard.
pub struct SpinLock<T> {
    locked: AtomicBool,
    value: UnsafeCell<T>,
}

// Safety: the lock serializes all access to `value`.
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> SpinGuard<'_, T> {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            // Spin on a plain load to keep the cache line shared while waiting.
            while self.locked.load(Ordering::Relaxed) {
                std::hint::spin_loop();
            }
        }
        SpinGuard { lock: self }
    }
}

pub struct SpinGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> Deref for SpinGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the guard holds the lock.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for SpinGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: the guard holds the lock exclusively.
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for SpinGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

/// A value paired with one lock instance of the chosen discipline.
///
/// Access is scoped: the guard is released on every exit path, including
/// panics in the closure (std locks additionally recover from poisoning so
/// a panicking observer cannot wedge the metric).
pub enum Guarded<T> {
    Mutex(Mutex<T>),
    Spin(SpinLock<T>),
    Rwlock(RwLock<T>),
}

impl<T> Guarded<T> {
    pub fn new(discipline: LockDiscipline, value: T) -> Self {
        match discipline {
            LockDiscipline::Mutex => Guarded::Mutex(Mutex::new(value)),
            LockDiscipline::Spinlock => Guarded::Spin(SpinLock::new(value)),
            LockDiscipline::Rwlock => Guarded::Rwlock(RwLock::new(value)),
        }
    }

    pub fn discipline(&self) -> LockDiscipline {
        match self {
            Guarded::Mutex(_) => LockDiscipline::Mutex,
            Guarded::Spin(_) => LockDiscipline::Spinlock,
            Guarded::Rwlock(_) => LockDiscipline::Rwlock,
        }
    }

    /// Run `f` with exclusive access to the value.
    pub fn with_write<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        match self {
            Guarded::Mutex(m) => {
                let mut guard = m.lock().unwrap_or_else(PoisonError::into_inner);
                f(&mut guard)
            }
            Guarded::Spin(s) => {
                let mut guard = s.lock();
                f(&mut guard)
            }
            Guarded::Rwlock(l) => {
                let mut guard = l.write().unwrap_or_else(PoisonError::into_inner);
                f(&mut guard)
            }
        }
    }

    /// Run `f` with at least shared access to the value.
    ///
    /// Only the rwlock discipline admits concurrent readers; the other two
    /// fall back to exclusive acquisition.
    pub fn with_read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        match self {
            Guarded::Mutex(m) => {
                let guard = m.lock().unwrap_or_else(PoisonError::into_inner);
                f(&guard)
            }
            Guarded::Spin(s) => {
                let guard = s.lock();
                f(&guard)
            }
            Guarded::Rwlock(l) => {
                let guard = l.read().unwrap_or_else(PoisonError::into_inner);
                f(&guard)
            }
        }
    }
}
