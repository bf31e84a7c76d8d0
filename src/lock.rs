use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};

#[cfg(not(loom))]
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(loom)]
use loom::sync::atomic::{AtomicBool, Ordering};

// A non-blocking mutual exclusion primitive: a single atomic flag guarding
// one value. `try_lock` never spins or parks; callers that fail are expected
// to move on to another queue rather than wait here.
//
// Acquire on a successful CAS makes the previous owner's writes visible;
// the failed path carries no data dependency and stays relaxed. Unlock is a
// release store.
pub struct TryLock<T> {
    in_use: AtomicBool,
    value: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for TryLock<T> {}
unsafe impl<T: Send> Sync for TryLock<T> {}

impl<T> TryLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            in_use: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    // Attempts to take the lock. Returns a guard on success; the guard
    // releases the lock on drop.
    #[inline]
    pub fn try_lock(&self) -> Option<TryLockGuard<'_, T>> {
        if self
            .in_use
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(TryLockGuard { lock: self })
        } else {
            None
        }
    }

    // The value is reachable without synchronization once no other thread
    // can hold a reference, e.g. during construction and teardown.
    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }
}

pub struct TryLockGuard<'a, T> {
    lock: &'a TryLock<T>,
}

impl<T> Deref for TryLockGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: the guard proves exclusive ownership of the lock.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for TryLockGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: as above; the guard is unique and borrowed mutably.
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for TryLockGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.lock.in_use.store(false, Ordering::Release);
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    #[test]
    fn lock_is_exclusive_and_reentrant_free() {
        let lock = TryLock::new(0u32);

        let mut guard = lock.try_lock().unwrap();
        *guard += 1;
        assert!(lock.try_lock().is_none());
        drop(guard);

        let guard = lock.try_lock().unwrap();
        assert_eq!(*guard, 1);
    }

    #[test]
    fn guard_releases_on_drop() {
        let lock = TryLock::new(Vec::<u64>::new());
        for i in 0..10 {
            lock.try_lock().unwrap().push(i);
        }
        assert_eq!(lock.try_lock().unwrap().len(), 10);
    }
}

#[cfg(all(test, loom))]
mod loom_tests {
    use super::*;
    use loom::sync::Arc;
    use loom::thread;

    // Two threads increment a counter behind the try-lock, retrying failed
    // acquisitions. No interleaving may lose an update or hold the lock
    // twice.
    #[test]
    fn loom_counter_no_lost_updates() {
        loom::model(|| {
            let lock = Arc::new(TryLock::new(0usize));

            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let lock = Arc::clone(&lock);
                    thread::spawn(move || loop {
                        if let Some(mut guard) = lock.try_lock() {
                            *guard += 1;
                            break;
                        }
                        thread::yield_now();
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }

            let guard = lock.try_lock().unwrap();
            assert_eq!(*guard, 2);
        });
    }

    // A write made under the lock must be visible to the next owner.
    #[test]
    fn loom_release_acquire_visibility() {
        loom::model(|| {
            let lock = Arc::new(TryLock::new((0u32, 0u32)));

            let writer = {
                let lock = Arc::clone(&lock);
                thread::spawn(move || loop {
                    if let Some(mut guard) = lock.try_lock() {
                        guard.0 = 7;
                        guard.1 = 7;
                        break;
                    }
                    thread::yield_now();
                })
            };

            loop {
                if let Some(guard) = lock.try_lock() {
                    assert_eq!(guard.0, guard.1);
                    break;
                }
                thread::yield_now();
            }

            writer.join().unwrap();
        });
    }
}
