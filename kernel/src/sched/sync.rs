//! Spinlocks, wait queues, and mutexes — the kernel's blocking
//! primitives, built without relying on the hardware actually contending
//! (§3, §4.G): on a single execution engine the spin path is unreachable
//! in correct code, but the ticket discipline still orders critical
//! sections against interrupt handlers.

use crate::arch;
use crate::process::ThreadId;
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU32, Ordering};

/// A ticket spinlock: unlocked iff `next == serving`.
pub struct Spinlock<T> {
    next: AtomicU32,
    serving: AtomicU32,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for Spinlock<T> {}
unsafe impl<T: Send> Sync for Spinlock<T> {}

pub struct SpinlockGuard<'a, T> {
    lock: &'a Spinlock<T>,
}

impl<T> Spinlock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            next: AtomicU32::new(0),
            serving: AtomicU32::new(0),
            data: UnsafeCell::new(data),
        }
    }

    /// Acquire without touching the preempt-disable counter. Used by
    /// [`SpinlockIrq`] and other callers that manage preemption themselves.
    pub fn lock(&self) -> SpinlockGuard<'_, T> {
        self.raw_lock();
        SpinlockGuard { lock: self }
    }

    fn raw_lock(&self) {
        let ticket = self.next.fetch_add(1, Ordering::Relaxed);
        while self.serving.load(Ordering::Acquire) != ticket {
            core::hint::spin_loop();
        }
    }

    fn raw_unlock(&self) {
        self.serving.fetch_add(1, Ordering::Release);
    }

    /// Acquire without an RAII guard: needed by the scheduler, whose lock
    /// is released by the *incoming* thread after a context switch rather
    /// than by the call frame that acquired it (§4.G).
    ///
    /// # Safety
    /// The caller must pair this with exactly one [`Spinlock::unlock_raw`]
    /// and must not alias `data_ptr` mutably from two places at once.
    pub unsafe fn lock_raw(&self) {
        self.raw_lock();
    }

    /// # Safety
    /// Must only be called while holding the lock via [`Spinlock::lock_raw`].
    pub unsafe fn unlock_raw(&self) {
        self.raw_unlock();
    }

    pub fn data_ptr(&self) -> *mut T {
        self.data.get()
    }
}

impl<T> Deref for SpinlockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinlockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinlockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.serving.fetch_add(1, Ordering::Release);
    }
}

/// A spinlock whose acquire/release bracket preempt-disable and, for the
/// IRQ-saving variant, the interrupt-enable flag.
pub struct PreemptSpinlock<T>(Spinlock<T>);

impl<T> PreemptSpinlock<T> {
    pub const fn new(data: T) -> Self {
        Self(Spinlock::new(data))
    }

    pub fn lock(&self) -> PreemptGuard<'_, T> {
        arch::preempt_disable();
        PreemptGuard {
            inner: self.0.lock(),
        }
    }

    /// `spin_lock_irq`: disables interrupts first, saving the prior state
    /// so release can restore it.
    pub fn lock_irq(&self) -> IrqGuard<'_, T> {
        let was_enabled = arch::disable_irqs();
        arch::preempt_disable();
        IrqGuard {
            inner: self.0.lock(),
            was_enabled,
        }
    }
}

pub struct PreemptGuard<'a, T> {
    inner: SpinlockGuard<'a, T>,
}

impl<T> Deref for PreemptGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.inner
    }
}
impl<T> DerefMut for PreemptGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}
impl<T> Drop for PreemptGuard<'_, T> {
    fn drop(&mut self) {
        arch::preempt_enable();
    }
}

pub struct IrqGuard<'a, T> {
    inner: SpinlockGuard<'a, T>,
    was_enabled: bool,
}

impl<T> Deref for IrqGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.inner
    }
}
impl<T> DerefMut for IrqGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}
impl<T> Drop for IrqGuard<'_, T> {
    fn drop(&mut self) {
        arch::preempt_enable();
        if self.was_enabled {
            arch::enable_irqs();
        }
    }
}

/// A spinlock plus a list of BLOCKED threads (§3, §4.G).
pub struct WaitQueue {
    waiters: Spinlock<Vec<ThreadId>>,
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            waiters: Spinlock::new(Vec::new()),
        }
    }

    /// `begin_wait`: enqueue the current thread and mark it BLOCKED under
    /// the queue's lock, then release the lock. The caller must call
    /// `reschedule()` afterward; the race where `kick` runs in between is
    /// intentional and harmless (§4.G).
    pub fn begin_wait(&self) {
        let current = arch::current_thread_id();
        let mut waiters = self.waiters.lock();
        crate::process::table::set_state(current, crate::process::ThreadState::Blocked);
        waiters.push(current);
    }

    /// `kick`: move every waiting thread back to runnable.
    pub fn kick(&self) {
        let mut waiters = self.waiters.lock();
        for tid in waiters.drain(..) {
            crate::sched::scheduler::make_runnable(tid);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.lock().is_empty()
    }
}

/// A spinlock, a wait queue, and the owning thread (or none).
pub struct Mutex {
    spinlock: Spinlock<Option<ThreadId>>,
    wait_queue: WaitQueue,
}

impl Mutex {
    pub const fn new() -> Self {
        Self {
            spinlock: Spinlock::new(None),
            wait_queue: WaitQueue::new(),
        }
    }

    pub fn acquire(&self) {
        loop {
            {
                let mut owner = self.spinlock.lock();
                if owner.is_none() {
                    *owner = Some(arch::current_thread_id());
                    return;
                }
            }
            self.wait_queue.begin_wait();
            arch::reschedule();
        }
    }

    pub fn release(&self) {
        {
            let mut owner = self.spinlock.lock();
            *owner = None;
        }
        self.wait_queue.kick();
    }

    pub fn owner(&self) -> Option<ThreadId> {
        *self.spinlock.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spinlock_free_after_lock_unlock() {
        let lock = Spinlock::new(0u32);
        {
            let mut guard = lock.lock();
            *guard += 1;
        }
        assert_eq!(*lock.lock(), 1);
    }

    #[test]
    fn wait_queue_kick_empties_the_queue() {
        let wq = WaitQueue::new();
        crate::process::table::reset_for_test();
        let tid = crate::process::table::alloc_thread_for_test();
        arch::testing::set_current_thread(tid);
        wq.begin_wait();
        // `begin_wait`'s own doc comment: the caller reschedules away next,
        // so by the time anything calls `kick` the blocked thread is no
        // longer "current" — model that handoff before kicking.
        let other = crate::process::table::alloc_thread_for_test();
        arch::testing::set_current_thread(other);
        assert!(!wq.is_empty());
        wq.kick();
        assert!(wq.is_empty());
    }
}
