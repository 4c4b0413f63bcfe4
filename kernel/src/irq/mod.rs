//! IRQ dispatch (§4.H): hardware trap -> per-vector trampoline -> common
//! handler that reads the vector number, increments its counter, runs every
//! registered handler on that vector in registration order, then acks.
//!
//! The registration list is append-only at runtime; nothing in this core
//! removes a handler. Nested IRQs are not permitted: the handler asserts
//! its own non-reentrance via a per-vector in-flight flag.

use crate::arch;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use spin::Mutex;

/// One 8259 PIC cascade's worth of vectors (IRQ0..IRQ15).
pub const NUM_VECTORS: usize = 16;
pub const TIMER_VECTOR: usize = 0;

pub type Handler = fn();

struct Vector {
    handlers: Mutex<Vec<Handler>>,
    count: AtomicU64,
    in_flight: AtomicBool,
}

impl Vector {
    const fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
            count: AtomicU64::new(0),
            in_flight: AtomicBool::new(false),
        }
    }
}

static VECTORS: [Vector; NUM_VECTORS] = [const { Vector::new() }; NUM_VECTORS];

/// Append a handler to `vector`'s list. Handlers run in registration
/// order; there is no corresponding unregister.
pub fn register_irq(vector: usize, handler: Handler) {
    VECTORS[vector].handlers.lock().push(handler);
}

/// Number of times `vector` has fired.
pub fn irq_count(vector: usize) -> u64 {
    VECTORS[vector].count.load(Ordering::Relaxed)
}

/// The common IRQ path, called by each vector's architecture-specific
/// trampoline after it has saved the interrupted context. Asserts
/// non-reentrance, runs every registered handler, acks the controller,
/// then preempts the current thread if its preempt-disable counter is
/// zero and a reschedule is pending (§5: preemptive at IRQ exit).
pub fn handle_irq(vector: usize) {
    let v = &VECTORS[vector];
    assert!(
        !v.in_flight.swap(true, Ordering::AcqRel),
        "nested IRQ on vector {vector}"
    );

    v.count.fetch_add(1, Ordering::Relaxed);
    let handlers: Vec<Handler> = v.handlers.lock().clone();
    for handler in &handlers {
        handler();
    }

    v.in_flight.store(false, Ordering::Release);
    ack_irq(vector);

    let current = arch::current_thread_id();
    if crate::process::table::preempt_count(current) == 0 && crate::process::table::take_reschedule_flag(current) {
        arch::reschedule();
    }
}

/// The timer's registered handler: marks the interrupted thread for
/// reschedule at the next safe point rather than switching here directly,
/// since `handle_irq` itself performs the post-handler preemption check.
pub fn timer_tick() {
    crate::process::table::set_reschedule(arch::current_thread_id());
}

#[cfg(target_os = "none")]
pub fn ack_irq(vector: usize) {
    arch_pic::eoi(vector);
}

#[cfg(not(target_os = "none"))]
pub fn ack_irq(_vector: usize) {}

/// Remap the 8259 PIC pair so hardware IRQs land outside the CPU exception
/// range. Must run once, before interrupts are unmasked.
#[cfg(target_os = "none")]
pub fn init() {
    arch_pic::init();
}

#[cfg(not(target_os = "none"))]
pub fn init() {}

#[cfg(target_os = "none")]
mod arch_pic {
    use pic8259::ChainedPics;
    use spin::Mutex;

    const PIC1_OFFSET: u8 = 0x20;
    const PIC2_OFFSET: u8 = 0x28;

    static PICS: Mutex<ChainedPics> = Mutex::new(unsafe { ChainedPics::new(PIC1_OFFSET, PIC2_OFFSET) });

    pub fn init() {
        unsafe { PICS.lock().initialize() };
    }

    pub fn eoi(vector: usize) {
        unsafe { PICS.lock().notify_end_of_interrupt(PIC1_OFFSET + vector as u8) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static HITS: AtomicU64 = AtomicU64::new(0);

    fn bump() {
        HITS.fetch_add(1, Ordering::Relaxed);
    }

    #[test]
    fn registered_handlers_run_in_order_and_counter_advances() {
        crate::process::table::reset_for_test();
        let tid = crate::process::table::alloc_thread_for_test();
        crate::arch::testing::set_current_thread(tid);

        let vector = 7;
        let before = irq_count(vector);
        register_irq(vector, bump);
        let hits_before = HITS.load(Ordering::Relaxed);
        handle_irq(vector);
        assert_eq!(HITS.load(Ordering::Relaxed), hits_before + 1);
        assert_eq!(irq_count(vector), before + 1);
    }

    #[test]
    #[should_panic(expected = "nested IRQ")]
    fn reentrant_dispatch_on_the_same_vector_is_rejected() {
        crate::process::table::reset_for_test();
        let tid = crate::process::table::alloc_thread_for_test();
        crate::arch::testing::set_current_thread(tid);

        let vector = 9;
        VECTORS[vector].in_flight.store(true, Ordering::Release);
        handle_irq(vector);
    }
}
