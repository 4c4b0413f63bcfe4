//! 8253/8254 PIT: program channel 0 for a periodic rate-generator tick
//! and hand its IRQ (vector 0 in the remapped PIC, `irq::TIMER_VECTOR`)
//! to the portable dispatcher.

use crate::irq;
use x86::io::{outb, outw};

const CHANNEL0_DATA: u16 = 0x40;
const COMMAND: u16 = 0x43;
const BASE_FREQUENCY_HZ: u32 = 1_193_182;

/// Program channel 0 in mode 3 (square wave) for `hz` ticks per second and
/// register the timer's IRQ handler.
pub fn init(hz: u32) {
    let divisor = (BASE_FREQUENCY_HZ / hz).clamp(1, u16::MAX as u32) as u16;
    unsafe {
        outb(COMMAND, 0x36); // channel 0, lo/hi byte access, mode 3
        outw(CHANNEL0_DATA, divisor);
    }
    irq::register_irq(irq::TIMER_VECTOR, irq::timer_tick);
}
