//! aarch64 (EL1) backend: DAIF interrupt masking, MPIDR-based CPU ids and
//! `wfi` idling.

use core::sync::atomic::{compiler_fence, Ordering};

#[inline]
pub(crate) fn cpu_id() -> usize {
    let mpidr: usize;
    unsafe { core::arch::asm!("mrs {}, mpidr_el1", out(reg) mpidr, options(nostack, nomem)) };
    mpidr & 0xff
}

/// Capture DAIF and mask IRQ/FIQ on the local core.
#[inline]
pub(crate) fn irq_save_disable() -> usize {
    let old: usize;
    unsafe {
        core::arch::asm!(
            "mrs {}, daif",
            "msr daifset, #3",
            out(reg) old,
            options(nostack)
        )
    }
    compiler_fence(Ordering::SeqCst);
    old
}

#[inline]
pub(crate) fn irq_restore(old: usize) {
    compiler_fence(Ordering::SeqCst);
    unsafe { core::arch::asm!("msr daif, {}", in(reg) old, options(nostack)) }
}

#[inline]
pub(crate) fn irq_enable() {
    unsafe { core::arch::asm!("msr daifclr, #3", options(nostack, nomem)) }
}

#[inline]
pub(crate) fn irq_enabled() -> bool {
    let daif: usize;
    unsafe { core::arch::asm!("mrs {}, daif", out(reg) daif, options(nostack)) };
    (daif & (1 << 7)) == 0
}

/// Halt until an interrupt arrives.
#[inline]
pub(crate) fn wait_for_interrupt() {
    unsafe { core::arch::asm!("wfi", options(nostack)) };
}

const MAX_BACKTRACE_ADDRESSES: usize = 10;

/// Walk the frame-pointer chain. Used by the panic handler; frames above
/// the panic machinery are enough to locate a fatal call site.
pub(crate) fn backtrace() -> [usize; MAX_BACKTRACE_ADDRESSES] {
    let mut pcs = [0usize; MAX_BACKTRACE_ADDRESSES];
    let mut fp: usize;
    unsafe { core::arch::asm!("mov {}, x29", out(reg) fp, options(nostack, nomem)) };
    for slot in pcs.iter_mut() {
        if fp == 0 || fp & 0xf != 0 {
            break;
        }
        let lr = unsafe { *((fp + 8) as *const usize) };
        if lr == 0 {
            break;
        }
        *slot = lr;
        fp = unsafe { *(fp as *const usize) };
    }
    pcs
}
