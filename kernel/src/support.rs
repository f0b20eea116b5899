use crate::cpu;

/// RAII wrapper for one level of the per-CPU IRQ-save region. While any
/// guard is alive on a CPU, interrupts stay disabled there.
#[derive(Debug)]
pub(crate) struct IrqGuard {
    _not_send: core::marker::PhantomData<*mut ()>,
}

impl IrqGuard {
    #[inline]
    pub fn new() -> Self {
        cpu::irq_save();
        Self {
            _not_send: core::marker::PhantomData,
        }
    }
}

impl Drop for IrqGuard {
    #[inline]
    fn drop(&mut self) {
        cpu::irq_restore();
    }
}

#[macro_export]
macro_rules! static_assert {
    ($condition:expr) => {
        const _: () = [()][!($condition) as usize];
    };
}
