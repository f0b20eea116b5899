#![no_std]

//! Build-time configuration knobs for the Argentum kernel.
//!
//! Values here are plain constants so that every crate in the workspace
//! agrees on them at compile time.

/// Number of CPUs the scheduler bookkeeping is sized for.
pub const NUM_CORES: usize = 4;

/// Frequency of the platform tick, in Hz. All timeouts are expressed in
/// ticks; `1000 % TICK_HZ` must be zero so millisecond conversion stays
/// integral.
pub const TICK_HZ: usize = 100;

/// Number of ready queues. Priority values range over `0..MAX_PRIORITIES`
/// with smaller values scheduled first.
pub const MAX_PRIORITIES: usize = 32;

/// Stack size handed to threads created without an explicit stack.
pub const DEFAULT_STACK_SIZE: usize = 16 * 1024;

/// Stack size for system threads (idle, interrupt threads).
pub const SYSTEM_THREAD_STACK_SIZE: usize = 8 * 1024;

/// Upper bound on an object pool name, including room for debug output.
pub const OBJECT_POOL_NAME_MAX: usize = 64;

/// Number of blocks carved out of a single object-pool slab.
pub const OBJECT_POOL_SLAB_CAPACITY: usize = 8;

/// Maximum number of hops a priority-inheritance chain is propagated
/// through before raising stops. Bounds the work done while holding the
/// scheduler lock.
pub const MUTEX_CHAIN_MAX: usize = 8;
