pub use argentum_kconfig::{
    DEFAULT_STACK_SIZE, MAX_PRIORITIES, MUTEX_CHAIN_MAX, NUM_CORES, OBJECT_POOL_NAME_MAX,
    OBJECT_POOL_SLAB_CAPACITY, SYSTEM_THREAD_STACK_SIZE, TICK_HZ,
};

use crate::types::Priority;

/// Numerically largest (weakest) priority value.
pub const LOWEST_PRIORITY: Priority = (MAX_PRIORITIES - 1) as Priority;

/// Priority handed to threads built without an explicit one.
pub const DEFAULT_PRIORITY: Priority = (MAX_PRIORITIES / 2) as Priority;

// The ready-table bitmap is a u32; millisecond conversion must stay exact.
crate::static_assert!(MAX_PRIORITIES >= 32);
crate::static_assert!(MAX_PRIORITIES <= u32::BITS as usize);
crate::static_assert!(TICK_HZ > 0 && 1000 % TICK_HZ == 0);
crate::static_assert!(NUM_CORES >= 1);
