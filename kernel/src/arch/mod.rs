// Target-specific primitives the core needs: interrupt flag control, CPU
// identification, the context switch, and an idle wait. Bare-metal aarch64
// is the real target; anything hosted gets an emulated interrupt flag so
// the crate builds and its tests run on a development machine.

cfg_if::cfg_if! {
    if #[cfg(all(target_arch = "aarch64", target_os = "none"))] {
        mod aarch64;
        pub(crate) use aarch64::*;
    } else {
        mod host;
        pub(crate) use host::*;
    }
}

mod switch;
pub(crate) use switch::{context_switch, init_stack};
