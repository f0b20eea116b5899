//! The context switch: save the callee-saved register frame on the
//! current stack, publish the resulting stack pointer through `save_slot`,
//! then adopt `to_sp` and return into whatever frame lives there. A brand
//! new thread gets a fabricated frame whose return address is the entry
//! trampoline.
//!
//! Only callee-saved registers travel across a switch; everything else is
//! dead at a call boundary per the C ABI.

#[cfg(target_arch = "aarch64")]
core::arch::global_asm!(
    r#"
    .balign 4
    .global argentum_context_switch
    .global _argentum_context_switch
argentum_context_switch:
_argentum_context_switch:
    sub     sp, sp, #96
    stp     x19, x20, [sp, #0]
    stp     x21, x22, [sp, #16]
    stp     x23, x24, [sp, #32]
    stp     x25, x26, [sp, #48]
    stp     x27, x28, [sp, #64]
    stp     x29, x30, [sp, #80]
    mov     x9, sp
    str     x9, [x0]
    mov     sp, x1
    ldp     x19, x20, [sp, #0]
    ldp     x21, x22, [sp, #16]
    ldp     x23, x24, [sp, #32]
    ldp     x25, x26, [sp, #48]
    ldp     x27, x28, [sp, #64]
    ldp     x29, x30, [sp, #80]
    add     sp, sp, #96
    ret
"#
);

#[cfg(target_arch = "x86_64")]
core::arch::global_asm!(
    r#"
    .balign 16
    .global argentum_context_switch
    .global _argentum_context_switch
argentum_context_switch:
_argentum_context_switch:
    push    rbp
    push    rbx
    push    r12
    push    r13
    push    r14
    push    r15
    mov     [rdi], rsp
    mov     rsp, rsi
    pop     r15
    pop     r14
    pop     r13
    pop     r12
    pop     rbx
    pop     rbp
    ret
"#
);

#[cfg(any(target_arch = "aarch64", target_arch = "x86_64"))]
extern "C" {
    #[link_name = "argentum_context_switch"]
    fn raw_context_switch(save_slot: *mut usize, to_sp: usize);
}

/// Switch from the current context into the one saved at `to_sp`, storing
/// the suspended context's stack pointer through `save_slot`.
///
/// # Safety
///
/// `to_sp` must point at a frame produced by this function or by
/// [`init_stack`], and the stack it lives on must stay alive until the
/// suspended side resumes.
#[inline]
pub(crate) unsafe fn context_switch(save_slot: *mut usize, to_sp: usize) {
    #[cfg(any(target_arch = "aarch64", target_arch = "x86_64"))]
    raw_context_switch(save_slot, to_sp);
    #[cfg(not(any(target_arch = "aarch64", target_arch = "x86_64")))]
    {
        let _ = (save_slot, to_sp);
        unimplemented!("no context switch for this architecture");
    }
}

/// Number of words in a saved register frame.
#[cfg(target_arch = "aarch64")]
const FRAME_WORDS: usize = 12;
#[cfg(target_arch = "aarch64")]
const RETURN_SLOT: usize = 11; // x30

#[cfg(target_arch = "x86_64")]
const FRAME_WORDS: usize = 8; // 6 registers + return address + alignment pad
#[cfg(target_arch = "x86_64")]
const RETURN_SLOT: usize = 6;

/// Build the initial frame for a fresh thread on its own stack and return
/// the stack pointer to resume it from. The first switch into the frame
/// "returns" into `entry` with zeroed callee-saved registers.
#[cfg(any(target_arch = "aarch64", target_arch = "x86_64"))]
pub(crate) fn init_stack(stack_top: usize, entry: extern "C" fn() -> !) -> usize {
    let top = stack_top & !15;
    let sp = top - FRAME_WORDS * core::mem::size_of::<usize>();
    let frame = sp as *mut usize;
    unsafe {
        for i in 0..FRAME_WORDS {
            frame.add(i).write(0);
        }
        frame.add(RETURN_SLOT).write(entry as usize);
    }
    sp
}

#[cfg(not(any(target_arch = "aarch64", target_arch = "x86_64")))]
pub(crate) fn init_stack(_stack_top: usize, _entry: extern "C" fn() -> !) -> usize {
    unimplemented!("no context switch for this architecture");
}
