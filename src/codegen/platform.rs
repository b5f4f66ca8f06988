//! x86-64 System V argument-register tables.
//!
//! Integer/pointer arguments are passed in this fixed order; each row
//! gives the sub-register name for a given operand width so a `mov`
//! into a `char`/`short`-sized parameter slot doesn't touch bits the
//! caller didn't set.

pub const ARG_REGS64: [&str; 6] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];
pub const ARG_REGS32: [&str; 6] = ["edi", "esi", "edx", "ecx", "r8d", "r9d"];
pub const ARG_REGS16: [&str; 6] = ["di", "si", "dx", "cx", "r8w", "r9w"];
pub const ARG_REGS8: [&str; 6] = ["dil", "sil", "dl", "cl", "r8b", "r9b"];

/// The `index`-th argument register, sized for a parameter of `size`
/// bytes (1/2/4/8).
pub fn arg_reg(size: usize, index: usize) -> &'static str {
    match size {
        1 => ARG_REGS8[index],
        2 => ARG_REGS16[index],
        4 => ARG_REGS32[index],
        _ => ARG_REGS64[index],
    }
}
