//! Load/store/cast instruction selection, keyed by operand size.

use std::rc::Rc;

use crate::types::{Type, TypeKind};

use super::error::CodeGenError;
use super::state::{CodeGen, emit};

/// Issues the correctly-sized load from the address already in `rax`
/// into `rax`/`eax`: sizes 1 and 2 sign-extend into `eax` (`movsx`),
/// size 4 writes `eax` directly, which architecturally zero-extends
/// the upper 32 bits of `rax` rather than sign-extending them — callers
/// must keep 32-bit-sized operands in 32-bit instruction forms (see
/// `wide()` in `codegen/mod.rs`) rather than relying on `rax` holding a
/// sign-extended 64-bit view of a narrower value. Arrays/structs/unions
/// are never loaded by value — the address itself *is* their value —
/// so this is a no-op for them, matching the "member/variable" lowering
/// rule.
pub(super) fn load(cg: &mut CodeGen, ty: &Rc<Type>) -> Result<(), CodeGenError> {
    if ty.is_aggregate() {
        return Ok(());
    }
    match ty.size {
        1 => emit!(cg, "movsx eax, BYTE PTR [rax]"),
        2 => emit!(cg, "movsx eax, WORD PTR [rax]"),
        4 => emit!(cg, "mov eax, DWORD PTR [rax]"),
        _ => emit!(cg, "mov rax, [rax]"),
    }
    Ok(())
}

/// Stores `rax` into the address on top of the push stack. Scalars get
/// a size-appropriate `mov`; structs/unions — which `load` left as a
/// source address in `rax` rather than a value — are copied byte by
/// byte with `rep movsb`.
pub(super) fn store(cg: &mut CodeGen, ty: &Rc<Type>) -> Result<(), CodeGenError> {
    cg.pop("rdi")?;
    if ty.is_aggregate() {
        emit!(cg, "mov rsi, rax");
        emit!(cg, "mov rax, rdi");
        emit!(cg, "mov rcx, {}", ty.size);
        emit!(cg, "cld");
        emit!(cg, "rep movsb");
        return Ok(());
    }
    match ty.size {
        1 => emit!(cg, "mov [rdi], al"),
        2 => emit!(cg, "mov [rdi], ax"),
        4 => emit!(cg, "mov [rdi], eax"),
        _ => emit!(cg, "mov [rdi], rax"),
    }
    Ok(())
}

/// 0..3 rank for the four integer widths this subset covers (no
/// unsigned types, so `bool` ranks alongside `char` in the 1-byte row).
fn rank(ty: &Type) -> usize {
    match ty.kind {
        TypeKind::Bool | TypeKind::Char => 0,
        TypeKind::Short => 1,
        TypeKind::Int => 2,
        _ => 3, // Long, and any pointer-sized value reaching a cast
    }
}

/// Cast `rax` from `from`'s representation to `to`'s, via the smallest
/// instruction that changes representation: widening sign-extends,
/// narrowing re-sign-extends from the truncated width to clear
/// whatever garbage sits in the unused upper bits of `eax`/`rax`.
pub(super) fn cast(cg: &mut CodeGen, from: &Rc<Type>, to: &Rc<Type>) -> Result<(), CodeGenError> {
    if to.is_void() || from.kind == to.kind {
        return Ok(());
    }
    if matches!(to.kind, TypeKind::Bool) {
        emit!(cg, "cmp rax, 0");
        emit!(cg, "setne al");
        emit!(cg, "movzx eax, al");
        return Ok(());
    }
    let (from_rank, to_rank) = (rank(from), rank(to));
    match to_rank {
        0 if from_rank != 0 => emit!(cg, "movsx eax, al"),
        1 if from_rank >= 2 => emit!(cg, "movsx eax, ax"),
        3 if from_rank < 3 => emit!(cg, "movsxd rax, eax"),
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_orders_by_width() {
        assert!(rank(&Type::char_ty()) < rank(&Type::int()));
        assert!(rank(&Type::int()) < rank(&Type::long()));
    }
}
