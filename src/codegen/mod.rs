//! x86-64 code generation.
//!
//! Two passes per translation unit: [`program::assign_stack_layout`]
//! assigns every local's `rbp`-relative offset, then [`program::generate`]
//! walks the object list in declaration order emitting `.data`/`.bss`
//! followed by `.text`. Everything below the entry point is organized
//! the way the expression/statement lowering naturally splits: this
//! file owns the expression codegen contract — after evaluating
//! any expression the result sits in `rax`/`eax` — `statements.rs` owns
//! statement dispatch, `control_flow.rs` owns the label-emitting
//! constructs (`if`/loops/`switch`), and `types.rs`/`platform.rs` own
//! the size-dependent instruction and register-name tables both of
//! those lean on.

mod control_flow;
mod error;
mod platform;
mod program;
mod state;
mod statements;
mod types;

pub use error::CodeGenError;
pub use program::generate;

use std::rc::Rc;

use crate::ast::{Node, NodeKind};
use crate::scope::ObjData;
use crate::types::Type;

use state::{CodeGen, emit};

/// Lower `node`, leaving its value in `rax` (or `eax`/`ax`/`al` for a
/// narrower type) per the expression codegen contract.
pub(super) fn gen_expr(cg: &mut CodeGen, node: &Node) -> Result<(), CodeGenError> {
    match &node.kind {
        NodeKind::Num(v) => emit!(cg, "mov rax, {v}"),
        NodeKind::Var(_) | NodeKind::Member { .. } => {
            gen_addr(cg, node)?;
            types::load(cg, node.ty.as_ref().unwrap())?;
        }
        NodeKind::Cast(inner) => {
            gen_expr(cg, inner)?;
            types::cast(cg, inner.ty.as_ref().unwrap(), node.ty.as_ref().unwrap())?;
        }
        NodeKind::Neg(inner) => {
            gen_expr(cg, inner)?;
            if inner.ty.as_ref().unwrap().size == 8 {
                emit!(cg, "neg rax");
            } else {
                emit!(cg, "neg eax");
            }
        }
        NodeKind::Not(inner) => {
            gen_expr(cg, inner)?;
            emit!(cg, "cmp rax, 0");
            emit!(cg, "sete al");
            emit!(cg, "movzx eax, al");
        }
        NodeKind::BitNot(inner) => {
            gen_expr(cg, inner)?;
            emit!(cg, "not rax");
        }
        NodeKind::Addr(inner) => gen_addr(cg, inner)?,
        NodeKind::Deref(inner) => {
            gen_expr(cg, inner)?;
            types::load(cg, node.ty.as_ref().unwrap())?;
        }
        NodeKind::Add(lhs, rhs) => gen_binary(cg, lhs, rhs, "add")?,
        NodeKind::Sub(lhs, rhs) => gen_binary(cg, lhs, rhs, "sub")?,
        NodeKind::Mul(lhs, rhs) => gen_binary(cg, lhs, rhs, "imul")?,
        NodeKind::Div(lhs, rhs) => gen_divmod(cg, lhs, rhs, false)?,
        NodeKind::Mod(lhs, rhs) => gen_divmod(cg, lhs, rhs, true)?,
        NodeKind::BitAnd(lhs, rhs) => gen_binary(cg, lhs, rhs, "and")?,
        NodeKind::BitOr(lhs, rhs) => gen_binary(cg, lhs, rhs, "or")?,
        NodeKind::BitXor(lhs, rhs) => gen_binary(cg, lhs, rhs, "xor")?,
        NodeKind::Shl(lhs, rhs) => gen_shift(cg, lhs, rhs, "shl")?,
        NodeKind::Shr(lhs, rhs) => gen_shift(cg, lhs, rhs, "sar")?,
        NodeKind::Eq(lhs, rhs) => gen_compare(cg, lhs, rhs, "sete")?,
        NodeKind::Ne(lhs, rhs) => gen_compare(cg, lhs, rhs, "setne")?,
        NodeKind::Lt(lhs, rhs) => gen_compare(cg, lhs, rhs, "setl")?,
        NodeKind::Le(lhs, rhs) => gen_compare(cg, lhs, rhs, "setle")?,
        NodeKind::LogAnd(lhs, rhs) => {
            let id = cg.next_id();
            gen_expr(cg, lhs)?;
            emit!(cg, "cmp rax, 0");
            emit!(cg, "je .L.false.{id}");
            gen_expr(cg, rhs)?;
            emit!(cg, "cmp rax, 0");
            emit!(cg, "je .L.false.{id}");
            emit!(cg, "mov rax, 1");
            emit!(cg, "jmp .L.end.{id}");
            cg.label(&format!(".L.false.{id}"))?;
            emit!(cg, "mov rax, 0");
            cg.label(&format!(".L.end.{id}"))?;
        }
        NodeKind::LogOr(lhs, rhs) => {
            let id = cg.next_id();
            gen_expr(cg, lhs)?;
            emit!(cg, "cmp rax, 0");
            emit!(cg, "jne .L.true.{id}");
            gen_expr(cg, rhs)?;
            emit!(cg, "cmp rax, 0");
            emit!(cg, "jne .L.true.{id}");
            emit!(cg, "mov rax, 0");
            emit!(cg, "jmp .L.end.{id}");
            cg.label(&format!(".L.true.{id}"))?;
            emit!(cg, "mov rax, 1");
            cg.label(&format!(".L.end.{id}"))?;
        }
        NodeKind::Assign(lhs, rhs) => {
            gen_addr(cg, lhs)?;
            cg.push()?;
            gen_expr(cg, rhs)?;
            types::store(cg, node.ty.as_ref().unwrap())?;
        }
        NodeKind::Comma(lhs, rhs) => {
            gen_expr(cg, lhs)?;
            gen_expr(cg, rhs)?;
        }
        NodeKind::Cond { cond, then, els } => {
            let id = cg.next_id();
            gen_expr(cg, cond)?;
            emit!(cg, "cmp rax, 0");
            emit!(cg, "je .L.else.{id}");
            gen_expr(cg, then)?;
            emit!(cg, "jmp .L.end.{id}");
            cg.label(&format!(".L.else.{id}"))?;
            gen_expr(cg, els)?;
            cg.label(&format!(".L.end.{id}"))?;
        }
        NodeKind::FunCall { .. } => gen_funcall(cg, node)?,
        NodeKind::StmtExpr(stmts) => {
            for s in stmts {
                statements::gen_stmt(cg, s)?;
            }
        }
        other => {
            return Err(CodeGenError::Logic(format!("{other:?} is not an expression")));
        }
    }
    Ok(())
}

/// Evaluate an lvalue's address into `rax`, without loading the value
/// it points at.
fn gen_addr(cg: &mut CodeGen, node: &Node) -> Result<(), CodeGenError> {
    match &node.kind {
        NodeKind::Var(id) => {
            let obj = &cg.objects()[*id];
            if obj.is_local {
                emit!(cg, "lea rax, [rbp{}]", obj.offset);
            } else {
                emit!(cg, "lea rax, [rip+{}]", obj.name);
            }
        }
        NodeKind::Deref(inner) => gen_expr(cg, inner)?,
        NodeKind::Member { base, offset, .. } => {
            gen_addr(cg, base)?;
            emit!(cg, "add rax, {offset}");
        }
        NodeKind::Comma(lhs, rhs) => {
            gen_expr(cg, lhs)?;
            gen_addr(cg, rhs)?;
        }
        other => return Err(CodeGenError::Logic(format!("{other:?} is not an lvalue"))),
    }
    Ok(())
}

/// Picks the 32- or 64-bit register family: pointers and 8-byte
/// integers need the full register, everything else fits in the
/// 32-bit name ("use 32-bit register names when both operands
/// fit and neither is a pointer/long" rule).
pub(super) fn wide(ty: &Rc<Type>) -> bool {
    ty.is_pointer_like() || ty.size == 8
}

fn gen_binary(cg: &mut CodeGen, lhs: &Node, rhs: &Node, op: &str) -> Result<(), CodeGenError> {
    gen_expr(cg, rhs)?;
    cg.push()?;
    gen_expr(cg, lhs)?;
    cg.pop("rdi")?;
    if wide(lhs.ty.as_ref().unwrap()) || wide(rhs.ty.as_ref().unwrap()) {
        emit!(cg, "{op} rax, rdi");
    } else {
        emit!(cg, "{op} eax, edi");
    }
    Ok(())
}

fn gen_divmod(cg: &mut CodeGen, lhs: &Node, rhs: &Node, want_mod: bool) -> Result<(), CodeGenError> {
    gen_expr(cg, rhs)?;
    cg.push()?;
    gen_expr(cg, lhs)?;
    cg.pop("rdi")?;
    if wide(lhs.ty.as_ref().unwrap()) || wide(rhs.ty.as_ref().unwrap()) {
        emit!(cg, "cqo");
        emit!(cg, "idiv rdi");
    } else {
        emit!(cg, "cdq");
        emit!(cg, "idiv edi");
    }
    if want_mod {
        emit!(cg, "mov rax, rdx");
    }
    Ok(())
}

fn gen_shift(cg: &mut CodeGen, lhs: &Node, rhs: &Node, op: &str) -> Result<(), CodeGenError> {
    gen_expr(cg, rhs)?;
    cg.push()?;
    gen_expr(cg, lhs)?;
    cg.pop("rcx")?;
    if wide(lhs.ty.as_ref().unwrap()) {
        emit!(cg, "{op} rax, cl");
    } else {
        emit!(cg, "{op} eax, cl");
    }
    Ok(())
}

fn gen_compare(cg: &mut CodeGen, lhs: &Node, rhs: &Node, setcc: &str) -> Result<(), CodeGenError> {
    gen_expr(cg, rhs)?;
    cg.push()?;
    gen_expr(cg, lhs)?;
    cg.pop("rdi")?;
    if wide(lhs.ty.as_ref().unwrap()) || wide(rhs.ty.as_ref().unwrap()) {
        emit!(cg, "cmp rax, rdi");
    } else {
        emit!(cg, "cmp eax, edi");
    }
    emit!(cg, "{setcc} al");
    emit!(cg, "movzx eax, al");
    Ok(())
}

/// Evaluate each argument into `rax` and push it, left to right, then
/// pop in reverse into the six argument registers, so nested calls
/// evaluate outer-to-inner without clobbering a still-needed argument
/// register.
fn gen_funcall(cg: &mut CodeGen, node: &Node) -> Result<(), CodeGenError> {
    let NodeKind::FunCall { name, args, return_ty } = &node.kind else { unreachable!() };
    for arg in args {
        gen_expr(cg, arg)?;
        cg.push()?;
    }
    // Every argument was pushed as a full 8-byte `push rax`, so it must
    // be popped back into the full 64-bit register name regardless of
    // its logical width — `pop edi`/`pop dil` is not a valid encoding.
    let n = args.len().min(6);
    for i in (0..n).rev() {
        cg.pop(platform::ARG_REGS64[i])?;
    }
    // Stack-alignment bookkeeping for the call site: rsp must be 16-byte
    // aligned when `call` executes, and every push above already moved
    // it by a multiple of 8.
    let odd_depth = cg.depth_is_odd();
    if odd_depth {
        emit!(cg, "sub rsp, 8");
    }
    emit!(cg, "mov rax, 0"); // vector-register count for a variadic callee; always 0 here
    emit!(cg, "call {name}");
    if odd_depth {
        emit!(cg, "add rsp, 8");
    }
    match return_ty.size {
        1 if !return_ty.is_void() => emit!(cg, "movsx eax, al"),
        2 if !return_ty.is_void() => emit!(cg, "movsx eax, ax"),
        _ => {}
    }
    Ok(())
}
