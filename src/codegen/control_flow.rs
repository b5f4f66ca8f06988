//! Label-emitting control-flow constructs: `if`, the three loop forms,
//! `switch`/`case`/`default`, `break`/`continue`/`goto`, and labeled
//! statements.
//!
//! Loop bodies need a label to jump back to on each iteration; that
//! label is generated fresh here from `CodeGen`'s monotonic counter
//! under the `.L.start.N` prefix, distinct from the `.L.begin`/`.L.end`
//! prefixes the parser already stamped onto `break_label`/
//! `continue_label` when it parsed the loop (so the two counters can
//! never collide on the same label text).

use crate::ast::{Node, NodeKind};

use super::error::CodeGenError;
use super::state::{CodeGen, emit};
use super::statements::gen_stmt;
use super::{gen_expr, wide};

pub(super) fn gen(cg: &mut CodeGen, node: &Node) -> Result<(), CodeGenError> {
    match &node.kind {
        NodeKind::If { cond, then, els } => {
            let id = cg.next_id();
            gen_expr(cg, cond)?;
            emit!(cg, "cmp rax, 0");
            emit!(cg, "je .L.else.{id}");
            gen_stmt(cg, then)?;
            emit!(cg, "jmp .L.end.{id}");
            cg.label(&format!(".L.else.{id}"))?;
            if let Some(els) = els {
                gen_stmt(cg, els)?;
            }
            cg.label(&format!(".L.end.{id}"))?;
        }

        NodeKind::For { init, cond, inc, body, break_label, continue_label } => {
            if let Some(init) = init {
                gen_stmt(cg, init)?;
            }
            let id = cg.next_id();
            cg.label(&format!(".L.start.{id}"))?;
            if let Some(cond) = cond {
                gen_expr(cg, cond)?;
                emit!(cg, "cmp rax, 0");
                emit!(cg, "je {break_label}");
            }
            gen_stmt(cg, body)?;
            cg.label(continue_label)?;
            if let Some(inc) = inc {
                gen_expr(cg, inc)?;
            }
            emit!(cg, "jmp .L.start.{id}");
            cg.label(break_label)?;
        }

        NodeKind::While { cond, body, break_label, continue_label } => {
            let id = cg.next_id();
            cg.label(&format!(".L.start.{id}"))?;
            gen_expr(cg, cond)?;
            emit!(cg, "cmp rax, 0");
            emit!(cg, "je {break_label}");
            gen_stmt(cg, body)?;
            cg.label(continue_label)?;
            emit!(cg, "jmp .L.start.{id}");
            cg.label(break_label)?;
        }

        NodeKind::DoWhile { body, cond, break_label, continue_label } => {
            let id = cg.next_id();
            cg.label(&format!(".L.start.{id}"))?;
            gen_stmt(cg, body)?;
            cg.label(continue_label)?;
            gen_expr(cg, cond)?;
            emit!(cg, "cmp rax, 0");
            emit!(cg, "jne .L.start.{id}");
            cg.label(break_label)?;
        }

        NodeKind::Switch { cond, body, cases, default_label, break_label } => {
            gen_expr(cg, cond)?;
            // A scrutinee narrower than 8 bytes loads into `eax`, which
            // architecturally zero-extends the upper 32 bits of `rax`
            // rather than sign-extending them (see `codegen/types.rs`'s
            // `load`). Comparing at `eax`'s own width keeps a negative
            // case value's sign-extended immediate encoding matching a
            // negative scrutinee instead of a zero-extended 64-bit one.
            let reg = if wide(cond.ty.as_ref().unwrap()) { "rax" } else { "eax" };
            for arm in cases {
                emit!(cg, "cmp {reg}, {}", arm.value);
                emit!(cg, "je {}", arm.label);
            }
            match default_label {
                Some(label) => emit!(cg, "jmp {label}"),
                None => emit!(cg, "jmp {break_label}"),
            }
            gen_stmt(cg, body)?;
            cg.label(break_label)?;
        }

        NodeKind::Case { label, body } | NodeKind::Default { label, body } => {
            cg.label(label)?;
            gen_stmt(cg, body)?;
        }

        NodeKind::Break { label } | NodeKind::Continue { label } | NodeKind::Goto { label } => {
            emit!(cg, "jmp {label}");
        }

        NodeKind::Labeled { unique_label, body } => {
            cg.label(unique_label)?;
            gen_stmt(cg, body)?;
        }

        other => return Err(CodeGenError::Logic(format!("{other:?} is not a control-flow statement"))),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::Obj;

    #[test]
    fn if_without_else_still_emits_else_and_end_labels() {
        let objects: Vec<Obj> = Vec::new();
        let mut cg = CodeGen::new(&objects);
        let node = Node::new(
            NodeKind::If {
                cond: Box::new(Node::new(NodeKind::Num(1), 1)),
                then: Box::new(Node::new(NodeKind::ExprStmt(Box::new(Node::new(NodeKind::Num(2), 1))), 1)),
                els: None,
            },
            1,
        );
        gen(&mut cg, &node).unwrap();
        let out = cg.into_output();
        assert!(out.contains(".L.else.1:"));
        assert!(out.contains(".L.end.1:"));
    }

    #[test]
    fn break_and_continue_jump_to_their_stashed_labels() {
        let objects: Vec<Obj> = Vec::new();
        let mut cg = CodeGen::new(&objects);
        let node = Node::new(NodeKind::Break { label: ".L.end.3".to_string() }, 1);
        gen(&mut cg, &node).unwrap();
        assert!(cg.into_output().contains("jmp .L.end.3"));
    }
}
