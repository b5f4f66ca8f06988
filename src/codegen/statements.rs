//! Statement dispatch.
//!
//! Every statement gets exactly one `.loc 1 <line>` directive; unlike
//! expressions, which carry none of their own. After a statement's own
//! lowering runs, the push/pop depth must be back to zero: a
//! statement can push scratch values for its own use, but it can never
//! leave one sitting on the stack for the next statement to trip over.

use crate::ast::{Node, NodeKind};

use super::control_flow;
use super::error::CodeGenError;
use super::gen_expr;
use super::state::{CodeGen, emit};

pub(super) fn gen_stmt(cg: &mut CodeGen, node: &Node) -> Result<(), CodeGenError> {
    cg.directive(format_args!(".loc 1 {}", node.line))?;
    match &node.kind {
        NodeKind::ExprStmt(inner) => gen_expr(cg, inner)?,
        NodeKind::Block(stmts) => {
            for s in stmts {
                gen_stmt(cg, s)?;
            }
        }
        NodeKind::Return(value) => {
            if let Some(value) = value {
                gen_expr(cg, value)?;
            }
            let label = cg.return_label().to_string();
            emit!(cg, "jmp {label}");
        }
        NodeKind::Memzero { id, size } => {
            let offset = cg.objects()[*id].offset;
            emit!(cg, "mov rcx, {size}");
            emit!(cg, "lea rdi, [rbp{offset}]");
            emit!(cg, "mov al, 0");
            emit!(cg, "cld");
            emit!(cg, "rep stosb");
        }
        NodeKind::If { .. }
        | NodeKind::For { .. }
        | NodeKind::While { .. }
        | NodeKind::DoWhile { .. }
        | NodeKind::Switch { .. }
        | NodeKind::Case { .. }
        | NodeKind::Default { .. }
        | NodeKind::Break { .. }
        | NodeKind::Continue { .. }
        | NodeKind::Goto { .. }
        | NodeKind::Labeled { .. } => control_flow::gen(cg, node)?,
        other => return Err(CodeGenError::Logic(format!("{other:?} is not a statement"))),
    }
    debug_assert_eq!(cg.depth, 0, "expression stack depth must be zero between statements");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::Obj;

    fn new_cg(objects: &[Obj]) -> CodeGen<'_> {
        CodeGen::new(objects)
    }

    #[test]
    fn expr_stmt_leaves_depth_zero() {
        let objects: Vec<Obj> = Vec::new();
        let mut cg = new_cg(&objects);
        let node = Node::new(NodeKind::ExprStmt(Box::new(Node::new(NodeKind::Num(1), 1))), 1);
        gen_stmt(&mut cg, &node).unwrap();
        assert_eq!(cg.depth, 0);
    }

    #[test]
    fn return_jumps_to_current_label() {
        let objects: Vec<Obj> = Vec::new();
        let mut cg = new_cg(&objects);
        cg.set_return_label(".L.return.main".to_string());
        let node = Node::new(NodeKind::Return(Some(Box::new(Node::new(NodeKind::Num(5), 1)))), 1);
        gen_stmt(&mut cg, &node).unwrap();
        assert!(cg.into_output().contains("jmp .L.return.main"));
    }
}
