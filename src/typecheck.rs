//! Type assignment.
//!
//! `add_type` walks an already-built AST in post-order and fills in the
//! `ty` field of every node that doesn't have one yet. The parser calls
//! this eagerly as it builds each node (through the `new_*` helpers in
//! [`crate::parser`]), so in practice every node is typed the moment
//! it's constructed; `add_type` itself only has to recurse into
//! children and is safe to call again on an already-typed subtree
//! (idempotent), which is what makes it reusable both inline during
//! parsing and as a standalone pass over a global initializer
//! expression.

use std::rc::Rc;

use crate::ast::{Node, NodeKind};
use crate::diagnostics::{CResult, CompileError};
use crate::scope::Obj;
use crate::types::Type;

/// Assign a type to `node` and every descendant that doesn't already
/// have one. `objects` resolves a [`crate::scope::ObjId`] to its
/// [`Obj`] for `Var` nodes.
pub fn add_type(node: &mut Node, objects: &[Obj]) -> CResult<()> {
    if node.ty.is_some() {
        return Ok(());
    }
    let line = node.line;
    match &mut node.kind {
        NodeKind::Num(v) => node.ty = Some(Type::for_literal(*v)),
        NodeKind::Var(id) => node.ty = Some(Rc::clone(&objects[*id].ty)),
        NodeKind::Cast(inner) => {
            add_type(inner, objects)?;
            // `ty` is set by the caller (`new_cast`) before this node is
            // ever handed to `add_type`; nothing to compute here.
        }
        NodeKind::Neg(inner) => {
            add_type(inner, objects)?;
            node.ty = Some(Rc::clone(inner.ty.as_ref().unwrap()));
        }
        NodeKind::Not(inner) | NodeKind::BitNot(inner) => {
            add_type(inner, objects)?;
            node.ty = Some(Type::int());
        }
        NodeKind::Addr(inner) => {
            add_type(inner, objects)?;
            if !inner.is_lvalue() {
                return Err(CompileError::at("cannot take address of non-lvalue", line, 0));
            }
            node.ty = Some(Type::pointer_to(Rc::clone(inner.ty.as_ref().unwrap())));
        }
        NodeKind::Deref(inner) => {
            add_type(inner, objects)?;
            let inner_ty = Rc::clone(inner.ty.as_ref().unwrap());
            match inner_ty.base() {
                Some(base) => node.ty = Some(Rc::clone(base)),
                None => {
                    return Err(CompileError::at("cannot dereference a non-pointer", line, 0));
                }
            }
        }
        NodeKind::Add(lhs, rhs)
        | NodeKind::Sub(lhs, rhs)
        | NodeKind::Mul(lhs, rhs)
        | NodeKind::Div(lhs, rhs)
        | NodeKind::Mod(lhs, rhs)
        | NodeKind::BitAnd(lhs, rhs)
        | NodeKind::BitOr(lhs, rhs)
        | NodeKind::BitXor(lhs, rhs) => {
            add_type(lhs, objects)?;
            add_type(rhs, objects)?;
            let lt = Rc::clone(lhs.ty.as_ref().unwrap());
            let rt = Rc::clone(rhs.ty.as_ref().unwrap());
            node.ty = Some(if lt.is_pointer_like() { lt } else { Type::usual_arith(&lt, &rt) });
        }
        NodeKind::Shl(lhs, _) | NodeKind::Shr(lhs, _) => {
            let (lhs, rhs) = match &mut node.kind {
                NodeKind::Shl(l, r) | NodeKind::Shr(l, r) => (l, r),
                _ => unreachable!(),
            };
            add_type(lhs, objects)?;
            add_type(rhs, objects)?;
            node.ty = Some(Rc::clone(lhs.ty.as_ref().unwrap()));
        }
        NodeKind::Eq(lhs, rhs)
        | NodeKind::Ne(lhs, rhs)
        | NodeKind::Lt(lhs, rhs)
        | NodeKind::Le(lhs, rhs)
        | NodeKind::LogAnd(lhs, rhs)
        | NodeKind::LogOr(lhs, rhs) => {
            add_type(lhs, objects)?;
            add_type(rhs, objects)?;
            node.ty = Some(Type::int());
        }
        NodeKind::Assign(lhs, rhs) => {
            add_type(lhs, objects)?;
            add_type(rhs, objects)?;
            if lhs.ty.as_ref().unwrap().is_aggregate()
                && matches!(lhs.ty.as_ref().unwrap().kind, crate::types::TypeKind::Array { .. })
            {
                return Err(CompileError::at("array is not an lvalue", line, 0));
            }
            node.ty = Some(Rc::clone(lhs.ty.as_ref().unwrap()));
        }
        NodeKind::Comma(lhs, rhs) => {
            add_type(lhs, objects)?;
            add_type(rhs, objects)?;
            node.ty = Some(Rc::clone(rhs.ty.as_ref().unwrap()));
        }
        NodeKind::Cond { cond, then, els } => {
            add_type(cond, objects)?;
            add_type(then, objects)?;
            add_type(els, objects)?;
            node.ty = Some(Rc::clone(then.ty.as_ref().unwrap()));
        }
        NodeKind::Member { base, ty, .. } => {
            add_type(base, objects)?;
            node.ty = Some(Rc::clone(ty));
        }
        NodeKind::FunCall { return_ty, args, .. } => {
            for arg in args.iter_mut() {
                add_type(arg, objects)?;
            }
            node.ty = Some(Rc::clone(return_ty));
        }
        NodeKind::StmtExpr(stmts) => {
            for s in stmts.iter_mut() {
                add_type(s, objects)?;
            }
            node.ty = Some(match stmts.last() {
                Some(Node { kind: NodeKind::ExprStmt(e), .. }) => Rc::clone(e.ty.as_ref().unwrap()),
                _ => Type::void(),
            });
        }
        NodeKind::ExprStmt(inner) => {
            add_type(inner, objects)?;
            node.ty = Some(Type::void());
        }
        NodeKind::Return(inner) => {
            if let Some(inner) = inner {
                add_type(inner, objects)?;
            }
            node.ty = Some(Type::void());
        }
        NodeKind::Block(stmts) => {
            for s in stmts.iter_mut() {
                add_type(s, objects)?;
            }
            node.ty = Some(Type::void());
        }
        NodeKind::If { cond, then, els } => {
            add_type(cond, objects)?;
            add_type(then, objects)?;
            if let Some(els) = els {
                add_type(els, objects)?;
            }
            node.ty = Some(Type::void());
        }
        NodeKind::For { init, cond, inc, body, .. } => {
            if let Some(init) = init {
                add_type(init, objects)?;
            }
            if let Some(cond) = cond {
                add_type(cond, objects)?;
            }
            if let Some(inc) = inc {
                add_type(inc, objects)?;
            }
            add_type(body, objects)?;
            node.ty = Some(Type::void());
        }
        NodeKind::While { cond, body, .. } | NodeKind::DoWhile { body, cond, .. } => {
            add_type(cond, objects)?;
            add_type(body, objects)?;
            node.ty = Some(Type::void());
        }
        NodeKind::Switch { cond, body, .. } => {
            add_type(cond, objects)?;
            add_type(body, objects)?;
            node.ty = Some(Type::void());
        }
        NodeKind::Case { body, .. } | NodeKind::Default { body, .. } | NodeKind::Labeled { body, .. } => {
            add_type(body, objects)?;
            node.ty = Some(Type::void());
        }
        NodeKind::Break { .. } | NodeKind::Continue { .. } | NodeKind::Goto { .. } => {
            node.ty = Some(Type::void());
        }
        NodeKind::Memzero { .. } => {
            node.ty = Some(Type::void());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_program;
    use crate::scope::ObjData;

    #[test]
    fn add_type_is_idempotent() {
        let src = "int main() { int a = 3; int b = 4; return a*a + b*b; }\n";
        let mut program = parse_program(src).unwrap();
        let main_id = program.objects.iter().position(|o| o.name == "main").unwrap();
        let mut body = {
            let ObjData::Function { body, .. } = &mut program.objects[main_id].data else {
                panic!("main has no body")
            };
            body.take().unwrap()
        };
        let before = format!("{body:?}");
        // Every node was typed while the parser built it; re-running
        // add_type must be a no-op rather than re-deriving (or
        // corrupting) any of those types.
        add_type(&mut body, &program.objects).unwrap();
        let after = format!("{body:?}");
        assert_eq!(before, after);
    }
}
