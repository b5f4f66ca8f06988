//! Symbol tables: objects (variables/functions) and lexical scoping.
//!
//! Objects live in one flat arena (`Vec<Obj>`) owned by the `Parser` (and
//! handed off to the `Program` once parsing finishes) and are referred to
//! everywhere else by `ObjId`, an index into that arena. This arena-with-
//! index-handles scheme lets a local's stack offset be filled in later,
//! during codegen's layout pass, without needing shared mutable ownership
//! (`Rc<RefCell<_>>`) threaded through the AST.

use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::Node;
use crate::types::Type;

pub type ObjId = usize;

/// A pointer-to-global fragment inside a data initializer: "place the
/// address of `label` (plus `addend`) at byte `offset` of this global".
#[derive(Debug, Clone, PartialEq)]
pub struct Relocation {
    pub offset: usize,
    pub label: String,
    pub addend: i64,
}

/// The save area a variadic function reserves for its register-passed
/// arguments, so `va_start`/`va_arg` can walk them uniformly with any
/// stack-passed arguments. This subset has no floating-point varargs,
/// so there is no XMM save area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariadicSaveArea {
    /// Negative rbp-relative offset of the first saved GP register.
    pub gp_save_offset: i64,
    /// How many of the six GP argument registers were already consumed
    /// by named parameters (the rest get saved here for varargs).
    pub gp_offset: i32,
}

#[derive(Debug)]
pub enum ObjData {
    Local,
    Global {
        init_data: Option<Vec<u8>>,
        relocations: Vec<Relocation>,
    },
    Function {
        params: Vec<ObjId>,
        locals: Vec<ObjId>,
        body: Option<Node>,
        stack_size: usize,
        is_definition: bool,
        variadic_save: Option<VariadicSaveArea>,
    },
}

#[derive(Debug)]
pub struct Obj {
    pub name: String,
    pub ty: Rc<Type>,
    /// For locals: the negative rbp-relative offset, assigned by
    /// codegen's layout pass (zero until then). Unused for globals and
    /// functions.
    pub offset: i64,
    pub is_local: bool,
    pub is_static: bool,
    pub data: ObjData,
}

impl Obj {
    pub fn is_function(&self) -> bool {
        matches!(self.data, ObjData::Function { .. })
    }
}

/// One `{ ... }` nesting level's bindings, across the three namespaces a
/// C-like scope needs: ordinary identifiers, tags (struct/union/enum),
/// and typedef names (which shadow keyword-introduced type names at the
/// same depth).
#[derive(Default)]
struct Frame {
    vars: HashMap<String, ObjId>,
    tags: HashMap<String, Rc<Type>>,
    typedefs: HashMap<String, Rc<Type>>,
    /// `enum` constants, a fourth namespace: folded to a plain `int` at
    /// every use site rather than backed by any storage.
    enums: HashMap<String, i64>,
}

/// A stack of frames, innermost last. The bottom frame is file scope and
/// is never popped.
pub struct Scope {
    frames: Vec<Frame>,
}

impl Default for Scope {
    fn default() -> Self {
        Scope { frames: vec![Frame::default()] }
    }
}

impl Scope {
    pub fn new() -> Self {
        Scope::default()
    }

    pub fn push(&mut self) {
        self.frames.push(Frame::default());
    }

    pub fn pop(&mut self) {
        debug_assert!(self.frames.len() > 1, "cannot pop file scope");
        self.frames.pop();
    }

    /// Current nesting depth, used by the `is_function` look-ahead to
    /// snapshot and restore scope state around a trial parse.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Truncate back to a previously recorded depth, discarding any
    /// frames pushed since. Used to undo a trial parse's scope pushes.
    pub fn truncate_to(&mut self, depth: usize) {
        self.frames.truncate(depth.max(1));
    }

    /// Declare `name` in the *current* (innermost) frame. Returns `false`
    /// if `name` is already bound in that same frame (redeclaration).
    pub fn declare_var(&mut self, name: &str, id: ObjId) -> bool {
        let frame = self.frames.last_mut().expect("file scope always present");
        if frame.vars.contains_key(name) {
            return false;
        }
        frame.vars.insert(name.to_string(), id);
        true
    }

    /// Like [`declare_var`](Self::declare_var), but at file scope
    /// specifically, used for globals and function declarations so a
    /// later body-local `{` doesn't shadow lookup at the wrong depth.
    pub fn declare_file_var(&mut self, name: &str, id: ObjId) -> bool {
        let frame = self.frames.first_mut().expect("file scope always present");
        if frame.vars.contains_key(name) {
            return false;
        }
        frame.vars.insert(name.to_string(), id);
        true
    }

    pub fn find_var(&self, name: &str) -> Option<ObjId> {
        self.frames.iter().rev().find_map(|f| f.vars.get(name).copied())
    }

    /// True when `name` is already bound in the current (innermost)
    /// frame specifically (used for the redeclaration check).
    pub fn bound_in_current_frame(&self, name: &str) -> bool {
        self.frames.last().expect("file scope always present").vars.contains_key(name)
    }

    pub fn declare_tag(&mut self, name: &str, ty: Rc<Type>) {
        self.frames.last_mut().expect("file scope always present").tags.insert(name.to_string(), ty);
    }

    pub fn find_tag(&self, name: &str) -> Option<Rc<Type>> {
        self.frames.iter().rev().find_map(|f| f.tags.get(name).cloned())
    }

    pub fn declare_typedef(&mut self, name: &str, ty: Rc<Type>) {
        self.frames
            .last_mut()
            .expect("file scope always present")
            .typedefs
            .insert(name.to_string(), ty);
    }

    pub fn find_typedef(&self, name: &str) -> Option<Rc<Type>> {
        self.frames.iter().rev().find_map(|f| f.typedefs.get(name).cloned())
    }

    pub fn declare_enum_const(&mut self, name: &str, value: i64) {
        self.frames.last_mut().expect("file scope always present").enums.insert(name.to_string(), value);
    }

    pub fn find_enum_const(&self, name: &str) -> Option<i64> {
        self.frames.iter().rev().find_map(|f| f.enums.get(name).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Type;

    #[test]
    fn inner_frame_shadows_outer() {
        let mut scope = Scope::new();
        assert!(scope.declare_var("x", 0));
        scope.push();
        assert!(scope.declare_var("x", 1));
        assert_eq!(scope.find_var("x"), Some(1));
        scope.pop();
        assert_eq!(scope.find_var("x"), Some(0));
    }

    #[test]
    fn redeclaration_in_same_frame_is_rejected() {
        let mut scope = Scope::new();
        assert!(scope.declare_var("x", 0));
        assert!(!scope.declare_var("x", 1));
    }

    #[test]
    fn truncate_to_undoes_pushes() {
        let mut scope = Scope::new();
        let depth = scope.depth();
        scope.push();
        scope.push();
        scope.declare_var("tmp", 0);
        scope.truncate_to(depth);
        assert_eq!(scope.depth(), depth);
        assert_eq!(scope.find_var("tmp"), None);
    }

    #[test]
    fn tags_and_vars_are_independent_namespaces() {
        let mut scope = Scope::new();
        scope.declare_var("Point", 0);
        scope.declare_tag("Point", Type::int());
        assert_eq!(scope.find_var("Point"), Some(0));
        assert!(scope.find_tag("Point").is_some());
    }
}
