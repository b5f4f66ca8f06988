//! Recursive-descent parser and inline semantic analyzer.
//!
//! Builds the AST, the global object table, and a full static type for
//! every expression in one pass: there is no separate "resolve" stage
//! between parsing and codegen (the pack's Seq compiler has one,
//! because Seq's stack-effect types need a dedicated unification pass
//! over quotations; this language's C-like declarator grammar gives
//! every expression its type the moment it's built, so that extra
//! stage would be pure overhead here).

use std::rc::Rc;

use crate::ast::{CaseArm, Node, NodeKind, Program};
use crate::diagnostics::{CResult, CompileError};
use crate::scope::{Obj, ObjData, ObjId, Relocation, Scope, VariadicSaveArea};
use crate::token::{Token, TokenKind, tokenize};
use crate::typecheck::add_type;
use crate::types::{Type, TypeKind};

/// One nested `break`/`continue` target: a loop contributes both
/// labels, a `switch` contributes only `break`.
enum JumpCtx {
    Loop { break_label: String, continue_label: String },
    Switch { break_label: String },
}

/// Case/default arms accumulated while parsing one `switch`'s body.
struct SwitchCtx {
    cases: Vec<CaseArm>,
    default_label: Option<String>,
}

pub struct Parser {
    toks: Vec<Token>,
    pos: usize,
    scope: Scope,
    objects: Vec<Obj>,
    /// Declaration order of every top-level object (function or global),
    /// preserved verbatim for codegen's source-order emission.
    order: Vec<ObjId>,
    /// Locals declared so far in the function currently being parsed, in
    /// declaration order (stack-offset assignment needs this order).
    locals: Vec<ObjId>,
    jump_stack: Vec<JumpCtx>,
    switch_stack: Vec<SwitchCtx>,
    /// Source label names declared (via `ident:`) in the function
    /// currently being parsed.
    declared_labels: Vec<String>,
    /// `(source label, line)` for every `goto` seen in the current
    /// function, checked against `declared_labels` at function close.
    goto_uses: Vec<(String, usize)>,
    label_id: usize,
    anon_id: usize,
    current_fn_name: String,
}

/// Either a concrete function definition/declaration or an ordinary
/// (possibly array/struct) global — the two things `declspec
/// declarator` can introduce at file scope.
struct Declarator {
    name: String,
    ty: Rc<Type>,
    /// Parameter names, present only when `ty` is a function type built
    /// from a parenthesized parameter list.
    param_names: Vec<String>,
}

pub fn parse_program(source: &str) -> CResult<Program> {
    let toks = tokenize(source)?;
    let mut p = Parser {
        toks,
        pos: 0,
        scope: Scope::new(),
        objects: Vec::new(),
        order: Vec::new(),
        locals: Vec::new(),
        jump_stack: Vec::new(),
        switch_stack: Vec::new(),
        declared_labels: Vec::new(),
        goto_uses: Vec::new(),
        label_id: 0,
        anon_id: 0,
        current_fn_name: String::new(),
    };
    p.parse()?;
    Ok(Program { objects: p.objects, order: p.order })
}

impl Parser {
    // ---- token cursor ----

    fn cur(&self) -> &Token {
        &self.toks[self.pos]
    }

    fn line(&self) -> usize {
        self.cur().line
    }

    fn is(&self, text: &str) -> bool {
        self.cur().is(text)
    }

    fn at_eof(&self) -> bool {
        self.cur().is_eof()
    }

    fn advance(&mut self) -> Token {
        let t = self.toks[self.pos].clone();
        if self.pos + 1 < self.toks.len() {
            self.pos += 1;
        }
        t
    }

    fn consume(&mut self, text: &str) -> bool {
        if self.is(text) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, text: &str) -> CResult<()> {
        if !self.consume(text) {
            return Err(self.err(format!("expected '{text}'")));
        }
        Ok(())
    }

    fn expect_ident(&mut self) -> CResult<String> {
        if !self.cur().is_ident() {
            return Err(self.err("expected an identifier"));
        }
        Ok(self.advance().text)
    }

    fn err(&self, message: impl Into<String>) -> CompileError {
        CompileError::at(message, self.cur().line, self.cur().column)
    }

    fn err_at(&self, line: usize, message: impl Into<String>) -> CompileError {
        CompileError::at(message, line, 0)
    }

    // ---- label/name generation ----

    fn next_id(&mut self) -> usize {
        self.label_id += 1;
        self.label_id
    }

    fn next_label(&mut self, prefix: &str) -> String {
        let id = self.next_id();
        format!(".L.{prefix}.{id}")
    }

    fn mangled_label(&self, source_label: &str) -> String {
        format!(".L.label.{}.{}", self.current_fn_name, source_label)
    }

    fn next_anon_name(&mut self) -> String {
        self.anon_id += 1;
        format!(".L..{}", self.anon_id)
    }

    // ---- object arena ----

    fn new_obj(&mut self, name: String, ty: Rc<Type>, is_local: bool, data: ObjData) -> ObjId {
        self.objects.push(Obj { name, ty, offset: 0, is_local, is_static: false, data });
        self.objects.len() - 1
    }

    // ---- top level ----

    fn parse(&mut self) -> CResult<()> {
        while !self.at_eof() {
            self.parse_external_decl()?;
        }
        Ok(())
    }

    fn parse_external_decl(&mut self) -> CResult<()> {
        if self.consume("typedef") {
            let base = self.declspec()?;
            loop {
                let d = self.declarator(Rc::clone(&base))?;
                self.scope.declare_typedef(&d.name, d.ty);
                if !self.consume(",") {
                    break;
                }
            }
            self.expect(";")?;
            return Ok(());
        }

        let is_static = self.consume("static");
        let _is_extern = self.consume("extern");
        let base = self.declspec()?;
        if self.consume(";") {
            // A bare `struct Foo;` tag-only declaration; nothing further to bind.
            return Ok(());
        }
        let d = self.declarator(Rc::clone(&base))?;

        if self.is("{") {
            self.parse_function(d, is_static)?;
            return Ok(());
        }

        self.parse_global(d, is_static)?;
        while self.consume(",") {
            let d = self.declarator(Rc::clone(&base))?;
            self.parse_global(d, is_static)?;
        }
        self.expect(";")?;
        Ok(())
    }

    fn parse_global(&mut self, d: Declarator, is_static: bool) -> CResult<()> {
        if matches!(d.ty.kind, TypeKind::Function { .. }) {
            // Function prototype: record it so calls can resolve a
            // return type, but there is no body to generate.
            let id = self.new_obj(
                d.name.clone(),
                Rc::clone(&d.ty),
                false,
                ObjData::Function {
                    params: Vec::new(),
                    locals: Vec::new(),
                    body: None,
                    stack_size: 0,
                    is_definition: false,
                    variadic_save: None,
                },
            );
            self.objects[id].is_static = is_static;
            self.scope.declare_file_var(&d.name, id);
            self.order.push(id);
            return Ok(());
        }

        let id = self.new_obj(
            d.name.clone(),
            Rc::clone(&d.ty),
            false,
            ObjData::Global { init_data: None, relocations: Vec::new() },
        );
        self.objects[id].is_static = is_static;
        if !self.scope.declare_file_var(&d.name, id) {
            return Err(self.err(format!("redefinition of '{}'", d.name)));
        }
        self.order.push(id);

        if self.consume("=") {
            self.global_initializer(id)?;
        }
        Ok(())
    }

    fn parse_function(&mut self, d: Declarator, is_static: bool) -> CResult<()> {
        let TypeKind::Function { params, is_variadic, .. } = &d.ty.kind else {
            return Err(self.err("function body on a non-function declarator"));
        };
        let param_tys: Vec<Rc<Type>> = params.clone();
        let is_variadic = *is_variadic;

        let id = self.new_obj(
            d.name.clone(),
            Rc::clone(&d.ty),
            false,
            ObjData::Function {
                params: Vec::new(),
                locals: Vec::new(),
                body: None,
                stack_size: 0,
                is_definition: true,
                variadic_save: None,
            },
        );
        self.objects[id].is_static = is_static;
        // Function names live in file scope even while the body below
        // pushes nested block scopes, so recursive calls resolve.
        self.scope.declare_file_var(&d.name, id);
        self.order.push(id);

        self.locals.clear();
        self.declared_labels.clear();
        self.goto_uses.clear();
        self.current_fn_name = d.name.clone();
        self.scope.push();

        let mut param_ids = Vec::new();
        for (name, ty) in d.param_names.iter().zip(param_tys.iter()) {
            let pid = self.new_obj(name.clone(), Rc::clone(ty), true, ObjData::Local);
            self.scope.declare_var(name, pid);
            self.locals.push(pid);
            param_ids.push(pid);
        }

        let gp_used = param_ids.len().min(6);
        let variadic_save =
            is_variadic.then(|| VariadicSaveArea { gp_save_offset: 0, gp_offset: gp_used as i32 });

        let body = self.compound_stmt()?;
        self.scope.pop();

        for (label, line) in &self.goto_uses {
            if !self.declared_labels.contains(label) {
                return Err(self.err_at(*line, format!("use of undeclared label '{label}'")));
            }
        }

        let mut body = body;
        add_type(&mut body, &self.objects)?;

        let ObjData::Function { params, locals, body: body_slot, variadic_save: vs_slot, .. } =
            &mut self.objects[id].data
        else {
            unreachable!("just constructed as Function")
        };
        *params = param_ids;
        *locals = std::mem::take(&mut self.locals);
        *body_slot = Some(body);
        *vs_slot = variadic_save;
        Ok(())
    }

    // ---- declspec / declarator ----

    /// Parses the base type of a declaration: a primitive keyword,
    /// `struct`/`union`/`enum` (with optional inline body), or a
    /// previously `typedef`'d name. Storage-class keywords
    /// (`static`/`extern`) are consumed by the caller, not here.
    fn declspec(&mut self) -> CResult<Rc<Type>> {
        if self.consume("void") {
            return Ok(Type::void());
        }
        if self.consume("bool") {
            return Ok(Type::bool_ty());
        }
        if self.consume("char") {
            return Ok(Type::char_ty());
        }
        if self.consume("short") {
            return Ok(Type::short());
        }
        if self.consume("int") {
            return Ok(Type::int());
        }
        if self.consume("long") {
            self.consume("long"); // `long long` is accepted as a synonym for `long`.
            return Ok(Type::long());
        }
        if self.consume("struct") {
            return self.struct_union_decl(false);
        }
        if self.consume("union") {
            return self.struct_union_decl(true);
        }
        if self.consume("enum") {
            return self.enum_decl();
        }
        if self.cur().is_ident() {
            if let Some(ty) = self.scope.find_typedef(&self.cur().text) {
                self.advance();
                return Ok(ty);
            }
        }
        Err(self.err("expected a type"))
    }

    fn struct_union_decl(&mut self, is_union: bool) -> CResult<Rc<Type>> {
        let tag = if self.cur().is_ident() { Some(self.advance().text) } else { None };
        if !self.is("{") {
            // A bare reference to a previously declared tag.
            let tag = tag.ok_or_else(|| self.err("expected a struct/union tag or body"))?;
            return self
                .scope
                .find_tag(&tag)
                .ok_or_else(|| self.err(format!("unknown struct/union tag '{tag}'")));
        }
        self.advance();
        let mut fields = Vec::new();
        while !self.consume("}") {
            let base = self.declspec()?;
            loop {
                let d = self.declarator(Rc::clone(&base))?;
                fields.push((d.name, d.ty));
                if !self.consume(",") {
                    break;
                }
            }
            self.expect(";")?;
        }
        let ty = if is_union { Type::union_of(fields) } else { Type::struct_of(fields) };
        if let Some(tag) = tag {
            self.scope.declare_tag(&tag, Rc::clone(&ty));
        }
        Ok(ty)
    }

    /// Enum constants are bound into the variable namespace as
    /// compile-time `int` values (folded at every use, never loaded from
    /// storage); the type itself is represented as plain `int` — this
    /// rewrite does not carry a distinct `TypeKind::Enum` (see DESIGN.md).
    fn enum_decl(&mut self) -> CResult<Rc<Type>> {
        let tag = if self.cur().is_ident() { Some(self.advance().text) } else { None };
        if !self.consume("{") {
            let tag = tag.ok_or_else(|| self.err("expected an enum tag or body"))?;
            return self.scope.find_tag(&tag).ok_or_else(|| self.err(format!("unknown enum tag '{tag}'")));
        }
        let mut next_value = 0i64;
        while !self.is("}") {
            let name = self.expect_ident()?;
            if self.consume("=") {
                next_value = self.const_expr()?;
            }
            self.scope.declare_enum_const(&name, next_value);
            next_value += 1;
            if !self.consume(",") {
                break;
            }
        }
        self.expect("}")?;
        let ty = Type::int();
        if let Some(tag) = tag {
            self.scope.declare_tag(&tag, Rc::clone(&ty));
        }
        Ok(ty)
    }

    /// `*` prefixes, then a name (or nothing, for abstract declarators
    /// used only by `sizeof`/casts), then array/function suffixes.
    fn declarator(&mut self, base: Rc<Type>) -> CResult<Declarator> {
        let mut ty = base;
        while self.consume("*") {
            ty = Type::pointer_to(ty);
        }
        let name = if self.cur().is_ident() { self.advance().text } else { String::new() };
        self.type_suffix(ty, name)
    }

    fn type_suffix(&mut self, base: Rc<Type>, name: String) -> CResult<Declarator> {
        if self.consume("(") {
            let mut param_names = Vec::new();
            let mut param_tys = Vec::new();
            let mut is_variadic = false;
            if !self.is(")") {
                loop {
                    if self.consume("...") {
                        is_variadic = true;
                        break;
                    }
                    let pbase = self.declspec()?;
                    let pd = self.declarator(pbase)?;
                    if param_tys.is_empty() && pd.name.is_empty() && pd.ty.is_void() && self.is(")") {
                        break; // `(void)` means zero parameters, not one void parameter.
                    }
                    // An array parameter decays to a pointer (C's
                    // "adjustment" of parameter types), applied here so
                    // codegen never has to special-case a by-value array
                    // parameter.
                    param_tys.push(pd.ty.decay());
                    param_names.push(pd.name);
                    if !self.consume(",") {
                        break;
                    }
                }
            }
            self.expect(")")?;
            let fn_ty = Type::function(base, param_tys, is_variadic);
            return Ok(Declarator { name, ty: fn_ty, param_names });
        }
        if self.consume("[") {
            if self.consume("]") {
                let ty = Type::flexible_array_of(base);
                return Ok(Declarator { name, ty, param_names: Vec::new() });
            }
            let len = self.const_expr()?;
            self.expect("]")?;
            let rest = self.type_suffix(base, String::new())?;
            let ty = Type::array_of(rest.ty, len as usize);
            return Ok(Declarator { name, ty, param_names: Vec::new() });
        }
        Ok(Declarator { name, ty: base, param_names: Vec::new() })
    }

    // ---- constant expressions ----

    fn const_expr(&mut self) -> CResult<i64> {
        let line = self.line();
        let node = self.conditional()?;
        eval_const(&node).map_err(|_| self.err_at(line, "not a constant expression"))
    }

    // ---- global initializers ----

    fn global_initializer(&mut self, id: ObjId) -> CResult<()> {
        let ty = Rc::clone(&self.objects[id].ty);
        let mut data = vec![0u8; ty.size];
        let mut relocs = Vec::new();
        self.global_init_into(&ty, &mut data, 0, &mut relocs)?;
        let ObjData::Global { init_data, relocations } = &mut self.objects[id].data else {
            unreachable!()
        };
        *init_data = Some(data);
        *relocations = relocs;
        Ok(())
    }

    fn global_init_into(
        &mut self,
        ty: &Rc<Type>,
        data: &mut [u8],
        offset: usize,
        relocs: &mut Vec<Relocation>,
    ) -> CResult<()> {
        if self.is("{") {
            self.advance();
            match &ty.kind {
                TypeKind::Array { base, .. } => {
                    let base = Rc::clone(base);
                    let mut i = 0usize;
                    while !self.is("}") {
                        self.global_init_into(&base, data, offset + i * base.size, relocs)?;
                        i += 1;
                        if !self.consume(",") {
                            break;
                        }
                    }
                    self.expect("}")?;
                }
                TypeKind::Struct { members } | TypeKind::Union { members } => {
                    let members = members.clone();
                    let mut i = 0usize;
                    while !self.is("}") && i < members.len() {
                        let m = &members[i];
                        self.global_init_into(&m.ty, data, offset + m.offset, relocs)?;
                        i += 1;
                        if !self.consume(",") {
                            break;
                        }
                    }
                    self.expect("}")?;
                }
                _ => return Err(self.err("braced initializer for a scalar type")),
            }
            return Ok(());
        }
        // String literal initializing a char array: copy the decoded
        // bytes directly rather than building a constant expression.
        if let TokenKind::Str(bytes) = &self.cur().kind {
            if matches!(ty.kind, TypeKind::Array { .. }) {
                let bytes = bytes.clone();
                self.advance();
                let n = bytes.len().min(data[offset..].len());
                data[offset..offset + n].copy_from_slice(&bytes[..n]);
                return Ok(());
            }
        }
        let line = self.line();
        let node = self.conditional()?;
        let (label, addend) =
            eval_const_reloc(&node).map_err(|_| self.err_at(line, "initializer is not constant"))?;
        match label {
            Some(label) => relocs.push(Relocation { offset, label, addend }),
            None => {
                let bytes = addend.to_le_bytes();
                let n = ty.size.min(8);
                data[offset..offset + n].copy_from_slice(&bytes[..n]);
            }
        }
        Ok(())
    }

    // ---- statements ----

    fn compound_stmt(&mut self) -> CResult<Node> {
        let line = self.line();
        self.expect("{")?;
        self.scope.push();
        let mut stmts = Vec::new();
        while !self.consume("}") {
            if self.at_type_start() {
                stmts.extend(self.declaration()?);
            } else {
                stmts.push(self.stmt()?);
            }
        }
        self.scope.pop();
        Ok(Node::new(NodeKind::Block(stmts), line))
    }

    fn at_type_start(&self) -> bool {
        const KEYWORDS: &[&str] = &[
            "void", "bool", "char", "short", "int", "long", "struct", "union", "enum", "typedef",
            "static", "extern",
        ];
        if matches!(self.cur().kind, TokenKind::Keyword) && KEYWORDS.contains(&self.cur().text.as_str()) {
            return true;
        }
        self.cur().is_ident() && self.scope.find_typedef(&self.cur().text).is_some()
    }

    fn declaration(&mut self) -> CResult<Vec<Node>> {
        if self.consume("typedef") {
            let base = self.declspec()?;
            loop {
                let d = self.declarator(Rc::clone(&base))?;
                self.scope.declare_typedef(&d.name, d.ty);
                if !self.consume(",") {
                    break;
                }
            }
            self.expect(";")?;
            return Ok(Vec::new());
        }
        let is_static = self.consume("static");
        let base = self.declspec()?;
        if self.consume(";") {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        loop {
            let line = self.line();
            let d = self.declarator(Rc::clone(&base))?;
            if self.scope.bound_in_current_frame(&d.name) {
                return Err(self.err_at(line, format!("redefinition of '{}'", d.name)));
            }
            let id = if is_static {
                let unique = format!("{}.{}.{}", self.current_fn_name, d.name, self.next_id());
                let gid = self.new_obj(
                    unique,
                    Rc::clone(&d.ty),
                    false,
                    ObjData::Global { init_data: None, relocations: Vec::new() },
                );
                self.objects[gid].is_static = true;
                self.order.push(gid);
                gid
            } else {
                let lid = self.new_obj(d.name.clone(), Rc::clone(&d.ty), true, ObjData::Local);
                self.locals.push(lid);
                lid
            };
            self.scope.declare_var(&d.name, id);

            if self.consume("=") {
                if is_static {
                    self.global_initializer(id)?;
                } else {
                    if d.ty.is_aggregate() {
                        out.push(Node::new(NodeKind::Memzero { id, size: d.ty.size }, line));
                    }
                    out.extend(self.local_initializer(id, &d.ty, line)?);
                }
            }
            if !self.consume(",") {
                break;
            }
        }
        self.expect(";")?;
        Ok(out)
    }

    /// Desugars a local initializer into an explicit sequence of
    /// assignment statements over the already-allocated storage, scalars
    /// included, so the caller only ever deals with one kind of result.
    fn local_initializer(&mut self, id: ObjId, ty: &Rc<Type>, line: usize) -> CResult<Vec<Node>> {
        let mut stmts = Vec::new();
        self.local_init_rec(id, ty, &mut Vec::new(), &mut stmts, line)?;
        Ok(stmts)
    }

    fn local_init_rec(
        &mut self,
        id: ObjId,
        ty: &Rc<Type>,
        path: &mut Vec<(Rc<Type>, usize)>,
        stmts: &mut Vec<Node>,
        line: usize,
    ) -> CResult<()> {
        if self.is("{") {
            self.advance();
            match &ty.kind {
                TypeKind::Array { base, .. } => {
                    let base = Rc::clone(base);
                    let mut i = 0usize;
                    while !self.is("}") {
                        path.push((Rc::clone(&base), i * base.size));
                        self.local_init_rec(id, &base, path, stmts, line)?;
                        path.pop();
                        i += 1;
                        if !self.consume(",") {
                            break;
                        }
                    }
                }
                TypeKind::Struct { members } => {
                    let members = members.clone();
                    for m in members.iter() {
                        if self.is("}") {
                            break;
                        }
                        path.push((Rc::clone(&m.ty), m.offset));
                        self.local_init_rec(id, &m.ty, path, stmts, line)?;
                        path.pop();
                        if !self.consume(",") {
                            break;
                        }
                    }
                }
                _ => return Err(self.err("braced initializer for a scalar type")),
            }
            self.expect("}")?;
            return Ok(());
        }
        if let TokenKind::Str(bytes) = &self.cur().kind {
            if matches!(&ty.kind, TypeKind::Array { base, .. } if base.kind == TypeKind::Char) {
                let bytes = bytes.clone();
                self.advance();
                for (i, b) in bytes.iter().enumerate() {
                    path.push((Type::char_ty(), i));
                    stmts.push(self.assign_path_const(id, path, *b as i64, line));
                    path.pop();
                }
                return Ok(());
            }
        }
        let rhs = self.assign()?;
        stmts.push(self.assign_path(id, path, rhs, line));
        Ok(())
    }

    /// Builds the lvalue for a (possibly nested) initializer designator:
    /// the plain variable when `path` is empty, otherwise the variable's
    /// address reinterpreted as a pointer to the designated element —
    /// equivalent to chasing the chain of member/index accesses `path`
    /// describes, since every designator here is a compile-time-constant
    /// offset.
    fn lvalue_for_path(&self, id: ObjId, path: &[(Rc<Type>, usize)], line: usize) -> Node {
        let mut var = Node::new(NodeKind::Var(id), line);
        var.ty = Some(Rc::clone(&self.objects[id].ty));
        if path.is_empty() {
            return var;
        }
        let total_offset: usize = path.iter().map(|(_, off)| off).sum();
        let elem_ty = Rc::clone(&path.last().unwrap().0);

        let addr_ty = Type::pointer_to(Rc::clone(&self.objects[id].ty));
        let mut addr = Node::new(NodeKind::Addr(Box::new(var)), line);
        addr.ty = Some(addr_ty);

        let byte_ptr_ty = Type::pointer_to(Type::char_ty());
        let mut as_bytes = Node::new(NodeKind::Cast(Box::new(addr)), line);
        as_bytes.ty = Some(Rc::clone(&byte_ptr_ty));

        let mut offset_lit = Node::new(NodeKind::Num(total_offset as i64), line);
        offset_lit.ty = Some(Type::long());
        let mut shifted = Node::new(NodeKind::Add(Box::new(as_bytes), Box::new(offset_lit)), line);
        shifted.ty = Some(byte_ptr_ty);

        let target_ptr_ty = Type::pointer_to(elem_ty);
        let mut cast_back = Node::new(NodeKind::Cast(Box::new(shifted)), line);
        cast_back.ty = Some(Rc::clone(&target_ptr_ty));

        let mut deref = Node::new(NodeKind::Deref(Box::new(cast_back)), line);
        deref.ty = Some(Rc::clone(target_ptr_ty.base().unwrap()));
        deref
    }

    fn assign_path(&mut self, id: ObjId, path: &[(Rc<Type>, usize)], rhs: Node, line: usize) -> Node {
        let lhs = self.lvalue_for_path(id, path, line);
        let assign = new_assign(lhs, rhs, line);
        Node::new(NodeKind::ExprStmt(Box::new(assign)), line)
    }

    fn assign_path_const(&mut self, id: ObjId, path: &[(Rc<Type>, usize)], value: i64, line: usize) -> Node {
        let mut num = Node::new(NodeKind::Num(value), line);
        num.ty = Some(Type::long());
        self.assign_path(id, path, num, line)
    }

    fn stmt(&mut self) -> CResult<Node> {
        let line = self.line();
        if self.consume("return") {
            if self.consume(";") {
                return Ok(Node::new(NodeKind::Return(None), line));
            }
            let e = self.expr()?;
            self.expect(";")?;
            return Ok(Node::new(NodeKind::Return(Some(Box::new(e))), line));
        }
        if self.consume("if") {
            self.expect("(")?;
            let cond = self.expr()?;
            self.expect(")")?;
            let then = self.stmt()?;
            let els = if self.consume("else") { Some(Box::new(self.stmt()?)) } else { None };
            return Ok(Node::new(
                NodeKind::If { cond: Box::new(cond), then: Box::new(then), els },
                line,
            ));
        }
        if self.consume("for") {
            self.expect("(")?;
            self.scope.push();
            let break_label = self.next_label("end");
            let continue_label = self.next_label("begin");
            let init = if self.is(";") {
                None
            } else if self.at_type_start() {
                let stmts = self.declaration()?;
                Some(Box::new(Node::new(NodeKind::Block(stmts), line)))
            } else {
                Some(Box::new(self.expr_stmt()?))
            };
            if init.is_none() {
                self.expect(";")?;
            }
            let cond = if self.is(";") { None } else { Some(Box::new(self.expr()?)) };
            self.expect(";")?;
            let inc = if self.is(")") { None } else { Some(Box::new(self.expr()?)) };
            self.expect(")")?;
            self.jump_stack.push(JumpCtx::Loop {
                break_label: break_label.clone(),
                continue_label: continue_label.clone(),
            });
            let body = self.stmt()?;
            self.jump_stack.pop();
            self.scope.pop();
            return Ok(Node::new(
                NodeKind::For { init, cond, inc, body: Box::new(body), break_label, continue_label },
                line,
            ));
        }
        if self.consume("while") {
            self.expect("(")?;
            let cond = self.expr()?;
            self.expect(")")?;
            let break_label = self.next_label("end");
            let continue_label = self.next_label("begin");
            self.jump_stack.push(JumpCtx::Loop {
                break_label: break_label.clone(),
                continue_label: continue_label.clone(),
            });
            let body = self.stmt()?;
            self.jump_stack.pop();
            return Ok(Node::new(
                NodeKind::While { cond: Box::new(cond), body: Box::new(body), break_label, continue_label },
                line,
            ));
        }
        if self.consume("do") {
            let break_label = self.next_label("end");
            let continue_label = self.next_label("begin");
            self.jump_stack.push(JumpCtx::Loop {
                break_label: break_label.clone(),
                continue_label: continue_label.clone(),
            });
            let body = self.stmt()?;
            self.jump_stack.pop();
            self.expect("while")?;
            self.expect("(")?;
            let cond = self.expr()?;
            self.expect(")")?;
            self.expect(";")?;
            return Ok(Node::new(
                NodeKind::DoWhile { body: Box::new(body), cond: Box::new(cond), break_label, continue_label },
                line,
            ));
        }
        if self.consume("switch") {
            self.expect("(")?;
            let cond = self.expr()?;
            self.expect(")")?;
            let break_label = self.next_label("end");
            self.jump_stack.push(JumpCtx::Switch { break_label: break_label.clone() });
            self.switch_stack.push(SwitchCtx { cases: Vec::new(), default_label: None });
            let body = self.stmt()?;
            self.jump_stack.pop();
            let ctx = self.switch_stack.pop().unwrap();
            return Ok(Node::new(
                NodeKind::Switch {
                    cond: Box::new(cond),
                    body: Box::new(body),
                    cases: ctx.cases,
                    default_label: ctx.default_label,
                    break_label,
                },
                line,
            ));
        }
        if self.consume("case") {
            let value = self.const_expr()?;
            self.expect(":")?;
            let label = self.next_label("case");
            {
                let ctx = self
                    .switch_stack
                    .last_mut()
                    .ok_or_else(|| self.err_at(line, "'case' outside a switch statement"))?;
                ctx.cases.push(CaseArm { value, label: label.clone() });
            }
            let body = self.stmt()?;
            return Ok(Node::new(NodeKind::Case { label, body: Box::new(body) }, line));
        }
        if self.consume("default") {
            self.expect(":")?;
            let label = self.next_label("default");
            {
                let ctx = self
                    .switch_stack
                    .last_mut()
                    .ok_or_else(|| self.err_at(line, "'default' outside a switch statement"))?;
                if ctx.default_label.is_some() {
                    return Err(self.err_at(line, "multiple 'default' labels in one switch"));
                }
                ctx.default_label = Some(label.clone());
            }
            let body = self.stmt()?;
            return Ok(Node::new(NodeKind::Default { label, body: Box::new(body) }, line));
        }
        if self.consume("break") {
            self.expect(";")?;
            let label = self
                .jump_stack
                .iter()
                .rev()
                .find_map(|c| match c {
                    JumpCtx::Loop { break_label, .. } => Some(break_label.clone()),
                    JumpCtx::Switch { break_label } => Some(break_label.clone()),
                })
                .ok_or_else(|| self.err_at(line, "'break' outside a loop or switch"))?;
            return Ok(Node::new(NodeKind::Break { label }, line));
        }
        if self.consume("continue") {
            self.expect(";")?;
            let label = self
                .jump_stack
                .iter()
                .rev()
                .find_map(|c| match c {
                    JumpCtx::Loop { continue_label, .. } => Some(continue_label.clone()),
                    JumpCtx::Switch { .. } => None,
                })
                .ok_or_else(|| self.err_at(line, "'continue' outside a loop"))?;
            return Ok(Node::new(NodeKind::Continue { label }, line));
        }
        if self.consume("goto") {
            let name = self.expect_ident()?;
            self.expect(";")?;
            self.goto_uses.push((name.clone(), line));
            return Ok(Node::new(NodeKind::Goto { label: self.mangled_label(&name) }, line));
        }
        if self.cur().is_ident() && self.toks[self.pos + 1].is(":") {
            let name = self.advance().text;
            self.advance();
            self.declared_labels.push(name.clone());
            let unique_label = self.mangled_label(&name);
            let body = self.stmt()?;
            return Ok(Node::new(NodeKind::Labeled { unique_label, body: Box::new(body) }, line));
        }
        if self.is("{") {
            return self.compound_stmt();
        }
        self.expr_stmt()
    }

    fn expr_stmt(&mut self) -> CResult<Node> {
        let line = self.line();
        if self.consume(";") {
            let mut n = Node::new(NodeKind::Num(0), line);
            n.ty = Some(Type::void());
            return Ok(Node::new(NodeKind::ExprStmt(Box::new(n)), line));
        }
        let e = self.expr()?;
        self.expect(";")?;
        Ok(Node::new(NodeKind::ExprStmt(Box::new(e)), line))
    }

    // ---- expressions (precedence climb) ----

    fn expr(&mut self) -> CResult<Node> {
        let mut node = self.assign()?;
        while self.is(",") {
            let line = self.line();
            self.advance();
            let rhs = self.assign()?;
            node = new_comma(node, rhs, line);
        }
        Ok(node)
    }

    fn assign(&mut self) -> CResult<Node> {
        let line = self.line();
        let node = self.conditional()?;
        if self.consume("=") {
            let rhs = self.assign()?;
            return Ok(new_assign(node, rhs, line));
        }
        const COMPOUND: &[(&str, BinOp)] = &[
            ("+=", BinOp::Add),
            ("-=", BinOp::Sub),
            ("*=", BinOp::Mul),
            ("/=", BinOp::Div),
            ("%=", BinOp::Mod),
            ("&=", BinOp::BitAnd),
            ("|=", BinOp::BitOr),
            ("^=", BinOp::BitXor),
            ("<<=", BinOp::Shl),
            (">>=", BinOp::Shr),
        ];
        for (text, op) in COMPOUND {
            if self.consume(text) {
                let rhs = self.assign()?;
                let combined = match op {
                    BinOp::Add => new_add(clone_lvalue(&node), rhs, line)?,
                    BinOp::Sub => new_sub(clone_lvalue(&node), rhs, line)?,
                    other => apply_binop(*other, clone_lvalue(&node), rhs, line),
                };
                return Ok(new_assign(node, combined, line));
            }
        }
        Ok(node)
    }

    fn conditional(&mut self) -> CResult<Node> {
        let cond = self.logor()?;
        if self.consume("?") {
            let line = self.line();
            let then = self.expr()?;
            self.expect(":")?;
            let els = self.conditional()?;
            let ty = Rc::clone(then.ty.as_ref().unwrap());
            let mut n =
                Node::new(NodeKind::Cond { cond: Box::new(cond), then: Box::new(then), els: Box::new(els) }, line);
            n.ty = Some(ty);
            return Ok(n);
        }
        Ok(cond)
    }

    fn binary_level(&mut self, ops: &[(&str, BinOp)], next: fn(&mut Self) -> CResult<Node>) -> CResult<Node> {
        let mut node = next(self)?;
        'outer: loop {
            for (text, op) in ops {
                if self.is(text) {
                    let line = self.line();
                    self.advance();
                    let rhs = next(self)?;
                    node = apply_binop(*op, node, rhs, line);
                    continue 'outer;
                }
            }
            return Ok(node);
        }
    }

    fn logor(&mut self) -> CResult<Node> {
        self.binary_level(&[("||", BinOp::LogOr)], Self::logand)
    }
    fn logand(&mut self) -> CResult<Node> {
        self.binary_level(&[("&&", BinOp::LogAnd)], Self::bitor)
    }
    fn bitor(&mut self) -> CResult<Node> {
        self.binary_level(&[("|", BinOp::BitOr)], Self::bitxor)
    }
    fn bitxor(&mut self) -> CResult<Node> {
        self.binary_level(&[("^", BinOp::BitXor)], Self::bitand)
    }
    fn bitand(&mut self) -> CResult<Node> {
        self.binary_level(&[("&", BinOp::BitAnd)], Self::equality)
    }
    fn equality(&mut self) -> CResult<Node> {
        self.binary_level(&[("==", BinOp::Eq), ("!=", BinOp::Ne)], Self::relational)
    }
    fn relational(&mut self) -> CResult<Node> {
        // `a > b` is parsed as `b < a`; `a >= b` as `b <= a`.
        let mut node = self.shift()?;
        loop {
            let line = self.line();
            if self.consume("<") {
                let rhs = self.shift()?;
                node = apply_binop(BinOp::Lt, node, rhs, line);
            } else if self.consume("<=") {
                let rhs = self.shift()?;
                node = apply_binop(BinOp::Le, node, rhs, line);
            } else if self.consume(">") {
                let rhs = self.shift()?;
                node = apply_binop(BinOp::Lt, rhs, node, line);
            } else if self.consume(">=") {
                let rhs = self.shift()?;
                node = apply_binop(BinOp::Le, rhs, node, line);
            } else {
                return Ok(node);
            }
        }
    }
    fn shift(&mut self) -> CResult<Node> {
        self.binary_level(&[("<<", BinOp::Shl), (">>", BinOp::Shr)], Self::add_sub)
    }

    fn add_sub(&mut self) -> CResult<Node> {
        let mut node = self.mul_div()?;
        loop {
            let line = self.line();
            if self.consume("+") {
                let rhs = self.mul_div()?;
                node = new_add(node, rhs, line)?;
            } else if self.consume("-") {
                let rhs = self.mul_div()?;
                node = new_sub(node, rhs, line)?;
            } else {
                return Ok(node);
            }
        }
    }

    fn mul_div(&mut self) -> CResult<Node> {
        self.binary_level(&[("*", BinOp::Mul), ("/", BinOp::Div), ("%", BinOp::Mod)], Self::cast_expr)
    }

    fn cast_expr(&mut self) -> CResult<Node> {
        if self.is("(") && self.peek_is_type_at(self.pos + 1) {
            let line = self.line();
            self.advance();
            let base = self.declspec()?;
            let d = self.declarator(base)?;
            self.expect(")")?;
            let inner = self.cast_expr()?;
            return Ok(new_cast(inner, d.ty, line));
        }
        self.unary()
    }

    fn peek_is_type_at(&self, idx: usize) -> bool {
        const KEYWORDS: &[&str] = &["void", "bool", "char", "short", "int", "long", "struct", "union", "enum"];
        let t = &self.toks[idx];
        if matches!(t.kind, TokenKind::Keyword) && KEYWORDS.contains(&t.text.as_str()) {
            return true;
        }
        t.is_ident() && self.scope.find_typedef(&t.text).is_some()
    }

    fn unary(&mut self) -> CResult<Node> {
        let line = self.line();
        if self.consume("+") {
            return self.cast_expr();
        }
        if self.consume("-") {
            let inner = self.cast_expr()?;
            let ty = Rc::clone(inner.ty.as_ref().unwrap());
            let mut n = Node::new(NodeKind::Neg(Box::new(inner)), line);
            n.ty = Some(ty);
            return Ok(n);
        }
        if self.consume("*") {
            let inner = self.cast_expr()?;
            let base = inner
                .ty
                .as_ref()
                .unwrap()
                .base()
                .cloned()
                .ok_or_else(|| self.err_at(line, "cannot dereference a non-pointer"))?;
            let mut n = Node::new(NodeKind::Deref(Box::new(inner)), line);
            n.ty = Some(base);
            return Ok(n);
        }
        if self.consume("&") {
            let inner = self.cast_expr()?;
            if !inner.is_lvalue() {
                return Err(self.err_at(line, "cannot take address of a non-lvalue"));
            }
            let ty = Type::pointer_to(Rc::clone(inner.ty.as_ref().unwrap()));
            let mut n = Node::new(NodeKind::Addr(Box::new(inner)), line);
            n.ty = Some(ty);
            return Ok(n);
        }
        if self.consume("!") {
            let inner = self.cast_expr()?;
            let mut n = Node::new(NodeKind::Not(Box::new(inner)), line);
            n.ty = Some(Type::int());
            return Ok(n);
        }
        if self.consume("~") {
            let inner = self.cast_expr()?;
            let ty = Rc::clone(inner.ty.as_ref().unwrap());
            let mut n = Node::new(NodeKind::BitNot(Box::new(inner)), line);
            n.ty = Some(ty);
            return Ok(n);
        }
        if self.consume("++") {
            // Prefix `++x` desugars to `x = x + 1`.
            let inner = self.cast_expr()?;
            let mut one = Node::new(NodeKind::Num(1), line);
            one.ty = Some(Type::long());
            let rhs = new_add(clone_lvalue(&inner), one, line)?;
            return Ok(new_assign(inner, rhs, line));
        }
        if self.consume("--") {
            let inner = self.cast_expr()?;
            let mut one = Node::new(NodeKind::Num(1), line);
            one.ty = Some(Type::long());
            let rhs = new_sub(clone_lvalue(&inner), one, line)?;
            return Ok(new_assign(inner, rhs, line));
        }
        if self.consume("sizeof") {
            if self.is("(") && self.peek_is_type_at(self.pos + 1) {
                self.advance();
                let base = self.declspec()?;
                let d = self.declarator(base)?;
                self.expect(")")?;
                let mut n = Node::new(NodeKind::Num(d.ty.size as i64), line);
                n.ty = Some(Type::long());
                return Ok(n);
            }
            let inner = self.unary()?;
            let size = inner.ty.as_ref().unwrap().size as i64;
            let mut n = Node::new(NodeKind::Num(size), line);
            n.ty = Some(Type::long());
            return Ok(n);
        }
        self.postfix()
    }

    fn postfix(&mut self) -> CResult<Node> {
        let mut node = self.primary()?;
        loop {
            let line = self.line();
            if self.consume("[") {
                let idx = self.expr()?;
                self.expect("]")?;
                let sum = new_add(node, idx, line)?;
                let base = sum
                    .ty
                    .as_ref()
                    .unwrap()
                    .base()
                    .cloned()
                    .ok_or_else(|| self.err_at(line, "subscript of a non-pointer"))?;
                let mut n = Node::new(NodeKind::Deref(Box::new(sum)), line);
                n.ty = Some(base);
                node = n;
                continue;
            }
            if self.consume(".") {
                let name = self.expect_ident()?;
                node = self.member_access(node, &name, line)?;
                continue;
            }
            if self.consume("->") {
                let name = self.expect_ident()?;
                let base = node
                    .ty
                    .as_ref()
                    .unwrap()
                    .base()
                    .cloned()
                    .ok_or_else(|| self.err_at(line, "'->' on a non-pointer"))?;
                let mut deref = Node::new(NodeKind::Deref(Box::new(node)), line);
                deref.ty = Some(base);
                node = self.member_access(deref, &name, line)?;
                continue;
            }
            if self.consume("++") {
                node = desugar_postfix_incdec(node, 1, line);
                continue;
            }
            if self.consume("--") {
                node = desugar_postfix_incdec(node, -1, line);
                continue;
            }
            return Ok(node);
        }
    }

    fn member_access(&mut self, base: Node, name: &str, line: usize) -> CResult<Node> {
        let base_ty = Rc::clone(base.ty.as_ref().unwrap());
        let member = base_ty
            .find_member(name)
            .cloned()
            .ok_or_else(|| self.err_at(line, format!("no member named '{name}'")))?;
        let mut n = Node::new(
            NodeKind::Member {
                base: Box::new(base),
                name: name.to_string(),
                offset: member.offset,
                ty: Rc::clone(&member.ty),
            },
            line,
        );
        n.ty = Some(member.ty);
        Ok(n)
    }

    fn primary(&mut self) -> CResult<Node> {
        let line = self.line();
        if self.consume("(") {
            if self.is("{") {
                // GNU statement expression `({ ...; expr; })`.
                self.advance();
                self.scope.push();
                let mut stmts = Vec::new();
                while !self.consume("}") {
                    if self.at_type_start() {
                        stmts.extend(self.declaration()?);
                    } else {
                        stmts.push(self.stmt()?);
                    }
                }
                self.scope.pop();
                self.expect(")")?;
                let ty = match stmts.last() {
                    Some(Node { kind: NodeKind::ExprStmt(e), .. }) => Rc::clone(e.ty.as_ref().unwrap()),
                    _ => Type::void(),
                };
                let mut n = Node::new(NodeKind::StmtExpr(stmts), line);
                n.ty = Some(ty);
                return Ok(n);
            }
            let e = self.expr()?;
            self.expect(")")?;
            return Ok(e);
        }
        if let TokenKind::Num(v) = self.cur().kind {
            self.advance();
            let mut n = Node::new(NodeKind::Num(v), line);
            n.ty = Some(Type::for_literal(v));
            return Ok(n);
        }
        if let TokenKind::Str(bytes) = self.cur().kind.clone() {
            self.advance();
            let name = self.next_anon_name();
            let ty = Type::array_of(Type::char_ty(), bytes.len());
            let id = self.new_obj(
                name,
                Rc::clone(&ty),
                false,
                ObjData::Global { init_data: Some(bytes), relocations: Vec::new() },
            );
            self.order.push(id);
            let mut n = Node::new(NodeKind::Var(id), line);
            n.ty = Some(ty);
            return Ok(n);
        }
        if self.cur().is_ident() {
            let name = self.advance().text;
            if self.consume("(") {
                return self.funcall(name, line);
            }
            if let Some(id) = self.scope.find_var(&name) {
                let mut n = Node::new(NodeKind::Var(id), line);
                n.ty = Some(Rc::clone(&self.objects[id].ty));
                return Ok(n);
            }
            if let Some(value) = self.scope.find_enum_const(&name) {
                let mut n = Node::new(NodeKind::Num(value), line);
                n.ty = Some(Type::int());
                return Ok(n);
            }
            return Err(self.err_at(line, format!("undeclared identifier '{name}'")));
        }
        Err(self.err("expected an expression"))
    }

    fn funcall(&mut self, name: String, line: usize) -> CResult<Node> {
        let mut args = Vec::new();
        if !self.is(")") {
            loop {
                args.push(self.assign()?);
                if !self.consume(",") {
                    break;
                }
            }
        }
        self.expect(")")?;
        let return_ty = match self.scope.find_var(&name).map(|id| Rc::clone(&self.objects[id].ty)) {
            Some(ty) => match &ty.kind {
                TypeKind::Function { return_ty, params, .. } => {
                    // Insert implicit casts for every fixed (non-variadic) argument.
                    for (arg, want) in args.iter_mut().zip(params.iter()) {
                        let taken = std::mem::replace(arg, Node::new(NodeKind::Num(0), line));
                        *arg = new_cast_if_needed(taken, want);
                    }
                    Rc::clone(return_ty)
                }
                _ => return Err(self.err_at(line, format!("'{name}' is not callable"))),
            },
            None => Type::int(), // implicit-int fallback for an undeclared callee.
        };
        let mut n = Node::new(NodeKind::FunCall { name, args, return_ty: Rc::clone(&return_ty) }, line);
        n.ty = Some(return_ty);
        Ok(n)
    }
}

// ---- free-standing node builders shared by parsing and desugaring ----

#[derive(Clone, Copy)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    LogAnd,
    LogOr,
}

/// Builds every binary node *except* `Add`/`Sub`, which need pointer
/// scaling ([`new_add`]/[`new_sub`]) that this function can't fail at.
fn apply_binop(op: BinOp, lhs: Node, rhs: Node, line: usize) -> Node {
    let lt = Rc::clone(lhs.ty.as_ref().unwrap());
    let rt = Rc::clone(rhs.ty.as_ref().unwrap());
    let (kind, ty) = match op {
        BinOp::Add | BinOp::Sub => unreachable!("pointer-scaled ops go through new_add/new_sub"),
        BinOp::Mul => (NodeKind::Mul(Box::new(lhs), Box::new(rhs)), Type::usual_arith(&lt, &rt)),
        BinOp::Div => (NodeKind::Div(Box::new(lhs), Box::new(rhs)), Type::usual_arith(&lt, &rt)),
        BinOp::Mod => (NodeKind::Mod(Box::new(lhs), Box::new(rhs)), Type::usual_arith(&lt, &rt)),
        BinOp::BitAnd => (NodeKind::BitAnd(Box::new(lhs), Box::new(rhs)), Type::usual_arith(&lt, &rt)),
        BinOp::BitOr => (NodeKind::BitOr(Box::new(lhs), Box::new(rhs)), Type::usual_arith(&lt, &rt)),
        BinOp::BitXor => (NodeKind::BitXor(Box::new(lhs), Box::new(rhs)), Type::usual_arith(&lt, &rt)),
        BinOp::Shl => (NodeKind::Shl(Box::new(lhs), Box::new(rhs)), lt),
        BinOp::Shr => (NodeKind::Shr(Box::new(lhs), Box::new(rhs)), lt),
        BinOp::Eq => (NodeKind::Eq(Box::new(lhs), Box::new(rhs)), Type::int()),
        BinOp::Ne => (NodeKind::Ne(Box::new(lhs), Box::new(rhs)), Type::int()),
        BinOp::Lt => (NodeKind::Lt(Box::new(lhs), Box::new(rhs)), Type::int()),
        BinOp::Le => (NodeKind::Le(Box::new(lhs), Box::new(rhs)), Type::int()),
        BinOp::LogAnd => (NodeKind::LogAnd(Box::new(lhs), Box::new(rhs)), Type::int()),
        BinOp::LogOr => (NodeKind::LogOr(Box::new(lhs), Box::new(rhs)), Type::int()),
    };
    let mut n = Node::new(kind, line);
    n.ty = Some(ty);
    n
}

/// Pointer-aware `+`: `ptr + int` scales the integer operand by
/// `sizeof(*ptr)` so the raw byte displacement matches C's array
/// indexing arithmetic.
fn new_add(lhs: Node, rhs: Node, line: usize) -> CResult<Node> {
    let lt = Rc::clone(lhs.ty.as_ref().unwrap());
    let rt = Rc::clone(rhs.ty.as_ref().unwrap());
    if lt.is_integer() && rt.is_integer() {
        let ty = Type::usual_arith(&lt, &rt);
        let mut n = Node::new(NodeKind::Add(Box::new(lhs), Box::new(rhs)), line);
        n.ty = Some(ty);
        return Ok(n);
    }
    if lt.is_pointer_like() && rt.is_pointer_like() {
        return Err(CompileError::at("invalid operands to '+': pointer + pointer", line, 0));
    }
    let (ptr, ptr_ty, int_val) =
        if lt.is_pointer_like() { (lhs, lt.decay(), rhs) } else { (rhs, rt.decay(), lhs) };
    let elem_size = ptr_ty.base().unwrap().size.max(1) as i64;
    let scaled = scale_int(int_val, elem_size, line);
    let mut n = Node::new(NodeKind::Add(Box::new(ptr), Box::new(scaled)), line);
    n.ty = Some(ptr_ty);
    Ok(n)
}

/// `ptr - int` scales like `+`; `ptr - ptr` divides the raw byte
/// difference by the pointee size to yield an element count.
fn new_sub(lhs: Node, rhs: Node, line: usize) -> CResult<Node> {
    let lt = Rc::clone(lhs.ty.as_ref().unwrap());
    let rt = Rc::clone(rhs.ty.as_ref().unwrap());
    if lt.is_integer() && rt.is_integer() {
        let ty = Type::usual_arith(&lt, &rt);
        let mut n = Node::new(NodeKind::Sub(Box::new(lhs), Box::new(rhs)), line);
        n.ty = Some(ty);
        return Ok(n);
    }
    if lt.is_pointer_like() && rt.is_pointer_like() {
        let elem_size = lt.decay().base().unwrap().size.max(1) as i64;
        let mut diff = Node::new(NodeKind::Sub(Box::new(lhs), Box::new(rhs)), line);
        diff.ty = Some(Type::long());
        let mut size_lit = Node::new(NodeKind::Num(elem_size), line);
        size_lit.ty = Some(Type::long());
        let mut n = Node::new(NodeKind::Div(Box::new(diff), Box::new(size_lit)), line);
        n.ty = Some(Type::long());
        return Ok(n);
    }
    if rt.is_pointer_like() {
        return Err(CompileError::at("invalid operands to '-'", line, 0));
    }
    let ptr_ty = lt.decay();
    let elem_size = ptr_ty.base().unwrap().size.max(1) as i64;
    let scaled = scale_int(rhs, elem_size, line);
    let mut n = Node::new(NodeKind::Sub(Box::new(lhs), Box::new(scaled)), line);
    n.ty = Some(ptr_ty);
    Ok(n)
}

fn scale_int(n: Node, factor: i64, line: usize) -> Node {
    if factor == 1 {
        return n;
    }
    let mut lit = Node::new(NodeKind::Num(factor), line);
    lit.ty = Some(Type::long());
    let mut scaled = Node::new(NodeKind::Mul(Box::new(n), Box::new(lit)), line);
    scaled.ty = Some(Type::long());
    scaled
}

fn new_cast(inner: Node, to: Rc<Type>, line: usize) -> Node {
    let mut n = Node::new(NodeKind::Cast(Box::new(inner)), line);
    n.ty = Some(to);
    n
}

/// Insert a cast only when the value's type differs from the target, so
/// assignment/argument-passing don't wrap every already-correctly-typed
/// expression in a redundant no-op cast node.
fn new_cast_if_needed(node: Node, to: &Rc<Type>) -> Node {
    if node.ty.as_ref().map(|t| t.kind == to.kind) == Some(true) {
        return node;
    }
    let line = node.line;
    new_cast(node, Rc::clone(to), line)
}

fn new_assign(lhs: Node, rhs: Node, line: usize) -> Node {
    let lhs_ty = Rc::clone(lhs.ty.as_ref().unwrap());
    let rhs = new_cast_if_needed(rhs, &lhs_ty);
    let mut n = Node::new(NodeKind::Assign(Box::new(lhs), Box::new(rhs)), line);
    n.ty = Some(lhs_ty);
    n
}

fn new_comma(lhs: Node, rhs: Node, line: usize) -> Node {
    let ty = Rc::clone(rhs.ty.as_ref().unwrap());
    let mut n = Node::new(NodeKind::Comma(Box::new(lhs), Box::new(rhs)), line);
    n.ty = Some(ty);
    n
}

/// `x++`/`x--` desugar to `(x = x + delta) - delta`, which reaches the
/// same value as the standard "save, bump, return saved" expansion
/// without needing a temporary slot in the AST.
fn desugar_postfix_incdec(lvalue: Node, delta: i64, line: usize) -> Node {
    let ty = Rc::clone(lvalue.ty.as_ref().unwrap());
    let lhs_clone = clone_lvalue(&lvalue);
    let mut one = Node::new(NodeKind::Num(1), line);
    one.ty = Some(Type::long());
    let sum = if delta > 0 {
        new_add(lvalue, one, line).unwrap()
    } else {
        new_sub(lvalue, one, line).unwrap()
    };
    let assigned = new_assign(lhs_clone, sum, line);
    let mut back_lit = Node::new(NodeKind::Num(delta.abs()), line);
    back_lit.ty = Some(ty);
    if delta > 0 {
        new_sub(assigned, back_lit, line).unwrap()
    } else {
        new_add(assigned, back_lit, line).unwrap()
    }
}

/// Re-reads an lvalue node (`Var`/`Deref`/`Member`) by shape, used by
/// prefix/postfix `++`/`--` and compound assignment, which all need the
/// lvalue's current value as well as its address. Safe because these
/// node kinds carry no side effects of their own to duplicate.
fn clone_lvalue(node: &Node) -> Node {
    let ty = node.ty.clone();
    let kind = match &node.kind {
        NodeKind::Var(id) => NodeKind::Var(*id),
        NodeKind::Deref(inner) => NodeKind::Deref(Box::new(clone_lvalue(inner))),
        NodeKind::Member { base, name, offset, ty } => NodeKind::Member {
            base: Box::new(clone_lvalue(base)),
            name: name.clone(),
            offset: *offset,
            ty: Rc::clone(ty),
        },
        other => panic!("clone_lvalue called on non-lvalue node {other:?}"),
    };
    let mut n = Node::new(kind, node.line);
    n.ty = ty;
    n
}

// ---- constant evaluation ----

fn eval_const(node: &Node) -> Result<i64, ()> {
    match eval_const_reloc(node)? {
        (None, v) => Ok(v),
        (Some(_), _) => Err(()),
    }
}

/// Evaluates a constant expression to either a pure integer, or a
/// `(label, addend)` pair describing "the address of a global plus a
/// compile-time offset" — the shape a [`Relocation`] needs.
fn eval_const_reloc(node: &Node) -> Result<(Option<String>, i64), ()> {
    match &node.kind {
        NodeKind::Num(v) => Ok((None, *v)),
        NodeKind::Neg(inner) => {
            let (label, v) = eval_const_reloc(inner)?;
            if label.is_some() {
                return Err(());
            }
            Ok((None, -v))
        }
        NodeKind::Cast(inner) => eval_const_reloc(inner),
        NodeKind::Add(lhs, rhs) => combine_reloc(lhs, rhs, |a, b| a + b),
        NodeKind::Sub(lhs, rhs) => combine_reloc(lhs, rhs, |a, b| a - b),
        NodeKind::Mul(lhs, rhs) => pure_pair(lhs, rhs, |a, b| a * b),
        NodeKind::Div(lhs, rhs) => pure_pair(lhs, rhs, |a, b| if b == 0 { 0 } else { a / b }),
        NodeKind::Mod(lhs, rhs) => pure_pair(lhs, rhs, |a, b| if b == 0 { 0 } else { a % b }),
        NodeKind::BitAnd(lhs, rhs) => pure_pair(lhs, rhs, |a, b| a & b),
        NodeKind::BitOr(lhs, rhs) => pure_pair(lhs, rhs, |a, b| a | b),
        NodeKind::BitXor(lhs, rhs) => pure_pair(lhs, rhs, |a, b| a ^ b),
        NodeKind::Shl(lhs, rhs) => pure_pair(lhs, rhs, |a, b| a << b),
        NodeKind::Shr(lhs, rhs) => pure_pair(lhs, rhs, |a, b| a >> b),
        NodeKind::Var(_) => Err(()),
        NodeKind::Addr(_) => Err(()), // globals' addresses are resolved via Relocation, not folded here
        _ => Err(()),
    }
}

fn pure_pair(lhs: &Node, rhs: &Node, f: impl Fn(i64, i64) -> i64) -> Result<(Option<String>, i64), ()> {
    let l = eval_const(lhs)?;
    let r = eval_const(rhs)?;
    Ok((None, f(l, r)))
}

fn combine_reloc(lhs: &Node, rhs: &Node, f: impl Fn(i64, i64) -> i64) -> Result<(Option<String>, i64), ()> {
    let (ll, lv) = eval_const_reloc(lhs)?;
    let (rl, rv) = eval_const_reloc(rhs)?;
    match (ll, rl) {
        (None, None) => Ok((None, f(lv, rv))),
        (Some(l), None) => Ok((Some(l), f(lv, rv))),
        (None, Some(r)) => Ok((Some(r), f(lv, rv))),
        (Some(_), Some(_)) => Err(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> Program {
        parse_program(src).unwrap_or_else(|e| panic!("parse failed: {e}"))
    }

    #[test]
    fn parses_minimal_main() {
        let prog = parse_ok("int main() { return 42; }\n");
        assert_eq!(prog.functions().count(), 1);
    }

    #[test]
    fn pointer_arithmetic_scales_by_element_size() {
        let prog = parse_ok("int main() { int a[4]; int *p = a; p = p + 1; return 0; }\n");
        let (_, main) = prog.functions().next().unwrap();
        let ObjData::Function { body: Some(body), .. } = &main.data else { panic!("no body") };
        assert!(format!("{body:?}").contains("Mul"));
    }

    #[test]
    fn undeclared_identifier_is_an_error() {
        let err = parse_program("int main() { return x; }\n").unwrap_err();
        assert!(err.message.contains("undeclared"));
    }

    #[test]
    fn goto_to_missing_label_is_an_error() {
        let err = parse_program("int main() { goto nope; return 0; }\n").unwrap_err();
        assert!(err.message.contains("undeclared label"));
    }

    #[test]
    fn struct_member_offsets_are_resolved_at_parse_time() {
        let prog = parse_ok(
            "struct P { int x; int y; }; int main() { struct P p; p.y = 1; return p.y; }\n",
        );
        assert_eq!(prog.functions().count(), 1);
    }

    #[test]
    fn global_array_initializer_produces_no_relocations_for_integers() {
        let prog = parse_ok("int a[3] = {1, 2, 3};\n");
        let (_, obj) = prog.data_objects().next().unwrap();
        let ObjData::Global { init_data, relocations } = &obj.data else { panic!("not global") };
        assert!(init_data.is_some());
        assert!(relocations.is_empty());
    }

    #[test]
    fn void_parameter_list_means_zero_parameters() {
        let prog = parse_ok("int f(void) { return 0; }\n");
        let (_, f) = prog.functions().next().unwrap();
        let ObjData::Function { params, .. } = &f.data else { panic!("not function") };
        assert!(params.is_empty());
    }
}
