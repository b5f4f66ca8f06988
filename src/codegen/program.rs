//! Stack layout assignment and top-level assembly emission.
//!
//! Two passes per translation unit: [`assign_stack_layout`]
//! walks every function's locals in declaration order, assigning each a
//! negative `rbp`-relative offset, then [`generate`] walks the object
//! list in declaration order emitting `.data`/`.bss` followed by `.text`.

use crate::ast::Program;
use crate::scope::{Obj, ObjData, ObjId, Relocation};
use crate::types::align_to;

use super::error::CodeGenError;
use super::platform::{ARG_REGS16, ARG_REGS32, ARG_REGS64, ARG_REGS8};
use super::state::{CodeGen, emit};
use super::statements::gen_stmt;

/// Six general-purpose argument registers, 8 bytes each.
const VARIADIC_SAVE_AREA_SIZE: usize = 48;

/// Assign every function's locals a negative `rbp`-relative offset and
/// fill in the function's final `stack_size` (and, for variadic
/// functions, the save area's offset). Mutates `objects` in place so
/// that the later emission pass can borrow it immutably.
fn assign_stack_layout(objects: &mut [Obj]) {
    for id in 0..objects.len() {
        if !objects[id].is_function() {
            continue;
        }
        let (locals, is_variadic) = match &objects[id].data {
            ObjData::Function { locals, variadic_save, .. } => (locals.clone(), variadic_save.is_some()),
            _ => unreachable!(),
        };

        let mut offset = 0usize;
        for local_id in &locals {
            let local = &mut objects[*local_id];
            offset += local.ty.size;
            offset = align_to(offset, local.ty.align);
            local.offset = -(offset as i64);
        }

        let gp_save_offset = if is_variadic {
            offset += VARIADIC_SAVE_AREA_SIZE;
            offset = align_to(offset, 8);
            Some(-(offset as i64))
        } else {
            None
        };

        let stack_size = align_to(offset, 16);
        if let ObjData::Function { stack_size: slot, variadic_save, .. } = &mut objects[id].data {
            *slot = stack_size;
            if let (Some(area), Some(gp_off)) = (variadic_save.as_mut(), gp_save_offset) {
                area.gp_save_offset = gp_off;
            }
        }
    }
}

pub fn generate(program: &mut Program) -> Result<String, CodeGenError> {
    assign_stack_layout(&mut program.objects);
    let mut cg = CodeGen::new(&program.objects);
    cg.directive(format_args!(".intel_syntax noprefix"))?;
    gen_data(&mut cg, program)?;
    gen_text(&mut cg, program)?;
    Ok(cg.into_output())
}

fn gen_data(cg: &mut CodeGen, program: &Program) -> Result<(), CodeGenError> {
    for (_, obj) in program.data_objects() {
        let ObjData::Global { init_data, relocations } = &obj.data else { unreachable!() };
        cg.blank_line()?;
        if obj.is_static {
            cg.directive(format_args!(".local {}", obj.name))?;
        } else {
            cg.directive(format_args!(".globl {}", obj.name))?;
        }
        cg.directive(format_args!(".align {}", obj.ty.align))?;
        match init_data {
            Some(bytes) => {
                cg.directive(format_args!(".data"))?;
                cg.label(&obj.name)?;
                emit_data_bytes(cg, bytes, relocations)?;
            }
            None => {
                cg.directive(format_args!(".bss"))?;
                cg.label(&obj.name)?;
                emit!(cg, ".zero {}", obj.ty.size);
            }
        }
    }
    Ok(())
}

/// Interleave raw bytes and 8-byte relocations, in offset order: each
/// relocation emits `.quad label+addend` and skips 8 bytes; everything
/// else emits one `.byte` at a time.
fn emit_data_bytes(cg: &mut CodeGen, bytes: &[u8], relocations: &[Relocation]) -> Result<(), CodeGenError> {
    let mut sorted: Vec<&Relocation> = relocations.iter().collect();
    sorted.sort_by_key(|r| r.offset);
    let mut relocs = sorted.into_iter().peekable();

    let mut pos = 0usize;
    while pos < bytes.len() {
        if let Some(r) = relocs.peek().copied() {
            if r.offset == pos {
                relocs.next();
                if r.addend == 0 {
                    emit!(cg, ".quad {}", r.label);
                } else {
                    emit!(cg, ".quad {}+{}", r.label, r.addend);
                }
                pos += 8;
                continue;
            }
        }
        emit!(cg, ".byte {}", bytes[pos]);
        pos += 1;
    }
    Ok(())
}

fn gen_text(cg: &mut CodeGen, program: &Program) -> Result<(), CodeGenError> {
    cg.blank_line()?;
    cg.directive(format_args!(".text"))?;
    for (id, obj) in program.functions() {
        let ObjData::Function { is_definition, .. } = &obj.data else { unreachable!() };
        if *is_definition {
            gen_function(cg, id, obj)?;
        }
    }
    Ok(())
}

fn gen_function(cg: &mut CodeGen, _id: ObjId, obj: &Obj) -> Result<(), CodeGenError> {
    let ObjData::Function { params, body, stack_size, variadic_save, .. } = &obj.data else { unreachable!() };

    cg.blank_line()?;
    if obj.is_static {
        cg.directive(format_args!(".local {}", obj.name))?;
    } else {
        cg.directive(format_args!(".globl {}", obj.name))?;
    }
    cg.label(&obj.name)?;
    cg.set_return_label(format!(".L.return.{}", obj.name));

    emit!(cg, "push rbp");
    emit!(cg, "mov rbp, rsp");
    emit!(cg, "sub rsp, {stack_size}");

    for (i, param_id) in params.iter().enumerate().take(6) {
        let param = &cg.objects()[*param_id];
        let reg = if param.ty.is_pointer_like() {
            ARG_REGS64[i]
        } else {
            match param.ty.size {
                1 => ARG_REGS8[i],
                2 => ARG_REGS16[i],
                4 => ARG_REGS32[i],
                _ => ARG_REGS64[i],
            }
        };
        emit!(cg, "mov [rbp{}], {reg}", param.offset);
    }

    if let Some(area) = variadic_save {
        for i in (area.gp_offset as usize)..6 {
            let off = area.gp_save_offset + i as i64 * 8;
            emit!(cg, "mov [rbp{off}], {}", ARG_REGS64[i]);
        }
    }

    if let Some(body) = body {
        gen_stmt(cg, body)?;
    }

    let return_label = cg.return_label().to_string();
    cg.label(&return_label)?;
    emit!(cg, "mov rsp, rbp");
    emit!(cg, "pop rbp");
    emit!(cg, "ret");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::ObjData;
    use crate::types::Type;

    fn make_local(name: &str, ty: std::rc::Rc<Type>) -> Obj {
        Obj { name: name.to_string(), ty, offset: 0, is_local: true, is_static: false, data: ObjData::Local }
    }

    #[test]
    fn locals_get_distinct_negative_offsets_and_stack_size_is_16_aligned() {
        let mut objects = vec![
            make_local("a", Type::int()),
            make_local("b", Type::long()),
            Obj {
                name: "main".to_string(),
                ty: Type::function(Type::int(), vec![], false),
                offset: 0,
                is_local: false,
                is_static: false,
                data: ObjData::Function {
                    params: vec![],
                    locals: vec![0, 1],
                    body: None,
                    stack_size: 0,
                    is_definition: true,
                    variadic_save: None,
                },
            },
        ];
        assign_stack_layout(&mut objects);
        assert_eq!(objects[0].offset, -4);
        assert_eq!(objects[1].offset, -16);
        let ObjData::Function { stack_size, .. } = &objects[2].data else { unreachable!() };
        assert_eq!(stack_size % 16, 0);
        assert!(*stack_size >= 16);
    }
}
