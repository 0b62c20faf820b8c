// SPDX-License-Identifier: BSD-3-Clause
//! Lowering from a parsed [`llvm_ir::Module`] into the arena module. Global
//! and function names are registered first, then types, then bodies, since
//! the bitcode references values before their definitions.

use std::collections::HashMap;

use either::Either;
use llvm_ir::types::Typed;
use llvm_ir::Name;

use super::builder::ModuleBuilder;
use super::types::TypeId;
use super::{Callee, CallInst, FuncId, Inst, Module, ValueId};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub struct LowerError(pub String);

impl std::fmt::Display for LowerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "malformed LLVM module: {}", self.0)
    }
}

pub fn lower_module(m: &llvm_ir::Module) -> Result<Module, LowerError> {
    Lower::new(m).run()
}

fn name_to_string(name: &Name) -> String {
    match name {
        Name::Name(s) => (**s).clone(),
        Name::Number(n) => n.to_string(),
    }
}

struct Lower<'m> {
    src: &'m llvm_ir::Module,
    b: ModuleBuilder,
    type_cache: HashMap<*const llvm_ir::Type, TypeId>,
    named_structs: HashMap<String, TypeId>,
    functions: HashMap<String, FuncId>,
    globals: HashMap<String, ValueId>,
}

impl<'m> Lower<'m> {
    fn new(src: &'m llvm_ir::Module) -> Self {
        Lower {
            src,
            b: ModuleBuilder::new(),
            type_cache: HashMap::new(),
            named_structs: HashMap::new(),
            functions: HashMap::new(),
            globals: HashMap::new(),
        }
    }

    fn run(mut self) -> Result<Module, LowerError> {
        for f in &self.src.functions {
            let fn_ty = self.function_type(&f.return_type, &f.parameters, f.is_var_arg);
            let id = self.b.function(&f.name, fn_ty, true);
            self.functions.insert(f.name.clone(), id);
        }
        for d in &self.src.func_declarations {
            let fn_ty = self.function_type(&d.return_type, &d.parameters, d.is_var_arg);
            let id = self.b.function(&d.name, fn_ty, false);
            self.functions.insert(d.name.clone(), id);
        }
        for g in &self.src.global_vars {
            // The global's own type is a pointer to the allocated object.
            let ty = self.ty(&g.ty);
            let allocated = self
                .b
                .types()
                .pointee(ty)
                .ok_or_else(|| LowerError(format!("global {} with non-pointer type", g.name)))?;
            let g_name = name_to_string(&g.name);
            let v = self.b.global(&g_name, allocated);
            self.b.set_global_const(v, g.is_constant);
            self.globals.insert(g_name, v);
        }
        // Initializers after all globals exist; they may reference each other.
        for g in &self.src.global_vars {
            if let Some(init) = &g.initializer {
                let init = self.constant(init);
                let v = self.globals[&name_to_string(&g.name)];
                self.b.set_global_init(v, init);
            }
        }
        let names: Vec<String> = self.src.functions.iter().map(|f| f.name.clone()).collect();
        for (f, name) in self.src.functions.iter().zip(names) {
            let id = self.functions[&name];
            self.function_body(id, f)?;
        }
        Ok(self.b.build())
    }

    fn function_type(
        &mut self,
        ret: &llvm_ir::TypeRef,
        params: &[llvm_ir::function::Parameter],
        varargs: bool,
    ) -> TypeId {
        let ret = self.ty(ret);
        let params = params.iter().map(|p| self.ty(&p.ty)).collect();
        self.b.function_type(ret, params, varargs)
    }

    fn ty(&mut self, ty: &llvm_ir::TypeRef) -> TypeId {
        let key = ty.as_ref() as *const llvm_ir::Type;
        if let Some(id) = self.type_cache.get(&key) {
            return *id;
        }
        let id = match ty.as_ref() {
            llvm_ir::Type::VoidType => self.b.void_type(),
            llvm_ir::Type::IntegerType { bits } => self.b.int_type(*bits),
            llvm_ir::Type::PointerType { pointee_type, .. } => {
                let pointee = self.ty(pointee_type);
                self.b.pointer_type(pointee)
            }
            llvm_ir::Type::FPType(precision) => {
                let bits = match precision {
                    llvm_ir::types::FPType::Half | llvm_ir::types::FPType::BFloat => 16,
                    llvm_ir::types::FPType::Single => 32,
                    llvm_ir::types::FPType::Double => 64,
                    _ => 128,
                };
                self.b
                    .types()
                    .intern(super::types::Type::Float { bits })
            }
            llvm_ir::Type::FuncType {
                result_type,
                param_types,
                is_var_arg,
            } => {
                let ret = self.ty(result_type);
                let params = param_types.iter().map(|p| self.ty(p)).collect();
                self.b.function_type(ret, params, *is_var_arg)
            }
            llvm_ir::Type::ArrayType {
                element_type,
                num_elements,
            } => {
                let element = self.ty(element_type);
                self.b.array_type(element, *num_elements as u64)
            }
            llvm_ir::Type::VectorType {
                element_type,
                num_elements,
                ..
            } => {
                let element = self.ty(element_type);
                let len = *num_elements as u64;
                self.b
                    .types()
                    .intern(super::types::Type::Vector { element, len })
            }
            llvm_ir::Type::StructType {
                element_types,
                is_packed,
            } => {
                let fields: Vec<TypeId> = element_types.iter().map(|t| self.ty(t)).collect();
                let packed = *is_packed;
                self.b
                    .types()
                    .intern(super::types::Type::Struct { fields, packed })
            }
            llvm_ir::Type::NamedStructType { name } => return self.named_struct(name),
            _ => self.b.types().intern(super::types::Type::Opaque),
        };
        self.type_cache.insert(key, id);
        id
    }

    fn named_struct(&mut self, name: &str) -> TypeId {
        if let Some(id) = self.named_structs.get(name) {
            return *id;
        }
        // Reserve first so a recursive body finds the slot.
        let id = self.b.named_struct_type();
        self.named_structs.insert(name.to_string(), id);
        if let Some(llvm_ir::types::NamedStructDef::Defined(body)) =
            self.src.types.named_struct_def(name)
        {
            let body = body.clone();
            if let llvm_ir::Type::StructType { element_types, .. } = body.as_ref() {
                let fields: Vec<TypeId> = element_types.iter().map(|t| self.ty(t)).collect();
                self.b.set_struct_body(id, fields);
            }
        }
        id
    }

    fn constant(&mut self, c: &llvm_ir::ConstantRef) -> ValueId {
        match c.as_ref() {
            llvm_ir::Constant::GlobalReference { name, .. } => {
                let name = name_to_string(name);
                if let Some(v) = self.globals.get(&name) {
                    *v
                } else if let Some(f) = self.functions.get(&name) {
                    self.b.func_value(*f)
                } else {
                    // Aliases and ifuncs end up here; model them as unknown.
                    let ty = self.constant_ty(c);
                    self.b.const_other(ty)
                }
            }
            llvm_ir::Constant::Int { bits, value } => {
                let ty = self.b.int_type(*bits);
                self.b.const_int(ty, *value as i64)
            }
            llvm_ir::Constant::Null(ty) => {
                let ty = self.ty(ty);
                self.b.const_null(ty)
            }
            llvm_ir::Constant::BitCast(bc) => {
                let base = self.constant(&bc.operand);
                let to_ty = self.ty(&bc.to_type);
                self.b.const_bitcast(base, to_ty)
            }
            llvm_ir::Constant::GetElementPtr(gep) => {
                let base = self.constant(&gep.address);
                // Approximate the result type by the base type; the analysis
                // only ever strips this wrapper.
                let ty = self.value_ty(base);
                self.b.const_gep(base, ty)
            }
            _ => {
                let ty = self.constant_ty(c);
                self.b.const_other(ty)
            }
        }
    }

    fn constant_ty(&mut self, c: &llvm_ir::ConstantRef) -> TypeId {
        let ty = c.get_type(&self.src.types);
        self.ty(&ty)
    }

    fn value_ty(&mut self, v: ValueId) -> TypeId {
        // Builder access shim; values are append-only so this is safe to
        // read mid-construction.
        self.b.value_type(v)
    }

    fn function_body(&mut self, id: FuncId, f: &llvm_ir::Function) -> Result<(), LowerError> {
        let mut locals: HashMap<Name, ValueId> = HashMap::new();
        for (i, p) in f.parameters.iter().enumerate() {
            locals.insert(p.name.clone(), self.b.param(id, i));
        }

        // First pass: reserve a slot per instruction in traversal order so
        // operands can refer forward (phis). Terminators with results
        // (invoke) get an opaque slot so later uses still resolve; only
        // `ret` carries pointer semantics.
        let mut slots: Vec<ValueId> = Vec::new();
        let mut ret_slots: Vec<Option<ValueId>> = Vec::new();
        for bb in &f.basic_blocks {
            for i in &bb.instrs {
                let ty = i.get_type(&self.src.types);
                let ty = self.ty(&ty);
                let slot = self.b.reserve(id, ty);
                if let Some(dest) = i.try_get_result() {
                    locals.insert(dest.clone(), slot);
                }
                slots.push(slot);
            }
            match &bb.term {
                llvm_ir::Terminator::Ret(_) => {
                    let void = self.b.void_type();
                    ret_slots.push(Some(self.b.reserve(id, void)));
                }
                t => {
                    if let Some(dest) = t.try_get_result() {
                        let ty = t.get_type(&self.src.types);
                        let ty = self.ty(&ty);
                        let slot = self.b.reserve(id, ty);
                        locals.insert(dest.clone(), slot);
                    }
                    ret_slots.push(None);
                }
            }
        }

        let mut slot_iter = slots.into_iter();
        for (bb, ret_slot) in f.basic_blocks.iter().zip(ret_slots) {
            for i in &bb.instrs {
                let slot = slot_iter.next().expect("slot per instruction");
                let inst = self.instruction(i, &locals)?;
                self.b.fill(slot, inst);
            }
            if let (llvm_ir::Terminator::Ret(r), Some(slot)) = (&bb.term, ret_slot) {
                let value = match &r.return_operand {
                    Some(op) => Some(self.operand(op, &locals)?),
                    None => None,
                };
                self.b.fill(slot, Inst::Ret { value });
            }
        }
        Ok(())
    }

    fn operand(
        &mut self,
        op: &llvm_ir::Operand,
        locals: &HashMap<Name, ValueId>,
    ) -> Result<ValueId, LowerError> {
        match op {
            llvm_ir::Operand::LocalOperand { name, .. } => locals
                .get(name)
                .copied()
                .ok_or_else(|| LowerError(format!("bad local: {}", name))),
            llvm_ir::Operand::ConstantOperand(c) => Ok(self.constant(c)),
            llvm_ir::Operand::MetadataOperand => {
                let ty = self.b.types().intern(super::types::Type::Opaque);
                Ok(self.b.const_other(ty))
            }
        }
    }

    fn instruction(
        &mut self,
        i: &llvm_ir::Instruction,
        locals: &HashMap<Name, ValueId>,
    ) -> Result<Inst, LowerError> {
        Ok(match i {
            llvm_ir::Instruction::Alloca(a) => {
                let allocated = self.ty(&a.allocated_type);
                let array = match &a.num_elements {
                    llvm_ir::Operand::ConstantOperand(c) => {
                        !matches!(c.as_ref(), llvm_ir::Constant::Int { value: 1, .. })
                    }
                    _ => true,
                };
                Inst::Alloca { allocated, array }
            }
            llvm_ir::Instruction::Load(l) => Inst::Load {
                ptr: self.operand(&l.address, locals)?,
            },
            llvm_ir::Instruction::Store(s) => Inst::Store {
                val: self.operand(&s.value, locals)?,
                ptr: self.operand(&s.address, locals)?,
            },
            llvm_ir::Instruction::GetElementPtr(g) => {
                let base = self.operand(&g.address, locals)?;
                let mut indices = Vec::with_capacity(g.indices.len());
                for idx in &g.indices {
                    indices.push(self.operand(idx, locals)?);
                }
                Inst::Gep { base, indices }
            }
            llvm_ir::Instruction::BitCast(b) => Inst::BitCast {
                op: self.operand(&b.operand, locals)?,
            },
            llvm_ir::Instruction::Phi(p) => {
                let mut incoming = Vec::with_capacity(p.incoming_values.len());
                for (op, _) in &p.incoming_values {
                    incoming.push(self.operand(op, locals)?);
                }
                Inst::Phi { incoming }
            }
            llvm_ir::Instruction::Select(s) => Inst::Select {
                on_true: self.operand(&s.true_value, locals)?,
                on_false: self.operand(&s.false_value, locals)?,
            },
            llvm_ir::Instruction::Call(c) => {
                let mut args = Vec::with_capacity(c.arguments.len());
                for (op, _) in &c.arguments {
                    args.push(self.operand(op, locals)?);
                }
                match &c.function {
                    Either::Left(_asm) => {
                        let void = self.b.void_type();
                        let fn_ty = self.b.function_type(void, Vec::new(), true);
                        Inst::Call(CallInst {
                            callee: Callee::Asm,
                            args,
                            fn_ty,
                        })
                    }
                    Either::Right(op) => {
                        let callee = self.operand(op, locals)?;
                        let fn_ty = {
                            let ty = op.get_type(&self.src.types);
                            let ty = self.ty(&ty);
                            self.b.types().pointee(ty).ok_or_else(|| {
                                LowerError("call through non-pointer callee".to_string())
                            })?
                        };
                        let callee = if self.b.is_function_value(callee) {
                            Callee::Function(callee)
                        } else {
                            Callee::Value(callee)
                        };
                        Inst::Call(CallInst {
                            callee,
                            args,
                            fn_ty,
                        })
                    }
                }
            }
            _ => Inst::Other,
        })
    }
}
