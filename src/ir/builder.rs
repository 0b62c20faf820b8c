// SPDX-License-Identifier: BSD-3-Clause
//! Programmatic module construction. The bitcode front-end drives this to
//! lower a parsed LLVM module; tests and benches drive it to make inputs
//! without an LLVM toolchain in the loop.

use std::collections::HashMap;

use super::types::{Type, TypeId};
use super::{
    Callee, CallInst, ConstExpr, ConstExprOp, FuncId, Function, Global, GlobalId, Inst, Module,
    Value, ValueId, ValueKind,
};

#[derive(Debug, Default)]
pub struct ModuleBuilder {
    module: Module,
    nulls: HashMap<TypeId, ValueId>,
    ints: HashMap<(TypeId, i64), ValueId>,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(self) -> Module {
        self.module
    }

    pub fn types(&mut self) -> &mut super::TypeTable {
        &mut self.module.types
    }

    // ------------------------------------------------------------------
    // Types

    pub fn void_type(&mut self) -> TypeId {
        self.module.types.void()
    }

    pub fn int_type(&mut self, bits: u32) -> TypeId {
        self.module.types.int(bits)
    }

    pub fn pointer_type(&mut self, pointee: TypeId) -> TypeId {
        self.module.types.pointer(pointee)
    }

    pub fn array_type(&mut self, element: TypeId, len: u64) -> TypeId {
        self.module.types.array(element, len)
    }

    pub fn struct_type(&mut self, fields: Vec<TypeId>) -> TypeId {
        self.module.types.strukt(fields)
    }

    pub fn named_struct_type(&mut self) -> TypeId {
        self.module.types.named_struct()
    }

    pub fn set_struct_body(&mut self, id: TypeId, fields: Vec<TypeId>) {
        self.module.types.set_struct_body(id, fields, false);
    }

    pub fn function_type(&mut self, ret: TypeId, params: Vec<TypeId>, varargs: bool) -> TypeId {
        self.module.types.function(ret, params, varargs)
    }

    // ------------------------------------------------------------------
    // Constants

    pub fn const_null(&mut self, ptr_ty: TypeId) -> ValueId {
        debug_assert!(self.module.types.is_pointer(ptr_ty));
        if let Some(v) = self.nulls.get(&ptr_ty) {
            return *v;
        }
        let v = self.push_value(ptr_ty, ValueKind::Null);
        self.nulls.insert(ptr_ty, v);
        v
    }

    pub fn const_int(&mut self, ty: TypeId, value: i64) -> ValueId {
        if let Some(v) = self.ints.get(&(ty, value)) {
            return *v;
        }
        let v = self.push_value(ty, ValueKind::Int(value));
        self.ints.insert((ty, value), v);
        v
    }

    pub fn const_bitcast(&mut self, base: ValueId, to_ty: TypeId) -> ValueId {
        self.push_value(
            to_ty,
            ValueKind::Expr(ConstExpr {
                op: ConstExprOp::BitCast,
                base,
            }),
        )
    }

    pub fn const_gep(&mut self, base: ValueId, ty: TypeId) -> ValueId {
        self.push_value(
            ty,
            ValueKind::Expr(ConstExpr {
                op: ConstExprOp::Gep,
                base,
            }),
        )
    }

    /// A constant the analysis has no model for (undef, aggregates, ...).
    pub fn const_other(&mut self, ty: TypeId) -> ValueId {
        self.push_value(ty, ValueKind::Other)
    }

    // ------------------------------------------------------------------
    // Globals and functions

    pub fn global(&mut self, name: &str, allocated: TypeId) -> ValueId {
        let id = GlobalId(self.module.globals.len() as u32);
        let ptr_ty = self.module.types.pointer(allocated);
        let value = self.push_value(ptr_ty, ValueKind::Global(id));
        self.module.globals.push(Global {
            name: name.to_string(),
            value,
            ty: allocated,
            is_const: false,
            init: None,
        });
        value
    }

    pub fn set_global_init(&mut self, global: ValueId, init: ValueId) {
        match self.module.value(global).kind {
            ValueKind::Global(g) => self.module.globals[g.0 as usize].init = Some(init),
            _ => panic!("set_global_init on non-global value"),
        }
    }

    pub fn set_global_const(&mut self, global: ValueId, is_const: bool) {
        match self.module.value(global).kind {
            ValueKind::Global(g) => self.module.globals[g.0 as usize].is_const = is_const,
            _ => panic!("set_global_const on non-global value"),
        }
    }

    /// Create a function (and its parameter values) from a `Type::Function`
    /// signature. Declarations get parameters too; argument-passing rules
    /// are emitted for externs just like for definitions.
    pub fn function(&mut self, name: &str, fn_ty: TypeId, defined: bool) -> FuncId {
        let id = FuncId(self.module.functions.len() as u32);
        let ptr_ty = self.module.types.pointer(fn_ty);
        let value = self.push_value(ptr_ty, ValueKind::Function(id));
        let param_tys = match self.module.types.get(fn_ty) {
            Type::Function { params, .. } => params.clone(),
            _ => panic!("function created with non-function type"),
        };
        let params = param_tys
            .into_iter()
            .enumerate()
            .map(|(index, ty)| {
                self.push_value(
                    ty,
                    ValueKind::Param {
                        function: id,
                        index,
                    },
                )
            })
            .collect();
        self.module.functions.push(Function {
            name: name.to_string(),
            value,
            ty: fn_ty,
            params,
            body: Vec::new(),
            is_declaration: !defined,
        });
        id
    }

    pub fn func_value(&self, f: FuncId) -> ValueId {
        self.module.function(f).value
    }

    pub fn value_type(&self, v: ValueId) -> TypeId {
        self.module.value(v).ty
    }

    pub fn is_function_value(&self, v: ValueId) -> bool {
        self.module.is_function(v)
    }

    pub fn param(&self, f: FuncId, index: usize) -> ValueId {
        self.module.function(f).params[index]
    }

    // ------------------------------------------------------------------
    // Instructions

    /// Append a placeholder instruction; `fill` attaches the real opcode
    /// later. This two-phase shape lets the front-end register results
    /// before lowering operands, since the IR references values before
    /// their definitions (phis).
    pub fn reserve(&mut self, f: FuncId, ty: TypeId) -> ValueId {
        let v = self.push_value(ty, ValueKind::Inst(Inst::Other));
        self.module.functions[f.0 as usize].body.push(v);
        v
    }

    pub fn fill(&mut self, v: ValueId, inst: Inst) {
        match &mut self.module.values[v.0 as usize].kind {
            ValueKind::Inst(slot) => *slot = inst,
            _ => panic!("fill on non-instruction value"),
        }
    }

    pub fn alloca(&mut self, f: FuncId, allocated: TypeId) -> ValueId {
        self.alloca_impl(f, allocated, false)
    }

    pub fn alloca_array(&mut self, f: FuncId, allocated: TypeId) -> ValueId {
        self.alloca_impl(f, allocated, true)
    }

    fn alloca_impl(&mut self, f: FuncId, allocated: TypeId, array: bool) -> ValueId {
        let ty = self.module.types.pointer(allocated);
        let v = self.reserve(f, ty);
        self.fill(v, Inst::Alloca { allocated, array });
        v
    }

    pub fn load(&mut self, f: FuncId, ptr: ValueId) -> ValueId {
        let ty = self
            .module
            .types
            .pointee(self.module.value(ptr).ty)
            .expect("load from non-pointer");
        let v = self.reserve(f, ty);
        self.fill(v, Inst::Load { ptr });
        v
    }

    pub fn store(&mut self, f: FuncId, val: ValueId, ptr: ValueId) -> ValueId {
        let ty = self.void_type();
        let v = self.reserve(f, ty);
        self.fill(v, Inst::Store { val, ptr });
        v
    }

    pub fn gep(&mut self, f: FuncId, base: ValueId, indices: Vec<ValueId>) -> ValueId {
        let ty = self.gep_result_type(base, &indices);
        let v = self.reserve(f, ty);
        self.fill(v, Inst::Gep { base, indices });
        v
    }

    /// GEP with constant `i64` indices.
    pub fn gep_const(&mut self, f: FuncId, base: ValueId, indices: &[i64]) -> ValueId {
        let i64t = self.int_type(64);
        let indices = indices.iter().map(|&i| self.const_int(i64t, i)).collect();
        self.gep(f, base, indices)
    }

    pub fn bitcast(&mut self, f: FuncId, op: ValueId, to_ty: TypeId) -> ValueId {
        let v = self.reserve(f, to_ty);
        self.fill(v, Inst::BitCast { op });
        v
    }

    pub fn phi(&mut self, f: FuncId, ty: TypeId, incoming: Vec<ValueId>) -> ValueId {
        let v = self.reserve(f, ty);
        self.fill(v, Inst::Phi { incoming });
        v
    }

    pub fn select(&mut self, f: FuncId, on_true: ValueId, on_false: ValueId) -> ValueId {
        let ty = self.module.value(on_true).ty;
        let v = self.reserve(f, ty);
        self.fill(v, Inst::Select { on_true, on_false });
        v
    }

    pub fn call(&mut self, f: FuncId, callee: FuncId, args: Vec<ValueId>) -> ValueId {
        let fn_ty = self.module.function(callee).ty;
        let callee = self.func_value(callee);
        self.call_impl(f, Callee::Function(callee), args, fn_ty)
    }

    pub fn call_indirect(&mut self, f: FuncId, callee: ValueId, args: Vec<ValueId>) -> ValueId {
        let fn_ty = self
            .module
            .types
            .pointee(self.module.value(callee).ty)
            .expect("indirect call through non-pointer");
        self.call_impl(f, Callee::Value(callee), args, fn_ty)
    }

    pub fn call_asm(&mut self, f: FuncId, fn_ty: TypeId, args: Vec<ValueId>) -> ValueId {
        self.call_impl(f, Callee::Asm, args, fn_ty)
    }

    fn call_impl(
        &mut self,
        f: FuncId,
        callee: Callee,
        args: Vec<ValueId>,
        fn_ty: TypeId,
    ) -> ValueId {
        let ret = self
            .module
            .types
            .return_type(fn_ty)
            .expect("call through non-function type");
        let v = self.reserve(f, ret);
        self.fill(
            v,
            Inst::Call(CallInst {
                callee,
                args,
                fn_ty,
            }),
        );
        v
    }

    pub fn ret(&mut self, f: FuncId, value: Option<ValueId>) -> ValueId {
        let ty = self.void_type();
        let v = self.reserve(f, ty);
        self.fill(v, Inst::Ret { value });
        v
    }

    pub fn other(&mut self, f: FuncId, ty: TypeId) -> ValueId {
        self.reserve(f, ty)
    }

    // ------------------------------------------------------------------

    fn push_value(&mut self, ty: TypeId, kind: ValueKind) -> ValueId {
        let v = ValueId(self.module.values.len() as u32);
        self.module.values.push(Value { ty, kind });
        v
    }

    /// Result type of a GEP over `base` with the given indices: the first
    /// index steps over the pointee, the rest descend into aggregates.
    fn gep_result_type(&mut self, base: ValueId, indices: &[ValueId]) -> TypeId {
        let mut cur = self
            .module
            .types
            .pointee(self.module.value(base).ty)
            .expect("GEP of non-pointer");
        for &idx in indices.iter().skip(1) {
            cur = match self.module.types.get(cur) {
                Type::Struct { fields, .. } => {
                    let i = self.module.constant_int(idx).unwrap_or(0) as usize;
                    fields[i]
                }
                Type::Array { element, .. } | Type::Vector { element, .. } => *element,
                _ => cur,
            };
        }
        self.module.types.pointer(cur)
    }
}
