// SPDX-License-Identifier: BSD-3-Clause
//! Representation of a module that is amenable to the analysis. The LLVM AST
//! is re-modeled rather than analyzed in place: the solver keys a large map
//! by value identity, so every value lives in a module-owned arena and is
//! addressed by a `Copy` integer handle instead of a pointer into the AST.
//!
//! The surface the analysis consumes is deliberately narrow: value identity,
//! types and layout, the extra-reference flag, constant-expression stripping,
//! intrinsic classification, and ordered iteration over instructions.

use std::fmt::Display;

pub mod builder;
pub mod layout;
pub mod lower;
pub mod types;

pub use builder::ModuleBuilder;
pub use lower::LowerError;
pub use types::{Type, TypeId, TypeTable};

/// Stable identity of an IR-level value. Two values are the same iff their
/// handles are equal.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ValueId(pub(crate) u32);

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct FuncId(pub(crate) u32);

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct GlobalId(pub(crate) u32);

#[derive(Debug)]
pub struct Value {
    pub ty: TypeId,
    pub kind: ValueKind,
}

#[derive(Debug)]
pub enum ValueKind {
    Global(GlobalId),
    Function(FuncId),
    Param { function: FuncId, index: usize },
    Inst(Inst),
    Null,
    Int(i64),
    Expr(ConstExpr),
    /// Undef, aggregate constants, metadata: nothing the analysis tracks.
    Other,
}

/// Pointer-valued constant-expression wrapper. The analysis never looks at
/// the operation itself, only through it (`elim_const_expr`).
#[derive(Debug)]
pub struct ConstExpr {
    pub op: ConstExprOp,
    pub base: ValueId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstExprOp {
    BitCast,
    Gep,
}

#[derive(Debug)]
pub enum Inst {
    Alloca {
        allocated: TypeId,
        /// Whether the alloca has a non-constant-one element count.
        array: bool,
    },
    Load {
        ptr: ValueId,
    },
    Store {
        val: ValueId,
        ptr: ValueId,
    },
    Gep {
        base: ValueId,
        indices: Vec<ValueId>,
    },
    BitCast {
        op: ValueId,
    },
    Phi {
        incoming: Vec<ValueId>,
    },
    Select {
        on_true: ValueId,
        on_false: ValueId,
    },
    Call(CallInst),
    Ret {
        value: Option<ValueId>,
    },
    /// Anything without pointer semantics; present only to keep per-function
    /// instruction order intact.
    Other,
}

#[derive(Debug)]
pub struct CallInst {
    pub callee: Callee,
    pub args: Vec<ValueId>,
    /// Function type of the callee prototype. For indirect calls this is the
    /// pointee of the callee operand's type.
    pub fn_ty: TypeId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Callee {
    /// Direct call; the value is a `ValueKind::Function`.
    Function(ValueId),
    /// Indirect call through the given operand.
    Value(ValueId),
    Asm,
}

#[derive(Debug)]
pub struct Function {
    pub name: String,
    pub value: ValueId,
    /// The `Type::Function` signature.
    pub ty: TypeId,
    pub params: Vec<ValueId>,
    /// Instruction values in traversal order; empty for declarations.
    pub body: Vec<ValueId>,
    pub is_declaration: bool,
}

#[derive(Debug)]
pub struct Global {
    pub name: String,
    pub value: ValueId,
    /// Type of the allocated object (the value itself has pointer type).
    pub ty: TypeId,
    pub is_const: bool,
    pub init: Option<ValueId>,
}

#[derive(Debug, Default)]
pub struct Module {
    pub types: TypeTable,
    pub(crate) values: Vec<Value>,
    pub functions: Vec<Function>,
    pub globals: Vec<Global>,
}

/// Functions the analysis models as the memory allocator.
const ALLOCATORS: &[&str] = &["malloc", "calloc", "realloc", "reallocarray", "_Znwm", "_Znam"];

const DEALLOCATORS: &[&str] = &["free", "_ZdlPv", "_ZdaPv"];

fn is_memory_copy_name(name: &str) -> bool {
    matches!(name, "memcpy" | "memmove" | "memset")
        || name.starts_with("llvm.memcpy")
        || name.starts_with("llvm.memmove")
        || name.starts_with("llvm.memset")
}

impl Module {
    pub fn value(&self, v: ValueId) -> &Value {
        &self.values[v.0 as usize]
    }

    pub fn function(&self, f: FuncId) -> &Function {
        &self.functions[f.0 as usize]
    }

    pub fn global(&self, g: GlobalId) -> &Global {
        &self.globals[g.0 as usize]
    }

    pub fn inst(&self, v: ValueId) -> Option<&Inst> {
        match &self.value(v).kind {
            ValueKind::Inst(i) => Some(i),
            _ => None,
        }
    }

    pub fn is_pointer_value(&self, v: ValueId) -> bool {
        self.types.is_pointer(self.value(v).ty)
    }

    /// Whether `v` denotes an address rather than a held pointer: globals,
    /// stack allocations, and function symbols.
    pub fn has_extra_reference(&self, v: ValueId) -> bool {
        matches!(
            self.value(v).kind,
            ValueKind::Global(_) | ValueKind::Function(_) | ValueKind::Inst(Inst::Alloca { .. })
        )
    }

    /// Strip constant-expression wrappers down to the underlying value.
    pub fn elim_const_expr(&self, mut v: ValueId) -> ValueId {
        while let ValueKind::Expr(e) = &self.value(v).kind {
            v = e.base;
        }
        v
    }

    pub fn is_null(&self, v: ValueId) -> bool {
        matches!(self.value(v).kind, ValueKind::Null)
    }

    pub fn is_function(&self, v: ValueId) -> bool {
        matches!(self.value(v).kind, ValueKind::Function(_))
    }

    pub fn constant_int(&self, v: ValueId) -> Option<i64> {
        match self.value(v).kind {
            ValueKind::Int(i) => Some(i),
            _ => None,
        }
    }

    pub fn is_memory_allocation(&self, v: ValueId) -> bool {
        self.function_name(v)
            .is_some_and(|n| ALLOCATORS.contains(&n))
    }

    pub fn is_memory_deallocation(&self, v: ValueId) -> bool {
        self.function_name(v)
            .is_some_and(|n| DEALLOCATORS.contains(&n))
    }

    /// Allocation, deallocation, or other memory-management intrinsic.
    pub fn is_memory_man_stuff(&self, v: ValueId) -> bool {
        self.function_name(v).is_some_and(|n| {
            ALLOCATORS.contains(&n) || DEALLOCATORS.contains(&n) || is_memory_copy_name(n)
        })
    }

    pub fn call_to_memory_man_stuff(&self, call: &CallInst) -> bool {
        match call.callee {
            Callee::Function(f) => self.is_memory_man_stuff(f),
            _ => false,
        }
    }

    /// Function type of the call's callee, direct or indirect.
    pub fn callee_prototype(&self, call: &CallInst) -> TypeId {
        call.fn_ty
    }

    /// Classify an instruction as one the rule extractor handles directly.
    pub fn is_pointer_manipulation(&self, v: ValueId) -> bool {
        match self.inst(v) {
            Some(Inst::Alloca { .. }) => true,
            Some(Inst::Gep { .. }) => true,
            Some(Inst::Load { .. }) => self.is_pointer_value(v),
            Some(Inst::Store { val, .. }) => self.is_pointer_value(*val),
            Some(Inst::BitCast { op }) => self.is_pointer_value(v) && self.is_pointer_value(*op),
            Some(Inst::Phi { .. }) | Some(Inst::Select { .. }) => self.is_pointer_value(v),
            Some(Inst::Call(c)) => self.call_to_memory_man_stuff(c),
            _ => false,
        }
    }

    /// Global whose initializer assigns a pointer.
    pub fn is_global_pointer_initialization(&self, g: &Global) -> bool {
        g.init.is_some() && self.types.is_pointer(g.ty)
    }

    pub fn has_inline_assembly(&self) -> bool {
        self.functions.iter().flat_map(|f| &f.body).any(|&v| {
            matches!(
                self.inst(v),
                Some(Inst::Call(CallInst {
                    callee: Callee::Asm,
                    ..
                }))
            )
        })
    }

    /// Constant byte offset of a GEP instruction: the sum over constant
    /// indices of field offsets (struct steps) and scaled element sizes
    /// (sequential steps). Non-constant indices contribute zero. The flag
    /// reports whether any non-zero sequential index was taken.
    pub fn accumulate_constant_offset(&self, gep: ValueId) -> (i64, bool) {
        let Some(Inst::Gep { base, indices }) = self.inst(gep) else {
            panic!("accumulate_constant_offset on non-GEP value");
        };
        let mut off: i64 = 0;
        let mut is_array = false;
        // The first index steps over the pointee as if it were an array
        // element; later indices descend into aggregates.
        let Some(mut cur) = self.types.pointee(self.value(*base).ty) else {
            return (0, false);
        };
        for (i, &idx) in indices.iter().enumerate() {
            if i == 0 {
                if let Some(c) = self.constant_int(idx) {
                    if c != 0 {
                        off += c * self.types.store_size(cur) as i64;
                        is_array = true;
                    }
                }
                continue;
            }
            match self.types.get(cur) {
                Type::Struct { fields, .. } => {
                    let field = self.constant_int(idx).unwrap_or(0) as usize;
                    if field != 0 {
                        off += self.types.struct_field_offset(cur, field) as i64;
                    }
                    cur = fields[field];
                }
                Type::Array { element, .. } | Type::Vector { element, .. } => {
                    let element = *element;
                    if let Some(c) = self.constant_int(idx) {
                        if c != 0 {
                            off += c * self.types.store_size(element) as i64;
                            is_array = true;
                        }
                    }
                    cur = element;
                }
                _ => break,
            }
        }
        (off, is_array)
    }

    fn function_name(&self, v: ValueId) -> Option<&str> {
        match self.value(v).kind {
            ValueKind::Function(f) => Some(self.function(f).name.as_str()),
            _ => None,
        }
    }

    pub fn display_value(&self, v: ValueId) -> ValueDisplay<'_> {
        ValueDisplay { module: self, v }
    }
}

/// Prints a value the way the textual IR names it: `@` for globals and
/// functions, `%` for locals, plain spellings for constants.
pub struct ValueDisplay<'m> {
    module: &'m Module,
    v: ValueId,
}

impl Display for ValueDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let m = self.module;
        match &m.value(self.v).kind {
            ValueKind::Global(g) => write!(f, "@{}", m.global(*g).name),
            ValueKind::Function(func) => write!(f, "@{}", m.function(*func).name),
            ValueKind::Param { function, index } => {
                write!(f, "%{}:arg{}", m.function(*function).name, index)
            }
            ValueKind::Inst(_) => write!(f, "%t{}", self.v.0),
            ValueKind::Null => write!(f, "null"),
            ValueKind::Int(i) => write!(f, "{}", i),
            ValueKind::Expr(e) => write!(f, "{}", m.display_value(e.base)),
            ValueKind::Other => write!(f, "%u{}", self.v.0),
        }
    }
}
