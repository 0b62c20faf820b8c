// SPDX-License-Identifier: BSD-3-Clause
use std::collections::HashMap;
use std::fmt::Display;

/// Interned type handle. Structural types are hash-consed, so two
/// structurally equal types always share one `TypeId`; named structs get a
/// fresh slot each (two named structs with identical bodies stay distinct,
/// as in LLVM).
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct TypeId(pub(crate) u32);

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum Type {
    Void,
    Int { bits: u32 },
    Float { bits: u32 },
    Pointer { pointee: TypeId },
    Array { element: TypeId, len: u64 },
    Vector { element: TypeId, len: u64 },
    Struct { fields: Vec<TypeId>, packed: bool },
    Function { ret: TypeId, params: Vec<TypeId>, varargs: bool },
    /// Named struct before its body is attached, metadata, and anything else
    /// the analysis has no use for.
    Opaque,
}

#[derive(Debug, Default)]
pub struct TypeTable {
    types: Vec<Type>,
    interned: HashMap<Type, TypeId>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, ty: Type) -> TypeId {
        if let Some(id) = self.interned.get(&ty) {
            return *id;
        }
        let id = TypeId(self.types.len() as u32);
        self.types.push(ty.clone());
        self.interned.insert(ty, id);
        id
    }

    /// Reserve a slot for a named struct. The slot starts out opaque and is
    /// never hash-consed, which is what allows recursive bodies (the body may
    /// mention a pointer to the slot itself).
    pub fn named_struct(&mut self) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.types.push(Type::Opaque);
        id
    }

    pub fn set_struct_body(&mut self, id: TypeId, fields: Vec<TypeId>, packed: bool) {
        debug_assert!(matches!(self.types[id.0 as usize], Type::Opaque));
        self.types[id.0 as usize] = Type::Struct { fields, packed };
    }

    pub fn get(&self, id: TypeId) -> &Type {
        &self.types[id.0 as usize]
    }

    pub fn void(&mut self) -> TypeId {
        self.intern(Type::Void)
    }

    pub fn int(&mut self, bits: u32) -> TypeId {
        self.intern(Type::Int { bits })
    }

    pub fn pointer(&mut self, pointee: TypeId) -> TypeId {
        self.intern(Type::Pointer { pointee })
    }

    pub fn array(&mut self, element: TypeId, len: u64) -> TypeId {
        self.intern(Type::Array { element, len })
    }

    pub fn strukt(&mut self, fields: Vec<TypeId>) -> TypeId {
        self.intern(Type::Struct {
            fields,
            packed: false,
        })
    }

    pub fn function(&mut self, ret: TypeId, params: Vec<TypeId>, varargs: bool) -> TypeId {
        self.intern(Type::Function {
            ret,
            params,
            varargs,
        })
    }

    pub fn is_pointer(&self, id: TypeId) -> bool {
        matches!(self.get(id), Type::Pointer { .. })
    }

    pub fn pointee(&self, id: TypeId) -> Option<TypeId> {
        match self.get(id) {
            Type::Pointer { pointee } => Some(*pointee),
            _ => None,
        }
    }

    pub fn return_type(&self, id: TypeId) -> Option<TypeId> {
        match self.get(id) {
            Type::Function { ret, .. } => Some(*ret),
            _ => None,
        }
    }

    pub fn display(&self, id: TypeId) -> TypeDisplay<'_> {
        TypeDisplay { table: self, id }
    }
}

pub struct TypeDisplay<'a> {
    table: &'a TypeTable,
    id: TypeId,
}

impl Display for TypeDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.table.get(self.id) {
            Type::Void => write!(f, "void"),
            Type::Int { bits } => write!(f, "i{}", bits),
            Type::Float { bits } => write!(f, "f{}", bits),
            Type::Pointer { pointee } => write!(f, "{}*", self.table.display(*pointee)),
            Type::Array { element, len } => {
                write!(f, "[{} x {}]", len, self.table.display(*element))
            }
            Type::Vector { element, len } => {
                write!(f, "<{} x {}>", len, self.table.display(*element))
            }
            Type::Struct { fields, .. } => {
                write!(f, "{{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", self.table.display(*field))?;
                }
                write!(f, "}}")
            }
            Type::Function {
                ret,
                params,
                varargs,
            } => {
                write!(f, "{} (", self.table.display(*ret))?;
                for (i, p) in params.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", self.table.display(*p))?;
                }
                if *varargs {
                    if !params.is_empty() {
                        write!(f, ", ")?;
                    }
                    write!(f, "...")?;
                }
                write!(f, ")")
            }
            Type::Opaque => write!(f, "opaque"),
        }
    }
}
