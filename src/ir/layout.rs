// SPDX-License-Identifier: BSD-3-Clause
//! Data-layout queries over the interned type table: store sizes, allocation
//! sizes, and struct field offsets. Fixed 8-byte pointers and natural
//! alignment; the analysis needs byte offsets, not a full target description.

use super::types::{Type, TypeId, TypeTable};

const POINTER_SIZE: u64 = 8;

fn round_up(value: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

impl TypeTable {
    /// ABI alignment in bytes.
    pub fn abi_align(&self, id: TypeId) -> u64 {
        match self.get(id) {
            Type::Void | Type::Opaque | Type::Function { .. } => 1,
            Type::Int { bits } | Type::Float { bits } => {
                let bytes = u64::from(*bits).div_ceil(8).max(1);
                bytes.next_power_of_two().min(POINTER_SIZE)
            }
            Type::Pointer { .. } => POINTER_SIZE,
            Type::Array { element, .. } | Type::Vector { element, .. } => self.abi_align(*element),
            Type::Struct { fields, packed } => {
                if *packed {
                    1
                } else {
                    fields.iter().map(|f| self.abi_align(*f)).max().unwrap_or(1)
                }
            }
        }
    }

    /// Number of bytes written by a store of this type.
    pub fn store_size(&self, id: TypeId) -> u64 {
        match self.get(id) {
            Type::Void | Type::Opaque | Type::Function { .. } => 0,
            Type::Int { bits } | Type::Float { bits } => u64::from(*bits).div_ceil(8),
            Type::Pointer { .. } => POINTER_SIZE,
            Type::Array { element, len } | Type::Vector { element, len } => {
                self.alloc_size(*element) * len
            }
            Type::Struct { .. } => self.struct_size(id),
        }
    }

    /// Bytes an object of this type occupies in memory, including tail
    /// padding.
    pub fn alloc_size(&self, id: TypeId) -> u64 {
        round_up(self.store_size(id), self.abi_align(id))
    }

    /// Byte offset of field `idx` in a struct type.
    ///
    /// Panics if `id` is not a struct or `idx` is out of range; callers only
    /// reach this through constant GEP indices, which LLVM verifies.
    pub fn struct_field_offset(&self, id: TypeId, idx: usize) -> u64 {
        match self.get(id) {
            Type::Struct { fields, packed } => {
                let mut offset = 0;
                for (i, field) in fields.iter().enumerate() {
                    if !packed {
                        offset = round_up(offset, self.abi_align(*field));
                    }
                    if i == idx {
                        return offset;
                    }
                    offset += self.alloc_size(*field);
                }
                panic!("struct field index {} out of range", idx)
            }
            _ => panic!("struct_field_offset on non-struct type"),
        }
    }

    fn struct_size(&self, id: TypeId) -> u64 {
        match self.get(id) {
            Type::Struct { fields, packed } => {
                let mut offset = 0;
                for field in fields {
                    if !packed {
                        offset = round_up(offset, self.abi_align(*field));
                    }
                    offset += self.alloc_size(*field);
                }
                offset
            }
            _ => unreachable!(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_sizes() {
        let mut table = TypeTable::new();
        let i1 = table.int(1);
        let i32t = table.int(32);
        let i64t = table.int(64);
        let p = table.pointer(i32t);
        assert_eq!(table.store_size(i1), 1);
        assert_eq!(table.store_size(i32t), 4);
        assert_eq!(table.store_size(i64t), 8);
        assert_eq!(table.store_size(p), 8);
        assert_eq!(table.abi_align(p), 8);
    }

    #[test]
    fn struct_layout_with_padding() {
        let mut table = TypeTable::new();
        let i8t = table.int(8);
        let i32t = table.int(32);
        let i64t = table.int(64);
        // { i8, i32, i64 } -> offsets 0, 4, 8; size 16
        let s = table.strukt(vec![i8t, i32t, i64t]);
        assert_eq!(table.struct_field_offset(s, 0), 0);
        assert_eq!(table.struct_field_offset(s, 1), 4);
        assert_eq!(table.struct_field_offset(s, 2), 8);
        assert_eq!(table.alloc_size(s), 16);
    }

    #[test]
    fn array_of_structs() {
        let mut table = TypeTable::new();
        let i8t = table.int(8);
        let i32t = table.int(32);
        // { i32, i8 } has alloc size 8 because of tail padding
        let s = table.strukt(vec![i32t, i8t]);
        assert_eq!(table.alloc_size(s), 8);
        let a = table.array(s, 4);
        assert_eq!(table.alloc_size(a), 32);
    }
}
