// SPDX-License-Identifier: BSD-3-Clause
//! The fixed-point solver: replay the rule sequence over the points-to map
//! until nothing grows. Every rule application is monotone and offsets are
//! bounded (crowding and the array cap), so the loop terminates.

use std::collections::{BTreeMap, BTreeSet};

use crate::analysis::rules::Rule;
use crate::analysis::structure::ProgramStructure;
use crate::ir::{Inst, Module, Type, ValueId};

/// A pointer variable, or a field of one: `(value, offset)`. Offset `-1`
/// means the variable itself.
pub type Pointer = (ValueId, i64);

/// An abstract memory location: `(target, offset)`.
pub type Pointee = (ValueId, i64);

pub type PointsToSet = BTreeSet<Pointee>;

static EMPTY_SET: PointsToSet = PointsToSet::new();

/// The solver's result: each pointer's set of abstract locations. Ordered
/// containers keep iteration deterministic across runs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PointsToSets {
    sets: BTreeMap<Pointer, PointsToSet>,
}

impl PointsToSets {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn entry(&mut self, p: Pointer) -> &mut PointsToSet {
        self.sets.entry(p).or_default()
    }

    pub fn lookup(&self, p: &Pointer) -> Option<&PointsToSet> {
        self.sets.get(p)
    }

    /// The set for `(v, idx)`, or a shared empty set (with a warning) when
    /// the key was never populated.
    pub fn points_to_set(&self, v: ValueId, idx: i64) -> &PointsToSet {
        match self.sets.get(&(v, idx)) {
            Some(s) => s,
            None => {
                tracing::warn!(value = ?v, idx, "no points-to set has been found");
                &EMPTY_SET
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Pointer, &PointsToSet)> {
        self.sets.iter()
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

impl<'a> IntoIterator for &'a PointsToSets {
    type Item = (&'a Pointer, &'a PointsToSet);
    type IntoIter = std::collections::btree_map::Iter<'a, Pointer, PointsToSet>;

    fn into_iter(self) -> Self::IntoIter {
        self.sets.iter()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PruneMode {
    /// Remove entries keyed by function symbols; a function is only ever a
    /// pointee.
    #[default]
    Functions,
    /// Additionally drop pointees whose pointed-to type differs from the
    /// key's. Prunes too much (it ignores bitcasts in the code); kept
    /// selectable, never the default.
    FunctionsAndTypes,
}

/// Run the solver to its fixed point and prune, producing the final map.
pub fn compute_points_to_sets(module: &Module, program: &ProgramStructure) -> PointsToSets {
    let mut sets = PointsToSets::new();
    fixpoint(module, program, &mut sets);
    prune_by_type(module, &mut sets, PruneMode::default());
    sets
}

pub fn fixpoint(module: &Module, program: &ProgramStructure, sets: &mut PointsToSets) {
    loop {
        let mut change = false;
        for rule in program {
            change |= apply_rule(module, sets, rule);
        }
        if !change {
            break;
        }
    }
}

/// Apply one rule; true iff some set grew.
pub fn apply_rule(module: &Module, s: &mut PointsToSets, rule: &Rule) -> bool {
    match *rule {
        Rule::AsgnAlloc { l, site } => insert_one(s, (l, -1), (site, 0)),
        Rule::AsgnNull { l, null } => insert_one(s, (l, -1), (null, 0)),
        Rule::AsgnVar { l, r } => apply_copy(s, l, r),
        Rule::AsgnGep { l, r } => apply_gep(module, s, l, r),
        Rule::AsgnRef { l, r } => insert_one(s, (l, -1), (r, 0)),
        Rule::AsgnDeref { l, r } => apply_load(s, (l, -1), r),
        Rule::DerefAsgnNull { l, null } => apply_store_one(s, l, (null, 0)),
        Rule::DerefAsgnVar { l, r } => apply_store(s, l, r),
        Rule::DerefAsgnRef { l, r } => apply_store_one(s, l, (r, 0)),
        Rule::DerefAsgnDeref { l, r } => apply_store_load(s, l, r),
        Rule::Dealloc { .. } => false,
    }
}

pub fn prune_by_type(module: &Module, s: &mut PointsToSets, mode: PruneMode) {
    s.sets.retain(|(v, _), _| !module.is_function(*v));
    if mode == PruneMode::FunctionsAndTypes {
        for ((v, _), set) in s.sets.iter_mut() {
            if !module.is_pointer_value(*v) {
                continue;
            }
            let Some(first) = module.types.pointee(module.value(*v).ty) else {
                continue;
            };
            set.retain(|(p, _)| {
                let mut second = module.value(*p).ty;
                if module.has_extra_reference(*p) {
                    if let Some(t) = module.types.pointee(second) {
                        second = t;
                    }
                }
                if let Type::Array { element, .. } = module.types.get(second) {
                    second = *element;
                }
                second == first
            });
        }
    }
}

fn insert_one(s: &mut PointsToSets, key: Pointer, pointee: Pointee) -> bool {
    s.entry(key).insert(pointee)
}

fn apply_copy(s: &mut PointsToSets, l: ValueId, r: ValueId) -> bool {
    let rset: Vec<Pointee> = s.entry((r, -1)).iter().copied().collect();
    let lset = s.entry((l, -1));
    let old = lset.len();
    lset.extend(rset);
    lset.len() != old
}

fn apply_load(s: &mut PointsToSets, l: Pointer, r: ValueId) -> bool {
    let rset: Vec<Pointee> = s.entry((r, -1)).iter().copied().collect();
    let mut add: Vec<Pointee> = Vec::new();
    for p in rset {
        add.extend(s.entry(p).iter().copied());
    }
    let lset = s.entry(l);
    let old = lset.len();
    lset.extend(add);
    lset.len() != old
}

fn apply_store(s: &mut PointsToSets, l: ValueId, r: ValueId) -> bool {
    let lset: Vec<Pointee> = s.entry((l, -1)).iter().copied().collect();
    let rset: Vec<Pointee> = s.entry((r, -1)).iter().copied().collect();
    let mut change = false;
    for p in lset {
        let x = s.entry(p);
        let old = x.len();
        x.extend(rset.iter().copied());
        change |= x.len() != old;
    }
    change
}

fn apply_store_one(s: &mut PointsToSets, l: ValueId, pointee: Pointee) -> bool {
    let lset: Vec<Pointee> = s.entry((l, -1)).iter().copied().collect();
    let mut change = false;
    for p in lset {
        change |= s.entry(p).insert(pointee);
    }
    change
}

fn apply_store_load(s: &mut PointsToSets, l: ValueId, r: ValueId) -> bool {
    let lset: Vec<Pointee> = s.entry((l, -1)).iter().copied().collect();
    let mut change = false;
    for p in lset {
        change |= apply_load(s, p, r);
    }
    change
}

fn apply_gep(module: &Module, s: &mut PointsToSets, l: ValueId, r: ValueId) -> bool {
    let Some(Inst::Gep { base, .. }) = module.inst(r) else {
        panic!("GEP rule over a non-GEP value");
    };
    let op = module.elim_const_expr(*base);
    let (off, is_array) = module.accumulate_constant_offset(r);

    if module.has_extra_reference(op) {
        // Taking the address of a field of a known object.
        return insert_one(s, (l, -1), (op, off.max(0)));
    }

    let rset: Vec<Pointee> = s.entry((op, -1)).iter().copied().collect();
    let mut lset = std::mem::take(s.entry((l, -1)));
    let old = lset.len();
    for (rv, roff) in rset {
        debug_assert!(roff >= 0);

        // An un-projected entry already present cuts off recursive
        // structures.
        if lset.contains(&(rv, roff)) {
            continue;
        }
        if off != 0 && (module.is_function(rv) || module.is_null(rv)) {
            continue;
        }
        let mut sum = roff + off;
        if !check_offset(module, rv, sum) {
            continue;
        }

        // Crowding: only a handful of distinct offsets per target object.
        let mut same = 0;
        for (lv, _) in lset.iter() {
            if *lv == rv {
                same += 1;
                if same >= 5 {
                    break;
                }
            }
        }
        if same >= 3 {
            continue;
        }

        if sum < 0 {
            sum = 0;
        }
        // An unsoundness: wide array offsets collapse onto a cap.
        if is_array && sum > 64 {
            sum = 64;
        }
        lset.insert((rv, sum));
    }
    let changed = lset.len() != old;
    *s.entry((l, -1)) = lset;
    changed
}

/// Whether `sum` still lands inside the object `rv` names, when its size is
/// known exactly (initialized global, fixed-size alloca).
fn check_offset(module: &Module, rv: ValueId, sum: i64) -> bool {
    // Negative sums wrap and exceed any allocation size.
    let sum = sum as u64;
    match &module.value(rv).kind {
        crate::ir::ValueKind::Global(g) => {
            let g = module.global(*g);
            !(g.init.is_some() && sum >= module.types.alloc_size(g.ty))
        }
        _ => match module.inst(rv) {
            Some(Inst::Alloca { allocated, array }) => {
                *array || sum < module.types.alloc_size(*allocated)
            }
            _ => true,
        },
    }
}
