// SPDX-License-Identifier: BSD-3-Clause
//! Rule extraction: one walk over the module classifying globals and
//! instructions, plus the return-type-indexed call maps that resolve
//! indirect calls and return-value flow by signature compatibility.

use std::collections::BTreeMap;

use crate::analysis::rules::{Rule, RuleSink};
use crate::ir::{Callee, CallInst, Function, Global, Inst, Module, Type, TypeId, ValueId, ValueKind};

/// Argument-passing rule between a destination `l` (formal parameter or call
/// instruction) and a source `r` (actual argument or returned value), keyed
/// on which side carries an extra reference.
fn arg_pass_rule(module: &Module, l: ValueId, r: ValueId) -> Rule {
    let r = module.elim_const_expr(r);
    if module.is_null(r) {
        return Rule::AsgnNull { l, null: r };
    }
    if module.has_extra_reference(l) {
        if module.has_extra_reference(r) {
            Rule::AsgnVar { l, r }
        } else {
            Rule::AsgnDeref { l, r }
        }
    } else if module.has_extra_reference(r) {
        Rule::AsgnRef { l, r }
    } else {
        Rule::AsgnVar { l, r }
    }
}

/// Copy-shaped rule for bitcasts, phis, and selects: the result holds
/// whatever the (stripped) operand holds.
fn copy_rule(module: &Module, l: ValueId, r: ValueId) -> Rule {
    let r = module.elim_const_expr(r);
    if module.is_null(r) {
        Rule::AsgnNull { l, null: r }
    } else if module.has_extra_reference(r) {
        Rule::AsgnRef { l, r }
    } else {
        Rule::AsgnVar { l, r }
    }
}

pub struct CallMaps<'m> {
    module: &'m Module,
    /// Return type of defined (or stored memory-management) functions.
    functions: BTreeMap<TypeId, Vec<ValueId>>,
    /// Return type of non-asm, non-memory-management call sites.
    calls: BTreeMap<TypeId, Vec<ValueId>>,
    vararg_warned: u32,
}

impl<'m> CallMaps<'m> {
    pub fn new(module: &'m Module) -> Self {
        let mut maps = CallMaps {
            module,
            functions: BTreeMap::new(),
            calls: BTreeMap::new(),
            vararg_warned: 0,
        };
        for func in &module.functions {
            if !func.is_declaration {
                let ret = module.types.return_type(func.ty).expect("function type");
                maps.functions.entry(ret).or_default().push(func.value);
            }
            for &v in &func.body {
                match module.inst(v) {
                    Some(Inst::Call(call)) => {
                        if !matches!(call.callee, Callee::Asm)
                            && !module.call_to_memory_man_stuff(call)
                        {
                            let ret = module
                                .types
                                .return_type(module.callee_prototype(call))
                                .expect("callee prototype");
                            maps.calls.entry(ret).or_default().push(v);
                        }
                    }
                    Some(Inst::Store { val, .. }) => {
                        // Address-taken functions written to memory become
                        // indirect-call candidates, but only when the stored
                        // function is itself a memory-management intrinsic.
                        // Known limitation inherited from the original
                        // extractor; see DESIGN.md.
                        let val = *val;
                        if module.has_extra_reference(val) && module.is_memory_man_stuff(val) {
                            if let ValueKind::Function(f) = module.value(val).kind {
                                let fn_ty = module.function(f).ty;
                                let ret =
                                    module.types.return_type(fn_ty).expect("function type");
                                maps.functions.entry(ret).or_default().push(val);
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        maps
    }

    fn compatible_types(&self, t1: TypeId, t2: TypeId) -> bool {
        // Casting makes any pointer callable with any other pointer;
        // over-approximate by treating all pointer types as interchangeable.
        if self.module.types.is_pointer(t1) && self.module.types.is_pointer(t2) {
            return true;
        }
        t1 == t2
    }

    fn compatible_fun_types(&self, f1: TypeId, f2: TypeId) -> bool {
        let (Type::Function {
            ret: r1,
            params: p1,
            varargs: v1,
        }, Type::Function {
            ret: r2,
            params: p2,
            varargs: v2,
        }) = (self.module.types.get(f1), self.module.types.get(f2))
        else {
            return false;
        };
        if !v1 && !v2 && p1.len() != p2.len() {
            return false;
        }
        if !self.compatible_types(*r1, *r2) {
            return false;
        }
        for (a, b) in p1.iter().zip(p2.iter()) {
            if !self.compatible_types(*a, *b) {
                return false;
            }
        }
        true
    }

    /// Emit argument-passing rules for a call with a known callee `f`.
    fn collect_call_rules_for(
        &mut self,
        c: ValueId,
        call: &CallInst,
        f: ValueId,
        sink: &mut impl RuleSink,
    ) {
        assert!(
            !matches!(call.callee, Callee::Asm),
            "inline assembly is not supported"
        );
        let module = self.module;

        if module.is_memory_man_stuff(f) && !module.is_memory_allocation(f) {
            return;
        }
        if module.is_memory_allocation(f) {
            sink.push_rule(Rule::AsgnAlloc { l: c, site: c });
            return;
        }

        let ValueKind::Function(fid) = module.value(f).kind else {
            return;
        };
        let func = module.function(fid);
        let mut i = 0;
        while i < func.params.len() && i < call.args.len() {
            let formal = func.params[i];
            if module.is_pointer_value(formal) {
                sink.push_rule(arg_pass_rule(module, formal, call.args[i]));
            }
            i += 1;
        }
        if i < call.args.len() {
            self.vararg_warned += 1;
            if self.vararg_warned <= 3 {
                tracing::warn!(
                    callee = %func.name,
                    formals = i,
                    actuals = call.args.len(),
                    "skipped vararg arguments"
                );
            }
        }
    }

    /// Emit rules for a call site: directly for a known callee, otherwise
    /// against every signature-compatible candidate in the function map.
    pub fn collect_call_rules(&mut self, c: ValueId, call: &CallInst, sink: &mut impl RuleSink) {
        match call.callee {
            Callee::Asm => panic!("inline assembly is not supported"),
            Callee::Function(f) => self.collect_call_rules_for(c, call, f, sink),
            Callee::Value(_) => {
                let fun_ty = self.module.callee_prototype(call);
                let ret = self
                    .module
                    .types
                    .return_type(fun_ty)
                    .expect("callee prototype");
                let candidates = self.functions.get(&ret).cloned().unwrap_or_default();
                for f in candidates {
                    let f_ty = match self.module.value(f).kind {
                        ValueKind::Function(fid) => self.module.function(fid).ty,
                        _ => continue,
                    };
                    if self.compatible_fun_types(fun_ty, f_ty) {
                        self.collect_call_rules_for(c, call, f, sink);
                    }
                }
            }
        }
    }

    /// Flow a returned pointer back to every call site the return type and
    /// signature admit.
    pub fn collect_return_rules(&self, r: ValueId, func: &Function, sink: &mut impl RuleSink) {
        let module = self.module;
        let Some(Inst::Ret { value: Some(ret_val) }) = module.inst(r) else {
            return;
        };
        let ret_val = *ret_val;
        if !module.is_pointer_value(ret_val) {
            return;
        }
        let ret_ty = module.types.return_type(func.ty).expect("function type");
        let Some(sites) = self.calls.get(&ret_ty) else {
            return;
        };
        for &c in sites {
            let Some(Inst::Call(call)) = module.inst(c) else {
                continue;
            };
            match call.callee {
                Callee::Function(g) => {
                    if g == func.value {
                        sink.push_rule(arg_pass_rule(module, c, ret_val));
                    }
                }
                Callee::Value(_) => {
                    if self.compatible_fun_types(func.ty, module.callee_prototype(call)) {
                        sink.push_rule(arg_pass_rule(module, c, ret_val));
                    }
                }
                Callee::Asm => {}
            }
        }
    }
}

/// The ordered rule sequence for a whole module: built once, replayed by the
/// solver until the fixed point. Order is traversal order; it affects how
/// fast the solver converges, not what it converges to.
pub struct ProgramStructure {
    rules: Vec<Rule>,
}

impl ProgramStructure {
    pub fn new(module: &Module) -> Self {
        let mut rules: Vec<Rule> = Vec::new();

        for g in &module.globals {
            if module.is_global_pointer_initialization(g) {
                global_rules(module, g, &mut rules);
            }
        }

        let mut call_maps = CallMaps::new(module);
        for func in &module.functions {
            for &v in &func.body {
                if module.is_pointer_manipulation(v) {
                    instruction_rules(module, v, &mut rules);
                } else if let Some(Inst::Call(call)) = module.inst(v) {
                    call_maps.collect_call_rules(v, call, &mut rules);
                } else if matches!(module.inst(v), Some(Inst::Ret { .. })) {
                    call_maps.collect_return_rules(v, func, &mut rules);
                }
            }
        }

        ProgramStructure { rules }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl<'a> IntoIterator for &'a ProgramStructure {
    type Item = &'a Rule;
    type IntoIter = std::slice::Iter<'a, Rule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}

fn global_rules(module: &Module, g: &Global, sink: &mut impl RuleSink) {
    let l = g.value;
    let init = module.elim_const_expr(g.init.expect("pointer initialization"));
    match module.value(init).kind {
        ValueKind::Null => sink.push_rule(Rule::AsgnNull { l, null: init }),
        ValueKind::Global(_) | ValueKind::Function(_) => {
            sink.push_rule(Rule::AsgnRef { l, r: init })
        }
        // Initializers the analysis cannot name (inttoptr and friends)
        // become a fresh object named by the global itself.
        _ => sink.push_rule(Rule::AsgnAlloc { l, site: l }),
    }
}

fn instruction_rules(module: &Module, v: ValueId, sink: &mut impl RuleSink) {
    match module.inst(v).expect("instruction value") {
        // An alloca's address-ness is carried by its extra reference; the
        // stack slot's contents accrete through store rules.
        Inst::Alloca { .. } => {}
        Inst::Load { ptr } => {
            if module.is_pointer_value(v) {
                let ptr = module.elim_const_expr(*ptr);
                if module.has_extra_reference(ptr) {
                    sink.push_rule(Rule::AsgnVar { l: v, r: ptr });
                } else {
                    sink.push_rule(Rule::AsgnDeref { l: v, r: ptr });
                }
            }
        }
        Inst::Store { val, ptr } => {
            if !module.is_pointer_value(*val) {
                return;
            }
            let r = module.elim_const_expr(*val);
            let l = module.elim_const_expr(*ptr);
            if module.is_null(r) {
                if module.has_extra_reference(l) {
                    sink.push_rule(Rule::AsgnNull { l, null: r });
                } else {
                    sink.push_rule(Rule::DerefAsgnNull { l, null: r });
                }
            } else if module.has_extra_reference(l) {
                if module.has_extra_reference(r) {
                    sink.push_rule(Rule::AsgnRef { l, r });
                } else {
                    sink.push_rule(Rule::AsgnVar { l, r });
                }
            } else if module.has_extra_reference(r) {
                sink.push_rule(Rule::DerefAsgnRef { l, r });
            } else {
                sink.push_rule(Rule::DerefAsgnVar { l, r });
            }
        }
        Inst::Gep { .. } => sink.push_rule(Rule::AsgnGep { l: v, r: v }),
        Inst::BitCast { op } => sink.push_rule(copy_rule(module, v, *op)),
        Inst::Phi { incoming } => {
            for &r in incoming {
                sink.push_rule(copy_rule(module, v, r));
            }
        }
        Inst::Select { on_true, on_false } => {
            sink.push_rule(copy_rule(module, v, *on_true));
            sink.push_rule(copy_rule(module, v, *on_false));
        }
        Inst::Call(call) => {
            // Memory-management intrinsics are classified as pointer
            // manipulation; everything else went through the call maps.
            let Callee::Function(f) = call.callee else {
                return;
            };
            if module.is_memory_allocation(f) {
                sink.push_rule(Rule::AsgnAlloc { l: v, site: v });
            } else if module.is_memory_deallocation(f) {
                let site = call
                    .args
                    .first()
                    .map(|&a| module.elim_const_expr(a))
                    .unwrap_or(v);
                sink.push_rule(Rule::Dealloc { site });
            }
            // memcpy and friends: dropped.
        }
        Inst::Ret { .. } | Inst::Other => {}
    }
}
