// SPDX-License-Identifier: BSD-3-Clause
//! Flow-insensitive, field-sensitive, inclusion-based (Andersen-style)
//! points-to analysis for LLVM bitcode.
//!
//! A module is lowered into an arena representation ([`ir::Module`]), walked
//! once to extract pointer-assignment rules
//! ([`analysis::structure::ProgramStructure`]), and solved by naive
//! fixed-point iteration ([`analysis::solve`]). The solved map can optionally
//! be viewed as a pointer-equivalence graph ([`analysis::graph`]).

pub mod analysis;
pub mod cli;
pub mod ir;

pub use analysis::graph::{Category, ExactCategory, PointsToGraph, ValueCategory};
pub use analysis::rules::{Rule, RuleSink};
pub use analysis::solve::{
    compute_points_to_sets, Pointee, Pointer, PointsToSet, PointsToSets, PruneMode,
};
pub use analysis::structure::{CallMaps, ProgramStructure};
pub use ir::{Module, ModuleBuilder, TypeId, ValueId};
