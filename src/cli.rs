// SPDX-License-Identifier: BSD-3-Clause
use std::path::PathBuf;

/// Andersen-style points-to analysis for LLVM bitcode
#[derive(Debug, clap::Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Also build and print the pointer-equivalence graph view
    #[arg(long)]
    pub graph: bool,

    /// Suppress the points-to sets (solve only)
    #[arg(long)]
    pub quiet: bool,

    /// LLVM bitcode module
    #[arg()]
    pub module: PathBuf,

    /// Tracing
    #[arg(long)]
    pub tracing: bool,
}
