// SPDX-License-Identifier: BSD-3-Clause
use std::io::{self, Write};

use anyhow::{anyhow, Context, Error, Result};
use clap::Parser;

use tracing_subscriber::{fmt, prelude::*};

use pointsto::analysis::graph::{PointsToGraph, ValueCategory};
use pointsto::analysis::solve;
use pointsto::analysis::structure::ProgramStructure;
use pointsto::cli;
use pointsto::ir;

fn setup_global_subscriber() {
    let filter_layer = tracing::level_filters::LevelFilter::TRACE;
    let fmt_layer = fmt::Layer::default();
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}

fn main() -> Result<()> {
    let args = cli::Args::parse();

    if args.tracing {
        setup_global_subscriber();
    }

    let llvm_module = llvm_ir::Module::from_bc_path(&args.module)
        .map_err(Error::msg)
        .with_context(|| {
            format!(
                "Couldn't parse LLVM bitcode module at {}",
                args.module.display()
            )
        })?;
    let module = ir::lower::lower_module(&llvm_module).context("Malformed LLVM module")?;

    // The extractor aborts on inline assembly; report it as an input error
    // instead.
    if module.has_inline_assembly() {
        return Err(anyhow!(
            "Module contains inline assembly, which the analysis refuses to model"
        ));
    }

    let program = ProgramStructure::new(&module);
    let sets = solve::compute_points_to_sets(&module, &program);

    let fmt_pointee = |p: &solve::Pointee| {
        if p.1 >= 0 {
            format!("{} + {}", module.display_value(p.0), p.1)
        } else {
            format!("{}", module.display_value(p.0))
        }
    };

    if !args.quiet {
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "points_to")?;
        writeln!(stdout, "---------")?;
        for (ptr, set) in &sets {
            if set.is_empty() {
                continue;
            }
            let targets: Vec<String> = set.iter().map(fmt_pointee).collect();
            writeln!(
                stdout,
                "{} --> {{{}}}",
                fmt_pointee(ptr),
                targets.join(", ")
            )?;
        }
    }

    if args.graph {
        let graph = PointsToGraph::from_points_to_sets(&sets, Box::new(ValueCategory));
        let mut stdout = io::stdout().lock();
        writeln!(stdout)?;
        writeln!(stdout, "graph")?;
        writeln!(stdout, "-----")?;
        graph.dump(&mut stdout, |p| fmt_pointee(p))?;
    }

    Ok(())
}
