//! Command-line arguments accepted by the compiler.

use std::path::PathBuf;

use clap::Parser;

/// SSA-based optimizing compiler for a small procedural language.
#[derive(Debug, Parser)]
#[command(name = "ssac", version, about)]
pub struct Args {
    /// Path to the source program to compile.
    #[arg(long, default_value = "input.txt", value_name = "PATH")]
    pub input: PathBuf,

    /// Write the textual IR after all passes run, to PATH or to stdout when
    /// no path is given.
    #[arg(long, value_name = "PATH", num_args = 0..=1, default_missing_value = "-")]
    pub dump_ir: Option<PathBuf>,

    /// Write the CFG in Graphviz DOT format, to PATH or to stdout when no
    /// path is given.
    #[arg(long, value_name = "PATH", num_args = 0..=1, default_missing_value = "-")]
    pub dump_cfg_dot: Option<PathBuf>,

    /// Skip SSA construction. Implies disabling every SSA-dependent pass.
    #[arg(long)]
    pub disable_ssa: bool,

    /// Skip sparse conditional constant propagation.
    #[arg(long)]
    pub disable_sccp: bool,

    /// Skip loop-invariant code motion.
    #[arg(long)]
    pub disable_licm: bool,

    /// Skip dead code elimination.
    #[arg(long)]
    pub disable_dce: bool,

    /// Skip the basic-block cleanup pass.
    #[arg(long)]
    pub disable_block_cleanup: bool,

    /// Omit the dominator-tree overlay from the DOT output.
    #[arg(long)]
    pub disable_idom_tree: bool,

    /// Omit the dominance-frontier overlay from the DOT output.
    #[arg(long)]
    pub disable_df: bool,
}
