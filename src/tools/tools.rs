mod demo_branch;
use demo_branch::demo_branch;
mod demo_label;
use demo_label::demo_label;
mod demo_load;
use demo_load::demo_load;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// Small example harnesses that drive `taint_core` the way a host emulator
/// would: build a shadow memory and a TTB, feed a dynamic log, and inspect
/// the result. None of this is part of the core itself (see spec §6) — it
/// exists to make the library's API legible from the command line.
#[derive(Clone, Debug, Parser)]
struct Args {
    #[command(subcommand)]
    operation: Operation,
}

#[derive(Clone, Debug, Subcommand)]
enum Operation {
    /// Label a RAM byte and query it back (component I).
    Label(LabelArgs),
    /// Run a two-successor TTB through a captured branch outcome.
    Branch(BranchArgs),
    /// Run a load fixup against a prelabeled RAM byte.
    Load(LoadArgs),
}

#[derive(Clone, Debug, Parser)]
struct LabelArgs {
    /// RAM byte address to label.
    #[arg(long, default_value_t = 0x1000)]
    address: u64,
    /// Label to attach.
    #[arg(long, default_value_t = 7)]
    label: u32,
}

#[derive(Clone, Debug, Parser)]
struct BranchArgs {
    /// Whether the captured `BRANCHENTRY` reports the branch as taken.
    #[arg(long)]
    taken: bool,
}

#[derive(Clone, Debug, Parser)]
struct LoadArgs {
    /// RAM byte address the simulated guest load reads from.
    #[arg(long, default_value_t = 0x3000)]
    address: u64,
    /// Label already attached to that byte before the load runs.
    #[arg(long, default_value_t = 9)]
    label: u32,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    match &args.operation {
        Operation::Label(label_args) => demo_label(label_args),
        Operation::Branch(branch_args) => demo_branch(branch_args),
        Operation::Load(load_args) => demo_load(load_args),
    }
}
