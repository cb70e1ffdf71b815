//! The `tacc` compiler driver: a pure filter reading source from stdin and
//! writing the optimized program in the `data:`/`code:` text format to
//! stdout (or, under `--print-ast`, the typed AST as JSON). No file or
//! environment state is read or written beyond those two streams.
//!
//! Run with `--help` for the full flag list.

use std::io::Read as _;

use tac_mid::front::{parse, type_check};
use tac_mid::middle::identity::CfgPass as _;
use tac_mid::middle::{build, fold, gvn, jump, slp, ssa};

use clap::Parser;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// serialize the typed AST as JSON to stdout and exit, skipping lowering
    #[arg(long, default_value_t = false)]
    print_ast: bool,
    /// skip SSA construction entirely (also skips value numbering, which
    /// assumes SSA form)
    #[arg(long, default_value_t = false)]
    no_ssa: bool,
    /// use the legacy phi-everywhere SSA construction instead of the
    /// dominance-frontier-driven placement
    #[arg(long, default_value_t = false)]
    simple_ssa: bool,
    /// skip constant/arithmetic folding
    #[arg(long, default_value_t = false)]
    noopt: bool,
    /// skip value numbering specifically; constant folding and jump
    /// cleanup still run
    #[arg(long, default_value_t = false)]
    no_vn: bool,
    /// run the jump optimizer then SLP vectorization at the end
    #[arg(long, default_value_t = false)]
    vectorize: bool,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let mut input = String::new();
    if let Err(e) = std::io::stdin().read_to_string(&mut input) {
        eprintln!("error reading stdin: {e}");
        std::process::exit(1);
    }

    let program = match parse(&input) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    if args.print_ast {
        let json = serde_json::to_string_pretty(&program).expect("AST serializes to JSON");
        println!("{json}");
        std::process::exit(0);
    }

    if let Err(e) = type_check(&program) {
        eprintln!("{e}");
        std::process::exit(1);
    }

    let mut cfg = build::build(&program);

    if !args.no_ssa {
        let strategy = if args.simple_ssa { ssa::SsaStrategy::Simple } else { ssa::SsaStrategy::Pruned };
        log::debug!("constructing SSA ({strategy:?})");
        ssa::run(&mut cfg, strategy);
    }

    if !args.noopt {
        log::debug!("folding constants");
        fold::ConstantFolder::new().run(&mut cfg);

        if !args.no_ssa && !args.no_vn {
            log::debug!("running value numbering");
            gvn::run(&mut cfg);
        }
    }

    log::debug!("cleaning up jumps");
    jump::run(&mut cfg);

    if args.vectorize {
        log::debug!("vectorizing basic blocks");
        slp::run(&mut cfg);
    }

    print!("{cfg}");
}
