//! End-to-end tests driving the full pipeline (parse -> type check -> build
//! -> SSA -> optimize) the way `tacc` does, without going through the
//! binary's stdin/stdout plumbing.

use crate::front::{parse, type_check};
use crate::middle::identity::CfgPass as _;
use crate::middle::{build, fold, gvn, jump, ssa};

const PROGRAM: &str = r#"
class Counter [
  fields n: int
  method bump(amount: int) returning int with locals t: int:
    if (amount + 0): {
      t = (this.n + amount)
    } else {
      t = this.n
    }
    return t
]
main with c: Counter, x: int, y: int:
!c.n = x
y = ^c.bump(x)
print y
return y
"#;

#[test]
fn parses_type_checks_and_lowers() {
    let program = parse(PROGRAM).expect("program parses");
    type_check(&program).expect("program type checks");
    let cfg = build::build(&program);
    assert_eq!(cfg.classes.len(), 1);
    assert!(cfg.classes.contains_key(&crate::common::Id::from("Counter".to_string())));
}

#[test]
fn full_optimizer_pipeline_runs_to_completion_without_panicking() {
    let program = parse(PROGRAM).expect("program parses");
    type_check(&program).expect("program type checks");
    let mut cfg = build::build(&program);

    ssa::run(&mut cfg, ssa::SsaStrategy::Pruned);
    fold::ConstantFolder::new().run(&mut cfg);
    gvn::run(&mut cfg);
    jump::run(&mut cfg);

    // Every block's terminator must resolve within the same method: the
    // universal invariant checked after every pass.
    for method in std::iter::once(&cfg.main_method).chain(cfg.classes.values().flat_map(|c| &c.methods)) {
        for (label, block) in &method.blocks {
            for succ in block.successors() {
                assert!(method.blocks.contains_key(&succ), "block {label} points to a missing successor {succ}");
            }
        }
    }
}

#[test]
fn simple_ssa_strategy_also_completes_the_pipeline() {
    let program = parse(PROGRAM).expect("program parses");
    type_check(&program).expect("program type checks");
    let mut cfg = build::build(&program);

    ssa::run(&mut cfg, ssa::SsaStrategy::Simple);
    fold::ConstantFolder::new().run(&mut cfg);
    gvn::run(&mut cfg);
    jump::run(&mut cfg);

    assert!(!cfg.main_method.blocks.is_empty());
}

#[test]
fn a_single_block_main_needs_no_phis_after_ssa() {
    let program = parse(
        r#"
main with x: int, y: int:
y = (x + 1)
print y
return y
"#,
    )
    .expect("program parses");
    type_check(&program).expect("program type checks");
    let mut cfg = build::build(&program);
    ssa::run(&mut cfg, ssa::SsaStrategy::Pruned);

    let has_phi = cfg.main_method.blocks.values().any(|b| b.primitives.iter().any(|p| matches!(p, crate::middle::ir::Primitive::Phi { .. })));
    assert!(!has_phi, "a single-block method should never need a phi");
}

#[test]
fn rejects_a_program_that_assigns_a_field_to_a_mismatched_type() {
    let program = parse(
        r#"
class Box [
  fields n: int
]
main with b: Box:
!b.n = b
return 0
"#,
    )
    .expect("program parses");
    let err = type_check(&program).expect_err("assigning a Box where an int is expected should fail");
    assert!(err.message.contains("int") || err.message.contains("cannot assign"));
}

#[test]
fn rejects_malformed_source() {
    let err = parse("main with x: int:\nx = (1 +").expect_err("truncated expression should fail to parse");
    assert!(format!("{err}").starts_with("Parser error:"));
}
