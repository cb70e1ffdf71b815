//! Jump cleanup: merges a block into the single predecessor that falls
//! into it unconditionally, and prunes blocks left unreachable once GVN's
//! branch folding drops the only edge that reached them.
//!
//! Grounded on `JumpOptimizer.h`, which performs the same single-pass
//! "splice a solitary successor into its predecessor" rewrite over the
//! original's visitor; the unreachable-block sweep has no direct
//! counterpart there since the original never folds branches, but is the
//! natural complement once `gvn` can leave a branch arm with no surviving
//! predecessor.

use crate::common::Id;

use super::ir::{MethodCfg, ProgramCfg, Terminator};

fn merge_trivial_jumps(method: &mut MethodCfg) -> bool {
    let mut changed = false;
    loop {
        let mut merge_pair = None;
        for (label, block) in &method.blocks {
            if *label == method.entry || block.predecessors.len() != 1 {
                continue;
            }
            let pred = block.predecessors[0];
            if pred == *label {
                continue;
            }
            if let Some(pb) = method.blocks.get(&pred) {
                if pb.terminator == Terminator::Jump(*label) {
                    merge_pair = Some((pred, *label));
                    break;
                }
            }
        }
        let Some((pred, label)) = merge_pair else { break };

        let b = method.blocks.remove(&label).expect("just found in the map");
        for succ in b.successors() {
            if let Some(sb) = method.blocks.get_mut(&succ) {
                for p in sb.predecessors.iter_mut() {
                    if *p == label {
                        *p = pred;
                    }
                }
            }
        }

        let p = method.blocks.get_mut(&pred).expect("predecessor must exist");
        p.primitives.extend(b.primitives);
        p.terminator = b.terminator;
        p.children.retain(|c| *c != label);
        p.joins.retain(|c| *c != label);
        p.children.extend(b.children);
        p.joins.extend(b.joins);
        p.unreachable = b.unreachable;
        changed = true;
    }
    changed
}

fn prune_unreachable(method: &mut MethodCfg) -> bool {
    let mut changed = false;
    loop {
        let dead: Vec<Id> = method
            .blocks
            .iter()
            .filter(|(label, b)| **label != method.entry && b.predecessors.is_empty())
            .map(|(l, _)| *l)
            .collect();
        if dead.is_empty() {
            break;
        }
        for label in dead {
            if let Some(b) = method.blocks.remove(&label) {
                changed = true;
                for succ in b.successors() {
                    if let Some(sb) = method.blocks.get_mut(&succ) {
                        sb.predecessors.retain(|p| *p != label);
                    }
                }
            }
        }
    }
    changed
}

pub fn run_method(method: &mut MethodCfg) {
    loop {
        let a = merge_trivial_jumps(method);
        let b = prune_unreachable(method);
        if !a && !b {
            break;
        }
    }
}

pub fn run(program: &mut ProgramCfg) {
    run_method(&mut program.main_method);
    for c in program.classes.values_mut() {
        for m in c.methods.iter_mut() {
            run_method(m);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Map;
    use crate::middle::ir::*;

    #[test]
    fn merges_a_block_with_a_single_unconditional_predecessor() {
        let entry = BasicBlock::new(Id::from("m".to_string()));
        let mut method = MethodCfg::new(entry, vec![], Map::new());
        let next_l = Id::from("next".to_string());
        {
            let b = method.blocks.get_mut(&method.entry).unwrap();
            b.children.push(next_l);
            b.terminator = Terminator::Jump(next_l);
        }
        let mut next_b = BasicBlock::new(next_l);
        next_b.predecessors.push(method.entry);
        next_b.primitives.push(Primitive::Print { val: reg("x") });
        next_b.terminator = Terminator::Ret(reg("x"));
        method.blocks.insert(next_l, next_b);

        run_method(&mut method);

        assert_eq!(method.blocks.len(), 1);
        let b = method.entry_block();
        assert_eq!(b.terminator, Terminator::Ret(reg("x")));
        assert_eq!(b.primitives, vec![Primitive::Print { val: reg("x") }]);
    }

    #[test]
    fn prunes_a_block_with_no_predecessors() {
        let entry = BasicBlock::new(Id::from("m".to_string()));
        let mut method = MethodCfg::new(entry, vec![], Map::new());
        let dead_l = Id::from("dead".to_string());
        {
            let b = method.blocks.get_mut(&method.entry).unwrap();
            b.terminator = Terminator::Ret(Id::from("0".to_string()));
        }
        let dead_b = BasicBlock::new(dead_l);
        method.blocks.insert(dead_l, dead_b);

        run_method(&mut method);

        assert!(!method.blocks.contains_key(&dead_l));
    }
}
