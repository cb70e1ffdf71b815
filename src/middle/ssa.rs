//! SSA construction: phi placement followed by dominator-tree-driven
//! renaming.
//!
//! Two strategies, both grounded in the original pair of optimizers:
//! [`SsaStrategy::Pruned`] places a phi for a variable only at the
//! dominance-frontier blocks its definitions actually reach, following
//! `BetterSSAOptimizer.h`'s DF-driven placement (this simplifies that
//! file's further liveness-based pruning of single-block-local names, so
//! it is closer to classical minimal SSA than fully semi-pruned).
//! [`SsaStrategy::Simple`] instead drops a phi for every surface variable
//! into every block with more than one predecessor regardless of whether
//! it is live there, matching `SSAOptimizer.h`'s unconditional approach.
//! Renaming (assign each definition a fresh versioned name, rewrite uses
//! to the current reaching definition, fill phi operands from each
//! predecessor as it is visited) is shared by both strategies.

use crate::common::{Id, Map, Set};

use super::dom;
use super::ir::{is_variable, reg, strip_sigil, MethodCfg, Primitive, ProgramCfg, Terminator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SsaStrategy {
    Pruned,
    Simple,
}

impl Default for SsaStrategy {
    fn default() -> Self {
        SsaStrategy::Pruned
    }
}

fn insert_phi(method: &mut MethodCfg, block_label: Id, var: Id) {
    if let Some(b) = method.blocks.get_mut(&block_label) {
        if b.primitives.iter().any(|p| matches!(p, Primitive::Phi { lhs, .. } if *lhs == reg(&var.to_string()))) {
            return;
        }
        let placeholder = reg(&var.to_string());
        let args = b.predecessors.iter().map(|p| (*p, placeholder)).collect();
        b.primitives.insert(0, Primitive::Phi { lhs: placeholder, args });
    }
}

fn place_phis_pruned(method: &mut MethodCfg) {
    let info = dom::solve(method);

    let mut defsites: Map<Id, Set<Id>> = Map::new();
    for (label, b) in &method.blocks {
        for p in &b.params {
            if is_variable(p) {
                let raw = Id::from(strip_sigil(p).to_string());
                defsites.entry(raw).or_default().insert(*label);
            }
        }
        for prim in &b.primitives {
            if let Some(lhs) = prim.def() {
                if is_variable(&lhs) {
                    let raw = Id::from(strip_sigil(&lhs).to_string());
                    defsites.entry(raw).or_default().insert(*label);
                }
            }
        }
    }

    for (var, sites) in defsites {
        let mut has_phi: Set<Id> = Set::new();
        let mut in_worklist: Set<Id> = sites.clone();
        let mut worklist: Vec<Id> = sites.into_iter().collect();
        while let Some(b) = worklist.pop() {
            if let Some(frontier) = info.df.get(&b).cloned() {
                for d in frontier {
                    if !has_phi.contains(&d) {
                        insert_phi(method, d, var);
                        has_phi.insert(d);
                        if !in_worklist.contains(&d) {
                            in_worklist.insert(d);
                            worklist.push(d);
                        }
                    }
                }
            }
        }
    }
}

fn place_phis_everywhere(method: &mut MethodCfg) {
    let vars: Vec<Id> = method.variables.clone();
    let join_blocks: Vec<Id> =
        method.blocks.iter().filter(|(_, b)| b.predecessors.len() > 1).map(|(l, _)| *l).collect();
    for label in join_blocks {
        for var in &vars {
            insert_phi(method, label, *var);
        }
    }
}

fn fresh(counters: &mut Map<Id, u64>, var: Id) -> Id {
    let n = counters.entry(var).or_insert(0);
    *n += 1;
    reg(&format!("{var}_{n}"))
}

fn use_var(id: Id, stacks: &Map<Id, Vec<Id>>) -> Id {
    if is_variable(&id) {
        let raw = Id::from(strip_sigil(&id).to_string());
        stacks.get(&raw).and_then(|s| s.last()).copied().unwrap_or(id)
    } else {
        id
    }
}

fn def_var(lhs: Id, counters: &mut Map<Id, u64>, stacks: &mut Map<Id, Vec<Id>>, pushed: &mut Vec<Id>) -> Id {
    if is_variable(&lhs) {
        let raw = Id::from(strip_sigil(&lhs).to_string());
        let fresh_name = fresh(counters, raw);
        stacks.entry(raw).or_default().push(fresh_name);
        pushed.push(raw);
        fresh_name
    } else {
        lhs
    }
}

fn rewrite_term_uses(t: Terminator, stacks: &Map<Id, Vec<Id>>) -> Terminator {
    match t {
        Terminator::Ret(v) => Terminator::Ret(use_var(v, stacks)),
        Terminator::IfElse { cond, if_branch, else_branch } => {
            Terminator::IfElse { cond: use_var(cond, stacks), if_branch, else_branch }
        }
        other => other,
    }
}

fn rename_primitive(p: Primitive, counters: &mut Map<Id, u64>, stacks: &mut Map<Id, Vec<Id>>, pushed: &mut Vec<Id>) -> Primitive {
    match p {
        Primitive::Comment(s) => Primitive::Comment(s),
        Primitive::Assign { lhs, rhs } => {
            let rhs = use_var(rhs, stacks);
            let lhs = def_var(lhs, counters, stacks, pushed);
            Primitive::Assign { lhs, rhs }
        }
        Primitive::Arith { lhs, op1, op, op2 } => {
            let op1 = use_var(op1, stacks);
            let op2 = use_var(op2, stacks);
            let lhs = def_var(lhs, counters, stacks, pushed);
            Primitive::Arith { lhs, op1, op, op2 }
        }
        Primitive::Call { lhs, code_addr, receiver, args } => {
            let code_addr = use_var(code_addr, stacks);
            let receiver = use_var(receiver, stacks);
            let args = args.into_iter().map(|a| use_var(a, stacks)).collect();
            let lhs = def_var(lhs, counters, stacks, pushed);
            Primitive::Call { lhs, code_addr, receiver, args }
        }
        Primitive::Phi { lhs, args } => {
            // Operand slots are filled in by predecessors as they are visited;
            // only the destination is a def of this block.
            let lhs = def_var(lhs, counters, stacks, pushed);
            Primitive::Phi { lhs, args }
        }
        Primitive::Alloc { lhs, size } => {
            let size = use_var(size, stacks);
            let lhs = def_var(lhs, counters, stacks, pushed);
            Primitive::Alloc { lhs, size }
        }
        Primitive::Print { val } => Primitive::Print { val: use_var(val, stacks) },
        Primitive::GetElt { lhs, arr, index } => {
            let arr = use_var(arr, stacks);
            let index = use_var(index, stacks);
            let lhs = def_var(lhs, counters, stacks, pushed);
            Primitive::GetElt { lhs, arr, index }
        }
        Primitive::SetElt { arr, index, val } => {
            Primitive::SetElt { arr: use_var(arr, stacks), index: use_var(index, stacks), val: use_var(val, stacks) }
        }
        Primitive::Load { lhs, addr } => {
            let addr = use_var(addr, stacks);
            let lhs = def_var(lhs, counters, stacks, pushed);
            Primitive::Load { lhs, addr }
        }
        Primitive::Store { addr, val } => Primitive::Store { addr: use_var(addr, stacks), val: use_var(val, stacks) },
        Primitive::LoadVec { lhs, addrs } => {
            let addrs = addrs.into_iter().map(|a| use_var(a, stacks)).collect();
            let lhs = def_var(lhs, counters, stacks, pushed);
            Primitive::LoadVec { lhs, addrs }
        }
        Primitive::StoreVec { addrs, val } => Primitive::StoreVec {
            addrs: addrs.into_iter().map(|a| use_var(a, stacks)).collect(),
            val: use_var(val, stacks),
        },
        Primitive::AddVec { lhs, op1, op2 } => {
            let op1 = use_var(op1, stacks);
            let op2 = use_var(op2, stacks);
            let lhs = def_var(lhs, counters, stacks, pushed);
            Primitive::AddVec { lhs, op1, op2 }
        }
        Primitive::SubVec { lhs, op1, op2 } => {
            let op1 = use_var(op1, stacks);
            let op2 = use_var(op2, stacks);
            let lhs = def_var(lhs, counters, stacks, pushed);
            Primitive::SubVec { lhs, op1, op2 }
        }
        Primitive::MulVec { lhs, op1, op2 } => {
            let op1 = use_var(op1, stacks);
            let op2 = use_var(op2, stacks);
            let lhs = def_var(lhs, counters, stacks, pushed);
            Primitive::MulVec { lhs, op1, op2 }
        }
        Primitive::DivVec { lhs, op1, op2 } => {
            let op1 = use_var(op1, stacks);
            let op2 = use_var(op2, stacks);
            let lhs = def_var(lhs, counters, stacks, pushed);
            Primitive::DivVec { lhs, op1, op2 }
        }
    }
}

fn rename_block(
    label: Id,
    method: &mut MethodCfg,
    tree_children: &Map<Id, Vec<Id>>,
    counters: &mut Map<Id, u64>,
    stacks: &mut Map<Id, Vec<Id>>,
) {
    let mut pushed: Vec<Id> = vec![];
    let Some(mut block) = method.blocks.remove(&label) else { return };

    let mut new_params = Vec::with_capacity(block.params.len());
    for p in block.params.iter() {
        new_params.push(def_var(*p, counters, stacks, &mut pushed));
    }
    block.params = new_params;

    let mut new_primitives = Vec::with_capacity(block.primitives.len());
    for p in block.primitives {
        new_primitives.push(rename_primitive(p, counters, stacks, &mut pushed));
    }
    block.primitives = new_primitives;
    block.terminator = rewrite_term_uses(block.terminator, stacks);

    let successors = block.terminator.targets();
    method.blocks.insert(label, block);

    for s in successors {
        if let Some(sb) = method.blocks.get_mut(&s) {
            for prim in sb.primitives.iter_mut() {
                if let Primitive::Phi { args, .. } = prim {
                    for (arg_label, val) in args.iter_mut() {
                        if *arg_label == label && is_variable(&*val) {
                            let raw = Id::from(strip_sigil(&*val).to_string());
                            if let Some(top) = stacks.get(&raw).and_then(|s| s.last()) {
                                *val = *top;
                            }
                        }
                    }
                }
            }
        }
    }

    if let Some(children) = tree_children.get(&label).cloned() {
        for c in children {
            rename_block(c, method, tree_children, counters, stacks);
        }
    }

    for v in pushed.iter().rev() {
        if let Some(s) = stacks.get_mut(v) {
            s.pop();
        }
    }
}

fn rename(method: &mut MethodCfg) {
    let info = dom::solve(method);
    let mut counters: Map<Id, u64> = Map::new();
    let mut stacks: Map<Id, Vec<Id>> = Map::new();
    rename_block(method.entry, method, &info.tree_children, &mut counters, &mut stacks);
}

pub fn construct(method: &mut MethodCfg, strategy: SsaStrategy) {
    match strategy {
        SsaStrategy::Pruned => place_phis_pruned(method),
        SsaStrategy::Simple => place_phis_everywhere(method),
    }
    rename(method);
}

pub fn run(program: &mut ProgramCfg, strategy: SsaStrategy) {
    construct(&mut program.main_method, strategy);
    for c in program.classes.values_mut() {
        for m in c.methods.iter_mut() {
            construct(m, strategy);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::ir::*;

    #[test]
    fn single_block_method_needs_no_phis() {
        let mut entry = BasicBlock::with_params(Id::from("m".to_string()), vec![reg("this")]);
        entry.primitives.push(Primitive::Assign { lhs: reg("x"), rhs: Id::from("0".to_string()) });
        entry.terminator = Terminator::Ret(reg("x"));
        let mut method = MethodCfg::new(entry, vec![Id::from("x".to_string())], Map::new());

        construct(&mut method, SsaStrategy::Pruned);

        let b = method.entry_block();
        assert!(!b.primitives.iter().any(|p| matches!(p, Primitive::Phi { .. })));
    }

    #[test]
    fn join_after_branch_gets_a_phi() {
        let entry_l = Id::from("m".to_string());
        let then_l = Id::from("then".to_string());
        let else_l = Id::from("else".to_string());
        let join_l = Id::from("join".to_string());

        let mut entry = BasicBlock::with_params(entry_l, vec![reg("this")]);
        entry.children.push(then_l);
        entry.children.push(else_l);
        entry.terminator = Terminator::IfElse { cond: reg("this"), if_branch: then_l, else_branch: else_l };
        let mut method = MethodCfg::new(entry, vec![Id::from("x".to_string())], Map::new());

        let mut then_b = BasicBlock::new(then_l);
        then_b.predecessors.push(entry_l);
        then_b.primitives.push(Primitive::Assign { lhs: reg("x"), rhs: Id::from("1".to_string()) });
        then_b.children.push(join_l);
        then_b.terminator = Terminator::Jump(join_l);
        method.blocks.insert(then_l, then_b);

        let mut else_b = BasicBlock::new(else_l);
        else_b.predecessors.push(entry_l);
        else_b.primitives.push(Primitive::Assign { lhs: reg("x"), rhs: Id::from("2".to_string()) });
        else_b.joins.push(join_l);
        else_b.terminator = Terminator::Jump(join_l);
        method.blocks.insert(else_l, else_b);

        let mut join_b = BasicBlock::new(join_l);
        join_b.predecessors.push(then_l);
        join_b.predecessors.push(else_l);
        join_b.terminator = Terminator::Ret(reg("x"));
        method.blocks.insert(join_l, join_b);

        construct(&mut method, SsaStrategy::Pruned);

        let join_b = &method.blocks[&join_l];
        let phi = join_b.primitives.iter().find(|p| matches!(p, Primitive::Phi { .. }));
        assert!(phi.is_some(), "expected a phi at the join block");
        if let Some(Primitive::Phi { args, .. }) = phi {
            assert_eq!(args.len(), 2);
            assert_ne!(args[0].1, reg("x"));
            assert_ne!(args[1].1, reg("x"));
        }
    }
}
