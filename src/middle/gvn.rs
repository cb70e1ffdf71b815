//! Dominator-tree-scoped global value numbering.
//!
//! Grounded on `ValueNumberOptimizer.h` for the shape of the per-value
//! table (algebraic identities, phi collapse, common-subexpression
//! elimination), but goes well beyond it: that file keeps one flat
//! per-method table, while this pass stacks a scoped table per dominator
//! tree node (push entering a node, pop leaving its subtree) so a value
//! proved equal to another is only reused where the proof still dominates.
//! It also folds a literal `if_else` condition to a `jump` and memoizes
//! non-null/tag guards so a dominated re-check of the same condition is
//! elided, neither of which the original attempts. Because folding a
//! branch changes the graph's shape, the whole pass re-runs to a fixed
//! point, recomputing dominance each round.

use crate::common::{Id, Map};

use super::dom;
use super::ir::{is_number, ArithOp, MethodCfg, Primitive, ProgramCfg, Terminator};

struct Scoped<K: Ord + Clone, V: Clone> {
    map: Map<K, V>,
    frames: Vec<Vec<K>>,
}

impl<K: Ord + Clone, V: Clone> Scoped<K, V> {
    fn new() -> Self {
        Scoped { map: Map::new(), frames: vec![] }
    }

    fn push_scope(&mut self) {
        self.frames.push(vec![]);
    }

    fn pop_scope(&mut self) {
        if let Some(keys) = self.frames.pop() {
            for k in keys {
                self.map.remove(&k);
            }
        }
    }

    fn insert(&mut self, k: K, v: V) {
        let is_new = !self.map.contains_key(&k);
        self.map.insert(k.clone(), v);
        if is_new {
            if let Some(frame) = self.frames.last_mut() {
                frame.push(k);
            }
        }
    }

    fn get(&self, k: &K) -> Option<&V> {
        self.map.get(k)
    }
}

fn resolve(value_of: &Scoped<Id, Id>, mut id: Id) -> Id {
    let mut steps = 0;
    while let Some(v) = value_of.get(&id) {
        if *v == id || steps > 64 {
            break;
        }
        id = *v;
        steps += 1;
    }
    id
}

fn algebraic_identity(op: ArithOp, op1: Id, op2: Id) -> Option<Id> {
    let zero = Id::from("0".to_string());
    let one = Id::from("1".to_string());
    match op {
        ArithOp::Add if op1 == zero => Some(op2),
        ArithOp::Add if op2 == zero => Some(op1),
        ArithOp::Sub if op2 == zero => Some(op1),
        ArithOp::Sub if op1 == op2 => Some(zero),
        ArithOp::Mul if op1 == zero || op2 == zero => Some(zero),
        ArithOp::Mul if op1 == one => Some(op2),
        ArithOp::Mul if op2 == one => Some(op1),
        ArithOp::Div if op2 == one => Some(op1),
        ArithOp::Div if op1 == op2 && op2 != zero => Some(one),
        ArithOp::And if op1 == op2 => Some(op1),
        ArithOp::And if op1 == zero || op2 == zero => Some(zero),
        ArithOp::Or if op1 == op2 => Some(op1),
        ArithOp::Or if op1 == zero => Some(op2),
        ArithOp::Or if op2 == zero => Some(op1),
        ArithOp::Xor if op1 == op2 => Some(zero),
        ArithOp::Xor if op1 == zero => Some(op2),
        ArithOp::Xor if op2 == zero => Some(op1),
        _ => None,
    }
}

type ExprKey = (ArithOp, Id, Id);

fn process_primitive(
    p: Primitive,
    value_of: &mut Scoped<Id, Id>,
    expr_table: &mut Scoped<ExprKey, Id>,
    changed: &mut bool,
) -> Option<Primitive> {
    match p {
        Primitive::Assign { lhs, rhs } => {
            let rhs = resolve(value_of, rhs);
            // Only a second, redundant occurrence of the same copy (one
            // already active in scope) is dropped; the first is kept (with
            // its RHS substituted) so variable registers other blocks read
            // by name still have a defining statement.
            if value_of.get(&lhs) == Some(&rhs) {
                *changed = true;
                return None;
            }
            value_of.insert(lhs, rhs);
            Some(Primitive::Assign { lhs, rhs })
        }
        Primitive::Arith { lhs, op1, op, op2 } => {
            let op1 = resolve(value_of, op1);
            let op2 = resolve(value_of, op2);
            let two = Id::from("2".to_string());
            let (op, op1, op2) = if op == ArithOp::Mul && op2 == two {
                (ArithOp::Add, op1, op1)
            } else if op == ArithOp::Mul && op1 == two {
                (ArithOp::Add, op2, op2)
            } else {
                (op, op1, op2)
            };
            if let Some(simplified) = algebraic_identity(op, op1, op2) {
                value_of.insert(lhs, simplified);
                *changed = true;
                return None;
            }
            let key: ExprKey = if op.is_commutative() && op2 < op1 { (op, op2, op1) } else { (op, op1, op2) };
            if let Some(&existing) = expr_table.get(&key) {
                value_of.insert(lhs, existing);
                *changed = true;
                return None;
            }
            expr_table.insert(key, lhs);
            Some(Primitive::Arith { lhs, op1, op, op2 })
        }
        Primitive::Phi { lhs, args } => {
            let args: Vec<(Id, Id)> = args.into_iter().map(|(l, v)| (l, resolve(value_of, v))).collect();
            let mut values = args.iter().map(|(_, v)| *v);
            if let Some(first) = values.next() {
                if values.all(|v| v == first) {
                    value_of.insert(lhs, first);
                    *changed = true;
                    return None;
                }
            }
            Some(Primitive::Phi { lhs, args })
        }
        Primitive::Call { lhs, code_addr, receiver, args } => Some(Primitive::Call {
            lhs,
            code_addr: resolve(value_of, code_addr),
            receiver: resolve(value_of, receiver),
            args: args.into_iter().map(|a| resolve(value_of, a)).collect(),
        }),
        Primitive::Alloc { lhs, size } => Some(Primitive::Alloc { lhs, size: resolve(value_of, size) }),
        Primitive::Print { val } => Some(Primitive::Print { val: resolve(value_of, val) }),
        Primitive::GetElt { lhs, arr, index } => {
            Some(Primitive::GetElt { lhs, arr: resolve(value_of, arr), index: resolve(value_of, index) })
        }
        Primitive::SetElt { arr, index, val } => Some(Primitive::SetElt {
            arr: resolve(value_of, arr),
            index: resolve(value_of, index),
            val: resolve(value_of, val),
        }),
        Primitive::Load { lhs, addr } => Some(Primitive::Load { lhs, addr: resolve(value_of, addr) }),
        Primitive::Store { addr, val } => {
            Some(Primitive::Store { addr: resolve(value_of, addr), val: resolve(value_of, val) })
        }
        Primitive::LoadVec { lhs, addrs } => {
            Some(Primitive::LoadVec { lhs, addrs: addrs.into_iter().map(|a| resolve(value_of, a)).collect() })
        }
        Primitive::StoreVec { addrs, val } => Some(Primitive::StoreVec {
            addrs: addrs.into_iter().map(|a| resolve(value_of, a)).collect(),
            val: resolve(value_of, val),
        }),
        Primitive::AddVec { lhs, op1, op2 } => {
            Some(Primitive::AddVec { lhs, op1: resolve(value_of, op1), op2: resolve(value_of, op2) })
        }
        Primitive::SubVec { lhs, op1, op2 } => {
            Some(Primitive::SubVec { lhs, op1: resolve(value_of, op1), op2: resolve(value_of, op2) })
        }
        Primitive::MulVec { lhs, op1, op2 } => {
            Some(Primitive::MulVec { lhs, op1: resolve(value_of, op1), op2: resolve(value_of, op2) })
        }
        Primitive::DivVec { lhs, op1, op2 } => {
            Some(Primitive::DivVec { lhs, op1: resolve(value_of, op1), op2: resolve(value_of, op2) })
        }
        c @ Primitive::Comment(_) => Some(c),
    }
}

#[allow(clippy::too_many_arguments)]
fn visit(
    label: Id,
    method: &mut MethodCfg,
    tree_children: &Map<Id, Vec<Id>>,
    value_of: &mut Scoped<Id, Id>,
    expr_table: &mut Scoped<ExprKey, Id>,
    checked_nonzero: &mut Scoped<Id, ()>,
    changed: &mut bool,
) {
    value_of.push_scope();
    expr_table.push_scope();
    checked_nonzero.push_scope();

    if let Some(mut block) = method.blocks.remove(&label) {
        let old_primitives = std::mem::take(&mut block.primitives);
        let mut new_primitives = Vec::with_capacity(old_primitives.len());
        for p in old_primitives {
            if let Some(out) = process_primitive(p, value_of, expr_table, changed) {
                new_primitives.push(out);
            }
        }
        block.primitives = new_primitives;

        let old_term = std::mem::replace(&mut block.terminator, Terminator::Jump(label));
        let mut dead_to_fix = None;
        block.terminator = match old_term {
            Terminator::Ret(v) => Terminator::Ret(resolve(value_of, v)),
            Terminator::Jump(l) => Terminator::Jump(l),
            Terminator::Fail(k) => Terminator::Fail(k),
            Terminator::IfElse { cond, if_branch, else_branch } => {
                let cond = resolve(value_of, cond);
                let is_guard = method
                    .blocks
                    .get(&else_branch)
                    .map(|b| b.primitives.is_empty() && matches!(b.terminator, Terminator::Fail(_)))
                    .unwrap_or(false);
                let zero = Id::from("0".to_string());
                if is_number(&cond) {
                    *changed = true;
                    if cond == zero {
                        dead_to_fix = Some(if_branch);
                        block.children.retain(|c| *c != if_branch);
                        block.joins.retain(|c| *c != if_branch);
                        Terminator::Jump(else_branch)
                    } else {
                        dead_to_fix = Some(else_branch);
                        block.children.retain(|c| *c != else_branch);
                        block.joins.retain(|c| *c != else_branch);
                        Terminator::Jump(if_branch)
                    }
                } else if is_guard && checked_nonzero.get(&cond).is_some() {
                    *changed = true;
                    dead_to_fix = Some(else_branch);
                    block.children.retain(|c| *c != else_branch);
                    block.joins.retain(|c| *c != else_branch);
                    Terminator::Jump(if_branch)
                } else {
                    if is_guard {
                        checked_nonzero.insert(cond, ());
                    }
                    Terminator::IfElse { cond, if_branch, else_branch }
                }
            }
        };

        let children = tree_children.get(&label).cloned().unwrap_or_default();
        let successors = block.successors();
        method.blocks.insert(label, block);

        if let Some(dead) = dead_to_fix {
            if let Some(db) = method.blocks.get_mut(&dead) {
                db.predecessors.retain(|p| *p != label);
            }
        }

        // Rewrite each CFG successor's existing phi argument for this
        // predecessor label while this block's scope is still active — a
        // successor outside the dominator subtree (e.g. a merge point) may
        // be visited only after this scope is long popped.
        for succ in &successors {
            if let Some(sb) = method.blocks.get_mut(succ) {
                for p in sb.primitives.iter_mut() {
                    if let Primitive::Phi { args, .. } = p {
                        for (pred, v) in args.iter_mut() {
                            if *pred == label {
                                *v = resolve(value_of, *v);
                            }
                        }
                    }
                }
            }
        }

        for c in children {
            visit(c, method, tree_children, value_of, expr_table, checked_nonzero, changed);
        }
    }

    value_of.pop_scope();
    expr_table.pop_scope();
    checked_nonzero.pop_scope();
}

/// Runs value numbering on one method to a fixed point, recomputing
/// dominance after every round since branch folding changes the graph.
pub fn run_method(method: &mut MethodCfg) -> bool {
    let mut any_change = false;
    let mut rounds = 0;
    loop {
        let info = dom::solve(method);
        let mut value_of = Scoped::new();
        let mut expr_table = Scoped::new();
        let mut checked_nonzero = Scoped::new();
        let mut changed = false;
        visit(method.entry, method, &info.tree_children, &mut value_of, &mut expr_table, &mut checked_nonzero, &mut changed);
        any_change |= changed;
        rounds += 1;
        if !changed || rounds > method.blocks.len() + 4 {
            break;
        }
    }
    any_change
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
    use crate::middle::ir::*;

    fn num(n: u32) -> Id {
        Id::from(n.to_string())
    }

    #[test]
    fn collapses_addition_with_zero() {
        let entry = BasicBlock::new(Id::from("m".to_string()));
        let mut method = MethodCfg::new(entry, vec![], Map::new());
        let t1 = reg("1");
        let b = method.blocks.get_mut(&method.entry).unwrap();
        b.primitives.push(Primitive::Arith { lhs: t1, op1: num(5), op: ArithOp::Add, op2: num(0) });
        b.primitives.push(Primitive::Print { val: t1 });
        b.terminator = Terminator::Ret(num(0));

        run_method(&mut method);

        let b = method.entry_block();
        assert_eq!(b.primitives, vec![Primitive::Print { val: num(5) }]);
    }

    #[test]
    fn folds_constant_branch_to_a_jump() {
        let entry = BasicBlock::new(Id::from("m".to_string()));
        let mut method = MethodCfg::new(entry, vec![], Map::new());
        let then_l = Id::from("then".to_string());
        let else_l = Id::from("else".to_string());
        {
            let b = method.blocks.get_mut(&method.entry).unwrap();
            b.children.push(then_l);
            b.children.push(else_l);
            b.terminator = Terminator::IfElse { cond: num(1), if_branch: then_l, else_branch: else_l };
        }
        let mut then_b = BasicBlock::new(then_l);
        then_b.predecessors.push(method.entry);
        then_b.terminator = Terminator::Ret(num(1));
        method.blocks.insert(then_l, then_b);
        let mut else_b = BasicBlock::new(else_l);
        else_b.predecessors.push(method.entry);
        else_b.terminator = Terminator::Ret(num(2));
        method.blocks.insert(else_l, else_b);

        run_method(&mut method);

        let b = method.entry_block();
        assert_eq!(b.terminator, Terminator::Jump(then_l));
        assert!(!method.blocks[&else_l].predecessors.contains(&method.entry));
    }
}
