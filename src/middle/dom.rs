//! Dominator analysis: iterative `Dom` fixed point, `IDom` derivation, and
//! dominance frontiers via the per-predecessor upward walk.
//!
//! Grounded on `DominatorSolver.h`'s `solveDom`/`solveIDom`/`solveDF`. That
//! file first rebuilds a label->block map by walking owning children from
//! the entry block; this crate's `MethodCfg::blocks` already is that map
//! (every block, owned or joined, is inserted by label when it is built),
//! so there is no separate blockmap-construction step here.

use crate::common::{Id, Map, Set};

use super::ir::MethodCfg;

#[derive(Debug, Clone)]
pub struct DomInfo {
    pub dom: Map<Id, Set<Id>>,
    pub idom: Map<Id, Id>,
    pub df: Map<Id, Set<Id>>,
    /// Children of each node in the dominator tree (inverse of `idom`).
    pub tree_children: Map<Id, Vec<Id>>,
}

pub fn solve_dom(method: &MethodCfg) -> Map<Id, Set<Id>> {
    let root = method.entry;
    let all: Set<Id> = method.blocks.keys().copied().collect();

    let mut dom: Map<Id, Set<Id>> = method.blocks.keys().map(|l| (*l, all.clone())).collect();
    dom.insert(root, Set::from([root]));

    let mut changed = true;
    while changed {
        changed = false;
        for (label, block) in &method.blocks {
            if *label == root {
                continue;
            }
            let mut temp = all.clone();
            for pred in &block.predecessors {
                let domj = &dom[pred];
                temp = temp.intersection(domj).copied().collect();
            }
            temp.insert(*label);
            if temp != dom[label] {
                dom.insert(*label, temp);
                changed = true;
            }
        }
    }
    dom
}

pub fn solve_idom(dom: &Map<Id, Set<Id>>, root: Id) -> Map<Id, Id> {
    let mut idom = Map::new();
    for (b, dominators) in dom {
        if *b == root {
            continue;
        }
        let mut without_b = dominators.clone();
        without_b.remove(b);
        for (n, dominators_n) in dom {
            if n != b && &without_b == dominators_n {
                idom.insert(*b, *n);
                break;
            }
        }
    }
    idom
}

pub fn solve_df(idom: &Map<Id, Id>, method: &MethodCfg) -> Map<Id, Set<Id>> {
    let mut df: Map<Id, Set<Id>> = method.blocks.keys().map(|l| (*l, Set::new())).collect();
    for (n, block) in &method.blocks {
        if block.predecessors.len() > 1 {
            for p in &block.predecessors {
                let mut runner = *p;
                while Some(&runner) != idom.get(n) {
                    df.get_mut(&runner).unwrap().insert(*n);
                    match idom.get(&runner) {
                        Some(next) => runner = *next,
                        None => break,
                    }
                }
            }
        }
    }
    df
}

/// Preorder-DFS visit index of each block from the entry, walking real CFG
/// successors. Used only to order dominator-tree children by first
/// discovery, since `method.blocks`/`idom` are `BTreeMap`s and would
/// otherwise yield lexicographic label order instead.
fn discovery_order(method: &MethodCfg) -> Map<Id, usize> {
    let mut order = Map::new();
    let mut visited = Set::new();
    let mut stack = vec![method.entry];
    let mut next = 0;
    while let Some(label) = stack.pop() {
        if !visited.insert(label) {
            continue;
        }
        order.insert(label, next);
        next += 1;
        if let Some(block) = method.blocks.get(&label) {
            for succ in block.successors().into_iter().rev() {
                stack.push(succ);
            }
        }
    }
    order
}

fn tree_children_of(idom: &Map<Id, Id>, order: &Map<Id, usize>) -> Map<Id, Vec<Id>> {
    let mut children: Map<Id, Vec<Id>> = Map::new();
    for (b, n) in idom {
        children.entry(*n).or_default().push(*b);
    }
    for kids in children.values_mut() {
        kids.sort_by_key(|k| order.get(k).copied().unwrap_or(usize::MAX));
    }
    children
}

pub fn solve(method: &MethodCfg) -> DomInfo {
    let dom = solve_dom(method);
    let idom = solve_idom(&dom, method.entry);
    let df = solve_df(&idom, method);
    let order = discovery_order(method);
    let tree_children = tree_children_of(&idom, &order);
    DomInfo { dom, idom, df, tree_children }
}
