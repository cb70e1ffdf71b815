//! Basic-block superword-level parallelism: packs isomorphic, adjacent-
//! offset elementwise operations into the vector primitives
//! (`load_vec`/`arith_vec`/`store_vec`), wherever they sit in the block.
//!
//! `VectorOptimizer.h` sketches the overall shape this is grounded on --
//! `find_adj_refs`/`extend_packlist`/`combine_packs`/`schedule` -- but its
//! own isomorphism/independence/scheduling helpers are unimplemented stubs,
//! so the pipeline here is built from scratch, staged the same way:
//!
//! - `find_lanes` is `find_adj_refs` + `follow_def_uses`/`follow_use_defs`
//!   collapsed into one pass: a lane is a `get, get, arith, set` quadruple
//!   (two field reads combined by one arithmetic op and written back to a
//!   third slot) discovered by walking def/use chains, so its four
//!   statements need not be textually adjacent.
//! - `group_into_packs` is `combine_packs`: lanes sharing both base
//!   registers and the arithmetic op are grouped, sorted by slot offset,
//!   and any run of four with offsets increasing by exactly one lane over
//!   lane becomes a pack.
//! - `vectorize_block` is `schedule`: a pack's sixteen statements are
//!   excised from wherever they sit and the vector chain is spliced in at
//!   the position of the last one, after checking the span between them
//!   has no intervening write that could alias the pack's base registers.
//!
//! `get_elt`/`set_elt` only carry a base register and an offset, not a
//! standalone address, so each lane's address is synthesized as an
//! explicit `base + offset` add immediately before the load/store pack
//! that needs it.
//!
//! TODO: packs shorter than the full width of 4 are left entirely scalar
//! rather than zero-padded, since padding a `store_vec` address list with
//! a placeholder risks writing to a bogus slot; widening this to cover
//! runs of 2-3 lanes needs a padding scheme that is provably safe to
//! write back.

use crate::common::{Id, Map};

use super::ir::{is_number, reg, ArithOp, BasicBlock, MethodCfg, Primitive, ProgramCfg};

const WIDTH: usize = 4;

#[derive(Clone, Copy)]
struct Lane {
    get1: usize,
    get2: usize,
    arith: usize,
    set: usize,
}

struct LaneShape {
    a1: Id,
    i1: u64,
    a2: Id,
    i2: u64,
    op: ArithOp,
    a3: Id,
    i3: u64,
}

fn parse_index(id: &Id) -> Option<u64> {
    if is_number(id) {
        id.parse().ok()
    } else {
        None
    }
}

fn lane_shape(stmts: &[Primitive], lane: &Lane) -> Option<LaneShape> {
    let (a1, i1) = match &stmts[lane.get1] {
        Primitive::GetElt { arr, index, .. } => (*arr, parse_index(index)?),
        _ => return None,
    };
    let (a2, i2) = match &stmts[lane.get2] {
        Primitive::GetElt { arr, index, .. } => (*arr, parse_index(index)?),
        _ => return None,
    };
    let op = match &stmts[lane.arith] {
        Primitive::Arith { op, .. } => *op,
        _ => return None,
    };
    let (a3, i3) = match &stmts[lane.set] {
        Primitive::SetElt { arr, index, .. } => (*arr, parse_index(index)?),
        _ => return None,
    };
    Some(LaneShape { a1, i1, a2, i2, op, a3, i3 })
}

/// Counts how many statements in the block read `id` as an operand (never
/// as the statement's own `lhs`). A lane's intermediate registers must be
/// read exactly once -- by the next stage of that same lane -- or it isn't
/// safe to excise the lane's statements from their original positions.
fn operand_reads(stmts: &[Primitive], id: Id) -> usize {
    stmts
        .iter()
        .map(|p| match p {
            Primitive::Assign { rhs, .. } => (*rhs == id) as usize,
            Primitive::Arith { op1, op2, .. } => (*op1 == id) as usize + (*op2 == id) as usize,
            Primitive::Call { code_addr, receiver, args, .. } => {
                (*code_addr == id) as usize + (*receiver == id) as usize + args.iter().filter(|a| **a == id).count()
            }
            Primitive::Phi { args, .. } => args.iter().filter(|(_, v)| *v == id).count(),
            Primitive::Alloc { size, .. } => (*size == id) as usize,
            Primitive::Print { val } => (*val == id) as usize,
            Primitive::GetElt { arr, index, .. } => (*arr == id) as usize + (*index == id) as usize,
            Primitive::SetElt { arr, index, val } => (*arr == id) as usize + (*index == id) as usize + (*val == id) as usize,
            Primitive::Load { addr, .. } => (*addr == id) as usize,
            Primitive::Store { addr, val } => (*addr == id) as usize + (*val == id) as usize,
            Primitive::LoadVec { addrs, .. } => addrs.iter().filter(|a| **a == id).count(),
            Primitive::StoreVec { addrs, val } => addrs.iter().filter(|a| **a == id).count() + (*val == id) as usize,
            Primitive::AddVec { op1, op2, .. }
            | Primitive::SubVec { op1, op2, .. }
            | Primitive::MulVec { op1, op2, .. }
            | Primitive::DivVec { op1, op2, .. } => (*op1 == id) as usize + (*op2 == id) as usize,
            Primitive::Comment(_) => 0,
        })
        .sum()
}

/// `find_adj_refs` + `follow_def_uses`/`follow_use_defs`: for every `Arith`
/// whose both operands are defined by a `GetElt` and whose result feeds
/// exactly one `SetElt`, with every one of those three intermediate
/// registers read nowhere else, record the quadruple as a lane. Lanes are
/// discovered regardless of where their four statements physically sit.
fn find_lanes(stmts: &[Primitive]) -> Vec<Lane> {
    let mut def_at: Map<Id, usize> = Map::new();
    for (i, p) in stmts.iter().enumerate() {
        if let Primitive::GetElt { lhs, .. } | Primitive::Arith { lhs, .. } = p {
            def_at.insert(*lhs, i);
        }
    }

    let mut lanes = vec![];
    for (arith_idx, p) in stmts.iter().enumerate() {
        let Primitive::Arith { lhs: l3, op1, op2, .. } = p else { continue };
        let (Some(&get1), Some(&get2)) = (def_at.get(op1), def_at.get(op2)) else { continue };
        if !matches!(stmts[get1], Primitive::GetElt { .. }) || !matches!(stmts[get2], Primitive::GetElt { .. }) {
            continue;
        }
        let Some(set) = stmts.iter().position(|q| matches!(q, Primitive::SetElt { val, .. } if val == l3)) else {
            continue;
        };
        if operand_reads(stmts, *op1) != 1 || operand_reads(stmts, *op2) != 1 || operand_reads(stmts, *l3) != 1 {
            continue;
        }
        lanes.push(Lane { get1, get2, arith: arith_idx, set });
    }
    lanes
}

/// Whether the span covered by `pack`'s sixteen statements is safe to
/// collapse to a single point: no statement strictly between them (other
/// than the pack's own) writes one of the pack's base registers, and no
/// `Call` sits in the span (a virtual call is an opaque write to anything).
fn pack_is_reorder_safe(stmts: &[Primitive], pack: &[Lane; WIDTH], touched: &[Id]) -> bool {
    let mut idxs: Vec<usize> = pack.iter().flat_map(|l| [l.get1, l.get2, l.arith, l.set]).collect();
    idxs.sort_unstable();
    let lo = idxs[0];
    let hi = *idxs.last().unwrap();
    for (i, p) in stmts.iter().enumerate().take(hi).skip(lo + 1) {
        if idxs.binary_search(&i).is_ok() {
            continue;
        }
        let hazard = match p {
            Primitive::SetElt { arr, .. } => touched.contains(arr),
            Primitive::Store { addr, .. } => touched.contains(addr),
            Primitive::StoreVec { addrs, .. } => addrs.iter().any(|a| touched.contains(a)),
            Primitive::Call { .. } => true,
            _ => false,
        };
        if hazard {
            return false;
        }
    }
    true
}

/// `combine_packs`: groups lanes sharing both base registers and the
/// arithmetic op, then within each group (sorted by slot offset) finds any
/// run of four lanes whose offsets increase by exactly one lane over lane.
fn group_into_packs(stmts: &[Primitive], lanes: Vec<Lane>) -> Vec<[Lane; WIDTH]> {
    let mut groups: Map<(Id, Id, Id, ArithOp), Vec<(u64, u64, u64, Lane)>> = Map::new();
    for lane in lanes {
        let Some(shape) = lane_shape(stmts, &lane) else { continue };
        if matches!(shape.op, ArithOp::And | ArithOp::Or | ArithOp::Xor) {
            continue;
        }
        let key = (shape.a1, shape.a2, shape.a3, shape.op);
        groups.entry(key).or_default().push((shape.i1, shape.i2, shape.i3, lane));
    }

    let mut packs = vec![];
    for ((a1, a2, a3, _), mut entries) in groups {
        entries.sort_by_key(|(i1, _, _, _)| *i1);
        let mut used = vec![false; entries.len()];
        for start in 0..entries.len() {
            if used[start] {
                continue;
            }
            let (i1_0, i2_0, i3_0, _) = entries[start];
            let mut run = vec![start];
            for idx in (start + 1)..entries.len() {
                if run.len() == WIDTH {
                    break;
                }
                if used[idx] {
                    continue;
                }
                let (i1, i2, i3, _) = entries[idx];
                let k = run.len() as u64;
                if i1 == i1_0 + k && i2 == i2_0 + k && i3 == i3_0 + k {
                    run.push(idx);
                }
            }
            if run.len() == WIDTH {
                let lanes: Vec<Lane> = run.iter().map(|&i| entries[i].3).collect();
                let pack = [lanes[0], lanes[1], lanes[2], lanes[3]];
                if pack_is_reorder_safe(stmts, &pack, &[a1, a2, a3]) {
                    for &i in &run {
                        used[i] = true;
                    }
                    packs.push(pack);
                }
            }
        }
    }
    packs
}

fn emit_vector_chain(stmts: &[Primitive], lanes: &[Lane; WIDTH], out: &mut Vec<Primitive>, counter: &mut u64) {
    let a1 = match &stmts[lanes[0].get1] {
        Primitive::GetElt { arr, .. } => *arr,
        _ => unreachable!("validated by find_lanes"),
    };
    let a2 = match &stmts[lanes[0].get2] {
        Primitive::GetElt { arr, .. } => *arr,
        _ => unreachable!("validated by find_lanes"),
    };
    let a3 = match &stmts[lanes[0].set] {
        Primitive::SetElt { arr, .. } => *arr,
        _ => unreachable!("validated by find_lanes"),
    };
    let op = match &stmts[lanes[0].arith] {
        Primitive::Arith { op, .. } => *op,
        _ => unreachable!("validated by find_lanes"),
    };

    let mut addrs1 = Vec::with_capacity(WIDTH);
    let mut addrs2 = Vec::with_capacity(WIDTH);
    let mut addrs3 = Vec::with_capacity(WIDTH);

    for lane in lanes {
        let idx1 = match &stmts[lane.get1] {
            Primitive::GetElt { index, .. } => *index,
            _ => unreachable!("validated by find_lanes"),
        };
        let idx2 = match &stmts[lane.get2] {
            Primitive::GetElt { index, .. } => *index,
            _ => unreachable!("validated by find_lanes"),
        };
        let idx3 = match &stmts[lane.set] {
            Primitive::SetElt { index, .. } => *index,
            _ => unreachable!("validated by find_lanes"),
        };

        *counter += 1;
        let addr1 = reg(&format!("vaddr{}", *counter));
        out.push(Primitive::Arith { lhs: addr1, op1: a1, op: ArithOp::Add, op2: idx1 });
        addrs1.push(addr1);

        *counter += 1;
        let addr2 = reg(&format!("vaddr{}", *counter));
        out.push(Primitive::Arith { lhs: addr2, op1: a2, op: ArithOp::Add, op2: idx2 });
        addrs2.push(addr2);

        *counter += 1;
        let addr3 = reg(&format!("vaddr{}", *counter));
        out.push(Primitive::Arith { lhs: addr3, op1: a3, op: ArithOp::Add, op2: idx3 });
        addrs3.push(addr3);
    }

    *counter += 1;
    let v1 = reg(&format!("vpack{}", *counter));
    out.push(Primitive::LoadVec { lhs: v1, addrs: addrs1 });

    *counter += 1;
    let v2 = reg(&format!("vpack{}", *counter));
    out.push(Primitive::LoadVec { lhs: v2, addrs: addrs2 });

    *counter += 1;
    let vr = reg(&format!("vpack{}", *counter));
    let vec_prim = match op {
        ArithOp::Add => Primitive::AddVec { lhs: vr, op1: v1, op2: v2 },
        ArithOp::Sub => Primitive::SubVec { lhs: vr, op1: v1, op2: v2 },
        ArithOp::Mul => Primitive::MulVec { lhs: vr, op1: v1, op2: v2 },
        ArithOp::Div => Primitive::DivVec { lhs: vr, op1: v1, op2: v2 },
        ArithOp::And | ArithOp::Or | ArithOp::Xor => unreachable!("excluded by group_into_packs"),
    };
    out.push(vec_prim);
    out.push(Primitive::StoreVec { addrs: addrs3, val: vr });
}

fn vectorize_block(block: &mut BasicBlock, counter: &mut u64) -> bool {
    let stmts = std::mem::take(&mut block.primitives);
    let lanes = find_lanes(&stmts);
    let packs = group_into_packs(&stmts, lanes);
    if packs.is_empty() {
        block.primitives = stmts;
        return false;
    }

    let mut removed = vec![false; stmts.len()];
    let mut anchor: Map<usize, usize> = Map::new();
    for (pack_idx, pack) in packs.iter().enumerate() {
        let idxs: Vec<usize> = pack.iter().flat_map(|l| [l.get1, l.get2, l.arith, l.set]).collect();
        let max_idx = *idxs.iter().max().unwrap();
        for &i in &idxs {
            removed[i] = true;
        }
        anchor.insert(max_idx, pack_idx);
    }

    let mut out = Vec::with_capacity(stmts.len());
    for (i, stmt) in stmts.iter().enumerate() {
        if removed[i] {
            if let Some(&pack_idx) = anchor.get(&i) {
                emit_vector_chain(&stmts, &packs[pack_idx], &mut out, counter);
            }
            continue;
        }
        out.push(stmt.clone());
    }
    block.primitives = out;
    true
}

fn vectorize_method(method: &mut MethodCfg, counter: &mut u64) -> bool {
    let mut changed = false;
    for b in method.blocks.values_mut() {
        changed |= vectorize_block(b, counter);
    }
    changed
}

pub fn run(program: &mut ProgramCfg) {
    let mut counter = 0u64;
    vectorize_method(&mut program.main_method, &mut counter);
    for c in program.classes.values_mut() {
        for m in c.methods.iter_mut() {
            vectorize_method(m, &mut counter);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Map;
    use crate::middle::ir::*;

    fn lane(arr_in: Id, arr_out: Id, op: ArithOp, base: u64, k: u64, out: &mut Vec<Primitive>) {
        let a = reg(&format!("a{k}"));
        let b = reg(&format!("b{k}"));
        let c = reg(&format!("c{k}"));
        out.push(Primitive::GetElt { lhs: a, arr: arr_in, index: Id::from((base + k).to_string()) });
        out.push(Primitive::GetElt { lhs: b, arr: arr_in, index: Id::from((base + k + 100).to_string()) });
        out.push(Primitive::Arith { lhs: c, op1: a, op, op2: b });
        out.push(Primitive::SetElt { arr: arr_out, index: Id::from((base + k).to_string()), val: c });
    }

    #[test]
    fn packs_four_isomorphic_adjacent_lanes() {
        let mut entry = BasicBlock::new(Id::from("m".to_string()));
        let arr_in = reg("src");
        let arr_out = reg("dst");
        for k in 0..4 {
            lane(arr_in, arr_out, ArithOp::Add, 0, k, &mut entry.primitives);
        }
        entry.terminator = Terminator::Ret(Id::from("0".to_string()));
        let mut method = MethodCfg::new(entry, vec![], Map::new());

        let mut counter = 0u64;
        vectorize_method(&mut method, &mut counter);

        let b = method.entry_block();
        assert!(b.primitives.iter().any(|p| matches!(p, Primitive::AddVec { .. })));
        assert!(b.primitives.iter().any(|p| matches!(p, Primitive::StoreVec { .. })));
    }

    #[test]
    fn leaves_a_short_run_scalar() {
        let mut entry = BasicBlock::new(Id::from("m".to_string()));
        let arr_in = reg("src");
        let arr_out = reg("dst");
        for k in 0..2 {
            lane(arr_in, arr_out, ArithOp::Add, 0, k, &mut entry.primitives);
        }
        entry.terminator = Terminator::Ret(Id::from("0".to_string()));
        let mut method = MethodCfg::new(entry, vec![], Map::new());

        let mut counter = 0u64;
        vectorize_method(&mut method, &mut counter);

        let b = method.entry_block();
        assert!(!b.primitives.iter().any(|p| matches!(p, Primitive::AddVec { .. })));
    }

    #[test]
    fn packs_four_lanes_interleaved_with_unrelated_statements() {
        let mut entry = BasicBlock::new(Id::from("m".to_string()));
        let arr_in = reg("src");
        let arr_out = reg("dst");
        let scratch = reg("x");
        for k in 0..4 {
            lane(arr_in, arr_out, ArithOp::Add, 0, k, &mut entry.primitives);
            // An unrelated print sits between each lane's statements in
            // program order -- the lanes are no longer textually adjacent.
            entry.primitives.push(Primitive::Print { val: scratch });
        }
        entry.terminator = Terminator::Ret(Id::from("0".to_string()));
        let mut method = MethodCfg::new(entry, vec![], Map::new());

        let mut counter = 0u64;
        let changed = vectorize_method(&mut method, &mut counter);

        assert!(changed);
        let b = method.entry_block();
        assert!(b.primitives.iter().any(|p| matches!(p, Primitive::AddVec { .. })));
        // The four interleaved prints must all still be present.
        assert_eq!(b.primitives.iter().filter(|p| matches!(p, Primitive::Print { .. })).count(), 4);
    }

    #[test]
    fn an_intervening_write_to_the_same_base_blocks_vectorization() {
        let mut entry = BasicBlock::new(Id::from("m".to_string()));
        let arr_in = reg("src");
        let arr_out = reg("dst");
        for k in 0..4 {
            lane(arr_in, arr_out, ArithOp::Add, 0, k, &mut entry.primitives);
            if k == 1 {
                // A write to arr_out in between two lanes of the same pack
                // makes deferring the earlier lanes unsafe.
                entry.primitives.push(Primitive::SetElt {
                    arr: arr_out,
                    index: Id::from("999".to_string()),
                    val: Id::from("0".to_string()),
                });
            }
        }
        entry.terminator = Terminator::Ret(Id::from("0".to_string()));
        let mut method = MethodCfg::new(entry, vec![], Map::new());

        let mut counter = 0u64;
        vectorize_method(&mut method, &mut counter);

        let b = method.entry_block();
        assert!(!b.primitives.iter().any(|p| matches!(p, Primitive::AddVec { .. })));
    }
}
