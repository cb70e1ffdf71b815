//! Constant/arithmetic folding.
//!
//! Grounded on `ArithmeticOptimizer.h`: arithmetic on two literal operands
//! is folded to a literal and, when the destination is a temporary, kept
//! only in an internal `temp -> literal` table rather than re-emitted (the
//! table is consulted to substitute later operand references, eliding the
//! dead assignment entirely). Arithmetic is `u32` wraparound, matching the
//! original's `unsigned int` operations.
//!
//! One deliberate divergence from the original: `ArithmeticOptimizer.h`
//! folds `x / 0` unconditionally (`op1_num / op2_num` in C++, which is
//! undefined behavior there). That statement is left unfolded here, so
//! runtime fail-on-divide-by-zero behavior (if any) is preserved.

use crate::common::{Id, Map};

use super::identity::CfgPass;
use super::ir::{is_number, is_temporary, ArithOp, Primitive, Terminator};

#[derive(Default)]
pub struct ConstantFolder {
    temp_to_const: Map<Id, Id>,
}

impl ConstantFolder {
    pub fn new() -> Self {
        Self::default()
    }

    fn adjust(&self, r: Id) -> Id {
        self.temp_to_const.get(&r).copied().unwrap_or(r)
    }

    fn maybe_emit_assign(&mut self, lhs: Id, rhs: Id) -> Vec<Primitive> {
        if is_temporary(&lhs) && is_number(&rhs) {
            self.temp_to_const.insert(lhs, rhs);
            vec![]
        } else {
            vec![Primitive::Assign { lhs, rhs }]
        }
    }

    fn apply(op: ArithOp, a: u32, b: u32) -> u32 {
        match op {
            ArithOp::Add => a.wrapping_add(b),
            ArithOp::Sub => a.wrapping_sub(b),
            ArithOp::Mul => a.wrapping_mul(b),
            ArithOp::Div => a / b,
            ArithOp::And => a & b,
            ArithOp::Or => a | b,
            ArithOp::Xor => a ^ b,
        }
    }
}

impl CfgPass for ConstantFolder {
    fn on_method_start(&mut self) {
        self.temp_to_const.clear();
    }

    fn on_primitive(&mut self, p: Primitive) -> Vec<Primitive> {
        match p {
            Primitive::Assign { lhs, rhs } => {
                let rhs = self.adjust(rhs);
                self.maybe_emit_assign(lhs, rhs)
            }
            Primitive::Arith { lhs, op1, op, op2 } => {
                let op1 = self.adjust(op1);
                let op2 = self.adjust(op2);
                if is_number(&op1) && is_number(&op2) {
                    let b: u32 = op2.parse().expect("numeric operand");
                    if op == ArithOp::Div && b == 0 {
                        return vec![Primitive::Arith { lhs, op1, op, op2 }];
                    }
                    let a: u32 = op1.parse().expect("numeric operand");
                    let result = Self::apply(op, a, b);
                    self.maybe_emit_assign(lhs, Id::from(result.to_string()))
                } else {
                    vec![Primitive::Arith { lhs, op1, op, op2 }]
                }
            }
            Primitive::Call { lhs, code_addr, receiver, args } => {
                let code_addr = self.adjust(code_addr);
                let receiver = self.adjust(receiver);
                let args = args.into_iter().map(|a| self.adjust(a)).collect();
                vec![Primitive::Call { lhs, code_addr, receiver, args }]
            }
            Primitive::Phi { lhs, args } => {
                let args = args.into_iter().map(|(label, v)| (label, self.adjust(v))).collect();
                vec![Primitive::Phi { lhs, args }]
            }
            Primitive::Alloc { lhs, size } => vec![Primitive::Alloc { lhs, size: self.adjust(size) }],
            Primitive::Print { val } => vec![Primitive::Print { val: self.adjust(val) }],
            Primitive::GetElt { lhs, arr, index } => {
                vec![Primitive::GetElt { lhs, arr: self.adjust(arr), index: self.adjust(index) }]
            }
            Primitive::SetElt { arr, index, val } => {
                vec![Primitive::SetElt { arr: self.adjust(arr), index: self.adjust(index), val: self.adjust(val) }]
            }
            Primitive::Load { lhs, addr } => vec![Primitive::Load { lhs, addr: self.adjust(addr) }],
            Primitive::Store { addr, val } => {
                vec![Primitive::Store { addr: self.adjust(addr), val: self.adjust(val) }]
            }
            Primitive::LoadVec { lhs, addrs } => {
                vec![Primitive::LoadVec { lhs, addrs: addrs.into_iter().map(|a| self.adjust(a)).collect() }]
            }
            Primitive::StoreVec { addrs, val } => vec![Primitive::StoreVec {
                addrs: addrs.into_iter().map(|a| self.adjust(a)).collect(),
                val: self.adjust(val),
            }],
            Primitive::AddVec { lhs, op1, op2 } => {
                vec![Primitive::AddVec { lhs, op1: self.adjust(op1), op2: self.adjust(op2) }]
            }
            Primitive::SubVec { lhs, op1, op2 } => {
                vec![Primitive::SubVec { lhs, op1: self.adjust(op1), op2: self.adjust(op2) }]
            }
            Primitive::MulVec { lhs, op1, op2 } => {
                vec![Primitive::MulVec { lhs, op1: self.adjust(op1), op2: self.adjust(op2) }]
            }
            Primitive::DivVec { lhs, op1, op2 } => {
                vec![Primitive::DivVec { lhs, op1: self.adjust(op1), op2: self.adjust(op2) }]
            }
            c @ Primitive::Comment(_) => vec![c],
        }
    }

    fn on_terminator(&mut self, t: Terminator) -> Terminator {
        match t {
            Terminator::Ret(v) => Terminator::Ret(self.adjust(v)),
            Terminator::IfElse { cond, if_branch, else_branch } => {
                Terminator::IfElse { cond: self.adjust(cond), if_branch, else_branch }
            }
            other => other,
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
    fn folds_constant_addition_into_temp_table() {
        let mut folder = ConstantFolder::new();
        folder.on_method_start();
        let t1 = reg("1");
        let out = folder.on_primitive(Primitive::Arith { lhs: t1, op1: num(2), op: ArithOp::Add, op2: num(3) });
        assert!(out.is_empty());
        let out = folder.on_primitive(Primitive::Print { val: t1 });
        assert_eq!(out, vec![Primitive::Print { val: num(5) }]);
    }

    #[test]
    fn division_by_literal_zero_is_not_folded() {
        let mut folder = ConstantFolder::new();
        folder.on_method_start();
        let t1 = reg("1");
        let out = folder.on_primitive(Primitive::Arith { lhs: t1, op1: num(2), op: ArithOp::Div, op2: num(0) });
        assert_eq!(out, vec![Primitive::Arith { lhs: t1, op1: num(2), op: ArithOp::Div, op2: num(0) }]);
    }

    #[test]
    fn does_not_elide_assignment_to_a_variable_register() {
        let mut folder = ConstantFolder::new();
        folder.on_method_start();
        let x = reg("x");
        let out = folder.on_primitive(Primitive::Arith { lhs: x, op1: num(2), op: ArithOp::Add, op2: num(3) });
        assert_eq!(out, vec![Primitive::Assign { lhs: x, rhs: num(5) }]);
    }
}
