//! The identity traversal skeleton.
//!
//! `IdentityOptimizer` in the original is a `CFGVisitor` that rebuilds an
//! identical graph while doing a full traversal, meant to be subclassed so a
//! concrete optimizer overrides only the node kinds it actually changes.
//! Because this crate's blocks live in an ordinary `Map<Id, BasicBlock>`
//! rather than behind shared/weak pointers, the same idea is realized as a
//! trait with default (pass-through) methods applied in place over that
//! map, rather than as a rebuild-a-parallel-graph visitor: `on_primitive`
//! defaults to keeping the statement unchanged, `on_terminator` likewise,
//! and `run` drives the walk over every block of every method. A pass
//! overrides only the hooks it needs, exactly as `ArithmeticOptimizer`
//! overrides only the primitive/terminator visits in the original.

use crate::common::Id;

use super::ir::{BasicBlock, Primitive, ProgramCfg, Terminator};

pub trait CfgPass {
    /// Rewrite one primitive. Returning an empty vec drops the statement;
    /// returning more than one expands it (used by no pass here, but kept
    /// general the way `appendPrimitive` in the original could suppress
    /// emission entirely).
    fn on_primitive(&mut self, p: Primitive) -> Vec<Primitive> {
        vec![p]
    }

    fn on_terminator(&mut self, t: Terminator) -> Terminator {
        t
    }

    /// Called before each method is visited; passes with per-method state
    /// (the original's `_temp_to_const`/`_vn` tables) reset it here.
    fn on_method_start(&mut self) {}

    fn on_block(&mut self, block: &mut BasicBlock) {
        let old = std::mem::take(&mut block.primitives);
        for p in old {
            block.primitives.extend(self.on_primitive(p));
        }
        let placeholder = Terminator::Ret(Id::from("0".to_string()));
        let t = std::mem::replace(&mut block.terminator, placeholder);
        block.terminator = self.on_terminator(t);
    }

    fn run(&mut self, program: &mut ProgramCfg) {
        self.on_method_start();
        for b in program.main_method.blocks.values_mut() {
            self.on_block(b);
        }
        for c in program.classes.values_mut() {
            for m in c.methods.iter_mut() {
                self.on_method_start();
                for b in m.blocks.values_mut() {
                    self.on_block(b);
                }
            }
        }
    }
}
