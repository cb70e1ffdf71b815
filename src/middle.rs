//! The middle-end: CFG construction, dominance, SSA, and the optimizer
//! pipeline (constant folding, value numbering, jump cleanup, SLP
//! vectorization).

pub mod build;
pub mod dom;
pub mod fold;
pub mod gvn;
pub mod identity;
pub mod ir;
pub mod jump;
pub mod slp;
pub mod ssa;

pub use build::build;
pub use ir::{ClassCfg, MethodCfg, ProgramCfg};
