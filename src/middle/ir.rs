//! The control-flow-graph IR: primitives, terminators, basic blocks,
//! method/class/program containers, and the `data:`/`code:` text format.
//!
//! Blocks are addressed by label in a per-method map rather than through
//! shared/weak pointers, following the label-indexed `Map<Id, Block>` shape
//! the front/middle split already uses elsewhere in this crate. A block's
//! `children` are the owning spanning-tree edges (recursive printing and
//! traversal follow these); `joins` are the remaining CFG edges -- loop
//! back-edges and re-converging branches -- which are real edges for
//! dataflow purposes but are never followed recursively, to keep traversal
//! terminating without a visited-set.

use std::fmt;

use crate::common::{Id, Map};

pub fn reg(name: &str) -> Id {
    Id::from(format!("%{name}"))
}

pub fn global(name: &str) -> Id {
    Id::from(format!("@{name}"))
}

pub fn vtable_name(class: &str) -> Id {
    Id::from(format!("vtbl{class}"))
}

pub fn method_symbol(class: &str, method: &str) -> Id {
    Id::from(format!("{method}{class}"))
}

pub fn strip_sigil(r: &str) -> &str {
    r.strip_prefix('%').or_else(|| r.strip_prefix('@')).unwrap_or(r)
}

/// A register whose name is all digits after the `%`: an SSA/3AC temporary.
pub fn is_temporary(r: &str) -> bool {
    let Some(rest) = r.strip_prefix('%') else { return false };
    !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit())
}

/// A register whose name is all alphabetic after the `%`: a surface variable.
pub fn is_variable(r: &str) -> bool {
    let Some(rest) = r.strip_prefix('%') else { return false };
    !rest.is_empty() && rest.chars().all(|c| c.is_alphabetic())
}

pub fn is_number(r: &str) -> bool {
    !r.is_empty() && r.chars().all(|c| c.is_ascii_digit())
}

pub fn is_global(r: &str) -> bool {
    r.starts_with('@')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Xor,
}

impl ArithOp {
    /// Whether swapping operands leaves the value unchanged; used by GVN's
    /// operand canonicalization.
    pub fn is_commutative(self) -> bool {
        matches!(self, ArithOp::Add | ArithOp::Mul | ArithOp::And | ArithOp::Or | ArithOp::Xor)
    }
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = match self {
            ArithOp::Add => '+',
            ArithOp::Sub => '-',
            ArithOp::Mul => '*',
            ArithOp::Div => '/',
            ArithOp::And => '&',
            ArithOp::Or => '|',
            ArithOp::Xor => '^',
        };
        write!(f, "{c}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FailKind {
    NotAPointer,
    NotANumber,
    NoSuchField,
    NoSuchMethod,
}

impl fmt::Display for FailKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailKind::NotAPointer => "NotAPointer",
            FailKind::NotANumber => "NotANumber",
            FailKind::NoSuchField => "NoSuchField",
            FailKind::NoSuchMethod => "NoSuchMethod",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Primitive {
    Comment(String),
    Assign { lhs: Id, rhs: Id },
    Arith { lhs: Id, op1: Id, op: ArithOp, op2: Id },
    Call { lhs: Id, code_addr: Id, receiver: Id, args: Vec<Id> },
    Phi { lhs: Id, args: Vec<(Id, Id)> },
    Alloc { lhs: Id, size: Id },
    Print { val: Id },
    GetElt { lhs: Id, arr: Id, index: Id },
    SetElt { arr: Id, index: Id, val: Id },
    Load { lhs: Id, addr: Id },
    Store { addr: Id, val: Id },
    LoadVec { lhs: Id, addrs: Vec<Id> },
    StoreVec { addrs: Vec<Id>, val: Id },
    AddVec { lhs: Id, op1: Id, op2: Id },
    SubVec { lhs: Id, op1: Id, op2: Id },
    MulVec { lhs: Id, op1: Id, op2: Id },
    DivVec { lhs: Id, op1: Id, op2: Id },
}

impl Primitive {
    /// The register this primitive defines, if any.
    pub fn def(&self) -> Option<Id> {
        match self {
            Primitive::Comment(_) => None,
            Primitive::Assign { lhs, .. }
            | Primitive::Arith { lhs, .. }
            | Primitive::Call { lhs, .. }
            | Primitive::Phi { lhs, .. }
            | Primitive::Alloc { lhs, .. }
            | Primitive::GetElt { lhs, .. }
            | Primitive::Load { lhs, .. }
            | Primitive::LoadVec { lhs, .. }
            | Primitive::AddVec { lhs, .. }
            | Primitive::SubVec { lhs, .. }
            | Primitive::MulVec { lhs, .. }
            | Primitive::DivVec { lhs, .. } => Some(*lhs),
            Primitive::Print { .. } | Primitive::SetElt { .. } | Primitive::Store { .. } | Primitive::StoreVec { .. } => {
                None
            }
        }
    }

    /// The registers this primitive reads (used by dataflow/SLP passes).
    pub fn uses(&self) -> Vec<Id> {
        match self {
            Primitive::Comment(_) | Primitive::Alloc { .. } => vec![],
            Primitive::Assign { rhs, .. } => vec![*rhs],
            Primitive::Arith { op1, op2, .. } => vec![*op1, *op2],
            Primitive::Call { code_addr, receiver, args, .. } => {
                let mut v = vec![*code_addr, *receiver];
                v.extend(args.iter().copied());
                v
            }
            Primitive::Phi { args, .. } => args.iter().map(|(_, v)| *v).collect(),
            Primitive::Print { val } => vec![*val],
            Primitive::GetElt { arr, index, .. } => vec![*arr, *index],
            Primitive::SetElt { arr, index, val } => vec![*arr, *index, *val],
            Primitive::Load { addr, .. } => vec![*addr],
            Primitive::Store { addr, val } => vec![*addr, *val],
            Primitive::LoadVec { addrs, .. } => addrs.clone(),
            Primitive::StoreVec { addrs, val } => {
                let mut v = addrs.clone();
                v.push(*val);
                v
            }
            Primitive::AddVec { op1, op2, .. }
            | Primitive::SubVec { op1, op2, .. }
            | Primitive::MulVec { op1, op2, .. }
            | Primitive::DivVec { op1, op2, .. } => vec![*op1, *op2],
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Primitive::Comment(text) => write!(f, "# {text}"),
            Primitive::Assign { lhs, rhs } => write!(f, "{lhs} = {rhs}"),
            Primitive::Arith { lhs, op1, op, op2 } => write!(f, "{lhs} = {op1} {op} {op2}"),
            Primitive::Call { lhs, code_addr, receiver, args } => {
                write!(f, "{lhs} = call({code_addr}, {receiver}")?;
                for a in args {
                    write!(f, ", {a}")?;
                }
                write!(f, ")")
            }
            Primitive::Phi { lhs, args } => {
                write!(f, "{lhs} = phi(")?;
                for (i, (label, val)) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{label}, {val}")?;
                }
                write!(f, ")")
            }
            Primitive::Alloc { lhs, size } => write!(f, "{lhs} = alloc({size})"),
            Primitive::Print { val } => write!(f, "print({val})"),
            Primitive::GetElt { lhs, arr, index } => write!(f, "{lhs} = getelt({arr}, {index})"),
            Primitive::SetElt { arr, index, val } => write!(f, "setelt({arr}, {index}, {val})"),
            Primitive::Load { lhs, addr } => write!(f, "{lhs} = load({addr})"),
            Primitive::Store { addr, val } => write!(f, "store({addr}, {val})"),
            Primitive::LoadVec { lhs, addrs } => {
                write!(f, "{lhs} = load_vec(")?;
                for (i, a) in addrs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
            Primitive::StoreVec { addrs, val } => {
                write!(f, "store_vec(")?;
                for a in addrs {
                    write!(f, "{a}, ")?;
                }
                write!(f, "{val})")
            }
            Primitive::AddVec { lhs, op1, op2 } => write!(f, "{lhs} = add_vec({op1}, {op2})"),
            Primitive::SubVec { lhs, op1, op2 } => write!(f, "{lhs} = sub_vec({op1}, {op2})"),
            Primitive::MulVec { lhs, op1, op2 } => write!(f, "{lhs} = mul_vec({op1}, {op2})"),
            Primitive::DivVec { lhs, op1, op2 } => write!(f, "{lhs} = div_vec({op1}, {op2})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminator {
    Ret(Id),
    Jump(Id),
    IfElse { cond: Id, if_branch: Id, else_branch: Id },
    Fail(FailKind),
}

impl Terminator {
    pub fn uses(&self) -> Vec<Id> {
        match self {
            Terminator::Ret(v) => vec![*v],
            Terminator::Jump(_) => vec![],
            Terminator::IfElse { cond, .. } => vec![*cond],
            Terminator::Fail(_) => vec![],
        }
    }

    /// Labels this terminator jumps to, in emission order.
    pub fn targets(&self) -> Vec<Id> {
        match self {
            Terminator::Ret(_) | Terminator::Fail(_) => vec![],
            Terminator::Jump(l) => vec![*l],
            Terminator::IfElse { if_branch, else_branch, .. } => vec![*if_branch, *else_branch],
        }
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminator::Ret(v) => write!(f, "ret {v}"),
            Terminator::Jump(l) => write!(f, "jump {l}"),
            Terminator::IfElse { cond, if_branch, else_branch } => {
                write!(f, "if {cond} then {if_branch} else {else_branch}")
            }
            Terminator::Fail(kind) => write!(f, "fail {kind}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub label: Id,
    pub params: Vec<Id>,
    pub primitives: Vec<Primitive>,
    pub terminator: Terminator,
    /// Owning spanning-tree successors; recursive traversal follows these.
    pub children: Vec<Id>,
    /// Non-owning successors (loop back-edges, re-joins); real CFG edges,
    /// never followed recursively.
    pub joins: Vec<Id>,
    pub predecessors: Vec<Id>,
    pub unreachable: bool,
}

impl BasicBlock {
    pub fn new(label: Id) -> Self {
        BasicBlock {
            label,
            params: vec![],
            primitives: vec![],
            terminator: Terminator::Ret(Id::from("0".to_string())),
            children: vec![],
            joins: vec![],
            predecessors: vec![],
            unreachable: false,
        }
    }

    pub fn with_params(label: Id, params: Vec<Id>) -> Self {
        let mut b = Self::new(label);
        b.params = params;
        b
    }

    /// All successor labels, owning and non-owning, in emission order.
    pub fn successors(&self) -> Vec<Id> {
        let mut v = self.children.clone();
        v.extend(self.joins.iter().copied());
        v
    }
}

impl fmt::Display for BasicBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label)?;
        if !self.params.is_empty() {
            write!(f, "(")?;
            for (i, p) in self.params.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", strip_sigil(p))?;
            }
            write!(f, ")")?;
        }
        writeln!(f, ":")?;
        for p in &self.primitives {
            writeln!(f, "  {p}")?;
        }
        writeln!(f, "  {}", self.terminator)
    }
}

#[derive(Debug, Clone)]
pub struct MethodCfg {
    pub entry: Id,
    pub blocks: Map<Id, BasicBlock>,
    pub variables: Vec<Id>,
    pub var_to_type: Map<Id, Id>,
}

impl MethodCfg {
    pub fn new(entry_block: BasicBlock, variables: Vec<Id>, var_to_type: Map<Id, Id>) -> Self {
        let entry = entry_block.label;
        let mut blocks = Map::new();
        blocks.insert(entry, entry_block);
        MethodCfg { entry, blocks, variables, var_to_type }
    }

    pub fn entry_block(&self) -> &BasicBlock {
        &self.blocks[&self.entry]
    }

    /// Recursive print following only owning `children` edges, matching the
    /// original's `toStringRecursive`, starting from the entry block.
    pub fn to_string_recursive(&self) -> String {
        let mut out = String::new();
        let mut seen = crate::common::Set::new();
        self.print_from(self.entry, &mut out, &mut seen);
        out
    }

    fn print_from(&self, label: Id, out: &mut String, seen: &mut crate::common::Set<Id>) {
        if !seen.insert(label) {
            return;
        }
        if let Some(b) = self.blocks.get(&label) {
            out.push_str(&b.to_string());
            for c in &b.children {
                self.print_from(*c, out, seen);
            }
        }
    }
}

impl fmt::Display for MethodCfg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_recursive())
    }
}

#[derive(Debug, Clone)]
pub struct ClassCfg {
    pub name: Id,
    pub methods: Vec<MethodCfg>,
    pub vtable: Vec<Id>,
    pub field_table: Map<Id, u64>,
    pub field_to_type: Map<Id, Id>,
}

impl ClassCfg {
    pub fn data_string(&self) -> String {
        let mut buf = format!("global array {}: {{ ", vtable_name(&self.name));
        for (i, m) in self.vtable.iter().enumerate() {
            if i > 0 {
                buf.push_str(", ");
            }
            buf.push_str(m);
        }
        buf.push_str(" }\n");
        buf
    }
}

impl fmt::Display for ClassCfg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for m in &self.methods {
            write!(f, "{m}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ProgramCfg {
    pub main_method: MethodCfg,
    pub classes: Map<Id, ClassCfg>,
}

impl fmt::Display for ProgramCfg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "data:")?;
        for c in self.classes.values() {
            write!(f, "{}", c.data_string())?;
        }
        writeln!(f, "code:\n")?;
        for c in self.classes.values() {
            write!(f, "{c}")?;
            writeln!(f)?;
        }
        write!(f, "{}", self.main_method)
    }
}
