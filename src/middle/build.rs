//! The CFG builder: lowers the typed AST into the basic-block IR.
//!
//! Grounded directly on the original `CFGBuilder.cpp`'s per-node lowering
//! rules. The original threads an input-register hint and a
//! (value, static-type) result through a pair of explicit stacks; this
//! builder gets the same effect from an ordinary return value
//! (`lower_expr` returns `(Id, Type)`), which is the natural Rust shape for
//! a recursive-descent lowering pass and avoids the stack bookkeeping the
//! visitor-based original needed only because its traversal was driven by
//! double dispatch rather than direct recursion.

use crate::common::{Id, Map};
use crate::front::ast::{BOp, Class, Expr, Method, Program, Stmt, Type};

use super::ir::*;

struct MethodTables {
    returns: Map<Id, Type>,
}

struct Builder {
    name_counter: Map<String, u64>,
    class_alloc_size: Map<Id, u64>,
    class_num_fields: Map<Id, u64>,
    field_offset: Map<Id, Map<Id, u64>>,
    method_offset: Map<Id, u64>,
    field_type: Map<Id, Map<Id, Type>>,
    method_returns: Map<Id, MethodTables>,
    var_to_type: Map<Id, Type>,
    current: BasicBlock,
    blocks: Map<Id, BasicBlock>,
    current_class: Option<Id>,
}

fn type_tag(ty: &Type) -> Id {
    Id::from(ty.to_string())
}

impl Builder {
    fn create_name(&mut self, base: &str) -> String {
        let counter = self.name_counter.entry(base.to_string()).or_insert(1);
        let n = *counter;
        *counter += 1;
        format!("{base}{n}")
    }

    fn create_temp(&mut self) -> Id {
        reg(&self.create_name(""))
    }

    fn create_label(&mut self) -> Id {
        Id::from(self.create_name("l"))
    }

    /// Per-method counters (both temps and labels) are rebased at method
    /// entry, so register/label numbering is reproducible per method
    /// independent of compilation order of the rest of the program.
    fn reset_counters(&mut self) {
        self.name_counter.clear();
    }

    fn finish_block(&mut self, next: BasicBlock) -> Id {
        let finished = std::mem::replace(&mut self.current, next);
        let label = finished.label;
        self.blocks.insert(label, finished);
        label
    }

    fn add_new_child(&mut self, child_label: Id) {
        self.current.children.push(child_label);
    }

    fn add_predecessor_to(&mut self, label: Id, pred: Id) {
        if let Some(b) = self.blocks.get_mut(&label) {
            b.predecessors.push(pred);
        }
    }

    fn nonzero_check(&mut self, value: Id, fail_base: &str, kind: FailKind) {
        let fail_label = Id::from(self.create_name(fail_base));
        let mut fail_block = BasicBlock::new(fail_label);
        fail_block.terminator = Terminator::Fail(kind);
        fail_block.predecessors.push(self.current.label);

        let next_label = self.create_label();
        let mut next_block = BasicBlock::new(next_label);
        next_block.predecessors.push(self.current.label);

        self.add_new_child(next_label);
        self.add_new_child(fail_label);
        self.current.terminator = Terminator::IfElse { cond: value, if_branch: next_label, else_branch: fail_label };

        self.blocks.insert(fail_label, fail_block);
        self.finish_block(next_block);
    }

    fn lower_expr(&mut self, e: &Expr, dest_hint: Option<Id>) -> (Id, Type) {
        match e {
            Expr::IntLit(n) => (Id::from(n.to_string()), Type::Int),
            Expr::Var(name) => {
                let r = reg(name);
                let ty = self.var_to_type.get(&r).cloned().unwrap_or(Type::Int);
                (r, ty)
            }
            Expr::This => {
                let class = self.current_class.expect("'this' lowered outside of a method");
                (reg("this"), Type::Class(class))
            }
            Expr::Null(class) => (Id::from("0".to_string()), Type::Class(*class)),
            Expr::New(class) => {
                let ret = dest_hint.unwrap_or_else(|| self.create_temp());
                let size = *self.class_alloc_size.get(class).unwrap_or(&1);
                self.current.primitives.push(Primitive::Alloc { lhs: ret, size: Id::from(size.to_string()) });
                self.current.primitives.push(Primitive::Store { addr: ret, val: global(&vtable_name(class)) });
                let nfields = *self.class_num_fields.get(class).unwrap_or(&0);
                for i in 0..nfields {
                    self.current.primitives.push(Primitive::SetElt {
                        arr: ret,
                        index: Id::from((i + 1).to_string()),
                        val: Id::from("0".to_string()),
                    });
                }
                (ret, Type::Class(*class))
            }
            Expr::BinOp { op, lhs, rhs } => {
                let (r1, _) = self.lower_expr(lhs, None);
                let (r2, _) = self.lower_expr(rhs, None);
                let op = match op {
                    BOp::Add => ArithOp::Add,
                    BOp::Sub => ArithOp::Sub,
                    BOp::Mul => ArithOp::Mul,
                    BOp::Div => ArithOp::Div,
                };
                let ret = dest_hint.unwrap_or_else(|| self.create_temp());
                self.current.primitives.push(Primitive::Arith { lhs: ret, op1: r1, op, op2: r2 });
                (ret, Type::Int)
            }
            Expr::FieldRead { receiver, field } => {
                let (base, base_ty) = self.lower_expr(receiver, None);
                self.nonzero_check(base, "badpointer", FailKind::NotAPointer);
                let class = class_of(&base_ty);
                let offset = *self.field_offset.get(&class).and_then(|m| m.get(field)).unwrap_or(&0);
                let field_ty = self
                    .field_type
                    .get(&class)
                    .and_then(|m| m.get(field))
                    .cloned()
                    .unwrap_or(Type::Int);
                let ret = dest_hint.unwrap_or_else(|| self.create_temp());
                self.current.primitives.push(Primitive::GetElt { lhs: ret, arr: base, index: Id::from(offset.to_string()) });
                (ret, field_ty)
            }
            Expr::Call { receiver, method, args } => {
                let mut regargs = vec![];
                for a in args {
                    let (r, _) = self.lower_expr(a, None);
                    regargs.push(r);
                }
                let (receiver_reg, receiver_ty) = self.lower_expr(receiver, None);
                self.nonzero_check(receiver_reg, "badpointer", FailKind::NotAPointer);
                let class = class_of(&receiver_ty);
                let vtable = self.create_temp();
                self.current.primitives.push(Primitive::Load { lhs: vtable, addr: receiver_reg });
                let method_addr = self.create_temp();
                let index = *self.method_offset.get(method).unwrap_or(&0);
                self.current
                    .primitives
                    .push(Primitive::GetElt { lhs: method_addr, arr: vtable, index: Id::from(index.to_string()) });
                let returns = self
                    .method_returns
                    .get(&class)
                    .and_then(|t| t.returns.get(method))
                    .cloned()
                    .unwrap_or(Type::Int);
                let ret = dest_hint.unwrap_or_else(|| self.create_temp());
                self.current
                    .primitives
                    .push(Primitive::Call { lhs: ret, code_addr: method_addr, receiver: receiver_reg, args: regargs });
                (ret, returns)
            }
        }
    }

    fn lower_stmt(&mut self, s: &Stmt) {
        if self.current.unreachable {
            return;
        }
        match s {
            Stmt::Assign { var, value } => {
                let dest = reg(var);
                let (v, _) = self.lower_expr(value, Some(dest));
                if v != dest {
                    self.current.primitives.push(Primitive::Assign { lhs: dest, rhs: v });
                }
            }
            Stmt::Discard { value } => {
                self.lower_expr(value, None);
            }
            Stmt::FieldWrite { receiver, field, value } => {
                let (base, base_ty) = self.lower_expr(receiver, None);
                self.nonzero_check(base, "badpointer", FailKind::NotAPointer);
                let class = class_of(&base_ty);
                let offset = *self.field_offset.get(&class).and_then(|m| m.get(field)).unwrap_or(&0);
                let (val, _) = self.lower_expr(value, None);
                self.current.primitives.push(Primitive::SetElt { arr: base, index: Id::from(offset.to_string()), val });
                let _ = class;
            }
            Stmt::If { guard, then_branch, else_branch } => self.lower_if_else(guard, then_branch, else_branch),
            Stmt::IfOnly { guard, then_branch } => self.lower_ifonly(guard, then_branch),
            Stmt::While { guard, body } => self.lower_while(guard, body),
            Stmt::Return(e) => {
                let (v, _) = self.lower_expr(e, None);
                self.current.terminator = Terminator::Ret(v);
                let unreachable_label = Id::from(self.create_name("unreachable"));
                let mut next = BasicBlock::new(unreachable_label);
                next.unreachable = true;
                self.finish_block(next);
            }
            Stmt::Print(e) => {
                let (v, _) = self.lower_expr(e, None);
                self.current.primitives.push(Primitive::Print { val: v });
            }
        }
    }

    fn lower_stmts(&mut self, stmts: &[Stmt]) {
        for s in stmts {
            if self.current.unreachable {
                break;
            }
            self.lower_stmt(s);
        }
    }

    fn lower_if_else(&mut self, guard: &Expr, then_branch: &[Stmt], else_branch: &[Stmt]) {
        let (cond, _) = self.lower_expr(guard, None);

        let true_label = self.create_label();
        let false_label = self.create_label();
        self.add_new_child(true_label);
        self.add_new_child(false_label);
        self.current.terminator = Terminator::IfElse { cond, if_branch: true_label, else_branch: false_label };

        let mut true_block = BasicBlock::new(true_label);
        true_block.predecessors.push(self.current.label);
        let outer = self.finish_block(true_block);
        self.lower_stmts(then_branch);
        let last_true = self.current.label;
        let last_true_unreachable = self.current.unreachable;

        let mut false_block = BasicBlock::new(false_label);
        false_block.predecessors.push(outer);
        self.finish_block(false_block);
        self.lower_stmts(else_branch);
        let last_false = self.current.label;
        let last_false_unreachable = self.current.unreachable;

        let final_label = self.create_label();
        let mut final_block = BasicBlock::new(final_label);
        let mut owned = false;

        if !last_false_unreachable {
            final_block.predecessors.push(last_false);
            owned = true;
            self.current.terminator = Terminator::Jump(final_label);
            self.current.children.push(final_label);
        }
        self.finish_block(final_block);

        if !last_true_unreachable {
            if let Some(b) = self.blocks.get_mut(&last_true) {
                b.terminator = Terminator::Jump(final_label);
                if owned {
                    b.joins.push(final_label);
                } else {
                    b.children.push(final_label);
                    owned = true;
                }
            }
            self.current.predecessors.push(last_true);
        }

        self.current.unreachable = !owned;
    }

    fn lower_ifonly(&mut self, guard: &Expr, then_branch: &[Stmt]) {
        let (cond, _) = self.lower_expr(guard, None);

        let true_label = self.create_label();
        let false_label = self.create_label();
        self.add_new_child(true_label);
        self.add_new_child(false_label);
        self.current.terminator = Terminator::IfElse { cond, if_branch: true_label, else_branch: false_label };

        let mut true_block = BasicBlock::new(true_label);
        true_block.predecessors.push(self.current.label);

        let mut false_block_stub = BasicBlock::new(false_label);
        false_block_stub.predecessors.push(self.current.label);
        self.blocks.insert(false_label, false_block_stub);

        self.finish_block(true_block);
        self.lower_stmts(then_branch);

        if !self.current.unreachable {
            self.current.terminator = Terminator::Jump(false_label);
            self.current.joins.push(false_label);
            self.add_predecessor_to(false_label, self.current.label);
        }

        let false_block = self.blocks.remove(&false_label).expect("false block registered above");
        self.finish_block(false_block);
    }

    fn lower_while(&mut self, guard: &Expr, body: &[Stmt]) {
        let cond_label = self.create_label();
        self.add_new_child(cond_label);
        self.current.terminator = Terminator::Jump(cond_label);

        let mut cond_block = BasicBlock::new(cond_label);
        cond_block.predecessors.push(self.current.label);
        self.finish_block(cond_block);

        let (cond, _) = self.lower_expr(guard, None);

        let true_label = self.create_label();
        let false_label = self.create_label();
        self.add_new_child(true_label);
        self.add_new_child(false_label);
        self.current.terminator = Terminator::IfElse { cond, if_branch: true_label, else_branch: false_label };

        let mut true_block = BasicBlock::new(true_label);
        true_block.predecessors.push(cond_label);
        let mut false_block_stub = BasicBlock::new(false_label);
        false_block_stub.predecessors.push(cond_label);
        self.blocks.insert(false_label, false_block_stub);

        self.finish_block(true_block);
        self.lower_stmts(body);

        if !self.current.unreachable {
            self.current.terminator = Terminator::Jump(cond_label);
            self.current.joins.push(cond_label);
            self.add_predecessor_to(cond_label, self.current.label);
        }

        let false_block = self.blocks.remove(&false_label).expect("false block registered above");
        self.finish_block(false_block);
    }

    fn lower_method(&mut self, class_name: Id, m: &Method) -> MethodCfg {
        self.reset_counters();
        self.var_to_type.clear();
        self.current_class = Some(class_name);

        let method_symbol = method_symbol(&class_name, &m.name);
        let this_reg = reg("this");
        let mut params = vec![this_reg];
        self.var_to_type.insert(this_reg, Type::Class(class_name));
        for p in &m.params {
            let r = reg(&p.name);
            params.push(r);
            self.var_to_type.insert(r, p.ty.clone());
        }

        self.current = BasicBlock::with_params(method_symbol, params);
        self.blocks = Map::new();

        let mut variables = vec![];
        for p in &m.params {
            variables.push(p.name);
        }
        for l in &m.locals {
            let r = reg(&l.name);
            self.current.primitives.push(Primitive::Assign { lhs: r, rhs: Id::from("0".to_string()) });
            self.var_to_type.insert(r, l.ty.clone());
            variables.push(l.name);
        }

        self.lower_stmts(&m.body);

        let entry = method_symbol;
        let final_block = std::mem::replace(&mut self.current, BasicBlock::new(entry));
        self.blocks.insert(final_block.label, final_block);

        let var_to_type: Map<Id, Id> = self.var_to_type.iter().map(|(k, v)| (*k, type_tag(v))).collect();
        MethodCfg { entry, blocks: std::mem::take(&mut self.blocks), variables, var_to_type }
    }

    fn lower_class(&mut self, c: &Class) -> ClassCfg {
        let vtable_size = self.method_offset.len();
        let mut vtable = vec![Id::from("0".to_string()); vtable_size];
        for m in &c.methods {
            if let Some(&idx) = self.method_offset.get(&m.name) {
                vtable[idx as usize] = method_symbol(&c.name, &m.name);
            }
        }
        let field_table: Map<Id, u64> = self.field_offset.get(&c.name).cloned().unwrap_or_default();
        let field_to_type: Map<Id, Id> = c.fields.iter().map(|p| (p.name, type_tag(&p.ty))).collect();

        let methods = c.methods.iter().map(|m| self.lower_method(c.name, m)).collect();

        ClassCfg { name: c.name, methods, vtable, field_table, field_to_type }
    }
}

fn class_of(ty: &Type) -> Id {
    match ty {
        Type::Class(c) => *c,
        Type::Int => Id::from("int".to_string()),
    }
}

pub fn build(program: &Program) -> ProgramCfg {
    let mut class_alloc_size = Map::new();
    let mut class_num_fields = Map::new();
    let mut field_offset = Map::new();
    let mut method_offset = Map::new();
    let mut field_type: Map<Id, Map<Id, Type>> = Map::new();
    let mut method_returns: Map<Id, MethodTables> = Map::new();

    // Pre-pass: assign each distinct method name a first-seen offset across
    // the whole program, so vtable layout is reproducible regardless of
    // class declaration order. Field slots, by contrast, are numbered per
    // class starting at 1 (slot 0 is the vtable pointer) — a field's offset
    // depends only on its own class's field list, never on any other class.
    for c in &program.classes {
        class_alloc_size.insert(c.name, 1 + c.fields.len() as u64);
        class_num_fields.insert(c.name, c.fields.len() as u64);
        let mut offsets_of_class = Map::new();
        for (i, f) in c.fields.iter().enumerate() {
            offsets_of_class.insert(f.name, 1 + i as u64);
        }
        field_offset.insert(c.name, offsets_of_class);
        for m in &c.methods {
            if !method_offset.contains_key(&m.name) {
                method_offset.insert(m.name, method_offset.len() as u64);
            }
        }
        let mut fields_of_class = Map::new();
        for f in &c.fields {
            fields_of_class.insert(f.name, f.ty.clone());
        }
        field_type.insert(c.name, fields_of_class);
        let mut returns = Map::new();
        for m in &c.methods {
            returns.insert(m.name, m.returns.clone());
        }
        method_returns.insert(c.name, MethodTables { returns });
    }

    let mut builder = Builder {
        name_counter: Map::new(),
        class_alloc_size,
        class_num_fields,
        field_offset,
        method_offset,
        field_type,
        method_returns,
        var_to_type: Map::new(),
        current: BasicBlock::new(Id::from("main".to_string())),
        blocks: Map::new(),
        current_class: None,
    };

    let classes: Map<Id, ClassCfg> = program.classes.iter().map(|c| (c.name, builder.lower_class(c))).collect();

    builder.reset_counters();
    builder.var_to_type.clear();
    builder.current_class = None;
    let main_label = Id::from("main".to_string());
    builder.current = BasicBlock::new(main_label);
    builder.blocks = Map::new();

    let mut variables = vec![];
    for p in &program.main_params {
        let r = reg(&p.name);
        builder.current.primitives.push(Primitive::Assign { lhs: r, rhs: Id::from("0".to_string()) });
        builder.var_to_type.insert(r, p.ty.clone());
        variables.push(p.name);
    }

    builder.lower_stmts(&program.main_body);

    let final_block = std::mem::replace(&mut builder.current, BasicBlock::new(main_label));
    builder.blocks.insert(final_block.label, final_block);
    let var_to_type: Map<Id, Id> = builder.var_to_type.iter().map(|(k, v)| (*k, type_tag(v))).collect();
    let main_method = MethodCfg { entry: main_label, blocks: std::mem::take(&mut builder.blocks), variables, var_to_type };

    ProgramCfg { main_method, classes }
}
