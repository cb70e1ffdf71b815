//! The type checker: a single pass per method body that validates (but does
//! not rewrite) the AST against the class/field/method declarations.

use derive_more::Display;

use crate::common::{Id, Map};

use super::ast::*;

#[derive(Display, Debug)]
#[display("Type checker error: {message} (in statement: {context})")]
pub struct TypeError {
    pub message: String,
    pub context: String,
}

fn err(message: impl Into<String>, context: impl std::fmt::Display) -> TypeError {
    TypeError { message: message.into(), context: context.to_string() }
}

struct MethodSig {
    params: Vec<Type>,
    returns: Type,
}

struct ClassDecl {
    fields: Map<Id, Type>,
    methods: Map<Id, MethodSig>,
}

struct Checker {
    classes: Map<Id, ClassDecl>,
}

impl Checker {
    fn lookup_class(&self, name: &Id) -> Result<&ClassDecl, TypeError> {
        self.classes
            .get(name)
            .ok_or_else(|| err(format!("no such class {name}"), "<declaration>"))
    }

    fn check_expr(
        &self,
        e: &Expr,
        env: &Map<Id, Type>,
        this_class: Option<&Id>,
        ctx: &Stmt,
    ) -> Result<Type, TypeError> {
        match e {
            Expr::IntLit(_) => Ok(Type::Int),
            Expr::Var(name) => env
                .get(name)
                .cloned()
                .ok_or_else(|| err(format!("undeclared variable {name}"), ctx)),
            Expr::This => this_class
                .map(|c| Type::Class(*c))
                .ok_or_else(|| err("'this' used outside of a method", ctx)),
            Expr::Null(class) => {
                self.lookup_class(class)?;
                Ok(Type::Class(*class))
            }
            Expr::New(class) => {
                self.lookup_class(class)?;
                Ok(Type::Class(*class))
            }
            Expr::BinOp { lhs, rhs, .. } => {
                let lt = self.check_expr(lhs, env, this_class, ctx)?;
                let rt = self.check_expr(rhs, env, this_class, ctx)?;
                if lt != Type::Int || rt != Type::Int {
                    return Err(err("arithmetic operands must both be int", ctx));
                }
                Ok(Type::Int)
            }
            Expr::FieldRead { receiver, field } => {
                let rt = self.check_expr(receiver, env, this_class, ctx)?;
                let class = match rt {
                    Type::Class(c) => c,
                    Type::Int => return Err(err("cannot read a field of an int", ctx)),
                };
                let decl = self.lookup_class(&class)?;
                decl.fields
                    .get(field)
                    .cloned()
                    .ok_or_else(|| err(format!("no such field {field} on class {class}"), ctx))
            }
            Expr::Call { receiver, method, args } => {
                let rt = self.check_expr(receiver, env, this_class, ctx)?;
                let class = match rt {
                    Type::Class(c) => c,
                    Type::Int => return Err(err("cannot call a method on an int", ctx)),
                };
                let decl = self.lookup_class(&class)?;
                let sig = decl
                    .methods
                    .get(method)
                    .ok_or_else(|| err(format!("no such method {method} on class {class}"), ctx))?;
                if sig.params.len() != args.len() {
                    return Err(err(
                        format!("method {method} expects {} arguments, found {}", sig.params.len(), args.len()),
                        ctx,
                    ));
                }
                for (arg, expected) in args.iter().zip(&sig.params) {
                    let at = self.check_expr(arg, env, this_class, ctx)?;
                    if &at != expected {
                        return Err(err(format!("argument to {method} has the wrong type"), ctx));
                    }
                }
                Ok(sig.returns.clone())
            }
        }
    }

    fn check_stmts(
        &self,
        stmts: &[Stmt],
        env: &Map<Id, Type>,
        this_class: Option<&Id>,
        returns: &Type,
    ) -> Result<(), TypeError> {
        for s in stmts {
            self.check_stmt(s, env, this_class, returns)?;
        }
        Ok(())
    }

    fn check_stmt(
        &self,
        s: &Stmt,
        env: &Map<Id, Type>,
        this_class: Option<&Id>,
        returns: &Type,
    ) -> Result<(), TypeError> {
        match s {
            Stmt::Assign { var, value } => {
                let declared = env
                    .get(var)
                    .cloned()
                    .ok_or_else(|| err(format!("undeclared variable {var}"), s))?;
                let vt = self.check_expr(value, env, this_class, s)?;
                if vt != declared {
                    return Err(err(format!("cannot assign a {vt} to {var}: {declared}"), s));
                }
                Ok(())
            }
            Stmt::Discard { value } => {
                self.check_expr(value, env, this_class, s)?;
                Ok(())
            }
            Stmt::FieldWrite { receiver, field, value } => {
                let rt = self.check_expr(receiver, env, this_class, s)?;
                let class = match rt {
                    Type::Class(c) => c,
                    Type::Int => return Err(err("cannot write a field of an int", s)),
                };
                let decl = self.lookup_class(&class)?;
                let ft = decl
                    .fields
                    .get(field)
                    .cloned()
                    .ok_or_else(|| err(format!("no such field {field} on class {class}"), s))?;
                let vt = self.check_expr(value, env, this_class, s)?;
                if vt != ft {
                    return Err(err(format!("cannot assign a {vt} to field {field}: {ft}"), s));
                }
                Ok(())
            }
            Stmt::If { guard, then_branch, else_branch } => {
                self.check_guard(guard, env, this_class, s)?;
                self.check_stmts(then_branch, env, this_class, returns)?;
                self.check_stmts(else_branch, env, this_class, returns)
            }
            Stmt::IfOnly { guard, then_branch } => {
                self.check_guard(guard, env, this_class, s)?;
                self.check_stmts(then_branch, env, this_class, returns)
            }
            Stmt::While { guard, body } => {
                self.check_guard(guard, env, this_class, s)?;
                self.check_stmts(body, env, this_class, returns)
            }
            Stmt::Return(e) => {
                let rt = self.check_expr(e, env, this_class, s)?;
                if &rt != returns {
                    return Err(err(format!("method returns {returns}, found {rt}"), s));
                }
                Ok(())
            }
            Stmt::Print(e) => {
                let t = self.check_expr(e, env, this_class, s)?;
                if t != Type::Int {
                    return Err(err("print requires an int", s));
                }
                Ok(())
            }
        }
    }

    fn check_guard(
        &self,
        guard: &Expr,
        env: &Map<Id, Type>,
        this_class: Option<&Id>,
        ctx: &Stmt,
    ) -> Result<(), TypeError> {
        let t = self.check_expr(guard, env, this_class, ctx)?;
        if t != Type::Int {
            return Err(err("branch condition must be an int", ctx));
        }
        Ok(())
    }
}

fn env_of(params: &[Param], locals: &[Param]) -> Map<Id, Type> {
    let mut env = Map::new();
    for p in params.iter().chain(locals) {
        env.insert(p.name, p.ty.clone());
    }
    env
}

pub fn check(program: &Program) -> Result<(), TypeError> {
    let mut classes = Map::new();
    for c in &program.classes {
        let fields = c.fields.iter().map(|p| (p.name, p.ty.clone())).collect();
        let methods = c
            .methods
            .iter()
            .map(|m| (m.name, MethodSig { params: m.params.iter().map(|p| p.ty.clone()).collect(), returns: m.returns.clone() }))
            .collect();
        classes.insert(c.name, ClassDecl { fields, methods });
    }
    let checker = Checker { classes };

    for c in &program.classes {
        checker.lookup_class(&c.name)?;
        for m in &c.methods {
            let env = env_of(&m.params, &m.locals);
            checker.check_stmts(&m.body, &env, Some(&c.name), &m.returns)?;
        }
    }

    let env = env_of(&program.main_params, &[]);
    checker.check_stmts(&program.main_body, &env, None, &Type::Int)
}
