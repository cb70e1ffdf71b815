//! The parser

use std::fmt::Debug;

use derive_more::derive::Display;

use crate::common::Id;

use super::ast::*;
use super::lex::*;

const MAXARGS: usize = 6;

#[derive(Display)]
#[display("Parser error: {}", self.0)]
pub struct ParseError(String);

impl Debug for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

fn err(msg: impl Into<String>) -> ParseError {
    ParseError(msg.into())
}

struct Parser<'src> {
    tokens: Vec<Token<'src>>,
    pos: usize,
}

impl<'src> Parser<'src> {
    fn peek(&self) -> Option<Token<'src>> {
        self.tokens.get(self.pos).copied()
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    fn advance(&mut self) -> Option<Token<'src>> {
        let t = self.peek();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token<'src>, ParseError> {
        match self.peek() {
            Some(t) if t.kind == kind => {
                self.pos += 1;
                Ok(t)
            }
            Some(t) => Err(err(format!("expected {kind}, found {}", t.kind))),
            None => Err(err(format!("expected {kind}, found end of input"))),
        }
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek_kind() == Some(kind)
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn ident(&mut self) -> Result<Id, ParseError> {
        let t = self.expect(TokenKind::Id)?;
        Ok(Id::from(t.text.to_string()))
    }

    fn parse_type(&mut self) -> Result<Type, ParseError> {
        if self.eat(TokenKind::KwThis) {
            return Err(err("'this' is not a valid type name"));
        }
        let name = self.ident()?;
        if &*name == "int" {
            Ok(Type::Int)
        } else {
            Ok(Type::Class(name))
        }
    }

    fn parse_typed_list(&mut self) -> Result<Vec<Param>, ParseError> {
        let mut out = vec![];
        loop {
            if !self.at(TokenKind::Id) {
                break;
            }
            let name = self.ident()?;
            self.expect(TokenKind::Colon)?;
            let ty = self.parse_type()?;
            out.push(Param { name, ty });
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        Ok(out)
    }

    fn parse_program(&mut self) -> Result<Program, ParseError> {
        let mut classes = vec![];
        while self.at(TokenKind::KwClass) {
            classes.push(self.parse_class()?);
        }
        self.expect(TokenKind::KwMain)?;
        self.expect(TokenKind::KwWith)?;
        let main_params = self.parse_typed_list()?;
        self.expect(TokenKind::Colon)?;
        let main_body = self.parse_stmts_until_eof()?;
        Ok(Program { classes, main_params, main_body })
    }

    fn parse_class(&mut self) -> Result<Class, ParseError> {
        self.expect(TokenKind::KwClass)?;
        let name = self.ident()?;
        self.expect(TokenKind::LBracket)?;
        let mut fields = vec![];
        if self.eat(TokenKind::KwFields) {
            fields = self.parse_typed_list()?;
        }
        let mut methods = vec![];
        while self.at(TokenKind::KwMethod) {
            methods.push(self.parse_method()?);
        }
        self.expect(TokenKind::RBracket)?;
        Ok(Class { name, fields, methods })
    }

    fn parse_method(&mut self) -> Result<Method, ParseError> {
        self.expect(TokenKind::KwMethod)?;
        let name = self.ident()?;
        self.expect(TokenKind::LParen)?;
        let params = self.parse_typed_list()?;
        if params.len() > MAXARGS {
            return Err(err(format!("method {name} takes more than {MAXARGS} arguments")));
        }
        self.expect(TokenKind::RParen)?;
        self.expect(TokenKind::KwReturning)?;
        let returns = self.parse_type()?;
        self.expect(TokenKind::KwWith)?;
        let mut locals = vec![];
        if self.eat(TokenKind::KwLocals) {
            locals = self.parse_typed_list()?;
        }
        self.expect(TokenKind::Colon)?;
        let body = self.parse_stmts_until(&[TokenKind::KwMethod, TokenKind::RBracket])?;
        Ok(Method { name, params, returns, locals, body })
    }

    fn parse_stmts_until_eof(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let mut out = vec![];
        while self.peek().is_some() {
            out.push(self.parse_stmt()?);
        }
        Ok(out)
    }

    fn parse_stmts_until(&mut self, stop: &[TokenKind]) -> Result<Vec<Stmt>, ParseError> {
        let mut out = vec![];
        loop {
            match self.peek_kind() {
                None => break,
                Some(k) if stop.contains(&k) => break,
                Some(TokenKind::RBrace) => break,
                _ => out.push(self.parse_stmt()?),
            }
        }
        Ok(out)
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(TokenKind::LBrace)?;
        let body = self.parse_stmts_until(&[TokenKind::RBrace])?;
        self.expect(TokenKind::RBrace)?;
        Ok(body)
    }

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        match self.peek_kind() {
            Some(TokenKind::KwIf) => {
                self.advance();
                let guard = self.parse_expr()?;
                self.expect(TokenKind::Colon)?;
                let then_branch = self.parse_block()?;
                self.expect(TokenKind::KwElse)?;
                let else_branch = self.parse_block()?;
                Ok(Stmt::If { guard, then_branch, else_branch })
            }
            Some(TokenKind::KwIfOnly) => {
                self.advance();
                let guard = self.parse_expr()?;
                self.expect(TokenKind::Colon)?;
                let then_branch = self.parse_block()?;
                Ok(Stmt::IfOnly { guard, then_branch })
            }
            Some(TokenKind::KwWhile) => {
                self.advance();
                let guard = self.parse_expr()?;
                self.expect(TokenKind::Colon)?;
                let body = self.parse_block()?;
                Ok(Stmt::While { guard, body })
            }
            Some(TokenKind::KwReturn) => {
                self.advance();
                let e = self.parse_expr()?;
                Ok(Stmt::Return(e))
            }
            Some(TokenKind::KwPrint) => {
                self.advance();
                let e = self.parse_expr()?;
                Ok(Stmt::Print(e))
            }
            Some(TokenKind::Underscore) => {
                self.advance();
                self.expect(TokenKind::Assign)?;
                let value = self.parse_expr()?;
                Ok(Stmt::Discard { value })
            }
            Some(TokenKind::Bang) => {
                self.advance();
                let receiver = self.parse_expr()?;
                self.expect(TokenKind::Dot)?;
                let field = self.ident()?;
                self.expect(TokenKind::Assign)?;
                let value = self.parse_expr()?;
                Ok(Stmt::FieldWrite { receiver, field, value })
            }
            Some(TokenKind::Id) => {
                let var = self.ident()?;
                self.expect(TokenKind::Assign)?;
                let value = self.parse_expr()?;
                Ok(Stmt::Assign { var, value })
            }
            Some(k) => Err(err(format!("unexpected token {k} at start of statement"))),
            None => Err(err("unexpected end of input, expected a statement")),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        match self.peek_kind() {
            Some(TokenKind::Num) => {
                let t = self.advance().unwrap();
                let n: u32 = t.text.parse().map_err(|_| err(format!("invalid integer literal {}", t.text)))?;
                Ok(Expr::IntLit(n))
            }
            Some(TokenKind::KwThis) => {
                self.advance();
                Ok(Expr::This)
            }
            Some(TokenKind::KwNull) => {
                self.advance();
                self.expect(TokenKind::Colon)?;
                let class = self.ident()?;
                Ok(Expr::Null(class))
            }
            Some(TokenKind::At) => {
                self.advance();
                let class = self.ident()?;
                Ok(Expr::New(class))
            }
            Some(TokenKind::Caret) => {
                self.advance();
                let receiver = Box::new(self.parse_expr()?);
                self.expect(TokenKind::Dot)?;
                let method = self.ident()?;
                self.expect(TokenKind::LParen)?;
                let mut args = vec![];
                if !self.at(TokenKind::RParen) {
                    loop {
                        args.push(self.parse_expr()?);
                        if !self.eat(TokenKind::Comma) {
                            break;
                        }
                    }
                }
                if args.len() > MAXARGS {
                    return Err(err(format!("call to {method} takes more than {MAXARGS} arguments")));
                }
                self.expect(TokenKind::RParen)?;
                Ok(Expr::Call { receiver, method, args })
            }
            Some(TokenKind::Amp) => {
                self.advance();
                let receiver = Box::new(self.parse_expr()?);
                self.expect(TokenKind::Dot)?;
                let field = self.ident()?;
                Ok(Expr::FieldRead { receiver, field })
            }
            Some(TokenKind::LParen) => {
                self.advance();
                let lhs = Box::new(self.parse_expr()?);
                let op = match self.peek_kind() {
                    Some(TokenKind::Plus) => BOp::Add,
                    Some(TokenKind::Minus) => BOp::Sub,
                    Some(TokenKind::Star) => BOp::Mul,
                    Some(TokenKind::Slash) => BOp::Div,
                    Some(k) => return Err(err(format!("expected an arithmetic operator, found {k}"))),
                    None => return Err(err("expected an arithmetic operator, found end of input")),
                };
                self.advance();
                let rhs = Box::new(self.parse_expr()?);
                self.expect(TokenKind::RParen)?;
                Ok(Expr::BinOp { op, lhs, rhs })
            }
            Some(TokenKind::Id) => {
                let name = self.ident()?;
                Ok(Expr::Var(name))
            }
            Some(k) => Err(err(format!("unexpected token {k} at start of expression"))),
            None => Err(err("unexpected end of input, expected an expression")),
        }
    }
}

pub fn parse(input: &str) -> Result<Program, ParseError> {
    let mut lexer = Lexer::new(input);
    let mut tokens = vec![];
    loop {
        match lexer.next().map_err(|e| err(e.to_string()))? {
            Some(t) => tokens.push(t),
            None => break,
        }
    }
    let mut parser = Parser { tokens, pos: 0 };
    let program = parser.parse_program()?;
    if parser.peek().is_some() {
        return Err(err("trailing input after end of program"));
    }
    Ok(program)
}
