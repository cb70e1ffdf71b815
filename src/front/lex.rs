//! The lexer.

use derive_more::Display;
use regex::Regex;

/// Tokens in the program
#[derive(Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display("kind: '{kind}', part of input: '{text}'")]
pub struct Token<'src> {
    /// What token class this token belongs to.
    pub kind: TokenKind,
    /// What part of the input this token carries.
    pub text: &'src str,
}

/// Token classes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum TokenKind {
    #[display("id")]
    Id,
    #[display("num")]
    Num,
    #[display("class")]
    KwClass,
    #[display("fields")]
    KwFields,
    #[display("method")]
    KwMethod,
    #[display("returning")]
    KwReturning,
    #[display("with")]
    KwWith,
    #[display("locals")]
    KwLocals,
    #[display("main")]
    KwMain,
    #[display("if")]
    KwIf,
    #[display("else")]
    KwElse,
    #[display("ifonly")]
    KwIfOnly,
    #[display("while")]
    KwWhile,
    #[display("return")]
    KwReturn,
    #[display("print")]
    KwPrint,
    #[display("this")]
    KwThis,
    #[display("null")]
    KwNull,
    #[display("(")]
    LParen,
    #[display(")")]
    RParen,
    #[display("{{")]
    LBrace,
    #[display("}}")]
    RBrace,
    #[display("[")]
    LBracket,
    #[display("]")]
    RBracket,
    #[display(":")]
    Colon,
    #[display(",")]
    Comma,
    #[display(".")]
    Dot,
    #[display("=")]
    Assign,
    #[display("!")]
    Bang,
    #[display("&")]
    Amp,
    #[display("^")]
    Caret,
    #[display("@")]
    At,
    #[display("+")]
    Plus,
    #[display("-")]
    Minus,
    #[display("*")]
    Star,
    #[display("/")]
    Slash,
    #[display("_")]
    Underscore,
}

pub struct LexError(usize, char);

impl Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Lexer error: unexpected character {:?} at {}", self.1, self.0)
    }
}

impl std::fmt::Debug for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Lexer error: unexpected character {:?} at {}", self.1, self.0)
    }
}

pub struct Lexer<'input> {
    input: &'input str,
    pos: usize,
    whitespace: Regex,
    matchers: Vec<(Regex, TokenKind)>,
}

impl<'input> Lexer<'input> {
    pub fn new(input: &'input str) -> Self {
        use TokenKind::*;
        // Keyword matchers are listed before the generic identifier matcher
        // so that on an equal-length match, the keyword wins the tie.
        let keyword = |word: &str| Regex::new(&format!(r"\A{word}\b")).unwrap();
        Lexer {
            input,
            pos: 0,
            // newlines are ordinary whitespace: statements are delimited by
            // the grammar, not by layout
            whitespace: Regex::new(r"\A(?:[ \t\f\r\n\v]|(?://.*))*").unwrap(),
            matchers: vec![
                (keyword("class"), KwClass),
                (keyword("fields"), KwFields),
                (keyword("method"), KwMethod),
                (keyword("returning"), KwReturning),
                (keyword("with"), KwWith),
                (keyword("locals"), KwLocals),
                (keyword("main"), KwMain),
                (keyword("ifonly"), KwIfOnly),
                (keyword("if"), KwIf),
                (keyword("else"), KwElse),
                (keyword("while"), KwWhile),
                (keyword("return"), KwReturn),
                (keyword("print"), KwPrint),
                (keyword("this"), KwThis),
                (keyword("null"), KwNull),
                (Regex::new(r"\A[A-Za-z_][A-Za-z0-9_]*").unwrap(), Id),
                (Regex::new(r"\A[0-9]+").unwrap(), Num),
                (Regex::new(r"\A\(").unwrap(), LParen),
                (Regex::new(r"\A\)").unwrap(), RParen),
                (Regex::new(r"\A\{").unwrap(), LBrace),
                (Regex::new(r"\A\}").unwrap(), RBrace),
                (Regex::new(r"\A\[").unwrap(), LBracket),
                (Regex::new(r"\A\]").unwrap(), RBracket),
                (Regex::new(r"\A:").unwrap(), Colon),
                (Regex::new(r"\A,").unwrap(), Comma),
                (Regex::new(r"\A\.").unwrap(), Dot),
                (Regex::new(r"\A=").unwrap(), Assign),
                (Regex::new(r"\A!").unwrap(), Bang),
                (Regex::new(r"\A&").unwrap(), Amp),
                (Regex::new(r"\A\^").unwrap(), Caret),
                (Regex::new(r"\A@").unwrap(), At),
                (Regex::new(r"\A\+").unwrap(), Plus),
                (Regex::new(r"\A-").unwrap(), Minus),
                (Regex::new(r"\A\*").unwrap(), Star),
                (Regex::new(r"\A/").unwrap(), Slash),
                (Regex::new(r"\A_").unwrap(), Underscore),
            ],
        }
    }

    /// Has the lexer reached the end of input?
    pub fn end_of_input(&self) -> bool {
        self.pos == self.input.len()
    }

    // Skip comments and whitespace
    fn skip_whitespace(&mut self) {
        if let Some(m) = self.whitespace.find(&self.input[self.pos..]) {
            self.pos += m.end()
        }
    }

    /// Get the next token if possible.
    ///
    /// The return type distinguishes between end-of-input and lexer error.
    pub fn next(&mut self) -> Result<Option<Token<'input>>, LexError> {
        self.skip_whitespace();
        if self.end_of_input() {
            return Ok(None);
        }
        let rest = &self.input[self.pos..];
        let mut best: Option<(usize, TokenKind)> = None;
        for (re, kind) in &self.matchers {
            if let Some(m) = re.find(rest) {
                let len = m.end();
                if len > 0 && best.as_ref().map(|(blen, _)| len > *blen).unwrap_or(true) {
                    best = Some((len, *kind));
                }
            }
        }
        match best {
            Some((len, kind)) => {
                let text = &rest[..len];
                self.pos += len;
                Ok(Some(Token { kind, text }))
            }
            None => {
                let c = rest.chars().next().unwrap();
                Err(LexError(self.pos, c))
            }
        }
    }
}
