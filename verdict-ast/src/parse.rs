//! Hand-rolled tokenizer and recursive-descent parser for the policy
//! language.
//!
//! Grammar sketch:
//!
//! ```text
//! module  := "package" dotted-path rule*
//! rule    := NAME ("[" term "]")? ("=" term)? (":-" body)?
//! body    := expr ("," expr)*
//! expr    := "not"? term (relop term)?
//! term    := scalar | var | ref | array | object | set
//! ```
//!
//! A rule with no body gets the body `true`. `_` parses as a fresh
//! wildcard variable per occurrence.

use serde_json::Number;

use crate::error::AstErrors;
use crate::module::{BinOp, Body, Expr, ExprKind, Location, Module, Package, Rule};
use crate::term::{Ref, Term, Value, DATA_ROOT};

type Result<T> = std::result::Result<T, AstErrors>;

/// Parse a complete module.
pub fn parse_module(src: &str) -> Result<Module> {
    Parser::new(src)?.module()
}

/// Parse a query body.
pub fn parse_body(src: &str) -> Result<Body> {
    let mut p = Parser::new(src)?;
    let body = p.body()?;
    p.expect_eof()?;
    Ok(body)
}

/// Parse a single term, requiring the whole input to be consumed.
pub fn parse_term_str(src: &str) -> Result<Term> {
    let mut p = Parser::new(src)?;
    let term = p.term()?;
    p.expect_eof()?;
    Ok(term)
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Number(Number),
    Str(String),
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Define, // :-
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    loc: Location,
}

struct Scanner {
    chars: Vec<char>,
    pos: usize,
    row: usize,
    col: usize,
}

impl Scanner {
    fn new(src: &str) -> Self {
        Scanner {
            chars: src.chars().collect(),
            pos: 0,
            row: 1,
            col: 1,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied();
        if let Some(c) = c {
            self.pos += 1;
            if c == '\n' {
                self.row += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
        c
    }

    fn loc(&self) -> Location {
        Location::new(self.row, self.col)
    }
}

fn tokenize(src: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut s = Scanner::new(src);

    while let Some(c) = s.peek() {
        let loc = s.loc();
        match c {
            ' ' | '\t' | '\r' | '\n' => {
                s.bump();
            }
            '#' => {
                while let Some(c) = s.peek() {
                    if c == '\n' {
                        break;
                    }
                    s.bump();
                }
            }
            '[' => {
                s.bump();
                tokens.push(Token { tok: Tok::LBracket, loc });
            }
            ']' => {
                s.bump();
                tokens.push(Token { tok: Tok::RBracket, loc });
            }
            '{' => {
                s.bump();
                tokens.push(Token { tok: Tok::LBrace, loc });
            }
            '}' => {
                s.bump();
                tokens.push(Token { tok: Tok::RBrace, loc });
            }
            ',' => {
                s.bump();
                tokens.push(Token { tok: Tok::Comma, loc });
            }
            '.' => {
                s.bump();
                tokens.push(Token { tok: Tok::Dot, loc });
            }
            ':' => {
                s.bump();
                // ":-" defines a rule body, but ":-1" is a colon followed by
                // a negative number.
                if s.peek() == Some('-') && !matches!(s.peek2(), Some(d) if d.is_ascii_digit()) {
                    s.bump();
                    tokens.push(Token { tok: Tok::Define, loc });
                } else {
                    tokens.push(Token { tok: Tok::Colon, loc });
                }
            }
            '=' => {
                s.bump();
                tokens.push(Token { tok: Tok::Eq, loc });
            }
            '!' => {
                s.bump();
                if s.peek() == Some('=') {
                    s.bump();
                    tokens.push(Token { tok: Tok::Neq, loc });
                } else {
                    return Err(AstErrors::one("unexpected character '!'", loc));
                }
            }
            '<' => {
                s.bump();
                if s.peek() == Some('=') {
                    s.bump();
                    tokens.push(Token { tok: Tok::Lte, loc });
                } else {
                    tokens.push(Token { tok: Tok::Lt, loc });
                }
            }
            '>' => {
                s.bump();
                if s.peek() == Some('=') {
                    s.bump();
                    tokens.push(Token { tok: Tok::Gte, loc });
                } else {
                    tokens.push(Token { tok: Tok::Gt, loc });
                }
            }
            '"' => {
                s.bump();
                let out = scan_string(&mut s, loc)?;
                tokens.push(Token { tok: Tok::Str(out), loc });
            }
            c if c.is_ascii_digit() || c == '-' => {
                let num = scan_number(&mut s, loc)?;
                tokens.push(Token { tok: Tok::Number(num), loc });
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut name = String::new();
                while let Some(c) = s.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        name.push(c);
                        s.bump();
                    } else {
                        break;
                    }
                }
                tokens.push(Token { tok: Tok::Ident(name), loc });
            }
            other => {
                return Err(AstErrors::one(format!("unexpected character '{}'", other), loc));
            }
        }
    }

    Ok(tokens)
}

fn scan_string(s: &mut Scanner, loc: Location) -> Result<String> {
    let mut out = String::new();
    loop {
        match s.bump() {
            None => return Err(AstErrors::one("unterminated string", loc)),
            Some('"') => return Ok(out),
            Some('\\') => match s.bump() {
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some('/') => out.push('/'),
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('u') => {
                    let mut code = 0u32;
                    for _ in 0..4 {
                        match s.bump().and_then(|c| c.to_digit(16)) {
                            Some(d) => code = code * 16 + d,
                            None => {
                                return Err(AstErrors::one("invalid unicode escape", loc));
                            }
                        }
                    }
                    match char::from_u32(code) {
                        Some(c) => out.push(c),
                        None => return Err(AstErrors::one("invalid unicode escape", loc)),
                    }
                }
                other => {
                    return Err(AstErrors::one(
                        format!("invalid escape '\\{}'", other.unwrap_or(' ')),
                        loc,
                    ));
                }
            },
            Some(c) => out.push(c),
        }
    }
}

fn scan_number(s: &mut Scanner, loc: Location) -> Result<Number> {
    let mut text = String::new();
    if s.peek() == Some('-') {
        s.bump();
        text.push('-');
        if !matches!(s.peek(), Some(d) if d.is_ascii_digit()) {
            return Err(AstErrors::one("expected digit after '-'", loc));
        }
    }
    while let Some(c) = s.peek() {
        if c.is_ascii_digit() {
            text.push(c);
            s.bump();
        } else if c == '.' && !text.contains('.') && !text.contains('e') && !text.contains('E') {
            // Fraction only when followed by a digit; otherwise the dot is a
            // ref separator as in `x[1].y`.
            if !matches!(s.peek2(), Some(d) if d.is_ascii_digit()) {
                break;
            }
            text.push(c);
            s.bump();
        } else if (c == 'e' || c == 'E') && !text.contains('e') && !text.contains('E') {
            text.push(c);
            s.bump();
            if matches!(s.peek(), Some('+') | Some('-')) {
                text.push(s.bump().unwrap());
            }
        } else {
            break;
        }
    }
    parse_number(&text).ok_or_else(|| AstErrors::one(format!("invalid number: {}", text), loc))
}

fn parse_number(text: &str) -> Option<Number> {
    if let Ok(i) = text.parse::<i64>() {
        return Some(Number::from(i));
    }
    text.parse::<f64>().ok().and_then(Number::from_f64)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    end: Location,
    wildcards: usize,
}

impl Parser {
    fn new(src: &str) -> Result<Self> {
        let tokens = tokenize(src)?;
        let end = tokens
            .last()
            .map(|t| t.loc)
            .unwrap_or_else(|| Location::new(1, 1));
        Ok(Parser {
            tokens,
            pos: 0,
            end,
            wildcards: 0,
        })
    }

    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|t| &t.tok)
    }

    fn loc(&self) -> Location {
        self.tokens.get(self.pos).map(|t| t.loc).unwrap_or(self.end)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: Tok, what: &str) -> Result<Location> {
        let loc = self.loc();
        if self.eat(&tok) {
            Ok(loc)
        } else {
            Err(AstErrors::one(format!("expected {}", what), loc))
        }
    }

    fn expect_eof(&self) -> Result<()> {
        if self.pos == self.tokens.len() {
            Ok(())
        } else {
            Err(AstErrors::one("unexpected trailing input", self.loc()))
        }
    }

    fn ident(&mut self, what: &str) -> Result<(String, Location)> {
        let loc = self.loc();
        match self.peek() {
            Some(Tok::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok((name, loc))
            }
            _ => Err(AstErrors::one(format!("expected {}", what), loc)),
        }
    }

    fn module(&mut self) -> Result<Module> {
        if self.tokens.is_empty() {
            return Err(AstErrors::one("empty module", Location::new(1, 1)));
        }
        let loc = self.loc();
        let (kw, _) = self.ident("package declaration")?;
        if kw != "package" {
            return Err(AstErrors::one("expected package declaration", loc));
        }
        let mut path = Ref(vec![Term::var(DATA_ROOT)]);
        let (first, _) = self.ident("package path")?;
        path.push(Term::string(first));
        while self.eat(&Tok::Dot) {
            let (next, _) = self.ident("package path element")?;
            path.push(Term::string(next));
        }
        let package = Package { path, location: loc };

        let mut rules = Vec::new();
        while self.pos < self.tokens.len() {
            rules.push(self.rule()?);
        }
        Ok(Module { package, rules })
    }

    fn rule(&mut self) -> Result<Rule> {
        let (name, loc) = self.ident("rule name")?;
        if is_keyword(&name) {
            return Err(AstErrors::one(
                format!("unexpected keyword '{}'", name),
                loc,
            ));
        }

        let mut key = None;
        if self.eat(&Tok::LBracket) {
            key = Some(self.term()?);
            self.expect(Tok::RBracket, "']'")?;
        }

        let mut value = None;
        if self.eat(&Tok::Eq) {
            value = Some(self.term()?);
        }

        let body = if self.eat(&Tok::Define) {
            self.body()?
        } else if key.is_some() || value.is_some() {
            // Constant rule: body defaults to "true".
            Body(vec![Expr {
                kind: ExprKind::Term(Term::new(Value::Boolean(true))),
                negated: false,
                location: loc,
            }])
        } else {
            return Err(AstErrors::one("expected rule definition", loc));
        };

        Ok(Rule {
            name,
            key,
            value,
            body,
            location: loc,
        })
    }

    fn body(&mut self) -> Result<Body> {
        let mut exprs = vec![self.expr()?];
        while self.eat(&Tok::Comma) {
            exprs.push(self.expr()?);
        }
        Ok(Body(exprs))
    }

    fn expr(&mut self) -> Result<Expr> {
        let loc = self.loc();
        let negated = matches!(self.peek(), Some(Tok::Ident(name)) if name == "not");
        if negated {
            self.pos += 1;
        }
        let lhs = self.term()?;
        let op = match self.peek() {
            Some(Tok::Eq) => Some(BinOp::Eq),
            Some(Tok::Neq) => Some(BinOp::Neq),
            Some(Tok::Lt) => Some(BinOp::Lt),
            Some(Tok::Lte) => Some(BinOp::Lte),
            Some(Tok::Gt) => Some(BinOp::Gt),
            Some(Tok::Gte) => Some(BinOp::Gte),
            _ => None,
        };
        let kind = match op {
            Some(op) => {
                self.pos += 1;
                let rhs = self.term()?;
                ExprKind::Infix { op, lhs, rhs }
            }
            None => ExprKind::Term(lhs),
        };
        Ok(Expr {
            kind,
            negated,
            location: loc,
        })
    }

    fn term(&mut self) -> Result<Term> {
        let loc = self.loc();
        let primary = match self.next().map(|t| t.tok) {
            Some(Tok::Str(s)) => Value::String(s),
            Some(Tok::Number(n)) => Value::Number(n),
            Some(Tok::Ident(name)) => match name.as_str() {
                "true" => Value::Boolean(true),
                "false" => Value::Boolean(false),
                "null" => Value::Null,
                "not" => {
                    return Err(AstErrors::one("unexpected keyword 'not'", loc));
                }
                "_" => {
                    let v = Value::Var(format!("${}", self.wildcards));
                    self.wildcards += 1;
                    v
                }
                _ => Value::Var(name),
            },
            Some(Tok::LBracket) => {
                let mut items = Vec::new();
                if !self.eat(&Tok::RBracket) {
                    loop {
                        items.push(self.term()?);
                        if self.eat(&Tok::Comma) {
                            continue;
                        }
                        self.expect(Tok::RBracket, "']'")?;
                        break;
                    }
                }
                Value::Array(items)
            }
            Some(Tok::LBrace) => self.object_or_set()?,
            other => {
                return Err(AstErrors::one(
                    match other {
                        Some(_) => "expected term".to_string(),
                        None => "unexpected end of input".to_string(),
                    },
                    loc,
                ));
            }
        };

        // Postfix ref elements. Only variables can head a reference.
        if matches!(self.peek(), Some(Tok::Dot) | Some(Tok::LBracket)) {
            let head = match primary {
                Value::Var(name) => Term::var(name),
                _ => {
                    return Err(AstErrors::one("illegal reference head", loc));
                }
            };
            let mut elems = vec![head];
            loop {
                if self.eat(&Tok::Dot) {
                    let (name, _) = self.ident("reference element")?;
                    elems.push(Term::string(name));
                } else if self.eat(&Tok::LBracket) {
                    elems.push(self.term()?);
                    self.expect(Tok::RBracket, "']'")?;
                } else {
                    break;
                }
            }
            return Ok(Term::new(Value::Ref(Ref(elems))));
        }

        Ok(Term::new(primary))
    }

    fn object_or_set(&mut self) -> Result<Value> {
        if self.eat(&Tok::RBrace) {
            return Ok(Value::Object(Vec::new()));
        }
        let first = self.term()?;
        if self.eat(&Tok::Colon) {
            // Object literal.
            let mut pairs = vec![(first, self.term()?)];
            while self.eat(&Tok::Comma) {
                let key = self.term()?;
                self.expect(Tok::Colon, "':'")?;
                pairs.push((key, self.term()?));
            }
            self.expect(Tok::RBrace, "'}'")?;
            Ok(Value::Object(pairs))
        } else {
            // Set literal.
            let mut items = vec![first];
            while self.eat(&Tok::Comma) {
                items.push(self.term()?);
            }
            self.expect(Tok::RBrace, "'}'")?;
            Ok(Value::Set(items))
        }
    }
}

fn is_keyword(name: &str) -> bool {
    matches!(name, "package" | "not" | "true" | "false" | "null")
}
