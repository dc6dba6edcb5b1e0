//! Prefix expression lexer, AST, parser, and evaluator.
//!
//! This is the language understood by the built-in [`ExprEvaluator`]: `!if`
//! and `!while` conditions, `!loop` sources, `$` assignment lines and `{$…}`
//! interpolations all go through it.
//!
//! Operator precedence (lowest → highest):
//!   assign  →  ternary  →  or  →  and  →  bitor  →  bitxor  →  bitand  →
//!   equality/relational  →  shift  →  additive/concat  →  multiplicative  →
//!   unary  →  postfix (`[idx]`, `++`, `--`)  →  primary
//!
//! [`ExprEvaluator`]: super::eval::ExprEvaluator

use super::expand::interpolate;
use super::value::Value;

// ── EvalContext ───────────────────────────────────────────────────────────────

/// Dependency-injection interface used by the expression evaluator.
///
/// The interpreter hands the evaluator a view of one scope's bindings; the
/// evaluator never sees the scope stack itself.
pub trait EvalContext {
    /// Look up a variable in the scope's bindings.
    fn get_var(&self, name: &str) -> Option<Value>;

    /// Assign a variable.  Existing bindings are written in place so aliased
    /// cells see the change.
    fn set_var(&mut self, name: &str, value: Value);

    /// Invoke a built-in function.
    fn call_fn(&mut self, name: &str, args: Vec<Value>) -> Result<Value, String>;

    /// Every visible variable, for evaluators that need to export them.
    fn vars(&self) -> Vec<(String, Value)> {
        Vec::new()
    }
}

// ── Token ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Int(i64),
    Float(f64),
    /// Single-quoted string, taken literally.
    Str(String),
    /// Double-quoted string, still containing escapes and `$` references.
    Template(String),
    Ident(String),
    Var(String),

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Dot,
    Bang,
    Tilde,
    Ampersand,
    Pipe,
    Caret,
    ShiftLeft,
    ShiftRight,
    Incr,
    Decr,

    // Comparison
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    // Logical
    And,
    Or,

    // Assignment
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    DotAssign,

    // Misc
    Question,
    Colon,
    Comma,
    Arrow,
    LParen,
    RParen,
    LBracket,
    RBracket,
    /// Unrecognised input character, reported as a diagnostic.
    Unknown(char),
    Eof,
}

// ── Lexer ─────────────────────────────────────────────────────────────────────

struct Lexer {
    src: Vec<char>,
    pos: usize,
}

impl Lexer {
    fn new(src: &str) -> Self {
        Lexer {
            src: src.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.src.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<char> {
        self.src.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn eat(&mut self, ch: char) -> bool {
        if self.peek() == Some(ch) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn read_number(&mut self, first: char) -> Token {
        let mut s = String::from(first);
        let mut is_float = false;

        if first == '0' && matches!(self.peek(), Some('x' | 'X')) {
            self.pos += 1;
            let mut hex = String::new();
            while matches!(self.peek(), Some(c) if c.is_ascii_hexdigit()) {
                hex.extend(self.advance());
            }
            return Token::Int(i64::from_str_radix(&hex, 16).unwrap_or(0));
        }

        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            s.extend(self.advance());
        }
        if self.peek() == Some('.') && matches!(self.peek2(), Some(c) if c.is_ascii_digit()) {
            is_float = true;
            s.extend(self.advance());
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                s.extend(self.advance());
            }
        }
        if matches!(self.peek(), Some('e' | 'E'))
            && matches!(self.peek2(), Some(c) if c.is_ascii_digit() || c == '-' || c == '+')
        {
            is_float = true;
            s.extend(self.advance());
            if matches!(self.peek(), Some('+' | '-')) {
                s.extend(self.advance());
            }
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                s.extend(self.advance());
            }
        }

        if is_float {
            Token::Float(s.parse().unwrap_or(0.0))
        } else {
            Token::Int(s.parse().unwrap_or(0))
        }
    }

    /// Single-quoted: only `\'` and `\\` are escapes.
    fn read_single_quoted(&mut self) -> Result<Token, String> {
        let mut s = String::new();
        loop {
            match self.advance() {
                None => return Err("unterminated string".into()),
                Some('\\') if matches!(self.peek(), Some('\'' | '\\')) => {
                    s.extend(self.advance());
                }
                Some('\'') => break,
                Some(c) => s.push(c),
            }
        }
        Ok(Token::Str(s))
    }

    /// Double-quoted: kept raw, [`interpolate`] handles escapes and `$` later.
    fn read_double_quoted(&mut self) -> Result<Token, String> {
        let mut s = String::new();
        loop {
            match self.advance() {
                None => return Err("unterminated string".into()),
                Some('\\') => {
                    s.push('\\');
                    match self.advance() {
                        Some(c) => s.push(c),
                        None => return Err("unterminated string".into()),
                    }
                }
                Some('"') => break,
                Some(c) => s.push(c),
            }
        }
        Ok(Token::Template(s))
    }

    fn read_ident(&mut self, first: char) -> String {
        let mut s = String::from(first);
        while matches!(self.peek(), Some(c) if is_ident_continue(c)) {
            s.extend(self.advance());
        }
        s
    }

    fn next_token(&mut self) -> Result<Token, String> {
        self.skip_ws();
        let ch = match self.advance() {
            None => return Ok(Token::Eof),
            Some(c) => c,
        };

        Ok(match ch {
            '0'..='9' => self.read_number(ch),
            '"' => return self.read_double_quoted(),
            '\'' => return self.read_single_quoted(),
            '$' => match self.advance() {
                Some(c) if is_ident_start(c) => Token::Var(self.read_ident(c)),
                _ => return Err("variable name expected after '$'".into()),
            },
            c if is_ident_start(c) => Token::Ident(self.read_ident(c)),
            '+' => {
                if self.eat('=') {
                    Token::PlusAssign
                } else if self.eat('+') {
                    Token::Incr
                } else {
                    Token::Plus
                }
            }
            '-' => {
                if self.eat('=') {
                    Token::MinusAssign
                } else if self.eat('-') {
                    Token::Decr
                } else {
                    Token::Minus
                }
            }
            '*' => {
                if self.eat('=') {
                    Token::StarAssign
                } else {
                    Token::Star
                }
            }
            '/' => {
                if self.eat('=') {
                    Token::SlashAssign
                } else {
                    Token::Slash
                }
            }
            '%' => {
                if self.eat('=') {
                    Token::PercentAssign
                } else {
                    Token::Percent
                }
            }
            '.' => {
                if self.eat('=') {
                    Token::DotAssign
                } else {
                    Token::Dot
                }
            }
            '!' => {
                if self.eat('=') {
                    self.eat('=');
                    Token::Ne
                } else {
                    Token::Bang
                }
            }
            '~' => Token::Tilde,
            '^' => Token::Caret,
            '&' => {
                if self.eat('&') {
                    Token::And
                } else {
                    Token::Ampersand
                }
            }
            '|' => {
                if self.eat('|') {
                    Token::Or
                } else {
                    Token::Pipe
                }
            }
            '<' => {
                if self.eat('<') {
                    Token::ShiftLeft
                } else if self.eat('=') {
                    Token::Le
                } else if self.eat('>') {
                    Token::Ne
                } else {
                    Token::Lt
                }
            }
            '>' => {
                if self.eat('>') {
                    Token::ShiftRight
                } else if self.eat('=') {
                    Token::Ge
                } else {
                    Token::Gt
                }
            }
            '=' => {
                if self.eat('=') {
                    self.eat('=');
                    Token::Eq
                } else if self.eat('>') {
                    Token::Arrow
                } else {
                    Token::Assign
                }
            }
            '?' => Token::Question,
            ':' => Token::Colon,
            ',' => Token::Comma,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            c => Token::Unknown(c),
        })
    }

    fn tokenize(mut self) -> Result<Vec<Token>, String> {
        let mut tokens = Vec::new();
        loop {
            let t = self.next_token()?;
            let done = matches!(t, Token::Eof);
            tokens.push(t);
            if done {
                break;
            }
        }
        Ok(tokens)
    }
}

pub(crate) fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

pub(crate) fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

// ── AST ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

#[derive(Debug, Clone)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

#[derive(Debug, Clone)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Concat,
}

/// Left-hand side of an assignment or increment.
#[derive(Debug, Clone)]
pub enum Target {
    Var(String),
    /// `$name[key]`, or `$name[]` (append) when the key is `None`.
    Element(String, Option<Box<Expr>>),
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value),
    Template(String),
    Var(String),
    List(Vec<Expr>),
    Map(Vec<(Expr, Expr)>),
    Index(Box<Expr>, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Assign(Target, AssignOp, Box<Expr>),
    /// `++$x` / `$x++` (`delta` = ±1, `prefix` selects the returned value).
    Step { target: Target, delta: i64, prefix: bool },
    Isset(Box<Expr>),
    Call(String, Vec<Expr>),
}

// ── Parser ────────────────────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens.get(self.pos).cloned().unwrap_or(Token::Eof);
        self.pos += 1;
        t
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == expected {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<(), String> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(format!("expected {what}, found {}", describe(self.peek())))
        }
    }

    // ── Grammar ───────────────────────────────────────────────────────────────

    fn parse_expr(&mut self) -> Result<Expr, String> {
        self.parse_assign()
    }

    fn parse_assign(&mut self) -> Result<Expr, String> {
        let start = self.pos;
        let lhs = self.parse_ternary()?;
        let op = match self.peek() {
            Token::Assign => AssignOp::Set,
            Token::PlusAssign => AssignOp::Add,
            Token::MinusAssign => AssignOp::Sub,
            Token::StarAssign => AssignOp::Mul,
            Token::SlashAssign => AssignOp::Div,
            Token::PercentAssign => AssignOp::Rem,
            Token::DotAssign => AssignOp::Concat,
            _ => return Ok(lhs),
        };
        let target = into_target(lhs).ok_or_else(|| {
            format!("cannot assign to expression at token {}", start + 1)
        })?;
        self.pos += 1;
        let rhs = self.parse_assign()?;
        Ok(Expr::Assign(target, op, Box::new(rhs)))
    }

    fn parse_ternary(&mut self) -> Result<Expr, String> {
        let cond = self.parse_or()?;
        if self.eat(&Token::Question) {
            let then = self.parse_assign()?;
            self.expect(&Token::Colon, "':' in ternary")?;
            let else_ = self.parse_assign()?;
            Ok(Expr::Ternary(Box::new(cond), Box::new(then), Box::new(else_)))
        } else {
            Ok(cond)
        }
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_and()?;
        while self.eat(&Token::Or) {
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_bitor()?;
        while self.eat(&Token::And) {
            let rhs = self.parse_bitor()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_bitor(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_bitxor()?;
        while self.eat(&Token::Pipe) {
            let rhs = self.parse_bitxor()?;
            lhs = Expr::Binary(BinOp::BitOr, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_bitxor(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_bitand()?;
        while self.eat(&Token::Caret) {
            let rhs = self.parse_bitand()?;
            lhs = Expr::Binary(BinOp::BitXor, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_bitand(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_relational()?;
        while self.eat(&Token::Ampersand) {
            let rhs = self.parse_relational()?;
            lhs = Expr::Binary(BinOp::BitAnd, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_shift()?;
        loop {
            let op = match self.peek() {
                Token::Eq => BinOp::Eq,
                Token::Ne => BinOp::Ne,
                Token::Lt => BinOp::Lt,
                Token::Le => BinOp::Le,
                Token::Gt => BinOp::Gt,
                Token::Ge => BinOp::Ge,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_shift()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_shift(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Token::ShiftLeft => BinOp::Shl,
                Token::ShiftRight => BinOp::Shr,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                Token::Dot => BinOp::Concat,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::Percent => BinOp::Rem,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        let op = match self.peek() {
            Token::Minus => UnaryOp::Neg,
            Token::Bang => UnaryOp::Not,
            Token::Tilde => UnaryOp::BitNot,
            Token::Plus => {
                self.pos += 1;
                return self.parse_unary();
            }
            Token::Incr | Token::Decr => {
                let delta = if self.advance() == Token::Incr { 1 } else { -1 };
                let operand = self.parse_postfix()?;
                let target = into_target(operand)
                    .ok_or_else(|| "increment needs a variable".to_owned())?;
                return Ok(Expr::Step { target, delta, prefix: true });
            }
            _ => return self.parse_postfix(),
        };
        self.pos += 1;
        Ok(Expr::Unary(op, Box::new(self.parse_unary()?)))
    }

    fn parse_postfix(&mut self) -> Result<Expr, String> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Token::LBracket => {
                    self.pos += 1;
                    if self.eat(&Token::RBracket) {
                        // `$x[]` is only meaningful as an assignment target.
                        return match expr {
                            Expr::Var(name) => Ok(Expr::Assign(
                                Target::Element(name, None),
                                AssignOp::Set,
                                Box::new(self.parse_append_rhs()?),
                            )),
                            _ => Err("cannot append to expression".into()),
                        };
                    }
                    let idx = self.parse_expr()?;
                    self.expect(&Token::RBracket, "']'")?;
                    expr = Expr::Index(Box::new(expr), Box::new(idx));
                }
                Token::Incr | Token::Decr => {
                    let delta = if self.advance() == Token::Incr { 1 } else { -1 };
                    let target = into_target(expr)
                        .ok_or_else(|| "increment needs a variable".to_owned())?;
                    return Ok(Expr::Step { target, delta, prefix: false });
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_append_rhs(&mut self) -> Result<Expr, String> {
        self.expect(&Token::Assign, "'=' after '[]'")?;
        self.parse_assign()
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        let tok = self.advance();
        match tok {
            Token::Int(n) => Ok(Expr::Literal(Value::Int(n))),
            Token::Float(x) => Ok(Expr::Literal(Value::Float(x))),
            Token::Str(s) => Ok(Expr::Literal(Value::Str(s))),
            Token::Template(s) => Ok(Expr::Template(s)),
            Token::Var(name) => Ok(Expr::Var(name)),
            Token::Ident(name) => {
                if self.eat(&Token::LParen) {
                    let mut args = Vec::new();
                    if self.peek() != &Token::RParen {
                        args.push(self.parse_assign()?);
                        while self.eat(&Token::Comma) {
                            args.push(self.parse_assign()?);
                        }
                    }
                    self.expect(&Token::RParen, &format!("')' after args to {name}"))?;
                    if name.eq_ignore_ascii_case("isset") {
                        let [arg] = <[Expr; 1]>::try_from(args)
                            .map_err(|_| "isset() takes exactly one argument".to_owned())?;
                        return Ok(Expr::Isset(Box::new(arg)));
                    }
                    if name.eq_ignore_ascii_case("array") {
                        return Ok(Expr::List(args));
                    }
                    Ok(Expr::Call(name.to_ascii_lowercase(), args))
                } else {
                    match name.to_ascii_lowercase().as_str() {
                        "true" => Ok(Expr::Literal(Value::Bool(true))),
                        "false" => Ok(Expr::Literal(Value::Bool(false))),
                        "null" => Ok(Expr::Literal(Value::Null)),
                        _ => Err(format!("undefined constant {name}")),
                    }
                }
            }
            Token::LParen => {
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::LBracket => self.parse_array_literal(),
            other => Err(format!("unexpected {}", describe(&other))),
        }
    }

    /// `[a, b]` or `[k => v, …]`; a trailing comma is allowed.
    fn parse_array_literal(&mut self) -> Result<Expr, String> {
        let mut items = Vec::new();
        let mut pairs = Vec::new();
        while self.peek() != &Token::RBracket {
            let first = self.parse_assign()?;
            if self.eat(&Token::Arrow) {
                if !items.is_empty() {
                    return Err("cannot mix keyed and positional array items".into());
                }
                pairs.push((first, self.parse_assign()?));
            } else {
                if !pairs.is_empty() {
                    return Err("cannot mix keyed and positional array items".into());
                }
                items.push(first);
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RBracket, "']'")?;
        if pairs.is_empty() {
            Ok(Expr::List(items))
        } else {
            Ok(Expr::Map(pairs))
        }
    }
}

fn into_target(expr: Expr) -> Option<Target> {
    match expr {
        Expr::Var(name) => Some(Target::Var(name)),
        Expr::Index(base, idx) => match *base {
            Expr::Var(name) => Some(Target::Element(name, Some(idx))),
            _ => None,
        },
        _ => None,
    }
}

fn describe(tok: &Token) -> String {
    match tok {
        Token::Eof => "end of expression".into(),
        Token::Unknown(c) => format!("character '{c}'"),
        other => format!("{other:?}"),
    }
}

/// Parse an expression string into an AST.
pub fn parse_expr(src: &str) -> Result<Expr, String> {
    let tokens = Lexer::new(src).tokenize()?;
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_expr()?;
    match parser.peek() {
        Token::Eof => Ok(expr),
        other => Err(format!("unexpected {} after expression", describe(other))),
    }
}

/// Parse a `;`-separated statement list.  Empty statements are skipped.
pub fn parse_statements(src: &str) -> Result<Vec<Stmt>, String> {
    let tokens = Lexer::new(src).tokenize()?;
    let mut parser = Parser::new(tokens);
    let mut stmts = Vec::new();
    loop {
        while parser.eat(&Token::Unknown(';')) {}
        match parser.peek().clone() {
            Token::Eof => break,
            Token::Ident(kw) if kw.eq_ignore_ascii_case("echo") => {
                parser.pos += 1;
                stmts.push(Stmt::Echo(parser.parse_expr()?));
            }
            Token::Ident(kw) if kw.eq_ignore_ascii_case("return") => {
                parser.pos += 1;
                if matches!(parser.peek(), Token::Eof | Token::Unknown(';')) {
                    stmts.push(Stmt::Return(None));
                } else {
                    stmts.push(Stmt::Return(Some(parser.parse_expr()?)));
                }
            }
            _ => stmts.push(Stmt::Expr(parser.parse_expr()?)),
        }
        match parser.advance() {
            Token::Eof => break,
            Token::Unknown(';') => {}
            other => return Err(format!("expected ';', found {}", describe(&other))),
        }
    }
    Ok(stmts)
}

/// One statement of an imperative code block (`!code`, the `code` transform).
#[derive(Debug, Clone)]
pub enum Stmt {
    Expr(Expr),
    Echo(Expr),
    Return(Option<Expr>),
}

// ── Evaluator ─────────────────────────────────────────────────────────────────

/// Evaluate an [`Expr`] AST node against the given context.
pub fn eval_expr(expr: &Expr, ctx: &mut dyn EvalContext) -> Result<Value, String> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),

        Expr::Template(raw) => interpolate(raw, ctx).map(Value::Str),

        Expr::Var(name) => ctx
            .get_var(name)
            .ok_or_else(|| format!("Undefined variable: {name}")),

        Expr::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for e in items {
                out.push(eval_expr(e, ctx)?);
            }
            Ok(Value::List(out))
        }

        Expr::Map(pairs) => {
            let mut out: Vec<(String, Value)> = Vec::with_capacity(pairs.len());
            for (k, v) in pairs {
                let key = eval_expr(k, ctx)?.as_str();
                let val = eval_expr(v, ctx)?;
                map_insert(&mut out, key, val);
            }
            Ok(Value::Map(out))
        }

        Expr::Index(base, idx) => {
            let b = eval_expr(base, ctx)?;
            let i = eval_expr(idx, ctx)?;
            match &b {
                Value::Str(s) => Ok(usize::try_from(i.as_int())
                    .ok()
                    .and_then(|n| s.chars().nth(n))
                    .map(|c| Value::Str(c.to_string()))
                    .unwrap_or_default()),
                _ => b
                    .index(&i)
                    .cloned()
                    .ok_or_else(|| format!("Undefined index: {i}")),
            }
        }

        Expr::Unary(op, inner) => {
            let v = eval_expr(inner, ctx)?;
            Ok(match op {
                UnaryOp::Neg => v.arith_neg(),
                UnaryOp::Not => Value::Bool(!v.as_bool()),
                UnaryOp::BitNot => Value::Int(!v.as_int()),
            })
        }

        Expr::Binary(op, lhs, rhs) => {
            match op {
                BinOp::And => {
                    let l = eval_expr(lhs, ctx)?;
                    if !l.as_bool() {
                        return Ok(Value::Bool(false));
                    }
                    return Ok(Value::Bool(eval_expr(rhs, ctx)?.as_bool()));
                }
                BinOp::Or => {
                    let l = eval_expr(lhs, ctx)?;
                    if l.as_bool() {
                        return Ok(Value::Bool(true));
                    }
                    return Ok(Value::Bool(eval_expr(rhs, ctx)?.as_bool()));
                }
                _ => {}
            }
            let l = eval_expr(lhs, ctx)?;
            let r = eval_expr(rhs, ctx)?;
            eval_binop(op, l, r)
        }

        Expr::Ternary(cond, then, else_) => {
            if eval_expr(cond, ctx)?.as_bool() {
                eval_expr(then, ctx)
            } else {
                eval_expr(else_, ctx)
            }
        }

        Expr::Assign(target, op, rhs) => {
            let rval = eval_expr(rhs, ctx)?;
            let new_val = if let AssignOp::Set = op {
                rval
            } else {
                let cur = read_target(target, ctx)?;
                match op {
                    AssignOp::Add => cur.arith_add(&rval),
                    AssignOp::Sub => cur.arith_sub(&rval),
                    AssignOp::Mul => cur.arith_mul(&rval),
                    AssignOp::Div => cur.arith_div(&rval)?,
                    AssignOp::Rem => cur.arith_rem(&rval)?,
                    AssignOp::Concat => cur.concat(&rval),
                    AssignOp::Set => unreachable!(),
                }
            };
            write_target(target, new_val.clone(), ctx)?;
            Ok(new_val)
        }

        Expr::Step { target, delta, prefix } => {
            let cur = read_target(target, ctx)?;
            let next = cur.arith_add(&Value::Int(*delta));
            write_target(target, next.clone(), ctx)?;
            Ok(if *prefix { next } else { cur })
        }

        Expr::Isset(inner) => Ok(Value::Bool(
            eval_expr(inner, ctx).map(|v| !v.is_null()).unwrap_or(false),
        )),

        Expr::Call(name, arg_exprs) => {
            let mut args = Vec::with_capacity(arg_exprs.len());
            for ae in arg_exprs {
                args.push(eval_expr(ae, ctx)?);
            }
            ctx.call_fn(name, args)
        }
    }
}

fn read_target(target: &Target, ctx: &mut dyn EvalContext) -> Result<Value, String> {
    match target {
        Target::Var(name) => Ok(ctx.get_var(name).unwrap_or_default()),
        Target::Element(name, Some(idx)) => {
            let key = eval_expr(idx, ctx)?;
            Ok(ctx
                .get_var(name)
                .and_then(|base| base.index(&key).cloned())
                .unwrap_or_default())
        }
        Target::Element(_, None) => Err("cannot read from '[]'".into()),
    }
}

fn write_target(target: &Target, value: Value, ctx: &mut dyn EvalContext) -> Result<(), String> {
    match target {
        Target::Var(name) => ctx.set_var(name, value),
        Target::Element(name, idx) => {
            let key = match idx {
                Some(e) => Some(eval_expr(e, ctx)?),
                None => None,
            };
            let base = ctx.get_var(name).unwrap_or_default();
            let updated = match (base, key) {
                (Value::Null, None) => Value::List(vec![value]),
                (Value::List(mut v), None) => {
                    v.push(value);
                    Value::List(v)
                }
                (Value::List(mut v), Some(Value::Int(i))) if i >= 0 && (i as usize) <= v.len() => {
                    if i as usize == v.len() {
                        v.push(value);
                    } else {
                        v[i as usize] = value;
                    }
                    Value::List(v)
                }
                (Value::List(v), Some(k)) => {
                    let mut m: Vec<(String, Value)> = v
                        .into_iter()
                        .enumerate()
                        .map(|(i, x)| (i.to_string(), x))
                        .collect();
                    map_insert(&mut m, k.as_str(), value);
                    Value::Map(m)
                }
                (Value::Map(mut m), Some(k)) => {
                    map_insert(&mut m, k.as_str(), value);
                    Value::Map(m)
                }
                (Value::Map(mut m), None) => {
                    let next = m
                        .iter()
                        .filter_map(|(k, _)| k.parse::<i64>().ok())
                        .max()
                        .map_or(0, |n| n + 1);
                    m.push((next.to_string(), value));
                    Value::Map(m)
                }
                (Value::Null, Some(k)) => {
                    let mut m = Vec::new();
                    map_insert(&mut m, k.as_str(), value);
                    Value::Map(m)
                }
                (other, _) => {
                    return Err(format!("cannot use a {} as an array", other.type_name()));
                }
            };
            ctx.set_var(name, updated);
        }
    }
    Ok(())
}

fn map_insert(map: &mut Vec<(String, Value)>, key: String, value: Value) {
    match map.iter_mut().find(|(k, _)| *k == key) {
        Some((_, slot)) => *slot = value,
        None => map.push((key, value)),
    }
}

fn eval_binop(op: &BinOp, l: Value, r: Value) -> Result<Value, String> {
    use std::cmp::Ordering;
    let cmp = |want: &[Ordering]| Value::Bool(want.contains(&l.cmp_value(&r)));
    match op {
        BinOp::Add => match (&l, &r) {
            (Value::List(a), Value::List(b)) => {
                Ok(Value::List(a.iter().chain(b.iter()).cloned().collect()))
            }
            _ => Ok(l.arith_add(&r)),
        },
        BinOp::Sub => Ok(l.arith_sub(&r)),
        BinOp::Mul => Ok(l.arith_mul(&r)),
        BinOp::Div => l.arith_div(&r),
        BinOp::Rem => l.arith_rem(&r),
        BinOp::Concat => Ok(l.concat(&r)),

        BinOp::Eq => Ok(cmp(&[Ordering::Equal])),
        BinOp::Ne => Ok(cmp(&[Ordering::Less, Ordering::Greater])),
        BinOp::Lt => Ok(cmp(&[Ordering::Less])),
        BinOp::Le => Ok(cmp(&[Ordering::Less, Ordering::Equal])),
        BinOp::Gt => Ok(cmp(&[Ordering::Greater])),
        BinOp::Ge => Ok(cmp(&[Ordering::Greater, Ordering::Equal])),

        BinOp::BitAnd => Ok(Value::Int(l.as_int() & r.as_int())),
        BinOp::BitOr => Ok(Value::Int(l.as_int() | r.as_int())),
        BinOp::BitXor => Ok(Value::Int(l.as_int() ^ r.as_int())),
        BinOp::Shl => Ok(Value::Int(l.as_int() << (r.as_int() & 63))),
        BinOp::Shr => Ok(Value::Int(l.as_int() >> (r.as_int() & 63))),

        BinOp::And | BinOp::Or => unreachable!("handled above"),
    }
}

/// Convenience: parse and evaluate an expression string.
pub fn eval_str(src: &str, ctx: &mut dyn EvalContext) -> Result<Value, String> {
    let expr = parse_expr(src)?;
    eval_expr(&expr, ctx)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    // ── Minimal EvalContext for tests ─────────────────────────────────────────

    pub(crate) struct TestCtx {
        pub(crate) vars: HashMap<String, Value>,
    }

    impl TestCtx {
        pub(crate) fn new() -> Self {
            TestCtx {
                vars: HashMap::new(),
            }
        }
        pub(crate) fn with(mut self, k: &str, v: Value) -> Self {
            self.vars.insert(k.into(), v);
            self
        }
    }

    impl EvalContext for TestCtx {
        fn get_var(&self, name: &str) -> Option<Value> {
            self.vars.get(name).cloned()
        }
        fn set_var(&mut self, name: &str, value: Value) {
            self.vars.insert(name.into(), value);
        }
        fn call_fn(&mut self, name: &str, args: Vec<Value>) -> Result<Value, String> {
            super::super::builtins::call_builtin(name, args)
                .unwrap_or_else(|| Err(format!("Call to undefined function {name}()")))
        }
    }

    fn eval(src: &str) -> Value {
        eval_str(src, &mut TestCtx::new()).expect("eval failed")
    }

    fn eval_ctx(src: &str, ctx: &mut TestCtx) -> Value {
        eval_str(src, ctx).expect("eval failed")
    }

    #[test]
    fn literals() {
        assert_eq!(eval("42"), Value::Int(42));
        assert_eq!(eval("2.5"), Value::Float(2.5));
        assert_eq!(eval("'it\\'s'"), Value::Str("it's".into()));
        assert_eq!(eval("true"), Value::Bool(true));
        assert_eq!(eval("null"), Value::Null);
    }

    #[test]
    fn arithmetic_and_precedence() {
        assert_eq!(eval("2 + 3 * 4"), Value::Int(14));
        assert_eq!(eval("(2 + 3) * 4"), Value::Int(20));
        assert_eq!(eval("10 % 3"), Value::Int(1));
        assert_eq!(eval("-(3 + 2)"), Value::Int(-5));
    }

    #[test]
    fn concat() {
        assert_eq!(eval("'a' . 1 + 2"), Value::Str("a3".into()));
        assert_eq!(eval("'a' . 'b'"), Value::Str("ab".into()));
    }

    #[test]
    fn comparison_and_logic() {
        assert_eq!(eval("3 == 3"), Value::Bool(true));
        assert_eq!(eval("3 != 4"), Value::Bool(true));
        assert_eq!(eval("2 < 3 && 3 >= 3"), Value::Bool(true));
        assert_eq!(eval("0 || ''"), Value::Bool(false));
        assert_eq!(eval("!0"), Value::Bool(true));
        assert_eq!(eval("1 ? 'y' : 'n'"), Value::Str("y".into()));
    }

    #[test]
    fn variables() {
        let mut ctx = TestCtx::new().with("x", Value::Int(7));
        assert_eq!(eval_ctx("$x + 1", &mut ctx), Value::Int(8));
        assert!(eval_str("$missing", &mut ctx).is_err());
        assert_eq!(eval_ctx("isset($missing)", &mut ctx), Value::Bool(false));
    }

    #[test]
    fn assignment_forms() {
        let mut ctx = TestCtx::new().with("x", Value::Int(10));
        eval_ctx("$x += 5", &mut ctx);
        assert_eq!(ctx.vars["x"], Value::Int(15));
        eval_ctx("$s = 'a'", &mut ctx);
        eval_ctx("$s .= 'b'", &mut ctx);
        assert_eq!(ctx.vars["s"], Value::Str("ab".into()));
        assert_eq!(eval_ctx("$x++", &mut ctx), Value::Int(15));
        assert_eq!(eval_ctx("++$x", &mut ctx), Value::Int(17));
    }

    #[test]
    fn arrays() {
        assert_eq!(
            eval("[1, 'two', 3,]"),
            Value::List(vec![Value::Int(1), "two".into(), Value::Int(3)])
        );
        assert_eq!(eval("['a' => 1, 'b' => 2]['b']"), Value::Int(2));
        assert_eq!(eval("array(1, 2)[1]"), Value::Int(2));
        let mut ctx = TestCtx::new();
        eval_ctx("$l[] = 'x'", &mut ctx);
        eval_ctx("$l[] = 'y'", &mut ctx);
        assert_eq!(ctx.vars["l"], Value::List(vec!["x".into(), "y".into()]));
        eval_ctx("$m['k'] = 1", &mut ctx);
        assert_eq!(ctx.vars["m"], Value::Map(vec![("k".into(), Value::Int(1))]));
    }

    #[test]
    fn double_quoted_strings_interpolate() {
        let mut ctx = TestCtx::new().with("name", "World".into());
        assert_eq!(eval_ctx("\"Hello $name!\"", &mut ctx), Value::Str("Hello World!".into()));
    }

    #[test]
    fn syntax_errors() {
        assert!(parse_expr("1 +").is_err());
        assert!(parse_expr("(1").is_err());
        assert!(parse_expr("1 2").is_err());
        assert!(parse_expr("bareword").is_err());
        assert!(parse_expr("3 = 4").is_err());
    }

    #[test]
    fn statements() {
        let stmts = parse_statements("$a = 1; echo $a; return 2").unwrap();
        assert_eq!(stmts.len(), 3);
        assert!(matches!(stmts[1], Stmt::Echo(_)));
        assert!(matches!(stmts[2], Stmt::Return(Some(_))));
    }
}
