//! Recursive-descent parser
//!
//! Running out of tokens where an indented block must start is reported as
//! `ParseError::Incomplete` so interactive callers can ask for more input.

use std::sync::Arc;

use super::ast::{BinOp, CmpOp, Expr, FunctionDef, ParseError, Stmt, StmtKind, Target};
use super::lexer::{tokenize, Tok, Token};
use super::value::Value;

/// Deepest expression nesting accepted before giving up
const MAX_NESTING: usize = 100;

/// Deepest syntax tree a single expression may build
const MAX_DEPTH: usize = 500;

/// Longest run of comparison operators in one expression
const MAX_CHAIN: usize = 500;

/// Deepest nesting of indented blocks
const MAX_BLOCKS: usize = 100;

const KEYWORDS: &[&str] = &[
    "and", "or", "not", "in", "is", "if", "elif", "else", "while", "for", "def", "return",
    "pass", "break", "continue", "del", "raise", "True", "False", "None", "import", "from",
    "class", "lambda", "global", "with", "try", "except", "finally", "yield", "assert",
];

/// Parse a whole program
pub fn parse_program(src: &str) -> Result<Vec<Stmt>, ParseError> {
    let mut parser = Parser::new(tokenize(src)?);
    let mut stmts = Vec::new();
    while !parser.at(&Tok::Eof) {
        stmts.extend(parser.statement()?);
    }
    Ok(stmts)
}

/// Parse text that must be exactly one expression
pub fn parse_expression(src: &str) -> Result<Expr, ParseError> {
    let mut parser = Parser::new(tokenize(src)?);
    if parser.at(&Tok::Eof) {
        return Err(parser.error("invalid syntax"));
    }
    let expr = parser.expr_list()?;
    while parser.at(&Tok::Newline) {
        parser.advance();
    }
    if !parser.at(&Tok::Eof) {
        return Err(parser.error("invalid syntax"));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    nesting: usize,
    /// Depth of the expression parsed last
    depth: usize,
    blocks: usize,
    loops: usize,
    functions: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            nesting: 0,
            depth: 0,
            blocks: 0,
            loops: 0,
            functions: 0,
        }
    }

    fn peek(&self) -> &Tok {
        self.tokens
            .get(self.pos)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn at(&self, tok: &Tok) -> bool {
        self.peek() == tok
    }

    fn at_op(&self, op: &str) -> bool {
        matches!(self.peek(), Tok::Op(o) if *o == op)
    }

    fn at_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Name(n) if n == kw)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.at_op(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.at_keyword(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::Syntax {
            line: self.line(),
            message: message.into(),
        }
    }

    fn expect_op(&mut self, op: &str) -> Result<(), ParseError> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", op)))
        }
    }

    fn expect_name(&mut self) -> Result<String, ParseError> {
        match self.peek().clone() {
            Tok::Name(n) if !KEYWORDS.contains(&n.as_str()) => {
                self.pos += 1;
                Ok(n)
            }
            _ => Err(self.error("invalid syntax")),
        }
    }

    // --- statements ---

    fn statement(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let line = self.line();
        let kind = if self.eat_keyword("if") {
            self.if_statement()?
        } else if self.eat_keyword("while") {
            let cond = self.expr()?;
            let body = self.loop_block()?;
            StmtKind::While(cond, body)
        } else if self.eat_keyword("for") {
            let target = self.target_list()?;
            if !self.eat_keyword("in") {
                return Err(self.error("expected 'in'"));
            }
            let iter = self.expr_list()?;
            let body = self.loop_block()?;
            StmtKind::For(target, iter, body)
        } else if self.eat_keyword("def") {
            self.def_statement()?
        } else {
            return self.simple_statements();
        };
        Ok(vec![Stmt { line, kind }])
    }

    fn if_statement(&mut self) -> Result<StmtKind, ParseError> {
        let mut branches = Vec::new();
        let cond = self.expr()?;
        branches.push((cond, self.block()?));
        let mut other = None;
        loop {
            if self.eat_keyword("elif") {
                let cond = self.expr()?;
                branches.push((cond, self.block()?));
            } else if self.eat_keyword("else") {
                other = Some(self.block()?);
                break;
            } else {
                break;
            }
        }
        Ok(StmtKind::If(branches, other))
    }

    fn def_statement(&mut self) -> Result<StmtKind, ParseError> {
        let name = self.expect_name()?;
        self.expect_op("(")?;
        let mut params = Vec::new();
        while !self.at_op(")") {
            let param = self.expect_name()?;
            if params.contains(&param) {
                return Err(self.error(format!(
                    "duplicate argument '{}' in function definition",
                    param
                )));
            }
            params.push(param);
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;

        let outer_loops = std::mem::replace(&mut self.loops, 0);
        self.functions += 1;
        let body = self.block();
        self.functions -= 1;
        self.loops = outer_loops;

        Ok(StmtKind::Def(Arc::new(FunctionDef {
            name,
            params,
            body: body?,
        })))
    }

    fn loop_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.loops += 1;
        let body = self.block();
        self.loops -= 1;
        body
    }

    /// `:` followed by a same-line suite or an indented block
    fn block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect_op(":")?;
        if !self.at(&Tok::Newline) {
            return self.simple_statements();
        }
        self.advance();
        match self.peek() {
            Tok::Eof => return Err(ParseError::Incomplete),
            Tok::Indent => {
                self.advance();
            }
            _ => return Err(self.error("expected an indented block")),
        }
        self.blocks += 1;
        if self.blocks > MAX_BLOCKS {
            return Err(self.error("too many statically nested blocks"));
        }
        let mut body = Vec::new();
        while !self.at(&Tok::Dedent) && !self.at(&Tok::Eof) {
            body.extend(self.statement()?);
        }
        self.advance();
        self.blocks -= 1;
        Ok(body)
    }

    fn simple_statements(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let mut stmts = Vec::new();
        loop {
            let line = self.line();
            let kind = self.small_statement()?;
            stmts.push(Stmt { line, kind });
            if !self.eat_op(";") || self.at(&Tok::Newline) {
                break;
            }
        }
        if !self.at(&Tok::Newline) {
            return Err(self.error("invalid syntax"));
        }
        self.advance();
        Ok(stmts)
    }

    fn small_statement(&mut self) -> Result<StmtKind, ParseError> {
        if self.eat_keyword("pass") {
            return Ok(StmtKind::Pass);
        }
        if self.at_keyword("break") || self.at_keyword("continue") {
            let is_break = self.at_keyword("break");
            if self.loops == 0 {
                let word = if is_break { "break" } else { "continue" };
                return Err(self.error(format!("'{}' outside loop", word)));
            }
            self.advance();
            return Ok(if is_break {
                StmtKind::Break
            } else {
                StmtKind::Continue
            });
        }
        if self.at_keyword("return") {
            if self.functions == 0 {
                return Err(self.error("'return' outside function"));
            }
            self.advance();
            let value = if self.at(&Tok::Newline) || self.at_op(";") {
                None
            } else {
                Some(self.expr_list()?)
            };
            return Ok(StmtKind::Return(value));
        }
        if self.eat_keyword("del") {
            let mut targets = vec![self.target()?];
            while self.eat_op(",") {
                targets.push(self.target()?);
            }
            return Ok(StmtKind::Del(targets));
        }
        if self.eat_keyword("raise") {
            let value = if self.at(&Tok::Newline) || self.at_op(";") {
                None
            } else {
                Some(self.expr()?)
            };
            return Ok(StmtKind::Raise(value));
        }
        if let Tok::Name(n) = self.peek() {
            if matches!(n.as_str(), "import" | "from" | "class" | "try" | "with" | "lambda") {
                return Err(self.error(format!("'{}' is not supported in this REPL", n)));
            }
        }

        let first = self.expr_list()?;
        let aug = match self.peek() {
            Tok::Op("+=") => Some(BinOp::Add),
            Tok::Op("-=") => Some(BinOp::Sub),
            Tok::Op("*=") => Some(BinOp::Mul),
            Tok::Op("/=") => Some(BinOp::Div),
            Tok::Op("//=") => Some(BinOp::FloorDiv),
            Tok::Op("%=") => Some(BinOp::Mod),
            Tok::Op("**=") => Some(BinOp::Pow),
            _ => None,
        };
        if let Some(op) = aug {
            self.advance();
            let target = self.to_target(first)?;
            if matches!(target, Target::Tuple(_)) {
                return Err(self.error("illegal expression for augmented assignment"));
            }
            let value = self.expr_list()?;
            return Ok(StmtKind::AugAssign(target, op, value));
        }

        if !self.at_op("=") {
            return Ok(StmtKind::Expr(first));
        }
        let mut targets = vec![self.to_target(first)?];
        let mut value;
        loop {
            self.expect_op("=")?;
            value = self.expr_list()?;
            if !self.at_op("=") {
                break;
            }
            targets.push(self.to_target(value)?);
        }
        Ok(StmtKind::Assign(targets, value))
    }

    fn target(&mut self) -> Result<Target, ParseError> {
        let expr = self.postfix()?;
        self.to_target(expr)
    }

    fn target_list(&mut self) -> Result<Target, ParseError> {
        let first = self.target()?;
        if !self.at_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_keyword("in") {
                break;
            }
            items.push(self.target()?);
        }
        Ok(Target::Tuple(items))
    }

    fn to_target(&self, expr: Expr) -> Result<Target, ParseError> {
        match expr {
            Expr::Name(n) => Ok(Target::Name(n)),
            Expr::Index(obj, idx) => Ok(Target::Index(*obj, *idx)),
            Expr::Tuple(items) | Expr::List(items) => Ok(Target::Tuple(
                items
                    .into_iter()
                    .map(|e| self.to_target(e))
                    .collect::<Result<_, _>>()?,
            )),
            Expr::Attr(..) => Err(self.error("cannot assign to attribute here")),
            Expr::Call(..) => Err(self.error("cannot assign to function call")),
            _ => Err(self.error("cannot assign to expression")),
        }
    }

    // --- expressions ---

    /// Comma-separated expressions; more than one becomes a tuple
    fn expr_list(&mut self) -> Result<Expr, ParseError> {
        let first = self.expr()?;
        if !self.at_op(",") {
            return Ok(first);
        }
        let mut below = self.depth;
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.starts_expr() {
                items.push(self.expr()?);
                below = below.max(self.depth);
            } else {
                break;
            }
        }
        self.built(below)?;
        Ok(Expr::Tuple(items))
    }

    fn starts_expr(&self) -> bool {
        match self.peek() {
            Tok::Name(n) => {
                !KEYWORDS.contains(&n.as_str())
                    || matches!(n.as_str(), "not" | "True" | "False" | "None")
            }
            Tok::Int(_) | Tok::Float(_) | Tok::Str(_) => true,
            Tok::Op(op) => matches!(*op, "(" | "[" | "{" | "-" | "+"),
            _ => false,
        }
    }

    fn expr(&mut self) -> Result<Expr, ParseError> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING {
            return Err(self.error("too many nested expressions"));
        }
        let result = self.ternary();
        self.nesting -= 1;
        result
    }

    fn ternary(&mut self) -> Result<Expr, ParseError> {
        let then = self.or_expr()?;
        if !self.eat_keyword("if") {
            return Ok(then);
        }
        let mut below = self.depth;
        let cond = self.or_expr()?;
        below = below.max(self.depth);
        if !self.eat_keyword("else") {
            return Err(self.error("expected 'else' after 'if' expression"));
        }
        let other = self.expr()?;
        self.built(below.max(self.depth))?;
        Ok(Expr::IfElse {
            cond: Box::new(cond),
            then: Box::new(then),
            other: Box::new(other),
        })
    }

    fn or_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.and_expr()?;
        while self.eat_keyword("or") {
            let below = self.depth;
            let right = self.and_expr()?;
            self.built(below.max(self.depth))?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.not_expr()?;
        while self.eat_keyword("and") {
            let below = self.depth;
            let right = self.not_expr()?;
            self.built(below.max(self.depth))?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr, ParseError> {
        if self.eat_keyword("not") {
            let inner = self.nested(Self::not_expr)?;
            self.built(self.depth)?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let left = self.arith()?;
        let mut below = self.depth;
        let mut ops = Vec::new();
        loop {
            let op = match self.peek() {
                Tok::Op("==") => CmpOp::Eq,
                Tok::Op("!=") => CmpOp::Ne,
                Tok::Op("<") => CmpOp::Lt,
                Tok::Op("<=") => CmpOp::Le,
                Tok::Op(">") => CmpOp::Gt,
                Tok::Op(">=") => CmpOp::Ge,
                Tok::Name(n) if n == "in" => CmpOp::In,
                Tok::Name(n) if n == "is" => CmpOp::Is,
                Tok::Name(n) if n == "not" => CmpOp::NotIn,
                _ => break,
            };
            self.advance();
            let op = match op {
                CmpOp::Is if self.eat_keyword("not") => CmpOp::IsNot,
                CmpOp::NotIn if !self.eat_keyword("in") => {
                    return Err(self.error("invalid syntax"));
                }
                op => op,
            };
            if ops.len() >= MAX_CHAIN {
                return Err(self.error("expression too long"));
            }
            ops.push((op, self.arith()?));
            below = below.max(self.depth);
        }
        if ops.is_empty() {
            return Ok(left);
        }
        self.built(below)?;
        Ok(Expr::Compare(Box::new(left), ops))
    }

    /// Record the depth of a node built over children at most `below` deep
    ///
    /// Left-deep chains like `a + b + c` grow the tree without recursing in
    /// the parser, so depth is tracked here rather than by `nesting`.
    fn built(&mut self, below: usize) -> Result<(), ParseError> {
        if below >= MAX_DEPTH {
            return Err(self.error("expression too deeply nested"));
        }
        self.depth = below + 1;
        Ok(())
    }

    fn arith(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Tok::Op("+") => BinOp::Add,
                Tok::Op("-") => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let below = self.depth;
            let right = self.term()?;
            self.built(below.max(self.depth))?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.factor()?;
        loop {
            let op = match self.peek() {
                Tok::Op("*") => BinOp::Mul,
                Tok::Op("/") => BinOp::Div,
                Tok::Op("//") => BinOp::FloorDiv,
                Tok::Op("%") => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let below = self.depth;
            let right = self.factor()?;
            self.built(below.max(self.depth))?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn factor(&mut self) -> Result<Expr, ParseError> {
        if self.eat_op("-") {
            let inner = self.nested(Self::factor)?;
            self.built(self.depth)?;
            return Ok(match inner {
                Expr::Const(Value::Int(i)) => Expr::Const(Value::Int(i.wrapping_neg())),
                Expr::Const(Value::Float(f)) => Expr::Const(Value::Float(-f)),
                other => Expr::Neg(Box::new(other)),
            });
        }
        if self.eat_op("+") {
            let inner = self.nested(Self::factor)?;
            self.built(self.depth)?;
            return Ok(Expr::Pos(Box::new(inner)));
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr, ParseError> {
        let base = self.postfix()?;
        if self.eat_op("**") {
            let below = self.depth;
            let exp = self.nested(Self::factor)?;
            self.built(below.max(self.depth))?;
            return Ok(Expr::Binary(Box::new(base), BinOp::Pow, Box::new(exp)));
        }
        Ok(base)
    }

    /// Guard recursion for unary chains like `- - - x`
    fn nested(&mut self, f: fn(&mut Self) -> Result<Expr, ParseError>) -> Result<Expr, ParseError> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING {
            return Err(self.error("too many nested expressions"));
        }
        let result = f(self);
        self.nesting -= 1;
        result
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.atom()?;
        loop {
            let below = self.depth;
            if self.eat_op("(") {
                let mut args = Vec::new();
                let mut deepest = below;
                while !self.at_op(")") {
                    args.push(self.expr()?);
                    deepest = deepest.max(self.depth);
                    if !self.eat_op(",") {
                        break;
                    }
                }
                self.expect_op(")")?;
                self.built(deepest)?;
                expr = Expr::Call(Box::new(expr), args);
            } else if self.eat_op("[") {
                let index = self.expr_list()?;
                self.expect_op("]")?;
                self.built(below.max(self.depth))?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else if self.eat_op(".") {
                let name = match self.advance() {
                    Tok::Name(n) => n,
                    _ => return Err(self.error("invalid syntax")),
                };
                self.built(below)?;
                expr = Expr::Attr(Box::new(expr), name);
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn atom(&mut self) -> Result<Expr, ParseError> {
        self.depth = 1;
        match self.advance() {
            Tok::Int(i) => Ok(Expr::Const(Value::Int(i))),
            Tok::Float(f) => Ok(Expr::Const(Value::Float(f))),
            Tok::Str(s) => {
                // Adjacent literals concatenate
                let mut s = s;
                while let Tok::Str(next) = self.peek().clone() {
                    self.advance();
                    s.push_str(&next);
                }
                Ok(Expr::Const(Value::str(s)))
            }
            Tok::Name(n) => match n.as_str() {
                "True" => Ok(Expr::Const(Value::Bool(true))),
                "False" => Ok(Expr::Const(Value::Bool(false))),
                "None" => Ok(Expr::Const(Value::None)),
                kw if KEYWORDS.contains(&kw) => {
                    self.pos -= 1;
                    Err(self.error("invalid syntax"))
                }
                _ => Ok(Expr::Name(n)),
            },
            Tok::Op("(") => {
                if self.eat_op(")") {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let inner = self.nested(Self::expr_list)?;
                self.expect_op(")")?;
                Ok(inner)
            }
            Tok::Op("[") => {
                let mut items = Vec::new();
                let mut deepest = 0;
                while !self.at_op("]") {
                    items.push(self.expr()?);
                    deepest = deepest.max(self.depth);
                    if !self.eat_op(",") {
                        break;
                    }
                }
                self.expect_op("]")?;
                self.built(deepest)?;
                Ok(Expr::List(items))
            }
            Tok::Op("{") => self.brace_display(),
            Tok::Eof => Err(self.error("unexpected EOF while parsing")),
            _ => {
                self.pos -= 1;
                Err(self.error("invalid syntax"))
            }
        }
    }

    fn brace_display(&mut self) -> Result<Expr, ParseError> {
        if self.eat_op("}") {
            return Ok(Expr::Dict(Vec::new()));
        }
        let first = self.expr()?;
        let mut deepest = self.depth;
        if self.eat_op(":") {
            let mut pairs = vec![(first, self.expr()?)];
            deepest = deepest.max(self.depth);
            while self.eat_op(",") {
                if self.at_op("}") {
                    break;
                }
                let key = self.expr()?;
                deepest = deepest.max(self.depth);
                self.expect_op(":")?;
                pairs.push((key, self.expr()?));
                deepest = deepest.max(self.depth);
            }
            self.expect_op("}")?;
            self.built(deepest)?;
            return Ok(Expr::Dict(pairs));
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_op("}") {
                break;
            }
            items.push(self.expr()?);
            deepest = deepest.max(self.depth);
        }
        self.expect_op("}")?;
        self.built(deepest)?;
        Ok(Expr::Set(items))
    }
}
