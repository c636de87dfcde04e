//! Tree-walking evaluator over an explicit namespace

use std::collections::HashMap;
use std::sync::Arc;

use super::ast::{BinOp, CmpOp, Expr, FunctionDef, Stmt, StmtKind, Target};
use super::builtins::{self, type_methods, Builtin};
use super::error::{ErrorKind, ScriptError, TraceEntry};
use super::value::{
    as_number, compare_values, dict_get, dict_insert, range_len, BoundMethod, Namespace, Number,
    Value, MAX_MATERIALIZED,
};

/// Nested function calls allowed before raising `RecursionError`
pub const MAX_CALL_DEPTH: usize = 100;

/// Nested blocks and expression evaluations allowed across all frames
const MAX_EVAL_DEPTH: usize = 300;

/// Bytes of output a single evaluation may produce
pub const MAX_OUTPUT: usize = 1 << 20;

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

struct Frame {
    scope: String,
    line: usize,
    /// `None` at module level, where names resolve to the globals
    locals: Option<HashMap<String, Value>>,
}

/// Executes parsed snippets against a namespace, collecting output
pub struct Interpreter<'a> {
    globals: &'a mut Namespace,
    out: &'a mut String,
    frames: Vec<Frame>,
    eval_depth: usize,
    echo: bool,
}

impl<'a> Interpreter<'a> {
    pub fn new(globals: &'a mut Namespace, out: &'a mut String) -> Self {
        Self {
            globals,
            out,
            frames: vec![Frame {
                scope: "<module>".to_string(),
                line: 1,
                locals: None,
            }],
            eval_depth: 0,
            echo: false,
        }
    }

    /// Print the repr of module-level expression statements, as an interactive shell does
    pub fn interactive(mut self) -> Self {
        self.echo = true;
        self
    }

    pub fn run(&mut self, program: &[Stmt]) -> Result<(), ScriptError> {
        self.exec_block(program).map(|_| ())
    }

    pub fn eval(&mut self, expr: &Expr) -> Result<Value, ScriptError> {
        self.eval_expr(expr).map_err(|e| self.annotate(e))
    }

    /// Print the repr of `value` unless it is `None`
    pub fn echo_value(&mut self, value: &Value) -> Result<(), ScriptError> {
        if value.is_none() {
            return Ok(());
        }
        let text = format!("{}\n", value.repr());
        self.write(&text).map_err(|e| self.annotate(e))
    }

    pub(super) fn write(&mut self, text: &str) -> Result<(), ScriptError> {
        if self.out.len() + text.len() > MAX_OUTPUT {
            return Err(ScriptError::new(
                ErrorKind::MemoryError,
                "output limit exceeded",
            ));
        }
        self.out.push_str(text);
        Ok(())
    }

    /// Names bound in the innermost scope, for `dir()`
    pub(super) fn visible_names(&self) -> Vec<String> {
        match self.frames.last().and_then(|f| f.locals.as_ref()) {
            Some(locals) => locals.keys().cloned().collect(),
            None => self.globals.iter().map(|(k, _)| k.clone()).collect(),
        }
    }

    /// Attach the frame stack to an error leaving its first statement
    fn annotate(&self, mut err: ScriptError) -> ScriptError {
        if err.trace.is_empty() && err.syntax_line.is_none() {
            err.trace = self
                .frames
                .iter()
                .map(|f| TraceEntry {
                    line: f.line,
                    scope: f.scope.clone(),
                })
                .collect();
        }
        err
    }

    fn set_line(&mut self, line: usize) {
        if let Some(frame) = self.frames.last_mut() {
            frame.line = line;
        }
    }

    fn exec_block(&mut self, body: &[Stmt]) -> Result<Flow, ScriptError> {
        self.eval_depth += 1;
        let result = if self.eval_depth > MAX_EVAL_DEPTH {
            Err(ScriptError::new(
                ErrorKind::RecursionError,
                "maximum recursion depth exceeded",
            ))
        } else {
            self.exec_stmts(body)
        };
        self.eval_depth -= 1;
        result
    }

    fn exec_stmts(&mut self, body: &[Stmt]) -> Result<Flow, ScriptError> {
        for stmt in body {
            self.set_line(stmt.line);
            match self.exec_stmt(stmt) {
                Ok(Flow::Normal) => {}
                Ok(flow) => return Ok(flow),
                Err(e) => return Err(self.annotate(e)),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<Flow, ScriptError> {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                let value = self.eval_expr(expr)?;
                if self.echo && self.frames.len() == 1 {
                    self.echo_value(&value)?;
                }
            }
            StmtKind::Assign(targets, expr) => {
                let value = self.eval_expr(expr)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
            }
            StmtKind::AugAssign(target, op, expr) => self.aug_assign(target, *op, expr)?,
            StmtKind::If(branches, orelse) => {
                for (cond, body) in branches {
                    if self.eval_expr(cond)?.truthy() {
                        return self.exec_block(body);
                    }
                }
                if let Some(body) = orelse {
                    return self.exec_block(body);
                }
            }
            StmtKind::While(cond, body) => loop {
                self.set_line(stmt.line);
                if !self.eval_expr(cond)?.truthy() {
                    break;
                }
                match self.exec_block(body)? {
                    Flow::Break => break,
                    Flow::Return(v) => return Ok(Flow::Return(v)),
                    Flow::Normal | Flow::Continue => {}
                }
            },
            StmtKind::For(target, iter, body) => {
                let iterable = self.eval_expr(iter)?;
                // Ranges are walked lazily so `for i in range(huge)` with a break stays cheap
                if let Value::Range(start, stop, step) = iterable {
                    for i in 0..range_len(start, stop, step) {
                        let item = Value::Int((start as i128 + i as i128 * step as i128) as i64);
                        if let Some(flow) = self.loop_iteration(target, item, body)? {
                            return Ok(flow);
                        }
                    }
                } else {
                    for item in iterable.iterate()? {
                        if let Some(flow) = self.loop_iteration(target, item, body)? {
                            return Ok(flow);
                        }
                    }
                }
            }
            StmtKind::Def(def) => self.store(def.name.clone(), Value::Function(def.clone())),
            StmtKind::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval_expr(expr)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Del(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
            }
            StmtKind::Raise(expr) => return Err(self.raise(expr.as_ref())?),
            StmtKind::Pass => {}
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
        }
        Ok(Flow::Normal)
    }

    /// Run one loop body; `Some` means leave the loop with that flow
    fn loop_iteration(
        &mut self,
        target: &Target,
        item: Value,
        body: &[Stmt],
    ) -> Result<Option<Flow>, ScriptError> {
        self.assign(target, item)?;
        Ok(match self.exec_block(body)? {
            Flow::Break => Some(Flow::Normal),
            Flow::Return(v) => Some(Flow::Return(v)),
            Flow::Normal | Flow::Continue => None,
        })
    }

    fn raise(&mut self, expr: Option<&Expr>) -> Result<ScriptError, ScriptError> {
        let Some(expr) = expr else {
            return Ok(ScriptError::new(
                ErrorKind::RuntimeError,
                "No active exception to reraise",
            ));
        };
        Ok(match self.eval_expr(expr)? {
            Value::Exception(kind, message) => ScriptError::new(kind, message.to_string()),
            Value::Builtin(Builtin::Exception(kind)) => ScriptError::new(kind, ""),
            _ => ScriptError::type_error("exceptions must derive from BaseException"),
        })
    }

    fn lookup(&self, name: &str) -> Result<Value, ScriptError> {
        if let Some(value) = self
            .frames
            .last()
            .and_then(|f| f.locals.as_ref())
            .and_then(|locals| locals.get(name))
        {
            return Ok(value.clone());
        }
        if let Some(value) = self.globals.get(name) {
            return Ok(value.clone());
        }
        Builtin::lookup(name)
            .map(Value::Builtin)
            .ok_or_else(|| ScriptError::name_error(name))
    }

    fn store(&mut self, name: String, value: Value) {
        match self.frames.last_mut().and_then(|f| f.locals.as_mut()) {
            Some(locals) => {
                locals.insert(name, value);
            }
            None => self.globals.set(name, value),
        }
    }

    fn assign(&mut self, target: &Target, value: Value) -> Result<(), ScriptError> {
        match target {
            Target::Name(name) => self.store(name.clone(), value),
            Target::Index(obj, index) => {
                let container = self.eval_expr(obj)?;
                let key = self.eval_expr(index)?;
                set_item(&container, key, value)?;
            }
            Target::Tuple(targets) => {
                let items = value.iterate()?;
                if items.len() < targets.len() {
                    return Err(ScriptError::value_error(format!(
                        "not enough values to unpack (expected {}, got {})",
                        targets.len(),
                        items.len()
                    )));
                }
                if items.len() > targets.len() {
                    return Err(ScriptError::value_error(format!(
                        "too many values to unpack (expected {})",
                        targets.len()
                    )));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item)?;
                }
            }
        }
        Ok(())
    }

    fn aug_assign(&mut self, target: &Target, op: BinOp, expr: &Expr) -> Result<(), ScriptError> {
        match target {
            Target::Name(name) => {
                let current = self.lookup(name)?;
                let rhs = self.eval_expr(expr)?;
                let value = inplace_op(op, current, &rhs)?;
                self.store(name.clone(), value);
            }
            Target::Index(obj, index) => {
                let container = self.eval_expr(obj)?;
                let key = self.eval_expr(index)?;
                let current = get_item(&container, &key)?;
                let rhs = self.eval_expr(expr)?;
                let value = inplace_op(op, current, &rhs)?;
                set_item(&container, key, value)?;
            }
            Target::Tuple(_) => {
                return Err(ScriptError::syntax(
                    self.frames.last().map_or(1, |f| f.line),
                    "illegal expression for augmented assignment",
                ))
            }
        }
        Ok(())
    }

    fn delete(&mut self, target: &Target) -> Result<(), ScriptError> {
        match target {
            Target::Name(name) => {
                let removed = match self.frames.last_mut().and_then(|f| f.locals.as_mut()) {
                    Some(locals) => locals.remove(name),
                    None => self.globals.remove(name),
                };
                if removed.is_none() {
                    return Err(ScriptError::name_error(name));
                }
            }
            Target::Index(obj, index) => {
                let container = self.eval_expr(obj)?;
                let key = self.eval_expr(index)?;
                del_item(&container, &key)?;
            }
            Target::Tuple(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
            }
        }
        Ok(())
    }

    fn eval_expr(&mut self, expr: &Expr) -> Result<Value, ScriptError> {
        self.eval_depth += 1;
        let result = if self.eval_depth > MAX_EVAL_DEPTH {
            Err(ScriptError::new(
                ErrorKind::RecursionError,
                "maximum recursion depth exceeded",
            ))
        } else {
            self.eval_inner(expr)
        };
        self.eval_depth -= 1;
        result
    }

    fn eval_inner(&mut self, expr: &Expr) -> Result<Value, ScriptError> {
        Ok(match expr {
            Expr::Const(value) => value.clone(),
            Expr::Name(name) => self.lookup(name)?,
            Expr::List(items) => Value::list(self.eval_all(items)?),
            Expr::Tuple(items) => Value::tuple(self.eval_all(items)?),
            Expr::Set(items) => Value::set(self.eval_all(items)?)?,
            Expr::Dict(pairs) => {
                let mut entries = Vec::with_capacity(pairs.len());
                for (k, v) in pairs {
                    let key = self.eval_expr(k)?;
                    let value = self.eval_expr(v)?;
                    entries.push((key, value));
                }
                Value::dict(entries)?
            }
            Expr::Neg(operand) => match self.eval_expr(operand)? {
                Value::Int(i) => Value::Int(i.checked_neg().ok_or_else(overflow)?),
                Value::Bool(b) => Value::Int(-(b as i64)),
                Value::Float(f) => Value::Float(-f),
                other => return Err(bad_unary("-", &other)),
            },
            Expr::Pos(operand) => match self.eval_expr(operand)? {
                Value::Bool(b) => Value::Int(b as i64),
                v @ (Value::Int(_) | Value::Float(_)) => v,
                other => return Err(bad_unary("+", &other)),
            },
            Expr::Not(operand) => Value::Bool(!self.eval_expr(operand)?.truthy()),
            Expr::Binary(lhs, op, rhs) => {
                let a = self.eval_expr(lhs)?;
                let b = self.eval_expr(rhs)?;
                binary_op(*op, &a, &b)?
            }
            Expr::Compare(first, rest) => {
                let mut left = self.eval_expr(first)?;
                for (op, right) in rest {
                    let right = self.eval_expr(right)?;
                    if !compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Value::Bool(true)
            }
            Expr::And(lhs, rhs) => {
                let left = self.eval_expr(lhs)?;
                if !left.truthy() {
                    left
                } else {
                    self.eval_expr(rhs)?
                }
            }
            Expr::Or(lhs, rhs) => {
                let left = self.eval_expr(lhs)?;
                if left.truthy() {
                    left
                } else {
                    self.eval_expr(rhs)?
                }
            }
            Expr::IfElse { cond, then, other } => {
                if self.eval_expr(cond)?.truthy() {
                    self.eval_expr(then)?
                } else {
                    self.eval_expr(other)?
                }
            }
            Expr::Call(func, args) => {
                let func = self.eval_expr(func)?;
                let args = self.eval_all(args)?;
                self.call_value(func, args)?
            }
            Expr::Attr(obj, name) => get_attribute(&self.eval_expr(obj)?, name)?,
            Expr::Index(obj, index) => {
                let container = self.eval_expr(obj)?;
                let key = self.eval_expr(index)?;
                get_item(&container, &key)?
            }
        })
    }

    fn eval_all(&mut self, exprs: &[Expr]) -> Result<Vec<Value>, ScriptError> {
        exprs.iter().map(|e| self.eval_expr(e)).collect()
    }

    pub(super) fn call_value(
        &mut self,
        func: Value,
        args: Vec<Value>,
    ) -> Result<Value, ScriptError> {
        match func {
            Value::Function(def) => self.call_function(&def, args),
            Value::Builtin(builtin) => builtins::call_builtin(self, builtin, args),
            Value::Method(method) => match &method.receiver {
                Value::Host(host) => host.call_method(&method.name, args),
                receiver => builtins::call_method(receiver, &method.name, args),
            },
            other => Err(ScriptError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(
        &mut self,
        def: &Arc<FunctionDef>,
        args: Vec<Value>,
    ) -> Result<Value, ScriptError> {
        if self.frames.len() > MAX_CALL_DEPTH {
            return Err(ScriptError::new(
                ErrorKind::RecursionError,
                "maximum recursion depth exceeded",
            ));
        }
        check_arity(def, args.len())?;

        let locals = def.params.iter().cloned().zip(args).collect();
        self.frames.push(Frame {
            scope: def.name.clone(),
            line: def.body.first().map_or(1, |s| s.line),
            locals: Some(locals),
        });
        let result = self.exec_block(&def.body);
        self.frames.pop();
        match result? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::None),
        }
    }
}

fn check_arity(def: &FunctionDef, given: usize) -> Result<(), ScriptError> {
    let expected = def.params.len();
    if given > expected {
        return Err(ScriptError::type_error(format!(
            "{}() takes {} positional argument{} but {} {} given",
            def.name,
            expected,
            if expected == 1 { "" } else { "s" },
            given,
            if given == 1 { "was" } else { "were" }
        )));
    }
    if given < expected {
        let missing: Vec<String> = def.params[given..]
            .iter()
            .map(|p| format!("'{}'", p))
            .collect();
        return Err(ScriptError::type_error(format!(
            "{}() missing {} required positional argument{}: {}",
            def.name,
            missing.len(),
            if missing.len() == 1 { "" } else { "s" },
            missing.join(", ")
        )));
    }
    Ok(())
}

fn overflow() -> ScriptError {
    ScriptError::new(ErrorKind::OverflowError, "integer overflow")
}

fn bad_unary(symbol: &str, operand: &Value) -> ScriptError {
    ScriptError::type_error(format!(
        "bad operand type for unary {}: '{}'",
        symbol,
        operand.type_name()
    ))
}

pub(super) fn check_size(len: usize) -> Result<(), ScriptError> {
    if len > MAX_MATERIALIZED {
        return Err(ScriptError::new(
            ErrorKind::MemoryError,
            "result too large",
        ));
    }
    Ok(())
}

/// Resolve `value.name`
pub fn get_attribute(value: &Value, name: &str) -> Result<Value, ScriptError> {
    let bound = || {
        Value::Method(Arc::new(BoundMethod {
            receiver: value.clone(),
            name: name.to_string(),
        }))
    };
    if let Value::Host(host) = value {
        if let Some(attr) = host.get_attr(name) {
            return Ok(attr);
        }
        if host.names().iter().any(|(n, callable)| n == name && *callable) {
            return Ok(bound());
        }
        return Err(ScriptError::attribute_error(host.type_name(), name));
    }

    match (value, name) {
        (Value::Int(i), "real") => return Ok(Value::Int(*i)),
        (Value::Bool(b), "real") => return Ok(Value::Int(*b as i64)),
        (Value::Int(_) | Value::Bool(_), "imag") => return Ok(Value::Int(0)),
        (Value::Float(f), "real") => return Ok(Value::Float(*f)),
        (Value::Float(_), "imag") => return Ok(Value::Float(0.0)),
        _ => {}
    }
    if type_methods(value.type_name()).contains(&name) {
        Ok(bound())
    } else {
        Err(ScriptError::attribute_error(value.type_name(), name))
    }
}

/// Convert a Python index to a position, counting negatives from the end
pub(super) fn index_of(key: &Value, len: usize, what: &str) -> Result<usize, ScriptError> {
    let i = match key {
        Value::Int(i) => *i,
        Value::Bool(b) => *b as i64,
        other => {
            return Err(ScriptError::type_error(format!(
                "{} indices must be integers, not {}",
                what,
                other.type_name()
            )))
        }
    };
    let len = len as i128;
    let idx = if i < 0 { i as i128 + len } else { i as i128 };
    if idx < 0 || idx >= len {
        return Err(ScriptError::new(
            ErrorKind::IndexError,
            format!("{} index out of range", what),
        ));
    }
    Ok(idx as usize)
}

fn require_hashable(key: &Value) -> Result<(), ScriptError> {
    if key.is_hashable() {
        Ok(())
    } else {
        Err(ScriptError::type_error(format!(
            "unhashable type: '{}'",
            key.type_name()
        )))
    }
}

pub(super) fn key_error(key: &Value) -> ScriptError {
    ScriptError::new(ErrorKind::KeyError, key.repr())
}

fn get_item(container: &Value, key: &Value) -> Result<Value, ScriptError> {
    match container {
        Value::List(items) => {
            let items = items.lock();
            let i = index_of(key, items.len(), "list")?;
            Ok(items[i].clone())
        }
        Value::Tuple(items) => Ok(items[index_of(key, items.len(), "tuple")?].clone()),
        Value::Str(s) => {
            let i = index_of(key, s.chars().count(), "string")?;
            Ok(s.chars()
                .nth(i)
                .map_or(Value::None, |c| Value::str(c.to_string())))
        }
        Value::Range(start, stop, step) => {
            let i = index_of(key, range_len(*start, *stop, *step), "range object")?;
            Ok(Value::Int((*start as i128 + i as i128 * *step as i128) as i64))
        }
        Value::Dict(entries) => {
            require_hashable(key)?;
            let found = dict_get(&entries.lock(), key);
            found.ok_or_else(|| key_error(key))
        }
        other => Err(ScriptError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn set_item(container: &Value, key: Value, value: Value) -> Result<(), ScriptError> {
    match container {
        Value::List(items) => {
            let mut items = items.lock();
            let i = index_of(&key, items.len(), "list").map_err(|e| match e.kind {
                ErrorKind::IndexError => {
                    ScriptError::new(ErrorKind::IndexError, "list assignment index out of range")
                }
                _ => e,
            })?;
            items[i] = value;
            Ok(())
        }
        Value::Dict(entries) => dict_insert(&mut entries.lock(), key, value),
        other => Err(ScriptError::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

fn del_item(container: &Value, key: &Value) -> Result<(), ScriptError> {
    match container {
        Value::List(items) => {
            let mut items = items.lock();
            let i = index_of(key, items.len(), "list")?;
            items.remove(i);
            Ok(())
        }
        Value::Dict(entries) => {
            require_hashable(key)?;
            let mut entries = entries.lock();
            match entries.iter().position(|(k, _)| k.equals(key)) {
                Some(pos) => {
                    entries.remove(pos);
                    Ok(())
                }
                None => Err(key_error(key)),
            }
        }
        other => Err(ScriptError::type_error(format!(
            "'{}' object does not support item deletion",
            other.type_name()
        ))),
    }
}

/// `x op= y`; lists extend in place so aliases observe the change
fn inplace_op(op: BinOp, current: Value, rhs: &Value) -> Result<Value, ScriptError> {
    if let (BinOp::Add, Value::List(items)) = (op, &current) {
        let extra = rhs.iterate()?;
        let mut items = items.lock();
        check_size(items.len() + extra.len())?;
        items.extend(extra);
        drop(items);
        return Ok(current);
    }
    binary_op(op, &current, rhs)
}

pub(super) fn binary_op(op: BinOp, a: &Value, b: &Value) -> Result<Value, ScriptError> {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return match (x, y) {
            (Number::Int(x), Number::Int(y)) => int_op(op, x, y),
            _ => float_op(op, x.as_f64(), y.as_f64()),
        };
    }
    match (op, a, b) {
        (BinOp::Add, Value::Str(x), Value::Str(y)) => {
            check_size(x.len() + y.len())?;
            Ok(Value::str(format!("{}{}", x, y)))
        }
        (BinOp::Add, Value::List(x), Value::List(y)) => {
            let mut items = x.lock().clone();
            let extra = y.lock().clone();
            check_size(items.len() + extra.len())?;
            items.extend(extra);
            Ok(Value::list(items))
        }
        (BinOp::Add, Value::Tuple(x), Value::Tuple(y)) => {
            check_size(x.len() + y.len())?;
            Ok(Value::tuple(x.iter().chain(y.iter()).cloned().collect()))
        }
        (BinOp::Sub, Value::Set(x), Value::Set(y)) => {
            let (x, y) = (x.lock().clone(), y.lock().clone());
            Value::set(
                x.into_iter()
                    .filter(|item| !y.iter().any(|other| other.equals(item)))
                    .collect(),
            )
        }
        (BinOp::Mul, seq, n) | (BinOp::Mul, n, seq)
            if repeat_count(n).is_some()
                && matches!(seq, Value::Str(_) | Value::List(_) | Value::Tuple(_)) =>
        {
            repeat(seq, repeat_count(n).unwrap_or(0))
        }
        _ => Err(ScriptError::type_error(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op.symbol(),
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn repeat_count(v: &Value) -> Option<i64> {
    match v {
        Value::Int(i) => Some(*i),
        Value::Bool(b) => Some(*b as i64),
        _ => None,
    }
}

fn repeat(seq: &Value, n: i64) -> Result<Value, ScriptError> {
    let n = n.max(0) as usize;
    match seq {
        Value::Str(s) => {
            check_size(s.len().saturating_mul(n))?;
            Ok(Value::str(s.repeat(n)))
        }
        Value::List(items) => {
            let items = items.lock().clone();
            check_size(items.len().saturating_mul(n))?;
            Ok(Value::list(repeat_items(&items, n)))
        }
        Value::Tuple(items) => {
            check_size(items.len().saturating_mul(n))?;
            Ok(Value::tuple(repeat_items(items, n)))
        }
        other => Err(ScriptError::type_error(format!(
            "can't multiply sequence of type '{}'",
            other.type_name()
        ))),
    }
}

fn repeat_items(items: &[Value], n: usize) -> Vec<Value> {
    let mut out = Vec::with_capacity(items.len() * n);
    for _ in 0..n {
        out.extend(items.iter().cloned());
    }
    out
}

fn int_op(op: BinOp, a: i64, b: i64) -> Result<Value, ScriptError> {
    let zero = |msg: &str| ScriptError::new(ErrorKind::ZeroDivisionError, msg);
    Ok(Value::Int(match op {
        BinOp::Add => a.checked_add(b).ok_or_else(overflow)?,
        BinOp::Sub => a.checked_sub(b).ok_or_else(overflow)?,
        BinOp::Mul => a.checked_mul(b).ok_or_else(overflow)?,
        BinOp::Div => {
            if b == 0 {
                return Err(zero("division by zero"));
            }
            return Ok(Value::Float(a as f64 / b as f64));
        }
        BinOp::FloorDiv => {
            if b == 0 {
                return Err(zero("integer division or modulo by zero"));
            }
            let q = a.checked_div(b).ok_or_else(overflow)?;
            if a % b != 0 && ((a < 0) != (b < 0)) {
                q - 1
            } else {
                q
            }
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(zero("integer modulo by zero"));
            }
            let r = a.wrapping_rem(b);
            if r != 0 && ((r < 0) != (b < 0)) {
                r + b
            } else {
                r
            }
        }
        BinOp::Pow => {
            if b < 0 {
                return float_op(op, a as f64, b as f64);
            }
            match a {
                0 => (b == 0) as i64,
                1 => 1,
                -1 => {
                    if b % 2 == 0 {
                        1
                    } else {
                        -1
                    }
                }
                _ => u32::try_from(b)
                    .ok()
                    .and_then(|e| a.checked_pow(e))
                    .ok_or_else(overflow)?,
            }
        }
    }))
}

fn float_op(op: BinOp, a: f64, b: f64) -> Result<Value, ScriptError> {
    let zero = |msg: &str| ScriptError::new(ErrorKind::ZeroDivisionError, msg);
    Ok(Value::Float(match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(zero("float division by zero"));
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(zero("float floor division by zero"));
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(zero("float modulo"));
            }
            let r = a % b;
            if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
                r + b
            } else {
                r
            }
        }
        BinOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(zero("0.0 cannot be raised to a negative power"));
            }
            if a < 0.0 && b.fract() != 0.0 {
                return Err(ScriptError::value_error("math domain error"));
            }
            let result = a.powf(b);
            if result.is_infinite() && a.is_finite() && b.is_finite() {
                return Err(ScriptError::new(
                    ErrorKind::OverflowError,
                    "numerical result out of range",
                ));
            }
            result
        }
    }))
}

fn compare(op: CmpOp, a: &Value, b: &Value) -> Result<bool, ScriptError> {
    use std::cmp::Ordering;

    let ordering = |symbol: &str| {
        compare_values(a, b).map_err(|e| match e.kind {
            ErrorKind::TypeError => ScriptError::type_error(format!(
                "'{}' not supported between instances of '{}' and '{}'",
                symbol,
                a.type_name(),
                b.type_name()
            )),
            _ => e,
        })
    };
    Ok(match op {
        CmpOp::Eq => a.equals(b),
        CmpOp::Ne => !a.equals(b),
        CmpOp::Lt => ordering("<")? == Ordering::Less,
        CmpOp::Le => ordering("<=")? != Ordering::Greater,
        CmpOp::Gt => ordering(">")? == Ordering::Greater,
        CmpOp::Ge => ordering(">=")? != Ordering::Less,
        CmpOp::In => contains(b, a)?,
        CmpOp::NotIn => !contains(b, a)?,
        CmpOp::Is => a.is_same(b),
        CmpOp::IsNot => !a.is_same(b),
    })
}

/// `item in container`
pub(super) fn contains(container: &Value, item: &Value) -> Result<bool, ScriptError> {
    match container {
        Value::Str(s) => match item {
            Value::Str(sub) => Ok(s.contains(&**sub)),
            other => Err(ScriptError::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) | Value::Set(items) => {
            let items = items.lock().clone();
            Ok(items.iter().any(|v| v.equals(item)))
        }
        Value::Tuple(items) => Ok(items.iter().any(|v| v.equals(item))),
        Value::Dict(entries) => {
            let keys: Vec<Value> = entries.lock().iter().map(|(k, _)| k.clone()).collect();
            Ok(keys.iter().any(|k| k.equals(item)))
        }
        Value::Range(start, stop, step) => Ok(match as_number(item) {
            Some(Number::Int(i)) => {
                let in_bounds = if *step > 0 {
                    *start <= i && i < *stop
                } else {
                    *stop < i && i <= *start
                };
                in_bounds && (i as i128 - *start as i128) % *step as i128 == 0
            }
            _ => false,
        }),
        other => Err(ScriptError::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parser::{parse_expression, parse_program};

    fn run(src: &str) -> (Namespace, String, Option<ScriptError>) {
        let mut ns = Namespace::new();
        let mut out = String::new();
        let program = parse_program(src).unwrap();
        let err = Interpreter::new(&mut ns, &mut out)
            .interactive()
            .run(&program)
            .err();
        (ns, out, err)
    }

    fn eval(src: &str) -> Value {
        let mut ns = Namespace::new();
        let mut out = String::new();
        let expr = parse_expression(src).unwrap();
        Interpreter::new(&mut ns, &mut out).eval(&expr).unwrap()
    }

    #[test]
    fn test_arithmetic_follows_python_rules() {
        assert_eq!(eval("7 // 2").repr(), "3");
        assert_eq!(eval("-7 // 2").repr(), "-4");
        assert_eq!(eval("-7 % 3").repr(), "2");
        assert_eq!(eval("7 % -3").repr(), "-2");
        assert_eq!(eval("1 / 2").repr(), "0.5");
        assert_eq!(eval("2 ** 10").repr(), "1024");
        assert_eq!(eval("2 ** -1").repr(), "0.5");
        assert_eq!(eval("'ab' * 3").repr(), "'ababab'");
        assert_eq!(eval("[1] + [2]").repr(), "[1, 2]");
        assert_eq!(eval("1 < 2 < 3").repr(), "True");
        assert_eq!(eval("3 in [1, 2, 3]").repr(), "True");
        assert_eq!(eval("'x' if 0 else 'y'").repr(), "'y'");
    }

    #[test]
    fn test_division_by_zero_is_an_error() {
        let (_, _, err) = run("x = 1 / 0");
        let err = err.unwrap();
        assert_eq!(err.kind, ErrorKind::ZeroDivisionError);
        assert_eq!(
            err.trace,
            vec![TraceEntry {
                line: 1,
                scope: "<module>".into()
            }]
        );
    }

    #[test]
    fn test_integer_overflow_is_caught() {
        let (_, _, err) = run("x = 9223372036854775807 + 1");
        assert_eq!(err.unwrap().kind, ErrorKind::OverflowError);
    }

    #[test]
    fn test_functions_and_loops() {
        let (ns, out, err) = run(
            "def fib(n):\n    a, b = 0, 1\n    for _ in range(n):\n        a, b = b, a + b\n    return a\nresult = fib(10)\nprint(result)\n",
        );
        assert!(err.is_none());
        assert_eq!(out, "55\n");
        assert!(ns.get("result").unwrap().equals(&Value::Int(55)));
    }

    #[test]
    fn test_traceback_names_each_frame() {
        let (_, _, err) = run("def f(x):\n    return x / 0\nf(1)\n");
        let err = err.unwrap();
        assert_eq!(
            err.trace,
            vec![
                TraceEntry {
                    line: 3,
                    scope: "<module>".into()
                },
                TraceEntry {
                    line: 2,
                    scope: "f".into()
                },
            ]
        );
    }

    #[test]
    fn test_recursion_is_bounded() {
        let (_, _, err) = run("def f(n):\n    return f(n + 1)\nf(0)\n");
        assert_eq!(err.unwrap().kind, ErrorKind::RecursionError);
    }

    #[test]
    fn test_nested_blocks_count_toward_recursion_limit() {
        let mut src = String::from("def f():\n");
        for level in 1..=90 {
            src.push_str(&format!("{}if 1:\n", " ".repeat(level)));
        }
        src.push_str(&format!("{}return f()\nf()\n", " ".repeat(91)));
        let (_, _, err) = run(&src);
        let err = err.unwrap();
        assert_eq!(err.kind, ErrorKind::RecursionError);
        assert_eq!(err.message, "maximum recursion depth exceeded");
    }

    #[test]
    fn test_echo_value_respects_output_cap() {
        let mut ns = Namespace::new();
        let mut out = String::new();
        let mut interp = Interpreter::new(&mut ns, &mut out);
        let big = interp.eval(&parse_expression("'ab' * 1000000").unwrap()).unwrap();
        let err = interp.echo_value(&big).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MemoryError);
        assert!(interp.echo_value(&Value::Int(1)).is_ok());
        drop(interp);
        assert_eq!(out, "1\n");
    }

    #[test]
    fn test_interactive_echo_only_at_module_level() {
        let (_, out, _) = run("def f():\n    1\n    return 2\nf()\nNone\n");
        assert_eq!(out, "2\n");
    }

    #[test]
    fn test_list_alias_sees_inplace_add() {
        let (ns, _, _) = run("a = [1]\nb = a\na += [2]\n");
        assert_eq!(ns.get("b").unwrap().repr(), "[1, 2]");
    }

    #[test]
    fn test_while_break_continue() {
        let (_, out, err) = run(
            "i = 0\nwhile True:\n    i += 1\n    if i % 2:\n        continue\n    if i > 6:\n        break\n    print(i)\n",
        );
        assert!(err.is_none());
        assert_eq!(out, "2\n4\n6\n");
    }

    #[test]
    fn test_index_assignment_and_del() {
        let (ns, _, err) = run("d = {'a': 1}\nd['b'] = 2\ndel d['a']\nl = [1, 2, 3]\nl[-1] = 9\n");
        assert!(err.is_none());
        assert_eq!(ns.get("d").unwrap().repr(), "{'b': 2}");
        assert_eq!(ns.get("l").unwrap().repr(), "[1, 2, 9]");
    }

    #[test]
    fn test_raise_builtin_exception() {
        let (_, _, err) = run("raise ValueError('bad value')\n");
        let err = err.unwrap();
        assert_eq!(err.kind, ErrorKind::ValueError);
        assert_eq!(err.message, "bad value");
    }

    #[test]
    fn test_unpack_mismatch() {
        let (_, _, err) = run("a, b = [1, 2, 3]\n");
        assert_eq!(err.unwrap().kind, ErrorKind::ValueError);
    }

    #[test]
    fn test_arity_errors() {
        let (_, _, err) = run("def f(a, b):\n    pass\nf(1)\n");
        assert_eq!(
            err.unwrap().message,
            "f() missing 1 required positional argument: 'b'"
        );
    }

    #[test]
    fn test_output_is_capped() {
        let (_, out, err) = run("while True:\n    print('x' * 1000)\n");
        assert_eq!(err.unwrap().kind, ErrorKind::MemoryError);
        assert!(out.len() <= MAX_OUTPUT);
    }
}
