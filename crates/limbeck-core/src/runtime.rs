//! Tree-walk interpreter for admitted modules.
//!
//! Executes exactly what the validators admitted: clause dispatch with
//! pattern matching and guards, the whitelisted operators, and built-in
//! calls through the host registry. Anything else raising here is a bug in
//! the validator, not a sandbox escape hatch — by the time code reaches
//! this module it has already been admitted.

use crate::ast::{Clause, DefKind, Form, Node, StrPart};
use crate::builtins::Builtins;
use crate::shape::ModuleShape;
use crate::value::{FunValue, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use regex::RegexBuilder;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

/// Exception raised while executing admitted code. Rendered messages pass
/// through the sandbox boundary unchanged.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("bad argument in arithmetic expression")]
    Arithmetic,
    #[error("no function clause matching in {0}/{1}")]
    NoFunctionClause(String, usize),
    #[error("no case clause matching: {0}")]
    NoCaseClause(String),
    #[error("no cond clause evaluated to a truthy value")]
    NoCondClause,
    #[error("no with clause matching: {0}")]
    NoWithClause(String),
    #[error("no match of right hand side value: {0}")]
    NoMatch(String),
    #[error("undefined function {0}")]
    UndefinedFunction(String),
    #[error("key {0} not found")]
    KeyError(String),
    #[error("bad arity: function expected {0} argument(s), got {1}")]
    BadArity(usize, usize),
    #[error("expected a function, got: {0}")]
    BadFunction(String),
    #[error("{0}")]
    ArgumentError(String),
}

impl EvalError {
    pub fn argument(message: impl Into<String>) -> Self {
        EvalError::ArgumentError(message.into())
    }
}

/// One runtime clause of a named function.
#[derive(Debug, Clone)]
pub struct FunClause {
    pub params: Vec<Node>,
    pub guard: Option<Node>,
    pub body: Vec<Node>,
}

#[derive(Debug, Clone)]
struct FunGroup {
    public: bool,
    clauses: Vec<FunClause>,
}

/// A compiled, admitted module: the owned AST organized for dispatch plus
/// its installed attribute constants. Shared across threads via the cache.
#[derive(Debug, Clone)]
pub struct ModuleUnit {
    pub name: String,
    pub source_hash: u64,
    attributes: HashMap<String, Value>,
    functions: HashMap<(String, usize), FunGroup>,
}

impl ModuleUnit {
    /// Organize validated definitions into clause groups, source order
    /// preserved within each name/arity.
    pub fn compile(name: &str, source_hash: u64, shape: &ModuleShape<'_>) -> Self {
        let mut functions: HashMap<(String, usize), FunGroup> = HashMap::new();
        for fun in &shape.defs {
            let group = functions
                .entry((fun.name.clone(), fun.arity()))
                .or_insert_with(|| FunGroup {
                    public: false,
                    clauses: Vec::new(),
                });
            group.public |= fun.kind == DefKind::Def;
            group.clauses.push(FunClause {
                params: fun.params.clone(),
                guard: fun.guard.clone(),
                body: fun.body.clone(),
            });
        }
        Self {
            name: name.to_string(),
            source_hash,
            attributes: HashMap::new(),
            functions,
        }
    }

    pub fn set_attribute(&mut self, name: &str, value: Value) {
        self.attributes.insert(name.to_string(), value);
    }

    /// Whether a public `function/arity` is callable from outside.
    pub fn exports(&self, name: &str, arity: usize) -> bool {
        self.functions
            .get(&(name.to_string(), arity))
            .is_some_and(|group| group.public)
    }
}

/// Variable bindings of one executing function body.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    vars: HashMap<String, Value>,
}

impl Bindings {
    fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    fn insert(&mut self, name: &str, value: Value) {
        self.vars.insert(name.to_string(), value);
    }
}

/// Context handed to built-in functions so higher-order built-ins
/// (`Enum.map` and friends) can apply sandbox function values.
pub struct CallCtx<'a> {
    interp: &'a Interp<'a>,
}

impl CallCtx<'_> {
    pub fn apply(&mut self, fun: &Value, args: &[Value]) -> Result<Value, EvalError> {
        self.interp.call_value(fun, args)
    }
}

/// The evaluator over one admitted module.
pub struct Interp<'a> {
    unit: &'a ModuleUnit,
    builtins: &'a Builtins,
}

impl<'a> Interp<'a> {
    pub fn new(unit: &'a ModuleUnit, builtins: &'a Builtins) -> Self {
        Self { unit, builtins }
    }

    /// Invoke a named function with already-evaluated arguments.
    pub fn invoke(&self, name: &str, args: &[Value]) -> Result<Value, EvalError> {
        let Some(group) = self.unit.functions.get(&(name.to_string(), args.len())) else {
            return Err(EvalError::UndefinedFunction(format!(
                "{name}/{}",
                args.len()
            )));
        };
        for clause in &group.clauses {
            let mut env = Bindings::default();
            if self.match_params(&clause.params, args, &mut env)? {
                if let Some(guard) = &clause.guard {
                    if !self.guard_passes(guard, &mut env) {
                        continue;
                    }
                }
                return self.eval_body(&clause.body, &mut env);
            }
        }
        Err(EvalError::NoFunctionClause(name.to_string(), args.len()))
    }

    /// Evaluate a module attribute right-hand side (no bindings in scope).
    pub fn eval_constant(&self, node: &Node) -> Result<Value, EvalError> {
        let mut env = Bindings::default();
        self.eval(node, &mut env)
    }

    fn match_params(
        &self,
        params: &[Node],
        args: &[Value],
        env: &mut Bindings,
    ) -> Result<bool, EvalError> {
        let mut bound = HashSet::new();
        for (param, arg) in params.iter().zip(args) {
            if !self.match_pattern(param, arg, env, &mut bound)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn eval_body(&self, stmts: &[Node], env: &mut Bindings) -> Result<Value, EvalError> {
        let mut last = Value::Nil;
        for stmt in stmts {
            last = self.eval(stmt, env)?;
        }
        Ok(last)
    }

    fn eval(&self, node: &Node, env: &mut Bindings) -> Result<Value, EvalError> {
        match &node.form {
            Form::Int(n) => Ok(Value::Int(*n)),
            Form::Float(f) => Ok(Value::Float(*f)),
            Form::Bool(b) => Ok(Value::Bool(*b)),
            Form::Nil => Ok(Value::Nil),
            Form::Atom(name) => Ok(Value::atom(name)),
            Form::Str(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        StrPart::Lit(text) => out.push_str(text),
                        StrPart::Interp(inner) => {
                            let value = self.eval(inner, env)?;
                            out.push_str(&value.display_string());
                        }
                    }
                }
                Ok(Value::string(out))
            }
            Form::Var(name) => match env.get(name) {
                Some(value) => Ok(value.clone()),
                // Validated as a zero-arity local call.
                None => self.call_local(name, &[]),
            },
            Form::AttrRef(name) => Ok(self
                .unit
                .attributes
                .get(name)
                .cloned()
                .unwrap_or(Value::Nil)),
            Form::UnaryOp { op, operand } => {
                let value = self.eval(operand, env)?;
                eval_unary(op, value)
            }
            Form::BinaryOp { op, left, right } => match op.as_str() {
                "&&" | "and" => {
                    let lhs = self.eval(left, env)?;
                    if lhs.is_truthy() {
                        self.eval(right, env)
                    } else {
                        Ok(lhs)
                    }
                }
                "||" | "or" => {
                    let lhs = self.eval(left, env)?;
                    if lhs.is_truthy() {
                        Ok(lhs)
                    } else {
                        self.eval(right, env)
                    }
                }
                _ => {
                    let lhs = self.eval(left, env)?;
                    let rhs = self.eval(right, env)?;
                    eval_binary(op, lhs, rhs)
                }
            },
            Form::Match { pattern, value } => {
                let rhs = self.eval(value, env)?;
                let mut bound = HashSet::new();
                if self.match_pattern(pattern, &rhs, env, &mut bound)? {
                    Ok(rhs)
                } else {
                    Err(EvalError::NoMatch(rhs.inspect()))
                }
            }
            Form::Pipe { left, right } => {
                let piped = self.eval(left, env)?;
                self.eval_piped(piped, right, env)
            }
            Form::When { .. } => Err(EvalError::argument("argument error")),
            Form::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(item, env)?);
                }
                Ok(Value::list(out))
            }
            Form::Cons { head, tail } => {
                let mut out = Vec::with_capacity(head.len() + 1);
                for item in head {
                    out.push(self.eval(item, env)?);
                }
                match self.eval(tail, env)? {
                    Value::List(rest) => {
                        out.extend(rest.iter().cloned());
                        Ok(Value::list(out))
                    }
                    other => Err(EvalError::argument(format!(
                        "cannot prepend to a non-list: {}",
                        other.inspect()
                    ))),
                }
            }
            Form::Tuple(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(item, env)?);
                }
                Ok(Value::tuple(out))
            }
            Form::MapLit(entries) => {
                let mut out = BTreeMap::new();
                for (key, value) in entries {
                    let key = self.eval(key, env)?;
                    let value = self.eval(value, env)?;
                    out.insert(key, value);
                }
                Ok(Value::map(out))
            }
            Form::MapUpdate { base, entries } => {
                let base = self.eval(base, env)?;
                let Value::Map(existing) = base else {
                    return Err(EvalError::argument(format!(
                        "expected a map, got: {}",
                        base.inspect()
                    )));
                };
                let mut out = (*existing).clone();
                for (key, value) in entries {
                    let key = self.eval(key, env)?;
                    if !out.contains_key(&key) {
                        return Err(EvalError::KeyError(key.inspect()));
                    }
                    let value = self.eval(value, env)?;
                    out.insert(key, value);
                }
                Ok(Value::map(out))
            }
            Form::Bitstring(segments) => {
                let mut bytes = Vec::new();
                for segment in segments {
                    let value = self.eval(&segment.value, env)?;
                    match value {
                        Value::Int(n) => bytes.push((n & 0xFF) as u8),
                        Value::Str(s) => bytes.extend_from_slice(s.as_bytes()),
                        other => {
                            return Err(EvalError::argument(format!(
                                "invalid bitstring segment: {}",
                                other.inspect()
                            )));
                        }
                    }
                }
                Ok(Value::string(String::from_utf8_lossy(&bytes).into_owned()))
            }
            Form::Sigil {
                letter,
                body,
                modifiers,
            } => eval_sigil(*letter, body, modifiers),
            Form::Block(stmts) => self.eval_body(stmts, env),
            Form::Case { subject, clauses } => {
                let subject = self.eval(subject, env)?;
                self.eval_clauses(clauses, &[subject.clone()], env)?
                    .ok_or(EvalError::NoCaseClause(subject.inspect()))
            }
            Form::Cond { clauses } => {
                for clause in clauses {
                    let Some(condition) = clause.patterns.first() else {
                        continue;
                    };
                    if self.eval(condition, env)?.is_truthy() {
                        let mut scoped = env.clone();
                        return self.eval_body(&clause.body, &mut scoped);
                    }
                }
                Err(EvalError::NoCondClause)
            }
            Form::With {
                entries,
                body,
                else_clauses,
            } => {
                let mut scoped = env.clone();
                for entry in entries {
                    match &entry.form {
                        Form::WithBind { pattern, value } => {
                            let value = self.eval(value, &mut scoped)?;
                            let mut bound = HashSet::new();
                            if !self.match_pattern(pattern, &value, &mut scoped, &mut bound)? {
                                if else_clauses.is_empty() {
                                    return Ok(value);
                                }
                                return self
                                    .eval_clauses(else_clauses, &[value.clone()], env)?
                                    .ok_or(EvalError::NoWithClause(value.inspect()));
                            }
                        }
                        _ => {
                            self.eval(entry, &mut scoped)?;
                        }
                    }
                }
                self.eval_body(body, &mut scoped)
            }
            Form::WithBind { .. } => Err(EvalError::argument("argument error")),
            Form::Fn { clauses } => {
                let captured: Vec<(String, Value)> = env
                    .vars
                    .iter()
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect();
                Ok(Value::Fun(Arc::new(FunValue::Anonymous {
                    clauses: clauses.clone(),
                    captured,
                })))
            }
            Form::LocalCall { name, args } => {
                let args = self.eval_args(args, env)?;
                self.call_local(name, &args)
            }
            Form::RemoteCall { module, name, args } => {
                let args = self.eval_args(args, env)?;
                self.call_remote(&module.join("."), name, &args)
            }
            Form::AnonCall { target, args } => {
                let target = self.eval(target, env)?;
                let args = self.eval_args(args, env)?;
                self.call_value(&target, &args)
            }
            Form::FieldAccess { target, field } => {
                let target = self.eval(target, env)?;
                field_access(&target, field)
            }
            Form::IndexAccess { target, index } => {
                let target = self.eval(target, env)?;
                let index = self.eval(index, env)?;
                self.call_remote("Access", "get", &[target, index])
            }
            Form::CaptureLocal { name, arity } => {
                Ok(Value::Fun(Arc::new(FunValue::LocalCapture {
                    name: name.clone(),
                    arity: *arity,
                })))
            }
            Form::CaptureRemote {
                module,
                name,
                arity,
            } => Ok(Value::Fun(Arc::new(FunValue::RemoteCapture {
                module: module.join("."),
                name: name.clone(),
                arity: *arity,
            }))),
            Form::ModuleRef(_)
            | Form::Attribute { .. }
            | Form::Def(_)
            | Form::Defmodule { .. }
            | Form::Directive { .. } => Err(EvalError::argument("argument error")),
        }
    }

    fn eval_args(&self, args: &[Node], env: &mut Bindings) -> Result<Vec<Value>, EvalError> {
        let mut out = Vec::with_capacity(args.len());
        for arg in args {
            out.push(self.eval(arg, env)?);
        }
        Ok(out)
    }

    /// Try clauses against the given values; `None` means no clause matched.
    fn eval_clauses(
        &self,
        clauses: &[Clause],
        values: &[Value],
        env: &Bindings,
    ) -> Result<Option<Value>, EvalError> {
        for clause in clauses {
            if clause.patterns.len() != values.len() {
                continue;
            }
            let mut scoped = env.clone();
            let mut bound = HashSet::new();
            let mut matched = true;
            for (pattern, value) in clause.patterns.iter().zip(values) {
                if !self.match_pattern(pattern, value, &mut scoped, &mut bound)? {
                    matched = false;
                    break;
                }
            }
            if !matched {
                continue;
            }
            if let Some(guard) = &clause.guard {
                if !self.guard_passes(guard, &mut scoped) {
                    continue;
                }
            }
            return self.eval_body(&clause.body, &mut scoped).map(Some);
        }
        Ok(None)
    }

    /// Guards never raise: any error means the clause does not apply.
    fn guard_passes(&self, guard: &Node, env: &mut Bindings) -> bool {
        match self.eval(guard, env) {
            Ok(value) => value.is_truthy(),
            Err(_) => false,
        }
    }

    fn call_local(&self, name: &str, args: &[Value]) -> Result<Value, EvalError> {
        if self
            .unit
            .functions
            .contains_key(&(name.to_string(), args.len()))
        {
            return self.invoke(name, args);
        }
        if let Some(builtin) = self.builtins.get(&format!("Kernel.{name}")) {
            let mut ctx = CallCtx { interp: self };
            return builtin(args, &mut ctx);
        }
        Err(EvalError::UndefinedFunction(format!(
            "{name}/{}",
            args.len()
        )))
    }

    fn call_remote(&self, module: &str, name: &str, args: &[Value]) -> Result<Value, EvalError> {
        if let Some(builtin) = self.builtins.get(&format!("{module}.{name}")) {
            let mut ctx = CallCtx { interp: self };
            return builtin(args, &mut ctx);
        }
        Err(EvalError::UndefinedFunction(format!(
            "{module}.{name}/{}",
            args.len()
        )))
    }

    /// Apply a function value (anonymous fn or capture).
    pub fn call_value(&self, fun: &Value, args: &[Value]) -> Result<Value, EvalError> {
        let Value::Fun(fun) = fun else {
            return Err(EvalError::BadFunction(fun.inspect()));
        };
        match fun.as_ref() {
            FunValue::Anonymous { clauses, captured } => {
                let expected = clauses.first().map_or(0, |c| c.patterns.len());
                if expected != args.len() {
                    return Err(EvalError::BadArity(expected, args.len()));
                }
                let mut env = Bindings::default();
                for (name, value) in captured {
                    env.insert(name, value.clone());
                }
                self.eval_clauses(clauses, args, &env)?
                    .ok_or(EvalError::NoFunctionClause("fn".to_string(), args.len()))
            }
            FunValue::LocalCapture { name, arity } => {
                if *arity != args.len() {
                    return Err(EvalError::BadArity(*arity, args.len()));
                }
                self.call_local(name, args)
            }
            FunValue::RemoteCapture {
                module,
                name,
                arity,
            } => {
                if *arity != args.len() {
                    return Err(EvalError::BadArity(*arity, args.len()));
                }
                self.call_remote(module, name, args)
            }
        }
    }

    fn eval_piped(
        &self,
        piped: Value,
        right: &Node,
        env: &mut Bindings,
    ) -> Result<Value, EvalError> {
        match &right.form {
            Form::LocalCall { name, args } => {
                let mut full = vec![piped];
                full.extend(self.eval_args(args, env)?);
                self.call_local(name, &full)
            }
            Form::RemoteCall { module, name, args } => {
                let mut full = vec![piped];
                full.extend(self.eval_args(args, env)?);
                self.call_remote(&module.join("."), name, &full)
            }
            Form::Var(name) => self.call_local(name, &[piped]),
            _ => Err(EvalError::argument("argument error")),
        }
    }

    /// Structural pattern match. `bound` tracks names bound by this very
    /// pattern: a repeated name must match its earlier binding, while a
    /// name bound before the pattern is simply shadowed.
    fn match_pattern(
        &self,
        pattern: &Node,
        value: &Value,
        env: &mut Bindings,
        bound: &mut HashSet<String>,
    ) -> Result<bool, EvalError> {
        match &pattern.form {
            Form::Var(name) => {
                if name.starts_with('_') {
                    return Ok(true);
                }
                if bound.contains(name) {
                    return Ok(env.get(name) == Some(value));
                }
                bound.insert(name.clone());
                env.insert(name, value.clone());
                Ok(true)
            }
            Form::Int(n) => Ok(matches!(value, Value::Int(v) if v == n)),
            Form::Float(f) => Ok(matches!(value, Value::Float(v) if v == f)),
            Form::Bool(b) => Ok(matches!(value, Value::Bool(v) if v == b)),
            Form::Nil => Ok(matches!(value, Value::Nil)),
            Form::Atom(name) => Ok(&Value::atom(name) == value),
            Form::Str(parts) => {
                let mut text = String::new();
                for part in parts {
                    match part {
                        StrPart::Lit(lit) => text.push_str(lit),
                        StrPart::Interp(_) => return Ok(false),
                    }
                }
                Ok(value.as_str() == Some(text.as_str()))
            }
            Form::Tuple(items) => match value {
                Value::Tuple(values) if values.len() == items.len() => {
                    for (item, v) in items.iter().zip(values.iter()) {
                        if !self.match_pattern(item, v, env, bound)? {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                }
                _ => Ok(false),
            },
            Form::List(items) => match value {
                Value::List(values) if values.len() == items.len() => {
                    for (item, v) in items.iter().zip(values.iter()) {
                        if !self.match_pattern(item, v, env, bound)? {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                }
                _ => Ok(false),
            },
            Form::Cons { head, tail } => match value {
                Value::List(values) if values.len() >= head.len() => {
                    for (item, v) in head.iter().zip(values.iter()) {
                        if !self.match_pattern(item, v, env, bound)? {
                            return Ok(false);
                        }
                    }
                    let rest = Value::list(values[head.len()..].to_vec());
                    self.match_pattern(tail, &rest, env, bound)
                }
                _ => Ok(false),
            },
            Form::MapLit(entries) => match value {
                Value::Map(map) => {
                    for (key_node, value_pattern) in entries {
                        let key = self.literal_key(key_node)?;
                        match map.get(&key) {
                            Some(entry) => {
                                if !self.match_pattern(value_pattern, entry, env, bound)? {
                                    return Ok(false);
                                }
                            }
                            None => return Ok(false),
                        }
                    }
                    Ok(true)
                }
                _ => Ok(false),
            },
            Form::BinaryOp { op, left, right } if op == "<>" => {
                let Form::Str(parts) = &left.form else {
                    return Ok(false);
                };
                let mut prefix = String::new();
                for part in parts {
                    match part {
                        StrPart::Lit(lit) => prefix.push_str(lit),
                        StrPart::Interp(_) => return Ok(false),
                    }
                }
                match value.as_str().and_then(|s| s.strip_prefix(prefix.as_str())) {
                    Some(rest) => {
                        let rest = Value::string(rest);
                        self.match_pattern(right, &rest, env, bound)
                    }
                    None => Ok(false),
                }
            }
            Form::Bitstring(segments) => {
                // Only the trivial whole-binary shapes are matchable.
                match segments.as_slice() {
                    [single] => self.match_pattern(&single.value, value, env, bound),
                    _ => Ok(false),
                }
            }
            _ => Ok(false),
        }
    }

    fn literal_key(&self, node: &Node) -> Result<Value, EvalError> {
        match &node.form {
            Form::Int(n) => Ok(Value::Int(*n)),
            Form::Float(f) => Ok(Value::Float(*f)),
            Form::Bool(b) => Ok(Value::Bool(*b)),
            Form::Nil => Ok(Value::Nil),
            Form::Atom(name) => Ok(Value::atom(name)),
            Form::Str(parts) => {
                let mut text = String::new();
                for part in parts {
                    match part {
                        StrPart::Lit(lit) => text.push_str(lit),
                        StrPart::Interp(_) => {
                            return Err(EvalError::argument("argument error"));
                        }
                    }
                }
                Ok(Value::string(text))
            }
            _ => Err(EvalError::argument("argument error")),
        }
    }
}

/// Numeric-aware comparison used by the relational operators.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a.as_number(), b.as_number()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => a.cmp(b),
    }
}

fn eval_unary(op: &str, value: Value) -> Result<Value, EvalError> {
    match op {
        "-" => match value {
            Value::Int(n) => Ok(Value::Int(-n)),
            Value::Float(f) => Ok(Value::Float(-f)),
            _ => Err(EvalError::Arithmetic),
        },
        "+" => match value {
            Value::Int(_) | Value::Float(_) => Ok(value),
            _ => Err(EvalError::Arithmetic),
        },
        "not" => match value {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            _ => Err(EvalError::argument("argument error")),
        },
        _ => Err(EvalError::argument("argument error")),
    }
}

fn eval_binary(op: &str, lhs: Value, rhs: Value) -> Result<Value, EvalError> {
    match op {
        "+" | "-" | "*" => arith(op, &lhs, &rhs),
        "/" => {
            let (a, b) = match (lhs.as_number(), rhs.as_number()) {
                (Some(a), Some(b)) => (a, b),
                _ => return Err(EvalError::Arithmetic),
            };
            if b == 0.0 {
                return Err(EvalError::Arithmetic);
            }
            Ok(Value::Float(a / b))
        }
        "==" => Ok(Value::Bool(lhs.loose_eq(&rhs))),
        "!=" => Ok(Value::Bool(!lhs.loose_eq(&rhs))),
        "===" => Ok(Value::Bool(lhs == rhs)),
        "!==" => Ok(Value::Bool(lhs != rhs)),
        "<" => Ok(Value::Bool(compare_values(&lhs, &rhs) == Ordering::Less)),
        ">" => Ok(Value::Bool(compare_values(&lhs, &rhs) == Ordering::Greater)),
        "<=" => Ok(Value::Bool(compare_values(&lhs, &rhs) != Ordering::Greater)),
        ">=" => Ok(Value::Bool(compare_values(&lhs, &rhs) != Ordering::Less)),
        "<>" => match (&lhs, &rhs) {
            (Value::Str(a), Value::Str(b)) => Ok(Value::string(format!("{a}{b}"))),
            _ => Err(EvalError::argument(format!(
                "expected binaries in <>, got: {} and {}",
                lhs.inspect(),
                rhs.inspect()
            ))),
        },
        "++" => match (&lhs, &rhs) {
            (Value::List(a), Value::List(b)) => {
                let mut out = (**a).clone();
                out.extend(b.iter().cloned());
                Ok(Value::list(out))
            }
            _ => Err(EvalError::argument(format!(
                "expected lists in ++, got: {} and {}",
                lhs.inspect(),
                rhs.inspect()
            ))),
        },
        _ => Err(EvalError::argument("argument error")),
    }
}

fn arith(op: &str, lhs: &Value, rhs: &Value) -> Result<Value, EvalError> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => {
            let result = match op {
                "+" => a.checked_add(*b),
                "-" => a.checked_sub(*b),
                _ => a.checked_mul(*b),
            };
            result.map(Value::Int).ok_or(EvalError::Arithmetic)
        }
        _ => {
            let (a, b) = match (lhs.as_number(), rhs.as_number()) {
                (Some(a), Some(b)) => (a, b),
                _ => return Err(EvalError::Arithmetic),
            };
            let result = match op {
                "+" => a + b,
                "-" => a - b,
                _ => a * b,
            };
            Ok(Value::Float(result))
        }
    }
}

fn field_access(target: &Value, field: &str) -> Result<Value, EvalError> {
    match target {
        Value::Map(map) => map
            .get(&Value::atom(field))
            .cloned()
            .ok_or_else(|| EvalError::KeyError(format!(":{field}"))),
        Value::Date(d) => {
            use chrono::Datelike;
            match field {
                "year" => Ok(Value::Int(i64::from(d.year()))),
                "month" => Ok(Value::Int(i64::from(d.month()))),
                "day" => Ok(Value::Int(i64::from(d.day()))),
                _ => Err(EvalError::KeyError(format!(":{field}"))),
            }
        }
        Value::Time(t) => {
            use chrono::Timelike;
            match field {
                "hour" => Ok(Value::Int(i64::from(t.hour()))),
                "minute" => Ok(Value::Int(i64::from(t.minute()))),
                "second" => Ok(Value::Int(i64::from(t.second()))),
                _ => Err(EvalError::KeyError(format!(":{field}"))),
            }
        }
        other => Err(EvalError::argument(format!(
            "expected a map, got: {}",
            other.inspect()
        ))),
    }
}

fn eval_sigil(letter: char, body: &str, modifiers: &str) -> Result<Value, EvalError> {
    match letter {
        'r' | 'R' => {
            let mut builder = RegexBuilder::new(body);
            builder
                .case_insensitive(modifiers.contains('i'))
                .multi_line(modifiers.contains('m'))
                .dot_matches_new_line(modifiers.contains('s'));
            builder
                .build()
                .map(|re| Value::Regex(Arc::new(re)))
                .map_err(|e| EvalError::argument(format!("invalid regex: {e}")))
        }
        's' | 'S' => Ok(Value::string(body)),
        'w' => {
            let items: Vec<Value> = if modifiers.contains('a') {
                body.split_whitespace().map(Value::atom).collect()
            } else {
                body.split_whitespace().map(Value::string).collect()
            };
            Ok(Value::list(items))
        }
        'c' | 'C' => Ok(Value::list(
            body.chars().map(|c| Value::Int(i64::from(c as u32))).collect(),
        )),
        'D' => NaiveDate::parse_from_str(body, "%Y-%m-%d")
            .map(Value::Date)
            .map_err(|_| EvalError::argument(format!("invalid date: {body}"))),
        'T' => NaiveTime::parse_from_str(body, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(body, "%H:%M:%S%.f"))
            .map(Value::Time)
            .map_err(|_| EvalError::argument(format!("invalid time: {body}"))),
        'N' => NaiveDateTime::parse_from_str(body, "%Y-%m-%d %H:%M:%S")
            .or_else(|_| NaiveDateTime::parse_from_str(body, "%Y-%m-%dT%H:%M:%S"))
            .map(Value::NaiveDateTime)
            .map_err(|_| EvalError::argument(format!("invalid naive datetime: {body}"))),
        'U' => DateTime::parse_from_rfc3339(body)
            .map(|dt| Value::DateTime(dt.with_timezone(&Utc)))
            .map_err(|_| EvalError::argument(format!("invalid datetime: {body}"))),
        _ => Err(EvalError::argument(format!("unsupported sigil: ~{letter}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::shape::validate_shape;

    fn unit_for(source: &str) -> ModuleUnit {
        let root = parse(source).expect("parse");
        let shape = validate_shape(&root).expect("shape");
        let mut unit = ModuleUnit::compile("Sandbox", 0, &shape);
        let builtins = Builtins::standard();
        let constants: Vec<(String, Value)> = shape
            .attributes
            .iter()
            .map(|(name, node)| {
                let interp = Interp::new(&unit, &builtins);
                ((*name).to_string(), interp.eval_constant(node).expect("attr"))
            })
            .collect();
        for (name, value) in constants {
            unit.set_attribute(&name, value);
        }
        unit
    }

    fn run(source: &str, fun: &str, args: &[Value]) -> Result<Value, EvalError> {
        let unit = unit_for(source);
        let builtins = Builtins::standard();
        Interp::new(&unit, &builtins).invoke(fun, args)
    }

    #[test]
    fn integer_arithmetic_stays_integer() {
        let v = run(
            "defmodule Sandbox do\n  def f(a, b), do: a * b + 1\nend",
            "f",
            &[Value::Int(3), Value::Int(4)],
        )
        .unwrap();
        assert_eq!(v, Value::Int(13));
    }

    #[test]
    fn division_is_float_and_by_zero_raises() {
        let v = run(
            "defmodule Sandbox do\n  def f(a, b), do: a / b\nend",
            "f",
            &[Value::Int(1), Value::Int(2)],
        )
        .unwrap();
        assert_eq!(v, Value::Float(0.5));
        let err = run(
            "defmodule Sandbox do\n  def f(a, b), do: a / b\nend",
            "f",
            &[Value::Int(1), Value::Int(0)],
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "bad argument in arithmetic expression");
    }

    #[test]
    fn multi_clause_dispatch_with_guards() {
        let source = "defmodule Sandbox do
  def kind(n) when is_integer(n), do: :int
  def kind(n) when is_float(n), do: :float
  def kind(_), do: :other
end";
        assert_eq!(run(source, "kind", &[Value::Int(1)]).unwrap(), Value::atom("int"));
        assert_eq!(
            run(source, "kind", &[Value::Float(1.5)]).unwrap(),
            Value::atom("float")
        );
        assert_eq!(
            run(source, "kind", &[Value::string("x")]).unwrap(),
            Value::atom("other")
        );
    }

    #[test]
    fn case_matches_tuples_and_binds() {
        let source = "defmodule Sandbox do
  def f(t) do
    case t do
      {:ok, v} -> v
      {:error, _} -> nil
    end
  end
end";
        let v = run(
            source,
            "f",
            &[Value::tuple(vec![Value::atom("ok"), Value::Int(7)])],
        )
        .unwrap();
        assert_eq!(v, Value::Int(7));
        let err = run(source, "f", &[Value::Int(1)]).unwrap_err();
        assert!(err.to_string().contains("no case clause matching: 1"));
    }

    #[test]
    fn string_interpolation_renders_values() {
        let source = "defmodule Sandbox do\n  def f(n), do: \"n = #{n + 1}\"\nend";
        let v = run(source, "f", &[Value::Int(41)]).unwrap();
        assert_eq!(v, Value::string("n = 42"));
    }

    #[test]
    fn anonymous_functions_close_over_locals() {
        let source = "defmodule Sandbox do
  def f(x) do
    base = 10
    add = fn n -> n + base end
    add.(x)
  end
end";
        let v = run(source, "f", &[Value::Int(5)]).unwrap();
        assert_eq!(v, Value::Int(15));
    }

    #[test]
    fn pipes_thread_first_argument() {
        let source =
            "defmodule Sandbox do\n  def f(s), do: s |> String.trim() |> String.upcase()\nend";
        let v = run(source, "f", &[Value::string("  hi  ")]).unwrap();
        assert_eq!(v, Value::string("HI"));
    }

    #[test]
    fn map_update_requires_existing_key() {
        let source = "defmodule Sandbox do\n  def f(m), do: %{m | a: 2}\nend";
        let mut entries = BTreeMap::new();
        entries.insert(Value::atom("a"), Value::Int(1));
        let v = run(source, "f", &[Value::map(entries)]).unwrap();
        let Value::Map(m) = v else { panic!("expected map") };
        assert_eq!(m.get(&Value::atom("a")), Some(&Value::Int(2)));
        let err = run(source, "f", &[Value::map(BTreeMap::new())]).unwrap_err();
        assert!(err.to_string().contains("key :a not found"));
    }

    #[test]
    fn match_failure_raises() {
        let source = "defmodule Sandbox do\n  def f(t) do\n    {:ok, v} = t\n    v\n  end\nend";
        let err = run(source, "f", &[Value::atom("error")]).unwrap_err();
        assert!(err
            .to_string()
            .contains("no match of right hand side value: :error"));
    }

    #[test]
    fn repeated_pattern_variable_must_agree() {
        let source = "defmodule Sandbox do
  def f(t) do
    case t do
      {x, x} -> :same
      _ -> :different
    end
  end
end";
        let same = run(
            source,
            "f",
            &[Value::tuple(vec![Value::Int(1), Value::Int(1)])],
        )
        .unwrap();
        assert_eq!(same, Value::atom("same"));
        let diff = run(
            source,
            "f",
            &[Value::tuple(vec![Value::Int(1), Value::Int(2)])],
        )
        .unwrap();
        assert_eq!(diff, Value::atom("different"));
    }

    #[test]
    fn with_falls_through_to_else() {
        let source = "defmodule Sandbox do
  def f(m) do
    with {:ok, v} <- Map.fetch(m, :k) do
      v
    else
      :error -> :missing
    end
  end
end";
        let mut entries = BTreeMap::new();
        entries.insert(Value::atom("k"), Value::Int(9));
        assert_eq!(run(source, "f", &[Value::map(entries)]).unwrap(), Value::Int(9));
        assert_eq!(
            run(source, "f", &[Value::map(BTreeMap::new())]).unwrap(),
            Value::atom("missing")
        );
    }

    #[test]
    fn sigils_produce_values() {
        let source = "defmodule Sandbox do\n  def f(), do: {~w(a b c), ~D[2024-06-01]}\nend";
        let v = run(source, "f", &[]).unwrap();
        let Value::Tuple(items) = v else { panic!("expected tuple") };
        assert_eq!(
            items[0],
            Value::list(vec![
                Value::string("a"),
                Value::string("b"),
                Value::string("c")
            ])
        );
        assert!(matches!(items[1], Value::Date(_)));
    }

    #[test]
    fn attribute_constants_resolve() {
        let source = "defmodule Sandbox do\n  @rate 2\n  def f(x), do: x * @rate\nend";
        assert_eq!(run(source, "f", &[Value::Int(5)]).unwrap(), Value::Int(10));
    }

    #[test]
    fn cond_picks_first_truthy_branch() {
        let source = "defmodule Sandbox do
  def f(n) do
    cond do
      n > 10 -> :big
      n > 5 -> :medium
      true -> :small
    end
  end
end";
        assert_eq!(run(source, "f", &[Value::Int(20)]).unwrap(), Value::atom("big"));
        assert_eq!(run(source, "f", &[Value::Int(7)]).unwrap(), Value::atom("medium"));
        assert_eq!(run(source, "f", &[Value::Int(1)]).unwrap(), Value::atom("small"));
    }

    #[test]
    fn comparison_is_numeric_across_kinds() {
        let source = "defmodule Sandbox do\n  def f(a, b), do: {a < b, a == b}\nend";
        let v = run(source, "f", &[Value::Int(1), Value::Float(1.0)]).unwrap();
        assert_eq!(
            v,
            Value::tuple(vec![Value::Bool(false), Value::Bool(true)])
        );
    }
}
