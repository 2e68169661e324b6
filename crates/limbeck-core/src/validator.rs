//! The whitelist validator: a single post-order walk over every function
//! body, threading a scope of formal parameters and locally bound names.
//!
//! Every function clause in the module is validated (entry first), not just
//! the requested one — the entry may call a sibling `def`, and nothing
//! unvalidated may reach the runtime.

use crate::ast::{Clause, Form, FunDef, Node, StrPart};
use crate::error::{ErrorKind, SandboxError};
use crate::shape::ModuleShape;
use crate::whitelist::Whitelist;
use std::collections::HashSet;

/// Validate attribute values and every function body of the module.
pub fn validate_module(
    shape: &ModuleShape<'_>,
    entry: &FunDef,
    whitelist: &Whitelist,
) -> Result<(), SandboxError> {
    let walker = Walker {
        whitelist,
        local_defs: shape
            .defined_heads()
            .map(|(name, arity)| (name.to_string(), arity))
            .collect(),
        attributes: shape
            .attributes
            .iter()
            .map(|(name, _)| (*name).to_string())
            .collect(),
    };
    for (_, value) in &shape.attributes {
        let mut scope = Scope::empty();
        walker.expr(value, &mut scope, false)?;
    }
    walker.function(entry)?;
    for fun in &shape.defs {
        if std::ptr::eq(*fun, entry) {
            continue;
        }
        walker.function(fun)?;
    }
    Ok(())
}

struct Scope {
    params: HashSet<String>,
    locals: HashSet<String>,
}

impl Scope {
    fn empty() -> Self {
        Self {
            params: HashSet::new(),
            locals: HashSet::new(),
        }
    }

    fn is_bound(&self, name: &str) -> bool {
        self.params.contains(name) || self.locals.contains(name)
    }
}

struct Walker<'a> {
    whitelist: &'a Whitelist,
    local_defs: HashSet<(String, usize)>,
    attributes: HashSet<String>,
}

impl Walker<'_> {
    fn function(&self, fun: &FunDef) -> Result<(), SandboxError> {
        let mut names = Vec::new();
        for param in &fun.params {
            self.pattern(param, &mut names)?;
        }
        let mut scope = Scope {
            params: names.into_iter().map(|(name, _)| name).collect(),
            locals: HashSet::new(),
        };
        if let Some(guard) = &fun.guard {
            self.expr(guard, &mut scope, true)?;
        }
        for stmt in &fun.body {
            self.expr(stmt, &mut scope, false)?;
        }
        Ok(())
    }

    fn forbidden(&self, node: &Node) -> SandboxError {
        SandboxError::at_line(ErrorKind::Whitelist, "Forbidden expression", node.line())
    }

    fn expr(&self, node: &Node, scope: &mut Scope, in_guard: bool) -> Result<(), SandboxError> {
        match &node.form {
            Form::Int(_) | Form::Float(_) | Form::Bool(_) | Form::Nil | Form::Atom(_) => Ok(()),
            Form::Str(parts) => {
                for part in parts {
                    if let StrPart::Interp(inner) = part {
                        self.expr(inner, scope, in_guard)?;
                    }
                }
                Ok(())
            }
            Form::Var(name) => {
                if scope.is_bound(name) {
                    return Ok(());
                }
                // Paren-less recursion into a zero-arity sibling.
                if !in_guard && self.local_defs.contains(&(name.clone(), 0)) {
                    return Ok(());
                }
                Err(SandboxError::at_line(
                    ErrorKind::Whitelist,
                    format!("Undefined variable {name}"),
                    node.line(),
                ))
            }
            Form::AttrRef(name) => {
                if self.attributes.contains(name) {
                    Ok(())
                } else {
                    Err(SandboxError::at_line(
                        ErrorKind::Whitelist,
                        format!("Undefined module attribute @{name}"),
                        node.line(),
                    ))
                }
            }
            Form::UnaryOp { op, operand } => {
                if !self.whitelist.operator_allowed(op) {
                    return Err(self.forbidden(node));
                }
                self.expr(operand, scope, in_guard)
            }
            Form::BinaryOp { op, left, right } => {
                if !self.whitelist.operator_allowed(op) {
                    return Err(self.forbidden(node));
                }
                self.expr(left, scope, in_guard)?;
                self.expr(right, scope, in_guard)
            }
            Form::Match { pattern, value } => {
                if in_guard {
                    return Err(self.forbidden(node));
                }
                self.expr(value, scope, false)?;
                let mut names = Vec::new();
                self.pattern(pattern, &mut names)?;
                for (name, line) in &names {
                    if scope.params.contains(name) {
                        return Err(SandboxError::at_line(
                            ErrorKind::Whitelist,
                            format!("Cannot assign to function parameter {name}"),
                            *line,
                        ));
                    }
                }
                scope.locals.extend(names.into_iter().map(|(name, _)| name));
                Ok(())
            }
            Form::Pipe { left, right } => {
                if in_guard {
                    return Err(self.forbidden(node));
                }
                self.expr(left, scope, false)?;
                self.piped_call(right, scope)
            }
            Form::When { pattern, guard } => {
                let mut names = Vec::new();
                self.pattern(pattern, &mut names)?;
                self.expr(guard, scope, true)
            }
            Form::List(items) | Form::Tuple(items) => {
                for item in items {
                    self.expr(item, scope, in_guard)?;
                }
                Ok(())
            }
            Form::Cons { head, tail } => {
                for item in head {
                    self.expr(item, scope, in_guard)?;
                }
                self.expr(tail, scope, in_guard)
            }
            Form::MapLit(entries) => {
                for (key, value) in entries {
                    self.expr(key, scope, in_guard)?;
                    self.expr(value, scope, in_guard)?;
                }
                Ok(())
            }
            Form::MapUpdate { base, entries } => {
                self.expr(base, scope, in_guard)?;
                for (key, value) in entries {
                    self.expr(key, scope, in_guard)?;
                    self.expr(value, scope, in_guard)?;
                }
                Ok(())
            }
            Form::Bitstring(segments) => {
                for segment in segments {
                    self.expr(&segment.value, scope, in_guard)?;
                    if let Some(spec) = &segment.spec {
                        if !self.bit_spec_ok(spec) {
                            return Err(self.forbidden(&segment.value));
                        }
                    }
                }
                Ok(())
            }
            Form::Sigil { letter, .. } => {
                if self.whitelist.sigil_allowed(*letter) && !in_guard {
                    Ok(())
                } else {
                    Err(self.forbidden(node))
                }
            }
            Form::Block(stmts) => {
                if in_guard {
                    return Err(self.forbidden(node));
                }
                for stmt in stmts {
                    self.expr(stmt, scope, false)?;
                }
                Ok(())
            }
            Form::Case { subject, clauses } => {
                if in_guard {
                    return Err(self.forbidden(node));
                }
                self.expr(subject, scope, false)?;
                for clause in clauses {
                    self.clause(clause, scope)?;
                }
                Ok(())
            }
            Form::Cond { clauses } => {
                if in_guard {
                    return Err(self.forbidden(node));
                }
                for clause in clauses {
                    for condition in &clause.patterns {
                        self.expr(condition, scope, false)?;
                    }
                    let saved = scope.locals.clone();
                    for stmt in &clause.body {
                        self.expr(stmt, scope, false)?;
                    }
                    scope.locals = saved;
                }
                Ok(())
            }
            Form::With {
                entries,
                body,
                else_clauses,
            } => {
                if in_guard {
                    return Err(self.forbidden(node));
                }
                let saved = scope.locals.clone();
                for entry in entries {
                    match &entry.form {
                        Form::WithBind { pattern, value } => {
                            self.expr(value, scope, false)?;
                            let mut names = Vec::new();
                            self.pattern(pattern, &mut names)?;
                            scope
                                .locals
                                .extend(names.into_iter().map(|(name, _)| name));
                        }
                        _ => self.expr(entry, scope, false)?,
                    }
                }
                for stmt in body {
                    self.expr(stmt, scope, false)?;
                }
                scope.locals = saved;
                for clause in else_clauses {
                    self.clause(clause, scope)?;
                }
                Ok(())
            }
            Form::WithBind { .. } => Err(self.forbidden(node)),
            Form::Fn { clauses } => {
                if in_guard {
                    return Err(self.forbidden(node));
                }
                for clause in clauses {
                    self.clause(clause, scope)?;
                }
                Ok(())
            }
            Form::LocalCall { name, args } => {
                self.local_call(node, name, args.len(), in_guard)?;
                for arg in args {
                    self.expr(arg, scope, in_guard)?;
                }
                Ok(())
            }
            Form::RemoteCall { module, name, args } => {
                self.remote_call(node, module, name, args.len(), in_guard)?;
                for arg in args {
                    self.expr(arg, scope, in_guard)?;
                }
                Ok(())
            }
            Form::AnonCall { target, args } => {
                if in_guard {
                    return Err(self.forbidden(node));
                }
                self.expr(target, scope, false)?;
                for arg in args {
                    self.expr(arg, scope, false)?;
                }
                Ok(())
            }
            Form::FieldAccess { target, .. } => self.expr(target, scope, in_guard),
            Form::IndexAccess { target, index } => {
                if !self.whitelist.module_call_allowed("Access", "get", 2) {
                    return Err(SandboxError::at_line(
                        ErrorKind::Whitelist,
                        "Forbidden function: Access.get",
                        node.line(),
                    ));
                }
                self.expr(target, scope, in_guard)?;
                self.expr(index, scope, in_guard)
            }
            Form::CaptureLocal { name, arity } => {
                if in_guard {
                    return Err(self.forbidden(node));
                }
                self.local_call(node, name, *arity, false)
            }
            Form::CaptureRemote {
                module,
                name,
                arity,
            } => {
                if in_guard {
                    return Err(self.forbidden(node));
                }
                self.remote_call(node, module, name, *arity, false)
            }
            Form::Def(_) | Form::Defmodule { .. } => Err(SandboxError::at_line(
                ErrorKind::Whitelist,
                "defmodule/def inside function body is not allowed",
                node.line(),
            )),
            Form::ModuleRef(_) | Form::Attribute { .. } | Form::Directive { .. } => {
                Err(self.forbidden(node))
            }
        }
    }

    /// Case/fn/else clause: patterns bind names scoped to the clause body.
    fn clause(&self, clause: &Clause, scope: &mut Scope) -> Result<(), SandboxError> {
        let saved = scope.locals.clone();
        let mut names = Vec::new();
        for pattern in &clause.patterns {
            self.pattern(pattern, &mut names)?;
        }
        scope.locals.extend(names.into_iter().map(|(name, _)| name));
        if let Some(guard) = &clause.guard {
            self.expr(guard, scope, true)?;
        }
        for stmt in &clause.body {
            self.expr(stmt, scope, false)?;
        }
        scope.locals = saved;
        Ok(())
    }

    fn local_call(
        &self,
        node: &Node,
        name: &str,
        arity: usize,
        in_guard: bool,
    ) -> Result<(), SandboxError> {
        if in_guard {
            if self.whitelist.guard_allowed(name, arity) {
                return Ok(());
            }
        } else if self.local_defs.contains(&(name.to_string(), arity))
            || self.whitelist.kernel_allowed(name, arity)
        {
            return Ok(());
        }
        Err(SandboxError::at_line(
            ErrorKind::Whitelist,
            format!("Forbidden function: {name}/{arity}"),
            node.line(),
        ))
    }

    fn remote_call(
        &self,
        node: &Node,
        module: &[String],
        name: &str,
        arity: usize,
        in_guard: bool,
    ) -> Result<(), SandboxError> {
        let path = module.join(".");
        if !in_guard && self.whitelist.module_call_allowed(&path, name, arity) {
            return Ok(());
        }
        Err(SandboxError::at_line(
            ErrorKind::Whitelist,
            format!("Forbidden function: {path}.{name}"),
            node.line(),
        ))
    }

    /// `a |> f(b)` resolves as `f/(len(b)+1)` before table lookup.
    fn piped_call(&self, right: &Node, scope: &mut Scope) -> Result<(), SandboxError> {
        match &right.form {
            Form::LocalCall { name, args } => {
                self.local_call(right, name, args.len() + 1, false)?;
                for arg in args {
                    self.expr(arg, scope, false)?;
                }
                Ok(())
            }
            Form::RemoteCall { module, name, args } => {
                self.remote_call(right, module, name, args.len() + 1, false)?;
                for arg in args {
                    self.expr(arg, scope, false)?;
                }
                Ok(())
            }
            Form::Var(name) => self.local_call(right, name, 1, false),
            _ => Err(self.forbidden(right)),
        }
    }

    fn bit_spec_ok(&self, spec: &str) -> bool {
        spec.split('-').all(|part| {
            let atom = part.split('(').next().unwrap_or(part);
            let atom = atom.trim();
            atom.parse::<u32>().is_ok() || self.whitelist.bit_spec_allowed(atom)
        })
    }

    /// Validate a pattern and collect the names it binds. Underscore and
    /// underscore-prefixed names are wildcards and bind nothing tracked.
    fn pattern(&self, node: &Node, names: &mut Vec<(String, u32)>) -> Result<(), SandboxError> {
        match &node.form {
            Form::Var(name) => {
                if !name.starts_with('_') {
                    names.push((name.clone(), node.line()));
                }
                Ok(())
            }
            Form::Int(_) | Form::Float(_) | Form::Bool(_) | Form::Nil | Form::Atom(_) => Ok(()),
            Form::Str(parts) => {
                if parts.iter().any(|p| matches!(p, StrPart::Interp(_))) {
                    Err(self.forbidden(node))
                } else {
                    Ok(())
                }
            }
            Form::List(items) | Form::Tuple(items) => {
                for item in items {
                    self.pattern(item, names)?;
                }
                Ok(())
            }
            Form::Cons { head, tail } => {
                for item in head {
                    self.pattern(item, names)?;
                }
                self.pattern(tail, names)
            }
            Form::MapLit(entries) => {
                for (key, value) in entries {
                    match &key.form {
                        Form::Int(_)
                        | Form::Float(_)
                        | Form::Bool(_)
                        | Form::Nil
                        | Form::Atom(_)
                        | Form::Str(_) => {}
                        _ => return Err(self.forbidden(key)),
                    }
                    self.pattern(value, names)?;
                }
                Ok(())
            }
            // `"prefix" <> rest` binary prefix match.
            Form::BinaryOp { op, left, right } if op == "<>" => {
                match &left.form {
                    Form::Str(parts)
                        if !parts.iter().any(|p| matches!(p, StrPart::Interp(_))) => {}
                    _ => return Err(self.forbidden(left)),
                }
                self.pattern(right, names)
            }
            Form::Bitstring(segments) => {
                for segment in segments {
                    self.pattern(&segment.value, names)?;
                }
                Ok(())
            }
            _ => Err(self.forbidden(node)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::shape::{resolve_entry, validate_shape};

    fn validate(source: &str, function: &str, arity: usize) -> Result<(), SandboxError> {
        let root = parse(source)?;
        let shape = validate_shape(&root)?;
        let entry = resolve_entry(&shape, "Sandbox", function, arity)?;
        validate_module(&shape, entry, &Whitelist::standard())
    }

    fn wrap(body: &str) -> String {
        format!("defmodule Sandbox do\n  def run(a, b) do\n    {body}\n  end\nend")
    }

    fn validate_body(body: &str) -> Result<(), SandboxError> {
        validate(&wrap(body), "run", 2)
    }

    #[test]
    fn admits_arithmetic_and_locals() {
        assert!(validate_body("x = a * 2\n    x + b").is_ok());
    }

    #[test]
    fn rejects_forbidden_remote_call() {
        let err = validate_body("File.read!(a)").unwrap_err();
        assert!(err.to_string().contains("Forbidden function: File.read!"));
    }

    #[test]
    fn rejects_forbidden_local_call() {
        let err = validate_body("spawn(a)").unwrap_err();
        assert!(err.to_string().contains("Forbidden function: spawn/1"));
    }

    #[test]
    fn rejects_parameter_reassignment() {
        let err = validate_body("a = a + 1\n    a").unwrap_err();
        assert!(err
            .to_string()
            .contains("Cannot assign to function parameter a"));
        assert!(err.to_string().starts_with("Line 3:"));
    }

    #[test]
    fn rejects_parameter_rebind_inside_destructuring() {
        let err = validate_body("{x, b} = {1, 2}\n    x").unwrap_err();
        assert!(err
            .to_string()
            .contains("Cannot assign to function parameter b"));
    }

    #[test]
    fn locals_may_rebind() {
        assert!(validate_body("x = 1\n    x = x + 1\n    x").is_ok());
    }

    #[test]
    fn rejects_undefined_variable() {
        let err = validate_body("missing + 1").unwrap_err();
        assert!(err.to_string().contains("Undefined variable missing"));
    }

    #[test]
    fn admits_denylisted_module_other_functions() {
        assert!(validate_body("String.upcase(to_string(a))").is_ok());
        let err = validate_body("String.to_atom(\"x\")").unwrap_err();
        assert!(err
            .to_string()
            .contains("Forbidden function: String.to_atom"));
    }

    #[test]
    fn pipe_resolves_with_extra_argument() {
        assert!(validate_body("a |> String.upcase()").is_ok());
        assert!(validate_body("a |> String.slice(0, 3)").is_ok());
        let err = validate_body("a |> File.write(b)").unwrap_err();
        assert!(err.to_string().contains("Forbidden function: File.write"));
    }

    #[test]
    fn rejects_forbidden_operator() {
        let err = validate_body("a in b").unwrap_err();
        assert!(err.to_string().contains("Forbidden expression"));
        let err = validate_body("a =~ ~r/x/").unwrap_err();
        assert!(err.to_string().contains("Forbidden expression"));
    }

    #[test]
    fn rejects_disallowed_sigil() {
        let err = validate_body("~H(markup)").unwrap_err();
        assert!(err.to_string().contains("Forbidden expression"));
        assert!(validate_body("~r/ab/ ").is_ok());
        assert!(validate_body("~w(one two)").is_ok());
    }

    #[test]
    fn case_clause_bindings_are_scoped() {
        let source = "defmodule Sandbox do
  def run(a, b) do
    case a do
      {:ok, v} -> v + b
      _ -> 0
    end
  end
end";
        assert!(validate(source, "run", 2).is_ok());
    }

    #[test]
    fn guard_calls_must_be_guard_safe() {
        let ok = "defmodule Sandbox do
  def run(a, b) do
    case a do
      x when is_integer(x) -> x + b
      _ -> 0
    end
  end
end";
        assert!(validate(ok, "run", 2).is_ok());
        let bad = "defmodule Sandbox do
  def run(a, b) do
    case a do
      x when String.length(x) > b -> 1
      _ -> 0
    end
  end
end";
        let err = validate(bad, "run", 2).unwrap_err();
        assert!(err
            .to_string()
            .contains("Forbidden function: String.length"));
    }

    #[test]
    fn def_guards_are_validated() {
        let source = "defmodule Sandbox do
  def run(a, b) when is_number(a), do: a + b
end";
        assert!(validate(source, "run", 2).is_ok());
    }

    #[test]
    fn rejects_nested_def_in_body() {
        let source = "defmodule Sandbox do
  def run(a, b) do
    def inner(x), do: x
    a + b
  end
end";
        let err = validate(source, "run", 2).unwrap_err();
        assert!(err
            .to_string()
            .contains("defmodule/def inside function body is not allowed"));
    }

    #[test]
    fn local_recursion_is_admitted() {
        let source = "defmodule Sandbox do
  def run(n) do
    case n do
      0 -> 0
      _ -> run(n - 1)
    end
  end
end";
        assert!(validate(source, "run", 1).is_ok());
    }

    #[test]
    fn sibling_function_bodies_are_validated_too() {
        let source = "defmodule Sandbox do
  def run(a, b), do: helper(a) + b
  defp helper(x), do: File.read!(x)
end";
        let err = validate(source, "run", 2).unwrap_err();
        assert!(err.to_string().contains("Forbidden function: File.read!"));
    }

    #[test]
    fn captures_resolve_against_tables() {
        assert!(validate_body("Enum.map(a, &String.upcase/1)").is_ok());
        let err = validate_body("Enum.map(a, &File.rm/1)").unwrap_err();
        assert!(err.to_string().contains("Forbidden function: File.rm"));
        let source = "defmodule Sandbox do
  def run(l), do: Enum.map(l, &double/1)
  defp double(x), do: x * 2
end";
        assert!(validate(source, "run", 1).is_ok());
    }

    #[test]
    fn anonymous_functions_and_calls() {
        assert!(validate_body("f = fn x -> x * 2 end\n    f.(a) + b").is_ok());
    }

    #[test]
    fn index_access_is_access_get() {
        assert!(validate_body("a[:key]").is_ok());
    }

    #[test]
    fn attribute_reads_require_declaration() {
        let source = "defmodule Sandbox do
  @rate 2
  def run(a, b), do: a * @rate + b
end";
        assert!(validate(source, "run", 2).is_ok());
        let bad = "defmodule Sandbox do
  def run(a, b), do: a * @rate + b
end";
        let err = validate(bad, "run", 2).unwrap_err();
        assert!(err.to_string().contains("Undefined module attribute @rate"));
    }

    #[test]
    fn attribute_values_are_validated() {
        let source = "defmodule Sandbox do
  @paths File.ls!(\".\")
  def run(a, b), do: a + b
end";
        let err = validate(source, "run", 2).unwrap_err();
        assert!(err.to_string().contains("Forbidden function: File.ls!"));
    }

    #[test]
    fn validation_is_idempotent() {
        let source = wrap("File.read!(a)");
        let first = validate(&source, "run", 2).unwrap_err();
        let second = validate(&source, "run", 2).unwrap_err();
        assert_eq!(first, second);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        /// Arbitrary expression over the whitelisted arithmetic surface,
        /// optionally seeded with one forbidden call.
        fn arith_expr(depth: u32) -> BoxedStrategy<String> {
            let leaf = prop_oneof![
                Just("a".to_string()),
                Just("b".to_string()),
                (0i64..100).prop_map(|n| n.to_string()),
            ];
            leaf.prop_recursive(depth, 32, 2, |inner| {
                (inner.clone(), prop_oneof![Just("+"), Just("*"), Just("-")], inner)
                    .prop_map(|(l, op, r)| format!("({l} {op} {r})"))
            })
            .boxed()
        }

        proptest! {
            #[test]
            fn admitted_iff_no_forbidden_call(expr in arith_expr(3), poison in any::<bool>()) {
                let body = if poison {
                    format!("{expr} + File.stat(a)")
                } else {
                    expr
                };
                let result = validate_body(&body);
                if poison {
                    let err = result.unwrap_err();
                    prop_assert!(err.to_string().contains("Forbidden function: File.stat"));
                } else {
                    prop_assert!(result.is_ok());
                }
            }

            #[test]
            fn verdicts_are_stable(expr in arith_expr(3)) {
                let first = validate_body(&expr).map_err(|e| e.to_string());
                let second = validate_body(&expr).map_err(|e| e.to_string());
                prop_assert_eq!(first, second);
            }
        }
    }
}
