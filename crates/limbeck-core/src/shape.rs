//! Module-shape validation and entry-point resolution.
//!
//! The shape pass proves the AST is exactly one module whose body holds
//! nothing but function definitions and attribute declarations. The
//! matcher then locates the caller's `function/arity` without looking at
//! any body; bodies belong to the whitelist validator.

use crate::ast::{DefKind, DirectiveKind, Form, FunDef, Node};
use crate::error::{ErrorKind, SandboxError};

/// Validated module surface.
#[derive(Debug)]
pub struct ModuleShape<'a> {
    pub name: String,
    pub attributes: Vec<(&'a str, &'a Node)>,
    pub defs: Vec<&'a FunDef>,
}

impl ModuleShape<'_> {
    /// All `def`/`defp` heads, for local-call resolution.
    pub fn defined_heads(&self) -> impl Iterator<Item = (&str, usize)> {
        self.defs.iter().map(|fun| (fun.name.as_str(), fun.arity()))
    }
}

/// Enforce the top-level shape rules. The first offending statement halts
/// with its line number.
pub fn validate_shape(root: &Node) -> Result<ModuleShape<'_>, SandboxError> {
    let (name, body) = match &root.form {
        Form::Defmodule { name, body } => (name, body),
        _ => {
            return Err(SandboxError::at_line(
                ErrorKind::Shape,
                "Expected a single module definition",
                root.line(),
            ));
        }
    };
    let mut attributes = Vec::new();
    let mut defs = Vec::new();
    for stmt in body {
        match &stmt.form {
            Form::Def(fun) => defs.push(fun.as_ref()),
            Form::Attribute { name, value } => attributes.push((name.as_str(), value.as_ref())),
            Form::Defmodule { .. } => {
                return Err(SandboxError::at_line(
                    ErrorKind::Shape,
                    "Nested modules are not allowed",
                    stmt.line(),
                ));
            }
            Form::Directive { kind } => {
                let message = match kind {
                    DirectiveKind::Alias => "Module aliases are not allowed",
                    DirectiveKind::Import => "Module imports are not allowed",
                    DirectiveKind::Require => "Module requires are not allowed",
                    DirectiveKind::Use => "Module use is not allowed",
                };
                return Err(SandboxError::at_line(ErrorKind::Shape, message, stmt.line()));
            }
            _ => {
                return Err(SandboxError::at_line(
                    ErrorKind::Shape,
                    "Immediate code execution in modules is not allowed",
                    stmt.line(),
                ));
            }
        }
    }
    Ok(ModuleShape {
        name: Form::join_module_path(name),
        attributes,
        defs,
    })
}

/// Locate the requested entry function. Only public `def`s are callable
/// from outside; `defp` stays reachable through local calls.
pub fn resolve_entry<'a>(
    shape: &ModuleShape<'a>,
    module_id: &str,
    function_id: &str,
    arity: usize,
) -> Result<&'a FunDef, SandboxError> {
    if shape.name != module_id {
        return Err(SandboxError::new(
            ErrorKind::NameResolution,
            format!(
                "Module name mismatch. Expected {module_id}, got {}",
                shape.name
            ),
        ));
    }
    let public: Vec<&'a FunDef> = shape
        .defs
        .iter()
        .filter(|fun| fun.kind == DefKind::Def)
        .copied()
        .collect();
    if let Some(fun) = public
        .iter()
        .find(|fun| fun.name == function_id && fun.arity() == arity)
    {
        return Ok(*fun);
    }
    let mut message = format!("Function {function_id}/{arity} not found");
    if public.len() == 1 {
        let only = public[0];
        message.push_str(&format!(". The module defines {}/{}", only.name, only.arity()));
    }
    Err(SandboxError::new(ErrorKind::NameResolution, message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn shape_of(source: &str) -> Result<String, SandboxError> {
        let root = parse(source)?;
        validate_shape(&root).map(|shape| shape.name)
    }

    #[test]
    fn accepts_defs_and_attributes() {
        let name = shape_of("defmodule Foo.Bar do\n  @rate 2\n  def f(x), do: x\n  defp g(x), do: x\nend");
        assert_eq!(name.unwrap(), "Foo.Bar");
    }

    #[test]
    fn rejects_nested_module_with_line() {
        let err = shape_of("defmodule Outer do\n  defmodule Inner do\n  end\nend").unwrap_err();
        assert_eq!(err.to_string(), "Line 2: Nested modules are not allowed");
    }

    #[test]
    fn rejects_each_directive_by_name() {
        let cases = [
            ("alias File", "Module aliases are not allowed"),
            ("import File", "Module imports are not allowed"),
            ("require Logger", "Module requires are not allowed"),
            ("use GenServer", "Module use is not allowed"),
        ];
        for (stmt, expected) in cases {
            let err = shape_of(&format!("defmodule M do\n  {stmt}\nend")).unwrap_err();
            assert!(
                err.to_string().contains(expected),
                "{stmt}: got {err}"
            );
        }
    }

    #[test]
    fn rejects_top_level_expression() {
        let err = shape_of("defmodule M do\n  1 + 1\nend").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Line 2: Immediate code execution in modules is not allowed"
        );
    }

    #[test]
    fn rejects_non_module_root() {
        let err = shape_of("1 + 1").unwrap_err();
        assert!(err.to_string().contains("module definition"));
    }

    #[test]
    fn resolves_entry_by_name_and_arity() {
        let root = parse("defmodule M do\n  def f(a), do: a\n  def f(a, b), do: a + b\nend").unwrap();
        let shape = validate_shape(&root).unwrap();
        let fun = resolve_entry(&shape, "M", "f", 2).unwrap();
        assert_eq!(fun.arity(), 2);
    }

    #[test]
    fn reports_module_name_mismatch() {
        let root = parse("defmodule Other do\n  def f(a), do: a\nend").unwrap();
        let shape = validate_shape(&root).unwrap();
        let err = resolve_entry(&shape, "Expected", "f", 1).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Module name mismatch. Expected Expected, got Other"
        );
    }

    #[test]
    fn reports_missing_function_with_hint() {
        let root = parse("defmodule M do\n  def greet(name), do: name\nend").unwrap();
        let shape = validate_shape(&root).unwrap();
        let err = resolve_entry(&shape, "M", "greet", 2).unwrap_err();
        assert!(err.to_string().contains("Function greet/2 not found"));
        assert!(err.to_string().contains("greet/1"));
    }

    #[test]
    fn private_functions_are_not_entry_points() {
        let root = parse("defmodule M do\n  defp f(a), do: a\nend").unwrap();
        let shape = validate_shape(&root).unwrap();
        let err = resolve_entry(&shape, "M", "f", 1).unwrap_err();
        assert!(err.to_string().contains("Function f/1 not found"));
    }
}
