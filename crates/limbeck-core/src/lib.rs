//! # limbeck-core
//!
//! Sandboxed evaluator for a small, expression-oriented functional
//! language with an Elixir-style surface syntax. A caller submits source
//! text defining one module, names the function to run, and supplies
//! arguments; the sandbox statically rejects everything outside a
//! whitelist before any code executes.
//!
//! ## Module Roles
//!
//! | Module | Responsibility | Public Entry Points |
//! |---|---|---|
//! | `prefilter` | Pre-parse size/heuristic checks | `prefilter::check` |
//! | `lexer`/`parser` | Source text -> tagged AST | `parser::parse` |
//! | `shape` | One-module shape + entry resolution | `validate_shape`, `resolve_entry` |
//! | `whitelist` | Immutable admission registry | [`Whitelist`], [`ModulePolicy`] |
//! | `validator` | Whitelist walk over every function body | `validate_module` |
//! | `runtime` | Tree-walk interpreter for admitted modules | [`Interp`], [`ModuleUnit`] |
//! | `builtins` | Host implementations of whitelisted modules | [`Builtins`] |
//! | `engine` | Pipeline orchestration + module cache | [`Engine`], [`EvalOpts`] |
//!
//! ## Pipeline Contract
//!
//! 1. Pre-filter, parse, shape-check, resolve, whitelist-validate.
//! 2. Install the admitted module (resident in persistent mode).
//! 3. Invoke the requested function; runtime exceptions come back as
//!    errors, never panics.
//!
//! Any stage failure short-circuits. Nothing admitted by mistake at one
//! stage is recovered by a later one: validation is the sandbox.
//!
//! ## Hello World
//!
//! ```
//! use limbeck_core::{eval, Value};
//!
//! let code = r#"
//! defmodule Calculator do
//!   def double(x), do: x * 2
//! end
//! "#;
//! let out = eval(code, "Calculator", "double", &[Value::Int(21)]);
//! assert_eq!(out.unwrap(), Value::Int(42));
//! ```
//!
//! ## Rejection
//!
//! ```
//! use limbeck_core::{eval, Value};
//!
//! let code = r#"
//! defmodule Sneaky do
//!   def read(path), do: File.read!(path)
//! end
//! "#;
//! let err = eval(code, "Sneaky", "read", &[Value::string("/etc/passwd")]).unwrap_err();
//! assert!(err.to_string().contains("Forbidden function: File.read!"));
//! ```

pub mod ast;
pub mod builtins;
pub mod engine;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod prefilter;
pub mod runtime;
pub mod shape;
pub mod validator;
pub mod value;
pub mod whitelist;

pub use builtins::{BuiltinFn, Builtins};
pub use engine::{Engine, EvalOpts};
pub use error::{ErrorKind, SandboxError};
pub use runtime::{CallCtx, EvalError, Interp, ModuleUnit};
pub use value::{FunValue, Value};
pub use whitelist::{ModulePolicy, Whitelist};

/// Evaluate `module.function(args)` from `code` with a fresh default
/// engine in persistent mode. Long-lived callers should hold an [`Engine`]
/// to benefit from the module cache.
pub fn eval(
    code: &str,
    module: &str,
    function: &str,
    args: &[Value],
) -> Result<Value, SandboxError> {
    Engine::new().eval(code, module, function, args)
}

/// Evaluate with explicit options (e.g. `persistent: false`).
pub fn eval_with_opts(
    code: &str,
    module: &str,
    function: &str,
    args: &[Value],
    opts: EvalOpts,
) -> Result<Value, SandboxError> {
    Engine::new().eval_with_opts(code, module, function, args, opts)
}
