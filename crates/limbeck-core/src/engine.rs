//! Engine facade: the one entry point wiring the pipeline together.
//!
//! Pipeline per call: pre-filter → parse → shape → name/arity → whitelist →
//! install → invoke. Persistent mode consults the module cache before
//! parsing and leaves the compiled unit resident afterwards; ephemeral mode
//! builds a standalone unit and drops it when the call returns, which is
//! the purge.
//!
//! Registries are engine-local (no global singleton), so embedders can run
//! engines with different whitelists or builtin surfaces side by side.

use crate::builtins::{BuiltinFn, Builtins};
use crate::error::{ErrorKind, SandboxError};
use crate::parser;
use crate::prefilter;
use crate::runtime::{Interp, ModuleUnit};
use crate::shape;
use crate::validator;
use crate::value::Value;
use crate::whitelist::{ModulePolicy, Whitelist};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Per-call options.
#[derive(Debug, Clone, Copy)]
pub struct EvalOpts {
    /// Keep the compiled module resident and keyed by module id.
    pub persistent: bool,
}

impl Default for EvalOpts {
    fn default() -> Self {
        Self { persistent: true }
    }
}

/// Sandbox engine: whitelist, host builtins, and the module cache.
pub struct Engine {
    whitelist: Whitelist,
    builtins: Builtins,
    cache: RwLock<HashMap<String, Arc<ModuleUnit>>>,
    install_lock: Mutex<()>,
}

impl Engine {
    /// Create an engine with the standard whitelist and builtins.
    pub fn new() -> Self {
        Self {
            whitelist: Whitelist::standard(),
            builtins: Builtins::standard(),
            cache: RwLock::new(HashMap::new()),
            install_lock: Mutex::new(()),
        }
    }

    /// Register or replace a host builtin (`"Mod.fun"` key).
    pub fn register_builtin(
        &mut self,
        key: impl Into<String>,
        fun: BuiltinFn,
    ) -> Option<BuiltinFn> {
        self.builtins.register(key, fun)
    }

    /// Register or replace a module admission policy.
    pub fn allow_module(
        &mut self,
        name: impl Into<String>,
        policy: ModulePolicy,
    ) -> Option<ModulePolicy> {
        self.whitelist.allow_module(name, policy)
    }

    /// Access the whitelist (read-only).
    pub fn whitelist(&self) -> &Whitelist {
        &self.whitelist
    }

    /// Evaluate in persistent mode (the default).
    pub fn eval(
        &self,
        code: &str,
        module: &str,
        function: &str,
        args: &[Value],
    ) -> Result<Value, SandboxError> {
        self.eval_with_opts(code, module, function, args, EvalOpts::default())
    }

    /// Run the full pipeline with explicit options.
    pub fn eval_with_opts(
        &self,
        code: &str,
        module: &str,
        function: &str,
        args: &[Value],
        opts: EvalOpts,
    ) -> Result<Value, SandboxError> {
        let arity = args.len();
        let source_hash = hash_source(code);

        // The pre-filter always runs; a cache hit only skips parse and
        // validation.
        prefilter::check(code)?;

        if opts.persistent {
            if let Some(unit) = self.cached(module) {
                if unit.source_hash == source_hash && unit.exports(function, arity) {
                    return self.invoke(&unit, function, args);
                }
            }
        }

        let root = parser::parse(code)?;
        let module_shape = shape::validate_shape(&root)?;
        let entry = shape::resolve_entry(&module_shape, module, function, arity)?;
        validator::validate_module(&module_shape, entry, &self.whitelist)?;

        let mut unit = ModuleUnit::compile(module, source_hash, &module_shape);
        for (name, node) in &module_shape.attributes {
            let value = Interp::new(&unit, &self.builtins)
                .eval_constant(node)
                .map_err(|err| SandboxError::new(ErrorKind::Runtime, err.to_string()))?;
            unit.set_attribute(name, value);
        }
        let unit = Arc::new(unit);

        if opts.persistent {
            self.install(module, Arc::clone(&unit));
        }
        self.invoke(&unit, function, args)
    }

    /// Drop a resident module, if any. Ephemeral runs never install, so
    /// this only concerns persistent callers.
    pub fn purge(&self, module: &str) -> bool {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(module)
            .is_some()
    }

    /// Whether a module is currently resident.
    pub fn installed(&self, module: &str) -> bool {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(module)
    }

    fn cached(&self, module: &str) -> Option<Arc<ModuleUnit>> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(module)
            .cloned()
    }

    /// Installs are serialized so concurrent evals of the same module id
    /// cannot interleave replacement.
    fn install(&self, module: &str, unit: Arc<ModuleUnit>) {
        let _guard = self
            .install_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(module.to_string(), unit);
    }

    fn invoke(
        &self,
        unit: &ModuleUnit,
        function: &str,
        args: &[Value],
    ) -> Result<Value, SandboxError> {
        Interp::new(unit, &self.builtins)
            .invoke(function, args)
            .map_err(|err| SandboxError::new(ErrorKind::Runtime, err.to_string()))
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

fn hash_source(code: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    code.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOUBLE: &str = "defmodule Doubler do\n  def double(x), do: x * 2\nend";

    #[test]
    fn persistent_call_installs_module() {
        let engine = Engine::new();
        let v = engine.eval(DOUBLE, "Doubler", "double", &[Value::Int(4)]).unwrap();
        assert_eq!(v, Value::Int(8));
        assert!(engine.installed("Doubler"));
    }

    #[test]
    fn ephemeral_call_leaves_no_residue() {
        let engine = Engine::new();
        let opts = EvalOpts { persistent: false };
        let v = engine
            .eval_with_opts(DOUBLE, "Doubler", "double", &[Value::Int(4)], opts)
            .unwrap();
        assert_eq!(v, Value::Int(8));
        assert!(!engine.installed("Doubler"));
    }

    #[test]
    fn cache_hit_skips_validation_for_same_source() {
        let engine = Engine::new();
        engine.eval(DOUBLE, "Doubler", "double", &[Value::Int(1)]).unwrap();
        // Same code again: served from the resident unit.
        let v = engine.eval(DOUBLE, "Doubler", "double", &[Value::Int(3)]).unwrap();
        assert_eq!(v, Value::Int(6));
    }

    #[test]
    fn changed_source_invalidates_cache_entry() {
        let engine = Engine::new();
        engine.eval(DOUBLE, "Doubler", "double", &[Value::Int(1)]).unwrap();
        let changed = "defmodule Doubler do\n  def double(x), do: x * 10\nend";
        let v = engine.eval(changed, "Doubler", "double", &[Value::Int(3)]).unwrap();
        assert_eq!(v, Value::Int(30));
        // And the replacement is what stays resident.
        let v = engine.eval(changed, "Doubler", "double", &[Value::Int(4)]).unwrap();
        assert_eq!(v, Value::Int(40));
    }

    #[test]
    fn purge_removes_resident_module() {
        let engine = Engine::new();
        engine.eval(DOUBLE, "Doubler", "double", &[Value::Int(1)]).unwrap();
        assert!(engine.purge("Doubler"));
        assert!(!engine.installed("Doubler"));
        assert!(!engine.purge("Doubler"));
    }

    #[test]
    fn rejected_module_is_never_installed() {
        let engine = Engine::new();
        let bad = "defmodule Doubler do\n  def double(x), do: File.read!(x)\nend";
        let err = engine.eval(bad, "Doubler", "double", &[Value::Int(1)]).unwrap_err();
        assert!(err.to_string().contains("Forbidden function: File.read!"));
        assert!(!engine.installed("Doubler"));
    }

    #[test]
    fn custom_builtin_via_register() {
        fn shout(args: &[Value], _ctx: &mut crate::runtime::CallCtx<'_>) -> Result<Value, crate::runtime::EvalError> {
            Ok(Value::string(format!(
                "{}!",
                args.first().map(Value::display_string).unwrap_or_default()
            )))
        }
        let mut engine = Engine::new();
        engine.register_builtin("String.shout", shout);
        let code = "defmodule M do\n  def f(s), do: String.shout(s)\nend";
        let v = engine.eval(code, "M", "f", &[Value::string("hey")]).unwrap();
        assert_eq!(v, Value::string("hey!"));
    }
}
