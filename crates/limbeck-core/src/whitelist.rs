//! The immutable admission registry consulted by the validator.
//!
//! One instance holds every table: operator tokens, kernel guard and
//! function arities, sigil letters, and the per-module call policies.
//! Engines own their registry, so embedders can widen or narrow it without
//! affecting other engines in the process.

use std::collections::{HashMap, HashSet};

/// Admission policy for calls through one module.
#[derive(Debug, Clone)]
pub enum ModulePolicy {
    /// Every function/arity is admitted.
    AllFunctions,
    /// Everything except the listed function/arity pairs.
    Denylist(HashSet<(String, usize)>),
    /// Only the listed function/arity pairs.
    Allowlist(HashSet<(String, usize)>),
    /// Exactly one function/arity pair.
    Single(String, usize),
}

impl ModulePolicy {
    fn admits(&self, name: &str, arity: usize) -> bool {
        match self {
            ModulePolicy::AllFunctions => true,
            ModulePolicy::Denylist(set) => !set.contains(&(name.to_string(), arity)),
            ModulePolicy::Allowlist(set) => set.contains(&(name.to_string(), arity)),
            ModulePolicy::Single(single_name, single_arity) => {
                single_name == name && *single_arity == arity
            }
        }
    }
}

/// Operator tokens admitted by the validator. Structural tokens (`{}`,
/// `<<>>`, `fn`, `->`, `when`, `__block__`) are listed for completeness;
/// the walker admits those forms directly.
const ALLOWED_OPERATORS: &[&str] = &[
    "+", "-", "*", "/", "==", "!=", "===", "!==", ">", ">=", "<", "<=", "&&", "||", "and", "or",
    "not", "<>", "++", "|>", "|", ".", "{}", "<<>>", "::", "when", "->", "fn", "__block__",
];

const ALLOWED_KERNEL_GUARDS: &[(&str, usize)] = &[
    ("is_atom", 1),
    ("is_binary", 1),
    ("is_bitstring", 1),
    ("is_boolean", 1),
    ("is_float", 1),
    ("is_function", 1),
    ("is_function", 2),
    ("is_integer", 1),
    ("is_list", 1),
    ("is_map", 1),
    ("is_map_key", 2),
    ("is_nil", 1),
    ("is_number", 1),
    ("is_tuple", 1),
];

const ALLOWED_KERNEL_FUNCTIONS: &[(&str, usize)] = &[
    ("abs", 1),
    ("byte_size", 1),
    ("ceil", 1),
    ("div", 2),
    ("elem", 2),
    ("floor", 1),
    ("hd", 1),
    ("length", 1),
    ("map_size", 1),
    ("max", 2),
    ("min", 2),
    ("rem", 2),
    ("round", 1),
    ("tl", 1),
    ("to_string", 1),
    ("trunc", 1),
    ("tuple_size", 1),
];

const ALLOWED_SIGILS: &[char] = &['C', 'D', 'N', 'R', 'S', 'T', 'U', 'c', 'r', 's', 'w'];

/// Bitstring `::` spec atoms the validator accepts.
const ALLOWED_BIT_SPECS: &[&str] = &[
    "integer", "float", "binary", "bytes", "bitstring", "bits", "utf8", "utf16", "utf32", "size",
    "unit", "signed", "unsigned", "big", "little", "native",
];

/// Process-wide admission tables, read-only after construction.
#[derive(Debug, Clone)]
pub struct Whitelist {
    operators: HashSet<&'static str>,
    kernel_guards: HashSet<(String, usize)>,
    kernel_functions: HashSet<(String, usize)>,
    sigils: HashSet<char>,
    modules: HashMap<String, ModulePolicy>,
}

impl Whitelist {
    /// Build the standard registry.
    pub fn standard() -> Self {
        let mut modules = HashMap::new();
        modules.insert(
            "String".to_string(),
            ModulePolicy::Denylist(
                [("to_atom".to_string(), 1), ("to_existing_atom".to_string(), 1)]
                    .into_iter()
                    .collect(),
            ),
        );
        modules.insert("Enum".to_string(), ModulePolicy::AllFunctions);
        modules.insert("Map".to_string(), ModulePolicy::AllFunctions);
        modules.insert("List".to_string(), ModulePolicy::AllFunctions);
        modules.insert("Tuple".to_string(), ModulePolicy::AllFunctions);
        modules.insert("Integer".to_string(), ModulePolicy::AllFunctions);
        modules.insert("Float".to_string(), ModulePolicy::AllFunctions);
        modules.insert(
            "Access".to_string(),
            ModulePolicy::Single("get".to_string(), 2),
        );
        modules.insert(
            "Regex".to_string(),
            ModulePolicy::Allowlist(
                [
                    ("match?".to_string(), 2),
                    ("run".to_string(), 2),
                    ("scan".to_string(), 2),
                    ("replace".to_string(), 3),
                    ("split".to_string(), 2),
                ]
                .into_iter()
                .collect(),
            ),
        );
        modules.insert(
            "Date".to_string(),
            ModulePolicy::Allowlist(
                [
                    ("add".to_string(), 2),
                    ("diff".to_string(), 2),
                    ("compare".to_string(), 2),
                    ("day_of_week".to_string(), 1),
                ]
                .into_iter()
                .collect(),
            ),
        );
        Self {
            operators: ALLOWED_OPERATORS.iter().copied().collect(),
            kernel_guards: ALLOWED_KERNEL_GUARDS
                .iter()
                .map(|(name, arity)| ((*name).to_string(), *arity))
                .collect(),
            kernel_functions: ALLOWED_KERNEL_FUNCTIONS
                .iter()
                .map(|(name, arity)| ((*name).to_string(), *arity))
                .collect(),
            sigils: ALLOWED_SIGILS.iter().copied().collect(),
            modules,
        }
    }

    /// Register or replace a module policy. Returns the previous policy.
    pub fn allow_module(
        &mut self,
        name: impl Into<String>,
        policy: ModulePolicy,
    ) -> Option<ModulePolicy> {
        self.modules.insert(name.into(), policy)
    }

    pub fn operator_allowed(&self, token: &str) -> bool {
        self.operators.contains(token)
    }

    pub fn sigil_allowed(&self, letter: char) -> bool {
        self.sigils.contains(&letter)
    }

    pub fn guard_allowed(&self, name: &str, arity: usize) -> bool {
        self.kernel_guards.contains(&(name.to_string(), arity))
    }

    /// Guards plus plain kernel functions: the local-call allowlist.
    pub fn kernel_allowed(&self, name: &str, arity: usize) -> bool {
        self.guard_allowed(name, arity)
            || self.kernel_functions.contains(&(name.to_string(), arity))
    }

    /// Resolve a qualified call against the module policy table.
    pub fn module_call_allowed(&self, module: &str, name: &str, arity: usize) -> bool {
        self.modules
            .get(module)
            .is_some_and(|policy| policy.admits(name, arity))
    }

    pub fn bit_spec_allowed(&self, atom: &str) -> bool {
        ALLOWED_BIT_SPECS.contains(&atom)
    }
}

impl Default for Whitelist {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denylist_blocks_only_listed_pairs() {
        let wl = Whitelist::standard();
        assert!(wl.module_call_allowed("String", "upcase", 1));
        assert!(!wl.module_call_allowed("String", "to_atom", 1));
        assert!(!wl.module_call_allowed("String", "to_existing_atom", 1));
    }

    #[test]
    fn all_functions_admits_anything() {
        let wl = Whitelist::standard();
        assert!(wl.module_call_allowed("Map", "get", 2));
        assert!(wl.module_call_allowed("Map", "whatever", 7));
    }

    #[test]
    fn single_policy_is_exact() {
        let wl = Whitelist::standard();
        assert!(wl.module_call_allowed("Access", "get", 2));
        assert!(!wl.module_call_allowed("Access", "get", 3));
        assert!(!wl.module_call_allowed("Access", "fetch", 2));
    }

    #[test]
    fn unknown_module_is_rejected() {
        let wl = Whitelist::standard();
        assert!(!wl.module_call_allowed("File", "read!", 1));
        assert!(!wl.module_call_allowed("System", "cmd", 2));
    }

    #[test]
    fn kernel_split_between_guards_and_functions() {
        let wl = Whitelist::standard();
        assert!(wl.guard_allowed("is_integer", 1));
        assert!(!wl.guard_allowed("length", 2));
        assert!(wl.kernel_allowed("length", 1));
        assert!(wl.kernel_allowed("is_integer", 1));
        assert!(!wl.kernel_allowed("apply", 2));
        assert!(!wl.kernel_allowed("spawn", 1));
    }

    #[test]
    fn operator_table_excludes_unsafe_tokens() {
        let wl = Whitelist::standard();
        assert!(wl.operator_allowed("|>"));
        assert!(wl.operator_allowed("and"));
        assert!(!wl.operator_allowed("in"));
        assert!(!wl.operator_allowed("=~"));
        assert!(!wl.operator_allowed("^"));
    }

    #[test]
    fn sigil_table() {
        let wl = Whitelist::standard();
        for letter in ['C', 'D', 'N', 'R', 'S', 'T', 'U', 'c', 'r', 's', 'w'] {
            assert!(wl.sigil_allowed(letter), "sigil {letter} should be allowed");
        }
        assert!(!wl.sigil_allowed('H'));
        assert!(!wl.sigil_allowed('x'));
    }
}
