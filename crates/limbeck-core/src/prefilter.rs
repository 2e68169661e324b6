//! Cheap textual checks run before the parser sees the source.

use crate::error::{ErrorKind, SandboxError};
use regex::Regex;
use std::sync::OnceLock;

/// Hard cap on submitted source size.
pub const MAX_SOURCE_BYTES: usize = 100_000;

/// More repeated `name<digits>()` call sites than this reads as an attempt
/// to exhaust the identifier table.
const MAX_NUMBERED_CALL_SITES: usize = 1000;

const ATOM_EXHAUSTION_CHAR_LEN: usize = 10_000;

fn numbered_call_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\w+\d+\(\)").expect("hard-coded pattern compiles"))
}

/// Apply the pre-parse rejection rules in order; first match wins.
pub fn check(code: &str) -> Result<(), SandboxError> {
    if code.len() > MAX_SOURCE_BYTES {
        return Err(SandboxError::new(
            ErrorKind::Precheck,
            "Code size exceeds maximum limit",
        ));
    }
    if numbered_call_pattern().find_iter(code).count() > MAX_NUMBERED_CALL_SITES {
        return Err(SandboxError::new(
            ErrorKind::Precheck,
            "Suspicious code patterns detected",
        ));
    }
    if code.contains("foo") && code.chars().count() > ATOM_EXHAUSTION_CHAR_LEN {
        return Err(SandboxError::new(
            ErrorKind::Precheck,
            "Potential atom exhaustion attack detected",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_source() {
        assert!(check("defmodule M do\n  def f(x), do: x\nend").is_ok());
    }

    #[test]
    fn rejects_oversized_source() {
        let code = "x".repeat(MAX_SOURCE_BYTES + 1);
        let err = check(&code).unwrap_err();
        assert_eq!(err.to_string(), "Code size exceeds maximum limit");
    }

    #[test]
    fn rejects_numbered_call_flood() {
        let mut code = String::new();
        for i in 0..1001 {
            code.push_str(&format!("gen{i}()\n"));
        }
        let err = check(&code).unwrap_err();
        assert_eq!(err.to_string(), "Suspicious code patterns detected");
    }

    #[test]
    fn tolerates_a_few_numbered_calls() {
        assert!(check("step1()\nstep2()\n").is_ok());
    }

    #[test]
    fn rejects_foo_in_large_source() {
        let mut code = "x".repeat(ATOM_EXHAUSTION_CHAR_LEN + 1);
        code.push_str("foo");
        let err = check(&code).unwrap_err();
        assert_eq!(err.to_string(), "Potential atom exhaustion attack detected");
    }

    #[test]
    fn allows_foo_in_small_source() {
        assert!(check("defmodule M do\n  def foo(x), do: x\nend").is_ok());
    }

    #[test]
    fn size_cap_wins_over_other_rules() {
        let mut code = "foo".repeat(40_000);
        code.push_str("gen1()");
        let err = check(&code).unwrap_err();
        assert_eq!(err.to_string(), "Code size exceeds maximum limit");
    }
}
