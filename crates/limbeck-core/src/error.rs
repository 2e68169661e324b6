use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline stage a [`SandboxError`] originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Lexical pre-filter rejection (size cap, pattern heuristics).
    Precheck,
    /// Tokenizer or parser failure.
    Parse,
    /// Module shape rejection (directives, top-level expressions).
    Shape,
    /// Module name or function/arity resolution failure.
    NameResolution,
    /// Whitelist validator rejection.
    Whitelist,
    /// Exception raised while executing admitted code.
    Runtime,
}

/// Structured sandbox error, flattened to a string at the public boundary.
///
/// Callers receive the rendered form: `"Line N: <message>"` when the failing
/// node carried line metadata, bare `<message>` otherwise. The structured
/// fields stay available for tests and embedding hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxError {
    pub kind: ErrorKind,
    pub message: String,
    pub line: Option<u32>,
}

impl SandboxError {
    /// Create an error with no line information.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            line: None,
        }
    }

    /// Create an error tagged with the failing node's line.
    pub fn at_line(kind: ErrorKind, message: impl Into<String>, line: u32) -> Self {
        Self {
            kind,
            message: message.into(),
            line: Some(line),
        }
    }

    /// Attach a line unless one is already recorded.
    pub fn or_line(mut self, line: u32) -> Self {
        if self.line.is_none() && line > 0 {
            self.line = Some(line);
        }
        self
    }
}

impl fmt::Display for SandboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "Line {line}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for SandboxError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_line_when_present() {
        let err = SandboxError::at_line(ErrorKind::Whitelist, "Forbidden expression", 4);
        assert_eq!(err.to_string(), "Line 4: Forbidden expression");
    }

    #[test]
    fn display_is_bare_message_without_line() {
        let err = SandboxError::new(ErrorKind::Precheck, "Code size exceeds maximum limit");
        assert_eq!(err.to_string(), "Code size exceeds maximum limit");
    }

    #[test]
    fn or_line_does_not_overwrite() {
        let err = SandboxError::at_line(ErrorKind::Whitelist, "x", 2).or_line(9);
        assert_eq!(err.line, Some(2));
    }
}
