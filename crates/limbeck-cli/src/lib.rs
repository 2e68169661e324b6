//! Command-line runner for the Limbeck sandbox.
//!
//! ```text
//! limbeck run <file> --module <Name> --function <name> [--args <json-array>] [--ephemeral]
//! ```
//!
//! Arguments cross the boundary as JSON; results print as JSON on stdout.
//! Sandbox and runtime errors land on stderr with a nonzero exit.

use limbeck_core::{Engine, EvalOpts, Value};
use serde_json::Value as Json;
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone)]
enum CliCommand {
    Run {
        file: PathBuf,
        module: String,
        function: String,
        args_json: Option<String>,
        ephemeral: bool,
    },
}

const USAGE: &str = "usage: limbeck run <file> --module <Name> --function <name> \
[--args <json-array>] [--ephemeral]";

/// Entry point used by `main`: parse argv, run, report.
pub fn run_from_env() -> Result<(), String> {
    let argv: Vec<String> = env::args().skip(1).collect();
    let command = parse_args(&argv)?;
    match command {
        CliCommand::Run {
            file,
            module,
            function,
            args_json,
            ephemeral,
        } => {
            let code = fs::read_to_string(&file)
                .map_err(|e| format!("cannot read {}: {e}", file.display()))?;
            let args = parse_call_args(args_json.as_deref())?;
            let engine = Engine::new();
            let opts = EvalOpts {
                persistent: !ephemeral,
            };
            let value = engine
                .eval_with_opts(&code, &module, &function, &args, opts)
                .map_err(|e| e.to_string())?;
            let rendered = serde_json::to_string_pretty(&Json::from(&value))
                .map_err(|e| format!("cannot render result: {e}"))?;
            println!("{rendered}");
            Ok(())
        }
    }
}

fn parse_args(argv: &[String]) -> Result<CliCommand, String> {
    let mut parts = argv.iter();
    match parts.next().map(String::as_str) {
        Some("run") => {}
        Some(other) => return Err(format!("unknown command '{other}'\n{USAGE}")),
        None => return Err(USAGE.to_string()),
    }
    let mut file = None;
    let mut module = None;
    let mut function = None;
    let mut args_json = None;
    let mut ephemeral = false;
    while let Some(part) = parts.next() {
        match part.as_str() {
            "--module" => {
                module = Some(
                    parts
                        .next()
                        .ok_or_else(|| format!("--module needs a value\n{USAGE}"))?
                        .clone(),
                );
            }
            "--function" => {
                function = Some(
                    parts
                        .next()
                        .ok_or_else(|| format!("--function needs a value\n{USAGE}"))?
                        .clone(),
                );
            }
            "--args" => {
                args_json = Some(
                    parts
                        .next()
                        .ok_or_else(|| format!("--args needs a value\n{USAGE}"))?
                        .clone(),
                );
            }
            "--ephemeral" => ephemeral = true,
            other if file.is_none() && !other.starts_with("--") => {
                file = Some(PathBuf::from(other));
            }
            other => return Err(format!("unexpected argument '{other}'\n{USAGE}")),
        }
    }
    Ok(CliCommand::Run {
        file: file.ok_or_else(|| format!("missing source file\n{USAGE}"))?,
        module: module.ok_or_else(|| format!("missing --module\n{USAGE}"))?,
        function: function.ok_or_else(|| format!("missing --function\n{USAGE}"))?,
        args_json,
        ephemeral,
    })
}

fn parse_call_args(args_json: Option<&str>) -> Result<Vec<Value>, String> {
    let Some(raw) = args_json else {
        return Ok(Vec::new());
    };
    let json: Json = serde_json::from_str(raw).map_err(|e| format!("invalid --args JSON: {e}"))?;
    match json {
        Json::Array(items) => Ok(items.into_iter().map(Value::from).collect()),
        _ => Err("--args must be a JSON array".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_full_run_command() {
        let command = parse_args(&argv(&[
            "run",
            "prog.exs",
            "--module",
            "Calculator",
            "--function",
            "add_tax",
            "--args",
            "[100.0]",
            "--ephemeral",
        ]))
        .unwrap();
        let CliCommand::Run {
            file,
            module,
            function,
            args_json,
            ephemeral,
        } = command;
        assert_eq!(file, PathBuf::from("prog.exs"));
        assert_eq!(module, "Calculator");
        assert_eq!(function, "add_tax");
        assert_eq!(args_json.as_deref(), Some("[100.0]"));
        assert!(ephemeral);
    }

    #[test]
    fn rejects_missing_function() {
        let err = parse_args(&argv(&["run", "prog.exs", "--module", "M"])).unwrap_err();
        assert!(err.contains("missing --function"));
    }

    #[test]
    fn rejects_non_array_args() {
        let err = parse_call_args(Some("{\"a\": 1}")).unwrap_err();
        assert!(err.contains("JSON array"));
    }

    #[test]
    fn converts_json_args_to_values() {
        let args = parse_call_args(Some("[1, \"two\", [3]]")).unwrap();
        assert_eq!(args[0], Value::Int(1));
        assert_eq!(args[1], Value::string("two"));
        assert_eq!(args[2], Value::list(vec![Value::Int(3)]));
    }
}
