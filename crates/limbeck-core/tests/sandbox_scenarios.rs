//! End-to-end scenarios exercising the whole pipeline through the public
//! `eval` surface, plus the cross-stage behavioral properties.

use limbeck_core::{eval, eval_with_opts, Engine, EvalOpts, Value};
use std::collections::BTreeMap;

fn atom_map(entries: &[(&str, Value)]) -> Value {
    let map: BTreeMap<Value, Value> = entries
        .iter()
        .map(|(k, v)| (Value::atom(k), v.clone()))
        .collect();
    Value::map(map)
}

#[test]
fn happy_arithmetic_returns_tax_map() {
    let code = "defmodule Calculator do
  def add_tax(price) do
    tax = price * 0.2
    %{price: price, tax: tax, total: price + tax}
  end
end";
    let out = eval(code, "Calculator", "add_tax", &[Value::Float(100.0)]).unwrap();
    assert_eq!(
        out,
        atom_map(&[
            ("price", Value::Float(100.0)),
            ("tax", Value::Float(20.0)),
            ("total", Value::Float(120.0)),
        ])
    );
}

#[test]
fn recursion_via_case() {
    let code = "defmodule Math do
  def fibonacci(n) do
    case n do
      0 -> 0
      1 -> 1
      _ -> fibonacci(n - 1) + fibonacci(n - 2)
    end
  end
end";
    let out = eval(code, "Math", "fibonacci", &[Value::Int(10)]).unwrap();
    assert_eq!(out, Value::Int(55));
}

#[test]
fn forbidden_call_is_rejected_statically() {
    let code = "defmodule Reader do
  def read_file(path) do
    File.read!(path)
  end
end";
    let err = eval(code, "Reader", "read_file", &[Value::string("/tmp/x")]).unwrap_err();
    assert!(err.to_string().contains("Forbidden function: File.read!"));
}

#[test]
fn parameter_reassignment_is_rejected() {
    let code = "defmodule Counter do\n  def increment(x) do\n    x = x + 1\n    x\n  end\nend";
    let err = eval(code, "Counter", "increment", &[Value::Int(1)]).unwrap_err();
    assert!(err
        .to_string()
        .contains("Cannot assign to function parameter x"));
}

#[test]
fn nested_module_is_rejected() {
    let code = "defmodule Outer do
  defmodule Inner do
    def f(x), do: x
  end
end";
    let err = eval(code, "Outer", "f", &[]).unwrap_err();
    assert!(err.to_string().contains("Nested modules are not allowed"));
}

#[test]
fn arity_mismatch_reports_not_found() {
    let code = "defmodule Greeter do\n  def greet(name), do: name\nend";
    let err = eval(code, "Greeter", "greet", &[Value::string("a"), Value::string("b")])
        .unwrap_err();
    assert!(err.to_string().contains("Function greet/2 not found"));
}

#[test]
fn runtime_exception_passes_through() {
    let code = "defmodule Div do\n  def divide(a, b), do: a / b\nend";
    let err = eval(code, "Div", "divide", &[Value::Int(1), Value::Int(0)]).unwrap_err();
    assert!(err
        .to_string()
        .contains("bad argument in arithmetic expression"));
}

#[test]
fn module_name_mismatch_names_both() {
    let code = "defmodule Actual do\n  def f(x), do: x\nend";
    let err = eval(code, "Expected", "f", &[Value::Int(1)]).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Module name mismatch. Expected Expected, got Actual"
    );
}

#[test]
fn results_are_deterministic() {
    let code = "defmodule M do
  def f(list) do
    list |> Enum.map(fn x -> x * 3 end) |> Enum.sum()
  end
end";
    let args = [Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)])];
    let first = eval(code, "M", "f", &args);
    let second = eval(code, "M", "f", &args);
    assert_eq!(first, second);
    let bad = "defmodule M do\n  def f(x), do: System.halt(x)\nend";
    let first = eval(bad, "M", "f", &[Value::Int(0)]).unwrap_err();
    let second = eval(bad, "M", "f", &[Value::Int(0)]).unwrap_err();
    assert_eq!(first.to_string(), second.to_string());
}

#[test]
fn persistent_and_ephemeral_agree() {
    let codes = [
        "defmodule P do\n  def f(x), do: x <> \"!\"\nend",
        "defmodule P do\n  def f(x), do: File.read!(x)\nend",
        "defmodule P do\n  def f(x), do: hd(x)\nend",
    ];
    for code in codes {
        let persistent = eval(code, "P", "f", &[Value::string("ok")]).map_err(|e| e.to_string());
        let ephemeral = eval_with_opts(
            code,
            "P",
            "f",
            &[Value::string("ok")],
            EvalOpts { persistent: false },
        )
        .map_err(|e| e.to_string());
        assert_eq!(persistent, ephemeral, "disagreement for: {code}");
    }
}

#[test]
fn validation_errors_carry_the_failing_line() {
    let code = "defmodule M do
  def f(x) do
    y = x + 1
    File.write(y)
  end
end";
    let err = eval(code, "M", "f", &[Value::Int(1)]).unwrap_err();
    assert_eq!(err.line, Some(4));
    assert!(err.to_string().starts_with("Line 4:"));
}

#[test]
fn stale_cache_does_not_leak_old_code() {
    let engine = Engine::new();
    let v1 = "defmodule C do\n  def f(), do: :one\nend";
    let v2 = "defmodule C do\n  def f(), do: :two\nend";
    assert_eq!(engine.eval(v1, "C", "f", &[]).unwrap(), Value::atom("one"));
    assert_eq!(engine.eval(v2, "C", "f", &[]).unwrap(), Value::atom("two"));
}

#[test]
fn private_helpers_compose_with_public_entry() {
    let code = "defmodule Pricing do
  @rate 0.1
  def total(items) do
    items
    |> Enum.map(fn item -> with_tax(item) end)
    |> Enum.sum()
  end
  defp with_tax(amount), do: amount + amount * @rate
end";
    let out = eval(
        code,
        "Pricing",
        "total",
        &[Value::list(vec![Value::Float(10.0), Value::Float(20.0)])],
    )
    .unwrap();
    assert_eq!(out, Value::Float(33.0));
}

#[test]
fn multi_clause_recursion_without_case() {
    let code = "defmodule Math do
  def fact(0), do: 1
  def fact(n) when is_integer(n), do: n * fact(n - 1)
end";
    let out = eval(code, "Math", "fact", &[Value::Int(5)]).unwrap();
    assert_eq!(out, Value::Int(120));
}

#[test]
fn string_pipeline_with_interpolation() {
    let code = "defmodule Fmt do
  def shout(name) do
    upper = name |> String.trim() |> String.upcase()
    \"HELLO, #{upper}!\"
  end
end";
    let out = eval(code, "Fmt", "shout", &[Value::string("  world ")]).unwrap();
    assert_eq!(out, Value::string("HELLO, WORLD!"));
}
