//! Host implementations of the whitelisted built-in surface.
//!
//! A flat registry keyed by `Module.function`; Kernel functions are reached
//! by local calls through the `Kernel.` prefix. Each entry handles its own
//! arities and raises `undefined function` for the rest, so the registry
//! can stay narrower than the whitelist tables without special cases.

use crate::runtime::{compare_values, CallCtx, EvalError};
use crate::value::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// Built-in function signature.
pub type BuiltinFn = fn(&[Value], &mut CallCtx<'_>) -> Result<Value, EvalError>;

/// Host function registry.
pub struct Builtins {
    fns: HashMap<String, BuiltinFn>,
}

impl Builtins {
    /// Build the standard registry.
    pub fn standard() -> Self {
        let mut fns: HashMap<String, BuiltinFn> = HashMap::new();

        fns.insert("Kernel.abs".into(), kernel_abs as BuiltinFn);
        fns.insert("Kernel.byte_size".into(), kernel_byte_size as BuiltinFn);
        fns.insert("Kernel.ceil".into(), kernel_ceil as BuiltinFn);
        fns.insert("Kernel.div".into(), kernel_div as BuiltinFn);
        fns.insert("Kernel.elem".into(), kernel_elem as BuiltinFn);
        fns.insert("Kernel.floor".into(), kernel_floor as BuiltinFn);
        fns.insert("Kernel.hd".into(), kernel_hd as BuiltinFn);
        fns.insert("Kernel.length".into(), kernel_length as BuiltinFn);
        fns.insert("Kernel.map_size".into(), kernel_map_size as BuiltinFn);
        fns.insert("Kernel.max".into(), kernel_max as BuiltinFn);
        fns.insert("Kernel.min".into(), kernel_min as BuiltinFn);
        fns.insert("Kernel.rem".into(), kernel_rem as BuiltinFn);
        fns.insert("Kernel.round".into(), kernel_round as BuiltinFn);
        fns.insert("Kernel.tl".into(), kernel_tl as BuiltinFn);
        fns.insert("Kernel.to_string".into(), kernel_to_string as BuiltinFn);
        fns.insert("Kernel.trunc".into(), kernel_trunc as BuiltinFn);
        fns.insert("Kernel.tuple_size".into(), kernel_tuple_size as BuiltinFn);
        fns.insert("Kernel.is_atom".into(), guard_is_atom as BuiltinFn);
        fns.insert("Kernel.is_binary".into(), guard_is_binary as BuiltinFn);
        fns.insert("Kernel.is_bitstring".into(), guard_is_binary as BuiltinFn);
        fns.insert("Kernel.is_boolean".into(), guard_is_boolean as BuiltinFn);
        fns.insert("Kernel.is_float".into(), guard_is_float as BuiltinFn);
        fns.insert("Kernel.is_function".into(), guard_is_function as BuiltinFn);
        fns.insert("Kernel.is_integer".into(), guard_is_integer as BuiltinFn);
        fns.insert("Kernel.is_list".into(), guard_is_list as BuiltinFn);
        fns.insert("Kernel.is_map".into(), guard_is_map as BuiltinFn);
        fns.insert("Kernel.is_map_key".into(), guard_is_map_key as BuiltinFn);
        fns.insert("Kernel.is_nil".into(), guard_is_nil as BuiltinFn);
        fns.insert("Kernel.is_number".into(), guard_is_number as BuiltinFn);
        fns.insert("Kernel.is_tuple".into(), guard_is_tuple as BuiltinFn);

        fns.insert("String.at".into(), string_at as BuiltinFn);
        fns.insert("String.capitalize".into(), string_capitalize as BuiltinFn);
        fns.insert("String.contains?".into(), string_contains as BuiltinFn);
        fns.insert("String.downcase".into(), string_downcase as BuiltinFn);
        fns.insert("String.duplicate".into(), string_duplicate as BuiltinFn);
        fns.insert("String.ends_with?".into(), string_ends_with as BuiltinFn);
        fns.insert("String.first".into(), string_first as BuiltinFn);
        fns.insert("String.last".into(), string_last as BuiltinFn);
        fns.insert("String.length".into(), string_length as BuiltinFn);
        fns.insert("String.pad_leading".into(), string_pad_leading as BuiltinFn);
        fns.insert("String.pad_trailing".into(), string_pad_trailing as BuiltinFn);
        fns.insert("String.replace".into(), string_replace as BuiltinFn);
        fns.insert("String.reverse".into(), string_reverse as BuiltinFn);
        fns.insert("String.slice".into(), string_slice as BuiltinFn);
        fns.insert("String.split".into(), string_split as BuiltinFn);
        fns.insert("String.starts_with?".into(), string_starts_with as BuiltinFn);
        fns.insert("String.to_float".into(), string_to_float as BuiltinFn);
        fns.insert("String.to_integer".into(), string_to_integer as BuiltinFn);
        fns.insert("String.trim".into(), string_trim as BuiltinFn);
        fns.insert("String.trim_leading".into(), string_trim_leading as BuiltinFn);
        fns.insert("String.trim_trailing".into(), string_trim_trailing as BuiltinFn);
        fns.insert("String.upcase".into(), string_upcase as BuiltinFn);
        fns.insert("String.graphemes".into(), string_graphemes as BuiltinFn);

        fns.insert("Enum.all?".into(), enum_all as BuiltinFn);
        fns.insert("Enum.any?".into(), enum_any as BuiltinFn);
        fns.insert("Enum.at".into(), enum_at as BuiltinFn);
        fns.insert("Enum.concat".into(), enum_concat as BuiltinFn);
        fns.insert("Enum.count".into(), enum_count as BuiltinFn);
        fns.insert("Enum.drop".into(), enum_drop as BuiltinFn);
        fns.insert("Enum.empty?".into(), enum_empty as BuiltinFn);
        fns.insert("Enum.filter".into(), enum_filter as BuiltinFn);
        fns.insert("Enum.find".into(), enum_find as BuiltinFn);
        fns.insert("Enum.flat_map".into(), enum_flat_map as BuiltinFn);
        fns.insert("Enum.join".into(), enum_join as BuiltinFn);
        fns.insert("Enum.map".into(), enum_map as BuiltinFn);
        fns.insert("Enum.max".into(), enum_max as BuiltinFn);
        fns.insert("Enum.member?".into(), enum_member as BuiltinFn);
        fns.insert("Enum.min".into(), enum_min as BuiltinFn);
        fns.insert("Enum.reduce".into(), enum_reduce as BuiltinFn);
        fns.insert("Enum.reject".into(), enum_reject as BuiltinFn);
        fns.insert("Enum.reverse".into(), enum_reverse as BuiltinFn);
        fns.insert("Enum.sort".into(), enum_sort as BuiltinFn);
        fns.insert("Enum.sum".into(), enum_sum as BuiltinFn);
        fns.insert("Enum.take".into(), enum_take as BuiltinFn);
        fns.insert("Enum.uniq".into(), enum_uniq as BuiltinFn);
        fns.insert("Enum.with_index".into(), enum_with_index as BuiltinFn);
        fns.insert("Enum.zip".into(), enum_zip as BuiltinFn);

        fns.insert("Map.delete".into(), map_delete as BuiltinFn);
        fns.insert("Map.fetch".into(), map_fetch as BuiltinFn);
        fns.insert("Map.fetch!".into(), map_fetch_bang as BuiltinFn);
        fns.insert("Map.get".into(), map_get as BuiltinFn);
        fns.insert("Map.has_key?".into(), map_has_key as BuiltinFn);
        fns.insert("Map.keys".into(), map_keys as BuiltinFn);
        fns.insert("Map.merge".into(), map_merge as BuiltinFn);
        fns.insert("Map.new".into(), map_new as BuiltinFn);
        fns.insert("Map.put".into(), map_put as BuiltinFn);
        fns.insert("Map.put_new".into(), map_put_new as BuiltinFn);
        fns.insert("Map.to_list".into(), map_to_list as BuiltinFn);
        fns.insert("Map.values".into(), map_values as BuiltinFn);

        fns.insert("List.delete".into(), list_delete as BuiltinFn);
        fns.insert("List.duplicate".into(), list_duplicate as BuiltinFn);
        fns.insert("List.first".into(), list_first as BuiltinFn);
        fns.insert("List.flatten".into(), list_flatten as BuiltinFn);
        fns.insert("List.insert_at".into(), list_insert_at as BuiltinFn);
        fns.insert("List.last".into(), list_last as BuiltinFn);
        fns.insert("List.wrap".into(), list_wrap as BuiltinFn);

        fns.insert("Tuple.to_list".into(), tuple_to_list as BuiltinFn);

        fns.insert("Integer.digits".into(), integer_digits as BuiltinFn);
        fns.insert("Integer.mod".into(), integer_mod as BuiltinFn);
        fns.insert("Integer.parse".into(), integer_parse as BuiltinFn);
        fns.insert("Integer.pow".into(), integer_pow as BuiltinFn);
        fns.insert("Integer.to_string".into(), integer_to_string as BuiltinFn);

        fns.insert("Float.ceil".into(), float_ceil as BuiltinFn);
        fns.insert("Float.floor".into(), float_floor as BuiltinFn);
        fns.insert("Float.parse".into(), float_parse as BuiltinFn);
        fns.insert("Float.round".into(), float_round as BuiltinFn);
        fns.insert("Float.to_string".into(), float_to_string as BuiltinFn);

        fns.insert("Access.get".into(), access_get as BuiltinFn);

        fns.insert("Regex.match?".into(), regex_match as BuiltinFn);
        fns.insert("Regex.replace".into(), regex_replace as BuiltinFn);
        fns.insert("Regex.run".into(), regex_run as BuiltinFn);
        fns.insert("Regex.scan".into(), regex_scan as BuiltinFn);
        fns.insert("Regex.split".into(), regex_split as BuiltinFn);

        fns.insert("Date.add".into(), date_add as BuiltinFn);
        fns.insert("Date.compare".into(), date_compare as BuiltinFn);
        fns.insert("Date.day_of_week".into(), date_day_of_week as BuiltinFn);
        fns.insert("Date.diff".into(), date_diff as BuiltinFn);

        Self { fns }
    }

    /// Lookup by `Module.function` key.
    pub fn get(&self, key: &str) -> Option<BuiltinFn> {
        self.fns.get(key).copied()
    }

    /// Register or replace a built-in. Returns the previous handler.
    pub fn register(&mut self, key: impl Into<String>, fun: BuiltinFn) -> Option<BuiltinFn> {
        self.fns.insert(key.into(), fun)
    }
}

impl Default for Builtins {
    fn default() -> Self {
        Self::standard()
    }
}

// ── Argument helpers ───────────────────────────────────────────────

fn wrong_arity(fun: &str, got: usize) -> EvalError {
    EvalError::UndefinedFunction(format!("{fun}/{got}"))
}

fn need<'a>(args: &'a [Value], index: usize, fun: &str) -> Result<&'a Value, EvalError> {
    args.get(index).ok_or_else(|| wrong_arity(fun, args.len()))
}

fn need_str<'a>(args: &'a [Value], index: usize, fun: &str) -> Result<&'a str, EvalError> {
    match need(args, index, fun)? {
        Value::Str(s) => Ok(s.as_ref()),
        other => Err(EvalError::argument(format!(
            "{fun} expected a binary, got: {}",
            other.inspect()
        ))),
    }
}

fn need_int(args: &[Value], index: usize, fun: &str) -> Result<i64, EvalError> {
    match need(args, index, fun)? {
        Value::Int(n) => Ok(*n),
        other => Err(EvalError::argument(format!(
            "{fun} expected an integer, got: {}",
            other.inspect()
        ))),
    }
}

fn need_num(args: &[Value], index: usize, fun: &str) -> Result<f64, EvalError> {
    need(args, index, fun)?.as_number().ok_or_else(|| {
        EvalError::argument(format!("{fun} expected a number"))
    })
}

fn need_list<'a>(args: &'a [Value], index: usize, fun: &str) -> Result<&'a [Value], EvalError> {
    match need(args, index, fun)? {
        Value::List(items) => Ok(items.as_slice()),
        other => Err(EvalError::argument(format!(
            "{fun} expected a list, got: {}",
            other.inspect()
        ))),
    }
}

fn need_map<'a>(
    args: &'a [Value],
    index: usize,
    fun: &str,
) -> Result<&'a BTreeMap<Value, Value>, EvalError> {
    match need(args, index, fun)? {
        Value::Map(map) => Ok(map.as_ref()),
        other => Err(EvalError::argument(format!(
            "{fun} expected a map, got: {}",
            other.inspect()
        ))),
    }
}

fn need_regex<'a>(args: &'a [Value], index: usize, fun: &str) -> Result<&'a regex::Regex, EvalError> {
    match need(args, index, fun)? {
        Value::Regex(re) => Ok(re.as_ref()),
        other => Err(EvalError::argument(format!(
            "{fun} expected a regex, got: {}",
            other.inspect()
        ))),
    }
}

fn need_date(args: &[Value], index: usize, fun: &str) -> Result<chrono::NaiveDate, EvalError> {
    match need(args, index, fun)? {
        Value::Date(d) => Ok(*d),
        other => Err(EvalError::argument(format!(
            "{fun} expected a date, got: {}",
            other.inspect()
        ))),
    }
}

/// Lists enumerate as themselves; maps as `{key, value}` tuples.
fn enumerable(value: &Value, fun: &str) -> Result<Vec<Value>, EvalError> {
    match value {
        Value::List(items) => Ok(items.as_ref().clone()),
        Value::Map(map) => Ok(map
            .iter()
            .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
            .collect()),
        other => Err(EvalError::argument(format!(
            "{fun} expected an enumerable, got: {}",
            other.inspect()
        ))),
    }
}

// ── Kernel ─────────────────────────────────────────────────────────

fn kernel_abs(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    if args.len() != 1 {
        return Err(wrong_arity("abs", args.len()));
    }
    match &args[0] {
        Value::Int(n) => Ok(Value::Int(n.abs())),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        _ => Err(EvalError::Arithmetic),
    }
}

fn kernel_byte_size(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let s = need_str(args, 0, "byte_size")?;
    Ok(Value::Int(s.len() as i64))
}

fn kernel_ceil(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let n = need_num(args, 0, "ceil")?;
    Ok(Value::Int(n.ceil() as i64))
}

fn kernel_div(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let a = need_int(args, 0, "div")?;
    let b = need_int(args, 1, "div")?;
    if b == 0 {
        return Err(EvalError::Arithmetic);
    }
    Ok(Value::Int(a.wrapping_div(b)))
}

fn kernel_elem(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let index = need_int(args, 1, "elem")?;
    if index < 0 {
        return Err(EvalError::argument("argument error"));
    }
    match need(args, 0, "elem")? {
        Value::Tuple(items) => items
            .get(index as usize)
            .cloned()
            .ok_or_else(|| EvalError::argument("argument error")),
        other => Err(EvalError::argument(format!(
            "elem expected a tuple, got: {}",
            other.inspect()
        ))),
    }
}

fn kernel_floor(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let n = need_num(args, 0, "floor")?;
    Ok(Value::Int(n.floor() as i64))
}

fn kernel_hd(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let items = need_list(args, 0, "hd")?;
    items
        .first()
        .cloned()
        .ok_or_else(|| EvalError::argument("argument error"))
}

fn kernel_length(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let items = need_list(args, 0, "length")?;
    Ok(Value::Int(items.len() as i64))
}

fn kernel_map_size(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let map = need_map(args, 0, "map_size")?;
    Ok(Value::Int(map.len() as i64))
}

fn kernel_max(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    if args.len() != 2 {
        return Err(wrong_arity("max", args.len()));
    }
    if compare_values(&args[0], &args[1]) == Ordering::Less {
        Ok(args[1].clone())
    } else {
        Ok(args[0].clone())
    }
}

fn kernel_min(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    if args.len() != 2 {
        return Err(wrong_arity("min", args.len()));
    }
    if compare_values(&args[1], &args[0]) == Ordering::Less {
        Ok(args[1].clone())
    } else {
        Ok(args[0].clone())
    }
}

fn kernel_rem(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let a = need_int(args, 0, "rem")?;
    let b = need_int(args, 1, "rem")?;
    if b == 0 {
        return Err(EvalError::Arithmetic);
    }
    Ok(Value::Int(a.wrapping_rem(b)))
}

fn kernel_round(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let n = need_num(args, 0, "round")?;
    Ok(Value::Int(n.round() as i64))
}

fn kernel_tl(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let items = need_list(args, 0, "tl")?;
    if items.is_empty() {
        return Err(EvalError::argument("argument error"));
    }
    Ok(Value::list(items[1..].to_vec()))
}

fn kernel_to_string(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let value = need(args, 0, "to_string")?;
    Ok(Value::string(value.display_string()))
}

fn kernel_trunc(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let n = need_num(args, 0, "trunc")?;
    Ok(Value::Int(n.trunc() as i64))
}

fn kernel_tuple_size(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    match need(args, 0, "tuple_size")? {
        Value::Tuple(items) => Ok(Value::Int(items.len() as i64)),
        other => Err(EvalError::argument(format!(
            "tuple_size expected a tuple, got: {}",
            other.inspect()
        ))),
    }
}

fn guard_is_atom(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let v = need(args, 0, "is_atom")?;
    Ok(Value::Bool(matches!(
        v,
        Value::Atom(_) | Value::Bool(_) | Value::Nil
    )))
}

fn guard_is_binary(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    Ok(Value::Bool(matches!(need(args, 0, "is_binary")?, Value::Str(_))))
}

fn guard_is_boolean(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    Ok(Value::Bool(matches!(need(args, 0, "is_boolean")?, Value::Bool(_))))
}

fn guard_is_float(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    Ok(Value::Bool(matches!(need(args, 0, "is_float")?, Value::Float(_))))
}

fn guard_is_function(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    match args {
        [value] => Ok(Value::Bool(matches!(value, Value::Fun(_)))),
        [value, arity] => {
            let arity = match arity {
                Value::Int(n) => *n,
                _ => return Err(EvalError::argument("argument error")),
            };
            let matches = match value {
                Value::Fun(f) => f.arity() == Some(arity.max(0) as usize),
                _ => false,
            };
            Ok(Value::Bool(matches))
        }
        _ => Err(wrong_arity("is_function", args.len())),
    }
}

fn guard_is_integer(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    Ok(Value::Bool(matches!(need(args, 0, "is_integer")?, Value::Int(_))))
}

fn guard_is_list(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    Ok(Value::Bool(matches!(need(args, 0, "is_list")?, Value::List(_))))
}

fn guard_is_map(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    Ok(Value::Bool(matches!(need(args, 0, "is_map")?, Value::Map(_))))
}

fn guard_is_map_key(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let map = need_map(args, 0, "is_map_key")?;
    let key = need(args, 1, "is_map_key")?;
    Ok(Value::Bool(map.contains_key(key)))
}

fn guard_is_nil(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    Ok(Value::Bool(matches!(need(args, 0, "is_nil")?, Value::Nil)))
}

fn guard_is_number(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    Ok(Value::Bool(matches!(
        need(args, 0, "is_number")?,
        Value::Int(_) | Value::Float(_)
    )))
}

fn guard_is_tuple(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    Ok(Value::Bool(matches!(need(args, 0, "is_tuple")?, Value::Tuple(_))))
}

// ── String ─────────────────────────────────────────────────────────

fn string_at(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let s = need_str(args, 0, "String.at")?;
    let index = need_int(args, 1, "String.at")?;
    let chars: Vec<char> = s.chars().collect();
    let index = if index < 0 {
        let back = chars.len() as i64 + index;
        if back < 0 {
            return Ok(Value::Nil);
        }
        back as usize
    } else {
        index as usize
    };
    Ok(chars
        .get(index)
        .map(|c| Value::string(c.to_string()))
        .unwrap_or(Value::Nil))
}

fn string_capitalize(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let s = need_str(args, 0, "String.capitalize")?;
    let mut chars = s.chars();
    let out = match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    };
    Ok(Value::string(out))
}

fn string_contains(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let s = need_str(args, 0, "String.contains?")?;
    let sub = need_str(args, 1, "String.contains?")?;
    Ok(Value::Bool(s.contains(sub)))
}

fn string_downcase(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let s = need_str(args, 0, "String.downcase")?;
    Ok(Value::string(s.to_lowercase()))
}

fn string_duplicate(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let s = need_str(args, 0, "String.duplicate")?;
    let times = need_int(args, 1, "String.duplicate")?.max(0) as usize;
    Ok(Value::string(s.repeat(times)))
}

fn string_ends_with(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let s = need_str(args, 0, "String.ends_with?")?;
    let suffix = need_str(args, 1, "String.ends_with?")?;
    Ok(Value::Bool(s.ends_with(suffix)))
}

fn string_first(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let s = need_str(args, 0, "String.first")?;
    Ok(s.chars()
        .next()
        .map(|c| Value::string(c.to_string()))
        .unwrap_or(Value::Nil))
}

fn string_last(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let s = need_str(args, 0, "String.last")?;
    Ok(s.chars()
        .next_back()
        .map(|c| Value::string(c.to_string()))
        .unwrap_or(Value::Nil))
}

fn string_length(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let s = need_str(args, 0, "String.length")?;
    Ok(Value::Int(s.chars().count() as i64))
}

fn string_pad_leading(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    pad(args, "String.pad_leading", true)
}

fn string_pad_trailing(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    pad(args, "String.pad_trailing", false)
}

fn pad(args: &[Value], fun: &str, leading: bool) -> Result<Value, EvalError> {
    let s = need_str(args, 0, fun)?;
    let width = need_int(args, 1, fun)?.max(0) as usize;
    let filler = if args.len() > 2 {
        need_str(args, 2, fun)?
    } else {
        " "
    };
    let current = s.chars().count();
    if current >= width || filler.is_empty() {
        return Ok(Value::string(s));
    }
    let mut padding = String::new();
    while padding.chars().count() < width - current {
        padding.push_str(filler);
    }
    let padding: String = padding.chars().take(width - current).collect();
    let out = if leading {
        format!("{padding}{s}")
    } else {
        format!("{s}{padding}")
    };
    Ok(Value::string(out))
}

fn string_replace(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let s = need_str(args, 0, "String.replace")?;
    let replacement = need_str(args, 2, "String.replace")?;
    match need(args, 1, "String.replace")? {
        Value::Str(pattern) => Ok(Value::string(s.replace(pattern.as_ref(), replacement))),
        Value::Regex(re) => Ok(Value::string(re.replace_all(s, replacement).into_owned())),
        other => Err(EvalError::argument(format!(
            "String.replace expected a pattern, got: {}",
            other.inspect()
        ))),
    }
}

fn string_reverse(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let s = need_str(args, 0, "String.reverse")?;
    Ok(Value::string(s.chars().rev().collect::<String>()))
}

fn string_slice(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let s = need_str(args, 0, "String.slice")?;
    let start = need_int(args, 1, "String.slice")?;
    let len = need_int(args, 2, "String.slice")?.max(0) as usize;
    let chars: Vec<char> = s.chars().collect();
    let start = if start < 0 {
        let back = chars.len() as i64 + start;
        if back < 0 {
            return Ok(Value::string(""));
        }
        back as usize
    } else {
        start as usize
    };
    if start >= chars.len() {
        return Ok(Value::string(""));
    }
    let out: String = chars[start..].iter().take(len).collect();
    Ok(Value::string(out))
}

fn string_split(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let s = need_str(args, 0, "String.split")?;
    match args.len() {
        1 => Ok(Value::list(
            s.split_whitespace().map(Value::string).collect(),
        )),
        2 => match &args[1] {
            Value::Str(sep) => Ok(Value::list(
                s.split(sep.as_ref()).map(Value::string).collect(),
            )),
            Value::Regex(re) => Ok(Value::list(re.split(s).map(Value::string).collect())),
            other => Err(EvalError::argument(format!(
                "String.split expected a pattern, got: {}",
                other.inspect()
            ))),
        },
        n => Err(wrong_arity("String.split", n)),
    }
}

fn string_starts_with(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let s = need_str(args, 0, "String.starts_with?")?;
    let prefix = need_str(args, 1, "String.starts_with?")?;
    Ok(Value::Bool(s.starts_with(prefix)))
}

fn string_to_float(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let s = need_str(args, 0, "String.to_float")?;
    s.trim()
        .parse::<f64>()
        .map(Value::Float)
        .map_err(|_| EvalError::argument("argument error"))
}

fn string_to_integer(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let s = need_str(args, 0, "String.to_integer")?;
    s.trim()
        .parse::<i64>()
        .map(Value::Int)
        .map_err(|_| EvalError::argument("argument error"))
}

fn string_trim(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let s = need_str(args, 0, "String.trim")?;
    Ok(Value::string(s.trim()))
}

fn string_trim_leading(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let s = need_str(args, 0, "String.trim_leading")?;
    Ok(Value::string(s.trim_start()))
}

fn string_trim_trailing(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let s = need_str(args, 0, "String.trim_trailing")?;
    Ok(Value::string(s.trim_end()))
}

fn string_upcase(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let s = need_str(args, 0, "String.upcase")?;
    Ok(Value::string(s.to_uppercase()))
}

fn string_graphemes(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let s = need_str(args, 0, "String.graphemes")?;
    Ok(Value::list(
        s.chars().map(|c| Value::string(c.to_string())).collect(),
    ))
}

// ── Enum ───────────────────────────────────────────────────────────

fn enum_all(args: &[Value], ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let items = enumerable(need(args, 0, "Enum.all?")?, "Enum.all?")?;
    let fun = need(args, 1, "Enum.all?")?;
    for item in &items {
        if !ctx.apply(fun, &[item.clone()])?.is_truthy() {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

fn enum_any(args: &[Value], ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let items = enumerable(need(args, 0, "Enum.any?")?, "Enum.any?")?;
    let fun = need(args, 1, "Enum.any?")?;
    for item in &items {
        if ctx.apply(fun, &[item.clone()])?.is_truthy() {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn enum_at(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let items = enumerable(need(args, 0, "Enum.at")?, "Enum.at")?;
    let index = need_int(args, 1, "Enum.at")?;
    let default = args.get(2).cloned().unwrap_or(Value::Nil);
    let index = if index < 0 {
        items.len() as i64 + index
    } else {
        index
    };
    if index < 0 {
        return Ok(default);
    }
    Ok(items.get(index as usize).cloned().unwrap_or(default))
}

fn enum_concat(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    match args.len() {
        1 => {
            let lists = need_list(args, 0, "Enum.concat")?;
            let mut out = Vec::new();
            for list in lists {
                out.extend(enumerable(list, "Enum.concat")?);
            }
            Ok(Value::list(out))
        }
        2 => {
            let mut out = enumerable(&args[0], "Enum.concat")?;
            out.extend(enumerable(&args[1], "Enum.concat")?);
            Ok(Value::list(out))
        }
        n => Err(wrong_arity("Enum.concat", n)),
    }
}

fn enum_count(args: &[Value], ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let items = enumerable(need(args, 0, "Enum.count")?, "Enum.count")?;
    match args.len() {
        1 => Ok(Value::Int(items.len() as i64)),
        2 => {
            let fun = &args[1];
            let mut count = 0i64;
            for item in &items {
                if ctx.apply(fun, &[item.clone()])?.is_truthy() {
                    count += 1;
                }
            }
            Ok(Value::Int(count))
        }
        n => Err(wrong_arity("Enum.count", n)),
    }
}

fn enum_drop(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let items = enumerable(need(args, 0, "Enum.drop")?, "Enum.drop")?;
    let n = need_int(args, 1, "Enum.drop")?;
    let out = if n >= 0 {
        items.into_iter().skip(n as usize).collect()
    } else {
        let keep = items.len().saturating_sub(n.unsigned_abs() as usize);
        items.into_iter().take(keep).collect()
    };
    Ok(Value::list(out))
}

fn enum_empty(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let items = enumerable(need(args, 0, "Enum.empty?")?, "Enum.empty?")?;
    Ok(Value::Bool(items.is_empty()))
}

fn enum_filter(args: &[Value], ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let items = enumerable(need(args, 0, "Enum.filter")?, "Enum.filter")?;
    let fun = need(args, 1, "Enum.filter")?;
    let mut out = Vec::new();
    for item in items {
        if ctx.apply(fun, &[item.clone()])?.is_truthy() {
            out.push(item);
        }
    }
    Ok(Value::list(out))
}

fn enum_find(args: &[Value], ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let items = enumerable(need(args, 0, "Enum.find")?, "Enum.find")?;
    let fun = need(args, 1, "Enum.find")?;
    for item in items {
        if ctx.apply(fun, &[item.clone()])?.is_truthy() {
            return Ok(item);
        }
    }
    Ok(Value::Nil)
}

fn enum_flat_map(args: &[Value], ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let items = enumerable(need(args, 0, "Enum.flat_map")?, "Enum.flat_map")?;
    let fun = need(args, 1, "Enum.flat_map")?;
    let mut out = Vec::new();
    for item in items {
        match ctx.apply(fun, &[item])? {
            Value::List(inner) => out.extend(inner.iter().cloned()),
            other => {
                return Err(EvalError::argument(format!(
                    "Enum.flat_map expected a list, got: {}",
                    other.inspect()
                )));
            }
        }
    }
    Ok(Value::list(out))
}

fn enum_join(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let items = enumerable(need(args, 0, "Enum.join")?, "Enum.join")?;
    let sep = if args.len() > 1 {
        need_str(args, 1, "Enum.join")?
    } else {
        ""
    };
    let parts: Vec<String> = items.iter().map(Value::display_string).collect();
    Ok(Value::string(parts.join(sep)))
}

fn enum_map(args: &[Value], ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let items = enumerable(need(args, 0, "Enum.map")?, "Enum.map")?;
    let fun = need(args, 1, "Enum.map")?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        out.push(ctx.apply(fun, &[item])?);
    }
    Ok(Value::list(out))
}

fn enum_max(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let items = enumerable(need(args, 0, "Enum.max")?, "Enum.max")?;
    items
        .into_iter()
        .max_by(|a, b| compare_values(a, b))
        .ok_or_else(|| EvalError::argument("empty error"))
}

fn enum_member(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let items = enumerable(need(args, 0, "Enum.member?")?, "Enum.member?")?;
    let needle = need(args, 1, "Enum.member?")?;
    Ok(Value::Bool(items.iter().any(|item| item == needle)))
}

fn enum_min(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let items = enumerable(need(args, 0, "Enum.min")?, "Enum.min")?;
    items
        .into_iter()
        .min_by(|a, b| compare_values(a, b))
        .ok_or_else(|| EvalError::argument("empty error"))
}

fn enum_reduce(args: &[Value], ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    match args.len() {
        2 => {
            let items = enumerable(&args[0], "Enum.reduce")?;
            let fun = &args[1];
            let mut iter = items.into_iter();
            let mut acc = iter
                .next()
                .ok_or_else(|| EvalError::argument("empty error"))?;
            for item in iter {
                acc = ctx.apply(fun, &[item, acc])?;
            }
            Ok(acc)
        }
        3 => {
            let items = enumerable(&args[0], "Enum.reduce")?;
            let fun = &args[2];
            let mut acc = args[1].clone();
            for item in items {
                acc = ctx.apply(fun, &[item, acc])?;
            }
            Ok(acc)
        }
        n => Err(wrong_arity("Enum.reduce", n)),
    }
}

fn enum_reject(args: &[Value], ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let items = enumerable(need(args, 0, "Enum.reject")?, "Enum.reject")?;
    let fun = need(args, 1, "Enum.reject")?;
    let mut out = Vec::new();
    for item in items {
        if !ctx.apply(fun, &[item.clone()])?.is_truthy() {
            out.push(item);
        }
    }
    Ok(Value::list(out))
}

fn enum_reverse(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let mut items = enumerable(need(args, 0, "Enum.reverse")?, "Enum.reverse")?;
    items.reverse();
    Ok(Value::list(items))
}

fn enum_sort(args: &[Value], ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let mut items = enumerable(need(args, 0, "Enum.sort")?, "Enum.sort")?;
    match args.len() {
        1 => {
            items.sort_by(compare_values);
            Ok(Value::list(items))
        }
        2 => {
            let fun = &args[1];
            let mut error = None;
            items.sort_by(|a, b| {
                if error.is_some() {
                    return Ordering::Equal;
                }
                match ctx.apply(fun, &[a.clone(), b.clone()]) {
                    Ok(keep) => {
                        if keep.is_truthy() {
                            Ordering::Less
                        } else {
                            Ordering::Greater
                        }
                    }
                    Err(e) => {
                        error = Some(e);
                        Ordering::Equal
                    }
                }
            });
            match error {
                Some(e) => Err(e),
                None => Ok(Value::list(items)),
            }
        }
        n => Err(wrong_arity("Enum.sort", n)),
    }
}

fn enum_sum(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let items = enumerable(need(args, 0, "Enum.sum")?, "Enum.sum")?;
    let mut int_sum = 0i64;
    let mut float_sum = 0.0f64;
    let mut saw_float = false;
    for item in &items {
        match item {
            Value::Int(n) => int_sum = int_sum.checked_add(*n).ok_or(EvalError::Arithmetic)?,
            Value::Float(f) => {
                saw_float = true;
                float_sum += f;
            }
            _ => return Err(EvalError::Arithmetic),
        }
    }
    if saw_float {
        Ok(Value::Float(float_sum + int_sum as f64))
    } else {
        Ok(Value::Int(int_sum))
    }
}

fn enum_take(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let items = enumerable(need(args, 0, "Enum.take")?, "Enum.take")?;
    let n = need_int(args, 1, "Enum.take")?;
    let out: Vec<Value> = if n >= 0 {
        items.into_iter().take(n as usize).collect()
    } else {
        let skip = items.len().saturating_sub(n.unsigned_abs() as usize);
        items.into_iter().skip(skip).collect()
    };
    Ok(Value::list(out))
}

fn enum_uniq(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let items = enumerable(need(args, 0, "Enum.uniq")?, "Enum.uniq")?;
    let mut out: Vec<Value> = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    Ok(Value::list(out))
}

fn enum_with_index(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let items = enumerable(need(args, 0, "Enum.with_index")?, "Enum.with_index")?;
    let out = items
        .into_iter()
        .enumerate()
        .map(|(index, item)| Value::tuple(vec![item, Value::Int(index as i64)]))
        .collect();
    Ok(Value::list(out))
}

fn enum_zip(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let left = enumerable(need(args, 0, "Enum.zip")?, "Enum.zip")?;
    let right = enumerable(need(args, 1, "Enum.zip")?, "Enum.zip")?;
    let out = left
        .into_iter()
        .zip(right)
        .map(|(a, b)| Value::tuple(vec![a, b]))
        .collect();
    Ok(Value::list(out))
}

// ── Map ────────────────────────────────────────────────────────────

fn map_delete(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let map = need_map(args, 0, "Map.delete")?;
    let key = need(args, 1, "Map.delete")?;
    let mut out = map.clone();
    out.remove(key);
    Ok(Value::map(out))
}

fn map_fetch(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let map = need_map(args, 0, "Map.fetch")?;
    let key = need(args, 1, "Map.fetch")?;
    Ok(match map.get(key) {
        Some(value) => Value::tuple(vec![Value::atom("ok"), value.clone()]),
        None => Value::atom("error"),
    })
}

fn map_fetch_bang(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let map = need_map(args, 0, "Map.fetch!")?;
    let key = need(args, 1, "Map.fetch!")?;
    map.get(key)
        .cloned()
        .ok_or_else(|| EvalError::KeyError(key.inspect()))
}

fn map_get(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let map = need_map(args, 0, "Map.get")?;
    let key = need(args, 1, "Map.get")?;
    let default = args.get(2).cloned().unwrap_or(Value::Nil);
    Ok(map.get(key).cloned().unwrap_or(default))
}

fn map_has_key(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let map = need_map(args, 0, "Map.has_key?")?;
    let key = need(args, 1, "Map.has_key?")?;
    Ok(Value::Bool(map.contains_key(key)))
}

fn map_keys(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let map = need_map(args, 0, "Map.keys")?;
    Ok(Value::list(map.keys().cloned().collect()))
}

fn map_merge(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let left = need_map(args, 0, "Map.merge")?;
    let right = need_map(args, 1, "Map.merge")?;
    let mut out = left.clone();
    for (k, v) in right {
        out.insert(k.clone(), v.clone());
    }
    Ok(Value::map(out))
}

fn map_new(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    match args.len() {
        0 => Ok(Value::map(BTreeMap::new())),
        1 => {
            let items = enumerable(&args[0], "Map.new")?;
            let mut out = BTreeMap::new();
            for item in items {
                match item {
                    Value::Tuple(pair) if pair.len() == 2 => {
                        out.insert(pair[0].clone(), pair[1].clone());
                    }
                    other => {
                        return Err(EvalError::argument(format!(
                            "Map.new expected {{key, value}} tuples, got: {}",
                            other.inspect()
                        )));
                    }
                }
            }
            Ok(Value::map(out))
        }
        n => Err(wrong_arity("Map.new", n)),
    }
}

fn map_put(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let map = need_map(args, 0, "Map.put")?;
    let key = need(args, 1, "Map.put")?;
    let value = need(args, 2, "Map.put")?;
    let mut out = map.clone();
    out.insert(key.clone(), value.clone());
    Ok(Value::map(out))
}

fn map_put_new(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let map = need_map(args, 0, "Map.put_new")?;
    let key = need(args, 1, "Map.put_new")?;
    let value = need(args, 2, "Map.put_new")?;
    if map.contains_key(key) {
        return Ok(Value::map(map.clone()));
    }
    let mut out = map.clone();
    out.insert(key.clone(), value.clone());
    Ok(Value::map(out))
}

fn map_to_list(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let map = need_map(args, 0, "Map.to_list")?;
    Ok(Value::list(
        map.iter()
            .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
            .collect(),
    ))
}

fn map_values(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let map = need_map(args, 0, "Map.values")?;
    Ok(Value::list(map.values().cloned().collect()))
}

// ── List ───────────────────────────────────────────────────────────

fn list_delete(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let items = need_list(args, 0, "List.delete")?;
    let needle = need(args, 1, "List.delete")?;
    let mut out = items.to_vec();
    if let Some(position) = out.iter().position(|item| item == needle) {
        out.remove(position);
    }
    Ok(Value::list(out))
}

fn list_duplicate(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let item = need(args, 0, "List.duplicate")?;
    let times = need_int(args, 1, "List.duplicate")?.max(0) as usize;
    Ok(Value::list(vec![item.clone(); times]))
}

fn list_first(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let items = need_list(args, 0, "List.first")?;
    Ok(items.first().cloned().unwrap_or(Value::Nil))
}

fn list_flatten(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    fn flatten_into(value: &Value, out: &mut Vec<Value>) {
        match value {
            Value::List(items) => {
                for item in items.iter() {
                    flatten_into(item, out);
                }
            }
            other => out.push(other.clone()),
        }
    }
    let items = need_list(args, 0, "List.flatten")?;
    let mut out = Vec::new();
    for item in items {
        flatten_into(item, &mut out);
    }
    Ok(Value::list(out))
}

fn list_insert_at(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let items = need_list(args, 0, "List.insert_at")?;
    let index = need_int(args, 1, "List.insert_at")?;
    let value = need(args, 2, "List.insert_at")?;
    let mut out = items.to_vec();
    let index = if index < 0 {
        (out.len() as i64 + index + 1).max(0) as usize
    } else {
        (index as usize).min(out.len())
    };
    out.insert(index, value.clone());
    Ok(Value::list(out))
}

fn list_last(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let items = need_list(args, 0, "List.last")?;
    Ok(items.last().cloned().unwrap_or(Value::Nil))
}

fn list_wrap(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    match need(args, 0, "List.wrap")? {
        Value::Nil => Ok(Value::list(Vec::new())),
        Value::List(items) => Ok(Value::List(items.clone())),
        other => Ok(Value::list(vec![other.clone()])),
    }
}

// ── Tuple ──────────────────────────────────────────────────────────

fn tuple_to_list(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    match need(args, 0, "Tuple.to_list")? {
        Value::Tuple(items) => Ok(Value::list(items.as_ref().clone())),
        other => Err(EvalError::argument(format!(
            "Tuple.to_list expected a tuple, got: {}",
            other.inspect()
        ))),
    }
}

// ── Integer / Float ────────────────────────────────────────────────

fn integer_digits(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let n = need_int(args, 0, "Integer.digits")?;
    let digits: Vec<Value> = n
        .abs()
        .to_string()
        .chars()
        .filter_map(|c| c.to_digit(10))
        .map(|d| Value::Int(i64::from(d)))
        .collect();
    Ok(Value::list(digits))
}

fn integer_mod(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let a = need_int(args, 0, "Integer.mod")?;
    let b = need_int(args, 1, "Integer.mod")?;
    if b == 0 {
        return Err(EvalError::Arithmetic);
    }
    Ok(Value::Int(a.rem_euclid(b)))
}

fn integer_parse(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let s = need_str(args, 0, "Integer.parse")?;
    let trimmed = s.trim_start();
    let end = trimmed
        .char_indices()
        .take_while(|(i, c)| c.is_ascii_digit() || (*i == 0 && (*c == '-' || *c == '+')))
        .map(|(i, c)| i + c.len_utf8())
        .last()
        .unwrap_or(0);
    match trimmed[..end].parse::<i64>() {
        Ok(n) => Ok(Value::tuple(vec![
            Value::Int(n),
            Value::string(&trimmed[end..]),
        ])),
        Err(_) => Ok(Value::atom("error")),
    }
}

fn integer_pow(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let base = need_int(args, 0, "Integer.pow")?;
    let exp = need_int(args, 1, "Integer.pow")?;
    if exp < 0 {
        return Err(EvalError::Arithmetic);
    }
    base.checked_pow(exp.min(u32::MAX as i64) as u32)
        .map(Value::Int)
        .ok_or(EvalError::Arithmetic)
}

fn integer_to_string(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let n = need_int(args, 0, "Integer.to_string")?;
    Ok(Value::string(n.to_string()))
}

fn float_ceil(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let n = need_num(args, 0, "Float.ceil")?;
    Ok(Value::Float(n.ceil()))
}

fn float_floor(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let n = need_num(args, 0, "Float.floor")?;
    Ok(Value::Float(n.floor()))
}

fn float_parse(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let s = need_str(args, 0, "Float.parse")?;
    match s.trim().parse::<f64>() {
        Ok(f) => Ok(Value::tuple(vec![Value::Float(f), Value::string("")])),
        Err(_) => Ok(Value::atom("error")),
    }
}

fn float_round(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let n = need_num(args, 0, "Float.round")?;
    let precision = if args.len() > 1 {
        need_int(args, 1, "Float.round")?.clamp(0, 15)
    } else {
        0
    };
    let factor = 10f64.powi(precision as i32);
    Ok(Value::Float((n * factor).round() / factor))
}

fn float_to_string(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let n = need_num(args, 0, "Float.to_string")?;
    Ok(Value::string(Value::Float(n).display_string()))
}

// ── Access ─────────────────────────────────────────────────────────

fn access_get(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let key = need(args, 1, "Access.get")?;
    match need(args, 0, "Access.get")? {
        Value::Map(map) => Ok(map.get(key).cloned().unwrap_or(Value::Nil)),
        Value::Nil => Ok(Value::Nil),
        // Keyword-list access: first `{key, value}` tuple wins.
        Value::List(items) => {
            for item in items.iter() {
                if let Value::Tuple(pair) = item {
                    if pair.len() == 2 && &pair[0] == key {
                        return Ok(pair[1].clone());
                    }
                }
            }
            Ok(Value::Nil)
        }
        other => Err(EvalError::argument(format!(
            "Access.get expected a map, got: {}",
            other.inspect()
        ))),
    }
}

// ── Regex ──────────────────────────────────────────────────────────

fn regex_match(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let re = need_regex(args, 0, "Regex.match?")?;
    let s = need_str(args, 1, "Regex.match?")?;
    Ok(Value::Bool(re.is_match(s)))
}

fn regex_replace(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let re = need_regex(args, 0, "Regex.replace")?;
    let s = need_str(args, 1, "Regex.replace")?;
    let replacement = need_str(args, 2, "Regex.replace")?;
    Ok(Value::string(re.replace_all(s, replacement).into_owned()))
}

fn regex_run(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let re = need_regex(args, 0, "Regex.run")?;
    let s = need_str(args, 1, "Regex.run")?;
    match re.captures(s) {
        Some(captures) => Ok(Value::list(
            captures
                .iter()
                .map(|group| match group {
                    Some(m) => Value::string(m.as_str()),
                    None => Value::Nil,
                })
                .collect(),
        )),
        None => Ok(Value::Nil),
    }
}

fn regex_scan(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let re = need_regex(args, 0, "Regex.scan")?;
    let s = need_str(args, 1, "Regex.scan")?;
    let out = re
        .captures_iter(s)
        .map(|captures| {
            Value::list(
                captures
                    .iter()
                    .map(|group| match group {
                        Some(m) => Value::string(m.as_str()),
                        None => Value::Nil,
                    })
                    .collect(),
            )
        })
        .collect();
    Ok(Value::list(out))
}

fn regex_split(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let re = need_regex(args, 0, "Regex.split")?;
    let s = need_str(args, 1, "Regex.split")?;
    Ok(Value::list(re.split(s).map(Value::string).collect()))
}

// ── Date ───────────────────────────────────────────────────────────

fn date_add(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let date = need_date(args, 0, "Date.add")?;
    let days = need_int(args, 1, "Date.add")?;
    date.checked_add_signed(chrono::Duration::days(days))
        .map(Value::Date)
        .ok_or_else(|| EvalError::argument("argument error"))
}

fn date_compare(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let a = need_date(args, 0, "Date.compare")?;
    let b = need_date(args, 1, "Date.compare")?;
    Ok(Value::atom(match a.cmp(&b) {
        Ordering::Less => "lt",
        Ordering::Equal => "eq",
        Ordering::Greater => "gt",
    }))
}

fn date_day_of_week(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    use chrono::Datelike;
    let date = need_date(args, 0, "Date.day_of_week")?;
    Ok(Value::Int(i64::from(date.weekday().number_from_monday())))
}

fn date_diff(args: &[Value], _ctx: &mut CallCtx<'_>) -> Result<Value, EvalError> {
    let a = need_date(args, 0, "Date.diff")?;
    let b = need_date(args, 1, "Date.diff")?;
    Ok(Value::Int((a - b).num_days()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{Interp, ModuleUnit};
    use crate::parser::parse;
    use crate::shape::validate_shape;

    fn run_body(body: &str, args: &[Value]) -> Result<Value, EvalError> {
        let source = format!("defmodule Sandbox do\n  def run(a) do\n    {body}\n  end\nend");
        let root = parse(&source).expect("parse");
        let shape = validate_shape(&root).expect("shape");
        let unit = ModuleUnit::compile("Sandbox", 0, &shape);
        let builtins = Builtins::standard();
        Interp::new(&unit, &builtins).invoke("run", args)
    }

    #[test]
    fn enum_map_with_anonymous_fn() {
        let v = run_body(
            "Enum.map(a, fn x -> x * 2 end)",
            &[Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)])],
        )
        .unwrap();
        assert_eq!(
            v,
            Value::list(vec![Value::Int(2), Value::Int(4), Value::Int(6)])
        );
    }

    #[test]
    fn enum_reduce_threads_accumulator() {
        let v = run_body(
            "Enum.reduce(a, 0, fn x, acc -> acc + x end)",
            &[Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)])],
        )
        .unwrap();
        assert_eq!(v, Value::Int(6));
    }

    #[test]
    fn enum_filter_and_sum() {
        let v = run_body(
            "a |> Enum.filter(fn x -> x > 1 end) |> Enum.sum()",
            &[Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)])],
        )
        .unwrap();
        assert_eq!(v, Value::Int(5));
    }

    #[test]
    fn string_builtins_compose() {
        let v = run_body("a |> String.trim() |> String.split(\" \")", &[Value::string(" x y ")]).unwrap();
        assert_eq!(v, Value::list(vec![Value::string("x"), Value::string("y")]));
    }

    #[test]
    fn map_builtins_round_trip() {
        let v = run_body(
            "m = Map.new()\n    m = Map.put(m, :k, 1)\n    {Map.get(m, :k), Map.has_key?(m, :missing)}",
            &[Value::Nil],
        )
        .unwrap();
        assert_eq!(v, Value::tuple(vec![Value::Int(1), Value::Bool(false)]));
    }

    #[test]
    fn kernel_locals_dispatch_without_module() {
        let v = run_body("max(abs(a), 3)", &[Value::Int(-10)]).unwrap();
        assert_eq!(v, Value::Int(10));
    }

    #[test]
    fn regex_over_sigil_values() {
        let v = run_body("Regex.match?(~r/\\d+/, a)", &[Value::string("abc123")]).unwrap();
        assert_eq!(v, Value::Bool(true));
    }

    #[test]
    fn date_arithmetic() {
        let v = run_body("Date.diff(Date.add(~D[2024-01-01], 31), ~D[2024-01-01])", &[Value::Nil])
            .unwrap();
        assert_eq!(v, Value::Int(31));
    }

    #[test]
    fn captures_are_applicable() {
        let v = run_body(
            "Enum.map(a, &String.upcase/1)",
            &[Value::list(vec![Value::string("a"), Value::string("b")])],
        )
        .unwrap();
        assert_eq!(v, Value::list(vec![Value::string("A"), Value::string("B")]));
    }

    #[test]
    fn undefined_builtin_raises() {
        let err = run_body("Map.unknown_fn(a)", &[Value::Nil]).unwrap_err();
        assert!(err.to_string().contains("undefined function Map.unknown_fn/1"));
    }

    #[test]
    fn integer_parse_splits_rest() {
        let v = run_body("Integer.parse(a)", &[Value::string("42km")]).unwrap();
        assert_eq!(
            v,
            Value::tuple(vec![Value::Int(42), Value::string("km")])
        );
    }
}
