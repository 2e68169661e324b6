use crate::ast::Clause;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::{Map, Number, Value as Json};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Runtime value of the sandboxed language.
///
/// `Int`, `Float`, `Bool` and the calendar types are fully inline.
/// `Atom`, `Str`, `List`, `Tuple`, `Map` and `Fun` use `Arc` for cheap
/// cloning and so cached modules can be shared across threads.
///
/// `PartialEq`/`Ord` implement the *strict* structural term order (map-key
/// semantics, `===`); [`Value::loose_eq`] is the numeric-coercing `==`.
#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Atom(Arc<str>),
    Str(Arc<str>),
    List(Arc<Vec<Value>>),
    Tuple(Arc<Vec<Value>>),
    Map(Arc<BTreeMap<Value, Value>>),
    Fun(Arc<FunValue>),
    Regex(Arc<regex::Regex>),
    Date(NaiveDate),
    Time(NaiveTime),
    NaiveDateTime(NaiveDateTime),
    DateTime(DateTime<Utc>),
}

/// A first-class function: an anonymous `fn` with its captured bindings, or
/// a named capture resolved later by the interpreter.
#[derive(Debug)]
pub enum FunValue {
    Anonymous {
        clauses: Vec<Clause>,
        captured: Vec<(String, Value)>,
    },
    LocalCapture {
        name: String,
        arity: usize,
    },
    RemoteCapture {
        module: String,
        name: String,
        arity: usize,
    },
}

impl FunValue {
    pub fn arity(&self) -> Option<usize> {
        match self {
            FunValue::Anonymous { clauses, .. } => clauses.first().map(|c| c.patterns.len()),
            FunValue::LocalCapture { arity, .. } | FunValue::RemoteCapture { arity, .. } => {
                Some(*arity)
            }
        }
    }
}

impl Value {
    /// `nil`, `true` and `false` are atoms; normalize so the dedicated
    /// variants stay canonical.
    pub fn atom(name: &str) -> Self {
        match name {
            "nil" => Value::Nil,
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::Atom(Arc::from(name)),
        }
    }

    pub fn string(s: impl AsRef<str>) -> Self {
        Value::Str(Arc::from(s.as_ref()))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Arc::new(items))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Arc::new(items))
    }

    pub fn map(entries: BTreeMap<Value, Value>) -> Self {
        Value::Map(Arc::new(entries))
    }

    /// Only `nil` and `false` are falsy.
    #[inline]
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    #[inline]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    #[inline]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_ref()),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Atom(_) => "atom",
            Value::Str(_) => "binary",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Map(_) => "map",
            Value::Fun(_) => "function",
            Value::Regex(_) => "regex",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::NaiveDateTime(_) => "naive_datetime",
            Value::DateTime(_) => "datetime",
        }
    }

    /// Numeric-coercing equality (`==`): `1 == 1.0` holds.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self.as_number(), other.as_number()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }

    /// `to_string/1` rendering: bare text for scalars.
    pub fn display_string(&self) -> String {
        match self {
            Value::Nil => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(n) => n.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Atom(a) => a.to_string(),
            Value::Str(s) => s.to_string(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::Time(t) => t.format("%H:%M:%S").to_string(),
            Value::NaiveDateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            Value::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%SZ").to_string(),
            other => other.inspect(),
        }
    }

    /// `inspect/1`-style rendering: atoms with `:`, strings quoted.
    pub fn inspect(&self) -> String {
        match self {
            Value::Nil => "nil".into(),
            Value::Bool(b) => b.to_string(),
            Value::Int(n) => n.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Atom(a) => format!(":{a}"),
            Value::Str(s) => format!("{s:?}"),
            Value::List(items) => {
                let inner: Vec<String> = items.iter().map(Value::inspect).collect();
                format!("[{}]", inner.join(", "))
            }
            Value::Tuple(items) => {
                let inner: Vec<String> = items.iter().map(Value::inspect).collect();
                format!("{{{}}}", inner.join(", "))
            }
            Value::Map(entries) => {
                let inner: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| match k {
                        Value::Atom(a) => format!("{a}: {}", v.inspect()),
                        other => format!("{} => {}", other.inspect(), v.inspect()),
                    })
                    .collect();
                format!("%{{{}}}", inner.join(", "))
            }
            Value::Fun(f) => match f.arity() {
                Some(arity) => format!("#Function<{arity}>"),
                None => "#Function<>".into(),
            },
            Value::Regex(re) => format!("~r/{}/", re.as_str()),
            Value::Date(d) => format!("~D[{}]", d.format("%Y-%m-%d")),
            Value::Time(t) => format!("~T[{}]", t.format("%H:%M:%S")),
            Value::NaiveDateTime(dt) => format!("~N[{}]", dt.format("%Y-%m-%d %H:%M:%S")),
            Value::DateTime(dt) => format!("~U[{}]", dt.format("%Y-%m-%dT%H:%M:%SZ")),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Int(_) | Value::Float(_) => 0,
            Value::Nil | Value::Bool(_) | Value::Atom(_) => 1,
            Value::Fun(_) => 2,
            Value::Tuple(_) => 3,
            Value::Map(_)
            | Value::Regex(_)
            | Value::Date(_)
            | Value::Time(_)
            | Value::NaiveDateTime(_)
            | Value::DateTime(_) => 4,
            Value::List(_) => 5,
            Value::Str(_) => 6,
        }
    }

    fn atom_text(&self) -> &str {
        match self {
            Value::Nil => "nil",
            Value::Bool(true) => "true",
            Value::Bool(false) => "false",
            Value::Atom(a) => a.as_ref(),
            _ => "",
        }
    }
}

fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.is_finite() {
        format!("{f:.1}")
    } else {
        f.to_string()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    /// Total structural term order: numbers < atoms < functions < tuples <
    /// maps < lists < binaries. Numbers compare numerically across kinds,
    /// with `Int` ordered before a numerically equal `Float` so map keys
    /// stay strict.
    fn cmp(&self, other: &Self) -> Ordering {
        let (ra, rb) = (self.rank(), other.rank());
        if ra != rb {
            return ra.cmp(&rb);
        }
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Value::Int(a), Value::Float(b)) => (*a as f64)
                .partial_cmp(b)
                .unwrap_or(Ordering::Equal)
                .then(Ordering::Less),
            (Value::Float(a), Value::Int(b)) => a
                .partial_cmp(&(*b as f64))
                .unwrap_or(Ordering::Equal)
                .then(Ordering::Greater),
            (a, b) if a.rank() == 1 => a.atom_text().cmp(b.atom_text()),
            (Value::Fun(a), Value::Fun(b)) => {
                (Arc::as_ptr(a) as usize).cmp(&(Arc::as_ptr(b) as usize))
            }
            (Value::Tuple(a), Value::Tuple(b)) => {
                a.len().cmp(&b.len()).then_with(|| a.iter().cmp(b.iter()))
            }
            (Value::Map(a), Value::Map(b)) => a
                .len()
                .cmp(&b.len())
                .then_with(|| a.iter().cmp(b.iter())),
            (Value::List(a), Value::List(b)) => a.iter().cmp(b.iter()),
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (Value::Regex(a), Value::Regex(b)) => a.as_str().cmp(b.as_str()),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::Time(a), Value::Time(b)) => a.cmp(b),
            (Value::NaiveDateTime(a), Value::NaiveDateTime(b)) => a.cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
            // Distinct struct-like kinds sharing rank 4.
            (a, b) => struct_order(a).cmp(&struct_order(b)),
        }
    }
}

fn struct_order(v: &Value) -> u8 {
    match v {
        Value::Map(_) => 0,
        Value::Regex(_) => 1,
        Value::Date(_) => 2,
        Value::Time(_) => 3,
        Value::NaiveDateTime(_) => 4,
        Value::DateTime(_) => 5,
        _ => 6,
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inspect())
    }
}

impl From<Json> for Value {
    fn from(v: Json) -> Self {
        match v {
            Json::Null => Value::Nil,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Float(f)
                } else {
                    Value::Nil
                }
            }
            Json::String(s) => Value::Str(Arc::from(s.as_str())),
            Json::Array(items) => Value::List(Arc::new(items.into_iter().map(Value::from).collect())),
            Json::Object(obj) => {
                let entries: BTreeMap<Value, Value> = obj
                    .into_iter()
                    .map(|(k, v)| (Value::Str(Arc::from(k.as_str())), Value::from(v)))
                    .collect();
                Value::Map(Arc::new(entries))
            }
        }
    }
}

impl From<&Value> for Json {
    fn from(v: &Value) -> Self {
        match v {
            Value::Nil => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(n) => Json::Number(Number::from(*n)),
            Value::Float(f) => Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null),
            Value::Atom(a) => Json::String(a.to_string()),
            Value::Str(s) => Json::String(s.to_string()),
            Value::List(items) | Value::Tuple(items) => {
                Json::Array(items.iter().map(Json::from).collect())
            }
            Value::Map(entries) => {
                let mut out = Map::new();
                for (k, v) in entries.iter() {
                    out.insert(k.display_string(), Json::from(v));
                }
                Json::Object(out)
            }
            Value::Fun(_) => Json::Null,
            Value::Regex(re) => Json::String(re.as_str().to_string()),
            other => Json::String(other.display_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_is_nil_or_false_only() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Int(0).is_truthy());
        assert!(Value::string("").is_truthy());
    }

    #[test]
    fn loose_eq_crosses_numeric_kinds() {
        assert!(Value::Int(1).loose_eq(&Value::Float(1.0)));
        assert!(!Value::Int(1).loose_eq(&Value::Float(1.5)));
        // strict equality does not
        assert_ne!(Value::Int(1), Value::Float(1.0));
    }

    #[test]
    fn term_order_ranks_types() {
        let mut values = vec![
            Value::string("z"),
            Value::list(vec![]),
            Value::atom("a"),
            Value::Int(99),
            Value::tuple(vec![]),
        ];
        values.sort();
        assert_eq!(values[0], Value::Int(99));
        assert_eq!(values[1], Value::atom("a"));
        assert_eq!(values[2], Value::tuple(vec![]));
        assert_eq!(values[3], Value::list(vec![]));
        assert_eq!(values[4], Value::string("z"));
    }

    #[test]
    fn map_keys_are_strict() {
        let mut entries = BTreeMap::new();
        entries.insert(Value::Int(1), Value::atom("int"));
        entries.insert(Value::Float(1.0), Value::atom("float"));
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn json_round_trip_for_plain_data() {
        let v = Value::from(serde_json::json!({"a": [1, 2.5, "x"], "b": null}));
        let back = Json::from(&v);
        assert_eq!(back, serde_json::json!({"a": [1, 2.5, "x"], "b": null}));
    }

    #[test]
    fn inspect_renders_elixir_shapes() {
        let mut entries = BTreeMap::new();
        entries.insert(Value::atom("price"), Value::Float(100.0));
        let v = Value::map(entries);
        assert_eq!(v.inspect(), "%{price: 100.0}");
        assert_eq!(Value::atom("ok").inspect(), ":ok");
        assert_eq!(Value::tuple(vec![Value::atom("ok"), Value::Int(1)]).inspect(), "{:ok, 1}");
    }
}
