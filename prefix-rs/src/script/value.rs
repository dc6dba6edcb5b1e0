//! Runtime value type for Prefix expressions and variables.
//!
//! Values are loosely typed: strings coerce to numbers in arithmetic, and
//! every value has a truthiness.  Lists and maps exist so that `!loop` has
//! something to iterate and `!param` has somewhere to put its pieces.

use std::fmt;

/// A Prefix runtime value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    /// Ordered string-keyed map; insertion order is iteration order.
    Map(Vec<(String, Value)>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(true) => write!(f, "1"),
            Value::Bool(false) => Ok(()),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::List(_) | Value::Map(_) => write!(f, "Array"),
        }
    }
}

impl Value {
    /// Truthiness: null, `false`, `0`, `""`, `"0"` and empty collections are falsy.
    pub fn as_bool(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(x) => *x != 0.0,
            Value::Str(s) => !s.is_empty() && s != "0",
            Value::List(v) => !v.is_empty(),
            Value::Map(m) => !m.is_empty(),
        }
    }

    /// Coerce to `i64` (0 on failure).
    pub fn as_int(&self) -> i64 {
        match self {
            Value::Null => 0,
            Value::Bool(b) => i64::from(*b),
            Value::Int(n) => *n,
            Value::Float(x) => *x as i64,
            Value::Str(s) => {
                let t = s.trim();
                t.parse()
                    .unwrap_or_else(|_| t.parse::<f64>().map(|x| x as i64).unwrap_or(0))
            }
            Value::List(v) => i64::from(!v.is_empty()),
            Value::Map(m) => i64::from(!m.is_empty()),
        }
    }

    /// Coerce to `f64`.
    pub fn as_float(&self) -> f64 {
        match self {
            Value::Float(x) => *x,
            Value::Str(s) => s.trim().parse().unwrap_or(0.0),
            other => other.as_int() as f64,
        }
    }

    /// Coerce to a string.
    pub fn as_str(&self) -> String {
        self.to_string()
    }

    /// Name of the type, as used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "double",
            Value::Str(_) => "string",
            Value::List(_) | Value::Map(_) => "array",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Key/value pairs for iteration, or `None` if the value is not iterable.
    ///
    /// List keys are the element indices.
    pub fn entries(&self) -> Option<Vec<(Value, Value)>> {
        match self {
            Value::List(v) => Some(
                v.iter()
                    .enumerate()
                    .map(|(i, x)| (Value::Int(i as i64), x.clone()))
                    .collect(),
            ),
            Value::Map(m) => Some(
                m.iter()
                    .map(|(k, x)| (Value::Str(k.clone()), x.clone()))
                    .collect(),
            ),
            _ => None,
        }
    }

    /// Index into a list (by position) or map (by key).
    pub fn index(&self, key: &Value) -> Option<&Value> {
        match self {
            Value::List(v) => usize::try_from(key.as_int()).ok().and_then(|i| v.get(i)),
            Value::Map(m) => {
                let k = key.as_str();
                m.iter().find(|(name, _)| *name == k).map(|(_, v)| v)
            }
            _ => None,
        }
    }

    /// Number of elements for collections, characters for strings.
    pub fn len(&self) -> usize {
        match self {
            Value::List(v) => v.len(),
            Value::Map(m) => m.len(),
            Value::Null => 0,
            other => other.as_str().chars().count(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ── Arithmetic helpers ────────────────────────────────────────────────────

    fn is_floaty(&self) -> bool {
        match self {
            Value::Float(_) => true,
            Value::Str(s) => {
                let t = s.trim();
                t.parse::<i64>().is_err() && t.parse::<f64>().is_ok()
            }
            _ => false,
        }
    }

    /// Determine the common numeric type for a binary operation.
    fn numeric_promote(a: &Value, b: &Value) -> (f64, f64, bool) {
        (a.as_float(), b.as_float(), a.is_floaty() || b.is_floaty())
    }

    fn make_numeric(f: f64, is_float: bool) -> Value {
        if is_float {
            Value::Float(f)
        } else {
            Value::Int(f as i64)
        }
    }

    pub fn arith_add(&self, rhs: &Value) -> Value {
        if !self.is_floaty() && !rhs.is_floaty() {
            return Value::Int(self.as_int().wrapping_add(rhs.as_int()));
        }
        let (a, b, is_float) = Self::numeric_promote(self, rhs);
        Self::make_numeric(a + b, is_float)
    }

    pub fn arith_sub(&self, rhs: &Value) -> Value {
        if !self.is_floaty() && !rhs.is_floaty() {
            return Value::Int(self.as_int().wrapping_sub(rhs.as_int()));
        }
        let (a, b, is_float) = Self::numeric_promote(self, rhs);
        Self::make_numeric(a - b, is_float)
    }

    pub fn arith_mul(&self, rhs: &Value) -> Value {
        if !self.is_floaty() && !rhs.is_floaty() {
            return Value::Int(self.as_int().wrapping_mul(rhs.as_int()));
        }
        let (a, b, is_float) = Self::numeric_promote(self, rhs);
        Self::make_numeric(a * b, is_float)
    }

    /// Division yields an integer only when it is exact.
    pub fn arith_div(&self, rhs: &Value) -> Result<Value, String> {
        let (a, b, is_float) = Self::numeric_promote(self, rhs);
        if b == 0.0 {
            return Err("division by zero".into());
        }
        let q = a / b;
        Ok(Self::make_numeric(q, is_float || q.fract() != 0.0))
    }

    pub fn arith_rem(&self, rhs: &Value) -> Result<Value, String> {
        let b = rhs.as_int();
        if b == 0 {
            return Err("modulo by zero".into());
        }
        Ok(Value::Int(self.as_int().wrapping_rem(b)))
    }

    pub fn arith_neg(&self) -> Value {
        if self.is_floaty() {
            Value::Float(-self.as_float())
        } else {
            Value::Int(self.as_int().wrapping_neg())
        }
    }

    /// String concatenation (`.`).
    pub fn concat(&self, rhs: &Value) -> Value {
        Value::Str(format!("{self}{rhs}"))
    }

    /// Loose comparison: numeric when both sides look numeric, else by string.
    pub fn cmp_value(&self, rhs: &Value) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        if self.looks_numeric() && rhs.looks_numeric() {
            let (a, b, _) = Self::numeric_promote(self, rhs);
            return a.partial_cmp(&b).unwrap_or(Ordering::Equal);
        }
        match (self, rhs) {
            (Value::List(_) | Value::Map(_), _) | (_, Value::List(_) | Value::Map(_)) => {
                if self == rhs {
                    Ordering::Equal
                } else {
                    self.len().cmp(&rhs.len()).then(Ordering::Less)
                }
            }
            _ => self.as_str().cmp(&rhs.as_str()),
        }
    }

    fn looks_numeric(&self) -> bool {
        match self {
            Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) => true,
            Value::Str(s) => s.trim().parse::<f64>().is_ok(),
            _ => false,
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
