//! The `!param` binder.
//!
//! ```text
//! !param [<transform>...] [<separator>] [(<count>|<min>-<max>)] [: <definition>]
//! ```
//!
//! Transforms rewrite the parameter text, the separator splits it into
//! pieces, the count constrains how many pieces there are, and the
//! definition names variables for the pieces.  A definition is either a
//! comma list of names or one `name: nested-spec` per line, where each
//! nested spec is applied to its piece recursively.

use super::builtins::{ucfirst, ucwords};
use super::error::html_escape;
use super::eval::{EvalKind, EvalStatus};
use super::interp::Interpreter;
use super::scope::assign;
use super::value::Value;

/// Separator names and the text they split on.
pub const SEPARATORS: [(&str, &str); 12] = [
    ("colon", ":"),
    ("semicolon", ";"),
    ("comma", ","),
    ("dot", "."),
    ("amp", "&"),
    ("space", " "),
    ("line", "\n"),
    ("tab", "\t"),
    ("pipe", "|"),
    ("dash", "-"),
    ("plus", "+"),
    ("slash", "/"),
];

/// Built-in transform names.
pub const TRANSFORMS: [&str; 12] = [
    "raw", "string", "expr", "code", "php", "layout", "unhtml", "urlify", "upper", "lower",
    "ucfirst", "ucwords",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Count {
    Any,
    Exact(usize),
    Range(usize, usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Names {
    None,
    List(Vec<String>),
    /// `name: nested-spec` lines.
    Nested(Vec<(String, String)>),
}

impl Names {
    fn len(&self) -> usize {
        match self {
            Names::None => 0,
            Names::List(v) => v.len(),
            Names::Nested(v) => v.len(),
        }
    }
}

/// A parsed `!param` specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub transforms: Vec<String>,
    pub separator: Option<&'static str>,
    pub count: Count,
    pub names: Names,
}

impl ParamSpec {
    /// Parse a spec.  `is_custom` tells whether a word is a registered
    /// custom transform.
    pub fn parse(spec: &str, is_custom: impl Fn(&str) -> bool) -> Result<ParamSpec, String> {
        let (head, def) = match spec.split_once(':') {
            Some((h, d)) => (h.trim(), d.trim()),
            None => (spec.trim(), ""),
        };

        let (words, mut count) = match head.split_once('(') {
            None => (head, Count::Any),
            Some((words, rest)) => {
                let inner = rest
                    .strip_suffix(')')
                    .ok_or("Bad syntax for !param, missing )")?;
                let count = match inner.split_once('-') {
                    Some((lo, hi)) => {
                        let (lo, hi) = (leading_int(lo), leading_int(hi));
                        if hi <= lo {
                            return Err(format!(
                                "Error in !param, max count must be larger than min count! ({lo}-{hi})"
                            ));
                        }
                        Count::Range(lo, hi)
                    }
                    None => match leading_int(inner) {
                        0 => Count::Any,
                        n => Count::Exact(n),
                    },
                };
                (words.trim_end(), count)
            }
        };

        let mut transforms = Vec::new();
        let mut separator: Option<(&str, &'static str)> = None;
        let lowered = words.to_lowercase();
        for word in lowered.split(' ').filter(|w| !w.is_empty()) {
            if TRANSFORMS.contains(&word) || is_custom(word) {
                transforms.push(word.to_owned());
            } else if let Some(&(name, sep)) = SEPARATORS.iter().find(|(n, _)| *n == word) {
                if let Some((prev, _)) = separator {
                    return Err(format!(
                        "Error in !param, only one separator allowed, {name} conflicts with {prev}"
                    ));
                }
                separator = Some((name, sep));
            } else {
                return Err(format!("Unknown parameter type: {word}"));
            }
        }

        let names = if def.is_empty() {
            Names::None
        } else if def.contains('\n') {
            Names::Nested(
                def.lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty() && !l.starts_with('#'))
                    .map(|l| match l.split_once(':') {
                        Some((n, d)) => (n.trim().to_owned(), d.trim().to_owned()),
                        None => (l.to_owned(), String::new()),
                    })
                    .collect(),
            )
        } else {
            Names::List(def.split(',').map(|n| n.trim().to_owned()).collect())
        };

        let found = names.len();
        match count {
            Count::Range(_, max) if found > 0 && found != max => {
                return Err(format!(
                    "Variable count mismatch in !param, found {found} variables, but expected up to {max}"
                ));
            }
            Count::Exact(n) if found > 0 && found != n => {
                return Err(format!(
                    "Variable count mismatch in !param, found {found} variables, but expected {n}"
                ));
            }
            Count::Any if found > 0 => count = Count::Exact(found),
            _ => {}
        }

        Ok(ParamSpec {
            transforms,
            separator: separator.map(|(_, s)| s),
            count,
            names,
        })
    }

    /// Split `text` into pieces according to the separator and count.
    ///
    /// Returns `None` when there is no separator and the value stays whole.
    pub fn split(&self, text: &str) -> Result<Option<Vec<String>>, String> {
        let Some(sep) = self.separator else {
            return match &self.names {
                Names::None => Ok(None),
                names if names.len() == 1 => Ok(Some(vec![text.to_owned()])),
                _ => Err("A separator specification is needed for the parameters".into()),
            };
        };
        let pieces: Vec<String> = match self.count {
            Count::Any => text.split(sep).map(|p| p.trim().to_owned()).collect(),
            Count::Exact(n) | Count::Range(_, n) => {
                text.splitn(n, sep).map(|p| p.trim().to_owned()).collect()
            }
        };
        let got = pieces.len();
        match self.count {
            Count::Range(min, max) if got < min || got > max => Err(format!(
                "Bad parameter count, got {got}, expected {min}-{max}"
            )),
            Count::Exact(n) if got != n => Err(format!("{n} parameters was required, got {got}")),
            _ => Ok(Some(pieces)),
        }
    }
}

/// `(int)` conversion: leading digits, 0 when there are none.
fn leading_int(s: &str) -> usize {
    let s = s.trim();
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    s[..end].parse().unwrap_or(0)
}

/// `application/x-www-form-urlencoded` encoding of `s`.
pub fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' => out.push(b as char),
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

// ── Binding ───────────────────────────────────────────────────────────────────

impl Interpreter {
    /// Apply `spec` to `value`, binding named pieces in the current scope.
    ///
    /// Returns the new parameter value: the list of pieces when the value
    /// was split, otherwise the transformed value.
    pub(crate) fn bind_param(&mut self, spec: &str, value: Value) -> Result<Value, String> {
        let spec = ParamSpec::parse(spec, |w| self.has_transform(w))?;

        let mut value = value;
        for t in &spec.transforms {
            value = self.apply_transform(t, value)?;
        }

        let pieces = spec.split(&value.as_str())?;
        let got = pieces.as_ref().map_or(1, Vec::len);
        match spec.count {
            Count::Range(min, max) if got < min || got > max => {
                return Err(format!("Bad parameter count, got {got}, expected {min}-{max}"));
            }
            Count::Exact(n) if got != n => {
                return Err(format!("Bad parameter count, got {got}, expected {n}"));
            }
            _ => {}
        }

        let bindings = self.top().bindings.clone();
        let mut rest = pieces.iter().flatten();
        match &spec.names {
            Names::None => {}
            Names::List(names) => {
                for name in names {
                    let piece = rest.next().map(|p| Value::Str(p.clone())).unwrap_or_default();
                    assign(&bindings, name.trim_start_matches('$'), piece);
                }
            }
            Names::Nested(defs) => {
                for (name, def) in defs {
                    let piece = rest.next().map(|p| Value::Str(p.clone())).unwrap_or_default();
                    let bound = self.bind_param(def, piece)?;
                    assign(&bindings, name.trim_start_matches('$'), bound);
                }
            }
        }

        Ok(match pieces {
            Some(p) => Value::List(p.into_iter().map(Value::Str).collect()),
            None => value,
        })
    }

    pub(crate) fn apply_transform(&mut self, name: &str, value: Value) -> Result<Value, String> {
        let text = value.as_str();
        Ok(match name {
            "raw" => value,
            "string" => self.eval_in_caller(EvalKind::Str, &text)?,
            "expr" => self.eval_in_caller(EvalKind::Expr, &text)?,
            "code" | "php" => {
                let bindings = self.caller_bindings();
                let ev = self.evaluate(EvalKind::Code, &text, bindings);
                if let EvalStatus::Error(m) | EvalStatus::Exception(m) = ev.status {
                    return Err(m);
                }
                match ev.value {
                    Some(Value::Bool(false)) => Value::Str(String::new()),
                    Some(v) => v,
                    None => Value::Str(ev.output),
                }
            }
            "layout" => Value::Str(self.run(&text, Value::Str(String::new()), super::interp::INLINE)),
            "unhtml" => Value::Str(html_escape(&text)),
            "urlify" => Value::Str(urlencode(&text)),
            "upper" => Value::Str(text.to_uppercase()),
            "lower" => Value::Str(text.to_lowercase()),
            "ucfirst" => Value::Str(ucfirst(&text)),
            "ucwords" => Value::Str(ucwords(&text)),
            custom => match self.transform(custom) {
                Some(f) => Value::Str(f(self, &text)),
                None => return Err(format!("Unknown parameter type: {custom}")),
            },
        })
    }

    fn eval_in_caller(&mut self, kind: EvalKind, code: &str) -> Result<Value, String> {
        let bindings = self.caller_bindings();
        self.evaluate(kind, code, bindings).into_result()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(spec: &str) -> Result<ParamSpec, String> {
        ParamSpec::parse(spec, |w| w == "shout")
    }

    #[test]
    fn names_set_the_count() {
        let s = parse("comma: a, $b").unwrap();
        assert_eq!(s.separator, Some(","));
        assert_eq!(s.count, Count::Exact(2));
        assert_eq!(s.names, Names::List(vec!["a".into(), "$b".into()]));
    }

    #[test]
    fn transforms_and_custom() {
        let s = parse("upper shout line").unwrap();
        assert_eq!(s.transforms, vec!["upper", "shout"]);
        assert_eq!(s.separator, Some("\n"));
        assert_eq!(s.count, Count::Any);
    }

    #[test]
    fn count_errors() {
        assert_eq!(parse("comma(2").unwrap_err(), "Bad syntax for !param, missing )");
        assert_eq!(
            parse("comma(3-2)").unwrap_err(),
            "Error in !param, max count must be larger than min count! (3-2)"
        );
        assert_eq!(
            parse("comma(3):a,b").unwrap_err(),
            "Variable count mismatch in !param, found 2 variables, but expected 3"
        );
        assert_eq!(
            parse("comma(1-3):a,b").unwrap_err(),
            "Variable count mismatch in !param, found 2 variables, but expected up to 3"
        );
    }

    #[test]
    fn type_errors() {
        assert_eq!(
            parse("comma pipe").unwrap_err(),
            "Error in !param, only one separator allowed, pipe conflicts with comma"
        );
        assert_eq!(parse("bogus").unwrap_err(), "Unknown parameter type: bogus");
    }

    #[test]
    fn nested_definition() {
        let s = parse("line:\n  title: upper\n  # skipped\n  body").unwrap();
        assert_eq!(
            s.names,
            Names::Nested(vec![("title".into(), "upper".into()), ("body".into(), String::new())])
        );
        assert_eq!(s.count, Count::Exact(2));
    }

    #[test]
    fn split_with_limit_keeps_remainder() {
        let s = parse("comma: a, b").unwrap();
        assert_eq!(s.split("x, y, z").unwrap(), Some(vec!["x".into(), "y, z".into()]));
        assert_eq!(s.split("x").unwrap_err(), "2 parameters was required, got 1");
    }

    #[test]
    fn split_range() {
        let s = parse("pipe(1-3)").unwrap();
        assert_eq!(s.split("a|b").unwrap().unwrap().len(), 2);
        let s = parse("pipe(2-3)").unwrap();
        assert_eq!(s.split("a").unwrap_err(), "Bad parameter count, got 1, expected 2-3");
    }

    #[test]
    fn single_name_without_separator_wraps() {
        let s = parse(": only").unwrap();
        assert_eq!(s.split("the whole, thing").unwrap(), Some(vec!["the whole, thing".into()]));
        let s = parse(": a, b").unwrap();
        assert_eq!(
            s.split("x").unwrap_err(),
            "A separator specification is needed for the parameters"
        );
    }

    #[test]
    fn urlencode_like_forms() {
        assert_eq!(urlencode("a b&c=d/é"), "a+b%26c%3Dd%2F%C3%A9");
    }
}
