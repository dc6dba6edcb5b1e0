//! Built-in functions of the expression language.
//!
//! Each function receives a `Vec<Value>` of already-evaluated arguments and
//! returns `Result<Value, String>`.  The dispatcher is called from the
//! evaluation context's `call_fn`.

use super::value::Value;

/// Largest list `range` will build.
const MAX_RANGE_LEN: u64 = 1 << 20;
/// Largest string, in bytes, that `str_repeat` and `sprintf` will build.
const MAX_STRING_LEN: usize = 1 << 24;

/// Dispatch a built-in function call.
///
/// Returns `None` if the function name is not a built-in.
pub fn call_builtin(name: &str, args: Vec<Value>) -> Option<Result<Value, String>> {
    fn inner(name: &str, args: Vec<Value>) -> Result<Option<Value>, String> {
        Ok(Some(match name {
            // ── Strings ──────────────────────────────────────────────────────
            "strlen" => Value::Int(get_str(&args, 0, name)?.chars().count() as i64),
            "upper" | "strtoupper" => Value::Str(get_str(&args, 0, name)?.to_uppercase()),
            "lower" | "strtolower" => Value::Str(get_str(&args, 0, name)?.to_lowercase()),
            "ucfirst" => Value::Str(ucfirst(&get_str(&args, 0, name)?)),
            "ucwords" => Value::Str(ucwords(&get_str(&args, 0, name)?)),
            "trim" => Value::Str(get_str(&args, 0, name)?.trim().to_owned()),
            "ltrim" => Value::Str(get_str(&args, 0, name)?.trim_start().to_owned()),
            "rtrim" => Value::Str(get_str(&args, 0, name)?.trim_end().to_owned()),
            "substr" => {
                let chars: Vec<char> = get_str(&args, 0, name)?.chars().collect();
                let len = chars.len() as i64;
                let mut start = get_int(&args, 1, name)?;
                if start < 0 {
                    start = len.saturating_add(start).max(0);
                }
                let start = start.min(len);
                let end = match args.get(2).map(Value::as_int) {
                    None => len,
                    Some(n) if n < 0 => len.saturating_add(n).max(start),
                    Some(n) => start.saturating_add(n).min(len),
                };
                Value::Str(chars[start as usize..end as usize].iter().collect())
            }
            "strpos" => {
                let haystack = get_str(&args, 0, name)?;
                let needle = get_str(&args, 1, name)?;
                match haystack.find(&needle) {
                    Some(i) => Value::Int(haystack[..i].chars().count() as i64),
                    None => Value::Bool(false),
                }
            }
            "str_repeat" => {
                let s = get_str(&args, 0, name)?;
                let n = usize::try_from(get_int(&args, 1, name)?.max(0))
                    .map_err(|_| format!("{name}: result too large"))?;
                match s.len().checked_mul(n) {
                    Some(total) if total <= MAX_STRING_LEN => Value::Str(s.repeat(n)),
                    _ => return Err(format!("{name}: result too large")),
                }
            }
            "str_replace" => {
                let needle = get_str(&args, 0, name)?;
                let repl = get_str(&args, 1, name)?;
                let haystack = get_str(&args, 2, name)?;
                if needle.is_empty() {
                    Value::Str(haystack)
                } else {
                    Value::Str(haystack.replace(&needle, &repl))
                }
            }
            "sprintf" => {
                let fmt = get_str(&args, 0, name)?;
                Value::Str(sprintf(&fmt, &args[1..])?)
            }

            // ── Arrays ───────────────────────────────────────────────────────
            "count" => match args.first() {
                Some(v @ (Value::List(_) | Value::Map(_))) => Value::Int(v.len() as i64),
                Some(Value::Null) => Value::Int(0),
                Some(_) => Value::Int(1),
                None => return Err(format!("{name}: argument 0 missing")),
            },
            "join" | "implode" => {
                let glue = get_str(&args, 0, name)?;
                let items = get_entries(&args, 1, name)?;
                Value::Str(
                    items
                        .iter()
                        .map(|(_, v)| v.as_str())
                        .collect::<Vec<_>>()
                        .join(&glue),
                )
            }
            "split" | "explode" => {
                let sep = get_str(&args, 0, name)?;
                let s = get_str(&args, 1, name)?;
                if sep.is_empty() {
                    return Err(format!("{name}: empty delimiter"));
                }
                Value::List(s.split(sep.as_str()).map(Value::from).collect())
            }
            "keys" | "array_keys" => Value::List(
                get_entries(&args, 0, name)?
                    .into_iter()
                    .map(|(k, _)| k)
                    .collect(),
            ),
            "values" | "array_values" => Value::List(
                get_entries(&args, 0, name)?
                    .into_iter()
                    .map(|(_, v)| v)
                    .collect(),
            ),
            "in_array" => {
                let needle = args
                    .first()
                    .ok_or_else(|| format!("{name}: argument 0 missing"))?;
                Value::Bool(
                    get_entries(&args, 1, name)?
                        .iter()
                        .any(|(_, v)| v.cmp_value(needle).is_eq()),
                )
            }
            "range" => {
                let lo = get_int(&args, 0, name)?;
                let hi = get_int(&args, 1, name)?;
                let step = args
                    .get(2)
                    .map(Value::as_int)
                    .unwrap_or(1)
                    .unsigned_abs()
                    .max(1);
                let steps = lo.abs_diff(hi) / step;
                if steps >= MAX_RANGE_LEN {
                    return Err(format!("{name}: range too large"));
                }
                let mut out = Vec::with_capacity(steps as usize + 1);
                let mut next = Some(lo);
                while let Some(i) = next {
                    if (lo <= hi && i > hi) || (lo > hi && i < hi) {
                        break;
                    }
                    out.push(Value::Int(i));
                    next = if lo <= hi {
                        i.checked_add_unsigned(step)
                    } else {
                        i.checked_sub_unsigned(step)
                    };
                }
                Value::List(out)
            }

            // ── Numbers ──────────────────────────────────────────────────────
            "abs" => match args.first() {
                Some(Value::Float(x)) => Value::Float(x.abs()),
                Some(v) => Value::Int(v.as_int().wrapping_abs()),
                None => return Err(format!("{name}: argument 0 missing")),
            },
            "min" | "max" => {
                let pool = match args.as_slice() {
                    [single] => single
                        .entries()
                        .map(|e| e.into_iter().map(|(_, v)| v).collect())
                        .unwrap_or_else(|| vec![single.clone()]),
                    _ => args.clone(),
                };
                let pick = pool.into_iter().reduce(|a, b| {
                    let less = b.cmp_value(&a).is_lt();
                    if (name == "min") == less {
                        b
                    } else {
                        a
                    }
                });
                pick.ok_or_else(|| format!("{name}: at least one value required"))?
            }
            "round" => {
                let x = get_float(&args, 0, name)?;
                let digits = args.get(1).map(Value::as_int).unwrap_or(0);
                let scale = 10f64.powi(digits as i32);
                Value::Float((x * scale).round() / scale)
            }
            "floor" => Value::Float(get_float(&args, 0, name)?.floor()),
            "ceil" => Value::Float(get_float(&args, 0, name)?.ceil()),
            "intval" => Value::Int(get_int(&args, 0, name)?),

            // ── Types ────────────────────────────────────────────────────────
            "gettype" => Value::Str(
                args.first()
                    .ok_or_else(|| format!("{name}: argument 0 missing"))?
                    .type_name()
                    .to_owned(),
            ),
            "is_array" => Value::Bool(matches!(args.first(), Some(Value::List(_) | Value::Map(_)))),
            "is_numeric" => Value::Bool(match args.first() {
                Some(Value::Int(_) | Value::Float(_)) => true,
                Some(Value::Str(s)) => s.trim().parse::<f64>().is_ok(),
                _ => false,
            }),
            "empty" => Value::Bool(!args.first().map(Value::as_bool).unwrap_or(false)),

            _ => return Ok(None),
        }))
    }
    inner(name, args).transpose()
}

pub(crate) fn ucfirst(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub(crate) fn ucwords(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if at_word_start && !c.is_whitespace() {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        at_word_start = c.is_whitespace();
    }
    out
}

// ── sprintf helper ────────────────────────────────────────────────────────────

/// A small subset of printf: `%s %d %f %.Nf %%`.
fn sprintf(fmt: &str, args: &[Value]) -> Result<String, String> {
    let mut out = String::with_capacity(fmt.len());
    let mut chars = fmt.chars().peekable();
    let mut next_arg = args.iter();
    while let Some(ch) = chars.next() {
        if ch != '%' {
            out.push(ch);
            continue;
        }
        let mut precision: Option<usize> = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut digits = String::new();
            while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                digits.push(d);
                chars.next();
            }
            precision = Some(digits.parse().unwrap_or(0));
            if precision.is_some_and(|p| p > MAX_STRING_LEN) {
                return Err("sprintf: precision too large".into());
            }
        }
        let spec = chars.next().ok_or("sprintf: dangling '%'")?;
        if spec == '%' {
            out.push('%');
            continue;
        }
        let arg = next_arg.next().ok_or("sprintf: too few arguments")?;
        match spec {
            's' => out.push_str(&arg.as_str()),
            'd' => out.push_str(&arg.as_int().to_string()),
            'f' => out.push_str(&format!("{:.*}", precision.unwrap_or(6), arg.as_float())),
            other => return Err(format!("sprintf: unknown conversion '%{other}'")),
        }
    }
    Ok(out)
}

// ── Argument accessors ────────────────────────────────────────────────────────

fn get_str(args: &[Value], idx: usize, name: &str) -> Result<String, String> {
    args.get(idx)
        .map(|v| v.as_str())
        .ok_or_else(|| format!("{name}: argument {idx} missing"))
}

fn get_int(args: &[Value], idx: usize, name: &str) -> Result<i64, String> {
    args.get(idx)
        .map(|v| v.as_int())
        .ok_or_else(|| format!("{name}: argument {idx} missing"))
}

fn get_float(args: &[Value], idx: usize, name: &str) -> Result<f64, String> {
    args.get(idx)
        .map(|v| v.as_float())
        .ok_or_else(|| format!("{name}: argument {idx} missing"))
}

fn get_entries(args: &[Value], idx: usize, name: &str) -> Result<Vec<(Value, Value)>, String> {
    let v = args
        .get(idx)
        .ok_or_else(|| format!("{name}: argument {idx} missing"))?;
    v.entries()
        .ok_or_else(|| format!("{name}: argument {idx} must be an array, got {}", v.type_name()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
