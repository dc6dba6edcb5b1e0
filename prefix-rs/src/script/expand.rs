//! String interpolation for `"` output lines and double-quoted literals.
//!
//! | Sequence          | Meaning                                           |
//! |-------------------|---------------------------------------------------|
//! | `$name`           | Value of variable `name`                          |
//! | `$name[key]`      | Element `key` (digits, bare word, `'quoted'`, `$var`) |
//! | `{$expr}`         | Any expression starting with `$`                  |
//! | `\n` `\t` `\r`    | Newline, tab, carriage return                     |
//! | `\\` `\$` `\"`    | Literal backslash, dollar, quote                  |
//!
//! Any other `$` or `\` is copied through unchanged.

use super::expr::{eval_str, is_ident_continue, is_ident_start, EvalContext};
use super::value::Value;
use std::iter::Peekable;
use std::str::Chars;

/// Expand all interpolation sequences in `src`.
pub fn interpolate(src: &str, ctx: &mut dyn EvalContext) -> Result<String, String> {
    let mut out = String::with_capacity(src.len());
    let mut chars = src.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' => match chars.peek().copied() {
                Some('n') => {
                    chars.next();
                    out.push('\n');
                }
                Some('t') => {
                    chars.next();
                    out.push('\t');
                }
                Some('r') => {
                    chars.next();
                    out.push('\r');
                }
                Some(c @ ('\\' | '$' | '"')) => {
                    chars.next();
                    out.push(c);
                }
                _ => out.push('\\'),
            },
            '{' if chars.peek() == Some(&'$') => {
                let src = read_braced(&mut chars)?;
                out.push_str(&eval_str(&src, ctx)?.as_str());
            }
            '$' if matches!(chars.peek(), Some(c) if is_ident_start(*c)) => {
                let name = read_ident(&mut chars);
                let value = ctx
                    .get_var(&name)
                    .ok_or_else(|| format!("Undefined variable: {name}"))?;
                if chars.peek() == Some(&'[') {
                    chars.next();
                    let key = read_simple_key(&mut chars, ctx)?;
                    let elem = value
                        .index(&key)
                        .ok_or_else(|| format!("Undefined index: {key}"))?;
                    out.push_str(&elem.as_str());
                } else {
                    out.push_str(&value.as_str());
                }
            }
            _ => out.push(ch),
        }
    }
    Ok(out)
}

fn read_ident(chars: &mut Peekable<Chars>) -> String {
    let mut name = String::new();
    while let Some(c) = chars.peek().copied().filter(|c| is_ident_continue(*c)) {
        name.push(c);
        chars.next();
    }
    name
}

/// Read up to the `}` matching an already-consumed `{`.
///
/// Braces inside quoted strings do not count.
fn read_braced(chars: &mut Peekable<Chars>) -> Result<String, String> {
    let mut src = String::new();
    let mut depth = 1usize;
    let mut quote: Option<char> = None;
    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(_), '\\') => {
                src.push(c);
                if let Some(n) = chars.next() {
                    src.push(n);
                }
                continue;
            }
            (Some(q), _) if c == q => quote = None,
            (None, '"' | '\'') => quote = Some(c),
            (None, '{') => depth += 1,
            (None, '}') => {
                depth -= 1;
                if depth == 0 {
                    return Ok(src);
                }
            }
            _ => {}
        }
        src.push(c);
    }
    Err("unterminated '{$' in string".into())
}

/// Key of the `$name[key]` shorthand; the opening `[` is already consumed.
fn read_simple_key(chars: &mut Peekable<Chars>, ctx: &dyn EvalContext) -> Result<Value, String> {
    let key = match chars.peek().copied() {
        Some('$') => {
            chars.next();
            let name = read_ident(chars);
            ctx.get_var(&name)
                .ok_or_else(|| format!("Undefined variable: {name}"))?
        }
        Some(q @ ('\'' | '"')) => {
            chars.next();
            let mut s = String::new();
            loop {
                match chars.next() {
                    Some(c) if c == q => break,
                    Some(c) => s.push(c),
                    None => return Err("unterminated key in string".into()),
                }
            }
            Value::Str(s)
        }
        _ => {
            let word = read_ident(chars);
            match word.parse::<i64>() {
                Ok(n) => Value::Int(n),
                Err(_) => Value::Str(word),
            }
        }
    };
    if chars.next() != Some(']') {
        return Err("expected ']' in string".into());
    }
    Ok(key)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::super::expr::tests::TestCtx;
    use super::*;

    fn ctx() -> TestCtx {
        TestCtx::new()
            .with("name", "World".into())
            .with("n", Value::Int(2))
            .with("list", Value::List(vec!["a".into(), "b".into(), "c".into()]))
            .with("map", Value::Map(vec![("k".into(), "v".into())]))
    }

    fn exp(src: &str) -> String {
        interpolate(src, &mut ctx()).expect("interpolate failed")
    }

    #[test]
    fn plain_text() {
        assert_eq!(exp("no vars here"), "no vars here");
    }

    #[test]
    fn simple_variable() {
        assert_eq!(exp("Hello $name!"), "Hello World!");
    }

    #[test]
    fn element_shorthand() {
        assert_eq!(exp("$list[1]"), "b");
        assert_eq!(exp("$list[$n]"), "c");
        assert_eq!(exp("$map[k]/$map['k']"), "v/v");
    }

    #[test]
    fn braced_expression() {
        assert_eq!(exp("{$n + 1} items"), "3 items");
        assert_eq!(exp("{$map['k']}"), "v");
        assert_eq!(exp("{not an expr}"), "{not an expr}");
    }

    #[test]
    fn escapes() {
        assert_eq!(exp(r"a\nb\tc"), "a\nb\tc");
        assert_eq!(exp(r"\$name costs \\5"), "$name costs \\5");
        assert_eq!(exp(r"\q"), r"\q");
    }

    #[test]
    fn lone_dollar_is_literal() {
        assert_eq!(exp("cost: 5$ or $1"), "cost: 5$ or $1");
    }

    #[test]
    fn undefined_variable_is_an_error() {
        let err = interpolate("hi $nobody", &mut ctx()).unwrap_err();
        assert!(err.contains("nobody"));
    }

    #[test]
    fn unterminated_brace() {
        assert!(interpolate("{$n", &mut ctx()).is_err());
    }
}
