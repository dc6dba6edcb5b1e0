//! Indentation utilities for Prefix source text.
//!
//! A Prefix script is a sequence of *logical lines*: a physical line that
//! starts with a space or tab continues the previous logical line.  The
//! interpreter uses [`blocks`] to split a script and [`dedent`] to strip the
//! common indentation from a nested block before running it.
//!
//! Tabs count as one column, so mixing tabs and spaces in one block gives
//! surprising results.  `\r\n` line endings are accepted; output always uses
//! `\n`.

/// Split `src` into `(line_no, logical_line)` pairs.
///
/// Line numbers are 1-based and refer to the first physical line of each
/// logical line.  Blank lines are dropped but still counted, so callers can
/// detect removed blanks by comparing the line number plus the number of
/// joined lines with the next entry.
pub fn blocks(src: &str) -> Vec<(usize, String)> {
    let mut out: Vec<(usize, String)> = Vec::new();
    for (i, line) in lines(src).enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        if line.starts_with([' ', '\t']) {
            if let Some((_, last)) = out.last_mut() {
                last.push('\n');
                last.push_str(line.trim_end());
                continue;
            }
        }
        out.push((i + 1, line.trim_end().to_owned()));
    }
    out
}

/// Remove the common leading whitespace from a block of text.
///
/// The first line is not measured, it is only trimmed: in `name:body` forms
/// the first line of the body sits on the same line as the name.  The whole
/// result is trimmed.
pub fn dedent(src: &str) -> String {
    if src.is_empty() {
        return String::new();
    }
    let mut it = lines(src);
    let first = it.next().unwrap_or_default();
    let rest: Vec<&str> = it.collect();
    let min = rest.iter().map(|l| leading_ws(l)).min().unwrap_or(0);

    let mut out = String::with_capacity(src.len());
    out.push_str(first);
    for l in &rest {
        out.push('\n');
        // `min` never exceeds the whitespace prefix, which is ASCII.
        out.push_str(&l[min..]);
    }
    out.trim().to_owned()
}

/// Prefix every line of `src` with `size` copies of `ws`.
pub fn indent(src: &str, size: usize, ws: char) -> String {
    let pad: String = std::iter::repeat(ws).take(size).collect();
    lines(src)
        .map(|l| format!("{pad}{l}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Leading whitespace count for each line of `src`.
pub fn indents(src: &str) -> Vec<usize> {
    lines(src).map(leading_ws).collect()
}

/// Set the indentation of each line individually.
///
/// With `append` the sizes are added to the existing indentation, otherwise
/// existing indentation is replaced.  Lines beyond `sizes` get no padding.
pub fn set_indents(src: &str, sizes: &[usize], append: bool, ws: char) -> String {
    lines(src)
        .enumerate()
        .map(|(i, l)| {
            let pad: String = std::iter::repeat(ws)
                .take(sizes.get(i).copied().unwrap_or(0))
                .collect();
            let body = if append { l } else { l.trim_start_matches(INDENT_CHARS) };
            format!("{pad}{body}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn lines(src: &str) -> impl Iterator<Item = &str> {
    src.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l))
}

const INDENT_CHARS: [char; 4] = [' ', '\t', '\0', '\x0B'];

fn leading_ws(line: &str) -> usize {
    line.len() - line.trim_start_matches(INDENT_CHARS).len()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
