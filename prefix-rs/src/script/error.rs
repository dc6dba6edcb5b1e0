//! Error modes, diagnostics formatting, and the public error type.
//!
//! Errors inside a script never unwind: they are turned into diagnostics
//! right where they are detected.  The [`ErrorMode`] decides what the
//! diagnostic looks like, whether it is logged, and what happens to the
//! rest of the run.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use aho_corasick::AhoCorasick;
use thiserror::Error;

use super::interp::NameKind;
use crate::layout::LoadError;

/// How a diagnostic is rendered into the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Presentation {
    Silent,
    #[default]
    Text,
    Html,
}

/// What the run does after a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorAction {
    /// Keep going with the next statement.
    #[default]
    Continue,
    /// Stop the current layout, carry on in its caller.
    Resume,
    /// Stop the current layout, keeping what it produced.
    Exit,
    /// Stop the current layout, keeping only the diagnostic.
    Cancel,
    /// Stop everything; the top-level call fails.
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ErrorMode {
    pub presentation: Presentation,
    pub log: bool,
    pub action: ErrorAction,
}

impl ErrorMode {
    pub const fn new(presentation: Presentation, log: bool, action: ErrorAction) -> Self {
        ErrorMode {
            presentation,
            log,
            action,
        }
    }
}

impl FromStr for ErrorMode {
    type Err = String;

    /// Parse words such as `"html log resume"`.
    ///
    /// Words may be separated by spaces, commas or `|`.  Later words of the
    /// same group win; groups not mentioned keep their defaults.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut mode = ErrorMode::default();
        for word in s
            .split(|c: char| c.is_whitespace() || c == ',' || c == '|')
            .filter(|w| !w.is_empty())
        {
            match word.to_ascii_lowercase().as_str() {
                "silent" => mode.presentation = Presentation::Silent,
                "text" => mode.presentation = Presentation::Text,
                "html" => mode.presentation = Presentation::Html,
                "log" => mode.log = true,
                "nolog" => mode.log = false,
                "continue" => mode.action = ErrorAction::Continue,
                "resume" => mode.action = ErrorAction::Resume,
                "exit" => mode.action = ErrorAction::Exit,
                "cancel" => mode.action = ErrorAction::Cancel,
                "abort" => mode.action = ErrorAction::Abort,
                other => return Err(format!("unknown error mode word: {other}")),
            }
        }
        Ok(mode)
    }
}

impl fmt::Display for ErrorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let presentation = match self.presentation {
            Presentation::Silent => "silent",
            Presentation::Text => "text",
            Presentation::Html => "html",
        };
        let action = match self.action {
            ErrorAction::Continue => "continue",
            ErrorAction::Resume => "resume",
            ErrorAction::Exit => "exit",
            ErrorAction::Cancel => "cancel",
            ErrorAction::Abort => "abort",
        };
        if self.log {
            write!(f, "{presentation} log {action}")
        } else {
            write!(f, "{presentation} {action}")
        }
    }
}

// ── Logger ────────────────────────────────────────────────────────────────────

/// Receives diagnostics when the error mode has `log` set.
///
/// The returned text, if any, replaces the message shown for `silent`
/// presentation (for example a reference number for the log entry).
pub trait Logger {
    fn log(&mut self, context: &str, message: &str) -> Option<String>;
}

impl<F> Logger for F
where
    F: FnMut(&str, &str) -> Option<String>,
{
    fn log(&mut self, context: &str, message: &str) -> Option<String> {
        self(context, message)
    }
}

/// Default logger: emits a `tracing` warning.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&mut self, context: &str, message: &str) -> Option<String> {
        tracing::warn!(target: "prefix", context = %context, "{message}");
        None
    }
}

// ── Formatting ────────────────────────────────────────────────────────────────

/// Build `<marker> in <layout> line <n>`, leaving out empty parts.
///
/// The marker is dropped when it is the same as the layout name.
pub fn error_context(marker: &str, layout: &str, line: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    if !marker.is_empty() && marker != layout {
        parts.push(marker.to_owned());
    }
    if !layout.is_empty() {
        parts.push(format!("in {layout}"));
    }
    if line > 0 {
        parts.push(format!("line {line}"));
    }
    parts.join(" ")
}

/// Render a diagnostic for the output stream.
pub fn format_diagnostic(presentation: Presentation, context: &str, message: &str) -> String {
    let head = if context.is_empty() {
        "Layout processing error".to_owned()
    } else {
        format!("Layout processing error: {context}")
    };
    match presentation {
        Presentation::Silent => String::new(),
        Presentation::Text => format!("* {head}: {message}\n"),
        Presentation::Html => format!("<p><code>{head}:</code> {}</p>\n", html_escape(message)),
    }
}

/// Escape `& < > " '` for HTML.
pub fn html_escape(s: &str) -> String {
    static ESCAPER: OnceLock<AhoCorasick> = OnceLock::new();
    const FROM: [&str; 5] = ["&", "<", ">", "\"", "'"];
    const TO: [&str; 5] = ["&amp;", "&lt;", "&gt;", "&quot;", "&#039;"];
    ESCAPER
        .get_or_init(|| AhoCorasick::new(FROM))
        .replace_all(s, &TO)
}

// ── RenderError ───────────────────────────────────────────────────────────────

/// Failure of a top-level render call or an extension registration.
#[derive(Debug, Error)]
pub enum RenderError {
    /// A diagnostic was raised while the error mode's action was `abort`.
    #[error("layout processing aborted: {0}")]
    Aborted(String),
    /// `run_layout` was asked for a layout the loader does not know.
    #[error("undefined layout \"{0}\"")]
    LayoutNotFound(String),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("invalid {kind} name \"{name}\"")]
    InvalidName { kind: NameKind, name: String },
    #[error("{0:?} cannot be used as a prefix")]
    InvalidPrefix(char),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
