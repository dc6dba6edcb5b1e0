//! Pluggable evaluation of expressions, strings, and code blocks.
//!
//! The interpreter never evaluates anything itself: conditions, `$`
//! assignments, `"` output lines and `!code` blocks all go through an
//! [`Evaluator`].  [`ExprEvaluator`] is the built-in, sandboxed one.

use super::expand::interpolate;
use super::expr::{eval_expr, parse_expr, parse_statements, EvalContext, Stmt};
use super::value::Value;

/// What the evaluator is asked to do with the code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalKind {
    /// A single expression; the value is the result.
    Expr,
    /// Interpolated string text; the value is the expanded string.
    Str,
    /// Imperative statements; output is captured, `return` gives a value.
    Code,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EvalStatus {
    Ok,
    /// The code could not be parsed.
    Error(String),
    /// The code parsed but failed while running.
    Exception(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub status: EvalStatus,
    /// `None` for code blocks without an explicit `return`.
    pub value: Option<Value>,
    pub output: String,
}

impl Evaluation {
    pub fn ok(value: Value) -> Self {
        Evaluation {
            status: EvalStatus::Ok,
            value: Some(value),
            output: String::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Evaluation {
            status: EvalStatus::Error(message.into()),
            value: None,
            output: String::new(),
        }
    }

    pub fn exception(message: impl Into<String>) -> Self {
        Evaluation {
            status: EvalStatus::Exception(message.into()),
            value: None,
            output: String::new(),
        }
    }

    /// The failure message, if the evaluation failed.
    pub fn failure(&self) -> Option<&str> {
        match &self.status {
            EvalStatus::Ok => None,
            EvalStatus::Error(m) | EvalStatus::Exception(m) => Some(m),
        }
    }

    /// Convert to `Result`, discarding captured output.
    pub fn into_result(self) -> Result<Value, String> {
        match self.status {
            EvalStatus::Ok => Ok(self.value.unwrap_or_default()),
            EvalStatus::Error(m) | EvalStatus::Exception(m) => Err(m),
        }
    }
}

/// A language capable of running Prefix expressions and code blocks.
pub trait Evaluator {
    fn eval(&mut self, kind: EvalKind, code: &str, ctx: &mut dyn EvalContext) -> Evaluation;
}

impl<F> Evaluator for F
where
    F: FnMut(EvalKind, &str, &mut dyn EvalContext) -> Evaluation,
{
    fn eval(&mut self, kind: EvalKind, code: &str, ctx: &mut dyn EvalContext) -> Evaluation {
        self(kind, code, ctx)
    }
}

// ── ExprEvaluator ─────────────────────────────────────────────────────────────

/// Evaluator for the built-in expression language.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExprEvaluator;

impl Evaluator for ExprEvaluator {
    fn eval(&mut self, kind: EvalKind, code: &str, ctx: &mut dyn EvalContext) -> Evaluation {
        match kind {
            EvalKind::Expr => match parse_expr(code) {
                Err(e) => Evaluation::error(e),
                Ok(expr) => match eval_expr(&expr, ctx) {
                    Ok(v) => Evaluation::ok(v),
                    Err(e) => Evaluation::exception(e),
                },
            },
            EvalKind::Str => match interpolate(code, ctx) {
                Ok(s) => Evaluation::ok(Value::Str(s)),
                Err(e) => Evaluation::exception(e),
            },
            EvalKind::Code => run_code(code, ctx),
        }
    }
}

fn run_code(code: &str, ctx: &mut dyn EvalContext) -> Evaluation {
    let stmts = match parse_statements(code) {
        Ok(s) => s,
        Err(e) => return Evaluation::error(e),
    };
    let mut output = String::new();
    let mut value = None;
    for stmt in &stmts {
        let step = match stmt {
            Stmt::Expr(e) => eval_expr(e, ctx).map(|_| ()),
            Stmt::Echo(e) => eval_expr(e, ctx).map(|v| output.push_str(&v.as_str())),
            Stmt::Return(e) => {
                let v = match e {
                    Some(e) => eval_expr(e, ctx),
                    None => Ok(Value::Null),
                };
                match v {
                    Ok(v) => {
                        value = Some(v);
                        break;
                    }
                    Err(e) => Err(e),
                }
            }
        };
        if let Err(e) = step {
            return Evaluation {
                status: EvalStatus::Exception(e),
                value: None,
                output,
            };
        }
    }
    Evaluation {
        status: EvalStatus::Ok,
        value,
        output,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
