//! The Prefix language.
//!
//! - [`interp`]: line dispatch, commands, scopes, and error handling
//! - [`param`]: the `!param` binder
//! - [`alias`]: command aliases
//! - [`expr`], [`expand`], [`builtins`]: the default expression language
//! - [`eval`]: the pluggable evaluator seam
//!
//! # Quick start
//!
//! ```rust
//! use prefix::script::Interpreter;
//!
//! let mut interp = Interpreter::new();
//! interp.define_layout("greet", "\"Hello, $_param!").unwrap();
//! let out = interp.run_script("$x = 6 * 7\n\"x=$x\ngreet: world", "", "page").unwrap();
//! assert_eq!(out, "x=42Hello, world!");
//! ```

pub mod alias;
pub mod builtins;
pub mod error;
pub mod eval;
pub mod expand;
pub mod expr;
pub mod interp;
pub mod param;
pub mod scope;
pub mod value;

// Re-exports for convenience.
pub use error::{ErrorAction, ErrorMode, Logger, Presentation, RenderError, TracingLogger};
pub use eval::{EvalKind, EvalStatus, Evaluation, Evaluator, ExprEvaluator};
pub use expr::EvalContext;
pub use interp::{Handler, Interpreter, NameKind};
pub use value::Value;
