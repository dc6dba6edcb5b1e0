//! Prefix: a layout processor for an indentation-based template language.
//!
//! Each line of a script starts with a prefix character that says what it
//! does; lines without one call a named layout.
//!
//! ```rust
//! use prefix::script::Interpreter;
//!
//! let mut p = Interpreter::new();
//! p.define_layout("item", "!param string\n<li>\n\"$_param\n</li>").unwrap();
//! let out = p
//!     .run_script("<ul>\n!loop ['a', 'b'] as $x:\n  item: $x\n</ul>", "", "list")
//!     .unwrap();
//! assert_eq!(out, "<ul><li>a</li><li>b</li></ul>");
//! ```

pub mod cli;
pub mod config;
pub mod indent;
pub mod layout;
pub mod lua;
pub mod script;

pub use layout::{DirLoader, LayoutRecord, Loader, MapLoader};
pub use script::{ErrorMode, Interpreter, RenderError, Value};
