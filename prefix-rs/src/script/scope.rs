//! Scope records and shared variable storage.
//!
//! A binding is a named cell; cells are reference counted so that
//! `!scope` can make two scopes see the same variable, and nested control
//! blocks share the whole map with the scope that opened them.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use super::builtins::call_builtin;
use super::expr::EvalContext;
use super::value::Value;

/// Shared, mutably aliasable storage for one variable.
pub type Cell = Rc<RefCell<Value>>;

/// A scope's variable map.  Shared by reference with nested blocks.
pub type Bindings = Rc<RefCell<HashMap<String, Cell>>>;

pub fn new_bindings() -> Bindings {
    Rc::new(RefCell::new(HashMap::new()))
}

/// Assign a variable, writing through an existing cell if there is one.
pub fn assign(bindings: &Bindings, name: &str, value: Value) {
    let existing = bindings.borrow().get(name).cloned();
    match existing {
        Some(cell) => *cell.borrow_mut() = value,
        None => {
            bindings
                .borrow_mut()
                .insert(name.to_owned(), Rc::new(RefCell::new(value)));
        }
    }
}

pub fn lookup(bindings: &Bindings, name: &str) -> Option<Value> {
    bindings.borrow().get(name).map(|c| c.borrow().clone())
}

/// Make `name` in `dst` refer to the same cell as `name` in `src`.
///
/// A variable missing from `src` is created there as null first, so later
/// writes through either side stay linked.
pub fn link(src: &Bindings, dst: &Bindings, name: &str) {
    if Rc::ptr_eq(src, dst) {
        return;
    }
    let cell = src
        .borrow_mut()
        .entry(name.to_owned())
        .or_insert_with(|| Rc::new(RefCell::new(Value::Null)))
        .clone();
    dst.borrow_mut().insert(name.to_owned(), cell);
}

// ── Scope ─────────────────────────────────────────────────────────────────────

/// Result of the last `!if`/`!elseif` test in a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IfChain {
    #[default]
    Unset,
    True,
    False,
}

/// What kind of statement a scope is currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Command,
    Layout,
    Comment,
    Prefix(char),
}

/// One activation of a script on the scope stack.
#[derive(Debug, Clone)]
pub struct Scope {
    pub layout: String,
    pub statement: Option<StatementKind>,
    /// Line being executed, already adjusted by `line_offset`.
    pub line: usize,
    /// Added to local line numbers; non-zero for nested blocks.
    pub line_offset: usize,
    pub bindings: Bindings,
    pub if_chain: IfChain,
    pub command: Option<String>,
    pub prev_command: Option<String>,
}

impl Scope {
    pub fn new(layout: &str, bindings: Bindings, line_offset: usize) -> Self {
        Scope {
            layout: layout.to_owned(),
            statement: None,
            line: line_offset,
            line_offset,
            bindings,
            if_chain: IfChain::Unset,
            command: None,
            prev_command: None,
        }
    }
}

// ── ScopeContext ──────────────────────────────────────────────────────────────

/// [`EvalContext`] over one scope's bindings.
///
/// Holds only an `Rc` clone, so the interpreter can hand it to an evaluator
/// while still borrowing itself.
pub struct ScopeContext {
    bindings: Bindings,
}

impl ScopeContext {
    pub fn new(bindings: Bindings) -> Self {
        ScopeContext { bindings }
    }
}

impl EvalContext for ScopeContext {
    fn get_var(&self, name: &str) -> Option<Value> {
        lookup(&self.bindings, name)
    }

    fn set_var(&mut self, name: &str, value: Value) {
        assign(&self.bindings, name, value);
    }

    fn call_fn(&mut self, name: &str, args: Vec<Value>) -> Result<Value, String> {
        call_builtin(name, args).unwrap_or_else(|| Err(format!("Call to undefined function {name}()")))
    }

    /// All variables, sorted by name.
    fn vars(&self) -> Vec<(String, Value)> {
        let mut out: Vec<_> = self
            .bindings
            .borrow()
            .iter()
            .map(|(k, c)| (k.clone(), c.borrow().clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assign_writes_through_shared_cell() {
        let a = new_bindings();
        let b = new_bindings();
        assign(&a, "x", Value::Int(1));
        link(&a, &b, "x");
        assign(&b, "x", Value::Int(2));
        assert_eq!(lookup(&a, "x"), Some(Value::Int(2)));
    }

    #[test]
    fn link_creates_missing_source() {
        let a = new_bindings();
        let b = new_bindings();
        link(&a, &b, "y");
        assign(&a, "y", "set".into());
        assert_eq!(lookup(&b, "y"), Some("set".into()));
    }

    #[test]
    fn link_to_self_is_a_noop() {
        let a = new_bindings();
        assign(&a, "x", Value::Int(1));
        link(&a, &a, "x");
        assert_eq!(lookup(&a, "x"), Some(Value::Int(1)));
    }

    #[test]
    fn scope_context_sees_bindings() {
        let a = new_bindings();
        let mut ctx = ScopeContext::new(a.clone());
        ctx.set_var("v", Value::Int(3));
        assert_eq!(lookup(&a, "v"), Some(Value::Int(3)));
        assert_eq!(ctx.vars(), vec![("v".to_owned(), Value::Int(3))]);
        assert!(ctx.call_fn("nope", vec![]).is_err());
    }
}
