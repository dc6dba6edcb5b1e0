//! The Prefix interpreter.
//!
//! A script is split into logical lines; each line is dispatched on its
//! first character through the prefix table, and lines without a known
//! prefix invoke a layout.  Commands (`!if`, `!loop`, …) run their bodies
//! by recursing into [`Interpreter::run`] with a scope that shares the
//! enclosing bindings.  Outputs concatenate bottom-up.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, trace};

use super::alias::Aliases;
use super::error::{
    error_context, format_diagnostic, html_escape, ErrorAction, ErrorMode, Logger, Presentation,
    RenderError, TracingLogger,
};
use super::eval::{EvalKind, Evaluation, Evaluator, ExprEvaluator};
use super::expr::{is_ident_continue, is_ident_start};
use super::param::TRANSFORMS;
use super::scope::{assign, link, lookup, new_bindings, Bindings, IfChain, Scope, ScopeContext, StatementKind};
use super::value::Value;
use crate::indent::{blocks, dedent};
use crate::layout::{LayoutRecord, Loader, MapLoader, Registry};

/// Replaced by the invocation parameter in layout content and alias text.
pub const PARAM_PLACEHOLDER: &str = "$$";

/// Variable holding the parameter a layout was called with.
pub const PARAM_VAR: &str = "_param";

/// Layout name of scripts that are not named layouts.
pub const INLINE: &str = "[inline]";

pub const DEFAULT_MAX_DEPTH: usize = 255;

/// Commands whose bodies run in the scope that opened them.
const BLOCK_COMMANDS: [&str; 5] = ["if", "elseif", "else", "loop", "while"];

/// A custom prefix, command, or transform.
///
/// Receives the interpreter and the statement text after the prefix or
/// command name; returns the text to emit.
pub type Handler = Rc<dyn Fn(&mut Interpreter, &str) -> String>;

// ── Prefix table ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Leaf {
    Comment,
    Command,
    Markup,
    DefineLayout,
    Assignment,
    StringOutput,
    Literal,
}

#[derive(Clone)]
enum PrefixHandler {
    Builtin(Leaf),
    Custom(Handler),
}

fn default_prefixes() -> HashMap<char, PrefixHandler> {
    [
        ('#', Leaf::Comment),
        ('!', Leaf::Command),
        ('<', Leaf::Markup),
        ('=', Leaf::DefineLayout),
        ('$', Leaf::Assignment),
        ('"', Leaf::StringOutput),
        ('\'', Leaf::Literal),
    ]
    .into_iter()
    .map(|(c, l)| (c, PrefixHandler::Builtin(l)))
    .collect()
}

// ── Name patterns ─────────────────────────────────────────────────────────────

/// Which kind of user-supplied name a pattern validates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameKind {
    Layout,
    Command,
    Transform,
}

impl fmt::Display for NameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NameKind::Layout => "layout",
            NameKind::Command => "command",
            NameKind::Transform => "transform",
        })
    }
}

struct NamePatterns {
    layout: Regex,
    command: Regex,
    transform: Regex,
}

impl NamePatterns {
    const LAYOUT: &'static str = r"^[A-Za-z0-9_][A-Za-z0-9_.\-/]*$";
    const COMMAND: &'static str = r"^[a-z_][a-z0-9_]*$";
    const TRANSFORM: &'static str = r"^[a-z_][a-z0-9_]*$";

    fn get(&self, kind: NameKind) -> &Regex {
        match kind {
            NameKind::Layout => &self.layout,
            NameKind::Command => &self.command,
            NameKind::Transform => &self.transform,
        }
    }

    fn set(&mut self, kind: NameKind, re: Regex) {
        match kind {
            NameKind::Layout => self.layout = re,
            NameKind::Command => self.command = re,
            NameKind::Transform => self.transform = re,
        }
    }
}

impl Default for NamePatterns {
    fn default() -> Self {
        let compile = |p: &str| Regex::new(p).expect("built-in name pattern");
        NamePatterns {
            layout: compile(Self::LAYOUT),
            command: compile(Self::COMMAND),
            transform: compile(Self::TRANSFORM),
        }
    }
}

fn loop_head() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)^(.+?)\s+as\s+\$([a-z_][a-z0-9_]*)(?:\s*=>\s*\$([a-z_][a-z0-9_]*))?\s*$")
            .expect("built-in loop pattern")
    })
}

// ── Signals ───────────────────────────────────────────────────────────────────

/// Control signals raised by commands and consumed by enclosing runs.
#[derive(Debug, Default, Clone)]
struct Signals {
    break_count: usize,
    continue_loop: bool,
    /// Layout whose run should stop (`!return`).
    return_to: Option<String>,
    /// Layout where an error stopped processing.
    error_exit: Option<String>,
    abort: Option<String>,
}

// ── Interpreter ───────────────────────────────────────────────────────────────

/// One Prefix processor: its layouts, extensions, and run state.
///
/// Not `Send`: variables are shared through `Rc` cells.  Use one
/// interpreter per concurrent render.
pub struct Interpreter {
    stack: Vec<Scope>,
    globals: Bindings,
    registry: Registry,
    prefixes: HashMap<char, PrefixHandler>,
    commands: HashMap<String, Handler>,
    transforms: HashMap<String, Handler>,
    aliases: Aliases,
    patterns: NamePatterns,
    evaluator: Box<dyn Evaluator>,
    logger: Box<dyn Logger>,
    error_mode: ErrorMode,
    max_depth: usize,
    signals: Signals,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self::with_loader(MapLoader::new())
    }

    pub fn with_loader(loader: impl Loader + 'static) -> Self {
        Interpreter {
            stack: Vec::new(),
            globals: new_bindings(),
            registry: Registry::new(Box::new(loader)),
            prefixes: default_prefixes(),
            commands: HashMap::new(),
            transforms: HashMap::new(),
            aliases: Aliases::default(),
            patterns: NamePatterns::default(),
            evaluator: Box::new(ExprEvaluator),
            logger: Box::new(TracingLogger),
            error_mode: ErrorMode::default(),
            max_depth: DEFAULT_MAX_DEPTH,
            signals: Signals::default(),
        }
    }

    // ── Configuration ─────────────────────────────────────────────────────────

    pub fn set_loader(&mut self, loader: impl Loader + 'static) {
        self.registry.set_loader(Box::new(loader));
    }

    pub fn set_evaluator(&mut self, evaluator: impl Evaluator + 'static) {
        self.evaluator = Box::new(evaluator);
    }

    pub fn set_logger(&mut self, logger: impl Logger + 'static) {
        self.logger = Box::new(logger);
    }

    /// Change the error mode.  Any pending error exit is forgotten.
    pub fn on_error(&mut self, mode: ErrorMode) {
        self.error_mode = mode;
        self.signals.error_exit = None;
    }

    pub fn error_mode(&self) -> ErrorMode {
        self.error_mode
    }

    pub fn set_max_depth(&mut self, depth: usize) {
        self.max_depth = depth.max(1);
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Replace the pattern names of `kind` are checked against.
    pub fn set_name_pattern(&mut self, kind: NameKind, pattern: &str) -> Result<(), regex::Error> {
        self.patterns.set(kind, Regex::new(pattern)?);
        Ok(())
    }

    fn check_name(&self, kind: NameKind, name: &str) -> Result<(), RenderError> {
        if self.patterns.get(kind).is_match(name) {
            Ok(())
        } else {
            Err(RenderError::InvalidName {
                kind,
                name: name.to_owned(),
            })
        }
    }

    // ── Extension API ─────────────────────────────────────────────────────────

    /// Route lines starting with `prefix` to `handler`.
    ///
    /// Whitespace can't be a prefix: it continues the previous line.
    pub fn define_prefix<F>(&mut self, prefix: char, handler: F) -> Result<(), RenderError>
    where
        F: Fn(&mut Interpreter, &str) -> String + 'static,
    {
        if prefix.is_whitespace() {
            return Err(RenderError::InvalidPrefix(prefix));
        }
        self.prefixes
            .insert(prefix, PrefixHandler::Custom(Rc::new(handler)));
        Ok(())
    }

    /// Stop treating `prefix` specially; such lines become layout calls.
    pub fn remove_prefix(&mut self, prefix: char) -> bool {
        self.prefixes.remove(&prefix).is_some()
    }

    /// Add a `!name` command.  Names are case-insensitive.
    pub fn define_command<F>(&mut self, name: &str, handler: F) -> Result<(), RenderError>
    where
        F: Fn(&mut Interpreter, &str) -> String + 'static,
    {
        let name = name.to_ascii_lowercase();
        self.check_name(NameKind::Command, &name)?;
        self.commands.insert(name, Rc::new(handler));
        Ok(())
    }

    /// Make `!alias` mean `!target`; see [`Aliases`] for the target syntax.
    pub fn define_command_alias(&mut self, alias: &str, target: &str) -> Result<(), RenderError> {
        let alias = alias.to_ascii_lowercase();
        self.check_name(NameKind::Command, &alias)?;
        self.aliases.define(&alias, target);
        Ok(())
    }

    /// Add a `!param` transform.
    pub fn add_transform<F>(&mut self, name: &str, handler: F) -> Result<(), RenderError>
    where
        F: Fn(&mut Interpreter, &str) -> String + 'static,
    {
        let name = name.to_ascii_lowercase();
        self.check_name(NameKind::Transform, &name)?;
        self.transforms.insert(name, Rc::new(handler));
        Ok(())
    }

    pub(crate) fn has_transform(&self, name: &str) -> bool {
        self.transforms.contains_key(name)
    }

    pub(crate) fn transform(&self, name: &str) -> Option<Handler> {
        if TRANSFORMS.contains(&name) {
            return None;
        }
        self.transforms.get(name).cloned()
    }

    /// Register a layout, replacing any cached one of the same name.
    pub fn define_layout(&mut self, name: &str, content: &str) -> Result<(), RenderError> {
        self.check_name(NameKind::Layout, name)?;
        self.registry.define(LayoutRecord::new(name, content));
        Ok(())
    }

    /// Look up a layout, loading it if needed.
    pub fn layout(&mut self, name: &str) -> Result<Option<&LayoutRecord>, RenderError> {
        Ok(self.registry.record(name)?)
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        assign(&self.globals, name, value);
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        lookup(&self.globals, name)
    }

    // ── Access for handlers ───────────────────────────────────────────────────

    /// Variable of the running scope.
    pub fn var(&self, name: &str) -> Option<Value> {
        self.stack.last().and_then(|s| lookup(&s.bindings, name))
    }

    /// Assign a variable in the running scope.  Ignored when nothing runs.
    pub fn set_var(&mut self, name: &str, value: Value) {
        if let Some(s) = self.stack.last() {
            assign(&s.bindings, name, value);
        }
    }

    /// Name of the layout being run, if any.
    pub fn current_layout(&self) -> Option<&str> {
        self.stack.last().map(|s| s.layout.as_str())
    }

    /// Evaluate `code` in the running scope (or a fresh one when idle).
    pub fn eval(&mut self, kind: EvalKind, code: &str) -> Evaluation {
        let bindings = self
            .stack
            .last()
            .map(|s| s.bindings.clone())
            .unwrap_or_else(new_bindings);
        self.evaluate(kind, code, bindings)
    }

    // ── Running ───────────────────────────────────────────────────────────────

    /// Run a named layout with `param` as its parameter.
    pub fn run_layout(&mut self, name: &str, param: &str) -> Result<String, RenderError> {
        let content = self
            .registry
            .get(name)?
            .ok_or_else(|| RenderError::LayoutNotFound(name.to_owned()))?;
        let script = content.replace(PARAM_PLACEHOLDER, param);
        self.run_script(&script, &dedent(param), name)
    }

    /// Run script text as layout `name`.
    ///
    /// Diagnostics end up in the output according to the error mode; only
    /// an `abort` error mode makes this fail.
    pub fn run_script(&mut self, text: &str, param: &str, name: &str) -> Result<String, RenderError> {
        if self.stack.is_empty() {
            self.signals = Signals::default();
        }
        debug!(layout = name, depth = self.stack.len(), "run script");
        let out = self.run(text, Value::Str(param.to_owned()), name);
        match &self.signals.abort {
            Some(msg) => Err(RenderError::Aborted(msg.clone())),
            None => Ok(out),
        }
    }

    pub(crate) fn top(&self) -> &Scope {
        self.stack.last().expect("a script is running")
    }

    fn top_mut(&mut self) -> &mut Scope {
        self.stack.last_mut().expect("a script is running")
    }

    /// Run `text` on a new scope and return its output.
    pub(crate) fn run(&mut self, text: &str, param: Value, name: &str) -> String {
        let nested = self.stack.last().and_then(|top| {
            let is_block = top.statement == Some(StatementKind::Command)
                && top
                    .command
                    .as_deref()
                    .is_some_and(|c| BLOCK_COMMANDS.contains(&c));
            is_block.then(|| (top.layout.clone(), top.bindings.clone(), top.line))
        });
        let scope = match nested {
            Some((layout, bindings, offset)) => Scope::new(&layout, bindings, offset),
            None => {
                let bindings = new_bindings();
                assign(&bindings, PARAM_VAR, param);
                Scope::new(name, bindings, 0)
            }
        };

        if self.stack.len() >= self.max_depth {
            return self.error(&format!("Recursion error when calling {name}"));
        }
        self.stack.push(scope);

        let mut output: Vec<String> = Vec::new();
        for (line_no, line) in blocks(text) {
            if self.signals.abort.is_some() {
                break;
            }
            let top = self.top_mut();
            top.line = line_no + top.line_offset;

            output.push(self.dispatch(&line));
            self.track_command();

            if self.signals.error_exit.is_some() {
                match self.error_mode.action {
                    ErrorAction::Cancel => {
                        self.stack.pop();
                        return output.pop().unwrap_or_default();
                    }
                    ErrorAction::Resume
                        if self.signals.error_exit.as_deref() != Some(self.top().layout.as_str()) =>
                    {
                        self.signals.error_exit = None;
                    }
                    _ => break,
                }
            }
            if self.signals.abort.is_some()
                || self.signals.continue_loop
                || self.signals.break_count > 0
            {
                break;
            }
            if let Some(target) = &self.signals.return_to {
                if *target == self.top().layout {
                    break;
                }
                self.signals.return_to = None;
            }
        }

        self.stack.pop();
        output.concat()
    }

    fn dispatch(&mut self, line: &str) -> String {
        let Some(first) = line.chars().next() else {
            return String::new();
        };
        let Some(handler) = self.prefixes.get(&first).cloned() else {
            self.top_mut().statement = Some(StatementKind::Layout);
            return self.call_layout(line);
        };
        let stmt = &line[first.len_utf8()..];
        let kind = match handler {
            PrefixHandler::Builtin(Leaf::Command) => StatementKind::Command,
            PrefixHandler::Builtin(Leaf::Comment) => StatementKind::Comment,
            _ => StatementKind::Prefix(first),
        };
        self.top_mut().statement = Some(kind);
        trace!(prefix = %first, line = self.top().line, "dispatch");

        match handler {
            PrefixHandler::Custom(f) => f(self, stmt),
            PrefixHandler::Builtin(leaf) => match leaf {
                Leaf::Comment => String::new(),
                Leaf::Command => self.command(stmt),
                Leaf::Markup => format!("<{stmt}"),
                Leaf::Literal => stmt.to_owned(),
                Leaf::DefineLayout => self.define_inline_layout(stmt),
                Leaf::Assignment => self.assignment(stmt),
                Leaf::StringOutput => self.string_output(stmt),
            },
        }
    }

    /// Keep the command history for `!elseif`/`!else`; comments don't
    /// interrupt it, anything else does.
    fn track_command(&mut self) {
        let top = self.top_mut();
        match top.statement {
            Some(StatementKind::Command) => top.prev_command = top.command.clone(),
            Some(StatementKind::Comment) => {}
            _ => {
                top.command = None;
                top.prev_command = None;
            }
        }
    }

    fn call_layout(&mut self, line: &str) -> String {
        let (name, param) = match line.split_once(':') {
            Some((n, p)) => (n.trim(), p),
            None => (line.trim(), ""),
        };
        trace!(layout = name, "call layout");
        match self.registry.get(name) {
            Ok(Some(content)) => {
                let script = content.replace(PARAM_PLACEHOLDER, param);
                self.run(&script, Value::Str(dedent(param)), name)
            }
            Ok(None) => {
                let shown = if name.chars().count() > 40 {
                    let head: String = name.chars().take(40).collect();
                    format!("{}...", html_escape(&head))
                } else {
                    name.to_owned()
                };
                self.error(&format!("Undefined layout \"{shown}\""))
            }
            Err(e) => self.error(&e.to_string()),
        }
    }

    // ── Diagnostics ───────────────────────────────────────────────────────────

    /// Report an error according to the error mode and return the text to
    /// emit in its place.
    pub fn error(&mut self, message: &str) -> String {
        let (layout, line) = self
            .stack
            .last()
            .map(|s| (s.layout.clone(), s.line))
            .unwrap_or_default();
        let mode = self.error_mode;
        if matches!(
            mode.action,
            ErrorAction::Resume | ErrorAction::Exit | ErrorAction::Cancel
        ) {
            self.signals.error_exit = Some(layout.clone());
        }
        let context = error_context(self.registry.context(), &layout, line);
        let logged = if mode.log {
            self.logger.log(&context, message)
        } else {
            None
        };
        if mode.action == ErrorAction::Abort {
            if self.signals.abort.is_none() {
                self.signals.abort = Some(logged.unwrap_or_else(|| format!("{context}: {message}")));
            }
            return String::new();
        }
        match mode.presentation {
            Presentation::Silent => logged.unwrap_or_default(),
            p => format_diagnostic(p, &context, message),
        }
    }

    // ── Evaluation ────────────────────────────────────────────────────────────

    pub(crate) fn evaluate(&mut self, kind: EvalKind, code: &str, bindings: Bindings) -> Evaluation {
        let mut ctx = ScopeContext::new(bindings);
        self.evaluator.eval(kind, code, &mut ctx)
    }

    fn condition(&mut self, expr: &str) -> Result<bool, String> {
        let bindings = self.top().bindings.clone();
        self.evaluate(EvalKind::Expr, expr, bindings)
            .into_result()
            .map(|v| v.as_bool())
    }

    /// Bindings of the nearest scope below the running one that has its own
    /// variables; the running scope's bindings if there is none.
    pub(crate) fn caller_bindings(&self) -> Bindings {
        self.caller_scope()
            .unwrap_or_else(|| self.top())
            .bindings
            .clone()
    }

    fn caller_scope(&self) -> Option<&Scope> {
        let current = &self.stack.last()?.bindings;
        self.stack
            .iter()
            .rev()
            .skip(1)
            .find(|s| !Rc::ptr_eq(&s.bindings, current))
    }

    fn find_scope(&self, layout: &str) -> Option<Bindings> {
        self.stack
            .iter()
            .rev()
            .find(|s| s.layout == layout)
            .map(|s| s.bindings.clone())
    }

    // ── Leaf statements ───────────────────────────────────────────────────────

    fn define_inline_layout(&mut self, stmt: &str) -> String {
        let (name, body) = stmt.split_once(':').unwrap_or((stmt, ""));
        let name = name.trim();
        if !self.patterns.get(NameKind::Layout).is_match(name) {
            return self.error(&format!("Invalid layout name \"{}\"", html_escape(name)));
        }
        let top = self.top();
        let record = LayoutRecord {
            name: name.to_owned(),
            content: dedent(body),
            display_name: None,
            parent_name: Some(top.layout.clone()),
            defining_id: Some(top.line.to_string()),
        };
        self.registry.define(record);
        String::new()
    }

    fn assignment(&mut self, stmt: &str) -> String {
        let ident: String = stmt
            .chars()
            .take_while(|c| is_ident_continue(*c))
            .collect();
        if !ident.starts_with(is_ident_start) {
            return self.error("bad assignment, identifier expected");
        }
        let bindings = self.top().bindings.clone();
        if lookup(&bindings, &ident).is_none() {
            assign(&bindings, &ident, Value::Null);
        }
        let ev = self.evaluate(EvalKind::Expr, &format!("${stmt}"), bindings);
        match ev.failure() {
            Some(msg) => {
                let msg = msg.to_owned();
                self.error(&msg)
            }
            None => String::new(),
        }
    }

    fn string_output(&mut self, stmt: &str) -> String {
        let bindings = self.top().bindings.clone();
        match self.evaluate(EvalKind::Str, stmt, bindings).into_result() {
            Ok(v) => v.as_str(),
            Err(msg) => self.error(&msg),
        }
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    fn command(&mut self, stmt: &str) -> String {
        let (cmd, param) = split_command(stmt);
        let cmd = cmd.to_ascii_lowercase();
        let (cmd, param) = match self.aliases.resolve(&cmd, param) {
            Ok(r) => r,
            Err(msg) => {
                self.top_mut().command = Some(cmd);
                return self.error(&msg);
            }
        };
        self.top_mut().command = Some(cmd.clone());
        trace!(command = %cmd, "command");

        match cmd.as_str() {
            "if" => self.cmd_if(&param),
            "elseif" => self.cmd_elseif(&param),
            "else" => self.cmd_else(&param),
            "loop" => self.cmd_loop(&param),
            "while" => self.cmd_while(&param),
            "break" => {
                self.signals.break_count = param.trim().parse().ok().filter(|n| *n > 0).unwrap_or(1);
                String::new()
            }
            "continue" => {
                self.signals.continue_loop = true;
                String::new()
            }
            "return" => {
                self.signals.return_to = Some(self.top().layout.clone());
                String::new()
            }
            "scope" => self.cmd_scope(&param),
            "param" => self.cmd_param(&param),
            "code" => self.cmd_code(&param),
            _ => match self.commands.get(&cmd).cloned() {
                Some(handler) => handler(self, &param),
                None => self.error(&format!("Unknown command: \"!{cmd}\"")),
            },
        }
    }

    /// Run a control block body in the current scope's bindings.
    fn run_block(&mut self, code: &str) -> String {
        self.run(&dedent(code), Value::Str(String::new()), INLINE)
    }

    fn cmd_if(&mut self, param: &str) -> String {
        let Some((expr, code)) = param.split_once(":\n") else {
            return self.error("Bad syntax for !if, colon followed by linefeed and code was expected");
        };
        self.branch(expr, code)
    }

    fn cmd_elseif(&mut self, param: &str) -> String {
        if !self.after_if() {
            return self.error("Bad syntax, !elseif only allowed after !if or !elseif");
        }
        if self.top().if_chain == IfChain::True {
            return String::new();
        }
        let Some((expr, code)) = param.split_once(":\n") else {
            return self.error("Bad syntax for !elseif, colon followed by linefeed and code was expected");
        };
        self.branch(expr, code)
    }

    fn branch(&mut self, expr: &str, code: &str) -> String {
        match self.condition(expr) {
            Ok(true) => {
                self.top_mut().if_chain = IfChain::True;
                self.run_block(code)
            }
            Ok(false) => {
                self.top_mut().if_chain = IfChain::False;
                String::new()
            }
            Err(msg) => {
                self.top_mut().if_chain = IfChain::True;
                self.error(&msg)
            }
        }
    }

    fn cmd_else(&mut self, param: &str) -> String {
        if !self.after_if() {
            return self.error("Bad syntax, !else only allowed after !if or !elseif");
        }
        if self.top().if_chain == IfChain::False {
            self.run_block(param)
        } else {
            String::new()
        }
    }

    fn after_if(&self) -> bool {
        matches!(self.top().prev_command.as_deref(), Some("if" | "elseif"))
    }

    /// After one loop iteration: consume loop signals and say whether to stop.
    fn loop_should_stop(&mut self) -> bool {
        if self.signals.break_count > 0 {
            self.signals.break_count -= 1;
            return true;
        }
        self.signals.continue_loop = false;
        self.signals.abort.is_some()
            || self.signals.return_to.is_some()
            || self.signals.error_exit.is_some()
    }

    fn cmd_loop(&mut self, param: &str) -> String {
        let Some((head, code)) = param.split_once(":\n") else {
            return self.error("Bad syntax for !loop, colon followed by linefeed and code was expected");
        };
        let Some(caps) = loop_head().captures(head) else {
            return self.error("Invalid syntax for !loop");
        };
        let source = caps[1].trim().to_owned();
        let (var, key) = match caps.get(3) {
            Some(v) => (v.as_str().to_owned(), Some(caps[2].to_owned())),
            None => (caps[2].to_owned(), None),
        };

        let bindings = self.top().bindings.clone();
        let value = match self.evaluate(EvalKind::Expr, &source, bindings.clone()).into_result() {
            Ok(v) => v,
            Err(msg) => return self.error(&msg),
        };
        let Some(entries) = value.entries() else {
            return self.error(&format!(
                "An array is required for !loop, got {}",
                value.type_name()
            ));
        };

        let code = dedent(code);
        let mut out = String::new();
        for (k, v) in entries {
            if let Some(key) = &key {
                assign(&bindings, key, k);
            }
            assign(&bindings, &var, v);
            out.push_str(&self.run(&code, Value::Str(String::new()), INLINE));
            if self.loop_should_stop() {
                break;
            }
        }
        out
    }

    fn cmd_while(&mut self, param: &str) -> String {
        let Some((expr, code)) = param.split_once(":\n") else {
            return self.error("Bad syntax for !while, colon followed by linefeed and code was expected");
        };
        let code = dedent(code);
        let mut out = String::new();
        loop {
            match self.condition(expr) {
                Ok(true) => {}
                Ok(false) => break,
                Err(msg) => {
                    out.push_str(&self.error(&msg));
                    break;
                }
            }
            out.push_str(&self.run(&code, Value::Str(String::new()), INLINE));
            if self.loop_should_stop() {
                break;
            }
        }
        out
    }

    fn cmd_scope(&mut self, param: &str) -> String {
        let (kind, vars) = split_command(param);
        if vars.is_empty() {
            return self.error("Bad syntax for !scope, variable names required");
        }
        let kind = kind.to_ascii_lowercase();
        let (source, vars) = match kind.as_str() {
            "from" => {
                let (layout, vars) = split_command(vars);
                if vars.is_empty() {
                    return self.error("Bad syntax for !scope, variable names required");
                }
                match self.find_scope(layout) {
                    Some(b) => (b, vars),
                    None => return self.error(&format!("Scope \"{layout}\" was not found")),
                }
            }
            "caller" => match self.caller_scope().map(|s| s.bindings.clone()) {
                Some(b) => (b, vars),
                None => return self.error("There is no caller scope!"),
            },
            "parent" => {
                let layout = self.top().layout.clone();
                let parent = self
                    .registry
                    .cached(&layout)
                    .and_then(|r| r.parent_name.clone());
                let Some(parent) = parent else {
                    return self.error(&format!("Layout \"{layout}\" has no parent layout"));
                };
                match self.find_scope(&parent) {
                    Some(b) => (b, vars),
                    None => {
                        return self.error(&format!("Parent layout \"{parent}\" is not active"));
                    }
                }
            }
            "global" => (self.globals.clone(), vars),
            other => {
                return self.error(&format!(
                    "Invalid scope type \"{other}\", expected \"from\", \"caller\", \"parent\" or \"global\""
                ));
            }
        };
        let target = self.top().bindings.clone();
        for var in vars.split(',') {
            let var = var.trim().trim_start_matches('$');
            if !var.is_empty() {
                link(&source, &target, var);
            }
        }
        String::new()
    }

    fn cmd_param(&mut self, spec: &str) -> String {
        let bindings = self.top().bindings.clone();
        let current = lookup(&bindings, PARAM_VAR).unwrap_or_default();
        match self.bind_param(spec, current) {
            Ok(v) => {
                assign(&bindings, PARAM_VAR, v);
                String::new()
            }
            Err(msg) => self.error(&msg),
        }
    }

    fn cmd_code(&mut self, code: &str) -> String {
        let bindings = self.top().bindings.clone();
        let ev = self.evaluate(EvalKind::Code, code, bindings);
        let mut out = ev.output.clone();
        if let Some(msg) = ev.failure() {
            out.push_str(&self.error(msg));
        }
        out
    }
}

/// Split `name rest` at the first whitespace or `:`; leading whitespace and
/// colons are stripped from the rest.
fn split_command(s: &str) -> (&str, &str) {
    const SEP: [char; 5] = [' ', '\r', '\n', '\t', ':'];
    let end = s.find(SEP).unwrap_or(s.len());
    (&s[..end], s[end..].trim_start_matches(SEP))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn run(src: &str) -> String {
        Interpreter::new().run_script(src, "", "test").unwrap()
    }

    #[test]
    fn split_command_forms() {
        assert_eq!(split_command("if $x:\n  a"), ("if", "$x:\n  a"));
        assert_eq!(split_command("else:\n  C"), ("else", "C"));
        assert_eq!(split_command("break"), ("break", ""));
    }

    #[test]
    fn literal_markup_comment() {
        assert_eq!(run("'Hello\n<b>x</b>\n# nothing"), "Hello<b>x</b>");
    }

    #[test]
    fn assignment_and_string_output() {
        assert_eq!(run("$x = 6 * 7\n\"x=$x"), "x=42");
    }

    #[test]
    fn bad_assignment() {
        assert_eq!(
            run("$ = 1"),
            "* Layout processing error: in test line 1: bad assignment, identifier expected\n"
        );
    }

    #[test]
    fn if_elseif_else() {
        assert_eq!(run("!if false:\n  'A\n!elseif true:\n  'B\n!else:\n  'C"), "B");
        assert_eq!(run("!if 0:\n  'A\n!else:\n  'C"), "C");
        assert_eq!(run("!if 1:\n  'A\n!else:\n  'C"), "A");
    }

    #[test]
    fn comment_does_not_break_chain() {
        assert_eq!(run("!if 0:\n  'A\n# note\n!else:\n  'C"), "C");
    }

    #[test]
    fn else_without_if() {
        let out = run("'x\n!else:\n  'C");
        assert!(out.contains("!else only allowed after !if or !elseif"), "{out}");
    }

    #[test]
    fn if_missing_body() {
        let out = run("!if 1: 'A");
        assert!(out.contains("Bad syntax for !if"), "{out}");
    }

    #[test]
    fn blocks_share_variables() {
        assert_eq!(run("$n = 1\n!if true:\n  $n = 2\n\"$n"), "2");
    }

    #[test]
    fn nested_block_line_numbers_are_offset() {
        let out = run("'a\n!if true:\n  $ = 1");
        assert!(out.contains("in test line 3"), "{out}");
    }

    #[test]
    fn loop_key_and_value() {
        assert_eq!(
            run("!loop ['a' => 1, 'b' => 2] as $k => $v:\n  \"$k=$v;"),
            "a=1;b=2;"
        );
    }

    #[test]
    fn loop_needs_array() {
        let out = run("!loop 5 as $x:\n  \"$x");
        assert!(out.contains("An array is required for !loop, got integer"), "{out}");
    }

    #[test]
    fn while_loop() {
        assert_eq!(run("$i = 0\n!while $i < 3:\n  $i++\n  \"$i"), "123");
    }

    #[test]
    fn nested_break_counts() {
        let src = "!loop [1,2] as $a:\n  !loop [1,2] as $b:\n    \"$a$b;\n    !break 2\n'end";
        assert_eq!(run(src), "11;end");
    }

    #[test]
    fn unknown_command() {
        assert!(run("!frobnicate").contains("Unknown command: \"!frobnicate\""));
    }

    #[test]
    fn custom_command_and_alias() {
        let mut i = Interpreter::new();
        i.define_command("shout", |_, p| p.to_uppercase()).unwrap();
        i.define_command_alias("yell", "shout hey").unwrap();
        assert_eq!(i.run_script("!yell you", "", "t").unwrap(), "HEY YOU");
    }

    #[test]
    fn custom_prefix() {
        let mut i = Interpreter::new();
        i.define_prefix('@', |interp, s| format!("[{}:{s}]", interp.current_layout().unwrap_or("")))
            .unwrap();
        assert_eq!(i.run_script("@x", "", "page").unwrap(), "[page:x]");
        assert!(i.define_prefix(' ', |_, _| String::new()).is_err());
    }

    #[test]
    fn invalid_names_are_rejected() {
        let mut i = Interpreter::new();
        assert!(matches!(
            i.define_command("Bad Name", |_, _| String::new()),
            Err(RenderError::InvalidName { kind: NameKind::Command, .. })
        ));
        i.set_name_pattern(NameKind::Command, r"^.+$").unwrap();
        assert!(i.define_command("odd name", |_, _| String::new()).is_ok());
        assert!(i.set_name_pattern(NameKind::Layout, "(").is_err());
    }

    #[test]
    fn code_command() {
        assert_eq!(run("!code $a = 2; echo $a * 2"), "4");
        assert_eq!(run("!php echo 'via alias'"), "via alias");
    }

    #[test]
    fn param_command() {
        let mut i = Interpreter::new();
        i.define_layout("pair", "!param comma(2):a,b\n\"$b/$a").unwrap();
        assert_eq!(i.run_script("pair:x,y", "", "t").unwrap(), "y/x");
    }

    #[test]
    fn scope_global_links_cells() {
        let mut i = Interpreter::new();
        i.set_global("hits", Value::Int(1));
        i.run_script("!scope global: hits\n$hits++", "", "t").unwrap();
        assert_eq!(i.global("hits"), Some(Value::Int(2)));
    }

    #[test]
    fn var_access_for_handlers() {
        let mut i = Interpreter::new();
        i.define_command("double", |interp, name| {
            let v = interp.var(name).unwrap_or_default();
            interp.set_var(name, v.arith_mul(&Value::Int(2)));
            String::new()
        })
        .unwrap();
        assert_eq!(i.run_script("$n = 4\n!double n\n\"$n", "", "t").unwrap(), "8");
    }
}
