//! Optional Lua 5.4 evaluator via the `mlua` crate.
//!
//! Enabled with the `lua` Cargo feature:
//! ```text
//! cargo build --features lua
//! cargo test  --features lua
//! ```
//!
//! [`LuaEvaluator`] plugs into [`Interpreter::set_evaluator`] so that
//! `!if`, `!while`, `$` assignments, `!code` and the `expr`/`code`
//! parameter transforms run Lua instead of the built-in expression
//! language.  `"` output lines keep the built-in interpolation.
//!
//! Scope variables are copied into Lua globals before each evaluation and
//! copied back afterwards.  Lua functions and userdata never leave Lua.
//!
//! | Lua function     | Effect                              |
//! |------------------|-------------------------------------|
//! | `echo(...)`      | Append the arguments to the output  |
//!
//! [`Interpreter::set_evaluator`]: crate::script::Interpreter::set_evaluator

#[cfg(feature = "lua")]
pub use lua_impl::LuaEvaluator;

#[cfg(feature = "lua")]
mod lua_impl {
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    use mlua::prelude::*;

    use crate::script::expand::interpolate;
    use crate::script::{EvalContext, EvalKind, Evaluation, Evaluator, Value};

    // ── LuaEvaluator ──────────────────────────────────────────────────────

    /// A Lua 5.4 state used as the script evaluator.
    pub struct LuaEvaluator {
        lua: Lua,
        /// Globals present before any scope variable was copied in.
        builtin: HashSet<String>,
        output: Arc<Mutex<String>>,
    }

    impl LuaEvaluator {
        pub fn new() -> LuaResult<Self> {
            let lua = Lua::new();
            let output = Arc::new(Mutex::new(String::new()));
            {
                let output = Arc::clone(&output);
                lua.globals().set(
                    "echo",
                    lua.create_function(move |_, args: LuaMultiValue| {
                        let mut out = output.lock().map_err(|_| {
                            LuaError::RuntimeError("output buffer poisoned".into())
                        })?;
                        for a in args {
                            out.push_str(&lua_to_string(&a));
                        }
                        Ok(())
                    })?,
                )?;
            }
            let builtin = global_names(&lua)?;
            Ok(LuaEvaluator {
                lua,
                builtin,
                output,
            })
        }

        fn import(&self, ctx: &dyn EvalContext) -> LuaResult<()> {
            let globals = self.lua.globals();
            for (name, value) in ctx.vars() {
                if !self.builtin.contains(&name) {
                    globals.set(name, to_lua(&self.lua, &value)?)?;
                }
            }
            Ok(())
        }

        /// Copy user globals back into the scope and clear them from Lua.
        fn export(&self, ctx: &mut dyn EvalContext) -> LuaResult<()> {
            let globals = self.lua.globals();
            let mut names = Vec::new();
            for pair in globals.clone().pairs::<LuaValue, LuaValue>() {
                let (k, v) = pair?;
                let LuaValue::String(k) = k else { continue };
                let name = k.to_string_lossy();
                if self.builtin.contains(&name) {
                    continue;
                }
                if let Some(v) = from_lua(&v)? {
                    ctx.set_var(&name, v);
                }
                names.push(name);
            }
            for name in names {
                globals.set(name, LuaValue::Nil)?;
            }
            Ok(())
        }

        /// Run `code`.  An expression that doesn't parse as one is retried as
        /// a statement, so `$x = 1` assignments work.
        fn run(&self, kind: EvalKind, code: &str) -> LuaResult<Option<Value>> {
            let code = strip_sigils(code);
            if kind == EvalKind::Expr {
                match self.chunk(&format!("return {code}")) {
                    Err(LuaError::SyntaxError { .. }) => {}
                    other => return other,
                }
            }
            self.chunk(&code)
        }

        fn chunk(&self, code: &str) -> LuaResult<Option<Value>> {
            let values: LuaMultiValue = self.lua.load(code).set_name("prefix").eval()?;
            match values.into_iter().next() {
                Some(v) => from_lua(&v),
                None => Ok(None),
            }
        }

        fn take_output(&self) -> String {
            self.output
                .lock()
                .map(|mut o| std::mem::take(&mut *o))
                .unwrap_or_default()
        }
    }

    impl Evaluator for LuaEvaluator {
        fn eval(&mut self, kind: EvalKind, code: &str, ctx: &mut dyn EvalContext) -> Evaluation {
            if kind == EvalKind::Str {
                return match interpolate(code, ctx) {
                    Ok(s) => Evaluation::ok(Value::Str(s)),
                    Err(e) => Evaluation::exception(e),
                };
            }
            if let Err(e) = self.import(ctx) {
                return Evaluation::exception(e.to_string());
            }
            let result = self.run(kind, code);
            let exported = self.export(ctx);
            let output = self.take_output();

            let mut ev = match result {
                Ok(value) => Evaluation {
                    value: match kind {
                        EvalKind::Code => value,
                        _ => Some(value.unwrap_or_default()),
                    },
                    ..Evaluation::ok(Value::Null)
                },
                Err(e @ LuaError::SyntaxError { .. }) => Evaluation::error(e.to_string()),
                Err(e) => Evaluation::exception(e.to_string()),
            };
            if let Err(e) = exported {
                ev = Evaluation::exception(e.to_string());
            }
            ev.output = output;
            ev
        }
    }

    // ── Conversion ────────────────────────────────────────────────────────

    /// Drop the `$` of `$name` outside string literals.
    fn strip_sigils(code: &str) -> String {
        let mut out = String::with_capacity(code.len());
        let mut quote: Option<char> = None;
        let mut chars = code.chars().peekable();
        while let Some(c) = chars.next() {
            match (quote, c) {
                (Some(_), '\\') => {
                    out.push(c);
                    if let Some(n) = chars.next() {
                        out.push(n);
                    }
                    continue;
                }
                (Some(q), c) if c == q => quote = None,
                (None, '\'' | '"') => quote = Some(c),
                (None, '$') if chars.peek().is_some_and(|n| n.is_ascii_alphabetic() || *n == '_') => {
                    continue;
                }
                _ => {}
            }
            out.push(c);
        }
        out
    }

    fn global_names(lua: &Lua) -> LuaResult<HashSet<String>> {
        let mut names = HashSet::new();
        for pair in lua.globals().pairs::<LuaValue, LuaValue>() {
            if let (LuaValue::String(k), _) = pair? {
                names.insert(k.to_string_lossy());
            }
        }
        Ok(names)
    }

    fn to_lua(lua: &Lua, value: &Value) -> LuaResult<LuaValue> {
        Ok(match value {
            Value::Null => LuaValue::Nil,
            Value::Bool(b) => LuaValue::Boolean(*b),
            Value::Int(i) => LuaValue::Integer(*i),
            Value::Float(f) => LuaValue::Number(*f),
            Value::Str(s) => LuaValue::String(lua.create_string(s)?),
            Value::List(items) => {
                let t = lua.create_table()?;
                for (i, v) in items.iter().enumerate() {
                    t.raw_set(i as i64 + 1, to_lua(lua, v)?)?;
                }
                LuaValue::Table(t)
            }
            Value::Map(entries) => {
                let t = lua.create_table()?;
                for (k, v) in entries {
                    t.raw_set(k.as_str(), to_lua(lua, v)?)?;
                }
                LuaValue::Table(t)
            }
        })
    }

    /// `None` for values with no Prefix counterpart (functions, userdata).
    fn from_lua(value: &LuaValue) -> LuaResult<Option<Value>> {
        Ok(Some(match value {
            LuaValue::Nil => Value::Null,
            LuaValue::Boolean(b) => Value::Bool(*b),
            LuaValue::Integer(i) => Value::Int(*i),
            LuaValue::Number(f) => Value::Float(*f),
            LuaValue::String(s) => Value::Str(s.to_string_lossy()),
            LuaValue::Table(t) => {
                let len = t.raw_len();
                let mut seq = Vec::with_capacity(len);
                for i in 1..=len {
                    let v: LuaValue = t.raw_get(i as i64)?;
                    seq.push(from_lua(&v)?.unwrap_or_default());
                }
                let mut map = Vec::new();
                for pair in t.clone().pairs::<LuaValue, LuaValue>() {
                    let (k, v) = pair?;
                    if matches!(k, LuaValue::Integer(i) if i >= 1 && i as usize <= len) {
                        continue;
                    }
                    map.push((lua_to_string(&k), from_lua(&v)?.unwrap_or_default()));
                }
                if map.is_empty() {
                    Value::List(seq)
                } else {
                    let mut all: Vec<(String, Value)> = seq
                        .into_iter()
                        .enumerate()
                        .map(|(i, v)| ((i + 1).to_string(), v))
                        .collect();
                    all.extend(map);
                    Value::Map(all)
                }
            }
            _ => return Ok(None),
        }))
    }

    fn lua_to_string(v: &LuaValue) -> String {
        match v {
            LuaValue::Nil => String::new(),
            LuaValue::Boolean(b) => if *b { "1" } else { "" }.to_owned(),
            LuaValue::Integer(i) => i.to_string(),
            LuaValue::Number(f) => f.to_string(),
            LuaValue::String(s) => s.to_string_lossy(),
            other => other.type_name().to_owned(),
        }
    }

    // ── Tests ─────────────────────────────────────────────────────────────

}
