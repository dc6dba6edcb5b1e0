//! Command aliases.
//!
//! An alias maps a command name to `target[ text]`.  When `text` contains
//! `$$` the invocation's parameter is substituted there, otherwise `text` is
//! put in front of the parameter.

use std::collections::HashMap;

use super::interp::PARAM_PLACEHOLDER;

/// Rewrites allowed before an alias chain is considered a loop.
pub const MAX_ALIAS_REWRITES: usize = 16;

#[derive(Debug, Clone)]
pub struct Aliases {
    map: HashMap<String, String>,
}

impl Default for Aliases {
    fn default() -> Self {
        let mut a = Aliases {
            map: HashMap::new(),
        };
        a.define("elif", "elseif");
        a.define("foreach", "loop");
        a.define("php", "code");
        a
    }
}

impl Aliases {
    /// An empty table, without the default aliases.
    pub fn empty() -> Self {
        Aliases {
            map: HashMap::new(),
        }
    }

    pub fn define(&mut self, alias: &str, target: &str) {
        self.map
            .insert(alias.to_ascii_lowercase(), target.trim().to_owned());
    }

    /// The raw `target[ text]` an alias was defined with.
    pub fn get(&self, alias: &str) -> Option<&str> {
        self.map.get(&alias.to_ascii_lowercase()).map(String::as_str)
    }

    /// Follow aliases from `cmd` until a non-alias name is reached.
    pub fn resolve(&self, cmd: &str, param: &str) -> Result<(String, String), String> {
        let original = cmd;
        let mut cmd = cmd.to_owned();
        let mut param = param.to_owned();
        for _ in 0..MAX_ALIAS_REWRITES {
            let Some(target) = self.map.get(&cmd) else {
                return Ok((cmd, param));
            };
            let (name, text) = match target.split_once(char::is_whitespace) {
                Some((n, t)) => (n, t.trim()),
                None => (target.as_str(), ""),
            };
            if text.contains(PARAM_PLACEHOLDER) {
                param = text.replace(PARAM_PLACEHOLDER, &param);
            } else if !text.is_empty() {
                param = if param.is_empty() {
                    text.to_owned()
                } else {
                    format!("{text} {param}")
                };
            }
            cmd = name.to_ascii_lowercase();
        }
        if self.map.contains_key(&cmd) {
            Err(format!("Alias loop detected for !{original}"))
        } else {
            Ok((cmd, param))
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn r(a: &Aliases, cmd: &str, param: &str) -> Result<(String, String), String> {
        a.resolve(cmd, param)
    }

    #[test]
    fn defaults() {
        let a = Aliases::default();
        assert_eq!(r(&a, "elif", "x").unwrap(), ("elseif".into(), "x".into()));
        assert_eq!(r(&a, "foreach", "").unwrap().0, "loop");
        assert_eq!(r(&a, "php", "").unwrap().0, "code");
        assert_eq!(r(&a, "if", "").unwrap().0, "if");
    }

    #[test]
    fn define_normalizes_name_and_target() {
        let mut a = Aliases::empty();
        a.define("Say", "  echo hi  ");
        assert_eq!(a.get("say"), Some("echo hi"));
        assert_eq!(a.get("SAY"), Some("echo hi"));
        assert_eq!(a.get("elif"), None);
        assert_eq!(Aliases::default().get("elif"), Some("elseif"));
    }

    #[test]
    fn text_is_prepended() {
        let mut a = Aliases::empty();
        a.define("p", "param comma:");
        assert_eq!(r(&a, "p", "a,b").unwrap(), ("param".into(), "comma: a,b".into()));
    }

    #[test]
    fn placeholder_is_replaced() {
        let mut a = Aliases::empty();
        a.define("ifset", "if isset($$):");
        assert_eq!(r(&a, "ifset", "$x").unwrap(), ("if".into(), "isset($x):".into()));
    }

    #[test]
    fn chains_resolve() {
        let mut a = Aliases::empty();
        a.define("a", "b");
        a.define("b", "c");
        assert_eq!(r(&a, "a", "").unwrap().0, "c");
    }

    #[test]
    fn cycles_are_rejected() {
        let mut a = Aliases::empty();
        a.define("a", "b");
        a.define("b", "a");
        assert_eq!(r(&a, "a", "").unwrap_err(), "Alias loop detected for !a");
    }
}
