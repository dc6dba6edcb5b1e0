//! `prefixrc` configuration file parser.
//!
//! | Directive | Action |
//! |-----------|--------|
//! | `/set <name>=<value>` or `/set <name> <value>` | set an option |
//! | `/alias <name>=<target>` | add a command alias |
//! | Lines starting with `;` | comment, ignored |
//! | Any other `/command` | silently skipped |
//!
//! Options: `error_mode`, `max_depth`, `layout_dir`, `extension`.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::layout::DirLoader;
use crate::script::{ErrorMode, Interpreter};

// ── Public API ────────────────────────────────────────────────────────────────

/// A non-fatal error encountered while loading a config file.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct ConfigError {
    pub line: usize,
    pub message: String,
}

/// Settings read from an rc file.  Unset options keep the interpreter's
/// defaults.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Config {
    pub error_mode: Option<ErrorMode>,
    pub max_depth: Option<usize>,
    pub layout_dir: Option<PathBuf>,
    pub extension: Option<String>,
    /// `(alias, target)` in file order.
    pub aliases: Vec<(String, String)>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an rc file.
    ///
    /// Returns the config and a list of errors on recognised lines; those
    /// lines are skipped.
    pub fn load_str(s: &str) -> (Self, Vec<ConfigError>) {
        let mut config = Config::new();
        let mut errors = Vec::new();

        for (i, raw) in s.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with(';') {
                continue;
            }
            let Some(rest) = line.strip_prefix('/') else { continue };
            let (cmd, args) = rest
                .split_once(|c: char| c.is_ascii_whitespace())
                .unwrap_or((rest, ""));

            let result = match cmd {
                "set" => split_assignment(args.trim(), "/set")
                    .and_then(|(name, value)| config.set(name, value)),
                "alias" => split_assignment(args.trim(), "/alias").map(|(name, target)| {
                    config.aliases.push((name.to_owned(), target.to_owned()));
                }),
                _ => Ok(()),
            };
            if let Err(message) = result {
                errors.push(ConfigError {
                    line: i + 1,
                    message,
                });
            }
        }

        (config, errors)
    }

    /// Read and parse a config file from disk.
    pub fn load_file(path: &Path) -> std::io::Result<(Self, Vec<ConfigError>)> {
        let s = std::fs::read_to_string(path)?;
        Ok(Self::load_str(&s))
    }

    /// Set one option by name.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), String> {
        match name {
            "error_mode" => self.error_mode = Some(value.parse()?),
            "max_depth" => {
                let n: usize = value
                    .parse()
                    .map_err(|_| format!("/set: max_depth must be a positive number, got '{value}'"))?;
                if n == 0 {
                    return Err("/set: max_depth must be a positive number, got '0'".into());
                }
                self.max_depth = Some(n);
            }
            "layout_dir" => self.layout_dir = Some(PathBuf::from(value)),
            "extension" => self.extension = Some(value.to_owned()),
            other => return Err(format!("/set: unknown option '{other}'")),
        }
        Ok(())
    }

    /// Loader for `layout_dir`, if one is configured.
    pub fn loader(&self) -> Option<DirLoader> {
        let dir = self.layout_dir.as_ref()?;
        let loader = DirLoader::new(dir);
        Some(match &self.extension {
            Some(ext) => loader.with_extension(ext.clone()),
            None => loader,
        })
    }

    /// Apply the settings to an interpreter.
    ///
    /// Invalid alias names are reported and skipped.
    pub fn apply(&self, interp: &mut Interpreter) -> Vec<String> {
        let mut problems = Vec::new();
        if let Some(mode) = self.error_mode {
            interp.on_error(mode);
        }
        if let Some(depth) = self.max_depth {
            interp.set_max_depth(depth);
        }
        if let Some(loader) = self.loader() {
            interp.set_loader(loader);
        }
        for (alias, target) in &self.aliases {
            if let Err(e) = interp.define_command_alias(alias, target) {
                problems.push(e.to_string());
            }
        }
        problems
    }
}

/// Split `name=value` or `name value`.
fn split_assignment<'a>(args: &'a str, directive: &str) -> Result<(&'a str, &'a str), String> {
    if args.is_empty() {
        return Err(format!("{directive}: requires an argument"));
    }
    let (name, value) = match args.split_once('=') {
        Some((n, v)) => (n.trim(), v.trim()),
        None => match args.split_once(|c: char| c.is_ascii_whitespace()) {
            Some((n, v)) => (n, v.trim()),
            None => return Err(format!("{directive}: missing value for '{args}'")),
        },
    };
    if name.is_empty() {
        return Err(format!("{directive}: name cannot be empty"));
    }
    Ok((name, value))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{ErrorAction, Presentation};

    #[test]
    fn set_equals_syntax() {
        let (cfg, errs) = Config::load_str("/set max_depth=32");
        assert!(errs.is_empty(), "{errs:?}");
        assert_eq!(cfg.max_depth, Some(32));
    }

    #[test]
    fn set_space_syntax_keeps_spaces() {
        let (cfg, errs) = Config::load_str("/set error_mode html log resume");
        assert!(errs.is_empty(), "{errs:?}");
        assert_eq!(
            cfg.error_mode,
            Some(ErrorMode::new(Presentation::Html, true, ErrorAction::Resume))
        );
    }

    #[test]
    fn bad_values_are_errors() {
        let (_, errs) = Config::load_str("/set max_depth=lots\n/set error_mode=loud\n/set colour=red");
        assert_eq!(errs.len(), 3);
        assert_eq!(errs[0].line, 1);
        assert_eq!(errs[2].to_string(), "line 3: /set: unknown option 'colour'");
    }

    #[test]
    fn aliases_in_order() {
        let (cfg, errs) = Config::load_str("/alias each=loop\n/alias p param comma:");
        assert!(errs.is_empty(), "{errs:?}");
        assert_eq!(
            cfg.aliases,
            vec![
                ("each".to_owned(), "loop".to_owned()),
                ("p".to_owned(), "param comma:".to_owned())
            ]
        );
    }

    #[test]
    fn comments_and_unknown_commands_skipped() {
        let (cfg, errs) = Config::load_str(
            ";; header\n\
             ; note\n\
             /def something\n\
             \n\
             /set extension=.tpl",
        );
        assert!(errs.is_empty(), "{errs:?}");
        assert_eq!(cfg.extension.as_deref(), Some(".tpl"));
    }

    #[test]
    fn missing_argument() {
        let (_, errs) = Config::load_str("/set\n/alias lonely");
        assert_eq!(errs[0].message, "/set: requires an argument");
        assert_eq!(errs[1].message, "/alias: missing value for 'lonely'");
    }

    #[test]
    fn apply_configures_interpreter() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hi.tpl"), "!each [1, 2] as $n:\n  \"$n").unwrap();
        let rc = format!(
            "/set layout_dir={}\n/set extension=.tpl\n/set max_depth=8\n/alias each=loop\n/alias Bad Name=x",
            dir.path().display()
        );
        let (cfg, errs) = Config::load_str(&rc);
        assert!(errs.is_empty(), "{errs:?}");

        let mut interp = Interpreter::new();
        let problems = cfg.apply(&mut interp);
        assert_eq!(problems.len(), 1, "{problems:?}");
        assert_eq!(interp.max_depth(), 8);
        assert_eq!(interp.run_layout("hi", "").unwrap(), "12");
    }

    #[test]
    fn overridden_layout_dir_keeps_extension() {
        let configured = tempfile::tempdir().unwrap();
        let chosen = tempfile::tempdir().unwrap();
        std::fs::write(configured.path().join("hi.tpl"), "'configured").unwrap();
        std::fs::write(chosen.path().join("hi.tpl"), "'chosen").unwrap();
        let rc = format!(
            "/set layout_dir={}\n/set extension=.tpl",
            configured.path().display()
        );
        let (mut cfg, _) = Config::load_str(&rc);
        cfg.layout_dir = Some(chosen.path().to_path_buf());

        let mut interp = Interpreter::new();
        assert!(cfg.apply(&mut interp).is_empty());
        assert_eq!(interp.run_layout("hi", "").unwrap(), "chosen");
    }
}
