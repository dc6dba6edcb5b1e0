//! Command-line argument parsing.
//!
//! Usage:
//!   prefix [-L<dir>] [-f[<file>]] [-e<mode>] [-p<param>] [-c<script>] [-d] [<layout>]
//!
//! With neither `-c` nor a layout name the script is read from stdin.

use std::path::PathBuf;

use directories::ProjectDirs;

// ── Public types ──────────────────────────────────────────────────────────────

/// Parsed command-line arguments.
#[derive(Debug, Default)]
pub struct CliArgs {
    /// Layout directory override (`-L<dir>`).
    pub layout_dir: Option<PathBuf>,
    /// Config-file specification.
    pub config: ConfigFile,
    /// Error mode override (`-e<mode>`).
    pub error_mode: Option<String>,
    /// Parameter passed to the layout or script (`-p<param>`).
    pub param: String,
    /// Script text to run (`-c<script>`).
    pub script: Option<String>,
    /// Debug logging (`-d`).
    pub debug: bool,
    /// What to render.
    pub target: Target,
}

/// How to choose the user config file.
#[derive(Debug, Default)]
pub enum ConfigFile {
    /// Search the standard locations (default).
    #[default]
    Search,
    /// `-f` with no file argument: skip user config.
    Skip,
    /// `-f<file>`: load this specific file.
    Explicit(PathBuf),
}

/// What to render.
#[derive(Debug, Default, PartialEq, Eq)]
pub enum Target {
    /// Script text from stdin.
    #[default]
    Stdin,
    /// A named layout from the layout directory.
    Layout(String),
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Parse `std::env::args()` and return [`CliArgs`] or an error message.
pub fn parse_args() -> Result<CliArgs, String> {
    let raw: Vec<String> = std::env::args().collect();
    parse_argv(&raw[1..])
}

/// Parse a slice of argument strings (exposed for testing).
pub fn parse_argv(argv: &[String]) -> Result<CliArgs, String> {
    let mut args = CliArgs::default();
    let mut positional: Vec<String> = Vec::new();
    let mut i = 0;

    while i < argv.len() {
        let arg = argv[i].as_str();

        // `--` ends flag processing.
        if arg == "--" {
            i += 1;
            positional.extend(argv[i..].iter().cloned());
            break;
        }

        if !arg.starts_with('-') || arg == "-" {
            positional.push(arg.to_owned());
            i += 1;
            continue;
        }

        let chars: Vec<char> = arg[1..].chars().collect();
        let mut j = 0;
        while j < chars.len() {
            match chars[j] {
                'd' => args.debug = true,

                // -f[<file>]
                'f' => {
                    if j + 1 < chars.len() {
                        let file: String = chars[j + 1..].iter().collect();
                        args.config = ConfigFile::Explicit(PathBuf::from(file));
                        j = chars.len();
                    } else if i + 1 < argv.len() && !argv[i + 1].starts_with('-') {
                        i += 1;
                        args.config = ConfigFile::Explicit(PathBuf::from(&argv[i]));
                    } else {
                        args.config = ConfigFile::Skip;
                    }
                }

                c @ ('c' | 'L' | 'e' | 'p') => {
                    let value = if j + 1 < chars.len() {
                        let s: String = chars[j + 1..].iter().collect();
                        j = chars.len();
                        s
                    } else if i + 1 < argv.len() {
                        i += 1;
                        argv[i].clone()
                    } else {
                        return Err(format!("-{c} requires an argument"));
                    };
                    match c {
                        'c' => args.script = Some(value),
                        'L' => args.layout_dir = Some(PathBuf::from(value)),
                        'e' => args.error_mode = Some(value),
                        _ => args.param = value,
                    }
                }

                c => return Err(format!("unknown option: -{c}")),
            }
            j += 1;
        }
        i += 1;
    }

    match positional.len() {
        0 => {}
        1 => args.target = Target::Layout(positional.remove(0)),
        n => return Err(format!("too many arguments ({n})")),
    }
    if args.script.is_some() && args.target != Target::Stdin {
        return Err("-c and a layout name are mutually exclusive".to_owned());
    }

    Ok(args)
}

// ── Path helpers ──────────────────────────────────────────────────────────────

/// Search for the user config file in the standard locations.
///
/// Order: `./.prefixrc`, `./prefixrc`, then `prefixrc` in the platform
/// config directory.  Returns the first path that exists.
pub fn find_user_config() -> Option<PathBuf> {
    let mut candidates = vec![PathBuf::from("./.prefixrc"), PathBuf::from("./prefixrc")];
    if let Some(dirs) = ProjectDirs::from("", "", "prefix") {
        candidates.push(dirs.config_dir().join("prefixrc"));
    }
    candidates.into_iter().find(|p| p.exists())
}

/// Determine the layout directory.
///
/// Priority: `-L<dir>` flag, `PREFIX_LAYOUT_DIR`, the config file's
/// `layout_dir`, then the current directory.
pub fn resolve_layout_dir(cli_override: Option<&PathBuf>, configured: Option<&PathBuf>) -> PathBuf {
    if let Some(d) = cli_override {
        return d.clone();
    }
    if let Ok(d) = std::env::var("PREFIX_LAYOUT_DIR") {
        return PathBuf::from(d);
    }
    configured.cloned().unwrap_or_else(|| PathBuf::from("."))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
