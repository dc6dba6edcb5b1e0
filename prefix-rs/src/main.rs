use std::io::{self, Read, Write};
use std::process::ExitCode;

use tracing::{debug, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use prefix::cli::{self, ConfigFile, Target};
use prefix::config::Config;
use prefix::script::{ErrorMode, Interpreter};

const USAGE: &str =
    "Usage: prefix [-L<dir>] [-f[<file>]] [-e<mode>] [-p<param>] [-c<script>] [-d] [<layout>]";

fn main() -> ExitCode {
    let args = match cli::parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("prefix: {e}");
            eprintln!("{USAGE}");
            return ExitCode::from(2);
        }
    };

    let default_filter = if args.debug { "prefix=debug" } else { "prefix=warn" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .init();

    // ── Load user config ──────────────────────────────────────────────────────
    let config_path = match &args.config {
        ConfigFile::Skip => None,
        ConfigFile::Explicit(path) => Some(path.clone()),
        ConfigFile::Search => cli::find_user_config(),
    };
    let mut config = match config_path {
        None => Config::default(),
        Some(path) => match Config::load_file(&path) {
            Ok((config, errors)) => {
                debug!(path = %path.display(), "loaded config");
                for e in errors {
                    warn!("{}: {e}", path.display());
                }
                config
            }
            Err(e) => {
                eprintln!("prefix: {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        },
    };

    // ── Build the interpreter ─────────────────────────────────────────────────
    config.layout_dir = Some(cli::resolve_layout_dir(
        args.layout_dir.as_ref(),
        config.layout_dir.as_ref(),
    ));
    let mut interp = Interpreter::new();
    for problem in config.apply(&mut interp) {
        warn!("config: {problem}");
    }
    if let Some(mode) = &args.error_mode {
        match mode.parse::<ErrorMode>() {
            Ok(m) => interp.on_error(m),
            Err(e) => {
                eprintln!("prefix: -e: {e}");
                return ExitCode::from(2);
            }
        }
    }

    // ── Render ────────────────────────────────────────────────────────────────
    let result = match (&args.script, &args.target) {
        (Some(script), _) => interp.run_script(script, &args.param, "[cmdline]"),
        (None, Target::Layout(name)) => interp.run_layout(name, &args.param),
        (None, Target::Stdin) => {
            let mut src = String::new();
            if let Err(e) = io::stdin().read_to_string(&mut src) {
                eprintln!("prefix: stdin: {e}");
                return ExitCode::FAILURE;
            }
            interp.run_script(&src, &args.param, "[stdin]")
        }
    };

    match result {
        Ok(out) => {
            let mut stdout = io::stdout().lock();
            if let Err(e) = stdout.write_all(out.as_bytes()).and_then(|()| stdout.flush()) {
                eprintln!("prefix: {e}");
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("prefix: {e}");
            ExitCode::FAILURE
        }
    }
}
