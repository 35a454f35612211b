use std::path::Path;

use {anyhow::Result, clap::Subcommand};

use portcullis_config::{PortcullisConfig, Severity, validate::validate};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate the configuration and report errors/warnings.
    Check {
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
}

pub fn handle_config(
    action: ConfigAction,
    config: &PortcullisConfig,
    source: Option<&Path>,
) -> Result<()> {
    match action {
        ConfigAction::Check { verbose } => {
            if !check(config, source, verbose) {
                std::process::exit(1);
            }
            Ok(())
        },
    }
}

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// Print diagnostics for `config`. Returns false when any of them is an error.
fn check(config: &PortcullisConfig, source: Option<&Path>, verbose: bool) -> bool {
    match source {
        Some(path) => eprintln!("Checking {}\n", path.display()),
        None => eprintln!("No config file found; checking defaults.\n"),
    }

    let result = validate(config);
    let mut shown = 0;
    for d in &result.diagnostics {
        if d.severity == Severity::Info && !verbose {
            continue;
        }
        let (color, label) = match d.severity {
            Severity::Error => (RED, "error"),
            Severity::Warning => (YELLOW, "warning"),
            Severity::Info => (CYAN, "info"),
        };
        eprintln!("  {BOLD}{color}{label}{RESET} {}: {}", d.path, d.message);
        shown += 1;
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);
    if shown > 0 {
        eprintln!();
    }
    eprintln!("{}", summary(errors, warnings));

    !result.has_errors()
}

fn summary(errors: usize, warnings: usize) -> String {
    if errors == 0 && warnings == 0 {
        "No issues found.".into()
    } else {
        format!("{errors} error(s), {warnings} warning(s)")
    }
}
