//! Parse and lint descriptor table files.
//!
//! Usage:
//!   lint_table [--human] TABLE.txt [TABLE.txt ...]
//!
//! Master tables are linted first; local tables are checked against the
//! newest master given on the command line, so children defined there count
//! as resolved.
//!
//! Options:
//!   --human, -H  Human-readable output
//!
//! Exit code 1 on parse errors or error-level findings.

use bufr_decoder::lint::{has_errors, lint, LintMessage, Severity};
use bufr_decoder::{parse_table, TableData, TableKind};
use std::path::PathBuf;

fn print_message(path: &str, m: &LintMessage, style: OutputStyle) {
    let severity_str = match m.severity {
        Severity::Error => "error",
        Severity::Warning => "warning",
    };
    match style {
        OutputStyle::Compact => {
            println!(
                "{}:{}: {}: {} [{}]",
                path,
                m.descriptor,
                severity_str,
                m.message,
                m.rule.id()
            );
        }
        OutputStyle::Human => {
            println!("  {} {}: {}", path, m.descriptor, m.message);
            println!("    rule: {}", m.rule.id());
        }
    }
}

#[derive(Clone, Copy)]
enum OutputStyle {
    Compact,
    Human,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let style = if let Some(pos) = args.iter().position(|a| a == "--human" || a == "-H") {
        args.remove(pos);
        OutputStyle::Human
    } else {
        OutputStyle::Compact
    };
    if args.is_empty() {
        anyhow::bail!("usage: lint_table [--human] TABLE.txt...");
    }

    let mut has_error = false;
    let mut total_warnings = 0usize;
    let mut total_errors = 0usize;

    let mut parsed: Vec<(String, TableData)> = Vec::new();
    for path in args.iter().map(PathBuf::from) {
        let display_path = path.display().to_string();
        let src = match std::fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("{}: {}", display_path, e);
                has_error = true;
                continue;
            }
        };
        match parse_table(&src) {
            Ok(t) => parsed.push((display_path, t)),
            Err(e) => {
                println!("{}: error: {}", display_path, e);
                total_errors += 1;
                has_error = true;
            }
        }
    }

    let master_version = |t: &TableData| match t.kind {
        TableKind::Master { version } => Some(version),
        TableKind::Local { .. } => None,
    };
    let base = parsed
        .iter()
        .filter_map(|(_, t)| master_version(t).map(|v| (v, t)))
        .max_by_key(|(v, _)| *v)
        .map(|(_, t)| t);

    for (path, table) in &parsed {
        let against = if master_version(table).is_some() { None } else { base };
        let messages = lint(table, against);
        for m in &messages {
            match m.severity {
                Severity::Error => total_errors += 1,
                Severity::Warning => total_warnings += 1,
            }
            print_message(path, m, style);
        }
        if has_errors(&messages) {
            has_error = true;
        }
    }

    if total_errors > 0 || total_warnings > 0 {
        eprintln!("lint: {} error(s), {} warning(s)", total_errors, total_warnings);
    }
    if has_error {
        std::process::exit(1);
    }
    Ok(())
}
