//! Scan a BUFR file, decode every message and print a summary.
//!
//! Usage:
//!   decode_bufr FILE.bufr TABLE.txt [TABLE.txt ...] [--dump[=PATH]] [--count-only] [--verbose]
//!
//! Tables are loaded into one registry; each message picks its master and
//! local tables from section 1. `--dump` writes every decoded field (to stdout,
//! or to PATH). `--count-only` runs the bit counter instead of decoding.
//! Logging follows `RUST_LOG` (`--verbose` defaults it to `debug`).

use bufr_decoder::dump::dump_message;
use bufr_decoder::{parse_table, BufrError, BufrSource, Decoder, DecoderConfig, TableSet};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    let mut raw_args: Vec<String> = std::env::args().skip(1).collect();
    let verbose = if let Some(pos) = raw_args.iter().position(|a| a == "--verbose" || a == "-v") {
        raw_args.remove(pos);
        true
    } else {
        false
    };
    let count_only = if let Some(pos) = raw_args.iter().position(|a| a == "--count-only") {
        raw_args.remove(pos);
        true
    } else {
        false
    };
    let dump_path: Option<PathBuf> = raw_args
        .iter()
        .position(|a| a.starts_with("--dump"))
        .and_then(|pos| {
            let arg = raw_args.remove(pos);
            if arg == "--dump" {
                Some(PathBuf::from("-"))
            } else {
                arg.strip_prefix("--dump=").map(PathBuf::from)
            }
        });

    let default_level = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    let mut args = raw_args.into_iter();
    let bufr_path: PathBuf = args
        .next()
        .map(PathBuf::from)
        .ok_or_else(|| anyhow::anyhow!("usage: decode_bufr FILE.bufr TABLE.txt... [--dump[=PATH]] [--count-only] [--verbose]"))?;
    let table_paths: Vec<PathBuf> = args.map(PathBuf::from).collect();
    if table_paths.is_empty() {
        anyhow::bail!("at least one table file is required");
    }

    let mut tables = TableSet::new();
    for path in &table_paths {
        let src = std::fs::read_to_string(path)?;
        let table = parse_table(&src).map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e))?;
        eprintln!("table {}: {:?}, {} entries", path.display(), table.kind, table.len());
        tables.add(table);
    }
    let decoder = Decoder::new(Arc::new(tables), DecoderConfig::default());

    let mut dump_writer: Option<Box<dyn Write>> = match &dump_path {
        Some(p) if p.as_os_str() == "-" => Some(Box::new(std::io::stdout()) as Box<dyn Write>),
        Some(p) => Some(Box::new(File::create(p)?) as Box<dyn Write>),
        None => None,
    };

    let source = BufrSource::open(&bufr_path)?;
    let mut messages: u64 = 0;
    let mut decoded: u64 = 0;
    let mut failed: u64 = 0;
    let mut suspect: u64 = 0;
    let mut subsets: u64 = 0;
    let mut resyncs: u64 = 0;
    let mut skipped_bytes: usize = 0;
    let mut categories: BTreeMap<u8, u64> = BTreeMap::new();
    let mut first_errors: BTreeMap<String, String> = BTreeMap::new();

    for item in source.scan() {
        let message = match item {
            Ok(m) => m,
            Err(BufrError::ScanResync { skipped, .. }) => {
                resyncs += 1;
                skipped_bytes += skipped;
                continue;
            }
            Err(e) => {
                failed += 1;
                first_errors.entry("header".to_string()).or_insert_with(|| e.to_string());
                continue;
            }
        };
        messages += 1;
        *categories.entry(message.category()).or_default() += 1;

        if count_only {
            match decoder.count_bits(&message) {
                Ok(count) => {
                    if !count.is_ok() {
                        suspect += 1;
                    }
                    if verbose {
                        eprintln!(
                            "@{}: {} bits, {} bytes counted / {} declared",
                            message.offset(),
                            count.bits,
                            count.counted_bytes(),
                            count.declared_bytes
                        );
                    }
                    decoded += 1;
                }
                Err(e) => {
                    failed += 1;
                    first_errors.entry(error_kind(&e)).or_insert_with(|| e.to_string());
                }
            }
            continue;
        }

        match decoder.decode(&message) {
            Ok(result) => {
                decoded += 1;
                subsets += result.subsets.len() as u64;
                if result.is_suspect() {
                    suspect += 1;
                }
                if let Some(w) = dump_writer.as_mut() {
                    let table = decoder.tables_for(&message)?;
                    dump_message(w, &message, &result, &table)?;
                }
            }
            Err(e) => {
                failed += 1;
                if verbose {
                    eprintln!("@{}: {}", message.offset(), e);
                }
                first_errors.entry(error_kind(&e)).or_insert_with(|| e.to_string());
            }
        }
    }
    if let Some(w) = dump_writer.as_mut() {
        w.flush()?;
    }

    eprintln!("file: {}", bufr_path.display());
    eprintln!("messages: {}", messages);
    eprintln!("decoded: {}", decoded);
    eprintln!("failed: {}", failed);
    eprintln!("suspect (bit count mismatch): {}", suspect);
    if !count_only {
        eprintln!("subsets: {}", subsets);
    }
    eprintln!("resyncs: {} ({} bytes skipped)", resyncs, skipped_bytes);
    if !categories.is_empty() {
        eprintln!("categories:");
        for (cat, n) in &categories {
            eprintln!("  {:03}: {}", cat, n);
        }
    }
    if !first_errors.is_empty() {
        eprintln!("first error per kind:");
        for (kind, err) in &first_errors {
            eprintln!("  {}: {}", kind, err);
        }
    }
    Ok(())
}

fn error_kind(e: &BufrError) -> String {
    let debug = format!("{:?}", e);
    debug
        .split(|c: char| !c.is_alphanumeric())
        .next()
        .unwrap_or_default()
        .to_string()
}
