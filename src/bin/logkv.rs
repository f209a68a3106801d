//! logkv interactive shell
//!
//! Reads commands from stdin, one per line, against a store at `--path`.

use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use clap::Parser;
use logkv::{Store, StoreConfig};
use tracing_subscriber::{EnvFilter, fmt};

/// logkv shell
#[derive(Parser, Debug)]
#[command(name = "logkv")]
#[command(about = "Interactive shell for an append-only log backed key-value store")]
#[command(version)]
struct Args {
    /// Log file to open (created if missing)
    #[arg(short, long, default_value = "db.log")]
    path: String,

    /// Write keys in table order instead of sorted order when compacting
    #[arg(long)]
    unsorted: bool,
}

const HELP: &str = "\
commands:
  set <key> <value>
  get <key>
  del <key>
  compact
  stats
  help
  exit";

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_writer(io::stderr).init();

    let args = Args::parse();
    let config = StoreConfig {
        sorted_compaction: !args.unsorted,
        ..StoreConfig::default()
    };

    let mut store = match Store::open_with_config(&args.path, config) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!("open {}: {e}", args.path);
            return ExitCode::FAILURE;
        }
    };

    let result = run(&mut store);

    if let Err(e) = store.close() {
        tracing::error!("close {}: {e}", args.path);
        return ExitCode::FAILURE;
    }
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("input error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(store: &mut Store) -> io::Result<()> {
    let mut out = io::stdout().lock();
    writeln!(out, "logkv: append-only log backed KV")?;
    writeln!(out, "{HELP}")?;
    prompt(&mut out)?;

    for line in io::stdin().lock().lines() {
        let line = line?;
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(cmd) = parts.first() else {
            prompt(&mut out)?;
            continue;
        };

        match cmd.to_lowercase().as_str() {
            "help" => writeln!(out, "{HELP}")?,
            "set" if parts.len() >= 3 => {
                let value = parts[2..].join(" ");
                match store.set(parts[1].as_bytes(), value.as_bytes()) {
                    Ok(()) => writeln!(out, "OK")?,
                    Err(e) => writeln!(out, "set error: {e}")?,
                }
            }
            "set" => writeln!(out, "usage: set <key> <value>")?,
            "get" if parts.len() == 2 => match store.get(parts[1].as_bytes()) {
                Some(value) => writeln!(out, "{}", String::from_utf8_lossy(value))?,
                None => writeln!(out, "(nil)")?,
            },
            "get" => writeln!(out, "usage: get <key>")?,
            "del" if parts.len() == 2 => match store.delete(parts[1].as_bytes()) {
                Ok(()) => writeln!(out, "OK")?,
                Err(e) => writeln!(out, "del error: {e}")?,
            },
            "del" => writeln!(out, "usage: del <key>")?,
            "compact" => {
                writeln!(out, "Compacting log...")?;
                match store.compact() {
                    Ok(stats) => writeln!(
                        out,
                        "Compact done: {} -> {} entries, {} -> {} bytes",
                        stats.entries_before,
                        stats.entries_after,
                        stats.bytes_before,
                        stats.bytes_after
                    )?,
                    Err(e) => writeln!(out, "compact error: {e}")?,
                }
            }
            "stats" => {
                let stats = store.stats();
                writeln!(
                    out,
                    "live_keys={} log_entries={} stale_entries={} log_bytes={}",
                    stats.live_keys, stats.log_entries, stats.stale_entries, stats.log_bytes
                )?;
            }
            "exit" | "quit" => {
                writeln!(out, "bye")?;
                return Ok(());
            }
            other => {
                writeln!(out, "unknown command: {other}")?;
                writeln!(out, "{HELP}")?;
            }
        }
        prompt(&mut out)?;
    }
    Ok(())
}

fn prompt(out: &mut impl Write) -> io::Result<()> {
    write!(out, "> ")?;
    out.flush()
}
