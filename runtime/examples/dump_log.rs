//! Dump every event of every sub-log as JSON lines.
//!
//! Usage: cargo run --example dump_log -- <decoder.wasm> <log.bbl>

use std::env;
use std::fs;

use anyhow::{bail, Context, Result};
use blackbox_runtime::{Error, Loader};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = env::args().skip(1);
    let (Some(module_path), Some(log_path)) = (args.next(), args.next()) else {
        bail!("usage: dump_log <decoder.wasm> <log.bbl>");
    };

    let module = fs::read(&module_path).with_context(|| format!("reading {module_path}"))?;
    let log = fs::read(&log_path).with_context(|| format!("reading {log_path}"))?;

    let loader = Loader::from_bytes(module)?;
    let file = loader.load_file(&log)?;

    for index in 0..file.log_count()? {
        let headers = match file.parse_headers(index) {
            Ok(Some(headers)) => headers,
            Ok(None) => break,
            Err(Error::Parse(message)) => {
                tracing::warn!(index, %message, "skipping unparseable sub-log");
                continue;
            }
            Err(err) => return Err(err.into()),
        };

        eprintln!(
            "# log {index}: {} {} ({})",
            headers.firmware_kind()?,
            headers.firmware_version()?,
            headers.firmware_revision()?,
        );

        let parser = headers.get_data_parser(None)?;
        for event in parser.events() {
            println!("{}", serde_json::to_string(&event?)?);
        }

        let stats = parser.stats()?;
        eprintln!("# log {index}: {:?}", stats.counts);
    }

    Ok(())
}
