use anyhow::{Context, Result};
use clap::Parser;
use sersec::analyzer::Analyzer;
use sersec::cli::{Cli, OutputFormat};
use sersec::config::SersecConfig;
use sersec::trace;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Replay the whole trace; any invariant violation aborts before a report is written
fn analyze(args: &Cli, config: &SersecConfig) -> Result<Analyzer> {
    let mut analyzer = Analyzer::with_config(config);
    let reader = trace::open_trace(&args.trace)?;

    for entry in reader {
        let entry = entry?;
        analyzer.process(&entry).with_context(|| {
            format!(
                "Serial-section analysis aborted after {} entries",
                analyzer.entries_seen()
            )
        })?;
    }
    Ok(analyzer)
}

fn write_report<W: Write>(out: &mut W, args: &Cli, analyzer: &Analyzer) -> Result<()> {
    let sections = analyzer.sections();
    match args.format {
        OutputFormat::Text => sections.exit(out, args.top)?,
        OutputFormat::Json => {
            let mut doc = serde_json::Map::new();
            doc.insert(
                "trace".to_string(),
                serde_json::Value::String(args.trace.display().to_string()),
            );
            doc.insert("entries".to_string(), analyzer.entries_seen().into());
            sections.exit_json(&mut doc, args.top)?;
            serde_json::to_writer_pretty(&mut *out, &doc)?;
            writeln!(out)?;
        }
    }
    out.flush()?;
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();

    init_tracing(args.debug);

    let config = match &args.config {
        Some(path) => SersecConfig::from_toml(path)?,
        None => SersecConfig::default(),
    };

    let analyzer = analyze(&args, &config)?;

    match &args.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path.display()))?;
            write_report(&mut BufWriter::new(file), &args, &analyzer)
        }
        None => write_report(&mut io::stdout().lock(), &args, &analyzer),
    }
}
