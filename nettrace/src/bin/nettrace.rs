use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use clap::Parser;
use eyre::{Context, Result};
use nettrace::TraceReader;

#[derive(Parser)]
#[command(name = "nettrace")]
#[command(about = "parse .nettrace event-pipe captures")]
#[command(version)]
struct Args {
    #[arg(help = "input .nettrace file")]
    input: PathBuf,

    #[arg(short, long, help = "write the parsed trace as json")]
    output: Option<PathBuf>,

    #[arg(long, help = "print per-provider event counts")]
    stats: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let file = File::open(&args.input)
        .with_context(|| format!("failed to open {}", args.input.display()))?;

    let trace = TraceReader::new()
        .with_progress(|progress| {
            tracing::debug!(
                bytes = progress.bytes_read,
                events = progress.events_read,
                "parsing"
            );
        })
        .read_from(file)
        .with_context(|| format!("failed to parse {}", args.input.display()))?;

    let span_ns = trace
        .events
        .last()
        .map(|event| event.time_stamp_ns)
        .unwrap_or(0);
    tracing::info!(
        date = %trace.metadata.date,
        process_id = trace.metadata.process_id,
        events = trace.events.len(),
        event_types = trace.event_metadata.len(),
        span_ms = span_ns / 1_000_000,
        "trace parsed"
    );

    if args.stats {
        let mut per_provider: BTreeMap<&str, usize> = BTreeMap::new();
        for event in &trace.events {
            *per_provider
                .entry(event.metadata.provider_name.as_ref())
                .or_default() += 1;
        }
        for (provider, count) in per_provider {
            println!("{count:>10}  {provider}");
        }
    }

    if let Some(output) = &args.output {
        let writer = BufWriter::new(
            File::create(output)
                .with_context(|| format!("failed to create {}", output.display()))?,
        );
        serde_json::to_writer(writer, &trace)?;
        tracing::info!(output = %output.display(), "trace written");
    }

    Ok(())
}
