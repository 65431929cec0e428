use anyhow::{Context, Result};
use clap::Parser;
use sigtrace::aggregate::{self, registry::ExportRegistry};
use sigtrace::cli::{Cli, Command};
use sigtrace::config::TracerConfig;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

fn load_config(path: Option<&Path>) -> Result<TracerConfig> {
    match path {
        Some(path) => TracerConfig::from_toml(path)
            .with_context(|| format!("Failed to load configuration: {}", path.display())),
        None => Ok(TracerConfig::default()),
    }
}

fn run_export(
    traces: &[PathBuf],
    out: Option<PathBuf>,
    name: Option<String>,
    config: Option<PathBuf>,
    per_thread: bool,
) -> Result<()> {
    let mut config = load_config(config.as_deref())?;
    if per_thread {
        config = config.with_per_thread_export(true);
    }

    let mut aggregator = aggregate::Aggregator::new(&config);
    for trace in traces {
        aggregator
            .ingest_stream(trace)
            .with_context(|| format!("Failed to replay trace: {}", trace.display()))?;
    }
    let records = aggregator.records();
    let profile = aggregator.finish();

    let out = out.unwrap_or_else(|| config.stats_path());
    let base = name.unwrap_or_else(|| base_name(&config.trace_name));
    let paths = profile
        .write_to(&out, &base)
        .with_context(|| format!("Failed to write export to {}", out.display()))?;

    println!(
        "Exported {} records ({} rows, {} arrays, {} callables)",
        records,
        profile.table().len(),
        profile.bulk().len(),
        profile.registry().len()
    );
    println!("  table:  {}", paths.table.display());
    println!("  arrays: {}", paths.arrays.display());
    println!("  header: {}", paths.header.display());
    Ok(())
}

/// Trace name without its stream extension
fn base_name(trace_name: &str) -> String {
    Path::new(trace_name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(trace_name)
        .to_string()
}

fn print_registry(registry: &ExportRegistry) {
    if registry.is_empty() {
        println!("No callables recorded");
        return;
    }

    for (id, entry) in &registry.callables {
        let qualified = if entry.module.is_empty() {
            entry.name.clone()
        } else {
            format!("{}.{}", entry.module, entry.name)
        };
        println!("{:016x}  {}  ({} calls)", id, qualified, entry.call_count());
        for site in &entry.call_sites {
            println!("    {}  [{} times]", site.call_site, site.times.len());
        }
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();

    // Initialize tracing if --debug flag is set
    init_tracing(args.debug);

    match args.command {
        Command::Export {
            traces,
            out,
            name,
            config,
            per_thread,
        } => run_export(&traces, out, name, config, per_thread)?,
        Command::Show { header } => {
            let registry = ExportRegistry::read(&header)
                .with_context(|| format!("Failed to read header: {}", header.display()))?;
            print_registry(&registry);
        }
    }

    Ok(())
}
