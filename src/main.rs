use anyhow::{Context, Result};
use clap::Parser;
use gwtmetrics::{
    cli::{Cli, Commands, OutputFormat},
    collator::{CollationEngine, ManualClock, SharedCollator},
    config::CollatorConfig,
    event::RawEvent,
    inspector::{Inspector, NO_TARGET_MESSAGE},
    locator::{Host, HostSnapshot},
    sink::LoggerKind,
    sweeper::Sweeper,
};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
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

struct CollateArgs {
    logger: String,
    input: Option<PathBuf>,
    snapshot: Option<PathBuf>,
    config: Option<PathBuf>,
    timeout_ms: Option<u64>,
    sweep_interval_ms: Option<u64>,
}

fn load_config(args: &CollateArgs) -> Result<CollatorConfig> {
    let mut config = match &args.config {
        Some(path) => CollatorConfig::from_file(path)?,
        None => CollatorConfig::default(),
    };
    if let Some(timeout_ms) = args.timeout_ms {
        config.timeout_ms = timeout_ms;
    }
    if let Some(interval_ms) = args.sweep_interval_ms {
        config.sweep_interval_ms = interval_ms;
    }
    config.validate()?;
    Ok(config)
}

fn load_host(path: &Path) -> Result<Host> {
    let snapshot = HostSnapshot::from_file(path)
        .with_context(|| format!("Failed to load host snapshot {}", path.display()))?;
    Ok(Host::from(snapshot))
}

fn open_input(input: Option<&Path>) -> Result<Box<dyn BufRead>> {
    match input {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("Failed to open event stream {}", path.display()))?;
            Ok(Box::new(BufReader::new(file)))
        }
        None => Ok(Box::new(BufReader::new(io::stdin()))),
    }
}

fn run_collate(args: CollateArgs) -> Result<()> {
    let config = load_config(&args)?;
    let kind = LoggerKind::from_token(&args.logger);
    tracing::debug!(
        ?kind,
        timeout_ms = config.timeout().as_millis() as u64,
        sweep_interval_ms = config.sweep_interval().as_millis() as u64,
        terminal_marker = %config.terminal_marker,
        "starting collation"
    );

    // Expiry follows the newest timestamp read, not the wall clock
    let stream_clock = Arc::new(ManualClock::new(i64::MIN));
    let engine = CollationEngine::new(&config, kind.build());
    let collator = SharedCollator::new(engine, stream_clock.clone());

    let host = match &args.snapshot {
        Some(path) => {
            let mut host = load_host(path)?;
            let installed = host.install(&collator);
            if installed == 0 {
                tracing::warn!("{}; events go through the global hook only", NO_TARGET_MESSAGE);
            }
            Some(host)
        }
        None => None,
    };

    let _sweeper = Sweeper::spawn(collator.clone(), config.sweep_interval())?;

    let reader = open_input(args.input.as_deref())?;
    for (index, line) in reader.lines().enumerate() {
        let line = line.context("Failed to read event stream")?;
        if line.trim().is_empty() {
            continue;
        }
        let event = match RawEvent::from_json_line(&line) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(line = index + 1, error = %e, "skipping malformed event");
                continue;
            }
        };
        let outcome = match &host {
            Some(host) => host.deliver(&event),
            None => Some(collator.ingest(&event)),
        };
        if let Some(outcome) = outcome {
            tracing::trace!(key = %outcome.key(), ?outcome, "event ingested");
        }
        stream_clock.observe(event.millis);
    }

    // Nothing can complete once the input is exhausted
    let flushed = collator.expire_all();
    if flushed > 0 {
        tracing::debug!(flushed, "expired operations still open at end of input");
    }

    let stats = collator.stats();
    eprintln!(
        "gwtmetrics: {} events, {} operations completed, {} timed out",
        stats.ingested, stats.completed, stats.timed_out
    );
    Ok(())
}

fn run_inspect(snapshot: &Path, format: OutputFormat) -> Result<()> {
    let host = load_host(snapshot)?;
    let report = Inspector::new(&host).report();
    match format {
        OutputFormat::Text => print!("{}", report.render_text()),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}

fn run_type_id(snapshot: &Path, id: i64) -> Result<()> {
    let host = load_host(snapshot)?;
    let inspector = Inspector::new(&host);
    let Some(recovery) = inspector.recovery() else {
        println!("{}", NO_TARGET_MESSAGE);
        return Ok(());
    };
    match recovery.get_class_from_type_id(id) {
        Some(name) => println!("{}", name),
        None => println!("No class with type id {}", id),
    }
    Ok(())
}

fn run_deobfuscate(snapshot: &Path, name: &str, format: OutputFormat) -> Result<()> {
    let host = load_host(snapshot)?;
    let inspector = Inspector::new(&host);
    let Some(recovery) = inspector.recovery() else {
        println!("{}", NO_TARGET_MESSAGE);
        return Ok(());
    };

    let descriptor = recovery
        .deobfuscate_rpc_method(name)
        .with_context(|| format!("Failed to deobfuscate RPC method {}", name))?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&descriptor)?),
        OutputFormat::Text if descriptor.is_empty() => {
            println!("RPC method not found: {}", name)
        }
        OutputFormat::Text => {
            println!("Method:          {}", descriptor.raw_name);
            println!("Name:            {}", descriptor.pretty_name);
            println!("Parameters:      {}", descriptor.parameter_count);
            println!("Append helper:   {}", descriptor.append_helper);
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();

    init_tracing(args.debug);

    match args.command {
        Commands::Collate {
            logger,
            input,
            snapshot,
            config,
            timeout_ms,
            sweep_interval_ms,
        } => run_collate(CollateArgs {
            logger,
            input,
            snapshot,
            config,
            timeout_ms,
            sweep_interval_ms,
        }),
        Commands::Inspect { snapshot, format } => run_inspect(&snapshot, format),
        Commands::TypeId { snapshot, id } => run_type_id(&snapshot, id),
        Commands::Deobfuscate {
            snapshot,
            name,
            format,
        } => run_deobfuscate(&snapshot, &name, format),
    }
}
