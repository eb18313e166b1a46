use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use intake::{drain, Intake, MemoryQueue};
use miniscan_core::{MemoryStore, ScanStore};
use reconcile::Processor;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

const DEFAULT_MAX_IN_FLIGHT: usize = 8;
const DEFAULT_MAX_DELIVERIES: u32 = 5;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat { Text, Json, Jsonl }

#[derive(Debug, Parser)]
#[command(name = "miniscan", version, about = "Reconcile streamed scan observations into a last-write-wins store")]
struct Cli {
    /// Optional config file (YAML). If omitted, loads ./miniscan.yaml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log filter (e.g. info, debug, miniscan=trace). Overrides config and RUST_LOG.
    #[arg(long, global = true)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,
    /// Decode and reconcile newline-delimited scan messages
    Process {
        /// Input file with one JSON envelope per line. Reads stdin if omitted.
        #[arg(long, value_name = "FILE")]
        input: Option<PathBuf>,
        /// SQLite database path. Uses an in-memory store if omitted.
        #[arg(long, value_name = "PATH")]
        db: Option<PathBuf>,
        /// Messages handled concurrently
        #[arg(long)]
        max_in_flight: Option<usize>,
        /// Deliveries per message before a transient failure is dead-lettered
        #[arg(long)]
        max_deliveries: Option<u32>,
        /// Summary format: text or json
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Emit synthetic scan envelopes as JSON lines
    #[cfg(feature = "generate")]
    Generate {
        /// Number of envelopes
        #[arg(long)]
        count: Option<u64>,
        /// RNG seed for a reproducible stream
        #[arg(long)]
        seed: Option<u64>,
        /// Envelopes per second; 0 disables pacing
        #[arg(long)]
        qps: Option<u32>,
        /// Fraction of envelopes backdated by up to a day
        #[arg(long)]
        stale_ratio: Option<f64>,
        /// Output file (overwrites). Stdout if omitted.
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
    /// List stored scan records
    #[cfg(feature = "results")]
    Records {
        /// SQLite database path
        #[arg(long, value_name = "PATH")]
        db: Option<PathBuf>,
        /// Output format: text, json, or jsonl
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
        /// Write CSV instead of text/json
        #[arg(long, default_value_t = false)]
        csv: bool,
    },
}

fn init_logging(level: Option<&str>) -> Result<()> {
    let filter = match level {
        Some(l) => EnvFilter::try_new(l).with_context(|| format!("invalid log filter {l:?}"))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn rfc3339(ts: i64) -> String {
    OffsetDateTime::from_unix_timestamp(ts)
        .ok()
        .and_then(|t| t.format(&Rfc3339).ok())
        .unwrap_or_else(|| ts.to_string())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(cli.config.as_deref())?;
    init_logging(cli.log_level.as_deref().or(cfg.log.level.as_deref()))?;

    match cli.command {
        Commands::Version => {
            println!("miniscan {} (core {})", env!("CARGO_PKG_VERSION"), miniscan_core::version());
        }
        Commands::Process { input, db, max_in_flight, max_deliveries, format } => {
            let db = db.or(cfg.store.path.clone());
            let max_in_flight = max_in_flight.or(cfg.intake.max_in_flight).unwrap_or(DEFAULT_MAX_IN_FLIGHT);
            let max_deliveries = max_deliveries.or(cfg.intake.max_deliveries).unwrap_or(DEFAULT_MAX_DELIVERIES);
            let messages = read_messages(input.as_deref())?;
            info!(count = messages.len(), max_in_flight, max_deliveries, "loaded messages");

            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_process(messages, db.as_deref(), max_in_flight, max_deliveries, format))?;
        }
        #[cfg(feature = "generate")]
        Commands::Generate { count, seed, qps, stale_ratio, out } => {
            let opts = GenerateOpts {
                count: count.or(cfg.generate.count).unwrap_or(10),
                seed: seed.or(cfg.generate.seed),
                qps: qps.or(cfg.generate.qps).unwrap_or(0),
                stale_ratio: stale_ratio.or(cfg.generate.stale_ratio).unwrap_or(0.0),
            };
            if !(0.0..=1.0).contains(&opts.stale_ratio) {
                return Err(anyhow!("--stale-ratio must be within 0.0..=1.0"));
            }
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_generate(opts, out))?;
        }
        #[cfg(feature = "results")]
        Commands::Records { db, format, csv } => {
            let db = db
                .or(cfg.store.path.clone())
                .ok_or_else(|| anyhow!("provide --db, {} or store.path in config", config::ENV_DB))?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_records(&db, format, csv))?;
        }
    }
    Ok(())
}

/// One message per non-blank line.
fn read_messages(input: Option<&Path>) -> Result<Vec<Vec<u8>>> {
    let reader: Box<dyn BufRead> = match input {
        Some(p) => Box::new(BufReader::new(
            File::open(p).with_context(|| format!("opening {}", p.display()))?,
        )),
        None => Box::new(BufReader::new(std::io::stdin())),
    };
    let mut out = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if !line.is_empty() {
            out.push(line.as_bytes().to_vec());
        }
    }
    Ok(out)
}

fn open_store(db: Option<&Path>) -> Result<Arc<dyn ScanStore>> {
    match db {
        #[cfg(feature = "results")]
        Some(path) => Ok(Arc::new(results_sqlite::SqliteStore::open(path)?)),
        #[cfg(not(feature = "results"))]
        Some(path) => Err(anyhow!("{} requested but built without the `results` feature", path.display())),
        None => {
            warn!("no database configured; records are kept in memory and discarded on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

async fn run_process(
    messages: Vec<Vec<u8>>,
    db: Option<&Path>,
    max_in_flight: usize,
    max_deliveries: u32,
    format: OutputFormat,
) -> Result<()> {
    let store = open_store(db)?;
    let queue = Arc::new(MemoryQueue::new(max_deliveries));
    for m in messages {
        queue.publish(m);
    }
    let intake = Arc::new(Intake::new(Processor::new(store.clone())));

    let summary = tokio::select! {
        s = drain(queue.clone(), intake, max_in_flight) => s,
        _ = tokio::signal::ctrl_c() => {
            warn!(pending = queue.pending(), "interrupted; stopping before the queue drained");
            store.close().await?;
            return Err(anyhow!("interrupted"));
        }
    };
    store.close().await?;

    let dead = queue.dead_letters();
    info!(acked = summary.acked, redelivered = summary.redelivered, dead_lettered = summary.dead_lettered, "drain complete");
    match format {
        OutputFormat::Json | OutputFormat::Jsonl => {
            let obj = serde_json::json!({ "summary": summary, "dead_letters": dead });
            println!("{}", serde_json::to_string(&obj)?);
        }
        OutputFormat::Text => {
            println!(
                "acked: {}  redelivered: {}  dead-lettered: {}  aborted: {}",
                summary.acked, summary.redelivered, summary.dead_lettered, summary.aborted
            );
            for d in dead {
                println!("dead {} (attempts {}): {}", d.id, d.attempts, d.reason);
            }
        }
    }
    Ok(())
}

#[cfg(feature = "generate")]
struct GenerateOpts {
    count: u64,
    seed: Option<u64>,
    qps: u32,
    stale_ratio: f64,
}

#[cfg(feature = "generate")]
async fn run_generate(opts: GenerateOpts, out: Option<PathBuf>) -> Result<()> {
    use miniscan_core::pacer::Pacer;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    let seed = opts.seed.unwrap_or_else(|| rand::thread_rng().gen());
    info!(seed, count = opts.count, qps = opts.qps, "generating scans");
    let mut rng = StdRng::seed_from_u64(seed);
    let gen = synth::Generator { stale_ratio: opts.stale_ratio, ..synth::Generator::default() };
    let pacer = (opts.qps > 0).then(|| Pacer::new(opts.qps, 1));

    let mut w: Box<dyn Write> = match out {
        Some(p) => Box::new(BufWriter::new(File::create(&p).with_context(|| format!("creating {}", p.display()))?)),
        None => Box::new(BufWriter::new(std::io::stdout())),
    };
    for _ in 0..opts.count {
        if let Some(p) = &pacer {
            p.acquire().await;
        }
        let env = gen.next(&mut rng, OffsetDateTime::now_utc().unix_timestamp());
        w.write_all(&env.to_json()?)?;
        w.write_all(b"\n")?;
        if pacer.is_some() {
            w.flush()?;
        }
    }
    w.flush()?;
    Ok(())
}

#[cfg(feature = "results")]
async fn run_records(db: &Path, format: OutputFormat, csv: bool) -> Result<()> {
    let store = results_sqlite::SqliteStore::open(db)?;
    let rows = store.list().await?;
    store.close().await?;

    let stdout = std::io::stdout();
    if csv {
        let mut wtr = csv::Writer::from_writer(stdout.lock());
        for r in &rows {
            wtr.serialize(r)?;
        }
        wtr.flush()?;
        return Ok(());
    }
    let mut w = BufWriter::new(stdout.lock());
    match format {
        OutputFormat::Text => {
            for r in &rows {
                writeln!(w, "{}:{}/{}\t{}\t{}", r.ip, r.port, r.service, rfc3339(r.last_scanned_at), r.response_text)?;
            }
            writeln!(w, "{} record(s)", rows.len())?;
        }
        OutputFormat::Json => writeln!(w, "{}", serde_json::to_string_pretty(&rows)?)?,
        OutputFormat::Jsonl => {
            for r in &rows {
                writeln!(w, "{}", serde_json::to_string(r)?)?;
            }
        }
    }
    w.flush()?;
    Ok(())
}
