use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{error, info, warn};

use edmd::core::{Simulation, StopCondition, StopReason};
use edmd::output::{write_json, OutputFormat, RunReport, Snapshot, XyzWriter};
use edmd::WorldConfig;

#[derive(Parser)]
#[command(name = "edmd")]
#[command(about = "Event-driven molecular dynamics", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a simulation described by a JSON world file
    Run(RunArgs),
    /// Validate a world file and initialise it without running
    Check {
        /// JSON world description
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// JSON world description
    #[arg(short, long)]
    config: PathBuf,

    /// Stop after this many events
    #[arg(long)]
    events: Option<u64>,

    /// Stop at this absolute simulation time
    #[arg(long)]
    time: Option<f64>,

    /// Stop after this many seconds of wall-clock time
    #[arg(long, value_name = "SECS")]
    wall_clock: Option<f64>,

    /// Trajectory output file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Trajectory format
    #[arg(long, default_value = "xyz")]
    format: OutputFormat,

    /// Number of frames written after the initial one
    #[arg(long, default_value_t = 1)]
    frames: u32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run(args),
        Commands::Check { config } => check(&config),
    }
}

fn load(path: &Path) -> Result<Simulation> {
    let cfg = WorldConfig::from_path(path)
        .with_context(|| format!("Failed to read world file {}", path.display()))?;
    cfg.into_simulation()
        .with_context(|| format!("Failed to initialise world from {}", path.display()))
}

fn check(path: &Path) -> Result<()> {
    let sim = load(path)?;
    info!(
        "{}: {} particles, packing fraction {:.4}, first event at {:?}",
        path.display(),
        sim.num_particles(),
        sim.packing_fraction(),
        sim.next_event_time()
    );
    Ok(())
}

enum Sink {
    Xyz(XyzWriter<BufWriter<File>>),
    Json(BufWriter<File>, Vec<Snapshot>),
}

impl Sink {
    fn open(path: &Path, format: OutputFormat) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create output {}", path.display()))?;
        let out = BufWriter::new(file);
        Ok(match format {
            OutputFormat::Xyz => Sink::Xyz(XyzWriter::new(out)),
            OutputFormat::Json => Sink::Json(out, Vec::new()),
        })
    }

    fn frame(&mut self, sim: &Simulation) -> Result<()> {
        let snap = Snapshot::capture(sim);
        match self {
            Sink::Xyz(w) => w.write_frame(&snap)?,
            Sink::Json(_, frames) => frames.push(snap),
        }
        Ok(())
    }

    fn finish(self, sim: &Simulation) -> Result<()> {
        match self {
            Sink::Xyz(w) => {
                w.into_inner().flush()?;
            }
            Sink::Json(out, frames) => {
                write_json(out, &RunReport::new(sim, &frames))?;
            }
        }
        Ok(())
    }
}

fn run(args: RunArgs) -> Result<()> {
    if args.events.is_none() && args.time.is_none() && args.wall_clock.is_none() {
        bail!("at least one of --events, --time or --wall-clock is required");
    }
    if args.frames == 0 {
        bail!("--frames must be at least 1");
    }
    let mut sim = load(&args.config)?;
    if let Some(t) = args.time {
        if !(t.is_finite() && t >= sim.time()) {
            bail!("--time {t} must be finite and not earlier than {}", sim.time());
        }
    }

    let stop_flag = Arc::new(AtomicBool::new(false));
    if let Some(secs) = args.wall_clock {
        let limit = Duration::try_from_secs_f64(secs)
            .with_context(|| format!("invalid --wall-clock {secs}"))?;
        let flag = Arc::clone(&stop_flag);
        thread::spawn(move || {
            thread::sleep(limit);
            flag.store(true, Ordering::Relaxed);
        });
    }

    let mut sink = match &args.output {
        Some(path) => Some(Sink::open(path, args.format)?),
        None => None,
    };
    if let Some(s) = sink.as_mut() {
        s.frame(&sim)?;
    }

    let started = Instant::now();
    let t0 = sim.time();
    let k = u64::from(args.frames);
    let mut done = 0u64;
    for frame in 1..=k {
        let max_time = args.time.map(|t| t0 + (t - t0) * frame as f64 / k as f64);
        let max_events = args.events.map(|n| {
            let target = n * frame / k;
            target.saturating_sub(done)
        });
        let outcome = sim.run(&StopCondition {
            max_events,
            max_time,
            stop_flag: Some(Arc::clone(&stop_flag)),
        });
        let summary = match outcome {
            Ok(summary) => summary,
            Err(e) if e.is_fatal() => {
                error!("aborting at t={} after {} events: {e}", sim.time(), sim.event_count());
                // Keep the frames written before the failure.
                if let Some(s) = sink.take() {
                    s.finish(&sim)?;
                }
                return Err(e).context("simulation aborted");
            }
            Err(e) => return Err(e.into()),
        };
        done += summary.events;
        if let Some(s) = sink.as_mut() {
            s.frame(&sim)?;
        }
        match summary.reason {
            StopReason::Interrupted => {
                warn!("wall-clock limit reached at t={}", sim.time());
                break;
            }
            StopReason::QueueExhausted => {
                warn!("no further events after t={}", sim.time());
                break;
            }
            StopReason::EventLimit | StopReason::TimeLimit => {}
        }
    }

    if let Some(s) = sink {
        s.finish(&sim)?;
    }

    let elapsed = started.elapsed().as_secs_f64();
    info!(
        "finished: {} events ({} stale) to t={:.6} in {:.2}s, KE={:.6} U={:.6}",
        done,
        sim.stale_count(),
        sim.time(),
        elapsed,
        sim.kinetic_energy(),
        sim.internal_energy()
    );
    for (ty, n) in sim.event_counts() {
        if n > 0 {
            info!("  {ty:?}: {n}");
        }
    }
    Ok(())
}
