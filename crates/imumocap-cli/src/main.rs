//! `imumocap` – IMU motion-capture command line.
//!
//! Streams retargeted poses as JSON lines (stdout by default) for a viewer
//! to consume:
//!
//! - `imumocap animate` – plays a scripted animation of a built-in model.
//! - `imumocap stream` – runs the live pipeline against a simulated sensor
//!   rig.  Press Enter to recalibrate.
//! - `imumocap replay <logs.json>` – resamples logged device data, records
//!   the retargeted frames and loops them.
//! - `imumocap config show|init|path` – inspect or create
//!   `~/.imumocap/config.toml`.
//!
//! Ctrl-C stops any running command cleanly.

mod config;
mod demo;
mod models;

use std::fs::File;
use std::io::{self, BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use clap::{Parser, Subcommand};
use colored::Colorize;
use imumocap_runtime::{
    ChannelSource, DeviceLog, JsonLinesSink, PipelineStats, ReplaySource,
    StreamingPipeline,
};
use imumocap_types::MocapError;
use tracing::{info, warn};

use crate::config::Config;
use crate::models::Model;

#[derive(Parser, Debug)]
#[command(name = "imumocap")]
#[command(about = "Retarget IMU orientations onto a skeleton and stream the poses", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to ~/.imumocap/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured frame rate.
    #[arg(long, global = true)]
    fps: Option<u32>,

    /// Write frames to this file instead of stdout.
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play a scripted animation of a built-in model.
    Animate {
        #[arg(short, long, value_enum)]
        model: Option<Model>,
        /// Frames per animation cycle.
        #[arg(long, default_value_t = 100)]
        frames: usize,
        /// Number of cycles (runs until Ctrl-C when omitted).
        #[arg(long)]
        passes: Option<usize>,
    },

    /// Stream from a simulated sensor rig; press Enter to recalibrate.
    Stream {
        #[arg(short, long, value_enum)]
        model: Option<Model>,
        /// Yaw between the rig's reference and world forward, degrees.
        #[arg(long, default_value_t = 30.0, allow_negative_numbers = true)]
        heading_bias: f64,
        /// Extra links without a sensor.
        #[arg(long = "ignore")]
        ignore: Vec<String>,
    },

    /// Replay device logs (JSON array of `{name, timestamps_us, quaternions}`).
    Replay {
        logs: PathBuf,
        #[arg(short, long, value_enum)]
        model: Option<Model>,
        /// Number of loops over the recorded frames (until Ctrl-C when omitted).
        #[arg(long)]
        passes: Option<usize>,
    },

    /// Configuration management.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Print the effective configuration.
    Show,
    /// Write a default configuration file.
    Init {
        #[arg(short, long, value_enum, default_value_t = Model::LowerBody)]
        model: Model,
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Print the config file location.
    Path,
}

fn main() -> ExitCode {
    imumocap_runtime::init_tracing("imumocap");
    let cli = Cli::parse();

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!();
        eprintln!("{}", "⚠  Ctrl-C received – stopping …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; Ctrl-C will not stop cleanly");
    }

    match run(cli, &shutdown) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {e}", "error".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, shutdown: &Arc<AtomicBool>) -> Result<(), MocapError> {
    let path = cli.config.clone().unwrap_or_else(config::config_path);
    let output = cli.output.as_deref();

    let stats = match cli.command {
        Commands::Config(cmd) => return run_config(&cmd, &path),

        Commands::Animate { model, frames, passes } => {
            let cfg = effective_config(&path, cli.fps)?;
            let model = model.unwrap_or(cfg.model);
            let tree = model.tree()?;
            let animation = demo::animation(&tree, frames.max(1));
            eprintln!(
                "  Animating {} ({} frames per cycle at {} fps)",
                model.to_string().bold(),
                animation.len(),
                cfg.stream.fps
            );
            let mut sink = JsonLinesSink::new(open_output(output)?);
            let mut pipeline = StreamingPipeline::new(tree, cfg.stream)?;
            pipeline.run_playback(&animation, &mut sink, passes, shutdown)?
        }

        Commands::Stream { model, heading_bias, ignore } => {
            let mut cfg = effective_config(&path, cli.fps)?;
            let model = model.unwrap_or(cfg.model);
            cfg.stream.ignored_links.extend(ignore);
            cfg.stream.ignored_links.sort();
            cfg.stream.ignored_links.dedup();
            let mut sink = JsonLinesSink::new(open_output(output)?);
            stream(model, cfg, heading_bias, &mut sink, shutdown)?
        }

        Commands::Replay { logs, model, passes } => {
            let cfg = effective_config(&path, cli.fps)?;
            let model = model.unwrap_or(cfg.model);
            let mut sink = JsonLinesSink::new(open_output(output)?);
            replay(model, cfg, &logs, passes, &mut sink, shutdown)?
        }
    };

    print_stats(&stats);
    Ok(())
}

/// Config file plus environment, with the command-line rate on top.
fn effective_config(path: &Path, fps: Option<u32>) -> Result<Config, MocapError> {
    let mut cfg = config::resolve(path)?;
    if let Some(fps) = fps {
        cfg.stream.fps = fps;
        cfg.stream.validate()?;
    }
    Ok(cfg)
}

fn stream<W: Write>(
    model: Model,
    cfg: Config,
    heading_bias: f64,
    sink: &mut JsonLinesSink<W>,
    shutdown: &Arc<AtomicBool>,
) -> Result<PipelineStats, MocapError> {
    let tree = model.tree()?;
    let (tx, mut source) = ChannelSource::channel();
    let rig = demo::spawn_rig(
        tree.clone(),
        demo::RigSettings {
            fps: cfg.stream.fps,
            cycle_frames: 120,
            heading_bias_deg: heading_bias,
            rest_frames: rest_frames(&cfg),
            ignored_links: cfg.stream.ignored_links.clone(),
        },
        tx,
        Arc::clone(shutdown),
    )?;

    // Each line on stdin requests a recalibration.
    let mut recalibrate = Arc::new(AtomicBool::new(false));
    let request = Arc::clone(&recalibrate);
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            if line.is_err() {
                break;
            }
            request.store(true, Ordering::Release);
        }
    });

    eprintln!(
        "  Streaming {} at {} fps.  Hold still for calibration; press {} to recalibrate.",
        model.to_string().bold(),
        cfg.stream.fps,
        "Enter".bold().cyan()
    );
    let mut pipeline = StreamingPipeline::new(tree, cfg.stream)?;
    let result = pipeline.run(&mut source, sink, &mut recalibrate, shutdown);

    shutdown.store(true, Ordering::SeqCst);
    drop(source);
    if rig.join().is_err() {
        warn!("rig thread panicked");
    }
    result
}

/// Rig frames held at rest: the calibration countdown plus one second.
fn rest_frames(cfg: &Config) -> usize {
    let hold_ms = u64::from(cfg.stream.calibration_countdown) * cfg.stream.countdown_interval_ms + 1000;
    (u64::from(cfg.stream.fps) * hold_ms / 1000).max(1) as usize
}

fn replay<W: Write>(
    model: Model,
    mut cfg: Config,
    logs: &Path,
    passes: Option<usize>,
    sink: &mut JsonLinesSink<W>,
    shutdown: &AtomicBool,
) -> Result<PipelineStats, MocapError> {
    let raw = std::fs::read_to_string(logs)
        .map_err(|e| MocapError::Source(format!("failed to read {}: {e}", logs.display())))?;
    let logs: Vec<DeviceLog> = serde_json::from_str(&raw)
        .map_err(|e| MocapError::Source(format!("failed to parse device logs: {e}")))?;

    let mut source = ReplaySource::new(&logs, cfg.stream.fps)?;
    // Logged sessions start in the reference pose.
    cfg.stream.calibrate_on_first_frame = true;
    let mut pipeline = StreamingPipeline::new(model.tree()?, cfg.stream)?;
    let frames = pipeline.record(&mut source)?;
    info!(frames = frames.len(), devices = logs.len(), "logs retargeted");
    eprintln!(
        "  Replaying {} frames from {} device(s)",
        frames.len().to_string().bold(),
        logs.len()
    );
    pipeline.run_playback(&frames, sink, passes, shutdown)
}

fn run_config(cmd: &ConfigCommand, path: &Path) -> Result<(), MocapError> {
    match cmd {
        ConfigCommand::Show => {
            let cfg = config::resolve(path)?;
            let raw = toml::to_string_pretty(&cfg)
                .map_err(|e| MocapError::InvalidConfig(e.to_string()))?;
            println!("# {}", path.display());
            print!("{raw}");
        }
        ConfigCommand::Init { model, force } => {
            if path.exists() && !force {
                return Err(MocapError::InvalidConfig(format!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                )));
            }
            config::save_to(&Config::for_model(*model), path)?;
            eprintln!(
                "  {} Config saved to {}",
                "✓".green().bold(),
                path.display().to_string().bold()
            );
        }
        ConfigCommand::Path => println!("{}", path.display()),
    }
    Ok(())
}

fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>, MocapError> {
    match path {
        Some(p) => {
            let file = File::create(p)
                .map_err(|e| MocapError::Sink(format!("failed to create {}: {e}", p.display())))?;
            Ok(Box::new(BufWriter::new(file)))
        }
        None => Ok(Box::new(io::stdout().lock())),
    }
}

fn print_stats(stats: &PipelineStats) {
    eprintln!();
    eprintln!("  {} {} frames emitted", "✓".green().bold(), stats.frames_emitted);
    if stats.calibrations > 0 {
        eprintln!("    calibrations:      {}", stats.calibrations);
    }
    if stats.skipped_readings > 0 {
        eprintln!("    skipped readings:  {}", stats.skipped_readings.to_string().yellow());
    }
    if stats.heading_failures + stats.calibration_failures > 0 {
        eprintln!(
            "    failed heading/calibration: {}/{}",
            stats.heading_failures.to_string().yellow(),
            stats.calibration_failures.to_string().yellow()
        );
    }
    if stats.overruns > 0 {
        eprintln!("    timing overruns:   {}", stats.overruns.to_string().yellow());
    }
}
