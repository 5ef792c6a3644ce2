//! `strata` – perceptual layering of an image sequence.
//!
//! ```text
//! strata run --config strata.toml --features frames.jsonl \
//!            --trajectory camera.csv --output walk.ply [--annotations ann.jsonl]
//! strata validate --config strata.toml
//! strata init --config strata.toml
//! ```
//!
//! `run` loads the inputs, drives the pipeline on a multi-threaded Tokio
//! runtime and writes the point cloud.  Ctrl-C stops the run cleanly: the
//! frames already processed are kept and the process exits with code 130.

mod config;
mod inputs;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use strata_cloud::PlyWriter;
use strata_middleware::{EventBus, Topic};
use strata_runtime::{
    AnnotationExporter, Pipeline, RunReport, ShutdownSignal, VecFeatureSource, init_tracing,
};
use strata_types::TrajectoryPoint;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "strata", version, about = "Turn a camera walk into a layered point cloud")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Process a detection stream and trajectory into a PLY point cloud.
    Run(RunArgs),
    /// Check a configuration file without reading any input.
    Validate {
        #[arg(long)]
        config: PathBuf,
    },
    /// Write a starter configuration file.
    Init {
        #[arg(long, default_value = "strata.toml")]
        config: PathBuf,
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, clap::Args)]
struct RunArgs {
    #[arg(long)]
    config: PathBuf,
    /// JSON lines, one frame feature record per line.
    #[arg(long)]
    features: PathBuf,
    /// CSV (`time,x,y,z[,qw,qx,qy,qz]`) or JSON array.
    #[arg(long)]
    trajectory: PathBuf,
    /// Destination `.ply` file.
    #[arg(long)]
    output: PathBuf,
    /// Also write per-frame object highlights as JSON lines.
    #[arg(long)]
    annotations: Option<PathBuf>,
}

/// Exit code of a run stopped by Ctrl-C.
const EXIT_CANCELLED: u8 = 130;

fn main() -> ExitCode {
    // Held until exit so exported spans are flushed.
    let _telemetry = init_tracing("strata");
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Run(args) => run(&args),
        Command::Validate { config } => validate(&config).map(|()| ExitCode::SUCCESS),
        Command::Init { config, force } => init(&config, force).map(|()| ExitCode::SUCCESS),
    };
    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e:#}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

fn run(args: &RunArgs) -> Result<ExitCode> {
    let file_cfg = config::load_from(&args.config)?;
    let pipeline_cfg = file_cfg.pipeline_config();
    let exporter = match &args.annotations {
        Some(_) => Some(AnnotationExporter::new(
            &pipeline_cfg.layers,
            &pipeline_cfg.highlight_layers,
        )?),
        None => None,
    };
    let mut pipeline = Pipeline::new(pipeline_cfg).context("invalid configuration")?;

    // Created before the inputs are read: a stale cloud at the output path
    // is removed even when loading fails.
    let mut writer = PlyWriter::create(&args.output, pipeline.schema().clone(), file_cfg.output_format)?;

    let trajectory = inputs::load_trajectory(&args.trajectory)?;
    let stream = inputs::load_features(&args.features)?;
    info!(
        frames = stream.frame_count(),
        missing = stream.gaps(),
        trajectory = trajectory.len(),
        "inputs loaded"
    );
    let features = stream.into_frames(trajectory.len())?;

    let bus = EventBus::default();
    if exporter.is_some() {
        pipeline = pipeline.with_bus(bus.clone());
    }

    let shutdown = ShutdownSignal::new();
    let handler_signal = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!();
        eprintln!("{}", "⚠  Ctrl-C received – finishing the current frame …".yellow().bold());
        handler_signal.trigger();
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; the run cannot be interrupted cleanly");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;

    let source = Arc::new(VecFeatureSource::with_gaps(features));
    let annotations = exporter.zip(args.annotations.clone());
    let report = runtime.block_on(execute(
        &pipeline,
        &bus,
        source,
        trajectory,
        &mut writer,
        &shutdown,
        annotations,
    ))?;

    let summary = writer.finish()?;
    print_report(&report, &summary.path);

    Ok(if report.cancelled {
        ExitCode::from(EXIT_CANCELLED)
    } else {
        ExitCode::SUCCESS
    })
}

/// Drive one run, with the annotation export alongside when requested.
async fn execute(
    pipeline: &Pipeline,
    bus: &EventBus,
    source: Arc<VecFeatureSource>,
    trajectory: Vec<TrajectoryPoint>,
    writer: &mut PlyWriter,
    shutdown: &ShutdownSignal,
    annotations: Option<(AnnotationExporter, PathBuf)>,
) -> Result<RunReport> {
    let export = annotations.map(|(exporter, path)| {
        let rx = bus.subscribe_to(Topic::Frames);
        tokio::spawn(exporter.export_to(rx, path))
    });

    let report = match pipeline.run(source, trajectory, writer, shutdown).await {
        Ok(report) => report,
        Err(e) => {
            if let Some(export) = export {
                export.abort();
            }
            return Err(e.into());
        }
    };
    if let Some(export) = export {
        let summary = export.await.context("annotation export task failed")??;
        if !summary.is_complete() {
            eprintln!(
                "{} annotation file is incomplete: {} frame(s) skipped",
                "⚠".yellow().bold(),
                summary.skipped
            );
        }
        info!(records = summary.records, skipped = summary.skipped, "annotation export finished");
    }
    Ok(report)
}

fn validate(path: &Path) -> Result<()> {
    let file_cfg = config::load_from(path)?;
    let pipeline = Pipeline::new(file_cfg.pipeline_config()).context("invalid configuration")?;

    println!("{} {}", "✓".green().bold(), path.display().to_string().bold());
    for layer in &pipeline.config().layers {
        println!(
            "    • {:<16} {:<9} window {}",
            layer.name.bold(),
            layer.category.to_string().dimmed(),
            layer.window
        );
    }
    let skipped = file_cfg.layers.iter().filter(|l| !l.enabled).count();
    if skipped > 0 {
        println!("    {} disabled layer(s) skipped", skipped);
    }
    println!("    output format: {}", file_cfg.output_format);
    Ok(())
}

fn init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    config::save_to(&config::FileConfig::example(), path)?;
    println!(
        "{} Config written to {}",
        "✓".green().bold(),
        path.display().to_string().bold()
    );
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn print_report(report: &RunReport, output: &Path) {
    println!();
    if report.cancelled {
        println!(
            "  {} {} of {} frames written before cancellation",
            "⚠".yellow().bold(),
            report.samples_written,
            report.frames
        );
    } else {
        println!("  {} {} points written", "✓".green().bold(), report.samples_written);
    }
    println!("  Output: {}", output.display().to_string().bold());

    println!();
    println!("  {:<16} {:>8} {:>13}", "layer", "active", "undetermined");
    for tally in &report.layers {
        let share = if report.samples_written == 0 {
            0.0
        } else {
            100.0 * tally.active_frames as f64 / report.samples_written as f64
        };
        let undetermined = if tally.undetermined > 0 {
            tally.undetermined.to_string().yellow()
        } else {
            tally.undetermined.to_string().dimmed()
        };
        println!("  {:<16} {:>7.1}% {:>13}", tally.layer, share, undetermined);
    }

    if report.missing_frames > 0 || report.timed_out_frames > 0 {
        println!();
        println!(
            "  {} {} missing and {} timed-out frame(s) treated as empty",
            "⚠".yellow(),
            report.missing_frames,
            report.timed_out_frames
        );
    }
    println!();
}
