use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info};
use sausage_file_converter::{
    convert_folder, ControlState, ConversionOptions, EventSink, OperationKind, Phase,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// input directory
    input: PathBuf,

    /// output directory, defaults to a sibling `<input>_sausage` folder
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// seconds of silence inserted between variations
    #[arg(short, long, default_value_t = 0.5)]
    silence: f64,

    /// skip variation members at or above this duration in seconds, 0 = unlimited
    #[arg(short, long, default_value_t = 0.0)]
    max_duration: f64,

    /// do not copy unmatched files into the output tree
    #[arg(long)]
    no_copy: bool,

    /// only scan the top level of the input directory
    #[arg(long)]
    no_recurse: bool,

    /// comma separated keywords; matching variation sets are skipped
    #[arg(short, long, value_delimiter = ',')]
    exclude: Vec<String>,

    /// tag appended to each output filename before the extension
    #[arg(short, long, default_value = "")]
    tag: String,

    /// number of threads to use, default to CPU core count
    #[arg(long)]
    threads: Option<usize>,

    /// directory for the run report, default to the per-user data folder
    #[arg(long)]
    report_dir: Option<PathBuf>,
}

/// Drives one indicatif bar per orchestrator phase.
struct CliSink {
    bar: Mutex<Option<(Phase, ProgressBar)>>,
}

impl CliSink {
    fn new() -> Self {
        CliSink {
            bar: Mutex::new(None),
        }
    }
}

impl EventSink for CliSink {
    fn progress(&self, completed: usize, total: usize, phase: Phase) {
        let mut guard = self.bar.lock().expect("progress bar lock poisoned");
        let needs_new_bar = !matches!(&*guard, Some((current, _)) if *current == phase);
        if needs_new_bar {
            if let Some((_, old)) = guard.take() {
                old.finish();
            }
            let bar = ProgressBar::new(total as u64);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
                    .expect("Internal Error: Failed to set progress bar style")
                    .progress_chars("#>-"),
            );
            bar.set_message(phase.to_string());
            *guard = Some((phase, bar));
        }
        if let Some((_, bar)) = &*guard {
            bar.set_length(total as u64);
            bar.set_position(completed as u64);
        }
    }

    fn log(&self, operation: OperationKind, success: bool, input: &Path, detail: &str) {
        if success {
            info!("{operation}: {:?} -> {detail}", input);
        } else {
            error!("{operation} failed for {:?}: {detail}", input);
        }
    }
}

fn main() -> Result<()> {
    _ = pretty_env_logger::formatted_builder()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_secs()
        .parse_default_env()
        .try_init();

    let cli = Cli::parse();

    let options = ConversionOptions {
        input_dir: cli.input,
        output_dir: cli.output,
        silence_duration: cli.silence,
        max_duration: cli.max_duration,
        copy_unmatched: !cli.no_copy,
        recurse_subfolders: !cli.no_recurse,
        exclusion_keywords: cli.exclude,
        append_tag: cli.tag,
        num_threads: cli.threads,
        report_dir: cli.report_dir,
    };

    info!("Starting conversion with options:");
    info!("  Input Directory: {:?}", options.input_dir);
    info!("  Output Directory: {:?}", options.output_dir);
    info!("  Silence Duration: {}s", options.silence_duration);
    if options.max_duration > 0.0 {
        info!("  Max Member Duration: {}s", options.max_duration);
    } else {
        info!("  Max Member Duration: unlimited");
    }
    info!("  Copy Unmatched: {}", options.copy_unmatched);
    info!("  Recurse Subfolders: {}", options.recurse_subfolders);
    if !options.exclusion_keywords.is_empty() {
        info!("  Exclusions: {:?}", options.exclusion_keywords);
    }
    info!("---");

    let control = ControlState::new();
    let sink = CliSink::new();

    match convert_folder(&options, &control, &sink) {
        Ok(report) => {
            info!(
                "Finished: {} converted, {} copied, {} errors.",
                report.converted.len(),
                report.copied.len(),
                report.errors.len()
            );
            Ok(())
        }
        Err(e) => {
            error!("Conversion failed: {e}");
            Err(e)?
        }
    }
}
