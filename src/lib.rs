//! Batch conversion of WAV "variation sets" into single concatenated files.
//!
//! A folder is scanned for files whose names differ only by a numeric index
//! (`impact_01.wav`, `impact_02.wav`, ...). Each set is concatenated into one
//! file with silence in between, harmonized to a common sample rate and
//! channel layout, and the first member's vendor metadata is grafted onto the
//! output. Unmatched files can be mirrored into the output tree, and a run
//! report is persisted at the end.

/// Module for audio decoding, harmonization and concatenation
pub mod engine;
/// Module for error handling
pub mod error;
/// Module for the persisted run report
pub mod report;
/// Module for RIFF/WAVE parsing and metadata re-assembly
pub mod riff;
/// Module for filename tokenization and variation grouping
pub mod tokens;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use log::{debug, error, info, warn};
use rayon::prelude::*;
use strum_macros::Display;
use walkdir::WalkDir;

use crate::engine::ConcatOutcome;
use crate::error::Error;
use crate::report::{ConvertedEntry, ErrorEntry, RunReport};
use crate::tokens::{
    files_without_variations, find_variation_groups, natural_sort, remove_excluded_groups,
    tokenize_paths,
};

/// The one supported container extension, matched case-insensitively.
const AUDIO_EXTENSION: &str = "wav";
/// Suffix for the default output folder next to the input folder.
const DEFAULT_OUTPUT_SUFFIX: &str = "_sausage";

/// Configuration for one conversion run.
#[derive(Debug, Clone)]
pub struct ConversionOptions {
    /// Folder to scan for variation sets.
    pub input_dir: PathBuf,
    /// Output folder. If unset or equal to the input folder, a sibling folder
    /// with a `_sausage` suffix is used.
    pub output_dir: Option<PathBuf>,
    /// Seconds of silence inserted between concatenated members.
    pub silence_duration: f64,
    /// Members at or above this duration (seconds) are dropped. 0 = unlimited.
    pub max_duration: f64,
    /// Mirror unmatched audio files, non-audio files and failed-unit members
    /// into the output tree.
    pub copy_unmatched: bool,
    /// Scan subfolders recursively instead of the top level only.
    pub recurse_subfolders: bool,
    /// Groups whose first member's stem contains any of these are skipped.
    pub exclusion_keywords: Vec<String>,
    /// Appended to each output filename before the extension.
    pub append_tag: String,
    /// Number of threads for conversion work. Defaults to CPU core count.
    pub num_threads: Option<usize>,
    /// Where the run report is written. Defaults to the per-user data folder.
    pub report_dir: Option<PathBuf>,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        ConversionOptions {
            input_dir: PathBuf::from("."),
            output_dir: None,
            silence_duration: 0.5,
            max_duration: 0.0,
            copy_unmatched: true,
            recurse_subfolders: true,
            exclusion_keywords: Vec::new(),
            append_tag: String::new(),
            num_threads: None,
            report_dir: None,
        }
    }
}

/// Stage labels attached to progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Phase {
    #[strum(serialize = "Analysing...")]
    Analysing,
    #[strum(serialize = "Appending...")]
    Appending,
    #[strum(serialize = "Copying...")]
    Copying,
}

/// What a log event was about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum OperationKind {
    Write,
    Copy,
}

/// Run-scoped shared state: a cooperative cancellation flag plus counters.
///
/// Workers never mutate this directly; the orchestrator derives the counters
/// from aggregated unit results after each pool barrier. Cancellation is
/// polled before each unit starts, so in-flight units run to completion.
#[derive(Debug, Default)]
pub struct ControlState {
    cancel: AtomicBool,
    files_scanned: AtomicUsize,
    files_created: AtomicUsize,
}

impl ControlState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Already-dispatched units still finish.
    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn files_scanned(&self) -> usize {
        self.files_scanned.load(Ordering::SeqCst)
    }

    pub fn files_created(&self) -> usize {
        self.files_created.load(Ordering::SeqCst)
    }

    fn set_files_scanned(&self, count: usize) {
        self.files_scanned.store(count, Ordering::SeqCst);
    }

    fn add_files_created(&self, count: usize) {
        self.files_created.fetch_add(count, Ordering::SeqCst);
    }
}

/// Observer interface for the embedding shell (GUI or CLI).
///
/// Progress fires once per completed unit plus a final flush per stage, so a
/// displayed bar always reaches the number of units actually dispatched.
pub trait EventSink: Send + Sync {
    fn progress(&self, completed: usize, total: usize, phase: Phase) {
        let _ = (completed, total, phase);
    }

    fn log(&self, operation: OperationKind, success: bool, input: &Path, detail: &str) {
        let _ = (operation, success, input, detail);
    }
}

/// Sink that ignores every event.
pub struct NullSink;

impl EventSink for NullSink {}

/// Result of scanning a folder, for the embedding shell's tree view.
#[derive(Debug)]
pub struct FolderScan {
    pub audio_files: Vec<PathBuf>,
    pub non_audio_entries: Vec<PathBuf>,
    pub variation_groups: Vec<Vec<PathBuf>>,
}

/// Enumerates a folder and detects variation sets without converting.
pub fn scan_folder(
    input_dir: &Path,
    recurse_subfolders: bool,
    control: &ControlState,
) -> Result<FolderScan, Error> {
    let (mut audio_files, non_audio_entries) = collect_entries(input_dir, recurse_subfolders)?;
    natural_sort(&mut audio_files);
    control.set_files_scanned(audio_files.len());

    let variation_groups = find_variation_groups(&tokenize_paths(&audio_files));
    Ok(FolderScan {
        audio_files,
        non_audio_entries,
        variation_groups,
    })
}

/// Runs one conversion end to end and returns the accumulated report.
///
/// Per-unit audio and metadata errors never abort the run; they become log
/// events, report entries and (if enabled) copy fallbacks. Only validation
/// failures are fatal.
pub fn convert_folder(
    options: &ConversionOptions,
    control: &ControlState,
    sink: &dyn EventSink,
) -> Result<RunReport, Error> {
    let output_folder = validate_options(options)?;
    info!(
        "Converting {:?} -> {:?}",
        options.input_dir, output_folder
    );

    let (mut audio_files, non_audio_entries) =
        collect_entries(&options.input_dir, options.recurse_subfolders)?;
    natural_sort(&mut audio_files);
    control.set_files_scanned(audio_files.len());
    info!(
        "Found {} audio files and {} other entries.",
        audio_files.len(),
        non_audio_entries.len()
    );

    let groups = find_variation_groups(&tokenize_paths(&audio_files));
    let groups = remove_excluded_groups(groups, &options.exclusion_keywords);
    let groups = filter_by_duration(groups, options.max_duration, control, sink);
    info!("{} variation sets to convert.", groups.len());

    let mut report = RunReport::new(&options.input_dir, &output_folder);
    let mut copy_set: Vec<PathBuf> = Vec::new();
    if options.copy_unmatched {
        copy_set = files_without_variations(&groups, &audio_files);
        copy_set.extend(non_audio_entries.iter().cloned());
    }

    if !groups.is_empty() {
        let units = groups
            .iter()
            .map(|group| build_unit(group, &options.input_dir, &output_folder, &options.append_tag))
            .collect::<Result<Vec<_>, Error>>()?;

        let outcomes = run_conversion_units(&units, options, control, sink);
        for outcome in outcomes {
            match outcome {
                UnitOutcome::Converted(entry) => {
                    control.add_files_created(1);
                    report.converted.push(entry);
                }
                UnitOutcome::Failed { entry, members } => {
                    report.errors.push(entry);
                    if options.copy_unmatched {
                        copy_set.extend(members);
                    }
                }
                UnitOutcome::Skipped => {}
            }
        }
    }

    if options.copy_unmatched && !copy_set.is_empty() {
        let outcomes = run_copy_units(&copy_set, &options.input_dir, &output_folder, control, sink);
        for outcome in outcomes {
            match outcome {
                CopyOutcome::Copied(path) => report.copied.push(path),
                CopyOutcome::Failed(entry) => report.errors.push(entry),
                CopyOutcome::Skipped => {}
            }
        }
    }

    let report_dir = options
        .report_dir
        .clone()
        .or_else(report::default_report_dir)
        .unwrap_or_else(|| output_folder.clone());
    match report.save(&report_dir) {
        Ok(path) => info!("Report written to {:?}", path),
        Err(e) => error!("Failed to persist the run report: {e}"),
    }

    info!(
        "Run complete: {} converted, {} copied, {} errors.",
        report.converted.len(),
        report.copied.len(),
        report.errors.len()
    );
    Ok(report)
}

/// Checks the folders and resolves the effective output folder.
///
/// These are the only run-fatal failures; everything later is per-unit.
fn validate_options(options: &ConversionOptions) -> Result<PathBuf, Error> {
    if !options.input_dir.is_dir() {
        return Err(Error::InvalidOptions(format!(
            "Input path is not a valid directory: {:?}",
            options.input_dir
        )));
    }
    if options.silence_duration < 0.0 {
        return Err(Error::InvalidOptions(format!(
            "Silence duration must not be negative: {}",
            options.silence_duration
        )));
    }
    if options.max_duration < 0.0 {
        return Err(Error::InvalidOptions(format!(
            "Max duration must not be negative: {}",
            options.max_duration
        )));
    }

    let output_folder = match &options.output_dir {
        Some(dir) if *dir != options.input_dir => dir.clone(),
        _ => default_output_path(&options.input_dir),
    };
    fs::create_dir_all(&output_folder).map_err(|e| Error::Io {
        path: output_folder.clone(),
        source: e,
    })?;
    Ok(output_folder)
}

/// `<input>_sausage`, next to the input folder.
fn default_output_path(input_dir: &Path) -> PathBuf {
    let name = input_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    input_dir.with_file_name(format!("{name}{DEFAULT_OUTPUT_SUFFIX}"))
}

/// Splits the folder contents into audio files and everything else.
///
/// Audio means a regular file with the supported extension, case-insensitive.
/// macOS leaves hidden `._` artifacts behind on foreign filesystems; they
/// carry no usable content and go to the non-audio side.
fn collect_entries(
    input_dir: &Path,
    recurse_subfolders: bool,
) -> Result<(Vec<PathBuf>, Vec<PathBuf>), Error> {
    let max_depth = if recurse_subfolders { usize::MAX } else { 1 };
    let mut audio_files = Vec::new();
    let mut non_audio_entries = Vec::new();

    for entry in WalkDir::new(input_dir).min_depth(1).max_depth(max_depth) {
        let entry = entry.map_err(|e| Error::Io {
            path: input_dir.to_path_buf(),
            source: e.into(),
        })?;
        let path = entry.into_path();

        // When recursing, a directory's files are enumerated individually, so
        // the directory itself is not an entry of its own. Without recursion
        // it is, and gets mirrored wholesale.
        if recurse_subfolders && path.is_dir() {
            continue;
        }

        let is_audio = path.is_file()
            && path
                .extension()
                .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case(AUDIO_EXTENSION))
                .unwrap_or(false)
            && !path
                .file_name()
                .map(|name| name.to_string_lossy().starts_with("._"))
                .unwrap_or(false);

        if is_audio {
            audio_files.push(path);
        } else {
            non_audio_entries.push(path);
        }
    }

    Ok((audio_files, non_audio_entries))
}

/// Mirrors `file` relative to the input folder into the output folder.
fn output_path_for(file: &Path, input_dir: &Path, output_dir: &Path) -> Result<PathBuf, Error> {
    let relative = pathdiff::diff_paths(file, input_dir).ok_or_else(|| Error::Io {
        path: file.to_path_buf(),
        source: std::io::Error::other("Failed to calculate relative path"),
    })?;
    Ok(output_dir.join(relative))
}

/// Inserts `tag` between the file stem and the extension.
fn append_tag_to_filename(path: &Path, tag: &str) -> PathBuf {
    if tag.is_empty() {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    path.with_file_name(format!("{stem}{tag}{extension}"))
}

/// Drops members at or above `max_duration` and groups that shrink below two
/// members. With a zero threshold everything is kept. On cancellation the
/// remaining files are not probed and the list is returned unfiltered.
fn filter_by_duration(
    groups: Vec<Vec<PathBuf>>,
    max_duration: f64,
    control: &ControlState,
    sink: &dyn EventSink,
) -> Vec<Vec<PathBuf>> {
    if max_duration == 0.0 {
        return groups;
    }

    let total: usize = groups.iter().map(|group| group.len()).sum();
    sink.progress(0, total, Phase::Analysing);

    let mut kept = Vec::new();
    let mut count = 0;
    for group in &groups {
        let mut survivors = Vec::new();
        for file in group {
            if control.is_cancelled() {
                sink.progress(total, total, Phase::Analysing);
                return groups;
            }
            count += 1;
            match engine::probe_duration(file) {
                Ok(duration) if duration < max_duration => survivors.push(file.clone()),
                Ok(duration) => {
                    debug!("Dropping {:?}: {duration:.3}s exceeds the limit", file);
                }
                // Unreadable members are dropped here and surface later as
                // copy candidates or unit errors.
                Err(e) => debug!("Could not probe {:?}: {e}", file),
            }
            sink.progress(count, total, Phase::Analysing);
        }
        if survivors.len() > 1 {
            kept.push(survivors);
        }
    }
    kept
}

/// Immutable input for one conversion unit.
#[derive(Debug, Clone)]
struct ConversionUnit {
    members: Vec<PathBuf>,
    output_path: PathBuf,
}

/// What one conversion unit produced, collected at the pool barrier.
enum UnitOutcome {
    Converted(ConvertedEntry),
    Failed {
        entry: ErrorEntry,
        members: Vec<PathBuf>,
    },
    /// Cancelled before the unit started.
    Skipped,
}

fn build_unit(
    group: &[PathBuf],
    input_dir: &Path,
    output_dir: &Path,
    append_tag: &str,
) -> Result<ConversionUnit, Error> {
    // The output is named after the group's first member.
    let mirrored = output_path_for(&group[0], input_dir, output_dir)?;
    Ok(ConversionUnit {
        members: group.to_vec(),
        output_path: append_tag_to_filename(&mirrored, append_tag),
    })
}

/// Runs all conversion units on a CPU-sized worker pool and blocks until
/// every dispatched unit has finished.
fn run_conversion_units(
    units: &[ConversionUnit],
    options: &ConversionOptions,
    control: &ControlState,
    sink: &dyn EventSink,
) -> Vec<UnitOutcome> {
    let total = units.len();
    sink.progress(0, total, Phase::Appending);
    let completed = AtomicUsize::new(0);

    let pool = build_pool(options.num_threads.unwrap_or(0));
    let run = || {
        units
            .par_iter()
            .map(|unit| {
                if control.is_cancelled() {
                    return UnitOutcome::Skipped;
                }
                let outcome = convert_unit(unit, options.silence_duration, sink);
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                sink.progress(done, total, Phase::Appending);
                outcome
            })
            .collect::<Vec<_>>()
    };
    let outcomes = match &pool {
        Some(pool) => pool.install(run),
        None => run(),
    };

    // Final flush so a displayed bar lands on the dispatched-unit count.
    sink.progress(completed.load(Ordering::SeqCst), total, Phase::Appending);
    outcomes
}

/// One unit of conversion work: concatenate, then graft metadata.
fn convert_unit(unit: &ConversionUnit, silence_duration: f64, sink: &dyn EventSink) -> UnitOutcome {
    let source = unit.members[0].clone();

    let result = engine::concatenate_variations(&unit.members, silence_duration, &unit.output_path)
        .and_then(|outcome| {
            riff::assemble_metadata(&source, &unit.output_path)?;
            Ok(outcome)
        });

    match result {
        Ok(outcome) => {
            info!("Write: {:?}", unit.output_path);
            sink.log(
                OperationKind::Write,
                true,
                &source,
                &unit.output_path.to_string_lossy(),
            );
            UnitOutcome::Converted(converted_entry(outcome))
        }
        Err(e) => {
            error!("{e}: file {:?}", source);
            sink.log(OperationKind::Write, false, &source, &e.to_string());
            // Don't leave a half-assembled artifact behind.
            if unit.output_path.exists() {
                if let Err(unlink) = fs::remove_file(&unit.output_path) {
                    warn!("Failed to delete partial output {:?}: {unlink}", unit.output_path);
                }
            }
            UnitOutcome::Failed {
                entry: ErrorEntry {
                    path: source,
                    error: e.to_string(),
                },
                members: unit.members.clone(),
            }
        }
    }
}

fn converted_entry(outcome: ConcatOutcome) -> ConvertedEntry {
    ConvertedEntry {
        output_path: outcome.output_path,
        duration_secs: outcome.duration_secs,
        members: outcome.members.into_iter().map(Into::into).collect(),
    }
}

enum CopyOutcome {
    Copied(PathBuf),
    Failed(ErrorEntry),
    Skipped,
}

/// Mirrors unmatched files into the output tree on a wider I/O pool.
fn run_copy_units(
    files: &[PathBuf],
    input_dir: &Path,
    output_dir: &Path,
    control: &ControlState,
    sink: &dyn EventSink,
) -> Vec<CopyOutcome> {
    let total = files.len();
    sink.progress(0, total, Phase::Copying);
    let completed = AtomicUsize::new(0);

    let io_threads = std::thread::available_parallelism()
        .map(|n| n.get() * 2)
        .unwrap_or(8);
    let pool = build_pool(io_threads);
    let run = || {
        files
            .par_iter()
            .map(|file| {
                if control.is_cancelled() {
                    return CopyOutcome::Skipped;
                }
                let outcome = match copy_entry(file, input_dir, output_dir) {
                    Ok(out_path) => {
                        info!("Copy: {:?} to: {:?}", file, out_path);
                        sink.log(OperationKind::Copy, true, file, &out_path.to_string_lossy());
                        CopyOutcome::Copied(file.clone())
                    }
                    Err(e) => {
                        error!("{e}: file {:?}", file);
                        sink.log(OperationKind::Copy, false, file, &e.to_string());
                        CopyOutcome::Failed(ErrorEntry {
                            path: file.clone(),
                            error: e.to_string(),
                        })
                    }
                };
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                sink.progress(done, total, Phase::Copying);
                outcome
            })
            .collect::<Vec<_>>()
    };
    let outcomes = match &pool {
        Some(pool) => pool.install(run),
        None => run(),
    };

    sink.progress(completed.load(Ordering::SeqCst), total, Phase::Copying);
    outcomes
}

/// Copies one file, or one directory wholesale if the destination does not
/// already exist.
fn copy_entry(file: &Path, input_dir: &Path, output_dir: &Path) -> Result<PathBuf, Error> {
    let out_path = output_path_for(file, input_dir, output_dir)?;
    let io_error = |path: &Path, source: std::io::Error| Error::Io {
        path: path.to_path_buf(),
        source,
    };

    if file.is_dir() {
        if !out_path.exists() {
            copy_dir_recursive(file, &out_path)?;
        }
    } else {
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }
        fs::copy(file, &out_path).map_err(|e| io_error(file, e))?;
    }
    Ok(out_path)
}

fn copy_dir_recursive(source: &Path, destination: &Path) -> Result<(), Error> {
    for entry in WalkDir::new(source) {
        let entry = entry.map_err(|e| Error::Io {
            path: source.to_path_buf(),
            source: e.into(),
        })?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|_| Error::Io {
                path: entry.path().to_path_buf(),
                source: std::io::Error::other("Failed to calculate relative path"),
            })?;
        let target = destination.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| Error::Io {
                path: target.clone(),
                source: e,
            })?;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| Error::Io {
                path: entry.path().to_path_buf(),
                source: e,
            })?;
        }
    }
    Ok(())
}

/// Builds a dedicated worker pool, falling back to the global one.
fn build_pool(num_threads: usize) -> Option<rayon::ThreadPool> {
    match rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build()
    {
        Ok(pool) => Some(pool),
        Err(e) => {
            warn!("Failed to build a worker pool: {e}. Using the global pool.");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_output_folder_gets_the_sausage_suffix() {
        assert_eq!(
            default_output_path(Path::new("/sounds/library")),
            PathBuf::from("/sounds/library_sausage")
        );
    }

    #[test]
    fn append_tag_goes_before_the_extension() {
        assert_eq!(
            append_tag_to_filename(Path::new("out/abc_01.wav"), "_stitched"),
            PathBuf::from("out/abc_01_stitched.wav")
        );
        assert_eq!(
            append_tag_to_filename(Path::new("out/abc_01.wav"), ""),
            PathBuf::from("out/abc_01.wav")
        );
    }

    #[test]
    fn enumeration_splits_audio_and_other_entries() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("mydir");
        fs::create_dir_all(&sub).unwrap();
        for name in ["abc_01.wav", "abc_02.WAV", "._abc_01.wav", "notes.txt"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        fs::write(sub.join("01monty.wav"), b"x").unwrap();

        let (audio, other) = collect_entries(dir.path(), true).unwrap();
        let audio_names: Vec<String> = audio
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert!(audio_names.contains(&"abc_01.wav".to_string()));
        assert!(audio_names.contains(&"abc_02.WAV".to_string()));
        assert!(audio_names.contains(&"01monty.wav".to_string()));
        assert!(!audio_names.contains(&"._abc_01.wav".to_string()));
        assert!(other.iter().any(|p| p.ends_with("notes.txt")));
        assert!(other.iter().any(|p| p.ends_with("._abc_01.wav")));
    }

    #[test]
    fn non_recursive_enumeration_keeps_subfolders_as_entries() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("mydir");
        fs::create_dir_all(&sub).unwrap();
        fs::write(dir.path().join("abc_01.wav"), b"x").unwrap();
        fs::write(sub.join("01monty.wav"), b"x").unwrap();

        let (audio, other) = collect_entries(dir.path(), false).unwrap();
        assert_eq!(audio.len(), 1);
        assert!(other.contains(&sub));
        assert!(!audio.iter().any(|p| p.ends_with("01monty.wav")));
    }

    #[test]
    fn validation_rejects_a_missing_input_folder() {
        let options = ConversionOptions {
            input_dir: PathBuf::from("/definitely/not/here"),
            ..Default::default()
        };
        assert!(matches!(
            validate_options(&options),
            Err(Error::InvalidOptions(_))
        ));
    }
}
