//! Run report accumulation and persistence.
//!
//! One report is built per run and serialized to JSON once at the end, named
//! after the run's start time.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::engine::MemberInfo;
use crate::error::Error;

/// One source member of a converted file, with its layout before and after
/// harmonization. The converted fields are only present when a member was
/// actually changed.
#[derive(Debug, Clone, Serialize)]
pub struct MemberReport {
    pub path: PathBuf,
    pub channels: u16,
    pub sample_rate: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub converted_channels: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub converted_sample_rate: Option<u32>,
}

impl From<MemberInfo> for MemberReport {
    fn from(info: MemberInfo) -> Self {
        MemberReport {
            path: info.path,
            channels: info.channels,
            sample_rate: info.sample_rate,
            converted_channels: (info.channels != info.harmonized_channels)
                .then_some(info.harmonized_channels),
            converted_sample_rate: (info.sample_rate != info.harmonized_sample_rate)
                .then_some(info.harmonized_sample_rate),
        }
    }
}

/// One successfully converted variation group.
#[derive(Debug, Clone, Serialize)]
pub struct ConvertedEntry {
    pub output_path: PathBuf,
    pub duration_secs: f64,
    pub members: Vec<MemberReport>,
}

/// One unit that failed, with the error downgraded to a description.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEntry {
    pub path: PathBuf,
    pub error: String,
}

/// The persisted run report.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub created_at: String,
    pub input_folder: PathBuf,
    pub output_folder: PathBuf,
    pub converted: Vec<ConvertedEntry>,
    pub copied: Vec<PathBuf>,
    pub errors: Vec<ErrorEntry>,
}

impl RunReport {
    pub fn new(input_folder: &Path, output_folder: &Path) -> Self {
        RunReport {
            created_at: chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string(),
            input_folder: input_folder.to_path_buf(),
            output_folder: output_folder.to_path_buf(),
            converted: Vec::new(),
            copied: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Writes the report as pretty JSON into `dir`, returning the file path.
    pub fn save(&self, dir: &Path) -> Result<PathBuf, Error> {
        fs::create_dir_all(dir).map_err(|e| Error::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let path = dir.join(format!("SausageFileConverterReport_{}.json", self.created_at));
        let json = serde_json::to_string_pretty(self).map_err(|e| Error::Report {
            path: path.clone(),
            source: e.into(),
        })?;
        fs::write(&path, json).map_err(|e| Error::Io {
            path: path.clone(),
            source: e,
        })?;
        Ok(path)
    }
}

/// Per-user data directory for reports, shared across runs.
pub fn default_report_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "SoundSpruce", "SausageFileConverter")
        .map(|dirs| dirs.data_dir().to_path_buf())
}
