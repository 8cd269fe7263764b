use crate::fault::{Fault, FaultKind};
use crate::signal::CoverageSignature;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("artifact io error: {0}")]
    Io(String),
    #[error("report serialization error: {0}")]
    Serialize(String),
}

impl From<io::Error> for ArtifactError {
    fn from(error: io::Error) -> Self {
        ArtifactError::Io(error.to_string())
    }
}

impl From<serde_json::Error> for ArtifactError {
    fn from(error: serde_json::Error) -> Self {
        ArtifactError::Serialize(error.to_string())
    }
}

/// Where the artifact for `kind` lives under `dir`.
///
/// One file per kind, named after the short kind name so a rerun that hits
/// the same kind lands on the same path. Raised names come from target
/// code, so anything outside `[A-Za-z0-9]` is replaced before it reaches
/// the filesystem.
pub fn fault_artifact_path(dir: &Path, kind: &FaultKind) -> PathBuf {
    let short: String = kind
        .short_name()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    dir.join(format!("report{short}.txt"))
}

/// Writes the human-readable fault report followed by the raw failing
/// input, so the input can be recovered byte-for-byte from the artifact.
pub fn write_fault_artifact(
    dir: &Path,
    fault: &Fault,
    signature: CoverageSignature,
    call: &str,
    input: &[u8],
) -> Result<PathBuf, ArtifactError> {
    fs::create_dir_all(dir)?;
    let path = fault_artifact_path(dir, &fault.kind);

    let mut report = format!("{fault}\n");
    report.push_str(&format!("signature: {signature:#x}\n"));
    report.push_str(&format!("input md5: {:x}\n", md5::compute(input)));
    report.push_str(&format!("call: {call}\n"));
    report.push_str(&format!("input bytes: {input:?}\n\n"));

    let mut bytes = report.into_bytes();
    bytes.extend_from_slice(input);
    fs::write(&path, bytes)?;
    Ok(path)
}

/// Summary of a finished session.
#[derive(Debug, Serialize)]
pub struct SessionReport {
    pub target: String,
    pub seed: u64,
    pub iterations: u64,
    pub skipped: u64,
    pub corpus_size: usize,
    pub fault_kinds: Vec<String>,
    pub artifacts: Vec<PathBuf>,
    pub elapsed_ms: u128,
}

pub fn write_session_report(path: &Path, report: &SessionReport) -> Result<(), ArtifactError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, report)?;
    Ok(())
}
