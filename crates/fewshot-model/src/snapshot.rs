//! Versioned model snapshots.
//!
//! A snapshot at `path` is two files:
//! - `path.json`: a [`SnapshotManifest`] with the format version and the model configuration;
//! - `path.mpk`: the full-precision named record of every parameter tensor.
//!
//! Loading rebuilds the architecture from the manifest and then fills in the parameters by
//! name, so it does not depend on how the saving build laid out its modules in memory.

use std::path::{Path, PathBuf};

use burn::{
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
};

use crate::{
    config::FewShotSegmentorConfig,
    error::{FewShotError, FewShotResult},
    models::FewShotSegmentor,
};

/// Snapshot format written by this build.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Architecture description stored next to the parameter record.
#[derive(Config, Debug)]
pub struct SnapshotManifest {
    /// Snapshot format version.
    pub format_version: u32,
    /// The configuration the model was built from.
    pub model: FewShotSegmentorConfig,
}

/// Stack headroom required before (de)serializing a record. The derived record visitors
/// recurse deeply enough to overflow the 2 MiB default of spawned threads in debug builds.
const RECORD_RED_ZONE: usize = 16 * 1024 * 1024;

/// Size of the stack segment allocated when the headroom is not available.
const RECORD_STACK_SIZE: usize = 64 * 1024 * 1024;

fn with_record_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RECORD_RED_ZONE, RECORD_STACK_SIZE, f)
}

fn recorder() -> NamedMpkFileRecorder<FullPrecisionSettings> {
    NamedMpkFileRecorder::<FullPrecisionSettings>::new()
}

/// Path of the manifest belonging to the snapshot at `path`.
pub fn manifest_path(path: &Path) -> PathBuf {
    path.with_extension("json")
}

/// Path of the parameter record belonging to the snapshot at `path`.
pub fn record_path(path: &Path) -> PathBuf {
    path.with_extension("mpk")
}

fn failed(path: &Path, reason: impl std::fmt::Display) -> FewShotError {
    FewShotError::SnapshotFailed {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

pub(crate) fn save<B: Backend>(model: &FewShotSegmentor<B>, path: &Path) -> FewShotResult<()> {
    let manifest = SnapshotManifest::new(SNAPSHOT_FORMAT_VERSION, model.config().clone());
    let manifest_file = manifest_path(path);
    manifest
        .save(&manifest_file)
        .map_err(|e| failed(&manifest_file, e))?;

    let record_file = record_path(path);
    with_record_stack(|| model.clone().save_file(record_file, &recorder()))
        .map_err(|e| failed(path, format!("{e:?}")))
}

/// Reads and checks the manifest of the snapshot at `path`.
///
/// # Errors
///
/// Returns `SnapshotFailed` if the manifest cannot be read and `UnsupportedSnapshotVersion`
/// if it was written by another format version.
pub fn read_manifest(path: &Path) -> FewShotResult<SnapshotManifest> {
    let manifest_file = manifest_path(path);
    let manifest =
        SnapshotManifest::load(&manifest_file).map_err(|e| failed(&manifest_file, e))?;

    if manifest.format_version != SNAPSHOT_FORMAT_VERSION {
        return Err(FewShotError::UnsupportedSnapshotVersion {
            found: manifest.format_version,
            supported: SNAPSHOT_FORMAT_VERSION,
        });
    }

    Ok(manifest)
}

pub(crate) fn load<B: Backend>(
    path: &Path,
    device: &Device<B>,
) -> FewShotResult<FewShotSegmentor<B>> {
    let manifest = read_manifest(path)?;

    with_record_stack(|| {
        manifest
            .model
            .init::<B>(device)?
            .load_file(record_path(path), &recorder(), device)
            .map_err(|e| failed(path, format!("{e:?}")))
    })
}
