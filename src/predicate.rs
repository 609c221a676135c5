use std::fs;

use serde::Serialize;

use crate::domain::TransferUnit;
use crate::manifest::Manifest;
use crate::remote::{RemoteFileCache, RemoteSession, RemoteSize};

/// Why a unit is, or is not, already transferred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UnitStatus {
    Complete,
    ArchiveMissing,
    ArchiveSizeMismatch { expected: u64, actual: u64 },
    SentinelMissing,
    Unreadable { message: String },
    RemoteMismatch {
        name: String,
        expected: u64,
        remote: Option<u64>,
    },
}

impl UnitStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, UnitStatus::Complete)
    }
}

/// Inspects local archive, manifest sentinel and remote cache. Any read or
/// parse failure reports the unit as incomplete.
pub fn check_unit<S: RemoteSession>(unit: &TransferUnit, cache: &RemoteFileCache<S>) -> UnitStatus {
    let archive = unit.archive_path();
    let sentinel = unit.sentinel_path();

    let actual = match fs::metadata(archive.as_std_path()) {
        Ok(meta) => meta.len(),
        Err(_) => return UnitStatus::ArchiveMissing,
    };
    if actual != unit.expected_size {
        return UnitStatus::ArchiveSizeMismatch {
            expected: unit.expected_size,
            actual,
        };
    }
    if !sentinel.as_std_path().is_file() {
        return UnitStatus::SentinelMissing;
    }
    let manifest = match Manifest::read(&sentinel) {
        Ok(manifest) => manifest,
        Err(err) => {
            return UnitStatus::Unreadable {
                message: err.to_string(),
            };
        }
    };
    for entry in manifest.entries() {
        let remote_path = cache.remote_path().join(&entry.name);
        let remote = match cache.size_of(&remote_path) {
            Ok(size) => size,
            Err(err) => {
                return UnitStatus::Unreadable {
                    message: err.to_string(),
                };
            }
        };
        if remote != entry.size {
            return UnitStatus::RemoteMismatch {
                name: entry.name.clone(),
                expected: entry.size,
                remote: match remote {
                    RemoteSize::Known(size) => Some(size),
                    RemoteSize::Missing => None,
                },
            };
        }
    }
    UnitStatus::Complete
}

/// True only when the unit's work is already done and can be skipped.
pub fn is_unit_complete<S: RemoteSession>(unit: &TransferUnit, cache: &RemoteFileCache<S>) -> bool {
    let status = check_unit(unit, cache);
    if !status.is_complete() {
        tracing::debug!("{} needs transfer: {status:?}", unit.task_name());
    }
    status.is_complete()
}
