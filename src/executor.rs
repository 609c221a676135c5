use std::collections::HashSet;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::archive::{self, cleanup};
use crate::domain::{TransferUnit, add_tag};
use crate::error::SubmitError;
use crate::manifest::Manifest;
use crate::transfer::TransferClient;

/// Where finished files go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionTarget {
    pub host: String,
    pub remote_path: Utf8PathBuf,
}

/// Download → extract → tag → upload → manifest for a single unit. Holds no
/// state between invocations; everything it learns lives on disk or remotely.
pub struct TransferExecutor<T: TransferClient> {
    source: T,
    submission: T,
    target: SubmissionTarget,
}

impl<T: TransferClient> TransferExecutor<T> {
    pub fn new(source: T, submission: T, target: SubmissionTarget) -> Self {
        Self {
            source,
            submission,
            target,
        }
    }

    pub fn target(&self) -> &SubmissionTarget {
        &self.target
    }

    /// Runs every step for `unit`. A transfer failure aborts before the
    /// manifest is written, so a failed unit never looks complete.
    pub fn execute(&self, unit: &TransferUnit) -> Result<Manifest, SubmitError> {
        let archive_path = self.ensure_archive(unit)?;
        let extraction = archive::extract(&archive_path, &unit.local_dir)?;
        let mut to_remove = extraction.paths;

        let extracted: HashSet<&Utf8Path> = extraction.files.iter().map(|f| f.as_path()).collect();
        let mut uploads = Vec::with_capacity(extraction.files.len());
        for file in &extraction.files {
            let tagged = add_tag(file, unit.namespace.as_str());
            if extracted.contains(tagged.as_path()) {
                cleanup(&to_remove);
                return Err(SubmitError::Archive(format!(
                    "{file} would be renamed onto {tagged}, which the archive also contains"
                )));
            }
            if tagged.as_std_path().exists() {
                tracing::warn!("replacing leftover {tagged}");
            }
            if let Err(err) = fs::rename(file.as_std_path(), tagged.as_std_path()) {
                cleanup(&to_remove);
                return Err(SubmitError::Filesystem(format!(
                    "rename {file} -> {tagged}: {err}"
                )));
            }
            if let Some(slot) = to_remove
                .iter_mut()
                .find(|path| path.as_path() == file.as_path())
            {
                *slot = tagged.clone();
            }
            uploads.push(tagged);
        }

        let result = self.upload_all(&uploads).and_then(|manifest| {
            manifest.write_atomic(&unit.sentinel_path())?;
            Ok(manifest)
        });
        cleanup(&to_remove);
        let manifest = result?;
        tracing::info!(
            "{} complete: {} files uploaded",
            unit.task_name(),
            manifest.entries().len()
        );
        Ok(manifest)
    }

    fn ensure_archive(&self, unit: &TransferUnit) -> Result<Utf8PathBuf, SubmitError> {
        let archive_path = unit.archive_path();
        let cached = unit.is_cached_locally()
            && fs::metadata(archive_path.as_std_path())
                .map(|meta| meta.len() == unit.expected_size)
                .unwrap_or(false);
        if cached {
            tracing::debug!("using cached archive {archive_path}");
            return Ok(archive_path);
        }
        let downloaded = self.source.download(&unit.source, &unit.local_dir)?;
        if downloaded != archive_path {
            return Err(SubmitError::TransferFailed(format!(
                "download {} produced {downloaded}, expected {archive_path}",
                unit.source
            )));
        }
        Ok(archive_path)
    }

    fn upload_all(&self, files: &[Utf8PathBuf]) -> Result<Manifest, SubmitError> {
        let mut manifest = Manifest::default();
        for file in files {
            let name = file
                .file_name()
                .ok_or_else(|| SubmitError::Filesystem(format!("no file name in {file}")))?;
            let size = fs::metadata(file.as_std_path())
                .map_err(|err| SubmitError::Filesystem(format!("stat {file}: {err}")))?
                .len();
            self.submission
                .upload(file, &self.target.host, &self.target.remote_path)?;
            manifest.push(name, size);
        }
        Ok(manifest)
    }
}

